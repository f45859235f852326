//! Class graph collaborator interface
//!
//! The engine never loads classes itself. It queries a [`ClassGraph`] for
//! class metadata, subtype facts, packages, members and one-time static
//! initialization. [`crate::ClassRegistry`] is the in-memory implementation.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;
use parking_lot::Mutex;
use rustc_hash::FxHashSet;

use crate::error::{InvokeError, InvokeResult};
use crate::types::{ClassId, Kind, Primitive, TypeDescriptor};
use crate::value::{Object, ObjectBody, ObjectRef, Value};

bitflags! {
    /// Class and member modifiers (class-file access flag values)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Modifiers: u16 {
        /// Accessible from any class
        const PUBLIC = 0x0001;
        /// Accessible only from the declaring class
        const PRIVATE = 0x0002;
        /// Accessible from the package and from subclasses
        const PROTECTED = 0x0004;
        /// Class-level member
        const STATIC = 0x0008;
        /// Cannot be overridden or assigned after initialization
        const FINAL = 0x0010;
        /// Method takes a trailing variable-arity array
        const VARARGS = 0x0080;
        /// Class is an interface
        const INTERFACE = 0x0200;
        /// Class or method has no implementation
        const ABSTRACT = 0x0400;
    }
}

impl Modifiers {
    /// Neither public, protected nor private
    pub fn is_package_private(self) -> bool {
        !self.intersects(Modifiers::PUBLIC | Modifiers::PROTECTED | Modifiers::PRIVATE)
    }
}

/// Identity of a class loader; classes share a runtime package only when
/// they share a loader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoaderId(pub u32);

impl LoaderId {
    /// Loader of the bootstrap classes
    pub const BOOT: LoaderId = LoaderId(0);
    /// Default loader for user classes
    pub const APP: LoaderId = LoaderId(1);
}

/// Native body of a method or constructor
///
/// Instance methods receive the receiver as the first argument. Constructors
/// receive the freshly allocated object first.
pub type NativeFn = Arc<dyn Fn(&[Value]) -> InvokeResult<Value> + Send + Sync>;

/// Static initializer of a class
pub type Initializer = Arc<dyn Fn(&ClassDef) -> InvokeResult<()> + Send + Sync>;

/// What a member is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberKind {
    /// Method
    Method,
    /// Constructor (`<init>`)
    Constructor,
    /// Field
    Field,
}

/// How a member is executed or stored
#[derive(Clone)]
pub enum MemberBody {
    /// Native implementation
    Native(NativeFn),
    /// Instance field slot
    InstanceField(usize),
    /// Static field slot
    StaticField(usize),
    /// No implementation (abstract or interface method)
    Abstract,
}

impl fmt::Debug for MemberBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemberBody::Native(_) => f.write_str("Native"),
            MemberBody::InstanceField(slot) => write!(f, "InstanceField({})", slot),
            MemberBody::StaticField(slot) => write!(f, "StaticField({})", slot),
            MemberBody::Abstract => f.write_str("Abstract"),
        }
    }
}

/// A method, constructor or field of a class
///
/// Fields use the descriptor's return kind as the field type and have no
/// parameters. Method descriptors never include the receiver.
#[derive(Debug, Clone)]
pub struct Member {
    /// Declaring class
    pub declaring: ClassId,
    /// Member name (`<init>` for constructors)
    pub name: String,
    /// Declared signature
    pub descriptor: TypeDescriptor,
    /// Modifier set
    pub modifiers: Modifiers,
    /// Member kind
    pub kind: MemberKind,
    /// Implementation or storage
    pub body: MemberBody,
}

impl Member {
    /// Check if this is a static member
    pub fn is_static(&self) -> bool {
        self.modifiers.contains(Modifiers::STATIC)
    }

    /// Check if this member is final
    pub fn is_final(&self) -> bool {
        self.modifiers.contains(Modifiers::FINAL)
    }

    /// Check if this is a variable-arity method
    pub fn is_varargs(&self) -> bool {
        self.modifiers.contains(Modifiers::VARARGS)
    }

    /// Field type of a field member
    pub fn field_kind(&self) -> Kind {
        self.descriptor.return_kind()
    }
}

/// Class metadata
pub struct ClassDef {
    /// Class identity
    pub id: ClassId,
    /// Fully qualified name (`pkg.Name`, arrays as `Elem[]`)
    pub name: String,
    /// Package name (empty for the unnamed package)
    pub package: String,
    /// Defining loader
    pub loader: LoaderId,
    /// Superclass (`None` only for the root class and interfaces without one)
    pub super_class: Option<ClassId>,
    /// Directly implemented interfaces
    pub interfaces: Vec<ClassId>,
    /// Class modifiers
    pub modifiers: Modifiers,
    /// Element kind if this is an array class
    pub component: Option<Kind>,
    /// Primitive wrapped by this class, if it is a wrapper
    pub wrapper_of: Option<Primitive>,
    /// Declared members
    pub members: Vec<Member>,
    /// Kinds of all instance field slots, inherited slots first
    pub instance_field_kinds: Vec<Kind>,
    /// Static field storage
    pub statics: Mutex<Vec<Value>>,
    /// One-time static initializer
    pub initializer: Option<Initializer>,
}

impl ClassDef {
    /// Check if this class is an interface
    pub fn is_interface(&self) -> bool {
        self.modifiers.contains(Modifiers::INTERFACE)
    }

    /// Check if this is an array class
    pub fn is_array(&self) -> bool {
        self.component.is_some()
    }

    /// Read a static field slot
    pub fn get_static(&self, slot: usize) -> Option<Value> {
        self.statics.lock().get(slot).cloned()
    }

    /// Write a static field slot, returning false if the slot does not exist
    pub fn set_static(&self, slot: usize, value: Value) -> bool {
        match self.statics.lock().get_mut(slot) {
            Some(field) => {
                *field = value;
                true
            }
            None => false,
        }
    }

    /// Slot of a static field declared by this class
    pub fn static_slot(&self, name: &str) -> Option<usize> {
        self.members.iter().find_map(|m| match m.body {
            MemberBody::StaticField(slot) if m.name == name => Some(slot),
            _ => None,
        })
    }
}

impl fmt::Debug for ClassDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassDef")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("loader", &self.loader)
            .field("super_class", &self.super_class)
            .field("interfaces", &self.interfaces)
            .field("modifiers", &self.modifiers)
            .field("members", &self.members.len())
            .finish()
    }
}

/// Classes the engine needs to know by identity
#[derive(Debug, Clone)]
pub struct WellKnownClasses {
    /// `java.lang.Object`
    pub object: ClassId,
    /// `java.lang.String`
    pub string: ClassId,
    /// `java.lang.Number`
    pub number: ClassId,
    /// `java.lang.Comparable`
    pub comparable: ClassId,
    /// `java.io.Serializable`
    pub serializable: ClassId,
    /// `java.lang.Cloneable`
    pub cloneable: ClassId,
    /// `java.lang.invoke.MethodHandle`
    pub method_handle: ClassId,
    /// `java.lang.Object[]`
    pub object_array: ClassId,
    /// Wrapper classes, indexed by [`Primitive::index`]
    pub wrappers: [ClassId; 8],
}

impl WellKnownClasses {
    /// Wrapper class of a primitive kind
    pub fn wrapper(&self, p: Primitive) -> ClassId {
        self.wrappers[p.index()]
    }

    /// `Object` as a reference kind
    pub fn object_kind(&self) -> Kind {
        Kind::Reference(self.object)
    }
}

/// Queryable class graph supplied to the engine
///
/// Implementors provide class metadata and static initialization; subtype,
/// package and member queries have default implementations in terms of
/// [`ClassGraph::class`].
pub trait ClassGraph: Send + Sync {
    /// Metadata of a class
    fn class(&self, id: ClassId) -> Option<&ClassDef>;

    /// Well-known classes
    fn well_known(&self) -> &WellKnownClasses;

    /// Whether the class's one-time initializer has completed
    fn is_initialized(&self, id: ClassId) -> bool;

    /// Run the class's initializer unless it already ran
    ///
    /// Concurrent callers block until the winning thread finishes. A failed
    /// initializer reports the same failure to every later caller.
    fn run_initializer_once(&self, id: ClassId) -> InvokeResult<()>;

    /// Class name, or a placeholder for unknown ids
    fn class_name(&self, id: ClassId) -> String {
        self.class(id)
            .map(|c| c.name.clone())
            .unwrap_or_else(|| id.to_string())
    }

    /// Check if `sub` is `sup` or one of its subtypes
    fn is_subtype_of(&self, sub: ClassId, sup: ClassId) -> bool {
        if sub == sup || sup == self.well_known().object {
            return true;
        }
        let Some(sub_def) = self.class(sub) else {
            return false;
        };

        // Arrays are covariant in reference components
        if let Some(sub_component) = sub_def.component {
            if let Some(sup_component) = self.class(sup).and_then(|c| c.component) {
                return match (sub_component, sup_component) {
                    (Kind::Reference(a), Kind::Reference(b)) => self.is_subtype_of(a, b),
                    (a, b) => a == b,
                };
            }
        }

        let mut seen = FxHashSet::default();
        let mut queue = VecDeque::new();
        queue.push_back(sub);
        while let Some(id) = queue.pop_front() {
            if id == sup {
                return true;
            }
            if !seen.insert(id) {
                continue;
            }
            if let Some(def) = self.class(id) {
                queue.extend(def.super_class);
                queue.extend(def.interfaces.iter().copied());
            }
        }
        false
    }

    /// Check if `class` implements interface `iface`
    fn implements_interface(&self, class: ClassId, iface: ClassId) -> bool {
        self.is_interface(iface) && self.is_subtype_of(class, iface)
    }

    /// Check if the class is an interface
    fn is_interface(&self, id: ClassId) -> bool {
        self.class(id).is_some_and(|c| c.is_interface())
    }

    /// Package of a class
    fn package_of(&self, id: ClassId) -> Option<&str> {
        self.class(id).map(|c| c.package.as_str())
    }

    /// Same package name and same defining loader
    fn is_same_package(&self, a: ClassId, b: ClassId) -> bool {
        if a == b {
            return true;
        }
        match (self.class(a), self.class(b)) {
            (Some(a), Some(b)) => a.package == b.package && a.loader == b.loader,
            _ => false,
        }
    }

    /// Modifier set of a member
    fn modifiers_of(&self, member: &Member) -> Modifiers {
        member.modifiers
    }

    /// Primitive wrapped by a class
    fn wrapper_primitive(&self, id: ClassId) -> Option<Primitive> {
        self.class(id).and_then(|c| c.wrapper_of)
    }

    /// Element kind of an array class
    fn component_of(&self, id: ClassId) -> Option<Kind> {
        self.class(id).and_then(|c| c.component)
    }

    /// Check if a value is null or an instance of `class`
    fn is_instance(&self, value: &Value, class: ClassId) -> bool {
        match value {
            Value::Null => true,
            Value::Ref(obj) => self.is_subtype_of(obj.class(), class),
            _ => false,
        }
    }

    /// Check if a value can occupy a slot of the given kind without conversion
    fn conforms(&self, value: &Value, kind: Kind) -> bool {
        match kind {
            Kind::Void => matches!(value, Value::Void),
            Kind::Primitive(p) => value.primitive_kind() == Some(p),
            Kind::Reference(class) => {
                matches!(value, Value::Null | Value::Ref(_)) && self.is_instance(value, class)
            }
        }
    }

    /// Resolve a member by name and signature in `refc` or its supertypes
    ///
    /// Constructors are only searched in `refc` itself. Fields match on
    /// the field type alone.
    fn find_member(
        &self,
        refc: ClassId,
        name: &str,
        kind: MemberKind,
        descriptor: &TypeDescriptor,
    ) -> Option<&Member> {
        let matches = |m: &Member| {
            m.kind == kind
                && m.name == name
                && match kind {
                    MemberKind::Field => m.field_kind() == descriptor.return_kind(),
                    _ => m.descriptor == *descriptor,
                }
        };

        if kind == MemberKind::Constructor {
            return self.class(refc)?.members.iter().find(|m| matches(m));
        }

        // Superclass chain first, then interfaces
        let mut current = Some(refc);
        while let Some(id) = current {
            let def = self.class(id)?;
            if let Some(m) = def.members.iter().find(|m| matches(m)) {
                return Some(m);
            }
            current = def.super_class;
        }

        let mut seen = FxHashSet::default();
        let mut queue: VecDeque<ClassId> = VecDeque::new();
        queue.push_back(refc);
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            let Some(def) = self.class(id) else {
                continue;
            };
            if def.is_interface() {
                if let Some(m) = def.members.iter().find(|m| matches(m)) {
                    return Some(m);
                }
            }
            queue.extend(def.super_class);
            queue.extend(def.interfaces.iter().copied());
        }
        None
    }

    /// Implementation of an overridable method for a receiver of class `runtime_class`
    ///
    /// Walks the superclass chain of the runtime class, then default methods
    /// of its interfaces. Private methods never override.
    fn find_override(&self, runtime_class: ClassId, method: &Member) -> Option<&Member> {
        let overrides = |m: &Member| {
            m.kind == MemberKind::Method
                && !m.is_static()
                && !m.modifiers.contains(Modifiers::PRIVATE)
                && !matches!(m.body, MemberBody::Abstract)
                && m.name == method.name
                && m.descriptor == method.descriptor
        };

        let mut current = Some(runtime_class);
        while let Some(id) = current {
            let def = self.class(id)?;
            if let Some(m) = def.members.iter().find(|m| overrides(m)) {
                return Some(m);
            }
            current = def.super_class;
        }

        let mut seen = FxHashSet::default();
        let mut queue: VecDeque<ClassId> = VecDeque::new();
        queue.push_back(runtime_class);
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            let Some(def) = self.class(id) else {
                continue;
            };
            if def.is_interface() {
                if let Some(m) = def.members.iter().find(|m| overrides(m)) {
                    return Some(m);
                }
            }
            queue.extend(def.super_class);
            queue.extend(def.interfaces.iter().copied());
        }
        None
    }

    /// Allocate a zeroed instance, initializing the class first
    fn allocate(&self, id: ClassId) -> InvokeResult<ObjectRef> {
        let def = self
            .class(id)
            .ok_or_else(|| InvokeError::NoSuchMember(format!("unknown class {}", id)))?;
        if def.is_interface() || def.modifiers.contains(Modifiers::ABSTRACT) || def.is_array() {
            return Err(InvokeError::Thrown(format!(
                "InstantiationError: {}",
                def.name
            )));
        }
        self.run_initializer_once(id)?;
        let fields = def
            .instance_field_kinds
            .iter()
            .map(|k| Value::default_for(*k))
            .collect();
        Ok(ObjectRef::new(Object::new(
            id,
            ObjectBody::Instance(Mutex::new(fields)),
        )))
    }
}
