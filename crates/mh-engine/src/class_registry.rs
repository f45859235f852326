//! In-memory class graph
//!
//! [`ClassRegistry`] stores class metadata in a dense table indexed by
//! [`ClassId`] and implements [`ClassGraph`] on top of it. Registries are
//! assembled with [`ClassRegistryBuilder`], which bootstraps the core
//! `java.lang` classes, primitive wrappers and `java.lang.invoke.MethodHandle`.

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::class_graph::{
    ClassDef, ClassGraph, Initializer, LoaderId, Member, MemberBody, MemberKind, Modifiers,
    NativeFn, WellKnownClasses,
};
use crate::error::{InvokeError, InvokeResult};
use crate::init::InitTable;
use crate::types::{ClassId, Kind, Primitive, TypeDescriptor};
use crate::value::{Object, ObjectBody, ObjectRef, Value};

/// Class registry backing a runtime
#[derive(Debug)]
pub struct ClassRegistry {
    /// Classes indexed by ID
    classes: Vec<ClassDef>,
    /// Class name to ID mapping
    name_to_id: FxHashMap<String, ClassId>,
    /// Interned array classes by element kind
    arrays: FxHashMap<Kind, ClassId>,
    /// Bootstrap classes
    well_known: WellKnownClasses,
    /// Static initialization state
    init: InitTable,
}

impl ClassRegistry {
    /// Start a registry with the bootstrap classes defined
    pub fn builder() -> ClassRegistryBuilder {
        ClassRegistryBuilder::new()
    }

    /// Get class by ID
    pub fn get_class(&self, id: ClassId) -> Option<&ClassDef> {
        self.classes.get(id.index())
    }

    /// Get class by name
    pub fn get_class_by_name(&self, name: &str) -> Option<&ClassDef> {
        self.name_to_id
            .get(name)
            .and_then(|id| self.classes.get(id.index()))
    }

    /// Get class ID by name
    pub fn class_id(&self, name: &str) -> Option<ClassId> {
        self.name_to_id.get(name).copied()
    }

    /// Array class with the given element kind, if one was created
    pub fn array_of(&self, component: Kind) -> Option<ClassId> {
        self.arrays.get(&component).copied()
    }

    /// Number of classes
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Iterate over all classes
    pub fn iter(&self) -> impl Iterator<Item = &ClassDef> {
        self.classes.iter()
    }
}

impl ClassGraph for ClassRegistry {
    fn class(&self, id: ClassId) -> Option<&ClassDef> {
        self.classes.get(id.index())
    }

    fn well_known(&self) -> &WellKnownClasses {
        &self.well_known
    }

    fn is_initialized(&self, id: ClassId) -> bool {
        self.init.is_initialized(id)
    }

    fn run_initializer_once(&self, id: ClassId) -> InvokeResult<()> {
        let def = self
            .class(id)
            .ok_or_else(|| InvokeError::NoSuchMember(format!("unknown class {}", id)))?;
        self.init.run_once(id, &def.name, || {
            if let Some(super_class) = def.super_class {
                self.run_initializer_once(super_class)?;
            }
            if let Some(initializer) = &def.initializer {
                initializer(def)?;
            }
            Ok(())
        })
    }
}

/// Body of a member that is not yet attached to a class
#[derive(Clone)]
enum PendingBody {
    Native(NativeFn),
    Field,
    Abstract,
}

#[derive(Clone)]
struct PendingMember {
    name: String,
    descriptor: TypeDescriptor,
    modifiers: Modifiers,
    kind: MemberKind,
    body: PendingBody,
}

/// Declaration of a class to add to a registry
#[derive(Clone)]
pub struct ClassSpec {
    name: String,
    modifiers: Modifiers,
    loader: LoaderId,
    super_class: Option<ClassId>,
    interfaces: Vec<ClassId>,
    members: Vec<PendingMember>,
    initializer: Option<Initializer>,
    wrapper_of: Option<Primitive>,
    root: bool,
}

impl ClassSpec {
    /// Public class extending `Object`, defined by the application loader
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            modifiers: Modifiers::PUBLIC,
            loader: LoaderId::APP,
            super_class: None,
            interfaces: Vec::new(),
            members: Vec::new(),
            initializer: None,
            wrapper_of: None,
            root: false,
        }
    }

    /// Public interface
    pub fn interface(name: impl Into<String>) -> Self {
        Self::new(name).modifiers(Modifiers::PUBLIC | Modifiers::INTERFACE | Modifiers::ABSTRACT)
    }

    /// Set the class modifiers
    pub fn modifiers(mut self, modifiers: Modifiers) -> Self {
        self.modifiers = modifiers;
        self
    }

    /// Set the defining loader
    pub fn loader(mut self, loader: LoaderId) -> Self {
        self.loader = loader;
        self
    }

    /// Set the superclass
    pub fn extends(mut self, super_class: ClassId) -> Self {
        self.super_class = Some(super_class);
        self
    }

    /// Add a directly implemented interface
    pub fn implements(mut self, iface: ClassId) -> Self {
        self.interfaces.push(iface);
        self
    }

    /// Add a method with a native body
    pub fn method<F>(
        mut self,
        name: impl Into<String>,
        modifiers: Modifiers,
        descriptor: TypeDescriptor,
        body: F,
    ) -> Self
    where
        F: Fn(&[Value]) -> InvokeResult<Value> + Send + Sync + 'static,
    {
        self.members.push(PendingMember {
            name: name.into(),
            descriptor,
            modifiers,
            kind: MemberKind::Method,
            body: PendingBody::Native(Arc::new(body)),
        });
        self
    }

    /// Add a method without an implementation
    pub fn abstract_method(
        mut self,
        name: impl Into<String>,
        modifiers: Modifiers,
        descriptor: TypeDescriptor,
    ) -> Self {
        self.members.push(PendingMember {
            name: name.into(),
            descriptor,
            modifiers: modifiers | Modifiers::ABSTRACT,
            kind: MemberKind::Method,
            body: PendingBody::Abstract,
        });
        self
    }

    /// Add a constructor; the body receives the new object followed by the arguments
    pub fn constructor<F>(mut self, modifiers: Modifiers, params: Vec<Kind>, body: F) -> Self
    where
        F: Fn(&[Value]) -> InvokeResult<Value> + Send + Sync + 'static,
    {
        self.members.push(PendingMember {
            name: "<init>".to_string(),
            descriptor: TypeDescriptor::new(Kind::Void, params),
            modifiers,
            kind: MemberKind::Constructor,
            body: PendingBody::Native(Arc::new(body)),
        });
        self
    }

    /// Add a field; `STATIC` in `modifiers` makes it a static field
    pub fn field(mut self, name: impl Into<String>, modifiers: Modifiers, kind: Kind) -> Self {
        self.members.push(PendingMember {
            name: name.into(),
            descriptor: TypeDescriptor::new(kind, Vec::new()),
            modifiers,
            kind: MemberKind::Field,
            body: PendingBody::Field,
        });
        self
    }

    /// Set the static initializer
    pub fn initializer<F>(mut self, init: F) -> Self
    where
        F: Fn(&ClassDef) -> InvokeResult<()> + Send + Sync + 'static,
    {
        self.initializer = Some(Arc::new(init));
        self
    }

    fn boot(mut self) -> Self {
        self.loader = LoaderId::BOOT;
        self
    }
}

/// Builder for [`ClassRegistry`]
///
/// Superclasses must be defined before their subclasses so inherited field
/// slots are known. Classes may be declared first to obtain an ID for
/// forward references.
pub struct ClassRegistryBuilder {
    classes: Vec<Option<ClassDef>>,
    names: Vec<String>,
    name_to_id: FxHashMap<String, ClassId>,
    arrays: FxHashMap<Kind, ClassId>,
    well_known: WellKnownClasses,
}

impl ClassRegistryBuilder {
    /// Builder with the bootstrap classes defined
    pub fn new() -> Self {
        let placeholder = ClassId(0);
        let mut builder = Self {
            classes: Vec::new(),
            names: Vec::new(),
            name_to_id: FxHashMap::default(),
            arrays: FxHashMap::default(),
            well_known: WellKnownClasses {
                object: placeholder,
                string: placeholder,
                number: placeholder,
                comparable: placeholder,
                serializable: placeholder,
                cloneable: placeholder,
                method_handle: placeholder,
                object_array: placeholder,
                wrappers: [placeholder; 8],
            },
        };
        builder.bootstrap();
        builder
    }

    fn bootstrap(&mut self) {
        let mut root = ClassSpec::new("java.lang.Object").boot();
        root.root = true;
        let object = self.define(root);
        self.well_known.object = object;

        let serializable = self.define(ClassSpec::interface("java.io.Serializable").boot());
        let cloneable = self.define(ClassSpec::interface("java.lang.Cloneable").boot());
        let comparable = self.define(ClassSpec::interface("java.lang.Comparable").boot());
        self.well_known.serializable = serializable;
        self.well_known.cloneable = cloneable;
        self.well_known.comparable = comparable;

        let int_value = TypeDescriptor::new(Kind::INT, Vec::new());
        let double_value = TypeDescriptor::new(Kind::DOUBLE, Vec::new());
        let number = self.define(
            ClassSpec::new("java.lang.Number")
                .boot()
                .modifiers(Modifiers::PUBLIC | Modifiers::ABSTRACT)
                .implements(serializable)
                .abstract_method("intValue", Modifiers::PUBLIC, int_value.clone())
                .abstract_method("doubleValue", Modifiers::PUBLIC, double_value.clone()),
        );
        self.well_known.number = number;

        let string = self.declare("java.lang.String");
        let string_kind = Kind::Reference(string);
        self.define(
            ClassSpec::new("java.lang.String")
                .boot()
                .modifiers(Modifiers::PUBLIC | Modifiers::FINAL)
                .implements(serializable)
                .implements(comparable)
                .method(
                    "length",
                    Modifiers::PUBLIC,
                    TypeDescriptor::new(Kind::INT, Vec::new()),
                    |args| {
                        let s = args[0].as_str().unwrap_or_default();
                        Ok(Value::Int(s.encode_utf16().count() as i32))
                    },
                )
                .method(
                    "concat",
                    Modifiers::PUBLIC,
                    TypeDescriptor::new(string_kind, vec![string_kind]),
                    move |args| {
                        let head = args[0].as_str().unwrap_or_default();
                        let tail = args[1].as_str().ok_or_else(|| {
                            InvokeError::NullPointer("String.concat argument".to_string())
                        })?;
                        Ok(Value::Ref(ObjectRef::new(Object::new(
                            string,
                            ObjectBody::Str(format!("{}{}", head, tail)),
                        ))))
                    },
                ),
        );
        self.well_known.string = string;

        for p in Primitive::ALL {
            let name = match p {
                Primitive::Boolean => "java.lang.Boolean",
                Primitive::Byte => "java.lang.Byte",
                Primitive::Short => "java.lang.Short",
                Primitive::Char => "java.lang.Character",
                Primitive::Int => "java.lang.Integer",
                Primitive::Long => "java.lang.Long",
                Primitive::Float => "java.lang.Float",
                Primitive::Double => "java.lang.Double",
            };
            let mut spec = ClassSpec::new(name)
                .boot()
                .modifiers(Modifiers::PUBLIC | Modifiers::FINAL)
                .implements(comparable);
            spec = match p {
                Primitive::Boolean | Primitive::Char => spec.implements(serializable),
                _ => spec
                    .extends(number)
                    .method("intValue", Modifiers::PUBLIC, int_value.clone(), move |args| {
                        unboxed_cast(&args[0], Primitive::Int)
                    })
                    .method("doubleValue", Modifiers::PUBLIC, double_value.clone(), move |args| {
                        unboxed_cast(&args[0], Primitive::Double)
                    }),
            };
            spec.wrapper_of = Some(p);
            let id = self.define(spec);
            self.well_known.wrappers[p.index()] = id;
        }

        let object_array = self.array_of(Kind::Reference(object));
        self.well_known.object_array = object_array;

        let invoker = TypeDescriptor::new(Kind::Reference(object), vec![Kind::Reference(object_array)]);
        let invoker_modifiers = Modifiers::PUBLIC | Modifiers::FINAL | Modifiers::VARARGS;
        let method_handle = self.define(
            ClassSpec::new("java.lang.invoke.MethodHandle")
                .boot()
                .modifiers(Modifiers::PUBLIC | Modifiers::ABSTRACT)
                .method("invokeExact", invoker_modifiers, invoker.clone(), |_| {
                    Err(InvokeError::Unsupported(
                        "invokeExact cannot be invoked reflectively".to_string(),
                    ))
                })
                .method("invoke", invoker_modifiers, invoker, |_| {
                    Err(InvokeError::Unsupported(
                        "invoke cannot be invoked reflectively".to_string(),
                    ))
                }),
        );
        self.well_known.method_handle = method_handle;
    }

    /// Bootstrap classes
    pub fn well_known(&self) -> &WellKnownClasses {
        &self.well_known
    }

    /// Get class ID by name (declared or defined)
    pub fn class_id(&self, name: &str) -> Option<ClassId> {
        self.name_to_id.get(name).copied()
    }

    /// Reserve an ID for a class defined later
    pub fn declare(&mut self, name: &str) -> ClassId {
        if let Some(id) = self.name_to_id.get(name) {
            return *id;
        }
        let id = ClassId(self.classes.len() as u32);
        self.classes.push(None);
        self.names.push(name.to_string());
        self.name_to_id.insert(name.to_string(), id);
        id
    }

    /// Define a class, reusing its ID if it was declared
    ///
    /// Redefining a name replaces the earlier definition.
    pub fn define(&mut self, spec: ClassSpec) -> ClassId {
        let id = self.declare(&spec.name);
        let is_interface = spec.modifiers.contains(Modifiers::INTERFACE);
        let super_class = if spec.root || is_interface {
            None
        } else {
            Some(spec.super_class.unwrap_or(self.well_known.object))
        };

        let mut instance_field_kinds = super_class
            .and_then(|s| self.classes[s.index()].as_ref())
            .map(|s| s.instance_field_kinds.clone())
            .unwrap_or_default();
        let mut statics = Vec::new();

        let members = spec
            .members
            .into_iter()
            .map(|m| {
                let body = match m.body {
                    PendingBody::Native(f) => MemberBody::Native(f),
                    PendingBody::Abstract => MemberBody::Abstract,
                    PendingBody::Field if m.modifiers.contains(Modifiers::STATIC) => {
                        statics.push(Value::default_for(m.descriptor.return_kind()));
                        MemberBody::StaticField(statics.len() - 1)
                    }
                    PendingBody::Field => {
                        instance_field_kinds.push(m.descriptor.return_kind());
                        MemberBody::InstanceField(instance_field_kinds.len() - 1)
                    }
                };
                Member {
                    declaring: id,
                    name: m.name,
                    descriptor: m.descriptor,
                    modifiers: m.modifiers,
                    kind: m.kind,
                    body,
                }
            })
            .collect();

        let package = package_name(&spec.name);
        self.classes[id.index()] = Some(ClassDef {
            id,
            name: spec.name,
            package,
            loader: spec.loader,
            super_class,
            interfaces: spec.interfaces,
            modifiers: spec.modifiers,
            component: None,
            wrapper_of: spec.wrapper_of,
            members,
            instance_field_kinds,
            statics: Mutex::new(statics),
            initializer: spec.initializer,
        });
        id
    }

    /// Array class with the given element kind, created on first use
    pub fn array_of(&mut self, component: Kind) -> ClassId {
        if let Some(id) = self.arrays.get(&component) {
            return *id;
        }

        let (element_name, package, loader, visibility) = match component {
            Kind::Reference(elem) => match self.classes.get(elem.index()).and_then(Option::as_ref) {
                Some(def) => (
                    def.name.clone(),
                    def.package.clone(),
                    def.loader,
                    def.modifiers & (Modifiers::PUBLIC | Modifiers::PROTECTED | Modifiers::PRIVATE),
                ),
                None => (
                    self.names[elem.index()].clone(),
                    package_name(&self.names[elem.index()]),
                    LoaderId::APP,
                    Modifiers::PUBLIC,
                ),
            },
            Kind::Primitive(p) => (p.name().to_string(), String::new(), LoaderId::BOOT, Modifiers::PUBLIC),
            Kind::Void => ("void".to_string(), String::new(), LoaderId::BOOT, Modifiers::PUBLIC),
        };

        let name = format!("{}[]", element_name);
        let id = self.declare(&name);
        let interfaces = vec![self.well_known.cloneable, self.well_known.serializable];
        self.classes[id.index()] = Some(ClassDef {
            id,
            name,
            package,
            loader,
            super_class: Some(self.well_known.object),
            interfaces,
            modifiers: visibility | Modifiers::FINAL | Modifiers::ABSTRACT,
            component: Some(component),
            wrapper_of: None,
            members: Vec::new(),
            instance_field_kinds: Vec::new(),
            statics: Mutex::new(Vec::new()),
            initializer: None,
        });
        self.arrays.insert(component, id);
        id
    }

    /// Finish the registry
    ///
    /// Classes that were declared but never defined become empty public
    /// classes extending `Object`.
    pub fn build(self) -> ClassRegistry {
        let object = self.well_known.object;
        let classes = self
            .classes
            .into_iter()
            .zip(self.names)
            .enumerate()
            .map(|(index, (def, name))| {
                def.unwrap_or_else(|| ClassDef {
                    id: ClassId(index as u32),
                    package: package_name(&name),
                    name,
                    loader: LoaderId::APP,
                    super_class: Some(object),
                    interfaces: Vec::new(),
                    modifiers: Modifiers::PUBLIC,
                    component: None,
                    wrapper_of: None,
                    members: Vec::new(),
                    instance_field_kinds: Vec::new(),
                    statics: Mutex::new(Vec::new()),
                    initializer: None,
                })
            })
            .collect();

        ClassRegistry {
            classes,
            name_to_id: self.name_to_id,
            arrays: self.arrays,
            well_known: self.well_known,
            init: InitTable::new(),
        }
    }
}

impl Default for ClassRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn package_name(class_name: &str) -> String {
    class_name
        .trim_end_matches("[]")
        .rsplit_once('.')
        .map(|(package, _)| package.to_string())
        .unwrap_or_default()
}

fn unboxed_cast(receiver: &Value, to: Primitive) -> InvokeResult<Value> {
    receiver
        .unboxed()
        .and_then(|v| v.cast_primitive(to))
        .ok_or_else(|| InvokeError::NullPointer("receiver is not a boxed number".to_string()))
}
