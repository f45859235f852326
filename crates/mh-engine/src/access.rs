//! Lookup and access control
//!
//! A [`Lookup`] resolves members on behalf of a caller class. Resolution
//! checks, in order: the member name, the caller's access to the referenced
//! class, existence of the member, static/instance agreement, and the
//! member's own access modifiers against the lookup's [`LookupModes`].
//! Resolution never runs class initializers; handles that need one defer
//! it to their first invocation.

use std::sync::Arc;

use bitflags::bitflags;
use tracing::debug;

use crate::class_graph::{ClassGraph, Member, MemberKind, Modifiers};
use crate::error::{InvokeError, InvokeResult};
use crate::handle::MethodHandle;
use crate::runtime::Runtime;
use crate::types::{ClassId, Kind, TypeDescriptor};
use crate::value::Value;

bitflags! {
    /// Access rights a lookup holds on behalf of its caller
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct LookupModes: u8 {
        /// Public members of public classes
        const PUBLIC = 0x1;
        /// Private members of the caller class
        const PRIVATE = 0x2;
        /// Protected members of superclasses
        const PROTECTED = 0x4;
        /// Package-private members of the caller's package
        const PACKAGE = 0x8;
    }
}

/// How a direct handle reaches its member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DispatchMode {
    /// Override selected by the receiver's runtime class
    Virtual,
    /// Static method
    Static,
    /// Exact implementation, no override selection
    Special,
    /// Allocate and construct
    Constructor,
    /// Read an instance field
    Getter,
    /// Write an instance field
    Setter,
    /// Read a static field
    StaticGetter,
    /// Write a static field
    StaticSetter,
}

impl DispatchMode {
    /// Check if the mode touches class-level state and so needs an initialized class
    pub fn is_static_access(self) -> bool {
        matches!(
            self,
            DispatchMode::Static
                | DispatchMode::Constructor
                | DispatchMode::StaticGetter
                | DispatchMode::StaticSetter
        )
    }

    fn member_kind(self) -> MemberKind {
        match self {
            DispatchMode::Virtual | DispatchMode::Static | DispatchMode::Special => {
                MemberKind::Method
            }
            DispatchMode::Constructor => MemberKind::Constructor,
            DispatchMode::Getter
            | DispatchMode::Setter
            | DispatchMode::StaticGetter
            | DispatchMode::StaticSetter => MemberKind::Field,
        }
    }

    fn wants_static(self) -> bool {
        matches!(
            self,
            DispatchMode::Static | DispatchMode::StaticGetter | DispatchMode::StaticSetter
        )
    }
}

/// Member resolver acting on behalf of a caller class
#[derive(Clone)]
pub struct Lookup {
    runtime: Arc<Runtime>,
    caller: ClassId,
    modes: LookupModes,
}

impl Lookup {
    pub(crate) fn new(runtime: Arc<Runtime>, caller: ClassId, modes: LookupModes) -> Self {
        Self {
            runtime,
            caller,
            modes,
        }
    }

    /// Class the lookup acts for
    pub fn lookup_class(&self) -> ClassId {
        self.caller
    }

    /// Access rights held
    pub fn lookup_modes(&self) -> LookupModes {
        self.modes
    }

    /// Runtime the lookup resolves in
    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    fn graph(&self) -> &dyn ClassGraph {
        self.runtime.graph()
    }

    /// Same caller restricted to public access
    pub fn weaken_to_public(&self) -> Lookup {
        Lookup::new(
            Arc::clone(&self.runtime),
            self.caller,
            self.modes & LookupModes::PUBLIC,
        )
    }

    /// Lookup for another caller class, keeping only the rights that still apply
    pub fn in_class(&self, target: ClassId) -> Lookup {
        if target == self.caller {
            return self.clone();
        }
        let graph = self.graph();
        let mut modes = self.modes - LookupModes::PROTECTED - LookupModes::PRIVATE;
        if !graph.is_same_package(self.caller, target) {
            modes -= LookupModes::PACKAGE;
        }

        let target_modifiers = graph
            .class(target)
            .map(|c| c.modifiers)
            .unwrap_or_default();
        if !target_modifiers.intersects(Modifiers::PUBLIC | Modifiers::PROTECTED) {
            // A package-private class is only reachable from its own package
            if !modes.contains(LookupModes::PACKAGE) {
                modes = LookupModes::empty();
            }
        } else if graph.class(target).map(|c| c.loader) != graph.class(self.caller).map(|c| c.loader)
        {
            modes -= LookupModes::PACKAGE;
        }

        debug!(
            from = %graph.class_name(self.caller),
            to = %graph.class_name(target),
            ?modes,
            "moved lookup"
        );
        Lookup::new(Arc::clone(&self.runtime), target, modes)
    }

    /// Lookup without the given right
    ///
    /// Dropping `PROTECTED` always happens. Dropping `PACKAGE` also drops
    /// `PRIVATE`; dropping `PUBLIC` drops everything.
    pub fn drop_lookup_mode(&self, mode: LookupModes) -> InvokeResult<Lookup> {
        let known = [
            LookupModes::PUBLIC,
            LookupModes::PRIVATE,
            LookupModes::PROTECTED,
            LookupModes::PACKAGE,
        ];
        if !known.contains(&mode) {
            return Err(InvokeError::IllegalArgument(format!(
                "{:?} is not a single lookup mode",
                mode
            )));
        }

        let mut modes = self.modes - LookupModes::PROTECTED;
        if mode == LookupModes::PRIVATE {
            modes -= LookupModes::PRIVATE;
        } else if mode == LookupModes::PACKAGE {
            modes -= LookupModes::PACKAGE | LookupModes::PRIVATE;
        } else if mode == LookupModes::PUBLIC {
            modes = LookupModes::empty();
        }
        Ok(Lookup::new(Arc::clone(&self.runtime), self.caller, modes))
    }

    /// Handle that calls the instance method `name` with override selection
    ///
    /// The handle type is the method type with a leading `refc` receiver.
    /// Private methods are called directly.
    pub fn find_virtual(
        &self,
        refc: ClassId,
        name: &str,
        ty: &TypeDescriptor,
    ) -> InvokeResult<MethodHandle> {
        self.traced(refc, name, DispatchMode::Virtual, || {
            self.resolve_method(refc, name, ty, DispatchMode::Virtual)
        })
    }

    /// Handle that calls the static method `name`
    pub fn find_static(
        &self,
        refc: ClassId,
        name: &str,
        ty: &TypeDescriptor,
    ) -> InvokeResult<MethodHandle> {
        self.traced(refc, name, DispatchMode::Static, || {
            self.resolve_method(refc, name, ty, DispatchMode::Static)
        })
    }

    /// Handle that calls the implementation found from `refc`, bypassing overrides
    ///
    /// `special_caller` must be the lookup class and the lookup must keep
    /// private access. The method must be declared by the caller or one of
    /// its supertypes; the receiver is typed as the caller.
    pub fn find_special(
        &self,
        refc: ClassId,
        name: &str,
        ty: &TypeDescriptor,
        special_caller: ClassId,
    ) -> InvokeResult<MethodHandle> {
        self.traced(refc, name, DispatchMode::Special, || {
            if special_caller != self.caller || !self.modes.contains(LookupModes::PRIVATE) {
                return Err(InvokeError::IllegalAccess(format!(
                    "no private access for invokespecial from {}",
                    self.graph().class_name(special_caller)
                )));
            }
            self.resolve_method(refc, name, ty, DispatchMode::Special)
        })
    }

    /// Handle that allocates `refc` and runs the matching constructor
    ///
    /// `ty` lists the constructor parameters and must return void; the
    /// handle returns the new instance.
    pub fn find_constructor(&self, refc: ClassId, ty: &TypeDescriptor) -> InvokeResult<MethodHandle> {
        self.traced(refc, "<init>", DispatchMode::Constructor, || {
            if ty.return_kind() != Kind::Void {
                return Err(self.no_such_member(refc, "<init>", ty));
            }
            let member = self.resolve(refc, "<init>", ty, DispatchMode::Constructor)?;
            let handle_ty = ty.change_return(Kind::Reference(refc));
            MethodHandle::direct(
                Arc::clone(&self.runtime),
                member,
                DispatchMode::Constructor,
                handle_ty,
            )
        })
    }

    /// Handle of type `(refc)kind` that reads an instance field
    pub fn find_getter(&self, refc: ClassId, name: &str, kind: Kind) -> InvokeResult<MethodHandle> {
        self.find_field(refc, name, kind, DispatchMode::Getter)
    }

    /// Handle of type `(refc, kind)void` that writes an instance field
    pub fn find_setter(&self, refc: ClassId, name: &str, kind: Kind) -> InvokeResult<MethodHandle> {
        self.find_field(refc, name, kind, DispatchMode::Setter)
    }

    /// Handle of type `()kind` that reads a static field
    pub fn find_static_getter(
        &self,
        refc: ClassId,
        name: &str,
        kind: Kind,
    ) -> InvokeResult<MethodHandle> {
        self.find_field(refc, name, kind, DispatchMode::StaticGetter)
    }

    /// Handle of type `(kind)void` that writes a static field
    pub fn find_static_setter(
        &self,
        refc: ClassId,
        name: &str,
        kind: Kind,
    ) -> InvokeResult<MethodHandle> {
        self.find_field(refc, name, kind, DispatchMode::StaticSetter)
    }

    /// `find_virtual` on the receiver's class, bound to the receiver
    pub fn bind(&self, receiver: Value, name: &str, ty: &TypeDescriptor) -> InvokeResult<MethodHandle> {
        let refc = match &receiver {
            Value::Ref(obj) => obj.class(),
            Value::Null => {
                return Err(InvokeError::NullPointer(format!(
                    "cannot bind {} to a null receiver",
                    name
                )))
            }
            _ => {
                return Err(InvokeError::IllegalArgument(format!(
                    "cannot bind {} to a primitive receiver",
                    name
                )))
            }
        };
        self.find_virtual(refc, name, ty)?.bind_to(receiver)
    }

    fn traced<F>(&self, refc: ClassId, name: &str, mode: DispatchMode, f: F) -> InvokeResult<MethodHandle>
    where
        F: FnOnce() -> InvokeResult<MethodHandle>,
    {
        let result = f();
        let graph = self.graph();
        match &result {
            Ok(handle) => debug!(
                caller = %graph.class_name(self.caller),
                refc = %graph.class_name(refc),
                name,
                ?mode,
                ty = %handle.ty().display(graph),
                "resolved method handle"
            ),
            Err(err) => debug!(
                caller = %graph.class_name(self.caller),
                refc = %graph.class_name(refc),
                name,
                ?mode,
                error = %err,
                "lookup failed"
            ),
        }
        result
    }

    fn resolve_method(
        &self,
        refc: ClassId,
        name: &str,
        ty: &TypeDescriptor,
        mode: DispatchMode,
    ) -> InvokeResult<MethodHandle> {
        let graph = self.graph();
        let member = self.resolve(refc, name, ty, mode)?;

        let (handle_ty, mode) = match mode {
            DispatchMode::Static => (ty.clone(), mode),
            DispatchMode::Special => {
                if !graph.is_subtype_of(self.caller, member.declaring) {
                    return Err(InvokeError::IllegalAccess(format!(
                        "{} is not a supertype of {}",
                        graph.class_name(member.declaring),
                        graph.class_name(self.caller)
                    )));
                }
                (
                    ty.insert_parameters(0, &[Kind::Reference(self.caller)]),
                    mode,
                )
            }
            _ => {
                let receiver = Kind::Reference(refc);
                let mode = if member.modifiers.contains(Modifiers::PRIVATE) {
                    DispatchMode::Special
                } else {
                    mode
                };
                (ty.insert_parameters(0, &[receiver]), mode)
            }
        };
        MethodHandle::direct(Arc::clone(&self.runtime), member, mode, handle_ty)
    }

    fn find_field(
        &self,
        refc: ClassId,
        name: &str,
        kind: Kind,
        mode: DispatchMode,
    ) -> InvokeResult<MethodHandle> {
        self.traced(refc, name, mode, || {
            let field_ty = TypeDescriptor::new(kind, Vec::new());
            if kind == Kind::Void {
                return Err(self.no_such_member(refc, name, &field_ty));
            }
            let member = self.resolve(refc, name, &field_ty, mode)?;

            let handle_ty = match mode {
                DispatchMode::Getter => {
                    TypeDescriptor::new(kind, [Kind::Reference(refc)])
                }
                DispatchMode::Setter => {
                    TypeDescriptor::new(Kind::Void, [Kind::Reference(refc), kind])
                }
                DispatchMode::StaticGetter => field_ty,
                _ => TypeDescriptor::new(Kind::Void, [kind]),
            };
            MethodHandle::direct(Arc::clone(&self.runtime), member, mode, handle_ty)
        })
    }

    /// Resolve a member and check that the caller may use it in `mode`
    fn resolve(
        &self,
        refc: ClassId,
        name: &str,
        ty: &TypeDescriptor,
        mode: DispatchMode,
    ) -> InvokeResult<Member> {
        let graph = self.graph();
        let kind = mode.member_kind();

        if kind != MemberKind::Constructor && (name == "<init>" || name == "<clinit>") {
            return Err(InvokeError::NoSuchMember(format!(
                "{} is not a resolvable member name",
                name
            )));
        }
        if kind == MemberKind::Method
            && (name == "invoke" || name == "invokeExact")
            && graph.is_subtype_of(refc, graph.well_known().method_handle)
        {
            return Err(InvokeError::Unsupported(format!(
                "cannot resolve signature-polymorphic method {}",
                name
            )));
        }

        self.check_class_access(refc)?;

        let member = graph
            .find_member(refc, name, kind, ty)
            .cloned()
            .ok_or_else(|| self.no_such_member(refc, name, ty))?;

        if kind != MemberKind::Constructor && member.is_static() != mode.wants_static() {
            return Err(InvokeError::IllegalAccess(format!(
                "{}.{} is {}static",
                graph.class_name(member.declaring),
                name,
                if member.is_static() { "" } else { "not " }
            )));
        }
        if matches!(mode, DispatchMode::Setter | DispatchMode::StaticSetter) && member.is_final() {
            return Err(InvokeError::IllegalAccess(format!(
                "{}.{} is final",
                graph.class_name(member.declaring),
                name
            )));
        }

        self.check_member_access(refc, &member, mode)?;
        Ok(member)
    }

    /// Whether the caller may see `target` at all
    fn check_class_access(&self, target: ClassId) -> InvokeResult<()> {
        let graph = self.graph();
        if self.modes.is_empty() {
            return Err(self.denied(target, None));
        }
        let modifiers = graph.class(target).map(|c| c.modifiers).unwrap_or_default();
        if modifiers.contains(Modifiers::PUBLIC)
            || target == self.caller
            || (graph.is_same_package(self.caller, target)
                && self.modes.contains(LookupModes::PACKAGE))
        {
            return Ok(());
        }
        Err(self.denied(target, None))
    }

    fn check_member_access(&self, refc: ClassId, member: &Member, mode: DispatchMode) -> InvokeResult<()> {
        let graph = self.graph();
        let modifiers = graph.modifiers_of(member);
        let declaring = member.declaring;

        let allowed = if modifiers.contains(Modifiers::PUBLIC) {
            true
        } else if modifiers.contains(Modifiers::PRIVATE) {
            self.modes.contains(LookupModes::PRIVATE) && declaring == self.caller
        } else if modifiers.contains(Modifiers::PROTECTED) {
            self.protected_allowed(refc, member, mode)
        } else {
            self.modes.contains(LookupModes::PACKAGE) && graph.is_same_package(self.caller, declaring)
        };

        if allowed {
            Ok(())
        } else {
            Err(self.denied(declaring, Some(&member.name)))
        }
    }

    fn protected_allowed(&self, refc: ClassId, member: &Member, mode: DispatchMode) -> bool {
        let graph = self.graph();
        let declaring = member.declaring;
        if self.modes == LookupModes::PUBLIC {
            return false;
        }
        if graph.class(declaring).is_some_and(|c| c.is_array()) {
            return true;
        }
        if graph.is_same_package(self.caller, declaring) {
            return self.modes.contains(LookupModes::PACKAGE);
        }
        if !self.modes.contains(LookupModes::PROTECTED)
            || graph.is_interface(self.caller)
            || !graph.is_subtype_of(self.caller, declaring)
        {
            return false;
        }
        match mode {
            // The constructed class must be the caller or one of its subclasses
            DispatchMode::Constructor => graph.is_subtype_of(refc, self.caller),
            DispatchMode::Static | DispatchMode::StaticGetter | DispatchMode::StaticSetter => true,
            DispatchMode::Special => true,
            // Instance access only through a receiver typed as the caller or below;
            // the handle's receiver parameter is `refc`
            DispatchMode::Virtual | DispatchMode::Getter | DispatchMode::Setter => {
                graph.is_subtype_of(refc, self.caller)
            }
        }
    }

    fn no_such_member(&self, refc: ClassId, name: &str, ty: &TypeDescriptor) -> InvokeError {
        let graph = self.graph();
        InvokeError::NoSuchMember(format!(
            "{}.{}{}",
            graph.class_name(refc),
            name,
            ty.display(graph)
        ))
    }

    fn denied(&self, class: ClassId, member: Option<&str>) -> InvokeError {
        let graph = self.graph();
        let target = match member {
            Some(name) => format!("{}.{}", graph.class_name(class), name),
            None => graph.class_name(class),
        };
        InvokeError::IllegalAccess(format!(
            "{} ({:?}) cannot access {}",
            graph.class_name(self.caller),
            self.modes,
            target
        ))
    }
}

impl std::fmt::Debug for Lookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lookup")
            .field("caller", &self.graph().class_name(self.caller))
            .field("modes", &self.modes)
            .finish()
    }
}
