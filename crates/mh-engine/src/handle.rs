//! Method handles
//!
//! A [`MethodHandle`] is an immutable, typed reference to a callable target.
//! Lookups produce direct handles; every adapter wraps an existing handle
//! in a new one with a transformed [`TypeDescriptor`]. Handles are cheap to
//! clone and safe to share between threads.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::access::DispatchMode;
use crate::class_graph::{ClassGraph, Member};
use crate::convert::{self, ConversionPlan, ConversionPolicy};
use crate::error::{InvokeError, InvokeResult};
use crate::runtime::Runtime;
use crate::types::{check_arg_slots, ClassId, Kind, TypeDescriptor};
use crate::value::Value;

/// Whether a handle collects trailing arguments when invoked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arity {
    /// Arguments must match the handle type exactly
    Fixed,
    /// Trailing arguments are collected into an array of this class by `invoke`
    VarargsOf(ClassId),
}

/// Resolved member plus how to call it
pub(crate) struct DirectTarget {
    pub(crate) member: Member,
    pub(crate) mode: DispatchMode,
    /// Set until the declaring class has been initialized through this handle
    pub(crate) requires_init: AtomicBool,
}

/// What a handle does when invoked
#[derive(Clone)]
pub(crate) enum HandleTarget {
    /// Call a class member
    Direct(Arc<DirectTarget>),
    /// Convert arguments and return value around another handle
    Convert {
        next: MethodHandle,
        plan: Arc<ConversionPlan>,
    },
    /// Supply a fixed leading receiver
    Bound { next: MethodHandle, receiver: Value },
    /// Supply constant arguments at a position
    Insert {
        next: MethodHandle,
        position: usize,
        values: Vec<Value>,
    },
    /// Pack `count` arguments into a new array
    Collect {
        next: MethodHandle,
        position: usize,
        count: usize,
        array: ClassId,
    },
    /// Unpack an array argument into `count` arguments
    Spread {
        next: MethodHandle,
        position: usize,
        count: usize,
    },
    /// Reorder, duplicate or drop arguments
    Permute {
        next: MethodHandle,
        reorder: Vec<usize>,
    },
}

struct HandleInner {
    ty: TypeDescriptor,
    arity: Arity,
    target: HandleTarget,
    runtime: Arc<Runtime>,
    /// Most recent `as_type` request and its plan
    as_type_cache: Mutex<Option<(TypeDescriptor, Arc<ConversionPlan>)>>,
}

/// Typed, adaptable reference to a callable target
#[derive(Clone)]
pub struct MethodHandle {
    inner: Arc<HandleInner>,
}

impl MethodHandle {
    pub(crate) fn new(
        runtime: Arc<Runtime>,
        ty: TypeDescriptor,
        arity: Arity,
        target: HandleTarget,
    ) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                ty,
                arity,
                target,
                runtime,
                as_type_cache: Mutex::new(None),
            }),
        }
    }

    /// Handle that calls a resolved member
    pub(crate) fn direct(
        runtime: Arc<Runtime>,
        member: Member,
        mode: DispatchMode,
        ty: TypeDescriptor,
    ) -> InvokeResult<Self> {
        check_arg_slots(&ty, mode == DispatchMode::Constructor)?;

        let graph = runtime.graph();
        let requires_init = mode.is_static_access() && !graph.is_initialized(member.declaring);
        let arity = match ty.last_parameter() {
            Some(Kind::Reference(array))
                if member.is_varargs() && graph.component_of(array).is_some() =>
            {
                Arity::VarargsOf(array)
            }
            _ => Arity::Fixed,
        };

        let target = HandleTarget::Direct(Arc::new(DirectTarget {
            member,
            mode,
            requires_init: AtomicBool::new(requires_init),
        }));
        Ok(Self::new(runtime, ty, arity, target))
    }

    /// The handle's type
    pub fn ty(&self) -> &TypeDescriptor {
        &self.inner.ty
    }

    /// Fixed or variable arity
    pub fn arity(&self) -> Arity {
        self.inner.arity
    }

    /// Check if `invoke` collects trailing arguments for this handle
    pub fn is_varargs_collector(&self) -> bool {
        matches!(self.inner.arity, Arity::VarargsOf(_))
    }

    /// Runtime the handle was created in
    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.inner.runtime
    }

    pub(crate) fn graph(&self) -> &dyn ClassGraph {
        self.inner.runtime.graph()
    }

    pub(crate) fn target(&self) -> &HandleTarget {
        &self.inner.target
    }

    /// Member called by a direct handle
    pub fn member(&self) -> Option<&Member> {
        match &self.inner.target {
            HandleTarget::Direct(direct) => Some(&direct.member),
            _ => None,
        }
    }

    /// How a direct handle calls its member
    pub fn dispatch_mode(&self) -> Option<DispatchMode> {
        match &self.inner.target {
            HandleTarget::Direct(direct) => Some(direct.mode),
            _ => None,
        }
    }

    /// Check if invoking this handle would first run a class initializer
    pub fn requires_init(&self) -> bool {
        match &self.inner.target {
            HandleTarget::Direct(direct) => direct.requires_init.load(Ordering::Acquire),
            HandleTarget::Convert { next, .. }
            | HandleTarget::Bound { next, .. }
            | HandleTarget::Insert { next, .. }
            | HandleTarget::Collect { next, .. }
            | HandleTarget::Spread { next, .. }
            | HandleTarget::Permute { next, .. } => next.requires_init(),
        }
    }

    /// Receiver fixed by [`MethodHandle::bind_to`]
    pub fn bound_receiver(&self) -> Option<&Value> {
        match &self.inner.target {
            HandleTarget::Bound { receiver, .. } => Some(receiver),
            _ => None,
        }
    }

    /// Same target and type with a different arity
    pub(crate) fn with_arity(&self, arity: Arity) -> MethodHandle {
        Self::new(
            Arc::clone(&self.inner.runtime),
            self.inner.ty.clone(),
            arity,
            self.inner.target.clone(),
        )
    }

    /// View this handle as `target` using implicit conversions
    ///
    /// Variable-arity handles collect trailing arguments as needed. Fails
    /// with `WrongMethodType` if no legal conversion exists.
    pub fn as_type(&self, target: &TypeDescriptor) -> InvokeResult<MethodHandle> {
        if self.ty() == target {
            return Ok(self.clone());
        }
        match self.inner.arity {
            Arity::VarargsOf(array) => self.as_varargs_type(target, array),
            Arity::Fixed => self.convert(target, ConversionPolicy::Implicit),
        }
    }

    /// View this handle as `target` using explicit (casting) conversions
    ///
    /// The result always has fixed arity.
    pub fn explicit_cast(&self, target: &TypeDescriptor) -> InvokeResult<MethodHandle> {
        if self.ty() == target {
            return Ok(self.clone());
        }
        self.convert(target, ConversionPolicy::Explicit)
    }

    /// Wrap this handle in a fixed-arity conversion to `target`
    pub(crate) fn convert(
        &self,
        target: &TypeDescriptor,
        policy: ConversionPolicy,
    ) -> InvokeResult<MethodHandle> {
        if self.ty() == target {
            return Ok(self.as_fixed_arity());
        }

        let cacheable =
            policy == ConversionPolicy::Implicit && self.inner.runtime.options().cache_as_type;
        if cacheable {
            if let Some((ty, plan)) = &*self.inner.as_type_cache.lock() {
                if ty == target {
                    return Ok(self.wrap_plan(target, Arc::clone(plan)));
                }
            }
        }

        let plan = Arc::new(convert::plan(self.graph(), self.ty(), target, policy)?);
        if cacheable {
            *self.inner.as_type_cache.lock() = Some((target.clone(), Arc::clone(&plan)));
        }
        Ok(self.wrap_plan(target, plan))
    }

    fn wrap_plan(&self, target: &TypeDescriptor, plan: Arc<ConversionPlan>) -> MethodHandle {
        Self::new(
            Arc::clone(&self.inner.runtime),
            target.clone(),
            Arity::Fixed,
            HandleTarget::Convert {
                next: self.clone(),
                plan,
            },
        )
    }

    /// Fix the leading reference argument to `receiver`
    ///
    /// The value must be null or an instance of the leading parameter type.
    /// Variable arity is kept while the trailing array parameter remains.
    pub fn bind_to(&self, receiver: Value) -> InvokeResult<MethodHandle> {
        let graph = self.graph();
        let class = match self.ty().parameter(0) {
            Some(Kind::Reference(class)) => class,
            Some(kind) => {
                return Err(InvokeError::IllegalArgument(format!(
                    "cannot bind a value to leading parameter of type {}",
                    kind.name(graph)
                )))
            }
            None => {
                return Err(InvokeError::IllegalArgument(format!(
                    "{} has no parameter to bind",
                    self.ty().display(graph)
                )))
            }
        };
        if !graph.is_instance(&receiver, class) {
            return Err(InvokeError::ClassCast {
                from: describe_value(graph, &receiver),
                to: graph.class_name(class),
            });
        }

        let ty = self.ty().drop_parameters(0, 1);
        let arity = match self.inner.arity {
            Arity::VarargsOf(array) if ty.parameter_count() > 0 => Arity::VarargsOf(array),
            _ => Arity::Fixed,
        };
        Ok(Self::new(
            Arc::clone(&self.inner.runtime),
            ty,
            arity,
            HandleTarget::Bound {
                next: self.clone(),
                receiver,
            },
        ))
    }

    /// Fix the arguments starting at `position` to `values`
    ///
    /// Each value is converted to its parameter kind as `as_type` would.
    pub fn insert_arguments(&self, position: usize, values: Vec<Value>) -> InvokeResult<MethodHandle> {
        let graph = self.graph();
        let count = self.ty().parameter_count();
        if position > count || values.len() > count - position {
            return Err(InvokeError::IllegalArgument(format!(
                "cannot insert {} arguments at {} into {}",
                values.len(),
                position,
                self.ty().display(graph)
            )));
        }

        let values = values
            .into_iter()
            .zip(&self.ty().params()[position..])
            .map(|(value, kind)| coerce_value(graph, value, *kind))
            .collect::<InvokeResult<Vec<_>>>()?;
        let ty = self.ty().drop_parameters(position, position + values.len());
        Ok(Self::new(
            Arc::clone(&self.inner.runtime),
            ty,
            Arity::Fixed,
            HandleTarget::Insert {
                next: self.clone(),
                position,
                values,
            },
        ))
    }
}

/// `handle.explicit_cast(ty)`
pub fn explicit_cast_arguments(handle: &MethodHandle, ty: &TypeDescriptor) -> InvokeResult<MethodHandle> {
    handle.explicit_cast(ty)
}

/// `handle.insert_arguments(position, values)`
pub fn insert_arguments(
    handle: &MethodHandle,
    position: usize,
    values: Vec<Value>,
) -> InvokeResult<MethodHandle> {
    handle.insert_arguments(position, values)
}

/// Convert a constant to a slot kind with implicit rules
pub(crate) fn coerce_value(graph: &dyn ClassGraph, value: Value, kind: Kind) -> InvokeResult<Value> {
    if graph.conforms(&value, kind) {
        return Ok(value);
    }
    let from = match &value {
        Value::Ref(obj) => Kind::Reference(obj.class()),
        Value::Null => graph.well_known().object_kind(),
        other => match other.primitive_kind() {
            Some(p) => Kind::Primitive(p),
            None => {
                return Err(InvokeError::IllegalArgument(format!(
                    "void cannot be passed as {}",
                    kind.name(graph)
                )))
            }
        },
    };
    match convert::slot_conversion(graph, from, kind, ConversionPolicy::Implicit) {
        Some(conversion) => conversion.apply(graph, value),
        None => Err(InvokeError::ClassCast {
            from: from.name(graph),
            to: kind.name(graph),
        }),
    }
}

pub(crate) fn describe_value(graph: &dyn ClassGraph, value: &Value) -> String {
    match value {
        Value::Ref(obj) => graph.class_name(obj.class()),
        Value::Null => "null".to_string(),
        Value::Void => "void".to_string(),
        other => other
            .primitive_kind()
            .map(|p| p.name().to_string())
            .unwrap_or_default(),
    }
}

impl fmt::Debug for MethodHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.inner.target {
            HandleTarget::Direct(direct) => format!("{:?} {}", direct.mode, direct.member.name),
            HandleTarget::Convert { .. } => "Convert".to_string(),
            HandleTarget::Bound { .. } => "Bound".to_string(),
            HandleTarget::Insert { .. } => "Insert".to_string(),
            HandleTarget::Collect { .. } => "Collect".to_string(),
            HandleTarget::Spread { .. } => "Spread".to_string(),
            HandleTarget::Permute { .. } => "Permute".to_string(),
        };
        f.debug_struct("MethodHandle")
            .field("type", &self.ty().display(self.graph()))
            .field("arity", &self.inner.arity)
            .field("target", &kind)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class_graph::Modifiers;
    use crate::class_registry::{ClassRegistryBuilder, ClassSpec};
    use crate::config::RuntimeOptions;

    struct Fixture {
        runtime: Arc<Runtime>,
        text: ClassId,
        string: ClassId,
        object: ClassId,
    }

    fn fixture(options: RuntimeOptions) -> Fixture {
        let mut builder = ClassRegistryBuilder::new();
        let wk = builder.well_known().clone();
        let string = wk.string;
        let text = builder.define(
            ClassSpec::new("a.Text")
                .method(
                    "repeat",
                    Modifiers::PUBLIC | Modifiers::STATIC,
                    TypeDescriptor::new(Kind::Reference(string), [Kind::Reference(string), Kind::INT]),
                    move |args| {
                        let s = args[0].as_str().unwrap_or_default().repeat(args[1].as_int().unwrap_or(0) as usize);
                        Ok(Value::string(&wk, s))
                    },
                ),
        );
        let registry = Arc::new(builder.build());
        let object = registry.well_known().object;
        Fixture {
            runtime: Runtime::with_options(registry, options),
            text,
            string,
            object,
        }
    }

    fn repeat(fx: &Fixture) -> MethodHandle {
        let ty = TypeDescriptor::new(
            Kind::Reference(fx.string),
            [Kind::Reference(fx.string), Kind::INT],
        );
        fx.runtime.lookup(fx.text).find_static(fx.text, "repeat", &ty).unwrap()
    }

    fn string(fx: &Fixture, s: &str) -> Value {
        Value::string(fx.runtime.graph().well_known(), s)
    }

    #[test]
    fn test_bind_to_checks_receiver() {
        let fx = fixture(RuntimeOptions::default());
        let bound = repeat(&fx).bind_to(string(&fx, "ab")).unwrap();
        assert_eq!(bound.ty().params(), &[Kind::INT]);
        assert!(bound.bound_receiver().is_some());

        let site = bound.ty().clone();
        let out = bound.invoke_exact(&site, vec![Value::Int(3)]).unwrap();
        assert_eq!(out.as_str(), Some("ababab"));

        let err = repeat(&fx).bind_to(Value::Int(1)).unwrap_err();
        assert!(matches!(err, InvokeError::ClassCast { .. }));

        let err = bound.bind_to(Value::Int(1)).unwrap_err();
        assert!(matches!(err, InvokeError::IllegalArgument(_)));
    }

    #[test]
    fn test_insert_arguments_converts_values() {
        let fx = fixture(RuntimeOptions::default());
        let thrice = repeat(&fx).insert_arguments(1, vec![Value::Short(3)]).unwrap();
        assert_eq!(thrice.ty().params(), &[Kind::Reference(fx.string)]);

        let site = thrice.ty().clone();
        let out = thrice.invoke_exact(&site, vec![string(&fx, "x")]).unwrap();
        assert_eq!(out.as_str(), Some("xxx"));

        assert!(matches!(
            repeat(&fx).insert_arguments(1, vec![Value::Long(3)]),
            Err(InvokeError::ClassCast { .. })
        ));
        assert!(matches!(
            repeat(&fx).insert_arguments(1, vec![Value::Null]),
            Err(InvokeError::NullPointer(_))
        ));
        assert!(matches!(
            repeat(&fx).insert_arguments(2, vec![Value::Int(1)]),
            Err(InvokeError::IllegalArgument(_))
        ));
    }

    #[test]
    fn test_as_type_identity_and_cache() {
        let fx = fixture(RuntimeOptions::default());
        let handle = repeat(&fx);
        assert!(Arc::ptr_eq(&handle.as_type(handle.ty()).unwrap().inner, &handle.inner));

        let object = Kind::Reference(fx.object);
        let generic = TypeDescriptor::new(object, [object, object]);
        let first = handle.as_type(&generic).unwrap();
        let second = handle.as_type(&generic).unwrap();
        let plan_of = |h: &MethodHandle| match h.target() {
            HandleTarget::Convert { plan, .. } => Arc::clone(plan),
            _ => panic!("expected a conversion"),
        };
        assert!(Arc::ptr_eq(&plan_of(&first), &plan_of(&second)));

        let wk = fx.runtime.graph().well_known().clone();
        let out = first
            .invoke_exact(&generic, vec![string(&fx, "go"), Value::Int(2).boxed(&wk)])
            .unwrap();
        assert_eq!(out.as_str(), Some("gogo"));
    }

    #[test]
    fn test_as_type_cache_disabled() {
        let options = RuntimeOptions {
            cache_as_type: false,
            ..RuntimeOptions::default()
        };
        let fx = fixture(options);
        let handle = repeat(&fx);
        let ty = handle.ty().change_parameter(1, Kind::SHORT);
        let first = handle.as_type(&ty).unwrap();
        let second = handle.as_type(&ty).unwrap();
        match (first.target(), second.target()) {
            (HandleTarget::Convert { plan: a, .. }, HandleTarget::Convert { plan: b, .. }) => {
                assert!(!Arc::ptr_eq(a, b));
                assert_eq!(a, b);
            }
            _ => panic!("expected conversions"),
        }
    }

    #[test]
    fn test_explicit_cast_narrows() {
        let fx = fixture(RuntimeOptions::default());
        let ty = handle_ty_with_long(&fx);
        assert!(matches!(repeat(&fx).as_type(&ty), Err(InvokeError::WrongMethodType { .. })));

        let cast = explicit_cast_arguments(&repeat(&fx), &ty).unwrap();
        let out = cast.invoke_exact(&ty, vec![string(&fx, "z"), Value::Long(2)]).unwrap();
        assert_eq!(out.as_str(), Some("zz"));
    }

    fn handle_ty_with_long(fx: &Fixture) -> TypeDescriptor {
        TypeDescriptor::new(
            Kind::Reference(fx.string),
            [Kind::Reference(fx.string), Kind::LONG],
        )
    }
}
