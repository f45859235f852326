//! Handle invocation
//!
//! `invoke_exact` requires the call-site type to equal the handle type.
//! `invoke` first adapts the handle with `as_type`. Either way, execution
//! walks the adapter chain down to a direct target, which runs any pending
//! class initializer before calling its member.

use std::sync::atomic::Ordering;

use tracing::trace;

use crate::access::DispatchMode;
use crate::arity::spread_elements;
use crate::class_graph::{ClassGraph, Member, MemberBody};
use crate::error::{InvokeError, InvokeResult};
use crate::handle::{describe_value, DirectTarget, HandleTarget, MethodHandle};
use crate::types::{Kind, TypeDescriptor};
use crate::value::{ObjectRef, Value};

impl MethodHandle {
    /// Invoke with a call site whose type must equal the handle type
    ///
    /// Fails with `WrongMethodType` on any type or argument-count mismatch,
    /// including values that do not fit the declared call-site kinds.
    pub fn invoke_exact(&self, site: &TypeDescriptor, args: Vec<Value>) -> InvokeResult<Value> {
        let graph = self.graph();
        if self.ty() != site {
            return Err(InvokeError::WrongMethodType {
                expected: self.ty().display(graph),
                actual: site.display(graph),
            });
        }
        if args.len() != site.parameter_count() {
            return Err(InvokeError::WrongMethodType {
                expected: site.display(graph),
                actual: format!("{} arguments", args.len()),
            });
        }
        if let Some((arg, kind)) = args
            .iter()
            .zip(site.params())
            .find(|(arg, kind)| !graph.conforms(arg, **kind))
        {
            return Err(InvokeError::WrongMethodType {
                expected: kind.name(graph),
                actual: describe_value(graph, arg),
            });
        }
        self.invoke_unchecked(args)
    }

    /// Invoke with a call site of any compatible type
    pub fn invoke(&self, site: &TypeDescriptor, args: Vec<Value>) -> InvokeResult<Value> {
        self.as_type(site)?.invoke_exact(site, args)
    }

    /// Invoke with boxed arguments through the generic `(Object...)Object` type
    ///
    /// Void-returning handles are called with a void call-site return.
    pub fn invoke_with_arguments(&self, args: Vec<Value>) -> InvokeResult<Value> {
        let wk = self.graph().well_known();
        let mut site = TypeDescriptor::generic(args.len(), wk.object);
        if self.ty().return_kind() == Kind::Void {
            site = site.change_return(Kind::Void);
        }
        let args = args.into_iter().map(|arg| arg.boxed(wk)).collect();
        self.invoke(&site, args)
    }

    /// Run the adapter chain; argument types were checked by the caller
    pub(crate) fn invoke_unchecked(&self, mut args: Vec<Value>) -> InvokeResult<Value> {
        let runtime = self.runtime();
        let graph = runtime.graph();

        match self.target() {
            HandleTarget::Direct(direct) => direct.dispatch(graph, args),
            HandleTarget::Convert { next, plan } => {
                let trace_slots = runtime.options().trace_conversions;
                let args = plan.convert_arguments(graph, args, trace_slots)?;
                let result = next.invoke_unchecked(args)?;
                plan.convert_return(graph, result, trace_slots)
            }
            HandleTarget::Bound { next, receiver } => {
                args.insert(0, receiver.clone());
                next.invoke_unchecked(args)
            }
            HandleTarget::Insert {
                next,
                position,
                values,
            } => {
                args.splice(*position..*position, values.iter().cloned());
                next.invoke_unchecked(args)
            }
            HandleTarget::Collect {
                next,
                position,
                count,
                array,
            } => {
                let mut rest = args.split_off(*position).into_iter();
                let collected: Vec<Value> = rest.by_ref().take(*count).collect();
                args.push(Value::new_array(*array, collected));
                args.extend(rest);
                next.invoke_unchecked(args)
            }
            HandleTarget::Spread {
                next,
                position,
                count,
            } => {
                let array = args.remove(*position);
                let elements = spread_elements(graph, &array, *count)?;
                args.splice(*position..*position, elements);
                next.invoke_unchecked(args)
            }
            HandleTarget::Permute { next, reorder } => {
                let permuted = reorder.iter().map(|&i| args[i].clone()).collect();
                next.invoke_unchecked(permuted)
            }
        }
    }
}

impl DirectTarget {
    fn dispatch(&self, graph: &dyn ClassGraph, args: Vec<Value>) -> InvokeResult<Value> {
        if self.requires_init.load(Ordering::Acquire) {
            graph.run_initializer_once(self.member.declaring)?;
            // A call made by the running initializer itself returns early
            if graph.is_initialized(self.member.declaring) {
                self.requires_init.store(false, Ordering::Release);
            }
        }

        let member = &self.member;
        trace!(member = %member.name, mode = ?self.mode, "dispatching");
        match self.mode {
            DispatchMode::Static => call_body(graph, member, &args),
            DispatchMode::Special => {
                receiver(member, &args)?;
                call_body(graph, member, &args)
            }
            DispatchMode::Virtual => {
                let obj = receiver(member, &args)?;
                let target = graph.find_override(obj.class(), member).unwrap_or(member);
                call_body(graph, target, &args)
            }
            DispatchMode::Constructor => {
                let obj = graph.allocate(member.declaring)?;
                let mut full = Vec::with_capacity(args.len() + 1);
                full.push(Value::Ref(obj.clone()));
                full.extend(args);
                call_body(graph, member, &full)?;
                Ok(Value::Ref(obj))
            }
            DispatchMode::Getter => {
                let obj = receiver(member, &args)?;
                let slot = instance_slot(member)?;
                obj.get_field(slot).ok_or_else(|| missing_slot(graph, member))
            }
            DispatchMode::Setter => {
                let obj = receiver(member, &args)?;
                let slot = instance_slot(member)?;
                let value = args.get(1).cloned().unwrap_or(Value::Null);
                if obj.set_field(slot, value) {
                    Ok(Value::Void)
                } else {
                    Err(missing_slot(graph, member))
                }
            }
            DispatchMode::StaticGetter => {
                let (class, slot) = static_slot(graph, member)?;
                class
                    .get_static(slot)
                    .ok_or_else(|| missing_slot(graph, member))
            }
            DispatchMode::StaticSetter => {
                let (class, slot) = static_slot(graph, member)?;
                let value = args.into_iter().next().unwrap_or(Value::Null);
                if class.set_static(slot, value) {
                    Ok(Value::Void)
                } else {
                    Err(missing_slot(graph, member))
                }
            }
        }
    }
}

fn call_body(graph: &dyn ClassGraph, member: &Member, args: &[Value]) -> InvokeResult<Value> {
    match &member.body {
        MemberBody::Native(body) => body(args),
        MemberBody::Abstract => Err(InvokeError::Thrown(format!(
            "AbstractMethodError: {}.{}",
            graph.class_name(member.declaring),
            member.name
        ))),
        MemberBody::InstanceField(_) | MemberBody::StaticField(_) => Err(
            InvokeError::IllegalArgument(format!("{} is a field, not a method", member.name)),
        ),
    }
}

fn receiver<'a>(member: &Member, args: &'a [Value]) -> InvokeResult<&'a ObjectRef> {
    match args.first() {
        Some(Value::Ref(obj)) => Ok(obj),
        Some(Value::Null) => Err(InvokeError::NullPointer(format!(
            "null receiver for {}",
            member.name
        ))),
        _ => Err(InvokeError::IllegalArgument(format!(
            "missing receiver for {}",
            member.name
        ))),
    }
}

fn instance_slot(member: &Member) -> InvokeResult<usize> {
    match member.body {
        MemberBody::InstanceField(slot) => Ok(slot),
        _ => Err(InvokeError::IllegalArgument(format!(
            "{} is not an instance field",
            member.name
        ))),
    }
}

fn static_slot<'g>(
    graph: &'g dyn ClassGraph,
    member: &Member,
) -> InvokeResult<(&'g crate::class_graph::ClassDef, usize)> {
    let slot = match member.body {
        MemberBody::StaticField(slot) => slot,
        _ => {
            return Err(InvokeError::IllegalArgument(format!(
                "{} is not a static field",
                member.name
            )))
        }
    };
    let class = graph
        .class(member.declaring)
        .ok_or_else(|| missing_slot(graph, member))?;
    Ok((class, slot))
}

fn missing_slot(graph: &dyn ClassGraph, member: &Member) -> InvokeError {
    InvokeError::NoSuchMember(format!(
        "{}.{} has no storage",
        graph.class_name(member.declaring),
        member.name
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::class_graph::Modifiers;
    use crate::class_registry::{ClassRegistryBuilder, ClassSpec};
    use crate::runtime::Runtime;
    use crate::types::ClassId;

    struct Fixture {
        runtime: Arc<Runtime>,
        shape: ClassId,
        square: ClassId,
        counter: ClassId,
        inits: Arc<AtomicUsize>,
    }

    fn fixture() -> Fixture {
        let mut builder = ClassRegistryBuilder::new();
        let area_ty = TypeDescriptor::new(Kind::DOUBLE, Vec::new());
        let shape = builder.define(
            ClassSpec::new("geo.Shape")
                .modifiers(Modifiers::PUBLIC | Modifiers::ABSTRACT)
                .abstract_method("area", Modifiers::PUBLIC, area_ty.clone())
                .method(
                    "name",
                    Modifiers::PUBLIC,
                    TypeDescriptor::new(Kind::INT, Vec::new()),
                    |_| Ok(Value::Int(0)),
                ),
        );
        let square = builder.define(
            ClassSpec::new("geo.Square")
                .extends(shape)
                .field("side", Modifiers::PUBLIC, Kind::DOUBLE)
                .constructor(Modifiers::PUBLIC, vec![Kind::DOUBLE], |args| {
                    if let Value::Ref(obj) = &args[0] {
                        obj.set_field(0, args[1].clone());
                    }
                    Ok(Value::Void)
                })
                .method("area", Modifiers::PUBLIC, area_ty, |args| {
                    let side = args[0].as_object().and_then(|o| o.get_field(0));
                    let side = side.and_then(|v| v.as_double()).unwrap_or_default();
                    Ok(Value::Double(side * side))
                })
                .method(
                    "name",
                    Modifiers::PUBLIC,
                    TypeDescriptor::new(Kind::INT, Vec::new()),
                    |_| Ok(Value::Int(4)),
                ),
        );

        let inits = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&inits);
        let counter = builder.define(
            ClassSpec::new("geo.Counter")
                .field("count", Modifiers::PUBLIC | Modifiers::STATIC, Kind::INT)
                .initializer(move |class| {
                    seen.fetch_add(1, Ordering::SeqCst);
                    let slot = class.static_slot("count").unwrap_or_default();
                    class.set_static(slot, Value::Int(100));
                    Ok(())
                }),
        );

        let registry = Arc::new(builder.build());
        Fixture {
            runtime: Runtime::new(registry),
            shape,
            square,
            counter,
            inits,
        }
    }

    fn new_square(fx: &Fixture, side: f64) -> Value {
        let ctor = fx
            .runtime
            .lookup(fx.square)
            .find_constructor(fx.square, &TypeDescriptor::new(Kind::Void, [Kind::DOUBLE]))
            .unwrap();
        let site = ctor.ty().clone();
        ctor.invoke_exact(&site, vec![Value::Double(side)]).unwrap()
    }

    #[test]
    fn test_virtual_dispatch_uses_runtime_class() {
        let fx = fixture();
        let area = fx
            .runtime
            .lookup(fx.shape)
            .find_virtual(fx.shape, "area", &TypeDescriptor::new(Kind::DOUBLE, Vec::new()))
            .unwrap();
        let square = new_square(&fx, 3.0);
        let site = area.ty().clone();
        assert_eq!(area.invoke_exact(&site, vec![square]).unwrap(), Value::Double(9.0));
        assert!(matches!(
            area.invoke_exact(&site, vec![Value::Null]),
            Err(InvokeError::NullPointer(_))
        ));
    }

    #[test]
    fn test_special_skips_override() {
        let fx = fixture();
        let ty = TypeDescriptor::new(Kind::INT, Vec::new());
        let special = fx
            .runtime
            .lookup(fx.square)
            .find_special(fx.shape, "name", &ty, fx.square)
            .unwrap();
        let square = new_square(&fx, 1.0);
        let site = special.ty().clone();
        assert_eq!(special.invoke_exact(&site, vec![square]).unwrap(), Value::Int(0));
    }

    #[test]
    fn test_invoke_exact_rejects_mismatches() {
        let fx = fixture();
        let area = fx
            .runtime
            .lookup(fx.square)
            .find_virtual(fx.square, "area", &TypeDescriptor::new(Kind::DOUBLE, Vec::new()))
            .unwrap();
        let square = new_square(&fx, 2.0);
        let wrong = TypeDescriptor::new(Kind::DOUBLE, [Kind::Reference(fx.shape)]);
        assert!(matches!(
            area.invoke_exact(&wrong, vec![square.clone()]),
            Err(InvokeError::WrongMethodType { .. })
        ));
        let site = area.ty().clone();
        assert!(matches!(
            area.invoke_exact(&site, vec![]),
            Err(InvokeError::WrongMethodType { .. })
        ));
        assert!(matches!(
            area.invoke_exact(&site, vec![Value::Int(1)]),
            Err(InvokeError::WrongMethodType { .. })
        ));

        // `invoke` casts the receiver instead
        assert_eq!(area.invoke(&wrong, vec![square]).unwrap(), Value::Double(4.0));
    }

    #[test]
    fn test_static_initializer_deferred_to_first_call() {
        let fx = fixture();
        let getter = fx
            .runtime
            .lookup(fx.counter)
            .find_static_getter(fx.counter, "count", Kind::INT)
            .unwrap();
        assert!(getter.requires_init());
        assert_eq!(fx.inits.load(Ordering::SeqCst), 0);

        let site = getter.ty().clone();
        assert_eq!(getter.invoke_exact(&site, vec![]).unwrap(), Value::Int(100));
        assert_eq!(getter.invoke_exact(&site, vec![]).unwrap(), Value::Int(100));
        assert!(!getter.requires_init());
        assert_eq!(fx.inits.load(Ordering::SeqCst), 1);

        let setter = fx
            .runtime
            .lookup(fx.counter)
            .find_static_setter(fx.counter, "count", Kind::INT)
            .unwrap();
        assert!(!setter.requires_init());
        let site = setter.ty().clone();
        setter.invoke_exact(&site, vec![Value::Int(5)]).unwrap();
        assert_eq!(getter.invoke(&getter.ty().clone(), vec![]).unwrap(), Value::Int(5));
    }

    #[test]
    fn test_field_access_through_handles() {
        let fx = fixture();
        let lookup = fx.runtime.lookup(fx.square);
        let get = lookup.find_getter(fx.square, "side", Kind::DOUBLE).unwrap();
        let set = lookup.find_setter(fx.square, "side", Kind::DOUBLE).unwrap();
        let square = new_square(&fx, 1.5);

        let get_site = get.ty().clone();
        assert_eq!(get.invoke_exact(&get_site, vec![square.clone()]).unwrap(), Value::Double(1.5));
        let set_site = set.ty().clone();
        set.invoke_exact(&set_site, vec![square.clone(), Value::Double(6.0)])
            .unwrap();
        assert_eq!(get.invoke_exact(&get_site, vec![square]).unwrap(), Value::Double(6.0));
    }

    #[test]
    fn test_abstract_class_cannot_be_constructed() {
        let fx = fixture();
        assert!(matches!(
            fx.runtime.graph().allocate(fx.shape),
            Err(InvokeError::Thrown(_))
        ));
    }

    #[test]
    fn test_invoke_with_arguments_boxes() {
        let fx = fixture();
        let area = fx
            .runtime
            .lookup(fx.square)
            .find_virtual(fx.square, "area", &TypeDescriptor::new(Kind::DOUBLE, Vec::new()))
            .unwrap();
        let result = area.invoke_with_arguments(vec![new_square(&fx, 5.0)]).unwrap();
        assert_eq!(result.unboxed(), Some(Value::Double(25.0)));
    }
}
