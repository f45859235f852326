//! Conversion planning for `as_type` and `explicit_cast`
//!
//! [`plan`] decides, slot by slot, how a value of one kind becomes a value
//! of another. Parameters convert from the requested (call-site) type into
//! the handle's type; the return value converts the other way. A plan is
//! all-or-nothing: if any slot has no legal conversion under the policy the
//! whole plan fails with `WrongMethodType`, before any call happens.
//!
//! Some conversions can only be decided per value. Reference downcasts and
//! unboxing from a non-wrapper reference are checked when the call runs and
//! fail with `ClassCast` (or `NullPointer` for implicit null unboxing).
//!
//! | source        | target          | implicit                      | explicit                         |
//! |---------------|-----------------|-------------------------------|----------------------------------|
//! | primitive     | wider primitive | widen                         | widen                            |
//! | primitive     | other primitive | rejected                      | cast (truncate, low-bit boolean) |
//! | primitive     | reference       | box if wrapper fits           | also cast into another wrapper   |
//! | wrapper       | primitive       | unbox + widen                 | unbox + cast                     |
//! | `Object` etc. | primitive       | unbox + widen, checked at run | unbox + cast, null is zero       |
//! | reference     | supertype       | identity                      | identity                         |
//! | reference     | other reference | checked cast                  | checked cast, interfaces free    |
//! | any           | `void` return   | discard                       | discard                          |

use tracing::trace;

use crate::class_graph::ClassGraph;
use crate::error::{InvokeError, InvokeResult};
use crate::types::{ClassId, Kind, Primitive, TypeDescriptor};
use crate::value::Value;

/// Which conversions a plan may use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConversionPolicy {
    /// `as_type`: widening, boxing, unboxing and checked casts only
    Implicit,
    /// `explicit_cast`: additionally primitive narrowing and zero-on-null unboxing
    Explicit,
}

/// Conversion applied to one slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotConversion {
    /// Value passes through unchanged
    Identity,
    /// Primitive widening or (explicit) casting
    Primitive {
        /// Incoming kind
        from: Primitive,
        /// Outgoing kind
        to: Primitive,
    },
    /// Cast the primitive to `via`, then box it into `wrapper`
    Box {
        /// Primitive kind held by the wrapper
        via: Primitive,
        /// Wrapper class
        wrapper: ClassId,
    },
    /// Unbox a reference, then widen or cast the payload to `to`
    Unbox {
        /// Outgoing primitive kind
        to: Primitive,
        /// Payload kind when the incoming type is itself a wrapper
        declared: Option<Primitive>,
        /// Governs null handling and whether the payload may narrow
        policy: ConversionPolicy,
    },
    /// Reference check against `to` at call time
    Cast {
        /// Class the value must be an instance of
        to: ClassId,
    },
    /// Drop the value (non-void into a `void` return)
    Discard,
}

impl SlotConversion {
    /// Convert a single value
    pub fn apply(&self, graph: &dyn ClassGraph, value: Value) -> InvokeResult<Value> {
        match self {
            SlotConversion::Identity => Ok(value),
            SlotConversion::Discard => Ok(Value::Void),
            SlotConversion::Primitive { to, .. } => cast_primitive(graph, &value, *to),
            SlotConversion::Box { via, .. } => {
                let value = match value.primitive_kind() {
                    Some(p) if p == *via => value,
                    Some(_) => cast_primitive(graph, &value, *via)?,
                    None => return Err(not_primitive(graph, &value)),
                };
                Ok(value.boxed(graph.well_known()))
            }
            SlotConversion::Unbox { to, policy, .. } => unbox(graph, value, *to, *policy),
            SlotConversion::Cast { to } => {
                if graph.is_instance(&value, *to) {
                    Ok(value)
                } else {
                    Err(InvokeError::ClassCast {
                        from: value_class_name(graph, &value),
                        to: graph.class_name(*to),
                    })
                }
            }
        }
    }
}

/// Per-slot conversion table between two method types
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionPlan {
    /// One entry per parameter, converting call-site arguments to the target's kinds
    pub params: Vec<SlotConversion>,
    /// Conversion of the target's return value to the call-site return kind
    pub ret: SlotConversion,
}

impl ConversionPlan {
    /// Check if every slot passes values through unchanged
    pub fn is_identity(&self) -> bool {
        self.ret == SlotConversion::Identity
            && self.params.iter().all(|c| *c == SlotConversion::Identity)
    }

    /// Convert call-site arguments
    pub fn convert_arguments(
        &self,
        graph: &dyn ClassGraph,
        args: Vec<Value>,
        trace_slots: bool,
    ) -> InvokeResult<Vec<Value>> {
        args.into_iter()
            .zip(&self.params)
            .enumerate()
            .map(|(index, (value, conversion))| {
                if trace_slots && *conversion != SlotConversion::Identity {
                    trace!(slot = index, ?conversion, ?value, "converting argument");
                }
                conversion.apply(graph, value)
            })
            .collect()
    }

    /// Convert the target's return value
    pub fn convert_return(
        &self,
        graph: &dyn ClassGraph,
        value: Value,
        trace_slots: bool,
    ) -> InvokeResult<Value> {
        if trace_slots && self.ret != SlotConversion::Identity {
            trace!(conversion = ?self.ret, ?value, "converting return value");
        }
        self.ret.apply(graph, value)
    }
}

/// Plan the conversion that lets a handle of type `source` be called as `target`
pub fn plan(
    graph: &dyn ClassGraph,
    source: &TypeDescriptor,
    target: &TypeDescriptor,
    policy: ConversionPolicy,
) -> InvokeResult<ConversionPlan> {
    let mismatch = || InvokeError::WrongMethodType {
        expected: source.display(graph),
        actual: target.display(graph),
    };

    if source.parameter_count() != target.parameter_count() {
        return Err(mismatch());
    }

    let params = target
        .params()
        .iter()
        .zip(source.params())
        .map(|(from, to)| slot_conversion(graph, *from, *to, policy).ok_or_else(mismatch))
        .collect::<InvokeResult<Vec<_>>>()?;
    let ret = slot_conversion(graph, source.return_kind(), target.return_kind(), policy)
        .ok_or_else(mismatch)?;

    trace!(
        source = %source.display(graph),
        target = %target.display(graph),
        ?policy,
        ?params,
        ?ret,
        "planned conversion"
    );
    Ok(ConversionPlan { params, ret })
}

/// Conversion of a single value from `from` to `to`, if one exists
pub fn slot_conversion(
    graph: &dyn ClassGraph,
    from: Kind,
    to: Kind,
    policy: ConversionPolicy,
) -> Option<SlotConversion> {
    let explicit = policy == ConversionPolicy::Explicit;
    let wk = graph.well_known();

    if from == to {
        return Some(SlotConversion::Identity);
    }

    match (from, to) {
        (_, Kind::Void) => Some(SlotConversion::Discard),
        (Kind::Void, _) => None,

        (Kind::Primitive(p), Kind::Primitive(q)) => {
            (p.widens_to(q) || explicit).then_some(SlotConversion::Primitive { from: p, to: q })
        }

        (Kind::Primitive(p), Kind::Reference(class)) => {
            let wrapper = wk.wrapper(p);
            if graph.is_subtype_of(wrapper, class) {
                Some(SlotConversion::Box { via: p, wrapper })
            } else if explicit {
                graph
                    .wrapper_primitive(class)
                    .map(|q| SlotConversion::Box { via: q, wrapper: class })
            } else {
                None
            }
        }

        (Kind::Reference(class), Kind::Primitive(q)) => match graph.wrapper_primitive(class) {
            Some(p) => (p.widens_to(q) || explicit).then_some(SlotConversion::Unbox {
                to: q,
                declared: Some(p),
                policy,
            }),
            None => {
                // Implicit unboxing needs some wrapper that could widen into `q`
                // to be a subtype of the declared reference type
                let reachable = explicit
                    || Primitive::ALL
                        .iter()
                        .any(|r| r.widens_to(q) && graph.is_subtype_of(wk.wrapper(*r), class));
                reachable.then_some(SlotConversion::Unbox {
                    to: q,
                    declared: None,
                    policy,
                })
            }
        },

        (Kind::Reference(a), Kind::Reference(b)) => {
            if graph.is_subtype_of(a, b) || (explicit && graph.is_interface(b)) {
                Some(SlotConversion::Identity)
            } else {
                Some(SlotConversion::Cast { to: b })
            }
        }
    }
}

fn cast_primitive(graph: &dyn ClassGraph, value: &Value, to: Primitive) -> InvokeResult<Value> {
    value
        .cast_primitive(to)
        .ok_or_else(|| not_primitive(graph, value))
}

fn unbox(
    graph: &dyn ClassGraph,
    value: Value,
    to: Primitive,
    policy: ConversionPolicy,
) -> InvokeResult<Value> {
    let target_wrapper = || graph.class_name(graph.well_known().wrapper(to));

    let obj = match &value {
        Value::Null => {
            return match policy {
                ConversionPolicy::Implicit => Err(InvokeError::NullPointer(format!(
                    "cannot unbox null to {}",
                    to
                ))),
                ConversionPolicy::Explicit => Ok(Value::zero(to)),
            };
        }
        Value::Ref(obj) => obj,
        other => return Err(not_primitive(graph, other)),
    };

    let payload = value.unboxed().ok_or_else(|| InvokeError::ClassCast {
        from: graph.class_name(obj.class()),
        to: target_wrapper(),
    })?;
    let payload_kind = payload.primitive_kind();
    if policy == ConversionPolicy::Implicit && !payload_kind.is_some_and(|p| p.widens_to(to)) {
        return Err(InvokeError::ClassCast {
            from: graph.class_name(obj.class()),
            to: target_wrapper(),
        });
    }
    cast_primitive(graph, &payload, to)
}

fn value_class_name(graph: &dyn ClassGraph, value: &Value) -> String {
    match value {
        Value::Ref(obj) => graph.class_name(obj.class()),
        Value::Null => "null".to_string(),
        other => other
            .primitive_kind()
            .map(|p| p.name().to_string())
            .unwrap_or_else(|| "void".to_string()),
    }
}

fn not_primitive(graph: &dyn ClassGraph, value: &Value) -> InvokeError {
    InvokeError::ClassCast {
        from: value_class_name(graph, value),
        to: "primitive".to_string(),
    }
}
