//! Arity adapters
//!
//! Collectors pack a run of arguments into a fresh array, spreaders unpack
//! an array argument, and permutations reorder, duplicate or drop
//! arguments. Variable-arity handles use a collector under `as_type` when
//! the call site passes its trailing arguments loose.

use std::sync::Arc;

use crate::class_graph::ClassGraph;
use crate::convert::ConversionPolicy;
use crate::error::{InvokeError, InvokeResult};
use crate::handle::{Arity, HandleTarget, MethodHandle};
use crate::types::{check_arg_slots, ClassId, Kind, TypeDescriptor, ARG_SLOT_LIMIT};
use crate::value::Value;

impl MethodHandle {
    /// Collect the last `count` arguments into a new `array`
    pub fn as_collector(&self, array: ClassId, count: usize) -> InvokeResult<MethodHandle> {
        let position = self.ty().parameter_count().checked_sub(1).ok_or_else(|| {
            InvokeError::IllegalArgument(format!(
                "{} has no parameter to collect into",
                self.ty().display(self.graph())
            ))
        })?;
        self.as_collector_at(position, array, count)
    }

    /// Collect `count` arguments starting at `position` into a new `array`
    ///
    /// The parameter at `position` must accept `array`.
    pub fn as_collector_at(
        &self,
        position: usize,
        array: ClassId,
        count: usize,
    ) -> InvokeResult<MethodHandle> {
        let graph = self.graph();
        let element = array_component(graph, array)?;
        let accepts = matches!(
            self.ty().parameter(position),
            Some(Kind::Reference(param)) if graph.is_subtype_of(array, param)
        );
        if !accepts {
            return Err(InvokeError::IllegalArgument(format!(
                "parameter {} of {} cannot hold {}",
                position,
                self.ty().display(graph),
                graph.class_name(array)
            )));
        }
        if count > ARG_SLOT_LIMIT {
            return Err(InvokeError::IllegalArgument(format!(
                "cannot collect {} arguments",
                count
            )));
        }

        let ty = self.ty().expand_parameter(position, element, count);
        check_arg_slots(&ty, false)?;
        Ok(MethodHandle::new(
            Arc::clone(self.runtime()),
            ty,
            Arity::Fixed,
            HandleTarget::Collect {
                next: self.clone(),
                position,
                count,
                array,
            },
        ))
    }

    /// Accept an `array` in place of the last `count` arguments
    pub fn as_spreader(&self, array: ClassId, count: usize) -> InvokeResult<MethodHandle> {
        let position = self.ty().parameter_count().checked_sub(count).ok_or_else(|| {
            InvokeError::IllegalArgument(format!(
                "cannot spread {} arguments into {}",
                count,
                self.ty().display(self.graph())
            ))
        })?;
        self.as_spreader_at(position, array, count)
    }

    /// Accept an `array` in place of `count` arguments starting at `position`
    ///
    /// The spread parameters are first converted to the array's element
    /// kind. At call time the array must hold exactly `count` elements; a
    /// null array is accepted only when `count` is zero.
    pub fn as_spreader_at(
        &self,
        position: usize,
        array: ClassId,
        count: usize,
    ) -> InvokeResult<MethodHandle> {
        let graph = self.graph();
        let element = array_component(graph, array)?;
        let n = self.ty().parameter_count();
        if position > n || count > n - position {
            return Err(InvokeError::IllegalArgument(format!(
                "cannot spread {} arguments at {} into {}",
                count,
                position,
                self.ty().display(graph)
            )));
        }

        let need = (position..position + count)
            .fold(self.ty().clone(), |ty, i| ty.change_parameter(i, element));
        let adapted = if need == *self.ty() {
            self.clone()
        } else {
            self.convert(&need, ConversionPolicy::Implicit).map_err(|_| {
                InvokeError::IllegalArgument(format!(
                    "elements of {} cannot be passed to {}",
                    graph.class_name(array),
                    self.ty().display(graph)
                ))
            })?
        };

        let ty = self
            .ty()
            .collapse_parameters(position, count, Kind::Reference(array));
        check_arg_slots(&ty, false)?;
        Ok(MethodHandle::new(
            Arc::clone(self.runtime()),
            ty,
            Arity::Fixed,
            HandleTarget::Spread {
                next: adapted,
                position,
                count,
            },
        ))
    }

    /// Make `invoke` collect trailing arguments into `array`
    pub fn as_varargs_collector(&self, array: ClassId) -> InvokeResult<MethodHandle> {
        let graph = self.graph();
        array_component(graph, array)?;
        let accepts = matches!(
            self.ty().last_parameter(),
            Some(Kind::Reference(last)) if graph.is_subtype_of(array, last)
        );
        if !accepts {
            return Err(InvokeError::IllegalArgument(format!(
                "last parameter of {} cannot hold {}",
                self.ty().display(graph),
                graph.class_name(array)
            )));
        }
        if self.arity() == Arity::VarargsOf(array) {
            return Ok(self.clone());
        }
        Ok(self.with_arity(Arity::VarargsOf(array)))
    }

    /// Same handle without variable arity
    pub fn as_fixed_arity(&self) -> MethodHandle {
        match self.arity() {
            Arity::Fixed => self.clone(),
            Arity::VarargsOf(_) => self.with_arity(Arity::Fixed),
        }
    }

    /// Turn variable arity on or off, collecting into the last parameter's array class
    pub fn with_varargs(&self, varargs: bool) -> InvokeResult<MethodHandle> {
        if !varargs {
            return Ok(self.as_fixed_arity());
        }
        if self.is_varargs_collector() {
            return Ok(self.clone());
        }
        match self.ty().last_parameter() {
            Some(Kind::Reference(last)) if self.graph().component_of(last).is_some() => {
                self.as_varargs_collector(last)
            }
            _ => Err(InvokeError::IllegalArgument(format!(
                "{} does not end in an array parameter",
                self.ty().display(self.graph())
            ))),
        }
    }

    /// `as_type` for a variable-arity handle collecting into `array`
    pub(crate) fn as_varargs_type(
        &self,
        target: &TypeDescriptor,
        array: ClassId,
    ) -> InvokeResult<MethodHandle> {
        let graph = self.graph();
        let ty = self.ty();
        let last = ty.parameter_count() - 1;
        let n = target.parameter_count();

        let passes_array = n == ty.parameter_count()
            && matches!(
                target.parameter(last),
                Some(Kind::Reference(class)) if graph.is_subtype_of(class, array)
            );
        if passes_array {
            let converted = self.convert(target, ConversionPolicy::Implicit)?;
            // Still variable arity only if the array and return pass through untouched
            let keep = target.return_kind() == ty.return_kind()
                && target.parameter(last) == Some(Kind::Reference(array))
                && target.params()[..last]
                    .iter()
                    .zip(&ty.params()[..last])
                    .all(|(from, to)| passes_unchanged(graph, *from, *to));
            return Ok(if keep {
                converted.with_arity(Arity::VarargsOf(array))
            } else {
                converted
            });
        }

        if n < last {
            return Err(InvokeError::WrongMethodType {
                expected: ty.display(graph),
                actual: target.display(graph),
            });
        }
        let collector = self.as_collector_at(last, array, n - last)?;
        collector.convert(target, ConversionPolicy::Implicit)
    }

    /// Adapt to `new_type`, feeding parameter `i` from argument `reorder[i]`
    ///
    /// Indices may repeat or skip new arguments. Each argument must reach
    /// its parameter by identity or widening. The return kind must match.
    pub fn permute_arguments(
        &self,
        new_type: &TypeDescriptor,
        reorder: &[usize],
    ) -> InvokeResult<MethodHandle> {
        let graph = self.graph();
        let ty = self.ty();
        if reorder.len() != ty.parameter_count() {
            return Err(InvokeError::IllegalArgument(format!(
                "reorder has {} entries but {} takes {} parameters",
                reorder.len(),
                ty.display(graph),
                ty.parameter_count()
            )));
        }

        let mut intermediate = Vec::with_capacity(reorder.len());
        for (i, &j) in reorder.iter().enumerate() {
            let supplied = new_type.parameter(j).ok_or_else(|| {
                InvokeError::IllegalArgument(format!(
                    "reorder index {} out of range for {}",
                    j,
                    new_type.display(graph)
                ))
            })?;
            let expected = ty.params()[i];
            if !widens(graph, supplied, expected) {
                return Err(InvokeError::IllegalArgument(format!(
                    "argument {} of type {} cannot feed parameter {} of type {}",
                    j,
                    supplied.name(graph),
                    i,
                    expected.name(graph)
                )));
            }
            intermediate.push(supplied);
        }
        if ty.return_kind() != new_type.return_kind() {
            return Err(InvokeError::IllegalArgument(format!(
                "return type {} differs from {}",
                ty.return_kind().name(graph),
                new_type.return_kind().name(graph)
            )));
        }
        check_arg_slots(new_type, false)?;

        let intermediate = TypeDescriptor::new(new_type.return_kind(), intermediate);
        let adapted = if intermediate == *ty {
            self.clone()
        } else {
            self.convert(&intermediate, ConversionPolicy::Implicit)?
        };
        Ok(MethodHandle::new(
            Arc::clone(self.runtime()),
            new_type.clone(),
            Arity::Fixed,
            HandleTarget::Permute {
                next: adapted,
                reorder: reorder.to_vec(),
            },
        ))
    }

    /// Accept and ignore extra arguments of `kinds` at `position`
    pub fn drop_arguments(&self, position: usize, kinds: &[Kind]) -> InvokeResult<MethodHandle> {
        let count = self.ty().parameter_count();
        if position > count {
            return Err(InvokeError::IllegalArgument(format!(
                "cannot drop arguments at {} of {}",
                position,
                self.ty().display(self.graph())
            )));
        }
        let new_type = self.ty().insert_parameters(position, kinds);
        let reorder: Vec<usize> = (0..count)
            .map(|i| if i < position { i } else { i + kinds.len() })
            .collect();
        self.permute_arguments(&new_type, &reorder)
    }
}

/// `target.permute_arguments(new_type, reorder)`
pub fn permute_arguments(
    target: &MethodHandle,
    new_type: &TypeDescriptor,
    reorder: &[usize],
) -> InvokeResult<MethodHandle> {
    target.permute_arguments(new_type, reorder)
}

/// `target.drop_arguments(position, kinds)`
pub fn drop_arguments(
    target: &MethodHandle,
    position: usize,
    kinds: &[Kind],
) -> InvokeResult<MethodHandle> {
    target.drop_arguments(position, kinds)
}

/// Unpack a spread argument into exactly `count` elements
pub(crate) fn spread_elements(
    graph: &dyn ClassGraph,
    array: &Value,
    count: usize,
) -> InvokeResult<Vec<Value>> {
    let elements = match array {
        Value::Null if count == 0 => return Ok(Vec::new()),
        Value::Null => {
            return Err(InvokeError::IllegalArgument(format!(
                "null array cannot supply {} arguments",
                count
            )))
        }
        other => other.array_elements().ok_or_else(|| {
            InvokeError::IllegalArgument(format!(
                "spread argument is not an array: {}",
                crate::handle::describe_value(graph, other)
            ))
        })?,
    };
    if elements.len() != count {
        return Err(InvokeError::IllegalArgument(format!(
            "array is not of length {}",
            count
        )));
    }
    Ok(elements)
}

fn array_component(graph: &dyn ClassGraph, array: ClassId) -> InvokeResult<Kind> {
    graph.component_of(array).ok_or_else(|| {
        InvokeError::IllegalArgument(format!("{} is not an array class", graph.class_name(array)))
    })
}

/// Identity, primitive widening or reference subtyping
fn widens(graph: &dyn ClassGraph, from: Kind, to: Kind) -> bool {
    match (from, to) {
        (a, b) if a == b => true,
        (Kind::Primitive(a), Kind::Primitive(b)) => a.widens_to(b),
        (Kind::Reference(a), Kind::Reference(b)) => graph.is_subtype_of(a, b),
        _ => false,
    }
}

fn passes_unchanged(graph: &dyn ClassGraph, from: Kind, to: Kind) -> bool {
    match (from, to) {
        (a, b) if a == b => true,
        (Kind::Reference(a), Kind::Reference(b)) => graph.is_subtype_of(a, b),
        _ => false,
    }
}
