//! Method type descriptors
//!
//! A [`TypeDescriptor`] is the immutable signature of a method handle: a
//! return [`Kind`] plus an ordered list of parameter kinds. Two descriptors
//! are exact-compatible iff they are structurally equal.
//!
//! Argument slots follow the JVM convention: `long` and `double` take two
//! slots, everything else one. No handle may need more than
//! [`ARG_SLOT_LIMIT`] slots.

use std::fmt;

use crate::class_graph::ClassGraph;
use crate::error::{InvokeError, InvokeResult};

/// Maximum number of argument slots a method handle type may occupy
pub const ARG_SLOT_LIMIT: usize = 255;

/// Identity of a class in the class graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub u32);

impl ClassId {
    /// Index into a dense class table
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "class#{}", self.0)
    }
}

/// Primitive value kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    /// 1-bit truth value
    Boolean,
    /// Signed 8-bit integer
    Byte,
    /// Signed 16-bit integer
    Short,
    /// Unsigned 16-bit code unit
    Char,
    /// Signed 32-bit integer
    Int,
    /// Signed 64-bit integer
    Long,
    /// 32-bit IEEE float
    Float,
    /// 64-bit IEEE float
    Double,
}

impl Primitive {
    /// All primitive kinds, in wrapper-table order
    pub const ALL: [Primitive; 8] = [
        Primitive::Boolean,
        Primitive::Byte,
        Primitive::Short,
        Primitive::Char,
        Primitive::Int,
        Primitive::Long,
        Primitive::Float,
        Primitive::Double,
    ];

    /// Number of argument slots a value of this kind occupies
    pub fn slots(self) -> usize {
        match self {
            Primitive::Long | Primitive::Double => 2,
            _ => 1,
        }
    }

    /// Position of this kind in [`Primitive::ALL`]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Source-level name of the kind
    pub fn name(self) -> &'static str {
        match self {
            Primitive::Boolean => "boolean",
            Primitive::Byte => "byte",
            Primitive::Short => "short",
            Primitive::Char => "char",
            Primitive::Int => "int",
            Primitive::Long => "long",
            Primitive::Float => "float",
            Primitive::Double => "double",
        }
    }

    /// Whether a value of this kind converts to `to` without an explicit cast
    ///
    /// Identity counts as widening. `boolean` widens to nothing else.
    pub fn widens_to(self, to: Primitive) -> bool {
        use Primitive::*;

        if self == to {
            return true;
        }
        match self {
            Byte => matches!(to, Short | Int | Long | Float | Double),
            Short | Char => matches!(to, Int | Long | Float | Double),
            Int => matches!(to, Long | Float | Double),
            Long => matches!(to, Float | Double),
            Float => to == Double,
            Double | Boolean => false,
        }
    }
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Kind of a parameter or return slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// No value (return position only)
    Void,
    /// Primitive value
    Primitive(Primitive),
    /// Reference to an instance of the class (arrays included)
    Reference(ClassId),
}

impl Kind {
    /// `void`
    pub const VOID: Kind = Kind::Void;
    /// `boolean`
    pub const BOOLEAN: Kind = Kind::Primitive(Primitive::Boolean);
    /// `byte`
    pub const BYTE: Kind = Kind::Primitive(Primitive::Byte);
    /// `short`
    pub const SHORT: Kind = Kind::Primitive(Primitive::Short);
    /// `char`
    pub const CHAR: Kind = Kind::Primitive(Primitive::Char);
    /// `int`
    pub const INT: Kind = Kind::Primitive(Primitive::Int);
    /// `long`
    pub const LONG: Kind = Kind::Primitive(Primitive::Long);
    /// `float`
    pub const FLOAT: Kind = Kind::Primitive(Primitive::Float);
    /// `double`
    pub const DOUBLE: Kind = Kind::Primitive(Primitive::Double);

    /// Check if this is a primitive kind
    pub fn is_primitive(self) -> bool {
        matches!(self, Kind::Primitive(_))
    }

    /// Check if this is a reference kind
    pub fn is_reference(self) -> bool {
        matches!(self, Kind::Reference(_))
    }

    /// Primitive kind, if any
    pub fn as_primitive(self) -> Option<Primitive> {
        match self {
            Kind::Primitive(p) => Some(p),
            _ => None,
        }
    }

    /// Referenced class, if any
    pub fn as_class(self) -> Option<ClassId> {
        match self {
            Kind::Reference(id) => Some(id),
            _ => None,
        }
    }

    /// Number of argument slots this kind occupies
    pub fn slots(self) -> usize {
        match self {
            Kind::Void => 0,
            Kind::Primitive(p) => p.slots(),
            Kind::Reference(_) => 1,
        }
    }

    /// Name of the kind, resolving class names through the graph
    pub fn name(self, graph: &dyn ClassGraph) -> String {
        match self {
            Kind::Void => "void".to_string(),
            Kind::Primitive(p) => p.name().to_string(),
            Kind::Reference(id) => graph.class_name(id),
        }
    }
}

/// Immutable method signature
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeDescriptor {
    ret: Kind,
    params: Vec<Kind>,
}

impl TypeDescriptor {
    /// Create a descriptor from a return kind and parameter kinds
    pub fn new(ret: Kind, params: impl Into<Vec<Kind>>) -> Self {
        Self {
            ret,
            params: params.into(),
        }
    }

    /// `(Object, ..., Object)Object` with `arity` parameters
    pub fn generic(arity: usize, object: ClassId) -> Self {
        Self::new(Kind::Reference(object), vec![Kind::Reference(object); arity])
    }

    /// Return kind
    pub fn return_kind(&self) -> Kind {
        self.ret
    }

    /// Parameter kinds
    pub fn params(&self) -> &[Kind] {
        &self.params
    }

    /// Number of parameters
    pub fn parameter_count(&self) -> usize {
        self.params.len()
    }

    /// Parameter kind at `index`
    pub fn parameter(&self, index: usize) -> Option<Kind> {
        self.params.get(index).copied()
    }

    /// Trailing parameter kind
    pub fn last_parameter(&self) -> Option<Kind> {
        self.params.last().copied()
    }

    /// Total argument slots taken by the parameters
    pub fn arg_slots(&self) -> usize {
        self.params.iter().map(|k| k.slots()).sum()
    }

    /// Copy with a different return kind
    pub fn change_return(&self, ret: Kind) -> Self {
        Self::new(ret, self.params.clone())
    }

    /// Copy with the parameter at `index` replaced
    ///
    /// # Panics
    /// Panics if `index` is out of range.
    pub fn change_parameter(&self, index: usize, kind: Kind) -> Self {
        let mut params = self.params.clone();
        params[index] = kind;
        Self::new(self.ret, params)
    }

    /// Copy with `kinds` inserted before parameter `position`
    ///
    /// # Panics
    /// Panics if `position > parameter_count()`.
    pub fn insert_parameters(&self, position: usize, kinds: &[Kind]) -> Self {
        let mut params = Vec::with_capacity(self.params.len() + kinds.len());
        params.extend_from_slice(&self.params[..position]);
        params.extend_from_slice(kinds);
        params.extend_from_slice(&self.params[position..]);
        Self::new(self.ret, params)
    }

    /// Copy without parameters `start..end`
    ///
    /// # Panics
    /// Panics if the range is out of bounds.
    pub fn drop_parameters(&self, start: usize, end: usize) -> Self {
        let mut params = self.params.clone();
        params.drain(start..end);
        Self::new(self.ret, params)
    }

    /// Copy with parameter `position` replaced by `count` copies of `kind`
    pub fn expand_parameter(&self, position: usize, kind: Kind, count: usize) -> Self {
        let mut params = Vec::with_capacity(self.params.len() + count);
        params.extend_from_slice(&self.params[..position]);
        params.extend(std::iter::repeat(kind).take(count));
        params.extend_from_slice(&self.params[position + 1..]);
        Self::new(self.ret, params)
    }

    /// Copy with parameters `position..position + count` replaced by a single `kind`
    pub fn collapse_parameters(&self, position: usize, count: usize, kind: Kind) -> Self {
        let mut params = Vec::with_capacity(self.params.len() + 1);
        params.extend_from_slice(&self.params[..position]);
        params.push(kind);
        params.extend_from_slice(&self.params[position + count..]);
        Self::new(self.ret, params)
    }

    /// Render as `(p1,p2)r` using class names from the graph
    pub fn display(&self, graph: &dyn ClassGraph) -> String {
        let params: Vec<String> = self.params.iter().map(|k| k.name(graph)).collect();
        format!("({}){}", params.join(","), self.ret.name(graph))
    }
}

/// Fail with `IllegalArgument` if `ty` has a `void` parameter or (plus an
/// implicit receiver slot) exceeds [`ARG_SLOT_LIMIT`]
pub fn check_arg_slots(ty: &TypeDescriptor, implicit_receiver: bool) -> InvokeResult<()> {
    if let Some(index) = ty.params.iter().position(|k| *k == Kind::Void) {
        return Err(InvokeError::IllegalArgument(format!(
            "parameter {} cannot be void",
            index
        )));
    }
    let slots = ty.arg_slots() + usize::from(implicit_receiver);
    if slots > ARG_SLOT_LIMIT {
        return Err(InvokeError::IllegalArgument(format!(
            "method type needs {} argument slots, limit is {}",
            slots, ARG_SLOT_LIMIT
        )));
    }
    Ok(())
}
