//! Runtime values passed through method handles
//!
//! Primitive values travel unboxed. References point at heap objects that
//! carry their runtime class; object identity is pointer identity.

use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::class_graph::WellKnownClasses;
use crate::types::{ClassId, Kind, Primitive};

/// A single argument or return slot value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Result of a `void` call
    Void,
    /// `boolean`
    Boolean(bool),
    /// `byte`
    Byte(i8),
    /// `short`
    Short(i16),
    /// `char`
    Char(u16),
    /// `int`
    Int(i32),
    /// `long`
    Long(i64),
    /// `float`
    Float(f32),
    /// `double`
    Double(f64),
    /// Null reference
    Null,
    /// Reference to a heap object
    Ref(ObjectRef),
}

impl Value {
    /// Zero value of a primitive kind
    pub fn zero(p: Primitive) -> Value {
        match p {
            Primitive::Boolean => Value::Boolean(false),
            Primitive::Byte => Value::Byte(0),
            Primitive::Short => Value::Short(0),
            Primitive::Char => Value::Char(0),
            Primitive::Int => Value::Int(0),
            Primitive::Long => Value::Long(0),
            Primitive::Float => Value::Float(0.0),
            Primitive::Double => Value::Double(0.0),
        }
    }

    /// Default value stored in a fresh slot of the given kind
    pub fn default_for(kind: Kind) -> Value {
        match kind {
            Kind::Void => Value::Void,
            Kind::Primitive(p) => Value::zero(p),
            Kind::Reference(_) => Value::Null,
        }
    }

    /// Primitive kind of a primitive value
    pub fn primitive_kind(&self) -> Option<Primitive> {
        match self {
            Value::Boolean(_) => Some(Primitive::Boolean),
            Value::Byte(_) => Some(Primitive::Byte),
            Value::Short(_) => Some(Primitive::Short),
            Value::Char(_) => Some(Primitive::Char),
            Value::Int(_) => Some(Primitive::Int),
            Value::Long(_) => Some(Primitive::Long),
            Value::Float(_) => Some(Primitive::Float),
            Value::Double(_) => Some(Primitive::Double),
            _ => None,
        }
    }

    /// Check if this is the null reference
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Referenced object, if any
    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Ref(obj) => Some(obj),
            _ => None,
        }
    }

    /// `boolean` payload
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// `int` payload
    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// `long` payload
    pub fn as_long(&self) -> Option<i64> {
        match self {
            Value::Long(l) => Some(*l),
            _ => None,
        }
    }

    /// `double` payload
    pub fn as_double(&self) -> Option<f64> {
        match self {
            Value::Double(d) => Some(*d),
            _ => None,
        }
    }

    /// String payload of a string object
    pub fn as_str(&self) -> Option<&str> {
        match self.as_object()?.body() {
            ObjectBody::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Box a primitive value into its wrapper object
    ///
    /// References and `Void` are returned unchanged.
    pub fn boxed(self, well_known: &WellKnownClasses) -> Value {
        match self.primitive_kind() {
            Some(p) => Value::Ref(ObjectRef::new(Object::new(
                well_known.wrapper(p),
                ObjectBody::Boxed(self),
            ))),
            None => self,
        }
    }

    /// Primitive payload of a wrapper object
    pub fn unboxed(&self) -> Option<Value> {
        match self.as_object()?.body() {
            ObjectBody::Boxed(inner) => Some(inner.clone()),
            _ => None,
        }
    }

    /// New string object
    pub fn string(well_known: &WellKnownClasses, s: impl Into<String>) -> Value {
        Value::Ref(ObjectRef::new(Object::new(
            well_known.string,
            ObjectBody::Str(s.into()),
        )))
    }

    /// New array object of the given array class
    pub fn new_array(array_class: ClassId, elements: Vec<Value>) -> Value {
        Value::Ref(ObjectRef::new(Object::new(
            array_class,
            ObjectBody::Array(RwLock::new(elements)),
        )))
    }

    /// Elements of an array object
    pub fn array_elements(&self) -> Option<Vec<Value>> {
        match self.as_object()?.body() {
            ObjectBody::Array(elements) => Some(elements.read().clone()),
            _ => None,
        }
    }

    /// Cast a primitive value to another primitive kind
    ///
    /// Follows casting conversion: integral narrowing keeps the low bits,
    /// floating-point to integral truncates toward zero and saturates, with
    /// NaN becoming zero. `boolean` reads as `1`/`0`; casting to `boolean`
    /// tests the low bit of the value narrowed to `byte`.
    ///
    /// Returns `None` for non-primitive values.
    pub fn cast_primitive(&self, to: Primitive) -> Option<Value> {
        let num = match *self {
            Value::Boolean(b) => Num::Integral(i64::from(b)),
            Value::Byte(b) => Num::Integral(i64::from(b)),
            Value::Short(s) => Num::Integral(i64::from(s)),
            Value::Char(c) => Num::Integral(i64::from(c)),
            Value::Int(i) => Num::Integral(i64::from(i)),
            Value::Long(l) => Num::Integral(l),
            Value::Float(f) => Num::Floating(f64::from(f)),
            Value::Double(d) => Num::Floating(d),
            _ => return None,
        };

        Some(match to {
            Primitive::Boolean => Value::Boolean((num.to_int() as i8) & 1 != 0),
            Primitive::Byte => Value::Byte(num.to_int() as i8),
            Primitive::Short => Value::Short(num.to_int() as i16),
            Primitive::Char => Value::Char(num.to_int() as u16),
            Primitive::Int => Value::Int(num.to_int()),
            Primitive::Long => Value::Long(num.to_long()),
            Primitive::Float => Value::Float(match num {
                Num::Integral(i) => i as f32,
                Num::Floating(d) => d as f32,
            }),
            Primitive::Double => Value::Double(match num {
                Num::Integral(i) => i as f64,
                Num::Floating(d) => d,
            }),
        })
    }
}

/// Intermediate numeric form used by primitive casts
#[derive(Clone, Copy)]
enum Num {
    Integral(i64),
    Floating(f64),
}

impl Num {
    fn to_int(self) -> i32 {
        match self {
            Num::Integral(i) => i as i32,
            Num::Floating(d) => d as i32,
        }
    }

    fn to_long(self) -> i64 {
        match self {
            Num::Integral(i) => i,
            Num::Floating(d) => d as i64,
        }
    }
}

/// Shared reference to a heap object
#[derive(Clone)]
pub struct ObjectRef(Arc<Object>);

impl ObjectRef {
    /// Wrap a freshly built object
    pub fn new(object: Object) -> Self {
        Self(Arc::new(object))
    }

    /// Runtime class of the object
    pub fn class(&self) -> ClassId {
        self.0.class
    }

    /// Object payload
    pub fn body(&self) -> &ObjectBody {
        &self.0.body
    }

    /// Read an instance field slot
    pub fn get_field(&self, slot: usize) -> Option<Value> {
        match &self.0.body {
            ObjectBody::Instance(fields) => fields.lock().get(slot).cloned(),
            _ => None,
        }
    }

    /// Write an instance field slot, returning false if the slot does not exist
    pub fn set_field(&self, slot: usize, value: Value) -> bool {
        match &self.0.body {
            ObjectBody::Instance(fields) => match fields.lock().get_mut(slot) {
                Some(field) => {
                    *field = value;
                    true
                }
                None => false,
            },
            _ => false,
        }
    }

    /// Check if two references point at the same object
    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for ObjectRef {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0.body {
            ObjectBody::Instance(_) => write!(f, "Object({})", self.0.class),
            ObjectBody::Boxed(inner) => write!(f, "Boxed({:?})", inner),
            ObjectBody::Array(elements) => {
                write!(f, "Array({}, len={})", self.0.class, elements.read().len())
            }
            ObjectBody::Str(s) => write!(f, "String({:?})", s),
        }
    }
}

/// Heap object
#[derive(Debug)]
pub struct Object {
    class: ClassId,
    body: ObjectBody,
}

impl Object {
    /// Create an object of the given runtime class
    pub fn new(class: ClassId, body: ObjectBody) -> Self {
        Self { class, body }
    }
}

/// Payload of a heap object
#[derive(Debug)]
pub enum ObjectBody {
    /// Plain instance with field slots
    Instance(Mutex<Vec<Value>>),
    /// Wrapper around a primitive value
    Boxed(Value),
    /// Array elements
    Array(RwLock<Vec<Value>>),
    /// String contents
    Str(String),
}
