//! Raya Method Handle Engine
//!
//! This crate provides the dynamic-invocation core of the Raya VM:
//! - Type descriptors and the class-graph collaborator interface
//! - Conversion planning for `as_type` and `explicit_cast`
//! - Arity adapters (collectors, spreaders, varargs, permutation)
//! - Lookup access control with deferred static initialization
//! - Exact and converting invocation of method handles

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod access;
pub mod arity;
pub mod class_graph;
pub mod class_registry;
pub mod config;
pub mod convert;
pub mod dispatch;
pub mod error;
pub mod handle;
pub mod init;
pub mod runtime;
pub mod types;
pub mod value;

pub use access::{DispatchMode, Lookup, LookupModes};
pub use arity::{drop_arguments, permute_arguments};
pub use class_graph::{
    ClassDef, ClassGraph, Initializer, LoaderId, Member, MemberBody, MemberKind, Modifiers,
    NativeFn, WellKnownClasses,
};
pub use class_registry::{ClassRegistry, ClassRegistryBuilder, ClassSpec};
pub use config::RuntimeOptions;
pub use convert::{ConversionPlan, ConversionPolicy, SlotConversion};
pub use error::{ConfigError, ErrorKind, InvokeError, InvokeResult};
pub use handle::{explicit_cast_arguments, insert_arguments, Arity, MethodHandle};
pub use init::InitTable;
pub use runtime::Runtime;
pub use types::{ClassId, Kind, Primitive, TypeDescriptor, ARG_SLOT_LIMIT};
pub use value::{Object, ObjectBody, ObjectRef, Value};
