//! Invocation and configuration errors

use thiserror::Error;

/// Errors raised while resolving, adapting or invoking method handles
#[derive(Debug, Clone, Error, PartialEq)]
pub enum InvokeError {
    /// Member or class is not accessible from the lookup context
    #[error("Illegal access: {0}")]
    IllegalAccess(String),

    /// Requested member does not exist or uses a reserved name
    #[error("No such member: {0}")]
    NoSuchMember(String),

    /// No legal conversion between two method types
    #[error("Wrong method type: expected {expected}, got {actual}")]
    WrongMethodType {
        /// Type the handle (or conversion target) requires
        expected: String,
        /// Type that was supplied
        actual: String,
    },

    /// Adapter or argument rejected
    #[error("Illegal argument: {0}")]
    IllegalArgument(String),

    /// Null reference where a value is required
    #[error("Null pointer: {0}")]
    NullPointer(String),

    /// Reference check failed at call time
    #[error("Class cast: {from} cannot be cast to {to}")]
    ClassCast {
        /// Runtime class (or primitive) of the value
        from: String,
        /// Class the value was checked against
        to: String,
    },

    /// Operation the engine does not support
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// A static initializer failed; the class stays unusable
    #[error("Initializer of {class} failed: {cause}")]
    InitializerFailed {
        /// Class whose initializer failed
        class: String,
        /// Error raised by the initializer
        cause: Box<InvokeError>,
    },

    /// Error raised by a target body
    #[error("{0}")]
    Thrown(String),
}

/// Result of a method handle operation
pub type InvokeResult<T> = Result<T, InvokeError>;

/// Category of an [`InvokeError`], without its payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`InvokeError::IllegalAccess`]
    IllegalAccess,
    /// See [`InvokeError::NoSuchMember`]
    NoSuchMember,
    /// See [`InvokeError::WrongMethodType`]
    WrongMethodType,
    /// See [`InvokeError::IllegalArgument`]
    IllegalArgument,
    /// See [`InvokeError::NullPointer`]
    NullPointer,
    /// See [`InvokeError::ClassCast`]
    ClassCast,
    /// See [`InvokeError::Unsupported`]
    Unsupported,
    /// See [`InvokeError::InitializerFailed`]
    InitializerFailed,
    /// See [`InvokeError::Thrown`]
    Thrown,
}

impl InvokeError {
    /// Category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            InvokeError::IllegalAccess(_) => ErrorKind::IllegalAccess,
            InvokeError::NoSuchMember(_) => ErrorKind::NoSuchMember,
            InvokeError::WrongMethodType { .. } => ErrorKind::WrongMethodType,
            InvokeError::IllegalArgument(_) => ErrorKind::IllegalArgument,
            InvokeError::NullPointer(_) => ErrorKind::NullPointer,
            InvokeError::ClassCast { .. } => ErrorKind::ClassCast,
            InvokeError::Unsupported(_) => ErrorKind::Unsupported,
            InvokeError::InitializerFailed { .. } => ErrorKind::InitializerFailed,
            InvokeError::Thrown(_) => ErrorKind::Thrown,
        }
    }
}

/// Errors that can occur while loading runtime options
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse TOML
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
}
