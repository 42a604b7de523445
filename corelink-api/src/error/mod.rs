//! Error handling module for the corelink control plane

use core::fmt;
use alloc::format;
use alloc::string::{String, ToString};

/// Common error type used throughout the corelink crates
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Null, out-of-range or malformed parameter
    InvalidArgument(String),
    /// Handle not set up, or operation illegal in the current lifecycle state
    InvalidState(String),
    /// Unknown processor id or file id
    HandleNotFound(String),
    /// Duplicate create for the same id
    AlreadyExists(String),
    /// Out of memory
    OutOfMemory,
    /// Address table or mapped-entry table capacity exhausted
    TableFull(String),
    /// No mapping covers the requested address
    AddressTranslationFailed(String),
    /// Host or slave MMU mapping failed
    MapFailed(String),
    /// Host or slave MMU unmapping failed
    UnmapFailed(String),
    /// A hardware-abstraction call failed
    BackendOperationFailed(String),
    /// Intentionally unsupported capability
    NotImplemented(String),
    /// Executable load failed
    LoadFailed(String),
    /// Executable unload failed
    UnloadFailed(String),
    /// Host file I/O error
    IoError(String),
}

/// Discriminant of an [`Error`], without its message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`Error::InvalidArgument`]
    InvalidArgument,
    /// See [`Error::InvalidState`]
    InvalidState,
    /// See [`Error::HandleNotFound`]
    HandleNotFound,
    /// See [`Error::AlreadyExists`]
    AlreadyExists,
    /// See [`Error::OutOfMemory`]
    OutOfMemory,
    /// See [`Error::TableFull`]
    TableFull,
    /// See [`Error::AddressTranslationFailed`]
    AddressTranslationFailed,
    /// See [`Error::MapFailed`]
    MapFailed,
    /// See [`Error::UnmapFailed`]
    UnmapFailed,
    /// See [`Error::BackendOperationFailed`]
    BackendOperationFailed,
    /// See [`Error::NotImplemented`]
    NotImplemented,
    /// See [`Error::LoadFailed`]
    LoadFailed,
    /// See [`Error::UnloadFailed`]
    UnloadFailed,
    /// See [`Error::IoError`]
    IoError,
}

impl Error {
    /// Returns the kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Error::InvalidState(_) => ErrorKind::InvalidState,
            Error::HandleNotFound(_) => ErrorKind::HandleNotFound,
            Error::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Error::OutOfMemory => ErrorKind::OutOfMemory,
            Error::TableFull(_) => ErrorKind::TableFull,
            Error::AddressTranslationFailed(_) => ErrorKind::AddressTranslationFailed,
            Error::MapFailed(_) => ErrorKind::MapFailed,
            Error::UnmapFailed(_) => ErrorKind::UnmapFailed,
            Error::BackendOperationFailed(_) => ErrorKind::BackendOperationFailed,
            Error::NotImplemented(_) => ErrorKind::NotImplemented,
            Error::LoadFailed(_) => ErrorKind::LoadFailed,
            Error::UnloadFailed(_) => ErrorKind::UnloadFailed,
            Error::IoError(_) => ErrorKind::IoError,
        }
    }

    /// Returns the message carried by this error, if any
    pub fn message(&self) -> Option<&str> {
        match self {
            Error::OutOfMemory => None,
            Error::InvalidArgument(msg)
            | Error::InvalidState(msg)
            | Error::HandleNotFound(msg)
            | Error::AlreadyExists(msg)
            | Error::TableFull(msg)
            | Error::AddressTranslationFailed(msg)
            | Error::MapFailed(msg)
            | Error::UnmapFailed(msg)
            | Error::BackendOperationFailed(msg)
            | Error::NotImplemented(msg)
            | Error::LoadFailed(msg)
            | Error::UnloadFailed(msg)
            | Error::IoError(msg) => Some(msg),
        }
    }

    /// Wraps this error as a load failure, keeping the cause text
    pub fn into_load_failed(self) -> Error {
        match self {
            Error::LoadFailed(_) => self,
            other => Error::LoadFailed(other.to_string()),
        }
    }

    /// Wraps this error as an unload failure, keeping the cause text
    pub fn into_unload_failed(self) -> Error {
        match self {
            Error::UnloadFailed(_) => self,
            other => Error::UnloadFailed(other.to_string()),
        }
    }

    fn with_prefix(self, prefix: &str) -> Error {
        let wrap = |msg: String| format!("{}: {}", prefix, msg);
        match self {
            Error::InvalidArgument(msg) => Error::InvalidArgument(wrap(msg)),
            Error::InvalidState(msg) => Error::InvalidState(wrap(msg)),
            Error::HandleNotFound(msg) => Error::HandleNotFound(wrap(msg)),
            Error::AlreadyExists(msg) => Error::AlreadyExists(wrap(msg)),
            Error::OutOfMemory => Error::OutOfMemory,
            Error::TableFull(msg) => Error::TableFull(wrap(msg)),
            Error::AddressTranslationFailed(msg) => Error::AddressTranslationFailed(wrap(msg)),
            Error::MapFailed(msg) => Error::MapFailed(wrap(msg)),
            Error::UnmapFailed(msg) => Error::UnmapFailed(wrap(msg)),
            Error::BackendOperationFailed(msg) => Error::BackendOperationFailed(wrap(msg)),
            Error::NotImplemented(msg) => Error::NotImplemented(wrap(msg)),
            Error::LoadFailed(msg) => Error::LoadFailed(wrap(msg)),
            Error::UnloadFailed(msg) => Error::UnloadFailed(wrap(msg)),
            Error::IoError(msg) => Error::IoError(wrap(msg)),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            Error::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            Error::HandleNotFound(msg) => write!(f, "Handle not found: {}", msg),
            Error::AlreadyExists(msg) => write!(f, "Already exists: {}", msg),
            Error::OutOfMemory => write!(f, "Out of memory"),
            Error::TableFull(msg) => write!(f, "Table full: {}", msg),
            Error::AddressTranslationFailed(msg) => write!(f, "Address translation failed: {}", msg),
            Error::MapFailed(msg) => write!(f, "Map failed: {}", msg),
            Error::UnmapFailed(msg) => write!(f, "Unmap failed: {}", msg),
            Error::BackendOperationFailed(msg) => write!(f, "Backend operation failed: {}", msg),
            Error::NotImplemented(msg) => write!(f, "Not implemented: {}", msg),
            Error::LoadFailed(msg) => write!(f, "Load failed: {}", msg),
            Error::UnloadFailed(msg) => write!(f, "Unload failed: {}", msg),
            Error::IoError(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl core::error::Error for Error {}

/// Result type for operations that can fail
pub type Result<T> = core::result::Result<T, Error>;

/// Error context trait for adding context to errors
pub trait ErrorContext<T> {
    /// Prefixes the error message with `context`, keeping the error kind
    fn context(self, context: &str) -> Result<T>;
}

impl<T> ErrorContext<T> for Result<T> {
    fn context(self, context: &str) -> Result<T> {
        self.map_err(|error| error.with_prefix(context))
    }
}

/// Accumulates the outcome of best-effort teardown steps.
///
/// Every step is recorded; [`FirstError::finish`] reports the first
/// failure seen, or success when all steps passed.
#[derive(Debug, Default)]
pub struct FirstError {
    first: Option<Error>,
    failures: usize,
}

impl FirstError {
    /// Creates an empty accumulator
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the outcome of one step, returning its value on success
    pub fn record<T>(&mut self, result: Result<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(error) => {
                self.failures += 1;
                if self.first.is_none() {
                    self.first = Some(error);
                }
                None
            }
        }
    }

    /// Number of failed steps recorded so far
    pub fn failures(&self) -> usize {
        self.failures
    }

    /// Returns true if no step has failed yet
    pub fn is_ok(&self) -> bool {
        self.first.is_none()
    }

    /// Finishes the teardown, returning the first failure
    pub fn finish(self) -> Result<()> {
        match self.first {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// Creates a new invalid argument error
pub fn invalid_argument(msg: &str) -> Error {
    Error::InvalidArgument(msg.to_string())
}

/// Creates a new invalid state error
pub fn invalid_state(msg: &str) -> Error {
    Error::InvalidState(msg.to_string())
}

/// Creates a new handle not found error
pub fn handle_not_found(msg: &str) -> Error {
    Error::HandleNotFound(msg.to_string())
}

/// Creates a new already exists error
pub fn already_exists(msg: &str) -> Error {
    Error::AlreadyExists(msg.to_string())
}

/// Creates a new out of memory error
pub fn out_of_memory() -> Error {
    Error::OutOfMemory
}

/// Creates a new table full error
pub fn table_full(msg: &str) -> Error {
    Error::TableFull(msg.to_string())
}

/// Creates a new address translation error
pub fn translation_failed(msg: &str) -> Error {
    Error::AddressTranslationFailed(msg.to_string())
}

/// Creates a new map failed error
pub fn map_failed(msg: &str) -> Error {
    Error::MapFailed(msg.to_string())
}

/// Creates a new unmap failed error
pub fn unmap_failed(msg: &str) -> Error {
    Error::UnmapFailed(msg.to_string())
}

/// Creates a new backend operation error
pub fn backend_failed(msg: &str) -> Error {
    Error::BackendOperationFailed(msg.to_string())
}

/// Creates a new not implemented error
pub fn not_implemented(msg: &str) -> Error {
    Error::NotImplemented(msg.to_string())
}

/// Creates a new IO error
pub fn io_error(msg: &str) -> Error {
    Error::IoError(msg.to_string())
}
