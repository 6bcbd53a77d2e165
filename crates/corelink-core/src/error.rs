//! Error taxonomy shared by every control-plane operation.
//!
//! Every operation returns one of the [`IpcError`] kinds rather than a bare
//! success flag. [`IpcError::status()`] maps each kind onto the numeric
//! [`Status`] reported back to the host, where `0` means success.

use thiserror::Error;

/// Errors produced by the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum IpcError {
    /// The id is well formed but does not resolve to a live object.
    #[error("resource not found")]
    ResourceNotFound,

    /// An object with this id already exists.
    #[error("resource already exists")]
    ResourceAlreadyExists,

    /// The allocator could not satisfy the request.
    #[error("out of memory")]
    OutOfMemory,

    /// The operation is semantically illegal (e.g. rewiring inside a pipeline).
    #[error("invalid request")]
    InvalidRequest,

    /// The object is not in a state that permits the operation.
    #[error("invalid resource state")]
    InvalidResourceState,

    /// The id is malformed, foreign, or names a missing bind endpoint.
    #[error("invalid resource id")]
    InvalidResourceId,

    /// The component is not quiescent.
    #[error("component in bad state")]
    BadState,

    /// Bookkeeping for a registered object could not be allocated; the
    /// control plane refuses all further commands.
    #[error("fatal: {0}")]
    Fatal(&'static str),
}

/// Numeric status returned to the host for a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Status {
    /// Command completed.
    Success = 0,
    /// See [`IpcError::OutOfMemory`].
    OutOfMemory = 3,
    /// See [`IpcError::InvalidRequest`].
    InvalidRequest = 7,
    /// See [`IpcError::InvalidResourceId`].
    InvalidResourceId = 9,
    /// See [`IpcError::ResourceAlreadyExists`].
    ResourceAlreadyExists = 10,
    /// See [`IpcError::InvalidResourceState`].
    InvalidResourceState = 12,
    /// See [`IpcError::ResourceNotFound`].
    ResourceNotFound = 15,
    /// See [`IpcError::BadState`].
    BadState = 18,
    /// See [`IpcError::Fatal`].
    Fatal = 255,
}

impl Status {
    /// Returns the raw status code.
    #[inline]
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Status of a finished operation.
    pub fn from_result(result: Result<(), IpcError>) -> Self {
        match result {
            Ok(()) => Status::Success,
            Err(e) => e.status(),
        }
    }
}

impl IpcError {
    /// Returns the wire status for this error.
    pub const fn status(self) -> Status {
        match self {
            IpcError::ResourceNotFound => Status::ResourceNotFound,
            IpcError::ResourceAlreadyExists => Status::ResourceAlreadyExists,
            IpcError::OutOfMemory => Status::OutOfMemory,
            IpcError::InvalidRequest => Status::InvalidRequest,
            IpcError::InvalidResourceState => Status::InvalidResourceState,
            IpcError::InvalidResourceId => Status::InvalidResourceId,
            IpcError::BadState => Status::BadState,
            IpcError::Fatal(_) => Status::Fatal,
        }
    }

    /// True for the one condition that halts the control plane.
    pub const fn is_fatal(self) -> bool {
        matches!(self, IpcError::Fatal(_))
    }
}

impl core::fmt::Display for Status {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:?}({})", self, self.code())
    }
}
