//! The error taxonomy for USB operations, and the single mapping point from
//! native usbfs status codes into it.

use std::io;

use nix::errno::Errno;
use thiserror::Error;

/// The closed set of failures a USB operation can produce.
///
/// Every fallible operation in this crate reports one of these variants;
/// native errnos are translated through [`Error::try_from_errno`] and nowhere
/// else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum Error {
    /// Input/output error.
    #[error("input/output error")]
    Io,

    /// Invalid parameter.
    #[error("invalid parameter")]
    InvalidParam,

    /// Access denied (insufficient permissions).
    #[error("access denied (insufficient permissions)")]
    Access,

    /// No such device (it may have been disconnected).
    #[error("no such device (it may have been disconnected)")]
    NoDevice,

    /// Entity not found.
    #[error("entity not found")]
    NotFound,

    /// Resource busy.
    #[error("resource busy")]
    Busy,

    /// Operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// The device sent more data than the transfer buffer could hold.
    #[error("overflow")]
    Overflow,

    /// Pipe error: the endpoint is halted/stalled.
    #[error("pipe error (endpoint stalled)")]
    Pipe,

    /// A system call was interrupted.
    #[error("system call interrupted")]
    Interrupted,

    /// Insufficient memory.
    #[error("insufficient memory")]
    NoMem,

    /// Operation not supported on this platform.
    #[error("operation not supported or unimplemented")]
    NotSupported,

    /// Other error.
    #[error("other error")]
    Other,
}

impl Error {
    /// Translates a usbfs errno through the fixed error table.
    ///
    /// Returns `None` for codes outside the table. The synchronous call paths
    /// never produce such a code, so `None` indicates either a kernel ABI
    /// change or a bug in this crate; see [`Error::from_errno`].
    pub fn try_from_errno(errno: Errno) -> Option<Error> {
        let error = match errno {
            Errno::EIO | Errno::EPROTO | Errno::EILSEQ | Errno::ECOMM | Errno::ENOSR => Error::Io,
            Errno::EINVAL => Error::InvalidParam,
            Errno::EACCES | Errno::EPERM => Error::Access,
            Errno::ENODEV | Errno::ESHUTDOWN => Error::NoDevice,
            Errno::ENOENT | Errno::ENODATA => Error::NotFound,
            Errno::EBUSY => Error::Busy,
            Errno::ETIMEDOUT | Errno::ETIME => Error::Timeout,
            Errno::EOVERFLOW => Error::Overflow,
            Errno::EPIPE => Error::Pipe,
            Errno::EINTR | Errno::ECONNRESET => Error::Interrupted,
            Errno::ENOMEM => Error::NoMem,
            Errno::ENOSYS | Errno::EOPNOTSUPP => Error::NotSupported,
            Errno::ENOSPC | Errno::EXDEV => Error::Other,
            _ => return None,
        };
        Some(error)
    }

    /// Translates a usbfs errno, treating anything outside the table as an
    /// unrecoverable library-invariant violation.
    ///
    /// # Panics
    ///
    /// Panics on a code absent from the table. Such a code is deliberately
    /// not folded into [`Error::Other`]: it means the native layer returned
    /// something this crate's mapping does not know about.
    pub(crate) fn from_errno(errno: Errno) -> Error {
        match Error::try_from_errno(errno) {
            Some(error) => error,
            None => panic!(
                "usbfs returned errno {errno} which is not in the USB error table; \
                 this is a bug in usbio or a kernel ABI change",
            ),
        }
    }
}

/// Lenient conversion for filesystem errors hit while enumerating devices or
/// opening device nodes. Unlike the transfer paths, these surfaces are allowed
/// to produce arbitrary OS errors, so unknown codes become [`Error::Other`]
/// instead of being treated as fatal.
impl From<io::Error> for Error {
    fn from(error: io::Error) -> Self {
        error
            .raw_os_error()
            .map(Errno::from_i32)
            .and_then(Error::try_from_errno)
            .unwrap_or(Error::Other)
    }
}
