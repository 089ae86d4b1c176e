//! Kernel errors.
//!
//! C header: [`include/uapi/asm-generic/errno-base.h`](../../../include/uapi/asm-generic/errno-base.h)

use alloc::collections::TryReserveError;
use core::{fmt, fmt::Debug, num::TryFromIntError, str::Utf8Error};

use crate::pr_warn;

/// Largest errno value the kernel hands back through a negative return code.
pub const MAX_ERRNO: u32 = 4095;

pub type KernelResult<T = ()> = Result<T, Error>;

/// Generic integer kernel error.
///
/// The kernel defines a set of integer error codes that are returned by
/// functions to indicate what went wrong.
///
/// # Invariants
///
/// The value is a valid `errno` (i.e. `>= -MAX_ERRNO && < 0`).
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Error(core::ffi::c_int);

impl Error {
    /// Creates an [`Error`] from a kernel error code.
    ///
    /// It is a bug to pass an out-of-range `errno`. `EINVAL` would
    /// be returned in such a case.
    pub fn from_errno(errno: core::ffi::c_int) -> Error {
        if errno < -(MAX_ERRNO as i32) || errno >= 0 {
            pr_warn!(
                "attempted to create `Error` with out of range `errno`: {}",
                errno
            );
            return linux_err::EINVAL;
        }
        // INVARIANT: The check above ensures the type invariant
        // will hold.
        Error(errno)
    }

    /// Returns the kernel error code.
    pub fn to_errno(self) -> core::ffi::c_int {
        self.0
    }

    /// Returns a string representing the error, if one exists.
    pub fn name(&self) -> Option<&'static str> {
        linux_err::errname(-self.0)
    }
}

impl Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            // Print out number if no name can be found.
            None => f.debug_tuple("Error").field(&-self.0).finish(),
            Some(name) => f.debug_tuple(name).finish(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match linux_err::describe(-self.0) {
            Some(desc) => write!(f, "{} ({})", desc, -self.0),
            None => write!(f, "error {}", -self.0),
        }
    }
}

/// Contains the C-compatible error codes.
#[rustfmt::skip]
#[allow(unused)]
pub mod linux_err {
    macro_rules! declare_err {
        ($err:tt, $num:literal, $($doc:expr),+ $(,)?) => {
            $(
            #[doc = $doc]
            )*
            pub const $err: super::Error = super::Error(-$num);
        };
    }

    macro_rules! errno_table {
        ($(($err:ident, $num:literal, $doc:expr)),* $(,)?) => {
            $(declare_err!($err, $num, $doc);)*

            /// Returns the symbolic name of a positive errno.
            pub(crate) fn errname(errno: core::ffi::c_int) -> Option<&'static str> {
                match errno {
                    $($num => Some(stringify!($err)),)*
                    _ => None,
                }
            }

            /// Returns the human readable description of a positive errno.
            pub(crate) fn describe(errno: core::ffi::c_int) -> Option<&'static str> {
                match errno {
                    $($num => Some($doc),)*
                    _ => None,
                }
            }
        };
    }

    errno_table! {
        (EPERM, 1, "Operation not permitted."),
        (ENOENT, 2, "No such file or directory."),
        (ESRCH, 3, "No such process."),
        (EINTR, 4, "Interrupted system call."),
        (EIO, 5, "I/O error."),
        (ENXIO, 6, "No such device or address."),
        (E2BIG, 7, "Argument list too long."),
        (ENOEXEC, 8, "Exec format error."),
        (EBADF, 9, "Bad file number."),
        (ECHILD, 10, "No child processes."),
        (EAGAIN, 11, "Try again."),
        (ENOMEM, 12, "Out of memory."),
        (EACCES, 13, "Permission denied."),
        (EFAULT, 14, "Bad address."),
        (ENOTBLK, 15, "Block device required."),
        (EBUSY, 16, "Device or resource busy."),
        (EEXIST, 17, "File exists."),
        (EXDEV, 18, "Cross-device link."),
        (ENODEV, 19, "No such device."),
        (ENOTDIR, 20, "Not a directory."),
        (EISDIR, 21, "Is a directory."),
        (EINVAL, 22, "Invalid argument."),
        (ENFILE, 23, "File table overflow."),
        (EMFILE, 24, "Too many open files."),
        (ENOTTY, 25, "Not a typewriter."),
        (ETXTBSY, 26, "Text file busy."),
        (EFBIG, 27, "File too large."),
        (ENOSPC, 28, "No space left on device."),
        (ESPIPE, 29, "Illegal seek."),
        (EROFS, 30, "Read-only file system."),
        (EMLINK, 31, "Too many links."),
        (EPIPE, 32, "Broken pipe."),
        (EDOM, 33, "Math argument out of domain of func."),
        (ERANGE, 34, "Math result not representable."),
    }
}

impl From<TryReserveError> for Error {
    fn from(_: TryReserveError) -> Error {
        linux_err::ENOMEM
    }
}

impl From<TryFromIntError> for Error {
    fn from(_: TryFromIntError) -> Error {
        linux_err::EINVAL
    }
}

impl From<Utf8Error> for Error {
    fn from(_: Utf8Error) -> Error {
        linux_err::EINVAL
    }
}

impl From<fmt::Error> for Error {
    fn from(_: fmt::Error) -> Error {
        linux_err::EINVAL
    }
}

impl From<core::convert::Infallible> for Error {
    fn from(e: core::convert::Infallible) -> Error {
        match e {}
    }
}

#[cfg(feature = "std")]
impl From<Error> for std::io::Error {
    fn from(e: Error) -> std::io::Error {
        std::io::Error::from_raw_os_error(-e.to_errno())
    }
}

#[cfg(test)]
mod tests {
    use super::{linux_err::*, *};

    #[test]
    fn errno_values_match_linux() {
        assert_eq!(EINVAL.to_errno(), -22);
        assert_eq!(ENOMEM.to_errno(), -12);
        assert_eq!(EFAULT.to_errno(), -14);
        assert_eq!(ESPIPE.to_errno(), -29);
    }

    #[test]
    fn out_of_range_errno_becomes_einval() {
        assert_eq!(Error::from_errno(0), EINVAL);
        assert_eq!(Error::from_errno(5), EINVAL);
        assert_eq!(Error::from_errno(-5000), EINVAL);
        assert_eq!(Error::from_errno(-16), EBUSY);
    }

    #[test]
    fn debug_prints_symbolic_name() {
        assert_eq!(alloc::format!("{:?}", EFAULT), "EFAULT");
        assert_eq!(alloc::format!("{:?}", Error::from_errno(-300)), "Error(300)");
        assert_eq!(alloc::format!("{}", ENOMEM), "Out of memory. (12)");
    }

    #[test]
    fn conversions() {
        let e: Error = u8::try_from(300u32).unwrap_err().into();
        assert_eq!(e, EINVAL);
    }
}
