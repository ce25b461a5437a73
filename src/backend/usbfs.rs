//! Hand-written definitions for the Linux usbfs ioctl interface
//! (`<linux/usbdevice_fs.h>`), plus the funnel that routes every native
//! status code through the error table.

#![allow(non_camel_case_types)]

use libc::{c_char, c_int, c_uint, c_void};
use nix::{ioctl_none, ioctl_read, ioctl_readwrite, ioctl_write_ptr, request_code_none};

use crate::{Error, UsbResult};

/// `struct usbdevfs_ctrltransfer`: a synchronous control transfer.
#[repr(C)]
#[allow(non_snake_case)]
pub(crate) struct usbdevfs_ctrltransfer {
    pub bRequestType: u8,
    pub bRequest: u8,
    pub wValue: u16,
    pub wIndex: u16,
    pub wLength: u16,
    /// Milliseconds; 0 means no timeout.
    pub timeout: u32,
    pub data: *mut c_void,
}

/// `struct usbdevfs_bulktransfer`: a synchronous bulk or interrupt transfer.
/// The kernel routes by the endpoint's transfer type.
#[repr(C)]
pub(crate) struct usbdevfs_bulktransfer {
    pub ep: c_uint,
    pub len: c_uint,
    /// Milliseconds; 0 means no timeout.
    pub timeout: c_uint,
    pub data: *mut c_void,
}

/// `struct usbdevfs_setinterface`: selects an alternate setting.
#[repr(C)]
pub(crate) struct usbdevfs_setinterface {
    pub interface: c_uint,
    pub altsetting: c_uint,
}

pub(crate) const USBDEVFS_MAXDRIVERNAME: usize = 255;

/// `struct usbdevfs_getdriver`: queries the kernel driver bound to an
/// interface. The kernel fills in `driver` despite the `_IOW` encoding of
/// the request number.
#[repr(C)]
pub(crate) struct usbdevfs_getdriver {
    pub interface: c_uint,
    pub driver: [c_char; USBDEVFS_MAXDRIVERNAME + 1],
}

/// `struct usbdevfs_ioctl`: forwards a sub-ioctl to the driver bound to an
/// interface; with [`USBDEVFS_DISCONNECT`]/[`USBDEVFS_CONNECT`] codes it
/// detaches/reattaches that driver.
#[repr(C)]
pub(crate) struct usbdevfs_ioctl {
    pub ifno: c_int,
    pub ioctl_code: c_int,
    pub data: *mut c_void,
}

ioctl_readwrite!(usbdevfs_control, b'U', 0, usbdevfs_ctrltransfer);
ioctl_readwrite!(usbdevfs_bulk, b'U', 2, usbdevfs_bulktransfer);
ioctl_read!(usbdevfs_setinterface, b'U', 4, usbdevfs_setinterface);
ioctl_read!(usbdevfs_setconfiguration, b'U', 5, c_int);
ioctl_write_ptr!(usbdevfs_getdriver, b'U', 8, usbdevfs_getdriver);
ioctl_read!(usbdevfs_claiminterface, b'U', 15, c_uint);
ioctl_read!(usbdevfs_releaseinterface, b'U', 16, c_uint);
ioctl_readwrite!(usbdevfs_ioctl, b'U', 18, usbdevfs_ioctl);
ioctl_none!(usbdevfs_reset, b'U', 20);
ioctl_read!(usbdevfs_clear_halt, b'U', 21, c_uint);

/// Sub-ioctl code for [`usbdevfs_ioctl`]: unbind the kernel driver from an
/// interface.
pub(crate) const USBDEVFS_DISCONNECT: c_int = request_code_none!(b'U', 22) as c_int;
/// Sub-ioctl code for [`usbdevfs_ioctl`]: rebind the kernel driver to an
/// interface.
pub(crate) const USBDEVFS_CONNECT: c_int = request_code_none!(b'U', 23) as c_int;

/// Routes a usbfs ioctl result through the error table. Success codes (the
/// transferred byte count for transfer ioctls, 0 for the management ones)
/// pass through untouched.
pub(crate) fn check(result: nix::Result<c_int>) -> UsbResult<c_int> {
    result.map_err(Error::from_errno)
}

pub(crate) fn nix_result_to_code<T>(result: &nix::Result<T>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(e) => *e as i32,
    }
}

/// Performs an IOCTL and logs the result code with [log::debug] or a
/// specified [log::Level], specified with
/// `ioctl_log!(ioctl_func, fd, arg, loglevel: log::Level::Warn)`.
macro_rules! ioctl_log {
    ($ioctl_func:expr, $fd:expr, $arg:expr, loglevel: $loglevel:expr) => {{
        let res = $ioctl_func($fd, $arg);
        let ret_code = $crate::backend::usbfs::nix_result_to_code(&res);
        let short_ioctl_name = core::stringify!($ioctl_func);
        // HACK: strip the module name this will usually be qualified with :)
        let short_ioctl_name = match short_ioctl_name.strip_prefix("usbfs::") {
            Some(s) => s.to_ascii_uppercase(),
            None => short_ioctl_name.to_ascii_uppercase(),
        };
        log::log!($loglevel, "{} ioctl ret = {}", short_ioctl_name, ret_code);
        res
    }};
    ($ioctl_func:expr, $fd:expr, $arg:expr) => {{
        $crate::backend::usbfs::ioctl_log!($ioctl_func, $fd, $arg, loglevel: log::Level::Debug)
    }};
}

pub(crate) use ioctl_log;
