//! The native layer: the Linux usbfs ioctl interface.

pub(crate) mod usbfs;
