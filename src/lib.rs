//! Userspace USB device access for Linux.
//!
//! `usbio` talks to devices through the kernel's usbfs interface: a
//! [Context] enumerates the bus (`/sys` and `/dev/bus/usb`), a [Device]
//! answers descriptor queries from the kernel's cached copies without
//! touching the bus, and a [DeviceHandle] performs synchronous control,
//! bulk, and interrupt transfers.
//!
//! ```no_run
//! use usbio::Context;
//!
//! # fn main() -> usbio::UsbResult<()> {
//! let context = Context::new()?;
//! for device in context.devices()? {
//!     let descriptor = device.device_descriptor()?;
//!     println!(
//!         "{:03}:{:03} {:04x}:{:04x}",
//!         device.bus_number(),
//!         device.address(),
//!         descriptor.vendor_id,
//!         descriptor.product_id,
//!     );
//! }
//! # Ok(())
//! # }
//! ```

use log::warn;

pub mod bcd;
pub mod bits;
pub mod descriptor;
pub mod request;

mod backend;
mod context;
mod device;
mod error;
mod ffi;
mod io;

pub use context::{Context, Verbosity};
pub use device::{Device, DeviceHandle};
pub use error::Error;
pub use io::DeviceStatus;

/// The result type for all fallible USB operations in this crate.
pub type UsbResult<T> = Result<T, Error>;

/// Finds the first device matching `vendor_id`/`product_id` and opens it.
/// Returns `Ok(None)` if no attached device matches.
///
/// A convenience for tools that target one known device; enumerate with
/// [Context::devices] when you need to distinguish multiple matches.
pub fn open_device_with_vid_pid(
    context: &Context,
    vendor_id: u16,
    product_id: u16,
) -> UsbResult<Option<DeviceHandle>> {
    for device in context.devices()? {
        let descriptor = match device.device_descriptor() {
            Ok(descriptor) => descriptor,
            Err(e) => {
                warn!(
                    "skipping device at bus {:03} address {:03} with an unreadable \
                     device descriptor: {}",
                    device.bus_number(),
                    device.address(),
                    e,
                );
                continue;
            }
        };
        if descriptor.vendor_id == vendor_id && descriptor.product_id == product_id {
            return device.open().map(Some);
        }
    }
    Ok(None)
}
