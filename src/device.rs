//! Devices, device handles, and the scoped acquire/release helpers around
//! them.

use std::{
    collections::HashSet,
    ffi::CStr,
    fmt,
    fs::File,
    os::fd::AsRawFd,
    path::PathBuf,
    ptr,
    sync::Arc,
};

use libc::{c_int, c_uint};
use log::{debug, warn};
use nix::errno::Errno;

use crate::{
    backend::usbfs::{self, check, ioctl_log},
    context::{read_sysfs_attr, ContextShared},
    descriptor::{self, ConfigDescriptor, DeviceDescriptor},
    request::{self, request_type, Direction, Recipient, RequestType},
    Error, UsbResult,
};

struct DeviceInner {
    /// Keeps the session alive for as long as any device derived from it.
    context: Arc<ContextShared>,
    bus_number: u8,
    address: u8,
    /// The device's sysfs directory, when it was enumerated through the
    /// sysfs. Enables non-blocking configuration lookups.
    sysfs_path: Option<PathBuf>,
    /// The kernel's cached descriptor chain: the device descriptor followed
    /// by every configuration's full descriptor run.
    descriptors: Vec<u8>,
}

/// An enumerated, not-yet-opened USB device.
///
/// `Device` is a shared reference: cloning it is cheap and every clone
/// refers to the same device node. Descriptor queries are served from the
/// kernel's cached copy and cause no bus traffic.
#[derive(Clone)]
pub struct Device {
    inner: Arc<DeviceInner>,
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("bus_number", &self.inner.bus_number)
            .field("address", &self.inner.address)
            .finish()
    }
}

impl Device {
    pub(crate) fn new(
        context: Arc<ContextShared>,
        bus_number: u8,
        address: u8,
        sysfs_path: Option<PathBuf>,
        descriptors: Vec<u8>,
    ) -> Self {
        Device {
            inner: Arc::new(DeviceInner {
                context,
                bus_number,
                address,
                sysfs_path,
                descriptors,
            }),
        }
    }

    /// The number of the bus this device is attached to.
    pub fn bus_number(&self) -> u8 {
        self.inner.bus_number
    }

    /// The device's address on its bus.
    pub fn address(&self) -> u8 {
        self.inner.address
    }

    /// The device's standard 18-byte device descriptor.
    pub fn device_descriptor(&self) -> UsbResult<DeviceDescriptor> {
        descriptor::parse_device_descriptor(&self.inner.descriptors)
    }

    /// The configuration descriptor at position `index` in the device's
    /// configuration list (*not* the configuration's value). Fails with
    /// [Error::NotFound] if the device has no such configuration.
    pub fn config_descriptor(&self, index: u8) -> UsbResult<ConfigDescriptor> {
        let blobs = descriptor::config_blobs(&self.inner.descriptors)?;
        match blobs.get(index as usize) {
            Some(blob) => descriptor::parse_config_descriptor(blob),
            None => Err(Error::NotFound),
        }
    }

    /// The configuration descriptor whose `bConfigurationValue` equals
    /// `value`. Fails with [Error::NotFound] if the device has no such
    /// configuration.
    pub fn config_descriptor_by_value(&self, value: u8) -> UsbResult<ConfigDescriptor> {
        let blobs = descriptor::config_blobs(&self.inner.descriptors)?;
        for blob in blobs {
            // bConfigurationValue sits at offset 5 of the fixed part.
            if blob[5] == value {
                return descriptor::parse_config_descriptor(blob);
            }
        }
        Err(Error::NotFound)
    }

    /// The configuration descriptor of the currently active configuration.
    ///
    /// Served from the sysfs when this device was enumerated through it
    /// (non-blocking); otherwise the device is briefly opened and asked with
    /// a blocking GET_CONFIGURATION request. Fails with [Error::NotFound] if
    /// the device is unconfigured.
    pub fn active_config_descriptor(&self) -> UsbResult<ConfigDescriptor> {
        let value = match self.cached_configuration() {
            Some(value) => value,
            None => self.open()?.configuration()?,
        };
        match value {
            Some(value) => self.config_descriptor_by_value(value),
            None => Err(Error::NotFound),
        }
    }

    /// The active configuration value as the sysfs reports it: `None` if
    /// this device has no sysfs view, `Some(None)` if the device is
    /// unconfigured (the attribute exists but is empty).
    pub(crate) fn cached_configuration(&self) -> Option<Option<u8>> {
        let sysfs = self.inner.sysfs_path.as_ref()?;
        let attr = read_sysfs_attr(sysfs.join("bConfigurationValue")).ok()?;
        if attr.is_empty() {
            return Some(None);
        }
        attr.parse::<u8>().ok().map(Some)
    }

    fn devfs_node_path(&self) -> PathBuf {
        self.inner.context.devfs_root.join(format!(
            "bus/usb/{:03}/{:03}",
            self.inner.bus_number, self.inner.address,
        ))
    }

    /// Opens the device for I/O. Opening causes no bus traffic.
    ///
    /// The returned [DeviceHandle] closes the device when dropped, so it is
    /// closed exactly once on every exit path; prefer [Device::with_handle]
    /// where the handle's lifetime matches a lexical scope.
    pub fn open(&self) -> UsbResult<DeviceHandle> {
        let node = self.devfs_node_path();
        let file = File::options()
            .read(true)
            .write(true)
            .open(&node)
            .map_err(|e| match e.raw_os_error() {
                // The node vanishing out from under an enumerated device
                // means the device is gone, not merely "not found".
                Some(code) if code == Errno::ENOENT as i32 => Error::NoDevice,
                _ => Error::from(e),
            })?;

        debug!("opened device node {}", node.display());

        Ok(DeviceHandle {
            device: self.clone(),
            file,
            claimed: HashSet::new(),
        })
    }

    /// Opens the device, runs `action` with the handle, and closes the
    /// handle on every exit path.
    pub fn with_handle<T, F>(&self, action: F) -> UsbResult<T>
    where
        F: FnOnce(&mut DeviceHandle) -> UsbResult<T>,
    {
        let mut handle = self.open()?;
        action(&mut handle)
    }
}

/// An open channel to a USB device.
///
/// A handle is move-only: it cannot be cloned, and dropping it closes the
/// device node (releasing any interfaces still claimed through it first).
pub struct DeviceHandle {
    device: Device,
    pub(crate) file: File,
    claimed: HashSet<u8>,
}

impl fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("device", &self.device)
            .field("claimed", &self.claimed)
            .finish()
    }
}

impl DeviceHandle {
    /// The device this handle talks to.
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Claims an interface, making its endpoints usable through this
    /// handle. Non-blocking; claiming an interface this handle already
    /// holds succeeds silently.
    pub fn claim_interface(&mut self, interface: u8) -> UsbResult<()> {
        let fd = self.file.as_raw_fd();
        let mut native = interface as c_uint;
        check(unsafe { ioctl_log!(usbfs::usbdevfs_claiminterface, fd, &mut native) })?;
        self.claimed.insert(interface);
        Ok(())
    }

    /// Releases a previously claimed interface. This blocks: the kernel
    /// issues a SET_INTERFACE back to alternate setting 0 as part of the
    /// release. Fails with [Error::NotFound] if this handle does not
    /// currently hold the interface.
    pub fn release_interface(&mut self, interface: u8) -> UsbResult<()> {
        let fd = self.file.as_raw_fd();
        release_claim(&mut self.claimed, interface, || {
            let mut native = interface as c_uint;
            check(unsafe { ioctl_log!(usbfs::usbdevfs_releaseinterface, fd, &mut native) })?;
            Ok(())
        })
    }

    /// Claims `interface`, runs `action`, and releases the interface on
    /// every exit path. If both the action and the release fail, the
    /// action's error is returned and the release failure is logged.
    pub fn with_claimed_interface<T, F>(&mut self, interface: u8, action: F) -> UsbResult<T>
    where
        F: FnOnce(&mut DeviceHandle) -> UsbResult<T>,
    {
        self.claim_interface(interface)?;
        let primary = action(self);
        let cleanup = self.release_interface(interface);
        join_cleanup(primary, cleanup)
    }

    /// Whether a kernel driver (other than the usbfs itself) is currently
    /// bound to `interface`. Blocking.
    pub fn kernel_driver_active(&self, interface: u8) -> UsbResult<bool> {
        let fd = self.file.as_raw_fd();
        let mut getdriver = usbfs::usbdevfs_getdriver {
            interface: interface as c_uint,
            driver: [0; usbfs::USBDEVFS_MAXDRIVERNAME + 1],
        };

        // The kernel fills in the driver name even though the request number
        // is encoded _IOW; hence the cast from a mutable borrow.
        let res = unsafe {
            ioctl_log!(
                usbfs::usbdevfs_getdriver,
                fd,
                &mut getdriver as *mut usbfs::usbdevfs_getdriver as *const _
            )
        };
        match res {
            Ok(_) => {
                let name = unsafe { CStr::from_ptr(getdriver.driver.as_ptr()) };
                // The usbfs showing up as the bound driver means the
                // interface is claimed through usbfs, not by a kernel
                // driver proper.
                Ok(name.to_bytes() != b"usbfs")
            }
            Err(Errno::ENODATA) => Ok(false),
            Err(errno) => Err(Error::from_errno(errno)),
        }
    }

    /// Detaches the kernel driver bound to `interface`, allowing it to be
    /// claimed through this handle.
    pub fn detach_kernel_driver(&mut self, interface: u8) -> UsbResult<()> {
        self.driver_ioctl(interface, usbfs::USBDEVFS_DISCONNECT)
    }

    /// Reattaches the kernel driver for `interface`, undoing
    /// [DeviceHandle::detach_kernel_driver].
    pub fn attach_kernel_driver(&mut self, interface: u8) -> UsbResult<()> {
        self.driver_ioctl(interface, usbfs::USBDEVFS_CONNECT)
    }

    fn driver_ioctl(&mut self, interface: u8, code: c_int) -> UsbResult<()> {
        let fd = self.file.as_raw_fd();
        let mut command = usbfs::usbdevfs_ioctl {
            ifno: interface as c_int,
            ioctl_code: code,
            data: ptr::null_mut(),
        };
        check(unsafe { ioctl_log!(usbfs::usbdevfs_ioctl, fd, &mut command) })?;
        Ok(())
    }

    /// If a kernel driver is bound to `interface`, detaches it, runs
    /// `action`, and reattaches it on every exit path; otherwise just runs
    /// `action`. A reattach failure after a failed action is logged rather
    /// than allowed to mask the action's own error.
    pub fn with_detached_kernel_driver<T, F>(&mut self, interface: u8, action: F) -> UsbResult<T>
    where
        F: FnOnce(&mut DeviceHandle) -> UsbResult<T>,
    {
        if !self.kernel_driver_active(interface)? {
            return action(self);
        }

        self.detach_kernel_driver(interface)?;
        let primary = action(self);
        let cleanup = self.attach_kernel_driver(interface);
        join_cleanup(primary, cleanup)
    }

    /// Selects an alternate setting for a (claimed) interface. Blocking.
    pub fn set_interface_alt_setting(
        &mut self,
        interface: u8,
        alternate_setting: u8,
    ) -> UsbResult<()> {
        let fd = self.file.as_raw_fd();
        let mut setting = usbfs::usbdevfs_setinterface {
            interface: interface as c_uint,
            altsetting: alternate_setting as c_uint,
        };
        check(unsafe { ioctl_log!(usbfs::usbdevfs_setinterface, fd, &mut setting) })?;
        Ok(())
    }

    /// Clears the halt/stall condition on an endpoint.
    pub fn clear_halt(&mut self, endpoint: u8) -> UsbResult<()> {
        let fd = self.file.as_raw_fd();
        let mut native = endpoint as c_uint;
        check(unsafe { ioctl_log!(usbfs::usbdevfs_clear_halt, fd, &mut native) })?;
        Ok(())
    }

    /// Performs a USB port reset on the device.
    ///
    /// If the reset succeeds but the device re-enumerates differently, this
    /// handle is stale and operations on it will fail with
    /// [Error::NoDevice]; re-enumerate and reopen in that case.
    pub fn reset(&mut self) -> UsbResult<()> {
        let fd = self.file.as_raw_fd();
        let res = unsafe { usbfs::usbdevfs_reset(fd) };
        debug!("USBDEVFS_RESET ioctl ret = {}", usbfs::nix_result_to_code(&res));
        check(res)?;
        Ok(())
    }

    /// The value of the currently active configuration, or `None` if the
    /// device is unconfigured.
    ///
    /// This may be served from the kernel's cached view (non-blocking) or
    /// require a blocking GET_CONFIGURATION control transfer if no cached
    /// view is available; callers must not assume non-blocking behavior.
    pub fn configuration(&self) -> UsbResult<Option<u8>> {
        if let Some(cached) = self.device.cached_configuration() {
            return Ok(cached);
        }

        let mut value = [0u8; 1];
        let n = self.read_control(
            request_type(Direction::In, RequestType::Standard, Recipient::Device),
            request::GET_CONFIGURATION,
            0,
            0,
            &mut value,
            Some(crate::io::DEFAULT_REQUEST_TIMEOUT),
        )?;
        if n < 1 {
            return Err(Error::Io);
        }
        // GET_CONFIGURATION reporting 0 means "unconfigured" [USB 2.0
        // §9.4.2].
        Ok(match value[0] {
            0 => None,
            value => Some(value),
        })
    }

    /// Makes the configuration with value `config` the active one, or puts
    /// the device in the unconfigured state for `None`. Always blocking.
    ///
    /// `Some(0)` is passed to the device as a literal configuration value:
    /// the USB specification reserves 0, but non-conformant devices exist
    /// that use it for a real configuration, so only `None` selects the
    /// unconfigured state.
    /// Fails with [Error::Busy] while any interface is claimed.
    pub fn set_configuration(&mut self, config: Option<u8>) -> UsbResult<()> {
        let fd = self.file.as_raw_fd();
        let mut native = config_value_to_native(config);
        check(unsafe { ioctl_log!(usbfs::usbdevfs_setconfiguration, fd, &mut native) })?;
        Ok(())
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        let fd = self.file.as_raw_fd();
        // Interfaces still claimed at close time are released here so the
        // close is complete on every exit path; failures are logged, as a
        // destructor has nowhere to report them.
        for interface in self.claimed.drain() {
            let mut native = interface as c_uint;
            let res = unsafe { ioctl_log!(usbfs::usbdevfs_releaseinterface, fd, &mut native) };
            if let Err(e) = res {
                warn!("failed to release interface {interface} while closing handle: {e}");
            }
        }
        debug!(
            "closing handle to device at bus {:03} address {:03}",
            self.device.bus_number(),
            self.device.address(),
        );
    }
}

/// The native layer expresses "unconfigured" as configuration value -1;
/// every real value, 0 included, passes through untouched.
fn config_value_to_native(config: Option<u8>) -> c_int {
    match config {
        Some(value) => value as c_int,
        None => -1,
    }
}

/// Releases one claim tracked in `claimed`: fails with [Error::NotFound]
/// when the interface is not held, and forgets the claim only after the
/// native release succeeds, so a failed release can be retried and is still
/// covered by the close-time sweep.
fn release_claim<F>(claimed: &mut HashSet<u8>, interface: u8, release: F) -> UsbResult<()>
where
    F: FnOnce() -> UsbResult<()>,
{
    if !claimed.contains(&interface) {
        return Err(Error::NotFound);
    }
    release()?;
    claimed.remove(&interface);
    Ok(())
}

/// Combines a guarded action's result with its cleanup's result: the
/// action's error always wins, a cleanup failure after a successful action
/// is reported as the operation's failure, and a cleanup failure after a
/// failed action is logged so it cannot mask the original error.
pub(crate) fn join_cleanup<T>(primary: UsbResult<T>, cleanup: UsbResult<()>) -> UsbResult<T> {
    match (primary, cleanup) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(cleanup_error)) => Err(cleanup_error),
        (Err(primary_error), Ok(())) => Err(primary_error),
        (Err(primary_error), Err(cleanup_error)) => {
            warn!(
                "cleanup failed ({cleanup_error}) after an earlier error; \
                 reporting the original",
            );
            Err(primary_error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleanup_error_surfaces_after_success() {
        assert_eq!(join_cleanup(Ok(5), Err(Error::NotFound)), Err(Error::NotFound));
        assert_eq!(join_cleanup(Ok(5), Ok(())), Ok(5));
    }

    #[test]
    fn action_error_is_never_masked_by_cleanup() {
        assert_eq!(
            join_cleanup::<()>(Err(Error::Pipe), Err(Error::NotFound)),
            Err(Error::Pipe),
        );
        assert_eq!(join_cleanup::<()>(Err(Error::Timeout), Ok(())), Err(Error::Timeout));
    }

    #[test]
    fn failed_releases_keep_the_claim_tracked() {
        let mut claimed: HashSet<u8> = [1].into_iter().collect();

        assert_eq!(
            release_claim(&mut claimed, 1, || Err(Error::Interrupted)),
            Err(Error::Interrupted),
        );
        // The kernel still holds the claim, so the handle must keep tracking
        // it; a retry can then succeed.
        assert!(claimed.contains(&1));
        assert_eq!(release_claim(&mut claimed, 1, || Ok(())), Ok(()));
        assert!(claimed.is_empty());
    }

    #[test]
    fn releasing_an_unheld_interface_is_not_found() {
        let mut claimed = HashSet::new();
        let mut released = false;
        assert_eq!(
            release_claim(&mut claimed, 3, || {
                released = true;
                Ok(())
            }),
            Err(Error::NotFound),
        );
        assert!(!released);
    }

    #[test]
    fn only_none_selects_the_unconfigured_state() {
        assert_eq!(config_value_to_native(None), -1);
        assert_eq!(config_value_to_native(Some(0)), 0);
        assert_eq!(config_value_to_native(Some(1)), 1);
        assert_eq!(config_value_to_native(Some(255)), 255);
    }
}
