//! The session with the native USB subsystem: root paths, verbosity, and
//! device enumeration.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use log::{debug, error, warn, LevelFilter};
use tap::TapFallible;

use crate::{device::Device, UsbResult};

/// How chatty the library should be, mapped onto the global [log] level.
/// Mirrors the native layer's debug-level convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verbosity {
    None,
    Error,
    Warning,
    Info,
    Debug,
}

impl Verbosity {
    fn level_filter(self) -> LevelFilter {
        match self {
            Verbosity::None => LevelFilter::Off,
            Verbosity::Error => LevelFilter::Error,
            Verbosity::Warning => LevelFilter::Warn,
            Verbosity::Info => LevelFilter::Info,
            Verbosity::Debug => LevelFilter::Debug,
        }
    }
}

/// State shared between a [Context] and everything derived from it. Devices
/// and handles keep this alive, so the session always outlives them and
/// teardown happens deterministically when the last owner goes away.
#[derive(Debug)]
pub(crate) struct ContextShared {
    pub(crate) sysfs_root: PathBuf,
    pub(crate) devfs_root: PathBuf,
}

impl Drop for ContextShared {
    fn drop(&mut self) {
        debug!("releasing USB context");
    }
}

/// A session with the Linux USB subsystem.
///
/// Device information on Linux is split between the sysfs (`/sys/bus/usb/`)
/// and the devfs (`/dev/bus/usb/`); a context knows where both are mounted
/// and hands out [Device]s enumerated from them.
#[derive(Debug, Clone)]
pub struct Context {
    shared: Arc<ContextShared>,
}

impl Context {
    const DEFAULT_SYSFS_ROOT: &'static str = "/sys";
    const DEFAULT_DEVFS_ROOT: &'static str = "/dev";

    /// Initializes a context using the standard mount points. Use
    /// [Context::with_roots] if you need more granularity.
    pub fn new() -> UsbResult<Self> {
        Self::with_roots(None, None)
    }

    /// Initializes a context, overriding the sysfs and devfs root paths
    /// (`/sys` and `/dev` by default). Mainly useful for pointing the
    /// library at a fixture tree in tests.
    pub fn with_roots(
        sysfs_root: Option<PathBuf>,
        devfs_root: Option<PathBuf>,
    ) -> UsbResult<Self> {
        let shared = ContextShared {
            sysfs_root: sysfs_root.unwrap_or_else(|| PathBuf::from(Self::DEFAULT_SYSFS_ROOT)),
            devfs_root: devfs_root.unwrap_or_else(|| PathBuf::from(Self::DEFAULT_DEVFS_ROOT)),
        };
        debug!(
            "initialized USB context (sysfs: {}, devfs: {})",
            shared.sysfs_root.display(),
            shared.devfs_root.display(),
        );
        Ok(Context {
            shared: Arc::new(shared),
        })
    }

    /// Sets the library's verbosity by adjusting the global [log] level.
    pub fn set_debug(&self, verbosity: Verbosity) {
        log::set_max_level(verbosity.level_filter());
    }

    /// Enumerates the USB devices currently visible, using the sysfs if it
    /// is available and falling back to the devfs, which is considerably
    /// slower but less likely to be unmounted or permissions-unavailable.
    ///
    /// Each returned [Device] is independently owned; the vector itself may
    /// be dropped while individual devices from it live on.
    pub fn devices(&self) -> UsbResult<Vec<Device>> {
        match self.enumerate_with_sysfs() {
            Ok(results) => Ok(results),
            Err(e) => {
                warn!("Error enumerating via sysfs: {}; trying devfs instead", e);
                self.enumerate_with_devfs()
            }
        }
    }

    /// Enumerates devices via the Linux sysfs, usually at `/sys`.
    ///
    /// This is considerably faster than [Context::enumerate_with_devfs] and
    /// also yields each device's sysfs directory, which later allows
    /// non-blocking configuration lookups.
    fn enumerate_with_sysfs(&self) -> UsbResult<Vec<Device>> {
        let usb_devices_dir = self.shared.sysfs_root.join("bus/usb/devices");

        debug!(
            "Traversing {} to look for USB devices",
            usb_devices_dir.display()
        );

        let mut results = Vec::new();

        for entry in fs::read_dir(&usb_devices_dir)
            .tap_err(|e| error!("Error traversing {}: {}", usb_devices_dir.display(), &e))?
        {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    error!(
                        "Error reading entry in {}: {}; skipping device",
                        usb_devices_dir.display(),
                        e
                    );
                    continue;
                }
            };

            // Interface nodes are named like `3-5:1.0`; device nodes never
            // contain a colon.
            if entry.file_name().to_string_lossy().contains(':') {
                continue;
            }
            // Entries are symlinks into the device tree; follow them and
            // ignore anything that is not a directory.
            match fs::metadata(entry.path()) {
                Ok(metadata) if metadata.is_dir() => {}
                _ => continue,
            }

            let full_path = entry.path();
            match self.device_from_sysfs(&full_path) {
                Ok(device) => results.push(device),
                Err(e) => {
                    error!(
                        "Error reading device attributes under {}: {}; skipping device",
                        full_path.display(),
                        e
                    );
                }
            }
        }

        debug!("sysfs-based device enumeration successfully completed");

        Ok(results)
    }

    /// Builds a [Device] from one sysfs device directory by reading the
    /// `busnum`/`devnum` attributes and the binary `descriptors` blob.
    fn device_from_sysfs(&self, sysfs_dir: &Path) -> UsbResult<Device> {
        let bus_number: u8 = read_sysfs_attr(sysfs_dir.join("busnum"))?
            .parse()
            .map_err(|_| crate::Error::Other)?;
        let address: u8 = read_sysfs_attr(sysfs_dir.join("devnum"))?
            .parse()
            .map_err(|_| crate::Error::Other)?;

        // The `descriptors` attribute holds the device descriptor followed
        // by the full descriptor run of every configuration, exactly as the
        // device reported them (but host-endian-safe: USB is little-endian
        // everywhere). This is the kernel's cached copy; reading it causes
        // no bus traffic.
        let descriptors = fs::read(sysfs_dir.join("descriptors"))?;

        Ok(Device::new(
            Arc::clone(&self.shared),
            bus_number,
            address,
            Some(sysfs_dir.to_path_buf()),
            descriptors,
        ))
    }

    /// Enumerates devices via the Linux devfs/usbfs, usually at `/dev`,
    /// expecting the usbfs at `/dev/bus/usb`.
    ///
    /// The devfs may also not be mounted or accessible on some systems, but
    /// if that's the case then we can't perform any USB IO anyway.
    fn enumerate_with_devfs(&self) -> UsbResult<Vec<Device>> {
        let usb_devices_dir = self.shared.devfs_root.join("bus/usb");

        let mut results = Vec::new();

        for bus_entry in fs::read_dir(&usb_devices_dir)
            .tap_err(|e| error!("Error traversing {}: {}", usb_devices_dir.display(), &e))?
        {
            // Bus entries should be directories of the form
            // `/dev/bus/usb/{busnum:03}`.
            let bus_entry =
                bus_entry.tap_err(|e| error!("Error getting USB devfs bus entry: {}", &e))?;
            let Some(bus_number) = parse_numeric_name(&bus_entry) else {
                warn!(
                    "devfs entry {} is not a bus number; skipping",
                    bus_entry.path().display()
                );
                continue;
            };

            for dev_entry in fs::read_dir(bus_entry.path())? {
                // Device entries should be files in the bus directory, of
                // the form `/dev/bus/usb/{busnum:03}/{devnum:03}`. The
                // device number is *not* the port number used for sysfs
                // paths.
                let dev_entry = dev_entry.tap_err(|e| {
                    error!(
                        "Error getting USB devfs dev entry in bus {}: {}",
                        &bus_entry.path().display(),
                        &e,
                    )
                })?;
                let Some(address) = parse_numeric_name(&dev_entry) else {
                    warn!(
                        "devfs entry {} is not a device number; skipping",
                        dev_entry.path().display()
                    );
                    continue;
                };

                // Opening the device node read-only allows no ioctls (so no
                // bus traffic), but reading it yields the same cached
                // descriptor chain the sysfs exposes.
                let descriptors = match fs::read(dev_entry.path()) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        error!(
                            "Error reading descriptors from USB device {}: {}; skipping device",
                            dev_entry.path().display(),
                            e,
                        );
                        continue;
                    }
                };

                results.push(Device::new(
                    Arc::clone(&self.shared),
                    bus_number,
                    address,
                    None,
                    descriptors,
                ));
            }
        }

        Ok(results)
    }
}

/// Parses a directory-entry name of the 0-padded numeric form the usbfs
/// uses (`001`, `042`, ...).
fn parse_numeric_name(entry: &fs::DirEntry) -> Option<u8> {
    entry.file_name().to_str()?.parse().ok()
}

/// Reads a sysfs attribute file, trimming the trailing newline.
pub(crate) fn read_sysfs_attr<P: AsRef<Path>>(sysfs_attr: P) -> UsbResult<String> {
    let attr_result = fs::read_to_string(sysfs_attr.as_ref())?;
    Ok(attr_result.trim().to_string())
}
