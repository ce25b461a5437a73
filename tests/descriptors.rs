//! Enumeration and descriptor decoding against fixture sysfs/devfs trees,
//! using the cached descriptor chain of a made-up composite device.

use std::fs;
use std::path::Path;

use tempfile::{tempdir, TempDir};

use usbio::bcd::ReleaseNumber;
use usbio::descriptor::{TransactionOpportunities, TransferType};
use usbio::request::Direction;
use usbio::{Context, Error};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// The kernel-cached descriptor chain of a two-interface composite device:
/// a HID interface (with an isochronous audio alternate setting) and a
/// vendor-specific bulk interface, glued together by an interface
/// association descriptor.
fn composite_device_chain() -> Vec<u8> {
    let device: &[u8] = &[
        18, 1, // bLength, DEVICE
        0x00, 0x02, // bcdUSB 2.00
        0, 0, 0, // class/subclass/protocol from the interfaces
        64, // bMaxPacketSize0
        0x50, 0x1d, // idVendor 0x1d50
        0x5b, 0x61, // idProduct 0x615b
        0x10, 0x01, // bcdDevice 1.10
        1, 2, 3, // manufacturer/product/serial string indices
        1, // bNumConfigurations
    ];
    let config: &[u8] = &[9, 2, 97, 0, 2, 1, 0, 0xa0, 250];
    let iad: &[u8] = &[8, 0x0b, 0, 2, 0xff, 0, 0, 0];

    let iface0_alt0: &[u8] = &[9, 4, 0, 0, 1, 3, 0, 0, 0];
    let hid: &[u8] = &[9, 0x21, 0x11, 0x01, 0, 1, 0x22, 0x3f, 0x00];
    let ep_interrupt_in: &[u8] = &[7, 5, 0x81, 3, 0x08, 0x00, 10];

    let iface0_alt1: &[u8] = &[9, 4, 0, 1, 2, 1, 2, 0, 0];
    // 9-byte audio-class endpoint descriptors: refresh 2, synch address
    // 0x83 on the IN endpoint.
    let ep_iso_in: &[u8] = &[9, 5, 0x82, 0x05, 0x40, 0x08, 1, 2, 0x83];
    let ep_iso_out: &[u8] = &[9, 5, 0x03, 0x05, 0x40, 0x08, 1, 0, 0];

    let iface1: &[u8] = &[9, 4, 1, 0, 2, 0xff, 0, 0, 0];
    let ep_bulk_in: &[u8] = &[7, 5, 0x83, 2, 0x00, 0x02, 0];
    let ep_bulk_in_class: &[u8] = &[5, 0x25, 1, 0, 0];
    let ep_bulk_out: &[u8] = &[7, 5, 0x03, 2, 0x00, 0x02, 0];

    [
        device,
        config,
        iad,
        iface0_alt0,
        hid,
        ep_interrupt_in,
        iface0_alt1,
        ep_iso_in,
        ep_iso_out,
        iface1,
        ep_bulk_in,
        ep_bulk_in_class,
        ep_bulk_out,
    ]
    .concat()
}

/// Lays out a one-device sysfs fixture the way the kernel does:
/// `bus/usb/devices/1-4` with `busnum`, `devnum`, `descriptors`, and
/// `bConfigurationValue` attributes, plus an interface node that
/// enumeration must skip.
fn sysfs_fixture(configuration_value: &str) -> TempDir {
    let root = tempdir().unwrap();
    let device_dir = root.path().join("bus/usb/devices/1-4");
    fs::create_dir_all(&device_dir).unwrap();
    fs::write(device_dir.join("busnum"), "1\n").unwrap();
    fs::write(device_dir.join("devnum"), "5\n").unwrap();
    fs::write(device_dir.join("descriptors"), composite_device_chain()).unwrap();
    fs::write(device_dir.join("bConfigurationValue"), configuration_value).unwrap();

    // Interface nodes carry a colon and no busnum/devnum attributes.
    fs::create_dir_all(root.path().join("bus/usb/devices/1-4:1.0")).unwrap();

    root
}

fn context_with_sysfs(sysfs: &Path, devfs: &Path) -> Context {
    Context::with_roots(Some(sysfs.to_path_buf()), Some(devfs.to_path_buf())).unwrap()
}

#[test]
fn enumerates_devices_from_sysfs() {
    init();
    let sysfs = sysfs_fixture("1\n");
    let devfs = tempdir().unwrap();
    let context = context_with_sysfs(sysfs.path(), devfs.path());

    let devices = context.devices().unwrap();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].bus_number(), 1);
    assert_eq!(devices[0].address(), 5);
}

#[test]
fn decodes_the_device_descriptor() {
    init();
    let sysfs = sysfs_fixture("1\n");
    let devfs = tempdir().unwrap();
    let context = context_with_sysfs(sysfs.path(), devfs.path());

    let device = context.devices().unwrap().remove(0);
    let descriptor = device.device_descriptor().unwrap();
    assert_eq!(descriptor.vendor_id, 0x1d50);
    assert_eq!(descriptor.product_id, 0x615b);
    assert_eq!(descriptor.usb_release, ReleaseNumber(0, 2, 0, 0));
    assert_eq!(descriptor.usb_release.to_string(), "02.00");
    assert_eq!(descriptor.device_release, ReleaseNumber(0, 1, 1, 0));
    assert_eq!(descriptor.max_packet_size_0, 64);
    assert_eq!(descriptor.manufacturer_str_index, 1);
    assert_eq!(descriptor.product_str_index, 2);
    assert_eq!(descriptor.serial_str_index, 3);
    assert_eq!(descriptor.num_configs, 1);
}

#[test]
fn decodes_the_full_configuration_tree() {
    init();
    let sysfs = sysfs_fixture("1\n");
    let devfs = tempdir().unwrap();
    let context = context_with_sysfs(sysfs.path(), devfs.path());

    let device = context.devices().unwrap().remove(0);
    let config = device.config_descriptor(0).unwrap();

    assert_eq!(config.value, 1);
    assert_eq!(config.max_power, 250);
    assert!(config.attributes.remote_wakeup);
    assert!(!config.attributes.self_powered);

    // The interface association descriptor lands in the configuration's
    // extra bytes, verbatim.
    assert_eq!(config.extra, vec![8, 0x0b, 0, 2, 0xff, 0, 0, 0]);

    // Declared and decoded interface counts always agree, and alternate
    // settings group under one interface entry.
    assert_eq!(config.num_interfaces, 2);
    assert_eq!(config.interfaces.len(), 2);
    assert_eq!(config.interfaces[0].len(), 2);
    assert_eq!(config.interfaces[1].len(), 1);

    let hid_alt = &config.interfaces[0][0];
    assert_eq!(hid_alt.number, 0);
    assert_eq!(hid_alt.alternate_setting, 0);
    assert_eq!(hid_alt.class_code, 3);
    // The HID class descriptor is the interface's extra bytes.
    assert_eq!(hid_alt.extra, vec![9, 0x21, 0x11, 0x01, 0, 1, 0x22, 0x3f, 0x00]);
    assert_eq!(hid_alt.num_endpoints, 1);
    assert_eq!(hid_alt.endpoints.len(), 1);

    let interrupt_in = &hid_alt.endpoints[0];
    assert_eq!(interrupt_in.address.number, 1);
    assert_eq!(interrupt_in.address.direction, Direction::In);
    assert_eq!(interrupt_in.attributes, TransferType::Interrupt);
    assert_eq!(interrupt_in.max_packet_size.size, 8);
    assert_eq!(interrupt_in.interval, 10);

    let audio_alt = &config.interfaces[0][1];
    assert_eq!(audio_alt.alternate_setting, 1);
    assert_eq!(audio_alt.endpoints.len(), 2);

    let iso_in = &audio_alt.endpoints[0];
    assert!(matches!(iso_in.attributes, TransferType::Isochronous { .. }));
    assert_eq!(iso_in.max_packet_size.size, 64);
    assert_eq!(
        iso_in.max_packet_size.transaction_opportunities,
        TransactionOpportunities::One,
    );
    // The audio-class 9-byte descriptor fields come through.
    assert_eq!(iso_in.refresh, 2);
    assert_eq!(iso_in.synch_address, 0x83);
    assert_eq!(audio_alt.endpoints[1].refresh, 0);

    let vendor = &config.interfaces[1][0];
    assert_eq!(vendor.number, 1);
    assert_eq!(vendor.class_code, 0xff);
    assert_eq!(vendor.endpoints.len(), 2);

    let bulk_in = &vendor.endpoints[0];
    assert_eq!(bulk_in.address.number, 3);
    assert_eq!(bulk_in.address.direction, Direction::In);
    assert_eq!(bulk_in.attributes, TransferType::Bulk);
    assert_eq!(bulk_in.max_packet_size.size, 512);
    // The class descriptor following the IN endpoint belongs to it.
    assert_eq!(bulk_in.extra, vec![5, 0x25, 1, 0, 0]);

    let bulk_out = &vendor.endpoints[1];
    assert_eq!(bulk_out.address.direction, Direction::Out);
    assert!(bulk_out.extra.is_empty());
}

#[test]
fn configuration_lookups_by_index_and_value() {
    init();
    let sysfs = sysfs_fixture("1\n");
    let devfs = tempdir().unwrap();
    let context = context_with_sysfs(sysfs.path(), devfs.path());

    let device = context.devices().unwrap().remove(0);

    assert!(device.config_descriptor(0).is_ok());
    assert_eq!(device.config_descriptor(1).unwrap_err(), Error::NotFound);

    assert_eq!(device.config_descriptor_by_value(1).unwrap().value, 1);
    assert_eq!(
        device.config_descriptor_by_value(2).unwrap_err(),
        Error::NotFound,
    );
}

#[test]
fn active_configuration_comes_from_the_sysfs_cache() {
    init();
    let sysfs = sysfs_fixture("1\n");
    let devfs = tempdir().unwrap();
    let context = context_with_sysfs(sysfs.path(), devfs.path());

    let device = context.devices().unwrap().remove(0);
    // No device node exists under the fixture devfs, so this passing proves
    // the lookup never needed to open the device.
    let active = device.active_config_descriptor().unwrap();
    assert_eq!(active.value, 1);
}

#[test]
fn unconfigured_devices_have_no_active_configuration() {
    init();
    // An empty bConfigurationValue attribute is how the sysfs reports an
    // unconfigured device.
    let sysfs = sysfs_fixture("\n");
    let devfs = tempdir().unwrap();
    let context = context_with_sysfs(sysfs.path(), devfs.path());

    let device = context.devices().unwrap().remove(0);
    assert_eq!(device.active_config_descriptor().unwrap_err(), Error::NotFound);
}

#[test]
fn falls_back_to_devfs_enumeration() {
    init();
    // A sysfs root with no bus/usb/devices directory at all forces the
    // devfs path.
    let sysfs = tempdir().unwrap();
    let devfs = tempdir().unwrap();
    let node_dir = devfs.path().join("bus/usb/001");
    fs::create_dir_all(&node_dir).unwrap();
    fs::write(node_dir.join("005"), composite_device_chain()).unwrap();

    let context = context_with_sysfs(sysfs.path(), devfs.path());
    let devices = context.devices().unwrap();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].bus_number(), 1);
    assert_eq!(devices[0].address(), 5);

    // Descriptors read from the device node decode the same as the sysfs
    // attribute.
    let descriptor = devices[0].device_descriptor().unwrap();
    assert_eq!(descriptor.vendor_id, 0x1d50);
    assert_eq!(devices[0].config_descriptor(0).unwrap().interfaces.len(), 2);
}

#[test]
fn opening_a_vanished_device_reports_no_device() {
    init();
    let sysfs = sysfs_fixture("1\n");
    let devfs = tempdir().unwrap();
    let context = context_with_sysfs(sysfs.path(), devfs.path());

    let device = context.devices().unwrap().remove(0);
    // The fixture devfs has no node for the device.
    assert_eq!(device.open().unwrap_err(), Error::NoDevice);
}
