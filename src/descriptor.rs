//! Types for working with and parsing USB descriptors.
//!
//! The raw wire structs are little-endian [USB 2.0 §8.1] and are decoded with
//! the help of the [binrw](https://docs.rs/binrw) crate; the nested
//! configuration → interface → endpoint tree around them is walked with a
//! plain cursor, reading each descriptor's `bLength` before consuming it.
//! Decoding always produces owned values: nothing in the returned tree
//! borrows the raw buffer it was parsed from.

use binrw::{binrw, io::Cursor, BinRead};

use crate::{
    bcd::ReleaseNumber,
    bits,
    request::Direction,
    Error, UsbResult,
};

// Descriptor type codes [USB 2.0 table 9-5].
pub(crate) const DT_DEVICE: u8 = 1;
pub(crate) const DT_CONFIG: u8 = 2;
pub(crate) const DT_INTERFACE: u8 = 4;
pub(crate) const DT_ENDPOINT: u8 = 5;

const DEVICE_DESC_LENGTH: usize = 18;
const CONFIG_DESC_LENGTH: usize = 9;
const INTERFACE_DESC_LENGTH: usize = 9;
const ENDPOINT_DESC_LENGTH: usize = 7;
const ENDPOINT_AUDIO_DESC_LENGTH: usize = 9;

#[derive(Copy, Debug, Clone, PartialEq)]
#[allow(non_snake_case)]
#[binrw]
#[brw(little)]
struct RawDeviceDescriptor {
    bLength: u8,
    bDescriptorType: u8,
    bcdUSB: u16,
    bDeviceClass: u8,
    bDeviceSubClass: u8,
    bDeviceProtocol: u8,
    bMaxPacketSize0: u8,
    idVendor: u16,
    idProduct: u16,
    bcdDevice: u16,
    iManufacturer: u8,
    iProduct: u8,
    iSerialNumber: u8,
    bNumConfigurations: u8,
}

#[derive(Copy, Debug, Clone, PartialEq)]
#[allow(non_snake_case)]
#[binrw]
#[brw(little)]
struct RawConfigDescriptor {
    bLength: u8,
    /// Constant: 2.
    bDescriptorType: u8,
    wTotalLength: u16,
    bNumInterfaces: u8,
    bConfigurationValue: u8,
    iConfiguration: u8,
    bmAttributes: u8,
    bMaxPower: u8,
}

#[derive(Copy, Debug, Clone, PartialEq)]
#[allow(non_snake_case)]
#[binrw]
#[brw(little)]
struct RawInterfaceDescriptor {
    bLength: u8,
    /// Constant: 4.
    bDescriptorType: u8,
    bInterfaceNumber: u8,
    bAlternateSetting: u8,
    bNumEndpoints: u8,
    bInterfaceClass: u8,
    bInterfaceSubClass: u8,
    bInterfaceProtocol: u8,
    iInterface: u8,
}

#[derive(Copy, Debug, Clone, PartialEq)]
#[allow(non_snake_case)]
#[binrw]
#[brw(little)]
struct RawEndpointDescriptor {
    bLength: u8,
    /// Constant: 5.
    bDescriptorType: u8,
    bEndpointAddress: u8,
    bmAttributes: u8,
    wMaxPacketSize: u16,
    bInterval: u8,
}

/// The standard 18-byte device descriptor, decoded to host representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceDescriptor {
    /// The USB specification release the device complies with, from the
    /// BCD-encoded `bcdUSB`.
    pub usb_release: ReleaseNumber,
    pub class_code: u8,
    pub sub_class_code: u8,
    pub protocol_code: u8,
    /// Maximum packet size for endpoint 0.
    pub max_packet_size_0: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    /// The device release number, from the BCD-encoded `bcdDevice`.
    pub device_release: ReleaseNumber,
    /// String descriptor index for the manufacturer name; 0 if absent.
    pub manufacturer_str_index: u8,
    /// String descriptor index for the product name; 0 if absent.
    pub product_str_index: u8,
    /// String descriptor index for the serial number; 0 if absent.
    pub serial_str_index: u8,
    pub num_configs: u8,
}

/// Status flags from a configuration descriptor's `bmAttributes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConfigAttributes {
    pub self_powered: bool,
    pub remote_wakeup: bool,
}

impl ConfigAttributes {
    fn from_byte(byte: u8) -> Self {
        ConfigAttributes {
            self_powered: bits::extract_u8(byte, 6, 1) == 1,
            remote_wakeup: bits::extract_u8(byte, 5, 1) == 1,
        }
    }
}

/// One device configuration, with its full interface tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigDescriptor {
    /// The value used to select this configuration with SET_CONFIGURATION.
    pub value: u8,
    /// String descriptor index for this configuration; 0 if absent.
    pub str_index: u8,
    pub attributes: ConfigAttributes,
    /// Maximum bus power draw, in units of 2 mA.
    pub max_power: u8,
    /// The declared interface count; always equals `interfaces.len()`.
    pub num_interfaces: u8,
    /// One group per interface, in order of first appearance; each group
    /// holds that interface's alternate settings in descriptor order.
    pub interfaces: Vec<Vec<InterfaceDescriptor>>,
    /// Unrecognized (class- or vendor-specific) descriptor bytes that
    /// followed the configuration descriptor, verbatim.
    pub extra: Vec<u8>,
}

/// One alternate setting of one interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceDescriptor {
    pub number: u8,
    pub alternate_setting: u8,
    pub class_code: u8,
    pub sub_class_code: u8,
    pub protocol_code: u8,
    /// String descriptor index for this interface; 0 if absent.
    pub str_index: u8,
    /// The declared endpoint count; always equals `endpoints.len()`.
    pub num_endpoints: u8,
    pub endpoints: Vec<EndpointDescriptor>,
    /// Unrecognized descriptor bytes between this interface descriptor and
    /// its first endpoint, verbatim.
    pub extra: Vec<u8>,
}

/// An endpoint address: endpoint number plus direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EndpointAddress {
    /// The endpoint number, bits 0..4 of `bEndpointAddress`.
    pub number: u8,
    /// The transfer direction, bit 7 of `bEndpointAddress`.
    pub direction: Direction,
}

impl EndpointAddress {
    fn from_byte(byte: u8) -> Self {
        EndpointAddress {
            number: bits::extract_u8(byte, 0, 4),
            direction: Direction::of_byte(byte),
        }
    }
}

/// Isochronous synchronization type, bits 2..4 of an endpoint's
/// `bmAttributes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Synchronization {
    NoSynchronization,
    Asynchronous,
    Adaptive,
    Synchronous,
}

impl Synchronization {
    fn from_code(code: u8) -> Self {
        match code {
            0 => Synchronization::NoSynchronization,
            1 => Synchronization::Asynchronous,
            2 => Synchronization::Adaptive,
            3 => Synchronization::Synchronous,
            _ => unreachable!("synchronization code is a 2-bit field"),
        }
    }
}

/// Isochronous usage type, bits 4..6 of an endpoint's `bmAttributes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Usage {
    Data,
    Feedback,
    Implicit,
}

impl Usage {
    fn from_code(code: u8) -> Self {
        match code {
            0 => Usage::Data,
            1 => Usage::Feedback,
            2 => Usage::Implicit,
            // Reserved by the USB spec; a device reporting it has violated
            // an invariant the rest of this crate relies on.
            3 => panic!("reserved isochronous usage code 3 in endpoint attributes"),
            _ => unreachable!("usage code is a 2-bit field"),
        }
    }
}

/// An endpoint's transfer type, bits 0..2 of `bmAttributes`, with the
/// isochronous sub-fields carried only where they are meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferType {
    Control,
    Isochronous {
        synchronization: Synchronization,
        usage: Usage,
    },
    Bulk,
    Interrupt,
}

impl TransferType {
    fn from_attributes(byte: u8) -> Self {
        match bits::extract_u8(byte, 0, 2) {
            0 => TransferType::Control,
            1 => TransferType::Isochronous {
                synchronization: Synchronization::from_code(bits::extract_u8(byte, 2, 2)),
                usage: Usage::from_code(bits::extract_u8(byte, 4, 2)),
            },
            2 => TransferType::Bulk,
            3 => TransferType::Interrupt,
            _ => unreachable!("transfer type is a 2-bit field"),
        }
    }
}

/// The number of additional transactions per microframe a high-speed,
/// high-bandwidth endpoint may use, bits 11..13 of `wMaxPacketSize`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionOpportunities {
    Zero,
    One,
    Two,
}

/// An endpoint's decoded `wMaxPacketSize`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MaxPacketSize {
    /// Maximum packet size in bytes, bits 0..11.
    pub size: u16,
    pub transaction_opportunities: TransactionOpportunities,
}

impl MaxPacketSize {
    fn from_raw(raw: u16) -> Self {
        let opportunities = match bits::extract_u16(raw, 11, 2) {
            0 => TransactionOpportunities::Zero,
            1 => TransactionOpportunities::One,
            2 => TransactionOpportunities::Two,
            // Reserved by the USB spec, same deal as the usage code.
            3 => panic!("reserved transaction-opportunities code 3 in wMaxPacketSize"),
            _ => unreachable!("transaction opportunities is a 2-bit field"),
        };
        MaxPacketSize {
            size: bits::extract_u16(raw, 0, 11),
            transaction_opportunities: opportunities,
        }
    }
}

/// One endpoint under an interface alternate setting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointDescriptor {
    pub address: EndpointAddress,
    pub attributes: TransferType,
    pub max_packet_size: MaxPacketSize,
    /// Polling interval, in frame counts (interpretation depends on the
    /// transfer type and device speed).
    pub interval: u8,
    /// Audio-class rate-feedback refresh interval; 0 for the 7-byte
    /// standard-length descriptor.
    pub refresh: u8,
    /// Audio-class synch endpoint address; 0 for the 7-byte standard-length
    /// descriptor.
    pub synch_address: u8,
    /// Unrecognized descriptor bytes following this endpoint descriptor,
    /// verbatim.
    pub extra: Vec<u8>,
}

/// Parses a standard 18-byte device descriptor from the start of `buf`.
pub fn parse_device_descriptor(buf: &[u8]) -> UsbResult<DeviceDescriptor> {
    if buf.len() < DEVICE_DESC_LENGTH {
        return Err(Error::Io);
    }
    let raw = RawDeviceDescriptor::read(&mut Cursor::new(buf)).map_err(|_| Error::Io)?;
    if raw.bDescriptorType != DT_DEVICE || (raw.bLength as usize) < DEVICE_DESC_LENGTH {
        return Err(Error::Io);
    }

    Ok(DeviceDescriptor {
        usb_release: ReleaseNumber::from_bcd(raw.bcdUSB),
        class_code: raw.bDeviceClass,
        sub_class_code: raw.bDeviceSubClass,
        protocol_code: raw.bDeviceProtocol,
        max_packet_size_0: raw.bMaxPacketSize0,
        vendor_id: raw.idVendor,
        product_id: raw.idProduct,
        device_release: ReleaseNumber::from_bcd(raw.bcdDevice),
        manufacturer_str_index: raw.iManufacturer,
        product_str_index: raw.iProduct,
        serial_str_index: raw.iSerialNumber,
        num_configs: raw.bNumConfigurations,
    })
}

/// Parses one full configuration descriptor (the 9 fixed bytes plus the
/// interface and endpoint descriptors covered by its `wTotalLength`) from
/// the start of `buf`.
pub fn parse_config_descriptor(buf: &[u8]) -> UsbResult<ConfigDescriptor> {
    if buf.len() < CONFIG_DESC_LENGTH {
        return Err(Error::Io);
    }
    let raw = RawConfigDescriptor::read(&mut Cursor::new(buf)).map_err(|_| Error::Io)?;
    let total = raw.wTotalLength as usize;
    if raw.bDescriptorType != DT_CONFIG
        || (raw.bLength as usize) < CONFIG_DESC_LENGTH
        || total < raw.bLength as usize
        || total > buf.len()
    {
        return Err(Error::Io);
    }

    let mut pos = raw.bLength as usize;

    // Descriptors between the configuration descriptor and the first
    // interface descriptor (interface association descriptors and the like)
    // are preserved as the configuration's extra bytes.
    let mut extra = Vec::new();
    while let Some((length, descriptor_type)) = peek_descriptor(buf, pos, total)? {
        if descriptor_type == DT_INTERFACE {
            break;
        }
        extra.extend_from_slice(&buf[pos..pos + length]);
        pos += length;
    }

    // Every remaining descriptor belongs to some interface alternate
    // setting; group the settings by interface number, in order of first
    // appearance.
    let mut interfaces: Vec<Vec<InterfaceDescriptor>> =
        Vec::with_capacity(raw.bNumInterfaces as usize);
    while pos < total {
        let (interface, next) = parse_interface(buf, pos, total)?;
        pos = next;
        match interfaces
            .iter_mut()
            .find(|group| group[0].number == interface.number)
        {
            Some(group) => group.push(interface),
            None => interfaces.push(vec![interface]),
        }
    }

    // A device describing more interfaces than it declared is malformed; one
    // describing fewer gets empty groups so the declared count and the
    // decoded group count always agree.
    if interfaces.len() > raw.bNumInterfaces as usize {
        return Err(Error::Io);
    }
    interfaces.resize_with(raw.bNumInterfaces as usize, Vec::new);

    Ok(ConfigDescriptor {
        value: raw.bConfigurationValue,
        str_index: raw.iConfiguration,
        attributes: ConfigAttributes::from_byte(raw.bmAttributes),
        max_power: raw.bMaxPower,
        num_interfaces: raw.bNumInterfaces,
        interfaces,
        extra,
    })
}

/// Splits a cached descriptor-chain blob (device descriptor followed by each
/// configuration's full descriptor run, as the sysfs `descriptors` attribute
/// and the devfs device node both provide it) into per-configuration slices.
pub(crate) fn config_blobs(chain: &[u8]) -> UsbResult<Vec<&[u8]>> {
    if chain.len() < DEVICE_DESC_LENGTH || chain[1] != DT_DEVICE {
        return Err(Error::Io);
    }
    let mut pos = chain[0] as usize;
    if pos < DEVICE_DESC_LENGTH || pos > chain.len() {
        return Err(Error::Io);
    }

    let mut blobs = Vec::new();
    while pos < chain.len() {
        if pos + CONFIG_DESC_LENGTH > chain.len() || chain[pos + 1] != DT_CONFIG {
            return Err(Error::Io);
        }
        let total = u16::from_le_bytes([chain[pos + 2], chain[pos + 3]]) as usize;
        if total < CONFIG_DESC_LENGTH || pos + total > chain.len() {
            return Err(Error::Io);
        }
        blobs.push(&chain[pos..pos + total]);
        pos += total;
    }

    Ok(blobs)
}

/// Reads the `(bLength, bDescriptorType)` header of the descriptor at `pos`,
/// or `None` at the end of the region. Errors if a descriptor would overrun
/// the region or claims an impossible length.
fn peek_descriptor(buf: &[u8], pos: usize, end: usize) -> UsbResult<Option<(usize, u8)>> {
    if pos >= end {
        return Ok(None);
    }
    if pos + 2 > end {
        return Err(Error::Io);
    }
    let length = buf[pos] as usize;
    if length < 2 || pos + length > end {
        return Err(Error::Io);
    }
    Ok(Some((length, buf[pos + 1])))
}

fn parse_interface(buf: &[u8], pos: usize, end: usize) -> UsbResult<(InterfaceDescriptor, usize)> {
    let Some((length, descriptor_type)) = peek_descriptor(buf, pos, end)? else {
        return Err(Error::Io);
    };
    if descriptor_type != DT_INTERFACE || length < INTERFACE_DESC_LENGTH {
        return Err(Error::Io);
    }
    let raw = RawInterfaceDescriptor::read(&mut Cursor::new(&buf[pos..])).map_err(|_| Error::Io)?;
    let mut pos = pos + length;

    // Class-specific descriptors between the interface descriptor and its
    // first endpoint (a HID descriptor, say) are the interface's extra bytes.
    let mut extra = Vec::new();
    while let Some((length, descriptor_type)) = peek_descriptor(buf, pos, end)? {
        match descriptor_type {
            DT_DEVICE | DT_CONFIG | DT_INTERFACE | DT_ENDPOINT => break,
            _ => {
                extra.extend_from_slice(&buf[pos..pos + length]);
                pos += length;
            }
        }
    }

    let mut endpoints = Vec::with_capacity(raw.bNumEndpoints as usize);
    while endpoints.len() < raw.bNumEndpoints as usize {
        match peek_descriptor(buf, pos, end)? {
            Some((_, DT_ENDPOINT)) => {
                let (endpoint, next) = parse_endpoint(buf, pos, end)?;
                endpoints.push(endpoint);
                pos = next;
            }
            // Fewer endpoints than the alternate setting declared.
            _ => return Err(Error::Io),
        }
    }

    Ok((
        InterfaceDescriptor {
            number: raw.bInterfaceNumber,
            alternate_setting: raw.bAlternateSetting,
            class_code: raw.bInterfaceClass,
            sub_class_code: raw.bInterfaceSubClass,
            protocol_code: raw.bInterfaceProtocol,
            str_index: raw.iInterface,
            num_endpoints: raw.bNumEndpoints,
            endpoints,
            extra,
        },
        pos,
    ))
}

fn parse_endpoint(buf: &[u8], pos: usize, end: usize) -> UsbResult<(EndpointDescriptor, usize)> {
    let Some((length, descriptor_type)) = peek_descriptor(buf, pos, end)? else {
        return Err(Error::Io);
    };
    if descriptor_type != DT_ENDPOINT || length < ENDPOINT_DESC_LENGTH {
        return Err(Error::Io);
    }
    let raw = RawEndpointDescriptor::read(&mut Cursor::new(&buf[pos..])).map_err(|_| Error::Io)?;

    // Audio-class endpoints use a 9-byte descriptor carrying two extra
    // fields; everything else leaves them zero.
    let (refresh, synch_address) = if length >= ENDPOINT_AUDIO_DESC_LENGTH {
        (buf[pos + 7], buf[pos + 8])
    } else {
        (0, 0)
    };
    let mut pos = pos + length;

    // Class-specific descriptors following an endpoint descriptor belong to
    // that endpoint.
    let mut extra = Vec::new();
    while let Some((length, descriptor_type)) = peek_descriptor(buf, pos, end)? {
        match descriptor_type {
            DT_DEVICE | DT_CONFIG | DT_INTERFACE | DT_ENDPOINT => break,
            _ => {
                extra.extend_from_slice(&buf[pos..pos + length]);
                pos += length;
            }
        }
    }

    Ok((
        EndpointDescriptor {
            address: EndpointAddress::from_byte(raw.bEndpointAddress),
            attributes: TransferType::from_attributes(raw.bmAttributes),
            max_packet_size: MaxPacketSize::from_raw(raw.wMaxPacketSize),
            interval: raw.bInterval,
            refresh,
            synch_address,
            extra,
        },
        pos,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_address_decode() {
        let address = EndpointAddress::from_byte(0x85);
        assert_eq!(address.number, 5);
        assert_eq!(address.direction, Direction::In);

        let address = EndpointAddress::from_byte(0x03);
        assert_eq!(address.number, 3);
        assert_eq!(address.direction, Direction::Out);
    }

    #[test]
    fn endpoint_attributes_decode() {
        assert_eq!(TransferType::from_attributes(0b0000_0000), TransferType::Control);
        assert_eq!(TransferType::from_attributes(0b0000_0010), TransferType::Bulk);
        assert_eq!(TransferType::from_attributes(0b0000_0011), TransferType::Interrupt);
        assert_eq!(
            TransferType::from_attributes(0b0000_0101),
            TransferType::Isochronous {
                synchronization: Synchronization::Asynchronous,
                usage: Usage::Data,
            },
        );
        assert_eq!(
            TransferType::from_attributes(0b0010_1101),
            TransferType::Isochronous {
                synchronization: Synchronization::Synchronous,
                usage: Usage::Implicit,
            },
        );
    }

    #[test]
    #[should_panic(expected = "reserved isochronous usage code")]
    fn reserved_usage_code_is_fatal() {
        let _ = TransferType::from_attributes(0b0011_0001);
    }

    #[test]
    fn max_packet_size_decode() {
        let mps = MaxPacketSize::from_raw(0x0840);
        assert_eq!(mps.size, 64);
        assert_eq!(mps.transaction_opportunities, TransactionOpportunities::One);

        let mps = MaxPacketSize::from_raw(0x0008);
        assert_eq!(mps.size, 8);
        assert_eq!(mps.transaction_opportunities, TransactionOpportunities::Zero);
    }

    #[test]
    fn config_attributes_decode() {
        let attrs = ConfigAttributes::from_byte(0xa0);
        assert!(!attrs.self_powered);
        assert!(attrs.remote_wakeup);

        let attrs = ConfigAttributes::from_byte(0xc0);
        assert!(attrs.self_powered);
        assert!(!attrs.remote_wakeup);
    }

    #[test]
    fn device_descriptor_rejects_short_or_mistyped_buffers() {
        assert_eq!(parse_device_descriptor(&[18, 1, 0]), Err(Error::Io));
        let mut wrong_type = [0u8; 18];
        wrong_type[0] = 18;
        wrong_type[1] = DT_CONFIG;
        assert_eq!(parse_device_descriptor(&wrong_type), Err(Error::Io));
    }

    #[test]
    fn config_descriptor_rejects_truncated_trees() {
        // Claims 2 interfaces and a total length past the buffer.
        let blob = [9u8, DT_CONFIG, 0xff, 0x00, 2, 1, 0, 0xa0, 50];
        assert_eq!(parse_config_descriptor(&blob), Err(Error::Io));
    }

    #[test]
    fn config_descriptor_pads_missing_interface_groups() {
        // Declares 2 interfaces but describes only one (malformed but seen
        // in the wild); the missing group decodes as empty.
        let blob: Vec<u8> = [
            &[9u8, DT_CONFIG, 18, 0, 2, 1, 0, 0x80, 25][..],
            &[9, DT_INTERFACE, 0, 0, 0, 0xff, 0, 0, 0][..],
        ]
        .concat();
        let config = parse_config_descriptor(&blob).unwrap();
        assert_eq!(config.num_interfaces, 2);
        assert_eq!(config.interfaces.len(), 2);
        assert_eq!(config.interfaces[0].len(), 1);
        assert!(config.interfaces[1].is_empty());
    }
}
