//! Vocabulary types for USB control requests.

/// The direction of a transfer or request, from the host's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Host to device.
    Out,
    /// Device to host.
    In,
}

impl Direction {
    /// Bit 7 of both endpoint addresses and bmRequestType bytes carries the
    /// direction.
    pub(crate) const MASK: u8 = 0x80;

    pub(crate) fn of_byte(byte: u8) -> Direction {
        if byte & Direction::MASK != 0 {
            Direction::In
        } else {
            Direction::Out
        }
    }
}

/// The type of a control request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestType {
    /// A request defined by the USB standard itself.
    Standard,
    /// A request defined by a device class specification.
    Class,
    /// A vendor-defined request.
    Vendor,
}

/// The recipient of a control request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Recipient {
    Device,
    Interface,
    Endpoint,
    Other,
}

/// Builds the `bmRequestType` byte for a control request.
pub const fn request_type(
    direction: Direction,
    request_type: RequestType,
    recipient: Recipient,
) -> u8 {
    let direction = match direction {
        Direction::Out => 0x00,
        Direction::In => 0x80,
    };
    let request_type = match request_type {
        RequestType::Standard => 0x00,
        RequestType::Class => 0x20,
        RequestType::Vendor => 0x40,
    };
    let recipient = match recipient {
        Recipient::Device => 0x00,
        Recipient::Interface => 0x01,
        Recipient::Endpoint => 0x02,
        Recipient::Other => 0x03,
    };
    direction | request_type | recipient
}

/// Standard descriptor type codes, used in the high byte of the `wValue` of
/// a GET_DESCRIPTOR request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DescriptorType {
    Device = 1,
    Configuration = 2,
    String = 3,
    Interface = 4,
    Endpoint = 5,
}

// Standard request codes [USB 2.0 table 9-4].
pub const GET_STATUS: u8 = 0x00;
pub const CLEAR_FEATURE: u8 = 0x01;
pub const SET_FEATURE: u8 = 0x03;
pub const SET_ADDRESS: u8 = 0x05;
pub const GET_DESCRIPTOR: u8 = 0x06;
pub const SET_DESCRIPTOR: u8 = 0x07;
pub const GET_CONFIGURATION: u8 = 0x08;
pub const SET_CONFIGURATION: u8 = 0x09;
pub const GET_INTERFACE: u8 = 0x0a;
pub const SET_INTERFACE: u8 = 0x0b;
pub const SYNCH_FRAME: u8 = 0x0c;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composes_request_type_bytes() {
        assert_eq!(
            request_type(Direction::In, RequestType::Class, Recipient::Interface),
            0xa1,
        );
        assert_eq!(
            request_type(Direction::Out, RequestType::Vendor, Recipient::Device),
            0x40,
        );
        assert_eq!(
            request_type(Direction::In, RequestType::Standard, Recipient::Endpoint),
            0x82,
        );
        assert_eq!(
            request_type(Direction::Out, RequestType::Standard, Recipient::Device),
            0x00,
        );
    }

    #[test]
    fn direction_comes_from_the_top_bit() {
        assert_eq!(Direction::of_byte(0x85), Direction::In);
        assert_eq!(Direction::of_byte(0x03), Direction::Out);
    }
}
