//! Synchronous transfers: the control, bulk, and interrupt operations on an
//! open [DeviceHandle].

use std::{os::fd::AsRawFd, time::Duration};

use libc::{c_uint, c_void};

use crate::{
    backend::usbfs::{self, check, ioctl_log},
    device::DeviceHandle,
    ffi::OptDurationExt,
    request::{self, request_type, DescriptorType, Direction, Recipient, RequestType},
    Error, UsbResult,
};

/// Timeout for the short standard requests the library issues on its own
/// behalf (configuration and string lookups).
pub(crate) const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(1);

/// A device's answer to a standard GET_STATUS request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceStatus {
    pub self_powered: bool,
    pub remote_wakeup: bool,
}

impl DeviceStatus {
    // Bit assignments from USB 2.0 figure 9-4.
    pub(crate) fn from_bits(status: u16) -> Self {
        DeviceStatus {
            self_powered: status & 0x0001 != 0,
            remote_wakeup: status & 0x0002 != 0,
        }
    }
}

impl DeviceHandle {
    /// Performs an IN control transfer, reading at most `buffer.len()` bytes
    /// into `buffer`, and returns how many bytes the device actually sent.
    ///
    /// `request_type` must have its direction bit set to IN (see
    /// [request_type]); a `None` timeout waits forever.
    pub fn read_control(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buffer: &mut [u8],
        timeout: Option<Duration>,
    ) -> UsbResult<usize> {
        if Direction::of_byte(request_type) != Direction::In {
            return Err(Error::InvalidParam);
        }
        // wLength is 16 bits wide; a bigger buffer cannot be asked for.
        if buffer.len() > u16::MAX as usize {
            return Err(Error::InvalidParam);
        }

        let mut transfer = usbfs::usbdevfs_ctrltransfer {
            bRequestType: request_type,
            bRequest: request,
            wValue: value,
            wIndex: index,
            wLength: buffer.len() as u16,
            timeout: timeout.as_millis_truncated_or(0),
            data: buffer.as_mut_ptr() as *mut c_void,
        };

        let fd = self.file.as_raw_fd();
        let transferred = check(unsafe { ioctl_log!(usbfs::usbdevfs_control, fd, &mut transfer) })?;
        Ok(transferred as usize)
    }

    /// Performs an OUT control transfer, sending all of `data`, and returns
    /// how many bytes the device accepted.
    pub fn write_control(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Option<Duration>,
    ) -> UsbResult<usize> {
        if Direction::of_byte(request_type) != Direction::Out {
            return Err(Error::InvalidParam);
        }
        if data.len() > u16::MAX as usize {
            return Err(Error::InvalidParam);
        }

        let mut transfer = usbfs::usbdevfs_ctrltransfer {
            bRequestType: request_type,
            bRequest: request,
            wValue: value,
            wIndex: index,
            wLength: data.len() as u16,
            timeout: timeout.as_millis_truncated_or(0),
            // The kernel only reads through this pointer for an OUT
            // transfer.
            data: data.as_ptr() as *mut c_void,
        };

        let fd = self.file.as_raw_fd();
        let transferred = check(unsafe { ioctl_log!(usbfs::usbdevfs_control, fd, &mut transfer) })?;
        Ok(transferred as usize)
    }

    /// Reads up to `max_length` bytes from the IN bulk endpoint `endpoint`.
    /// The returned vector is sized to what the device actually sent.
    pub fn read_bulk(
        &self,
        endpoint: u8,
        max_length: usize,
        timeout: Option<Duration>,
    ) -> UsbResult<Vec<u8>> {
        if Direction::of_byte(endpoint) != Direction::In {
            return Err(Error::InvalidParam);
        }

        let mut buffer = vec![0u8; max_length];
        let transferred =
            self.bulk_transfer(endpoint, buffer.as_mut_ptr() as *mut c_void, max_length, timeout)?;
        Ok(take_transferred(buffer, transferred))
    }

    /// Writes all of `data` to the OUT bulk endpoint `endpoint` and returns
    /// how many bytes the device accepted.
    pub fn write_bulk(
        &mut self,
        endpoint: u8,
        data: &[u8],
        timeout: Option<Duration>,
    ) -> UsbResult<usize> {
        if Direction::of_byte(endpoint) != Direction::Out {
            return Err(Error::InvalidParam);
        }
        self.bulk_transfer(endpoint, data.as_ptr() as *mut c_void, data.len(), timeout)
    }

    /// Reads up to `max_length` bytes from the IN interrupt endpoint
    /// `endpoint`, blocking until the device sends a report or the timeout
    /// lapses.
    pub fn read_interrupt(
        &self,
        endpoint: u8,
        max_length: usize,
        timeout: Option<Duration>,
    ) -> UsbResult<Vec<u8>> {
        // The kernel routes the transfer by the endpoint's actual type, so
        // interrupt endpoints share the bulk entry point.
        self.read_bulk(endpoint, max_length, timeout)
    }

    /// Writes all of `data` to the OUT interrupt endpoint `endpoint`.
    pub fn write_interrupt(
        &mut self,
        endpoint: u8,
        data: &[u8],
        timeout: Option<Duration>,
    ) -> UsbResult<usize> {
        self.write_bulk(endpoint, data, timeout)
    }

    fn bulk_transfer(
        &self,
        endpoint: u8,
        data: *mut c_void,
        length: usize,
        timeout: Option<Duration>,
    ) -> UsbResult<usize> {
        if length > c_uint::MAX as usize {
            return Err(Error::InvalidParam);
        }

        let mut transfer = usbfs::usbdevfs_bulktransfer {
            ep: endpoint as c_uint,
            len: length as c_uint,
            timeout: timeout.as_millis_truncated_or(0),
            data,
        };

        let fd = self.file.as_raw_fd();
        let transferred = check(unsafe { ioctl_log!(usbfs::usbdevfs_bulk, fd, &mut transfer) })?;
        Ok(transferred as usize)
    }

    /// Asks the device for its standard status word.
    pub fn device_status(&self) -> UsbResult<DeviceStatus> {
        let mut status = [0u8; 2];
        let n = self.read_control(
            request_type(Direction::In, RequestType::Standard, Recipient::Device),
            request::GET_STATUS,
            0,
            0,
            &mut status,
            Some(DEFAULT_REQUEST_TIMEOUT),
        )?;
        if n < 2 {
            return Err(Error::Io);
        }
        Ok(DeviceStatus::from_bits(u16::from_le_bytes(status)))
    }

    /// Whether the endpoint `endpoint` currently has its halt feature set.
    pub fn endpoint_halted(&self, endpoint: u8) -> UsbResult<bool> {
        let mut status = [0u8; 2];
        let n = self.read_control(
            request_type(Direction::In, RequestType::Standard, Recipient::Endpoint),
            request::GET_STATUS,
            0,
            endpoint as u16,
            &mut status,
            Some(DEFAULT_REQUEST_TIMEOUT),
        )?;
        if n < 2 {
            return Err(Error::Io);
        }
        Ok(u16::from_le_bytes(status) & 0x0001 != 0)
    }

    /// Issues a raw SET_ADDRESS to the device.
    ///
    /// Only meaningful against devices that are not being managed by the
    /// kernel's own enumeration, such as ones surfaced through a
    /// pass-through or test harness; a normally enumerated device will
    /// already have an address and reject this.
    pub fn set_device_address(&mut self, address: u8) -> UsbResult<()> {
        self.write_control(
            request_type(Direction::Out, RequestType::Standard, Recipient::Device),
            request::SET_ADDRESS,
            address as u16,
            0,
            &[],
            Some(DEFAULT_REQUEST_TIMEOUT),
        )?;
        Ok(())
    }

    /// Reads the string descriptor at `index` in the device's first
    /// language, lossily converting it to ASCII (non-ASCII code units come
    /// back as `?`).
    ///
    /// Index 0 is the language-ID table rather than a string, so asking for
    /// it fails with [Error::InvalidParam].
    pub fn read_string_descriptor_ascii(
        &self,
        index: u8,
        timeout: Option<Duration>,
    ) -> UsbResult<String> {
        if index == 0 {
            return Err(Error::InvalidParam);
        }

        let langid = self.first_langid(timeout)?;

        let mut buffer = [0u8; 255];
        let value = ((DescriptorType::String as u16) << 8) | index as u16;
        let n = self.read_control(
            request_type(Direction::In, RequestType::Standard, Recipient::Device),
            request::GET_DESCRIPTOR,
            value,
            langid,
            &mut buffer,
            timeout,
        )?;
        decode_string_descriptor(&buffer[..n])
    }

    /// Reads string descriptor 0 and returns the first language ID it
    /// advertises.
    fn first_langid(&self, timeout: Option<Duration>) -> UsbResult<u16> {
        let mut buffer = [0u8; 255];
        let n = self.read_control(
            request_type(Direction::In, RequestType::Standard, Recipient::Device),
            request::GET_DESCRIPTOR,
            (DescriptorType::String as u16) << 8,
            0,
            &mut buffer,
            timeout,
        )?;
        // bLength, bDescriptorType, and at least one language ID.
        if n < 4 {
            return Err(Error::Io);
        }
        Ok(u16::from_le_bytes([buffer[2], buffer[3]]))
    }
}

/// Validates a string descriptor reply and narrows its payload to ASCII.
///
/// The reply's own `bLength` bounds the payload but is device-controlled, so
/// a value shorter than the 2-byte header (or a wrong descriptor type, or a
/// short reply) is rejected as [Error::Io] rather than trusted.
fn decode_string_descriptor(reply: &[u8]) -> UsbResult<String> {
    if reply.len() < 2 || reply[0] < 2 || reply[1] != DescriptorType::String as u8 {
        return Err(Error::Io);
    }
    let length = (reply[0] as usize).min(reply.len());
    Ok(ascii_from_utf16le(&reply[2..length]))
}

/// Shapes an IN transfer's buffer to what the device actually sent. A short
/// read is a success, not an error.
fn take_transferred(mut buffer: Vec<u8>, transferred: usize) -> Vec<u8> {
    buffer.truncate(transferred);
    buffer
}

/// Decodes UTF-16LE code units to a string, replacing everything outside
/// ASCII with `?`. A trailing odd byte is ignored.
fn ascii_from_utf16le(payload: &[u8]) -> String {
    let mut result = String::with_capacity(payload.len() / 2);
    for unit in payload.chunks_exact(2) {
        let unit = u16::from_le_bytes([unit[0], unit[1]]);
        result.push(if unit < 0x80 { unit as u8 as char } else { '?' });
    }
    result
}
