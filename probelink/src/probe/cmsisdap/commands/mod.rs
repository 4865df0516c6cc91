pub mod general;
pub mod jtag;
pub mod swd;
pub mod swj;
pub mod transfer;

use std::fmt;
use std::str::Utf8Error;
use std::time::Duration;

use scroll::{Pread, LE};

/// Errors of the CMSIS-DAP driver.
#[derive(Debug, thiserror::Error)]
pub enum CmsisDapError {
    /// A command could not be exchanged with the probe.
    #[error("Error handling CMSIS-DAP command {command_id:?}")]
    Send {
        /// The command which failed.
        command_id: CommandId,
        /// What went wrong.
        source: SendError,
    },
    /// The probe answered a command with the error status.
    #[error("CMSIS-DAP responded with an error to command {0:?}")]
    ErrorResponse(CommandId),
    /// A command was given more data than it can carry.
    #[error("Too much data provided for SWJ Sequence command")]
    TooMuchData,
    /// The probe did not switch to the requested wire protocol.
    #[error("Connecting to the target failed")]
    ConnectFailed,
    /// The probe did not report a usable packet size.
    #[error("Could not determine a suitable packet size for this probe")]
    NoPacketSize,
}

/// Errors of a single command exchange.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// The HID library reported an error.
    #[error("Error in the USB HID access")]
    HidApi(#[from] hidapi::HidError),
    /// libusb reported an error.
    #[error("Error in the USB access")]
    UsbError(rusb::Error),
    /// The response is shorter than its command requires.
    #[error("Not enough data in response from probe")]
    NotEnoughData,
    /// The request is larger than a packet.
    #[error("The request of {size} bytes does not fit into a packet of {max} bytes")]
    PacketTooLarge {
        /// Size of the request.
        size: usize,
        /// Size of a packet.
        max: usize,
    },
    /// A status byte other than OK or error.
    #[error("Status can only be 0x00 or 0xFF")]
    InvalidResponseStatus,
    /// The probe answered DAP_Connect with an unexpected port.
    #[error("Connecting to target failed, received: {0:x}")]
    ConnectResponseError(u8),
    /// The response belongs to another command.
    #[error("Command ID in response ({0:#04x}) does not match sent command ID")]
    CommandIdMismatch(u8),
    /// String in response is not valid UTF-8.
    ///
    /// Strings are required to be UTF-8 encoded by the
    /// CMSIS-DAP specification.
    #[error("String in response is not valid UTF-8.")]
    InvalidString(#[from] Utf8Error),
    /// The response does not match the request.
    #[error("Unexpected answer to command")]
    UnexpectedAnswer,
    /// The probe did not answer in time.
    #[error("Timeout in USB communication.")]
    Timeout,
}

impl From<rusb::Error> for SendError {
    fn from(error: rusb::Error) -> Self {
        match error {
            rusb::Error::Timeout => SendError::Timeout,
            other => SendError::UsbError(other),
        }
    }
}

/// Moves whole CMSIS-DAP packets between host and probe.
///
/// A request starts with the command ID, and so does the response. Framing
/// details of the underlying USB class, like HID report IDs, are handled by
/// the implementation.
pub trait DapTransport: Send + fmt::Debug {
    /// Send one command packet and wait for its response packet.
    fn send_command(&mut self, request: &[u8]) -> Result<Vec<u8>, SendError>;

    /// The largest packet the probe accepts.
    fn packet_size(&self) -> usize;

    /// Use a packet size reported by the probe.
    fn set_packet_size(&mut self, _packet_size: usize) {}

    /// How long to wait for each USB transfer of a command.
    fn set_timeout(&mut self, _timeout: Duration) {}
}

/// A CMSIS-DAP probe attached over USB.
pub enum CmsisDapDevice {
    /// CMSIS-DAP v1 over HID.
    /// Stores a HID device handle and maximum HID report size.
    V1 {
        /// The opened HID device.
        handle: hidapi::HidDevice,
        /// Size of a report, without the report ID.
        report_size: usize,
        /// Limit for each read of a response.
        timeout: Duration,
    },

    /// CMSIS-DAP v2 over WinUSB/Bulk.
    /// Stores an rusb device handle, out/in EP addresses and the maximum DAP packet size.
    V2 {
        /// The opened device, with the CMSIS-DAP interface claimed.
        handle: rusb::DeviceHandle<rusb::Context>,
        /// Address of the bulk OUT endpoint.
        out_ep: u8,
        /// Address of the bulk IN endpoint.
        in_ep: u8,
        /// Size of a DAP packet.
        max_packet_size: usize,
        /// Limit for each bulk transfer.
        timeout: Duration,
    },
}

impl fmt::Debug for CmsisDapDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CmsisDapDevice::V1 { report_size, .. } => f
                .debug_struct("V1")
                .field("report_size", report_size)
                .finish_non_exhaustive(),
            CmsisDapDevice::V2 {
                out_ep,
                in_ep,
                max_packet_size,
                ..
            } => f
                .debug_struct("V2")
                .field("out_ep", out_ep)
                .field("in_ep", in_ep)
                .field("max_packet_size", max_packet_size)
                .finish_non_exhaustive(),
        }
    }
}

impl CmsisDapDevice {
    /// Drain any pending data from the probe, ensuring future responses are
    /// synchronised to requests. Swallows any errors, which are expected if
    /// there is no pending data to read.
    pub(super) fn drain(&self) {
        tracing::debug!("Draining probe of any pending data.");

        match self {
            CmsisDapDevice::V1 {
                handle,
                report_size,
                ..
            } => loop {
                let mut discard = vec![0u8; report_size + 1];
                match handle.read_timeout(&mut discard, 1) {
                    Ok(n) if n != 0 => continue,
                    _ => break,
                }
            },

            CmsisDapDevice::V2 {
                handle,
                in_ep,
                max_packet_size,
                ..
            } => {
                let timeout = Duration::from_millis(1);
                let mut discard = vec![0u8; *max_packet_size];
                loop {
                    match handle.read_bulk(*in_ep, &mut discard, timeout) {
                        Ok(n) if n != 0 => continue,
                        _ => break,
                    }
                }
            }
        }
    }
}

impl DapTransport for CmsisDapDevice {
    fn send_command(&mut self, request: &[u8]) -> Result<Vec<u8>, SendError> {
        match self {
            CmsisDapDevice::V1 {
                handle,
                report_size,
                timeout,
            } => {
                let report = hid_report(request, *report_size)?;
                handle.write(&report)?;

                let mut response = vec![0u8; *report_size];
                let timeout_ms = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
                match handle.read_timeout(&mut response, timeout_ms)? {
                    // Timeout is not indicated by error, but by returning 0 read bytes
                    0 => Err(SendError::Timeout),
                    n => {
                        response.truncate(n);
                        Ok(response)
                    }
                }
            }
            CmsisDapDevice::V2 {
                handle,
                out_ep,
                in_ep,
                max_packet_size,
                timeout,
            } => {
                handle.write_bulk(*out_ep, request, *timeout)?;

                let mut response = vec![0u8; *max_packet_size];
                let n = handle.read_bulk(*in_ep, &mut response, *timeout)?;
                response.truncate(n);
                Ok(response)
            }
        }
    }

    fn packet_size(&self) -> usize {
        match self {
            CmsisDapDevice::V1 { report_size, .. } => *report_size,
            CmsisDapDevice::V2 {
                max_packet_size, ..
            } => *max_packet_size,
        }
    }

    fn set_packet_size(&mut self, packet_size: usize) {
        tracing::debug!("Configuring probe to use packet size {}", packet_size);
        match self {
            CmsisDapDevice::V1 { report_size, .. } => *report_size = packet_size,
            CmsisDapDevice::V2 {
                max_packet_size, ..
            } => *max_packet_size = packet_size,
        }
    }

    fn set_timeout(&mut self, new_timeout: Duration) {
        tracing::debug!("Using a USB timeout of {:?}", new_timeout);
        match self {
            CmsisDapDevice::V1 { timeout, .. } | CmsisDapDevice::V2 { timeout, .. } => {
                *timeout = new_timeout
            }
        }
    }
}

/// Frames a request as a HID output report.
///
/// HID reports start with the report ID, which is always zero for CMSIS-DAP,
/// and always have the full report size.
pub(crate) fn hid_report(request: &[u8], report_size: usize) -> Result<Vec<u8>, SendError> {
    if request.len() > report_size {
        return Err(SendError::PacketTooLarge {
            size: request.len(),
            max: report_size,
        });
    }

    let mut report = vec![0u8; report_size + 1];
    report[1..=request.len()].copy_from_slice(request);
    Ok(report)
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Status {
    DapOk = 0x00,
    DapError = 0xFF,
}

impl Status {
    pub fn from_byte(value: u8) -> Result<Self, SendError> {
        match value {
            0x00 => Ok(Status::DapOk),
            0xFF => Ok(Status::DapError),
            _ => Err(SendError::InvalidResponseStatus),
        }
    }

    /// Parses the status byte at the start of a response.
    pub fn from_response(buffer: &[u8]) -> Result<Self, SendError> {
        Self::from_byte(read_u8(buffer, 0)?)
    }
}

/// Command ID for CMSIS-DAP commands.
///
/// The command ID is always sent as the first byte for every command,
/// and also is the first byte of every response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandId {
    /// `DAP_Info`
    Info = 0x00,
    /// `DAP_HostStatus`
    HostStatus = 0x01,
    /// `DAP_Connect`
    Connect = 0x02,
    /// `DAP_Disconnect`
    Disconnect = 0x03,
    /// `DAP_TransferConfigure`
    TransferConfigure = 0x04,
    /// `DAP_Transfer`
    Transfer = 0x05,
    /// `DAP_TransferBlock`
    TransferBlock = 0x06,
    /// `DAP_WriteABORT`
    WriteAbort = 0x08,
    /// `DAP_ResetTarget`
    ResetTarget = 0x0A,
    /// `DAP_SWJ_Clock`
    SwjClock = 0x11,
    /// `DAP_SWJ_Sequence`
    SwjSequence = 0x12,
    /// `DAP_SWD_Configure`
    SwdConfigure = 0x13,
    /// `DAP_JTAG_Configure`
    JtagConfigure = 0x15,
    /// `DAP_JTAG_IDCODE`
    JtagIdcode = 0x16,
}

pub(crate) trait Request {
    const COMMAND_ID: CommandId;

    type Response;

    /// Append the payload of the request, which follows the command ID, to `buffer`.
    fn to_bytes(&self, buffer: &mut Vec<u8>) -> Result<(), SendError>;

    /// Parse the payload of the response, which follows the echoed command ID.
    fn parse_response(&self, buffer: &[u8]) -> Result<Self::Response, SendError>;
}

pub(crate) fn send_command<Req: Request>(
    device: &mut dyn DapTransport,
    request: &Req,
) -> Result<Req::Response, CmsisDapError> {
    send_command_inner(device, request).map_err(|source| CmsisDapError::Send {
        command_id: Req::COMMAND_ID,
        source,
    })
}

fn send_command_inner<Req: Request>(
    device: &mut dyn DapTransport,
    request: &Req,
) -> Result<Req::Response, SendError> {
    let mut buffer = Vec::with_capacity(device.packet_size());
    buffer.push(Req::COMMAND_ID as u8);
    request.to_bytes(&mut buffer)?;

    if buffer.len() > device.packet_size() {
        return Err(SendError::PacketTooLarge {
            size: buffer.len(),
            max: device.packet_size(),
        });
    }

    trace_buffer("Transmit buffer", &buffer);
    let response = device.send_command(&buffer)?;
    trace_buffer("Receive buffer", &response);

    match response.split_first() {
        None => Err(SendError::NotEnoughData),
        Some((&id, payload)) if id == Req::COMMAND_ID as u8 => request.parse_response(payload),
        Some((&id, _)) => Err(SendError::CommandIdMismatch(id)),
    }
}

pub(crate) fn read_u8(buffer: &[u8], offset: usize) -> Result<u8, SendError> {
    buffer
        .get(offset)
        .copied()
        .ok_or(SendError::NotEnoughData)
}

pub(crate) fn read_u16(buffer: &[u8], offset: usize) -> Result<u16, SendError> {
    buffer
        .pread_with(offset, LE)
        .map_err(|_| SendError::NotEnoughData)
}

pub(crate) fn read_u32(buffer: &[u8], offset: usize) -> Result<u32, SendError> {
    buffer
        .pread_with(offset, LE)
        .map_err(|_| SendError::NotEnoughData)
}

/// Trace log a buffer, including only the first trailing zero.
///
/// This is useful for the CMSIS-DAP USB buffers, which often contain many trailing
/// zeros required for the various USB APIs, but make the trace output very long and
/// difficult to read.
fn trace_buffer(name: &str, buf: &[u8]) {
    if tracing::enabled!(tracing::Level::TRACE) {
        let len = buf.len();
        let cut = len + 1 - buf.iter().rev().position(|&x| x != 0).unwrap_or(len);
        let end = std::cmp::min(len, std::cmp::max(1, cut));
        tracing::trace!("{}: {:02X?}...", name, &buf[..end]);
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::{DapTransport, SendError};
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::time::Duration;

    /// A transport answering with scripted responses, recording every request.
    #[derive(Debug, Default)]
    pub struct ScriptedTransport {
        pub requests: Arc<Mutex<Vec<Vec<u8>>>>,
        pub responses: VecDeque<Vec<u8>>,
        pub packet_size: usize,
        pub timeout: Arc<Mutex<Option<Duration>>>,
    }

    impl ScriptedTransport {
        pub fn new(responses: impl IntoIterator<Item = Vec<u8>>) -> Self {
            Self {
                requests: Arc::default(),
                responses: responses.into_iter().collect(),
                packet_size: 64,
                timeout: Arc::default(),
            }
        }
    }

    impl DapTransport for ScriptedTransport {
        fn send_command(&mut self, request: &[u8]) -> Result<Vec<u8>, SendError> {
            self.requests.lock().push(request.to_vec());
            self.responses.pop_front().ok_or(SendError::Timeout)
        }

        fn packet_size(&self) -> usize {
            self.packet_size
        }

        fn set_packet_size(&mut self, packet_size: usize) {
            self.packet_size = packet_size;
        }

        fn set_timeout(&mut self, timeout: Duration) {
            *self.timeout.lock() = Some(timeout);
        }
    }
}

#[cfg(test)]
mod test {
    use super::mock::ScriptedTransport;
    use super::*;
    use crate::probe::cmsisdap::commands::general::ConnectedLedRequest;
    use pretty_assertions::assert_eq;

    #[test]
    fn hid_report_is_prefixed_and_padded() {
        let report = hid_report(&[0x02, 0x01], 8).unwrap();

        assert_eq!(report, vec![0x00, 0x02, 0x01, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn hid_report_rejects_oversized_request() {
        assert!(matches!(
            hid_report(&[0; 65], 64),
            Err(SendError::PacketTooLarge { size: 65, max: 64 })
        ));
    }

    #[test]
    fn response_must_echo_command_id() {
        let mut transport = ScriptedTransport::new([vec![0x02, 0x00]]);

        let result = send_command(&mut transport, &ConnectedLedRequest(true));

        assert!(matches!(
            result,
            Err(CmsisDapError::Send {
                command_id: CommandId::HostStatus,
                source: SendError::CommandIdMismatch(0x02)
            })
        ));
        assert_eq!(*transport.requests.lock(), vec![vec![0x01, 0x00, 0x01]]);
    }

    #[test]
    fn empty_response_is_reported() {
        let mut transport = ScriptedTransport::new([vec![]]);

        let result = send_command(&mut transport, &ConnectedLedRequest(false));

        assert!(matches!(
            result,
            Err(CmsisDapError::Send {
                source: SendError::NotEnoughData,
                ..
            })
        ));
    }
}
