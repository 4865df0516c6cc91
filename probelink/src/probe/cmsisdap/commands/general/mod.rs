//! Commands which select the wire protocol and drive the pins of the probe.

pub mod info;

use super::{read_u8, CommandId, Request, SendError, Status};
use crate::probe::WireProtocol;

/// `DAP_Connect`, which switches the debug pins to the given protocol.
///
/// The response is the protocol the probe switched to, or `None` if it could not.
#[derive(Clone, Copy, Debug)]
pub struct ConnectRequest(pub WireProtocol);

impl Request for ConnectRequest {
    const COMMAND_ID: CommandId = CommandId::Connect;

    type Response = Option<WireProtocol>;

    fn to_bytes(&self, buffer: &mut Vec<u8>) -> Result<(), SendError> {
        buffer.push(match self.0 {
            WireProtocol::Swd => 1,
            WireProtocol::Jtag => 2,
        });
        Ok(())
    }

    fn parse_response(&self, buffer: &[u8]) -> Result<Self::Response, SendError> {
        match read_u8(buffer, 0)? {
            0 => Ok(None),
            1 => Ok(Some(WireProtocol::Swd)),
            2 => Ok(Some(WireProtocol::Jtag)),
            port => Err(SendError::ConnectResponseError(port)),
        }
    }
}

/// `DAP_Disconnect`, which releases the debug pins.
#[derive(Clone, Copy, Debug)]
pub struct DisconnectRequest;

impl Request for DisconnectRequest {
    const COMMAND_ID: CommandId = CommandId::Disconnect;

    type Response = Status;

    fn to_bytes(&self, _buffer: &mut Vec<u8>) -> Result<(), SendError> {
        Ok(())
    }

    fn parse_response(&self, buffer: &[u8]) -> Result<Self::Response, SendError> {
        Status::from_response(buffer)
    }
}

/// `DAP_HostStatus` for the "connected" LED of the probe.
#[derive(Clone, Copy, Debug)]
pub struct ConnectedLedRequest(pub bool);

impl Request for ConnectedLedRequest {
    const COMMAND_ID: CommandId = CommandId::HostStatus;

    type Response = ();

    fn to_bytes(&self, buffer: &mut Vec<u8>) -> Result<(), SendError> {
        // Status type 0 is the connected LED, 1 would be the running LED.
        buffer.extend_from_slice(&[0, u8::from(self.0)]);
        Ok(())
    }

    fn parse_response(&self, buffer: &[u8]) -> Result<Self::Response, SendError> {
        read_u8(buffer, 0).map(drop)
    }
}

/// `DAP_ResetTarget`, which runs the reset sequence of the probe, usually a
/// pulse on nRESET.
#[derive(Clone, Copy, Debug)]
pub struct ResetRequest;

#[derive(Debug, Clone, Copy)]
pub struct ResetResponse {
    pub status: Status,
    /// The probe knows a reset sequence specific to the target and ran it.
    pub device_specific: bool,
}

impl Request for ResetRequest {
    const COMMAND_ID: CommandId = CommandId::ResetTarget;

    type Response = ResetResponse;

    fn to_bytes(&self, _buffer: &mut Vec<u8>) -> Result<(), SendError> {
        Ok(())
    }

    fn parse_response(&self, buffer: &[u8]) -> Result<Self::Response, SendError> {
        let device_specific = match read_u8(buffer, 1)? {
            0 => false,
            1 => true,
            _ => return Err(SendError::UnexpectedAnswer),
        };

        Ok(ResetResponse {
            status: Status::from_response(buffer)?,
            device_specific,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn connect_reports_the_selected_protocol() {
        let request = ConnectRequest(WireProtocol::Jtag);
        let mut buffer = vec![];
        request.to_bytes(&mut buffer).unwrap();

        assert_eq!(buffer, vec![2]);
        assert_eq!(request.parse_response(&[2]).unwrap(), Some(WireProtocol::Jtag));
        assert_eq!(request.parse_response(&[0]).unwrap(), None);
        assert!(request.parse_response(&[7]).is_err());
    }

    #[test]
    fn reset_without_device_sequence() {
        let response = ResetRequest.parse_response(&[0x00, 0x00]).unwrap();

        assert_eq!(response.status, Status::DapOk);
        assert!(!response.device_specific);
    }
}
