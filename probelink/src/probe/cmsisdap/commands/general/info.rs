use super::super::{read_u16, read_u8, CommandId, Request, SendError};

macro_rules! info_command {
    ($id:expr, $name:ident, $response_type:ty) => {
        #[derive(Clone, Default, Debug)]
        pub struct $name;

        impl Request for $name {
            const COMMAND_ID: CommandId = CommandId::Info;

            type Response = $response_type;

            fn to_bytes(&self, buffer: &mut Vec<u8>) -> Result<(), SendError> {
                buffer.push($id);
                Ok(())
            }

            fn parse_response(&self, buffer: &[u8]) -> Result<Self::Response, SendError> {
                ParseFromResponse::from_response(buffer)
            }
        }
    };
}

info_command!(0x04, FirmwareVersionCommand, Option<String>);

info_command!(0xF0, CapabilitiesCommand, Capabilities);

info_command!(0xFE, PacketCountCommand, u8);

info_command!(0xFF, PacketSizeCommand, u16);

trait ParseFromResponse: Sized {
    fn from_response(buffer: &[u8]) -> Result<Self, SendError>;
}

impl ParseFromResponse for Option<String> {
    /// Create a String out of the received buffer.
    ///
    /// The length of the buffer is read from the first byte of the buffer.
    /// If the length is zero, no string is returned.
    fn from_response(buffer: &[u8]) -> Result<Self, SendError> {
        // including the zero terminator
        let string_len = read_u8(buffer, 0)? as usize;

        match string_len {
            0 => Ok(None),
            n => {
                let bytes = buffer.get(1..1 + n).ok_or(SendError::NotEnoughData)?;
                let res = std::str::from_utf8(bytes)?;
                Ok(Some(res.trim_end_matches('\0').to_owned()))
            }
        }
    }
}

impl ParseFromResponse for u8 {
    fn from_response(buffer: &[u8]) -> Result<Self, SendError> {
        if read_u8(buffer, 0)? != 1 {
            Err(SendError::UnexpectedAnswer)
        } else {
            read_u8(buffer, 1)
        }
    }
}

impl ParseFromResponse for u16 {
    fn from_response(buffer: &[u8]) -> Result<Self, SendError> {
        if read_u8(buffer, 0)? != 2 {
            Err(SendError::UnexpectedAnswer)
        } else {
            read_u16(buffer, 1)
        }
    }
}

/// The features a CMSIS-DAP probe reports in `DAP_Info(Capabilities)`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub(crate) swd_implemented: bool,
    pub(crate) jtag_implemented: bool,
    pub(crate) swo_uart_implemented: bool,
    pub(crate) swo_manchester_implemented: bool,
    pub(crate) atomic_commands_implemented: bool,
    pub(crate) test_domain_timer_implemented: bool,
    pub(crate) swo_streaming_trace_implemented: bool,
}

impl ParseFromResponse for Capabilities {
    fn from_response(buffer: &[u8]) -> Result<Self, SendError> {
        // Only the first info byte is described for all versions of CMSIS-DAP.
        if read_u8(buffer, 0)? == 0 {
            return Err(SendError::UnexpectedAnswer);
        }

        let caps = read_u8(buffer, 1)?;
        Ok(Capabilities {
            swd_implemented: caps & 0x01 > 0,
            jtag_implemented: caps & 0x02 > 0,
            swo_uart_implemented: caps & 0x04 > 0,
            swo_manchester_implemented: caps & 0x08 > 0,
            atomic_commands_implemented: caps & 0x10 > 0,
            test_domain_timer_implemented: caps & 0x20 > 0,
            swo_streaming_trace_implemented: caps & 0x40 > 0,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parse_firmware_version() {
        let response = [0x06, b'2', b'.', b'1', b'.', b'0', 0x00];

        let version = FirmwareVersionCommand.parse_response(&response).unwrap();

        assert_eq!(version.as_deref(), Some("2.1.0"));
    }

    #[test]
    fn empty_string_is_none() {
        assert_eq!(FirmwareVersionCommand.parse_response(&[0x00]).unwrap(), None);
    }

    #[test]
    fn truncated_string_is_rejected() {
        assert!(matches!(
            FirmwareVersionCommand.parse_response(&[0x08, b'a']),
            Err(SendError::NotEnoughData)
        ));
    }

    #[test]
    fn parse_capabilities() {
        let caps = CapabilitiesCommand.parse_response(&[0x01, 0x13]).unwrap();

        assert!(caps.swd_implemented);
        assert!(caps.jtag_implemented);
        assert!(caps.atomic_commands_implemented);
        assert!(!caps.swo_uart_implemented);
    }

    #[test]
    fn parse_packet_size() {
        assert_eq!(
            PacketSizeCommand.parse_response(&[0x02, 0x00, 0x02]).unwrap(),
            512
        );
        assert!(PacketSizeCommand.parse_response(&[0x01, 0x40]).is_err());
    }
}
