//! SWD specific commands.

use super::{CommandId, Request, SendError, Status};

/// `DAP_SWD_Configure`, which sets the turnaround period and whether WAIT and
/// FAULT acknowledges are followed by a data phase.
#[derive(Clone, Copy, Debug, Default)]
pub struct SwdConfigureRequest {
    /// Turnaround cycles minus one, 0 to 3.
    pub turnaround: u8,
    pub always_data_phase: bool,
}

impl Request for SwdConfigureRequest {
    const COMMAND_ID: CommandId = CommandId::SwdConfigure;

    type Response = Status;

    fn to_bytes(&self, buffer: &mut Vec<u8>) -> Result<(), SendError> {
        buffer.push((self.turnaround & 0b11) | u8::from(self.always_data_phase) << 2);
        Ok(())
    }

    fn parse_response(&self, buffer: &[u8]) -> Result<Self::Response, SendError> {
        Status::from_response(buffer)
    }
}
