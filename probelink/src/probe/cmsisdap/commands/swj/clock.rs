use super::super::{CommandId, Request, SendError, Status};

/// Sets the clock frequency of the SWD/JTAG lines, in Hz.
#[derive(Clone, Copy, Debug)]
pub struct SWJClockRequest(pub(crate) u32);

impl Request for SWJClockRequest {
    const COMMAND_ID: CommandId = CommandId::SwjClock;

    type Response = SWJClockResponse;

    fn to_bytes(&self, buffer: &mut Vec<u8>) -> Result<(), SendError> {
        buffer.extend_from_slice(&self.0.to_le_bytes());
        Ok(())
    }

    fn parse_response(&self, buffer: &[u8]) -> Result<Self::Response, SendError> {
        Ok(SWJClockResponse(Status::from_response(buffer)?))
    }
}

#[derive(Clone, Copy, Debug)]
pub struct SWJClockResponse(pub(crate) Status);
