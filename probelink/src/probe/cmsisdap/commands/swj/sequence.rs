/// Implementation of the DAP_SWJ_SEQUENCE command
use super::super::{CmsisDapError, CommandId, Request, SendError, Status};

/// Clocks out up to 256 bits on SWDIO/TMS, LSB first.
#[derive(Clone, Copy, Debug)]
pub struct SequenceRequest {
    bit_count: u8,
    data: [u8; 32],
}

impl Request for SequenceRequest {
    const COMMAND_ID: CommandId = CommandId::SwjSequence;

    type Response = SequenceResponse;

    fn to_bytes(&self, buffer: &mut Vec<u8>) -> Result<(), SendError> {
        buffer.push(self.bit_count);

        // A bit_count of zero means that we want to transmit 256 bits
        let transfer_len_bytes = if self.bit_count == 0 {
            32
        } else {
            usize::from(self.bit_count).div_ceil(8)
        };

        buffer.extend_from_slice(&self.data[..transfer_len_bytes]);
        Ok(())
    }

    fn parse_response(&self, buffer: &[u8]) -> Result<Self::Response, SendError> {
        Ok(SequenceResponse(Status::from_response(buffer)?))
    }
}

impl SequenceRequest {
    /// A sequence of whole bytes.
    pub(crate) fn new(data: &[u8]) -> Result<SequenceRequest, CmsisDapError> {
        if data.len() > 32 {
            return Err(CmsisDapError::TooMuchData);
        }

        let bit_count = match data.len() {
            32 => 0,
            x => (x * 8) as u8,
        };

        let mut owned_data = [0u8; 32];
        owned_data[..data.len()].copy_from_slice(data);

        Ok(SequenceRequest {
            bit_count,
            data: owned_data,
        })
    }
}

#[derive(Clone, Copy, Debug)]
pub struct SequenceResponse(pub(crate) Status);

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn full_sequence_uses_zero_bit_count() {
        let request = SequenceRequest::new(&[0xFF; 32]).unwrap();
        let mut buffer = vec![];
        request.to_bytes(&mut buffer).unwrap();

        assert_eq!(buffer[0], 0);
        assert_eq!(buffer.len(), 33);
    }

    #[test]
    fn switch_sequence_bytes() {
        let request = SequenceRequest::new(&[0x9E, 0xE7]).unwrap();
        let mut buffer = vec![];
        request.to_bytes(&mut buffer).unwrap();

        assert_eq!(buffer, vec![16, 0x9E, 0xE7]);
    }

    #[test]
    fn too_long_sequence() {
        assert!(matches!(
            SequenceRequest::new(&[0; 33]),
            Err(CmsisDapError::TooMuchData)
        ));
    }
}
