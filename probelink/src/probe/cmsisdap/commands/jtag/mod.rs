//! JTAG scan chain commands.

use super::{read_u32, CmsisDapError, CommandId, Request, SendError, Status};

/// `DAP_JTAG_Configure` with the instruction register length of every TAP in
/// the scan chain, closest to TDI first.
#[derive(Clone, Debug)]
pub struct ScanChainRequest {
    ir_lengths: Vec<u8>,
}

impl ScanChainRequest {
    pub(crate) fn new(ir_lengths: Vec<u8>) -> Result<Self, CmsisDapError> {
        if u8::try_from(ir_lengths.len()).is_err() {
            return Err(CmsisDapError::TooMuchData);
        }
        Ok(Self { ir_lengths })
    }
}

impl Request for ScanChainRequest {
    const COMMAND_ID: CommandId = CommandId::JtagConfigure;

    type Response = Status;

    fn to_bytes(&self, buffer: &mut Vec<u8>) -> Result<(), SendError> {
        buffer.push(self.ir_lengths.len() as u8);
        buffer.extend(&self.ir_lengths);
        Ok(())
    }

    fn parse_response(&self, buffer: &[u8]) -> Result<Self::Response, SendError> {
        Status::from_response(buffer)
    }
}

/// `DAP_JTAG_IDCODE`, which reads the IDCODE of one TAP.
#[derive(Clone, Copy, Debug)]
pub struct IdcodeRequest {
    pub tap: u8,
}

impl Request for IdcodeRequest {
    const COMMAND_ID: CommandId = CommandId::JtagIdcode;

    type Response = (Status, u32);

    fn to_bytes(&self, buffer: &mut Vec<u8>) -> Result<(), SendError> {
        buffer.push(self.tap);
        Ok(())
    }

    fn parse_response(&self, buffer: &[u8]) -> Result<Self::Response, SendError> {
        Ok((Status::from_response(buffer)?, read_u32(buffer, 1)?))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn idcode_follows_the_status() {
        let (status, idcode) = IdcodeRequest { tap: 0 }
            .parse_response(&[0x00, 0x77, 0x04, 0xA0, 0x4B])
            .unwrap();

        assert_eq!(status, Status::DapOk);
        assert_eq!(idcode, 0x4BA0_0477);
    }

    #[test]
    fn scan_chain_is_length_prefixed() {
        let mut buffer = vec![];
        ScanChainRequest::new(vec![4, 5])
            .unwrap()
            .to_bytes(&mut buffer)
            .unwrap();

        assert_eq!(buffer, vec![2, 4, 5]);
        assert!(ScanChainRequest::new(vec![4; 256]).is_err());
    }
}
