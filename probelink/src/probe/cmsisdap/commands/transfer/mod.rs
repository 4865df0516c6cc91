use super::{read_u16, read_u32, read_u8, CommandId, Request, SendError, Status};
use crate::architecture::arm::PortType;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RW {
    R = 1,
    W = 0,
}

/// Contains information about requested access from host debugger.
#[allow(non_snake_case)]
#[derive(Clone, Debug)]
struct InnerTransferRequest {
    /// 0 = Debug PortType (DP), 1 = Access PortType (AP).
    pub APnDP: bool,
    /// 0 = Write Register, 1 = Read Register.
    pub RnW: RW,
    /// A2 Register Address bit 2.
    pub A2: bool,
    /// A3 Register Address bit 3.
    pub A3: bool,

    /// Contains the optional data word, only present for register writes.
    pub data: Option<u32>,
}

impl InnerTransferRequest {
    fn new(port: PortType, address: u8, rw: RW, data: Option<u32>) -> Self {
        Self {
            APnDP: port == PortType::AccessPort,
            RnW: rw,
            A2: (address >> 2) & 0x01 == 1,
            A3: (address >> 3) & 0x01 == 1,
            data,
        }
    }

    fn to_bytes(&self, buffer: &mut Vec<u8>) {
        buffer.push(
            (self.APnDP as u8)
                | (self.RnW as u8) << 1
                | u8::from(self.A2) << 2
                | u8::from(self.A3) << 3,
        );
        if let Some(data) = self.data {
            buffer.extend_from_slice(&data.to_le_bytes());
        }
    }
}

/// Read/write single and multiple registers.
///
/// The DAP_Transfer Command reads or writes data to CoreSight registers.
/// Each CoreSight register is accessed with a single 32-bit read or write.
/// The CoreSight registers are addressed with DPBANKSEL/APBANKSEL and address lines A2, A3 (A0 = 0 and A1 = 0).
/// The data transfer is aborted on a communication error:
///
/// - Protocol Error
/// - Target FAULT response
/// - Target WAIT responses exceed configured value
#[derive(Debug)]
pub struct TransferRequest {
    /// Zero based device index of the selected JTAG device. For SWD mode the value is ignored.
    pub dap_index: u8,
    transfers: Vec<InnerTransferRequest>,
}

impl TransferRequest {
    pub fn read(port: PortType, address: u8) -> Self {
        Self {
            dap_index: 0,
            transfers: vec![InnerTransferRequest::new(port, address, RW::R, None)],
        }
    }

    pub fn write(port: PortType, address: u8, data: u32) -> Self {
        Self {
            dap_index: 0,
            transfers: vec![InnerTransferRequest::new(port, address, RW::W, Some(data))],
        }
    }
}

impl Request for TransferRequest {
    const COMMAND_ID: CommandId = CommandId::Transfer;

    type Response = TransferResponse;

    fn to_bytes(&self, buffer: &mut Vec<u8>) -> Result<(), SendError> {
        buffer.push(self.dap_index);
        buffer.push(self.transfers.len() as u8);

        for transfer in self.transfers.iter() {
            transfer.to_bytes(buffer);
        }

        Ok(())
    }

    fn parse_response(&self, buffer: &[u8]) -> Result<Self::Response, SendError> {
        let transfer_count = read_u8(buffer, 0)? as usize;
        if transfer_count > self.transfers.len() {
            tracing::error!("Transfer count larger than requested number of transfers");
            return Err(SendError::UnexpectedAnswer);
        }

        let last_transfer_response = LastTransferResponse::from_byte(read_u8(buffer, 1)?);

        // Read data is only present for completed reads.
        let mut data = Vec::with_capacity(transfer_count);
        let mut offset = 2;
        for (index, request) in self.transfers.iter().take(transfer_count).enumerate() {
            let completed = index + 1 < transfer_count || last_transfer_response.ack == Ack::Ok;
            if request.RnW == RW::R && completed {
                data.push(read_u32(buffer, offset)?);
                offset += 4;
            }
        }

        Ok(TransferResponse {
            transfer_count,
            last_transfer_response,
            data,
        })
    }
}

/// The acknowledge of a SWD or JTAG transfer, as reported by the probe.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Ack {
    /// OK (for SWD protocol), OK or FAULT (for JTAG protocol),
    Ok = 1,
    Wait = 2,
    Fault = 4,
    NoAck = 7,
}

#[derive(Debug, Clone, Copy)]
pub struct LastTransferResponse {
    pub ack: Ack,
    pub protocol_error: bool,
}

impl LastTransferResponse {
    fn from_byte(byte: u8) -> Self {
        LastTransferResponse {
            ack: match byte & 0x7 {
                1 => Ack::Ok,
                2 => Ack::Wait,
                4 => Ack::Fault,
                _ => Ack::NoAck,
            },
            protocol_error: byte & 0x8 != 0,
        }
    }
}

#[derive(Debug)]
pub struct TransferResponse {
    /// Number of transfers the probe executed.
    pub transfer_count: usize,
    /// Contains information about last response from target Device.
    pub last_transfer_response: LastTransferResponse,
    /// Data of the completed reads.
    pub data: Vec<u32>,
}

/// Read or write a single register many times.
#[derive(Debug)]
pub(crate) struct TransferBlockRequest {
    /// Zero-based device index of the selected JTAG device. For SWD mode the
    /// value is ignored.
    dap_index: u8,
    /// Number of transfers
    transfer_count: u16,

    /// Information about requested access
    transfer_request: InnerTransferBlockRequest,

    /// Register values to write for writes
    transfer_data: Vec<u32>,
}

impl Request for TransferBlockRequest {
    const COMMAND_ID: CommandId = CommandId::TransferBlock;

    type Response = TransferBlockResponse;

    fn to_bytes(&self, buffer: &mut Vec<u8>) -> Result<(), SendError> {
        buffer.push(self.dap_index);
        buffer.extend_from_slice(&self.transfer_count.to_le_bytes());
        buffer.push(self.transfer_request.to_byte());

        for word in &self.transfer_data {
            buffer.extend_from_slice(&word.to_le_bytes());
        }

        Ok(())
    }

    fn parse_response(&self, buffer: &[u8]) -> Result<Self::Response, SendError> {
        let transfer_count = read_u16(buffer, 0)?;
        let last_transfer_response = LastTransferResponse::from_byte(read_u8(buffer, 2)?);

        let mut data = Vec::new();

        // Writes do not return anything interesting besides the count.
        if self.transfer_request.r_n_w == RW::R {
            data.reserve(transfer_count as usize);
            for index in 0..transfer_count as usize {
                data.push(read_u32(buffer, 3 + index * 4)?);
            }
        }

        Ok(TransferBlockResponse {
            transfer_count,
            last_transfer_response,
            transfer_data: data,
        })
    }
}

impl TransferBlockRequest {
    pub(crate) fn write_request(port: PortType, address: u8, data: Vec<u32>) -> Self {
        TransferBlockRequest {
            dap_index: 0,
            transfer_count: data.len() as u16,
            transfer_request: InnerTransferBlockRequest::new(port, address, RW::W),
            transfer_data: data,
        }
    }

    pub(crate) fn read_request(port: PortType, address: u8, read_count: u16) -> Self {
        TransferBlockRequest {
            dap_index: 0,
            transfer_count: read_count,
            transfer_request: InnerTransferBlockRequest::new(port, address, RW::R),
            transfer_data: Vec::new(),
        }
    }
}

#[derive(Debug)]
struct InnerTransferBlockRequest {
    ap_n_dp: bool,
    r_n_w: RW,
    a2: bool,
    a3: bool,
}

impl InnerTransferBlockRequest {
    fn new(port: PortType, address: u8, r_n_w: RW) -> Self {
        Self {
            ap_n_dp: port == PortType::AccessPort,
            r_n_w,
            a2: (address >> 2) & 0x01 == 1,
            a3: (address >> 3) & 0x01 == 1,
        }
    }

    fn to_byte(&self) -> u8 {
        (self.ap_n_dp as u8)
            | (self.r_n_w as u8) << 1
            | u8::from(self.a2) << 2
            | u8::from(self.a3) << 3
    }
}

#[derive(Debug)]
pub(crate) struct TransferBlockResponse {
    pub transfer_count: u16,
    pub last_transfer_response: LastTransferResponse,
    pub transfer_data: Vec<u32>,
}

/// `DAP_TransferConfigure`, the idle cycles and retries the probe applies to
/// `DAP_Transfer` and `DAP_TransferBlock`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransferConfigureRequest {
    pub idle_cycles: u8,
    /// How often the probe itself repeats a transfer answered with WAIT.
    pub wait_retry: u16,
    pub match_retry: u16,
}

impl Request for TransferConfigureRequest {
    const COMMAND_ID: CommandId = CommandId::TransferConfigure;

    type Response = Status;

    fn to_bytes(&self, buffer: &mut Vec<u8>) -> Result<(), SendError> {
        buffer.push(self.idle_cycles);
        buffer.extend(self.wait_retry.to_le_bytes());
        buffer.extend(self.match_retry.to_le_bytes());
        Ok(())
    }

    fn parse_response(&self, buffer: &[u8]) -> Result<Self::Response, SendError> {
        Status::from_response(buffer)
    }
}

/// `DAP_WriteABORT`. In JTAG mode ABORT has its own scan chain and cannot be
/// written with `DAP_Transfer`.
#[derive(Debug, Clone, Copy)]
pub struct WriteAbortRequest {
    /// The TAP of the debug port, ignored for SWD.
    pub tap: u8,
    pub value: u32,
}

impl Request for WriteAbortRequest {
    const COMMAND_ID: CommandId = CommandId::WriteAbort;

    type Response = Status;

    fn to_bytes(&self, buffer: &mut Vec<u8>) -> Result<(), SendError> {
        buffer.push(self.tap);
        buffer.extend(self.value.to_le_bytes());
        Ok(())
    }

    fn parse_response(&self, buffer: &[u8]) -> Result<Self::Response, SendError> {
        Status::from_response(buffer)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn write_select_request_bytes() {
        let request = TransferRequest::write(PortType::DebugPort, 0x8, 0x0100_00F0);
        let mut buffer = vec![];
        request.to_bytes(&mut buffer).unwrap();

        // DP write with A3 set
        assert_eq!(buffer, vec![0x00, 0x01, 0x08, 0xF0, 0x00, 0x00, 0x01]);
    }

    #[test]
    fn read_drw_request_bytes() {
        let request = TransferRequest::read(PortType::AccessPort, 0xC);
        let mut buffer = vec![];
        request.to_bytes(&mut buffer).unwrap();

        assert_eq!(buffer, vec![0x00, 0x01, 0b0000_1111]);
    }

    #[test]
    fn parse_successful_read() {
        let request = TransferRequest::read(PortType::DebugPort, 0x0);

        let response = request
            .parse_response(&[0x01, 0x01, 0x77, 0x14, 0xA0, 0x2B])
            .unwrap();

        assert_eq!(response.last_transfer_response.ack, Ack::Ok);
        assert_eq!(response.data, vec![0x2BA0_1477]);
    }

    #[test]
    fn parse_wait_has_no_data() {
        let request = TransferRequest::read(PortType::AccessPort, 0xC);

        let response = request.parse_response(&[0x01, 0x02]).unwrap();

        assert_eq!(response.last_transfer_response.ack, Ack::Wait);
        assert!(response.data.is_empty());
    }

    #[test]
    fn parse_protocol_error() {
        let request = TransferRequest::read(PortType::AccessPort, 0xC);

        let response = request.parse_response(&[0x00, 0x0F]).unwrap();

        assert!(response.last_transfer_response.protocol_error);
    }

    #[test]
    fn block_read_response() {
        let request = TransferBlockRequest::read_request(PortType::AccessPort, 0xC, 2);

        let response = request
            .parse_response(&[0x02, 0x00, 0x01, 1, 0, 0, 0, 2, 0, 0, 0])
            .unwrap();

        assert_eq!(response.transfer_count, 2);
        assert_eq!(response.transfer_data, vec![1, 2]);
    }

    #[test]
    fn block_write_request_bytes() {
        let request = TransferBlockRequest::write_request(PortType::AccessPort, 0xC, vec![0xAA]);
        let mut buffer = vec![];
        request.to_bytes(&mut buffer).unwrap();

        assert_eq!(buffer, vec![0x00, 0x01, 0x00, 0b0000_1101, 0xAA, 0, 0, 0]);
    }
}
