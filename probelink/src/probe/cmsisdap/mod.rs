//! CMSIS-DAP probe implementation.
pub(crate) mod commands;
mod tools;

use crate::{
    architecture::arm::{dp::Abort, DapError, PortType, RawDapAccess, Register},
    probe::{
        DebugProbe, DebugProbeError, DebugProbeInfo, DebugProbeSelector, ProbeFactory,
        WireProtocol,
    },
};

use commands::{
    general::{
        info::{
            Capabilities, CapabilitiesCommand, FirmwareVersionCommand, PacketCountCommand,
            PacketSizeCommand,
        },
        ConnectRequest, ConnectedLedRequest, DisconnectRequest, ResetRequest,
    },
    jtag::{IdcodeRequest, ScanChainRequest},
    swd::SwdConfigureRequest,
    swj::{clock::SWJClockRequest, sequence::SequenceRequest},
    transfer::{
        Ack, LastTransferResponse, TransferBlockRequest, TransferConfigureRequest,
        TransferRequest, WriteAbortRequest,
    },
    Status,
};

pub use commands::{CmsisDapDevice, CmsisDapError, CommandId, DapTransport, SendError};

use std::fmt;
use std::time::Duration;

/// The IR length of the ARM JTAG-DP.
const ARM_JTAG_IR_LENGTH: u8 = 4;

/// A factory for creating [`CmsisDap`] probes.
#[derive(Debug)]
pub struct CmsisDapFactory;

impl fmt::Display for CmsisDapFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CMSIS-DAP")
    }
}

impl ProbeFactory for CmsisDapFactory {
    fn open(&self, selector: &DebugProbeSelector) -> Result<Box<dyn DebugProbe>, DebugProbeError> {
        let device = tools::open_device_from_selector(selector)?;
        let name = match &device {
            CmsisDapDevice::V1 { .. } => "CMSIS-DAP V1",
            CmsisDapDevice::V2 { .. } => "CMSIS-DAP V2",
        };

        Ok(Box::new(CmsisDap::new_from_device(Box::new(device), name)?))
    }

    fn list_probes(&self) -> Vec<DebugProbeInfo> {
        tools::list_cmsisdap_devices()
    }
}

/// A CMSIS-DAP probe, talking to the target through any [`DapTransport`].
pub struct CmsisDap {
    device: Box<dyn DapTransport>,
    name: String,
    protocol: Option<WireProtocol>,

    packet_count: u8,
    capabilities: Capabilities,
    firmware_version: Option<String>,

    /// Speed in kHz
    speed_khz: u32,

    connected: bool,
}

impl fmt::Debug for CmsisDap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CmsisDap")
            .field("name", &self.name)
            .field("protocol", &self.protocol)
            .field("packet_size", &self.device.packet_size())
            .field("packet_count", &self.packet_count)
            .field("capabilities", &self.capabilities)
            .field("speed_khz", &self.speed_khz)
            .field("connected", &self.connected)
            .finish()
    }
}

impl CmsisDap {
    /// Set up a probe on an opened transport.
    ///
    /// This queries the packet size, packet count, capabilities and firmware version.
    pub fn new_from_device(
        mut device: Box<dyn DapTransport>,
        name: impl Into<String>,
    ) -> Result<Self, DebugProbeError> {
        // Determine and set the packet size. We do this as soon as possible after
        // opening the probe to ensure all future communication uses the correct size.
        let packet_size = commands::send_command(device.as_mut(), &PacketSizeCommand)
            .map_err(|e| {
                tracing::debug!("Failed to read packet size: {}", e);
                CmsisDapError::NoPacketSize
            })?;
        if packet_size == 0 {
            return Err(CmsisDapError::NoPacketSize.into());
        }
        device.set_packet_size(usize::from(packet_size));

        let packet_count = commands::send_command(device.as_mut(), &PacketCountCommand)?;
        let capabilities = commands::send_command(device.as_mut(), &CapabilitiesCommand)?;
        tracing::debug!("Detected probe capabilities: {:?}", capabilities);

        // Older firmware does not implement the firmware version query.
        let firmware_version = commands::send_command(device.as_mut(), &FirmwareVersionCommand)
            .unwrap_or_else(|e| {
                tracing::debug!("Failed to read firmware version: {}", e);
                None
            });

        Ok(Self {
            device,
            name: name.into(),
            protocol: None,
            packet_count,
            capabilities,
            firmware_version,
            speed_khz: 1_000,
            connected: false,
        })
    }

    fn check_status(status: Status, command_id: CommandId) -> Result<(), CmsisDapError> {
        match status {
            Status::DapOk => Ok(()),
            Status::DapError => Err(CmsisDapError::ErrorResponse(command_id)),
        }
    }

    /// Set maximum JTAG/SWD clock frequency to use, in Hz.
    ///
    /// The actual clock frequency used by the device might be lower.
    fn set_swj_clock(&mut self, clock_speed_hz: u32) -> Result<(), CmsisDapError> {
        let response =
            commands::send_command(self.device.as_mut(), &SWJClockRequest(clock_speed_hz))?;
        Self::check_status(response.0, CommandId::SwjClock)
    }

    fn transfer_configure(
        &mut self,
        request: TransferConfigureRequest,
    ) -> Result<(), CmsisDapError> {
        let status = commands::send_command(self.device.as_mut(), &request)?;
        Self::check_status(status, CommandId::TransferConfigure)
    }

    fn configure_swd(&mut self, request: SwdConfigureRequest) -> Result<(), CmsisDapError> {
        let status = commands::send_command(self.device.as_mut(), &request)?;
        Self::check_status(status, CommandId::SwdConfigure)
    }

    fn configure_jtag(&mut self, ir_lengths: Vec<u8>) -> Result<(), CmsisDapError> {
        let request = ScanChainRequest::new(ir_lengths)?;
        let status = commands::send_command(self.device.as_mut(), &request)?;
        Self::check_status(status, CommandId::JtagConfigure)
    }

    fn send_swj_sequence(&mut self, data: &[u8]) -> Result<(), CmsisDapError> {
        let request = SequenceRequest::new(data)?;
        let response = commands::send_command(self.device.as_mut(), &request)?;
        Self::check_status(response.0, CommandId::SwjSequence)
    }

    /// The number of words one `DAP_TransferBlock` can carry.
    fn max_block_words(&self) -> usize {
        // Command ID, DAP index, transfer count and transfer request
        // precede the data words.
        (self.device.packet_size().saturating_sub(5) / 4).max(1)
    }

    fn transfer_error(source: SendError, command_id: CommandId) -> DapError {
        DebugProbeError::from(CmsisDapError::Send { command_id, source }).into()
    }
}

/// Turn the acknowledge of the last transfer into a result.
fn check_ack(response: LastTransferResponse) -> Result<(), DapError> {
    if response.protocol_error {
        return Err(DapError::SwdProtocol);
    }

    match response.ack {
        Ack::Ok => Ok(()),
        Ack::Wait => Err(DapError::WaitResponse),
        Ack::Fault => Err(DapError::FaultResponse),
        Ack::NoAck => Err(DapError::NoAcknowledge),
    }
}

/// An OK acknowledge must come with every requested transfer executed.
fn check_transfer_count(
    executed: usize,
    requested: usize,
    command_id: CommandId,
) -> Result<(), DapError> {
    if executed != requested {
        tracing::warn!("The probe executed {executed} of {requested} transfers");
        return Err(CmsisDap::transfer_error(SendError::UnexpectedAnswer, command_id));
    }
    Ok(())
}

impl DebugProbe for CmsisDap {
    fn get_name(&self) -> &str {
        &self.name
    }

    /// Get the currently set maximum speed.
    ///
    /// CMSIS-DAP offers no possibility to get the actual speed used.
    fn speed_khz(&self) -> u32 {
        self.speed_khz
    }

    /// For CMSIS-DAP, we can set the maximum speed. The actual speed
    /// used by the probe cannot be determined, but it will not be
    /// higher than this value.
    fn set_speed(&mut self, speed_khz: u32) -> Result<u32, DebugProbeError> {
        let clock_speed_hz = speed_khz
            .checked_mul(1_000)
            .ok_or(DebugProbeError::UnsupportedSpeed(speed_khz))?;

        if self.connected {
            self.set_swj_clock(clock_speed_hz)?;
        }
        self.speed_khz = speed_khz;

        Ok(speed_khz)
    }

    /// Enters debug mode.
    #[tracing::instrument(skip(self))]
    fn attach(&mut self) -> Result<(), DebugProbeError> {
        tracing::debug!("Attaching to target system (clock = {}kHz)", self.speed_khz);

        let protocol = match self.protocol {
            Some(protocol) => protocol,
            None if self.capabilities.swd_implemented => WireProtocol::Swd,
            None if self.capabilities.jtag_implemented => WireProtocol::Jtag,
            None => return Err(DebugProbeError::UnsupportedProtocol(WireProtocol::Swd)),
        };

        if commands::send_command(self.device.as_mut(), &ConnectRequest(protocol))?.is_none() {
            return Err(CmsisDapError::ConnectFailed.into());
        }

        self.protocol = Some(protocol);
        self.connected = true;

        // Set speed after connecting as it can be reset during protocol selection
        self.set_swj_clock(self.speed_khz * 1_000)?;

        // WAIT responses are reported to the host, which owns the retry policy.
        self.transfer_configure(TransferConfigureRequest::default())?;

        match protocol {
            WireProtocol::Swd => self.configure_swd(SwdConfigureRequest::default())?,
            WireProtocol::Jtag => self.configure_jtag(vec![ARM_JTAG_IR_LENGTH])?,
        }

        // Not every probe has this LED, errors are ignored.
        let _ = commands::send_command(self.device.as_mut(), &ConnectedLedRequest(true));

        Ok(())
    }

    /// Leave debug mode.
    fn detach(&mut self) -> Result<(), DebugProbeError> {
        let status = commands::send_command(self.device.as_mut(), &DisconnectRequest)?;
        let _ = commands::send_command(self.device.as_mut(), &ConnectedLedRequest(false));

        self.connected = false;

        Ok(Self::check_status(status, CommandId::Disconnect)?)
    }

    /// Asserts the nRESET pin.
    fn target_reset(&mut self) -> Result<(), DebugProbeError> {
        let response = commands::send_command(self.device.as_mut(), &ResetRequest)?;
        tracing::info!(
            "Target reset, device specific sequence: {}",
            response.device_specific
        );

        Ok(Self::check_status(response.status, CommandId::ResetTarget)?)
    }

    fn select_protocol(&mut self, protocol: WireProtocol) -> Result<(), DebugProbeError> {
        match protocol {
            WireProtocol::Jtag if self.capabilities.jtag_implemented => {
                self.protocol = Some(WireProtocol::Jtag);
                Ok(())
            }
            WireProtocol::Swd if self.capabilities.swd_implemented => {
                self.protocol = Some(WireProtocol::Swd);
                Ok(())
            }
            _ => Err(DebugProbeError::UnsupportedProtocol(protocol)),
        }
    }

    fn active_protocol(&self) -> Option<WireProtocol> {
        self.protocol
    }

    fn reset_line_state(&mut self) -> Result<(), DebugProbeError> {
        match self.protocol {
            Some(WireProtocol::Jtag) => {
                tracing::debug!("Switching to JTAG");
                // Line reset, SWD-to-JTAG sequence and TAP reset.
                self.send_swj_sequence(&[0xFF; 7])?;
                self.send_swj_sequence(&[0x3C, 0xE7])?;
                self.send_swj_sequence(&[0xFF])?;

                let (status, idcode) =
                    commands::send_command(self.device.as_mut(), &IdcodeRequest { tap: 0 })?;
                Self::check_status(status, CommandId::JtagIdcode)?;
                tracing::debug!("JTAG IDCODE: {:#010x}", idcode);
            }
            _ => {
                tracing::debug!("Switching to SWD");
                // Line reset, JTAG-to-SWD sequence, line reset and idle cycles.
                self.send_swj_sequence(&[0xFF; 7])?;
                self.send_swj_sequence(&[0x9E, 0xE7])?;
                self.send_swj_sequence(&[0xFF; 7])?;
                self.send_swj_sequence(&[0x00])?;
            }
        }

        Ok(())
    }

    fn firmware_version(&self) -> Option<&str> {
        self.firmware_version.as_deref()
    }

    fn set_transfer_timeout(&mut self, timeout: Duration) {
        self.device.set_timeout(timeout);
    }
}

impl RawDapAccess for CmsisDap {
    fn raw_read_register(&mut self, port: PortType, addr: u8) -> Result<u32, DapError> {
        let response =
            commands::send_command(self.device.as_mut(), &TransferRequest::read(port, addr))
                .map_err(DebugProbeError::from)?;

        check_ack(response.last_transfer_response)?;
        check_transfer_count(response.transfer_count, 1, CommandId::Transfer)?;

        response
            .data
            .first()
            .copied()
            .ok_or_else(|| Self::transfer_error(SendError::NotEnoughData, CommandId::Transfer))
    }

    fn raw_write_register(&mut self, port: PortType, addr: u8, value: u32) -> Result<(), DapError> {
        if port == PortType::DebugPort && addr == Abort::ADDRESS {
            // ABORT is not reachable through DAP_Transfer in JTAG mode.
            let request = WriteAbortRequest { tap: 0, value };
            let status = commands::send_command(self.device.as_mut(), &request)
                .map_err(DebugProbeError::from)?;

            return Self::check_status(status, CommandId::WriteAbort)
                .map_err(|e| DebugProbeError::from(e).into());
        }

        let response = commands::send_command(
            self.device.as_mut(),
            &TransferRequest::write(port, addr, value),
        )
        .map_err(DebugProbeError::from)?;

        check_ack(response.last_transfer_response)?;
        check_transfer_count(response.transfer_count, 1, CommandId::Transfer)
    }

    fn raw_read_block(
        &mut self,
        port: PortType,
        addr: u8,
        values: &mut [u32],
    ) -> Result<(), DapError> {
        let max_words = self.max_block_words();

        for chunk in values.chunks_mut(max_words) {
            let request = TransferBlockRequest::read_request(port, addr, chunk.len() as u16);
            let response = commands::send_command(self.device.as_mut(), &request)
                .map_err(DebugProbeError::from)?;

            check_ack(response.last_transfer_response)?;
            check_transfer_count(
                usize::from(response.transfer_count),
                chunk.len(),
                CommandId::TransferBlock,
            )?;

            chunk.copy_from_slice(&response.transfer_data);
        }

        Ok(())
    }

    fn raw_write_block(&mut self, port: PortType, addr: u8, values: &[u32]) -> Result<(), DapError> {
        let max_words = self.max_block_words();

        for chunk in values.chunks(max_words) {
            let request = TransferBlockRequest::write_request(port, addr, chunk.to_vec());
            let response = commands::send_command(self.device.as_mut(), &request)
                .map_err(DebugProbeError::from)?;

            check_ack(response.last_transfer_response)?;
            check_transfer_count(
                usize::from(response.transfer_count),
                chunk.len(),
                CommandId::TransferBlock,
            )?;
        }

        Ok(())
    }
}

impl Drop for CmsisDap {
    fn drop(&mut self) {
        if !self.connected {
            return;
        }

        tracing::debug!("Detaching from CMSIS-DAP probe");
        // We ignore the error cases as we can't do much about it anyways.
        if let Err(e) = self.detach() {
            tracing::debug!("Error while detaching on drop: {}", e);
        }
    }
}
