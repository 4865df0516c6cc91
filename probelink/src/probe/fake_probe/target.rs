use super::flash::{FakeFlash, FakeRoutine, RoutineCall};
use crate::architecture::arm::core::{Aircr, Cpuid, Dcrdr, Dcrsr, Demcr, Dfsr, Dhcsr, FpCtrl};
use crate::architecture::arm::{DapError, PortType};
use crate::core::MemoryMappedRegister;
use std::collections::HashMap;
use std::ops::Range;
use std::time::Duration;

/// SW-DP of a Cortex-M4, DPv1, designed by ARM.
const DPIDR: u32 = 0x2BA0_1477;
/// AHB-AP, MEM-AP class, designed by ARM.
const AP_IDR: u32 = 0x2477_0011;
/// ROM table at 0xE00FF000, ADIv5 format, present.
const AP_BASE: u32 = 0xE00F_F003;
/// Revision 1 FPB with 6 instruction and 2 literal comparators.
const FP_CTRL_ID: u32 = 0x0000_0260;

const ROM_TABLE_BASE: u64 = 0xE00F_F000;

/// STICKYORUN, STICKYCMP, STICKYERR and WDATAERR.
const STICKY_FLAGS: u32 = 0b1011_0010;
const STICKYERR: u32 = 1 << 5;

pub(super) const PC: usize = 15;

const DFSR_HALTED: u32 = 1 << 0;
pub(super) const DFSR_BKPT: u32 = 1 << 1;
const DFSR_VCATCH: u32 = 1 << 3;

/// The simulated state of a Cortex-M core.
#[derive(Debug)]
pub(super) struct FakeCore {
    pub(super) halted: bool,
    /// C_DEBUGEN, C_HALT, C_STEP and C_MASKINTS as last written.
    pub(super) control: u32,
    pub(super) reset_seen: bool,
    pub(super) registers: [u32; 32],
    pub(super) dcrdr: u32,
    pub(super) dfsr: u32,
    pub(super) cpuid: u32,
    pub(super) fpb_enabled: bool,
    pub(super) dhcsr_writes: usize,
    pub(super) dhcsr_reads: usize,
    pub(super) register_transfers_held: bool,
    pub(super) resets: usize,
}

impl FakeCore {
    fn new() -> Self {
        Self {
            halted: false,
            control: 0,
            reset_seen: false,
            registers: [0; 32],
            dcrdr: 0,
            dfsr: 0,
            cpuid: 0x410F_C241,
            fpb_enabled: false,
            dhcsr_writes: 0,
            dhcsr_reads: 0,
            register_transfers_held: false,
            resets: 0,
        }
    }

    /// Enter debug state, e.g. after a halt request or a breakpoint.
    pub(super) fn enter_debug_state(&mut self, reason: u32) {
        self.halted = true;
        self.control |= 0b10;
        self.dfsr |= reason;
    }
}

/// A simulated microcontroller behind a SW-DP.
///
/// The debug port has a single AHB-AP, which gives access to a sparse memory,
/// the debug registers of a Cortex-M4 and a CoreSight ROM table. Flash is
/// changed only by the flash routines, see [`FakeRoutine`].
#[derive(Debug)]
pub struct FakeTarget {
    ctrl_stat: u32,
    select: u32,
    select_writes: usize,
    dap_aborts: usize,
    pending_waits: u32,
    wait_after_words: Option<usize>,
    sticky_clear_broken: bool,
    power_up_held: bool,
    ctrl_stat_reads: usize,

    csw: u32,
    tar: u32,
    fault_ranges: Vec<Range<u64>>,

    memory: HashMap<u64, u32>,
    pub(super) core: FakeCore,

    pub(super) flash: Option<FakeFlash>,
    pub(super) routine_calls: Vec<RoutineCall>,
    pub(super) hanging_routine: Option<FakeRoutine>,
    pub(super) failing_routines: HashMap<FakeRoutine, u32>,
    pub(super) erased_sectors: Vec<u64>,
    pub(super) programmed_pages: Vec<u64>,

    pub(super) attach_count: usize,
    pub(super) detach_count: usize,
    pub(super) transfer_timeout: Option<Duration>,
}

impl Default for FakeTarget {
    fn default() -> Self {
        Self::cortex_m4()
    }
}

impl FakeTarget {
    /// A Cortex-M4 with 1 MiB of flash at 0x0800_0000 and a CoreSight ROM table.
    pub fn cortex_m4() -> Self {
        let mut target = Self {
            ctrl_stat: 0,
            select: 0,
            select_writes: 0,
            dap_aborts: 0,
            pending_waits: 0,
            wait_after_words: None,
            sticky_clear_broken: false,
            power_up_held: false,
            ctrl_stat_reads: 0,
            csw: 0,
            tar: 0,
            fault_ranges: Vec::new(),
            memory: HashMap::new(),
            core: FakeCore::new(),
            flash: Some(FakeFlash::default()),
            routine_calls: Vec::new(),
            hanging_routine: None,
            failing_routines: HashMap::new(),
            erased_sectors: Vec::new(),
            programmed_pages: Vec::new(),
            attach_count: 0,
            detach_count: 0,
            transfer_timeout: None,
        };

        // SCS, DWT, FPB, ITM and TPIU, plus an ETM entry which is not present.
        target.add_rom_table(
            ROM_TABLE_BASE,
            &[
                0xFFF0_F003,
                0xFFF0_2003,
                0xFFF0_3003,
                0xFFF0_1003,
                0xFFF4_1003,
                0xFFF4_2002,
            ],
        );
        target.add_component(0xE000_E000, 0x9, 0x00C);
        target.add_component(0xE000_1000, 0xE, 0x002);
        target.add_component(0xE000_2000, 0xE, 0x003);
        target.add_component(0xE000_0000, 0xE, 0x001);
        target.add_component(0xE004_0000, 0x9, 0x9A1);

        target
    }

    /// Write a ROM table with the given entries at `base`. The terminating zero entry is added.
    pub fn add_rom_table(&mut self, base: u64, entries: &[u32]) {
        for (index, entry) in entries.iter().chain(&[0]).enumerate() {
            self.write_word(base + index as u64 * 4, *entry);
        }
        self.add_component(base, 0x1, 0x4C4);
    }

    /// Write the identification registers of a component designed by ARM.
    pub fn add_component(&mut self, base: u64, class: u8, part: u16) {
        let cidr = [0x0D, u32::from(class) << 4, 0x05, 0xB1];
        for (index, value) in cidr.into_iter().enumerate() {
            self.write_word(base + 0xFF0 + index as u64 * 4, value);
        }

        // JEP106 0x3B in bank 4, 4 KiB
        let pidr = [
            u32::from(part & 0xFF),
            u32::from(part >> 8) | 0xB0,
            0x0B,
            0x00,
            0x04,
        ];
        for (index, value) in pidr[..4].iter().enumerate() {
            self.write_word(base + 0xFE0 + index as u64 * 4, *value);
        }
        self.write_word(base + 0xFD0, pidr[4]);
    }

    /// Answer the next `count` access port transfers with WAIT.
    pub fn inject_waits(&mut self, count: u32) {
        self.pending_waits = count;
    }

    /// Let the next block transfer complete `words` words, then answer WAIT.
    ///
    /// The completed words stay written and TAR stays advanced, like on a
    /// probe which splits a block into several packets.
    pub fn inject_wait_in_block(&mut self, words: usize) {
        self.wait_after_words = Some(words);
    }

    /// Answer data accesses to `range` with FAULT.
    pub fn add_fault_range(&mut self, range: Range<u64>) {
        self.fault_ranges.push(range);
    }

    /// Ignore requests to clear the sticky error flags.
    pub fn break_sticky_clear(&mut self) {
        self.sticky_clear_broken = true;
    }

    /// Never acknowledge the debug and system power-up requests.
    pub fn hold_power_up(&mut self) {
        self.power_up_held = true;
    }

    /// How often CTRL/STAT was read.
    pub fn ctrl_stat_read_count(&self) -> usize {
        self.ctrl_stat_reads
    }

    /// How often ABORT.DAPABORT was written.
    pub fn dap_abort_count(&self) -> usize {
        self.dap_aborts
    }

    /// How often SELECT was written.
    pub fn select_write_count(&self) -> usize {
        self.select_writes
    }

    /// How often DHCSR was written with the debug key.
    pub fn dhcsr_write_count(&self) -> usize {
        self.core.dhcsr_writes
    }

    /// Never complete core register transfers.
    pub fn hold_register_transfers(&mut self) {
        self.core.register_transfers_held = true;
    }

    /// How often DHCSR was read.
    pub fn dhcsr_read_count(&self) -> usize {
        self.core.dhcsr_reads
    }

    /// How often the core was reset through AIRCR.
    pub fn reset_count(&self) -> usize {
        self.core.resets
    }

    /// How often the probe attached to the target.
    pub fn attach_count(&self) -> usize {
        self.attach_count
    }

    /// How often the probe detached from the target.
    pub fn detach_count(&self) -> usize {
        self.detach_count
    }

    /// The command timeout the probe was configured with.
    pub fn transfer_timeout(&self) -> Option<Duration> {
        self.transfer_timeout
    }

    /// Whether the core is in debug state.
    pub fn is_halted(&self) -> bool {
        self.core.halted
    }

    /// Change the value of the CPUID register.
    pub fn set_cpuid(&mut self, cpuid: u32) {
        self.core.cpuid = cpuid;
    }

    /// A core register, by its DCRSR.REGSEL number.
    pub fn core_register(&self, regsel: usize) -> u32 {
        self.core.registers[regsel]
    }

    /// Read a word of memory, without any side effects of debug registers.
    pub fn read_word(&self, address: u64) -> u32 {
        let address = address & !0b11;

        match self.memory.get(&address) {
            Some(value) => *value,
            None => match &self.flash {
                Some(flash) if flash.range.contains(&address) => flash.erased_word(),
                _ => 0,
            },
        }
    }

    /// Write a word of memory, without any side effects of debug registers.
    pub fn write_word(&mut self, address: u64, value: u32) {
        self.memory.insert(address & !0b11, value);
    }

    /// Read bytes of memory.
    pub fn read_bytes(&self, address: u64, data: &mut [u8]) {
        for (offset, byte) in data.iter_mut().enumerate() {
            *byte = self.read_byte(address + offset as u64);
        }
    }

    /// Write bytes of memory.
    pub fn write_bytes(&mut self, address: u64, data: &[u8]) {
        for (offset, byte) in data.iter().enumerate() {
            self.write_byte(address + offset as u64, *byte);
        }
    }

    pub(super) fn read_byte(&self, address: u64) -> u8 {
        let lane = address % 4;
        (self.read_word(address) >> (lane * 8)) as u8
    }

    pub(super) fn write_byte(&mut self, address: u64, value: u8) {
        let lane = address % 4;
        let word = self.read_word(address) & !(0xFF << (lane * 8));
        self.write_word(address, word | (u32::from(value) << (lane * 8)));
    }

    /// Drop all words in `range`, so they read as erased flash.
    pub(super) fn erase_range(&mut self, range: Range<u64>) {
        self.memory.retain(|address, _| !range.contains(address));
    }

    pub(super) fn read_register(&mut self, port: PortType, address: u8) -> Result<u32, DapError> {
        match port {
            PortType::DebugPort => Ok(self.read_dp(address)),
            PortType::AccessPort => {
                self.begin_ap_transfer()?;
                self.read_ap(address)
            }
        }
    }

    pub(super) fn write_register(
        &mut self,
        port: PortType,
        address: u8,
        value: u32,
    ) -> Result<(), DapError> {
        match port {
            PortType::DebugPort => {
                self.write_dp(address, value);
                Ok(())
            }
            PortType::AccessPort => {
                self.begin_ap_transfer()?;
                self.write_ap(address, value)
            }
        }
    }

    /// A block counts as a single transfer for WAIT injection.
    pub(super) fn read_block(
        &mut self,
        port: PortType,
        address: u8,
        values: &mut [u32],
    ) -> Result<(), DapError> {
        if port == PortType::AccessPort {
            self.begin_ap_transfer()?;
        }
        for (index, value) in values.iter_mut().enumerate() {
            self.wait_in_block(index)?;
            *value = match port {
                PortType::DebugPort => self.read_dp(address),
                PortType::AccessPort => self.read_ap(address)?,
            };
        }
        Ok(())
    }

    pub(super) fn write_block(
        &mut self,
        port: PortType,
        address: u8,
        values: &[u32],
    ) -> Result<(), DapError> {
        if port == PortType::AccessPort {
            self.begin_ap_transfer()?;
        }
        for (index, value) in values.iter().enumerate() {
            self.wait_in_block(index)?;
            match port {
                PortType::DebugPort => self.write_dp(address, *value),
                PortType::AccessPort => self.write_ap(address, *value)?,
            }
        }
        Ok(())
    }

    fn read_dp(&mut self, address: u8) -> u32 {
        match (address & 0xC, self.dp_bank()) {
            (0x0, _) => DPIDR,
            (0x4, 0) => {
                self.ctrl_stat_reads += 1;
                if self.power_up_held {
                    return self.ctrl_stat;
                }
                // The power up requests are acknowledged immediately.
                self.ctrl_stat | ((self.ctrl_stat & 0x5000_0000) << 1)
            }
            _ => 0,
        }
    }

    fn write_dp(&mut self, address: u8, value: u32) {
        match (address & 0xC, self.dp_bank()) {
            (0x0, _) => self.write_abort(value),
            (0x4, 0) => {
                self.ctrl_stat = (value & 0x5000_0F00) | (self.ctrl_stat & STICKY_FLAGS);
            }
            (0x8, _) => {
                self.select = value;
                self.select_writes += 1;
            }
            _ => {}
        }
    }

    /// DPBANKSEL, which picks the register behind DP address 0x4.
    fn dp_bank(&self) -> u32 {
        self.select & 0xF
    }

    fn write_abort(&mut self, value: u32) {
        if value & 0b10 != 0 {
            self.dap_aborts += 1;
            self.pending_waits = 0;
        }
        if self.sticky_clear_broken {
            return;
        }

        // ORUNERRCLR, WDERRCLR, STKERRCLR and STKCMPCLR
        let clears = [(1 << 4, 1 << 1), (1 << 3, 1 << 7), (1 << 2, 1 << 5), (1 << 1, 1 << 4)];
        for (clear, flag) in clears {
            if value & clear != 0 {
                self.ctrl_stat &= !flag;
            }
        }
    }

    fn wait_in_block(&mut self, index: usize) -> Result<(), DapError> {
        if self.wait_after_words == Some(index) {
            self.wait_after_words = None;
            return Err(DapError::WaitResponse);
        }
        Ok(())
    }

    fn begin_ap_transfer(&mut self) -> Result<(), DapError> {
        if self.pending_waits > 0 {
            self.pending_waits -= 1;
            return Err(DapError::WaitResponse);
        }
        if self.ctrl_stat & STICKYERR != 0 {
            return Err(DapError::FaultResponse);
        }
        Ok(())
    }

    /// The AP register addressed by SELECT and the transfer address.
    fn ap_register(&self, address: u8) -> Option<u8> {
        if self.select >> 24 != 0 {
            return None;
        }
        Some((((self.select >> 4) & 0xF) as u8) << 4 | (address & 0xC))
    }

    fn read_ap(&mut self, address: u8) -> Result<u32, DapError> {
        match self.ap_register(address) {
            Some(0x00) => Ok(self.csw),
            Some(0x04) => Ok(self.tar),
            Some(0x0C) => self.read_drw(),
            Some(0xF8) => Ok(AP_BASE),
            Some(0xFC) => Ok(AP_IDR),
            _ => Ok(0),
        }
    }

    fn write_ap(&mut self, address: u8, value: u32) -> Result<(), DapError> {
        match self.ap_register(address) {
            Some(0x00) => self.csw = value,
            Some(0x04) => self.tar = value,
            Some(0x0C) => return self.write_drw(value),
            _ => {}
        }
        Ok(())
    }

    fn check_fault(&mut self, address: u64) -> Result<(), DapError> {
        if self.fault_ranges.iter().any(|range| range.contains(&address)) {
            self.ctrl_stat |= STICKYERR;
            return Err(DapError::FaultResponse);
        }
        Ok(())
    }

    fn read_drw(&mut self) -> Result<u32, DapError> {
        let address = u64::from(self.tar);
        self.check_fault(address)?;

        let word = self.bus_read(address & !0b11);
        let value = match self.csw & 0x7 {
            0 => word & (0xFF << ((address % 4) * 8)),
            _ => word,
        };

        self.advance_tar();
        Ok(value)
    }

    fn write_drw(&mut self, value: u32) -> Result<(), DapError> {
        let address = u64::from(self.tar);
        self.check_fault(address)?;

        let value = match self.csw & 0x7 {
            0 => {
                let mask = 0xFF << ((address % 4) * 8);
                (self.read_word(address) & !mask) | (value & mask)
            }
            _ => value,
        };
        self.bus_write(address & !0b11, value);

        self.advance_tar();
        Ok(())
    }

    /// Auto increment, which wraps at the 1 KiB boundary.
    fn advance_tar(&mut self) {
        if (self.csw >> 4) & 0b11 != 0b01 {
            return;
        }

        let increment = 1 << (self.csw & 0x7);
        self.tar = (self.tar & !0x3FF) | (self.tar.wrapping_add(increment) & 0x3FF);
    }

    fn bus_read(&mut self, address: u64) -> u32 {
        match address {
            Dhcsr::ADDRESS => self.read_dhcsr(),
            Dcrdr::ADDRESS => self.core.dcrdr,
            Dfsr::ADDRESS => self.core.dfsr,
            Aircr::ADDRESS => 0xFA05_0000,
            Cpuid::ADDRESS => self.core.cpuid,
            FpCtrl::ADDRESS => FP_CTRL_ID | u32::from(self.core.fpb_enabled),
            _ => self.read_word(address),
        }
    }

    fn bus_write(&mut self, address: u64, value: u32) {
        match address {
            Dhcsr::ADDRESS => self.write_dhcsr(value),
            Dcrsr::ADDRESS => self.write_dcrsr(value),
            Dcrdr::ADDRESS => self.core.dcrdr = value,
            Dfsr::ADDRESS => self.core.dfsr &= !value,
            Aircr::ADDRESS => self.write_aircr(value),
            Cpuid::ADDRESS => {}
            FpCtrl::ADDRESS => {
                if value & 0b10 != 0 {
                    self.core.fpb_enabled = value & 1 != 0;
                }
            }
            _ => self.write_word(address, value),
        }
    }

    fn read_dhcsr(&mut self) -> u32 {
        self.core.dhcsr_reads += 1;

        let mut value = self.core.control & 0xF;
        // S_REGRDY, register transfers complete immediately.
        if !self.core.register_transfers_held {
            value |= 1 << 16;
        }

        if self.core.halted {
            value |= 1 << 17;
        }
        if std::mem::take(&mut self.core.reset_seen) {
            value |= 1 << 25;
        }

        value
    }

    fn write_dhcsr(&mut self, value: u32) {
        if value >> 16 != 0xA05F {
            return;
        }
        self.core.dhcsr_writes += 1;

        let dhcsr = Dhcsr::from(value);
        self.core.control = value & 0xF;

        if dhcsr.c_halt() {
            if !self.core.halted {
                self.core.enter_debug_state(DFSR_HALTED);
            }
        } else if self.core.halted {
            if dhcsr.c_step() {
                self.core.registers[PC] = self.core.registers[PC].wrapping_add(2);
                self.core.enter_debug_state(DFSR_HALTED);
            } else {
                self.core.halted = false;
                self.run();
            }
        }
    }

    fn write_dcrsr(&mut self, value: u32) {
        // Register transfers need debug state.
        if !self.core.halted {
            return;
        }

        let regsel = (value & 0x7F) as usize;
        let Some(register) = self.core.registers.get_mut(regsel) else {
            return;
        };

        if value & (1 << 16) != 0 {
            *register = self.core.dcrdr;
        } else {
            self.core.dcrdr = *register;
        }
    }

    fn write_aircr(&mut self, value: u32) {
        if value >> 16 != 0x05FA {
            return;
        }

        let aircr = Aircr::from(value);
        if aircr.sysresetreq() || aircr.vectreset() {
            self.reset_core();
        }
    }

    fn reset_core(&mut self) {
        self.core.resets += 1;
        self.core.reset_seen = true;
        self.core.registers = [0; 32];
        self.core.registers[13] = self.read_word(0x0);
        self.core.registers[PC] = self.read_word(0x4) & !1;
        self.core.registers[16] = 1 << 24;
        self.core.dfsr = 0;
        self.core.control &= !0b1110;
        self.core.halted = false;

        let demcr = Demcr::from(self.read_word(Demcr::ADDRESS));
        if demcr.vc_corereset() {
            self.core.enter_debug_state(DFSR_VCATCH);
        }
    }
}
