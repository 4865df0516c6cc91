use crate::architecture::arm::ap::{DataSize, MemoryAp, CSW};
use crate::architecture::arm::{ArmCommunicationInterface, ArmError};
use crate::memory::{valid_32bit_address, MemoryInterface};

/// Calculate the maximum number of bytes we can transfer starting at address
/// before we run into the 10-bit TAR autoincrement limit.
fn autoincr_max_bytes(address: u32) -> usize {
    const AUTOINCR_LIMIT: u32 = 0x400;

    (AUTOINCR_LIMIT - (address % AUTOINCR_LIMIT)) as usize
}

/// A struct to give access to a targets memory using a certain MEM-AP.
#[derive(Debug)]
pub struct ADIMemoryInterface<'interface> {
    interface: &'interface mut ArmCommunicationInterface,
    memory_ap: MemoryAp,
}

impl<'interface> ADIMemoryInterface<'interface> {
    pub(crate) fn new(interface: &'interface mut ArmCommunicationInterface, memory_ap: MemoryAp) -> Self {
        Self {
            interface,
            memory_ap,
        }
    }

    /// The MEM-AP all accesses go through.
    pub fn memory_ap(&self) -> MemoryAp {
        self.memory_ap
    }

    /// Access to the interface the MEM-AP is reached through.
    pub fn interface_mut(&mut self) -> &mut ArmCommunicationInterface {
        self.interface
    }

    /// Write CSW, unless it already holds the value for `data_size`.
    fn set_data_size(&mut self, data_size: DataSize) -> Result<(), ArmError> {
        let csw = CSW::new(data_size);
        if self.interface.cached_csw(self.memory_ap) == Some(csw) {
            return Ok(());
        }

        self.interface.write_ap_register(self.memory_ap, csw)?;
        self.interface.set_cached_csw(self.memory_ap, csw);

        Ok(())
    }

    /// Read `data.len()` DRW values, starting at `address` with the currently set size.
    ///
    /// `unit` is the number of bytes the address advances per value.
    fn read_chunked(&mut self, mut address: u32, mut data: &mut [u32], unit: usize) -> Result<(), ArmError> {
        while !data.is_empty() {
            let chunk_size = data.len().min(autoincr_max_bytes(address) / unit);

            tracing::trace!("Reading chunk with len {} at address {:#010x}", chunk_size, address);

            // Auto increment is limited to the 10 lowest bits, every chunk writes TAR.
            self.interface
                .read_memory_block(self.memory_ap, address, &mut data[..chunk_size])?;

            address = address.wrapping_add((chunk_size * unit) as u32);
            data = &mut data[chunk_size..];
        }

        Ok(())
    }

    /// Write all of `data` to DRW, starting at `address` with the currently set size.
    fn write_chunked(&mut self, mut address: u32, mut data: &[u32], unit: usize) -> Result<(), ArmError> {
        while !data.is_empty() {
            let chunk_size = data.len().min(autoincr_max_bytes(address) / unit);

            tracing::trace!("Writing chunk with len {} at address {:#010x}", chunk_size, address);

            self.interface
                .write_memory_block(self.memory_ap, address, &data[..chunk_size])?;

            address = address.wrapping_add((chunk_size * unit) as u32);
            data = &data[chunk_size..];
        }

        Ok(())
    }
}

impl MemoryInterface<ArmError> for ADIMemoryInterface<'_> {
    fn read_32(&mut self, address: u64, data: &mut [u32]) -> Result<(), ArmError> {
        if address % 4 != 0 {
            return Err(ArmError::alignment_error(address, 4));
        }
        if data.is_empty() {
            return Ok(());
        }
        let address = valid_32bit_address(address)?;

        self.set_data_size(DataSize::U32)?;
        self.read_chunked(address, data, 4)
    }

    fn read_8(&mut self, address: u64, data: &mut [u8]) -> Result<(), ArmError> {
        if data.is_empty() {
            return Ok(());
        }
        let address = valid_32bit_address(address)?;

        self.set_data_size(DataSize::U8)?;

        let mut values = vec![0u32; data.len()];
        self.read_chunked(address, &mut values, 1)?;

        // Every byte arrives on the lane selected by the low address bits.
        for (offset, (byte, value)) in data.iter_mut().zip(values).enumerate() {
            let lane = address.wrapping_add(offset as u32) % 4;
            *byte = (value >> (lane * 8)) as u8;
        }

        Ok(())
    }

    fn write_32(&mut self, address: u64, data: &[u32]) -> Result<(), ArmError> {
        if address % 4 != 0 {
            return Err(ArmError::alignment_error(address, 4));
        }
        if data.is_empty() {
            return Ok(());
        }
        let address = valid_32bit_address(address)?;

        self.set_data_size(DataSize::U32)?;
        self.write_chunked(address, data, 4)
    }

    fn write_8(&mut self, address: u64, data: &[u8]) -> Result<(), ArmError> {
        if data.is_empty() {
            return Ok(());
        }
        let address = valid_32bit_address(address)?;

        let values: Vec<u32> = data
            .iter()
            .enumerate()
            .map(|(offset, byte)| {
                let lane = address.wrapping_add(offset as u32) % 4;
                u32::from(*byte) << (lane * 8)
            })
            .collect();

        self.set_data_size(DataSize::U8)?;
        self.write_chunked(address, &values, 1)
    }

    fn flush(&mut self) -> Result<(), ArmError> {
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::AccessConfig;
    use crate::probe::fake_probe::FakeProbe;
    use crate::probe::Probe;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn interface() -> (
        ArmCommunicationInterface,
        std::sync::Arc<parking_lot::Mutex<crate::probe::fake_probe::FakeTarget>>,
    ) {
        let fake = FakeProbe::new();
        let target = fake.target();
        let mut probe = Probe::new(fake);
        probe.attach().unwrap();

        let mut interface = ArmCommunicationInterface::new(probe, &AccessConfig::default());
        interface.connect().unwrap();
        (interface, target)
    }

    #[test_case(0x2000_0000, 0x400; "aligned to the wrap")]
    #[test_case(0x2000_0000, 0x3FC; "ends before the wrap")]
    #[test_case(0x2000_03F0, 0x40; "crosses the wrap")]
    #[test_case(0x2000_0100, 0x1000; "several wraps")]
    fn write_then_read_words(address: u64, len: usize) {
        let (mut interface, target) = interface();
        let mut memory = interface.memory_interface(MemoryAp::new(0)).unwrap();

        let data: Vec<u32> = (0..len as u32 / 4).map(|i| i.wrapping_mul(0x0101_0101)).collect();
        memory.write_32(address, &data).unwrap();

        let mut read_back = vec![0u32; data.len()];
        memory.read_32(address, &mut read_back).unwrap();

        assert_eq!(read_back, data);
        assert_eq!(target.lock().read_word(address + 4), data[1]);
    }

    #[test]
    fn wait_within_a_block_write_restarts_at_its_address() {
        let (mut interface, target) = interface();
        let mut memory = interface.memory_interface(MemoryAp::new(0)).unwrap();
        let data: Vec<u32> = (0..64).map(|i| 0xA500_0000 | i).collect();

        target.lock().inject_wait_in_block(10);
        memory.write_32(0x2000_0000, &data).unwrap();

        let target = target.lock();
        let written: Vec<u32> = (0..64).map(|i| target.read_word(0x2000_0000 + 4 * i)).collect();
        assert_eq!(written, data);
        assert_eq!(target.read_word(0x2000_0100), 0);
    }

    #[test]
    fn wait_within_a_block_read_restarts_at_its_address() {
        let (mut interface, target) = interface();
        for i in 0..64 {
            target.lock().write_word(0x2000_0000 + 4 * i, i as u32);
        }
        let mut memory = interface.memory_interface(MemoryAp::new(0)).unwrap();

        target.lock().inject_wait_in_block(10);
        let mut read_back = vec![0u32; 64];
        memory.read_32(0x2000_0000, &mut read_back).unwrap();

        assert_eq!(read_back, (0..64).collect::<Vec<u32>>());
    }

    #[test]
    fn bytes_use_the_right_lanes() {
        let (mut interface, target) = interface();
        target.lock().write_word(0x2000_0000, 0x4433_2211);
        let mut memory = interface.memory_interface(MemoryAp::new(0)).unwrap();

        memory.write_8(0x2000_0001, &[0xAA, 0xBB]).unwrap();

        let mut bytes = [0u8; 4];
        memory.read_8(0x2000_0000, &mut bytes).unwrap();
        assert_eq!(bytes, [0x11, 0xAA, 0xBB, 0x44]);
    }

    #[test]
    fn csw_is_written_once_per_size() {
        let (mut interface, _) = interface();
        let mut memory = interface.memory_interface(MemoryAp::new(0)).unwrap();

        memory.read_word_32(0x2000_0000).unwrap();
        memory.read_word_32(0x2000_0004).unwrap();

        assert_eq!(
            memory.interface_mut().cached_csw(MemoryAp::new(0)),
            Some(CSW::new(DataSize::U32))
        );
    }

    #[test]
    fn addresses_beyond_32_bit_are_rejected() {
        let (mut interface, _) = interface();
        let mut memory = interface.memory_interface(MemoryAp::new(0)).unwrap();

        assert!(matches!(
            memory.read_word_32(0x1_0000_0000),
            Err(ArmError::AddressOutOf32BitAddressSpace(0x1_0000_0000))
        ));
    }
}
