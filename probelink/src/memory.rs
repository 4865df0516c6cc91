//! Access to the memory of the target.
use crate::error::Error;
use scroll::Pread;

/// Memory access to an address which is not aligned to the access size.
#[derive(Debug, thiserror::Error)]
#[error("Memory access to address {address:#010x} was not aligned to {alignment} bytes.")]
pub struct MemoryNotAlignedError {
    /// The address of the access.
    pub address: u64,
    /// The required alignment in bytes.
    pub alignment: usize,
}

/// An interface to be implemented for drivers that allow target memory access.
pub trait MemoryInterface<ERR = Error>
where
    ERR: std::error::Error + From<MemoryNotAlignedError>,
{
    /// Read a 32bit word of at `address`.
    ///
    /// The address where the read should be performed at has to be a multiple of 4.
    /// Returns [`Error::MemoryNotAligned`] if this does not hold true.
    fn read_word_32(&mut self, address: u64) -> Result<u32, ERR> {
        let mut word = 0;
        self.read_32(address, std::slice::from_mut(&mut word))?;
        Ok(word)
    }

    /// Read an 8bit word of at `address`.
    fn read_word_8(&mut self, address: u64) -> Result<u8, ERR> {
        let mut word = 0;
        self.read_8(address, std::slice::from_mut(&mut word))?;
        Ok(word)
    }

    /// Read a block of 32bit words at `address`.
    ///
    /// The number of words read is `data.len()`.
    /// The address where the read should be performed at has to be a multiple of 4.
    /// Returns [`Error::MemoryNotAligned`] if this does not hold true.
    fn read_32(&mut self, address: u64, data: &mut [u32]) -> Result<(), ERR>;

    /// Read a block of 8bit words at `address`.
    fn read_8(&mut self, address: u64, data: &mut [u8]) -> Result<(), ERR>;

    /// Read data from `address`.
    ///
    /// Word accesses are used wherever possible, so the function might read up to three
    /// bytes more on each side than requested when `address` is not aligned.
    fn read(&mut self, address: u64, data: &mut [u8]) -> Result<(), ERR> {
        let start_extra_count = (address % 4) as usize;
        let word_count = (start_extra_count + data.len()).div_ceil(4);

        let mut buffer = vec![0u32; word_count];
        self.read_32(address - start_extra_count as u64, &mut buffer)?;

        let bytes: Vec<u8> = buffer.iter().flat_map(|word| word.to_le_bytes()).collect();
        data.copy_from_slice(&bytes[start_extra_count..start_extra_count + data.len()]);

        Ok(())
    }

    /// Write a 32bit word at `address`.
    ///
    /// The address where the write should be performed at has to be a multiple of 4.
    /// Returns [`Error::MemoryNotAligned`] if this does not hold true.
    fn write_word_32(&mut self, address: u64, data: u32) -> Result<(), ERR> {
        self.write_32(address, std::slice::from_ref(&data))
    }

    /// Write an 8bit word at `address`.
    fn write_word_8(&mut self, address: u64, data: u8) -> Result<(), ERR> {
        self.write_8(address, std::slice::from_ref(&data))
    }

    /// Write a block of 32bit words at `address`.
    ///
    /// The number of words written is `data.len()`.
    /// The address where the write should be performed at has to be a multiple of 4.
    /// Returns [`Error::MemoryNotAligned`] if this does not hold true.
    fn write_32(&mut self, address: u64, data: &[u32]) -> Result<(), ERR>;

    /// Write a block of 8bit words at `address`.
    fn write_8(&mut self, address: u64, data: &[u8]) -> Result<(), ERR>;

    /// Write a block of bytes at `address`.
    ///
    /// The unaligned head and tail are written with byte accesses, everything in
    /// between with word accesses.
    fn write(&mut self, mut address: u64, mut data: &[u8]) -> Result<(), ERR> {
        let len = data.len();
        let start_extra_count = ((4 - (address % 4) as usize) % 4).min(len);
        let end_extra_count = (len - start_extra_count) % 4;
        let inbetween_count = len - start_extra_count - end_extra_count;

        if start_extra_count != 0 {
            self.write_8(address, &data[..start_extra_count])?;

            address += start_extra_count as u64;
            data = &data[start_extra_count..];
        }

        // Make sure we don't try to do an empty but potentially unaligned write
        if inbetween_count > 0 {
            let mut buffer = vec![0u32; inbetween_count / 4];
            for (index, value) in buffer.iter_mut().enumerate() {
                *value = data
                    .pread_with(index * 4, scroll::LE)
                    .map_err(|_| MemoryNotAlignedError {
                        address,
                        alignment: 4,
                    })?;
            }
            self.write_32(address, &buffer)?;

            address += inbetween_count as u64;
            data = &data[inbetween_count..];
        }

        if end_extra_count > 0 {
            self.write_8(address, &data[..end_extra_count])?;
        }

        Ok(())
    }

    /// Flush any outstanding operations.
    fn flush(&mut self) -> Result<(), ERR>;
}

/// Validate that an input address is valid for 32-bit only systems
pub(crate) fn valid_32bit_address(address: u64) -> Result<u32, crate::architecture::arm::ArmError> {
    address
        .try_into()
        .map_err(|_| crate::architecture::arm::ArmError::AddressOutOf32BitAddressSpace(address))
}

/// Simplifies delegating MemoryInterface implementations, with additional error type conversion.
pub trait CoreMemoryInterface {
    /// The error type of the underlying interface.
    type ErrorType: std::error::Error + From<MemoryNotAlignedError>;

    /// Returns a mutable reference to the underlying memory interface.
    fn memory_mut(&mut self) -> &mut dyn MemoryInterface<Self::ErrorType>;
}

impl<T> MemoryInterface<Error> for T
where
    T: CoreMemoryInterface,
    Error: From<<T as CoreMemoryInterface>::ErrorType>,
{
    fn read_word_32(&mut self, address: u64) -> Result<u32, Error> {
        self.memory_mut().read_word_32(address).map_err(Error::from)
    }

    fn read_word_8(&mut self, address: u64) -> Result<u8, Error> {
        self.memory_mut().read_word_8(address).map_err(Error::from)
    }

    fn read_32(&mut self, address: u64, data: &mut [u32]) -> Result<(), Error> {
        self.memory_mut().read_32(address, data).map_err(Error::from)
    }

    fn read_8(&mut self, address: u64, data: &mut [u8]) -> Result<(), Error> {
        self.memory_mut().read_8(address, data).map_err(Error::from)
    }

    fn read(&mut self, address: u64, data: &mut [u8]) -> Result<(), Error> {
        self.memory_mut().read(address, data).map_err(Error::from)
    }

    fn write_word_32(&mut self, address: u64, data: u32) -> Result<(), Error> {
        self.memory_mut()
            .write_word_32(address, data)
            .map_err(Error::from)
    }

    fn write_word_8(&mut self, address: u64, data: u8) -> Result<(), Error> {
        self.memory_mut()
            .write_word_8(address, data)
            .map_err(Error::from)
    }

    fn write_32(&mut self, address: u64, data: &[u32]) -> Result<(), Error> {
        self.memory_mut().write_32(address, data).map_err(Error::from)
    }

    fn write_8(&mut self, address: u64, data: &[u8]) -> Result<(), Error> {
        self.memory_mut().write_8(address, data).map_err(Error::from)
    }

    fn write(&mut self, address: u64, data: &[u8]) -> Result<(), Error> {
        self.memory_mut().write(address, data).map_err(Error::from)
    }

    fn flush(&mut self) -> Result<(), Error> {
        self.memory_mut().flush().map_err(Error::from)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::architecture::arm::ArmError;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    /// Byte addressed memory which logs the kind of every access.
    #[derive(Default)]
    struct LoggingMemory {
        bytes: BTreeMap<u64, u8>,
        accesses: Vec<(&'static str, u64, usize)>,
    }

    impl MemoryInterface<ArmError> for LoggingMemory {
        fn read_32(&mut self, address: u64, data: &mut [u32]) -> Result<(), ArmError> {
            if address % 4 != 0 {
                return Err(ArmError::alignment_error(address, 4));
            }
            self.accesses.push(("read_32", address, data.len()));
            for (index, word) in data.iter_mut().enumerate() {
                let base = address + index as u64 * 4;
                let bytes = [0, 1, 2, 3].map(|i| *self.bytes.get(&(base + i)).unwrap_or(&0));
                *word = u32::from_le_bytes(bytes);
            }
            Ok(())
        }

        fn read_8(&mut self, address: u64, data: &mut [u8]) -> Result<(), ArmError> {
            self.accesses.push(("read_8", address, data.len()));
            for (index, byte) in data.iter_mut().enumerate() {
                *byte = *self.bytes.get(&(address + index as u64)).unwrap_or(&0);
            }
            Ok(())
        }

        fn write_32(&mut self, address: u64, data: &[u32]) -> Result<(), ArmError> {
            if address % 4 != 0 {
                return Err(ArmError::alignment_error(address, 4));
            }
            self.accesses.push(("write_32", address, data.len()));
            for (index, word) in data.iter().enumerate() {
                for (offset, byte) in word.to_le_bytes().into_iter().enumerate() {
                    self.bytes
                        .insert(address + (index * 4 + offset) as u64, byte);
                }
            }
            Ok(())
        }

        fn write_8(&mut self, address: u64, data: &[u8]) -> Result<(), ArmError> {
            self.accesses.push(("write_8", address, data.len()));
            for (index, byte) in data.iter().enumerate() {
                self.bytes.insert(address + index as u64, *byte);
            }
            Ok(())
        }

        fn flush(&mut self) -> Result<(), ArmError> {
            Ok(())
        }
    }

    #[test]
    fn unaligned_write_is_split() {
        let mut memory = LoggingMemory::default();

        memory.write(0x1001, &[1, 2, 3, 4, 5, 6, 7, 8, 9]).unwrap();

        assert_eq!(
            memory.accesses,
            vec![
                ("write_8", 0x1001, 3),
                ("write_32", 0x1004, 1),
                ("write_8", 0x1008, 2),
            ]
        );
    }

    #[test]
    fn unaligned_read_uses_words() {
        let mut memory = LoggingMemory::default();
        memory.write_32(0x2000, &[0x4433_2211, 0x8877_6655]).unwrap();
        memory.accesses.clear();

        let mut data = [0u8; 5];
        memory.read(0x2002, &mut data).unwrap();

        assert_eq!(data, [0x33, 0x44, 0x55, 0x66, 0x77]);
        assert_eq!(memory.accesses, vec![("read_32", 0x2000, 2)]);
    }

    #[test]
    fn word_access_checks_alignment() {
        let mut memory = LoggingMemory::default();

        assert!(matches!(
            memory.read_word_32(0x2001),
            Err(ArmError::MemoryNotAligned(MemoryNotAlignedError {
                address: 0x2001,
                alignment: 4
            }))
        ));
    }

    #[test]
    fn address_has_to_fit_32_bits() {
        assert_eq!(valid_32bit_address(0xFFFF_FFFF).unwrap(), 0xFFFF_FFFF);
        assert!(valid_32bit_address(0x1_0000_0000).is_err());
    }
}
