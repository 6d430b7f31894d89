use crate::dwarf::DwarfError;
use crate::endian::Endian;
use crate::memory::Memory;

/// Forward-only cursor over the opcode bytes of one CFA program.
///
/// Bound to `[address+offset, address+offset+length)` of a [Memory]; every
/// read is range-checked against that bound before it touches the memory
/// object, so a malformed program can never make the cursor fetch bytes
/// outside its declared range. The cursor only advances on success; after
/// a failed read its position is unspecified and the caller must abort.
pub struct OpStream<'a, M: Memory> {
    memory: &'a M,
    endian: Endian,
    pos: u64,
    end: u64,
}

impl<'a, M: Memory> OpStream<'a, M> {
    pub fn new(memory: &'a M, endian: Endian, address: u64, offset: u64, length: u64) -> Result<Self, DwarfError> {
        let pos = address.checked_add(offset).ok_or(DwarfError::OutOfBounds(address))?;
        let end = pos.checked_add(length).ok_or(DwarfError::OutOfBounds(pos))?;
        Ok(Self { memory, endian, pos, end })
    }

    /// Task-relative address of the next byte to be read.
    #[inline]
    pub fn position(&self) -> u64 {
        self.pos
    }

    #[inline]
    pub fn remaining(&self) -> u64 {
        self.end - self.pos
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pos == self.end
    }

    /// Advance over `count` bytes without reading them.
    pub fn skip(&mut self, count: u64) -> Result<(), DwarfError> {
        if count > self.remaining() {
            return Err(DwarfError::OutOfBounds(self.pos));
        }
        self.pos += count;
        Ok(())
    }

    fn fill(&mut self, buf: &mut [u8]) -> Result<(), DwarfError> {
        if buf.len() as u64 > self.remaining() {
            return Err(DwarfError::OutOfBounds(self.pos));
        }
        self.memory.read(self.pos, buf).ok_or(DwarfError::ReadFailed(self.pos))?;
        self.pos += buf.len() as u64;
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8, DwarfError> {
        let mut buf = [0u8; 1];
        self.fill(&mut buf)?;
        Ok(buf[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, DwarfError> {
        let mut buf = [0u8; 2];
        self.fill(&mut buf)?;
        Ok(self.endian.read_u16(&buf))
    }

    pub fn read_u32(&mut self) -> Result<u32, DwarfError> {
        let mut buf = [0u8; 4];
        self.fill(&mut buf)?;
        Ok(self.endian.read_u32(&buf))
    }

    pub fn read_u64(&mut self) -> Result<u64, DwarfError> {
        let mut buf = [0u8; 8];
        self.fill(&mut buf)?;
        Ok(self.endian.read_u64(&buf))
    }

    /// Read a machine word of `address_size` bytes into a u64.
    pub fn read_word(&mut self, address_size: u8) -> Result<u64, DwarfError> {
        match address_size {
            4 => Ok(self.read_u32()? as u64),
            8 => self.read_u64(),
            v => Err(DwarfError::InvalidAddressSize(v)),
        }
    }

    /// Read a machine word at an arbitrary task-relative address, outside
    /// the cursor's range. Used for DW_EH_PE_indirect resolution; does not
    /// move the cursor.
    pub fn read_word_at(&self, address: u64, address_size: u8) -> Result<u64, DwarfError> {
        let mut buf = [0u8; 8];
        let buf = match address_size {
            4 => &mut buf[..4],
            8 => &mut buf[..8],
            v => return Err(DwarfError::InvalidAddressSize(v)),
        };
        self.memory.read(address, buf).ok_or(DwarfError::ReadFailed(address))?;
        Ok(self.endian.read_uint(buf))
    }
}
