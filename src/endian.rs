use byteorder::{BigEndian, ByteOrder, LittleEndian};

/// Byte order of the inspected task's memory.
///
/// The crash reporter may examine an image produced by a task whose byte
/// order differs from the host's, so the order is carried as a value rather
/// than fixed at compile time.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Endian {
    Big,
    Little,
}

impl Endian {
    /// The byte order of the executing host.
    #[inline]
    pub fn native() -> Self {
        if cfg!(target_endian = "big") {
            Endian::Big
        } else {
            Endian::Little
        }
    }

    #[inline]
    pub fn read_u16(self, buf: &[u8]) -> u16 {
        match self {
            Endian::Big => BigEndian::read_u16(buf),
            Endian::Little => LittleEndian::read_u16(buf),
        }
    }

    #[inline]
    pub fn read_u32(self, buf: &[u8]) -> u32 {
        match self {
            Endian::Big => BigEndian::read_u32(buf),
            Endian::Little => LittleEndian::read_u32(buf),
        }
    }

    #[inline]
    pub fn read_u64(self, buf: &[u8]) -> u64 {
        match self {
            Endian::Big => BigEndian::read_u64(buf),
            Endian::Little => LittleEndian::read_u64(buf),
        }
    }

    /// Read an unsigned integer of `buf.len()` bytes (at most 8) into a u64.
    #[inline]
    pub fn read_uint(self, buf: &[u8]) -> u64 {
        match self {
            Endian::Big => BigEndian::read_uint(buf, buf.len()),
            Endian::Little => LittleEndian::read_uint(buf, buf.len()),
        }
    }
}
