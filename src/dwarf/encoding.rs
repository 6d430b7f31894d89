use crate::dwarf::cie::PointerState;
use crate::dwarf::consts::*;
use crate::dwarf::opstream::OpStream;
use crate::dwarf::DwarfError;
use crate::memory::Memory;

/// Read a ULEB128 from the stream into a 64-bit word.
pub fn decode_uleb128<M: Memory>(stream: &mut OpStream<M>) -> Result<u64, DwarfError> {
    let mut res = 0u64;
    let mut shift = 0u32;
    loop {
        if stream.is_empty() {
            return Err(DwarfError::TruncatedUleb128(stream.position()));
        }
        let byte = stream.read_u8()?;
        let low = (byte & 0x7f) as u64;
        if shift >= 64 || low << shift >> shift != low {
            return Err(DwarfError::MalformedUleb128(stream.position()));
        }
        res |= low << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            break;
        }
    }
    Ok(res)
}

/// Read a SLEB128 from the stream into a signed 64-bit word.
pub fn decode_sleb128<M: Memory>(stream: &mut OpStream<M>) -> Result<i64, DwarfError> {
    let mut res = 0i64;
    let mut shift = 0u32;
    let mut byte;
    loop {
        if stream.is_empty() {
            return Err(DwarfError::TruncatedSleb128(stream.position()));
        }
        byte = stream.read_u8()?;
        if shift >= 64 {
            return Err(DwarfError::MalformedSleb128(stream.position()));
        }
        res |= (((byte & 0x7f) as u64) << shift) as i64;
        shift += 7;
        if byte & 0x80 == 0 {
            break;
        }
    }
    // Sign extend negative numbers.
    if byte & 0x40 != 0 && shift < 64 {
        res |= (u64::MAX << shift) as i64;
    }
    Ok(res)
}

/// Decode a GNU eh_frame encoded pointer from the stream.
///
/// The encoding byte combines a value format (low 4 bits), a base selector
/// (bits 4-6) and the indirect modifier (bit 7). The base is resolved from
/// `state`; a relative encoding whose base is absent fails hard rather than
/// degrading to an absolute read. `DW_EH_PE_absptr` values are machine
/// words of `address_size` bytes.
pub fn decode_pointer<M: Memory>(
    stream: &mut OpStream<M>,
    encoding: u8,
    address_size: u8,
    state: Option<&PointerState>,
) -> Result<u64, DwarfError> {
    if encoding == DW_EH_PE_OMIT {
        return Err(DwarfError::InvalidPointerEncoding(encoding));
    }

    // The pc-relative base is the address of the encoded value itself, so
    // it must be taken before any value bytes are consumed.
    let base = match encoding & 0x70 {
        DW_EH_PE_ABSPTR => 0,
        DW_EH_PE_PCREL => stream.position(),
        DW_EH_PE_TEXTREL => state
            .and_then(|s| s.text_base)
            .ok_or(DwarfError::MissingBaseAddress(encoding))?,
        DW_EH_PE_DATAREL => state
            .and_then(|s| s.data_base)
            .ok_or(DwarfError::MissingBaseAddress(encoding))?,
        DW_EH_PE_FUNCREL => state
            .and_then(|s| s.func_base)
            .ok_or(DwarfError::MissingBaseAddress(encoding))?,
        // DW_EH_PE_aligned and the reserved selectors.
        _ => return Err(DwarfError::InvalidPointerEncoding(encoding)),
    };

    let value = match encoding & 0x0f {
        DW_EH_PE_PTR => stream.read_word(address_size)?,
        DW_EH_PE_ULEB128 => decode_uleb128(stream)?,
        DW_EH_PE_UDATA2 => stream.read_u16()? as u64,
        DW_EH_PE_UDATA4 => stream.read_u32()? as u64,
        DW_EH_PE_UDATA8 => stream.read_u64()?,
        DW_EH_PE_SLEB128 => decode_sleb128(stream)? as u64,
        DW_EH_PE_SDATA2 => stream.read_u16()? as i16 as i64 as u64,
        DW_EH_PE_SDATA4 => stream.read_u32()? as i32 as i64 as u64,
        DW_EH_PE_SDATA8 => stream.read_u64()?,
        _ => return Err(DwarfError::InvalidPointerEncoding(encoding)),
    };

    let mut res = base.wrapping_add(value);
    if encoding & DW_EH_PE_INDIRECT != 0 {
        res = stream.read_word_at(res, address_size)?;
    }
    Ok(res)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endian::Endian;
    use crate::memory::SliceMemory;
    use rand::Rng;

    fn stream_over<'a>(memory: &'a SliceMemory<'a>) -> OpStream<'a, SliceMemory<'a>> {
        OpStream::new(memory, Endian::Little, memory.base(), 0, memory.len()).unwrap()
    }

    #[test]
    fn test_decode_uleb128() {
        for val in [0u64, 1, 127, 128, 0x12345678, u64::MAX] {
            let mut buf = Vec::new();
            let len = leb128::write::unsigned(&mut buf, val).unwrap();
            assert_eq!(len, buf.len());
            let memory = SliceMemory::new(0x1000, &buf);
            let mut stream = stream_over(&memory);
            assert_eq!(decode_uleb128(&mut stream).unwrap(), val);
            assert!(stream.is_empty());
        }
    }

    #[test]
    fn test_decode_sleb128() {
        for val in [0i64, 1, -1, 63, -64, 0x12345678, -0x12345678, i64::MAX, i64::MIN] {
            let mut buf = Vec::new();
            let len = leb128::write::signed(&mut buf, val).unwrap();
            assert_eq!(len, buf.len());
            let memory = SliceMemory::new(0x1000, &buf);
            let mut stream = stream_over(&memory);
            assert_eq!(decode_sleb128(&mut stream).unwrap(), val);
            assert!(stream.is_empty());
        }
    }

    #[test]
    fn test_decode_leb128_random_round_trip() {
        let mut rng = rand::thread_rng();
        for _ in 0..1000 {
            let val: u64 = rng.gen();
            let mut buf = Vec::new();
            leb128::write::unsigned(&mut buf, val).unwrap();
            let memory = SliceMemory::new(0, &buf);
            assert_eq!(decode_uleb128(&mut stream_over(&memory)).unwrap(), val);

            let val: i64 = rng.gen();
            let mut buf = Vec::new();
            leb128::write::signed(&mut buf, val).unwrap();
            let memory = SliceMemory::new(0, &buf);
            assert_eq!(decode_sleb128(&mut stream_over(&memory)).unwrap(), val);
        }
    }

    #[test]
    fn test_decode_uleb128_truncated() {
        // Continuation bit set on the last available byte.
        let buf = [0x80u8, 0x80];
        let memory = SliceMemory::new(0, &buf);
        let mut stream = stream_over(&memory);
        assert!(matches!(
            decode_uleb128(&mut stream),
            Err(DwarfError::TruncatedUleb128(_))
        ));
    }

    #[test]
    fn test_decode_uleb128_overlong() {
        // 11 continuation bytes push past 64 bits of significance.
        let buf = [0xffu8; 11];
        let memory = SliceMemory::new(0, &buf);
        let mut stream = stream_over(&memory);
        assert!(matches!(
            decode_uleb128(&mut stream),
            Err(DwarfError::MalformedUleb128(_))
        ));
    }

    #[test]
    fn test_decode_pointer_absolute() {
        let buf = 0x1122334455667788u64.to_le_bytes();
        let memory = SliceMemory::new(0x2000, &buf);
        let mut stream = stream_over(&memory);
        let v = decode_pointer(&mut stream, DW_EH_PE_ABSPTR | DW_EH_PE_PTR, 8, None).unwrap();
        assert_eq!(v, 0x1122334455667788);
        assert!(stream.is_empty());

        // 4-byte machine words for 32-bit targets.
        let mut stream = stream_over(&memory);
        let v = decode_pointer(&mut stream, DW_EH_PE_ABSPTR | DW_EH_PE_PTR, 4, None).unwrap();
        assert_eq!(v, 0x55667788);
    }

    #[test]
    fn test_decode_pointer_fixed_formats() {
        let buf = [0x34, 0x12, 0x78, 0x56, 0xfe, 0xff];
        let memory = SliceMemory::new(0, &buf);
        let mut stream = stream_over(&memory);
        assert_eq!(decode_pointer(&mut stream, DW_EH_PE_UDATA2, 8, None).unwrap(), 0x1234);
        assert_eq!(decode_pointer(&mut stream, DW_EH_PE_UDATA2, 8, None).unwrap(), 0x5678);
        // sdata2 sign-extends.
        assert_eq!(
            decode_pointer(&mut stream, DW_EH_PE_SDATA2, 8, None).unwrap(),
            (-2i64) as u64
        );
    }

    #[test]
    fn test_decode_pointer_pcrel() {
        // Value is relative to its own location in the task.
        let buf = 0x10u32.to_le_bytes();
        let memory = SliceMemory::new(0x4000, &buf);
        let mut stream = stream_over(&memory);
        let v = decode_pointer(&mut stream, DW_EH_PE_PCREL | DW_EH_PE_UDATA4, 8, None).unwrap();
        assert_eq!(v, 0x4010);
    }

    #[test]
    fn test_decode_pointer_pcrel_negative() {
        let buf = (-0x20i32).to_le_bytes();
        let memory = SliceMemory::new(0x4000, &buf);
        let mut stream = stream_over(&memory);
        let v = decode_pointer(&mut stream, DW_EH_PE_PCREL | DW_EH_PE_SDATA4, 8, None).unwrap();
        assert_eq!(v, 0x3fe0);
    }

    #[test]
    fn test_decode_pointer_base_selectors() {
        let state = PointerState {
            func_base: Some(0x100),
            text_base: Some(0x200),
            data_base: Some(0x300),
        };
        let buf = 0x8u16.to_le_bytes();
        let memory = SliceMemory::new(0, &buf);

        let mut stream = stream_over(&memory);
        let enc = DW_EH_PE_FUNCREL | DW_EH_PE_UDATA2;
        assert_eq!(decode_pointer(&mut stream, enc, 8, Some(&state)).unwrap(), 0x108);

        let mut stream = stream_over(&memory);
        let enc = DW_EH_PE_TEXTREL | DW_EH_PE_UDATA2;
        assert_eq!(decode_pointer(&mut stream, enc, 8, Some(&state)).unwrap(), 0x208);

        let mut stream = stream_over(&memory);
        let enc = DW_EH_PE_DATAREL | DW_EH_PE_UDATA2;
        assert_eq!(decode_pointer(&mut stream, enc, 8, Some(&state)).unwrap(), 0x308);
    }

    #[test]
    fn test_decode_pointer_missing_base() {
        let buf = 0x8u16.to_le_bytes();
        let memory = SliceMemory::new(0, &buf);

        // No pointer state at all.
        let mut stream = stream_over(&memory);
        let enc = DW_EH_PE_TEXTREL | DW_EH_PE_UDATA2;
        assert!(matches!(
            decode_pointer(&mut stream, enc, 8, None),
            Err(DwarfError::MissingBaseAddress(_))
        ));

        // Pointer state present but the required base is unset.
        let state = PointerState {
            text_base: Some(0x200),
            ..Default::default()
        };
        let mut stream = stream_over(&memory);
        let enc = DW_EH_PE_DATAREL | DW_EH_PE_UDATA2;
        assert!(matches!(
            decode_pointer(&mut stream, enc, 8, Some(&state)),
            Err(DwarfError::MissingBaseAddress(_))
        ));
    }

    #[test]
    fn test_decode_pointer_indirect() {
        // The encoded udata4 names an address holding the real value.
        let mut buf = Vec::new();
        buf.extend_from_slice(&0x1008u32.to_le_bytes());
        buf.extend_from_slice(&[0u8; 4]);
        buf.extend_from_slice(&0xdeadbeefu64.to_le_bytes());
        let memory = SliceMemory::new(0x1000, &buf);
        let mut stream = OpStream::new(&memory, Endian::Little, 0x1000, 0, 4).unwrap();
        let enc = DW_EH_PE_INDIRECT | DW_EH_PE_ABSPTR | DW_EH_PE_UDATA4;
        assert_eq!(decode_pointer(&mut stream, enc, 8, None).unwrap(), 0xdeadbeef);
    }

    #[test]
    fn test_decode_pointer_invalid_encodings() {
        let buf = [0u8; 8];
        let memory = SliceMemory::new(0, &buf);

        let mut stream = stream_over(&memory);
        assert!(matches!(
            decode_pointer(&mut stream, DW_EH_PE_OMIT, 8, None),
            Err(DwarfError::InvalidPointerEncoding(_))
        ));

        let mut stream = stream_over(&memory);
        let enc = DW_EH_PE_ALIGNED | DW_EH_PE_PTR;
        assert!(matches!(
            decode_pointer(&mut stream, enc, 8, None),
            Err(DwarfError::InvalidPointerEncoding(_))
        ));

        // Reserved value format.
        let mut stream = stream_over(&memory);
        assert!(matches!(
            decode_pointer(&mut stream, 0x05, 8, None),
            Err(DwarfError::InvalidPointerEncoding(_))
        ));
    }
}
