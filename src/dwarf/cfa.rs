use crate::dwarf::cie::{CieInfo, PointerState};
use crate::dwarf::consts::*;
use crate::dwarf::encoding::{decode_pointer, decode_sleb128, decode_uleb128};
use crate::dwarf::opstream::OpStream;
use crate::dwarf::DwarfError;
use crate::endian::Endian;
use crate::memory::Memory;
use smallvec::SmallVec;

/// Number of entries in a row's register-rule table.
///
/// DWARF register numbers are bounded per ABI: on aarch64 the AADWARF
/// numbering uses 0-33 for the general registers and pseudo RA_SIGN_STATE,
/// and 64-95 for v0-v31; on x86_64 the psABI numbering stays below 56 for
/// everything an unwinder can name. Rules for register numbers at or above
/// this bound are rejected with [DwarfError::InvalidRegisterNumber].
#[cfg(target_arch = "aarch64")]
pub const REGISTER_TABLE_SIZE: usize = 97;
#[cfg(target_arch = "x86_64")]
pub const REGISTER_TABLE_SIZE: usize = 56;
#[cfg(not(any(target_arch = "aarch64", target_arch = "x86_64")))]
pub const REGISTER_TABLE_SIZE: usize = 64;

/// Maximum nesting depth of DW_CFA_remember_state.
///
/// Compiler-emitted programs nest one or two levels deep; the bound exists
/// so the saved rows live in inline storage and a corrupt program cannot
/// grow the stack without limit.
pub const MAX_SAVED_STATES: usize = 6;

/// How to recover one register's value in the caller's frame.
///
/// Expression variants record the task-relative address and byte length of
/// the DWARF expression block; evaluating the block is the expression
/// engine's job, not the CFA interpreter's.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RegisterRule {
    /// The register cannot be recovered.
    Undefined,
    /// The register still holds its value from the caller's frame.
    SameValue,
    /// The value is stored at CFA + offset.
    Offset(i64),
    /// The value is CFA + offset itself, no load.
    ValOffset(i64),
    /// The value lives in another register.
    Register(u32),
    /// The value is stored at the address computed by a DWARF expression.
    Expression { address: u64, length: u64 },
    /// The value is the result of a DWARF expression.
    ValExpression { address: u64, length: u64 },
}

impl Default for RegisterRule {
    fn default() -> Self {
        RegisterRule::Undefined
    }
}

/// How to compute the Canonical Frame Address for the current row.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CfaRule {
    /// No CFA-definition opcode has run yet.
    Unset,
    /// CFA = register + offset.
    RegisterOffset { register: u32, offset: i64 },
    /// CFA is the result of a DWARF expression.
    Expression { address: u64, length: u64 },
}

impl Default for CfaRule {
    fn default() -> Self {
        CfaRule::Unset
    }
}

/// One row of the virtual unwind table: the location it applies to, the
/// CFA rule and a recovery rule per register.
///
/// Rows are plain values with inline storage; an evaluation call owns its
/// row and copies it onto the bounded save stack for remember/restore.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Row {
    loc: u64,
    cfa: CfaRule,
    args_size: u64,
    registers: [RegisterRule; REGISTER_TABLE_SIZE],
}

impl Default for Row {
    fn default() -> Self {
        Self {
            loc: 0,
            cfa: CfaRule::Unset,
            args_size: 0,
            registers: [RegisterRule::Undefined; REGISTER_TABLE_SIZE],
        }
    }
}

impl Row {
    /// The instruction-pointer location this row applies to.
    #[inline]
    pub fn location(&self) -> u64 {
        self.loc
    }

    #[inline]
    pub fn cfa_rule(&self) -> CfaRule {
        self.cfa
    }

    /// Argument area size recorded by DW_CFA_GNU_args_size, 0 otherwise.
    #[inline]
    pub fn args_size(&self) -> u64 {
        self.args_size
    }

    /// The recovery rule for register `n`, or `None` when `n` is outside
    /// the table.
    #[inline]
    pub fn register_rule(&self, n: usize) -> Option<RegisterRule> {
        self.registers.get(n).copied()
    }

    fn set_register(&mut self, n: usize, rule: RegisterRule) -> Result<(), DwarfError> {
        match self.registers.get_mut(n) {
            Some(slot) => {
                *slot = rule;
                Ok(())
            }
            None => Err(DwarfError::InvalidRegisterNumber(n)),
        }
    }
}

/// Evaluate a DWARF CFA program, as defined in the DWARF4 Specification,
/// section 6.4.2.
///
/// The opcodes are read from `memory` at `address + offset` for `length`
/// bytes and applied to a fresh row, or to a copy of `initial` when given.
/// `initial` is the row produced by the CIE's initial instructions; it
/// seeds the working row for an FDE program and is what
/// DW_CFA_restore/restore_extended reset registers to. Pointer-bearing
/// opcodes decode per the CIE's declared eh_frame encoding, or as absolute
/// machine words when the CIE has no eh augmentation.
///
/// Returns the populated row on success. Any unrecognized opcode, truncated
/// operand, failed read or save-stack misuse aborts the whole evaluation;
/// a partially-applied row is never returned.
#[allow(clippy::too_many_arguments)]
pub fn eval_cfa_program<M: Memory>(
    memory: &M,
    cie_info: &CieInfo,
    ptr_state: Option<&PointerState>,
    byte_order: Endian,
    address: u64,
    offset: u64,
    length: u64,
    initial: Option<&Row>,
) -> Result<Row, DwarfError> {
    if cie_info.address_size != 4 && cie_info.address_size != 8 {
        return Err(DwarfError::InvalidAddressSize(cie_info.address_size));
    }

    // Default to reading target pointers as absolute machine words. A CIE
    // that declares an eh_frame encoding gets exactly that encoding; if it
    // needs a base the caller did not supply, decoding fails rather than
    // silently reading an absolute value.
    let ptr_encoding = if cie_info.has_eh_augmentation {
        cie_info.pointer_encoding
    } else {
        DW_EH_PE_ABSPTR | DW_EH_PE_PTR
    };

    let mut stream = OpStream::new(memory, byte_order, address, offset, length)?;
    let mut row = match initial {
        Some(r) => *r,
        None => Row::default(),
    };
    let mut saved: SmallVec<[Row; MAX_SAVED_STATES]> = SmallVec::new();

    while !stream.is_empty() {
        let opcode = stream.read_u8()?;
        match opcode {
            DW_CFA_NOP => {}
            DW_CFA_SET_LOC => {
                if cie_info.segment_size != 0 {
                    return Err(DwarfError::SegmentsNotSupported(cie_info.segment_size));
                }
                row.loc = decode_pointer(&mut stream, ptr_encoding, cie_info.address_size, ptr_state)?;
            }
            DW_CFA_ADVANCE_LOC1 => {
                let delta = stream.read_u8()? as u64;
                row.loc = row.loc.wrapping_add(delta.wrapping_mul(cie_info.code_align_factor));
            }
            DW_CFA_ADVANCE_LOC2 => {
                let delta = stream.read_u16()? as u64;
                row.loc = row.loc.wrapping_add(delta.wrapping_mul(cie_info.code_align_factor));
            }
            DW_CFA_ADVANCE_LOC4 => {
                let delta = stream.read_u32()? as u64;
                row.loc = row.loc.wrapping_add(delta.wrapping_mul(cie_info.code_align_factor));
            }
            DW_CFA_OFFSET_EXTENDED => {
                let r = decode_uleb128(&mut stream)? as usize;
                let n = (decode_uleb128(&mut stream)? as i64).wrapping_mul(cie_info.data_align_factor);
                row.set_register(r, RegisterRule::Offset(n))?;
            }
            DW_CFA_RESTORE_EXTENDED => {
                let r = decode_uleb128(&mut stream)? as usize;
                restore_register(&mut row, r, initial)?;
            }
            DW_CFA_UNDEFINED => {
                let r = decode_uleb128(&mut stream)? as usize;
                row.set_register(r, RegisterRule::Undefined)?;
            }
            DW_CFA_SAME_VALUE => {
                let r = decode_uleb128(&mut stream)? as usize;
                row.set_register(r, RegisterRule::SameValue)?;
            }
            DW_CFA_REGISTER => {
                let r1 = decode_uleb128(&mut stream)? as usize;
                let r2 = decode_uleb128(&mut stream)? as usize;
                if r2 >= REGISTER_TABLE_SIZE {
                    return Err(DwarfError::InvalidRegisterNumber(r2));
                }
                row.set_register(r1, RegisterRule::Register(r2 as u32))?;
            }
            DW_CFA_REMEMBER_STATE => {
                if saved.len() == MAX_SAVED_STATES {
                    return Err(DwarfError::StackOverflow);
                }
                saved.push(row);
            }
            DW_CFA_RESTORE_STATE => {
                // The saved rules come back; the current location is kept,
                // it is not part of the remembered state.
                let loc = row.loc;
                row = saved.pop().ok_or(DwarfError::StackUnderflow)?;
                row.loc = loc;
            }
            DW_CFA_DEF_CFA => {
                let r = check_register(decode_uleb128(&mut stream)? as usize)?;
                let n = decode_uleb128(&mut stream)? as i64;
                row.cfa = CfaRule::RegisterOffset {
                    register: r as u32,
                    offset: n,
                };
            }
            DW_CFA_DEF_CFA_SF => {
                let r = check_register(decode_uleb128(&mut stream)? as usize)?;
                let n = decode_sleb128(&mut stream)?.wrapping_mul(cie_info.data_align_factor);
                row.cfa = CfaRule::RegisterOffset {
                    register: r as u32,
                    offset: n,
                };
            }
            DW_CFA_DEF_CFA_REGISTER => {
                let r = check_register(decode_uleb128(&mut stream)? as usize)?;
                match row.cfa {
                    CfaRule::RegisterOffset { offset, .. } => {
                        row.cfa = CfaRule::RegisterOffset {
                            register: r as u32,
                            offset,
                        };
                    }
                    _ => return Err(DwarfError::InvalidCfaRule),
                }
            }
            DW_CFA_DEF_CFA_OFFSET => {
                let n = decode_uleb128(&mut stream)? as i64;
                match row.cfa {
                    CfaRule::RegisterOffset { register, .. } => {
                        row.cfa = CfaRule::RegisterOffset { register, offset: n };
                    }
                    _ => return Err(DwarfError::InvalidCfaRule),
                }
            }
            DW_CFA_DEF_CFA_OFFSET_SF => {
                let n = decode_sleb128(&mut stream)?.wrapping_mul(cie_info.data_align_factor);
                match row.cfa {
                    CfaRule::RegisterOffset { register, .. } => {
                        row.cfa = CfaRule::RegisterOffset { register, offset: n };
                    }
                    _ => return Err(DwarfError::InvalidCfaRule),
                }
            }
            DW_CFA_DEF_CFA_EXPRESSION => {
                let len = decode_uleb128(&mut stream)?;
                let expr = stream.position();
                stream.skip(len)?;
                row.cfa = CfaRule::Expression {
                    address: expr,
                    length: len,
                };
            }
            DW_CFA_EXPRESSION => {
                let r = decode_uleb128(&mut stream)? as usize;
                let len = decode_uleb128(&mut stream)?;
                let expr = stream.position();
                stream.skip(len)?;
                row.set_register(
                    r,
                    RegisterRule::Expression {
                        address: expr,
                        length: len,
                    },
                )?;
            }
            DW_CFA_VAL_EXPRESSION => {
                let r = decode_uleb128(&mut stream)? as usize;
                let len = decode_uleb128(&mut stream)?;
                let expr = stream.position();
                stream.skip(len)?;
                row.set_register(
                    r,
                    RegisterRule::ValExpression {
                        address: expr,
                        length: len,
                    },
                )?;
            }
            DW_CFA_OFFSET_EXTENDED_SF => {
                let r = decode_uleb128(&mut stream)? as usize;
                let n = decode_sleb128(&mut stream)?.wrapping_mul(cie_info.data_align_factor);
                row.set_register(r, RegisterRule::Offset(n))?;
            }
            DW_CFA_VAL_OFFSET => {
                let r = decode_uleb128(&mut stream)? as usize;
                let n = (decode_uleb128(&mut stream)? as i64).wrapping_mul(cie_info.data_align_factor);
                row.set_register(r, RegisterRule::ValOffset(n))?;
            }
            DW_CFA_VAL_OFFSET_SF => {
                let r = decode_uleb128(&mut stream)? as usize;
                let n = decode_sleb128(&mut stream)?.wrapping_mul(cie_info.data_align_factor);
                row.set_register(r, RegisterRule::ValOffset(n))?;
            }
            DW_CFA_GNU_ARGS_SIZE => {
                row.args_size = decode_uleb128(&mut stream)?;
            }
            DW_CFA_GNU_NEGATIVE_OFFSET_EXTENDED => {
                let r = decode_uleb128(&mut stream)? as usize;
                let n = (decode_uleb128(&mut stream)? as i64).wrapping_mul(cie_info.data_align_factor);
                row.set_register(r, RegisterRule::Offset(n.wrapping_neg()))?;
            }
            _ => {
                let operand = (opcode & 0x3f) as u64;
                match opcode & 0xc0 {
                    DW_CFA_ADVANCE_LOC => {
                        row.loc = row.loc.wrapping_add(operand.wrapping_mul(cie_info.code_align_factor));
                    }
                    DW_CFA_OFFSET => {
                        let n = (decode_uleb128(&mut stream)? as i64).wrapping_mul(cie_info.data_align_factor);
                        row.set_register(operand as usize, RegisterRule::Offset(n))?;
                    }
                    DW_CFA_RESTORE => {
                        restore_register(&mut row, operand as usize, initial)?;
                    }
                    _ => return Err(DwarfError::UnsupportedOpcode(opcode)),
                }
            }
        }
    }

    Ok(row)
}

#[inline]
fn check_register(r: usize) -> Result<usize, DwarfError> {
    if r >= REGISTER_TABLE_SIZE {
        return Err(DwarfError::InvalidRegisterNumber(r));
    }
    Ok(r)
}

fn restore_register(row: &mut Row, r: usize, initial: Option<&Row>) -> Result<(), DwarfError> {
    let rule = match initial {
        Some(init) => init
            .register_rule(r)
            .ok_or(DwarfError::InvalidRegisterNumber(r))?,
        // No initial-instructions row available; the register goes back
        // to unrecoverable.
        None => RegisterRule::Undefined,
    };
    row.set_register(r, rule)
}
