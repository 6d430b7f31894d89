pub use cfa::{eval_cfa_program, CfaRule, RegisterRule, Row, MAX_SAVED_STATES, REGISTER_TABLE_SIZE};
pub use cie::{CieInfo, PointerState};
pub use opstream::OpStream;

mod cfa;
mod cie;
pub mod consts;
mod encoding;
mod opstream;

/// Error definition.
///
/// Every failure aborts the whole evaluation; there is no partial-success
/// contract. The variants fall into four classes: not-supported data
/// ([UnsupportedOpcode], [SegmentsNotSupported], [InvalidPointerEncoding],
/// [InvalidAddressSize]), invalid data (the read/decode failures,
/// [MissingBaseAddress], [InvalidRegisterNumber], [InvalidCfaRule]), and
/// the save-stack misuses [StackUnderflow] and [StackOverflow].
///
/// [UnsupportedOpcode]: DwarfError::UnsupportedOpcode
/// [SegmentsNotSupported]: DwarfError::SegmentsNotSupported
/// [InvalidPointerEncoding]: DwarfError::InvalidPointerEncoding
/// [InvalidAddressSize]: DwarfError::InvalidAddressSize
/// [MissingBaseAddress]: DwarfError::MissingBaseAddress
/// [InvalidRegisterNumber]: DwarfError::InvalidRegisterNumber
/// [InvalidCfaRule]: DwarfError::InvalidCfaRule
/// [StackUnderflow]: DwarfError::StackUnderflow
/// [StackOverflow]: DwarfError::StackOverflow
#[derive(thiserror::Error, Debug, Copy, Clone, Eq, PartialEq)]
pub enum DwarfError {
    #[error("unsupported opcode: {0:#04x}")]
    UnsupportedOpcode(u8),

    #[error("segmented target pointers are not supported (segment size {0})")]
    SegmentsNotSupported(u8),

    #[error("invalid pointer encoding: {0:#04x}")]
    InvalidPointerEncoding(u8),

    #[error("invalid target address size: {0}")]
    InvalidAddressSize(u8),

    #[error("missing base address for pointer encoding {0:#04x}")]
    MissingBaseAddress(u8),

    #[error("memory read failed at {0:#x}")]
    ReadFailed(u64),

    #[error("read past the end of the opcode stream at {0:#x}")]
    OutOfBounds(u64),

    #[error("truncated uleb128 at {0:#x}")]
    TruncatedUleb128(u64),

    #[error("malformed uleb128 at {0:#x}")]
    MalformedUleb128(u64),

    #[error("truncated sleb128 at {0:#x}")]
    TruncatedSleb128(u64),

    #[error("malformed sleb128 at {0:#x}")]
    MalformedSleb128(u64),

    #[error("invalid register number: {0}")]
    InvalidRegisterNumber(usize),

    #[error("cfa rule is not register+offset")]
    InvalidCfaRule,

    #[error("restore_state without a matching remember_state")]
    StackUnderflow,

    #[error("remember_state nested too deeply")]
    StackOverflow,
}
