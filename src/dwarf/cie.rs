use crate::dwarf::consts::DW_EH_PE_OMIT;

/// Per-CIE metadata required to evaluate a CFA program.
///
/// The CIE/FDE locator parses the container format and fills this in; the
/// evaluator only reads it. `pointer_encoding` is meaningful when
/// `has_eh_augmentation` is set and defaults to [DW_EH_PE_OMIT] otherwise.
#[derive(Debug, Copy, Clone)]
pub struct CieInfo {
    /// Segment selector size in bytes; 0 when segments are unused.
    /// A non-zero value makes pointer-bearing opcodes fail, segmented
    /// targets are not supported.
    pub segment_size: u8,
    pub code_align_factor: u64,
    pub data_align_factor: i64,
    pub return_address_register: u32,
    /// Size in bytes of a machine word in the target task (4 or 8).
    pub address_size: u8,
    /// Whether the CIE carries GNU eh_frame augmentation data declaring a
    /// pointer encoding for the opcode stream.
    pub has_eh_augmentation: bool,
    pub pointer_encoding: u8,
}

impl Default for CieInfo {
    fn default() -> Self {
        Self {
            segment_size: 0,
            code_align_factor: 1,
            data_align_factor: 1,
            return_address_register: 0,
            address_size: 8,
            has_eh_augmentation: false,
            pointer_encoding: DW_EH_PE_OMIT,
        }
    }
}

/// Base addresses for resolving relative GNU eh_frame pointer encodings.
///
/// Absent bases make the corresponding encodings fail with a missing-base
/// error; the evaluator never falls back to an absolute interpretation.
#[derive(Debug, Default, Copy, Clone)]
pub struct PointerState {
    /// Start address of the function the opcode stream belongs to.
    pub func_base: Option<u64>,
    /// Load address of the text segment.
    pub text_base: Option<u64>,
    /// Load address of the data segment (eh_frame_hdr on ELF targets).
    pub data_base: Option<u64>,
}
