//! This crate provides the core unwinding-information interpreter of a
//! crash reporter: it evaluates a DWARF CFA (Call Frame Information)
//! program for one program-counter location and produces the rule set
//! needed to recover the calling frame's registers.
//!
//! It is built to run inside a crash/signal handler against the memory of
//! an already-faulted task: the evaluation path performs no heap
//! allocation, takes no locks, and treats every byte of input as
//! untrusted. All task memory access goes through the [Memory] capability,
//! so the same engine runs against the current process ([LocalMemory]) or
//! a captured snapshot ([SliceMemory]); any read of corrupted, truncated
//! or unmapped data fails the evaluation instead of faulting.
//!
//! Simple usage:
//! ```
//! use crashframe::{eval_cfa_program, CfaRule, CieInfo, Endian, SliceMemory};
//!
//! // DW_CFA_def_cfa r7, 16
//! let program = [0x0c, 0x07, 0x10];
//! let memory = SliceMemory::new(0x1000, &program);
//! let row = eval_cfa_program(
//!     &memory,
//!     &CieInfo::default(),
//!     None,
//!     Endian::Little,
//!     0x1000,
//!     0,
//!     program.len() as u64,
//!     None,
//! )
//! .unwrap();
//! assert_eq!(row.cfa_rule(), CfaRule::RegisterOffset { register: 7, offset: 16 });
//! ```
//!
//! The stack walker drives this once per frame: it locates the FDE for the
//! frame's pc, evaluates the CIE's initial instructions, then evaluates the
//! FDE's program seeded with that initial row and applies the resulting
//! rules to compute the caller's registers.

mod dwarf;
mod endian;
mod memory;

pub use dwarf::consts;
pub use dwarf::{
    eval_cfa_program, CfaRule, CieInfo, DwarfError, OpStream, PointerState, RegisterRule, Row,
    MAX_SAVED_STATES, REGISTER_TABLE_SIZE,
};
pub use endian::Endian;
pub use memory::{LocalMemory, Memory, SliceMemory};

/// A result type that wraps [DwarfError].
pub type Result<T> = std::result::Result<T, DwarfError>;
