//! Instruction decoding for the expression helpers.
//!
//! Only the facts the `dis*` helpers need are extracted: length, control-flow
//! class, memory operands, the first immediate and the branch target.

pub mod iced;

pub use iced::IcedDecoder;

/// Longest possible x86 instruction
pub const MAX_INSTRUCTION_LEN: usize = 15;

/// One decoded instruction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedInstruction {
    pub address: u64,
    pub size: usize,
    /// Lowercase mnemonic, e.g. `jne`
    pub mnemonic: String,
    /// Any jump or call, direct or indirect
    pub is_branch: bool,
    pub is_call: bool,
    /// Jump taken only when a condition holds (`jcc`, `loop`, `jrcxz`)
    pub is_conditional: bool,
    /// Jump that is always taken
    pub is_jump: bool,
    pub is_ret: bool,
    pub has_memory: bool,
    /// First immediate operand, zero when there is none
    pub immediate: u64,
    /// Target of a direct branch, zero otherwise
    pub branch_target: u64,
}

impl DecodedInstruction {
    /// Address of the next instruction in sequence
    pub fn next_address(&self) -> u64 {
        self.address.wrapping_add(self.size as u64)
    }
}

/// Decodes instructions out of the target's memory
pub trait InstructionDecoder: Send + Sync {
    /// Decode the instruction at `address`. `None` when memory is unreadable
    /// or the bytes do not form a valid instruction.
    fn decode_one(&self, address: u64) -> Option<DecodedInstruction>;
}
