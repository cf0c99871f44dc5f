use std::sync::Arc;

use iced_x86::{Decoder, DecoderOptions, FlowControl, Instruction, OpKind};

use crate::disasm::{DecodedInstruction, InstructionDecoder, MAX_INSTRUCTION_LEN};
use crate::memory::TargetMemory;

/// x86/x64 decoder backed by iced-x86
pub struct IcedDecoder {
    memory: Arc<dyn TargetMemory>,
    bits: u32,
}

impl IcedDecoder {
    /// `bits` is 16, 32 or 64; anything else decodes as 64-bit
    pub fn new(memory: Arc<dyn TargetMemory>, bits: u32) -> Self {
        let bits = match bits {
            16 | 32 | 64 => bits,
            _ => 64,
        };
        Self { memory, bits }
    }

    pub fn bits(&self) -> u32 {
        self.bits
    }

    /// Decode from a byte buffer located at `address`
    pub fn decode_bytes(&self, address: u64, bytes: &[u8]) -> Option<DecodedInstruction> {
        let mut decoder = Decoder::with_ip(self.bits, bytes, address, DecoderOptions::NONE);
        let instr = decoder.decode();
        if instr.is_invalid() {
            return None;
        }
        Some(describe(&instr))
    }

    /// Read as many bytes as are readable at `address`, up to one
    /// instruction's worth
    fn fetch(&self, address: u64) -> Option<bytes::Bytes> {
        (1..=MAX_INSTRUCTION_LEN)
            .rev()
            .find_map(|len| self.memory.read_bytes(address, len))
    }
}

impl InstructionDecoder for IcedDecoder {
    fn decode_one(&self, address: u64) -> Option<DecodedInstruction> {
        let bytes = self.fetch(address)?;
        self.decode_bytes(address, &bytes)
    }
}

impl std::fmt::Debug for IcedDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IcedDecoder").field("bits", &self.bits).finish()
    }
}

fn immediate_of(instr: &Instruction, kind: OpKind) -> Option<u64> {
    let value = match kind {
        OpKind::Immediate8 => u64::from(instr.immediate8()),
        OpKind::Immediate8_2nd => u64::from(instr.immediate8_2nd()),
        OpKind::Immediate16 => u64::from(instr.immediate16()),
        OpKind::Immediate32 => u64::from(instr.immediate32()),
        OpKind::Immediate64 => instr.immediate64(),
        OpKind::Immediate8to16 => instr.immediate8to16() as u16 as u64,
        OpKind::Immediate8to32 => instr.immediate8to32() as u32 as u64,
        OpKind::Immediate8to64 => instr.immediate8to64() as u64,
        OpKind::Immediate32to64 => instr.immediate32to64() as u64,
        _ => return None,
    };
    Some(value)
}

fn describe(instr: &Instruction) -> DecodedInstruction {
    let flow = instr.flow_control();
    let is_call = matches!(flow, FlowControl::Call | FlowControl::IndirectCall);
    let is_jump = matches!(
        flow,
        FlowControl::UnconditionalBranch | FlowControl::IndirectBranch
    );
    let is_conditional = flow == FlowControl::ConditionalBranch;

    let kinds: Vec<OpKind> = (0..instr.op_count()).map(|i| instr.op_kind(i)).collect();
    let has_memory = kinds.iter().any(|k| {
        matches!(
            k,
            OpKind::Memory
                | OpKind::MemorySegSI
                | OpKind::MemorySegESI
                | OpKind::MemorySegRSI
                | OpKind::MemorySegDI
                | OpKind::MemorySegEDI
                | OpKind::MemorySegRDI
                | OpKind::MemoryESDI
                | OpKind::MemoryESEDI
                | OpKind::MemoryESRDI
        )
    });
    let immediate = kinds
        .iter()
        .find_map(|&k| immediate_of(instr, k))
        .unwrap_or(0);
    let branch_target = if kinds.iter().any(|k| {
        matches!(
            k,
            OpKind::NearBranch16 | OpKind::NearBranch32 | OpKind::NearBranch64
        )
    }) {
        instr.near_branch_target()
    } else {
        0
    };

    DecodedInstruction {
        address: instr.ip(),
        size: instr.len(),
        mnemonic: format!("{:?}", instr.mnemonic()).to_ascii_lowercase(),
        is_branch: is_call || is_jump || is_conditional,
        is_call,
        is_conditional,
        is_jump,
        is_ret: flow == FlowControl::Return,
        has_memory,
        immediate,
        branch_target,
    }
}
