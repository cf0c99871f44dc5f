//! Module and instruction helpers for the debugger's expression language.
//!
//! Every helper maps addresses to a `u64` and answers zero when the address
//! is not inside a module or does not decode, so the evaluator never has to
//! deal with errors.

use std::sync::Arc;

use crate::disasm::{DecodedInstruction, InstructionDecoder};
use crate::memory::TargetMemory;
use crate::modules::ModuleRegistry;

/// Name and argument count of every helper [`ExprContext::call`] dispatches
pub const FUNCTIONS: &[(&str, usize)] = &[
    ("mod.party", 1),
    ("mod.base", 1),
    ("mod.size", 1),
    ("mod.entry", 1),
    ("mod.hash", 1),
    ("mem.valid", 1),
    ("dis.len", 1),
    ("dis.iscond", 1),
    ("dis.isbranch", 1),
    ("dis.isret", 1),
    ("dis.ismem", 1),
    ("dis.imm", 1),
    ("dis.brtrue", 1),
    ("dis.brfalse", 1),
    ("bswap", 1),
    ("ternary", 3),
];

/// Everything the helpers read from
#[derive(Clone)]
pub struct ExprContext {
    registry: Arc<ModuleRegistry>,
    memory: Arc<dyn TargetMemory>,
    decoder: Arc<dyn InstructionDecoder>,
}

impl ExprContext {
    pub fn new(
        registry: Arc<ModuleRegistry>,
        memory: Arc<dyn TargetMemory>,
        decoder: Arc<dyn InstructionDecoder>,
    ) -> Self {
        Self {
            registry,
            memory,
            decoder,
        }
    }

    /// Call a helper by name. `None` for an unknown name or wrong arity.
    pub fn call(&self, name: &str, args: &[u64]) -> Option<u64> {
        let value = match (name, args) {
            ("mod.party", &[addr]) => self.modparty(addr),
            ("mod.base", &[addr]) => self.modbase(addr),
            ("mod.size", &[addr]) => self.modsize(addr),
            ("mod.entry", &[addr]) => self.modentry(addr),
            ("mod.hash", &[addr]) => self.modhash(addr),
            ("mem.valid", &[addr]) => self.memvalid(addr),
            ("dis.len", &[addr]) => self.dislen(addr),
            ("dis.iscond", &[addr]) => self.disiscond(addr),
            ("dis.isbranch", &[addr]) => self.disisbranch(addr),
            ("dis.isret", &[addr]) => self.disisret(addr),
            ("dis.ismem", &[addr]) => self.disismem(addr),
            ("dis.imm", &[addr]) => self.disimm(addr),
            ("dis.brtrue", &[addr]) => self.disbrtrue(addr),
            ("dis.brfalse", &[addr]) => self.disbrfalse(addr),
            ("bswap", &[value]) => bswap(value),
            ("ternary", &[cond, a, b]) => ternary(cond, a, b),
            _ => return None,
        };
        Some(value)
    }

    /// 1 for system modules, 0 for user modules and unknown addresses
    pub fn modparty(&self, addr: u64) -> u64 {
        self.registry
            .trust_class_from_addr(addr)
            .map_or(0, |t| t.as_u64())
    }

    pub fn modbase(&self, addr: u64) -> u64 {
        self.registry.base_from_addr(addr).unwrap_or(0)
    }

    pub fn modsize(&self, addr: u64) -> u64 {
        self.registry.size_from_addr(addr).unwrap_or(0)
    }

    pub fn modentry(&self, addr: u64) -> u64 {
        self.registry.entry_from_addr(addr).unwrap_or(0)
    }

    pub fn modhash(&self, addr: u64) -> u64 {
        self.registry.hash_from_addr(addr)
    }

    pub fn memvalid(&self, addr: u64) -> u64 {
        u64::from(self.memory.is_readable(addr))
    }

    fn decode(&self, addr: u64) -> Option<DecodedInstruction> {
        self.decoder.decode_one(addr)
    }

    fn decoded(&self, addr: u64, f: impl FnOnce(&DecodedInstruction) -> u64) -> u64 {
        self.decode(addr).as_ref().map_or(0, f)
    }

    pub fn dislen(&self, addr: u64) -> u64 {
        self.decoded(addr, |i| i.size as u64)
    }

    pub fn disiscond(&self, addr: u64) -> u64 {
        self.decoded(addr, |i| u64::from(i.is_conditional))
    }

    pub fn disisbranch(&self, addr: u64) -> u64 {
        self.decoded(addr, |i| u64::from(i.is_branch))
    }

    pub fn disisret(&self, addr: u64) -> u64 {
        self.decoded(addr, |i| u64::from(i.is_ret))
    }

    pub fn disismem(&self, addr: u64) -> u64 {
        self.decoded(addr, |i| u64::from(i.has_memory))
    }

    pub fn disimm(&self, addr: u64) -> u64 {
        self.decoded(addr, |i| i.immediate)
    }

    /// Destination when the branch is taken
    pub fn disbrtrue(&self, addr: u64) -> u64 {
        self.decoded(addr, |i| if i.is_branch { i.branch_target } else { 0 })
    }

    /// Fall-through address of a branch that can return or not be taken
    pub fn disbrfalse(&self, addr: u64) -> u64 {
        self.decoded(addr, |i| {
            if i.is_branch && !i.is_jump {
                i.next_address()
            } else {
                0
            }
        })
    }
}

impl std::fmt::Debug for ExprContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExprContext")
            .field("modules", &self.registry.read().len())
            .finish_non_exhaustive()
    }
}

/// Reverse the byte order of a 64-bit value
pub fn bswap(value: u64) -> u64 {
    value.swap_bytes()
}

pub fn ternary(condition: u64, value1: u64, value2: u64) -> u64 {
    if condition != 0 {
        value1
    } else {
        value2
    }
}
