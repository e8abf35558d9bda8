//! # Control-Program VM
//!
//! A small stack machine that decides whether an input may spend an
//! output. The program is the spent output's control program; the initial
//! stack is the input's witness arguments, bottom first; the only context
//! is the input's signature hash, pushed by `OP_TXSIGHASH`.
//!
//! Dispatch is a single `match` over the fixed opcode table in
//! [`program`]. There are no jumps, so execution is linear in program
//! length. A program succeeds iff it runs to the end and leaves a true
//! item (any non-zero byte) on top of the stack.
//!
//! ## Signature checks
//!
//! - `OP_CHECKSIG` pops a public key, a message and a signature and pushes
//!   the Ed25519 verification result.
//! - `OP_CHECKMULTISIG` pops `N`, `M`, `N` public keys, a message and `M`
//!   signatures. Signatures are matched against keys in order: each
//!   signature is tried against the remaining keys until one verifies, and
//!   a key is never reused. All `M` must match.

pub mod program;

use thiserror::Error;

use crate::config::MAX_MULTISIG_KEYS;
use crate::crypto::hash::pubkey_hash;
use crate::crypto::keys::verify;
use crate::types::Hash;
use program::*;

pub use program::{multisig_program, p2pkh_program, parse_p2pkh, push_data, push_int};

/// Upper bound on stack depth during execution.
pub const MAX_STACK_DEPTH: usize = 1_000;

/// Why a program did not authorize the spend.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VmError {
    #[error("unknown opcode 0x{opcode:02x} at offset {offset}")]
    UnknownOpcode { opcode: u8, offset: usize },

    #[error("push at offset {offset} runs past the end of the program")]
    TruncatedPush { offset: usize },

    #[error("stack underflow at offset {offset}")]
    StackUnderflow { offset: usize },

    #[error("stack depth limit exceeded")]
    StackOverflow,

    #[error("integer operand longer than 8 bytes at offset {offset}")]
    BadInteger { offset: usize },

    #[error("invalid multisig quorum {m}-of-{n}")]
    InvalidQuorum { m: usize, n: usize },

    #[error("verify failed at offset {offset}")]
    VerifyFailed { offset: usize },

    #[error("OP_FAIL at offset {offset}")]
    Fail { offset: usize },

    #[error("program finished without a true result")]
    FalseResult,
}

struct Machine<'a> {
    stack: Vec<Vec<u8>>,
    sig_hash: &'a Hash,
}

impl Machine<'_> {
    fn push(&mut self, item: Vec<u8>) -> Result<(), VmError> {
        if self.stack.len() >= MAX_STACK_DEPTH {
            return Err(VmError::StackOverflow);
        }
        self.stack.push(item);
        Ok(())
    }

    fn pop(&mut self, offset: usize) -> Result<Vec<u8>, VmError> {
        self.stack.pop().ok_or(VmError::StackUnderflow { offset })
    }

    fn pop_int(&mut self, offset: usize) -> Result<usize, VmError> {
        let item = self.pop(offset)?;
        if item.len() > 8 {
            return Err(VmError::BadInteger { offset });
        }
        let mut bytes = [0u8; 8];
        bytes[..item.len()].copy_from_slice(&item);
        Ok(u64::from_le_bytes(bytes) as usize)
    }

    fn pop_bool(&mut self, offset: usize) -> Result<bool, VmError> {
        Ok(is_true(&self.pop(offset)?))
    }

    fn push_bool(&mut self, value: bool) -> Result<(), VmError> {
        self.push(if value { vec![1] } else { Vec::new() })
    }

    fn check_multisig(&mut self, offset: usize) -> Result<bool, VmError> {
        let n = self.pop_int(offset)?;
        let m = self.pop_int(offset)?;
        if m == 0 || m > n || n > MAX_MULTISIG_KEYS {
            return Err(VmError::InvalidQuorum { m, n });
        }

        let mut keys = Vec::with_capacity(n);
        for _ in 0..n {
            keys.push(self.pop(offset)?);
        }
        keys.reverse();
        let message = self.pop(offset)?;
        let mut signatures = Vec::with_capacity(m);
        for _ in 0..m {
            signatures.push(self.pop(offset)?);
        }
        signatures.reverse();

        let mut key_iter = keys.iter();
        for (i, signature) in signatures.iter().enumerate() {
            let remaining_sigs = m - i;
            loop {
                if key_iter.len() < remaining_sigs {
                    return Ok(false);
                }
                let Some(key) = key_iter.next() else {
                    return Ok(false);
                };
                if verify(key, &message, signature) {
                    break;
                }
            }
        }
        Ok(true)
    }

    fn step(&mut self, program: &[u8], pc: usize) -> Result<usize, VmError> {
        let opcode = program[pc];
        let mut next = pc + 1;
        match opcode {
            OP_FALSE => self.push(Vec::new())?,
            OP_DATA_1..=OP_DATA_75 => {
                let data = read_push(program, next, opcode as usize, pc)?;
                next += data.len();
                self.push(data.to_vec())?;
            }
            OP_PUSHDATA1 => {
                let len = *program.get(next).ok_or(VmError::TruncatedPush { offset: pc })?;
                next += 1;
                let data = read_push(program, next, len as usize, pc)?;
                next += data.len();
                self.push(data.to_vec())?;
            }
            OP_PUSHDATA2 => {
                let len_bytes = program
                    .get(next..next + 2)
                    .ok_or(VmError::TruncatedPush { offset: pc })?;
                let len = u16::from_le_bytes([len_bytes[0], len_bytes[1]]) as usize;
                next += 2;
                let data = read_push(program, next, len, pc)?;
                next += data.len();
                self.push(data.to_vec())?;
            }
            OP_1..=OP_16 => self.push(vec![opcode - OP_1 + 1])?,
            OP_VERIFY => {
                if !self.pop_bool(pc)? {
                    return Err(VmError::VerifyFailed { offset: pc });
                }
            }
            OP_FAIL => return Err(VmError::Fail { offset: pc }),
            OP_DUP => {
                let top = self
                    .stack
                    .last()
                    .cloned()
                    .ok_or(VmError::StackUnderflow { offset: pc })?;
                self.push(top)?;
            }
            OP_SWAP => {
                let len = self.stack.len();
                if len < 2 {
                    return Err(VmError::StackUnderflow { offset: pc });
                }
                self.stack.swap(len - 1, len - 2);
            }
            OP_EQUAL | OP_EQUALVERIFY => {
                let a = self.pop(pc)?;
                let b = self.pop(pc)?;
                if opcode == OP_EQUAL {
                    self.push_bool(a == b)?;
                } else if a != b {
                    return Err(VmError::VerifyFailed { offset: pc });
                }
            }
            OP_HASH160 => {
                let item = self.pop(pc)?;
                self.push(pubkey_hash(&item).to_vec())?;
            }
            OP_CHECKSIG => {
                let public_key = self.pop(pc)?;
                let message = self.pop(pc)?;
                let signature = self.pop(pc)?;
                self.push_bool(verify(&public_key, &message, &signature))?;
            }
            OP_CHECKMULTISIG => {
                let ok = self.check_multisig(pc)?;
                self.push_bool(ok)?;
            }
            OP_TXSIGHASH => {
                let sig_hash = self.sig_hash.0.to_vec();
                self.push(sig_hash)?;
            }
            _ => return Err(VmError::UnknownOpcode { opcode, offset: pc }),
        }
        Ok(next)
    }
}

fn read_push(program: &[u8], start: usize, len: usize, offset: usize) -> Result<&[u8], VmError> {
    program
        .get(start..start + len)
        .ok_or(VmError::TruncatedPush { offset })
}

/// Any non-zero byte is true.
fn is_true(item: &[u8]) -> bool {
    item.iter().any(|b| *b != 0)
}

/// Runs `program` against the witness `arguments` and the input's
/// signature hash. `Ok(())` authorizes the spend.
pub fn verify_program(
    program: &[u8],
    arguments: &[Vec<u8>],
    sig_hash: &Hash,
) -> Result<(), VmError> {
    if arguments.len() > MAX_STACK_DEPTH {
        return Err(VmError::StackOverflow);
    }
    let mut machine = Machine {
        stack: arguments.to_vec(),
        sig_hash,
    };
    let mut pc = 0;
    while pc < program.len() {
        pc = machine.step(program, pc)?;
    }
    match machine.stack.last() {
        Some(top) if is_true(top) => Ok(()),
        _ => Err(VmError::FalseResult),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
