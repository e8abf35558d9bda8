//! Opcode table and control-program builders.

use crate::config::MAX_MULTISIG_KEYS;
use crate::crypto::hash::PUBKEY_HASH_LENGTH;

use super::VmError;

// ---------------------------------------------------------------------------
// Opcodes
// ---------------------------------------------------------------------------

pub const OP_FALSE: u8 = 0x00;
/// First direct push opcode: pushes the next byte.
pub const OP_DATA_1: u8 = 0x01;
/// Last direct push opcode: pushes the next 75 bytes.
pub const OP_DATA_75: u8 = 0x4b;
/// Pushes `n` bytes, `n` given by the next byte.
pub const OP_PUSHDATA1: u8 = 0x4c;
/// Pushes `n` bytes, `n` given by the next two bytes (little endian).
pub const OP_PUSHDATA2: u8 = 0x4d;
pub const OP_1: u8 = 0x51;
pub const OP_16: u8 = 0x60;
pub const OP_VERIFY: u8 = 0x69;
pub const OP_FAIL: u8 = 0x6a;
pub const OP_DUP: u8 = 0x76;
pub const OP_SWAP: u8 = 0x7c;
pub const OP_EQUAL: u8 = 0x87;
pub const OP_EQUALVERIFY: u8 = 0x88;
pub const OP_HASH160: u8 = 0xa9;
pub const OP_CHECKSIG: u8 = 0xac;
pub const OP_CHECKMULTISIG: u8 = 0xad;
pub const OP_TXSIGHASH: u8 = 0xae;

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

/// Appends the shortest push of `data`.
pub fn push_data(program: &mut Vec<u8>, data: &[u8]) {
    let len = data.len();
    if len == 0 {
        program.push(OP_FALSE);
    } else if len <= OP_DATA_75 as usize {
        program.push(len as u8);
    } else if len <= u8::MAX as usize {
        program.push(OP_PUSHDATA1);
        program.push(len as u8);
    } else {
        program.push(OP_PUSHDATA2);
        program.extend_from_slice(&(len as u16).to_le_bytes());
    }
    program.extend_from_slice(data);
}

/// Appends a small integer: `OP_FALSE`, `OP_1..OP_16`, or its minimal
/// little-endian bytes as a data push.
pub fn push_int(program: &mut Vec<u8>, n: u64) {
    match n {
        0 => program.push(OP_FALSE),
        1..=16 => program.push(OP_1 + (n as u8) - 1),
        _ => push_data(program, &int_bytes(n)),
    }
}

/// Minimal little-endian encoding of `n`; empty for zero.
pub(crate) fn int_bytes(n: u64) -> Vec<u8> {
    let bytes = n.to_le_bytes();
    let used = 8 - (n.leading_zeros() as usize / 8);
    bytes[..used].to_vec()
}

/// `DUP HASH160 <hash> EQUALVERIFY TXSIGHASH SWAP CHECKSIG`
///
/// Satisfied by the witness `[signature, public key]` where the public key
/// hashes to `hash`.
pub fn p2pkh_program(hash: &[u8; PUBKEY_HASH_LENGTH]) -> Vec<u8> {
    let mut program = Vec::with_capacity(PUBKEY_HASH_LENGTH + 7);
    program.push(OP_DUP);
    program.push(OP_HASH160);
    push_data(&mut program, hash);
    program.push(OP_EQUALVERIFY);
    program.push(OP_TXSIGHASH);
    program.push(OP_SWAP);
    program.push(OP_CHECKSIG);
    program
}

/// `TXSIGHASH <pk_1> ... <pk_N> <M> <N> CHECKMULTISIG`
///
/// Satisfied by `M` signatures ordered the same way as their keys.
pub fn multisig_program(public_keys: &[[u8; 32]], quorum: usize) -> Result<Vec<u8>, VmError> {
    let n = public_keys.len();
    if quorum == 0 || quorum > n || n > MAX_MULTISIG_KEYS {
        return Err(VmError::InvalidQuorum { m: quorum, n });
    }
    let mut program = Vec::with_capacity(n * 33 + 4);
    program.push(OP_TXSIGHASH);
    for key in public_keys {
        push_data(&mut program, key);
    }
    push_int(&mut program, quorum as u64);
    push_int(&mut program, n as u64);
    program.push(OP_CHECKMULTISIG);
    Ok(program)
}

/// The pubkey hash committed to by a pay-to-pubkey-hash program, if
/// `program` has exactly that shape.
pub fn parse_p2pkh(program: &[u8]) -> Option<[u8; PUBKEY_HASH_LENGTH]> {
    let len = PUBKEY_HASH_LENGTH;
    let expected_len = len + 7;
    if program.len() != expected_len
        || program[0] != OP_DUP
        || program[1] != OP_HASH160
        || program[2] != len as u8
        || program[len + 3..] != [OP_EQUALVERIFY, OP_TXSIGHASH, OP_SWAP, OP_CHECKSIG]
    {
        return None;
    }
    let mut hash = [0u8; PUBKEY_HASH_LENGTH];
    hash.copy_from_slice(&program[3..3 + len]);
    Some(hash)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
