//! Per-method bytecode facts.
//!
//! A method body is summarized rather than disassembled: the opcode stream plus the sets of
//! strings, fields and methods the instructions refer to. Decoding goes through a
//! [`CodeDecoder`] so the session can be driven by an instrumented backend in tests.

use std::collections::BTreeSet;

const OP_NOP: u8 = 0x00;
const OP_CONST_STRING: u8 = 0x1A;
const OP_CONST_STRING_JUMBO: u8 = 0x1B;
const OP_IGET_START: u8 = 0x52;
const OP_IGET_END: u8 = 0x58;
const OP_IPUT_START: u8 = 0x59;
const OP_IPUT_END: u8 = 0x5F;
const OP_SGET_START: u8 = 0x60;
const OP_SGET_END: u8 = 0x66;
const OP_SPUT_START: u8 = 0x67;
const OP_SPUT_END: u8 = 0x6D;
const OP_INVOKE_START: u8 = 0x6E;
const OP_INVOKE_END: u8 = 0x72;
const OP_INVOKE_RANGE_START: u8 = 0x74;
const OP_INVOKE_RANGE_END: u8 = 0x78;

const PACKED_SWITCH_PAYLOAD: u16 = 0x0100;
const SPARSE_SWITCH_PAYLOAD: u16 = 0x0200;
const FILL_ARRAY_DATA_PAYLOAD: u16 = 0x0300;

/// Instruction width in 16-bit code units, indexed by opcode.
pub const OPCODE_LEN: [u8; 256] = build_opcode_len();

const fn build_opcode_len() -> [u8; 256] {
    let mut table = [1u8; 256];
    let mut op = 0;
    while op < 256 {
        table[op] = match op as u8 {
            0x02 | 0x05 | 0x08 => 2,
            0x03 | 0x06 | 0x09 => 3,
            0x13 | 0x15 | 0x16 | 0x19 | 0x1A | 0x1C => 2,
            0x14 | 0x17 | 0x1B => 3,
            0x18 => 5,
            0x1F | 0x20 | 0x22 | 0x23 => 2,
            0x24..=0x26 => 3,
            0x29 => 2,
            0x2A..=0x2C => 3,
            0x2D..=0x3D => 2,
            0x44..=0x6D => 2,
            0x6E..=0x72 | 0x74..=0x78 => 3,
            0x90..=0xAF => 2,
            0xD0..=0xE2 => 2,
            0xFA | 0xFB => 4,
            0xFC | 0xFD => 3,
            0xFE | 0xFF => 2,
            _ => 1,
        };
        op += 1;
    }
    table
}

/// Facts collected from one method's instructions.
///
/// Index lists are sorted ascending and free of duplicates. `opcodes` holds one entry per
/// decoded instruction in stream order, payload pseudo-instructions included as `0x00`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MethodBody {
    /// String indices loaded by `const-string` and `const-string/jumbo`
    pub referred_strings: Vec<u32>,
    /// Method indices targeted by `invoke-*`
    pub invoked_methods: Vec<u32>,
    /// Field indices read by `iget*` and `sget*`
    pub accessed_fields: Vec<u32>,
    /// Field indices written by `iput*` and `sput*`
    pub assigned_fields: Vec<u32>,
    /// The opcode of every instruction
    pub opcodes: Vec<u8>,
}

/// Turns an instruction stream into a [`MethodBody`].
///
/// `insns` is the raw `insns` array of a `code_item`: little-endian 16-bit code units.
pub trait CodeDecoder: Send + Sync {
    /// Decode one method's instructions.
    fn decode(&self, insns: &[u8]) -> MethodBody;
}

/// The standard decoder for Dalvik bytecode.
///
/// Decoding is lenient: a truncated final instruction ends the scan without an error,
/// since the structural parse already bounds-checked the `insns` range.
#[derive(Debug, Default, Clone, Copy)]
pub struct DalvikDecoder;

impl CodeDecoder for DalvikDecoder {
    fn decode(&self, insns: &[u8]) -> MethodBody {
        let unit = |index: usize| -> Option<u16> {
            let at = index.checked_mul(2)?;
            let bytes = insns.get(at..at + 2)?;
            Some(u16::from_le_bytes([bytes[0], bytes[1]]))
        };
        let units = insns.len() / 2;

        let mut referred_strings = BTreeSet::new();
        let mut invoked_methods = BTreeSet::new();
        let mut accessed_fields = BTreeSet::new();
        let mut assigned_fields = BTreeSet::new();
        let mut opcodes = Vec::new();

        let mut pc = 0usize;
        while pc < units {
            let Some(inst) = unit(pc) else {
                break;
            };
            let opcode = (inst & 0xFF) as u8;
            opcodes.push(opcode);

            let operand = unit(pc + 1).map(u32::from);
            match opcode {
                OP_CONST_STRING => referred_strings.extend(operand),
                OP_CONST_STRING_JUMBO => {
                    if let (Some(low), Some(high)) = (unit(pc + 1), unit(pc + 2)) {
                        referred_strings.insert(u32::from(low) | (u32::from(high) << 16));
                    }
                }
                OP_IGET_START..=OP_IGET_END | OP_SGET_START..=OP_SGET_END => {
                    accessed_fields.extend(operand);
                }
                OP_IPUT_START..=OP_IPUT_END | OP_SPUT_START..=OP_SPUT_END => {
                    assigned_fields.extend(operand);
                }
                OP_INVOKE_START..=OP_INVOKE_END | OP_INVOKE_RANGE_START..=OP_INVOKE_RANGE_END => {
                    invoked_methods.extend(operand);
                }
                OP_NOP => pc += payload_skip(inst, pc, &unit),
                _ => {}
            }

            pc += usize::from(OPCODE_LEN[usize::from(opcode)]);
        }

        MethodBody {
            referred_strings: referred_strings.into_iter().collect(),
            invoked_methods: invoked_methods.into_iter().collect(),
            accessed_fields: accessed_fields.into_iter().collect(),
            assigned_fields: assigned_fields.into_iter().collect(),
            opcodes,
        }
    }
}

/// Code units a payload pseudo-instruction at `pc` occupies beyond the width of `nop`.
fn payload_skip(inst: u16, pc: usize, unit: &impl Fn(usize) -> Option<u16>) -> usize {
    let operand = |offset: usize| unit(pc + offset).map_or(0, usize::from);
    match inst {
        PACKED_SWITCH_PAYLOAD => operand(1) * 2 + 3,
        SPARSE_SWITCH_PAYLOAD => operand(1) * 4 + 1,
        FILL_ARRAY_DATA_PAYLOAD => {
            let width = operand(1);
            let count = operand(2) | (operand(3) << 16);
            count.saturating_mul(width).saturating_add(1) / 2 + 3
        }
        _ => 0,
    }
}
