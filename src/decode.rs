//! Instruction decoder: maps a 32-bit FV-1 word to a `DecodedInstruction`.
//! See SPEC_FULL.md §4.2 and §6 (opcode wire format table).
//!
//! The table is data-driven from the same bit-pattern strings the SPIN
//! assembler manual uses (`"CCCCCCCCCCCAAAAAAAAAAAAAAAA00000"` and so on),
//! mirroring `examples/original_source/src/fv1/fv1_asm_decode.cc`. Building
//! the table is the one place this crate can fail (§7): a malformed pattern
//! string is a programmer error in this crate, not a property of any
//! particular program word.

use std::sync::OnceLock;

use thiserror::Error;

use crate::fixed::{I16, S1F14, S1F9, SF10};
use crate::opcode::Opcode;
use crate::operand::Operand;

const PRIMARY_KEY_MASK: u32 = 0x0000_001f;
const SECONDARY_KEY_MASK: u32 = 0xc000_0000;
const NUM_PRIMARY_SLOTS: usize = 32;
const MAX_OPERANDS: usize = 3;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeTableError {
    #[error("opcode {opcode:?} field '{letter}' has width {actual}, expected {expected}")]
    OperandWidthMismatch {
        opcode: Opcode,
        letter: char,
        expected: u32,
        actual: u32,
    },
    #[error("opcode {opcode:?} field '{letter}' is missing from its pattern string")]
    MissingField { opcode: Opcode, letter: char },
    #[error("opcode {opcode:?} pattern does not fully specify its 5-bit primary key")]
    IncompletePrimaryKey { opcode: Opcode },
    #[error("opcode {opcode:?} pattern is not 32 characters long")]
    BadPatternLength { opcode: Opcode },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BitField {
    width: u32,
    shift: u32,
}

impl BitField {
    fn from_pattern(pattern: &str, letter: char) -> Option<BitField> {
        let first = pattern.find(letter)?;
        let last = pattern.rfind(letter)?;
        let width = (last - first + 1) as u32;
        let shift = (pattern.len() - 1 - last) as u32;
        Some(BitField { width, shift })
    }

    fn read(self, value: u32) -> u32 {
        (value >> self.shift) & ((1u32 << self.width) - 1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OperandKind {
    Int,
    Mask,
    Register,
    Addr,
    Real(RealFormat),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RealFormat {
    S1F9,
    S1F14,
    Sf10,
    I16,
}

impl RealFormat {
    fn bits(self) -> u32 {
        match self {
            RealFormat::S1F9 => S1F9::BITS,
            RealFormat::S1F14 => S1F14::BITS,
            RealFormat::Sf10 => SF10::BITS,
            RealFormat::I16 => I16::BITS,
        }
    }

    fn decode_to_sf23_raw(self, raw: u32) -> i32 {
        let raw = raw as i32;
        match self {
            RealFormat::S1F9 => S1F9::from_raw(raw).to_sf23().raw(),
            RealFormat::S1F14 => S1F14::from_raw(raw).to_sf23().raw(),
            RealFormat::Sf10 => SF10::from_raw(raw).to_sf23().raw(),
            RealFormat::I16 => I16::from_raw(raw).to_sf23().raw(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct OperandSpec {
    letter: char,
    kind: OperandKind,
    expected_width: u32,
}

struct InstructionEntry {
    opcode: Opcode,
    mask: u32,
    pattern: u32,
    operands: Vec<OperandSpec>,
}

impl InstructionEntry {
    fn primary_key(&self) -> u32 {
        self.pattern & PRIMARY_KEY_MASK
    }

    fn secondary_key(&self) -> u32 {
        self.pattern >> 30
    }

    fn has_secondary(&self) -> bool {
        self.mask & SECONDARY_KEY_MASK != 0
    }

    fn matches(&self, word: u32) -> bool {
        (word & self.mask) & (PRIMARY_KEY_MASK | SECONDARY_KEY_MASK)
            == self.pattern & (PRIMARY_KEY_MASK | SECONDARY_KEY_MASK)
    }

    fn decode(&self, word: u32, bitfields: &[BitField]) -> DecodedInstruction {
        let mut operands = [Operand::None; MAX_OPERANDS];
        for (i, (spec, field)) in self.operands.iter().zip(bitfields.iter()).enumerate() {
            let raw = field.read(word);
            operands[i] = match spec.kind {
                OperandKind::Int => Operand::Value(raw as i32),
                OperandKind::Mask => Operand::Mask(raw as i32),
                OperandKind::Register => Operand::Register(raw as usize),
                OperandKind::Addr => Operand::Addr(raw as i32),
                OperandKind::Real(format) => {
                    Operand::Real(crate::fixed::SF23::new_saturating(
                        format.decode_to_sf23_raw(raw),
                    ))
                }
            };
        }
        DecodedInstruction {
            opcode: self.opcode,
            raw: word,
            operands,
            num_operands: self.operands.len(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DecodedInstruction {
    pub opcode: Opcode,
    pub raw: u32,
    pub operands: [Operand; MAX_OPERANDS],
    pub num_operands: usize,
}

impl DecodedInstruction {
    pub fn unknown(raw: u32) -> Self {
        DecodedInstruction {
            opcode: Opcode::Unknown,
            raw,
            operands: [Operand::None; MAX_OPERANDS],
            num_operands: 0,
        }
    }
}

struct BuiltEntry {
    entry: InstructionEntry,
    bitfields: Vec<BitField>,
}

pub struct DecodeTable {
    primary: Vec<Option<BuiltEntry>>,
    secondary: Vec<BuiltEntry>,
}

fn compute_matcher(opcode: Opcode, pattern: &str) -> Result<(u32, u32), DecodeTableError> {
    if pattern.len() != 32 {
        return Err(DecodeTableError::BadPatternLength { opcode });
    }
    let mut mask = 0u32;
    let mut value = 0u32;
    let mut bit = 0x8000_0000u32;
    for c in pattern.chars() {
        match c {
            '1' => {
                value |= bit;
                mask |= bit;
            }
            '0' => {
                mask |= bit;
            }
            _ => {}
        }
        bit >>= 1;
    }
    mask &= PRIMARY_KEY_MASK | SECONDARY_KEY_MASK;
    value &= PRIMARY_KEY_MASK | SECONDARY_KEY_MASK;
    if mask & PRIMARY_KEY_MASK != PRIMARY_KEY_MASK {
        return Err(DecodeTableError::IncompletePrimaryKey { opcode });
    }
    Ok((mask, value))
}

fn build_bitfields(
    opcode: Opcode,
    pattern: &str,
    operands: &[OperandSpec],
) -> Result<Vec<BitField>, DecodeTableError> {
    let mut out = Vec::with_capacity(operands.len());
    for spec in operands {
        let field = BitField::from_pattern(pattern, spec.letter)
            .ok_or(DecodeTableError::MissingField {
                opcode,
                letter: spec.letter,
            })?;
        if field.width != spec.expected_width {
            return Err(DecodeTableError::OperandWidthMismatch {
                opcode,
                letter: spec.letter,
                expected: spec.expected_width,
                actual: field.width,
            });
        }
        out.push(field);
    }
    Ok(out)
}

macro_rules! spec {
    ($letter:expr, Int, $width:expr) => {
        OperandSpec {
            letter: $letter,
            kind: OperandKind::Int,
            expected_width: $width,
        }
    };
    ($letter:expr, Mask, $width:expr) => {
        OperandSpec {
            letter: $letter,
            kind: OperandKind::Mask,
            expected_width: $width,
        }
    };
    ($letter:expr, Register) => {
        OperandSpec {
            letter: $letter,
            kind: OperandKind::Register,
            expected_width: 6,
        }
    };
    ($letter:expr, Addr) => {
        OperandSpec {
            letter: $letter,
            kind: OperandKind::Addr,
            expected_width: 16,
        }
    };
    ($letter:expr, Real, $fmt:expr) => {
        OperandSpec {
            letter: $letter,
            kind: OperandKind::Real($fmt),
            expected_width: $fmt.bits(),
        }
    };
}

fn raw_instructions() -> Vec<(Opcode, &'static str, Vec<OperandSpec>)> {
    use RealFormat::*;
    vec![
        (
            Opcode::Rda,
            "CCCCCCCCCCCAAAAAAAAAAAAAAAA00000",
            vec![spec!('A', Addr), spec!('C', Real, S1F9)],
        ),
        (
            Opcode::Rmpa,
            "CCCCCCCCCCC000000000001100000001",
            vec![spec!('C', Real, S1F9)],
        ),
        (
            Opcode::Wra,
            "CCCCCCCCCCCAAAAAAAAAAAAAAAA00010",
            vec![spec!('A', Addr), spec!('C', Real, S1F9)],
        ),
        (
            Opcode::Wrap,
            "CCCCCCCCCCCAAAAAAAAAAAAAAAA00011",
            vec![spec!('A', Addr), spec!('C', Real, S1F9)],
        ),
        (
            Opcode::Rdax,
            "CCCCCCCCCCCCCCCC00000AAAAAA00100",
            vec![spec!('A', Register), spec!('C', Real, S1F14)],
        ),
        (
            Opcode::Rdfx,
            "CCCCCCCCCCCCCCCC00000AAAAAA00101",
            vec![spec!('A', Register), spec!('C', Real, S1F14)],
        ),
        (
            Opcode::Wrax,
            "CCCCCCCCCCCCCCCC00000AAAAAA00110",
            vec![spec!('A', Register), spec!('C', Real, S1F14)],
        ),
        (
            Opcode::Wrhx,
            "CCCCCCCCCCCCCCCC00000AAAAAA00111",
            vec![spec!('A', Register), spec!('C', Real, S1F14)],
        ),
        (
            Opcode::Wrlx,
            "CCCCCCCCCCCCCCCC00000AAAAAA01000",
            vec![spec!('A', Register), spec!('C', Real, S1F14)],
        ),
        (
            Opcode::Maxx,
            "CCCCCCCCCCCCCCCC00000AAAAAA01001",
            vec![spec!('A', Register), spec!('C', Real, S1F14)],
        ),
        (
            Opcode::Mulx,
            "000000000000000000000AAAAAA01010",
            vec![spec!('A', Register)],
        ),
        (
            Opcode::Log,
            "CCCCCCCCCCCCCCCCDDDDDDDDDDD01011",
            vec![spec!('C', Real, S1F14), spec!('D', Real, Sf10)],
        ),
        (
            Opcode::Exp,
            "CCCCCCCCCCCCCCCCDDDDDDDDDDD01100",
            vec![spec!('C', Real, S1F14), spec!('D', Real, Sf10)],
        ),
        (
            Opcode::Sof,
            "CCCCCCCCCCCCCCCCDDDDDDDDDDD01101",
            vec![spec!('C', Real, S1F14), spec!('D', Real, Sf10)],
        ),
        (
            Opcode::And,
            "MMMMMMMMMMMMMMMMMMMMMMMM00001110",
            vec![spec!('M', Mask, 24)],
        ),
        (
            Opcode::Or,
            "MMMMMMMMMMMMMMMMMMMMMMMM00001111",
            vec![spec!('M', Mask, 24)],
        ),
        (
            Opcode::Xor,
            "MMMMMMMMMMMMMMMMMMMMMMMM00010000",
            vec![spec!('M', Mask, 24)],
        ),
        (
            Opcode::Skp,
            "CCCCCNNNNNN000000000000000010001",
            vec![spec!('C', Mask, 5), spec!('N', Int, 6)],
        ),
        (
            Opcode::Wlds,
            "00NFFFFFFFFFAAAAAAAAAAAAAAA10010",
            vec![
                spec!('N', Int, 1),
                spec!('F', Int, 9),
                spec!('A', Int, 15),
            ],
        ),
        (
            Opcode::Wldr,
            "01NFFFFFFFFFFFFFFFF000000AA10010",
            vec![spec!('N', Int, 1), spec!('F', Real, I16), spec!('A', Int, 2)],
        ),
        (Opcode::Jam, "0000000000000000000000001N010011", vec![spec!('N', Int, 1)]),
        (
            Opcode::ChoRda,
            "00CCCCCC0NNAAAAAAAAAAAAAAAA10100",
            vec![spec!('N', Int, 2), spec!('C', Int, 6), spec!('A', Addr)],
        ),
        (
            Opcode::ChoSof,
            "10CCCCCC0NNDDDDDDDDDDDDDDDD10100",
            vec![spec!('N', Int, 2), spec!('C', Int, 6), spec!('D', Real, I16)],
        ),
        (
            Opcode::ChoRdal,
            "11CCCCCC0NN000000000000000010100",
            vec![spec!('N', Int, 2), spec!('C', Int, 6)],
        ),
    ]
}

fn build_table() -> Result<DecodeTable, DecodeTableError> {
    let mut primary: Vec<Option<BuiltEntry>> = (0..NUM_PRIMARY_SLOTS).map(|_| None).collect();
    let mut secondary = Vec::new();

    for (opcode, pattern, operands) in raw_instructions() {
        let (mask, value) = compute_matcher(opcode, pattern)?;
        let bitfields = build_bitfields(opcode, pattern, &operands)?;
        let entry = InstructionEntry {
            opcode,
            mask,
            pattern: value,
            operands,
        };
        let built = BuiltEntry { entry, bitfields };
        if built.entry.secondary_key() != 0 {
            secondary.push(built);
        } else {
            let slot = built.entry.primary_key() as usize;
            primary[slot] = Some(built);
        }
    }

    Ok(DecodeTable { primary, secondary })
}

static TABLE: OnceLock<DecodeTable> = OnceLock::new();

fn table() -> &'static DecodeTable {
    TABLE.get_or_init(|| build_table().expect("FV-1 decode table is internally consistent"))
}

/// Decodes a single 32-bit FV-1 instruction word, §4.2.
pub fn decode(word: u32) -> DecodedInstruction {
    let table = table();
    let key = (word & PRIMARY_KEY_MASK) as usize;
    if let Some(built) = &table.primary[key] {
        if !built.entry.has_secondary() || built.entry.matches(word) {
            return built.entry.decode(word, &built.bitfields);
        }
    }
    for built in &table.secondary {
        if built.entry.matches(word) {
            return built.entry.decode(word, &built.bitfields);
        }
    }
    DecodedInstruction::unknown(word)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_builds_without_error() {
        assert!(build_table().is_ok());
    }

    #[test]
    fn zero_word_decodes_as_rda_with_zero_operands() {
        let inst = decode(0);
        assert_eq!(inst.opcode, Opcode::Rda);
        assert_eq!(inst.operands[0].as_raw(), 0);
    }

    #[test]
    fn wlds_and_wldr_share_primary_key_but_decode_distinctly() {
        // WLDS: top bits 00, primary key 0x12.
        let wlds_word = 0x12u32;
        assert_eq!(decode(wlds_word).opcode, Opcode::Wlds);

        // WLDR: top bits 01.
        let wldr_word = 0x4000_0012u32;
        assert_eq!(decode(wldr_word).opcode, Opcode::Wldr);
    }

    #[test]
    fn cho_variants_share_primary_key_but_decode_distinctly() {
        assert_eq!(decode(0x14).opcode, Opcode::ChoRda);
        assert_eq!(decode(0x8000_0014).opcode, Opcode::ChoSof);
        assert_eq!(decode(0xC000_0014).opcode, Opcode::ChoRdal);
    }

    #[test]
    fn unrecognized_word_is_unknown() {
        // low 5 bits = 0x1f is not a valid primary key in the table.
        assert_eq!(decode(0x1f).opcode, Opcode::Unknown);
    }

    #[test]
    fn skp_operand_order_is_flags_then_offset() {
        // SKP CCCCC NNNNNN ... 10001: flags=0b10101 (0x15), offset=5.
        let word = (0x15u32 << 27) | (5u32 << 21) | 0b10001;
        let inst = decode(word);
        assert_eq!(inst.opcode, Opcode::Skp);
        assert_eq!(inst.operands[0].as_raw(), 0x15);
        assert_eq!(inst.operands[1].as_raw(), 5);
    }
}
