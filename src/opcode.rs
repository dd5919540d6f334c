//! Opcode enumeration: the 21 wire opcodes plus the pseudo-opcodes the
//! optimizer introduces. See SPEC_FULL.md §4.2-§4.3 and §6.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // Wire opcodes, low-5-bits primary key in comment.
    Rda,  // 0x00
    Rmpa, // 0x01
    Wra,  // 0x02
    Wrap, // 0x03
    Rdax, // 0x04
    Rdfx, // 0x05
    Wrax, // 0x06
    Wrhx, // 0x07
    Wrlx, // 0x08
    Maxx, // 0x09
    Mulx, // 0x0A
    Log,  // 0x0B
    Exp,  // 0x0C
    Sof,  // 0x0D
    And,  // 0x0E
    Or,   // 0x0F
    Xor,  // 0x10
    Skp,  // 0x11
    Wlds, // 0x12 (bits 31..30 == 00)
    Wldr, // 0x12 (bits 31..30 == 01)
    Jam,  // 0x13
    ChoRda,  // 0x14 (bits 31..30 == 00)
    ChoSof,  // 0x14 (bits 31..30 == 10)
    ChoRdal, // 0x14 (bits 31..30 == 11)

    // Pseudo-opcodes introduced by the optimizer, §4.3.
    Ldax,
    Absa,
    Clr,
    Not,
    Nop,
    Jmp,
    ChoRdaSin,
    ChoRdaRmp,
    ChoSofSin,
    ChoSofRmp,

    /// Returned by the decoder when no table entry matches; the compiler
    /// rewrites this to `Nop` (§7: unknown opcode is never fatal).
    Unknown,
}
