/*!
  The instruction set architecture shared by the assembler and the execution engine.

  Both consumers must agree bit-for-bit on instruction layout, so the opcode
  catalog lives here as compile-time data: each opcode knows its encoded length
  and its operand signature as pure functions of the enum variant. The checker,
  the encoder, and the fetch stage all read the same functions, which is what
  guarantees they never disagree on instruction sizes.

  A memory cell is an abstract integer, not a machine byte. Programs store
  24-bit color constants and multi-hundred pixel coordinates directly in one
  cell, so cells are deliberately not truncated to 8 bits.
*/

use std::convert::TryFrom;

use num_enum::{IntoPrimitive, TryFromPrimitive};
use strum_macros::{Display as StrumDisplay, EnumString, IntoStaticStr};

/// One addressable unit of memory or one stack slot.
pub type Cell = i64;

/// Total addressable memory, program space included.
pub const MEMORY_SIZE: usize = 256;
/// Call/data stack depth. SP starts here and grows downward.
pub const STACK_SIZE: usize = 32;
/// Static stack-balance depth past which the checker issues an advisory warning.
pub const STACK_ADVISORY_LIMIT: i32 = 16;
/// Number of general-purpose registers.
pub const REGISTER_COUNT: usize = 6;

/// The six named registers. The discriminant is the register's encoded cell value.
#[derive(
  StrumDisplay, IntoStaticStr, EnumString, TryFromPrimitive, IntoPrimitive,
  Clone,        Copy,          Eq, PartialEq, Debug,         Hash
)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
#[repr(u8)]
pub enum Register {
  A = 0x00,
  B = 0x01,
  C = 0x02,
  D = 0x03,
  E = 0x04,
  F = 0x05,
}

impl Register {
  pub fn code(&self) -> u8 {
    Into::<u8>::into(*self)
  }

  /// Decodes a register operand cell, rejecting anything outside A..F.
  pub fn from_cell(cell: Cell) -> Option<Register> {
    u8::try_from(cell).ok().and_then(|b| Register::try_from(b).ok())
  }
}

/// The kind of a single operand slot as the assembler sees it.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum OperandKind {
  /// One of the six register names.
  Reg,
  /// A numeric literal stored verbatim in one cell.
  Imm,
  /// A numeric literal used as a memory address.
  Addr,
  /// A symbolic label resolved to an absolute address.
  Label,
}

/**
  Opcodes of the virtual machine. The discriminant is the opcode's encoded
  value; 0x07 is reserved and intentionally absent, so decoding it fails.

  `Halt` carries no mnemonic in source programs: the assembler rejects it, and
  the machine halts when it fetches a zero cell (which is what freshly zeroed
  memory beyond the program looks like). Programs halt explicitly via `INT 0xFF`.
*/
#[derive(
  StrumDisplay, IntoStaticStr, EnumString, TryFromPrimitive, IntoPrimitive,
  Clone,        Copy,          Eq, PartialEq, Debug,         Hash
)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
#[repr(u8)]
pub enum Opcode {
  Halt = 0x00, // stop execution (implicit; no mnemonic)
  Ldw  = 0x01, // reg := imm
  Mov  = 0x02, // dst := src
  Add  = 0x03, // dst := dst + src
  Sub  = 0x04, // dst := dst - src
  Str  = 0x05, // memory[addr] := reg
  Ldr  = 0x06, // reg := memory[addr]
  // 0x07 reserved
  Bne  = 0x08, // branch if r1 != r2
  Beq  = 0x09, // branch if r1 == r2
  Int  = 0x0A, // software interrupt
  Push = 0x0B, // push reg
  Pop  = 0x0C, // pop into reg
  Jsr  = 0x0D, // push return address, jump
  Ret  = 0x0E, // pop into PC
  Xor  = 0x0F, // r1 := r1 xor r2
  And  = 0x10, // r1 := r1 and r2
  Jmp  = 0x11, // PC := label
  Mul  = 0x12, // r1 := r1 * r2
  Div  = 0x13, // r1 := r1 / r2 (true division)
  Blt  = 0x14, // branch if r1 < r2
}

/// Encoded length, in cells, assumed for a cell that does not decode to an opcode.
pub const DEFAULT_ENCODED_LEN: usize = 3;

impl Opcode {
  pub fn code(&self) -> u8 {
    Into::<u8>::into(*self)
  }

  /// Encoded length in cells. The branch class is 4 cells; everything else is 3.
  pub fn encoded_len(&self) -> usize {
    match self {
      Opcode::Bne | Opcode::Beq | Opcode::Blt => 4,
      _ => 3,
    }
  }

  /// The operand signature the assembler validates and encodes against.
  /// Slots beyond the signature, up to `encoded_len`, are zero padding.
  pub fn operands(&self) -> &'static [OperandKind] {
    use OperandKind::*;
    match self {
      Opcode::Halt | Opcode::Ret => &[],

      Opcode::Ldw => &[Reg, Imm],

      | Opcode::Mov | Opcode::Add | Opcode::Sub
      | Opcode::Xor | Opcode::And | Opcode::Mul | Opcode::Div => &[Reg, Reg],

      Opcode::Str | Opcode::Ldr => &[Reg, Addr],

      Opcode::Bne | Opcode::Beq | Opcode::Blt => &[Reg, Reg, Label],

      Opcode::Int => &[Imm],

      Opcode::Push | Opcode::Pop => &[Reg],

      Opcode::Jsr | Opcode::Jmp => &[Label],
    }
  }
}
