/*!
  Run-time fault kinds and their diagnostic category codes.

  Execution never unwinds through the run loop. Every instruction and
  interrupt handler returns `Result<(), Fault>`, and the run loop translates
  the fault into the three diagnostic registers before delivering the error
  interrupt. A faulted machine is terminal; there is no resumption.
*/

use thiserror::Error;

use crate::isa::Cell;

/// Everything that can abort an instruction mid-execution.
#[derive(Error, Clone, Copy, Eq, PartialEq, Debug)]
pub enum Fault {
  #[error("invalid register code {0}")]
  InvalidRegister(Cell),

  #[error("unknown opcode {0:#04X}")]
  InvalidOpcode(u8),

  /// An instruction cell whose value cannot be an opcode at all.
  #[error("malformed instruction cell {0}")]
  MalformedInstruction(Cell),

  #[error("memory address {0} out of range")]
  AddressOutOfRange(Cell),

  #[error("invalid branch target {0}")]
  InvalidBranchTarget(Cell),

  #[error("stack overflow")]
  StackOverflow,

  #[error("stack underflow")]
  StackUnderflow,

  #[error("division by zero")]
  DivisionByZero,

  #[error("unknown interrupt {0:#04X}")]
  UnknownInterrupt(Cell),

  #[error("invalid display mode {0}")]
  InvalidDisplayMode(Cell),

  #[error("pixel coordinates ({0}, {1}) out of bounds")]
  PixelOutOfBounds(Cell, Cell),

  #[error("invalid display resolution {0}x{1}")]
  InvalidResolution(Cell, Cell),

  #[error("cell value {0} is not a printable character")]
  InvalidCharacter(Cell),

  #[error("cell value {0} is not a byte")]
  InvalidByteValue(Cell),
}

impl Fault {
  /**
    The category code delivered in register A by the error interrupt:

      1 — value/semantic fault
      2 — malformed-instruction fault
      3 — stack fault
      4 — division fault
  */
  pub fn category(&self) -> Cell {
    match self {
      | Fault::InvalidRegister(_)
      | Fault::InvalidOpcode(_)
      | Fault::AddressOutOfRange(_)
      | Fault::InvalidBranchTarget(_)
      | Fault::UnknownInterrupt(_)
      | Fault::InvalidDisplayMode(_)
      | Fault::PixelOutOfBounds(..)
      | Fault::InvalidResolution(..)
      | Fault::InvalidCharacter(_)
      | Fault::InvalidByteValue(_) => 1,

      Fault::MalformedInstruction(_) => 2,

      Fault::StackOverflow | Fault::StackUnderflow => 3,

      Fault::DivisionByZero => 4,
    }
  }
}
