/*!
  Final code generation over a checker-verified program.

  The encoder runs only on a `CheckedProgram`, so every address it resolves is
  the address the sizing pass computed. Operand failures here mean the checker
  has a hole in it; they abort the whole assembly with a fatal error rather
  than emitting a partial, misaligned instruction.
*/

use std::str::FromStr;

use thiserror::Error;

use crate::assembler::checker::CheckedProgram;
use crate::assembler::parser::Line;
use crate::assembler::{lookup_mnemonic, parse_literal};
use crate::isa::{Cell, OperandKind, Register};

/// An operand defect that slipped past the checker. Always a bug, never user error.
#[derive(Error, Clone, Eq, PartialEq, Debug)]
pub enum EncodeError {
  #[error("line {line}: unknown instruction '{mnemonic}' reached the encoder")]
  UnknownInstruction { line: usize, mnemonic: String },

  #[error("line {line}: '{mnemonic}' expects {expected} operand(s), found {found}")]
  ArityMismatch {
    line: usize,
    mnemonic: String,
    expected: usize,
    found: usize,
  },

  #[error("line {line}: invalid register '{operand}'")]
  InvalidRegister { line: usize, operand: String },

  #[error("line {line}: invalid literal '{operand}'")]
  InvalidLiteral { line: usize, operand: String },

  #[error("line {line}: undefined label '{operand}'")]
  UndefinedLabel { line: usize, operand: String },
}

/// Emits the final cell stream for a verified program.
pub fn encode(checked: &CheckedProgram) -> Result<Vec<Cell>, EncodeError> {
  let mut output: Vec<Cell> = Vec::with_capacity(checked.program_len);

  for sl in &checked.lines {
    let (mnemonic, operands) = match &sl.line {
      Line::Instruction { mnemonic, operands } => (mnemonic, operands),
      _ => continue,
    };

    let opcode = lookup_mnemonic(mnemonic).ok_or_else(|| EncodeError::UnknownInstruction {
      line: sl.number,
      mnemonic: mnemonic.clone(),
    })?;

    let signature = opcode.operands();
    if operands.len() != signature.len() {
      return Err(EncodeError::ArityMismatch {
        line: sl.number,
        mnemonic: mnemonic.clone(),
        expected: signature.len(),
        found: operands.len(),
      });
    }

    output.push(opcode.code() as Cell);
    for (kind, operand) in signature.iter().zip(operands) {
      let cell = match kind {
        OperandKind::Reg => {
          let register =
            Register::from_str(operand).map_err(|_| EncodeError::InvalidRegister {
              line: sl.number,
              operand: operand.clone(),
            })?;
          register.code() as Cell
        }

        OperandKind::Imm | OperandKind::Addr => {
          parse_literal(operand).ok_or_else(|| EncodeError::InvalidLiteral {
            line: sl.number,
            operand: operand.clone(),
          })?
        }

        OperandKind::Label => {
          let address =
            checked
              .labels
              .address_of(operand)
              .ok_or_else(|| EncodeError::UndefinedLabel {
                line: sl.number,
                operand: operand.clone(),
              })?;
          address as Cell
        }
      };
      output.push(cell);
    }

    // Fixed-length instructions with fewer semantic operands than slots.
    let emitted = 1 + signature.len();
    for _ in emitted..opcode.encoded_len() {
      output.push(0);
    }
  }

  debug_assert_eq!(output.len(), checked.program_len);
  log::debug!("encoded {} cell(s)", output.len());
  Ok(output)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::assembler::checker::check;
  use crate::assembler::parser::parse_source;

  fn encode_source(source: &str) -> Vec<Cell> {
    let (report, checked) = check(parse_source(source));
    assert!(!report.has_errors(), "{:?}", report.diagnostics);
    encode(&checked).expect("encode")
  }

  #[test]
  fn three_cell_instructions_encode_opcode_and_operands() {
    assert_eq!(encode_source("ldw a, 5\n"), vec![0x01, 0x00, 5]);
    assert_eq!(encode_source("mov f, b\n"), vec![0x02, 0x05, 0x01]);
    assert_eq!(encode_source("div c, d\n"), vec![0x13, 0x02, 0x03]);
  }

  #[test]
  fn literals_accept_hex_and_decimal() {
    assert_eq!(encode_source("ldw a, 0x10\n"), vec![0x01, 0x00, 16]);
    assert_eq!(encode_source("ldw a, 16\n"), vec![0x01, 0x00, 16]);
    assert_eq!(
      encode_source("ldw b, 0xFFFFFF\n"),
      vec![0x01, 0x01, 0xFFFFFF]
    );
  }

  #[test]
  fn short_instructions_are_zero_padded_to_length() {
    assert_eq!(encode_source("push a\n"), vec![0x0B, 0x00, 0]);
    assert_eq!(encode_source("ret\n"), vec![0x0E, 0, 0]);
    assert_eq!(encode_source("int 0xFF\n"), vec![0x0A, 0xFF, 0]);
  }

  #[test]
  fn branches_encode_four_cells_with_resolved_target() {
    let cells = encode_source("loop:\nbeq a, b, loop\n");
    assert_eq!(cells, vec![0x09, 0x00, 0x01, 0]);
  }

  #[test]
  fn forward_label_references_resolve() {
    let cells = encode_source("jmp done\nldw a, 1\ndone:\nint 0xFF\n");
    assert_eq!(cells[0], 0x11);
    assert_eq!(cells[1], 6); // address of `done`
    assert_eq!(cells[2], 0); // padding
  }

  #[test]
  fn encoded_length_matches_the_sizing_pass() {
    let source = "start:\nldw a, 0\nloop:\nadd a, b\nblt a, c, loop\njsr sub1\njmp start\nsub1:\nret\n";
    let (report, checked) = check(parse_source(source));
    assert!(!report.has_errors());
    let cells = encode(&checked).unwrap();
    assert_eq!(cells.len(), checked.program_len);
  }

  #[test]
  fn checker_and_encoder_agree_on_label_addresses() {
    let source = "ldw a, 1\nmid:\nbeq a, b, end\njmp mid\nend:\nint 0xFF\n";
    let (report, checked) = check(parse_source(source));
    assert!(!report.has_errors());
    let cells = encode(&checked).unwrap();
    // The beq target cell holds what the sizing pass bound for `end`.
    assert_eq!(cells[6], checked.labels.address_of("end").unwrap() as Cell);
    // The jmp target cell holds what the sizing pass bound for `mid`.
    assert_eq!(cells[8], checked.labels.address_of("mid").unwrap() as Cell);
  }

  #[test]
  fn defects_abort_instead_of_emitting_partial_code() {
    // Hand-build a "checked" program the checker would never approve.
    let lines = parse_source("ldw q, 1\n");
    let checked = CheckedProgram {
      lines,
      labels: crate::assembler::labels::LabelTable::new(),
      program_len: 3,
    };
    let err = encode(&checked).unwrap_err();
    assert!(matches!(err, EncodeError::InvalidRegister { line: 1, .. }));
  }
}
