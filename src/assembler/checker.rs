/*!
  Two-pass static validation of a parsed source program.

  The sizing pass computes instruction addresses and binds labels; the
  semantic pass validates every operand against the ISA table. Nothing here
  aborts early: every error in the program surfaces in one run. Label operands
  are deferred and resolved only after both passes, so a label may be
  referenced before its declaration.

  On success the checker hands the encoder a `CheckedProgram` — the parsed
  lines together with the label table the sizing pass built. The encoder never
  re-derives addresses from text, which is what makes checker and encoder
  agree cell-for-cell.
*/

use std::str::FromStr;

use crate::assembler::diagnostics::Diagnostic;
use crate::assembler::labels::LabelTable;
use crate::assembler::parser::{Line, SourceLine};
use crate::assembler::{lookup_mnemonic, parse_literal};
use crate::isa::{Cell, OperandKind, Opcode, Register, MEMORY_SIZE, STACK_ADVISORY_LIMIT};

/// The checker's verified intermediate form, consumed directly by the encoder.
#[derive(Debug)]
pub struct CheckedProgram {
  pub lines: Vec<SourceLine>,
  pub labels: LabelTable,
  /// Total encoded length in cells.
  pub program_len: usize,
}

/// Ordered errors and warnings from one checker run.
#[derive(Debug, Default)]
pub struct CheckReport {
  pub diagnostics: Vec<Diagnostic>,
}

impl CheckReport {
  pub fn has_errors(&self) -> bool {
    self.diagnostics.iter().any(Diagnostic::is_error)
  }

  pub fn error_count(&self) -> usize {
    self.diagnostics.iter().filter(|d| d.is_error()).count()
  }
}

/// Runs both passes over `lines` and resolves deferred label references.
pub fn check(lines: Vec<SourceLine>) -> (CheckReport, CheckedProgram) {
  let mut report = CheckReport::default();
  let mut labels = LabelTable::new();

  // Sizing pass: addresses accumulate in declaration order.
  let mut offset = 0usize;
  for sl in &lines {
    match &sl.line {
      Line::Blank => {}

      Line::Label(name) => {
        if !labels.bind(name, offset) {
          report.diagnostics.push(Diagnostic::warning(
            sl.number,
            format!("duplicate label '{}'", name),
            &sl.text,
          ));
        }
      }

      Line::Instruction { mnemonic, .. } => match lookup_mnemonic(mnemonic) {
        Some(opcode) => offset += opcode.encoded_len(),
        None => {
          report.diagnostics.push(Diagnostic::error(
            sl.number,
            format!("unknown instruction '{}'", mnemonic),
            &sl.text,
          ));
        }
      },
    }
  }
  let program_len = offset;

  // Semantic pass: operand kinds, address ranges, static stack balance.
  let mut stack_balance: i32 = 0;
  let mut label_refs: Vec<(usize, String, String)> = vec![];

  for sl in &lines {
    let (mnemonic, operands) = match &sl.line {
      Line::Instruction { mnemonic, operands } => (mnemonic, operands),
      _ => continue,
    };
    let opcode = match lookup_mnemonic(mnemonic) {
      Some(opcode) => opcode,
      None => continue, // already reported by the sizing pass
    };

    let signature = opcode.operands();
    if operands.len() != signature.len() {
      report.diagnostics.push(Diagnostic::error(
        sl.number,
        format!(
          "'{}' expects {} operand(s), found {}",
          mnemonic,
          signature.len(),
          operands.len()
        ),
        &sl.text,
      ));
      continue;
    }

    for (kind, operand) in signature.iter().zip(operands) {
      match kind {
        OperandKind::Reg => {
          if Register::from_str(operand).is_err() {
            report.diagnostics.push(Diagnostic::error(
              sl.number,
              format!("invalid register '{}'", operand),
              &sl.text,
            ));
          }
        }

        OperandKind::Imm => {
          if parse_literal(operand).is_none() {
            report.diagnostics.push(Diagnostic::error(
              sl.number,
              format!("invalid literal '{}'", operand),
              &sl.text,
            ));
          }
        }

        OperandKind::Addr => match parse_literal(operand) {
          None => {
            report.diagnostics.push(Diagnostic::error(
              sl.number,
              format!("invalid memory address '{}'", operand),
              &sl.text,
            ));
          }
          Some(address) => {
            // Program space is illegal as a write target; reads are fine.
            if opcode == Opcode::Str && address < program_len as Cell {
              report.diagnostics.push(Diagnostic::error(
                sl.number,
                "illegal memory write to program space",
                &sl.text,
              ));
            }
            if address < 0 || address > MEMORY_SIZE as Cell {
              report.diagnostics.push(Diagnostic::error(
                sl.number,
                "memory address out of bounds",
                &sl.text,
              ));
            }
          }
        },

        OperandKind::Label => {
          label_refs.push((sl.number, operand.clone(), sl.text.clone()));
        }
      }
    }

    match opcode {
      Opcode::Push => {
        stack_balance += 1;
        if stack_balance > STACK_ADVISORY_LIMIT {
          report.diagnostics.push(Diagnostic::warning(
            sl.number,
            "stack overflow detected",
            &sl.text,
          ));
        }
      }
      Opcode::Pop => {
        stack_balance -= 1;
        if stack_balance < 0 {
          report.diagnostics.push(Diagnostic::error(
            sl.number,
            "stack underflow detected",
            &sl.text,
          ));
        }
      }
      _ => {}
    }
  }

  // Deferred resolution: labels may be declared after their use sites.
  for (line, label, text) in label_refs {
    if !labels.contains(&label) {
      report.diagnostics.push(Diagnostic::error(
        line,
        format!("undefined label '{}'", label),
        &text,
      ));
    }
  }

  if stack_balance != 0 {
    report.diagnostics.push(Diagnostic::global_warning(
      "stack imbalance detected, unbalanced push/pop operations",
    ));
  }

  if program_len >= MEMORY_SIZE {
    report.diagnostics.push(Diagnostic::global_error(format!(
      "program too big, size: {}",
      program_len
    )));
  }

  log::debug!(
    "checked {} line(s): {} cell(s), {} label(s), {} error(s)",
    lines.len(),
    program_len,
    labels.len(),
    report.error_count()
  );

  (
    report,
    CheckedProgram {
      lines,
      labels,
      program_len,
    },
  )
}
