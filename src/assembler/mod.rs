/*!
  The two-pass assembler: source text in, address-resolved cell stream out.

  The pipeline is strict: the checker validates everything first, and the
  encoder runs only on the checker's verified intermediate form. Any operand
  the encoder cannot handle is therefore a defect in the assembler itself and
  aborts the assembly, never a partial byte stream.

  ```text
  text -> [parser::parse_source] -> SourceLines
       -> [checker::check]       -> CheckReport + CheckedProgram
       -> [encoder::encode]      -> Vec<Cell>
  ```
*/

pub mod checker;
pub mod diagnostics;
pub mod encoder;
pub mod labels;
pub mod parser;

use std::str::FromStr;

use thiserror::Error;

pub use checker::{CheckReport, CheckedProgram};
pub use diagnostics::{Diagnostic, Severity};
pub use encoder::EncodeError;
pub use labels::LabelTable;
pub use parser::{Line, SourceLine};

use crate::isa::{Cell, Opcode};

/// A successfully assembled program.
#[derive(Debug)]
pub struct Assembly {
  pub cells: Vec<Cell>,
  pub labels: LabelTable,
  /// Non-fatal diagnostics (warnings) from the checker.
  pub warnings: Vec<Diagnostic>,
  lines: Vec<SourceLine>,
}

#[derive(Error, Debug)]
pub enum AssembleError {
  /// The checker found errors; the encoder did not run.
  #[error("assembly rejected with {} error(s)", .0.error_count())]
  Rejected(CheckReport),
  /// The checker passed a defective operand through. A bug, not user error.
  #[error("assembler defect: {0}")]
  Defect(#[from] EncodeError),
}

/**
  Maps a mnemonic to its opcode. `HALT` has no mnemonic — the machine halts on
  a zero cell or via `INT 0xFF` — so writing it in source is not recognized.
*/
pub fn lookup_mnemonic(mnemonic: &str) -> Option<Opcode> {
  Opcode::from_str(mnemonic)
    .ok()
    .filter(|opcode| *opcode != Opcode::Halt)
}

/// Reads a numeric literal: `0x`-prefixed hexadecimal, or decimal.
pub fn parse_literal(text: &str) -> Option<Cell> {
  match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
    Some(hex) => Cell::from_str_radix(hex, 16).ok(),
    None => text.parse::<Cell>().ok(),
  }
}

/// Checks and encodes `source` in one call.
pub fn assemble(source: &str) -> Result<Assembly, AssembleError> {
  let lines = parser::parse_source(source);
  let (report, checked) = checker::check(lines);
  if report.has_errors() {
    return Err(AssembleError::Rejected(report));
  }
  let cells = encoder::encode(&checked)?;
  Ok(Assembly {
    cells,
    labels: checked.labels,
    warnings: report.diagnostics,
    lines: checked.lines,
  })
}

impl Assembly {
  /**
    A human-readable listing: one row per instruction with its address, the
    emitted cells, and the source text, label declarations interleaved.
  */
  pub fn listing(&self) -> String {
    let mut out = String::new();
    let mut offset = 0usize;
    for sl in &self.lines {
      match &sl.line {
        Line::Blank => {}

        Line::Label(name) => {
          out.push_str(&format!("{}:\n", labels::normalize(name)));
        }

        Line::Instruction { mnemonic, .. } => {
          let length = match lookup_mnemonic(mnemonic) {
            Some(opcode) => opcode.encoded_len(),
            None => continue,
          };
          let cells = &self.cells[offset..offset + length];
          let encoded = cells
            .iter()
            .map(|c| format!("{:02X}", c))
            .collect::<Vec<String>>()
            .join(" ");
          out.push_str(&format!(
            "  {:#04X}  {:<12}  {}\n",
            offset,
            encoded,
            sl.text.trim()
          ));
          offset += length;
        }
      }
    }
    out
  }
}
