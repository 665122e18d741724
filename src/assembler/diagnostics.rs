/*!
  Checker diagnostics and their textual rendering.

  A diagnostic is tagged with the 1-based source line it came from, or line 0
  for program-global findings such as "program too big". Rendering follows the
  conventional `file:line: severity: message` shape, with the offending source
  line echoed underneath and a caret underline matching its length.
*/

use std::fmt::{Display, Formatter};

use strum_macros::Display as StrumDisplay;

#[derive(StrumDisplay, Clone, Copy, Eq, PartialEq, Debug)]
#[strum(serialize_all = "lowercase")]
pub enum Severity {
  Error,
  Warning,
}

#[derive(Clone, Eq, PartialEq, Debug)]
pub struct Diagnostic {
  /// 1-based source line, or 0 for a program-global diagnostic.
  pub line: usize,
  pub severity: Severity,
  pub message: String,
  /// The offending source line, verbatim. Empty for global diagnostics.
  pub source_text: String,
}

impl Diagnostic {
  pub fn error(line: usize, message: impl Into<String>, source_text: &str) -> Diagnostic {
    Diagnostic {
      line,
      severity: Severity::Error,
      message: message.into(),
      source_text: source_text.to_string(),
    }
  }

  pub fn warning(line: usize, message: impl Into<String>, source_text: &str) -> Diagnostic {
    Diagnostic {
      line,
      severity: Severity::Warning,
      message: message.into(),
      source_text: source_text.to_string(),
    }
  }

  pub fn global_error(message: impl Into<String>) -> Diagnostic {
    Diagnostic::error(0, message, "")
  }

  pub fn global_warning(message: impl Into<String>) -> Diagnostic {
    Diagnostic::warning(0, message, "")
  }

  pub fn is_error(&self) -> bool {
    self.severity == Severity::Error
  }

  /// Renders the diagnostic for the given file name.
  pub fn render(&self, filename: &str) -> String {
    match self.line {
      0 => format!("{}: {}: {}", filename, self.severity, self.message),
      line => {
        let text = self.source_text.trim_end();
        format!(
          "{}:{}: {}: {}\n   {} | {}\n     | {}",
          filename,
          line,
          self.severity,
          self.message,
          line,
          text,
          "^".repeat(text.len().max(1))
        )
      }
    }
  }
}

impl Display for Diagnostic {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    match self.line {
      0 => write!(f, "{}: {}", self.severity, self.message),
      line => write!(f, "{}: {}: {}", line, self.severity, self.message),
    }
  }
}
