/*!
  The line grammar of assembly source.

  Source is line oriented: `;` starts a comment running to the end of the
  line; a line whose stripped text ends in `:` declares a label; anything else
  is `MNEMONIC [operand[, operand]...]` with operands separated by whitespace,
  commas optional. Tokens are deliberately permissive (any run of
  non-separator characters) so that a garbled line still parses into tokens
  the checker can report on, rather than being dropped here.
*/

use nom::{
  bytes::complete::take_while1,
  character::complete::{char as one_char, space0},
  combinator::{all_consuming, map},
  multi::many0,
  sequence::{pair, preceded, terminated},
  IResult,
};

/// One classified source line, stripped of comments and surrounding whitespace.
#[derive(Clone, Eq, PartialEq, Debug)]
pub enum Line {
  Blank,
  /// A label declaration, colon removed, original spelling preserved.
  Label(String),
  Instruction {
    mnemonic: String,
    operands: Vec<String>,
  },
}

/// A classified line paired with its 1-based line number and original text.
#[derive(Clone, Debug)]
pub struct SourceLine {
  pub number: usize,
  pub text: String,
  pub line: Line,
}

fn token(input: &str) -> IResult<&str, &str> {
  take_while1(|c: char| !c.is_whitespace() && c != ',' && c != ':')(input)
}

fn separator(input: &str) -> IResult<&str, &str> {
  take_while1(|c: char| c == ' ' || c == '\t' || c == ',')(input)
}

fn label_line(input: &str) -> IResult<&str, Line> {
  map(
    all_consuming(terminated(token, preceded(space0, one_char(':')))),
    |name: &str| Line::Label(name.to_string()),
  )(input)
}

fn instruction_line(input: &str) -> IResult<&str, Line> {
  map(
    all_consuming(terminated(
      pair(token, many0(preceded(separator, token))),
      space0,
    )),
    |(mnemonic, operands): (&str, Vec<&str>)| Line::Instruction {
      mnemonic: mnemonic.to_string(),
      operands: operands.iter().map(|s| s.to_string()).collect(),
    },
  )(input)
}

/// Classifies a single raw source line.
pub fn parse_line(raw: &str) -> Line {
  let code = match raw.find(';') {
    Some(i) => &raw[..i],
    None => raw,
  };
  let code = code.trim();

  if code.is_empty() {
    return Line::Blank;
  }
  if let Ok((_, line)) = label_line(code) {
    return line;
  }
  match instruction_line(code) {
    Ok((_, line)) => line,
    // A line that is not even a token sequence (e.g. a stray colon mid-line).
    // Surface it as an instruction so the checker reports it as unknown.
    Err(_) => Line::Instruction {
      mnemonic: code.to_string(),
      operands: vec![],
    },
  }
}

/// Classifies every line of a source file, keeping numbers and original text.
pub fn parse_source(source: &str) -> Vec<SourceLine> {
  source
    .lines()
    .enumerate()
    .map(|(i, raw)| SourceLine {
      number: i + 1,
      text: raw.to_string(),
      line: parse_line(raw),
    })
    .collect()
}
