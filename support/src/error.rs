use crate::Range;
use serde::Serialize;
use std::fmt::{self, Display, Formatter};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// A listing the analysis cannot build a complete graph for. Fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct MalformedProgramError {
  pub range: Range,
  pub message: String,
}

impl MalformedProgramError {
  pub fn new(range: Range, message: impl Into<String>) -> Self {
    Self {
      range,
      message: message.into(),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum WarningKind {
  /// `JMP (vector)` and `JMP (table,X)`.
  IndirectJump,
  /// A target expression that cannot be evaluated, e.g. `L8F92+1`.
  ComputedTarget,
  /// A call whose target cannot be evaluated. The call is applied with the
  /// external summary.
  ComputedCall,
  /// Control leaves the listing through a jump or branch.
  ExternalTarget,
  /// Execution runs into data, a gap or the end of the listing.
  FallsThrough,
  /// A call whose return address holds no instruction (inline parameters).
  NoContinuation,
}

/// Control flow that could not be resolved statically. The affected block is
/// treated as having every register live on exit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpaqueControlFlowWarning {
  #[serde(skip)]
  pub range: Range,
  pub address: u16,
  pub kind: WarningKind,
  pub message: String,
}

impl Display for OpaqueControlFlowWarning {
  fn fmt(&self, f: &mut Formatter) -> fmt::Result {
    write!(f, "&{:04X}: {}", self.address, self.message)
  }
}

pub struct ErrorPrinter {
  path: PathBuf,
  line_offsets: Vec<usize>,
}

impl ErrorPrinter {
  pub fn new<P: AsRef<Path>, S: AsRef<str>>(file: P, input: S) -> Self {
    let line_offsets = Self::compute_line_offsets(input.as_ref());
    Self {
      path: file.as_ref().to_owned(),
      line_offsets,
    }
  }

  fn get_location(&self, position: usize) -> (usize, usize) {
    let mut low = 0;
    let mut high = self.line_offsets.len();
    while low < high {
      let mid = (low + high) / 2;
      let x = self.line_offsets[mid];
      if x > position {
        high = mid;
      } else {
        low = mid + 1;
      }
    }
    let line = low - 1;
    let offset = self.line_offsets[line];
    let column = position - offset;
    (line, column)
  }

  pub fn format(&self, severity: &str, range: Range, message: &str) -> String {
    let start = self.get_location(range.start);
    let end = self.get_location(if range.is_empty() {
      range.end
    } else {
      range.end - 1
    });
    format!(
      "{} at {}:{}:{}{}\n    {}",
      severity,
      self.path.display(),
      start.0 + 1,
      start.1 + 1,
      if end.0 == start.0 {
        format!(" - {}", end.1 + 2)
      } else {
        format!(" - {}:{}", end.0 + 1, end.1 + 2)
      },
      message
    )
  }

  pub fn print(&self, err: &MalformedProgramError) {
    eprintln!("{}", self.format("error", err.range, &err.message));
  }

  pub fn print_warning(&self, warning: &OpaqueControlFlowWarning) {
    eprintln!("{}", self.format("warning", warning.range, &warning.message));
  }

  fn compute_line_offsets(input: &str) -> Vec<usize> {
    let mut offset = 0;
    let mut offsets = vec![];
    for line in input.split('\n') {
      offsets.push(offset);
      offset += line.len() + 1;
    }
    offsets
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  #[test]
  fn line_offsets() {
    let printer = ErrorPrinter::new("foo", "abcde\nabc\n\nfoobar 1");
    assert_eq!(printer.line_offsets, vec![0, 6, 10, 11]);
  }

  #[test]
  fn location() {
    let printer = ErrorPrinter::new("foo", "abcde\nabc\n\nfoobar 1");
    assert_eq!(printer.get_location(3), (0, 3));
    assert_eq!(printer.get_location(10), (2, 0));
    assert_eq!(printer.get_location(11), (3, 0));
    assert_eq!(printer.get_location(12), (3, 1));
  }

  #[test]
  fn format_single_line() {
    let printer = ErrorPrinter::new("rom.asm", ".start\n    JSR nowhere\n");
    let err = MalformedProgramError::new(
      (15, 22).into(),
      "undefined label `nowhere`",
    );
    assert_eq!(
      printer.format("error", err.range, &err.message),
      "error at rom.asm:2:9 - 16\n    undefined label `nowhere`"
    );
  }

  #[test]
  fn format_multi_line() {
    let printer = ErrorPrinter::new("rom.asm", "ab\ncd\n");
    assert_eq!(
      printer.format("warning", (1, 5).into(), "falls into data"),
      "warning at rom.asm:1:2 - 2:3\n    falls into data"
    );
  }

  #[test]
  fn warning_display() {
    let warning = OpaqueControlFlowWarning {
      range: Range::default(),
      address: 0x8f9d,
      kind: WarningKind::IndirectJump,
      message: "indirect jump through `(&020E)`".to_owned(),
    };
    assert_eq!(
      warning.to_string(),
      "&8F9D: indirect jump through `(&020E)`"
    );
  }
}
