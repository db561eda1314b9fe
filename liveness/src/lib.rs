use asm::{Program, Reg, RegSet};
use control::Cfg;
use enum_iterator::IntoEnumIterator;
use indexmap::IndexMap;
use log::info;
use serde::Serialize;
use support::{MalformedProgramError, OpaqueControlFlowWarning, WritePretty};

pub mod pass;

pub use pass::liveness_analysis::Liveness;
pub use pass::report::{
  EntryReport, ExternalCall, LiveCaller, Reader, RegisterReport, Report,
};

pub type Result<T> = std::result::Result<T, MalformedProgramError>;

/// What a call does to the caller's registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Summary {
  /// Read before being written on some path from the entry.
  pub uses: RegSet,
  /// Written on every path from the entry to a return.
  pub kills: RegSet,
}

#[derive(Debug, Clone)]
pub struct Options {
  /// Registers the report covers.
  pub regs: Vec<Reg>,
  /// Live after a return in code that is not called from the listing.
  pub root_live: RegSet,
  /// Assumed for calls that leave the listing or whose target cannot be
  /// evaluated.
  pub external: Summary,
}

impl Default for Options {
  fn default() -> Self {
    Self {
      regs: Reg::into_enum_iter().collect(),
      root_live: RegSet::new(),
      external: Summary {
        uses: RegSet::all(),
        kills: RegSet::new(),
      },
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
  Text,
  Json,
}

/// One analysed listing. Everything is computed up front and read-only
/// afterwards; a changed listing needs a new `Analysis`.
pub struct Analysis {
  pub program: Program,
  pub cfg: Cfg,
  pub summaries: IndexMap<u16, Summary>,
  pub liveness: Liveness,
  pub options: Options,
}

impl Analysis {
  pub fn from_source(input: &str, options: Options) -> Result<Self> {
    let program = asm::parse(input)?;
    Self::new(program, options)
  }

  pub fn new(program: Program, options: Options) -> Result<Self> {
    let cfg = control::build_cfg(&program)?;
    let summaries = pass::summary::compute_summaries(&cfg, &options);
    let liveness =
      pass::liveness_analysis::analyze_liveness(&cfg, &summaries, &options);
    info!(
      "analysed {} instructions in {} blocks, {} called routines",
      program.instrs.len(),
      cfg.blocks.len(),
      summaries.len()
    );
    Ok(Self {
      program,
      cfg,
      summaries,
      liveness,
      options,
    })
  }

  pub fn warnings(&self) -> &[OpaqueControlFlowWarning] {
    &self.cfg.warnings
  }
}

/// Analyses `input` and renders the report on `targets` (every called
/// routine when empty), together with the warnings raised on the way.
pub fn analyze<S: AsRef<str>>(
  input: &str,
  options: &Options,
  targets: &[S],
  format: Format,
) -> Result<(String, Vec<OpaqueControlFlowWarning>)> {
  let analysis = Analysis::from_source(input, options.clone())?;
  let report = analysis.report(targets)?;
  let output = match format {
    Format::Text => report.to_string_pretty(),
    Format::Json => report.to_json(),
  };
  Ok((output, report.warnings))
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  #[test]
  fn parse_errors_stop_the_analysis() {
    let err = analyze(
      "  ORG &8000\n  JSR nowhere\n",
      &Options::default(),
      &[] as &[&str],
      Format::Text,
    )
    .err()
    .unwrap();
    assert_eq!(err.message, "undefined label `nowhere`");
    assert_eq!(err.range, (14, 25).into());
  }

  #[test]
  fn warnings_are_returned_with_the_report() {
    let (output, warnings) = analyze(
      "  ORG &8000\n  JSR print\n  EQUB 0\n.print\n  RTS\n",
      &Options {
        regs: vec![Reg::A],
        ..Options::default()
      },
      &["print"],
      Format::Text,
    )
    .unwrap();
    assert_eq!(warnings.len(), 1);
    assert!(output.starts_with("print = &8004\n"));
  }
}
