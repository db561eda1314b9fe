use crate::{Analysis, Result, Summary};
use asm::Reg;
use indexmap::IndexSet;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::{self, Write};
use support::{
  MalformedProgramError, OpaqueControlFlowWarning, Range, WritePretty,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
  pub entries: Vec<EntryReport>,
  /// Calls applied with the external summary.
  pub external_calls: Vec<ExternalCall>,
  pub warnings: Vec<OpaqueControlFlowWarning>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExternalCall {
  pub address: u16,
  pub target: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryReport {
  pub address: u16,
  pub labels: Vec<String>,
  /// `None` for a routine nothing calls.
  pub summary: Option<Summary>,
  pub registers: BTreeMap<Reg, RegisterReport>,
  pub tail_references: Vec<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegisterReport {
  pub total: usize,
  pub live: usize,
  /// Call sites after which the register is live.
  pub callers: Vec<LiveCaller>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LiveCaller {
  pub address: u16,
  /// `None` for a call with no return address.
  pub reader: Option<Reader>,
}

/// The instruction a register is kept live for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reader {
  pub address: u16,
  pub instruction: String,
}

impl Analysis {
  /// Reports on the routines labelled `targets`, or on every called routine
  /// when there are none.
  pub fn report<S: AsRef<str>>(&self, targets: &[S]) -> Result<Report> {
    let entries: IndexSet<u16> = if targets.is_empty() {
      self.cfg.entries().into_iter().collect()
    } else {
      targets
        .iter()
        .map(|label| {
          let label = label.as_ref();
          self.entry_of(label).ok_or_else(|| {
            MalformedProgramError::new(
              Range::default(),
              format!("no instruction is labelled `{}`", label),
            )
          })
        })
        .collect::<Result<_>>()?
    };

    let entries = entries
      .into_iter()
      .map(|address| self.entry_report(address))
      .collect();
    let external_calls = self
      .cfg
      .external_calls()
      .map(|(address, target)| ExternalCall { address, target })
      .collect();
    Ok(Report {
      entries,
      external_calls,
      warnings: self.cfg.warnings.clone(),
    })
  }

  fn entry_report(&self, address: u16) -> EntryReport {
    let total = self.call_sites_of(address).len();
    let registers = self
      .options
      .regs
      .iter()
      .map(|&reg| {
        let callers: Vec<_> = self
          .all_live_callers(address, reg)
          .into_iter()
          .map(|site| LiveCaller {
            address: site.address,
            reader: self
              .first_reader(site, reg)
              .and_then(|address| self.reader(address)),
          })
          .collect();
        let report = RegisterReport {
          total,
          live: callers.len(),
          callers,
        };
        (reg, report)
      })
      .collect();
    EntryReport {
      address,
      labels: self
        .program
        .labels_at(address)
        .into_iter()
        .map(str::to_owned)
        .collect(),
      summary: self.summary(address),
      registers,
      tail_references: self.tail_references(address),
    }
  }

  fn reader(&self, address: u16) -> Option<Reader> {
    let (node, i) = self.cfg.locate(address)?;
    Some(Reader {
      address,
      instruction: self.cfg.graph[node].code[i].to_string(),
    })
  }
}

impl Report {
  pub fn to_json(&self) -> String {
    // integers, strings, sequences and maps keyed by register names only
    let mut json =
      serde_json::to_string_pretty(self).expect("report is plain data");
    json.push('\n');
    json
  }
}

impl WritePretty for Report {
  fn write(&self, f: &mut impl Write) -> fmt::Result {
    let mut first = true;
    for entry in &self.entries {
      separate(f, &mut first)?;
      entry.write(f)?;
    }
    if !self.external_calls.is_empty() {
      separate(f, &mut first)?;
      for call in &self.external_calls {
        writeln!(
          f,
          "external call &{:04X} to &{:04X}",
          call.address, call.target
        )?;
      }
    }
    if !self.warnings.is_empty() {
      separate(f, &mut first)?;
      for warning in &self.warnings {
        writeln!(f, "warning {}", warning)?;
      }
    }
    Ok(())
  }
}

/// A blank line before every section but the first.
fn separate(f: &mut impl Write, first: &mut bool) -> fmt::Result {
  if !*first {
    writeln!(f)?;
  }
  *first = false;
  Ok(())
}

impl WritePretty for EntryReport {
  fn write(&self, f: &mut impl Write) -> fmt::Result {
    if self.labels.is_empty() {
      writeln!(f, "&{:04X}", self.address)?;
    } else {
      writeln!(f, "{} = &{:04X}", self.labels.join(", "), self.address)?;
    }
    match &self.summary {
      Some(summary) => {
        writeln!(f, "  uses {}, kills {}", summary.uses, summary.kills)?
      }
      None => writeln!(f, "  never called")?,
    }
    for (reg, report) in &self.registers {
      writeln!(f, "  {}: {} calls, {} live", reg, report.total, report.live)?;
      for caller in &report.callers {
        match &caller.reader {
          Some(reader) => writeln!(
            f,
            "    &{:04X} ({} at &{:04X})",
            caller.address, reader.instruction, reader.address
          )?,
          None => {
            writeln!(f, "    &{:04X} (no return address)", caller.address)?
          }
        }
      }
    }
    if !self.tail_references.is_empty() {
      write!(f, "  tail references")?;
      write_addresses(f, &self.tail_references)?;
    }
    Ok(())
  }
}

fn write_addresses(f: &mut impl Write, addresses: &[u16]) -> fmt::Result {
  for (i, address) in addresses.iter().enumerate() {
    let sep = if i == 0 { ":" } else { "" };
    write!(f, "{} &{:04X}", sep, address)?;
  }
  writeln!(f)
}
