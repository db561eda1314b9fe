use asm::{Reg, RegSet};
use clap::Parser;
use liveness::{Format, Options, Summary};
use std::path::PathBuf;
use support::cli_main;

/// Reports which call sites of 6502 subroutines depend on the registers
/// the subroutines leave behind.
#[derive(Parser)]
#[command(name = "liveness", version)]
struct Args {
  /// BeebAsm listing to analyse
  file: PathBuf,

  /// Routines to report on; every called routine when omitted
  labels: Vec<String>,

  /// Registers to report, e.g. `A,Y`
  #[arg(long, value_delimiter = ',', value_parser = parse_reg)]
  regs: Vec<Reg>,

  /// Registers live after a return from uncalled code
  #[arg(long, value_parser = parse_regs)]
  root_live: Option<RegSet>,

  /// Registers read by calls that leave the listing [default: A,X,Y,C,Z]
  #[arg(long, value_parser = parse_regs)]
  external_uses: Option<RegSet>,

  /// Registers overwritten by calls that leave the listing [default: none]
  #[arg(long, value_parser = parse_regs)]
  external_kills: Option<RegSet>,

  /// Print the report as JSON
  #[arg(long)]
  json: bool,

  /// Write the report to FILE instead of stdout
  #[arg(short, long, value_name = "FILE")]
  output: Option<PathBuf>,
}

fn parse_reg(name: &str) -> Result<Reg, String> {
  Reg::from_name(name.trim())
    .ok_or_else(|| format!("unknown register `{}`", name.trim()))
}

fn parse_regs(names: &str) -> Result<RegSet, String> {
  names
    .split(',')
    .filter(|name| !name.trim().is_empty())
    .map(parse_reg)
    .collect()
}

fn main() {
  env_logger::init();
  let args = Args::parse();

  let defaults = Options::default();
  let options = Options {
    regs: if args.regs.is_empty() {
      defaults.regs
    } else {
      args.regs
    },
    root_live: args.root_live.unwrap_or(defaults.root_live),
    external: Summary {
      uses: args.external_uses.unwrap_or(defaults.external.uses),
      kills: args.external_kills.unwrap_or(defaults.external.kills),
    },
  };
  let format = if args.json { Format::Json } else { Format::Text };
  let labels = args.labels;

  cli_main(&args.file, args.output.as_deref(), |input| {
    liveness::analyze(input, &options, &labels, format)
  });
}
