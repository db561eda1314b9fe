use std::fmt::{self, Write};

mod cli;
mod error;
mod range;
mod test_cli;

pub use cli::cli_main;
pub use error::{
  ErrorPrinter, MalformedProgramError, OpaqueControlFlowWarning, WarningKind,
};
pub use range::Range;
pub use test_cli::TestCli;

pub trait WritePretty {
  fn write(&self, f: &mut impl Write) -> fmt::Result;

  fn to_string_pretty(&self) -> String {
    let mut buf = String::new();
    // writing into a String never fails
    let _ = self.write(&mut buf);
    buf
  }
}
