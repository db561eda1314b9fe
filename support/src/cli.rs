use crate::{ErrorPrinter, MalformedProgramError, OpaqueControlFlowWarning};
use std::fs;
use std::path::Path;
use std::process;

/// Reads the listing at `path`, runs `analyze` on it and writes the rendered
/// report to `output` (stdout when `None`). Diagnostics go to stderr; a
/// malformed listing exits with status 1.
pub fn cli_main(
  path: &Path,
  output: Option<&Path>,
  analyze: impl FnOnce(
    &str,
  )
    -> Result<(String, Vec<OpaqueControlFlowWarning>), MalformedProgramError>,
) {
  let input = fs::read_to_string(path).unwrap_or_else(|err| {
    eprintln!("read file {} error", path.display());
    eprintln!("{:?}", err);
    process::exit(1);
  });

  let printer = ErrorPrinter::new(path, &input);
  match analyze(&input) {
    Ok((report, warnings)) => {
      for warning in &warnings {
        printer.print_warning(warning);
      }
      match output {
        Some(output) => {
          fs::write(output, report).unwrap_or_else(|err| {
            eprintln!("write file {} error", output.display());
            eprintln!("{:?}", err);
            process::exit(1);
          });
        }
        None => print!("{}", report),
      }
    }
    Err(err) => {
      printer.print(&err);
      process::exit(1);
    }
  }
}
