use assert_cmd::Command;
use scopeguard::defer;
use std::fs;
use std::path::{Path, PathBuf};

/// Runs a binary on the fixtures in `base_dir`. For a fixture `name`:
///
/// - `name.args` holds the listing's file name followed by the flags,
/// - `name.output`, `name.error` and `name.status` hold the expected stdout,
///   stderr and exit code. Missing files are not checked, except that a
///   missing status means success.
pub struct TestCli {
  base_dir: PathBuf,
  bin: String,
}

impl TestCli {
  pub fn new<S: ToString, P: AsRef<Path>>(bin_name: S, base_dir: P) -> Self {
    Self {
      base_dir: base_dir.as_ref().to_owned(),
      bin: bin_name.to_string(),
    }
  }

  pub fn test<S: AsRef<str>>(self, name: S) {
    let name = name.as_ref();
    let mut test = self.command(name).assert();

    let status = self.base_dir.join(format!("{}.status", name));
    if status.exists() {
      let exit_code = fs::read_to_string(status)
        .unwrap()
        .trim()
        .parse::<i32>()
        .unwrap();
      test = test.code(exit_code);
    } else {
      test = test.success();
    }

    if let Some(stdout) = self.expected(name, "output") {
      test = test.stdout(predicates::ord::eq(stdout.as_bytes()));
    }
    if let Some(stderr) = self.expected(name, "error") {
      test.stderr(predicates::ord::eq(stderr.as_bytes()));
    }
  }

  /// Like [`TestCli::test`], but the report is written to a file with `-o`.
  pub fn test_output_file<S: AsRef<str>>(self, name: S) {
    let name = name.as_ref();
    let out = self.base_dir.join(format!("{}.out", name));
    defer! {
      let _ = fs::remove_file(&out);
    }

    self
      .command(name)
      .arg("-o")
      .arg(&out)
      .assert()
      .success()
      .stdout(predicates::ord::eq(&b""[..]));

    let expected = self
      .expected(name, "output")
      .unwrap_or_else(|| panic!("{} has no output file", name));
    assert_eq!(fs::read_to_string(&out).unwrap(), expected);
  }

  fn command(&self, name: &str) -> Command {
    let args =
      fs::read_to_string(self.base_dir.join(format!("{}.args", name))).unwrap();
    let mut words = args.split_whitespace();
    let listing = words
      .next()
      .unwrap_or_else(|| panic!("{}.args names no listing", name));
    let mut cmd = Command::cargo_bin(&self.bin).unwrap();
    cmd.arg(self.base_dir.join(listing)).args(words);
    cmd
  }

  fn expected(&self, name: &str, extension: &str) -> Option<String> {
    let path = self.base_dir.join(format!("{}.{}", name, extension));
    if path.exists() {
      Some(fs::read_to_string(path).unwrap())
    } else {
      None
    }
  }
}
