#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Once;

use flexi_logger::Logger;

static INIT: Once = Once::new();

pub fn setup() {
  INIT.call_once(|| {
    Logger::try_with_str("judgeproc=debug,info")
      .unwrap()
      .start()
      .map(std::mem::forget)
      .unwrap();
  });
}

/// Compile a C program into `dir` and return the executable path
pub fn compile_c(dir: &Path, name: &str, source: &str) -> PathBuf {
  let source_path = dir.join(format!("{}.c", name));
  fs::write(&source_path, source).unwrap();

  let executable = dir.join(name);
  let output = Command::new("gcc")
    .arg("-O0")
    .arg("-o")
    .arg(&executable)
    .arg(&source_path)
    .output()
    .expect("gcc should be available");
  assert!(
    output.status.success(),
    "Compilation error: {}",
    String::from_utf8_lossy(&output.stderr)
  );
  executable
}
