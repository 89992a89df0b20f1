use std::fs;
use std::process::Command;

use serial_test::serial;
use tempfile::tempdir;

#[test]
#[serial]
fn it_should_keep_setup_failure_out_of_program_stderr() {
  let dir = tempdir().unwrap();
  let error = dir.path().join("err.txt");

  let output = Command::new(env!("CARGO_BIN_EXE_judgeproc"))
    .env("LOG_DIR", dir.path().join("logs"))
    .env("RUST_LOG", "judgeproc=info")
    .arg("--stderr")
    .arg(&error)
    .arg("--cwd")
    .arg(dir.path().join("missing"))
    .arg("--json")
    .arg("shell")
    .arg("echo should not run")
    .output()
    .unwrap();

  assert!(output.status.success());
  let report = String::from_utf8_lossy(&output.stdout);
  assert!(report.contains("\"signal\": \"SIGKILL\""), "{}", report);
  assert_eq!(fs::read_to_string(&error).unwrap(), "");
}
