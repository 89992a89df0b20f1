use std::fs::{self, File};
use std::os::unix::io::AsRawFd;

use tempfile::tempdir;

use judgeproc::io::{copy_stream, persist_to_file, CHUNK_SIZE};
use judgeproc::JudgeError;

mod common;

#[test]
fn it_should_copy_empty_source() {
  common::setup();

  let dir = tempdir().unwrap();
  let source = dir.path().join("empty.txt");
  let target = dir.path().join("copy.txt");
  File::create(&source).unwrap();
  fs::write(&target, "old").unwrap();

  let copied = persist_to_file(File::open(&source).unwrap().as_raw_fd(), &target).unwrap();

  assert_eq!(copied, 0);
  assert_eq!(fs::read(&target).unwrap(), Vec::<u8>::new());
}

#[test]
fn it_should_copy_chunks_and_remainder() {
  common::setup();

  let dir = tempdir().unwrap();
  let source = dir.path().join("data.bin");
  let target = dir.path().join("copy.bin");
  let content = (0..CHUNK_SIZE * 5 + 123)
    .map(|i| (i % 251) as u8)
    .collect::<Vec<u8>>();
  fs::write(&source, &content).unwrap();

  let input = File::open(&source).unwrap();
  let output = File::create(&target).unwrap();
  let copied = copy_stream(input.as_raw_fd(), output.as_raw_fd()).unwrap();
  drop(output);

  assert_eq!(copied, content.len() as u64);
  assert_eq!(fs::read(&target).unwrap(), content);
}

#[test]
fn it_should_report_unwritable_destination() {
  common::setup();

  let dir = tempdir().unwrap();
  let source = dir.path().join("data.txt");
  fs::write(&source, "data").unwrap();
  let target = dir.path().join("missing").join("copy.txt");

  let result = persist_to_file(File::open(&source).unwrap().as_raw_fd(), &target);

  assert!(matches!(result, Err(JudgeError::Io(_))));
}

#[test]
fn it_should_propagate_read_failure() {
  common::setup();

  let dir = tempdir().unwrap();
  let target = dir.path().join("copy.txt");
  // A write-only descriptor cannot be read from
  let source = File::create(dir.path().join("write-only.txt")).unwrap();

  assert!(persist_to_file(source.as_raw_fd(), &target).is_err());
}
