use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::Path;

use log::{debug, error};
use nix::errno::Errno;
use nix::unistd;

use crate::error::{JudgeError, Result};

/// Chunk size used when copying between descriptors
pub const CHUNK_SIZE: usize = 1024;

/// Read until `buffer` is full or the stream ends, retrying on `EINTR`.
///
/// A result shorter than `buffer.len()` means end-of-stream was reached and is
/// not an error.
pub fn read_all(fd: RawFd, buffer: &mut [u8]) -> Result<usize> {
  let mut filled = 0;
  while filled < buffer.len() {
    match unistd::read(fd, &mut buffer[filled..]) {
      Ok(0) => break,
      Ok(num) => filled += num,
      Err(Errno::EINTR) => continue,
      Err(errno) => {
        error!("Fail to read from fd {}: {}", fd, errno);
        return Err(JudgeError::Nix(errno));
      }
    }
  }
  Ok(filled)
}

/// Write the whole `buffer`, retrying on `EINTR` and on partial writes
pub fn write_all(fd: RawFd, buffer: &[u8]) -> Result<()> {
  let mut written = 0;
  while written < buffer.len() {
    match unistd::write(fd, &buffer[written..]) {
      Ok(num) => written += num,
      Err(Errno::EINTR) => continue,
      Err(errno) => {
        error!("Fail to write to fd {}: {}", fd, errno);
        return Err(JudgeError::Nix(errno));
      }
    }
  }
  Ok(())
}

/// Copy `source` into `destination` until `source` is exhausted.
///
/// Returns the number of bytes copied.
pub fn copy_stream(source: RawFd, destination: RawFd) -> Result<u64> {
  let mut buffer = [0u8; CHUNK_SIZE];
  let mut total = 0u64;
  loop {
    let count = read_all(source, &mut buffer)?;
    write_all(destination, &buffer[..count])?;
    total += count as u64;
    if count < buffer.len() {
      debug!("Copy {} bytes from fd {} to fd {}", total, source, destination);
      return Ok(total);
    }
  }
}

/// Save everything readable from `source` into the file at `path`
pub fn persist_to_file<P: AsRef<Path>>(source: RawFd, path: P) -> Result<u64> {
  let path = path.as_ref();
  let file = OpenOptions::new()
    .read(true)
    .write(true)
    .create(true)
    .truncate(true)
    .mode(0o666)
    .open(path)
    .map_err(|err| {
      error!("Fail to open file {}: {}", path.to_string_lossy(), err);
      JudgeError::Io(err)
    })?;
  copy_stream(source, file.as_raw_fd())
}

/// Send a numeric reply terminated by a newline
pub fn send_reply(fd: RawFd, reply: i32) -> Result<()> {
  write_all(fd, format!("{}\n", reply).as_bytes())
}

#[cfg(test)]
mod tests {
  use super::*;
  use nix::unistd::{close, pipe};
  use std::fs;
  use std::io::{Seek, SeekFrom, Write};

  #[test]
  fn it_should_stop_reading_at_end_of_stream() {
    let (reader, writer) = pipe().unwrap();
    write_all(writer, b"hello").unwrap();
    close(writer).unwrap();

    let mut buffer = [0u8; 16];
    let count = read_all(reader, &mut buffer).unwrap();
    assert_eq!(count, 5);
    assert_eq!(&buffer[..count], b"hello");
    assert_eq!(read_all(reader, &mut buffer).unwrap(), 0);
    close(reader).unwrap();
  }

  #[test]
  fn it_should_fail_on_bad_descriptor() {
    let mut buffer = [0u8; 4];
    assert_eq!(read_all(-1, &mut buffer).unwrap_err().errno(), Some(Errno::EBADF));
    assert_eq!(write_all(-1, b"x").unwrap_err().errno(), Some(Errno::EBADF));
  }

  #[test]
  fn it_should_send_reply_line() {
    let (reader, writer) = pipe().unwrap();
    send_reply(writer, -3).unwrap();
    close(writer).unwrap();

    let mut buffer = [0u8; 8];
    let count = read_all(reader, &mut buffer).unwrap();
    assert_eq!(&buffer[..count], b"-3\n");
    close(reader).unwrap();
  }

  #[test]
  fn it_should_copy_exact_multiple_of_chunk() {
    let dir = tempfile::tempdir().unwrap();
    let mut source = tempfile::tempfile().unwrap();
    let content = vec![7u8; CHUNK_SIZE * 3];
    source.write_all(&content).unwrap();
    source.seek(SeekFrom::Start(0)).unwrap();

    let target = dir.path().join("copy.bin");
    let copied = persist_to_file(source.as_raw_fd(), &target).unwrap();
    assert_eq!(copied, content.len() as u64);
    assert_eq!(fs::read(&target).unwrap(), content);
  }
}
