use std::os::unix::io::RawFd;
use std::path::PathBuf;

use nix::libc::{gid_t, uid_t};
use nix::unistd::{Gid, Uid};

/// CPU time limit, in seconds
pub type TimeLimitType = u64;

/// Memory and output limits, in KB
pub type MemoryLimitType = u64;

/// How a program should be launched: redirections, limits and identity.
///
/// Every numeric field uses `0` as "not set": limits are not installed, the
/// identity is not changed and descriptors are not redirected.
///
/// Because of this convention descriptor `0` can never be passed through
/// `fd_stdin` / `fd_stdout` / `fd_stderr`, and uid / gid `0` cannot be
/// requested. Use a filename redirection when stdin itself must be rewired.
///
/// Standard descriptors are valid sources: `fd_stdout(2)` with `fd_stderr(1)`
/// swaps the two streams of the launched program.
#[derive(Debug, Clone, Default)]
pub struct StartupInfo {
  /// Opened read-only and used as stdin
  pub stdin: Option<PathBuf>,
  /// Created / truncated and used as stdout
  pub stdout: Option<PathBuf>,
  /// Created / truncated and used as stderr
  pub stderr: Option<PathBuf>,
  /// Already opened descriptors, used only when the matching filename is absent
  pub fd_stdin: RawFd,
  pub fd_stdout: RawFd,
  pub fd_stderr: RawFd,
  pub time_limit: TimeLimitType,
  pub memory_limit: MemoryLimitType,
  pub output_limit: MemoryLimitType,
  /// Max number of open descriptors
  pub file_limit: u64,
  /// Max number of processes of the target user
  pub proc_limit: u64,
  pub cwd: Option<PathBuf>,
  pub uid: uid_t,
  pub gid: gid_t,
  /// Stop at exec for an external syscall tracer
  pub trace: bool,
}

impl StartupInfo {
  pub fn new() -> Self {
    Self::default()
  }

  /// Set stdin redirection
  pub fn stdin<P: Into<PathBuf>>(&mut self, path: P) -> &mut Self {
    self.stdin = Some(path.into());
    self
  }

  /// Set stdout redirection
  pub fn stdout<P: Into<PathBuf>>(&mut self, path: P) -> &mut Self {
    self.stdout = Some(path.into());
    self
  }

  /// Set stderr redirection
  pub fn stderr<P: Into<PathBuf>>(&mut self, path: P) -> &mut Self {
    self.stderr = Some(path.into());
    self
  }

  /// Set stdin redirection or not
  pub fn set_stdin<P: Into<PathBuf>>(&mut self, path: Option<P>) -> &mut Self {
    self.stdin = path.map(|p| p.into());
    self
  }

  /// Set stdout redirection or not
  pub fn set_stdout<P: Into<PathBuf>>(&mut self, path: Option<P>) -> &mut Self {
    self.stdout = path.map(|p| p.into());
    self
  }

  /// Set stderr redirection or not
  pub fn set_stderr<P: Into<PathBuf>>(&mut self, path: Option<P>) -> &mut Self {
    self.stderr = path.map(|p| p.into());
    self
  }

  pub fn fd_stdin(&mut self, fd: RawFd) -> &mut Self {
    self.fd_stdin = fd;
    self
  }

  pub fn fd_stdout(&mut self, fd: RawFd) -> &mut Self {
    self.fd_stdout = fd;
    self
  }

  pub fn fd_stderr(&mut self, fd: RawFd) -> &mut Self {
    self.fd_stderr = fd;
    self
  }

  /// Set time limit (unit: s)
  pub fn time_limit(&mut self, value: TimeLimitType) -> &mut Self {
    self.time_limit = value;
    self
  }

  /// Set memory limit (unit: KB)
  pub fn memory_limit(&mut self, value: MemoryLimitType) -> &mut Self {
    self.memory_limit = value;
    self
  }

  /// Set output limit (unit: KB)
  pub fn output_limit(&mut self, value: MemoryLimitType) -> &mut Self {
    self.output_limit = value;
    self
  }

  pub fn file_limit(&mut self, value: u64) -> &mut Self {
    self.file_limit = value;
    self
  }

  pub fn proc_limit(&mut self, value: u64) -> &mut Self {
    self.proc_limit = value;
    self
  }

  pub fn cwd<P: Into<PathBuf>>(&mut self, path: P) -> &mut Self {
    self.cwd = Some(path.into());
    self
  }

  pub fn uid(&mut self, uid: uid_t) -> &mut Self {
    self.uid = uid;
    self
  }

  pub fn gid(&mut self, gid: gid_t) -> &mut Self {
    self.gid = gid;
    self
  }

  /// Set uid / gid with current user
  pub fn current_user(&mut self) -> &mut Self {
    self.uid = Uid::current().as_raw();
    self.gid = Gid::current().as_raw();
    self
  }

  pub fn trace(&mut self, flag: bool) -> &mut Self {
    self.trace = flag;
    self
  }

  /// The three redirection filenames, indexed by standard stream number
  pub(crate) fn filenames(&self) -> [Option<&PathBuf>; 3] {
    [self.stdin.as_ref(), self.stdout.as_ref(), self.stderr.as_ref()]
  }

  /// The three caller supplied descriptors, `None` when unset (zero)
  pub(crate) fn descriptors(&self) -> [Option<RawFd>; 3] {
    [self.fd_stdin, self.fd_stdout, self.fd_stderr].map(|fd| if fd == 0 { None } else { Some(fd) })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn it_should_treat_zero_descriptor_as_absent() {
    let mut info = StartupInfo::new();
    info.fd_stdin(0).fd_stdout(5).fd_stderr(2);
    assert_eq!(info.descriptors(), [None, Some(5), Some(2)]);
  }

  #[test]
  fn it_should_chain_limits() {
    let mut info = StartupInfo::new();
    info
      .time_limit(2)
      .memory_limit(65536)
      .output_limit(1024)
      .file_limit(8)
      .proc_limit(1)
      .stdout("/tmp/out");
    assert_eq!(info.time_limit, 2);
    assert_eq!(info.memory_limit, 65536);
    assert_eq!(info.output_limit, 1024);
    assert_eq!(info.file_limit, 8);
    assert_eq!(info.proc_limit, 1);
    assert_eq!(info.filenames()[1], Some(&PathBuf::from("/tmp/out")));
    assert!(info.filenames()[0].is_none());
  }
}
