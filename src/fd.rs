use std::os::unix::io::{AsRawFd, RawFd};

use nix::dir::Dir;
use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::libc;
use nix::sys::stat::Mode;
use nix::unistd::close;

use crate::error::Result;

/// Close every open descriptor numbered `first` or above.
///
/// Descriptors are enumerated from `/proc/self/fd`, so there is no assumption on
/// how many the process holds.
pub fn close_inherited_fds(first: RawFd) -> nix::Result<()> {
  let fds = {
    let mut dir = Dir::open(
      "/proc/self/fd",
      OFlag::O_RDONLY | OFlag::O_DIRECTORY | OFlag::O_CLOEXEC,
      Mode::empty(),
    )?;
    let own = dir.as_raw_fd();
    let mut fds = vec![];
    for entry in dir.iter() {
      let entry = entry?;
      let fd = match entry.file_name().to_str().ok().and_then(|s| s.parse::<RawFd>().ok()) {
        Some(fd) => fd,
        None => continue,
      };
      if fd >= first && fd != own {
        fds.push(fd);
      }
    }
    fds
  };
  for fd in fds {
    match close(fd) {
      Ok(()) | Err(Errno::EBADF) => {}
      Err(errno) => return Err(errno),
    }
  }
  Ok(())
}

/// Take an exclusive write lock on the whole file behind `fd`.
///
/// The lock belongs to the open file description, so closing some other
/// descriptor of the same file does not release it. With `wait` the call
/// blocks until the lock is available, otherwise it fails with `EAGAIN` when
/// another open of the file holds it.
pub fn lock_file(fd: RawFd, wait: bool) -> Result<()> {
  let mut lock: libc::flock = unsafe { std::mem::zeroed() };
  lock.l_type = libc::F_WRLCK as libc::c_short;
  lock.l_whence = libc::SEEK_SET as libc::c_short;
  lock.l_start = 0;
  lock.l_len = 0;
  let arg = if wait {
    FcntlArg::F_OFD_SETLKW(&lock)
  } else {
    FcntlArg::F_OFD_SETLK(&lock)
  };
  fcntl(fd, arg)?;
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use nix::sys::wait::{waitpid, WaitStatus};
  use nix::unistd::{fork, ForkResult};
  use serial_test::serial;

  #[test]
  #[serial]
  fn it_should_close_descriptors_above_bound() {
    let file = tempfile::tempfile().unwrap();
    let fd = file.as_raw_fd();
    match unsafe { fork() }.unwrap() {
      ForkResult::Parent { child } => {
        assert_eq!(waitpid(child, None).unwrap(), WaitStatus::Exited(child, 0));
      }
      ForkResult::Child => {
        let ok = close_inherited_fds(3).is_ok()
          && fcntl(fd, FcntlArg::F_GETFD) == Err(Errno::EBADF)
          && fcntl(2, FcntlArg::F_GETFD).is_ok();
        unsafe { libc::_exit(if ok { 0 } else { 1 }) }
      }
    }
  }

  #[test]
  #[serial]
  fn it_should_refuse_lock_held_by_other_process() {
    let file = tempfile::NamedTempFile::new().unwrap();
    let path = file.path().to_path_buf();
    lock_file(file.as_file().as_raw_fd(), false).unwrap();
    match unsafe { fork() }.unwrap() {
      ForkResult::Parent { child } => {
        assert_eq!(waitpid(child, None).unwrap(), WaitStatus::Exited(child, 0));
      }
      ForkResult::Child => {
        let refused = std::fs::OpenOptions::new()
          .write(true)
          .open(&path)
          .map(|other| {
            matches!(
              lock_file(other.as_raw_fd(), false).map_err(|err| err.errno()),
              Err(Some(Errno::EAGAIN)) | Err(Some(Errno::EACCES))
            )
          })
          .unwrap_or(false);
        unsafe { libc::_exit(if refused { 0 } else { 1 }) }
      }
    }
  }

  #[test]
  fn it_should_keep_lock_when_other_descriptor_closes() {
    let file = tempfile::NamedTempFile::new().unwrap();
    lock_file(file.as_file().as_raw_fd(), false).unwrap();

    // Open and close a second descriptor of the same file
    drop(std::fs::File::open(file.path()).unwrap());

    let other = std::fs::OpenOptions::new().write(true).open(file.path()).unwrap();
    let result = lock_file(other.as_raw_fd(), false);
    assert_eq!(result.unwrap_err().errno(), Some(Errno::EAGAIN));
  }
}
