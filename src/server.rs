use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::Path;

use log::{error, info};
use nix::fcntl::{open, OFlag};
use nix::sys::signal::Signal;
use nix::sys::socket::{
  bind, listen, setsockopt, socket, sockopt, AddressFamily, SockFlag, SockProtocol, SockType,
  SockaddrIn,
};
use nix::sys::stat::{umask, Mode};
use nix::unistd::{close, dup2, fork, setsid, ForkResult, Pid};

use crate::error::{JudgeError, Result};
use crate::fd::{close_inherited_fds, lock_file};
use crate::signal::ignore_signal;

/// Backlog of the listening socket
pub const BACKLOG: usize = 32;

/// Create a TCP socket listening on every interface at `port`.
///
/// Address reuse is enabled so a restarted server can bind immediately while
/// old connections linger in `TIME_WAIT`.
pub fn create_listener(port: u16) -> Result<RawFd> {
  let fd = socket(
    AddressFamily::Inet,
    SockType::Stream,
    SockFlag::SOCK_CLOEXEC,
    SockProtocol::Tcp,
  )
  .map_err(|errno| socket_error("create socket", errno))?;

  let setup = || -> Result<()> {
    setsockopt(fd, sockopt::ReuseAddr, &true)
      .map_err(|errno| socket_error("set socket option", errno))?;
    let address = SockaddrIn::new(0, 0, 0, 0, port);
    bind(fd, &address).map_err(|errno| socket_error("bind", errno))?;
    listen(fd, BACKLOG).map_err(|errno| socket_error("listen", errno))?;
    Ok(())
  };

  match setup() {
    Ok(()) => {
      info!("Listen on port {} (fd {})", port, fd);
      Ok(fd)
    }
    Err(err) => {
      let _ = close(fd);
      Err(err)
    }
  }
}

fn socket_error(step: &'static str, errno: nix::errno::Errno) -> JudgeError {
  error!("Fail to {}: {}", step, errno);
  JudgeError::Socket(step, errno)
}

/// Detach from the terminal and keep running in the background.
///
/// The calling process exits, the forked copy starts a new session, ignores
/// `SIGHUP`, points 0 / 1 / 2 at `/dev/null` and closes every other descriptor.
pub fn daemonize() -> Result<()> {
  umask(Mode::empty());
  match unsafe { fork() } {
    Ok(ForkResult::Parent { .. }) => std::process::exit(0),
    Ok(ForkResult::Child) => {}
    Err(errno) => {
      error!("Fail to fork: {}", errno);
      return Err(JudgeError::Fork(errno));
    }
  }

  setsid()?;
  ignore_signal(Signal::SIGHUP)?;

  let null = open("/dev/null", OFlag::O_RDWR, Mode::empty())?;
  for target in 0..3 {
    dup2(null, target)?;
  }
  if null > 2 {
    close(null)?;
  }
  close_inherited_fds(3)?;
  Ok(())
}

/// Create `path`, lock it and write the current pid into it.
///
/// Fails when another process already holds the lock, so only one instance of
/// the service runs at a time. The lock lives as long as the returned file,
/// reading the pid file through another descriptor does not drop it.
pub fn write_pid_file<P: AsRef<Path>>(path: P) -> Result<File> {
  let path = path.as_ref();
  let mut file = OpenOptions::new()
    .read(true)
    .write(true)
    .create(true)
    .mode(0o644)
    .open(path)?;
  if let Err(err) = lock_file(file.as_raw_fd(), false) {
    error!("Fail to lock {}: {}", path.to_string_lossy(), err);
    return Err(err);
  }
  file.set_len(0)?;
  file.write_all(format!("{}\n", Pid::this()).as_bytes())?;
  Ok(file)
}
