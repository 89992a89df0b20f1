use std::{
  error::Error,
  fmt::{Debug, Display},
  path::PathBuf,
  process::{ExitCode, Termination},
};

use flexi_logger::FlexiLoggerError;
use nix::{errno::Errno, libc::STDOUT_FILENO, unistd::isatty};

/// Failures reported to the caller before (or instead of) a child process exists.
///
/// Setup failures inside the forked child are never turned into this type,
/// the child kills itself instead.
pub enum JudgeError {
  Redirect(PathBuf, std::io::Error),
  Fork(Errno),
  Argument(String),
  Limit(String),
  Socket(&'static str, Errno),
  Io(std::io::Error),
  Nix(Errno),
  Cli(String),
  Logger(FlexiLoggerError),
}

pub type Result<T> = std::result::Result<T, JudgeError>;

#[allow(unused)]
pub enum JudgeExit {
  Ok,
  Err(JudgeError),
}

impl JudgeError {
  pub fn argument<MS: Into<String>>(msg: MS) -> JudgeError {
    JudgeError::Argument(msg.into())
  }

  pub fn limit<MS: Into<String>>(msg: MS) -> JudgeError {
    JudgeError::Limit(msg.into())
  }

  pub fn cli<MS: Into<String>>(msg: MS) -> JudgeError {
    JudgeError::Cli(msg.into())
  }

  /// Underlying errno, when the failure came from a system call
  pub fn errno(&self) -> Option<Errno> {
    match self {
      JudgeError::Fork(errno) | JudgeError::Socket(_, errno) | JudgeError::Nix(errno) => {
        Some(*errno)
      }
      JudgeError::Redirect(_, err) | JudgeError::Io(err) => {
        err.raw_os_error().map(Errno::from_i32)
      }
      _ => None,
    }
  }
}

impl Debug for JudgeError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    std::fmt::Display::fmt(&self, f)
  }
}

impl Display for JudgeError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match &self {
      JudgeError::Redirect(path, err) => f.write_fmt(format_args!(
        "Judge Redirect Error: fail to open {}: {}",
        path.to_string_lossy(),
        err
      )),
      JudgeError::Fork(errno) => f.write_fmt(format_args!("Judge Fork Error: {}", errno)),
      JudgeError::Argument(msg) => f.write_fmt(format_args!("Judge Argument Error: {}", msg)),
      JudgeError::Limit(msg) => f.write_fmt(format_args!("Judge Limit Error: {}", msg)),
      JudgeError::Socket(step, errno) => {
        f.write_fmt(format_args!("Judge Socket Error: fail to {}: {}", step, errno))
      }
      JudgeError::Io(err) => f.write_fmt(format_args!("Judge IO Error: {}", err)),
      JudgeError::Nix(errno) => f.write_fmt(format_args!("Judge Nix Error: {}", errno)),
      JudgeError::Cli(msg) => f.write_fmt(format_args!("Judge CLI Error: {}", msg)),
      JudgeError::Logger(err) => f.write_fmt(format_args!("Judge Logger Error: {}", err)),
    }
  }
}

impl From<Errno> for JudgeError {
  fn from(errno: Errno) -> Self {
    JudgeError::Nix(errno)
  }
}

impl From<std::io::Error> for JudgeError {
  fn from(err: std::io::Error) -> Self {
    JudgeError::Io(err)
  }
}

impl From<FlexiLoggerError> for JudgeError {
  fn from(err: FlexiLoggerError) -> Self {
    JudgeError::Logger(err)
  }
}

impl Error for JudgeError {}

impl Termination for JudgeExit {
  fn report(self) -> ExitCode {
    match self {
      JudgeExit::Ok => ExitCode::SUCCESS.report(),
      JudgeExit::Err(err) => {
        let text = format!("{}", err);
        let text = match text.split_once(": ") {
          Some((prefix, message)) => {
            let is_tty = isatty(STDOUT_FILENO).unwrap_or(false);
            if is_tty {
              format!("\x1b[1m\x1b[91m{}\x1b[39m\x1b[22m  {}", prefix, message)
            } else {
              format!(
                "{{\n  \"ok\": false,\n  \"type\": \"{}\",\n  \"message\": \"{}\"\n}}",
                prefix,
                message.replace('\\', "\\\\").replace('"', "\\\"")
              )
            }
          }
          None => text,
        };
        eprintln!("{}", text);
        ExitCode::FAILURE.report()
      }
    }
  }
}
