use log::error;
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

use crate::error::Result;

/// Install `handler` for `signal` and return the previous handler.
///
/// Interrupted system calls are restarted, except for `SIGALRM` which is kept
/// interrupting so it can bound a blocking call.
pub fn install_signal_handler(
  signal: Signal,
  handler: SigHandler,
  flags: SaFlags,
  mask: SigSet,
) -> Result<SigHandler> {
  let flags = if signal == Signal::SIGALRM {
    flags - SaFlags::SA_RESTART
  } else {
    flags | SaFlags::SA_RESTART
  };
  let action = SigAction::new(handler, flags, mask);
  let old = unsafe { sigaction(signal, &action) }.map_err(|errno| {
    error!("Fail to install handler for {}: {}", signal, errno);
    errno
  })?;
  Ok(old.handler())
}

/// Ignore `signal`, e.g. `SIGHUP` after detaching from the terminal
pub fn ignore_signal(signal: Signal) -> Result<SigHandler> {
  install_signal_handler(signal, SigHandler::SigIgn, SaFlags::empty(), SigSet::empty())
}
