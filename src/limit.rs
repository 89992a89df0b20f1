use log::error;
use nix::libc::rlim_t;
use nix::sys::resource::{getrlimit, setrlimit, Resource};

use crate::error::{JudgeError, Result};

/// Install `limit` as the soft ceiling of `resource` and `limit + 1` as the
/// hard one.
///
/// The soft boundary delivers the violation signal (e.g. `SIGXCPU`), the hard
/// boundary one unit above only acts as a backstop.
pub fn set_resource_limit(resource: Resource, limit: u64) -> Result<()> {
  let hard = limit.checked_add(1).ok_or_else(|| {
    JudgeError::limit(format!("{:?} limit {} has no room for a hard limit", resource, limit))
  })?;
  set_resource_limits(resource, limit, hard)
}

/// Install an explicit soft / hard pair, the hard limit must be above the soft one
pub fn set_resource_limits(resource: Resource, soft: u64, hard: u64) -> Result<()> {
  if hard <= soft {
    return Err(JudgeError::limit(format!(
      "{:?} hard limit {} should be greater than soft limit {}",
      resource, hard, soft
    )));
  }
  setrlimit(resource, soft as rlim_t, hard as rlim_t).map_err(|errno| {
    error!("Fail to set {:?} to ({}, {}): {}", resource, soft, hard, errno);
    JudgeError::Nix(errno)
  })
}

/// Query the current `(soft, hard)` pair
pub fn get_resource_limit(resource: Resource) -> Result<(u64, u64)> {
  let (soft, hard) = getrlimit(resource)?;
  Ok((soft as u64, hard as u64))
}

#[cfg(test)]
mod tests {
  use super::*;
  use nix::libc;
  use nix::sys::wait::{waitpid, WaitStatus};
  use nix::unistd::{fork, ForkResult};
  use serial_test::serial;

  /// Run `check` in a forked child so the limits never touch the test process
  fn in_child<F: FnOnce() -> bool>(check: F) -> bool {
    match unsafe { fork() }.unwrap() {
      ForkResult::Parent { child } => {
        matches!(waitpid(child, None).unwrap(), WaitStatus::Exited(_, 0))
      }
      ForkResult::Child => {
        let code = if check() { 0 } else { 1 };
        unsafe { libc::_exit(code) }
      }
    }
  }

  #[test]
  #[serial]
  fn it_should_install_soft_and_hard_limits() {
    let resources = [
      (Resource::RLIMIT_CPU, 3),
      (Resource::RLIMIT_DATA, 64 * 1024 * 1024),
      (Resource::RLIMIT_FSIZE, 1024 * 1024),
      (Resource::RLIMIT_NOFILE, 16),
      (Resource::RLIMIT_NPROC, 64),
    ];
    for (resource, value) in resources {
      assert!(
        in_child(|| {
          set_resource_limit(resource, value).is_ok()
            && get_resource_limit(resource).ok() == Some((value, value + 1))
        }),
        "{:?} should be ({}, {})",
        resource,
        value,
        value + 1
      );
    }
  }

  #[test]
  fn it_should_reject_reversed_limits() {
    assert!(set_resource_limits(Resource::RLIMIT_CPU, 5, 5).is_err());
    assert!(set_resource_limits(Resource::RLIMIT_CPU, 5, 4).is_err());
    assert!(set_resource_limit(Resource::RLIMIT_CPU, u64::MAX).is_err());
  }
}
