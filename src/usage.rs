use std::fs;

use lazy_static::lazy_static;
use log::{debug, warn};
use nix::unistd::{sysconf, Pid, SysconfVar};

lazy_static! {
  /// Clock ticks per second, fixed for the lifetime of the process
  static ref CLOCK_TICKS: u64 = match sysconf(SysconfVar::CLK_TCK) {
    Ok(Some(ticks)) if ticks > 0 => ticks as u64,
    _ => {
      warn!("Fail to query clock ticks, fallback to 100");
      100
    }
  };
}

/// Clock ticks per second used to convert `/proc/<pid>/stat` times
pub fn clock_ticks() -> u64 {
  *CLOCK_TICKS
}

/// CPU seconds (user + system) consumed by `pid`.
///
/// `None` means the measurement is unavailable (process already reaped or not
/// accessible), which must not be read as zero usage.
pub fn read_cpu_time(pid: Pid) -> Option<f64> {
  let path = format!("/proc/{}/stat", pid);
  let content = match fs::read_to_string(&path) {
    Ok(content) => content,
    Err(err) => {
      debug!("Fail to read {}: {}", path, err);
      return None;
    }
  };
  let (utime, stime) = parse_stat_ticks(&content)?;
  Some((utime + stime) as f64 / clock_ticks() as f64)
}

/// Estimated private memory of `pid` in KB: peak (or current) virtual size
/// minus the executable image and shared libraries.
///
/// `None` means the measurement is unavailable.
pub fn read_memory_peak(pid: Pid) -> Option<u64> {
  let path = format!("/proc/{}/status", pid);
  let content = match fs::read_to_string(&path) {
    Ok(content) => content,
    Err(err) => {
      debug!("Fail to read {}: {}", path, err);
      return None;
    }
  };
  parse_status_memory(&content)
}

/// Extract `(utime, stime)` ticks from the content of a stat file.
///
/// The command name is wrapped in parentheses and may itself contain `)` and
/// spaces, so the fields start after the last `)`.
pub(crate) fn parse_stat_ticks(content: &str) -> Option<(u64, u64)> {
  let rest = &content[content.rfind(')')? + 1..];
  // state ppid pgrp session tty_nr tpgid flags minflt cminflt majflt cmajflt utime stime
  let mut fields = rest.split_whitespace().skip(11);
  let utime = fields.next()?.parse().ok()?;
  let stime = fields.next()?.parse().ok()?;
  Some((utime, stime))
}

pub(crate) fn parse_status_memory(content: &str) -> Option<u64> {
  let mut peak = None;
  let mut size = None;
  let mut exe = 0;
  let mut lib = 0;
  for line in content.lines() {
    let (key, value) = match line.split_once(':') {
      Some(pair) => pair,
      None => continue,
    };
    let number = || {
      value
        .split_whitespace()
        .next()
        .and_then(|v| v.parse::<u64>().ok())
    };
    match key {
      "VmPeak" => peak = number(),
      "VmSize" => size = number(),
      "VmExe" => exe = number().unwrap_or(0),
      "VmLib" => lib = number().unwrap_or(0),
      _ => {}
    }
  }
  // Zombies have no Vm* lines at all
  let total = peak.filter(|v| *v > 0).or(size)?;
  Some(total.saturating_sub(exe).saturating_sub(lib))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn it_should_parse_stat_with_tricky_name() {
    let stat = "4242 (a) b (c d) R 1 4242 4242 0 -1 4194304 120 0 0 0 250 37 0 0 20 0 1 0";
    assert_eq!(parse_stat_ticks(stat), Some((250, 37)));
  }

  #[test]
  fn it_should_reject_truncated_stat() {
    assert_eq!(parse_stat_ticks("12 (sh) S 1 2 3"), None);
    assert_eq!(parse_stat_ticks("garbage"), None);
  }

  #[test]
  fn it_should_prefer_peak_memory() {
    let status = "Name:\tcat\nVmPeak:\t   10000 kB\nVmSize:\t    8000 kB\nVmExe:\t      100 kB\nVmLib:\t    1900 kB\n";
    assert_eq!(parse_status_memory(status), Some(8000));
  }

  #[test]
  fn it_should_fallback_to_current_size() {
    let status = "VmSize:\t    8000 kB\nVmExe:\t      100 kB\nVmLib:\t    1900 kB\n";
    assert_eq!(parse_status_memory(status), Some(6000));
  }

  #[test]
  fn it_should_report_unavailable_for_zombie() {
    let status = "Name:\tsh\nState:\tZ (zombie)\nThreads:\t1\n";
    assert_eq!(parse_status_memory(status), None);
  }

  #[test]
  fn it_should_read_own_usage() {
    let pid = Pid::this();
    assert!(read_cpu_time(pid).unwrap() >= 0.0);
    assert!(read_memory_peak(pid).unwrap() > 0);
  }

  #[test]
  fn it_should_return_none_for_missing_process() {
    let pid = Pid::from_raw(i32::MAX);
    assert_eq!(read_cpu_time(pid), None);
    assert_eq!(read_memory_peak(pid), None);
  }
}
