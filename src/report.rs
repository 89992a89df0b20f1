use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use nix::errno::Errno;
use nix::libc::{self, STDOUT_FILENO};
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{isatty, Pid};

use crate::error::Result;
use crate::usage::{read_cpu_time, read_memory_peak};

/// Interval between two usage samples while the child runs
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Outcome of a launched program, collected by [`watch`]
#[derive(Debug, Clone)]
pub struct RunReport {
  status: Option<i32>,
  signal: Option<Signal>,
  time: Option<f64>,
  memory: Option<u64>,
  wall_time: f64,
  wall_killed: bool,
}

/// Whether `child` has terminated, without reaping it
fn has_exited(child: Pid) -> Result<bool> {
  let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
  let ret = unsafe {
    libc::waitid(
      libc::P_PID,
      child.as_raw() as libc::id_t,
      &mut info,
      libc::WEXITED | libc::WNOWAIT | libc::WNOHANG,
    )
  };
  if ret == -1 {
    return match Errno::last() {
      Errno::EINTR => Ok(false),
      errno => Err(errno.into()),
    };
  }
  Ok(unsafe { info.si_pid() } != 0)
}

/// Wait for `child` to terminate while sampling its usage, killing it once
/// `wall_limit` has elapsed.
///
/// Memory is sampled while the process runs, the CPU time is read from the
/// terminated process right before it is reaped.
pub fn watch(child: Pid, wall_limit: Option<Duration>) -> Result<RunReport> {
  let start = Instant::now();
  let mut memory: Option<u64> = None;
  let mut wall_killed = false;

  while !has_exited(child)? {
    if let Some(sample) = read_memory_peak(child) {
      memory = Some(memory.map_or(sample, |peak| peak.max(sample)));
    }
    if let Some(limit) = wall_limit {
      if !wall_killed && start.elapsed() >= limit {
        warn!("Child process #{} exceeds wall limit {:?}", child, limit);
        match kill(child, Signal::SIGKILL) {
          Ok(()) | Err(Errno::ESRCH) => {}
          Err(errno) => return Err(errno.into()),
        }
        wall_killed = true;
      }
    }
    thread::sleep(POLL_INTERVAL);
  }

  let time = read_cpu_time(child);
  let (status, signal) = loop {
    match waitpid(child, None) {
      Ok(WaitStatus::Exited(pid, status)) => {
        info!("Child process #{}. exited with status {}", pid, status);
        break (Some(status), None);
      }
      Ok(WaitStatus::Signaled(pid, signal, _)) => {
        info!("Child process #{}. is signaled by {}", pid, signal);
        break (None, Some(signal));
      }
      Ok(other) => debug!("Child process #{}. changes state {:?}", child, other),
      Err(Errno::EINTR) => continue,
      Err(errno) => return Err(errno.into()),
    }
  };

  Ok(RunReport {
    status,
    signal,
    time,
    memory,
    wall_time: start.elapsed().as_secs_f64(),
    wall_killed,
  })
}

impl RunReport {
  pub fn status(&self) -> Option<i32> {
    self.status
  }

  pub fn signal(&self) -> Option<Signal> {
    self.signal
  }

  /// CPU seconds, `None` when the measurement was unavailable
  pub fn time(&self) -> Option<f64> {
    self.time
  }

  /// Memory in KB, `None` when the measurement was unavailable
  pub fn memory(&self) -> Option<u64> {
    self.memory
  }

  pub fn wall_time(&self) -> f64 {
    self.wall_time
  }

  pub fn wall_killed(&self) -> bool {
    self.wall_killed
  }

  /// Print human readable text on a terminal and JSON otherwise
  pub fn report(&self, json: bool) {
    let is_tty = isatty(STDOUT_FILENO).unwrap_or(false);
    if is_tty && !json {
      self.report_human();
    } else {
      println!("{}", self.to_json());
    }
  }

  pub fn report_human(&self) {
    let status = self.status.map_or_else(
      || "\x1b[91m×\x1b[39m".to_string(),
      |v| format!("\x1b[9{}m{}\x1b[39m", if v == 0 { 2 } else { 1 }, v),
    );
    let signal = self.signal.map_or_else(
      || "\x1b[92m✓\x1b[39m".to_string(),
      |v| format!("\x1b[91m{}\x1b[39m", v),
    );
    let time = self.time.map_or_else(|| "-".to_string(), |v| format!("{:.3} s", v));
    let memory = self.memory.map_or_else(|| "-".to_string(), |v| format!("{} KB", v));

    println!();
    println!("\x1b[1mStatus\x1b[22m     {}", status);
    println!("\x1b[1mSignal\x1b[22m     {}", signal);
    println!("\x1b[1mTime\x1b[22m       {}", time);
    println!("\x1b[1mMemory\x1b[22m     {}", memory);
    println!("\x1b[1mWall\x1b[22m       {:.3} s{}", self.wall_time, if self.wall_killed { " (killed)" } else { "" });
    println!();
  }

  pub fn to_json(&self) -> String {
    let null = || "null".to_string();
    let status = self.status.map_or_else(null, |v| v.to_string());
    let signal = self.signal.map_or_else(null, |v| format!("\"{}\"", v));
    let time = self.time.map_or_else(null, |v| format!("{:.3}", v));
    let memory = self.memory.map_or_else(null, |v| v.to_string());

    let mut text = String::from("{\n");
    text.push_str("  \"ok\": true,\n");
    text.push_str(&format!("  \"status\": {},\n", status));
    text.push_str(&format!("  \"signal\": {},\n", signal));
    text.push_str(&format!("  \"time\": {},\n", time));
    text.push_str(&format!("  \"memory\": {},\n", memory));
    text.push_str(&format!("  \"wall_time\": {:.3},\n", self.wall_time));
    text.push_str(&format!("  \"wall_killed\": {}\n", self.wall_killed));
    text.push('}');
    text
  }
}
