//! Process isolation core of a judging service.
//!
//! Launches an untrusted program with POSIX resource limits, dropped
//! credentials and optional syscall tracing, then reads its CPU time and
//! memory from `/proc`.

pub use error::{JudgeError, JudgeExit, Result};
pub use process::{create_process, create_shell_process, resolve_program, SetupFailure, SetupStep};
pub use report::{watch, RunReport};
pub use startup::StartupInfo;
pub use usage::{read_cpu_time, read_memory_peak};

pub mod fd;
pub mod io;
pub mod limit;
pub mod server;
pub mod signal;
pub mod startup;
pub mod usage;

mod error;
mod process;
mod report;
