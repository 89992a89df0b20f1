use std::convert::Infallible;
use std::ffi::CString;
use std::fmt::Display;
use std::fs::{File, OpenOptions};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};

use log::{debug, error, info};
use nix::fcntl::{fcntl, FcntlArg};
use nix::libc;
use nix::sys::ptrace;
use nix::sys::resource::Resource;
use nix::sys::signal::{raise, Signal};
use nix::unistd::{chdir, close, dup2, execv, fork, setgid, setuid, ForkResult, Gid, Pid, Uid};

use crate::error::{JudgeError, Result};
use crate::fd::close_inherited_fds;
use crate::limit::set_resource_limit;
use crate::startup::StartupInfo;

/// Shell used by [`create_shell_process`]
pub const SHELL: &str = "/bin/sh";

const STREAM_NAMES: [&str; 3] = ["stdin", "stdout", "stderr"];

/// One step of the child setup, listed in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupStep {
  Redirect,
  CloseFds,
  CpuLimit,
  MemoryLimit,
  OutputLimit,
  FileLimit,
  Chdir,
  SetGid,
  SetUid,
  ProcLimit,
  Trace,
  Exec,
}

/// Why the child gave up before running the target program
#[derive(Debug)]
pub struct SetupFailure {
  step: SetupStep,
  message: String,
}

impl SetupFailure {
  fn new<E: Display>(step: SetupStep, message: String, err: E) -> Self {
    SetupFailure {
      step,
      message: format!("{}: {}", message, err),
    }
  }

  pub fn step(&self) -> SetupStep {
    self.step
  }
}

impl Display for SetupFailure {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_fmt(format_args!("{:?} step fails, {}", self.step, self.message))
  }
}

/// Everything the child needs, prepared before fork
struct ChildPlan<'a> {
  program: CString,
  arguments: Vec<CString>,
  fds: [Option<RawFd>; 3],
  info: &'a StartupInfo,
}

fn into_c_string<S: AsRef<[u8]>>(value: S) -> Result<CString> {
  let value = value.as_ref();
  CString::new(value).map_err(|_| {
    JudgeError::argument(format!(
      "{} contains a nul byte",
      String::from_utf8_lossy(value)
    ))
  })
}

/// Open the redirection files, read-only for stdin and create / truncate for
/// stdout and stderr.
///
/// Files are opened close-on-exec; the child dups them onto 0 / 1 / 2, which
/// clears the flag on the copies.
fn open_redirects(info: &StartupInfo) -> Result<[Option<File>; 3]> {
  let mut files: [Option<File>; 3] = [None, None, None];
  for (i, filename) in info.filenames().into_iter().enumerate() {
    if let Some(filename) = filename {
      let mut options = OpenOptions::new();
      if i == 0 {
        options.read(true);
      } else {
        options.read(true).write(true).create(true).truncate(true);
      }
      let file = options.mode(0o777).open(filename).map_err(|err| {
        error!("Fail to open {} for {}: {}", filename.to_string_lossy(), STREAM_NAMES[i], err);
        // Files opened so far are closed when `files` is dropped
        JudgeError::Redirect(filename.clone(), err)
      })?;
      debug!("Open {} as {}", filename.to_string_lossy(), STREAM_NAMES[i]);
      files[i] = Some(file);
    }
  }
  Ok(files)
}

/// Launch `program` with the argument vector `arguments` (including
/// `argv[0]`) under the redirections, limits and identity of `info`.
///
/// On success the returned pid is a live process that owns its configured
/// descriptors, limits and credentials; waiting, timeouts and signalling are up
/// to the caller. If any step after fork fails the child is killed with
/// `SIGKILL` and never runs the target program.
pub fn create_process<P: AsRef<Path>, S: AsRef<str>>(
  program: P,
  arguments: &[S],
  info: &StartupInfo,
) -> Result<Pid> {
  let program_path = program.as_ref();
  let program = into_c_string(program_path.as_os_str().as_bytes())?;
  let arguments = arguments
    .iter()
    .map(|arg| into_c_string(arg.as_ref()))
    .collect::<Result<Vec<CString>>>()?;

  let files = open_redirects(info)?;
  let supplied = info.descriptors();
  let mut fds = [None; 3];
  for i in 0..3 {
    fds[i] = files[i].as_ref().map(|f| f.as_raw_fd()).or(supplied[i]);
  }

  let plan = ChildPlan {
    program,
    arguments,
    fds,
    info,
  };

  match unsafe { fork() } {
    Ok(ForkResult::Parent { child }) => {
      // The child holds its own copies, the parent ones are released here
      drop(files);
      info!(
        "Start running program {} as child process #{}",
        program_path.to_string_lossy(),
        child
      );
      Ok(child)
    }
    Ok(ForkResult::Child) => match plan.setup_and_exec() {
      Err(failure) => {
        error!("{}", failure);
        kill_self()
      }
      Ok(never) => match never {},
    },
    Err(errno) => {
      error!("Fail to fork: {}", errno);
      Err(JudgeError::Fork(errno))
    }
  }
}

/// Launch `sh -c <command>` under `info`.
///
/// The command string is handed to the shell as is, the caller is responsible
/// for what it contains.
pub fn create_shell_process(command: &str, info: &StartupInfo) -> Result<Pid> {
  create_process(SHELL, &["sh", "-c", command], info)
}

/// Terminate the current process in a way that cannot be caught
fn kill_self() -> ! {
  let _ = raise(Signal::SIGKILL);
  unsafe { libc::_exit(128 + libc::SIGKILL) }
}

impl<'a> ChildPlan<'a> {
  /// Runs in the forked child. Returns only on failure.
  fn setup_and_exec(&self) -> std::result::Result<Infallible, SetupFailure> {
    self.redirect()?;
    close_inherited_fds(3).map_err(|errno| {
      SetupFailure::new(SetupStep::CloseFds, "Fail to close inherited fds".into(), errno)
    })?;
    self.limits()?;
    if let Some(cwd) = &self.info.cwd {
      chdir(cwd.as_path()).map_err(|errno| {
        SetupFailure::new(
          SetupStep::Chdir,
          format!("Fail to change working directory to {}", cwd.to_string_lossy()),
          errno,
        )
      })?;
    }
    self.credentials()?;
    self.limit(
      SetupStep::ProcLimit,
      Resource::RLIMIT_NPROC,
      self.info.proc_limit,
      1,
      "process limit",
      "",
    )?;
    if self.info.trace {
      ptrace::traceme()
        .map_err(|errno| SetupFailure::new(SetupStep::Trace, "Fail to trace".into(), errno))?;
    }
    execv(&self.program, self.arguments.as_slice()).map_err(|errno| {
      SetupFailure::new(
        SetupStep::Exec,
        format!("Fail to execute command '{}'", self.program.to_string_lossy()),
        errno,
      )
    })
  }

  /// Move the requested descriptors onto 0 / 1 / 2 and close the originals.
  ///
  /// Sources that are themselves standard descriptors are first copied above
  /// 2, so crossed requests like stdout from 2 and stderr from 1 do not
  /// overwrite each other.
  fn redirect(&self) -> std::result::Result<(), SetupFailure> {
    let mut fds = self.fds;
    for fd in fds.iter_mut().flatten() {
      if *fd <= 2 {
        let source = *fd;
        *fd = fcntl(source, FcntlArg::F_DUPFD_CLOEXEC(3)).map_err(|errno| {
          SetupFailure::new(SetupStep::Redirect, format!("Fail to copy {}", source), errno)
        })?;
      }
    }
    for (target, fd) in fds.iter().enumerate() {
      if let Some(fd) = *fd {
        let target = target as RawFd;
        dup2(fd, target).map_err(|errno| {
          SetupFailure::new(
            SetupStep::Redirect,
            format!("Fail to dup {} to {}", fd, target),
            errno,
          )
        })?;
      }
    }
    let mut originals = fds.iter().flatten().copied().collect::<Vec<_>>();
    originals.sort_unstable();
    originals.dedup();
    for fd in originals {
      close(fd).map_err(|errno| {
        SetupFailure::new(SetupStep::Redirect, format!("Fail to close {}", fd), errno)
      })?;
    }
    Ok(())
  }

  /// CPU time, memory (data segment), output size and open files, in this order
  fn limits(&self) -> std::result::Result<(), SetupFailure> {
    let info = self.info;
    self.limit(SetupStep::CpuLimit, Resource::RLIMIT_CPU, info.time_limit, 1, "cpu limit", "s")?;
    self.limit(
      SetupStep::MemoryLimit,
      Resource::RLIMIT_DATA,
      info.memory_limit,
      1024,
      "memory limit",
      "k",
    )?;
    self.limit(
      SetupStep::OutputLimit,
      Resource::RLIMIT_FSIZE,
      info.output_limit,
      1024,
      "output limit",
      "k",
    )?;
    self.limit(SetupStep::FileLimit, Resource::RLIMIT_NOFILE, info.file_limit, 1, "file limit", "")
  }

  /// Install one limit, zero means unconstrained
  fn limit(
    &self,
    step: SetupStep,
    resource: Resource,
    value: u64,
    scale: u64,
    name: &str,
    unit: &str,
  ) -> std::result::Result<(), SetupFailure> {
    if value == 0 {
      return Ok(());
    }
    let message = || format!("Fail to set {} to {}{}", name, value, unit);
    let scaled = value
      .checked_mul(scale)
      .ok_or_else(|| SetupFailure::new(step, message(), "value overflows"))?;
    set_resource_limit(resource, scaled).map_err(|err| SetupFailure::new(step, message(), err))
  }

  /// Group first: once the uid is dropped the gid can no longer be changed
  fn credentials(&self) -> std::result::Result<(), SetupFailure> {
    let info = self.info;
    if info.gid != 0 {
      setgid(Gid::from_raw(info.gid)).map_err(|errno| {
        SetupFailure::new(SetupStep::SetGid, format!("Fail to set gid to {}", info.gid), errno)
      })?;
    }
    if info.uid != 0 {
      setuid(Uid::from_raw(info.uid)).map_err(|errno| {
        SetupFailure::new(SetupStep::SetUid, format!("Fail to set uid to {}", info.uid), errno)
      })?;
    }
    Ok(())
  }
}

/// Absolute program path for a shell-free launch, resolved against `PATH`
/// when `program` has no slash
pub fn resolve_program<P: AsRef<Path>>(program: P) -> Option<PathBuf> {
  let program = program.as_ref();
  if program.components().count() > 1 || program.is_absolute() {
    return Some(program.to_path_buf());
  }
  let paths = std::env::var_os("PATH")?;
  std::env::split_paths(&paths)
    .map(|dir| dir.join(program))
    .find(|candidate| candidate.is_file())
}
