use std::env;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use flexi_logger::{DeferredNow, ErrorChannel, FileSpec, Logger};
use log::{info, Record};

use judgeproc::{
  create_process, create_shell_process, resolve_program, watch, JudgeError, JudgeExit, StartupInfo,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Run a program under judge resource limits", long_about = None)]
struct Cli {
  /// CPU time limit (unit: s, 0 for unlimited)
  #[arg(short, long, default_value_t = 0)]
  time: u64,

  /// Memory limit (unit: KB, 0 for unlimited)
  #[arg(short, long, default_value_t = 0)]
  memory: u64,

  /// Output file size limit (unit: KB, 0 for unlimited)
  #[arg(long, default_value_t = 0)]
  output: u64,

  /// Max number of open files (0 for unlimited)
  #[arg(long, default_value_t = 0)]
  files: u64,

  /// Max number of processes (0 for unlimited)
  #[arg(long, default_value_t = 0)]
  processes: u64,

  /// Wall clock limit (unit: s)
  #[arg(long)]
  wall: Option<u64>,

  /// Working directory of the program
  #[arg(long)]
  cwd: Option<PathBuf>,

  #[arg(long, default_value_t = 0)]
  uid: u32,

  #[arg(long, default_value_t = 0)]
  gid: u32,

  /// Run as the current user
  #[arg(long, default_value_t = false)]
  user: bool,

  #[arg(long)]
  stdin: Option<PathBuf>,

  #[arg(long)]
  stdout: Option<PathBuf>,

  #[arg(long)]
  stderr: Option<PathBuf>,

  /// Always report in JSON format
  #[arg(long, default_value_t = false)]
  json: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
  #[command(about = "Run program with arguments")]
  Run {
    #[arg(help = "Program")]
    program: PathBuf,

    #[arg(help = "Arguments", trailing_var_arg = true, allow_hyphen_values = true)]
    arguments: Vec<String>,
  },

  #[command(about = "Run a command with /bin/sh -c")]
  Shell {
    #[arg(help = "Command")]
    command: String,
  },
}

impl Cli {
  fn startup_info(&self) -> StartupInfo {
    let mut info = StartupInfo::new();
    info
      .set_stdin(self.stdin.clone())
      .set_stdout(self.stdout.clone())
      .set_stderr(self.stderr.clone())
      .time_limit(self.time)
      .memory_limit(self.memory)
      .output_limit(self.output)
      .file_limit(self.files)
      .proc_limit(self.processes)
      .uid(self.uid)
      .gid(self.gid);
    if self.user {
      info.current_user();
    }
    if let Some(cwd) = &self.cwd {
      info.cwd(cwd);
    }
    info
  }
}

/// A logline-formatter that produces log lines like <br>
/// ```[datetime: INFO] Start running program /bin/true as child process #42```
pub fn default_format(
  w: &mut dyn std::io::Write,
  now: &mut DeferredNow,
  record: &Record,
) -> Result<(), std::io::Error> {
  write!(
    w,
    "[{}: {:5}] {}",
    now.format("%Y-%m-%d %H:%M:%S"),
    record.level(),
    record.args()
  )
}

fn start(cli: Cli) -> Result<(), JudgeError> {
  let _logger = Logger::try_with_env_or_str("judgeproc=info")?
    .log_to_file(
      FileSpec::default()
        .directory(env::var("LOG_DIR").unwrap_or("./logs/".into()))
        .basename("judgeproc")
        .discriminant(format!("{}", chrono::offset::Local::now().format("%Y-%m-%d")))
        .suppress_timestamp(),
    )
    .append()
    // A failing child still logs after its stderr became the program's stderr
    .error_channel(ErrorChannel::DevNull)
    .format_for_files(default_format)
    .start()?;

  info!("Start running judgeproc");

  let info = cli.startup_info();
  let child = match &cli.command {
    Commands::Run { program, arguments } => {
      let path = resolve_program(program).ok_or_else(|| {
        JudgeError::cli(format!("Can not find program {}", program.to_string_lossy()))
      })?;
      let argv0 = program.to_string_lossy().to_string();
      let argv = [vec![argv0], arguments.clone()].concat();
      create_process(path, argv.as_slice(), &info)?
    }
    Commands::Shell { command } => create_shell_process(command, &info)?,
  };

  let report = watch(child, cli.wall.map(Duration::from_secs))?;
  report.report(cli.json);

  info!("Running judgeproc finished");

  Ok(())
}

fn main() -> JudgeExit {
  let cli = Cli::parse();
  match start(cli) {
    Ok(()) => JudgeExit::Ok,
    Err(err) => JudgeExit::Err(err),
  }
}
