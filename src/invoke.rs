use std::env;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use chrono::Utc;
use tracing::{debug, info};

use crate::error::{PipelineError, PipelineResult};

/// One external command plus the files it promises to write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub program: String,
    pub args: Vec<String>,
    pub outputs: Vec<PathBuf>,
}

impl ToolInvocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// `--flag value` pair.
    pub fn param(self, flag: &str, value: impl fmt::Display) -> Self {
        self.arg(flag).arg(value.to_string())
    }

    pub fn path(self, flag: &str, path: &Path) -> Self {
        self.arg(flag).arg(path.to_string_lossy().to_string())
    }

    /// Like [`path`](Self::path) but also records `path` as an output that
    /// must exist once the command succeeds.
    pub fn output(mut self, flag: &str, path: &Path) -> Self {
        self.outputs.push(path.to_path_buf());
        self.path(flag, path)
    }

    /// Declares an output the command writes implicitly (e.g. inside an
    /// output directory).
    pub fn produces(mut self, path: &Path) -> Self {
        self.outputs.push(path.to_path_buf());
        self
    }

    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(shell_quote)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for ToolInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command_line())
    }
}

fn shell_quote(arg: &str) -> String {
    if !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c))
    {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// Runs invocations and reports their exit code (`None` when killed by a
/// signal). A non-zero code is not an error here; the caller decides.
pub trait ToolRunner {
    fn run(
        &mut self,
        stage: &'static str,
        invocation: &ToolInvocation,
        log_path: &Path,
    ) -> PipelineResult<Option<i32>>;
}

/// Spawns the real process, teeing stdout and stderr to the console and an
/// append-mode log file.
#[derive(Debug, Default, Clone)]
pub struct SubprocessRunner;

impl ToolRunner for SubprocessRunner {
    fn run(
        &mut self,
        stage: &'static str,
        invocation: &ToolInvocation,
        log_path: &Path,
    ) -> PipelineResult<Option<i32>> {
        let command_line = invocation.command_line();
        let log = open_log(log_path)?;
        write_log(&log, log_path, &format!("[{}] $ {command_line}", Utc::now().to_rfc3339()))?;

        info!(stage, command = %command_line, "Running external tool");
        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| PipelineError::ToolSpawn {
                stage,
                command: command_line.clone(),
                source,
            })?;

        let mut pumps = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            pumps.push(tee(stdout, log.clone(), false));
        }
        if let Some(stderr) = child.stderr.take() {
            pumps.push(tee(stderr, log.clone(), true));
        }

        let status = child
            .wait()
            .map_err(|source| PipelineError::ToolSpawn {
                stage,
                command: command_line.clone(),
                source,
            })?;
        for pump in pumps {
            let _ = pump.join();
        }

        let code = status.code();
        write_log(
            &log,
            log_path,
            &format!(
                "[{}] exit {}",
                Utc::now().to_rfc3339(),
                code.map(|c| c.to_string()).unwrap_or_else(|| "signal".into())
            ),
        )?;
        debug!(stage, ?code, "External tool finished");
        Ok(code)
    }
}

fn open_log(path: &Path) -> PipelineResult<Arc<Mutex<File>>> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|err| PipelineError::io(parent, err))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|err| PipelineError::io(path, err))?;
    Ok(Arc::new(Mutex::new(file)))
}

fn write_log(log: &Arc<Mutex<File>>, path: &Path, line: &str) -> PipelineResult<()> {
    let mut guard = log
        .lock()
        .map_err(|_| PipelineError::io(path, io::Error::other("log file lock poisoned")))?;
    writeln!(guard, "{line}").map_err(|err| PipelineError::io(path, err))
}

fn tee<R>(reader: R, log: Arc<Mutex<File>>, to_stderr: bool) -> JoinHandle<()>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {}
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
            // Invalid UTF-8 is logged lossily; the pipe is drained to EOF.
            let line = String::from_utf8_lossy(&buf);
            let line = line.trim_end_matches(['\n', '\r']);
            if to_stderr {
                eprintln!("{line}");
            } else {
                println!("{line}");
            }
            if let Ok(mut file) = log.lock() {
                let _ = writeln!(file, "{line}");
            }
        }
    })
}

/// True when `program` resolves to an executable, either directly (paths)
/// or through `PATH`. On Windows the `PATHEXT` extensions are tried too.
pub fn program_on_path(program: &str) -> bool {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return executable_candidates(candidate).iter().any(|path| is_executable(path));
    }
    env::var_os("PATH")
        .map(|paths| {
            env::split_paths(&paths).any(|dir| {
                executable_candidates(&dir.join(program))
                    .iter()
                    .any(|path| is_executable(path))
            })
        })
        .unwrap_or(false)
}

#[cfg(windows)]
fn executable_candidates(path: &Path) -> Vec<PathBuf> {
    let mut candidates = vec![path.to_path_buf()];
    if path.extension().is_none() {
        let exts = env::var("PATHEXT").unwrap_or_else(|_| ".COM;.EXE;.BAT;.CMD".into());
        candidates.extend(
            exts.split(';')
                .filter(|ext| !ext.is_empty())
                .map(|ext| path.with_extension(ext.trim_start_matches('.'))),
        );
    }
    candidates
}

#[cfg(not(windows))]
fn executable_candidates(path: &Path) -> Vec<PathBuf> {
    vec![path.to_path_buf()]
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
