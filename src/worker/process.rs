use crate::error::WorkerError;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use tracing::debug;

/// Write half of a worker's stdin pipe.
pub type PipeWriter = Box<dyn Write + Send>;
/// Read half of a worker's stdout pipe.
pub type PipeReader = Box<dyn Read + Send>;

/// Command line used to launch (and relaunch) a worker child process.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    pub program: String,
    pub args: Vec<String>,
    pub dir: PathBuf,
}

impl WorkerCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args,
            dir: dir.into(),
        }
    }

    /// The standard PHP worker invocation: `php <base>/<script>` with the
    /// base directory as the working directory.
    pub fn php(base_dir: &Path, php_binary: &str, worker_script: &str) -> Self {
        let script = base_dir.join(worker_script);
        Self {
            program: php_binary.to_string(),
            args: vec![script.to_string_lossy().into_owned()],
            dir: base_dir.to_path_buf(),
        }
    }

    /// Launch the child with piped stdin/stdout. Stderr is inherited so
    /// worker diagnostics land in the host log stream.
    pub(crate) fn spawn(&self) -> Result<(Child, PipeWriter, PipeReader), WorkerError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .current_dir(&self.dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(WorkerError::Spawn)?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| WorkerError::Spawn(io::Error::other("child stdin unavailable")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| WorkerError::Spawn(io::Error::other("child stdout unavailable")))?;

        debug!(pid = child.id(), program = %self.program, "worker process launched");
        Ok((child, Box::new(stdin), Box::new(stdout)))
    }
}

/// Locate the project base directory: the nearest ancestor of the current
/// directory holding a `Cargo.toml`, falling back to the current directory.
pub fn find_base_dir() -> PathBuf {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let mut dir = cwd.clone();
    loop {
        if dir.join("Cargo.toml").is_file() {
            return dir;
        }
        match dir.parent() {
            Some(parent) => dir = parent.to_path_buf(),
            None => return cwd,
        }
    }
}
