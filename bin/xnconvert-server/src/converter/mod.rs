//! XnConvert invocation.
//!
//! [`Converter::build_command`] turns an input path, an output path and an
//! option list into a [`ConversionCommand`] (program plus argv, no shell).
//! [`Converter::run`] waits for a free slot, runs the command under a
//! timeout and checks that the expected output file appeared.

pub mod admission;
pub mod options;

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Child;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use admission::Admission;
pub use options::{ConversionOptions, OptionsError};

/// Everything that can go wrong between spawning the converter and finding
/// its output on disk.
#[derive(Debug, Error)]
pub enum ConversionError {
    /// The wrapper or converter binary could not be started.
    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// Waiting on the child failed after it started.
    #[error("failed to wait for converter: {0}")]
    Wait(#[source] io::Error),

    /// The converter exited with a non-zero status.
    #[error("Command failed ({status}): {command}\n{stderr}")]
    Failed {
        command: String,
        status: ExitStatus,
        stderr: String,
    },

    /// The converter ran past the configured timeout and was killed.
    #[error("Command timed out after {timeout:?}: {command}")]
    TimedOut { command: String, timeout: Duration },

    /// The converter reported success but left no output file.
    #[error("output file '{}' was not created", .0.display())]
    OutputMissing(PathBuf),

    /// No converter slot freed up in time.
    #[error("no conversion slot became free within {waited:?}")]
    Busy { waited: Duration },
}

/// A fully assembled converter invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionCommand {
    program: String,
    args: Vec<String>,
    output: PathBuf,
}

impl ConversionCommand {
    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// The file the converter is expected to write.
    pub fn output(&self) -> &Path {
        &self.output
    }
}

impl fmt::Display for ConversionCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Builds and runs converter commands.
#[derive(Debug)]
pub struct Converter {
    wrapper: Vec<String>,
    program: String,
    default_options: ConversionOptions,
    timeout: Duration,
    admission: Admission,
}

impl Converter {
    pub fn new(
        wrapper: Vec<String>,
        program: impl Into<String>,
        default_options: &str,
        timeout: Duration,
        admission: Admission,
    ) -> Self {
        Self {
            wrapper,
            program: program.into(),
            default_options: ConversionOptions::trusted(default_options),
            timeout,
            admission,
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(
            cfg.wrapper.clone(),
            cfg.converter_bin.clone(),
            &cfg.default_options,
            cfg.conversion_timeout,
            Admission::new(cfg.max_concurrent, cfg.queue_timeout),
        )
    }

    /// Assemble `[wrapper...] xnconvert -input IN -output OUT OPTIONS... -overwrite`.
    ///
    /// `options` replaces the default option list when it is present and not
    /// empty. `-overwrite` is always appended.
    pub fn build_command(
        &self,
        input: &Path,
        output: &Path,
        options: Option<&ConversionOptions>,
    ) -> ConversionCommand {
        let options = options
            .filter(|o| !o.is_empty())
            .unwrap_or(&self.default_options);

        let mut argv: Vec<String> = self.wrapper.clone();
        argv.push(self.program.clone());
        argv.extend([
            "-input".to_owned(),
            input.to_string_lossy().into_owned(),
            "-output".to_owned(),
            output.to_string_lossy().into_owned(),
        ]);
        argv.extend(options.as_args().iter().cloned());
        argv.push("-overwrite".to_owned());

        let program = argv.remove(0);
        ConversionCommand {
            program,
            args: argv,
            output: output.to_path_buf(),
        }
    }

    /// Run `command` to completion and confirm its output exists.
    pub async fn run(&self, command: &ConversionCommand) -> Result<(), ConversionError> {
        debug!(free_slots = self.admission.available(), "waiting for a conversion slot");
        let permit = self.admission.acquire().await?;
        let result = self.invoke(command).await;
        drop(permit);
        result?;

        if !tokio::fs::try_exists(command.output()).await.unwrap_or(false) {
            error!(output = %command.output().display(), "converter exited 0 but produced no output");
            return Err(ConversionError::OutputMissing(command.output().to_path_buf()));
        }
        Ok(())
    }

    async fn invoke(&self, command: &ConversionCommand) -> Result<(), ConversionError> {
        debug!(command = %command, "spawning converter");

        let mut cmd = tokio::process::Command::new(command.program());
        cmd.args(command.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // The wrapper forks the converter; its own group lets a timeout reach every descendant.
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|source| {
            error!(program = %command.program(), error = %source, "failed to spawn converter");
            ConversionError::Spawn {
                program: command.program().to_owned(),
                source,
            }
        })?;
        let pid = child.id();

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let finished = async {
            let (status, _, stderr) = tokio::join!(child.wait(), drain(stdout), drain(stderr));
            status.map(|status| (status, stderr))
        };
        let waited = tokio::time::timeout(self.timeout, finished).await;

        let (status, stderr) = match waited {
            Ok(result) => result.map_err(ConversionError::Wait)?,
            Err(_) => {
                kill_tree(pid, &mut child).await;
                error!(command = %command, timeout = ?self.timeout, "converter timed out; killed");
                return Err(ConversionError::TimedOut {
                    command: command.to_string(),
                    timeout: self.timeout,
                });
            }
        };

        if status.success() {
            info!(output = %command.output().display(), "conversion finished");
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&stderr).trim().to_owned();
        error!(status = %status, stderr = %stderr, "converter failed");
        Err(ConversionError::Failed {
            command: command.to_string(),
            status,
            stderr,
        })
    }
}

async fn drain<R: AsyncRead + Unpin>(pipe: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        if let Err(e) = pipe.read_to_end(&mut buf).await {
            warn!(error = %e, "failed to read converter output");
        }
    }
    buf
}

/// SIGKILL the child's process group, then kill and reap the child itself.
async fn kill_tree(pid: Option<u32>, child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = pid.and_then(|p| libc::pid_t::try_from(p).ok()) {
            // SAFETY: killpg only sends a signal and touches no memory.
            if unsafe { libc::killpg(pid, libc::SIGKILL) } != 0 {
                let err = io::Error::last_os_error();
                if err.raw_os_error() != Some(libc::ESRCH) {
                    warn!(pid, error = %err, "failed to kill converter process group");
                }
            }
        }
    }
    #[cfg(not(unix))]
    let _ = pid;

    if let Err(e) = child.kill().await {
        debug!(error = %e, "converter already exited");
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────
