use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use async_trait::async_trait;
use log::{debug, trace};
use tokio::process::Command;

use crate::app_config::ToolConfig;
use crate::errors::ToolError;

// @module: External analysis tool invocation and discovery

/// Directory name under the user data dir used for a local install
pub const LOCAL_INSTALL_DIR: &str = "loudsub";

#[cfg(windows)]
const FFMPEG_BINARY: &str = "ffmpeg.exe";
#[cfg(not(windows))]
const FFMPEG_BINARY: &str = "ffmpeg";

// @const: Timeout for the availability check
const VERSION_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of one tool invocation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolOutput {
    /// Exit code, `None` when killed or terminated by a signal
    pub exit_code: Option<i32>,
    /// Everything the tool wrote to stderr
    pub stderr: String,
    /// The process was killed because it exceeded its timeout
    pub timed_out: bool,
}

impl ToolOutput {
    /// Exited on its own with status 0
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// Runs the external analysis tool
#[async_trait]
pub trait ToolClient: Send + Sync + Debug {
    /// Run with `args`, capture stderr, give up after `timeout`
    ///
    /// A timeout is not an error: it is reported through `ToolOutput::timed_out`.
    async fn run(&self, args: &[String], timeout: Duration) -> Result<ToolOutput, ToolError>;
}

/// `ToolClient` that spawns a resolved ffmpeg executable
#[derive(Debug, Clone)]
pub struct FfmpegClient {
    executable: PathBuf,
}

impl FfmpegClient {
    pub fn new<P: Into<PathBuf>>(executable: P) -> Self {
        Self {
            executable: executable.into(),
        }
    }

    /// Resolve the executable with `locator` and wrap it
    pub fn locate(locator: &ToolLocator) -> Result<Self, ToolError> {
        locator.resolve().map(Self::new)
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// First line of `-version` output, e.g. `ffmpeg version 6.1.1 ...`
    pub async fn version(&self) -> Result<String, ToolError> {
        let mut command = Command::new(&self.executable);
        command
            .arg("-version")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let child = command.spawn().map_err(|e| self.spawn_error(e))?;

        let output = tokio::select! {
            result = child.wait_with_output() => result?,
            _ = tokio::time::sleep(VERSION_TIMEOUT) => {
                return Err(ToolError::Launch {
                    path: self.executable.clone(),
                    message: format!("-version did not answer within {:?}", VERSION_TIMEOUT),
                });
            }
        };

        if !output.status.success() {
            return Err(ToolError::Launch {
                path: self.executable.clone(),
                message: format!("-version exited with {}", output.status),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.lines().next().unwrap_or_default().trim().to_string())
    }

    fn spawn_error(&self, e: std::io::Error) -> ToolError {
        if e.kind() == std::io::ErrorKind::NotFound {
            ToolError::Unavailable {
                name: self.executable.display().to_string(),
                searched: self.executable.display().to_string(),
            }
        } else {
            ToolError::Launch {
                path: self.executable.clone(),
                message: e.to_string(),
            }
        }
    }
}

#[async_trait]
impl ToolClient for FfmpegClient {
    async fn run(&self, args: &[String], timeout: Duration) -> Result<ToolOutput, ToolError> {
        trace!("Running {} {}", self.executable.display(), args.join(" "));

        let mut command = Command::new(&self.executable);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command.spawn().map_err(|e| self.spawn_error(e))?;

        // Dropping the wait future on timeout drops the child, which kills it
        let output = tokio::select! {
            result = child.wait_with_output() => result?,
            _ = tokio::time::sleep(timeout) => {
                debug!("{} killed after {:?}", self.executable.display(), timeout);
                return Ok(ToolOutput {
                    exit_code: None,
                    stderr: String::new(),
                    timed_out: true,
                });
            }
        };

        Ok(ToolOutput {
            exit_code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            timed_out: false,
        })
    }
}

/// Finds the analysis tool executable
///
/// Search order: explicit override, process search path, the local install
/// directory, then a fixed list of common install locations.
#[derive(Debug, Clone)]
pub struct ToolLocator {
    binary: String,
    override_path: Option<PathBuf>,
    install_dir: Option<PathBuf>,
    well_known: Vec<PathBuf>,
}

impl ToolLocator {
    /// Locator for ffmpeg with the default install dir and common locations
    pub fn ffmpeg() -> Self {
        Self {
            binary: FFMPEG_BINARY.to_string(),
            override_path: None,
            install_dir: Self::default_install_dir(),
            well_known: Self::well_known_locations(),
        }
    }

    /// Locator built from the `tool` section of the configuration
    pub fn from_config(config: &ToolConfig) -> Self {
        let mut locator = Self::ffmpeg();
        if let Some(path) = &config.ffmpeg_path {
            locator = locator.with_override(path);
        }
        if let Some(dir) = &config.install_dir {
            locator = locator.with_install_dir(dir);
        }
        locator
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn with_override<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.override_path = Some(path.into());
        self
    }

    pub fn with_install_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.install_dir = Some(dir.into());
        self
    }

    pub fn with_well_known(mut self, locations: Vec<PathBuf>) -> Self {
        self.well_known = locations;
        self
    }

    /// `<data dir>/loudsub/ffmpeg`, where a host may unpack a download
    pub fn default_install_dir() -> Option<PathBuf> {
        dirs::data_dir().map(|dir| dir.join(LOCAL_INSTALL_DIR).join("ffmpeg"))
    }

    fn well_known_locations() -> Vec<PathBuf> {
        if cfg!(windows) {
            [
                r"C:\ffmpeg\bin\ffmpeg.exe",
                r"C:\Program Files\ffmpeg\bin\ffmpeg.exe",
                r"C:\Program Files (x86)\ffmpeg\bin\ffmpeg.exe",
                r"C:\tools\ffmpeg\bin\ffmpeg.exe",
                r"C:\bin\ffmpeg.exe",
            ]
            .iter()
            .map(PathBuf::from)
            .collect()
        } else {
            [
                "/usr/bin/ffmpeg",
                "/usr/local/bin/ffmpeg",
                "/opt/homebrew/bin/ffmpeg",
                "/opt/local/bin/ffmpeg",
                "/snap/bin/ffmpeg",
            ]
            .iter()
            .map(PathBuf::from)
            .collect()
        }
    }

    /// Candidates inside the install dir, in lookup order
    fn install_candidates(&self) -> Vec<PathBuf> {
        match &self.install_dir {
            Some(dir) => vec![dir.join("bin").join(&self.binary), dir.join(&self.binary)],
            None => Vec::new(),
        }
    }

    /// Resolve the executable path
    pub fn resolve(&self) -> Result<PathBuf, ToolError> {
        let mut searched = Vec::new();

        if let Some(path) = &self.override_path {
            if path.is_file() {
                debug!("Using configured tool path {}", path.display());
                return Ok(path.clone());
            }
            searched.push(path.display().to_string());
        }

        match which::which(&self.binary) {
            Ok(path) => {
                debug!("Found {} on PATH at {}", self.binary, path.display());
                return Ok(path);
            }
            Err(_) => searched.push("PATH".to_string()),
        }

        for candidate in self.install_candidates().into_iter().chain(self.well_known.iter().cloned()) {
            if candidate.is_file() {
                debug!("Found {} at {}", self.binary, candidate.display());
                return Ok(candidate);
            }
            searched.push(candidate.display().to_string());
        }

        Err(ToolError::Unavailable {
            name: self.binary.clone(),
            searched: searched.join(", "),
        })
    }
}
