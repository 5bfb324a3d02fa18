use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;

use crate::exec::{render_command, CommandExecutor, SystemCommandExecutor};

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("command failed ({command}): {stderr}")]
    CommandFailure {
        command: String,
        status: Option<i32>,
        stderr: String,
    },
    #[error("no usable duration for {path}")]
    MissingDuration { path: PathBuf },
}

#[derive(Debug, Clone, PartialEq)]
pub struct MediaInfo {
    pub duration: Duration,
    pub video_codec: Option<String>,
}

#[async_trait::async_trait]
pub trait MediaProber: Send + Sync {
    async fn probe(&self, path: &Path) -> Result<MediaInfo, ProbeError>;
}

pub struct FfprobeProber {
    ffprobe: PathBuf,
    executor: Arc<dyn CommandExecutor>,
}

impl FfprobeProber {
    pub fn new<P: Into<PathBuf>>(ffprobe: P, executor: Option<Arc<dyn CommandExecutor>>) -> Self {
        Self {
            ffprobe: ffprobe.into(),
            executor: executor.unwrap_or_else(|| Arc::new(SystemCommandExecutor)),
        }
    }

    fn args(path: &Path) -> Vec<String> {
        vec![
            "-v".to_string(),
            "error".to_string(),
            "-select_streams".to_string(),
            "v:0".to_string(),
            "-show_entries".to_string(),
            "stream=codec_name:format=duration".to_string(),
            "-of".to_string(),
            "default=noprint_wrappers=1".to_string(),
            path.to_string_lossy().to_string(),
        ]
    }

    /// Reads the `key=value` lines ffprobe prints for the requested entries.
    pub fn parse_output(stdout: &str) -> Option<MediaInfo> {
        let mut duration = None;
        let mut video_codec = None;
        for line in stdout.lines() {
            match line.trim().split_once('=') {
                Some(("duration", value)) => {
                    duration = value
                        .trim()
                        .parse::<f64>()
                        .ok()
                        .and_then(|secs| Duration::try_from_secs_f64(secs).ok());
                }
                Some(("codec_name", value)) if video_codec.is_none() => {
                    let value = value.trim();
                    if !value.is_empty() {
                        video_codec = Some(value.to_string());
                    }
                }
                _ => {}
            }
        }
        duration.map(|duration| MediaInfo {
            duration,
            video_codec,
        })
    }
}

impl std::fmt::Debug for FfprobeProber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FfprobeProber")
            .field("ffprobe", &self.ffprobe)
            .finish()
    }
}

#[async_trait::async_trait]
impl MediaProber for FfprobeProber {
    async fn probe(&self, path: &Path) -> Result<MediaInfo, ProbeError> {
        let args = Self::args(path);
        let mut command = Command::new(&self.ffprobe);
        command.args(&args);
        let output = self.executor.run(&mut command).await?;
        if !output.status.success() {
            return Err(ProbeError::CommandFailure {
                command: render_command(&self.ffprobe, &args),
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }
        Self::parse_output(&String::from_utf8_lossy(&output.stdout)).ok_or_else(|| {
            ProbeError::MissingDuration {
                path: path.to_path_buf(),
            }
        })
    }
}
