use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use crate::config::TranscoderSection;
use crate::exec::{render_command, CommandExecutor, SystemCommandExecutor};

#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("command failed ({command}): {stderr}")]
    CommandFailure {
        command: String,
        status: Option<i32>,
        stderr: String,
    },
}

/// One asset to convert into an HLS sub-playlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeJob {
    pub input: PathBuf,
    pub output: PathBuf,
    pub video_stream: u32,
    pub audio_streams: Vec<u32>,
    pub copy_video: bool,
}

#[async_trait::async_trait]
pub trait Transcoder: Send + Sync {
    async fn transcode(
        &self,
        job: &TranscodeJob,
        settings: &TranscoderSection,
    ) -> Result<(), TranscodeError>;
}

pub struct FfmpegTranscoder {
    executor: Arc<dyn CommandExecutor>,
}

impl FfmpegTranscoder {
    pub fn new(executor: Option<Arc<dyn CommandExecutor>>) -> Self {
        Self {
            executor: executor.unwrap_or_else(|| Arc::new(SystemCommandExecutor)),
        }
    }

    pub fn args(job: &TranscodeJob, settings: &TranscoderSection) -> Vec<String> {
        let mut args = vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            settings.log_level.clone(),
            "-y".to_string(),
            "-i".to_string(),
            job.input.to_string_lossy().to_string(),
            "-map".to_string(),
            format!("0:v:{}", job.video_stream),
        ];
        if job.copy_video {
            args.extend(["-c:v".to_string(), "copy".to_string()]);
        } else {
            args.extend([
                "-c:v".to_string(),
                settings.encoder.clone(),
                "-crf".to_string(),
                settings.crf.to_string(),
                "-pix_fmt".to_string(),
                settings.pix_fmt.clone(),
            ]);
        }
        args.extend(["-c:a".to_string(), settings.audio_codec.clone()]);
        for stream in &job.audio_streams {
            args.extend(["-map".to_string(), format!("0:a:{stream}")]);
        }
        args.extend([
            "-metadata".to_string(),
            "service_name=program".to_string(),
            "-f".to_string(),
            "hls".to_string(),
            "-hls_list_size".to_string(),
            "0".to_string(),
            "-hls_segment_type".to_string(),
            "mpegts".to_string(),
            job.output.to_string_lossy().to_string(),
        ]);
        args
    }
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self::new(None)
    }
}

#[async_trait::async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(
        &self,
        job: &TranscodeJob,
        settings: &TranscoderSection,
    ) -> Result<(), TranscodeError> {
        let program = PathBuf::from(&settings.ffmpeg);
        let args = Self::args(job, settings);
        debug!(command = %render_command(&program, &args), "transcoding asset");
        let mut command = Command::new(&program);
        command.args(&args);
        let output = self.executor.run(&mut command).await?;
        if !output.status.success() {
            return Err(TranscodeError::CommandFailure {
                command: render_command(&program, &args),
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }
        Ok(())
    }
}
