mod stitch;
mod timeshift;
mod transcoder;

use std::path::PathBuf;

use thiserror::Error;

pub use stitch::{merge_sub_playlist, sub_playlist_path, PlaylistStitcher, ProgramRenderer};
pub use timeshift::{shift_playlist, time_shift, JoinNowPlaylist};
pub use transcoder::{FfmpegTranscoder, TranscodeError, TranscodeJob, Transcoder};

pub const ENDLIST_TAG: &str = "#EXT-X-ENDLIST";
pub const DISCONTINUITY_TAG: &str = "#EXT-X-DISCONTINUITY";
pub const EXTINF_TAG: &str = "#EXTINF";
pub const VERSION_TAG: &str = "#EXT-X-VERSION";

#[derive(Debug, Error)]
pub enum PlaylistError {
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("transcode failed: {0}")]
    Transcode(#[from] TranscodeError),
    #[error("program window is empty")]
    EmptyWindow,
}

pub type PlaylistResult<T> = std::result::Result<T, PlaylistError>;
