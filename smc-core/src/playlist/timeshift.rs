use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

use super::{PlaylistError, PlaylistResult, VERSION_TAG};
use crate::station::PlayoutClock;

/// Rewrites a media playlist so players join `secs` seconds into it.
///
/// The version line is raised to 6, the first version that understands
/// `EXT-X-START`, and the start tag follows it directly.
pub fn shift_playlist(text: &str, secs: u64) -> String {
    let mut shifted = String::with_capacity(text.len() + 64);
    for line in text.split_inclusive('\n') {
        let body = line.trim_end_matches(['\r', '\n']);
        let tag = body.split_once(':').map(|(tag, _)| tag);
        if tag == Some(VERSION_TAG) {
            let ending = &line[body.len()..];
            let ending = if ending.is_empty() { "\n" } else { ending };
            shifted.push_str(VERSION_TAG);
            shifted.push_str(":6");
            shifted.push_str(ending);
            shifted.push_str(&format!("#EXT-X-START:TIME-OFFSET={secs},PRECISE=YES"));
            shifted.push_str(ending);
        } else {
            shifted.push_str(line);
        }
    }
    shifted
}

/// Writes the shifted copy of `source` to `dest`, replacing it atomically.
pub async fn time_shift(source: &Path, dest: &Path, secs: u64) -> PlaylistResult<String> {
    let text = fs::read_to_string(source)
        .await
        .map_err(|source_err| PlaylistError::Io {
            source: source_err,
            path: source.to_path_buf(),
        })?;
    let shifted = shift_playlist(&text, secs);

    let mut temp = dest.as_os_str().to_owned();
    temp.push(".tmp");
    let temp = PathBuf::from(temp);
    fs::write(&temp, &shifted)
        .await
        .map_err(|source| PlaylistError::Io {
            source,
            path: temp.clone(),
        })?;
    fs::rename(&temp, dest)
        .await
        .map_err(|source| PlaylistError::Io {
            source,
            path: dest.to_path_buf(),
        })?;
    Ok(shifted)
}

/// The join-now playlist: the live playlist shifted to the current playout position.
#[derive(Debug)]
pub struct JoinNowPlaylist {
    source: PathBuf,
    dest: PathBuf,
    clock: PlayoutClock,
    lock: Mutex<()>,
}

impl JoinNowPlaylist {
    pub fn new<S: Into<PathBuf>, D: Into<PathBuf>>(source: S, dest: D, clock: PlayoutClock) -> Self {
        Self {
            source: source.into(),
            dest: dest.into(),
            clock,
            lock: Mutex::new(()),
        }
    }

    pub fn dest(&self) -> &Path {
        &self.dest
    }

    /// Regenerates the destination for the current elapsed time and returns its text.
    pub async fn refresh(&self) -> PlaylistResult<String> {
        let _guard = self.lock.lock().await;
        let elapsed = self.clock.elapsed_secs();
        debug!(elapsed, dest = %self.dest.display(), "refreshing join-now playlist");
        time_shift(&self.source, &self.dest, elapsed).await
    }
}
