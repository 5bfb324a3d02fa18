use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs;
use tracing::{debug, info};

use super::{
    PlaylistError, PlaylistResult, TranscodeJob, Transcoder, DISCONTINUITY_TAG, ENDLIST_TAG,
    EXTINF_TAG,
};
use crate::catalog::Catalog;
use crate::config::{StationConfig, TranscoderSection};
use crate::program::Program;

const CLEANED_EXTENSIONS: [&str; 2] = ["ts", "m3u8"];

/// Seam the scheduler renders through.
#[async_trait::async_trait]
pub trait ProgramRenderer: Send + Sync {
    async fn render(
        &self,
        catalog: &Catalog,
        program: &Program,
        config: &StationConfig,
    ) -> PlaylistResult<()>;
}

/// Sub-playlist for the asset at `index`: `<stem>_<index>_part.m3u8` next to `output`.
pub fn sub_playlist_path(output: &Path, index: usize) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| "program".to_string());
    output.with_file_name(format!("{stem}_{index}_part.m3u8"))
}

/// Appends the sub-playlist of asset `index` (out of `count`) to `merged`.
///
/// Only the first asset contributes header tags. Every end marker but the last
/// becomes a discontinuity so the player resets its decoder between assets.
pub fn merge_sub_playlist(merged: &mut String, sub: &str, index: usize, count: usize) {
    let last = index + 1 == count;
    for line in sub.lines() {
        if line.is_empty() {
            continue;
        }
        if line == ENDLIST_TAG {
            merged.push_str(if last { ENDLIST_TAG } else { DISCONTINUITY_TAG });
            merged.push('\n');
            continue;
        }
        if index != 0 && line.starts_with("#EXT") && !line.starts_with(EXTINF_TAG) {
            continue;
        }
        merged.push_str(line);
        merged.push('\n');
    }
}

pub struct PlaylistStitcher {
    transcoder: Arc<dyn Transcoder>,
}

impl PlaylistStitcher {
    pub fn new(transcoder: Arc<dyn Transcoder>) -> Self {
        Self { transcoder }
    }

    /// Transcodes every asset of `program` and writes the merged playlist to `output`.
    pub async fn render_program(
        &self,
        catalog: &Catalog,
        program: &Program,
        settings: &TranscoderSection,
        output: &Path,
    ) -> PlaylistResult<()> {
        let assets = catalog.window(program);
        if assets.is_empty() {
            return Err(PlaylistError::EmptyWindow);
        }
        let audio_len = assets
            .iter()
            .map(|asset| asset.audio_streams.len())
            .min()
            .unwrap_or(0);

        let mut merged = String::new();
        for (index, asset) in assets.iter().enumerate() {
            let job = TranscodeJob {
                input: asset.path.clone(),
                output: sub_playlist_path(output, index),
                video_stream: asset.video_streams.first().copied().unwrap_or(0),
                audio_streams: asset.audio_streams.iter().take(audio_len).copied().collect(),
                copy_video: asset.video_codec.as_deref() == Some(settings.target_codec.as_str()),
            };
            debug!(
                input = %job.input.display(),
                output = %job.output.display(),
                copy_video = job.copy_video,
                "rendering asset"
            );
            self.transcoder.transcode(&job, settings).await?;
            let sub = fs::read_to_string(&job.output)
                .await
                .map_err(|source| PlaylistError::Io {
                    source,
                    path: job.output.clone(),
                })?;
            merge_sub_playlist(&mut merged, &sub, index, assets.len());
        }

        let partial = partial_path(output);
        fs::write(&partial, merged)
            .await
            .map_err(|source| PlaylistError::Io {
                source,
                path: partial.clone(),
            })?;
        fs::rename(&partial, output)
            .await
            .map_err(|source| PlaylistError::Io {
                source,
                path: output.to_path_buf(),
            })?;
        info!(output = %output.display(), %program, assets = assets.len(), "program rendered");
        Ok(())
    }
}

#[async_trait::async_trait]
impl ProgramRenderer for PlaylistStitcher {
    async fn render(
        &self,
        catalog: &Catalog,
        program: &Program,
        config: &StationConfig,
    ) -> PlaylistResult<()> {
        let dir = config.program_dir();
        fs::create_dir_all(&dir)
            .await
            .map_err(|source| PlaylistError::Io {
                source,
                path: dir.clone(),
            })?;
        clean_program_dir(&dir).await?;
        self.render_program(catalog, program, &config.transcoder, &config.live_playlist())
            .await
    }
}

fn partial_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_owned();
    name.push(".partial");
    PathBuf::from(name)
}

/// Removes segments and playlists left over from the previous cycle.
async fn clean_program_dir(dir: &Path) -> PlaylistResult<()> {
    let io_error = |source| PlaylistError::Io {
        source,
        path: dir.to_path_buf(),
    };
    let mut entries = fs::read_dir(dir).await.map_err(io_error)?;
    let mut removed = 0usize;
    while let Some(entry) = entries.next_entry().await.map_err(io_error)? {
        let path = entry.path();
        let stale = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| CLEANED_EXTENSIONS.contains(&ext))
            .unwrap_or(false);
        if stale && entry.file_type().await.map(|kind| kind.is_file()).unwrap_or(false) {
            fs::remove_file(&path)
                .await
                .map_err(|source| PlaylistError::Io {
                    source,
                    path: path.clone(),
                })?;
            removed += 1;
        }
    }
    debug!(dir = %dir.display(), removed, "program directory cleaned");
    Ok(())
}
