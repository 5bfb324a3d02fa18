mod overrides;
mod probe;

use std::collections::HashMap;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::config::StationConfig;
use crate::program::Program;

pub use overrides::{is_override_file, DirectoryOverrides, InheritedSettings};
pub use probe::{FfprobeProber, MediaInfo, MediaProber, ProbeError};

/// Container extensions picked up by the scan.
pub const VIDEO_EXTENSIONS: [&str; 7] = ["avi", "m4v", "mkv", "mlv", "mov", "mp4", "mpeg"];

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to walk {path}: {source}")]
    Walk {
        path: PathBuf,
        source: walkdir::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Asset {
    pub path: PathBuf,
    pub duration: Duration,
    pub video_streams: Vec<u32>,
    pub audio_streams: Vec<u32>,
    pub video_codec: Option<String>,
}

/// A file found by the walk, before its duration is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub path: PathBuf,
    pub video_streams: Vec<u32>,
    pub audio_streams: Vec<u32>,
}

impl Candidate {
    fn into_asset(self, info: MediaInfo) -> Asset {
        Asset {
            path: self.path,
            duration: info.duration,
            video_streams: self.video_streams,
            audio_streams: self.audio_streams,
            video_codec: info.video_codec,
        }
    }
}

/// Assets in airing order plus their running durations.
///
/// A scan produces an unordered catalog; `reorder` has to run before any
/// program is cut from it.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    assets: Vec<Asset>,
    cumulative: Vec<Duration>,
    ordered: bool,
}

impl Catalog {
    pub fn from_assets(assets: Vec<Asset>) -> Self {
        Self {
            assets,
            cumulative: Vec::new(),
            ordered: false,
        }
    }

    pub async fn scan<F>(
        root: &Path,
        ignore: F,
        prober: &dyn MediaProber,
    ) -> Result<Self, CatalogError>
    where
        F: Fn(&Path) -> bool + Send,
    {
        let candidates = Self::discover(root, ignore)?;
        let found = candidates.len();
        let mut assets = Vec::with_capacity(found);
        for candidate in candidates {
            match prober.probe(&candidate.path).await {
                Ok(info) => assets.push(candidate.into_asset(info)),
                Err(error) => {
                    debug!(path = %candidate.path.display(), %error, "dropping asset without duration");
                }
            }
        }
        info!(
            root = %root.display(),
            found,
            assets = assets.len(),
            "catalog scanned"
        );
        Ok(Self::from_assets(assets))
    }

    /// Scans the configured asset root, honouring the configured ignore-set.
    pub async fn scan_config(
        config: &StationConfig,
        prober: &dyn MediaProber,
    ) -> Result<Self, CatalogError> {
        let ignored = config.ignore_set();
        Self::scan(&config.data_dir(), |path| ignored.contains(path), prober).await
    }

    /// Walks `root` and returns every video file not excluded by `ignore` or by
    /// the skip names of an override file, with its inherited stream selection.
    pub fn discover<F>(root: &Path, ignore: F) -> Result<Vec<Candidate>, CatalogError>
    where
        F: Fn(&Path) -> bool,
    {
        let mut settings: HashMap<PathBuf, InheritedSettings> = HashMap::new();
        let mut candidates = Vec::new();
        let mut walker = WalkDir::new(root).sort_by_file_name().into_iter();
        while let Some(entry) = walker.next() {
            let entry = entry.map_err(|source| CatalogError::Walk {
                path: source
                    .path()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| root.to_path_buf()),
                source,
            })?;
            let path = entry.path();
            if entry.depth() == 0 {
                settings.insert(
                    path.to_path_buf(),
                    InheritedSettings::default().for_directory(path),
                );
                continue;
            }
            let Some(parent) = path.parent().and_then(|parent| settings.get(parent)) else {
                continue;
            };
            let name = entry.file_name().to_string_lossy();
            let skipped = parent.skips(&name) || ignore(path);

            if entry.file_type().is_dir() {
                if skipped {
                    debug!(path = %path.display(), "skipping directory");
                    walker.skip_current_dir();
                    continue;
                }
                let inherited = parent.for_directory(path);
                settings.insert(path.to_path_buf(), inherited);
            } else if !skipped && is_video_file(path) {
                candidates.push(Candidate {
                    path: path.to_path_buf(),
                    video_streams: parent.video.clone(),
                    audio_streams: parent.audio.clone(),
                });
            }
        }
        Ok(candidates)
    }

    /// Shuffles the assets and recomputes the running durations.
    pub fn reorder<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.assets.shuffle(rng);
        let mut total = Duration::ZERO;
        self.cumulative = self
            .assets
            .iter()
            .map(|asset| {
                total += asset.duration;
                total
            })
            .collect();
        self.ordered = true;
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    pub fn is_ordered(&self) -> bool {
        self.ordered
    }

    pub fn assets(&self) -> &[Asset] {
        &self.assets
    }

    pub fn slice(&self, range: Range<usize>) -> &[Asset] {
        let end = range.end.min(self.assets.len());
        let start = range.start.min(end);
        &self.assets[start..end]
    }

    /// Assets covered by `program`, clipped to this catalog.
    pub fn window(&self, program: &Program) -> &[Asset] {
        self.slice(program.range())
    }

    /// Running duration up to and including asset `index`.
    pub fn cumulative_duration(&self, index: usize) -> Option<Duration> {
        self.cumulative.get(index).copied()
    }

    pub fn total_duration(&self) -> Duration {
        self.assets.iter().map(|asset| asset.duration).sum()
    }
}

fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| VIDEO_EXTENSIONS.contains(&ext))
        .unwrap_or(false)
}
