use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ConfigError, Result};

pub const PROGRAM_DIR_NAME: &str = "program";
pub const LIVE_PLAYLIST_NAME: &str = "program.m3u8";
pub const JOIN_NOW_PLAYLIST_NAME: &str = "now.m3u8";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct StationConfig {
    pub schedule: ScheduleSection,
    pub paths: PathsSection,
    #[serde(default)]
    pub transcoder: TranscoderSection,
    #[serde(skip)]
    base_dir: PathBuf,
}

impl StationConfig {
    /// Default configuration rooted next to `path`.
    pub fn initial<P: AsRef<Path>>(path: P) -> Self {
        let base_dir = base_dir_of(path.as_ref());
        Self {
            schedule: ScheduleSection::default(),
            paths: PathsSection::default(),
            transcoder: TranscoderSection::default(),
            base_dir,
        }
    }

    pub fn with_base_dir<P: Into<PathBuf>>(mut self, base_dir: P) -> Self {
        self.base_dir = base_dir.into();
        self
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn resolve_path<P: AsRef<Path>>(&self, candidate: P) -> PathBuf {
        let path = candidate.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    pub fn data_dir(&self) -> PathBuf {
        self.resolve_path(&self.paths.data_dir)
    }

    pub fn static_dir(&self) -> PathBuf {
        self.resolve_path(&self.paths.static_dir)
    }

    pub fn program_dir(&self) -> PathBuf {
        self.static_dir().join(PROGRAM_DIR_NAME)
    }

    pub fn live_playlist(&self) -> PathBuf {
        self.program_dir().join(LIVE_PLAYLIST_NAME)
    }

    pub fn join_now_playlist(&self) -> PathBuf {
        self.program_dir().join(JOIN_NOW_PLAYLIST_NAME)
    }

    /// Slot length a program has to fill.
    pub fn slot_duration(&self) -> std::time::Duration {
        self.schedule.duration()
    }

    /// Resolved ignore-set. Relative entries are taken from the asset root.
    pub fn ignore_set(&self) -> HashSet<PathBuf> {
        let data_dir = self.data_dir();
        self.paths
            .ignore
            .iter()
            .map(|entry| {
                let entry = entry.trim_matches('"');
                let path = Path::new(entry);
                if path.is_absolute() {
                    path.to_path_buf()
                } else {
                    data_dir.join(path)
                }
            })
            .collect()
    }

    fn validate(&self, path: &Path) -> Result<()> {
        let invalid = |reason: &str| ConfigError::Invalid {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        };
        if self.schedule.duration_minutes == 0 {
            return Err(invalid("schedule.duration_minutes must be positive"));
        }
        if self.schedule.period_hours == 0 {
            return Err(invalid("schedule.period_hours must be positive"));
        }
        if self.paths.data_dir.trim().is_empty() {
            return Err(invalid("paths.data_dir must not be empty"));
        }
        if self.paths.static_dir.trim().is_empty() {
            return Err(invalid("paths.static_dir must not be empty"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleSection {
    #[serde(with = "time_of_day")]
    pub start: NaiveTime,
    pub duration_minutes: u64,
    #[serde(default = "default_period_hours")]
    pub period_hours: u64,
}

impl Default for ScheduleSection {
    fn default() -> Self {
        Self {
            start: NaiveTime::from_hms_opt(8, 0, 0).unwrap_or_default(),
            duration_minutes: 180,
            period_hours: default_period_hours(),
        }
    }
}

fn default_period_hours() -> u64 {
    24
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsSection {
    pub data_dir: String,
    pub static_dir: String,
    #[serde(default)]
    pub ignore: Vec<String>,
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            data_dir: "data".to_string(),
            static_dir: "static".to_string(),
            ignore: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscoderSection {
    pub ffmpeg: String,
    pub ffprobe: String,
    pub target_codec: String,
    pub encoder: String,
    pub crf: u8,
    pub pix_fmt: String,
    pub audio_codec: String,
    pub log_level: String,
}

impl Default for TranscoderSection {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
            target_codec: "h264".to_string(),
            encoder: "libx264".to_string(),
            crf: 17,
            pix_fmt: "yuv420p".to_string(),
            audio_codec: "aac".to_string(),
            log_level: "error".to_string(),
        }
    }
}

mod time_of_day {
    use chrono::NaiveTime;
    use serde::{de, Deserialize, Deserializer, Serializer};

    const FORMATS: [&str; 2] = ["%H:%M:%S", "%H:%M"];

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format("%H:%M:%S").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        FORMATS
            .iter()
            .find_map(|format| NaiveTime::parse_from_str(raw.trim(), format).ok())
            .ok_or_else(|| de::Error::custom(format!("invalid time of day `{raw}`, expected HH:MM")))
    }
}

fn base_dir_of(path: &Path) -> PathBuf {
    path.parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

pub fn load_station_config<P: AsRef<Path>>(path: P) -> Result<StationConfig> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    let config: StationConfig = toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })?;
    let config = config.with_base_dir(base_dir_of(path));
    config.validate(path)?;
    Ok(config)
}

/// Loads `path`, writing the default configuration first when it does not exist yet.
pub fn load_or_init_station_config<P: AsRef<Path>>(path: P) -> Result<StationConfig> {
    let path = path.as_ref();
    if !path.exists() {
        info!(path = %path.display(), "config file does not exist, writing defaults");
        let config = StationConfig::initial(path);
        write_station_config(path, &config)?;
        return Ok(config);
    }
    load_station_config(path)
}

pub fn write_station_config<P: AsRef<Path>>(path: P, config: &StationConfig) -> Result<()> {
    let path = path.as_ref();
    let content = toml::to_string_pretty(config).map_err(|source| ConfigError::Serialize {
        source,
        path: path.to_path_buf(),
    })?;
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
            source,
            path: parent.to_path_buf(),
        })?;
    }
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })
}
