pub mod catalog;
pub mod config;
pub mod error;
pub mod exec;
pub mod playlist;
pub mod program;
pub mod schedule;
pub mod station;

pub use catalog::{Asset, Catalog, CatalogError, FfprobeProber, MediaInfo, MediaProber, ProbeError};
pub use config::{
    load_or_init_station_config, load_station_config, write_station_config, PathsSection,
    ScheduleSection, StationConfig, TranscoderSection,
};
pub use error::{ConfigError, Result};
pub use exec::{CommandExecutor, SystemCommandExecutor};
pub use playlist::{
    FfmpegTranscoder, JoinNowPlaylist, PlaylistError, PlaylistStitcher, ProgramRenderer,
    TranscodeError, TranscodeJob, Transcoder,
};
pub use program::{Program, ProgramError};
pub use schedule::Readiness;
pub use station::{
    PlayoutClock, Station, StationClosed, StationError, StationHandle, SystemWallClock, Viewer,
    ViewerAction, ViewerId, WallClock,
};
