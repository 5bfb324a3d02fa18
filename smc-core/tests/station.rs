use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveTime, TimeZone};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use smc_core::playlist::PlaylistError;
use smc_core::{
    write_station_config, Asset, Catalog, MediaInfo, MediaProber, ProbeError, Program,
    ProgramRenderer, Station, StationConfig, StationError, StationHandle, ViewerAction, WallClock,
};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Wall clock that starts at `base` and moves with tokio's (paused) clock.
struct FollowingWallClock {
    base: DateTime<FixedOffset>,
    origin: Instant,
}

impl FollowingWallClock {
    fn at(hour: u32, minute: u32, second: u32) -> Arc<Self> {
        let offset = FixedOffset::east_opt(3600).unwrap();
        Arc::new(Self {
            base: offset
                .with_ymd_and_hms(2024, 3, 1, hour, minute, second)
                .unwrap(),
            origin: Instant::now(),
        })
    }
}

impl WallClock for FollowingWallClock {
    fn now(&self) -> DateTime<FixedOffset> {
        let elapsed = chrono::Duration::from_std(self.origin.elapsed()).unwrap();
        self.base + elapsed
    }
}

#[derive(Debug)]
struct Render {
    program: Program,
    paths: Vec<PathBuf>,
}

struct RecordingRenderer {
    delay: Duration,
    fail: bool,
    renders: mpsc::UnboundedSender<Render>,
}

#[async_trait::async_trait]
impl ProgramRenderer for RecordingRenderer {
    async fn render(
        &self,
        catalog: &Catalog,
        program: &Program,
        _config: &StationConfig,
    ) -> Result<(), PlaylistError> {
        tokio::time::sleep(self.delay).await;
        if self.fail {
            return Err(PlaylistError::EmptyWindow);
        }
        let paths = catalog
            .window(program)
            .iter()
            .map(|asset| asset.path.clone())
            .collect();
        let _ = self.renders.send(Render {
            program: *program,
            paths,
        });
        Ok(())
    }
}

#[derive(Default)]
struct FixedProber {
    calls: AtomicUsize,
}

#[async_trait::async_trait]
impl MediaProber for FixedProber {
    async fn probe(&self, _path: &Path) -> Result<MediaInfo, ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(MediaInfo {
            duration: Duration::from_secs(600),
            video_codec: Some("h264".into()),
        })
    }
}

struct Harness {
    _dir: TempDir,
    config_path: PathBuf,
    data_dir: PathBuf,
    handle: StationHandle,
    task: JoinHandle<Result<(), StationError>>,
    renders: mpsc::UnboundedReceiver<Render>,
    prober: Arc<FixedProber>,
}

struct Setup {
    clock: Arc<FollowingWallClock>,
    start: (u32, u32),
    duration_minutes: u64,
    render_delay: Duration,
    fail: bool,
    ordered: bool,
}

impl Setup {
    fn new(clock: Arc<FollowingWallClock>) -> Self {
        Self {
            clock,
            start: (8, 0),
            duration_minutes: 60,
            render_delay: Duration::from_secs(5),
            fail: false,
            ordered: true,
        }
    }

    fn window(mut self, hour: u32, minute: u32, duration_minutes: u64) -> Self {
        self.start = (hour, minute);
        self.duration_minutes = duration_minutes;
        self
    }

    fn render_delay(mut self, delay: Duration) -> Self {
        self.render_delay = delay;
        self
    }

    fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    fn unordered(mut self) -> Self {
        self.ordered = false;
        self
    }

    fn spawn(self) -> Harness {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("station.toml");
        let mut config = StationConfig::initial(&config_path);
        config.schedule.start = NaiveTime::from_hms_opt(self.start.0, self.start.1, 0).unwrap();
        config.schedule.duration_minutes = self.duration_minutes;
        write_station_config(&config_path, &config).unwrap();

        let data_dir = config.data_dir();
        std::fs::create_dir_all(&data_dir).unwrap();
        for name in ["a.mp4", "b.mkv", "c.mov"] {
            std::fs::write(data_dir.join(name), b"").unwrap();
        }

        let (renders_tx, renders) = mpsc::unbounded_channel();
        let renderer = Arc::new(RecordingRenderer {
            delay: self.render_delay,
            fail: self.fail,
            renders: renders_tx,
        });
        let prober = Arc::new(FixedProber::default());
        let catalog = if self.ordered {
            initial_catalog()
        } else {
            Catalog::from_assets(initial_catalog().assets().to_vec())
        };
        let (station, handle) = Station::new(
            Some(config_path.clone()),
            config,
            catalog,
            prober.clone(),
            renderer,
        );
        let task = tokio::spawn(station.with_wall_clock(self.clock).with_seed(11).run());
        Harness {
            _dir: dir,
            config_path,
            data_dir,
            handle,
            task,
            renders,
            prober,
        }
    }
}

/// Ten ten-minute assets outside the data directory.
fn initial_catalog() -> Catalog {
    let assets = (0..10)
        .map(|i| Asset {
            path: PathBuf::from(format!("/initial/{i}.mp4")),
            duration: Duration::from_secs(600),
            video_streams: vec![0],
            audio_streams: vec![0],
            video_codec: Some("h264".into()),
        })
        .collect();
    let mut catalog = Catalog::from_assets(assets);
    catalog.reorder(&mut ChaCha20Rng::seed_from_u64(5));
    catalog
}

fn wait_until(stamp: &str) -> ViewerAction {
    ViewerAction::Wait {
        wait: stamp.to_string(),
    }
}

#[tokio::test(start_paused = true)]
async fn open_window_starts_once_program_is_ready() {
    let t0 = Instant::now();
    let mut harness = Setup::new(FollowingWallClock::at(8, 30, 0)).spawn();
    let mut viewer = harness.handle.connect().await.unwrap();

    assert_eq!(viewer.next_action().await, Some(ViewerAction::Start));
    assert!(t0.elapsed() >= Duration::from_secs(5));

    let render = harness.renders.recv().await.unwrap();
    assert_eq!(render.program.range(), 0..6);

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(harness.handle.elapsed_secs(), 3);

    harness.handle.shutdown();
    harness.task.await.unwrap().unwrap();
    assert_eq!(viewer.next_action().await, None);
}

#[tokio::test(start_paused = true)]
async fn closed_window_waits_for_deadline_after_preparation() {
    let t0 = Instant::now();
    let harness = Setup::new(FollowingWallClock::at(7, 59, 0)).spawn();
    let mut viewer = harness.handle.connect().await.unwrap();

    assert_eq!(
        viewer.next_action().await,
        Some(wait_until("2024-03-01T08:00:00+01:00"))
    );
    assert_eq!(viewer.next_action().await, Some(ViewerAction::Start));
    let waited = t0.elapsed();
    assert!(waited >= Duration::from_secs(60), "started after {waited:?}");
    assert!(waited < Duration::from_secs(61));

    harness.handle.shutdown();
    harness.task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn closed_window_waits_for_slow_preparation() {
    let t0 = Instant::now();
    let harness = Setup::new(FollowingWallClock::at(7, 59, 0))
        .render_delay(Duration::from_secs(120))
        .spawn();
    let mut viewer = harness.handle.connect().await.unwrap();

    assert!(matches!(
        viewer.next_action().await,
        Some(ViewerAction::Wait { .. })
    ));
    assert_eq!(viewer.next_action().await, Some(ViewerAction::Start));
    assert!(t0.elapsed() >= Duration::from_secs(120));

    harness.handle.shutdown();
    harness.task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn late_joiners_are_greeted_for_the_current_state() {
    let harness = Setup::new(FollowingWallClock::at(7, 59, 0)).spawn();
    let mut early = harness.handle.connect().await.unwrap();
    assert!(matches!(early.next_action().await, Some(ViewerAction::Wait { .. })));

    tokio::time::sleep(Duration::from_secs(30)).await;
    let mut waiting = harness.handle.connect().await.unwrap();
    assert_eq!(
        waiting.next_action().await,
        Some(wait_until("2024-03-01T08:00:00+01:00"))
    );

    assert_eq!(early.next_action().await, Some(ViewerAction::Start));
    assert_eq!(waiting.next_action().await, Some(ViewerAction::Start));

    let mut playing = harness.handle.connect().await.unwrap();
    assert_eq!(playing.next_action().await, Some(ViewerAction::Start));

    harness.handle.disconnect(early.id());
    harness.handle.shutdown();
    harness.task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn joiners_after_the_deadline_wait_until_the_program_is_ready() {
    let t0 = Instant::now();
    let harness = Setup::new(FollowingWallClock::at(7, 59, 0))
        .render_delay(Duration::from_secs(120))
        .spawn();

    // Window opened at 60s, preparation still runs until 120s.
    tokio::time::sleep(Duration::from_secs(90)).await;
    let mut late = harness.handle.connect().await.unwrap();
    assert_eq!(
        late.next_action().await,
        Some(wait_until("2024-03-01T08:00:00+01:00"))
    );
    assert_eq!(late.next_action().await, Some(ViewerAction::Start));
    assert!(t0.elapsed() >= Duration::from_secs(120));

    harness.handle.shutdown();
    harness.task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn reload_during_preparation_applies_after_the_program_is_ready() {
    let mut harness = Setup::new(FollowingWallClock::at(8, 59, 0))
        .render_delay(Duration::from_secs(30))
        .spawn();
    harness.handle.reload();
    harness.handle.reload();

    let first = harness.renders.recv().await.unwrap();
    assert_eq!(first.program.range(), 0..6);
    assert!(first.paths.iter().all(|path| path.starts_with("/initial")));

    let mut viewer = harness.handle.connect().await.unwrap();
    assert_eq!(viewer.next_action().await, Some(ViewerAction::Start));
    assert_eq!(harness.prober.calls.load(Ordering::SeqCst), 3);

    // The next cycle starts over on the rebuilt catalog.
    let second = harness.renders.recv().await.unwrap();
    assert_eq!(second.program.range(), 0..3);
    assert!(second
        .paths
        .iter()
        .all(|path| path.starts_with(&harness.data_dir)));

    harness.handle.shutdown();
    harness.task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn reload_during_play_keeps_the_play_deadline() {
    let t0 = Instant::now();
    let mut harness = Setup::new(FollowingWallClock::at(8, 59, 0))
        .render_delay(Duration::from_secs(1))
        .spawn();
    let mut viewer = harness.handle.connect().await.unwrap();
    assert_eq!(viewer.next_action().await, Some(ViewerAction::Start));
    let first = harness.renders.recv().await.unwrap();
    assert_eq!(first.program.range(), 0..6);

    harness.handle.reload();
    let second = harness.renders.recv().await.unwrap();
    assert!(t0.elapsed() >= Duration::from_secs(60));
    assert_eq!(harness.prober.calls.load(Ordering::SeqCst), 3);
    assert_eq!(second.program.range(), 0..3);

    // Window over: everyone waits for tomorrow.
    assert_eq!(
        viewer.next_action().await,
        Some(wait_until("2024-03-02T08:00:00+01:00"))
    );

    harness.handle.shutdown();
    harness.task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn shutdown_while_preparing_waits_for_the_preparation() {
    let t0 = Instant::now();
    let mut harness = Setup::new(FollowingWallClock::at(7, 0, 0))
        .render_delay(Duration::from_secs(30))
        .spawn();
    harness.handle.shutdown();

    harness.task.await.unwrap().unwrap();
    assert!(t0.elapsed() >= Duration::from_secs(30));
    assert!(t0.elapsed() < Duration::from_secs(3600));
    assert!(harness.renders.recv().await.is_some());
}

#[tokio::test(start_paused = true)]
async fn dropping_every_handle_stops_the_station() {
    let harness = Setup::new(FollowingWallClock::at(8, 30, 0)).spawn();
    let Harness { handle, task, .. } = harness;
    let other = handle.clone();
    drop(handle);
    drop(other);
    task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn failed_render_is_fatal() {
    let harness = Setup::new(FollowingWallClock::at(8, 30, 0))
        .failing()
        .spawn();
    let err = harness.task.await.unwrap().unwrap_err();
    assert!(matches!(err, StationError::Render(_)));
    assert!(harness.handle.connect().await.is_err());
}

#[tokio::test(start_paused = true)]
async fn exhausted_catalog_is_reshuffled_into_a_fresh_program() {
    let mut harness = Setup::new(FollowingWallClock::at(8, 0, 0))
        .window(8, 0, 20)
        .render_delay(Duration::from_secs(1))
        .spawn();

    let mut ranges = Vec::new();
    for _ in 0..4 {
        ranges.push(harness.renders.recv().await.unwrap().program.range());
    }
    assert_eq!(ranges, vec![0..2, 2..4, 4..8, 0..2]);

    harness.handle.shutdown();
    harness.task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn failed_reload_keeps_config_catalog_and_program() {
    let mut harness = Setup::new(FollowingWallClock::at(8, 19, 0))
        .window(8, 0, 20)
        .render_delay(Duration::from_secs(1))
        .spawn();
    let mut viewer = harness.handle.connect().await.unwrap();
    assert_eq!(viewer.next_action().await, Some(ViewerAction::Start));
    let first = harness.renders.recv().await.unwrap();
    assert_eq!(first.program.range(), 0..2);

    std::fs::write(&harness.config_path, "[schedule\nstart = ").unwrap();
    std::fs::remove_dir_all(&harness.data_dir).unwrap();
    harness.handle.reload();

    let second = harness.renders.recv().await.unwrap();
    assert_eq!(second.program.range(), 2..4);
    assert!(second.paths.iter().all(|path| path.starts_with("/initial")));
    assert_eq!(harness.prober.calls.load(Ordering::SeqCst), 0);

    harness.handle.shutdown();
    harness.task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn empty_rescan_keeps_the_previous_catalog() {
    let mut harness = Setup::new(FollowingWallClock::at(8, 19, 0))
        .window(8, 0, 20)
        .render_delay(Duration::from_secs(1))
        .spawn();
    let mut viewer = harness.handle.connect().await.unwrap();
    assert_eq!(viewer.next_action().await, Some(ViewerAction::Start));
    assert_eq!(harness.renders.recv().await.unwrap().program.range(), 0..2);

    for name in ["a.mp4", "b.mkv", "c.mov"] {
        std::fs::remove_file(harness.data_dir.join(name)).unwrap();
    }
    harness.handle.reload();

    let second = harness.renders.recv().await.unwrap();
    assert_eq!(second.program.range(), 2..4);
    assert!(second.paths.iter().all(|path| path.starts_with("/initial")));

    harness.handle.shutdown();
    harness.task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn absurd_window_length_still_plays() {
    let harness = Setup::new(FollowingWallClock::at(8, 30, 0))
        .window(8, 0, u64::MAX / 60)
        .spawn();
    let mut viewer = harness.handle.connect().await.unwrap();
    assert_eq!(viewer.next_action().await, Some(ViewerAction::Start));

    tokio::time::sleep(Duration::from_secs(3600)).await;
    assert_eq!(harness.handle.elapsed_secs(), 3600);

    harness.handle.shutdown();
    harness.task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn unordered_catalog_is_ordered_by_the_first_preparation() {
    let mut harness = Setup::new(FollowingWallClock::at(8, 30, 0))
        .unordered()
        .spawn();

    let first = harness.renders.recv().await.unwrap();
    assert_eq!(first.program.range(), 0..6);
    assert_eq!(first.paths.len(), 6);
    assert!(first.paths.iter().all(|path| path.starts_with("/initial")));

    harness.handle.shutdown();
    harness.task.await.unwrap().unwrap();
}
