//! The scheduler: prepares a program, waits for the play window, plays it, repeats.

mod clock;
mod viewer;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Local};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use crate::catalog::{Catalog, MediaProber};
use crate::config::{load_station_config, StationConfig};
use crate::playlist::{PlaylistError, ProgramRenderer};
use crate::program::{Program, ProgramError};

pub use clock::PlayoutClock;
pub use viewer::{Viewer, ViewerAction, ViewerId, VIEWER_QUEUE_CAPACITY};

use viewer::ViewerSession;

const MEMBERSHIP_QUEUE_CAPACITY: usize = 16;
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

#[derive(Debug, Error)]
pub enum StationError {
    #[error("program error: {0}")]
    Program(#[from] ProgramError),
    #[error("render failed: {0}")]
    Render(#[from] PlaylistError),
    #[error("program preparation aborted before replying")]
    PreparationAborted,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("station is shut")]
pub struct StationClosed;

/// Source of the local wall-clock time the play window is evaluated against.
pub trait WallClock: Send + Sync {
    fn now(&self) -> DateTime<FixedOffset>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemWallClock;

impl WallClock for SystemWallClock {
    fn now(&self) -> DateTime<FixedOffset> {
        Local::now().into()
    }
}

/// Cloneable handle the serving side talks to the station through.
///
/// Dropping every handle shuts the station down.
#[derive(Debug, Clone)]
pub struct StationHandle {
    joins: mpsc::Sender<ViewerSession>,
    leaves: mpsc::Sender<ViewerId>,
    reloads: mpsc::Sender<()>,
    shutdowns: mpsc::Sender<()>,
    clock: PlayoutClock,
}

impl StationHandle {
    /// Registers a new viewer; its first action arrives once the station greets it.
    pub async fn connect(&self) -> Result<Viewer, StationClosed> {
        let (session, viewer) = viewer::session();
        self.joins.send(session).await.map_err(|_| StationClosed)?;
        Ok(viewer)
    }

    pub fn disconnect(&self, id: ViewerId) {
        if let Err(error) = self.leaves.try_send(id) {
            debug!(viewer = %id, %error, "leave not queued, viewer will be dropped on next delivery");
        }
    }

    /// Requests a reload. Requests arriving while one is pending collapse into it.
    pub fn reload(&self) {
        if self.reloads.try_send(()).is_err() {
            debug!("reload already pending");
        }
    }

    pub fn shutdown(&self) {
        if self.shutdowns.try_send(()).is_err() {
            debug!("shutdown already requested");
        }
    }

    pub fn elapsed_secs(&self) -> u64 {
        self.clock.elapsed_secs()
    }

    pub fn clock(&self) -> PlayoutClock {
        self.clock.clone()
    }
}

/// What a preparation task hands back.
#[derive(Debug)]
struct Prepared {
    program: Program,
    reordered: Option<Arc<Catalog>>,
}

/// Play window evaluated when entering the preparing state.
///
/// `greeting` stays set after the deadline passes: joiners keep being told to
/// wait until the station actually starts playing.
#[derive(Debug, Clone)]
struct Window {
    deadline: Option<Instant>,
    greeting: Option<ViewerAction>,
    play: Duration,
}

enum Event {
    Join(ViewerSession),
    Leave(ViewerId),
    Reload,
    Shutdown,
}

pub struct Station {
    config_path: Option<PathBuf>,
    config: Arc<StationConfig>,
    catalog: Arc<Catalog>,
    program: Option<Program>,
    prober: Arc<dyn MediaProber>,
    renderer: Arc<dyn ProgramRenderer>,
    wall_clock: Arc<dyn WallClock>,
    rng: StdRng,
    clock: PlayoutClock,
    viewers: HashMap<ViewerId, ViewerSession>,
    joins: mpsc::Receiver<ViewerSession>,
    leaves: mpsc::Receiver<ViewerId>,
    reloads: mpsc::Receiver<()>,
    shutdowns: mpsc::Receiver<()>,
}

impl std::fmt::Debug for Station {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Station")
            .field("config_path", &self.config_path)
            .field("assets", &self.catalog.len())
            .field("program", &self.program)
            .field("viewers", &self.viewers.len())
            .finish()
    }
}

impl Station {
    /// Builds the station and its handle. `config_path` is re-read on reload.
    pub fn new(
        config_path: Option<PathBuf>,
        config: StationConfig,
        catalog: Catalog,
        prober: Arc<dyn MediaProber>,
        renderer: Arc<dyn ProgramRenderer>,
    ) -> (Self, StationHandle) {
        let (join_tx, joins) = mpsc::channel(MEMBERSHIP_QUEUE_CAPACITY);
        let (leave_tx, leaves) = mpsc::channel(MEMBERSHIP_QUEUE_CAPACITY);
        let (reload_tx, reloads) = mpsc::channel(1);
        let (shutdown_tx, shutdowns) = mpsc::channel(1);
        let clock = PlayoutClock::new();
        let handle = StationHandle {
            joins: join_tx,
            leaves: leave_tx,
            reloads: reload_tx,
            shutdowns: shutdown_tx,
            clock: clock.clone(),
        };
        let station = Self {
            config_path,
            config: Arc::new(config),
            catalog: Arc::new(catalog),
            program: None,
            prober,
            renderer,
            wall_clock: Arc::new(SystemWallClock),
            rng: StdRng::from_entropy(),
            clock,
            viewers: HashMap::new(),
            joins,
            leaves,
            reloads,
            shutdowns,
        };
        (station, handle)
    }

    pub fn with_wall_clock(mut self, wall_clock: Arc<dyn WallClock>) -> Self {
        self.wall_clock = wall_clock;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Runs cycles until shutdown. Returns an error only when a preparation fails.
    pub async fn run(mut self) -> Result<(), StationError> {
        info!(assets = self.catalog.len(), "station started");
        loop {
            let Some(play) = self.prepare_and_wait().await? else {
                info!("station shut down while preparing");
                return Ok(());
            };
            if !self.play(play).await {
                info!("station shut down");
                return Ok(());
            }
        }
    }

    /// Returns the play duration, or `None` when shutdown was requested.
    async fn prepare_and_wait(&mut self) -> Result<Option<Duration>, StationError> {
        info!(previous = ?self.program, "preparing a new program");
        let mut reply = self.spawn_preparation();
        let mut prepared = false;
        let mut reload_pending = false;
        let mut shutting_down = false;
        let mut window = self.evaluate_window();

        loop {
            if prepared && shutting_down {
                return Ok(None);
            }
            if prepared && reload_pending {
                reload_pending = false;
                self.reload().await;
                window = self.evaluate_window();
            }
            if prepared && window.deadline.is_none() {
                return Ok(Some(window.play));
            }

            tokio::select! {
                result = &mut reply, if !prepared => {
                    let prepared_program = result.map_err(|_| StationError::PreparationAborted)??;
                    if let Some(catalog) = prepared_program.reordered {
                        self.catalog = catalog;
                    }
                    info!(program = %prepared_program.program, "the program is ready");
                    self.program = Some(prepared_program.program);
                    prepared = true;
                }
                _ = sleep_or_pending(window.deadline), if !shutting_down => {
                    debug!("play window reached");
                    window.deadline = None;
                }
                event = next_event(
                    &mut self.joins,
                    &mut self.leaves,
                    &mut self.reloads,
                    &mut self.shutdowns,
                ), if !shutting_down => match event {
                    Event::Join(session) => match &window.greeting {
                        Some(greeting) => self.admit(session, greeting.clone()),
                        None => self.register(session),
                    },
                    Event::Leave(id) => self.deregister(id),
                    Event::Reload => {
                        debug!(prepared, "reload requested");
                        reload_pending = true;
                    }
                    Event::Shutdown => {
                        info!(prepared, "shutdown requested, waiting for preparation");
                        shutting_down = true;
                    }
                },
            }
        }
    }

    /// Returns `false` when the station has to stop.
    async fn play(&mut self, duration: Duration) -> bool {
        info!(?duration, viewers = self.viewers.len(), "playing");
        self.broadcast(&ViewerAction::Start);
        self.clock.reset();
        let deadline = deadline_after(duration);

        loop {
            tokio::select! {
                _ = sleep_until(deadline) => {
                    info!("play window over");
                    return true;
                }
                event = next_event(
                    &mut self.joins,
                    &mut self.leaves,
                    &mut self.reloads,
                    &mut self.shutdowns,
                ) => match event {
                    Event::Join(session) => self.admit(session, ViewerAction::Start),
                    Event::Leave(id) => self.deregister(id),
                    Event::Reload => self.reload().await,
                    Event::Shutdown => return false,
                },
            }
        }
    }

    fn spawn_preparation(&mut self) -> oneshot::Receiver<Result<Prepared, StationError>> {
        let (sender, receiver) = oneshot::channel();
        let previous = self.program;
        let catalog = Arc::clone(&self.catalog);
        let config = Arc::clone(&self.config);
        let renderer = Arc::clone(&self.renderer);
        let seed: u64 = self.rng.gen();
        tokio::spawn(async move {
            let result = prepare(previous, catalog, config, renderer, seed).await;
            if let Err(error) = &result {
                error!(%error, "program preparation failed");
            }
            let _ = sender.send(result);
        });
        receiver
    }

    fn evaluate_window(&mut self) -> Window {
        let now = self.wall_clock.now();
        let readiness = self.config.schedule.readiness(&now);
        if readiness.open {
            info!(play = ?readiness.play, "play window is open");
            return Window {
                deadline: None,
                greeting: None,
                play: readiness.play,
            };
        }
        info!(starts_at = %readiness.starts_at, wait = ?readiness.wait, "waiting for the play window");
        let greeting = ViewerAction::wait_until(&readiness.starts_at);
        self.broadcast(&greeting);
        Window {
            deadline: Some(deadline_after(readiness.wait)),
            greeting: Some(greeting),
            play: readiness.play,
        }
    }

    /// Re-reads the configuration and rebuilds the catalog. Failures keep the current state.
    async fn reload(&mut self) {
        info!("reloading configuration, the serving root is kept");
        if let Some(path) = &self.config_path {
            match load_station_config(path) {
                Ok(mut config) => {
                    if config.static_dir() != self.config.static_dir() {
                        warn!(
                            requested = %config.static_dir().display(),
                            "static_dir cannot change while serving, ignoring"
                        );
                    }
                    config.paths.static_dir = self.config.static_dir().to_string_lossy().to_string();
                    self.config = Arc::new(config);
                }
                Err(error) => warn!(%error, "config reload failed, keeping the previous one"),
            }
        }

        match Catalog::scan_config(&self.config, self.prober.as_ref()).await {
            Ok(catalog) if catalog.is_empty() => {
                warn!("rescanned catalog is empty, keeping the previous one");
            }
            Ok(mut catalog) => {
                catalog.reorder(&mut self.rng);
                info!(assets = catalog.len(), "catalog rebuilt");
                self.catalog = Arc::new(catalog);
                self.program = None;
            }
            Err(error) => warn!(%error, "catalog rebuild failed, keeping the previous one"),
        }
    }

    fn register(&mut self, session: ViewerSession) {
        debug!(viewer = %session.id, "viewer joined");
        self.viewers.insert(session.id, session);
    }

    fn admit(&mut self, session: ViewerSession, greeting: ViewerAction) {
        debug!(viewer = %session.id, "viewer joined");
        if session.deliver(&greeting) {
            self.viewers.insert(session.id, session);
        }
    }

    fn deregister(&mut self, id: ViewerId) {
        if self.viewers.remove(&id).is_some() {
            debug!(viewer = %id, "viewer left");
        }
    }

    fn broadcast(&mut self, action: &ViewerAction) {
        self.viewers.retain(|_, session| session.deliver(action));
    }
}

async fn prepare(
    previous: Option<Program>,
    catalog: Arc<Catalog>,
    config: Arc<StationConfig>,
    renderer: Arc<dyn ProgramRenderer>,
    seed: u64,
) -> Result<Prepared, StationError> {
    let advanced = match previous.map(|program| program.advance(&catalog)) {
        Some(Ok(next)) => Some(next),
        Some(Err(ProgramError::CatalogExhausted { end, len })) => {
            info!(end, len, "catalog exhausted, reshuffling");
            None
        }
        Some(Err(other)) => return Err(other.into()),
        None => None,
    };

    let (program, reordered) = match advanced {
        Some(program) => (program, None),
        None if previous.is_none() && catalog.is_ordered() => {
            (Program::make(&catalog, config.slot_duration())?, None)
        }
        None => {
            let mut fresh = Catalog::clone(&catalog);
            fresh.reorder(&mut StdRng::seed_from_u64(seed));
            let program = Program::make(&fresh, config.slot_duration())?;
            (program, Some(Arc::new(fresh)))
        }
    };

    let source = reordered.as_deref().unwrap_or(&*catalog);
    renderer.render(source, &program, &config).await?;
    Ok(Prepared { program, reordered })
}

/// `now + duration`, saturating at a point decades away.
fn deadline_after(duration: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(duration).unwrap_or_else(|| now + FAR_FUTURE)
}

async fn sleep_or_pending(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Next membership or control request. A closed queue means every handle is gone.
async fn next_event(
    joins: &mut mpsc::Receiver<ViewerSession>,
    leaves: &mut mpsc::Receiver<ViewerId>,
    reloads: &mut mpsc::Receiver<()>,
    shutdowns: &mut mpsc::Receiver<()>,
) -> Event {
    tokio::select! {
        session = joins.recv() => session.map(Event::Join).unwrap_or(Event::Shutdown),
        id = leaves.recv() => id.map(Event::Leave).unwrap_or(Event::Shutdown),
        reload = reloads.recv() => reload.map(|_| Event::Reload).unwrap_or(Event::Shutdown),
        _ = shutdowns.recv() => Event::Shutdown,
    }
}
