use std::future::IntoFuture;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use smc_core::{
    load_or_init_station_config, Catalog, FfmpegTranscoder, FfprobeProber, JoinNowPlaylist,
    MediaProber, PlaylistStitcher, Station, StationHandle,
};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::server::{build_router, ServerState};
use crate::{AppError, Result};

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Endereço do servidor web (`:8080` escuta em todas as interfaces)
    #[arg(long, default_value = ":8080")]
    pub http: String,
}

/// Accepts `host:port` or the bare `:port` form.
pub fn parse_listen_addr(raw: &str) -> Result<SocketAddr> {
    let candidate = if raw.starts_with(':') {
        format!("0.0.0.0{raw}")
    } else {
        raw.to_string()
    };
    candidate
        .parse()
        .map_err(|_| AppError::InvalidAddress(raw.to_string()))
}

/// Runs the station and the web server until shutdown or a fatal station error.
pub async fn serve(config_path: PathBuf, args: &ServeArgs) -> Result<()> {
    let addr = parse_listen_addr(&args.http)?;
    info!(path = %config_path.display(), "loading configuration");
    let config = load_or_init_station_config(&config_path)?;

    let prober: Arc<dyn MediaProber> =
        Arc::new(FfprobeProber::new(&config.transcoder.ffprobe, None));
    let catalog = Catalog::scan_config(&config, prober.as_ref()).await?;
    if catalog.is_empty() {
        warn!(data_dir = %config.data_dir().display(), "catalog is empty");
    }

    let static_dir = config.static_dir();
    tokio::fs::create_dir_all(config.program_dir()).await?;

    let renderer = Arc::new(PlaylistStitcher::new(Arc::new(FfmpegTranscoder::default())));
    let (station, handle) = Station::new(
        Some(config_path),
        config.clone(),
        catalog,
        prober,
        renderer,
    );
    let join_now = Arc::new(JoinNowPlaylist::new(
        config.live_playlist(),
        config.join_now_playlist(),
        handle.clock(),
    ));
    let app = build_router(ServerState::new(handle.clone(), join_now), &static_dir);

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, static_dir = %static_dir.display(), "starting server");
    spawn_signal_handlers(handle.clone());

    let station = tokio::spawn(station.run());
    let server = axum::serve(listener, app).into_future();

    tokio::select! {
        joined = station => match joined {
            Ok(Ok(())) => {
                info!("station stopped");
                Ok(())
            }
            Ok(Err(err)) => {
                error!(error = %err, "station failed");
                Err(err.into())
            }
            Err(err) => Err(AppError::Server(format!("station task failed: {err}"))),
        },
        served = server => {
            handle.shutdown();
            served?;
            Err(AppError::Server("web server stopped unexpectedly".to_string()))
        }
    }
}

fn spawn_signal_handlers(handle: StationHandle) {
    let on_interrupt = handle.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupt received, shutting down");
                on_interrupt.shutdown();
            }
            Err(err) => error!(error = %err, "failed to install Ctrl+C handler"),
        }
    });

    #[cfg(unix)]
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};
        let mut reloads = match signal(SignalKind::user_defined1()) {
            Ok(stream) => stream,
            Err(err) => {
                error!(error = %err, "failed to install SIGUSR1 handler");
                return;
            }
        };
        while reloads.recv().await.is_some() {
            info!("SIGUSR1 received, reloading");
            handle.reload();
        }
    });

    #[cfg(not(unix))]
    drop(handle);
}
