use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use huddle::lifecycle::{Recorder, RecorderConfig};
use huddle::store::{JsonStore, MeetingStore};
use huddle::sync::{BackoffPolicy, NatsProcessor, SyncEngine};
use huddle::{create_router, AppState, Config, DeviceWatcher};
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "huddle")]
#[command(about = "Meeting recorder with offline sync to a processing service")]
struct Args {
    /// Path to the configuration file (without extension)
    #[arg(short, long, default_value = "config/huddle")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    let args = Args::parse();
    let cfg = Config::load(&args.config)?;

    info!("{} starting", cfg.service.name);

    let store: Arc<dyn MeetingStore> = Arc::new(JsonStore::open(&cfg.storage.data_dir)?);

    let recorder = Recorder::new(Arc::clone(&store), RecorderConfig::from_audio(&cfg.audio));

    // An interrupted recording is never auto-resumed or auto-discarded; the
    // host shell must offer the user that choice explicitly.
    if recorder.is_interrupted().await? {
        warn!("An interrupted recording is pending: resume or discard it via the recorder API");
    }

    let remote = Arc::new(
        NatsProcessor::connect(
            &cfg.sync.nats_url,
            &cfg.sync.subject,
            cfg.sync.max_payload_bytes,
        )
        .await?,
    );

    let sync = Arc::new(SyncEngine::new(
        Arc::clone(&store),
        remote,
        BackoffPolicy::from_config(&cfg.sync),
        cfg.sync.concurrency,
    ));

    let recovered = sync.recover_stale().await?;
    if recovered > 0 {
        info!("Reset {} recordings stranded in queued state", recovered);
    }

    // Log hot-plug events; clients re-enumerate through GET /devices.
    let watcher = DeviceWatcher::spawn(Duration::from_secs(3));
    let mut device_changes = watcher.subscribe();
    tokio::spawn(async move {
        while device_changes.changed().await.is_ok() {
            info!("Audio device set changed");
        }
    });

    let state = AppState::new(recorder, sync, store);
    let app = create_router(state);

    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, app).await?;

    drop(watcher);
    Ok(())
}
