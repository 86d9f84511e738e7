// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process entry point: CLI parsing, tracing init, and the boot-time
//! `--restore` pass versus the normal long-lived supervisor startup
//! (spec §6 "CLI surface").

use std::sync::Arc;

use clap::Parser;
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use tracing_subscriber::{fmt, EnvFilter};

use dispcore::backend::{DisplayBackend, RestoreTaskRegistrar, VirtualDisplayDriver};
use dispcore::clock::{Clock, SystemClock};
use dispcore::config::Config;
use dispcore::dispatcher::Dispatcher;
use dispcore::event_source::EventSourceAdapter;
use dispcore::ipc::{FrameError, Transport};
use dispcore::ledger::{FileStore, SnapshotLedger, SnapshotStore};
use dispcore::message::{CancellationSource, Message};
use dispcore::model::SnapshotTier;
use dispcore::platform::{NoopDisplayBackend, NoopDisplayEventSource, NoopVirtualDisplayDriver};
use dispcore::policy::ApplyPolicy;
use dispcore::restore_task::NoopRestoreTaskRegistrar;
use dispcore::router::Router;
use dispcore::session::{ReplySink, Session, SessionConfig};

const MAILBOX_CAPACITY: usize = 64;
const DISPATCH_CAPACITY: usize = 8;

#[derive(Parser)]
#[command(name = "dispcore", version, about = "Display-configuration supervisor.")]
struct Cli {
    #[command(flatten)]
    config: Config,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = cli.config;

    if let Err(e) = config.validate() {
        eprintln!("error: {e}");
        std::process::exit(2);
    }

    init_tracing(&config);

    let exit_code = if config.restore {
        restore_pass(&config)
    } else {
        run_supervisor(config).await
    };

    std::process::exit(exit_code);
}

/// Priority: `--log-level`/`DISPCORE_LOG_LEVEL` > `RUST_LOG` > `info`. Uses
/// `try_init` so it is safe to call more than once (e.g. from tests).
fn init_tracing(config: &Config) {
    let filter = if std::env::var("DISPCORE_LOG_LEVEL").is_err() && config.log_level == "info" {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level))
    } else {
        EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let result = match config.log_format.as_str() {
        "json" => fmt::fmt().with_env_filter(filter).json().try_init(),
        _ => fmt::fmt().with_env_filter(filter).try_init(),
    };
    drop(result);
}

/// Boot-time recovery pass (spec §6 `--restore`): read back whatever
/// snapshots are on disk and log what is present and parseable, then exit
/// without starting the session loop. A torn or malformed file reads as
/// absent (spec §6 "a torn file must be rejected by the loader"), so this
/// never treats corruption as a hard failure.
fn restore_pass(config: &Config) -> i32 {
    let store = FileStore::new(config.resolved_state_dir());
    for tier in [SnapshotTier::Current, SnapshotTier::Previous, SnapshotTier::Golden] {
        match store.read(tier) {
            Some(snapshot) => {
                info!(?tier, devices = snapshot.devices().len(), "snapshot present and parseable")
            }
            None => debug!(?tier, "snapshot absent or unparseable"),
        }
    }
    0
}

/// Wire the Command Router, Operation Dispatcher, Event Source Adapter, and
/// State Machine around a shared mailbox, then drive the session to
/// completion (spec §4 "Components").
///
/// The display backend, virtual-display driver, and display-event source
/// are genuine OS integrations out of this crate's scope (spec §1); this
/// wires the no-op placeholders from [`dispcore::platform`] so the process
/// links and runs end-to-end. A real deployment swaps those three for
/// platform-specific adapters without touching anything else wired here.
async fn run_supervisor(config: Config) -> i32 {
    let backend: Arc<dyn DisplayBackend> = Arc::new(NoopDisplayBackend);
    let vd_driver: Arc<dyn VirtualDisplayDriver> = Arc::new(NoopVirtualDisplayDriver);
    let restore: Arc<dyn RestoreTaskRegistrar> = Arc::new(NoopRestoreTaskRegistrar);
    let ledger = Arc::new(SnapshotLedger::new(Arc::new(FileStore::new(config.resolved_state_dir()))));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let policy =
        ApplyPolicy { vd_reset_cooldown: config.vd_reset_cooldown(), ..ApplyPolicy::default() };

    let cancellation = CancellationSource::new();
    let (mailbox_tx, mailbox_rx) = mpsc::channel::<Message>(MAILBOX_CAPACITY);
    let (dispatch_tx, dispatch_rx) = mpsc::channel(DISPATCH_CAPACITY);

    let dispatcher = Dispatcher::new(
        backend.clone(),
        vd_driver.clone(),
        ledger.clone(),
        clock.clone(),
        mailbox_tx.clone(),
    );
    tokio::spawn(dispatcher.run(dispatch_rx));

    let event_source =
        EventSourceAdapter::new(NoopDisplayEventSource, cancellation.clone(), mailbox_tx.clone());
    tokio::spawn(event_source.run());

    match build_transport(&config, cancellation.clone(), mailbox_tx.clone()).await {
        Ok((router_task, reply_sink, transport)) => {
            tokio::spawn(router_task);

            let session_config = SessionConfig {
                backend,
                vd_driver,
                restore,
                ledger,
                clock,
                policy,
                reply_sink,
                heartbeat_timeout: config.heartbeat_timeout(),
                transport,
                disconnect_grace: config.disconnect_grace(),
            };
            let session = Session::new(session_config, cancellation, dispatch_tx, mailbox_rx);
            session.run().await
        }
        Err(err) => {
            error!(%err, "fatal: could not establish the IPC transport");
            1
        }
    }
}

/// Boxed reconnect closure handed to [`dispcore::ipc::SelfHealingTransport`]:
/// the wrapper's creator must be synchronous, so the real pipe handshake is
/// bridged onto the current Tokio runtime via `block_in_place`/`block_on`
/// rather than made `async`.
type ReconnectFn = Box<dyn Fn() -> Result<Box<dyn Transport>, FrameError> + Send + Sync>;

/// Build the real anonymous-pipe transport and spawn its router as a
/// background future, returning that future alongside the reply sink that
/// shares the same transport (spec §4.1, §4.2).
#[cfg(windows)]
async fn build_transport(
    config: &Config,
    cancellation: CancellationSource,
    mailbox_tx: mpsc::Sender<Message>,
) -> Result<(impl std::future::Future<Output = ()>, Arc<dyn ReplySink>, Arc<dyn Transport>), FrameError>
{
    use dispcore::ipc::named_pipe::{self, server_handshake};
    use dispcore::ipc::{DuplexTransport, SelfHealingTransport};
    use dispcore::session::TransportReplySink;

    let control_pipe_name =
        config.pipe_name.clone().unwrap_or_else(|| named_pipe::generate_pipe_name("dispcore-control"));
    let data_pipe_prefix = "dispcore-data".to_string();

    let initial_server = server_handshake(&control_pipe_name, &data_pipe_prefix).await?;
    let initial: Box<dyn Transport> = Box::new(DuplexTransport::new(initial_server));

    let creator: ReconnectFn = Box::new(move || {
        let control = control_pipe_name.clone();
        let prefix = data_pipe_prefix.clone();
        let handle = tokio::runtime::Handle::current();
        tokio::task::block_in_place(move || {
            handle.block_on(async move {
                let server = server_handshake(&control, &prefix).await?;
                Ok(Box::new(DuplexTransport::new(server)) as Box<dyn Transport>)
            })
        })
    });

    let transport = Arc::new(SelfHealingTransport::new(initial, creator));
    let router = Router::new(transport.clone(), cancellation, mailbox_tx);
    let reply_sink: Arc<dyn ReplySink> = Arc::new(TransportReplySink::new(transport.clone()));
    let session_transport: Arc<dyn Transport> = transport;
    Ok((router.run(), reply_sink, session_transport))
}

#[cfg(not(windows))]
async fn build_transport(
    _config: &Config,
    _cancellation: CancellationSource,
    _mailbox_tx: mpsc::Sender<Message>,
) -> Result<(std::future::Ready<()>, Arc<dyn ReplySink>, Arc<dyn Transport>), FrameError> {
    Err(FrameError::Protocol("named-pipe IPC transport is only available on Windows".into()))
}
