mod activity_pub;
mod config;
mod http;
mod jobs;
mod reputation;
mod store;
mod supervisor;

use std::fs::{self, File};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use ractor::Actor;
use tokio::signal::unix::{SignalKind, signal};
use tokio::task::spawn_blocking;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::activity_pub::actor::{StoreActorResolver, ensure_local_actors};
use crate::activity_pub::dispatcher::Dispatcher;
use crate::activity_pub::mailman::{Mailman, Transport};
use crate::activity_pub::process::ApplyContext;
use crate::config::{Config, RuntimeConfig};
use crate::store::Store;
use crate::supervisor::{Supervisor, SupervisorInit, SupervisorMsg};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let flags = xflags::parse_or_exit! {
        /// Path to the config file
        optional -c,--config CONFIG: PathBuf
    };
    tokio_rustls::rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| anyhow!("unable to install the crypto provider"))?;

    let config = match flags.config {
        Some(path) => Config::load(&path)?,
        None => Config::default(),
    };

    let data_dir = config.server.data_dir.clone();
    fs::create_dir_all(&data_dir)
        .with_context(|| format!("unable to create data dir {}", data_dir.display()))?;
    let mut lock = fd_lock::RwLock::new(File::create(data_dir.join("LOCK"))?);
    let _guard = lock
        .try_write()
        .with_context(|| format!("data dir {} is in use", data_dir.display()))?;

    let keyspace = fjall::Config::new(data_dir.join("keyspace")).open_transactional()?;
    let store = Store::new(keyspace)?;
    let max_attempts = config.apply.max_attempts;
    {
        let store = store.clone();
        let apub = config.activity_pub.clone();
        let reputation = config.reputation.clone();
        spawn_blocking(move || -> Result<()> {
            ensure_local_actors(&store, &apub, max_attempts)?;
            reputation::register_peers(&store, &reputation, max_attempts)
        })
        .await??;
    }

    let transport: Arc<dyn Transport> =
        Arc::new(Mailman::new(Duration::from_secs(config.delivery.timeout_secs))?);
    let resolver = Arc::new(StoreActorResolver::new(
        store.clone(),
        transport.clone(),
        max_attempts,
    ));
    let ctx = ApplyContext {
        store: store.clone(),
        apub: config.activity_pub.clone(),
        max_attempts,
    };
    let dispatcher = Dispatcher::new(ctx, resolver, transport.clone());

    let http_port = config.server.http_port;
    let init = SupervisorInit {
        config: RuntimeConfig {
            init: config,
            store,
        },
        transport,
        dispatcher: dispatcher.clone(),
    };
    let (supervisor, actor_handle) =
        Actor::spawn(Some("supervisor".into()), Supervisor, init).await?;

    let server = tokio::spawn(http::serve(http_port, dispatcher));

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigusr1 = signal(SignalKind::user_defined1())?;

    loop {
        tokio::select! {
            _ = sigterm.recv() => {
                info!(target: "lifecycle", "received the terminate signal; stopping");
                break;
            }
            _ = sigint.recv() => {
                info!(target: "lifecycle", "received the interrupt signal; stopping");
                break;
            }
            _ = sigusr1.recv() => {
                info!(target: "lifecycle", "sending pending pool requests");
                if let Err(error) = ractor::cast!(supervisor, SupervisorMsg::ForceReputationBatch) {
                    warn!(target: "lifecycle", %error, "supervisor is gone");
                }
            }
        }
    }

    server.abort();
    supervisor.stop(None);
    actor_handle.await?;

    Ok(())
}
