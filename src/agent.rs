//! Sync agent: watches the vault and drives pull runs.
//!
//! One owned [`Agent`] holds the whole state machine
//! (`idle → syncing → idle`, and `shuttingDown` on a signal). File events
//! arrive on a channel; every relevant event resets a single debounce
//! deadline and adds its paths to the current batch. When the deadline
//! passes the batch becomes a run, or, while a run is in flight, the single
//! queued follow-up. At most one run is ever in flight.
//!
//! Runs that fail with a transient store error are retried with backoff;
//! the final outcome is published to the [`HealthMonitor`]. Shutdown stops
//! event intake, drops the queued follow-up and waits for the in-flight run.

use anyhow::Result;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::BTreeSet;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::SyncError;
use crate::health::{self, AgentState, HealthMonitor};
use crate::pull::pull;
use crate::retry::{retry, RetryPolicy};
use crate::store::{open_store, ComplaintStore};
use crate::vault::{is_conflict_artifact, Vault};

/// What the watcher reports.
#[derive(Debug, Clone)]
pub enum WatchEvent {
    Changed(Vec<PathBuf>),
    Removed(Vec<PathBuf>),
    Error(String),
}

impl WatchEvent {
    /// Map a notify event; access and metadata-only noise is dropped.
    pub fn from_notify(event: Event) -> Option<WatchEvent> {
        match event.kind {
            EventKind::Create(_) | EventKind::Modify(_) => Some(WatchEvent::Changed(event.paths)),
            EventKind::Remove(_) => Some(WatchEvent::Removed(event.paths)),
            _ => None,
        }
    }
}

pub struct Agent {
    vault: Arc<Vault>,
    store: Arc<dyn ComplaintStore>,
    health: Arc<HealthMonitor>,
    debounce: Duration,
    run_policy: RetryPolicy,
    sync_on_start: bool,
}

impl Agent {
    pub fn new(
        config: &Config,
        vault: Arc<Vault>,
        store: Arc<dyn ComplaintStore>,
        health: Arc<HealthMonitor>,
    ) -> Self {
        Self {
            vault,
            store,
            health,
            debounce: config.agent.debounce(),
            run_policy: RetryPolicy::from_config(&config.retry),
            sync_on_start: config.agent.sync_on_start,
        }
    }

    /// Drive the state machine until `shutdown` resolves or the event
    /// channel closes.
    pub async fn run<F>(self, mut events: mpsc::UnboundedReceiver<WatchEvent>, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let mut batch: BTreeSet<PathBuf> = BTreeSet::new();
        let mut queued: BTreeSet<PathBuf> = BTreeSet::new();
        let mut deadline: Option<Instant> = None;
        let mut in_flight: Option<JoinHandle<()>> = None;

        refresh_conflict_artifacts(&self.vault, &self.health);
        if self.sync_on_start {
            info!("initial full pull");
            in_flight = Some(self.spawn_run(None));
        }

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested");
                    break;
                }
                event = events.recv() => match event {
                    Some(WatchEvent::Changed(paths)) => {
                        let relevant: Vec<PathBuf> = paths
                            .into_iter()
                            .filter(|p| self.vault.is_candidate(p))
                            .collect();
                        if relevant.is_empty() {
                            continue;
                        }
                        debug!(paths = relevant.len(), "change event");
                        batch.extend(relevant);
                        deadline = Some(Instant::now() + self.debounce);
                    }
                    Some(WatchEvent::Removed(paths)) => {
                        if paths.iter().any(|p| is_conflict_artifact(p)) {
                            refresh_conflict_artifacts(&self.vault, &self.health);
                        }
                        for path in paths.iter().filter(|p| self.vault.is_candidate(p)) {
                            info!(path = %self.vault.relative(path).display(), "document deleted, not synchronized");
                        }
                    }
                    Some(WatchEvent::Error(message)) => {
                        warn!(error = %message, "watcher error");
                        self.health.record_watcher_error(&message);
                    }
                    None => {
                        warn!("watcher channel closed");
                        break;
                    }
                },
                _ = quiet(deadline) => {
                    deadline = None;
                    let paths = std::mem::take(&mut batch);
                    if in_flight.is_some() {
                        debug!(paths = paths.len(), "run in flight, queued follow-up");
                        queued.extend(paths);
                        self.health.set_pending(true);
                    } else {
                        in_flight = Some(self.spawn_run(Some(paths.into_iter().collect())));
                    }
                }
                result = finished(&mut in_flight) => {
                    in_flight = None;
                    if let Err(e) = result {
                        error!(error = %e, "sync run task failed");
                    }
                    if queued.is_empty() {
                        self.health.set_state(AgentState::Idle);
                    } else {
                        let paths: Vec<PathBuf> = std::mem::take(&mut queued).into_iter().collect();
                        self.health.set_pending(false);
                        in_flight = Some(self.spawn_run(Some(paths)));
                    }
                }
            }
        }

        self.health.set_state(AgentState::ShuttingDown);
        drop(events);
        if !queued.is_empty() || !batch.is_empty() {
            info!(dropped = queued.len() + batch.len(), "dropping queued changes");
        }
        self.health.set_pending(false);
        if let Some(run) = in_flight {
            info!("waiting for in-flight run");
            if let Err(e) = run.await {
                error!(error = %e, "sync run task failed");
            }
        }
        info!("agent stopped");
        Ok(())
    }

    fn spawn_run(&self, paths: Option<Vec<PathBuf>>) -> JoinHandle<()> {
        self.health.set_state(AgentState::Syncing);
        let vault = self.vault.clone();
        let store = self.store.clone();
        let health = self.health.clone();
        let policy = self.run_policy.clone();
        tokio::spawn(async move {
            run_once(&vault, store.as_ref(), &health, &policy, paths.as_deref()).await;
        })
    }
}

/// One pull run with run-level retry; the outcome goes to `health`.
pub async fn run_once(
    vault: &Vault,
    store: &dyn ComplaintStore,
    health: &HealthMonitor,
    policy: &RetryPolicy,
    paths: Option<&[PathBuf]>,
) {
    let result = retry(policy, "pull run", SyncError::is_transient, || pull(vault, store, paths)).await;
    match result {
        Ok(report) => {
            info!(
                updated = report.stats.updated,
                skipped = report.stats.skipped,
                conflicts = report.stats.conflicts,
                errors = report.stats.errors,
                "sync run finished"
            );
            health.record_success(&report.stats);
        }
        Err(e) => {
            error!(error = %e, "sync run failed");
            health.record_failure(&e.to_string());
        }
    }
    refresh_conflict_artifacts(vault, health);
}

fn refresh_conflict_artifacts(vault: &Vault, health: &HealthMonitor) {
    match vault.conflict_artifacts() {
        Ok(artifacts) => health.set_conflict_artifacts(artifacts.len()),
        Err(e) => debug!(error = %e, "cannot count conflict artifacts"),
    }
}

async fn quiet(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn finished(run: &mut Option<JoinHandle<()>>) -> Result<(), JoinError> {
    match run {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

/// Watch the vault recursively. Events go to `tx` until the returned
/// watcher is dropped.
pub fn watch_vault(vault: &Vault, tx: mpsc::UnboundedSender<WatchEvent>) -> notify::Result<RecommendedWatcher> {
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        let message = match res {
            Ok(event) => WatchEvent::from_notify(event),
            Err(e) => Some(WatchEvent::Error(e.to_string())),
        };
        if let Some(message) = message {
            // receiver gone means the agent is shutting down
            let _ = tx.send(message);
        }
    })?;
    watcher.watch(vault.root(), RecursiveMode::Recursive)?;
    Ok(watcher)
}

/// Resolves on SIGTERM or SIGINT (ctrl-c elsewhere).
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => {},
                    _ = sigint.recv() => {},
                }
            }
            _ => {
                warn!("cannot install unix signal handlers, falling back to ctrl-c");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// `sync watch`: run the agent and the health endpoint until signaled.
pub async fn run_watch(config: &Config) -> Result<()> {
    let vault = Arc::new(Vault::new(&config.vault)?);
    if !vault.root().is_dir() {
        anyhow::bail!("vault root does not exist: {}", vault.root().display());
    }
    let store: Arc<dyn ComplaintStore> = Arc::new(open_store(config).await?);
    let monitor = Arc::new(HealthMonitor::new());

    let listener = tokio::net::TcpListener::bind(&config.health.bind).await?;
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(health::serve(listener, monitor.clone(), async move {
        let _ = stop_rx.await;
    }));

    let (tx, rx) = mpsc::unbounded_channel();
    let watcher = watch_vault(&vault, tx)?;
    info!(
        vault = %vault.root().display(),
        debounce_ms = config.agent.debounce_ms,
        health = %config.health.bind,
        "agent started"
    );

    let agent = Agent::new(config, vault, store, monitor);
    agent.run(rx, shutdown_signal()).await?;

    drop(watcher);
    let _ = stop_tx.send(());
    server.await??;
    Ok(())
}
