//! Wires configuration into running tasks

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::alerts::{
    AlertDispatcher, AlertStateTracker, LogNotifier, Notifier, NotifyError, Scheduler, StoreError,
    SubscriberStore,
};
use crate::api::{run_server, AppState};
use crate::checks::{build_checks, CheckError};
use crate::commands::CommandService;
use crate::config::{ConfigError, MonitorConfig};
use crate::logs::{LogRouter, LogWindowDetector};
use crate::telegram::{BotPoller, TelegramNotifier};

/// Every component of the agent, built but not yet running
pub struct Engine {
    config: MonitorConfig,
    hostname: String,
    store: Arc<SubscriberStore>,
    tracker: Arc<AlertStateTracker>,
    dispatcher: AlertDispatcher,
    scheduler: Scheduler,
    routers: Vec<LogRouter>,
    detectors: Vec<LogWindowDetector>,
    bot: Option<BotPoller>,
}

impl Engine {
    /// Build every component from `config`. Nothing runs until [`Engine::start`].
    pub async fn build(config: MonitorConfig, hostname: String) -> Result<Self, EngineError> {
        let store = Arc::new(SubscriberStore::load(&config.subscribers_file).await?);

        let notifier: Arc<dyn Notifier> = match &config.token {
            Some(token) => Arc::new(TelegramNotifier::new(token.clone())?),
            None => {
                tracing::warn!("No bot token configured, alerts go to the log only");
                Arc::new(LogNotifier::new())
            }
        };

        let (queue, dispatcher) =
            AlertDispatcher::new(config.queue_capacity, Arc::clone(&store), Arc::clone(&notifier));
        let dispatcher = dispatcher.with_hostname(hostname.clone());
        let tracker = Arc::new(AlertStateTracker::new(queue.clone()));

        let mut scheduler = Scheduler::new(
            Arc::clone(&tracker),
            Duration::from_secs(config.tick_interval_secs),
        );
        for check in build_checks(&config.checks)? {
            let cadence = check.cadence();
            tracing::info!(check = %check.name(), cadence = ?cadence, "Registered check");
            scheduler.register(check, cadence);
        }

        let mut routers = Vec::new();
        let mut detectors = Vec::new();
        for file in config.log_files.iter().filter(|f| f.enabled) {
            let (router, file_detectors) =
                LogRouter::from_config(file, config.handoff_capacity, queue.clone(), &tracker);
            routers.push(router);
            detectors.extend(file_detectors);
        }

        let bot = match &config.token {
            Some(token) => {
                let commands = Arc::new(CommandService::new(
                    config.authorized.iter().cloned(),
                    Arc::clone(&store),
                    Arc::clone(&tracker),
                    hostname.clone(),
                ));
                Some(BotPoller::new(token.clone(), commands, Arc::clone(&notifier))?)
            }
            None => None,
        };

        Ok(Self {
            config,
            hostname,
            store,
            tracker,
            dispatcher,
            scheduler,
            routers,
            detectors,
            bot,
        })
    }

    pub fn tracker(&self) -> &Arc<AlertStateTracker> {
        &self.tracker
    }

    pub fn store(&self) -> &Arc<SubscriberStore> {
        &self.store
    }

    /// Spawn every task
    pub fn start(self) -> RunningEngine {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::new();

        tracing::info!(
            checks = self.scheduler.checks().len(),
            log_files = self.routers.len(),
            log_rules = self.detectors.len(),
            subscribers = self.store.len(),
            "Starting monitor on {}",
            self.hostname
        );

        let app_state = Arc::new(AppState {
            tracker: Arc::clone(&self.tracker),
            store: Arc::clone(&self.store),
            checks: self.scheduler.checks().to_vec(),
            hostname: self.hostname.clone(),
        });

        tasks.push(tokio::spawn(self.dispatcher.run()));
        for detector in self.detectors {
            tasks.push(tokio::spawn(detector.run()));
        }
        for router in self.routers {
            tasks.push(tokio::spawn(router.run()));
        }
        tasks.push(tokio::spawn(self.scheduler.run()));
        if let Some(bot) = self.bot {
            tasks.push(tokio::spawn(bot.run()));
        }

        let api = if self.config.api.enabled {
            let config = self.config.api.clone();
            let mut rx = shutdown_rx;
            Some(tokio::spawn(async move {
                let shutdown = async move {
                    // resolves on the shutdown flag or when the sender is gone
                    let _ = rx.wait_for(|stop| *stop).await;
                };
                if let Err(e) = run_server(&config, app_state, shutdown).await {
                    tracing::error!(error = %e, "Status API failed");
                }
            }))
        } else {
            None
        };

        RunningEngine {
            tasks,
            api,
            shutdown_tx,
            tracker: self.tracker,
        }
    }

    /// Run until Ctrl+C
    pub async fn run(self) -> Result<(), EngineError> {
        let running = self.start();
        let signal = tokio::signal::ctrl_c().await;
        tracing::info!("Shutdown signal received, stopping tasks...");
        running.shutdown().await;
        signal.map_err(EngineError::Signal)
    }
}

/// Handles of a started [`Engine`]
pub struct RunningEngine {
    tasks: Vec<JoinHandle<()>>,
    api: Option<JoinHandle<()>>,
    shutdown_tx: watch::Sender<bool>,
    tracker: Arc<AlertStateTracker>,
}

impl RunningEngine {
    pub fn tracker(&self) -> &Arc<AlertStateTracker> {
        &self.tracker
    }

    /// Stop the API gracefully and abort every other task
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(api) = self.api {
            if let Err(e) = api.await {
                tracing::error!(error = %e, "Status API task panicked");
            }
        }
        for task in &self.tasks {
            task.abort();
        }
        tracing::info!("Monitor stopped");
    }
}

/// Host name used to prefix outgoing messages
pub fn resolve_hostname(config: &MonitorConfig) -> String {
    config
        .hostname
        .clone()
        .filter(|h| !h.trim().is_empty())
        .or_else(sysinfo::System::host_name)
        .unwrap_or_else(|| "unknown-host".to_string())
}

/// Startup errors
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Check(#[from] CheckError),

    #[error(transparent)]
    Notify(#[from] NotifyError),

    #[error("Failed to listen for shutdown signal: {0}")]
    Signal(std::io::Error),
}
