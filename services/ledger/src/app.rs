//! Application lifecycle: startup, running, and shutdown.
//!
//! The ledger runs two things side by side: the HTTP server answering reads
//! and the consumer worker persisting events. They share only the store.
//!
//! # Shutdown
//!
//! - On Ctrl+C / SIGTERM the HTTP server drains, then the worker is asked to
//!   stop and finishes its in-flight message.
//! - If the worker gives up on its own (persistence retries exhausted), the
//!   HTTP server is stopped too and [`Application::run`] returns the worker's
//!   error so the process exits non-zero.

use crate::config::{Config, ConfigError};
use crate::routes::build_router;
use crate::state::LedgerState;
use purchase_pipeline_core::event_log::EventLogError;
use purchase_pipeline_core::purchase_store::{PersistenceError, PurchaseStore};
use purchase_pipeline_postgres::PostgresPurchaseStore;
use purchase_pipeline_redpanda::RedpandaEventLog;
use purchase_pipeline_runtime::metrics::{MetricsError, install_recorder};
use purchase_pipeline_runtime::{ConsumerWorker, WorkerError, retry_with_backoff_if};
use purchase_pipeline_web::server::serve;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

/// How long the worker gets to finish its in-flight message on shutdown.
const WORKER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Fatal errors of the ledger process.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Invalid configuration
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Storage could not be reached or prepared at startup
    #[error("Storage setup failed: {0}")]
    Storage(#[from] PersistenceError),

    /// The event log client could not be created
    #[error("Event log setup failed: {0}")]
    EventLog(#[from] EventLogError),

    /// The metrics recorder could not be installed
    #[error(transparent)]
    Metrics(#[from] MetricsError),

    /// The consumer worker stopped with an error
    #[error(transparent)]
    Worker(#[from] WorkerError),

    /// The HTTP server failed
    #[error("HTTP server failed: {0}")]
    Server(#[from] std::io::Error),
}

/// A fully wired ledger, ready to run.
pub struct Application {
    listener: TcpListener,
    router: axum::Router,
    worker: ConsumerWorker,
}

impl Application {
    /// Assemble an application from already-built parts.
    #[must_use]
    pub fn new(listener: TcpListener, router: axum::Router, worker: ConsumerWorker) -> Self {
        Self {
            listener,
            router,
            worker,
        }
    }

    /// Connect to storage and the broker and bind the listener.
    ///
    /// Storage connection and migration are retried with the persistence
    /// backoff policy, so the ledger can start before its database.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if any resource cannot be set up.
    pub async fn build(config: &Config) -> Result<Self, LedgerError> {
        let metrics = install_recorder()?;

        info!(
            database = %config.database.url,
            namespace = %config.storage.namespace,
            collection = %config.storage.collection,
            "Connecting to purchase store"
        );
        let store = retry_with_backoff_if(
            &config.retry_policy(),
            "connect purchase store",
            PersistenceError::is_retryable,
            || {
                let builder = PostgresPurchaseStore::builder()
                    .database_url(&config.database.url)
                    .max_connections(config.database.max_connections)
                    .write_timeout(config.write_timeout())
                    .namespace(&config.storage.namespace)
                    .collection(&config.storage.collection);
                async move {
                    let store = builder.connect().await?;
                    store.migrate().await?;
                    Ok::<_, PersistenceError>(store)
                }
            },
        )
        .await?;
        let store: Arc<dyn PurchaseStore> = Arc::new(store);
        info!("Purchase store ready");

        let event_log = RedpandaEventLog::builder()
            .brokers(&config.kafka.bootstrap_servers)
            .topic(&config.kafka.topic)
            .consumer_group(&config.kafka.group_id)
            .auto_offset_reset(&config.kafka.auto_offset_reset)
            .consumer_only()
            .build()?;
        info!(
            brokers = %config.kafka.bootstrap_servers,
            topic = %config.kafka.topic,
            group = %config.kafka.group_id,
            "Event log client ready"
        );

        let worker = ConsumerWorker::builder()
            .name(config.kafka.group_id.clone())
            .event_log(Arc::new(event_log))
            .store(Arc::clone(&store))
            .retry_policy(config.retry_policy())
            .build()?;

        let router = build_router(LedgerState::new(store), metrics);
        let listener = TcpListener::bind(config.bind_address()).await?;

        Ok(Self::new(listener, router, worker))
    }

    /// Address the HTTP server is bound to.
    ///
    /// # Errors
    ///
    /// Returns the I/O error from the listener.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run the worker and the HTTP server until `shutdown` resolves or the
    /// worker fails.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::Worker`] if the worker stopped with an error
    /// - [`LedgerError::Server`] if the HTTP server failed
    pub async fn run<F>(self, shutdown: F) -> Result<(), LedgerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let worker = self.worker.spawn();
        let stopper = worker.stopper();
        info!("Consumer worker started");

        let (stop_server, server_stop) = oneshot::channel::<()>();
        let mut server = tokio::spawn(serve(self.listener, self.router, async move {
            tokio::select! {
                () = shutdown => {},
                _ = server_stop => {},
            }
        }));
        let mut worker = std::pin::pin!(worker.join());

        tokio::select! {
            result = &mut worker => {
                if let Err(e) = &result {
                    error!(error = %e, "Consumer worker failed, shutting down");
                }
                let _ = stop_server.send(());
                match server.await {
                    Ok(Err(e)) => warn!(error = %e, "HTTP server failed during shutdown"),
                    Err(e) => warn!(error = %e, "HTTP server task failed"),
                    Ok(Ok(())) => {},
                }
                result.map_err(LedgerError::from)
            },
            result = &mut server => {
                info!("HTTP server stopped, stopping consumer worker");
                stopper.stop();

                let joined = tokio::time::timeout(WORKER_SHUTDOWN_TIMEOUT, worker).await;
                let worker_result = joined.unwrap_or_else(|_| {
                    warn!("Consumer worker shutdown timed out");
                    Ok(())
                });

                match result {
                    Ok(served) => served?,
                    Err(e) => return Err(LedgerError::Server(std::io::Error::other(e))),
                }
                worker_result?;
                info!("Graceful shutdown complete");
                Ok(())
            },
        }
    }
}
