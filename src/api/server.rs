//! Web server lifecycle

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::app::WebConfig;
use crate::session::Session;

/// Serves the observer API for one session
pub struct WebServer {
    /// Configuration
    config: WebConfig,

    /// Shared control-plane state
    session: Arc<Session>,

    /// Graceful shutdown signal
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,

    /// Serve task
    task: Mutex<Option<JoinHandle<()>>>,

    running: Arc<AtomicBool>,
}

impl WebServer {
    pub fn new(config: &WebConfig, session: Arc<Session>) -> Self {
        Self {
            config: config.clone(),
            session,
            shutdown_tx: Mutex::new(None),
            task: Mutex::new(None),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Bind and start serving in the background. Returns the bound
    /// address, which differs from the configured one when port 0 is used.
    pub async fn start(&self) -> Result<SocketAddr> {
        let addr: SocketAddr = format!("{}:{}", self.config.listen_addr, self.config.port)
            .parse()
            .context("Invalid listen address")?;

        let listener = TcpListener::bind(addr)
            .await
            .context("Failed to bind web server")?;
        let local_addr = listener.local_addr().context("Failed to read bound address")?;

        tracing::info!("Web server listening on http://{}", local_addr);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let app = super::router(self.session.clone());
        let running = self.running.clone();
        running.store(true, Ordering::SeqCst);

        let task = tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = served {
                tracing::error!("Web server error: {}", e);
            }
            running.store(false, Ordering::SeqCst);
        });

        *self.shutdown_tx.lock() = Some(shutdown_tx);
        *self.task.lock() = Some(task);
        Ok(local_addr)
    }

    /// Stop accepting connections and wait for open requests to finish.
    /// Observer sockets only end once the session closes its queues.
    pub async fn stop(&self) -> Result<()> {
        if let Some(tx) = self.shutdown_tx.lock().take() {
            let _ = tx.send(());
        }
        let task = self.task.lock().take();
        if let Some(task) = task {
            task.await.context("Web server task failed")?;
        }
        tracing::info!("Web server stopped");
        Ok(())
    }

    /// Check if the server is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
