//! Main application run loop

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::app::options::AppOptions;
use crate::app::state::AppState;
use crate::errors::GatewayError;
use crate::fleet::FleetOrchestrator;
use crate::server::serve::serve;
use crate::server::state::ServerState;
use crate::workers::{bus, health};

/// Run the gateway
pub async fn run(
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), GatewayError> {
    info!("Initializing LensGate gateway...");

    // Create shutdown and restart channels
    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let (restart_tx, mut restart_rx) = mpsc::channel::<String>(4);
    let mut shutdown_manager =
        ShutdownManager::new(shutdown_tx.clone(), options.max_shutdown_delay);

    // Initialize the app state and workers
    let app_state = match init(
        &options,
        restart_tx,
        shutdown_tx.clone(),
        &mut shutdown_manager,
    )
    .await
    {
        Ok(state) => state,
        Err(e) => {
            error!("Failed to start gateway: {}", e);
            shutdown_manager.shutdown().await?;
            return Err(e);
        }
    };

    // Camera operations need the module settings, so surface the first pass
    match app_state
        .orchestrator
        .await_first_sync(options.fleet.first_sync_timeout)
        .await
    {
        Ok(()) => info!("Module settings sync complete"),
        Err(e) => warn!("Module settings sync still pending: {}", e),
    }

    let mut restart = false;
    tokio::select! {
        _ = shutdown_signal => {
            info!("Shutdown signal received, shutting down...");
        }
        reason = restart_rx.recv() => {
            match reason {
                Some(reason) => {
                    info!("Restart requested ({}), shutting down...", reason);
                    restart = true;
                }
                None => info!("Restart channel closed, shutting down..."),
            }
        }
    }

    // Shutdown
    drop(shutdown_tx);
    shutdown_manager.shutdown().await?;

    if restart {
        // A non-zero exit makes the container runtime start a fresh instance.
        std::process::exit(1);
    }
    Ok(())
}

// =============================== INITIALIZATION ================================== //

async fn init(
    options: &AppOptions,
    restart_tx: mpsc::Sender<String>,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<Arc<AppState>, GatewayError> {
    let app_state = init_app_state(options, restart_tx, shutdown_manager).await?;

    init_bus_worker(app_state.clone(), shutdown_manager, shutdown_tx.subscribe()).await?;

    init_health_worker(
        options.health_worker.clone(),
        app_state.clone(),
        shutdown_manager,
        shutdown_tx.subscribe(),
    )
    .await?;

    if options.enable_server {
        init_server(
            options,
            app_state.clone(),
            shutdown_manager,
            shutdown_tx.subscribe(),
        )
        .await?;
    }

    Ok(app_state)
}

async fn init_app_state(
    options: &AppOptions,
    restart_tx: mpsc::Sender<String>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<Arc<AppState>, GatewayError> {
    let app_state = Arc::new(AppState::init(options, restart_tx).await?);
    shutdown_manager.with_orchestrator(app_state.orchestrator.clone())?;
    Ok(app_state)
}

async fn init_bus_worker(
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), GatewayError> {
    info!("Initializing bus worker...");

    let channel = app_state.module_channel.clone();
    let orchestrator = app_state.orchestrator.clone();

    let bus_handle = tokio::spawn(async move {
        bus::run(
            channel,
            orchestrator,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_bus_worker_handle(bus_handle)?;
    Ok(())
}

async fn init_health_worker(
    options: health::Options,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), GatewayError> {
    info!("Initializing health worker...");

    let orchestrator = app_state.orchestrator.clone();

    let health_handle = tokio::spawn(async move {
        health::run(
            &options,
            orchestrator,
            tokio::time::sleep,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_health_worker_handle(health_handle)?;
    Ok(())
}

async fn init_server(
    options: &AppOptions,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), GatewayError> {
    info!("Initializing local HTTP server...");

    let server_state = ServerState::new(app_state.orchestrator.clone());

    let server_handle = serve(&options.server, Arc::new(server_state), async move {
        let _ = shutdown_rx.recv().await;
    })
    .await?;

    shutdown_manager.with_server_handle(server_handle)?;
    Ok(())
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    max_shutdown_delay: Duration,
    orchestrator: Option<Arc<FleetOrchestrator>>,
    bus_worker_handle: Option<JoinHandle<()>>,
    health_worker_handle: Option<JoinHandle<()>>,
    server_handle: Option<JoinHandle<Result<(), GatewayError>>>,
}

impl ShutdownManager {
    pub fn new(shutdown_tx: broadcast::Sender<()>, max_shutdown_delay: Duration) -> Self {
        Self {
            shutdown_tx,
            max_shutdown_delay,
            orchestrator: None,
            bus_worker_handle: None,
            health_worker_handle: None,
            server_handle: None,
        }
    }

    pub fn with_orchestrator(
        &mut self,
        orchestrator: Arc<FleetOrchestrator>,
    ) -> Result<(), GatewayError> {
        if self.orchestrator.is_some() {
            return Err(GatewayError::ShutdownError(
                "orchestrator already set".to_string(),
            ));
        }
        self.orchestrator = Some(orchestrator);
        Ok(())
    }

    pub fn with_bus_worker_handle(&mut self, handle: JoinHandle<()>) -> Result<(), GatewayError> {
        if self.bus_worker_handle.is_some() {
            return Err(GatewayError::ShutdownError(
                "bus_handle already set".to_string(),
            ));
        }
        self.bus_worker_handle = Some(handle);
        Ok(())
    }

    pub fn with_health_worker_handle(
        &mut self,
        handle: JoinHandle<()>,
    ) -> Result<(), GatewayError> {
        if self.health_worker_handle.is_some() {
            return Err(GatewayError::ShutdownError(
                "health_handle already set".to_string(),
            ));
        }
        self.health_worker_handle = Some(handle);
        Ok(())
    }

    pub fn with_server_handle(
        &mut self,
        handle: JoinHandle<Result<(), GatewayError>>,
    ) -> Result<(), GatewayError> {
        if self.server_handle.is_some() {
            return Err(GatewayError::ShutdownError(
                "server_handle already set".to_string(),
            ));
        }
        self.server_handle = Some(handle);
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), GatewayError> {
        let _ = self.shutdown_tx.send(());

        match tokio::time::timeout(self.max_shutdown_delay, self.shutdown_impl()).await {
            Ok(result) => result,
            Err(_) => {
                error!(
                    "Shutdown timed out after {:?}, forcing shutdown...",
                    self.max_shutdown_delay
                );
                std::process::exit(1);
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), GatewayError> {
        info!("Shutting down LensGate gateway...");

        // 1. Health worker
        if let Some(handle) = self.health_worker_handle.take() {
            handle
                .await
                .map_err(|e| GatewayError::ShutdownError(e.to_string()))?;
        }

        // 2. Bus worker
        if let Some(handle) = self.bus_worker_handle.take() {
            handle
                .await
                .map_err(|e| GatewayError::ShutdownError(e.to_string()))?;
        }

        // 3. HTTP server
        if let Some(handle) = self.server_handle.take() {
            handle
                .await
                .map_err(|e| GatewayError::ShutdownError(e.to_string()))??;
        }

        // 4. Module farewell and channel close
        if let Some(orchestrator) = self.orchestrator.take() {
            orchestrator.shutdown().await;
        }

        info!("Shutdown complete");
        Ok(())
    }
}
