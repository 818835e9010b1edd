use axum::{Router, middleware, routing::get};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::AppState;
use crate::handlers::{checkpoints, health, leader};
use crate::request_id::request_id_middleware;
use pkg_metrics::HaMetrics;
use pkg_playback::{
    CheckpointStore, FailoverController, PlaybackSession, RestorationOrchestrator, SessionHost,
};
use pkg_state::{ElectionSettings, LeaderElection, open_store};
use pkg_types::config::HaConfig;

/// The HA subsystem for one bot instance.
///
/// With HA enabled it joins the election, checkpoints sessions while leading
/// and restores them after a takeover. With HA disabled the instance leads
/// on its own and nothing is checkpointed.
pub struct HaRuntime {
    state: AppState,
    controller_task: Option<JoinHandle<()>>,
}

impl HaRuntime {
    pub async fn start(config: &HaConfig, host: Arc<dyn SessionHost>) -> anyhow::Result<Self> {
        config.validate()?;
        let metrics = Arc::new(HaMetrics::new());

        if !config.enabled {
            let election = LeaderElection::standalone(config.instance_id.clone());
            election.start().await;
            metrics.is_leader.set(1);
            return Ok(Self {
                state: AppState {
                    election,
                    store: None,
                    checkpoints: None,
                    metrics,
                },
                controller_task: None,
            });
        }

        let store = open_store(&config.store).await?;
        let election = LeaderElection::new(store.clone(), ElectionSettings::from(config));
        let checkpoints = CheckpointStore::new(
            store.clone(),
            config.checkpoint_ttl,
            config.checkpoint_interval,
            metrics.clone(),
        );
        let orchestrator = RestorationOrchestrator::new(
            host.clone(),
            checkpoints.clone(),
            config.restore_seek_delay,
            metrics.clone(),
        );
        let controller = FailoverController::new(
            election.clone(),
            host,
            checkpoints.clone(),
            orchestrator,
            metrics.clone(),
        );

        // Listen before joining so the first BecameLeader is not missed.
        let controller_task = controller.spawn();
        election.start().await;

        Ok(Self {
            state: AppState {
                election,
                store: Some(store),
                checkpoints: Some(checkpoints),
                metrics,
            },
            controller_task: Some(controller_task),
        })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// The election, for subscribing to leadership events.
    pub fn election(&self) -> &LeaderElection {
        &self.state.election
    }

    /// A session began playing. Checkpointed only while this instance leads.
    pub fn session_started(&self, session: Arc<dyn PlaybackSession>) {
        if let Some(checkpoints) = &self.state.checkpoints {
            if self.state.election.is_leader() {
                checkpoints.start_auto_save(session);
            }
        }
    }

    /// A session ended normally; nothing should resume it.
    pub async fn session_ended(&self, session_key: &str) {
        let Some(checkpoints) = &self.state.checkpoints else {
            return;
        };
        checkpoints.stop_auto_save(session_key);
        if let Err(e) = checkpoints.delete(session_key).await {
            warn!("Failed to delete checkpoint for {}: {}", session_key, e);
        }
    }

    /// Leave the election and stop checkpointing. Checkpoints stay in the
    /// store for whichever instance takes over.
    pub async fn shutdown(self) {
        self.state.election.stop().await;
        if let Some(task) = self.controller_task {
            task.abort();
        }
        if let Some(checkpoints) = &self.state.checkpoints {
            checkpoints.stop_all();
        }
        if let Some(store) = &self.state.store {
            if let Err(e) = store.close().await {
                warn!("Failed to close coordination store: {}", e);
            }
        }
        info!("HA runtime stopped ({})", self.state.election.id());
    }
}

pub fn router(state: AppState) -> Router {
    let ha_routes = Router::new()
        .route("/api/v1/ha/leader", get(leader::get_leader))
        .route("/api/v1/ha/checkpoints", get(checkpoints::list_checkpoints))
        .route(
            "/api/v1/ha/checkpoints/{key}",
            get(checkpoints::get_checkpoint).delete(checkpoints::delete_checkpoint),
        );

    Router::new()
        .route("/healthz", get(health::healthz))
        .route("/metrics", get(health::metrics))
        .merge(ha_routes)
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

/// Start the HA subsystem and serve its API until Ctrl-C, then leave the
/// election cleanly.
pub async fn start_server(config: HaConfig, host: Arc<dyn SessionHost>) -> anyhow::Result<()> {
    let runtime = HaRuntime::start(&config, host).await?;
    let app = router(runtime.state().clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.api_port));
    info!("Starting HA API server on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Shutdown signal received");
        })
        .await;

    runtime.shutdown().await;
    served?;
    Ok(())
}
