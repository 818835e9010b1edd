use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast::{Receiver, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use pkg_metrics::HaMetrics;
use pkg_state::LeaderElection;
use pkg_types::lease::LeadershipEvent;

use crate::checkpoint::CheckpointStore;
use crate::host::SessionHost;
use crate::restore::RestorationOrchestrator;

/// Drives checkpointing and restoration from leadership changes.
///
/// On becoming leader it restores whatever survived in the store, then
/// checkpoints every live session. On losing leadership it stops writing
/// checkpoints so a deposed instance cannot overwrite the new leader's.
#[derive(Clone)]
pub struct FailoverController {
    election: LeaderElection,
    host: Arc<dyn SessionHost>,
    checkpoints: CheckpointStore,
    orchestrator: RestorationOrchestrator,
    metrics: Arc<HaMetrics>,
    leading: Arc<AtomicBool>,
}

impl FailoverController {
    pub fn new(
        election: LeaderElection,
        host: Arc<dyn SessionHost>,
        checkpoints: CheckpointStore,
        orchestrator: RestorationOrchestrator,
        metrics: Arc<HaMetrics>,
    ) -> Self {
        Self {
            election,
            host,
            checkpoints,
            orchestrator,
            metrics,
            leading: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether this controller last acted on gaining leadership.
    pub fn is_active(&self) -> bool {
        self.leading.load(Ordering::SeqCst)
    }

    /// Listen for leadership events in the background. Subscribes before
    /// returning, so call it before starting the election to see the first
    /// `BecameLeader`.
    pub fn spawn(&self) -> JoinHandle<()> {
        let events = self.election.subscribe();
        let controller = self.clone();
        tokio::spawn(async move { controller.run(events).await })
    }

    async fn run(&self, mut events: Receiver<LeadershipEvent>) {
        loop {
            match events.recv().await {
                Ok(event) => self.handle(event).await,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Missed {} leadership event(s), resyncing", skipped);
                    let event = if self.election.is_leader() {
                        LeadershipEvent::BecameLeader
                    } else {
                        LeadershipEvent::LostLeadership
                    };
                    self.handle(event).await;
                }
                Err(RecvError::Closed) => {
                    debug!("Leadership events closed, failover controller exiting");
                    return;
                }
            }
        }
    }

    /// React to one leadership event. Repeated gains or losses are ignored.
    pub async fn handle(&self, event: LeadershipEvent) {
        match event {
            LeadershipEvent::BecameLeader => {
                if self.leading.swap(true, Ordering::SeqCst) {
                    return;
                }
                self.metrics.is_leader.set(1);
                self.metrics.leadership_acquired.inc();
                let restored = self.orchestrator.restore_all().await;
                let armed = self.arm_active_sessions().await;
                info!(
                    "Took over playback: {} session(s) restored, {} checkpointed",
                    restored, armed
                );
            }
            LeadershipEvent::LostLeadership => {
                if !self.leading.swap(false, Ordering::SeqCst) {
                    return;
                }
                self.metrics.is_leader.set(0);
                self.metrics.leadership_lost.inc();
                let stopped = self.checkpoints.stop_all();
                warn!("Leadership lost, stopped checkpointing {} session(s)", stopped);
            }
            LeadershipEvent::LeaderChanged(leader_id) => {
                info!("Playback now owned by {}", leader_id);
            }
        }
    }

    /// Arm auto-save for every session the host reports live.
    pub async fn arm_active_sessions(&self) -> usize {
        let sessions = self.host.active_sessions().await;
        let count = sessions.len();
        for session in sessions {
            self.checkpoints.start_auto_save(session);
        }
        count
    }
}
