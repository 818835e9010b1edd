use chrono::Utc;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use pkg_constants::state::{
    LEADER_CHANGES_CHANNEL, LEADER_LEASE_KEY, RELEASED_PAYLOAD, heartbeat_key,
};
use pkg_types::config::HaConfig;
use pkg_types::lease::LeadershipEvent;

use crate::client::{CoordinationStore, Subscription};

/// Timing and identity for one election participant.
#[derive(Debug, Clone)]
pub struct ElectionSettings {
    pub instance_id: String,
    pub lease_ttl: Duration,
    /// Renewal cadence while leading and poll cadence while standing by.
    /// Must be shorter than `lease_ttl`.
    pub heartbeat_interval: Duration,
}

impl From<&HaConfig> for ElectionSettings {
    fn from(config: &HaConfig) -> Self {
        Self {
            instance_id: config.instance_id.clone(),
            lease_ttl: config.lease_ttl,
            heartbeat_interval: config.heartbeat_interval,
        }
    }
}

enum Phase {
    Idle,
    Starting,
    Running(Option<JoinHandle<()>>),
    Stopped,
}

/// Leader election over a [`CoordinationStore`] lease.
///
/// At most one participant holds `ha:leader` at a time; the store's atomic
/// create-if-absent is the only way in. The leader extends its lease every
/// heartbeat and steps down on the first failed renewal without trying to
/// win it back directly. Standbys poll for an absent lease on the same
/// cadence and also react to release broadcasts on `ha:leader-changes`.
///
/// Cheap to clone; all clones drive the same participant.
#[derive(Clone)]
pub struct LeaderElection {
    inner: Arc<Inner>,
}

struct Inner {
    // `None` for a standalone (HA disabled) participant.
    store: Option<Arc<dyn CoordinationStore>>,
    settings: ElectionSettings,
    leader_tx: watch::Sender<bool>,
    events_tx: broadcast::Sender<LeadershipEvent>,
    phase: Mutex<Phase>,
}

impl LeaderElection {
    pub fn new(store: Arc<dyn CoordinationStore>, settings: ElectionSettings) -> Self {
        Self::build(Some(store), settings)
    }

    /// A participant that never coordinates: it becomes leader on `start()`
    /// and never touches a store. Used when HA is disabled.
    pub fn standalone(instance_id: impl Into<String>) -> Self {
        Self::build(
            None,
            ElectionSettings {
                instance_id: instance_id.into(),
                lease_ttl: Duration::ZERO,
                heartbeat_interval: Duration::ZERO,
            },
        )
    }

    fn build(store: Option<Arc<dyn CoordinationStore>>, settings: ElectionSettings) -> Self {
        let (leader_tx, _) = watch::channel(false);
        let (events_tx, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Inner {
                store,
                settings,
                leader_tx,
                events_tx,
                phase: Mutex::new(Phase::Idle),
            }),
        }
    }

    /// This instance's identifier.
    pub fn id(&self) -> &str {
        &self.inner.settings.instance_id
    }

    /// Check if this instance is currently the leader.
    pub fn is_leader(&self) -> bool {
        self.inner.is_leader()
    }

    pub fn is_standalone(&self) -> bool {
        self.inner.store.is_none()
    }

    /// Receive leadership lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<LeadershipEvent> {
        self.inner.events_tx.subscribe()
    }

    /// Get a receiver to observe the leader flag.
    pub fn watch_leader(&self) -> watch::Receiver<bool> {
        self.inner.leader_tx.subscribe()
    }

    /// Current lease holder according to the store.
    pub async fn get_leader_id(&self) -> anyhow::Result<Option<String>> {
        let Some(store) = &self.inner.store else {
            return Ok(self.is_leader().then(|| self.id().to_string()));
        };
        let holder = store.get(LEADER_LEASE_KEY).await?;
        Ok(holder.map(|raw| String::from_utf8_lossy(&raw).into_owned()))
    }

    /// Begin participating. Idempotent, and a stopped participant stays stopped.
    ///
    /// Makes one acquisition attempt before returning, so `is_leader()` is
    /// meaningful right after. Store failures leave the instance in standby.
    pub async fn start(&self) {
        {
            let mut phase = self.inner.phase();
            if !matches!(*phase, Phase::Idle) {
                debug!("LeaderElection for {} already started", self.id());
                return;
            }
            *phase = Phase::Starting;
        }

        let Some(store) = self.inner.store.clone() else {
            info!("HA disabled, {} runs standalone", self.id());
            self.inner.leader_tx.send_replace(true);
            self.inner.emit(LeadershipEvent::BecameLeader);
            self.inner.finish_start(None);
            return;
        };

        info!(
            "LeaderElection started (instance_id={}, ttl={}ms, heartbeat={}ms, store={})",
            self.id(),
            self.inner.settings.lease_ttl.as_millis(),
            self.inner.settings.heartbeat_interval.as_millis(),
            store.backend_name()
        );

        let subscription = match store.subscribe(LEADER_CHANGES_CHANNEL).await {
            Ok(sub) => Some(sub),
            Err(e) => {
                warn!("Could not subscribe to leader changes, polling only: {}", e);
                None
            }
        };

        self.inner.try_acquire(store.as_ref()).await;
        let handle = tokio::spawn(self.inner.clone().run(store, subscription));

        if !self.inner.finish_start(Some(handle)) {
            // stop() ran while we were starting.
            self.inner.release().await;
        }
    }

    /// Leave the election. Idempotent.
    ///
    /// A leader deletes the lease only if it still holds it, then announces
    /// the release so standbys can take over without waiting for a poll.
    pub async fn stop(&self) {
        let previous = std::mem::replace(&mut *self.inner.phase(), Phase::Stopped);
        match previous {
            Phase::Stopped => return,
            Phase::Running(Some(handle)) => handle.abort(),
            _ => {}
        }
        self.inner.release().await;
        info!("LeaderElection stopped ({})", self.id());
    }
}

impl Inner {
    fn id(&self) -> &str {
        &self.settings.instance_id
    }

    fn is_leader(&self) -> bool {
        *self.leader_tx.borrow()
    }

    fn phase(&self) -> MutexGuard<'_, Phase> {
        self.phase.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns false (and aborts `handle`) if the participant was stopped
    /// in the meantime.
    fn finish_start(&self, handle: Option<JoinHandle<()>>) -> bool {
        let mut phase = self.phase();
        if matches!(*phase, Phase::Stopped) {
            if let Some(handle) = handle {
                handle.abort();
            }
            return false;
        }
        *phase = Phase::Running(handle);
        true
    }

    fn emit(&self, event: LeadershipEvent) {
        debug!("Leadership event for {}: {}", self.id(), event);
        // No subscribers is fine.
        let _ = self.events_tx.send(event);
    }

    async fn run(self: Arc<Self>, store: Arc<dyn CoordinationStore>, mut subscription: Option<Subscription>) {
        let period = self.settings.heartbeat_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.is_leader() {
                        self.renew(store.as_ref()).await;
                    } else {
                        if subscription.is_none() {
                            subscription = store.subscribe(LEADER_CHANGES_CHANNEL).await.ok();
                        }
                        self.poll(store.as_ref()).await;
                    }
                }
                payload = next_message(&mut subscription) => match payload {
                    Some(payload) => self.on_broadcast(store.as_ref(), &payload).await,
                    None => {
                        warn!("Leader-change subscription closed, relying on polling");
                        subscription = None;
                    }
                },
            }
        }
    }

    async fn try_acquire(&self, store: &dyn CoordinationStore) -> bool {
        let acquired = store
            .set_if_absent(LEADER_LEASE_KEY, self.id().as_bytes(), self.settings.lease_ttl)
            .await;
        match acquired {
            Ok(true) => self.on_acquired(store).await,
            Ok(false) => {
                debug!("Lease held elsewhere, {} stays in standby", self.id());
                false
            }
            Err(e) => {
                warn!("Lease acquisition failed for {}: {}", self.id(), e);
                false
            }
        }
    }

    /// Returns false if the participant was stopped while acquiring, in
    /// which case the lease is handed straight back.
    async fn on_acquired(&self, store: &dyn CoordinationStore) -> bool {
        if let Err(e) = self.write_heartbeat(store).await {
            warn!("Failed to write heartbeat record for {}: {}", self.id(), e);
        }
        // Flag and event change under the phase lock so a concurrent stop()
        // either sees us leading or we see it stopped.
        let stopped = {
            let phase = self.phase();
            let stopped = matches!(*phase, Phase::Stopped);
            if !stopped {
                info!("This instance is now the LEADER ({})", self.id());
                self.leader_tx.send_replace(true);
                self.emit(LeadershipEvent::BecameLeader);
            }
            stopped
        };
        if stopped {
            debug!("{} stopped while acquiring, giving the lease back", self.id());
            self.give_back(store, false).await;
            return false;
        }
        if self.is_leader() {
            if let Err(e) = store.publish(LEADER_CHANGES_CHANNEL, self.id()).await {
                warn!("Failed to announce leadership of {}: {}", self.id(), e);
            }
        }
        true
    }

    async fn write_heartbeat(&self, store: &dyn CoordinationStore) -> anyhow::Result<()> {
        let now = Utc::now().timestamp_millis().to_string();
        store
            .set(
                &heartbeat_key(self.id()),
                now.as_bytes(),
                Some(self.settings.lease_ttl),
            )
            .await
    }

    async fn renew(&self, store: &dyn CoordinationStore) {
        let renewed = match store
            .expire_if_equals(LEADER_LEASE_KEY, self.id().as_bytes(), self.settings.lease_ttl)
            .await
        {
            Ok(true) => self.write_heartbeat(store).await.map(|_| true),
            other => other,
        };
        match renewed {
            Ok(true) => debug!("Lease renewed by {}", self.id()),
            Ok(false) => self.step_down("lease expired or is held by another instance"),
            Err(e) => self.step_down(&format!("heartbeat failed: {}", e)),
        }
    }

    fn step_down(&self, reason: &str) {
        if self.leader_tx.send_replace(false) {
            warn!("Leadership LOST for {}: {}", self.id(), reason);
            self.emit(LeadershipEvent::LostLeadership);
        }
    }

    async fn poll(&self, store: &dyn CoordinationStore) {
        match store.get(LEADER_LEASE_KEY).await {
            Ok(None) => {
                info!("No leader lease found, {} attempting acquisition", self.id());
                self.try_acquire(store).await;
            }
            Ok(Some(holder)) => debug!(
                "Leader lease held by {}",
                String::from_utf8_lossy(&holder)
            ),
            Err(e) => warn!("Standby poll failed for {}: {}", self.id(), e),
        }
    }

    async fn on_broadcast(&self, store: &dyn CoordinationStore, payload: &str) {
        if payload == RELEASED_PAYLOAD {
            if !self.is_leader() {
                info!("Leader released the lease, {} attempting acquisition", self.id());
                self.try_acquire(store).await;
            }
        } else if payload == self.id() {
            debug!("Own leadership announcement echoed back");
        } else {
            info!("Leader changed to {}", payload);
            self.emit(LeadershipEvent::LeaderChanged(payload.to_string()));
        }
    }

    async fn release(&self) {
        let was_leader = self.leader_tx.send_replace(false);
        // Even a standby may hold the lease if stop() cut an acquisition short.
        if let Some(store) = &self.store {
            self.give_back(store.as_ref(), was_leader).await;
        }
        if was_leader {
            self.emit(LeadershipEvent::LostLeadership);
        }
    }

    /// Delete the lease if this instance holds it and announce the release.
    async fn give_back(&self, store: &dyn CoordinationStore, was_leader: bool) {
        match store.delete_if_equals(LEADER_LEASE_KEY, self.id().as_bytes()).await {
            Ok(true) => {
                info!("Released leader lease ({})", self.id());
                if let Err(e) = store.publish(LEADER_CHANGES_CHANNEL, RELEASED_PAYLOAD).await {
                    warn!("Failed to announce lease release: {}", e);
                }
            }
            Ok(false) if was_leader => warn!(
                "Lease no longer held by {} at release, leaving it untouched",
                self.id()
            ),
            Ok(false) => {}
            Err(e) => warn!("Failed to release leader lease, it will expire: {}", e),
        }
        if let Err(e) = store.delete(&heartbeat_key(self.id())).await {
            debug!("Failed to delete heartbeat record: {}", e);
        }
    }
}

async fn next_message(subscription: &mut Option<Subscription>) -> Option<String> {
    match subscription {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use anyhow::Result;
    use async_trait::async_trait;
    use futures_util::future::join_all;

    const TTL: Duration = Duration::from_millis(5_000);
    const HEARTBEAT: Duration = Duration::from_millis(2_000);

    fn make_election(store: &MemoryStore, id: &str) -> LeaderElection {
        LeaderElection::new(
            Arc::new(store.clone()),
            ElectionSettings {
                instance_id: id.to_string(),
                lease_ttl: TTL,
                heartbeat_interval: HEARTBEAT,
            },
        )
    }

    async fn wait_for_leader(election: &LeaderElection) {
        let mut rx = election.watch_leader();
        rx.wait_for(|leader| *leader).await.unwrap();
    }

    /// Delegates to a memory store, with plain writes held up by `delay`.
    struct SlowWrites {
        inner: MemoryStore,
        delay: Duration,
    }

    #[async_trait]
    impl CoordinationStore for SlowWrites {
        fn backend_name(&self) -> &'static str {
            "slow-memory"
        }

        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
            tokio::time::sleep(self.delay).await;
            self.inner.set(key, value, ttl).await
        }

        async fn set_if_absent(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool> {
            self.inner.set_if_absent(key, value, ttl).await
        }

        async fn expire_if_equals(&self, key: &str, expected: &[u8], ttl: Duration) -> Result<bool> {
            self.inner.expire_if_equals(key, expected, ttl).await
        }

        async fn delete(&self, key: &str) -> Result<()> {
            self.inner.delete(key).await
        }

        async fn delete_if_equals(&self, key: &str, expected: &[u8]) -> Result<bool> {
            self.inner.delete_if_equals(key, expected).await
        }

        async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
            self.inner.scan_prefix(prefix).await
        }

        async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
            self.inner.publish(channel, payload).await
        }

        async fn subscribe(&self, channel: &str) -> Result<Subscription> {
            self.inner.subscribe(channel).await
        }
    }

    fn drain<T: Clone>(rx: &mut broadcast::Receiver<T>) -> Vec<T> {
        let mut out = Vec::new();
        while let Ok(item) = rx.try_recv() {
            out.push(item);
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_instance_acquires_lease() {
        let store = MemoryStore::new();
        let a = make_election(&store, "a");
        let mut events = a.subscribe();

        a.start().await;

        assert!(a.is_leader());
        assert_eq!(a.get_leader_id().await.unwrap().as_deref(), Some("a"));
        assert!(store.get(&heartbeat_key("a")).await.unwrap().is_some());
        assert_eq!(events.recv().await.unwrap(), LeadershipEvent::BecameLeader);
        a.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_leader_keeps_lease_across_many_ttls() {
        let store = MemoryStore::new();
        let a = make_election(&store, "a");
        let b = make_election(&store.client(), "b");
        a.start().await;
        b.start().await;

        tokio::time::sleep(TTL * 6).await;

        assert!(a.is_leader());
        assert!(!b.is_leader());
        assert_eq!(store.get(LEADER_LEASE_KEY).await.unwrap(), Some(b"a".to_vec()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_mutual_exclusion_under_partitions() {
        let store = MemoryStore::new();
        let clients: Vec<MemoryStore> = (0..5).map(|_| store.client()).collect();
        let elections: Vec<LeaderElection> = clients
            .iter()
            .enumerate()
            .map(|(i, client)| make_election(client, &format!("node-{}", i)))
            .collect();

        join_all(elections.iter().map(|e| e.start())).await;

        let mut leaders_seen = Vec::new();
        for step in 0..600 {
            let leaders: Vec<&LeaderElection> =
                elections.iter().filter(|e| e.is_leader()).collect();
            assert!(leaders.len() <= 1, "two leaders at step {}", step);

            // Every few simulated seconds, cut off whoever leads.
            if step % 97 == 0 {
                if let Some(leader) = leaders.first() {
                    leaders_seen.push(leader.id().to_string());
                    let idx = elections.iter().position(|e| e.id() == leader.id()).unwrap();
                    clients[idx].set_offline(true);
                }
            }
            if step % 97 == 80 {
                for client in &clients {
                    client.set_offline(false);
                }
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        leaders_seen.dedup();
        assert!(leaders_seen.len() > 1, "leadership never moved: {:?}", leaders_seen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reelection_after_leader_goes_silent() {
        let store = MemoryStore::new();
        let a_store = store.client();
        let a = make_election(&a_store, "a");
        let b = make_election(&store.client(), "b");
        a.start().await;
        b.start().await;
        assert!(a.is_leader());

        tokio::time::sleep(Duration::from_millis(3_300)).await;
        a_store.set_offline(true);

        // The lease outlives the last renewal by one TTL; the standby polls
        // once per heartbeat interval after that.
        tokio::time::timeout(TTL + HEARTBEAT, wait_for_leader(&b))
            .await
            .expect("standby did not take over");
        assert!(!a.is_leader());
        assert_eq!(store.get(LEADER_LEASE_KEY).await.unwrap(), Some(b"b".to_vec()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_failure_steps_down() {
        let store = MemoryStore::new();
        let a = make_election(&store, "a");
        let mut events = a.subscribe();
        a.start().await;
        assert_eq!(events.recv().await.unwrap(), LeadershipEvent::BecameLeader);

        store.set_offline(true);
        let event = tokio::time::timeout(HEARTBEAT * 2, events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, LeadershipEvent::LostLeadership);
        assert!(!a.is_leader());

        // Back online: the stale lease expires and the instance wins it again.
        store.set_offline(false);
        tokio::time::timeout(TTL + HEARTBEAT, wait_for_leader(&a))
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_broadcast_triggers_takeover() {
        let store = MemoryStore::new();
        let a = make_election(&store, "a");
        let b = make_election(&store.client(), "b");
        a.start().await;
        b.start().await;

        let mut a_events = a.subscribe();
        a.stop().await;
        assert_eq!(a_events.recv().await.unwrap(), LeadershipEvent::LostLeadership);

        // Well before the next poll tick.
        tokio::time::timeout(Duration::from_millis(100), wait_for_leader(&b))
            .await
            .expect("release broadcast was not acted on");
        assert!(store.get(&heartbeat_key("a")).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_on_standby_leaves_lease_alone() {
        let store = MemoryStore::new();
        let a = make_election(&store, "a");
        let b = make_election(&store.client(), "b");
        a.start().await;
        b.start().await;

        b.stop().await;
        b.stop().await;

        assert!(a.is_leader());
        assert_eq!(store.get(LEADER_LEASE_KEY).await.unwrap(), Some(b"a".to_vec()));
        // The release path itself refuses on an id mismatch.
        assert!(!store.delete_if_equals(LEADER_LEASE_KEY, b"b").await.unwrap());
        assert_eq!(store.get(LEADER_LEASE_KEY).await.unwrap(), Some(b"a".to_vec()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_first_acquisition_ends_in_standby() {
        let store = MemoryStore::new();
        let a = LeaderElection::new(
            Arc::new(SlowWrites {
                inner: store.clone(),
                delay: Duration::from_millis(50),
            }),
            ElectionSettings {
                instance_id: "a".to_string(),
                lease_ttl: TTL,
                heartbeat_interval: HEARTBEAT,
            },
        );
        let mut events = a.subscribe();
        let mut announcements = store.subscribe(LEADER_CHANGES_CHANNEL).await.unwrap();

        // The lease is taken at once; the heartbeat write is still pending
        // when stop() arrives.
        let starting = tokio::spawn({
            let a = a.clone();
            async move { a.start().await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        a.stop().await;
        starting.await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(!a.is_leader());
        assert!(store.get(LEADER_LEASE_KEY).await.unwrap().is_none());

        let events = drain(&mut events);
        assert_ne!(events.last(), Some(&LeadershipEvent::BecameLeader));

        let mut payloads = Vec::new();
        while let Ok(payload) = announcements.try_recv() {
            payloads.push(payload);
        }
        assert!(!payloads.iter().any(|p| p == "a"), "{:?}", payloads);
        assert_eq!(payloads.last().map(String::as_str), Some(RELEASED_PAYLOAD));

        // Nothing revives the stopped participant.
        tokio::time::sleep(TTL * 2).await;
        assert!(!a.is_leader());
        assert!(store.get(LEADER_LEASE_KEY).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_returns_unannounced_lease() {
        // The lease carries our id but we never took over, as when stop()
        // interrupts the gap between create-if-absent and the announcement.
        let store = MemoryStore::new();
        store.set(LEADER_LEASE_KEY, b"a", Some(TTL)).await.unwrap();
        let a = make_election(&store, "a");
        a.start().await;
        assert!(!a.is_leader());

        let mut events = a.subscribe();
        let mut announcements = store.subscribe(LEADER_CHANGES_CHANNEL).await.unwrap();
        a.stop().await;

        assert!(store.get(LEADER_LEASE_KEY).await.unwrap().is_none());
        let payload = tokio::time::timeout(Duration::from_millis(100), announcements.recv())
            .await
            .unwrap();
        assert_eq!(payload.as_deref(), Some(RELEASED_PAYLOAD));
        // Never led, so nothing to lose.
        assert!(drain(&mut events).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_and_stop_are_idempotent() {
        let store = MemoryStore::new();
        let a = make_election(&store, "a");
        let mut events = a.subscribe();

        a.start().await;
        a.start().await;
        assert_eq!(events.recv().await.unwrap(), LeadershipEvent::BecameLeader);
        assert!(events.try_recv().is_err());

        a.stop().await;
        a.stop().await;
        assert_eq!(events.recv().await.unwrap(), LeadershipEvent::LostLeadership);
        assert!(events.try_recv().is_err());
        assert!(store.get(LEADER_LEASE_KEY).await.unwrap().is_none());

        // A stopped participant does not come back.
        a.start().await;
        assert!(!a.is_leader());
    }

    #[tokio::test(start_paused = true)]
    async fn test_foreign_announcement_surfaces_leader_changed() {
        let store = MemoryStore::new();
        store
            .set(LEADER_LEASE_KEY, b"elsewhere", Some(TTL * 10))
            .await
            .unwrap();
        let c = make_election(&store.client(), "c");
        let mut events = c.subscribe();
        c.start().await;
        assert!(!c.is_leader());

        store
            .publish(LEADER_CHANGES_CHANNEL, "elsewhere")
            .await
            .unwrap();
        let event = tokio::time::timeout(Duration::from_millis(100), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, LeadershipEvent::LeaderChanged("elsewhere".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_store_at_start_is_standby() {
        let store = MemoryStore::new();
        let client = store.client();
        client.set_offline(true);
        let a = make_election(&client, "a");
        a.start().await;
        assert!(!a.is_leader());

        client.set_offline(false);
        tokio::time::timeout(HEARTBEAT * 2, wait_for_leader(&a))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_standalone_is_always_leader() {
        let a = LeaderElection::standalone("solo");
        assert!(a.is_standalone());
        a.start().await;
        assert!(a.is_leader());
        assert_eq!(a.get_leader_id().await.unwrap().as_deref(), Some("solo"));
        a.stop().await;
        assert!(!a.is_leader());
    }
}
