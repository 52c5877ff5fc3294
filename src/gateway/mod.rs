//! Room manager: owns the set of session rooms, the heartbeat loop, and the
//! empty-room reaper.

pub mod connection;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::Mutex as TokioMutex;
use tokio::task::JoinHandle;
use tokio::time::{Duration, interval, sleep};

use crate::config::AppConfig;
use crate::room::{RoomSummary, SessionRoom};
use crate::services::auth::TokenValidator;
use crate::services::recall::RecallClient;
use crate::types::Clock;

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
pub const CLIENT_TIMEOUT_SECS: i64 = 60;
pub const ROOM_GRACE: Duration = Duration::from_secs(30);

pub struct RoomManager {
    rooms: DashMap<String, Arc<SessionRoom>>,
    reap_tasks: DashMap<String, JoinHandle<()>>,
    client_seq: AtomicU64,
    config: Arc<AppConfig>,
    recall: Option<Arc<RecallClient>>,
    auth: Arc<dyn TokenValidator>,
    clock: Arc<dyn Clock>,
    heartbeat: TokioMutex<Option<JoinHandle<()>>>,
}

impl RoomManager {
    pub fn new(
        config: Arc<AppConfig>,
        auth: Arc<dyn TokenValidator>,
        clock: Arc<dyn Clock>,
    ) -> Arc<RoomManager> {
        // A recall section may carry only a webhook secret; the control
        // client needs an API key to be usable.
        let recall = config
            .recall
            .as_ref()
            .filter(|recall| !recall.api_key.is_empty())
            .map(|recall| {
                Arc::new(RecallClient::new(
                    recall.api_key.clone(),
                    recall.base_url.clone(),
                    config.app.webhook_base_url.clone(),
                ))
            });
        Arc::new(RoomManager {
            rooms: DashMap::new(),
            reap_tasks: DashMap::new(),
            client_seq: AtomicU64::new(0),
            config,
            recall,
            auth,
            clock,
            heartbeat: TokioMutex::new(None),
        })
    }

    pub fn auth(&self) -> &dyn TokenValidator {
        self.auth.as_ref()
    }

    pub fn next_client_id(&self) -> String {
        let n = self.client_seq.fetch_add(1, Ordering::Relaxed) + 1;
        format!("client_{}_{}", n, self.clock.now().timestamp_millis())
    }

    /// Look up a room, creating it lazily on first arrival. A pending reap
    /// for the session is cancelled.
    pub fn get_or_create_room(self: &Arc<Self>, session_id: &str) -> Arc<SessionRoom> {
        if let Some((_, reap)) = self.reap_tasks.remove(session_id) {
            reap.abort();
        }
        self.rooms
            .entry(session_id.to_string())
            .or_insert_with(|| {
                tracing::info!(session_id = %session_id, "Creating session room");
                Arc::new(SessionRoom::new(
                    session_id.to_string(),
                    self.config.clone(),
                    self.recall.clone(),
                    self.clock.clone(),
                ))
            })
            .clone()
    }

    pub fn get_room(&self, session_id: &str) -> Option<Arc<SessionRoom>> {
        self.rooms.get(session_id).map(|r| r.clone())
    }

    /// Webhook bodies identify the session by bot when no metadata survives
    /// the round-trip.
    pub fn find_room_by_bot(&self, bot_id: &str) -> Option<Arc<SessionRoom>> {
        self.rooms
            .iter()
            .find(|r| r.bot_id().as_deref() == Some(bot_id))
            .map(|r| r.clone())
    }

    pub fn room_states(&self) -> Vec<RoomSummary> {
        self.rooms.iter().map(|r| r.summary()).collect()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Call after a client leaves. An empty room is destroyed once the grace
    /// window elapses with the room still empty.
    pub fn client_disconnected(self: &Arc<Self>, session_id: &str) {
        let Some(room) = self.get_room(session_id) else {
            return;
        };
        if !room.is_empty() {
            return;
        }
        let manager = Arc::clone(self);
        let session_id = session_id.to_string();
        let spawn_session_id = session_id.clone();
        let reap = tokio::spawn(async move {
            sleep(ROOM_GRACE).await;
            manager.reap_if_empty(&spawn_session_id).await;
        });
        if let Some(previous) = self.reap_tasks.insert(session_id, reap) {
            previous.abort();
        }
    }

    async fn reap_if_empty(self: &Arc<Self>, session_id: &str) {
        self.reap_tasks.remove(session_id);
        let Some(room) = self.get_room(session_id) else {
            return;
        };
        if !room.is_empty() {
            return;
        }
        tracing::info!(session_id = %session_id, "Reaping empty room");
        room.destroy().await;
        self.rooms.remove(session_id);
    }

    /// Start the heartbeat loop. Idempotent per manager lifetime.
    pub async fn spawn_heartbeat(self: &Arc<Self>) {
        let mut slot = self.heartbeat.lock().await;
        if slot.is_some() {
            return;
        }
        let manager = Arc::clone(self);
        *slot = Some(tokio::spawn(async move {
            let mut ticker = interval(HEARTBEAT_INTERVAL);
            ticker.tick().await; // first tick fires immediately
            loop {
                ticker.tick().await;
                manager.heartbeat_cycle();
            }
        }));
    }

    fn heartbeat_cycle(self: &Arc<Self>) {
        let timeout = chrono::Duration::seconds(CLIENT_TIMEOUT_SECS);
        let emptied: Vec<String> = self
            .rooms
            .iter()
            .filter(|room| room.heartbeat_sweep(timeout))
            .map(|room| room.key().clone())
            .collect();
        for session_id in emptied {
            self.client_disconnected(&session_id);
        }
    }

    /// Cancel timers, destroy every room, and drop the room map.
    pub async fn shutdown(self: &Arc<Self>) {
        if let Some(heartbeat) = self.heartbeat.lock().await.take() {
            heartbeat.abort();
        }
        for entry in self.reap_tasks.iter() {
            entry.value().abort();
        }
        self.reap_tasks.clear();

        let rooms: Vec<Arc<SessionRoom>> = self.rooms.iter().map(|r| r.clone()).collect();
        self.rooms.clear();
        for room in rooms {
            room.destroy().await;
        }
        tracing::info!("Room manager shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::auth::AcceptAnyToken;
    use crate::types::SystemClock;
    use crate::types::entities::Role;

    fn manager() -> Arc<RoomManager> {
        RoomManager::new(
            Arc::new(AppConfig::default()),
            Arc::new(AcceptAnyToken),
            Arc::new(SystemClock),
        )
    }

    #[tokio::test]
    async fn rooms_are_created_lazily_and_shared() {
        let manager = manager();
        let a = manager.get_or_create_room("s1");
        let b = manager.get_or_create_room("s1");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(manager.room_count(), 1);
        assert!(manager.get_room("s2").is_none());
    }

    #[tokio::test]
    async fn client_ids_are_unique() {
        let manager = manager();
        let a = manager.next_client_id();
        let b = manager.next_client_id();
        assert_ne!(a, b);
        assert!(a.starts_with("client_1_"));
        assert!(b.starts_with("client_2_"));
    }

    #[tokio::test]
    async fn rejoin_cancels_pending_reap() {
        let manager = manager();
        let room = manager.get_or_create_room("s1");
        let (tx, _rx) = tokio::sync::mpsc::channel(8);
        room.add_client("c1", Role::Observer, None, tx).unwrap();
        room.remove_client("c1");
        manager.client_disconnected("s1");
        assert!(manager.reap_tasks.contains_key("s1"));

        // A rejoin before the grace elapses cancels the reap.
        let _room = manager.get_or_create_room("s1");
        assert!(!manager.reap_tasks.contains_key("s1"));
        assert_eq!(manager.room_count(), 1);
    }

    #[tokio::test]
    async fn empty_room_is_reaped_after_grace() {
        tokio::time::pause();
        let manager = manager();
        let _room = manager.get_or_create_room("s1");
        manager.client_disconnected("s1");
        assert_eq!(manager.room_count(), 1);

        tokio::time::advance(ROOM_GRACE + Duration::from_secs(1)).await;
        // Yield so the reap task runs.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(manager.room_count(), 0);
    }

    #[tokio::test]
    async fn occupied_room_is_not_reaped() {
        tokio::time::pause();
        let manager = manager();
        let room = manager.get_or_create_room("s1");
        let (tx, _rx) = tokio::sync::mpsc::channel(8);
        room.add_client("c1", Role::Observer, None, tx).unwrap();

        // A stray disconnect notification with the room still occupied.
        manager.client_disconnected("s1");
        tokio::time::advance(ROOM_GRACE + Duration::from_secs(1)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(manager.room_count(), 1);
    }

    #[tokio::test]
    async fn shutdown_destroys_rooms() {
        let manager = manager();
        manager.get_or_create_room("s1");
        manager.get_or_create_room("s2");
        manager.spawn_heartbeat().await;
        manager.shutdown().await;
        assert_eq!(manager.room_count(), 0);
    }
}
