pub mod group;
pub mod hub;
pub mod state_machine;
pub mod timer;

use std::{sync::Arc, time::Duration};

use dashmap::DashMap;
use tokio::sync::{RwLock, watch};
use tracing::info;
use uuid::Uuid;

use crate::{
    config::AppConfig,
    dao::party_store::PartyStore,
    error::ServiceError,
    services::theme_selector::{RandomThemePicker, ThemePicker},
    state::{
        group::{GroupGuard, GroupSession, derive_phase},
        state_machine::GroupPhase,
        timer::TimerEngine,
    },
};

pub use self::hub::{ConnectionId, EventSender, GroupHub, SseHub};
pub use self::state_machine::{AbortError, ApplyError, Plan, PlanError, PlanId, Snapshot};

pub type SharedState = Arc<AppState>;

const LOBBY_CAPACITY: usize = 64;

/// Central application state: storage handle, per-group sessions and push fan-out.
pub struct AppState {
    party_store: RwLock<Option<Arc<dyn PartyStore>>>,
    degraded: watch::Sender<bool>,
    config: AppConfig,
    sessions: DashMap<Uuid, Arc<GroupSession>>,
    hub: Arc<GroupHub>,
    lobby: SseHub,
    timers: TimerEngine,
    theme_picker: Arc<dyn ThemePicker>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a storage backend is installed.
    pub fn new(config: AppConfig) -> SharedState {
        Self::with_picker(config, Arc::new(RandomThemePicker))
    }

    /// Same as [`new`](Self::new) with an explicit theme picker.
    pub fn with_picker(config: AppConfig, theme_picker: Arc<dyn ThemePicker>) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        let hub = Arc::new(GroupHub::new());
        Arc::new(Self {
            party_store: RwLock::new(None),
            degraded: degraded_tx,
            config,
            sessions: DashMap::new(),
            timers: TimerEngine::new(hub.clone()),
            hub,
            lobby: SseHub::new(LOBBY_CAPACITY),
            theme_picker,
        })
    }

    /// Runtime configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Obtain a handle to the current party store, if one is installed.
    pub async fn party_store(&self) -> Option<Arc<dyn PartyStore>> {
        let guard = self.party_store.read().await;
        guard.as_ref().cloned()
    }

    /// Current party store, or [`ServiceError::Degraded`] when none is installed.
    pub async fn store(&self) -> Result<Arc<dyn PartyStore>, ServiceError> {
        self.party_store().await.ok_or(ServiceError::Degraded)
    }

    /// Install a new party store implementation and leave degraded mode.
    pub async fn install_party_store(&self, store: Arc<dyn PartyStore>) {
        {
            let mut guard = self.party_store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false);
    }

    /// Remove the current party store and enter degraded mode.
    pub async fn clear_party_store(&self) {
        {
            let mut guard = self.party_store.write().await;
            guard.take();
        }
        self.update_degraded(true);
    }

    /// Current degraded flag.
    pub async fn is_degraded(&self) -> bool {
        let guard = self.party_store.read().await;
        guard.is_none()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            let changed = *current != value;
            *current = value;
            changed
        });
    }

    /// Per-group topic registry.
    pub fn hub(&self) -> &Arc<GroupHub> {
        &self.hub
    }

    /// Broadcast hub used for the lobby SSE stream.
    pub fn lobby(&self) -> &SseHub {
        &self.lobby
    }

    /// Countdown engine.
    pub fn timers(&self) -> &TimerEngine {
        &self.timers
    }

    /// Theme picker used when starting a session.
    pub fn theme_picker(&self) -> &dyn ThemePicker {
        self.theme_picker.as_ref()
    }

    /// Session entry of `group_id`, if one is live.
    pub fn session(&self, group_id: Uuid) -> Option<Arc<GroupSession>> {
        self.sessions.get(&group_id).map(|entry| entry.clone())
    }

    /// Number of live session entries.
    pub fn live_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Serialize an action on `group_id`, creating its session entry on first use.
    pub async fn lock_group(&self, group_id: Uuid) -> Result<GroupGuard, ServiceError> {
        let store = self.store().await?;
        let session = self.sessions.entry(group_id).or_default().clone();
        let acquired = GroupGuard::acquire(
            session.clone(),
            group_id,
            store,
            self.config.min_members,
            self.config.transition_timeout,
        )
        .await;

        if let Err(ServiceError::NotFound(_)) = &acquired {
            self.sessions.remove_if(&group_id, |_, existing| {
                Arc::ptr_eq(existing, &session) && Arc::strong_count(existing) <= 2
            });
        }
        acquired
    }

    /// Phase of a group without taking its lock.
    pub async fn group_phase(&self, group_id: Uuid) -> Result<GroupPhase, ServiceError> {
        if let Some(phase) = match self.session(group_id) {
            Some(session) => session.phase().await,
            None => None,
        } {
            return Ok(phase);
        }
        let store = self.store().await?;
        derive_phase(store.as_ref(), group_id, self.config.min_members).await
    }

    /// Drop session entries that are finished or idle past `ttl`.
    ///
    /// An entry still referenced outside the registry is kept, and so is one
    /// whose countdown is live. The countdown is released in the same decision.
    pub fn evict_idle(&self, ttl: Duration) -> usize {
        let mut evicted = Vec::new();
        self.sessions.retain(|group_id, session| {
            if Arc::strong_count(session) > 1 {
                return true;
            }
            let finished = session.try_phase() == Some(GroupPhase::Finished);
            let idle =
                session.idle_for() >= ttl && self.hub.subscriber_count(*group_id) == 0;
            if (finished || idle) && self.timers.release_idle(*group_id) {
                evicted.push(*group_id);
                false
            } else {
                true
            }
        });

        for group_id in &evicted {
            info!(group_id = %group_id, "session evicted");
        }
        evicted.len()
    }
}
