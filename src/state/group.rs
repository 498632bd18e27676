use std::{
    future::Future,
    sync::{Arc, Mutex as StdMutex},
    time::{Duration, SystemTime},
};

use serde_json::Value;
use tokio::{
    sync::{Mutex, OwnedMutexGuard, RwLock},
    time::{Instant, timeout},
};
use tracing::warn;
use uuid::Uuid;

use crate::{
    dao::party_store::PartyStore,
    error::ServiceError,
    state::state_machine::{GroupEvent, GroupPhase, GroupStateMachine, Plan, Roster, Snapshot},
};

/// Last values pushed by a member, replayed to late subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncedValues {
    /// Opaque JSON object.
    pub values: Value,
    /// Player who pushed them.
    pub updated_by: Uuid,
    /// Display name of that player, if provided.
    pub player_name: Option<String>,
    /// When they were pushed.
    pub updated_at: SystemTime,
}

/// Transient in-memory state of one group.
pub struct GroupSession {
    gate: Arc<Mutex<()>>,
    machine: RwLock<Option<GroupStateMachine>>,
    values: RwLock<Option<SyncedValues>>,
    last_activity: StdMutex<Instant>,
}

impl Default for GroupSession {
    fn default() -> Self {
        Self {
            gate: Arc::new(Mutex::new(())),
            machine: RwLock::new(None),
            values: RwLock::new(None),
            last_activity: StdMutex::new(Instant::now()),
        }
    }
}

impl GroupSession {
    /// Record activity for idle eviction.
    pub fn touch(&self) {
        if let Ok(mut last) = self.last_activity.lock() {
            *last = Instant::now();
        }
    }

    /// Time elapsed since the last action on this group.
    pub fn idle_for(&self) -> Duration {
        self.last_activity
            .lock()
            .map(|last| last.elapsed())
            .unwrap_or_default()
    }

    /// Phase without waiting; `None` while unseeded or locked for writing.
    pub fn try_phase(&self) -> Option<GroupPhase> {
        self.machine
            .try_read()
            .ok()
            .and_then(|machine| machine.as_ref().map(GroupStateMachine::phase))
    }

    /// Current phase, if the machine was seeded.
    pub async fn phase(&self) -> Option<GroupPhase> {
        self.machine.read().await.as_ref().map(|m| m.phase())
    }

    /// Machine snapshot, if the machine was seeded.
    pub async fn snapshot(&self) -> Option<Snapshot> {
        self.machine.read().await.as_ref().map(|m| m.snapshot())
    }

    /// Last synchronized values.
    pub async fn values(&self) -> Option<SyncedValues> {
        self.values.read().await.clone()
    }

    /// Replace the synchronized values, running `publish` while the write lock is held.
    pub async fn replace_values<F>(&self, values: Option<SyncedValues>, publish: F)
    where
        F: FnOnce(Option<&SyncedValues>),
    {
        let mut slot = self.values.write().await;
        *slot = values;
        publish(slot.as_ref());
    }
}

/// Exclusive access to one group's lifecycle for the duration of an action.
///
/// Holding the guard serializes every action on the group; actions on other
/// groups proceed independently.
pub struct GroupGuard {
    _permit: OwnedMutexGuard<()>,
    session: Arc<GroupSession>,
    group_id: Uuid,
    store: Arc<dyn PartyStore>,
    min_members: usize,
    timeout: Option<Duration>,
}

impl GroupGuard {
    /// Acquire the gate of `session`, seeding the machine from storage on first use.
    pub(crate) async fn acquire(
        session: Arc<GroupSession>,
        group_id: Uuid,
        store: Arc<dyn PartyStore>,
        min_members: usize,
        timeout: Option<Duration>,
    ) -> Result<Self, ServiceError> {
        let permit = session.gate.clone().lock_owned().await;
        session.touch();
        if session.machine.read().await.is_none() {
            let phase = derive_phase(store.as_ref(), group_id, min_members).await?;
            *session.machine.write().await = Some(GroupStateMachine::resume(phase, min_members));
        }
        Ok(Self {
            _permit: permit,
            session,
            group_id,
            store,
            min_members,
            timeout,
        })
    }

    /// Group this guard serializes.
    pub fn group_id(&self) -> Uuid {
        self.group_id
    }

    /// Session state of the group.
    pub fn session(&self) -> &Arc<GroupSession> {
        &self.session
    }

    /// Current phase.
    pub async fn phase(&self) -> GroupPhase {
        self.session
            .phase()
            .await
            .unwrap_or(GroupPhase::Forming)
    }

    async fn plan(&self, event: GroupEvent) -> Result<Plan, ServiceError> {
        let mut machine = self.session.machine.write().await;
        let machine = machine.as_mut().ok_or_else(unseeded)?;
        Ok(machine.plan(event)?)
    }

    async fn apply(&self, plan: &Plan) -> Result<GroupPhase, ServiceError> {
        let mut machine = self.session.machine.write().await;
        let machine = machine.as_mut().ok_or_else(unseeded)?;
        Ok(machine.apply(plan.id)?)
    }

    async fn abort(&self, plan: &Plan) {
        let mut machine = self.session.machine.write().await;
        if let Some(machine) = machine.as_mut()
            && let Err(err) = machine.abort(plan.id)
        {
            warn!(group_id = %self.group_id, event = ?plan.event, error = ?err, "failed to abort transition");
        }
    }

    /// Abort `plan` and reseed the machine from storage, since failed work may
    /// have committed part of its writes.
    ///
    /// When storage cannot be read the machine is dropped and reseeded on the
    /// next acquisition.
    async fn abort_and_resync(&self, plan: &Plan) {
        self.abort(plan).await;
        let derived = derive_phase(self.store.as_ref(), self.group_id, self.min_members).await;
        let mut machine = self.session.machine.write().await;
        match derived {
            Ok(phase) => {
                if machine.as_ref().map(GroupStateMachine::phase) != Some(phase) {
                    warn!(group_id = %self.group_id, event = ?plan.event, phase = ?phase, "phase resynchronized from storage after failed work");
                }
                *machine = Some(GroupStateMachine::resume(phase, self.min_members));
            }
            Err(err) => {
                warn!(group_id = %self.group_id, error = %err, "could not resynchronize phase; reseeding on next use");
                *machine = None;
            }
        }
    }

    /// Apply an event that needs no persistence work.
    pub async fn transition(&self, event: GroupEvent) -> Result<GroupPhase, ServiceError> {
        let plan = self.plan(event).await?;
        self.apply(&plan).await
    }

    /// Plan `event`, run `work`, then apply on success. On failure or timeout the
    /// plan is aborted and the phase re-derived from storage.
    pub async fn run_transition<F, Fut, T>(
        &self,
        event: GroupEvent,
        work: F,
    ) -> Result<(T, GroupPhase), ServiceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let plan = self.plan(event).await?;

        let work_future = work();
        let outcome = match self.timeout {
            Some(limit) => match timeout(limit, work_future).await {
                Ok(result) => result,
                Err(_) => {
                    self.abort_and_resync(&plan).await;
                    return Err(ServiceError::Timeout);
                }
            },
            None => work_future.await,
        };

        match outcome {
            Ok(value) => {
                let next = self.apply(&plan).await?;
                Ok((value, next))
            }
            Err(err) => {
                self.abort_and_resync(&plan).await;
                Err(err)
            }
        }
    }
}

fn unseeded() -> ServiceError {
    ServiceError::NotFound("group session is not initialised".into())
}

/// Rebuild a group's phase from its persisted records.
pub async fn derive_phase(
    store: &dyn PartyStore,
    group_id: Uuid,
    min_members: usize,
) -> Result<GroupPhase, ServiceError> {
    store.get_group(group_id).await?;
    let levels = store.list_group_levels(group_id).await?;
    if levels.iter().any(|link| !link.finished) {
        return Ok(GroupPhase::Active);
    }

    let roster = Roster {
        members: store.count_members(group_id).await?,
        ready: store.count_ready(group_id).await?,
    };
    let resting = if levels.is_empty() {
        GroupPhase::Forming
    } else {
        let catalog = store.list_themes().await?;
        let exhausted = catalog
            .iter()
            .all(|theme| levels.iter().any(|link| link.level.theme.id == theme.id));
        if exhausted {
            return Ok(GroupPhase::Finished);
        }
        GroupPhase::LevelDone
    };

    let mut machine = GroupStateMachine::resume(resting, min_members);
    let plan = machine.plan(GroupEvent::RosterChanged(roster))?;
    Ok(machine.apply(plan.id)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::{models::ThemeEntity, party_store::memory::InMemoryPartyStore};

    async fn seeded() -> (InMemoryPartyStore, Uuid, Vec<ThemeEntity>) {
        let themes = vec![
            ThemeEntity {
                id: Uuid::new_v4(),
                name: "Pirates".into(),
            },
            ThemeEntity {
                id: Uuid::new_v4(),
                name: "Space".into(),
            },
        ];
        let store = InMemoryPartyStore::with_themes(themes.clone());
        let group = store.create_group("Alpha".into()).await.unwrap();
        (store, group.id, themes)
    }

    #[tokio::test]
    async fn storage_history_maps_to_phase() {
        let (store, group, themes) = seeded().await;
        assert_eq!(
            derive_phase(&store, group, 2).await.unwrap(),
            GroupPhase::Forming
        );

        let level = store.create_level(themes[0].id, 100).await.unwrap();
        store.link_level(group, level.id).await.unwrap();
        assert_eq!(
            derive_phase(&store, group, 2).await.unwrap(),
            GroupPhase::Active
        );

        store.mark_level_finished(group, level.id).await.unwrap();
        assert_eq!(
            derive_phase(&store, group, 2).await.unwrap(),
            GroupPhase::LevelDone
        );

        let level = store.create_level(themes[1].id, 100).await.unwrap();
        store.link_level(group, level.id).await.unwrap();
        store.mark_level_finished(group, level.id).await.unwrap();
        assert_eq!(
            derive_phase(&store, group, 2).await.unwrap(),
            GroupPhase::Finished
        );
    }

    #[tokio::test]
    async fn unknown_group_cannot_be_locked() {
        let (store, _, _) = seeded().await;
        let result = GroupGuard::acquire(
            Arc::new(GroupSession::default()),
            Uuid::new_v4(),
            Arc::new(store),
            2,
            None,
        )
        .await;
        assert!(matches!(result, Err(ServiceError::NotFound(_))));
    }

    async fn ready_guard(store: &InMemoryPartyStore, group: Uuid) -> (Arc<GroupSession>, GroupGuard) {
        for name in ["ana", "bo"] {
            let player = store
                .create_player(name.into(), Duration::from_secs(60))
                .await
                .unwrap();
            store.add_membership(player.id, group).await.unwrap();
            store.set_ready(player.id, group, true).await.unwrap();
        }
        let session = Arc::new(GroupSession::default());
        let guard = GroupGuard::acquire(session.clone(), group, Arc::new(store.clone()), 2, None)
            .await
            .unwrap();
        assert_eq!(guard.phase().await, GroupPhase::Ready);
        (session, guard)
    }

    #[tokio::test]
    async fn failed_work_aborts_the_plan() {
        let (store, group, _) = seeded().await;
        let (session, guard) = ready_guard(&store, group).await;

        let result: Result<((), GroupPhase), ServiceError> = guard
            .run_transition(GroupEvent::SessionStarted, || async {
                Err(ServiceError::Degraded)
            })
            .await;
        assert!(matches!(result, Err(ServiceError::Degraded)));
        assert_eq!(guard.phase().await, GroupPhase::Ready);
        assert_eq!(session.snapshot().await.unwrap().pending, None);
    }

    #[tokio::test]
    async fn partially_committed_work_resyncs_phase_from_storage() {
        let (store, group, themes) = seeded().await;
        let (_session, guard) = ready_guard(&store, group).await;

        let result: Result<((), GroupPhase), ServiceError> = guard
            .run_transition(GroupEvent::SessionStarted, || async {
                let level = store.create_level(themes[0].id, 100).await?;
                store.link_level(group, level.id).await?;
                Err(ServiceError::Degraded)
            })
            .await;
        assert!(matches!(result, Err(ServiceError::Degraded)));
        assert_eq!(guard.phase().await, GroupPhase::Active);
    }

    #[tokio::test]
    async fn unreadable_storage_after_failure_drops_the_machine() {
        let (store, group, _) = seeded().await;
        let (session, guard) = ready_guard(&store, group).await;

        store.set_available(false);
        let result: Result<((), GroupPhase), ServiceError> = guard
            .run_transition(GroupEvent::SessionStarted, || async {
                Err(ServiceError::Degraded)
            })
            .await;
        assert!(result.is_err());
        assert_eq!(session.phase().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_work_times_out_and_aborts() {
        let (store, group, _) = seeded().await;
        ready_guard(&store, group).await;
        let guard = GroupGuard::acquire(
            Arc::new(GroupSession::default()),
            group,
            Arc::new(store.clone()),
            2,
            Some(Duration::from_millis(50)),
        )
        .await
        .unwrap();

        let result = guard
            .run_transition(GroupEvent::SessionStarted, || async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(ServiceError::Timeout)));
        assert_eq!(guard.phase().await, GroupPhase::Ready);
    }
}
