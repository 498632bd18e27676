use std::time::Instant;

use thiserror::Error;
use uuid::Uuid;

/// Lifecycle phases of a single group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupPhase {
    /// Not started; too few members or someone is not ready.
    Forming,
    /// Enough members and everyone is ready; a session may start.
    Ready,
    /// A level is open and its timer is running.
    Active,
    /// The last level is finished and another theme is still available.
    LevelDone,
    /// No further levels can be played.
    Finished,
}

/// Aggregate membership counts used to derive readiness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Roster {
    /// Number of memberships.
    pub members: usize,
    /// Number of memberships flagged ready.
    pub ready: usize,
}

impl Roster {
    /// Whether every member is ready (false for an empty roster).
    pub fn all_ready(&self) -> bool {
        self.members > 0 && self.ready == self.members
    }
}

/// Events that can be applied to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupEvent {
    /// A member joined, left or toggled readiness.
    RosterChanged(Roster),
    /// A level was opened and its timer started.
    SessionStarted,
    /// The open level was finished.
    LevelFinished {
        /// Whether an unused theme remains for a later session.
        next_theme_available: bool,
    },
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    /// The phase the state machine was in when the invalid event was received.
    pub from: GroupPhase,
    /// The event that cannot be applied from this phase.
    pub event: GroupEvent,
}

/// Errors that can occur when planning a state machine transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// A transition is already pending and must be applied or aborted.
    AlreadyPending,
    /// The requested transition is not valid from the current phase.
    InvalidTransition(InvalidTransition),
}

/// Errors that can occur when applying a planned state machine transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyError {
    /// No transition is currently pending.
    NoPending,
    /// Plan ID does not match the pending plan.
    IdMismatch {
        /// Expected plan ID.
        expected: PlanId,
        /// Provided plan ID.
        got: PlanId,
    },
    /// State machine phase changed since the plan was created.
    PhaseMismatch {
        /// Phase when plan was created.
        expected: GroupPhase,
        /// Current phase.
        actual: GroupPhase,
    },
    /// State machine version changed since the plan was created.
    VersionMismatch {
        /// Version when plan was created.
        expected: usize,
        /// Current version.
        actual: usize,
    },
}

/// Errors that can occur when aborting a planned state machine transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortError {
    /// No transition is currently pending.
    NoPending,
    /// Plan ID does not match the pending plan.
    IdMismatch {
        /// Expected plan ID.
        expected: PlanId,
        /// Provided plan ID.
        got: PlanId,
    },
}

/// Unique identifier for a planned state transition.
pub type PlanId = Uuid;

/// A planned state machine transition that has been validated but not yet applied.
#[derive(Debug, Clone)]
pub struct Plan {
    /// Unique identifier for this plan.
    pub id: PlanId,
    /// Phase the state machine is currently in.
    pub from: GroupPhase,
    /// Phase the state machine will transition to.
    pub to: GroupPhase,
    /// Event that triggered this transition.
    pub event: GroupEvent,
    /// Version number after applying this transition.
    pub version_next: usize,
    /// Timestamp when this plan was created.
    pub pending_since: Instant,
}

/// Snapshot of the current state machine state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Current phase of the state machine.
    pub phase: GroupPhase,
    /// Version number of the state machine (increments on each transition).
    pub version: usize,
    /// Pending transition phase, if a transition is planned but not yet applied.
    pub pending: Option<GroupPhase>,
}

/// Authoritative lifecycle of one group.
///
/// Transitions are two-step: [`plan`](Self::plan) validates an event and
/// reserves the transition, the caller performs its persistence work, then
/// either [`apply`](Self::apply)s or [`abort`](Self::abort)s the plan. A failed
/// write therefore never leaves the machine in the target phase.
#[derive(Debug, Clone)]
pub struct GroupStateMachine {
    phase: GroupPhase,
    version: usize,
    pending: Option<Plan>,
    min_members: usize,
}

impl GroupStateMachine {
    /// Create a machine for a brand new group.
    pub fn new(min_members: usize) -> Self {
        Self::resume(GroupPhase::Forming, min_members)
    }

    /// Create a machine already sitting in `phase`, e.g. when rebuilt from storage.
    pub fn resume(phase: GroupPhase, min_members: usize) -> Self {
        Self {
            phase,
            version: 0,
            pending: None,
            min_members,
        }
    }

    /// Inspect the current phase.
    pub fn phase(&self) -> GroupPhase {
        self.phase
    }

    /// Create a snapshot of the current state machine state.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            phase: self.phase,
            version: self.version,
            pending: self.pending.as_ref().map(|plan| plan.to),
        }
    }

    /// Plan a transition by validating that the event can be applied from the current phase.
    pub fn plan(&mut self, event: GroupEvent) -> Result<Plan, PlanError> {
        if self.pending.is_some() {
            return Err(PlanError::AlreadyPending);
        }

        let next = self
            .compute_transition(&event)
            .map_err(PlanError::InvalidTransition)?;

        let plan = Plan {
            id: Uuid::new_v4(),
            from: self.phase,
            to: next,
            event,
            version_next: self.version + 1,
            pending_since: Instant::now(),
        };

        self.pending = Some(plan.clone());

        Ok(plan)
    }

    /// Apply a planned transition, returning the new phase.
    pub fn apply(&mut self, plan_id: PlanId) -> Result<GroupPhase, ApplyError> {
        let plan = self.pending.take().ok_or(ApplyError::NoPending)?;

        if plan.id != plan_id {
            let expected_plan_id = plan.id;
            self.pending = Some(plan);
            return Err(ApplyError::IdMismatch {
                expected: expected_plan_id,
                got: plan_id,
            });
        }

        if self.phase != plan.from {
            return Err(ApplyError::PhaseMismatch {
                expected: plan.from,
                actual: self.phase,
            });
        }

        if self.version + 1 != plan.version_next {
            return Err(ApplyError::VersionMismatch {
                expected: plan.version_next,
                actual: self.version + 1,
            });
        }

        self.phase = plan.to;
        self.version = plan.version_next;

        Ok(self.phase)
    }

    /// Abort a planned transition without applying it.
    pub fn abort(&mut self, plan_id: PlanId) -> Result<(), AbortError> {
        let plan = self.pending.as_ref().ok_or(AbortError::NoPending)?;

        if plan.id != plan_id {
            return Err(AbortError::IdMismatch {
                expected: plan.id,
                got: plan_id,
            });
        }

        self.pending = None;
        Ok(())
    }

    fn roster_phase(&self, roster: &Roster, otherwise: GroupPhase) -> GroupPhase {
        if roster.members >= self.min_members && roster.all_ready() {
            GroupPhase::Ready
        } else {
            otherwise
        }
    }

    fn compute_transition(&self, event: &GroupEvent) -> Result<GroupPhase, InvalidTransition> {
        let next = match (self.phase, event) {
            (GroupPhase::Forming | GroupPhase::Ready, GroupEvent::RosterChanged(roster)) => {
                self.roster_phase(roster, GroupPhase::Forming)
            }
            (GroupPhase::LevelDone, GroupEvent::RosterChanged(roster)) => {
                self.roster_phase(roster, GroupPhase::LevelDone)
            }
            // Membership churn during play or after the end leaves the phase alone.
            (phase @ (GroupPhase::Active | GroupPhase::Finished), GroupEvent::RosterChanged(_)) => {
                phase
            }
            (GroupPhase::Ready, GroupEvent::SessionStarted) => GroupPhase::Active,
            (
                GroupPhase::Active,
                GroupEvent::LevelFinished {
                    next_theme_available,
                },
            ) => {
                if *next_theme_available {
                    GroupPhase::LevelDone
                } else {
                    GroupPhase::Finished
                }
            }
            (from, event) => {
                return Err(InvalidTransition {
                    from,
                    event: event.clone(),
                });
            }
        };

        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(sm: &mut GroupStateMachine, event: GroupEvent) -> GroupPhase {
        let plan = sm.plan(event).unwrap();
        sm.apply(plan.id).unwrap()
    }

    fn roster(members: usize, ready: usize) -> GroupEvent {
        GroupEvent::RosterChanged(Roster { members, ready })
    }

    #[test]
    fn initial_state_is_forming() {
        let sm = GroupStateMachine::new(2);
        assert_eq!(sm.phase(), GroupPhase::Forming);
    }

    #[test]
    fn full_session_through_last_theme() {
        let mut sm = GroupStateMachine::new(2);

        assert_eq!(apply(&mut sm, roster(1, 0)), GroupPhase::Forming);
        assert_eq!(apply(&mut sm, roster(2, 1)), GroupPhase::Forming);
        assert_eq!(apply(&mut sm, roster(2, 2)), GroupPhase::Ready);
        assert_eq!(apply(&mut sm, GroupEvent::SessionStarted), GroupPhase::Active);
        assert_eq!(
            apply(
                &mut sm,
                GroupEvent::LevelFinished {
                    next_theme_available: true
                }
            ),
            GroupPhase::LevelDone
        );
        assert_eq!(apply(&mut sm, roster(2, 2)), GroupPhase::Ready);
        assert_eq!(apply(&mut sm, GroupEvent::SessionStarted), GroupPhase::Active);
        assert_eq!(
            apply(
                &mut sm,
                GroupEvent::LevelFinished {
                    next_theme_available: false
                }
            ),
            GroupPhase::Finished
        );
        assert_eq!(sm.snapshot().version, 8);
    }

    #[test]
    fn a_single_ready_member_is_not_enough() {
        let mut sm = GroupStateMachine::new(2);
        assert_eq!(apply(&mut sm, roster(1, 1)), GroupPhase::Forming);
    }

    #[test]
    fn readiness_withdrawn_returns_to_forming() {
        let mut sm = GroupStateMachine::new(2);
        apply(&mut sm, roster(3, 3));
        assert_eq!(apply(&mut sm, roster(3, 2)), GroupPhase::Forming);
    }

    #[test]
    fn roster_changes_do_not_interrupt_play() {
        let mut sm = GroupStateMachine::resume(GroupPhase::Active, 2);
        assert_eq!(apply(&mut sm, roster(1, 0)), GroupPhase::Active);
    }

    #[test]
    fn start_requires_ready() {
        let mut sm = GroupStateMachine::new(2);
        let err = sm.plan(GroupEvent::SessionStarted).unwrap_err();
        match err {
            PlanError::InvalidTransition(invalid) => {
                assert_eq!(invalid.from, GroupPhase::Forming);
                assert_eq!(invalid.event, GroupEvent::SessionStarted);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn finished_is_terminal_for_sessions() {
        let mut sm = GroupStateMachine::resume(GroupPhase::Finished, 2);
        assert_eq!(apply(&mut sm, roster(2, 2)), GroupPhase::Finished);
        assert!(sm.plan(GroupEvent::SessionStarted).is_err());
    }

    #[test]
    fn second_plan_is_rejected_while_pending() {
        let mut sm = GroupStateMachine::new(2);
        sm.plan(roster(2, 2)).unwrap();
        assert_eq!(sm.plan(roster(2, 2)).unwrap_err(), PlanError::AlreadyPending);
        assert_eq!(sm.snapshot().pending, Some(GroupPhase::Ready));
    }

    #[test]
    fn abort_clears_pending_and_keeps_phase() {
        let mut sm = GroupStateMachine::resume(GroupPhase::Ready, 2);
        let plan = sm.plan(GroupEvent::SessionStarted).unwrap();
        sm.abort(plan.id).unwrap();
        assert!(sm.pending.is_none());
        assert_eq!(sm.phase(), GroupPhase::Ready);
        assert_eq!(sm.abort(plan.id), Err(AbortError::NoPending));
    }

    #[test]
    fn apply_with_foreign_plan_id_keeps_pending() {
        let mut sm = GroupStateMachine::resume(GroupPhase::Ready, 2);
        let plan = sm.plan(GroupEvent::SessionStarted).unwrap();
        let err = sm.apply(Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, ApplyError::IdMismatch { .. }));
        assert_eq!(sm.apply(plan.id).unwrap(), GroupPhase::Active);
    }
}
