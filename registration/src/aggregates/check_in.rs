//! Check-in ledger.
//!
//! Records attendance exactly once per open visit. The guards run in a fixed
//! order (participant exists, payment verified, access policy) and all of them
//! run before any attendance I/O is described, so a denied participant never
//! produces a record.
//!
//! A repeated check-in is not an error: the open record is returned tagged
//! [`CheckInOutcome::AlreadyCheckedIn`]. Two concurrent scans can both miss
//! the open visit on read; the storage constraint rejects the second insert
//! and that conflict is folded into the same outcome.

use crate::policy::{can_attend, AccessDecision, AccessDenial};
use crate::store::{AttendanceStore, Constraint, StoreError};
use crate::types::{
    AttendanceId, AttendanceRecord, CheckInTarget, Participant, PaymentStatus, StaffId,
};
use serde::Serialize;
use shackles_core::{async_effect, effect::Effect, environment::Clock, reducer::Reducer};
use smallvec::{smallvec, SmallVec};
use std::sync::Arc;
use thiserror::Error;

// ============================================================================
// Outcome and errors
// ============================================================================

/// Successful check-in
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "record", rename_all = "snake_case")]
pub enum CheckInOutcome {
    /// A new attendance record was created
    CheckedIn(AttendanceRecord),
    /// The participant was already inside; this is the open record
    AlreadyCheckedIn(AttendanceRecord),
}

impl CheckInOutcome {
    /// The attendance record
    #[must_use]
    pub const fn record(&self) -> &AttendanceRecord {
        match self {
            Self::CheckedIn(record) | Self::AlreadyCheckedIn(record) => record,
        }
    }

    /// Metric label
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::CheckedIn(_) => "checked_in",
            Self::AlreadyCheckedIn(_) => "already_checked_in",
        }
    }
}

/// Check-in rejections
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CheckInError {
    /// No participant with that ID
    #[error("participant not found")]
    ParticipantNotFound,

    /// Payment not verified; no check-in regardless of QR validity
    #[error("payment is {status}, check-in requires a verified payment")]
    PaymentNotVerified {
        /// Current payment status
        status: PaymentStatus,
    },

    /// The plan does not cover this target
    #[error("access denied: {0}")]
    AccessDenied(AccessDenial),

    /// Storage failure
    #[error(transparent)]
    Store(#[from] StoreError),
}

// ============================================================================
// State and actions
// ============================================================================

/// State of one check-in request
#[derive(Clone, Debug, Default)]
pub struct CheckInState {
    /// The participant, as re-read from the store
    pub participant: Option<Participant>,
    /// Result once the request completed
    pub outcome: Option<CheckInOutcome>,
    /// Last error
    pub last_error: Option<CheckInError>,
}

impl CheckInState {
    /// State for a request about `participant` (`None` if the lookup found
    /// nothing)
    #[must_use]
    pub const fn for_participant(participant: Option<Participant>) -> Self {
        Self {
            participant,
            outcome: None,
            last_error: None,
        }
    }

    /// The result of the request
    ///
    /// # Errors
    ///
    /// The rejection recorded by the reducer.
    pub fn into_result(self) -> Result<CheckInOutcome, CheckInError> {
        match (self.outcome, self.last_error) {
            (Some(outcome), None) => Ok(outcome),
            (_, Some(error)) => Err(error),
            (None, None) => Err(CheckInError::Store(StoreError::Database(
                "check-in did not complete".to_string(),
            ))),
        }
    }
}

/// Actions for the check-in ledger
#[derive(Clone, Debug)]
pub enum CheckInAction {
    // Commands
    /// Check the loaded participant into `target`
    CheckIn {
        /// Where
        target: CheckInTarget,
        /// Staff member at the desk
        staff: StaffId,
    },

    // Events
    /// A new attendance record was stored
    CheckedIn {
        /// The record
        record: AttendanceRecord,
    },
    /// An open visit already existed
    AlreadyCheckedIn {
        /// The existing record
        record: AttendanceRecord,
    },
    /// The request was rejected
    CheckInFailed {
        /// Why
        error: CheckInError,
    },
}

// ============================================================================
// Environment
// ============================================================================

/// Environment dependencies for the check-in ledger
#[derive(Clone)]
pub struct CheckInEnvironment {
    /// Clock for timestamps
    pub clock: Arc<dyn Clock>,
    /// Attendance ledger
    pub attendance: Arc<dyn AttendanceStore>,
}

impl CheckInEnvironment {
    /// Creates a new `CheckInEnvironment`
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, attendance: Arc<dyn AttendanceStore>) -> Self {
        Self { clock, attendance }
    }
}

// ============================================================================
// Reducer
// ============================================================================

/// Reducer for the check-in ledger
#[derive(Clone, Debug, Default)]
pub struct CheckInReducer;

impl CheckInReducer {
    /// Creates a new `CheckInReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Run the guards; `Err` carries the rejection.
    fn authorize(
        participant: Option<&Participant>,
        target: &CheckInTarget,
    ) -> Result<(), CheckInError> {
        let participant = participant.ok_or(CheckInError::ParticipantNotFound)?;
        if !participant.is_verified() {
            return Err(CheckInError::PaymentNotVerified {
                status: participant.payment_status,
            });
        }
        if let AccessDecision::Deny(denial) = can_attend(participant.plan, target.category()) {
            return Err(CheckInError::AccessDenied(denial));
        }
        Ok(())
    }

    fn apply_event(state: &mut CheckInState, action: &CheckInAction) {
        match action {
            CheckInAction::CheckedIn { record } => {
                state.outcome = Some(CheckInOutcome::CheckedIn(record.clone()));
                state.last_error = None;
            },
            CheckInAction::AlreadyCheckedIn { record } => {
                state.outcome = Some(CheckInOutcome::AlreadyCheckedIn(record.clone()));
                state.last_error = None;
            },
            CheckInAction::CheckInFailed { error } => {
                state.outcome = None;
                state.last_error = Some(error.clone());
            },
            CheckInAction::CheckIn { .. } => {},
        }
    }
}

/// Insert `record` unless an open visit exists; a lost insert race resolves to
/// the winner's record.
async fn record_visit(attendance: &dyn AttendanceStore, record: AttendanceRecord) -> CheckInAction {
    let target_key = record.target.key();
    let existing = match attendance.open_visit(record.participant, &target_key).await {
        Ok(existing) => existing,
        Err(error) => return CheckInAction::CheckInFailed { error: error.into() },
    };
    if let Some(record) = existing {
        return CheckInAction::AlreadyCheckedIn { record };
    }

    match attendance.insert_attendance(&record).await {
        Ok(()) => CheckInAction::CheckedIn { record },
        Err(conflict) if conflict.is_conflict_on(Constraint::OpenVisit) => {
            tracing::debug!(
                participant = %record.participant,
                target = %target_key,
                "Concurrent check-in, using the winning record"
            );
            match attendance.open_visit(record.participant, &target_key).await {
                Ok(Some(record)) => CheckInAction::AlreadyCheckedIn { record },
                Ok(None) => CheckInAction::CheckInFailed { error: conflict.into() },
                Err(error) => CheckInAction::CheckInFailed { error: error.into() },
            }
        },
        Err(error) => CheckInAction::CheckInFailed { error: error.into() },
    }
}

impl Reducer for CheckInReducer {
    type State = CheckInState;
    type Action = CheckInAction;
    type Environment = CheckInEnvironment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            CheckInAction::CheckIn { target, staff } => {
                state.outcome = None;
                state.last_error = None;

                if let Err(error) = Self::authorize(state.participant.as_ref(), &target) {
                    Self::apply_event(state, &CheckInAction::CheckInFailed { error });
                    return SmallVec::new();
                }
                let Some(participant) = state.participant.as_ref() else {
                    return SmallVec::new();
                };

                let record = AttendanceRecord {
                    id: AttendanceId::new(),
                    participant: participant.key,
                    target,
                    check_in_time: env.clock.now(),
                    check_out_time: None,
                    checked_in_by: staff,
                };
                let attendance = Arc::clone(&env.attendance);
                smallvec![async_effect! {
                    Some(record_visit(attendance.as_ref(), record).await)
                }]
            },

            // ========== Events ==========
            event => {
                Self::apply_event(state, &event);
                SmallVec::new()
            },
        }
    }
}
