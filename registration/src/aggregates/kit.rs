//! Kit distribution ledger.
//!
//! At most one kit per participant per kit day. The kit record is fetched or
//! created before eligibility is judged, so an ineligible request still
//! leaves an empty record behind but never fills the slot. Issuance allocates
//! an ID-card number from the shared counter and writes the kit in one step;
//! a number taken by a concurrent issuance is retried, a day issued by a
//! concurrent request resolves to [`KitOutcome::AlreadyIssued`].

use crate::identity::{IdCardCounter, IdentityError};
use crate::policy::{join_plans, kit_eligibility, plans_for_kit_day};
use crate::store::{Constraint, KitStore, StoreError};
use crate::types::{
    IssuedKit, KitDay, KitItem, KitRecord, Participant, ParticipantKey, PaymentStatus,
    RegistrationPlan, StaffId,
};
use serde::Serialize;
use shackles_core::{async_effect, effect::Effect, environment::Clock, reducer::Reducer};
use shackles_runtime::{retry_with_predicate, RetryError, RetryPolicy};
use smallvec::{smallvec, SmallVec};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

// ============================================================================
// Kit contents
// ============================================================================

const WORKSHOP_DAY_KIT: &[(&str, u32)] = &[
    ("Workshop ID card with lanyard", 1),
    ("Workshop handbook", 1),
    ("Lab access wristband", 1),
    ("Notebook", 1),
    ("Pen", 1),
];

const EVENTS_DAY_KIT: &[(&str, u32)] = &[
    ("Symposium ID card with lanyard", 1),
    ("Event schedule booklet", 1),
    ("Tote bag", 1),
    ("Notebook", 1),
    ("Pen", 2),
    ("Meal coupon", 2),
];

const COMBINED_PASS_EXTRAS: &[(&str, u32)] = &[("Combined pass sticker", 1)];

/// Contents of the kit `plan` receives on `day`. Empty when the plan is not
/// eligible for that day.
#[must_use]
pub fn kit_contents(plan: RegistrationPlan, day: KitDay) -> Vec<KitItem> {
    if !kit_eligibility(plan, day) {
        return Vec::new();
    }
    let base = match day {
        KitDay::Workshop => WORKSHOP_DAY_KIT,
        KitDay::Events => EVENTS_DAY_KIT,
    };
    let extras = if plan == RegistrationPlan::Both {
        COMBINED_PASS_EXTRAS
    } else {
        &[]
    };
    base.iter()
        .chain(extras)
        .map(|(item, quantity)| KitItem {
            item: (*item).to_string(),
            quantity: *quantity,
        })
        .collect()
}

// ============================================================================
// Outcome and errors
// ============================================================================

/// Successful kit request
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum KitOutcome {
    /// The kit was handed out now
    Issued {
        /// Kit day
        day: KitDay,
        /// What was handed out
        kit: IssuedKit,
    },
    /// The kit for this day was handed out earlier
    AlreadyIssued {
        /// Kit day
        day: KitDay,
        /// The earlier issuance
        kit: IssuedKit,
    },
}

impl KitOutcome {
    /// The issued kit
    #[must_use]
    pub const fn kit(&self) -> &IssuedKit {
        match self {
            Self::Issued { kit, .. } | Self::AlreadyIssued { kit, .. } => kit,
        }
    }

    /// Metric label
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Issued { .. } => "issued",
            Self::AlreadyIssued { .. } => "already_issued",
        }
    }
}

/// Why a plan does not get a kit on a day
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct KitDenial {
    /// The participant's plan
    pub plan: RegistrationPlan,
    /// Requested kit day
    pub day: KitDay,
    /// Plans that do get this kit
    pub required_plans: Vec<RegistrationPlan>,
}

impl KitDenial {
    fn new(plan: RegistrationPlan, day: KitDay) -> Self {
        Self {
            plan,
            day,
            required_plans: plans_for_kit_day(day).to_vec(),
        }
    }
}

impl fmt::Display for KitDenial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Participant is registered for the {} plan; the {} kit is for the {} plan",
            self.plan,
            self.day,
            join_plans(&self.required_plans)
        )
    }
}

/// Kit rejections
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KitError {
    /// No participant with that ID
    #[error("participant not found")]
    ParticipantNotFound,

    /// Payment not verified
    #[error("payment is {status}, kits require a verified payment")]
    PaymentNotVerified {
        /// Current payment status
        status: PaymentStatus,
    },

    /// Collection point left blank
    #[error("collection point is required")]
    MissingCollectionPoint,

    /// The plan does not include this day's kit
    #[error("not eligible: {0}")]
    NotEligible(KitDenial),

    /// Every ID-card number tried was taken by a concurrent issuance
    #[error("ID-card number allocation gave up after {attempts} conflicting attempts")]
    AllocationExhausted {
        /// Attempts made
        attempts: u32,
    },

    /// ID-card counter failure
    #[error(transparent)]
    Identity(#[from] IdentityError),

    /// Storage failure
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl KitError {
    fn is_card_number_conflict(&self) -> bool {
        match self {
            Self::Store(error) | Self::Identity(IdentityError::Store(error)) => {
                error.is_conflict_on(Constraint::IdCardNumber)
            },
            _ => false,
        }
    }

    fn is_day_conflict(&self) -> bool {
        matches!(self, Self::Store(error) if error.is_conflict_on(Constraint::KitIssuance))
    }
}

// ============================================================================
// State and actions
// ============================================================================

/// Parameters of one kit request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KitRequest {
    /// Kit day
    pub day: KitDay,
    /// Staff member at the desk
    pub staff: StaffId,
    /// Desk
    pub collection_point: String,
}

/// State of one kit request
#[derive(Clone, Debug, Default)]
pub struct KitState {
    /// The participant, as re-read from the store
    pub participant: Option<Participant>,
    /// The participant's kit record once loaded
    pub record: Option<KitRecord>,
    /// Result once the request completed
    pub outcome: Option<KitOutcome>,
    /// Last error
    pub last_error: Option<KitError>,
}

impl KitState {
    /// State for a request about `participant`
    #[must_use]
    pub const fn for_participant(participant: Option<Participant>) -> Self {
        Self {
            participant,
            record: None,
            outcome: None,
            last_error: None,
        }
    }

    /// The result of the request
    ///
    /// # Errors
    ///
    /// The rejection recorded by the reducer.
    pub fn into_result(self) -> Result<KitOutcome, KitError> {
        match (self.outcome, self.last_error) {
            (Some(outcome), None) => Ok(outcome),
            (_, Some(error)) => Err(error),
            (None, None) => Err(KitError::Store(StoreError::Database(
                "kit request did not complete".to_string(),
            ))),
        }
    }
}

/// Actions for the kit ledger
#[derive(Clone, Debug)]
pub enum KitAction {
    // Commands
    /// Hand out the kit for `request.day`
    IssueKit {
        /// What to hand out and where
        request: KitRequest,
    },

    // Events
    /// The kit record exists (fetched or just created)
    RecordLoaded {
        /// The record
        record: KitRecord,
        /// The request being served
        request: KitRequest,
    },
    /// The kit was written to the record
    KitIssued {
        /// Updated record
        record: KitRecord,
        /// Kit day
        day: KitDay,
    },
    /// The day's kit had been issued before
    KitAlreadyIssued {
        /// Current record
        record: KitRecord,
        /// Kit day
        day: KitDay,
    },
    /// The request was rejected
    KitFailed {
        /// Why
        error: KitError,
    },
}

// ============================================================================
// Environment
// ============================================================================

/// Environment dependencies for the kit ledger
#[derive(Clone)]
pub struct KitEnvironment {
    /// Clock for timestamps
    pub clock: Arc<dyn Clock>,
    /// Kit records and the ID-card counter
    pub kits: Arc<dyn KitStore>,
    /// Retry policy for ID-card number conflicts
    pub retry: RetryPolicy,
}

impl KitEnvironment {
    /// Creates a new `KitEnvironment`
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, kits: Arc<dyn KitStore>, retry: RetryPolicy) -> Self {
        Self { clock, kits, retry }
    }
}

// ============================================================================
// Reducer
// ============================================================================

/// Reducer for the kit ledger
#[derive(Clone, Debug, Default)]
pub struct KitReducer;

impl KitReducer {
    /// Creates a new `KitReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn authorize(
        participant: Option<&Participant>,
        request: &KitRequest,
    ) -> Result<ParticipantKey, KitError> {
        let participant = participant.ok_or(KitError::ParticipantNotFound)?;
        if !participant.is_verified() {
            return Err(KitError::PaymentNotVerified {
                status: participant.payment_status,
            });
        }
        if request.collection_point.trim().is_empty() {
            return Err(KitError::MissingCollectionPoint);
        }
        Ok(participant.key)
    }

    fn apply_event(state: &mut KitState, action: &KitAction) {
        match action {
            KitAction::RecordLoaded { record, .. } => {
                state.record = Some(record.clone());
            },
            KitAction::KitIssued { record, day } | KitAction::KitAlreadyIssued { record, day } => {
                state.record = Some(record.clone());
                let Some(kit) = record.issued(*day).cloned() else {
                    state.last_error = Some(KitError::Store(StoreError::Corrupt(format!(
                        "kit record for {} has no {day} kit",
                        record.participant
                    ))));
                    return;
                };
                state.outcome = Some(if matches!(action, KitAction::KitIssued { .. }) {
                    KitOutcome::Issued { day: *day, kit }
                } else {
                    KitOutcome::AlreadyIssued { day: *day, kit }
                });
                state.last_error = None;
            },
            KitAction::KitFailed { error } => {
                state.outcome = None;
                state.last_error = Some(error.clone());
            },
            KitAction::IssueKit { .. } => {},
        }
    }
}

/// Allocate a card number and write the kit, retrying number conflicts.
async fn issue(
    kits: Arc<dyn KitStore>,
    retry: RetryPolicy,
    participant: ParticipantKey,
    plan: RegistrationPlan,
    request: KitRequest,
    now: chrono::DateTime<chrono::Utc>,
) -> KitAction {
    let day = request.day;
    let counter = IdCardCounter::new(Arc::clone(&kits));
    let (counter, store, request) = (&counter, kits.as_ref(), &request);
    let attempt = move || async move {
        let id_card_number = counter.allocate().await?;
        let kit = IssuedKit {
            issued_at: now,
            issued_by: request.staff.clone(),
            contents: kit_contents(plan, day),
            id_card_number,
            collection_point: request.collection_point.trim().to_string(),
        };
        Ok::<_, KitError>(store.record_issuance(participant, day, &kit).await?)
    };

    let retried = retry_with_predicate(
        &retry,
        "id_card_number",
        attempt,
        KitError::is_card_number_conflict,
    );
    match retried.await {
        Ok(record) => KitAction::KitIssued { record, day },
        Err(RetryError::Aborted(error)) if error.is_day_conflict() => {
            tracing::debug!(%participant, %day, "Concurrent issuance, reporting the earlier kit");
            match kits.kit_record(participant).await {
                Ok(Some(record)) => KitAction::KitAlreadyIssued { record, day },
                Ok(None) => KitAction::KitFailed { error },
                Err(store) => KitAction::KitFailed { error: store.into() },
            }
        },
        Err(RetryError::Exhausted { attempts, .. }) => KitAction::KitFailed {
            error: KitError::AllocationExhausted { attempts },
        },
        Err(RetryError::Aborted(error)) => KitAction::KitFailed { error },
    }
}

impl Reducer for KitReducer {
    type State = KitState;
    type Action = KitAction;
    type Environment = KitEnvironment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            KitAction::IssueKit { request } => {
                state.outcome = None;
                state.last_error = None;

                let key = match Self::authorize(state.participant.as_ref(), &request) {
                    Ok(key) => key,
                    Err(error) => {
                        Self::apply_event(state, &KitAction::KitFailed { error });
                        return SmallVec::new();
                    },
                };

                let kits = Arc::clone(&env.kits);
                let fresh = KitRecord::new(key, env.clock.now());
                smallvec![async_effect! {
                    Some(match kits.get_or_create_kit_record(fresh).await {
                        Ok(record) => KitAction::RecordLoaded { record, request },
                        Err(error) => KitAction::KitFailed { error: error.into() },
                    })
                }]
            },

            KitAction::RecordLoaded { record, request } => {
                let Some(plan) = state.participant.as_ref().map(|p| p.plan) else {
                    return SmallVec::new();
                };
                let day = request.day;
                let participant = record.participant;
                let already_issued = record.is_issued(day);
                Self::apply_event(state, &KitAction::RecordLoaded {
                    record: record.clone(),
                    request: request.clone(),
                });

                if !kit_eligibility(plan, day) {
                    Self::apply_event(state, &KitAction::KitFailed {
                        error: KitError::NotEligible(KitDenial::new(plan, day)),
                    });
                    return SmallVec::new();
                }
                if already_issued {
                    Self::apply_event(state, &KitAction::KitAlreadyIssued { record, day });
                    return SmallVec::new();
                }

                let kits = Arc::clone(&env.kits);
                let retry = env.retry.clone();
                let now = env.clock.now();
                smallvec![async_effect! {
                    Some(issue(kits, retry, participant, plan, request, now).await)
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
