//! Payment verification workflow.
//!
//! The only place a participant changes payment state or QR version:
//!
//! - `VerifyPayment`: allocate a participant code, issue the first QR, commit
//!   the verified participant together with its notification.
//! - `RejectPayment`: record the reason, commit, notify.
//! - `RegenerateQr`: issue a new token at `version + 1`, revoking the old QR.
//!
//! Every transition commits with an [`Expectation`] about the state it was
//! decided on, so two admins acting on the same participant cannot both win.
//! A participant code taken by a concurrent verification fails the commit
//! with a `ParticipantCode` conflict; code allocation and commit are retried
//! together under the configured policy.
//!
//! The QR image upload is not part of the commit: when it fails the
//! transition still succeeds and the failure is reported as a warning. The
//! image of an attempt that does not commit is discarded. The
//! notification is committed to the outbox with the transition and sent once
//! inline afterwards; whatever happens to that send, the transition stands.

use crate::identity::{IdentityError, ParticipantIdentity};
use crate::notifications::{DeliveryResult, EmailMessage, NotificationDispatcher, OutboxMessage};
use crate::qr::{QrError, QrPayload, TokenSource};
use crate::qr_image::{destination_key, QrImageService};
use crate::store::{Constraint, Expectation, ParticipantCommit, ParticipantStore, StoreError};
use crate::types::{
    OutboxId, Participant, ParticipantCode, PaymentStatus, QrImage, Rejection, StaffId,
    Verification,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use shackles_core::{async_effect, effect::Effect, environment::Clock, reducer::Reducer};
use shackles_runtime::{retry_with_predicate, RetryError, RetryPolicy};
use smallvec::{smallvec, SmallVec};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Errors
// ============================================================================

/// Verification workflow rejections
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerificationError {
    /// No participant with that key
    #[error("participant not found")]
    ParticipantNotFound,

    /// Already verified and identified; a second verification is a no-op error
    #[error("payment already verified as {code}")]
    AlreadyVerified {
        /// The participant's code
        code: ParticipantCode,
    },

    /// Only pending payments can be verified or rejected
    #[error("payment is {status}, expected pending")]
    NotPending {
        /// Current payment status
        status: PaymentStatus,
    },

    /// QR regeneration needs a verified, identified participant
    #[error("payment is {status}, QR regeneration requires a verified participant")]
    NotVerified {
        /// Current payment status
        status: PaymentStatus,
    },

    /// Rejections must say why
    #[error("rejection reason is required")]
    EmptyRejectionReason,

    /// Another transition of this participant committed first
    #[error("participant was modified concurrently")]
    ConcurrentModification,

    /// Every participant code tried was taken by a concurrent verification
    #[error("participant code allocation gave up after {attempts} conflicting attempts")]
    AllocationExhausted {
        /// Attempts made
        attempts: u32,
    },

    /// Code allocation failed
    #[error(transparent)]
    Identity(#[from] IdentityError),

    /// QR payload could not be built
    #[error(transparent)]
    Qr(#[from] QrError),

    /// Storage failure
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl VerificationError {
    fn is_code_conflict(&self) -> bool {
        matches!(self, Self::Store(error) if error.is_conflict_on(Constraint::ParticipantCode))
    }
}

// ============================================================================
// State and actions
// ============================================================================

/// The transition a request performed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Payment verified, code and first QR issued
    Verified,
    /// Payment rejected
    Rejected,
    /// New QR issued, old one revoked
    QrRegenerated,
}

impl Decision {
    /// Metric label
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Verified => "verified",
            Self::Rejected => "rejected",
            Self::QrRegenerated => "regenerated",
        }
    }
}

/// What a successful request did
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct VerificationReport {
    /// The transition
    pub decision: Decision,
    /// The participant after the transition
    pub participant: Participant,
    /// Result of the inline notification attempt; `None` if it was not
    /// attempted or the message was already taken by the outbox worker
    pub notification: Option<DeliveryResult>,
    /// Degraded side effects (image upload, notification)
    pub warnings: Vec<String>,
}

/// State of one verification request
#[derive(Clone, Debug, Default)]
pub struct VerificationState {
    /// The participant the decision is made on
    pub participant: Option<Participant>,
    /// The transition, once committed
    pub decision: Option<Decision>,
    /// Inline notification result
    pub notification: Option<DeliveryResult>,
    /// Degraded side effects
    pub warnings: Vec<String>,
    /// Last error
    pub last_error: Option<VerificationError>,
}

impl VerificationState {
    /// State for a request about `participant`
    #[must_use]
    pub fn for_participant(participant: Option<Participant>) -> Self {
        Self {
            participant,
            ..Self::default()
        }
    }

    /// The result of the request
    ///
    /// # Errors
    ///
    /// The rejection recorded by the workflow.
    pub fn into_result(self) -> Result<VerificationReport, VerificationError> {
        if let Some(error) = self.last_error {
            return Err(error);
        }
        match (self.decision, self.participant) {
            (Some(decision), Some(participant)) => Ok(VerificationReport {
                decision,
                participant,
                notification: self.notification,
                warnings: self.warnings,
            }),
            (_, None) => Err(VerificationError::ParticipantNotFound),
            (None, Some(_)) => Err(VerificationError::Store(StoreError::Database(
                "verification did not complete".to_string(),
            ))),
        }
    }
}

/// Actions for the verification workflow
#[derive(Clone, Debug)]
pub enum VerificationAction {
    // Commands
    /// Verify a pending payment
    VerifyPayment {
        /// Admin
        staff: StaffId,
        /// Optional notes
        notes: Option<String>,
    },
    /// Reject a pending payment
    RejectPayment {
        /// Admin
        staff: StaffId,
        /// Reason shown to the participant
        reason: String,
    },
    /// Replace the participant's QR, revoking the current one
    RegenerateQr {
        /// Admin
        staff: StaffId,
    },

    // Events
    /// A transition committed
    TransitionCommitted {
        /// Which one
        decision: Decision,
        /// The participant as committed
        participant: Box<Participant>,
        /// Outbox message committed with it
        notification: Option<OutboxId>,
        /// Degraded side effects so far
        warnings: Vec<String>,
    },
    /// The inline notification attempt finished
    NotificationAttempted {
        /// `None` if the message was not deliverable
        result: Option<DeliveryResult>,
    },
    /// The request was rejected
    VerificationFailed {
        /// Why
        error: VerificationError,
    },
}

// ============================================================================
// Environment
// ============================================================================

/// Environment dependencies for the verification workflow
#[derive(Clone)]
pub struct VerificationEnvironment {
    /// Clock for timestamps
    pub clock: Arc<dyn Clock>,
    /// Participant records and the code counter
    pub participants: Arc<dyn ParticipantStore>,
    /// QR image rendering and upload
    pub qr_images: Arc<dyn QrImageService>,
    /// Capability tokens
    pub tokens: Arc<dyn TokenSource>,
    /// Outbox delivery
    pub dispatcher: Arc<NotificationDispatcher>,
    /// Retry policy for participant-code conflicts
    pub retry: RetryPolicy,
    /// QR namespace
    pub namespace: String,
}

// ============================================================================
// Transitions
// ============================================================================

/// A committed transition
struct Committed {
    participant: Participant,
    notification: Option<OutboxId>,
    warnings: Vec<String>,
}

impl Committed {
    fn into_action(self, decision: Decision) -> VerificationAction {
        VerificationAction::TransitionCommitted {
            decision,
            participant: Box::new(self.participant),
            notification: self.notification,
            warnings: self.warnings,
        }
    }
}

/// Freshly issued QR credentials
struct IssuedQr {
    token: String,
    version: u32,
    image: Option<QrImage>,
    warnings: Vec<String>,
}

/// Issue a token at `version` and publish its image. An image failure is a
/// warning, not an error.
async fn issue_qr(
    env: &VerificationEnvironment,
    code: &ParticipantCode,
    version: u32,
) -> Result<IssuedQr, VerificationError> {
    let token = env.tokens.issue();
    let payload = QrPayload::new(code, &token, version, &env.namespace).encode()?;
    let key = destination_key(code, version, Uuid::new_v4());
    let mut warnings = Vec::new();
    let image = match env.qr_images.publish(&payload, &key).await {
        Ok(image) => Some(image),
        Err(error) => {
            tracing::warn!(
                %code,
                version,
                error = %error,
                "QR image publish failed, continuing without image"
            );
            warnings.push(format!("QR image unavailable: {error}"));
            None
        },
    };
    Ok(IssuedQr {
        token,
        version,
        image,
        warnings,
    })
}

/// Remove the image of a transition that was not committed.
async fn discard_image(env: &VerificationEnvironment, image: Option<&QrImage>) {
    let Some(image) = image else {
        return;
    };
    if let Err(error) = env.qr_images.discard(&image.key).await {
        tracing::warn!(key = %image.key, error = %error, "Could not discard unused QR image");
    }
}

async fn commit(
    env: &VerificationEnvironment,
    participant: Participant,
    expected: Expectation,
    email: EmailMessage,
    now: DateTime<Utc>,
) -> Result<(Participant, OutboxId), VerificationError> {
    let message = OutboxMessage::new(participant.key, email, now);
    let id = message.id;
    env.participants
        .commit_transition(ParticipantCommit {
            participant: participant.clone(),
            expected,
            notification: Some(message),
        })
        .await?;
    Ok((participant, id))
}

/// One verification attempt: allocate, issue, commit.
async fn verify_once(
    env: &VerificationEnvironment,
    current: &Participant,
    staff: &StaffId,
    notes: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Committed, VerificationError> {
    let code = ParticipantIdentity::new(Arc::clone(&env.participants))
        .allocate(current.plan)
        .await?;
    let qr = issue_qr(env, &code, current.qr_token_version + 1).await?;

    let expected = if current.awaiting_identity() {
        Expectation::VerifiedWithoutCode
    } else {
        Expectation::Pending
    };
    let mut verified = current.clone();
    verified.code = Some(code);
    verified.payment_status = PaymentStatus::Verified;
    verified.verification = Some(Verification {
        verified_at: now,
        verified_by: staff.clone(),
        notes: notes.map(str::to_string),
    });
    verified.qr_token = Some(qr.token);
    verified.qr_token_version = qr.version;
    verified.qr_image = qr.image.clone();

    let email = EmailMessage::payment_verified(&verified);
    let (participant, id) = match commit(env, verified, expected, email, now).await {
        Ok(committed) => committed,
        Err(error) => {
            discard_image(env, qr.image.as_ref()).await;
            return Err(error);
        },
    };
    Ok(Committed {
        participant,
        notification: Some(id),
        warnings: qr.warnings,
    })
}

/// After a lost race, say what the winner did.
async fn classify_stale(
    env: &VerificationEnvironment,
    current: &Participant,
) -> VerificationError {
    let was_unverified =
        current.payment_status == PaymentStatus::Pending || current.code.is_none();
    match env.participants.participant(current.key).await {
        Ok(Some(latest)) => match (latest.payment_status, latest.code) {
            (PaymentStatus::Verified, Some(code)) if was_unverified => {
                VerificationError::AlreadyVerified { code }
            },
            (PaymentStatus::Rejected, _) => VerificationError::NotPending {
                status: PaymentStatus::Rejected,
            },
            _ => VerificationError::ConcurrentModification,
        },
        Ok(None) => VerificationError::ParticipantNotFound,
        Err(error) => error.into(),
    }
}

async fn verify(
    env: VerificationEnvironment,
    current: Participant,
    staff: StaffId,
    notes: Option<String>,
    now: DateTime<Utc>,
) -> VerificationAction {
    let (env_ref, current_ref, staff_ref, notes_ref) = (&env, &current, &staff, notes.as_deref());
    let attempt = move || verify_once(env_ref, current_ref, staff_ref, notes_ref, now);

    let retried = retry_with_predicate(
        &env.retry,
        "participant_code",
        attempt,
        VerificationError::is_code_conflict,
    );
    match retried.await {
        Ok(committed) => committed.into_action(Decision::Verified),
        Err(RetryError::Exhausted { attempts, .. }) => VerificationAction::VerificationFailed {
            error: VerificationError::AllocationExhausted { attempts },
        },
        Err(RetryError::Aborted(VerificationError::Store(StoreError::StaleWrite(_)))) => {
            VerificationAction::VerificationFailed {
                error: classify_stale(&env, &current).await,
            }
        },
        Err(RetryError::Aborted(error)) => VerificationAction::VerificationFailed { error },
    }
}

async fn reject(
    env: VerificationEnvironment,
    current: Participant,
    staff: StaffId,
    reason: String,
    now: DateTime<Utc>,
) -> VerificationAction {
    let mut rejected = current.clone();
    rejected.payment_status = PaymentStatus::Rejected;
    rejected.rejection = Some(Rejection {
        reason: reason.clone(),
        rejected_at: now,
        rejected_by: staff,
    });
    let email = EmailMessage::payment_rejected(&rejected, &reason);

    match commit(&env, rejected, Expectation::Pending, email, now).await {
        Ok((participant, id)) => Committed {
            participant,
            notification: Some(id),
            warnings: Vec::new(),
        }
        .into_action(Decision::Rejected),
        Err(VerificationError::Store(StoreError::StaleWrite(_))) => {
            VerificationAction::VerificationFailed {
                error: classify_stale(&env, &current).await,
            }
        },
        Err(error) => VerificationAction::VerificationFailed { error },
    }
}

async fn regenerate(
    env: VerificationEnvironment,
    current: Participant,
    code: ParticipantCode,
    now: DateTime<Utc>,
) -> VerificationAction {
    let result = async {
        let qr = issue_qr(&env, &code, current.qr_token_version + 1).await?;
        let mut regenerated = current.clone();
        regenerated.qr_token = Some(qr.token);
        regenerated.qr_token_version = qr.version;
        regenerated.qr_image = qr.image.clone();

        let email = EmailMessage::qr_regenerated(&regenerated);
        let expected = Expectation::QrVersion(current.qr_token_version);
        let (participant, id) = match commit(&env, regenerated, expected, email, now).await {
            Ok(committed) => committed,
            Err(error) => {
                discard_image(&env, qr.image.as_ref()).await;
                return Err(error);
            },
        };
        Ok::<_, VerificationError>(Committed {
            participant,
            notification: Some(id),
            warnings: qr.warnings,
        })
    }
    .await;

    match result {
        Ok(committed) => committed.into_action(Decision::QrRegenerated),
        Err(VerificationError::Store(StoreError::StaleWrite(_))) => {
            VerificationAction::VerificationFailed {
                error: VerificationError::ConcurrentModification,
            }
        },
        Err(error) => VerificationAction::VerificationFailed { error },
    }
}

// ============================================================================
// Reducer
// ============================================================================

/// Reducer for the verification workflow
#[derive(Clone, Debug, Default)]
pub struct VerificationReducer;

impl VerificationReducer {
    /// Creates a new `VerificationReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn fail(
        state: &mut VerificationState,
        error: VerificationError,
    ) -> SmallVec<[Effect<VerificationAction>; 4]> {
        Self::apply_event(state, &VerificationAction::VerificationFailed { error });
        SmallVec::new()
    }

    fn apply_event(state: &mut VerificationState, action: &VerificationAction) {
        match action {
            VerificationAction::TransitionCommitted {
                decision,
                participant,
                warnings,
                ..
            } => {
                state.participant = Some(participant.as_ref().clone());
                state.decision = Some(*decision);
                state.warnings.extend(warnings.iter().cloned());
                state.last_error = None;
            },
            VerificationAction::NotificationAttempted { result } => {
                if let Some(DeliveryResult::Failed { error }) = result {
                    state
                        .warnings
                        .push(format!("notification not delivered, queued for retry: {error}"));
                }
                state.notification = result.clone();
            },
            VerificationAction::VerificationFailed { error } => {
                state.decision = None;
                state.last_error = Some(error.clone());
            },
            VerificationAction::VerifyPayment { .. }
            | VerificationAction::RejectPayment { .. }
            | VerificationAction::RegenerateQr { .. } => {},
        }
    }

    fn start(state: &mut VerificationState) -> Result<Participant, VerificationError> {
        state.decision = None;
        state.notification = None;
        state.warnings.clear();
        state.last_error = None;
        state.participant.clone().ok_or(VerificationError::ParticipantNotFound)
    }
}

impl Reducer for VerificationReducer {
    type State = VerificationState;
    type Action = VerificationAction;
    type Environment = VerificationEnvironment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            VerificationAction::VerifyPayment { staff, notes } => {
                let current = match Self::start(state) {
                    Ok(current) => current,
                    Err(error) => return Self::fail(state, error),
                };
                match (current.payment_status, &current.code) {
                    (PaymentStatus::Verified, Some(code)) => {
                        let code = code.clone();
                        return Self::fail(state, VerificationError::AlreadyVerified { code });
                    },
                    (PaymentStatus::Rejected, _) => {
                        return Self::fail(state, VerificationError::NotPending {
                            status: PaymentStatus::Rejected,
                        });
                    },
                    (PaymentStatus::Pending, _) | (PaymentStatus::Verified, None) => {},
                }

                let env = env.clone();
                let now = env.clock.now();
                smallvec![async_effect! {
                    Some(verify(env, current, staff, notes, now).await)
                }]
            },

            VerificationAction::RejectPayment { staff, reason } => {
                let current = match Self::start(state) {
                    Ok(current) => current,
                    Err(error) => return Self::fail(state, error),
                };
                let reason = reason.trim().to_string();
                if reason.is_empty() {
                    return Self::fail(state, VerificationError::EmptyRejectionReason);
                }
                if current.payment_status != PaymentStatus::Pending {
                    return Self::fail(state, VerificationError::NotPending {
                        status: current.payment_status,
                    });
                }

                let env = env.clone();
                let now = env.clock.now();
                smallvec![async_effect! {
                    Some(reject(env, current, staff, reason, now).await)
                }]
            },

            VerificationAction::RegenerateQr { staff } => {
                let current = match Self::start(state) {
                    Ok(current) => current,
                    Err(error) => return Self::fail(state, error),
                };
                let code = match (&current.code, current.is_verified()) {
                    (Some(code), true) => code.clone(),
                    _ => {
                        return Self::fail(state, VerificationError::NotVerified {
                            status: current.payment_status,
                        });
                    },
                };

                tracing::info!(
                    %code,
                    staff = %staff,
                    version = current.qr_token_version,
                    "Regenerating QR"
                );
                let env = env.clone();
                let now = env.clock.now();
                smallvec![async_effect! {
                    Some(regenerate(env, current, code, now).await)
                }]
            },

            VerificationAction::TransitionCommitted { notification, .. } => {
                let id = notification;
                Self::apply_event(state, &action);
                let Some(id) = id else {
                    return SmallVec::new();
                };

                let dispatcher = Arc::clone(&env.dispatcher);
                smallvec![async_effect! {
                    let result = match dispatcher.dispatch(id).await {
                        Ok(result) => result,
                        Err(error) => {
                            tracing::warn!(
                                outbox_id = %id,
                                error = %error,
                                "Inline notification failed, left to the outbox worker"
                            );
                            Some(DeliveryResult::Failed { error: error.to_string() })
                        },
                    };
                    Some(VerificationAction::NotificationAttempted { result })
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

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::mocks::{MockQrImageService, RecordingMailer, SequentialTokenSource};
    use crate::store::InMemoryStore;
    use crate::types::RegistrationPlan;
    use shackles_testing::{assertions, test_clock, ReducerTest};

    fn env() -> VerificationEnvironment {
        let store = Arc::new(InMemoryStore::new());
        let clock: Arc<dyn Clock> = Arc::new(test_clock());
        VerificationEnvironment {
            clock: Arc::clone(&clock),
            participants: store.clone(),
            qr_images: Arc::new(MockQrImageService::new()),
            tokens: Arc::new(SequentialTokenSource::new()),
            dispatcher: Arc::new(NotificationDispatcher::new(
                store,
                Arc::new(RecordingMailer::new()),
                clock,
                3,
            )),
            retry: RetryPolicy::immediate(3),
            namespace: crate::qr::DEFAULT_NAMESPACE.to_string(),
        }
    }

    fn pending(plan: RegistrationPlan) -> Participant {
        Participant::pending(
            "Meera".to_string(),
            "meera@example.com".to_string(),
            plan,
            "UTR-5521".to_string(),
            test_clock().now(),
        )
    }

    fn verified(plan: RegistrationPlan) -> Participant {
        let mut participant = pending(plan);
        participant.payment_status = PaymentStatus::Verified;
        participant.code = ParticipantCode::new(plan, 8);
        participant.qr_token = Some("token-1".to_string());
        participant.qr_token_version = 1;
        participant
    }

    #[test]
    fn verifying_twice_is_rejected_without_io() {
        let participant = verified(RegistrationPlan::General);
        let code = participant.code.clone().unwrap();

        ReducerTest::new(VerificationReducer::new())
            .with_env(env())
            .given_state(VerificationState::for_participant(Some(participant)))
            .when_action(VerificationAction::VerifyPayment {
                staff: StaffId::new("admin"),
                notes: None,
            })
            .then_state(move |state| {
                assert_eq!(state.last_error, Some(VerificationError::AlreadyVerified { code }));
            })
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn verified_without_code_can_be_completed() {
        let mut participant = pending(RegistrationPlan::Workshop);
        participant.payment_status = PaymentStatus::Verified;

        ReducerTest::new(VerificationReducer::new())
            .with_env(env())
            .given_state(VerificationState::for_participant(Some(participant)))
            .when_action(VerificationAction::VerifyPayment {
                staff: StaffId::new("admin"),
                notes: None,
            })
            .then_state(|state| assert!(state.last_error.is_none()))
            .then_effects(assertions::assert_has_future_effect)
            .run();
    }

    #[test]
    fn rejection_needs_a_reason() {
        ReducerTest::new(VerificationReducer::new())
            .with_env(env())
            .given_state(VerificationState::for_participant(Some(pending(RegistrationPlan::Both))))
            .when_action(VerificationAction::RejectPayment {
                staff: StaffId::new("admin"),
                reason: "   ".to_string(),
            })
            .then_state(|state| {
                assert_eq!(state.last_error, Some(VerificationError::EmptyRejectionReason));
            })
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn rejecting_a_verified_payment_is_refused() {
        ReducerTest::new(VerificationReducer::new())
            .with_env(env())
            .given_state(VerificationState::for_participant(Some(verified(RegistrationPlan::Both))))
            .when_action(VerificationAction::RejectPayment {
                staff: StaffId::new("admin"),
                reason: "duplicate transfer".to_string(),
            })
            .then_state(|state| {
                assert_eq!(
                    state.last_error,
                    Some(VerificationError::NotPending { status: PaymentStatus::Verified })
                );
            })
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn regenerating_requires_verification() {
        ReducerTest::new(VerificationReducer::new())
            .with_env(env())
            .given_state(VerificationState::for_participant(Some(pending(
                RegistrationPlan::General,
            ))))
            .when_action(VerificationAction::RegenerateQr { staff: StaffId::new("admin") })
            .then_state(|state| {
                assert_eq!(
                    state.last_error,
                    Some(VerificationError::NotVerified { status: PaymentStatus::Pending })
                );
            })
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn committed_transition_dispatches_its_notification() {
        let participant = verified(RegistrationPlan::General);

        ReducerTest::new(VerificationReducer::new())
            .with_env(env())
            .given_state(VerificationState::for_participant(Some(pending(
                RegistrationPlan::General,
            ))))
            .when_action(VerificationAction::TransitionCommitted {
                decision: Decision::Verified,
                participant: Box::new(participant.clone()),
                notification: Some(OutboxId::new()),
                warnings: vec!["QR image unavailable: upload failed".to_string()],
            })
            .then_state(move |state| {
                assert_eq!(state.decision, Some(Decision::Verified));
                assert_eq!(state.participant.as_ref(), Some(&participant));
                assert_eq!(state.warnings.len(), 1);
            })
            .then_effects(|effects| assertions::assert_effects_count(effects, 1))
            .run();
    }

    #[test]
    fn failed_inline_delivery_is_a_warning() {
        ReducerTest::new(VerificationReducer::new())
            .with_env(env())
            .given_state(VerificationState::for_participant(Some(verified(RegistrationPlan::Both))))
            .given_actions(vec![VerificationAction::TransitionCommitted {
                decision: Decision::QrRegenerated,
                participant: Box::new(verified(RegistrationPlan::Both)),
                notification: None,
                warnings: Vec::new(),
            }])
            .when_action(VerificationAction::NotificationAttempted {
                result: Some(DeliveryResult::Failed {
                    error: "smtp timeout".to_string(),
                }),
            })
            .then_state(|state| {
                assert_eq!(state.decision, Some(Decision::QrRegenerated));
                assert!(state.last_error.is_none());
                assert!(state.warnings[0].contains("smtp timeout"));
            })
            .then_effects(assertions::assert_no_effects)
            .run();
    }
}
