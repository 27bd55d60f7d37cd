//! Request services - one command per request.
//!
//! Every request follows the same shape:
//! 1. Load the participant from the store (the source of truth, never a
//!    scanned payload)
//! 2. Seed a fresh `Store` with it and send one command
//! 3. Let the reducer's effects run to completion
//! 4. Read the outcome back from state and record metrics

use crate::aggregates::check_in::{
    CheckInAction, CheckInEnvironment, CheckInError, CheckInOutcome, CheckInReducer, CheckInState,
};
use crate::aggregates::kit::{
    KitAction, KitEnvironment, KitError, KitOutcome, KitReducer, KitRequest, KitState,
};
use crate::aggregates::verification::{
    VerificationAction, VerificationEnvironment, VerificationError, VerificationReducer,
    VerificationReport, VerificationState,
};
use crate::metrics;
use crate::store::{AttendanceStore, KitStore, ParticipantStore, StoreError};
use crate::types::{
    AttendanceRecord, CheckInTarget, InvalidPlan, KitDay, KitRecord, Participant,
    ParticipantCode, ParticipantKey, RegistrationPlan, StaffId,
};
use serde::{Deserialize, Serialize};
use shackles_core::environment::Clock;
use shackles_runtime::{Store, StoreError as RuntimeError};
use std::sync::Arc;
use thiserror::Error;

/// The runtime only fails when a reducer loops; report that as a storage-side
/// fault of the request.
fn runtime_failure(error: &RuntimeError) -> StoreError {
    StoreError::Database(format!("request did not settle: {error}"))
}

// ============================================================================
// Registration
// ============================================================================

/// A registration form as submitted
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    /// Full name
    pub name: String,
    /// Contact email
    pub email: String,
    /// Plan as sent by the form (`general`, `workshop`, `both`)
    pub plan: String,
    /// Reference of the payment made outside the system
    pub payment_reference: String,
}

/// Submission rejections
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmissionError {
    /// Unknown plan
    #[error(transparent)]
    InvalidPlan(#[from] InvalidPlan),

    /// A required field was blank
    #[error("{0} is required")]
    MissingField(&'static str),

    /// Email address is not usable
    #[error("invalid email address: {0:?}")]
    InvalidEmail(String),

    /// Storage failure
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Accepts registrations.
pub struct RegistrationService {
    participants: Arc<dyn ParticipantStore>,
    clock: Arc<dyn Clock>,
}

impl RegistrationService {
    /// Create a new registration service
    #[must_use]
    pub fn new(participants: Arc<dyn ParticipantStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            participants,
            clock,
        }
    }

    /// Store a pending participant. No ID is allocated until the payment is
    /// verified.
    ///
    /// # Errors
    ///
    /// Invalid fields or a storage failure.
    #[tracing::instrument(skip(self, submission), fields(plan = %submission.plan))]
    pub async fn submit(&self, submission: Submission) -> Result<Participant, SubmissionError> {
        let plan: RegistrationPlan = submission.plan.parse()?;
        let name = required("name", &submission.name)?;
        let payment_reference = required("payment reference", &submission.payment_reference)?;
        let email = required("email", &submission.email)?;
        if !is_plausible_email(&email) {
            return Err(SubmissionError::InvalidEmail(email));
        }

        let participant =
            Participant::pending(name, email, plan, payment_reference, self.clock.now());
        self.participants.insert_participant(&participant).await?;
        metrics::record_registration(plan);
        tracing::info!(participant = %participant.key, "Registration submitted");
        Ok(participant)
    }
}

fn required(field: &'static str, value: &str) -> Result<String, SubmissionError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(SubmissionError::MissingField(field));
    }
    Ok(value.to_string())
}

fn is_plausible_email(email: &str) -> bool {
    email.split_once('@').is_some_and(|(local, domain)| {
        !local.is_empty() && !domain.is_empty() && !email.contains(char::is_whitespace)
    })
}

// ============================================================================
// Payment verification
// ============================================================================

/// Admin decisions on payments.
pub struct VerificationService {
    env: VerificationEnvironment,
}

impl VerificationService {
    /// Create a new verification service
    #[must_use]
    pub const fn new(env: VerificationEnvironment) -> Self {
        Self { env }
    }

    /// Verify a pending payment: allocate the participant code, issue the
    /// first QR and notify the participant.
    ///
    /// # Errors
    ///
    /// See [`VerificationError`].
    #[tracing::instrument(skip(self, notes), fields(participant = %participant, staff = %staff))]
    pub async fn verify(
        &self,
        participant: ParticipantKey,
        staff: StaffId,
        notes: Option<String>,
    ) -> Result<VerificationReport, VerificationError> {
        self.run(participant, VerificationAction::VerifyPayment { staff, notes })
            .await
    }

    /// Reject a pending payment with a reason.
    ///
    /// # Errors
    ///
    /// See [`VerificationError`].
    #[tracing::instrument(skip(self, reason), fields(participant = %participant, staff = %staff))]
    pub async fn reject(
        &self,
        participant: ParticipantKey,
        staff: StaffId,
        reason: String,
    ) -> Result<VerificationReport, VerificationError> {
        self.run(participant, VerificationAction::RejectPayment { staff, reason })
            .await
    }

    /// Issue a new QR, revoking every QR issued before.
    ///
    /// # Errors
    ///
    /// See [`VerificationError`].
    #[tracing::instrument(skip(self), fields(participant = %participant, staff = %staff))]
    pub async fn regenerate_qr(
        &self,
        participant: ParticipantKey,
        staff: StaffId,
    ) -> Result<VerificationReport, VerificationError> {
        self.run(participant, VerificationAction::RegenerateQr { staff })
            .await
    }

    async fn run(
        &self,
        key: ParticipantKey,
        action: VerificationAction,
    ) -> Result<VerificationReport, VerificationError> {
        let participant = self.env.participants.participant(key).await?;
        let store = Store::new(
            VerificationState::for_participant(participant),
            VerificationReducer::new(),
            self.env.clone(),
        );
        store
            .send(action)
            .await
            .map_err(|error| runtime_failure(&error))?;

        match store.into_state().into_result() {
            Ok(report) => {
                metrics::record_verification(report.decision.label());
                for warning in &report.warnings {
                    tracing::warn!(
                        warning = %warning,
                        "Transition committed with a degraded side effect"
                    );
                }
                tracing::info!(
                    decision = report.decision.label(),
                    code = ?report.participant.code,
                    "Payment decision committed"
                );
                Ok(report)
            },
            Err(error) => {
                metrics::record_verification("failed");
                tracing::info!(error = %error, "Payment decision refused");
                Err(error)
            },
        }
    }
}

// ============================================================================
// Check-in
// ============================================================================

/// Records attendance.
pub struct CheckInService {
    participants: Arc<dyn ParticipantStore>,
    env: CheckInEnvironment,
}

impl CheckInService {
    /// Create a new check-in service
    #[must_use]
    pub const fn new(participants: Arc<dyn ParticipantStore>, env: CheckInEnvironment) -> Self {
        Self { participants, env }
    }

    /// Check the participant with `code` into `target`.
    ///
    /// # Errors
    ///
    /// See [`CheckInError`].
    #[tracing::instrument(
        skip(self, target),
        fields(code = %code, target = %target.key(), staff = %staff)
    )]
    pub async fn check_in(
        &self,
        code: &ParticipantCode,
        target: CheckInTarget,
        staff: StaffId,
    ) -> Result<CheckInOutcome, CheckInError> {
        let participant = self.participants.participant_by_code(code).await?;
        self.check_in_participant(participant, target, staff).await
    }

    /// Check in an already loaded participant.
    ///
    /// # Errors
    ///
    /// See [`CheckInError`].
    pub async fn check_in_participant(
        &self,
        participant: Option<Participant>,
        target: CheckInTarget,
        staff: StaffId,
    ) -> Result<CheckInOutcome, CheckInError> {
        let store = Store::new(
            CheckInState::for_participant(participant),
            CheckInReducer::new(),
            self.env.clone(),
        );
        store
            .send(CheckInAction::CheckIn { target, staff })
            .await
            .map_err(|error| runtime_failure(&error))?;

        let result = store.into_state().into_result();
        match &result {
            Ok(outcome) => {
                metrics::record_check_in(outcome.label());
                tracing::info!(
                    outcome = outcome.label(),
                    record = %outcome.record().id,
                    "Check-in recorded"
                );
            },
            Err(CheckInError::AccessDenied(denial)) => {
                metrics::record_access_denied(denial.reason);
                tracing::info!(
                    reason = denial.reason.code(),
                    plan = %denial.plan,
                    "Check-in denied"
                );
            },
            Err(error) => tracing::info!(error = %error, "Check-in refused"),
        }
        result
    }
}

// ============================================================================
// Kits
// ============================================================================

/// Hands out kits.
pub struct KitService {
    participants: Arc<dyn ParticipantStore>,
    env: KitEnvironment,
}

impl KitService {
    /// Create a new kit service
    #[must_use]
    pub const fn new(participants: Arc<dyn ParticipantStore>, env: KitEnvironment) -> Self {
        Self { participants, env }
    }

    /// Issue the `day` kit to the participant with `code`.
    ///
    /// # Errors
    ///
    /// See [`KitError`].
    #[tracing::instrument(
        skip(self, collection_point),
        fields(code = %code, day = %day, staff = %staff)
    )]
    pub async fn issue_kit(
        &self,
        code: &ParticipantCode,
        day: KitDay,
        staff: StaffId,
        collection_point: String,
    ) -> Result<KitOutcome, KitError> {
        let participant = self.participants.participant_by_code(code).await?;
        self.issue_for(
            participant,
            KitRequest {
                day,
                staff,
                collection_point,
            },
        )
        .await
    }

    /// Issue a kit to an already loaded participant.
    ///
    /// # Errors
    ///
    /// See [`KitError`].
    pub async fn issue_for(
        &self,
        participant: Option<Participant>,
        request: KitRequest,
    ) -> Result<KitOutcome, KitError> {
        let day = request.day;
        let store = Store::new(
            KitState::for_participant(participant),
            KitReducer::new(),
            self.env.clone(),
        );
        store
            .send(KitAction::IssueKit { request })
            .await
            .map_err(|error| runtime_failure(&error))?;

        let result = store.into_state().into_result();
        match &result {
            Ok(outcome) => {
                metrics::record_kit(day, outcome.label());
                tracing::info!(
                    outcome = outcome.label(),
                    id_card = %outcome.kit().id_card_number,
                    "Kit request served"
                );
            },
            Err(KitError::NotEligible(denial)) => {
                metrics::record_kit(day, "not_eligible");
                tracing::info!(plan = %denial.plan, "Kit refused, plan not eligible");
            },
            Err(error) => tracing::info!(error = %error, "Kit request refused"),
        }
        result
    }
}

// ============================================================================
// Queries
// ============================================================================

/// Read-only views over attendance and kits.
pub struct QueryService {
    attendance: Arc<dyn AttendanceStore>,
    kits: Arc<dyn KitStore>,
}

impl QueryService {
    /// Create a new query service
    #[must_use]
    pub fn new(attendance: Arc<dyn AttendanceStore>, kits: Arc<dyn KitStore>) -> Self {
        Self { attendance, kits }
    }

    /// Every attendance record of a participant, oldest first
    ///
    /// # Errors
    ///
    /// Storage failure.
    pub async fn attendance_for(
        &self,
        participant: ParticipantKey,
    ) -> Result<Vec<AttendanceRecord>, StoreError> {
        let mut records = self.attendance.attendance_for(participant).await?;
        records.sort_by_key(|record| record.check_in_time);
        Ok(records)
    }

    /// How many participants are inside `target` right now
    ///
    /// # Errors
    ///
    /// Storage failure.
    pub async fn currently_checked_in(&self, target: &CheckInTarget) -> Result<u64, StoreError> {
        self.attendance.open_visits_at(&target.key()).await
    }

    /// The participant's kit record, if any kit was ever requested
    ///
    /// # Errors
    ///
    /// Storage failure.
    pub async fn kit_status(
        &self,
        participant: ParticipantKey,
    ) -> Result<Option<KitRecord>, StoreError> {
        self.kits.kit_record(participant).await
    }
}
