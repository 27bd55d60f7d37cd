//! QR scanning at the desks.
//!
//! A scan is decoded and checked against the access policy before the
//! participant is even looked up: the plan is fixed by the code's prefix, so
//! a denied scan costs no I/O and can leave no attendance behind. The
//! participant is then re-read from the store and the QR validated against
//! the stored token and version; nothing in the payload besides the code is
//! trusted.

use super::services::{CheckInService, KitService};
use crate::aggregates::check_in::{CheckInError, CheckInOutcome};
use crate::aggregates::kit::{KitError, KitOutcome, KitRequest};
use crate::metrics;
use crate::policy::{allowed_categories, can_attend, kit_eligibility, AccessDecision, AccessDenial};
use crate::qr::{self, QrError};
use crate::store::{KitStore, ParticipantStore, StoreError};
use crate::types::{
    CheckInTarget, IssuedKit, KitDay, Participant, ParticipantCode, PaymentStatus,
    RegistrationPlan, StaffId, TargetCategory,
};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

/// Scan rejections
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScanError {
    /// Unreadable, foreign or revoked QR
    #[error(transparent)]
    Qr(#[from] QrError),

    /// The plan encoded in the code does not cover the target
    #[error("access denied: {0}")]
    AccessDenied(AccessDenial),

    /// Well-formed code that no participant holds
    #[error("participant {0} not found")]
    ParticipantNotFound(ParticipantCode),

    /// The check-in itself was refused
    #[error(transparent)]
    CheckIn(#[from] CheckInError),

    /// Storage failure
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Kit to hand out along with a check-in
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KitHandout {
    /// Kit day
    pub day: KitDay,
    /// Desk
    pub collection_point: String,
}

/// Result of scan-and-check-in
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScanOutcome {
    /// The participant as stored
    pub participant: Participant,
    /// The check-in
    pub check_in: CheckInOutcome,
    /// Kit sub-result when a kit was requested. A failure here never undoes
    /// the check-in.
    pub kit: Option<Result<KitOutcome, KitError>>,
}

/// Kit state for one kit day
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct KitDayStatus {
    /// Kit day
    pub day: KitDay,
    /// Whether the plan includes this kit
    pub eligible: bool,
    /// The issuance, if it happened
    pub issued: Option<IssuedKit>,
}

/// What the desk sees after a scan, without anything being recorded
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ParticipantProfile {
    /// Participant ID
    pub code: ParticipantCode,
    /// Full name
    pub name: String,
    /// Contact email
    pub email: String,
    /// Paid plan
    pub plan: RegistrationPlan,
    /// Payment state
    pub payment_status: PaymentStatus,
    /// Categories the plan admits to
    pub allowed_categories: Vec<TargetCategory>,
    /// One entry per kit day
    pub kits: Vec<KitDayStatus>,
}

const fn rejection_label(error: &QrError) -> &'static str {
    match error {
        QrError::Malformed(_) | QrError::Encode(_) => "malformed",
        QrError::WrongNamespace { .. } => "wrong_namespace",
        QrError::Revoked { .. } => "revoked",
        QrError::TokenMismatch => "token_mismatch",
        QrError::NotIssued => "not_issued",
    }
}

/// Scan handling for check-in desks.
pub struct ScanService {
    participants: Arc<dyn ParticipantStore>,
    kits: Arc<dyn KitStore>,
    check_in: Arc<CheckInService>,
    kit_service: Arc<KitService>,
    namespace: String,
}

impl ScanService {
    /// Create a new scan service
    #[must_use]
    pub fn new(
        participants: Arc<dyn ParticipantStore>,
        kits: Arc<dyn KitStore>,
        check_in: Arc<CheckInService>,
        kit_service: Arc<KitService>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            participants,
            kits,
            check_in,
            kit_service,
            namespace: namespace.into(),
        }
    }

    /// Decode a scan, fetch the participant and validate the QR against it.
    async fn resolve(
        &self,
        raw: &str,
        target: Option<&CheckInTarget>,
    ) -> Result<Participant, ScanError> {
        let scanned = qr::decode(raw, &self.namespace).inspect_err(|error| {
            metrics::record_qr_rejected(rejection_label(error));
        })?;

        if let Some(target) = target {
            let decision = can_attend(scanned.code.plan(), target.category());
            if let AccessDecision::Deny(denial) = decision {
                metrics::record_access_denied(denial.reason);
                tracing::info!(
                    code = %scanned.code,
                    reason = denial.reason.code(),
                    "Scan denied by plan"
                );
                return Err(ScanError::AccessDenied(denial));
            }
        }

        let participant = self
            .participants
            .participant_by_code(&scanned.code)
            .await?
            .ok_or_else(|| ScanError::ParticipantNotFound(scanned.code.clone()))?;

        qr::validate(&scanned, &participant).inspect_err(|error| {
            metrics::record_qr_rejected(rejection_label(error));
            tracing::warn!(code = %scanned.code, error = %error, "Scanned QR failed validation");
        })?;
        Ok(participant)
    }

    /// Scan, check in and optionally hand out a kit.
    ///
    /// # Errors
    ///
    /// Any failure before or during the check-in. Kit failures are reported
    /// in [`ScanOutcome::kit`].
    #[tracing::instrument(
        skip(self, raw, target, kit),
        fields(target = %target.key(), staff = %staff)
    )]
    pub async fn scan_and_check_in(
        &self,
        raw: &str,
        target: CheckInTarget,
        staff: StaffId,
        kit: Option<KitHandout>,
    ) -> Result<ScanOutcome, ScanError> {
        let participant = self.resolve(raw, Some(&target)).await?;
        let check_in = self
            .check_in
            .check_in_participant(Some(participant.clone()), target, staff.clone())
            .await?;

        let kit = match kit {
            Some(handout) => {
                let result = self
                    .kit_service
                    .issue_for(
                        Some(participant.clone()),
                        KitRequest {
                            day: handout.day,
                            staff,
                            collection_point: handout.collection_point,
                        },
                    )
                    .await;
                if let Err(error) = &result {
                    tracing::warn!(error = %error, "Kit not issued, check-in stands");
                }
                Some(result)
            },
            None => None,
        };

        Ok(ScanOutcome {
            participant,
            check_in,
            kit,
        })
    }

    /// Decode and validate a scan and show the participant. Records nothing.
    ///
    /// # Errors
    ///
    /// Unreadable or revoked QR, unknown participant or a storage failure.
    #[tracing::instrument(skip(self, raw))]
    pub async fn lookup(&self, raw: &str) -> Result<ParticipantProfile, ScanError> {
        let participant = self.resolve(raw, None).await?;
        let record = self.kits.kit_record(participant.key).await?;
        let code = participant.code.clone().ok_or(QrError::NotIssued)?;

        let kits = KitDay::ALL
            .into_iter()
            .map(|day| KitDayStatus {
                day,
                eligible: kit_eligibility(participant.plan, day),
                issued: record.as_ref().and_then(|r| r.issued(day)).cloned(),
            })
            .collect();

        Ok(ParticipantProfile {
            code,
            allowed_categories: allowed_categories(participant.plan),
            plan: participant.plan,
            payment_status: participant.payment_status,
            name: participant.name,
            email: participant.email,
            kits,
        })
    }
}
