//! Persistence seams.
//!
//! Counters (participant codes, ID-card numbers) and idempotency keys (open
//! visits, kit days) are protected by uniqueness constraints in storage, not
//! by in-process locks. Every implementation must report a violated
//! constraint as [`StoreError::Conflict`] so workflows can retry an allocation
//! or fold a lost race into "already done".

use crate::notifications::{DeliveryResult, DeliveryWindow, OutboxMessage, OutboxStatus};
use crate::types::{
    AttendanceRecord, IdCardNumber, IssuedKit, KitDay, KitRecord, OutboxId, Participant,
    ParticipantCode, ParticipantKey, RegistrationPlan,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use thiserror::Error;

pub mod memory;
pub mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PostgresStore;

/// Uniqueness constraints the workflows rely on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Constraint {
    /// `participants.participant_code`
    ParticipantCode,
    /// `kit_issuances.id_card_number`
    IdCardNumber,
    /// One open visit per (participant, target)
    OpenVisit,
    /// One issuance per (participant, kit day)
    KitIssuance,
}

impl Constraint {
    /// Database constraint / index name
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::ParticipantCode => "participants_participant_code_key",
            Self::IdCardNumber => "kit_issuances_id_card_number_key",
            Self::OpenVisit => "attendance_open_visit_idx",
            Self::KitIssuance => "kit_issuances_pkey",
        }
    }

    /// Reverse of [`Constraint::name`]
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        [
            Self::ParticipantCode,
            Self::IdCardNumber,
            Self::OpenVisit,
            Self::KitIssuance,
        ]
        .into_iter()
        .find(|constraint| constraint.name() == name)
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Storage failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write
    #[error("uniqueness conflict on {constraint}")]
    Conflict {
        /// Violated constraint
        constraint: Constraint,
    },

    /// A conditional write found the row no longer in the expected state
    #[error("participant {0} was modified concurrently")]
    StaleWrite(ParticipantKey),

    /// A row the write depends on does not exist
    #[error("{0} not found")]
    Missing(String),

    /// A stored value could not be decoded
    #[error("corrupt row: {0}")]
    Corrupt(String),

    /// Driver or connection failure
    #[error("database error: {0}")]
    Database(String),
}

impl StoreError {
    /// Whether this is a conflict on `constraint`
    #[must_use]
    pub fn is_conflict_on(&self, constraint: Constraint) -> bool {
        matches!(self, Self::Conflict { constraint: c } if *c == constraint)
    }
}

/// State a participant row must still be in for a commit to apply.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Expectation {
    /// `payment_status = 'pending'`
    Pending,
    /// Verified but no participant code yet
    VerifiedWithoutCode,
    /// Verified with QR version unchanged since it was read
    QrVersion(u32),
}

impl Expectation {
    /// Whether `current` satisfies the expectation
    #[must_use]
    pub fn holds_for(self, current: &Participant) -> bool {
        match self {
            Self::Pending => current.payment_status == crate::types::PaymentStatus::Pending,
            Self::VerifiedWithoutCode => current.awaiting_identity(),
            Self::QrVersion(version) => {
                current.is_verified() && current.qr_token_version == version
            },
        }
    }
}

/// A participant state transition committed atomically with its
/// notification.
#[derive(Clone, Debug)]
pub struct ParticipantCommit {
    /// The participant as it should be stored
    pub participant: Participant,
    /// Precondition on the stored row
    pub expected: Expectation,
    /// Notification queued in the same transaction
    pub notification: Option<OutboxMessage>,
}

/// Participants
#[async_trait]
pub trait ParticipantStore: Send + Sync {
    /// Insert a new registration
    async fn insert_participant(&self, participant: &Participant) -> Result<(), StoreError>;

    /// Load by internal key
    async fn participant(&self, key: ParticipantKey) -> Result<Option<Participant>, StoreError>;

    /// Load by participant code
    async fn participant_by_code(
        &self,
        code: &ParticipantCode,
    ) -> Result<Option<Participant>, StoreError>;

    /// Highest code issued for `plan`'s prefix
    async fn max_participant_code(
        &self,
        plan: RegistrationPlan,
    ) -> Result<Option<ParticipantCode>, StoreError>;

    /// Apply a transition if `commit.expected` still holds.
    ///
    /// Fails with [`StoreError::StaleWrite`] when it does not and with
    /// [`StoreError::Conflict`] when the code is already taken. Nothing is
    /// written in either case.
    async fn commit_transition(&self, commit: ParticipantCommit) -> Result<(), StoreError>;
}

/// Attendance ledger
#[async_trait]
pub trait AttendanceStore: Send + Sync {
    /// The open visit of `participant` at `target_key`
    async fn open_visit(
        &self,
        participant: ParticipantKey,
        target_key: &str,
    ) -> Result<Option<AttendanceRecord>, StoreError>;

    /// Record a check-in; [`Constraint::OpenVisit`] conflict if one is open
    async fn insert_attendance(&self, record: &AttendanceRecord) -> Result<(), StoreError>;

    /// Every record of `participant`, oldest first
    async fn attendance_for(
        &self,
        participant: ParticipantKey,
    ) -> Result<Vec<AttendanceRecord>, StoreError>;

    /// Number of open visits at `target_key`
    async fn open_visits_at(&self, target_key: &str) -> Result<u64, StoreError>;
}

/// Kit ledger
#[async_trait]
pub trait KitStore: Send + Sync {
    /// The kit record of `participant`, if created
    async fn kit_record(&self, participant: ParticipantKey)
    -> Result<Option<KitRecord>, StoreError>;

    /// Return the existing record or create `fresh`
    async fn get_or_create_kit_record(&self, fresh: KitRecord) -> Result<KitRecord, StoreError>;

    /// Highest ID-card number issued so far
    async fn max_id_card_number(&self) -> Result<Option<IdCardNumber>, StoreError>;

    /// Record an issuance and return the updated record.
    ///
    /// [`Constraint::KitIssuance`] conflict if `day` was already issued,
    /// [`Constraint::IdCardNumber`] conflict if the number is taken.
    async fn record_issuance(
        &self,
        participant: ParticipantKey,
        day: KitDay,
        kit: &IssuedKit,
    ) -> Result<KitRecord, StoreError>;
}

/// Notification outbox
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Load a message
    async fn outbox_message(&self, id: OutboxId) -> Result<Option<OutboxMessage>, StoreError>;

    /// Messages that may be delivered, oldest first: pending, failed with
    /// attempts left, or claimed under an expired lease with attempts left
    async fn deliverable(
        &self,
        window: DeliveryWindow,
        limit: usize,
    ) -> Result<Vec<OutboxId>, StoreError>;

    /// Take ownership of a deliverable message, counting the attempt.
    ///
    /// `None` when the message is not deliverable any more (someone else
    /// holds a live claim, it was sent, or it ran out of attempts).
    async fn claim(
        &self,
        id: OutboxId,
        window: DeliveryWindow,
        now: DateTime<Utc>,
    ) -> Result<Option<OutboxMessage>, StoreError>;

    /// Record the result of a claimed delivery
    async fn complete(
        &self,
        id: OutboxId,
        result: &DeliveryResult,
        now: DateTime<Utc>,
    ) -> Result<OutboxStatus, StoreError>;
}
