//! PostgreSQL-backed stores.
//!
//! Schema: `migrations/0001_registration.sql`. Uniqueness constraints carry
//! stable names so a unique violation can be mapped back to the
//! [`Constraint`] it protects.

use super::{
    AttendanceStore, Constraint, KitStore, OutboxStore, ParticipantCommit,
    ParticipantStore, StoreError,
};
use crate::config::DatabaseConfig;
use crate::notifications::{
    DeliveryResult, DeliveryWindow, EmailMessage, OutboxMessage, OutboxStatus,
};
use crate::types::{
    AttendanceId, AttendanceRecord, CheckInTarget, IdCardNumber, IssuedKit, KitDay, KitItem,
    KitRecord, OutboxId, Participant, ParticipantCode, ParticipantKey, PaymentStatus, QrImage,
    Rejection, RegistrationPlan, StaffId, Verification,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use std::time::Duration;
use uuid::Uuid;

/// Map a driver error, recognising our named uniqueness constraints.
fn db_error(context: &str, err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            if let Some(constraint) = db.constraint().and_then(Constraint::from_name) {
                return StoreError::Conflict { constraint };
            }
        }
    }
    StoreError::Database(format!("{context}: {err}"))
}

fn corrupt(what: &str, detail: impl std::fmt::Display) -> StoreError {
    StoreError::Corrupt(format!("{what}: {detail}"))
}

fn to_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn to_u32(what: &str, value: i32) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|e| corrupt(what, e))
}

const PARTICIPANT_COLUMNS: &str = "id, participant_code, name, email, registration_plan, \
    payment_status, payment_reference, verified_at, verified_by, verification_notes, \
    rejection_reason, rejected_at, rejected_by, qr_token, qr_token_version, qr_image_url, \
    qr_image_key, registered_at";

#[derive(sqlx::FromRow)]
struct ParticipantRow {
    id: Uuid,
    participant_code: Option<String>,
    name: String,
    email: String,
    registration_plan: String,
    payment_status: String,
    payment_reference: String,
    verified_at: Option<DateTime<Utc>>,
    verified_by: Option<String>,
    verification_notes: Option<String>,
    rejection_reason: Option<String>,
    rejected_at: Option<DateTime<Utc>>,
    rejected_by: Option<String>,
    qr_token: Option<String>,
    qr_token_version: i32,
    qr_image_url: Option<String>,
    qr_image_key: Option<String>,
    registered_at: DateTime<Utc>,
}

impl TryFrom<ParticipantRow> for Participant {
    type Error = StoreError;

    fn try_from(row: ParticipantRow) -> Result<Self, Self::Error> {
        let plan: RegistrationPlan = row
            .registration_plan
            .parse()
            .map_err(|e| corrupt("registration_plan", e))?;
        let code = row
            .participant_code
            .map(|code| code.parse::<ParticipantCode>())
            .transpose()
            .map_err(|e| corrupt("participant_code", e))?;

        Ok(Self {
            key: ParticipantKey::from_uuid(row.id),
            code,
            name: row.name,
            email: row.email,
            plan,
            payment_status: row
                .payment_status
                .parse::<PaymentStatus>()
                .map_err(|e| corrupt("payment_status", e))?,
            payment_reference: row.payment_reference,
            verification: match (row.verified_at, row.verified_by) {
                (Some(verified_at), Some(verified_by)) => Some(Verification {
                    verified_at,
                    verified_by: StaffId::new(verified_by),
                    notes: row.verification_notes,
                }),
                _ => None,
            },
            rejection: match (row.rejection_reason, row.rejected_at, row.rejected_by) {
                (Some(reason), Some(rejected_at), Some(rejected_by)) => Some(Rejection {
                    reason,
                    rejected_at,
                    rejected_by: StaffId::new(rejected_by),
                }),
                _ => None,
            },
            qr_token: row.qr_token,
            qr_token_version: to_u32("qr_token_version", row.qr_token_version)?,
            qr_image: match (row.qr_image_url, row.qr_image_key) {
                (Some(url), Some(key)) => Some(QrImage { url, key }),
                _ => None,
            },
            registered_at: row.registered_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AttendanceRow {
    id: Uuid,
    participant_id: Uuid,
    target: Json<CheckInTarget>,
    check_in_time: DateTime<Utc>,
    check_out_time: Option<DateTime<Utc>>,
    checked_in_by: String,
}

impl From<AttendanceRow> for AttendanceRecord {
    fn from(row: AttendanceRow) -> Self {
        Self {
            id: AttendanceId::from_uuid(row.id),
            participant: ParticipantKey::from_uuid(row.participant_id),
            target: row.target.0,
            check_in_time: row.check_in_time,
            check_out_time: row.check_out_time,
            checked_in_by: StaffId::new(row.checked_in_by),
        }
    }
}

#[derive(sqlx::FromRow)]
struct IssuanceRow {
    kit_day: String,
    issued_at: DateTime<Utc>,
    issued_by: String,
    contents: Json<Vec<KitItem>>,
    id_card_number: String,
    collection_point: String,
}

#[derive(sqlx::FromRow)]
struct OutboxRow {
    id: Uuid,
    participant_id: Uuid,
    recipient: String,
    template: String,
    context: serde_json::Value,
    status: String,
    attempts: i32,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OutboxRow> for OutboxMessage {
    type Error = StoreError;

    fn try_from(row: OutboxRow) -> Result<Self, Self::Error> {
        let template = serde_json::from_value(serde_json::Value::String(row.template))
            .map_err(|e| corrupt("template", e))?;
        Ok(Self {
            id: OutboxId::from_uuid(row.id),
            participant: ParticipantKey::from_uuid(row.participant_id),
            email: EmailMessage {
                to: row.recipient,
                template,
                context: row.context,
            },
            status: row.status.parse().map_err(|e: String| corrupt("status", e))?,
            attempts: to_u32("attempts", row.attempts)?,
            last_error: row.last_error,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const OUTBOX_COLUMNS: &str = "id, participant_id, recipient, template, context, status, \
    attempts, last_error, created_at, updated_at";

/// Deliverability predicate; `$1` is the attempt limit, `$2` the lease cutoff
const DELIVERABLE: &str = "status = 'pending'
    OR (attempts < $1 AND (status = 'failed' OR (status = 'claimed' AND updated_at < $2)))";

/// All four stores over one connection pool
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Wrap an existing pool
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect using `config`
    ///
    /// # Errors
    ///
    /// Returns error if the database is unreachable.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout))
            .connect(&config.url)
            .await
            .map_err(|e| db_error("connect", e))?;
        Ok(Self { pool })
    }

    /// Run the bundled migrations
    ///
    /// # Errors
    ///
    /// Returns error if a migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("Migration failed: {e}")))
    }

    /// The underlying pool
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn load_kit_record(
        &self,
        participant: ParticipantKey,
    ) -> Result<Option<KitRecord>, StoreError> {
        let created_at: Option<DateTime<Utc>> =
            sqlx::query_scalar("SELECT created_at FROM kit_records WHERE participant_id = $1")
                .bind(participant.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| db_error("load kit record", e))?;
        let Some(created_at) = created_at else {
            return Ok(None);
        };

        let rows: Vec<IssuanceRow> = sqlx::query_as(
            "SELECT kit_day, issued_at, issued_by, contents, id_card_number, collection_point
             FROM kit_issuances WHERE participant_id = $1",
        )
        .bind(participant.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("load kit issuances", e))?;

        let mut record = KitRecord::new(participant, created_at);
        for row in rows {
            let day: KitDay = row.kit_day.parse().map_err(|e: String| corrupt("kit_day", e))?;
            *record.slot_mut(day) = Some(IssuedKit {
                issued_at: row.issued_at,
                issued_by: StaffId::new(row.issued_by),
                contents: row.contents.0,
                id_card_number: row
                    .id_card_number
                    .parse()
                    .map_err(|e| corrupt("id_card_number", e))?,
                collection_point: row.collection_point,
            });
        }
        Ok(Some(record))
    }
}

#[async_trait]
impl ParticipantStore for PostgresStore {
    async fn insert_participant(&self, participant: &Participant) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO participants
                (id, participant_code, name, email, registration_plan, payment_status,
                 payment_reference, qr_token_version, registered_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(participant.key.as_uuid())
        .bind(participant.code.as_ref().map(ParticipantCode::as_str))
        .bind(&participant.name)
        .bind(&participant.email)
        .bind(participant.plan.as_str())
        .bind(participant.payment_status.as_str())
        .bind(&participant.payment_reference)
        .bind(to_i32(participant.qr_token_version))
        .bind(participant.registered_at)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("insert participant", e))?;
        Ok(())
    }

    async fn participant(&self, key: ParticipantKey) -> Result<Option<Participant>, StoreError> {
        let row: Option<ParticipantRow> = sqlx::query_as(&format!(
            "SELECT {PARTICIPANT_COLUMNS} FROM participants WHERE id = $1"
        ))
        .bind(key.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("load participant", e))?;
        row.map(Participant::try_from).transpose()
    }

    async fn participant_by_code(
        &self,
        code: &ParticipantCode,
    ) -> Result<Option<Participant>, StoreError> {
        let row: Option<ParticipantRow> = sqlx::query_as(&format!(
            "SELECT {PARTICIPANT_COLUMNS} FROM participants WHERE participant_code = $1"
        ))
        .bind(code.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("load participant by code", e))?;
        row.map(Participant::try_from).transpose()
    }

    async fn max_participant_code(
        &self,
        plan: RegistrationPlan,
    ) -> Result<Option<ParticipantCode>, StoreError> {
        // Fixed-width suffixes make string order numeric order.
        let code: Option<String> = sqlx::query_scalar(
            "SELECT participant_code FROM participants
             WHERE participant_code LIKE $1 || '%'
             ORDER BY participant_code DESC
             LIMIT 1",
        )
        .bind(plan.prefix())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("max participant code", e))?;
        code.map(|c| c.parse().map_err(|e| corrupt("participant_code", e)))
            .transpose()
    }

    #[tracing::instrument(skip(self, commit), fields(participant = %commit.participant.key))]
    async fn commit_transition(&self, commit: ParticipantCommit) -> Result<(), StoreError> {
        let participant = &commit.participant;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("begin", e))?;

        let current: Option<ParticipantRow> = sqlx::query_as(&format!(
            "SELECT {PARTICIPANT_COLUMNS} FROM participants WHERE id = $1 FOR UPDATE"
        ))
        .bind(participant.key.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| db_error("lock participant", e))?;
        let current = current
            .ok_or_else(|| StoreError::Missing(format!("participant {}", participant.key)))
            .and_then(Participant::try_from)?;

        if !commit.expected.holds_for(&current) {
            return Err(StoreError::StaleWrite(participant.key));
        }

        sqlx::query(
            "UPDATE participants SET
                participant_code = $2, payment_status = $3,
                verified_at = $4, verified_by = $5, verification_notes = $6,
                rejection_reason = $7, rejected_at = $8, rejected_by = $9,
                qr_token = $10, qr_token_version = $11, qr_image_url = $12, qr_image_key = $13
             WHERE id = $1",
        )
        .bind(participant.key.as_uuid())
        .bind(participant.code.as_ref().map(ParticipantCode::as_str))
        .bind(participant.payment_status.as_str())
        .bind(participant.verification.as_ref().map(|v| v.verified_at))
        .bind(participant.verification.as_ref().map(|v| v.verified_by.as_str()))
        .bind(participant.verification.as_ref().and_then(|v| v.notes.as_deref()))
        .bind(participant.rejection.as_ref().map(|r| r.reason.as_str()))
        .bind(participant.rejection.as_ref().map(|r| r.rejected_at))
        .bind(participant.rejection.as_ref().map(|r| r.rejected_by.as_str()))
        .bind(participant.qr_token.as_deref())
        .bind(to_i32(participant.qr_token_version))
        .bind(participant.qr_image.as_ref().map(|i| i.url.as_str()))
        .bind(participant.qr_image.as_ref().map(|i| i.key.as_str()))
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error("update participant", e))?;

        if let Some(message) = &commit.notification {
            sqlx::query(&format!(
                "INSERT INTO notification_outbox ({OUTBOX_COLUMNS})
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"
            ))
            .bind(message.id.as_uuid())
            .bind(message.participant.as_uuid())
            .bind(&message.email.to)
            .bind(message.email.template.name())
            .bind(&message.email.context)
            .bind(message.status.as_str())
            .bind(to_i32(message.attempts))
            .bind(message.last_error.as_deref())
            .bind(message.created_at)
            .bind(message.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("enqueue notification", e))?;
        }

        tx.commit().await.map_err(|e| db_error("commit", e))
    }
}

#[async_trait]
impl AttendanceStore for PostgresStore {
    async fn open_visit(
        &self,
        participant: ParticipantKey,
        target_key: &str,
    ) -> Result<Option<AttendanceRecord>, StoreError> {
        let row: Option<AttendanceRow> = sqlx::query_as(
            "SELECT id, participant_id, target, check_in_time, check_out_time, checked_in_by
             FROM attendance
             WHERE participant_id = $1 AND target_key = $2 AND check_out_time IS NULL",
        )
        .bind(participant.as_uuid())
        .bind(target_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("load open visit", e))?;
        Ok(row.map(AttendanceRecord::from))
    }

    async fn insert_attendance(&self, record: &AttendanceRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO attendance
                (id, participant_id, target_key, target, check_in_time, check_out_time,
                 checked_in_by)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(record.id.as_uuid())
        .bind(record.participant.as_uuid())
        .bind(record.target.key())
        .bind(Json(record.target))
        .bind(record.check_in_time)
        .bind(record.check_out_time)
        .bind(record.checked_in_by.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("insert attendance", e))?;
        Ok(())
    }

    async fn attendance_for(
        &self,
        participant: ParticipantKey,
    ) -> Result<Vec<AttendanceRecord>, StoreError> {
        let rows: Vec<AttendanceRow> = sqlx::query_as(
            "SELECT id, participant_id, target, check_in_time, check_out_time, checked_in_by
             FROM attendance WHERE participant_id = $1 ORDER BY check_in_time",
        )
        .bind(participant.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("list attendance", e))?;
        Ok(rows.into_iter().map(AttendanceRecord::from).collect())
    }

    async fn open_visits_at(&self, target_key: &str) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT count(*) FROM attendance WHERE target_key = $1 AND check_out_time IS NULL",
        )
        .bind(target_key)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error("count open visits", e))?;
        u64::try_from(count).map_err(|e| corrupt("count", e))
    }
}

#[async_trait]
impl KitStore for PostgresStore {
    async fn kit_record(
        &self,
        participant: ParticipantKey,
    ) -> Result<Option<KitRecord>, StoreError> {
        self.load_kit_record(participant).await
    }

    async fn get_or_create_kit_record(&self, fresh: KitRecord) -> Result<KitRecord, StoreError> {
        sqlx::query(
            "INSERT INTO kit_records (participant_id, created_at) VALUES ($1, $2)
             ON CONFLICT (participant_id) DO NOTHING",
        )
        .bind(fresh.participant.as_uuid())
        .bind(fresh.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("create kit record", e))?;

        self.load_kit_record(fresh.participant)
            .await?
            .ok_or_else(|| StoreError::Missing(format!("kit record of {}", fresh.participant)))
    }

    async fn max_id_card_number(&self) -> Result<Option<IdCardNumber>, StoreError> {
        let max: Option<String> =
            sqlx::query_scalar("SELECT max(id_card_number) FROM kit_issuances")
                .fetch_one(&self.pool)
                .await
                .map_err(|e| db_error("max id card number", e))?;
        max.map(|n| n.parse().map_err(|e| corrupt("id_card_number", e)))
            .transpose()
    }

    async fn record_issuance(
        &self,
        participant: ParticipantKey,
        day: KitDay,
        kit: &IssuedKit,
    ) -> Result<KitRecord, StoreError> {
        sqlx::query(
            "INSERT INTO kit_issuances
                (participant_id, kit_day, issued_at, issued_by, contents, id_card_number,
                 collection_point)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(participant.as_uuid())
        .bind(day.as_str())
        .bind(kit.issued_at)
        .bind(kit.issued_by.as_str())
        .bind(Json(&kit.contents))
        .bind(kit.id_card_number.to_string())
        .bind(&kit.collection_point)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("record kit issuance", e))?;

        self.load_kit_record(participant)
            .await?
            .ok_or_else(|| StoreError::Missing(format!("kit record of {participant}")))
    }
}

#[async_trait]
impl OutboxStore for PostgresStore {
    async fn outbox_message(&self, id: OutboxId) -> Result<Option<OutboxMessage>, StoreError> {
        let row: Option<OutboxRow> = sqlx::query_as(&format!(
            "SELECT {OUTBOX_COLUMNS} FROM notification_outbox WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("load outbox message", e))?;
        row.map(OutboxMessage::try_from).transpose()
    }

    async fn deliverable(
        &self,
        window: DeliveryWindow,
        limit: usize,
    ) -> Result<Vec<OutboxId>, StoreError> {
        let ids: Vec<Uuid> = sqlx::query_scalar(&format!(
            "SELECT id FROM notification_outbox
             WHERE {DELIVERABLE}
             ORDER BY created_at
             LIMIT $3"
        ))
        .bind(to_i32(window.max_attempts))
        .bind(window.claimed_before)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("list deliverable", e))?;
        Ok(ids.into_iter().map(OutboxId::from_uuid).collect())
    }

    async fn claim(
        &self,
        id: OutboxId,
        window: DeliveryWindow,
        now: DateTime<Utc>,
    ) -> Result<Option<OutboxMessage>, StoreError> {
        // Single conditional UPDATE: of two concurrent claims only one matches.
        let row: Option<OutboxRow> = sqlx::query_as(&format!(
            "UPDATE notification_outbox
             SET status = 'claimed', attempts = attempts + 1, updated_at = $4
             WHERE id = $3 AND ({DELIVERABLE})
             RETURNING {OUTBOX_COLUMNS}"
        ))
        .bind(to_i32(window.max_attempts))
        .bind(window.claimed_before)
        .bind(id.as_uuid())
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("claim outbox message", e))?;
        row.map(OutboxMessage::try_from).transpose()
    }

    async fn complete(
        &self,
        id: OutboxId,
        result: &DeliveryResult,
        now: DateTime<Utc>,
    ) -> Result<OutboxStatus, StoreError> {
        let status = OutboxStatus::after(result);
        let last_error = match result {
            DeliveryResult::Failed { error } => Some(error.as_str()),
            DeliveryResult::Sent | DeliveryResult::Skipped { .. } => None,
        };
        let updated = sqlx::query(
            "UPDATE notification_outbox SET status = $2, last_error = $3, updated_at = $4
             WHERE id = $1",
        )
        .bind(id.as_uuid())
        .bind(status.as_str())
        .bind(last_error)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("complete outbox message", e))?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::Missing(format!("outbox message {id}")));
        }
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constraint_names_round_trip() {
        for constraint in [
            Constraint::ParticipantCode,
            Constraint::IdCardNumber,
            Constraint::OpenVisit,
            Constraint::KitIssuance,
        ] {
            assert_eq!(Constraint::from_name(constraint.name()), Some(constraint));
        }
        assert_eq!(Constraint::from_name("participants_pkey"), None);
    }

    #[test]
    fn non_database_errors_are_not_conflicts() {
        let err = db_error("load", sqlx::Error::RowNotFound);
        assert!(matches!(err, StoreError::Database(message) if message.starts_with("load: ")));
    }
}
