//! In-memory store for tests and the demo.
//!
//! One mutex guards every table, so each trait call is atomic in the same way
//! a single Postgres transaction is, and the same uniqueness constraints are
//! enforced.

use super::{
    AttendanceStore, Constraint, KitStore, OutboxStore, ParticipantCommit, ParticipantStore,
    StoreError,
};
use crate::notifications::{DeliveryResult, DeliveryWindow, OutboxMessage, OutboxStatus};
use crate::types::{
    AttendanceRecord, IdCardNumber, IssuedKit, KitDay, KitRecord, OutboxId, Participant,
    ParticipantCode, ParticipantKey, RegistrationPlan,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct Tables {
    participants: HashMap<ParticipantKey, Participant>,
    attendance: Vec<AttendanceRecord>,
    kits: HashMap<ParticipantKey, KitRecord>,
    outbox: Vec<OutboxMessage>,
}

impl Tables {
    fn code_taken(&self, code: &ParticipantCode, by_other_than: ParticipantKey) -> bool {
        self.participants
            .values()
            .any(|p| p.key != by_other_than && p.code.as_ref() == Some(code))
    }

    fn id_card_taken(&self, number: IdCardNumber) -> bool {
        self.kits.values().any(|record| {
            KitDay::ALL.into_iter().any(|day| {
                record
                    .issued(day)
                    .is_some_and(|kit| kit.id_card_number == number)
            })
        })
    }

    fn outbox_mut(&mut self, id: OutboxId) -> Option<&mut OutboxMessage> {
        self.outbox.iter_mut().find(|message| message.id == id)
    }
}

/// All four stores over process memory
#[derive(Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
}

impl InMemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every queued notification, oldest first
    #[must_use]
    pub fn outbox_messages(&self) -> Vec<OutboxMessage> {
        self.tables().outbox.clone()
    }

    /// Close an open visit. Checkout belongs to the venue tooling; this exists
    /// so re-entry after checkout can be exercised.
    pub fn check_out(&self, participant: ParticipantKey, target_key: &str, at: DateTime<Utc>) {
        let mut tables = self.tables();
        for record in &mut tables.attendance {
            if record.participant == participant
                && record.target.key() == target_key
                && record.is_open()
            {
                record.check_out_time = Some(at);
            }
        }
    }
}

#[async_trait]
impl ParticipantStore for InMemoryStore {
    async fn insert_participant(&self, participant: &Participant) -> Result<(), StoreError> {
        let mut tables = self.tables();
        if let Some(code) = &participant.code {
            if tables.code_taken(code, participant.key) {
                return Err(StoreError::Conflict {
                    constraint: Constraint::ParticipantCode,
                });
            }
        }
        tables.participants.insert(participant.key, participant.clone());
        Ok(())
    }

    async fn participant(&self, key: ParticipantKey) -> Result<Option<Participant>, StoreError> {
        Ok(self.tables().participants.get(&key).cloned())
    }

    async fn participant_by_code(
        &self,
        code: &ParticipantCode,
    ) -> Result<Option<Participant>, StoreError> {
        Ok(self
            .tables()
            .participants
            .values()
            .find(|p| p.code.as_ref() == Some(code))
            .cloned())
    }

    async fn max_participant_code(
        &self,
        plan: RegistrationPlan,
    ) -> Result<Option<ParticipantCode>, StoreError> {
        Ok(self
            .tables()
            .participants
            .values()
            .filter_map(|p| p.code.clone())
            .filter(|code| code.plan() == plan)
            .max())
    }

    async fn commit_transition(&self, commit: ParticipantCommit) -> Result<(), StoreError> {
        let mut tables = self.tables();
        let key = commit.participant.key;
        let current = tables
            .participants
            .get(&key)
            .ok_or_else(|| StoreError::Missing(format!("participant {key}")))?;

        if !commit.expected.holds_for(current) {
            return Err(StoreError::StaleWrite(key));
        }
        if let Some(code) = &commit.participant.code {
            if tables.code_taken(code, key) {
                return Err(StoreError::Conflict {
                    constraint: Constraint::ParticipantCode,
                });
            }
        }

        tables.participants.insert(key, commit.participant);
        if let Some(message) = commit.notification {
            tables.outbox.push(message);
        }
        Ok(())
    }
}

#[async_trait]
impl AttendanceStore for InMemoryStore {
    async fn open_visit(
        &self,
        participant: ParticipantKey,
        target_key: &str,
    ) -> Result<Option<AttendanceRecord>, StoreError> {
        Ok(self
            .tables()
            .attendance
            .iter()
            .find(|r| r.participant == participant && r.is_open() && r.target.key() == target_key)
            .cloned())
    }

    async fn insert_attendance(&self, record: &AttendanceRecord) -> Result<(), StoreError> {
        let mut tables = self.tables();
        let target_key = record.target.key();
        if tables.attendance.iter().any(|r| {
            r.participant == record.participant && r.is_open() && r.target.key() == target_key
        }) {
            return Err(StoreError::Conflict {
                constraint: Constraint::OpenVisit,
            });
        }
        tables.attendance.push(record.clone());
        Ok(())
    }

    async fn attendance_for(
        &self,
        participant: ParticipantKey,
    ) -> Result<Vec<AttendanceRecord>, StoreError> {
        Ok(self
            .tables()
            .attendance
            .iter()
            .filter(|r| r.participant == participant)
            .cloned()
            .collect())
    }

    async fn open_visits_at(&self, target_key: &str) -> Result<u64, StoreError> {
        let count = self
            .tables()
            .attendance
            .iter()
            .filter(|r| r.is_open() && r.target.key() == target_key)
            .count();
        Ok(u64::try_from(count).unwrap_or(u64::MAX))
    }
}

#[async_trait]
impl KitStore for InMemoryStore {
    async fn kit_record(
        &self,
        participant: ParticipantKey,
    ) -> Result<Option<KitRecord>, StoreError> {
        Ok(self.tables().kits.get(&participant).cloned())
    }

    async fn get_or_create_kit_record(&self, fresh: KitRecord) -> Result<KitRecord, StoreError> {
        let mut tables = self.tables();
        Ok(tables.kits.entry(fresh.participant).or_insert(fresh).clone())
    }

    async fn max_id_card_number(&self) -> Result<Option<IdCardNumber>, StoreError> {
        Ok(self
            .tables()
            .kits
            .values()
            .flat_map(|record| KitDay::ALL.into_iter().filter_map(|day| record.issued(day)))
            .map(|kit| kit.id_card_number)
            .max())
    }

    async fn record_issuance(
        &self,
        participant: ParticipantKey,
        day: KitDay,
        kit: &IssuedKit,
    ) -> Result<KitRecord, StoreError> {
        let mut tables = self.tables();
        if tables.kits.get(&participant).is_some_and(|r| r.is_issued(day)) {
            return Err(StoreError::Conflict {
                constraint: Constraint::KitIssuance,
            });
        }
        if tables.id_card_taken(kit.id_card_number) {
            return Err(StoreError::Conflict {
                constraint: Constraint::IdCardNumber,
            });
        }
        let record = tables
            .kits
            .get_mut(&participant)
            .ok_or_else(|| StoreError::Missing(format!("kit record of {participant}")))?;
        *record.slot_mut(day) = Some(kit.clone());
        Ok(record.clone())
    }
}

#[async_trait]
impl OutboxStore for InMemoryStore {
    async fn outbox_message(&self, id: OutboxId) -> Result<Option<OutboxMessage>, StoreError> {
        Ok(self.tables().outbox.iter().find(|m| m.id == id).cloned())
    }

    async fn deliverable(
        &self,
        window: DeliveryWindow,
        limit: usize,
    ) -> Result<Vec<OutboxId>, StoreError> {
        Ok(self
            .tables()
            .outbox
            .iter()
            .filter(|m| m.is_deliverable(&window))
            .take(limit)
            .map(|m| m.id)
            .collect())
    }

    async fn claim(
        &self,
        id: OutboxId,
        window: DeliveryWindow,
        now: DateTime<Utc>,
    ) -> Result<Option<OutboxMessage>, StoreError> {
        let mut tables = self.tables();
        let Some(message) = tables.outbox_mut(id) else {
            return Ok(None);
        };
        if !message.is_deliverable(&window) {
            return Ok(None);
        }
        message.status = OutboxStatus::Claimed;
        message.attempts += 1;
        message.updated_at = now;
        Ok(Some(message.clone()))
    }

    async fn complete(
        &self,
        id: OutboxId,
        result: &DeliveryResult,
        now: DateTime<Utc>,
    ) -> Result<OutboxStatus, StoreError> {
        let mut tables = self.tables();
        let message = tables
            .outbox_mut(id)
            .ok_or_else(|| StoreError::Missing(format!("outbox message {id}")))?;
        message.status = OutboxStatus::after(result);
        message.last_error = match result {
            DeliveryResult::Failed { error } => Some(error.clone()),
            DeliveryResult::Sent | DeliveryResult::Skipped { .. } => None,
        };
        message.updated_at = now;
        Ok(message.status)
    }
}
