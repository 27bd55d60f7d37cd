//! Participant ID and ID-card number allocation.
//!
//! Both counters are "find max, add one". The read is not authoritative: a
//! concurrent request may allocate the same value, and the storage layer's
//! uniqueness constraint rejects whichever commit comes second. Callers run
//! the allocation *and* the commit inside
//! [`shackles_runtime::retry_with_predicate`] so every retry re-reads the
//! maximum.

use crate::store::{KitStore, ParticipantStore, StoreError};
use crate::types::{IdCardNumber, InvalidPlan, ParticipantCode, RegistrationPlan};
use std::sync::Arc;
use thiserror::Error;

/// Allocation failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    /// Plan value not recognised
    #[error(transparent)]
    InvalidPlan(#[from] InvalidPlan),

    /// The counter's fixed-width space is used up
    #[error("{counter} capacity exhausted (limit {limit})")]
    CapacityExhausted {
        /// Which counter
        counter: &'static str,
        /// Highest value the format allows
        limit: u16,
    },

    /// Reading the current maximum failed
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Next code after `current_max` for `plan`.
///
/// # Errors
///
/// [`IdentityError::CapacityExhausted`] past `999`.
pub fn next_participant_code(
    plan: RegistrationPlan,
    current_max: Option<&ParticipantCode>,
) -> Result<ParticipantCode, IdentityError> {
    let next = current_max.map_or(1, |code| code.sequence().saturating_add(1));
    ParticipantCode::new(plan, next).ok_or(IdentityError::CapacityExhausted {
        counter: "participant code",
        limit: ParticipantCode::MAX_SEQUENCE,
    })
}

/// Next ID-card number after `current_max`.
///
/// # Errors
///
/// [`IdentityError::CapacityExhausted`] past `9999`.
pub fn next_id_card_number(
    current_max: Option<IdCardNumber>,
) -> Result<IdCardNumber, IdentityError> {
    let next = current_max.map_or(1, |number| number.sequence().saturating_add(1));
    IdCardNumber::new(next).ok_or(IdentityError::CapacityExhausted {
        counter: "ID-card number",
        limit: IdCardNumber::MAX_SEQUENCE,
    })
}

/// Participant code allocator
#[derive(Clone)]
pub struct ParticipantIdentity {
    participants: Arc<dyn ParticipantStore>,
}

impl ParticipantIdentity {
    /// Allocator reading from `participants`
    #[must_use]
    pub fn new(participants: Arc<dyn ParticipantStore>) -> Self {
        Self { participants }
    }

    /// Candidate code for `plan`.
    ///
    /// # Errors
    ///
    /// Capacity exhaustion or a storage failure.
    pub async fn allocate(&self, plan: RegistrationPlan) -> Result<ParticipantCode, IdentityError> {
        let current = self.participants.max_participant_code(plan).await?;
        let code = next_participant_code(plan, current.as_ref())?;
        tracing::debug!(%plan, %code, "Allocated participant code candidate");
        Ok(code)
    }

    /// [`ParticipantIdentity::allocate`] for an unparsed plan.
    ///
    /// # Errors
    ///
    /// [`IdentityError::InvalidPlan`] for unknown plans, otherwise as
    /// [`ParticipantIdentity::allocate`].
    pub async fn allocate_raw(&self, plan: &str) -> Result<ParticipantCode, IdentityError> {
        self.allocate(plan.parse()?).await
    }
}

/// ID-card number allocator, one counter shared by both kit days
#[derive(Clone)]
pub struct IdCardCounter {
    kits: Arc<dyn KitStore>,
}

impl IdCardCounter {
    /// Counter reading from `kits`
    #[must_use]
    pub fn new(kits: Arc<dyn KitStore>) -> Self {
        Self { kits }
    }

    /// Candidate number.
    ///
    /// # Errors
    ///
    /// Capacity exhaustion or a storage failure.
    pub async fn allocate(&self) -> Result<IdCardNumber, IdentityError> {
        let current = self.kits.max_id_card_number().await?;
        next_id_card_number(current)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn first_code_per_plan_is_001() {
        assert_eq!(
            next_participant_code(RegistrationPlan::Both, None).unwrap().as_str(),
            "SHGN001"
        );
        assert_eq!(
            next_participant_code(RegistrationPlan::General, None).unwrap().as_str(),
            "SHEN001"
        );
    }

    #[test]
    fn codes_stay_three_digits_and_stop_at_999() {
        let code_98 = ParticipantCode::new(RegistrationPlan::Workshop, 98).unwrap();
        assert_eq!(
            next_participant_code(RegistrationPlan::Workshop, Some(&code_98))
                .unwrap()
                .as_str(),
            "SHWK099"
        );

        let last = ParticipantCode::new(RegistrationPlan::Workshop, 999).unwrap();
        assert!(matches!(
            next_participant_code(RegistrationPlan::Workshop, Some(&last)),
            Err(IdentityError::CapacityExhausted { limit: 999, .. })
        ));
    }

    #[test]
    fn id_card_numbers_stop_at_9999() {
        assert_eq!(
            next_id_card_number(None).unwrap().to_string(),
            "SHACKLES-2025-0001"
        );
        assert!(matches!(
            next_id_card_number(IdCardNumber::new(9999)),
            Err(IdentityError::CapacityExhausted { limit: 9999, .. })
        ));
    }

    proptest! {
        #[test]
        fn allocated_prefix_always_matches_plan(plan_index in 0usize..3, seq in 0u16..999) {
            let plan = RegistrationPlan::ALL[plan_index];
            let current = ParticipantCode::new(plan, seq);
            let next = next_participant_code(plan, current.as_ref()).unwrap();
            prop_assert_eq!(next.plan(), plan);
            prop_assert!(next.as_str().starts_with(plan.prefix()));
            prop_assert_eq!(next.sequence(), seq + 1);
        }
    }
}
