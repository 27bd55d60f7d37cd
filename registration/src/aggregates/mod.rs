//! Workflow reducers for symposium registration.
//!
//! This module contains the three stateful workflows:
//! - Verification: payment verification, rejection and QR regeneration
//! - Check-in: attendance recording with idempotent re-scans
//! - Kit: once-per-day kit distribution with ID-card allocation

pub mod check_in;
pub mod kit;
pub mod verification;

pub use check_in::{CheckInAction, CheckInEnvironment, CheckInReducer, CheckInState};
pub use kit::{KitAction, KitEnvironment, KitReducer, KitState};
pub use verification::{
    VerificationAction, VerificationEnvironment, VerificationReducer, VerificationState,
};
