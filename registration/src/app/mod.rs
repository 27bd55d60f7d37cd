//! Application layer - wires the workflows to storage and collaborators.
//!
//! This module provides:
//! - Request services (registration, verification, check-in, kits, queries)
//! - QR scanning for the desks
//! - The `RegistrationApp` coordinator

mod coordinator;
mod scan;
mod services;

pub use coordinator::{AppError, Collaborators, RegistrationApp, RegistrationStore};
pub use scan::{KitDayStatus, KitHandout, ParticipantProfile, ScanError, ScanOutcome, ScanService};
pub use services::{
    CheckInService, KitService, QueryService, RegistrationService, Submission, SubmissionError,
    VerificationService,
};
