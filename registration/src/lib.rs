//! Shackles 2025 symposium registration core
//!
//! Participants register for a plan, pay outside the system and are verified
//! by an admin. Verification hands out a participant ID and a QR credential;
//! at the venue the QR is scanned at check-in desks and kit counters.
//!
//! - **Identity**: plan-prefixed participant IDs and global ID-card numbers
//! - **Access policy**: which plan may enter which category, which kit day
//! - **Verification**: pending → verified / rejected, QR regeneration
//! - **Check-in**: one open attendance record per participant and target
//! - **Kits**: one kit per participant per kit day
//!
//! # Architecture
//!
//! ```text
//!   Desk / admin request
//!           │
//!           ▼
//!   ┌───────────────┐   load participant   ┌──────────────────────┐
//!   │   Services    │ ───────────────────▶ │  ParticipantStore    │
//!   └───────────────┘                      │  AttendanceStore     │
//!           │ one command                  │  KitStore            │
//!           ▼                              │  OutboxStore         │
//!   ┌───────────────┐   Effect::Future     │  (memory, Postgres)  │
//!   │   Reducers    │ ───────────────────▶ └──────────────────────┘
//!   └───────────────┘           │
//!           ▲                   │ conflicts on named constraints
//!           └── feedback ───────┘
//! ```
//!
//! ## Concurrency
//!
//! Requests are independent. Counters are "read max, add one" and the
//! storage layer's uniqueness constraints decide races:
//!
//! ```text
//! allocate code ──▶ commit ──▶ Conflict(ParticipantCode) ──▶ retry whole allocation
//! insert visit  ──▶ Conflict(OpenVisit)   ──▶ AlreadyCheckedIn
//! issue kit     ──▶ Conflict(KitIssuance) ──▶ AlreadyIssued
//! ```
//!
//! # Usage
//!
//! See [`app::RegistrationApp`] for the entry point and the [aggregates]
//! module for the workflow reducers and their tests.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod aggregates;
pub mod app;
pub mod config;
pub mod error;
pub mod identity;
pub mod metrics;
pub mod notifications;
pub mod policy;
pub mod qr;
pub mod qr_image;
pub mod store;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod mocks;

pub use aggregates::check_in::{CheckInError, CheckInOutcome};
pub use aggregates::kit::{kit_contents, KitDenial, KitError, KitOutcome};
pub use aggregates::verification::{Decision, VerificationError, VerificationReport};
pub use app::{
    Collaborators, KitHandout, ParticipantProfile, RegistrationApp, ScanError, ScanOutcome,
    Submission, SubmissionError,
};
pub use config::Config;
pub use error::{ErrorKind, RegistrationError};
pub use policy::{can_attend, kit_eligibility, AccessDecision, AccessDenial, DenyReason};
pub use types::*;
