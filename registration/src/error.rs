//! Error taxonomy shared by every workflow.
//!
//! Each module keeps its own error enum. [`ErrorKind`] groups their variants
//! so a desk or admin frontend can pick a response without matching every
//! variant, and [`RegistrationError`] wraps them all for callers that handle
//! several workflows.

use crate::aggregates::check_in::CheckInError;
use crate::aggregates::kit::KitError;
use crate::aggregates::verification::VerificationError;
use crate::app::{AppError, ScanError, SubmissionError};
use crate::config::ConfigError;
use crate::identity::IdentityError;
use crate::qr::QrError;
use crate::qr_image::QrImageError;
use crate::store::StoreError;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Result type alias for registration operations.
pub type Result<T> = std::result::Result<T, RegistrationError>;

/// Category of a failure
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Participant or record does not exist
    NotFound,
    /// The request conflicts with the current state
    InvalidState,
    /// The plan does not cover what was asked for
    AccessDenied,
    /// A collaborator failed
    DependencyFailure,
    /// A counter kept colliding with concurrent allocations
    AllocationExhausted,
    /// Input rejected
    Validation,
    /// Storage failure
    Storage,
}

impl ErrorKind {
    /// Stable code
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::InvalidState => "invalid_state",
            Self::AccessDenied => "access_denied",
            Self::DependencyFailure => "dependency_failure",
            Self::AllocationExhausted => "allocation_exhausted",
            Self::Validation => "validation",
            Self::Storage => "storage",
        }
    }

    /// Whether the caller can fix the request
    #[must_use]
    pub const fn is_user_error(self) -> bool {
        matches!(
            self,
            Self::NotFound | Self::InvalidState | Self::AccessDenied | Self::Validation
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl StoreError {
    /// Error category
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Missing(_) => ErrorKind::NotFound,
            Self::StaleWrite(_) | Self::Conflict { .. } => ErrorKind::InvalidState,
            Self::Corrupt(_) | Self::Database(_) => ErrorKind::Storage,
        }
    }
}

impl IdentityError {
    /// Error category
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidPlan(_) => ErrorKind::Validation,
            Self::CapacityExhausted { .. } => ErrorKind::AllocationExhausted,
            Self::Store(error) => error.kind(),
        }
    }
}

impl QrError {
    /// Error category
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Malformed(_) | Self::WrongNamespace { .. } | Self::TokenMismatch => {
                ErrorKind::Validation
            },
            Self::Revoked { .. } | Self::NotIssued => ErrorKind::InvalidState,
            Self::Encode(_) => ErrorKind::DependencyFailure,
        }
    }
}

impl QrImageError {
    /// Error category
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        ErrorKind::DependencyFailure
    }
}

impl ConfigError {
    /// Error category
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        ErrorKind::Validation
    }
}

impl VerificationError {
    /// Error category
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::ParticipantNotFound => ErrorKind::NotFound,
            Self::AlreadyVerified { .. }
            | Self::NotPending { .. }
            | Self::NotVerified { .. }
            | Self::ConcurrentModification => ErrorKind::InvalidState,
            Self::EmptyRejectionReason => ErrorKind::Validation,
            Self::AllocationExhausted { .. } => ErrorKind::AllocationExhausted,
            Self::Identity(error) => error.kind(),
            Self::Qr(error) => error.kind(),
            Self::Store(error) => error.kind(),
        }
    }
}

impl CheckInError {
    /// Error category
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::ParticipantNotFound => ErrorKind::NotFound,
            Self::PaymentNotVerified { .. } => ErrorKind::InvalidState,
            Self::AccessDenied(_) => ErrorKind::AccessDenied,
            Self::Store(error) => error.kind(),
        }
    }
}

impl KitError {
    /// Error category
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::ParticipantNotFound => ErrorKind::NotFound,
            Self::PaymentNotVerified { .. } => ErrorKind::InvalidState,
            Self::NotEligible(_) => ErrorKind::AccessDenied,
            Self::MissingCollectionPoint => ErrorKind::Validation,
            Self::AllocationExhausted { .. } => ErrorKind::AllocationExhausted,
            Self::Identity(error) => error.kind(),
            Self::Store(error) => error.kind(),
        }
    }
}

impl ScanError {
    /// Error category
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Qr(error) => error.kind(),
            Self::AccessDenied(_) => ErrorKind::AccessDenied,
            Self::ParticipantNotFound(_) => ErrorKind::NotFound,
            Self::CheckIn(error) => error.kind(),
            Self::Store(error) => error.kind(),
        }
    }
}

impl SubmissionError {
    /// Error category
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidPlan(_) | Self::MissingField(_) | Self::InvalidEmail(_) => {
                ErrorKind::Validation
            },
            Self::Store(error) => error.kind(),
        }
    }
}

impl AppError {
    /// Error category
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(error) => error.kind(),
            Self::Store(error) => error.kind(),
        }
    }
}

/// Any registration failure
#[derive(Error, Debug)]
pub enum RegistrationError {
    /// Submission rejected
    #[error(transparent)]
    Submission(#[from] SubmissionError),

    /// Payment decision refused
    #[error(transparent)]
    Verification(#[from] VerificationError),

    /// Check-in refused
    #[error(transparent)]
    CheckIn(#[from] CheckInError),

    /// Kit refused
    #[error(transparent)]
    Kit(#[from] KitError),

    /// Scan refused
    #[error(transparent)]
    Scan(#[from] ScanError),

    /// QR handling failed
    #[error(transparent)]
    Qr(#[from] QrError),

    /// Storage failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Startup failure
    #[error(transparent)]
    App(#[from] AppError),
}

impl RegistrationError {
    /// Error category
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Submission(error) => error.kind(),
            Self::Verification(error) => error.kind(),
            Self::CheckIn(error) => error.kind(),
            Self::Kit(error) => error.kind(),
            Self::Scan(error) => error.kind(),
            Self::Qr(error) => error.kind(),
            Self::Store(error) => error.kind(),
            Self::App(error) => error.kind(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{can_attend, AccessDecision};
    use crate::store::Constraint;
    use crate::types::{RegistrationPlan, TargetCategory};

    #[test]
    fn denials_are_access_denied() {
        let decision = can_attend(RegistrationPlan::Workshop, TargetCategory::Technical);
        let AccessDecision::Deny(denial) = decision else {
            unreachable!("workshop plan must be denied at technical events");
        };
        let error = RegistrationError::from(ScanError::CheckIn(CheckInError::AccessDenied(denial)));
        assert_eq!(error.kind(), ErrorKind::AccessDenied);
        assert!(error.kind().is_user_error());
    }

    #[test]
    fn exhausted_allocation_is_not_a_user_error() {
        let error = RegistrationError::from(KitError::AllocationExhausted { attempts: 5 });
        assert_eq!(error.kind(), ErrorKind::AllocationExhausted);
        assert!(!error.kind().is_user_error());
    }

    #[test]
    fn nested_store_errors_keep_their_kind() {
        let conflict = StoreError::Conflict {
            constraint: Constraint::ParticipantCode,
        };
        assert_eq!(
            VerificationError::Identity(IdentityError::Store(conflict)).kind(),
            ErrorKind::InvalidState
        );
        assert_eq!(
            SubmissionError::Store(StoreError::Database("down".to_string())).kind(),
            ErrorKind::Storage
        );
    }
}
