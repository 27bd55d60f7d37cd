//! QR payload encoding and scan-time validation.
//!
//! Wire format (what scanners produce and consume):
//!
//! ```json
//! { "t": "<capability token>", "p": "SHWK007", "v": 2, "e": "SHACKLES2025" }
//! ```
//!
//! The payload carries no profile data. A scan only yields a participant code;
//! plan, payment status and name are always re-read from the store. `t` and
//! `v` let an admin revoke every previously printed QR by regenerating it.

use crate::types::{Participant, ParticipantCode};
use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default event namespace (`e`)
pub const DEFAULT_NAMESPACE: &str = "SHACKLES2025";

/// QR failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QrError {
    /// Not a QR payload of ours
    #[error("malformed QR payload: {0}")]
    Malformed(String),

    /// Issued for a different event
    #[error("QR belongs to namespace {found:?}, expected {expected:?}")]
    WrongNamespace {
        /// Configured namespace
        expected: String,
        /// Namespace in the payload
        found: String,
    },

    /// Superseded by a regenerated QR
    #[error("QR version {presented} has been revoked (current version is {current})")]
    Revoked {
        /// Version in the payload
        presented: u32,
        /// Version on record
        current: u32,
    },

    /// Token does not match the one on record
    #[error("QR token does not match")]
    TokenMismatch,

    /// The participant has no QR on record
    #[error("no QR has been issued for this participant")]
    NotIssued,

    /// Payload could not be serialized
    #[error("failed to encode QR payload: {0}")]
    Encode(String),
}

/// The JSON object embedded in a QR image
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QrPayload {
    /// Capability token
    pub t: String,
    /// Participant code
    pub p: String,
    /// QR version
    pub v: u32,
    /// Event namespace
    pub e: String,
}

impl QrPayload {
    /// Payload for a code, token and version
    #[must_use]
    pub fn new(code: &ParticipantCode, token: &str, version: u32, namespace: &str) -> Self {
        Self {
            t: token.to_string(),
            p: code.to_string(),
            v: version,
            e: namespace.to_string(),
        }
    }

    /// Payload for the QR currently on record
    ///
    /// # Errors
    ///
    /// [`QrError::NotIssued`] when the participant has no code or token.
    pub fn for_participant(participant: &Participant, namespace: &str) -> Result<Self, QrError> {
        match (&participant.code, &participant.qr_token) {
            (Some(code), Some(token)) => Ok(Self::new(
                code,
                token,
                participant.qr_token_version,
                namespace,
            )),
            _ => Err(QrError::NotIssued),
        }
    }

    /// Serialize to the wire format
    ///
    /// # Errors
    ///
    /// [`QrError::Encode`] if serialization fails.
    pub fn encode(&self) -> Result<String, QrError> {
        serde_json::to_string(self).map_err(|e| QrError::Encode(e.to_string()))
    }
}

/// Identity read from a scanned QR. Nothing in it is trusted until
/// [`validate`] has compared it with the stored participant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScannedQr {
    /// Participant code
    pub code: ParticipantCode,
    /// Capability token
    pub token: String,
    /// Version
    pub version: u32,
}

/// Parse a scanned payload.
///
/// # Errors
///
/// - [`QrError::Malformed`]: not JSON, a field is missing, empty token or a
///   bad participant code
/// - [`QrError::WrongNamespace`]: issued for another event
pub fn decode(raw: &str, namespace: &str) -> Result<ScannedQr, QrError> {
    let payload: QrPayload =
        serde_json::from_str(raw.trim()).map_err(|e| QrError::Malformed(e.to_string()))?;

    if payload.t.is_empty() {
        return Err(QrError::Malformed("empty capability token".to_string()));
    }
    if payload.e != namespace {
        return Err(QrError::WrongNamespace {
            expected: namespace.to_string(),
            found: payload.e,
        });
    }
    let code = payload
        .p
        .parse()
        .map_err(|e: crate::types::MalformedIdentifier| QrError::Malformed(e.to_string()))?;

    Ok(ScannedQr {
        code,
        token: payload.t,
        version: payload.v,
    })
}

/// Check a scanned QR against the participant it names. Fails closed.
///
/// # Errors
///
/// - [`QrError::NotIssued`]: the participant has no QR
/// - [`QrError::Revoked`]: the QR was regenerated since this one was printed
/// - [`QrError::TokenMismatch`]: token or code does not match
pub fn validate(scanned: &ScannedQr, participant: &Participant) -> Result<(), QrError> {
    let Some(token) = participant.qr_token.as_deref() else {
        return Err(QrError::NotIssued);
    };
    if participant.code.as_ref() != Some(&scanned.code) {
        return Err(QrError::TokenMismatch);
    }
    if scanned.version != participant.qr_token_version {
        return Err(QrError::Revoked {
            presented: scanned.version,
            current: participant.qr_token_version,
        });
    }
    if !constant_time_eq::constant_time_eq(scanned.token.as_bytes(), token.as_bytes()) {
        return Err(QrError::TokenMismatch);
    }
    Ok(())
}

/// Source of capability tokens
pub trait TokenSource: Send + Sync {
    /// A fresh, unguessable token
    fn issue(&self) -> String;
}

/// Random tokens, base64url encoded.
#[derive(Debug, Clone, Copy)]
pub struct RandomTokenSource {
    bytes: usize,
}

impl RandomTokenSource {
    /// Tokens of `bytes` random bytes
    #[must_use]
    pub const fn new(bytes: usize) -> Self {
        Self { bytes }
    }
}

impl Default for RandomTokenSource {
    fn default() -> Self {
        Self::new(16)
    }
}

impl TokenSource for RandomTokenSource {
    fn issue(&self) -> String {
        let mut random_bytes = vec![0u8; self.bytes];
        rand::thread_rng().fill_bytes(&mut random_bytes);
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(random_bytes)
    }
}
