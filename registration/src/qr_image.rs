//! QR image publishing.
//!
//! Rendering the PNG and uploading it are one collaborator behind
//! [`QrImageService`]. Callers treat a failure here as degraded, not fatal:
//! the QR payload is what scanners validate, the image is a convenience for
//! the participant's inbox.
//!
//! Images are published before the participant row is committed, so every
//! upload gets its own key and an upload whose commit lost a race is
//! discarded. A process that dies between the two leaves an unreferenced
//! object behind; it is never served to anyone.

use crate::types::{ParticipantCode, QrImage};
use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

/// QR image failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QrImageError {
    /// The payload could not be rendered
    #[error("QR rendering failed: {0}")]
    Render(String),

    /// The object store refused the upload
    #[error("QR upload failed: {0}")]
    Upload(String),
}

/// Renders a QR payload and stores the image
#[async_trait]
pub trait QrImageService: Send + Sync {
    /// Render `payload`, upload it under `destination_key` and return where it
    /// can be fetched.
    async fn publish(&self, payload: &str, destination_key: &str) -> Result<QrImage, QrImageError>;

    /// Delete an image that ended up referenced by nobody.
    async fn discard(&self, destination_key: &str) -> Result<(), QrImageError>;
}

/// Storage key for one upload of a participant's QR image.
///
/// Versioned so a regenerated QR never overwrites the image of the one it
/// revokes, and suffixed per upload so two verifications racing for the same
/// code never overwrite each other's image.
#[must_use]
pub fn destination_key(code: &ParticipantCode, version: u32, upload: Uuid) -> String {
    let upload = upload.simple().to_string();
    let suffix = upload.get(..8).unwrap_or(&upload);
    format!("qr/{code}-v{version}-{suffix}.png")
}

/// Logs the payload and returns a URL under a base URL without storing
/// anything. Used by the demo and local runs.
#[derive(Debug, Clone)]
pub struct ConsoleQrImageService {
    base_url: String,
}

impl ConsoleQrImageService {
    /// Create a service publishing under `base_url`
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl QrImageService for ConsoleQrImageService {
    async fn publish(&self, payload: &str, destination_key: &str) -> Result<QrImage, QrImageError> {
        let url = format!("{}/{destination_key}", self.base_url);
        tracing::info!(%url, payload, "QR image (console)");
        Ok(QrImage {
            url,
            key: destination_key.to_string(),
        })
    }

    async fn discard(&self, destination_key: &str) -> Result<(), QrImageError> {
        tracing::info!(key = destination_key, "QR image discarded (console)");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::RegistrationPlan;

    #[tokio::test]
    async fn console_service_builds_url_from_key() {
        let code = ParticipantCode::new(RegistrationPlan::General, 3).unwrap();
        let upload = Uuid::parse_str("9f1c2e7a-0000-4000-8000-000000000000").unwrap();
        let key = destination_key(&code, 2, upload);
        assert_eq!(key, "qr/SHEN003-v2-9f1c2e7a.png");
        assert_ne!(destination_key(&code, 2, Uuid::new_v4()), key);

        let image = ConsoleQrImageService::new("https://cdn.example.org/")
            .publish("{}", &key)
            .await
            .unwrap();
        assert_eq!(image.url, "https://cdn.example.org/qr/SHEN003-v2-9f1c2e7a.png");
        assert_eq!(image.key, key);
    }
}
