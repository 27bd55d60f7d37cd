//! Test doubles for the external collaborators.
//!
//! Enabled by the `test-utils` feature (on by default).

use crate::notifications::{DeliveryResult, EmailMessage, Mailer};
use crate::qr::TokenSource;
use crate::qr_image::{QrImageError, QrImageService};
use crate::types::QrImage;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Mock mailer.
///
/// Records every message it is asked to send and answers with a fixed result.
#[derive(Debug)]
pub struct RecordingMailer {
    result: DeliveryResult,
    sent: Mutex<Vec<EmailMessage>>,
}

impl RecordingMailer {
    /// A mailer whose deliveries all succeed
    #[must_use]
    pub const fn new() -> Self {
        Self {
            result: DeliveryResult::Sent,
            sent: Mutex::new(Vec::new()),
        }
    }

    /// A mailer whose transport is down
    #[must_use]
    pub fn failing(error: impl Into<String>) -> Self {
        Self {
            result: DeliveryResult::Failed {
                error: error.into(),
            },
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Messages handed to this mailer, including failed ones
    #[must_use]
    pub fn sent(&self) -> Vec<EmailMessage> {
        lock(&self.sent).clone()
    }
}

impl Default for RecordingMailer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, message: &EmailMessage) -> DeliveryResult {
        lock(&self.sent).push(message.clone());
        self.result.clone()
    }
}

/// Mock QR image service.
///
/// Publishes to `https://cdn.test/<key>` and can be switched into a failing
/// mode to exercise the degraded path.
#[derive(Debug, Default)]
pub struct MockQrImageService {
    failing: AtomicBool,
    published: Mutex<Vec<(String, String)>>,
    discarded: Mutex<Vec<String>>,
}

impl MockQrImageService {
    /// A service whose uploads succeed
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A service whose uploads fail
    #[must_use]
    pub fn failing() -> Self {
        let service = Self::default();
        service.set_failing(true);
        service
    }

    /// Toggle upload failures
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// `(destination_key, payload)` of every successful upload
    #[must_use]
    pub fn published(&self) -> Vec<(String, String)> {
        lock(&self.published).clone()
    }

    /// Keys of every discarded image
    #[must_use]
    pub fn discarded(&self) -> Vec<String> {
        lock(&self.discarded).clone()
    }
}

#[async_trait]
impl QrImageService for MockQrImageService {
    async fn publish(&self, payload: &str, destination_key: &str) -> Result<QrImage, QrImageError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(QrImageError::Upload("object store unavailable".to_string()));
        }
        lock(&self.published).push((destination_key.to_string(), payload.to_string()));
        Ok(QrImage {
            url: format!("https://cdn.test/{destination_key}"),
            key: destination_key.to_string(),
        })
    }

    async fn discard(&self, destination_key: &str) -> Result<(), QrImageError> {
        lock(&self.discarded).push(destination_key.to_string());
        Ok(())
    }
}

/// Predictable tokens: `token-1`, `token-2`, ...
#[derive(Debug, Default)]
pub struct SequentialTokenSource {
    next: AtomicU64,
}

impl SequentialTokenSource {
    /// Start at `token-1`
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenSource for SequentialTokenSource {
    fn issue(&self) -> String {
        format!("token-{}", self.next.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn failing_image_service_can_recover() {
        let service = MockQrImageService::failing();
        assert!(service.publish("{}", "qr/a.png").await.is_err());

        service.set_failing(false);
        let image = service.publish("{}", "qr/a.png").await.unwrap();
        assert_eq!(image.url, "https://cdn.test/qr/a.png");
        assert_eq!(service.published().len(), 1);
    }

    #[test]
    fn tokens_are_sequential() {
        let tokens = SequentialTokenSource::new();
        assert_eq!(tokens.issue(), "token-1");
        assert_eq!(tokens.issue(), "token-2");
    }
}
