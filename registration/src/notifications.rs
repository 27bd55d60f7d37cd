//! Participant notifications.
//!
//! A state transition never sends mail itself. Verification, rejection and QR
//! regeneration commit an [`OutboxMessage`] together with the participant row;
//! delivery happens afterwards through the [`NotificationDispatcher`], once
//! inline right after the commit and later from the outbox worker for anything
//! that did not go out. A delivery problem can therefore never undo a committed
//! transition.

use crate::store::{OutboxStore, StoreError};
use crate::types::{OutboxId, Participant, ParticipantKey};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use shackles_core::environment::Clock;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Email templates the registration workflows send
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EmailTemplate {
    /// Payment verified, participant ID and QR attached
    PaymentVerified,
    /// Payment rejected, with the reason
    PaymentRejected,
    /// A new QR was issued and the old one no longer works
    QrRegenerated,
}

impl EmailTemplate {
    /// Template name
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::PaymentVerified => "payment-verified",
            Self::PaymentRejected => "payment-rejected",
            Self::QrRegenerated => "qr-regenerated",
        }
    }
}

impl fmt::Display for EmailTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A templated email: recipient, template and rendering context
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EmailMessage {
    /// Recipient address
    pub to: String,
    /// Template to render
    pub template: EmailTemplate,
    /// Template variables
    pub context: serde_json::Value,
}

impl EmailMessage {
    /// "Payment verified" for a participant that now has a code
    #[must_use]
    pub fn payment_verified(participant: &Participant) -> Self {
        Self {
            to: participant.email.clone(),
            template: EmailTemplate::PaymentVerified,
            context: json!({
                "name": participant.name,
                "participantId": participant.code.as_ref().map(ToString::to_string),
                "plan": participant.plan.as_str(),
                "qrImageUrl": participant.qr_image.as_ref().map(|image| image.url.clone()),
            }),
        }
    }

    /// "Payment rejected"
    #[must_use]
    pub fn payment_rejected(participant: &Participant, reason: &str) -> Self {
        Self {
            to: participant.email.clone(),
            template: EmailTemplate::PaymentRejected,
            context: json!({
                "name": participant.name,
                "reason": reason,
                "paymentReference": participant.payment_reference,
            }),
        }
    }

    /// "QR regenerated"
    #[must_use]
    pub fn qr_regenerated(participant: &Participant) -> Self {
        Self {
            to: participant.email.clone(),
            template: EmailTemplate::QrRegenerated,
            context: json!({
                "name": participant.name,
                "participantId": participant.code.as_ref().map(ToString::to_string),
                "qrVersion": participant.qr_token_version,
                "qrImageUrl": participant.qr_image.as_ref().map(|image| image.url.clone()),
            }),
        }
    }
}

/// What happened to one delivery attempt. Mailers never fail any other way.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "lowercase")]
pub enum DeliveryResult {
    /// Handed to the transport
    Sent,
    /// Deliberately not sent
    Skipped {
        /// Why
        reason: String,
    },
    /// The transport refused or was unreachable
    Failed {
        /// Transport error
        error: String,
    },
}

impl DeliveryResult {
    /// Metric label
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Skipped { .. } => "skipped",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Email transport
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Deliver a message
    async fn send(&self, message: &EmailMessage) -> DeliveryResult;
}

/// Writes messages to the log instead of sending them.
#[derive(Debug, Clone)]
pub struct ConsoleMailer {
    from: String,
}

impl ConsoleMailer {
    /// Create a console mailer with a sender address
    #[must_use]
    pub fn new(from: impl Into<String>) -> Self {
        Self { from: from.into() }
    }
}

#[async_trait]
impl Mailer for ConsoleMailer {
    async fn send(&self, message: &EmailMessage) -> DeliveryResult {
        tracing::info!(
            from = %self.from,
            to = %message.to,
            template = %message.template,
            context = %message.context,
            "Email (console)"
        );
        DeliveryResult::Sent
    }
}

/// Mailer used when notifications are switched off
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledMailer;

#[async_trait]
impl Mailer for DisabledMailer {
    async fn send(&self, _message: &EmailMessage) -> DeliveryResult {
        DeliveryResult::Skipped {
            reason: "notifications disabled".to_string(),
        }
    }
}

// ============================================================================
// Outbox
// ============================================================================

/// Delivery state of an outbox message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboxStatus {
    /// Not attempted yet
    Pending,
    /// A dispatcher is delivering it
    Claimed,
    /// Delivered
    Sent,
    /// Deliberately not delivered; terminal
    Skipped,
    /// Last attempt failed; retried while attempts remain
    Failed,
}

impl OutboxStatus {
    /// Column value
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Claimed => "claimed",
            Self::Sent => "sent",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }

    /// Status a finished attempt leaves the message in
    #[must_use]
    pub const fn after(result: &DeliveryResult) -> Self {
        match result {
            DeliveryResult::Sent => Self::Sent,
            DeliveryResult::Skipped { .. } => Self::Skipped,
            DeliveryResult::Failed { .. } => Self::Failed,
        }
    }
}

impl FromStr for OutboxStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "claimed" => Ok(Self::Claimed),
            "sent" => Ok(Self::Sent),
            "skipped" => Ok(Self::Skipped),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown outbox status: {other}")),
        }
    }
}

/// A queued notification
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutboxMessage {
    /// Message ID
    pub id: OutboxId,
    /// Participant the message is about
    pub participant: ParticipantKey,
    /// The email
    pub email: EmailMessage,
    /// Delivery state
    pub status: OutboxStatus,
    /// Attempts made so far
    pub attempts: u32,
    /// Error of the last failed attempt
    pub last_error: Option<String>,
    /// Queued at
    pub created_at: DateTime<Utc>,
    /// Last status change
    pub updated_at: DateTime<Utc>,
}

impl OutboxMessage {
    /// A pending message
    #[must_use]
    pub fn new(participant: ParticipantKey, email: EmailMessage, now: DateTime<Utc>) -> Self {
        Self {
            id: OutboxId::new(),
            participant,
            email,
            status: OutboxStatus::Pending,
            attempts: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether a dispatcher may claim it inside `window`
    #[must_use]
    pub fn is_deliverable(&self, window: &DeliveryWindow) -> bool {
        match self.status {
            OutboxStatus::Pending => true,
            OutboxStatus::Failed => self.attempts < window.max_attempts,
            OutboxStatus::Claimed => {
                self.attempts < window.max_attempts && self.updated_at < window.claimed_before
            },
            OutboxStatus::Sent | OutboxStatus::Skipped => false,
        }
    }
}

/// Which outbox messages a dispatcher may take at a given moment.
///
/// A claim is a lease: a message still `Claimed` after `claimed_before` was
/// left behind by a dispatcher that stopped between claiming and completing,
/// and may be claimed again while attempts remain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeliveryWindow {
    /// Attempts allowed per message
    pub max_attempts: u32,
    /// Claims taken before this instant have expired
    pub claimed_before: DateTime<Utc>,
}

/// Claim lease used when none is configured
pub const DEFAULT_CLAIM_TIMEOUT: Duration = Duration::from_secs(300);

/// Counts from one [`NotificationDispatcher::drain`] pass
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Delivered
    pub sent: usize,
    /// Skipped by the mailer
    pub skipped: usize,
    /// Failed, will be retried if attempts remain
    pub failed: usize,
}

/// Delivers outbox messages, claiming each first so a message is never sent
/// by two dispatchers while a claim is live.
pub struct NotificationDispatcher {
    outbox: Arc<dyn OutboxStore>,
    mailer: Arc<dyn Mailer>,
    clock: Arc<dyn Clock>,
    max_attempts: u32,
    claim_timeout: Duration,
}

impl NotificationDispatcher {
    /// Create a dispatcher with the default claim lease
    #[must_use]
    pub fn new(
        outbox: Arc<dyn OutboxStore>,
        mailer: Arc<dyn Mailer>,
        clock: Arc<dyn Clock>,
        max_attempts: u32,
    ) -> Self {
        Self {
            outbox,
            mailer,
            clock,
            max_attempts,
            claim_timeout: DEFAULT_CLAIM_TIMEOUT,
        }
    }

    /// How long a claim holds before another dispatcher may take the message
    #[must_use]
    pub fn with_claim_timeout(mut self, claim_timeout: Duration) -> Self {
        self.claim_timeout = claim_timeout;
        self
    }

    fn window(&self, now: DateTime<Utc>) -> DeliveryWindow {
        let claimed_before = chrono::Duration::from_std(self.claim_timeout)
            .ok()
            .and_then(|timeout| now.checked_sub_signed(timeout))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        DeliveryWindow {
            max_attempts: self.max_attempts,
            claimed_before,
        }
    }

    /// Try to deliver one message.
    ///
    /// Returns `None` if the message was not deliverable (already sent,
    /// claimed elsewhere, out of attempts).
    ///
    /// # Errors
    ///
    /// Storage failures while claiming or completing the message. A message
    /// claimed but not completed becomes deliverable again once its claim
    /// expires.
    #[tracing::instrument(skip(self), fields(outbox_id = %id))]
    pub async fn dispatch(&self, id: OutboxId) -> Result<Option<DeliveryResult>, StoreError> {
        let now = self.clock.now();
        let Some(message) = self.outbox.claim(id, self.window(now), now).await? else {
            tracing::debug!("Outbox message not deliverable, skipping");
            return Ok(None);
        };
        if message.attempts > 1 {
            tracing::debug!(attempt = message.attempts, "Redelivering outbox message");
        }

        let result = self.mailer.send(&message.email).await;
        crate::metrics::record_notification(&result);
        match &result {
            DeliveryResult::Sent => {
                tracing::info!(template = %message.email.template, "Notification sent");
            },
            DeliveryResult::Skipped { reason } => {
                tracing::info!(
                    template = %message.email.template,
                    reason = %reason,
                    "Notification skipped"
                );
            },
            DeliveryResult::Failed { error } => tracing::warn!(
                template = %message.email.template,
                attempt = message.attempts,
                error = %error,
                "Notification delivery failed"
            ),
        }

        self.outbox.complete(id, &result, self.clock.now()).await?;
        Ok(Some(result))
    }

    /// Deliver up to `limit` deliverable messages.
    ///
    /// A storage failure on one message is logged and counted as failed; the
    /// rest of the batch still goes out.
    ///
    /// # Errors
    ///
    /// Storage failures while listing deliverable messages.
    pub async fn drain(&self, limit: usize) -> Result<DrainReport, StoreError> {
        let mut report = DrainReport::default();
        let window = self.window(self.clock.now());
        for id in self.outbox.deliverable(window, limit).await? {
            match self.dispatch(id).await {
                Ok(Some(DeliveryResult::Sent)) => report.sent += 1,
                Ok(Some(DeliveryResult::Skipped { .. })) => report.skipped += 1,
                Ok(Some(DeliveryResult::Failed { .. })) => report.failed += 1,
                Ok(None) => {},
                Err(error) => {
                    tracing::warn!(outbox_id = %id, error = %error, "Outbox dispatch failed");
                    report.failed += 1;
                },
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::mocks::RecordingMailer;
    use crate::store::{Expectation, InMemoryStore, ParticipantCommit, ParticipantStore};
    use crate::types::{PaymentStatus, RegistrationPlan};
    use shackles_testing::mocks::symposium_morning;
    use shackles_testing::{test_clock, ManualClock};

    async fn queued_message(store: &InMemoryStore) -> OutboxId {
        let clock = test_clock();
        let participant = Participant::pending(
            "Ada".to_string(),
            "ada@example.com".to_string(),
            RegistrationPlan::General,
            "UPI-1".to_string(),
            clock.now(),
        );
        store.insert_participant(&participant).await.unwrap();
        let mut rejected = participant.clone();
        rejected.payment_status = PaymentStatus::Rejected;
        let message = OutboxMessage::new(
            participant.key,
            EmailMessage::payment_rejected(&participant, "no transfer found"),
            clock.now(),
        );
        let id = message.id;
        store
            .commit_transition(ParticipantCommit {
                participant: rejected,
                expected: Expectation::Pending,
                notification: Some(message),
            })
            .await
            .unwrap();
        id
    }

    fn dispatcher(
        store: &Arc<InMemoryStore>,
        mailer: Arc<RecordingMailer>,
    ) -> NotificationDispatcher {
        NotificationDispatcher::new(store.clone(), mailer, Arc::new(test_clock()), 3)
    }

    #[tokio::test]
    async fn a_sent_message_is_never_sent_again() {
        let store = Arc::new(InMemoryStore::new());
        let id = queued_message(&store).await;
        let mailer = Arc::new(RecordingMailer::new());
        let dispatcher = dispatcher(&store, mailer.clone());

        assert_eq!(dispatcher.dispatch(id).await.unwrap(), Some(DeliveryResult::Sent));
        assert_eq!(dispatcher.dispatch(id).await.unwrap(), None);
        assert_eq!(dispatcher.drain(10).await.unwrap(), DrainReport::default());
        assert_eq!(mailer.sent().len(), 1);
    }

    #[tokio::test]
    async fn failures_are_retried_until_attempts_run_out() {
        let store = Arc::new(InMemoryStore::new());
        let id = queued_message(&store).await;
        let mailer = Arc::new(RecordingMailer::failing("smtp timeout"));
        let dispatcher = dispatcher(&store, mailer.clone());

        for _ in 0..3 {
            assert_eq!(dispatcher.drain(10).await.unwrap().failed, 1);
        }
        assert_eq!(dispatcher.drain(10).await.unwrap(), DrainReport::default());

        let message = store.outbox_message(id).await.unwrap().unwrap();
        assert_eq!(message.status, OutboxStatus::Failed);
        assert_eq!(message.attempts, 3);
        assert_eq!(message.last_error.as_deref(), Some("smtp timeout"));
    }

    #[tokio::test]
    async fn skipped_is_terminal() {
        let store = Arc::new(InMemoryStore::new());
        let id = queued_message(&store).await;
        let dispatcher = NotificationDispatcher::new(
            store.clone(),
            Arc::new(DisabledMailer),
            Arc::new(test_clock()),
            3,
        );

        assert!(matches!(
            dispatcher.dispatch(id).await.unwrap(),
            Some(DeliveryResult::Skipped { .. })
        ));
        assert_eq!(dispatcher.drain(10).await.unwrap(), DrainReport::default());
    }

    #[test]
    fn claimed_message_is_deliverable_only_once_its_lease_expires() {
        let claimed_at = symposium_morning();
        let mut message = OutboxMessage::new(
            ParticipantKey::new(),
            EmailMessage {
                to: "ada@example.com".to_string(),
                template: EmailTemplate::PaymentRejected,
                context: json!({}),
            },
            claimed_at,
        );
        message.status = OutboxStatus::Claimed;
        message.attempts = 1;

        let live = DeliveryWindow {
            max_attempts: 3,
            claimed_before: claimed_at,
        };
        let expired = DeliveryWindow {
            max_attempts: 3,
            claimed_before: claimed_at + chrono::Duration::seconds(1),
        };
        assert!(!message.is_deliverable(&live));
        assert!(message.is_deliverable(&expired));

        message.attempts = 3;
        assert!(!message.is_deliverable(&expired));
    }

    #[tokio::test]
    async fn abandoned_claim_is_delivered_after_the_lease_expires() {
        let store = Arc::new(InMemoryStore::new());
        let id = queued_message(&store).await;
        let clock = Arc::new(ManualClock::new(symposium_morning()));
        let mailer = Arc::new(RecordingMailer::new());
        let dispatcher =
            NotificationDispatcher::new(store.clone(), mailer.clone(), clock.clone(), 3)
                .with_claim_timeout(Duration::from_secs(60));

        // A dispatcher that claims and then stops before completing.
        let window = DeliveryWindow {
            max_attempts: 3,
            claimed_before: clock.now(),
        };
        store.claim(id, window, clock.now()).await.unwrap().unwrap();

        assert_eq!(dispatcher.drain(10).await.unwrap(), DrainReport::default());
        assert_eq!(dispatcher.dispatch(id).await.unwrap(), None);
        assert!(mailer.sent().is_empty());

        clock.advance(chrono::Duration::seconds(61));
        assert_eq!(dispatcher.drain(10).await.unwrap().sent, 1);
        assert_eq!(mailer.sent().len(), 1);

        let message = store.outbox_message(id).await.unwrap().unwrap();
        assert_eq!(message.status, OutboxStatus::Sent);
        assert_eq!(message.attempts, 2);
    }

    /// Delegates to an in-memory outbox but cannot record completion of one
    /// message.
    struct BrokenCompletion {
        inner: Arc<InMemoryStore>,
        broken: OutboxId,
    }

    #[async_trait]
    impl OutboxStore for BrokenCompletion {
        async fn outbox_message(&self, id: OutboxId) -> Result<Option<OutboxMessage>, StoreError> {
            self.inner.outbox_message(id).await
        }

        async fn deliverable(
            &self,
            window: DeliveryWindow,
            limit: usize,
        ) -> Result<Vec<OutboxId>, StoreError> {
            self.inner.deliverable(window, limit).await
        }

        async fn claim(
            &self,
            id: OutboxId,
            window: DeliveryWindow,
            now: DateTime<Utc>,
        ) -> Result<Option<OutboxMessage>, StoreError> {
            self.inner.claim(id, window, now).await
        }

        async fn complete(
            &self,
            id: OutboxId,
            result: &DeliveryResult,
            now: DateTime<Utc>,
        ) -> Result<OutboxStatus, StoreError> {
            if id == self.broken {
                return Err(StoreError::Database("connection reset".to_string()));
            }
            self.inner.complete(id, result, now).await
        }
    }

    #[tokio::test]
    async fn one_storage_failure_does_not_stop_the_batch() {
        let store = Arc::new(InMemoryStore::new());
        let broken = queued_message(&store).await;
        let healthy = queued_message(&store).await;
        let mailer = Arc::new(RecordingMailer::new());
        let dispatcher = NotificationDispatcher::new(
            Arc::new(BrokenCompletion {
                inner: store.clone(),
                broken,
            }),
            mailer.clone(),
            Arc::new(test_clock()),
            3,
        );

        let report = dispatcher.drain(10).await.unwrap();

        assert_eq!(
            report,
            DrainReport {
                sent: 1,
                skipped: 0,
                failed: 1,
            }
        );
        assert_eq!(mailer.sent().len(), 2);
        let healthy = store.outbox_message(healthy).await.unwrap().unwrap();
        assert_eq!(healthy.status, OutboxStatus::Sent);
        let broken = store.outbox_message(broken).await.unwrap().unwrap();
        assert_eq!(broken.status, OutboxStatus::Claimed);
    }
}
