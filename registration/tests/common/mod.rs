//! Shared harness for the registration integration tests.

#![allow(dead_code)]
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

use shackles_registration::mocks::{MockQrImageService, RecordingMailer, SequentialTokenSource};
use shackles_registration::qr::QrPayload;
use shackles_registration::store::InMemoryStore;
use shackles_registration::types::{
    CheckInTarget, EventCategory, EventId, Participant, StaffId, WorkshopId,
};
use shackles_registration::{Collaborators, Config, RegistrationApp, Submission};
use shackles_testing::mocks::symposium_morning;
use shackles_testing::ManualClock;
use std::sync::Arc;

/// App over an in-memory store with recording collaborators
pub struct Harness {
    pub app: RegistrationApp,
    pub store: Arc<InMemoryStore>,
    pub mailer: Arc<RecordingMailer>,
    pub images: Arc<MockQrImageService>,
    pub clock: Arc<ManualClock>,
}

/// Defaults with no allocation backoff and a generous retry ceiling
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.allocation.initial_backoff_ms = 0;
    config.allocation.max_backoff_ms = 0;
    config.allocation.max_attempts = 10;
    config
}

pub fn harness() -> Harness {
    harness_with(test_config(), RecordingMailer::new())
}

pub fn harness_with(config: Config, mailer: RecordingMailer) -> Harness {
    let mailer = Arc::new(mailer);
    let images = Arc::new(MockQrImageService::new());
    let clock = Arc::new(ManualClock::new(symposium_morning()));
    let (app, store) = RegistrationApp::in_memory(
        config,
        Collaborators {
            clock: clock.clone(),
            mailer: mailer.clone(),
            qr_images: images.clone(),
            tokens: Arc::new(SequentialTokenSource::new()),
        },
    )
    .expect("test config is valid");
    Harness {
        app,
        store,
        mailer,
        images,
        clock,
    }
}

impl Harness {
    pub async fn register(&self, name: &str, plan: &str) -> Participant {
        self.app
            .registration
            .submit(Submission {
                name: name.to_string(),
                email: format!("{}@example.com", name.to_lowercase()),
                plan: plan.to_string(),
                payment_reference: format!("UTR-{name}"),
            })
            .await
            .expect("registration accepted")
    }

    pub async fn verified(&self, name: &str, plan: &str) -> Participant {
        let participant = self.register(name, plan).await;
        self.app
            .verification
            .verify(participant.key, admin(), None)
            .await
            .expect("verification succeeds")
            .participant
    }

    pub fn namespace(&self) -> String {
        self.app.config().qr.namespace.clone()
    }
}

/// Raw QR text for the participant's current QR
pub fn qr_of(participant: &Participant) -> String {
    QrPayload::for_participant(participant, shackles_registration::qr::DEFAULT_NAMESPACE)
        .and_then(|payload| payload.encode())
        .expect("participant has a QR")
}

pub fn admin() -> StaffId {
    StaffId::new("admin-01")
}

pub fn desk() -> StaffId {
    StaffId::new("desk-03")
}

pub fn event(category: EventCategory) -> CheckInTarget {
    CheckInTarget::Event {
        id: EventId::new(),
        category,
    }
}

pub fn workshop() -> CheckInTarget {
    CheckInTarget::Workshop {
        id: WorkshopId::new(),
    }
}
