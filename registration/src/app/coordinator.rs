//! Application coordinator - wires stores, collaborators and services.

use super::scan::ScanService;
use super::services::{
    CheckInService, KitService, QueryService, RegistrationService, VerificationService,
};
use crate::aggregates::{CheckInEnvironment, KitEnvironment, VerificationEnvironment};
use crate::config::{Config, ConfigError};
use crate::notifications::{ConsoleMailer, DisabledMailer, Mailer, NotificationDispatcher};
use crate::qr::{RandomTokenSource, TokenSource};
use crate::qr_image::{ConsoleQrImageService, QrImageService};
use crate::store::{
    AttendanceStore, InMemoryStore, KitStore, OutboxStore, ParticipantStore, PostgresStore,
    StoreError,
};
use shackles_core::environment::{Clock, SystemClock};
use std::sync::Arc;
use thiserror::Error;

/// Application errors
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration rejected
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Database connection or migration failed
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// External collaborators of the workflows
#[derive(Clone)]
pub struct Collaborators {
    /// Time source
    pub clock: Arc<dyn Clock>,
    /// Email transport
    pub mailer: Arc<dyn Mailer>,
    /// QR image rendering and upload
    pub qr_images: Arc<dyn QrImageService>,
    /// Capability tokens
    pub tokens: Arc<dyn TokenSource>,
}

impl Collaborators {
    /// Console collaborators: emails and QR images are logged, not delivered.
    #[must_use]
    pub fn console(config: &Config) -> Self {
        let mailer: Arc<dyn Mailer> = if config.notifications.enabled {
            Arc::new(ConsoleMailer::new(config.notifications.from.clone()))
        } else {
            Arc::new(DisabledMailer)
        };
        Self {
            clock: Arc::new(SystemClock),
            mailer,
            qr_images: Arc::new(ConsoleQrImageService::new(config.qr.image_base_url.clone())),
            tokens: Arc::new(RandomTokenSource::new(config.qr.token_bytes)),
        }
    }
}

/// Storage backing every workflow
pub trait RegistrationStore:
    ParticipantStore + AttendanceStore + KitStore + OutboxStore + 'static
{
}

impl<T> RegistrationStore for T where
    T: ParticipantStore + AttendanceStore + KitStore + OutboxStore + 'static
{
}

/// The registration application.
///
/// One instance per process; every service is safe to call concurrently.
pub struct RegistrationApp {
    /// Registration submission
    pub registration: RegistrationService,
    /// Payment decisions
    pub verification: VerificationService,
    /// Check-in by participant code
    pub check_in: Arc<CheckInService>,
    /// Kit distribution by participant code
    pub kits: Arc<KitService>,
    /// QR scanning
    pub scan: ScanService,
    /// Attendance and kit queries
    pub queries: QueryService,
    /// Outbox delivery
    pub dispatcher: Arc<NotificationDispatcher>,
    config: Config,
}

impl RegistrationApp {
    /// Build the application over any store.
    ///
    /// # Errors
    ///
    /// [`AppError::Config`] if the configuration does not validate.
    pub fn new<S: RegistrationStore>(
        config: Config,
        store: Arc<S>,
        collaborators: Collaborators,
    ) -> Result<Self, AppError> {
        config.validate()?;
        let Collaborators {
            clock,
            mailer,
            qr_images,
            tokens,
        } = collaborators;

        let participants: Arc<dyn ParticipantStore> = store.clone();
        let attendance: Arc<dyn AttendanceStore> = store.clone();
        let kit_store: Arc<dyn KitStore> = store.clone();
        let outbox: Arc<dyn OutboxStore> = store;
        let retry = config.allocation.retry_policy();

        let dispatcher = NotificationDispatcher::new(
            outbox,
            mailer,
            Arc::clone(&clock),
            config.notifications.max_attempts,
        )
        .with_claim_timeout(config.notifications.claim_timeout());
        let dispatcher = Arc::new(dispatcher);
        let verification = VerificationService::new(VerificationEnvironment {
            clock: Arc::clone(&clock),
            participants: Arc::clone(&participants),
            qr_images,
            tokens,
            dispatcher: Arc::clone(&dispatcher),
            retry: retry.clone(),
            namespace: config.qr.namespace.clone(),
        });
        let check_in = Arc::new(CheckInService::new(
            Arc::clone(&participants),
            CheckInEnvironment::new(Arc::clone(&clock), Arc::clone(&attendance)),
        ));
        let kits = Arc::new(KitService::new(
            Arc::clone(&participants),
            KitEnvironment::new(Arc::clone(&clock), Arc::clone(&kit_store), retry),
        ));
        let scan = ScanService::new(
            Arc::clone(&participants),
            Arc::clone(&kit_store),
            Arc::clone(&check_in),
            Arc::clone(&kits),
            config.qr.namespace.clone(),
        );

        tracing::info!(namespace = %config.qr.namespace, "Registration application ready");
        Ok(Self {
            registration: RegistrationService::new(participants, clock),
            verification,
            check_in,
            kits,
            scan,
            queries: QueryService::new(attendance, kit_store),
            dispatcher,
            config,
        })
    }

    /// Build the application over a fresh in-memory store.
    ///
    /// # Errors
    ///
    /// [`AppError::Config`] if the configuration does not validate.
    pub fn in_memory(
        config: Config,
        collaborators: Collaborators,
    ) -> Result<(Self, Arc<InMemoryStore>), AppError> {
        let store = Arc::new(InMemoryStore::new());
        let app = Self::new(config, Arc::clone(&store), collaborators)?;
        Ok((app, store))
    }

    /// Connect to `PostgreSQL`, run migrations and build the application.
    ///
    /// # Errors
    ///
    /// Invalid configuration, connection or migration failure.
    pub async fn postgres(config: Config, collaborators: Collaborators) -> Result<Self, AppError> {
        config.validate()?;
        let store = PostgresStore::connect(&config.database).await?;
        store.migrate().await?;
        Self::new(config, Arc::new(store), collaborators)
    }

    /// The configuration the application was built with
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }
}
