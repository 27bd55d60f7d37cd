//! Business metrics for symposium registration.
//!
//! Metrics go through the `metrics` facade; without an installed recorder
//! they are no-ops, so tests and the demo need no setup.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `shackles_registrations_total{plan}` - Registrations submitted
//! - `shackles_verifications_total{status}` - Payment decisions (verified, rejected, regenerated, failed)
//! - `shackles_check_ins_total{outcome}` - Check-ins (checked_in, already_checked_in)
//! - `shackles_access_denied_total{reason}` - Denied entries by reason code
//! - `shackles_kits_total{day,outcome}` - Kit issuance (issued, already_issued, not_eligible)
//! - `shackles_notifications_total{result}` - Notification deliveries (sent, skipped, failed)
//! - `shackles_allocation_retries_total{counter}` - Conflicts retried by allocation loops
//! - `shackles_qr_rejected_total{reason}` - Scans refused before reaching the ledger

use crate::notifications::DeliveryResult;
use crate::policy::DenyReason;
use crate::types::{KitDay, RegistrationPlan};
use metrics::{counter, describe_counter};

/// Initialize and register all business metrics descriptions.
///
/// This should be called once at application startup, before any metrics are recorded.
pub fn register_business_metrics() {
    describe_counter!(
        "shackles_registrations_total",
        "Registrations submitted, by plan"
    );
    describe_counter!(
        "shackles_verifications_total",
        "Payment verification decisions by status (verified, rejected, regenerated, failed)"
    );
    describe_counter!(
        "shackles_check_ins_total",
        "Check-ins by outcome (checked_in, already_checked_in)"
    );
    describe_counter!(
        "shackles_access_denied_total",
        "Entries denied by the access policy, by reason code"
    );
    describe_counter!(
        "shackles_kits_total",
        "Kit issuance attempts by kit day and outcome"
    );
    describe_counter!(
        "shackles_notifications_total",
        "Notification deliveries by result (sent, skipped, failed)"
    );
    describe_counter!(
        "shackles_allocation_retries_total",
        "Uniqueness conflicts retried while allocating a counter"
    );
    describe_counter!(
        "shackles_qr_rejected_total",
        "Scans rejected by QR decoding or validation"
    );

    tracing::info!("Business metrics registered");
}

/// Record a submitted registration
pub fn record_registration(plan: RegistrationPlan) {
    counter!("shackles_registrations_total", "plan" => plan.as_str()).increment(1);
}

/// Record a payment decision (`verified`, `rejected`, `regenerated`, `failed`)
pub fn record_verification(status: &'static str) {
    counter!("shackles_verifications_total", "status" => status).increment(1);
}

/// Record a check-in outcome
pub fn record_check_in(outcome: &'static str) {
    counter!("shackles_check_ins_total", "outcome" => outcome).increment(1);
}

/// Record a denied entry
pub fn record_access_denied(reason: DenyReason) {
    counter!("shackles_access_denied_total", "reason" => reason.code()).increment(1);
}

/// Record a kit issuance attempt
pub fn record_kit(day: KitDay, outcome: &'static str) {
    counter!("shackles_kits_total", "day" => day.as_str(), "outcome" => outcome).increment(1);
}

/// Record a notification delivery attempt
pub fn record_notification(result: &DeliveryResult) {
    counter!("shackles_notifications_total", "result" => result.label()).increment(1);
}

/// Record a rejected scan
pub fn record_qr_rejected(reason: &'static str) {
    counter!("shackles_qr_rejected_total", "reason" => reason).increment(1);
}
