//! Registration Demo
//!
//! Scripted walk through a symposium day against the in-memory store:
//! - Registration and payment verification
//! - Scan-and-check-in with an events-day kit
//! - Duplicate scan (idempotent)
//! - Denied scan (plan does not cover the event)
//! - QR regeneration revoking the old code
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin demo
//! ```

use shackles_registration::{
    app::KitHandout,
    qr::QrPayload,
    types::{CheckInTarget, EventCategory, EventId, KitDay, Participant, StaffId, WorkshopId},
    Collaborators, Config, RegistrationApp, Submission,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn qr_for(
    participant: &Participant,
    namespace: &str,
) -> Result<String, Box<dyn std::error::Error>> {
    Ok(QrPayload::for_participant(participant, namespace)?.encode()?)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,shackles_registration=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    shackles_registration::metrics::register_business_metrics();

    println!("\n============================================");
    println!("   Shackles 2025 Registration - Live Demo");
    println!("============================================\n");

    let config = Config::from_env();
    let namespace = config.qr.namespace.clone();
    let collaborators = Collaborators::console(&config);
    let (app, store) = RegistrationApp::in_memory(config, collaborators)?;
    let admin = StaffId::new("admin-01");
    let desk = StaffId::new("desk-03");

    // ========== Registration ==========

    println!("Registering participants...");
    let asha = app
        .registration
        .submit(Submission {
            name: "Asha Rao".to_string(),
            email: "asha@example.com".to_string(),
            plan: "both".to_string(),
            payment_reference: "UTR-550021".to_string(),
        })
        .await?;
    let ben = app
        .registration
        .submit(Submission {
            name: "Ben Okafor".to_string(),
            email: "ben@example.com".to_string(),
            plan: "workshop".to_string(),
            payment_reference: "UTR-550022".to_string(),
        })
        .await?;
    println!("  ✓ {} ({}) pending", asha.name, asha.plan);
    println!("  ✓ {} ({}) pending\n", ben.name, ben.plan);

    // ========== Verification ==========

    println!("Verifying payments...");
    let asha = app
        .verification
        .verify(asha.key, admin.clone(), Some("UTR matched bank statement".to_string()))
        .await?
        .participant;
    let ben = app.verification.verify(ben.key, admin.clone(), None).await?.participant;
    for participant in [&asha, &ben] {
        let code = participant
            .code
            .as_ref()
            .map_or_else(|| "-".to_string(), ToString::to_string);
        println!("  ✓ {} verified as {code}", participant.name);
    }
    println!();

    // ========== Scanning ==========

    let keynote = CheckInTarget::Event {
        id: EventId::new(),
        category: EventCategory::Technical,
    };
    let asha_qr = qr_for(&asha, &namespace)?;

    println!("Scanning Asha into the keynote with her events-day kit...");
    let scan = app
        .scan
        .scan_and_check_in(
            &asha_qr,
            keynote,
            desk.clone(),
            Some(KitHandout {
                day: KitDay::Events,
                collection_point: "Main hall".to_string(),
            }),
        )
        .await?;
    println!("  ✓ check-in: {}", scan.check_in.label());
    match &scan.kit {
        Some(Ok(kit)) => println!(
            "  ✓ kit: {} (ID card {})",
            kit.label(),
            kit.kit().id_card_number
        ),
        Some(Err(error)) => println!("  ✗ kit: {error}"),
        None => {},
    }

    println!("Scanning Asha again...");
    let again = app.scan.scan_and_check_in(&asha_qr, keynote, desk.clone(), None).await?;
    println!("  ✓ check-in: {}\n", again.check_in.label());

    println!("Scanning Ben into the keynote...");
    match app
        .scan
        .scan_and_check_in(&qr_for(&ben, &namespace)?, keynote, desk.clone(), None)
        .await
    {
        Ok(_) => println!("  ✗ unexpectedly admitted"),
        Err(error) => println!("  ✓ denied: {error}"),
    }
    let lab = CheckInTarget::Workshop { id: WorkshopId::new() };
    let ben_in = app
        .check_in
        .check_in(ben.code.as_ref().ok_or("Ben has no code")?, lab, desk.clone())
        .await?;
    println!("  ✓ Ben checked into the workshop: {}\n", ben_in.label());

    // ========== QR regeneration ==========

    println!("Regenerating Asha's QR...");
    let asha = app.verification.regenerate_qr(asha.key, admin).await?.participant;
    println!("  ✓ now at version {}", asha.qr_token_version);
    match app.scan.lookup(&asha_qr).await {
        Ok(_) => println!("  ✗ old QR still accepted"),
        Err(error) => println!("  ✓ old QR rejected: {error}"),
    }
    let profile = app.scan.lookup(&qr_for(&asha, &namespace)?).await?;
    println!(
        "  ✓ new QR resolves to {} ({} categories allowed)\n",
        profile.name,
        profile.allowed_categories.len()
    );

    // ========== Summary ==========

    let inside = app.queries.currently_checked_in(&keynote).await?;
    let report = app.dispatcher.drain(app.config().outbox.batch_size).await?;
    println!("Keynote attendance: {inside}");
    println!("Outbox messages: {}", store.outbox_messages().len());
    println!("Leftover deliveries: {report:?}");

    println!("\n============================================");
    println!("   Demo complete");
    println!("============================================\n");

    Ok(())
}
