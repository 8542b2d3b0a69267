use std::sync::Arc;
use switchboard::config::Config;
use switchboard::domain::coordinator::AssignmentCoordinator;
use switchboard::domain::store::EntityStore;
use switchboard::infrastructure::persistence::open_store;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::load()?;

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .init();

    info!("Starting switchboard dispatcher");
    info!("Configuration loaded: {:?}", config.store);

    let store = open_store(&config)?;
    demo_dispatch(store)?;

    info!("Switchboard dispatcher finished");
    Ok(())
}

/// Demonstrate a dispatch round over a freshly reset store
fn demo_dispatch(store: Arc<dyn EntityStore>) -> anyhow::Result<()> {
    info!("=== Dispatch Demo ===");

    let coordinator = AssignmentCoordinator::new(store);
    coordinator.calls().destroy_all()?;
    coordinator.operators().destroy_all()?;

    // Three callers, two operators
    let first = coordinator.calls().create("0607080910")?;
    coordinator.calls().create("0628728192")?;
    let third = coordinator.calls().create("0712345678")?;
    coordinator.operators().create("Alexis", "Dubanchet")?;
    coordinator.operators().create("Camille", "Martin")?;

    let report = coordinator.assign_all()?;
    info!("First pass: {}", serde_json::to_string_pretty(&report)?);

    // First caller hangs up; the freed operator picks up the last caller
    let mut first = coordinator.calls().load(first.id())?;
    coordinator
        .calls()
        .set_description(&mut first, "Billing question, resolved")?;
    let completed = coordinator.complete(first.id())?;
    info!(
        "Call {} completed after {}s",
        completed.id(),
        completed.duration().num_seconds()
    );

    let report = coordinator.assign_all()?;
    info!("Second pass: {}", serde_json::to_string_pretty(&report)?);

    let third = coordinator.calls().load(third.id())?;
    info!("Call {} state: {}", third.id(), serde_json::to_string(&third)?);

    for operator in coordinator.operators().list()? {
        info!("Operator: {}", serde_json::to_string(&operator)?);
    }

    info!("=== Dispatch Demo Complete ===");
    Ok(())
}
