pub mod builders;
pub mod recording_driver;

use std::sync::{Arc, Once};

use buildgraph::dag::ImageGraph;
use buildgraph::engine::BuildService;
use buildgraph::exec::{DEFAULT_QUEUE_CAPACITY, Dispatcher, DriverRegistry};
use tracing_subscriber::{EnvFilter, fmt};

pub use builders::{GraphFixture, ImageDefinitionBuilder};
pub use recording_driver::RecordingDriver;

static INIT: Once = Once::new();

/// Initialise tracing for tests.
///
/// - Uses `with_test_writer()`, so logs are captured per-test.
/// - The Rust test harness only prints captured output for **failing** tests
///   (unless you run with `-- --nocapture`).
///
/// Enable levels with e.g.:
/// `RUST_LOG=debug cargo test`
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer() // print only for failing tests unless --nocapture
            .with_target(true)
            .init();
    });
}

/// Run a future with a 5-second timeout.
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(std::time::Duration::from_secs(5), f)
        .await
        .expect("Test timed out after 5 seconds")
}

/// A build service whose only driver is `driver`, on `workers` workers.
///
/// Must be called inside a tokio runtime. The dispatcher is returned so the
/// test can shut it down.
pub fn build_service(
    graph: ImageGraph,
    driver: Arc<RecordingDriver>,
    workers: usize,
) -> (BuildService, Arc<Dispatcher>) {
    let mut drivers = DriverRegistry::new();
    drivers.register(driver);
    let dispatcher = Arc::new(
        Dispatcher::new(workers, DEFAULT_QUEUE_CAPACITY).expect("dispatcher with >= 1 worker"),
    );
    let service = BuildService::new(Arc::new(graph), drivers, Arc::clone(&dispatcher));
    (service, dispatcher)
}
