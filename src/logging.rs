//! Tracing setup and stage timing.

use std::future::Future;
use std::time::Instant;

use tracing::info;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `RUST_LOG` wins over `level`. Logs go to
/// stderr so stdout stays free for answers.
pub fn init(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "{},reqwest=warn,hyper=warn,h2=warn,hyper_util=warn,rustls=warn",
            level
        ))
    });
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Await `fut`, logging when the stage starts and how long it took.
pub async fn timed<F: Future>(label: &str, fut: F) -> F::Output {
    let start = Instant::now();
    info!("started block: {}", label);
    let out = fut.await;
    info!("finished block: {} in {:.4} seconds", label, start.elapsed().as_secs_f64());
    out
}
