use color_eyre::{Result, eyre::Context as _};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    Layer as _, layer::SubscriberExt as _, util::SubscriberInitExt as _,
};

/// Install the tracing subscriber.
///
/// Diagnostics are filtered by the `BRISK_LOG` environment variable and go
/// to stderr, away from the build output on stdout.
pub fn init() -> Result<()> {
    tracing_subscriber::registry()
        .with(ErrorLayer::default())
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_filter(
                    tracing_subscriber::EnvFilter::builder()
                        .with_env_var("BRISK_LOG")
                        .from_env_lossy(),
                ),
        )
        .try_init()
        .context("install tracing subscriber")
}
