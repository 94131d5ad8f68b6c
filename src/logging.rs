use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Log to stderr so stdout stays clean for reports and `--maintenance export`.
///
/// `RUST_LOG` wins when set; otherwise `info`, with this crate raised to
/// `debug` under `--verbose`.
pub fn init_logger(verbose: bool) {
    let default = if verbose {
        "info,image_publisher=debug"
    } else {
        "info"
    };
    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .without_time(),
        )
        .with(filter_layer)
        .init();
}
