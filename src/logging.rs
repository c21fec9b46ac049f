//=============================================
// fiberhost/src/logging.rs
//=============================================
// Author: Fiberhost Contributors
// License: MIT
// Goal: Tracing setup shared by the addon and the CLI
// Objective: Offer a consistent subscriber configuration with component labels
//=============================================

use std::sync::OnceLock;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::SubscriberBuilder;

static INIT: OnceLock<bool> = OnceLock::new();

/// Initialize tracing with a component label. `default_directive` applies
/// when `RUST_LOG` is unset or unparsable.
///
/// Returns `false` when another subscriber was already installed by the
/// host process, in which case events go to that one.
pub fn init(component: &str, default_directive: &str) -> bool {
    let installed = *INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(default_directive))
            .unwrap_or_else(|_| EnvFilter::new("info"));
        SubscriberBuilder::default()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_ansi(true)
            .compact()
            .try_init()
            .is_ok()
    });
    tracing::info!(component, installed, "tracing initialised");
    installed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_init_is_harmless() {
        let first = init("test", "debug");
        assert_eq!(init("test-again", "trace"), first);
    }
}
