use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::{config, Environment};

/// Default filter when `RUST_LOG` is unset
pub fn default_directive(environment: Environment) -> &'static str {
    match environment {
        Environment::Development => "atlas=debug,tower_http=debug",
        Environment::Staging | Environment::Production => "atlas=info,tower_http=info",
    }
}

/// Install the global subscriber: JSON lines in production, compact elsewhere
pub fn init() {
    let environment = config().environment;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive(environment)));

    let registry = tracing_subscriber::registry().with(filter);
    let result = if environment == Environment::Production {
        registry.with(fmt::layer().json().with_current_span(false)).try_init()
    } else {
        registry.with(fmt::layer().compact()).try_init()
    };
    if result.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}

/// CLI logging goes to stderr so `--json` output on stdout stays parseable
pub fn init_cli(verbose: bool) {
    let default = if verbose { "atlas=debug" } else { "atlas=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact().with_writer(std::io::stderr))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn development_is_verbose() {
        assert!(default_directive(Environment::Development).contains("atlas=debug"));
        assert!(default_directive(Environment::Production).contains("atlas=info"));
    }
}
