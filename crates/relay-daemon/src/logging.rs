// SPDX-License-Identifier: MIT OR Apache-2.0
//! Subscriber installation for the binary.

use tracing_subscriber::EnvFilter;

/// How the binary wants its logs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogOptions {
    /// `--debug` was given.
    pub debug: bool,
    /// Emit JSON lines instead of text.
    pub json: bool,
    /// `log_level` from the configuration.
    pub level: Option<String>,
}

impl LogOptions {
    /// Filter directive used when `RUST_LOG` is unset.
    ///
    /// `--debug` wins over the configured level, which wins over `info`.
    pub fn default_directive(&self) -> String {
        let level = if self.debug {
            "debug"
        } else {
            self.level.as_deref().unwrap_or("info")
        };
        format!("relay={level}")
    }
}

/// Install the global subscriber. `RUST_LOG` takes precedence.
pub fn init(options: &LogOptions) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(options.default_directive()));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let installed = if options.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    // A second call (tests) leaves the first subscriber in place.
    let _ = installed;
}
