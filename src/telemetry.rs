use crate::config::LogSettings;

use tracing_subscriber::EnvFilter;

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence over the configured filter. Calling this more
/// than once is harmless; later calls keep the first subscriber.
pub fn init_tracing(log: &LogSettings) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_line_number(true);

    let installed = if log.json {
        builder.json().flatten_event(true).with_current_span(true).try_init()
    } else {
        builder.try_init()
    };
    if let Err(err) = installed {
        tracing::debug!(error = %err, "keeping the tracing subscriber already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_initialization_keeps_the_first_subscriber() {
        let text = LogSettings::default();
        let json = LogSettings {
            json: true,
            ..LogSettings::default()
        };

        init_tracing(&text);
        init_tracing(&json);
        tracing::info!("still logging");
    }
}
