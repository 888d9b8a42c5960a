//! Logging setup for specsmith
//!
//! Library crates only emit `tracing` events; the binary installs the
//! subscriber once through [`init_tracing`].

use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Default filter directives when `RUST_LOG` is unset
fn default_directives(verbose: bool) -> &'static str {
    if verbose {
        "specsmith=debug,specsmith_llm=debug,specsmith_clarifier=debug,specsmith_generator=debug,info"
    } else {
        "specsmith=info,warn"
    }
}

/// Initialize the tracing subscriber for structured logging
///
/// Compact, human-readable output by default. Verbose mode adds targets and
/// span close events so per-phase durations show up. `RUST_LOG` always wins
/// over the built-in directives. Logs go to stderr so stdout stays usable for
/// JSON output.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_tracing(verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directives(verbose)))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if verbose {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_line_number(false)
                    .with_file(false)
                    .with_span_events(FmtSpan::CLOSE)
                    .compact(),
            )
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_line_number(false)
                    .with_file(false)
                    .compact(),
            )
            .try_init()?;
    }

    Ok(())
}

/// Span wrapping one phase of a clarification or generation run
pub fn phase_span(id: &str, phase: &str) -> tracing::Span {
    tracing::info_span!("phase", id = %id, phase = %phase)
}
