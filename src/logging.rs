//! Log formatting for applications embedding the access layer
//!
//! Every line carries the host name and the name of the embedding
//! application, so logs collected from many client nodes stay attributable:
//!
//! ```text
//! [node17 ingest] 2026-01-05T10:11:12.123456Z DEBUG open{path="/a"}:fill{start=0}: qfs_access::io::input:io/input.rs:210: prefetch issued
//! ```

use std::fmt;

use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields, FormattedFields};
use tracing_subscriber::registry::LookupSpan;

/// Event formatter with a `[hostname label]` prefix and no ANSI colors
pub struct HostnameFormatter {
    hostname: String,
    label: String,
}

impl HostnameFormatter {
    pub fn new() -> Self {
        Self::with_label("qfs-access")
    }

    /// Formatter whose prefix names `label` after the host
    pub fn with_label(label: &str) -> Self {
        let hostname = gethostname::gethostname()
            .to_str()
            .unwrap_or("unknown")
            .to_string();
        Self {
            hostname,
            label: label.to_string(),
        }
    }
}

impl Default for HostnameFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl<S, N> FormatEvent<S, N> for HostnameFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let meta = event.metadata();
        let now: chrono::DateTime<chrono::Utc> = std::time::SystemTime::now().into();

        write!(
            writer,
            "[{} {}] {} {:5} ",
            self.hostname,
            self.label,
            now.format("%Y-%m-%dT%H:%M:%S%.6fZ"),
            meta.level()
        )?;

        // Span chain on one line, outermost first
        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                write!(writer, "{}", span.name())?;
                let ext = span.extensions();
                if let Some(fields) = ext.get::<FormattedFields<N>>() {
                    if !fields.is_empty() {
                        write!(writer, "{{{}}}", fields)?;
                    }
                }
                write!(writer, ":")?;
            }
            write!(writer, " ")?;
        }

        write!(writer, "{}", meta.target())?;
        if let (Some(file), Some(line)) = (meta.file(), meta.line()) {
            write!(writer, ":{}:{}", file, line)?;
        }

        write!(writer, ": ")?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

/// Error returned when a global subscriber is already installed
#[derive(Debug, thiserror::Error)]
#[error("failed to install log subscriber: {0}")]
pub struct LoggingInitError(String);

/// Install the hostname-prefixed subscriber, failing if one already exists
///
/// `RUST_LOG` overrides `level` when set.
pub fn try_init_with_hostname(level: &str, label: &str) -> Result<(), LoggingInitError> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let fmt_layer = fmt::layer()
        .event_format(HostnameFormatter::with_label(label))
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| LoggingInitError(e.to_string()))?;

    tracing::info!(
        "Logging initialized on host: {}",
        gethostname::gethostname().to_str().unwrap_or("unknown")
    );
    Ok(())
}

/// Install the hostname-prefixed subscriber
///
/// Keeps any subscriber that is already installed.
pub fn init_with_hostname(level: &str) {
    if let Err(e) = try_init_with_hostname(level, "qfs-access") {
        tracing::debug!("{}", e);
    }
}
