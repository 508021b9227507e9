use std::io;
use std::path::Path;
use std::str::FromStr as _;

use anyhow::{Context as _, Result};
use tracing_appender::rolling::RollingFileAppender;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;
use tracing_subscriber::{EnvFilter, Layer as _, filter::Directive, filter::LevelFilter, fmt};

use crate::event::EventHub;

pub const LOG_FILE: &str = "swap-all.log";

/// Terminal output format.
pub enum Format {
    /// Human readable.
    Raw,
    /// Machine readable.
    Json,
}

/// Initialize tracing: a terminal layer at `level_filter`, a JSON log file
/// under `dir` capturing DEBUG and up, and (when a hub is given) a layer
/// forwarding every formatted line to subscribers as `cli-log-emitted`
/// events.
pub fn init(
    level_filter: LevelFilter,
    format: Format,
    dir: impl AsRef<Path>,
    hub: Option<EventHub>,
) -> Result<()> {
    let file_appender: RollingFileAppender =
        tracing_appender::rolling::never(dir.as_ref(), LOG_FILE);

    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .with_target(false)
        .json()
        .with_filter(env_filter(LevelFilter::DEBUG)?);

    let terminal_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .with_target(false);
    let terminal_layer = match format {
        Format::Json => terminal_layer
            .json()
            .with_filter(env_filter(level_filter)?)
            .boxed(),
        Format::Raw => terminal_layer.with_filter(env_filter(level_filter)?).boxed(),
    };

    let hub_layer = fmt::layer()
        .with_writer(HubWriter::new(hub))
        .with_ansi(false)
        .with_target(true)
        .json()
        .with_filter(env_filter(level_filter)?);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(terminal_layer)
        .with(hub_layer)
        .try_init()?;

    tracing::info!(%level_filter, logs_dir = %dir.as_ref().display(), "initialized tracing");

    Ok(())
}

fn env_filter(level_filter: LevelFilter) -> Result<EnvFilter> {
    let mut filter = EnvFilter::from_default_env();
    filter = filter.add_directive(
        Directive::from_str(&format!("btc_xmr_swap={level_filter}"))
            .context("build filter directive")?,
    );
    Ok(filter)
}

/// Forwards every formatted log line to the event hub.
#[derive(Clone)]
struct HubWriter {
    hub: Option<EventHub>,
}

impl HubWriter {
    fn new(hub: Option<EventHub>) -> Self {
        Self { hub }
    }
}

impl<'a> MakeWriter<'a> for HubWriter {
    type Writer = HubWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

impl io::Write for HubWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let line = String::from_utf8(buf.to_vec())
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;

        if let Some(hub) = &self.hub {
            hub.emit_cli_log(line);
        }

        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
