use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use resizer_core::{TelemetryEvent, TelemetrySink};

pub const SINK_ENV: &str = "RESIZER_TELEMETRY_SINK";
pub const FILE_ENV: &str = "RESIZER_TELEMETRY_FILE";
pub const ENDPOINT_ENV: &str = "RESIZER_TELEMETRY_ENDPOINT";

const HTTP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Default)]
pub struct TelemetrySettings {
    pub mode: Option<String>,
    pub file: Option<String>,
    pub endpoint: Option<String>,
}

impl TelemetrySettings {
    pub fn from_env() -> Self {
        Self {
            mode: std::env::var(SINK_ENV).ok(),
            file: std::env::var(FILE_ENV).ok(),
            endpoint: std::env::var(ENDPOINT_ENV).ok(),
        }
    }
}

pub fn sink_from_env() -> Option<Box<dyn TelemetrySink>> {
    sink_from_settings(&TelemetrySettings::from_env())
}

/// Picks a sink for `mode`: `tracing`, `stderr`, `file` or `http`.
///
/// Misconfiguration disables telemetry with a warning instead of failing the
/// resize it would have observed.
pub fn sink_from_settings(settings: &TelemetrySettings) -> Option<Box<dyn TelemetrySink>> {
    let mode = settings.mode.as_deref()?.trim().to_ascii_lowercase();
    let built: Result<Box<dyn TelemetrySink>> = match mode.as_str() {
        "" => return None,
        "tracing" | "log" => Ok(Box::new(TracingSink)),
        "stderr" => Ok(Box::new(JsonLinesSink::new(std::io::stderr()))),
        "file" => non_blank(settings.file.as_deref(), FILE_ENV)
            .and_then(|path| JsonLinesSink::append_to(Path::new(path)))
            .map(|sink| Box::new(sink) as Box<dyn TelemetrySink>),
        "http" => non_blank(settings.endpoint.as_deref(), ENDPOINT_ENV)
            .and_then(|endpoint| HttpSink::new(endpoint.to_string()))
            .map(|sink| Box::new(sink) as Box<dyn TelemetrySink>),
        other => Err(anyhow::anyhow!(
            "unknown telemetry sink '{}'; expected one of: tracing, stderr, file, http",
            other
        )),
    };
    match built {
        Ok(sink) => Some(sink),
        Err(err) => {
            tracing::warn!(error = %err, "telemetry disabled");
            None
        }
    }
}

fn non_blank<'a>(value: Option<&'a str>, var: &str) -> Result<&'a str> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .with_context(|| format!("{} must be set", var))
}

/// Logs each event through `tracing` under the `resizer::telemetry` target.
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn emit(&self, event: TelemetryEvent) {
        let TelemetryEvent {
            event_type,
            platform,
            max_dimension,
            file_name,
            duration_ms,
            outcome,
            error,
        } = event;
        if let Some(outcome) = outcome {
            tracing::info!(
                target: "resizer::telemetry",
                ?event_type,
                ?platform,
                max_dimension,
                duration_ms,
                original = %outcome.original,
                resized = %outcome.resized,
                original_bytes = outcome.original_bytes,
                output_bytes = outcome.output_bytes,
                output_format = outcome.output_format.label(),
                passthrough = outcome.passthrough,
                "resize finished"
            );
        } else if let Some(error) = error {
            tracing::warn!(
                target: "resizer::telemetry",
                ?event_type,
                ?platform,
                max_dimension,
                duration_ms,
                code = ?error.code,
                message = %error.message,
                "resize failed"
            );
        } else {
            tracing::debug!(
                target: "resizer::telemetry",
                ?event_type,
                ?platform,
                max_dimension,
                file_name = file_name.as_deref(),
                "resize started"
            );
        }
    }
}

/// Writes one JSON object per event and flushes after each line.
pub struct JsonLinesSink<W> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_event(&self, event: &TelemetryEvent) -> Result<()> {
        let line = serde_json::to_string(event).context("serializing telemetry event")?;
        let mut writer = self.writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        writeln!(writer, "{}", line).context("writing telemetry line")?;
        writer.flush().context("flushing telemetry line")?;
        Ok(())
    }
}

impl JsonLinesSink<File> {
    pub fn append_to(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating telemetry directory {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("opening telemetry file {}", path.display()))?;
        Ok(Self::new(file))
    }
}

impl<W: Write + Send> TelemetrySink for JsonLinesSink<W> {
    fn emit(&self, event: TelemetryEvent) {
        if let Err(err) = self.write_event(&event) {
            tracing::warn!(error = %err, "dropping telemetry event");
        }
    }
}

/// POSTs each event as JSON. Delivery failures are logged at debug level.
pub struct HttpSink {
    endpoint: String,
    client: Client,
}

impl HttpSink {
    pub fn new(endpoint: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .context("building telemetry http client")?;
        Ok(Self { endpoint, client })
    }
}

impl TelemetrySink for HttpSink {
    fn emit(&self, event: TelemetryEvent) {
        let sent = self
            .client
            .post(&self.endpoint)
            .json(&event)
            .send()
            .and_then(|response| response.error_for_status());
        if let Err(err) = sent {
            tracing::debug!(endpoint = %self.endpoint, error = %err, "telemetry post failed");
        }
    }
}
