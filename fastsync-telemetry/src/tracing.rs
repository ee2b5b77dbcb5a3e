use fastsync_config::Environment;
use serde_json::Value;
use std::backtrace::Backtrace;
use std::io::{self, Write};
use std::panic::PanicHookInfo;
use std::sync::{Once, OnceLock};
use thiserror::Error;
use tracing::subscriber::{SetGlobalDefaultError, set_global_default};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{self, InitError, Rotation};
use tracing_log::{LogTracer, log_tracer::SetLoggerError};
use tracing_subscriber::fmt::{self, MakeWriter};
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt};

const RUN_ID_FIELD: &str = "run_id";

/// Directory receiving the rolling log files of prod and staging runs.
const LOG_DIR: &str = "logs";
const KEPT_LOG_FILES: usize = 5;

#[derive(Debug, Error)]
pub enum TracingError {
    #[error("could not open the log directory: {0}")]
    Appender(#[from] InitError),

    #[error("could not route `log` records into tracing: {0}")]
    LogTracer(#[from] SetLoggerError),

    #[error("a global subscriber is already installed: {0}")]
    GlobalDefault(#[from] SetGlobalDefaultError),

    #[error("could not read the environment: {0}")]
    Environment(#[from] io::Error),
}

/// Handle returned by [`init_tracing`]. Hold it until exit, dropping it flushes buffered lines.
#[must_use]
pub enum LogFlusher {
    Flusher(WorkerGuard),
    NullFlusher,
}

static RUN_ID: OnceLock<String> = OnceLock::new();

/// Run id tagged onto JSON log lines. The first value set wins.
pub fn set_global_run_id(run_id: String) {
    let _ = RUN_ID.set(run_id);
}

pub fn get_global_run_id() -> Option<&'static str> {
    RUN_ID.get().map(String::as_str)
}

/// Returns `line` with a `run_id` field, or `None` if it is not a JSON object or already has one.
fn inject_run_id(line: &str, run_id: &str) -> Option<String> {
    let Ok(Value::Object(mut fields)) = serde_json::from_str::<Value>(line) else {
        return None;
    };
    if fields.contains_key(RUN_ID_FIELD) {
        return None;
    }
    fields.insert(RUN_ID_FIELD.to_owned(), Value::String(run_id.to_owned()));

    let mut tagged = Value::Object(fields).to_string();
    if line.ends_with('\n') {
        tagged.push('\n');
    }
    Some(tagged)
}

/// Produces [`RunIdWriter`]s over the writers of `M`.
struct TaggingMakeWriter<M> {
    inner: M,
}

impl<'a, M: MakeWriter<'a>> MakeWriter<'a> for TaggingMakeWriter<M> {
    type Writer = RunIdWriter<M::Writer>;

    fn make_writer(&'a self) -> Self::Writer {
        RunIdWriter {
            inner: self.inner.make_writer(),
        }
    }
}

/// Adds the global run id to each JSON line passing through.
struct RunIdWriter<W> {
    inner: W,
}

impl<W: Write> Write for RunIdWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let tagged = std::str::from_utf8(buf)
            .ok()
            .zip(get_global_run_id())
            .and_then(|(line, run_id)| inject_run_id(line, run_id));

        let Some(tagged) = tagged else {
            return self.inner.write(buf);
        };
        self.inner.write_all(tagged.as_bytes())?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

pub fn init_tracing(app_name: &str) -> Result<LogFlusher, TracingError> {
    init_tracing_with_run_id(app_name, None)
}

/// Installs the global subscriber.
///
/// Prod and staging write JSON lines, tagged with `run_id`, to files under `logs/` rotated
/// daily. Dev pretty prints to the terminal. `RUST_LOG` overrides the default `info` filter.
pub fn init_tracing_with_run_id(
    app_name: &str,
    run_id: Option<String>,
) -> Result<LogFlusher, TracingError> {
    if let Some(run_id) = run_id {
        set_global_run_id(run_id);
    }
    LogTracer::init()?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let flusher = if Environment::load()?.is_prod() {
        let (writer, guard) = rolling_file_writer(app_name)?;
        let json = fmt::layer()
            .json()
            .with_ansi(false)
            .with_target(false)
            .with_current_span(true)
            .with_span_list(true)
            .with_writer(TaggingMakeWriter { inner: writer });
        set_global_default(Registry::default().with(filter).with(json))?;
        LogFlusher::Flusher(guard)
    } else {
        let pretty = fmt::layer()
            .pretty()
            .with_file(false)
            .with_line_number(false);
        set_global_default(Registry::default().with(filter).with(pretty))?;
        LogFlusher::NullFlusher
    };

    install_panic_hook();

    Ok(flusher)
}

fn rolling_file_writer(app_name: &str) -> Result<(NonBlocking, WorkerGuard), TracingError> {
    let appender = rolling::Builder::new()
        .rotation(Rotation::DAILY)
        .filename_prefix(app_name)
        .filename_suffix("log")
        .max_log_files(KEPT_LOG_FILES)
        .build(LOG_DIR)?;

    Ok(tracing_appender::non_blocking(appender))
}

/// Records panics as error events, then defers to the hook that was installed before.
fn install_panic_hook() {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        log_panic(info);
        previous(info);
    }));
}

fn log_panic(info: &PanicHookInfo) {
    let payload = info
        .payload()
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| info.payload().downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload");

    tracing::error!(
        panic.payload = payload,
        panic.location = info.location().map(tracing::field::display),
        panic.backtrace = %Backtrace::capture(),
        "a panic occurred",
    );
}

static INIT_TEST_TRACING: Once = Once::new();

/// Prints tracing output of tests to the terminal when `ENABLE_TRACING` is set:
///
/// ```bash
/// ENABLE_TRACING=1 cargo test -p fastsync sync_table
/// ```
pub fn init_test_tracing() {
    INIT_TEST_TRACING.call_once(|| {
        if std::env::var_os("ENABLE_TRACING").is_none() {
            return;
        }
        Environment::Dev.set();
        if let Err(err) = init_tracing("test") {
            eprintln!("tracing disabled for tests: {err}");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_id_is_added_to_json_lines() {
        let line = "{\"level\":\"INFO\",\"fields\":{\"message\":\"sync finished\"}}\n";

        let tagged = inject_run_id(line, "run-1").unwrap();

        assert!(tagged.ends_with('\n'));
        let value: Value = serde_json::from_str(tagged.trim_end()).unwrap();
        assert_eq!(value["run_id"], "run-1");
        assert_eq!(value["fields"]["message"], "sync finished");
    }

    #[test]
    fn test_existing_run_id_and_plain_text_are_kept() {
        assert!(inject_run_id("{\"run_id\":\"other\"}", "run-1").is_none());
        assert!(inject_run_id("not json", "run-1").is_none());
    }

    #[test]
    fn test_writer_passes_plain_text_through() {
        let mut writer = RunIdWriter { inner: Vec::new() };

        let written = writer.write(b"plain text\n").unwrap();

        assert_eq!(written, 11);
        assert_eq!(writer.inner, b"plain text\n");
    }
}
