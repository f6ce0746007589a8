//! Tracing subscriber setup shared by the workspace binaries.
//!
//! Controlled by environment variables:
//! - `IDE_LOG_LEVEL`: default filter when `RUST_LOG` is unset (`info`)
//! - `IDE_LOG_OUTPUT`: `console`, `file` or `both` (`console`)
//! - `IDE_LOG_FORMAT`: `human` or `json` (`human`)
//! - `IDE_LOG_FILE`: log file, rotated daily (`/tmp/ide-orchestrator.log`)
//! - `IDE_LOG_TAGS`: `key:value` span field filters, e.g. `workspace_id:1f3a`,
//!   `*` matches any value

use std::{
    collections::HashMap,
    env,
    io::{self, Write},
    path::{Path, PathBuf},
};
use tracing::{field::Visit, span, Metadata, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::MakeWriter,
    layer::{Context, Layer},
    prelude::*,
    registry, EnvFilter,
};

pub const DEFAULT_LOG_FILE: &str = "/tmp/ide-orchestrator.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutput {
    Console,
    File,
    Both,
    /// Unrecognised value: the filter is installed without a formatter.
    Silent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Human,
    Json,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub level: String,
    pub output: LogOutput,
    pub format: LogFormat,
    pub tags: Vec<Tag>,
    pub file_path: PathBuf,
}

impl LogSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds settings from any variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let level = lookup("IDE_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        let output = match lookup("IDE_LOG_OUTPUT").as_deref().map(str::trim) {
            None | Some("console") => LogOutput::Console,
            Some("file") => LogOutput::File,
            Some("both") => LogOutput::Both,
            Some(_) => LogOutput::Silent,
        };

        let format = match lookup("IDE_LOG_FORMAT").as_deref().map(str::trim) {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Human,
        };

        let tags = lookup("IDE_LOG_TAGS")
            .map(|raw| parse_tags(&raw))
            .unwrap_or_default();

        let file_path = lookup("IDE_LOG_FILE")
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE));

        Self {
            level,
            output,
            format,
            tags,
            file_path,
        }
    }

    fn log_dir(&self) -> &Path {
        match self.file_path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("/tmp"),
        }
    }

    fn log_file_name(&self) -> &std::ffi::OsStr {
        self.file_path
            .file_name()
            .unwrap_or_else(|| "ide-orchestrator.log".as_ref())
    }
}

/// Parses `key:value,key:value`. Entries without a `:` are dropped.
pub fn parse_tags(raw: &str) -> Vec<Tag> {
    raw.split(',')
        .filter_map(|s| {
            let mut parts = s.splitn(2, ':');
            let key = parts.next()?.trim().to_string();
            let value = parts.next()?.trim().to_string();
            if key.is_empty() {
                return None;
            }
            Some(Tag { key, value })
        })
        .collect()
}

// --- Custom "Tee" Writer ---
struct Tee<A, B> {
    a: A,
    b: B,
}

impl<A, B> Write for Tee<A, B>
where
    A: Write,
    B: Write,
{
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let res_a = self.a.write(buf);
        let res_b = self.b.write(buf);
        res_a.or(res_b)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.a.flush()?;
        self.b.flush()
    }
}

#[derive(Clone)]
struct MakeTee<A, B> {
    make_a: A,
    make_b: B,
}

impl<'a, A, B, W1, W2> MakeWriter<'a> for MakeTee<A, B>
where
    A: MakeWriter<'a, Writer = W1>,
    B: MakeWriter<'a, Writer = W2>,
    W1: Write + 'a,
    W2: Write + 'a,
{
    type Writer = Tee<W1, W2>;
    fn make_writer(&'a self) -> Self::Writer {
        Tee {
            a: self.make_a.make_writer(),
            b: self.make_b.make_writer(),
        }
    }
}

// --- Span field filtering ---
struct TagFilterLayer {
    filters: Vec<Tag>,
}

impl<S> Layer<S> for TagFilterLayer
where
    S: Subscriber + for<'lookup> tracing_subscriber::registry::LookupSpan<'lookup>,
{
    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut fields = HashMap::new();
        let mut visitor = FieldVisitor(&mut fields);
        attrs.record(&mut visitor);
        span.extensions_mut().insert(fields);
    }

    fn enabled(&self, _meta: &Metadata<'_>, ctx: Context<'_, S>) -> bool {
        if self.filters.is_empty() {
            return true;
        }

        // With tags set, events outside any span are dropped.
        let scope = match ctx.current_span().id().and_then(|id| ctx.span_scope(id)) {
            Some(scope) => scope,
            None => return false,
        };

        let mut all_fields = HashMap::new();
        for span_ref in scope {
            if let Some(fields) = span_ref.extensions().get::<HashMap<String, String>>() {
                for (k, v) in fields {
                    all_fields.entry(k.clone()).or_insert_with(|| v.clone());
                }
            }
        }

        tags_match(&self.filters, &all_fields)
    }
}

fn tags_match(filters: &[Tag], fields: &HashMap<String, String>) -> bool {
    filters.iter().all(|filter| {
        fields
            .get(&filter.key)
            .is_some_and(|value| filter.value == "*" || value.contains(&filter.value))
    })
}

struct FieldVisitor<'a>(&'a mut HashMap<String, String>);

impl Visit for FieldVisitor<'_> {
    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.0.insert(field.name().to_string(), value.to_string());
    }

    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.0
            .insert(field.name().to_string(), format!("{value:?}"));
    }
}

fn env_filter(level: &str) -> EnvFilter {
    let mut filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    for directive in ["tokio=warn", "hyper=warn", "sqlx=warn", "tower_http=info"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }
    filter
}

/// Initializes the global tracing subscriber from the environment. The
/// returned guard flushes the file writer and must live as long as the process.
pub fn init_subscriber() -> Option<WorkerGuard> {
    init_with(&LogSettings::from_env())
}

pub fn init_with(settings: &LogSettings) -> Option<WorkerGuard> {
    let is_json = settings.format == LogFormat::Json;
    let mut guard: Option<WorkerGuard> = None;

    let subscriber = registry()
        .with(env_filter(&settings.level))
        .with(TagFilterLayer {
            filters: settings.tags.clone(),
        });

    match settings.output {
        LogOutput::Both => {
            let file_appender =
                tracing_appender::rolling::daily(settings.log_dir(), settings.log_file_name());
            let (non_blocking, file_guard) = tracing_appender::non_blocking(file_appender);
            guard = Some(file_guard);

            let tee_writer = MakeTee {
                make_a: std::io::stdout,
                make_b: non_blocking,
            };

            let fmt_layer = tracing_subscriber::fmt::layer().with_writer(tee_writer);
            if is_json {
                subscriber.with(fmt_layer.json()).init();
            } else {
                subscriber.with(fmt_layer).init();
            }
        }
        LogOutput::Console => {
            let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stdout);
            if is_json {
                subscriber.with(fmt_layer.json()).init();
            } else {
                subscriber.with(fmt_layer).init();
            }
        }
        LogOutput::File => {
            let file_appender =
                tracing_appender::rolling::daily(settings.log_dir(), settings.log_file_name());
            let (non_blocking, file_guard) = tracing_appender::non_blocking(file_appender);
            guard = Some(file_guard);

            let fmt_layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(non_blocking);
            if is_json {
                subscriber.with(fmt_layer.json()).init();
            } else {
                subscriber.with(fmt_layer).init();
            }
        }
        LogOutput::Silent => subscriber.init(),
    }

    guard
}
