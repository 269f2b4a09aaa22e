use crate::config::{LoggingConfig, RedactionConfig};
use regex::Regex;
use std::io;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer};

/// Credentials that tend to show up in SQL text and file paths.
const DEFAULT_PATTERNS: &[(&str, &str)] = &[
    (
        r"(?i)\b(password|passwd|pwd|secret|token|api_key)\s*[=:]\s*'[^']*'",
        "$1='[REDACTED]'",
    ),
    (
        r"(?i)\b(password|passwd|pwd|secret|token|api_key)\s*[=:]\s*[^\s,;')]+",
        "$1=[REDACTED]",
    ),
    (r"\b(s3|gcs|az|https?)://[^/\s:@]+:[^/\s@]+@", "$1://[REDACTED]@"),
];

struct RedactingWriter<W> {
    inner: W,
    patterns: Vec<(Regex, String)>,
}

impl<W: io::Write> io::Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let s = String::from_utf8_lossy(buf);
        let mut redacted = s.to_string();
        for (re, replacement) in &self.patterns {
            redacted = re.replace_all(&redacted, replacement.as_str()).to_string();
        }
        self.inner.write_all(redacted.as_bytes())?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

struct RedactingMakeWriter {
    patterns: Vec<(Regex, String)>,
}

impl<'a> fmt::MakeWriter<'a> for RedactingMakeWriter {
    type Writer = RedactingWriter<io::Stderr>;

    fn make_writer(&self) -> Self::Writer {
        RedactingWriter {
            inner: io::stderr(),
            patterns: self.patterns.clone(),
        }
    }
}

/// Compile the configured redaction patterns. Invalid expressions are
/// reported and skipped; logging is not up yet, so they go to stderr.
fn compile_patterns(config: &RedactionConfig) -> Vec<(Regex, String)> {
    if !config.enabled {
        return Vec::new();
    }
    let builtin = DEFAULT_PATTERNS
        .iter()
        .filter(|_| config.use_default_patterns)
        .map(|(re, placeholder)| ("builtin", *re, *placeholder));
    let custom = config
        .patterns
        .iter()
        .map(|p| (p.name.as_str(), p.regex.as_str(), p.placeholder.as_str()));

    let mut patterns = Vec::new();
    for (name, re, placeholder) in builtin.chain(custom) {
        match Regex::new(re) {
            Ok(re) => patterns.push((re, placeholder.to_string())),
            Err(e) => eprintln!("warning: ignoring redaction pattern '{}': {}", name, e),
        }
    }
    patterns
}

/// Install the global subscriber. `RUST_LOG` wins over the configured levels.
pub fn init_logging(config: &LoggingConfig) {
    let level = config.levels.directive();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let show_file = config.format.location.show_file;
    let show_line = config.format.location.show_line;
    let make_writer = RedactingMakeWriter {
        patterns: compile_patterns(&config.redaction),
    };

    // Use Layer::boxed() to unify the types of the branches
    let fmt_layer = match (config.json, config.format.show_time) {
        (true, _) => fmt::layer()
            .json()
            .with_writer(make_writer)
            .with_file(show_file)
            .with_line_number(show_line)
            .boxed(),
        (false, false) => fmt::layer()
            .with_writer(make_writer)
            .with_target(show_file)
            .with_file(show_file)
            .with_line_number(show_line)
            .without_time()
            .boxed(),
        (false, true) => fmt::layer()
            .with_writer(make_writer)
            .with_target(show_file)
            .with_file(show_file)
            .with_line_number(show_line)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}
