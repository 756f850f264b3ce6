//! Log redaction for patient identifiers and secrets.
//!
//! Every formatted log line passes through [`SanitizingMakeWriter`] before it
//! reaches stdout or the log file. Rules cover:
//! - National identity numbers (`ci=...`, `CI: ...` and `1234567-1A` forms)
//! - Phone numbers and email addresses
//! - UUIDs, JWTs and Argon2 PHC hashes
//! - Values assigned to secret-looking keys (`password=...`, `token: ...`)
//!
//! Handlers avoid logging patient fields in the first place; this layer
//! catches what slips through in error messages.
//!
//! Input is capped at `LESIONSCOPE_SANITIZE_MAX_BYTES` (16 KiB default) per
//! call.

use regex::{Regex, RegexSet};
use std::sync::OnceLock;
use tracing_subscriber::fmt::MakeWriter;

static RULES: OnceLock<Option<RedactionRules>> = OnceLock::new();

const DEFAULT_SANITIZE_MAX_BYTES: usize = 16 * 1024;

/// Emitted in place of a line when the rule set failed to build.
const REDACTED_LINE: &str = "[REDACTED-LINE]\n";

const RULE_TABLE: &[(&str, &str)] = &[
    (
        r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}",
        "[REDACTED-UUID]",
    ),
    (r"\$argon2(?:id|i|d)\$\S+", "[REDACTED-HASH]"),
    (
        r"\beyJ[a-zA-Z0-9_-]{10,}\.[a-zA-Z0-9_-]{10,}\.[a-zA-Z0-9_-]{10,}\b",
        "[REDACTED-JWT]",
    ),
    (
        r"(?i)\b(?:password|passwd|pwd|secret|token|api[_-]?key)\b\s*[:=]\s*\S+",
        "[REDACTED-SECRET]",
    ),
    (
        r"(?i)\b(?:ci|cedula|cédula|national[_-]?id)\b\s*[:=]?\s*[0-9]{5,10}(?:-[0-9A-Za-z]{1,5})?\b",
        "[REDACTED-CI]",
    ),
    (r"\b[0-9]{6,10}-[0-9][A-Za-z]\b", "[REDACTED-CI]"),
    (
        r"(?i)\b[a-z0-9](?:[a-z0-9._%+-]{0,62}[a-z0-9])?@(?:[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z]{2,}\b",
        "[REDACTED-EMAIL]",
    ),
    (
        r"\+[0-9]{1,3}[-.\s]?[0-9]{2,4}[-.\s]?[0-9]{3,4}[-.\s]?[0-9]{0,4}\b",
        "[REDACTED-PHONE]",
    ),
    (r"(?i)\b(?:phone|tel|telefono|teléfono)\b\s*[:=]?\s*[0-9][0-9 ()-]{5,18}[0-9]", "[REDACTED-PHONE]"),
];

struct RedactionRule {
    regex: Regex,
    replacement: &'static str,
}

struct RedactionRules {
    set: RegexSet,
    rules: Vec<RedactionRule>,
}

impl RedactionRules {
    fn build() -> Option<Self> {
        let set = RegexSet::new(RULE_TABLE.iter().map(|(p, _)| *p)).ok()?;
        let rules = RULE_TABLE
            .iter()
            .map(|&(pattern, replacement)| {
                Regex::new(pattern)
                    .ok()
                    .map(|regex| RedactionRule { regex, replacement })
            })
            .collect::<Option<Vec<_>>>()?;
        Some(Self { set, rules })
    }
}

fn rules() -> Option<&'static RedactionRules> {
    RULES.get_or_init(RedactionRules::build).as_ref()
}

fn truncate_to_char_boundary(input: &str, max_bytes: usize) -> (&str, bool) {
    if input.len() <= max_bytes {
        return (input, false);
    }

    let mut end = max_bytes;
    while end > 0 && !input.is_char_boundary(end) {
        end -= 1;
    }
    (&input[..end], true)
}

fn max_sanitize_bytes() -> usize {
    std::env::var("LESIONSCOPE_SANITIZE_MAX_BYTES")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|&v| v > 0)
        .unwrap_or(DEFAULT_SANITIZE_MAX_BYTES)
}

/// Replace every identifier or secret found in `input`.
#[must_use]
pub fn sanitize(input: &str) -> String {
    sanitize_with_limit(input, max_sanitize_bytes())
}

fn sanitize_with_limit(input: &str, max_bytes: usize) -> String {
    let Some(rules) = rules() else {
        return REDACTED_LINE.to_string();
    };

    let (prefix, truncated) = truncate_to_char_boundary(input, max_bytes);

    let mut result = prefix.to_string();
    // Rules run in table order; only those that matched the raw prefix.
    for idx in rules.set.matches(prefix).into_iter() {
        let rule = &rules.rules[idx];
        result = rule.regex.replace_all(&result, rule.replacement).into_owned();
    }

    if truncated {
        result.push_str(" [TRUNCATED]");
    }
    result
}

/// A `tracing_subscriber` writer wrapper that redacts each formatted line
/// before it reaches the underlying sink.
#[derive(Debug, Clone)]
pub struct SanitizingMakeWriter<M> {
    inner: M,
}

impl<M> SanitizingMakeWriter<M> {
    #[must_use]
    pub fn new(inner: M) -> Self {
        Self { inner }
    }
}

/// Line-buffering writer produced by [`SanitizingMakeWriter`].
pub struct SanitizingWriter<W: std::io::Write> {
    inner: W,
    buffer: Vec<u8>,
}

impl<W: std::io::Write> SanitizingWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            buffer: Vec::new(),
        }
    }

    fn write_sanitized(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        let text = String::from_utf8_lossy(bytes);
        self.inner.write_all(sanitize(&text).as_bytes())
    }

    fn flush_lines(&mut self) -> std::io::Result<()> {
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.write_sanitized(&line)?;
        }
        Ok(())
    }
}

impl<W: std::io::Write> std::io::Write for SanitizingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.extend_from_slice(buf);

        // A single line larger than twice the cap is flushed as-is (truncated).
        let hard_cap = max_sanitize_bytes().saturating_mul(2);
        if self.buffer.len() > hard_cap {
            let pending = std::mem::take(&mut self.buffer);
            self.write_sanitized(&pending)?;
            self.inner.write_all(b"\n")?;
            return Ok(buf.len());
        }

        self.flush_lines()?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.flush_lines()?;
        if !self.buffer.is_empty() {
            let pending = std::mem::take(&mut self.buffer);
            self.write_sanitized(&pending)?;
        }
        self.inner.flush()
    }
}

// tracing-subscriber writes one event per writer and then drops it.
impl<W: std::io::Write> Drop for SanitizingWriter<W> {
    fn drop(&mut self) {
        let _ = std::io::Write::flush(self);
    }
}

impl<'a, M> MakeWriter<'a> for SanitizingMakeWriter<M>
where
    M: MakeWriter<'a>,
{
    type Writer = SanitizingWriter<M::Writer>;

    fn make_writer(&'a self) -> Self::Writer {
        SanitizingWriter::new(self.inner.make_writer())
    }
}
