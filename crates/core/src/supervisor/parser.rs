//! Classification of transcoder diagnostic output.

use once_cell::sync::Lazy;
use regex_lite::Regex;

static SEGMENT_RE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"Opening '([^']+\.(?:ts|m4s|mp4|aac))' for writing").ok());

static OUTPUT_RE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"Output #\d+, [\w,]+, to '([^']+)'").ok());

static BITRATE_RE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"bitrate=\s*([\d.]+)\s*kbits/s").ok());

/// Substrings marking an unrecoverable push failure.
const CRITICAL_PATTERNS: &[&str] = &[
    "authentication failed",
    "connection refused",
    "invalid stream key",
    "bad stream key",
    "invalid key",
    "publish denied",
    "publishing denied",
    "unauthorized",
    "403 forbidden",
];

/// Substrings marking a transient push failure.
const TRANSIENT_PATTERNS: &[&str] = &[
    "broken pipe",
    "connection reset",
    "connection timed out",
    "timed out",
    "error writing trailer",
    "failed to update header",
    "slave muxer",
    "i/o error",
    "end of file",
    "server error",
];

/// What a single diagnostic line says about the stream.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputSignal {
    /// Periodic statistics; carries the output bitrate when present.
    Progress { bitrate_kbps: Option<f64> },
    /// A media segment was opened for writing.
    SegmentWritten { path: String },
    /// Push outputs that were opened.
    OutputOpened { urls: Vec<String> },
    /// A push destination failed.
    PushFailure {
        url: Option<String>,
        critical: bool,
        message: String,
    },
    /// Any other error line.
    Error { message: String },
}

impl OutputSignal {
    /// Whether the line counts against the process error counter.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            OutputSignal::PushFailure { .. } | OutputSignal::Error { .. }
        )
    }
}

/// Per-stream parsing context.
#[derive(Debug, Clone, Default)]
pub struct OutputParser {
    input_source: String,
    push_urls: Vec<String>,
}

impl OutputParser {
    pub fn new(input_source: impl Into<String>, push_urls: Vec<String>) -> Self {
        Self {
            input_source: input_source.into(),
            push_urls,
        }
    }

    pub fn classify(&self, line: &str) -> Option<OutputSignal> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        if let Some(caps) = SEGMENT_RE.as_ref().and_then(|re| re.captures(line)) {
            return Some(OutputSignal::SegmentWritten {
                path: caps[1].to_string(),
            });
        }

        if let Some(caps) = OUTPUT_RE.as_ref().and_then(|re| re.captures(line)) {
            let target = &caps[1];
            let urls: Vec<String> = self
                .push_urls
                .iter()
                .filter(|url| target.contains(url.as_str()))
                .cloned()
                .collect();
            if !urls.is_empty() {
                return Some(OutputSignal::OutputOpened { urls });
            }
            return None;
        }

        let lower = line.to_lowercase();
        let mentions_input = !self.input_source.is_empty() && line.contains(&self.input_source);
        let url = self.push_url_in(line);

        if !mentions_input && (url.is_some() || self.looks_like_push(&lower)) {
            let critical = CRITICAL_PATTERNS.iter().any(|p| lower.contains(p));
            let transient = TRANSIENT_PATTERNS.iter().any(|p| lower.contains(p));
            if critical || transient || lower.contains("error") || lower.contains("failed") {
                return Some(OutputSignal::PushFailure {
                    url: url.or_else(|| self.sole_push_url()),
                    critical,
                    message: line.to_string(),
                });
            }
        }

        if lower.contains("error") || lower.contains("failed") || lower.contains("refused") {
            return Some(OutputSignal::Error {
                message: line.to_string(),
            });
        }

        if line.starts_with("progress=") || line.starts_with("out_time") {
            return Some(OutputSignal::Progress { bitrate_kbps: None });
        }
        if lower.contains("bitrate=") {
            let bitrate_kbps = BITRATE_RE
                .as_ref()
                .and_then(|re| re.captures(line))
                .and_then(|caps| caps[1].parse::<f64>().ok());
            return Some(OutputSignal::Progress { bitrate_kbps });
        }

        None
    }

    fn push_url_in(&self, line: &str) -> Option<String> {
        self.push_urls
            .iter()
            .find(|url| line.contains(url.as_str()))
            .cloned()
    }

    fn sole_push_url(&self) -> Option<String> {
        match self.push_urls.as_slice() {
            [only] => Some(only.clone()),
            _ => None,
        }
    }

    /// Lines emitted by push muxers and protocols.
    fn looks_like_push(&self, lower: &str) -> bool {
        if self.push_urls.is_empty() {
            return false;
        }
        lower.contains("[rtmp")
            || lower.contains("[flv")
            || lower.contains("[tee")
            || lower.contains("[srt")
            || lower.contains("slave")
            || CRITICAL_PATTERNS.iter().any(|p| lower.contains(p))
    }
}
