use chrono::{Local, NaiveDateTime, TimeZone};
use cockpit_core::{ErrorCategory, ErrorLevel, ErrorRecord};
use regex::Regex;
use serde::Serialize;
use serde_json::json;
use std::sync::OnceLock;

fn compiled(cell: &'static OnceLock<Option<Regex>>, source: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| Regex::new(source).ok()).as_ref()
}

fn canonical_line() -> Option<&'static Regex> {
    static CELL: OnceLock<Option<Regex>> = OnceLock::new();
    compiled(
        &CELL,
        r"^(\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}(?:[,.]\d{1,6})?)\s+\[?([A-Za-z]+)\]?\s*[:\-]?\s*(.*)$",
    )
}

fn task_id_pattern() -> Option<&'static Regex> {
    static CELL: OnceLock<Option<Regex>> = OnceLock::new();
    compiled(&CELL, r"\btask_id=([A-Za-z0-9_.\-]+)")
}

fn path_pattern() -> Option<&'static Regex> {
    static CELL: OnceLock<Option<Regex>> = OnceLock::new();
    compiled(&CELL, r#"\bpath=("[^"]+"|\S+)"#)
}

fn category_pattern(category: ErrorCategory) -> Option<&'static Regex> {
    static RUNTIME: OnceLock<Option<Regex>> = OnceLock::new();
    static UI: OnceLock<Option<Regex>> = OnceLock::new();
    static IO: OnceLock<Option<Regex>> = OnceLock::new();
    static SECURITY: OnceLock<Option<Regex>> = OnceLock::new();
    match category {
        ErrorCategory::Runtime => compiled(
            &RUNTIME,
            r"(?i)\b(runtime|exception|traceback|panic(?:ked)?|crash(?:ed)?|assert(?:ion)?|timeout|timed out|overflow)\b",
        ),
        ErrorCategory::Ui => compiled(
            &UI,
            r"(?i)\b(ui|gui|widget|window|dialog|render(?:ing)?|layout|display|qt)\b",
        ),
        ErrorCategory::Io => compiled(
            &IO,
            r"(?i)(\bi/o\b|\bio\b|\bfile\b|\bdisk\b|\bread\b|\bwrite\b|no such file|oserror|ioerror|filenotfounderror|broken pipe|\beof\b)",
        ),
        ErrorCategory::Security => compiled(
            &SECURITY,
            r"(?i)\b(security|unauthori[sz]ed|forbidden|permission|denied|auth(?:entication)?|credentials?|token|protected|violation)\b",
        ),
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ClassifiedLine {
    pub line: String,
    pub categories: Vec<ErrorCategory>,
    pub primary: ErrorCategory,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<ErrorLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    /// Present for canonical ERROR and CRITICAL lines.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<ErrorRecord>,
}

/// Keyword classifier for log lines of the form
/// `YYYY-MM-DD HH:MM:SS[,fff] [LEVEL] message`.
#[derive(Debug, Clone, Default)]
pub struct ErrorClassifier {
    source: Option<String>,
}

impl ErrorClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `source` (usually the log file) on every ErrorRecord.
    pub fn with_source(source: impl Into<String>) -> Self {
        Self {
            source: Some(source.into()),
        }
    }

    /// Matching categories in declaration order; `Runtime` when none match.
    pub fn categories(&self, line: &str) -> Vec<ErrorCategory> {
        let matched: Vec<ErrorCategory> = ErrorCategory::ALL
            .into_iter()
            .filter(|category| {
                category_pattern(*category)
                    .map(|regex| regex.is_match(line))
                    .unwrap_or(false)
            })
            .collect();
        if matched.is_empty() {
            vec![ErrorCategory::Runtime]
        } else {
            matched
        }
    }

    pub fn classify(&self, line: &str) -> ClassifiedLine {
        let line = line.trim_end_matches(['\r', '\n']);
        let categories = self.categories(line);
        let primary = primary_category(&categories);
        let task_id = extract_task_id(line);

        let parsed = canonical_line().and_then(|regex| regex.captures(line));
        let level = parsed
            .as_ref()
            .and_then(|caps| caps.get(2))
            .and_then(|level| level.as_str().parse::<ErrorLevel>().ok());

        let record = match (&parsed, level) {
            (Some(caps), Some(level)) if level.is_failure() => {
                let message = caps.get(3).map(|m| m.as_str().trim()).unwrap_or_default();
                let mut record = ErrorRecord::new(level, primary, message);
                if let Some(ts) = caps.get(1).and_then(|ts| parse_timestamp(ts.as_str())) {
                    record.ts = ts;
                }
                record.task_id = task_id.clone();
                record.path = extract_path(line);
                record
                    .extra
                    .insert("categories".to_string(), json!(categories));
                if let Some(source) = &self.source {
                    record.extra.insert("source".to_string(), json!(source));
                }
                Some(record)
            }
            _ => None,
        };

        ClassifiedLine {
            line: line.to_string(),
            categories,
            primary,
            level,
            task_id,
            record,
        }
    }
}

/// First non-Runtime category, else Runtime.
pub fn primary_category(categories: &[ErrorCategory]) -> ErrorCategory {
    categories
        .iter()
        .copied()
        .find(|category| *category != ErrorCategory::Runtime)
        .unwrap_or(ErrorCategory::Runtime)
}

pub fn extract_task_id(line: &str) -> Option<String> {
    task_id_pattern()?
        .captures(line)?
        .get(1)
        .map(|id| id.as_str().trim_end_matches(['.', ',']).to_string())
}

fn extract_path(line: &str) -> Option<String> {
    path_pattern()?
        .captures(line)?
        .get(1)
        .map(|path| path.as_str().trim_matches('"').to_string())
}

/// Local wall-clock time as epoch seconds.
fn parse_timestamp(raw: &str) -> Option<f64> {
    let normalized = raw.replace(',', ".");
    let naive = NaiveDateTime::parse_from_str(&normalized, "%Y-%m-%d %H:%M:%S%.f").ok()?;
    let local = Local.from_local_datetime(&naive).earliest()?;
    Some(local.timestamp_millis() as f64 / 1000.0)
}
