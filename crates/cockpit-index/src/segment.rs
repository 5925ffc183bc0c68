use cockpit_core::SegmentKind;
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Rust,
    Python,
    JavaScript,
    TypeScript,
    Go,
    Java,
    Kotlin,
    C,
    Cpp,
    Shell,
    Markdown,
    ReStructuredText,
    Text,
}

impl Language {
    pub fn detect(path: &Path) -> Language {
        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "rs" => Language::Rust,
            "py" | "pyw" | "pyi" => Language::Python,
            "js" | "jsx" | "mjs" | "cjs" => Language::JavaScript,
            "ts" | "tsx" | "mts" | "cts" => Language::TypeScript,
            "go" => Language::Go,
            "java" => Language::Java,
            "kt" | "kts" => Language::Kotlin,
            "c" | "h" => Language::C,
            "cc" | "cpp" | "cxx" | "hpp" | "hh" | "hxx" => Language::Cpp,
            "sh" | "bash" | "zsh" => Language::Shell,
            "md" | "markdown" => Language::Markdown,
            "rst" => Language::ReStructuredText,
            _ => Language::Text,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Rust => "rust",
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
            Language::Go => "go",
            Language::Java => "java",
            Language::Kotlin => "kotlin",
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::Shell => "shell",
            Language::Markdown => "markdown",
            Language::ReStructuredText => "rst",
            Language::Text => "text",
        }
    }

    pub fn is_source(&self) -> bool {
        !matches!(
            self,
            Language::Markdown | Language::ReStructuredText | Language::Text
        )
    }

    pub fn is_markup(&self) -> bool {
        matches!(self, Language::Markdown | Language::ReStructuredText)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SegmentLimits {
    pub block_lines: usize,
    pub small_file_lines: usize,
}

impl Default for SegmentLimits {
    fn default() -> Self {
        Self {
            block_lines: 200,
            small_file_lines: 400,
        }
    }
}

/// One slice of a file before it is hashed and embedded. Lines are 1-based
/// and inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSegment {
    pub kind: SegmentKind,
    pub start_line: usize,
    pub end_line: usize,
    pub name: Option<String>,
    pub text: String,
}

pub fn segment_file(content: &str, language: Language, limits: SegmentLimits) -> Vec<RawSegment> {
    let lines: Vec<&str> = content.lines().collect();
    if lines.is_empty() {
        return Vec::new();
    }
    let mut segments = if language.is_source() {
        let declarations = source_segments(&lines, language);
        let mut segments = if declarations.is_empty() {
            blocks(&lines, limits.block_lines)
        } else {
            declarations
        };
        if lines.len() <= limits.small_file_lines {
            segments.push(slice(&lines, SegmentKind::File, 0, lines.len() - 1, None));
        }
        segments
    } else if language.is_markup() {
        let headings = heading_segments(&lines, language);
        if headings.is_empty() {
            blocks(&lines, limits.block_lines)
        } else {
            headings
        }
    } else {
        blocks(&lines, limits.block_lines)
    };
    segments.retain(|segment| !segment.text.trim().is_empty());
    segments
}

struct Declaration {
    kind: SegmentKind,
    line: usize,
    name: String,
}

struct Pattern {
    kind: SegmentKind,
    regex: Regex,
}

fn patterns(language: Language) -> &'static [Pattern] {
    static RUST: OnceLock<Vec<Pattern>> = OnceLock::new();
    static PYTHON: OnceLock<Vec<Pattern>> = OnceLock::new();
    static SCRIPT: OnceLock<Vec<Pattern>> = OnceLock::new();
    static GO: OnceLock<Vec<Pattern>> = OnceLock::new();
    static JVM: OnceLock<Vec<Pattern>> = OnceLock::new();
    static NATIVE: OnceLock<Vec<Pattern>> = OnceLock::new();
    static SHELL: OnceLock<Vec<Pattern>> = OnceLock::new();

    let (cell, specs): (&OnceLock<Vec<Pattern>>, &[(SegmentKind, &str)]) = match language {
        Language::Rust => (
            &RUST,
            &[
                (
                    SegmentKind::Function,
                    r#"^(?:pub(?:\([^)]*\))?\s+)?(?:const\s+)?(?:async\s+)?(?:unsafe\s+)?(?:extern\s+"[^"]*"\s+)?fn\s+([A-Za-z_]\w*)"#,
                ),
                (
                    SegmentKind::Class,
                    r"^(?:pub(?:\([^)]*\))?\s+)?(?:unsafe\s+)?(?:struct|enum|trait|union|mod)\s+([A-Za-z_]\w*)",
                ),
                (SegmentKind::Class, r"^(?:unsafe\s+)?impl\b(?:<[^>]*>)?\s*([A-Za-z_][\w:<>, ]*)"),
            ],
        ),
        Language::Python => (
            &PYTHON,
            &[
                (SegmentKind::Function, r"^(?:async\s+)?def\s+([A-Za-z_]\w*)"),
                (SegmentKind::Class, r"^class\s+([A-Za-z_]\w*)"),
            ],
        ),
        Language::JavaScript | Language::TypeScript => (
            &SCRIPT,
            &[
                (
                    SegmentKind::Function,
                    r"^(?:export\s+)?(?:default\s+)?(?:async\s+)?function\*?\s+([A-Za-z_$][\w$]*)",
                ),
                (
                    SegmentKind::Function,
                    r"^(?:export\s+)?(?:const|let|var)\s+([A-Za-z_$][\w$]*)\s*(?::[^=]+)?=\s*(?:async\s+)?(?:\([^)]*\)|[A-Za-z_$][\w$]*)\s*(?::[^=]+)?=>",
                ),
                (
                    SegmentKind::Class,
                    r"^(?:export\s+)?(?:default\s+)?(?:abstract\s+)?(?:class|interface|enum)\s+([A-Za-z_$][\w$]*)",
                ),
            ],
        ),
        Language::Go => (
            &GO,
            &[
                (SegmentKind::Function, r"^func\s+(?:\([^)]*\)\s*)?([A-Za-z_]\w*)"),
                (SegmentKind::Class, r"^type\s+([A-Za-z_]\w*)\s+(?:struct|interface)\b"),
            ],
        ),
        Language::Java | Language::Kotlin => (
            &JVM,
            &[
                (
                    SegmentKind::Class,
                    r"^(?:(?:public|private|protected|internal|abstract|final|static|sealed|open|data|inner)\s+)*(?:class|interface|enum|object|record)\s+([A-Za-z_]\w*)",
                ),
                (
                    SegmentKind::Function,
                    r"^(?:(?:public|private|protected|internal|inline|suspend|override|open)\s+)*fun\s+(?:<[^>]*>\s*)?(?:[A-Za-z_][\w.]*\.)?([A-Za-z_]\w*)",
                ),
            ],
        ),
        Language::C | Language::Cpp => (
            &NATIVE,
            &[
                (
                    SegmentKind::Class,
                    r"^(?:template\s*<[^>]*>\s*)?(?:class|struct|union)\s+([A-Za-z_]\w*)[^;]*$",
                ),
                (
                    SegmentKind::Function,
                    r"^(?:[A-Za-z_][\w:<>,]*[\s*&]+)+([A-Za-z_][\w:~]*)\s*\([^;]*$",
                ),
            ],
        ),
        Language::Shell => (
            &SHELL,
            &[
                (SegmentKind::Function, r"^function\s+([A-Za-z_][\w-]*)"),
                (SegmentKind::Function, r"^([A-Za-z_][\w-]*)\s*\(\)\s*\{?"),
            ],
        ),
        Language::Markdown | Language::ReStructuredText | Language::Text => return &[],
    };
    cell.get_or_init(|| {
        specs
            .iter()
            .filter_map(|(kind, source)| {
                Regex::new(source).ok().map(|regex| Pattern { kind: *kind, regex })
            })
            .collect()
    })
}

const NOT_FUNCTIONS: &[&str] = &["if", "for", "while", "switch", "return", "else", "do", "sizeof"];

fn find_declarations(lines: &[&str], language: Language) -> Vec<Declaration> {
    let patterns = patterns(language);
    let mut found = Vec::new();
    for (idx, line) in lines.iter().enumerate() {
        if line.starts_with(char::is_whitespace) || line.starts_with('#') && language != Language::Cpp && language != Language::C {
            continue;
        }
        for pattern in patterns {
            let Some(caps) = pattern.regex.captures(line) else {
                continue;
            };
            let name = caps
                .get(1)
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_default();
            if NOT_FUNCTIONS.contains(&name.as_str()) {
                continue;
            }
            found.push(Declaration {
                kind: pattern.kind,
                line: idx,
                name,
            });
            break;
        }
    }
    found
}

/// One segment per top-level declaration, running until the next one.
/// Leading attributes, decorators and doc comments stay with their item.
fn source_segments(lines: &[&str], language: Language) -> Vec<RawSegment> {
    let declarations = find_declarations(lines, language);
    let mut segments = Vec::new();
    let mut previous_end: Option<usize> = None;
    for (pos, declaration) in declarations.iter().enumerate() {
        let floor = previous_end.map(|end| end + 1).unwrap_or(0);
        let mut start = declaration.line;
        while start > floor && is_preamble(lines[start - 1], language) {
            start -= 1;
        }
        let next_start = declarations
            .get(pos + 1)
            .map(|next| next.line)
            .unwrap_or(lines.len());
        let mut end = next_start.saturating_sub(1).max(declaration.line);
        while end > declaration.line && (lines[end].trim().is_empty() || is_preamble(lines[end], language)) {
            end -= 1;
        }
        segments.push(slice(
            lines,
            declaration.kind,
            start,
            end,
            Some(declaration.name.clone()),
        ));
        previous_end = Some(end);
    }
    segments
}

fn is_preamble(line: &str, language: Language) -> bool {
    let trimmed = line.trim_start();
    if trimmed.is_empty() || line.starts_with(char::is_whitespace) {
        return false;
    }
    match language {
        Language::Rust => trimmed.starts_with("#[") || trimmed.starts_with("///") || trimmed.starts_with("//!"),
        Language::Python => trimmed.starts_with('@'),
        Language::Java | Language::Kotlin | Language::TypeScript | Language::JavaScript => {
            trimmed.starts_with('@') || trimmed.starts_with("/**") || trimmed.starts_with('*') || trimmed.starts_with("//")
        }
        Language::Go | Language::C | Language::Cpp => trimmed.starts_with("//"),
        Language::Shell => trimmed.starts_with('#') && !trimmed.starts_with("#!"),
        _ => false,
    }
}

fn heading_segments(lines: &[&str], language: Language) -> Vec<RawSegment> {
    let mut starts: Vec<(usize, String)> = Vec::new();
    let mut in_fence = false;
    for (idx, line) in lines.iter().enumerate() {
        match language {
            Language::Markdown => {
                let trimmed = line.trim_start();
                if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
                    in_fence = !in_fence;
                    continue;
                }
                if !in_fence {
                    if let Some(title) = markdown_heading(line) {
                        starts.push((idx, title));
                    }
                }
            }
            Language::ReStructuredText => {
                if let Some(next) = lines.get(idx + 1) {
                    if is_rst_underline(line, next) {
                        starts.push((idx, line.trim().to_string()));
                    }
                }
            }
            _ => {}
        }
    }

    let mut segments = Vec::new();
    if let Some((first, _)) = starts.first() {
        if *first > 0 {
            segments.push(slice(lines, SegmentKind::Block, 0, first - 1, None));
        }
    }
    for (pos, (start, title)) in starts.iter().enumerate() {
        let end = starts
            .get(pos + 1)
            .map(|(next, _)| next - 1)
            .unwrap_or(lines.len() - 1);
        segments.push(slice(lines, SegmentKind::Heading, *start, end, Some(title.clone())));
    }
    segments
}

fn markdown_heading(line: &str) -> Option<String> {
    let hashes = line.chars().take_while(|ch| *ch == '#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let rest = &line[hashes..];
    if !rest.is_empty() && !rest.starts_with(' ') && !rest.starts_with('\t') {
        return None;
    }
    Some(rest.trim().trim_end_matches('#').trim().to_string())
}

fn is_rst_underline(title: &str, underline: &str) -> bool {
    let title = title.trim_end();
    let underline = underline.trim_end();
    if title.trim().is_empty() || title.starts_with(char::is_whitespace) || underline.len() < 2 {
        return false;
    }
    let Some(marker) = underline.chars().next() else {
        return false;
    };
    "=-~^\"'`*+#:.".contains(marker)
        && underline.chars().all(|ch| ch == marker)
        && underline.chars().count() >= title.chars().count()
}

fn blocks(lines: &[&str], block_lines: usize) -> Vec<RawSegment> {
    let size = block_lines.max(1);
    (0..lines.len())
        .step_by(size)
        .map(|start| {
            let end = (start + size).min(lines.len()) - 1;
            slice(lines, SegmentKind::Block, start, end, None)
        })
        .collect()
}

fn slice(
    lines: &[&str],
    kind: SegmentKind,
    start: usize,
    end: usize,
    name: Option<String>,
) -> RawSegment {
    RawSegment {
        kind,
        start_line: start + 1,
        end_line: end + 1,
        name,
        text: lines[start..=end].join("\n"),
    }
}
