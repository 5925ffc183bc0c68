use cockpit_core::IndexSegment;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SearchHit {
    pub score: f32,
    #[serde(flatten)]
    pub segment: IndexSegment,
}

/// Lowercase identifier tokens. `snake_case` and `camelCase` identifiers
/// also contribute their parts.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    for word in text.split(|ch: char| !(ch.is_alphanumeric() || ch == '_')) {
        let word = word.trim_matches('_');
        if word.is_empty() {
            continue;
        }
        let parts = split_identifier(word);
        let lower = word.to_lowercase();
        if parts.len() > 1 {
            for part in parts {
                if part.chars().count() >= 2 && part != lower {
                    tokens.push(part);
                }
            }
        }
        if lower.chars().count() >= 2 {
            tokens.push(lower);
        }
    }
    tokens
}

fn split_identifier(word: &str) -> Vec<String> {
    let mut parts = Vec::new();
    for chunk in word.split('_').filter(|chunk| !chunk.is_empty()) {
        let mut current = String::new();
        let mut prev_lower = false;
        for ch in chunk.chars() {
            if ch.is_uppercase() && prev_lower && !current.is_empty() {
                parts.push(current.to_lowercase());
                current.clear();
            }
            prev_lower = ch.is_lowercase() || ch.is_ascii_digit();
            current.push(ch);
        }
        if !current.is_empty() {
            parts.push(current.to_lowercase());
        }
    }
    parts
}

fn document_tokens(segment: &IndexSegment) -> Vec<String> {
    let mut tokens = tokenize(&segment.text);
    tokens.extend(tokenize(&segment.path));
    tokens
}

/// tf-idf over identifier tokens. Ties go to the lexically smaller path,
/// then the earlier line.
pub fn keyword_search(segments: &[IndexSegment], query: &str, k: usize) -> Vec<SearchHit> {
    let terms: HashSet<String> = tokenize(query).into_iter().collect();
    if terms.is_empty() || k == 0 || segments.is_empty() {
        return Vec::new();
    }

    let docs: Vec<HashMap<String, usize>> = segments
        .iter()
        .map(|segment| {
            let mut counts = HashMap::new();
            for token in document_tokens(segment) {
                if terms.contains(&token) {
                    *counts.entry(token).or_insert(0) += 1;
                }
            }
            counts
        })
        .collect();

    let total = segments.len() as f32;
    let idf: HashMap<&String, f32> = terms
        .iter()
        .map(|term| {
            let df = docs.iter().filter(|doc| doc.contains_key(term)).count() as f32;
            (term, ((total + 1.0) / (df + 1.0)).ln() + 1.0)
        })
        .collect();

    let mut hits: Vec<SearchHit> = segments
        .iter()
        .zip(docs.iter())
        .filter_map(|(segment, counts)| {
            let score: f32 = counts
                .iter()
                .map(|(term, count)| (1.0 + (*count as f32).ln()) * idf.get(term).copied().unwrap_or(0.0))
                .sum();
            (score > 0.0).then(|| SearchHit {
                score,
                segment: segment.clone(),
            })
        })
        .collect();
    rank(&mut hits);
    hits.truncate(k);
    hits
}

pub(crate) fn rank(hits: &mut [SearchHit]) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.segment.path.cmp(&b.segment.path))
            .then_with(|| a.segment.start_line.cmp(&b.segment.start_line))
    });
}
