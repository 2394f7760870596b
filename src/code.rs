//! Hierarchical code handling: normalization, depth, family heuristics and
//! the natural sort key shared by the function pipeline.
//!
//! A code is a single letter (`F` or `Ф`, never unified) followed by
//! dot-separated numeric groups, e.g. `F1.2.10` or `Ф21.20.01`.

use std::cmp::Ordering;

/// Canonicalizes a raw code token: `F1-2_3` -> `F1.2.3`, `Ф 1 . 1 .` -> `Ф1.1`.
///
/// The first character is kept verbatim; the remainder loses interior spaces,
/// `_`/`-` become `.`, runs of dots collapse and edge dots are trimmed.
/// Empty input yields empty output; callers must check for emptiness.
pub fn normalize_code(raw: &str) -> String {
    let raw = raw.trim();
    let mut chars = raw.chars();
    let Some(head) = chars.next() else {
        return String::new();
    };

    let mut tail = String::with_capacity(raw.len());
    for ch in chars {
        match ch {
            ch if ch.is_whitespace() => {}
            '_' | '-' => tail.push('.'),
            other => tail.push(other),
        }
    }

    while tail.contains("..") {
        tail = tail.replace("..", ".");
    }
    let tail = tail.trim_matches('.');

    let mut code = String::with_capacity(head.len_utf8() + tail.len());
    code.push(head);
    code.push_str(tail);
    code
}

/// Dot-separated groups after the letter, empty groups dropped.
pub fn code_groups(code: &str) -> Vec<&str> {
    let mut chars = code.chars();
    let Some(head) = chars.next() else {
        return Vec::new();
    };
    let body = &code[head.len_utf8()..];
    if body.is_empty() {
        return Vec::new();
    }
    body.split('.').filter(|group| !group.is_empty()).collect()
}

/// Nesting depth: `F1` -> 1, `Ф21.20.01` -> 3, empty or bare letter -> 0.
pub fn depth(code: &str) -> usize {
    let mut chars = code.chars();
    let Some(head) = chars.next() else {
        return 0;
    };
    let body = &code[head.len_utf8()..];
    if body.is_empty() {
        return 0;
    }
    body.split('.').count()
}

/// Top-level-instance family: a single group, or a one-digit first group with
/// depth up to 4 (`Ф0`, `F3.1.2`, `Ф1.2.3.4`).
pub fn is_fi_code(code: &str) -> bool {
    let groups = code_groups(code);
    let Some(first) = groups.first() else {
        return false;
    };

    if groups.len() == 1 {
        return true;
    }
    first.chars().count() == 1 && groups.len() <= 4
}

/// Per-system family: the first group has at least two digits (`Ф21.20.01`).
pub fn is_fs_code(code: &str) -> bool {
    let groups = code_groups(code);
    match groups.first() {
        Some(first) => first.chars().count() >= 2,
        None => false,
    }
}

/// Case-insensitive single-letter comparison that keeps the Latin and
/// Cyrillic alphabets apart (`f` matches `F` but never `Ф`).
pub fn letter_matches(head: char, filter: char) -> bool {
    let fold = |ch: char| ch.to_uppercase().collect::<String>();
    fold(head) == fold(filter)
}

/// One dot-group of a [`CodeKey`]; numeric groups order before textual ones.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum CodeGroup {
    Num(u64),
    Text(String),
}

/// Natural sort key: `F1.2.10` -> `[1, 2, 10]`, so `F1.10` sorts after `F1.9`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeKey(Vec<CodeGroup>);

impl CodeKey {
    pub fn for_code(code: &str) -> Self {
        let groups = code_groups(code)
            .into_iter()
            .map(|group| match group.parse::<u64>() {
                Ok(value) => CodeGroup::Num(value),
                Err(_) => CodeGroup::Text(group.to_string()),
            })
            .collect();
        Self(groups)
    }
}

impl Ord for CodeKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl PartialOrd for CodeKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Parent candidate by code math: drop the last dot-group; single-group or
/// empty codes have no candidate.
pub fn parent_candidate(code: &str) -> Option<String> {
    let mut chars = code.chars();
    let head = chars.next()?;
    let body = &code[head.len_utf8()..];
    let (parent_body, _) = body.rsplit_once('.')?;

    let mut parent = String::with_capacity(head.len_utf8() + parent_body.len());
    parent.push(head);
    parent.push_str(parent_body);
    Some(parent)
}
