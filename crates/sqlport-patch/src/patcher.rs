//! Source patcher
//!
//! Produces new file content with matched fragments replaced. File content,
//! fragment text and replacement text are all normalized to `\n` before
//! matching; fragment text captured by the analyzer and the file as re-read
//! from the working tree routinely disagree on line endings.
//!
//! Two strategies are supported:
//!
//! - [`PatchStrategy::Substring`]: replace the first occurrence of each
//!   fragment in the progressively patched content, in source order. If the
//!   same literal text appears at several locations, the earliest one is hit.
//! - [`PatchStrategy::Positional`]: replace at the byte offset implied by the
//!   fragment's `(line, column)`, after checking the text there matches.
//!
//! Edits are spliced into the original bytes, so lines outside the replaced
//! fragments keep their own line endings. When nothing changes the input is
//! returned byte-for-byte.

use crate::matcher::ResolvedRewrite;
use serde::{Deserialize, Serialize};
use sqlport_findings::Span;
use std::borrow::Cow;
use std::ops::Range;

/// Replacement strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchStrategy {
    /// First-occurrence substring replacement
    #[default]
    Substring,
    /// Location-addressed replacement
    Positional,
}

impl std::str::FromStr for PatchStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "substring" => Ok(Self::Substring),
            "positional" => Ok(Self::Positional),
            other => Err(format!(
                "unknown patch strategy '{other}' (expected substring|positional)"
            )),
        }
    }
}

/// Dominant line ending of a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEnding {
    /// `\n`
    Lf,
    /// `\r\n`
    CrLf,
}

impl LineEnding {
    /// Detect the dominant line ending (ties go to LF)
    #[must_use]
    pub fn detect(content: &str) -> Self {
        let crlf = content.matches("\r\n").count();
        let lf = content.matches('\n').count() - crlf;
        if crlf > lf {
            Self::CrLf
        } else {
            Self::Lf
        }
    }

    /// Re-apply this line ending to `\n`-normalized text
    #[must_use]
    pub fn apply(self, normalized: &str) -> String {
        match self {
            Self::Lf => normalized.to_string(),
            Self::CrLf => normalized.replace('\n', "\r\n"),
        }
    }
}

/// Collapse `\r\n` and lone `\r` to `\n`
#[must_use]
pub fn normalize_line_endings(text: &str) -> Cow<'_, str> {
    if text.contains('\r') {
        Cow::Owned(text.replace("\r\n", "\n").replace('\r', "\n"))
    } else {
        Cow::Borrowed(text)
    }
}

/// One `(original, converted)` pair for a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replacement {
    /// Fragment identifier, used for reporting
    pub fragment_id: String,
    /// Fragment location
    pub span: Span,
    /// Original fragment text
    pub original: String,
    /// Replacement text
    pub converted: String,
}

impl From<&ResolvedRewrite> for Replacement {
    fn from(rewrite: &ResolvedRewrite) -> Self {
        Self {
            fragment_id: rewrite.fragment.fragment_id.clone(),
            span: rewrite.fragment.span,
            original: rewrite.fragment.code.clone(),
            converted: rewrite.converted_code.clone(),
        }
    }
}

/// Result of patching one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchOutcome {
    /// New content (identical to the input when `changed` is false)
    pub content: String,
    /// Whether any replacement altered the content
    pub changed: bool,
    /// Fragment ids that were replaced
    pub applied: Vec<String>,
    /// Fragment ids whose original text could not be found
    pub missing: Vec<String>,
}

impl PatchOutcome {
    fn unchanged(content: &str, missing: Vec<String>) -> Self {
        Self {
            content: content.to_string(),
            changed: false,
            applied: Vec::new(),
            missing,
        }
    }
}

/// Applies replacements to file content
#[derive(Debug, Clone, Copy, Default)]
pub struct SourcePatcher {
    strategy: PatchStrategy,
}

impl SourcePatcher {
    /// Create patcher
    #[inline]
    #[must_use]
    pub fn new(strategy: PatchStrategy) -> Self {
        Self { strategy }
    }

    /// Configured strategy
    #[inline]
    #[must_use]
    pub fn strategy(&self) -> PatchStrategy {
        self.strategy
    }

    /// Apply replacements to `content`
    ///
    /// Identity pairs (original equals converted) are skipped. Bytes outside
    /// the replaced fragments are kept as they were, including each line's
    /// own ending in mixed-ending files. Line breaks inside replacement text
    /// take the ending of the line the fragment starts on.
    #[must_use]
    pub fn apply(&self, content: &str, replacements: &[Replacement]) -> PatchOutcome {
        let normalized = normalize_line_endings(content);
        let mut ordered: Vec<&Replacement> = replacements.iter().collect();
        ordered.sort_by_key(|r| r.span);

        let (edits, applied, missing) = match self.strategy {
            PatchStrategy::Substring => substring_edits(&normalized, &ordered),
            PatchStrategy::Positional => positional_edits(&normalized, &ordered),
        };

        for id in &missing {
            tracing::warn!(fragment = %id, "original fragment text not found in file");
        }

        let patched = splice(content, &edits);
        if patched == content {
            return PatchOutcome::unchanged(content, missing);
        }

        PatchOutcome {
            content: patched,
            changed: true,
            applied,
            missing,
        }
    }
}

/// Replacement of `start..end` in `\n`-normalized content
#[derive(Debug)]
struct Edit {
    start: usize,
    end: usize,
    text: String,
}

fn normalized_pair(r: &Replacement) -> Option<(String, String)> {
    let original = normalize_line_endings(&r.original).into_owned();
    let converted = normalize_line_endings(&r.converted).into_owned();
    (original != converted && !original.is_empty()).then_some((original, converted))
}

/// A rewritten region: `orig` in the unpatched text, `work` in the patched text
#[derive(Debug, Clone)]
struct Tracked {
    orig: Range<usize>,
    work: Range<usize>,
}

/// Patched text plus the regions that differ from the unpatched text
#[derive(Debug)]
struct Working {
    text: String,
    regions: Vec<Tracked>,
}

impl Working {
    fn new(content: &str) -> Self {
        Self {
            text: content.to_string(),
            regions: Vec::new(),
        }
    }

    /// Unpatched offset of a patched offset lying outside every region
    fn to_orig(&self, pos: usize) -> usize {
        self.regions
            .iter()
            .take_while(|r| r.work.end <= pos)
            .fold(pos, |at, r| at + r.orig.len() - r.work.len())
    }

    fn replace(&mut self, start: usize, end: usize, converted: &str) {
        let overlapping: Vec<usize> = (0..self.regions.len())
            .filter(|&i| {
                let w = &self.regions[i].work;
                start < w.end && w.start < end
            })
            .collect();

        let mut orig = self.to_orig(start)..self.to_orig(end);
        let mut work = start..end;
        for &i in &overlapping {
            let region = &self.regions[i];
            if region.work.contains(&start) {
                orig.start = region.orig.start;
            }
            if region.work.start < end && end <= region.work.end {
                orig.end = region.orig.end;
            }
            orig.start = orig.start.min(region.orig.start);
            orig.end = orig.end.max(region.orig.end);
            work.start = work.start.min(region.work.start);
            work.end = work.end.max(region.work.end);
        }

        let grown = converted.len();
        let shrunk = end - start;
        let old_end = work.end;
        let merged = Tracked {
            orig,
            work: work.start..old_end + grown - shrunk,
        };
        for i in overlapping.into_iter().rev() {
            self.regions.remove(i);
        }
        for region in &mut self.regions {
            if region.work.start >= old_end {
                region.work = region.work.start + grown - shrunk..region.work.end + grown - shrunk;
            }
        }
        let at = self.regions.partition_point(|r| r.work.start < merged.work.start);
        self.regions.insert(at, merged);
        self.text.replace_range(start..end, converted);
    }

    fn into_edits(self) -> Vec<Edit> {
        self.regions
            .into_iter()
            .map(|r| Edit {
                start: r.orig.start,
                end: r.orig.end,
                text: self.text[r.work].to_string(),
            })
            .collect()
    }
}

/// First occurrence of each fragment in the progressively patched content
fn substring_edits(content: &str, ordered: &[&Replacement]) -> (Vec<Edit>, Vec<String>, Vec<String>) {
    let mut working = Working::new(content);
    let mut applied = Vec::new();
    let mut missing = Vec::new();

    for r in ordered {
        let Some((original, converted)) = normalized_pair(r) else {
            continue;
        };
        match working.text.find(&original) {
            Some(start) => {
                working.replace(start, start + original.len(), &converted);
                applied.push(r.fragment_id.clone());
            }
            None => missing.push(r.fragment_id.clone()),
        }
    }
    (working.into_edits(), applied, missing)
}

fn positional_edits(content: &str, ordered: &[&Replacement]) -> (Vec<Edit>, Vec<String>, Vec<String>) {
    let mut edits = Vec::new();
    let mut applied = Vec::new();
    let mut missing = Vec::new();
    // Walk back to front; a fragment may not reach into a later one.
    let mut floor = usize::MAX;

    for r in ordered.iter().rev() {
        let Some((original, converted)) = normalized_pair(r) else {
            continue;
        };
        let located = byte_offset(content, r.span.start_line, r.span.start_column)
            .filter(|&start| content[start..].starts_with(&original))
            .filter(|&start| start + original.len() <= floor);
        match located {
            Some(start) => {
                edits.push(Edit {
                    start,
                    end: start + original.len(),
                    text: converted,
                });
                floor = start;
                applied.push(r.fragment_id.clone());
            }
            None => missing.push(r.fragment_id.clone()),
        }
    }
    edits.reverse();
    applied.reverse();
    missing.reverse();
    (edits, applied, missing)
}

/// Apply sorted, disjoint `edits` (normalized offsets) to the raw `content`
fn splice(content: &str, edits: &[Edit]) -> String {
    // normalized offsets of every `\r\n` collapsed to `\n`
    let mut crlf = Vec::new();
    let bytes = content.as_bytes();
    let (mut raw, mut norm) = (0, 0);
    while raw < bytes.len() {
        if bytes[raw] == b'\r' && bytes.get(raw + 1) == Some(&b'\n') {
            crlf.push(norm);
            raw += 2;
        } else {
            raw += 1;
        }
        norm += 1;
    }
    let to_raw = |n: usize| n + crlf.partition_point(|&p| p < n);
    let dominant = LineEnding::detect(content);

    let mut out = String::with_capacity(content.len());
    let mut cursor = 0;
    for edit in edits {
        let (start, end) = (to_raw(edit.start), to_raw(edit.end));
        out.push_str(&content[cursor..start]);
        let ending = match content[start..].find(['\r', '\n']) {
            Some(i) if content[start + i..].starts_with("\r\n") => LineEnding::CrLf,
            Some(_) => LineEnding::Lf,
            None => dominant,
        };
        out.push_str(&ending.apply(&edit.text));
        cursor = end;
    }
    out.push_str(&content[cursor..]);
    out
}

/// Byte offset of 1-based `(line, column)` in `\n`-normalized content
fn byte_offset(content: &str, line: u32, column: u32) -> Option<usize> {
    let line_start = if line <= 1 {
        0
    } else {
        content
            .match_indices('\n')
            .nth(line as usize - 2)
            .map(|(i, _)| i + 1)?
    };
    let line_text = content[line_start..].split('\n').next().unwrap_or_default();
    let skip = column.saturating_sub(1) as usize;
    if skip == 0 {
        return Some(line_start);
    }
    line_text
        .char_indices()
        .nth(skip)
        .map(|(i, _)| line_start + i)
        .or_else(|| (line_text.chars().count() == skip).then_some(line_start + line_text.len()))
}
