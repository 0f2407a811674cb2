//! Piece-level metadata.
//!
//! A MIDI file's text and copyright meta events travel next to its
//! timeline, never inside it, so they take no part in tokenization or in
//! [`Timeline::content_hash`](crate::Timeline::content_hash). Extractors
//! derive tags such as a composer or a musical form from those texts or
//! from the file name.

use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::debug;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Which meta event a text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetaTextKind {
    Text,
    Copyright,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaText {
    pub kind: MetaTextKind,
    pub text: String,
}

/// Key-value tags attached to a piece, e.g. `composer = "bach"`.
pub type Metadata = BTreeMap<String, String>;

/// What an extractor gets to look at.
#[derive(Debug, Clone, Copy, Default)]
pub struct PieceSource<'a> {
    /// Where the piece was read from, if it came from a file.
    pub path: Option<&'a Path>,
    pub meta: &'a [MetaText],
}

/// A metadata extractor, deserializable from pipeline configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "extractor", rename_all = "snake_case")]
pub enum MetadataExtractor {
    /// Tag `composer` when exactly one listed name appears in the file name.
    ComposerFilename { composer_names: Vec<String> },
    /// Tag `form` when exactly one listed form appears in the file name.
    FormFilename { form_names: Vec<String> },
    /// Tag `composer` when exactly one listed name appears in the text
    /// meta events.
    ComposerMetaText { composer_names: Vec<String> },
    /// Tag `abs_path` with the absolute path of the source file.
    AbsPath,
}

impl MetadataExtractor {
    pub fn run(&self, source: &PieceSource<'_>) -> Metadata {
        let found = match self {
            MetadataExtractor::ComposerFilename { composer_names } => file_stem(source)
                .and_then(|stem| unique_match([stem.as_str()], composer_names))
                .map(|name| ("composer", name)),
            MetadataExtractor::FormFilename { form_names } => file_stem(source)
                .and_then(|stem| unique_match([stem.as_str()], form_names))
                .map(|name| ("form", name)),
            MetadataExtractor::ComposerMetaText { composer_names } => {
                unique_match(source.meta.iter().map(|m| m.text.as_str()), composer_names)
                    .map(|name| ("composer", name))
            }
            MetadataExtractor::AbsPath => source
                .path
                .and_then(|path| std::path::absolute(path).ok())
                .map(|path| ("abs_path", path.display().to_string())),
        };

        found
            .map(|(key, value)| Metadata::from([(key.to_string(), value)]))
            .unwrap_or_default()
    }

    pub fn name(&self) -> &'static str {
        match self {
            MetadataExtractor::ComposerFilename { .. } => "composer_filename",
            MetadataExtractor::FormFilename { .. } => "form_filename",
            MetadataExtractor::ComposerMetaText { .. } => "composer_meta_text",
            MetadataExtractor::AbsPath => "abs_path",
        }
    }
}

/// Run every extractor in order; a later extractor overwrites keys set
/// by an earlier one.
pub fn extract_metadata(extractors: &[MetadataExtractor], source: &PieceSource<'_>) -> Metadata {
    let mut metadata = Metadata::new();
    for extractor in extractors {
        let found = extractor.run(source);
        debug!(
            extractor = extractor.name(),
            tags = found.len(),
            "ran metadata extractor"
        );
        metadata.extend(found);
    }
    metadata
}

/// Whether `word` occurs in `text` as a whole word, ignoring case and
/// accents. Words are delimited by whitespace, underscores, or the ends
/// of the text, so `"bach"` matches `"JS_Bach prelude"` but not
/// `"offenbach"`.
pub fn match_word(text: &str, word: &str) -> bool {
    let word = strip_accents(word);
    if word.is_empty() {
        return false;
    }

    let pattern = format!(r"(?:^|[\s_]){}(?:[\s_]|$)", regex::escape(&word));
    RegexBuilder::new(&pattern)
        .case_insensitive(true)
        .build()
        .map(|re| re.is_match(&strip_accents(text)))
        .unwrap_or(false)
}

fn strip_accents(s: &str) -> String {
    s.nfkd().filter(|c| !is_combining_mark(*c)).collect()
}

fn file_stem(source: &PieceSource<'_>) -> Option<String> {
    source
        .path
        .and_then(Path::file_stem)
        .map(|stem| stem.to_string_lossy().into_owned())
}

/// The single candidate found in any of `texts`; `None` when zero or
/// several distinct candidates match.
fn unique_match<'t>(
    texts: impl IntoIterator<Item = &'t str>,
    candidates: &[String],
) -> Option<String> {
    let texts: Vec<&str> = texts.into_iter().collect();
    let matched: BTreeSet<&String> = candidates
        .iter()
        .filter(|name| texts.iter().any(|text| match_word(text, name)))
        .collect();

    let mut matched = matched.into_iter();
    match (matched.next(), matched.next()) {
        (Some(name), None) => Some(name.clone()),
        _ => None,
    }
}
