//! Culture-aware text analysis.
//!
//! Feed items arrive tagged with a culture ("en-US", "de", ...). Tantivy
//! binds tokenizers to fields, not to documents, so per-document analysis is
//! expressed through pre-tokenization: the registry resolves an analyzer for
//! the operation's culture and runs it over the body text before the document
//! reaches the writer.

use std::collections::HashMap;
use std::sync::Mutex;
use tantivy::tokenizer::{
    Language, LowerCaser, PreTokenizedString, RemoveLongFilter, SimpleTokenizer, Stemmer,
    TextAnalyzer,
};

/// Tokens longer than this are noise (base64 blobs, URLs pasted into posts).
const MAX_TOKEN_LEN: usize = 40;

/// Resolves culture tags to stemming analyzers, with a default-language
/// fallback. Built analyzers are cached per primary language subtag.
pub struct AnalyzerRegistry {
    default_language: Language,
    cache: Mutex<HashMap<String, TextAnalyzer>>,
}

impl AnalyzerRegistry {
    /// Create a registry whose fallback is the given culture tag.
    /// Unrecognized tags fall back to English stemming.
    pub fn new(default_culture: &str) -> Self {
        Self {
            default_language: language_for(default_culture).unwrap_or(Language::English),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Analyzer for an operation's culture, or the default when absent or
    /// unrecognized.
    pub fn analyzer_for(&self, culture: Option<&str>) -> TextAnalyzer {
        let language = culture
            .and_then(language_for)
            .unwrap_or(self.default_language);
        let key = format!("{language:?}");

        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache
            .entry(key)
            .or_insert_with(|| build_analyzer(language))
            .clone()
    }

    /// Run `analyzer` over `text` and capture the token stream so the
    /// document carries its own analysis into the writer.
    pub fn pre_tokenize(analyzer: &mut TextAnalyzer, text: &str) -> PreTokenizedString {
        let mut tokens = Vec::new();
        let mut stream = analyzer.token_stream(text);
        stream.process(&mut |token| tokens.push(token.clone()));
        PreTokenizedString {
            text: text.to_string(),
            tokens,
        }
    }
}

fn build_analyzer(language: Language) -> TextAnalyzer {
    TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(RemoveLongFilter::limit(MAX_TOKEN_LEN))
        .filter(LowerCaser)
        .filter(Stemmer::new(language))
        .build()
}

/// Map a culture tag to a stemmer language by its primary subtag.
fn language_for(culture: &str) -> Option<Language> {
    let primary = culture
        .split(['-', '_'])
        .next()
        .unwrap_or(culture)
        .to_ascii_lowercase();

    let language = match primary.as_str() {
        "ar" => Language::Arabic,
        "da" => Language::Danish,
        "nl" => Language::Dutch,
        "en" => Language::English,
        "fi" => Language::Finnish,
        "fr" => Language::French,
        "de" => Language::German,
        "el" => Language::Greek,
        "hu" => Language::Hungarian,
        "it" => Language::Italian,
        "no" | "nb" | "nn" => Language::Norwegian,
        "pt" => Language::Portuguese,
        "ro" => Language::Romanian,
        "ru" => Language::Russian,
        "es" => Language::Spanish,
        "sv" => Language::Swedish,
        "ta" => Language::Tamil,
        "tr" => Language::Turkish,
        _ => return None,
    };
    Some(language)
}
