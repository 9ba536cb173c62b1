//! Text analysis: the `Analyzer` contract and the three built-in
//! analyzers.
//!
//! An analyzer turns field text into `(term, position, byte_offset)`
//! tokens. The rest of the engine treats analyzers as a pluggable
//! collaborator resolved by name through the registry.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Result, ScourError};
use crate::index::schema::{ANALYZER_KEYWORD, ANALYZER_STANDARD, ANALYZER_WHITESPACE};

/// A single token produced by analysis.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token {
    pub term: String,
    /// Ordinal position within the field (0-based).
    pub position: u32,
    /// Byte offset of the token start within the original text.
    pub offset: usize,
}

/// Turns field text into a token stream.
pub trait Analyzer: Send + Sync {
    fn analyze(&self, text: &str) -> Vec<Token>;
}

/// Splits on non-alphanumeric boundaries and lowercases each token.
#[derive(Debug, Default)]
pub struct StandardAnalyzer;

impl Analyzer for StandardAnalyzer {
    fn analyze(&self, text: &str) -> Vec<Token> {
        let mut tokens = Vec::new();
        let mut start: Option<usize> = None;

        for (idx, ch) in text.char_indices() {
            if ch.is_alphanumeric() {
                if start.is_none() {
                    start = Some(idx);
                }
            } else if let Some(begin) = start.take() {
                push_token(&mut tokens, &text[begin..idx], begin, true);
            }
        }
        if let Some(begin) = start {
            push_token(&mut tokens, &text[begin..], begin, true);
        }
        tokens
    }
}

/// Splits on Unicode whitespace, preserving case.
#[derive(Debug, Default)]
pub struct WhitespaceAnalyzer;

impl Analyzer for WhitespaceAnalyzer {
    fn analyze(&self, text: &str) -> Vec<Token> {
        let mut tokens = Vec::new();
        let mut start: Option<usize> = None;

        for (idx, ch) in text.char_indices() {
            if !ch.is_whitespace() {
                if start.is_none() {
                    start = Some(idx);
                }
            } else if let Some(begin) = start.take() {
                push_token(&mut tokens, &text[begin..idx], begin, false);
            }
        }
        if let Some(begin) = start {
            push_token(&mut tokens, &text[begin..], begin, false);
        }
        tokens
    }
}

/// Emits the entire input as a single verbatim token.
#[derive(Debug, Default)]
pub struct KeywordAnalyzer;

impl Analyzer for KeywordAnalyzer {
    fn analyze(&self, text: &str) -> Vec<Token> {
        if text.is_empty() {
            return Vec::new();
        }
        vec![Token {
            term: text.to_string(),
            position: 0,
            offset: 0,
        }]
    }
}

fn push_token(tokens: &mut Vec<Token>, slice: &str, offset: usize, lowercase: bool) {
    let term = if lowercase {
        slice.to_lowercase()
    } else {
        slice.to_string()
    };
    let position = tokens.len() as u32;
    tokens.push(Token {
        term,
        position,
        offset,
    });
}

/// Resolves analyzers by name.
pub struct AnalyzerRegistry {
    analyzers: HashMap<String, Arc<dyn Analyzer>>,
}

impl std::fmt::Debug for AnalyzerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalyzerRegistry")
            .field("analyzers", &self.analyzers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl AnalyzerRegistry {
    /// A registry with the three built-in analyzers registered.
    pub fn new() -> Self {
        let mut analyzers: HashMap<String, Arc<dyn Analyzer>> = HashMap::new();
        analyzers.insert(ANALYZER_STANDARD.to_string(), Arc::new(StandardAnalyzer));
        analyzers.insert(
            ANALYZER_WHITESPACE.to_string(),
            Arc::new(WhitespaceAnalyzer),
        );
        analyzers.insert(ANALYZER_KEYWORD.to_string(), Arc::new(KeywordAnalyzer));
        Self { analyzers }
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Analyzer>> {
        self.analyzers
            .get(name)
            .cloned()
            .ok_or_else(|| ScourError::SchemaValidation(format!("unknown analyzer {name:?}")))
    }

    /// Register a custom analyzer under a name.
    pub fn register(&mut self, name: impl Into<String>, analyzer: Arc<dyn Analyzer>) {
        self.analyzers.insert(name.into(), analyzer);
    }
}

impl Default for AnalyzerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
