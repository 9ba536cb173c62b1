//! Query AST: leaf queries, boolean composition, and structural limits.
//!
//! The AST is a sealed enum rather than an open trait so executors can
//! match exhaustively and rewrite rules can compare nodes structurally.

mod rewrite;

pub use rewrite::rewrite;

use crate::error::{Result, ScourError};

/// Maximum clauses in a single boolean query.
pub const MAX_BOOLEAN_CLAUSES: usize = 1024;

/// Maximum boolean nesting depth.
pub const MAX_BOOLEAN_DEPTH: usize = 10;

/// Maximum terms in a phrase query.
pub const MAX_PHRASE_TERMS: usize = 50;

/// Maximum terms in a proximity query.
pub const MAX_PROXIMITY_TERMS: usize = 10;

/// Maximum slop for a proximity query.
pub const MAX_PROXIMITY_SLOP: u32 = 100;

/// Maximum fuzzy edit distance.
pub const MAX_FUZZY_DISTANCE: u32 = 2;

/// Minimum term length for fuzzy matching.
pub const MIN_FUZZY_TERM_LEN: usize = 3;

/// Maximum terms a fuzzy leaf may expand to.
pub const MAX_FUZZY_EXPANSIONS: usize = 500;

/// Maximum terms any automaton leaf may expand to.
pub const MAX_TERMS_EXPANDED: usize = 1000;

/// Occurrence of a clause within a boolean query.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Occur {
    /// The clause must match (AND).
    Must,
    /// The clause should match (OR).
    Should,
    /// The clause must not match (NOT).
    MustNot,
}

/// A single clause within a boolean query.
#[derive(Clone, Debug, PartialEq)]
pub struct BooleanClause {
    pub occur: Occur,
    pub query: Query,
}

impl BooleanClause {
    pub fn new(occur: Occur, query: Query) -> Self {
        Self { occur, query }
    }
}

/// A query AST node.
#[derive(Clone, Debug, PartialEq)]
pub enum Query {
    /// Matches documents containing the exact term.
    Term {
        field: String,
        term: String,
        boost: f32,
    },
    /// Matches terms starting with the prefix.
    Prefix {
        field: String,
        prefix: String,
        boost: f32,
    },
    /// Matches terms against a `*`/`?` wildcard pattern.
    Wildcard {
        field: String,
        pattern: String,
        boost: f32,
    },
    /// Matches terms against a regular expression.
    Regex {
        field: String,
        pattern: String,
        boost: f32,
    },
    /// Matches documents where the terms appear in sequence.
    Phrase {
        field: String,
        terms: Vec<String>,
        slop: u32,
        boost: f32,
    },
    /// Matches documents where all terms appear within a window.
    Proximity {
        field: String,
        terms: Vec<String>,
        slop: u32,
        boost: f32,
    },
    /// Matches terms within an edit distance of the term.
    Fuzzy {
        field: String,
        term: String,
        max_distance: u32,
        boost: f32,
    },
    /// Matches every document.
    MatchAll,
    /// Matches no documents.
    MatchNone,
    /// Combines sub-queries with boolean logic.
    Boolean {
        clauses: Vec<BooleanClause>,
        minimum_should_match: usize,
    },
}

impl Query {
    pub fn term(field: impl Into<String>, term: impl Into<String>) -> Self {
        Query::Term {
            field: field.into(),
            term: term.into(),
            boost: 1.0,
        }
    }

    pub fn prefix(field: impl Into<String>, prefix: impl Into<String>) -> Self {
        Query::Prefix {
            field: field.into(),
            prefix: prefix.into(),
            boost: 1.0,
        }
    }

    pub fn wildcard(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        Query::Wildcard {
            field: field.into(),
            pattern: pattern.into(),
            boost: 1.0,
        }
    }

    pub fn regex(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        Query::Regex {
            field: field.into(),
            pattern: pattern.into(),
            boost: 1.0,
        }
    }

    pub fn phrase(field: impl Into<String>, terms: Vec<String>) -> Self {
        Query::Phrase {
            field: field.into(),
            terms,
            slop: 0,
            boost: 1.0,
        }
    }

    pub fn proximity(field: impl Into<String>, terms: Vec<String>, slop: u32) -> Self {
        Query::Proximity {
            field: field.into(),
            terms,
            slop,
            boost: 1.0,
        }
    }

    pub fn fuzzy(field: impl Into<String>, term: impl Into<String>, max_distance: u32) -> Self {
        Query::Fuzzy {
            field: field.into(),
            term: term.into(),
            max_distance,
            boost: 1.0,
        }
    }

    pub fn boolean(clauses: Vec<BooleanClause>) -> Self {
        Query::Boolean {
            clauses,
            minimum_should_match: 0,
        }
    }

    pub fn with_boost(mut self, value: f32) -> Self {
        match &mut self {
            Query::Term { boost, .. }
            | Query::Prefix { boost, .. }
            | Query::Wildcard { boost, .. }
            | Query::Regex { boost, .. }
            | Query::Phrase { boost, .. }
            | Query::Proximity { boost, .. }
            | Query::Fuzzy { boost, .. } => *boost = value,
            Query::MatchAll | Query::MatchNone | Query::Boolean { .. } => {}
        }
        self
    }

    /// Validate structural limits across the whole tree.
    pub fn validate(&self) -> Result<()> {
        self.validate_at_depth(0)
    }

    fn validate_at_depth(&self, depth: usize) -> Result<()> {
        if depth > MAX_BOOLEAN_DEPTH {
            return Err(ScourError::InvalidQuery(format!(
                "nesting depth exceeds {MAX_BOOLEAN_DEPTH}"
            )));
        }

        match self {
            Query::Term { field, term, .. } => {
                require_nonempty(field, "term query field")?;
                require_nonempty(term, "term query term")
            }
            Query::Prefix { field, .. } => require_nonempty(field, "prefix query field"),
            Query::Wildcard { field, pattern, .. } => {
                require_nonempty(field, "wildcard query field")?;
                if pattern.len() > crate::automaton::MAX_WILDCARD_PATTERN_LEN {
                    return Err(ScourError::WildcardPatternTooLong(
                        crate::automaton::MAX_WILDCARD_PATTERN_LEN,
                    ));
                }
                Ok(())
            }
            Query::Regex { field, pattern, .. } => {
                require_nonempty(field, "regex query field")?;
                regex::Regex::new(pattern)
                    .map_err(|e| ScourError::InvalidQuery(format!("regex: {e}")))?;
                Ok(())
            }
            Query::Phrase { field, terms, .. } => {
                require_nonempty(field, "phrase query field")?;
                if terms.is_empty() {
                    return Err(ScourError::InvalidQuery("phrase with no terms".to_string()));
                }
                if terms.len() > MAX_PHRASE_TERMS {
                    return Err(ScourError::InvalidQuery(format!(
                        "phrase has {} terms (max {MAX_PHRASE_TERMS})",
                        terms.len()
                    )));
                }
                Ok(())
            }
            Query::Proximity {
                field, terms, slop, ..
            } => {
                require_nonempty(field, "proximity query field")?;
                if terms.is_empty() {
                    return Err(ScourError::InvalidQuery(
                        "proximity with no terms".to_string(),
                    ));
                }
                if terms.len() > MAX_PROXIMITY_TERMS {
                    return Err(ScourError::InvalidQuery(format!(
                        "proximity has {} terms (max {MAX_PROXIMITY_TERMS})",
                        terms.len()
                    )));
                }
                if *slop > MAX_PROXIMITY_SLOP {
                    return Err(ScourError::InvalidQuery(format!(
                        "proximity slop {slop} exceeds {MAX_PROXIMITY_SLOP}"
                    )));
                }
                Ok(())
            }
            Query::Fuzzy {
                field,
                term,
                max_distance,
                ..
            } => {
                require_nonempty(field, "fuzzy query field")?;
                if *max_distance > MAX_FUZZY_DISTANCE {
                    return Err(ScourError::EditDistanceTooLarge(*max_distance));
                }
                if term.chars().count() < MIN_FUZZY_TERM_LEN {
                    return Err(ScourError::TermTooShort(MIN_FUZZY_TERM_LEN));
                }
                Ok(())
            }
            Query::MatchAll | Query::MatchNone => Ok(()),
            Query::Boolean { clauses, .. } => {
                if clauses.len() > MAX_BOOLEAN_CLAUSES {
                    return Err(ScourError::InvalidQuery(format!(
                        "boolean has {} clauses (max {MAX_BOOLEAN_CLAUSES})",
                        clauses.len()
                    )));
                }
                for clause in clauses {
                    clause.query.validate_at_depth(depth + 1)?;
                }
                Ok(())
            }
        }
    }
}

fn require_nonempty(value: &str, what: &str) -> Result<()> {
    if value.is_empty() {
        return Err(ScourError::InvalidQuery(format!("{what} is empty")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_queries() {
        Query::term("body", "rust").validate().unwrap();
        Query::prefix("body", "ru").validate().unwrap();
        Query::wildcard("body", "r*st").validate().unwrap();
        Query::fuzzy("body", "rust", 2).validate().unwrap();
        Query::phrase("body", vec!["hello".into(), "world".into()])
            .validate()
            .unwrap();
        Query::MatchAll.validate().unwrap();
    }

    #[test]
    fn test_fuzzy_term_too_short() {
        let err = Query::fuzzy("body", "ab", 1).validate().unwrap_err();
        assert!(matches!(err, ScourError::TermTooShort(3)));
    }

    #[test]
    fn test_fuzzy_distance_too_large() {
        let err = Query::fuzzy("body", "rust", 3).validate().unwrap_err();
        assert!(matches!(err, ScourError::EditDistanceTooLarge(3)));
    }

    #[test]
    fn test_phrase_too_long() {
        let terms = vec!["t".to_string(); MAX_PHRASE_TERMS + 1];
        assert!(Query::phrase("body", terms).validate().is_err());
    }

    #[test]
    fn test_proximity_slop_limit() {
        let q = Query::proximity("body", vec!["a".into(), "b".into()], 101);
        assert!(q.validate().is_err());
    }

    #[test]
    fn test_boolean_clause_limit() {
        let clauses = vec![BooleanClause::new(Occur::Must, Query::term("f", "t")); 1025];
        assert!(Query::boolean(clauses).validate().is_err());
    }

    #[test]
    fn test_depth_limit() {
        let mut q = Query::term("f", "t");
        for _ in 0..=MAX_BOOLEAN_DEPTH {
            q = Query::boolean(vec![BooleanClause::new(Occur::Must, q)]);
        }
        assert!(q.validate().is_err());
    }

    #[test]
    fn test_bad_regex_rejected() {
        assert!(Query::regex("f", "[unclosed").validate().is_err());
    }

    #[test]
    fn test_wildcard_pattern_too_long() {
        let q = Query::wildcard("f", "a".repeat(257));
        assert!(matches!(
            q.validate().unwrap_err(),
            ScourError::WildcardPatternTooLong(_)
        ));
    }
}
