//! BM25 relevance scoring over per-segment statistics.

use serde::Serialize;

/// Default BM25 parameters.
pub const DEFAULT_K1: f32 = 1.2;
pub const DEFAULT_B: f32 = 0.75;

/// Computes BM25 scores using segment-local statistics.
#[derive(Clone, Debug)]
pub struct Bm25Scorer {
    pub k1: f32,
    pub b: f32,

    /// Documents in the segment.
    pub doc_count: u64,
    /// Average document length in tokens.
    pub avg_doc_len: f32,
}

impl Bm25Scorer {
    /// A scorer with default parameters and the given segment stats.
    pub fn new(doc_count: u64, avg_doc_len: f32) -> Self {
        Self {
            k1: DEFAULT_K1,
            b: DEFAULT_B,
            doc_count,
            avg_doc_len,
        }
    }

    pub fn with_params(mut self, k1: f32, b: f32) -> Self {
        self.k1 = k1;
        self.b = b;
        self
    }

    /// Inverse document frequency:
    ///
    /// `idf(qi) = ln(1 + (N - df + 0.5) / (df + 0.5))`
    pub fn idf(&self, doc_freq: u64) -> f32 {
        let n = self.doc_count as f64;
        let df = doc_freq as f64;
        (1.0 + (n - df + 0.5) / (df + 0.5)).ln() as f32
    }

    /// Score for a single term in a document:
    ///
    /// `idf * (tf * (k1 + 1)) / (tf + k1 * (1 - b + b * dl / avgdl))`
    ///
    /// Returns 0 when the term is absent or the denominator collapses.
    pub fn score(&self, term_freq: u32, doc_len: u32, idf: f32) -> f32 {
        if term_freq == 0 {
            return 0.0;
        }
        let tf = term_freq as f32;
        let dl = doc_len as f32;

        let norm = if self.avg_doc_len > 0.0 {
            1.0 - self.b + self.b * dl / self.avg_doc_len
        } else {
            1.0
        };
        let denominator = tf + self.k1 * norm;
        if denominator == 0.0 {
            return 0.0;
        }
        idf * tf * (self.k1 + 1.0) / denominator
    }

    /// Total boost-weighted score across multiple query terms.
    pub fn score_terms(&self, terms: &[QueryTerm], doc_len: u32) -> f32 {
        terms
            .iter()
            .filter(|qt| qt.term_freq > 0)
            .map(|qt| qt.boost * self.score(qt.term_freq, doc_len, self.idf(qt.doc_freq)))
            .sum()
    }

    /// A human-readable breakdown of the score for a single term.
    pub fn explain(
        &self,
        field: &str,
        term: &str,
        term_freq: u32,
        doc_len: u32,
        doc_freq: u64,
    ) -> Explanation {
        let idf = self.idf(doc_freq);
        let score = self.score(term_freq, doc_len, idf);

        let tf = term_freq as f32;
        let dl = doc_len as f32;
        let norm = 1.0 - self.b + self.b * dl / self.avg_doc_len;
        let tf_norm = tf * (self.k1 + 1.0) / (tf + self.k1 * norm);

        Explanation {
            description: format!("weight({field}:{term}) [BM25]"),
            value: score,
            details: vec![
                Explanation {
                    description: format!("idf(doc_freq={doc_freq}, N={})", self.doc_count),
                    value: idf,
                    details: Vec::new(),
                },
                Explanation {
                    description: format!("tf(freq={term_freq}, norm={tf_norm:.4})"),
                    value: tf_norm,
                    details: Vec::new(),
                },
                Explanation {
                    description: format!("dl={doc_len}, avgdl={:.1}", self.avg_doc_len),
                    value: self.b * dl / self.avg_doc_len,
                    details: Vec::new(),
                },
            ],
        }
    }
}

/// Per-term scoring inputs.
#[derive(Clone, Debug)]
pub struct QueryTerm {
    pub term: String,
    pub term_freq: u32,
    pub doc_freq: u64,
    pub boost: f32,
}

/// A score breakdown node.
#[derive(Clone, Debug, Serialize)]
pub struct Explanation {
    pub description: String,
    pub value: f32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<Explanation>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scorer() -> Bm25Scorer {
        Bm25Scorer::new(1000, 100.0)
    }

    #[test]
    fn test_zero_tf_scores_zero() {
        let s = scorer();
        let idf = s.idf(10);
        assert_eq!(s.score(0, 100, idf), 0.0);
    }

    #[test]
    fn test_higher_tf_scores_higher() {
        let s = scorer();
        let idf = s.idf(10);
        let low = s.score(1, 100, idf);
        let high = s.score(5, 100, idf);
        assert!(high > low);
        assert!(low > 0.0);
    }

    #[test]
    fn test_longer_doc_scores_lower() {
        let s = scorer();
        let idf = s.idf(10);
        let short = s.score(3, 50, idf);
        let long = s.score(3, 200, idf);
        assert!(short > long);
    }

    #[test]
    fn test_rarer_term_has_higher_idf() {
        let s = scorer();
        assert!(s.idf(1) > s.idf(100));
        assert!(s.idf(100) > s.idf(999));
    }

    #[test]
    fn test_idf_positive_even_for_ubiquitous_terms() {
        let s = scorer();
        assert!(s.idf(1000) > 0.0);
    }

    #[test]
    fn test_multi_term_sums_with_boost() {
        let s = scorer();
        let terms = vec![
            QueryTerm {
                term: "alpha".to_string(),
                term_freq: 2,
                doc_freq: 10,
                boost: 1.0,
            },
            QueryTerm {
                term: "beta".to_string(),
                term_freq: 1,
                doc_freq: 50,
                boost: 2.0,
            },
        ];
        let total = s.score_terms(&terms, 100);

        let expected = s.score(2, 100, s.idf(10)) + 2.0 * s.score(1, 100, s.idf(50));
        assert!((total - expected).abs() < 1e-6);
    }

    #[test]
    fn test_absent_terms_contribute_nothing() {
        let s = scorer();
        let terms = vec![QueryTerm {
            term: "ghost".to_string(),
            term_freq: 0,
            doc_freq: 10,
            boost: 1.0,
        }];
        assert_eq!(s.score_terms(&terms, 100), 0.0);
    }

    #[test]
    fn test_explain_structure() {
        let s = scorer();
        let explanation = s.explain("body", "rust", 3, 120, 25);
        assert_eq!(explanation.description, "weight(body:rust) [BM25]");
        assert_eq!(explanation.details.len(), 3);
        assert!(explanation.value > 0.0);
        assert!(explanation.details[0].description.starts_with("idf("));
        assert!(explanation.details[1].description.starts_with("tf("));
        assert!(explanation.details[2].description.starts_with("dl="));
    }
}
