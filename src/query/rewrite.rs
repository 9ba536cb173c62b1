//! Query rewrite rules, applied to a fixed point.
//!
//! Rules: flatten nested booleans of the same non-negated occurrence, strip
//! `match_all` from MUST clauses, collapse to `match_none` when any MUST is
//! `match_none`, collapse to `match_all` when only MUST `match_all` clauses
//! remained, and unwrap a single remaining MUST clause. Flattening never
//! crosses a MUST_NOT boundary.

use super::{BooleanClause, Occur, Query};

/// Rewrite a query until no rule applies.
pub fn rewrite(query: Query) -> Query {
    let mut current = query;
    loop {
        let rewritten = rewrite_once(current.clone());
        if rewritten == current {
            return rewritten;
        }
        current = rewritten;
    }
}

fn rewrite_once(query: Query) -> Query {
    match query {
        Query::Boolean {
            clauses,
            minimum_should_match,
        } => rewrite_boolean(clauses, minimum_should_match),
        other => other,
    }
}

fn rewrite_boolean(clauses: Vec<BooleanClause>, minimum_should_match: usize) -> Query {
    // Rewrite children first, flattening same-occurrence booleans.
    let mut flattened = Vec::with_capacity(clauses.len());
    for clause in clauses {
        let rewritten = rewrite_once(clause.query);

        if let Query::Boolean {
            clauses: ref inner, ..
        } = rewritten
        {
            if can_flatten(clause.occur, inner) {
                for inner_clause in inner {
                    flattened.push(BooleanClause::new(clause.occur, inner_clause.query.clone()));
                }
                continue;
            }
        }

        flattened.push(BooleanClause::new(clause.occur, rewritten));
    }

    // Strip match_all from MUST clauses.
    let mut has_must = false;
    let mut filtered = Vec::with_capacity(flattened.len());
    for clause in flattened {
        if clause.occur == Occur::Must {
            has_must = true;
            if clause.query == Query::MatchAll {
                continue;
            }
        }
        filtered.push(clause);
    }

    // A MUST match_none poisons the whole boolean.
    if filtered
        .iter()
        .any(|c| c.occur == Occur::Must && c.query == Query::MatchNone)
    {
        return Query::MatchNone;
    }

    // Everything was MUST match_all: the boolean matches everything.
    if has_must && filtered.is_empty() {
        return Query::MatchAll;
    }

    // A single remaining MUST clause needs no boolean around it.
    if filtered.len() == 1 && filtered[0].occur == Occur::Must {
        return filtered.remove(0).query;
    }

    Query::Boolean {
        clauses: filtered,
        minimum_should_match,
    }
}

/// An inner boolean may be folded into its parent clause when every inner
/// clause shares the outer occurrence, and never through MUST_NOT.
fn can_flatten(outer: Occur, inner: &[BooleanClause]) -> bool {
    if outer == Occur::MustNot {
        return false;
    }
    inner.iter().all(|c| c.occur == outer)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn must(q: Query) -> BooleanClause {
        BooleanClause::new(Occur::Must, q)
    }

    fn should(q: Query) -> BooleanClause {
        BooleanClause::new(Occur::Should, q)
    }

    fn must_not(q: Query) -> BooleanClause {
        BooleanClause::new(Occur::MustNot, q)
    }

    #[test]
    fn test_leaf_unchanged() {
        let q = Query::term("f", "t");
        assert_eq!(rewrite(q.clone()), q);
    }

    #[test]
    fn test_flatten_nested_must() {
        let inner = Query::boolean(vec![must(Query::term("f", "a")), must(Query::term("f", "b"))]);
        let outer = Query::boolean(vec![must(inner), must(Query::term("f", "c"))]);

        let rewritten = rewrite(outer);
        match rewritten {
            Query::Boolean { clauses, .. } => {
                assert_eq!(clauses.len(), 3);
                assert!(clauses.iter().all(|c| c.occur == Occur::Must));
            }
            other => panic!("expected boolean, got {other:?}"),
        }
    }

    #[test]
    fn test_flatten_nested_should() {
        let inner = Query::boolean(vec![
            should(Query::term("f", "a")),
            should(Query::term("f", "b")),
        ]);
        let outer = Query::boolean(vec![should(inner), should(Query::term("f", "c"))]);

        match rewrite(outer) {
            Query::Boolean { clauses, .. } => {
                assert_eq!(clauses.len(), 3);
                assert!(clauses.iter().all(|c| c.occur == Occur::Should));
            }
            other => panic!("expected boolean, got {other:?}"),
        }
    }

    #[test]
    fn test_never_flatten_through_must_not() {
        let inner = Query::boolean(vec![
            must_not(Query::term("f", "a")),
            must_not(Query::term("f", "b")),
        ]);
        let outer = Query::boolean(vec![
            must_not(inner.clone()),
            must(Query::term("f", "c")),
        ]);

        match rewrite(outer) {
            Query::Boolean { clauses, .. } => {
                assert_eq!(clauses.len(), 2);
                let negated = clauses
                    .iter()
                    .find(|c| c.occur == Occur::MustNot)
                    .expect("negated clause kept");
                assert_eq!(negated.query, inner);
            }
            other => panic!("expected boolean, got {other:?}"),
        }
    }

    #[test]
    fn test_strip_match_all_from_must() {
        let q = Query::boolean(vec![
            must(Query::MatchAll),
            must(Query::term("f", "t")),
        ]);
        assert_eq!(rewrite(q), Query::term("f", "t"));
    }

    #[test]
    fn test_must_match_none_collapses() {
        let q = Query::boolean(vec![
            must(Query::term("f", "t")),
            must(Query::MatchNone),
            should(Query::term("f", "x")),
        ]);
        assert_eq!(rewrite(q), Query::MatchNone);
    }

    #[test]
    fn test_all_match_all_collapses_to_match_all() {
        let q = Query::boolean(vec![must(Query::MatchAll), must(Query::MatchAll)]);
        assert_eq!(rewrite(q), Query::MatchAll);
    }

    #[test]
    fn test_unwrap_single_must() {
        let q = Query::boolean(vec![must(Query::term("f", "t"))]);
        assert_eq!(rewrite(q), Query::term("f", "t"));
    }

    #[test]
    fn test_single_should_not_unwrapped() {
        let q = Query::boolean(vec![should(Query::term("f", "t"))]);
        match rewrite(q) {
            Query::Boolean { clauses, .. } => assert_eq!(clauses.len(), 1),
            other => panic!("expected boolean, got {other:?}"),
        }
    }

    #[test]
    fn test_deep_nesting_reaches_fixed_point() {
        let mut q = Query::term("f", "t");
        for _ in 0..5 {
            q = Query::boolean(vec![must(q)]);
        }
        assert_eq!(rewrite(q), Query::term("f", "t"));
    }
}
