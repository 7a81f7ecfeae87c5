//! Row filtering with compiled predicates

use super::Predicate;
use crate::schema::{Record, RecordLayout, Value};
use crate::{Error, Result};
use regex::Regex;

/// A predicate resolved against a record layout: column names become key
/// positions and regular expressions are compiled once.
#[derive(Debug, Clone)]
pub struct RowFilter {
    root: Node,
}

#[derive(Debug, Clone)]
enum Node {
    True,
    False,
    Eq(usize, Value),
    Between(usize, Value, Value),
    Regexp(usize, Regex),
    Not(Box<Node>),
    And(Vec<Node>),
    Or(Vec<Node>),
}

impl RowFilter {
    /// Compile `predicate` for rows of `layout`. Only key columns may be
    /// referenced.
    pub fn compile(predicate: &Predicate, layout: &RecordLayout) -> Result<Self> {
        let root = compile_node(&predicate.simplify(), layout)?;
        Ok(Self { root })
    }

    pub fn is_always_true(&self) -> bool {
        matches!(self.root, Node::True)
    }

    pub fn matches(&self, record: &Record) -> bool {
        self.root.matches(record)
    }
}

fn compile_node(predicate: &Predicate, layout: &RecordLayout) -> Result<Node> {
    let position = |key: &str| {
        layout.key_position(key).ok_or_else(|| {
            Error::Config(format!(
                "predicate references '{}', which is not a key column of {:?}",
                key, layout.keys
            ))
        })
    };

    Ok(match predicate {
        Predicate::True => Node::True,
        Predicate::False => Node::False,
        Predicate::Eq(key, value) => Node::Eq(position(key)?, value.clone()),
        Predicate::Between(key, from, to) => {
            Node::Between(position(key)?, from.clone(), to.clone())
        }
        Predicate::Regexp(key, pattern) => {
            let anchored = Regex::new(&format!("^(?:{})$", pattern))?;
            Node::Regexp(position(key)?, anchored)
        }
        Predicate::Not(inner) => Node::Not(Box::new(compile_node(inner, layout)?)),
        Predicate::And(ps) => Node::And(
            ps.iter()
                .map(|p| compile_node(p, layout))
                .collect::<Result<_>>()?,
        ),
        Predicate::Or(ps) => Node::Or(
            ps.iter()
                .map(|p| compile_node(p, layout))
                .collect::<Result<_>>()?,
        ),
    })
}

impl Node {
    fn matches(&self, record: &Record) -> bool {
        match self {
            Node::True => true,
            Node::False => false,
            Node::Eq(i, value) => record.keys[*i] == *value,
            Node::Between(i, from, to) => {
                let v = &record.keys[*i];
                from <= v && v <= to
            }
            Node::Regexp(i, regex) => match &record.keys[*i] {
                Value::Str(s) => regex.is_match(s),
                Value::Null => false,
                other => regex.is_match(&other.to_string()),
            },
            Node::Not(inner) => !inner.matches(record),
            Node::And(nodes) => nodes.iter().all(|n| n.matches(record)),
            Node::Or(nodes) => nodes.iter().any(|n| n.matches(record)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::*;
    use crate::record;

    fn layout() -> RecordLayout {
        RecordLayout::new(["day", "site"], ["clicks"])
    }

    #[test]
    fn test_filter_matches() {
        let filter = RowFilter::compile(
            &and([between("day", 1, 3), regexp("site", "shop-.*")]),
            &layout(),
        )
        .unwrap();
        assert!(filter.matches(&record!([2, "shop-1"], [1])));
        assert!(!filter.matches(&record!([4, "shop-1"], [1])));
        assert!(!filter.matches(&record!([2, "blog"], [1])));
    }

    #[test]
    fn test_regexp_is_full_match() {
        let filter = RowFilter::compile(&regexp("site", "shop"), &layout()).unwrap();
        assert!(filter.matches(&record!([1, "shop"], [1])));
        assert!(!filter.matches(&record!([1, "shop-1"], [1])));
    }

    #[test]
    fn test_not_and_or() {
        let filter =
            RowFilter::compile(&or([eq("day", 1), not(eq("site", "a"))]), &layout()).unwrap();
        assert!(filter.matches(&record!([1, "a"], [0])));
        assert!(filter.matches(&record!([2, "b"], [0])));
        assert!(!filter.matches(&record!([2, "a"], [0])));
    }

    #[test]
    fn test_unknown_column_rejected() {
        let err = RowFilter::compile(&eq("clicks", 1), &layout()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_invalid_regexp_rejected() {
        assert!(RowFilter::compile(&regexp("site", "("), &layout()).is_err());
    }

    #[test]
    fn test_always_true() {
        let filter = RowFilter::compile(&and([]), &layout()).unwrap();
        assert!(filter.is_always_true());
    }
}
