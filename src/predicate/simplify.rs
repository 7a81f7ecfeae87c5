//! Predicate simplification

use super::Predicate;

impl Predicate {
    /// Normalize the expression.
    ///
    /// Children are simplified first, nested conjunctions and disjunctions are
    /// flattened, and sibling conjuncts are combined pairwise until no pair
    /// reduces further. The result is canonical: children of `And`/`Or` are
    /// sorted and deduplicated, so simplifying twice yields the same value.
    pub fn simplify(&self) -> Predicate {
        match self {
            Predicate::True
            | Predicate::False
            | Predicate::Eq(..)
            | Predicate::Regexp(..) => self.clone(),
            Predicate::Between(key, from, to) => {
                if from > to {
                    Predicate::False
                } else if from == to {
                    Predicate::Eq(key.clone(), from.clone())
                } else {
                    self.clone()
                }
            }
            Predicate::Not(inner) => match inner.simplify() {
                Predicate::Not(p) => *p,
                Predicate::True => Predicate::False,
                Predicate::False => Predicate::True,
                p => Predicate::Not(Box::new(p)),
            },
            Predicate::And(ps) => simplify_and(ps),
            Predicate::Or(ps) => simplify_or(ps),
        }
    }
}

fn simplify_and(children: &[Predicate]) -> Predicate {
    let mut flat = Vec::with_capacity(children.len());
    for child in children {
        match child.simplify() {
            Predicate::And(nested) => flat.extend(nested),
            p => flat.push(p),
        }
    }

    loop {
        let mut changed = false;
        let mut combined: Vec<Predicate> = Vec::with_capacity(flat.len());
        'next: for p in flat {
            for existing in combined.iter_mut() {
                if let Some(merged) = combine_and(existing, &p) {
                    *existing = merged;
                    changed = true;
                    continue 'next;
                }
            }
            combined.push(p);
        }
        flat = combined;
        if !changed {
            break;
        }
    }

    flat.sort();
    flat.dedup();
    match flat.len() {
        0 => Predicate::True,
        1 => flat.remove(0),
        _ => Predicate::And(flat),
    }
}

fn simplify_or(children: &[Predicate]) -> Predicate {
    let mut flat = Vec::with_capacity(children.len());
    for child in children {
        match child.simplify() {
            Predicate::Or(nested) => flat.extend(nested),
            Predicate::False => {}
            Predicate::True => return Predicate::True,
            p => flat.push(p),
        }
    }

    flat.sort();
    flat.dedup();
    match flat.len() {
        0 => Predicate::False,
        1 => flat.remove(0),
        _ => Predicate::Or(flat),
    }
}

/// Symmetric pairwise table for conjunction. Returns `None` when the pair
/// does not reduce.
fn combine_and(left: &Predicate, right: &Predicate) -> Option<Predicate> {
    combine_ordered(left, right).or_else(|| combine_ordered(right, left))
}

fn combine_ordered(left: &Predicate, right: &Predicate) -> Option<Predicate> {
    use Predicate::*;

    if left == right {
        return Some(left.clone());
    }
    match (left, right) {
        (False, _) => Some(False),
        (True, other) => Some(other.clone()),
        (Not(inner), other) if **inner == *other => Some(False),
        (Eq(k1, _), Eq(k2, _)) if k1 == k2 => Some(False),
        (Eq(k1, value), Between(k2, from, to)) if k1 == k2 => {
            if from <= value && value <= to {
                Some(left.clone())
            } else {
                Some(False)
            }
        }
        (Between(k1, from1, to1), Between(k2, from2, to2)) if k1 == k2 => {
            let from = from1.max(from2).clone();
            let to = to1.min(to2).clone();
            Some(Between(k1.clone(), from, to).simplify())
        }
        _ => None,
    }
}
