//! Three-valued evaluation result
//!
//! Conditions over sensors that may be missing or stale cannot be forced
//! into plain booleans. `EvalResult` adds `Indeterminate` and combines
//! with Kleene semantics: an unknown operand changes the outcome only
//! where it would have been decisive.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitAnd, BitOr, Not};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvalResult {
    True,
    False,
    Indeterminate,
}

impl EvalResult {
    /// Kleene AND: `False` dominates
    pub fn and(self, other: EvalResult) -> EvalResult {
        match (self, other) {
            (EvalResult::False, _) | (_, EvalResult::False) => EvalResult::False,
            (EvalResult::True, EvalResult::True) => EvalResult::True,
            _ => EvalResult::Indeterminate,
        }
    }

    /// Kleene OR: `True` dominates
    pub fn or(self, other: EvalResult) -> EvalResult {
        match (self, other) {
            (EvalResult::True, _) | (_, EvalResult::True) => EvalResult::True,
            (EvalResult::False, EvalResult::False) => EvalResult::False,
            _ => EvalResult::Indeterminate,
        }
    }

    /// Kleene NOT: `Indeterminate` is its own negation
    pub fn negate(self) -> EvalResult {
        match self {
            EvalResult::True => EvalResult::False,
            EvalResult::False => EvalResult::True,
            EvalResult::Indeterminate => EvalResult::Indeterminate,
        }
    }

    /// Fold with AND; an empty sequence is `True`
    pub fn all<I: IntoIterator<Item = EvalResult>>(results: I) -> EvalResult {
        let mut acc = EvalResult::True;
        for r in results {
            acc = acc.and(r);
            if acc == EvalResult::False {
                break;
            }
        }
        acc
    }

    /// Fold with OR; an empty sequence is `False`
    pub fn any<I: IntoIterator<Item = EvalResult>>(results: I) -> EvalResult {
        let mut acc = EvalResult::False;
        for r in results {
            acc = acc.or(r);
            if acc == EvalResult::True {
                break;
            }
        }
        acc
    }

    pub fn is_true(self) -> bool {
        self == EvalResult::True
    }

    pub fn is_indeterminate(self) -> bool {
        self == EvalResult::Indeterminate
    }
}

impl From<bool> for EvalResult {
    fn from(b: bool) -> Self {
        if b {
            EvalResult::True
        } else {
            EvalResult::False
        }
    }
}

impl BitAnd for EvalResult {
    type Output = EvalResult;

    fn bitand(self, rhs: EvalResult) -> EvalResult {
        self.and(rhs)
    }
}

impl BitOr for EvalResult {
    type Output = EvalResult;

    fn bitor(self, rhs: EvalResult) -> EvalResult {
        self.or(rhs)
    }
}

impl Not for EvalResult {
    type Output = EvalResult;

    fn not(self) -> EvalResult {
        self.negate()
    }
}

impl fmt::Display for EvalResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EvalResult::True => "true",
            EvalResult::False => "false",
            EvalResult::Indeterminate => "indeterminate",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::EvalResult::{False, Indeterminate, True};
    use super::*;

    const ALL: [EvalResult; 3] = [True, False, Indeterminate];

    #[test]
    fn test_and_table() {
        assert_eq!(Indeterminate & True, Indeterminate);
        assert_eq!(Indeterminate & False, False);
        assert_eq!(True & True, True);
        assert_eq!(Indeterminate & Indeterminate, Indeterminate);
        for x in ALL {
            assert_eq!(False & x, False);
        }
    }

    #[test]
    fn test_or_table() {
        assert_eq!(Indeterminate | True, True);
        assert_eq!(Indeterminate | False, Indeterminate);
        assert_eq!(False | False, False);
        for x in ALL {
            assert_eq!(True | x, True);
        }
    }

    #[test]
    fn test_commutative() {
        for a in ALL {
            for b in ALL {
                assert_eq!(a & b, b & a, "AND {:?} {:?}", a, b);
                assert_eq!(a | b, b | a, "OR {:?} {:?}", a, b);
            }
        }
    }

    #[test]
    fn test_double_negation() {
        for x in ALL {
            assert_eq!(!!x, x);
        }
        assert_eq!(!Indeterminate, Indeterminate);
        assert_eq!(!True, False);
    }

    #[test]
    fn test_folds() {
        assert_eq!(EvalResult::all([]), True);
        assert_eq!(EvalResult::any([]), False);
        assert_eq!(EvalResult::all([True, Indeterminate]), Indeterminate);
        assert_eq!(EvalResult::all([Indeterminate, False]), False);
        assert_eq!(EvalResult::any([False, Indeterminate]), Indeterminate);
        assert_eq!(EvalResult::any([Indeterminate, True]), True);
    }

    #[test]
    fn test_from_bool() {
        assert_eq!(EvalResult::from(true), True);
        assert_eq!(EvalResult::from(false), False);
        assert!(True.is_true());
        assert!(Indeterminate.is_indeterminate());
    }
}
