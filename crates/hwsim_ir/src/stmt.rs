//! Behavioral statements for function and process bodies.

use crate::expr::{AugOp, Expr};
use serde::{Deserialize, Serialize};

/// The kind of a verification statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssertionKind {
    /// Aborts the simulation when the condition is false.
    Assert,
    /// Treated like an assertion during simulation.
    Assume,
    /// Counts how often the condition held.
    Cover,
}

/// A pattern in a `match` arm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Pattern {
    /// Matches when the subject equals the value. `None` is the wildcard `_`.
    Value(Option<Expr>),
    /// Matches the inner pattern (or anything) and binds the subject to `name`.
    As {
        /// Inner pattern, `None` for a capture.
        pattern: Option<Box<Pattern>>,
        /// Local name bound on match.
        name: String,
    },
    /// Matches when any alternative matches.
    Or(Vec<Pattern>),
}

/// One arm of a `match` statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCase {
    /// The pattern.
    pub pattern: Pattern,
    /// Optional guard evaluated after the pattern binds.
    pub guard: Option<Expr>,
    /// Statements run when the arm matches.
    pub body: Vec<Stmt>,
}

/// A behavioral statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stmt {
    /// `t1 = t2 = value`.
    Assign {
        /// Assignment targets, all receiving the same value.
        targets: Vec<Expr>,
        /// The assigned value.
        value: Expr,
    },
    /// `target op= value`.
    AugAssign {
        /// The target.
        target: Expr,
        /// The operator.
        op: AugOp,
        /// The right-hand operand.
        value: Expr,
    },
    /// `return [value]`.
    Return(Option<Expr>),
    /// `if test: body else: orelse`.
    If {
        /// Condition.
        test: Expr,
        /// Taken branch.
        body: Vec<Stmt>,
        /// Else branch.
        orelse: Vec<Stmt>,
    },
    /// `for target in iter: body else: orelse`.
    For {
        /// Loop variable (a local or a tuple of locals).
        target: Expr,
        /// Iterated value.
        iter: Expr,
        /// Loop body.
        body: Vec<Stmt>,
        /// Runs when the loop ends without `break`.
        orelse: Vec<Stmt>,
    },
    /// `while test: body else: orelse`.
    While {
        /// Condition.
        test: Expr,
        /// Loop body.
        body: Vec<Stmt>,
        /// Runs when the loop ends without `break`.
        orelse: Vec<Stmt>,
    },
    /// `break`.
    Break,
    /// `continue`.
    Continue,
    /// `pass`.
    Pass,
    /// `assert` / `assume` / `cover`.
    Assertion {
        /// Which verification statement this is.
        kind: AssertionKind,
        /// The checked condition.
        test: Expr,
        /// Optional message.
        msg: Option<Expr>,
    },
    /// `match subject: cases`.
    Match {
        /// The matched value.
        subject: Expr,
        /// Arms, tried in order.
        cases: Vec<MatchCase>,
    },
    /// An expression evaluated for effect.
    Expr(Expr),
}

impl Stmt {
    /// `target = value`.
    pub fn assign(target: Expr, value: Expr) -> Self {
        Stmt::Assign {
            targets: vec![target],
            value,
        }
    }

    /// `target op= value`.
    pub fn aug_assign(target: Expr, op: AugOp, value: Expr) -> Self {
        Stmt::AugAssign { target, op, value }
    }

    /// `if test: body else: orelse`.
    pub fn if_else(test: Expr, body: Vec<Stmt>, orelse: Vec<Stmt>) -> Self {
        Stmt::If { test, body, orelse }
    }

    /// `if test: body`.
    pub fn if_then(test: Expr, body: Vec<Stmt>) -> Self {
        Stmt::if_else(test, body, Vec::new())
    }

    /// `for target in iter: body`.
    pub fn for_each(target: Expr, iter: Expr, body: Vec<Stmt>) -> Self {
        Stmt::For {
            target,
            iter,
            body,
            orelse: Vec::new(),
        }
    }

    /// `while test: body`.
    pub fn while_loop(test: Expr, body: Vec<Stmt>) -> Self {
        Stmt::While {
            test,
            body,
            orelse: Vec::new(),
        }
    }

    /// `assert test`.
    pub fn assert(test: Expr) -> Self {
        Stmt::Assertion {
            kind: AssertionKind::Assert,
            test,
            msg: None,
        }
    }

    /// `cover test`.
    pub fn cover(test: Expr) -> Self {
        Stmt::Assertion {
            kind: AssertionKind::Cover,
            test,
            msg: None,
        }
    }

    /// An expression statement.
    pub fn expr(expr: Expr) -> Self {
        Stmt::Expr(expr)
    }

    /// Calls `f` on this statement's direct child statement lists.
    pub fn for_each_block(&self, mut f: impl FnMut(&[Stmt])) {
        match self {
            Stmt::If { body, orelse, .. }
            | Stmt::For { body, orelse, .. }
            | Stmt::While { body, orelse, .. } => {
                f(body);
                f(orelse);
            }
            Stmt::Match { cases, .. } => {
                for case in cases {
                    f(&case.body);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assign_has_single_target() {
        match Stmt::assign(Expr::field(0), Expr::int(1)) {
            Stmt::Assign { targets, .. } => assert_eq!(targets.len(), 1),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn child_blocks_visited() {
        let s = Stmt::if_else(
            Expr::bool(true),
            vec![Stmt::Pass],
            vec![Stmt::Break, Stmt::Continue],
        );
        let mut sizes = Vec::new();
        s.for_each_block(|b| sizes.push(b.len()));
        assert_eq!(sizes, vec![1, 2]);
    }

    #[test]
    fn match_blocks_visited() {
        let s = Stmt::Match {
            subject: Expr::field(0),
            cases: vec![
                MatchCase {
                    pattern: Pattern::Value(Some(Expr::int(0))),
                    guard: None,
                    body: vec![Stmt::Pass],
                },
                MatchCase {
                    pattern: Pattern::Value(None),
                    guard: None,
                    body: vec![],
                },
            ],
        };
        let mut n = 0;
        s.for_each_block(|_| n += 1);
        assert_eq!(n, 2);
    }

    #[test]
    fn leaf_has_no_blocks() {
        let mut n = 0;
        Stmt::Pass.for_each_block(|_| n += 1);
        assert_eq!(n, 0);
    }
}
