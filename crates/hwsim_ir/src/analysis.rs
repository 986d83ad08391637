//! Read/write analysis of function bodies.
//!
//! Used to derive comb-process sensitivity lists and to order comb processes
//! by data dependency before simulation starts.

use crate::expr::{Expr, FieldPath};
use crate::stmt::{Pattern, Stmt};

/// Field paths read and written by a body, in first-appearance order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessSet {
    /// Paths read.
    pub reads: Vec<FieldPath>,
    /// Paths written.
    pub writes: Vec<FieldPath>,
}

impl AccessSet {
    fn read(&mut self, path: FieldPath) {
        if !self.reads.contains(&path) {
            self.reads.push(path);
        }
    }

    fn write(&mut self, path: FieldPath) {
        if !self.writes.contains(&path) {
            self.writes.push(path);
        }
    }

    /// Paths read but never written.
    pub fn sensitivity(&self) -> Vec<FieldPath> {
        self.reads
            .iter()
            .filter(|p| !self.writes.contains(p))
            .cloned()
            .collect()
    }
}

/// Collects the field accesses of `body`.
pub fn analyze(body: &[Stmt]) -> AccessSet {
    let mut set = AccessSet::default();
    for stmt in body {
        visit_stmt(stmt, &mut set);
    }
    set
}

/// Sensitivity expressions for a comb body: fields read but not written.
pub fn derive_sensitivity(body: &[Stmt]) -> Vec<Expr> {
    analyze(body)
        .sensitivity()
        .iter()
        .map(|p| Expr::path(p))
        .collect()
}

/// Returns `true` if the body contains an `await` anywhere.
pub fn contains_await(body: &[Stmt]) -> bool {
    let mut found = false;
    for stmt in body {
        visit_exprs(stmt, &mut |e| found |= expr_has_await(e));
        stmt.for_each_block(|b| found |= contains_await(b));
    }
    found
}

fn expr_has_await(e: &Expr) -> bool {
    let mut found = matches!(e, Expr::Await { .. });
    for_each_sub_expr(e, &mut |c| found |= expr_has_await(c));
    found
}

fn visit_stmt(stmt: &Stmt, set: &mut AccessSet) {
    match stmt {
        Stmt::Assign { targets, value } => {
            visit_expr(value, set);
            for t in targets {
                visit_target(t, set);
            }
        }
        Stmt::AugAssign { target, value, .. } => {
            visit_expr(value, set);
            visit_expr(target, set);
            visit_target(target, set);
        }
        Stmt::For { target, iter, .. } => {
            visit_expr(iter, set);
            visit_target(target, set);
        }
        _ => visit_exprs(stmt, &mut |e| visit_expr(e, set)),
    }
    stmt.for_each_block(|b| {
        for s in b {
            visit_stmt(s, set);
        }
    });
}

/// Calls `f` on the expressions a statement holds directly.
fn visit_exprs(stmt: &Stmt, f: &mut impl FnMut(&Expr)) {
    match stmt {
        Stmt::Assign { targets, value } => {
            targets.iter().for_each(&mut *f);
            f(value);
        }
        Stmt::AugAssign { target, value, .. } => {
            f(target);
            f(value);
        }
        Stmt::Return(Some(e)) | Stmt::Expr(e) => f(e),
        Stmt::If { test, .. } | Stmt::While { test, .. } => f(test),
        Stmt::For { target, iter, .. } => {
            f(target);
            f(iter);
        }
        Stmt::Assertion { test, msg, .. } => {
            f(test);
            if let Some(m) = msg {
                f(m);
            }
        }
        Stmt::Match { subject, cases } => {
            f(subject);
            for case in cases {
                visit_pattern(&case.pattern, f);
                if let Some(g) = &case.guard {
                    f(g);
                }
            }
        }
        _ => {}
    }
}

fn visit_pattern(p: &Pattern, f: &mut impl FnMut(&Expr)) {
    match p {
        Pattern::Value(Some(e)) => f(e),
        Pattern::Value(None) => {}
        Pattern::As { pattern, .. } => {
            if let Some(inner) = pattern {
                visit_pattern(inner, f);
            }
        }
        Pattern::Or(alts) => alts.iter().for_each(|a| visit_pattern(a, f)),
    }
}

fn visit_target(target: &Expr, set: &mut AccessSet) {
    if let Some(path) = target.field_path() {
        set.write(path);
        return;
    }
    match target {
        Expr::Subscript { value, index } => {
            visit_expr(index, set);
            if let Some(path) = value.field_path() {
                set.write(path);
            } else {
                visit_target(value, set);
            }
        }
        Expr::Tuple { elts } => elts.iter().for_each(|e| visit_target(e, set)),
        other => visit_expr(other, set),
    }
}

fn visit_expr(e: &Expr, set: &mut AccessSet) {
    if let Some(path) = e.field_path() {
        set.read(path);
        return;
    }
    for_each_sub_expr(e, &mut |c| visit_expr(c, set));
}

fn for_each_sub_expr(e: &Expr, f: &mut impl FnMut(&Expr)) {
    match e {
        Expr::RefField { base, .. } => f(base),
        Expr::Bin { lhs, rhs, .. } => {
            f(lhs);
            f(rhs);
        }
        Expr::Unary { operand, .. } => f(operand),
        Expr::Bool { values, .. } => values.iter().for_each(&mut *f),
        Expr::Compare {
            left, comparators, ..
        } => {
            f(left);
            comparators.iter().for_each(&mut *f);
        }
        Expr::Attribute { value, .. } => f(value),
        Expr::Subscript { value, index } => {
            f(value);
            f(index);
        }
        Expr::Call {
            func,
            args,
            keywords,
        } => {
            f(func);
            args.iter().for_each(&mut *f);
            keywords.iter().for_each(|k| f(&k.value));
        }
        Expr::IfExp { test, body, orelse } => {
            f(test);
            f(body);
            f(orelse);
        }
        Expr::Await { value } => f(value),
        Expr::Tuple { elts } => elts.iter().for_each(&mut *f),
        Expr::Constant(_)
        | Expr::RefSelf
        | Expr::RefParam { .. }
        | Expr::RefLocal { .. }
        | Expr::Builtin(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{AugOp, BinOp, Builtin};

    #[test]
    fn comb_sum_reads_operands() {
        let body = vec![Stmt::assign(
            Expr::field(2),
            Expr::bin(Expr::field(0), BinOp::Add, Expr::field(1)),
        )];
        let set = analyze(&body);
        assert_eq!(set.reads, vec![vec![0], vec![1]]);
        assert_eq!(set.writes, vec![vec![2]]);
        assert_eq!(
            derive_sensitivity(&body),
            vec![Expr::field(0), Expr::field(1)]
        );
    }

    #[test]
    fn written_fields_leave_sensitivity() {
        let body = vec![
            Stmt::assign(Expr::field(1), Expr::field(0)),
            Stmt::assign(Expr::field(2), Expr::field(1)),
        ];
        assert_eq!(analyze(&body).sensitivity(), vec![vec![0]]);
    }

    #[test]
    fn aug_assign_reads_and_writes() {
        let body = vec![Stmt::aug_assign(Expr::field(0), AugOp::Add, Expr::int(1))];
        let set = analyze(&body);
        assert_eq!(set.reads, vec![vec![0]]);
        assert_eq!(set.writes, vec![vec![0]]);
    }

    #[test]
    fn child_fields_are_whole_paths() {
        let body = vec![Stmt::assign(Expr::field(0), Expr::child_field(3, 1))];
        assert_eq!(analyze(&body).reads, vec![vec![3, 1]]);
    }

    #[test]
    fn nested_blocks_are_visited() {
        let body = vec![Stmt::if_else(
            Expr::field(0),
            vec![Stmt::assign(Expr::field(1), Expr::field(2))],
            vec![Stmt::assign(Expr::field(1), Expr::int(0))],
        )];
        assert_eq!(analyze(&body).sensitivity(), vec![vec![0], vec![2]]);
    }

    #[test]
    fn await_detection() {
        let sync_body = vec![Stmt::expr(Expr::awaited(Expr::builtin(
            Builtin::Cycles,
            vec![Expr::int(2)],
        )))];
        assert!(contains_await(&sync_body));
        let nested = vec![Stmt::while_loop(Expr::bool(true), sync_body)];
        assert!(contains_await(&nested));
        assert!(!contains_await(&[Stmt::Pass]));
    }
}
