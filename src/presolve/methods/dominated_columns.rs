//! # Dominated columns
//!
//! In a minimization problem whose rows are all of the form `<a, x> <= b`, column `j` dominates
//! column `k` when its objective coefficient is no larger and its coefficient in every row is no
//! larger. Whatever the dominated column contributes, the dominating one contributes at least as
//! cheaply, so the dominated column drops to its lower bound.
//!
//! Both columns are locked, including their bounds, because the argument depends on the exact
//! state of both.
use itertools::Itertools;

use crate::data::number_types::{Num, Real, RealRef};
use crate::data::problem::Problem;
use crate::presolve::presolver::{Abort, Presolver, PresolverStatus, Timing};
use crate::presolve::reductions::Reductions;

pub struct DominatedColumns;

impl<R> Presolver<R> for DominatedColumns
where
    R: Real,
    for<'r> &'r R: RealRef<R>,
{
    fn name(&self) -> &'static str {
        "DominatedColumns"
    }

    fn timing(&self) -> Timing {
        Timing::Medium
    }

    fn execute(
        &self,
        problem: &Problem<R>,
        num: &Num<R>,
        reductions: &mut Reductions<R>,
        abort: &Abort,
    ) -> PresolverStatus {
        let mut status = PresolverStatus::Unchanged;
        let candidates = (0..problem.nr_columns())
            .filter(|&col| problem.col_flags(col).active())
            .filter(|&col| is_in_upper_bounded_rows_only(problem, col))
            .collect::<Vec<_>>();

        for (first, second) in candidates.iter().copied().tuple_combinations() {
            if abort.should_abort() {
                return PresolverStatus::Aborted;
            }

            let pair = if dominates(problem, num, first, second) {
                Some((first, second))
            } else if dominates(problem, num, second, first) {
                Some((second, first))
            } else {
                None
            };
            let Some((dominating, dominated)) = pair else { continue };
            let Some(lower) = problem.lower_bound(dominated) else { continue };

            let mut transaction = reductions.transaction();
            transaction.lock_col(dominating);
            transaction.lock_col_bounds(dominating);
            transaction.lock_col(dominated);
            transaction.lock_col_bounds(dominated);
            transaction.fix_col(dominated, lower.clone());
            drop(transaction);

            status = PresolverStatus::Reduced;
        }

        status
    }
}

/// The domination argument only holds when every row restricts from above.
fn is_in_upper_bounded_rows_only<R: Real>(problem: &Problem<R>, col: usize) -> bool {
    problem.column(col).iter().all(|(row, _)| {
        let flags = problem.row_flags(*row);
        flags.redundant() || (flags.lhs_inf() && !flags.rhs_inf())
    })
}

/// Whether `first` dominates `second`: no larger objective coefficient and, row for row over
/// the union of both supports, no larger constraint coefficient.
fn dominates<R>(problem: &Problem<R>, num: &Num<R>, first: usize, second: usize) -> bool
where
    R: Real,
    for<'r> &'r R: RealRef<R>,
{
    if !num.is_le(
        problem.objective_coefficient(first),
        problem.objective_coefficient(second),
    ) {
        return false;
    }

    let zero = R::zero();
    let mut left = problem.column(first).iter().peekable();
    let mut right = problem.column(second).iter().peekable();
    loop {
        match (left.peek(), right.peek()) {
            (Some((row1, value1)), Some((row2, value2))) => {
                if row1 == row2 {
                    if !num.is_le(value1, value2) {
                        return false;
                    }
                    left.next();
                    right.next();
                } else if row1 < row2 {
                    if !num.is_le(value1, &zero) {
                        return false;
                    }
                    left.next();
                } else {
                    if !num.is_le(&zero, value2) {
                        return false;
                    }
                    right.next();
                }
            },
            (Some((_, value1)), None) => {
                if !num.is_le(value1, &zero) {
                    return false;
                }
                left.next();
            },
            (None, Some((_, value2))) => {
                if !num.is_le(&zero, value2) {
                    return false;
                }
                right.next();
            },
            (None, None) => break,
        }
    }

    true
}

#[cfg(test)]
mod test {
    use crate::data::number_types::Num;
    use crate::data::problem::{Problem, ProblemBuilder};
    use crate::presolve::presolver::{Abort, Presolver, PresolverStatus};
    use crate::presolve::reductions::{ColOp, Reductions};

    use super::DominatedColumns;

    fn domination_problem() -> Problem<f64> {
        // x dominates y:
        // min -2x - y - 2z
        // a: 2x + 3y +  z <= 6
        // b:       y + 3z <= 1
        let mut builder = ProblemBuilder::new();
        let x = builder.column("x", -2_f64, Some(0_f64), Some(4_f64), true);
        let y = builder.column("y", -1_f64, Some(0_f64), Some(2_f64), true);
        let z = builder.column("z", -2_f64, Some(0_f64), Some(2_f64), true);
        builder.row(None, Some(6_f64), [(x, 2_f64), (y, 3_f64), (z, 1_f64)]);
        builder.row(None, Some(1_f64), [(y, 1_f64), (z, 3_f64)]);
        builder.build()
    }

    #[test]
    fn happy_path_emits_one_locked_fixation() {
        let problem = domination_problem();
        let mut reductions = Reductions::new();

        let status = DominatedColumns.execute(
            &problem, &Num::default(), &mut reductions, &Abort::new(None),
        );

        assert_eq!(status, PresolverStatus::Reduced);
        assert_eq!(reductions.len(), 5);

        assert_eq!(reductions.reduction(0).row, ColOp::Locked as i32);
        assert_eq!(reductions.reduction(0).col, 0);
        assert_eq!(reductions.reduction(1).row, ColOp::BoundsLocked as i32);
        assert_eq!(reductions.reduction(1).col, 0);
        assert_eq!(reductions.reduction(2).row, ColOp::Locked as i32);
        assert_eq!(reductions.reduction(2).col, 1);
        assert_eq!(reductions.reduction(3).row, ColOp::BoundsLocked as i32);
        assert_eq!(reductions.reduction(3).col, 1);
        assert_eq!(reductions.reduction(4).row, ColOp::Fixed as i32);
        assert_eq!(reductions.reduction(4).col, 1);
        assert_eq!(reductions.reduction(4).new_value, 0_f64);
    }

    #[test]
    fn multiple_dominations_emit_in_pair_order() {
        // min -3x - 2y - z
        // a: 2x + 3y + 4z <= 6
        // b:       y + 3z <= 1
        let mut builder = ProblemBuilder::new();
        let x = builder.column("x", -3_f64, Some(0_f64), Some(4_f64), true);
        let y = builder.column("y", -2_f64, Some(0_f64), Some(2_f64), true);
        let z = builder.column("z", -1_f64, Some(0_f64), Some(2_f64), true);
        builder.row(None, Some(6_f64), [(x, 2_f64), (y, 3_f64), (z, 4_f64)]);
        builder.row(None, Some(1_f64), [(y, 1_f64), (z, 3_f64)]);
        let problem = builder.build();

        let mut reductions = Reductions::new();
        let status = DominatedColumns.execute(
            &problem, &Num::default(), &mut reductions, &Abort::new(None),
        );

        assert_eq!(status, PresolverStatus::Reduced);
        assert_eq!(reductions.len(), 15);

        let dominating = [0, 0, 1];
        let dominated = [1, 2, 2];
        for group in 0..3 {
            let base = group * 5;
            assert_eq!(reductions.reduction(base).row, ColOp::Locked as i32);
            assert_eq!(reductions.reduction(base).col, dominating[group] as i32);
            assert_eq!(reductions.reduction(base + 1).row, ColOp::BoundsLocked as i32);
            assert_eq!(reductions.reduction(base + 1).col, dominating[group] as i32);
            assert_eq!(reductions.reduction(base + 2).row, ColOp::Locked as i32);
            assert_eq!(reductions.reduction(base + 2).col, dominated[group] as i32);
            assert_eq!(reductions.reduction(base + 3).row, ColOp::BoundsLocked as i32);
            assert_eq!(reductions.reduction(base + 3).col, dominated[group] as i32);
            assert_eq!(reductions.reduction(base + 4).row, ColOp::Fixed as i32);
            assert_eq!(reductions.reduction(base + 4).col, dominated[group] as i32);
            assert_eq!(reductions.reduction(base + 4).new_value, 0_f64);
        }
    }

    #[test]
    fn no_domination_with_a_two_sided_row() {
        let mut builder = ProblemBuilder::new();
        let x = builder.column("x", -2_f64, Some(0_f64), Some(4_f64), false);
        let y = builder.column("y", -1_f64, Some(0_f64), Some(2_f64), false);
        builder.row(Some(1_f64), Some(6_f64), [(x, 1_f64), (y, 2_f64)]);
        let problem = builder.build();

        let mut reductions = Reductions::new();
        let status = DominatedColumns.execute(
            &problem, &Num::default(), &mut reductions, &Abort::new(None),
        );

        assert_eq!(status, PresolverStatus::Unchanged);
        assert!(reductions.is_empty());
    }
}
