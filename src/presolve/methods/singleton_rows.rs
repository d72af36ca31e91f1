//! # Singleton rows
//!
//! A row with a single coefficient is a bound on its column in disguise. The implied bounds are
//! emitted and the row is marked redundant, all under a row lock so the transaction is dropped
//! when another reduction got to the row first.
use crate::data::number_types::{Num, Real, RealRef};
use crate::data::problem::Problem;
use crate::presolve::presolver::{Abort, Presolver, PresolverStatus, Timing};
use crate::presolve::reductions::Reductions;

pub struct SingletonRows;

impl<R> Presolver<R> for SingletonRows
where
    R: Real,
    for<'r> &'r R: RealRef<R>,
{
    fn name(&self) -> &'static str {
        "SingletonRows"
    }

    fn timing(&self) -> Timing {
        Timing::Fast
    }

    fn execute(
        &self,
        problem: &Problem<R>,
        num: &Num<R>,
        reductions: &mut Reductions<R>,
        abort: &Abort,
    ) -> PresolverStatus {
        let mut status = PresolverStatus::Unchanged;

        for row in 0..problem.nr_rows() {
            if abort.should_abort() {
                return PresolverStatus::Aborted;
            }
            if problem.row_flags(row).redundant() {
                continue;
            }
            let [(col, coefficient)] = problem.row(row) else { continue };
            if num.is_zero(coefficient) {
                continue;
            }

            let positive = coefficient > &R::zero();
            let implied_upper = if positive { problem.rhs(row) } else { problem.lhs(row) }
                .map(|side| side / coefficient);
            let implied_lower = if positive { problem.lhs(row) } else { problem.rhs(row) }
                .map(|side| side / coefficient);

            let mut transaction = reductions.transaction();
            transaction.lock_row(row);
            if let Some(bound) = implied_lower {
                transaction.change_col_lb(*col, bound);
            }
            if let Some(bound) = implied_upper {
                transaction.change_col_ub(*col, bound);
            }
            transaction.mark_row_redundant(row);
            drop(transaction);

            status = PresolverStatus::Reduced;
        }

        status
    }
}

#[cfg(test)]
mod test {
    use crate::data::number_types::Num;
    use crate::data::problem::ProblemBuilder;
    use crate::presolve::presolver::{Abort, Presolver, PresolverStatus};
    use crate::presolve::reductions::{ColOp, Reductions, RowOp};

    use super::SingletonRows;

    #[test]
    fn absorbs_a_singleton_row_into_bounds() {
        // -4 <= -2x <= 6 is the bound -3 <= x <= 2.
        let mut builder = ProblemBuilder::new();
        let x = builder.column("x", 1_f64, None, None, false);
        let y = builder.column("y", 1_f64, Some(0_f64), None, false);
        builder.row(Some(-4_f64), Some(6_f64), [(x, -2_f64)]);
        builder.row(None, Some(3_f64), [(x, 1_f64), (y, 1_f64)]);
        let problem = builder.build();

        let mut reductions = Reductions::new();
        let status = SingletonRows.execute(&problem, &Num::default(), &mut reductions, &Abort::new(None));

        assert_eq!(status, PresolverStatus::Reduced);
        assert_eq!(reductions.transactions().len(), 1);
        assert_eq!(reductions.transactions()[0].nlocks, 1);
        assert_eq!(reductions.len(), 4);

        assert_eq!(reductions.reduction(0).col, RowOp::Locked as i32);
        assert_eq!(reductions.reduction(1).row, ColOp::LowerBound as i32);
        assert_eq!(reductions.reduction(1).new_value, -3_f64);
        assert_eq!(reductions.reduction(2).row, ColOp::UpperBound as i32);
        assert_eq!(reductions.reduction(2).new_value, 2_f64);
        assert_eq!(reductions.reduction(3).col, RowOp::Redundant as i32);
    }

    #[test]
    fn ignores_rows_with_more_than_one_entry() {
        let mut builder = ProblemBuilder::new();
        let x = builder.column("x", 1_f64, Some(0_f64), None, false);
        let y = builder.column("y", 1_f64, Some(0_f64), None, false);
        builder.row(None, Some(3_f64), [(x, 1_f64), (y, 1_f64)]);
        let problem = builder.build();

        let mut reductions = Reductions::new();
        let status = SingletonRows.execute(&problem, &Num::default(), &mut reductions, &Abort::new(None));

        assert_eq!(status, PresolverStatus::Unchanged);
        assert!(reductions.is_empty());
    }
}
