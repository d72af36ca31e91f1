//! # Dual fixing
//!
//! A column whose objective direction is not blocked by any constraint can be moved to the
//! corresponding bound and fixed there. When the blocking rows are all singleton rows on the
//! column itself, the tightest of their implied bounds takes the place of the column bound.
use crate::data::number_types::{Num, Real, RealRef};
use crate::data::problem::Problem;
use crate::presolve::presolver::{Abort, Presolver, PresolverStatus, Timing};
use crate::presolve::reductions::Reductions;

pub struct DualFix;

/// How the rows of a column restrict moving it towards a bound.
enum Blockage<R> {
    /// No finite side in the way.
    Free,
    /// Blocked only by singleton rows on this column; the field is the tightest implied bound.
    Implied(R),
    /// Blocked by a row that involves other columns.
    Hard,
}

impl<R> Presolver<R> for DualFix
where
    R: Real,
    for<'r> &'r R: RealRef<R>,
{
    fn name(&self) -> &'static str {
        "DualFix"
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

        for col in 0..problem.nr_columns() {
            if abort.should_abort() {
                return PresolverStatus::Aborted;
            }
            if !problem.col_flags(col).active() {
                continue;
            }

            let cost = problem.objective_coefficient(col);
            let prefer_up = num.is_lt(cost, &R::zero());
            let prefer_down = num.is_lt(&R::zero(), cost);

            if prefer_up || !prefer_down {
                match self.fix_towards(problem, num, reductions, col, true) {
                    Some(PresolverStatus::Unbounded) if prefer_up => {
                        return PresolverStatus::Unbounded;
                    },
                    Some(PresolverStatus::Reduced) => {
                        status = PresolverStatus::Reduced;
                        continue;
                    },
                    _ => {},
                }
            }
            if prefer_down {
                match self.fix_towards(problem, num, reductions, col, false) {
                    Some(PresolverStatus::Unbounded) => return PresolverStatus::Unbounded,
                    Some(PresolverStatus::Reduced) => status = PresolverStatus::Reduced,
                    _ => {},
                }
            }
        }

        status
    }
}

impl DualFix {
    /// Try to fix a column at its bound, or the implied bound, in the given direction.
    ///
    /// # Return value
    ///
    /// `Some(Reduced)` when a fixation was emitted, `Some(Unbounded)` when the column escapes
    /// with nonzero cost, `None` when the direction is blocked.
    fn fix_towards<R>(
        &self,
        problem: &Problem<R>,
        num: &Num<R>,
        reductions: &mut Reductions<R>,
        col: usize,
        upwards: bool,
    ) -> Option<PresolverStatus>
    where
        R: Real,
        for<'r> &'r R: RealRef<R>,
    {
        let blockage = self.blockage(problem, num, col, upwards);
        let own_bound = if upwards { problem.upper_bound(col) } else { problem.lower_bound(col) };
        let cost = problem.objective_coefficient(col);
        let integral = problem.col_flags(col).rounds_to_integer();

        let candidate = match blockage {
            Blockage::Hard => return None,
            Blockage::Free => match own_bound {
                Some(bound) => bound.clone(),
                None => {
                    return if num.is_zero(cost) {
                        // Nothing depends on the column: remove it and its rows entirely.
                        let incident = problem.column(col).iter()
                            .filter(|(row, _)| !problem.row_flags(*row).redundant())
                            .map(|&(row, _)| row)
                            .collect::<Vec<_>>();
                        if upwards {
                            reductions.fix_col_positive_infinity(col, &incident);
                        } else {
                            reductions.fix_col_negative_infinity(col, &incident);
                        }
                        Some(PresolverStatus::Reduced)
                    } else {
                        Some(PresolverStatus::Unbounded)
                    };
                },
            },
            Blockage::Implied(implied) => {
                let implied = if integral {
                    if upwards { num.floor(&implied) } else { num.ceil(&implied) }
                } else {
                    implied
                };
                match own_bound {
                    Some(bound) => {
                        if upwards == num.is_lt(&implied, bound) {
                            implied
                        } else {
                            bound.clone()
                        }
                    },
                    None => implied,
                }
            },
        };

        // A fixation only moves the problem forward when it stays inside the domain.
        let opposite = if upwards { problem.lower_bound(col) } else { problem.upper_bound(col) };
        if let Some(opposite) = opposite {
            let inside = if upwards {
                num.is_feas_le(opposite, &candidate)
            } else {
                num.is_feas_le(&candidate, opposite)
            };
            if !inside {
                return None;
            }
        }

        reductions.fix_col(col, candidate);
        Some(PresolverStatus::Reduced)
    }

    /// Classify what stands between a column and the given direction.
    fn blockage<R>(
        &self,
        problem: &Problem<R>,
        num: &Num<R>,
        col: usize,
        upwards: bool,
    ) -> Blockage<R>
    where
        R: Real,
        for<'r> &'r R: RealRef<R>,
    {
        let mut implied: Option<R> = None;

        for (row, value) in problem.column(col) {
            if problem.row_flags(*row).redundant() {
                continue;
            }
            let positive = value > &R::zero();
            let blocking_side = if positive == upwards {
                problem.rhs(*row)
            } else {
                problem.lhs(*row)
            };
            let Some(side) = blocking_side else { continue };

            if problem.row(*row).len() > 1 {
                return Blockage::Hard;
            }
            // A singleton row is a plain bound on this column.
            let bound = side / value;
            let tighter = match &implied {
                Some(existing) => upwards == num.is_lt(&bound, existing),
                None => true,
            };
            if tighter {
                implied = Some(bound);
            }
        }

        match implied {
            Some(bound) => Blockage::Implied(bound),
            None => Blockage::Free,
        }
    }
}

#[cfg(test)]
mod test {
    use crate::data::number_types::Num;
    use crate::data::problem::ProblemBuilder;
    use crate::presolve::presolver::{Abort, Presolver, PresolverStatus};
    use crate::presolve::reductions::{ColOp, Reductions};

    use super::DualFix;

    #[test]
    fn fixes_at_the_implied_singleton_bound() {
        // min -x with 0 <= x <= 4 integer and the single row x <= 3.
        let mut builder = ProblemBuilder::new();
        let x = builder.column("x", -1_f64, Some(0_f64), Some(4_f64), true);
        builder.row(None, Some(3_f64), [(x, 1_f64)]);
        let problem = builder.build();

        let mut reductions = Reductions::new();
        let status = DualFix.execute(&problem, &Num::default(), &mut reductions, &Abort::new(None));

        assert_eq!(status, PresolverStatus::Reduced);
        assert_eq!(reductions.len(), 1);
        assert_eq!(reductions.reduction(0).row, ColOp::Fixed as i32);
        assert_eq!(reductions.reduction(0).col, 0);
        assert_eq!(reductions.reduction(0).new_value, 3_f64);
    }

    #[test]
    fn leaves_blocked_columns_alone() {
        // min -x - y with x + y <= 1: the blocking row involves both columns.
        let mut builder = ProblemBuilder::new();
        let x = builder.column("x", -1_f64, Some(0_f64), Some(1_f64), false);
        let y = builder.column("y", -1_f64, Some(0_f64), Some(1_f64), false);
        builder.row(None, Some(1_f64), [(x, 1_f64), (y, 1_f64)]);
        let problem = builder.build();

        let mut reductions = Reductions::new();
        let status = DualFix.execute(&problem, &Num::default(), &mut reductions, &Abort::new(None));

        assert_eq!(status, PresolverStatus::Unchanged);
        assert!(reductions.is_empty());
    }

    #[test]
    fn unblocked_direction_with_cost_is_unbounded() {
        // min -x with x >= 0 and no constraint above.
        let mut builder = ProblemBuilder::new();
        builder.column("x", -1_f64, Some(0_f64), None, false);
        let problem = builder.build();

        let mut reductions = Reductions::new();
        let status = DualFix.execute(&problem, &Num::default(), &mut reductions, &Abort::new(None));

        assert_eq!(status, PresolverStatus::Unbounded);
    }

    #[test]
    fn costless_unblocked_column_escapes_to_infinity() {
        // The column only appears in a row that a large value satisfies.
        let mut builder = ProblemBuilder::new();
        let x = builder.column("x", 0_f64, Some(0_f64), None, false);
        let y = builder.column("y", 1_f64, Some(0_f64), Some(1_f64), false);
        builder.row(Some(2_f64), None, [(x, 1_f64), (y, 1_f64)]);
        let problem = builder.build();

        let mut reductions = Reductions::new();
        let status = DualFix.execute(&problem, &Num::default(), &mut reductions, &Abort::new(None));

        assert_eq!(status, PresolverStatus::Reduced);
        // One redundancy record per incident row, then the infinity fixation.
        assert_eq!(reductions.len(), 2);
        assert_eq!(reductions.reduction(1).row, ColOp::FixedInfinity as i32);
        assert_eq!(reductions.reduction(1).new_value, 1_f64);
    }
}
