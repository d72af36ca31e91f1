//! # The scheduler
//!
//! Runs presolve in rounds. In every round the enabled presolve methods are dispatched in
//! parallel against a frozen problem snapshot, each writing into a private reduction log; a
//! barrier collects the logs in a deterministic order keyed by method registration order, never
//! by completion order, and hands them to the applier. The loop advances until a fixed point,
//! a terminal status or a budget boundary is reached.
use std::time::{Duration, Instant};

use log::{debug, info};
use rayon::prelude::*;

use crate::data::number_types::{Num, Real, RealRef};
use crate::data::problem::Problem;
use crate::presolve::apply::{Applier, RoundTally};
use crate::presolve::certificate::Certificate;
use crate::presolve::methods::{DominatedColumns, DualFix, SingletonRows};
use crate::presolve::options::PresolveOptions;
use crate::presolve::postsolve::PostsolveTrace;
use crate::presolve::presolver::{Abort, Presolver, PresolverStatus, Timing};
use crate::presolve::reductions::Reductions;

/// Final outcome of a presolve run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresolveStatus {
    /// No transaction was accepted in any round.
    Unchanged,
    /// The problem was reduced.
    Reduced,
    /// The problem is infeasible.
    Infeasible,
    /// The problem is unbounded.
    Unbounded,
    /// A budget ran out; the problem holds the best reduction so far.
    Aborted,
}

/// Run totals.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Statistics {
    pub rounds: usize,
    pub transactions_applied: usize,
    pub transactions_rejected: usize,
    pub rows_deleted: usize,
    pub cols_deleted: usize,
    pub coefficients_changed: usize,
    pub new_nonzeros: usize,
    pub time: Duration,
}

impl Statistics {
    fn accumulate(&mut self, tally: &RoundTally) {
        self.transactions_applied += tally.applied;
        self.transactions_rejected += tally.rejected;
        self.rows_deleted += tally.rows_deleted;
        self.cols_deleted += tally.cols_deleted;
        self.coefficients_changed += tally.coefficients_changed;
        self.new_nonzeros += tally.new_nonzeros;
    }
}

/// Everything a presolve run leaves behind besides the mutated problem.
#[derive(Debug, Clone, PartialEq)]
pub struct PresolveResult<R> {
    pub status: PresolveStatus,
    pub postsolve: PostsolveTrace<R>,
    pub statistics: Statistics,
}

/// A configured set of presolve methods with a rounds loop.
pub struct Presolve<R: Real> {
    presolvers: Vec<Box<dyn Presolver<R>>>,
    options: PresolveOptions,
}

impl<R> Presolve<R>
where
    R: Real,
    for<'r> &'r R: RealRef<R>,
{
    /// An empty configuration; methods are added with [`Self::add_method`].
    pub fn new(options: PresolveOptions) -> Self {
        Self {
            presolvers: Vec::new(),
            options,
        }
    }

    /// The bundled method set.
    pub fn with_default_methods(options: PresolveOptions) -> Self {
        let mut presolve = Self::new(options);
        presolve.add_method(Box::new(DualFix));
        presolve.add_method(Box::new(SingletonRows));
        presolve.add_method(Box::new(DominatedColumns));
        presolve
    }

    /// Register a method. Registration order is the deterministic order in which the applier
    /// processes the logs of every round.
    pub fn add_method(&mut self, presolver: Box<dyn Presolver<R>>) {
        self.presolvers.push(presolver);
    }

    pub fn options(&self) -> &PresolveOptions {
        &self.options
    }

    /// The tolerance helper a run with these options computes with.
    pub fn num(&self) -> Num<R> {
        Num::new(self.options.epsilon, self.options.feasibility, self.options.huge)
    }

    /// Reduce the problem in place.
    pub fn apply(
        &self,
        problem: &mut Problem<R>,
        certificate: &mut dyn Certificate<R>,
    ) -> PresolveResult<R> {
        let num = self.num();
        let start = Instant::now();
        let global_deadline = self.options.time_limit.map(|limit| start + limit);

        let threads = match self.options.threads {
            0 => std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            configured => configured,
        };
        let pool = (threads > 1)
            .then(|| {
                rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .build()
                    .ok()
            })
            .flatten();

        let mut postsolve = PostsolveTrace::new(problem.nr_rows(), problem.nr_columns());
        let mut statistics = Statistics::default();
        let mut level = Timing::Fast;
        let mut reduced = false;

        let status = loop {
            if statistics.rounds >= self.options.max_rounds {
                break PresolveStatus::Aborted;
            }
            let round_deadline = earliest(
                global_deadline,
                self.options.round_time_limit.map(|limit| Instant::now() + limit),
            );
            let abort = Abort::new(round_deadline);
            if abort.should_abort() {
                break PresolveStatus::Aborted;
            }

            statistics.rounds += 1;
            let selected = self.presolvers.iter()
                .filter(|presolver| presolver.timing() <= level)
                .map(Box::as_ref)
                .collect::<Vec<_>>();
            let outcomes = dispatch(&selected, pool.as_ref(), problem, &num, &abort);

            let mut logs = Vec::with_capacity(outcomes.len());
            let mut terminal = None;
            for (presolver, (status, log)) in selected.iter().zip(outcomes) {
                debug!("{}: {:?}, {} reductions", presolver.name(), status, log.len());
                match status {
                    PresolverStatus::Infeasible => terminal = Some(PresolveStatus::Infeasible),
                    PresolverStatus::Unbounded => terminal = Some(PresolveStatus::Unbounded),
                    _ => {},
                }
                logs.push(log);
            }
            if let Some(terminal) = terminal {
                break terminal;
            }

            let tally = {
                let mut applier = Applier::new(problem, &num, &mut postsolve, certificate);
                match applier.apply_round(&logs) {
                    Ok(tally) => tally,
                    Err(_) => break PresolveStatus::Infeasible,
                }
            };
            debug!(
                "round {}: {} applied, {} rejected at {:?} level",
                statistics.rounds, tally.applied, tally.rejected, level,
            );
            statistics.accumulate(&tally);

            if tally.rows_deleted > 0 || tally.cols_deleted > 0 {
                let compression = problem.compress();
                postsolve.compress(&compression.row_mapping, &compression.col_mapping);
                certificate.compress(&compression.row_mapping, &compression.col_mapping);
            }

            // A budget that expired during the round returns the reduced problem so far.
            if abort.should_abort() {
                break PresolveStatus::Aborted;
            }

            if tally.applied > 0 {
                reduced = true;
                level = Timing::Fast;
                continue;
            }
            // Escalation is monotonic as long as no level makes progress; it resets above.
            level = match level {
                Timing::Fast => Timing::Medium,
                Timing::Medium => Timing::Exhaustive,
                Timing::Exhaustive => break if reduced {
                    PresolveStatus::Reduced
                } else {
                    PresolveStatus::Unchanged
                },
            };
        };

        statistics.time = start.elapsed();
        info!(
            "presolve {:?} after {} rounds: {} transactions applied, {} rejected, {} rows and {} columns removed",
            status,
            statistics.rounds,
            statistics.transactions_applied,
            statistics.transactions_rejected,
            statistics.rows_deleted,
            statistics.cols_deleted,
        );

        PresolveResult {
            status,
            postsolve,
            statistics,
        }
    }
}

fn earliest(first: Option<Instant>, second: Option<Instant>) -> Option<Instant> {
    match (first, second) {
        (Some(first), Some(second)) => Some(first.min(second)),
        (deadline, None) | (None, deadline) => deadline,
    }
}

/// Run the selected methods, in parallel when a pool is available, and collect their logs in
/// selection order.
fn dispatch<R>(
    selected: &[&dyn Presolver<R>],
    pool: Option<&rayon::ThreadPool>,
    problem: &Problem<R>,
    num: &Num<R>,
    abort: &Abort,
) -> Vec<(PresolverStatus, Reductions<R>)>
where
    R: Real,
    for<'r> &'r R: RealRef<R>,
{
    let run_one = |presolver: &dyn Presolver<R>| {
        let mut reductions = Reductions::new();
        let status = presolver.execute(problem, num, &mut reductions, abort);
        (status, reductions)
    };

    match pool {
        Some(pool) => pool.install(|| {
            selected.par_iter().map(|presolver| run_one(*presolver)).collect()
        }),
        None => selected.iter().map(|presolver| run_one(*presolver)).collect(),
    }
}

#[cfg(test)]
mod test {
    use crate::data::number_types::Num;
    use crate::data::problem::{Problem, ProblemBuilder};
    use crate::presolve::certificate::NoCertificate;
    use crate::presolve::options::PresolveOptions;
    use crate::presolve::presolver::{Abort, Presolver, PresolverStatus, Timing};
    use crate::presolve::reductions::Reductions;
    use crate::presolve::scheduler::{Presolve, PresolveStatus};

    /// Declares the problem infeasible.
    struct Doomsayer;

    impl Presolver<f64> for Doomsayer {
        fn name(&self) -> &'static str {
            "doomsayer"
        }

        fn timing(&self) -> Timing {
            Timing::Fast
        }

        fn execute(
            &self,
            _: &Problem<f64>,
            _: &Num<f64>,
            _: &mut Reductions<f64>,
            _: &Abort,
        ) -> PresolverStatus {
            PresolverStatus::Infeasible
        }
    }

    fn trivial_problem() -> Problem<f64> {
        let mut builder = ProblemBuilder::new();
        let x = builder.column("x", 1_f64, Some(0_f64), Some(1_f64), false);
        builder.row(None, Some(1_f64), [(x, 1_f64)]);
        builder.build()
    }

    #[test]
    fn no_methods_reach_the_fixed_point_unchanged() {
        let mut problem = trivial_problem();
        let presolve = Presolve::<f64>::new(PresolveOptions::default());

        let result = presolve.apply(&mut problem, &mut NoCertificate);

        assert_eq!(result.status, PresolveStatus::Unchanged);
        assert!(result.postsolve.is_empty());
    }

    #[test]
    fn infeasibility_is_authoritative() {
        let mut problem = trivial_problem();
        let mut presolve = Presolve::<f64>::new(PresolveOptions::default());
        presolve.add_method(Box::new(Doomsayer));

        let result = presolve.apply(&mut problem, &mut NoCertificate);

        assert_eq!(result.status, PresolveStatus::Infeasible);
    }

    #[test]
    fn round_budget_aborts() {
        let mut problem = trivial_problem();
        let options = PresolveOptions {
            max_rounds: 0,
            ..PresolveOptions::default()
        };
        let presolve = Presolve::<f64>::new(options);

        let result = presolve.apply(&mut problem, &mut NoCertificate);

        assert_eq!(result.status, PresolveStatus::Aborted);
    }
}
