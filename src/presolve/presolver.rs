//! # The presolver contract
//!
//! A presolve method inspects a frozen problem and emits reductions into a private log. Methods
//! never mutate the problem; all modification goes through the applier. Methods are dispatched
//! in parallel, so they must be free of shared mutable state.
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crate::data::number_types::{Num, Real};
use crate::data::problem::Problem;
use crate::presolve::reductions::Reductions;

/// How expensive a presolve method is, and thereby when it runs.
///
/// Only `Fast` methods run until none of them produces a reduction, then `Medium` methods join,
/// then `Exhaustive` ones. After a round in which a transaction was applied the selection drops
/// back to `Fast`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Timing {
    Fast,
    Medium,
    Exhaustive,
}

/// Outcome of a single presolve method execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresolverStatus {
    /// No reduction was found.
    Unchanged,
    /// At least one transaction was emitted into the log.
    Reduced,
    /// The method proved the problem infeasible. This is authoritative; the round ends.
    Infeasible,
    /// The method proved the problem unbounded. This is authoritative; the round ends.
    Unbounded,
    /// The budget ran out before the method completed. Emitted transactions are still valid.
    Aborted,
}

/// The part of the problem a method intends to read and potentially modify.
///
/// This is a declarative hint for coarse partitioning and reporting; conflict resolution is
/// always performed by the applier through locks, whether or not a scope was declared.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scope {
    /// Row indices the method touches, or `None` for all.
    pub rows: Option<Vec<usize>>,
    /// Column indices the method touches, or `None` for all.
    pub columns: Option<Vec<usize>>,
}

/// Cooperative cancellation.
///
/// Long running methods consult this at natural boundaries, per row or per column, and return
/// [`PresolverStatus::Aborted`] promptly when it is set. The scheduler trips the flag when a
/// budget expires.
#[derive(Debug)]
pub struct Abort {
    flag: AtomicBool,
    deadline: Option<Instant>,
}

impl Abort {
    pub fn new(deadline: Option<Instant>) -> Self {
        Self {
            flag: AtomicBool::new(false),
            deadline,
        }
    }

    /// Whether work should stop. Checks the deadline and latches it into the flag.
    pub fn should_abort(&self) -> bool {
        if self.flag.load(Ordering::Relaxed) {
            return true;
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                self.trigger();
                return true;
            }
        }
        false
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }
}

/// A presolve method.
///
/// Implementations are stateless or self encapsulated; `execute` receives everything it may
/// read. Reported infeasibility or unboundedness must be certain: the scheduler terminates
/// presolve with that status without consulting the applier.
pub trait Presolver<R: Real>: Send + Sync {
    fn name(&self) -> &'static str;

    fn timing(&self) -> Timing;

    fn scope(&self) -> Scope {
        Scope::default()
    }

    /// Inspect the problem and append proposed reductions to the log.
    fn execute(
        &self,
        problem: &Problem<R>,
        num: &Num<R>,
        reductions: &mut Reductions<R>,
        abort: &Abort,
    ) -> PresolverStatus;
}

#[cfg(test)]
mod test {
    use std::time::{Duration, Instant};

    use crate::presolve::presolver::{Abort, Timing};

    #[test]
    fn timing_orders() {
        assert!(Timing::Fast < Timing::Medium);
        assert!(Timing::Medium < Timing::Exhaustive);
    }

    #[test]
    fn abort_latches() {
        let abort = Abort::new(None);
        assert!(!abort.should_abort());
        abort.trigger();
        assert!(abort.should_abort());
    }

    #[test]
    fn abort_deadline() {
        let abort = Abort::new(Some(Instant::now() - Duration::from_millis(1)));
        assert!(abort.should_abort());
    }
}
