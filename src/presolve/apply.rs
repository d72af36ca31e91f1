//! # The transaction applier
//!
//! Single threaded consumer of the per presolver reduction logs collected by a round. Logs are
//! processed in the deterministic presolver order fixed by the scheduler; within a presolver,
//! transactions are processed in emission order.
//!
//! Every transaction passes the same pipeline: its lock prefix is checked against per entity
//! version counters snapshotted at the start of the round, its body is validated record by
//! record against an overlay of the current problem, and only a fully valid transaction is
//! applied, all records in emission order. A rejection leaves the problem untouched.
//!
//! Infeasibility discovered while validating or applying terminates presolve as a whole, so the
//! all or nothing guarantee only matters for the surviving problem: no partially applied
//! transaction is ever observable by later rounds.
use std::collections::{HashMap, HashSet};

use log::trace;

use crate::data::linear_algebra::SparseTupleVec;
use crate::data::number_types::{Num, Real, RealRef};
use crate::data::problem::{BoundDirection, Problem};
use crate::presolve::certificate::Certificate;
use crate::presolve::postsolve::{PostsolveEntry, PostsolveTrace, RowSnapshot};
use crate::presolve::reductions::{ColOp, Reductions, RowOp, Transaction};

/// The problem was determined infeasible while reducing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Infeasible;

/// Progress of a single transaction through the applier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Pending,
    LocksChecked,
    EntriesValidated,
    Applied,
    Rejected,
}

/// Accept and reject tallies of one applier round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoundTally {
    pub applied: usize,
    pub rejected: usize,
    pub rows_deleted: usize,
    pub cols_deleted: usize,
    pub coefficients_changed: usize,
    /// Coefficient changes that introduced new nonzeros, summed over accepted transactions.
    pub new_nonzeros: usize,
}

/// Version counters as they were when the round started, plus the forward reservations strong
/// locks of applied transactions have registered since.
struct RoundState {
    row_versions: Vec<u32>,
    col_versions: Vec<u32>,
    col_bound_versions: Vec<u32>,
    reserved_rows: HashSet<usize>,
    reserved_cols: HashSet<usize>,
}

impl RoundState {
    fn snapshot<R: Real>(problem: &Problem<R>) -> Self {
        Self {
            row_versions: problem.row_versions().to_vec(),
            col_versions: problem.col_versions().to_vec(),
            col_bound_versions: problem.col_bound_versions().to_vec(),
            reserved_rows: HashSet::new(),
            reserved_cols: HashSet::new(),
        }
    }
}

/// A validated record, ready to be applied.
enum Op<R> {
    SetRowSide { row: usize, direction: BoundDirection, value: R, old: Option<R> },
    MarkRowSideInf { row: usize, direction: BoundDirection, old: R },
    MarkRowRedundant { row: usize },
    SetColBound { col: usize, direction: BoundDirection, value: R, old: Option<R> },
    FixCol { col: usize, value: R },
    FixColInfinity { col: usize, positive: bool },
    SetCoefficient { row: usize, col: usize, value: Option<R>, old: Option<R> },
    Substitute { col: usize, eq: usize, objective_only: bool },
    Replace { col: usize, replacement: usize, factor: R, offset: R },
    Parallel { col1: usize, col2: usize, factor: R },
    ImplInt { col: usize },
    Sparsify { eq: usize, scaled_rows: Vec<(usize, R)> },
}

/// Why a transaction cannot be applied.
enum Verdict {
    /// The transaction conflicts with the current problem state and is dropped; presolve
    /// continues.
    Reject,
    /// The transaction proves the problem infeasible; presolve ends.
    Infeasible,
}

/// Pending changes of the transaction under validation, presenting the latest version of the
/// problem to the record checks without mutating anything.
struct Overlay<R> {
    lower_bounds: HashMap<usize, Option<R>>,
    upper_bounds: HashMap<usize, Option<R>>,
    fixed: HashMap<usize, R>,
    inactive_cols: HashSet<usize>,
    lhs: HashMap<usize, Option<R>>,
    rhs: HashMap<usize, Option<R>>,
    redundant_rows: HashSet<usize>,
    coefficients: HashMap<(usize, usize), Option<R>>,
}

impl<R: Real> Overlay<R> {
    fn new() -> Self {
        Self {
            lower_bounds: HashMap::new(),
            upper_bounds: HashMap::new(),
            fixed: HashMap::new(),
            inactive_cols: HashSet::new(),
            lhs: HashMap::new(),
            rhs: HashMap::new(),
            redundant_rows: HashSet::new(),
            coefficients: HashMap::new(),
        }
    }

    fn bound<'a>(&'a self, problem: &'a Problem<R>, col: usize, direction: BoundDirection) -> Option<&'a R> {
        let pending = match direction {
            BoundDirection::Lower => &self.lower_bounds,
            BoundDirection::Upper => &self.upper_bounds,
        };
        match pending.get(&col) {
            Some(value) => value.as_ref(),
            None => problem.bound(col, direction),
        }
    }

    fn side<'a>(&'a self, problem: &'a Problem<R>, row: usize, direction: BoundDirection) -> Option<&'a R> {
        let pending = match direction {
            BoundDirection::Lower => &self.lhs,
            BoundDirection::Upper => &self.rhs,
        };
        match pending.get(&row) {
            Some(value) => value.as_ref(),
            None => match direction {
                BoundDirection::Lower => problem.lhs(row),
                BoundDirection::Upper => problem.rhs(row),
            },
        }
    }

    fn coefficient<'a>(&'a self, problem: &'a Problem<R>, row: usize, col: usize) -> Option<&'a R> {
        match self.coefficients.get(&(row, col)) {
            Some(value) => value.as_ref(),
            None => problem.coefficient(row, col),
        }
    }

    fn fixed_value<'a>(&'a self, problem: &'a Problem<R>, col: usize) -> Option<&'a R> {
        if let Some(value) = self.fixed.get(&col) {
            return Some(value);
        }
        if problem.col_flags(col).fixed() {
            problem.lower_bound(col)
        } else {
            None
        }
    }

    fn is_col_active(&self, problem: &Problem<R>, col: usize) -> bool {
        !self.inactive_cols.contains(&col)
            && !self.fixed.contains_key(&col)
            && problem.col_flags(col).active()
    }

    fn is_row_redundant(&self, problem: &Problem<R>, row: usize) -> bool {
        self.redundant_rows.contains(&row) || problem.row_flags(row).redundant()
    }

    fn set_bound(&mut self, col: usize, direction: BoundDirection, value: Option<R>) {
        match direction {
            BoundDirection::Lower => self.lower_bounds.insert(col, value),
            BoundDirection::Upper => self.upper_bounds.insert(col, value),
        };
    }

    fn set_side(&mut self, row: usize, direction: BoundDirection, value: Option<R>) {
        match direction {
            BoundDirection::Lower => self.lhs.insert(row, value),
            BoundDirection::Upper => self.rhs.insert(row, value),
        };
    }
}

/// Applies the ordered logs of one round to the problem.
pub(crate) struct Applier<'a, R, C: ?Sized> {
    problem: &'a mut Problem<R>,
    num: &'a Num<R>,
    postsolve: &'a mut PostsolveTrace<R>,
    certificate: &'a mut C,
}

impl<'a, R, C> Applier<'a, R, C>
where
    R: Real,
    for<'r> &'r R: RealRef<R>,
    C: Certificate<R> + ?Sized,
{
    pub fn new(
        problem: &'a mut Problem<R>,
        num: &'a Num<R>,
        postsolve: &'a mut PostsolveTrace<R>,
        certificate: &'a mut C,
    ) -> Self {
        Self {
            problem,
            num,
            postsolve,
            certificate,
        }
    }

    /// Process the ordered logs of one round.
    ///
    /// Transactions whose emission was never completed are discarded without counting.
    pub fn apply_round(&mut self, logs: &[Reductions<R>]) -> Result<RoundTally, Infeasible> {
        let mut state = RoundState::snapshot(self.problem);
        let mut tally = RoundTally::default();

        for log in logs {
            for transaction in log.transactions() {
                if transaction.end.is_none() {
                    continue;
                }
                match self.process_transaction(&mut state, log, transaction, &mut tally)? {
                    TransactionState::Applied => tally.applied += 1,
                    TransactionState::Rejected => tally.rejected += 1,
                    other => debug_assert!(false, "non terminal transaction state {:?}", other),
                }
            }
        }

        debug_assert!(self.problem.is_consistent(self.num));
        Ok(tally)
    }

    fn process_transaction(
        &mut self,
        state: &mut RoundState,
        log: &Reductions<R>,
        transaction: &Transaction,
        tally: &mut RoundTally,
    ) -> Result<TransactionState, Infeasible> {
        let end = transaction.end.expect("incomplete transactions are discarded earlier");

        // Lock conflict check against the round start snapshot.
        let mut strong_rows = HashSet::new();
        let mut strong_cols = HashSet::new();
        for index in transaction.start..transaction.start + transaction.nlocks {
            let reduction = log.reduction(index);
            let conflicting = if reduction.col < 0 {
                let row = reduction.row as usize;
                match RowOp::from_sentinel(reduction.col) {
                    Some(RowOp::Locked) => {
                        self.problem.row_version(row) != state.row_versions[row]
                    },
                    Some(RowOp::LockedStrong) => {
                        strong_rows.insert(row);
                        self.problem.row_version(row) != state.row_versions[row]
                    },
                    _ => {
                        debug_assert!(false, "non lock record in lock prefix");
                        true
                    },
                }
            } else {
                let col = reduction.col as usize;
                match ColOp::from_sentinel(reduction.row) {
                    Some(ColOp::Locked) => {
                        self.problem.col_version(col) != state.col_versions[col]
                    },
                    Some(ColOp::LockedStrong) => {
                        strong_cols.insert(col);
                        self.problem.col_version(col) != state.col_versions[col]
                    },
                    Some(ColOp::BoundsLocked) => {
                        self.problem.col_bound_version(col) != state.col_bound_versions[col]
                    },
                    _ => {
                        debug_assert!(false, "non lock record in lock prefix");
                        true
                    },
                }
            };
            if conflicting {
                return Ok(TransactionState::Rejected);
            }
        }

        // Semantic validity check of the body against the current problem state.
        let mut overlay = Overlay::new();
        let mut ops = Vec::new();
        let mut modified_rows = HashSet::new();
        let mut modified_cols = HashSet::new();
        let mut new_nonzeros = 0;
        let mut index = transaction.start + transaction.nlocks;
        while index < end {
            let verdict = self.validate_record(
                log, &mut index, end,
                &mut overlay, &mut ops,
                &mut modified_rows, &mut modified_cols,
                &mut new_nonzeros,
            );
            match verdict {
                Ok(()) => {},
                Err(Verdict::Reject) => return Ok(TransactionState::Rejected),
                Err(Verdict::Infeasible) => return Err(Infeasible),
            }
        }

        // A transaction all of whose records turned out to be no-ops has nothing to apply.
        if ops.is_empty() {
            return Ok(TransactionState::Rejected);
        }

        // Forward reservations from strong locks of previously applied transactions.
        let reserved = modified_rows.iter()
            .any(|row| state.reserved_rows.contains(row) && !strong_rows.contains(row))
            || modified_cols.iter()
                .any(|col| state.reserved_cols.contains(col) && !strong_cols.contains(col));
        if reserved {
            return Ok(TransactionState::Rejected);
        }

        // All or nothing commit, in emission order.
        for op in ops {
            self.apply_op(op, tally)?;
        }
        tally.new_nonzeros += new_nonzeros;
        state.reserved_rows.extend(strong_rows);
        state.reserved_cols.extend(strong_cols);

        trace!("transaction applied: [{}, {}) with {} locks", transaction.start, end, transaction.nlocks);
        Ok(TransactionState::Applied)
    }

    /// Validate the record at `*index`, advancing past it and any continuation records it owns.
    #[allow(clippy::too_many_arguments)]
    fn validate_record(
        &self,
        log: &Reductions<R>,
        index: &mut usize,
        end: usize,
        overlay: &mut Overlay<R>,
        ops: &mut Vec<Op<R>>,
        modified_rows: &mut HashSet<usize>,
        modified_cols: &mut HashSet<usize>,
        new_nonzeros: &mut usize,
    ) -> Result<(), Verdict> {
        let reduction = log.reduction(*index);
        *index += 1;

        if reduction.row >= 0 && reduction.col >= 0 {
            let (row, col) = (reduction.row as usize, reduction.col as usize);
            return self.validate_coefficient(
                row, col, &reduction.new_value,
                overlay, ops, modified_rows, modified_cols, new_nonzeros,
            );
        }

        if reduction.col < 0 {
            let row = reduction.row as usize;
            return match RowOp::from_sentinel(reduction.col) {
                Some(RowOp::Rhs) => self.validate_side(
                    row, BoundDirection::Upper, &reduction.new_value, overlay, ops, modified_rows,
                ),
                Some(RowOp::Lhs) => self.validate_side(
                    row, BoundDirection::Lower, &reduction.new_value, overlay, ops, modified_rows,
                ),
                Some(RowOp::RhsInf) => self.validate_side_inf(
                    row, BoundDirection::Upper, overlay, ops, modified_rows,
                ),
                Some(RowOp::LhsInf) => self.validate_side_inf(
                    row, BoundDirection::Lower, overlay, ops, modified_rows,
                ),
                Some(RowOp::Redundant) => {
                    if overlay.is_row_redundant(self.problem, row) {
                        // Marking twice is an idempotent no-op.
                        return Ok(());
                    }
                    overlay.redundant_rows.insert(row);
                    modified_rows.insert(row);
                    ops.push(Op::MarkRowRedundant { row });
                    Ok(())
                },
                Some(RowOp::Sparsify) => {
                    let nr_rows = reduction.new_value.to_f64().round() as usize;
                    self.validate_sparsify(
                        row, nr_rows, log, index, end, overlay, ops, modified_rows, modified_cols,
                    )
                },
                _ => {
                    debug_assert!(false, "unexpected row record in transaction body");
                    Err(Verdict::Reject)
                },
            };
        }

        let col = reduction.col as usize;
        match ColOp::from_sentinel(reduction.row) {
            Some(ColOp::LowerBound) => self.validate_bound(
                col, BoundDirection::Lower, &reduction.new_value, overlay, ops, modified_cols,
            ),
            Some(ColOp::UpperBound) => self.validate_bound(
                col, BoundDirection::Upper, &reduction.new_value, overlay, ops, modified_cols,
            ),
            Some(ColOp::Fixed) => self.validate_fix(
                col, &reduction.new_value, overlay, ops, modified_cols,
            ),
            Some(ColOp::FixedInfinity) => {
                let positive = reduction.new_value > R::zero();
                self.validate_fix_infinity(col, positive, overlay, ops, modified_cols)
            },
            Some(ColOp::Substitute) => {
                let eq = reduction.new_value.to_f64().round() as usize;
                self.validate_substitute(
                    col, eq, false, overlay, ops, modified_rows, modified_cols,
                )
            },
            Some(ColOp::SubstituteObj) => {
                let eq = reduction.new_value.to_f64().round() as usize;
                self.validate_substitute(
                    col, eq, true, overlay, ops, modified_rows, modified_cols,
                )
            },
            Some(ColOp::Replace) => {
                if *index >= end {
                    debug_assert!(false, "replacement record without continuation");
                    return Err(Verdict::Reject);
                }
                let continuation = log.reduction(*index);
                *index += 1;
                if ColOp::from_sentinel(continuation.row) != Some(ColOp::None) || continuation.col < 0 {
                    debug_assert!(false, "malformed replacement continuation");
                    return Err(Verdict::Reject);
                }
                self.validate_replace(
                    col,
                    continuation.col as usize,
                    &reduction.new_value,
                    &continuation.new_value,
                    overlay, ops, modified_rows, modified_cols,
                )
            },
            Some(ColOp::Parallel) => {
                let col2 = reduction.new_value.to_f64().round() as usize;
                self.validate_parallel(col, col2, overlay, ops, modified_rows, modified_cols)
            },
            Some(ColOp::ImplInt) => {
                if self.problem.col_flags(col).rounds_to_integer() || !overlay.is_col_active(self.problem, col) {
                    return Ok(());
                }
                modified_cols.insert(col);
                ops.push(Op::ImplInt { col });
                Ok(())
            },
            _ => {
                debug_assert!(false, "unexpected column record in transaction body");
                Err(Verdict::Reject)
            },
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn validate_coefficient(
        &self,
        row: usize,
        col: usize,
        value: &R,
        overlay: &mut Overlay<R>,
        ops: &mut Vec<Op<R>>,
        modified_rows: &mut HashSet<usize>,
        modified_cols: &mut HashSet<usize>,
        new_nonzeros: &mut usize,
    ) -> Result<(), Verdict> {
        if overlay.is_row_redundant(self.problem, row) || !overlay.is_col_active(self.problem, col) {
            return Err(Verdict::Reject);
        }
        if self.certificate.requires_integral_coefficients() && !self.num.is_integral(value) {
            return Err(Verdict::Reject);
        }

        let old = overlay.coefficient(self.problem, row, col).cloned();
        let new = if self.num.is_zero(value) { None } else { Some(value.clone()) };
        match (&old, &new) {
            (None, None) => return Ok(()),
            (Some(old), Some(new)) if self.num.is_eq(old, new) => return Ok(()),
            _ => {},
        }

        if old.is_none() {
            *new_nonzeros += 1;
        }
        overlay.coefficients.insert((row, col), new.clone());
        modified_rows.insert(row);
        modified_cols.insert(col);
        ops.push(Op::SetCoefficient { row, col, value: new, old });
        Ok(())
    }

    fn validate_side(
        &self,
        row: usize,
        direction: BoundDirection,
        value: &R,
        overlay: &mut Overlay<R>,
        ops: &mut Vec<Op<R>>,
        modified_rows: &mut HashSet<usize>,
    ) -> Result<(), Verdict> {
        if overlay.is_row_redundant(self.problem, row) {
            return Err(Verdict::Reject);
        }

        let old = overlay.side(self.problem, row, direction).cloned();
        if let Some(existing) = &old {
            if self.num.is_eq(existing, value) {
                return Ok(());
            }
        }

        // The new side may not cross the opposite one beyond the feasibility tolerance; within
        // it, the row is clamped to an equality.
        let mut value = value.clone();
        if let Some(opposite) = overlay.side(self.problem, row, !direction) {
            let crosses = match direction {
                BoundDirection::Lower => &value > opposite,
                BoundDirection::Upper => &value < opposite,
            };
            if crosses {
                if !self.num.is_feas_eq(&value, opposite) {
                    return Err(Verdict::Infeasible);
                }
                value = opposite.clone();
            }
        }

        overlay.set_side(row, direction, Some(value.clone()));
        modified_rows.insert(row);
        ops.push(Op::SetRowSide { row, direction, value, old });
        Ok(())
    }

    fn validate_side_inf(
        &self,
        row: usize,
        direction: BoundDirection,
        overlay: &mut Overlay<R>,
        ops: &mut Vec<Op<R>>,
        modified_rows: &mut HashSet<usize>,
    ) -> Result<(), Verdict> {
        if overlay.is_row_redundant(self.problem, row) {
            return Err(Verdict::Reject);
        }

        let Some(old) = overlay.side(self.problem, row, direction).cloned() else {
            return Ok(());
        };
        if overlay.side(self.problem, row, !direction).is_none() {
            // Both sides infinite: the row no longer constrains.
            overlay.redundant_rows.insert(row);
        }
        overlay.set_side(row, direction, None);
        modified_rows.insert(row);
        ops.push(Op::MarkRowSideInf { row, direction, old });
        Ok(())
    }

    fn validate_bound(
        &self,
        col: usize,
        direction: BoundDirection,
        value: &R,
        overlay: &mut Overlay<R>,
        ops: &mut Vec<Op<R>>,
        modified_cols: &mut HashSet<usize>,
    ) -> Result<(), Verdict> {
        if !overlay.is_col_active(self.problem, col) {
            return Err(Verdict::Reject);
        }

        // Bounds written to integer columns round inward.
        let value = if self.problem.col_flags(col).rounds_to_integer() {
            match direction {
                BoundDirection::Lower => self.num.ceil(value),
                BoundDirection::Upper => self.num.floor(value),
            }
        } else {
            value.clone()
        };

        // Only strict tightenings survive.
        if let Some(existing) = overlay.bound(self.problem, col, direction) {
            let tightens = match direction {
                BoundDirection::Lower => self.num.is_lt(existing, &value),
                BoundDirection::Upper => self.num.is_lt(&value, existing),
            };
            if !tightens {
                return Ok(());
            }
        }

        if let Some(opposite) = overlay.bound(self.problem, col, !direction) {
            let crosses = match direction {
                BoundDirection::Lower => &value > opposite,
                BoundDirection::Upper => &value < opposite,
            };
            if crosses {
                if !self.num.is_feas_eq(&value, opposite) {
                    return Err(Verdict::Infeasible);
                }
                // Crossing within the tolerance collapses the domain to its midpoint.
                let two = R::one() + R::one();
                let fixed = self.rounded_for(col, &(&(&value + opposite) / &two));
                return self.plan_fix(col, fixed, overlay, ops, modified_cols);
            }
            if self.num.is_eq(&value, opposite) {
                let fixed = self.rounded_for(col, &value);
                return self.plan_fix(col, fixed, overlay, ops, modified_cols);
            }
        }

        let old = overlay.bound(self.problem, col, direction).cloned();
        overlay.set_bound(col, direction, Some(value.clone()));
        modified_cols.insert(col);
        ops.push(Op::SetColBound { col, direction, value, old });
        Ok(())
    }

    fn validate_fix(
        &self,
        col: usize,
        value: &R,
        overlay: &mut Overlay<R>,
        ops: &mut Vec<Op<R>>,
        modified_cols: &mut HashSet<usize>,
    ) -> Result<(), Verdict> {
        if overlay.inactive_cols.contains(&col) || self.problem.col_flags(col).substituted() {
            return Err(Verdict::Reject);
        }
        if self.problem.col_flags(col).rounds_to_integer() && !self.num.is_integral(value) {
            // A non integer value offered to an integer column.
            return Err(Verdict::Reject);
        }
        let value = self.rounded_for(col, value);

        if let Some(existing) = overlay.fixed_value(self.problem, col) {
            return if self.num.is_eq(existing, &value) {
                // Fixing to the same value again is a no-op.
                Ok(())
            } else {
                Err(Verdict::Reject)
            };
        }

        // The value must lie within the current domain; a stale fixation is a conflict, not an
        // error.
        let inside = overlay.bound(self.problem, col, BoundDirection::Lower)
            .map_or(true, |lower| self.num.is_feas_le(lower, &value))
            && overlay.bound(self.problem, col, BoundDirection::Upper)
                .map_or(true, |upper| self.num.is_feas_le(&value, upper));
        if !inside {
            return Err(Verdict::Reject);
        }

        self.plan_fix(col, value, overlay, ops, modified_cols)
    }

    fn plan_fix(
        &self,
        col: usize,
        value: R,
        overlay: &mut Overlay<R>,
        ops: &mut Vec<Op<R>>,
        modified_cols: &mut HashSet<usize>,
    ) -> Result<(), Verdict> {
        if let Some(existing) = overlay.fixed_value(self.problem, col) {
            return if self.num.is_eq(existing, &value) {
                Ok(())
            } else {
                Err(Verdict::Reject)
            };
        }

        overlay.fixed.insert(col, value.clone());
        modified_cols.insert(col);
        ops.push(Op::FixCol { col, value });
        Ok(())
    }

    fn rounded_for(&self, col: usize, value: &R) -> R {
        if self.problem.col_flags(col).rounds_to_integer() && self.num.is_integral(value) {
            self.num.round(value)
        } else {
            value.clone()
        }
    }

    fn validate_fix_infinity(
        &self,
        col: usize,
        positive: bool,
        overlay: &mut Overlay<R>,
        ops: &mut Vec<Op<R>>,
        modified_cols: &mut HashSet<usize>,
    ) -> Result<(), Verdict> {
        if !overlay.is_col_active(self.problem, col) {
            return Err(Verdict::Reject);
        }
        // Only a column without objective influence can take an arbitrary large value.
        if !self.num.is_zero(self.problem.objective_coefficient(col)) {
            return Err(Verdict::Reject);
        }
        // The bound in the escape direction must be infinite.
        let escape = if positive { BoundDirection::Upper } else { BoundDirection::Lower };
        if overlay.bound(self.problem, col, escape).is_some() {
            return Err(Verdict::Reject);
        }
        // Every incident row must have been marked redundant by this transaction's body (or
        // before it); the redundancy records are part of the body, never of the lock prefix.
        let covered = self.problem.column(col).iter()
            .all(|(row, _)| overlay.is_row_redundant(self.problem, *row));
        if !covered {
            return Err(Verdict::Reject);
        }

        overlay.inactive_cols.insert(col);
        modified_cols.insert(col);
        ops.push(Op::FixColInfinity { col, positive });
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn validate_substitute(
        &self,
        col: usize,
        eq: usize,
        objective_only: bool,
        overlay: &mut Overlay<R>,
        ops: &mut Vec<Op<R>>,
        modified_rows: &mut HashSet<usize>,
        modified_cols: &mut HashSet<usize>,
    ) -> Result<(), Verdict> {
        if !overlay.is_col_active(self.problem, col) {
            return Err(Verdict::Reject);
        }
        if !self.is_usable_equality(eq, overlay) {
            return Err(Verdict::Reject);
        }
        let Some(coefficient) = overlay.coefficient(self.problem, eq, col) else {
            return Err(Verdict::Reject);
        };
        if self.num.is_zero(coefficient) {
            return Err(Verdict::Reject);
        }

        if self.certificate.requires_integral_coefficients() {
            let integral = self.problem.column(col).iter()
                .filter(|(row, _)| *row != eq)
                .all(|(_, value)| self.num.is_integral(&(value / coefficient)));
            if !integral {
                return Err(Verdict::Reject);
            }
        }

        if objective_only {
            modified_cols.insert(col);
        } else {
            overlay.inactive_cols.insert(col);
            overlay.redundant_rows.insert(eq);
            modified_rows.insert(eq);
            modified_cols.insert(col);
            for (row, _) in self.problem.column(col) {
                modified_rows.insert(*row);
            }
            for (other, _) in self.problem.row(eq) {
                modified_cols.insert(*other);
            }
        }
        ops.push(Op::Substitute { col, eq, objective_only });
        Ok(())
    }

    fn is_usable_equality(&self, eq: usize, overlay: &Overlay<R>) -> bool {
        if overlay.is_row_redundant(self.problem, eq) {
            return false;
        }
        match (
            overlay.side(self.problem, eq, BoundDirection::Lower),
            overlay.side(self.problem, eq, BoundDirection::Upper),
        ) {
            (Some(lhs), Some(rhs)) => self.num.is_eq(lhs, rhs),
            _ => false,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn validate_replace(
        &self,
        col: usize,
        replacement: usize,
        factor: &R,
        offset: &R,
        overlay: &mut Overlay<R>,
        ops: &mut Vec<Op<R>>,
        modified_rows: &mut HashSet<usize>,
        modified_cols: &mut HashSet<usize>,
    ) -> Result<(), Verdict> {
        if col == replacement
            || !overlay.is_col_active(self.problem, col)
            || !overlay.is_col_active(self.problem, replacement)
            || self.num.is_zero(factor)
        {
            return Err(Verdict::Reject);
        }

        overlay.inactive_cols.insert(col);
        modified_cols.insert(col);
        modified_cols.insert(replacement);
        for (row, _) in self.problem.column(col) {
            modified_rows.insert(*row);
        }
        ops.push(Op::Replace {
            col,
            replacement,
            factor: factor.clone(),
            offset: offset.clone(),
        });
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn validate_parallel(
        &self,
        col1: usize,
        col2: usize,
        overlay: &mut Overlay<R>,
        ops: &mut Vec<Op<R>>,
        modified_rows: &mut HashSet<usize>,
        modified_cols: &mut HashSet<usize>,
    ) -> Result<(), Verdict> {
        if col1 == col2
            || !overlay.is_col_active(self.problem, col1)
            || !overlay.is_col_active(self.problem, col2)
        {
            return Err(Verdict::Reject);
        }

        // The supports must coincide with a consistent coefficient ratio.
        let first = self.problem.column(col1);
        let second = self.problem.column(col2);
        if first.len() != second.len() || first.is_empty() {
            return Err(Verdict::Reject);
        }
        let factor = &first[0].1 / &second[0].1;
        for ((row1, value1), (row2, value2)) in first.iter().zip(second) {
            if row1 != row2 || !self.num.is_eq(value1, &(&factor * value2)) {
                return Err(Verdict::Reject);
            }
        }
        // The merge keeps col2's objective coefficient, which requires consistency.
        let consistent = self.num.is_eq(
            self.problem.objective_coefficient(col1),
            &(&factor * self.problem.objective_coefficient(col2)),
        );
        if !consistent {
            return Err(Verdict::Reject);
        }

        overlay.inactive_cols.insert(col1);
        modified_cols.insert(col1);
        modified_cols.insert(col2);
        for (row, _) in first {
            modified_rows.insert(*row);
        }
        ops.push(Op::Parallel { col1, col2, factor });
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn validate_sparsify(
        &self,
        eq: usize,
        nr_rows: usize,
        log: &Reductions<R>,
        index: &mut usize,
        end: usize,
        overlay: &mut Overlay<R>,
        ops: &mut Vec<Op<R>>,
        modified_rows: &mut HashSet<usize>,
        modified_cols: &mut HashSet<usize>,
    ) -> Result<(), Verdict> {
        if *index + nr_rows > end {
            debug_assert!(false, "sparsify header without its continuation records");
            return Err(Verdict::Reject);
        }
        let mut candidates = Vec::with_capacity(nr_rows);
        for _ in 0..nr_rows {
            let continuation = log.reduction(*index);
            *index += 1;
            if RowOp::from_sentinel(continuation.col) != Some(RowOp::None) || continuation.row < 0 {
                debug_assert!(false, "malformed sparsify continuation");
                return Err(Verdict::Reject);
            }
            candidates.push((continuation.row as usize, continuation.new_value.clone()));
        }

        if !self.is_usable_equality(eq, overlay) {
            return Err(Verdict::Reject);
        }

        // Verify the intended cancellation numerically; rows where it fails are skipped, not
        // rejected wholesale.
        let mut scaled_rows = Vec::with_capacity(candidates.len());
        for (row, scale) in candidates {
            if row == eq || overlay.is_row_redundant(self.problem, row) {
                continue;
            }
            if self.certificate.requires_integral_coefficients() && !self.num.is_integral(&scale) {
                continue;
            }
            let cancels = self.problem.row(eq).iter().any(|(k, eq_value)| {
                self.problem.coefficient(row, *k)
                    .is_some_and(|value| self.num.is_zero(&(value - &(&scale * eq_value))))
            });
            if !cancels {
                continue;
            }

            modified_rows.insert(row);
            for (k, _) in self.problem.row(eq) {
                modified_cols.insert(*k);
            }
            scaled_rows.push((row, scale));
        }

        if scaled_rows.is_empty() {
            return Ok(());
        }
        ops.push(Op::Sparsify { eq, scaled_rows });
        Ok(())
    }

    // Application of validated operations.

    fn apply_op(&mut self, op: Op<R>, tally: &mut RoundTally) -> Result<(), Infeasible> {
        match op {
            Op::SetRowSide { row, direction, value, old } => {
                self.postsolve.push(PostsolveEntry::RowSideChange { row, direction, old });
                match direction {
                    BoundDirection::Lower => self.problem.set_row_lhs(row, value.clone()),
                    BoundDirection::Upper => self.problem.set_row_rhs(row, value.clone()),
                }
                self.certificate.row_side_change(self.problem, row, direction, Some(&value));
                Ok(())
            },
            Op::MarkRowSideInf { row, direction, old } => {
                self.postsolve.push(PostsolveEntry::RowSideChange { row, direction, old: Some(old) });
                match direction {
                    BoundDirection::Lower => self.problem.mark_row_lhs_inf(row),
                    BoundDirection::Upper => self.problem.mark_row_rhs_inf(row),
                }
                self.certificate.row_side_change(self.problem, row, direction, None);
                if self.problem.row_flags(row).redundant() {
                    tally.rows_deleted += 1;
                }
                Ok(())
            },
            Op::MarkRowRedundant { row } => {
                // An earlier operation of the same transaction may already have retired the row
                // when it lost its last coefficient.
                if !self.problem.row_flags(row).redundant() {
                    self.retire_row(row);
                    tally.rows_deleted += 1;
                }
                Ok(())
            },
            Op::SetColBound { col, direction, value, old } => {
                self.postsolve.push(PostsolveEntry::BoundChange { col, direction, old });
                match direction {
                    BoundDirection::Lower => self.problem.set_col_lb(col, value.clone()),
                    BoundDirection::Upper => self.problem.set_col_ub(col, value.clone()),
                }
                self.certificate.bound_change(self.problem, col, direction, &value);
                Ok(())
            },
            Op::FixCol { col, value } => self.apply_fix(col, value, tally),
            Op::FixColInfinity { col, positive } => {
                let rows = self.problem.column(col).iter()
                    .map(|&(row, _)| self.snapshot_row(row))
                    .collect::<Vec<_>>();
                self.postsolve.push(PostsolveEntry::FixedInfiniteColumn {
                    col,
                    positive,
                    integral: self.problem.col_flags(col).rounds_to_integer(),
                    rows,
                });
                for (row, _) in self.problem.column(col).to_vec() {
                    self.problem.set_matrix_entry(row, col, None);
                }
                // The slot keeps a placeholder domain until compression removes it; postsolve
                // computes the actual finite value.
                self.problem.fix_col(col, R::zero());
                tally.cols_deleted += 1;
                Ok(())
            },
            Op::SetCoefficient { row, col, value, old } => {
                self.postsolve.push(PostsolveEntry::CoefficientChange { row, col, old });
                let deleting = value.is_none();
                self.problem.set_matrix_entry(row, col, value);
                self.certificate.coefficient_changed(self.problem, row, col);
                tally.coefficients_changed += 1;
                if deleting && self.problem.row(row).is_empty() {
                    self.retire_empty_row(row, tally)?;
                }
                Ok(())
            },
            Op::Substitute { col, eq, objective_only } => {
                self.apply_substitute(col, eq, objective_only, tally)
            },
            Op::Replace { col, replacement, factor, offset } => {
                self.apply_replace(col, replacement, factor, offset, tally)
            },
            Op::Parallel { col1, col2, factor } => self.apply_parallel(col1, col2, factor, tally),
            Op::ImplInt { col } => {
                self.postsolve.push(PostsolveEntry::ImpliedInteger { col });
                self.problem.mark_implied_integer(col);
                Ok(())
            },
            Op::Sparsify { eq, scaled_rows } => self.apply_sparsify(eq, scaled_rows, tally),
        }
    }

    fn snapshot_row(&self, row: usize) -> RowSnapshot<R> {
        RowSnapshot {
            row,
            coefficients: self.problem.row(row).to_vec(),
            lhs: self.problem.lhs(row).cloned(),
            rhs: self.problem.rhs(row).cloned(),
        }
    }

    /// Mark a row redundant, recording its contents for dual recovery.
    fn retire_row(&mut self, row: usize) {
        let snapshot = self.snapshot_row(row);
        self.postsolve.push(PostsolveEntry::RedundantRow { row: snapshot });
        self.problem.mark_row_redundant(row);
        self.certificate.row_redundant(self.problem, row);
    }

    /// A row that lost its last coefficient either never constrains again or proves the problem
    /// infeasible.
    fn retire_empty_row(&mut self, row: usize, tally: &mut RoundTally) -> Result<(), Infeasible> {
        if self.problem.row_flags(row).redundant() {
            return Ok(());
        }
        let zero = R::zero();
        let feasible = self.problem.lhs(row).map_or(true, |lhs| self.num.is_feas_le(lhs, &zero))
            && self.problem.rhs(row).map_or(true, |rhs| self.num.is_feas_le(&zero, rhs));
        if !feasible {
            return Err(Infeasible);
        }
        self.retire_row(row);
        tally.rows_deleted += 1;
        Ok(())
    }

    fn apply_fix(&mut self, col: usize, value: R, tally: &mut RoundTally) -> Result<(), Infeasible> {
        let support = self.problem.column(col).to_vec();
        self.postsolve.push(PostsolveEntry::FixedColumn {
            col,
            value: value.clone(),
            support: support.clone(),
            cost: self.problem.objective_coefficient(col).clone(),
        });

        let cost_change = self.problem.objective_coefficient(col) * &value;
        self.problem.add_objective_offset(cost_change);
        self.problem.fix_col(col, value.clone());
        self.certificate.fixed_column(self.problem, col, &value);

        // Eliminate the column from every row of its support.
        for (row, coefficient) in support {
            let change = &coefficient * &value;
            if let Some(lhs) = self.problem.lhs(row) {
                let new = lhs - &change;
                self.problem.set_row_lhs(row, new);
            }
            if let Some(rhs) = self.problem.rhs(row) {
                let new = rhs - &change;
                self.problem.set_row_rhs(row, new);
            }
            self.problem.set_matrix_entry(row, col, None);
            if self.problem.row(row).is_empty() {
                self.retire_empty_row(row, tally)?;
            }
        }
        tally.cols_deleted += 1;
        Ok(())
    }

    /// Subtract `scale` times the equality row from a target row, in the matrix and the sides.
    fn combine_into_row(
        &mut self,
        target: usize,
        eq_coefficients: &SparseTupleVec<R>,
        eq_side: &R,
        eq: usize,
        scale: &R,
        cancelled_col: Option<usize>,
        tally: &mut RoundTally,
    ) -> Result<(), Infeasible> {
        for (k, eq_value) in eq_coefficients {
            if Some(*k) == cancelled_col {
                self.problem.set_matrix_entry(target, *k, None);
                continue;
            }
            let new = match self.problem.coefficient(target, *k) {
                Some(existing) => existing - &(scale * eq_value),
                None => -(scale * eq_value),
            };
            if self.num.is_zero(&new) {
                self.problem.set_matrix_entry(target, *k, None);
            } else {
                self.problem.set_matrix_entry(target, *k, Some(new));
            }
        }

        let change = scale * eq_side;
        if let Some(lhs) = self.problem.lhs(target) {
            let new = lhs - &change;
            self.problem.set_row_lhs(target, new);
        }
        if let Some(rhs) = self.problem.rhs(target) {
            let new = rhs - &change;
            self.problem.set_row_rhs(target, new);
        }

        self.certificate.linear_combination(self.problem, target, eq, scale);
        if self.problem.row(target).is_empty() {
            self.retire_empty_row(target, tally)?;
        }
        Ok(())
    }

    fn apply_substitute(
        &mut self,
        col: usize,
        eq: usize,
        objective_only: bool,
        tally: &mut RoundTally,
    ) -> Result<(), Infeasible> {
        let snapshot = self.snapshot_row(eq);
        let side = snapshot.rhs.clone()
            .or_else(|| snapshot.lhs.clone())
            .expect("validated equality row has a side");
        let coefficient = snapshot.coefficients.iter()
            .find(|(k, _)| *k == col)
            .map(|(_, value)| value.clone())
            .expect("validated substitution column appears in its equality row");

        if objective_only {
            self.postsolve.push(PostsolveEntry::SubstitutedObjective { col, row: snapshot.clone() });
        } else {
            self.postsolve.push(PostsolveEntry::SubstitutedColumn { col, row: snapshot.clone() });
        }

        // Rewrite the objective: `x_col = (side - <rest, x>) / coefficient`.
        let cost = self.problem.objective_coefficient(col).clone();
        if !self.num.is_zero(&cost) {
            let scale = &cost / &coefficient;
            for (k, eq_value) in &snapshot.coefficients {
                if *k == col {
                    continue;
                }
                let new = self.problem.objective_coefficient(*k) - &(&scale * eq_value);
                self.problem.set_objective_coefficient(*k, new);
            }
            self.problem.add_objective_offset(&scale * &side);
            self.problem.set_objective_coefficient(col, R::zero());
        }
        if objective_only {
            return Ok(());
        }

        // Rewrite every other row of the column's support.
        for (row, value) in self.problem.column(col).to_vec() {
            if row == eq {
                continue;
            }
            let scale = &value / &coefficient;
            self.combine_into_row(
                row, &snapshot.coefficients, &side, eq, &scale, Some(col), tally,
            )?;
        }

        // The equality row is consumed by the substitution.
        self.problem.set_matrix_entry(eq, col, None);
        self.problem.mark_row_redundant(eq);
        self.certificate.row_redundant(self.problem, eq);
        self.problem.mark_col_substituted(col);
        tally.rows_deleted += 1;
        tally.cols_deleted += 1;
        Ok(())
    }

    fn apply_replace(
        &mut self,
        col: usize,
        replacement: usize,
        factor: R,
        offset: R,
        tally: &mut RoundTally,
    ) -> Result<(), Infeasible> {
        self.postsolve.push(PostsolveEntry::ReplacedColumn {
            col,
            replacement,
            factor: factor.clone(),
            offset: offset.clone(),
        });

        // `x_col = factor * x_replacement + offset` in every row of the support.
        for (row, value) in self.problem.column(col).to_vec() {
            let merged = match self.problem.coefficient(row, replacement) {
                Some(existing) => existing + &(&value * &factor),
                None => &value * &factor,
            };
            if self.num.is_zero(&merged) {
                self.problem.set_matrix_entry(row, replacement, None);
            } else {
                self.problem.set_matrix_entry(row, replacement, Some(merged));
            }
            self.problem.set_matrix_entry(row, col, None);

            let change = &value * &offset;
            if let Some(lhs) = self.problem.lhs(row) {
                let new = lhs - &change;
                self.problem.set_row_lhs(row, new);
            }
            if let Some(rhs) = self.problem.rhs(row) {
                let new = rhs - &change;
                self.problem.set_row_rhs(row, new);
            }
            self.certificate.coefficient_changed(self.problem, row, replacement);
            if self.problem.row(row).is_empty() {
                self.retire_empty_row(row, tally)?;
            }
        }

        // In the objective.
        let cost = self.problem.objective_coefficient(col).clone();
        if !self.num.is_zero(&cost) {
            let new = self.problem.objective_coefficient(replacement) + &(&cost * &factor);
            self.problem.set_objective_coefficient(replacement, new);
            self.problem.add_objective_offset(&cost * &offset);
            self.problem.set_objective_coefficient(col, R::zero());
        }

        // The bounds of the removed column restrict the replacement through the affine map.
        let positive = factor > R::zero();
        let implied = |bound: Option<&R>| bound.map(|value| &(value - &offset) / &factor);
        let (implied_lower, implied_upper) = if positive {
            (
                implied(self.problem.lower_bound(col)),
                implied(self.problem.upper_bound(col)),
            )
        } else {
            (
                implied(self.problem.upper_bound(col)),
                implied(self.problem.lower_bound(col)),
            )
        };
        if let Some(implied_lower) = implied_lower {
            let tightens = self.problem.lower_bound(replacement)
                .map_or(true, |existing| self.num.is_lt(existing, &implied_lower));
            if tightens {
                self.problem.set_col_lb(replacement, implied_lower);
            }
        }
        if let Some(implied_upper) = implied_upper {
            let tightens = self.problem.upper_bound(replacement)
                .map_or(true, |existing| self.num.is_lt(&implied_upper, existing));
            if tightens {
                self.problem.set_col_ub(replacement, implied_upper);
            }
        }

        self.problem.mark_col_substituted(col);
        tally.cols_deleted += 1;

        // The implied bounds may have collapsed the replacement's domain.
        if self.problem.col_flags(replacement).fixed() {
            let value = self.problem.lower_bound(replacement).cloned()
                .expect("a fixed column has finite bounds");
            self.apply_fix(replacement, value, tally)?;
        }
        Ok(())
    }

    fn apply_parallel(
        &mut self,
        col1: usize,
        col2: usize,
        factor: R,
        tally: &mut RoundTally,
    ) -> Result<(), Infeasible> {
        self.postsolve.push(PostsolveEntry::ParallelColumns {
            col1,
            col2,
            factor: factor.clone(),
            col1_bounds: (
                self.problem.lower_bound(col1).cloned(),
                self.problem.upper_bound(col1).cloned(),
            ),
            col1_integral: self.problem.col_flags(col1).rounds_to_integer(),
        });

        // The merged variable `y = x2 + factor * x1` reuses col2's coefficients verbatim; only
        // its domain widens.
        let positive = factor > R::zero();
        let (shift_lower, shift_upper) = if positive {
            (self.problem.lower_bound(col1).cloned(), self.problem.upper_bound(col1).cloned())
        } else {
            (self.problem.upper_bound(col1).cloned(), self.problem.lower_bound(col1).cloned())
        };
        match (self.problem.lower_bound(col2).cloned(), shift_lower) {
            (Some(own), Some(shift)) => {
                let new = own + &factor * &shift;
                self.problem.set_col_lb(col2, new);
            },
            _ => self.problem.mark_col_lb_inf(col2),
        }
        match (self.problem.upper_bound(col2).cloned(), shift_upper) {
            (Some(own), Some(shift)) => {
                let new = own + &factor * &shift;
                self.problem.set_col_ub(col2, new);
            },
            _ => self.problem.mark_col_ub_inf(col2),
        }

        for (row, _) in self.problem.column(col1).to_vec() {
            self.problem.set_matrix_entry(row, col1, None);
        }
        self.problem.set_objective_coefficient(col1, R::zero());
        self.problem.mark_col_substituted(col1);
        tally.cols_deleted += 1;

        // The merged domain may be a single point.
        if self.problem.col_flags(col2).fixed() {
            let value = self.problem.lower_bound(col2).cloned()
                .expect("a fixed column has finite bounds");
            self.apply_fix(col2, value, tally)?;
        }
        Ok(())
    }

    fn apply_sparsify(
        &mut self,
        eq: usize,
        scaled_rows: Vec<(usize, R)>,
        tally: &mut RoundTally,
    ) -> Result<(), Infeasible> {
        let snapshot = self.snapshot_row(eq);
        let side = snapshot.rhs.clone()
            .or_else(|| snapshot.lhs.clone())
            .expect("validated equality row has a side");
        self.postsolve.push(PostsolveEntry::SparsifiedRows {
            eq: snapshot.clone(),
            scaled_rows: scaled_rows.clone(),
        });

        for (row, scale) in scaled_rows {
            self.combine_into_row(
                row, &snapshot.coefficients, &side, eq, &scale, None, tally,
            )?;
        }
        Ok(())
    }
}
