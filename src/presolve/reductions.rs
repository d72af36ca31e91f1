//! # The reduction log
//!
//! Presolve methods do not modify the problem; they append typed reduction records to a private
//! log, grouped into transactions. The applier later validates each transaction against the
//! current problem and either applies all of its records or none of them.
//!
//! A record is a triple `(new_value, row, col)`. The operation is encoded in the signs: a record
//! with two non negative indices changes a matrix coefficient, a negative `col` holds a
//! [`RowOp`] sentinel for a row operation, and a negative `row` holds a [`ColOp`] sentinel for a
//! column operation. Lock records declare a dependency on the pre transaction state of an entity
//! and must form a prefix of their transaction.
//!
//! Misusing the log (nesting transactions, ending an empty one, emitting a lock after a non lock
//! record) is a programmer error and panics.
use crate::data::number_types::Real;

/// Sentinel values for row operations, stored in the `col` field of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum RowOp {
    /// Continuation record of a multi record operation; the `row` field and value are
    /// interpreted by the operation that precedes it.
    None = -1,
    /// Set the right hand side to the value.
    Rhs = -2,
    /// Set the left hand side to the value.
    Lhs = -3,
    /// The row no longer constrains.
    Redundant = -4,
    /// Lock against modifications that came before this transaction.
    Locked = -5,
    /// Lock against modifications before and, by reservation, after this transaction.
    LockedStrong = -6,
    /// Mark the right hand side infinite.
    RhsInf = -7,
    /// Mark the left hand side infinite.
    LhsInf = -8,
    /// Header of a sparsify group; the value holds the number of continuation records.
    Sparsify = -9,
}

impl RowOp {
    pub fn from_sentinel(value: i32) -> Option<Self> {
        match value {
            -1 => Some(Self::None),
            -2 => Some(Self::Rhs),
            -3 => Some(Self::Lhs),
            -4 => Some(Self::Redundant),
            -5 => Some(Self::Locked),
            -6 => Some(Self::LockedStrong),
            -7 => Some(Self::RhsInf),
            -8 => Some(Self::LhsInf),
            -9 => Some(Self::Sparsify),
            _ => None,
        }
    }
}

/// Sentinel values for column operations, stored in the `row` field of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ColOp {
    /// Continuation record of a multi record operation.
    None = -1,
    /// Tighten the lower bound to the value.
    LowerBound = -3,
    /// Tighten the upper bound to the value.
    UpperBound = -4,
    /// Fix the column to the value.
    Fixed = -5,
    /// Lock against modifications that came before this transaction.
    Locked = -6,
    /// Lock against modifications before and, by reservation, after this transaction.
    LockedStrong = -7,
    /// Substitute the column throughout the problem using the equality row whose index is
    /// encoded in the value.
    Substitute = -8,
    /// Lock the column bounds against modification.
    BoundsLocked = -9,
    /// Replace the column by an affine expression of another; a continuation record follows.
    Replace = -10,
    /// Substitute the column in the objective only, using the equality row encoded in the value.
    SubstituteObj = -11,
    /// Merge with the parallel column whose index is encoded in the value.
    Parallel = -12,
    /// Mark the column implied integer.
    ImplInt = -13,
    /// Fix at plus or minus infinity; the value is `+1` or `-1`. All incident rows must be
    /// marked redundant by body records of the same transaction.
    FixedInfinity = -14,
}

impl ColOp {
    pub fn from_sentinel(value: i32) -> Option<Self> {
        match value {
            -1 => Some(Self::None),
            -3 => Some(Self::LowerBound),
            -4 => Some(Self::UpperBound),
            -5 => Some(Self::Fixed),
            -6 => Some(Self::Locked),
            -7 => Some(Self::LockedStrong),
            -8 => Some(Self::Substitute),
            -9 => Some(Self::BoundsLocked),
            -10 => Some(Self::Replace),
            -11 => Some(Self::SubstituteObj),
            -12 => Some(Self::Parallel),
            -13 => Some(Self::ImplInt),
            -14 => Some(Self::FixedInfinity),
            _ => None,
        }
    }
}

/// A single reduction record.
#[derive(Debug, Clone, PartialEq)]
pub struct Reduction<R> {
    /// Value stored in the reduction; its meaning depends on the operation.
    pub new_value: R,
    /// Index of the row, or a [`ColOp`] sentinel for column operations.
    pub row: i32,
    /// Index of the column, or a [`RowOp`] sentinel for row operations.
    pub col: i32,
}

impl<R> Reduction<R> {
    /// Whether this record is a lock.
    pub fn is_lock(&self) -> bool {
        if self.col < 0 {
            matches!(
                RowOp::from_sentinel(self.col),
                Some(RowOp::Locked | RowOp::LockedStrong),
            )
        } else if self.row < 0 {
            matches!(
                ColOp::from_sentinel(self.row),
                Some(ColOp::Locked | ColOp::LockedStrong | ColOp::BoundsLocked),
            )
        } else {
            false
        }
    }
}

/// An atomic group of records, delimited as `[start, end)` in the log.
///
/// All lock records of a transaction precede all other records; `nlocks` is the length of that
/// prefix. A transaction whose emission was never completed has no `end` and is discarded by the
/// applier. The number of coefficient additions that introduce new nonzeros is derived by the
/// applier during validation and reported in its tallies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transaction {
    pub start: usize,
    pub end: Option<usize>,
    pub nlocks: usize,
}

/// Per presolver append only buffer of reduction records with a parallel transaction list.
///
/// Single record operations that are emitted outside a transaction wrap themselves in an
/// implicit one. Multi record operations (`replace_col`, `sparsify`, the infinity fixes) open a
/// transaction themselves when none is open.
#[derive(Debug, Clone, PartialEq)]
pub struct Reductions<R> {
    reductions: Vec<Reduction<R>>,
    transactions: Vec<Transaction>,
}

impl<R: Real> Default for Reductions<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Real> Reductions<R> {
    pub fn new() -> Self {
        Self {
            reductions: Vec::new(),
            transactions: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.reductions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reductions.is_empty()
    }

    pub fn clear(&mut self) {
        self.reductions.clear();
        self.transactions.clear();
    }

    pub fn reduction(&self, index: usize) -> &Reduction<R> {
        &self.reductions[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Reduction<R>> {
        self.reductions.iter()
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    fn open_transaction(&self) -> Option<usize> {
        match self.transactions.last() {
            Some(transaction) if transaction.end.is_none() => Some(self.transactions.len() - 1),
            _ => None,
        }
    }

    /// Open a transaction.
    ///
    /// # Panics
    ///
    /// When a transaction is already open (`NestedTransaction`).
    pub fn start_transaction(&mut self) {
        assert!(
            self.open_transaction().is_none(),
            "NestedTransaction: a transaction is already open",
        );

        self.transactions.push(Transaction {
            start: self.reductions.len(),
            end: None,
            nlocks: 0,
        });
    }

    /// Close the open transaction.
    ///
    /// # Panics
    ///
    /// When no transaction is open, or when nothing was appended to it (`EmptyTransaction`).
    pub fn end_transaction(&mut self) {
        let index = self.open_transaction().expect("no transaction is open");
        assert_ne!(
            self.transactions[index].start, self.reductions.len(),
            "EmptyTransaction: nothing was appended to the transaction",
        );

        self.transactions[index].end = Some(self.reductions.len());
    }

    /// Open a transaction that is closed again on every exit path of the enclosing scope.
    pub fn transaction(&mut self) -> TransactionGuard<'_, R> {
        TransactionGuard::new(self)
    }

    /// Append a record, wrapping it in an implicit transaction when none is open.
    fn push_atomic(&mut self, reduction: Reduction<R>) {
        match self.open_transaction() {
            Some(_) => self.reductions.push(reduction),
            None => {
                self.start_transaction();
                self.reductions.push(reduction);
                self.end_transaction();
            },
        }
    }

    /// Append a lock record.
    ///
    /// # Panics
    ///
    /// When no transaction is open, or when a non lock record was already appended to it
    /// (`LocksMustPrecede`).
    fn push_lock(&mut self, reduction: Reduction<R>) {
        let index = self.open_transaction().expect("locks are only valid inside a transaction");
        let transaction = &self.transactions[index];
        assert_eq!(
            transaction.start + transaction.nlocks, self.reductions.len(),
            "LocksMustPrecede: a non lock record was already appended to this transaction",
        );

        self.reductions.push(reduction);
        self.transactions[index].nlocks += 1;
    }

    // Matrix operations.

    pub fn change_matrix_entry(&mut self, row: usize, col: usize, new_value: R) {
        self.push_atomic(Reduction { new_value, row: row as i32, col: col as i32 });
    }

    // Row operations.

    pub fn change_row_lhs(&mut self, row: usize, new_value: R) {
        self.push_atomic(Reduction { new_value, row: row as i32, col: RowOp::Lhs as i32 });
    }

    pub fn change_row_rhs(&mut self, row: usize, new_value: R) {
        self.push_atomic(Reduction { new_value, row: row as i32, col: RowOp::Rhs as i32 });
    }

    pub fn change_row_lhs_inf(&mut self, row: usize) {
        self.push_atomic(Reduction { new_value: R::zero(), row: row as i32, col: RowOp::LhsInf as i32 });
    }

    pub fn change_row_rhs_inf(&mut self, row: usize) {
        self.push_atomic(Reduction { new_value: R::zero(), row: row as i32, col: RowOp::RhsInf as i32 });
    }

    pub fn mark_row_redundant(&mut self, row: usize) {
        self.push_atomic(Reduction { new_value: R::zero(), row: row as i32, col: RowOp::Redundant as i32 });
    }

    /// Lock a row: modifications that came before this transaction are conflicting, but not
    /// modifications that come after it.
    pub fn lock_row(&mut self, row: usize) {
        self.push_lock(Reduction { new_value: R::zero(), row: row as i32, col: RowOp::Locked as i32 });
    }

    /// Lock a row strongly: modifications before or after this transaction are conflicting.
    pub fn lock_row_strong(&mut self, row: usize) {
        self.push_lock(Reduction { new_value: R::zero(), row: row as i32, col: RowOp::LockedStrong as i32 });
    }

    /// Direct the applier to subtract `scale` times the equality row `eq` from each listed row,
    /// cancelling coefficients.
    pub fn sparsify(&mut self, eq: usize, scaled_rows: &[(usize, R)]) {
        let wrap = self.open_transaction().is_none();
        if wrap {
            self.start_transaction();
        }
        self.reductions.push(Reduction {
            new_value: R::from_f64(scaled_rows.len() as f64).expect("row count is finite"),
            row: eq as i32,
            col: RowOp::Sparsify as i32,
        });
        for (row, scale) in scaled_rows {
            self.reductions.push(Reduction {
                new_value: scale.clone(),
                row: *row as i32,
                col: RowOp::None as i32,
            });
        }
        if wrap {
            self.end_transaction();
        }
    }

    // Column operations.

    pub fn change_col_lb(&mut self, col: usize, new_value: R) {
        self.push_atomic(Reduction { new_value, row: ColOp::LowerBound as i32, col: col as i32 });
    }

    pub fn change_col_ub(&mut self, col: usize, new_value: R) {
        self.push_atomic(Reduction { new_value, row: ColOp::UpperBound as i32, col: col as i32 });
    }

    pub fn fix_col(&mut self, col: usize, value: R) {
        self.push_atomic(Reduction { new_value: value, row: ColOp::Fixed as i32, col: col as i32 });
    }

    /// Fix a column at plus infinity.
    ///
    /// All incident rows are marked redundant by body records of the same transaction, before
    /// the closing `FixedInfinity` record.
    pub fn fix_col_positive_infinity(&mut self, col: usize, incident_rows: &[usize]) {
        self.fix_col_infinity(col, incident_rows, R::one());
    }

    /// Fix a column at minus infinity. See [`Self::fix_col_positive_infinity`].
    pub fn fix_col_negative_infinity(&mut self, col: usize, incident_rows: &[usize]) {
        self.fix_col_infinity(col, incident_rows, -R::one());
    }

    fn fix_col_infinity(&mut self, col: usize, incident_rows: &[usize], sign: R) {
        let wrap = self.open_transaction().is_none();
        if wrap {
            self.start_transaction();
        }
        for &row in incident_rows {
            self.reductions.push(Reduction {
                new_value: R::zero(),
                row: row as i32,
                col: RowOp::Redundant as i32,
            });
        }
        self.reductions.push(Reduction {
            new_value: sign,
            row: ColOp::FixedInfinity as i32,
            col: col as i32,
        });
        if wrap {
            self.end_transaction();
        }
    }

    /// Lock a column: modifications that came before this transaction are conflicting, but not
    /// modifications that come after it. Bound tightenings do not conflict; use
    /// [`Self::lock_col_bounds`] for those.
    pub fn lock_col(&mut self, col: usize) {
        self.push_lock(Reduction { new_value: R::zero(), row: ColOp::Locked as i32, col: col as i32 });
    }

    /// Lock a column strongly: modifications before or after this transaction are conflicting.
    pub fn lock_col_strong(&mut self, col: usize) {
        self.push_lock(Reduction { new_value: R::zero(), row: ColOp::LockedStrong as i32, col: col as i32 });
    }

    /// Lock the lower and upper bound of a column.
    pub fn lock_col_bounds(&mut self, col: usize) {
        self.push_lock(Reduction { new_value: R::zero(), row: ColOp::BoundsLocked as i32, col: col as i32 });
    }

    /// Signal that a column is free and can be substituted in the matrix using the given
    /// equality row.
    pub fn substitute_free_col(&mut self, col: usize, equality_row: usize) {
        self.push_atomic(Reduction {
            new_value: R::from_f64(equality_row as f64).expect("row index is finite"),
            row: ColOp::Substitute as i32,
            col: col as i32,
        });
    }

    /// Substitute a column in the objective only, using the given equality row.
    pub fn substitute_col_in_objective(&mut self, col: usize, equality_row: usize) {
        self.push_atomic(Reduction {
            new_value: R::from_f64(equality_row as f64).expect("row index is finite"),
            row: ColOp::SubstituteObj as i32,
            col: col as i32,
        });
    }

    /// Replace `col1 = factor * col2 + offset`.
    pub fn replace_col(&mut self, col1: usize, col2: usize, factor: R, offset: R) {
        let wrap = self.open_transaction().is_none();
        if wrap {
            self.start_transaction();
        }
        self.reductions.push(Reduction { new_value: factor, row: ColOp::Replace as i32, col: col1 as i32 });
        self.reductions.push(Reduction { new_value: offset, row: ColOp::None as i32, col: col2 as i32 });
        if wrap {
            self.end_transaction();
        }
    }

    /// Merge the parallel columns `col1` and `col2` into a single variable `y = col2 + factor *
    /// col1`, with the factor derived from the coefficient ratio by the applier.
    pub fn parallel_cols(&mut self, col1: usize, col2: usize) {
        self.push_atomic(Reduction {
            new_value: R::from_f64(col2 as f64).expect("column index is finite"),
            row: ColOp::Parallel as i32,
            col: col1 as i32,
        });
    }

    pub fn mark_implied_integer(&mut self, col: usize) {
        self.push_atomic(Reduction { new_value: R::zero(), row: ColOp::ImplInt as i32, col: col as i32 });
    }
}

/// Scoped transaction: opened on creation, closed on every exit path.
#[must_use]
pub struct TransactionGuard<'a, R: Real> {
    reductions: &'a mut Reductions<R>,
}

impl<'a, R: Real> TransactionGuard<'a, R> {
    fn new(reductions: &'a mut Reductions<R>) -> Self {
        reductions.start_transaction();
        Self { reductions }
    }
}

impl<R: Real> std::ops::Deref for TransactionGuard<'_, R> {
    type Target = Reductions<R>;

    fn deref(&self) -> &Self::Target {
        self.reductions
    }
}

impl<R: Real> std::ops::DerefMut for TransactionGuard<'_, R> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.reductions
    }
}

impl<R: Real> Drop for TransactionGuard<'_, R> {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            self.reductions.end_transaction();
        }
    }
}

#[cfg(test)]
mod test {
    use crate::presolve::reductions::{ColOp, Reductions, RowOp};

    #[test]
    fn single_record_operations_wrap_themselves() {
        let mut reductions = Reductions::<f64>::new();
        reductions.fix_col(3, 5_f64);
        reductions.change_row_rhs(1, 2_f64);

        assert_eq!(reductions.len(), 2);
        assert_eq!(reductions.transactions().len(), 2);
        assert_eq!(reductions.transactions()[0].start, 0);
        assert_eq!(reductions.transactions()[0].end, Some(1));
        assert_eq!(reductions.transactions()[1].nlocks, 0);

        assert_eq!(reductions.reduction(0).row, ColOp::Fixed as i32);
        assert_eq!(reductions.reduction(0).col, 3);
        assert_eq!(reductions.reduction(1).col, RowOp::Rhs as i32);
        assert_eq!(reductions.reduction(1).row, 1);
    }

    #[test]
    fn locks_form_a_prefix() {
        let mut reductions = Reductions::<f64>::new();
        {
            let mut transaction = reductions.transaction();
            transaction.lock_col(0);
            transaction.lock_col_bounds(0);
            transaction.lock_row_strong(2);
            transaction.fix_col(0, 1_f64);
        }

        assert_eq!(reductions.transactions().len(), 1);
        let transaction = reductions.transactions()[0];
        assert_eq!(transaction.nlocks, 3);
        assert_eq!(transaction.end, Some(4));
        assert!(reductions.reduction(0).is_lock());
        assert!(reductions.reduction(2).is_lock());
        assert!(!reductions.reduction(3).is_lock());
    }

    #[test]
    fn multi_record_operations() {
        let mut reductions = Reductions::<f64>::new();
        reductions.replace_col(0, 1, 2_f64, -1_f64);
        reductions.sparsify(4, &[(0, 2_f64), (1, -1_f64)]);
        reductions.fix_col_positive_infinity(2, &[0, 1]);

        assert_eq!(reductions.transactions().len(), 3);

        assert_eq!(reductions.reduction(0).row, ColOp::Replace as i32);
        assert_eq!(reductions.reduction(1).row, ColOp::None as i32);
        assert_eq!(reductions.reduction(1).col, 1);

        assert_eq!(reductions.reduction(2).col, RowOp::Sparsify as i32);
        assert_eq!(reductions.reduction(2).row, 4);
        assert_eq!(reductions.reduction(2).new_value, 2_f64);
        assert_eq!(reductions.reduction(3).col, RowOp::None as i32);

        assert_eq!(reductions.reduction(5).col, RowOp::Redundant as i32);
        assert_eq!(reductions.reduction(6).col, RowOp::Redundant as i32);
        assert_eq!(reductions.reduction(7).row, ColOp::FixedInfinity as i32);
        assert_eq!(reductions.reduction(7).new_value, 1_f64);
    }

    #[test]
    #[should_panic(expected = "NestedTransaction")]
    fn nested_transaction_panics() {
        let mut reductions = Reductions::<f64>::new();
        reductions.start_transaction();
        reductions.start_transaction();
    }

    #[test]
    #[should_panic(expected = "EmptyTransaction")]
    fn empty_transaction_panics() {
        let mut reductions = Reductions::<f64>::new();
        reductions.start_transaction();
        reductions.end_transaction();
    }

    #[test]
    #[should_panic(expected = "LocksMustPrecede")]
    fn lock_after_non_lock_panics() {
        let mut reductions = Reductions::<f64>::new();
        reductions.start_transaction();
        reductions.fix_col(0, 1_f64);
        reductions.lock_col(0);
    }

    #[test]
    fn clearing() {
        let mut reductions = Reductions::<f64>::new();
        reductions.fix_col(0, 1_f64);
        reductions.clear();

        assert!(reductions.is_empty());
        assert!(reductions.transactions().is_empty());
    }
}
