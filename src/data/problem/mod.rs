//! # The problem being presolved
//!
//! Data structure for manipulation of linear and mixed integer programs of the form
//! `l <= Ax <= u` with variable domains `lb <= x <= ub`, some variables possibly integer, and a
//! linear objective that is minimized.
//!
//! During a presolve round the problem is shared read only between the presolve methods; between
//! rounds it is exclusively owned by the applier, which is the only writer. Per entity version
//! counters are part of the problem and updated by the write methods, such that the applier can
//! detect which entities a transaction's locks protect were modified.
use std::ops::Not;

use crate::data::linear_algebra::matrix::SparseMatrix;
use crate::data::linear_algebra::SparseTuple;
use crate::data::number_types::{Num, Real, RealRef};
use crate::data::problem::flags::{ColFlags, RowFlags};

pub mod flags;

/// Direction of a bound.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum BoundDirection {
    Lower,
    Upper,
}

impl Not for BoundDirection {
    type Output = Self;

    fn not(self) -> Self {
        match self {
            Self::Lower => Self::Upper,
            Self::Upper => Self::Lower,
        }
    }
}

/// A linear or mixed integer program in the shape the presolve engine works on.
///
/// Bound values of entities with the corresponding infinity flag set are meaningless and should
/// never be read; the accessors translate them to `None`. Rows marked redundant and columns
/// marked fixed or substituted remain in the index range until the next call to [`Problem::compress`],
/// which renumbers all remaining entities to a contiguous range.
///
/// Can be checked for consistency by the `is_consistent` method in this module. That method can
/// be viewed as documentation for the requirements on the fields of this data structure.
#[derive(Debug, Clone, PartialEq)]
pub struct Problem<R> {
    /// Cost coefficient for each column, minimized.
    objective: Vec<R>,
    /// Constant in the cost function, accumulated as columns get eliminated.
    objective_offset: R,

    /// All constraint coefficients, in both orientations.
    matrix: SparseMatrix<R>,

    // Constraint related
    /// Left hand sides, one for each row.
    lhs: Vec<R>,
    /// Right hand sides, one for each row.
    rhs: Vec<R>,
    row_flags: Vec<RowFlags>,

    // Variable related
    lower_bounds: Vec<R>,
    upper_bounds: Vec<R>,
    col_flags: Vec<ColFlags>,
    /// Names are carried for the certificate, which prints constraints over named variables.
    variable_names: Vec<String>,

    // Modification tracking, maintained by the write methods below
    /// Bumped on side changes, redundancy marks and coefficient changes in the row.
    row_versions: Vec<u32>,
    /// Bumped on coefficient changes in the column and on structural elimination.
    col_versions: Vec<u32>,
    /// Bumped on domain changes: bounds, fixation, integrality strengthening.
    col_bound_versions: Vec<u32>,
}

/// Index translation after a call to [`Problem::compress`].
///
/// Mappings are indexed by old entity index and hold the new index, or `-1` when the entity was
/// removed from the problem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Compression {
    pub row_mapping: Vec<i32>,
    pub col_mapping: Vec<i32>,
}

impl<R: Real> Problem<R> {
    pub fn nr_rows(&self) -> usize {
        self.lhs.len()
    }

    pub fn nr_columns(&self) -> usize {
        self.objective.len()
    }

    /// Number of rows that still constrain.
    pub fn nr_active_rows(&self) -> usize {
        self.row_flags.iter().filter(|flags| !flags.redundant()).count()
    }

    /// Number of columns that are neither fixed nor substituted.
    pub fn nr_active_columns(&self) -> usize {
        self.col_flags.iter().filter(|flags| flags.active()).count()
    }

    pub fn nr_nonzeros(&self) -> usize {
        self.matrix.nr_nonzeros()
    }

    pub fn objective_coefficient(&self, column: usize) -> &R {
        &self.objective[column]
    }

    pub fn objective_offset(&self) -> &R {
        &self.objective_offset
    }

    /// All coefficients of a row, ordered by column index.
    pub fn row(&self, row: usize) -> &[SparseTuple<R>] {
        self.matrix.row(row)
    }

    /// All coefficients of a column, ordered by row index.
    pub fn column(&self, column: usize) -> &[SparseTuple<R>] {
        self.matrix.column(column)
    }

    pub fn coefficient(&self, row: usize, column: usize) -> Option<&R> {
        self.matrix.get(row, column)
    }

    pub fn row_flags(&self, row: usize) -> RowFlags {
        self.row_flags[row]
    }

    pub fn col_flags(&self, column: usize) -> ColFlags {
        self.col_flags[column]
    }

    pub fn lhs(&self, row: usize) -> Option<&R> {
        self.row_flags[row].lhs_inf().not().then(|| &self.lhs[row])
    }

    pub fn rhs(&self, row: usize) -> Option<&R> {
        self.row_flags[row].rhs_inf().not().then(|| &self.rhs[row])
    }

    pub fn lower_bound(&self, column: usize) -> Option<&R> {
        self.col_flags[column].lb_inf().not().then(|| &self.lower_bounds[column])
    }

    pub fn upper_bound(&self, column: usize) -> Option<&R> {
        self.col_flags[column].ub_inf().not().then(|| &self.upper_bounds[column])
    }

    pub fn bound(&self, column: usize, direction: BoundDirection) -> Option<&R> {
        match direction {
            BoundDirection::Lower => self.lower_bound(column),
            BoundDirection::Upper => self.upper_bound(column),
        }
    }

    pub fn variable_name(&self, column: usize) -> &str {
        &self.variable_names[column]
    }

    pub fn row_version(&self, row: usize) -> u32 {
        self.row_versions[row]
    }

    pub fn col_version(&self, column: usize) -> u32 {
        self.col_versions[column]
    }

    pub fn col_bound_version(&self, column: usize) -> u32 {
        self.col_bound_versions[column]
    }

    pub(crate) fn row_versions(&self) -> &[u32] {
        &self.row_versions
    }

    pub(crate) fn col_versions(&self) -> &[u32] {
        &self.col_versions
    }

    pub(crate) fn col_bound_versions(&self) -> &[u32] {
        &self.col_bound_versions
    }

    // Write contract, used by the applier only.

    pub(crate) fn set_row_lhs(&mut self, row: usize, value: R) {
        self.lhs[row] = value;
        self.row_flags[row].set_lhs_inf(false);
        self.row_versions[row] += 1;
    }

    pub(crate) fn set_row_rhs(&mut self, row: usize, value: R) {
        self.rhs[row] = value;
        self.row_flags[row].set_rhs_inf(false);
        self.row_versions[row] += 1;
    }

    pub(crate) fn mark_row_lhs_inf(&mut self, row: usize) {
        self.row_flags[row].set_lhs_inf(true);
        if self.row_flags[row].rhs_inf() {
            self.row_flags[row].set_redundant();
        }
        self.row_versions[row] += 1;
    }

    pub(crate) fn mark_row_rhs_inf(&mut self, row: usize) {
        self.row_flags[row].set_rhs_inf(true);
        if self.row_flags[row].lhs_inf() {
            self.row_flags[row].set_redundant();
        }
        self.row_versions[row] += 1;
    }

    pub(crate) fn mark_row_redundant(&mut self, row: usize) {
        self.row_flags[row].set_redundant();
        self.row_versions[row] += 1;
    }

    /// Set a lower bound.
    ///
    /// When the new value collapses with the upper bound the column is marked fixed.
    pub(crate) fn set_col_lb(&mut self, column: usize, value: R) {
        let collapses = !self.col_flags[column].ub_inf() && value == self.upper_bounds[column];
        self.lower_bounds[column] = value;
        self.col_flags[column].set_lb_inf(false);
        if collapses {
            self.col_flags[column].set_fixed();
        }
        self.col_bound_versions[column] += 1;
    }

    /// Set an upper bound.
    ///
    /// When the new value collapses with the lower bound the column is marked fixed.
    pub(crate) fn set_col_ub(&mut self, column: usize, value: R) {
        let collapses = !self.col_flags[column].lb_inf() && value == self.lower_bounds[column];
        self.upper_bounds[column] = value;
        self.col_flags[column].set_ub_inf(false);
        if collapses {
            self.col_flags[column].set_fixed();
        }
        self.col_bound_versions[column] += 1;
    }

    pub(crate) fn mark_col_lb_inf(&mut self, column: usize) {
        self.col_flags[column].set_lb_inf(true);
        self.col_bound_versions[column] += 1;
    }

    pub(crate) fn mark_col_ub_inf(&mut self, column: usize) {
        self.col_flags[column].set_ub_inf(true);
        self.col_bound_versions[column] += 1;
    }

    pub(crate) fn fix_col(&mut self, column: usize, value: R) {
        self.lower_bounds[column] = value.clone();
        self.upper_bounds[column] = value;
        self.col_flags[column].set_lb_inf(false);
        self.col_flags[column].set_ub_inf(false);
        self.col_flags[column].set_fixed();
        self.col_bound_versions[column] += 1;
    }

    pub(crate) fn mark_implied_integer(&mut self, column: usize) {
        self.col_flags[column].set_implied_integral();
        self.col_bound_versions[column] += 1;
    }

    pub(crate) fn mark_col_substituted(&mut self, column: usize) {
        self.col_flags[column].set_substituted();
        self.col_versions[column] += 1;
    }

    /// Change a single coefficient; `None` deletes the entry.
    pub(crate) fn set_matrix_entry(&mut self, row: usize, column: usize, value: Option<R>) {
        self.matrix.set(row, column, value);
        self.row_versions[row] += 1;
        self.col_versions[column] += 1;
    }

    pub(crate) fn set_objective_coefficient(&mut self, column: usize, value: R) {
        self.objective[column] = value;
    }

    pub(crate) fn add_objective_offset(&mut self, change: R) {
        self.objective_offset += change;
    }

    /// Remove all redundant rows and all fixed or substituted columns, renumbering the remaining
    /// entities to a contiguous range.
    ///
    /// External consumers of the old index space translate through the returned mappings.
    pub(crate) fn compress(&mut self) -> Compression {
        debug_assert!(self.col_flags.iter().enumerate()
            .filter(|&(_, flags)| !flags.active())
            .all(|(j, _)| self.matrix.column(j).is_empty()));

        let mut next_row = 0_i32;
        let row_mapping = self.row_flags.iter()
            .map(|flags| {
                if flags.redundant() {
                    -1
                } else {
                    next_row += 1;
                    next_row - 1
                }
            })
            .collect::<Vec<_>>();
        let mut next_col = 0_i32;
        let col_mapping = self.col_flags.iter()
            .map(|flags| {
                if flags.active() {
                    next_col += 1;
                    next_col - 1
                } else {
                    -1
                }
            })
            .collect::<Vec<_>>();

        self.matrix.compress(&row_mapping, &col_mapping);
        retain_mapped(&mut self.lhs, &row_mapping);
        retain_mapped(&mut self.rhs, &row_mapping);
        retain_mapped(&mut self.row_flags, &row_mapping);
        retain_mapped(&mut self.row_versions, &row_mapping);
        retain_mapped(&mut self.objective, &col_mapping);
        retain_mapped(&mut self.lower_bounds, &col_mapping);
        retain_mapped(&mut self.upper_bounds, &col_mapping);
        retain_mapped(&mut self.col_flags, &col_mapping);
        retain_mapped(&mut self.variable_names, &col_mapping);
        retain_mapped(&mut self.col_versions, &col_mapping);
        retain_mapped(&mut self.col_bound_versions, &col_mapping);

        Compression { row_mapping, col_mapping }
    }
}

/// Keep the elements of surviving entities, in mapping order.
///
/// The mappings produced by `compress` are order preserving, so this is a `retain`.
fn retain_mapped<T>(data: &mut Vec<T>, mapping: &[i32]) {
    debug_assert_eq!(data.len(), mapping.len());

    let mut index = 0;
    data.retain(|_| {
        index += 1;
        mapping[index - 1] >= 0
    });
}

impl<R> Problem<R>
where
    R: Real,
    for<'r> &'r R: RealRef<R>,
{
    /// Check whether the fields of this problem are consistent.
    ///
    /// This method is expensive, use it in debugging only. It can be viewed as a piece of
    /// documentation on the requirements of a `Problem` struct.
    pub fn is_consistent(&self, num: &Num<R>) -> bool {
        let nr_rows = self.nr_rows();
        let nr_columns = self.nr_columns();

        let dimensions_agree = self.rhs.len() == nr_rows
            && self.row_flags.len() == nr_rows
            && self.row_versions.len() == nr_rows
            && self.matrix.nr_rows() == nr_rows
            && self.lower_bounds.len() == nr_columns
            && self.upper_bounds.len() == nr_columns
            && self.col_flags.len() == nr_columns
            && self.variable_names.len() == nr_columns
            && self.col_versions.len() == nr_columns
            && self.col_bound_versions.len() == nr_columns
            && self.matrix.nr_columns() == nr_columns;

        let rows_ordered = (0..nr_rows).all(|i| {
            let flags = self.row_flags[i];
            flags.lhs_inf() || flags.rhs_inf() || num.is_le(&self.lhs[i], &self.rhs[i])
        });
        let columns_ordered = (0..nr_columns).all(|j| {
            let flags = self.col_flags[j];
            flags.lb_inf() || flags.ub_inf() || num.is_le(&self.lower_bounds[j], &self.upper_bounds[j])
        });
        let fixed_columns_collapsed = (0..nr_columns).all(|j| {
            let flags = self.col_flags[j];
            !flags.fixed() || (!flags.lb_inf() && !flags.ub_inf()
                && self.lower_bounds[j] == self.upper_bounds[j])
        });

        dimensions_agree
            && rows_ordered
            && columns_ordered
            && fixed_columns_collapsed
            && self.matrix.is_consistent()
    }
}

/// Incremental construction of a [`Problem`].
///
/// Columns are added first, rows refer to them by index.
#[derive(Debug, Clone)]
pub struct ProblemBuilder<R> {
    objective: Vec<R>,
    lower_bounds: Vec<(Option<R>, bool)>,
    upper_bounds: Vec<Option<R>>,
    names: Vec<String>,
    rows: Vec<(Option<R>, Option<R>)>,
    entries: Vec<(usize, usize, R)>,
}

impl<R: Real> Default for ProblemBuilder<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Real> ProblemBuilder<R> {
    pub fn new() -> Self {
        Self {
            objective: Vec::new(),
            lower_bounds: Vec::new(),
            upper_bounds: Vec::new(),
            names: Vec::new(),
            rows: Vec::new(),
            entries: Vec::new(),
        }
    }

    /// Add a column and return its index.
    ///
    /// # Arguments
    ///
    /// * `cost`: Coefficient in the minimized objective.
    /// * `lower` / `upper`: Domain bounds, `None` for unbounded.
    /// * `integral`: Whether the domain is restricted to the integers.
    pub fn column(
        &mut self,
        name: impl Into<String>,
        cost: R,
        lower: Option<R>,
        upper: Option<R>,
        integral: bool,
    ) -> usize {
        self.objective.push(cost);
        self.lower_bounds.push((lower, integral));
        self.upper_bounds.push(upper);
        self.names.push(name.into());

        self.objective.len() - 1
    }

    /// Add a row and return its index.
    ///
    /// # Arguments
    ///
    /// * `lhs` / `rhs`: Row sides, `None` for infinite.
    /// * `coefficients`: Nonzero coefficients as `(column, value)` tuples.
    pub fn row(
        &mut self,
        lhs: Option<R>,
        rhs: Option<R>,
        coefficients: impl IntoIterator<Item = (usize, R)>,
    ) -> usize {
        let row = self.rows.len();
        self.rows.push((lhs, rhs));
        for (column, value) in coefficients {
            debug_assert!(column < self.objective.len());
            self.entries.push((row, column, value));
        }

        row
    }

    pub fn build(self) -> Problem<R> {
        let nr_rows = self.rows.len();
        let nr_columns = self.objective.len();

        let mut row_flags = vec![RowFlags::default(); nr_rows];
        let mut lhs = Vec::with_capacity(nr_rows);
        let mut rhs = Vec::with_capacity(nr_rows);
        for (i, (left, right)) in self.rows.into_iter().enumerate() {
            match left {
                Some(value) => lhs.push(value),
                None => {
                    lhs.push(R::zero());
                    row_flags[i].set_lhs_inf(true);
                },
            }
            match right {
                Some(value) => rhs.push(value),
                None => {
                    rhs.push(R::zero());
                    row_flags[i].set_rhs_inf(true);
                },
            }
        }

        let mut col_flags = vec![ColFlags::default(); nr_columns];
        let mut lower_bounds = Vec::with_capacity(nr_columns);
        let mut upper_bounds = Vec::with_capacity(nr_columns);
        for (j, (lower, integral)) in self.lower_bounds.into_iter().enumerate() {
            match lower {
                Some(value) => lower_bounds.push(value),
                None => {
                    lower_bounds.push(R::zero());
                    col_flags[j].set_lb_inf(true);
                },
            }
            if integral {
                col_flags[j].set_integral();
            }
        }
        for (j, upper) in self.upper_bounds.into_iter().enumerate() {
            match upper {
                Some(value) => upper_bounds.push(value),
                None => {
                    upper_bounds.push(R::zero());
                    col_flags[j].set_ub_inf(true);
                },
            }
        }
        for (j, flags) in col_flags.iter_mut().enumerate() {
            if !flags.lb_inf() && !flags.ub_inf() && lower_bounds[j] == upper_bounds[j] {
                flags.set_fixed();
            }
        }

        Problem {
            objective: self.objective,
            objective_offset: R::zero(),
            matrix: SparseMatrix::from_coordinates(nr_rows, nr_columns, self.entries),
            lhs,
            rhs,
            row_flags,
            lower_bounds,
            upper_bounds,
            col_flags,
            variable_names: self.names,
            row_versions: vec![0; nr_rows],
            col_versions: vec![0; nr_columns],
            col_bound_versions: vec![0; nr_columns],
        }
    }
}

#[cfg(test)]
mod test {
    use crate::data::number_types::Num;
    use crate::data::problem::ProblemBuilder;

    fn small_problem() -> crate::data::problem::Problem<f64> {
        let mut builder = ProblemBuilder::new();
        let x = builder.column("x", -1_f64, Some(0_f64), Some(4_f64), true);
        let y = builder.column("y", 0_f64, Some(0_f64), None, false);
        builder.row(None, Some(3_f64), [(x, 1_f64), (y, 2_f64)]);
        builder.row(Some(1_f64), Some(1_f64), [(y, 1_f64)]);
        builder.build()
    }

    #[test]
    fn builder_and_accessors() {
        let problem = small_problem();
        let num = Num::default();

        assert!(problem.is_consistent(&num));
        assert_eq!(problem.nr_rows(), 2);
        assert_eq!(problem.nr_columns(), 2);
        assert_eq!(problem.lhs(0), None);
        assert_eq!(problem.rhs(0), Some(&3_f64));
        assert_eq!(problem.lower_bound(0), Some(&0_f64));
        assert_eq!(problem.upper_bound(1), None);
        assert!(problem.col_flags(0).integral());
        assert!(!problem.col_flags(1).integral());
        assert_eq!(problem.variable_name(1), "y");
        assert_eq!(problem.row(0), &[(0, 1_f64), (1, 2_f64)]);
        assert_eq!(problem.column(1), &[(0, 2_f64), (1, 1_f64)]);
    }

    #[test]
    fn mutation_propagates() {
        let mut problem = small_problem();

        // Upper bound collapsing with the lower bound fixes the column.
        problem.set_col_ub(0, 0_f64);
        assert!(problem.col_flags(0).fixed());
        assert_eq!(problem.col_bound_version(0), 1);

        // Marking the second side infinite makes the row redundant.
        problem.mark_row_rhs_inf(0);
        assert!(!problem.row_flags(0).redundant());
        problem.mark_row_lhs_inf(0);
        assert!(problem.row_flags(0).redundant());
        assert_eq!(problem.row_version(0), 2);
    }

    #[test]
    fn compression_renumbers() {
        let mut problem = small_problem();
        let num = Num::default();

        problem.fix_col(0, 3_f64);
        for &(row, _) in problem.column(0).to_vec().iter() {
            problem.set_matrix_entry(row, 0, None);
        }
        problem.mark_row_redundant(0);

        let compression = problem.compress();
        assert_eq!(compression.row_mapping, vec![-1, 0]);
        assert_eq!(compression.col_mapping, vec![-1, 0]);
        assert_eq!(problem.nr_rows(), 1);
        assert_eq!(problem.nr_columns(), 1);
        assert_eq!(problem.variable_name(0), "y");
        assert_eq!(problem.row(0), &[(0, 1_f64)]);
        assert!(problem.is_consistent(&num));
    }
}
