//! # Matrix implementation
//!
//! A sparse constraint matrix stored in both the row major and the column major orientation.
//! Presolve methods iterate rows and columns about equally often, and the applier mutates single
//! coefficients, so both orientations are kept in sync on every write. Entries within a row or
//! column are ordered by index and hold no explicit zeros.
use crate::data::linear_algebra::{SparseTuple, SparseTupleVec};
use crate::data::number_types::{Real, RealRef};

/// Sparse matrix with synchronized row major and column major storage.
///
/// Indices start at `0`.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseMatrix<R> {
    rows: Vec<SparseTupleVec<R>>,
    columns: Vec<SparseTupleVec<R>>,
}

impl<R: Real> SparseMatrix<R> {
    /// Create an empty matrix of the given dimensions.
    pub fn new(nr_rows: usize, nr_columns: usize) -> Self {
        Self {
            rows: vec![Vec::new(); nr_rows],
            columns: vec![Vec::new(); nr_columns],
        }
    }

    /// Create a matrix from coordinate form.
    ///
    /// # Arguments
    ///
    /// * `nr_rows` / `nr_columns`: Dimensions, at least as large as the largest index appearing
    /// in `entries`.
    /// * `entries`: Coefficients as `(row, column, value)` tuples without duplicate coordinates
    /// and without explicit zeros.
    pub fn from_coordinates(nr_rows: usize, nr_columns: usize, entries: Vec<(usize, usize, R)>) -> Self {
        let mut matrix = Self::new(nr_rows, nr_columns);
        for (row, column, value) in entries {
            debug_assert!(row < nr_rows && column < nr_columns);
            debug_assert!(!value.is_zero());

            matrix.rows[row].push((column, value.clone()));
            matrix.columns[column].push((row, value));
        }
        for row in &mut matrix.rows {
            row.sort_unstable_by_key(|&(j, _)| j);
        }
        for column in &mut matrix.columns {
            column.sort_unstable_by_key(|&(i, _)| i);
        }

        debug_assert!(matrix.is_consistent());
        matrix
    }

    /// Utility method that creates a matrix from dense data for tests.
    ///
    /// Note that the numerics might not be exact due to intermediate casting to floats, for
    /// convenience in other places of the code base.
    pub fn from_test_data(rows: &[Vec<f64>], nr_columns: usize) -> Self {
        debug_assert!(rows.iter().all(|row| row.len() == nr_columns));

        let entries = rows.iter().enumerate()
            .flat_map(|(i, row)| {
                row.iter().enumerate()
                    .filter(|&(_, value)| *value != 0_f64)
                    .map(move |(j, &value)| (i, j, R::from_f64(value).unwrap()))
            })
            .collect();

        Self::from_coordinates(rows.len(), nr_columns, entries)
    }

    pub fn nr_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn nr_columns(&self) -> usize {
        self.columns.len()
    }

    /// Number of structural nonzeros.
    pub fn nr_nonzeros(&self) -> usize {
        self.rows.iter().map(Vec::len).sum()
    }

    /// All entries of a row, ordered by column index.
    pub fn row(&self, row: usize) -> &[SparseTuple<R>] {
        &self.rows[row]
    }

    /// All entries of a column, ordered by row index.
    pub fn column(&self, column: usize) -> &[SparseTuple<R>] {
        &self.columns[column]
    }

    /// A single coefficient, if it is structurally nonzero.
    pub fn get(&self, row: usize, column: usize) -> Option<&R> {
        self.rows[row]
            .binary_search_by_key(&column, |&(j, _)| j)
            .ok()
            .map(|data_index| &self.rows[row][data_index].1)
    }

    /// Set, overwrite or delete a single coefficient.
    ///
    /// Runs in time linear in the lengths of the affected row and column, because both
    /// orientations are maintained.
    ///
    /// # Arguments
    ///
    /// * `value`: New coefficient value, or `None` to delete the entry. The caller decides what
    /// counts as zero; this method never compares values.
    pub fn set(&mut self, row: usize, column: usize, value: Option<R>) {
        match value {
            Some(value) => {
                Self::set_in(&mut self.rows[row], column, value.clone());
                Self::set_in(&mut self.columns[column], row, value);
            },
            None => {
                Self::remove_from(&mut self.rows[row], column);
                Self::remove_from(&mut self.columns[column], row);
            },
        }
    }

    fn set_in(data: &mut SparseTupleVec<R>, index: usize, value: R) {
        match data.binary_search_by_key(&index, |&(k, _)| k) {
            Ok(data_index) => data[data_index].1 = value,
            Err(data_index) => data.insert(data_index, (index, value)),
        }
    }

    fn remove_from(data: &mut SparseTupleVec<R>, index: usize) {
        if let Ok(data_index) = data.binary_search_by_key(&index, |&(k, _)| k) {
            data.remove(data_index);
        }
    }

    /// Rewrite all indices after rows and columns were removed from the problem.
    ///
    /// # Arguments
    ///
    /// * `row_mapping` / `column_mapping`: For each old index the new index, or `-1` when the
    /// entity was removed. Surviving indices must form a contiguous prefix permutation.
    pub fn compress(&mut self, row_mapping: &[i32], column_mapping: &[i32]) {
        debug_assert_eq!(row_mapping.len(), self.nr_rows());
        debug_assert_eq!(column_mapping.len(), self.nr_columns());

        let nr_new_rows = row_mapping.iter().filter(|&&i| i >= 0).count();
        let mut rows = vec![Vec::new(); nr_new_rows];
        for (old_row, data) in self.rows.drain(..).enumerate() {
            if row_mapping[old_row] >= 0 {
                rows[row_mapping[old_row] as usize] = data.into_iter()
                    .filter(|&(j, _)| column_mapping[j] >= 0)
                    .map(|(j, value)| (column_mapping[j] as usize, value))
                    .collect();
            }
        }
        self.rows = rows;

        let nr_new_columns = column_mapping.iter().filter(|&&j| j >= 0).count();
        let mut columns = vec![Vec::new(); nr_new_columns];
        for (old_column, data) in self.columns.drain(..).enumerate() {
            if column_mapping[old_column] >= 0 {
                columns[column_mapping[old_column] as usize] = data.into_iter()
                    .filter(|&(i, _)| row_mapping[i] >= 0)
                    .map(|(i, value)| (row_mapping[i] as usize, value))
                    .collect();
            }
        }
        self.columns = columns;

        debug_assert!(self.is_consistent());
    }

    /// Whether the two orientations describe the same matrix.
    ///
    /// This method is expensive, use it in debugging only.
    pub(crate) fn is_consistent(&self) -> bool {
        let ordered = |data: &[SparseTuple<R>]| data.windows(2).all(|pair| pair[0].0 < pair[1].0);
        self.rows.iter().all(|row| ordered(row))
            && self.columns.iter().all(|column| ordered(column))
            && self.rows.iter().enumerate().all(|(i, row)| {
                row.iter().all(|(j, value)| {
                    self.columns[*j].binary_search_by_key(&i, |&(k, _)| k)
                        .is_ok_and(|data_index| &self.columns[*j][data_index].1 == value)
                })
            })
            && self.rows.iter().map(Vec::len).sum::<usize>()
                == self.columns.iter().map(Vec::len).sum::<usize>()
    }
}

impl<R> SparseMatrix<R>
where
    R: Real,
    for<'r> &'r R: RealRef<R>,
{
    /// Add `scale` times a source row to a target row.
    ///
    /// Entries of the target that end up within `is_zero` of zero are deleted. Returns the
    /// column indices of the deleted entries.
    pub fn add_scaled_row<F: Fn(&R) -> bool>(
        &mut self,
        target: usize,
        source: usize,
        scale: &R,
        is_zero: F,
    ) -> Vec<usize> {
        debug_assert_ne!(target, source);

        let mut cancelled = Vec::new();
        let updates = self.rows[source].iter()
            .map(|(j, value)| (*j, scale * value))
            .collect::<Vec<_>>();
        for (j, change) in updates {
            let new_value = match self.get(target, j) {
                Some(existing) => existing + change,
                None => change,
            };
            if is_zero(&new_value) {
                if self.get(target, j).is_some() {
                    cancelled.push(j);
                }
                self.set(target, j, None);
            } else {
                self.set(target, j, Some(new_value));
            }
        }

        cancelled
    }
}

#[cfg(test)]
mod test {
    use crate::data::linear_algebra::matrix::SparseMatrix;

    #[test]
    fn construction_and_access() {
        let matrix = SparseMatrix::<f64>::from_test_data(&[
            vec![1_f64, 0_f64, 2_f64],
            vec![0_f64, 3_f64, 0_f64],
        ], 3);

        assert_eq!(matrix.nr_rows(), 2);
        assert_eq!(matrix.nr_columns(), 3);
        assert_eq!(matrix.nr_nonzeros(), 3);
        assert_eq!(matrix.row(0), &[(0, 1_f64), (2, 2_f64)]);
        assert_eq!(matrix.column(2), &[(0, 2_f64)]);
        assert_eq!(matrix.get(1, 1), Some(&3_f64));
        assert_eq!(matrix.get(1, 0), None);
    }

    #[test]
    fn mutation_keeps_orientations_in_sync() {
        let mut matrix = SparseMatrix::<f64>::from_test_data(&[
            vec![1_f64, 0_f64],
            vec![4_f64, 5_f64],
        ], 2);

        matrix.set(0, 1, Some(7_f64));
        assert_eq!(matrix.get(0, 1), Some(&7_f64));
        assert_eq!(matrix.column(1), &[(0, 7_f64), (1, 5_f64)]);

        matrix.set(1, 0, None);
        assert_eq!(matrix.get(1, 0), None);
        assert_eq!(matrix.column(0), &[(0, 1_f64)]);
        assert!(matrix.is_consistent());
    }

    #[test]
    fn compression_renumbers() {
        let mut matrix = SparseMatrix::<f64>::from_test_data(&[
            vec![1_f64, 2_f64, 0_f64],
            vec![0_f64, 3_f64, 4_f64],
            vec![5_f64, 0_f64, 6_f64],
        ], 3);

        // Remove row 1 and column 0.
        matrix.compress(&[0, -1, 1], &[-1, 0, 1]);

        assert_eq!(matrix.nr_rows(), 2);
        assert_eq!(matrix.nr_columns(), 2);
        assert_eq!(matrix.row(0), &[(0, 2_f64)]);
        assert_eq!(matrix.row(1), &[(1, 6_f64)]);
        assert_eq!(matrix.column(1), &[(1, 6_f64)]);
    }

    #[test]
    fn row_combination_cancels() {
        let mut matrix = SparseMatrix::<f64>::from_test_data(&[
            vec![2_f64, 1_f64, 0_f64],
            vec![4_f64, 1_f64, 1_f64],
        ], 3);

        // Subtract twice row 0 from row 1.
        let cancelled = matrix.add_scaled_row(1, 0, &-2_f64, |v| v.abs() < 1e-9);

        assert_eq!(cancelled, vec![0]);
        assert_eq!(matrix.row(1), &[(1, -1_f64), (2, 1_f64)]);
        assert!(matrix.is_consistent());
    }
}
