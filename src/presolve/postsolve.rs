//! # The postsolve trace
//!
//! A stack structured log of reverse operations. Every accepted reduction pushes one entry with
//! enough information to take a feasible solution of the reduced problem and fill in values for
//! the variables and constraints that were removed. Consumers replay entries from newest to
//! oldest.
//!
//! All indices stored in entries refer to the *original* problem; the trace maintains the
//! translation from the current, possibly compressed, index space and applies it when an entry
//! is pushed.
use crate::data::linear_algebra::SparseTupleVec;
use crate::data::number_types::{Num, Real, RealRef};
use crate::data::problem::BoundDirection;

/// Coefficients and sides of a row at the moment it was consumed by a reduction.
#[derive(Debug, Clone, PartialEq)]
pub struct RowSnapshot<R> {
    pub row: usize,
    pub coefficients: SparseTupleVec<R>,
    pub lhs: Option<R>,
    pub rhs: Option<R>,
}

/// Reverse recipe for one reduction.
#[derive(Debug, Clone, PartialEq)]
pub enum PostsolveEntry<R> {
    /// The column was fixed; its support is kept for dual value recovery.
    FixedColumn {
        col: usize,
        value: R,
        support: SparseTupleVec<R>,
        cost: R,
    },
    /// The column was fixed at plus or minus infinity because the objective does not depend on
    /// it and no constraint blocks it; the incident rows were dropped and are replayed to find a
    /// finite value that satisfies them.
    FixedInfiniteColumn {
        col: usize,
        positive: bool,
        integral: bool,
        rows: Vec<RowSnapshot<R>>,
    },
    /// The column was substituted throughout the problem using an equality row.
    SubstitutedColumn {
        col: usize,
        row: RowSnapshot<R>,
    },
    /// The column was substituted in the objective only; it is still part of the reduced
    /// problem, the entry recovers the objective transformation.
    SubstitutedObjective {
        col: usize,
        row: RowSnapshot<R>,
    },
    /// `col = factor * replacement + offset`.
    ReplacedColumn {
        col: usize,
        replacement: usize,
        factor: R,
        offset: R,
    },
    /// `col1` and `col2` were merged into `y = col2 + factor * col1`, stored in `col2`'s slot.
    ParallelColumns {
        col1: usize,
        col2: usize,
        factor: R,
        col1_bounds: (Option<R>, Option<R>),
        col1_integral: bool,
    },
    /// A column bound was tightened; the prior bound is kept for reduced cost recovery.
    BoundChange {
        col: usize,
        direction: BoundDirection,
        old: Option<R>,
    },
    /// A row side was changed or removed; the prior value is kept for dual recovery.
    RowSideChange {
        row: usize,
        direction: BoundDirection,
        old: Option<R>,
    },
    /// The row no longer constrains; its contents are kept for dual recovery.
    RedundantRow {
        row: RowSnapshot<R>,
    },
    /// A coefficient was changed in place.
    CoefficientChange {
        row: usize,
        col: usize,
        old: Option<R>,
    },
    /// An equality row was scaled into other rows to cancel coefficients.
    SparsifiedRows {
        eq: RowSnapshot<R>,
        scaled_rows: Vec<(usize, R)>,
    },
    /// The column was recognized as implied integer.
    ImpliedInteger {
        col: usize,
    },
}

/// Append only ledger of reverse operations for the entire presolve lifetime.
#[derive(Debug, Clone, PartialEq)]
pub struct PostsolveTrace<R> {
    nr_original_rows: usize,
    nr_original_columns: usize,
    /// For each current row index, the index in the original problem.
    row_origin: Vec<usize>,
    /// For each current column index, the index in the original problem.
    col_origin: Vec<usize>,
    entries: Vec<PostsolveEntry<R>>,
}

impl<R: Real> PostsolveTrace<R> {
    pub fn new(nr_rows: usize, nr_columns: usize) -> Self {
        Self {
            nr_original_rows: nr_rows,
            nr_original_columns: nr_columns,
            row_origin: (0..nr_rows).collect(),
            col_origin: (0..nr_columns).collect(),
            entries: Vec::new(),
        }
    }

    pub fn nr_original_rows(&self) -> usize {
        self.nr_original_rows
    }

    pub fn nr_original_columns(&self) -> usize {
        self.nr_original_columns
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[PostsolveEntry<R>] {
        &self.entries
    }

    /// The original index of a current row index.
    pub fn original_row(&self, row: usize) -> usize {
        self.row_origin[row]
    }

    /// The original index of a current column index.
    pub fn original_col(&self, col: usize) -> usize {
        self.col_origin[col]
    }

    /// Append an entry given in the current index space; indices are translated to the original
    /// space before storage.
    pub(crate) fn push(&mut self, entry: PostsolveEntry<R>) {
        let entry = self.translate(entry);
        self.entries.push(entry);
    }

    fn translate(&self, entry: PostsolveEntry<R>) -> PostsolveEntry<R> {
        let row_snapshot = |snapshot: RowSnapshot<R>| RowSnapshot {
            row: self.row_origin[snapshot.row],
            coefficients: snapshot.coefficients.into_iter()
                .map(|(j, v)| (self.col_origin[j], v))
                .collect(),
            lhs: snapshot.lhs,
            rhs: snapshot.rhs,
        };
        let support = |support: SparseTupleVec<R>| support.into_iter()
            .map(|(i, v)| (self.row_origin[i], v))
            .collect();

        match entry {
            PostsolveEntry::FixedColumn { col, value, support: s, cost } => {
                PostsolveEntry::FixedColumn {
                    col: self.col_origin[col],
                    value,
                    support: support(s),
                    cost,
                }
            },
            PostsolveEntry::FixedInfiniteColumn { col, positive, integral, rows } => {
                PostsolveEntry::FixedInfiniteColumn {
                    col: self.col_origin[col],
                    positive,
                    integral,
                    rows: rows.into_iter().map(row_snapshot).collect(),
                }
            },
            PostsolveEntry::SubstitutedColumn { col, row } => PostsolveEntry::SubstitutedColumn {
                col: self.col_origin[col],
                row: row_snapshot(row),
            },
            PostsolveEntry::SubstitutedObjective { col, row } => {
                PostsolveEntry::SubstitutedObjective {
                    col: self.col_origin[col],
                    row: row_snapshot(row),
                }
            },
            PostsolveEntry::ReplacedColumn { col, replacement, factor, offset } => {
                PostsolveEntry::ReplacedColumn {
                    col: self.col_origin[col],
                    replacement: self.col_origin[replacement],
                    factor,
                    offset,
                }
            },
            PostsolveEntry::ParallelColumns { col1, col2, factor, col1_bounds, col1_integral } => {
                PostsolveEntry::ParallelColumns {
                    col1: self.col_origin[col1],
                    col2: self.col_origin[col2],
                    factor,
                    col1_bounds,
                    col1_integral,
                }
            },
            PostsolveEntry::BoundChange { col, direction, old } => PostsolveEntry::BoundChange {
                col: self.col_origin[col],
                direction,
                old,
            },
            PostsolveEntry::RowSideChange { row, direction, old } => {
                PostsolveEntry::RowSideChange {
                    row: self.row_origin[row],
                    direction,
                    old,
                }
            },
            PostsolveEntry::RedundantRow { row } => PostsolveEntry::RedundantRow {
                row: row_snapshot(row),
            },
            PostsolveEntry::CoefficientChange { row, col, old } => {
                PostsolveEntry::CoefficientChange {
                    row: self.row_origin[row],
                    col: self.col_origin[col],
                    old,
                }
            },
            PostsolveEntry::SparsifiedRows { eq, scaled_rows } => PostsolveEntry::SparsifiedRows {
                eq: row_snapshot(eq),
                scaled_rows: scaled_rows.into_iter()
                    .map(|(i, scale)| (self.row_origin[i], scale))
                    .collect(),
            },
            PostsolveEntry::ImpliedInteger { col } => PostsolveEntry::ImpliedInteger {
                col: self.col_origin[col],
            },
        }
    }

    /// Rewrite the current-to-original index maps after the problem was compressed.
    pub(crate) fn compress(&mut self, row_mapping: &[i32], col_mapping: &[i32]) {
        debug_assert_eq!(row_mapping.len(), self.row_origin.len());
        debug_assert_eq!(col_mapping.len(), self.col_origin.len());

        let mut row_origin = vec![0; row_mapping.iter().filter(|&&i| i >= 0).count()];
        for (old, &new) in row_mapping.iter().enumerate() {
            if new >= 0 {
                row_origin[new as usize] = self.row_origin[old];
            }
        }
        self.row_origin = row_origin;

        let mut col_origin = vec![0; col_mapping.iter().filter(|&&j| j >= 0).count()];
        for (old, &new) in col_mapping.iter().enumerate() {
            if new >= 0 {
                col_origin[new as usize] = self.col_origin[old];
            }
        }
        self.col_origin = col_origin;
    }
}

impl<R> PostsolveTrace<R>
where
    R: Real,
    for<'r> &'r R: RealRef<R>,
{
    /// Lift a feasible point of the reduced problem to a feasible point of the original problem.
    ///
    /// # Arguments
    ///
    /// * `reduced`: Solution values for the columns of the reduced problem, indexed in its
    /// current index space.
    /// * `num`: Tolerance helper, used for rounding values of integer columns.
    pub fn restore_primal(&self, reduced: &[R], num: &Num<R>) -> Vec<R> {
        debug_assert_eq!(reduced.len(), self.col_origin.len());

        let mut values: Vec<Option<R>> = vec![None; self.nr_original_columns];
        for (current, value) in reduced.iter().enumerate() {
            values[self.col_origin[current]] = Some(value.clone());
        }

        for entry in self.entries.iter().rev() {
            match entry {
                PostsolveEntry::FixedColumn { col, value, .. } => {
                    values[*col] = Some(value.clone());
                },
                PostsolveEntry::FixedInfiniteColumn { col, positive, integral, rows } => {
                    values[*col] = Some(Self::finite_substitute(
                        *col, *positive, *integral, rows, &values, num,
                    ));
                },
                PostsolveEntry::SubstitutedColumn { col, row } => {
                    values[*col] = Some(Self::solve_equality(*col, row, &values));
                },
                PostsolveEntry::ReplacedColumn { col, replacement, factor, offset } => {
                    let base = values[*replacement].clone()
                        .expect("replacement column solved before its dependent");
                    values[*col] = Some(factor * &base + offset);
                },
                PostsolveEntry::ParallelColumns { col1, col2, factor, col1_bounds, col1_integral } => {
                    let merged = values[*col2].clone()
                        .expect("merged column has a value in the reduced solution");
                    let (first, second) = Self::split_parallel(
                        &merged, factor, col1_bounds, *col1_integral, num,
                    );
                    values[*col1] = Some(first);
                    values[*col2] = Some(second);
                },
                PostsolveEntry::SubstitutedObjective { .. }
                | PostsolveEntry::BoundChange { .. }
                | PostsolveEntry::RowSideChange { .. }
                | PostsolveEntry::RedundantRow { .. }
                | PostsolveEntry::CoefficientChange { .. }
                | PostsolveEntry::SparsifiedRows { .. }
                | PostsolveEntry::ImpliedInteger { .. } => {},
            }
        }

        debug_assert!(values.iter().all(Option::is_some));
        values.into_iter().map(|value| value.unwrap_or_else(R::zero)).collect()
    }

    /// Value of a column defined by an equality row, given the other column values.
    fn solve_equality(col: usize, row: &RowSnapshot<R>, values: &[Option<R>]) -> R {
        let rhs = row.rhs.as_ref().or(row.lhs.as_ref())
            .expect("equality row has a side");
        let mut activity = R::zero();
        let mut coefficient = None;
        for (j, value) in &row.coefficients {
            if *j == col {
                coefficient = Some(value);
            } else {
                let x = values[*j].as_ref().expect("dependency solved before its dependent");
                activity += value * x;
            }
        }
        let coefficient = coefficient.expect("substituted column appears in its equality row");

        &(rhs - &activity) / coefficient
    }

    /// A finite value for a column that was fixed at infinity: large enough, in the unblocked
    /// direction, to satisfy every dropped incident row.
    fn finite_substitute(
        col: usize,
        positive: bool,
        integral: bool,
        rows: &[RowSnapshot<R>],
        values: &[Option<R>],
        num: &Num<R>,
    ) -> R {
        let mut candidate = R::zero();
        for row in rows {
            let mut activity = R::zero();
            let mut coefficient = None;
            for (j, value) in &row.coefficients {
                if *j == col {
                    coefficient = Some(value.clone());
                } else {
                    let x = values[*j].as_ref().expect("dependency solved before its dependent");
                    activity += value * x;
                }
            }
            let Some(coefficient) = coefficient else { continue };

            // The side that moving in the unblocked direction satisfies asymptotically gives no
            // requirement; the opposite side gives a threshold.
            let grows = (coefficient > R::zero()) == positive;
            let threshold = if grows {
                row.lhs.as_ref().map(|lhs| &(lhs - &activity) / &coefficient)
            } else {
                row.rhs.as_ref().map(|rhs| &(rhs - &activity) / &coefficient)
            };
            if let Some(threshold) = threshold {
                let exceeds = if positive { threshold > candidate } else { threshold < candidate };
                if exceeds {
                    candidate = threshold;
                }
            }
        }

        if integral {
            if positive { num.ceil(&candidate) } else { num.floor(&candidate) }
        } else {
            candidate
        }
    }

    /// Split the merged value `y = x2 + factor * x1` back into `(x1, x2)`, keeping `x1` inside
    /// its recorded bounds.
    fn split_parallel(
        merged: &R,
        factor: &R,
        col1_bounds: &(Option<R>, Option<R>),
        col1_integral: bool,
        num: &Num<R>,
    ) -> (R, R) {
        let (lower, upper) = col1_bounds;
        let mut first = match lower {
            Some(lower) => lower.clone(),
            None => match upper {
                Some(upper) => upper.clone(),
                None => R::zero(),
            },
        };
        if col1_integral {
            first = num.round(&first);
        }
        let second = merged - &(factor * &first);

        (first, second)
    }
}
