//! Row-grouped compressed sparse matrices.
//!
//! The transition matrix of an MDP has one *row* per nondeterministic choice
//! and one *row group* per state: the choices available in state `s` occupy
//! the contiguous row range `group_starts[s]..group_starts[s + 1]`. A matrix
//! may also be *trivially grouped* (one row per group), which is the shape of
//! transposed matrices and of matrices induced by a scheduler.

use crate::error::{Error, Result};
use crate::numeric::Value;
use crate::solver::Scheduler;
use crate::storage::BitSet;

/// A sparse matrix in compressed-sparse-row form with contiguous row groups.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseMatrix<T> {
    num_columns: usize,
    values: Vec<T>,
    columns: Vec<usize>,
    row_starts: Vec<usize>,
    group_starts: Vec<usize>,
}

/// An incremental builder for [`SparseMatrix`].
///
/// Rows and row groups are opened in ascending order; entries of a row are
/// added with ascending column indices. This mirrors how derived matrices
/// are produced: a single pass over an existing matrix.
#[derive(Debug)]
pub struct SparseMatrixBuilder<T> {
    num_columns: usize,
    values: Vec<T>,
    columns: Vec<usize>,
    row_starts: Vec<usize>,
    group_starts: Vec<usize>,
}

impl<T: Value> SparseMatrixBuilder<T> {
    /// Creates a builder for a matrix with `num_columns` columns.
    pub fn new(num_columns: usize) -> Self {
        Self {
            num_columns,
            values: Vec::new(),
            columns: Vec::new(),
            row_starts: Vec::new(),
            group_starts: Vec::new(),
        }
    }

    /// Opens a new row group. Every subsequent row belongs to this group
    /// until the next call.
    pub fn new_row_group(&mut self) {
        self.group_starts.push(self.row_starts.len());
    }

    /// Opens a new row in the current group.
    pub fn new_row(&mut self) {
        self.row_starts.push(self.values.len());
    }

    /// Appends an entry to the current row. Columns must be strictly
    /// ascending within a row; zero entries are skipped.
    pub fn push_entry(&mut self, column: usize, value: T) {
        if value.is_zero() {
            return;
        }
        self.push_entry_allow_zero(column, value);
    }

    /// Appends an entry even when its value is zero, for paths that need
    /// explicit diagonal entries.
    pub fn push_entry_allow_zero(&mut self, column: usize, value: T) {
        assert!(column < self.num_columns, "column index out of range");
        let row_start = *self.row_starts.last().expect("no row opened");
        if self.columns.len() > row_start {
            assert!(
                *self.columns.last().unwrap() < column,
                "columns must be strictly ascending within a row"
            );
        }
        self.columns.push(column);
        self.values.push(value);
    }

    /// Finalizes the builder into a matrix.
    pub fn build(mut self) -> SparseMatrix<T> {
        self.row_starts.push(self.values.len());
        let num_rows = self.row_starts.len() - 1;
        self.group_starts.push(num_rows);
        SparseMatrix {
            num_columns: self.num_columns,
            values: self.values,
            columns: self.columns,
            row_starts: self.row_starts,
            group_starts: self.group_starts,
        }
    }
}

impl<T: Value> SparseMatrix<T> {
    /// Creates a trivially grouped matrix directly from compressed parts.
    pub(crate) fn from_parts(
        num_columns: usize,
        values: Vec<T>,
        columns: Vec<usize>,
        row_starts: Vec<usize>,
        group_starts: Option<Vec<usize>>,
    ) -> Self {
        let num_rows = row_starts.len() - 1;
        let group_starts = group_starts.unwrap_or_else(|| (0..=num_rows).collect());
        Self {
            num_columns,
            values,
            columns,
            row_starts,
            group_starts,
        }
    }

    /// The number of row groups (states).
    pub fn num_groups(&self) -> usize {
        self.group_starts.len() - 1
    }

    /// The number of rows (choices).
    pub fn num_rows(&self) -> usize {
        self.row_starts.len() - 1
    }

    /// The number of columns.
    pub fn num_columns(&self) -> usize {
        self.num_columns
    }

    /// The number of stored entries.
    pub fn num_entries(&self) -> usize {
        self.values.len()
    }

    /// Whether each row forms its own group.
    pub fn has_trivial_grouping(&self) -> bool {
        self.num_rows() == self.num_groups()
    }

    /// The row range of group `group`.
    pub fn rows_of_group(&self, group: usize) -> std::ops::Range<usize> {
        self.group_starts[group]..self.group_starts[group + 1]
    }

    /// The group a row belongs to.
    pub fn group_of_row(&self, row: usize) -> usize {
        match self.group_starts.binary_search(&row) {
            Ok(mut group) => {
                // empty groups share a start offset; the row belongs to the
                // last group starting at it
                while group + 1 < self.group_starts.len() && self.group_starts[group + 1] == row {
                    group += 1;
                }
                group.min(self.num_groups() - 1)
            }
            Err(next) => next - 1,
        }
    }

    /// The row-group start offsets, `num_groups() + 1` entries.
    pub fn group_starts(&self) -> &[usize] {
        &self.group_starts
    }

    /// Iterates over the `(column, value)` entries of a row.
    pub fn row(&self, row: usize) -> impl Iterator<Item = (usize, T)> + '_ {
        let range = self.row_starts[row]..self.row_starts[row + 1];
        self.columns[range.clone()]
            .iter()
            .cloned()
            .zip(self.values[range].iter().cloned())
    }

    /// The sum of the entries of a row.
    pub fn row_sum(&self, row: usize) -> T {
        let mut sum = T::zero();
        for (_, value) in self.row(row) {
            sum += value;
        }
        sum
    }

    /// Transposes the matrix into a trivially grouped matrix with one row
    /// per column of `self`; columns of no incoming entry yield empty rows.
    ///
    /// With `join_groups`, entries of the transpose reference the source row
    /// *group* instead of the source row, merging duplicates by summation;
    /// this is the state-indexed backward-transition relation.
    pub fn transpose(&self, join_groups: bool) -> SparseMatrix<T> {
        let num_result_rows = self.num_columns;
        let num_result_columns = if join_groups {
            self.num_groups()
        } else {
            self.num_rows()
        };
        let mut counts = vec![0usize; num_result_rows + 1];
        for &column in &self.columns {
            counts[column + 1] += 1;
        }
        for i in 1..counts.len() {
            counts[i] += counts[i - 1];
        }
        let row_starts = counts.clone();
        let mut positions = counts;
        let mut values = vec![T::zero(); self.num_entries()];
        let mut columns = vec![0usize; self.num_entries()];
        for group in 0..self.num_groups() {
            for row in self.rows_of_group(group) {
                let source = if join_groups { group } else { row };
                for (column, value) in self.row(row) {
                    let pos = positions[column];
                    values[pos] = value;
                    columns[pos] = source;
                    positions[column] += 1;
                }
            }
        }
        let mut result =
            SparseMatrix::from_parts(num_result_columns, values, columns, row_starts, None);
        if join_groups {
            result.merge_duplicate_columns();
        }
        result
    }

    // source rows are visited in ascending order, so transposed entries end
    // up sorted by (column, source) without an extra sort
    fn merge_duplicate_columns(&mut self) {
        let mut values = Vec::with_capacity(self.values.len());
        let mut columns = Vec::with_capacity(self.columns.len());
        let mut row_starts = Vec::with_capacity(self.row_starts.len());
        row_starts.push(0);
        for row in 0..self.num_rows() {
            let mut last_column = usize::MAX;
            for (column, value) in self.row(row) {
                if column == last_column {
                    *values.last_mut().unwrap() += value;
                } else {
                    columns.push(column);
                    values.push(value);
                    last_column = column;
                }
            }
            row_starts.push(values.len());
        }
        self.values = values;
        self.columns = columns;
        self.row_starts = row_starts;
        self.group_starts = (0..=self.num_rows()).collect();
    }

    /// Extracts the submatrix over the states in `state_mask`, keeping only
    /// rows in `choice_mask` (all rows of retained groups if `None`).
    ///
    /// States are renumbered contiguously through `state_mask`; entries
    /// leading outside the retained states are dropped, so the result may be
    /// substochastic.
    pub fn submatrix(
        &self,
        state_mask: &BitSet,
        choice_mask: Option<&BitSet>,
    ) -> Result<SparseMatrix<T>> {
        if state_mask.len() != self.num_groups() {
            return Err(Error::InvalidArgument(format!(
                "state mask of length {} does not match the {} row groups",
                state_mask.len(),
                self.num_groups()
            )));
        }
        if let Some(mask) = choice_mask {
            if mask.len() != self.num_rows() {
                return Err(Error::DimensionMismatch {
                    expected: self.num_rows(),
                    actual: mask.len(),
                });
            }
        }
        let column_map = renumbering(state_mask);
        let mut builder = SparseMatrixBuilder::new(state_mask.count());
        for state in state_mask.ones() {
            builder.new_row_group();
            for row in self.rows_of_group(state) {
                if choice_mask.map_or(true, |mask| mask.get(row)) {
                    builder.new_row();
                    for (column, value) in self.row(row) {
                        if let Some(new_column) = column_map[column] {
                            builder.push_entry(new_column, value);
                        }
                    }
                }
            }
        }
        Ok(builder.build())
    }

    /// Selects the scheduler's choice row from each group, producing the
    /// trivially grouped square matrix induced by the scheduler.
    ///
    /// With `insert_diagonal_entries`, an explicit zero diagonal entry is
    /// stored where none exists, so the result can be turned into an
    /// equation system in place.
    pub fn restrict_to_scheduler(
        &self,
        scheduler: &Scheduler,
        insert_diagonal_entries: bool,
    ) -> Result<SparseMatrix<T>> {
        if scheduler.len() != self.num_groups() {
            return Err(Error::DimensionMismatch {
                expected: self.num_groups(),
                actual: scheduler.len(),
            });
        }
        let mut builder = SparseMatrixBuilder::new(self.num_columns);
        for group in 0..self.num_groups() {
            let rows = self.rows_of_group(group);
            let local = scheduler[group] as usize;
            let row = rows.start + local;
            if row >= rows.end {
                return Err(Error::InvalidArgument(format!(
                    "scheduler chooses local index {} in group {} of size {}",
                    local,
                    group,
                    rows.end - rows.start
                )));
            }
            builder.new_row_group();
            builder.new_row();
            let mut diagonal_inserted = false;
            for (column, value) in self.row(row) {
                if insert_diagonal_entries && !diagonal_inserted && column >= group {
                    if column > group {
                        builder.push_entry_allow_zero(group, T::zero());
                    }
                    diagonal_inserted = true;
                }
                builder.push_entry_allow_zero(column, value);
            }
            if insert_diagonal_entries && !diagonal_inserted {
                builder.push_entry_allow_zero(group, T::zero());
            }
        }
        Ok(builder.build())
    }

    /// For every row of a group in `row_group_mask`, in ascending order, the
    /// sum of the row entries with columns in `column_mask`.
    pub fn row_group_constrained_sum(
        &self,
        row_group_mask: &BitSet,
        column_mask: &BitSet,
    ) -> Vec<T> {
        let mut result = Vec::new();
        for group in row_group_mask.ones() {
            for row in self.rows_of_group(group) {
                let mut sum = T::zero();
                for (column, value) in self.row(row) {
                    if column_mask.get(column) {
                        sum += value;
                    }
                }
                result.push(sum);
            }
        }
        result
    }

    /// Computes `result[r] = Σ_c A(r, c)·x[c] + add[r]` for every row.
    pub fn multiply(&self, x: &[T], add: Option<&[T]>, result: &mut [T]) -> Result<()> {
        if x.len() != self.num_columns {
            return Err(Error::DimensionMismatch {
                expected: self.num_columns,
                actual: x.len(),
            });
        }
        if result.len() != self.num_rows() {
            return Err(Error::DimensionMismatch {
                expected: self.num_rows(),
                actual: result.len(),
            });
        }
        if let Some(add) = add {
            if add.len() != self.num_rows() {
                return Err(Error::DimensionMismatch {
                    expected: self.num_rows(),
                    actual: add.len(),
                });
            }
        }
        for row in 0..self.num_rows() {
            let mut sum = add.map_or_else(T::zero, |v| v[row]);
            for (column, value) in self.row(row) {
                sum += value * x[column];
            }
            result[row] = sum;
        }
        Ok(())
    }

    /// Transforms the matrix in place into `I − A`.
    ///
    /// Requires a trivially grouped square matrix with explicit diagonal
    /// entries in every row (see [`SparseMatrix::restrict_to_scheduler`]).
    pub fn convert_to_equation_system(&mut self) -> Result<()> {
        if !self.has_trivial_grouping() || self.num_rows() != self.num_columns {
            return Err(Error::invalid_argument(
                "equation system conversion requires a trivially grouped square matrix",
            ));
        }
        for row in 0..self.num_rows() {
            let range = self.row_starts[row]..self.row_starts[row + 1];
            let mut has_diagonal = false;
            for i in range {
                if self.columns[i] == row {
                    self.values[i] = T::one() - self.values[i];
                    has_diagonal = true;
                } else {
                    self.values[i] = -self.values[i];
                }
            }
            if !has_diagonal {
                return Err(Error::invalid_argument(
                    "equation system conversion requires explicit diagonal entries",
                ));
            }
        }
        Ok(())
    }
}

/// Maps each index to its rank within `mask`, `None` outside the mask.
pub(crate) fn renumbering(mask: &BitSet) -> Vec<Option<usize>> {
    let mut map = vec![None; mask.len()];
    for (new, old) in mask.ones().enumerate() {
        map[old] = Some(new);
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The three-state MDP used throughout the checker tests: state 0 has a
    /// coin-flip choice and a direct choice to state 2, states 1 and 2 are
    /// absorbing.
    fn three_state_matrix() -> SparseMatrix<f64> {
        let mut builder = SparseMatrixBuilder::new(3);
        builder.new_row_group();
        builder.new_row();
        builder.push_entry(0, 0.5);
        builder.push_entry(1, 0.5);
        builder.new_row();
        builder.push_entry(2, 1.0);
        builder.new_row_group();
        builder.new_row();
        builder.push_entry(1, 1.0);
        builder.new_row_group();
        builder.new_row();
        builder.push_entry(2, 1.0);
        builder.build()
    }

    #[test]
    fn test_build_shape() {
        let matrix = three_state_matrix();
        assert_eq!(matrix.num_groups(), 3);
        assert_eq!(matrix.num_rows(), 4);
        assert_eq!(matrix.num_entries(), 5);
        assert_eq!(matrix.rows_of_group(0), 0..2);
        assert_eq!(matrix.rows_of_group(1), 2..3);
        assert_eq!(matrix.group_of_row(0), 0);
        assert_eq!(matrix.group_of_row(1), 0);
        assert_eq!(matrix.group_of_row(2), 1);
        assert_eq!(matrix.group_of_row(3), 2);
        assert!((matrix.row_sum(0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_multiply() {
        let matrix = three_state_matrix();
        let x = vec![1.0, 2.0, 4.0];
        let add = vec![0.0, 1.0, 0.0, 0.0];
        let mut result = vec![0.0; 4];
        matrix.multiply(&x, Some(&add), &mut result).unwrap();
        assert_eq!(result, vec![1.5, 5.0, 2.0, 4.0]);

        let mut short = vec![0.0; 3];
        assert!(matches!(
            matrix.multiply(&x, None, &mut short),
            Err(Error::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_transpose() {
        let matrix = three_state_matrix();
        let backward = matrix.transpose(true);
        assert!(backward.has_trivial_grouping());
        assert_eq!(backward.num_rows(), 3);
        // predecessors of state 2 are states 0 (via c1) and 2
        assert_eq!(backward.row(2).collect::<Vec<_>>(), vec![(0, 1.0), (2, 1.0)]);
        // predecessors of state 1 are states 0 and 1
        assert_eq!(backward.row(1).collect::<Vec<_>>(), vec![(0, 0.5), (1, 1.0)]);

        let by_choice = matrix.transpose(false);
        assert_eq!(by_choice.row(2).collect::<Vec<_>>(), vec![(1, 1.0), (3, 1.0)]);
    }

    #[test]
    fn test_submatrix() {
        let matrix = three_state_matrix();
        let states = BitSet::from_indices(3, vec![0, 2]);
        let sub = matrix.submatrix(&states, None).unwrap();
        assert_eq!(sub.num_groups(), 2);
        assert_eq!(sub.num_rows(), 3);
        // the coin-flip row keeps only the self-loop half
        assert_eq!(sub.row(0).collect::<Vec<_>>(), vec![(0, 0.5)]);
        // state 2 renumbered to 1
        assert_eq!(sub.row(1).collect::<Vec<_>>(), vec![(1, 1.0)]);

        let bad_mask = BitSet::from_indices(4, vec![0]);
        assert!(matches!(
            matrix.submatrix(&bad_mask, None),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_row_group_constrained_sum() {
        let matrix = three_state_matrix();
        let groups = BitSet::from_indices(3, vec![0]);
        let target = BitSet::from_indices(3, vec![2]);
        assert_eq!(matrix.row_group_constrained_sum(&groups, &target), vec![0.0, 1.0]);
    }

    #[test]
    fn test_equation_system() {
        let matrix = three_state_matrix();
        let scheduler = Scheduler::from_choices(vec![0, 0, 0]);
        let mut induced = matrix.restrict_to_scheduler(&scheduler, true).unwrap();
        induced.convert_to_equation_system().unwrap();
        // row 0: 1 − 0.5 on the diagonal, −0.5 to state 1
        assert_eq!(induced.row(0).collect::<Vec<_>>(), vec![(0, 0.5), (1, -0.5)]);
        // the self-loops become 1 − 1 = 0 on the diagonal
        assert_eq!(induced.row(1).collect::<Vec<_>>(), vec![(1, 0.0)]);
        assert_eq!(induced.row(2).collect::<Vec<_>>(), vec![(2, 0.0)]);
    }
}
