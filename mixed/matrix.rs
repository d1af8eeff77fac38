//! Sparse "rows-to-X" membership matrices.
//!
//! Every long-format row belongs to one choice situation, one alternative, and
//! one decision-maker. These memberships are stored as CSR matrices with a 1 in
//! column `g` of row `r` when row `r` belongs to group `g`. Group sums are then a
//! transposed product, and broadcasting a per-group quantity back to the rows is
//! a plain product.

use crate::estimate::EstimationError;
use faer::sparse::{SparseRowMat, Triplet};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use std::fmt;

/// Boolean membership matrix mapping observation rows onto groups.
///
/// The column order is the ascending order of the group labels, so the column of
/// a decision-maker is its rank among the distinct decision-maker ids.
#[derive(Clone)]
pub struct AggregationMatrix {
    matrix: SparseRowMat<usize, f64>,
    labels: Vec<u64>,
}

impl fmt::Debug for AggregationMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregationMatrix")
            .field("nrows", &self.nrows())
            .field("ncols", &self.ncols())
            .field("labels", &self.labels)
            .finish()
    }
}

impl AggregationMatrix {
    /// Builds the membership matrix of an id vector. One column per distinct id.
    pub fn from_ids(ids: ArrayView1<u64>) -> Result<Self, EstimationError> {
        if ids.is_empty() {
            return Err(EstimationError::InvalidArgument(
                "cannot build an aggregation matrix from an empty id vector".to_string(),
            ));
        }
        let mut labels: Vec<u64> = ids.to_vec();
        labels.sort_unstable();
        labels.dedup();

        let mut group_of_row = Vec::with_capacity(ids.len());
        for id in ids.iter() {
            let group = labels.binary_search(id).map_err(|_| {
                EstimationError::InvalidArgument(format!("id {id} vanished while building groups"))
            })?;
            group_of_row.push(group);
        }
        Self::build(&group_of_row, labels)
    }

    /// Builds the membership matrix from zero-based group indices.
    pub fn from_assignments(group_of_row: &[usize], num_groups: usize) -> Result<Self, EstimationError> {
        if let Some(&bad) = group_of_row.iter().find(|&&g| g >= num_groups) {
            return Err(EstimationError::InvalidArgument(format!(
                "group index {bad} is out of range for {num_groups} groups"
            )));
        }
        Self::build(group_of_row, (0..num_groups as u64).collect())
    }

    /// Builds the matrix from a dense 0/1 array. Rows are not required to form a
    /// partition here; consumers that need one check it through [`Self::group_of_rows`].
    pub fn from_dense(dense: ArrayView2<f64>) -> Result<Self, EstimationError> {
        let mut triplets = Vec::new();
        for ((row, col), &value) in dense.indexed_iter() {
            if value == 1.0 {
                triplets.push(Triplet::new(row, col, 1.0));
            } else if value != 0.0 {
                return Err(EstimationError::InvalidArgument(format!(
                    "membership entry ({row}, {col}) is {value}; only 0 and 1 are allowed"
                )));
            }
        }
        let matrix = SparseRowMat::try_new_from_triplets(dense.nrows(), dense.ncols(), &triplets)
            .map_err(|err| EstimationError::SparseConstruction(format!("{err:?}")))?;
        Ok(Self {
            matrix,
            labels: (0..dense.ncols() as u64).collect(),
        })
    }

    fn build(group_of_row: &[usize], labels: Vec<u64>) -> Result<Self, EstimationError> {
        let triplets: Vec<Triplet<usize, usize, f64>> = group_of_row
            .iter()
            .enumerate()
            .map(|(row, &group)| Triplet::new(row, group, 1.0))
            .collect();
        let matrix = SparseRowMat::try_new_from_triplets(group_of_row.len(), labels.len(), &triplets)
            .map_err(|err| EstimationError::SparseConstruction(format!("{err:?}")))?;
        Ok(Self { matrix, labels })
    }

    pub fn nrows(&self) -> usize {
        self.matrix.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.matrix.ncols()
    }

    /// Labels of the group columns, ascending.
    pub fn labels(&self) -> &[u64] {
        &self.labels
    }

    /// Column index of a group label, if present.
    pub fn position_of(&self, label: u64) -> Option<usize> {
        self.labels.binary_search(&label).ok()
    }

    /// Returns the single group of every row.
    ///
    /// Fails when a row belongs to zero or to several groups, since every
    /// downstream aggregation assumes the rows are partitioned.
    pub fn group_of_rows(&self) -> Result<Vec<usize>, EstimationError> {
        let (symbolic, values) = self.matrix.parts();
        let row_ptr = symbolic.row_ptr();
        let col_idx = symbolic.col_idx();
        let mut groups = Vec::with_capacity(self.nrows());
        for row in 0..self.nrows() {
            let members: Vec<usize> = (row_ptr[row]..row_ptr[row + 1])
                .filter(|&idx| values[idx] != 0.0)
                .map(|idx| col_idx[idx])
                .collect();
            match members.as_slice() {
                [group] => groups.push(*group),
                other => {
                    return Err(EstimationError::InvalidArgument(format!(
                        "row {row} belongs to {} groups; each row must belong to exactly one",
                        other.len()
                    )));
                }
            }
        }
        Ok(groups)
    }

    /// Keeps only the listed rows, in the listed order. Columns are unchanged.
    pub fn select_rows(&self, rows: &[usize]) -> Result<Self, EstimationError> {
        let (symbolic, values) = self.matrix.parts();
        let row_ptr = symbolic.row_ptr();
        let col_idx = symbolic.col_idx();
        let mut triplets = Vec::with_capacity(rows.len());
        for (new_row, &old_row) in rows.iter().enumerate() {
            if old_row >= self.nrows() {
                return Err(EstimationError::InvalidArgument(format!(
                    "row {old_row} is out of range for {} rows",
                    self.nrows()
                )));
            }
            for idx in row_ptr[old_row]..row_ptr[old_row + 1] {
                triplets.push(Triplet::new(new_row, col_idx[idx], values[idx]));
            }
        }
        let matrix = SparseRowMat::try_new_from_triplets(rows.len(), self.ncols(), &triplets)
            .map_err(|err| EstimationError::SparseConstruction(format!("{err:?}")))?;
        Ok(Self {
            matrix,
            labels: self.labels.clone(),
        })
    }

    /// `self · B`: copies each group's row of `B` onto the member rows.
    pub fn dot_dense(&self, group_values: ArrayView2<f64>) -> Result<Array2<f64>, EstimationError> {
        if group_values.nrows() != self.ncols() {
            return Err(EstimationError::ShapeMismatch {
                context: "aggregation product",
                expected: self.ncols(),
                found: group_values.nrows(),
            });
        }
        let mut output = Array2::<f64>::zeros((self.nrows(), group_values.ncols()));
        let (symbolic, values) = self.matrix.parts();
        let row_ptr = symbolic.row_ptr();
        let col_idx = symbolic.col_idx();
        for row in 0..self.nrows() {
            let mut out_row = output.row_mut(row);
            for idx in row_ptr[row]..row_ptr[row + 1] {
                out_row.scaled_add(values[idx], &group_values.row(col_idx[idx]));
            }
        }
        Ok(output)
    }

    /// `selfᵀ · A`: sums the rows of `A` within each group.
    pub fn transpose_dot_dense(&self, row_values: ArrayView2<f64>) -> Result<Array2<f64>, EstimationError> {
        if row_values.nrows() != self.nrows() {
            return Err(EstimationError::ShapeMismatch {
                context: "transposed aggregation product",
                expected: self.nrows(),
                found: row_values.nrows(),
            });
        }
        let mut output = Array2::<f64>::zeros((self.ncols(), row_values.ncols()));
        let (symbolic, values) = self.matrix.parts();
        let row_ptr = symbolic.row_ptr();
        let col_idx = symbolic.col_idx();
        for row in 0..self.nrows() {
            let source = row_values.row(row);
            for idx in row_ptr[row]..row_ptr[row + 1] {
                output.row_mut(col_idx[idx]).scaled_add(values[idx], &source);
            }
        }
        Ok(output)
    }

    pub fn dot_vector(&self, group_values: ArrayView1<f64>) -> Result<Array1<f64>, EstimationError> {
        if group_values.len() != self.ncols() {
            return Err(EstimationError::ShapeMismatch {
                context: "aggregation vector product",
                expected: self.ncols(),
                found: group_values.len(),
            });
        }
        let (symbolic, values) = self.matrix.parts();
        let row_ptr = symbolic.row_ptr();
        let col_idx = symbolic.col_idx();
        let output = Array1::from_shape_fn(self.nrows(), |row| {
            (row_ptr[row]..row_ptr[row + 1])
                .map(|idx| values[idx] * group_values[col_idx[idx]])
                .sum::<f64>()
        });
        Ok(output)
    }

    pub fn transpose_dot_vector(&self, row_values: ArrayView1<f64>) -> Result<Array1<f64>, EstimationError> {
        if row_values.len() != self.nrows() {
            return Err(EstimationError::ShapeMismatch {
                context: "transposed aggregation vector product",
                expected: self.nrows(),
                found: row_values.len(),
            });
        }
        let mut output = Array1::<f64>::zeros(self.ncols());
        let (symbolic, values) = self.matrix.parts();
        let row_ptr = symbolic.row_ptr();
        let col_idx = symbolic.col_idx();
        for row in 0..self.nrows() {
            for idx in row_ptr[row]..row_ptr[row + 1] {
                output[col_idx[idx]] += values[idx] * row_values[row];
            }
        }
        Ok(output)
    }
}
