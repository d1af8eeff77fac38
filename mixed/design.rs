//! Construction of the draw-expanded design tensor.
//!
//! The 2D design has one row per (situation, alternative) pair. For simulation
//! each row is repeated once per draw, and one extra column is appended per
//! mixing variable holding the mixing column scaled by the draw of the row's
//! decision-maker. With coefficients `[beta; sigma]` the utility of draw `d` is
//! then `x·beta + sum_i x_ci * sigma_i * z_id`.

use crate::estimate::EstimationError;
use crate::matrix::AggregationMatrix;
use ndarray::{Array2, Array3, ArrayView2, Axis, s};

/// Maps mixing-variable names onto their positions among the index variables.
pub fn convert_mixing_names_to_positions(
    mixing_names: &[String],
    index_names: &[String],
) -> Result<Vec<usize>, EstimationError> {
    mixing_names
        .iter()
        .map(|name| {
            index_names
                .iter()
                .position(|candidate| candidate == name)
                .ok_or_else(|| EstimationError::LookupError { name: name.clone() })
        })
        .collect()
}

/// Builds the `(rows, draws, vars + mixing_vars)` design tensor.
///
/// Columns `0..vars` repeat `design` unchanged across the draw axis. Column
/// `vars + i` holds `design[:, mixing_positions[i]]` times the draw of each row's
/// decision-maker, taken from `draws[i]` through `rows_to_mixers`. The input
/// design is never modified.
pub fn create_expanded_design_for_mixing(
    design: ArrayView2<f64>,
    draws: &[Array2<f64>],
    mixing_positions: &[usize],
    rows_to_mixers: &AggregationMatrix,
) -> Result<Array3<f64>, EstimationError> {
    if draws.len() != mixing_positions.len() {
        return Err(EstimationError::ShapeMismatch {
            context: "draw matrices per mixing variable",
            expected: mixing_positions.len(),
            found: draws.len(),
        });
    }
    if rows_to_mixers.nrows() != design.nrows() {
        return Err(EstimationError::ShapeMismatch {
            context: "rows of rows_to_mixers versus design rows",
            expected: design.nrows(),
            found: rows_to_mixers.nrows(),
        });
    }
    let num_vars = design.ncols();
    if let Some(&bad) = mixing_positions.iter().find(|&&pos| pos >= num_vars) {
        return Err(EstimationError::InvalidArgument(format!(
            "mixing position {bad} is outside a design with {num_vars} columns"
        )));
    }

    let num_draws = match draws.first() {
        Some(first) => first.ncols(),
        None => 1,
    };
    for matrix in draws {
        if matrix.ncols() != num_draws {
            return Err(EstimationError::ShapeMismatch {
                context: "number of draws across mixing variables",
                expected: num_draws,
                found: matrix.ncols(),
            });
        }
        if matrix.nrows() != rows_to_mixers.ncols() {
            return Err(EstimationError::ShapeMismatch {
                context: "draw rows versus decision-makers",
                expected: rows_to_mixers.ncols(),
                found: matrix.nrows(),
            });
        }
    }

    let num_rows = design.nrows();
    let total_vars = num_vars + mixing_positions.len();
    let mut design_3d = Array3::<f64>::zeros((num_rows, num_draws, total_vars));
    for mut draw_slice in design_3d.axis_iter_mut(Axis(1)) {
        draw_slice.slice_mut(s![.., ..num_vars]).assign(&design);
    }

    for (offset, (&position, mixer_draws)) in mixing_positions.iter().zip(draws).enumerate() {
        // rows x draws: each row receives its decision-maker's draws
        let long_draws = rows_to_mixers.dot_dense(mixer_draws.view())?;
        let base = design.column(position);
        let mut target = design_3d.slice_mut(s![.., .., num_vars + offset]);
        for ((row, draw), value) in target.indexed_iter_mut() {
            *value = base[row] * long_draws[[row, draw]];
        }
    }

    Ok(design_3d)
}
