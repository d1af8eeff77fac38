//! Posterior-weighted prediction for panels of decision-makers.
//!
//! Each decision-maker's draws start with equal weight. When earlier choices of
//! that decision-maker are known, draw `d` is reweighted by the probability of
//! the observed history under `d`, normalized over draws. The predicted
//! probability of a new row is the weighted average of its per-draw (kernel)
//! probabilities. The result is not renormalized within situations.

use crate::data::LongFormatData;
use crate::design::create_expanded_design_for_mixing;
use crate::estimate::EstimationError;
use crate::matrix::AggregationMatrix;
use crate::probability::{ProbabilityInputs, UtilityTransform, calc_long_probabilities};
use crate::sequence::calc_choice_sequence_probs;
use ndarray::{Array1, Array2, ArrayView1, Axis};

/// Everything a panel prediction needs besides the model structure itself.
pub struct PanelPredictionInputs<'a> {
    pub coefficients: ArrayView1<'a, f64>,
    pub new_data: &'a LongFormatData,
    /// Previously observed choices. Only rows of decision-makers present in
    /// `new_data` are used.
    pub history: Option<&'a LongFormatData>,
    pub mixing_positions: &'a [usize],
    /// One `(new decision-makers, draws)` matrix per mixing variable, rows in
    /// ascending decision-maker id order.
    pub draws: &'a [Array2<f64>],
    pub transform: &'a dyn UtilityTransform,
}

/// Predicted probabilities with the draw weights that produced them.
#[derive(Clone, Debug)]
pub struct PanelPrediction {
    /// One probability per new row.
    pub probabilities: Array1<f64>,
    /// Normalized draw weights, `(decision-makers, draws)`.
    pub draw_weights: Array2<f64>,
    /// Decision-maker id of each row of `draw_weights`.
    pub mixer_ids: Vec<u64>,
}

impl PanelPrediction {
    /// Probability of the chosen alternative of every situation.
    pub fn chosen_situation_probs(
        &self,
        choices: ArrayView1<f64>,
        rows_to_situations: &AggregationMatrix,
    ) -> Result<Array1<f64>, EstimationError> {
        if choices.len() != self.probabilities.len() {
            return Err(EstimationError::ShapeMismatch {
                context: "choice vector versus predicted rows",
                expected: self.probabilities.len(),
                found: choices.len(),
            });
        }
        let chosen = &self.probabilities * &choices;
        rows_to_situations.transpose_dot_vector(chosen.view())
    }
}

/// Normalized posterior draw weights of the new decision-makers.
///
/// Decision-makers without history rows keep the uniform weight `1 / draws`:
/// their sequence probability is an empty product, equal to one under every draw.
fn posterior_draw_weights(
    history: &LongFormatData,
    inputs: &PanelPredictionInputs,
    new_rows_to_mixers: &AggregationMatrix,
) -> Result<Option<Array2<f64>>, EstimationError> {
    let history_choices = history.choices.as_ref().ok_or_else(|| {
        EstimationError::InvalidArgument("history data must carry a choice column".to_string())
    })?;
    if history.design.ncols() != inputs.new_data.design.ncols() {
        return Err(EstimationError::ShapeMismatch {
            context: "history design columns versus new design columns",
            expected: inputs.new_data.design.ncols(),
            found: history.design.ncols(),
        });
    }

    let mut kept_rows = Vec::new();
    let mut mixer_of_row = Vec::new();
    for (row, &id) in history.mixing_ids.iter().enumerate() {
        if let Some(column) = new_rows_to_mixers.position_of(id) {
            kept_rows.push(row);
            mixer_of_row.push(column);
        }
    }
    if kept_rows.is_empty() {
        return Ok(None);
    }
    let mut with_history = mixer_of_row.clone();
    with_history.sort_unstable();
    with_history.dedup();
    log::debug!(
        "Using {} history rows to reweight draws of {} of {} decision-makers.",
        kept_rows.len(),
        with_history.len(),
        new_rows_to_mixers.ncols()
    );

    let relevant = history.select_rows(&kept_rows)?;
    let relevant_choices = history_choices.select(Axis(0), &kept_rows);
    let mappings = relevant.mappings()?;
    // columns of the new decision-makers, so draw rows line up with the new data
    let rows_to_new_mixers =
        AggregationMatrix::from_assignments(&mixer_of_row, new_rows_to_mixers.ncols())?;
    let design_3d = create_expanded_design_for_mixing(
        relevant.design.view(),
        inputs.draws,
        inputs.mixing_positions,
        &rows_to_new_mixers,
    )?;
    let probability_inputs = ProbabilityInputs {
        design: design_3d.view().into(),
        alt_ids: relevant.alternative_ids.view(),
        rows_to_situations: &mappings.rows_to_situations,
        rows_to_alts: &mappings.rows_to_alts,
        transform: inputs.transform,
    };
    let history_probs = calc_long_probabilities(inputs.coefficients, &probability_inputs)?;
    let sequences =
        calc_choice_sequence_probs(history_probs.view(), relevant_choices.view(), &rows_to_new_mixers)?;

    // normalize in log space; the linear sequence probabilities may underflow
    let mut weights = sequences.log_given_draws;
    for (mixer, mut row) in weights.axis_iter_mut(Axis(0)).enumerate() {
        let max = row.fold(f64::NEG_INFINITY, |acc, &v| acc.max(v));
        row.mapv_inplace(|v| (v - max).exp());
        let total = row.sum();
        if !(total > 0.0 && total.is_finite()) {
            return Err(EstimationError::NonFiniteValues(format!(
                "history sequence probabilities of decision-maker {} sum to {total} over draws",
                new_rows_to_mixers.labels()[mixer]
            )));
        }
        row /= total;
    }
    Ok(Some(weights))
}

/// Posterior-weighted probability of every row of the new data.
pub fn panel_predict(inputs: &PanelPredictionInputs) -> Result<PanelPrediction, EstimationError> {
    let new_data = inputs.new_data;
    let mappings = new_data.mappings()?;
    let design_3d = create_expanded_design_for_mixing(
        new_data.design.view(),
        inputs.draws,
        inputs.mixing_positions,
        &mappings.rows_to_mixers,
    )?;
    let probability_inputs = ProbabilityInputs {
        design: design_3d.view().into(),
        alt_ids: new_data.alternative_ids.view(),
        rows_to_situations: &mappings.rows_to_situations,
        rows_to_alts: &mappings.rows_to_alts,
        transform: inputs.transform,
    };
    let kernel_probs = calc_long_probabilities(inputs.coefficients, &probability_inputs)?;
    let num_draws = kernel_probs.ncols();

    let posterior = match inputs.history {
        Some(history) => posterior_draw_weights(history, inputs, &mappings.rows_to_mixers)?,
        None => None,
    };
    let draw_weights = posterior.unwrap_or_else(|| {
        Array2::from_elem((mappings.rows_to_mixers.ncols(), num_draws), 1.0 / num_draws as f64)
    });

    let long_weights = mappings.rows_to_mixers.dot_dense(draw_weights.view())?;
    let probabilities = (kernel_probs * &long_weights).sum_axis(Axis(1));

    Ok(PanelPrediction {
        probabilities,
        draw_weights,
        mixer_ids: mappings.rows_to_mixers.labels().to_vec(),
    })
}
