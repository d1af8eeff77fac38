//! Probabilities of each decision-maker's observed sequence of choices.
//!
//! Given a draw, choices in different situations are independent, so the
//! sequence probability is the product of the chosen-alternative probabilities.
//! The product is taken as `exp(rows_to_mixersᵀ · log p_chosen)`. The simulated
//! sequence probability averages the conditional one over draws, in log space.

use crate::estimate::EstimationError;
use crate::matrix::AggregationMatrix;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, Zip};

/// Simulated and per-draw sequence probabilities.
///
/// Long sequences of unlikely choices underflow in linear scale, so the
/// logarithms are kept alongside and are what the likelihood is built from.
#[derive(Clone, Debug, PartialEq)]
pub struct SequenceProbabilities {
    /// Draw-averaged probability per decision-maker.
    pub simulated: Array1<f64>,
    /// Probability per decision-maker conditional on each draw, `(mixers, draws)`.
    pub given_draws: Array2<f64>,
    /// `ln` of `simulated`, computed as a log-mean-exp over draws.
    pub log_simulated: Array1<f64>,
    /// `ln` of `given_draws`.
    pub log_given_draws: Array2<f64>,
}

/// Computes both the simulated and the per-draw sequence probabilities.
pub fn calc_choice_sequence_probs(
    prob_array: ArrayView2<f64>,
    choices: ArrayView1<f64>,
    rows_to_mixers: &AggregationMatrix,
) -> Result<SequenceProbabilities, EstimationError> {
    let num_rows = prob_array.nrows();
    for (context, found) in [
        ("choice vector versus probability rows", choices.len()),
        ("rows_to_mixers versus probability rows", rows_to_mixers.nrows()),
    ] {
        if found != num_rows {
            return Err(EstimationError::ShapeMismatch {
                context,
                expected: num_rows,
                found,
            });
        }
    }
    if prob_array.ncols() == 0 {
        return Err(EstimationError::InvalidArgument(
            "the probability array has no draw columns".to_string(),
        ));
    }
    validate_choices(choices)?;

    let mut log_chosen = Array2::<f64>::zeros(prob_array.raw_dim());
    let mut invalid = None;
    Zip::from(log_chosen.rows_mut())
        .and(prob_array.rows())
        .and(&choices)
        .for_each(|mut out, probs, &choice| {
            if choice == 1.0 {
                for (slot, &p) in out.iter_mut().zip(probs.iter()) {
                    if !(p > 0.0 && p <= 1.0) {
                        invalid = Some(p);
                    }
                    *slot = p.ln();
                }
            }
        });
    if let Some(p) = invalid {
        return Err(EstimationError::InvalidArgument(format!(
            "chosen-alternative probability {p} is outside (0, 1]"
        )));
    }

    let log_given_draws = rows_to_mixers.transpose_dot_dense(log_chosen.view())?;
    let log_simulated = log_given_draws.map_axis(Axis(1), log_mean_exp);
    if let Some(bad) = log_simulated.iter().find(|v| !v.is_finite()) {
        return Err(EstimationError::NonFiniteValues(format!(
            "log sequence probability evaluated to {bad}"
        )));
    }

    Ok(SequenceProbabilities {
        simulated: log_simulated.mapv(f64::exp),
        given_draws: log_given_draws.mapv(f64::exp),
        log_simulated,
        log_given_draws,
    })
}

/// `ln(mean(exp(values)))`, shifted by the maximum so that very negative
/// log probabilities do not underflow.
pub(crate) fn log_mean_exp(values: ArrayView1<f64>) -> f64 {
    let max = values.fold(f64::NEG_INFINITY, |acc, &v| acc.max(v));
    if !max.is_finite() {
        return max;
    }
    let mean = values.iter().map(|v| (v - max).exp()).sum::<f64>() / values.len() as f64;
    max + mean.ln()
}

/// Only the simulated (draw-averaged) sequence probabilities.
pub fn calc_simulated_sequence_probs(
    prob_array: ArrayView2<f64>,
    choices: ArrayView1<f64>,
    rows_to_mixers: &AggregationMatrix,
) -> Result<Array1<f64>, EstimationError> {
    calc_choice_sequence_probs(prob_array, choices, rows_to_mixers).map(|probs| probs.simulated)
}

pub(crate) fn validate_choices(choices: ArrayView1<f64>) -> Result<(), EstimationError> {
    match choices.iter().find(|&&c| c != 0.0 && c != 1.0) {
        Some(bad) => Err(EstimationError::InvalidArgument(format!(
            "choice indicators must be 0 or 1, found {bad}"
        ))),
        None => Ok(()),
    }
}
