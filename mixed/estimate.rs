//! # Simulated Maximum Likelihood for the Mixed Logit
//!
//! This module assembles the objective an external optimizer works on:
//!
//! 1.  **Log-likelihood:** `sum_m ln P_m`, where `P_m` is the draw-averaged
//!     probability of decision-maker `m`'s observed choice sequence.
//!
//! 2.  **Gradient:** every row's probability residual `y_i - p_id` is weighted
//!     by `P_m|d / P_m`, the share of draw `d` in the decision-maker's simulated
//!     sequence probability. The weighted residual multiplies the expanded design
//!     row and is averaged over draws.
//!
//! 3.  **BHHH Hessian:** the negated sum over decision-makers of the outer
//!     products of their individual gradient contributions.
//!
//! All three are computed from one shared weighted-residual array so that the
//! gradient and the Hessian approximation always agree with the likelihood the
//! optimizer sees.

use crate::data::{LongFormMappings, LongFormatData};
use crate::design::create_expanded_design_for_mixing;
use crate::draws::get_normal_draws;
use crate::matrix::AggregationMatrix;
use crate::model::{MixedLogitConfig, MixedLogitSpec, TrainedModel};
use crate::probability::{IdentityTransform, ProbabilityInputs, UtilityTransform, calc_long_probabilities};
use crate::sequence::{SequenceProbabilities, calc_choice_sequence_probs};
use crate::types::Coefficients;
use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView3, Axis};
use thiserror::Error;

/// A comprehensive error type for the mixed logit computations.
#[derive(Error, Debug)]
pub enum EstimationError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Shape mismatch for {context}: expected {expected}, found {found}.")]
    ShapeMismatch {
        context: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("Mixing variable '{name}' is not one of the index variables.")]
    LookupError { name: String },

    #[error("Non-finite values were encountered: {0}")]
    NonFiniteValues(String),

    #[error("Failed to build a sparse aggregation matrix: {0}")]
    SparseConstruction(String),
}

/// Borrowed inputs of one likelihood evaluation.
#[derive(Clone, Copy)]
pub struct MixedLogitInputs<'a> {
    /// `(rows, draws, coefficients)` design tensor.
    pub design_3d: ArrayView3<'a, f64>,
    pub alt_ids: ArrayView1<'a, u64>,
    pub rows_to_situations: &'a AggregationMatrix,
    pub rows_to_alts: &'a AggregationMatrix,
    pub rows_to_mixers: &'a AggregationMatrix,
    pub choices: ArrayView1<'a, f64>,
    pub transform: &'a dyn UtilityTransform,
    /// Optional ridge penalty `lambda * sum(beta^2)` subtracted from the log-likelihood.
    pub ridge: Option<f64>,
}

impl<'a> MixedLogitInputs<'a> {
    fn probability_inputs(&self) -> ProbabilityInputs<'a> {
        ProbabilityInputs {
            design: self.design_3d.into(),
            alt_ids: self.alt_ids,
            rows_to_situations: self.rows_to_situations,
            rows_to_alts: self.rows_to_alts,
            transform: self.transform,
        }
    }

    fn ridge_strength(&self) -> Result<f64, EstimationError> {
        match self.ridge {
            None => Ok(0.0),
            Some(ridge) if ridge.is_finite() && ridge >= 0.0 => Ok(ridge),
            Some(ridge) => Err(EstimationError::InvalidArgument(format!(
                "ridge strength must be finite and non-negative, got {ridge}"
            ))),
        }
    }
}

/// The three quantities an optimizer needs, from one evaluation.
#[derive(Clone, Debug)]
pub struct MixedLogitEvaluation {
    pub log_likelihood: f64,
    pub gradient: Array1<f64>,
    pub bhhh_hessian: Array2<f64>,
    /// Simulated sequence probability of each decision-maker.
    pub simulated_probs: Array1<f64>,
}

/// Long probabilities and the sequence probabilities derived from them.
struct Simulation {
    long_probs: Array2<f64>,
    sequences: SequenceProbabilities,
}

fn simulate(params: ArrayView1<f64>, inputs: &MixedLogitInputs) -> Result<Simulation, EstimationError> {
    let long_probs = calc_long_probabilities(params, &inputs.probability_inputs())?;
    let sequences = calc_choice_sequence_probs(long_probs.view(), inputs.choices, inputs.rows_to_mixers)?;
    Ok(Simulation {
        long_probs,
        sequences,
    })
}

/// `(y_i - p_id) * P_m(i)|d / P_m(i)` for every row and draw.
fn error_twidle(simulation: &Simulation, inputs: &MixedLogitInputs) -> Result<Array2<f64>, EstimationError> {
    // P_m|d / P_m formed in log space, finite even when both underflow
    let log_simulated = simulation.sequences.log_simulated.view().insert_axis(Axis(1));
    let s_twidle = (&simulation.sequences.log_given_draws - &log_simulated).mapv(f64::exp);
    let long_s_twidle = inputs.rows_to_mixers.dot_dense(s_twidle.view())?;
    let residuals = &inputs.choices.insert_axis(Axis(1)) - &simulation.long_probs;
    Ok(residuals * &long_s_twidle)
}

/// Gradient contribution of every decision-maker, `(mixers, coefficients)`,
/// already averaged over draws.
fn gradient_per_mixer(
    error_twidle: &Array2<f64>,
    inputs: &MixedLogitInputs,
) -> Result<Array2<f64>, EstimationError> {
    let num_draws = inputs.design_3d.len_of(Axis(1));
    let num_coefs = inputs.design_3d.len_of(Axis(2));
    let mut contributions = Array2::<f64>::zeros((inputs.rows_to_mixers.ncols(), num_coefs));
    for (draw, design_slice) in inputs.design_3d.axis_iter(Axis(1)).enumerate() {
        let weights = error_twidle.column(draw).insert_axis(Axis(1));
        let weighted_rows = &design_slice * &weights;
        contributions += &inputs.rows_to_mixers.transpose_dot_dense(weighted_rows.view())?;
    }
    contributions /= num_draws as f64;
    Ok(contributions)
}

fn check_params(params: ArrayView1<f64>) -> Result<(), EstimationError> {
    if params.iter().any(|v| !v.is_finite()) {
        return Err(EstimationError::NonFiniteValues(
            "coefficient vector contains NaN or infinite entries".to_string(),
        ));
    }
    Ok(())
}

/// Simulated log-likelihood, minus the ridge penalty when one is set.
pub fn calc_mixed_log_likelihood(
    params: ArrayView1<f64>,
    inputs: &MixedLogitInputs,
) -> Result<f64, EstimationError> {
    check_params(params)?;
    let ridge = inputs.ridge_strength()?;
    let simulation = simulate(params, inputs)?;
    let log_likelihood = simulation.sequences.log_simulated.sum();
    Ok(log_likelihood - ridge * params.dot(&params))
}

/// Analytic gradient of [`calc_mixed_log_likelihood`].
pub fn calc_mixed_logit_gradient(
    params: ArrayView1<f64>,
    inputs: &MixedLogitInputs,
) -> Result<Array1<f64>, EstimationError> {
    Ok(evaluate_mixed_logit(params, inputs)?.gradient)
}

/// BHHH approximation to the Hessian of [`calc_mixed_log_likelihood`].
///
/// The result is `-sum_m g_m g_mᵀ - 2 * ridge * I`, which is negative
/// semi-definite. The sign matches a Hessian of a function being maximized.
pub fn calc_bhhh_hessian_approximation_mixed_logit(
    params: ArrayView1<f64>,
    inputs: &MixedLogitInputs,
) -> Result<Array2<f64>, EstimationError> {
    Ok(evaluate_mixed_logit(params, inputs)?.bhhh_hessian)
}

/// Log-likelihood, gradient and BHHH matrix from a single simulation pass.
pub fn evaluate_mixed_logit(
    params: ArrayView1<f64>,
    inputs: &MixedLogitInputs,
) -> Result<MixedLogitEvaluation, EstimationError> {
    check_params(params)?;
    let ridge = inputs.ridge_strength()?;
    let simulation = simulate(params, inputs)?;
    let errors = error_twidle(&simulation, inputs)?;
    let per_mixer = gradient_per_mixer(&errors, inputs)?;

    let log_likelihood =
        simulation.sequences.log_simulated.sum() - ridge * params.dot(&params);
    let gradient = per_mixer.sum_axis(Axis(0)) - &params.mapv(|b| 2.0 * ridge * b);
    let mut bhhh_hessian = per_mixer.t().dot(&per_mixer).mapv(|v| -v);
    if ridge > 0.0 {
        bhhh_hessian.diag_mut().mapv_inplace(|v| v - 2.0 * ridge);
    }

    log::debug!(
        "Mixed logit evaluation: log-likelihood {:.6}, gradient norm {:.3e}",
        log_likelihood,
        gradient.dot(&gradient).sqrt()
    );

    Ok(MixedLogitEvaluation {
        log_likelihood,
        gradient,
        bhhh_hessian,
        simulated_probs: simulation.sequences.simulated,
    })
}

/// Owns everything that stays fixed while an optimizer searches over the
/// coefficients: the draw-expanded design, the mappings, and the choices.
pub struct MixedLogitEstimator {
    design_3d: Array3<f64>,
    alt_ids: Array1<u64>,
    choices: Array1<f64>,
    mappings: LongFormMappings,
    spec: MixedLogitSpec,
    config: MixedLogitConfig,
    transform: Box<dyn UtilityTransform>,
}

impl MixedLogitEstimator {
    /// Draws standard normals for every decision-maker (seeded by the config)
    /// and builds the design tensor once.
    pub fn new(
        data: &LongFormatData,
        spec: &MixedLogitSpec,
        config: &MixedLogitConfig,
    ) -> Result<Self, EstimationError> {
        config.validate()?;
        let num_mixers = data.num_decision_makers();
        let draws = get_normal_draws(
            num_mixers,
            config.num_draws,
            spec.mixing_var_names.len(),
            config.seed,
        )?;
        Self::with_draws(data, spec, config, draws)
    }

    /// Same as [`Self::new`] with caller-supplied draws, one `(mixers, draws)`
    /// matrix per mixing variable with decision-makers in ascending id order.
    pub fn with_draws(
        data: &LongFormatData,
        spec: &MixedLogitSpec,
        config: &MixedLogitConfig,
        draws: Vec<Array2<f64>>,
    ) -> Result<Self, EstimationError> {
        config.validate()?;
        if spec.mixing_var_names.is_empty() {
            return Err(EstimationError::InvalidArgument(
                "a mixed logit needs at least one mixing variable".to_string(),
            ));
        }
        if spec.index_var_names.len() != data.design.ncols() {
            return Err(EstimationError::ShapeMismatch {
                context: "index variable names versus design columns",
                expected: data.design.ncols(),
                found: spec.index_var_names.len(),
            });
        }
        let choices = data.choices.clone().ok_or_else(|| {
            EstimationError::InvalidArgument("estimation data must carry a choice column".to_string())
        })?;
        let mixing_positions = spec.mixing_positions()?;
        let mappings = data.mappings()?;
        let design_3d = create_expanded_design_for_mixing(
            data.design.view(),
            &draws,
            &mixing_positions,
            &mappings.rows_to_mixers,
        )?;

        log::info!(
            "Mixed logit estimator: {} rows, {} situations, {} decision-makers, {} draws, {} coefficients.",
            data.num_rows(),
            mappings.rows_to_situations.ncols(),
            mappings.rows_to_mixers.ncols(),
            design_3d.len_of(Axis(1)),
            design_3d.len_of(Axis(2))
        );

        Ok(Self {
            design_3d,
            alt_ids: data.alternative_ids.clone(),
            choices,
            mappings,
            spec: spec.clone(),
            config: config.clone(),
            transform: Box::new(IdentityTransform),
        })
    }

    /// Replaces the identity utility transform.
    pub fn with_transform(mut self, transform: Box<dyn UtilityTransform>) -> Self {
        self.transform = transform;
        self
    }

    fn inputs(&self) -> MixedLogitInputs<'_> {
        MixedLogitInputs {
            design_3d: self.design_3d.view(),
            alt_ids: self.alt_ids.view(),
            rows_to_situations: &self.mappings.rows_to_situations,
            rows_to_alts: &self.mappings.rows_to_alts,
            rows_to_mixers: &self.mappings.rows_to_mixers,
            choices: self.choices.view(),
            transform: self.transform.as_ref(),
            ridge: self.config.ridge,
        }
    }

    pub fn num_coefficients(&self) -> usize {
        self.design_3d.len_of(Axis(2))
    }

    pub fn coefficient_names(&self) -> Vec<String> {
        self.spec.coefficient_names()
    }

    pub fn design_3d(&self) -> ArrayView3<'_, f64> {
        self.design_3d.view()
    }

    pub fn log_likelihood(&self, params: ArrayView1<f64>) -> Result<f64, EstimationError> {
        calc_mixed_log_likelihood(params, &self.inputs())
    }

    pub fn gradient(&self, params: ArrayView1<f64>) -> Result<Array1<f64>, EstimationError> {
        calc_mixed_logit_gradient(params, &self.inputs())
    }

    pub fn bhhh_hessian(&self, params: ArrayView1<f64>) -> Result<Array2<f64>, EstimationError> {
        calc_bhhh_hessian_approximation_mixed_logit(params, &self.inputs())
    }

    pub fn evaluate(&self, params: ArrayView1<f64>) -> Result<MixedLogitEvaluation, EstimationError> {
        evaluate_mixed_logit(params, &self.inputs())
    }

    /// Cost and gradient for a minimizer: `(-LL, -grad LL)`.
    pub fn cost_and_gradient(&self, params: ArrayView1<f64>) -> Result<(f64, Array1<f64>), EstimationError> {
        let evaluation = self.evaluate(params)?;
        Ok((-evaluation.log_likelihood, -evaluation.gradient))
    }

    /// Packages estimated coefficients with the variable names and settings that produced them.
    pub fn into_trained_model(self, coefficients: Coefficients) -> Result<TrainedModel, EstimationError> {
        if coefficients.len() != self.num_coefficients() {
            return Err(EstimationError::ShapeMismatch {
                context: "estimated coefficients",
                expected: self.num_coefficients(),
                found: coefficients.len(),
            });
        }
        Ok(TrainedModel {
            spec: self.spec,
            config: self.config,
            coefficients,
        })
    }
}
