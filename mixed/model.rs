use crate::data::LongFormatData;
use crate::design::convert_mixing_names_to_positions;
use crate::draws::get_normal_draws;
use crate::estimate::EstimationError;
use crate::predict::{PanelPrediction, PanelPredictionInputs, panel_predict};
use crate::probability::IdentityTransform;
use crate::types::Coefficients;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use thiserror::Error;

// --- Public Data Structures ---
// These structs define the human-readable format of a fitted mixed logit
// when serialized to a TOML file.

fn default_num_draws() -> usize {
    100
}

/// Simulation settings shared by estimation and prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixedLogitConfig {
    /// Monte Carlo draws per decision-maker and mixing variable.
    #[serde(default = "default_num_draws")]
    pub num_draws: usize,
    /// Seed of the draw generator. Without one the draws come from OS entropy.
    #[serde(default)]
    pub seed: Option<u64>,
    /// Strength of the ridge penalty on all coefficients.
    #[serde(default)]
    pub ridge: Option<f64>,
}

impl Default for MixedLogitConfig {
    fn default() -> Self {
        Self {
            num_draws: default_num_draws(),
            seed: None,
            ridge: None,
        }
    }
}

impl MixedLogitConfig {
    pub fn validate(&self) -> Result<(), EstimationError> {
        if self.num_draws == 0 {
            return Err(EstimationError::InvalidArgument(
                "the number of draws must be positive".to_string(),
            ));
        }
        if let Some(ridge) = self.ridge {
            if !ridge.is_finite() || ridge < 0.0 {
                return Err(EstimationError::InvalidArgument(format!(
                    "ridge strength must be finite and non-negative, got {ridge}"
                )));
            }
        }
        Ok(())
    }
}

/// Names of the design columns and of the columns whose coefficients are random.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixedLogitSpec {
    pub index_var_names: Vec<String>,
    pub mixing_var_names: Vec<String>,
}

impl MixedLogitSpec {
    pub fn new<S: Into<String>>(
        index_var_names: impl IntoIterator<Item = S>,
        mixing_var_names: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            index_var_names: index_var_names.into_iter().map(Into::into).collect(),
            mixing_var_names: mixing_var_names.into_iter().map(Into::into).collect(),
        }
    }

    /// Positions of the mixing variables among the index variables, in mixing order.
    pub fn mixing_positions(&self) -> Result<Vec<usize>, EstimationError> {
        convert_mixing_names_to_positions(&self.mixing_var_names, &self.index_var_names)
    }

    /// Index names, then `Sigma <name>` for each mixing variable.
    pub fn coefficient_names(&self) -> Vec<String> {
        self.index_var_names
            .iter()
            .cloned()
            .chain(self.mixing_var_names.iter().map(|name| format!("Sigma {name}")))
            .collect()
    }
}

/// The top-level, self-contained, fitted model artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedModel {
    pub spec: MixedLogitSpec,
    pub config: MixedLogitConfig,
    /// Index coefficients followed by the mixing standard deviations.
    pub coefficients: Coefficients,
}

/// Custom error type for model loading, saving, and prediction.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Failed to read or write model file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML model file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize model to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("Mixed logit computation failed: {0}")]
    Estimation(#[from] EstimationError),
    #[error("The model has {expected} coefficients for its variables, but {found} were stored.")]
    MismatchedCoefficientCount { found: usize, expected: usize },
}

impl TrainedModel {
    fn check_coefficients(&self) -> Result<(), ModelError> {
        let expected = self.spec.index_var_names.len() + self.spec.mixing_var_names.len();
        if self.coefficients.len() != expected {
            return Err(ModelError::MismatchedCoefficientCount {
                found: self.coefficients.len(),
                expected,
            });
        }
        Ok(())
    }

    /// Predicts the probability of every row of `new_data`.
    ///
    /// Fresh standard normal draws are taken for the distinct decision-makers of
    /// `new_data`. When `history` holds earlier choices of some of them, those
    /// rows are simulated with the same draws and each decision-maker's draws
    /// are reweighted by how well they explain the history.
    pub fn panel_predict(
        &self,
        history: Option<&LongFormatData>,
        new_data: &LongFormatData,
        num_draws: usize,
        seed: Option<u64>,
    ) -> Result<PanelPrediction, ModelError> {
        self.check_coefficients()?;
        let mixing_positions = self.spec.mixing_positions()?;
        let draws = get_normal_draws(
            new_data.num_decision_makers(),
            num_draws,
            mixing_positions.len(),
            seed,
        )?;
        log::info!(
            "Panel prediction for {} rows of {} decision-makers with {} draws.",
            new_data.num_rows(),
            new_data.num_decision_makers(),
            num_draws
        );
        let prediction = panel_predict(&PanelPredictionInputs {
            coefficients: self.coefficients.as_view(),
            new_data,
            history,
            mixing_positions: &mixing_positions,
            draws: &draws,
            transform: &IdentityTransform,
        })?;
        Ok(prediction)
    }

    /// Saves the trained model to a file in a human-readable TOML format.
    pub fn save(&self, path: &str) -> Result<(), ModelError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        Ok(())
    }

    /// Loads a trained model from a TOML file.
    pub fn load(path: &str) -> Result<Self, ModelError> {
        let toml_string = fs::read_to_string(path)?;
        let model: Self = toml::from_str(&toml_string)?;
        model.check_coefficients()?;
        Ok(model)
    }
}
