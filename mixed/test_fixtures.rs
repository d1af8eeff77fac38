//! Small hand-checkable panel used across the unit tests: two decision-makers,
//! three alternatives, three choice situations (the first decision-maker faces
//! two of them), one random coefficient and two draws.

use crate::data::LongFormatData;
use crate::design::create_expanded_design_for_mixing;
use crate::estimate::MixedLogitInputs;
use crate::matrix::AggregationMatrix;
use crate::model::MixedLogitSpec;
use crate::probability::{DesignView, IdentityTransform, ProbabilityInputs};
use ndarray::{Array1, Array2, Array3, ArrayView3, array, s};

pub struct ChoiceFixture {
    pub design: Array2<f64>,
    pub situation_ids: Array1<u64>,
    pub alt_ids: Array1<u64>,
    pub mixing_ids: Array1<u64>,
    pub choices: Array1<f64>,
    /// `(decision-makers, draws)` for the single mixing variable.
    pub draws: Array2<f64>,
    pub mixing_positions: Vec<usize>,
    pub coefficients: Array1<f64>,
    pub rows_to_situations: AggregationMatrix,
    pub rows_to_alts: AggregationMatrix,
    pub rows_to_mixers: AggregationMatrix,
}

impl ChoiceFixture {
    pub fn new() -> Self {
        let design = array![
            [1.0, 0.0, 1.0],
            [0.0, 1.0, 2.0],
            [0.0, 0.0, 3.0],
            [1.0, 0.0, 1.5],
            [0.0, 1.0, 2.5],
            [0.0, 0.0, 3.5],
            [1.0, 0.0, 0.5],
            [0.0, 1.0, 1.0],
            [0.0, 0.0, 1.5]
        ];
        let situation_ids = array![1_u64, 1, 1, 2, 2, 2, 3, 3, 3];
        let alt_ids = array![1_u64, 2, 3, 1, 2, 3, 1, 2, 3];
        let mixing_ids = array![1_u64, 1, 1, 1, 1, 1, 2, 2, 2];
        let rows_to_situations = AggregationMatrix::from_ids(situation_ids.view()).unwrap();
        let rows_to_alts = AggregationMatrix::from_ids(alt_ids.view()).unwrap();
        let rows_to_mixers = AggregationMatrix::from_ids(mixing_ids.view()).unwrap();
        Self {
            design,
            situation_ids,
            alt_ids,
            mixing_ids,
            choices: array![0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0],
            draws: array![[0.4, 0.8], [0.6, 0.2]],
            mixing_positions: vec![2],
            coefficients: array![0.3, -0.6, 0.2, 1.0],
            rows_to_situations,
            rows_to_alts,
            rows_to_mixers,
        }
    }

    pub fn mixer_of_row(&self, row: usize) -> usize {
        if row < 6 { 0 } else { 1 }
    }

    /// The `(rows, 4)` design seen under one draw, built element by element.
    pub fn design_for_draw(&self, draw: usize) -> Array2<f64> {
        let mut expanded = Array2::<f64>::zeros((9, 4));
        expanded.slice_mut(s![.., ..3]).assign(&self.design);
        for row in 0..9 {
            expanded[[row, 3]] = self.design[[row, 2]] * self.draws[[self.mixer_of_row(row), draw]];
        }
        expanded
    }

    pub fn design_3d(&self) -> Array3<f64> {
        create_expanded_design_for_mixing(
            self.design.view(),
            &[self.draws.clone()],
            &self.mixing_positions,
            &self.rows_to_mixers,
        )
        .unwrap()
    }

    pub fn probability_inputs<'a>(&'a self, design: DesignView<'a>) -> ProbabilityInputs<'a> {
        ProbabilityInputs {
            design,
            alt_ids: self.alt_ids.view(),
            rows_to_situations: &self.rows_to_situations,
            rows_to_alts: &self.rows_to_alts,
            transform: &IdentityTransform,
        }
    }

    pub fn mixed_inputs<'a>(&'a self, design_3d: ArrayView3<'a, f64>, ridge: Option<f64>) -> MixedLogitInputs<'a> {
        MixedLogitInputs {
            design_3d,
            alt_ids: self.alt_ids.view(),
            rows_to_situations: &self.rows_to_situations,
            rows_to_alts: &self.rows_to_alts,
            rows_to_mixers: &self.rows_to_mixers,
            choices: self.choices.view(),
            transform: &IdentityTransform,
            ridge,
        }
    }

    /// Softmax over each block of three rows, computed without any shift.
    pub fn expected_probabilities(&self) -> Array2<f64> {
        let mut probs = Array2::<f64>::zeros((9, 2));
        for draw in 0..2 {
            let utilities = self.design_for_draw(draw).dot(&self.coefficients);
            for situation in 0..3 {
                let rows = 3 * situation..3 * situation + 3;
                let total: f64 = rows.clone().map(|row| utilities[row].exp()).sum();
                for row in rows {
                    probs[[row, draw]] = utilities[row].exp() / total;
                }
            }
        }
        probs
    }

    pub fn long_format_data(&self) -> LongFormatData {
        LongFormatData::new(
            self.design.clone(),
            self.situation_ids.clone(),
            self.alt_ids.clone(),
            self.mixing_ids.clone(),
            Some(self.choices.clone()),
        )
        .unwrap()
    }

    pub fn spec(&self) -> MixedLogitSpec {
        MixedLogitSpec::new(["ASC 1", "ASC 2", "beta_x"], ["beta_x"])
    }

    /// Three new situations: one more for decision-maker 1 and two for a new
    /// decision-maker 3.
    pub fn panel_new_data(&self) -> LongFormatData {
        LongFormatData::new(
            array![
                [1.0, 0.0, 1.0],
                [0.0, 1.0, 2.0],
                [0.0, 0.0, 1.0],
                [1.0, 0.0, 0.75],
                [0.0, 1.0, 0.37],
                [0.0, 0.0, 1.5],
                [1.0, 0.0, 2.3],
                [0.0, 1.0, 1.2],
                [0.0, 0.0, 1.1]
            ],
            array![1_u64, 1, 1, 2, 2, 2, 3, 3, 3],
            array![1_u64, 2, 3, 1, 2, 3, 1, 2, 3],
            array![1_u64, 1, 1, 3, 3, 3, 3, 3, 3],
            None,
        )
        .unwrap()
    }
}
