//! Logit choice probabilities for every row under every draw.
//!
//! Systematic utilities are the dot product of the design with the coefficient
//! vector, post-processed by a [`UtilityTransform`]. Probabilities are the softmax
//! of those utilities within each choice situation, separately for each draw.
//! The per-situation maximum is subtracted before exponentiating; softmax is
//! invariant to that shift.

use crate::estimate::EstimationError;
use crate::matrix::AggregationMatrix;
use ndarray::{Array2, ArrayD, ArrayView1, ArrayView2, ArrayView3, Axis, Ix1, Ix2};

/// Probabilities that underflow to zero are raised to this value so every entry
/// stays in `(0, 1]` and its logarithm is finite.
pub const MIN_COMP_VALUE: f64 = 1e-300;

/// Post-processes raw systematic utilities into a `(rows, draws)` array.
///
/// The raw array is 1D for a flat design and 2D for a draw-expanded design.
/// Implementations may apply any link-specific adjustment that needs the
/// alternative identities of the rows.
pub trait UtilityTransform {
    fn transform(
        &self,
        systematic_utilities: ArrayD<f64>,
        alt_ids: ArrayView1<u64>,
        rows_to_alts: &AggregationMatrix,
    ) -> Result<Array2<f64>, EstimationError>;
}

/// The logit transform: leaves utilities unchanged and only lifts a 1D array to
/// a single-draw column.
#[derive(Clone, Copy, Debug, Default)]
pub struct IdentityTransform;

impl UtilityTransform for IdentityTransform {
    fn transform(
        &self,
        systematic_utilities: ArrayD<f64>,
        _: ArrayView1<u64>,
        _: &AggregationMatrix,
    ) -> Result<Array2<f64>, EstimationError> {
        lift_to_two_dimensions(systematic_utilities)
    }
}

/// Any closure over the raw utilities is a transform.
impl<F> UtilityTransform for F
where
    F: Fn(ArrayD<f64>) -> Result<Array2<f64>, EstimationError>,
{
    fn transform(
        &self,
        systematic_utilities: ArrayD<f64>,
        _: ArrayView1<u64>,
        _: &AggregationMatrix,
    ) -> Result<Array2<f64>, EstimationError> {
        self(systematic_utilities)
    }
}

/// Reshapes a 1D array to `(n, 1)` and passes 2D arrays through.
pub fn lift_to_two_dimensions(values: ArrayD<f64>) -> Result<Array2<f64>, EstimationError> {
    match values.ndim() {
        1 => values
            .into_dimensionality::<Ix1>()
            .map(|column| column.insert_axis(Axis(1)))
            .map_err(|err| EstimationError::InvalidArgument(err.to_string())),
        2 => values
            .into_dimensionality::<Ix2>()
            .map_err(|err| EstimationError::InvalidArgument(err.to_string())),
        found => Err(EstimationError::ShapeMismatch {
            context: "dimensions of systematic utilities",
            expected: 2,
            found,
        }),
    }
}

/// A flat `(rows, vars)` design or a draw-expanded `(rows, draws, vars)` one.
#[derive(Clone, Copy, Debug)]
pub enum DesignView<'a> {
    Flat(ArrayView2<'a, f64>),
    Expanded(ArrayView3<'a, f64>),
}

impl<'a> From<ArrayView2<'a, f64>> for DesignView<'a> {
    fn from(design: ArrayView2<'a, f64>) -> Self {
        Self::Flat(design)
    }
}

impl<'a> From<ArrayView3<'a, f64>> for DesignView<'a> {
    fn from(design: ArrayView3<'a, f64>) -> Self {
        Self::Expanded(design)
    }
}

impl DesignView<'_> {
    pub fn nrows(&self) -> usize {
        match self {
            Self::Flat(design) => design.nrows(),
            Self::Expanded(design) => design.len_of(Axis(0)),
        }
    }

    pub fn num_vars(&self) -> usize {
        match self {
            Self::Flat(design) => design.ncols(),
            Self::Expanded(design) => design.len_of(Axis(2)),
        }
    }

    fn systematic_utilities(&self, coefficients: ArrayView1<f64>) -> ArrayD<f64> {
        match self {
            Self::Flat(design) => design.dot(&coefficients).into_dyn(),
            Self::Expanded(design) => design
                .map_axis(Axis(2), |lane| lane.dot(&coefficients))
                .into_dyn(),
        }
    }
}

/// Everything besides the coefficients that the probability calculation needs.
#[derive(Clone, Copy)]
pub struct ProbabilityInputs<'a> {
    pub design: DesignView<'a>,
    pub alt_ids: ArrayView1<'a, u64>,
    pub rows_to_situations: &'a AggregationMatrix,
    pub rows_to_alts: &'a AggregationMatrix,
    pub transform: &'a dyn UtilityTransform,
}

impl ProbabilityInputs<'_> {
    fn validate(&self, coefficients: ArrayView1<f64>) -> Result<(), EstimationError> {
        let num_rows = self.design.nrows();
        if coefficients.len() != self.design.num_vars() {
            return Err(EstimationError::ShapeMismatch {
                context: "coefficients versus design columns",
                expected: self.design.num_vars(),
                found: coefficients.len(),
            });
        }
        for (context, found) in [
            ("alternative ids versus design rows", self.alt_ids.len()),
            ("rows_to_situations versus design rows", self.rows_to_situations.nrows()),
            ("rows_to_alts versus design rows", self.rows_to_alts.nrows()),
        ] {
            if found != num_rows {
                return Err(EstimationError::ShapeMismatch {
                    context,
                    expected: num_rows,
                    found,
                });
            }
        }
        Ok(())
    }
}

/// Probability of every row under every draw, shape `(rows, draws)`.
///
/// Within each situation and draw the column sums to one.
pub fn calc_long_probabilities(
    coefficients: ArrayView1<f64>,
    inputs: &ProbabilityInputs,
) -> Result<Array2<f64>, EstimationError> {
    inputs.validate(coefficients)?;
    let raw = inputs.design.systematic_utilities(coefficients);
    let utilities = inputs
        .transform
        .transform(raw, inputs.alt_ids, inputs.rows_to_alts)?;
    if utilities.nrows() != inputs.design.nrows() {
        return Err(EstimationError::ShapeMismatch {
            context: "rows of transformed utilities",
            expected: inputs.design.nrows(),
            found: utilities.nrows(),
        });
    }
    if let Some(bad) = utilities.iter().find(|v| !v.is_finite()) {
        return Err(EstimationError::NonFiniteValues(format!(
            "systematic utility evaluated to {bad}"
        )));
    }

    let situation_of_row = inputs.rows_to_situations.group_of_rows()?;
    let num_draws = utilities.ncols();
    let mut situation_max =
        Array2::<f64>::from_elem((inputs.rows_to_situations.ncols(), num_draws), f64::NEG_INFINITY);
    for (row, &situation) in situation_of_row.iter().enumerate() {
        for draw in 0..num_draws {
            let current = &mut situation_max[[situation, draw]];
            *current = current.max(utilities[[row, draw]]);
        }
    }

    let mut exponentials = utilities;
    for (row, mut values) in exponentials.axis_iter_mut(Axis(0)).enumerate() {
        let shift = situation_max.row(situation_of_row[row]);
        values.zip_mut_with(&shift, |value, &max| *value = (*value - max).exp());
    }

    let situation_sums = inputs
        .rows_to_situations
        .transpose_dot_dense(exponentials.view())?;
    let long_sums = inputs.rows_to_situations.dot_dense(situation_sums.view())?;

    let mut probabilities = exponentials / &long_sums;
    probabilities.mapv_inplace(|p| if p == 0.0 { MIN_COMP_VALUE } else { p });
    Ok(probabilities)
}

/// Probability of the chosen alternative of every situation under every draw,
/// shape `(situations, draws)`.
pub fn calc_chosen_probabilities(
    coefficients: ArrayView1<f64>,
    inputs: &ProbabilityInputs,
    choices: ArrayView1<f64>,
) -> Result<Array2<f64>, EstimationError> {
    if choices.len() != inputs.design.nrows() {
        return Err(EstimationError::ShapeMismatch {
            context: "choice vector versus design rows",
            expected: inputs.design.nrows(),
            found: choices.len(),
        });
    }
    let long = calc_long_probabilities(coefficients, inputs)?;
    let chosen_rows = long * &choices.insert_axis(Axis(1));
    inputs.rows_to_situations.transpose_dot_dense(chosen_rows.view())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::ChoiceFixture;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array1, array};

    #[test]
    fn long_probabilities_match_direct_softmax() {
        let fixture = ChoiceFixture::new();
        let design_3d = fixture.design_3d();
        let inputs = fixture.probability_inputs(design_3d.view().into());
        let probs = calc_long_probabilities(fixture.coefficients.view(), &inputs).unwrap();

        let expected = fixture.expected_probabilities();
        assert_eq!(probs.dim(), (9, 2));
        for (a, e) in probs.iter().zip(expected.iter()) {
            assert_abs_diff_eq!(*a, *e, epsilon = 1e-12);
        }
    }

    #[test]
    fn probabilities_sum_to_one_within_each_situation_and_draw() {
        let fixture = ChoiceFixture::new();
        let design_3d = fixture.design_3d();
        let inputs = fixture.probability_inputs(design_3d.view().into());
        for coefs in [
            fixture.coefficients.clone(),
            array![4.0, -3.0, 2.5, -1.5],
            array![0.0, 0.0, 0.0, 0.0],
        ] {
            let probs = calc_long_probabilities(coefs.view(), &inputs).unwrap();
            let sums = fixture.rows_to_situations.transpose_dot_dense(probs.view()).unwrap();
            for total in sums.iter() {
                assert_abs_diff_eq!(*total, 1.0, epsilon = 1e-12);
            }
            assert!(probs.iter().all(|&p| p > 0.0 && p <= 1.0));
        }
    }

    #[test]
    fn large_utilities_do_not_overflow() {
        let fixture = ChoiceFixture::new();
        let design_3d = fixture.design_3d();
        let inputs = fixture.probability_inputs(design_3d.view().into());
        let coefs = array![900.0, -900.0, 400.0, 300.0];
        let probs = calc_long_probabilities(coefs.view(), &inputs).unwrap();
        assert!(probs.iter().all(|p| p.is_finite() && *p > 0.0));
        let sums = fixture.rows_to_situations.transpose_dot_dense(probs.view()).unwrap();
        for total in sums.iter() {
            assert_abs_diff_eq!(*total, 1.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn flat_design_gives_a_single_draw_column() {
        let fixture = ChoiceFixture::new();
        let inputs = fixture.probability_inputs(fixture.design.view().into());
        let coefs = array![0.3, -0.6, 0.2];
        let probs = calc_long_probabilities(coefs.view(), &inputs).unwrap();
        assert_eq!(probs.dim(), (9, 1));

        let utilities: Array1<f64> = fixture.design.dot(&coefs);
        let first_situation: f64 = (0..3).map(|row| utilities[row].exp()).sum();
        assert_abs_diff_eq!(probs[[1, 0]], utilities[1].exp() / first_situation, epsilon = 1e-12);
    }

    #[test]
    fn closures_act_as_utility_transforms() {
        let fixture = ChoiceFixture::new();
        let design_3d = fixture.design_3d();
        let doubled = |raw: ArrayD<f64>| lift_to_two_dimensions(raw * 2.0);
        let mut inputs = fixture.probability_inputs(design_3d.view().into());
        inputs.transform = &doubled;
        let transformed = calc_long_probabilities(fixture.coefficients.view(), &inputs).unwrap();

        let plain_inputs = fixture.probability_inputs(design_3d.view().into());
        let scaled = fixture.coefficients.mapv(|c| c * 2.0);
        let plain = calc_long_probabilities(scaled.view(), &plain_inputs).unwrap();
        for (a, e) in transformed.iter().zip(plain.iter()) {
            assert_abs_diff_eq!(*a, *e, epsilon = 1e-12);
        }
    }

    #[test]
    fn chosen_probabilities_pick_the_chosen_row_per_situation() {
        let fixture = ChoiceFixture::new();
        let design_3d = fixture.design_3d();
        let inputs = fixture.probability_inputs(design_3d.view().into());
        let chosen =
            calc_chosen_probabilities(fixture.coefficients.view(), &inputs, fixture.choices.view())
                .unwrap();
        let expected = fixture.expected_probabilities();
        assert_eq!(chosen.dim(), (3, 2));
        for draw in 0..2 {
            assert_abs_diff_eq!(chosen[[0, draw]], expected[[1, draw]], epsilon = 1e-12);
            assert_abs_diff_eq!(chosen[[1, draw]], expected[[5, draw]], epsilon = 1e-12);
            assert_abs_diff_eq!(chosen[[2, draw]], expected[[6, draw]], epsilon = 1e-12);
        }
    }

    #[test]
    fn mismatched_coefficients_are_rejected() {
        let fixture = ChoiceFixture::new();
        let design_3d = fixture.design_3d();
        let inputs = fixture.probability_inputs(design_3d.view().into());
        let short = array![0.3, -0.6, 0.2];
        assert!(matches!(
            calc_long_probabilities(short.view(), &inputs),
            Err(EstimationError::ShapeMismatch { expected: 4, found: 3, .. })
        ));
    }

    #[test]
    fn non_finite_utilities_propagate_as_errors() {
        let fixture = ChoiceFixture::new();
        let design_3d = fixture.design_3d();
        let inputs = fixture.probability_inputs(design_3d.view().into());
        let coefs = array![f64::NAN, 0.0, 0.0, 0.0];
        assert!(matches!(
            calc_long_probabilities(coefs.view(), &inputs),
            Err(EstimationError::NonFiniteValues(_))
        ));
    }

    #[test]
    fn identity_transform_rejects_three_dimensional_input() {
        let fixture = ChoiceFixture::new();
        let raw = ArrayD::<f64>::zeros(ndarray::IxDyn(&[2, 2, 2]));
        let result = IdentityTransform.transform(raw, fixture.alt_ids.view(), &fixture.rows_to_alts);
        assert!(matches!(result, Err(EstimationError::ShapeMismatch { .. })));
    }
}
