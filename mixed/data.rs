//! Long-format choice data: one row per (choice situation, alternative) pair.

use crate::estimate::EstimationError;
use crate::matrix::AggregationMatrix;
use crate::sequence::validate_choices;
use ndarray::{Array1, Array2, Axis};

/// Design matrix and identifier columns of a long-format dataset.
///
/// All arrays are aligned by row. `choices` is absent for data that is only
/// predicted on.
#[derive(Clone, Debug)]
pub struct LongFormatData {
    pub design: Array2<f64>,
    pub situation_ids: Array1<u64>,
    pub alternative_ids: Array1<u64>,
    /// Decision-maker id of every row.
    pub mixing_ids: Array1<u64>,
    pub choices: Option<Array1<f64>>,
}

/// The three membership matrices of a dataset.
#[derive(Clone, Debug)]
pub struct LongFormMappings {
    pub rows_to_situations: AggregationMatrix,
    pub rows_to_alts: AggregationMatrix,
    pub rows_to_mixers: AggregationMatrix,
}

impl LongFormatData {
    pub fn new(
        design: Array2<f64>,
        situation_ids: Array1<u64>,
        alternative_ids: Array1<u64>,
        mixing_ids: Array1<u64>,
        choices: Option<Array1<f64>>,
    ) -> Result<Self, EstimationError> {
        let data = Self {
            design,
            situation_ids,
            alternative_ids,
            mixing_ids,
            choices,
        };
        data.validate()?;
        Ok(data)
    }

    fn validate(&self) -> Result<(), EstimationError> {
        let num_rows = self.design.nrows();
        if num_rows == 0 {
            return Err(EstimationError::InvalidArgument(
                "long-format data must contain at least one row".to_string(),
            ));
        }
        let mut columns = vec![
            ("situation ids", self.situation_ids.len()),
            ("alternative ids", self.alternative_ids.len()),
            ("mixing ids", self.mixing_ids.len()),
        ];
        if let Some(choices) = &self.choices {
            columns.push(("choice indicators", choices.len()));
        }
        for (context, found) in columns {
            if found != num_rows {
                return Err(EstimationError::ShapeMismatch {
                    context,
                    expected: num_rows,
                    found,
                });
            }
        }
        if self.design.iter().any(|v| !v.is_finite()) {
            return Err(EstimationError::NonFiniteValues(
                "the design matrix contains NaN or infinite entries".to_string(),
            ));
        }

        if let Some(choices) = &self.choices {
            validate_choices(choices.view())?;
            let rows_to_situations = AggregationMatrix::from_ids(self.situation_ids.view())?;
            let chosen_per_situation = rows_to_situations.transpose_dot_vector(choices.view())?;
            if let Some((column, count)) = chosen_per_situation
                .iter()
                .enumerate()
                .find(|(_, count)| **count != 1.0)
            {
                return Err(EstimationError::InvalidArgument(format!(
                    "choice situation {} has {count} chosen alternatives; exactly one is required",
                    rows_to_situations.labels()[column]
                )));
            }
        }
        Ok(())
    }

    pub fn num_rows(&self) -> usize {
        self.design.nrows()
    }

    pub fn num_decision_makers(&self) -> usize {
        self.unique_mixing_ids().len()
    }

    /// Distinct decision-maker ids, ascending.
    pub fn unique_mixing_ids(&self) -> Vec<u64> {
        let mut ids = self.mixing_ids.to_vec();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    pub fn mappings(&self) -> Result<LongFormMappings, EstimationError> {
        Ok(LongFormMappings {
            rows_to_situations: AggregationMatrix::from_ids(self.situation_ids.view())?,
            rows_to_alts: AggregationMatrix::from_ids(self.alternative_ids.view())?,
            rows_to_mixers: AggregationMatrix::from_ids(self.mixing_ids.view())?,
        })
    }

    /// A validated copy holding only the listed rows, in the listed order.
    pub fn select_rows(&self, rows: &[usize]) -> Result<Self, EstimationError> {
        if let Some(&bad) = rows.iter().find(|&&row| row >= self.num_rows()) {
            return Err(EstimationError::InvalidArgument(format!(
                "row {bad} is out of range for {} rows",
                self.num_rows()
            )));
        }
        Self::new(
            self.design.select(Axis(0), rows),
            self.situation_ids.select(Axis(0), rows),
            self.alternative_ids.select(Axis(0), rows),
            self.mixing_ids.select(Axis(0), rows),
            self.choices.as_ref().map(|choices| choices.select(Axis(0), rows)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::ChoiceFixture;
    use ndarray::array;

    #[test]
    fn mappings_follow_the_identifier_columns() {
        let fixture = ChoiceFixture::new();
        let data = fixture.long_format_data();
        let mappings = data.mappings().unwrap();
        assert_eq!(mappings.rows_to_situations.ncols(), 3);
        assert_eq!(mappings.rows_to_alts.ncols(), 3);
        assert_eq!(mappings.rows_to_mixers.ncols(), 2);
        assert_eq!(mappings.rows_to_mixers.group_of_rows().unwrap(), vec![0, 0, 0, 0, 0, 0, 1, 1, 1]);
        assert_eq!(data.num_decision_makers(), 2);
        assert_eq!(data.unique_mixing_ids(), vec![1, 2]);
    }

    #[test]
    fn construction_rejects_misaligned_columns() {
        let result = LongFormatData::new(
            array![[1.0], [2.0]],
            array![1_u64, 1],
            array![1_u64],
            array![1_u64, 1],
            None,
        );
        assert!(matches!(
            result,
            Err(EstimationError::ShapeMismatch { expected: 2, found: 1, .. })
        ));
    }

    #[test]
    fn construction_rejects_bad_choices() {
        let two_chosen = LongFormatData::new(
            array![[1.0], [2.0]],
            array![1_u64, 1],
            array![1_u64, 2],
            array![1_u64, 1],
            Some(array![1.0, 1.0]),
        );
        assert!(matches!(two_chosen, Err(EstimationError::InvalidArgument(_))));

        let fractional = LongFormatData::new(
            array![[1.0], [2.0]],
            array![1_u64, 1],
            array![1_u64, 2],
            array![1_u64, 1],
            Some(array![0.5, 0.5]),
        );
        assert!(matches!(fractional, Err(EstimationError::InvalidArgument(_))));
    }

    #[test]
    fn construction_rejects_non_finite_design_and_empty_data() {
        let nan = LongFormatData::new(
            array![[f64::NAN], [2.0]],
            array![1_u64, 1],
            array![1_u64, 2],
            array![1_u64, 1],
            None,
        );
        assert!(matches!(nan, Err(EstimationError::NonFiniteValues(_))));

        let empty = LongFormatData::new(
            Array2::zeros((0, 2)),
            Array1::zeros(0),
            Array1::zeros(0),
            Array1::zeros(0),
            None,
        );
        assert!(matches!(empty, Err(EstimationError::InvalidArgument(_))));
    }

    #[test]
    fn select_rows_keeps_complete_situations() {
        let fixture = ChoiceFixture::new();
        let data = fixture.long_format_data();
        let second_person = data.select_rows(&[6, 7, 8]).unwrap();
        assert_eq!(second_person.num_rows(), 3);
        assert_eq!(second_person.unique_mixing_ids(), vec![2]);
        assert_eq!(second_person.choices, Some(array![1.0, 0.0, 0.0]));
        assert_eq!(second_person.design.row(1), data.design.row(7));

        // dropping the chosen row leaves a situation without a choice
        assert!(data.select_rows(&[7, 8]).is_err());
        assert!(data.select_rows(&[9]).is_err());
    }
}
