//! Column-level imputation that makes a frame safe to score.
//!
//! The same [`Normalizer`] instance is applied to the reference frame and to
//! every window slice, so both sides of a comparison see identical fill rules.

use crate::data::frame::{Column, ColumnData, Frame, float_label};

/// Fill value for missing numerical cells.
pub const NUMERICAL_FILL: f64 = 0.0;

/// Fill value for missing categorical cells.
pub const CATEGORICAL_FILL: &str = "-1";

/// Imputes declared numerical and categorical columns.
#[derive(Debug, Clone)]
pub struct Normalizer {
    numerical: Vec<String>,
    categorical: Vec<String>,
}

impl Normalizer {
    pub fn new(numerical: Vec<String>, categorical: Vec<String>) -> Self {
        Self {
            numerical,
            categorical,
        }
    }

    pub fn numerical(&self) -> &[String] {
        &self.numerical
    }

    pub fn categorical(&self) -> &[String] {
        &self.categorical
    }

    /// Return a copy of `frame` with missing feature cells filled.
    ///
    /// Numerical columns get `0`, categorical columns become text and get
    /// `"-1"`. Undeclared columns pass through untouched; declared columns the
    /// frame lacks are skipped (presence is checked once at setup). Idempotent.
    pub fn normalize(&self, frame: &Frame) -> Frame {
        let mut out = frame.clone();
        for name in &self.numerical {
            if let Some(col) = out.column_mut(name) {
                fill_numerical(col);
            }
        }
        for name in &self.categorical {
            if let Some(col) = out.column_mut(name) {
                fill_categorical(col);
            }
        }
        out
    }
}

fn fill_numerical(col: &mut Column) {
    match &mut col.data {
        ColumnData::Float(values) => {
            for v in values.iter_mut() {
                if v.is_none_or(|x| x.is_nan()) {
                    *v = Some(NUMERICAL_FILL);
                }
            }
        }
        ColumnData::Text(values) => {
            for v in values.iter_mut().filter(|v| v.is_none()) {
                *v = Some(NUMERICAL_FILL.to_string());
            }
        }
        ColumnData::Timestamp(_) => {
            tracing::warn!(column = %col.name, "Timestamp column declared numerical; left unfilled");
        }
    }
}

fn fill_categorical(col: &mut Column) {
    let labels: Vec<String> = match &col.data {
        ColumnData::Text(values) => values
            .iter()
            .map(|v| v.clone().unwrap_or_else(|| CATEGORICAL_FILL.to_string()))
            .collect(),
        ColumnData::Float(values) => values
            .iter()
            .map(|v| match v {
                Some(x) if !x.is_nan() => float_label(*x),
                _ => CATEGORICAL_FILL.to_string(),
            })
            .collect(),
        ColumnData::Timestamp(values) => values
            .iter()
            .map(|v| match v {
                Some(t) => t.to_string(),
                None => CATEGORICAL_FILL.to_string(),
            })
            .collect(),
    };
    col.data = ColumnData::Text(labels.into_iter().map(Some).collect());
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn normalizer() -> Normalizer {
        Normalizer::new(
            vec!["trip_distance".into(), "fare_amount".into()],
            vec!["PULocationID".into()],
        )
    }

    fn raw() -> Frame {
        Frame::from_columns(vec![
            Column::float("trip_distance", vec![Some(1.2), None, Some(f64::NAN)]),
            Column::float("fare_amount", vec![None, Some(7.5), Some(3.0)]),
            Column::text("PULocationID", vec![Some("138".into()), None, Some("7".into())]),
            Column::float("tip_amount", vec![None, None, Some(1.0)]),
        ])
        .unwrap()
    }

    #[test]
    fn test_fills_declared_columns_only() {
        let out = normalizer().normalize(&raw());
        assert_eq!(
            out.floats("trip_distance").unwrap(),
            &[Some(1.2), Some(0.0), Some(0.0)]
        );
        assert_eq!(out.floats("fare_amount").unwrap(), &[Some(0.0), Some(7.5), Some(3.0)]);
        assert_eq!(
            out.column("PULocationID").unwrap().data,
            ColumnData::Text(vec![Some("138".into()), Some("-1".into()), Some("7".into())])
        );
        // undeclared column untouched
        assert_eq!(out.floats("tip_amount").unwrap(), &[None, None, Some(1.0)]);
    }

    #[test]
    fn test_numeric_categorical_becomes_text() {
        let frame = Frame::from_columns(vec![Column::float(
            "PULocationID",
            vec![Some(138.0), None],
        )])
        .unwrap();
        let out = normalizer().normalize(&frame);
        assert_eq!(
            out.column("PULocationID").unwrap().data,
            ColumnData::Text(vec![Some("138".into()), Some("-1".into())])
        );
    }

    #[test]
    fn test_large_codes_stay_distinct() {
        let frame = Frame::from_columns(vec![Column::float(
            "PULocationID",
            vec![Some(1e19), Some(1e20), Some(-1e19)],
        )])
        .unwrap();
        let out = normalizer().normalize(&frame);
        assert_eq!(
            out.column("PULocationID").unwrap().data,
            ColumnData::Text(vec![
                Some("10000000000000000000".into()),
                Some("100000000000000000000".into()),
                Some("-10000000000000000000".into()),
            ])
        );
    }

    #[test]
    fn test_fill_matches_missing_count() {
        let frame = Frame::from_columns(vec![Column::float(
            "trip_distance",
            vec![Some(f64::INFINITY), Some(f64::NAN), None],
        )])
        .unwrap();
        let before = frame.missing_values().missing_cells;
        let out = normalizer().normalize(&frame);
        assert_eq!(before, 2);
        assert_eq!(out.missing_values().missing_cells, 0);
        assert_eq!(
            out.floats("trip_distance").unwrap(),
            &[Some(f64::INFINITY), Some(0.0), Some(0.0)]
        );
    }

    #[test]
    fn test_is_idempotent() {
        let n = normalizer();
        let once = n.normalize(&raw());
        assert_eq!(n.normalize(&once), once);
    }

    #[test]
    fn test_empty_frame_stays_empty() {
        let empty = raw().filter(&[false, false, false]).unwrap();
        let out = normalizer().normalize(&empty);
        assert_eq!(out.height(), 0);
        assert_eq!(out.width(), 4);
    }

    #[test]
    fn test_does_not_mutate_input() {
        let input = raw();
        let _ = normalizer().normalize(&input);
        assert_eq!(input.missing_values().missing_cells, 6);
    }
}
