//! Set-input form fields and their validation.
//!
//! Field values are kept as the raw text the user typed so a restored draft
//! shows exactly what was on screen. Parsing happens only when a set is
//! submitted.

use std::fmt;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Reps,
    Weight,
    PartialReps,
}

impl Field {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Reps => "reps",
            Self::Weight => "weight",
            Self::PartialReps => "partial reps",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FieldError {
    #[error("is required")]
    Required,
    #[error("must be a number")]
    NotANumber,
    #[error("must be greater than zero")]
    MustBePositive,
    #[error("must not be negative")]
    MustNotBeNegative,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldErrors {
    pub reps: Option<FieldError>,
    pub weight: Option<FieldError>,
    pub partial_reps: Option<FieldError>,
}

impl FieldErrors {
    pub fn is_empty(&self) -> bool {
        self.reps.is_none() && self.weight.is_none() && self.partial_reps.is_none()
    }

    pub fn get(&self, field: Field) -> Option<FieldError> {
        match field {
            Field::Reps => self.reps,
            Field::Weight => self.weight,
            Field::PartialReps => self.partial_reps,
        }
    }

    pub fn clear(&mut self, field: Field) {
        match field {
            Field::Reps => self.reps = None,
            Field::Weight => self.weight = None,
            Field::PartialReps => self.partial_reps = None,
        }
    }

    fn entries(&self) -> impl Iterator<Item = (Field, FieldError)> {
        [
            (Field::Reps, self.reps),
            (Field::Weight, self.weight),
            (Field::PartialReps, self.partial_reps),
        ]
        .into_iter()
        .filter_map(|(field, err)| err.map(|err| (field, err)))
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, err) in self.entries() {
            if !first {
                f.write_str("; ")?;
            }
            write!(f, "{} {}", field.label(), err)?;
            first = false;
        }
        Ok(())
    }
}

/// Raw text for one set, as typed into the form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetInput {
    pub reps: String,
    pub weight: String,
    pub partial_reps: String,
}

impl SetInput {
    pub fn new(
        reps: impl Into<String>,
        weight: impl Into<String>,
        partial_reps: impl Into<String>,
    ) -> Self {
        Self {
            reps: reps.into(),
            weight: weight.into(),
            partial_reps: partial_reps.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SetValues {
    pub reps: i64,
    pub weight: f64,
    pub partial_reps: i64,
}

pub fn validate_set(reps: &str, weight: &str, partial_reps: &str) -> Result<SetValues, FieldErrors> {
    let reps = parse_reps(reps);
    let weight = parse_weight(weight);
    let partial_reps = parse_partial_reps(partial_reps);

    match (reps, weight, partial_reps) {
        (Ok(reps), Ok(weight), Ok(partial_reps)) => Ok(SetValues {
            reps,
            weight,
            partial_reps,
        }),
        (reps, weight, partial_reps) => Err(FieldErrors {
            reps: reps.err(),
            weight: weight.err(),
            partial_reps: partial_reps.err(),
        }),
    }
}

/// True when the field holds something other than blank or zero.
pub fn holds_value(raw: &str) -> bool {
    let raw = raw.trim();
    if raw.is_empty() {
        return false;
    }
    match raw.parse::<f64>() {
        Ok(value) => value != 0.0,
        Err(_) => true,
    }
}

pub fn format_weight(weight: f64) -> String {
    weight.to_string()
}

fn parse_reps(raw: &str) -> Result<i64, FieldError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(FieldError::Required);
    }
    let value = raw.parse::<i64>().map_err(|_| FieldError::NotANumber)?;
    if value <= 0 {
        return Err(FieldError::MustBePositive);
    }
    Ok(value)
}

fn parse_weight(raw: &str) -> Result<f64, FieldError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(FieldError::Required);
    }
    let value = raw.parse::<f64>().map_err(|_| FieldError::NotANumber)?;
    if !value.is_finite() {
        return Err(FieldError::NotANumber);
    }
    if value <= 0.0 {
        return Err(FieldError::MustBePositive);
    }
    Ok(value)
}

fn parse_partial_reps(raw: &str) -> Result<i64, FieldError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(0);
    }
    let value = raw.parse::<i64>().map_err(|_| FieldError::NotANumber)?;
    if value < 0 {
        return Err(FieldError::MustNotBeNegative);
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_partial_reps_defaults_to_zero() {
        let values = validate_set("10", "135", "  ").expect("valid");
        assert_eq!(values.reps, 10);
        assert_eq!(values.weight, 135.0);
        assert_eq!(values.partial_reps, 0);
    }

    #[test]
    fn flags_every_invalid_field_at_once() {
        let errors = validate_set("0", "", "-1").expect_err("invalid");
        assert_eq!(errors.reps, Some(FieldError::MustBePositive));
        assert_eq!(errors.weight, Some(FieldError::Required));
        assert_eq!(errors.partial_reps, Some(FieldError::MustNotBeNegative));
        assert_eq!(
            errors.to_string(),
            "reps must be greater than zero; weight is required; partial reps must not be negative"
        );
    }

    #[test]
    fn rejects_fractional_reps_and_non_finite_weight() {
        let errors = validate_set("2.5", "inf", "").expect_err("invalid");
        assert_eq!(errors.reps, Some(FieldError::NotANumber));
        assert_eq!(errors.weight, Some(FieldError::NotANumber));
        assert_eq!(errors.partial_reps, None);
    }

    #[test]
    fn zero_and_blank_do_not_count_as_pending_input() {
        assert!(!holds_value(""));
        assert!(!holds_value("0"));
        assert!(!holds_value(" 0.0 "));
        assert!(holds_value("5"));
        assert!(holds_value("abc"));
    }

    #[test]
    fn formats_whole_weights_without_decimal_point() {
        assert_eq!(format_weight(135.0), "135");
        assert_eq!(format_weight(102.5), "102.5");
    }
}
