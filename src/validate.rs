use crate::error::ValidationError;

pub const MIN_SCORE: f64 = 0.0;
pub const MAX_SCORE: f64 = 100.0;

/// Parses a score cell. Blank, non-numeric and out-of-range input is
/// rejected against `field`.
pub fn parse_score(field: &str, raw: &str) -> Result<f64, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::new(field, "score is required"));
    }
    let value: f64 = trimmed
        .parse()
        .map_err(|_| ValidationError::new(field, format!("'{trimmed}' is not a number")))?;
    check_score(field, value)
}

pub fn check_score(field: &str, value: f64) -> Result<f64, ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::new(field, "score must be a finite number"));
    }
    if !(MIN_SCORE..=MAX_SCORE).contains(&value) {
        return Err(ValidationError::new(
            field,
            format!("{value} is outside {MIN_SCORE}..={MAX_SCORE}"),
        ));
    }
    Ok(value)
}

pub fn check_sequence(field: &str, sequence: i32) -> Result<i32, ValidationError> {
    if sequence < 1 {
        return Err(ValidationError::new(field, "sequence numbers start at 1"));
    }
    Ok(sequence)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_bounds() {
        assert_eq!(parse_score("score", "0").unwrap(), 0.0);
        assert_eq!(parse_score("score", " 100 ").unwrap(), 100.0);
        assert_eq!(parse_score("score", "87.5").unwrap(), 87.5);
    }

    #[test]
    fn rejects_missing_and_non_numeric() {
        let err = parse_score("row 3 score", "").unwrap_err();
        assert_eq!(err.field, "row 3 score");
        assert_eq!(err.message, "score is required");

        let err = parse_score("score", "ninety").unwrap_err();
        assert!(err.message.contains("not a number"));
        assert!(parse_score("score", "NaN").is_err());
    }

    #[test]
    fn rejects_out_of_range() {
        assert!(parse_score("score", "100.01").is_err());
        assert!(parse_score("score", "-1").is_err());
        assert_eq!(
            check_score("score", 101.0).unwrap_err().to_string(),
            "invalid score: 101 is outside 0..=100"
        );
    }

    #[test]
    fn sequence_must_be_positive() {
        assert!(check_sequence("sequence", 0).is_err());
        assert_eq!(check_sequence("sequence", 3).unwrap(), 3);
    }
}
