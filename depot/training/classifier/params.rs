use depot_artifact_store::ParamValue;

use crate::error::TrainingError;

pub(crate) fn unknown(kind: &str, name: &str) -> TrainingError {
    TrainingError::fit(format!("{kind} does not accept parameter `{name}`"))
}

fn ill_typed(kind: &str, name: &str, expected: &str, value: &ParamValue) -> TrainingError {
    TrainingError::fit(format!("{kind}: `{name}` must be {expected}, got {value}"))
}

/// Integer parameter no smaller than `min`.
pub(crate) fn count(
    kind: &str,
    name: &str,
    value: &ParamValue,
    min: usize,
) -> Result<usize, TrainingError> {
    value
        .as_i64()
        .and_then(|raw| usize::try_from(raw).ok())
        .filter(|raw| *raw >= min)
        .ok_or_else(|| ill_typed(kind, name, &format!("an integer >= {min}"), value))
}

pub(crate) fn flag(kind: &str, name: &str, value: &ParamValue) -> Result<bool, TrainingError> {
    value
        .as_bool()
        .ok_or_else(|| ill_typed(kind, name, "a boolean", value))
}

pub(crate) fn seed(kind: &str, name: &str, value: &ParamValue) -> Result<u64, TrainingError> {
    value
        .as_i64()
        .and_then(|raw| u64::try_from(raw).ok())
        .ok_or_else(|| ill_typed(kind, name, "a non-negative integer", value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_enforces_type_and_lower_bound() {
        assert_eq!(count("K", "n", &ParamValue::Int(3), 1), Ok(3));
        assert_eq!(count("K", "n", &ParamValue::Float(3.0), 1), Ok(3));
        assert!(count("K", "n", &ParamValue::Int(0), 1).is_err());
        assert!(count("K", "n", &ParamValue::Float(2.5), 1).is_err());
        assert!(count("K", "n", &ParamValue::Text("3".into()), 1).is_err());
    }

    #[test]
    fn errors_name_the_parameter() {
        let err = seed("K", "random_state", &ParamValue::Int(-1)).unwrap_err();
        assert!(err.to_string().contains("random_state"));
        assert!(matches!(unknown("K", "alpha"), TrainingError::FitFailure(_)));
    }
}
