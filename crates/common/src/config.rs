/// A mapper parameter rejected at configure time.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("{field} must be positive, got {value}")]
    NotPositive { field: &'static str, value: f64 },
    #[error("{field} range {min}..{max} is empty")]
    EmptyRange {
        field: &'static str,
        min: f32,
        max: f32,
    },
    #[error("{field} = {value} is outside {allowed}")]
    OutOfRange {
        field: &'static str,
        value: f32,
        allowed: &'static str,
    },
    #[error("volume dimensions {dims:?} are not divisible by chunk size {chunk_size}")]
    NotDivisible { dims: [u32; 3], chunk_size: u32 },
}

/// Fails unless `value` is finite and strictly positive.
pub fn ensure_positive(field: &'static str, value: impl Into<f64>) -> Result<(), ConfigError> {
    let value = value.into();
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::NotPositive { field, value })
    }
}

/// Fails unless `range` is finite with `min < max`.
pub fn ensure_range(field: &'static str, range: [f32; 2]) -> Result<(), ConfigError> {
    let [min, max] = range;
    if min.is_finite() && max.is_finite() && min < max {
        Ok(())
    } else {
        Err(ConfigError::EmptyRange { field, min, max })
    }
}
