use crate::value::Value;

/// The `Result` value produced by `runCatching` and consumed by the `?`
/// error-propagation operator.
///
/// `Err` carries the reified failure: the thrown value for user throws, or a
/// message string for engine-raised exceptions.
#[derive(Debug, Clone)]
pub enum ResultValue {
    Ok(Value),
    Err(Value),
}

impl ResultValue {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    pub fn is_err(&self) -> bool {
        matches!(self, Self::Err(_))
    }

    /// The success value, or `Null` for `Err`.
    pub fn value(&self) -> Value {
        match self {
            Self::Ok(v) => v.clone(),
            Self::Err(_) => Value::Null,
        }
    }

    /// The failure value, or `Null` for `Ok`.
    pub fn error(&self) -> Value {
        match self {
            Self::Ok(_) => Value::Null,
            Self::Err(e) => e.clone(),
        }
    }
}
