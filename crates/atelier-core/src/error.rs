use thiserror::Error;

#[derive(Debug, Error)]
pub enum AtelierError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AtelierError {
    /// Short error code string sent to clients in server-push frames.
    pub fn code(&self) -> &'static str {
        match self {
            AtelierError::Config(_) => "CONFIG_ERROR",
            AtelierError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, AtelierError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(AtelierError::Config("x".to_string()).code(), "CONFIG_ERROR");
        let bad = serde_json::from_str::<serde_json::Value>("{nope").unwrap_err();
        assert_eq!(AtelierError::from(bad).code(), "SERIALIZATION_ERROR");
    }
}
