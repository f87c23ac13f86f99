use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("unknown memory pressure level: {0}")]
    UnknownPressureLevel(String),

    #[error("invalid config value for {key}: {value}")]
    InvalidConfig { key: String, value: String },
}
