use thiserror::Error;

#[derive(Error, Debug)]
pub enum FanoutError {
    /// Rejected at the call boundary, before any work is scheduled.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("config I/O error: {0}")]
    ConfigIo(#[from] std::io::Error),
}

impl FanoutError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }
}

pub type Result<T, E = FanoutError> = std::result::Result<T, E>;
