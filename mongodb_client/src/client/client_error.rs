use crate::error_chain_fmt;

/// Failures while configuring or building a [`Client`](crate::Client).
#[derive(thiserror::Error)]
pub enum ClientError {
    #[error("No hosts were supplied and a client can't exist without at least one")]
    MissingHostsError,
    #[error("Invalid host `{0}`")]
    InvalidHost(String),
    #[error("Invalid connection string: {0}")]
    InvalidConnectionString(String),
    #[error("Invalid value for option `{option}`: {message}")]
    InvalidOption { option: String, message: String },
    #[error("No transport was supplied and a client can't talk to servers without one")]
    MissingTransport,
    #[error(transparent)]
    UnexpectedError(#[from] anyhow::Error),
}
impl std::fmt::Debug for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

impl ClientError {
    pub(crate) fn invalid_option(option: &str, message: impl Into<String>) -> Self {
        Self::InvalidOption {
            option: option.to_string(),
            message: message.into(),
        }
    }
}
