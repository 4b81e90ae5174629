use thiserror::Error;

/// Failures raised while authenticating or applying a single webhook event.
///
/// Every variant maps to one [`ErrorKind`] so the HTTP layer can pick a
/// response without string matching on messages.
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("webhook authentication failed: {0}")]
    Authentication(String),

    #[error("malformed webhook event: {0}")]
    MalformedEvent(String),

    #[error("user not found: {0}")]
    UserNotFound(String),

    #[error("invalid price id: {0}")]
    InvalidPrice(String),

    #[error("billing provider call failed: {0:#}")]
    ProviderCall(anyhow::Error),

    #[error("directory call failed: {0:#}")]
    Directory(anyhow::Error),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ErrorKind {
    Authentication,
    MalformedEvent,
    UserNotFound,
    InvalidPrice,
    ProviderCall,
    Directory,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Authentication => "authentication",
            ErrorKind::MalformedEvent => "malformed_event",
            ErrorKind::UserNotFound => "user_not_found",
            ErrorKind::InvalidPrice => "invalid_price",
            ErrorKind::ProviderCall => "provider_call",
            ErrorKind::Directory => "directory",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl WebhookError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WebhookError::Authentication(_) => ErrorKind::Authentication,
            WebhookError::MalformedEvent(_) => ErrorKind::MalformedEvent,
            WebhookError::UserNotFound(_) => ErrorKind::UserNotFound,
            WebhookError::InvalidPrice(_) => ErrorKind::InvalidPrice,
            WebhookError::ProviderCall(_) => ErrorKind::ProviderCall,
            WebhookError::Directory(_) => ErrorKind::Directory,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} environment variable is not set")]
    Missing(&'static str),

    #[error("{name} has an invalid value: {value}")]
    Invalid { name: &'static str, value: String },

    #[error("STRIPE_MONTHLY_PRICE_ID and STRIPE_YEARLY_PRICE_ID must differ")]
    DuplicatePriceIds,
}
