use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("record store unreachable: {0}")]
    Unreachable(#[from] reqwest::Error),
    #[error("record store returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("unexpected record store response: {0}")]
    Decode(String),
    #[error("invalid record store url: {0}")]
    InvalidUrl(String),
}

impl StoreError {
    /// Message suitable for showing to the user, preferring the store's own wording.
    pub fn user_message(&self) -> String {
        match self {
            StoreError::Status { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}
