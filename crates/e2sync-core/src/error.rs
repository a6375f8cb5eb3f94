use thiserror::Error;

pub type E2syncResult<T> = Result<T, E2syncError>;

#[derive(Debug, Error)]
pub enum E2syncError {
    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
