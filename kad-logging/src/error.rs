use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("logging configuration error: {0}")]
    LoggingConfiguration(String),
    #[error("I/O error while setting up logging: {0}")]
    Io(#[from] std::io::Error),
}
