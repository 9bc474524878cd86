use thiserror::Error;

/// Errors raised by the runtime layer itself. Load and store failures have
/// their own types closer to where they happen.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid loader configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
