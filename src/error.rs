use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("{0}")]
  InvalidInput(String),
  #[error("{0} not found")]
  NotFound(String),
  #[error("{0}")]
  Processing(String),
  #[error("storage error: {0:#}")]
  Storage(anyhow::Error),
  #[error("broker error: {0:#}")]
  Broker(anyhow::Error),
}

impl Error {
  pub fn storage(err: impl Into<anyhow::Error>) -> Self {
    Error::Storage(err.into())
  }

  pub fn broker(err: impl Into<anyhow::Error>) -> Self {
    Error::Broker(err.into())
  }
}

impl warp::reject::Reject for Error {}

pub type Result<T> = std::result::Result<T, Error>;
