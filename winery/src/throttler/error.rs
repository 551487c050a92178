use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("throttler SQL error: {0}")]
    Sql(#[from] sqlx::Error),
}
