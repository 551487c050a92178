use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("sql error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("set_shard_state(\"{name}\", {new_state}) affected zero rows")]
    NoRowsAffected { name: String, new_state: String },

    #[error("object not found in catalog")]
    NotFound,
}
