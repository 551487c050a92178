use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("`{0}` exited with {1}: {2}")]
    Command(String, std::process::ExitStatus, String),

    #[error("image \"{0}\" is not mapped")]
    ShardNotMapped(String),

    #[error("image \"{0}\" already exists")]
    AlreadyExists(String),
}
