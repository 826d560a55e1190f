use std::io;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("archive has no member '{path}'")]
    MemberNotFound { path: String },

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
