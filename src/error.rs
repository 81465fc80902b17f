use thiserror::Error;

#[derive(Error, Debug)]
pub enum BlockMapError {
    #[error("no free run of {0} blocks in any existing chunk")]
    Exhausted(i64),

    #[error("requested {requested} contiguous blocks but a chunk holds at most {max}")]
    ExceedsChunk { requested: i64, max: i64 },

    #[error("chunk index {0} out of bounds")]
    OutOfBounds(usize),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BlockMapError>;
