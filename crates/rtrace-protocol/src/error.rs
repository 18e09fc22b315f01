#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid magic bytes")]
    InvalidMagic,

    #[error("frame too large: {0} bytes")]
    FrameTooLarge(u32),

    #[error("truncated frame: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("decompression error: {0}")]
    Decompression(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
