use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("deferred write queue overflow for instance")]
    DeferredQueueOverflow,

    #[error("frame too short to extract a route key")]
    FrameTooShort,

    #[error("unrecognized ethertype {0:#06x}")]
    UnknownEtherType(u16),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;
