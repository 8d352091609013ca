use thiserror::Error;

/// Errors that can occur when staging bytes in a [crate::ByteBuffer].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A read or write could not be satisfied, even after growing (if permitted).
    #[error("insufficient capacity: requested {requested} bytes, available {available}")]
    InsufficientCapacity { requested: usize, available: usize },
    /// Growth was attempted while other handles share the backing region.
    ///
    /// This indicates a defect in the caller and should not be retried.
    #[error("cannot grow a buffer shared by {references} references")]
    SharedBufferCannotGrow { references: usize },
    /// A reference was requested after the backing region was released.
    #[error("buffer already reclaimed")]
    AlreadyReclaimed,
    #[error("codec: {0}")]
    Codec(#[from] stagebuf_codec::Error),
}
