use crate::frame_alloc::FrameAllocError;

/// Recoverable failures of the allocation facade.
///
/// Every failing call has already rolled back whatever it obtained.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum MemoryError {
    #[error("not enough physical memory for {pages} page(s)")]
    OutOfPhysicalMemory { pages: u32 },
    #[error("not enough virtual memory for {pages} page(s)")]
    OutOfVirtualSpace { pages: u32 },
    #[error("no page available for identity mapping")]
    IdentitySearchExhausted,
    #[error("zero-sized request")]
    EmptyRequest,
}

impl From<FrameAllocError> for MemoryError {
    fn from(value: FrameAllocError) -> Self {
        match value {
            FrameAllocError::OutOfMemory { pages } => Self::OutOfPhysicalMemory { pages },
            FrameAllocError::EmptyRequest => Self::EmptyRequest,
        }
    }
}
