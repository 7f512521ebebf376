use thiserror::Error;

/// Misuse of the per-surface scratch arena. Always fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScratchError {
    #[error("scratch arena exhausted: requested {requested} bytes, {free} of {capacity} free")]
    OutOfMemory {
        requested: usize,
        free: usize,
        capacity: usize,
    },

    #[error("scratch release out of LIFO order: block at {offset} is not on top (top at {top})")]
    BadRelease { offset: usize, top: usize },
}

/// A state-bits value that has no mapping to a GPU enum. Always fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("invalid source blend bits {0:#x}")]
    InvalidSrcBlend(u32),

    #[error("invalid destination blend bits {0:#x}")]
    InvalidDstBlend(u32),

    #[error("invalid depth function bits {0:#x}")]
    InvalidDepthFunc(u32),

    #[error("invalid alpha test bits {0:#x}")]
    InvalidAlphaTest(u32),
}
