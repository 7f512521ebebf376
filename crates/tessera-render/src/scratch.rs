//! LIFO arena for the transient per-surface arrays (generated colours,
//! texcoords, dlight index lists).
//!
//! Every allocation returns a [`ScratchBlock`] that must be handed back in
//! exact reverse order. Releasing anything but the top block, or asking for
//! more than is left, is a structural bug in draw submission and panics.

use bytemuck::{Pod, Zeroable};

use tessera_core::constants::SCRATCH_ALIGN;
use tessera_core::ScratchError;

#[repr(C, align(32))]
#[derive(Clone, Copy, Pod, Zeroable)]
struct Chunk([u8; SCRATCH_ALIGN]);

/// One live allocation. Not `Clone`: a block can only be released once.
#[must_use = "scratch blocks must be released in LIFO order"]
#[derive(Debug, PartialEq, Eq)]
pub struct ScratchBlock {
    offset: usize,
    len: usize,
    size: usize,
}

impl ScratchBlock {
    /// Byte offset into the arena, always a multiple of `SCRATCH_ALIGN`.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Requested length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

pub struct Scratch {
    chunks: Vec<Chunk>,
    top: usize,
}

impl Scratch {
    /// Arena of at least `bytes` bytes, rounded up to the granularity.
    pub fn new(bytes: usize) -> Self {
        let chunks = bytes.div_ceil(SCRATCH_ALIGN);
        Self {
            chunks: vec![Chunk::zeroed(); chunks],
            top: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.chunks.len() * SCRATCH_ALIGN
    }

    /// Bytes still available.
    pub fn free(&self) -> usize {
        self.capacity() - self.top
    }

    fn exhausted(&self, requested: usize) -> ScratchError {
        ScratchError::OutOfMemory {
            requested,
            free: self.free(),
            capacity: self.capacity(),
        }
    }

    pub fn try_alloc(&mut self, bytes: usize) -> Result<ScratchBlock, ScratchError> {
        let size = match bytes.div_ceil(SCRATCH_ALIGN).checked_mul(SCRATCH_ALIGN) {
            Some(size) if size <= self.free() => size,
            _ => return Err(self.exhausted(bytes)),
        };
        let block = ScratchBlock {
            offset: self.top,
            len: bytes,
            size,
        };
        self.top += size;
        Ok(block)
    }

    /// Allocate `bytes` bytes. Panics when the arena is exhausted.
    pub fn alloc(&mut self, bytes: usize) -> ScratchBlock {
        self.try_alloc(bytes).unwrap_or_else(|e| panic!("{e}"))
    }

    /// Room for `count` values of `T`. A byte size that overflows `usize`
    /// counts as exhaustion.
    pub fn try_alloc_array<T: Pod>(&mut self, count: usize) -> Result<ScratchBlock, ScratchError> {
        match count.checked_mul(std::mem::size_of::<T>()) {
            Some(bytes) => self.try_alloc(bytes),
            None => Err(self.exhausted(usize::MAX)),
        }
    }

    pub fn alloc_array<T: Pod>(&mut self, count: usize) -> ScratchBlock {
        self.try_alloc_array::<T>(count).unwrap_or_else(|e| panic!("{e}"))
    }

    pub fn try_release(&mut self, block: ScratchBlock) -> Result<(), ScratchError> {
        if block.offset + block.size != self.top {
            return Err(ScratchError::BadRelease {
                offset: block.offset,
                top: self.top,
            });
        }
        self.top = block.offset;
        Ok(())
    }

    /// Hand a block back. Panics unless it is the most recent live one.
    pub fn release(&mut self, block: ScratchBlock) {
        self.try_release(block).unwrap_or_else(|e| panic!("{e}"));
    }

    /// The whole arena as bytes, for backends reading client arrays.
    pub fn bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.chunks)
    }

    pub fn slice<T: Pod>(&self, block: &ScratchBlock) -> &[T] {
        bytemuck::cast_slice(&self.bytes()[block.offset..block.offset + block.len])
    }

    pub fn slice_mut<T: Pod>(&mut self, block: &ScratchBlock) -> &mut [T] {
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(&mut self.chunks);
        bytemuck::cast_slice_mut(&mut bytes[block.offset..block.offset + block.len])
    }
}
