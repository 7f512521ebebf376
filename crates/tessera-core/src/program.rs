use std::sync::atomic::{AtomicU32, Ordering};

/// One compiled shader object and the text it was built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderObject {
    pub handle: u32,
    /// `h = c + h * 65599` over the source bytes.
    pub hash: u32,
    pub source: String,
}

/// A linked GPU program shared by every material whose generated source
/// is byte-identical.
#[derive(Debug)]
pub struct Program {
    pub handle: u32,
    pub vertex: ShaderObject,
    pub geometry: Option<ShaderObject>,
    pub fragment: ShaderObject,
    /// Bitmask over `Attribute::bit()` of the vertex inputs it reads.
    pub attributes: u32,
    /// Samples passed, summed over every material using this program.
    pub query_sum: AtomicU32,
}

impl Program {
    pub fn query_sum(&self) -> u32 {
        self.query_sum.load(Ordering::Relaxed)
    }

    pub fn add_query_samples(&self, samples: u32) {
        self.query_sum.fetch_add(samples, Ordering::Relaxed);
    }

    pub fn reset_query_sum(&self) {
        self.query_sum.store(0, Ordering::Relaxed);
    }

    pub fn uses(&self, attribute: crate::types::Attribute) -> bool {
        self.attributes & attribute.bit() != 0
    }
}

/// Source hash used to bucket shader objects before the exact text check.
pub fn source_hash(source: &str) -> u32 {
    source
        .bytes()
        .fold(0u32, |h, c| (c as u32).wrapping_add(h.wrapping_mul(65599)))
}
