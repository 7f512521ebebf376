//! Shared limits for materials, stages and per-frame renderer tables.
//! Table sizes are powers of two where they are used as hash moduli.

/// Maximum number of stages in one material.
pub const MAX_SHADER_STAGES: usize = 8;

/// Texture bundles per stage (primary + multitexture partner).
pub const NUM_TEXTURE_BUNDLES: usize = 2;

/// Maximum vertex deforms per material.
pub const MAX_SHADER_DEFORMS: usize = 3;

/// Maximum texcoord modifiers per bundle.
pub const MAX_TEXMODS: usize = 4;

/// Maximum animation frames in an `animMap`.
pub const MAX_IMAGE_ANIMATIONS: usize = 8;

/// Maximum number of registered materials. Handles are 14-bit sort keys.
pub const MAX_SHADERS: usize = 1 << 14;

/// Bucket count of the registered-material name hash.
pub const FILE_HASH_SIZE: usize = 1024;

/// Bucket count of the material text index.
pub const MAX_SHADERTEXT_HASH: usize = 2048;

/// Maximum length of a material or image name.
pub const MAX_QPATH: usize = 64;

/// Maximum dynamic lights per frame. One bit each in the surface dlight mask.
pub const MAX_DLIGHTS: usize = 32;

/// Maximum fog volumes per world.
pub const MAX_FOGS: usize = 256;

/// Entries in each precomputed wave table.
pub const FUNCTABLE_SIZE: usize = 1024;

/// log2 of FUNCTABLE_SIZE.
pub const FUNCTABLE_SIZE2: u32 = 10;

/// Mask applied to a fixed-point table index.
pub const FUNCTABLE_MASK: usize = FUNCTABLE_SIZE - 1;

/// Maximum vertices in one tessellation batch.
pub const SHADER_MAX_VERTEXES: usize = 1000;

/// Maximum indexes in one tessellation batch.
pub const SHADER_MAX_INDEXES: usize = 6 * SHADER_MAX_VERTEXES;

/// Maximum instances drawn from one batch.
pub const MAX_INSTANCES: usize = 1024;

/// Default cloud height for sky materials.
pub const DEFAULT_CLOUD_HEIGHT: f32 = 512.0;

/// Default portal range for `alphaGen portal`.
pub const DEFAULT_PORTAL_RANGE: f32 = 256.0;

/// Allocation granularity of the scratch arena in bytes.
pub const SCRATCH_ALIGN: usize = 32;

/// Number of command buffers in flight between producer and consumer.
pub const HANDOFF_CAPACITY: usize = 2;

/// Texture unit the light grid volume is bound to.
pub const LIGHTGRID_TEXTURE_UNIT: u32 = 15;

/// Uniform block bindings of generated programs.
pub const FOG_BLOCK_BINDING: u32 = 0;
pub const DLIGHT_BLOCK_BINDING: u32 = 1;
