//! The tessellation buffer: vertices and indexes of the surfaces sharing
//! one material, collected between `begin` and the end-of-surface flush.
//!
//! Indexes are appended into three consecutive ranges: range 0 for
//! surfaces that are only drawn, range 1 for surfaces that are drawn and
//! dynamically lit, range 2 for surfaces that only receive dlights.
//! Counts are cumulative, so `num_indexes[r]` is the end of range `r`.

use std::mem::{offset_of, size_of};

use tessera_core::constants::{MAX_INSTANCES, SHADER_MAX_INDEXES, SHADER_MAX_VERTEXES};
use tessera_core::ImageId;

/// Initial `min_index` of an empty range.
pub const NO_MIN_INDEX: u32 = 0x7fff_ffff;

/// Client vertex (48 bytes). `xyz` plus `fog` read as one vec4, `tc1`
/// plus `tc2` likewise.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex {
    pub xyz: [f32; 3],
    pub fog: f32,
    pub tc1: [f32; 2],
    pub tc2: [f32; 2],
    pub normal: [f32; 3],
    pub color: [u8; 4],
}

/// Per-instance data of one entity (128 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Instance {
    pub times: [f32; 4],
    pub trans_x: [f32; 4],
    pub trans_y: [f32; 4],
    pub trans_z: [f32; 4],
    pub tex_coord: [f32; 4],
    pub ambient_light: [f32; 4],
    pub directed_light: [f32; 3],
    pub color: [u8; 4],
    pub light_dir: [f32; 4],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentType {
    F32,
    /// Normalised unsigned bytes.
    U8Norm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexField {
    /// `xyz` and `fog` together.
    Position,
    Tc1,
    Tc2,
    /// `tc1` and `tc2` together.
    TexCoords,
    Normal,
    Color,
}

impl VertexField {
    pub fn offset(self) -> usize {
        match self {
            Self::Position => offset_of!(Vertex, xyz),
            Self::Tc1 | Self::TexCoords => offset_of!(Vertex, tc1),
            Self::Tc2 => offset_of!(Vertex, tc2),
            Self::Normal => offset_of!(Vertex, normal),
            Self::Color => offset_of!(Vertex, color),
        }
    }

    pub fn components(self) -> u8 {
        match self {
            Self::Position | Self::TexCoords | Self::Color => 4,
            Self::Normal => 3,
            Self::Tc1 | Self::Tc2 => 2,
        }
    }

    pub fn kind(self) -> ComponentType {
        match self {
            Self::Color => ComponentType::U8Norm,
            _ => ComponentType::F32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstanceField {
    Times,
    TransX,
    TransY,
    TransZ,
    TexCoord,
    AmbientLight,
    DirectedLight,
    Color,
    LightDir,
}

impl InstanceField {
    pub fn offset(self) -> usize {
        match self {
            Self::Times => offset_of!(Instance, times),
            Self::TransX => offset_of!(Instance, trans_x),
            Self::TransY => offset_of!(Instance, trans_y),
            Self::TransZ => offset_of!(Instance, trans_z),
            Self::TexCoord => offset_of!(Instance, tex_coord),
            Self::AmbientLight => offset_of!(Instance, ambient_light),
            Self::DirectedLight => offset_of!(Instance, directed_light),
            Self::Color => offset_of!(Instance, color),
            Self::LightDir => offset_of!(Instance, light_dir),
        }
    }

    pub fn components(self) -> u8 {
        match self {
            Self::DirectedLight => 3,
            _ => 4,
        }
    }

    pub fn kind(self) -> ComponentType {
        match self {
            Self::Color => ComponentType::U8Norm,
            _ => ComponentType::F32,
        }
    }
}

/// Where an attribute array lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArraySource {
    /// Client vertex array of the tessellation buffer.
    Vertices,
    /// Client instance array.
    Instances,
    /// Scratch arena.
    Scratch,
    /// GPU vertex buffer.
    Buffer(u32),
}

/// A vertex attribute array pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttribArray {
    pub source: ArraySource,
    pub offset: usize,
    pub components: u8,
    pub kind: ComponentType,
    pub stride: usize,
}

impl AttribArray {
    pub fn vertex(field: VertexField) -> Self {
        Self {
            source: ArraySource::Vertices,
            offset: field.offset(),
            components: field.components(),
            kind: field.kind(),
            stride: size_of::<Vertex>(),
        }
    }

    /// Same field inside a static vertex buffer laid out as [`Vertex`].
    pub fn buffer(handle: u32, base: usize, field: VertexField) -> Self {
        Self {
            source: ArraySource::Buffer(handle),
            offset: base + field.offset(),
            ..Self::vertex(field)
        }
    }

    pub fn instance(field: InstanceField) -> Self {
        Self {
            source: ArraySource::Instances,
            offset: field.offset(),
            components: field.components(),
            kind: field.kind(),
            stride: size_of::<Instance>(),
        }
    }

    /// Tightly packed array in the scratch arena.
    pub fn scratch(offset: usize, components: u8, kind: ComponentType) -> Self {
        let width = match kind {
            ComponentType::F32 => 4,
            ComponentType::U8Norm => 1,
        };
        Self {
            source: ArraySource::Scratch,
            offset,
            components,
            kind,
            stride: components as usize * width,
        }
    }

    /// True when the array reads client memory rather than a GPU buffer.
    pub fn is_client(&self) -> bool {
        !matches!(self.source, ArraySource::Buffer(_))
    }
}

/// Indexes already resident in a static index buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticBatch {
    pub vbo: u32,
    /// Byte offset of vertex 0 within the vertex buffer.
    pub vbo_offset: usize,
    pub ibo: u32,
    /// Byte offset of the first index within the index buffer.
    pub ibo_offset: usize,
    pub count: usize,
    pub min_index: u32,
    pub max_index: u32,
}

#[derive(Debug)]
pub struct Tess {
    pub vertices: Vec<Vertex>,
    pub indexes: Vec<u32>,
    pub num_indexes: [usize; 3],
    pub min_index: [u32; 3],
    pub max_index: [u32; 3],
    /// Range currently being appended to.
    pub index_range: usize,
    pub static_batches: Vec<StaticBatch>,
    pub instances: Vec<Instance>,
    /// Registry index of the material being drawn.
    pub material: Option<usize>,
    /// One bit per dynamic light touching any range 1 or 2 surface.
    pub dlight_bits: u32,
    /// Fog volume index, 0 for none.
    pub fog: usize,
    pub shader_time: f32,
    /// Replaces the first image of every stage.
    pub image_override: Option<ImageId>,
    /// Extra texture bound after the stage images by program draws.
    pub data_texture: Option<ImageId>,
}

impl Default for Tess {
    fn default() -> Self {
        Self {
            vertices: Vec::with_capacity(SHADER_MAX_VERTEXES),
            indexes: Vec::with_capacity(SHADER_MAX_INDEXES),
            num_indexes: [0; 3],
            min_index: [NO_MIN_INDEX; 3],
            max_index: [0; 3],
            index_range: 0,
            static_batches: Vec::new(),
            instances: Vec::new(),
            material: None,
            dlight_bits: 0,
            fog: 0,
            shader_time: 0.0,
            image_override: None,
            data_texture: None,
        }
    }
}

impl Tess {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset for a new batch of `material` at `shader_time`.
    pub fn begin(&mut self, material: usize, shader_time: f32) {
        self.discard();
        self.material = Some(material);
        self.shader_time = shader_time;
    }

    /// Drop everything collected so far.
    pub fn discard(&mut self) {
        self.vertices.clear();
        self.indexes.clear();
        self.num_indexes = [0; 3];
        self.min_index = [NO_MIN_INDEX; 3];
        self.max_index = [0; 3];
        self.index_range = 0;
        self.static_batches.clear();
        self.instances.clear();
        self.dlight_bits = 0;
        self.fog = 0;
        self.image_override = None;
        self.data_texture = None;
    }

    /// Whether `vertices` more vertices and `indexes` more indexes fit.
    pub fn fits(&self, vertices: usize, indexes: usize) -> bool {
        self.vertices.len() + vertices <= SHADER_MAX_VERTEXES
            && self.indexes.len() + indexes <= SHADER_MAX_INDEXES
    }

    /// Append a surface to `range`. Indexes are relative to the surface's
    /// own vertices. Ranges only move forward; an earlier range is treated
    /// as the current one. Returns false when the batch is full.
    pub fn add_surface(&mut self, range: usize, vertices: &[Vertex], indexes: &[u32]) -> bool {
        if !self.fits(vertices.len(), indexes.len()) {
            return false;
        }
        let range = range.min(2).max(self.index_range);
        while self.index_range < range {
            self.index_range += 1;
            self.num_indexes[self.index_range] = self.num_indexes[self.index_range - 1];
        }

        let base = self.vertices.len() as u32;
        self.vertices.extend_from_slice(vertices);
        for &i in indexes {
            let index = base + i;
            self.min_index[range] = self.min_index[range].min(index);
            self.max_index[range] = self.max_index[range].max(index);
            self.indexes.push(index);
        }
        self.num_indexes[range] += indexes.len();
        true
    }

    /// Queue indexes that already live in a static buffer.
    pub fn add_static_batch(&mut self, batch: StaticBatch) {
        self.static_batches.push(batch);
    }

    /// Add one instance. Returns false once the instance array is full.
    pub fn add_instance(&mut self, instance: Instance) -> bool {
        if self.instances.len() >= MAX_INSTANCES {
            return false;
        }
        self.instances.push(instance);
        true
    }

    /// Close the open ranges and fold them so that range 1 covers every
    /// drawn index `[0, n1)` and range 2 every dlit index `[n0, n0 + n2)`.
    /// The vertex bounds nest afterwards: range 2 holds range 1, which
    /// holds range 0.
    pub fn merge_ranges(&mut self) {
        while self.index_range < 2 {
            self.index_range += 1;
            self.num_indexes[self.index_range] = self.num_indexes[self.index_range - 1];
        }
        self.num_indexes[2] -= self.num_indexes[0];
        self.min_index[1] = self.min_index[1].min(self.min_index[0]);
        self.max_index[1] = self.max_index[1].max(self.max_index[0]);
        self.min_index[2] = self.min_index[2].min(self.min_index[1]);
        self.max_index[2] = self.max_index[2].max(self.max_index[1]);
    }

    /// Indexes of the merged drawn range.
    pub fn drawn_indexes(&self) -> &[u32] {
        &self.indexes[..self.num_indexes[1]]
    }

    /// Indexes of the merged dlit range.
    pub fn lit_indexes(&self) -> &[u32] {
        let start = self.num_indexes[0];
        &self.indexes[start..start + self.num_indexes[2]]
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }
}
