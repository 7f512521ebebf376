//! The boundary to the graphics API. Everything the renderer does to the
//! device goes through [`GpuBackend`] as a typed [`GpuCall`] or a draw.
//!
//! [`RecordingBackend`] logs every call instead of executing it. It also
//! plays the shader compiler, reporting std140 layouts for the generated
//! uniform blocks, so whole frames can be replayed without a device.

use std::collections::HashMap;

use tessera_core::material::MultitextureEnv;
use tessera_core::{Attribute, ImageId};
use tessera_material::{BlockLayout, LinkRequest, ShaderCompiler, ShaderStage, UniformSlot};

use crate::blend::AlphaTest;
use crate::tess::{AttribArray, Instance, Vertex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferTarget {
    Vertex,
    Index,
    Uniform,
}

/// One state change.
#[derive(Debug, Clone, PartialEq)]
pub enum GpuCall {
    /// 0 selects the fixed-function pipeline.
    UseProgram(u32),
    Blend(Option<wgpu::BlendState>),
    DepthFunc(wgpu::CompareFunction),
    DepthWrite(bool),
    ColorWrite(bool),
    /// `(factor, units)`, or `None` to disable.
    PolygonOffset(Option<(f32, f32)>),
    PolygonMode(wgpu::PolygonMode),
    DepthTest(bool),
    DepthRange(f32, f32),
    AlphaTest(Option<AlphaTest>),
    Cull(Option<wgpu::Face>),
    BindTexture { unit: u32, image: ImageId },
    EnableTexturing { unit: u32, enabled: bool },
    TexEnv { unit: u32, env: MultitextureEnv },
    BindBuffer { target: BufferTarget, handle: u32 },
    EnableAttribute(Attribute),
    DisableAttribute(Attribute),
    AttributeArray { attribute: Attribute, array: AttribArray },
    AttributeConstant { attribute: Attribute, value: [f32; 4] },
    AttributeDivisor { attribute: Attribute, divisor: u32 },
    StencilTest(bool),
    StencilFunc { compare: wgpu::CompareFunction, reference: u32, mask: u32 },
    /// `face` of `None` sets both faces.
    StencilOp {
        face: Option<wgpu::Face>,
        fail: wgpu::StencilOperation,
        depth_fail: wgpu::StencilOperation,
        pass: wgpu::StencilOperation,
    },
    StencilMask(u32),
    BeginQuery(u32),
    EndQuery(u32),
    /// Copy the depth buffer into the depth texture.
    CopyDepth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexSource<'a> {
    Client(&'a [u32]),
    /// Byte offset into a static index buffer.
    Buffer { handle: u32, offset: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawCall<'a> {
    pub indexes: IndexSource<'a>,
    pub count: usize,
    pub min_index: u32,
    pub max_index: u32,
    /// 1 for an ordinary draw.
    pub instances: u32,
}

/// Client arrays the bound attribute pointers may refer to.
#[derive(Debug, Clone, Copy)]
pub struct ClientMemory<'a> {
    pub vertices: &'a [Vertex],
    pub instances: &'a [Instance],
    pub scratch: &'a [u8],
}

pub trait GpuBackend {
    fn apply(&mut self, call: GpuCall);

    fn draw(&mut self, call: &DrawCall<'_>, memory: &ClientMemory<'_>);

    /// Samples passed by a finished query, `None` while pending.
    fn query_result(&mut self, query: u32) -> Option<u32>;

    /// Replace the contents of a buffer. Handle 0 asks the backend to
    /// allocate one; the handle used is returned.
    fn upload(&mut self, target: BufferTarget, handle: u32, data: &[u8]) -> u32;
}

/// One entry of the [`RecordingBackend`] log.
#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    Call(GpuCall),
    Draw {
        count: usize,
        min_index: u32,
        max_index: u32,
        instances: u32,
        /// Client index copy, empty for buffer draws.
        indexes: Vec<u32>,
    },
    Upload { target: BufferTarget, handle: u32, len: usize },
    Compile { stage: ShaderStage, handle: u32 },
    Link { name: String, handle: u32 },
    Sampler { program: u32, name: String, unit: u32 },
    BindBlock { program: u32, block: String, binding: u32 },
}

#[derive(Debug, Default)]
pub struct RecordingBackend {
    pub log: Vec<Recorded>,
    /// Results handed out by `query_result`.
    pub query_results: HashMap<u32, u32>,
    /// Source of every compiled shader object by handle.
    pub sources: HashMap<u32, String>,
    /// Fail every link, to exercise the fixed-function fallback.
    pub fail_links: bool,
    next_handle: u32,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&mut self) -> u32 {
        self.next_handle += 1;
        self.next_handle
    }

    pub fn clear(&mut self) {
        self.log.clear();
    }

    pub fn calls(&self) -> impl Iterator<Item = &GpuCall> + '_ {
        self.log.iter().filter_map(|r| match r {
            Recorded::Call(c) => Some(c),
            _ => None,
        })
    }

    pub fn draws(&self) -> impl Iterator<Item = &Recorded> + '_ {
        self.log.iter().filter(|r| matches!(r, Recorded::Draw { .. }))
    }

    pub fn num_draws(&self) -> usize {
        self.draws().count()
    }

    pub fn count(&self, pred: impl Fn(&GpuCall) -> bool) -> usize {
        self.calls().filter(|c| pred(c)).count()
    }
}

impl GpuBackend for RecordingBackend {
    fn apply(&mut self, call: GpuCall) {
        log::trace!("{call:?}");
        self.log.push(Recorded::Call(call));
    }

    fn draw(&mut self, call: &DrawCall<'_>, _memory: &ClientMemory<'_>) {
        let indexes = match call.indexes {
            IndexSource::Client(idx) => idx[..call.count.min(idx.len())].to_vec(),
            IndexSource::Buffer { .. } => Vec::new(),
        };
        self.log.push(Recorded::Draw {
            count: call.count,
            min_index: call.min_index,
            max_index: call.max_index,
            instances: call.instances,
            indexes,
        });
    }

    fn query_result(&mut self, query: u32) -> Option<u32> {
        self.query_results.get(&query).copied()
    }

    fn upload(&mut self, target: BufferTarget, handle: u32, data: &[u8]) -> u32 {
        let handle = if handle == 0 { self.handle() } else { handle };
        self.log.push(Recorded::Upload {
            target,
            handle,
            len: data.len(),
        });
        handle
    }
}

/// std140 layout of a member array of `count` vec4-aligned elements.
fn std140_array(name: &str, offset: u32, count: u32) -> (UniformSlot, u32) {
    let slot = UniformSlot {
        name: name.to_string(),
        offset,
        stride: 16,
    };
    (slot, offset + 16 * count)
}

fn std140_scalar(name: &str, offset: u32, size: u32) -> (UniformSlot, u32) {
    let slot = UniformSlot {
        name: name.to_string(),
        offset,
        stride: 0,
    };
    (slot, offset + size)
}

/// Layouts a std140 compiler would report for the generated blocks.
fn reflect(block: &str) -> Option<BlockLayout> {
    let mut members = Vec::new();
    let end = match block {
        "dLights" => {
            let (s, o) = std140_array("dlSpheres", 0, 255);
            members.push(s);
            let (s, o) = std140_array("dlColors", o, 128);
            members.push(s);
            let (s, o) = std140_array("dlLinks", o, 255);
            members.push(s);
            let (s, o) = std140_scalar("dlNum", o, 8);
            members.push(s);
            let (s, o) = std140_scalar("dlDebug", o, 8);
            members.push(s);
            o
        }
        "fogs" => {
            let (s, o) = std140_scalar("lightGridScale", 0, 16);
            members.push(s);
            let (s, o) = std140_scalar("lightGridOffset", o, 16);
            members.push(s);
            let (s, o) = std140_array("fogColors", o, 256);
            members.push(s);
            let (s, o) = std140_array("fogPlanes", o, 256);
            members.push(s);
            o
        }
        _ => return None,
    };
    Some(BlockLayout { size: end, members })
}

impl ShaderCompiler for RecordingBackend {
    fn compile(&mut self, stage: ShaderStage, source: &str) -> Result<u32, String> {
        let handle = self.handle();
        self.sources.insert(handle, source.to_string());
        self.log.push(Recorded::Compile { stage, handle });
        Ok(handle)
    }

    fn link(&mut self, request: &LinkRequest) -> Result<u32, String> {
        if self.fail_links {
            return Err(format!("link of {} disabled", request.name));
        }
        let handle = self.handle();
        self.log.push(Recorded::Link {
            name: request.name.to_string(),
            handle,
        });
        Ok(handle)
    }

    fn set_sampler(&mut self, program: u32, name: &str, unit: u32) {
        self.log.push(Recorded::Sampler {
            program,
            name: name.to_string(),
            unit,
        });
    }

    fn block_layout(&mut self, program: u32, block: &str, members: &[&str]) -> Option<BlockLayout> {
        let layout = reflect(block)?;
        let known = members.iter().all(|m| layout.slot(m).is_some());
        if !known {
            log::warn!("program {program}: block {block} lacks requested members");
            return None;
        }
        Some(layout)
    }

    fn create_uniform_buffer(&mut self, binding: u32, size: u32) -> u32 {
        let handle = self.handle();
        self.log.push(Recorded::Upload {
            target: BufferTarget::Uniform,
            handle,
            len: size as usize,
        });
        log::debug!("uniform buffer {handle} at binding {binding}");
        handle
    }

    fn bind_block(&mut self, program: u32, block: &str, binding: u32) -> bool {
        self.log.push(Recorded::BindBlock {
            program,
            block: block.to_string(),
            binding,
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_material::program::{DLIGHT_MEMBERS, FOG_MEMBERS};

    #[test]
    fn test_dlight_block_layout() {
        let mut backend = RecordingBackend::new();
        let layout = backend.block_layout(1, "dLights", &DLIGHT_MEMBERS).unwrap();
        assert_eq!(layout.slot("dlColors").unwrap().offset, 4080);
        assert_eq!(layout.slot("dlLinks").unwrap().offset, 6128);
        assert_eq!(layout.slot("dlNum").unwrap().offset, 10208);
        assert_eq!(layout.slot("dlDebug").unwrap().offset, 10216);
        assert_eq!(layout.size, 10224);
    }

    #[test]
    fn test_fog_block_layout() {
        let mut backend = RecordingBackend::new();
        let layout = backend.block_layout(1, "fogs", &FOG_MEMBERS).unwrap();
        assert_eq!(layout.slot("fogPlanes").unwrap().offset, 4128);
        assert_eq!(layout.size, 8224);
        assert!(backend.block_layout(1, "unknown", &[]).is_none());
    }

    #[test]
    fn test_upload_allocates_handles() {
        let mut backend = RecordingBackend::new();
        let a = backend.upload(BufferTarget::Vertex, 0, &[0; 48]);
        let b = backend.upload(BufferTarget::Vertex, a, &[0; 96]);
        assert_eq!(a, b);
        assert_ne!(backend.upload(BufferTarget::Index, 0, &[0; 12]), a);
        assert_eq!(backend.log.len(), 3);
    }

    #[test]
    fn test_draw_records_client_indexes() {
        let mut backend = RecordingBackend::new();
        let idx = [0, 1, 2, 2, 1, 3];
        let memory = ClientMemory {
            vertices: &[],
            instances: &[],
            scratch: &[],
        };
        backend.draw(
            &DrawCall {
                indexes: IndexSource::Client(&idx),
                count: 3,
                min_index: 0,
                max_index: 2,
                instances: 1,
            },
            &memory,
        );
        assert_eq!(
            backend.log[0],
            Recorded::Draw {
                count: 3,
                min_index: 0,
                max_index: 2,
                instances: 1,
                indexes: vec![0, 1, 2],
            }
        );
    }
}
