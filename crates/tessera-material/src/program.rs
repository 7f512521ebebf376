//! Compile, link and share generated programs.

use std::collections::HashMap;
use std::sync::atomic::AtomicU32;
use std::sync::Arc;

use tessera_core::constants::{DLIGHT_BLOCK_BINDING, FOG_BLOCK_BINDING};
use tessera_core::program::{source_hash, ShaderObject};
use tessera_core::Program;

use crate::glsl::{Synthesized, SynthesisError};

/// Shader objects and programs each table holds before requests degrade.
pub const MAX_SHADER_OBJECTS: usize = 2048;
pub const MAX_PROGRAMS: usize = 1024;

/// Members of the `fogs` block, in the order the renderer fills them.
pub const FOG_MEMBERS: [&str; 4] = ["lightGridScale", "lightGridOffset", "fogColors", "fogPlanes"];
/// Members of the `dLights` block.
pub const DLIGHT_MEMBERS: [&str; 5] = ["dlSpheres", "dlColors", "dlLinks", "dlNum", "dlDebug"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Geometry,
    Fragment,
}

impl ShaderStage {
    pub fn name(self) -> &'static str {
        match self {
            Self::Vertex => "vertex",
            Self::Geometry => "geometry",
            Self::Fragment => "fragment",
        }
    }
}

/// Offset and array stride of one uniform block member, in bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformSlot {
    pub name: String,
    pub offset: u32,
    pub stride: u32,
}

/// Reflected layout of a uniform block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockLayout {
    pub size: u32,
    pub members: Vec<UniformSlot>,
}

impl BlockLayout {
    pub fn slot(&self, name: &str) -> Option<&UniformSlot> {
        self.members.iter().find(|m| m.name == name)
    }
}

/// A uniform buffer created for one block binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformBuffer {
    pub handle: u32,
    pub binding: u32,
    pub layout: BlockLayout,
}

/// Everything the linker needs besides the shader handles.
#[derive(Debug, Clone, Copy)]
pub struct LinkRequest<'a> {
    pub name: &'a str,
    pub vertex: u32,
    pub geometry: Option<u32>,
    pub fragment: u32,
    /// Attribute locations to bind, as `Attribute::bit()` mask.
    pub attributes: u32,
    /// Bind `dstColorAdd` and `dstColorMult` as the two blend sources.
    pub dual_source: bool,
}

/// Shader compilation and program reflection. Errors carry the driver's
/// info log.
pub trait ShaderCompiler {
    fn compile(&mut self, stage: ShaderStage, source: &str) -> Result<u32, String>;

    fn link(&mut self, request: &LinkRequest) -> Result<u32, String>;

    /// Point a sampler uniform at a texture unit. Unknown names are ignored.
    fn set_sampler(&mut self, program: u32, name: &str, unit: u32);

    /// Size and member offsets of `block`, or `None` if the program does
    /// not declare it.
    fn block_layout(&mut self, program: u32, block: &str, members: &[&str]) -> Option<BlockLayout>;

    fn create_uniform_buffer(&mut self, binding: u32, size: u32) -> u32;

    /// Attach `block` to `binding`. Returns false when the program has no
    /// such block.
    fn bind_block(&mut self, program: u32, block: &str, binding: u32) -> bool;
}

type ProgramKey = (u32, Option<u32>, u32);

/// Append-only table of compiled shader objects and linked programs.
///
/// Shader objects are bucketed by [`source_hash`] and reused only on an
/// exact text match. Programs are reused when all their shader objects are.
#[derive(Debug, Default)]
pub struct ProgramCache {
    shaders: HashMap<u32, Vec<ShaderObject>>,
    num_shaders: usize,
    programs: HashMap<ProgramKey, Arc<Program>>,
    order: Vec<Arc<Program>>,
    fog_buffer: Option<UniformBuffer>,
    dlight_buffer: Option<UniformBuffer>,
    shader_hits: usize,
    program_hits: usize,
}

impl ProgramCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile and link `out` for material `name`, or return the program
    /// already built from the same text.
    pub fn build(
        &mut self,
        compiler: &mut dyn ShaderCompiler,
        name: &str,
        out: &Synthesized,
    ) -> Result<Arc<Program>, SynthesisError> {
        let vertex = self.shader(compiler, name, ShaderStage::Vertex, &out.vertex)?;
        let geometry = match out.geometry.as_deref() {
            Some(source) => Some(self.shader(compiler, name, ShaderStage::Geometry, source)?),
            None => None,
        };
        let fragment = self.shader(compiler, name, ShaderStage::Fragment, &out.fragment)?;

        let key = (vertex.handle, geometry.as_ref().map(|g| g.handle), fragment.handle);
        let program = match self.programs.get(&key) {
            Some(program) => {
                self.program_hits += 1;
                log::debug!("{name}: reusing program {}", program.handle);
                program.clone()
            }
            None => self.link(compiler, name, out, key, vertex, geometry, fragment)?,
        };

        for (sampler, unit) in &out.sampler_units {
            compiler.set_sampler(program.handle, sampler, *unit);
        }
        if out.bind_uniform_blocks {
            self.bind_blocks(compiler, program.handle);
        }
        Ok(program)
    }

    fn shader(
        &mut self,
        compiler: &mut dyn ShaderCompiler,
        name: &str,
        stage: ShaderStage,
        source: &str,
    ) -> Result<ShaderObject, SynthesisError> {
        let hash = source_hash(source);
        if let Some(found) = self
            .shaders
            .get(&hash)
            .and_then(|chain| chain.iter().find(|s| s.source == source))
        {
            self.shader_hits += 1;
            return Ok(found.clone());
        }
        if self.num_shaders >= MAX_SHADER_OBJECTS {
            log::warn!("{name}: shader object table is full");
            return Err(SynthesisError::Unsupported("shader object table full"));
        }

        let handle = compiler.compile(stage, source).map_err(|log| {
            log::warn!("compile shader ({name}) error: {log}");
            log::warn!("{source}");
            SynthesisError::Compile {
                stage: stage.name(),
                log,
            }
        })?;
        let object = ShaderObject {
            handle,
            hash,
            source: source.to_string(),
        };
        self.shaders.entry(hash).or_default().push(object.clone());
        self.num_shaders += 1;
        Ok(object)
    }

    #[allow(clippy::too_many_arguments)]
    fn link(
        &mut self,
        compiler: &mut dyn ShaderCompiler,
        name: &str,
        out: &Synthesized,
        key: ProgramKey,
        vertex: ShaderObject,
        geometry: Option<ShaderObject>,
        fragment: ShaderObject,
    ) -> Result<Arc<Program>, SynthesisError> {
        if self.order.len() >= MAX_PROGRAMS {
            log::warn!("{name}: program table is full");
            return Err(SynthesisError::Unsupported("program table full"));
        }
        let request = LinkRequest {
            name,
            vertex: vertex.handle,
            geometry: geometry.as_ref().map(|g| g.handle),
            fragment: fragment.handle,
            attributes: out.attributes,
            dual_source: out.dual_source,
        };
        let handle = compiler.link(&request).map_err(|log| {
            log::warn!("link shader {name} error: {log}");
            log::warn!("{}", out.vertex);
            if let Some(gs) = &out.geometry {
                log::warn!("{gs}");
            }
            log::warn!("{}", out.fragment);
            SynthesisError::Link(log)
        })?;

        let program = Arc::new(Program {
            handle,
            vertex,
            geometry,
            fragment,
            attributes: out.attributes,
            query_sum: AtomicU32::new(0),
        });
        self.programs.insert(key, program.clone());
        self.order.push(program.clone());
        Ok(program)
    }

    /// Bind both blocks; the first program declaring a block decides its
    /// layout and gets the buffer created.
    fn bind_blocks(&mut self, compiler: &mut dyn ShaderCompiler, program: u32) {
        let blocks: [(&str, u32, &[&str], &mut Option<UniformBuffer>); 2] = [
            ("fogs", FOG_BLOCK_BINDING, &FOG_MEMBERS, &mut self.fog_buffer),
            ("dLights", DLIGHT_BLOCK_BINDING, &DLIGHT_MEMBERS, &mut self.dlight_buffer),
        ];
        for (block, binding, members, buffer) in blocks {
            if buffer.is_none() {
                if let Some(layout) = compiler.block_layout(program, block, members) {
                    let handle = compiler.create_uniform_buffer(binding, layout.size);
                    log::debug!("{block}: {} bytes at binding {binding}", layout.size);
                    *buffer = Some(UniformBuffer {
                        handle,
                        binding,
                        layout,
                    });
                }
            }
            compiler.bind_block(program, block, binding);
        }
    }

    /// Programs in creation order.
    pub fn programs(&self) -> &[Arc<Program>] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn num_shaders(&self) -> usize {
        self.num_shaders
    }

    /// Requests answered from the table, as (shader objects, programs).
    pub fn hits(&self) -> (usize, usize) {
        (self.shader_hits, self.program_hits)
    }

    pub fn fog_buffer(&self) -> Option<&UniformBuffer> {
        self.fog_buffer.as_ref()
    }

    pub fn dlight_buffer(&self) -> Option<&UniformBuffer> {
        self.dlight_buffer.as_ref()
    }

    /// Zero every program's sample counter before a new frame's queries.
    pub fn reset_queries(&self) {
        for program in &self.order {
            program.reset_query_sum();
        }
    }
}
