//! Shadow copy of the device state. Every setter compares against the
//! last value it applied and only talks to the backend on a change.
//! `None` fields mean "unknown", which forces the next set through.

use tessera_core::constants::NUM_TEXTURE_BUNDLES;
use tessera_core::material::MultitextureEnv;
use tessera_core::{Attribute, CullType, ImageId, Program, RendererConfig, StateBits, StateError};

use crate::backend::{BufferTarget, ClientMemory, DrawCall, GpuBackend, GpuCall};
use crate::blend;
use crate::tess::{ArraySource, AttribArray};

/// Texture units tracked by the cache.
pub const MAX_TEXTURE_UNITS: usize = 16;

/// Desired binding of one vertex attribute.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum AttribBinding {
    /// Not needed by this draw; an enabled array is switched off.
    #[default]
    Unspecified,
    Constant([f32; 4]),
    Array { array: AttribArray, divisor: u32 },
}

/// Program handle plus the attributes it reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramBinding {
    /// 0 for fixed function.
    pub handle: u32,
    pub attributes: u32,
}

impl ProgramBinding {
    /// Fixed function reads the classic arrays only.
    pub const FIXED: Self = Self {
        handle: 0,
        attributes: (1 << Attribute::CameraPos as u32) - 1,
    };

    pub fn of(program: &Program) -> Self {
        Self {
            handle: program.handle,
            attributes: program.attributes,
        }
    }

    pub fn is_fixed(&self) -> bool {
        self.handle == 0
    }

    fn uses(&self, attribute: Attribute) -> bool {
        self.attributes & attribute.bit() != 0
    }
}

/// Everything one draw needs bound.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderState {
    pub program: ProgramBinding,
    pub bits: StateBits,
    pub cull: CullType,
    pub images: Vec<ImageId>,
    pub attribs: [AttribBinding; Attribute::COUNT],
}

impl RenderState {
    pub fn new(cull: CullType) -> Self {
        Self {
            program: ProgramBinding::FIXED,
            bits: StateBits::DEFAULT,
            cull,
            images: Vec::new(),
            attribs: [AttribBinding::Unspecified; Attribute::COUNT],
        }
    }

    pub fn set(&mut self, attribute: Attribute, binding: AttribBinding) {
        self.attribs[attribute as usize] = binding;
    }

    pub fn array(&mut self, attribute: Attribute, array: AttribArray) {
        self.set(attribute, AttribBinding::Array { array, divisor: 0 });
    }

    pub fn instanced(&mut self, attribute: Attribute, array: AttribArray) {
        self.set(attribute, AttribBinding::Array { array, divisor: 1 });
    }

    pub fn constant(&mut self, attribute: Attribute, value: [f32; 4]) {
        self.set(attribute, AttribBinding::Constant(value));
    }

    pub fn binding(&self, attribute: Attribute) -> AttribBinding {
        self.attribs[attribute as usize]
    }
}

fn fatal<T>(result: Result<T, StateError>) -> T {
    result.unwrap_or_else(|e| panic!("{e}"))
}

#[derive(Debug)]
pub struct GpuState {
    program: Option<u32>,
    bits: Option<StateBits>,
    cull: Option<Option<wgpu::Face>>,
    textures: [Option<ImageId>; MAX_TEXTURE_UNITS],
    texturing: [Option<bool>; NUM_TEXTURE_BUNDLES],
    tex_env: [Option<MultitextureEnv>; MAX_TEXTURE_UNITS],
    buffers: [Option<u32>; 3],
    attribs: [AttribBinding; Attribute::COUNT],
    divisors: [u32; Attribute::COUNT],
    query: Option<u32>,
    mirrored: bool,
    polygon_offset: (f32, f32),
}

impl GpuState {
    pub fn new(config: &RendererConfig) -> Self {
        Self {
            program: None,
            bits: None,
            cull: None,
            textures: [None; MAX_TEXTURE_UNITS],
            texturing: [None; NUM_TEXTURE_BUNDLES],
            tex_env: [None; MAX_TEXTURE_UNITS],
            buffers: [None; 3],
            attribs: [AttribBinding::Unspecified; Attribute::COUNT],
            divisors: [0; Attribute::COUNT],
            query: None,
            mirrored: false,
            polygon_offset: (config.offset_factor, config.offset_units),
        }
    }

    /// Forget everything, e.g. after another client touched the device.
    pub fn invalidate(&mut self) {
        let offset = self.polygon_offset;
        let mirrored = self.mirrored;
        *self = Self {
            polygon_offset: offset,
            mirrored,
            ..Self::new(&RendererConfig::default())
        };
    }

    /// Start a view. Mirrored views flip the culled face.
    pub fn begin_view(&mut self, mirrored: bool) {
        if self.mirrored != mirrored {
            self.mirrored = mirrored;
            self.cull = None;
        }
    }

    pub fn state_bits(&self) -> Option<StateBits> {
        self.bits
    }

    pub fn use_program(&mut self, backend: &mut dyn GpuBackend, handle: u32) {
        if self.program == Some(handle) {
            return;
        }
        self.program = Some(handle);
        backend.apply(GpuCall::UseProgram(handle));
    }

    /// Apply `bits`, emitting one call per group that changed. Panics on
    /// bit patterns with no device equivalent.
    pub fn set_state(&mut self, backend: &mut dyn GpuBackend, bits: StateBits) {
        let changed = match self.bits {
            Some(old) if old == bits => return,
            Some(old) => StateBits(old.bits() ^ bits.bits()),
            None => StateBits(!0),
        };
        self.bits = Some(bits);

        if changed.intersects(StateBits::BLEND_BITS) {
            backend.apply(GpuCall::Blend(fatal(blend::blend_state(bits))));
        }
        if changed.intersects(StateBits::DEPTHFUNC_BITS) {
            backend.apply(GpuCall::DepthFunc(fatal(blend::depth_compare(bits))));
        }
        if changed.intersects(StateBits::DEPTHMASK_TRUE) {
            backend.apply(GpuCall::DepthWrite(bits.contains(StateBits::DEPTHMASK_TRUE)));
        }
        if changed.intersects(StateBits::COLORMASK_FALSE) {
            backend.apply(GpuCall::ColorWrite(!bits.contains(StateBits::COLORMASK_FALSE)));
        }
        if changed.intersects(StateBits::POLYGON_OFFSET) {
            let offset = bits
                .contains(StateBits::POLYGON_OFFSET)
                .then_some(self.polygon_offset);
            backend.apply(GpuCall::PolygonOffset(offset));
        }
        if changed.intersects(StateBits::POLYMODE_LINE) {
            backend.apply(GpuCall::PolygonMode(blend::polygon_mode(bits)));
        }
        if changed.intersects(StateBits::DEPTHTEST_DISABLE) {
            backend.apply(GpuCall::DepthTest(!bits.contains(StateBits::DEPTHTEST_DISABLE)));
        }
        if changed.intersects(StateBits::DEPTHRANGE_BITS) {
            let (near, far) = blend::depth_range(bits);
            backend.apply(GpuCall::DepthRange(near, far));
        }
        if changed.intersects(StateBits::ATEST_BITS) {
            backend.apply(GpuCall::AlphaTest(fatal(blend::alpha_test(bits))));
        }
    }

    pub fn set_cull(&mut self, backend: &mut dyn GpuBackend, cull: CullType) {
        let face = blend::cull_face(cull, self.mirrored);
        if self.cull == Some(face) {
            return;
        }
        self.cull = Some(face);
        backend.apply(GpuCall::Cull(face));
    }

    /// Bind `images` to units 0.. in order. Fixed-function draws also
    /// switch texturing on for the bound units and off for the rest.
    pub fn bind_images(&mut self, backend: &mut dyn GpuBackend, images: &[ImageId], fixed: bool) {
        for (unit, &image) in images.iter().enumerate().take(MAX_TEXTURE_UNITS) {
            if self.textures[unit] != Some(image) {
                self.textures[unit] = Some(image);
                backend.apply(GpuCall::BindTexture {
                    unit: unit as u32,
                    image,
                });
            }
        }
        if !fixed {
            return;
        }
        for unit in 0..NUM_TEXTURE_BUNDLES {
            let enabled = unit < images.len();
            if self.texturing[unit] != Some(enabled) {
                self.texturing[unit] = Some(enabled);
                backend.apply(GpuCall::EnableTexturing {
                    unit: unit as u32,
                    enabled,
                });
            }
        }
    }

    /// Texture environment of `unit`. `None` means the default, modulate.
    pub fn tex_env(&mut self, backend: &mut dyn GpuBackend, unit: u32, env: MultitextureEnv) {
        let env = match env {
            MultitextureEnv::None => MultitextureEnv::Modulate,
            other => other,
        };
        let Some(slot) = self.tex_env.get_mut(unit as usize) else {
            return;
        };
        if *slot == Some(env) {
            return;
        }
        *slot = Some(env);
        backend.apply(GpuCall::TexEnv { unit, env });
    }

    pub fn bind_buffer(&mut self, backend: &mut dyn GpuBackend, target: BufferTarget, handle: u32) {
        let slot = &mut self.buffers[target as usize];
        if *slot == Some(handle) {
            return;
        }
        *slot = Some(handle);
        backend.apply(GpuCall::BindBuffer { target, handle });
    }

    /// Bring every attribute to its desired binding. Attributes the
    /// program does not read count as unspecified.
    pub fn set_pointers(
        &mut self,
        backend: &mut dyn GpuBackend,
        program: ProgramBinding,
        attribs: &[AttribBinding; Attribute::COUNT],
    ) {
        for attribute in Attribute::ALL.into_iter().rev() {
            let i = attribute as usize;
            let wanted = if program.uses(attribute) {
                attribs[i]
            } else {
                AttribBinding::Unspecified
            };
            let current = self.attribs[i];
            let was_array = matches!(current, AttribBinding::Array { .. });

            match wanted {
                AttribBinding::Unspecified => {
                    if was_array {
                        backend.apply(GpuCall::DisableAttribute(attribute));
                    }
                    self.attribs[i] = AttribBinding::Unspecified;
                }
                AttribBinding::Constant(value) => {
                    if was_array {
                        backend.apply(GpuCall::DisableAttribute(attribute));
                    }
                    if current != wanted {
                        backend.apply(GpuCall::AttributeConstant { attribute, value });
                    }
                    self.attribs[i] = wanted;
                }
                AttribBinding::Array { array, divisor } => {
                    let old = match current {
                        AttribBinding::Array { array, .. } => Some(array),
                        _ => None,
                    };
                    if old.is_none() {
                        backend.apply(GpuCall::EnableAttribute(attribute));
                    }
                    if old != Some(array) {
                        let vbo = match array.source {
                            ArraySource::Buffer(handle) => handle,
                            _ => 0,
                        };
                        self.bind_buffer(backend, BufferTarget::Vertex, vbo);
                        backend.apply(GpuCall::AttributeArray { attribute, array });
                    }
                    if attribute.is_generic() && self.divisors[i] != divisor {
                        self.divisors[i] = divisor;
                        backend.apply(GpuCall::AttributeDivisor { attribute, divisor });
                    }
                    self.attribs[i] = wanted;
                }
            }
        }
    }

    /// Program, state bits, cull, textures, then attribute pointers.
    pub fn set_render_state(&mut self, backend: &mut dyn GpuBackend, state: &RenderState) {
        self.use_program(backend, state.program.handle);
        self.set_state(backend, state.bits);
        self.set_cull(backend, state.cull);
        self.bind_images(backend, &state.images, state.program.is_fixed());
        self.set_pointers(backend, state.program, &state.attribs);
    }

    /// Bind `state` and draw. Empty draws are skipped entirely.
    pub fn draw(
        &mut self,
        backend: &mut dyn GpuBackend,
        state: &RenderState,
        call: &DrawCall<'_>,
        memory: &ClientMemory<'_>,
    ) {
        if call.count == 0 || call.instances == 0 {
            return;
        }
        self.set_render_state(backend, state);
        let ibo = match call.indexes {
            crate::backend::IndexSource::Buffer { handle, .. } => handle,
            crate::backend::IndexSource::Client(_) => 0,
        };
        self.bind_buffer(backend, BufferTarget::Index, ibo);
        backend.draw(call, memory);
    }

    /// Start an occlusion query, closing one still running.
    pub fn begin_query(&mut self, backend: &mut dyn GpuBackend, query: u32) {
        if let Some(running) = self.query.take() {
            backend.apply(GpuCall::EndQuery(running));
        }
        self.query = Some(query);
        backend.apply(GpuCall::BeginQuery(query));
    }

    pub fn end_query(&mut self, backend: &mut dyn GpuBackend, query: u32) {
        if self.query == Some(query) {
            self.query = None;
            backend.apply(GpuCall::EndQuery(query));
        }
    }
}
