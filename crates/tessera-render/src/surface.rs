//! Per-surface submission: collect geometry for one material into the
//! tessellation buffer and flush it through the material's iterator plus
//! the overlay passes.

use log::warn;
use tessera_core::material::{sort, surface, FogPass, IteratorKind};
use tessera_core::{Material, MaterialHandle, RendererConfig};
use tessera_material::defaults::Internal;
use tessera_material::{ImageProvider, Registry};

use crate::backend::GpuBackend;
use crate::calc::{self, WaveTables};
use crate::dlight;
use crate::frame::Frame;
use crate::iterators::{self, Pass, WorldBuffers};
use crate::overlay;
use crate::scratch::Scratch;
use crate::state_cache::GpuState;
use crate::tess::{Tess, Vertex};

/// Collaborators borrowed for one view.
pub struct FrameContext<'a> {
    pub registry: &'a Registry,
    pub images: &'a dyn ImageProvider,
    pub frame: &'a Frame,
    pub backend: &'a mut dyn GpuBackend,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceStats {
    /// Flushes that reached an iterator.
    pub surfaces: u32,
    pub vertices: usize,
    pub indexes: usize,
    pub dlight_passes: u32,
    pub fog_passes: u32,
    /// Flushes forced by a full tessellation buffer.
    pub overflows: u32,
}

pub struct SurfaceDriver {
    pub tess: Tess,
    pub gpu: GpuState,
    pub scratch: Scratch,
    pub tables: WaveTables,
    pub world: WorldBuffers,
    pub stats: SurfaceStats,
}

fn is_marker(kind: IteratorKind) -> bool {
    matches!(
        kind,
        IteratorKind::Shadow
            | IteratorKind::PreparePortal
            | IteratorKind::FinalisePortal
            | IteratorKind::CopyDepth
            | IteratorKind::BuildVbo
            | IteratorKind::BuildIbo
    )
}

fn receives_dlights(material: &Material) -> bool {
    material.sort <= sort::OPAQUE && material.surface_flags & (surface::NODLIGHT | surface::SKY) == 0
}

impl SurfaceDriver {
    pub fn new(config: &RendererConfig) -> Self {
        Self {
            tess: Tess::new(),
            gpu: GpuState::new(config),
            scratch: Scratch::new(config.scratch_bytes()),
            tables: WaveTables::new(),
            world: WorldBuffers::default(),
            stats: SurfaceStats::default(),
        }
    }

    fn pass<'s>(&'s mut self, ctx: &'s mut FrameContext<'_>, material: &'s Material) -> Pass<'s> {
        Pass {
            tess: &mut self.tess,
            material,
            registry: ctx.registry,
            gpu: &mut self.gpu,
            scratch: &mut self.scratch,
            backend: &mut *ctx.backend,
            frame: ctx.frame,
            images: ctx.images,
            tables: &self.tables,
            world: &mut self.world,
        }
    }

    /// Reset per-view state and upload this view's dynamic lights.
    pub fn begin_view(&mut self, ctx: &mut FrameContext<'_>) {
        self.gpu.begin_view(ctx.frame.mirrored);
        if ctx.frame.portal_level == 0 {
            ctx.registry.reset_queries();
        }
        if let Some(buffer) = ctx.registry.programs().dlight_buffer() {
            dlight::prepare(&ctx.frame.dlights, ctx.registry.config(), buffer, &mut *ctx.backend);
        }
    }

    /// Start collecting surfaces of `handle` in fog volume `fog`. Returns
    /// the index of the material actually drawn.
    pub fn begin_surface(&mut self, registry: &Registry, handle: MaterialHandle, fog: usize, frame: &Frame) -> usize {
        let material = registry.resolve(handle);
        let mut time = frame.time - material.time_offset;
        if material.clamp_time > 0.0 && time >= material.clamp_time {
            time = material.clamp_time;
        }
        self.tess.begin(material.index, time);
        self.tess.fog = fog;
        material.index
    }

    /// Append a surface, flushing first when the buffer is full. Returns
    /// false when the surface can never fit or no surface is open.
    pub fn add_surface(
        &mut self,
        ctx: &mut FrameContext<'_>,
        range: usize,
        vertices: &[Vertex],
        indexes: &[u32],
    ) -> bool {
        let Some(material) = self.tess.material else {
            return false;
        };
        if !self.tess.fits(vertices.len(), indexes.len()) {
            if self.tess.vertices.is_empty() {
                warn!(
                    "surface of {} vertexes and {} indexes exceeds the tessellation buffer",
                    vertices.len(),
                    indexes.len()
                );
                return false;
            }
            let (fog, dlight_bits, time) = (self.tess.fog, self.tess.dlight_bits, self.tess.shader_time);
            self.end_surface(ctx);
            self.stats.overflows += 1;
            self.tess.begin(material, time);
            self.tess.fog = fog;
            self.tess.dlight_bits = dlight_bits;
        }
        self.tess.add_surface(range, vertices, indexes)
    }

    /// Draw everything collected since `begin_surface`.
    pub fn end_surface(&mut self, ctx: &mut FrameContext<'_>) {
        let Some(index) = self.tess.material else {
            return;
        };
        let registry = ctx.registry;
        let material = registry.material(index);
        self.tess.merge_ranges();

        let empty = self.tess.num_indexes[1] == 0 && self.tess.static_batches.is_empty();
        if empty && !is_marker(material.iterator) && self.tess.num_indexes[2] == 0 {
            self.finish_surface();
            return;
        }
        let vertices = self.tess.num_vertices();
        let indexes = self.tess.num_indexes[1];
        let lit = self.tess.num_indexes[2] > 0;
        let dlit = lit && self.tess.dlight_bits != 0 && receives_dlights(material);
        let fogged = lit && ctx.frame.fog(self.tess.fog).is_some() && material.fog_pass != FogPass::None;

        {
            let mut pass = self.pass(ctx, material);
            if material.iterator == IteratorKind::Shadow {
                iterators::run(&mut pass);
            } else {
                if !empty || is_marker(material.iterator) {
                    if material.iterator != IteratorKind::UnifiedProgram && !material.deforms.is_empty() {
                        let input = pass.calc();
                        let tess = &mut *pass.tess;
                        calc::deform(&material.deforms, &input, &mut tess.vertices, &tess.indexes);
                    }
                    iterators::run(&mut pass);
                }
                if dlit {
                    overlay::dlights(&mut pass);
                }
                if fogged {
                    overlay::fog(&mut pass);
                }
            }
        }

        self.stats.surfaces += 1;
        self.stats.vertices += vertices;
        self.stats.indexes += indexes;
        if dlit && material.iterator != IteratorKind::Shadow {
            self.stats.dlight_passes += 1;
        }
        if fogged && material.iterator != IteratorKind::Shadow {
            self.stats.fog_passes += 1;
        }
        self.finish_surface();
    }

    fn finish_surface(&mut self) {
        debug_assert_eq!(self.scratch.free(), self.scratch.capacity(), "scratch leaked by a surface");
        self.tess.discard();
        self.tess.material = None;
    }

    /// Darken the stencil-marked shadowed areas once all volumes of the
    /// view are drawn.
    pub fn shadow_finish(&mut self, ctx: &mut FrameContext<'_>) {
        let registry = ctx.registry;
        let index = registry.internal_index(Internal::Shadow);
        self.tess.begin(index, ctx.frame.time);
        {
            let mut pass = self.pass(ctx, registry.material(index));
            iterators::shadow_finish(&mut pass);
        }
        self.finish_surface();
    }
}
