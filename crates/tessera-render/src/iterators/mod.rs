//! Stage iterators: the drawing strategies a material can be rendered
//! with, selected by its [`IteratorKind`].
//!
//! Every iterator works on a [`Pass`], the filled tessellation buffer plus
//! everything needed to turn it into backend calls. Draws go through the
//! state cache so repeated state is never re-emitted.

mod fastpath;
mod generic;
mod portal;
mod program;
mod shadow;
mod sky;

use tessera_core::material::IteratorKind;
use tessera_core::{Attribute, Capabilities, ImageId, Material, RendererConfig};
use tessera_material::{BuiltinImage, ImageProvider, Registry};

use crate::backend::{ClientMemory, DrawCall, GpuBackend, IndexSource};
use crate::calc::{CalcInput, WaveTables};
use crate::frame::Frame;
use crate::scratch::{Scratch, ScratchBlock};
use crate::state_cache::{GpuState, RenderState};
use crate::tess::{AttribArray, StaticBatch, Tess, VertexField};

pub use shadow::finish as shadow_finish;

/// Static world buffers filled by the `BuildVbo` and `BuildIbo` markers.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorldBuffers {
    pub vbo: Option<u32>,
    pub ibo: Option<u32>,
}

/// One end-of-surface flush.
pub struct Pass<'a> {
    pub tess: &'a mut Tess,
    pub material: &'a Material,
    pub registry: &'a Registry,
    pub gpu: &'a mut GpuState,
    pub scratch: &'a mut Scratch,
    pub backend: &'a mut dyn GpuBackend,
    pub frame: &'a Frame,
    pub images: &'a dyn ImageProvider,
    pub tables: &'a WaveTables,
    pub world: &'a mut WorldBuffers,
}

impl<'a> Pass<'a> {
    pub fn config(&self) -> &'a RendererConfig {
        self.registry.config()
    }

    pub fn caps(&self) -> &'a Capabilities {
        self.registry.caps()
    }

    pub fn calc(&self) -> CalcInput<'a> {
        let frame = self.frame;
        CalcInput {
            tables: self.tables,
            frame,
            config: self.registry.config(),
            portal_range: self.material.portal_range,
            time: self.tess.shader_time,
            fog: frame.fog(self.tess.fog).map(|fog| (fog, frame.fog_vectors(fog))),
        }
    }

    /// Stencil bits holding the portal level, above the shadow bits.
    pub fn portal_mask(&self) -> u32 {
        let caps = self.caps();
        caps.portal_mask << caps.shadow_bits
    }

    /// Stencil bits counting shadow volume crossings.
    pub fn shadow_mask(&self) -> u32 {
        (1u32 << self.caps().shadow_bits.min(8)) - 1
    }

    pub fn builtin(&self, image: BuiltinImage) -> ImageId {
        self.images.builtin(image)
    }

    /// Draw the merged drawn range of the tessellation buffer.
    pub fn draw_tess(&mut self, state: &RenderState, instances: u32) {
        let Pass {
            tess,
            gpu,
            scratch,
            backend,
            ..
        } = self;
        let call = DrawCall {
            indexes: IndexSource::Client(tess.drawn_indexes()),
            count: tess.num_indexes[1],
            min_index: tess.min_index[1],
            max_index: tess.max_index[1],
            instances,
        };
        let memory = ClientMemory {
            vertices: &tess.vertices,
            instances: &tess.instances,
            scratch: scratch.bytes(),
        };
        gpu.draw(&mut **backend, state, &call, &memory);
    }

    /// Draw the merged overlay range of the tessellation buffer.
    pub fn draw_lit(&mut self, state: &RenderState) {
        let Pass {
            tess,
            gpu,
            scratch,
            backend,
            ..
        } = self;
        let call = DrawCall {
            indexes: IndexSource::Client(tess.lit_indexes()),
            count: tess.num_indexes[2],
            min_index: tess.min_index[2],
            max_index: tess.max_index[2],
            instances: 1,
        };
        let memory = ClientMemory {
            vertices: &tess.vertices,
            instances: &tess.instances,
            scratch: scratch.bytes(),
        };
        gpu.draw(&mut **backend, state, &call, &memory);
    }

    /// Draw indexes resident in a static index buffer.
    pub fn draw_batch(&mut self, state: &RenderState, batch: &StaticBatch, instances: u32) {
        let call = DrawCall {
            indexes: IndexSource::Buffer {
                handle: batch.ibo,
                offset: batch.ibo_offset,
            },
            count: batch.count,
            min_index: batch.min_index,
            max_index: batch.max_index,
            instances,
        };
        self.submit(state, &call);
    }

    /// Draw an index list built outside the tessellation buffer.
    pub fn draw_list(&mut self, state: &RenderState, indexes: &[u32], min_index: u32, max_index: u32) {
        let call = DrawCall {
            indexes: IndexSource::Client(indexes),
            count: indexes.len(),
            min_index,
            max_index,
            instances: 1,
        };
        self.submit(state, &call);
    }

    /// Draw an index list held in scratch.
    pub fn draw_scratch(&mut self, state: &RenderState, block: &ScratchBlock, count: usize, max_index: u32) {
        let Pass {
            tess,
            gpu,
            scratch,
            backend,
            ..
        } = self;
        let indexes = scratch.slice::<u32>(block);
        let call = DrawCall {
            indexes: IndexSource::Client(&indexes[..count]),
            count,
            min_index: 0,
            max_index,
            instances: 1,
        };
        let memory = ClientMemory {
            vertices: &tess.vertices,
            instances: &tess.instances,
            scratch: scratch.bytes(),
        };
        gpu.draw(&mut **backend, state, &call, &memory);
    }

    /// Draw every static batch and the client range with only positions
    /// bound from their respective sources.
    pub fn draw_positions(&mut self, state: &mut RenderState) {
        let batches = std::mem::take(&mut self.tess.static_batches);
        for batch in &batches {
            state.array(
                Attribute::Vertex,
                AttribArray::buffer(batch.vbo, batch.vbo_offset, VertexField::Position),
            );
            self.draw_batch(state, batch, 1);
        }
        self.tess.static_batches = batches;
        if self.tess.num_indexes[1] > 0 {
            state.array(Attribute::Vertex, AttribArray::vertex(VertexField::Position));
            self.draw_tess(state, 1);
        }
    }

    fn submit(&mut self, state: &RenderState, call: &DrawCall<'_>) {
        let memory = ClientMemory {
            vertices: &self.tess.vertices,
            instances: &self.tess.instances,
            scratch: self.scratch.bytes(),
        };
        self.gpu.draw(&mut *self.backend, state, call, &memory);
    }

    /// Occlusion query id of this material, when one applies to this view.
    fn query_id(&self) -> Option<u32> {
        let applies = self.caps().occlusion_queries
            && self.frame.portal_level == 0
            && self.frame.entity.is_world
            && self.material.query.is_some();
        applies.then_some(self.material.index as u32 + 1)
    }

    /// Collect last frame's result and start a new query. Returns the
    /// query to close, if any.
    pub fn begin_query(&mut self) -> Option<u32> {
        let id = self.query_id()?;
        if let Some(samples) = self.backend.query_result(id) {
            self.registry.record_query(self.material.index, samples);
        }
        self.gpu.begin_query(&mut *self.backend, id);
        Some(id)
    }

    pub fn end_query(&mut self, query: Option<u32>) {
        if let Some(id) = query {
            self.gpu.end_query(&mut *self.backend, id);
        }
    }
}

/// Draw the tessellation buffer with the material's strategy.
pub fn run(pass: &mut Pass<'_>) {
    match pass.material.iterator {
        IteratorKind::Generic => generic::draw(pass),
        IteratorKind::VertexLit => fastpath::vertex_lit(pass),
        IteratorKind::LightmapMultitexture => fastpath::lightmap_multitexture(pass),
        IteratorKind::UnifiedProgram => program::draw(pass),
        IteratorKind::Sky => sky::draw(pass),
        IteratorKind::Shadow => shadow::tess_end(pass),
        IteratorKind::PreparePortal => portal::prepare(pass),
        IteratorKind::FinalisePortal => portal::finalise(pass),
        IteratorKind::CopyDepth => pass.backend.apply(crate::backend::GpuCall::CopyDepth),
        IteratorKind::BuildVbo => {
            let data = bytemuck::cast_slice(&pass.tess.vertices);
            let handle = pass.world.vbo.unwrap_or(0);
            pass.world.vbo = Some(pass.backend.upload(crate::backend::BufferTarget::Vertex, handle, data));
        }
        IteratorKind::BuildIbo => {
            let data = bytemuck::cast_slice(&pass.tess.indexes);
            let handle = pass.world.ibo.unwrap_or(0);
            pass.world.ibo = Some(pass.backend.upload(crate::backend::BufferTarget::Index, handle, data));
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::Fixture;
    use super::*;
    use crate::backend::{BufferTarget, GpuCall, Recorded};

    #[test]
    fn test_build_markers_upload_buffers() {
        let mut fx = Fixture::new("", Capabilities::default(), RendererConfig::default());
        let vbo = fx
            .registry
            .internal_index(tessera_material::defaults::Internal::BuildVbo);
        fx.quad(vbo, 0);
        fx.run(vbo);
        let Some(handle) = fx.world.vbo else {
            panic!("world vertex buffer not built");
        };
        assert_eq!(
            fx.backend.log[0],
            Recorded::Upload {
                target: BufferTarget::Vertex,
                handle,
                len: 192,
            }
        );

        let ibo = fx
            .registry
            .internal_index(tessera_material::defaults::Internal::BuildIbo);
        fx.quad(ibo, 0);
        fx.run(ibo);
        assert!(fx.world.ibo.is_some());
        assert_eq!(fx.backend.num_draws(), 0);
    }

    #[test]
    fn test_copy_depth_marker() {
        let config = RendererConfig {
            depth_pass: 1,
            ..Default::default()
        };
        let mut fx = Fixture::new("", Capabilities::default(), config);
        let copy = fx
            .registry
            .internal_index(tessera_material::defaults::Internal::CopyDepth);
        fx.quad(copy, 0);
        fx.run(copy);
        assert_eq!(fx.backend.count(|c| *c == GpuCall::CopyDepth), 1);
    }
}
