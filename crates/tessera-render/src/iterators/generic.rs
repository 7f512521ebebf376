//! The general stage loop: one draw per stage, colours and texture
//! coordinates generated on the CPU where a stage needs them.

use tessera_core::material::MultitextureEnv;
use tessera_core::{Attribute, Stage, StateBits};
use tessera_material::BuiltinImage;

use crate::calc;
use crate::state_cache::RenderState;
use crate::tess::{AttribArray, StaticBatch, VertexField};

use super::Pass;

pub(super) fn draw(pass: &mut Pass<'_>) {
    let query = pass.begin_query();
    // invisible last frame: detail stages are not worth drawing
    let skip_detail = query.is_some() && pass.material.query_result() == 0;

    let batches = std::mem::take(&mut pass.tess.static_batches);
    for batch in &batches {
        iterate_batch(pass, batch, skip_detail);
    }
    pass.tess.static_batches = batches;

    if pass.tess.num_indexes[1] > 0 {
        iterate_client(pass, skip_detail, |bits| bits);
    }
    pass.end_query(query);
}

/// Images of `stage`, bundle 0 first. Sets the texture environment of
/// the second unit when the stage is multitextured.
fn stage_images(pass: &mut Pass<'_>, stage: &Stage, state: &mut RenderState) {
    let fallback = pass.builtin(BuiltinImage::Default);
    let time = pass.tess.shader_time;
    let first = pass
        .tess
        .image_override
        .or_else(|| calc::animated_image(&stage.bundles[0], time, false))
        .unwrap_or(fallback);
    state.images.push(first);

    if stage.is_multitextured() {
        let env = if pass.config().lightmap_debug != 0 {
            MultitextureEnv::Replace
        } else {
            stage.bundles[1].multitexture_env
        };
        pass.gpu.tex_env(&mut *pass.backend, 1, env);
        let second = calc::animated_image(&stage.bundles[1], time, false).unwrap_or(fallback);
        state.images.push(second);
    }
}

/// Whether the lightmap-only debug view stops after this stage.
fn stops_debug_view(pass: &Pass<'_>, stage: &Stage) -> bool {
    pass.config().lightmap_debug != 0 && stage.bundles.iter().any(|b| b.is_lightmap)
}

/// Stage loop over indexes resident in static buffers. Only stages whose
/// attributes come straight from the buffer can be drawn this way.
fn iterate_batch(pass: &mut Pass<'_>, batch: &StaticBatch, skip_detail: bool) {
    let material = pass.material;
    let input = pass.calc();
    let (vbo, base) = (batch.vbo, batch.vbo_offset);

    for stage in &material.stages {
        if skip_detail && stage.is_detail {
            continue;
        }
        let colors = calc::passthrough_colors(stage, &input);
        let tc0 = calc::passthrough_texcoords(&stage.bundles[0]);
        let tc1 = match stage.is_multitextured() {
            true => calc::passthrough_texcoords(&stage.bundles[1]).map(Some),
            false => Some(None),
        };
        let (Some(colors), Some(tc0), Some(tc1)) = (colors, tc0, tc1) else {
            log::trace!("{}: stage needs generated arrays, skipped for static batch", material.name);
            continue;
        };

        let mut state = RenderState::new(material.cull);
        state.bits = stage.state;
        state.array(Attribute::Vertex, AttribArray::buffer(vbo, base, VertexField::Position));
        let bindings = [
            (Attribute::Color, Some(colors)),
            (Attribute::TexCoord, Some(tc0)),
            (Attribute::TexCoord2, tc1),
        ];
        for (attribute, generated) in bindings {
            if let Some(binding) = generated.and_then(|g| g.buffer_binding(vbo, base)) {
                state.set(attribute, binding);
            }
        }
        stage_images(pass, stage, &mut state);
        pass.draw_batch(&state, batch, 1);

        if stops_debug_view(pass, stage) {
            break;
        }
    }
}

/// Stage loop over the client tessellation buffer. `adjust` rewrites the
/// state bits of every stage.
pub(super) fn iterate_client(pass: &mut Pass<'_>, skip_detail: bool, adjust: fn(StateBits) -> StateBits) {
    let material = pass.material;
    let input = pass.calc();

    for stage in &material.stages {
        if skip_detail && stage.is_detail {
            continue;
        }
        let vertices = &pass.tess.vertices;
        let colors = calc::compute_colors(stage, &input, vertices, pass.scratch);
        let tc0 = calc::compute_texcoords(&stage.bundles[0], &input, vertices, pass.scratch);
        let tc1 = stage
            .is_multitextured()
            .then(|| calc::compute_texcoords(&stage.bundles[1], &input, vertices, pass.scratch));

        let mut state = RenderState::new(material.cull);
        state.bits = adjust(stage.state);
        state.array(Attribute::Vertex, AttribArray::vertex(VertexField::Position));
        state.set(Attribute::Color, colors.binding());
        state.set(Attribute::TexCoord, tc0.binding());
        if let Some(tc1) = &tc1 {
            state.set(Attribute::TexCoord2, tc1.binding());
        }
        stage_images(pass, stage, &mut state);
        pass.draw_tess(&state, 1);

        // scratch is a stack: release in reverse
        if let Some(tc1) = tc1 {
            tc1.release(pass.scratch);
        }
        tc0.release(pass.scratch);
        colors.release(pass.scratch);

        if stops_debug_view(pass, stage) {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use tessera_core::RendererConfig;

    use super::super::testing::{fixed_caps, Fixture};
    use crate::backend::{BufferTarget, GpuCall, Recorded};
    use crate::tess::ArraySource;

    use super::*;

    const SCRIPT: &str = "\
textures/test/twopass
{
    {
        map $whiteimage
        rgbGen vertex
    }
    {
        map textures/test/base
        rgbGen identity
        blendFunc add
        tcMod scroll 1 0
    }
}

textures/test/lit
{
    {
        map textures/test/base
        rgbGen identity
    }
    {
        map $lightmap
        rgbGen identity
        blendFunc filter
    }
}

textures/test/plain
{
    {
        map $whiteimage
        rgbGen identity
    }
    {
        map textures/test/detail
        blendFunc GL_DST_COLOR GL_SRC_COLOR
        tcMod scale 2 2
    }
}

textures/test/detailed
{
    {
        map textures/test/base
    }
    {
        map textures/test/detail
        blendFunc GL_DST_COLOR GL_SRC_COLOR
        detail
    }
}
";

    fn scratch_arrays(fx: &Fixture, attribute: Attribute) -> usize {
        fx.backend.count(|c| {
            matches!(c, GpuCall::AttributeArray { attribute: a, array }
                if *a == attribute && array.source == ArraySource::Scratch)
        })
    }

    #[test]
    fn test_one_draw_per_stage() {
        let mut fx = Fixture::new(SCRIPT, fixed_caps(), RendererConfig::default());
        let m = fx.register("textures/test/twopass");
        fx.quad(m, 0);
        fx.run(m);

        assert_eq!(fx.backend.num_draws(), 2);
        // scaled vertex colours in the first stage, scrolled texcoords in the second
        assert_eq!(scratch_arrays(&fx, Attribute::Color), 1);
        assert_eq!(scratch_arrays(&fx, Attribute::TexCoord), 1);
        let Some(Recorded::Draw { indexes, .. }) = fx.backend.draws().next() else {
            panic!("no draw recorded");
        };
        assert_eq!(indexes, &vec![0, 1, 2, 0, 2, 3]);
    }

    #[test]
    fn test_multitexture_stage_binds_two_units() {
        let config = RendererConfig {
            ignore_fast_path: true,
            ..Default::default()
        };
        let mut fx = Fixture::new(SCRIPT, fixed_caps(), config);
        let m = fx.register("textures/test/lit");
        assert!(fx.registry.material(m).stages[0].is_multitextured());
        fx.quad(m, 0);
        fx.run(m);

        assert_eq!(fx.backend.num_draws(), 1);
        assert_eq!(
            fx.backend.count(|c| *c
                == GpuCall::TexEnv {
                    unit: 1,
                    env: MultitextureEnv::Modulate
                }),
            1
        );
        assert_eq!(fx.backend.count(|c| matches!(c, GpuCall::BindTexture { .. })), 2);
        assert_eq!(
            fx.backend.count(|c| *c
                == GpuCall::AttributeArray {
                    attribute: Attribute::TexCoord2,
                    array: AttribArray::vertex(VertexField::Tc2),
                }),
            1
        );
    }

    #[test]
    fn test_lightmap_debug_replaces_environment() {
        let config = RendererConfig {
            ignore_fast_path: true,
            lightmap_debug: 1,
            ..Default::default()
        };
        let mut fx = Fixture::new(SCRIPT, fixed_caps(), config);
        let m = fx.register("textures/test/lit");
        fx.quad(m, 0);
        fx.run(m);
        assert_eq!(
            fx.backend.count(|c| *c
                == GpuCall::TexEnv {
                    unit: 1,
                    env: MultitextureEnv::Replace
                }),
            1
        );
    }

    #[test]
    fn test_static_batch_draws_from_buffers() {
        let mut fx = Fixture::new(SCRIPT, fixed_caps(), RendererConfig::default());
        let m = fx.register("textures/test/plain");
        fx.tess.begin(m, 0.0);
        fx.tess.add_static_batch(StaticBatch {
            vbo: 7,
            vbo_offset: 480,
            ibo: 9,
            ibo_offset: 24,
            count: 6,
            min_index: 10,
            max_index: 13,
        });
        fx.tess.merge_ranges();
        fx.run(m);

        // the scaled second stage cannot read the buffer directly
        assert_eq!(fx.backend.num_draws(), 1);
        assert_eq!(
            fx.backend.count(|c| *c
                == GpuCall::BindBuffer {
                    target: BufferTarget::Index,
                    handle: 9
                }),
            1
        );
        assert_eq!(
            fx.backend.count(|c| *c
                == GpuCall::AttributeArray {
                    attribute: Attribute::Vertex,
                    array: AttribArray::buffer(7, 480, VertexField::Position),
                }),
            1
        );
        assert_eq!(fx.tess.static_batches.len(), 1);
    }

    #[test]
    fn test_invisible_surface_skips_detail_stages() {
        let mut fx = Fixture::new(SCRIPT, fixed_caps(), RendererConfig::default());
        let m = fx.register("textures/test/detailed");
        let query = m as u32 + 1;

        fx.backend.query_results.insert(query, 0);
        fx.quad(m, 0);
        fx.run(m);
        assert_eq!(fx.backend.num_draws(), 1);
        assert_eq!(fx.backend.count(|c| *c == GpuCall::BeginQuery(query)), 1);
        assert_eq!(fx.backend.count(|c| *c == GpuCall::EndQuery(query)), 1);

        fx.backend.clear();
        fx.backend.query_results.insert(query, 50);
        fx.quad(m, 0);
        fx.run(m);
        assert_eq!(fx.backend.num_draws(), 2);
        assert_eq!(fx.registry.material(m).query_result(), 50);
    }

    #[test]
    fn test_queries_only_for_world_entity() {
        let mut fx = Fixture::new(SCRIPT, fixed_caps(), RendererConfig::default());
        let m = fx.register("textures/test/detailed");
        fx.frame.entity.is_world = false;
        fx.quad(m, 0);
        fx.run(m);
        assert_eq!(fx.backend.count(|c| matches!(c, GpuCall::BeginQuery(_))), 0);
        // no query, no reason to skip
        assert_eq!(fx.backend.num_draws(), 2);
    }
}
