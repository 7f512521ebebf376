//! Single-pass shortcuts for the two most common world materials.

use tessera_core::material::MultitextureEnv;
use tessera_core::{Attribute, StateBits};
use tessera_material::BuiltinImage;

use crate::calc;
use crate::state_cache::RenderState;
use crate::tess::{AttribArray, VertexField};

use super::Pass;

/// Diffuse-lit texture: colours lit per vertex, one texture.
pub(super) fn vertex_lit(pass: &mut Pass<'_>) {
    let material = pass.material;
    let Some(stage) = material.stages.first() else {
        return;
    };
    let query = pass.begin_query();

    let mut state = RenderState::new(material.cull);
    state.bits = stage.state;
    let image = pass
        .tess
        .image_override
        .or_else(|| calc::animated_image(&stage.bundles[0], pass.tess.shader_time, false))
        .unwrap_or_else(|| pass.builtin(BuiltinImage::Default));
    state.images.push(image);

    let batches = std::mem::take(&mut pass.tess.static_batches);
    for batch in &batches {
        let (vbo, base) = (batch.vbo, batch.vbo_offset);
        state.array(Attribute::Color, AttribArray::buffer(vbo, base, VertexField::Color));
        state.array(Attribute::TexCoord, AttribArray::buffer(vbo, base, VertexField::Tc1));
        state.array(Attribute::Vertex, AttribArray::buffer(vbo, base, VertexField::Position));
        pass.draw_batch(&state, batch, 1);
    }
    pass.tess.static_batches = batches;

    if pass.tess.num_indexes[1] > 0 {
        let input = pass.calc();
        let colors = calc::compute_colors(stage, &input, &pass.tess.vertices, pass.scratch);
        state.set(Attribute::Color, colors.binding());
        state.array(Attribute::TexCoord, AttribArray::vertex(VertexField::Tc1));
        state.array(Attribute::Vertex, AttribArray::vertex(VertexField::Position));
        pass.draw_tess(&state, 1);
        colors.release(pass.scratch);
    }
    pass.end_query(query);
}

/// Texture modulated by its lightmap in one two-unit pass.
pub(super) fn lightmap_multitexture(pass: &mut Pass<'_>) {
    let material = pass.material;
    let Some(stage) = material.stages.first() else {
        return;
    };

    let mut state = RenderState::new(material.cull);
    state.bits = StateBits::DEFAULT;
    state.constant(Attribute::Color, [1.0; 4]);
    let fallback = pass.builtin(BuiltinImage::Default);
    let time = pass.tess.shader_time;
    let base = pass
        .tess
        .image_override
        .or_else(|| calc::animated_image(&stage.bundles[0], time, false))
        .unwrap_or(fallback);
    let lightmap = calc::animated_image(&stage.bundles[1], time, false).unwrap_or(fallback);
    state.images = vec![base, lightmap];

    let env = if pass.config().lightmap_debug != 0 {
        MultitextureEnv::Replace
    } else {
        MultitextureEnv::Modulate
    };
    pass.gpu.tex_env(&mut *pass.backend, 1, env);
    let query = pass.begin_query();

    let batches = std::mem::take(&mut pass.tess.static_batches);
    for batch in &batches {
        let (vbo, offset) = (batch.vbo, batch.vbo_offset);
        state.array(Attribute::Vertex, AttribArray::buffer(vbo, offset, VertexField::Position));
        state.array(Attribute::TexCoord, AttribArray::buffer(vbo, offset, VertexField::Tc1));
        state.array(Attribute::TexCoord2, AttribArray::buffer(vbo, offset, VertexField::Tc2));
        pass.draw_batch(&state, batch, 1);
    }
    pass.tess.static_batches = batches;

    if pass.tess.num_indexes[1] > 0 {
        state.array(Attribute::Vertex, AttribArray::vertex(VertexField::Position));
        state.array(Attribute::TexCoord, AttribArray::vertex(VertexField::Tc1));
        state.array(Attribute::TexCoord2, AttribArray::vertex(VertexField::Tc2));
        pass.draw_tess(&state, 1);
    }
    pass.end_query(query);
}
