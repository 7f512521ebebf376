//! Stencil shadow volumes: extrude the silhouette of a model away from
//! its light and count volume crossings in the low stencil bits.

use glam::Vec3;
use tessera_core::{Attribute, CullType, StateBits};
use tessera_material::BuiltinImage;
use wgpu::{CompareFunction, Face, StencilOperation};

use crate::backend::GpuCall;
use crate::state_cache::{ProgramBinding, RenderState};
use crate::tess::{AttribArray, Vertex, VertexField};

use super::{portal, Pass};

/// Edges remembered per vertex; further edges are dropped.
const MAX_EDGE_DEFS: usize = 32;

/// How far silhouette edges are extruded.
const EXTRUSION: f32 = 512.0;

#[derive(Debug, Clone, Copy)]
struct EdgeDef {
    to: u32,
    facing: bool,
}

/// Outgoing edges of every vertex with the facing of their triangle.
fn edge_defs(vertices: &[Vertex], indexes: &[u32], light_dir: Vec3) -> Vec<Vec<EdgeDef>> {
    let mut edges: Vec<Vec<EdgeDef>> = vec![Vec::new(); vertices.len()];
    let mut add = |from: u32, to: u32, facing: bool| {
        let list = &mut edges[from as usize];
        if list.len() < MAX_EDGE_DEFS {
            list.push(EdgeDef { to, facing });
        }
    };
    for tri in indexes.chunks_exact(3) {
        let [a, b, c] = [tri[0], tri[1], tri[2]];
        let p = |i: u32| Vec3::from(vertices[i as usize].xyz);
        let normal = (p(b) - p(a)).cross(p(c) - p(a));
        let facing = normal.dot(light_dir) > 0.0;
        add(a, b, facing);
        add(b, c, facing);
        add(c, a, facing);
    }
    edges
}

/// Quads joining each silhouette edge to its extruded copy. An edge of a
/// lit triangle is on the silhouette unless a lit triangle shares it in
/// reverse.
fn silhouette(edges: &[Vec<EdgeDef>], extruded: u32) -> Vec<u32> {
    let mut out = Vec::new();
    for (i, list) in edges.iter().enumerate() {
        let i = i as u32;
        for edge in list.iter().filter(|e| e.facing) {
            let j = edge.to;
            let shared = edges[j as usize].iter().any(|back| back.to == i && back.facing);
            if !shared {
                out.extend_from_slice(&[i, i + extruded, j, j, i + extruded, j + extruded]);
            }
        }
    }
    out
}

fn stencil_op(pass: &mut Pass<'_>, face: Option<Face>, op: StencilOperation) {
    pass.backend.apply(GpuCall::StencilOp {
        face,
        fail: StencilOperation::Keep,
        depth_fail: StencilOperation::Keep,
        pass: op,
    });
}

pub(super) fn tess_end(pass: &mut Pass<'_>) {
    if pass.caps().shadow_bits == 0 {
        return;
    }
    let frame = pass.frame;
    let entity = &frame.entity;
    let light_dir = entity.light_dir;
    let count = pass.tess.vertices.len();

    let edges = edge_defs(&pass.tess.vertices, pass.tess.drawn_indexes(), light_dir);
    let indexes = silhouette(&edges, count as u32);
    let extruded: Vec<Vertex> = pass.tess.vertices[..count]
        .iter()
        .map(|v| Vertex {
            xyz: (Vec3::from(v.xyz) - light_dir * EXTRUSION).to_array(),
            ..*v
        })
        .collect();
    pass.tess.vertices.extend(extruded);

    let mut state = RenderState::new(CullType::TwoSided);
    state.bits = StateBits::COLORMASK_FALSE;
    state.images.push(pass.builtin(BuiltinImage::White));
    state.program = pass
        .material
        .program
        .as_deref()
        .map_or(ProgramBinding::FIXED, ProgramBinding::of);
    state.constant(Attribute::Color, [1.0, 0.2, 1.0, 1.0]);
    let instance = entity.instance(pass.tess.shader_time);
    state.constant(Attribute::TransX, instance.trans_x);
    state.constant(Attribute::TransY, instance.trans_y);
    state.constant(Attribute::TransZ, instance.trans_z);
    state.array(Attribute::Vertex, AttribArray::vertex(VertexField::Position));

    let mask = pass.shadow_mask();
    if frame.portal_level == 0 {
        pass.backend.apply(GpuCall::StencilTest(true));
        pass.backend.apply(GpuCall::StencilFunc {
            compare: CompareFunction::Always,
            reference: 1,
            mask,
        });
    }
    pass.backend.apply(GpuCall::StencilMask(mask));

    let max_index = (2 * count).saturating_sub(1) as u32;
    if pass.caps().separate_stencil {
        // only != 0 is tested later, so the direction of counting is free
        stencil_op(pass, Some(Face::Back), StencilOperation::IncrementWrap);
        stencil_op(pass, Some(Face::Front), StencilOperation::DecrementWrap);
        pass.draw_list(&state, &indexes, 0, max_index);
    } else {
        state.cull = CullType::Back;
        stencil_op(pass, None, StencilOperation::IncrementClamp);
        pass.draw_list(&state, &indexes, 0, max_index);
        state.cull = CullType::Front;
        stencil_op(pass, None, StencilOperation::DecrementClamp);
        pass.draw_list(&state, &indexes, 0, max_index);
    }
    stencil_op(pass, None, StencilOperation::Keep);

    pass.tess.vertices.truncate(count);
}

/// Darken everything inside a shadow volume. Runs once after all shadow
/// volumes of the view are drawn, so overlapping volumes darken once.
pub fn finish(pass: &mut Pass<'_>) {
    if pass.config().shadows != 2 || pass.caps().shadow_bits == 0 {
        return;
    }
    let mask = pass.shadow_mask();
    pass.backend.apply(GpuCall::StencilTest(true));
    pass.backend.apply(GpuCall::StencilFunc {
        compare: CompareFunction::NotEqual,
        reference: 0,
        mask,
    });
    pass.backend.apply(GpuCall::StencilMask(mask));
    pass.backend.apply(GpuCall::StencilOp {
        face: None,
        fail: StencilOperation::Zero,
        depth_fail: StencilOperation::Zero,
        pass: StencilOperation::Zero,
    });

    let mut state = RenderState::new(CullType::TwoSided);
    state.bits = StateBits::DEPTHMASK_TRUE | StateBits::SRCBLEND_DST_COLOR | StateBits::DSTBLEND_ZERO;
    state.images.push(pass.builtin(BuiltinImage::White));
    state.constant(Attribute::Color, [0.6, 0.6, 0.6, 1.0]);
    state.array(Attribute::Vertex, AttribArray::vertex(VertexField::Position));

    let base = pass.tess.vertices.len();
    let corner = |x: f32, y: f32| Vertex {
        xyz: [x, y, -10.0],
        ..Default::default()
    };
    pass.tess.vertices.extend([
        corner(-100.0, 100.0),
        corner(100.0, 100.0),
        corner(100.0, -100.0),
        corner(-100.0, -100.0),
    ]);
    let b = base as u32;
    let quad = [b, b + 1, b + 2, b, b + 2, b + 3];
    pass.draw_list(&state, &quad, b, b + 3);
    pass.tess.vertices.truncate(base);

    let level = pass.frame.portal_level;
    if level == 0 {
        pass.backend.apply(GpuCall::StencilTest(false));
    } else {
        let reference = portal::gray(level) << pass.caps().shadow_bits;
        let portal_mask = pass.portal_mask();
        pass.backend.apply(GpuCall::StencilFunc {
            compare: CompareFunction::Equal,
            reference,
            mask: portal_mask,
        });
        stencil_op(pass, None, StencilOperation::Keep);
    }
}
