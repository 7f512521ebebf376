//! Unified program draws: every unfogged stage in one pass, with the
//! entity transform and lighting passed per instance.

use std::mem::size_of;

use tessera_core::{Attribute, ImageId, LightmapIndex, StateBits};
use tessera_material::BuiltinImage;

use crate::calc;
use crate::state_cache::{ProgramBinding, RenderState};
use crate::tess::{ArraySource, AttribArray, ComponentType, Instance, InstanceField, StaticBatch, VertexField};

use super::{generic, Pass};

/// Per-instance attributes and the instance fields feeding them.
const INSTANCE_ARRAYS: [(Attribute, InstanceField); 9] = [
    (Attribute::Times, InstanceField::Times),
    (Attribute::TransX, InstanceField::TransX),
    (Attribute::TransY, InstanceField::TransY),
    (Attribute::TransZ, InstanceField::TransZ),
    (Attribute::AmbientLight, InstanceField::AmbientLight),
    (Attribute::DirectedLight, InstanceField::DirectedLight),
    (Attribute::LightDir, InstanceField::LightDir),
    (Attribute::TexCoord2, InstanceField::TexCoord),
    (Attribute::Color2, InstanceField::Color),
];

fn bind_instance(state: &mut RenderState, inst: &Instance) {
    let [r, g, b] = inst.directed_light;
    state.constant(Attribute::Times, inst.times);
    state.constant(Attribute::TransX, inst.trans_x);
    state.constant(Attribute::TransY, inst.trans_y);
    state.constant(Attribute::TransZ, inst.trans_z);
    state.constant(Attribute::TexCoord2, inst.tex_coord);
    state.constant(Attribute::AmbientLight, inst.ambient_light);
    state.constant(Attribute::DirectedLight, [r, g, b, 0.0]);
    state.constant(Attribute::LightDir, inst.light_dir);
    state.constant(Attribute::Color2, inst.color.map(|c| c as f32 / 255.0));
}

/// Stage images as the program samples them: animations through the
/// combined atlas, the data texture last.
fn program_images(pass: &Pass<'_>) -> Vec<ImageId> {
    let material = pass.material;
    let fallback = pass.builtin(BuiltinImage::Default);
    let time = pass.tess.shader_time;
    let mut images: Vec<ImageId> = material
        .stages
        .iter()
        .take(material.num_unfogged_passes)
        .map(|s| calc::animated_image(&s.bundles[0], time, true).unwrap_or(fallback))
        .collect();
    if let (Some(first), Some(image)) = (images.first_mut(), pass.tess.image_override) {
        *first = image;
    }
    images.extend(pass.tess.data_texture);
    images
}

/// Geometry arrays of a static batch. Model batches hold bare positions.
fn bind_batch(state: &mut RenderState, batch: &StaticBatch, md3: bool) {
    let (vbo, base) = (batch.vbo, batch.vbo_offset);
    if md3 {
        state.array(
            Attribute::Vertex,
            AttribArray {
                source: ArraySource::Buffer(vbo),
                offset: base,
                components: 4,
                kind: ComponentType::F32,
                stride: size_of::<[f32; 4]>(),
            },
        );
        state.constant(Attribute::Normal, [0.0; 4]);
        state.constant(Attribute::TexCoord, [0.0; 4]);
        state.constant(Attribute::Color, [1.0; 4]);
    } else {
        state.array(Attribute::Vertex, AttribArray::buffer(vbo, base, VertexField::Position));
        state.array(Attribute::Normal, AttribArray::buffer(vbo, base, VertexField::Normal));
        state.array(Attribute::Color, AttribArray::buffer(vbo, base, VertexField::Color));
        state.array(Attribute::TexCoord, AttribArray::buffer(vbo, base, VertexField::TexCoords));
    }
}

pub(super) fn draw(pass: &mut Pass<'_>) {
    let material = pass.material;
    let Some(program) = material.program.as_deref() else {
        log::warn!("{}: program iterator without a program, drawing stages", material.name);
        generic::draw(pass);
        return;
    };

    let mut state = RenderState::new(material.cull);
    state.program = ProgramBinding::of(program);
    state.bits = material.stages.first().map_or(StateBits::DEFAULT, |s| s.state);
    state.images = program_images(pass);
    state.constant(Attribute::CameraPos, pass.frame.view_origin.extend(0.0).to_array());

    if pass.tess.instances.is_empty() {
        let single = pass.frame.entity.instance(pass.tess.shader_time);
        pass.tess.instances.push(single);
    }
    let count = pass.tess.instances.len();
    let instanced = count > 1 && pass.caps().instancing;
    if instanced {
        for (attribute, field) in INSTANCE_ARRAYS {
            state.instanced(attribute, AttribArray::instance(field));
        }
    }
    // one draw per instance unless the device instances for us
    let rounds = if instanced { 1 } else { count };
    let per_draw = if instanced { count as u32 } else { 1 };

    let query = pass.begin_query();
    let md3 = material.lightmap == LightmapIndex::Md3;
    let batches = std::mem::take(&mut pass.tess.static_batches);
    for batch in &batches {
        bind_batch(&mut state, batch, md3);
        for i in 0..rounds {
            if !instanced {
                bind_instance(&mut state, &pass.tess.instances[i]);
            }
            pass.draw_batch(&state, batch, per_draw);
        }
    }
    pass.tess.static_batches = batches;

    if pass.tess.num_indexes[1] > 0 {
        state.array(Attribute::Vertex, AttribArray::vertex(VertexField::Position));
        state.array(Attribute::Normal, AttribArray::vertex(VertexField::Normal));
        state.array(Attribute::Color, AttribArray::vertex(VertexField::Color));
        state.array(Attribute::TexCoord, AttribArray::vertex(VertexField::TexCoords));
        for i in 0..rounds {
            if !instanced {
                bind_instance(&mut state, &pass.tess.instances[i]);
            }
            pass.draw_tess(&state, per_draw);
        }
    }
    pass.end_query(query);
}

#[cfg(test)]
mod tests {
    use glam::Vec3;
    use tessera_core::material::IteratorKind;
    use tessera_core::{Capabilities, RendererConfig};

    use super::super::testing::Fixture;
    use super::*;
    use crate::backend::{GpuCall, Recorded};
    use crate::frame::EntityState;
    use crate::state_cache::AttribBinding;

    const SCRIPT: &str = "\
textures/test/glsl
{
    {
        map textures/test/base
    }
}
";

    fn fixture(caps: Capabilities) -> (Fixture, usize) {
        let mut fx = Fixture::new(SCRIPT, caps, RendererConfig::default());
        let m = fx.register("textures/test/glsl");
        assert_eq!(fx.registry.material(m).iterator, IteratorKind::UnifiedProgram);
        (fx, m)
    }

    fn add_instances(fx: &mut Fixture, n: usize) {
        for i in 0..n {
            let entity = EntityState {
                origin: Vec3::new(i as f32, 0.0, 0.0),
                ..Default::default()
            };
            assert!(fx.tess.add_instance(entity.instance(0.0)));
        }
    }

    #[test]
    fn test_single_instance_from_entity() {
        let (mut fx, m) = fixture(Capabilities::default());
        fx.frame.entity.origin = Vec3::new(5.0, 6.0, 7.0);
        fx.frame.view_origin = Vec3::new(1.0, 2.0, 3.0);
        fx.quad(m, 0);
        fx.run(m);

        let handle = fx.registry.material(m).program.as_ref().unwrap().handle;
        assert_eq!(fx.backend.count(|c| *c == GpuCall::UseProgram(handle)), 1);
        assert_eq!(fx.backend.num_draws(), 1);
        assert_eq!(
            fx.backend.count(|c| *c
                == GpuCall::AttributeConstant {
                    attribute: Attribute::TransX,
                    value: [1.0, 0.0, 0.0, 5.0]
                }),
            1
        );
    }

    #[test]
    fn test_hardware_instancing_draws_once() {
        let (mut fx, m) = fixture(Capabilities::default());
        fx.quad(m, 0);
        add_instances(&mut fx, 3);
        fx.run(m);

        let draws: Vec<_> = fx.backend.draws().collect();
        assert_eq!(draws.len(), 1);
        assert!(matches!(draws[0], Recorded::Draw { instances: 3, .. }));
        assert_eq!(
            fx.backend.count(|c| *c
                == GpuCall::AttributeDivisor {
                    attribute: Attribute::TransX,
                    divisor: 1
                }),
            1
        );
    }

    #[test]
    fn test_pseudo_instancing_draws_per_instance() {
        let caps = Capabilities {
            instancing: false,
            ..Default::default()
        };
        let (mut fx, m) = fixture(caps);
        fx.quad(m, 0);
        add_instances(&mut fx, 3);
        fx.run(m);

        assert_eq!(fx.backend.num_draws(), 3);
        assert!(fx.backend.draws().all(|d| matches!(d, Recorded::Draw { instances: 1, .. })));
        // every instance moves the transform
        assert_eq!(
            fx.backend.count(|c| matches!(c,
                GpuCall::AttributeConstant { attribute: Attribute::TransX, .. })),
            3
        );
    }

    #[test]
    fn test_data_texture_bound_after_stages() {
        let (mut fx, m) = fixture(Capabilities::default());
        fx.quad(m, 0);
        fx.tess.data_texture = Some(ImageId(99));
        fx.run(m);
        assert_eq!(
            fx.backend.count(|c| *c
                == GpuCall::BindTexture {
                    unit: 1,
                    image: ImageId(99)
                }),
            1
        );
    }

    #[test]
    fn test_model_batches_read_packed_positions() {
        let mut state = RenderState::new(tessera_core::CullType::Front);
        let batch = StaticBatch {
            vbo: 2,
            vbo_offset: 64,
            ibo: 3,
            ibo_offset: 0,
            count: 3,
            min_index: 0,
            max_index: 2,
        };
        bind_batch(&mut state, &batch, true);
        let AttribBinding::Array { array, .. } = state.binding(Attribute::Vertex) else {
            panic!("position is not an array");
        };
        assert_eq!(array.stride, 16);
        assert_eq!(array.offset, 64);
        assert_eq!(
            state.binding(Attribute::Color),
            AttribBinding::Constant([1.0; 4])
        );
    }
}
