//! Passes drawn over a finished surface: projected dynamic lights and the
//! fog volume the surface sits in. Both only touch the overlay index range.

use glam::Vec3;
use tessera_core::{Attribute, StateBits};
use tessera_material::defaults::Internal;
use tessera_material::BuiltinImage;

use crate::calc::{fog_texcoord, to_byte, LUMA};
use crate::frame::{DynamicLight, EntityState};
use crate::iterators::Pass;
use crate::state_cache::{ProgramBinding, RenderState};
use crate::tess::{AttribArray, ComponentType, Vertex, VertexField};

/// Texcoord out of `[0, 1]` on each side, then beyond the light on either
/// side of the surface.
mod clip {
    pub const S_LOW: u8 = 1;
    pub const S_HIGH: u8 = 2;
    pub const T_LOW: u8 = 4;
    pub const T_HIGH: u8 = 8;
    pub const ABOVE: u8 = 16;
    pub const BELOW: u8 = 32;
    pub const ALL: u8 = 63;
}

/// Light origin in the entity's local frame.
fn local_origin(light: &DynamicLight, entity: &EntityState) -> Vec3 {
    let d = light.origin - entity.origin;
    Vec3::new(d.dot(entity.axis[0]), d.dot(entity.axis[1]), d.dot(entity.axis[2]))
}

fn light_color(light: &DynamicLight, greyscale: f32) -> Vec3 {
    let c = light.color * 255.0;
    let grey = greyscale.clamp(0.0, 1.0);
    if grey > 0.0 {
        let luma = c.dot(LUMA);
        c + (Vec3::splat(luma) - c) * grey
    } else {
        c
    }
}

/// Projection of one light onto one vertex: texcoord, clip bits and the
/// brightness falloff along z.
fn project(v: &Vertex, origin: Vec3, radius: f32, backs: bool) -> ([f32; 2], u8, f32) {
    let dist = origin - Vec3::from(v.xyz);
    let scale = 1.0 / radius;
    let st = [0.5 + dist.x * scale, 0.5 + dist.y * scale];
    if !backs && dist.dot(Vec3::from(v.normal)) < 0.0 {
        return (st, clip::ALL, 0.0);
    }

    let mut bits = 0;
    if st[0] < 0.0 {
        bits |= clip::S_LOW;
    } else if st[0] > 1.0 {
        bits |= clip::S_HIGH;
    }
    if st[1] < 0.0 {
        bits |= clip::T_LOW;
    } else if st[1] > 1.0 {
        bits |= clip::T_HIGH;
    }

    let dz = dist.z.abs();
    let modulate = if dist.z > radius {
        bits |= clip::ABOVE;
        0.0
    } else if dist.z < -radius {
        bits |= clip::BELOW;
        0.0
    } else if dz < radius * 0.5 {
        1.0
    } else {
        2.0 * (radius - dz) * scale
    };
    (st, bits, modulate)
}

/// Blend every light touching the surface on top of it.
pub fn dlights(pass: &mut Pass<'_>) {
    let frame = pass.frame;
    let num_lit = pass.tess.num_indexes[2];
    if frame.dlights.is_empty() || pass.tess.dlight_bits == 0 || num_lit == 0 {
        return;
    }
    let config = pass.config();
    let n = pass.tess.num_vertices();
    let first = (pass.tess.min_index[2] as usize).min(n);

    let default = pass.registry.material(pass.registry.default_index());
    let program = default
        .program
        .as_deref()
        .map_or(ProgramBinding::FIXED, ProgramBinding::of);
    let offset = pass
        .material
        .stages
        .first()
        .map_or(StateBits(0), |s| s.state & StateBits::POLYGON_OFFSET);

    let texcoords = pass.scratch.alloc_array::<[f32; 2]>(n);
    let colors = pass.scratch.alloc_array::<[u8; 4]>(n);
    let hits = pass.scratch.alloc_array::<u32>(num_lit);
    let mut clips = vec![0u8; n];
    let mut modulates = vec![0f32; n];

    for light in frame.lit_by(pass.tess.dlight_bits) {
        let origin = local_origin(light, &frame.entity);
        let color = light_color(light, config.greyscale);

        {
            let vertices = &pass.tess.vertices;
            let st_out = pass.scratch.slice_mut::<[f32; 2]>(&texcoords);
            for i in first..n {
                let (st, bits, modulate) = project(&vertices[i], origin, light.radius, config.dlight_backs);
                st_out[i] = st;
                clips[i] = bits;
                modulates[i] = modulate;
            }
        }
        let rgba = pass.scratch.slice_mut::<[u8; 4]>(&colors);
        for i in first..n {
            let c = color * modulates[i];
            rgba[i] = [to_byte(c.x), to_byte(c.y), to_byte(c.z), 255];
        }

        let mut count = 0;
        {
            let out = pass.scratch.slice_mut::<u32>(&hits);
            for tri in pass.tess.lit_indexes().chunks_exact(3) {
                let [a, b, c] = [tri[0], tri[1], tri[2]].map(|i| clips[i as usize]);
                if a & b & c != 0 {
                    continue;
                }
                out[count..count + 3].copy_from_slice(tri);
                count += 3;
            }
        }
        if count == 0 {
            continue;
        }

        let blend = if light.additive {
            StateBits::SRCBLEND_ONE | StateBits::DSTBLEND_ONE
        } else {
            StateBits::SRCBLEND_DST_COLOR | StateBits::DSTBLEND_ONE
        };
        let mut state = RenderState::new(pass.material.cull);
        state.program = program;
        state.bits = offset | StateBits::DEPTHFUNC_EQUAL | blend;
        state.images.push(pass.builtin(BuiltinImage::Dlight));
        state.array(Attribute::Vertex, AttribArray::vertex(VertexField::Position));
        state.array(
            Attribute::TexCoord,
            AttribArray::scratch(texcoords.offset(), 2, ComponentType::F32),
        );
        state.array(
            Attribute::Color,
            AttribArray::scratch(colors.offset(), 4, ComponentType::U8Norm),
        );
        let max_index = n.saturating_sub(1) as u32;
        pass.draw_scratch(&state, &hits, count, max_index);
    }

    pass.scratch.release(hits);
    pass.scratch.release(colors);
    pass.scratch.release(texcoords);
}

/// Blend the surface's fog volume over it.
pub fn fog(pass: &mut Pass<'_>) {
    let frame = pass.frame;
    let Some(volume) = frame.fog(pass.tess.fog) else {
        return;
    };
    if pass.tess.num_indexes[2] == 0 {
        return;
    }
    let vectors = frame.fog_vectors(volume);
    let n = pass.tess.num_vertices();

    let texcoords = pass.scratch.alloc_array::<[f32; 2]>(n);
    {
        let vertices = &pass.tess.vertices;
        let out = pass.scratch.slice_mut::<[f32; 2]>(&texcoords);
        for (st, v) in out.iter_mut().zip(vertices) {
            *st = fog_texcoord(&vectors, Vec3::from(v.xyz));
        }
    }

    let mut bits = StateBits::DEFAULT;
    if let Some(stage) = pass.material.stages.first() {
        bits |= stage.state & StateBits::POLYGON_OFFSET;
    }
    if pass.material.fog_pass == tessera_core::material::FogPass::Equal {
        bits |= StateBits::DEPTHFUNC_EQUAL;
    }

    let fog_material = pass.registry.material(pass.registry.internal_index(Internal::Fog));
    let mut state = RenderState::new(pass.material.cull);
    match fog_material.program.as_deref() {
        Some(program) => {
            state.program = ProgramBinding::of(program);
            bits |= StateBits::SRCBLEND_ONE | StateBits::DSTBLEND_SRC_ALPHA;
        }
        None => bits |= StateBits::SRCBLEND_SRC_ALPHA | StateBits::DSTBLEND_ONE_MINUS_SRC_ALPHA,
    }
    state.bits = bits;
    let [r, g, b, _] = volume.color.map(|c| c as f32 / 255.0);
    state.constant(Attribute::Color, [r, g, b, 1.0]);
    state.images.push(pass.builtin(BuiltinImage::Fog));
    state.array(Attribute::Vertex, AttribArray::vertex(VertexField::Position));
    state.array(
        Attribute::TexCoord,
        AttribArray::scratch(texcoords.offset(), 2, ComponentType::F32),
    );
    pass.draw_lit(&state);

    pass.scratch.release(texcoords);
}

#[cfg(test)]
mod tests {
    use tessera_core::RendererConfig;

    use super::*;
    use crate::backend::{GpuCall, Recorded};
    use crate::frame::FogVolume;
    use crate::iterators::testing::{fixed_caps, Fixture};
    use tessera_material::ImageProvider;

    const SCRIPT: &str = "\
textures/test/wall
{
    {
        map textures/test/base
    }
}
";

    fn light(z: f32, additive: bool) -> DynamicLight {
        DynamicLight {
            origin: Vec3::new(0.5, 0.5, z),
            radius: 100.0,
            color: Vec3::ONE,
            additive,
        }
    }

    fn lit_fixture(config: RendererConfig, lights: &[DynamicLight]) -> (Fixture, usize) {
        let mut fx = Fixture::new(SCRIPT, fixed_caps(), config);
        let m = fx.register("textures/test/wall");
        fx.frame.dlights.extend_from_slice(lights);
        fx.quad(m, 1);
        fx.tess.dlight_bits = (1 << lights.len()) - 1;
        (fx, m)
    }

    fn draw_counts(fx: &Fixture) -> Vec<usize> {
        fx.backend
            .draws()
            .map(|d| match d {
                Recorded::Draw { count, .. } => *count,
                _ => 0,
            })
            .collect()
    }

    #[test]
    fn test_projection_inside_radius() {
        let v = Vertex {
            xyz: [0.5, 0.5, 0.0],
            normal: [0.0, 0.0, 1.0],
            ..Default::default()
        };
        let (st, bits, modulate) = project(&v, Vec3::new(0.5, 0.5, 10.0), 100.0, true);
        assert_eq!(st, [0.5, 0.5]);
        assert_eq!(bits, 0);
        assert_eq!(modulate, 1.0);

        // falloff between half the radius and the radius
        let (_, _, modulate) = project(&v, Vec3::new(0.5, 0.5, 75.0), 100.0, true);
        assert!((modulate - 0.5).abs() < 1e-6);

        let (_, bits, modulate) = project(&v, Vec3::new(0.5, 0.5, 150.0), 100.0, true);
        assert_eq!(bits, clip::ABOVE);
        assert_eq!(modulate, 0.0);
    }

    #[test]
    fn test_projection_back_face() {
        let v = Vertex {
            normal: [0.0, 0.0, 1.0],
            ..Default::default()
        };
        let below = Vec3::new(0.0, 0.0, -10.0);
        assert_eq!(project(&v, below, 100.0, false).1, clip::ALL);
        assert_eq!(project(&v, below, 100.0, true).1, 0);
    }

    #[test]
    fn test_light_over_surface_draws_once() {
        let (mut fx, m) = lit_fixture(RendererConfig::default(), &[light(10.0, false)]);
        dlights(&mut fx.pass(m));
        assert_eq!(draw_counts(&fx), vec![6]);
        let dlight_image = fx.images.builtin(BuiltinImage::Dlight);
        assert!(fx
            .backend
            .calls()
            .any(|c| matches!(c, GpuCall::BindTexture { image, .. } if *image == dlight_image)));
        assert_eq!(
            fx.backend
                .count(|c| *c == GpuCall::DepthFunc(wgpu::CompareFunction::Equal)),
            1
        );
        assert_eq!(fx.scratch.free(), fx.scratch.capacity());
    }

    #[test]
    fn test_out_of_range_light_is_skipped() {
        let (mut fx, m) = lit_fixture(RendererConfig::default(), &[light(500.0, true)]);
        dlights(&mut fx.pass(m));
        assert_eq!(fx.backend.num_draws(), 0);
        assert_eq!(fx.scratch.free(), fx.scratch.capacity());
    }

    #[test]
    fn test_back_lights_follow_config() {
        let config = RendererConfig {
            dlight_backs: false,
            ..Default::default()
        };
        let (mut fx, m) = lit_fixture(config, &[light(-10.0, false)]);
        dlights(&mut fx.pass(m));
        assert_eq!(fx.backend.num_draws(), 0);

        let config = RendererConfig {
            dlight_backs: true,
            ..Default::default()
        };
        let (mut fx, m) = lit_fixture(config, &[light(-10.0, false)]);
        dlights(&mut fx.pass(m));
        assert_eq!(fx.backend.num_draws(), 1);
    }

    #[test]
    fn test_only_masked_lights_draw() {
        let (mut fx, m) = lit_fixture(
            RendererConfig::default(),
            &[light(10.0, false), light(20.0, true), light(30.0, false)],
        );
        fx.tess.dlight_bits = 0b101;
        dlights(&mut fx.pass(m));
        assert_eq!(fx.backend.num_draws(), 2);
    }

    #[test]
    fn test_greyscale_light_color() {
        let red = DynamicLight {
            color: Vec3::X,
            ..light(0.0, false)
        };
        assert_eq!(light_color(&red, 0.0), Vec3::new(255.0, 0.0, 0.0));
        let grey = light_color(&red, 1.0);
        assert!((grey.x - grey.y).abs() < 1e-3);
        assert!((grey.y - grey.z).abs() < 1e-3);
    }

    #[test]
    fn test_fog_pass_draws_overlay_range() {
        let mut fx = Fixture::new(SCRIPT, fixed_caps(), RendererConfig::default());
        let m = fx.register("textures/test/wall");
        fx.frame.fogs.push(FogVolume {
            color: [255, 0, 0, 255],
            tc_scale: 1.0 / 512.0,
            surface: None,
        });
        fx.quad(m, 1);
        fx.tess.fog = 1;
        fog(&mut fx.pass(m));

        assert_eq!(draw_counts(&fx), vec![6]);
        assert!(fx.backend.calls().any(|c| matches!(
            c,
            GpuCall::AttributeConstant { attribute: Attribute::Color, value } if *value == [1.0, 0.0, 0.0, 1.0]
        )));
        assert_eq!(fx.scratch.free(), fx.scratch.capacity());
    }

    #[test]
    fn test_fog_pass_without_volume() {
        let mut fx = Fixture::new(SCRIPT, fixed_caps(), RendererConfig::default());
        let m = fx.register("textures/test/wall");
        fx.quad(m, 1);
        fx.tess.fog = 1;
        fog(&mut fx.pass(m));
        assert_eq!(fx.backend.num_draws(), 0);
    }
}
