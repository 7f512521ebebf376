//! CPU side of stage evaluation: waveforms, per-vertex colours and
//! texture coordinates, texcoord modifiers and vertex deforms.

use glam::Vec3;

use tessera_core::constants::{FUNCTABLE_MASK, FUNCTABLE_SIZE, FUNCTABLE_SIZE2};
use tessera_core::material::{
    AdjustFog, AlphaGen, ColorGen, Deform, TcGen, TexMod, TextureBundle, WaveFunc, Waveform,
};
use tessera_core::{ImageId, RendererConfig, Stage};

use crate::frame::{EntityState, FogVectors, FogVolume, Frame};
use crate::scratch::{Scratch, ScratchBlock};
use crate::state_cache::AttribBinding;
use crate::tess::{AttribArray, ComponentType, Vertex, VertexField};

const NOISE_SIZE: usize = 256;

/// Light position used for `alphaGen lightingSpecular`.
const SPECULAR_LIGHT: Vec3 = Vec3::new(-960.0, 1980.0, 96.0);

/// Rec. 709 luma weights for greyscale.
pub(crate) const LUMA: Vec3 = Vec3::new(0.2126, 0.7152, 0.0722);

/// Precomputed periodic functions, one cycle over `FUNCTABLE_SIZE` entries.
#[derive(Debug, Clone)]
pub struct WaveTables {
    sin: Vec<f32>,
    square: Vec<f32>,
    triangle: Vec<f32>,
    sawtooth: Vec<f32>,
    inverse_sawtooth: Vec<f32>,
    noise: Vec<f32>,
}

impl Default for WaveTables {
    fn default() -> Self {
        Self::new()
    }
}

impl WaveTables {
    pub fn new() -> Self {
        let n = FUNCTABLE_SIZE;
        let quarter = n / 4;
        let mut triangle = vec![0.0; n];
        for i in 0..n {
            triangle[i] = if i < n / 2 {
                if i < quarter {
                    i as f32 / quarter as f32
                } else {
                    1.0 - triangle[i - quarter]
                }
            } else {
                -triangle[i - n / 2]
            };
        }
        let sawtooth: Vec<f32> = (0..n).map(|i| i as f32 / n as f32).collect();

        let mut seed: u32 = 0x1d87_2b41;
        let noise = (0..NOISE_SIZE)
            .map(|_| {
                seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
                ((seed >> 16) & 0x7fff) as f32 / 16383.5 - 1.0
            })
            .collect();

        Self {
            sin: (0..n)
                .map(|i| (i as f32 * std::f32::consts::TAU / n as f32).sin())
                .collect(),
            square: (0..n).map(|i| if i < n / 2 { 1.0 } else { -1.0 }).collect(),
            triangle,
            inverse_sawtooth: sawtooth.iter().map(|s| 1.0 - s).collect(),
            sawtooth,
            noise,
        }
    }

    fn table(&self, func: WaveFunc) -> Option<&[f32]> {
        match func {
            WaveFunc::Sin => Some(&self.sin),
            WaveFunc::Square => Some(&self.square),
            WaveFunc::Triangle => Some(&self.triangle),
            WaveFunc::Sawtooth => Some(&self.sawtooth),
            WaveFunc::InverseSawtooth => Some(&self.inverse_sawtooth),
            WaveFunc::None | WaveFunc::Noise => None,
        }
    }

    fn lookup(table: &[f32], cycles: f32) -> f32 {
        table[(cycles * FUNCTABLE_SIZE as f32) as i32 as usize & FUNCTABLE_MASK]
    }

    /// `sin(2π x)` from the table.
    pub fn sin_cycles(&self, x: f32) -> f32 {
        Self::lookup(&self.sin, x)
    }

    /// Smooth value noise in [-1, 1].
    pub fn noise(&self, x: f32) -> f32 {
        let floor = x.floor();
        let i = floor as i64;
        let mask = NOISE_SIZE as i64 - 1;
        let a = self.noise[(i & mask) as usize];
        let b = self.noise[((i + 1) & mask) as usize];
        a + (b - a) * (x - floor)
    }

    fn noise_at(&self, p: Vec3, t: f32) -> f32 {
        self.noise(p.x * 0.131 + p.y * 0.173 + p.z * 0.197 + t)
    }

    /// Value of `wave` at `time` seconds.
    pub fn eval(&self, wave: &Waveform, time: f32) -> f32 {
        let x = wave.phase + time * wave.frequency;
        match (wave.func, self.table(wave.func)) {
            (WaveFunc::Noise, _) => {
                wave.base + self.noise((time + wave.phase) * wave.frequency) * wave.amplitude
            }
            (_, Some(table)) => wave.base + Self::lookup(table, x) * wave.amplitude,
            (_, None) => wave.base,
        }
    }
}

/// Frame of `bundle` to bind at `shader_time`. Program draws may take the
/// combined atlas instead and pick the frame on the GPU.
pub fn animated_image(bundle: &TextureBundle, shader_time: f32, combined: bool) -> Option<ImageId> {
    if bundle.video_map.is_some() || bundle.images.len() <= 1 {
        return bundle.image();
    }
    if combined {
        if let Some(atlas) = bundle.combined_image {
            return Some(atlas);
        }
    }
    let index = ((shader_time * bundle.animation_speed * FUNCTABLE_SIZE as f32) as i64) >> FUNCTABLE_SIZE2;
    let index = index.max(0) as usize % bundle.images.len();
    Some(bundle.images[index])
}

/// Everything colour and texcoord generation reads besides the vertices.
#[derive(Clone, Copy)]
pub struct CalcInput<'a> {
    pub tables: &'a WaveTables,
    pub frame: &'a Frame,
    pub config: &'a RendererConfig,
    pub portal_range: f32,
    pub time: f32,
    pub fog: Option<(&'a FogVolume, FogVectors)>,
}

/// Where a generated attribute ended up.
#[must_use = "scratch-backed arrays must be released"]
#[derive(Debug, PartialEq)]
pub enum Generated {
    Unspecified,
    Constant([f32; 4]),
    Field(VertexField),
    Scratch {
        block: ScratchBlock,
        components: u8,
        kind: ComponentType,
    },
}

impl Generated {
    pub fn binding(&self) -> AttribBinding {
        match self {
            Self::Unspecified => AttribBinding::Unspecified,
            Self::Constant(v) => AttribBinding::Constant(*v),
            Self::Field(field) => AttribBinding::Array {
                array: AttribArray::vertex(*field),
                divisor: 0,
            },
            Self::Scratch {
                block,
                components,
                kind,
            } => AttribBinding::Array {
                array: AttribArray::scratch(block.offset(), *components, *kind),
                divisor: 0,
            },
        }
    }

    /// Binding when the vertices live in a static buffer. CPU-generated
    /// arrays have no equivalent there.
    pub fn buffer_binding(&self, vbo: u32, base: usize) -> Option<AttribBinding> {
        match self {
            Self::Field(field) => Some(AttribBinding::Array {
                array: AttribArray::buffer(vbo, base, *field),
                divisor: 0,
            }),
            Self::Scratch { .. } => None,
            other => Some(other.binding()),
        }
    }

    pub fn release(self, scratch: &mut Scratch) {
        if let Self::Scratch { block, .. } = self {
            scratch.release(block);
        }
    }
}

/// Colour and alpha generators as actually evaluated.
pub fn effective_gens(stage: &Stage, config: &RendererConfig) -> (ColorGen, AlphaGen) {
    let mut rgb = stage.rgb_gen;
    let alpha = match stage.alpha_gen {
        AlphaGen::Skip => match rgb {
            ColorGen::Vertex | ColorGen::ExactVertex | ColorGen::OneMinusVertex => AlphaGen::Vertex,
            _ => AlphaGen::Identity,
        },
        other => other,
    };
    if rgb == ColorGen::Vertex && config.identity_light() == 1.0 {
        rgb = ColorGen::ExactVertex;
    }
    (rgb, alpha)
}

pub(crate) fn to_byte(x: f32) -> u8 {
    x.clamp(0.0, 255.0) as u8
}

fn constant_rgb(rgb: ColorGen, stage: &Stage, input: &CalcInput<'_>) -> Option<[u8; 3]> {
    let entity = &input.frame.entity.shader_rgba;
    Some(match rgb {
        ColorGen::Bad | ColorGen::Identity => [255; 3],
        ColorGen::IdentityLighting => [input.config.identity_light_byte(); 3],
        ColorGen::Entity => [entity[0], entity[1], entity[2]],
        ColorGen::OneMinusEntity => [255 - entity[0], 255 - entity[1], 255 - entity[2]],
        ColorGen::Const => [
            stage.constant_color[0],
            stage.constant_color[1],
            stage.constant_color[2],
        ],
        ColorGen::Fog => match input.fog {
            Some((fog, _)) => [fog.color[0], fog.color[1], fog.color[2]],
            None => [255; 3],
        },
        ColorGen::Waveform => {
            let mut glow = input.tables.eval(&stage.rgb_wave, input.time);
            if stage.rgb_wave.func != WaveFunc::Noise {
                glow *= input.config.identity_light();
            }
            [to_byte(glow.clamp(0.0, 1.0) * 255.0); 3]
        }
        ColorGen::ExactVertex
        | ColorGen::Vertex
        | ColorGen::OneMinusVertex
        | ColorGen::LightingDiffuse => return None,
    })
}

fn constant_alpha(alpha: AlphaGen, stage: &Stage, input: &CalcInput<'_>) -> Option<u8> {
    let entity = input.frame.entity.shader_rgba[3];
    Some(match alpha {
        AlphaGen::Identity | AlphaGen::Skip => 255,
        AlphaGen::Entity => entity,
        AlphaGen::OneMinusEntity => 255 - entity,
        AlphaGen::Const => stage.constant_color[3],
        AlphaGen::Waveform => {
            let glow = input.tables.eval(&stage.alpha_wave, input.time);
            to_byte(glow.clamp(0.0, 1.0) * 255.0)
        }
        AlphaGen::Vertex
        | AlphaGen::OneMinusVertex
        | AlphaGen::LightingSpecular
        | AlphaGen::Portal => return None,
    })
}

fn diffuse(v: &Vertex, entity: &EntityState) -> [u8; 3] {
    let incoming = Vec3::from(v.normal).dot(entity.light_dir);
    let light = if incoming <= 0.0 {
        entity.ambient_light
    } else {
        entity.ambient_light + entity.directed_light * incoming
    };
    [to_byte(light.x), to_byte(light.y), to_byte(light.z)]
}

fn specular(v: &Vertex, frame: &Frame) -> u8 {
    let p = Vec3::from(v.xyz);
    let normal = Vec3::from(v.normal);
    let light = (SPECULAR_LIGHT - p).normalize_or_zero();
    let reflected = normal * 2.0 * normal.dot(light) - light;
    let viewer = frame.view_origin - p;
    let len = viewer.length();
    if len == 0.0 {
        return 0;
    }
    let l = reflected.dot(viewer) / len;
    if l < 0.0 {
        0
    } else {
        let l = (l * l) * (l * l);
        to_byte(l * 255.0)
    }
}

fn portal_alpha(v: &Vertex, input: &CalcInput<'_>) -> u8 {
    if input.portal_range <= 0.0 {
        return 0;
    }
    let len = Vec3::from(v.xyz).distance(input.frame.view_origin) / input.portal_range;
    to_byte(len.clamp(0.0, 1.0) * 255.0)
}

/// Fog texcoords of a point: `s` grows with view distance, `t` with depth
/// below the fog surface.
pub fn fog_texcoord(vectors: &FogVectors, p: Vec3) -> [f32; 2] {
    let s = p.dot(vectors.distance.truncate()) + vectors.distance.w;
    let t = p.dot(vectors.depth.truncate()) + vectors.depth.w;
    let t = if vectors.eye_outside {
        if t < 1.0 {
            1.0 / 32.0
        } else {
            1.0 / 32.0 + 30.0 / 32.0 * t / (t - vectors.eye_t)
        }
    } else if t < 0.0 {
        1.0 / 32.0
    } else {
        31.0 / 32.0
    };
    [s, t]
}

/// Opacity the fog image has at `(s, t)`.
pub fn fog_factor(s: f32, t: f32) -> f32 {
    let mut s = s - 1.0 / 512.0;
    if s < 0.0 || t < 1.0 / 32.0 {
        return 0.0;
    }
    if t < 31.0 / 32.0 {
        s *= (t - 1.0 / 32.0) / (30.0 / 32.0);
    }
    (s * 8.0).min(1.0)
}

/// Per-vertex colours of `stage`.
pub fn fill_colors(stage: &Stage, input: &CalcInput<'_>, vertices: &[Vertex], out: &mut [[u8; 4]]) {
    let (rgb, alpha) = effective_gens(stage, input.config);
    let const_rgb = constant_rgb(rgb, stage, input);
    let const_alpha = constant_alpha(alpha, stage, input);
    let identity = input.config.identity_light();
    let scale = |c: u8| to_byte(c as f32 * identity);

    for (v, out) in vertices.iter().zip(out.iter_mut()) {
        let [r, g, b] = const_rgb.unwrap_or_else(|| match rgb {
            ColorGen::ExactVertex => [v.color[0], v.color[1], v.color[2]],
            ColorGen::Vertex => [scale(v.color[0]), scale(v.color[1]), scale(v.color[2])],
            ColorGen::OneMinusVertex => [
                scale(255 - v.color[0]),
                scale(255 - v.color[1]),
                scale(255 - v.color[2]),
            ],
            ColorGen::LightingDiffuse => diffuse(v, &input.frame.entity),
            _ => [255; 3],
        });
        let a = const_alpha.unwrap_or_else(|| match alpha {
            AlphaGen::Vertex => v.color[3],
            AlphaGen::OneMinusVertex => 255 - v.color[3],
            AlphaGen::LightingSpecular => specular(v, input.frame),
            AlphaGen::Portal => portal_alpha(v, input),
            _ => 255,
        });
        *out = [r, g, b, a];
    }

    if let (Some((_, vectors)), adjust) = (input.fog, stage.adjust_fog) {
        if adjust != AdjustFog::None {
            for (v, out) in vertices.iter().zip(out.iter_mut()) {
                let [s, t] = fog_texcoord(&vectors, Vec3::from(v.xyz));
                let keep = 1.0 - fog_factor(s, t);
                let channels = match adjust {
                    AdjustFog::ModulateRgb => 0..3,
                    AdjustFog::ModulateAlpha => 3..4,
                    _ => 0..4,
                };
                for c in &mut out[channels] {
                    *c = to_byte(*c as f32 * keep);
                }
            }
        }
    }

    let grey = input.config.greyscale;
    if grey > 0.0 {
        for out in out.iter_mut() {
            let c = Vec3::new(out[0] as f32, out[1] as f32, out[2] as f32);
            let luma = c.dot(LUMA);
            let mixed = c + (Vec3::splat(luma) - c) * grey;
            *out = [to_byte(mixed.x), to_byte(mixed.y), to_byte(mixed.z), out[3]];
        }
    }
}

/// Colour attribute of `stage` when nothing has to be generated: one
/// constant, or the vertex colours passed through.
pub fn passthrough_colors(stage: &Stage, input: &CalcInput<'_>) -> Option<Generated> {
    if stage.adjust_fog != AdjustFog::None || input.config.greyscale != 0.0 {
        return None;
    }
    let (rgb, alpha) = effective_gens(stage, input.config);
    if let (Some(c), Some(a)) = (constant_rgb(rgb, stage, input), constant_alpha(alpha, stage, input)) {
        return Some(Generated::Constant([
            c[0] as f32 / 255.0,
            c[1] as f32 / 255.0,
            c[2] as f32 / 255.0,
            a as f32 / 255.0,
        ]));
    }
    (rgb == ColorGen::ExactVertex && alpha == AlphaGen::Vertex).then_some(Generated::Field(VertexField::Color))
}

/// Colour attribute of `stage`, generated into scratch unless it passes
/// through.
pub fn compute_colors(
    stage: &Stage,
    input: &CalcInput<'_>,
    vertices: &[Vertex],
    scratch: &mut Scratch,
) -> Generated {
    if let Some(colors) = passthrough_colors(stage, input) {
        return colors;
    }
    let block = scratch.alloc_array::<[u8; 4]>(vertices.len());
    fill_colors(stage, input, vertices, scratch.slice_mut(&block));
    Generated::Scratch {
        block,
        components: 4,
        kind: ComponentType::U8Norm,
    }
}

fn environment(v: &Vertex, frame: &Frame) -> [f32; 2] {
    let normal = Vec3::from(v.normal);
    let viewer = (frame.view_origin - Vec3::from(v.xyz)).normalize_or_zero();
    let reflected = normal * 2.0 * normal.dot(viewer) - viewer;
    [0.5 + reflected.y * 0.5, 0.5 - reflected.z * 0.5]
}

fn transform(st: &mut [[f32; 2]], matrix: [[f32; 2]; 2], translate: [f32; 2]) {
    for c in st {
        let [s, t] = *c;
        *c = [
            s * matrix[0][0] + t * matrix[1][0] + translate[0],
            s * matrix[0][1] + t * matrix[1][1] + translate[1],
        ];
    }
}

fn scroll(st: &mut [[f32; 2]], speed: [f32; 2], time: f32) {
    let mut offset = [speed[0] * time, speed[1] * time];
    // keep the values small so precision survives long uptimes
    for o in &mut offset {
        *o -= o.floor();
    }
    for c in st {
        c[0] += offset[0];
        c[1] += offset[1];
    }
}

pub fn apply_tex_mod(tex_mod: &TexMod, input: &CalcInput<'_>, vertices: &[Vertex], st: &mut [[f32; 2]]) {
    let tables = input.tables;
    let time = input.time;
    match *tex_mod {
        TexMod::Turbulent(wave) => {
            let now = wave.phase + time * wave.frequency;
            let k = 1.0 / 128.0 * 0.125;
            for (v, c) in vertices.iter().zip(st.iter_mut()) {
                c[0] += tables.sin_cycles((v.xyz[0] + v.xyz[2]) * k + now) * wave.amplitude;
                c[1] += tables.sin_cycles(v.xyz[1] * k + now) * wave.amplitude;
            }
        }
        TexMod::Scale(scale) => {
            for c in st {
                c[0] *= scale[0];
                c[1] *= scale[1];
            }
        }
        TexMod::Scroll(speed) => scroll(st, speed, time),
        TexMod::EntityTranslate => scroll(st, input.frame.entity.shader_tex_coord, time),
        TexMod::Stretch(wave) => {
            let glow = tables.eval(&wave, time);
            if glow != 0.0 {
                let p = 1.0 / glow;
                let off = 0.5 - 0.5 * p;
                transform(st, [[p, 0.0], [0.0, p]], [off, off]);
            }
        }
        TexMod::Transform { matrix, translate } => transform(st, matrix, translate),
        TexMod::Rotate(speed) => {
            let cycles = -speed * time / 360.0;
            let sin = tables.sin_cycles(cycles);
            let cos = tables.sin_cycles(cycles + 0.25);
            transform(
                st,
                [[cos, sin], [-sin, cos]],
                [0.5 - 0.5 * cos + 0.5 * sin, 0.5 - 0.5 * sin - 0.5 * cos],
            );
        }
    }
}

/// Texture coordinates of `bundle` followed by its modifiers.
pub fn fill_texcoords(
    bundle: &TextureBundle,
    input: &CalcInput<'_>,
    vertices: &[Vertex],
    out: &mut [[f32; 2]],
) {
    let [v0, v1] = bundle.tc_gen_vectors;
    for (v, st) in vertices.iter().zip(out.iter_mut()) {
        let p = Vec3::from(v.xyz);
        *st = match bundle.tc_gen {
            TcGen::Texture => v.tc1,
            TcGen::Lightmap => v.tc2,
            TcGen::Vector => [p.dot(v0), p.dot(v1)],
            TcGen::Environment => environment(v, input.frame),
            TcGen::Fog => match &input.fog {
                Some((_, vectors)) => fog_texcoord(vectors, p),
                None => [0.0; 2],
            },
            TcGen::Identity | TcGen::Bad => [0.0; 2],
        };
    }
    for tex_mod in &bundle.tex_mods {
        apply_tex_mod(tex_mod, input, vertices, out);
    }
}

/// Texcoord attribute of an unmodified `bundle` that reads a vertex
/// field directly.
pub fn passthrough_texcoords(bundle: &TextureBundle) -> Option<Generated> {
    if !bundle.tex_mods.is_empty() {
        return None;
    }
    match bundle.tc_gen {
        TcGen::Bad => Some(Generated::Unspecified),
        TcGen::Texture => Some(Generated::Field(VertexField::Tc1)),
        TcGen::Lightmap => Some(Generated::Field(VertexField::Tc2)),
        _ => None,
    }
}

/// Texcoord attribute of `bundle`, generated into scratch unless it
/// passes through.
pub fn compute_texcoords(
    bundle: &TextureBundle,
    input: &CalcInput<'_>,
    vertices: &[Vertex],
    scratch: &mut Scratch,
) -> Generated {
    if let Some(texcoords) = passthrough_texcoords(bundle) {
        return texcoords;
    }
    let block = scratch.alloc_array::<[f32; 2]>(vertices.len());
    fill_texcoords(bundle, input, vertices, scratch.slice_mut(&block));
    Generated::Scratch {
        block,
        components: 2,
        kind: ComponentType::F32,
    }
}

/// Flatten geometry onto the entity's shadow plane along its light.
pub fn projection_shadow(entity: &EntityState, vertices: &mut [Vertex]) {
    let ground = Vec3::new(entity.axis[0].z, entity.axis[1].z, entity.axis[2].z);
    let ground_dist = entity.origin.z - entity.shadow_plane;
    let mut light_dir = entity.light_dir;
    let mut d = light_dir.dot(ground);
    // keep shadows from getting too long or flipping
    if d < 0.5 {
        light_dir += ground * (0.5 - d);
        d = light_dir.dot(ground);
    }
    let light = light_dir / d;
    for v in vertices {
        let p = Vec3::from(v.xyz);
        let h = p.dot(ground) + ground_dist;
        v.xyz = (p - light * h).to_array();
    }
}

fn autosprite(frame: &Frame, vertices: &mut [Vertex]) {
    let mut left = frame.view_axis[1];
    let up = frame.view_axis[2];
    if frame.mirrored {
        left = -left;
    }
    let normal = (-frame.view_axis[0]).to_array();
    for quad in vertices.chunks_exact_mut(4) {
        let mid = quad.iter().map(|v| Vec3::from(v.xyz)).sum::<Vec3>() * 0.25;
        let radius = Vec3::from(quad[0].xyz).distance(mid) * std::f32::consts::FRAC_1_SQRT_2;
        let (l, u) = (left * radius, up * radius);
        let corners = [mid + l + u, mid - l + u, mid - l - u, mid + l - u];
        for (v, corner) in quad.iter_mut().zip(corners) {
            v.xyz = corner.to_array();
            v.normal = normal;
        }
    }
}

const EDGE_VERTS: [[usize; 2]; 6] = [[0, 1], [0, 2], [0, 3], [1, 2], [1, 3], [2, 3]];

/// Rotate each quad about its long axis to face the viewer.
fn autosprite2(frame: &Frame, vertices: &mut [Vertex], indexes: &[u32]) {
    let forward = frame.view_axis[0];
    for (q, quad) in vertices.chunks_exact_mut(4).enumerate() {
        let first_vertex = (q * 4) as u32;
        let quad_indexes = indexes.get(q * 6..q * 6 + 6).unwrap_or(&[]);
        let xyz: Vec<Vec3> = quad.iter().map(|v| Vec3::from(v.xyz)).collect();

        let mut lengths = [0.0f32; 6];
        for (len, [a, b]) in lengths.iter_mut().zip(EDGE_VERTS) {
            *len = xyz[a].distance_squared(xyz[b]);
        }
        let mut order: [usize; 6] = [0, 1, 2, 3, 4, 5];
        order.sort_by(|&a, &b| lengths[a].total_cmp(&lengths[b]));
        let nums = [order[0], order[1]];

        let mid: Vec<Vec3> = nums
            .iter()
            .map(|&n| (xyz[EDGE_VERTS[n][0]] + xyz[EDGE_VERTS[n][1]]) * 0.5)
            .collect();
        let major = mid[1] - mid[0];
        let minor = major.cross(forward).normalize_or_zero();

        for (j, &n) in nums.iter().enumerate() {
            let [v1, v2] = EDGE_VERTS[n];
            let l = 0.5 * lengths[n].sqrt();
            let (a, b) = (first_vertex + v1 as u32, first_vertex + v2 as u32);
            let forward_edge = quad_indexes.windows(2).any(|w| w[0] == a && w[1] == b);
            let (p1, p2) = if forward_edge {
                (mid[j] - minor * l, mid[j] + minor * l)
            } else {
                (mid[j] + minor * l, mid[j] - minor * l)
            };
            quad[v1].xyz = p1.to_array();
            quad[v2].xyz = p2.to_array();
        }
    }
}

/// Apply the material's vertex deforms in order. `indexes` are the
/// batch indexes, needed by the sprite deforms.
pub fn deform(deforms: &[Deform], input: &CalcInput<'_>, vertices: &mut [Vertex], indexes: &[u32]) {
    let tables = input.tables;
    let time = input.time;
    for d in deforms {
        match *d {
            Deform::Wave { spread, wave } => {
                for v in vertices.iter_mut() {
                    let off = (v.xyz[0] + v.xyz[1] + v.xyz[2]) * spread;
                    let shifted = Waveform {
                        phase: wave.phase + off,
                        ..wave
                    };
                    let scale = tables.eval(&shifted, time);
                    let p = Vec3::from(v.xyz) + Vec3::from(v.normal) * scale;
                    v.xyz = p.to_array();
                }
            }
            Deform::Normals { amplitude, frequency } => {
                let t = time * frequency;
                for v in vertices.iter_mut() {
                    let p = Vec3::from(v.xyz) * 0.98;
                    let n = Vec3::from(v.normal)
                        + Vec3::new(
                            tables.noise_at(p, t),
                            tables.noise_at(p + Vec3::splat(100.0), t),
                            tables.noise_at(p + Vec3::splat(200.0), t),
                        ) * amplitude;
                    v.normal = n.normalize_or_zero().to_array();
                }
            }
            Deform::Bulge { width, height, speed } => {
                let now = time * speed;
                for v in vertices.iter_mut() {
                    let off = (v.tc1[0] * width + now) / std::f32::consts::TAU;
                    let scale = tables.sin_cycles(off) * height;
                    let p = Vec3::from(v.xyz) + Vec3::from(v.normal) * scale;
                    v.xyz = p.to_array();
                }
            }
            Deform::Move { vector, wave } => {
                let offset = vector * tables.eval(&wave, time);
                for v in vertices.iter_mut() {
                    v.xyz = (Vec3::from(v.xyz) + offset).to_array();
                }
            }
            Deform::ProjectionShadow => projection_shadow(&input.frame.entity, vertices),
            Deform::AutoSprite => autosprite(input.frame, vertices),
            Deform::AutoSprite2 => autosprite2(input.frame, vertices, indexes),
            // glyph geometry comes from the frontend
            Deform::Text(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::constants::DEFAULT_PORTAL_RANGE;

    fn input<'a>(tables: &'a WaveTables, frame: &'a Frame, config: &'a RendererConfig) -> CalcInput<'a> {
        CalcInput {
            tables,
            frame,
            config,
            portal_range: DEFAULT_PORTAL_RANGE,
            time: 0.0,
            fog: None,
        }
    }

    fn vertex(xyz: [f32; 3], color: [u8; 4]) -> Vertex {
        Vertex {
            xyz,
            normal: [0.0, 0.0, 1.0],
            tc1: [0.25, 0.75],
            tc2: [0.5, 0.5],
            color,
            ..Default::default()
        }
    }

    #[test]
    fn test_wave_tables() {
        let t = WaveTables::new();
        assert_eq!(t.sin_cycles(0.0), 0.0);
        assert!((t.sin_cycles(0.25) - 1.0).abs() < 1e-6);
        assert!((t.sin_cycles(-0.75) - 1.0).abs() < 1e-6);
        let square = Waveform {
            func: WaveFunc::Square,
            base: 0.5,
            amplitude: 0.5,
            phase: 0.0,
            frequency: 1.0,
        };
        assert_eq!(t.eval(&square, 0.1), 1.0);
        assert_eq!(t.eval(&square, 0.6), 0.0);
        let triangle = Waveform {
            func: WaveFunc::Triangle,
            amplitude: 1.0,
            ..square
        };
        assert!((t.eval(&triangle, 0.25) - 1.5).abs() < 1e-6);
        let saw = Waveform {
            func: WaveFunc::Sawtooth,
            base: 0.0,
            amplitude: 1.0,
            ..square
        };
        assert!((t.eval(&saw, 0.5) - 0.5).abs() < 1e-6);
        assert!(t.noise(3.3).abs() <= 1.0);
    }

    #[test]
    fn test_animated_image_frames() {
        let bundle = TextureBundle {
            images: vec![ImageId(1), ImageId(2), ImageId(3)],
            animation_speed: 2.0,
            combined_image: Some(ImageId(9)),
            ..Default::default()
        };
        assert_eq!(animated_image(&bundle, 0.0, false), Some(ImageId(1)));
        assert_eq!(animated_image(&bundle, 0.6, false), Some(ImageId(2)));
        assert_eq!(animated_image(&bundle, 1.5, false), Some(ImageId(1)));
        assert_eq!(animated_image(&bundle, 0.6, true), Some(ImageId(9)));
        assert_eq!(animated_image(&bundle, -5.0, false), Some(ImageId(1)));
    }

    #[test]
    fn test_constant_colors_need_no_array() {
        let tables = WaveTables::new();
        let frame = Frame::default();
        let config = RendererConfig::default();
        let mut scratch = Scratch::new(4096);
        let stage = Stage {
            rgb_gen: ColorGen::Identity,
            alpha_gen: AlphaGen::Const,
            constant_color: [0, 0, 0, 51],
            ..Default::default()
        };
        let verts = [vertex([0.0; 3], [10, 20, 30, 40])];
        let out = compute_colors(&stage, &input(&tables, &frame, &config), &verts, &mut scratch);
        assert_eq!(out, Generated::Constant([1.0, 1.0, 1.0, 0.2]));
        assert_eq!(scratch.free(), scratch.capacity());
    }

    #[test]
    fn test_exact_vertex_colors_pass_through() {
        let tables = WaveTables::new();
        let frame = Frame::default();
        let config = RendererConfig {
            over_bright_bits: 0,
            ..Default::default()
        };
        let mut scratch = Scratch::new(4096);
        let stage = Stage {
            rgb_gen: ColorGen::Vertex,
            alpha_gen: AlphaGen::Skip,
            ..Default::default()
        };
        let verts = [vertex([0.0; 3], [10, 20, 30, 40])];
        let out = compute_colors(&stage, &input(&tables, &frame, &config), &verts, &mut scratch);
        assert_eq!(out, Generated::Field(VertexField::Color));
    }

    #[test]
    fn test_generated_vertex_colors_are_scaled() {
        let tables = WaveTables::new();
        let frame = Frame::default();
        let config = RendererConfig::default();
        let mut scratch = Scratch::new(4096);
        let stage = Stage {
            rgb_gen: ColorGen::Vertex,
            alpha_gen: AlphaGen::Identity,
            ..Default::default()
        };
        let verts = [vertex([0.0; 3], [200, 100, 50, 40])];
        let out = compute_colors(&stage, &input(&tables, &frame, &config), &verts, &mut scratch);
        let Generated::Scratch { ref block, .. } = out else {
            panic!("expected a generated array");
        };
        assert_eq!(scratch.slice::<[u8; 4]>(block)[0], [100, 50, 25, 255]);
        out.release(&mut scratch);
        assert_eq!(scratch.free(), scratch.capacity());
    }

    #[test]
    fn test_diffuse_lighting() {
        let tables = WaveTables::new();
        let mut frame = Frame::default();
        frame.entity.ambient_light = Vec3::splat(20.0);
        frame.entity.directed_light = Vec3::new(300.0, 100.0, 0.0);
        frame.entity.light_dir = Vec3::Z;
        let config = RendererConfig::default();
        let stage = Stage {
            rgb_gen: ColorGen::LightingDiffuse,
            ..Default::default()
        };
        let mut lit = vertex([0.0; 3], [0; 4]);
        let mut unlit = lit;
        unlit.normal = [0.0, 0.0, -1.0];
        lit.normal = [0.0, 0.0, 1.0];
        let mut out = [[0u8; 4]; 2];
        fill_colors(&stage, &input(&tables, &frame, &config), &[lit, unlit], &mut out);
        assert_eq!(out[0], [255, 120, 20, 255]);
        assert_eq!(out[1], [20, 20, 20, 255]);
    }

    #[test]
    fn test_portal_alpha() {
        let tables = WaveTables::new();
        let frame = Frame::default();
        let config = RendererConfig::default();
        let stage = Stage {
            rgb_gen: ColorGen::Identity,
            alpha_gen: AlphaGen::Portal,
            ..Default::default()
        };
        let verts = [vertex([128.0, 0.0, 0.0], [0; 4]), vertex([1000.0, 0.0, 0.0], [0; 4])];
        let mut out = [[0u8; 4]; 2];
        let mut calc = input(&tables, &frame, &config);
        fill_colors(&stage, &calc, &verts, &mut out);
        assert_eq!(out[0][3], 127);
        assert_eq!(out[1][3], 255);
        calc.portal_range = 0.0;
        fill_colors(&stage, &calc, &verts, &mut out);
        assert_eq!(out[1][3], 0);
    }

    #[test]
    fn test_greyscale() {
        let tables = WaveTables::new();
        let frame = Frame::default();
        let config = RendererConfig {
            greyscale: 1.0,
            ..Default::default()
        };
        let stage = Stage {
            rgb_gen: ColorGen::Const,
            constant_color: [255, 0, 0, 255],
            ..Default::default()
        };
        let mut out = [[0u8; 4]; 1];
        fill_colors(&stage, &input(&tables, &frame, &config), &[vertex([0.0; 3], [0; 4])], &mut out);
        assert_eq!(out[0], [54, 54, 54, 255]);
    }

    #[test]
    fn test_texcoord_pass_through_and_generation() {
        let tables = WaveTables::new();
        let frame = Frame::default();
        let config = RendererConfig::default();
        let calc = input(&tables, &frame, &config);
        let mut scratch = Scratch::new(4096);
        let verts = [vertex([1.0, 2.0, 3.0], [0; 4])];

        let plain = TextureBundle {
            tc_gen: TcGen::Lightmap,
            ..Default::default()
        };
        assert_eq!(
            compute_texcoords(&plain, &calc, &verts, &mut scratch),
            Generated::Field(VertexField::Tc2)
        );
        let unset = TextureBundle::default();
        assert_eq!(
            compute_texcoords(&unset, &calc, &verts, &mut scratch),
            Generated::Unspecified
        );

        let vector = TextureBundle {
            tc_gen: TcGen::Vector,
            tc_gen_vectors: [Vec3::X, Vec3::new(0.0, 0.5, 0.0)],
            tex_mods: vec![TexMod::Scale([2.0, 2.0])],
            ..Default::default()
        };
        let mut st = [[0.0; 2]; 1];
        fill_texcoords(&vector, &calc, &verts, &mut st);
        assert_eq!(st[0], [2.0, 2.0]);
    }

    #[test]
    fn test_scroll_and_rotate() {
        let tables = WaveTables::new();
        let frame = Frame::default();
        let config = RendererConfig::default();
        let mut calc = input(&tables, &frame, &config);
        calc.time = 2.5;
        let verts = [vertex([0.0; 3], [0; 4])];

        let mut st = [[0.0, 0.0]];
        apply_tex_mod(&TexMod::Scroll([0.5, -0.1]), &calc, &verts, &mut st);
        assert!((st[0][0] - 0.25).abs() < 1e-5);
        assert!((st[0][1] - 0.75).abs() < 1e-5);

        // a quarter turn moves the texture centre nowhere
        calc.time = 1.0;
        let mut st = [[0.5, 0.5]];
        apply_tex_mod(&TexMod::Rotate(90.0), &calc, &verts, &mut st);
        assert!((st[0][0] - 0.5).abs() < 1e-5);
        assert!((st[0][1] - 0.5).abs() < 1e-5);
    }

    #[test]
    fn test_fog_factor() {
        assert_eq!(fog_factor(0.0, 0.5), 0.0);
        assert_eq!(fog_factor(1.0, 0.0), 0.0);
        assert_eq!(fog_factor(1.0, 31.0 / 32.0), 1.0);
        let half = fog_factor(1.0 / 512.0 + 1.0 / 32.0, 31.0 / 32.0);
        assert!((half - 0.25).abs() < 1e-5);
    }

    #[test]
    fn test_projection_shadow_flattens_to_plane() {
        let mut entity = EntityState {
            light_dir: Vec3::new(0.0, 0.0, 1.0),
            shadow_plane: -10.0,
            ..Default::default()
        };
        entity.origin = Vec3::ZERO;
        let mut verts = [vertex([5.0, 5.0, 20.0], [0; 4]), vertex([0.0, 0.0, -3.0], [0; 4])];
        projection_shadow(&entity, &mut verts);
        assert_eq!(verts[0].xyz, [5.0, 5.0, -10.0]);
        assert_eq!(verts[1].xyz, [0.0, 0.0, -10.0]);
    }

    #[test]
    fn test_move_and_autosprite_deforms() {
        let tables = WaveTables::new();
        let frame = Frame::default();
        let config = RendererConfig::default();
        let calc = input(&tables, &frame, &config);

        let mut verts = [vertex([0.0; 3], [0; 4])];
        let moved = Deform::Move {
            vector: Vec3::new(0.0, 0.0, 4.0),
            wave: Waveform {
                func: WaveFunc::Square,
                base: 0.0,
                amplitude: 1.0,
                phase: 0.0,
                frequency: 1.0,
            },
        };
        deform(&[moved], &calc, &mut verts, &[]);
        assert_eq!(verts[0].xyz, [0.0, 0.0, 4.0]);

        let mut quad = [
            vertex([10.0, 1.0, 0.0], [0; 4]),
            vertex([10.0, -1.0, 0.0], [0; 4]),
            vertex([10.0, -1.0, 2.0], [0; 4]),
            vertex([10.0, 1.0, 2.0], [0; 4]),
        ];
        deform(&[Deform::AutoSprite], &calc, &mut quad, &[0, 1, 2, 0, 2, 3]);
        // faces the viewer looking down +x: all corners share x
        assert!(quad.iter().all(|v| (v.xyz[0] - 10.0).abs() < 1e-5));
        assert_eq!(quad[0].normal, [-1.0, 0.0, 0.0]);
        assert!((quad[0].xyz[1] - 1.0).abs() < 1e-5);
        assert!((quad[0].xyz[2] - 2.0).abs() < 1e-5);
    }
}
