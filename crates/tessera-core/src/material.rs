use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use glam::Vec3;

use crate::constants::{MAX_IMAGE_ANIMATIONS, MAX_TEXMODS, NUM_TEXTURE_BUNDLES};
use crate::program::Program;
use crate::state::{CullType, StateBits};
use crate::types::{AttrFlags, ImageId, LightmapIndex};

/// Periodic function driving waves, texcoord stretches and deforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WaveFunc {
    #[default]
    None,
    Sin,
    Square,
    Triangle,
    Sawtooth,
    InverseSawtooth,
    Noise,
}

/// `base + amplitude * func(phase + time * frequency)`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Waveform {
    pub func: WaveFunc,
    pub base: f32,
    pub amplitude: f32,
    pub phase: f32,
    pub frequency: f32,
}

/// Source of a stage's RGB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ColorGen {
    /// Not specified in text; resolved at the end of stage parsing.
    #[default]
    Bad,
    IdentityLighting,
    Identity,
    Entity,
    OneMinusEntity,
    ExactVertex,
    Vertex,
    OneMinusVertex,
    Waveform,
    LightingDiffuse,
    Fog,
    Const,
}

/// Source of a stage's alpha.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AlphaGen {
    #[default]
    Identity,
    /// Alpha is irrelevant to the result.
    Skip,
    Entity,
    OneMinusEntity,
    Vertex,
    OneMinusVertex,
    LightingSpecular,
    Waveform,
    Portal,
    Const,
}

/// Texture coordinate source of a bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TcGen {
    #[default]
    Bad,
    Identity,
    Lightmap,
    Texture,
    Environment,
    Fog,
    Vector,
}

/// One texture coordinate modifier, applied in declaration order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TexMod {
    Turbulent(Waveform),
    Scale([f32; 2]),
    Scroll([f32; 2]),
    Stretch(Waveform),
    Transform { matrix: [[f32; 2]; 2], translate: [f32; 2] },
    Rotate(f32),
    EntityTranslate,
}

/// Fixed-function combine mode of a second texture unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MultitextureEnv {
    #[default]
    None,
    Modulate,
    Replace,
    Decal,
    Add,
}

/// How fog darkens a blended stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AdjustFog {
    #[default]
    None,
    ModulateRgb,
    ModulateAlpha,
    ModulateRgba,
}

/// Vertex deformation applied before any stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Deform {
    Wave { spread: f32, wave: Waveform },
    Normals { amplitude: f32, frequency: f32 },
    Bulge { width: f32, height: f32, speed: f32 },
    Move { vector: Vec3, wave: Waveform },
    ProjectionShadow,
    AutoSprite,
    AutoSprite2,
    Text(u8),
}

/// Fog overlay depth comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FogPass {
    #[default]
    None,
    Equal,
    LessEqual,
}

/// Iteration strategy selected for a material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IteratorKind {
    #[default]
    Generic,
    VertexLit,
    LightmapMultitexture,
    /// Single generated GPU program covering every stage.
    UnifiedProgram,
    Sky,
    /// Stencil shadow volumes.
    Shadow,
    PreparePortal,
    FinalisePortal,
    CopyDepth,
    /// Marker: upload the batch into a static vertex buffer.
    BuildVbo,
    /// Marker: upload the batch into a static index buffer.
    BuildIbo,
}

/// Named sort keys. Materials may also use any number in between.
pub mod sort {
    pub const BAD: f32 = 0.0;
    pub const DEPTH: f32 = 0.5;
    /// Depth buffer copy, between the depth pre-pass and portals.
    pub const COPY_DEPTH: f32 = 0.75;
    pub const PORTAL: f32 = 1.0;
    pub const ENVIRONMENT: f32 = 2.0;
    pub const OPAQUE: f32 = 3.0;
    pub const DECAL: f32 = 4.0;
    pub const SEE_THROUGH: f32 = 5.0;
    pub const BANNER: f32 = 6.0;
    pub const FOG: f32 = 7.0;
    pub const UNDERWATER: f32 = 8.0;
    pub const BLEND0: f32 = 9.0;
    pub const BLEND1: f32 = 10.0;
    pub const BLEND2: f32 = 11.0;
    pub const BLEND3: f32 = 12.0;
    pub const BLEND6: f32 = 13.0;
    pub const STENCIL_SHADOW: f32 = 14.0;
    pub const ALMOST_NEAREST: f32 = 15.0;
    pub const NEAREST: f32 = 16.0;
}

/// Content bits set by `surfaceparm`.
pub mod contents {
    pub const LAVA: u32 = 0x0000_0008;
    pub const SLIME: u32 = 0x0000_0010;
    pub const WATER: u32 = 0x0000_0020;
    pub const FOG: u32 = 0x0000_0040;
    pub const AREAPORTAL: u32 = 0x0000_8000;
    pub const PLAYERCLIP: u32 = 0x0001_0000;
    pub const MONSTERCLIP: u32 = 0x0002_0000;
    pub const CLUSTERPORTAL: u32 = 0x0010_0000;
    pub const DONOTENTER: u32 = 0x0020_0000;
    pub const ORIGIN: u32 = 0x0100_0000;
    pub const DETAIL: u32 = 0x0800_0000;
    pub const STRUCTURAL: u32 = 0x1000_0000;
    pub const TRANSLUCENT: u32 = 0x2000_0000;
    pub const NODROP: u32 = 0x8000_0000;
}

/// Surface bits set by `surfaceparm`.
pub mod surface {
    pub const NODAMAGE: u32 = 0x1;
    pub const SLICK: u32 = 0x2;
    pub const SKY: u32 = 0x4;
    pub const LADDER: u32 = 0x8;
    pub const NOIMPACT: u32 = 0x10;
    pub const NOMARKS: u32 = 0x20;
    pub const FLESH: u32 = 0x40;
    pub const NODRAW: u32 = 0x80;
    pub const HINT: u32 = 0x100;
    pub const NOLIGHTMAP: u32 = 0x400;
    pub const POINTLIGHT: u32 = 0x800;
    pub const METALSTEPS: u32 = 0x1000;
    pub const NOSTEPS: u32 = 0x2000;
    pub const NONSOLID: u32 = 0x4000;
    pub const LIGHTFILTER: u32 = 0x8000;
    pub const ALPHASHADOW: u32 = 0x1_0000;
    pub const NODLIGHT: u32 = 0x2_0000;
    pub const DUST: u32 = 0x4_0000;
}

/// Images and coordinate generation for one texture unit of a stage.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TextureBundle {
    /// Animation frames; a single entry for static maps.
    pub images: Vec<ImageId>,
    pub animation_speed: f32,
    /// Atlas holding every frame, for programs that pick frames on the GPU.
    pub combined_image: Option<ImageId>,
    pub tc_gen: TcGen,
    pub tc_gen_vectors: [Vec3; 2],
    pub tex_mods: Vec<TexMod>,
    pub is_lightmap: bool,
    pub video_map: Option<u32>,
    pub multitexture_env: MultitextureEnv,
}

impl TextureBundle {
    /// First frame, if any image is bound.
    pub fn image(&self) -> Option<ImageId> {
        self.images.first().copied()
    }

    pub fn has_image(&self) -> bool {
        !self.images.is_empty()
    }

    pub fn can_push_frame(&self) -> bool {
        self.images.len() < MAX_IMAGE_ANIMATIONS
    }

    /// Push an animation frame, ignoring frames beyond the limit.
    pub fn push_frame(&mut self, image: ImageId) -> bool {
        if self.images.len() >= MAX_IMAGE_ANIMATIONS {
            return false;
        }
        self.images.push(image);
        true
    }

    pub fn can_add_texmod(&self) -> bool {
        self.tex_mods.len() < MAX_TEXMODS
    }
}

/// One compositing pass of a material.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Stage {
    pub bundles: [TextureBundle; NUM_TEXTURE_BUNDLES],
    pub rgb_gen: ColorGen,
    pub rgb_wave: Waveform,
    pub alpha_gen: AlphaGen,
    pub alpha_wave: Waveform,
    /// RGBA bytes for `const` generators.
    pub constant_color: [u8; 4],
    pub state: StateBits,
    pub is_detail: bool,
    pub adjust_fog: AdjustFog,
}

impl Stage {
    /// True when bundle 1 carries a folded multitexture partner.
    pub fn is_multitextured(&self) -> bool {
        self.bundles[1].multitexture_env != MultitextureEnv::None
    }

    /// Every image this stage samples, in bundle order.
    pub fn images(&self) -> impl Iterator<Item = ImageId> + '_ {
        self.bundles.iter().flat_map(|b| b.images.iter().copied())
    }
}

/// Six-face sky boxes and cloud layer height.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SkyParms {
    pub outer_box: Option<[ImageId; 6]>,
    pub inner_box: Option<[ImageId; 6]>,
    pub cloud_height: f32,
}

/// Colour and opaque distance of a fog volume material.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FogParms {
    pub color: Vec3,
    pub depth_for_opaque: f32,
}

/// A compiled material.
#[derive(Debug, Default)]
pub struct Material {
    /// Lower-cased, extension-stripped name.
    pub name: String,
    pub lightmap: LightmapIndex,
    pub sort: f32,
    pub cull: CullType,
    pub stages: Vec<Stage>,
    pub deforms: Vec<Deform>,
    pub sky: Option<SkyParms>,
    pub fog_parms: Option<FogParms>,
    pub surface_flags: u32,
    pub content_flags: u32,
    pub portal_range: f32,
    pub clamp_time: f32,
    pub entity_mergable: bool,
    pub no_mip_maps: bool,
    pub no_pic_mip: bool,
    pub polygon_offset: bool,
    pub explicitly_defined: bool,
    /// Parse failed or the image was missing.
    pub default_shader: bool,
    pub is_depth: bool,
    pub fog_pass: FogPass,
    /// Stages drawn before the fog pass.
    pub num_unfogged_passes: usize,
    pub iterator: IteratorKind,
    pub any_attrs: AttrFlags,
    pub all_attrs: AttrFlags,
    pub program: Option<Arc<Program>>,
    /// Registry index of the depth pre-pass variant.
    pub depth_shader: Option<usize>,
    /// Registry index of the material this one is redirected to.
    pub remapped: Option<usize>,
    pub time_offset: f32,
    pub index: usize,
    pub sorted_index: usize,
    /// Samples passed in the last occlusion query. `None` when queries are off.
    pub query: Option<AtomicU32>,
}

impl Material {
    pub fn new(name: &str, lightmap: LightmapIndex) -> Self {
        Self {
            name: name.to_string(),
            lightmap,
            ..Default::default()
        }
    }

    pub fn is_sky(&self) -> bool {
        self.sky.is_some()
    }

    /// Stage 0 writes depth.
    pub fn writes_depth(&self) -> bool {
        self.stages
            .first()
            .is_some_and(|s| s.state.contains(StateBits::DEPTHMASK_TRUE))
    }

    /// Last occlusion query result, 0 when no query is attached.
    pub fn query_result(&self) -> u32 {
        self.query
            .as_ref()
            .map_or(0, |q| q.load(Ordering::Relaxed))
    }

    pub fn store_query_result(&self, samples: u32) {
        if let Some(q) = &self.query {
            q.store(samples, Ordering::Relaxed);
        }
    }

    /// Every image referenced by the drawable stages.
    pub fn images(&self) -> Vec<ImageId> {
        self.stages.iter().flat_map(|s| s.images()).collect()
    }
}
