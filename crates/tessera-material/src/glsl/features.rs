//! Which inputs, varyings and helper functions a material's program needs.

use std::ops::{BitOr, BitOrAssign};

use tessera_core::constants::MAX_SHADER_STAGES;
use tessera_core::material::{AlphaGen, ColorGen, Deform, TcGen, TexMod, WaveFunc};
use tessera_core::{ImageId, Stage, StateBits, TextureBundle};

use super::{snippets, Synth, SynthesisError};
use crate::images::{strip_extension, ImageOptions};

macro_rules! feature_set {
    ($(#[$meta:meta])* $name:ident { $($flag:ident = $value:expr,)* }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
        pub struct $name(pub u32);

        impl $name {
            pub const NONE: Self = Self(0);
            $(pub const $flag: Self = Self($value);)*

            pub fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }

            pub fn intersects(self, other: Self) -> bool {
                self.0 & other.0 != 0
            }

            /// Time plus the generator function for `func`.
            pub fn wave(func: WaveFunc) -> Result<Self, SynthesisError> {
                Ok(Self::SHADER_TIME | Self(gen_bit(func)?))
            }
        }

        impl BitOr for $name {
            type Output = Self;
            fn bitor(self, rhs: Self) -> Self {
                Self(self.0 | rhs.0)
            }
        }

        impl BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: Self) {
                self.0 |= rhs.0;
            }
        }
    };
}

feature_set! {
    /// Vertex stage requirements.
    VsFeatures {
        SHADER_TIME = 0x0000_0001,
        NORMAL = 0x0000_0002,
        COLOR = 0x0000_0004,
        ENT_COLOR = 0x0000_0008,
        TEX_COORD = 0x0000_0010,
        TEX_COORD2 = 0x0000_0020,
        CAMERA_POS = 0x0000_0040,
        ENT_LIGHT = 0x0000_0080,
        LIGHT_DIR = 0x0000_0100,
        FOG_NUM = 0x0000_0200,
        GEN_SIN = 0x0000_1000,
        GEN_SQUARE = 0x0000_2000,
        GEN_TRIANGLE = 0x0000_4000,
        GEN_SAWTOOTH = 0x0000_8000,
        GEN_INVERSE_SAWTOOTH = 0x0001_0000,
        GEN_NOISE = 0x0002_0000,
    }
}

feature_set! {
    /// Fragment stage requirements.
    FsFeatures {
        SHADER_TIME = 0x0000_0001,
        VERTEX = 0x0000_0002,
        REFL_VIEW = 0x0000_0004,
        LIGHT_DIR = 0x0000_0008,
        CAMERA_POS = 0x0000_0010,
        NORMAL = 0x0000_0020,
        TANGENTS = 0x0000_0040,
        DIFFUSE = 0x0000_0080,
        SPECULAR = 0x0000_0100,
        GEN_SIN = 0x0000_1000,
        GEN_SQUARE = 0x0000_2000,
        GEN_TRIANGLE = 0x0000_4000,
        GEN_SAWTOOTH = 0x0000_8000,
        GEN_INVERSE_SAWTOOTH = 0x0001_0000,
        GEN_NOISE = 0x0002_0000,
        GEN_ROTATE = 0x0004_0000,
        GET_LIGHT = 0x0008_0000,
    }
}

/// Generator functions in emission order, keyed by the bit shared by
/// both feature sets.
pub const GEN_FUNCTIONS: [(u32, &str); 6] = [
    (0x0000_1000, snippets::FN_GEN_SIN),
    (0x0000_2000, snippets::FN_GEN_SQUARE),
    (0x0000_4000, snippets::FN_GEN_TRIANGLE),
    (0x0000_8000, snippets::FN_GEN_SAWTOOTH),
    (0x0001_0000, snippets::FN_GEN_INVERSE_SAWTOOTH),
    (0x0002_0000, snippets::FN_GEN_NOISE),
];

fn gen_bit(func: WaveFunc) -> Result<u32, SynthesisError> {
    let bit = match func {
        WaveFunc::None => return Err(SynthesisError::Unsupported("waveform without a function")),
        WaveFunc::Sin => 0x0000_1000,
        WaveFunc::Square => 0x0000_2000,
        WaveFunc::Triangle => 0x0000_4000,
        WaveFunc::Sawtooth => 0x0000_8000,
        WaveFunc::InverseSawtooth => 0x0001_0000,
        WaveFunc::Noise => 0x0002_0000,
    };
    Ok(bit)
}

/// GLSL name of the generator for `func`.
pub fn gen_function(func: WaveFunc) -> Result<&'static str, SynthesisError> {
    let name = match func {
        WaveFunc::None => return Err(SynthesisError::Unsupported("waveform without a function")),
        WaveFunc::Sin => "genFuncSin",
        WaveFunc::Square => "genFuncSquare",
        WaveFunc::Triangle => "genFuncTriangle",
        WaveFunc::Sawtooth => "genFuncSawtooth",
        WaveFunc::InverseSawtooth => "genFuncInverseSawtooth",
        WaveFunc::Noise => "genFuncNoise",
    };
    Ok(name)
}

/// Fragment-side waveform: time in both stages, the generator in the
/// fragment stage.
fn fs_wave(func: WaveFunc) -> Result<(VsFeatures, FsFeatures), SynthesisError> {
    Ok((VsFeatures::SHADER_TIME, FsFeatures::wave(func)?))
}

/// Decide the feature sets, resolve `alphaGen skip`, pick up normal and
/// material maps and apply the stage-0 state adjustments.
pub(crate) fn analyze(s: &mut Synth) -> Result<(), SynthesisError> {
    let mut vs = VsFeatures::NONE;
    let mut fs = FsFeatures::NONE;
    let two_d = s.two_d();
    let per_pixel = s.per_pixel();

    if s.config.depth_pass >= 2 && !two_d {
        let state = &mut s.stages[0].state;
        if state.contains(StateBits::COLORMASK_FALSE) {
            *state &= !StateBits::COLORMASK_FALSE;
            vs |= VsFeatures::CAMERA_POS;
            fs |= FsFeatures::VERTEX | FsFeatures::CAMERA_POS;
            s.show_depth = true;
        } else {
            *state |= StateBits::COLORMASK_FALSE;
        }
    }

    // subtractive-looking additive blends on the first stage become plain adds
    let state = &mut s.stages[0].state;
    if state.src_blend() == StateBits::SRCBLEND_ONE_MINUS_DST_COLOR
        && state.dst_blend() == StateBits::DSTBLEND_ONE
    {
        *state = state.with(StateBits::SRCBLEND_BITS, StateBits::SRCBLEND_ONE);
    }
    if state.src_blend() == StateBits::SRCBLEND_ONE
        && state.dst_blend() == StateBits::DSTBLEND_ONE_MINUS_SRC_COLOR
    {
        *state = state.with(StateBits::DSTBLEND_BITS, StateBits::DSTBLEND_ONE);
    }

    for deform in &s.material.deforms {
        match deform {
            Deform::Wave { wave, .. } => {
                vs |= VsFeatures::NORMAL | VsFeatures::wave(wave.func)?;
            }
            Deform::Move { wave, .. } => vs |= VsFeatures::wave(wave.func)?,
            Deform::Normals { .. } => vs |= VsFeatures::SHADER_TIME,
            Deform::Bulge { .. } => {
                vs |= VsFeatures::TEX_COORD | VsFeatures::NORMAL | VsFeatures::SHADER_TIME;
            }
            _ => return Err(SynthesisError::Unsupported("deform")),
        }
    }

    let identity_byte = s.config.identity_light_byte();
    let mut colors = vec![[0u8; 4]; s.stages.len()];
    let mut lightmap_stage = None;

    for (i, stage) in s.stages.iter_mut().enumerate() {
        let bundle = &stage.bundles[0];
        if bundle.is_lightmap {
            lightmap_stage = Some(i);
        }

        match bundle.tc_gen {
            TcGen::Identity => {}
            TcGen::Lightmap | TcGen::Texture => vs |= VsFeatures::TEX_COORD,
            TcGen::Environment => {
                vs |= VsFeatures::NORMAL | VsFeatures::CAMERA_POS;
                fs |= FsFeatures::NORMAL | FsFeatures::REFL_VIEW | FsFeatures::CAMERA_POS;
            }
            TcGen::Vector => fs |= FsFeatures::VERTEX,
            TcGen::Fog => return Err(SynthesisError::Unsupported("tcGen fog")),
            TcGen::Bad => return Err(SynthesisError::Unsupported("unresolved tcGen")),
        }

        for tex_mod in &bundle.tex_mods {
            match tex_mod {
                TexMod::Transform { .. } | TexMod::Scale(_) => {}
                TexMod::Turbulent(_) => {
                    vs |= VsFeatures::SHADER_TIME;
                    fs |= FsFeatures::SHADER_TIME | FsFeatures::VERTEX;
                }
                TexMod::Scroll(_) => {
                    vs |= VsFeatures::SHADER_TIME;
                    fs |= FsFeatures::SHADER_TIME;
                }
                TexMod::Stretch(wave) => {
                    let (v, f) = fs_wave(wave.func)?;
                    vs |= v;
                    fs |= f;
                }
                TexMod::Rotate(_) => {
                    vs |= VsFeatures::SHADER_TIME;
                    fs |= FsFeatures::SHADER_TIME | FsFeatures::GEN_ROTATE;
                }
                TexMod::EntityTranslate => vs |= VsFeatures::TEX_COORD2,
            }
        }
        if bundle.combined_image.is_some() {
            vs |= VsFeatures::SHADER_TIME;
            fs |= FsFeatures::SHADER_TIME;
        }

        let color = &mut colors[i];
        let implied_alpha = match stage.rgb_gen {
            ColorGen::IdentityLighting => {
                color[..3].fill(identity_byte);
                AlphaGen::Identity
            }
            ColorGen::Identity => {
                color[..3].fill(255);
                AlphaGen::Identity
            }
            ColorGen::Entity => {
                vs |= VsFeatures::ENT_COLOR;
                AlphaGen::Entity
            }
            ColorGen::OneMinusEntity => {
                vs |= VsFeatures::ENT_COLOR;
                AlphaGen::OneMinusEntity
            }
            ColorGen::ExactVertex | ColorGen::Vertex => {
                vs |= VsFeatures::COLOR;
                AlphaGen::Vertex
            }
            ColorGen::OneMinusVertex => {
                vs |= VsFeatures::COLOR;
                AlphaGen::OneMinusVertex
            }
            ColorGen::Waveform => {
                let (v, f) = fs_wave(stage.rgb_wave.func)?;
                vs |= v;
                fs |= f;
                AlphaGen::Identity
            }
            ColorGen::LightingDiffuse => {
                vs |= VsFeatures::ENT_LIGHT | VsFeatures::LIGHT_DIR | VsFeatures::NORMAL;
                if per_pixel {
                    vs |= VsFeatures::CAMERA_POS;
                    fs |= FsFeatures::DIFFUSE
                        | FsFeatures::LIGHT_DIR
                        | FsFeatures::NORMAL
                        | FsFeatures::CAMERA_POS
                        | FsFeatures::GET_LIGHT;
                } else {
                    fs |= FsFeatures::DIFFUSE;
                }
                AlphaGen::Identity
            }
            ColorGen::Const => {
                color[..3].copy_from_slice(&stage.constant_color[..3]);
                AlphaGen::Identity
            }
            ColorGen::Fog => return Err(SynthesisError::Unsupported("rgbGen fog")),
            ColorGen::Bad => return Err(SynthesisError::Unsupported("unresolved rgbGen")),
        };

        if stage.alpha_gen == AlphaGen::Skip {
            stage.alpha_gen = implied_alpha;
        }

        match stage.alpha_gen {
            AlphaGen::Identity => color[3] = 255,
            AlphaGen::Entity | AlphaGen::OneMinusEntity => vs |= VsFeatures::ENT_COLOR,
            AlphaGen::Vertex | AlphaGen::OneMinusVertex => vs |= VsFeatures::COLOR,
            AlphaGen::LightingSpecular => {
                vs |= VsFeatures::NORMAL | VsFeatures::LIGHT_DIR | VsFeatures::CAMERA_POS;
                if per_pixel {
                    fs |= FsFeatures::NORMAL
                        | FsFeatures::CAMERA_POS
                        | FsFeatures::LIGHT_DIR
                        | FsFeatures::GET_LIGHT;
                } else {
                    fs |= FsFeatures::REFL_VIEW | FsFeatures::SPECULAR;
                }
            }
            AlphaGen::Waveform => {
                let (v, f) = fs_wave(stage.alpha_wave.func)?;
                vs |= v;
                fs |= f;
            }
            AlphaGen::Portal => {
                vs |= VsFeatures::CAMERA_POS | VsFeatures::NORMAL;
                fs |= FsFeatures::CAMERA_POS;
            }
            AlphaGen::Const => color[3] = stage.constant_color[3],
            AlphaGen::Skip => return Err(SynthesisError::Unsupported("unresolved alphaGen")),
        }
    }

    if s.uniform_blocks() {
        vs |= VsFeatures::FOG_NUM | VsFeatures::CAMERA_POS;
        fs |= FsFeatures::VERTEX | FsFeatures::CAMERA_POS;
    }

    s.vs = vs;
    s.fs = fs;
    s.constant_colors = colors;
    s.lightmap_stage = lightmap_stage;

    if per_pixel && !two_d {
        attach_surface_maps(s);
    }
    Ok(())
}

/// Look for `<diffuse>_nm` and `<diffuse>_mat` next to the first
/// non-lightmap texture and append them as extra sampler stages.
fn attach_surface_maps(s: &mut Synth) {
    let base = if s.stages[0].bundles[0].is_lightmap { 1 } else { 0 };
    let Some(stage) = s.stages.get(base) else {
        return;
    };
    let bundle = &stage.bundles[0];
    if bundle.tc_gen != TcGen::Texture || !bundle.tex_mods.is_empty() {
        return;
    }
    let Some(info) = bundle.image().and_then(|id| s.images.info(id)) else {
        return;
    };
    // built-in images start with '*'
    match info.name.as_bytes().first() {
        Some(&c) if c > b'/' => {}
        _ => return,
    }
    let stem = strip_extension(&info.name);

    s.vs |= VsFeatures::NORMAL | VsFeatures::LIGHT_DIR | VsFeatures::CAMERA_POS;
    s.fs |= FsFeatures::NORMAL
        | FsFeatures::VERTEX
        | FsFeatures::CAMERA_POS
        | FsFeatures::LIGHT_DIR
        | FsFeatures::GET_LIGHT;

    if s.stages.len() < MAX_SHADER_STAGES {
        if let Some(normal_map) = s.images.find_height_map(&format!("{stem}_nm")) {
            s.normal_stage = Some(s.stages.len());
            s.stages.push(sampler_stage(normal_map.id));
            s.fs |= FsFeatures::TANGENTS;
        }
    }
    if s.stages.len() < MAX_SHADER_STAGES {
        if let Some(material_map) = s.images.find_image(&format!("{stem}_mat"), ImageOptions::REPEAT) {
            s.material_stage = Some(s.stages.len());
            s.stages.push(sampler_stage(material_map.id));
        }
    }
}

fn sampler_stage(image: ImageId) -> Stage {
    let mut stage = Stage::default();
    stage.bundles[0] = TextureBundle {
        images: vec![image],
        tc_gen: TcGen::Texture,
        ..Default::default()
    };
    stage
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wave_sets_time_and_generator() {
        let vs = VsFeatures::wave(WaveFunc::Triangle).unwrap();
        assert!(vs.contains(VsFeatures::SHADER_TIME | VsFeatures::GEN_TRIANGLE));
        let fs = FsFeatures::wave(WaveFunc::Noise).unwrap();
        assert!(fs.contains(FsFeatures::SHADER_TIME | FsFeatures::GEN_NOISE));
        assert!(!fs.intersects(FsFeatures::GEN_ROTATE));
    }

    #[test]
    fn test_wave_without_function_fails() {
        assert!(VsFeatures::wave(WaveFunc::None).is_err());
        assert!(gen_function(WaveFunc::None).is_err());
        assert_eq!(gen_function(WaveFunc::InverseSawtooth).unwrap(), "genFuncInverseSawtooth");
    }

    #[test]
    fn test_generator_bits_match_both_sets() {
        for (bit, _) in GEN_FUNCTIONS {
            assert!(VsFeatures(bit).intersects(VsFeatures(0x3_f000)));
            assert!(FsFeatures(bit).intersects(FsFeatures(0x3_f000)));
        }
        assert_eq!(VsFeatures::GEN_NOISE.0, FsFeatures::GEN_NOISE.0);
    }
}
