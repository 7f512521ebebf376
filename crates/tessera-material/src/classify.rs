//! Pick the stage iterator for a compiled material and record which vertex
//! attributes stay constant across draws.

use tessera_core::material::{sort, AlphaGen, ColorGen, Deform, IteratorKind, MultitextureEnv, TcGen};
use tessera_core::{AttrFlags, Material, RendererConfig, Stage};

/// Iterator tag plus attribute constancy masks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub iterator: IteratorKind,
    /// Union of attribute kinds over all stages.
    pub any: AttrFlags,
    /// Kinds shared by every stage.
    pub all: AttrFlags,
}

impl Classification {
    pub fn apply(self, material: &mut Material) {
        material.iterator = self.iterator;
        material.any_attrs = self.any;
        material.all_attrs = self.all;
    }
}

fn deform_attrs(deform: &Deform) -> AttrFlags {
    match deform {
        Deform::Wave { .. } | Deform::Bulge { .. } | Deform::Move { .. } => AttrFlags::VERTEX_DYNAMIC,
        Deform::Normals { .. } => AttrFlags::NORMAL_DYNAMIC,
        Deform::ProjectionShadow | Deform::AutoSprite | Deform::AutoSprite2 | Deform::Text(_) => {
            AttrFlags::VERTEX_DYNAMIC | AttrFlags::NORMAL_DYNAMIC
        }
    }
}

fn color_kind(stage: &Stage, greyscale: bool) -> AttrFlags {
    let mut kind = match stage.rgb_gen {
        ColorGen::IdentityLighting
        | ColorGen::Identity
        | ColorGen::Entity
        | ColorGen::OneMinusEntity
        | ColorGen::Const
        | ColorGen::Waveform => AttrFlags::COLOR_UNIFORM,
        ColorGen::ExactVertex | ColorGen::Vertex => AttrFlags::COLOR_VTXCOLOR,
        ColorGen::LightingDiffuse | ColorGen::OneMinusVertex | ColorGen::Bad | ColorGen::Fog => {
            AttrFlags::COLOR_DYNAMIC
        }
    };
    match stage.alpha_gen {
        AlphaGen::Skip => {}
        AlphaGen::Identity
        | AlphaGen::Entity
        | AlphaGen::OneMinusEntity
        | AlphaGen::Const
        | AlphaGen::Waveform => {
            if kind != AttrFlags::COLOR_UNIFORM {
                kind = AttrFlags::COLOR_DYNAMIC;
            }
        }
        AlphaGen::Vertex => {
            if kind != AttrFlags::COLOR_VTXCOLOR {
                kind = AttrFlags::COLOR_DYNAMIC;
            }
        }
        AlphaGen::OneMinusVertex | AlphaGen::LightingSpecular | AlphaGen::Portal => {
            kind = AttrFlags::COLOR_DYNAMIC;
        }
    }
    // greyscale conversion happens on the CPU
    if greyscale && kind == AttrFlags::COLOR_VTXCOLOR {
        kind = AttrFlags::COLOR_DYNAMIC;
    }
    kind
}

fn texcoord_kind(stage: &Stage, bundle: usize) -> AttrFlags {
    let b = &stage.bundles[bundle];
    if !b.tex_mods.is_empty() {
        return AttrFlags::TC1_DYNAMIC;
    }
    match b.tc_gen {
        TcGen::Bad | TcGen::Identity => AttrFlags::TC1_UNIFORM,
        TcGen::Texture => AttrFlags::TC1_TEXCOORD,
        TcGen::Lightmap => AttrFlags::TC1_LMCOORD,
        TcGen::Vector | TcGen::Fog | TcGen::Environment => AttrFlags::TC1_DYNAMIC,
    }
}

/// Classify a finished material. `units` is the number of texture units
/// the collapser could use.
pub fn classify(material: &Material, units: u32, config: &RendererConfig) -> Classification {
    let mut any = AttrFlags::NONE;
    let mut all = AttrFlags::COLOR_MASK | AttrFlags::TC1_MASK | AttrFlags::TC2_MASK;

    if material.is_sky() {
        return Classification {
            iterator: IteratorKind::Sky,
            any: AttrFlags::FULL_DYNAMIC,
            all,
        };
    }

    for deform in &material.deforms {
        any |= deform_attrs(deform);
    }

    let greyscale = config.greyscale > 0.0;
    for stage in &material.stages {
        let kind = color_kind(stage, greyscale);
        any |= kind;
        all &= !AttrFlags::COLOR_MASK | kind;

        for bundle in 0..(units.max(1) as usize).min(stage.bundles.len()) {
            if bundle > 0 && stage.bundles[bundle].multitexture_env == MultitextureEnv::None {
                break;
            }
            let shift = bundle as u32 * AttrFlags::TC_SHIFT;
            let kind = texcoord_kind(stage, bundle) << shift;
            any |= kind;
            all &= !(AttrFlags::TC1_MASK << shift) | kind;
        }
    }

    // mirrors and portals
    if material.sort <= sort::PORTAL {
        any |= AttrFlags::FULL_DYNAMIC;
    }

    let mut iterator = IteratorKind::Generic;
    if !config.ignore_fast_path && material.num_unfogged_passes == 1 {
        if let Some(s) = material.stages.first() {
            let no_deforms = material.deforms.is_empty();
            // skipped alpha evaluates to identity for these generators
            let opaque_alpha = matches!(s.alpha_gen, AlphaGen::Identity | AlphaGen::Skip);
            if s.rgb_gen == ColorGen::LightingDiffuse
                && opaque_alpha
                && s.bundles[0].tc_gen == TcGen::Texture
                && s.bundles[1].multitexture_env == MultitextureEnv::None
                && no_deforms
            {
                iterator = IteratorKind::VertexLit;
            } else if s.rgb_gen == ColorGen::Identity
                && opaque_alpha
                && s.bundles[0].tc_gen == TcGen::Texture
                && s.bundles[1].tc_gen == TcGen::Lightmap
                && no_deforms
                && s.bundles[1].multitexture_env != MultitextureEnv::None
            {
                iterator = IteratorKind::LightmapMultitexture;
            }
        }
    }

    Classification { iterator, any, all }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::material::{SkyParms, TexMod};
    use tessera_core::{ImageId, StateBits, TextureBundle};

    fn stage(rgb: ColorGen, alpha: AlphaGen, tc: TcGen) -> Stage {
        let mut s = Stage {
            rgb_gen: rgb,
            alpha_gen: alpha,
            state: StateBits::DEFAULT,
            ..Default::default()
        };
        s.bundles[0] = TextureBundle {
            images: vec![ImageId(1)],
            tc_gen: tc,
            ..Default::default()
        };
        s
    }

    fn material(stages: Vec<Stage>) -> Material {
        Material {
            sort: sort::OPAQUE,
            num_unfogged_passes: stages.len(),
            stages,
            ..Default::default()
        }
    }

    #[test]
    fn test_vertex_lit_fast_path() {
        let m = material(vec![stage(ColorGen::LightingDiffuse, AlphaGen::Identity, TcGen::Texture)]);
        let c = classify(&m, 2, &RendererConfig::default());
        assert_eq!(c.iterator, IteratorKind::VertexLit);
        assert!(c.any.contains(AttrFlags::COLOR_DYNAMIC));
        assert!(c.any.contains(AttrFlags::TC1_TEXCOORD));
    }

    #[test]
    fn test_vertex_lit_rejected_with_deform() {
        let mut m = material(vec![stage(ColorGen::LightingDiffuse, AlphaGen::Identity, TcGen::Texture)]);
        m.deforms.push(Deform::Normals {
            amplitude: 1.0,
            frequency: 1.0,
        });
        let c = classify(&m, 2, &RendererConfig::default());
        assert_eq!(c.iterator, IteratorKind::Generic);
        assert!(c.any.contains(AttrFlags::NORMAL_DYNAMIC));
    }

    #[test]
    fn test_lightmap_multitexture_fast_path() {
        let mut s = stage(ColorGen::Identity, AlphaGen::Identity, TcGen::Texture);
        s.bundles[1] = TextureBundle {
            images: vec![ImageId(2)],
            tc_gen: TcGen::Lightmap,
            is_lightmap: true,
            multitexture_env: MultitextureEnv::Modulate,
            ..Default::default()
        };
        let m = material(vec![s]);
        let c = classify(&m, 2, &RendererConfig::default());
        assert_eq!(c.iterator, IteratorKind::LightmapMultitexture);
        assert_eq!(
            c.all,
            AttrFlags::COLOR_UNIFORM | AttrFlags::TC1_TEXCOORD | AttrFlags::TC2_LMCOORD
        );
    }

    #[test]
    fn test_skipped_alpha_keeps_fast_path() {
        let m = material(vec![stage(ColorGen::LightingDiffuse, AlphaGen::Skip, TcGen::Texture)]);
        let c = classify(&m, 2, &RendererConfig::default());
        assert_eq!(c.iterator, IteratorKind::VertexLit);
    }

    #[test]
    fn test_ignore_fast_path() {
        let m = material(vec![stage(ColorGen::LightingDiffuse, AlphaGen::Identity, TcGen::Texture)]);
        let config = RendererConfig {
            ignore_fast_path: true,
            ..Default::default()
        };
        assert_eq!(classify(&m, 2, &config).iterator, IteratorKind::Generic);
    }

    #[test]
    fn test_sky_is_fully_dynamic() {
        let m = Material {
            sky: Some(SkyParms::default()),
            ..Default::default()
        };
        let c = classify(&m, 2, &RendererConfig::default());
        assert_eq!(c.iterator, IteratorKind::Sky);
        assert_eq!(c.any, AttrFlags::FULL_DYNAMIC);
    }

    #[test]
    fn test_any_and_all_masks() {
        let a = stage(ColorGen::Identity, AlphaGen::Skip, TcGen::Texture);
        let mut b = stage(ColorGen::Vertex, AlphaGen::Vertex, TcGen::Texture);
        b.bundles[0].tex_mods.push(TexMod::Scroll([1.0, 0.0]));
        let m = material(vec![a, b]);
        let c = classify(&m, 2, &RendererConfig::default());
        assert_eq!(c.iterator, IteratorKind::Generic);
        assert!(c.any.contains(AttrFlags::COLOR_UNIFORM | AttrFlags::COLOR_VTXCOLOR));
        assert!(c.any.contains(AttrFlags::TC1_DYNAMIC | AttrFlags::TC1_TEXCOORD));
        // no single colour or texcoord kind is shared by every stage
        assert_eq!(c.all & AttrFlags::COLOR_MASK, AttrFlags::NONE);
        assert_eq!(c.all & AttrFlags::TC1_MASK, AttrFlags::NONE);
    }

    #[test]
    fn test_greyscale_makes_vertex_colour_dynamic() {
        let m = material(vec![stage(ColorGen::Vertex, AlphaGen::Vertex, TcGen::Texture)]);
        let config = RendererConfig {
            greyscale: 1.0,
            ..Default::default()
        };
        let c = classify(&m, 2, &config);
        assert!(c.any.contains(AttrFlags::COLOR_DYNAMIC));
        assert!(!c.any.contains(AttrFlags::COLOR_VTXCOLOR));
    }

    #[test]
    fn test_portal_sort_forces_dynamic() {
        let mut m = material(vec![stage(ColorGen::Identity, AlphaGen::Skip, TcGen::Texture)]);
        m.sort = sort::PORTAL;
        let c = classify(&m, 2, &RendererConfig::default());
        assert!(c.any.contains(AttrFlags::FULL_DYNAMIC));
    }
}
