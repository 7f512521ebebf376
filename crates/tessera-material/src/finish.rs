//! Post-parse normalisation and the compile pipeline: defaults, sort
//! order, program synthesis or the fixed-function fallbacks, depth
//! pre-pass variants.

use std::sync::atomic::AtomicU32;

use tessera_core::material::{contents, sort, AdjustFog, AlphaGen, ColorGen, FogPass, IteratorKind, TcGen};
use tessera_core::{Capabilities, CullType, LightmapIndex, Material, RendererConfig, Stage, StateBits};

use crate::classify::classify;
use crate::collapse::{collapse_multitexture, vertex_light_collapse};
use crate::glsl::synthesize;
use crate::images::{BuiltinImage, ImageProvider};
use crate::program::{ProgramCache, ShaderCompiler};

/// Collaborators a material is compiled against.
pub struct FinishContext<'a> {
    pub images: &'a mut dyn ImageProvider,
    pub caps: &'a Capabilities,
    pub config: &'a RendererConfig,
    pub programs: &'a mut ProgramCache,
    /// `None` disables program synthesis entirely.
    pub compiler: Option<&'a mut dyn ShaderCompiler>,
    pub shared_depth: SharedDepth,
}

/// Shared depth passes that already exist and may be reused.
#[derive(Debug, Clone, Copy, Default)]
pub struct SharedDepth {
    pub default: bool,
    pub md3: bool,
}

/// Depth pre-pass companion of a finished material.
#[derive(Debug, Default)]
pub enum DepthVariant {
    #[default]
    None,
    /// Share the default material's depth pass.
    Default,
    /// Share the default model material's depth pass.
    DefaultMd3,
    Custom(Box<Material>),
}

#[derive(Debug)]
pub struct Finished {
    pub material: Material,
    pub depth: DepthVariant,
}

/// Fog colour adjustment for a blended stage. Only blends whose
/// contribution fades to nothing as the colour goes to zero qualify.
fn fog_adjustment(state: StateBits) -> AdjustFog {
    let (src, dst) = (state.src_blend(), state.dst_blend());
    if (src == StateBits::SRCBLEND_ONE && dst == StateBits::DSTBLEND_ONE)
        || (src == StateBits::SRCBLEND_ZERO && dst == StateBits::DSTBLEND_ONE_MINUS_SRC_COLOR)
    {
        AdjustFog::ModulateRgb
    } else if src == StateBits::SRCBLEND_SRC_ALPHA && dst == StateBits::DSTBLEND_ONE_MINUS_SRC_ALPHA {
        AdjustFog::ModulateAlpha
    } else if src == StateBits::SRCBLEND_ONE && dst == StateBits::DSTBLEND_ONE_MINUS_SRC_ALPHA {
        AdjustFog::ModulateRgba
    } else {
        AdjustFog::None
    }
}

/// Drop unusable stages, fill in defaults and infer the sort key.
/// Returns whether a lightmap stage survived.
pub fn normalize(material: &mut Material, config: &RendererConfig) -> bool {
    let is_sky = material.is_sky();
    if is_sky {
        material.sort = sort::ENVIRONMENT;
    }
    if material.sort == sort::BAD
        && material
            .stages
            .first()
            .is_some_and(|s| s.state.contains(StateBits::POLYGON_OFFSET))
    {
        material.sort = sort::DECAL;
    }

    if let Some(missing) = material.stages.iter().position(|s| !s.bundles[0].has_image()) {
        log::warn!("material {} has a stage with no image", material.name);
        material.stages.truncate(missing);
    }
    if !config.detail_textures {
        material.stages.retain(|s| !s.is_detail);
    }

    let mut has_lightmap = false;
    let first_blend = material.stages.first().map(|s| s.state.blend()).unwrap_or_default();
    for stage in &mut material.stages {
        let bundle = &mut stage.bundles[0];
        if bundle.is_lightmap {
            has_lightmap = true;
            if bundle.tc_gen == TcGen::Bad {
                bundle.tc_gen = TcGen::Lightmap;
            }
        } else if bundle.tc_gen == TcGen::Bad {
            bundle.tc_gen = TcGen::Texture;
        }

        if stage.state.blend() != StateBits::NONE && first_blend != StateBits::NONE {
            stage.adjust_fog = fog_adjustment(stage.state);
            // portals and environments keep their sort
            if material.sort == sort::BAD {
                material.sort = if stage.state.contains(StateBits::DEPTHMASK_TRUE) {
                    sort::SEE_THROUGH
                } else {
                    sort::BLEND0
                };
            }
        }
        if is_sky {
            stage.state |= StateBits::DEPTHRANGE_1_TO_1;
        }
    }

    if material.sort == sort::BAD {
        material.sort = sort::OPAQUE;
    }
    has_lightmap
}

/// Try a unified program; on any failure the material is untouched.
fn try_program(material: &mut Material, ctx: &mut FinishContext<'_>) -> bool {
    let Some(compiler) = ctx.compiler.as_deref_mut() else {
        return false;
    };
    let out = match synthesize(material, &mut *ctx.images, ctx.caps, ctx.config) {
        Ok(out) => out,
        Err(e) => {
            log::debug!("{}: {e}, using fixed function", material.name);
            return false;
        }
    };
    match ctx.programs.build(compiler, &material.name, &out) {
        Ok(program) => {
            out.apply(material);
            material.program = Some(program);
            true
        }
        Err(e) => {
            log::debug!("{}: {e}, using fixed function", material.name);
            false
        }
    }
}

/// Program first, then the vertex-light and multitexture collapses with
/// classification.
fn compile(material: &mut Material, mut has_lightmap: bool, ctx: &mut FinishContext<'_>) {
    if try_program(material, ctx) {
        return;
    }
    if material.stages.len() > 1 && ctx.config.vertex_light {
        vertex_light_collapse(material);
        has_lightmap = false;
    }
    let mut passes = material.stages.len();
    if passes > 1 {
        passes = collapse_multitexture(&mut material.stages, ctx.caps.units(), ctx.caps.env_add);
    }
    if matches!(material.lightmap, LightmapIndex::Index(_)) && !has_lightmap {
        log::debug!("material {} has lightmap but no lightmap stage", material.name);
        material.lightmap = LightmapIndex::None;
    }
    material.num_unfogged_passes = passes;
    // fog-only materials have no normal passes
    if passes == 0 && !material.is_sky() {
        material.sort = sort::FOG;
    }
    classify(material, ctx.caps.units(), ctx.config).apply(material);
}

/// Fog pass, program alpha-test removal and occlusion query slot.
fn seal(material: &mut Material, ctx: &FinishContext<'_>) {
    material.fog_pass = if material.sort <= sort::OPAQUE {
        FogPass::Equal
    } else if material.content_flags & contents::FOG != 0 {
        FogPass::LessEqual
    } else {
        FogPass::None
    };
    if material.iterator == IteratorKind::UnifiedProgram {
        if let Some(stage) = material.stages.first_mut() {
            stage.state &= !StateBits::ATEST_BITS;
        }
    }
    let writes_color = material
        .stages
        .first()
        .is_some_and(|s| !s.state.contains(StateBits::COLORMASK_FALSE));
    if ctx.caps.occlusion_queries && ctx.config.depth_pass == 0 && !material.is_depth && writes_color {
        material.query = Some(AtomicU32::new(0));
    }
}

/// A depth-only copy of `material` drawing `stage`.
fn depth_material(material: &Material, stage: Stage) -> Material {
    Material {
        name: format!("{}*", material.name),
        lightmap: material.lightmap,
        sort: sort::DEPTH,
        cull: material.cull,
        stages: vec![stage],
        deforms: material.deforms.clone(),
        surface_flags: material.surface_flags,
        content_flags: material.content_flags,
        portal_range: material.portal_range,
        clamp_time: material.clamp_time,
        entity_mergable: material.entity_mergable,
        no_mip_maps: material.no_mip_maps,
        no_pic_mip: material.no_pic_mip,
        polygon_offset: material.polygon_offset,
        explicitly_defined: material.explicitly_defined,
        is_depth: true,
        ..Default::default()
    }
}

fn compile_depth(depth: &mut Material, ctx: &mut FinishContext<'_>) {
    if !try_program(depth, ctx) {
        depth.num_unfogged_passes = 1;
        classify(depth, ctx.caps.units(), ctx.config).apply(depth);
    }
    seal(depth, ctx);
}

fn depth_variant(material: &Material, first: &Stage, ctx: &mut FinishContext<'_>) -> DepthVariant {
    let state = first.state;
    if !state.contains(StateBits::DEPTHMASK_TRUE)
        || state.depth_func() == StateBits::DEPTHFUNC_EQUAL
        || material.lightmap == LightmapIndex::TwoD
    {
        return DepthVariant::None;
    }
    let plain = material.cull == CullType::Front && material.deforms.is_empty();

    let mut stage = first.clone();
    if state.alpha_test() != StateBits::NONE {
        // alpha-tested surfaces need their texture in the depth pass
        stage.state = (state & !StateBits::BLEND_BITS) | StateBits::COLORMASK_FALSE;
    } else if plain && material.lightmap == LightmapIndex::Md3 && ctx.shared_depth.md3 {
        return DepthVariant::DefaultMd3;
    } else if plain && material.lightmap != LightmapIndex::Md3 && ctx.shared_depth.default {
        return DepthVariant::Default;
    } else {
        stage.state = (state & !StateBits::BLEND_BITS) | StateBits::COLORMASK_FALSE;
        let bundle = &mut stage.bundles[0];
        bundle.images = vec![ctx.images.builtin(BuiltinImage::White)];
        bundle.combined_image = None;
        bundle.tc_gen = TcGen::Identity;
        bundle.tex_mods.clear();
        stage.rgb_gen = ColorGen::Identity;
        stage.alpha_gen = AlphaGen::Identity;
    }
    let mut depth = depth_material(material, stage);
    compile_depth(&mut depth, ctx);
    DepthVariant::Custom(Box::new(depth))
}

/// Run every post-parse step on a parsed material.
pub fn finish(mut material: Material, ctx: &mut FinishContext<'_>) -> Finished {
    let has_lightmap = normalize(&mut material, ctx.config);
    compile(&mut material, has_lightmap, ctx);

    // the depth variant starts from the compiled first stage before the
    // program drops its alpha test
    let first = material.stages.first().cloned();
    material.is_depth = false;
    seal(&mut material, ctx);

    let mut depth = DepthVariant::None;
    if ctx.config.depth_pass > 0 && !material.is_sky() {
        if let Some(first) = first {
            depth = depth_variant(&material, &first, ctx);
            if !matches!(depth, DepthVariant::None) {
                material.stages[0].state &= !StateBits::DEPTHMASK_TRUE;
            }
        }
    }
    Finished { material, depth }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::images::ImageTable;
    use crate::lexer::Lexer;
    use crate::parser::{parse_material, ParseContext};
    use tessera_core::material::MultitextureEnv;

    fn caps_without_programs() -> Capabilities {
        Capabilities {
            glsl_version: None,
            ..Default::default()
        }
    }

    fn parse(src: &str, images: &mut ImageTable, config: &RendererConfig) -> Material {
        let mut ctx = ParseContext::new("test", LightmapIndex::Index(0), images, config);
        let mut lx = Lexer::new(src);
        parse_material(&mut lx, &mut ctx).unwrap();
        ctx.material
    }

    fn run(src: &str, config: &RendererConfig) -> Finished {
        let mut images = ImageTable::new();
        images.insert("textures/a", 64, 64, false);
        images.insert("textures/b", 64, 64, true);
        images.add_lightmap();
        let material = parse(src, &mut images, config);
        let caps = caps_without_programs();
        let mut programs = ProgramCache::new();
        let mut ctx = FinishContext {
            images: &mut images,
            caps: &caps,
            config,
            programs: &mut programs,
            compiler: None,
            shared_depth: SharedDepth {
                default: true,
                md3: true,
            },
        };
        finish(material, &mut ctx)
    }

    #[test]
    fn test_fog_adjustment_table() {
        let add = StateBits::SRCBLEND_ONE | StateBits::DSTBLEND_ONE;
        assert_eq!(fog_adjustment(add), AdjustFog::ModulateRgb);
        let blend = StateBits::SRCBLEND_SRC_ALPHA | StateBits::DSTBLEND_ONE_MINUS_SRC_ALPHA;
        assert_eq!(fog_adjustment(blend), AdjustFog::ModulateAlpha);
        let premul = StateBits::SRCBLEND_ONE | StateBits::DSTBLEND_ONE_MINUS_SRC_ALPHA;
        assert_eq!(fog_adjustment(premul), AdjustFog::ModulateRgba);
        let filter = StateBits::SRCBLEND_DST_COLOR | StateBits::DSTBLEND_ZERO;
        assert_eq!(fog_adjustment(filter), AdjustFog::None);
    }

    #[test]
    fn test_opaque_default_sort_and_tcgen() {
        let out = run("{\n{\nmap textures/a\n}\n}", &RendererConfig::default());
        let m = out.material;
        assert_eq!(m.sort, sort::OPAQUE);
        assert_eq!(m.stages[0].bundles[0].tc_gen, TcGen::Texture);
        assert_eq!(m.fog_pass, FogPass::Equal);
        // no lightmap stage
        assert_eq!(m.lightmap, LightmapIndex::None);
        assert!(matches!(out.depth, DepthVariant::None));
    }

    #[test]
    fn test_blended_material_sorts_as_blend() {
        let src = "{\n{\nmap textures/b\nblendFunc blend\n}\n}";
        let m = run(src, &RendererConfig::default()).material;
        assert_eq!(m.sort, sort::BLEND0);
        assert_eq!(m.stages[0].adjust_fog, AdjustFog::ModulateAlpha);
        assert_eq!(m.fog_pass, FogPass::None);
    }

    #[test]
    fn test_lightmap_pair_collapses_to_multitexture() {
        let src = "{\n{\nmap textures/a\nrgbGen identity\n}\n{\nmap $lightmap\nrgbGen identity\nblendFunc filter\n}\n}";
        let m = run(src, &RendererConfig::default()).material;
        assert_eq!(m.stages.len(), 1);
        assert_eq!(m.num_unfogged_passes, 1);
        assert!(m.stages[0].bundles[1].is_lightmap);
        assert_eq!(m.stages[0].bundles[1].tc_gen, TcGen::Lightmap);
        assert_eq!(m.stages[0].bundles[1].multitexture_env, MultitextureEnv::Modulate);
        assert_eq!(m.stages[0].state.blend(), StateBits::NONE);
        assert_eq!(m.lightmap, LightmapIndex::Index(0));
    }

    #[test]
    fn test_detail_stage_dropped_when_disabled() {
        let src = "{\n{\nmap textures/a\n}\n{\nmap textures/b\nblendFunc GL_DST_COLOR GL_SRC_COLOR\ndetail\n}\n}";
        let config = RendererConfig {
            detail_textures: false,
            ..Default::default()
        };
        let m = run(src, &config).material;
        assert_eq!(m.stages.len(), 1);
        assert!(!m.stages[0].is_detail);
    }

    #[test]
    fn test_implicit_disable_pair_renders_opaque() {
        let src = "{\n{\nmap textures/a\nblendFunc GL_ONE GL_ZERO\n}\n{\nmap textures/a\n}\n}";
        let m = run(src, &RendererConfig::default()).material;
        for stage in &m.stages {
            assert_eq!(stage.state.blend(), StateBits::NONE);
            assert!(stage.state.contains(StateBits::DEPTHMASK_TRUE));
        }
        assert_eq!(m.sort, sort::OPAQUE);
    }

    #[test]
    fn test_depth_pass_shares_default() {
        let config = RendererConfig {
            depth_pass: 1,
            ..Default::default()
        };
        let out = run("{\n{\nmap textures/a\n}\n}", &config);
        assert!(matches!(out.depth, DepthVariant::Default));
        assert!(!out.material.stages[0].state.contains(StateBits::DEPTHMASK_TRUE));
        assert!(out.material.query.is_none());
    }

    #[test]
    fn test_alpha_tested_depth_pass_is_custom() {
        let config = RendererConfig {
            depth_pass: 1,
            ..Default::default()
        };
        let src = "{\ncull none\n{\nmap textures/b\nalphaFunc GE128\ndepthWrite\n}\n}";
        let out = run(src, &config);
        let DepthVariant::Custom(depth) = out.depth else {
            panic!("expected a custom depth material");
        };
        assert_eq!(depth.name, "test*");
        assert!(depth.is_depth);
        assert_eq!(depth.sort, sort::DEPTH);
        let state = depth.stages[0].state;
        assert!(state.contains(StateBits::COLORMASK_FALSE));
        assert_eq!(state.alpha_test(), StateBits::ATEST_GE_80);
        assert_eq!(depth.stages[0].bundles[0].images, out.material.stages[0].bundles[0].images);
    }

    #[test]
    fn test_deformed_depth_pass_uses_white_image() {
        let config = RendererConfig {
            depth_pass: 1,
            ..Default::default()
        };
        let src = "{\ndeformVertexes wave 100 sin 0 1 0 1\n{\nmap textures/a\n}\n}";
        let out = run(src, &config);
        let DepthVariant::Custom(depth) = out.depth else {
            panic!("expected a custom depth material");
        };
        let bundle = &depth.stages[0].bundles[0];
        assert_eq!(bundle.tc_gen, TcGen::Identity);
        assert_eq!(bundle.images.len(), 1);
        assert_eq!(depth.stages[0].rgb_gen, ColorGen::Identity);
        assert_eq!(depth.deforms.len(), 1);
    }

    #[test]
    fn test_occlusion_query_slot() {
        let out = run("{\n{\nmap textures/a\n}\n}", &RendererConfig::default());
        assert!(out.material.query.is_some());
    }

    #[test]
    fn test_identity_rgb_vertex_alpha_from_text() {
        let src = "{\n{\nmap textures/a\nrgbGen identity\nalphaGen vertex\n}\n}";
        let config = RendererConfig::default();
        let mut images = ImageTable::new();
        images.insert("textures/a", 64, 64, false);
        let material = parse(src, &mut images, &config);
        assert_eq!(material.stages[0].rgb_gen, ColorGen::Identity);
        assert_eq!(material.stages[0].alpha_gen, AlphaGen::Vertex);

        let caps = caps_without_programs();
        let mut programs = ProgramCache::new();
        let mut ctx = FinishContext {
            images: &mut images,
            caps: &caps,
            config: &config,
            programs: &mut programs,
            compiler: None,
            shared_depth: SharedDepth::default(),
        };
        let m = finish(material, &mut ctx).material;
        // vertex alpha rules out every fast path
        assert_eq!(m.iterator, IteratorKind::Generic);
        assert_eq!(classify(&m, caps.units(), &config).iterator, IteratorKind::Generic);

        let glsl = Capabilities {
            dual_source_blend: false,
            ..Default::default()
        };
        let out = synthesize(&m, &mut images, &glsl, &config).unwrap();
        assert!(out.vertex.contains("  vColor = aColor;\n"));
        assert!(out.fragment.contains(
            "  genColor = vec4(1.000000, 1.000000, 1.000000, constants.x);\n  genColor.a = vColor.a;\n"
        ));
        assert!(out.fragment.contains("  srcColor = tex2D(tex00, tc) * genColor;\n"));
        assert!(out.blend.mult_is_zero);
        assert_eq!(out.stages[0].rgb_gen, ColorGen::Identity);
        assert_eq!(out.stages[0].alpha_gen, AlphaGen::Vertex);
    }
}
