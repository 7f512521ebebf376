//! GPU program synthesis: turn a multi-stage material into one vertex,
//! optional geometry and fragment program that composites every stage in
//! a single pass.
//!
//! [`synthesize`] only produces text and metadata. Compiling and sharing
//! programs is [`crate::program::ProgramCache`]'s job.

mod builder;
mod dialect;
mod features;
mod fragment;
mod snippets;
mod vertex;

use thiserror::Error;

use tessera_core::constants::LIGHTGRID_TEXTURE_UNIT;
use tessera_core::material::{sort, IteratorKind};
use tessera_core::{
    AttrFlags, Attribute, Capabilities, ImageInfo, LightmapIndex, Material, RendererConfig, Stage,
    StateBits,
};

use crate::images::ImageProvider;

pub use builder::{Fragment, SourceBuilder};
pub use dialect::{Dialect, MIN_VERSION};
pub use features::{FsFeatures, VsFeatures};
pub use fragment::BlendSummary;

/// Why a material cannot be expressed as one program. Never fatal; the
/// material falls back to the fixed-function path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SynthesisError {
    #[error("no shading language support")]
    NoProgramSupport,

    #[error("material has no stages or is a sky")]
    NotApplicable,

    #[error("model frame interpolation needs vertex buffers")]
    NoVertexBuffers,

    #[error("shading language version {0:#06x} is too old")]
    VersionTooOld(u16),

    #[error("unsupported feature: {0}")]
    Unsupported(&'static str),

    #[error("{stage} shader failed to compile: {log}")]
    Compile { stage: &'static str, log: String },

    #[error("program failed to link: {0}")]
    Link(String),
}

/// Generated program text plus everything the caller commits to the
/// material when compilation succeeds.
#[derive(Debug, Clone, PartialEq)]
pub struct Synthesized {
    /// Stages after `alphaGen skip` resolution and the stage-0 blend
    /// rewrite, with normal and material map stages appended.
    pub stages: Vec<Stage>,
    pub vertex: String,
    pub geometry: Option<String>,
    pub fragment: String,
    /// Bitmask over [`Attribute::bit`].
    pub attributes: u32,
    pub dual_source: bool,
    pub num_unfogged_passes: usize,
    pub any_attrs: AttrFlags,
    pub all_attrs: AttrFlags,
    /// Sampler uniform name to texture unit.
    pub sampler_units: Vec<(String, u32)>,
    /// Bind the `fogs` and `dLights` blocks after linking. Set for every
    /// non-2D program when the driver has uniform buffers.
    pub bind_uniform_blocks: bool,
    pub blend: BlendSummary,
}

impl Synthesized {
    pub fn apply(self, material: &mut Material) {
        material.stages = self.stages;
        material.num_unfogged_passes = self.num_unfogged_passes;
        material.iterator = IteratorKind::UnifiedProgram;
        material.any_attrs = self.any_attrs;
        material.all_attrs = self.all_attrs;
    }
}

/// Per-stage sources under construction.
pub(crate) struct Sources {
    pub vs: SourceBuilder,
    pub gs: Option<SourceBuilder>,
    pub fs: SourceBuilder,
}

/// Working state of one synthesis run.
pub(crate) struct Synth<'a> {
    pub material: &'a Material,
    /// Private copy; the material is untouched until the program links.
    pub stages: Vec<Stage>,
    pub images: &'a mut dyn ImageProvider,
    pub caps: &'a Capabilities,
    pub config: &'a RendererConfig,
    pub version: u16,
    pub vs: VsFeatures,
    pub fs: FsFeatures,
    pub constant_colors: Vec<[u8; 4]>,
    pub lightmap_stage: Option<usize>,
    pub normal_stage: Option<usize>,
    pub material_stage: Option<usize>,
    /// Sampler each stage reads; stages sharing their first image share one.
    pub tex_index: Vec<usize>,
    pub show_depth: bool,
}

impl Synth<'_> {
    pub fn per_pixel(&self) -> bool {
        self.config.per_pixel_lighting
    }

    pub fn two_d(&self) -> bool {
        self.material.lightmap == LightmapIndex::TwoD
    }

    pub fn md3(&self) -> bool {
        self.material.lightmap == LightmapIndex::Md3
    }

    /// Light grid, dlight tree and fog planes come from uniform blocks.
    pub fn uniform_blocks(&self) -> bool {
        self.per_pixel() && !self.two_d() && self.caps.uniform_buffers
    }

    /// Tangents are computed per triangle in a geometry stage.
    pub fn geometry(&self) -> bool {
        self.fs.contains(FsFeatures::TANGENTS)
            && self.version <= 0x0132
            && self.caps.geometry_shaders
    }

    pub fn tex_name(&self, stage: usize) -> String {
        format!("tex{:02}", self.tex_index.get(stage).copied().unwrap_or(stage))
    }

    pub fn stage_image(&self, stage: usize) -> Option<&ImageInfo> {
        let id = self.stages.get(stage)?.bundles[0].image()?;
        self.images.info(id)
    }

    fn assign_samplers(&mut self) {
        self.tex_index = (0..self.stages.len())
            .map(|i| {
                let image = self.stages[i].bundles[0].image();
                (0..i)
                    .find(|&j| self.stages[j].bundles[0].image() == image)
                    .unwrap_or(i)
            })
            .collect();
    }

    fn emit_headers(&self, dialect: Dialect, src: &mut Sources) {
        src.vs.text(dialect.vertex_header());
        src.fs.text(dialect.fragment_header());
        if let Some(gs) = src.gs.as_mut() {
            gs.text(dialect.geometry_header());
        }
        if self.fs.contains(FsFeatures::TANGENTS) && self.version <= 0x0132 {
            let ext = if self.caps.geometry_shaders {
                concat!(
                    "#extension GL_EXT_geometry_shader4 : enable\n",
                    "#extension GL_EXT_gpu_shader4 : enable\n",
                )
            } else {
                "#extension GL_EXT_gpu_shader4 : enable\n"
            };
            src.vs.text(ext);
            src.fs.text(ext);
        }
        if self.uniform_blocks() {
            src.vs.text("#extension GL_ARB_uniform_buffer_object : enable\n");
            src.fs.text(concat!(
                "#extension GL_ARB_uniform_buffer_object : enable\n",
                "\n",
                "#define SHADER_DLIGHTS\n",
            ));
        }
        src.fs.text("const vec3 constants = vec3( 0.0, 1.0, ");
        src.fs.float(self.config.identity_light()).text(" );\n\n");
    }

    fn attributes(&self) -> u32 {
        let mut bits = Attribute::Vertex.bit()
            | Attribute::TransX.bit()
            | Attribute::TransY.bit()
            | Attribute::TransZ.bit();
        let vs = self.vs;
        let mut add = |on: bool, attr: Attribute| {
            if on {
                bits |= attr.bit();
            }
        };
        add(!self.md3() && vs.contains(VsFeatures::NORMAL), Attribute::Normal);
        add(vs.contains(VsFeatures::COLOR), Attribute::Color);
        add(vs.contains(VsFeatures::ENT_COLOR), Attribute::Color2);
        add(vs.contains(VsFeatures::TEX_COORD), Attribute::TexCoord);
        add(
            vs.intersects(VsFeatures::TEX_COORD2 | VsFeatures::FOG_NUM),
            Attribute::TexCoord2,
        );
        add(self.md3() || vs.contains(VsFeatures::SHADER_TIME), Attribute::Times);
        add(vs.contains(VsFeatures::CAMERA_POS), Attribute::CameraPos);
        add(vs.contains(VsFeatures::LIGHT_DIR), Attribute::LightDir);
        add(vs.contains(VsFeatures::ENT_LIGHT), Attribute::AmbientLight);
        add(vs.contains(VsFeatures::ENT_LIGHT), Attribute::DirectedLight);
        bits
    }

    /// Texture unit per declared sampler. Unit 0 stays with stage 0 for
    /// alpha testing; a later lightmap moves to unit 1 so it rarely rebinds.
    fn sampler_units(&mut self) -> Vec<(String, u32)> {
        let count = self.stages.len();
        let mut units: Vec<(usize, u32)> = Vec::with_capacity(count);
        match self.lightmap_stage {
            Some(lm) if lm > 1 => {
                let (head, tail) = self.stages.split_at_mut(lm);
                std::mem::swap(&mut head[1].bundles[0], &mut tail[0].bundles[0]);
                units.push((0, 0));
                units.push((lm, 1));
                units.extend((2..lm).map(|i| (i, i as u32)));
                units.push((1, lm as u32));
                units.extend((lm + 1..count).map(|i| (i, i as u32)));
            }
            _ => units.extend((0..count).map(|i| (i, i as u32))),
        }

        let mut out: Vec<(String, u32)> = units
            .into_iter()
            .filter(|&(stage, _)| self.tex_index.get(stage) == Some(&stage))
            .map(|(stage, unit)| (format!("tex{stage:02}"), unit))
            .collect();
        if self.md3() && !matches!(self.lightmap_stage, Some(lm) if lm > 1) {
            out.push(("texData".to_string(), count as u32));
        }
        if self.uniform_blocks() {
            out.push(("texLightGrid".to_string(), LIGHTGRID_TEXTURE_UNIT));
        }
        out
    }
}

/// Generate the program for `material`. The material is not modified;
/// on success [`Synthesized::apply`] commits the rewritten stages.
pub fn synthesize(
    material: &Material,
    images: &mut dyn ImageProvider,
    caps: &Capabilities,
    config: &RendererConfig,
) -> Result<Synthesized, SynthesisError> {
    let version = caps.glsl_version_code();
    if version == 0 {
        return Err(SynthesisError::NoProgramSupport);
    }
    if material.stages.is_empty() || material.is_sky() {
        return Err(SynthesisError::NotApplicable);
    }
    if material.lightmap == LightmapIndex::Md3 && !caps.vertex_buffers {
        return Err(SynthesisError::NoVertexBuffers);
    }
    let dialect = Dialect::from_version(version).ok_or(SynthesisError::VersionTooOld(version))?;

    let mut s = Synth {
        material,
        stages: material.stages.clone(),
        images,
        caps,
        config,
        version,
        vs: VsFeatures::NONE,
        fs: FsFeatures::NONE,
        constant_colors: Vec::new(),
        lightmap_stage: None,
        normal_stage: None,
        material_stage: None,
        tex_index: Vec::new(),
        show_depth: false,
    };
    features::analyze(&mut s)?;
    s.assign_samplers();

    let mut src = Sources {
        vs: SourceBuilder::new(),
        gs: s.geometry().then(SourceBuilder::new),
        fs: SourceBuilder::new(),
    };
    s.emit_headers(dialect, &mut src);
    vertex::emit_inputs(&s, &mut src.vs);
    vertex::emit_varyings(&s, &mut src);
    vertex::emit_declarations(&s, &mut src.vs);
    fragment::emit_declarations(&s, &mut src.fs);
    vertex::emit_main(&s, &mut src.vs)?;
    if let Some(gs) = src.gs.as_mut() {
        vertex::emit_geometry_main(&s, gs);
    }
    let blend = fragment::emit_main(&s, &mut src.fs)?;

    let bind_uniform_blocks = !s.two_d() && caps.uniform_buffers;
    let attributes = s.attributes();
    let sampler_units = s.sampler_units();
    let dual_source = caps.dual_source_blend;

    let state = &mut s.stages[0].state;
    *state &= !StateBits::BLEND_BITS;
    if !blend.mult_is_zero {
        *state |= if dual_source {
            StateBits::SRCBLEND_ONE | StateBits::DSTBLEND_SRC1_COLOR
        } else if blend.add_is_zero {
            StateBits::SRCBLEND_DST_COLOR
                | if blend.mult_is_one_plus {
                    StateBits::DSTBLEND_ONE
                } else {
                    StateBits::DSTBLEND_ZERO
                }
        } else {
            StateBits::SRCBLEND_ONE | StateBits::DSTBLEND_SRC_ALPHA
        };
    }

    let (any_attrs, all_attrs) = if material.sort <= sort::PORTAL {
        (AttrFlags::FULL_DYNAMIC, material.all_attrs)
    } else {
        let mask = AttrFlags::COLOR_VTXCOLOR | AttrFlags::TC1_TEXCOORD | AttrFlags::TC2_LMCOORD;
        (mask, mask)
    };

    let num_unfogged_passes = s.stages.len();
    Ok(Synthesized {
        num_unfogged_passes,
        stages: s.stages,
        vertex: src.vs.assemble(),
        geometry: src.gs.map(|gs| gs.assemble()),
        fragment: src.fs.assemble(),
        attributes,
        dual_source,
        any_attrs,
        all_attrs,
        sampler_units,
        bind_uniform_blocks,
        blend,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::material::{AlphaGen, ColorGen, Deform, TcGen, WaveFunc, Waveform};
    use tessera_core::{ImageId, TextureBundle};

    use crate::images::ImageTable;

    fn caps() -> Capabilities {
        Capabilities {
            dual_source_blend: false,
            ..Default::default()
        }
    }

    fn textured(images: &mut ImageTable, name: &str, rgb: ColorGen, alpha: AlphaGen) -> Stage {
        let id = images.insert(name, 64, 64, false);
        let mut stage = Stage {
            rgb_gen: rgb,
            alpha_gen: alpha,
            state: StateBits::DEFAULT,
            ..Default::default()
        };
        stage.bundles[0] = TextureBundle {
            images: vec![id],
            tc_gen: TcGen::Texture,
            ..Default::default()
        };
        stage
    }

    fn material(stages: Vec<Stage>) -> Material {
        Material {
            name: "test".into(),
            lightmap: LightmapIndex::Index(0),
            sort: sort::OPAQUE,
            num_unfogged_passes: stages.len(),
            stages,
            ..Default::default()
        }
    }

    #[test]
    fn test_output_is_deterministic() {
        let mut images = ImageTable::new();
        let stage = textured(&mut images, "textures/a", ColorGen::Vertex, AlphaGen::Vertex);
        let m = material(vec![stage]);
        let config = RendererConfig::default();
        let a = synthesize(&m, &mut images, &caps(), &config).unwrap();
        let b = synthesize(&m, &mut images, &caps(), &config).unwrap();
        assert_eq!(a.vertex, b.vertex);
        assert_eq!(a.fragment, b.fragment);
        assert!(a.vertex.starts_with("#version 110\n"));
    }

    #[test]
    fn test_identity_colour_with_vertex_alpha() {
        let mut images = ImageTable::new();
        let stage = textured(&mut images, "textures/a", ColorGen::Identity, AlphaGen::Vertex);
        let m = material(vec![stage]);
        let out = synthesize(&m, &mut images, &caps(), &RendererConfig::default()).unwrap();
        assert!(out.fragment.contains(
            "  genColor = vec4(1.000000, 1.000000, 1.000000, constants.x);\n  genColor.a = vColor.a;\n"
        ));
        assert!(out.fragment.contains("  srcColor = tex2D(tex00, tc) * genColor;\n"));
        assert!(out.vertex.contains("  vColor = aColor;\n"));
        assert_ne!(out.attributes & Attribute::Color.bit(), 0);
        assert_ne!(out.attributes & Attribute::TexCoord.bit(), 0);
        assert_eq!(out.sampler_units, vec![("tex00".to_string(), 0)]);
    }

    #[test]
    fn test_opaque_stage_writes_add_term() {
        let mut images = ImageTable::new();
        let stage = textured(&mut images, "textures/a", ColorGen::Identity, AlphaGen::Identity);
        let m = material(vec![stage]);
        let out = synthesize(&m, &mut images, &caps(), &RendererConfig::default()).unwrap();
        assert!(out.blend.mult_is_zero);
        assert!(!out.blend.add_is_zero);
        assert!(out.fragment.contains("  gl_FragColor = vec4(dstColorAdd.xyz, 1.0);\n"));
        assert_eq!(out.stages[0].state.blend(), StateBits::NONE);
        assert_eq!(out.num_unfogged_passes, 1);
    }

    #[test]
    fn test_filter_stage_keeps_multiplier() {
        let mut images = ImageTable::new();
        let base = textured(&mut images, "textures/a", ColorGen::Identity, AlphaGen::Identity);
        let mut filter = textured(&mut images, "textures/b", ColorGen::Identity, AlphaGen::Identity);
        filter.state = StateBits::SRCBLEND_DST_COLOR | StateBits::DSTBLEND_ZERO;
        let mut m = material(vec![filter]);
        let out = synthesize(&m, &mut images, &caps(), &RendererConfig::default()).unwrap();
        assert!(!out.blend.mult_is_zero);
        assert!(out.blend.add_is_zero);
        assert_eq!(
            out.stages[0].state.blend(),
            StateBits::SRCBLEND_DST_COLOR | StateBits::DSTBLEND_ZERO
        );

        m.stages.insert(0, base);
        let out = synthesize(&m, &mut images, &caps(), &RendererConfig::default()).unwrap();
        assert!(out.blend.mult_is_zero);
        assert_eq!(out.stages[0].state.blend(), StateBits::NONE);
        assert!(out.fragment.contains("uniform sampler2D tex01;\n"));
    }

    #[test]
    fn test_dual_source_output() {
        let mut images = ImageTable::new();
        let mut stage = textured(&mut images, "textures/a", ColorGen::Identity, AlphaGen::Identity);
        stage.state = StateBits::SRCBLEND_ONE | StateBits::DSTBLEND_ONE;
        let m = material(vec![stage]);
        let caps = Capabilities::default();
        let out = synthesize(&m, &mut images, &caps, &RendererConfig::default()).unwrap();
        assert!(out.dual_source);
        assert!(out.fragment.contains("OUT(vec3 dstColorMult);\n"));
        assert!(!out.fragment.contains("gl_FragColor"));
        assert_eq!(
            out.stages[0].state.blend(),
            StateBits::SRCBLEND_ONE | StateBits::DSTBLEND_SRC1_COLOR
        );
    }

    #[test]
    fn test_tcgen_fog_is_unsupported() {
        let mut images = ImageTable::new();
        let mut stage = textured(&mut images, "textures/a", ColorGen::Identity, AlphaGen::Identity);
        stage.bundles[0].tc_gen = TcGen::Fog;
        let m = material(vec![stage]);
        let err = synthesize(&m, &mut images, &caps(), &RendererConfig::default()).unwrap_err();
        assert_eq!(err, SynthesisError::Unsupported("tcGen fog"));
    }

    #[test]
    fn test_version_too_old() {
        let mut images = ImageTable::new();
        let stage = textured(&mut images, "textures/a", ColorGen::Identity, AlphaGen::Identity);
        let m = material(vec![stage]);
        let caps = Capabilities {
            glsl_version: Some("1.00".into()),
            ..Default::default()
        };
        let err = synthesize(&m, &mut images, &caps, &RendererConfig::default()).unwrap_err();
        assert_eq!(err, SynthesisError::VersionTooOld(0x0100));
    }

    #[test]
    fn test_sky_and_empty_are_not_applicable() {
        let mut images = ImageTable::new();
        let m = material(Vec::new());
        let err = synthesize(&m, &mut images, &caps(), &RendererConfig::default()).unwrap_err();
        assert_eq!(err, SynthesisError::NotApplicable);
    }

    #[test]
    fn test_modern_dialect_header() {
        let mut images = ImageTable::new();
        let stage = textured(&mut images, "textures/a", ColorGen::Identity, AlphaGen::Identity);
        let m = material(vec![stage]);
        let caps = Capabilities {
            glsl_version: Some("3.30".into()),
            ..caps()
        };
        let out = synthesize(&m, &mut images, &caps, &RendererConfig::default()).unwrap();
        assert!(out.vertex.starts_with("#version 150 compatibility\n"));
        assert!(out.fragment.starts_with("#version 150 compatibility\n"));
        assert!(out.geometry.is_none());
    }

    #[test]
    fn test_wave_deform_and_rgb_wave() {
        let mut images = ImageTable::new();
        let mut stage = textured(&mut images, "textures/a", ColorGen::Waveform, AlphaGen::Identity);
        stage.rgb_wave = Waveform {
            func: WaveFunc::Sin,
            base: 0.5,
            amplitude: 0.5,
            phase: 0.0,
            frequency: 1.0,
        };
        let mut m = material(vec![stage]);
        m.deforms.push(Deform::Wave {
            spread: 0.01,
            wave: Waveform {
                func: WaveFunc::Square,
                base: 0.0,
                amplitude: 2.0,
                phase: 0.0,
                frequency: 0.5,
            },
        });
        let out = synthesize(&m, &mut images, &caps(), &RendererConfig::default()).unwrap();
        assert!(out.vertex.contains("float genFuncSquare(in float x)"));
        assert!(out.vertex.contains(
            "  vertex += (0.000000 + 2.000000 * genFuncSquare(0.000000 + dot(vertex.xyz, vec3(0.010000)) + 0.500000 * aTimes.x)) * normal;\n"
        ));
        assert!(out.fragment.contains("float genFuncSin(in float x)"));
        assert!(out.fragment.contains(
            "  genColor = vec4(clamp((0.500000 + 0.500000 * genFuncSin(0.000000 + 1.000000* vShadertime)), 0.0, 1.0));\n"
        ));
        assert_ne!(out.attributes & Attribute::Times.bit(), 0);
    }

    #[test]
    fn test_alpha_test_on_first_stage_discards() {
        let mut images = ImageTable::new();
        let mut stage = textured(&mut images, "textures/a", ColorGen::Identity, AlphaGen::Identity);
        stage.state |= StateBits::ATEST_GE_80;
        let m = material(vec![stage]);
        let out = synthesize(&m, &mut images, &caps(), &RendererConfig::default()).unwrap();
        assert!(out.fragment.contains("  if( srcColor.a >= 0.5 ) {\n"));
        assert!(out.fragment.contains("  }\n  else\n    discard;\n"));
    }

    #[test]
    fn test_lightmap_moves_to_unit_one() {
        let mut images = ImageTable::new();
        let lightmap = images.add_lightmap();
        let a = textured(&mut images, "textures/a", ColorGen::Identity, AlphaGen::Identity);
        let mut b = textured(&mut images, "textures/b", ColorGen::Identity, AlphaGen::Identity);
        b.state = StateBits::SRCBLEND_ONE | StateBits::DSTBLEND_ONE;
        let mut lm = Stage {
            rgb_gen: ColorGen::Identity,
            alpha_gen: AlphaGen::Identity,
            state: StateBits::SRCBLEND_DST_COLOR | StateBits::DSTBLEND_ZERO,
            ..Default::default()
        };
        lm.bundles[0] = TextureBundle {
            images: vec![lightmap],
            tc_gen: TcGen::Lightmap,
            is_lightmap: true,
            ..Default::default()
        };
        let m = material(vec![a, b, lm]);
        let out = synthesize(&m, &mut images, &caps(), &RendererConfig::default()).unwrap();
        assert_eq!(out.stages[1].bundles[0].image(), Some(lightmap));
        assert_eq!(
            out.sampler_units,
            vec![
                ("tex00".to_string(), 0),
                ("tex02".to_string(), 1),
                ("tex01".to_string(), 2),
            ]
        );
        assert!(out.fragment.contains("  tc = vTexCoord.pq;\n"));
    }

    #[test]
    fn test_material_is_not_modified() {
        let mut images = ImageTable::new();
        let stage = textured(&mut images, "textures/a", ColorGen::Identity, AlphaGen::Skip);
        let m = material(vec![stage]);
        let out = synthesize(&m, &mut images, &caps(), &RendererConfig::default()).unwrap();
        assert_eq!(m.stages[0].alpha_gen, AlphaGen::Skip);
        assert_eq!(out.stages[0].alpha_gen, AlphaGen::Identity);
        assert_eq!(m.stages[0].bundles[0].image(), Some(ImageId(6)));
    }
}
