//! Fragment stage text: per-stage texturing and colour, then the blend
//! algebra that folds every pass into one output.

use tessera_core::material::{AlphaGen, ColorGen, TcGen, TexMod, Waveform};
use tessera_core::{Stage, StateBits};

use super::builder::SourceBuilder;
use super::features::{gen_function, FsFeatures, VsFeatures, GEN_FUNCTIONS};
use super::{snippets, Synth, SynthesisError};
use crate::images::BuiltinImage;

/// How the accumulated destination terms ended up, which decides the
/// fixed-function blend of the single remaining pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlendSummary {
    /// The framebuffer contribution is provably zero.
    pub mult_is_zero: bool,
    /// Nothing is added on top of the framebuffer.
    pub add_is_zero: bool,
    /// The multiplier was built as `1 + x` and must be shifted back.
    pub mult_is_one_plus: bool,
}

pub fn emit_declarations(s: &Synth, fs: &mut SourceBuilder) {
    for (i, &tex) in s.tex_index.iter().enumerate() {
        if tex == i {
            fs.owned(format!("uniform sampler2D {};\n", s.tex_name(i)));
        }
    }
    if let Some(info) = s.normal_stage.and_then(|n| s.stage_image(n)) {
        let levels = 31 - info.width.max(info.height).max(1).leading_zeros();
        fs.text("const int HMLevels = ").int(levels as i64);
        fs.text(";\nconst float HMSize = ").float(info.width as f32).text(";\n\n");
    }
    if s.uniform_blocks() {
        fs.text(snippets::UNIFORM_BLOCKS);
    }
    if s.fs.contains(FsFeatures::GET_LIGHT) {
        fs.text("vec3 lightDir;\nvec3 ambientLight;\nvec3 directedLight;\n");
        fs.text(snippets::FN_GET_LIGHT);
    }
    for (bit, body) in GEN_FUNCTIONS {
        if s.fs.intersects(FsFeatures(bit)) {
            fs.text(body);
        }
    }
    if s.fs.contains(FsFeatures::GEN_ROTATE) {
        fs.text(snippets::FN_GEN_ROTATE);
    }
    if let Some(normal) = s.normal_stage {
        if s.config.parallax {
            let (head, tail) = if s.caps.gpu_shader4 {
                (snippets::FN_HEIGHT_MAP_LOD, snippets::FN_HEIGHT_MAP_LOD_TAIL)
            } else {
                (snippets::FN_HEIGHT_MAP_LINEAR, snippets::FN_HEIGHT_MAP_LINEAR_TAIL)
            };
            fs.text(head).owned(s.tex_name(normal)).text(tail);
        }
    }
}

/// `(base + amplitude * genFuncX(phase + frequency* vShadertime))`
fn emit_gen_func(fs: &mut SourceBuilder, wave: &Waveform) -> Result<(), SynthesisError> {
    fs.text("(").float(wave.base).text(" + ").float(wave.amplitude);
    fs.text(" * ").text(gen_function(wave.func)?).text("(");
    fs.float(wave.phase).text(" + ").float(wave.frequency).text("* vShadertime))");
    Ok(())
}

fn emit_main_head(s: &Synth, fs: &mut SourceBuilder) {
    if s.caps.dual_source_blend {
        fs.text(concat!(
            "OUT(vec3 dstColorMult);\n",
            "OUT(vec3 dstColorAdd);\n",
            "\n",
            "void main() {\n",
            "  vec4  srcColor = constants.xxxx;\n",
            "  vec3  tmpColor;\n",
            "  vec2  tc;\n",
            "  vec4  genColor;\n",
            "  dstColorMult = constants.yyy;\n",
            "  dstColorAdd = constants.xxx;\n",
        ));
    } else {
        fs.text(concat!(
            "void main() {\n",
            "  vec4  srcColor = constants.xxxx;\n",
            "  vec3  tmpColor;\n",
            "  vec2  tc;\n",
            "  vec4  genColor;\n",
            "  vec3  dstColorMult = constants.yyy;\n",
            "  vec3  dstColorAdd = constants.xxx;\n",
        ));
    }
    if s.vs.contains(VsFeatures::TEX_COORD) {
        fs.text("  vec2  baseTC = vTexCoord.st;\n");
    }
    if s.fs.contains(FsFeatures::VERTEX) {
        fs.text("  vec3 vertex = vVertex.xyz;\n");
    } else {
        fs.text("  vec3 vertex = vec3(0.0);\n");
    }
    if s.fs.contains(FsFeatures::NORMAL) {
        fs.text("  vec3 normal = normalize(vNormal);\n");
    }
    if s.fs.contains(FsFeatures::TANGENTS) {
        if s.geometry() {
            fs.text("  vec3 uTangent = normalize( vUTangent );\n  vec3 vTangent = normalize( vVTangent );\n");
        } else {
            fs.text(snippets::FS_TANGENTS_FROM_DERIVATIVES);
        }
    }
    if let Some(normal) = s.normal_stage {
        if s.config.parallax {
            fs.text(snippets::FS_PARALLAX);
        } else {
            fs.text("  vec3 tracePos = vec3(baseTC, 1.0);\n");
        }
        if s.fs.contains(FsFeatures::NORMAL) {
            fs.text("  vec3 n = tex2D(").owned(s.tex_name(normal));
            fs.text(", baseTC).xyz * 2.0 - 1.0;\n");
            fs.text("  normal = normalize(n.x * uTangent + n.y * vTangent + n.z * normal);\n");
        }
    }
}

fn emit_get_light(s: &Synth, fs: &mut SourceBuilder) {
    if s.uniform_blocks() {
        fs.text(snippets::FS_LIGHT_GRID);
    } else {
        fs.text(snippets::FS_NO_LIGHT_GRID);
    }
    match s.lightmap_stage {
        Some(lm) if s.config.deluxe_maps => {
            fs.text("  lightDir = normalize(tex2D(").owned(s.tex_name(lm));
            fs.text(", vec2(vTexCoord.p + vLightDir.w, vTexCoord.q)).xyz * 2.0 - 1.0);\n");
        }
        _ if s.fs.contains(FsFeatures::LIGHT_DIR) => {
            fs.text("  lightDir = normalize(vLightDir.xyz);\n");
        }
        _ => {}
    }
    if let Some(lm) = s.lightmap_stage {
        fs.text("  ambientLight = tex2D(").owned(s.tex_name(lm)).text(", vTexCoord.pq).xyz;\n");
    } else if s.fs.contains(FsFeatures::DIFFUSE) {
        fs.text("  ambientLight = vAmbientLight.xyz;\n  directedLight = vDirectedLight.xyz;\n");
    } else if s.vs.contains(VsFeatures::COLOR) {
        fs.text("  ambientLight = vec3(vColor.xyz);\n");
    }
    if let Some(mat) = s.material_stage {
        fs.text("  vec4 material = tex2D(").owned(s.tex_name(mat)).text(", baseTC);\n");
        fs.text(concat!(
            "  float VdotN = max(0.0, dot(normalize(vCameraPos), normal));\n",
            "  float opacity = fresnel(material.w, VdotN);\n",
        ));
    } else {
        fs.text("  vec4 material = vec4(0.5);\n  float opacity = 0.0;\n");
    }
    fs.text(concat!(
        "  vec3 diffuse;\n",
        "  vec4 specular;\n",
        "  getLight(material, vertex.xyz, normal, normalize(-vCameraPos), diffuse, specular);\n",
    ));
}

fn emit_tex_coords(s: &Synth, stage: &Stage, fs: &mut SourceBuilder) -> Result<(), SynthesisError> {
    let bundle = &stage.bundles[0];
    match bundle.tc_gen {
        TcGen::Identity => {
            fs.text("  tc = constants.xx;\n");
        }
        TcGen::Lightmap if bundle.is_lightmap => {
            fs.text("  tc = vTexCoord.pq;\n");
        }
        TcGen::Lightmap => {
            let (w, h) = s.config.lightmap_size;
            fs.text("  tc = vTexCoord.pq * vec2(").vector(&[w as f32, h as f32]).text(");\n");
        }
        TcGen::Texture => {
            fs.text("  tc = baseTC;\n");
        }
        TcGen::Environment => {
            fs.text("  tc = vec2(0.5) + 0.5 * normalize(reflView).yz;\n");
        }
        TcGen::Vector => {
            let [s_vec, t_vec] = bundle.tc_gen_vectors;
            fs.text("  tc = vec2(dot(vVertex, vec3(").vector(&s_vec.to_array()).text(")),\n");
            fs.text("            dot(vVertex, vec3(").vector(&t_vec.to_array()).text(")));\n");
        }
        TcGen::Fog => return Err(SynthesisError::Unsupported("tcGen fog")),
        TcGen::Bad => return Err(SynthesisError::Unsupported("unresolved tcGen")),
    }

    for tex_mod in &bundle.tex_mods {
        match tex_mod {
            TexMod::Transform { matrix, translate } => {
                fs.text("  tc = tc.s * vec2(").vector(&matrix[0]);
                fs.text(") + tc.t * vec2(").vector(&matrix[1]);
                fs.text(") + vec2(").vector(translate).text(");\n");
            }
            TexMod::Turbulent(wave) => {
                fs.text("  tc += ").float(wave.amplitude);
                fs.text(" * sin(6.283185308 * (0.000976563 * vVertex.xy + vec2(");
                fs.float(wave.phase).text(" + ").float(wave.frequency);
                fs.text("* vShadertime)));\n");
            }
            TexMod::Scroll(speed) => {
                fs.text("  tc += vShadertime * vec2(").vector(speed).text(");\n");
            }
            TexMod::Scale(scale) => {
                fs.text("  tc *= vec2(").vector(scale).text(");\n");
            }
            TexMod::Stretch(wave) => {
                fs.text("  tc = vec2(0.5) + (tc - 0.5) / ");
                emit_gen_func(fs, wave)?;
                fs.text(";\n");
            }
            TexMod::Rotate(speed) => {
                fs.text("  tc = vec2(0.5) + genFuncRotate(").float(*speed);
                fs.text(" * vShadertime) * (tc - vec2(0.5));\n");
            }
            TexMod::EntityTranslate => {
                fs.text("  tc += vShadertime * vEntTexCoord;\n");
            }
        }
    }

    // pick the animation frame out of the combined strip
    if let (Some(frame), Some(atlas)) = (
        bundle.image().and_then(|id| s.images.info(id)),
        bundle.combined_image.and_then(|id| s.images.info(id)),
    ) {
        let x_scale = frame.width as f32 / atlas.width.max(1) as f32;
        fs.text("  tc.x = (tc.x + mod(floor(vShadertime * ").float(bundle.animation_speed);
        fs.text("), ").float(bundle.images.len() as f32);
        fs.text(")) * ").float(x_scale).text(";\n");
    }
    Ok(())
}

/// `genColor` for one stage. Returns true when the stage folds the
/// lighting result in after blending.
fn emit_color(s: &Synth, i: usize, stage: &Stage, fs: &mut SourceBuilder) -> Result<bool, SynthesisError> {
    let color = s.constant_colors.get(i).copied().unwrap_or_default();
    let mut light_blend = false;
    let const_rgb = matches!(
        stage.rgb_gen,
        ColorGen::IdentityLighting | ColorGen::Identity | ColorGen::Const
    );

    match stage.rgb_gen {
        ColorGen::IdentityLighting | ColorGen::Identity | ColorGen::Const => {
            fs.text("  genColor = vec4(");
            for c in &color[..3] {
                fs.float(*c as f32 / 255.0).text(", ");
            }
            match stage.alpha_gen {
                AlphaGen::Identity | AlphaGen::Const => {
                    fs.float(color[3] as f32 / 255.0);
                }
                AlphaGen::Entity => {
                    fs.text("vEntColor.a");
                }
                AlphaGen::OneMinusEntity => {
                    fs.text("constants.y - vEntColor.a");
                }
                // replaced below
                _ => {
                    fs.text("constants.x");
                }
            }
            fs.text(");\n");
        }
        ColorGen::Entity => {
            fs.text("  genColor = vEntColor;\n");
        }
        ColorGen::OneMinusEntity => {
            fs.text("  genColor = constants.yyyy - vEntColor;\n");
        }
        ColorGen::ExactVertex => {
            fs.text("  genColor = vColor;\n");
        }
        ColorGen::Vertex => {
            fs.text("  genColor = vColor * constants.zzzy;\n");
        }
        ColorGen::OneMinusVertex => {
            fs.text("  genColor = constants.zzzy - vColor * constants.zzzy;\n");
        }
        ColorGen::Waveform => {
            fs.text("  genColor = vec4(clamp(");
            emit_gen_func(fs, &stage.rgb_wave)?;
            fs.text(", 0.0, 1.0));\n");
        }
        ColorGen::LightingDiffuse => {
            if s.fs.contains(FsFeatures::GET_LIGHT) {
                light_blend = true;
                fs.text("  genColor.rgb = constants.yyy;\n");
            } else {
                fs.text("  genColor.rgb = vDiffuse;\n");
            }
        }
        ColorGen::Fog => return Err(SynthesisError::Unsupported("rgbGen fog")),
        ColorGen::Bad => return Err(SynthesisError::Unsupported("unresolved rgbGen")),
    }

    match stage.alpha_gen {
        AlphaGen::Identity | AlphaGen::Const => {
            if !const_rgb {
                fs.text("  genColor.a = ").float(color[3] as f32 / 255.0).text(";\n");
            }
        }
        AlphaGen::Entity => {
            if !matches!(stage.rgb_gen, ColorGen::Entity | ColorGen::Const) {
                fs.text("  genColor.a = vEntColor.a;\n");
            }
        }
        AlphaGen::OneMinusEntity => {
            if !matches!(stage.rgb_gen, ColorGen::OneMinusEntity | ColorGen::Const) {
                fs.text("  genColor.a = constants.y - vEntColor.a;\n");
            }
        }
        AlphaGen::Vertex => {
            if !matches!(stage.rgb_gen, ColorGen::Vertex | ColorGen::ExactVertex) {
                fs.text("  genColor.a = vColor.a;\n");
            }
        }
        AlphaGen::OneMinusVertex => {
            if stage.rgb_gen != ColorGen::OneMinusVertex {
                fs.text("  genColor.a = constants.y - vColor.a;\n");
            }
        }
        AlphaGen::LightingSpecular => {
            fs.text("  genColor.a = specular.a;\n");
        }
        AlphaGen::Waveform => {
            fs.text("  genColor.a = clamp(");
            emit_gen_func(fs, &stage.alpha_wave)?;
            fs.text(", 0.0, 1.0);\n");
        }
        AlphaGen::Portal => {
            let range = s.material.portal_range;
            let inv = if range > 0.0 { 1.0 / range } else { 0.0 };
            fs.text("  genColor.a = clamp(").float(inv).text(" * length(vCameraPos), 0.0, 1.0);\n");
        }
        AlphaGen::Skip => return Err(SynthesisError::Unsupported("unresolved alphaGen")),
    }

    let image = stage.bundles[0].image();
    if image == Some(s.images.builtin(BuiltinImage::White)) {
        fs.text("  srcColor = genColor;\n");
    } else if image == Some(s.images.builtin(BuiltinImage::IdentityLight)) {
        fs.text("  srcColor = constants.zzzy * genColor;\n");
    } else {
        fs.text("  srcColor = tex2D(").owned(s.tex_name(i)).text(", tc) * genColor;\n");
    }
    Ok(light_blend)
}

/// Fold one stage's blend into the accumulated `dstColorMult` and
/// `dstColorAdd` terms.
fn emit_blend(state: StateBits, summary: &mut BlendSummary, fs: &mut SourceBuilder) -> Result<(), SynthesisError> {
    let src = state.src_blend();
    let dst = state.dst_blend();
    summary.mult_is_one_plus = false;

    fs.text(match dst {
        StateBits::NONE | StateBits::DSTBLEND_ZERO => "  tmpColor = constants.xxx;\n",
        StateBits::DSTBLEND_ONE => "  tmpColor = constants.yyy;\n",
        StateBits::DSTBLEND_SRC_COLOR => "  tmpColor = srcColor.rgb;\n",
        StateBits::DSTBLEND_ONE_MINUS_SRC_COLOR => "  tmpColor = 1.0 - srcColor.rgb;\n",
        StateBits::DSTBLEND_SRC_ALPHA => "  tmpColor = srcColor.aaa;\n",
        StateBits::DSTBLEND_ONE_MINUS_SRC_ALPHA => "  tmpColor = 1.0 - srcColor.aaa;\n",
        _ => return Err(SynthesisError::Unsupported("destination blend factor")),
    });
    let dst_zero = matches!(dst, StateBits::NONE | StateBits::DSTBLEND_ZERO);

    match src {
        StateBits::SRCBLEND_ZERO => {
            fs.text("  dstColorMult *= tmpColor;\n  dstColorAdd *= tmpColor;\n");
            summary.mult_is_zero |= dst_zero;
        }
        StateBits::NONE | StateBits::SRCBLEND_ONE => {
            fs.text("  dstColorMult *= tmpColor;\n  dstColorAdd *= tmpColor;\n  dstColorAdd += srcColor.rgb;\n");
            summary.mult_is_zero |= dst_zero;
            summary.add_is_zero = false;
        }
        StateBits::SRCBLEND_DST_COLOR => {
            summary.mult_is_one_plus = dst == StateBits::DSTBLEND_ONE;
            fs.text("  tmpColor += srcColor.rgb;\n  dstColorMult *= tmpColor;\n  dstColorAdd *= tmpColor;\n");
        }
        StateBits::SRCBLEND_ONE_MINUS_DST_COLOR => {
            fs.text(concat!(
                "  tmpColor -= srcColor.rgb;\n",
                "  dstColorMult *= tmpColor;\n",
                "  dstColorAdd *= tmpColor;\n",
                "  dstColorAdd += srcColor.rgb;\n",
            ));
            summary.add_is_zero = false;
        }
        StateBits::SRCBLEND_SRC_ALPHA => {
            fs.text(concat!(
                "  dstColorMult *= tmpColor;\n",
                "  dstColorAdd *= tmpColor;\n",
                "  dstColorAdd += srcColor.rgb * srcColor.a;\n",
            ));
            summary.mult_is_zero |= dst_zero;
            summary.add_is_zero = false;
        }
        StateBits::SRCBLEND_ONE_MINUS_SRC_ALPHA => {
            fs.text(concat!(
                "  dstColorMult *= tmpColor;\n",
                "  dstColorAdd *= tmpColor;\n",
                "  dstColorAdd += srcColor.rgb * (1.0 - srcColor.a);\n",
            ));
            summary.mult_is_zero |= dst_zero;
            summary.add_is_zero = false;
        }
        _ => return Err(SynthesisError::Unsupported("source blend factor")),
    }
    Ok(())
}

pub fn emit_main(s: &Synth, fs: &mut SourceBuilder) -> Result<BlendSummary, SynthesisError> {
    emit_main_head(s, fs);

    if s.fs.contains(FsFeatures::GET_LIGHT) {
        emit_get_light(s, fs);
    }
    if s.fs.contains(FsFeatures::REFL_VIEW) {
        if s.per_pixel() {
            fs.text("  vec3 reflView = normalize(reflect(vCameraPos, normal));\n");
        } else {
            fs.text("  vec3 reflView = normalize(vReflView);\n");
        }
    }
    if s.fs.contains(FsFeatures::SPECULAR) && !s.fs.contains(FsFeatures::GET_LIGHT) {
        fs.text("  vec4 specular = vec4(vSpecular);\n");
    }

    let mut summary = BlendSummary {
        mult_is_zero: false,
        add_is_zero: true,
        mult_is_one_plus: false,
    };
    let mut atest_start: Option<usize> = None;
    let white = s.images.builtin(BuiltinImage::White);
    let identity_light = s.images.builtin(BuiltinImage::IdentityLight);

    for (i, stage) in s.stages.iter().enumerate() {
        if Some(i) == s.normal_stage || Some(i) == s.material_stage {
            break;
        }
        let state = stage.state;

        // close the previous alpha-tested block unless this pass only
        // redraws its pixels with depth EQUAL
        if let Some(start) = atest_start {
            if !(state.depth_func() == StateBits::DEPTHFUNC_EQUAL && start == 0) {
                fs.text("  }\n");
                atest_start = None;
            }
        }

        let image = stage.bundles[0].image();
        if image != Some(white) && image != Some(identity_light) {
            emit_tex_coords(s, stage, fs)?;
        }

        let light_blend = if Some(i) == s.lightmap_stage && s.fs.contains(FsFeatures::GET_LIGHT) {
            fs.text("  srcColor = vec4(1.0);\n");
            true
        } else {
            emit_color(s, i, stage, fs)?
        };

        let test = state.alpha_test();
        if test != StateBits::NONE {
            fs.text(match test {
                StateBits::ATEST_GT_0 => "  if( srcColor.a > 0.0 ) {\n",
                StateBits::ATEST_LT_80 => "  if( srcColor.a < 0.5 ) {\n",
                StateBits::ATEST_GE_80 => "  if( srcColor.a >= 0.5 ) {\n",
                _ => return Err(SynthesisError::Unsupported("alpha test")),
            });
            atest_start.get_or_insert(i);
        }

        emit_blend(state, &mut summary, fs)?;

        if light_blend {
            fs.text(concat!(
                "  dstColorMult = mix(dstColorMult, vec3(0.0), opacity);\n",
                "  dstColorAdd *= diffuse;\n",
                "  dstColorAdd += specular.rgb;\n",
            ));
        }
        if test != StateBits::NONE && atest_start.is_some_and(|start| start < i) {
            fs.text("  }\n");
        }
    }
    if let Some(start) = atest_start {
        fs.text("  }\n");
        if start == 0 {
            fs.text("  else\n    discard;\n");
        }
    }

    if s.vs.contains(VsFeatures::FOG_NUM) {
        fs.text(snippets::FS_FOG);
    }
    if s.uniform_blocks() && s.fs.contains(FsFeatures::GET_LIGHT) {
        fs.text(snippets::FS_LIGHT_DEBUG);
    }
    if summary.mult_is_one_plus {
        fs.text("  dstColorMult -= vec3(1.0);\n");
    }

    if s.show_depth {
        fs.text("  gl_FragColor = vec4(vec3(0.001 * length(vCameraPos)), 0.0);\n");
    } else if s.caps.dual_source_blend {
        // both terms are already outputs
    } else if summary.add_is_zero {
        fs.text("  gl_FragColor = vec4(dstColorMult.xyz, 1.0);\n");
    } else if summary.mult_is_zero {
        fs.text("  gl_FragColor = vec4(dstColorAdd.xyz, 1.0);\n");
    } else {
        fs.text("  gl_FragColor = vec4(dstColorAdd.xyz, dot(vec3(0.3333), dstColorMult.xyz));\n");
    }
    fs.text("}\n");
    Ok(summary)
}
