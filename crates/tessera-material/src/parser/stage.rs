use glam::Vec3;
use log::warn;

use tessera_core::material::{AlphaGen, ColorGen, TcGen, TexMod, WaveFunc, Waveform};
use tessera_core::{LightmapIndex, Stage, StateBits};

use super::names;
use super::{ParseContext, ParseError};
use crate::images::{BuiltinImage, ImageOptions};
use crate::lexer::{atof, Lexer};

/// `func base amplitude phase frequency`. Missing trailing values warn and
/// stay zero.
pub(crate) fn parse_waveform(lx: &mut Lexer<'_>, material: &str) -> Waveform {
    let mut wave = Waveform::default();
    let Some(func) = lx.next_token(false) else {
        warn!("missing waveform parm in material '{material}'");
        return wave;
    };
    wave.func = names::wave_func(func).unwrap_or_else(|| {
        warn!("invalid genfunc name '{func}' in material '{material}'");
        WaveFunc::Sin
    });
    for slot in [
        &mut wave.base,
        &mut wave.amplitude,
        &mut wave.phase,
        &mut wave.frequency,
    ] {
        match lx.next_token(false) {
            Some(t) => *slot = atof(t),
            None => {
                warn!("missing waveform parm in material '{material}'");
                break;
            }
        }
    }
    wave
}

/// `( x y z )`.
pub(crate) fn parse_vector(lx: &mut Lexer<'_>, material: &str) -> Option<Vec3> {
    if lx.next_token(false) != Some("(") {
        warn!("missing parenthesis in material '{material}'");
        return None;
    }
    let mut v = [0.0f32; 3];
    for slot in &mut v {
        let Some(t) = lx.next_token(false) else {
            warn!("missing vector element in material '{material}'");
            return None;
        };
        *slot = atof(t);
    }
    if lx.next_token(false) != Some(")") {
        warn!("missing parenthesis in material '{material}'");
        return None;
    }
    Some(Vec3::from(v))
}

/// Parse the already-collected tokens of one `tcMod` line. `None` when the
/// modifier is unknown or incomplete.
fn parse_tex_mod(tokens: &[&str], material: &str) -> Option<TexMod> {
    let (&kind, args) = tokens.split_first()?;
    let need = |n: usize| -> Option<Vec<f32>> {
        if args.len() < n {
            warn!("missing tcMod {kind} parms in material '{material}'");
            return None;
        }
        Some(args[..n].iter().map(|t| atof(t)).collect())
    };
    let kind_lower = kind.to_ascii_lowercase();
    let tex_mod = match kind_lower.as_str() {
        "turb" => {
            let v = need(4)?;
            TexMod::Turbulent(Waveform {
                func: WaveFunc::Sin,
                base: v[0],
                amplitude: v[1],
                phase: v[2],
                frequency: v[3],
            })
        }
        "scale" => {
            let v = need(2)?;
            TexMod::Scale([v[0], v[1]])
        }
        "scroll" => {
            let v = need(2)?;
            TexMod::Scroll([v[0], v[1]])
        }
        "stretch" => {
            if args.len() < 5 {
                warn!("missing tcMod stretch parms in material '{material}'");
                return None;
            }
            let func = names::wave_func(args[0]).unwrap_or_else(|| {
                warn!("invalid genfunc name '{}' in material '{material}'", args[0]);
                WaveFunc::Sin
            });
            TexMod::Stretch(Waveform {
                func,
                base: atof(args[1]),
                amplitude: atof(args[2]),
                phase: atof(args[3]),
                frequency: atof(args[4]),
            })
        }
        "transform" => {
            let v = need(6)?;
            TexMod::Transform {
                matrix: [[v[0], v[1]], [v[2], v[3]]],
                translate: [v[4], v[5]],
            }
        }
        "rotate" => TexMod::Rotate(need(1)?[0]),
        "entitytranslate" => TexMod::EntityTranslate,
        _ => {
            warn!("unknown tcMod '{kind}' in material '{material}'");
            return None;
        }
    };
    Some(tex_mod)
}

fn image_options(ctx: &ParseContext<'_>, clamp: bool) -> ImageOptions {
    ImageOptions {
        mipmap: !ctx.material.no_mip_maps,
        allow_picmip: !ctx.material.no_pic_mip,
        clamp,
    }
}

fn required<'a>(
    lx: &mut Lexer<'a>,
    keyword: &'static str,
    material: &str,
) -> Result<&'a str, ParseError> {
    lx.next_token(false).ok_or_else(|| {
        warn!("missing parameter for '{keyword}' keyword in material '{material}'");
        ParseError::MissingParameter(keyword)
    })
}

/// Parse one `{ ... }` stage block. The opening brace has been consumed.
pub fn parse_stage(lx: &mut Lexer<'_>, ctx: &mut ParseContext<'_>) -> Result<Stage, ParseError> {
    let mut stage = Stage::default();
    let mut depth_mask = StateBits::DEPTHMASK_TRUE;
    let mut depth_mask_explicit = false;
    let mut src = StateBits::NONE;
    let mut dst = StateBits::NONE;
    let mut atest = StateBits::NONE;
    let mut depth_func = StateBits::NONE;
    let name = ctx.material.name.clone();

    loop {
        let Some(token) = lx.next_token(true) else {
            warn!("no matching '}}' found in material '{name}'");
            return Err(ParseError::UnexpectedEof);
        };
        if token == "}" {
            break;
        }
        let keyword = token.to_ascii_lowercase();
        match keyword.as_str() {
            "map" => {
                let arg = required(lx, "map", &name)?;
                let image = if arg.eq_ignore_ascii_case("$whiteimage") {
                    ctx.images.builtin(BuiltinImage::White)
                } else if arg.eq_ignore_ascii_case("$lightmap") {
                    stage.bundles[0].is_lightmap = true;
                    let lightmap = match ctx.material.lightmap {
                        LightmapIndex::Index(n) => ctx.images.lightmap(n),
                        _ => None,
                    };
                    lightmap.unwrap_or_else(|| ctx.images.builtin(BuiltinImage::White))
                } else {
                    let opts = image_options(ctx, false);
                    let Some(info) = ctx.images.find_image(arg, opts) else {
                        warn!("could not find image '{arg}' in material '{name}'");
                        return Err(ParseError::MissingImage(arg.to_string()));
                    };
                    info.id
                };
                stage.bundles[0].images = vec![image];
            }
            "clampmap" => {
                let arg = required(lx, "clampmap", &name)?;
                let opts = image_options(ctx, true);
                let Some(info) = ctx.images.find_image(arg, opts) else {
                    warn!("could not find image '{arg}' in material '{name}'");
                    return Err(ParseError::MissingImage(arg.to_string()));
                };
                stage.bundles[0].images = vec![info.id];
            }
            "animmap" => {
                let speed = required(lx, "animMap", &name)?;
                stage.bundles[0].animation_speed = atof(speed);
                stage.bundles[0].images.clear();
                let opts = image_options(ctx, false);
                while let Some(frame) = lx.next_token(false) {
                    if !stage.bundles[0].can_push_frame() {
                        continue;
                    }
                    let Some(info) = ctx.images.find_image(frame, opts) else {
                        warn!("could not find image '{frame}' in material '{name}'");
                        return Err(ParseError::MissingImage(frame.to_string()));
                    };
                    stage.bundles[0].push_frame(info.id);
                }
                if stage.bundles[0].images.len() > 1 {
                    stage.bundles[0].combined_image =
                        ctx.images.combine_images(&stage.bundles[0].images);
                }
            }
            "videomap" => {
                let arg = required(lx, "videoMap", &name)?;
                if let Some((handle, image)) = ctx.images.video_map(arg) {
                    stage.bundles[0].video_map = Some(handle);
                    stage.bundles[0].images = vec![image];
                }
            }
            "alphafunc" => {
                let arg = required(lx, "alphaFunc", &name)?;
                atest = names::alpha_func(arg).unwrap_or_else(|| {
                    warn!("invalid alphaFunc name '{arg}' in material '{name}'");
                    StateBits::NONE
                });
            }
            "depthfunc" => {
                let arg = required(lx, "depthfunc", &name)?;
                if arg.eq_ignore_ascii_case("lequal") {
                    depth_func = StateBits::DEPTHFUNC_LEQUAL;
                } else if arg.eq_ignore_ascii_case("equal") {
                    depth_func = StateBits::DEPTHFUNC_EQUAL;
                } else {
                    warn!("unknown depthfunc '{arg}' in material '{name}'");
                }
            }
            "detail" => stage.is_detail = true,
            "blendfunc" => {
                let Some(arg) = lx.next_token(false) else {
                    warn!("missing parm for blendFunc in material '{name}'");
                    continue;
                };
                if arg.eq_ignore_ascii_case("add") {
                    src = StateBits::SRCBLEND_ONE;
                    dst = StateBits::DSTBLEND_ONE;
                } else if arg.eq_ignore_ascii_case("filter") {
                    src = StateBits::SRCBLEND_DST_COLOR;
                    dst = StateBits::DSTBLEND_ZERO;
                } else if arg.eq_ignore_ascii_case("blend") {
                    src = StateBits::SRCBLEND_SRC_ALPHA;
                    dst = StateBits::DSTBLEND_ONE_MINUS_SRC_ALPHA;
                } else {
                    src = names::src_blend(arg).unwrap_or_else(|| {
                        warn!("unknown blend mode '{arg}' in material '{name}', substituting GL_ONE");
                        StateBits::SRCBLEND_ONE
                    });
                    let Some(arg) = lx.next_token(false) else {
                        warn!("missing parm for blendFunc in material '{name}'");
                        continue;
                    };
                    dst = names::dst_blend(arg).unwrap_or_else(|| {
                        warn!("unknown blend mode '{arg}' in material '{name}', substituting GL_ONE");
                        StateBits::DSTBLEND_ONE
                    });
                }
                if !depth_mask_explicit {
                    depth_mask = StateBits::NONE;
                }
            }
            "rgbgen" => parse_rgb_gen(lx, ctx, &mut stage),
            "alphagen" => parse_alpha_gen(lx, ctx, &mut stage),
            "tcgen" | "texgen" => {
                let Some(arg) = lx.next_token(false) else {
                    warn!("missing texgen parm in material '{name}'");
                    continue;
                };
                let bundle = &mut stage.bundles[0];
                match arg.to_ascii_lowercase().as_str() {
                    "environment" => bundle.tc_gen = TcGen::Environment,
                    "lightmap" => bundle.tc_gen = TcGen::Lightmap,
                    "texture" | "base" => bundle.tc_gen = TcGen::Texture,
                    "vector" => {
                        bundle.tc_gen_vectors[0] = parse_vector(lx, &name).unwrap_or_default();
                        bundle.tc_gen_vectors[1] = parse_vector(lx, &name).unwrap_or_default();
                        bundle.tc_gen = TcGen::Vector;
                    }
                    _ => warn!("unknown texgen parm '{arg}' in material '{name}'"),
                }
            }
            "tcmod" => {
                let tokens = lx.rest_of_line();
                if !stage.bundles[0].can_add_texmod() {
                    warn!("too many tcMod stages in material '{name}'");
                    return Err(ParseError::TooManyTexMods);
                }
                if let Some(tex_mod) = parse_tex_mod(&tokens, &name) {
                    stage.bundles[0].tex_mods.push(tex_mod);
                }
            }
            "depthwrite" => {
                depth_mask = StateBits::DEPTHMASK_TRUE;
                depth_mask_explicit = true;
            }
            _ => {
                warn!("unknown parameter '{token}' in material '{name}'");
                return Err(ParseError::UnknownStageKeyword(token.to_string()));
            }
        }
    }

    // Destination alpha is always 1.
    if src == StateBits::SRCBLEND_DST_ALPHA {
        src = StateBits::SRCBLEND_ONE;
    } else if src == StateBits::SRCBLEND_ONE_MINUS_DST_ALPHA {
        src = StateBits::SRCBLEND_ZERO;
    }
    if dst == StateBits::DSTBLEND_DST_ALPHA {
        dst = StateBits::DSTBLEND_ONE;
    } else if dst == StateBits::DSTBLEND_ONE_MINUS_DST_ALPHA {
        dst = StateBits::DSTBLEND_ZERO;
    }

    let has_alpha = stage.bundles[0]
        .image()
        .and_then(|id| ctx.images.info(id))
        .map_or(true, |info| info.has_alpha);
    if !has_alpha && stage.alpha_gen == AlphaGen::Identity {
        if src == StateBits::SRCBLEND_SRC_ALPHA {
            src = StateBits::SRCBLEND_ONE;
        } else if src == StateBits::SRCBLEND_ONE_MINUS_SRC_ALPHA {
            src = StateBits::SRCBLEND_ZERO;
        }
        if dst == StateBits::DSTBLEND_SRC_ALPHA {
            dst = StateBits::DSTBLEND_ONE;
        } else if dst == StateBits::DSTBLEND_ONE_MINUS_SRC_ALPHA {
            dst = StateBits::DSTBLEND_ZERO;
        }
        atest = StateBits::NONE;
    } else if src == StateBits::SRCBLEND_SRC_ALPHA
        && dst == StateBits::DSTBLEND_ONE_MINUS_SRC_ALPHA
        && atest == StateBits::NONE
    {
        atest = StateBits::ATEST_GT_0;
    }

    if stage.rgb_gen == ColorGen::Bad {
        stage.rgb_gen = if src == StateBits::NONE
            || src == StateBits::SRCBLEND_ONE
            || src == StateBits::SRCBLEND_SRC_ALPHA
        {
            ColorGen::IdentityLighting
        } else {
            ColorGen::Identity
        };
    }

    // GL_ONE GL_ZERO is no blending at all.
    if src == StateBits::SRCBLEND_ONE && dst == StateBits::DSTBLEND_ZERO {
        src = StateBits::NONE;
        dst = StateBits::NONE;
        depth_mask = StateBits::DEPTHMASK_TRUE;
    }

    if stage.alpha_gen == AlphaGen::Identity
        && matches!(stage.rgb_gen, ColorGen::Identity | ColorGen::LightingDiffuse)
    {
        stage.alpha_gen = AlphaGen::Skip;
    }

    stage.state = depth_mask | src | dst | atest | depth_func;
    Ok(stage)
}

fn parse_rgb_gen(lx: &mut Lexer<'_>, ctx: &ParseContext<'_>, stage: &mut Stage) {
    let name = &ctx.material.name;
    let Some(arg) = lx.next_token(false) else {
        warn!("missing parameters for rgbGen in material '{name}'");
        return;
    };
    stage.rgb_gen = match arg.to_ascii_lowercase().as_str() {
        "wave" => {
            stage.rgb_wave = parse_waveform(lx, name);
            ColorGen::Waveform
        }
        "const" => {
            let color = parse_vector(lx, name).unwrap_or_default() * 255.0;
            stage.constant_color[0] = color.x as u8;
            stage.constant_color[1] = color.y as u8;
            stage.constant_color[2] = color.z as u8;
            ColorGen::Const
        }
        "identity" => ColorGen::Identity,
        "identitylighting" if ctx.config.over_bright_bits == 0 => ColorGen::Identity,
        "identitylighting" => ColorGen::IdentityLighting,
        "entity" => ColorGen::Entity,
        "oneminusentity" => ColorGen::OneMinusEntity,
        "vertex" => {
            if stage.alpha_gen == AlphaGen::Identity {
                stage.alpha_gen = AlphaGen::Vertex;
            }
            ColorGen::Vertex
        }
        "exactvertex" => ColorGen::ExactVertex,
        "lightingdiffuse" => ColorGen::LightingDiffuse,
        "oneminusvertex" => ColorGen::OneMinusVertex,
        _ => {
            warn!("unknown rgbGen parameter '{arg}' in material '{name}'");
            return;
        }
    };
}

fn parse_alpha_gen(lx: &mut Lexer<'_>, ctx: &mut ParseContext<'_>, stage: &mut Stage) {
    let name = ctx.material.name.clone();
    let Some(arg) = lx.next_token(false) else {
        warn!("missing parameters for alphaGen in material '{name}'");
        return;
    };
    stage.alpha_gen = match arg.to_ascii_lowercase().as_str() {
        "wave" => {
            stage.alpha_wave = parse_waveform(lx, &name);
            AlphaGen::Waveform
        }
        "const" => {
            let value = lx.next_token(false).map_or(0.0, atof);
            stage.constant_color[3] = (255.0 * value) as u8;
            AlphaGen::Const
        }
        "identity" => AlphaGen::Identity,
        "entity" => AlphaGen::Entity,
        "oneminusentity" => AlphaGen::OneMinusEntity,
        "vertex" => AlphaGen::Vertex,
        "lightingspecular" => AlphaGen::LightingSpecular,
        "oneminusvertex" => AlphaGen::OneMinusVertex,
        "portal" => {
            ctx.material.portal_range = match lx.next_token(false) {
                Some(range) => atof(range),
                None => {
                    warn!("missing range parameter for alphaGen portal in material '{name}', defaulting to 256");
                    tessera_core::constants::DEFAULT_PORTAL_RANGE
                }
            };
            AlphaGen::Portal
        }
        _ => {
            warn!("unknown alphaGen parameter '{arg}' in material '{name}'");
            return;
        }
    };
}
