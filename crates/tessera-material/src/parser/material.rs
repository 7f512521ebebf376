use glam::Vec3;
use log::warn;

use tessera_core::constants::{DEFAULT_CLOUD_HEIGHT, MAX_SHADER_DEFORMS, MAX_SHADER_STAGES};
use tessera_core::material::{contents, sort, Deform, FogParms, SkyParms};
use tessera_core::{CullType, ImageId, StateBits};

use super::names;
use super::stage::{parse_stage, parse_vector, parse_waveform};
use super::{ParseContext, ParseError, SunParms};
use crate::images::{BuiltinImage, ImageOptions};
use crate::lexer::{atof, Lexer};

const SKY_SUFFIXES: [&str; 6] = ["rt", "bk", "lf", "ft", "up", "dn"];

/// Parse one material body. The cursor sits just after the material name.
/// On success every stage is in `ctx.material.stages`.
pub fn parse_material(lx: &mut Lexer<'_>, ctx: &mut ParseContext<'_>) -> Result<(), ParseError> {
    let name = ctx.material.name.clone();
    let mut polygon_offset = false;

    match lx.next_token(true) {
        Some("{") => {}
        other => {
            let found = other.unwrap_or_default();
            warn!("expecting '{{', found '{found}' instead in material '{name}'");
            return Err(ParseError::MissingOpenBrace(found.to_string()));
        }
    }

    loop {
        let Some(token) = lx.next_token(true) else {
            warn!("no concluding '}}' in material '{name}'");
            return Err(ParseError::UnexpectedEof);
        };
        if token == "}" {
            break;
        }
        if token == "{" {
            if ctx.material.stages.len() >= MAX_SHADER_STAGES {
                warn!("too many stages in material '{name}'");
                return Err(ParseError::TooManyStages(MAX_SHADER_STAGES));
            }
            let stage = parse_stage(lx, ctx)?;
            ctx.material.stages.push(stage);
            continue;
        }

        let keyword = token.to_ascii_lowercase();
        match keyword.as_str() {
            // editor-only keywords
            k if k.starts_with("qer") => lx.skip_rest_of_line(),
            "q3map_sun" => ctx.sun = Some(parse_sun(lx)),
            "deformvertexes" => parse_deform(lx, ctx),
            "tesssize" => lx.skip_rest_of_line(),
            "clamptime" => {
                if let Some(t) = lx.next_token(false) {
                    ctx.material.clamp_time = atof(t);
                }
            }
            // compiler-only keywords
            k if k.starts_with("q3map") => lx.skip_rest_of_line(),
            "surfaceparm" => {
                let parm = lx.next_token(false).and_then(names::info_parm);
                if let Some(parm) = parm {
                    ctx.material.surface_flags |= parm.surface;
                    ctx.material.content_flags |= parm.contents;
                }
            }
            "nomipmaps" => {
                ctx.material.no_mip_maps = true;
                ctx.material.no_pic_mip = true;
            }
            "nopicmip" => ctx.material.no_pic_mip = true,
            "polygonoffset" => polygon_offset = true,
            "entitymergable" => ctx.material.entity_mergable = true,
            "fogparms" => {
                let Some(color) = parse_vector(lx, &name) else {
                    return Err(ParseError::BadVector("fogParms"));
                };
                let Some(depth) = lx.next_token(false) else {
                    warn!("missing parm for 'fogParms' keyword in material '{name}'");
                    continue;
                };
                ctx.material.fog_parms = Some(FogParms {
                    color,
                    depth_for_opaque: atof(depth),
                });
                // old gradient directions
                lx.skip_rest_of_line();
            }
            "portal" => ctx.material.sort = sort::PORTAL,
            "skyparms" => parse_sky(lx, ctx),
            "light" => {
                lx.next_token(false);
            }
            "cull" => {
                let Some(arg) = lx.next_token(false) else {
                    warn!("missing cull parms in material '{name}'");
                    continue;
                };
                match arg.to_ascii_lowercase().as_str() {
                    "none" | "twosided" | "disable" => ctx.material.cull = CullType::TwoSided,
                    "back" | "backside" | "backsided" => ctx.material.cull = CullType::Back,
                    _ => warn!("invalid cull parm '{arg}' in material '{name}'"),
                }
            }
            "sort" => match lx.next_token(false) {
                Some(arg) => ctx.material.sort = names::sort_value(arg),
                None => warn!("missing sort parameter in material '{name}'"),
            },
            _ => {
                warn!("unknown general parameter '{token}' in material '{name}'");
                return Err(ParseError::UnknownKeyword(token.to_string()));
            }
        }
    }

    if ctx.material.stages.is_empty()
        && !ctx.material.is_sky()
        && ctx.material.content_flags & contents::FOG == 0
    {
        return Err(ParseError::NoStages);
    }

    if polygon_offset {
        ctx.material.polygon_offset = true;
        for stage in &mut ctx.material.stages {
            stage.state |= StateBits::POLYGON_OFFSET;
        }
    }
    ctx.material.explicitly_defined = true;
    Ok(())
}

/// `q3map_sun r g b intensity degrees elevation`.
fn parse_sun(lx: &mut Lexer<'_>) -> SunParms {
    let mut v = [0.0f32; 6];
    for slot in &mut v {
        *slot = lx.next_token(false).map_or(0.0, atof);
    }
    let color = Vec3::new(v[0], v[1], v[2]).normalize_or_zero() * v[3];
    let a = v[4].to_radians();
    let b = v[5].to_radians();
    SunParms {
        color,
        direction: Vec3::new(a.cos() * b.cos(), a.sin() * b.cos(), b.sin()),
    }
}

fn parse_deform(lx: &mut Lexer<'_>, ctx: &mut ParseContext<'_>) {
    let name = ctx.material.name.clone();
    let Some(kind) = lx.next_token(false) else {
        warn!("missing deform parm in material '{name}'");
        return;
    };
    if ctx.material.deforms.len() >= MAX_SHADER_DEFORMS {
        warn!("too many deforms in material '{name}'");
        return;
    }

    let mut numbers = |count: usize| -> Option<Vec<f32>> {
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            match lx.next_token(false) {
                Some(t) => out.push(atof(t)),
                None => {
                    warn!("missing deformVertexes parm in material '{name}'");
                    return None;
                }
            }
        }
        Some(out)
    };

    let lower = kind.to_ascii_lowercase();
    let deform = match lower.as_str() {
        "projectionshadow" => Deform::ProjectionShadow,
        "autosprite" => Deform::AutoSprite,
        "autosprite2" => Deform::AutoSprite2,
        k if k.starts_with("text") => {
            let n = k[4..]
                .bytes()
                .next()
                .map(|b| b.wrapping_sub(b'0'))
                .filter(|n| *n <= 7)
                .unwrap_or(0);
            Deform::Text(n)
        }
        "bulge" => {
            let Some(v) = numbers(3) else { return };
            Deform::Bulge {
                width: v[0],
                height: v[1],
                speed: v[2],
            }
        }
        "wave" => {
            let Some(v) = numbers(1) else { return };
            let spread = if v[0] != 0.0 {
                1.0 / v[0]
            } else {
                warn!("illegal div value of 0 in deformVertexes command for material '{name}'");
                100.0
            };
            Deform::Wave {
                spread,
                wave: parse_waveform(lx, &name),
            }
        }
        "normal" => {
            let Some(v) = numbers(2) else { return };
            Deform::Normals {
                amplitude: v[0],
                frequency: v[1],
            }
        }
        "move" => {
            let Some(v) = numbers(3) else { return };
            Deform::Move {
                vector: Vec3::new(v[0], v[1], v[2]),
                wave: parse_waveform(lx, &name),
            }
        }
        _ => {
            warn!("unknown deformVertexes subtype '{kind}' found in material '{name}'");
            return;
        }
    };
    ctx.material.deforms.push(deform);
}

fn load_sky_box(ctx: &mut ParseContext<'_>, base: &str, clamp: bool) -> [ImageId; 6] {
    let fallback = ctx.images.builtin(BuiltinImage::Default);
    let options = ImageOptions {
        mipmap: true,
        allow_picmip: true,
        clamp,
    };
    SKY_SUFFIXES.map(|suffix| {
        ctx.images
            .find_image(&format!("{base}_{suffix}.tga"), options)
            .map_or(fallback, |info| info.id)
    })
}

/// `skyParms <outerbox|-> <cloudheight> <innerbox|->`.
fn parse_sky(lx: &mut Lexer<'_>, ctx: &mut ParseContext<'_>) {
    let name = ctx.material.name.clone();
    let mut sky = SkyParms {
        cloud_height: DEFAULT_CLOUD_HEIGHT,
        ..Default::default()
    };

    let Some(outer) = lx.next_token(false) else {
        warn!("'skyParms' missing parameter in material '{name}'");
        return;
    };
    if outer != "-" {
        sky.outer_box = Some(load_sky_box(ctx, outer, true));
    }

    let Some(height) = lx.next_token(false) else {
        warn!("'skyParms' missing parameter in material '{name}'");
        return;
    };
    let height = atof(height);
    if height != 0.0 {
        sky.cloud_height = height;
    }

    let Some(inner) = lx.next_token(false) else {
        warn!("'skyParms' missing parameter in material '{name}'");
        return;
    };
    if inner != "-" {
        sky.inner_box = Some(load_sky_box(ctx, inner, false));
    }
    ctx.material.sky = Some(sky);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::images::{ImageProvider, ImageTable};
    use tessera_core::material::{surface, ColorGen};
    use tessera_core::{LightmapIndex, Material, RendererConfig};

    fn parse_with(src: &str, table: &mut ImageTable) -> Result<Material, ParseError> {
        let config = RendererConfig::default();
        let mut ctx = ParseContext::new("test", LightmapIndex::Index(0), table, &config);
        let mut lx = Lexer::new(src);
        parse_material(&mut lx, &mut ctx)?;
        Ok(ctx.material)
    }

    fn parse(src: &str) -> Result<Material, ParseError> {
        let mut table = ImageTable::new();
        table.insert("textures/wall.tga", 64, 64, false);
        table.insert("env/sky_up.tga", 64, 64, false);
        table.add_lightmap();
        parse_with(src, &mut table)
    }

    #[test]
    fn test_general_keywords() {
        let m = parse(
            "{\n qer_editorimage foo.tga\n surfaceparm nomarks\n surfaceparm water\n cull none\n sort additive\n polygonOffset\n nomipmaps\n { map textures/wall.tga\n }\n}",
        )
        .unwrap();
        assert_eq!(m.surface_flags, surface::NOMARKS);
        assert_eq!(m.content_flags, contents::WATER);
        assert_eq!(m.cull, CullType::TwoSided);
        assert_eq!(m.sort, sort::BLEND1);
        assert!(m.no_mip_maps && m.no_pic_mip);
        assert!(m.explicitly_defined);
        assert_eq!(m.stages.len(), 1);
        assert!(m.stages[0].state.contains(StateBits::POLYGON_OFFSET));
    }

    #[test]
    fn test_missing_brace() {
        assert_eq!(
            parse("map textures/wall.tga").unwrap_err(),
            ParseError::MissingOpenBrace("map".into())
        );
    }

    #[test]
    fn test_unknown_keyword_aborts() {
        assert_eq!(
            parse("{\n shimmer 4\n}").unwrap_err(),
            ParseError::UnknownKeyword("shimmer".into())
        );
    }

    #[test]
    fn test_too_many_stages() {
        let stage = "{ map textures/wall.tga\n }\n";
        let src = format!("{{\n{}}}", stage.repeat(MAX_SHADER_STAGES + 1));
        assert_eq!(
            parse(&src).unwrap_err(),
            ParseError::TooManyStages(MAX_SHADER_STAGES)
        );
    }

    #[test]
    fn test_zero_stages_rejected_unless_sky_or_fog() {
        assert_eq!(parse("{\n cull back\n}").unwrap_err(), ParseError::NoStages);

        let fog = parse("{\n surfaceparm fog\n fogparms ( 0.5 0.2 0.1 ) 128\n}").unwrap();
        let parms = fog.fog_parms.unwrap();
        assert_eq!(parms.color, Vec3::new(0.5, 0.2, 0.1));
        assert_eq!(parms.depth_for_opaque, 128.0);

        let sky = parse("{\n skyparms env/sky 0 -\n}").unwrap();
        let parms = sky.sky.unwrap();
        assert_eq!(parms.cloud_height, DEFAULT_CLOUD_HEIGHT);
        assert!(parms.inner_box.is_none());
        assert!(parms.outer_box.is_some());
    }

    #[test]
    fn test_sky_box_falls_back_to_default_image() {
        let mut table = ImageTable::new();
        let up = table.insert("env/sky_up.tga", 64, 64, false);
        let m = parse_with("{\n skyparms env/sky 256 -\n}", &mut table).unwrap();
        let sky = m.sky.unwrap();
        let outer = sky.outer_box.unwrap();
        assert_eq!(outer[4], up);
        assert_eq!(outer[0], table.builtin(BuiltinImage::Default));
        assert_eq!(sky.cloud_height, 256.0);
    }

    #[test]
    fn test_bad_fog_vector_fails() {
        assert_eq!(
            parse("{\n fogparms 0.5 0.2 0.1 128\n}").unwrap_err(),
            ParseError::BadVector("fogParms")
        );
    }

    #[test]
    fn test_deforms() {
        let m = parse(
            "{\n deformVertexes wave 0 sin 0 2 0 1\n deformVertexes text9\n deformVertexes bulge 3 4\n deformVertexes autosprite\n deformVertexes normal 1 2\n { map textures/wall.tga\n }\n}",
        )
        .unwrap();
        // bulge is incomplete and dropped; the fourth valid deform is over the limit
        assert_eq!(m.deforms.len(), MAX_SHADER_DEFORMS);
        assert!(matches!(m.deforms[0], Deform::Wave { spread, .. } if spread == 100.0));
        assert_eq!(m.deforms[1], Deform::Text(0));
        assert_eq!(m.deforms[2], Deform::AutoSprite);
    }

    #[test]
    fn test_sun() {
        let mut table = ImageTable::new();
        table.insert("textures/wall.tga", 64, 64, false);
        let config = RendererConfig::default();
        let mut ctx = ParseContext::new("sky", LightmapIndex::None, &mut table, &config);
        let mut lx = Lexer::new("{\n q3map_sun 1 1 1 100 0 90\n { map textures/wall.tga\n }\n}");
        parse_material(&mut lx, &mut ctx).unwrap();
        let sun = ctx.sun.unwrap();
        assert!((sun.color.length() - 100.0).abs() < 1e-3);
        assert!((sun.direction.z - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_reparse_is_deterministic() {
        let src = "{\n { map $lightmap\n }\n { map textures/wall.tga\n blendFunc filter\n rgbGen identity\n }\n}";
        let a = parse(src).unwrap();
        let b = parse(src).unwrap();
        assert_eq!(a.stages, b.stages);
        assert_eq!(a.stages[1].rgb_gen, ColorGen::Identity);
    }
}
