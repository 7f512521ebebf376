//! Keyword tables shared by the stage and material parsers.

use tessera_core::material::{contents, sort, surface, WaveFunc};
use tessera_core::StateBits;

use crate::lexer::atof;

pub fn alpha_func(name: &str) -> Option<StateBits> {
    if name.eq_ignore_ascii_case("GT0") {
        Some(StateBits::ATEST_GT_0)
    } else if name.eq_ignore_ascii_case("LT128") {
        Some(StateBits::ATEST_LT_80)
    } else if name.eq_ignore_ascii_case("GE128") {
        Some(StateBits::ATEST_GE_80)
    } else {
        None
    }
}

const SRC_BLEND_NAMES: [(&str, StateBits); 9] = [
    ("GL_ONE", StateBits::SRCBLEND_ONE),
    ("GL_ZERO", StateBits::SRCBLEND_ZERO),
    ("GL_DST_COLOR", StateBits::SRCBLEND_DST_COLOR),
    ("GL_ONE_MINUS_DST_COLOR", StateBits::SRCBLEND_ONE_MINUS_DST_COLOR),
    ("GL_SRC_ALPHA", StateBits::SRCBLEND_SRC_ALPHA),
    ("GL_ONE_MINUS_SRC_ALPHA", StateBits::SRCBLEND_ONE_MINUS_SRC_ALPHA),
    ("GL_DST_ALPHA", StateBits::SRCBLEND_DST_ALPHA),
    ("GL_ONE_MINUS_DST_ALPHA", StateBits::SRCBLEND_ONE_MINUS_DST_ALPHA),
    ("GL_SRC_ALPHA_SATURATE", StateBits::SRCBLEND_ALPHA_SATURATE),
];

const DST_BLEND_NAMES: [(&str, StateBits); 8] = [
    ("GL_ONE", StateBits::DSTBLEND_ONE),
    ("GL_ZERO", StateBits::DSTBLEND_ZERO),
    ("GL_SRC_ALPHA", StateBits::DSTBLEND_SRC_ALPHA),
    ("GL_ONE_MINUS_SRC_ALPHA", StateBits::DSTBLEND_ONE_MINUS_SRC_ALPHA),
    ("GL_DST_ALPHA", StateBits::DSTBLEND_DST_ALPHA),
    ("GL_ONE_MINUS_DST_ALPHA", StateBits::DSTBLEND_ONE_MINUS_DST_ALPHA),
    ("GL_SRC_COLOR", StateBits::DSTBLEND_SRC_COLOR),
    ("GL_ONE_MINUS_SRC_COLOR", StateBits::DSTBLEND_ONE_MINUS_SRC_COLOR),
];

fn lookup<T: Copy>(table: &[(&str, T)], name: &str) -> Option<T> {
    table
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|&(_, v)| v)
}

pub fn src_blend(name: &str) -> Option<StateBits> {
    lookup(&SRC_BLEND_NAMES, name)
}

pub fn dst_blend(name: &str) -> Option<StateBits> {
    lookup(&DST_BLEND_NAMES, name)
}

pub fn wave_func(name: &str) -> Option<WaveFunc> {
    lookup(
        &[
            ("sin", WaveFunc::Sin),
            ("square", WaveFunc::Square),
            ("triangle", WaveFunc::Triangle),
            ("sawtooth", WaveFunc::Sawtooth),
            ("inversesawtooth", WaveFunc::InverseSawtooth),
            ("noise", WaveFunc::Noise),
        ],
        name,
    )
}

/// Named sort value, or the number itself.
pub fn sort_value(name: &str) -> f32 {
    lookup(
        &[
            ("portal", sort::PORTAL),
            ("sky", sort::ENVIRONMENT),
            ("opaque", sort::OPAQUE),
            ("decal", sort::DECAL),
            ("seeThrough", sort::SEE_THROUGH),
            ("banner", sort::BANNER),
            ("additive", sort::BLEND1),
            ("nearest", sort::NEAREST),
            ("underwater", sort::UNDERWATER),
        ],
        name,
    )
    .unwrap_or_else(|| atof(name))
}

/// Flags a `surfaceparm` name sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InfoParm {
    pub surface: u32,
    pub contents: u32,
}

const fn parm(surface: u32, contents: u32) -> InfoParm {
    InfoParm { surface, contents }
}

const INFO_PARMS: [(&str, InfoParm); 32] = [
    ("water", parm(0, contents::WATER)),
    ("slime", parm(0, contents::SLIME)),
    ("lava", parm(0, contents::LAVA)),
    ("playerclip", parm(0, contents::PLAYERCLIP)),
    ("monsterclip", parm(0, contents::MONSTERCLIP)),
    ("nodrop", parm(0, contents::NODROP)),
    ("nonsolid", parm(surface::NONSOLID, 0)),
    ("origin", parm(0, contents::ORIGIN)),
    ("trans", parm(0, contents::TRANSLUCENT)),
    ("detail", parm(0, contents::DETAIL)),
    ("structural", parm(0, contents::STRUCTURAL)),
    ("areaportal", parm(0, contents::AREAPORTAL)),
    ("clusterportal", parm(0, contents::CLUSTERPORTAL)),
    ("donotenter", parm(0, contents::DONOTENTER)),
    ("fog", parm(0, contents::FOG)),
    ("sky", parm(surface::SKY, 0)),
    ("lightfilter", parm(surface::LIGHTFILTER, 0)),
    ("alphashadow", parm(surface::ALPHASHADOW, 0)),
    ("hint", parm(surface::HINT, 0)),
    ("slick", parm(surface::SLICK, 0)),
    ("noimpact", parm(surface::NOIMPACT, 0)),
    ("nomarks", parm(surface::NOMARKS, 0)),
    ("ladder", parm(surface::LADDER, 0)),
    ("nodamage", parm(surface::NODAMAGE, 0)),
    ("metalsteps", parm(surface::METALSTEPS, 0)),
    ("flesh", parm(surface::FLESH, 0)),
    ("nosteps", parm(surface::NOSTEPS, 0)),
    ("nodraw", parm(surface::NODRAW, 0)),
    ("pointlight", parm(surface::POINTLIGHT, 0)),
    ("nolightmap", parm(surface::NOLIGHTMAP, 0)),
    ("nodlight", parm(surface::NODLIGHT, 0)),
    ("dust", parm(surface::DUST, 0)),
];

pub fn info_parm(name: &str) -> Option<InfoParm> {
    lookup(&INFO_PARMS, name)
}

/// Bucket of a material name in a `size`-entry table (power of two).
/// Case and path separators are folded and hashing stops at the first `.`.
pub fn name_hash(name: &str, size: usize) -> usize {
    let mut hash: i64 = 0;
    for (i, b) in name.bytes().enumerate() {
        if b == b'.' {
            break;
        }
        let letter = match b.to_ascii_lowercase() {
            b'\\' => b'/',
            c => c,
        };
        hash = hash.wrapping_add(letter as i64 * (i as i64 + 119));
    }
    let hash = hash ^ (hash >> 10) ^ (hash >> 20);
    (hash as usize) & (size - 1)
}
