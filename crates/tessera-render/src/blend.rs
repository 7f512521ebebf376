//! Translation of packed state bits into typed pipeline state.

use tessera_core::{CullType, StateBits, StateError};
use wgpu::{BlendComponent, BlendFactor, BlendOperation, BlendState, CompareFunction, Face, PolygonMode};

/// Fixed-function alpha test: a fragment survives when
/// `alpha <compare> reference`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlphaTest {
    pub compare: CompareFunction,
    pub reference: f32,
}

pub fn src_factor(bits: StateBits) -> Result<BlendFactor, StateError> {
    let src = bits.src_blend();
    Ok(match src {
        StateBits::SRCBLEND_ZERO => BlendFactor::Zero,
        StateBits::SRCBLEND_ONE => BlendFactor::One,
        StateBits::SRCBLEND_DST_COLOR => BlendFactor::Dst,
        StateBits::SRCBLEND_ONE_MINUS_DST_COLOR => BlendFactor::OneMinusDst,
        StateBits::SRCBLEND_SRC_ALPHA => BlendFactor::SrcAlpha,
        StateBits::SRCBLEND_ONE_MINUS_SRC_ALPHA => BlendFactor::OneMinusSrcAlpha,
        StateBits::SRCBLEND_DST_ALPHA => BlendFactor::DstAlpha,
        StateBits::SRCBLEND_ONE_MINUS_DST_ALPHA => BlendFactor::OneMinusDstAlpha,
        StateBits::SRCBLEND_ALPHA_SATURATE => BlendFactor::SrcAlphaSaturated,
        _ => return Err(StateError::InvalidSrcBlend(src.bits())),
    })
}

pub fn dst_factor(bits: StateBits) -> Result<BlendFactor, StateError> {
    let dst = bits.dst_blend();
    Ok(match dst {
        StateBits::DSTBLEND_ZERO => BlendFactor::Zero,
        StateBits::DSTBLEND_ONE => BlendFactor::One,
        StateBits::DSTBLEND_SRC_COLOR => BlendFactor::Src,
        StateBits::DSTBLEND_ONE_MINUS_SRC_COLOR => BlendFactor::OneMinusSrc,
        StateBits::DSTBLEND_SRC_ALPHA => BlendFactor::SrcAlpha,
        StateBits::DSTBLEND_ONE_MINUS_SRC_ALPHA => BlendFactor::OneMinusSrcAlpha,
        StateBits::DSTBLEND_DST_ALPHA => BlendFactor::DstAlpha,
        StateBits::DSTBLEND_ONE_MINUS_DST_ALPHA => BlendFactor::OneMinusDstAlpha,
        StateBits::DSTBLEND_SRC1_COLOR => BlendFactor::Src1,
        _ => return Err(StateError::InvalidDstBlend(dst.bits())),
    })
}

/// Blend equation for `bits`, or `None` when both factors are unset.
/// Colour and alpha use the same factors.
pub fn blend_state(bits: StateBits) -> Result<Option<BlendState>, StateError> {
    if bits.blend() == StateBits::NONE {
        return Ok(None);
    }
    let component = BlendComponent {
        src_factor: src_factor(bits)?,
        dst_factor: dst_factor(bits)?,
        operation: BlendOperation::Add,
    };
    Ok(Some(BlendState {
        color: component,
        alpha: component,
    }))
}

pub fn depth_compare(bits: StateBits) -> Result<CompareFunction, StateError> {
    let func = bits.depth_func();
    Ok(match func {
        StateBits::DEPTHFUNC_LEQUAL => CompareFunction::LessEqual,
        StateBits::DEPTHFUNC_EQUAL => CompareFunction::Equal,
        StateBits::DEPTHFUNC_ALWAYS => CompareFunction::Always,
        _ => return Err(StateError::InvalidDepthFunc(func.bits())),
    })
}

/// Near and far ends of the depth range.
pub fn depth_range(bits: StateBits) -> (f32, f32) {
    match bits.depth_range() {
        StateBits::DEPTHRANGE_0_TO_0 => (0.0, 0.0),
        StateBits::DEPTHRANGE_1_TO_1 => (1.0, 1.0),
        StateBits::DEPTHRANGE_0_TO_03 => (0.0, 0.3),
        _ => (0.0, 1.0),
    }
}

pub fn alpha_test(bits: StateBits) -> Result<Option<AlphaTest>, StateError> {
    let test = bits.alpha_test();
    let (compare, reference) = match test {
        StateBits::NONE => return Ok(None),
        StateBits::ATEST_GT_0 => (CompareFunction::Greater, 0.0),
        StateBits::ATEST_LT_80 => (CompareFunction::Less, 0.5),
        StateBits::ATEST_GE_80 => (CompareFunction::GreaterEqual, 0.5),
        _ => return Err(StateError::InvalidAlphaTest(test.bits())),
    };
    Ok(Some(AlphaTest { compare, reference }))
}

pub fn polygon_mode(bits: StateBits) -> PolygonMode {
    if bits.contains(StateBits::POLYMODE_LINE) {
        PolygonMode::Line
    } else {
        PolygonMode::Fill
    }
}

/// Face to cull. A mirrored view flips the winding.
pub fn cull_face(cull: CullType, mirrored: bool) -> Option<Face> {
    match (cull, mirrored) {
        (CullType::TwoSided, _) => None,
        (CullType::Back, false) | (CullType::Front, true) => Some(Face::Back),
        (CullType::Back, true) | (CullType::Front, false) => Some(Face::Front),
    }
}
