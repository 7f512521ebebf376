//! Portal surfaces: mark the portal's screen area in the stencil buffer
//! before the view behind it is drawn, and clear it afterwards.
//!
//! The portal level is kept Gray-coded in the stencil bits above the
//! shadow bits, so entering one level deeper flips exactly one bit.

use tessera_core::{Attribute, CullType, StateBits};
use wgpu::{CompareFunction, StencilOperation};

use crate::backend::GpuCall;
use crate::state_cache::RenderState;

use super::Pass;

pub(super) fn gray(level: u32) -> u32 {
    level ^ (level >> 1)
}

fn stencil_op(pass: &mut Pass<'_>, pass_op: StencilOperation) {
    pass.backend.apply(GpuCall::StencilOp {
        face: None,
        fail: StencilOperation::Keep,
        depth_fail: StencilOperation::Keep,
        pass: pass_op,
    });
}

/// Depth pushed to the far plane without testing.
const FAR_DEPTH: StateBits = StateBits(
    StateBits::COLORMASK_FALSE.0
        | StateBits::DEPTHMASK_TRUE.0
        | StateBits::DEPTHRANGE_1_TO_1.0
        | StateBits::DEPTHFUNC_ALWAYS.0,
);

pub(super) fn prepare(pass: &mut Pass<'_>) {
    let shift = pass.caps().shadow_bits;
    let portal_mask = pass.portal_mask();
    let outer = pass.frame.portal_level;
    let level = outer + 1;
    let value = gray(level) << shift;

    let mut state = RenderState::new(CullType::Front);
    state.bits = StateBits::COLORMASK_FALSE;
    let bit = |b: u32| if level & b != 0 { 1.0 } else { 0.0 };
    state.constant(Attribute::Color, [bit(4), bit(2), bit(1), 1.0]);
    state.constant(Attribute::TexCoord, [0.0; 4]);

    if outer == 0 {
        pass.backend.apply(GpuCall::StencilTest(true));
    }
    pass.backend.apply(GpuCall::StencilMask(portal_mask));
    pass.backend.apply(GpuCall::StencilFunc {
        compare: CompareFunction::Equal,
        reference: value,
        mask: outer << shift,
    });
    stencil_op(pass, StencilOperation::Replace);
    pass.draw_positions(&mut state);

    // the area behind the portal starts at the far plane
    state.bits = FAR_DEPTH;
    pass.backend.apply(GpuCall::StencilFunc {
        compare: CompareFunction::Equal,
        reference: value,
        mask: portal_mask,
    });
    stencil_op(pass, StencilOperation::Keep);
    pass.draw_positions(&mut state);
    // the stencil test stays on for the view behind the portal
}

pub(super) fn finalise(pass: &mut Pass<'_>) {
    let shift = pass.caps().shadow_bits;
    let portal_mask = pass.portal_mask();
    let level = pass.frame.portal_level;
    let value = gray(level) << shift;

    let mut state = RenderState::new(CullType::Front);
    state.bits = FAR_DEPTH;
    state.constant(Attribute::Color, [0.0; 4]);
    state.constant(Attribute::TexCoord, [0.0; 4]);

    pass.backend.apply(GpuCall::StencilMask(portal_mask));
    pass.backend.apply(GpuCall::StencilFunc {
        compare: CompareFunction::Equal,
        reference: value,
        mask: level << shift,
    });
    stencil_op(pass, StencilOperation::Replace);
    pass.draw_positions(&mut state);

    if level == 0 {
        pass.backend.apply(GpuCall::StencilTest(false));
    } else {
        pass.backend.apply(GpuCall::StencilFunc {
            compare: CompareFunction::Equal,
            reference: value,
            mask: portal_mask,
        });
        stencil_op(pass, StencilOperation::Keep);
    }
}

#[cfg(test)]
mod tests {
    use tessera_core::RendererConfig;
    use tessera_material::defaults::Internal;

    use super::super::testing::{fixed_caps, Fixture};
    use super::*;

    fn stencil_funcs(fx: &Fixture) -> Vec<(u32, u32)> {
        fx.backend
            .calls()
            .filter_map(|c| match c {
                GpuCall::StencilFunc { reference, mask, .. } => Some((*reference, *mask)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_gray_code_changes_one_bit_per_level() {
        for level in 0..15u32 {
            assert_eq!((gray(level) ^ gray(level + 1)).count_ones(), 1);
        }
    }

    #[test]
    fn test_prepare_top_level_portal() {
        let mut fx = Fixture::new("", fixed_caps(), RendererConfig::default());
        let m = fx.registry.internal_index(Internal::PreparePortal);
        fx.quad(m, 0);
        fx.run(m);

        assert_eq!(fx.backend.count(|c| *c == GpuCall::StencilTest(true)), 1);
        assert_eq!(fx.backend.count(|c| *c == GpuCall::StencilMask(0xf0)), 1);
        // level 1 written where the level is 0, then tested against all portal bits
        assert_eq!(stencil_funcs(&fx), vec![(0x10, 0x00), (0x10, 0xf0)]);
        assert_eq!(fx.backend.num_draws(), 2);
        assert_eq!(fx.backend.count(|c| *c == GpuCall::ColorWrite(false)), 1);
        assert_eq!(fx.backend.count(|c| *c == GpuCall::DepthRange(1.0, 1.0)), 1);
    }

    #[test]
    fn test_nested_portal_keeps_stencil_enabled() {
        let mut fx = Fixture::new("", fixed_caps(), RendererConfig::default());
        fx.frame.portal_level = 2;
        let m = fx.registry.internal_index(Internal::PreparePortal);
        fx.quad(m, 0);
        fx.run(m);
        assert_eq!(fx.backend.count(|c| matches!(c, GpuCall::StencilTest(_))), 0);
        // level 3 is gray 2
        assert_eq!(stencil_funcs(&fx)[0], (0x20, 0x20));
    }

    #[test]
    fn test_finalise_restores_stencil() {
        let mut fx = Fixture::new("", fixed_caps(), RendererConfig::default());
        let m = fx.registry.internal_index(Internal::FinalisePortal);
        fx.quad(m, 0);
        fx.run(m);
        assert_eq!(fx.backend.num_draws(), 1);
        assert_eq!(fx.backend.calls().last(), Some(&GpuCall::StencilTest(false)));

        fx.backend.clear();
        fx.frame.portal_level = 1;
        fx.quad(m, 0);
        fx.run(m);
        assert_eq!(stencil_funcs(&fx), vec![(0x10, 0x10), (0x10, 0xf0)]);
        assert_eq!(fx.backend.count(|c| matches!(c, GpuCall::StencilTest(_))), 0);
    }
}
