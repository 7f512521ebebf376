//! Sky surfaces: the ordinary stage loop pinned to the far plane.

use tessera_core::StateBits;

use super::{generic, Pass};

fn at_far_plane(bits: StateBits) -> StateBits {
    bits.with(StateBits::DEPTHRANGE_BITS, StateBits::DEPTHRANGE_1_TO_1)
}

pub(super) fn draw(pass: &mut Pass<'_>) {
    if pass.tess.num_indexes[1] == 0 {
        return;
    }
    generic::iterate_client(pass, false, at_far_plane);
}

#[cfg(test)]
mod tests {
    use tessera_core::material::IteratorKind;
    use tessera_core::RendererConfig;

    use super::super::testing::{fixed_caps, Fixture};
    use super::*;
    use crate::backend::GpuCall;

    const SCRIPT: &str = "\
textures/test/sky
{
    surfaceparm sky
    skyParms - 512 -
    {
        map textures/test/base
        tcMod scroll 0.1 0
    }
}
";

    #[test]
    fn test_sky_drawn_at_far_plane() {
        let mut fx = Fixture::new(SCRIPT, fixed_caps(), RendererConfig::default());
        let m = fx.register("textures/test/sky");
        assert_eq!(fx.registry.material(m).iterator, IteratorKind::Sky);
        fx.quad(m, 0);
        fx.run(m);
        assert_eq!(fx.backend.num_draws(), 1);
        assert_eq!(fx.backend.count(|c| *c == GpuCall::DepthRange(1.0, 1.0)), 1);
    }

    #[test]
    fn test_far_plane_keeps_other_bits() {
        let bits = StateBits::DEFAULT | StateBits::SRCBLEND_ONE | StateBits::DSTBLEND_ONE;
        let pinned = at_far_plane(bits | StateBits::DEPTHRANGE_0_TO_03);
        assert_eq!(pinned, bits | StateBits::DEPTHRANGE_1_TO_1);
    }
}
