use std::ops::{BitAnd, BitAndAssign, BitOr, BitOrAssign, Not};

/// Packed fixed-function GPU state for one draw: blend factors, depth
/// write/test/function/range, colour mask, polygon offset and alpha test.
///
/// Bit layout:
///
/// ```text
/// [0:3]   source blend factor (0 = blending off together with dst 0)
/// [4:7]   destination blend factor
/// [8]     depth write
/// [9]     colour writes off
/// [12]    line polygon mode
/// [13]    polygon offset
/// [16]    depth test off
/// [17:18] depth function (0 = LEQUAL)
/// [20:21] depth range (0 = 0..1)
/// [28:30] alpha test
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StateBits(pub u32);

impl StateBits {
    pub const NONE: Self = Self(0);

    pub const SRCBLEND_ZERO: Self = Self(0x0000_0001);
    pub const SRCBLEND_ONE: Self = Self(0x0000_0002);
    pub const SRCBLEND_DST_COLOR: Self = Self(0x0000_0003);
    pub const SRCBLEND_ONE_MINUS_DST_COLOR: Self = Self(0x0000_0004);
    pub const SRCBLEND_SRC_ALPHA: Self = Self(0x0000_0005);
    pub const SRCBLEND_ONE_MINUS_SRC_ALPHA: Self = Self(0x0000_0006);
    pub const SRCBLEND_DST_ALPHA: Self = Self(0x0000_0007);
    pub const SRCBLEND_ONE_MINUS_DST_ALPHA: Self = Self(0x0000_0008);
    pub const SRCBLEND_ALPHA_SATURATE: Self = Self(0x0000_0009);
    pub const SRCBLEND_BITS: Self = Self(0x0000_000f);

    pub const DSTBLEND_ZERO: Self = Self(0x0000_0010);
    pub const DSTBLEND_ONE: Self = Self(0x0000_0020);
    pub const DSTBLEND_SRC_COLOR: Self = Self(0x0000_0030);
    pub const DSTBLEND_ONE_MINUS_SRC_COLOR: Self = Self(0x0000_0040);
    pub const DSTBLEND_SRC_ALPHA: Self = Self(0x0000_0050);
    pub const DSTBLEND_ONE_MINUS_SRC_ALPHA: Self = Self(0x0000_0060);
    pub const DSTBLEND_DST_ALPHA: Self = Self(0x0000_0070);
    pub const DSTBLEND_ONE_MINUS_DST_ALPHA: Self = Self(0x0000_0080);
    /// Second fragment output as destination factor (dual-source blending).
    pub const DSTBLEND_SRC1_COLOR: Self = Self(0x0000_0090);
    pub const DSTBLEND_BITS: Self = Self(0x0000_00f0);

    pub const BLEND_BITS: Self = Self(0x0000_00ff);

    pub const DEPTHMASK_TRUE: Self = Self(0x0000_0100);
    pub const COLORMASK_FALSE: Self = Self(0x0000_0200);
    pub const POLYMODE_LINE: Self = Self(0x0000_1000);
    pub const POLYGON_OFFSET: Self = Self(0x0000_2000);
    pub const DEPTHTEST_DISABLE: Self = Self(0x0001_0000);

    pub const DEPTHFUNC_LEQUAL: Self = Self(0);
    pub const DEPTHFUNC_EQUAL: Self = Self(0x0002_0000);
    pub const DEPTHFUNC_ALWAYS: Self = Self(0x0004_0000);
    pub const DEPTHFUNC_BITS: Self = Self(0x0006_0000);

    pub const DEPTHRANGE_0_TO_1: Self = Self(0);
    pub const DEPTHRANGE_0_TO_0: Self = Self(0x0010_0000);
    pub const DEPTHRANGE_1_TO_1: Self = Self(0x0020_0000);
    pub const DEPTHRANGE_0_TO_03: Self = Self(0x0030_0000);
    pub const DEPTHRANGE_BITS: Self = Self(0x0030_0000);

    pub const ATEST_GT_0: Self = Self(0x1000_0000);
    pub const ATEST_LT_80: Self = Self(0x2000_0000);
    pub const ATEST_GE_80: Self = Self(0x4000_0000);
    pub const ATEST_BITS: Self = Self(0x7000_0000);

    pub const DEFAULT: Self = Self::DEPTHMASK_TRUE;

    /// Raw bit value.
    pub fn bits(self) -> u32 {
        self.0
    }

    /// True when every bit of `other` is set.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// True when any bit of `other` is set.
    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub fn src_blend(self) -> Self {
        self & Self::SRCBLEND_BITS
    }

    pub fn dst_blend(self) -> Self {
        self & Self::DSTBLEND_BITS
    }

    /// Source and destination factors together. Zero means blending is off.
    pub fn blend(self) -> Self {
        self & Self::BLEND_BITS
    }

    pub fn depth_func(self) -> Self {
        self & Self::DEPTHFUNC_BITS
    }

    pub fn depth_range(self) -> Self {
        self & Self::DEPTHRANGE_BITS
    }

    pub fn alpha_test(self) -> Self {
        self & Self::ATEST_BITS
    }

    /// Replace the bits selected by `mask` with `value`.
    pub fn with(self, mask: Self, value: Self) -> Self {
        Self((self.0 & !mask.0) | (value.0 & mask.0))
    }
}

impl BitOr for StateBits {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for StateBits {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for StateBits {
    type Output = Self;
    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl BitAndAssign for StateBits {
    fn bitand_assign(&mut self, rhs: Self) {
        self.0 &= rhs.0;
    }
}

impl Not for StateBits {
    type Output = Self;
    fn not(self) -> Self {
        Self(!self.0)
    }
}

/// Face culling mode of a material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CullType {
    /// Cull front faces (the engine's default winding).
    #[default]
    Front,
    Back,
    TwoSided,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blend_accessors() {
        let bits = StateBits::SRCBLEND_DST_COLOR
            | StateBits::DSTBLEND_ZERO
            | StateBits::DEPTHMASK_TRUE
            | StateBits::ATEST_GT_0;
        assert_eq!(bits.src_blend(), StateBits::SRCBLEND_DST_COLOR);
        assert_eq!(bits.dst_blend(), StateBits::DSTBLEND_ZERO);
        assert_eq!(bits.blend().bits(), 0x13);
        assert_eq!(bits.alpha_test(), StateBits::ATEST_GT_0);
        assert!(bits.contains(StateBits::DEPTHMASK_TRUE));
    }

    #[test]
    fn test_with_replaces_masked_bits() {
        let bits = StateBits::SRCBLEND_ONE | StateBits::DSTBLEND_ONE | StateBits::POLYGON_OFFSET;
        let swapped = bits.with(StateBits::BLEND_BITS, StateBits::SRCBLEND_DST_COLOR);
        assert_eq!(swapped.blend(), StateBits::SRCBLEND_DST_COLOR);
        assert!(swapped.contains(StateBits::POLYGON_OFFSET));
    }

    #[test]
    fn test_default_writes_depth() {
        assert_eq!(StateBits::DEFAULT, StateBits::DEPTHMASK_TRUE);
        assert_eq!(StateBits::default(), StateBits::NONE);
    }
}
