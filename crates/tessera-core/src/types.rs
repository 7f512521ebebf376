use std::ops::{BitAnd, BitAndAssign, BitOr, BitOrAssign, Not, Shl};

/// Opaque texture identifier issued by the image provider. 0 = unbound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct ImageId(pub u32);

/// Metadata of a loaded image that material compilation depends on.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageInfo {
    pub id: ImageId,
    pub name: String,
    pub width: u32,
    pub height: u32,
    /// False when every texel is fully opaque.
    pub has_alpha: bool,
    /// Set for images that are grids of several animation frames.
    pub frames: Option<AtlasLayout>,
}

/// Frame grid of a combined animation atlas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtlasLayout {
    pub columns: u32,
    pub rows: u32,
    pub frames: u32,
}

/// Handle returned to the frontend for a registered material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct MaterialHandle(pub u32);

/// Lighting mode a material was requested with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LightmapIndex {
    /// Use world lightmap `n`.
    Index(u16),
    /// Vertex colours carry the lighting.
    ByVertex,
    /// A white image stands in for the lightmap.
    WhiteImage,
    /// 2D drawing (HUD, console).
    TwoD,
    /// Dynamically lit by the light grid.
    #[default]
    None,
    /// Animated model drawn through the vertex-fetch program.
    Md3,
}

impl LightmapIndex {
    /// Decode the wire representation used by map and model loaders.
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            -5 => Some(Self::Md3),
            -4 => Some(Self::TwoD),
            -3 => Some(Self::ByVertex),
            -2 => Some(Self::WhiteImage),
            -1 => Some(Self::None),
            n if (0..=u16::MAX as i32).contains(&n) => Some(Self::Index(n as u16)),
            _ => None,
        }
    }

    pub fn to_raw(self) -> i32 {
        match self {
            Self::Md3 => -5,
            Self::TwoD => -4,
            Self::ByVertex => -3,
            Self::WhiteImage => -2,
            Self::None => -1,
            Self::Index(n) => n as i32,
        }
    }

    /// True for an actual world lightmap.
    pub fn is_lightmap(self) -> bool {
        matches!(self, Self::Index(_))
    }
}

/// Vertex attribute slots shared by the program synthesizer and the
/// backend attribute bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Attribute {
    Vertex = 0,
    Normal = 1,
    Color = 2,
    TexCoord = 3,
    TexCoord2 = 4,
    TexCoord3 = 5,
    TexCoord4 = 6,
    CameraPos = 7,
    Times = 8,
    TransX = 9,
    TransY = 10,
    TransZ = 11,
    AmbientLight = 12,
    DirectedLight = 13,
    LightDir = 14,
    Color2 = 15,
}

impl Attribute {
    pub const COUNT: usize = 16;

    pub const ALL: [Attribute; Self::COUNT] = [
        Self::Vertex,
        Self::Normal,
        Self::Color,
        Self::TexCoord,
        Self::TexCoord2,
        Self::TexCoord3,
        Self::TexCoord4,
        Self::CameraPos,
        Self::Times,
        Self::TransX,
        Self::TransY,
        Self::TransZ,
        Self::AmbientLight,
        Self::DirectedLight,
        Self::LightDir,
        Self::Color2,
    ];

    /// Single-bit mask of this attribute.
    pub fn bit(self) -> u32 {
        1 << self as u32
    }

    /// Name of the matching `IN` declaration in generated vertex shaders.
    pub fn glsl_name(self) -> &'static str {
        match self {
            Self::Vertex => "aVertex",
            Self::Normal => "aNormal",
            Self::Color => "aColor",
            Self::TexCoord => "aTexCoord",
            Self::TexCoord2 => "aTexCoord2",
            Self::TexCoord3 => "aTexCoord3",
            Self::TexCoord4 => "aTexCoord4",
            Self::CameraPos => "aCameraPos",
            Self::Times => "aTimes",
            Self::TransX => "aTransX",
            Self::TransY => "aTransY",
            Self::TransZ => "aTransZ",
            Self::AmbientLight => "aAmbientLight",
            Self::DirectedLight => "aDirectedLight",
            Self::LightDir => "aLightDir",
            Self::Color2 => "aColor2",
        }
    }

    /// Fixed-function attributes have no instancing divisor.
    pub fn is_generic(self) -> bool {
        (self as u8) >= Self::CameraPos as u8
    }
}

/// Which vertex attributes of a material are constant across every draw
/// and which must be regenerated per surface. Each attribute group is
/// one-hot: a material records the union of kinds (`any`) and the
/// intersection (`all`) over its stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AttrFlags(pub u32);

impl AttrFlags {
    pub const NONE: Self = Self(0);

    pub const COLOR_UNIFORM: Self = Self(0x0001);
    pub const COLOR_VTXCOLOR: Self = Self(0x0002);
    pub const COLOR_DYNAMIC: Self = Self(0x0004);
    pub const COLOR_MASK: Self = Self(0x0007);

    pub const TC1_UNIFORM: Self = Self(0x0008);
    pub const TC1_TEXCOORD: Self = Self(0x0010);
    pub const TC1_LMCOORD: Self = Self(0x0020);
    pub const TC1_DYNAMIC: Self = Self(0x0040);
    pub const TC1_MASK: Self = Self(0x0078);

    /// Distance between the TC1 and TC2 groups.
    pub const TC_SHIFT: u32 = 4;

    pub const TC2_UNIFORM: Self = Self(0x0080);
    pub const TC2_TEXCOORD: Self = Self(0x0100);
    pub const TC2_LMCOORD: Self = Self(0x0200);
    pub const TC2_DYNAMIC: Self = Self(0x0400);
    pub const TC2_MASK: Self = Self(0x0780);

    pub const VERTEX_DYNAMIC: Self = Self(0x0800);
    pub const NORMAL_DYNAMIC: Self = Self(0x1000);

    pub const FULL_DYNAMIC: Self = Self(
        Self::COLOR_DYNAMIC.0
            | Self::TC1_DYNAMIC.0
            | Self::TC2_DYNAMIC.0
            | Self::VERTEX_DYNAMIC.0
            | Self::NORMAL_DYNAMIC.0,
    );

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for AttrFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for AttrFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for AttrFlags {
    type Output = Self;
    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl BitAndAssign for AttrFlags {
    fn bitand_assign(&mut self, rhs: Self) {
        self.0 &= rhs.0;
    }
}

impl Not for AttrFlags {
    type Output = Self;
    fn not(self) -> Self {
        Self(!self.0)
    }
}

impl Shl<u32> for AttrFlags {
    type Output = Self;
    fn shl(self, rhs: u32) -> Self {
        Self(self.0 << rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lightmap_index_raw_round_trip() {
        for raw in [-5, -4, -3, -2, -1, 0, 7] {
            let idx = LightmapIndex::from_raw(raw).unwrap();
            assert_eq!(idx.to_raw(), raw);
        }
        assert!(LightmapIndex::from_raw(-6).is_none());
        assert!(LightmapIndex::Index(3).is_lightmap());
        assert!(!LightmapIndex::ByVertex.is_lightmap());
    }

    #[test]
    fn test_tc2_group_is_shifted_tc1() {
        assert_eq!(AttrFlags::TC1_MASK << AttrFlags::TC_SHIFT, AttrFlags::TC2_MASK);
        assert_eq!(
            AttrFlags::TC1_LMCOORD << AttrFlags::TC_SHIFT,
            AttrFlags::TC2_LMCOORD
        );
    }

    #[test]
    fn test_generic_attributes() {
        assert!(!Attribute::TexCoord4.is_generic());
        assert!(Attribute::TransX.is_generic());
        assert_eq!(Attribute::Color2.bit(), 1 << 15);
    }
}
