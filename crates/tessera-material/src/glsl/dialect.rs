/// Shading language flavour chosen from the driver's version string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// `#version 110` with `attribute`/`varying`.
    Legacy,
    /// `#version 150 compatibility` with `in`/`out`.
    Modern,
}

/// Oldest version the generated code compiles under.
pub const MIN_VERSION: u16 = 0x010a;

const MODERN_VERSION: u16 = 0x0132;

impl Dialect {
    /// `None` below 1.10.
    pub fn from_version(code: u16) -> Option<Self> {
        if code < MIN_VERSION {
            None
        } else if code >= MODERN_VERSION {
            Some(Self::Modern)
        } else {
            Some(Self::Legacy)
        }
    }

    pub fn vertex_header(self) -> &'static str {
        match self {
            Self::Modern => concat!(
                "#version 150 compatibility\n",
                "\n",
                "#define IN(decl) in decl\n",
                "#define OUT(qual, decl) qual out decl\n",
                "#define tex2D(s, tc) texture(s, tc)\n",
                "#define texFetch(s, tc) texelFetch(s, tc)\n",
                "\n",
            ),
            Self::Legacy => concat!(
                "#version 110\n",
                "\n",
                "#define IN(decl) attribute decl\n",
                "#define OUT(qual, decl) varying decl\n",
                "#define tex2D(s, tc) texture2D(s, tc)\n",
                "#define texFetch(s, tc) texelFetchBuffer(s, tc)\n",
                "\n",
            ),
        }
    }

    pub fn geometry_header(self) -> &'static str {
        match self {
            Self::Modern => concat!(
                "#version 150 compatibility\n",
                "\n",
                "#define IN(qual, decl) qual in decl\n",
                "#define OUT(qual, decl) qual out decl\n",
                "\n",
            ),
            Self::Legacy => concat!(
                "#version 110\n",
                "#extension GL_EXT_geometry_shader4 : enable\n",
                "#extension GL_EXT_gpu_shader4 : enable\n",
                "\n",
                "#define IN(qual, decl) varying in decl\n",
                "#define OUT(qual, decl) varying out decl\n",
                "\n",
            ),
        }
    }

    pub fn fragment_header(self) -> &'static str {
        match self {
            Self::Modern => concat!(
                "#version 150 compatibility\n",
                "\n",
                "#define IN(qual, decl) qual in decl\n",
                "#define OUT(decl) out decl\n",
                "#define tex2D(s, tc) texture(s, tc)\n",
                "#define tex2DBias(s, tc, bias) texture(s, tc, bias)\n",
                "#define tex2DLod(s, tc, lod) textureLod(s, tc, lod)\n",
                "#define tex3D(s, tc) texture(s, tc)\n",
                "\n",
            ),
            Self::Legacy => concat!(
                "#version 110\n",
                "\n",
                "#define IN(qual, decl) varying decl\n",
                "#define OUT(decl) varying out decl\n",
                "#define tex2D(s, tc) texture2D(s, tc)\n",
                "#define tex2DBias(s, tc, bias) texture2D(s, tc, bias)\n",
                "#define tex2DLod(s, tc, lod) texture2DLod(s, tc, lod)\n",
                "#define tex3D(s, tc) texture3D(s, tc)\n",
                "\n",
            ),
        }
    }
}
