use serde::{Deserialize, Serialize};

/// Feature set of the graphics device, probed once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Capabilities {
    /// Shading language version string, e.g. "1.30". `None` disables
    /// program synthesis.
    pub glsl_version: Option<String>,
    pub texture_units: u32,
    /// Additive texture environment for the multitexture collapser.
    pub env_add: bool,
    pub geometry_shaders: bool,
    pub gpu_shader4: bool,
    pub texture_buffers: bool,
    pub uniform_buffers: bool,
    pub dual_source_blend: bool,
    pub instancing: bool,
    pub vertex_buffers: bool,
    pub occlusion_queries: bool,
    /// Stencil bits reserved for portal nesting.
    pub portal_mask: u32,
    /// Stencil bits used by shadow volumes.
    pub shadow_bits: u32,
    /// Per-face stencil operations, for single-pass shadow volumes.
    pub separate_stencil: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            glsl_version: Some("1.30".to_string()),
            texture_units: 8,
            env_add: true,
            geometry_shaders: false,
            gpu_shader4: true,
            texture_buffers: true,
            uniform_buffers: true,
            dual_source_blend: true,
            instancing: true,
            vertex_buffers: true,
            occlusion_queries: true,
            portal_mask: 0x0f,
            shadow_bits: 4,
            separate_stencil: true,
        }
    }
}

impl Capabilities {
    /// Packed `major << 8 | minor`, or 0 when the version string is missing
    /// or malformed.
    pub fn glsl_version_code(&self) -> u16 {
        let Some(v) = self.glsl_version.as_deref() else {
            return 0;
        };
        let mut parts = v.trim().split(|c: char| c == '.' || c.is_whitespace());
        let major = parts.next().and_then(|p| p.parse::<u16>().ok());
        let minor = parts.next().and_then(|p| p.parse::<u16>().ok());
        match (major, minor) {
            (Some(major), Some(minor)) if major < 256 && minor < 256 => {
                (major << 8) | minor
            }
            _ => 0,
        }
    }

    /// Texture units usable by the collapser, never less than one.
    pub fn units(&self) -> u32 {
        self.texture_units.max(1)
    }
}

/// Runtime-tunable renderer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    pub per_pixel_lighting: bool,
    pub parallax: bool,
    /// Keep `detail` stages.
    pub detail_textures: bool,
    /// Collapse every material to a single vertex-lit pass.
    pub vertex_light: bool,
    /// Never pick the vertex-lit or lightmap fast paths.
    pub ignore_fast_path: bool,
    /// 0 = off, 1 = depth pre-pass, 2 = visualise depth.
    pub depth_pass: u8,
    pub over_bright_bits: u32,
    /// Size of one world lightmap page, for `tcGen lightmap` on ordinary images.
    pub lightmap_size: (u32, u32),
    /// The world carries deluxe maps next to its lightmaps.
    pub deluxe_maps: bool,
    /// 0.0 = full colour, 1.0 = fully grey.
    pub greyscale: f32,
    /// Show lightmaps only (1) or with the light grid (2).
    pub lightmap_debug: u8,
    /// Dynamic light tree visualisation tile mode, 0 = off.
    pub dlight_debug: u8,
    /// Light back faces in the dlight projection pass.
    pub dlight_backs: bool,
    /// 1 = projected blob shadows, 2 = stencil shadow volumes.
    pub shadows: u8,
    /// Megabytes reserved for the per-surface scratch arena.
    pub scratch_megs: usize,
    pub offset_factor: f32,
    pub offset_units: f32,
    /// Viewport size used by the dlight debug tiles.
    pub viewport: (u32, u32),
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            per_pixel_lighting: false,
            parallax: false,
            detail_textures: true,
            vertex_light: false,
            ignore_fast_path: false,
            depth_pass: 0,
            over_bright_bits: 1,
            lightmap_size: (128, 128),
            deluxe_maps: false,
            greyscale: 0.0,
            lightmap_debug: 0,
            dlight_debug: 0,
            dlight_backs: true,
            shadows: 1,
            scratch_megs: 4,
            offset_factor: -1.0,
            offset_units: -2.0,
            viewport: (1024, 768),
        }
    }
}

impl RendererConfig {
    /// Scale applied to identity-lit colours: `1 / 2^overbright`.
    pub fn identity_light(&self) -> f32 {
        1.0 / (1u32 << self.over_bright_bits.min(8)) as f32
    }

    pub fn identity_light_byte(&self) -> u8 {
        (self.identity_light() * 255.0) as u8
    }

    pub fn scratch_bytes(&self) -> usize {
        self.scratch_megs.max(1) * 1024 * 1024
    }
}
