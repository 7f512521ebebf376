//! Material script parser.
//!
//! A [`ParseContext`] owns the material under construction, so parsing
//! has no shared state and the same text always yields the same result.

mod material;
pub mod names;
mod stage;

use glam::Vec3;
use thiserror::Error;

use tessera_core::{LightmapIndex, Material, RendererConfig};

use crate::images::ImageProvider;

pub use material::parse_material;
pub use stage::parse_stage;

/// A problem that aborts one material. The caller substitutes a default.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("expecting '{{', found '{0}' instead")]
    MissingOpenBrace(String),

    #[error("no concluding '}}'")]
    UnexpectedEof,

    #[error("more than {0} stages")]
    TooManyStages(usize),

    #[error("missing parameter for '{0}'")]
    MissingParameter(&'static str),

    #[error("more than 4 tcMods in one stage")]
    TooManyTexMods,

    #[error("could not find image '{0}'")]
    MissingImage(String),

    #[error("unknown stage parameter '{0}'")]
    UnknownStageKeyword(String),

    #[error("unknown general parameter '{0}'")]
    UnknownKeyword(String),

    #[error("no stages and neither sky nor fog")]
    NoStages,

    #[error("malformed vector for '{0}'")]
    BadVector(&'static str),
}

/// Sun colour and direction declared by `q3map_sun`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SunParms {
    pub color: Vec3,
    pub direction: Vec3,
}

/// Everything a parse reads and writes.
pub struct ParseContext<'a> {
    pub images: &'a mut dyn ImageProvider,
    pub config: &'a RendererConfig,
    pub material: Material,
    pub sun: Option<SunParms>,
}

impl<'a> ParseContext<'a> {
    pub fn new(
        name: &str,
        lightmap: LightmapIndex,
        images: &'a mut dyn ImageProvider,
        config: &'a RendererConfig,
    ) -> Self {
        Self {
            images,
            config,
            material: Material::new(name, lightmap),
            sun: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.material.name
    }
}
