pub mod config;
pub mod constants;
pub mod error;
pub mod material;
pub mod program;
pub mod state;
pub mod types;

pub use config::{Capabilities, RendererConfig};
pub use error::{ScratchError, StateError};
pub use material::{Material, Stage, TextureBundle};
pub use program::Program;
pub use state::{CullType, StateBits};
pub use types::{
    AtlasLayout, AttrFlags, Attribute, ImageId, ImageInfo, LightmapIndex, MaterialHandle,
};
