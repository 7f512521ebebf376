pub mod classify;
pub mod collapse;
pub mod defaults;
pub mod finish;
pub mod glsl;
pub mod images;
pub mod lexer;
pub mod loader;
pub mod parser;
pub mod program;
pub mod registry;
pub mod text_index;

pub use finish::{finish, DepthVariant, FinishContext, Finished};
pub use glsl::{synthesize, SynthesisError, Synthesized};
pub use images::{BuiltinImage, ImageOptions, ImageProvider, ImageTable};
pub use loader::{load_config, load_config_from_str, load_text_index, EngineConfig, LoadError};
pub use parser::{ParseContext, ParseError};
pub use program::{
    BlockLayout, LinkRequest, ProgramCache, ShaderCompiler, ShaderStage, UniformBuffer, UniformSlot,
};
pub use registry::{MaterialRow, Registry, RegistryError, Services};
pub use text_index::{ScriptFile, TextIndex};
