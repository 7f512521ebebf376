pub mod backend;
pub mod blend;
pub mod calc;
pub mod dlight;
pub mod frame;
pub mod handoff;
pub mod iterators;
pub mod overlay;
pub mod scratch;
pub mod state_cache;
pub mod surface;
pub mod tess;

pub use backend::{BufferTarget, ClientMemory, DrawCall, GpuBackend, GpuCall, Recorded, RecordingBackend};
pub use dlight::LightTree;
pub use frame::{DynamicLight, EntityState, FogVolume, Frame};
pub use handoff::Handoff;
pub use scratch::{Scratch, ScratchBlock};
pub use state_cache::{GpuState, RenderState};
pub use surface::{FrameContext, SurfaceDriver, SurfaceStats};
pub use tess::{Instance, StaticBatch, Tess, Vertex};
