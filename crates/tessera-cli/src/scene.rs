use glam::{Vec3, Vec4};
use serde::Serialize;
use tessera_core::material::sort;
use tessera_core::{ImageId, ImageInfo, MaterialHandle};
use tessera_material::{BuiltinImage, ImageOptions, ImageProvider, ImageTable, Registry};
use tessera_render::{
    DynamicLight, FogVolume, Frame, FrameContext, GpuBackend, Recorded, RecordingBackend, SurfaceDriver, Vertex,
};

/// Side of every image the replay invents.
const SYNTHETIC_SIZE: u32 = 256;

/// An image table that makes up any image it is asked for, so every
/// material compiles as written without image files on disk.
pub struct SyntheticImages {
    pub table: ImageTable,
    /// Names invented on request, in request order.
    pub invented: Vec<String>,
}

impl SyntheticImages {
    pub fn new(lightmaps: usize) -> Self {
        let mut table = ImageTable::new();
        for _ in 0..lightmaps.max(1) {
            table.add_lightmap();
        }
        Self {
            table,
            invented: Vec::new(),
        }
    }

    fn find_or_invent(&mut self, name: &str, options: ImageOptions) -> Option<ImageInfo> {
        if let Some(info) = self.table.find_image(name, options) {
            return Some(info);
        }
        log::debug!("inventing image {name}");
        self.invented.push(name.to_string());
        let id = self.table.insert(name, SYNTHETIC_SIZE, SYNTHETIC_SIZE, false);
        self.table.info(id).cloned()
    }
}

impl ImageProvider for SyntheticImages {
    fn find_image(&mut self, name: &str, options: ImageOptions) -> Option<ImageInfo> {
        self.find_or_invent(name, options)
    }

    fn find_height_map(&mut self, name: &str) -> Option<ImageInfo> {
        self.table.find_height_map(name)
    }

    fn info(&self, id: ImageId) -> Option<&ImageInfo> {
        self.table.info(id)
    }

    fn builtin(&self, image: BuiltinImage) -> ImageId {
        self.table.builtin(image)
    }

    fn lightmap(&self, index: u16) -> Option<ImageId> {
        self.table.lightmap(index)
    }

    fn deluxe_map(&self, index: u16) -> Option<ImageId> {
        self.table.deluxe_map(index)
    }

    fn num_lightmaps(&self) -> usize {
        self.table.num_lightmaps()
    }

    fn combine_images(&mut self, frames: &[ImageId]) -> Option<ImageId> {
        self.table.combine_images(frames)
    }

    fn video_map(&mut self, name: &str) -> Option<(u32, ImageId)> {
        self.table.video_map(name)
    }
}

/// A view with one coloured dlight over the origin and one fog volume.
pub fn standard_frame(time: f32) -> Frame {
    Frame {
        time,
        view_origin: Vec3::new(0.0, 0.0, 64.0),
        dlights: vec![DynamicLight {
            origin: Vec3::new(0.5, 0.5, 16.0),
            radius: 200.0,
            color: Vec3::new(1.0, 0.75, 0.5),
            additive: false,
        }],
        fogs: vec![FogVolume {
            color: [96, 112, 128, 255],
            tc_scale: 1.0 / (8.0 * 1024.0),
            surface: Some(Vec4::new(0.0, 0.0, 1.0, 128.0)),
        }],
        ..Default::default()
    }
}

fn quad() -> ([Vertex; 4], [u32; 6]) {
    let v = |x: f32, y: f32| Vertex {
        xyz: [x * 64.0, y * 64.0, 0.0],
        normal: [0.0, 0.0, 1.0],
        tc1: [x, y],
        tc2: [x, y],
        color: [255; 4],
        ..Default::default()
    };
    ([v(0.0, 0.0), v(1.0, 0.0), v(1.0, 1.0), v(0.0, 1.0)], [0, 1, 2, 0, 2, 3])
}

/// Totals of one replayed view.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FrameSummary {
    pub surfaces: u32,
    pub vertices: usize,
    pub indexes: usize,
    pub dlight_passes: u32,
    pub fog_passes: u32,
    pub draws: usize,
    pub state_calls: usize,
    pub uploads: usize,
}

/// Submit one lit, every other one fogged, quad per material through the
/// surface driver and tally what reached the backend.
pub fn replay(
    registry: &Registry,
    images: &dyn ImageProvider,
    backend: &mut RecordingBackend,
    handles: &[MaterialHandle],
    frame: &Frame,
) -> FrameSummary {
    backend.clear();
    let mut driver = SurfaceDriver::new(registry.config());
    {
        let mut ctx = FrameContext {
            registry,
            images,
            frame,
            backend: &mut *backend as &mut dyn GpuBackend,
        };
        driver.begin_view(&mut ctx);
        let (verts, idx) = quad();
        for (i, &handle) in handles.iter().enumerate() {
            let fog = if i % 2 == 0 { 1 } else { 0 };
            let index = driver.begin_surface(registry, handle, fog, frame);
            // opaque surfaces go in the overlay range
            let range = if registry.material(index).sort <= sort::OPAQUE { 1 } else { 0 };
            driver.tess.dlight_bits = 1;
            driver.add_surface(&mut ctx, range, &verts, &idx);
            driver.end_surface(&mut ctx);
        }
        driver.shadow_finish(&mut ctx);
    }

    let stats = driver.stats;
    let mut summary = FrameSummary {
        surfaces: stats.surfaces,
        vertices: stats.vertices,
        indexes: stats.indexes,
        dlight_passes: stats.dlight_passes,
        fog_passes: stats.fog_passes,
        ..Default::default()
    };
    for record in &backend.log {
        match record {
            Recorded::Call(_) => summary.state_calls += 1,
            Recorded::Draw { .. } => summary.draws += 1,
            Recorded::Upload { .. } => summary.uploads += 1,
            _ => {}
        }
    }
    log::info!(
        "replayed {} surfaces: {} draws, {} state calls",
        summary.surfaces,
        summary.draws,
        summary.state_calls
    );
    summary
}

#[cfg(test)]
mod tests {
    use tessera_core::{Capabilities, LightmapIndex, RendererConfig};
    use tessera_material::{ScriptFile, Services, TextIndex};

    use super::*;

    const SCRIPT: &str = "\
textures/base/floor
{
    {
        map $lightmap
    }
    {
        map textures/base/floor_tile
        blendFunc filter
    }
}

textures/base/glass
{
    surfaceparm trans
    {
        map textures/base/glass_env
        blendFunc add
    }
}
";

    fn compile(caps: Capabilities) -> (SyntheticImages, RecordingBackend, Registry, Vec<MaterialHandle>) {
        let mut images = SyntheticImages::new(1);
        let mut backend = RecordingBackend::new();
        let text = TextIndex::build(vec![ScriptFile::new("base.shader", SCRIPT)]);
        let names: Vec<String> = text.names().into_iter().map(str::to_string).collect();
        let mut svc = Services {
            images: &mut images,
            compiler: Some(&mut backend),
        };
        let mut registry = Registry::new(caps, RendererConfig::default(), text, &mut svc);
        let handles = names
            .iter()
            .map(|name| registry.register(name, LightmapIndex::Index(0), &mut svc))
            .collect();
        (images, backend, registry, handles)
    }

    #[test]
    fn test_missing_images_are_invented() {
        let (images, _, registry, handles) = compile(Capabilities::default());
        assert_eq!(handles.len(), 2);
        assert!(handles.iter().all(|h| h.0 != 0));
        assert!(images.invented.iter().any(|n| n.starts_with("textures/base/floor_tile")));
        assert!(!registry.get(handles[0]).default_shader);
    }

    #[test]
    fn test_replay_draws_every_surface() {
        let caps = Capabilities {
            glsl_version: None,
            ..Default::default()
        };
        let (images, mut backend, registry, handles) = compile(caps);
        let summary = replay(&registry, &images, &mut backend, &handles, &standard_frame(1.0));
        assert_eq!(summary.surfaces, 2);
        assert_eq!(summary.vertices, 8);
        assert!(summary.draws >= 2);
        assert!(summary.state_calls > 0);
        // only the opaque floor is in the overlay range
        assert_eq!(summary.dlight_passes, 1);
        assert_eq!(summary.fog_passes, 1);
    }
}
