//! Permanent material storage.
//!
//! Materials are looked up by name through a hash of chains, addressed by
//! handle (their index) and kept in an approximately sorted draw order.
//! A lookup that misses creates the material from script text, or from a
//! bare image, or as a defaulted placeholder so the miss is not repeated.

use std::cmp::Ordering;
use std::collections::HashMap;

use log::{debug, info, warn};
use serde::Serialize;
use thiserror::Error;

use tessera_core::constants::{FILE_HASH_SIZE, MAX_QPATH, MAX_SHADERS};
use tessera_core::material::IteratorKind;
use tessera_core::{
    Capabilities, ImageId, LightmapIndex, Material, MaterialHandle, RendererConfig, StateBits,
};

use crate::defaults::{implicit_material, Internal};
use crate::finish::{finish, DepthVariant, FinishContext, Finished, SharedDepth};
use crate::images::{strip_extension, ImageOptions, ImageProvider};
use crate::lexer::atof;
use crate::parser::names::name_hash;
use crate::parser::{parse_material, ParseContext};
use crate::program::{ProgramCache, ShaderCompiler};
use crate::text_index::TextIndex;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("too many materials (limit {0})")]
    TooManyMaterials(usize),

    #[error("material name '{0}' is too long")]
    NameTooLong(String),

    #[error("material '{0}' not found")]
    NotFound(String),
}

/// Collaborators needed while materials are being created.
pub struct Services<'a> {
    pub images: &'a mut dyn ImageProvider,
    /// `None` compiles every material for the fixed-function paths.
    pub compiler: Option<&'a mut dyn ShaderCompiler>,
}

/// One line of the material listing.
#[derive(Debug, Clone, Serialize)]
pub struct MaterialRow {
    pub index: usize,
    pub name: String,
    pub passes: usize,
    pub lightmapped: bool,
    pub explicit: bool,
    pub iterator: &'static str,
    pub program: Option<u32>,
    pub defaulted: bool,
    /// Image names of each unfogged stage.
    pub stages: Vec<Vec<String>>,
}

/// Short label of an iteration strategy.
pub fn iterator_label(kind: IteratorKind) -> &'static str {
    match kind {
        IteratorKind::Generic => "gen",
        IteratorKind::VertexLit => "vlt",
        IteratorKind::LightmapMultitexture => "lmmt",
        IteratorKind::UnifiedProgram => "glsl",
        IteratorKind::Sky => "sky",
        IteratorKind::Shadow => "shadow",
        IteratorKind::PreparePortal => "portal+",
        IteratorKind::FinalisePortal => "portal-",
        IteratorKind::CopyDepth => "copydepth",
        IteratorKind::BuildVbo => "vbo",
        IteratorKind::BuildIbo => "ibo",
    }
}

pub struct Registry {
    caps: Capabilities,
    config: RendererConfig,
    text: TextIndex,
    programs: ProgramCache,
    materials: Vec<Material>,
    /// Material indices in draw order.
    sorted: Vec<usize>,
    /// Name hash chains, oldest first.
    buckets: Vec<Vec<usize>>,
    internal: HashMap<Internal, usize>,
    projection_shadow: usize,
    flare: usize,
    sun: usize,
}

impl Registry {
    /// Create the internal materials, then the few named materials the
    /// renderer looks up itself.
    pub fn new(
        caps: Capabilities,
        config: RendererConfig,
        text: TextIndex,
        svc: &mut Services<'_>,
    ) -> Self {
        info!("initializing materials ({} script definitions)", text.len());
        let mut registry = Self {
            caps,
            config,
            text,
            programs: ProgramCache::new(),
            materials: Vec::new(),
            sorted: Vec::new(),
            buckets: vec![Vec::new(); FILE_HASH_SIZE],
            internal: HashMap::new(),
            projection_shadow: 0,
            flare: 0,
            sun: 0,
        };

        for kind in Internal::ALL {
            if !kind.available(&registry.caps, &registry.config) {
                if kind == Internal::DefaultMd3 {
                    registry.internal.insert(kind, registry.default_index());
                }
                continue;
            }
            let material = kind.material(&*svc.images);
            let mut finished = registry.compile(material, svc);
            kind.mark(&mut finished.material);
            let index = registry.install(finished);
            registry.internal.insert(kind, index);
        }

        registry.projection_shadow = registry.find("projectionShadow", LightmapIndex::None, true, svc);
        registry.flare = registry.find("flareShader", LightmapIndex::None, true, svc);
        if !registry.materials[registry.flare].default_shader {
            // flares are fogged when they are generated
            let flare = &mut registry.materials[registry.flare];
            let passes = flare.num_unfogged_passes.min(flare.stages.len());
            for stage in &mut flare.stages[..passes] {
                stage.adjust_fog = Default::default();
                stage.state |= StateBits::DEPTHTEST_DISABLE;
            }
        }
        registry.sun = registry.find("sun", LightmapIndex::None, true, svc);
        if !registry.materials[registry.sun].default_shader {
            let sun = &mut registry.materials[registry.sun];
            let passes = sun.num_unfogged_passes.min(sun.stages.len());
            for stage in &mut sun.stages[..passes] {
                stage.state |= StateBits::DEPTHRANGE_1_TO_1;
            }
        }
        registry
    }

    fn shared_depth(&self) -> SharedDepth {
        let depth_of = |kind| {
            self.internal
                .get(&kind)
                .is_some_and(|&i: &usize| self.materials[i].depth_shader.is_some())
        };
        SharedDepth {
            default: depth_of(Internal::Default),
            md3: depth_of(Internal::DefaultMd3),
        }
    }

    fn compile(&mut self, material: Material, svc: &mut Services<'_>) -> Finished {
        let shared_depth = self.shared_depth();
        let mut ctx = FinishContext {
            images: &mut *svc.images,
            caps: &self.caps,
            config: &self.config,
            programs: &mut self.programs,
            compiler: match svc.compiler {
                Some(ref mut compiler) => Some(&mut **compiler),
                None => None,
            },
            shared_depth,
        };
        finish(material, &mut ctx)
    }

    /// Store a finished material and its depth pass. Falls back to the
    /// default material when the table is full.
    fn install(&mut self, finished: Finished) -> usize {
        let index = match self.insert(finished.material) {
            Ok(index) => index,
            Err(e) => {
                warn!("{e}");
                return self.default_index();
            }
        };
        let depth = match finished.depth {
            DepthVariant::None => None,
            DepthVariant::Default => self.shared_depth_of(Internal::Default),
            DepthVariant::DefaultMd3 => self.shared_depth_of(Internal::DefaultMd3),
            DepthVariant::Custom(material) => match self.insert(*material) {
                Ok(depth) => Some(depth),
                Err(e) => {
                    warn!("{e}");
                    None
                }
            },
        };
        self.materials[index].depth_shader = depth;
        index
    }

    fn shared_depth_of(&self, kind: Internal) -> Option<usize> {
        self.internal
            .get(&kind)
            .and_then(|&i| self.materials[i].depth_shader)
    }

    fn insert(&mut self, mut material: Material) -> Result<usize, RegistryError> {
        if self.materials.len() >= MAX_SHADERS {
            return Err(RegistryError::TooManyMaterials(MAX_SHADERS));
        }
        let index = self.materials.len();
        material.index = index;
        material.sorted_index = index;
        let bucket = name_hash(&material.name, FILE_HASH_SIZE);
        self.materials.push(material);
        self.sorted.push(index);
        self.sort_last();
        self.buckets[bucket].push(index);
        Ok(index)
    }

    /// Draw order: sort key, depth writers first, then occlusion results
    /// and program identity so equal state ends up adjacent.
    fn compare(&self, l: usize, r: usize) -> Ordering {
        let (lm, rm) = (&self.materials[l], &self.materials[r]);
        let depth = lm.writes_depth();
        lm.sort
            .partial_cmp(&rm.sort)
            .unwrap_or(Ordering::Equal)
            .then_with(|| rm.writes_depth().cmp(&depth))
            .then_with(|| {
                let samples = |m: &Material| m.program.as_ref().map_or(m.query_result(), |p| p.query_sum());
                let (a, b) = (samples(lm), samples(rm));
                if depth {
                    b.cmp(&a)
                } else {
                    a.cmp(&b)
                }
            })
            .then_with(|| {
                let handle = |m: &Material| m.program.as_ref().map(|p| p.handle);
                handle(lm).cmp(&handle(rm))
            })
            .then_with(|| {
                let (a, b) = (lm.query_result(), rm.query_result());
                if depth {
                    b.cmp(&a)
                } else {
                    a.cmp(&b)
                }
            })
            .then_with(|| lm.index.cmp(&rm.index))
    }

    /// One bubble pass from the end of the draw order. Only the newest
    /// material is guaranteed to land in place; the order as a whole is
    /// approximate.
    fn sort_last(&mut self) {
        let n = self.sorted.len();
        if n < 2 {
            return;
        }
        let mut carried = self.sorted[n - 1];
        for slot in (0..n - 1).rev() {
            let other = self.sorted[slot];
            if self.compare(carried, other) != Ordering::Less {
                self.sorted[slot + 1] = carried;
                self.materials[carried].sorted_index = slot + 1;
                carried = other;
            } else {
                self.sorted[slot + 1] = other;
                self.materials[other].sorted_index = slot + 1;
            }
        }
        self.sorted[0] = carried;
        self.materials[carried].sorted_index = 0;
    }

    fn lookup(&self, name: &str, mut accept: impl FnMut(&Material) -> bool) -> Option<usize> {
        self.buckets[name_hash(name, FILE_HASH_SIZE)]
            .iter()
            .rev()
            .copied()
            .find(|&i| {
                let m = &self.materials[i];
                m.name.eq_ignore_ascii_case(name) && accept(m)
            })
    }

    /// Find or create the material `name` for a lighting mode. Always
    /// returns a valid index, possibly of a defaulted material.
    pub fn find(
        &mut self,
        name: &str,
        lightmap: LightmapIndex,
        mip: bool,
        svc: &mut Services<'_>,
    ) -> usize {
        if name.is_empty() {
            return if lightmap == LightmapIndex::Md3 {
                self.internal_index(Internal::DefaultMd3)
            } else {
                self.default_index()
            };
        }

        // vertex lighting when the world has no such lightmap
        let lightmap = match lightmap {
            LightmapIndex::Index(n) if n as usize >= svc.images.num_lightmaps() => LightmapIndex::ByVertex,
            other => other,
        };

        let stripped = strip_extension(name);
        // defaulted materials match any mode so a miss is not repeated
        if let Some(found) = self.lookup(&stripped, |m| m.lightmap == lightmap || m.default_shader) {
            return found;
        }

        let material = if let Some(mut lx) = self.text.find(&stripped) {
            let mut ctx = ParseContext::new(&stripped, lightmap, &mut *svc.images, &self.config);
            if let Err(e) = parse_material(&mut lx, &mut ctx) {
                warn!("material {stripped}: {e}");
                ctx.material.default_shader = true;
            }
            ctx.material
        } else {
            let options = if mip {
                ImageOptions::REPEAT
            } else {
                ImageOptions::CLAMP
            };
            match svc.images.find_image(name, options) {
                Some(image) => implicit_material(&stripped, lightmap, image.id, &*svc.images),
                None => {
                    debug!("couldn't find image file for material {name}");
                    let mut material = Material::new(&stripped, lightmap);
                    material.default_shader = true;
                    material
                }
            }
        };

        let finished = self.compile(material, svc);
        self.install(finished)
    }

    fn register_with(
        &mut self,
        name: &str,
        lightmap: LightmapIndex,
        mip: bool,
        svc: &mut Services<'_>,
    ) -> MaterialHandle {
        if name.len() >= MAX_QPATH {
            warn!("{}", RegistryError::NameTooLong(name.to_string()));
            return MaterialHandle(0);
        }
        let index = self.find(name, lightmap, mip, svc);
        // the defaulted material stays registered under its name
        if self.materials[index].default_shader {
            MaterialHandle(0)
        } else {
            MaterialHandle(index as u32)
        }
    }

    /// Register a material for world or model use. Handle 0 means it
    /// could not be found.
    pub fn register(&mut self, name: &str, lightmap: LightmapIndex, svc: &mut Services<'_>) -> MaterialHandle {
        self.register_with(name, lightmap, true, svc)
    }

    /// Register a material for 2D drawing.
    pub fn register_2d(&mut self, name: &str, svc: &mut Services<'_>) -> MaterialHandle {
        self.register_with(name, LightmapIndex::TwoD, true, svc)
    }

    /// Register a 2D material whose images are never mipmapped.
    pub fn register_nomip(&mut self, name: &str, svc: &mut Services<'_>) -> MaterialHandle {
        self.register_with(name, LightmapIndex::TwoD, false, svc)
    }

    /// Register an implicit material around an already created image,
    /// such as a font page. Never consults script text.
    pub fn register_from_image(
        &mut self,
        name: &str,
        lightmap: LightmapIndex,
        image: ImageId,
        svc: &mut Services<'_>,
    ) -> MaterialHandle {
        let lightmap = match lightmap {
            LightmapIndex::Index(n) if n as usize >= svc.images.num_lightmaps() => LightmapIndex::WhiteImage,
            other => other,
        };
        if let Some(found) = self.lookup(name, |m| m.lightmap == lightmap || m.default_shader) {
            return MaterialHandle(found as u32);
        }
        let material = implicit_material(name, lightmap, image, &*svc.images);
        let finished = self.compile(material, svc);
        MaterialHandle(self.install(finished) as u32)
    }

    /// Index of the newest material called `name` in any mode.
    pub fn index_by_name(&self, name: &str) -> Option<usize> {
        if name.is_empty() {
            return None;
        }
        self.lookup(&strip_extension(name), |_| true)
    }

    /// The material called `name`, or the default material.
    pub fn find_by_name(&self, name: &str) -> &Material {
        let index = self.index_by_name(name).unwrap_or_else(|| self.default_index());
        &self.materials[index]
    }

    /// Range-checked handle lookup. Bad handles get the default material.
    pub fn get(&self, handle: MaterialHandle) -> &Material {
        match self.materials.get(handle.0 as usize) {
            Some(material) => material,
            None => {
                warn!("get: out of range material handle {}", handle.0);
                &self.materials[self.default_index()]
            }
        }
    }

    /// The material actually drawn for `handle`, after remapping.
    pub fn resolve(&self, handle: MaterialHandle) -> &Material {
        let material = self.get(handle);
        match material.remapped {
            Some(target) => &self.materials[target],
            None => material,
        }
    }

    fn remap_source(&mut self, name: &str, svc: &mut Services<'_>) -> Option<usize> {
        let found = self
            .index_by_name(name)
            .filter(|&i| !self.materials[i].default_shader);
        let index = match found {
            Some(index) => index,
            None => self.register(name, LightmapIndex::Index(0), svc).0 as usize,
        };
        (index != 0 && !self.materials[index].default_shader).then_some(index)
    }

    /// Draw `new_name` wherever `name` is used, in every lighting mode.
    /// Remapping a material to itself clears the remap.
    pub fn remap(
        &mut self,
        name: &str,
        new_name: &str,
        time_offset: Option<&str>,
        svc: &mut Services<'_>,
    ) -> Result<(), RegistryError> {
        let Some(_) = self.remap_source(name, svc) else {
            warn!("remap: material {name} not found");
            return Err(RegistryError::NotFound(name.to_string()));
        };
        let Some(target) = self.remap_source(new_name, svc) else {
            warn!("remap: new material {new_name} not found");
            return Err(RegistryError::NotFound(new_name.to_string()));
        };

        let stripped = strip_extension(name);
        let chain = self.buckets[name_hash(&stripped, FILE_HASH_SIZE)].clone();
        for index in chain {
            let material = &mut self.materials[index];
            if material.name.eq_ignore_ascii_case(&stripped) {
                material.remapped = (index != target).then_some(target);
            }
        }
        if let Some(offset) = time_offset {
            self.materials[target].time_offset = atof(offset);
        }
        Ok(())
    }

    /// One row per material, in registration or draw order.
    pub fn list(&self, sorted: bool, images: &dyn ImageProvider) -> Vec<MaterialRow> {
        let order: Box<dyn Iterator<Item = usize> + '_> = if sorted {
            Box::new(self.sorted.iter().copied())
        } else {
            Box::new(0..self.materials.len())
        };
        order
            .map(|i| {
                let m = &self.materials[i];
                let passes = m.num_unfogged_passes.min(m.stages.len());
                MaterialRow {
                    index: m.index,
                    name: m.name.clone(),
                    passes: m.num_unfogged_passes,
                    lightmapped: m.lightmap.is_lightmap(),
                    explicit: m.explicitly_defined,
                    iterator: iterator_label(m.iterator),
                    program: m.program.as_ref().map(|p| p.handle),
                    defaulted: m.default_shader,
                    stages: m.stages[..passes]
                        .iter()
                        .map(|stage| {
                            stage
                                .bundles
                                .iter()
                                .filter_map(|b| b.image())
                                .map(|id| images.info(id).map_or_else(|| format!("#{}", id.0), |i| i.name.clone()))
                                .collect()
                        })
                        .collect(),
                }
            })
            .collect()
    }

    /// Store last frame's occlusion result for a material and add it to
    /// its program's running total.
    pub fn record_query(&self, index: usize, samples: u32) {
        if let Some(material) = self.materials.get(index) {
            material.store_query_result(samples);
            if let Some(program) = &material.program {
                program.add_query_samples(samples);
            }
        }
    }

    /// Clear the per-program sample totals before a new frame.
    pub fn reset_queries(&self) {
        self.programs.reset_queries();
    }

    pub fn default_index(&self) -> usize {
        self.internal.get(&Internal::Default).copied().unwrap_or(0)
    }

    /// Index of an internal material. Unavailable ones map to the default.
    pub fn internal_index(&self, kind: Internal) -> usize {
        self.internal
            .get(&kind)
            .copied()
            .unwrap_or_else(|| self.default_index())
    }

    pub fn has_internal(&self, kind: Internal) -> bool {
        self.internal.contains_key(&kind)
    }

    pub fn projection_shadow(&self) -> usize {
        self.projection_shadow
    }

    pub fn flare(&self) -> usize {
        self.flare
    }

    pub fn sun(&self) -> usize {
        self.sun
    }

    pub fn material(&self, index: usize) -> &Material {
        &self.materials[index]
    }

    /// The depth pre-pass material paired with `material`, if any.
    pub fn depth_material(&self, material: &Material) -> Option<&Material> {
        material.depth_shader.map(|i| &self.materials[i])
    }

    pub fn materials(&self) -> &[Material] {
        &self.materials
    }

    /// Materials in draw order.
    pub fn sorted(&self) -> impl Iterator<Item = &Material> + '_ {
        self.sorted.iter().map(|&i| &self.materials[i])
    }

    pub fn len(&self) -> usize {
        self.materials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }

    pub fn programs(&self) -> &ProgramCache {
        &self.programs
    }

    pub fn text(&self) -> &TextIndex {
        &self.text
    }

    pub fn caps(&self) -> &Capabilities {
        &self.caps
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::images::ImageTable;
    use crate::text_index::ScriptFile;
    use tessera_core::material::sort;

    const SCRIPT: &str = "\
textures/base/wall
{
    {
        map $lightmap
    }
    {
        map textures/base/wall.tga
        blendFunc filter
    }
}

textures/fx/glow
{
    {
        map textures/fx/glow.tga
        blendFunc add
    }
}

textures/broken
{
    {
        map textures/base/wall.tga
        shimmer 4
    }
}
";

    fn images() -> ImageTable {
        let mut images = ImageTable::new();
        images.add_lightmap();
        images.insert("textures/base/wall", 128, 128, false);
        images.insert("textures/fx/glow", 64, 64, false);
        images.insert("gfx/hud/icon", 32, 32, true);
        images
    }

    fn registry(images: &mut ImageTable, config: RendererConfig) -> Registry {
        let caps = Capabilities {
            glsl_version: None,
            ..Default::default()
        };
        let text = TextIndex::build(vec![ScriptFile::new("test.shader", SCRIPT)]);
        let mut svc = Services {
            images,
            compiler: None,
        };
        Registry::new(caps, config, text, &mut svc)
    }

    #[test]
    fn test_internal_materials_created() {
        let mut images = images();
        let reg = registry(&mut images, RendererConfig::default());
        assert_eq!(reg.default_index(), 0);
        assert_eq!(reg.material(0).name, "<default>");
        // no programs: the model default falls back to the plain one
        assert_eq!(reg.internal_index(Internal::DefaultMd3), 0);
        let portal = reg.material(reg.internal_index(Internal::PreparePortal));
        assert_eq!(portal.iterator, IteratorKind::PreparePortal);
        assert!(reg.has_internal(Internal::BuildVbo));
        assert!(!reg.has_internal(Internal::CopyDepth));
        // nothing defines these in the test script
        assert!(reg.material(reg.flare()).default_shader);
    }

    #[test]
    fn test_register_script_material() {
        let mut images = images();
        let mut reg = registry(&mut images, RendererConfig::default());
        let mut svc = Services {
            images: &mut images,
            compiler: None,
        };
        let h = reg.register("textures/base/wall", LightmapIndex::Index(0), &mut svc);
        assert_ne!(h, MaterialHandle(0));
        let m = reg.get(h);
        assert!(m.explicitly_defined);
        assert_eq!(m.sort, sort::OPAQUE);
        assert_eq!(m.index, h.0 as usize);

        // same name and mode returns the same handle
        let again = reg.register("TEXTURES/base/wall.tga", LightmapIndex::Index(0), &mut svc);
        assert_eq!(again, h);
    }

    #[test]
    fn test_missing_lightmap_falls_back_to_vertex() {
        let mut images = images();
        let mut reg = registry(&mut images, RendererConfig::default());
        let mut svc = Services {
            images: &mut images,
            compiler: None,
        };
        let h = reg.register("textures/fx/glow", LightmapIndex::Index(5), &mut svc);
        assert_eq!(reg.get(h).lightmap, LightmapIndex::ByVertex);
    }

    #[test]
    fn test_implicit_and_missing_materials() {
        let mut images = images();
        let mut reg = registry(&mut images, RendererConfig::default());
        let mut svc = Services {
            images: &mut images,
            compiler: None,
        };
        let icon = reg.register_2d("gfx/hud/icon", &mut svc);
        assert_ne!(icon, MaterialHandle(0));
        assert!(!reg.get(icon).explicitly_defined);
        assert_eq!(reg.get(icon).lightmap, LightmapIndex::TwoD);

        let before = reg.len();
        assert_eq!(reg.register_2d("gfx/hud/nothing", &mut svc), MaterialHandle(0));
        assert_eq!(reg.len(), before + 1);
        // the defaulted placeholder answers later lookups in any mode
        assert_eq!(reg.register("gfx/hud/nothing", LightmapIndex::None, &mut svc), MaterialHandle(0));
        assert_eq!(reg.len(), before + 1);
        assert!(reg.find_by_name("gfx/hud/nothing").default_shader);
    }

    #[test]
    fn test_parse_failure_defaults() {
        let mut images = images();
        let mut reg = registry(&mut images, RendererConfig::default());
        let mut svc = Services {
            images: &mut images,
            compiler: None,
        };
        let h = reg.register("textures/broken", LightmapIndex::Index(0), &mut svc);
        assert_eq!(h, MaterialHandle(0));
        assert!(reg.find_by_name("textures/broken").default_shader);
    }

    #[test]
    fn test_get_out_of_range_returns_default() {
        let mut images = images();
        let reg = registry(&mut images, RendererConfig::default());
        let m = reg.get(MaterialHandle(10_000));
        assert_eq!(m.name, "<default>");
        assert_eq!(reg.find_by_name("").name, "<default>");
        assert_eq!(reg.find_by_name("no/such/thing").name, "<default>");
    }

    #[test]
    fn test_remap_and_clear() {
        let mut images = images();
        let mut reg = registry(&mut images, RendererConfig::default());
        let mut svc = Services {
            images: &mut images,
            compiler: None,
        };
        let wall = reg.register("textures/base/wall", LightmapIndex::Index(0), &mut svc);
        let glow = reg.register("textures/fx/glow", LightmapIndex::Index(0), &mut svc);
        reg.remap("textures/base/wall", "textures/fx/glow", Some("2.5"), &mut svc)
            .unwrap();
        assert_eq!(reg.resolve(wall).name, "textures/fx/glow");
        assert_eq!(reg.get(glow).time_offset, 2.5);

        reg.remap("textures/base/wall", "textures/base/wall", None, &mut svc)
            .unwrap();
        assert_eq!(reg.resolve(wall).name, "textures/base/wall");

        let err = reg.remap("textures/base/wall", "no/such", None, &mut svc);
        assert_eq!(err, Err(RegistryError::NotFound("no/such".to_string())));
    }

    #[test]
    fn test_sorted_order_and_indices() {
        let mut images = images();
        let mut reg = registry(&mut images, RendererConfig::default());
        let mut svc = Services {
            images: &mut images,
            compiler: None,
        };
        let glow = reg.register("textures/fx/glow", LightmapIndex::Index(0), &mut svc);
        let wall = reg.register("textures/base/wall", LightmapIndex::Index(0), &mut svc);
        let pos = |h: MaterialHandle| reg.get(h).sorted_index;
        // opaque draws before additive even though it registered later
        assert!(pos(wall) < pos(glow));
        for (slot, m) in reg.sorted().enumerate() {
            assert_eq!(m.sorted_index, slot);
        }
        let last = reg.sorted().last().unwrap();
        assert!(last.sort >= reg.get(glow).sort);
    }

    #[test]
    fn test_depth_pass_shares_default_depth() {
        let mut images = images();
        let config = RendererConfig {
            depth_pass: 1,
            ..Default::default()
        };
        let mut reg = registry(&mut images, config);
        let default_depth = reg.material(0).depth_shader;
        assert!(default_depth.is_some());
        assert_eq!(reg.material(default_depth.unwrap()).name, "<default>*");

        let mut svc = Services {
            images: &mut images,
            compiler: None,
        };
        let h = reg.register("textures/base/wall", LightmapIndex::Index(0), &mut svc);
        let wall = reg.get(h);
        assert_eq!(wall.depth_shader, default_depth);
        assert!(reg.depth_material(wall).unwrap().is_depth);
    }

    #[test]
    fn test_list_rows() {
        let mut images = images();
        let mut reg = registry(&mut images, RendererConfig::default());
        let mut svc = Services {
            images: &mut images,
            compiler: None,
        };
        let h = reg.register("textures/base/wall", LightmapIndex::Index(0), &mut svc);
        let rows = reg.list(false, &images);
        assert_eq!(rows.len(), reg.len());
        let row = &rows[h.0 as usize];
        assert_eq!(row.name, "textures/base/wall");
        assert!(row.explicit);
        assert!(row.lightmapped);
        assert_eq!(row.stages.len(), row.passes);
        assert!(row.stages.iter().flatten().any(|n| n == "textures/base/wall"));
        assert_eq!(reg.list(true, &images).len(), rows.len());
    }

    #[test]
    fn test_record_query() {
        let mut images = images();
        let mut reg = registry(&mut images, RendererConfig::default());
        let mut svc = Services {
            images: &mut images,
            compiler: None,
        };
        let h = reg.register("textures/base/wall", LightmapIndex::Index(0), &mut svc);
        reg.record_query(h.0 as usize, 40);
        assert_eq!(reg.get(h).query_result(), 40);
    }
}
