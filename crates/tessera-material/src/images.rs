use std::collections::HashMap;

use tessera_core::{AtlasLayout, ImageId, ImageInfo};

/// How an image file should be uploaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageOptions {
    pub mipmap: bool,
    pub allow_picmip: bool,
    pub clamp: bool,
}

impl ImageOptions {
    pub const REPEAT: Self = Self {
        mipmap: true,
        allow_picmip: true,
        clamp: false,
    };

    /// Menu graphics: no mipmaps, clamped edges.
    pub const CLAMP: Self = Self {
        mipmap: false,
        allow_picmip: false,
        clamp: true,
    };
}

/// Images the renderer creates itself rather than loading from disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinImage {
    /// Checkerboard used when a file is missing.
    Default,
    White,
    /// White scaled down by the overbright shift.
    IdentityLight,
    Dlight,
    Fog,
}

/// Image loading, consumed by the parser and the program synthesizer.
/// Decoding and upload live behind this trait.
pub trait ImageProvider {
    /// Find or load an image file. `name` may carry an extension.
    fn find_image(&mut self, name: &str, options: ImageOptions) -> Option<ImageInfo>;

    /// Find a normal/height map; the same lookup with height data kept
    /// in the alpha channel.
    fn find_height_map(&mut self, name: &str) -> Option<ImageInfo>;

    fn info(&self, id: ImageId) -> Option<&ImageInfo>;

    fn builtin(&self, image: BuiltinImage) -> ImageId;

    /// World lightmap `index`, if the map has one.
    fn lightmap(&self, index: u16) -> Option<ImageId>;

    /// Light direction map paired with lightmap `index`.
    fn deluxe_map(&self, index: u16) -> Option<ImageId>;

    fn num_lightmaps(&self) -> usize;

    /// Pack animation frames into one atlas.
    fn combine_images(&mut self, frames: &[ImageId]) -> Option<ImageId>;

    /// Start a looping cinematic and return its scratch image.
    fn video_map(&mut self, name: &str) -> Option<(u32, ImageId)>;
}

/// Canonical lookup key: lower case, forward slashes, no extension.
pub fn strip_extension(name: &str) -> String {
    let name = name.replace('\\', "/").to_ascii_lowercase();
    match name.rfind('.') {
        Some(dot) if !name[dot..].contains('/') => name[..dot].to_string(),
        _ => name,
    }
}

/// In-memory image table. Images are declared up front with their size
/// and alpha flag; nothing is decoded.
#[derive(Debug, Clone)]
pub struct ImageTable {
    images: Vec<ImageInfo>,
    by_name: HashMap<String, ImageId>,
    builtins: HashMap<BuiltinImage, ImageId>,
    lightmaps: Vec<ImageId>,
    deluxe_maps: Vec<ImageId>,
    videos: Vec<String>,
}

impl Default for ImageTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageTable {
    pub fn new() -> Self {
        let mut table = Self {
            images: Vec::new(),
            by_name: HashMap::new(),
            builtins: HashMap::new(),
            lightmaps: Vec::new(),
            deluxe_maps: Vec::new(),
            videos: Vec::new(),
        };
        for (builtin, name, has_alpha) in [
            (BuiltinImage::Default, "*default", false),
            (BuiltinImage::White, "*white", false),
            (BuiltinImage::IdentityLight, "*identitylight", false),
            (BuiltinImage::Dlight, "*dlight", true),
            (BuiltinImage::Fog, "*fog", true),
        ] {
            let id = table.insert(name, 64, 64, has_alpha);
            table.builtins.insert(builtin, id);
        }
        table
    }

    /// Declare an image. Re-declaring a name replaces its metadata.
    pub fn insert(&mut self, name: &str, width: u32, height: u32, has_alpha: bool) -> ImageId {
        let key = strip_extension(name);
        if let Some(&id) = self.by_name.get(&key) {
            if let Some(info) = self.images.get_mut(id.0 as usize - 1) {
                info.width = width;
                info.height = height;
                info.has_alpha = has_alpha;
            }
            return id;
        }
        let id = ImageId(self.images.len() as u32 + 1);
        self.images.push(ImageInfo {
            id,
            name: key.clone(),
            width,
            height,
            has_alpha,
            frames: None,
        });
        self.by_name.insert(key, id);
        id
    }

    pub fn add_lightmap(&mut self) -> ImageId {
        let n = self.lightmaps.len();
        let id = self.insert(&format!("*lightmap{n}"), 128, 128, false);
        self.lightmaps.push(id);
        id
    }

    pub fn add_deluxe_map(&mut self) -> ImageId {
        let n = self.deluxe_maps.len();
        let id = self.insert(&format!("*deluxemap{n}"), 128, 128, false);
        self.deluxe_maps.push(id);
        id
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    fn lookup(&self, name: &str) -> Option<ImageInfo> {
        let id = self.by_name.get(&strip_extension(name))?;
        self.info(*id).cloned()
    }
}

impl ImageProvider for ImageTable {
    fn find_image(&mut self, name: &str, _options: ImageOptions) -> Option<ImageInfo> {
        self.lookup(name)
    }

    fn find_height_map(&mut self, name: &str) -> Option<ImageInfo> {
        self.lookup(name)
    }

    fn info(&self, id: ImageId) -> Option<&ImageInfo> {
        if id.0 == 0 {
            return None;
        }
        self.images.get(id.0 as usize - 1)
    }

    fn builtin(&self, image: BuiltinImage) -> ImageId {
        self.builtins.get(&image).copied().unwrap_or_default()
    }

    fn lightmap(&self, index: u16) -> Option<ImageId> {
        self.lightmaps.get(index as usize).copied()
    }

    fn deluxe_map(&self, index: u16) -> Option<ImageId> {
        self.deluxe_maps.get(index as usize).copied()
    }

    fn num_lightmaps(&self) -> usize {
        self.lightmaps.len()
    }

    fn combine_images(&mut self, frames: &[ImageId]) -> Option<ImageId> {
        if frames.len() <= 1 {
            return None;
        }
        let first = self.info(frames[0])?.clone();
        let mut has_alpha = false;
        for &f in frames {
            let info = self.info(f)?;
            if (info.width, info.height) != (first.width, first.height) {
                return None;
            }
            has_alpha |= info.has_alpha;
        }
        // one row, padded to a power of two so frame offsets stay exact in tc.x
        let count = frames.len() as u32;
        let columns = count.next_power_of_two();
        let name = format!("*combined_{}_{}", first.name, count);
        let id = self.insert(&name, first.width * columns, first.height, has_alpha);
        if let Some(info) = self.images.get_mut(id.0 as usize - 1) {
            info.frames = Some(AtlasLayout {
                columns,
                rows: 1,
                frames: count,
            });
        }
        Some(id)
    }

    fn video_map(&mut self, name: &str) -> Option<(u32, ImageId)> {
        let handle = self.videos.len() as u32;
        self.videos.push(name.to_string());
        let id = self.insert(&format!("*scratch{handle}"), 256, 256, false);
        Some((handle, id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_extension() {
        assert_eq!(strip_extension("Textures\\Base\\Wall.TGA"), "textures/base/wall");
        assert_eq!(strip_extension("textures/base.dir/wall"), "textures/base.dir/wall");
    }

    #[test]
    fn test_lookup_ignores_extension_and_case() {
        let mut table = ImageTable::new();
        let id = table.insert("textures/base/wall.tga", 256, 256, false);
        let found = table
            .find_image("TEXTURES/base/wall.jpg", ImageOptions::REPEAT)
            .unwrap();
        assert_eq!(found.id, id);
        assert!(table.find_image("missing", ImageOptions::REPEAT).is_none());
    }

    #[test]
    fn test_builtins_are_distinct() {
        let table = ImageTable::new();
        let white = table.builtin(BuiltinImage::White);
        let default = table.builtin(BuiltinImage::Default);
        assert_ne!(white, default);
        assert_ne!(white, ImageId(0));
    }

    #[test]
    fn test_combine_images_layout() {
        let mut table = ImageTable::new();
        let frames: Vec<_> = (0..5)
            .map(|i| table.insert(&format!("anim/f{i}"), 32, 32, false))
            .collect();
        let atlas = table.combine_images(&frames).unwrap();
        let info = table.info(atlas).unwrap();
        let layout = info.frames.unwrap();
        assert_eq!((layout.columns, layout.rows, layout.frames), (8, 1, 5));
        assert_eq!((info.width, info.height), (256, 32));
    }

    #[test]
    fn test_combine_images_rejects_mixed_sizes() {
        let mut table = ImageTable::new();
        let a = table.insert("anim/a", 32, 32, false);
        let b = table.insert("anim/b", 64, 32, false);
        assert!(table.combine_images(&[a, b]).is_none());
        assert!(table.combine_images(&[a]).is_none());
    }
}
