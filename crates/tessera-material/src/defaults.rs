//! Materials that exist without script text: the implicit material for a
//! bare image in each lighting mode, and the renderer's own internal and
//! marker materials.

use tessera_core::material::{sort, AlphaGen, ColorGen, IteratorKind};
use tessera_core::{AttrFlags, Capabilities, ImageId, LightmapIndex, Material, RendererConfig, Stage, StateBits};

use crate::images::{BuiltinImage, ImageProvider};

fn image_stage(image: ImageId, rgb_gen: ColorGen, state: StateBits) -> Stage {
    let mut stage = Stage {
        rgb_gen,
        state,
        ..Default::default()
    };
    stage.bundles[0].images.push(image);
    stage
}

/// Shading for an image with no script definition, chosen by lighting
/// mode: diffuse-lit for models, vertex colours for pre-lit geometry,
/// alpha-blended for 2D and a lightmap-times-texture pair for world
/// surfaces.
pub fn implicit_material(
    name: &str,
    lightmap: LightmapIndex,
    image: ImageId,
    images: &dyn ImageProvider,
) -> Material {
    let mut material = Material::new(name, lightmap);
    let filter = StateBits::SRCBLEND_DST_COLOR | StateBits::DSTBLEND_ZERO;
    material.stages = match lightmap {
        LightmapIndex::None | LightmapIndex::Md3 => {
            vec![image_stage(image, ColorGen::LightingDiffuse, StateBits::DEFAULT)]
        }
        LightmapIndex::ByVertex => {
            let mut stage = image_stage(image, ColorGen::ExactVertex, StateBits::DEFAULT);
            stage.alpha_gen = AlphaGen::Skip;
            vec![stage]
        }
        LightmapIndex::TwoD => {
            let mut stage = image_stage(
                image,
                ColorGen::Vertex,
                StateBits::DEPTHTEST_DISABLE
                    | StateBits::SRCBLEND_SRC_ALPHA
                    | StateBits::DSTBLEND_ONE_MINUS_SRC_ALPHA,
            );
            stage.alpha_gen = AlphaGen::Vertex;
            vec![stage]
        }
        LightmapIndex::WhiteImage => vec![
            image_stage(
                images.builtin(BuiltinImage::White),
                ColorGen::IdentityLighting,
                StateBits::DEFAULT,
            ),
            image_stage(image, ColorGen::Identity, filter),
        ],
        LightmapIndex::Index(n) => {
            let lm = images
                .lightmap(n)
                .unwrap_or_else(|| images.builtin(BuiltinImage::White));
            let mut first = image_stage(lm, ColorGen::Identity, StateBits::DEFAULT);
            first.bundles[0].is_lightmap = true;
            vec![first, image_stage(image, ColorGen::Identity, filter)]
        }
    };
    material
}

/// Materials the renderer creates for itself at start-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Internal {
    Default,
    DefaultMd3,
    /// Only exists to produce a program for fog blending.
    Fog,
    Shadow,
    PreparePortal,
    FinalisePortal,
    BuildVbo,
    BuildIbo,
    CopyDepth,
}

impl Internal {
    pub const ALL: [Internal; 9] = [
        Internal::Default,
        Internal::DefaultMd3,
        Internal::Fog,
        Internal::Shadow,
        Internal::PreparePortal,
        Internal::FinalisePortal,
        Internal::BuildVbo,
        Internal::BuildIbo,
        Internal::CopyDepth,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Internal::Default => "<default>",
            Internal::DefaultMd3 => "<default md3>",
            Internal::Fog => "<fog>",
            Internal::Shadow => "<stencil shadow>",
            Internal::PreparePortal => "<prepare portal>",
            Internal::FinalisePortal => "<finalise portal>",
            Internal::BuildVbo => "<buildVBO>",
            Internal::BuildIbo => "<buildIBO>",
            Internal::CopyDepth => "<copyDepth>",
        }
    }

    /// Whether the material is created at all with these capabilities.
    pub fn available(self, caps: &Capabilities, config: &RendererConfig) -> bool {
        let programs = caps.glsl_version.is_some();
        match self {
            Internal::DefaultMd3 => programs && caps.vertex_buffers && caps.texture_buffers,
            Internal::BuildVbo | Internal::BuildIbo => caps.vertex_buffers,
            Internal::CopyDepth => programs && config.depth_pass > 0,
            _ => true,
        }
    }

    /// The material as it goes into the finisher.
    pub fn material(self, images: &dyn ImageProvider) -> Material {
        let default_image = images.builtin(BuiltinImage::Default);
        let lightmap = match self {
            Internal::DefaultMd3 => LightmapIndex::Md3,
            _ => LightmapIndex::None,
        };
        let mut material = Material::new(self.name(), lightmap);
        match self {
            Internal::Default | Internal::DefaultMd3 => {
                let mut stage = image_stage(default_image, ColorGen::Vertex, StateBits::DEFAULT);
                stage.alpha_gen = AlphaGen::Vertex;
                material.sort = sort::OPAQUE;
                material.stages.push(stage);
            }
            Internal::Fog => {
                material.stages.push(image_stage(
                    default_image,
                    ColorGen::Vertex,
                    StateBits::DEFAULT
                        | StateBits::SRCBLEND_SRC_ALPHA
                        | StateBits::DSTBLEND_ONE_MINUS_SRC_ALPHA,
                ));
            }
            _ => {}
        }
        material
    }

    /// Overrides applied after finishing: markers carry their own sort
    /// key and iterator and have no stages to draw.
    pub fn mark(self, material: &mut Material) {
        let (sort, iterator, any) = match self {
            Internal::Default | Internal::DefaultMd3 | Internal::Fog => return,
            Internal::Shadow => (sort::STENCIL_SHADOW, IteratorKind::Shadow, material.any_attrs),
            Internal::PreparePortal => (sort::PORTAL, IteratorKind::PreparePortal, AttrFlags::FULL_DYNAMIC),
            Internal::FinalisePortal => (sort::PORTAL, IteratorKind::FinalisePortal, AttrFlags::FULL_DYNAMIC),
            Internal::BuildVbo => (sort::BAD, IteratorKind::BuildVbo, material.any_attrs),
            Internal::BuildIbo => (sort::BAD, IteratorKind::BuildIbo, material.any_attrs),
            Internal::CopyDepth => (sort::COPY_DEPTH, IteratorKind::CopyDepth, AttrFlags::VERTEX_DYNAMIC),
        };
        material.sort = sort;
        material.iterator = iterator;
        material.any_attrs = any;
        material.query = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::images::ImageTable;

    #[test]
    fn test_implicit_world_surface_is_lightmap_pair() {
        let mut images = ImageTable::new();
        let lm = images.add_lightmap();
        let tex = images.insert("textures/base/floor", 64, 64, false);
        let m = implicit_material("textures/base/floor", LightmapIndex::Index(0), tex, &images);
        assert_eq!(m.stages.len(), 2);
        assert_eq!(m.stages[0].bundles[0].image(), Some(lm));
        assert!(m.stages[0].bundles[0].is_lightmap);
        assert_eq!(m.stages[1].bundles[0].image(), Some(tex));
        assert_eq!(
            m.stages[1].state.blend(),
            StateBits::SRCBLEND_DST_COLOR | StateBits::DSTBLEND_ZERO
        );
    }

    #[test]
    fn test_implicit_modes() {
        let mut images = ImageTable::new();
        let tex = images.insert("gfx/icon", 32, 32, true);

        let model = implicit_material("gfx/icon", LightmapIndex::None, tex, &images);
        assert_eq!(model.stages[0].rgb_gen, ColorGen::LightingDiffuse);

        let prelit = implicit_material("gfx/icon", LightmapIndex::ByVertex, tex, &images);
        assert_eq!(prelit.stages[0].rgb_gen, ColorGen::ExactVertex);
        assert_eq!(prelit.stages[0].alpha_gen, AlphaGen::Skip);

        let hud = implicit_material("gfx/icon", LightmapIndex::TwoD, tex, &images);
        assert!(hud.stages[0].state.contains(StateBits::DEPTHTEST_DISABLE));
        assert!(!hud.stages[0].state.contains(StateBits::DEPTHMASK_TRUE));
        assert_eq!(hud.stages[0].alpha_gen, AlphaGen::Vertex);

        let bright = implicit_material("gfx/icon", LightmapIndex::WhiteImage, tex, &images);
        assert_eq!(
            bright.stages[0].bundles[0].image(),
            Some(images.builtin(BuiltinImage::White))
        );
        assert_eq!(bright.stages[0].rgb_gen, ColorGen::IdentityLighting);
    }

    #[test]
    fn test_marker_overrides() {
        let images = ImageTable::new();
        let mut m = Internal::PreparePortal.material(&images);
        assert!(m.stages.is_empty());
        Internal::PreparePortal.mark(&mut m);
        assert_eq!(m.sort, sort::PORTAL);
        assert_eq!(m.iterator, IteratorKind::PreparePortal);
        assert_eq!(m.any_attrs, AttrFlags::FULL_DYNAMIC);

        let mut d = Internal::Default.material(&images);
        Internal::Default.mark(&mut d);
        assert_eq!(d.sort, sort::OPAQUE);
        assert_eq!(d.stages[0].rgb_gen, ColorGen::Vertex);
    }

    #[test]
    fn test_availability() {
        let config = RendererConfig::default();
        let fixed = Capabilities {
            glsl_version: None,
            ..Default::default()
        };
        assert!(!Internal::DefaultMd3.available(&fixed, &config));
        assert!(Internal::BuildVbo.available(&fixed, &config));
        assert!(!Internal::CopyDepth.available(&Capabilities::default(), &config));
        let depth = RendererConfig {
            depth_pass: 1,
            ..Default::default()
        };
        assert!(Internal::CopyDepth.available(&Capabilities::default(), &depth));
    }
}
