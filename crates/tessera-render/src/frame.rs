//! Per-view inputs the backend reads while drawing: camera, the entity
//! being drawn, dynamic lights and fog volumes.

use glam::{Vec3, Vec4};

use crate::tess::Instance;

/// The entity whose surfaces are in the tessellation buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityState {
    pub origin: Vec3,
    pub axis: [Vec3; 3],
    pub shader_rgba: [u8; 4],
    pub shader_tex_coord: [f32; 2],
    pub ambient_light: Vec3,
    pub directed_light: Vec3,
    /// Unit vector towards the dominant light.
    pub light_dir: Vec3,
    /// Height of the plane projection shadows fall on.
    pub shadow_plane: f32,
    /// The static world rather than a model.
    pub is_world: bool,
}

impl Default for EntityState {
    fn default() -> Self {
        Self {
            origin: Vec3::ZERO,
            axis: [Vec3::X, Vec3::Y, Vec3::Z],
            shader_rgba: [255; 4],
            shader_tex_coord: [0.0; 2],
            ambient_light: Vec3::splat(64.0),
            directed_light: Vec3::splat(128.0),
            light_dir: Vec3::Z,
            shadow_plane: 0.0,
            is_world: true,
        }
    }
}

impl EntityState {
    /// Per-instance attributes of this entity at `shader_time`.
    pub fn instance(&self, shader_time: f32) -> Instance {
        let [x, y, z] = self.axis;
        Instance {
            times: [shader_time, 0.0, 0.0, 0.0],
            trans_x: [x.x, y.x, z.x, self.origin.x],
            trans_y: [x.y, y.y, z.y, self.origin.y],
            trans_z: [x.z, y.z, z.z, self.origin.z],
            tex_coord: [self.shader_tex_coord[0], self.shader_tex_coord[1], 0.0, 0.0],
            ambient_light: self.ambient_light.extend(0.0).to_array(),
            directed_light: self.directed_light.to_array(),
            color: self.shader_rgba,
            light_dir: self.light_dir.extend(0.0).to_array(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DynamicLight {
    pub origin: Vec3,
    pub radius: f32,
    pub color: Vec3,
    /// Adds light instead of modulating the surface.
    pub additive: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FogVolume {
    pub color: [u8; 4],
    /// `1 / (8 * depth_for_opaque)`.
    pub tc_scale: f32,
    /// Plane of the visible fog surface, `(normal, dist)`.
    pub surface: Option<Vec4>,
}

/// Texcoord generators of one fog volume as seen from the current view.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FogVectors {
    pub distance: Vec4,
    pub depth: Vec4,
    pub eye_t: f32,
    pub eye_outside: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Seconds.
    pub time: f32,
    pub view_origin: Vec3,
    /// Forward, left, up.
    pub view_axis: [Vec3; 3],
    pub mirrored: bool,
    /// 0 for the main view, n for the nth nested portal.
    pub portal_level: u32,
    pub entity: EntityState,
    pub dlights: Vec<DynamicLight>,
    /// Fog index n refers to `fogs[n - 1]`; 0 means no fog.
    pub fogs: Vec<FogVolume>,
}

impl Default for Frame {
    fn default() -> Self {
        Self {
            time: 0.0,
            view_origin: Vec3::ZERO,
            view_axis: [Vec3::X, Vec3::Y, Vec3::Z],
            mirrored: false,
            portal_level: 0,
            entity: EntityState::default(),
            dlights: Vec::new(),
            fogs: Vec::new(),
        }
    }
}

impl Frame {
    pub fn fog(&self, index: usize) -> Option<&FogVolume> {
        index.checked_sub(1).and_then(|i| self.fogs.get(i))
    }

    pub fn fog_vectors(&self, fog: &FogVolume) -> FogVectors {
        let forward = self.view_axis[0] * fog.tc_scale;
        let distance = forward.extend(-self.view_origin.dot(forward));
        let (depth, eye_t) = match fog.surface {
            Some(plane) => {
                let normal = plane.truncate();
                let depth = normal.extend(-plane.w);
                (depth, self.view_origin.dot(normal) - plane.w)
            }
            None => (Vec4::new(0.0, 0.0, 0.0, 1.0), 1.0),
        };
        FogVectors {
            distance,
            depth,
            eye_t,
            eye_outside: eye_t < 0.0,
        }
    }

    /// World-space lights touching this surface, by bit.
    pub fn lit_by(&self, bits: u32) -> impl Iterator<Item = &DynamicLight> + '_ {
        self.dlights
            .iter()
            .enumerate()
            .filter(move |&(i, _)| i < 32 && bits & (1u32 << i) != 0)
            .map(|(_, l)| l)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fog_index_zero_is_none() {
        let mut frame = Frame::default();
        frame.fogs.push(FogVolume {
            color: [128, 128, 128, 255],
            tc_scale: 1.0 / 512.0,
            surface: None,
        });
        assert!(frame.fog(0).is_none());
        assert!(frame.fog(1).is_some());
        assert!(frame.fog(2).is_none());
    }

    #[test]
    fn test_fog_vectors_eye_inside_without_surface() {
        let frame = Frame::default();
        let fog = FogVolume {
            color: [0; 4],
            tc_scale: 0.5,
            surface: None,
        };
        let v = frame.fog_vectors(&fog);
        assert!(!v.eye_outside);
        assert_eq!(v.distance, Vec4::new(0.5, 0.0, 0.0, 0.0));
    }

    #[test]
    fn test_entity_instance_rows() {
        let entity = EntityState {
            origin: Vec3::new(1.0, 2.0, 3.0),
            ..Default::default()
        };
        let inst = entity.instance(4.5);
        assert_eq!(inst.times[0], 4.5);
        assert_eq!(inst.trans_x, [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(inst.trans_z, [0.0, 0.0, 1.0, 3.0]);
        assert_eq!(inst.color, [255; 4]);
    }

    #[test]
    fn test_lit_by_mask() {
        let mut frame = Frame::default();
        for i in 0..3 {
            frame.dlights.push(DynamicLight {
                origin: Vec3::splat(i as f32),
                radius: 100.0,
                color: Vec3::ONE,
                additive: false,
            });
        }
        let lit: Vec<_> = frame.lit_by(0b101).map(|l| l.origin.x).collect();
        assert_eq!(lit, [0.0, 2.0]);
    }
}
