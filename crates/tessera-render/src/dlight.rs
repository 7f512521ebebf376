//! Dynamic lights for programs: a bounding sphere tree over the frame's
//! lights, flattened into the `dLights` uniform block.
//!
//! The tree is built bottom-up by repeatedly merging the pair whose
//! enclosing sphere is smallest. Leaves take part in merging with twice
//! their radius. The block holds the nodes in pre-order: a leaf has link
//! 1 and its own colour, an inner node has its leaf count as link so a
//! shader can skip the whole subtree when its sphere misses.

use glam::Vec3;
use tessera_core::RendererConfig;
use tessera_material::{BlockLayout, UniformBuffer};

use crate::backend::{BufferTarget, GpuBackend};
use crate::frame::DynamicLight;

/// Lights the block has room for (255 sphere slots).
pub const MAX_SHADER_DLIGHTS: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sphere {
    pub center: Vec3,
    pub radius: f32,
}

/// Smallest sphere enclosing both `a` and `b`.
pub fn bounding_sphere(a: Sphere, b: Sphere) -> Sphere {
    let d = a.center.distance(b.center);
    if a.radius >= b.radius + d {
        return a;
    }
    if b.radius >= a.radius + d {
        return b;
    }
    let t = 0.5 * (b.radius + d - a.radius) / d;
    Sphere {
        center: a.center.lerp(b.center, t),
        radius: 0.5 * (a.radius + d + b.radius),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeRef {
    Light(usize),
    Inner(usize),
}

#[derive(Debug, Clone, Copy)]
struct Node {
    sphere: Sphere,
    leaves: u32,
    left: NodeRef,
    right: NodeRef,
}

/// One entry of the flattened tree.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Record {
    Leaf { sphere: Sphere, color: Vec3 },
    Inner { sphere: Sphere, leaves: u32 },
}

impl Record {
    pub fn sphere(&self) -> Sphere {
        match *self {
            Record::Leaf { sphere, .. } | Record::Inner { sphere, .. } => sphere,
        }
    }

    pub fn link(&self) -> i32 {
        match *self {
            Record::Leaf { .. } => 1,
            Record::Inner { leaves, .. } => i32::try_from(leaves).unwrap_or(i32::MAX),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LightTree<'a> {
    lights: &'a [DynamicLight],
    nodes: Vec<Node>,
    root: Option<NodeRef>,
}

impl<'a> LightTree<'a> {
    pub fn build(lights: &'a [DynamicLight]) -> Self {
        let lights = &lights[..lights.len().min(MAX_SHADER_DLIGHTS)];
        let mut nodes: Vec<Node> = Vec::with_capacity(lights.len().saturating_sub(1));
        let mut active: Vec<NodeRef> = (0..lights.len()).map(NodeRef::Light).collect();

        let merge_sphere = |nodes: &[Node], r: NodeRef| match r {
            NodeRef::Light(i) => (
                Sphere {
                    center: lights[i].origin,
                    radius: 2.0 * lights[i].radius,
                },
                1,
            ),
            NodeRef::Inner(i) => (nodes[i].sphere, nodes[i].leaves),
        };

        while active.len() > 1 {
            let mut best: Option<(usize, usize, Node)> = None;
            for i in 0..active.len() {
                for j in i + 1..active.len() {
                    let (s1, l1) = merge_sphere(&nodes, active[i]);
                    let (s2, l2) = merge_sphere(&nodes, active[j]);
                    let sphere = bounding_sphere(s1, s2);
                    if best.as_ref().map_or(true, |(_, _, b)| sphere.radius < b.sphere.radius) {
                        let node = Node {
                            sphere,
                            leaves: l1 + l2,
                            left: active[i],
                            right: active[j],
                        };
                        best = Some((i, j, node));
                    }
                }
            }
            let Some((i, j, node)) = best else {
                break;
            };
            active[i] = NodeRef::Inner(nodes.len());
            nodes.push(node);
            active.remove(j);
        }

        Self {
            lights,
            nodes,
            root: active.first().copied(),
        }
    }

    /// Number of lights in the tree.
    pub fn num_lights(&self) -> usize {
        self.lights.len()
    }

    /// Nodes in the tree, `2n - 1` for `n` lights.
    pub fn num_nodes(&self) -> usize {
        (2 * self.lights.len()).saturating_sub(1)
    }

    /// The tree in pre-order.
    pub fn records(&self) -> Vec<Record> {
        let mut out = Vec::with_capacity(self.num_nodes());
        if let Some(root) = self.root {
            self.flatten(root, &mut out);
        }
        out
    }

    fn flatten(&self, node: NodeRef, out: &mut Vec<Record>) {
        match node {
            NodeRef::Light(i) => {
                let light = &self.lights[i];
                out.push(Record::Leaf {
                    sphere: Sphere {
                        center: light.origin,
                        radius: light.radius,
                    },
                    color: light.color,
                });
            }
            NodeRef::Inner(i) => {
                let node = &self.nodes[i];
                out.push(Record::Inner {
                    sphere: node.sphere,
                    leaves: node.leaves,
                });
                self.flatten(node.left, out);
                self.flatten(node.right, out);
            }
        }
    }
}

/// Screen tile factors of the light tree visualisation.
pub fn debug_factors(mode: u8, viewport: (u32, u32)) -> [f32; 2] {
    let (w, h) = (viewport.0.max(1) as f32, viewport.1.max(1) as f32);
    match mode {
        1 => [1.0 / w, 1.0 / h],
        2 => [4.0 / w, 3.0 / h],
        _ => [0.0, 0.0],
    }
}

fn put<T: bytemuck::Pod>(buffer: &mut [u8], offset: u32, value: &T) -> Option<()> {
    let bytes = bytemuck::bytes_of(value);
    let start = offset as usize;
    buffer.get_mut(start..start + bytes.len())?.copy_from_slice(bytes);
    Some(())
}

/// Serialise `lights` into a buffer laid out as `layout`. `None` when
/// the layout lacks a member or is too small for the lights.
pub fn pack(lights: &[DynamicLight], layout: &BlockLayout, debug: [f32; 2]) -> Option<Vec<u8>> {
    let spheres = layout.slot("dlSpheres")?;
    let colors = layout.slot("dlColors")?;
    let links = layout.slot("dlLinks")?;
    let num = layout.slot("dlNum")?;
    let dbg = layout.slot("dlDebug")?;

    let tree = LightTree::build(lights);
    let mut buffer = vec![0u8; layout.size as usize];
    let (mut s, mut c, mut l) = (spheres.offset, colors.offset, links.offset);
    for record in tree.records() {
        let sphere = record.sphere();
        put(&mut buffer, s, &sphere.center.extend(sphere.radius).to_array())?;
        s += spheres.stride;
        put(&mut buffer, l, &record.link())?;
        l += links.stride;
        if let Record::Leaf { color, .. } = record {
            put(&mut buffer, c, &color.to_array())?;
            c += colors.stride;
        }
    }
    put(&mut buffer, num.offset, &(tree.num_nodes() as i32))?;
    put(&mut buffer, dbg.offset, &debug)?;
    Some(buffer)
}

/// Upload this frame's lights into the dlight uniform buffer.
pub fn prepare(
    lights: &[DynamicLight],
    config: &RendererConfig,
    buffer: &UniformBuffer,
    backend: &mut dyn GpuBackend,
) -> bool {
    if lights.len() > MAX_SHADER_DLIGHTS {
        log::warn!("{} dynamic lights, only {MAX_SHADER_DLIGHTS} reach programs", lights.len());
    }
    let debug = debug_factors(config.dlight_debug, config.viewport);
    let Some(bytes) = pack(lights, &buffer.layout, debug) else {
        log::warn!("dlight block layout does not fit the light tree");
        return false;
    };
    backend.upload(BufferTarget::Uniform, buffer.handle, &bytes);
    true
}
