use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

use glam::Vec3;

use crate::error::Result;
use crate::palette::ColorPalette;
use crate::rigidbody::{Aabb, RigidBody};

/// Block byte marking an empty cell.
pub const BLOCK_AIR: u8 = 255;

/// Shapes are shared between the scene list and their parent's child list.
pub type ShapeHandle = Rc<RefCell<Shape>>;
/// Palettes may be shared by every shape of a scene (MULTI files without
/// per-shape palettes all point at the root's).
pub type PaletteHandle = Rc<RefCell<ColorPalette>>;

/// Per-cell baked vertex light: four 4-bit fields packed into two bytes.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct VertexLight {
    pub ambient: u8,
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

impl VertexLight {
    pub const ENCODED_SIZE: usize = 2;

    pub fn to_bytes(self) -> [u8; 2] {
        [
            (self.red & 0x0F) | (self.ambient << 4),
            (self.blue & 0x0F) | (self.green << 4),
        ]
    }

    pub fn from_bytes(bytes: [u8; 2]) -> Self {
        Self {
            ambient: bytes[0] >> 4,
            red: bytes[0] & 0x0F,
            green: bytes[1] >> 4,
            blue: bytes[1] & 0x0F,
        }
    }
}

/// One node of a voxel scene: a dense block grid plus its palette, local
/// transform, named points and physics metadata.
///
/// Coordinates are local to the grid origin. Loaded shapes come back in
/// their AABB-min frame: the writer crops empty space and offsets pivot
/// and points of interest accordingly, and the reader does not undo that.
#[derive(Debug, Default)]
pub struct Shape {
    /// 1-based id unique within a file; 0 until a save or load assigns it.
    pub id: u16,
    /// Id of the parent shape, 0 for a root.
    pub parent_id: u16,
    size: [u16; 3],
    blocks: Vec<u8>,
    pub palette: Option<PaletteHandle>,
    pub name: Option<String>,
    pub local_position: Vec3,
    /// Euler XYZ, radians, stored without normalization.
    pub local_rotation: Vec3,
    pub local_scale: Vec3,
    pub pivot: Vec3,
    pub rigid_body: Option<RigidBody>,
    pub is_hidden_self: bool,
    pub is_mutable: bool,
    pub points_of_interest: BTreeMap<String, Vec3>,
    /// Euler XYZ rotations attached to named points, written unchanged.
    pub point_rotations: BTreeMap<String, Vec3>,
    /// One record per grid cell when present.
    pub baked_lighting: Option<Vec<VertexLight>>,
    children: Vec<ShapeHandle>,
    parent: Weak<RefCell<Shape>>,
}

impl Shape {
    pub fn new(width: u16, height: u16, depth: u16) -> Self {
        let count = block_count(width, height, depth);
        let mut shape = Self {
            size: [width, height, depth],
            blocks: vec![BLOCK_AIR; count],
            local_scale: Vec3::ONE,
            ..Self::default()
        };
        shape.reset_pivot_to_center();
        shape
    }

    /// Fallible variant used when the grid size comes from untrusted
    /// input.
    pub fn try_with_size(width: u16, height: u16, depth: u16) -> Result<Self> {
        let count = block_count(width, height, depth);
        let mut blocks = Vec::new();
        blocks.try_reserve_exact(count)?;
        blocks.resize(count, BLOCK_AIR);
        let mut shape = Self {
            size: [width, height, depth],
            blocks,
            local_scale: Vec3::ONE,
            ..Self::default()
        };
        shape.reset_pivot_to_center();
        Ok(shape)
    }

    pub fn size(&self) -> [u16; 3] {
        self.size
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    #[inline]
    fn block_index(&self, x: u16, y: u16, z: u16) -> usize {
        debug_assert!(x < self.size[0] && y < self.size[1] && z < self.size[2]);
        (x as usize * self.size[1] as usize + y as usize) * self.size[2] as usize + z as usize
    }

    pub fn block_at(&self, x: u16, y: u16, z: u16) -> u8 {
        self.blocks[self.block_index(x, y, z)]
    }

    pub fn set_block(&mut self, x: u16, y: u16, z: u16, color_index: u8) {
        let index = self.block_index(x, y, z);
        self.blocks[index] = color_index;
    }

    pub fn is_solid(&self, x: u16, y: u16, z: u16) -> bool {
        self.block_at(x, y, z) != BLOCK_AIR
    }

    /// Occupied bounding box as `(start, end)`, end exclusive. `None` for
    /// a shape with no solid block.
    pub fn occupied_bounds(&self) -> Option<([u16; 3], [u16; 3])> {
        let mut start = [u16::MAX; 3];
        let mut end = [0u16; 3];
        let mut any = false;
        for x in 0..self.size[0] {
            for y in 0..self.size[1] {
                for z in 0..self.size[2] {
                    if !self.is_solid(x, y, z) {
                        continue;
                    }
                    any = true;
                    let cell = [x, y, z];
                    for axis in 0..3 {
                        start[axis] = start[axis].min(cell[axis]);
                        end[axis] = end[axis].max(cell[axis] + 1);
                    }
                }
            }
        }
        any.then_some((start, end))
    }

    /// Full grid box in the local frame.
    pub fn model_box(&self) -> Aabb {
        Aabb::new(
            Vec3::ZERO,
            Vec3::new(
                f32::from(self.size[0]),
                f32::from(self.size[1]),
                f32::from(self.size[2]),
            ),
        )
    }

    /// Custom collider when one was authored, the model box otherwise.
    pub fn collision_box(&self) -> Aabb {
        match &self.rigid_body {
            Some(body) if body.collider_custom => body.collider,
            _ => self.model_box(),
        }
    }

    pub fn ensure_rigid_body(&mut self) -> &mut RigidBody {
        self.rigid_body.get_or_insert_with(RigidBody::default)
    }

    pub fn reset_pivot_to_center(&mut self) {
        self.pivot = self.model_box().size() * 0.5;
    }

    pub fn children(&self) -> &[ShapeHandle] {
        &self.children
    }

    pub fn parent(&self) -> Option<ShapeHandle> {
        self.parent.upgrade()
    }

    /// Attaches `child` under `parent`, replacing any previous parent
    /// link. Ownership stays with the tree; the back-link is weak.
    pub fn add_child(parent: &ShapeHandle, child: ShapeHandle) {
        child.borrow_mut().parent = Rc::downgrade(parent);
        parent.borrow_mut().children.push(child);
    }

    pub fn into_handle(self) -> ShapeHandle {
        Rc::new(RefCell::new(self))
    }
}

fn block_count(width: u16, height: u16, depth: u16) -> usize {
    width as usize * height as usize * depth as usize
}
