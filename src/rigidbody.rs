use glam::Vec3;

/// Axis-aligned box in a shape's local frame.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub const fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }
}

/// Collision state carried by a shape. The codec only reads and writes the
/// collider box; simulation is someone else's job.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RigidBody {
    pub collider: Aabb,
    /// Set when the collider was explicitly authored rather than derived
    /// from the model box.
    pub collider_custom: bool,
}

impl RigidBody {
    pub fn with_custom_collider(collider: Aabb) -> Self {
        Self {
            collider,
            collider_custom: true,
        }
    }
}
