//! Reader and writer for the P3S (`.3zh`) voxel scene container, format
//! version 6.
//!
//! A container is a short header (magic bytes, version, compression algo,
//! total size) followed by id-prefixed chunks: an optional PNG preview, an
//! optional standalone palette, and one chunk per shape of the scene tree.
//! Shape chunks are zlib envelopes holding a stream of typed sub-chunks
//! (grid size, block bytes, palette, transform, named points, baked
//! lighting). Shapes reference their parents by 1-based id; the loader
//! relinks the tree and hands back a flat asset list in declaration order.
//!
//! Versions 5 and below are a different, older layout and are not handled
//! here.

pub mod error;
pub mod format;
pub mod palette;
pub mod rigidbody;
pub mod shape;

pub use error::{P3sError, Result};
pub use format::scene::{get_preview, load_assets, save_shape, save_shape_to_buffer};
pub use format::{Asset, AssetFilter, LoadShapeSettings};
pub use palette::{ColorAtlas, ColorPalette, RgbaColor};
pub use rigidbody::{Aabb, RigidBody};
pub use shape::{PaletteHandle, Shape, ShapeHandle, VertexLight, BLOCK_AIR};
