use std::cell::RefCell;
use std::collections::BTreeMap;
use std::io::{Cursor, Read, Seek};
use std::rc::Rc;

use glam::Vec3;

use crate::error::{P3sError, Result};
use crate::format::chunk;
use crate::format::palette::{decode_palette, encode_palette};
use crate::format::stream::{write_u16, write_u32, write_u8, write_vec3, ByteStream};
use crate::format::{
    LoadShapeSettings, CHUNK_ID_OBJECT_COLLISION_BOX, CHUNK_ID_OBJECT_IS_HIDDEN, CHUNK_ID_SHAPE,
    CHUNK_ID_SHAPE_BAKED_LIGHTING, CHUNK_ID_SHAPE_BLOCKS, CHUNK_ID_SHAPE_ID, CHUNK_ID_SHAPE_NAME,
    CHUNK_ID_SHAPE_PALETTE, CHUNK_ID_SHAPE_PARENT_ID, CHUNK_ID_SHAPE_PIVOT, CHUNK_ID_SHAPE_POINT,
    CHUNK_ID_SHAPE_POINT_ROTATION, CHUNK_ID_SHAPE_SIZE, CHUNK_ID_SHAPE_TRANSFORM,
};
use crate::palette::{
    legacy_palette_color, ColorAtlas, ColorPalette, PALETTE_ID_2021,
    PALETTE_ID_IOS_ITEM_EDITOR_LEGACY, PALETTE_MAX_COLOR_COUNT,
};
use crate::rigidbody::{Aabb, RigidBody};
use crate::shape::{PaletteHandle, Shape, ShapeHandle, VertexLight, BLOCK_AIR};

// How a stored block byte turns into a palette index on the shape.
enum BlockResolution {
    // index is already a shape-palette index
    Direct,
    // index selects a color in a built-in legacy palette
    Legacy(u8),
    // index selects a color in an oversized file palette
    Shrink(PaletteHandle),
}

/// Reads one SHAPE chunk (the id byte already consumed), materializes the
/// shape, and links it to its parent against `shapes`, the
/// declaration-order list of this load.
pub(crate) fn read_shape_chunk<R: Read + Seek>(
    stream: &mut ByteStream<R>,
    shapes: &mut Vec<ShapeHandle>,
    settings: &LoadShapeSettings,
    atlas: &mut ColorAtlas,
    file_palette: Option<&PaletteHandle>,
    palette_id: u8,
    root_shape_palette: &mut Option<PaletteHandle>,
) -> Result<ShapeHandle> {
    let envelope = chunk::read_v6_frame(stream)?;
    let envelope_len = envelope.len() as u64;
    let mut env = ByteStream::new(Cursor::new(envelope.as_slice()))?;

    let mut size: Option<[u16; 3]> = None;
    let mut blocks_at: Option<u64> = None;
    let mut shape_id: u16 = 1;
    let mut parent_id: u16 = 0;
    let mut local_position = Vec3::ZERO;
    let mut local_rotation = Vec3::ZERO;
    let mut local_scale = Vec3::ONE;
    let mut pivot: Option<Vec3> = None;
    let mut embedded_palette: Option<ColorPalette> = None;
    let mut collision_box: Option<Aabb> = None;
    let mut is_hidden = false;
    let mut name: Option<String> = None;
    let mut pois = BTreeMap::new();
    let mut point_rotations = BTreeMap::new();
    let mut lighting: Option<(u32, Option<Vec<u8>>)> = None;

    while env.remaining()? > 0 {
        let sub_id = env.read_u8()?;

        // SHAPE_NAME is the one sub-chunk without a u32 size preamble.
        if sub_id == CHUNK_ID_SHAPE_NAME {
            let name_len = env.read_u8()?;
            let bytes = env.read_exact_vec(usize::from(name_len))?;
            name = Some(String::from_utf8_lossy(&bytes).into_owned());
            continue;
        }

        let known = matches!(
            sub_id,
            CHUNK_ID_SHAPE_SIZE
                | CHUNK_ID_SHAPE_BLOCKS
                | CHUNK_ID_SHAPE_POINT
                | CHUNK_ID_SHAPE_BAKED_LIGHTING
                | CHUNK_ID_SHAPE_POINT_ROTATION
                | CHUNK_ID_SHAPE_ID
                | CHUNK_ID_SHAPE_PARENT_ID
                | CHUNK_ID_SHAPE_TRANSFORM
                | CHUNK_ID_SHAPE_PIVOT
                | CHUNK_ID_SHAPE_PALETTE
                | CHUNK_ID_OBJECT_COLLISION_BOX
                | CHUNK_ID_OBJECT_IS_HIDDEN
        );
        if !known {
            // Unknown sub-id: skip by declared size; with fewer than 4
            // bytes left the envelope ends here.
            if env.remaining()? < 4 {
                break;
            }
            let sub_size = u64::from(env.read_u32()?);
            if sub_size > env.remaining()? {
                break;
            }
            env.skip(sub_size)?;
            continue;
        }

        if sub_id == CHUNK_ID_SHAPE_BLOCKS {
            // Palette and size may not be known yet; revisit once the
            // whole envelope has been walked.
            blocks_at = Some(env.position()?);
            let sub_size = u64::from(env.read_u32()?);
            let body_start = env.position()?;
            env.seek((body_start + sub_size).min(envelope_len))?;
            continue;
        }

        let sub_size = u64::from(env.read_u32()?);
        let body_start = env.position()?;

        match sub_id {
            CHUNK_ID_SHAPE_SIZE => {
                size = Some([env.read_u16()?, env.read_u16()?, env.read_u16()?]);
            }
            CHUNK_ID_SHAPE_ID => {
                shape_id = env.read_u16()?;
            }
            CHUNK_ID_SHAPE_PARENT_ID => {
                parent_id = env.read_u16()?;
            }
            CHUNK_ID_SHAPE_TRANSFORM => {
                local_position = env.read_vec3()?;
                local_rotation = env.read_vec3()?;
                local_scale = env.read_vec3()?;
            }
            CHUNK_ID_SHAPE_PIVOT => {
                pivot = Some(env.read_vec3()?);
            }
            CHUNK_ID_SHAPE_PALETTE => {
                let payload = env.read_exact_vec(sub_size as usize)?;
                embedded_palette = Some(decode_palette(&payload, atlas, false)?);
            }
            CHUNK_ID_OBJECT_COLLISION_BOX => {
                collision_box = Some(Aabb::new(env.read_vec3()?, env.read_vec3()?));
            }
            CHUNK_ID_OBJECT_IS_HIDDEN => {
                is_hidden = env.read_u8()? != 0;
            }
            CHUNK_ID_SHAPE_POINT | CHUNK_ID_SHAPE_POINT_ROTATION => {
                let name_len = env.read_u8()?;
                let bytes = env.read_exact_vec(usize::from(name_len))?;
                let key = String::from_utf8_lossy(&bytes).into_owned();
                let value = env.read_vec3()?;
                if sub_id == CHUNK_ID_SHAPE_POINT {
                    pois.insert(key, value);
                } else {
                    point_rotations.insert(key, value);
                }
            }
            CHUNK_ID_SHAPE_BAKED_LIGHTING => {
                let data = if settings.lighting {
                    let take = (sub_size).min(env.remaining()?) as usize;
                    Some(env.read_exact_vec(take)?)
                } else {
                    None
                };
                lighting = Some((sub_size as u32, data));
            }
            _ => unreachable!(),
        }

        // The declared size governs framing, whatever was parsed above.
        env.seek((body_start + sub_size).min(envelope_len))?;
    }

    let [width, height, depth] =
        size.ok_or_else(|| P3sError::BadChunk("shape envelope without size sub-chunk".into()))?;

    let mut shape = Shape::try_with_size(width, height, depth)?;
    shape.id = shape_id;
    shape.parent_id = parent_id;
    shape.is_mutable = settings.is_mutable;
    shape.is_hidden_self = is_hidden;
    shape.name = name;
    shape.points_of_interest = pois;
    shape.point_rotations = point_rotations;
    if let Some(collider) = collision_box {
        shape.rigid_body = Some(RigidBody::with_custom_collider(collider));
    }
    match pivot {
        Some(pivot) => shape.pivot = pivot,
        None => shape.reset_pivot_to_center(),
    }

    // Compatibility modes:
    // [MULTI]  a shape palette sub-chunk exists somewhere; shapes without
    //          one share the root shape's palette
    // [SINGLE] no embedded palettes but a file palette chunk; each shape
    //          copies it, or remaps through it when it is oversized
    // [LEGACY] no palettes at all; a built-in palette id drives lookups
    let resolution;
    if root_shape_palette.is_some() || embedded_palette.is_some() {
        if let Some(palette) = embedded_palette {
            let handle: PaletteHandle = Rc::new(RefCell::new(palette));
            if root_shape_palette.is_none() {
                *root_shape_palette = Some(handle.clone());
            }
            shape.palette = Some(handle);
        } else {
            shape.palette = root_shape_palette.clone();
        }
        resolution = BlockResolution::Direct;
    } else if let Some(file_palette) = file_palette {
        if file_palette.borrow().count() > PALETTE_MAX_COLOR_COUNT {
            shape.palette = Some(Rc::new(RefCell::new(ColorPalette::new())));
            resolution = BlockResolution::Shrink(file_palette.clone());
        } else {
            shape.palette = Some(Rc::new(RefCell::new(file_palette.borrow().clone())));
            resolution = BlockResolution::Direct;
        }
    } else {
        shape.palette = Some(Rc::new(RefCell::new(ColorPalette::new())));
        resolution = match palette_id {
            PALETTE_ID_IOS_ITEM_EDITOR_LEGACY | PALETTE_ID_2021 => {
                BlockResolution::Legacy(palette_id)
            }
            _ => BlockResolution::Direct,
        };
    }

    if let Some(position) = blocks_at {
        env.seek(position)?;
        read_blocks(&mut env, &mut shape, &resolution, atlas)?;
    }

    apply_lighting(&mut shape, lighting, settings);

    let handle = shape.into_handle();
    if parent_id >= 1 && usize::from(parent_id - 1) < shapes.len() {
        let parent = shapes[usize::from(parent_id - 1)].clone();
        {
            let mut child = handle.borrow_mut();
            child.local_position = local_position;
            child.local_rotation = local_rotation;
            child.local_scale = local_scale;
        }
        Shape::add_child(&parent, handle.clone());
    }
    shapes.push(handle.clone());

    Ok(handle)
}

fn read_blocks<R: Read + Seek>(
    env: &mut ByteStream<R>,
    shape: &mut Shape,
    resolution: &BlockResolution,
    atlas: &mut ColorAtlas,
) -> Result<()> {
    let declared = env.read_u32()? as usize;
    let expected = shape.block_count();
    if declared != expected {
        return Err(P3sError::BadChunk(format!(
            "shape blocks payload is {declared} bytes for a {expected}-cell grid"
        )));
    }
    let payload = env.read_exact_vec(declared)?;

    let [width, height, depth] = shape.size();
    let palette = shape
        .palette
        .clone()
        .ok_or_else(|| P3sError::BadChunk("shape blocks without a palette".into()))?;

    let mut offset = 0usize;
    for x in 0..width {
        for y in 0..height {
            for z in 0..depth {
                let stored = payload[offset];
                offset += 1;
                if stored == BLOCK_AIR {
                    continue;
                }
                let index = match resolution {
                    BlockResolution::Direct => Some(stored),
                    BlockResolution::Legacy(palette_id) => {
                        legacy_palette_color(*palette_id, stored).and_then(|color| {
                            palette.borrow_mut().find_or_add(atlas, color, false)
                        })
                    }
                    BlockResolution::Shrink(file_palette) => {
                        file_palette.borrow().color(stored).and_then(|color| {
                            palette.borrow_mut().find_or_add(atlas, color, false)
                        })
                    }
                };
                shape.set_block(x, y, z, index.unwrap_or(0));
            }
        }
    }
    Ok(())
}

fn apply_lighting(
    shape: &mut Shape,
    lighting: Option<(u32, Option<Vec<u8>>)>,
    settings: &LoadShapeSettings,
) {
    if !settings.lighting {
        if lighting.is_some() {
            log::debug!("shape baked lighting present but not materialized");
        }
        return;
    }
    let Some((declared, data)) = lighting else {
        log::warn!("shape uses lighting but no baked lighting found");
        return;
    };
    let expected = shape.block_count() * VertexLight::ENCODED_SIZE;
    let data = data.unwrap_or_default();
    if declared as usize != expected || data.len() != expected {
        log::warn!(
            "shape baked lighting is {declared} bytes, expected {expected}; dropping"
        );
        return;
    }
    let records = data
        .chunks_exact(VertexLight::ENCODED_SIZE)
        .map(|pair| VertexLight::from_bytes([pair[0], pair[1]]))
        .collect();
    shape.baked_lighting = Some(records);
}

/// Flattens a shape into the uncompressed sub-chunk stream of its SHAPE
/// envelope. Blocks, pivot and points of interest are written relative to
/// the occupied AABB minimum; point rotations are written unchanged.
pub(crate) fn encode_shape_envelope(
    shape: &Shape,
    shape_id: u16,
    parent_id: u16,
    shared_palette: Option<&PaletteHandle>,
    shared_mapping: Option<&[u8]>,
) -> Result<Vec<u8>> {
    let (start, end) = shape.occupied_bounds().unwrap_or(([0; 3], [0; 3]));
    let dims = [end[0] - start[0], end[1] - start[1], end[2] - start[2]];
    let block_count = dims.iter().map(|&d| d as usize).product::<usize>();
    let start_offset = Vec3::new(
        f32::from(start[0]),
        f32::from(start[1]),
        f32::from(start[2]),
    );

    // The root always embeds its palette; a descendant embeds only when
    // its palette is not the shared root instance.
    let shares_root_palette = matches!(
        (&shape.palette, shared_palette),
        (Some(own), Some(shared)) if Rc::ptr_eq(own, shared)
    );
    let embed_palette = shape.palette.is_some() && (parent_id == 0 || !shares_root_palette);

    let mut palette_payload = None;
    let mut mapping: Option<Vec<u8>> = None;
    if embed_palette {
        if let Some(palette) = &shape.palette {
            let (payload, own_mapping) = encode_palette(&palette.borrow());
            palette_payload = Some(payload);
            mapping = Some(own_mapping);
        }
    } else if shares_root_palette {
        mapping = shared_mapping.map(<[u8]>::to_vec);
    }

    let mut buf = Vec::new();

    write_sub_header(&mut buf, CHUNK_ID_SHAPE_SIZE, 6)?;
    write_u16(&mut buf, dims[0])?;
    write_u16(&mut buf, dims[1])?;
    write_u16(&mut buf, dims[2])?;

    if shape_id != 0 {
        write_sub_header(&mut buf, CHUNK_ID_SHAPE_ID, 2)?;
        write_u16(&mut buf, shape_id)?;
    }

    if parent_id != 0 {
        write_sub_header(&mut buf, CHUNK_ID_SHAPE_PARENT_ID, 2)?;
        write_u16(&mut buf, parent_id)?;

        write_sub_header(&mut buf, CHUNK_ID_SHAPE_TRANSFORM, 36)?;
        write_vec3(&mut buf, shape.local_position)?;
        write_vec3(&mut buf, shape.local_rotation)?;
        write_vec3(&mut buf, shape.local_scale)?;
    }

    write_sub_header(&mut buf, CHUNK_ID_SHAPE_PIVOT, 12)?;
    write_vec3(&mut buf, shape.pivot - start_offset)?;

    if let Some(body) = &shape.rigid_body {
        if body.collider_custom {
            write_sub_header(&mut buf, CHUNK_ID_OBJECT_COLLISION_BOX, 24)?;
            write_vec3(&mut buf, body.collider.min)?;
            write_vec3(&mut buf, body.collider.max)?;
        }
    }

    if shape.is_hidden_self {
        write_sub_header(&mut buf, CHUNK_ID_OBJECT_IS_HIDDEN, 1)?;
        write_u8(&mut buf, 1)?;
    }

    if let Some(payload) = palette_payload {
        write_sub_header(&mut buf, CHUNK_ID_SHAPE_PALETTE, payload.len() as u32)?;
        buf.extend_from_slice(&payload);
    }

    write_sub_header(&mut buf, CHUNK_ID_SHAPE_BLOCKS, block_count as u32)?;
    for x in start[0]..end[0] {
        for y in start[1]..end[1] {
            for z in start[2]..end[2] {
                let stored = shape.block_at(x, y, z);
                let byte = if stored == BLOCK_AIR {
                    BLOCK_AIR
                } else {
                    remap_index(stored, mapping.as_deref())
                };
                buf.push(byte);
            }
        }
    }

    for (key, position) in &shape.points_of_interest {
        write_point_sub_chunk(
            &mut buf,
            CHUNK_ID_SHAPE_POINT,
            key,
            *position - start_offset,
        )?;
    }
    for (key, rotation) in &shape.point_rotations {
        write_point_sub_chunk(&mut buf, CHUNK_ID_SHAPE_POINT_ROTATION, key, *rotation)?;
    }

    if let Some(records) = &shape.baked_lighting {
        if records.len() == shape.block_count() {
            let [_, grid_height, grid_depth] = shape.size();
            write_sub_header(
                &mut buf,
                CHUNK_ID_SHAPE_BAKED_LIGHTING,
                (block_count * VertexLight::ENCODED_SIZE) as u32,
            )?;
            for x in start[0]..end[0] {
                for y in start[1]..end[1] {
                    for z in start[2]..end[2] {
                        let index = (x as usize * grid_height as usize + y as usize)
                            * grid_depth as usize
                            + z as usize;
                        buf.extend_from_slice(&records[index].to_bytes());
                    }
                }
            }
        } else {
            log::warn!(
                "shape lighting has {} records for a {}-cell grid; not written",
                records.len(),
                shape.block_count()
            );
        }
    }

    if let Some(name) = &shape.name {
        let bytes = name.as_bytes();
        let len = bytes.len().min(255);
        if len > 0 {
            // historical framing: no u32 size, just the length byte
            write_u8(&mut buf, CHUNK_ID_SHAPE_NAME)?;
            write_u8(&mut buf, len as u8)?;
            buf.extend_from_slice(&bytes[..len]);
        }
    }

    Ok(buf)
}

/// Writes the SHAPE chunk for `shape` and, depth-first, all of its
/// children, assigning ids from the shared counter.
pub(crate) fn write_shape_tree<W: std::io::Write>(
    writer: &mut W,
    shape: &ShapeHandle,
    next_id: &mut u16,
    parent_id: u16,
    shared_palette: Option<&PaletteHandle>,
    shared_mapping: Option<&[u8]>,
) -> Result<()> {
    let id = *next_id;
    *next_id = next_id.wrapping_add(1);

    let envelope =
        encode_shape_envelope(&shape.borrow(), id, parent_id, shared_palette, shared_mapping)?;
    chunk::write_v6_frame(writer, CHUNK_ID_SHAPE, &envelope, true)?;

    let children: Vec<ShapeHandle> = shape.borrow().children().to_vec();
    for child in &children {
        write_shape_tree(writer, child, next_id, id, shared_palette, shared_mapping)?;
    }
    Ok(())
}

fn remap_index(index: u8, mapping: Option<&[u8]>) -> u8 {
    match mapping {
        Some(mapping) => mapping.get(usize::from(index)).copied().unwrap_or(index),
        None => index,
    }
}

fn write_sub_header(buf: &mut Vec<u8>, sub_id: u8, size: u32) -> Result<()> {
    write_u8(buf, sub_id)?;
    write_u32(buf, size)
}

fn write_point_sub_chunk(buf: &mut Vec<u8>, sub_id: u8, key: &str, value: Vec3) -> Result<()> {
    let bytes = key.as_bytes();
    let len = bytes.len().min(255);
    write_sub_header(buf, sub_id, (1 + len + 12) as u32)?;
    write_u8(buf, len as u8)?;
    buf.extend_from_slice(&bytes[..len]);
    write_vec3(buf, value)
}
