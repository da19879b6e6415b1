use std::cell::RefCell;
use std::f32::consts::FRAC_PI_2;
use std::io::Cursor;
use std::rc::Rc;

use glam::Vec3;

use p3s::format::{
    CHUNK_ID_PALETTE_ID, CHUNK_ID_PALETTE_LEGACY, CHUNK_ID_PREVIEW, CHUNK_ID_SHAPE,
    CHUNK_ID_SHAPE_BLOCKS, CHUNK_ID_SHAPE_SIZE, MAGIC_BYTES,
};
use p3s::palette::{legacy_palette_color, PALETTE_ID_IOS_ITEM_EDITOR_LEGACY};
use p3s::rigidbody::{Aabb, RigidBody};
use p3s::{
    get_preview, load_assets, save_shape, save_shape_to_buffer, Asset, AssetFilter, ColorAtlas,
    ColorPalette, LoadShapeSettings, P3sError, RgbaColor, Shape, ShapeHandle, VertexLight,
    BLOCK_AIR,
};

const RED: RgbaColor = RgbaColor::new(255, 0, 0, 255);
const GREEN: RgbaColor = RgbaColor::new(0, 255, 0, 255);
const BLUE: RgbaColor = RgbaColor::new(0, 0, 255, 255);

fn load(buffer: &[u8]) -> Vec<Asset> {
    load_assets(
        Cursor::new(buffer),
        &mut ColorAtlas::new(),
        AssetFilter::ANY,
        &LoadShapeSettings::default(),
    )
    .unwrap()
}

fn shapes_of(assets: &[Asset]) -> Vec<ShapeHandle> {
    assets
        .iter()
        .filter_map(|asset| match asset {
            Asset::Shape(shape) => Some(shape.clone()),
            Asset::Palette(_) => None,
        })
        .collect()
}

fn shape_with_palette(size: u16, colors: &[RgbaColor]) -> Shape {
    let mut atlas = ColorAtlas::new();
    let mut shape = Shape::new(size, size, size);
    let mut palette = ColorPalette::new();
    for color in colors {
        palette.find_or_add(&mut atlas, *color, false).unwrap();
    }
    shape.palette = Some(Rc::new(RefCell::new(palette)));
    shape
}

// --- hand-assembled files, for cases the writer never produces ---

fn v5_frame(id: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![id];
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(payload);
    frame
}

fn v6_raw_frame(id: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![id];
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.push(0);
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(payload);
    frame
}

fn sub_chunk(id: u8, payload: &[u8]) -> Vec<u8> {
    let mut sub = vec![id];
    sub.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    sub.extend_from_slice(payload);
    sub
}

fn file_with_chunks(chunks: &[Vec<u8>]) -> Vec<u8> {
    let body: Vec<u8> = chunks.concat();
    let mut file = Vec::new();
    file.extend_from_slice(MAGIC_BYTES);
    file.extend_from_slice(&6u32.to_le_bytes());
    file.push(1);
    file.extend_from_slice(&(body.len() as u32).to_le_bytes());
    file.extend_from_slice(&body);
    file
}

fn tiny_shape_envelope(blocks: &[u8]) -> Vec<u8> {
    let mut size_payload = Vec::new();
    for dim in [1u16, 1, blocks.len() as u16] {
        size_payload.extend_from_slice(&dim.to_le_bytes());
    }
    let mut envelope = sub_chunk(CHUNK_ID_SHAPE_SIZE, &size_payload);
    envelope.extend_from_slice(&sub_chunk(CHUNK_ID_SHAPE_BLOCKS, blocks));
    envelope
}

#[test]
fn s1_empty_scene() {
    let buffer = save_shape_to_buffer(None, None, None).unwrap();

    let mut expected = Vec::new();
    expected.extend_from_slice(MAGIC_BYTES);
    expected.extend_from_slice(&6u32.to_le_bytes());
    expected.push(1);
    expected.extend_from_slice(&0u32.to_le_bytes());
    assert_eq!(buffer, expected);

    assert!(load(&buffer).is_empty());
}

#[test]
fn s2_single_red_block() {
    let mut shape = shape_with_palette(1, &[RED]);
    shape.set_block(0, 0, 0, 0);

    let buffer = save_shape_to_buffer(Some(&shape.into_handle()), None, None).unwrap();
    let assets = load(&buffer);
    let shapes = shapes_of(&assets);
    assert_eq!(shapes.len(), 1);

    let shape = shapes[0].borrow();
    assert_eq!(shape.size(), [1, 1, 1]);
    assert_eq!(shape.id, 1);
    assert_eq!(shape.parent_id, 0);
    let block = shape.block_at(0, 0, 0);
    assert_ne!(block, BLOCK_AIR);
    let palette = shape.palette.as_ref().unwrap().borrow();
    assert_eq!(palette.color(block), Some(RED));
}

#[test]
fn s3_parent_and_child_transform() {
    let mut root = shape_with_palette(2, &[RED]);
    root.set_block(0, 0, 0, 0);
    root.set_block(1, 1, 1, 0);
    let root = root.into_handle();

    let mut child = Shape::new(1, 1, 1);
    child.palette = root.borrow().palette.clone();
    child.set_block(0, 0, 0, 0);
    child.local_position = Vec3::new(3.0, 0.0, 0.0);
    child.local_rotation = Vec3::new(0.0, FRAC_PI_2, 0.0);
    Shape::add_child(&root, child.into_handle());

    let buffer = save_shape_to_buffer(Some(&root), None, None).unwrap();
    let shapes = shapes_of(&load(&buffer));
    assert_eq!(shapes.len(), 2);

    let child = shapes[1].borrow();
    assert_eq!(child.parent_id, 1);
    assert!(child.parent().is_some());
    assert!((child.local_position.x - 3.0).abs() < 1e-6);
    assert!((child.local_rotation.y - FRAC_PI_2).abs() < 1e-6);
}

#[test]
fn s4_hidden_flag_and_custom_collider() {
    let mut shape = shape_with_palette(1, &[RED]);
    shape.set_block(0, 0, 0, 0);
    shape.is_hidden_self = true;
    let collider = Aabb::new(Vec3::splat(-1.0), Vec3::splat(2.0));
    shape.rigid_body = Some(RigidBody::with_custom_collider(collider));

    let buffer = save_shape_to_buffer(Some(&shape.into_handle()), None, None).unwrap();
    let shapes = shapes_of(&load(&buffer));
    let loaded = shapes[0].borrow();
    assert!(loaded.is_hidden_self);
    assert_eq!(loaded.collision_box(), collider);
}

#[test]
fn s4_omitted_flags_yield_defaults() {
    let mut shape = shape_with_palette(1, &[RED]);
    shape.set_block(0, 0, 0, 0);

    let buffer = save_shape_to_buffer(Some(&shape.into_handle()), None, None).unwrap();
    let shapes = shapes_of(&load(&buffer));
    let loaded = shapes[0].borrow();
    assert!(!loaded.is_hidden_self);
    assert_eq!(loaded.collision_box(), loaded.model_box());
}

#[test]
fn s5_preview_extraction_skips_shapes() {
    let preview: Vec<u8> = (0..1234u32).map(|i| (i * 7 % 256) as u8).collect();
    let mut shape = shape_with_palette(1, &[RED]);
    shape.set_block(0, 0, 0, 0);

    let buffer =
        save_shape_to_buffer(Some(&shape.into_handle()), None, Some(&preview)).unwrap();
    let extracted = get_preview(Cursor::new(&buffer)).unwrap().unwrap();
    assert_eq!(extracted, preview);
}

#[test]
fn s5_preview_survives_a_corrupt_shape_chunk() {
    // a shape chunk flagged zlib whose payload is garbage: the preview
    // fast path must not notice, a full load must fail
    let preview = vec![0x42u8; 64];
    let mut shape_frame = vec![CHUNK_ID_SHAPE];
    shape_frame.extend_from_slice(&4u32.to_le_bytes());
    shape_frame.push(1);
    shape_frame.extend_from_slice(&100u32.to_le_bytes());
    shape_frame.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);

    let file = file_with_chunks(&[v5_frame(CHUNK_ID_PREVIEW, &preview), shape_frame.clone()]);

    assert_eq!(get_preview(Cursor::new(&file)).unwrap().unwrap(), preview);
    let result = load_assets(
        Cursor::new(&file),
        &mut ColorAtlas::new(),
        AssetFilter::ANY,
        &LoadShapeSettings::default(),
    );
    assert!(matches!(result, Err(P3sError::BadCompression)));

    // same with the shape chunk first: the fast path must hop over it by
    // its header alone
    let file = file_with_chunks(&[shape_frame, v5_frame(CHUNK_ID_PREVIEW, &preview)]);
    assert_eq!(get_preview(Cursor::new(&file)).unwrap().unwrap(), preview);
}

#[test]
fn get_preview_without_preview_chunk() {
    let mut shape = shape_with_palette(1, &[RED]);
    shape.set_block(0, 0, 0, 0);
    let buffer = save_shape_to_buffer(Some(&shape.into_handle()), None, None).unwrap();
    assert_eq!(get_preview(Cursor::new(&buffer)).unwrap(), None);
}

#[test]
fn s6_unknown_chunk_is_transparent() {
    let preview = vec![9u8; 16];
    let mut shape = shape_with_palette(1, &[RED]);
    shape.set_block(0, 0, 0, 0);
    let baseline = save_shape_to_buffer(Some(&shape.into_handle()), None, Some(&preview)).unwrap();

    // splice id 99 with v5 framing between PREVIEW and SHAPE
    let header_len = MAGIC_BYTES.len() + 4 + 1 + 4;
    let insert_at = header_len + 1 + 4 + preview.len();
    let alien = v5_frame(99, b"hello");
    let mut spliced = baseline.clone();
    spliced.splice(insert_at..insert_at, alien.iter().copied());
    let total_at = MAGIC_BYTES.len() + 4 + 1;
    let total = u32::from_le_bytes(spliced[total_at..total_at + 4].try_into().unwrap())
        + alien.len() as u32;
    spliced[total_at..total_at + 4].copy_from_slice(&total.to_le_bytes());

    let baseline_shapes = shapes_of(&load(&baseline));
    let spliced_shapes = shapes_of(&load(&spliced));
    assert_eq!(baseline_shapes.len(), spliced_shapes.len());
    let a = baseline_shapes[0].borrow();
    let b = spliced_shapes[0].borrow();
    assert_eq!(a.size(), b.size());
    assert_eq!(a.block_at(0, 0, 0), b.block_at(0, 0, 0));
    assert_eq!(get_preview(Cursor::new(&spliced)).unwrap().unwrap(), preview);
}

#[test]
fn p1_round_trip_in_normalized_frame() {
    // a shape already in its AABB-min frame, with a reordered palette
    let mut atlas = ColorAtlas::new();
    let mut palette = ColorPalette::new();
    for color in [RED, GREEN, BLUE] {
        palette.find_or_add(&mut atlas, color, true).unwrap();
    }
    palette.move_color(0, 2);

    let mut shape = Shape::new(2, 1, 2);
    shape.palette = Some(Rc::new(RefCell::new(palette)));
    shape.set_block(0, 0, 0, 0);
    shape.set_block(1, 0, 0, 1);
    shape.set_block(0, 0, 1, 2);
    shape.set_block(1, 0, 1, BLOCK_AIR);
    shape.name = Some("relic".to_owned());
    shape.pivot = Vec3::new(1.0, 0.5, 1.0);
    shape
        .points_of_interest
        .insert("grip".to_owned(), Vec3::new(0.5, 0.25, 0.75));
    shape
        .point_rotations
        .insert("grip".to_owned(), Vec3::new(0.1, 0.2, 0.3));
    shape.baked_lighting = Some(vec![
        VertexLight {
            ambient: 2,
            red: 4,
            green: 8,
            blue: 15,
        };
        shape.block_count()
    ]);

    let original_colors: Vec<Option<RgbaColor>> = {
        let palette = shape.palette.as_ref().unwrap().borrow();
        (0..shape.block_count())
            .map(|i| {
                let (x, z) = ((i / 2) as u16, (i % 2) as u16);
                let block = shape.block_at(x, 0, z);
                (block != BLOCK_AIR).then(|| palette.color(block).unwrap())
            })
            .collect()
    };

    let buffer = save_shape_to_buffer(Some(&shape.into_handle()), None, None).unwrap();
    let assets = load_assets(
        Cursor::new(&buffer),
        &mut atlas,
        AssetFilter::ANY,
        &LoadShapeSettings::new(true, true),
    )
    .unwrap();
    let shapes = shapes_of(&assets);
    let loaded = shapes[0].borrow();

    assert_eq!(loaded.size(), [2, 1, 2]);
    assert_eq!(loaded.name.as_deref(), Some("relic"));
    assert_eq!(loaded.pivot, Vec3::new(1.0, 0.5, 1.0));
    assert_eq!(
        loaded.points_of_interest.get("grip"),
        Some(&Vec3::new(0.5, 0.25, 0.75))
    );
    assert_eq!(
        loaded.point_rotations.get("grip"),
        Some(&Vec3::new(0.1, 0.2, 0.3))
    );
    assert!(loaded.is_mutable);
    assert_eq!(
        loaded.baked_lighting.as_ref().map(|records| records.len()),
        Some(loaded.block_count())
    );

    // block colors survive modulo the palette permutation
    let palette = loaded.palette.as_ref().unwrap().borrow();
    let mut i = 0;
    for x in 0..2u16 {
        for z in 0..2u16 {
            let block = loaded.block_at(x, 0, z);
            let loaded_color = (block != BLOCK_AIR).then(|| palette.color(block).unwrap());
            assert_eq!(loaded_color, original_colors[i]);
            i += 1;
        }
    }
    assert!(palette.is_emissive(0));
}

#[test]
fn p4_preorder_ids_and_parent_linkage() {
    let mut root = shape_with_palette(1, &[RED]);
    root.set_block(0, 0, 0, 0);
    let root = root.into_handle();

    for i in 0..2 {
        let mut child = Shape::new(1, 1, 1);
        child.palette = root.borrow().palette.clone();
        child.set_block(0, 0, 0, 0);
        child.local_position = Vec3::new(i as f32 + 1.0, 0.0, 0.0);
        let child = child.into_handle();
        if i == 0 {
            let mut grandchild = Shape::new(1, 1, 1);
            grandchild.palette = root.borrow().palette.clone();
            grandchild.set_block(0, 0, 0, 0);
            grandchild.local_position = Vec3::new(0.0, 5.0, 0.0);
            Shape::add_child(&child, grandchild.into_handle());
        }
        Shape::add_child(&root, child);
    }

    let buffer = save_shape_to_buffer(Some(&root), None, None).unwrap();
    let shapes = shapes_of(&load(&buffer));
    assert_eq!(shapes.len(), 4);

    // pre-order: root, first child, grandchild, second child
    let ids: Vec<u16> = shapes.iter().map(|s| s.borrow().id).collect();
    assert_eq!(ids, vec![1, 2, 3, 4]);
    let parents: Vec<u16> = shapes.iter().map(|s| s.borrow().parent_id).collect();
    assert_eq!(parents, vec![0, 1, 2, 1]);

    for shape in &shapes[1..] {
        let shape = shape.borrow();
        let parent = shape.parent().expect("non-root shapes are linked");
        assert_eq!(parent.borrow().id, shape.parent_id);
    }
    assert!((shapes[2].borrow().local_position.y - 5.0).abs() < 1e-6);
}

#[test]
fn p5a_legacy_palette_id_lookup() {
    let file = file_with_chunks(&[
        v6_raw_frame(CHUNK_ID_PALETTE_ID, &[PALETTE_ID_IOS_ITEM_EDITOR_LEGACY]),
        v6_raw_frame(CHUNK_ID_SHAPE, &tiny_shape_envelope(&[8])),
    ]);

    let shapes = shapes_of(&load(&file));
    let shape = shapes[0].borrow();
    let palette = shape.palette.as_ref().unwrap().borrow();
    assert_eq!(palette.count(), 1);
    assert_eq!(
        palette.color(shape.block_at(0, 0, 0)),
        legacy_palette_color(PALETTE_ID_IOS_ITEM_EDITOR_LEGACY, 8)
    );
}

#[test]
fn p5a_legacy_is_the_default_without_palette_id() {
    let file = file_with_chunks(&[v6_raw_frame(CHUNK_ID_SHAPE, &tiny_shape_envelope(&[8]))]);
    let shapes = shapes_of(&load(&file));
    let shape = shapes[0].borrow();
    let palette = shape.palette.as_ref().unwrap().borrow();
    assert_eq!(
        palette.color(0),
        legacy_palette_color(PALETTE_ID_IOS_ITEM_EDITOR_LEGACY, 8)
    );
}

#[test]
fn p5a_unknown_palette_id_keeps_raw_indices() {
    let file = file_with_chunks(&[
        v6_raw_frame(CHUNK_ID_PALETTE_ID, &[77]),
        v6_raw_frame(CHUNK_ID_SHAPE, &tiny_shape_envelope(&[3])),
    ]);
    let shapes = shapes_of(&load(&file));
    let shape = shapes[0].borrow();
    assert_eq!(shape.block_at(0, 0, 0), 3);
    assert_eq!(shape.palette.as_ref().unwrap().borrow().count(), 0);
}

#[test]
fn p5b_single_mode_copies_the_file_palette() {
    let colors = [RED, GREEN, BLUE];
    let mut palette_payload = vec![colors.len() as u8];
    for color in &colors {
        palette_payload.extend_from_slice(&[color.r, color.g, color.b, color.a]);
    }
    palette_payload.extend_from_slice(&[0, 0, 0]);

    let file = file_with_chunks(&[
        v6_raw_frame(p3s::format::CHUNK_ID_PALETTE, &palette_payload),
        v6_raw_frame(CHUNK_ID_SHAPE, &tiny_shape_envelope(&[2])),
        v6_raw_frame(CHUNK_ID_SHAPE, &tiny_shape_envelope(&[0])),
    ]);

    let assets = load(&file);
    let palettes: Vec<_> = assets
        .iter()
        .filter_map(|asset| match asset {
            Asset::Palette(palette) => Some(palette.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(palettes.len(), 1);

    let shapes = shapes_of(&assets);
    assert_eq!(shapes.len(), 2);
    let first = shapes[0].borrow();
    let second = shapes[1].borrow();
    let first_palette = first.palette.as_ref().unwrap();
    let second_palette = second.palette.as_ref().unwrap();
    // distinct copies, both equal to the file palette
    assert!(!Rc::ptr_eq(first_palette, second_palette));
    assert!(!Rc::ptr_eq(first_palette, &palettes[0]));
    assert_eq!(*first_palette.borrow(), *palettes[0].borrow());
    assert_eq!(first.block_at(0, 0, 0), 2);
    assert_eq!(second.block_at(0, 0, 0), 0);
}

#[test]
fn p5b_oversized_file_palette_takes_the_shrink_path() {
    // legacy layout, 300 colors: more than a shape palette can hold
    let count = 300u16;
    let mut payload = vec![0u8, 0u8];
    payload.extend_from_slice(&count.to_le_bytes());
    payload.extend_from_slice(&[0u8, 0u8]);
    for i in 0..count {
        payload.extend_from_slice(&[(i % 256) as u8, (i / 256) as u8, 7, 255]);
    }
    payload.extend(std::iter::repeat(0u8).take(usize::from(count)));

    let file = file_with_chunks(&[
        v6_raw_frame(CHUNK_ID_PALETTE_LEGACY, &payload),
        v6_raw_frame(CHUNK_ID_SHAPE, &tiny_shape_envelope(&[5])),
    ]);

    let assets = load(&file);
    let shapes = shapes_of(&assets);
    let shape = shapes[0].borrow();
    let palette = shape.palette.as_ref().unwrap().borrow();
    // the shape palette was rebuilt on demand with just the used color
    assert_eq!(palette.count(), 1);
    assert_eq!(shape.block_at(0, 0, 0), 0);
    assert_eq!(palette.color(0), Some(RgbaColor::new(5, 0, 7, 255)));
}

#[test]
fn p5c_multi_mode_keeps_the_artist_palette_standalone() {
    let mut artist_atlas = ColorAtlas::new();
    let artist =
        ColorPalette::from_data(&mut artist_atlas, &[GREEN, BLUE], &[false, false]);

    let mut shape = shape_with_palette(1, &[RED]);
    shape.set_block(0, 0, 0, 0);

    let buffer =
        save_shape_to_buffer(Some(&shape.into_handle()), Some(&artist), None).unwrap();
    let assets = load(&buffer);

    let palettes: Vec<_> = assets
        .iter()
        .filter_map(|asset| match asset {
            Asset::Palette(palette) => Some(palette.clone()),
            _ => None,
        })
        .collect();
    let shapes = shapes_of(&assets);
    assert_eq!(palettes.len(), 1);
    assert_eq!(shapes.len(), 1);

    let standalone = palettes[0].borrow();
    assert_eq!(standalone.color(0), Some(GREEN));
    assert_eq!(standalone.color(1), Some(BLUE));

    let shape = shapes[0].borrow();
    let own = shape.palette.as_ref().unwrap();
    assert!(!Rc::ptr_eq(own, &palettes[0]));
    assert_eq!(own.borrow().color(0), Some(RED));
}

#[test]
fn p6_coordinate_framing() {
    let mut shape = shape_with_palette(16, &[RED]);
    shape.set_block(5, 2, 7, 0);
    shape
        .points_of_interest
        .insert("foo".to_owned(), Vec3::new(5.5, 2.5, 7.5));

    let buffer = save_shape_to_buffer(Some(&shape.into_handle()), None, None).unwrap();
    let shapes = shapes_of(&load(&buffer));
    let loaded = shapes[0].borrow();

    assert_eq!(loaded.size(), [1, 1, 1]);
    assert_ne!(loaded.block_at(0, 0, 0), BLOCK_AIR);
    assert_eq!(
        loaded.points_of_interest.get("foo"),
        Some(&Vec3::new(0.5, 0.5, 0.5))
    );
}

#[test]
fn filter_restricts_the_result_list() {
    let mut artist_atlas = ColorAtlas::new();
    let artist = ColorPalette::from_data(&mut artist_atlas, &[GREEN], &[false]);
    let mut shape = shape_with_palette(1, &[RED]);
    shape.set_block(0, 0, 0, 0);
    let buffer =
        save_shape_to_buffer(Some(&shape.into_handle()), Some(&artist), None).unwrap();

    let palettes_only = load_assets(
        Cursor::new(&buffer),
        &mut ColorAtlas::new(),
        AssetFilter::PALETTE,
        &LoadShapeSettings::default(),
    )
    .unwrap();
    assert_eq!(palettes_only.len(), 1);
    assert!(matches!(palettes_only[0], Asset::Palette(_)));

    let shapes_only = load_assets(
        Cursor::new(&buffer),
        &mut ColorAtlas::new(),
        AssetFilter::OBJECT,
        &LoadShapeSettings::default(),
    )
    .unwrap();
    assert_eq!(shapes_only.len(), 1);
    assert!(matches!(shapes_only[0], Asset::Shape(_)));
}

#[test]
fn save_shape_to_a_seekable_sink_matches_the_buffer_path() {
    let mut shape = shape_with_palette(1, &[RED]);
    shape.set_block(0, 0, 0, 0);
    let handle = shape.into_handle();

    let preview = vec![1u8, 2, 3];
    let buffer = save_shape_to_buffer(Some(&handle), None, Some(&preview)).unwrap();

    let mut sink = Cursor::new(Vec::new());
    save_shape(&mut sink, Some(&handle), Some(&preview)).unwrap();
    assert_eq!(sink.into_inner(), buffer);
}
