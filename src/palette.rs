use std::collections::HashMap;
use std::sync::OnceLock;

/// Most entries a shape-owned palette can address: block bytes are `u8`
/// with 255 reserved for air.
pub const PALETTE_MAX_COLOR_COUNT: usize = 255;

// Built-in palette selectors carried by the PALETTE_ID chunk.
pub const PALETTE_ID_CUSTOM: u8 = 0;
pub const PALETTE_ID_IOS_ITEM_EDITOR_LEGACY: u8 = 1;
pub const PALETTE_ID_2021: u8 = 2;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct RgbaColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl RgbaColor {
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }
}

/// Caller-owned color interner. Loads borrow it so palettes from the same
/// session share stable slots; the codec never keeps a reference past the
/// call.
#[derive(Debug, Default)]
pub struct ColorAtlas {
    slots: Vec<RgbaColor>,
    index: HashMap<RgbaColor, u32>,
}

impl ColorAtlas {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slot_for(&mut self, color: RgbaColor) -> u32 {
        if let Some(&slot) = self.index.get(&color) {
            return slot;
        }
        let slot = self.slots.len() as u32;
        self.slots.push(color);
        self.index.insert(color, slot);
        slot
    }

    pub fn color_at(&self, slot: u32) -> Option<RgbaColor> {
        self.slots.get(slot as usize).copied()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Palette image in serialization order, plus the remap table from
/// in-memory index to serialized index. Writers push every block byte
/// through `mapping`; readers never need it because the serialized palette
/// is already in canonical order.
pub struct OrderedPalette {
    pub colors: Vec<RgbaColor>,
    pub emissive: Vec<bool>,
    pub mapping: Vec<u8>,
}

/// Ordered list of RGBA colors with per-entry emissive flags.
///
/// Shape-owned palettes hold at most [`PALETTE_MAX_COLOR_COUNT`] entries;
/// a standalone file palette read from a legacy chunk may exceed that, in
/// which case shapes remap through it instead of copying it (the shrink
/// path).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ColorPalette {
    colors: Vec<RgbaColor>,
    emissive: Vec<bool>,
    atlas_slots: Vec<u32>,
    // Serialization order: order[k] is the in-memory index written at
    // position k.
    order: Vec<u16>,
}

impl ColorPalette {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_data(atlas: &mut ColorAtlas, colors: &[RgbaColor], emissive: &[bool]) -> Self {
        let mut palette = Self {
            colors: colors.to_vec(),
            emissive: Vec::with_capacity(colors.len()),
            atlas_slots: Vec::with_capacity(colors.len()),
            order: (0..colors.len() as u16).collect(),
        };
        for (index, color) in colors.iter().enumerate() {
            palette
                .emissive
                .push(emissive.get(index).copied().unwrap_or(false));
            palette.atlas_slots.push(atlas.slot_for(*color));
        }
        palette
    }

    pub fn count(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    pub fn color(&self, index: u8) -> Option<RgbaColor> {
        self.colors.get(index as usize).copied()
    }

    pub fn is_emissive(&self, index: u8) -> bool {
        self.emissive.get(index as usize).copied().unwrap_or(false)
    }

    pub fn atlas_slot(&self, index: u8) -> Option<u32> {
        self.atlas_slots.get(index as usize).copied()
    }

    /// Returns the index of `color`, appending it if absent. `None` when
    /// the palette is full or the color sits beyond the addressable range.
    pub fn find_or_add(
        &mut self,
        atlas: &mut ColorAtlas,
        color: RgbaColor,
        emissive: bool,
    ) -> Option<u8> {
        if let Some(index) = self.colors.iter().position(|c| *c == color) {
            if index < PALETTE_MAX_COLOR_COUNT {
                return Some(index as u8);
            }
            return None;
        }
        if self.colors.len() >= PALETTE_MAX_COLOR_COUNT {
            return None;
        }
        let index = self.colors.len() as u8;
        self.atlas_slots.push(atlas.slot_for(color));
        self.colors.push(color);
        self.emissive.push(emissive);
        self.order.push(u16::from(index));
        Some(index)
    }

    /// Moves the entry at serialized position `from` to serialized
    /// position `to`. In-memory indices (and therefore existing block
    /// bytes) are untouched; the next write reflects the new order through
    /// its remap table.
    pub fn move_color(&mut self, from: u8, to: u8) {
        let from = from as usize;
        let to = to as usize;
        if from >= self.order.len() || to >= self.order.len() || from == to {
            return;
        }
        let entry = self.order.remove(from);
        self.order.insert(to, entry);
    }

    /// Projects the palette into serialization order. Output is capped at
    /// the addressable range; entries beyond it map to 0.
    pub fn ordered(&self) -> OrderedPalette {
        let count = self.order.len().min(PALETTE_MAX_COLOR_COUNT);
        let mut colors = Vec::with_capacity(count);
        let mut emissive = Vec::with_capacity(count);
        let mut mapping = vec![0u8; self.colors.len()];
        for (serialized, &memory) in self.order.iter().take(count).enumerate() {
            colors.push(self.colors[memory as usize]);
            emissive.push(self.emissive[memory as usize]);
            mapping[memory as usize] = serialized as u8;
        }
        OrderedPalette {
            colors,
            emissive,
            mapping,
        }
    }
}

/// Color of `index` in one of the built-in legacy palettes, or `None` for
/// an unknown palette id or out-of-range index.
pub fn legacy_palette_color(palette_id: u8, index: u8) -> Option<RgbaColor> {
    match palette_id {
        PALETTE_ID_IOS_ITEM_EDITOR_LEGACY => PALETTE_IOS_ITEM_EDITOR_LEGACY
            .get(index as usize)
            .copied(),
        PALETTE_ID_2021 => palette_2021().get(index as usize).copied(),
        _ => None,
    }
}

// Item-editor era palette: the 16 pico-8 colors followed by a 16-step gray
// ramp.
const PALETTE_IOS_ITEM_EDITOR_LEGACY: [RgbaColor; 32] = [
    RgbaColor::new(0x00, 0x00, 0x00, 0xFF),
    RgbaColor::new(0x1D, 0x2B, 0x53, 0xFF),
    RgbaColor::new(0x7E, 0x25, 0x53, 0xFF),
    RgbaColor::new(0x00, 0x87, 0x51, 0xFF),
    RgbaColor::new(0xAB, 0x52, 0x36, 0xFF),
    RgbaColor::new(0x5F, 0x57, 0x4F, 0xFF),
    RgbaColor::new(0xC2, 0xC3, 0xC7, 0xFF),
    RgbaColor::new(0xFF, 0xF1, 0xE8, 0xFF),
    RgbaColor::new(0xFF, 0x00, 0x4D, 0xFF),
    RgbaColor::new(0xFF, 0xA3, 0x00, 0xFF),
    RgbaColor::new(0xFF, 0xEC, 0x27, 0xFF),
    RgbaColor::new(0x00, 0xE4, 0x36, 0xFF),
    RgbaColor::new(0x29, 0xAD, 0xFF, 0xFF),
    RgbaColor::new(0x83, 0x76, 0x9C, 0xFF),
    RgbaColor::new(0xFF, 0x77, 0xA8, 0xFF),
    RgbaColor::new(0xFF, 0xCC, 0xAA, 0xFF),
    RgbaColor::new(0x00, 0x00, 0x00, 0xFF),
    RgbaColor::new(0x11, 0x11, 0x11, 0xFF),
    RgbaColor::new(0x22, 0x22, 0x22, 0xFF),
    RgbaColor::new(0x33, 0x33, 0x33, 0xFF),
    RgbaColor::new(0x44, 0x44, 0x44, 0xFF),
    RgbaColor::new(0x55, 0x55, 0x55, 0xFF),
    RgbaColor::new(0x66, 0x66, 0x66, 0xFF),
    RgbaColor::new(0x77, 0x77, 0x77, 0xFF),
    RgbaColor::new(0x88, 0x88, 0x88, 0xFF),
    RgbaColor::new(0x99, 0x99, 0x99, 0xFF),
    RgbaColor::new(0xAA, 0xAA, 0xAA, 0xFF),
    RgbaColor::new(0xBB, 0xBB, 0xBB, 0xFF),
    RgbaColor::new(0xCC, 0xCC, 0xCC, 0xFF),
    RgbaColor::new(0xDD, 0xDD, 0xDD, 0xFF),
    RgbaColor::new(0xEE, 0xEE, 0xEE, 0xFF),
    RgbaColor::new(0xFF, 0xFF, 0xFF, 0xFF),
];

// 2021 palette: 12 grays plus 30 hue ramps of 8 values each, 252 entries.
fn palette_2021() -> &'static [RgbaColor] {
    static TABLE: OnceLock<Vec<RgbaColor>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut colors = Vec::with_capacity(252);
        for step in 0..12u32 {
            let v = (step * 255 / 11) as u8;
            colors.push(RgbaColor::new(v, v, v, 0xFF));
        }
        for hue_step in 0..30u32 {
            for value_step in 0..8u32 {
                let hue = hue_step as f32 * 12.0;
                let value = 0.25 + 0.75 * (value_step as f32 / 7.0);
                colors.push(hsv_to_rgba(hue, 0.85, value));
            }
        }
        colors
    })
}

fn hsv_to_rgba(hue: f32, saturation: f32, value: f32) -> RgbaColor {
    let c = value * saturation;
    let h = hue / 60.0;
    let x = c * (1.0 - (h % 2.0 - 1.0).abs());
    let (r, g, b) = match h as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let m = value - c;
    RgbaColor::new(
        ((r + m) * 255.0).round() as u8,
        ((g + m) * 255.0).round() as u8,
        ((b + m) * 255.0).round() as u8,
        0xFF,
    )
}
