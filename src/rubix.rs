//! Calibration grid overlay ("rubix") and the per-plate tint palettes it
//! draws with.
//!
//! The overlay tints every captured texel that is not on a grid line with its
//! plate's color, making plate boundaries and cell distortion visible in the
//! final image. It is purely visual; sampling is unaffected.

use crate::globe::MAX_PLATES;

/// Grid parameters.
///
/// A plate is divided into `numcells` blocks per axis, each block being a
/// cell of `cell_size` units framed by `pad_size` units of padding:
///
/// ```text
///    |----|----|----|
///    |    |    |    |
///    |----|XXXX|----|
///    |    |XXXX|    |
///    |----|----|----|
/// ```
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RubixGrid {
    pub enabled: bool,
    pub numcells: u32,
    pub cell_size: f64,
    pub pad_size: f64,
}

impl Default for RubixGrid {
    fn default() -> Self {
        Self {
            enabled: false,
            numcells: 10,
            cell_size: 4.0,
            pad_size: 1.0,
        }
    }
}

impl RubixGrid {
    /// Tint plate index for a capture texel, or `None` when the texel sits on
    /// a grid line and stays untinted.
    pub fn tint_for(&self, platesize: usize, px: usize, py: usize, plate: usize) -> Option<u8> {
        let block = self.pad_size + self.cell_size;
        let units = self.numcells as f64 * block + self.pad_size;
        let unit_px = platesize as f64 / units;

        let ux = px as f64 / unit_px;
        let uy = py as f64 / unit_px;

        let on_grid = ux % block < self.pad_size || uy % block < self.pad_size;
        (!on_grid).then_some(plate as u8)
    }
}

/// Tint colors per plate: white, blue, red, yellow, magenta, cyan.
const PLATE_TINTS: [[i32; 3]; MAX_PLATES] = [
    [255, 255, 255],
    [0, 0, 255],
    [255, 0, 0],
    [255, 255, 0],
    [255, 0, 255],
    [0, 255, 255],
];

/// Builds the tint lookup for one plate from a 256-entry RGB base palette:
/// every entry is blended 1/6 of the way toward the plate's tint color, then
/// requantized to the nearest base palette entry.
pub fn tint_palette(base: &[u8; 768], plate: usize) -> [u8; 256] {
    let tint = PLATE_TINTS[plate % MAX_PLATES];
    let percent = 256 / 6;

    let mut lookup = [0u8; 256];
    for (i, entry) in lookup.iter_mut().enumerate() {
        let mut r = base[i * 3] as i32;
        let mut g = base[i * 3 + 1] as i32;
        let mut b = base[i * 3 + 2] as i32;

        r += (percent * (tint[0] - r)) >> 8;
        g += (percent * (tint[1] - g)) >> 8;
        b += (percent * (tint[2] - b)) >> 8;

        *entry = nearest_index(base, r.clamp(0, 255), g.clamp(0, 255), b.clamp(0, 255));
    }
    lookup
}

/// Index of the base palette entry closest (squared RGB distance) to a color.
fn nearest_index(base: &[u8; 768], r: i32, g: i32, b: i32) -> u8 {
    let mut min_dist = i32::MAX;
    let mut min_index = 0;
    for i in 0..256 {
        let dr = base[i * 3] as i32 - r;
        let dg = base[i * 3 + 1] as i32 - g;
        let db = base[i * 3 + 2] as i32 - b;
        let dist = dr * dr + dg * dg + db * db;
        if dist < min_dist {
            min_dist = dist;
            min_index = i;
        }
    }
    min_index as u8
}
