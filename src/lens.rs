//! The output image descriptor and its per-pixel lookup storage.

/// Which direction of scripted mapping drives the lookup-table build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MapKind {
    /// No usable mapping; the lens renders nothing.
    #[default]
    None,
    /// Screen coordinate → view ray; built by per-pixel ray casting.
    Inverse,
    /// View ray → screen coordinate; built by per-texel quad rasterization.
    Forward,
}

/// Tint-buffer sentinel for "no tint".
pub const NO_TINT: u8 = 255;

/// The output projection descriptor.
///
/// `width`/`height` describe the lens image in the script's own units (0 =
/// unspecified); `width_px`/`height_px` are bound to the viewport. `scale`
/// converts between the two (projection units per output pixel) and is only
/// meaningful after a successful zoom calculation.
#[derive(Debug, Default)]
pub struct Lens {
    pub name: String,
    pub valid: bool,
    pub changed: bool,
    pub kind: MapKind,
    pub width: f64,
    pub height: f64,
    pub width_px: usize,
    pub height_px: usize,
    pub scale: f64,
    /// One plate-relative capture index per output pixel; 0 = unmapped.
    pub pixels: Vec<u32>,
    /// One tint plate index per output pixel; [`NO_TINT`] = untinted.
    pub tints: Vec<u8>,
}

impl Lens {
    /// Clears the lens to the invalid empty state used after a rejected load.
    pub fn invalidate(&mut self) {
        self.name.clear();
        self.valid = false;
        self.kind = MapKind::None;
    }

    /// Rebinds the pixel dimensions and reallocates both per-pixel buffers.
    pub fn resize(&mut self, width_px: usize, height_px: usize) {
        self.width_px = width_px;
        self.height_px = height_px;
        let area = width_px * height_px;
        self.pixels = vec![0; area];
        self.tints = vec![NO_TINT; area];
    }

    /// Resets every pixel to unmapped/untinted ahead of a rebuild.
    pub fn clear_table(&mut self) {
        self.pixels.fill(0);
        self.tints.fill(NO_TINT);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffers_track_the_pixel_dimensions() {
        let mut lens = Lens::default();
        lens.resize(320, 200);
        assert_eq!(lens.pixels.len(), 64000);
        assert_eq!(lens.tints.len(), 64000);
        assert!(lens.pixels.iter().all(|&p| p == 0));
        assert!(lens.tints.iter().all(|&t| t == NO_TINT));

        lens.pixels[17] = 42;
        lens.tints[17] = 3;
        lens.clear_table();
        assert_eq!(lens.pixels[17], 0);
        assert_eq!(lens.tints[17], NO_TINT);
    }
}
