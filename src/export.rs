//! PNG export of the globe's captured plates.

use std::path::Path;

use image::{Rgb, RgbImage};

use crate::globe::Globe;
use crate::{geom, Mappings, NonsenseValue, Vector2};

/// Palette index written for texels the current lens cannot reach.
const EXCLUDED: u8 = 254;

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error(transparent)]
    Image(#[from] image::ImageError),
    #[error(transparent)]
    Script(#[from] NonsenseValue),
}

/// Renders one plate's capture as an RGB image through the base palette.
///
/// Unless `with_margins` is set, texels whose back-projected ray does not
/// resolve to this plate (the overlap regions a lens never samples) are
/// replaced with the [`EXCLUDED`] sentinel before the palette lookup.
pub fn plate_image(
    globe: &Globe,
    maps: &mut dyn Mappings,
    palette: &[u8; 768],
    plate: usize,
    with_margins: bool,
) -> Result<RgbImage, NonsenseValue> {
    let ps = globe.platesize;
    let mut img = RgbImage::new(ps as u32, ps as u32);

    for py in 0..ps {
        let v = py as f64 / ps as f64;
        for px in 0..ps {
            let u = px as f64 / ps as f64;

            let mut col = globe.pixels[globe.texel_index(plate, px, py) as usize];
            if !with_margins {
                let ray = geom::plate_uv_to_ray(&globe.plates[plate], Vector2::new(u, v));
                if globe.ray_to_plate_index(maps, ray)? != Some(plate) {
                    col = EXCLUDED;
                }
            }

            let at = col as usize * 3;
            img.put_pixel(
                px as u32,
                py as u32,
                Rgb([palette[at], palette[at + 1], palette[at + 2]]),
            );
        }
    }
    Ok(img)
}

/// Writes one plate as a PNG file.
pub fn save_plate_png(
    globe: &Globe,
    maps: &mut dyn Mappings,
    palette: &[u8; 768],
    plate: usize,
    with_margins: bool,
    path: &Path,
) -> Result<(), ExportError> {
    let img = plate_image(globe, maps, palette, plate, with_margins)?;
    img.save(path)?;
    Ok(())
}
