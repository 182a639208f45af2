//! Pure coordinate conversions between angles, view rays, and plate texture
//! space.
//!
//! Everything here is stateless. The lookup-table builder leans on the
//! round-trip guarantees (`ray_to_latlon` inverts [`latlon_to_ray`], the
//! globe resolver inverts [`plate_uv_to_ray`]), so the conventions baked into
//! these formulas must stay in lockstep with [`crate::globe::ray_to_plate_uv`].

use crate::globe::Plate;
use crate::{Vector2, Vector3};

/// Converts latitude/longitude angles (radians) to a unit view ray.
///
/// Longitude sweeps around the vertical axis with `lon = 0` looking down +Z;
/// latitude tilts the ray toward +Y. The result is unit length by
/// construction.
pub fn latlon_to_ray(lat: f64, lon: f64) -> Vector3 {
    let clat = lat.cos();
    Vector3::new(lon.sin() * clat, lat.sin(), lon.cos() * clat)
}

/// Recovers `(lat, lon)` from a view ray.
///
/// Inverse of [`latlon_to_ray`] up to the usual `atan2` branch conventions;
/// round-trips for any ray that is not pointing exactly at a pole.
pub fn ray_to_latlon(ray: Vector3) -> (f64, f64) {
    let horiz = (ray.x * ray.x + ray.z * ray.z).sqrt();
    (ray.y.atan2(horiz), ray.x.atan2(ray.z))
}

/// Back-projects a `[0,1]²` texture coordinate on `plate` to the unit view
/// ray passing through that texel.
///
/// This is the pinhole back-projection for the plate: the UV is recentered
/// (v flipped, image y grows downward), placed on the image plane at the
/// plate's projection distance, and normalized.
pub fn plate_uv_to_ray(plate: &Plate, uv: Vector2) -> Vector3 {
    let u = uv.x - 0.5;
    let v = -(uv.y - 0.5);
    (plate.forward * plate.dist + plate.right * u + plate.up * v).normalize()
}
