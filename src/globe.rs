//! The capture rig: plates, their pixel storage, and plate resolution.

use crate::{MapResult, Mappings, Vector3};

/// Upper bound on plates in a globe; a full cubemap uses all six.
pub const MAX_PLATES: usize = 6;

/// One capture view of the rig.
#[derive(Debug, Clone)]
pub struct Plate {
    pub forward: Vector3,
    pub right: Vector3,
    pub up: Vector3,
    /// Field of view, radians, in `(0, pi)`.
    pub fov: f64,
    /// Distance from the eye to the unit image plane: `0.5 / tan(fov / 2)`.
    pub dist: f64,
    /// Set while some lens pixel samples this plate; only displayed plates
    /// are re-rendered each frame.
    pub display: bool,
    /// Tint lookup used by the rubix overlay: maps a captured palette index
    /// to its tinted counterpart.
    pub palette: [u8; 256],
}

/// Rejection reasons for a scripted plate definition.
#[derive(Debug, thiserror::Error)]
pub enum PlateError {
    #[error("fov must be within (0, 180) degrees")]
    BadFov,
    #[error("forward and up vectors are parallel or zero")]
    DegenerateBasis,
}

impl Plate {
    /// Builds a plate from scripted forward/up vectors and a field of view in
    /// radians.
    ///
    /// `right` and `up` are re-derived with cross products, so the basis ends
    /// up orthonormal even when the scripted up vector is only approximately
    /// perpendicular to forward.
    pub fn new(forward: Vector3, up: Vector3, fov: f64) -> Result<Self, PlateError> {
        if !fov.is_finite() || fov <= 0.0 || fov >= std::f64::consts::PI {
            return Err(PlateError::BadFov);
        }
        let forward = forward
            .try_normalize(1e-9)
            .ok_or(PlateError::DegenerateBasis)?;
        let right = up
            .cross(&forward)
            .try_normalize(1e-9)
            .ok_or(PlateError::DegenerateBasis)?;
        let up = forward.cross(&right);
        Ok(Self {
            forward,
            right,
            up,
            fov,
            dist: 0.5 / (fov / 2.0).tan(),
            display: false,
            palette: identity_palette(),
        })
    }
}

fn identity_palette() -> [u8; 256] {
    let mut p = [0u8; 256];
    for (i, v) in p.iter_mut().enumerate() {
        *v = i as u8;
    }
    p
}

/// The multi-plate capture rig plus its pixel storage.
///
/// The capture buffer holds `platesize² × numplates` bytes, one square region
/// per plate, and is reallocated in one step whenever the plate size or the
/// plate count changes.
#[derive(Debug, Default)]
pub struct Globe {
    pub name: String,
    pub valid: bool,
    pub changed: bool,
    pub plates: Vec<Plate>,
    /// Side length of each captured square, pixels.
    pub platesize: usize,
    pub pixels: Vec<u8>,
}

impl Globe {
    /// Clears the globe to the invalid empty state used after a rejected
    /// load.
    pub fn invalidate(&mut self) {
        self.name.clear();
        self.valid = false;
        self.plates.clear();
        self.pixels.clear();
    }

    /// Reallocates the capture buffer for a new plate side length.
    pub fn resize(&mut self, platesize: usize) {
        self.platesize = platesize;
        self.pixels = vec![0; platesize * platesize * self.plates.len()];
    }

    /// Plate-relative index of a capture texel, as stored in the lens lookup
    /// table.
    ///
    /// Index 0 doubles as the table's "unmapped" sentinel, so plate 0's texel
    /// (0, 0) is never displayed; the index stays valid across buffer
    /// reallocation, unlike a raw pointer.
    pub fn texel_index(&self, plate: usize, x: usize, y: usize) -> u32 {
        (plate * self.platesize * self.platesize + x + y * self.platesize) as u32
    }

    /// The mutable capture region of one plate.
    pub fn plate_region_mut(&mut self, plate: usize) -> &mut [u8] {
        let area = self.platesize * self.platesize;
        &mut self.pixels[plate * area..(plate + 1) * area]
    }

    /// Resolves a view ray to the plate that should supply its pixel.
    ///
    /// A scripted override, when present, wins and its status is propagated
    /// unchanged. Otherwise the plate with the maximum `dot(ray, forward)` —
    /// the smallest angular distance — is chosen, ties going to the lowest
    /// index.
    pub fn ray_to_plate_index(&self, maps: &mut dyn Mappings, ray: Vector3) -> MapResult<usize> {
        if maps.has_plate_select() {
            return maps.plate_select(ray);
        }

        let mut best = None;
        let mut max_dp = f64::NEG_INFINITY;
        for (i, plate) in self.plates.iter().enumerate() {
            let dp = ray.dot(&plate.forward);
            if dp > max_dp {
                max_dp = dp;
                best = Some(i);
            }
        }
        Ok(best)
    }
}

/// Projects a ray into `plate`'s texture space.
///
/// Returns the `[0,1]²` UV when the ray lands within the plate's captured
/// extent, `None` when it falls outside (callers must not sample).
pub fn ray_to_plate_uv(plate: &Plate, ray: Vector3) -> Option<(f64, f64)> {
    let x = plate.right.dot(&ray);
    let y = plate.up.dot(&ray);
    let z = plate.forward.dot(&ray);

    let u = x / z * plate.dist + 0.5;
    let v = -y / z * plate.dist + 0.5;

    ((0.0..=1.0).contains(&u) && (0.0..=1.0).contains(&v)).then_some((u, v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{geom, MapResult, Vector2};
    use approx::assert_relative_eq;
    use std::f64::consts::{FRAC_PI_2, FRAC_PI_3};

    /// No slots supplied; the resolver must fall back to nearest-forward.
    struct NoMaps;

    impl Mappings for NoMaps {
        fn has_inverse(&self) -> bool {
            false
        }
        fn has_forward(&self) -> bool {
            false
        }
        fn has_plate_select(&self) -> bool {
            false
        }
        fn inverse(&mut self, _x: f64, _y: f64) -> MapResult<Vector3> {
            Err(crate::NonsenseValue("no inverse".into()))
        }
        fn forward(&mut self, _ray: Vector3) -> MapResult<Vector2> {
            Err(crate::NonsenseValue("no forward".into()))
        }
        fn plate_select(&mut self, _ray: Vector3) -> MapResult<usize> {
            Err(crate::NonsenseValue("no plate_select".into()))
        }
    }

    fn cube_globe() -> Globe {
        let axes = [
            Vector3::new(0.0, 0.0, 1.0),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(0.0, 0.0, -1.0),
            Vector3::new(-1.0, 0.0, 0.0),
            Vector3::new(0.0, 1.0, 0.0),
            Vector3::new(0.0, -1.0, 0.0),
        ];
        let plates = axes
            .iter()
            .map(|&f| {
                let up = if f.y.abs() > 0.5 {
                    Vector3::new(0.0, 0.0, 1.0)
                } else {
                    Vector3::new(0.0, 1.0, 0.0)
                };
                Plate::new(f, up, FRAC_PI_2).unwrap()
            })
            .collect();
        Globe {
            valid: true,
            plates,
            ..Default::default()
        }
    }

    #[test]
    fn basis_is_reorthogonalized() {
        // A sheared up vector must still yield an orthonormal frame.
        let plate = Plate::new(
            Vector3::new(0.0, 0.0, 2.0),
            Vector3::new(0.3, 1.0, 0.4),
            FRAC_PI_3,
        )
        .unwrap();
        assert_relative_eq!(plate.forward.norm(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(plate.right.norm(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(plate.up.norm(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(plate.forward.dot(&plate.right), 0.0, epsilon = 1e-12);
        assert_relative_eq!(plate.forward.dot(&plate.up), 0.0, epsilon = 1e-12);
        assert_relative_eq!(plate.right.dot(&plate.up), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn rejects_bad_plates() {
        let f = Vector3::new(0.0, 0.0, 1.0);
        let u = Vector3::new(0.0, 1.0, 0.0);
        assert!(matches!(Plate::new(f, u, 0.0), Err(PlateError::BadFov)));
        assert!(matches!(
            Plate::new(f, u, std::f64::consts::PI),
            Err(PlateError::BadFov)
        ));
        assert!(matches!(
            Plate::new(f, f * 2.0, FRAC_PI_2),
            Err(PlateError::DegenerateBasis)
        ));
    }

    #[test]
    fn resolver_is_total_over_the_sphere() {
        let globe = cube_globe();
        let mut lat = -1.4;
        while lat <= 1.4 {
            let mut lon = -3.1;
            while lon <= 3.1 {
                let ray = geom::latlon_to_ray(lat, lon);
                let idx = globe.ray_to_plate_index(&mut NoMaps, ray).unwrap().unwrap();
                assert!(idx < globe.plates.len());
                lon += 0.29;
            }
            lat += 0.27;
        }
    }

    #[test]
    fn resolver_ties_go_to_the_lowest_index() {
        let f = Vector3::new(0.0, 0.0, 1.0);
        let u = Vector3::new(0.0, 1.0, 0.0);
        let globe = Globe {
            valid: true,
            plates: vec![
                Plate::new(f, u, FRAC_PI_2).unwrap(),
                Plate::new(f, u, FRAC_PI_2).unwrap(),
            ],
            ..Default::default()
        };
        let idx = globe
            .ray_to_plate_index(&mut NoMaps, f)
            .unwrap()
            .unwrap();
        assert_eq!(idx, 0);
    }

    #[test]
    fn uv_round_trips_through_the_plate_frame() {
        let plate = Plate::new(
            Vector3::new(0.0, 0.0, 1.0),
            Vector3::new(0.0, 1.0, 0.0),
            FRAC_PI_2,
        )
        .unwrap();
        for &(u, v) in &[(0.5, 0.5), (0.1, 0.9), (0.0, 0.0), (1.0, 1.0), (0.75, 0.25)] {
            let ray = geom::plate_uv_to_ray(&plate, Vector2::new(u, v));
            let (ru, rv) = ray_to_plate_uv(&plate, ray).expect("uv in range must stay valid");
            assert_relative_eq!(ru, u, epsilon = 1e-9);
            assert_relative_eq!(rv, v, epsilon = 1e-9);
        }
    }

    #[test]
    fn rays_outside_the_frustum_are_invalid() {
        let plate = Plate::new(
            Vector3::new(0.0, 0.0, 1.0),
            Vector3::new(0.0, 1.0, 0.0),
            FRAC_PI_2,
        )
        .unwrap();
        // 90° to the side: never within a 90° plate.
        assert!(ray_to_plate_uv(&plate, Vector3::new(1.0, 0.0, 0.0)).is_none());
        assert!(ray_to_plate_uv(&plate, Vector3::new(0.0, 0.0, -1.0)).is_none());
    }

    #[test]
    fn texel_indices_are_plate_relative() {
        let mut globe = cube_globe();
        globe.resize(8);
        assert_eq!(globe.texel_index(0, 0, 0), 0);
        assert_eq!(globe.texel_index(0, 3, 2), 19);
        assert_eq!(globe.texel_index(2, 0, 0), 128);
        assert_eq!(globe.pixels.len(), 8 * 8 * 6);
    }
}
