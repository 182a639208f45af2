//! Derives the lens scale from the requested framing.

use crate::{geom, lens::Lens, Mappings, NonsenseValue};

/// The requested framing policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ZoomKind {
    #[default]
    None,
    /// Fit a requested horizontal field of view.
    Fov,
    /// Fit a requested vertical field of view.
    VFov,
    /// Scale so the lens extent covers the whole output.
    Cover,
    /// Scale so the lens extent fits inside the output.
    Contain,
}

/// The requested framing plus the lens script's calibration limits.
#[derive(Debug, Clone, Copy, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Zoom {
    pub kind: ZoomKind,
    /// Requested field of view, whole degrees (FOV/VFOV kinds only).
    pub fov_deg: u32,
    /// Script-declared maximum horizontal FOV, degrees; 0 = uncalibrated.
    pub max_fov: u32,
    /// Script-declared maximum vertical FOV, degrees; 0 = uncalibrated.
    pub max_vfov: u32,
    pub changed: bool,
}

impl Zoom {
    /// Replaces the framing request and flags the change for the next frame.
    pub fn request(&mut self, kind: ZoomKind, fov_deg: u32) {
        self.kind = kind;
        self.fov_deg = fov_deg;
        self.changed = true;
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ZoomError {
    #[error("max_fov and max_vfov are not calibrated; try cover or contain")]
    NoCalibration,
    #[error("fov must be at most {max} degrees")]
    FovTooWide { max: u32 },
    #[error("the lens supplies no forward mapping for FOV scaling")]
    NoForwardMap,
    #[error("the forward mapping returned no value for the FOV probe ray")]
    NoForwardValue,
    #[error("the lens declares neither width nor height; try a fov zoom")]
    NoDimensions,
    #[error("computed a non-positive scale ({0})")]
    NonPositiveScale(f64),
    #[error(transparent)]
    Script(#[from] NonsenseValue),
}

/// Computes `lens.scale` for the requested framing.
///
/// FOV framing probes the forward mapping with a ray at half the requested
/// angle and divides the returned coordinate by half the output dimension;
/// cover/contain compare the lens's declared aspect to the output aspect and
/// pick the appropriate fit. Any failure leaves the scale unusable (≤ 0) and
/// is reported to the caller rather than clamped.
pub fn calc_zoom(lens: &mut Lens, zoom: &Zoom, maps: &mut dyn Mappings) -> Result<(), ZoomError> {
    lens.scale = -1.0;

    match zoom.kind {
        ZoomKind::Fov | ZoomKind::VFov => {
            if zoom.max_fov == 0 || zoom.max_vfov == 0 {
                return Err(ZoomError::NoCalibration);
            }
            if zoom.kind == ZoomKind::Fov && zoom.fov_deg > zoom.max_fov {
                return Err(ZoomError::FovTooWide { max: zoom.max_fov });
            }
            if zoom.kind == ZoomKind::VFov && zoom.fov_deg > zoom.max_vfov {
                return Err(ZoomError::FovTooWide { max: zoom.max_vfov });
            }
            if !maps.has_forward() {
                return Err(ZoomError::NoForwardMap);
            }

            let half = (zoom.fov_deg as f64).to_radians() * 0.5;
            if zoom.kind == ZoomKind::Fov {
                let ray = geom::latlon_to_ray(0.0, half);
                let xy = maps.forward(ray)?.ok_or(ZoomError::NoForwardValue)?;
                lens.scale = xy.x / (lens.width_px as f64 * 0.5);
            } else {
                let ray = geom::latlon_to_ray(half, 0.0);
                let xy = maps.forward(ray)?.ok_or(ZoomError::NoForwardValue)?;
                lens.scale = xy.y / (lens.height_px as f64 * 0.5);
            }
        }

        ZoomKind::Cover | ZoomKind::Contain => {
            let fit_width = lens.width / lens.width_px as f64;
            let fit_height = lens.height / lens.height_px as f64;

            let width_given = lens.width > 0.0;
            let height_given = lens.height > 0.0;

            lens.scale = match (width_given, height_given) {
                (false, true) => fit_height,
                (true, false) => fit_width,
                (false, false) => return Err(ZoomError::NoDimensions),
                (true, true) => {
                    let lens_aspect = lens.width / lens.height;
                    let screen_aspect = lens.width_px as f64 / lens.height_px as f64;
                    let lens_wider = lens_aspect > screen_aspect;
                    match zoom.kind {
                        ZoomKind::Contain => {
                            if lens_wider {
                                fit_width
                            } else {
                                fit_height
                            }
                        }
                        _ => {
                            if lens_wider {
                                fit_height
                            } else {
                                fit_width
                            }
                        }
                    }
                }
            };
        }

        ZoomKind::None => {}
    }

    if lens.scale <= 0.0 {
        return Err(ZoomError::NonPositiveScale(lens.scale));
    }
    Ok(())
}
