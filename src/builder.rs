//! Incremental lookup-table construction.
//!
//! Populating the lens's per-pixel table is slow (one or two script calls per
//! output pixel, or per captured texel), so the work must not block the
//! host's frame loop. Instead of threads, the builder limits how long it may
//! run each frame and keeps its cursor between calls, resuming where it
//! stopped. Partial results are already wired into the lookup table, so the
//! user watches the lens fill in while the build completes over a few frames.
//!
//! Two dual algorithms populate the table, selected by the lens's
//! [`MapKind`]:
//!
//! - **Inverse**: walk output pixels, cast each through the scripted inverse
//!   projection to a view ray, and resolve the ray to a plate texel.
//! - **Forward**: walk captured texels, project each texel's corner quad to
//!   screen space through the scripted forward projection, and scan-convert
//!   the quad into the table. Each corner row is shared with the next texel
//!   row, halving the projection calls.

use std::time::{Duration, Instant};

use crate::globe::{ray_to_plate_uv, Globe};
use crate::lens::{Lens, MapKind};
use crate::rubix::RubixGrid;
use crate::{geom, Mappings, NonsenseValue, Vector2, Vector3};

/// Default per-frame work budget: one 60 Hz frame.
pub const FRAME_BUDGET: Duration = Duration::from_micros(16_667);

/// Quads projected wider or taller than this many pixels are assumed to wrap
/// around the projection boundary and are discarded instead of filled.
const MAX_QUAD_SPAN: i32 = 20;

/// Result of one [`LensBuilder::step`] slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStatus {
    /// The table is complete.
    Done,
    /// Budget exhausted; call `step` again next frame.
    Working,
    /// A script call returned a nonsensical value; the table is left in its
    /// partial state and no further work is scheduled.
    Failed,
}

/// Everything a build slice touches: the table being filled, the rig it
/// samples, the scripted mappings, and the overlay parameters.
pub struct BuildContext<'a> {
    pub lens: &'a mut Lens,
    pub globe: &'a mut Globe,
    pub maps: &'a mut dyn Mappings,
    pub rubix: &'a RubixGrid,
}

/// A projected texel corner in output pixel coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScreenPoint {
    pub x: i32,
    pub y: i32,
}

/// The resumable build state machine.
///
/// `Idle` doubles as "done" and "failed"; distinguishing the two is the
/// caller's job via the [`BuildStatus`] it observed. The cursor variants own
/// all cross-call scratch memory, so dropping back to `Idle` frees it.
#[derive(Debug, Default)]
pub enum LensBuilder {
    #[default]
    Idle,
    Inverse(InverseCursor),
    Forward(ForwardCursor),
}

/// Inverse cursor: the output row being filled, counting down.
#[derive(Debug)]
pub struct InverseCursor {
    ly: isize,
}

/// Forward cursor: the plate and source texel row being rasterized (row
/// counting down), plus the two rows of projected corner coordinates shared
/// between adjacent texel rows.
#[derive(Debug)]
pub struct ForwardCursor {
    plate: usize,
    py: isize,
    top: Vec<ScreenPoint>,
    bot: Vec<ScreenPoint>,
}

impl LensBuilder {
    /// True while a build is in progress and wants another `step`.
    pub fn is_working(&self) -> bool {
        !matches!(self, Self::Idle)
    }

    /// Begins a fresh build for the lens's map kind and runs the first slice.
    ///
    /// The lookup table must already be cleared and the lens scale computed.
    pub fn start(&mut self, ctx: &mut BuildContext<'_>, budget: Duration) -> BuildStatus {
        *self = match ctx.lens.kind {
            MapKind::Inverse => Self::Inverse(InverseCursor {
                ly: ctx.lens.height_px as isize - 1,
            }),
            MapKind::Forward => Self::Forward(ForwardCursor::new(ctx.globe.platesize)),
            MapKind::None => {
                *self = Self::Idle;
                log::warn!("no inverse or forward mapping is in use");
                return BuildStatus::Failed;
            }
        };
        self.step(ctx, budget)
    }

    /// Runs one budget-limited slice of the build.
    ///
    /// At least one unit of work (an output row, or a texel row) is performed
    /// per call, so progress is guaranteed for any budget; after that, the
    /// elapsed wall-clock time is checked before each further unit and the
    /// builder suspends once `budget` is exceeded. On `Done` or `Failed` the
    /// cursor and its scratch rows are released.
    pub fn step(&mut self, ctx: &mut BuildContext<'_>, budget: Duration) -> BuildStatus {
        let start = Instant::now();
        let lens = &mut *ctx.lens;
        let globe = &mut *ctx.globe;
        let maps = &mut *ctx.maps;
        let rubix = ctx.rubix;

        let status = match self {
            Self::Idle => BuildStatus::Done,
            Self::Inverse(cursor) => cursor.resume(lens, globe, maps, rubix, start, budget),
            Self::Forward(cursor) => cursor.resume(lens, globe, maps, rubix, start, budget),
        };
        if status != BuildStatus::Working {
            *self = Self::Idle;
        }
        status
    }
}

impl InverseCursor {
    fn resume(
        &mut self,
        lens: &mut Lens,
        globe: &mut Globe,
        maps: &mut dyn Mappings,
        rubix: &RubixGrid,
        start: Instant,
        budget: Duration,
    ) -> BuildStatus {
        let w = lens.width_px as isize;
        let h = lens.height_px as isize;
        let scale = lens.scale;

        let mut sliced = false;
        while self.ly >= 0 {
            if sliced && start.elapsed() >= budget {
                return BuildStatus::Working;
            }
            sliced = true;

            let y = -((self.ly - h / 2) as f64) * scale;
            for lx in 0..w {
                let x = ((lx - w / 2) as f64) * scale;

                let ray = match maps.inverse(x, y) {
                    Ok(Some(ray)) => ray,
                    Ok(None) => continue,
                    Err(e) => {
                        log::warn!("lens build aborted: {e}");
                        return BuildStatus::Failed;
                    }
                };
                let Some(ray) = ray.try_normalize(1e-12) else {
                    continue;
                };

                if let Err(e) =
                    set_from_ray(lens, globe, maps, rubix, lx as i32, self.ly as i32, ray)
                {
                    log::warn!("lens build aborted: {e}");
                    return BuildStatus::Failed;
                }
            }
            self.ly -= 1;
        }

        BuildStatus::Done
    }
}

impl ForwardCursor {
    fn new(platesize: usize) -> Self {
        Self {
            plate: 0,
            py: platesize as isize - 1,
            top: vec![ScreenPoint::default(); platesize + 1],
            bot: vec![ScreenPoint::default(); platesize + 1],
        }
    }

    fn resume(
        &mut self,
        lens: &mut Lens,
        globe: &mut Globe,
        maps: &mut dyn Mappings,
        rubix: &RubixGrid,
        start: Instant,
        budget: Duration,
    ) -> BuildStatus {
        let ps = globe.platesize;
        let psf = ps as f64;

        let mut sliced = false;
        while self.plate < globe.plates.len() {
            while self.py >= 0 {
                if sliced && start.elapsed() >= budget {
                    return BuildStatus::Working;
                }
                sliced = true;

                let py = self.py as usize;

                // Project this texel row's corner coordinates. The bottom row
                // only needs computing on the first (lowest) iteration; after
                // that the previous top row is reused as the new bottom.
                if py == ps - 1 {
                    let v = (py as f64 + 0.5) / psf;
                    if let Err(e) = fill_corner_row(lens, globe, maps, self.plate, v, &mut self.bot)
                    {
                        log::warn!("lens build aborted: {e}");
                        return BuildStatus::Failed;
                    }
                } else {
                    std::mem::swap(&mut self.top, &mut self.bot);
                }
                let v = (py as f64 - 0.5) / psf;
                if let Err(e) = fill_corner_row(lens, globe, maps, self.plate, v, &mut self.top) {
                    log::warn!("lens build aborted: {e}");
                    return BuildStatus::Failed;
                }

                // Rasterize a quad per texel, skipping texels that another
                // plate owns (adjacent wide-FOV plates overlap; the resolver
                // arbitrates duplicated coverage).
                let v = py as f64 / psf;
                for px in 0..ps {
                    let u = px as f64 / psf;
                    let ray = geom::plate_uv_to_ray(&globe.plates[self.plate], Vector2::new(u, v));
                    match globe.ray_to_plate_index(maps, ray) {
                        Ok(Some(owner)) if owner == self.plate => {}
                        Ok(_) => continue,
                        Err(e) => {
                            log::warn!("lens build aborted: {e}");
                            return BuildStatus::Failed;
                        }
                    }

                    let corners = [
                        self.top[px],
                        self.top[px + 1],
                        self.bot[px + 1],
                        self.bot[px],
                    ];
                    draw_quad(lens, globe, rubix, corners, self.plate, px as i32, py as i32);
                }

                self.py -= 1;
            }

            // Reset the row cursor only after the plate completes; a resumed
            // call must be able to land on a middle row.
            self.py = ps as isize - 1;
            self.plate += 1;
        }

        BuildStatus::Done
    }
}

/// Projects one row of texel corners (`platesize + 1` of them, at `u = (k -
/// 0.5) / platesize`) to screen coordinates.
///
/// Corners the projection declines to map keep their previous value; the
/// quad span guard discards the wild quads this can produce.
fn fill_corner_row(
    lens: &Lens,
    globe: &Globe,
    maps: &mut dyn Mappings,
    plate: usize,
    v: f64,
    row: &mut [ScreenPoint],
) -> Result<(), NonsenseValue> {
    let psf = globe.platesize as f64;
    for (k, corner) in row.iter_mut().enumerate() {
        let u = (k as f64 - 0.5) / psf;
        if let Some(pt) = uv_to_screen(lens, globe, maps, plate, u, v)? {
            *corner = pt;
        }
    }
    Ok(())
}

/// Maps a plate texture coordinate to an output pixel coordinate through the
/// forward projection.
fn uv_to_screen(
    lens: &Lens,
    globe: &Globe,
    maps: &mut dyn Mappings,
    plate: usize,
    u: f64,
    v: f64,
) -> crate::MapResult<ScreenPoint> {
    let ray = geom::plate_uv_to_ray(&globe.plates[plate], Vector2::new(u, v));
    let Some(xy) = maps.forward(ray)? else {
        return Ok(None);
    };
    Ok(Some(ScreenPoint {
        x: (xy.x / lens.scale + (lens.width_px / 2) as f64) as i32,
        y: (-xy.y / lens.scale + (lens.height_px / 2) as f64) as i32,
    }))
}

/// Scan-converts the projected quad of one captured texel into the lookup
/// table.
///
/// Corners arrive clockwise: top-left, top-right, bottom-right, bottom-left.
/// A bounding box collapsed in one or both axes degenerates to a line or a
/// point; otherwise each scanline's two edge intercepts bound a filled span.
fn draw_quad(
    lens: &mut Lens,
    globe: &mut Globe,
    rubix: &RubixGrid,
    corners: [ScreenPoint; 4],
    plate: usize,
    px: i32,
    py: i32,
) {
    let ScreenPoint { x, y } = corners[0];
    let (mut minx, mut maxx, mut miny, mut maxy) = (x, x, y, y);
    for p in &corners[1..] {
        minx = minx.min(p.x);
        maxx = maxx.max(p.x);
        miny = miny.min(p.y);
        maxy = maxy.max(p.y);
    }

    if maxx - minx > MAX_QUAD_SPAN || maxy - miny > MAX_QUAD_SPAN {
        return;
    }

    if miny == maxy && minx == maxx {
        set_from_plate(lens, globe, rubix, x, y, px, py, plate);
        return;
    }
    if miny == maxy {
        for tx in minx..=maxx {
            set_from_plate(lens, globe, rubix, tx, miny, px, py, plate);
        }
        return;
    }
    if minx == maxx {
        for ty in miny..=maxy {
            set_from_plate(lens, globe, rubix, x, ty, px, py, plate);
        }
        return;
    }

    for line in miny..=maxy {
        // The two x intercepts of this scanline against the quad's edges.
        let mut tx = [minx, maxx];
        let mut txi = 0;
        let mut j = 3;
        for i in 0..4 {
            let (ix, iy) = (corners[i].x, corners[i].y);
            let (jx, jy) = (corners[j].x, corners[j].y);
            if (iy < line && line <= jy) || (jy < line && line <= iy) {
                let dy = (jy - iy) as f64;
                let dx = (jx - ix) as f64;
                tx[txi] = (ix as f64 + (line - iy) as f64 / dy * dx) as i32;
                txi += 1;
                if txi == 2 {
                    break;
                }
            }
            j = i;
        }
        if tx[0] > tx[1] {
            tx.swap(0, 1);
        }

        if tx[1] - tx[0] > MAX_QUAD_SPAN {
            log::debug!("quad scanline span {} exceeds the fill guard", tx[1] - tx[0]);
            return;
        }

        for fill in tx[0]..=tx[1] {
            set_from_plate(lens, globe, rubix, fill, line, px, py, plate);
        }
    }
}

/// Resolves a view ray to a plate texel and records it for the given output
/// pixel. Rays no plate covers are left unmapped.
fn set_from_ray(
    lens: &mut Lens,
    globe: &mut Globe,
    maps: &mut dyn Mappings,
    rubix: &RubixGrid,
    lx: i32,
    ly: i32,
    ray: Vector3,
) -> Result<(), NonsenseValue> {
    let Some(plate) = globe.ray_to_plate_index(maps, ray)? else {
        return Ok(());
    };
    if plate >= globe.plates.len() {
        return Ok(());
    }
    let Some((u, v)) = ray_to_plate_uv(&globe.plates[plate], ray) else {
        return Ok(());
    };
    set_from_plate_uv(lens, globe, rubix, lx, ly, u, v, plate);
    Ok(())
}

fn set_from_plate_uv(
    lens: &mut Lens,
    globe: &mut Globe,
    rubix: &RubixGrid,
    lx: i32,
    ly: i32,
    u: f64,
    v: f64,
    plate: usize,
) {
    let px = (u * globe.platesize as f64) as i32;
    let py = (v * globe.platesize as f64) as i32;
    set_from_plate(lens, globe, rubix, lx, ly, px, py, plate);
}

/// Records one lookup-table entry, marks the source plate displayed, and tags
/// the pixel's calibration tint. Out-of-range coordinates on either side are
/// ignored (the forward pass projects off-screen freely).
fn set_from_plate(
    lens: &mut Lens,
    globe: &mut Globe,
    rubix: &RubixGrid,
    lx: i32,
    ly: i32,
    px: i32,
    py: i32,
    plate: usize,
) {
    if lx < 0 || lx >= lens.width_px as i32 || ly < 0 || ly >= lens.height_px as i32 {
        return;
    }
    let ps = globe.platesize as i32;
    if px < 0 || px >= ps || py < 0 || py >= ps {
        return;
    }

    globe.plates[plate].display = true;

    let at = ly as usize * lens.width_px + lx as usize;
    lens.pixels[at] = globe.texel_index(plate, px as usize, py as usize);
    if let Some(tint) = rubix.tint_for(globe.platesize, px as usize, py as usize, plate) {
        lens.tints[at] = tint;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::globe::Plate;
    use crate::MapResult;
    use std::f64::consts::FRAC_PI_2;

    type InverseFn = Box<dyn FnMut(f64, f64) -> MapResult<Vector3>>;
    type ForwardFn = Box<dyn FnMut(Vector3) -> MapResult<Vector2>>;

    #[derive(Default)]
    struct TestMaps {
        inverse: Option<InverseFn>,
        forward: Option<ForwardFn>,
    }

    impl Mappings for TestMaps {
        fn has_inverse(&self) -> bool {
            self.inverse.is_some()
        }
        fn has_forward(&self) -> bool {
            self.forward.is_some()
        }
        fn has_plate_select(&self) -> bool {
            false
        }
        fn inverse(&mut self, x: f64, y: f64) -> MapResult<Vector3> {
            match &mut self.inverse {
                Some(f) => f(x, y),
                None => Err(NonsenseValue("lens_inverse is not supplied".into())),
            }
        }
        fn forward(&mut self, ray: Vector3) -> MapResult<Vector2> {
            match &mut self.forward {
                Some(f) => f(ray),
                None => Err(NonsenseValue("lens_forward is not supplied".into())),
            }
        }
        fn plate_select(&mut self, _ray: Vector3) -> MapResult<usize> {
            Err(NonsenseValue("globe_plate is not supplied".into()))
        }
    }

    fn pinhole_inverse() -> InverseFn {
        Box::new(|x, y| Ok(Some(Vector3::new(x, y, 0.5))))
    }

    fn pinhole_forward() -> ForwardFn {
        Box::new(|ray| {
            if ray.z <= 0.0 {
                return Ok(None);
            }
            Ok(Some(Vector2::new(ray.x / ray.z * 0.5, ray.y / ray.z * 0.5)))
        })
    }

    fn one_plate_globe(platesize: usize) -> Globe {
        let plate = Plate::new(
            Vector3::new(0.0, 0.0, 1.0),
            Vector3::new(0.0, 1.0, 0.0),
            FRAC_PI_2,
        )
        .unwrap();
        let mut globe = Globe {
            valid: true,
            plates: vec![plate],
            ..Default::default()
        };
        globe.resize(platesize);
        globe
    }

    fn test_lens(w: usize, h: usize, kind: MapKind) -> Lens {
        let mut lens = Lens {
            valid: true,
            kind,
            scale: 1.0 / w as f64,
            ..Default::default()
        };
        lens.resize(w, h);
        lens
    }

    fn run_to_completion(
        lens: &mut Lens,
        globe: &mut Globe,
        maps: &mut TestMaps,
        rubix: &RubixGrid,
        budget: Duration,
    ) -> (BuildStatus, usize) {
        let mut builder = LensBuilder::default();
        let mut status = {
            let mut ctx = BuildContext {
                lens: &mut *lens,
                globe: &mut *globe,
                maps: &mut *maps,
                rubix,
            };
            builder.start(&mut ctx, budget)
        };
        let mut steps = 1;
        while status == BuildStatus::Working {
            let mut ctx = BuildContext {
                lens: &mut *lens,
                globe: &mut *globe,
                maps: &mut *maps,
                rubix,
            };
            status = builder.step(&mut ctx, budget);
            steps += 1;
            assert!(steps < 10_000, "build did not converge");
        }
        assert!(!builder.is_working());
        (status, steps)
    }

    #[test]
    fn inverse_build_fills_the_table() {
        let mut lens = test_lens(32, 32, MapKind::Inverse);
        let mut globe = one_plate_globe(32);
        let mut maps = TestMaps { inverse: Some(pinhole_inverse()), forward: None };
        let rubix = RubixGrid::default();

        let (status, _) =
            run_to_completion(&mut lens, &mut globe, &mut maps, &rubix, Duration::from_secs(60));
        assert_eq!(status, BuildStatus::Done);
        assert!(globe.plates[0].display);

        let mapped = lens.pixels.iter().filter(|&&p| p != 0).count();
        assert!(mapped > 32 * 32 / 2, "only {mapped} pixels mapped");
    }

    #[test]
    fn inverse_build_is_idempotent() {
        let mut globe = one_plate_globe(32);
        let rubix = RubixGrid::default();

        let mut first = test_lens(32, 32, MapKind::Inverse);
        let mut maps = TestMaps { inverse: Some(pinhole_inverse()), forward: None };
        run_to_completion(&mut first, &mut globe, &mut maps, &rubix, Duration::from_secs(60));

        let mut second = test_lens(32, 32, MapKind::Inverse);
        let mut maps = TestMaps { inverse: Some(pinhole_inverse()), forward: None };
        run_to_completion(&mut second, &mut globe, &mut maps, &rubix, Duration::from_secs(60));

        assert_eq!(first.pixels, second.pixels);
        assert_eq!(first.tints, second.tints);
    }

    #[test]
    fn resumed_inverse_build_matches_the_unbounded_one() {
        let mut globe = one_plate_globe(32);
        let rubix = RubixGrid::default();

        let mut whole = test_lens(32, 32, MapKind::Inverse);
        let mut maps = TestMaps { inverse: Some(pinhole_inverse()), forward: None };
        let (status, steps) =
            run_to_completion(&mut whole, &mut globe, &mut maps, &rubix, Duration::from_secs(60));
        assert_eq!((status, steps), (BuildStatus::Done, 1));

        // A zero budget forces the finest possible partition: one row per
        // resumption.
        let mut pieces = test_lens(32, 32, MapKind::Inverse);
        let mut maps = TestMaps { inverse: Some(pinhole_inverse()), forward: None };
        let (status, steps) =
            run_to_completion(&mut pieces, &mut globe, &mut maps, &rubix, Duration::ZERO);
        assert_eq!(status, BuildStatus::Done);
        assert_eq!(steps, 32);

        assert_eq!(whole.pixels, pieces.pixels);
        assert_eq!(whole.tints, pieces.tints);
    }

    #[test]
    fn declined_pixels_are_skipped_without_aborting() {
        let mut lens = test_lens(32, 32, MapKind::Inverse);
        let mut globe = one_plate_globe(32);
        let rubix = RubixGrid::default();
        let mut maps = TestMaps {
            inverse: Some(Box::new(|x, y| {
                if x < 0.0 {
                    return Ok(None);
                }
                Ok(Some(Vector3::new(x, y, 0.5)))
            })),
            forward: None,
        };

        let (status, _) =
            run_to_completion(&mut lens, &mut globe, &mut maps, &rubix, Duration::from_secs(60));
        assert_eq!(status, BuildStatus::Done);

        for y in 0..32 {
            for x in 0..16 {
                assert_eq!(lens.pixels[y * 32 + x], 0, "declined pixel ({x},{y}) was mapped");
            }
        }
        assert!(lens.pixels.iter().any(|&p| p != 0));
    }

    #[test]
    fn nonsensical_values_abort_and_keep_partial_output() {
        let mut lens = test_lens(32, 32, MapKind::Inverse);
        let mut globe = one_plate_globe(32);
        let rubix = RubixGrid::default();
        // Rows are processed bottom-up (y increasingly positive); fail once
        // the upper half is reached.
        let mut maps = TestMaps {
            inverse: Some(Box::new(|x, y| {
                if y > 0.2 {
                    return Err(NonsenseValue("three values where two were expected".into()));
                }
                Ok(Some(Vector3::new(x, y, 0.5)))
            })),
            forward: None,
        };

        let mut builder = LensBuilder::default();
        let mut ctx = BuildContext {
            lens: &mut lens,
            globe: &mut globe,
            maps: &mut maps,
            rubix: &rubix,
        };
        let status = builder.start(&mut ctx, Duration::from_secs(60));
        assert_eq!(status, BuildStatus::Failed);
        assert!(!builder.is_working());

        // Rows written before the abort survive untouched; rows after it
        // were never reached.
        assert!(lens.pixels[31 * 32..].iter().any(|&p| p != 0));
        assert!(lens.pixels[..8 * 32].iter().all(|&p| p == 0));
    }

    #[test]
    fn forward_build_fills_the_table() {
        let mut lens = test_lens(16, 16, MapKind::Forward);
        let mut globe = one_plate_globe(16);
        let rubix = RubixGrid::default();
        let mut maps = TestMaps { inverse: None, forward: Some(pinhole_forward()) };

        let (status, _) =
            run_to_completion(&mut lens, &mut globe, &mut maps, &rubix, Duration::from_secs(60));
        assert_eq!(status, BuildStatus::Done);
        assert!(globe.plates[0].display);

        let mapped = lens.pixels.iter().filter(|&&p| p != 0).count();
        assert!(mapped > 16 * 16 / 2, "only {mapped} pixels mapped");
    }

    #[test]
    fn resumed_forward_build_matches_the_unbounded_one() {
        let mut globe = one_plate_globe(16);
        let rubix = RubixGrid::default();

        let mut whole = test_lens(16, 16, MapKind::Forward);
        let mut maps = TestMaps { inverse: None, forward: Some(pinhole_forward()) };
        run_to_completion(&mut whole, &mut globe, &mut maps, &rubix, Duration::from_secs(60));

        let mut pieces = test_lens(16, 16, MapKind::Forward);
        let mut maps = TestMaps { inverse: None, forward: Some(pinhole_forward()) };
        let (status, steps) =
            run_to_completion(&mut pieces, &mut globe, &mut maps, &rubix, Duration::ZERO);
        assert_eq!(status, BuildStatus::Done);
        assert_eq!(steps, 16);

        assert_eq!(whole.pixels, pieces.pixels);
        assert_eq!(whole.tints, pieces.tints);
    }

    #[test]
    fn forward_abort_reports_failure() {
        let mut lens = test_lens(16, 16, MapKind::Forward);
        let mut globe = one_plate_globe(16);
        let rubix = RubixGrid::default();
        let mut maps = TestMaps {
            inverse: None,
            forward: Some(Box::new(|ray| {
                if ray.y > 0.4 {
                    return Err(NonsenseValue("bad arity".into()));
                }
                Ok(Some(Vector2::new(ray.x / ray.z * 0.5, ray.y / ray.z * 0.5)))
            })),
        };

        let mut builder = LensBuilder::default();
        let mut ctx = BuildContext {
            lens: &mut lens,
            globe: &mut globe,
            maps: &mut maps,
            rubix: &rubix,
        };
        let status = builder.start(&mut ctx, Duration::from_secs(60));
        assert_eq!(status, BuildStatus::Failed);
    }

    #[test]
    fn quads_spanning_the_guard_are_discarded() {
        let mut lens = test_lens(64, 64, MapKind::Inverse);
        let mut globe = one_plate_globe(64);
        let rubix = RubixGrid::default();

        let near = ScreenPoint { x: 10, y: 10 };
        let far = ScreenPoint { x: 60, y: 10 };
        draw_quad(
            &mut lens,
            &mut globe,
            &rubix,
            [near, far, ScreenPoint { x: 60, y: 11 }, ScreenPoint { x: 10, y: 11 }],
            0,
            1,
            1,
        );
        assert!(lens.pixels.iter().all(|&p| p == 0));
    }

    #[test]
    fn degenerate_quads_fall_back_to_lines_and_points() {
        let mut lens = test_lens(64, 64, MapKind::Inverse);
        let mut globe = one_plate_globe(64);
        let rubix = RubixGrid::default();

        let p = ScreenPoint { x: 5, y: 5 };
        draw_quad(&mut lens, &mut globe, &rubix, [p, p, p, p], 0, 2, 3);
        assert_ne!(lens.pixels[5 * 64 + 5], 0);

        let a = ScreenPoint { x: 10, y: 8 };
        let b = ScreenPoint { x: 14, y: 8 };
        draw_quad(&mut lens, &mut globe, &rubix, [a, b, b, a], 0, 2, 3);
        for x in 10..=14 {
            assert_ne!(lens.pixels[8 * 64 + x], 0, "horizontal fill missed x={x}");
        }
    }
}
