//! # lensrend
//!
//! ```text
//!        capture globe                     lens image
//!      .--------------.                 .-------------.
//!     / +----+  +----+ \    lookup     |  ~~~~~~~~~~~  |
//!    |  | p0 |  | p1 |  |   ======>    | ~~~~~~~~~~~~~ |
//!    |  +----+  +----+  |    table     | ~~~~~~~~~~~~~ |
//!     \ +----+  +----+ /               |  ~~~~~~~~~~~  |
//!      \| p2 |  | p3 |/                 '-------------'
//!       +----+  +----+
//! ```
//!
//! ## Wide-angle lens rendering core
//!
//! `lensrend` produces arbitrary wide-angle projections (stereographic,
//! panini, Mercator, ...) of a 3D scene that the host renderer can only draw
//! with a narrow rectilinear frustum. It does so in two stages:
//!
//! - The scene is captured onto a **globe**: up to [`MAX_PLATES`] square
//!   views ("plates"), each with its own orientation and field of view.
//! - The captured plates are resampled into the output image through a
//!   scriptable **lens**: a pair of projection functions mapping view rays to
//!   image coordinates (forward) and back (inverse).
//!
//! The resampling is driven by a per-pixel lookup table built by
//! [`builder::LensBuilder`]. Building the table is expensive, so the builder
//! is a resumable state machine: each frame it runs for at most a wall-clock
//! budget and then yields, letting the user watch the lens fill in over a few
//! frames instead of stalling the host loop.
//!
//! Lenses and globes are defined as [rhai](https://rhai.rs) scripts loaded at
//! runtime; see [`script::ScriptHost`] for the script contract.
//!
//! Entrypoint is the [`LensRenderer`] struct, driven once per frame by
//! [`LensRenderer::render_view`].

use nalgebra as na;

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub mod builder;
pub mod config;
pub mod export;
pub mod geom;
pub mod globe;
pub mod lens;
pub mod rubix;
pub mod script;
pub mod zoom;

pub use builder::{BuildContext, BuildStatus, LensBuilder, FRAME_BUDGET};
pub use config::Directive;
pub use export::ExportError;
pub use globe::{Globe, Plate, MAX_PLATES};
pub use lens::{Lens, MapKind, NO_TINT};
pub use rubix::RubixGrid;
pub use script::{LoadError, ScriptHost};
pub use zoom::{Zoom, ZoomError, ZoomKind};

pub type Vector2 = na::Vector2<f64>;
pub type Vector3 = na::Vector3<f64>;

/// A script-supplied mapping produced a value the caller cannot interpret:
/// wrong number of components, or components that are not numbers.
///
/// This is fatal for the build that triggered the call; the lookup table is
/// left in whatever partial state it reached.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct NonsenseValue(pub String);

/// Outcome of one script-mapping call.
///
/// `Ok(Some(_))` carries the mapped value. `Ok(None)` means the script
/// declined to produce a value for this input (e.g. the ray points outside
/// the projection's domain); callers skip the pixel and move on. `Err` means
/// the script returned garbage and the current build must stop.
pub type MapResult<T> = Result<Option<T>, NonsenseValue>;

/// The three optional script-supplied mapping slots of a loaded lens/globe.
///
/// Absence is explicit rather than stubbed: which slots exist decides which
/// build algorithm runs (see [`MapKind`]), so presence is queried separately
/// from invocation. Invoking an absent slot is a caller bug and reports a
/// nonsensical value.
pub trait Mappings {
    fn has_inverse(&self) -> bool;
    fn has_forward(&self) -> bool;
    fn has_plate_select(&self) -> bool;

    /// Projection-space coordinate to view ray.
    fn inverse(&mut self, x: f64, y: f64) -> MapResult<Vector3>;

    /// View ray to projection-space coordinate.
    fn forward(&mut self, ray: Vector3) -> MapResult<Vector2>;

    /// Plate-selection override for the globe resolver.
    fn plate_select(&mut self, ray: Vector3) -> MapResult<usize>;
}

/// Camera orientation for the current frame, supplied by the host.
///
/// Plate bases are expressed relative to this frame: plate-local x is the
/// camera's right, y its up, z its forward.
#[derive(Debug, Clone, Copy)]
pub struct CameraBasis {
    pub forward: Vector3,
    pub right: Vector3,
    pub up: Vector3,
}

impl CameraBasis {
    /// Rebases a plate-local vector into world space.
    fn to_world(&self, v: Vector3) -> Vector3 {
        self.right * v.x + self.up * v.y + self.forward * v.z
    }
}

/// One plate render request handed to the host renderer.
#[derive(Debug, Clone, Copy)]
pub struct PlateView {
    /// Field of view of this capture, radians.
    pub fov: f64,
    pub forward: Vector3,
    pub right: Vector3,
    pub up: Vector3,
    /// Square output dimension in pixels.
    pub size: usize,
}

/// Host-side renderer invoked once per visible plate per frame.
pub trait PlateSource {
    /// Renders a `view.size`² view of the scene into `out`: row-major, one
    /// byte (palette index) per pixel, tightly packed.
    fn render_plate(&mut self, view: &PlateView, out: &mut [u8]);
}

/// A borrowed byte framebuffer the compositor writes into.
pub struct Surface<'a> {
    pub pixels: &'a mut [u8],
    /// Bytes per destination row.
    pub stride: usize,
}

/// Placement of the lens image inside the destination surface.
#[derive(Debug, Clone, Copy)]
pub struct ViewRect {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

/// The full lens session: globe, lens, zoom and overlay state, the script
/// host supplying the projection functions, and the incremental builder.
///
/// The host calls [`LensRenderer::render_view`] once per frame; everything
/// else (loading scripts, changing zoom or grid parameters) just flags state
/// as changed and takes effect on the next frame.
pub struct LensRenderer {
    pub lens: Lens,
    pub globe: Globe,
    pub zoom: Zoom,
    pub rubix: RubixGrid,
    scripts: ScriptHost,
    builder: LensBuilder,
    budget: Duration,
    base_palette: [u8; 768],
}

impl LensRenderer {
    /// Creates a session loading lens scripts from `root/lenses/<name>.rhai`
    /// and globe scripts from `root/globes/<name>.rhai`.
    ///
    /// The palette defaults to a grayscale ramp until the host supplies its
    /// own via [`LensRenderer::set_palette`].
    pub fn new(script_root: impl Into<PathBuf>) -> Self {
        let mut base_palette = [0u8; 768];
        for i in 0..256 {
            base_palette[i * 3] = i as u8;
            base_palette[i * 3 + 1] = i as u8;
            base_palette[i * 3 + 2] = i as u8;
        }
        Self {
            lens: Lens::default(),
            globe: Globe::default(),
            zoom: Zoom::default(),
            rubix: RubixGrid::default(),
            scripts: ScriptHost::new(script_root),
            builder: LensBuilder::Idle,
            budget: FRAME_BUDGET,
            base_palette,
        }
    }

    /// Replaces the host color palette (256 RGB triplets) used for the rubix
    /// tint tables and globe export.
    pub fn set_palette(&mut self, palette: &[u8; 768]) {
        self.base_palette = *palette;
        for (i, plate) in self.globe.plates.iter_mut().enumerate() {
            plate.palette = rubix::tint_palette(&self.base_palette, i);
        }
    }

    /// Overrides the per-frame build budget (default [`FRAME_BUDGET`]).
    pub fn set_frame_budget(&mut self, budget: Duration) {
        self.budget = budget;
    }

    /// True while a lookup-table build is in progress.
    pub fn building(&self) -> bool {
        self.builder.is_working()
    }

    /// Loads a lens script by name. On success returns the script's optional
    /// `onload` directive string for the caller to apply; on failure the lens
    /// is cleared to the invalid empty state.
    pub fn load_lens(&mut self, name: &str) -> Result<Option<String>, LoadError> {
        self.lens.changed = true;
        self.lens.name = name.to_owned();
        let numplates = self.globe.plates.len();
        match self.scripts.load_lens(name, numplates) {
            Ok(profile) => Ok(self.adopt_lens_profile(profile)),
            Err(e) => {
                self.lens.invalidate();
                Err(e)
            }
        }
    }

    /// Loads a lens from an in-memory script source. Same contract as
    /// [`LensRenderer::load_lens`].
    pub fn load_lens_source(
        &mut self,
        name: &str,
        source: &str,
    ) -> Result<Option<String>, LoadError> {
        self.lens.changed = true;
        self.lens.name = name.to_owned();
        let numplates = self.globe.plates.len();
        match self.scripts.load_lens_source(source, numplates) {
            Ok(profile) => Ok(self.adopt_lens_profile(profile)),
            Err(e) => {
                self.lens.invalidate();
                Err(e)
            }
        }
    }

    fn adopt_lens_profile(&mut self, profile: script::LensProfile) -> Option<String> {
        self.lens.valid = true;
        self.lens.kind = profile.kind;
        self.lens.width = profile.width;
        self.lens.height = profile.height;
        self.zoom.max_fov = profile.max_fov;
        self.zoom.max_vfov = profile.max_vfov;
        profile.onload
    }

    /// Loads a globe script by name; on failure the globe is cleared to the
    /// invalid empty state.
    pub fn load_globe(&mut self, name: &str) -> Result<(), LoadError> {
        self.globe.changed = true;
        self.globe.name = name.to_owned();
        match self.scripts.load_globe(name) {
            Ok(plates) => {
                self.adopt_plates(plates);
                Ok(())
            }
            Err(e) => {
                self.globe.invalidate();
                Err(e)
            }
        }
    }

    /// Loads a globe from an in-memory script source. Same contract as
    /// [`LensRenderer::load_globe`].
    pub fn load_globe_source(&mut self, name: &str, source: &str) -> Result<(), LoadError> {
        self.globe.changed = true;
        self.globe.name = name.to_owned();
        match self.scripts.load_globe_source(source) {
            Ok(plates) => {
                self.adopt_plates(plates);
                Ok(())
            }
            Err(e) => {
                self.globe.invalidate();
                Err(e)
            }
        }
    }

    fn adopt_plates(&mut self, mut plates: Vec<Plate>) {
        for (i, plate) in plates.iter_mut().enumerate() {
            plate.palette = rubix::tint_palette(&self.base_palette, i);
        }
        self.globe.plates = plates;
        self.globe.valid = true;
    }

    /// Requests a horizontal field of view, in degrees.
    pub fn set_fov(&mut self, degrees: u32) {
        self.zoom.request(ZoomKind::Fov, degrees);
    }

    /// Requests a vertical field of view, in degrees.
    pub fn set_vfov(&mut self, degrees: u32) {
        self.zoom.request(ZoomKind::VFov, degrees);
    }

    /// Scales the lens so its declared extent covers the whole output.
    pub fn set_cover(&mut self) {
        self.zoom.request(ZoomKind::Cover, 0);
    }

    /// Scales the lens so its declared extent fits inside the output.
    pub fn set_contain(&mut self) {
        self.zoom.request(ZoomKind::Contain, 0);
    }

    /// Reconfigures the calibration grid; the lens is rebuilt so stored tints
    /// pick up the new geometry.
    pub fn set_rubix_grid(&mut self, numcells: u32, cell_size: f64, pad_size: f64) {
        self.rubix.numcells = numcells;
        self.rubix.cell_size = cell_size;
        self.rubix.pad_size = pad_size;
        self.lens.changed = true;
    }

    /// Toggles the calibration tint overlay (a compositing-time switch; no
    /// rebuild needed).
    pub fn set_rubix_enabled(&mut self, enabled: bool) {
        self.rubix.enabled = enabled;
    }

    /// Applies one configuration directive. Load failures are reported via
    /// the log and leave the corresponding descriptor invalid, matching the
    /// re-issuable-command contract of the config file.
    pub fn apply(&mut self, directive: &Directive) {
        match directive {
            Directive::Lens(name) => match self.load_lens(name) {
                Ok(Some(onload)) => match onload.parse::<Directive>() {
                    Ok(next) => self.apply(&next),
                    Err(e) => log::warn!("lens {name}: bad onload directive: {e}"),
                },
                Ok(None) => {}
                Err(e) => log::warn!("not a valid lens: {e}"),
            },
            Directive::Globe(name) => {
                if let Err(e) = self.load_globe(name) {
                    log::warn!("not a valid globe: {e}");
                }
            }
            Directive::RubixGrid { numcells, cell_size, pad_size } => {
                self.set_rubix_grid(*numcells, *cell_size, *pad_size);
            }
            Directive::Fov(deg) => self.set_fov(*deg),
            Directive::VFov(deg) => self.set_vfov(*deg),
            Directive::Cover => self.set_cover(),
            Directive::Contain => self.set_contain(),
        }
    }

    /// Writes the session state as re-issuable directives, one per line.
    pub fn write_config<W: io::Write>(&self, w: &mut W) -> io::Result<()> {
        for d in self.config_directives() {
            writeln!(w, "{d}")?;
        }
        Ok(())
    }

    /// The directives that reproduce the current session state.
    pub fn config_directives(&self) -> Vec<Directive> {
        let mut out = Vec::new();
        if !self.lens.name.is_empty() {
            out.push(Directive::Lens(self.lens.name.clone()));
        }
        if !self.globe.name.is_empty() {
            out.push(Directive::Globe(self.globe.name.clone()));
        }
        out.push(Directive::RubixGrid {
            numcells: self.rubix.numcells,
            cell_size: self.rubix.cell_size,
            pad_size: self.rubix.pad_size,
        });
        match self.zoom.kind {
            ZoomKind::Fov => out.push(Directive::Fov(self.zoom.fov_deg)),
            ZoomKind::VFov => out.push(Directive::VFov(self.zoom.fov_deg)),
            ZoomKind::Cover => out.push(Directive::Cover),
            ZoomKind::Contain => out.push(Directive::Contain),
            ZoomKind::None => {}
        }
        out
    }

    /// Per-frame entry point.
    ///
    /// Tracks the viewport size, reallocates capture/lookup storage on
    /// resize, rebuilds the lookup table when the lens, globe, or zoom
    /// changed (resuming incrementally across frames), asks `host` to render
    /// every plate the current lens actually samples, and composites the
    /// finished portion of the table into `dest` at `rect`.
    pub fn render_view(
        &mut self,
        host: &mut dyn PlateSource,
        camera: &CameraBasis,
        dest: &mut Surface<'_>,
        rect: ViewRect,
    ) {
        let (w, h) = (rect.width, rect.height);
        let platesize = w.min(h);

        let resized = self.lens.width_px != w
            || self.lens.height_px != h
            || self.globe.platesize != platesize
            || self.globe.pixels.len() != platesize * platesize * self.globe.plates.len();
        if resized {
            // Not resumable: both allocations happen within this frame.
            self.lens.resize(w, h);
            self.globe.resize(platesize);
        }

        if resized || self.zoom.changed || self.lens.changed || self.globe.changed {
            self.lens.clear_table();

            // Re-evaluate the current lens script so variables derived from
            // the globe (e.g. a width depending on numplates) stay current.
            let numplates = self.globe.plates.len();
            match self.scripts.reload_lens(numplates) {
                Some(Ok(profile)) => {
                    self.adopt_lens_profile(profile);
                }
                Some(Err(e)) => {
                    log::warn!("not a valid lens: {e}");
                    self.lens.invalidate();
                }
                None => {}
            }

            self.start_build();
        } else if self.builder.is_working() {
            self.resume_build();
        }

        // Render every plate the lookup table samples.
        let displayed: Vec<usize> = self
            .globe
            .plates
            .iter()
            .enumerate()
            .filter(|(_, p)| p.display)
            .map(|(i, _)| i)
            .collect();
        for i in displayed {
            let plate = &self.globe.plates[i];
            let view = PlateView {
                fov: plate.fov,
                forward: camera.to_world(plate.forward),
                right: camera.to_world(plate.right),
                up: camera.to_world(plate.up),
                size: platesize,
            };
            host.render_plate(&view, self.globe.plate_region_mut(i));
        }

        self.composite(dest, rect.x, rect.y);

        self.lens.changed = false;
        self.globe.changed = false;
        self.zoom.changed = false;
    }

    /// Exports every plate of the globe as `<dir>/<name><index>.png`.
    ///
    /// Unless `with_margins` is set, texels the current lens cannot reach are
    /// masked out. Returns the written paths.
    pub fn export_globe(
        &mut self,
        dir: &Path,
        name: &str,
        with_margins: bool,
    ) -> Result<Vec<PathBuf>, ExportError> {
        let mut paths = Vec::new();
        for i in 0..self.globe.plates.len() {
            let path = dir.join(format!("{name}{i}.png"));
            export::save_plate_png(
                &self.globe,
                &mut self.scripts,
                &self.base_palette,
                i,
                with_margins,
                &path,
            )?;
            paths.push(path);
        }
        Ok(paths)
    }

    /// Starts a fresh lookup-table build, discarding any build in progress.
    fn start_build(&mut self) {
        self.builder = LensBuilder::Idle;

        // Render nothing while either descriptor is invalid; the cleared
        // table maps no pixels.
        if !self.lens.valid || !self.globe.valid {
            return;
        }

        if let Err(e) = zoom::calc_zoom(&mut self.lens, &self.zoom, &mut self.scripts) {
            log::warn!("this lens could not be initialized: {e}");
            return;
        }

        for plate in &mut self.globe.plates {
            plate.display = false;
        }

        let mut ctx = BuildContext {
            lens: &mut self.lens,
            globe: &mut self.globe,
            maps: &mut self.scripts,
            rubix: &self.rubix,
        };
        self.builder.start(&mut ctx, self.budget);
    }

    fn resume_build(&mut self) {
        let mut ctx = BuildContext {
            lens: &mut self.lens,
            globe: &mut self.globe,
            maps: &mut self.scripts,
            rubix: &self.rubix,
        };
        self.builder.step(&mut ctx, self.budget);
    }

    /// Copies captured plate pixels into `dest` through the lookup table.
    ///
    /// Unmapped pixels (table entry 0) are left untouched; the host clears
    /// the background. With the rubix overlay enabled, tinted pixels are
    /// remapped through their plate's tint palette.
    pub fn composite(&self, dest: &mut Surface<'_>, ox: usize, oy: usize) {
        let (w, h) = (self.lens.width_px, self.lens.height_px);
        for y in 0..h {
            let src_row = y * w;
            let dst_row = (oy + y) * dest.stride + ox;
            for x in 0..w {
                let entry = self.lens.pixels[src_row + x] as usize;
                if entry == 0 {
                    continue;
                }
                let Some(&color) = self.globe.pixels.get(entry) else {
                    continue;
                };
                let color = if self.rubix.enabled {
                    match self.lens.tints[src_row + x] {
                        NO_TINT => color,
                        tint => self.globe.plates[tint as usize].palette[color as usize],
                    }
                } else {
                    color
                };
                if let Some(px) = dest.pixels.get_mut(dst_row + x) {
                    *px = color;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FlatHost(u8);

    impl PlateSource for FlatHost {
        fn render_plate(&mut self, _view: &PlateView, out: &mut [u8]) {
            out.fill(self.0);
        }
    }

    fn camera() -> CameraBasis {
        CameraBasis {
            forward: Vector3::new(0.0, 0.0, 1.0),
            right: Vector3::new(1.0, 0.0, 0.0),
            up: Vector3::new(0.0, 1.0, 0.0),
        }
    }

    const GLOBE_SRC: &str = r#"
        let plates = [
            [[0.0, 0.0, 1.0], [0.0, 1.0, 0.0], 120.0],
        ];
    "#;

    const LENS_SRC: &str = r#"
        let max_fov = 120;
        let max_vfov = 120;

        fn lens_inverse(x, y) {
            [x, y, 0.5]
        }

        fn lens_forward(rx, ry, rz) {
            if rz <= 0.0 {
                return ();
            }
            [rx / rz * 0.5, ry / rz * 0.5]
        }
    "#;

    #[test]
    fn end_to_end_inverse_session() {
        let mut session = LensRenderer::new("scripts");
        session.load_globe_source("one", GLOBE_SRC).unwrap();
        session.load_lens_source("rect", LENS_SRC).unwrap();
        session.set_fov(90);
        // Unbounded slice so the build finishes within the first frame.
        session.set_frame_budget(Duration::from_secs(3600));

        let (w, h) = (32usize, 32usize);
        let mut fb = vec![0u8; w * h];
        let rect = ViewRect { x: 0, y: 0, width: w, height: h };

        // The first frame builds the table and renders the plates it marked
        // displayed; the second frame composites from settled state.
        for _ in 0..2 {
            let mut dest = Surface { pixels: &mut fb, stride: w };
            session.render_view(&mut FlatHost(7), &camera(), &mut dest, rect);
        }
        assert!(!session.building());
        assert!(session.globe.plates[0].display);

        let lit = fb.iter().filter(|&&p| p == 7).count();
        assert!(lit > w * h / 2, "expected most pixels mapped, got {lit}");
    }

    #[test]
    fn config_round_trips_through_directives() {
        let mut session = LensRenderer::new("scripts");
        session.set_rubix_grid(8, 3.0, 2.0);
        session.set_fov(150);

        let mut buf = Vec::new();
        session.write_config(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();

        let directives = config::parse_config(&text).unwrap();
        let mut other = LensRenderer::new("scripts");
        for d in &directives {
            other.apply(d);
        }
        assert_eq!(other.rubix.numcells, 8);
        assert_eq!(other.zoom.kind, ZoomKind::Fov);
        assert_eq!(other.zoom.fov_deg, 150);
    }
}
