//! The rhai scripting host supplying lens and globe definitions.
//!
//! A **lens script** (`<root>/lenses/<name>.rhai`) may define:
//!
//! - `fn lens_inverse(x, y)` — screen coordinate to view ray, returning
//!   `[rx, ry, rz]`, or `()` when the coordinate has no preimage;
//! - `fn lens_forward(rx, ry, rz)` — view ray to screen coordinate, returning
//!   `[x, y]` or `()`;
//! - `let map = "lens_inverse" | "lens_forward"` — which mapping drives the
//!   build when both exist;
//! - calibration constants `max_fov`, `max_vfov`, `lens_width`,
//!   `lens_height`, and an `onload` directive string.
//!
//! A **globe script** (`<root>/globes/<name>.rhai`) defines `plates`, an
//! array of `[[fx,fy,fz], [ux,uy,uz], fov_degrees]` entries, and optionally
//! `fn globe_plate(rx, ry, rz)` overriding plate selection.
//!
//! Scripts can reach the geometry kernel through the registered
//! `latlon_to_ray`, `ray_to_latlon`, and `plate_to_ray` functions, and lens
//! scripts see the current plate count as the `numplates` constant.
//!
//! Any script function may return an array of the expected arity (success),
//! `()` ("no value": the pixel is skipped), or anything else — a nonsensical
//! value that aborts the build in progress.

use rhai::{Array, Dynamic, Engine, Scope, AST};

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

use crate::globe::{Plate, MAX_PLATES};
use crate::lens::MapKind;
use crate::{geom, MapResult, Mappings, NonsenseValue, Vector2, Vector3};

/// Rejection reasons for a lens or globe load. The previous script, if any,
/// is discarded before the new one is evaluated, so a failed load always
/// leaves the slot empty rather than half-updated.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("could not read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("script error: {0}")]
    Script(String),
    #[error("unsupported map function: {0}")]
    UnknownMapPreference(String),
    #[error("plates must be an array of one or more plate definitions")]
    NoPlates,
    #[error("too many plates: {0}, the rig supports {MAX_PLATES}")]
    TooManyPlates(usize),
    #[error("plate {index}: {reason}")]
    BadPlate { index: usize, reason: String },
}

/// What a lens script declared about itself.
#[derive(Debug, Clone, Default)]
pub struct LensProfile {
    pub kind: MapKind,
    /// Maximum supported horizontal FOV, degrees; 0 = uncalibrated.
    pub max_fov: u32,
    /// Maximum supported vertical FOV, degrees; 0 = uncalibrated.
    pub max_vfov: u32,
    /// Logical lens width in projection units; 0 = unspecified.
    pub width: f64,
    /// Logical lens height in projection units; 0 = unspecified.
    pub height: f64,
    /// Directive string to apply after loading, e.g. `fov 180`.
    pub onload: Option<String>,
}

struct LoadedLens {
    source: String,
    ast: AST,
    scope: Scope<'static>,
    has_inverse: bool,
    has_forward: bool,
}

struct LoadedGlobe {
    ast: AST,
    scope: Scope<'static>,
    has_plate_select: bool,
}

/// Owns the rhai engine and the currently loaded lens/globe scripts, and
/// exposes their functions as [`Mappings`] slots.
pub struct ScriptHost {
    engine: Engine,
    root: PathBuf,
    /// Plate bases shared with the `plate_to_ray` script function.
    plates: Rc<RefCell<Vec<Plate>>>,
    lens: Option<LoadedLens>,
    globe: Option<LoadedGlobe>,
}

impl ScriptHost {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let plates: Rc<RefCell<Vec<Plate>>> = Rc::new(RefCell::new(Vec::new()));
        Self {
            engine: build_engine(plates.clone()),
            root: root.into(),
            plates,
            lens: None,
            globe: None,
        }
    }

    /// Loads `<root>/lenses/<name>.rhai`.
    pub fn load_lens(&mut self, name: &str, numplates: usize) -> Result<LensProfile, LoadError> {
        let path = self.root.join("lenses").join(format!("{name}.rhai"));
        let source =
            std::fs::read_to_string(&path).map_err(|source| LoadError::Io { path, source })?;
        self.load_lens_source(&source, numplates)
    }

    /// Loads a lens from script source text.
    pub fn load_lens_source(
        &mut self,
        source: &str,
        numplates: usize,
    ) -> Result<LensProfile, LoadError> {
        self.lens = None;

        let mut scope = Scope::new();
        scope.push_constant("numplates", numplates as i64);

        let mut ast = self
            .engine
            .compile_with_scope(&scope, source)
            .map_err(|e| LoadError::Script(e.to_string()))?;
        self.engine
            .run_ast_with_scope(&mut scope, &ast)
            .map_err(|e| LoadError::Script(e.to_string()))?;
        // Only the function definitions are needed from here on; dropping the
        // statements keeps per-pixel calls from re-declaring script globals.
        ast.clear_statements();

        let has_inverse = has_fn(&ast, "lens_inverse", 2);
        let has_forward = has_fn(&ast, "lens_forward", 3);

        let mut kind = if has_inverse {
            MapKind::Inverse
        } else if has_forward {
            MapKind::Forward
        } else {
            MapKind::None
        };
        if let Some(pref) = string_var(&scope, "map") {
            kind = match pref.as_str() {
                "lens_inverse" => MapKind::Inverse,
                "lens_forward" => MapKind::Forward,
                _ => return Err(LoadError::UnknownMapPreference(pref)),
            };
        }

        let profile = LensProfile {
            kind,
            max_fov: scalar_var(&scope, "max_fov").unwrap_or(0.0).max(0.0) as u32,
            max_vfov: scalar_var(&scope, "max_vfov").unwrap_or(0.0).max(0.0) as u32,
            width: scalar_var(&scope, "lens_width").unwrap_or(0.0),
            height: scalar_var(&scope, "lens_height").unwrap_or(0.0),
            onload: string_var(&scope, "onload"),
        };

        self.lens = Some(LoadedLens {
            source: source.to_owned(),
            ast,
            scope,
            has_inverse,
            has_forward,
        });
        Ok(profile)
    }

    /// Re-evaluates the current lens script, if any. Used when the globe
    /// changes so lens variables derived from `numplates` stay current.
    pub fn reload_lens(&mut self, numplates: usize) -> Option<Result<LensProfile, LoadError>> {
        let source = self.lens.as_ref()?.source.clone();
        Some(self.load_lens_source(&source, numplates))
    }

    /// Loads `<root>/globes/<name>.rhai`.
    pub fn load_globe(&mut self, name: &str) -> Result<Vec<Plate>, LoadError> {
        let path = self.root.join("globes").join(format!("{name}.rhai"));
        let source =
            std::fs::read_to_string(&path).map_err(|source| LoadError::Io { path, source })?;
        self.load_globe_source(&source)
    }

    /// Loads a globe from script source text, returning its plates.
    pub fn load_globe_source(&mut self, source: &str) -> Result<Vec<Plate>, LoadError> {
        self.globe = None;
        self.plates.borrow_mut().clear();

        let mut scope = Scope::new();
        let mut ast = self
            .engine
            .compile_with_scope(&scope, source)
            .map_err(|e| LoadError::Script(e.to_string()))?;
        self.engine
            .run_ast_with_scope(&mut scope, &ast)
            .map_err(|e| LoadError::Script(e.to_string()))?;
        ast.clear_statements();

        let has_plate_select = has_fn(&ast, "globe_plate", 3);

        let defs = scope
            .get_value::<Dynamic>("plates")
            .and_then(|d| d.try_cast::<Array>())
            .ok_or(LoadError::NoPlates)?;
        if defs.is_empty() {
            return Err(LoadError::NoPlates);
        }
        if defs.len() > MAX_PLATES {
            return Err(LoadError::TooManyPlates(defs.len()));
        }

        let mut plates = Vec::with_capacity(defs.len());
        for (index, def) in defs.into_iter().enumerate() {
            let plate =
                parse_plate(def).map_err(|reason| LoadError::BadPlate { index, reason })?;
            plates.push(plate);
        }

        *self.plates.borrow_mut() = plates.clone();
        self.globe = Some(LoadedGlobe { ast, scope, has_plate_select });
        Ok(plates)
    }
}

impl Mappings for ScriptHost {
    fn has_inverse(&self) -> bool {
        self.lens.as_ref().map_or(false, |l| l.has_inverse)
    }

    fn has_forward(&self) -> bool {
        self.lens.as_ref().map_or(false, |l| l.has_forward)
    }

    fn has_plate_select(&self) -> bool {
        self.globe.as_ref().map_or(false, |g| g.has_plate_select)
    }

    fn inverse(&mut self, x: f64, y: f64) -> MapResult<Vector3> {
        let Some(lens) = self.lens.as_mut().filter(|l| l.has_inverse) else {
            return Err(NonsenseValue("lens_inverse is not supplied".into()));
        };
        let out = self
            .engine
            .call_fn::<Dynamic>(&mut lens.scope, &lens.ast, "lens_inverse", (x, y))
            .map_err(|e| NonsenseValue(format!("lens_inverse: {e}")))?;
        let Some(parts) = numbers(out, "lens_inverse", 3)? else {
            return Ok(None);
        };
        Ok(Some(Vector3::new(parts[0], parts[1], parts[2])))
    }

    fn forward(&mut self, ray: Vector3) -> MapResult<Vector2> {
        let Some(lens) = self.lens.as_mut().filter(|l| l.has_forward) else {
            return Err(NonsenseValue("lens_forward is not supplied".into()));
        };
        let out = self
            .engine
            .call_fn::<Dynamic>(
                &mut lens.scope,
                &lens.ast,
                "lens_forward",
                (ray.x, ray.y, ray.z),
            )
            .map_err(|e| NonsenseValue(format!("lens_forward: {e}")))?;
        let Some(parts) = numbers(out, "lens_forward", 2)? else {
            return Ok(None);
        };
        Ok(Some(Vector2::new(parts[0], parts[1])))
    }

    fn plate_select(&mut self, ray: Vector3) -> MapResult<usize> {
        let Some(globe) = self.globe.as_mut().filter(|g| g.has_plate_select) else {
            return Err(NonsenseValue("globe_plate is not supplied".into()));
        };
        let out = self
            .engine
            .call_fn::<Dynamic>(
                &mut globe.scope,
                &globe.ast,
                "globe_plate",
                (ray.x, ray.y, ray.z),
            )
            .map_err(|e| NonsenseValue(format!("globe_plate: {e}")))?;
        if out.is::<()>() {
            return Ok(None);
        }
        match out.as_int() {
            Ok(i) if i >= 0 => Ok(Some(i as usize)),
            Ok(i) => Err(NonsenseValue(format!(
                "globe_plate returned a negative plate index ({i})"
            ))),
            Err(_) => Err(NonsenseValue(
                "globe_plate returned a non-integer value".into(),
            )),
        }
    }
}

fn build_engine(plates: Rc<RefCell<Vec<Plate>>>) -> Engine {
    let mut engine = Engine::new();
    engine
        .register_fn("latlon_to_ray", |lat: f64, lon: f64| -> Array {
            let ray = geom::latlon_to_ray(lat, lon);
            vec![
                Dynamic::from(ray.x),
                Dynamic::from(ray.y),
                Dynamic::from(ray.z),
            ]
        })
        .register_fn("ray_to_latlon", |rx: f64, ry: f64, rz: f64| -> Array {
            let (lat, lon) = geom::ray_to_latlon(Vector3::new(rx, ry, rz));
            vec![Dynamic::from(lat), Dynamic::from(lon)]
        })
        .register_fn("plate_to_ray", move |plate: i64, u: f64, v: f64| -> Dynamic {
            let plates = plates.borrow();
            if plate < 0 || plate as usize >= plates.len() {
                return Dynamic::UNIT;
            }
            let ray = geom::plate_uv_to_ray(&plates[plate as usize], Vector2::new(u, v));
            Dynamic::from_array(vec![
                Dynamic::from(ray.x),
                Dynamic::from(ray.y),
                Dynamic::from(ray.z),
            ])
        });
    engine
}

fn has_fn(ast: &AST, name: &str, params: usize) -> bool {
    ast.iter_functions()
        .any(|f| f.name == name && f.params.len() == params)
}

/// A numeric script variable, accepting either float or int.
fn scalar_var(scope: &Scope, name: &str) -> Option<f64> {
    scope.get_value::<Dynamic>(name).and_then(|d| number(&d))
}

fn string_var(scope: &Scope, name: &str) -> Option<String> {
    scope
        .get_value::<Dynamic>(name)
        .and_then(|d| d.into_string().ok())
}

fn number(value: &Dynamic) -> Option<f64> {
    value
        .as_float()
        .ok()
        .or_else(|| value.as_int().ok().map(|i| i as f64))
}

/// Interprets a mapping's return value: `()` is "no value", an array of
/// `arity` numbers is a result, anything else is nonsensical.
fn numbers(value: Dynamic, what: &str, arity: usize) -> MapResult<Vec<f64>> {
    if value.is::<()>() {
        return Ok(None);
    }
    let Some(parts) = value.try_cast::<Array>() else {
        return Err(NonsenseValue(format!(
            "{what} returned a single non-array value"
        )));
    };
    if parts.len() != arity {
        return Err(NonsenseValue(format!(
            "{what} returned {} values instead of {arity}",
            parts.len()
        )));
    }
    let nums: Option<Vec<f64>> = parts.iter().map(number).collect();
    match nums {
        Some(nums) => Ok(Some(nums)),
        None => Err(NonsenseValue(format!(
            "{what} returned a non-number value"
        ))),
    }
}

fn parse_plate(def: Dynamic) -> Result<Plate, String> {
    let parts = def
        .try_cast::<Array>()
        .ok_or("not an array of [forward, up, fov]")?;
    if parts.len() != 3 {
        return Err(format!("expected 3 elements, found {}", parts.len()));
    }
    let forward = vector3(&parts[0]).ok_or("forward vector is not a 3d vector")?;
    let up = vector3(&parts[1]).ok_or("up vector is not a 3d vector")?;
    let fov_deg = number(&parts[2]).ok_or("fov is not a number")?;
    Plate::new(forward, up, fov_deg.to_radians()).map_err(|e| e.to_string())
}

fn vector3(value: &Dynamic) -> Option<Vector3> {
    let parts = value.clone().try_cast::<Array>()?;
    if parts.len() != 3 {
        return None;
    }
    Some(Vector3::new(
        number(&parts[0])?,
        number(&parts[1])?,
        number(&parts[2])?,
    ))
}
