//! Plain-text persisted configuration.
//!
//! Session state is saved as a sequence of re-issuable directives, one per
//! line, and restored by parsing and applying the same lines (see
//! [`crate::LensRenderer::apply`]). Lens `onload` strings use the same
//! directive grammar.

use std::fmt;
use std::str::FromStr;

/// One configuration line.
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    /// Load a lens script by name.
    Lens(String),
    /// Load a globe script by name.
    Globe(String),
    /// Set the calibration grid geometry.
    RubixGrid { numcells: u32, cell_size: f64, pad_size: f64 },
    /// Request a horizontal field of view, degrees.
    Fov(u32),
    /// Request a vertical field of view, degrees.
    VFov(u32),
    /// Scale the lens to cover the output.
    Cover,
    /// Scale the lens to fit inside the output.
    Contain,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum DirectiveError {
    #[error("unknown directive: {0}")]
    Unknown(String),
    #[error("{0}: bad or missing arguments")]
    BadArguments(String),
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lens(name) => write!(f, "lens \"{name}\""),
            Self::Globe(name) => write!(f, "globe \"{name}\""),
            Self::RubixGrid { numcells, cell_size, pad_size } => {
                write!(f, "rubixgrid {numcells} {cell_size} {pad_size}")
            }
            Self::Fov(deg) => write!(f, "fov {deg}"),
            Self::VFov(deg) => write!(f, "vfov {deg}"),
            Self::Cover => write!(f, "cover"),
            Self::Contain => write!(f, "contain"),
        }
    }
}

impl FromStr for Directive {
    type Err = DirectiveError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let head = words.next().ok_or_else(|| DirectiveError::Unknown(String::new()))?;
        let rest: Vec<&str> = words.collect();

        let bad = || DirectiveError::BadArguments(head.to_owned());

        match head {
            "lens" => Ok(Self::Lens(unquote(rest.first().ok_or_else(bad)?))),
            "globe" => Ok(Self::Globe(unquote(rest.first().ok_or_else(bad)?))),
            "rubixgrid" => {
                if rest.len() != 3 {
                    return Err(bad());
                }
                Ok(Self::RubixGrid {
                    numcells: rest[0].parse().map_err(|_| bad())?,
                    cell_size: rest[1].parse().map_err(|_| bad())?,
                    pad_size: rest[2].parse().map_err(|_| bad())?,
                })
            }
            "fov" => Ok(Self::Fov(rest.first().ok_or_else(bad)?.parse().map_err(|_| bad())?)),
            "vfov" => Ok(Self::VFov(rest.first().ok_or_else(bad)?.parse().map_err(|_| bad())?)),
            "cover" => Ok(Self::Cover),
            "contain" => Ok(Self::Contain),
            other => Err(DirectiveError::Unknown(other.to_owned())),
        }
    }
}

fn unquote(word: &str) -> String {
    word.trim_matches('"').to_owned()
}

/// Parses a whole configuration file: one directive per line, blank lines and
/// `#` comments skipped.
pub fn parse_config(text: &str) -> Result<Vec<Directive>, DirectiveError> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::parse)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives_round_trip_through_text() {
        let directives = vec![
            Directive::Lens("panini".into()),
            Directive::Globe("cube".into()),
            Directive::RubixGrid { numcells: 10, cell_size: 4.0, pad_size: 1.0 },
            Directive::Fov(180),
            Directive::VFov(90),
            Directive::Cover,
            Directive::Contain,
        ];
        for d in directives {
            let line = d.to_string();
            assert_eq!(line.parse::<Directive>().unwrap(), d, "line was {line:?}");
        }
    }

    #[test]
    fn whole_files_parse_with_comments_and_blanks() {
        let text = "# saved session\n\nlens \"stereographic\"\nglobe \"cube\"\nfov 170\n";
        let parsed = parse_config(text).unwrap();
        assert_eq!(
            parsed,
            vec![
                Directive::Lens("stereographic".into()),
                Directive::Globe("cube".into()),
                Directive::Fov(170),
            ]
        );
    }

    #[test]
    fn unknown_and_malformed_lines_are_rejected() {
        assert_eq!(
            "warp 9".parse::<Directive>(),
            Err(DirectiveError::Unknown("warp".into()))
        );
        assert_eq!(
            "fov many".parse::<Directive>(),
            Err(DirectiveError::BadArguments("fov".into()))
        );
        assert_eq!(
            "rubixgrid 1 2".parse::<Directive>(),
            Err(DirectiveError::BadArguments("rubixgrid".into()))
        );
    }
}
