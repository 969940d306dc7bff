// config.rs — Tiling search configuration
//
// `TilingConfig` bundles the candidate policy and the backend (Triton)
// constraints used by `SymbolicTileAnalysis::good_triton_tilings`. It is
// serde-serializable so it can be loaded from a JSON file and overridden by
// CLI flags.
//
// Preconditions: none.
// Postconditions: `load` returns a fully defaulted config (missing JSON
//                 fields take their default values).
// Failure modes: unreadable files and malformed JSON produce `ConfigError`.
// Side effects: `load` reads the file system.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::search::CandidatePolicy;

/// Tile shapes the block-tiled code generator accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TritonConstraints {
    /// A size equal to the full node extent is allowed even when it is not a
    /// power of two.
    pub allow_full_dimension: bool,
    /// Upper bound on the elements of one tile, sizes padded to powers of two.
    pub max_tile_elements: Option<i64>,
}

impl Default for TritonConstraints {
    fn default() -> Self {
        TritonConstraints {
            allow_full_dimension: true,
            max_tile_elements: Some(1 << 20),
        }
    }
}

impl TritonConstraints {
    /// Check one concrete tile against its node extents.
    pub fn accepts(&self, sizes: &[i64], extents: &[i64]) -> bool {
        let mut padded: i64 = 1;
        for (&size, &extent) in sizes.iter().zip(extents) {
            if size < 1 {
                return false;
            }
            let full = self.allow_full_dimension && size == extent;
            if !full && !is_power_of_two(size) {
                return false;
            }
            padded = match padded.checked_mul(next_power_of_two(size)) {
                Some(p) => p,
                None => return false,
            };
        }
        self.max_tile_elements.map_or(true, |max| padded <= max)
    }
}

fn is_power_of_two(v: i64) -> bool {
    v > 0 && v & (v - 1) == 0
}

fn next_power_of_two(v: i64) -> i64 {
    let mut p = 1i64;
    while p < v {
        match p.checked_mul(2) {
            Some(next) => p = next,
            None => return i64::MAX,
        }
    }
    p
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TilingConfig {
    pub candidates: CandidatePolicy,
    pub triton: TritonConstraints,
}

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, source } => write!(f, "{}: {}", path.display(), source),
            ConfigError::Parse { path, source } => {
                write!(f, "{}: invalid config: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl TilingConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_json(&text).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = TilingConfig::default();
        assert_eq!(c.candidates, CandidatePolicy::PowersOfTwo);
        assert!(c.triton.allow_full_dimension);
        assert_eq!(c.triton.max_tile_elements, Some(1_048_576));
    }

    #[test]
    fn json_fields_are_optional() {
        let c = TilingConfig::from_json(r#"{"candidates": {"kind": "multiples_of", "step": 16}}"#)
            .unwrap();
        assert_eq!(c.candidates, CandidatePolicy::MultiplesOf { step: 16 });
        assert_eq!(c.triton, TritonConstraints::default());

        let c = TilingConfig::from_json(r#"{"triton": {"max_tile_elements": null}}"#).unwrap();
        assert_eq!(c.triton.max_tile_elements, None);
        assert!(c.triton.allow_full_dimension);
    }

    #[test]
    fn json_round_trip() {
        let c = TilingConfig {
            candidates: CandidatePolicy::Divisors,
            triton: TritonConstraints {
                allow_full_dimension: false,
                max_tile_elements: Some(4096),
            },
        };
        let text = serde_json::to_string(&c).unwrap();
        assert_eq!(TilingConfig::from_json(&text).unwrap(), c);
    }

    #[test]
    fn malformed_json_is_rejected() {
        assert!(TilingConfig::from_json(r#"{"candidates": {"kind": "primes"}}"#).is_err());
    }

    #[test]
    fn missing_file_reports_path() {
        let err = TilingConfig::load(Path::new("/nonexistent/symtile.json")).unwrap_err();
        assert!(err.to_string().starts_with("/nonexistent/symtile.json"));
    }

    #[test]
    fn triton_power_of_two_rule() {
        let t = TritonConstraints::default();
        assert!(t.accepts(&[16, 32], &[128, 64]));
        assert!(t.accepts(&[10], &[10]));
        assert!(!t.accepts(&[10], &[20]));
        let strict = TritonConstraints {
            allow_full_dimension: false,
            ..t
        };
        assert!(!strict.accepts(&[10], &[10]));
    }

    #[test]
    fn triton_element_budget_uses_padded_sizes() {
        let t = TritonConstraints {
            allow_full_dimension: true,
            max_tile_elements: Some(200),
        };
        assert!(t.accepts(&[8, 16], &[64, 64]));
        assert!(!t.accepts(&[10, 16], &[10, 64]));
        assert!(!t.accepts(&[16, 16], &[64, 64]));
    }
}
