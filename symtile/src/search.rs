// search.rs — Tile-size search
//
// Enumerates candidate tile-size vectors for a root shape and keeps those
// accepted by a validity predicate. Candidates per dimension come from a
// `CandidatePolicy`; the full dimension size is always a candidate.
//
// Preconditions: every dimension size is positive.
// Postconditions: returned tilings are in lexicographic order of candidate
//                 positions, first dimension outermost.
// Failure modes: `try_good_tilings` stops at the first predicate error.
// Side effects: none.

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// One concrete tile size per root dimension.
pub type Tiling = SmallVec<[i64; 4]>;

/// Which tile sizes are tried along one dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CandidatePolicy {
    /// `1, 2, 4, ...` up to the dimension size.
    #[default]
    PowersOfTwo,
    /// `step, 2 * step, ...` up to the dimension size.
    MultiplesOf { step: i64 },
    /// Every exact divisor of the dimension size.
    Divisors,
}

impl CandidatePolicy {
    /// Ascending, deduplicated candidates for a dimension of size `dim`.
    pub fn candidates(&self, dim: i64) -> Vec<i64> {
        if dim < 1 {
            return Vec::new();
        }
        let mut out = match *self {
            CandidatePolicy::PowersOfTwo => {
                let mut v = Vec::new();
                let mut p = 1i64;
                while p <= dim {
                    v.push(p);
                    match p.checked_mul(2) {
                        Some(next) => p = next,
                        None => break,
                    }
                }
                v
            }
            CandidatePolicy::MultiplesOf { step } => {
                let step = step.max(1);
                (1..=dim / step).map(|k| k * step).collect()
            }
            CandidatePolicy::Divisors => {
                let mut small = Vec::new();
                let mut large = Vec::new();
                let mut d = 1i64;
                while d.saturating_mul(d) <= dim {
                    if dim % d == 0 {
                        small.push(d);
                        if d != dim / d {
                            large.push(dim / d);
                        }
                    }
                    d += 1;
                }
                small.extend(large.into_iter().rev());
                small
            }
        };
        out.push(dim);
        out.sort_unstable();
        out.dedup();
        out
    }
}

impl fmt::Display for CandidatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CandidatePolicy::PowersOfTwo => write!(f, "pow2"),
            CandidatePolicy::MultiplesOf { step } => write!(f, "multiples:{}", step),
            CandidatePolicy::Divisors => write!(f, "divisors"),
        }
    }
}

/// Accepts `pow2`, `divisors` and `multiples:N` (N >= 1).
impl FromStr for CandidatePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pow2" | "powers_of_two" => Ok(CandidatePolicy::PowersOfTwo),
            "divisors" => Ok(CandidatePolicy::Divisors),
            _ => {
                let step = s
                    .strip_prefix("multiples:")
                    .ok_or_else(|| format!("unknown candidate policy '{}'", s))?;
                match step.parse::<i64>() {
                    Ok(step) if step >= 1 => Ok(CandidatePolicy::MultiplesOf { step }),
                    _ => Err(format!("invalid step '{}' (expected a positive integer)", step)),
                }
            }
        }
    }
}

/// All tilings over the policy's candidates that `is_valid` accepts.
pub fn good_tilings<F>(dim_sizes: &[i64], policy: &CandidatePolicy, mut is_valid: F) -> Vec<Tiling>
where
    F: FnMut(&[i64]) -> bool,
{
    let result: Result<Vec<Tiling>, Infallible> =
        try_good_tilings(dim_sizes, policy, |t| Ok(is_valid(t)));
    match result {
        Ok(tilings) => tilings,
        Err(never) => match never {},
    }
}

/// Like `good_tilings`, but the predicate may fail; the first failure aborts
/// the search.
pub fn try_good_tilings<E, F>(
    dim_sizes: &[i64],
    policy: &CandidatePolicy,
    mut is_valid: F,
) -> Result<Vec<Tiling>, E>
where
    F: FnMut(&[i64]) -> Result<bool, E>,
{
    let candidates: Vec<Vec<i64>> = dim_sizes.iter().map(|&d| policy.candidates(d)).collect();
    if candidates.iter().any(|c| c.is_empty()) {
        return Ok(Vec::new());
    }

    let mut found = Vec::new();
    let mut positions = vec![0usize; candidates.len()];
    loop {
        let tiling: Tiling = positions
            .iter()
            .zip(&candidates)
            .map(|(&p, c)| c[p])
            .collect();
        if is_valid(&tiling)? {
            found.push(tiling);
        }

        // Odometer step: the last dimension varies fastest.
        let mut k = positions.len();
        loop {
            if k == 0 {
                return Ok(found);
            }
            k -= 1;
            positions[k] += 1;
            if positions[k] < candidates[k].len() {
                break;
            }
            positions[k] = 0;
        }
    }
}
