//! Global tile placement from pairwise shift measurements.
//!
//! Registration produces one displacement measurement per adjacent tile
//! pair. Placement turns those into absolute positions by minimizing
//! `Σ score · ((p_b − p_a) − d_ab)²` with the first tile anchored at the
//! origin. The three coordinate axes decouple, so each is a small symmetric
//! positive-definite system solved independently by the selected backend.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Grid axis a tile pair straddles.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Axis {
    /// Tile `b` lies to the right of tile `a`.
    Horizontal,
    /// Tile `b` lies below tile `a`.
    Vertical,
}

/// Measured displacement of tile `b`'s origin relative to tile `a`'s origin.
#[derive(Clone, Debug)]
pub struct PairShift {
    /// Index of the reference tile.
    pub a: usize,
    /// Index of the displaced tile.
    pub b: usize,
    /// Which grid axis the pair straddles.
    pub axis: Axis,
    /// Displacement along X, in pixels.
    pub dx: f32,
    /// Displacement along Y, in pixels.
    pub dy: f32,
    /// Displacement along Z, in frames.
    pub dz: f32,
    /// NCC score of the measurement, used as its weight.
    pub score: f32,
}

/// String identifiers accepted by [`Solver::from_str`].
pub const SOLVER_NAMES: [&str; 3] = ["cholesky", "cg", "gauss-seidel"];

/// Backend used to solve the placement normal equations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Solver {
    /// Dense LLᵀ factorization. Exact, the default.
    #[default]
    Cholesky,
    /// Conjugate gradient iteration.
    ConjugateGradient,
    /// Gauss-Seidel sweeps.
    GaussSeidel,
}

/// Requested solver identifier is not in the allow-list.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("solver not found: '{requested}' (valid solvers: cholesky, cg, gauss-seidel)")]
pub struct SolverNotFound {
    /// The identifier that was requested.
    pub requested: String,
}

impl FromStr for Solver {
    type Err = SolverNotFound;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cholesky" => Ok(Self::Cholesky),
            "cg" => Ok(Self::ConjugateGradient),
            "gauss-seidel" => Ok(Self::GaussSeidel),
            other => Err(SolverNotFound {
                requested: other.to_owned(),
            }),
        }
    }
}

impl fmt::Display for Solver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Cholesky => "cholesky",
            Self::ConjugateGradient => "cg",
            Self::GaussSeidel => "gauss-seidel",
        };
        f.write_str(name)
    }
}

/// Placement failure.
#[derive(Debug, Error)]
pub enum PlacementError {
    /// A shift references a tile index outside the tile list.
    #[error("tile index {index} out of range for {n_tiles} tiles")]
    TileOutOfRange {
        /// Offending index.
        index: usize,
        /// Number of tiles in the problem.
        n_tiles: usize,
    },
    /// A shift pairs a tile with itself.
    #[error("pair references tile {index} twice")]
    SelfPair {
        /// Offending index.
        index: usize,
    },
    /// A shift carries a NaN or infinite component.
    #[error("non-finite shift measurement between tiles {a} and {b}")]
    NonFinite {
        /// Reference tile of the bad measurement.
        a: usize,
        /// Displaced tile of the bad measurement.
        b: usize,
    },
    /// The pair graph does not connect every tile; the system is singular.
    #[error("tile graph is not connected: {connected} of {n_tiles} tiles reachable from tile 0")]
    Disconnected {
        /// Tiles reachable from tile 0.
        connected: usize,
        /// Number of tiles in the problem.
        n_tiles: usize,
    },
    /// The normal matrix lost positive definiteness during factorization.
    #[error("normal matrix is not positive definite")]
    NotPositiveDefinite,
    /// An iterative backend ran out of iterations.
    #[error("{solver} did not converge after {iters} iterations (residual {residual:.3e})")]
    NotConverged {
        /// Backend that failed.
        solver: Solver,
        /// Iterations performed.
        iters: usize,
        /// Final residual norm.
        residual: f64,
    },
}

/// Floor applied to measurement scores so that weak (or slightly negative)
/// correlations still constrain the system instead of dropping out.
const MIN_WEIGHT: f64 = 1e-3;

const TOL: f64 = 1e-10;

/// Solve for absolute tile positions `[x, y, z]` from pairwise shifts.
///
/// Tile 0 is anchored at the origin during the solve; afterwards every axis
/// is translated so its minimum is 0. An empty problem yields an empty
/// vector, a single tile yields `[0, 0, 0]`.
pub fn solve_positions(
    n_tiles: usize,
    shifts: &[PairShift],
    solver: Solver,
) -> Result<Vec<[f32; 3]>, PlacementError> {
    if n_tiles == 0 {
        return Ok(Vec::new());
    }

    for s in shifts {
        for index in [s.a, s.b] {
            if index >= n_tiles {
                return Err(PlacementError::TileOutOfRange { index, n_tiles });
            }
        }
        if s.a == s.b {
            return Err(PlacementError::SelfPair { index: s.a });
        }
        if ![s.dx, s.dy, s.dz, s.score].iter().all(|v| v.is_finite()) {
            return Err(PlacementError::NonFinite { a: s.a, b: s.b });
        }
    }

    check_connected(n_tiles, shifts)?;

    let mut positions = vec![[0.0f32; 3]; n_tiles];
    if n_tiles == 1 {
        return Ok(positions);
    }

    // Reduced system over tiles 1..n (tile 0 anchored at 0).
    let dim = n_tiles - 1;
    for axis_idx in 0..3 {
        let mut mat = vec![0.0f64; dim * dim];
        let mut rhs = vec![0.0f64; dim];

        for s in shifts {
            let w = (s.score as f64).max(MIN_WEIGHT);
            let d = match axis_idx {
                0 => s.dx as f64,
                1 => s.dy as f64,
                _ => s.dz as f64,
            };

            // Equation p_b - p_a = d; variable k maps to tile k + 1.
            if s.a > 0 {
                let i = s.a - 1;
                mat[i * dim + i] += w;
                rhs[i] -= w * d;
            }
            if s.b > 0 {
                let j = s.b - 1;
                mat[j * dim + j] += w;
                rhs[j] += w * d;
            }
            if s.a > 0 && s.b > 0 {
                let i = s.a - 1;
                let j = s.b - 1;
                mat[i * dim + j] -= w;
                mat[j * dim + i] -= w;
            }
        }

        let x = match solver {
            Solver::Cholesky => cholesky_solve(&mut mat, &rhs, dim)?,
            Solver::ConjugateGradient => conjugate_gradient(&mat, &rhs, dim)?,
            Solver::GaussSeidel => gauss_seidel(&mat, &rhs, dim)?,
        };

        let mut min = 0.0f64;
        for &v in &x {
            if v < min {
                min = v;
            }
        }
        for (tile, &v) in x.iter().enumerate() {
            positions[tile + 1][axis_idx] = (v - min) as f32;
        }
        positions[0][axis_idx] = (-min) as f32;
    }

    Ok(positions)
}

fn check_connected(n_tiles: usize, shifts: &[PairShift]) -> Result<(), PlacementError> {
    let mut adj = vec![Vec::new(); n_tiles];
    for s in shifts {
        adj[s.a].push(s.b);
        adj[s.b].push(s.a);
    }

    let mut seen = vec![false; n_tiles];
    let mut stack = vec![0usize];
    seen[0] = true;
    let mut connected = 1usize;
    while let Some(t) = stack.pop() {
        for &next in &adj[t] {
            if !seen[next] {
                seen[next] = true;
                connected += 1;
                stack.push(next);
            }
        }
    }

    if connected != n_tiles {
        return Err(PlacementError::Disconnected { connected, n_tiles });
    }
    Ok(())
}

/// In-place dense LLᵀ factorization followed by forward/back substitution.
fn cholesky_solve(mat: &mut [f64], rhs: &[f64], dim: usize) -> Result<Vec<f64>, PlacementError> {
    for k in 0..dim {
        let mut diag = mat[k * dim + k];
        for j in 0..k {
            diag -= mat[k * dim + j] * mat[k * dim + j];
        }
        if diag <= 0.0 {
            return Err(PlacementError::NotPositiveDefinite);
        }
        let diag = diag.sqrt();
        mat[k * dim + k] = diag;

        for i in k + 1..dim {
            let mut v = mat[i * dim + k];
            for j in 0..k {
                v -= mat[i * dim + j] * mat[k * dim + j];
            }
            mat[i * dim + k] = v / diag;
        }
    }

    // L y = rhs
    let mut y = vec![0.0f64; dim];
    for i in 0..dim {
        let mut v = rhs[i];
        for j in 0..i {
            v -= mat[i * dim + j] * y[j];
        }
        y[i] = v / mat[i * dim + i];
    }

    // Lᵀ x = y
    let mut x = vec![0.0f64; dim];
    for i in (0..dim).rev() {
        let mut v = y[i];
        for j in i + 1..dim {
            v -= mat[j * dim + i] * x[j];
        }
        x[i] = v / mat[i * dim + i];
    }

    Ok(x)
}

fn matvec(mat: &[f64], x: &[f64], dim: usize) -> Vec<f64> {
    let mut out = vec![0.0f64; dim];
    for i in 0..dim {
        let row = &mat[i * dim..(i + 1) * dim];
        let mut acc = 0.0;
        for (a, b) in row.iter().zip(x.iter()) {
            acc += a * b;
        }
        out[i] = acc;
    }
    out
}

fn norm(v: &[f64]) -> f64 {
    v.iter().map(|a| a * a).sum::<f64>().sqrt()
}

fn conjugate_gradient(mat: &[f64], rhs: &[f64], dim: usize) -> Result<Vec<f64>, PlacementError> {
    let max_iters = 10 * dim + 100;
    let scale = norm(rhs).max(1.0);

    let mut x = vec![0.0f64; dim];
    let mut r = rhs.to_vec();
    let mut p = r.clone();
    let mut rs = r.iter().map(|v| v * v).sum::<f64>();

    for _ in 0..max_iters {
        if rs.sqrt() <= TOL * scale {
            return Ok(x);
        }
        let ap = matvec(mat, &p, dim);
        let p_ap: f64 = p.iter().zip(ap.iter()).map(|(a, b)| a * b).sum();
        if p_ap <= 0.0 {
            return Err(PlacementError::NotPositiveDefinite);
        }
        let alpha = rs / p_ap;
        for i in 0..dim {
            x[i] += alpha * p[i];
            r[i] -= alpha * ap[i];
        }
        let rs_next = r.iter().map(|v| v * v).sum::<f64>();
        let beta = rs_next / rs;
        for i in 0..dim {
            p[i] = r[i] + beta * p[i];
        }
        rs = rs_next;
    }

    if rs.sqrt() <= TOL * scale * 10.0 {
        return Ok(x);
    }
    Err(PlacementError::NotConverged {
        solver: Solver::ConjugateGradient,
        iters: max_iters,
        residual: rs.sqrt(),
    })
}

fn gauss_seidel(mat: &[f64], rhs: &[f64], dim: usize) -> Result<Vec<f64>, PlacementError> {
    let max_iters = 20_000;
    let scale = norm(rhs).max(1.0);
    let mut x = vec![0.0f64; dim];

    for _ in 0..max_iters {
        for i in 0..dim {
            let diag = mat[i * dim + i];
            if diag <= 0.0 {
                return Err(PlacementError::NotPositiveDefinite);
            }
            let mut acc = rhs[i];
            for j in 0..dim {
                if j != i {
                    acc -= mat[i * dim + j] * x[j];
                }
            }
            x[i] = acc / diag;
        }

        let ax = matvec(mat, &x, dim);
        let residual: f64 = ax
            .iter()
            .zip(rhs.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f64>()
            .sqrt();
        if residual <= TOL * scale {
            return Ok(x);
        }
    }

    let ax = matvec(mat, &x, dim);
    let residual: f64 = ax
        .iter()
        .zip(rhs.iter())
        .map(|(a, b)| (a - b) * (a - b))
        .sum::<f64>()
        .sqrt();
    Err(PlacementError::NotConverged {
        solver: Solver::GaussSeidel,
        iters: max_iters,
        residual,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shift(a: usize, b: usize, axis: Axis, dx: f32, dy: f32, score: f32) -> PairShift {
        PairShift {
            a,
            b,
            axis,
            dx,
            dy,
            dz: 0.0,
            score,
        }
    }

    #[test]
    fn solver_parse_accepts_known_names() {
        assert_eq!("cholesky".parse::<Solver>().unwrap(), Solver::Cholesky);
        assert_eq!("cg".parse::<Solver>().unwrap(), Solver::ConjugateGradient);
        assert_eq!(
            "gauss-seidel".parse::<Solver>().unwrap(),
            Solver::GaussSeidel
        );
    }

    #[test]
    fn solver_parse_reports_requested_and_valid_names() {
        let err = "ecos".parse::<Solver>().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("solver not found: 'ecos'"), "{msg}");
        for name in SOLVER_NAMES {
            assert!(msg.contains(name), "missing {name} in {msg}");
        }
    }

    #[test]
    fn chain_positions_accumulate() {
        let shifts = vec![
            shift(0, 1, Axis::Horizontal, 100.0, 2.0, 1.0),
            shift(1, 2, Axis::Horizontal, 100.0, -2.0, 1.0),
        ];
        for solver in [
            Solver::Cholesky,
            Solver::ConjugateGradient,
            Solver::GaussSeidel,
        ] {
            let pos = solve_positions(3, &shifts, solver).unwrap();
            assert!((pos[0][0] - 0.0).abs() < 1e-3, "{solver}: {pos:?}");
            assert!((pos[1][0] - 100.0).abs() < 1e-3, "{solver}: {pos:?}");
            assert!((pos[2][0] - 200.0).abs() < 1e-3, "{solver}: {pos:?}");
            // Y: 0, +2, back to 0; minimum already at zero.
            assert!((pos[0][1] - 0.0).abs() < 1e-3, "{solver}: {pos:?}");
            assert!((pos[1][1] - 2.0).abs() < 1e-3, "{solver}: {pos:?}");
            assert!((pos[2][1] - 0.0).abs() < 1e-3, "{solver}: {pos:?}");
        }
    }

    #[test]
    fn square_loop_is_consistent() {
        // 2x2 grid, indices row-major: 0 1 / 2 3.
        let shifts = vec![
            shift(0, 1, Axis::Horizontal, 90.0, 0.0, 1.0),
            shift(2, 3, Axis::Horizontal, 90.0, 0.0, 1.0),
            shift(0, 2, Axis::Vertical, 0.0, 70.0, 1.0),
            shift(1, 3, Axis::Vertical, 0.0, 70.0, 1.0),
        ];
        let pos = solve_positions(4, &shifts, Solver::Cholesky).unwrap();
        assert!((pos[3][0] - 90.0).abs() < 1e-3);
        assert!((pos[3][1] - 70.0).abs() < 1e-3);
        assert!((pos[1][1] - 0.0).abs() < 1e-3);
        assert!((pos[2][0] - 0.0).abs() < 1e-3);
    }

    #[test]
    fn higher_score_dominates_conflicting_measurements() {
        let shifts = vec![
            shift(0, 1, Axis::Horizontal, 100.0, 0.0, 0.9),
            shift(0, 1, Axis::Horizontal, 120.0, 0.0, 0.1),
        ];
        let pos = solve_positions(2, &shifts, Solver::Cholesky).unwrap();
        // Weighted least squares lands at the weighted mean: 102.
        assert!((pos[1][0] - 102.0).abs() < 1e-2, "{pos:?}");
    }

    #[test]
    fn degenerate_problems() {
        assert!(solve_positions(0, &[], Solver::Cholesky).unwrap().is_empty());
        let single = solve_positions(1, &[], Solver::Cholesky).unwrap();
        assert_eq!(single, vec![[0.0, 0.0, 0.0]]);
    }

    #[test]
    fn disconnected_graph_is_an_error() {
        let shifts = vec![shift(0, 1, Axis::Horizontal, 10.0, 0.0, 1.0)];
        let err = solve_positions(4, &shifts, Solver::Cholesky).unwrap_err();
        match err {
            PlacementError::Disconnected {
                connected,
                n_tiles,
            } => {
                assert_eq!(connected, 2);
                assert_eq!(n_tiles, 4);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn invalid_measurements_are_errors() {
        let oob = vec![shift(0, 5, Axis::Horizontal, 1.0, 0.0, 1.0)];
        assert!(matches!(
            solve_positions(2, &oob, Solver::Cholesky),
            Err(PlacementError::TileOutOfRange { index: 5, .. })
        ));

        let nan = vec![shift(0, 1, Axis::Horizontal, f32::NAN, 0.0, 1.0)];
        assert!(matches!(
            solve_positions(2, &nan, Solver::Cholesky),
            Err(PlacementError::NonFinite { .. })
        ));

        let selfpair = vec![shift(1, 1, Axis::Horizontal, 1.0, 0.0, 1.0)];
        assert!(matches!(
            solve_positions(2, &selfpair, Solver::Cholesky),
            Err(PlacementError::SelfPair { index: 1 })
        ));
    }
}
