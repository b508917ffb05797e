//! Grid factorizer: split the worker count across the three box dimensions
//! so the inter-process surface area per worker is minimal.

use crate::error::CommError;

/// Factor `nprocs` into `(Px, Py, Pz)` minimizing the sub-box surface area.
///
/// `user` pins dimensions (0 means "choose"), `dimension` is 2 or 3, and
/// `areas` is the face-area triple `[A_xy, A_xz, A_yz]` of the box.
pub fn factor_grid(
    nprocs: usize,
    user: [usize; 3],
    dimension: usize,
    areas: [f64; 3],
) -> Result<[usize; 3], CommError> {
    factor_grid_weighted(nprocs, user, dimension, areas, [1, 1, 1])
}

/// [`factor_grid`] with sub-cell weights: each face area is divided by the
/// product of the weights along its axes before minimization. The NUMA
/// placer uses this to bias the node-level factorization by the inner
/// per-node grid.
pub fn factor_grid_weighted(
    nprocs: usize,
    user: [usize; 3],
    dimension: usize,
    areas: [f64; 3],
    subcell: [usize; 3],
) -> Result<[usize; 3], CommError> {
    let mut grid = user;

    if grid[0] > 0 && grid[1] > 0 && grid[2] > 0 {
        // fully pinned, nothing to choose
    } else if grid[0] > 0 && grid[1] > 0 {
        grid[2] = nprocs / (grid[0] * grid[1]);
    } else if grid[0] > 0 && grid[2] > 0 {
        grid[1] = nprocs / (grid[0] * grid[2]);
    } else if grid[1] > 0 && grid[2] > 0 {
        grid[0] = nprocs / (grid[1] * grid[2]);
    } else {
        let area = [
            areas[0] / (subcell[0] * subcell[1]) as f64,
            areas[1] / (subcell[0] * subcell[2]) as f64,
            areas[2] / (subcell[1] * subcell[2]) as f64,
        ];

        // enumerate every factorization; first strictly better wins, so
        // ties resolve in (ipx, ipy) ascending order
        let mut bestsurf = 2.0 * (area[0] + area[1] + area[2]);
        for ipx in 1..=nprocs {
            if user[0] != 0 && ipx != user[0] {
                continue;
            }
            if nprocs % ipx != 0 {
                continue;
            }
            let rest = nprocs / ipx;
            for ipy in 1..=rest {
                if user[1] != 0 && ipy != user[1] {
                    continue;
                }
                if rest % ipy != 0 {
                    continue;
                }
                let ipz = rest / ipy;
                if user[2] != 0 && ipz != user[2] {
                    continue;
                }
                if dimension == 2 && ipz != 1 {
                    continue;
                }
                let surf = area[0] / (ipx * ipy) as f64
                    + area[1] / (ipx * ipz) as f64
                    + area[2] / (ipy * ipz) as f64;
                if surf < bestsurf {
                    bestsurf = surf;
                    grid = [ipx, ipy, ipz];
                }
            }
        }
    }

    if grid[0] * grid[1] * grid[2] != nprocs {
        return Err(CommError::BadGrid { nprocs, grid });
    }
    if dimension == 2 && grid[2] != 1 {
        return Err(CommError::ZGridNotOne(grid[2]));
    }
    Ok(grid)
}
