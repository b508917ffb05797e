//! Rank placement: map the factored `(Px, Py, Pz)` grid onto concrete
//! worker ranks.
//!
//! The plain path embeds ranks row-major (last dimension fastest) with
//! all-periodic neighbor wrap. The NUMA-aware path clusters ranks that
//! share a node into contiguous sub-blocks of the grid so that most swap
//! traffic stays inside a node. Both paths are pure functions of the rank
//! count and (for NUMA) the node-name table, so every rank computes the
//! identical map without messaging.

use std::collections::BTreeMap;

use crate::error::CommError;
use crate::grid::{factor_grid, factor_grid_weighted};

/// A worker's view of the process grid.
#[derive(Debug, Clone)]
pub struct ProcGrid {
    /// Workers per dimension.
    pub procgrid: [usize; 3],
    /// This worker's grid coordinates.
    pub myloc: [usize; 3],
    /// Face-neighbor ranks, `procneigh[dim][0]` below and `[1]` above,
    /// always wrapped periodically.
    pub procneigh: [[usize; 2]; 3],
    /// Inner per-NUMA grid when NUMA placement was used.
    pub numa_grid: Option<[usize; 3]>,
    grid2proc: Vec<usize>,
}

impl ProcGrid {
    /// Rank owning grid cell `loc`.
    pub fn rank_at(&self, loc: [usize; 3]) -> usize {
        let [px, py, pz] = self.procgrid;
        debug_assert!(loc[0] < px && loc[1] < py && loc[2] < pz);
        self.grid2proc[(loc[0] * py + loc[1]) * pz + loc[2]]
    }

    /// Total worker count.
    pub fn nprocs(&self) -> usize {
        self.procgrid[0] * self.procgrid[1] * self.procgrid[2]
    }

    fn assemble(
        me: usize,
        procgrid: [usize; 3],
        coords: &[[usize; 3]],
        numa_grid: Option<[usize; 3]>,
    ) -> Result<Self, CommError> {
        let [px, py, pz] = procgrid;
        let mut grid2proc = vec![usize::MAX; px * py * pz];
        for (rank, &c) in coords.iter().enumerate() {
            let cell = &mut grid2proc[(c[0] * py + c[1]) * pz + c[2]];
            if *cell != usize::MAX {
                return Err(CommError::DuplicateGridCell { rank, cell: c });
            }
            *cell = rank;
        }

        let myloc = coords[me];
        let mut grid = Self {
            procgrid,
            myloc,
            procneigh: [[0; 2]; 3],
            numa_grid,
            grid2proc,
        };
        for d in 0..3 {
            let n = procgrid[d];
            let mut lo = myloc;
            lo[d] = (myloc[d] + n - 1) % n;
            let mut hi = myloc;
            hi[d] = (myloc[d] + 1) % n;
            grid.procneigh[d] = [grid.rank_at(lo), grid.rank_at(hi)];
        }
        Ok(grid)
    }
}

/// Row-major decode of `index` over `grid`, last dimension fastest.
fn decode(index: usize, grid: [usize; 3]) -> [usize; 3] {
    [
        index / (grid[1] * grid[2]),
        (index / grid[2]) % grid[1],
        index % grid[2],
    ]
}

/// Factor the grid and place ranks in plain Cartesian order.
pub fn place_plain(
    me: usize,
    nprocs: usize,
    user: [usize; 3],
    dimension: usize,
    areas: [f64; 3],
) -> Result<ProcGrid, CommError> {
    let procgrid = factor_grid(nprocs, user, dimension, areas)?;
    let coords: Vec<[usize; 3]> = (0..nprocs).map(|r| decode(r, procgrid)).collect();
    ProcGrid::assemble(me, procgrid, &coords, None)
}

/// Factor and place ranks NUMA-aware: ranks sharing a node name cluster
/// into contiguous sub-blocks of `numa_domains` NUMA-sized pieces each.
///
/// Falls back to [`place_plain`] with a logged notice when the
/// preconditions do not hold (uniform ranks per node, at least 3 ranks per
/// NUMA domain, at least 2 NUMA domains, rank count divisible by the NUMA
/// size).
pub fn place_numa(
    me: usize,
    nprocs: usize,
    node_names: &[String],
    numa_domains: usize,
    user: [usize; 3],
    dimension: usize,
    areas: [f64; 3],
) -> Result<ProcGrid, CommError> {
    debug_assert_eq!(node_names.len(), nprocs);

    // ranks per node, and whether every node holds the same count
    let mut per_node: BTreeMap<&str, usize> = BTreeMap::new();
    for name in node_names {
        *per_node.entry(name.as_str()).or_insert(0) += 1;
    }
    let procs_per_node = per_node.values().next().copied().unwrap_or(0);
    let uniform = per_node.values().all(|&n| n == procs_per_node);

    let procs_per_numa = if numa_domains > 0 && procs_per_node % numa_domains == 0 {
        procs_per_node / numa_domains
    } else {
        0
    };

    if !uniform
        || procs_per_numa < 3
        || nprocs % procs_per_numa.max(1) != 0
        || nprocs <= procs_per_numa
    {
        if me == 0 {
            tracing::warn!(
                "NUMA placement preconditions not met ({} node(s), {} domain(s) per node); \
                 falling back to plain placement",
                per_node.len(),
                numa_domains
            );
        }
        return place_plain(me, nprocs, user, dimension, areas);
    }

    // inner factorization of one NUMA domain, then the outer node-level
    // grid weighted by it, then the inner refined against the outer
    let numagrid = factor_grid_weighted(procs_per_numa, [0; 3], dimension, areas, [1, 1, 1])
        .map_err(|_| CommError::BadNumaGrid {
            per_numa: procs_per_numa,
            grid: [0; 3],
        })?;
    let node_count = nprocs / procs_per_numa;
    let outer = factor_grid_weighted(node_count, user, dimension, areas, numagrid)?;
    let numagrid = factor_grid_weighted(procs_per_numa, [0; 3], dimension, areas, outer)
        .map_err(|_| CommError::BadNumaGrid {
            per_numa: procs_per_numa,
            grid: [0; 3],
        })?;

    let procgrid = [
        outer[0] * numagrid[0],
        outer[1] * numagrid[1],
        outer[2] * numagrid[2],
    ];

    // walk ranks in world order: within a node, ranks fill NUMA domains in
    // order; each domain's first rank is its leader, and leaders in world
    // order enumerate the outer grid row-major
    let mut node_rank: BTreeMap<&str, usize> = BTreeMap::new();
    let mut domain_of: BTreeMap<(&str, usize), usize> = BTreeMap::new();
    let mut ndomains = 0usize;
    let mut coords = vec![[0usize; 3]; nprocs];
    for (r, name) in node_names.iter().enumerate() {
        let nr = node_rank.entry(name.as_str()).or_insert(0);
        let local_numa = *nr / procs_per_numa;
        let numa_rank = *nr % procs_per_numa;
        *nr += 1;

        let domain = *domain_of.entry((name.as_str(), local_numa)).or_insert_with(|| {
            let d = ndomains;
            ndomains += 1;
            d
        });

        let node_loc = decode(domain, outer);
        let offset = [
            numa_rank % numagrid[0],
            (numa_rank % (numagrid[0] * numagrid[1])) / numagrid[0],
            numa_rank / (numagrid[0] * numagrid[1]),
        ];
        coords[r] = [
            node_loc[0] * numagrid[0] + offset[0],
            node_loc[1] * numagrid[1] + offset[1],
            node_loc[2] * numagrid[2] + offset[2],
        ];
    }

    ProcGrid::assemble(me, procgrid, &coords, Some(numagrid))
}
