//! Swap planner: the ordered list of directional exchanges that covers the
//! ghost cutoff.
//!
//! Dimension 0 is drained fully before dimension 1, and 1 before 2, so
//! corner ghosts are acquired by chained forwarding through intermediate
//! ranks. Later hops in a dimension cut their slab at the sub-box midpoint
//! so no particle is sent twice in the same sweep direction.

use particle::SimBox;

use crate::config::{CommConfig, CommStyle};
use crate::placement::ProcGrid;

/// Sentinel slab bound: larger than any coordinate, so round-off near the
/// sub-box edges can never drop a particle from the first hop.
pub const BIG: f64 = 1.0e20;

/// One directional exchange.
#[derive(Debug, Clone)]
pub struct Swap {
    /// Dimension this swap sweeps.
    pub dim: usize,
    /// Rank the selected particles are sent to (may be self).
    pub sendproc: usize,
    /// Rank ghosts are received from (may be self).
    pub recvproc: usize,
    /// Lower slab bound (uniform style).
    pub slab_lo: f64,
    /// Upper slab bound (uniform style).
    pub slab_hi: f64,
    /// Per-type lower slab bounds (stratified style; empty otherwise).
    pub multi_lo: Vec<f64>,
    /// Per-type upper slab bounds (stratified style; empty otherwise).
    pub multi_hi: Vec<f64>,
    /// Whether this swap crosses a periodic wrap.
    pub pbc_flag: bool,
    /// Image shifts: entries 0-2 along the box axes, 3-5 the triclinic
    /// tilt shifts.
    pub pbc: [i32; 6],

    /// Slots selected at the last borders pass, reused every timestep.
    pub sendlist: Vec<usize>,
    /// Particles sent at the last borders pass.
    pub sendnum: usize,
    /// Particles received at the last borders pass.
    pub recvnum: usize,
    /// First ghost slot of this swap's receive window.
    pub firstrecv: usize,
    /// Words to receive in a forward pass.
    pub size_forward_recv: usize,
    /// Words to send in a reverse pass.
    pub size_reverse_send: usize,
    /// Words to receive in a reverse pass.
    pub size_reverse_recv: usize,
}

/// The full swap schedule plus the geometry it was derived from.
#[derive(Debug, Clone, Default)]
pub struct SwapPlan {
    /// Swaps in execution order (forward traverses ascending).
    pub swaps: Vec<Swap>,
    /// Peer hops needed per dimension.
    pub need: [usize; 3],
    /// Ghost acquisition distance per dimension (lambda units when the
    /// cell is triclinic).
    pub cutghost: [f64; 3],
}

impl SwapPlan {
    /// Number of swaps.
    pub fn nswap(&self) -> usize {
        self.swaps.len()
    }

    /// Plan the swap schedule for this worker.
    ///
    /// `cut_neighbor` is the neighbor cutoff; `cut_type` gives per-type
    /// cutoffs and must have one entry per particle type when the style is
    /// stratified (it is ignored otherwise).
    pub fn build(
        grid: &ProcGrid,
        cell: &SimBox,
        cfg: &CommConfig,
        cut_neighbor: f64,
        cut_type: &[f64],
    ) -> Self {
        let stratified = cfg.style == CommStyle::Stratified;
        let ntypes = cut_type.len();
        let cut = cut_neighbor.max(cfg.ghost_cutoff);

        // ghost distances and sub-box bounds, in lambda space for a
        // triclinic cell so slab selection stays axis-aligned under shear
        let (prd, sublo, subhi, cutghost, cutmulti);
        if !cell.triclinic {
            prd = cell.prd;
            let (lo, hi) = cell.sub_bounds(grid.myloc, grid.procgrid);
            sublo = lo;
            subhi = hi;
            cutghost = [cut; 3];
            cutmulti = cut_type.iter().map(|&c| [c; 3]).collect::<Vec<_>>();
        } else {
            prd = [1.0; 3];
            let (lo, hi) = cell.sub_bounds_lamda(grid.myloc, grid.procgrid);
            sublo = lo;
            subhi = hi;
            let len = cell.lamda_cut_lengths();
            cutghost = [cut * len[0], cut * len[1], cut * len[2]];
            cutmulti = cut_type
                .iter()
                .map(|&c| [c * len[0], c * len[1], c * len[2]])
                .collect::<Vec<_>>();
        }

        let mut need = [0usize; 3];
        for d in 0..3 {
            need[d] = (cutghost[d] * grid.procgrid[d] as f64 / prd[d]) as usize + 1;
        }
        if cell.dimension == 2 {
            need[2] = 0;
        }
        for d in 0..3 {
            if !cell.periodicity[d] {
                need[d] = need[d].min(grid.procgrid[d] - 1);
            }
        }

        let mut swaps = Vec::with_capacity(2 * (need[0] + need[1] + need[2]));
        for dim in 0..3 {
            for ineed in 0..2 * need[dim] {
                let mut swap = Swap {
                    dim,
                    sendproc: 0,
                    recvproc: 0,
                    slab_lo: 0.0,
                    slab_hi: 0.0,
                    multi_lo: Vec::new(),
                    multi_hi: Vec::new(),
                    pbc_flag: false,
                    pbc: [0; 6],
                    sendlist: Vec::new(),
                    sendnum: 0,
                    recvnum: 0,
                    firstrecv: 0,
                    size_forward_recv: 0,
                    size_reverse_send: 0,
                    size_reverse_recv: 0,
                };

                if ineed % 2 == 0 {
                    // send down, receive from above
                    swap.sendproc = grid.procneigh[dim][0];
                    swap.recvproc = grid.procneigh[dim][1];
                    if !stratified {
                        swap.slab_lo = if ineed < 2 {
                            -BIG
                        } else {
                            0.5 * (sublo[dim] + subhi[dim])
                        };
                        swap.slab_hi = sublo[dim] + cutghost[dim];
                    } else {
                        for t in 0..ntypes {
                            swap.multi_lo.push(if ineed < 2 {
                                -BIG
                            } else {
                                0.5 * (sublo[dim] + subhi[dim])
                            });
                            swap.multi_hi.push(sublo[dim] + cutmulti[t][dim]);
                        }
                    }
                    if grid.myloc[dim] == 0 {
                        if !cell.periodicity[dim] {
                            // inverted slab: nothing matches
                            if !stratified {
                                swap.slab_hi = swap.slab_lo - 1.0;
                            } else {
                                for t in 0..ntypes {
                                    swap.multi_hi[t] = swap.multi_lo[t] - 1.0;
                                }
                            }
                        } else {
                            swap.pbc_flag = true;
                            swap.pbc[dim] = 1;
                            if cell.triclinic {
                                if dim == 1 {
                                    swap.pbc[5] = 1;
                                } else if dim == 2 {
                                    swap.pbc[4] = 1;
                                    swap.pbc[3] = 1;
                                }
                            }
                        }
                    }
                } else {
                    // send up, receive from below
                    swap.sendproc = grid.procneigh[dim][1];
                    swap.recvproc = grid.procneigh[dim][0];
                    if !stratified {
                        swap.slab_lo = subhi[dim] - cutghost[dim];
                        swap.slab_hi = if ineed < 2 {
                            BIG
                        } else {
                            0.5 * (sublo[dim] + subhi[dim])
                        };
                    } else {
                        for t in 0..ntypes {
                            swap.multi_lo.push(subhi[dim] - cutmulti[t][dim]);
                            swap.multi_hi.push(if ineed < 2 {
                                BIG
                            } else {
                                0.5 * (sublo[dim] + subhi[dim])
                            });
                        }
                    }
                    if grid.myloc[dim] == grid.procgrid[dim] - 1 {
                        if !cell.periodicity[dim] {
                            if !stratified {
                                swap.slab_hi = swap.slab_lo - 1.0;
                            } else {
                                for t in 0..ntypes {
                                    swap.multi_hi[t] = swap.multi_lo[t] - 1.0;
                                }
                            }
                        } else {
                            swap.pbc_flag = true;
                            swap.pbc[dim] = -1;
                            if cell.triclinic {
                                if dim == 1 {
                                    swap.pbc[5] = -1;
                                } else if dim == 2 {
                                    swap.pbc[4] = -1;
                                    swap.pbc[3] = -1;
                                }
                            }
                        }
                    }
                }

                swaps.push(swap);
            }
        }

        Self {
            swaps,
            need,
            cutghost,
        }
    }
}
