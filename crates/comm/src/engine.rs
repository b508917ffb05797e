//! The communication engine: per-timestep forward/reverse halo exchange,
//! rebuild-time ghost acquisition, and particle migration.
//!
//! Steady-state control flow per worker:
//!
//! ```text
//! setup -> repeat:  forward_comm, physics, reverse_comm
//!          rebuild: exchange, borders, physics, reverse_comm
//! ```
//!
//! Swaps run in strict ascending order in a forward pass and strict
//! descending order in a reverse pass; that symmetry is what routes
//! multi-hop corner ghosts and their force contributions correctly.

use particle::store::{SIZE_BORDER, SIZE_EXCHANGE, SIZE_FORWARD, SIZE_REVERSE, SIZE_VELOCITY};
use particle::{CommClient, ParticleStore, SimBox};

use crate::buffers::CommBuffers;
use crate::config::{CommConfig, CommStyle};
use crate::error::CommError;
use crate::placement::{place_numa, place_plain, ProcGrid};
use crate::plan::SwapPlan;
use crate::transport::Transport;

/// Spatial-decomposition communication engine for one worker.
pub struct CommEngine<T: Transport> {
    transport: T,
    cfg: CommConfig,
    grid: ProcGrid,
    plan: SwapPlan,
    buffers: CommBuffers,

    // per-particle word widths, fixed by init()
    size_forward: usize,
    size_reverse: usize,
    size_border: usize,
    // largest widths over the container and all registered clients
    maxforward: usize,
    maxreverse: usize,
    // fast-path flags: positions-only forward, forces-only reverse
    comm_x_only: bool,
    comm_f_only: bool,
}

impl<T: Transport> CommEngine<T> {
    /// Create the engine and place this worker on the process grid.
    ///
    /// Grid factorization honors `cfg.grid_hint` pins; with
    /// `cfg.numa_domains > 0` placement clusters ranks by node name,
    /// falling back to the plain Cartesian map when the NUMA
    /// preconditions do not hold.
    pub fn new(transport: T, cfg: CommConfig, cell: &SimBox) -> Result<Self, CommError> {
        cfg.validate()?;
        let me = transport.rank();
        let nprocs = transport.nprocs();
        let areas = cell.face_areas();

        let grid = if cfg.numa_domains > 0 {
            let names = transport.node_names();
            place_numa(
                me,
                nprocs,
                &names,
                cfg.numa_domains,
                cfg.grid_hint,
                cell.dimension,
                areas,
            )?
        } else {
            place_plain(me, nprocs, cfg.grid_hint, cell.dimension, areas)?
        };

        if me == 0 {
            if let Some(numa) = grid.numa_grid {
                tracing::info!("{} by {} by {} NUMA grid", numa[0], numa[1], numa[2]);
            }
            tracing::info!(
                "{} by {} by {} processor grid",
                grid.procgrid[0],
                grid.procgrid[1],
                grid.procgrid[2]
            );
        }

        Ok(Self {
            transport,
            cfg,
            grid,
            plan: SwapPlan::default(),
            buffers: CommBuffers::new(),
            size_forward: SIZE_FORWARD,
            size_reverse: SIZE_REVERSE,
            size_border: SIZE_BORDER,
            maxforward: SIZE_BORDER,
            maxreverse: SIZE_REVERSE,
            comm_x_only: true,
            comm_f_only: true,
        })
    }

    /// This worker's rank.
    pub fn me(&self) -> usize {
        self.transport.rank()
    }

    /// Total worker count.
    pub fn nprocs(&self) -> usize {
        self.transport.nprocs()
    }

    /// The process grid this worker was placed on.
    pub fn grid(&self) -> &ProcGrid {
        &self.grid
    }

    /// The current swap plan (empty until [`setup`](Self::setup)).
    pub fn plan(&self) -> &SwapPlan {
        &self.plan
    }

    /// Engine settings.
    pub fn config(&self) -> &CommConfig {
        &self.cfg
    }

    /// Fix the per-particle message widths and fast-path flags, and fold
    /// in the widths of every client that will piggyback on the schedule.
    ///
    /// Validates the border-group restriction against the container's
    /// first group.
    pub fn init(
        &mut self,
        store: &ParticleStore,
        clients: &[&dyn CommClient],
    ) -> Result<(), CommError> {
        self.comm_x_only = !self.cfg.ghost_velocity;
        self.comm_f_only = true;

        self.size_forward = SIZE_FORWARD;
        self.size_border = SIZE_BORDER;
        self.size_reverse = SIZE_REVERSE;
        if self.cfg.ghost_velocity {
            self.size_forward += SIZE_VELOCITY;
            self.size_border += SIZE_VELOCITY;
        }

        self.maxforward = self.size_forward.max(self.size_border);
        self.maxreverse = self.size_reverse;
        for c in clients {
            self.maxforward = self.maxforward.max(c.comm_forward_width());
            self.maxreverse = self.maxreverse.max(c.comm_reverse_width());
        }

        if let Some(name) = &self.cfg.border_group {
            match &store.first_group {
                Some(g) if g == name => {}
                _ => return Err(CommError::InvalidGroup(name.clone())),
            }
        }
        Ok(())
    }

    /// Plan the swap schedule from the neighbor cutoff (and per-type
    /// cutoffs when the style is stratified). Must be re-run whenever the
    /// box geometry or a cutoff changes; the plan is immutable between
    /// rebuilds.
    pub fn setup(
        &mut self,
        cell: &SimBox,
        cut_neighbor: f64,
        cut_type: &[f64],
    ) -> Result<(), CommError> {
        if !cut_neighbor.is_finite() || cut_neighbor < 0.0 {
            return Err(CommError::InvalidCutoff(cut_neighbor));
        }
        if self.cfg.style == CommStyle::Stratified && cut_type.is_empty() {
            return Err(CommError::Config(
                "stratified style requires per-type cutoffs".into(),
            ));
        }
        self.plan = SwapPlan::build(&self.grid, cell, &self.cfg, cut_neighbor, cut_type);
        tracing::debug!(
            "swap plan: nswap={} need=[{}, {}, {}]",
            self.plan.nswap(),
            self.plan.need[0],
            self.plan.need[1],
            self.plan.need[2]
        );
        Ok(())
    }

    /// Ship positions outward along every swap, ascending.
    ///
    /// With positions-only payloads (no ghost velocity) the receive lands
    /// directly in the position array; self-swaps are a shifted copy.
    pub fn forward_comm(
        &mut self,
        store: &mut ParticleStore,
        cell: &SimBox,
    ) -> Result<(), CommError> {
        let me = self.transport.rank();
        for s in 0..self.plan.nswap() {
            let (sendproc, recvproc, sendnum, recvnum, firstrecv, size_forward_recv) = {
                let sw = &self.plan.swaps[s];
                (
                    sw.sendproc,
                    sw.recvproc,
                    sw.sendnum,
                    sw.recvnum,
                    sw.firstrecv,
                    sw.size_forward_recv,
                )
            };

            if sendproc != me {
                if self.comm_x_only {
                    let sw = &self.plan.swaps[s];
                    let n = store.pack_comm(
                        &sw.sendlist,
                        &mut self.buffers.buf_send,
                        sw.pbc_flag,
                        &sw.pbc,
                        cell,
                    );
                    self.transport.send(sendproc, &self.buffers.buf_send[..n])?;
                    self.transport
                        .recv_into(recvproc, store.pos_words_mut(firstrecv, recvnum))?;
                } else if self.cfg.ghost_velocity {
                    let sw = &self.plan.swaps[s];
                    let n = store.pack_comm_vel(
                        &sw.sendlist,
                        &mut self.buffers.buf_send,
                        sw.pbc_flag,
                        &sw.pbc,
                        cell,
                    );
                    self.transport.send(sendproc, &self.buffers.buf_send[..n])?;
                    self.transport
                        .recv_into(recvproc, &mut self.buffers.buf_recv[..size_forward_recv])?;
                    store.unpack_comm_vel(recvnum, firstrecv, &self.buffers.buf_recv);
                } else {
                    let sw = &self.plan.swaps[s];
                    let n = store.pack_comm(
                        &sw.sendlist,
                        &mut self.buffers.buf_send,
                        sw.pbc_flag,
                        &sw.pbc,
                        cell,
                    );
                    self.transport.send(sendproc, &self.buffers.buf_send[..n])?;
                    self.transport
                        .recv_into(recvproc, &mut self.buffers.buf_recv[..size_forward_recv])?;
                    store.unpack_comm(recvnum, firstrecv, &self.buffers.buf_recv);
                }
            } else if self.comm_x_only {
                if sendnum > 0 {
                    let sw = &self.plan.swaps[s];
                    store.copy_comm_to_ghosts(&sw.sendlist, firstrecv, sw.pbc_flag, &sw.pbc, cell);
                }
            } else {
                let sw = &self.plan.swaps[s];
                let n = store.pack_comm_vel(
                    &sw.sendlist,
                    &mut self.buffers.buf_send,
                    sw.pbc_flag,
                    &sw.pbc,
                    cell,
                );
                debug_assert_eq!(n, sendnum * self.size_forward);
                store.unpack_comm_vel(recvnum, firstrecv, &self.buffers.buf_send);
            }
        }
        Ok(())
    }

    /// Ship accumulated ghost forces back to their owners along every
    /// swap, descending, summing into the owners' force slots.
    pub fn reverse_comm(&mut self, store: &mut ParticleStore) -> Result<(), CommError> {
        let me = self.transport.rank();
        for s in (0..self.plan.nswap()).rev() {
            let (sendproc, recvproc, sendnum, recvnum, firstrecv, size_reverse_recv) = {
                let sw = &self.plan.swaps[s];
                (
                    sw.sendproc,
                    sw.recvproc,
                    sw.sendnum,
                    sw.recvnum,
                    sw.firstrecv,
                    sw.size_reverse_recv,
                )
            };

            if sendproc != me {
                if self.comm_f_only {
                    self.transport
                        .send(recvproc, store.force_words(firstrecv, recvnum))?;
                } else {
                    let n = store.pack_reverse(recvnum, firstrecv, &mut self.buffers.buf_send);
                    self.transport.send(recvproc, &self.buffers.buf_send[..n])?;
                }
                self.transport
                    .recv_into(sendproc, &mut self.buffers.buf_recv[..size_reverse_recv])?;
                store.unpack_reverse(&self.plan.swaps[s].sendlist, &self.buffers.buf_recv);
            } else if self.comm_f_only {
                if sendnum > 0 {
                    store.sum_reverse_from_ghosts(&self.plan.swaps[s].sendlist, firstrecv);
                }
            } else {
                store.pack_reverse(recvnum, firstrecv, &mut self.buffers.buf_send);
                store.unpack_reverse(&self.plan.swaps[s].sendlist, &self.buffers.buf_send);
            }
        }
        Ok(())
    }

    /// Migrate particles that left this sub-box to the owning neighbor.
    ///
    /// Runs only on rebuild steps, before [`borders`](Self::borders), with
    /// positions already remapped into the cell (and converted to lambda
    /// coordinates for a triclinic cell). A particle that moved more than
    /// one sub-box since the last rebuild finds no owner and is silently
    /// dropped; keeping migrations single-hop is the caller's invariant.
    pub fn exchange(
        &mut self,
        store: &mut ParticleStore,
        cell: &SimBox,
    ) -> Result<(), CommError> {
        store.clear_ghosts();

        let (sublo, subhi) = if cell.triclinic {
            cell.sub_bounds_lamda(self.grid.myloc, self.grid.procgrid)
        } else {
            cell.sub_bounds(self.grid.myloc, self.grid.procgrid)
        };

        for dim in 0..3 {
            // fill the send buffer with leavers, swap-removing as we go
            let lo = sublo[dim];
            let hi = subhi[dim];
            let mut nsend = 0;
            let mut i = 0;
            while i < store.nlocal {
                let x = store.pos[i][dim];
                if x < lo || x >= hi {
                    self.buffers.ensure_send(nsend + SIZE_EXCHANGE, true);
                    nsend += store.pack_exchange(i, &mut self.buffers.buf_send[nsend..]);
                    store.swap_remove_owned(i);
                } else {
                    i += 1;
                }
            }

            // one worker along this dimension: wraps land back on me
            let nrecv;
            let from_send_buf;
            if self.grid.procgrid[dim] == 1 {
                nrecv = nsend;
                from_send_buf = true;
            } else {
                let [down, up] = self.grid.procneigh[dim];
                let nrecv1 = self.transport.sendrecv_count(down, nsend, up)?;
                let mut total = nrecv1;
                let mut nrecv2 = 0;
                if self.grid.procgrid[dim] > 2 {
                    nrecv2 = self.transport.sendrecv_count(up, nsend, down)?;
                    total += nrecv2;
                }
                self.buffers.ensure_recv(total);

                self.transport.send(down, &self.buffers.buf_send[..nsend])?;
                self.transport
                    .recv_into(up, &mut self.buffers.buf_recv[..nrecv1])?;
                if self.grid.procgrid[dim] > 2 {
                    self.transport.send(up, &self.buffers.buf_send[..nsend])?;
                    self.transport
                        .recv_into(down, &mut self.buffers.buf_recv[nrecv1..nrecv1 + nrecv2])?;
                }
                nrecv = total;
                from_send_buf = false;
            }

            // keep the arrivals that fall inside my slab; skip the rest by
            // their length word (a later dimension or nobody claims them)
            let buf = if from_send_buf {
                &self.buffers.buf_send
            } else {
                &self.buffers.buf_recv
            };
            let mut m = 0;
            let mut kept = 0;
            while m < nrecv {
                let len = buf[m] as usize;
                let value = buf[m + 1 + dim];
                if value >= lo && value < hi {
                    store.unpack_exchange(&buf[m..m + len]);
                    kept += 1;
                }
                m += len;
            }
            tracing::debug!(
                "exchange dim {dim}: sent {} words, received {} words, kept {kept}",
                nsend,
                nrecv
            );
        }
        Ok(())
    }

    /// Select border particles for every planned swap, ship them to the
    /// peers as ghosts, and record the send lists for reuse by
    /// forward/reverse passes until the next rebuild.
    pub fn borders(
        &mut self,
        store: &mut ParticleStore,
        cell: &SimBox,
    ) -> Result<(), CommError> {
        store.clear_ghosts();
        let me = self.transport.rank();
        let restrict_group = self.cfg.border_group.is_some();

        let mut iswap = 0;
        let mut smax = 0;
        let mut rmax = 0;
        for dim in 0..3 {
            let mut nfirst = 0;
            let mut nlast = 0;
            for ineed in 0..2 * self.plan.need[dim] {
                // first swap of a window scans owned plus all ghosts so
                // far, so earlier dims' arrivals become forwardable; the
                // partner swap reuses the same candidates
                if ineed % 2 == 0 {
                    nfirst = nlast;
                    nlast = store.nlocal + store.nghost;
                }

                let mut list = std::mem::take(&mut self.plan.swaps[iswap].sendlist);
                list.clear();
                {
                    let sw = &self.plan.swaps[iswap];
                    let inside = |i: usize| {
                        let x = store.pos[i][dim];
                        if sw.multi_lo.is_empty() {
                            x >= sw.slab_lo && x <= sw.slab_hi
                        } else {
                            let t = store.type_tag[i] as usize;
                            x >= sw.multi_lo[t] && x <= sw.multi_hi[t]
                        }
                    };
                    if !restrict_group || ineed >= 2 {
                        for i in nfirst..nlast {
                            if inside(i) {
                                list.push(i);
                            }
                        }
                    } else {
                        // group-restricted first hop: group prefix of the
                        // owned slots, then every ghost so far
                        for i in 0..store.nfirst {
                            if inside(i) {
                                list.push(i);
                            }
                        }
                        for i in store.nlocal..nlast {
                            if inside(i) {
                                list.push(i);
                            }
                        }
                    }
                }
                let nsend = list.len();

                self.buffers.ensure_send(nsend * self.size_border, false);
                let n = {
                    let sw = &self.plan.swaps[iswap];
                    if self.cfg.ghost_velocity {
                        store.pack_border_vel(
                            &list,
                            &mut self.buffers.buf_send,
                            sw.pbc_flag,
                            &sw.pbc,
                            cell,
                        )
                    } else {
                        store.pack_border(
                            &list,
                            &mut self.buffers.buf_send,
                            sw.pbc_flag,
                            &sw.pbc,
                            cell,
                        )
                    }
                };

                let firstrecv = store.nlocal + store.nghost;
                let (sendproc, recvproc) =
                    (self.plan.swaps[iswap].sendproc, self.plan.swaps[iswap].recvproc);
                let nrecv;
                if sendproc != me {
                    nrecv = self.transport.sendrecv_count(sendproc, nsend, recvproc)?;
                    self.buffers.ensure_recv(nrecv * self.size_border);
                    self.transport.send(sendproc, &self.buffers.buf_send[..n])?;
                    self.transport.recv_into(
                        recvproc,
                        &mut self.buffers.buf_recv[..nrecv * self.size_border],
                    )?;
                    if self.cfg.ghost_velocity {
                        store.unpack_border_vel(nrecv, &self.buffers.buf_recv);
                    } else {
                        store.unpack_border(nrecv, &self.buffers.buf_recv);
                    }
                } else {
                    nrecv = nsend;
                    if self.cfg.ghost_velocity {
                        store.unpack_border_vel(nrecv, &self.buffers.buf_send);
                    } else {
                        store.unpack_border(nrecv, &self.buffers.buf_send);
                    }
                }

                smax = smax.max(nsend);
                rmax = rmax.max(nrecv);
                let sw = &mut self.plan.swaps[iswap];
                sw.sendlist = list;
                sw.sendnum = nsend;
                sw.recvnum = nrecv;
                sw.size_forward_recv = nrecv * self.size_forward;
                sw.size_reverse_send = nrecv * self.size_reverse;
                sw.size_reverse_recv = nsend * self.size_reverse;
                sw.firstrecv = firstrecv;
                iswap += 1;
            }
        }

        // size the global buffers for the widest client that will reuse
        // this schedule
        let need_send = (self.maxforward * smax).max(self.maxreverse * rmax);
        self.buffers.ensure_send(need_send, false);
        let need_recv = (self.maxforward * rmax).max(self.maxreverse * smax);
        self.buffers.ensure_recv(need_recv);

        tracing::debug!("borders: {} ghosts over {} swaps", store.nghost, iswap);
        Ok(())
    }

    /// Run a client's payload outward over the recorded schedule,
    /// ascending.
    pub fn forward_comm_client(&mut self, client: &mut dyn CommClient) -> Result<(), CommError> {
        let me = self.transport.rank();
        let nsize = client.comm_forward_width();
        for s in 0..self.plan.nswap() {
            let (sendproc, recvproc, sendnum, recvnum, firstrecv) = {
                let sw = &self.plan.swaps[s];
                (sw.sendproc, sw.recvproc, sw.sendnum, sw.recvnum, sw.firstrecv)
            };

            self.buffers.ensure_send(nsize * sendnum, false);
            let n = {
                let sw = &self.plan.swaps[s];
                client.pack_forward(&sw.sendlist, &mut self.buffers.buf_send, sw.pbc_flag, &sw.pbc)
            };

            if sendproc != me {
                self.buffers.ensure_recv(nsize * recvnum);
                self.transport.send(sendproc, &self.buffers.buf_send[..n])?;
                self.transport
                    .recv_into(recvproc, &mut self.buffers.buf_recv[..nsize * recvnum])?;
                client.unpack_forward(recvnum, firstrecv, &self.buffers.buf_recv);
            } else {
                client.unpack_forward(recvnum, firstrecv, &self.buffers.buf_send);
            }
        }
        Ok(())
    }

    /// Run a client's payload inward over the recorded schedule,
    /// descending; the client's reverse unpack accumulates.
    pub fn reverse_comm_client(&mut self, client: &mut dyn CommClient) -> Result<(), CommError> {
        let me = self.transport.rank();
        let nsize = client.comm_reverse_width();
        for s in (0..self.plan.nswap()).rev() {
            let (sendproc, recvproc, sendnum, recvnum, firstrecv) = {
                let sw = &self.plan.swaps[s];
                (sw.sendproc, sw.recvproc, sw.sendnum, sw.recvnum, sw.firstrecv)
            };

            self.buffers.ensure_send(nsize * recvnum, false);
            let n = client.pack_reverse(recvnum, firstrecv, &mut self.buffers.buf_send);

            if sendproc != me {
                self.buffers.ensure_recv(nsize * sendnum);
                self.transport.send(recvproc, &self.buffers.buf_send[..n])?;
                self.transport
                    .recv_into(sendproc, &mut self.buffers.buf_recv[..nsize * sendnum])?;
                client.unpack_reverse(&self.plan.swaps[s].sendlist, &self.buffers.buf_recv);
            } else {
                client.unpack_reverse(&self.plan.swaps[s].sendlist, &self.buffers.buf_send);
            }
        }
        Ok(())
    }
}
