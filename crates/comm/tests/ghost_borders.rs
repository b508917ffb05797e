//! Ghost acquisition across multi-rank clusters: periodic wrap images,
//! multi-hop chains, and completeness of the ghost set within the cutoff.

use comm::{local_cluster, run_cluster, CommConfig, CommEngine};
use particle::{ParticleStore, SimBox};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Deterministic global particle cloud, identical on every rank.
fn particle_cloud(n: usize, cell: &SimBox, seed: u64) -> Vec<(u64, [f64; 3])> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..n as u64)
        .map(|id| {
            let p = [
                rng.gen_range(cell.boxlo[0]..cell.boxhi[0]),
                rng.gen_range(cell.boxlo[1]..cell.boxhi[1]),
                rng.gen_range(cell.boxlo[2]..cell.boxhi[2]),
            ];
            (id, p)
        })
        .collect()
}

/// Keep the particles whose coordinates fall inside this rank's sub-box.
fn fill_owned(
    store: &mut ParticleStore,
    all: &[(u64, [f64; 3])],
    sublo: [f64; 3],
    subhi: [f64; 3],
) {
    for &(id, p) in all {
        if (0..3).all(|d| p[d] >= sublo[d] && p[d] < subhi[d]) {
            store.push(p, [0.0; 3], id, 0);
        }
    }
}

#[test]
fn two_rank_wrap_ghost() {
    // one particle at (9.5, 5, 5) owned by rank 1; with cut 1.0, rank 0
    // must see it as a ghost at (-0.5, 5, 5) through the periodic wrap
    let results = run_cluster(local_cluster(2), |t| {
        let cell = SimBox::orthogonal([0.0; 3], [10.0; 3], [true; 3]);
        let cfg = CommConfig {
            grid_hint: [2, 1, 1],
            ..CommConfig::default()
        };
        let mut engine = CommEngine::new(t, cfg, &cell).unwrap();
        let (sublo, subhi) = cell.sub_bounds(engine.grid().myloc, engine.grid().procgrid);

        let mut store = ParticleStore::new(1);
        fill_owned(&mut store, &[(7, [9.5, 5.0, 5.0])], sublo, subhi);

        engine.init(&store, &[]).unwrap();
        engine.setup(&cell, 1.0, &[]).unwrap();
        engine.borders(&mut store, &cell).unwrap();

        // the sending swap on the upper edge must be flagged as a wrap
        let wrap_swap = engine.plan().swaps[1].clone();

        let ghosts: Vec<(u64, [f64; 3])> = (store.nlocal..store.len())
            .map(|i| (store.id[i], store.pos[i]))
            .collect();
        (store.nlocal, ghosts, wrap_swap.pbc_flag, wrap_swap.pbc)
    });

    let (nlocal0, ghosts0, _, _) = &results[0];
    let (nlocal1, ghosts1, pbc_flag1, pbc1) = &results[1];

    assert_eq!(*nlocal0, 0);
    assert_eq!(*nlocal1, 1);
    assert_eq!(ghosts1.len(), 0);

    assert_eq!(ghosts0.len(), 1);
    assert_eq!(ghosts0[0].0, 7);
    let g = ghosts0[0].1;
    assert!((g[0] + 0.5).abs() < 1e-12);
    assert!((g[1] - 5.0).abs() < 1e-12);
    assert!((g[2] - 5.0).abs() < 1e-12);

    // rank 1's upper swap crossed the wrap with image shift -1 along x
    assert!(*pbc_flag1);
    assert_eq!(pbc1[0], -1);
}

#[test]
fn two_hop_chain_with_cumulative_shift() {
    // P = 4 along x on a [0,4) box with cut 1.5 needs two hops; the
    // particle at 3.9 owned by rank 3 reaches rank 1 through the chain
    // with a cumulative image shift of -1
    let results = run_cluster(local_cluster(4), |t| {
        let cell = SimBox::orthogonal([0.0; 3], [4.0; 3], [true; 3]);
        let cfg = CommConfig {
            grid_hint: [4, 1, 1],
            ..CommConfig::default()
        };
        let mut engine = CommEngine::new(t, cfg, &cell).unwrap();
        let (sublo, subhi) = cell.sub_bounds(engine.grid().myloc, engine.grid().procgrid);

        let mut store = ParticleStore::new(1);
        fill_owned(&mut store, &[(9, [3.9, 2.0, 2.0])], sublo, subhi);

        engine.init(&store, &[]).unwrap();
        engine.setup(&cell, 1.5, &[]).unwrap();
        assert_eq!(engine.plan().need[0], 2);
        engine.borders(&mut store, &cell).unwrap();

        (store.nlocal..store.len())
            .map(|i| (store.id[i], store.pos[i][0]))
            .collect::<Vec<_>>()
    });

    let expect = |ghosts: &Vec<(u64, f64)>, x: f64| {
        assert_eq!(ghosts.len(), 1);
        assert_eq!(ghosts[0].0, 9);
        assert!((ghosts[0].1 - x).abs() < 1e-12, "got {}", ghosts[0].1);
    };
    // ranks 0 and 1 see the wrapped image, rank 2 the unwrapped one
    expect(&results[0], -0.1);
    expect(&results[1], -0.1);
    expect(&results[2], 3.9);
    assert!(results[3].is_empty());
}

#[test]
fn ghost_set_is_complete_within_cutoff() {
    // invariant: every (particle, image) pair within the cutoff of an
    // owned particle is present on its rank, as owned or ghost
    let nprocs = 4;
    let cut = 2.0;
    let cell = SimBox::orthogonal([0.0; 3], [10.0; 3], [true; 3]);
    let all = particle_cloud(40, &cell, 0x5eed);

    let all_for_workers = all.clone();
    let results = run_cluster(local_cluster(nprocs), move |t| {
        let cell = SimBox::orthogonal([0.0; 3], [10.0; 3], [true; 3]);
        let cfg = CommConfig {
            grid_hint: [2, 2, 1],
            ..CommConfig::default()
        };
        let mut engine = CommEngine::new(t, cfg, &cell).unwrap();
        let (sublo, subhi) = cell.sub_bounds(engine.grid().myloc, engine.grid().procgrid);

        let mut store = ParticleStore::new(1);
        fill_owned(&mut store, &all_for_workers, sublo, subhi);

        engine.init(&store, &[]).unwrap();
        engine.setup(&cell, cut, &[]).unwrap();
        engine.borders(&mut store, &cell).unwrap();

        let owned: Vec<(u64, [f64; 3])> =
            (0..store.nlocal).map(|i| (store.id[i], store.pos[i])).collect();
        let ghosts: Vec<(u64, [f64; 3])> = (store.nlocal..store.len())
            .map(|i| (store.id[i], store.pos[i]))
            .collect();
        (owned, ghosts)
    });

    // total owned equals the cloud
    let total: usize = results.iter().map(|(o, _)| o.len()).sum();
    assert_eq!(total, all.len());

    let prd = 10.0;
    for (owned, ghosts) in &results {
        // no (particle, image) pair is delivered twice to the same rank
        let mut seen: Vec<(u64, [i64; 3])> = ghosts
            .iter()
            .map(|&(id, g)| {
                (id, [
                    (g[0] * 1e6).round() as i64,
                    (g[1] * 1e6).round() as i64,
                    (g[2] * 1e6).round() as i64,
                ])
            })
            .collect();
        seen.sort_unstable();
        let before = seen.len();
        seen.dedup();
        assert_eq!(seen.len(), before, "duplicate ghost image delivered");

        let has_copy = |id: u64, at: [f64; 3]| {
            owned
                .iter()
                .chain(ghosts.iter())
                .any(|&(gid, gp)| gid == id && (0..3).all(|d| (gp[d] - at[d]).abs() < 1e-9))
        };
        for &(pid, p) in owned {
            for &(qid, q) in &all {
                for mx in -1i32..=1 {
                    for my in -1i32..=1 {
                        for mz in -1i32..=1 {
                            if qid == pid && (mx, my, mz) == (0, 0, 0) {
                                continue;
                            }
                            let image = [
                                q[0] + mx as f64 * prd,
                                q[1] + my as f64 * prd,
                                q[2] + mz as f64 * prd,
                            ];
                            let dist = ((p[0] - image[0]).powi(2)
                                + (p[1] - image[1]).powi(2)
                                + (p[2] - image[2]).powi(2))
                            .sqrt();
                            if dist <= cut {
                                assert!(
                                    has_copy(qid, image),
                                    "particle {qid} image ({mx},{my},{mz}) within {cut} \
                                     of {pid} but absent"
                                );
                            }
                        }
                    }
                }
            }
        }
    }
}

#[test]
fn numa_placement_runs_the_protocol() {
    // 2 nodes x 6 ranks with 2 NUMA domains each: placement clusters the
    // grid into 3-rank blocks, and the full borders/forward/reverse cycle
    // still runs over the remapped neighbors
    use comm::local_cluster_with_nodes;

    let nodes: Vec<&str> = ["alpha"; 6].iter().chain(["beta"; 6].iter()).copied().collect();
    let results = run_cluster(local_cluster_with_nodes(&nodes), |t| {
        let cell = SimBox::orthogonal([0.0; 3], [10.0; 3], [true; 3]);
        let cfg = CommConfig {
            numa_domains: 2,
            ..CommConfig::default()
        };
        let mut engine = CommEngine::new(t, cfg, &cell).unwrap();
        let (sublo, subhi) = cell.sub_bounds(engine.grid().myloc, engine.grid().procgrid);

        let mut store = ParticleStore::new(1);
        fill_owned(&mut store, &particle_cloud(30, &cell, 0x601d), sublo, subhi);

        engine.init(&store, &[]).unwrap();
        engine.setup(&cell, 2.0, &[]).unwrap();
        engine.borders(&mut store, &cell).unwrap();
        engine.forward_comm(&mut store, &cell).unwrap();
        engine.reverse_comm(&mut store).unwrap();

        (store.nlocal, engine.grid().procgrid, engine.grid().numa_grid)
    });

    let total: usize = results.iter().map(|&(nlocal, _, _)| nlocal).sum();
    assert_eq!(total, 30);
    for (_, procgrid, numa_grid) in &results {
        assert_eq!(*procgrid, [2, 2, 3]);
        assert_eq!(*numa_grid, Some([1, 1, 3]));
    }
}

#[test]
fn triclinic_wrap_carries_the_tilt() {
    // xy-tilted cell: a y-wrap image is displaced by the full y edge
    // vector (xy, yprd, 0), in borders and in forward passes alike
    let cell = SimBox::triclinic([0.0; 3], [10.0; 3], [2.0, 0.0, 0.0], [true; 3]);
    let t = local_cluster(1).pop().unwrap();
    let mut engine = CommEngine::new(t, CommConfig::default(), &cell).unwrap();

    let mut store = ParticleStore::new(1);
    store.push([5.0, 0.5, 5.0], [0.0; 3], 1, 0);

    engine.init(&store, &[]).unwrap();
    engine.setup(&cell, 1.0, &[]).unwrap();

    cell.positions_to_lamda(&mut store);
    engine.borders(&mut store, &cell).unwrap();
    cell.positions_to_box(&mut store);

    assert_eq!(store.nghost, 1);
    let g = store.nlocal;
    assert!((store.pos[g][0] - (5.0 + 2.0)).abs() < 1e-9);
    assert!((store.pos[g][1] - (0.5 + 10.0)).abs() < 1e-9);
    assert!((store.pos[g][2] - 5.0).abs() < 1e-9);

    // the owner moves; forward comm reapplies the same shifted image
    store.pos[0] = [5.1, 0.6, 5.2];
    engine.forward_comm(&mut store, &cell).unwrap();
    assert!((store.pos[g][0] - (5.1 + 2.0)).abs() < 1e-9);
    assert!((store.pos[g][1] - (0.6 + 10.0)).abs() < 1e-9);
    assert!((store.pos[g][2] - 5.2).abs() < 1e-9);
}

#[test]
fn stratified_style_selects_per_type() {
    // type 0 reaches 1.0 past the boundary, type 1 reaches 3.0
    let results = run_cluster(local_cluster(2), |t| {
        let cell = SimBox::orthogonal([0.0; 3], [10.0; 3], [true; 3]);
        let cfg = CommConfig {
            style: comm::CommStyle::Stratified,
            grid_hint: [2, 1, 1],
            ..CommConfig::default()
        };
        let mut engine = CommEngine::new(t, cfg, &cell).unwrap();

        let mut store = ParticleStore::new(2);
        if engine.me() == 0 {
            store.push([4.5, 5.0, 5.0], [0.0; 3], 1, 0); // close, short reach
            store.push([3.0, 5.0, 5.0], [0.0; 3], 2, 0); // far, short reach
            store.push([3.0, 5.0, 5.0], [0.0; 3], 3, 1); // far, long reach
        }
        engine.init(&store, &[]).unwrap();
        engine.setup(&cell, 3.0, &[1.0, 3.0]).unwrap();
        engine.borders(&mut store, &cell).unwrap();

        let mut ids: Vec<u64> = (store.nlocal..store.len()).map(|i| store.id[i]).collect();
        ids.sort_unstable();
        ids
    });

    assert!(results[0].is_empty());
    // particle 3 appears twice: once through the interior face, once as
    // the wrapped image that sits exactly at its type's reach
    assert_eq!(results[1], vec![1, 3, 3]);
}
