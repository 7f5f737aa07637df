#![allow(dead_code)]
use comm_pattern::prelude::*;

/// Run `f` once per rank of a fresh `n`-rank [`RayonComm`] world, each rank on
/// its own thread, and collect the results in rank order.
pub fn run_ranks<T, F>(n: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(&RayonComm) -> T + Sync,
{
    let world = RayonComm::world(n);
    let f = &f;
    std::thread::scope(|s| {
        let handles: Vec<_> = world.iter().map(|comm| s.spawn(move || f(comm))).collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("rank thread panicked"))
            .collect()
    })
}

pub fn gid_field(gids: &[u64]) -> WrappedField {
    WrappedField::new("gid", 1, gids.to_vec()).unwrap()
}

/// Ring layout on `size >= 3` ranks: rank `r` owns gids `2r` and `2r+1` and
/// ghosts the first entity of each neighbour. Local order is
/// `[2r, 2r+1, first(next), first(prev)]`.
pub fn ring_layout(rank: usize, size: usize) -> (Vec<u64>, Vec<usize>) {
    let next = (rank + 1) % size;
    let prev = (rank + size - 1) % size;
    let gids = vec![
        2 * rank as u64,
        2 * rank as u64 + 1,
        2 * next as u64,
        2 * prev as u64,
    ];
    (gids, vec![rank, rank, next, prev])
}

/// Ring pattern, resolved, with an `f64` field "u" holding the gid on owned
/// rows and -1 on ghosts.
pub fn ring_pattern(comm: &RayonComm, config: CommPatternConfig) -> CommPattern<'_, RayonComm> {
    let (gids, owners) = ring_layout(comm.rank(), comm.size());
    let mut pattern = CommPattern::new(comm, config);
    pattern.setup_with(gid_field(&gids), &owners).unwrap();
    let u: Vec<f64> = gids
        .iter()
        .zip(&owners)
        .map(|(&g, &o)| if o == comm.rank() { g as f64 } else { -1.0 })
        .collect();
    pattern
        .register_field(WrappedField::new("u", 1, u).unwrap())
        .unwrap();
    pattern
}

/// Value of scalar field `name` at the local copy of `gid`.
pub fn value_at<C: Communicator>(pattern: &CommPattern<'_, C>, name: &str, gid: u64) -> f64 {
    let lid = pattern.local_index(gid).expect("gid not held locally");
    pattern.field(name).unwrap().row::<f64>(lid).unwrap()[0]
}
