mod util;

use comm_pattern::prelude::*;
use util::{gid_field, ring_layout, ring_pattern, run_ranks};

fn barrier_free() -> CommPatternConfig {
    CommPatternConfig {
        barrier_after_setup: false,
        ..CommPatternConfig::default()
    }
}

#[test]
fn ring_schedule_on_four_ranks() {
    let schedules = run_ranks(4, |comm| {
        let pattern = ring_pattern(comm, CommPatternConfig::default());
        assert_eq!(pattern.state(), PatternState::Ready);
        assert_eq!(pattern.owned_indices(), vec![0, 1]);
        assert_eq!(pattern.ghost_indices(), vec![2, 3]);
        assert_eq!(pattern.updatable_flags(), vec![true, true, false, false]);
        pattern.validate_invariants().unwrap();
        pattern.schedule().clone()
    });

    // rank 0 sends its first entity to both neighbours, one row each
    let s0 = &schedules[0];
    assert_eq!(s0.send_to(1), &[0]);
    assert_eq!(s0.send_to(3), &[0]);
    assert!(s0.send_to(2).is_empty());
    assert_eq!(s0.recv_from(1), &[2]);
    assert_eq!(s0.recv_from(3), &[3]);
    assert_eq!(s0.neighbors(), vec![1, 3]);
}

#[test]
fn send_and_recv_counts_are_symmetric() {
    for size in [3, 4, 5] {
        let counts = run_ranks(size, |comm| {
            let pattern = ring_pattern(comm, CommPatternConfig::default());
            (
                pattern.schedule().send_counts().to_vec(),
                pattern.schedule().recv_counts().to_vec(),
            )
        });
        for r in 0..size {
            for p in 0..size {
                assert_eq!(counts[r].0[p], counts[p].1[r], "size {size}: {r} -> {p}");
            }
        }
    }
}

#[test]
fn setup_with_nothing_queued_keeps_the_schedule() {
    let results = run_ranks(4, |comm| {
        let mut pattern = ring_pattern(comm, CommPatternConfig::default());
        let before = pattern.schedule().clone();
        let gids = pattern.gids().to_vec();
        pattern.setup().unwrap();
        (before, pattern.schedule().clone(), gids, pattern.gids().to_vec())
    });
    for (r, (before, after, gids_before, gids_after)) in results.iter().enumerate() {
        assert_eq!(before, after, "rank {r}");
        assert_eq!(gids_before, gids_after, "rank {r}");
    }
}

#[test]
fn every_entity_is_updatable_on_exactly_one_rank() {
    let size = 5;
    let held = run_ranks(size, |comm| {
        let pattern = ring_pattern(comm, CommPatternConfig::default());
        (0..pattern.size())
            .map(|lid| {
                (
                    pattern.gid(lid).unwrap(),
                    pattern.is_updatable(lid).unwrap(),
                )
            })
            .collect::<Vec<_>>()
    });
    let mut updatable_on: std::collections::BTreeMap<u64, usize> = Default::default();
    for (gid, updatable) in held.iter().flatten() {
        let n = updatable_on.entry(*gid).or_default();
        if *updatable {
            *n += 1;
        }
    }
    assert_eq!(updatable_on.len(), 2 * size);
    for (gid, n) in updatable_on {
        assert_eq!(n, 1, "gid {gid} is updatable on {n} ranks");
    }
}

#[test]
fn recv_map_groups_ghosts_by_owner() {
    // rank 0 owns 0..4; rank 1 ghosts them in scrambled local order
    let maps = run_ranks(2, |comm| {
        let (gids, owners): (Vec<u64>, Vec<usize>) = if comm.rank() == 0 {
            (vec![0, 1, 2, 3], vec![0; 4])
        } else {
            (vec![3, 10, 1, 0, 2], vec![0, 1, 0, 0, 0])
        };
        let mut pattern = CommPattern::new(comm, CommPatternConfig::default());
        pattern.setup_with(gid_field(&gids), &owners).unwrap();
        pattern.schedule().clone()
    });
    assert_eq!(maps[1].recv_from(0), &[0, 2, 3, 4]);
    // owner answers in the order the ghosts were requested: gids 3, 1, 0, 2
    assert_eq!(maps[0].send_to(1), &[3, 1, 0, 2]);
}

#[test]
fn lookup_strategies_agree() {
    let hashed = run_ranks(4, |comm| {
        ring_pattern(comm, CommPatternConfig::default())
            .schedule()
            .clone()
    });
    let scanned = run_ranks(4, |comm| {
        let config = CommPatternConfig {
            lookup: GidLookup::LinearScan,
            ..CommPatternConfig::default()
        };
        ring_pattern(comm, config).schedule().clone()
    });
    assert_eq!(hashed, scanned);
}

#[test]
fn local_indices_follow_gid_field_order() {
    run_ranks(3, |comm| {
        let (gids, owners) = ring_layout(comm.rank(), 3);
        let mut pattern = CommPattern::new(comm, CommPatternConfig::default());
        pattern.setup_with(gid_field(&gids), &owners).unwrap();
        for (lid, &gid) in gids.iter().enumerate() {
            assert_eq!(pattern.local_index(gid), Some(lid));
            assert_eq!(pattern.gid(lid).unwrap(), gid);
            assert_eq!(pattern.owner(lid).unwrap(), owners[lid]);
        }
        assert_eq!(pattern.local_index(1000), None);
    });
}

#[test]
fn serial_pattern_has_empty_schedule() {
    let comm = NoComm;
    let mut pattern = CommPattern::new(&comm, CommPatternConfig::default());
    pattern
        .setup_with(gid_field(&[5, 6, 7]), &[0, 0, 0])
        .unwrap();
    assert!(pattern.schedule().is_empty());
    assert_eq!(pattern.size(), 3);
    assert!(pattern.ghost_indices().is_empty());
}

#[test]
fn lifecycle_states() {
    let comm = NoComm;
    let mut pattern = CommPattern::new(&comm, CommPatternConfig::default());
    assert_eq!(pattern.state(), PatternState::Uninitialized);
    assert!(matches!(
        pattern.setup(),
        Err(CommPatternError::IllegalOperation { op: "setup", .. })
    ));

    pattern.register_gid_field(gid_field(&[1]), &[0]).unwrap();
    assert_eq!(pattern.state(), PatternState::Dirty);
    pattern.setup().unwrap();
    assert_eq!(pattern.state(), PatternState::Ready);

    pattern.add(2, 0).unwrap();
    assert_eq!(pattern.state(), PatternState::Dirty);
    assert_eq!(pattern.pending().adds, 1);
    // queued adds are invisible until resolution
    assert_eq!(pattern.local_index(2), None);
    pattern.setup().unwrap();
    assert_eq!(pattern.local_index(2), Some(1));
    assert_eq!(pattern.pending(), Default::default());
}

#[test]
fn gid_field_is_validated() {
    let comm = NoComm;
    let mut pattern = CommPattern::new(&comm, CommPatternConfig::default());
    let real = WrappedField::new("gid", 1, vec![1.0f64]).unwrap();
    assert!(matches!(
        pattern.setup_with(real, &[0]),
        Err(CommPatternError::TypeMismatch { expected: DataType::Uint, .. })
    ));
    let strided = WrappedField::new("gid", 2, vec![1u64, 2]).unwrap();
    assert!(matches!(
        pattern.setup_with(strided, &[0]),
        Err(CommPatternError::StrideMismatch { .. })
    ));
    assert!(matches!(
        pattern.setup_with(gid_field(&[1, 2]), &[0]),
        Err(CommPatternError::FieldSizeMismatch { .. })
    ));
    assert!(matches!(
        pattern.setup_with(gid_field(&[1]), &[4]),
        Err(CommPatternError::InvalidRank { rank: 4, size: 1 })
    ));
    assert_eq!(
        pattern.setup_with(gid_field(&[3, 3]), &[0, 0]),
        Err(CommPatternError::DuplicateGlobalId(3))
    );
    assert_eq!(pattern.state(), PatternState::Uninitialized);
}

#[test]
fn ghost_of_unknown_entity_is_not_found_on_owner() {
    let results = run_ranks(2, |comm| {
        let (gids, owners): (Vec<u64>, Vec<usize>) = if comm.rank() == 0 {
            (vec![0], vec![0])
        } else {
            (vec![1, 99], vec![1, 0])
        };
        let mut pattern = CommPattern::new(comm, barrier_free());
        pattern.setup_with(gid_field(&gids), &owners)
    });
    assert_eq!(
        results[0],
        Err(CommPatternError::NotFound { gid: 99, rank: 0 })
    );
    assert_eq!(results[1], Ok(()));
}

#[test]
fn ghost_requested_from_non_owner_is_rejected() {
    // each rank believes the other owns gid 7
    let results = run_ranks(2, |comm| {
        let other = 1 - comm.rank();
        let mut pattern = CommPattern::new(comm, barrier_free());
        pattern.setup_with(gid_field(&[7]), &[other])
    });
    assert_eq!(
        results[0],
        Err(CommPatternError::NotOwner { gid: 7, rank: 0, owner: 1 })
    );
    assert_eq!(
        results[1],
        Err(CommPatternError::NotOwner { gid: 7, rank: 1, owner: 0 })
    );
}

#[test]
fn validation_after_setup_can_be_forced() {
    run_ranks(3, |comm| {
        let config = CommPatternConfig {
            validate_after_setup: true,
            ..CommPatternConfig::default()
        };
        let pattern = ring_pattern(comm, config);
        assert!(pattern.is_ready());
    });
}
