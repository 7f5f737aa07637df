mod util;

use comm_pattern::prelude::*;
use util::{gid_field, ring_layout, ring_pattern, run_ranks, value_at};

#[test]
fn owner_update_reaches_both_neighbours() {
    let results = run_ranks(4, |comm| {
        let mut pattern = ring_pattern(comm, CommPatternConfig::default());
        if comm.rank() == 0 {
            pattern.field_mut("u").unwrap().row_mut::<f64>(0).unwrap()[0] = 42.0;
        }
        let report = pattern.synchronize("u").unwrap();
        let (gids, _) = ring_layout(comm.rank(), 4);
        let values: Vec<f64> = gids.iter().map(|&g| value_at(&pattern, "u", g)).collect();
        (report, values, pattern.field("u").unwrap().needs_update())
    });

    // rank 1 ghosts gid 0 at local index 3, rank 3 at local index 2
    assert_eq!(results[1].1[3], 42.0);
    assert_eq!(results[3].1[2], 42.0);
    // unrelated ghosts were refreshed from their owners as well
    assert_eq!(results[2].1, vec![4.0, 5.0, 6.0, 2.0]);
    assert_eq!(results[0].1, vec![42.0, 1.0, 2.0, 6.0]);

    for (report, _, dirty) in &results {
        assert_eq!(report.fields_exchanged, 1);
        assert_eq!(report.bytes_sent, 2 * 8);
        assert_eq!(report.bytes_received, 2 * 8);
        assert!(!dirty);
    }
}

#[test]
fn field_clean_everywhere_moves_nothing() {
    let results = run_ranks(4, |comm| {
        let mut pattern = ring_pattern(comm, CommPatternConfig::default());
        pattern.field_mut("u").unwrap().mark_dirty();
        pattern.synchronize("u").unwrap();

        // change an owned value but drop the dirty flag
        let u = pattern.field_mut("u").unwrap();
        u.row_mut::<f64>(0).unwrap()[0] = 7.0;
        u.clear_update();
        let report = pattern.synchronize("u").unwrap();
        let next_first = 2 * ((comm.rank() + 1) % 4) as u64;
        (report, value_at(&pattern, "u", next_first))
    });
    for (r, (report, ghost)) in results.iter().enumerate() {
        assert_eq!(*report, SyncReport::default());
        assert_eq!(*ghost, 2.0 * ((r + 1) % 4) as f64, "rank {r} ghost was touched");
    }
}

#[test]
fn ghost_writes_are_overwritten_by_owner_values() {
    let results = run_ranks(3, |comm| {
        let mut pattern = ring_pattern(comm, CommPatternConfig::default());
        for lid in pattern.ghost_indices() {
            pattern.field_mut("u").unwrap().set_row(lid, &[-99.0]).unwrap();
        }
        pattern.synchronize("u").unwrap();
        let (gids, _) = ring_layout(comm.rank(), 3);
        gids.iter()
            .map(|&g| value_at(&pattern, "u", g))
            .collect::<Vec<_>>()
    });
    for (r, values) in results.iter().enumerate() {
        let (gids, _) = ring_layout(r, 3);
        let want: Vec<f64> = gids.iter().map(|&g| g as f64).collect();
        assert_eq!(values, &want);
    }
}

#[test]
fn mixed_types_and_strides() {
    let results = run_ranks(4, |comm| {
        let mut pattern = ring_pattern(comm, CommPatternConfig::default());
        let n = pattern.size();
        pattern
            .register_field(WrappedField::zeros::<i64>("v", 2, n).unwrap())
            .unwrap();
        pattern
            .register_field(WrappedField::zeros::<u32>("w", 1, n).unwrap())
            .unwrap();
        pattern
            .register_field(WrappedField::zeros::<f32>("x", 3, n).unwrap())
            .unwrap();

        for lid in pattern.owned_indices() {
            let g = pattern.gid(lid).unwrap();
            pattern
                .field_mut("v")
                .unwrap()
                .set_row(lid, &[g as i64, -(g as i64)])
                .unwrap();
            pattern
                .field_mut("w")
                .unwrap()
                .set_row(lid, &[3 * g as u32])
                .unwrap();
            pattern
                .field_mut("x")
                .unwrap()
                .set_row(lid, &[g as f32, 0.5, -(g as f32)])
                .unwrap();
        }
        let report = pattern.synchronize_all().unwrap();

        let mut ok = true;
        for lid in 0..n {
            let g = pattern.gid(lid).unwrap();
            ok &= pattern.field("v").unwrap().row::<i64>(lid).unwrap() == [g as i64, -(g as i64)];
            ok &= pattern.field("w").unwrap().row::<u32>(lid).unwrap() == [3 * g as u32];
            ok &= pattern.field("x").unwrap().row::<f32>(lid).unwrap()
                == [g as f32, 0.5, -(g as f32)];
        }
        (report, ok)
    });
    for (report, ok) in results {
        assert!(ok);
        // "u" stayed clean everywhere
        assert_eq!(report.fields_exchanged, 3);
        assert_eq!(report.bytes_sent, 2 * (16 + 4 + 12));
    }
}

#[test]
fn selected_fields_only() {
    let results = run_ranks(3, |comm| {
        let mut pattern = ring_pattern(comm, CommPatternConfig::default());
        let n = pattern.size();
        pattern
            .register_field(WrappedField::zeros::<f64>("p", 1, n).unwrap())
            .unwrap();
        pattern.field_mut("u").unwrap().mark_dirty();
        pattern.field_mut("p").unwrap().mark_dirty();
        let report = pattern.synchronize_fields(&["p"]).unwrap();
        (
            report.fields_exchanged,
            pattern.field("u").unwrap().needs_update(),
            pattern.field("p").unwrap().needs_update(),
        )
    });
    assert!(results.iter().all(|r| *r == (1, true, false)));
}

#[test]
fn synchronize_requires_a_resolved_pattern() {
    let comm = NoComm;
    let mut pattern = CommPattern::new(&comm, CommPatternConfig::default());
    assert!(matches!(
        pattern.synchronize("u"),
        Err(CommPatternError::IllegalOperation { op: "synchronize", .. })
    ));

    pattern.register_gid_field(gid_field(&[1]), &[0]).unwrap();
    pattern
        .register_field(WrappedField::zeros::<f64>("u", 1, 1).unwrap())
        .unwrap();
    assert!(pattern.synchronize_all().is_err());

    pattern.setup().unwrap();
    pattern.synchronize("u").unwrap();
    assert!(matches!(
        pattern.synchronize("nope"),
        Err(CommPatternError::UnknownField(_))
    ));

    pattern.add(2, 0).unwrap();
    assert!(pattern.synchronize("u").is_err());
}

#[test]
fn resynchronizes_after_restructuring() {
    let results = run_ranks(4, |comm| {
        let mut pattern = ring_pattern(comm, CommPatternConfig::default());
        // rank 2 hands its first entity to rank 3, which already ghosts it
        if comm.rank() == 2 {
            pattern.move_entity(4, 3, false).unwrap();
        }
        pattern.setup().unwrap();
        if comm.rank() == 3 {
            let lid = pattern.local_index(4).unwrap();
            pattern.field_mut("u").unwrap().set_row(lid, &[400.0]).unwrap();
        }
        pattern.synchronize("u").unwrap();
        pattern.local_index(4).map(|lid| {
            (
                pattern.owner(lid).unwrap(),
                value_at(&pattern, "u", 4),
            )
        })
    });
    assert_eq!(results[0], None);
    assert_eq!(results[1], Some((3, 400.0)));
    assert_eq!(results[2], None);
    assert_eq!(results[3], Some((3, 400.0)));
}
