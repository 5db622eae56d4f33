//! Single-threaded end-to-end scenarios.

#![cfg(not(loom))]

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use splitmap::{SplitOrderedMap, MAX_ID};

fn val(x: u64) -> *mut () {
    (0x1000 + x as usize * 8) as *mut ()
}

#[test]
fn singleton_round_trip() {
    let map = SplitOrderedMap::<()>::new();

    assert!(map.add(1, 0x10 as *mut ()));
    assert!(!map.add(1, 0x11 as *mut ()));
    assert_eq!(map.find(1), Some(0x10 as *mut ()));
    assert_eq!(map.find(2), None);
    assert_eq!(map.find_id_by_value(0x10 as *mut ()), Some(1));
    assert_eq!(map.swap_value(1, 0x20 as *mut ()), Some(0x10 as *mut ()));
    assert_eq!(map.first(), Some((1, 0x20 as *mut ())));
    assert_eq!(map.next_after(1), None);
    assert!(!map.remove(2));
    assert!(map.remove(1));
    assert!(!map.remove(1));

    let stats = map.stats();
    assert_eq!(stats.log_len, 0);
    // the second remove's scan completed the unlink; only the permanent
    // sentinels remain
    assert_eq!(stats.phys_len, 2);
}

#[test]
fn in_then_out_ordered() {
    let map = SplitOrderedMap::<()>::new();
    for id in 0..100 {
        assert!(map.add(id, val(id)));
    }
    for id in (0..100).rev() {
        assert!(map.remove(id));
    }
    assert_eq!(map.len(), 0);
}

#[test]
fn interleaved_parity() {
    let map = SplitOrderedMap::<()>::new();

    // in-then-out prelude
    for id in 0..100 {
        assert!(map.add(id, val(id)));
    }
    for id in (0..100).rev() {
        assert!(map.remove(id));
    }
    assert_eq!(map.len(), 0);

    // descending refill of the upper half
    for id in (100..200).rev() {
        assert!(map.add(id, val(id)));
    }
    for id in 0..200 {
        if id < 100 {
            assert_eq!(map.find(id), None);
        } else {
            assert_eq!(map.find(id), Some(val(id)));
        }
    }

    // refill the lower half, then confirm the upper half rejects dups
    for id in 0..100 {
        assert!(map.add(id, val(id)));
    }
    for id in 100..200 {
        assert!(!map.add(id, val(id)));
    }
    assert_eq!(map.len(), 200);

    // retag every visited entry through the iterator
    let mut visited = 0;
    for (id, _value) in map.iter() {
        assert_eq!(map.swap_value(id, val(id + 1000)), Some(val(id)));
        visited += 1;
    }
    assert_eq!(visited, 200);

    // reverse-lookup the odd ids and drop them
    let mut id = 199;
    loop {
        assert_eq!(map.find_id_by_value(val(id + 1000)), Some(id));
        assert!(map.remove(id));
        if id == 1 {
            break;
        }
        id -= 2;
    }
    for id in 0..200 {
        if id % 2 == 1 {
            assert_eq!(map.find(id), None);
        } else {
            assert_eq!(map.find(id), Some(val(id + 1000)));
        }
    }
    assert_eq!(map.len(), 100);
}

#[test]
fn random_mixed_workload() {
    const IDS: u64 = 10_000;

    let map = SplitOrderedMap::<()>::new();
    let mut rng = StdRng::seed_from_u64(0x5EED);

    // Each id runs a fixed ten-step script; scripts of different ids are
    // interleaved at random.
    let run_step = |id: u64, step: u8| match step {
        0 => assert!(map.add(id, val(id))),
        1 => assert_eq!(map.find(id), Some(val(id))),
        2 => assert_eq!(map.find_id_by_value(val(id)), Some(id)),
        3 => assert!(map.remove(id)),
        4 => assert_eq!(map.find(id), None),
        5 => assert!(!map.remove(id)),
        6 => assert!(map.add(id, val(id + IDS))),
        7 => assert_eq!(map.find(id), Some(val(id + IDS))),
        8 => assert!(!map.add(id, val(id))),
        9 => assert!(map.remove(id)),
        _ => unreachable!(),
    };

    let mut next_step = vec![0u8; IDS as usize];
    let mut runnable: Vec<u64> = (0..IDS).collect();
    while !runnable.is_empty() {
        let pick = rng.gen_range(0..runnable.len());
        let id = runnable[pick];
        let step = next_step[id as usize];
        next_step[id as usize] += 1;
        if step == 9 {
            runnable.swap_remove(pick);
        }
        run_step(id, step);
    }

    let stats = map.stats();
    assert_eq!(stats.log_len, 0);
    assert_eq!(stats.insertions, 2 * IDS);
    assert_eq!(stats.insertion_failures, IDS);
    assert_eq!(stats.deletion_starts, 2 * IDS);
    assert_eq!(stats.deletion_failures, IDS);
    assert_eq!(stats.searches, 3 * IDS);
    assert_eq!(stats.successful_searches, 2 * IDS);
    assert_eq!(stats.failed_searches, IDS);
    assert_eq!(stats.value_searches, IDS);
    // every node ever allocated is in the list (sentinels, leftover marked
    // nodes) or in the pool; nothing has been freed yet
    assert_eq!(stats.nodes_freed, 0);
    assert_eq!(
        stats.nodes_allocated,
        stats.phys_len + stats.pool_len as u64
    );
}

#[test]
fn round_trip_laws() {
    let map = SplitOrderedMap::<()>::new();
    for id in [0, 1, 2, 1023, 99_999, MAX_ID / 2, MAX_ID] {
        assert!(map.add(id, val(1)));
        assert_eq!(map.find(id), Some(val(1)));
        assert_eq!(map.swap_value(id, val(2)), Some(val(1)));
        assert_eq!(map.find(id), Some(val(2)));
        assert!(map.remove(id));
        assert_eq!(map.find(id), None);
    }
}

#[test]
fn find_after_swap_sees_latest() {
    let map = SplitOrderedMap::<()>::new();
    assert!(map.add(7, val(0)));
    for round in 1..50 {
        assert_eq!(map.swap_value(7, val(round)), Some(val(round - 1)));
        assert_eq!(map.find(7), Some(val(round)));
    }
}

#[test]
fn iteration_covers_every_live_entry() {
    let map = SplitOrderedMap::<()>::new();
    for id in 0..64 {
        assert!(map.add(id, val(id)));
    }
    for id in (0..64).step_by(3) {
        assert!(map.remove(id));
    }

    let mut seen: Vec<u64> = map.iter().map(|(id, _)| id).collect();
    seen.sort_unstable();
    let expected: Vec<u64> = (0..64).filter(|id| id % 3 != 0).collect();
    assert_eq!(seen, expected);
}

#[test]
fn churn_recycles_nodes_through_the_pool() {
    let map = SplitOrderedMap::<()>::new();
    // repeated fill/drain cycles must reuse retired nodes instead of
    // allocating fresh ones every round
    for round in 0..20 {
        for id in 0..50 {
            assert!(map.add(id, val(id + round)));
        }
        for id in 0..50 {
            assert!(map.remove(id));
        }
    }
    let stats = map.stats();
    assert!(stats.nodes_drawn_from_pool > 0);
    // 20 rounds of 50 inserts plus guards would need thousands of nodes
    // without reuse
    assert!(stats.nodes_allocated < stats.nodes_added_to_pool);
    assert_eq!(
        stats.nodes_allocated,
        stats.phys_len + stats.pool_len as u64
    );
}

#[test]
fn dump_list_reports_every_node() {
    let map = SplitOrderedMap::<()>::new();
    map.add(1, 0x10 as *mut ());
    map.add(2, 0x20 as *mut ());
    map.remove(2);

    let mut out = Vec::new();
    map.dump_list(&mut out).unwrap();
    let text = String::from_utf8(out).unwrap();

    assert!(text.contains("logical length: 1"));
    assert!(text.contains("id 1"));
    // id 2 is marked but still linked; the dump shows it as such
    assert!(text.contains("id 2"));
    assert!(text.contains("(marked)"));
    assert!(text.contains("sentinel hash 0x0"));
}

#[test]
fn absent_lookups_leave_no_trace() {
    let map = SplitOrderedMap::<()>::new();
    for id in 0..32 {
        assert!(map.add(id, val(id)));
    }
    let before = map.stats();
    assert_eq!(map.find(1_000_000), None);
    assert_eq!(map.swap_value(1_000_000, val(1)), None);
    assert_eq!(map.find_id_by_value(0xDEAD as *mut ()), None);
    assert!(!map.remove(1_000_000));
    let after = map.stats();
    assert_eq!(before.log_len, after.log_len);
    assert_eq!(before.insertions, after.insertions);
    assert_eq!(after.failed_searches, before.failed_searches + 1);
    assert_eq!(after.failed_value_swaps, before.failed_value_swaps + 1);
    assert_eq!(after.failed_value_searches, before.failed_value_searches + 1);
    assert_eq!(after.deletion_failures, before.deletion_failures + 1);
}

#[test]
fn stats_identities_after_quiescence() {
    let map = SplitOrderedMap::<()>::new();
    for id in 0..500 {
        assert!(map.add(id, val(id)));
    }
    for id in 200..500 {
        assert!(map.remove(id));
    }
    let stats = map.stats();
    assert_eq!(stats.insertions - stats.deletion_starts, stats.log_len);
    assert_eq!(stats.log_len, 200);
    assert_eq!(
        stats.nodes_allocated,
        stats.phys_len + stats.pool_len as u64
    );
    assert_eq!(stats.buckets_defined, 1 << stats.index_bits);
    assert!(stats.buckets_initialized <= stats.buckets_defined);
    assert!(stats.max_log_len >= 500);
}
