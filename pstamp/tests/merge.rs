mod common;

use pstamp::{Pstamp, PstampRing, SpinBarrier, merge, online_cpus, pin_current_thread};
use std::thread;

#[test]
fn merge_interleaves_rings_logged_alternately() {
    let cause = Pstamp::capture(0);
    let mut a = PstampRing::new(8);
    let mut b = PstampRing::new(8);
    for i in 0..4u32 {
        a = a.log(i * 2, &cause);
        b = b.log(i * 2 + 1, &cause);
    }
    let mut points = Vec::new();
    merge(&[a, b], |e| points.push(e.pstamp.point));
    assert_eq!(points, [0, 1, 2, 3, 4, 5, 6, 7]);
}

#[test]
fn merge_walks_successor_chains() {
    let cause = Pstamp::capture(0);
    let head = PstampRing::new(2);
    assert!(head.extend(PstampRing::new(4)));
    let mut a = head.clone();
    for point in [10, 20, 30, 40] {
        a = a.log(point, &cause);
    }
    let mut b = PstampRing::new(4);
    for point in [15, 25] {
        b = b.log(point, &cause);
    }

    let mut points = Vec::new();
    merge(&[head, b], |e| points.push(e.pstamp.point));
    // b's entries were captured after the whole chain, so cycle order puts
    // them last; the chain contributes both segments.
    assert_eq!(points, [10, 20, 30, 40, 15, 25]);
}

#[test]
fn merged_stream_is_globally_ordered() {
    // Two producers interleave through rendezvous rounds so both rings hold
    // entries from overlapping time windows.
    let barrier = SpinBarrier::new(2);
    let rings: Vec<PstampRing> = thread::scope(|s| {
        let handles: Vec<_> = (0..2u32)
            .map(|tid| {
                let barrier = &barrier;
                s.spawn(move || {
                    let mut ring = PstampRing::new(64);
                    let mut cause = Pstamp::capture(tid);
                    for round in 0..16u32 {
                        barrier.wait();
                        for step in 0..3u32 {
                            let point = (tid + 1) * 1000 + round * 10 + step;
                            ring = ring.log(point, &cause);
                            cause = Pstamp::capture(point);
                        }
                    }
                    ring
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let mut merged = Vec::new();
    merge(&rings, |e| merged.push(*e));
    assert_eq!(merged.len(), 96);
    assert!(
        merged
            .windows(2)
            .all(|w| w[0].pstamp.cycles <= w[1].pstamp.cycles)
    );

    // Per-ring relative order survives the merge.
    for ring in &rings {
        let own: Vec<u32> = ring.entries().map(|e| e.pstamp.point).collect();
        let from_merge: Vec<u32> = merged
            .iter()
            .map(|e| e.pstamp.point)
            .filter(|p| own.contains(p))
            .collect();
        assert_eq!(own, from_merge);
    }
}

#[test]
fn per_core_logs_record_their_processor() {
    let cpus = require_os_ok!(online_cpus());
    if cpus.len() < 2 {
        eprintln!("Skipping test: single online cpu");
        return;
    }
    let chosen = [cpus[0], cpus[1]];
    let rings: Option<Vec<PstampRing>> = thread::scope(|s| {
        let handles: Vec<_> = chosen
            .iter()
            .map(|&cpu| {
                s.spawn(move || {
                    if pin_current_thread(&[cpu]).is_err() {
                        return None;
                    }
                    let mut ring = PstampRing::new(256);
                    let cause = Pstamp::capture(0);
                    for point in 0..100u32 {
                        ring = ring.log(point, &cause);
                    }
                    Some(ring)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    let Some(rings) = rings else {
        eprintln!("Skipping test: thread pinning unavailable");
        return;
    };

    for (ring, &cpu) in rings.iter().zip(&chosen) {
        assert!(
            ring.entries()
                .all(|e| e.pstamp.logical_processor == cpu as u32)
        );
    }
    let mut merged = Vec::new();
    merge(&rings, |e| merged.push(*e));
    assert_eq!(merged.len(), 200);
    assert!(
        merged
            .windows(2)
            .all(|w| w[0].pstamp.cycles <= w[1].pstamp.cycles)
    );
}
