use pstamp::{Pstamp, PstampRing};

#[test]
fn overflow_window_and_causes() {
    let mut ring = PstampRing::new(4);
    let mut causes = Vec::new();
    let mut cause = Pstamp::capture(0);
    for point in 1..=6u32 {
        causes.push(cause);
        ring = ring.log(point, &cause);
        cause = Pstamp::capture(point);
    }
    assert_eq!(ring.overflows(), 2);

    let mut seen = Vec::new();
    ring.enumerate(|entry| seen.push(*entry));
    assert_eq!(seen.len(), 4);
    let points: Vec<u32> = seen.iter().map(|e| e.pstamp.point).collect();
    assert_eq!(points, [3, 4, 5, 6]);
    // The two oldest entries were overwritten; the survivors carry the
    // exact cause values passed to log.
    for (entry, cause) in seen.iter().zip(&causes[2..]) {
        assert_eq!(entry.cause, *cause);
    }
    if seen
        .iter()
        .all(|e| e.pstamp.logical_processor == seen[0].pstamp.logical_processor)
    {
        assert!(
            seen.windows(2)
                .all(|w| w[0].pstamp.cycles <= w[1].pstamp.cycles)
        );
    }
}

#[test]
fn extend_redirects_and_inactivates() {
    let first = PstampRing::new(3);
    let cause = Pstamp::capture(0);
    assert!(first.extend(PstampRing::new(8)));
    assert!(!first.extend(PstampRing::new(8)));

    let mut ring = first.clone();
    for point in 1..=7 {
        ring = ring.log(point, &cause);
    }
    assert!(first.is_inactive());
    assert!(!ring.same_segment(&first));
    assert!(ring.same_segment(&first.successor().unwrap()));
    assert_eq!(first.overflows(), 0);
    assert_eq!(ring.overflows(), 0);
    assert!(!first.extend(PstampRing::new(1)));

    let mut points = Vec::new();
    first.enumerate_chain(|e| points.push(e.pstamp.point));
    assert_eq!(points, [1, 2, 3, 4, 5, 6, 7]);
}

#[test]
fn chain_drain_preserves_every_entry() {
    let head = PstampRing::new(2);
    let mid = PstampRing::new(2);
    let tail = PstampRing::new(4);
    assert!(head.extend(mid.clone()));
    assert!(mid.extend(tail));

    let cause = Pstamp::capture(0);
    let mut ring = head.clone();
    for point in 1..=8 {
        ring = ring.log(point, &cause);
    }
    assert!(head.is_inactive());
    assert!(mid.is_inactive());
    assert_eq!(head.overflows() + mid.overflows() + ring.overflows(), 0);

    let mut points = Vec::new();
    head.enumerate_chain(|e| points.push(e.pstamp.point));
    assert_eq!(points, [1, 2, 3, 4, 5, 6, 7, 8]);
}

#[test]
fn concurrent_extend_attaches_exactly_once() {
    let ring = PstampRing::new(4);
    let successes: Vec<bool> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let ring = ring.clone();
                s.spawn(move || ring.extend(PstampRing::new(4)))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    assert_eq!(successes.iter().filter(|&&won| won).count(), 1);
    assert!(ring.is_extended());
}
