//! Rendezvous channel conformance: exclusivity, extended rendezvous
//! ordering, and the poison threshold.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;

use cspkit::test_utils::init_test_logging;
use cspkit::{one2one, one2one_poisonable, Cx, Error};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Every write is matched to exactly one read, in order, with no value
    /// observed twice or dropped, across randomized interleavings.
    #[test]
    fn writes_match_reads_exactly(
        values in proptest::collection::vec(any::<u32>(), 1..1000),
        writer_yields in proptest::collection::vec(any::<bool>(), 1..64),
        reader_yields in proptest::collection::vec(any::<bool>(), 1..64),
    ) {
        init_test_logging();
        let cx = Cx::for_testing();
        let (mut tx, mut rx) = one2one::<u32>();

        let sent = values.clone();
        let writer_cx = cx.clone();
        let writer = std::thread::spawn(move || {
            for (i, value) in sent.into_iter().enumerate() {
                if writer_yields[i % writer_yields.len()] {
                    std::thread::yield_now();
                }
                tx.write(&writer_cx, value)?;
            }
            Ok::<_, Error>(())
        });

        let mut received = Vec::with_capacity(values.len());
        for i in 0..values.len() {
            if reader_yields[i % reader_yields.len()] {
                std::thread::yield_now();
            }
            received.push(rx.read(&cx).expect("read failed"));
        }
        writer
            .join()
            .expect("writer thread failed")
            .expect("write failed");
        prop_assert_eq!(received, values);
    }
}

/// The writer's `write` must not return until the reader's matching
/// `end_read`, even though `start_read` handed the value over earlier.
#[test]
fn write_returns_only_after_end_read() {
    init_test_logging();
    cspkit::test_phase!("write_returns_only_after_end_read");
    let cx = Cx::for_testing();
    let (mut tx, mut rx) = one2one::<u32>();
    let write_returned = Arc::new(AtomicBool::new(false));

    let writer_cx = cx.clone();
    let writer_flag = Arc::clone(&write_returned);
    let writer = std::thread::spawn(move || {
        tx.write(&writer_cx, 42)?;
        writer_flag.store(true, Ordering::SeqCst);
        Ok::<_, Error>(())
    });

    let got = rx.start_read(&cx).expect("start_read failed");
    cspkit::assert_with_log!(got == 42, "claimed value", 42u32, got);

    // The value is in hand, but the writer must still be parked.
    std::thread::sleep(Duration::from_millis(50));
    assert!(
        !write_returned.load(Ordering::SeqCst),
        "write returned before end_read"
    );

    rx.end_read().expect("end_read failed");
    writer
        .join()
        .expect("writer thread failed")
        .expect("write failed");
    assert!(write_returned.load(Ordering::SeqCst));
    cspkit::test_complete!("write_returns_only_after_end_read");
}

/// Immunity 2 shrugs off strengths 1 and 2; strength 3 poisons both ends
/// and carries its strength on the error.
#[test]
fn poison_respects_the_immunity_threshold() {
    init_test_logging();
    cspkit::test_phase!("poison_respects_the_immunity_threshold");
    let cx = Cx::for_testing();
    let (mut tx, mut rx) = one2one_poisonable::<u32>(2);

    rx.poison(1);
    rx.poison(2);
    let writer_cx = cx.clone();
    let writer = std::thread::spawn(move || {
        tx.write(&writer_cx, 7)?;
        Ok::<_, Error>(tx)
    });
    let got = rx.read(&cx).expect("read under weak poison failed");
    cspkit::assert_with_log!(got == 7, "value", 7u32, got);
    let mut tx = writer
        .join()
        .expect("writer thread failed")
        .expect("write under weak poison failed");

    rx.poison(3);
    let err = rx.read(&cx).expect_err("expected poison");
    assert!(err.is_poison(), "got {err}");
    assert_eq!(err.poison_strength(), Some(3));
    let err = tx.write(&cx, 8).expect_err("expected poison");
    assert!(err.is_poison(), "got {err}");
    assert_eq!(err.poison_strength(), Some(3));
    cspkit::test_complete!("poison_respects_the_immunity_threshold");
}
