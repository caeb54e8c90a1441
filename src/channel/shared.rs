//! Shared-end wrappers over the rendezvous core.
//!
//! A shared end is a cloneable handle whose operations are serialized by a
//! claim mutex held across the entire rendezvous, so a second writer
//! arriving before the first's reader departs waits at the claim rather
//! than corrupting the slot. Shared inputs are not selectable (only the
//! single reader of [`any2one`] keeps the input guard), and extended
//! rendezvous stays a one-to-one input capability.

use std::sync::{Arc, Mutex};

use crate::channel::rendezvous::{one2one, one2one_poisonable, ChanIn, ChanOut, Core};
use crate::cx::Cx;
use crate::error::Result;

/// Creates a many-writer, one-reader channel. The reader end is the plain
/// selectable [`ChanIn`].
#[must_use]
pub fn any2one<T: Send>() -> (SharedChanOut<T>, ChanIn<T>) {
    let (tx, rx) = one2one();
    (SharedChanOut::wrap(tx), rx)
}

/// Creates a many-writer, one-reader channel forwarding poison stronger
/// than `immunity`.
#[must_use]
pub fn any2one_poisonable<T: Send>(immunity: u32) -> (SharedChanOut<T>, ChanIn<T>) {
    let (tx, rx) = one2one_poisonable(immunity);
    (SharedChanOut::wrap(tx), rx)
}

/// Creates a one-writer, many-reader channel.
#[must_use]
pub fn one2any<T: Send>() -> (ChanOut<T>, SharedChanIn<T>) {
    let (tx, rx) = one2one();
    (tx, SharedChanIn::wrap(rx))
}

/// Creates a many-writer, many-reader channel.
#[must_use]
pub fn any2any<T: Send>() -> (SharedChanOut<T>, SharedChanIn<T>) {
    let (tx, rx) = one2one();
    (SharedChanOut::wrap(tx), SharedChanIn::wrap(rx))
}

/// Cloneable writing end; writers take turns for whole rendezvous at a time.
#[derive(Debug)]
pub struct SharedChanOut<T> {
    core: Arc<Core<T>>,
    claim: Arc<Mutex<()>>,
}

impl<T> Clone for SharedChanOut<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
            claim: Arc::clone(&self.claim),
        }
    }
}

impl<T: Send> SharedChanOut<T> {
    fn wrap(end: ChanOut<T>) -> Self {
        Self {
            core: Arc::clone(end.core()),
            claim: Arc::new(Mutex::new(())),
        }
    }

    /// Writes `value`, blocking until a reader commits. Concurrent writers
    /// queue on the claim; a queued writer is released when the claim
    /// holder's rendezvous finishes (including by poison or cancellation).
    pub fn write(&self, cx: &Cx, value: T) -> Result<()> {
        let _claim = self.claim.lock().expect("channel claim poisoned");
        self.core.write(cx, value)
    }

    /// Injects poison of the given strength; does not wait for the claim.
    pub fn poison(&self, strength: u32) {
        self.core.poison(strength);
    }
}

/// Cloneable reading end; readers take turns for whole rendezvous at a time.
#[derive(Debug)]
pub struct SharedChanIn<T> {
    core: Arc<Core<T>>,
    claim: Arc<Mutex<()>>,
}

impl<T> Clone for SharedChanIn<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
            claim: Arc::clone(&self.claim),
        }
    }
}

impl<T: Send> SharedChanIn<T> {
    fn wrap(end: ChanIn<T>) -> Self {
        Self {
            core: Arc::clone(end.core()),
            claim: Arc::new(Mutex::new(())),
        }
    }

    /// Reads a value, blocking until a writer arrives.
    pub fn read(&self, cx: &Cx) -> Result<T> {
        let _claim = self.claim.lock().expect("channel claim poisoned");
        self.core.read(cx)
    }

    /// Returns true if a `read` would complete without blocking.
    #[must_use]
    pub fn pending(&self) -> bool {
        self.core.pending()
    }

    /// Injects poison of the given strength; does not wait for the claim.
    pub fn poison(&self, strength: u32) {
        self.core.poison(strength);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;
    use std::collections::BTreeSet;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn many_writers_one_reader_loses_nothing() {
        init_test("many_writers_one_reader_loses_nothing");
        let (tx, mut rx) = any2one::<u32>();
        let cx = Cx::for_testing();

        let mut writers = Vec::new();
        for i in 0..4u32 {
            let tx = tx.clone();
            let cx = cx.clone();
            writers.push(std::thread::spawn(move || tx.write(&cx, i)));
        }

        let mut seen = BTreeSet::new();
        for _ in 0..4 {
            seen.insert(rx.read(&cx).expect("read failed"));
        }
        for writer in writers {
            writer
                .join()
                .expect("writer thread failed")
                .expect("write failed");
        }
        let expected: BTreeSet<u32> = (0..4).collect();
        crate::assert_with_log!(seen == expected, "all values delivered", expected, seen);
        crate::test_complete!("many_writers_one_reader_loses_nothing");
    }

    #[test]
    fn many_readers_split_the_stream() {
        init_test("many_readers_split_the_stream");
        let (mut tx, rx) = one2any::<u32>();
        let cx = Cx::for_testing();

        let mut readers = Vec::new();
        for _ in 0..3 {
            let rx = rx.clone();
            let cx = cx.clone();
            readers.push(std::thread::spawn(move || rx.read(&cx)));
        }

        for i in 10..13 {
            tx.write(&cx, i).expect("write failed");
        }
        let mut seen = BTreeSet::new();
        for reader in readers {
            seen.insert(
                reader
                    .join()
                    .expect("reader thread failed")
                    .expect("read failed"),
            );
        }
        let expected: BTreeSet<u32> = (10..13).collect();
        crate::assert_with_log!(seen == expected, "each value read once", expected, seen);
        crate::test_complete!("many_readers_split_the_stream");
    }

    #[test]
    fn poison_crosses_the_shared_wrapper() {
        init_test("poison_crosses_the_shared_wrapper");
        let (tx, rx) = any2one_poisonable::<u32>(1);
        let cx = Cx::for_testing();
        tx.poison(2);
        let mut rx = rx;
        let err = rx.read(&cx).expect_err("expected poison");
        assert_eq!(err.poison_strength(), Some(2));
        crate::test_complete!("poison_crosses_the_shared_wrapper");
    }
}
