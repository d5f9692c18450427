use crate::crypto::Cipher;
use crate::Error;

/// The 48-bit record sequence space. The counter errors out rather than wrap.
const MAX_SEQUENCE: u64 = (1 << 48) - 1;

/// One cipher generation. Holds the cipher state, the write sequence
/// allocator and the receive replay window for that epoch.
pub(crate) struct Epoch {
    number: u16,
    cipher: Box<dyn Cipher>,
    next_write_seq: u64,
    replay: ReplayWindow,
}

impl Epoch {
    pub fn new(number: u16, cipher: Box<dyn Cipher>) -> Self {
        Epoch {
            number,
            cipher,
            next_write_seq: 0,
            replay: ReplayWindow::default(),
        }
    }

    pub fn cipher(&mut self) -> &mut dyn Cipher {
        &mut *self.cipher
    }

    pub fn cipher_ref(&self) -> &dyn Cipher {
        &*self.cipher
    }

    /// Take the next write sequence number. Exhausting the 48-bit space is
    /// an error, the counter must never wrap.
    pub fn allocate_sequence(&mut self) -> Result<u64, Error> {
        if self.next_write_seq > MAX_SEQUENCE {
            return Err(Error::SequenceExhausted);
        }
        let seq = self.next_write_seq;
        self.next_write_seq += 1;
        Ok(seq)
    }

    /// Whether a received sequence number is outside the replay window.
    /// Does not advance the window; only authenticated records do that.
    pub fn replay_check(&self, seq: u64) -> bool {
        self.replay.check(seq)
    }

    /// Record an authenticated sequence number in the replay window.
    pub fn replay_commit(&mut self, seq: u64) {
        self.replay.commit(seq);
    }
}

impl std::fmt::Debug for Epoch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Epoch")
            .field("number", &self.number)
            .field("next_write_seq", &self.next_write_seq)
            .finish()
    }
}

/// Sliding window over recently authenticated sequence numbers. A 64 wide
/// bitmap anchored at the highest accepted sequence number; anything below
/// the window or already marked is a replay.
#[derive(Debug, Default)]
struct ReplayWindow {
    max_seq: u64,
    bitmap: u64,
    any: bool,
}

impl ReplayWindow {
    fn check(&self, seq: u64) -> bool {
        if !self.any {
            return true;
        }
        if seq > self.max_seq {
            return true;
        }
        let offset = self.max_seq - seq;
        if offset >= 64 {
            return false; // behind the window
        }
        self.bitmap & (1 << offset) == 0
    }

    fn commit(&mut self, seq: u64) {
        if !self.any {
            self.any = true;
            self.max_seq = seq;
            self.bitmap = 1;
            return;
        }
        if seq > self.max_seq {
            let shift = seq - self.max_seq;
            self.bitmap = if shift >= 64 { 0 } else { self.bitmap << shift };
            self.bitmap |= 1;
            self.max_seq = seq;
        } else {
            let offset = self.max_seq - seq;
            if offset < 64 {
                self.bitmap |= 1 << offset;
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crypto::NullCipher;

    fn epoch() -> Epoch {
        Epoch::new(0, Box::new(NullCipher))
    }

    #[test]
    fn sequences_are_monotonic() {
        let mut e = epoch();
        assert_eq!(e.allocate_sequence().unwrap(), 0);
        assert_eq!(e.allocate_sequence().unwrap(), 1);
        assert_eq!(e.allocate_sequence().unwrap(), 2);
    }

    #[test]
    fn sequence_space_exhausts_instead_of_wrapping() {
        let mut e = epoch();
        e.next_write_seq = MAX_SEQUENCE;
        assert_eq!(e.allocate_sequence().unwrap(), MAX_SEQUENCE);
        assert!(matches!(
            e.allocate_sequence(),
            Err(Error::SequenceExhausted)
        ));
    }

    #[test]
    fn replay_rejects_duplicates() {
        let mut e = epoch();
        assert!(e.replay_check(0));
        e.replay_commit(0);
        assert!(!e.replay_check(0));

        assert!(e.replay_check(5));
        e.replay_commit(5);
        assert!(!e.replay_check(5));
        assert!(!e.replay_check(0));
    }

    #[test]
    fn replay_accepts_reordered_within_window() {
        let mut e = epoch();
        e.replay_commit(100);
        assert!(e.replay_check(90));
        e.replay_commit(90);
        assert!(!e.replay_check(90));
    }

    #[test]
    fn replay_rejects_behind_window() {
        let mut e = epoch();
        e.replay_commit(1000);
        assert!(!e.replay_check(100));
    }

    #[test]
    fn large_jump_clears_stale_bits() {
        let mut e = epoch();
        e.replay_commit(0);
        e.replay_commit(100);
        // Everything inside the new window is still acceptable.
        assert!(e.replay_check(37));
        assert!(!e.replay_check(100));
        assert!(!e.replay_check(36));
    }

    #[test]
    fn check_does_not_advance_window() {
        let e = {
            let mut e = epoch();
            e.replay_commit(10);
            e
        };
        // Checking the same fresh sequence twice stays acceptable until
        // committed.
        assert!(e.replay_check(11));
        assert!(e.replay_check(11));
    }
}
