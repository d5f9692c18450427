//! Reassembly of one handshake message from out-of-order fragments.

use std::ops::Range;

use crate::message::MessageType;

/// Accumulates fragments of a single handshake message until the declared
/// total length is fully covered. Fragments that disagree with the declared
/// type or length are ignored, as are overlapping re-deliveries of bytes we
/// already have.
pub(crate) struct Reassembler {
    msg_type: MessageType,
    body: Vec<u8>,
    missing: Vec<Range<usize>>,
}

impl Reassembler {
    pub fn new(msg_type: MessageType, total_len: usize) -> Self {
        Reassembler {
            msg_type,
            body: vec![0; total_len],
            // A zero length message still needs its one (empty) fragment,
            // so the initial missing list is never empty.
            missing: vec![0..total_len],
        }
    }

    pub fn msg_type(&self) -> MessageType {
        self.msg_type
    }

    /// Merge one fragment. Inconsistent fragments are dropped silently.
    pub fn contribute(
        &mut self,
        msg_type: MessageType,
        total_len: usize,
        offset: usize,
        data: &[u8],
    ) {
        if msg_type != self.msg_type || total_len != self.body.len() {
            return;
        }
        if offset + data.len() > self.body.len() {
            return;
        }

        let incoming = offset..offset + data.len();
        let mut still_missing = Vec::with_capacity(self.missing.len());

        for gap in self.missing.drain(..) {
            // The zero-length sentinel range is removed by a zero-length
            // fragment at the same offset.
            if gap.is_empty() {
                if !(incoming.is_empty() && incoming.start == gap.start) {
                    still_missing.push(gap);
                }
                continue;
            }

            let overlap_start = gap.start.max(incoming.start);
            let overlap_end = gap.end.min(incoming.end);

            if overlap_start >= overlap_end {
                still_missing.push(gap);
                continue;
            }

            self.body[overlap_start..overlap_end].copy_from_slice(
                &data[overlap_start - incoming.start..overlap_end - incoming.start],
            );

            if gap.start < overlap_start {
                still_missing.push(gap.start..overlap_start);
            }
            if overlap_end < gap.end {
                still_missing.push(overlap_end..gap.end);
            }
        }

        self.missing = still_missing;
    }

    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }

    /// The full body, once every byte is covered.
    pub fn body_if_complete(&self) -> Option<&[u8]> {
        self.is_complete().then_some(&self.body[..])
    }

    /// Forget all contributed fragments, keeping type and length. Used when
    /// a completed previous flight is re-armed for duplicate detection.
    pub fn reset(&mut self) {
        self.missing = vec![0..self.body.len()];
    }
}

impl std::fmt::Debug for Reassembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let missing: usize = self.missing.iter().map(|r| r.len()).sum();
        f.debug_struct("Reassembler")
            .field("msg_type", &self.msg_type)
            .field("total_len", &self.body.len())
            .field("missing_bytes", &missing)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn fragments(body: &[u8], sizes: &[usize]) -> Vec<(usize, Vec<u8>)> {
        let mut out = Vec::new();
        let mut offset = 0;
        for &size in sizes {
            out.push((offset, body[offset..offset + size].to_vec()));
            offset += size;
        }
        assert_eq!(offset, body.len());
        out
    }

    #[test]
    fn in_order_delivery() {
        let body: Vec<u8> = (0..100u8).collect();
        let mut r = Reassembler::new(MessageType::Certificate, body.len());

        for (offset, data) in fragments(&body, &[40, 40, 20]) {
            assert!(!r.is_complete());
            r.contribute(MessageType::Certificate, body.len(), offset, &data);
        }

        assert_eq!(r.body_if_complete(), Some(&body[..]));
    }

    #[test]
    fn any_permutation_with_duplicates_yields_body() {
        let body: Vec<u8> = (0..60).map(|i| (i * 7) as u8).collect();
        let frags = fragments(&body, &[15, 15, 15, 15]);

        // All 24 permutations of 4 fragments, each delivered twice.
        let orders: Vec<Vec<usize>> = permutations(&[0, 1, 2, 3]);
        for order in orders {
            let mut r = Reassembler::new(MessageType::ServerKeyExchange, body.len());
            let mut completed_at = None;

            for (step, &i) in order.iter().enumerate() {
                let (offset, data) = &frags[i];
                r.contribute(MessageType::ServerKeyExchange, body.len(), *offset, data);
                r.contribute(MessageType::ServerKeyExchange, body.len(), *offset, data);
                if r.is_complete() && completed_at.is_none() {
                    completed_at = Some(step);
                }
            }

            // Complete exactly when the last distinct fragment arrived.
            assert_eq!(completed_at, Some(order.len() - 1));
            assert_eq!(r.body_if_complete(), Some(&body[..]));
        }
    }

    #[test]
    fn overlapping_fragments_complete() {
        let body: Vec<u8> = (0..50u8).collect();
        let mut r = Reassembler::new(MessageType::ClientKeyExchange, body.len());

        r.contribute(MessageType::ClientKeyExchange, 50, 0, &body[0..30]);
        r.contribute(MessageType::ClientKeyExchange, 50, 20, &body[20..50]);

        assert_eq!(r.body_if_complete(), Some(&body[..]));
    }

    #[test]
    fn empty_message_needs_its_empty_fragment() {
        let mut r = Reassembler::new(MessageType::ServerHelloDone, 0);
        assert!(!r.is_complete());

        r.contribute(MessageType::ServerHelloDone, 0, 0, &[]);
        assert_eq!(r.body_if_complete(), Some(&[][..]));
    }

    #[test]
    fn mismatched_fragments_ignored() {
        let mut r = Reassembler::new(MessageType::Certificate, 10);

        // Wrong type, wrong total length, out of bounds offset.
        r.contribute(MessageType::ServerHello, 10, 0, &[0; 10]);
        r.contribute(MessageType::Certificate, 12, 0, &[0; 10]);
        r.contribute(MessageType::Certificate, 10, 8, &[0; 5]);
        assert!(!r.is_complete());

        r.contribute(MessageType::Certificate, 10, 0, &[1; 10]);
        assert_eq!(r.body_if_complete(), Some(&[1u8; 10][..]));
    }

    #[test]
    fn reset_requires_full_recoverage() {
        let body = [9u8; 20];
        let mut r = Reassembler::new(MessageType::Finished, 20);
        r.contribute(MessageType::Finished, 20, 0, &body);
        assert!(r.is_complete());

        r.reset();
        assert!(!r.is_complete());
        r.contribute(MessageType::Finished, 20, 0, &body[..10]);
        assert!(!r.is_complete());
        r.contribute(MessageType::Finished, 20, 10, &body[10..]);
        assert!(r.is_complete());
    }

    fn permutations(items: &[usize]) -> Vec<Vec<usize>> {
        if items.len() <= 1 {
            return vec![items.to_vec()];
        }
        let mut out = Vec::new();
        for (i, &head) in items.iter().enumerate() {
            let mut rest = items.to_vec();
            rest.remove(i);
            for mut tail in permutations(&rest) {
                tail.insert(0, head);
                out.push(tail);
            }
        }
        out
    }
}
