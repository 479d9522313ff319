//! `Image`: a subscriber's read-only view of a log buffer (§4.I).

use std::sync::Arc;

use aeron_log_buffer::{ FrameScan, LogBuffer };
use aeron_protocol::frame::{ FrameHeader, UNFRAGMENTED };
use aeron_protocol::position::{ partition_index, term_id, term_offset };
use aeron_protocol::PaddedCounter;

pub struct Image {
    log: Arc<LogBuffer>,
    pub session_id: i32,
    pub stream_id: i32,
    pub subscriber_registration_id: i64,
    position: Arc<PaddedCounter>,
    reassembly: Vec<u8>,
}

impl Image {
    pub fn new(
        log: Arc<LogBuffer>,
        session_id: i32,
        stream_id: i32,
        subscriber_registration_id: i64,
        position: Arc<PaddedCounter>
    ) -> Self {
        Self { log, session_id, stream_id, subscriber_registration_id, position, reassembly: Vec::new() }
    }

    pub fn position(&self) -> i64 {
        self.position.get()
    }

    /// Poll up to `fragment_limit` fragments, delivering reassembled
    /// messages to `handler(body, header)`. Returns the number of fragments
    /// consumed (a multi-fragment message counts each of its fragments).
    pub fn poll<F: FnMut(&[u8], &FrameHeader)>(&mut self, mut handler: F, fragment_limit: usize) -> usize {
        let bits = self.log.bits_to_shift();
        let initial = self.log.initial_term_id();
        let term_length = self.log.term_length();

        let mut position = self.position.get();
        let mut fragments = 0usize;

        while fragments < fragment_limit {
            let active_term = term_id(initial, position, bits);
            let index = partition_index(initial, active_term);
            let offset = term_offset(position, term_length);

            match self.log.scan(index, offset) {
                FrameScan::Pending => break,
                FrameScan::Padding { aligned_length } => {
                    position += aligned_length as i64;
                }
                FrameScan::Data { header, body_offset, body_length, aligned_length } => {
                    let body = self.log.body_slice(index, body_offset, body_length);
                    self.deliver(&header, body, &mut handler);
                    position += aligned_length as i64;
                    fragments += 1;
                }
            }
        }

        if fragments > 0 {
            self.position.set_ordered(position);
        }
        fragments
    }

    fn deliver<F: FnMut(&[u8], &FrameHeader)>(&mut self, header: &FrameHeader, body: &[u8], handler: &mut F) {
        if header.flags & UNFRAGMENTED == UNFRAGMENTED {
            handler(body, header);
            return;
        }

        if header.is_begin_fragment() {
            self.reassembly.clear();
        }
        self.reassembly.extend_from_slice(body);
        if header.is_end_fragment() {
            handler(&self.reassembly, header);
            self.reassembly.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aeron_protocol::frame::{ BEGIN_FRAGMENT_FLAG, END_FRAGMENT_FLAG };

    fn new_log(path: &str) -> Arc<LogBuffer> {
        let _ = std::fs::remove_file(path);
        Arc::new(LogBuffer::create(path, 64 * 1024, 0, 1408, 1, 1, 1).unwrap())
    }

    #[test]
    fn simple_round_trip_delivers_in_order() {
        let log = new_log("/tmp/aeron-ipc-image-test-s1");
        for msg in [b"one".as_slice(), b"two".as_slice(), b"three".as_slice()] {
            let mut claim = log.claim(msg.len() as i32, true).unwrap();
            claim.data_mut().copy_from_slice(msg);
            claim.commit(UNFRAGMENTED, 0);
        }

        let position = Arc::new(aeron_protocol::PaddedCounter::new(0));
        let mut image = Image::new(log, 1, 1, 1, position);

        let mut received = Vec::new();
        let consumed = image.poll(
            |body, _h| received.push(body.to_vec()),
            10
        );

        assert_eq!(consumed, 3);
        assert_eq!(received, vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()]);
        let _ = std::fs::remove_file("/tmp/aeron-ipc-image-test-s1");
    }

    #[test]
    fn fragmented_message_reassembles() {
        let log = new_log("/tmp/aeron-ipc-image-test-frag");

        let mut first = log.claim(3, true).unwrap();
        first.data_mut().copy_from_slice(b"abc");
        first.commit(BEGIN_FRAGMENT_FLAG, 0);

        let mut second = log.claim(3, true).unwrap();
        second.data_mut().copy_from_slice(b"def");
        second.commit(END_FRAGMENT_FLAG, 0);

        let position = Arc::new(aeron_protocol::PaddedCounter::new(0));
        let mut image = Image::new(log, 1, 1, 1, position);

        let mut received = Vec::new();
        image.poll(|body, _h| received.push(body.to_vec()), 10);

        assert_eq!(received, vec![b"abcdef".to_vec()]);
        let _ = std::fs::remove_file("/tmp/aeron-ipc-image-test-frag");
    }
}
