//! Splitting the loom byte stream into messages.
//!
//! Most looms end each reply with a terminator. Some send fixed-format
//! replies with no terminator at all; for those a message ends when the
//! line has been idle for `idle_gap`.

use std::time::{Duration, Instant};
use thiserror::Error;

/// Longest message held while waiting for it to end.
pub const MAX_FRAME_LEN: usize = 4096;

/// The loom sent more than [`MAX_FRAME_LEN`] bytes without ending a
/// message. Those bytes are gone; framing resumes with the next read.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("loom sent {discarded} bytes without ending a message; discarded")]
pub struct FrameOverflow {
    pub discarded: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Framing {
    Terminated(Vec<u8>),
    Unterminated { idle_gap: Duration },
}

impl Framing {
    pub fn newline() -> Self {
        Framing::Terminated(b"\n".to_vec())
    }
}

#[derive(Debug)]
pub struct FrameReader {
    framing: Framing,
    buf: Vec<u8>,
    last_byte_at: Option<Instant>,
}

impl FrameReader {
    pub fn new(framing: Framing) -> Self {
        Self {
            framing,
            buf: Vec::new(),
            last_byte_at: None,
        }
    }

    /// Feed bytes read at `now`; returns every message they complete, in
    /// order, with an overflow in place of any message that grew too long.
    pub fn push(&mut self, bytes: &[u8], now: Instant) -> Vec<Result<Vec<u8>, FrameOverflow>> {
        let mut frames = Vec::new();
        match &self.framing {
            Framing::Terminated(terminator) => {
                self.buf.extend_from_slice(bytes);
                while let Some(at) = find(&self.buf, terminator) {
                    let rest = self.buf.split_off(at + terminator.len());
                    let mut frame = std::mem::replace(&mut self.buf, rest);
                    frame.truncate(at);
                    if frame.last() == Some(&b'\r') {
                        frame.pop();
                    }
                    if !frame.is_empty() {
                        frames.push(Ok(frame));
                    }
                }
            }
            Framing::Unterminated { idle_gap } => {
                if let Some(last) = self.last_byte_at {
                    if !self.buf.is_empty() && now.saturating_duration_since(last) >= *idle_gap {
                        frames.push(Ok(std::mem::take(&mut self.buf)));
                    }
                }
                self.buf.extend_from_slice(bytes);
            }
        }
        if self.buf.len() > MAX_FRAME_LEN {
            frames.push(Err(FrameOverflow {
                discarded: self.buf.len(),
            }));
            self.buf.clear();
        }
        if !bytes.is_empty() {
            self.last_byte_at = Some(now);
        }
        frames
    }

    /// Call when a read timed out. Flushes an unterminated message once the
    /// line has been idle long enough.
    pub fn poll_idle(&mut self, now: Instant) -> Option<Vec<u8>> {
        let Framing::Unterminated { idle_gap } = self.framing else {
            return None;
        };
        let last = self.last_byte_at?;
        if self.buf.is_empty() || now.saturating_duration_since(last) < idle_gap {
            return None;
        }
        Some(std::mem::take(&mut self.buf))
    }

    pub fn clear(&mut self) {
        self.buf.clear();
        self.last_byte_at = None;
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(frames: &[&str]) -> Vec<Result<Vec<u8>, FrameOverflow>> {
        frames.iter().map(|f| Ok(f.as_bytes().to_vec())).collect()
    }

    #[test]
    fn terminated_splits_across_reads() {
        let now = Instant::now();
        let mut r = FrameReader::new(Framing::newline());
        assert!(r.push(b"c0000", now).is_empty());
        assert_eq!(r.push(b"0005\r\np\n\nm", now), ok(&["c00000005", "p"]));
        assert_eq!(r.push(b"1\n", now), ok(&["m1"]));
        assert_eq!(r.poll_idle(now + Duration::from_secs(1)), None);
    }

    #[test]
    fn multi_byte_terminator() {
        let now = Instant::now();
        let mut r = FrameReader::new(Framing::Terminated(b"\r\n".to_vec()));
        assert_eq!(r.push(b"u1\r\nu0\r", now), ok(&["u1"]));
        assert_eq!(r.push(b"\n", now), ok(&["u0"]));
    }

    #[test]
    fn unterminated_flushes_after_idle_gap() {
        let gap = Duration::from_millis(20);
        let t0 = Instant::now();
        let mut r = FrameReader::new(Framing::Unterminated { idle_gap: gap });
        assert!(r.push(b"c00", t0).is_empty());
        assert!(r.push(b"ff", t0 + Duration::from_millis(5)).is_empty());
        assert_eq!(r.poll_idle(t0 + Duration::from_millis(10)), None);
        assert_eq!(r.poll_idle(t0 + Duration::from_millis(30)), Some(b"c00ff".to_vec()));
        assert_eq!(r.poll_idle(t0 + Duration::from_millis(60)), None);
    }

    #[test]
    fn unterminated_gap_inside_push_splits_messages() {
        let gap = Duration::from_millis(20);
        let t0 = Instant::now();
        let mut r = FrameReader::new(Framing::Unterminated { idle_gap: gap });
        r.push(b"p", t0);
        assert_eq!(r.push(b"u1", t0 + Duration::from_millis(50)), ok(&["p"]));
        r.clear();
        assert_eq!(r.poll_idle(t0 + Duration::from_secs(1)), None);
    }

    #[test]
    fn runaway_input_is_discarded_and_framing_recovers() {
        let now = Instant::now();
        let mut r = FrameReader::new(Framing::newline());
        assert_eq!(r.push(b"p\n", now), ok(&["p"]));
        assert!(r.push(&[b'x'; MAX_FRAME_LEN], now).is_empty());
        assert_eq!(
            r.push(b"xx", now),
            vec![Err(FrameOverflow {
                discarded: MAX_FRAME_LEN + 2
            })]
        );
        assert_eq!(r.push(b"m0\n", now), ok(&["m0"]));
    }

    #[test]
    fn unterminated_stream_without_a_gap_is_capped() {
        let t0 = Instant::now();
        let mut r = FrameReader::new(Framing::Unterminated {
            idle_gap: Duration::from_millis(20),
        });
        let frames = r.push(&[b'c'; MAX_FRAME_LEN + 1], t0);
        assert_eq!(
            frames,
            vec![Err(FrameOverflow {
                discarded: MAX_FRAME_LEN + 1
            })]
        );
        assert_eq!(r.poll_idle(t0 + Duration::from_secs(1)), None);
    }
}
