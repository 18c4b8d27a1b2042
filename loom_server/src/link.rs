//! The one connection to the loom.
//!
//! Connecting always starts from a clean line: whatever the loom sent
//! before the connection was established (a pedal press from the last
//! session, say) is read and thrown away before anything is honoured.
//! After that a reader thread decodes loom messages and hands them to the
//! session hub tagged with the connection's epoch.

use crate::codec::{LoomCodec, LoomEvent};
use crate::config::LinkTimings;
use crate::error::LinkError;
use crate::framing::{FrameOverflow, FrameReader};
use crate::protocol::{ConnectionState, InboundMsg};
use crate::transport::{LoomReader, LoomWriter, Transport};
use crossbeam_channel::{SendTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

const FORWARD_RETRY: Duration = Duration::from_millis(50);

struct ReaderThread {
    shutdown: Arc<AtomicBool>,
    join_handle: JoinHandle<()>,
}

pub struct LoomLink {
    transport: Box<dyn Transport>,
    codec: Arc<dyn LoomCodec>,
    timings: LinkTimings,
    events_tx: Sender<InboundMsg>,
    state: ConnectionState,
    epoch: u64,
    writer: Option<Box<dyn LoomWriter>>,
    reader: Option<ReaderThread>,
    num_shafts: Option<u32>,
}

impl LoomLink {
    pub fn new(
        transport: Box<dyn Transport>,
        codec: Arc<dyn LoomCodec>,
        timings: LinkTimings,
        events_tx: Sender<InboundMsg>,
    ) -> Self {
        Self {
            transport,
            codec,
            timings,
            events_tx,
            state: ConnectionState::Disconnected,
            epoch: 0,
            writer: None,
            reader: None,
            num_shafts: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Messages tagged with any other epoch are stale.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn is_mock(&self) -> bool {
        self.transport.is_mock()
    }

    /// Shaft count the loom reported during the last connect.
    pub fn reported_num_shafts(&self) -> Option<u32> {
        self.num_shafts
    }

    /// Drop any existing connection and open a fresh one. Every state
    /// change is passed to `on_state` as it happens.
    pub fn connect(
        &mut self,
        on_state: &mut dyn FnMut(ConnectionState, &str),
    ) -> Result<(), LinkError> {
        if self.state != ConnectionState::Disconnected {
            self.disconnect("reconnecting", on_state);
        }
        self.epoch += 1;
        self.set_state(ConnectionState::Connecting, "", on_state);

        let (mut reader, mut writer) = match self.transport.open() {
            Ok(line) => line,
            Err(e) => {
                self.set_state(ConnectionState::Disconnected, &e.to_string(), on_state);
                return Err(e);
            }
        };
        let (framer, early) = match self.synchronize(reader.as_mut(), writer.as_mut()) {
            Ok(synced) => synced,
            Err(e) => {
                writer.close();
                self.set_state(ConnectionState::Disconnected, &e.to_string(), on_state);
                return Err(e);
            }
        };

        self.writer = Some(writer);
        self.spawn_reader(reader, framer);
        self.set_state(ConnectionState::Connected, "", on_state);
        for event in early {
            if self
                .events_tx
                .try_send(InboundMsg::Loom {
                    epoch: self.epoch,
                    event,
                })
                .is_err()
            {
                warn!(?event, "inbound queue full; dropping loom event");
            }
        }
        Ok(())
    }

    /// Explicit disconnect. Terminal: nothing reconnects until asked to.
    pub fn disconnect(&mut self, reason: &str, on_state: &mut dyn FnMut(ConnectionState, &str)) {
        if self.state == ConnectionState::Disconnected && self.writer.is_none() {
            return;
        }
        self.set_state(ConnectionState::Disconnecting, "", on_state);
        self.teardown();
        self.set_state(ConnectionState::Disconnected, reason, on_state);
    }

    /// The line failed underneath us. Also terminal.
    pub fn connection_lost(&mut self, reason: &str, on_state: &mut dyn FnMut(ConnectionState, &str)) {
        warn!(reason, epoch = self.epoch, "loom connection lost");
        self.teardown();
        self.set_state(ConnectionState::Disconnected, reason, on_state);
    }

    pub fn send_shafts(&mut self, shaft_word: u64) -> Result<(), LinkError> {
        let bytes = self.codec.encode_shafts(shaft_word);
        self.write(&bytes)
    }

    pub fn send_direction(&mut self, forward: bool) -> Result<(), LinkError> {
        let bytes = self.codec.encode_direction(forward);
        self.write(&bytes)
    }

    pub fn send_oob(&mut self, command: &str) -> Result<(), LinkError> {
        self.transport.send_oob(command)
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        let writer = self.writer.as_mut().ok_or(LinkError::NotConnected)?;
        let text = String::from_utf8_lossy(bytes);
        trace!(bytes = %text.trim_end(), "to loom");
        writer.write_all(bytes)
    }

    fn set_state(
        &mut self,
        state: ConnectionState,
        reason: &str,
        on_state: &mut dyn FnMut(ConnectionState, &str),
    ) {
        self.state = state;
        info!(?state, reason, epoch = self.epoch, "loom connection state");
        on_state(state, reason);
    }

    /// Purge, then ask the loom who it is. Returns the framer (it may hold
    /// a partial message) and any events that arrived after the purge.
    fn synchronize(
        &mut self,
        reader: &mut dyn LoomReader,
        writer: &mut dyn LoomWriter,
    ) -> Result<(FrameReader, Vec<LoomEvent>), LinkError> {
        let purged = purge(reader, &self.timings)?;
        if purged > 0 {
            info!(bytes = purged, "discarded stale loom output");
        }

        let mut framer = FrameReader::new(self.codec.framing());
        let mut early = Vec::new();
        let Some(query) = self.codec.encode_identity_query() else {
            return Ok((framer, early));
        };
        writer.write_all(&query)?;

        let deadline = Instant::now() + self.timings.identity_timeout;
        while identity_of(&early).is_none() {
            let now = Instant::now();
            if now >= deadline {
                return Err(LinkError::Open {
                    port: self.transport.describe(),
                    reason: "no reply to identity query".to_string(),
                });
            }
            let timeout = self.timings.poll_interval.min(deadline - now);
            let frames = match reader.read_chunk(timeout)? {
                Some(bytes) => framer.push(&bytes, Instant::now()),
                None => framer.poll_idle(Instant::now()).into_iter().map(Ok).collect(),
            };
            for frame in frames {
                match decode_frame(self.codec.as_ref(), frame) {
                    Ok(event) => early.push(event),
                    Err(e) => warn!(error = %e, "ignoring loom reply during connect"),
                }
            }
        }

        let mut events = Vec::with_capacity(early.len());
        for event in early {
            match event {
                LoomEvent::Identity { num_shafts } => {
                    debug!(num_shafts, "loom identified");
                    self.num_shafts = Some(num_shafts);
                }
                other => events.push(other),
            }
        }
        Ok((framer, events))
    }

    fn spawn_reader(&mut self, reader: Box<dyn LoomReader>, framer: FrameReader) {
        let shutdown = Arc::new(AtomicBool::new(false));
        let ctx = ReaderContext {
            codec: Arc::clone(&self.codec),
            epoch: self.epoch,
            events_tx: self.events_tx.clone(),
            shutdown: Arc::clone(&shutdown),
            poll_interval: self.timings.poll_interval,
        };
        let join_handle = thread::spawn(move || ctx.run(reader, framer));
        self.reader = Some(ReaderThread {
            shutdown,
            join_handle,
        });
    }

    fn teardown(&mut self) {
        if let Some(reader) = &self.reader {
            reader.shutdown.store(true, Ordering::Relaxed);
        }
        if let Some(mut writer) = self.writer.take() {
            writer.close();
        }
        if let Some(reader) = self.reader.take() {
            let _ = reader.join_handle.join();
        }
        // Anything the old reader queued is now stale.
        self.epoch += 1;
    }
}

impl Drop for LoomLink {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn identity_of(events: &[LoomEvent]) -> Option<u32> {
    events.iter().find_map(|e| match e {
        LoomEvent::Identity { num_shafts } => Some(*num_shafts),
        _ => None,
    })
}

fn decode_frame(
    codec: &dyn LoomCodec,
    frame: Result<Vec<u8>, FrameOverflow>,
) -> Result<LoomEvent, LinkError> {
    let frame = frame?;
    trace!(frame = %String::from_utf8_lossy(&frame), "from loom");
    codec.decode(&frame)
}

/// Read and discard until the line has been quiet for `purge_quiet`, or
/// `purge_ceiling` has passed.
fn purge(reader: &mut dyn LoomReader, timings: &LinkTimings) -> Result<usize, LinkError> {
    let started = Instant::now();
    let mut discarded = 0;
    while started.elapsed() < timings.purge_ceiling {
        match reader.read_chunk(timings.purge_quiet)? {
            Some(bytes) => {
                let text = String::from_utf8_lossy(&bytes);
                trace!(bytes = %text.trim_end(), "purged");
                discarded += bytes.len();
            }
            None => break,
        }
    }
    Ok(discarded)
}

struct ReaderContext {
    codec: Arc<dyn LoomCodec>,
    epoch: u64,
    events_tx: Sender<InboundMsg>,
    shutdown: Arc<AtomicBool>,
    poll_interval: Duration,
}

impl ReaderContext {
    fn run(self, mut reader: Box<dyn LoomReader>, mut framer: FrameReader) {
        while !self.shutdown.load(Ordering::Relaxed) {
            let frames = match reader.read_chunk(self.poll_interval) {
                Ok(Some(bytes)) => framer.push(&bytes, Instant::now()),
                Ok(None) => framer.poll_idle(Instant::now()).into_iter().map(Ok).collect(),
                Err(e) => {
                    if !self.shutdown.load(Ordering::Relaxed) {
                        self.forward(InboundMsg::LoomClosed {
                            epoch: self.epoch,
                            reason: e.to_string(),
                        });
                    }
                    return;
                }
            };
            for frame in frames {
                let msg = match decode_frame(self.codec.as_ref(), frame) {
                    Ok(event) => InboundMsg::Loom {
                        epoch: self.epoch,
                        event,
                    },
                    Err(e) => InboundMsg::LoomProblem {
                        epoch: self.epoch,
                        message: e.to_string(),
                    },
                };
                if !self.forward(msg) {
                    return;
                }
            }
        }
    }

    /// Loom events must not be dropped, so wait for room in the queue
    /// unless the link is being torn down.
    fn forward(&self, mut msg: InboundMsg) -> bool {
        loop {
            match self.events_tx.send_timeout(msg, FORWARD_RETRY) {
                Ok(()) => return true,
                Err(SendTimeoutError::Timeout(m)) => {
                    if self.shutdown.load(Ordering::Relaxed) {
                        return false;
                    }
                    msg = m;
                }
                Err(SendTimeoutError::Disconnected(_)) => return false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ExampleCodec;
    use crate::framing::{Framing, MAX_FRAME_LEN};
    use crate::transport::TcpTransport;
    use crossbeam_channel::{bounded, Receiver};
    use std::io::Write;
    use std::net::{TcpListener, TcpStream};

    /// The example loom's replies under a different framing, for a loom
    /// that cannot be asked who it is.
    struct QuietCodec(Framing);

    impl LoomCodec for QuietCodec {
        fn framing(&self) -> Framing {
            self.0.clone()
        }

        fn encode_shafts(&self, shaft_word: u64) -> Vec<u8> {
            ExampleCodec.encode_shafts(shaft_word)
        }

        fn encode_direction(&self, forward: bool) -> Vec<u8> {
            ExampleCodec.encode_direction(forward)
        }

        fn encode_identity_query(&self) -> Option<Vec<u8>> {
            None
        }

        fn decode(&self, frame: &[u8]) -> Result<LoomEvent, LinkError> {
            ExampleCodec.decode(frame)
        }
    }

    fn connect_over_tcp(framing: Framing) -> (LoomLink, TcpStream, Receiver<InboundMsg>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let (events_tx, events_rx) = bounded(16);
        let mut link = LoomLink::new(
            Box::new(TcpTransport::new(addr.to_string())),
            Arc::new(QuietCodec(framing)),
            LinkTimings::default(),
            events_tx,
        );
        let mut states = Vec::new();
        link.connect(&mut |state, _| states.push(state)).unwrap();
        assert_eq!(states.last(), Some(&ConnectionState::Connected));
        let (peer, _) = listener.accept().unwrap();
        (link, peer, events_rx)
    }

    fn next_msg(events_rx: &Receiver<InboundMsg>) -> InboundMsg {
        events_rx
            .recv_timeout(Duration::from_secs(2))
            .expect("message from the link")
    }

    #[test]
    fn unterminated_reply_is_decoded_once_the_line_goes_idle() {
        let (link, mut peer, events_rx) = connect_over_tcp(Framing::Unterminated {
            idle_gap: Duration::from_millis(20),
        });

        peer.write_all(b"p").unwrap();
        match next_msg(&events_rx) {
            InboundMsg::Loom { epoch, event } => {
                assert_eq!(epoch, link.epoch());
                assert_eq!(event, LoomEvent::Advance);
            }
            other => panic!("expected a pedal press, got {other:?}"),
        }

        peer.write_all(b"u1").unwrap();
        assert!(matches!(
            next_msg(&events_rx),
            InboundMsg::Loom {
                event: LoomEvent::Direction { forward: false },
                ..
            }
        ));
    }

    #[test]
    fn runaway_reply_is_reported_and_the_link_keeps_reading() {
        let (link, mut peer, events_rx) = connect_over_tcp(Framing::newline());

        peer.write_all(&vec![b'x'; MAX_FRAME_LEN + 1]).unwrap();
        match next_msg(&events_rx) {
            InboundMsg::LoomProblem { epoch, message } => {
                assert_eq!(epoch, link.epoch());
                assert!(message.contains("without ending a message"), "{message}");
            }
            other => panic!("expected a loom problem, got {other:?}"),
        }
        assert!(link.is_connected());

        peer.write_all(b"p\n").unwrap();
        assert!(matches!(
            next_msg(&events_rx),
            InboundMsg::Loom {
                event: LoomEvent::Advance,
                ..
            }
        ));
    }
}
