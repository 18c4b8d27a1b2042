//! Simulated loom speaking the example profile.
//!
//! The mock runs on its own thread behind an in-memory line that outlives
//! any single connection: whatever it says while nobody is listening is
//! still waiting in the line when the server reconnects, the same way a
//! real serial port behaves.

use crate::error::LinkError;
use crate::framing::{FrameReader, Framing};
use crate::transport::{LoomReader, LoomWriter, Transport};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Out-of-band commands: `n` presses the pedal (next pick wanted), `d`
/// toggles the loom's weave direction, `c` drops the connection.
pub const OOB_COMMANDS: [&str; 3] = ["n", "d", "c"];

const READ_SLICE: Duration = Duration::from_millis(10);

enum MockInput {
    Bytes(Vec<u8>),
    Oob(String),
    Connect(Arc<AtomicBool>),
    Shutdown,
}

struct MockState {
    num_shafts: u32,
    motion: Duration,
    pick_wanted: bool,
    forward: bool,
    moving: bool,
    shaft_word: u64,
    connection: Option<Arc<AtomicBool>>,
    framer: FrameReader,
    out: Sender<Vec<u8>>,
}

impl MockState {
    fn write(&self, reply: &str) {
        debug!(reply, "mock loom reply");
        let _ = self.out.send(format!("{reply}\n").into_bytes());
    }

    fn handle(&mut self, input: MockInput) -> bool {
        match input {
            MockInput::Bytes(bytes) => {
                for frame in self.framer.push(&bytes, Instant::now()) {
                    match frame {
                        Ok(frame) => self.handle_command(&String::from_utf8_lossy(&frame)),
                        Err(e) => warn!(error = %e, "mock loom: command too long"),
                    }
                }
            }
            MockInput::Oob(cmd) => self.handle_oob(&cmd),
            MockInput::Connect(closed) => {
                self.framer.clear();
                self.connection = Some(closed);
            }
            MockInput::Shutdown => return false,
        }
        true
    }

    fn handle_command(&mut self, cmd: &str) {
        let cmd = cmd.trim_end();
        let mut chars = cmd.chars();
        let Some(code) = chars.next() else {
            warn!("mock loom: empty command");
            return;
        };
        let arg = chars.as_str();
        match code {
            'C' => match u64::from_str_radix(arg, 16) {
                Ok(word) => self.raise_shafts(word),
                Err(_) => warn!(cmd, "mock loom: shaft word is not hex"),
            },
            'U' if arg == "0" || arg == "1" => {
                self.forward = arg == "0";
                self.report_direction();
            }
            'I' => {
                self.write(&format!("i{}", self.num_shafts));
                self.report_direction();
                self.write(if self.moving { "m1" } else { "m0" });
            }
            _ => warn!(cmd, "mock loom: unrecognized command"),
        }
    }

    fn raise_shafts(&mut self, word: u64) {
        if !self.pick_wanted {
            debug!(word, "mock loom: no pick wanted; ignoring shafts");
            return;
        }
        self.pick_wanted = false;
        self.moving = true;
        self.write("m1");
        thread::sleep(self.motion);
        self.moving = false;
        self.shaft_word = word;
        self.write(&format!("c{:08x}", self.shaft_word));
        self.write("m0");
    }

    fn report_direction(&self) {
        self.write(if self.forward { "u0" } else { "u1" });
    }

    fn handle_oob(&mut self, cmd: &str) {
        match cmd {
            "n" => {
                info!("mock loom: next pick requested");
                self.pick_wanted = true;
                self.write("p");
            }
            "d" => {
                self.forward = !self.forward;
                info!(forward = self.forward, "mock loom: direction toggled");
                self.report_direction();
            }
            "c" => {
                info!("mock loom: closing connection");
                if let Some(closed) = self.connection.take() {
                    closed.store(true, Ordering::Relaxed);
                }
            }
            other => warn!(cmd = other, "mock loom: unrecognized oob command"),
        }
    }
}

pub struct MockLoom {
    handle: MockLoomHandle,
    join_handle: Mutex<Option<JoinHandle<()>>>,
}

impl MockLoom {
    pub fn spawn(num_shafts: u32, motion: Duration) -> Self {
        let (input_tx, input_rx) = unbounded::<MockInput>();
        let (out_tx, out_rx) = unbounded::<Vec<u8>>();
        let mut state = MockState {
            num_shafts,
            motion,
            pick_wanted: false,
            forward: true,
            moving: false,
            shaft_word: 0,
            connection: None,
            framer: FrameReader::new(Framing::newline()),
            out: out_tx,
        };
        let join_handle = thread::spawn(move || {
            while let Ok(input) = input_rx.recv() {
                if !state.handle(input) {
                    break;
                }
            }
        });
        Self {
            handle: MockLoomHandle { input_tx, out_rx },
            join_handle: Mutex::new(Some(join_handle)),
        }
    }

    pub fn handle(&self) -> MockLoomHandle {
        self.handle.clone()
    }

    pub fn shutdown(&self) {
        let _ = self.handle.input_tx.send(MockInput::Shutdown);
        if let Ok(mut h) = self.join_handle.lock() {
            if let Some(h) = h.take() {
                let _ = h.join();
            }
        }
    }
}

impl Drop for MockLoom {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[derive(Clone)]
pub struct MockLoomHandle {
    input_tx: Sender<MockInput>,
    out_rx: Receiver<Vec<u8>>,
}

impl MockLoomHandle {
    pub fn oob(&self, command: &str) -> Result<(), LinkError> {
        self.input_tx
            .send(MockInput::Oob(command.to_string()))
            .map_err(|_| LinkError::Closed)
    }
}

/// Opens connections to a [`MockLoom`]. Keeps the loom thread alive.
pub struct MockTransport {
    loom: MockLoom,
}

impl MockTransport {
    pub fn new(loom: MockLoom) -> Self {
        Self { loom }
    }

    pub fn loom(&self) -> &MockLoom {
        &self.loom
    }
}

impl Transport for MockTransport {
    fn open(&mut self) -> Result<(Box<dyn LoomReader>, Box<dyn LoomWriter>), LinkError> {
        let handle = self.loom.handle();
        let closed = Arc::new(AtomicBool::new(false));
        handle
            .input_tx
            .send(MockInput::Connect(Arc::clone(&closed)))
            .map_err(|_| LinkError::Closed)?;
        Ok((
            Box::new(MockReader {
                out_rx: handle.out_rx.clone(),
                closed: Arc::clone(&closed),
            }),
            Box::new(MockWriter {
                input_tx: handle.input_tx,
                closed,
            }),
        ))
    }

    fn describe(&self) -> String {
        "mock".to_string()
    }

    fn is_mock(&self) -> bool {
        true
    }

    fn send_oob(&mut self, command: &str) -> Result<(), LinkError> {
        self.loom.handle.oob(command)
    }
}

struct MockReader {
    out_rx: Receiver<Vec<u8>>,
    closed: Arc<AtomicBool>,
}

impl LoomReader for MockReader {
    fn read_chunk(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, LinkError> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.closed.load(Ordering::Relaxed) {
                return Err(LinkError::Closed);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            match self.out_rx.recv_timeout(READ_SLICE.min(deadline - now)) {
                Ok(bytes) => return Ok(Some(bytes)),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return Err(LinkError::Closed),
            }
        }
    }
}

struct MockWriter {
    input_tx: Sender<MockInput>,
    closed: Arc<AtomicBool>,
}

impl LoomWriter for MockWriter {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(LinkError::Closed);
        }
        self.input_tx
            .send(MockInput::Bytes(bytes.to_vec()))
            .map_err(|_| LinkError::Closed)
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_line(reader: &mut Box<dyn LoomReader>) -> String {
        let bytes = reader
            .read_chunk(Duration::from_secs(2))
            .unwrap()
            .expect("mock reply");
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn shafts_only_move_when_a_pick_is_wanted() {
        let mut transport = MockTransport::new(MockLoom::spawn(16, Duration::ZERO));
        let (mut reader, mut writer) = transport.open().unwrap();

        writer.write_all(b"C00000003\n").unwrap();
        assert_eq!(reader.read_chunk(Duration::from_millis(50)).unwrap(), None);

        transport.send_oob("n").unwrap();
        assert_eq!(read_line(&mut reader), "p\n");
        writer.write_all(b"C00000003\n").unwrap();
        assert_eq!(read_line(&mut reader), "m1\n");
        assert_eq!(read_line(&mut reader), "c00000003\n");
        assert_eq!(read_line(&mut reader), "m0\n");
    }

    #[test]
    fn identity_and_direction() {
        let mut transport = MockTransport::new(MockLoom::spawn(16, Duration::ZERO));
        let (mut reader, mut writer) = transport.open().unwrap();
        writer.write_all(b"I\n").unwrap();
        assert_eq!(read_line(&mut reader), "i16\n");
        assert_eq!(read_line(&mut reader), "u0\n");
        assert_eq!(read_line(&mut reader), "m0\n");

        transport.send_oob("d").unwrap();
        assert_eq!(read_line(&mut reader), "u1\n");
        writer.write_all(b"U0\n").unwrap();
        assert_eq!(read_line(&mut reader), "u0\n");
    }

    #[test]
    fn force_close_and_stale_bytes_survive_reconnect() {
        let mut transport = MockTransport::new(MockLoom::spawn(8, Duration::ZERO));
        let (mut reader, _writer) = transport.open().unwrap();
        transport.send_oob("c").unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            match reader.read_chunk(Duration::from_millis(20)) {
                Err(LinkError::Closed) => break,
                Ok(None) if Instant::now() < deadline => {}
                other => panic!("expected close, got {other:?}"),
            }
        }

        transport.send_oob("n").unwrap();
        let (mut reader, _writer) = transport.open().unwrap();
        assert_eq!(read_line(&mut reader), "p\n");
    }
}
