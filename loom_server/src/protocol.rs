use crate::codec::LoomEvent;
use std::net::SocketAddr;

pub const INBOUND_CAP: usize = 256;
pub const OUTBOUND_CAP: usize = 256;

/// Identifies one websocket connection. Only the newest one is live.
pub type ClientId = u64;

#[derive(Debug)]
pub enum InboundMsg {
    ClientConnected {
        client_id: ClientId,
        socket_addr: SocketAddr,
    },
    ClientDisconnected {
        client_id: ClientId,
    },
    Command {
        client_id: ClientId,
        cmd: ClientCommand,
    },
    /// A decoded loom message. `epoch` names the loom connection it came
    /// from; messages from an earlier connection are dropped.
    Loom {
        epoch: u64,
        event: LoomEvent,
    },
    LoomProblem {
        epoch: u64,
        message: String,
    },
    LoomClosed {
        epoch: u64,
        reason: String,
    },
    Shutdown,
}

#[derive(Debug)]
pub enum OutboundMsg {
    Send {
        client_id: ClientId,
        msg: ServerMessage,
    },
}

pub use loom_protocol::{
    ClientCommand, ConnectionState, DirectionControl, Mode, Pick, ReducedPattern, ServerMessage,
    Settings, SettingsUpdate, Severity, ShaftState,
};
