use crossbeam_channel::bounded;
use loom_protocol::{ClientCommand, ConnectionState, ServerMessage, Severity};
use loom_server::{LoomPort, MainLoop, NetworkThread, ServerConfig};
use std::net::{SocketAddr, TcpStream};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tungstenite::protocol::frame::coding::CloseCode;
use tungstenite::protocol::CloseFrame;
use tungstenite::Message;

type Ws = tungstenite::WebSocket<TcpStream>;

fn connect_client(addr: SocketAddr) -> Ws {
    let stream = TcpStream::connect(addr).expect("tcp connect");
    let _ = stream.set_read_timeout(Some(Duration::from_millis(50)));
    let _ = stream.set_write_timeout(Some(Duration::from_millis(200)));
    let (ws, _) = tungstenite::client(format!("ws://{addr}"), stream).expect("ws connect");
    ws
}

fn send(ws: &mut Ws, cmd: &ClientCommand) {
    ws.send(Message::Text(serde_json::to_string(cmd).unwrap().into()))
        .unwrap();
}

fn is_timeout(e: &tungstenite::Error) -> bool {
    matches!(e, tungstenite::Error::Io(e)
        if e.kind() == std::io::ErrorKind::WouldBlock
            || e.kind() == std::io::ErrorKind::TimedOut)
}

/// Tick the hub and read until a server message matches `pred`.
fn read_until(
    ws: &mut Ws,
    main_loop: &mut MainLoop,
    what: &str,
    pred: impl Fn(&ServerMessage) -> bool,
) -> ServerMessage {
    let deadline = Instant::now() + Duration::from_secs(3);
    loop {
        main_loop.tick();
        match ws.read() {
            Ok(Message::Text(s)) => {
                let msg: ServerMessage = serde_json::from_str(&s).expect("valid server json");
                if pred(&msg) {
                    return msg;
                }
            }
            Ok(_) => {}
            Err(e) if is_timeout(&e) => {}
            Err(e) => panic!("ws read failed while waiting for {what}: {e:?}"),
        }
        if Instant::now() >= deadline {
            panic!("timeout waiting for {what}");
        }
    }
}

fn read_close(ws: &mut Ws, main_loop: &mut MainLoop) -> Option<CloseFrame<'static>> {
    let deadline = Instant::now() + Duration::from_secs(3);
    loop {
        main_loop.tick();
        match ws.read() {
            Ok(Message::Close(frame)) => return frame,
            Ok(_) => {}
            Err(e) if is_timeout(&e) => {}
            Err(e) => panic!("ws read failed while waiting for close: {e:?}"),
        }
        if Instant::now() >= deadline {
            panic!("timeout waiting for close frame");
        }
    }
}

fn is_loom_connected(m: &ServerMessage) -> bool {
    matches!(
        m,
        ServerMessage::LoomConnectionState {
            state: ConnectionState::Connected,
            ..
        }
    )
}

fn start_server(dir: &TempDir) -> (NetworkThread, MainLoop) {
    let mut config = ServerConfig::new(LoomPort::Mock, dir.path().join("loom.sqlite"));
    config.mock_motion = Duration::ZERO;

    let (in_tx, in_rx) = bounded(loom_server::INBOUND_CAP);
    let (out_tx, out_rx) = bounded(loom_server::OUTBOUND_CAP);
    let net = NetworkThread::spawn_with_addr("127.0.0.1:0", in_tx.clone(), out_rx)
        .expect("spawn net");
    let main_loop = MainLoop::open(&config, in_tx, in_rx, out_tx).expect("open hub");
    (net, main_loop)
}

fn done(cmd: &'static str) -> impl Fn(&ServerMessage) -> bool {
    move |m| matches!(m, ServerMessage::CommandDone { cmd_type, .. } if cmd_type == cmd)
}

#[test]
fn ws_weave_a_pick_then_hand_over_to_a_new_client() {
    let dir = TempDir::new().unwrap();
    let (net, mut main_loop) = start_server(&dir);
    let addr = net.listen_addr();

    let mut first = connect_client(addr);
    read_until(&mut first, &mut main_loop, "loom connected", is_loom_connected);

    let data = serde_json::json!({
        "type": "ReducedPattern",
        "color_table": ["#ffffff", "#aa0000"],
        "warp_colors": [0, 1, 0, 1],
        "threading": [1, 2, 3, 4],
        "picks": [
            {"color": 1, "shaft_word": 5},
            {"color": 1, "shaft_word": 10},
        ],
    })
    .to_string();
    send(
        &mut first,
        &ClientCommand::Upload {
            name: "twill".to_string(),
            data,
        },
    );
    let reply = read_until(&mut first, &mut main_loop, "upload done", done("upload"));
    assert!(matches!(reply, ServerMessage::CommandDone { success: true, .. }), "{reply:?}");

    send(
        &mut first,
        &ClientCommand::SelectPattern {
            name: "twill".to_string(),
        },
    );
    read_until(&mut first, &mut main_loop, "pattern", |m| {
        matches!(m, ServerMessage::ReducedPattern(p) if p.name == "twill")
    });
    read_until(&mut first, &mut main_loop, "select done", done("select_pattern"));

    send(
        &mut first,
        &ClientCommand::OobCommand {
            command: "n".to_string(),
        },
    );
    read_until(&mut first, &mut main_loop, "first pick", |m| {
        matches!(
            m,
            ServerMessage::CurrentPickNumber {
                total_picks: 1,
                pick_number: 1,
                pick_repeat_number: 1
            }
        )
    });

    // A second client takes over; the first is told why it was dropped.
    let mut second = connect_client(addr);
    let frame = read_close(&mut first, &mut main_loop).expect("close frame");
    assert_eq!(frame.code, CloseCode::Away);
    assert_eq!(frame.reason, "another client took control");

    read_until(&mut second, &mut main_loop, "restored pick", |m| {
        matches!(m, ServerMessage::CurrentPickNumber { pick_number: 1, .. })
    });

    second
        .send(Message::Text("{\"type\":\"weave_faster\"}".to_string().into()))
        .unwrap();
    let problem = read_until(&mut second, &mut main_loop, "rejection", |m| {
        matches!(m, ServerMessage::CommandProblem { .. })
    });
    match problem {
        ServerMessage::CommandProblem { severity, message } => {
            assert_eq!(severity, Severity::Error);
            assert!(message.starts_with("invalid command"), "{message}");
        }
        other => panic!("expected a command problem, got: {other:?}"),
    }

    main_loop.shutdown();
    net.shutdown();
}

#[test]
fn ws_client_that_upgrades_late_is_still_served() {
    let dir = TempDir::new().unwrap();
    let (net, mut main_loop) = start_server(&dir);
    let addr = net.listen_addr();

    // The server sees the TCP connection well before the HTTP upgrade.
    let stream = TcpStream::connect(addr).expect("tcp connect");
    std::thread::sleep(Duration::from_millis(150));
    let (mut ws, _) = tungstenite::client(format!("ws://{addr}"), stream).expect("ws connect");
    ws.get_ref()
        .set_read_timeout(Some(Duration::from_millis(50)))
        .unwrap();

    read_until(&mut ws, &mut main_loop, "loom connected", is_loom_connected);
    send(&mut ws, &ClientCommand::ClearPatternNames);
    read_until(&mut ws, &mut main_loop, "clear done", done("clear_pattern_names"));

    main_loop.shutdown();
    net.shutdown();
}
