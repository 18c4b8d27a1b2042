use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use loom_protocol::{ClientCommand, Mode, ServerMessage};
use std::net::TcpStream;
use std::path::PathBuf;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{connect, Message, WebSocket};

#[derive(Parser, Debug)]
#[command(name = "loom_ctl", about = "Drive a loom_server from the command line")]
struct Args {
    #[arg(long, env = "LOOM_SERVER_URL", default_value = "ws://127.0.0.1:8000")]
    url: String,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Print every server event until the connection closes.
    Watch,
    /// Upload a reduced pattern (JSON). The name defaults to the file stem.
    Upload {
        file: PathBuf,
        #[arg(long)]
        name: Option<String>,
    },
    Select {
        name: String,
    },
    /// Stage a jump to an absolute pick, or `none` to cancel.
    JumpPick {
        #[arg(value_parser = parse_total)]
        total: JumpTarget,
    },
    /// Stage a jump to an absolute end, or `none` to cancel.
    JumpEnd {
        #[arg(value_parser = parse_total)]
        total: JumpTarget,
    },
    Direction {
        direction: Dir,
    },
    Mode {
        mode: ModeArg,
    },
    /// Out-of-band command for the mock loom: n (pedal), d (unweave), c (drop link).
    Oob {
        command: String,
    },
    ClearNames,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Dir {
    Fwd,
    Back,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
    Weaving,
    Threading,
    Settings,
}

impl From<ModeArg> for Mode {
    fn from(m: ModeArg) -> Self {
        match m {
            ModeArg::Weaving => Mode::Weaving,
            ModeArg::Threading => Mode::Threading,
            ModeArg::Settings => Mode::Settings,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct JumpTarget(Option<u64>);

fn parse_total(s: &str) -> Result<JumpTarget, String> {
    if s.eq_ignore_ascii_case("none") {
        return Ok(JumpTarget(None));
    }
    s.parse::<u64>()
        .map(|total| JumpTarget(Some(total)))
        .map_err(|e| format!("expected a number or `none`: {e}"))
}

type Ws = WebSocket<MaybeTlsStream<TcpStream>>;

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let url = url::Url::parse(&args.url).with_context(|| format!("bad url {}", args.url))?;
    if url.scheme() != "ws" && url.scheme() != "wss" {
        anyhow::bail!("url must be ws:// or wss://, got {url}");
    }

    let command = build_command(args.cmd)?;

    let (mut ws, _resp) =
        connect(url.as_str()).with_context(|| format!("cannot connect to {url}"))?;

    match command {
        None => watch(&mut ws),
        Some(cmd) => {
            let cmd_type = cmd.cmd_type();
            ws.send(Message::Text(serde_json::to_string(&cmd)?))?;
            wait_done(&mut ws, cmd_type)?;
            let _ = ws.close(None);
            Ok(())
        }
    }
}

fn build_command(cmd: Cmd) -> anyhow::Result<Option<ClientCommand>> {
    let command = match cmd {
        Cmd::Watch => return Ok(None),
        Cmd::Upload { file, name } => {
            let data = std::fs::read_to_string(&file)
                .with_context(|| format!("cannot read {}", file.display()))?;
            let name = match name {
                Some(n) => n,
                None => file
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .ok_or_else(|| anyhow::anyhow!("cannot derive a name from {}", file.display()))?,
            };
            ClientCommand::Upload { name, data }
        }
        Cmd::Select { name } => ClientCommand::SelectPattern { name },
        Cmd::JumpPick { total } => ClientCommand::JumpToPick { total: total.0 },
        Cmd::JumpEnd { total } => ClientCommand::JumpToEnd { total: total.0 },
        Cmd::Direction { direction } => ClientCommand::Direction {
            forward: matches!(direction, Dir::Fwd),
        },
        Cmd::Mode { mode } => ClientCommand::Mode { mode: mode.into() },
        Cmd::Oob { command } => ClientCommand::OobCommand { command },
        Cmd::ClearNames => ClientCommand::ClearPatternNames,
    };
    Ok(Some(command))
}

/// Read one event, printing it as a JSON line. `None` once the server
/// closed the connection.
fn next_event(ws: &mut Ws) -> anyhow::Result<Option<ServerMessage>> {
    loop {
        let msg = match ws.read() {
            Ok(msg) => msg,
            Err(tungstenite::Error::ConnectionClosed) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match msg {
            Message::Text(text) => {
                println!("{text}");
                let event: ServerMessage = serde_json::from_str(&text)
                    .with_context(|| format!("unexpected server message {text}"))?;
                return Ok(Some(event));
            }
            Message::Close(frame) => {
                if let Some(frame) = frame {
                    eprintln!("server closed the connection: {}", frame.reason);
                }
                return Ok(None);
            }
            _ => {}
        }
    }
}

fn watch(ws: &mut Ws) -> anyhow::Result<()> {
    while next_event(ws)?.is_some() {}
    Ok(())
}

fn wait_done(ws: &mut Ws, cmd_type: &str) -> anyhow::Result<()> {
    while let Some(event) = next_event(ws)? {
        if let ServerMessage::CommandDone {
            cmd_type: done,
            success,
            message,
        } = event
        {
            if done != cmd_type {
                continue;
            }
            if !success {
                anyhow::bail!("{cmd_type} failed: {message}");
            }
            return Ok(());
        }
    }
    anyhow::bail!("connection closed before {cmd_type} completed")
}
