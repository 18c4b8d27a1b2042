use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// Who may change the weaving direction.
///
/// * `Full`: both the client and the loom's unweave button.
/// * `LoomControlled`: only the loom; the client just displays it.
/// * `SoftwareControlled`: only the client; loom reports are ignored.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DirectionControl {
    #[default]
    Full,
    LoomControlled,
    SoftwareControlled,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    Weaving,
    Threading,
    Settings,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// `shaft_word` in [`ServerMessage::ShaftState`] is only meaningful when
/// the state is `Done`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ShaftState {
    #[default]
    Unknown,
    Done,
    Moving,
    Error,
}

/// One weft insertion. Bit 0 of `shaft_word` is shaft 1; a set bit means
/// the shaft is raised.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pick {
    pub color: u32,
    pub shaft_word: u64,
}

/// A weaving pattern reduced to what loom control needs.
///
/// `threading[i]` is the 1-based shaft for end `i + 1`, or 0 if that end is
/// not threaded. `pick0` is the "all shafts down" pick used for the
/// separator stop.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ReducedPattern {
    pub name: String,
    pub color_table: Vec<String>,
    pub warp_colors: Vec<u32>,
    pub threading: Vec<u32>,
    pub picks: Vec<Pick>,
    pub pick0: Pick,
}

impl ReducedPattern {
    pub fn num_picks(&self) -> u32 {
        self.picks.len() as u32
    }

    pub fn num_ends(&self) -> u32 {
        self.threading.len() as u32
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub loom_name: String,
    pub direction_control: DirectionControl,
    pub end1_on_right: bool,
    pub thread_right_to_left: bool,
    pub thread_back_to_front: bool,
    pub thread_group_size: u32,
    pub language: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            loom_name: "example".to_string(),
            direction_control: DirectionControl::Full,
            end1_on_right: true,
            thread_right_to_left: true,
            thread_back_to_front: true,
            thread_group_size: 4,
            language: "English".to_string(),
        }
    }
}

/// Partial settings update; absent fields keep their current value.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loom_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction_control: Option<DirectionControl>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end1_on_right: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_right_to_left: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_back_to_front: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_group_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ClientCommand {
    SelectPattern { name: String },
    Upload { name: String, data: String },
    ClearPatternNames,
    Direction { forward: bool },
    JumpToPick { total: Option<u64> },
    JumpToEnd { total: Option<u64> },
    ThreadGroupSize { group_size: u32 },
    SeparateWeavingRepeats { separate: bool },
    SeparateThreadingRepeats { separate: bool },
    Mode { mode: Mode },
    Settings(SettingsUpdate),
    #[serde(rename = "oobcommand")]
    OobCommand { command: String },
}

impl ClientCommand {
    pub fn cmd_type(&self) -> &'static str {
        match self {
            ClientCommand::SelectPattern { .. } => "select_pattern",
            ClientCommand::Upload { .. } => "upload",
            ClientCommand::ClearPatternNames => "clear_pattern_names",
            ClientCommand::Direction { .. } => "direction",
            ClientCommand::JumpToPick { .. } => "jump_to_pick",
            ClientCommand::JumpToEnd { .. } => "jump_to_end",
            ClientCommand::ThreadGroupSize { .. } => "thread_group_size",
            ClientCommand::SeparateWeavingRepeats { .. } => "separate_weaving_repeats",
            ClientCommand::SeparateThreadingRepeats { .. } => "separate_threading_repeats",
            ClientCommand::Mode { .. } => "mode",
            ClientCommand::Settings(_) => "settings",
            ClientCommand::OobCommand { .. } => "oobcommand",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum ServerMessage {
    CommandDone {
        cmd_type: String,
        success: bool,
        message: String,
    },
    CommandProblem {
        severity: Severity,
        message: String,
    },
    StatusMessage {
        severity: Severity,
        message: String,
    },
    CurrentPickNumber {
        total_picks: u64,
        pick_number: u32,
        pick_repeat_number: u32,
    },
    CurrentEndNumber {
        total_end_number0: u64,
        total_end_number1: u64,
        end_number0: u32,
        end_number1: u32,
        end_repeat_number: u32,
    },
    JumpPickNumber {
        total_picks: Option<u64>,
        pick_number: Option<u32>,
        pick_repeat_number: Option<u32>,
    },
    JumpEndNumber {
        total_end_number0: Option<u64>,
        end_number0: Option<u32>,
        end_number1: Option<u32>,
        end_repeat_number: Option<u32>,
    },
    Direction {
        mode: Mode,
        forward: bool,
    },
    ShaftState {
        state: ShaftState,
        shaft_word: u64,
    },
    LoomConnectionState {
        state: ConnectionState,
        reason: String,
    },
    LoomInfo {
        name: String,
        num_shafts: u32,
        is_mock: bool,
    },
    Settings(Settings),
    Mode {
        mode: Mode,
    },
    PatternNames {
        names: Vec<String>,
    },
    ReducedPattern(ReducedPattern),
    SeparateWeavingRepeats {
        separate: bool,
    },
    SeparateThreadingRepeats {
        separate: bool,
    },
    ThreadGroupSize {
        group_size: u32,
    },
}

impl ServerMessage {
    pub fn problem(severity: Severity, message: impl Into<String>) -> Self {
        ServerMessage::CommandProblem {
            severity,
            message: message.into(),
        }
    }

    pub fn done(cmd_type: &str, success: bool, message: impl Into<String>) -> Self {
        ServerMessage::CommandDone {
            cmd_type: cmd_type.to_string(),
            success,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_use_snake_case_tags() {
        let cmd: ClientCommand =
            serde_json::from_str(r#"{"type":"jump_to_pick","total":12}"#).unwrap();
        assert_eq!(cmd, ClientCommand::JumpToPick { total: Some(12) });

        let cmd: ClientCommand =
            serde_json::from_str(r#"{"type":"jump_to_end","total":null}"#).unwrap();
        assert_eq!(cmd, ClientCommand::JumpToEnd { total: None });

        let cmd: ClientCommand =
            serde_json::from_str(r#"{"type":"oobcommand","command":"n"}"#).unwrap();
        assert_eq!(cmd.cmd_type(), "oobcommand");
    }

    #[test]
    fn unknown_tag_and_negative_jump_are_rejected() {
        assert!(serde_json::from_str::<ClientCommand>(r#"{"type":"reboot"}"#).is_err());
        assert!(
            serde_json::from_str::<ClientCommand>(r#"{"type":"jump_to_pick","total":-3}"#)
                .is_err()
        );
    }

    #[test]
    fn partial_settings_update_parses() {
        let cmd: ClientCommand = serde_json::from_str(
            r#"{"type":"settings","direction_control":"loom_controlled","thread_group_size":6}"#,
        )
        .unwrap();
        let ClientCommand::Settings(update) = cmd else {
            panic!("expected settings");
        };
        assert_eq!(update.direction_control, Some(DirectionControl::LoomControlled));
        assert_eq!(update.thread_group_size, Some(6));
        assert_eq!(update.loom_name, None);
    }

    #[test]
    fn events_are_tagged_with_their_variant_name() {
        let msg = ServerMessage::LoomConnectionState {
            state: ConnectionState::Connecting,
            reason: String::new(),
        };
        let v: serde_json::Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["type"], "LoomConnectionState");
        assert_eq!(v["state"], "connecting");

        let v = serde_json::to_value(ServerMessage::Settings(Settings::default())).unwrap();
        assert_eq!(v["type"], "Settings");
        assert_eq!(v["direction_control"], "full");
    }
}
