//! The session hub: sole owner of position state.
//!
//! Client commands and loom events both arrive on the inbound queue and
//! are applied one at a time, so a pedal press and a jump cancel can never
//! interleave. Progress is written to the store before it is reported.

use crate::codec::{ExampleCodec, LoomEvent};
use crate::config::{LoomPort, ServerConfig};
use crate::error::{CommandError, LinkError, StoreError};
use crate::link::LoomLink;
use crate::mock_loom::{MockLoom, MockTransport, OOB_COMMANDS};
use crate::phrases::{self, Phrasebook};
use crate::position::{Advance, RepeatCursor};
use crate::protocol::{
    ClientCommand, ClientId, ConnectionState, DirectionControl, InboundMsg, Mode, OutboundMsg,
    ReducedPattern, ServerMessage, Settings, SettingsUpdate, Severity, ShaftState,
};
use crate::reduce::{threading_shaft_word, weaving_shaft_word, JsonPatternReducer, PatternReducer};
use crate::store::{PatternStore, Progress, StoredPattern};
use crate::transport::{TcpTransport, Transport};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

const LOG_TRUNCATE: usize = 200;

pub struct MainLoop {
    inbound_rx: Receiver<InboundMsg>,
    outbox: Outbox,
    store: PatternStore,
    link: LoomLink,
    reducer: Box<dyn PatternReducer>,
    num_shafts: u32,

    settings: Settings,
    phrases: Phrasebook,
    mode: Mode,
    weave_forward: bool,
    thread_low_to_high: bool,
    current: Option<CurrentPattern>,
    shaft_state: ShaftState,
    shaft_word: u64,
}

struct Outbox {
    outbound_tx: Sender<OutboundMsg>,
    debug_tx: Option<Sender<ServerMessage>>,
    client: Option<ClientId>,
}

impl Outbox {
    fn send(&self, msg: ServerMessage) {
        if tracing::enabled!(tracing::Level::DEBUG) {
            let mut text = serde_json::to_string(&msg).unwrap_or_default();
            if text.len() > LOG_TRUNCATE {
                let mut cut = LOG_TRUNCATE;
                while !text.is_char_boundary(cut) {
                    cut -= 1;
                }
                text.truncate(cut);
                text.push_str("...");
            }
            debug!(client = ?self.client, msg = %text, "send");
        }
        if let Some(debug_tx) = &self.debug_tx {
            let _ = debug_tx.try_send(msg.clone());
        }
        if let Some(client_id) = self.client {
            // Best effort: a client too slow to drain its queue gets a
            // fresh initial state when it reconnects.
            let _ = self.outbound_tx.try_send(OutboundMsg::Send { client_id, msg });
        }
    }

    fn connection_state(&self, state: ConnectionState, reason: &str) {
        self.send(ServerMessage::LoomConnectionState {
            state,
            reason: reason.to_string(),
        });
    }
}

/// The two cursors of the selected pattern. Cheap to clone, which is how
/// a change is staged before it is persisted.
#[derive(Clone)]
struct Cursors {
    weave: RepeatCursor,
    thread: RepeatCursor,
}

impl Cursors {
    fn progress(&self) -> Progress {
        Progress {
            pick_number: self.weave.within(),
            pick_repeat_number: self.weave.repeat_number(),
            end_number0: self.thread.within(),
            end_number1: self.thread.end(),
            end_repeat_number: self.thread.repeat_number(),
            thread_group_size: self.thread.step(),
            separate_weaving_repeats: self.weave.separate_repeats(),
            separate_threading_repeats: self.thread.separate_repeats(),
        }
    }
}

struct CurrentPattern {
    pattern: ReducedPattern,
    cursors: Cursors,
}

impl CurrentPattern {
    fn new(pattern: ReducedPattern, progress: Progress) -> Self {
        let weave = RepeatCursor::restore(
            pattern.num_picks(),
            1,
            progress.pick_number,
            progress.pick_number,
            progress.pick_repeat_number,
            progress.separate_weaving_repeats,
        );
        let thread = RepeatCursor::restore(
            pattern.num_ends(),
            progress.thread_group_size.max(1),
            progress.end_number0,
            progress.end_number1,
            progress.end_repeat_number,
            progress.separate_threading_repeats,
        );
        Self {
            pattern,
            cursors: Cursors { weave, thread },
        }
    }
}

impl From<StoredPattern> for CurrentPattern {
    fn from(stored: StoredPattern) -> Self {
        CurrentPattern::new(stored.pattern, stored.progress)
    }
}

impl MainLoop {
    /// Open the store, build the loom link for `config.port` and restore
    /// the most recently used pattern.
    pub fn open(
        config: &ServerConfig,
        inbound_tx: Sender<InboundMsg>,
        inbound_rx: Receiver<InboundMsg>,
        outbound_tx: Sender<OutboundMsg>,
    ) -> Result<Self, StoreError> {
        if config.reset_db {
            info!(path = %config.db_path.display(), "resetting pattern database");
            PatternStore::reset(&config.db_path)?;
        }
        let store = PatternStore::open(&config.db_path, config.max_patterns)?;
        let transport: Box<dyn Transport> = match &config.port {
            LoomPort::Mock => Box::new(MockTransport::new(MockLoom::spawn(
                config.num_shafts,
                config.mock_motion,
            ))),
            LoomPort::Tcp(addr) => Box::new(TcpTransport::new(addr.clone())),
        };
        let link = LoomLink::new(transport, Arc::new(ExampleCodec), config.link, inbound_tx);
        let reducer = Box::new(JsonPatternReducer::new(config.num_shafts));
        Self::new(inbound_rx, outbound_tx, store, link, reducer, config)
    }

    pub fn new(
        inbound_rx: Receiver<InboundMsg>,
        outbound_tx: Sender<OutboundMsg>,
        store: PatternStore,
        link: LoomLink,
        reducer: Box<dyn PatternReducer>,
        config: &ServerConfig,
    ) -> Result<Self, StoreError> {
        let settings = match store.load_settings()? {
            Some(settings) => settings,
            None => Settings {
                loom_name: config.loom_name.clone(),
                thread_group_size: config.default_thread_group_size,
                ..Settings::default()
            },
        };

        let current = match store.most_recent()? {
            Some(name) => match store.get(&name) {
                Ok(stored) => {
                    info!(pattern = %name, "restored pattern");
                    Some(CurrentPattern::from(stored))
                }
                Err(e) => {
                    warn!(pattern = %name, error = %e, "cannot restore pattern");
                    None
                }
            },
            None => None,
        };

        Ok(Self {
            inbound_rx,
            outbox: Outbox {
                outbound_tx,
                debug_tx: None,
                client: None,
            },
            store,
            link,
            reducer,
            num_shafts: config.num_shafts,
            phrases: Phrasebook::for_language(&settings.language),
            settings,
            mode: Mode::Weaving,
            weave_forward: true,
            thread_low_to_high: true,
            current,
            shaft_state: ShaftState::Unknown,
            shaft_word: 0,
        })
    }

    /// Copy every outgoing message to `tx`, whether or not a client is
    /// attached.
    pub fn set_debug_tap(&mut self, tx: Sender<ServerMessage>) {
        self.outbox.debug_tx = Some(tx);
    }

    pub fn current_pattern_name(&self) -> Option<&str> {
        self.current.as_ref().map(|c| c.pattern.name.as_str())
    }

    pub fn loom_state(&self) -> ConnectionState {
        self.link.state()
    }

    /// Drain the inbound queue. Returns false once shutdown was requested
    /// or every sender is gone.
    pub fn tick(&mut self) -> bool {
        loop {
            match self.inbound_rx.try_recv() {
                Ok(msg) => {
                    if !self.handle(msg) {
                        return false;
                    }
                }
                Err(TryRecvError::Empty) => return true,
                Err(TryRecvError::Disconnected) => return false,
            }
        }
    }

    /// Block on the inbound queue until shutdown, or until `deadline`.
    pub fn run(&mut self, deadline: Option<Instant>) {
        loop {
            let msg = match deadline {
                None => match self.inbound_rx.recv() {
                    Ok(msg) => msg,
                    Err(_) => return,
                },
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return;
                    }
                    match self.inbound_rx.recv_timeout(deadline - now) {
                        Ok(msg) => msg,
                        Err(RecvTimeoutError::Timeout) => return,
                        Err(RecvTimeoutError::Disconnected) => return,
                    }
                }
            };
            if !self.handle(msg) {
                return;
            }
        }
    }

    pub fn shutdown(&mut self) {
        let outbox = &self.outbox;
        self.link
            .disconnect("server shutting down", &mut |state, reason| {
                outbox.connection_state(state, reason)
            });
    }

    fn handle(&mut self, msg: InboundMsg) -> bool {
        match msg {
            InboundMsg::ClientConnected {
                client_id,
                socket_addr,
            } => {
                info!(client_id, %socket_addr, "client connected");
                self.outbox.client = Some(client_id);
                self.clear_jumps();
                self.report_initial_state();
                self.connect_loom();
            }
            InboundMsg::ClientDisconnected { client_id } => {
                if self.outbox.client == Some(client_id) {
                    info!(client_id, "client disconnected");
                    self.outbox.client = None;
                }
            }
            InboundMsg::Command { client_id, cmd } => {
                if self.outbox.client == Some(client_id) {
                    self.handle_command(cmd);
                } else {
                    debug!(client_id, "ignoring command from a replaced client");
                }
            }
            InboundMsg::Loom { epoch, event } => {
                if epoch == self.link.epoch() {
                    self.handle_loom_event(event);
                } else {
                    debug!(epoch, ?event, "ignoring stale loom event");
                }
            }
            InboundMsg::LoomProblem { epoch, message } => {
                if epoch == self.link.epoch() {
                    warn!(%message, "bad loom reply");
                    self.status(Severity::Warning, message);
                }
            }
            InboundMsg::LoomClosed { epoch, reason } => {
                if epoch == self.link.epoch() {
                    self.loom_lost(&reason);
                }
            }
            InboundMsg::Shutdown => {
                self.shutdown();
                return false;
            }
        }
        true
    }

    fn connect_loom(&mut self) {
        let outbox = &self.outbox;
        let result = self
            .link
            .connect(&mut |state, reason| outbox.connection_state(state, reason));
        match result {
            Ok(()) => {
                self.shaft_state = ShaftState::Unknown;
                if let Some(n) = self.link.reported_num_shafts() {
                    if n != self.num_shafts {
                        let text = self.phrases.t("loom reports a different number of shafts");
                        let configured = self.num_shafts;
                        self.status(Severity::Warning, format!("{text}: {n} != {configured}"));
                    }
                }
                if self.settings.direction_control == DirectionControl::SoftwareControlled {
                    self.push_weave_direction();
                }
            }
            Err(e) => warn!(error = %e, "cannot connect to loom"),
        }
    }

    fn loom_lost(&mut self, reason: &str) {
        let outbox = &self.outbox;
        self.link
            .connection_lost(reason, &mut |state, why| outbox.connection_state(state, why));
        self.shaft_state = ShaftState::Unknown;
        self.report_shaft_state();
    }

    fn write_to_loom(&mut self, f: impl FnOnce(&mut LoomLink) -> Result<(), LinkError>) {
        if !self.link.is_connected() {
            return;
        }
        if let Err(e) = f(&mut self.link) {
            let text = self.phrases.t("loom write failed");
            self.status(Severity::Error, format!("{text}: {e}"));
            self.loom_lost(&e.to_string());
        }
    }

    fn push_weave_direction(&mut self) {
        let forward = self.weave_forward;
        self.write_to_loom(|link| link.send_direction(forward));
    }

    // Client commands

    fn handle_command(&mut self, cmd: ClientCommand) {
        let cmd_type = cmd.cmd_type();
        debug!(cmd_type, "command");
        match self.dispatch(cmd) {
            Ok(()) => self.outbox.send(ServerMessage::done(cmd_type, true, "")),
            Err(e) => {
                warn!(cmd_type, error = %e, "command failed");
                let message = match &e {
                    CommandError::Persistence(inner) => {
                        format!("{}: {inner}", self.phrases.t("could not save"))
                    }
                    other => other.to_string(),
                };
                self.outbox
                    .send(ServerMessage::problem(e.severity(), message.clone()));
                self.outbox.send(ServerMessage::done(cmd_type, false, message));
            }
        }
    }

    fn dispatch(&mut self, cmd: ClientCommand) -> Result<(), CommandError> {
        match cmd {
            ClientCommand::SelectPattern { name } => self.cmd_select_pattern(&name),
            ClientCommand::Upload { name, data } => self.cmd_upload(name, &data),
            ClientCommand::ClearPatternNames => self.cmd_clear_pattern_names(),
            ClientCommand::Direction { forward } => self.cmd_direction(forward),
            ClientCommand::JumpToPick { total } => self.cmd_jump_to_pick(total),
            ClientCommand::JumpToEnd { total } => self.cmd_jump_to_end(total),
            ClientCommand::ThreadGroupSize { group_size } => self.cmd_thread_group_size(group_size),
            ClientCommand::SeparateWeavingRepeats { separate } => {
                self.commit(|c| c.weave.set_separate_repeats(separate))?;
                self.outbox
                    .send(ServerMessage::SeparateWeavingRepeats { separate });
                Ok(())
            }
            ClientCommand::SeparateThreadingRepeats { separate } => {
                self.commit(|c| c.thread.set_separate_repeats(separate))?;
                self.outbox
                    .send(ServerMessage::SeparateThreadingRepeats { separate });
                Ok(())
            }
            ClientCommand::Mode { mode } => {
                self.mode = mode;
                self.outbox.send(ServerMessage::Mode { mode });
                Ok(())
            }
            ClientCommand::Settings(update) => self.cmd_settings(update),
            ClientCommand::OobCommand { command } => self.cmd_oob(&command),
        }
    }

    fn cmd_select_pattern(&mut self, name: &str) -> Result<(), CommandError> {
        let t = self.phrases;
        let stored = self.store.get(name).map_err(|e| match e {
            StoreError::NotFound(name) => {
                CommandError::Protocol(format!("{}: {name}", t.t("no such pattern")))
            }
            other => other.into(),
        })?;
        self.store.touch(name)?;
        self.install_pattern(CurrentPattern::from(stored));
        self.report_pattern_names();
        Ok(())
    }

    fn cmd_upload(&mut self, name: String, data: &str) -> Result<(), CommandError> {
        if name.trim().is_empty() {
            return Err(self.protocol_error("pattern name is empty"));
        }
        let pattern = self
            .reducer
            .reduce(&name, data)
            .map_err(|e| CommandError::Protocol(e.to_string()))?;
        let replacing = self.store.names()?.contains(&name);
        let progress = Progress::initial(&pattern, self.settings.thread_group_size);
        let keep = self.current_pattern_name().map(str::to_string);
        let evicted = self.store.put(&pattern, &progress, keep.as_deref())?;
        if !evicted.is_empty() {
            info!(?evicted, "evicted old patterns");
        }
        info!(pattern = %name, replacing, "stored pattern");
        if replacing {
            let text = self.phrases.t("replaced pattern; its progress was reset");
            self.status(Severity::Warning, format!("{text}: {name}"));
        }
        if keep.as_deref() == Some(name.as_str()) {
            self.install_pattern(CurrentPattern::new(pattern, progress));
        }
        self.report_pattern_names();
        Ok(())
    }

    fn cmd_clear_pattern_names(&mut self) -> Result<(), CommandError> {
        let keep = self.current_pattern_name().map(str::to_string);
        self.store.clear_all_except(keep.as_deref())?;
        self.report_pattern_names();
        Ok(())
    }

    fn cmd_direction(&mut self, forward: bool) -> Result<(), CommandError> {
        match self.mode {
            Mode::Settings => Err(CommandError::StateConflict(
                self.phrases.t("no direction to change in settings mode").to_string(),
            )),
            Mode::Weaving => {
                if self.settings.direction_control == DirectionControl::LoomControlled {
                    return Err(CommandError::StateConflict(
                        self.phrases
                            .t("weaving direction is controlled by the loom")
                            .to_string(),
                    ));
                }
                self.weave_forward = forward;
                self.push_weave_direction();
                self.report_weave_direction();
                Ok(())
            }
            Mode::Threading => {
                self.thread_low_to_high = forward;
                self.report_thread_direction();
                Ok(())
            }
        }
    }

    fn cmd_jump_to_pick(&mut self, total: Option<u64>) -> Result<(), CommandError> {
        let t = self.phrases;
        let current = self.current.as_mut().ok_or_else(|| {
            let (what, why) = (t.t("cannot jump to a pick"), t.t("no pattern"));
            CommandError::StateConflict(format!("{what}: {why}"))
        })?;
        if !current.cursors.weave.request_jump(total) {
            return Err(CommandError::Protocol(format!(
                "{} {}",
                t.t("invalid pick number"),
                total.unwrap_or_default()
            )));
        }
        self.report_jump_pick();
        Ok(())
    }

    fn cmd_jump_to_end(&mut self, total: Option<u64>) -> Result<(), CommandError> {
        let t = self.phrases;
        let current = self.current.as_mut().ok_or_else(|| {
            let (what, why) = (t.t("cannot jump to an end"), t.t("no pattern"));
            CommandError::StateConflict(format!("{what}: {why}"))
        })?;
        if !current.cursors.thread.request_jump(total) {
            return Err(CommandError::Protocol(format!(
                "{} {}",
                t.t("invalid end number"),
                total.unwrap_or_default()
            )));
        }
        self.report_jump_end();
        Ok(())
    }

    fn cmd_thread_group_size(&mut self, group_size: u32) -> Result<(), CommandError> {
        if group_size == 0 {
            return Err(self.protocol_error("thread group size must be positive"));
        }
        self.commit(|c| c.thread.set_step(group_size))?;
        self.outbox.send(ServerMessage::ThreadGroupSize { group_size });
        self.report_current_end();
        self.report_jump_end();
        Ok(())
    }

    fn cmd_settings(&mut self, update: SettingsUpdate) -> Result<(), CommandError> {
        let mut next = self.settings.clone();
        if let Some(loom_name) = update.loom_name {
            if loom_name.trim().is_empty() {
                return Err(self.protocol_error("loom name is empty"));
            }
            next.loom_name = loom_name;
        }
        if let Some(language) = update.language {
            if language.trim().is_empty() {
                return Err(self.protocol_error("language is empty"));
            }
            if Phrasebook::lookup(&language).is_none() {
                let known = phrases::languages().collect::<Vec<_>>().join(", ");
                return Err(CommandError::Protocol(format!(
                    "{}: {language} ({known})",
                    self.phrases.t("unknown language")
                )));
            }
            next.language = language;
        }
        if let Some(size) = update.thread_group_size {
            if size == 0 {
                return Err(self.protocol_error("thread group size must be positive"));
            }
            next.thread_group_size = size;
        }
        if let Some(v) = update.direction_control {
            next.direction_control = v;
        }
        if let Some(v) = update.end1_on_right {
            next.end1_on_right = v;
        }
        if let Some(v) = update.thread_right_to_left {
            next.thread_right_to_left = v;
        }
        if let Some(v) = update.thread_back_to_front {
            next.thread_back_to_front = v;
        }

        self.store.save_settings(&next)?;
        let took_control = next.direction_control == DirectionControl::SoftwareControlled
            && self.settings.direction_control != DirectionControl::SoftwareControlled;
        self.settings = next;
        self.phrases = Phrasebook::for_language(&self.settings.language);
        self.outbox.send(ServerMessage::Settings(self.settings.clone()));
        self.report_loom_info();
        if took_control {
            self.push_weave_direction();
        }
        Ok(())
    }

    fn cmd_oob(&mut self, command: &str) -> Result<(), CommandError> {
        if !self.link.is_mock() {
            return Err(self.protocol_error("out-of-band commands need the mock loom"));
        }
        if !OOB_COMMANDS.contains(&command) {
            return Err(CommandError::Protocol(format!(
                "{} {command:?}",
                self.phrases.t("unknown out-of-band command")
            )));
        }
        self.link.send_oob(command)?;
        Ok(())
    }

    fn protocol_error(&self, phrase: &'static str) -> CommandError {
        CommandError::Protocol(self.phrases.t(phrase).to_string())
    }

    /// Apply `update` to a copy of the cursors, persist it, then adopt it.
    /// On a store failure nothing changes.
    fn commit(&mut self, update: impl FnOnce(&mut Cursors)) -> Result<(), CommandError> {
        let no_pattern = self.phrases.t("no pattern");
        let current = self
            .current
            .as_mut()
            .ok_or_else(|| CommandError::StateConflict(no_pattern.to_string()))?;
        let mut cursors = current.cursors.clone();
        update(&mut cursors);
        self.store
            .save_progress(&current.pattern.name, &cursors.progress())?;
        current.cursors = cursors;
        Ok(())
    }

    fn install_pattern(&mut self, pattern: CurrentPattern) {
        info!(pattern = %pattern.pattern.name, "selected pattern");
        self.current = Some(pattern);
        self.thread_low_to_high = true;
        if self.settings.direction_control != DirectionControl::LoomControlled {
            self.weave_forward = true;
            self.push_weave_direction();
        }
        self.report_current_pattern();
        self.report_weave_direction();
        self.report_thread_direction();
    }

    fn clear_jumps(&mut self) {
        if let Some(current) = self.current.as_mut() {
            current.cursors.weave.cancel_jump();
            current.cursors.thread.cancel_jump();
        }
    }

    // Loom events

    fn handle_loom_event(&mut self, event: LoomEvent) {
        match event {
            LoomEvent::Advance => self.handle_next_pick_request(),
            LoomEvent::Direction { forward } => {
                if self.settings.direction_control == DirectionControl::SoftwareControlled {
                    if forward != self.weave_forward {
                        debug!(forward, "overriding loom direction");
                        self.push_weave_direction();
                    }
                    return;
                }
                self.weave_forward = forward;
                self.report_weave_direction();
            }
            LoomEvent::Shafts(word) => {
                self.shaft_word = word;
                self.report_shaft_state();
            }
            LoomEvent::Motion { moving } => {
                self.shaft_state = if moving {
                    ShaftState::Moving
                } else {
                    ShaftState::Done
                };
                self.report_shaft_state();
            }
            LoomEvent::Identity { num_shafts } => {
                debug!(num_shafts, "unsolicited loom identity");
            }
        }
    }

    fn handle_next_pick_request(&mut self) {
        let mode = self.mode;
        let (weave_forward, thread_forward) = (self.weave_forward, self.thread_low_to_high);
        let Some(current) = self.current.as_mut() else {
            debug!("pick requested with no pattern");
            return;
        };
        if mode == Mode::Settings {
            debug!("pick requested in settings mode; ignoring");
            return;
        }

        let mut cursors = current.cursors.clone();
        let had_jumps =
            cursors.weave.staged_total().is_some() || cursors.thread.staged_total().is_some();
        let outcome = if mode == Mode::Weaving {
            cursors.thread.cancel_jump();
            cursors.weave.set_forward(weave_forward);
            cursors.weave.advance()
        } else {
            cursors.weave.cancel_jump();
            cursors.thread.set_forward(thread_forward);
            cursors.thread.advance()
        };

        if let Err(e) = self
            .store
            .save_progress(&current.pattern.name, &cursors.progress())
        {
            warn!(error = %e, "cannot save progress; pick not applied");
            let text = self.phrases.t("could not save progress");
            self.status(Severity::Error, format!("{text}: {e}"));
            return;
        }
        current.cursors = cursors;

        let shaft_word = match mode {
            Mode::Weaving => weaving_shaft_word(&current.pattern, current.cursors.weave.within()),
            _ => threading_shaft_word(
                &current.pattern,
                current.cursors.thread.within(),
                current.cursors.thread.end(),
            ),
        };
        debug!(?outcome, shaft_word, "next pick");
        self.write_to_loom(|link| link.send_shafts(shaft_word));

        if outcome == Advance::AtStart {
            let text = match mode {
                Mode::Weaving => self.phrases.t("at the start of weaving"),
                _ => self.phrases.t("at the start of threading"),
            };
            self.status(Severity::Info, text);
        }
        match mode {
            Mode::Weaving => self.report_current_pick(),
            _ => self.report_current_end(),
        }
        if had_jumps {
            self.report_jump_pick();
            self.report_jump_end();
        }
    }

    // Reports

    fn status(&self, severity: Severity, message: impl Into<String>) {
        self.outbox.send(ServerMessage::StatusMessage {
            severity,
            message: message.into(),
        });
    }

    fn report_initial_state(&mut self) {
        self.outbox.connection_state(self.link.state(), "");
        self.report_loom_info();
        self.outbox.send(ServerMessage::Settings(self.settings.clone()));
        self.outbox.send(ServerMessage::Mode { mode: self.mode });
        self.report_pattern_names();
        self.report_weave_direction();
        self.report_thread_direction();
        self.report_current_pattern();
        self.report_shaft_state();
    }

    fn report_loom_info(&self) {
        self.outbox.send(ServerMessage::LoomInfo {
            name: self.settings.loom_name.clone(),
            num_shafts: self.num_shafts,
            is_mock: self.link.is_mock(),
        });
    }

    fn report_pattern_names(&self) {
        match self.store.names() {
            Ok(names) => self.outbox.send(ServerMessage::PatternNames { names }),
            Err(e) => {
                warn!(error = %e, "cannot read pattern names");
                let text = self.phrases.t("cannot read pattern names");
                self.status(Severity::Error, format!("{text}: {e}"));
            }
        }
    }

    fn report_current_pattern(&self) {
        let Some(current) = &self.current else {
            return;
        };
        let c = &current.cursors;
        self.outbox
            .send(ServerMessage::ReducedPattern(current.pattern.clone()));
        self.outbox.send(ServerMessage::ThreadGroupSize {
            group_size: c.thread.step(),
        });
        self.outbox.send(ServerMessage::SeparateWeavingRepeats {
            separate: c.weave.separate_repeats(),
        });
        self.outbox.send(ServerMessage::SeparateThreadingRepeats {
            separate: c.thread.separate_repeats(),
        });
        self.report_current_end();
        self.report_current_pick();
        self.report_jump_end();
        self.report_jump_pick();
    }

    fn report_current_pick(&self) {
        let Some(current) = &self.current else {
            return;
        };
        let weave = &current.cursors.weave;
        self.outbox.send(ServerMessage::CurrentPickNumber {
            total_picks: weave.total(),
            pick_number: weave.within(),
            pick_repeat_number: weave.repeat_number(),
        });
    }

    fn report_current_end(&self) {
        let Some(current) = &self.current else {
            return;
        };
        let thread = &current.cursors.thread;
        self.outbox.send(ServerMessage::CurrentEndNumber {
            total_end_number0: thread.total(),
            total_end_number1: thread.total_end(),
            end_number0: thread.within(),
            end_number1: thread.end(),
            end_repeat_number: thread.repeat_number(),
        });
    }

    fn report_jump_pick(&self) {
        let staged = self.current.as_ref().and_then(|c| {
            let weave = &c.cursors.weave;
            Some((weave.staged_total()?, weave.staged_position()?))
        });
        self.outbox.send(ServerMessage::JumpPickNumber {
            total_picks: staged.map(|(total, _)| total),
            pick_number: staged.map(|(_, pos)| pos.start),
            pick_repeat_number: staged.map(|(_, pos)| pos.repeat_number),
        });
    }

    fn report_jump_end(&self) {
        let staged = self.current.as_ref().and_then(|c| {
            let thread = &c.cursors.thread;
            Some((thread.staged_total()?, thread.staged_position()?))
        });
        self.outbox.send(ServerMessage::JumpEndNumber {
            total_end_number0: staged.map(|(total, _)| total),
            end_number0: staged.map(|(_, pos)| pos.start),
            end_number1: staged.map(|(_, pos)| pos.end),
            end_repeat_number: staged.map(|(_, pos)| pos.repeat_number),
        });
    }

    fn report_weave_direction(&self) {
        self.outbox.send(ServerMessage::Direction {
            mode: Mode::Weaving,
            forward: self.weave_forward,
        });
    }

    fn report_thread_direction(&self) {
        self.outbox.send(ServerMessage::Direction {
            mode: Mode::Threading,
            forward: self.thread_low_to_high,
        });
    }

    fn report_shaft_state(&self) {
        self.outbox.send(ServerMessage::ShaftState {
            state: self.shaft_state,
            shaft_word: self.shaft_word,
        });
    }
}
