//! Host-driven API: NinjamClient receives events from the host (bytes, transport status,
//! timer firings, decoded audio, user commands) and returns actions.
//!
//! One client owns all mutable session state and is driven from a single task, so
//! nothing here locks. Reconnecting goes through `reinit`, which starts a fresh session.

use std::ops::ControlFlow;
use std::time::{Duration, Instant};

use crate::auth::Credentials;
use crate::download::{BeginOutcome, DownloadManager};
use crate::protocol::{
    AuthChallenge, AuthReply, AuthUser, ChannelInfo, ChatCommand, ChatMessage, ConfigChange,
    DownloadBegin, DownloadWrite, Guid, Message, ProtocolError, UsermaskEntry, CLIENT_VERSION,
    SUBSCRIBE_ALL,
};
use crate::reassembly::StreamReassembler;
use crate::registry::{ChannelChange, Playback, Registry};
use crate::timing::{TempoState, TimerHandle, TimerKind, Timers, KEEPALIVE_INTERVAL};
use crate::wire::FrameDecodeError;

/// Session state. Every outbound protocol operation checks it first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Uninitialized,
    /// The host could not create a transport; terminal for this client.
    SocketUnavailable,
    Ready,
    Connecting,
    Authenticated,
    Disconnecting,
}

/// A local channel announced to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalChannel {
    pub name: String,
    pub volume: i16,
    pub pan: i8,
}

impl LocalChannel {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            volume: 0,
            pan: 0,
        }
    }
}

/// Flags sent with each local channel in set-channel-info.
const LOCAL_CHANNEL_FLAGS: u8 = 1;

/// Ticket for one finished interval handed to the host's decoder.
/// Results for a previous session are dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeJob {
    pub guid: Guid,
    pub user: String,
    pub channel_index: u8,
    session: u64,
}

/// Decoder failure reported by the host.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("audio decode failed: {0}")]
pub struct AudioDecodeError(pub String);

/// Notifications for the UI / caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Server challenge. Answer with `respond_to_challenge` once the license is decided.
    Challenge(AuthChallenge),
    Authenticated {
        full_username: Option<String>,
        max_channels: Option<u8>,
    },
    Chat(ChatMessage),
    TempoChanged {
        bpm: u16,
        bpi: u16,
    },
    Disconnected {
        reason: Option<String>,
    },
    /// Parsing of the current buffer stopped. The caller decides whether to disconnect.
    ProtocolError(ProtocolError),
}

/// Action for the host to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action<A> {
    Connect { host: String, port: u16 },
    Send(Vec<u8>),
    CloseTransport,
    /// Call `on_timer(handle, ..)` after the duration.
    Schedule(TimerHandle, Duration),
    Cancel(TimerHandle),
    /// Decode the assembled interval and call `on_decoded(job, ..)` with the result.
    Decode(DecodeJob, Vec<u8>),
    Play(Playback<A>),
    Notify(Event),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("invalid host format {0:?} (expected hostname:port)")]
    InvalidHostFormat(String),
    #[error("operation not allowed in state {0:?}")]
    InvalidState(ConnectionState),
    #[error("no server challenge received yet")]
    NoChallenge,
}

/// Main engine. `A` is the host's decoded-audio handle.
pub struct NinjamClient<A> {
    state: ConnectionState,
    anonymous: bool,
    autosubscribe: bool,
    local_channels: Vec<LocalChannel>,
    timers: Timers,
    session: u64,
    host: Option<(String, u16)>,
    credentials: Option<Credentials>,
    full_username: Option<String>,
    max_channels: Option<u8>,
    topic: Option<String>,
    tempo: TempoState,
    registry: Registry<A>,
    downloads: DownloadManager,
    reassembler: StreamReassembler,
    last_send: Option<Instant>,
    last_error: Option<ProtocolError>,
}

impl<A> NinjamClient<A> {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Uninitialized,
            anonymous: true,
            autosubscribe: true,
            local_channels: Vec::new(),
            timers: Timers::new(),
            session: 0,
            host: None,
            credentials: None,
            full_username: None,
            max_channels: None,
            topic: None,
            tempo: TempoState::default(),
            registry: Registry::new(),
            downloads: DownloadManager::new(),
            reassembler: StreamReassembler::new(),
            last_send: None,
            last_error: None,
        }
    }

    /// Reset all per-session state and become `Ready`. Settings and timer
    /// generations carry over.
    fn reinit(&mut self) {
        self.session += 1;
        self.state = ConnectionState::Ready;
        self.host = None;
        self.credentials = None;
        self.full_username = None;
        self.max_channels = None;
        self.topic = None;
        self.tempo = TempoState::default();
        self.registry.clear();
        self.downloads.clear();
        self.reassembler.clear();
        self.last_send = None;
        self.last_error = None;
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn set_anonymous(&mut self, anonymous: bool) {
        self.anonymous = anonymous;
    }

    pub fn set_autosubscribe(&mut self, autosubscribe: bool) {
        self.autosubscribe = autosubscribe;
    }

    pub fn add_local_channel(&mut self, channel: LocalChannel) {
        self.local_channels.push(channel);
    }

    pub fn local_channels(&self) -> &[LocalChannel] {
        &self.local_channels
    }

    pub fn host(&self) -> Option<(&str, u16)> {
        self.host.as_ref().map(|(h, p)| (h.as_str(), *p))
    }

    /// Identity the server assigned us in its auth reply.
    pub fn full_username(&self) -> Option<&str> {
        self.full_username.as_deref()
    }

    pub fn max_channels(&self) -> Option<u8> {
        self.max_channels
    }

    pub fn topic(&self) -> Option<&str> {
        self.topic.as_deref()
    }

    pub fn tempo(&self) -> TempoState {
        self.tempo
    }

    pub fn registry(&self) -> &Registry<A> {
        &self.registry
    }

    pub fn downloads(&self) -> &DownloadManager {
        &self.downloads
    }

    /// Last parse error of this session, if any.
    pub fn last_error(&self) -> Option<&ProtocolError> {
        self.last_error.as_ref()
    }

    /// Host reports whether it could create a transport.
    pub fn on_transport_created(&mut self, success: bool) {
        if self.state != ConnectionState::Uninitialized {
            tracing::warn!("transport created twice (state {:?})", self.state);
            return;
        }
        if success {
            self.reinit();
        } else {
            tracing::warn!("could not create transport");
            self.state = ConnectionState::SocketUnavailable;
        }
    }

    /// Start connecting to `host` (`hostname:port`). A no-op unless `Ready`.
    pub fn connect(
        &mut self,
        host: &str,
        username: &str,
        password: &str,
    ) -> Result<Vec<Action<A>>, SessionError> {
        if self.state != ConnectionState::Ready {
            tracing::warn!("can't connect in state {:?}", self.state);
            return Ok(Vec::new());
        }
        let (hostname, port) = parse_host(host)?;
        tracing::info!("connecting to {}:{} as {}", hostname, port, username);
        self.credentials = Some(Credentials::new(username, password, self.anonymous));
        self.host = Some((hostname.clone(), port));
        self.state = ConnectionState::Connecting;
        Ok(vec![Action::Connect {
            host: hostname,
            port,
        }])
    }

    /// Host reports the outcome of the connect attempt.
    pub fn on_transport_connected(&mut self, success: bool) -> Vec<Action<A>> {
        let mut actions = Vec::new();
        if success {
            tracing::debug!("transport connected, waiting for challenge");
        } else if self.state == ConnectionState::Connecting {
            tracing::warn!("connect attempt failed");
            self.teardown(Some("connection failed".to_string()), &mut actions);
        }
        actions
    }

    /// Host reports the stream was closed by the remote end or failed.
    pub fn on_transport_closed(&mut self) -> Vec<Action<A>> {
        let mut actions = Vec::new();
        if self.is_live() {
            self.teardown(Some("connection closed".to_string()), &mut actions);
        }
        actions
    }

    /// Answer the pending challenge. `accept_license` sets the capabilities flag.
    pub fn respond_to_challenge(
        &mut self,
        accept_license: bool,
    ) -> Result<Vec<Action<A>>, SessionError> {
        if self.state != ConnectionState::Connecting {
            return Err(SessionError::InvalidState(self.state));
        }
        let creds = self.credentials.as_ref().ok_or(SessionError::NoChallenge)?;
        let password_hash = creds.response().ok_or(SessionError::NoChallenge)?;
        let msg = Message::AuthUser(AuthUser {
            password_hash,
            username: creds.wire_username(),
            capabilities: u32::from(accept_license),
            client_version: CLIENT_VERSION,
        });
        tracing::debug!("sending challenge response");
        Ok(vec![self.send(&msg)])
    }

    /// Subscribe to all channels of each user.
    pub fn set_usermask(&mut self, users: &[String]) -> Result<Vec<Action<A>>, SessionError> {
        self.require_authenticated()?;
        Ok(vec![self.send(&usermask_message(users))])
    }

    /// Announce our local channels.
    pub fn set_channel_info(&mut self) -> Result<Vec<Action<A>>, SessionError> {
        self.require_authenticated()?;
        Ok(vec![self.channel_info()])
    }

    pub fn submit_chat(&mut self, text: &str) -> Result<Vec<Action<A>>, SessionError> {
        self.send_chat(ChatMessage::new("MSG", [text, "", "", ""]))
    }

    pub fn submit_private(
        &mut self,
        recipient: &str,
        text: &str,
    ) -> Result<Vec<Action<A>>, SessionError> {
        self.send_chat(ChatMessage::new("PRIVMSG", [recipient, text, "", ""]))
    }

    pub fn submit_topic(&mut self, text: &str) -> Result<Vec<Action<A>>, SessionError> {
        self.send_chat(ChatMessage::new("TOPIC", [text, "", "", ""]))
    }

    fn send_chat(&mut self, chat: ChatMessage) -> Result<Vec<Action<A>>, SessionError> {
        self.require_authenticated()?;
        Ok(vec![self.send(&Message::Chat(chat))])
    }

    /// Tear the session down and return to `Ready`.
    pub fn disconnect(&mut self, reason: Option<String>) -> Vec<Action<A>> {
        let mut actions = Vec::new();
        if self.is_live() {
            self.teardown(reason, &mut actions);
        } else {
            tracing::warn!("disconnect ignored in state {:?}", self.state);
        }
        actions
    }

    /// Feed bytes from the transport. Complete messages are dispatched in order; an
    /// unknown or malformed message stops this pass and is reported as `Event::ProtocolError`.
    pub fn on_receive(&mut self, bytes: &[u8]) -> Vec<Action<A>> {
        let mut actions = Vec::new();
        let session = self.session;
        let mut reassembler = std::mem::take(&mut self.reassembler);
        let framed = reassembler.feed_with(bytes, |frame| match Message::decode(&frame) {
            Ok(msg) => {
                self.dispatch(msg, &mut actions);
                if self.session == session {
                    ControlFlow::Continue(())
                } else {
                    ControlFlow::Break(())
                }
            }
            Err(e) => {
                tracing::warn!(
                    "stopping parse: {} ({} payload bytes)",
                    e,
                    frame.payload.len()
                );
                self.last_error = Some(e.clone());
                actions.push(Action::Notify(Event::ProtocolError(e)));
                ControlFlow::Break(())
            }
        });
        if let Err(FrameDecodeError::TooLarge { msg_type, len }) = framed {
            tracing::warn!("stopping parse: 0x{:02x} frame declares {} bytes", msg_type, len);
            let e = ProtocolError::FrameTooLarge { msg_type, len };
            self.last_error = Some(e.clone());
            actions.push(Action::Notify(Event::ProtocolError(e)));
        }
        // A teardown during dispatch already installed a fresh reassembler.
        if self.session == session {
            self.reassembler = reassembler;
        }
        actions
    }

    /// Host reports a timer firing. Handles that were cancelled or replaced are ignored.
    pub fn on_timer(&mut self, handle: TimerHandle, now: Instant) -> Vec<Action<A>> {
        let mut actions = Vec::new();
        if !self.timers.is_live(handle) {
            tracing::debug!("ignoring stale timer {:?}", handle);
            return actions;
        }
        self.timers.disarm(handle.kind);
        match handle.kind {
            TimerKind::Interval => self.begin_interval(&mut actions),
            TimerKind::Beat => self.advance_beat(&mut actions),
            TimerKind::Keepalive => {
                let idle = self
                    .last_send
                    .map_or(true, |t| now.saturating_duration_since(t) >= KEEPALIVE_INTERVAL);
                if self.state == ConnectionState::Authenticated && idle {
                    actions.push(self.send(&Message::Keepalive));
                }
                let next = self.timers.arm(TimerKind::Keepalive);
                actions.push(Action::Schedule(next, KEEPALIVE_INTERVAL));
            }
        }
        actions
    }

    /// Host reports the result of a `Decode` action.
    pub fn on_decoded(&mut self, job: DecodeJob, result: Result<A, AudioDecodeError>) {
        if job.session != self.session {
            tracing::debug!("dropping decoded interval {} from an old session", job.guid);
            return;
        }
        match result {
            Ok(audio) => {
                if self
                    .registry
                    .enqueue_ready(&job.user, job.channel_index, audio)
                    .is_err()
                {
                    tracing::debug!(
                        "discarding interval {} for departed {}/{}",
                        job.guid,
                        job.user,
                        job.channel_index
                    );
                }
            }
            Err(e) => tracing::warn!("interval {} from {} lost: {}", job.guid, job.user, e),
        }
    }

    fn dispatch(&mut self, msg: Message, actions: &mut Vec<Action<A>>) {
        match msg {
            Message::AuthChallenge(challenge) => self.on_challenge(challenge, actions),
            Message::AuthReply(reply) => self.on_auth_reply(reply, actions),
            Message::ConfigChange(config) => self.on_config_change(config, actions),
            Message::UserInfoChange(records) => {
                let mut new_users: Vec<String> = Vec::new();
                for record in &records {
                    let change = self.registry.apply(record);
                    tracing::debug!(
                        "userinfo {}/{}: {:?}",
                        record.username,
                        record.channel_index,
                        change
                    );
                    if matches!(change, ChannelChange::Added { .. })
                        && !new_users.contains(&record.username)
                    {
                        new_users.push(record.username.clone());
                    }
                }
                if self.autosubscribe && !new_users.is_empty() {
                    actions.push(self.send(&usermask_message(&new_users)));
                }
            }
            Message::DownloadBegin(begin) => self.on_download_begin(begin),
            Message::DownloadWrite(write) => self.on_download_write(write, actions),
            Message::Chat(chat) => self.on_chat(chat, actions),
            Message::Keepalive => {
                if self.state == ConnectionState::Authenticated {
                    actions.push(self.send(&Message::Keepalive));
                }
            }
            other @ (Message::AuthUser(_) | Message::SetUsermask(_) | Message::SetChannelInfo(_)) => {
                tracing::warn!(
                    "ignoring client-only message 0x{:02x} from server",
                    other.msg_type()
                );
            }
        }
    }

    fn on_challenge(&mut self, challenge: AuthChallenge, actions: &mut Vec<Action<A>>) {
        let Some(creds) = self.credentials.as_mut() else {
            tracing::warn!("challenge received with no connect in progress");
            return;
        };
        creds.answer_challenge(&challenge.challenge);
        tracing::info!(
            "server challenge (protocol 0x{:08x}, capabilities 0x{:08x})",
            challenge.protocol_version,
            challenge.server_capabilities
        );
        actions.push(Action::Notify(Event::Challenge(challenge)));
    }

    fn on_auth_reply(&mut self, reply: AuthReply, actions: &mut Vec<Action<A>>) {
        if self.state != ConnectionState::Connecting {
            tracing::warn!("auth reply ignored in state {:?}", self.state);
            return;
        }
        if !reply.succeeded() {
            tracing::warn!("server auth failed: {:?}", reply.message);
            self.teardown(reply.message, actions);
            return;
        }
        tracing::info!("authenticated as {:?}", reply.message);
        self.state = ConnectionState::Authenticated;
        self.full_username = reply.message.clone();
        self.max_channels = reply.max_channels;
        let keepalive = self.timers.arm(TimerKind::Keepalive);
        actions.push(Action::Schedule(keepalive, KEEPALIVE_INTERVAL));
        actions.push(self.channel_info());
        actions.push(Action::Notify(Event::Authenticated {
            full_username: reply.message,
            max_channels: reply.max_channels,
        }));
    }

    fn on_config_change(&mut self, config: ConfigChange, actions: &mut Vec<Action<A>>) {
        tracing::info!("tempo change: {} bpm, {} bpi", config.bpm, config.bpi);
        self.tempo.bpm = config.bpm;
        self.tempo.bpi = config.bpi;
        if !self.timers.is_armed(TimerKind::Interval) {
            self.begin_interval(actions);
        }
        actions.push(Action::Notify(Event::TempoChanged {
            bpm: config.bpm,
            bpi: config.bpi,
        }));
    }

    fn on_download_begin(&mut self, begin: DownloadBegin) {
        match self.downloads.begin(
            begin.guid,
            &begin.username,
            begin.channel_index,
            begin.fourcc,
        ) {
            BeginOutcome::Started => tracing::debug!(
                "download {} begins for {}/{} (~{} bytes)",
                begin.guid,
                begin.username,
                begin.channel_index,
                begin.estimated_size
            ),
            BeginOutcome::Duplicate => {
                tracing::warn!("download begin for live guid {}, ignored", begin.guid)
            }
            BeginOutcome::UnsupportedFourCc(fourcc) => tracing::warn!(
                "download {} has unsupported fourcc {:?}, ignored",
                begin.guid,
                fourcc.to_string()
            ),
        }
    }

    fn on_download_write(&mut self, write: DownloadWrite, actions: &mut Vec<Action<A>>) {
        let is_final = write.is_final();
        if !self.downloads.append_chunk(&write.guid, write.data) {
            tracing::warn!("chunk for unknown guid {}, dropped", write.guid);
            return;
        }
        if !is_final {
            return;
        }
        if let Some(done) = self.downloads.finish(&write.guid) {
            tracing::debug!(
                "interval {} complete: {} bytes for {}/{}",
                done.guid,
                done.bytes.len(),
                done.username,
                done.channel_index
            );
            let job = DecodeJob {
                guid: done.guid,
                user: done.username,
                channel_index: done.channel_index,
                session: self.session,
            };
            actions.push(Action::Decode(job, done.bytes));
        }
    }

    fn on_chat(&mut self, chat: ChatMessage, actions: &mut Vec<Action<A>>) {
        match chat.kind() {
            ChatCommand::Topic => {
                tracing::info!("topic set by {:?}: {}", chat.arg1, chat.arg2);
                self.topic = Some(chat.arg2.clone());
            }
            ChatCommand::Join => {
                if self.registry.join(&chat.arg1) {
                    tracing::info!("{} joined", chat.arg1);
                }
            }
            ChatCommand::Part => {
                let dropped = self.downloads.drop_all_for_user(&chat.arg1);
                self.registry.part(&chat.arg1);
                tracing::info!("{} left ({} downloads dropped)", chat.arg1, dropped);
            }
            _ => {}
        }
        actions.push(Action::Notify(Event::Chat(chat)));
    }

    /// Start an interval: play one ready buffer per channel, reset the beat counter,
    /// and schedule the next interval. Does nothing while the tempo is unknown.
    fn begin_interval(&mut self, actions: &mut Vec<Action<A>>) {
        let (Some(interval), Some(beat)) =
            (self.tempo.interval_duration(), self.tempo.beat_duration())
        else {
            tracing::warn!(
                "interval driver idle: tempo {} bpm / {} bpi",
                self.tempo.bpm,
                self.tempo.bpi
            );
            return;
        };
        tracing::debug!("new interval, duration {:?}", interval);
        self.tempo.current_beat = Some(0);
        for playback in self.registry.take_next_interval() {
            actions.push(Action::Play(playback));
        }
        let next = self.timers.arm(TimerKind::Interval);
        actions.push(Action::Schedule(next, interval));
        if let Some(old) = self.timers.disarm(TimerKind::Beat) {
            actions.push(Action::Cancel(old));
        }
        if self.tempo.bpi > 1 {
            let handle = self.timers.arm(TimerKind::Beat);
            actions.push(Action::Schedule(handle, beat));
        }
    }

    fn advance_beat(&mut self, actions: &mut Vec<Action<A>>) {
        let beat = self.tempo.current_beat.map_or(0, |b| b + 1);
        self.tempo.current_beat = Some(beat);
        if beat + 1 < self.tempo.bpi {
            if let Some(d) = self.tempo.beat_duration() {
                let handle = self.timers.arm(TimerKind::Beat);
                actions.push(Action::Schedule(handle, d));
            }
        }
    }

    /// Common teardown: cancel timers, close transport, drop downloads, notify, reinit.
    fn teardown(&mut self, reason: Option<String>, actions: &mut Vec<Action<A>>) {
        tracing::info!("disconnecting: {:?}", reason);
        self.state = ConnectionState::Disconnecting;
        for handle in self.timers.disarm_all() {
            actions.push(Action::Cancel(handle));
        }
        actions.push(Action::CloseTransport);
        self.downloads.clear();
        actions.push(Action::Notify(Event::Disconnected { reason }));
        self.reinit();
    }

    fn is_live(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Authenticated
        )
    }

    fn require_authenticated(&self) -> Result<(), SessionError> {
        if self.state == ConnectionState::Authenticated {
            Ok(())
        } else {
            Err(SessionError::InvalidState(self.state))
        }
    }

    fn channel_info(&mut self) -> Action<A> {
        let channels = self
            .local_channels
            .iter()
            .map(|c| ChannelInfo {
                name: c.name.clone(),
                volume: c.volume,
                pan: c.pan,
                flags: LOCAL_CHANNEL_FLAGS,
            })
            .collect();
        self.send(&Message::SetChannelInfo(channels))
    }

    fn send(&mut self, msg: &Message) -> Action<A> {
        self.last_send = Some(Instant::now());
        Action::Send(msg.encode())
    }
}

impl<A> Default for NinjamClient<A> {
    fn default() -> Self {
        Self::new()
    }
}

fn usermask_message(users: &[String]) -> Message {
    Message::SetUsermask(
        users
            .iter()
            .map(|u| UsermaskEntry {
                username: u.clone(),
                mask: SUBSCRIBE_ALL,
            })
            .collect(),
    )
}

/// Split `hostname:port`. Exactly one colon and a valid port are required.
fn parse_host(host: &str) -> Result<(String, u16), SessionError> {
    let invalid = || SessionError::InvalidHostFormat(host.to_string());
    let (name, port) = host.split_once(':').ok_or_else(invalid)?;
    if name.is_empty() || port.contains(':') {
        return Err(invalid());
    }
    let port = port.parse::<u16>().map_err(|_| invalid())?;
    Ok((name.to_string(), port))
}
