//! Session host: owns one NinjamClient and carries out its actions with tokio.
//!
//! Every task reports back over one channel, so the client is only touched from
//! the session loop. Events from a connection that has since been closed are dropped.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use anyhow::Context;
use ninjam_core::{
    Action, AudioDecodeError, ChatCommand, ChatMessage, DecodeJob, Event, LocalChannel,
    NinjamClient, TimerHandle, TimerKind,
};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use crate::audio::{decode_interval, Capture, DecodedInterval};
use crate::config::Config;

const READ_BUF_SIZE: usize = 16 * 1024;

enum HostEvent {
    Connected {
        conn: u64,
        writer: Option<UnboundedSender<Vec<u8>>>,
    },
    Received {
        conn: u64,
        bytes: Vec<u8>,
    },
    Closed {
        conn: u64,
    },
    Timer(TimerHandle),
    Decoded(DecodeJob, Result<DecodedInterval, AudioDecodeError>),
    Command(String),
}

struct Session {
    client: NinjamClient<DecodedInterval>,
    accept_license: bool,
    events_tx: UnboundedSender<HostEvent>,
    events_rx: UnboundedReceiver<HostEvent>,
    /// Id of the current connection attempt.
    conn: u64,
    transport: Option<JoinHandle<()>>,
    writer: Option<UnboundedSender<Vec<u8>>>,
    timers: HashMap<TimerKind, (TimerHandle, JoinHandle<()>)>,
    capture: Capture,
    finished: bool,
}

/// Connect with `cfg` and run until the session ends or a shutdown signal arrives.
pub async fn run(cfg: Config) -> anyhow::Result<()> {
    let host = cfg
        .host
        .clone()
        .context("no server configured (set host in config, NINJAM_HOST or --host)")?;
    let mut session = Session::new(&cfg);
    let actions = session
        .client
        .connect(&host, &cfg.username, &cfg.password)?;
    session.spawn_stdin();
    session.perform(actions);

    let shutdown = crate::shutdown_signal();
    tokio::pin!(shutdown);
    while !session.finished {
        tokio::select! {
            ev = session.events_rx.recv() => match ev {
                Some(ev) => session.handle(ev),
                None => break,
            },
            res = &mut shutdown => {
                res?;
                tracing::info!("shutdown requested");
                let actions = session.client.disconnect(Some("client shutdown".to_string()));
                session.perform(actions);
                break;
            }
        }
    }
    Ok(())
}

impl Session {
    fn new(cfg: &Config) -> Self {
        let mut client = NinjamClient::new();
        client.set_anonymous(cfg.anonymous);
        client.set_autosubscribe(cfg.autosubscribe);
        for name in &cfg.channels {
            client.add_local_channel(LocalChannel::new(name));
        }
        // TCP sockets are created per connect, so transport creation cannot fail up front.
        client.on_transport_created(true);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            client,
            accept_license: cfg.accept_license,
            events_tx,
            events_rx,
            conn: 0,
            transport: None,
            writer: None,
            timers: HashMap::new(),
            capture: Capture::new(cfg.capture_dir.clone()),
            finished: false,
        }
    }

    fn handle(&mut self, ev: HostEvent) {
        let actions = match ev {
            HostEvent::Connected { conn, writer } if conn == self.conn => {
                let ok = writer.is_some();
                self.writer = writer;
                self.client.on_transport_connected(ok)
            }
            HostEvent::Received { conn, bytes } if conn == self.conn => {
                self.client.on_receive(&bytes)
            }
            HostEvent::Closed { conn } if conn == self.conn => {
                self.close_transport();
                self.client.on_transport_closed()
            }
            HostEvent::Connected { .. } | HostEvent::Received { .. } | HostEvent::Closed { .. } => {
                tracing::debug!("dropping event from an old connection");
                Vec::new()
            }
            HostEvent::Timer(handle) => {
                if self.timers.get(&handle.kind).map(|(h, _)| *h) == Some(handle) {
                    self.timers.remove(&handle.kind);
                }
                self.client.on_timer(handle, Instant::now())
            }
            HostEvent::Decoded(job, result) => {
                self.client.on_decoded(job, result);
                Vec::new()
            }
            HostEvent::Command(line) => self.command(&line),
        };
        self.perform(actions);
    }

    fn perform(&mut self, actions: Vec<Action<DecodedInterval>>) {
        let mut queue: VecDeque<_> = actions.into();
        while let Some(action) = queue.pop_front() {
            match action {
                Action::Connect { host, port } => self.open_transport(host, port),
                Action::Send(bytes) => self.send(bytes),
                Action::CloseTransport => self.close_transport(),
                Action::Schedule(handle, after) => self.schedule(handle, after),
                Action::Cancel(handle) => self.cancel(handle),
                Action::Decode(job, bytes) => self.decode(job, bytes),
                Action::Play(playback) => self.capture.play(playback),
                Action::Notify(event) => queue.extend(self.notify(event)),
            }
        }
    }

    fn open_transport(&mut self, host: String, port: u16) {
        self.close_transport();
        let conn = self.conn;
        let events = self.events_tx.clone();
        self.transport = Some(tokio::spawn(async move {
            let stream = match TcpStream::connect((host.as_str(), port)).await {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!("connect to {}:{} failed: {}", host, port, e);
                    let _ = events.send(HostEvent::Connected { conn, writer: None });
                    return;
                }
            };
            let _ = stream.set_nodelay(true);
            let (rd, wr) = stream.into_split();
            let writer = spawn_writer(wr);
            // Report the writer before any bytes are read, so replies always have a transport.
            if events
                .send(HostEvent::Connected {
                    conn,
                    writer: Some(writer),
                })
                .is_err()
            {
                return;
            }
            read_loop(conn, rd, events).await;
        }));
    }

    /// Drop the current connection. Anything it still reports is ignored.
    fn close_transport(&mut self) {
        if let Some(task) = self.transport.take() {
            task.abort();
        }
        self.writer = None;
        self.conn += 1;
    }

    fn send(&mut self, bytes: Vec<u8>) {
        match &self.writer {
            Some(w) => {
                if w.send(bytes).is_err() {
                    tracing::warn!("writer closed, message dropped");
                }
            }
            None => tracing::warn!("no transport, {} bytes dropped", bytes.len()),
        }
    }

    fn schedule(&mut self, handle: TimerHandle, after: Duration) {
        let events = self.events_tx.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = events.send(HostEvent::Timer(handle));
        });
        if let Some((_, old)) = self.timers.insert(handle.kind, (handle, task)) {
            old.abort();
        }
    }

    fn cancel(&mut self, handle: TimerHandle) {
        if self.timers.get(&handle.kind).map(|(h, _)| *h) == Some(handle) {
            if let Some((_, task)) = self.timers.remove(&handle.kind) {
                task.abort();
            }
        }
    }

    fn decode(&self, job: DecodeJob, bytes: Vec<u8>) {
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let result = match tokio::task::spawn_blocking(move || decode_interval(bytes)).await {
                Ok(r) => r,
                Err(e) => Err(AudioDecodeError(format!("decoder task failed: {}", e))),
            };
            let _ = events.send(HostEvent::Decoded(job, result));
        });
    }

    fn notify(&mut self, event: Event) -> Vec<Action<DecodedInterval>> {
        match event {
            Event::Challenge(challenge) => {
                if !challenge.license.is_empty() {
                    println!("--- server license ---\n{}\n---", challenge.license);
                    if !self.accept_license {
                        tracing::warn!("license not accepted; set accept_license to join");
                    }
                }
                self.client
                    .respond_to_challenge(self.accept_license)
                    .unwrap_or_else(|e| {
                        tracing::warn!("cannot answer challenge: {}", e);
                        Vec::new()
                    })
            }
            Event::Authenticated {
                full_username,
                max_channels,
            } => {
                tracing::info!(
                    "joined as {} (up to {} channels)",
                    full_username.as_deref().unwrap_or("?"),
                    max_channels.map_or_else(|| "?".to_string(), |n| n.to_string())
                );
                Vec::new()
            }
            Event::Chat(chat) => {
                print_chat(&chat);
                Vec::new()
            }
            Event::TempoChanged { bpm, bpi } => {
                println!("*** tempo {} bpm, {} beats per interval", bpm, bpi);
                Vec::new()
            }
            Event::Disconnected { reason } => {
                println!(
                    "*** disconnected: {}",
                    reason.as_deref().unwrap_or("no reason given")
                );
                self.finished = true;
                Vec::new()
            }
            Event::ProtocolError(e) => {
                tracing::warn!("protocol error, disconnecting: {}", e);
                self.client.disconnect(Some(e.to_string()))
            }
        }
    }

    /// One stdin line: `/msg <user> <text>`, `/topic <text>`, `/quit`, or plain chat.
    fn command(&mut self, line: &str) -> Vec<Action<DecodedInterval>> {
        let line = line.trim();
        if line.is_empty() {
            return Vec::new();
        }
        let result = if line == "/quit" {
            self.finished = true;
            return self.client.disconnect(Some("user quit".to_string()));
        } else if let Some(rest) = line.strip_prefix("/topic ") {
            self.client.submit_topic(rest.trim())
        } else if let Some(rest) = line.strip_prefix("/msg ") {
            match rest.trim().split_once(' ') {
                Some((to, text)) => self.client.submit_private(to, text.trim()),
                None => {
                    println!("usage: /msg <user> <text>");
                    return Vec::new();
                }
            }
        } else {
            self.client.submit_chat(line)
        };
        result.unwrap_or_else(|e| {
            tracing::warn!("command not sent: {}", e);
            Vec::new()
        })
    }

    fn spawn_stdin(&self) {
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if events.send(HostEvent::Command(line)).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!("stdin: {}", e);
                        break;
                    }
                }
            }
        });
    }
}

fn spawn_writer(mut wr: OwnedWriteHalf) -> UnboundedSender<Vec<u8>> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
    tokio::spawn(async move {
        while let Some(bytes) = rx.recv().await {
            if let Err(e) = wr.write_all(&bytes).await {
                tracing::warn!("write failed: {}", e);
                break;
            }
        }
        let _ = wr.shutdown().await;
    });
    tx
}

async fn read_loop(conn: u64, mut rd: OwnedReadHalf, events: UnboundedSender<HostEvent>) {
    let mut buf = vec![0u8; READ_BUF_SIZE];
    loop {
        match rd.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let bytes = buf[..n].to_vec();
                if events.send(HostEvent::Received { conn, bytes }).is_err() {
                    return;
                }
            }
            Err(e) => {
                tracing::warn!("read failed: {}", e);
                break;
            }
        }
    }
    let _ = events.send(HostEvent::Closed { conn });
}

fn print_chat(chat: &ChatMessage) {
    match chat.kind() {
        ChatCommand::Msg => println!("<{}> {}", chat.arg1, chat.arg2),
        ChatCommand::PrivMsg => println!("*{}* {}", chat.arg1, chat.arg2),
        ChatCommand::Topic if chat.arg1.is_empty() => println!("*** topic: {}", chat.arg2),
        ChatCommand::Topic => println!("*** {} sets topic: {}", chat.arg1, chat.arg2),
        ChatCommand::Join => println!("*** {} joined", chat.arg1),
        ChatCommand::Part => println!("*** {} left", chat.arg1),
        ChatCommand::UserCount => println!("*** users: {} (max {})", chat.arg1, chat.arg2),
        ChatCommand::Other => tracing::debug!("unhandled chat command {:?}", chat.command),
    }
}
