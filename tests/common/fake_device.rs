//! In-memory RouterOS devices.
//!
//! - [`ChannelDialer`]: a `Dialer` that hands the device end of every dialed
//!   session to the test
//! - [`ScriptedSession`]: drive one session request by request
//! - [`SimulatedRouter`]: an address-list device that serves sessions itself

use super::STEP_TIMEOUT;
use mirror_sync::config::compile_pattern;
use mirror_sync::routeros::codec::{encode_sentence, SentenceReader};
use mirror_sync::routeros::connection::{BoxedReader, BoxedWriter, Credentials, DeviceConnection, Dialer};
use mirror_sync::routeros::sentence::{Reply, Sentence};
use mirror_sync::store::BoxFuture;
use mirror_sync::{AddressListMirror, MirrorError, MirrorSettings, RetryPolicy};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const USERNAME: &str = "admin";
pub const PASSWORD: &str = "secret";

const ADDRESS_LIST: &str = "/ip/firewall/address-list";

// =============================================================================
// Dialer
// =============================================================================

/// Dials in-memory sessions and passes the device end to a receiver.
pub struct ChannelDialer {
    sessions: mpsc::UnboundedSender<DuplexStream>,
    dials: AtomicUsize,
}

impl ChannelDialer {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<DuplexStream>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let dialer = Arc::new(Self {
            sessions: tx,
            dials: AtomicUsize::new(0),
        });
        (dialer, rx)
    }

    pub fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }
}

impl Dialer for ChannelDialer {
    fn dial(&self) -> BoxFuture<'_, (BoxedReader, BoxedWriter)> {
        Box::pin(async move {
            self.dials.fetch_add(1, Ordering::SeqCst);
            let (client, device) = tokio::io::duplex(64 * 1024);
            self.sessions
                .send(device)
                .map_err(|_| MirrorError::connection_msg("fake", "device is gone"))?;
            let (read, write) = tokio::io::split(client);
            Ok((Box::new(read) as BoxedReader, Box::new(write) as BoxedWriter))
        })
    }
}

pub fn credentials() -> Credentials {
    Credentials {
        username: USERNAME.to_string(),
        password: PASSWORD.to_string(),
    }
}

/// Start a mirror named `blocked` on device `gw`.
pub fn start_mirror(dialer: Arc<dyn Dialer>, pattern: Option<&str>, timeout: Option<&str>) -> AddressListMirror {
    let connection = DeviceConnection::new("gw", dialer, credentials(), RetryPolicy::testing());
    let settings = MirrorSettings {
        name: "blocked".to_string(),
        pattern: compile_pattern(pattern).unwrap(),
        timeout: timeout.map(str::to_string),
    };
    AddressListMirror::start(connection, settings)
}

// =============================================================================
// Scripted sessions
// =============================================================================

/// The device end of one session, driven by the test.
pub struct ScriptedSession {
    reader: SentenceReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
}

impl ScriptedSession {
    /// Wait for the mirror to dial its next session.
    pub async fn accept(sessions: &mut mpsc::UnboundedReceiver<DuplexStream>) -> Self {
        let stream = tokio::time::timeout(STEP_TIMEOUT, sessions.recv())
            .await
            .expect("no session was dialed")
            .expect("dialer dropped");
        let (read, write) = tokio::io::split(stream);
        Self {
            reader: SentenceReader::new(read, "device"),
            writer: write,
        }
    }

    /// Next request from the mirror.
    pub async fn recv(&mut self) -> Sentence {
        tokio::time::timeout(STEP_TIMEOUT, self.reader.next())
            .await
            .expect("timed out waiting for a request")
            .expect("session closed while waiting for a request")
    }

    /// Next request, parsed.
    pub async fn recv_request(&mut self) -> Request {
        Request::parse(self.recv().await)
    }

    pub async fn send(&mut self, words: &[&str]) {
        let sentence: Sentence = words.iter().copied().collect();
        self.writer
            .write_all(&encode_sentence(&sentence))
            .await
            .expect("mirror closed the session");
    }

    /// Write raw bytes, bypassing the encoder.
    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.expect("mirror closed the session");
    }

    /// Read the login request and accept it.
    pub async fn accept_login(&mut self) -> Sentence {
        let login = self.recv().await;
        assert_eq!(login.words().first().map(String::as_str), Some("/login"));
        self.send(&["!done"]).await;
        login
    }

    /// Log in, then expect the change stream and the snapshot requests.
    pub async fn handshake(&mut self) {
        self.accept_login().await;
        let listen = self.recv_request().await;
        assert_eq!(listen.path, format!("{ADDRESS_LIST}/listen"));
        assert_eq!(listen.tag.as_deref(), Some("LISTEN"));
        let getall = self.recv_request().await;
        assert_eq!(getall.path, format!("{ADDRESS_LIST}/getall"));
        assert_eq!(getall.tag.as_deref(), Some("FETCH"));
    }

    /// Send a snapshot record.
    pub async fn fetch(&mut self, id: &str, address: &str, list: &str) {
        let words = [
            "!re".to_string(),
            ".tag=FETCH".to_string(),
            format!("=.id={id}"),
            format!("=address={address}"),
            format!("=list={list}"),
        ];
        self.send(&words.iter().map(String::as_str).collect::<Vec<_>>()).await;
    }

    pub async fn fetch_done(&mut self) {
        self.send(&["!done", ".tag=FETCH"]).await;
    }

    /// Send a change stream record.
    pub async fn listen(&mut self, id: &str, address: &str, list: &str) {
        let words = [
            "!re".to_string(),
            ".tag=LISTEN".to_string(),
            format!("=.id={id}"),
            format!("=address={address}"),
            format!("=list={list}"),
        ];
        self.send(&words.iter().map(String::as_str).collect::<Vec<_>>()).await;
    }

    pub async fn listen_dead(&mut self, id: &str) {
        let id = format!("=.id={id}");
        self.send(&["!re", ".tag=LISTEN", &id, "=.dead=true"]).await;
    }

    /// Acknowledge a command, optionally returning a new `.id`.
    pub async fn ack(&mut self, tag: &str, ret: Option<&str>) {
        let tag = format!(".tag={tag}");
        match ret {
            Some(ret) => {
                let ret = format!("=ret={ret}");
                self.send(&["!done", &tag, &ret]).await
            }
            None => self.send(&["!done", &tag]).await,
        }
    }

    /// Reject a command the way RouterOS does: `!trap` then `!done`.
    pub async fn reject(&mut self, tag: &str, message: &str) {
        let tag = format!(".tag={tag}");
        let message = format!("=message={message}");
        self.send(&["!trap", &tag, &message]).await;
        self.send(&["!done", &tag]).await;
    }

    /// Expect the mirror to close its end of the session.
    pub async fn expect_closed(mut self) {
        let mut rest = Vec::new();
        tokio::time::timeout(STEP_TIMEOUT, async {
            loop {
                match self.reader.next().await {
                    Ok(sentence) => rest.push(sentence),
                    Err(_) => break,
                }
            }
        })
        .await
        .expect("mirror kept the session open");
    }
}

/// A request as seen by the device.
#[derive(Debug, Clone)]
pub struct Request {
    pub path: String,
    pub tag: Option<String>,
    parsed: Reply,
}

impl Request {
    pub fn parse(sentence: Sentence) -> Self {
        let path = sentence.words().first().cloned().unwrap_or_default();
        let parsed = Reply::parse(&sentence);
        Self {
            path,
            tag: parsed.tag().map(str::to_string),
            parsed,
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.parsed.get(name)
    }

    /// Path relative to the address-list menu, e.g. `add`.
    pub fn action(&self) -> &str {
        self.path
            .strip_prefix(ADDRESS_LIST)
            .map(|rest| rest.trim_start_matches('/'))
            .unwrap_or(&self.path)
    }
}

// =============================================================================
// Simulated router
// =============================================================================

struct ServedSession {
    number: usize,
    outbox: mpsc::UnboundedSender<Sentence>,
    listen_tag: Option<String>,
    tasks: Vec<JoinHandle<()>>,
}

#[derive(Default)]
struct Device {
    entries: BTreeMap<u64, (String, String)>,
    next_id: u64,
    sessions: Vec<ServedSession>,
    sessions_served: usize,
    next_number: usize,
    rejected_addresses: HashSet<String>,
    reject_logins: bool,
    requests: Vec<Request>,
}

fn format_id(id: u64) -> String {
    format!("*{id:X}")
}

fn parse_id(id: &str) -> Option<u64> {
    u64::from_str_radix(id.strip_prefix('*')?, 16).ok()
}

fn sentence(words: Vec<String>) -> Sentence {
    Sentence::new(words)
}

impl Device {
    fn insert(&mut self, address: &str, list: &str) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        self.entries.insert(id, (address.to_string(), list.to_string()));
        self.announce(id);
        id
    }

    fn has_address(&self, address: &str) -> bool {
        self.entries.values().any(|(a, _)| a == address)
    }

    /// Report the current state of `id` to every listening session.
    fn announce(&self, id: u64) {
        for session in &self.sessions {
            let Some(tag) = &session.listen_tag else {
                continue;
            };
            let mut words = vec!["!re".to_string(), format!(".tag={tag}"), format!("=.id={}", format_id(id))];
            match self.entries.get(&id) {
                Some((address, list)) => {
                    words.push(format!("=address={address}"));
                    words.push(format!("=list={list}"));
                }
                None => words.push("=.dead=true".to_string()),
            }
            let _ = session.outbox.send(sentence(words));
        }
    }

    fn reply_to(&self, number: usize, words: Vec<String>) {
        if let Some(session) = self.sessions.iter().find(|s| s.number == number) {
            let _ = session.outbox.send(sentence(words));
        }
    }

    fn trap(&self, number: usize, tag: &str, message: &str) {
        self.reply_to(number, vec!["!trap".to_string(), format!(".tag={tag}"), format!("=message={message}")]);
        self.reply_to(number, vec!["!done".to_string(), format!(".tag={tag}")]);
    }

    fn handle(&mut self, number: usize, request: Request) {
        let tag = request.tag.clone().unwrap_or_default();
        self.requests.push(request.clone());
        match request.action() {
            "listen" => {
                if let Some(session) = self.sessions.iter_mut().find(|s| s.number == number) {
                    session.listen_tag = Some(tag);
                }
            }
            "getall" => {
                for (id, (address, list)) in &self.entries {
                    self.reply_to(
                        number,
                        vec![
                            "!re".to_string(),
                            format!(".tag={tag}"),
                            format!("=.id={}", format_id(*id)),
                            format!("=address={address}"),
                            format!("=list={list}"),
                        ],
                    );
                }
                self.reply_to(number, vec!["!done".to_string(), format!(".tag={tag}")]);
            }
            "add" => {
                let address = request.attr("address").unwrap_or_default().to_string();
                let list = request.attr("list").unwrap_or_default().to_string();
                if self.rejected_addresses.contains(&address) {
                    self.trap(number, &tag, "failure: not allowed");
                } else if self.has_address(&address) {
                    self.trap(number, &tag, "failure: already have such entry");
                } else {
                    let id = self.insert(&address, &list);
                    self.reply_to(
                        number,
                        vec!["!done".to_string(), format!(".tag={tag}"), format!("=ret={}", format_id(id))],
                    );
                }
            }
            "set" => {
                let id = request.attr(".id").and_then(parse_id);
                match id.filter(|id| self.entries.contains_key(id)) {
                    Some(id) => {
                        if let (Some(list), Some(entry)) = (request.attr("list"), self.entries.get_mut(&id)) {
                            entry.1 = list.to_string();
                        }
                        self.announce(id);
                        self.reply_to(number, vec!["!done".to_string(), format!(".tag={tag}")]);
                    }
                    None => self.trap(number, &tag, "no such item"),
                }
            }
            "remove" => {
                let id = request.attr(".id").and_then(parse_id);
                match id.and_then(|id| self.entries.remove(&id).map(|_| id)) {
                    Some(id) => {
                        self.announce(id);
                        self.reply_to(number, vec!["!done".to_string(), format!(".tag={tag}")]);
                    }
                    None => self.trap(number, &tag, "no such item"),
                }
            }
            _ => self.trap(number, &tag, "no such command"),
        }
    }
}

/// A device with an address-list that serves every session dialed through
/// its [`ChannelDialer`].
pub struct SimulatedRouter {
    device: Arc<Mutex<Device>>,
    dialer: Arc<ChannelDialer>,
    acceptor: JoinHandle<()>,
}

impl SimulatedRouter {
    pub fn start() -> Self {
        let (dialer, mut sessions) = ChannelDialer::new();
        let device = Arc::new(Mutex::new(Device::default()));

        let served = Arc::clone(&device);
        let acceptor = tokio::spawn(async move {
            while let Some(stream) = sessions.recv().await {
                serve(Arc::clone(&served), stream);
            }
        });

        Self {
            device,
            dialer,
            acceptor,
        }
    }

    pub fn dialer(&self) -> Arc<dyn Dialer> {
        Arc::clone(&self.dialer) as Arc<dyn Dialer>
    }

    pub fn dials(&self) -> usize {
        self.dialer.dials()
    }

    /// Sessions that logged in successfully.
    pub fn sessions_served(&self) -> usize {
        self.device.lock().sessions_served
    }

    /// Entries as `address -> list`.
    pub fn entries(&self) -> BTreeMap<String, String> {
        self.device.lock().entries.values().cloned().collect()
    }

    /// Add an entry from outside the mirror; returns its `.id`.
    pub fn external_add(&self, address: &str, list: &str) -> String {
        format_id(self.device.lock().insert(address, list))
    }

    pub fn external_set(&self, address: &str, list: &str) {
        let mut device = self.device.lock();
        let id = device
            .entries
            .iter()
            .find(|(_, (a, _))| a == address)
            .map(|(id, _)| *id)
            .expect("no such address");
        if let Some(entry) = device.entries.get_mut(&id) {
            entry.1 = list.to_string();
        }
        device.announce(id);
    }

    pub fn external_remove(&self, address: &str) {
        let mut device = self.device.lock();
        let id = device
            .entries
            .iter()
            .find(|(_, (a, _))| a == address)
            .map(|(id, _)| *id)
            .expect("no such address");
        device.entries.remove(&id);
        device.announce(id);
    }

    /// Answer adds for `address` with `!trap`.
    pub fn reject_adds_for(&self, address: &str) {
        self.device.lock().rejected_addresses.insert(address.to_string());
    }

    pub fn reject_logins(&self, reject: bool) {
        self.device.lock().reject_logins = reject;
    }

    /// Requests received so far, login excluded.
    pub fn requests(&self) -> Vec<Request> {
        self.device.lock().requests.clone()
    }

    /// Abruptly close every open session.
    pub fn drop_sessions(&self) {
        let sessions = std::mem::take(&mut self.device.lock().sessions);
        for session in sessions {
            for task in session.tasks {
                task.abort();
            }
        }
    }
}

impl Drop for SimulatedRouter {
    fn drop(&mut self) {
        self.acceptor.abort();
        self.drop_sessions();
    }
}

fn serve(device: Arc<Mutex<Device>>, stream: DuplexStream) {
    let (read, mut write) = tokio::io::split(stream);
    let (outbox, mut pending) = mpsc::unbounded_channel::<Sentence>();

    // Registered before any task runs so that requests always find it.
    let mut guard = device.lock();
    guard.next_number += 1;
    let number = guard.next_number;

    let writer = tokio::spawn(async move {
        while let Some(sentence) = pending.recv().await {
            if write.write_all(&encode_sentence(&sentence)).await.is_err() {
                break;
            }
        }
    });

    let sessions = Arc::clone(&device);
    let login_outbox = outbox.clone();
    let reader = tokio::spawn(async move {
        let mut reader = SentenceReader::new(read, "device");
        let Ok(login) = reader.next().await else {
            return;
        };
        let login = Request::parse(login);
        let accepted = login.path == "/login"
            && login.attr("name") == Some(USERNAME)
            && login.attr("password") == Some(PASSWORD)
            && !sessions.lock().reject_logins;
        if accepted {
            sessions.lock().sessions_served += 1;
            let _ = login_outbox.send(sentence(vec!["!done".to_string()]));
            while let Ok(request) = reader.next().await {
                sessions.lock().handle(number, Request::parse(request));
            }
        } else {
            let _ = login_outbox.send(sentence(vec![
                "!trap".to_string(),
                "=message=invalid user name or password (6)".to_string(),
            ]));
            // Hold the session until the client hangs up.
            while reader.next().await.is_ok() {}
        }
        sessions.lock().sessions.retain(|s| s.number != number);
    });

    guard.sessions.push(ServedSession {
        number,
        outbox,
        listen_tag: None,
        tasks: vec![reader, writer],
    });
}
