//! Shared helpers for integration tests.
//!
//! Runs an in-process RESP server on an ephemeral port with just enough of
//! the command set to exercise the engine: hashes (with `HSCAN` paging),
//! lists (with `BLPOP`/`BRPOP` timeouts) and a few key commands. Requests
//! are decoded with the crate's own parser.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;

use redust::resp::parse;
use redust::{Command, Engine, ExecMode, RedustError, RespValue, Response, ServerConfig};

/// Cursor handed out for the injected empty page (see
/// [`MockOptions::empty_first_scan_page`]). Scanning resumes from the
/// beginning when the client sends it back.
pub const EMPTY_PAGE_CURSOR: u64 = 777;

#[derive(Debug, Clone, Copy, Default)]
pub struct MockOptions {
    /// Answer `HSTRLEN` with "unknown command", like servers before 3.2.
    pub legacy_server: bool,
    /// Answer the first `HSCAN` with an empty page and a non-zero cursor.
    pub empty_first_scan_page: bool,
}

#[derive(Default)]
struct Data {
    hashes: HashMap<Bytes, BTreeMap<Bytes, Bytes>>,
    lists: HashMap<Bytes, VecDeque<Bytes>>,
    served_empty_page: bool,
}

struct Shared {
    data: Mutex<Data>,
    pushed: Notify,
    options: MockOptions,
    accepted: AtomicUsize,
}

pub struct MockServer {
    pub config: ServerConfig,
    shared: Arc<Shared>,
}

impl MockServer {
    pub async fn start() -> Self {
        Self::with_options(MockOptions::default()).await
    }

    pub async fn with_options(options: MockOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let shared = Arc::new(Shared {
            data: Mutex::new(Data::default()),
            pushed: Notify::new(),
            options,
            accepted: AtomicUsize::new(0),
        });

        let accept_shared = shared.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                accept_shared.accepted.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve(socket, accept_shared.clone()));
            }
        });

        Self {
            config: ServerConfig {
                connect_timeout_ms: 1000,
                ..ServerConfig::new("127.0.0.1", port)
            },
            shared,
        }
    }

    /// A lazily-connecting engine for this server.
    pub fn engine(&self) -> Engine {
        Engine::new(self.config.clone())
    }

    /// Connections accepted so far.
    pub fn accepted(&self) -> usize {
        self.shared.accepted.load(Ordering::SeqCst)
    }

    /// Fill `key` with `count` fields `field:<i>` => `value:<i>`.
    pub fn seed_hash(&self, key: &str, count: usize) {
        let mut data = self.shared.data.lock();
        let hash = data.hashes.entry(Bytes::from(key.to_string())).or_default();
        for i in 0..count {
            hash.insert(
                Bytes::from(format!("field:{i}")),
                Bytes::from(format!("value:{i}")),
            );
        }
    }

    pub fn insert_field(&self, key: &str, field: &str, value: &str) {
        self.shared
            .data
            .lock()
            .hashes
            .entry(Bytes::from(key.to_string()))
            .or_default()
            .insert(Bytes::from(field.to_string()), Bytes::from(value.to_string()));
    }

    pub fn list(&self, key: &str) -> Vec<Bytes> {
        self.shared
            .data
            .lock()
            .lists
            .get(key.as_bytes())
            .map(|l| l.iter().cloned().collect())
            .unwrap_or_default()
    }
}

async fn serve(mut socket: TcpStream, shared: Arc<Shared>) {
    let mut buf = BytesMut::with_capacity(4096);
    loop {
        while !buf.is_empty() {
            let snapshot = Bytes::copy_from_slice(&buf);
            match parse(&snapshot) {
                Ok((RespValue::Array(args), consumed)) => {
                    let _ = buf.split_to(consumed);
                    let args: Vec<Bytes> =
                        args.into_iter().map(Option::unwrap_or_default).collect();
                    let reply = handle(&shared, &args).await;
                    if socket.write_all(&reply).await.is_err() {
                        return;
                    }
                }
                Err(RedustError::Incomplete) => break,
                _ => return,
            }
        }
        match socket.read_buf(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
    }
}

async fn handle(shared: &Shared, args: &[Bytes]) -> Vec<u8> {
    let Some(name) = args.first() else {
        return error("ERR empty command");
    };
    let name = name.to_ascii_uppercase();
    match name.as_slice() {
        b"PING" => match args.get(1) {
            Some(payload) => bulk(payload),
            None => b"+PONG\r\n".to_vec(),
        },
        b"DEL" => {
            let mut data = shared.data.lock();
            let mut removed = 0;
            for key in &args[1..] {
                if data.hashes.remove(key).is_some() || data.lists.remove(key).is_some() {
                    removed += 1;
                }
            }
            int(removed)
        }
        b"EXISTS" => {
            let data = shared.data.lock();
            let found = args[1..]
                .iter()
                .filter(|k| data.hashes.contains_key(*k) || data.lists.contains_key(*k))
                .count();
            int(found as i64)
        }
        b"HSET" if args.len() == 4 => {
            let mut data = shared.data.lock();
            let hash = data.hashes.entry(args[1].clone()).or_default();
            int(hash.insert(args[2].clone(), args[3].clone()).is_none() as i64)
        }
        b"HGET" if args.len() == 3 => {
            let data = shared.data.lock();
            match data.hashes.get(&args[1]).and_then(|h| h.get(&args[2])) {
                Some(value) => bulk(value),
                None => b"$-1\r\n".to_vec(),
            }
        }
        b"HLEN" if args.len() == 2 => {
            let data = shared.data.lock();
            int(data.hashes.get(&args[1]).map_or(0, |h| h.len()) as i64)
        }
        b"HSTRLEN" if !shared.options.legacy_server && args.len() == 3 => {
            let data = shared.data.lock();
            let len = data
                .hashes
                .get(&args[1])
                .and_then(|h| h.get(&args[2]))
                .map_or(0, |v| v.len());
            int(len as i64)
        }
        b"HSCAN" if args.len() >= 3 => hscan(shared, args),
        b"LPUSH" | b"RPUSH" if args.len() >= 3 => {
            let len = {
                let mut data = shared.data.lock();
                let list = data.lists.entry(args[1].clone()).or_default();
                for value in &args[2..] {
                    if name.as_slice() == b"LPUSH" {
                        list.push_front(value.clone());
                    } else {
                        list.push_back(value.clone());
                    }
                }
                list.len()
            };
            shared.pushed.notify_waiters();
            int(len as i64)
        }
        b"LLEN" if args.len() == 2 => {
            let data = shared.data.lock();
            int(data.lists.get(&args[1]).map_or(0, |l| l.len()) as i64)
        }
        b"BLPOP" | b"BRPOP" if args.len() >= 3 => {
            let left = name.as_slice() == b"BLPOP";
            let keys = &args[1..args.len() - 1];
            let timeout: u64 = std::str::from_utf8(&args[args.len() - 1])
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0);
            blocking_pop(shared, keys, left, timeout).await
        }
        _ => error(&format!(
            "ERR unknown command '{}'",
            String::from_utf8_lossy(&name)
        )),
    }
}

fn hscan(shared: &Shared, args: &[Bytes]) -> Vec<u8> {
    let Some(cursor) = std::str::from_utf8(&args[2]).ok().and_then(|s| s.parse::<u64>().ok()) else {
        return error("ERR invalid cursor");
    };
    let mut count = 10usize;
    let mut pattern: Option<Bytes> = None;
    let mut opts = args[3..].chunks(2);
    while let Some([opt, value]) = opts.next() {
        match opt.to_ascii_uppercase().as_slice() {
            b"COUNT" => {
                count = std::str::from_utf8(value)
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(10)
            }
            b"MATCH" => pattern = Some(value.clone()),
            _ => return error("ERR syntax error"),
        }
    }

    let mut data = shared.data.lock();
    if shared.options.empty_first_scan_page && cursor == 0 && !data.served_empty_page {
        data.served_empty_page = true;
        return scan_reply(EMPTY_PAGE_CURSOR, &[]);
    }
    let start = if cursor == EMPTY_PAGE_CURSOR { 0 } else { cursor as usize };

    let entries: Vec<(Bytes, Bytes)> = data
        .hashes
        .get(&args[1])
        .map(|h| h.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default();
    let end = (start + count.max(1)).min(entries.len());
    let next = if end >= entries.len() { 0 } else { end as u64 };

    let mut items = Vec::new();
    for (field, value) in entries.get(start..end).unwrap_or_default() {
        // Like the real server, MATCH filters after the page is selected.
        if pattern.as_ref().map_or(true, |p| glob_match(p, field)) {
            items.push(field.clone());
            items.push(value.clone());
        }
    }
    scan_reply(next, &items)
}

async fn blocking_pop(shared: &Shared, keys: &[Bytes], left: bool, timeout_secs: u64) -> Vec<u8> {
    let deadline = (timeout_secs > 0)
        .then(|| tokio::time::Instant::now() + Duration::from_secs(timeout_secs));
    loop {
        let notified = shared.pushed.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        {
            let mut data = shared.data.lock();
            for key in keys {
                let popped = data.lists.get_mut(key).and_then(|l| {
                    if left {
                        l.pop_front()
                    } else {
                        l.pop_back()
                    }
                });
                if let Some(value) = popped {
                    let mut out = b"*2\r\n".to_vec();
                    out.extend(bulk(key));
                    out.extend(bulk(&value));
                    return out;
                }
            }
        }

        match deadline {
            None => notified.await,
            Some(deadline) => {
                if tokio::time::timeout_at(deadline, notified).await.is_err() {
                    return b"*-1\r\n".to_vec();
                }
            }
        }
    }
}

/// `*` is the only wildcard.
fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    match pattern.split_first() {
        None => text.is_empty(),
        Some((b'*', rest)) => (0..=text.len()).any(|i| glob_match(rest, &text[i..])),
        Some((c, rest)) => text.first() == Some(c) && glob_match(rest, &text[1..]),
    }
}

fn scan_reply(cursor: u64, items: &[Bytes]) -> Vec<u8> {
    let mut out = b"*2\r\n".to_vec();
    out.extend(bulk(cursor.to_string().as_bytes()));
    out.extend(format!("*{}\r\n", items.len()).into_bytes());
    for item in items {
        out.extend(bulk(item));
    }
    out
}

fn bulk(data: &[u8]) -> Vec<u8> {
    let mut out = format!("${}\r\n", data.len()).into_bytes();
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
    out
}

fn int(n: i64) -> Vec<u8> {
    format!(":{n}\r\n").into_bytes()
}

fn error(msg: &str) -> Vec<u8> {
    format!("-{msg}\r\n").into_bytes()
}

// ── Client-side helpers ────────────────────────────────────────────

/// Run `cmd` synchronously and return its reply.
pub async fn exec(engine: &Engine, cmd: Command) -> Response {
    engine
        .execute(cmd, ExecMode::Syncron)
        .await
        .reply()
        .await
        .expect("command failed")
}

/// Run `cmd` synchronously and expect an integer reply.
pub async fn exec_int(engine: &Engine, cmd: Command) -> i64 {
    let resp = exec(engine, cmd).await;
    resp.integer()
        .unwrap_or_else(|| panic!("expected integer, got {:?}", resp.value))
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..400 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}
