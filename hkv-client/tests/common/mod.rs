#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Once;
use std::time::Duration;

use hkv_client::{ClientError, ClientResult, Command, KVClient, RespValue, Transport};

pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn client() -> KVClient<FakeServer> {
    init_tracing();
    KVClient::from_transport(FakeServer::default())
}

pub fn ok() -> RespValue {
    RespValue::Simple(b"OK".to_vec())
}

pub fn bulk(data: &[u8]) -> RespValue {
    RespValue::Bulk(Some(data.to_vec()))
}

pub fn push(items: &[&[u8]], count: Option<i64>) -> RespValue {
    let mut frame: Vec<RespValue> = items.iter().map(|item| bulk(item)).collect();
    if let Some(count) = count {
        frame.push(RespValue::Integer(count));
    }
    RespValue::Array(frame)
}

const WRONGTYPE: &[u8] = b"WRONGTYPE Operation against a key holding the wrong kind of value";
const NOT_INTEGER: &[u8] = b"ERR value is not an integer or out of range";

#[derive(Debug, Clone)]
enum Entry {
    Str(Vec<u8>),
    Set(BTreeSet<Vec<u8>>),
    Hash(BTreeMap<Vec<u8>, Vec<u8>>),
    List(VecDeque<Vec<u8>>),
    ZSet(BTreeMap<Vec<u8>, f64>),
}

/// In-memory server behind the `Transport` seam.
///
/// Emulates the subset of command semantics the tests exercise, including
/// WATCH versions, MULTI queuing and pub/sub acknowledgements.
#[derive(Debug, Default)]
pub struct FakeServer {
    data: HashMap<Vec<u8>, Entry>,
    ttls: HashMap<Vec<u8>, u64>,
    versions: HashMap<Vec<u8>, u64>,
    watched: Option<HashMap<Vec<u8>, u64>>,
    in_multi: bool,
    queued: Vec<Vec<Vec<u8>>>,
    queue_failed: bool,
    channels: BTreeSet<Vec<u8>>,
    patterns: BTreeSet<Vec<u8>>,
    scheduled: HashMap<Vec<u8>, Vec<Vec<u8>>>,
    scheduled_p: HashMap<Vec<u8>, Vec<(Vec<u8>, Vec<u8>)>>,
    events: VecDeque<RespValue>,
    delayed: VecDeque<RespValue>,
    fault: Option<ClientError>,
    batch_fault: Option<ClientError>,
    closed: bool,
    log: Vec<String>,
    batches: Vec<usize>,
    timeouts: usize,
}

impl FakeServer {
    /// Every command received, as space separated text.
    pub fn log(&self) -> &[String] {
        &self.log
    }

    /// Names of the commands received, upper case.
    pub fn names(&self) -> Vec<String> {
        self.log
            .iter()
            .map(|line| line.split(' ').next().unwrap_or_default().to_string())
            .collect()
    }

    /// Size of each batch written with `send_batch`.
    pub fn batches(&self) -> &[usize] {
        &self.batches
    }

    /// Push frames written by the server but not read yet.
    pub fn unread_events(&self) -> usize {
        self.events.len()
    }

    pub fn timeouts(&self) -> usize {
        self.timeouts
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Writes a key as another client would, invalidating watches on it.
    pub fn external_set(&mut self, key: &str, value: &str) {
        self.data.insert(key.as_bytes().to_vec(), Entry::Str(value.as_bytes().to_vec()));
        self.touch(key.as_bytes());
    }

    pub fn string(&self, key: &str) -> Option<String> {
        match self.data.get(key.as_bytes()) {
            Some(Entry::Str(value)) => Some(String::from_utf8_lossy(value).into_owned()),
            _ => None,
        }
    }

    /// The next `send_command`/`send_batch` fails with `err`; the connection
    /// is closed afterwards.
    pub fn fail_next(&mut self, err: ClientError) {
        self.fault = Some(err);
    }

    /// Like `fail_next`, but only the next `send_batch` fails.
    pub fn fail_next_batch(&mut self, err: ClientError) {
        self.batch_fault = Some(err);
    }

    /// Message delivered right after the subscribe ack for `channel`.
    pub fn schedule_message(&mut self, channel: &str, payload: &str) {
        self.scheduled
            .entry(channel.as_bytes().to_vec())
            .or_default()
            .push(payload.as_bytes().to_vec());
    }

    /// Message delivered right after the psubscribe ack for `pattern`.
    pub fn schedule_pmessage(&mut self, pattern: &str, channel: &str, payload: &str) {
        self.scheduled_p
            .entry(pattern.as_bytes().to_vec())
            .or_default()
            .push((channel.as_bytes().to_vec(), payload.as_bytes().to_vec()));
    }

    /// Queues a raw push frame.
    pub fn push_event(&mut self, event: RespValue) {
        self.events.push_back(event);
    }

    /// Queues a push frame that only arrives after one more wait times out.
    pub fn push_delayed(&mut self, event: RespValue) {
        self.delayed.push_back(event);
    }

    fn check_fault(&mut self) -> ClientResult<()> {
        if self.closed {
            return Err(ClientError::ConnectionClosed);
        }
        if let Some(err) = self.fault.take() {
            self.closed = true;
            return Err(err);
        }
        Ok(())
    }

    fn record(&mut self, command: &Command) -> Vec<Vec<u8>> {
        let args: Vec<Vec<u8>> = command.arguments().iter().map(|arg| arg.to_vec()).collect();
        let mut line = String::from_utf8_lossy(&args[0]).to_ascii_uppercase();
        for arg in &args[1..] {
            line.push(' ');
            line.push_str(&String::from_utf8_lossy(arg));
        }
        self.log.push(line);
        args
    }

    fn touch(&mut self, key: &[u8]) {
        *self.versions.entry(key.to_vec()).or_default() += 1;
    }

    fn subscription_count(&self) -> i64 {
        (self.channels.len() + self.patterns.len()) as i64
    }

    fn execute(&mut self, args: Vec<Vec<u8>>) -> RespValue {
        let name = args[0].to_ascii_uppercase();
        match name.as_slice() {
            b"MULTI" => {
                if self.in_multi {
                    return error(b"ERR MULTI calls can not be nested");
                }
                self.in_multi = true;
                ok()
            }
            b"EXEC" => self.exec(),
            b"DISCARD" => {
                if !self.in_multi {
                    return error(b"ERR DISCARD without MULTI");
                }
                self.reset_multi();
                ok()
            }
            b"WATCH" if self.in_multi => error(b"ERR WATCH inside MULTI is not allowed"),
            _ if self.in_multi => {
                if !is_known(&name) {
                    self.queue_failed = true;
                    return unknown(&args[0]);
                }
                self.queued.push(args);
                RespValue::Simple(b"QUEUED".to_vec())
            }
            _ => self.run(&name, &args),
        }
    }

    fn reset_multi(&mut self) {
        self.in_multi = false;
        self.queued.clear();
        self.queue_failed = false;
        self.watched = None;
    }

    fn exec(&mut self) -> RespValue {
        if !self.in_multi {
            return error(b"ERR EXEC without MULTI");
        }
        let queued = std::mem::take(&mut self.queued);
        let failed = self.queue_failed;
        let watched = self.watched.take();
        self.reset_multi();

        if failed {
            return error(b"EXECABORT Transaction discarded because of previous errors.");
        }
        if let Some(watched) = watched {
            let dirty = watched
                .iter()
                .any(|(key, version)| self.versions.get(key).copied().unwrap_or_default() != *version);
            if dirty {
                return RespValue::NullArray;
            }
        }
        let replies = queued
            .into_iter()
            .map(|args| {
                let name = args[0].to_ascii_uppercase();
                self.run(&name, &args)
            })
            .collect();
        RespValue::Array(replies)
    }

    fn run(&mut self, name: &[u8], args: &[Vec<u8>]) -> RespValue {
        match (name, &args[1..]) {
            (b"PING", []) => RespValue::Simple(b"PONG".to_vec()),
            (b"ECHO", [message]) => bulk(message),
            (b"WATCH", keys) => {
                let versions = self.versions.clone();
                let watched = self.watched.get_or_insert_with(HashMap::new);
                for key in keys {
                    watched.insert(key.clone(), versions.get(key).copied().unwrap_or_default());
                }
                ok()
            }
            (b"UNWATCH", []) => {
                self.watched = None;
                ok()
            }
            (b"GET", [key]) => match self.data.get(key) {
                None => RespValue::Bulk(None),
                Some(Entry::Str(value)) => bulk(value),
                Some(_) => error(WRONGTYPE),
            },
            (b"SET", [key, value, options @ ..]) => self.set(key, value, options),
            (b"DEL", keys) => {
                let mut removed = 0;
                for key in keys {
                    if self.data.remove(key).is_some() {
                        removed += 1;
                        self.touch(key);
                    }
                }
                RespValue::Integer(removed)
            }
            (b"EXISTS", keys) => RespValue::Integer(keys.iter().filter(|key| self.data.contains_key(*key)).count() as i64),
            (b"INCR", [key]) => self.incr_by(key, 1),
            (b"DECR", [key]) => self.incr_by(key, -1),
            (b"INCRBY", [key, delta]) => match parse_int(delta) {
                Some(delta) => self.incr_by(key, delta),
                None => error(NOT_INTEGER),
            },
            (b"EXPIRE", [key, seconds]) => {
                if !self.data.contains_key(key) {
                    return RespValue::Integer(0);
                }
                match parse_int(seconds) {
                    Some(seconds) => {
                        self.ttls.insert(key.clone(), seconds as u64);
                        RespValue::Integer(1)
                    }
                    None => error(NOT_INTEGER),
                }
            }
            (b"TTL", [key]) => match (self.data.contains_key(key), self.ttls.get(key)) {
                (false, _) => RespValue::Integer(-2),
                (true, None) => RespValue::Integer(-1),
                (true, Some(seconds)) => RespValue::Integer(*seconds as i64),
            },
            (b"SADD", [key, members @ ..]) if !members.is_empty() => {
                let entry = self.data.entry(key.clone()).or_insert_with(|| Entry::Set(BTreeSet::new()));
                let Entry::Set(set) = entry else {
                    return error(WRONGTYPE);
                };
                let added = members.iter().filter(|member| set.insert((*member).clone())).count();
                self.touch(key);
                RespValue::Integer(added as i64)
            }
            (b"SREM", [key, members @ ..]) => match self.data.get_mut(key) {
                None => RespValue::Integer(0),
                Some(Entry::Set(set)) => {
                    let removed = members.iter().filter(|member| set.remove(*member)).count();
                    self.touch(key);
                    RespValue::Integer(removed as i64)
                }
                Some(_) => error(WRONGTYPE),
            },
            (b"SISMEMBER", [key, member]) => match self.data.get(key) {
                None => RespValue::Integer(0),
                Some(Entry::Set(set)) => RespValue::Integer(set.contains(member) as i64),
                Some(_) => error(WRONGTYPE),
            },
            (b"SMEMBERS", [key]) => match self.data.get(key) {
                None => RespValue::Array(Vec::new()),
                Some(Entry::Set(set)) => RespValue::Array(set.iter().map(|member| bulk(member)).collect()),
                Some(_) => error(WRONGTYPE),
            },
            (b"HSET", [key, pairs @ ..]) if !pairs.is_empty() && pairs.len() % 2 == 0 => {
                let entry = self.data.entry(key.clone()).or_insert_with(|| Entry::Hash(BTreeMap::new()));
                let Entry::Hash(hash) = entry else {
                    return error(WRONGTYPE);
                };
                let added = pairs
                    .chunks(2)
                    .filter(|pair| hash.insert(pair[0].clone(), pair[1].clone()).is_none())
                    .count();
                self.touch(key);
                RespValue::Integer(added as i64)
            }
            (b"HGET", [key, field]) => match self.data.get(key) {
                None => RespValue::Bulk(None),
                Some(Entry::Hash(hash)) => RespValue::Bulk(hash.get(field).cloned()),
                Some(_) => error(WRONGTYPE),
            },
            (b"HGETALL", [key]) => match self.data.get(key) {
                None => RespValue::Array(Vec::new()),
                Some(Entry::Hash(hash)) => RespValue::Array(
                    hash.iter()
                        .flat_map(|(field, value)| [bulk(field), bulk(value)])
                        .collect(),
                ),
                Some(_) => error(WRONGTYPE),
            },
            (b"LPUSH" | b"RPUSH", [key, values @ ..]) if !values.is_empty() => {
                let entry = self.data.entry(key.clone()).or_insert_with(|| Entry::List(VecDeque::new()));
                let Entry::List(list) = entry else {
                    return error(WRONGTYPE);
                };
                for value in values {
                    if name == b"LPUSH" {
                        list.push_front(value.clone());
                    } else {
                        list.push_back(value.clone());
                    }
                }
                let len = list.len() as i64;
                self.touch(key);
                RespValue::Integer(len)
            }
            (b"LRANGE", [key, start, stop]) => match (self.data.get(key), parse_int(start), parse_int(stop)) {
                (None, Some(_), Some(_)) => RespValue::Array(Vec::new()),
                (Some(Entry::List(list)), Some(start), Some(stop)) => {
                    let len = list.len() as i64;
                    let start = if start < 0 { (len + start).max(0) } else { start };
                    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
                    let items = (start..=stop)
                        .filter_map(|idx| list.get(idx as usize))
                        .map(|item| bulk(item))
                        .collect();
                    RespValue::Array(items)
                }
                (Some(Entry::List(_)) | None, _, _) => error(NOT_INTEGER),
                (Some(_), _, _) => error(WRONGTYPE),
            },
            (b"BLPOP", [keys @ .., _timeout]) => {
                for key in keys {
                    if let Some(Entry::List(list)) = self.data.get_mut(key) {
                        if let Some(item) = list.pop_front() {
                            return RespValue::Array(vec![bulk(key), bulk(&item)]);
                        }
                    }
                }
                RespValue::NullArray
            }
            (b"ZADD", [key, score, member]) => {
                let Some(score) = std::str::from_utf8(score).ok().and_then(|s| s.parse::<f64>().ok()) else {
                    return error(b"ERR value is not a valid float");
                };
                let entry = self.data.entry(key.clone()).or_insert_with(|| Entry::ZSet(BTreeMap::new()));
                let Entry::ZSet(zset) = entry else {
                    return error(WRONGTYPE);
                };
                let added = zset.insert(member.clone(), score).is_none();
                self.touch(key);
                RespValue::Integer(added as i64)
            }
            (b"ZSCORE", [key, member]) => match self.data.get(key) {
                None => RespValue::Bulk(None),
                Some(Entry::ZSet(zset)) => RespValue::Bulk(zset.get(member).map(|score| score.to_string().into_bytes())),
                Some(_) => error(WRONGTYPE),
            },
            (b"ZRANGE", [key, _start, _stop, flag]) if flag.eq_ignore_ascii_case(b"WITHSCORES") => {
                match self.data.get(key) {
                    None => RespValue::Array(Vec::new()),
                    Some(Entry::ZSet(zset)) => {
                        let mut members: Vec<(&Vec<u8>, &f64)> = zset.iter().collect();
                        members.sort_by(|a, b| a.1.total_cmp(b.1));
                        RespValue::Array(
                            members
                                .into_iter()
                                .flat_map(|(member, score)| [bulk(member), bulk(score.to_string().as_bytes())])
                                .collect(),
                        )
                    }
                    Some(_) => error(WRONGTYPE),
                }
            }
            (b"INFO", _) => bulk(b"# Server\r\nredis_version:7.2.0\r\nuptime_in_seconds:42\r\n\r\n# Clients\r\nconnected_clients:1\r\n"),
            (b"PUBLISH", [_channel, _message]) => RespValue::Integer(0),
            _ if is_known(name) => error(
                format!(
                    "ERR wrong number of arguments for '{}' command",
                    String::from_utf8_lossy(name).to_ascii_lowercase()
                )
                .as_bytes(),
            ),
            _ => unknown(&args[0]),
        }
    }

    fn set(&mut self, key: &[u8], value: &[u8], options: &[Vec<u8>]) -> RespValue {
        let exists = self.data.contains_key(key);
        if (has_option(options, b"NX") && exists) || (has_option(options, b"XX") && !exists) {
            return RespValue::Bulk(None);
        }
        let previous = match self.data.get(key) {
            None => None,
            Some(Entry::Str(old)) => Some(old.clone()),
            Some(_) if has_option(options, b"GET") => return error(WRONGTYPE),
            Some(_) => None,
        };
        self.data.insert(key.to_vec(), Entry::Str(value.to_vec()));
        self.ttls.remove(key);
        if let Some(pos) = options.iter().position(|option| option.eq_ignore_ascii_case(b"EX")) {
            if let Some(seconds) = options.get(pos + 1).and_then(|s| parse_int(s)) {
                self.ttls.insert(key.to_vec(), seconds as u64);
            }
        }
        self.touch(key);
        if has_option(options, b"GET") {
            RespValue::Bulk(previous)
        } else {
            ok()
        }
    }

    fn incr_by(&mut self, key: &[u8], delta: i64) -> RespValue {
        let current = match self.data.get(key) {
            None => 0,
            Some(Entry::Str(value)) => match parse_int(value) {
                Some(value) => value,
                None => return error(NOT_INTEGER),
            },
            Some(_) => return error(WRONGTYPE),
        };
        let next = current + delta;
        self.data.insert(key.to_vec(), Entry::Str(next.to_string().into_bytes()));
        self.touch(key);
        RespValue::Integer(next)
    }

    fn pubsub(&mut self, args: Vec<Vec<u8>>) {
        let name = args[0].to_ascii_uppercase();
        let targets = &args[1..];
        match name.as_slice() {
            b"SUBSCRIBE" => {
                for channel in targets {
                    self.channels.insert(channel.clone());
                    let count = self.subscription_count();
                    self.events.push_back(push(&[&b"subscribe"[..], channel], Some(count)));
                    for payload in self.scheduled.remove(channel).unwrap_or_default() {
                        self.events.push_back(push(&[&b"message"[..], channel, &payload], None));
                    }
                }
            }
            b"PSUBSCRIBE" => {
                for pattern in targets {
                    self.patterns.insert(pattern.clone());
                    let count = self.subscription_count();
                    self.events.push_back(push(&[&b"psubscribe"[..], pattern], Some(count)));
                    for (channel, payload) in self.scheduled_p.remove(pattern).unwrap_or_default() {
                        self.events
                            .push_back(push(&[&b"pmessage"[..], pattern, &channel, &payload], None));
                    }
                }
            }
            b"UNSUBSCRIBE" | b"PUNSUBSCRIBE" => {
                let pattern_mode = name.as_slice() == b"PUNSUBSCRIBE";
                let kind: &[u8] = if pattern_mode { b"punsubscribe" } else { b"unsubscribe" };
                let subscribed = if pattern_mode { &self.patterns } else { &self.channels };
                let targets: Vec<Vec<u8>> = if targets.is_empty() {
                    subscribed.iter().cloned().collect()
                } else {
                    targets.to_vec()
                };
                if targets.is_empty() {
                    let count = self.subscription_count();
                    self.events.push_back(RespValue::Array(vec![
                        bulk(kind),
                        RespValue::Bulk(None),
                        RespValue::Integer(count),
                    ]));
                    return;
                }
                for target in targets {
                    if pattern_mode {
                        self.patterns.remove(&target);
                    } else {
                        self.channels.remove(&target);
                    }
                    let count = self.subscription_count();
                    self.events.push_back(push(&[kind, &target[..]], Some(count)));
                }
            }
            b"PING" if self.subscription_count() > 0 => {
                self.events.push_back(push(&[&b"pong"[..], &b""[..]], None));
            }
            _ => {
                let reply = self.execute(args);
                self.events.push_back(reply);
            }
        }
    }
}

impl Transport for FakeServer {
    fn send_command(&mut self, command: &Command) -> ClientResult<RespValue> {
        self.check_fault()?;
        let args = self.record(command);
        Ok(self.execute(args))
    }

    fn send_batch(&mut self, commands: &[Command]) -> ClientResult<Vec<RespValue>> {
        self.batches.push(commands.len());
        if let Some(err) = self.batch_fault.take() {
            self.closed = true;
            return Err(err);
        }
        self.check_fault()?;
        let mut replies = Vec::with_capacity(commands.len());
        for command in commands {
            let args = self.record(command);
            replies.push(self.execute(args));
        }
        Ok(replies)
    }

    fn write_command(&mut self, command: &Command) -> ClientResult<()> {
        if self.closed {
            return Err(ClientError::ConnectionClosed);
        }
        let args = self.record(command);
        self.pubsub(args);
        Ok(())
    }

    fn next_event(&mut self, timeout: Option<Duration>) -> ClientResult<Option<RespValue>> {
        if self.closed {
            return Err(ClientError::ConnectionClosed);
        }
        if let Some(event) = self.events.pop_front() {
            return Ok(Some(event));
        }
        match timeout {
            Some(_) => {
                self.timeouts += 1;
                if let Some(event) = self.delayed.pop_front() {
                    self.events.push_back(event);
                }
                Ok(None)
            }
            // Nothing will ever arrive; a real socket would block forever.
            None => Err(ClientError::ConnectionClosed),
        }
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

fn error(message: &[u8]) -> RespValue {
    RespValue::Error(message.to_vec())
}

fn unknown(name: &[u8]) -> RespValue {
    error(format!("ERR unknown command '{}'", String::from_utf8_lossy(name)).as_bytes())
}

fn has_option(options: &[Vec<u8>], flag: &[u8]) -> bool {
    options.iter().any(|option| option.eq_ignore_ascii_case(flag))
}

fn parse_int(data: &[u8]) -> Option<i64> {
    std::str::from_utf8(data).ok()?.parse().ok()
}

fn is_known(name: &[u8]) -> bool {
    const KNOWN: &[&[u8]] = &[
        b"PING", b"ECHO", b"WATCH", b"UNWATCH", b"GET", b"SET", b"DEL", b"EXISTS", b"INCR", b"DECR", b"INCRBY",
        b"EXPIRE", b"TTL", b"SADD", b"SREM", b"SISMEMBER", b"SMEMBERS", b"HSET", b"HGET", b"HGETALL", b"LPUSH",
        b"RPUSH", b"LRANGE", b"BLPOP", b"ZADD", b"ZSCORE", b"ZRANGE", b"INFO", b"PUBLISH",
    ];
    KNOWN.contains(&name)
}
