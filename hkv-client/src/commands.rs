//! Domain command encoders.
//!
//! Every method builds a `Command` and hands it to `issue`. `KVClient` sends
//! it right away and returns the transformed value; `Pipeline` and
//! `Transaction` queue it and return a `Deferred`.

use std::time::Duration;

use crate::command::{Command, ToArg};

/// Builds commands and submits them through `issue`.
pub trait Commands {
    type Output;

    fn issue(&mut self, command: Command) -> Self::Output;

    fn get<K: ToArg>(&mut self, key: K) -> Self::Output {
        self.issue(Command::new("GET").arg(key))
    }

    fn set<K: ToArg, V: ToArg>(&mut self, key: K, value: V) -> Self::Output {
        self.issue(Command::new("SET").arg(key).arg(value))
    }

    /// SET with an expiry in whole seconds.
    fn set_ex<K: ToArg, V: ToArg>(&mut self, key: K, value: V, ttl: Duration) -> Self::Output {
        self.issue(Command::new("SET").arg(key).arg(value).arg("EX").arg(ttl.as_secs()))
    }

    /// SET only when the key is absent; resolves to a boolean.
    fn set_nx<K: ToArg, V: ToArg>(&mut self, key: K, value: V) -> Self::Output {
        self.issue(Command::new("SET").arg(key).arg(value).arg("NX"))
    }

    fn del<K: ToArg>(&mut self, keys: &[K]) -> Self::Output {
        self.issue(Command::new("DEL").args(keys))
    }

    /// Boolean for one key, a count otherwise.
    fn exists<K: ToArg>(&mut self, keys: &[K]) -> Self::Output {
        self.issue(Command::new("EXISTS").args(keys))
    }

    fn incr<K: ToArg>(&mut self, key: K) -> Self::Output {
        self.issue(Command::new("INCR").arg(key))
    }

    fn incrby<K: ToArg>(&mut self, key: K, delta: i64) -> Self::Output {
        self.issue(Command::new("INCRBY").arg(key).arg(delta))
    }

    fn decr<K: ToArg>(&mut self, key: K) -> Self::Output {
        self.issue(Command::new("DECR").arg(key))
    }

    fn incrbyfloat<K: ToArg>(&mut self, key: K, delta: f64) -> Self::Output {
        self.issue(Command::new("INCRBYFLOAT").arg(key).arg(delta))
    }

    fn expire<K: ToArg>(&mut self, key: K, ttl: Duration) -> Self::Output {
        self.issue(Command::new("EXPIRE").arg(key).arg(ttl.as_secs()))
    }

    fn persist<K: ToArg>(&mut self, key: K) -> Self::Output {
        self.issue(Command::new("PERSIST").arg(key))
    }

    /// Raw TTL in seconds (`-2` missing, `-1` no expiry).
    fn ttl<K: ToArg>(&mut self, key: K) -> Self::Output {
        self.issue(Command::new("TTL").arg(key))
    }

    fn mget<K: ToArg>(&mut self, keys: &[K]) -> Self::Output {
        self.issue(Command::new("MGET").args(keys))
    }

    /// Boolean for one member, a count otherwise.
    fn sadd<K: ToArg, M: ToArg>(&mut self, key: K, members: &[M]) -> Self::Output {
        self.issue(Command::new("SADD").arg(key).args(members))
    }

    fn srem<K: ToArg, M: ToArg>(&mut self, key: K, members: &[M]) -> Self::Output {
        self.issue(Command::new("SREM").arg(key).args(members))
    }

    fn sismember<K: ToArg, M: ToArg>(&mut self, key: K, member: M) -> Self::Output {
        self.issue(Command::new("SISMEMBER").arg(key).arg(member))
    }

    fn smembers<K: ToArg>(&mut self, key: K) -> Self::Output {
        self.issue(Command::new("SMEMBERS").arg(key))
    }

    fn lpush<K: ToArg, V: ToArg>(&mut self, key: K, values: &[V]) -> Self::Output {
        self.issue(Command::new("LPUSH").arg(key).args(values))
    }

    fn rpush<K: ToArg, V: ToArg>(&mut self, key: K, values: &[V]) -> Self::Output {
        self.issue(Command::new("RPUSH").arg(key).args(values))
    }

    fn lrange<K: ToArg>(&mut self, key: K, start: i64, stop: i64) -> Self::Output {
        self.issue(Command::new("LRANGE").arg(key).arg(start).arg(stop))
    }

    /// Blocking left pop; `Duration::ZERO` waits forever.
    fn blpop<K: ToArg>(&mut self, keys: &[K], timeout: Duration) -> Self::Output {
        self.issue(block_command("BLPOP", keys, timeout))
    }

    fn brpop<K: ToArg>(&mut self, keys: &[K], timeout: Duration) -> Self::Output {
        self.issue(block_command("BRPOP", keys, timeout))
    }

    fn brpoplpush<S: ToArg, D: ToArg>(&mut self, source: S, destination: D, timeout: Duration) -> Self::Output {
        self.issue(
            Command::new("BRPOPLPUSH")
                .arg(source)
                .arg(destination)
                .arg(block_seconds(timeout))
                .blocking(timeout),
        )
    }

    /// Blocking list move; `from` and `to` are `LEFT` or `RIGHT`.
    fn blmove<S: ToArg, D: ToArg>(
        &mut self,
        source: S,
        destination: D,
        from: &str,
        to: &str,
        timeout: Duration,
    ) -> Self::Output {
        self.issue(
            Command::new("BLMOVE")
                .arg(source)
                .arg(destination)
                .arg(from)
                .arg(to)
                .arg(block_seconds(timeout))
                .blocking(timeout),
        )
    }

    fn hset<K: ToArg, F: ToArg, V: ToArg>(&mut self, key: K, field: F, value: V) -> Self::Output {
        self.issue(Command::new("HSET").arg(key).arg(field).arg(value))
    }

    fn hget<K: ToArg, F: ToArg>(&mut self, key: K, field: F) -> Self::Output {
        self.issue(Command::new("HGET").arg(key).arg(field))
    }

    /// Resolves to a field map.
    fn hgetall<K: ToArg>(&mut self, key: K) -> Self::Output {
        self.issue(Command::new("HGETALL").arg(key))
    }

    fn zadd<K: ToArg, M: ToArg>(&mut self, key: K, score: f64, member: M) -> Self::Output {
        self.issue(Command::new("ZADD").arg(key).arg(score).arg(member))
    }

    fn zscore<K: ToArg, M: ToArg>(&mut self, key: K, member: M) -> Self::Output {
        self.issue(Command::new("ZSCORE").arg(key).arg(member))
    }

    /// Resolves to `[member, score]` pairs.
    fn zrange_withscores<K: ToArg>(&mut self, key: K, start: i64, stop: i64) -> Self::Output {
        self.issue(Command::new("ZRANGE").arg(key).arg(start).arg(stop).arg("WITHSCORES"))
    }

    /// Resolves to a map of INFO fields.
    fn info(&mut self) -> Self::Output {
        self.issue(Command::new("INFO"))
    }

    fn ping(&mut self) -> Self::Output {
        self.issue(Command::new("PING"))
    }

    fn echo<M: ToArg>(&mut self, message: M) -> Self::Output {
        self.issue(Command::new("ECHO").arg(message))
    }

    /// Returns the number of receivers.
    fn publish<C: ToArg, M: ToArg>(&mut self, channel: C, message: M) -> Self::Output {
        self.issue(Command::new("PUBLISH").arg(channel).arg(message))
    }
}

fn block_command<K: ToArg>(name: &str, keys: &[K], timeout: Duration) -> Command {
    Command::new(name).args(keys).arg(block_seconds(timeout)).blocking(timeout)
}

/// Server-side block timeout in seconds; fractional unless whole, since a
/// truncated `0` would block forever.
fn block_seconds(timeout: Duration) -> String {
    if timeout.subsec_nanos() == 0 {
        timeout.as_secs().to_string()
    } else {
        timeout.as_secs_f64().to_string()
    }
}
