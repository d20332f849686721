//! Static command table
//!
//! Columns: name, arity, first key, last key, step, flags, key pattern.
//! Arity and key positions follow `COMMAND INFO`, counting the command
//! name as argument 0.

use super::keys::KeyPattern;

pub(crate) const READONLY: u8 = 1;
pub(crate) const CLUSTER_WIDE: u8 = 1 << 1;
pub(crate) const PUBSUB: u8 = 1 << 2;

const RO: u8 = READONLY;
const W: u8 = 0;

pub(crate) struct Entry {
    pub(crate) name: &'static str,
    pub(crate) arity: i32,
    pub(crate) first_key: i32,
    pub(crate) last_key: i32,
    pub(crate) step: i32,
    pub(crate) flags: u8,
    pub(crate) keys: KeyPattern,
}

const fn e(name: &'static str, arity: i32, first_key: i32, last_key: i32, step: i32, flags: u8) -> Entry {
    Entry {
        name,
        arity,
        first_key,
        last_key,
        step,
        flags,
        keys: KeyPattern::Fixed,
    }
}

const fn m(
    name: &'static str,
    arity: i32,
    first_key: i32,
    last_key: i32,
    flags: u8,
    keys: KeyPattern,
) -> Entry {
    Entry {
        name,
        arity,
        first_key,
        last_key,
        step: 1,
        flags,
        keys,
    }
}

/// Single key at position 1
const fn k(name: &'static str, arity: i32, flags: u8) -> Entry {
    e(name, arity, 1, 1, 1, flags)
}

/// No key
const fn n(name: &'static str, arity: i32, flags: u8) -> Entry {
    e(name, arity, 0, 0, 0, flags)
}

const fn numkeys(at: usize) -> KeyPattern {
    KeyPattern::NumKeys { at }
}

pub(crate) static ENTRIES: &[Entry] = &[
    // strings
    k("APPEND", 3, W),
    k("DECR", 2, W),
    k("DECRBY", 3, W),
    k("GET", 2, RO),
    k("GETDEL", 2, W),
    k("GETEX", -2, W),
    k("GETRANGE", 4, RO),
    k("GETSET", 3, W),
    k("INCR", 2, W),
    k("INCRBY", 3, W),
    k("INCRBYFLOAT", 3, W),
    e("LCS", -3, 1, 2, 1, RO),
    e("MGET", -2, 1, -1, 1, RO),
    e("MSET", -3, 1, -1, 2, W),
    e("MSETNX", -3, 1, -1, 2, W),
    k("PSETEX", 4, W),
    k("SET", -3, W),
    k("SETEX", 4, W),
    k("SETNX", 3, W),
    k("SETRANGE", 4, W),
    k("STRLEN", 2, RO),
    k("SUBSTR", 4, RO),
    // generic keyspace
    e("COPY", -3, 1, 2, 1, W),
    e("DEL", -2, 1, -1, 1, W),
    k("DUMP", 2, RO),
    e("EXISTS", -2, 1, -1, 1, RO),
    k("EXPIRE", -3, W),
    k("EXPIREAT", -3, W),
    k("EXPIRETIME", 2, RO),
    n("KEYS", 2, RO | CLUSTER_WIDE),
    m("MIGRATE", -6, 3, 3, W, KeyPattern::Migrate),
    k("MOVE", 3, W),
    e("OBJECT", -2, 2, 2, 1, RO),
    k("PERSIST", 2, W),
    k("PEXPIRE", -3, W),
    k("PEXPIREAT", -3, W),
    k("PEXPIRETIME", 2, RO),
    k("PTTL", 2, RO),
    n("RANDOMKEY", 1, RO),
    e("RENAME", 3, 1, 2, 1, W),
    e("RENAMENX", 3, 1, 2, 1, W),
    k("RESTORE", -4, W),
    n("SCAN", -2, RO),
    m("SORT", -2, 1, 1, W, KeyPattern::Sort),
    k("SORT_RO", -2, RO),
    e("TOUCH", -2, 1, -1, 1, RO),
    k("TTL", 2, RO),
    k("TYPE", 2, RO),
    e("UNLINK", -2, 1, -1, 1, W),
    // hashes
    k("HDEL", -3, W),
    k("HEXISTS", 3, RO),
    k("HGET", 3, RO),
    k("HGETALL", 2, RO),
    k("HINCRBY", 4, W),
    k("HINCRBYFLOAT", 4, W),
    k("HKEYS", 2, RO),
    k("HLEN", 2, RO),
    k("HMGET", -3, RO),
    k("HMSET", -4, W),
    k("HRANDFIELD", -2, RO),
    k("HSCAN", -3, RO),
    k("HSET", -4, W),
    k("HSETNX", 4, W),
    k("HSTRLEN", 3, RO),
    k("HVALS", 2, RO),
    // lists
    e("BLMOVE", 6, 1, 2, 1, W),
    m("BLMPOP", -5, 0, 0, W, numkeys(2)),
    e("BLPOP", -3, 1, -2, 1, W),
    e("BRPOP", -3, 1, -2, 1, W),
    e("BRPOPLPUSH", 4, 1, 2, 1, W),
    k("LINDEX", 3, RO),
    k("LINSERT", 5, W),
    k("LLEN", 2, RO),
    e("LMOVE", 5, 1, 2, 1, W),
    m("LMPOP", -4, 0, 0, W, numkeys(1)),
    k("LPOP", -2, W),
    k("LPOS", -3, RO),
    k("LPUSH", -3, W),
    k("LPUSHX", -3, W),
    k("LRANGE", 4, RO),
    k("LREM", 4, W),
    k("LSET", 4, W),
    k("LTRIM", 4, W),
    k("RPOP", -2, W),
    e("RPOPLPUSH", 3, 1, 2, 1, W),
    k("RPUSH", -3, W),
    k("RPUSHX", -3, W),
    // sets
    k("SADD", -3, W),
    k("SCARD", 2, RO),
    e("SDIFF", -2, 1, -1, 1, RO),
    e("SDIFFSTORE", -3, 1, -1, 1, W),
    e("SINTER", -2, 1, -1, 1, RO),
    m("SINTERCARD", -3, 0, 0, RO, numkeys(1)),
    e("SINTERSTORE", -3, 1, -1, 1, W),
    k("SISMEMBER", 3, RO),
    k("SMEMBERS", 2, RO),
    k("SMISMEMBER", -3, RO),
    e("SMOVE", 4, 1, 2, 1, W),
    k("SPOP", -2, W),
    k("SRANDMEMBER", -2, RO),
    k("SREM", -3, W),
    k("SSCAN", -3, RO),
    e("SUNION", -2, 1, -1, 1, RO),
    e("SUNIONSTORE", -3, 1, -1, 1, W),
    // sorted sets
    m("BZMPOP", -5, 0, 0, W, numkeys(2)),
    e("BZPOPMAX", -3, 1, -2, 1, W),
    e("BZPOPMIN", -3, 1, -2, 1, W),
    k("ZADD", -4, W),
    k("ZCARD", 2, RO),
    k("ZCOUNT", 4, RO),
    m("ZDIFF", -3, 0, 0, RO, numkeys(1)),
    m("ZDIFFSTORE", -4, 1, 1, W, numkeys(2)),
    k("ZINCRBY", 4, W),
    m("ZINTER", -3, 0, 0, RO, numkeys(1)),
    m("ZINTERCARD", -3, 0, 0, RO, numkeys(1)),
    m("ZINTERSTORE", -4, 1, 1, W, numkeys(2)),
    k("ZLEXCOUNT", 4, RO),
    m("ZMPOP", -4, 0, 0, W, numkeys(1)),
    k("ZMSCORE", -3, RO),
    k("ZPOPMAX", -2, W),
    k("ZPOPMIN", -2, W),
    k("ZRANDMEMBER", -2, RO),
    k("ZRANGE", -4, RO),
    k("ZRANGEBYLEX", -4, RO),
    k("ZRANGEBYSCORE", -4, RO),
    e("ZRANGESTORE", -5, 1, 2, 1, W),
    k("ZRANK", -3, RO),
    k("ZREM", -3, W),
    k("ZREMRANGEBYLEX", 4, W),
    k("ZREMRANGEBYRANK", 4, W),
    k("ZREMRANGEBYSCORE", 4, W),
    k("ZREVRANGE", -4, RO),
    k("ZREVRANGEBYLEX", -4, RO),
    k("ZREVRANGEBYSCORE", -4, RO),
    k("ZREVRANK", -3, RO),
    k("ZSCAN", -3, RO),
    k("ZSCORE", 3, RO),
    m("ZUNION", -3, 0, 0, RO, numkeys(1)),
    m("ZUNIONSTORE", -4, 1, 1, W, numkeys(2)),
    // geo
    k("GEOADD", -5, W),
    k("GEODIST", -4, RO),
    k("GEOHASH", -2, RO),
    k("GEOPOS", -2, RO),
    m("GEORADIUS", -6, 1, 1, W, KeyPattern::GeoRadius),
    m("GEORADIUSBYMEMBER", -5, 1, 1, W, KeyPattern::GeoRadius),
    k("GEORADIUS_RO", -6, RO),
    k("GEORADIUSBYMEMBER_RO", -5, RO),
    k("GEOSEARCH", -7, RO),
    e("GEOSEARCHSTORE", -8, 1, 2, 1, W),
    // hyperloglog
    k("PFADD", -2, W),
    e("PFCOUNT", -2, 1, -1, 1, RO),
    e("PFMERGE", -2, 1, -1, 1, W),
    // bitmaps
    k("BITCOUNT", -2, RO),
    k("BITFIELD", -2, W),
    k("BITFIELD_RO", -2, RO),
    e("BITOP", -4, 2, -1, 1, W),
    k("BITPOS", -3, RO),
    k("GETBIT", 3, RO),
    k("SETBIT", 4, W),
    // streams
    k("XACK", -4, W),
    k("XADD", -5, W),
    k("XAUTOCLAIM", -6, W),
    k("XCLAIM", -6, W),
    k("XDEL", -3, W),
    e("XGROUP", -2, 2, 2, 1, W),
    e("XINFO", -2, 2, 2, 1, RO),
    k("XLEN", 2, RO),
    k("XPENDING", -3, RO),
    k("XRANGE", -4, RO),
    m("XREAD", -4, 0, 0, RO, KeyPattern::Streams),
    m("XREADGROUP", -7, 0, 0, W, KeyPattern::Streams),
    k("XREVRANGE", -4, RO),
    k("XSETID", -3, W),
    k("XTRIM", -4, W),
    // scripting
    m("EVAL", -3, 0, 0, W, numkeys(2)),
    m("EVAL_RO", -3, 0, 0, RO, numkeys(2)),
    m("EVALSHA", -3, 0, 0, W, numkeys(2)),
    m("EVALSHA_RO", -3, 0, 0, RO, numkeys(2)),
    m("FCALL", -3, 0, 0, W, numkeys(2)),
    m("FCALL_RO", -3, 0, 0, RO, numkeys(2)),
    n("FUNCTION", -2, CLUSTER_WIDE),
    n("SCRIPT", -2, CLUSTER_WIDE),
    // pub/sub
    n("PSUBSCRIBE", -2, PUBSUB),
    n("PUBLISH", 3, W),
    n("PUBSUB", -2, RO),
    n("PUNSUBSCRIBE", -1, PUBSUB),
    e("SPUBLISH", 3, 1, 1, 1, W),
    e("SSUBSCRIBE", -2, 1, -1, 1, PUBSUB),
    n("SUBSCRIBE", -2, PUBSUB),
    e("SUNSUBSCRIBE", -1, 1, -1, 1, PUBSUB),
    n("UNSUBSCRIBE", -1, PUBSUB),
    // transactions
    n("DISCARD", 1, W),
    n("EXEC", 1, W),
    n("MULTI", 1, W),
    n("UNWATCH", 1, W),
    e("WATCH", -2, 1, -1, 1, W),
    // connection and server
    n("ASKING", 1, W),
    n("AUTH", -2, W),
    n("BGSAVE", -1, W),
    n("CLIENT", -2, W),
    n("CLUSTER", -2, W),
    n("COMMAND", -1, RO),
    n("CONFIG", -2, W),
    n("DBSIZE", 1, RO | CLUSTER_WIDE),
    n("ECHO", 2, RO),
    n("FLUSHALL", -1, CLUSTER_WIDE),
    n("FLUSHDB", -1, CLUSTER_WIDE),
    n("HELLO", -1, W),
    n("INFO", -1, RO),
    n("LASTSAVE", 1, RO),
    e("MEMORY", -2, 2, 2, 1, RO),
    n("PING", -1, RO),
    n("QUIT", -1, W),
    n("READONLY", 1, W),
    n("READWRITE", 1, W),
    n("REPLICAOF", 3, W),
    n("RESET", 1, W),
    n("ROLE", 1, RO),
    n("SAVE", 1, W),
    n("SELECT", 2, W),
    n("SENTINEL", -2, W),
    n("SLOWLOG", -2, RO),
    n("SWAPDB", 3, W),
    n("TIME", 1, RO),
    n("WAIT", 3, W),
];
