pub mod arg;

use std::str::FromStr;

use bytes::Bytes;
use itertools::Itertools;
use strum_macros::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::frame::Frame;
use crate::Error;

pub use arg::{Arg, IntoArgs};

/// Invokes `$callback!` with the table of recognized commands. Every entry is
/// `Variant => "WIRE NAME", method_name;`, optionally preceded by doc attributes.
///
/// The table drives both the `CommandName` enum and the per-command methods on `Client`.
macro_rules! with_commands {
    ($callback:ident) => {
        $callback! {
            Append => "APPEND", append;
            Auth => "AUTH", auth;
            BgRewriteAof => "BGREWRITEAOF", bgrewriteaof;
            BgSave => "BGSAVE", bgsave;
            BLPop => "BLPOP", blpop;
            BRPop => "BRPOP", brpop;
            BRPopLPush => "BRPOPLPUSH", brpoplpush;
            ConfigGet => "CONFIG GET", config_get;
            ConfigSet => "CONFIG SET", config_set;
            ConfigResetStat => "CONFIG RESETSTAT", config_resetstat;
            DbSize => "DBSIZE", dbsize;
            DebugObject => "DEBUG OBJECT", debug_object;
            DebugSegfault => "DEBUG SEGFAULT", debug_segfault;
            Decr => "DECR", decr;
            DecrBy => "DECRBY", decrby;
            Del => "DEL", del;
            Discard => "DISCARD", discard;
            Echo => "ECHO", echo;
            Exec => "EXEC", exec;
            Exists => "EXISTS", exists;
            Expire => "EXPIRE", expire;
            ExpireAt => "EXPIREAT", expireat;
            FlushAll => "FLUSHALL", flushall;
            FlushDb => "FLUSHDB", flushdb;
            Get => "GET", get;
            GetBit => "GETBIT", getbit;
            GetRange => "GETRANGE", getrange;
            GetSet => "GETSET", getset;
            HDel => "HDEL", hdel;
            HExists => "HEXISTS", hexists;
            HGet => "HGET", hget;
            HGetAll => "HGETALL", hgetall;
            HIncrBy => "HINCRBY", hincrby;
            HKeys => "HKEYS", hkeys;
            HLen => "HLEN", hlen;
            HMGet => "HMGET", hmget;
            HMSet => "HMSET", hmset;
            HSet => "HSET", hset;
            HSetNx => "HSETNX", hsetnx;
            HVals => "HVALS", hvals;
            Incr => "INCR", incr;
            IncrBy => "INCRBY", incrby;
            Info => "INFO", info;
            Keys => "KEYS", keys;
            LastSave => "LASTSAVE", lastsave;
            LIndex => "LINDEX", lindex;
            LInsert => "LINSERT", linsert;
            LLen => "LLEN", llen;
            LPop => "LPOP", lpop;
            LPush => "LPUSH", lpush;
            LPushX => "LPUSHX", lpushx;
            LRange => "LRANGE", lrange;
            LRem => "LREM", lrem;
            LSet => "LSET", lset;
            LTrim => "LTRIM", ltrim;
            MGet => "MGET", mget;
            Monitor => "MONITOR", monitor;
            Move => "MOVE", move_;
            MSet => "MSET", mset;
            MSetNx => "MSETNX", msetnx;
            Multi => "MULTI", multi;
            Object => "OBJECT", object;
            Persist => "PERSIST", persist;
            Ping => "PING", ping;
            /// Subscribes to channel patterns.
            ///
            /// Unlike every other command, the callback is invoked once per pushed message: first
            /// for each `psubscribe` confirmation of its patterns, then for every `pmessage`
            /// matched by them, and finally for their `punsubscribe` confirmations. It stops being
            /// called once no channel is left open on the connection.
            ///
            /// Called while another subscription is active, it joins that subscription: its
            /// callback receives the confirmations and messages of its own patterns only.
            PSubscribe => "PSUBSCRIBE", psubscribe;
            Publish => "PUBLISH", publish;
            PUnsubscribe => "PUNSUBSCRIBE", punsubscribe;
            Quit => "QUIT", quit;
            RandomKey => "RANDOMKEY", randomkey;
            Rename => "RENAME", rename;
            RenameNx => "RENAMENX", renamenx;
            RPop => "RPOP", rpop;
            RPopLPush => "RPOPLPUSH", rpoplpush;
            RPush => "RPUSH", rpush;
            RPushX => "RPUSHX", rpushx;
            SAdd => "SADD", sadd;
            Save => "SAVE", save;
            SCard => "SCARD", scard;
            SDiff => "SDIFF", sdiff;
            SDiffStore => "SDIFFSTORE", sdiffstore;
            Select => "SELECT", select;
            Set => "SET", set;
            SetBit => "SETBIT", setbit;
            SetEx => "SETEX", setex;
            SetNx => "SETNX", setnx;
            SetRange => "SETRANGE", setrange;
            Shutdown => "SHUTDOWN", shutdown;
            SInter => "SINTER", sinter;
            SInterStore => "SINTERSTORE", sinterstore;
            SIsMember => "SISMEMBER", sismember;
            SlaveOf => "SLAVEOF", slaveof;
            SlowLog => "SLOWLOG", slowlog;
            SMembers => "SMEMBERS", smembers;
            SMove => "SMOVE", smove;
            Sort => "SORT", sort;
            SPop => "SPOP", spop;
            SRandMember => "SRANDMEMBER", srandmember;
            SRem => "SREM", srem;
            StrLen => "STRLEN", strlen;
            /// Subscribes to channels.
            ///
            /// Unlike every other command, the callback is invoked once per pushed message: first
            /// for each `subscribe` confirmation of its channels, then for every `message` on
            /// them, and finally for their `unsubscribe` confirmations. It stops being called once
            /// no channel is left open on the connection.
            ///
            /// Called while another subscription is active, it joins that subscription: its
            /// callback receives the confirmations and messages of its own channels only.
            Subscribe => "SUBSCRIBE", subscribe;
            SUnion => "SUNION", sunion;
            SUnionStore => "SUNIONSTORE", sunionstore;
            Sync => "SYNC", sync;
            Ttl => "TTL", ttl;
            Type => "TYPE", type_;
            Unsubscribe => "UNSUBSCRIBE", unsubscribe;
            Unwatch => "UNWATCH", unwatch;
            Watch => "WATCH", watch;
            ZAdd => "ZADD", zadd;
            ZCard => "ZCARD", zcard;
            ZCount => "ZCOUNT", zcount;
            ZIncrBy => "ZINCRBY", zincrby;
            ZInterStore => "ZINTERSTORE", zinterstore;
            ZRange => "ZRANGE", zrange;
            ZRangeByScore => "ZRANGEBYSCORE", zrangebyscore;
            ZRank => "ZRANK", zrank;
            ZRem => "ZREM", zrem;
            ZRemRangeByRank => "ZREMRANGEBYRANK", zremrangebyrank;
            ZRemRangeByScore => "ZREMRANGEBYSCORE", zremrangebyscore;
            ZRevRange => "ZREVRANGE", zrevrange;
            ZRevRangeByScore => "ZREVRANGEBYSCORE", zrevrangebyscore;
            ZRevRank => "ZREVRANK", zrevrank;
            ZScore => "ZSCORE", zscore;
            ZUnionStore => "ZUNIONSTORE", zunionstore;
        }
    };
}

pub(crate) use with_commands;

macro_rules! define_command_name {
    ($($(#[$meta:meta])* $variant:ident => $wire:literal, $method:ident;)*) => {
        /// The recognized command names. Parsing is case-insensitive.
        ///
        /// Ref: <https://redis.io/docs/latest/commands/>
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, EnumIter, EnumString, IntoStaticStr)]
        #[strum(ascii_case_insensitive)]
        pub enum CommandName {
            $(
                $(#[$meta])*
                #[strum(serialize = $wire)]
                $variant,
            )*
        }
    };
}

with_commands!(define_command_name);

impl CommandName {
    /// Looks up a command name, ignoring case and extra whitespace between words.
    pub fn parse(name: &str) -> Result<CommandName, Error> {
        let normalized = name.split_whitespace().join(" ");
        CommandName::from_str(&normalized).map_err(|_| Error::UnknownCommand(name.to_string()))
    }

    /// The name as sent on the wire, e.g. `"CONFIG GET"`.
    pub fn as_str(&self) -> &'static str {
        self.into()
    }

    /// The words of the name. Each one is sent as its own bulk string.
    pub fn words(&self) -> impl Iterator<Item = &'static str> {
        self.as_str().split(' ')
    }

    /// Whether the reply is an open-ended stream of pushed messages rather than a single value.
    pub fn is_subscription(&self) -> bool {
        matches!(self, CommandName::Subscribe | CommandName::PSubscribe)
    }

    /// Whether the arguments are channel names, or patterns for the `P` variants.
    pub fn takes_channels(&self) -> bool {
        matches!(
            self,
            CommandName::Subscribe
                | CommandName::PSubscribe
                | CommandName::Unsubscribe
                | CommandName::PUnsubscribe
        )
    }

    /// Whether the channel arguments are patterns.
    pub fn takes_patterns(&self) -> bool {
        matches!(self, CommandName::PSubscribe | CommandName::PUnsubscribe)
    }
}

/// A command ready to be encoded: its name followed by positional arguments.
#[derive(Clone, Debug, PartialEq)]
pub struct Command {
    name: CommandName,
    args: Vec<Bytes>,
}

impl Command {
    pub fn new(name: CommandName, args: impl IntoArgs) -> Command {
        Command {
            name,
            args: args.into_args().into_iter().map(Arg::into_bytes).collect(),
        }
    }

    /// Builds a command from a textual name, failing with `UnknownCommand` if the name is not
    /// recognized.
    pub fn parse(name: &str, args: impl IntoArgs) -> Result<Command, Error> {
        Ok(Command::new(CommandName::parse(name)?, args))
    }

    pub fn name(&self) -> CommandName {
        self.name
    }

    pub fn args(&self) -> &[Bytes] {
        &self.args
    }

    /// Number of elements in the encoded array: name words plus arguments.
    pub fn element_count(&self) -> usize {
        self.name.words().count() + self.args.len()
    }

    /// The command as the array of bulk strings sent to the server.
    pub fn to_frame(&self) -> Frame {
        let words = self
            .name
            .words()
            .map(|word| Frame::Bulk(Bytes::from_static(word.as_bytes())));
        let args = self.args.iter().cloned().map(Frame::Bulk);

        Frame::Array(words.chain(args).collect())
    }
}
