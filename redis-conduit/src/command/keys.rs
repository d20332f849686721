//! Key extraction for cluster routing

use super::Command;
use crate::request::Arg;

/// How keys are located for commands whose key positions are not fixed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyPattern {
    /// Keys sit at fixed positions only
    #[default]
    Fixed,
    /// Leading key plus the argument after `STORE`
    Sort,
    /// Leading key plus the argument after `STORE` or `STOREDIST`
    GeoRadius,
    /// A count at position `at` followed by that many keys
    NumKeys {
        /// Position of the count, the command name being position 0
        at: usize,
    },
    /// First half of the arguments after `STREAMS`
    Streams,
    /// Positional key, or everything after `KEYS` when it is empty
    Migrate,
}

impl Command {
    /// Keys addressed by a request for this command, in argument order.
    ///
    /// `args` excludes the command name. When an expected keyword is
    /// missing the fixed-position keys are returned, which may be none.
    pub fn extract_keys<'a>(&self, args: &'a [Arg]) -> Vec<&'a [u8]> {
        match self.keys {
            KeyPattern::Fixed => self.fixed_keys(args),
            KeyPattern::Sort => {
                let mut keys = self.fixed_keys(args);
                keys.extend(value_after(args, 1, &["STORE"]));
                keys
            }
            KeyPattern::GeoRadius => {
                let mut keys = self.fixed_keys(args);
                keys.extend(value_after(args, 1, &["STORE", "STOREDIST"]));
                keys
            }
            KeyPattern::NumKeys { at } => {
                self.numkeys(args, at).unwrap_or_else(|| self.fixed_keys(args))
            }
            KeyPattern::Streams => streams(args).unwrap_or_else(|| self.fixed_keys(args)),
            KeyPattern::Migrate => migrate(args),
        }
    }

    fn fixed_keys<'a>(&self, args: &'a [Arg]) -> Vec<&'a [u8]> {
        if self.first_key <= 0 {
            return Vec::new();
        }
        let total = args.len() as i32 + 1;
        let last = if self.last_key < 0 {
            total + self.last_key
        } else {
            self.last_key
        };
        let step = self.step.max(1) as usize;

        (self.first_key..=last.min(total - 1))
            .step_by(step)
            .filter_map(|pos| args.get(pos as usize - 1).map(Arg::as_bytes))
            .collect()
    }

    fn numkeys<'a>(&self, args: &'a [Arg], at: usize) -> Option<Vec<&'a [u8]>> {
        let count = std::str::from_utf8(args.get(at.checked_sub(1)?)?.as_bytes())
            .ok()?
            .parse::<usize>()
            .ok()?;
        let listed = args.get(at..at.checked_add(count)?)?;

        let mut keys = self.fixed_keys(args);
        keys.extend(listed.iter().map(Arg::as_bytes));
        Some(keys)
    }
}

/// Argument following the first of `markers` found at or after `from`
fn value_after<'a>(args: &'a [Arg], from: usize, markers: &[&str]) -> Option<&'a [u8]> {
    let tail = args.get(from..)?;
    let pos = tail.iter().position(|a| is_keyword(a, markers))?;
    tail.get(pos + 1).map(Arg::as_bytes)
}

fn streams(args: &[Arg]) -> Option<Vec<&[u8]>> {
    let pos = args.iter().position(|a| is_keyword(a, &["STREAMS"]))?;
    let rest = &args[pos + 1..];
    if rest.is_empty() || rest.len() % 2 != 0 {
        return None;
    }
    Some(rest[..rest.len() / 2].iter().map(Arg::as_bytes).collect())
}

// MIGRATE host port key|"" db timeout [COPY] [REPLACE] [AUTH ..] [KEYS k ..]
fn migrate(args: &[Arg]) -> Vec<&[u8]> {
    match args.get(2).map(Arg::as_bytes) {
        Some(key) if !key.is_empty() => vec![key],
        _ => args
            .iter()
            .skip(5)
            .position(|a| is_keyword(a, &["KEYS"]))
            .map(|pos| args[5 + pos + 1..].iter().map(Arg::as_bytes).collect())
            .unwrap_or_default(),
    }
}

fn is_keyword(arg: &Arg, markers: &[&str]) -> bool {
    let bytes = arg.as_bytes();
    markers.iter().any(|m| bytes.eq_ignore_ascii_case(m.as_bytes()))
}

#[cfg(test)]
mod tests {
    use crate::request::Request;

    fn keys(parts: &[&str]) -> Vec<String> {
        let mut req = Request::cmd(parts[0]);
        for part in &parts[1..] {
            req = req.arg(*part);
        }
        req.keys()
            .into_iter()
            .map(|k| String::from_utf8_lossy(k).into_owned())
            .collect()
    }

    #[test]
    fn test_fixed_positions() {
        assert_eq!(keys(&["GET", "a"]), ["a"]);
        assert_eq!(keys(&["MSET", "a", "1", "b", "2"]), ["a", "b"]);
        assert_eq!(keys(&["BLPOP", "l1", "l2", "0"]), ["l1", "l2"]);
        assert_eq!(keys(&["BITOP", "AND", "dest", "s1", "s2"]), ["dest", "s1", "s2"]);
        assert!(keys(&["PING"]).is_empty());
    }

    #[test]
    fn test_georadius_store() {
        assert_eq!(
            keys(&["GEORADIUS", "Sicily", "15", "37", "200", "km", "WITHDIST", "STORE", "dest"]),
            ["Sicily", "dest"]
        );
        assert_eq!(
            keys(&["georadiusbymember", "Sicily", "Agrigento", "100", "km", "storedist", "d2"]),
            ["Sicily", "d2"]
        );
        assert_eq!(keys(&["GEORADIUS", "Sicily", "15", "37", "200", "km"]), ["Sicily"]);
    }

    #[test]
    fn test_sort_store() {
        assert_eq!(keys(&["SORT", "list", "ALPHA", "store", "out"]), ["list", "out"]);
        assert_eq!(keys(&["SORT", "list", "DESC"]), ["list"]);
    }

    #[test]
    fn test_numkeys() {
        assert_eq!(
            keys(&["ZINTERSTORE", "dest", "2", "k1", "k2", "WEIGHTS", "1", "2"]),
            ["dest", "k1", "k2"]
        );
        assert_eq!(keys(&["EVAL", "return 1", "2", "a", "b", "argv1"]), ["a", "b"]);
        assert_eq!(keys(&["LMPOP", "2", "x", "y", "LEFT"]), ["x", "y"]);
        assert!(keys(&["EVAL", "return 1", "0"]).is_empty());
    }

    #[test]
    fn test_numkeys_bad_count_falls_back() {
        assert_eq!(keys(&["ZUNIONSTORE", "dest", "nope", "k1"]), ["dest"]);
        assert_eq!(keys(&["ZUNIONSTORE", "dest", "9", "k1"]), ["dest"]);
    }

    #[test]
    fn test_streams() {
        assert_eq!(
            keys(&["XREAD", "COUNT", "2", "streams", "s1", "s2", "0", "0"]),
            ["s1", "s2"]
        );
        assert_eq!(
            keys(&["XREADGROUP", "GROUP", "g", "c", "STREAMS", "s1", ">"]),
            ["s1"]
        );
        assert!(keys(&["XREAD", "COUNT", "2", "s1", "0"]).is_empty());
    }

    #[test]
    fn test_migrate() {
        assert_eq!(
            keys(&["MIGRATE", "host", "6379", "", "0", "5000", "KEYS", "a", "b", "c"]),
            ["a", "b", "c"]
        );
        assert_eq!(keys(&["MIGRATE", "host", "6379", "k", "0", "5000"]), ["k"]);
        assert!(keys(&["MIGRATE", "host", "6379", "", "0", "5000"]).is_empty());
    }
}
