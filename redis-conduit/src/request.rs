//! Requests: a command plus its arguments

use crate::command::Command;
use bytes::Bytes;
use redis_conduit_core::error::RedisResult;
use std::borrow::Cow;
use std::fmt;

/// One request argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    /// Bulk string bytes
    Bulk(Bytes),
    /// Encoded as the null bulk string `$-1`
    Null,
}

impl Arg {
    /// Raw bytes of the argument (empty for `Null`)
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Bulk(b) => b,
            Self::Null => &[],
        }
    }
}

/// Conversion into a request argument
pub trait ToArg {
    /// Produce the argument
    fn to_arg(&self) -> Arg;
}

impl<T: ToArg + ?Sized> ToArg for &T {
    fn to_arg(&self) -> Arg {
        (**self).to_arg()
    }
}

impl ToArg for Arg {
    fn to_arg(&self) -> Arg {
        self.clone()
    }
}

impl ToArg for str {
    fn to_arg(&self) -> Arg {
        Arg::Bulk(Bytes::copy_from_slice(self.as_bytes()))
    }
}

impl ToArg for String {
    fn to_arg(&self) -> Arg {
        self.as_str().to_arg()
    }
}

impl ToArg for [u8] {
    fn to_arg(&self) -> Arg {
        Arg::Bulk(Bytes::copy_from_slice(self))
    }
}

impl<const N: usize> ToArg for [u8; N] {
    fn to_arg(&self) -> Arg {
        self.as_slice().to_arg()
    }
}

impl ToArg for Vec<u8> {
    fn to_arg(&self) -> Arg {
        self.as_slice().to_arg()
    }
}

impl ToArg for Bytes {
    fn to_arg(&self) -> Arg {
        Arg::Bulk(self.clone())
    }
}

impl ToArg for bool {
    fn to_arg(&self) -> Arg {
        Arg::Bulk(Bytes::from_static(if *self { b"1" } else { b"0" }))
    }
}

macro_rules! decimal_args {
    ($($ty:ty),*) => {
        $(
            impl ToArg for $ty {
                fn to_arg(&self) -> Arg {
                    Arg::Bulk(Bytes::from(self.to_string()))
                }
            }
        )*
    };
}

decimal_args!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64);

impl<T: ToArg> ToArg for Option<T> {
    fn to_arg(&self) -> Arg {
        self.as_ref().map_or(Arg::Null, ToArg::to_arg)
    }
}

/// A command with its arguments, ready to be encoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    command: Cow<'static, Command>,
    args: Vec<Arg>,
}

impl Request {
    /// Start a request by command name.
    ///
    /// Names missing from the catalog become keyless custom commands; use
    /// [`Request::new`] to describe their keys.
    pub fn cmd(name: &str) -> Self {
        let command = Command::lookup(name).map_or_else(
            || Cow::Owned(Command::new(name.to_string())),
            Cow::Borrowed,
        );
        Self {
            command,
            args: Vec::new(),
        }
    }

    /// Start a request for a caller-described command
    pub fn new(command: Command) -> Self {
        Self {
            command: Cow::Owned(command),
            args: Vec::new(),
        }
    }

    /// Append an argument
    #[must_use]
    pub fn arg(mut self, arg: impl ToArg) -> Self {
        self.args.push(arg.to_arg());
        self
    }

    /// Append every item of `args`
    #[must_use]
    pub fn args<I>(mut self, args: I) -> Self
    where
        I: IntoIterator,
        I::Item: ToArg,
    {
        self.args.extend(args.into_iter().map(|a| a.to_arg()));
        self
    }

    /// Append an argument in place
    pub fn push_arg(&mut self, arg: impl ToArg) {
        self.args.push(arg.to_arg());
    }

    /// Command metadata
    pub fn command(&self) -> &Command {
        &self.command
    }

    /// Arguments, without the command name
    pub fn arguments(&self) -> &[Arg] {
        &self.args
    }

    /// Number of wire elements, the command name included
    pub fn argc(&self) -> usize {
        self.args.len() + 1
    }

    /// Keys this request addresses
    pub fn keys(&self) -> Vec<&[u8]> {
        self.command.extract_keys(&self.args)
    }

    /// Whether this request may be served by a replica
    pub fn is_read_only(&self) -> bool {
        self.command.is_read_only()
    }

    /// Check the argument count against the command's arity
    ///
    /// # Errors
    ///
    /// Returns [`redis_conduit_core::RedisError::InvalidArgument`] on mismatch.
    pub fn check_arity(&self) -> RedisResult<()> {
        self.command.check_arity(self.argc())
    }

    /// Case-insensitive check of the first argument, for subcommands
    pub fn has_subcommand(&self, sub: &str) -> bool {
        self.args
            .first()
            .is_some_and(|a| a.as_bytes().eq_ignore_ascii_case(sub.as_bytes()))
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} args)", self.command.name(), self.args.len())
    }
}
