//! # Command Builder
//!
//! Purpose: Assemble a command name and its ordered byte-string arguments
//! into an immutable value the dispatcher can encode.
//!
//! ## Design Principles
//! 1. **Builder Pattern**: Arguments are appended by value; the finished command is read-only.
//! 2. **Borrow-Friendly API**: Anything implementing `ToArg` can be an argument.
//! 3. **Explicit Idempotency**: Only commands marked idempotent are re-sent after a lost reply.

use std::fmt;

use bytes::Bytes;
use respkit_proto::encode_command;

/// Conversion into one raw command argument.
pub trait ToArg {
    fn to_arg(&self) -> Vec<u8>;
}

impl<T: ToArg + ?Sized> ToArg for &T {
    fn to_arg(&self) -> Vec<u8> {
        (**self).to_arg()
    }
}

impl ToArg for str {
    fn to_arg(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }
}

impl ToArg for String {
    fn to_arg(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }
}

impl ToArg for [u8] {
    fn to_arg(&self) -> Vec<u8> {
        self.to_vec()
    }
}

impl<const N: usize> ToArg for [u8; N] {
    fn to_arg(&self) -> Vec<u8> {
        self.to_vec()
    }
}

impl ToArg for Vec<u8> {
    fn to_arg(&self) -> Vec<u8> {
        self.clone()
    }
}

impl ToArg for Bytes {
    fn to_arg(&self) -> Vec<u8> {
        self.to_vec()
    }
}

macro_rules! int_to_arg {
    ($($ty:ty),*) => {
        $(impl ToArg for $ty {
            fn to_arg(&self) -> Vec<u8> {
                self.to_string().into_bytes()
            }
        })*
    };
}

int_to_arg!(i32, i64, u32, u64, usize);

impl ToArg for f64 {
    fn to_arg(&self) -> Vec<u8> {
        // Rust prints infinities as "inf"/"-inf", which Redis accepts.
        self.to_string().into_bytes()
    }
}

/// A command ready to be sent: argument 0 is the command name.
#[derive(Clone, PartialEq, Eq)]
pub struct Command {
    args: Vec<Vec<u8>>,
    idempotent: bool,
}

impl Command {
    /// Starts a command with its name.
    pub fn new(name: impl ToArg) -> Self {
        Command {
            args: vec![name.to_arg()],
            idempotent: false,
        }
    }

    /// Appends one argument.
    pub fn arg(mut self, arg: impl ToArg) -> Self {
        self.args.push(arg.to_arg());
        self
    }

    /// Appends every argument yielded by `args`.
    pub fn args<I>(mut self, args: I) -> Self
    where
        I: IntoIterator,
        I::Item: ToArg,
    {
        self.args.extend(args.into_iter().map(|arg| arg.to_arg()));
        self
    }

    /// Marks the command as safe to re-send after its reply was lost.
    pub fn idempotent(mut self) -> Self {
        self.idempotent = true;
        self
    }

    pub fn is_idempotent(&self) -> bool {
        self.idempotent
    }

    /// Command name, upper-cased for diagnostics.
    pub fn name(&self) -> String {
        String::from_utf8_lossy(&self.args[0]).to_ascii_uppercase()
    }

    /// All arguments, name included.
    pub fn as_args(&self) -> &[Vec<u8>] {
        &self.args
    }

    /// Appends the RESP request frame for this command to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        encode_command(&self.args, out);
    }
}

impl fmt::Debug for Command {
    // Arguments may carry secrets (AUTH); only the name and arity are shown.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name())
            .field("argc", &self.args.len())
            .field("idempotent", &self.idempotent)
            .finish()
    }
}
