//! A minimal program with a single string reversing procedure, handy for
//! exercising a server end to end.

use crate::protocol::rpc::{Program, Version};
use crate::protocol::xdr::Type;

pub const PROGRAM: u32 = 20000000;
pub const VERSION: u32 = 1;

pub const REVERSE: u32 = 1;

/// A fresh copy of the program, without handlers.
pub fn program() -> Program {
    Program::new("MINIMAL_PROG", PROGRAM)
        .version(Version::new(VERSION).procedure(REVERSE, "REVERSE", Type::string(), Type::string()))
}
