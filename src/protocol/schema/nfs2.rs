//! NFS version 2 (RFC 1094).
//!
//! Only the wire schema lives here; a server binds handlers to a copy of
//! [`program()`]. Storage errors are recovered inside handlers with
//! [`recover`], which turns them into an `nfsstat` inside a successful reply.

// Type names follow the RFC XDR definitions
#![allow(non_camel_case_types)]

use std::io;
use std::sync::{Arc, LazyLock};

use num_derive::{FromPrimitive, ToPrimitive};

use crate::protocol::rpc::{Program, Version};
use crate::protocol::xdr::{Enumeration, Structure, Type, Union, Value};

/// NFS RPC program number
pub const PROGRAM: u32 = 100003;
/// NFS protocol version 2
pub const VERSION: u32 = 2;
/// Conventional NFS port
pub const NFS_PORT: u16 = 2049;

pub const MAXDATA: usize = 8192;
pub const MAXPATHLEN: usize = 1024;
pub const MAXNAMLEN: usize = 255;
pub const FHSIZE: usize = 32;

/// Status codes returned by NFS operations
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum nfsstat {
    NFS_OK = 0,
    /// Not owner
    NFSERR_PERM = 1,
    /// No such file or directory
    NFSERR_NOENT = 2,
    /// I/O error
    NFSERR_IO = 5,
    /// No such device or address
    NFSERR_NXIO = 6,
    /// Permission denied
    NFSERR_ACCES = 13,
    /// File exists
    NFSERR_EXIST = 17,
    /// No such device
    NFSERR_NODEV = 19,
    /// Not a directory
    NFSERR_NOTDIR = 20,
    /// Is a directory
    NFSERR_ISDIR = 21,
    /// Invalid argument
    NFSERR_INVAL = 22,
    /// File too large
    NFSERR_FBIG = 27,
    /// No space left on device
    NFSERR_NOSPC = 28,
    /// Read-only file system
    NFSERR_ROFS = 30,
    /// File name too long
    NFSERR_NAMETOOLONG = 63,
    /// Directory not empty
    NFSERR_NOTEMPTY = 66,
    /// Disc quota exceeded
    NFSERR_DQUOT = 69,
    /// Stale NFS file handle
    NFSERR_STALE = 70,
    /// Write cache flushed
    NFSERR_WFLUSH = 99,
}

const NFSSTAT_NAMES: [(nfsstat, &str); 19] = [
    (nfsstat::NFS_OK, "NFS_OK"),
    (nfsstat::NFSERR_PERM, "NFSERR_PERM"),
    (nfsstat::NFSERR_NOENT, "NFSERR_NOENT"),
    (nfsstat::NFSERR_IO, "NFSERR_IO"),
    (nfsstat::NFSERR_NXIO, "NFSERR_NXIO"),
    (nfsstat::NFSERR_ACCES, "NFSERR_ACCES"),
    (nfsstat::NFSERR_EXIST, "NFSERR_EXIST"),
    (nfsstat::NFSERR_NODEV, "NFSERR_NODEV"),
    (nfsstat::NFSERR_NOTDIR, "NFSERR_NOTDIR"),
    (nfsstat::NFSERR_ISDIR, "NFSERR_ISDIR"),
    (nfsstat::NFSERR_INVAL, "NFSERR_INVAL"),
    (nfsstat::NFSERR_FBIG, "NFSERR_FBIG"),
    (nfsstat::NFSERR_NOSPC, "NFSERR_NOSPC"),
    (nfsstat::NFSERR_ROFS, "NFSERR_ROFS"),
    (nfsstat::NFSERR_NAMETOOLONG, "NFSERR_NAMETOOLONG"),
    (nfsstat::NFSERR_NOTEMPTY, "NFSERR_NOTEMPTY"),
    (nfsstat::NFSERR_DQUOT, "NFSERR_DQUOT"),
    (nfsstat::NFSERR_STALE, "NFSERR_STALE"),
    (nfsstat::NFSERR_WFLUSH, "NFSERR_WFLUSH"),
];

impl nfsstat {
    pub fn name(self) -> &'static str {
        NFSSTAT.variant_name(self).unwrap_or("NFSERR_IO")
    }

    /// Reads a status back out of a decoded enumeration value.
    pub fn from_value(value: &Value) -> Option<Self> {
        NFSSTAT.variant(value.as_enum()?)
    }

    /// The status as an enumeration value.
    pub fn to_value(self) -> Value {
        Value::enumeration(self.name())
    }

    /// A union result carrying only this (error) status.
    pub fn to_union(self) -> Value {
        Value::void_union(self.to_value())
    }
}

pub static NFSSTAT: LazyLock<Arc<Enumeration>> = LazyLock::new(|| {
    Arc::new(Enumeration::of(NFSSTAT_NAMES))
});

pub static FTYPE: LazyLock<Arc<Enumeration>> = LazyLock::new(|| {
    Arc::new(
        Enumeration::new()
            .name("NFNON", 0)
            .name("NFREG", 1)
            .name("NFDIR", 2)
            .name("NFBLK", 3)
            .name("NFCHR", 4)
            .name("NFLNK", 5)
            .name("NFSOCK", 6)
            .name("NFBAD", 7)
            .name("NFFIFO", 8),
    )
});

/// `fhandle`: the opaque file handle, wrapped in a struct as `{ data }`.
pub static NFS_FH: LazyLock<Type> =
    LazyLock::new(|| Structure::new().component("data", Type::FixedOpaque(FHSIZE)).into());

pub static FILENAME: LazyLock<Type> = LazyLock::new(|| Type::bounded_string(MAXNAMLEN));

pub static NFSPATH: LazyLock<Type> = LazyLock::new(|| Type::bounded_string(MAXPATHLEN));

static NFSTIME: LazyLock<Type> = LazyLock::new(|| {
    Structure::new().component("seconds", Type::UInt).component("useconds", Type::UInt).into()
});

pub static FATTR: LazyLock<Type> = LazyLock::new(|| {
    Structure::new()
        .component("type", FTYPE.clone())
        .component("mode", Type::UInt)
        .component("nlink", Type::UInt)
        .component("uid", Type::UInt)
        .component("gid", Type::UInt)
        .component("size", Type::UInt)
        .component("blocksize", Type::UInt)
        .component("rdev", Type::UInt)
        .component("blocks", Type::UInt)
        .component("fsid", Type::UInt)
        .component("fileid", Type::UInt)
        .component("atime", NFSTIME.clone())
        .component("mtime", NFSTIME.clone())
        .component("ctime", NFSTIME.clone())
        .into()
});

pub static SATTR: LazyLock<Type> = LazyLock::new(|| {
    Structure::new()
        .component("mode", Type::UInt)
        .component("uid", Type::UInt)
        .component("gid", Type::UInt)
        .component("size", Type::UInt)
        .component("atime", NFSTIME.clone())
        .component("mtime", NFSTIME.clone())
        .into()
});

pub static DIROPARGS: LazyLock<Type> = LazyLock::new(|| {
    Structure::new().component("dir", NFS_FH.clone()).component("name", FILENAME.clone()).into()
});

/// A union on `nfsstat` with one component on NFS_OK and void otherwise.
fn status_union(name: &str, ok: impl Into<Type>) -> Type {
    Union::new(NFSSTAT.clone())
        .arm("NFS_OK", Structure::new().component(name, ok))
        .default_arm(Structure::new())
        .into()
}

pub static ATTRSTAT: LazyLock<Type> = LazyLock::new(|| status_union("attributes", FATTR.clone()));

pub static DIROPRES: LazyLock<Type> = LazyLock::new(|| {
    let ok = Structure::new().component("file", NFS_FH.clone()).component("attributes", FATTR.clone());
    status_union("diropres", ok)
});

/// Directory entries, a linked list through `nextentry`.
pub static ENTRY: LazyLock<Arc<Structure>> = LazyLock::new(|| {
    Structure::recursive(|this| {
        Structure::new()
            .component("fileid", Type::UInt)
            .component("name", FILENAME.clone())
            .component("cookie", Type::UInt)
            .component("nextentry", Type::optional(this))
    })
});

pub static READDIRRES: LazyLock<Type> = LazyLock::new(|| {
    let dirlist = Structure::new()
        .component("entries", Type::optional(ENTRY.clone()))
        .component("eof", Type::Bool);
    // No default arm: an error status decodes as a bare discriminant.
    Union::new(NFSSTAT.clone()).arm("NFS_OK", Structure::new().component("reply", dirlist)).into()
});

/// A fresh copy of the NFS version 2 program, without handlers.
pub fn program() -> Program {
    let sattrargs = Structure::new().component("file", NFS_FH.clone()).component("attributes", SATTR.clone());
    let readlinkres = status_union("data", NFSPATH.clone());
    let readargs = Structure::new()
        .component("file", NFS_FH.clone())
        .component("offset", Type::UInt)
        .component("count", Type::UInt)
        .component("totalcount", Type::UInt);
    let readres = status_union(
        "reply",
        Structure::new()
            .component("attributes", FATTR.clone())
            .component("data", Type::bounded_opaque(MAXDATA)),
    );
    let writeargs = Structure::new()
        .component("file", NFS_FH.clone())
        .component("beginoffset", Type::UInt)
        .component("offset", Type::UInt)
        .component("totalcount", Type::UInt)
        .component("data", Type::bounded_opaque(MAXDATA));
    let createargs: Type =
        Structure::new().component("where", DIROPARGS.clone()).component("attributes", SATTR.clone()).into();
    let renameargs = Structure::new().component("from", DIROPARGS.clone()).component("to", DIROPARGS.clone());
    let linkargs = Structure::new().component("from", NFS_FH.clone()).component("to", DIROPARGS.clone());
    let symlinkargs = Structure::new()
        .component("from", DIROPARGS.clone())
        .component("to", NFSPATH.clone())
        .component("attributes", SATTR.clone());
    let readdirargs = Structure::new()
        .component("dir", NFS_FH.clone())
        .component("cookie", Type::UInt)
        .component("count", Type::UInt);
    let statfsres = status_union(
        "reply",
        Structure::new()
            .component("tsize", Type::UInt)
            .component("bsize", Type::UInt)
            .component("blocks", Type::UInt)
            .component("bfree", Type::UInt)
            .component("bavail", Type::UInt),
    );
    let stat: Type = NFSSTAT.clone().into();

    Program::new("NFS_PROGRAM", PROGRAM).version(
        Version::new(VERSION)
            .procedure(1, "GETATTR", NFS_FH.clone(), ATTRSTAT.clone())
            .procedure(2, "SETATTR", sattrargs, ATTRSTAT.clone())
            .procedure(3, "ROOT", Type::Void, Type::Void)
            .procedure(4, "LOOKUP", DIROPARGS.clone(), DIROPRES.clone())
            .procedure(5, "READLINK", NFS_FH.clone(), readlinkres)
            .procedure(6, "READ", readargs, readres)
            .procedure(7, "WRITECACHE", Type::Void, Type::Void)
            .procedure(8, "WRITE", writeargs, ATTRSTAT.clone())
            .procedure(9, "CREATE", createargs.clone(), DIROPRES.clone())
            .procedure(10, "REMOVE", DIROPARGS.clone(), stat.clone())
            .procedure(11, "RENAME", renameargs, stat.clone())
            .procedure(12, "LINK", linkargs, stat.clone())
            .procedure(13, "SYMLINK", symlinkargs, stat.clone())
            .procedure(14, "MKDIR", createargs, DIROPRES.clone())
            .procedure(15, "RMDIR", DIROPARGS.clone(), stat)
            .procedure(16, "READDIR", readdirargs, READDIRRES.clone())
            .procedure(17, "STATFS", NFS_FH.clone(), statfsres),
    )
}

/// Maps an OS-style error to the NFS status reporting it.
///
/// Anything without a dedicated status is reported as `NFSERR_IO`.
pub fn status_for_io_error(err: &io::Error) -> nfsstat {
    if let Some(errno) = err.raw_os_error() {
        return status_for_errno(errno);
    }
    match err.kind() {
        io::ErrorKind::PermissionDenied => nfsstat::NFSERR_ACCES,
        io::ErrorKind::NotFound => nfsstat::NFSERR_NOENT,
        io::ErrorKind::AlreadyExists => nfsstat::NFSERR_EXIST,
        io::ErrorKind::InvalidInput => nfsstat::NFSERR_INVAL,
        _ => nfsstat::NFSERR_IO,
    }
}

fn status_for_errno(errno: i32) -> nfsstat {
    match errno {
        libc::EPERM => nfsstat::NFSERR_PERM,
        libc::ENOENT => nfsstat::NFSERR_NOENT,
        libc::ENXIO => nfsstat::NFSERR_NXIO,
        libc::EACCES => nfsstat::NFSERR_ACCES,
        libc::EEXIST => nfsstat::NFSERR_EXIST,
        libc::ENODEV => nfsstat::NFSERR_NODEV,
        libc::ENOTDIR => nfsstat::NFSERR_NOTDIR,
        libc::EISDIR => nfsstat::NFSERR_ISDIR,
        libc::EINVAL => nfsstat::NFSERR_INVAL,
        libc::EFBIG => nfsstat::NFSERR_FBIG,
        libc::ENOSPC => nfsstat::NFSERR_NOSPC,
        libc::EROFS => nfsstat::NFSERR_ROFS,
        libc::ENAMETOOLONG => nfsstat::NFSERR_NAMETOOLONG,
        libc::ENOTEMPTY => nfsstat::NFSERR_NOTEMPTY,
        libc::EDQUOT => nfsstat::NFSERR_DQUOT,
        libc::ESTALE => nfsstat::NFSERR_STALE,
        _ => nfsstat::NFSERR_IO,
    }
}

/// Turns a handler's storage result into an NFS union result: the value
/// itself on success, the mapped status with a void arm on error.
pub fn recover(result: io::Result<Value>) -> Value {
    match result {
        Ok(value) => value,
        Err(err) => {
            tracing::debug!("recovering from storage error: {}", err);
            status_for_io_error(&err).to_union()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::xdr::DISCRIMINANT;

    #[test]
    fn status_names_follow_wire_values() {
        assert_eq!(nfsstat::NFSERR_STALE.name(), "NFSERR_STALE");
        assert_eq!(NFSSTAT.value_of("NFSERR_STALE"), Some(70));
        assert_eq!(nfsstat::from_value(&Value::enumeration("NFSERR_NOTEMPTY")), Some(nfsstat::NFSERR_NOTEMPTY));
        assert_eq!(nfsstat::from_value(&Value::UInt(66)), None);
    }

    #[test]
    fn os_errors_map_to_status() {
        let cases = [
            (libc::EPERM, nfsstat::NFSERR_PERM),
            (libc::ENOENT, nfsstat::NFSERR_NOENT),
            (libc::EIO, nfsstat::NFSERR_IO),
            (libc::EACCES, nfsstat::NFSERR_ACCES),
            (libc::ENOTEMPTY, nfsstat::NFSERR_NOTEMPTY),
            (libc::EDQUOT, nfsstat::NFSERR_DQUOT),
            (libc::ESTALE, nfsstat::NFSERR_STALE),
            (libc::EAGAIN, nfsstat::NFSERR_IO),
        ];
        for (errno, stat) in cases {
            assert_eq!(status_for_io_error(&io::Error::from_raw_os_error(errno)), stat, "errno {errno}");
        }
        assert_eq!(status_for_io_error(&io::Error::new(io::ErrorKind::NotFound, "gone")), nfsstat::NFSERR_NOENT);
        assert_eq!(status_for_io_error(&io::Error::other("boom")), nfsstat::NFSERR_IO);
    }

    #[test]
    fn recovered_error_encodes_as_status_only() {
        let value = recover(Err(io::Error::from_raw_os_error(libc::ENOENT)));
        assert_eq!(value.discriminant(), Some(&Value::enumeration("NFSERR_NOENT")));
        assert_eq!(ATTRSTAT.to_bytes(&value).unwrap(), [0, 0, 0, 2]);
    }

    #[test]
    fn readdir_walks_entry_chain() {
        let entry = |fileid: u32, name: &str, next: Value| {
            Value::some(Value::structure([
                ("fileid", Value::UInt(fileid)),
                ("name", Value::from(name)),
                ("cookie", Value::UInt(fileid)),
                ("nextentry", next),
            ]))
        };
        let entries = entry(1, ".", entry(2, "..", entry(3, "file", Value::none())));
        let reply = Value::union_of(
            nfsstat::NFS_OK.to_value(),
            [("reply", Value::structure([("entries", entries), ("eof", Value::Bool(true))]))],
        );
        let bytes = READDIRRES.to_bytes(&reply).unwrap();
        assert_eq!(READDIRRES.from_bytes(&bytes).unwrap(), reply);

        let failed = READDIRRES.from_bytes(&[0, 0, 0, 20]).unwrap();
        assert_eq!(failed.field(DISCRIMINANT), Some(&Value::enumeration("NFSERR_NOTDIR")));
    }

    #[test]
    fn program_declares_all_procedures() {
        let program = program();
        let version = program.get(VERSION).unwrap();
        assert_eq!(version.procedures().count(), 18);
        assert_eq!(version.lookup("READDIR").unwrap().number(), 16);
    }
}
