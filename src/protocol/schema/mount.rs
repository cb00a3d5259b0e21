//! The MOUNT protocol, version 1 (RFC 1094 Appendix A).
//!
//! MOUNT hands out the root file handle of an exported directory and keeps
//! track of which clients mounted what.

use std::sync::LazyLock;

use super::nfs2::{NFSSTAT, NFS_FH};
use crate::protocol::rpc::{Program, Version};
use crate::protocol::xdr::{Structure, Type, Union};

/// MOUNT program number for RPC
pub const PROGRAM: u32 = 100005;
/// MOUNT protocol version 1
pub const VERSION: u32 = 1;

/// Maximum bytes in a path name
pub const MNTPATHLEN: usize = 1024;
/// Maximum bytes in a name
pub const MNTNAMLEN: usize = 255;

pub static DIRPATH: LazyLock<Type> = LazyLock::new(|| Type::bounded_string(MNTPATHLEN));

pub static NAME: LazyLock<Type> = LazyLock::new(|| Type::bounded_string(MNTNAMLEN));

/// Status and, on success, the file handle of the mounted directory.
pub static FHSTATUS: LazyLock<Type> = LazyLock::new(|| {
    Union::new(NFSSTAT.clone())
        .arm("NFS_OK", Structure::new().component("fhs_fhandle", NFS_FH.clone()))
        .default_arm(Structure::new())
        .into()
});

/// Who has what mounted.
pub static MOUNTLIST: LazyLock<Type> = LazyLock::new(|| {
    let mountbody = Structure::recursive(|this| {
        Structure::new()
            .component("ml_hostname", NAME.clone())
            .component("ml_directory", DIRPATH.clone())
            .component("ml_next", Type::optional(this))
    });
    Type::optional(mountbody)
});

/// What is exported and to whom.
pub static EXPORTS: LazyLock<Type> = LazyLock::new(|| {
    let groupnode = Structure::recursive(|this| {
        Structure::new().component("gr_name", NAME.clone()).component("gr_next", Type::optional(this))
    });
    let exportnode = Structure::recursive(|this| {
        Structure::new()
            .component("ex_dir", DIRPATH.clone())
            .component("ex_groups", Type::optional(groupnode))
            .component("ex_next", Type::optional(this))
    });
    Type::optional(exportnode)
});

/// A fresh copy of the MOUNT program, without handlers.
pub fn program() -> Program {
    Program::new("MOUNTPROG", PROGRAM).version(
        Version::new(VERSION)
            .procedure(1, "MNT", DIRPATH.clone(), FHSTATUS.clone())
            .procedure(2, "DUMP", Type::Void, MOUNTLIST.clone())
            .procedure(3, "UMNT", DIRPATH.clone(), Type::Void)
            .procedure(4, "UMNTALL", Type::Void, Type::Void)
            .procedure(5, "EXPORT", Type::Void, EXPORTS.clone())
            .procedure(6, "EXPORTALL", Type::Void, EXPORTS.clone()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::xdr::Value;

    #[test]
    fn export_list_with_groups() {
        let groups = Value::some(Value::structure([("gr_name", Value::from("staff")), ("gr_next", Value::none())]));
        let exports = Value::some(Value::structure([
            ("ex_dir", Value::from("/srv")),
            ("ex_groups", groups),
            ("ex_next", Value::none()),
        ]));
        let bytes = EXPORTS.to_bytes(&exports).unwrap();
        assert_eq!(EXPORTS.from_bytes(&bytes).unwrap(), exports);
    }

    #[test]
    fn mnt_success_carries_handle() {
        let fh = Value::structure([("data", Value::Bytes(vec![7; 32]))]);
        let status = Value::union_of(Value::enumeration("NFS_OK"), [("fhs_fhandle", fh)]);
        assert_eq!(FHSTATUS.to_bytes(&status).unwrap().len(), 4 + 32);
    }
}
