use sunrpc::protocol::rpc::IPPROTO_TCP;
use sunrpc::protocol::schema::portmap::{mapping, MAPPING};
use sunrpc::protocol::schema::{mount, nfs2};
use sunrpc::xdr::{deserialize, Type, Value, XdrCodec, DISCRIMINANT};

fn entry(fileid: u32, name: &str, cookie: u32, next: Value) -> Value {
    Value::some(Value::structure([
        ("fileid", Value::UInt(fileid)),
        ("name", Value::from(name)),
        ("cookie", Value::UInt(cookie)),
        ("nextentry", next),
    ]))
}

#[test]
fn mapping_has_the_rfc_wire_layout() {
    let map = mapping { prog: 100003, vers: 2, prot: IPPROTO_TCP, port: 2049 };
    let mut wire = Vec::new();
    map.serialize(&mut wire).unwrap();
    assert_eq!(
        wire,
        [0, 1, 0x86, 0xa3, 0, 0, 0, 2, 0, 0, 0, 6, 0, 0, 0x08, 0x01]
    );
    assert_eq!(MAPPING.from_bytes(&wire).unwrap(), map.to_value());
    assert_eq!(deserialize::<mapping>(&mut &wire[..]).unwrap(), map);
}

#[test]
fn mapping_with_unknown_protocol_fails_to_decode() {
    let wire = [0, 0, 0, 1, 0, 0, 0, 1, 0, 0, 0, 99, 0, 0, 0, 1];
    assert!(deserialize::<mapping>(&mut &wire[..]).is_err());
}

#[test]
fn readdir_result_carries_an_entry_chain() {
    let entries = entry(1, ".", 1, entry(2, "..", 2, entry(7, "notes.txt", 3, Value::none())));
    let ok = Value::union_of(
        nfs2::nfsstat::NFS_OK.to_value(),
        [("reply", Value::structure([("entries", entries), ("eof", Value::Bool(true))]))],
    );

    let wire = nfs2::READDIRRES.to_bytes(&ok).unwrap();
    // status, list head, three entries (names padded to 4, 4 and 12), eof
    assert_eq!(wire.len(), 4 + 4 + 20 + 20 + 28 + 4);
    assert_eq!(nfs2::READDIRRES.from_bytes(&wire).unwrap(), ok);
}

#[test]
fn readdir_error_decodes_as_bare_status() {
    let wire = (nfs2::nfsstat::NFSERR_NOTDIR as i32).to_be_bytes();
    let value = nfs2::READDIRRES.from_bytes(&wire).unwrap();
    assert_eq!(value.discriminant(), Some(&Value::enumeration("NFSERR_NOTDIR")));
    assert_eq!(value.into_fields().unwrap().len(), 1);
}

#[test]
fn attrstat_error_has_void_arm() {
    let wire = nfs2::ATTRSTAT.to_bytes(&nfs2::nfsstat::NFSERR_STALE.to_union()).unwrap();
    assert_eq!(wire, 70i32.to_be_bytes());
}

#[test]
fn file_handle_is_fixed_size() {
    let fh = Value::structure([("data", Value::Bytes(vec![0xab; 3]))]);
    let wire = nfs2::NFS_FH.to_bytes(&fh).unwrap();
    assert_eq!(wire.len(), nfs2::FHSIZE);
    assert_eq!(&wire[..4], &[0xab, 0xab, 0xab, 0]);
}

#[test]
fn exports_nest_group_lists() {
    let groups = Value::some(Value::structure([
        ("gr_name", Value::from("admins")),
        ("gr_next", Value::some(Value::structure([("gr_name", Value::from("ops")), ("gr_next", Value::none())]))),
    ]));
    let exports = Value::some(Value::structure([
        ("ex_dir", Value::from("/srv")),
        ("ex_groups", groups),
        ("ex_next", Value::none()),
    ]));
    let wire = mount::EXPORTS.to_bytes(&exports).unwrap();
    assert_eq!(mount::EXPORTS.from_bytes(&wire).unwrap(), exports);
}

#[test]
fn padding_never_adds_a_whole_block() {
    for (len, encoded) in [(0, 4), (1, 8), (3, 8), (4, 8), (5, 12), (8, 12)] {
        let value = Value::String("x".repeat(len));
        assert_eq!(Type::string().to_bytes(&value).unwrap().len(), encoded, "length {len}");
    }
}

#[test]
fn truncated_input_is_an_error() {
    let wire = [0, 0, 0, 8, b'a', b'b'];
    assert!(Type::opaque().from_bytes(&wire).is_err());
    assert!(Type::UHyper.from_bytes(&[0, 0, 0]).is_err());
}

#[test]
fn union_discriminant_is_a_plain_field() {
    let value = nfs2::nfsstat::NFSERR_IO.to_union();
    assert_eq!(value.field(DISCRIMINANT), Some(&Value::enumeration("NFSERR_IO")));
}
