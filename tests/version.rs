mod common;

use binpost::{constants::*, *};
use common::*;
use indexmap::IndexMap;

fn spec() -> VersionInfoSpec {
    let mut strings = IndexMap::new();
    strings.insert("CompanyName".to_string(), "Example Corp".to_string());
    strings.insert("FileDescription".to_string(), "Example application".to_string());
    VersionInfoSpec {
        strings,
        product_version: Some([1, 2, 3, 4]),
        file_version: Some([5, 6, 7, 8]),
        file_date: (0, 0),
        is_executable: true,
    }
}

#[test]
fn build_version_info() {
    init_logger();

    let data = VersionInfo::build(&spec()).unwrap();
    assert_eq!(
        u16::from_le_bytes([data[0], data[1]]) as usize,
        data.len(),
        "root block length covers the whole resource"
    );
    assert_eq!(u16::from_le_bytes([data[2], data[3]]), 52, "fixed file info value length");

    let info = VersionInfo::parse(&data).unwrap();
    assert_eq!(info.fixed.signature.get(), VS_FIXEDFILEINFO_SIGNATURE);
    assert_eq!(info.fixed.file_type.get(), VFT_APP);
    assert_eq!(info.fixed.file_os.get(), VOS_NT_WINDOWS32);
    assert_eq!(info.file_version(), [5, 6, 7, 8]);
    assert_eq!(info.product_version(), [1, 2, 3, 4]);
    assert_eq!(info.translation, Some((0x0409, 0x04b0)));

    let keys = info.strings.keys().map(String::as_str).collect::<Vec<_>>();
    assert_eq!(
        keys,
        vec!["CompanyName", "FileDescription", "FileVersion", "ProductVersion"],
        "string order preserved, version strings appended"
    );
    assert_eq!(info.strings["CompanyName"], "Example Corp");
    assert_eq!(info.strings["FileVersion"], "5.6.7.8");
    assert_eq!(info.strings["ProductVersion"], "1.2.3.4");
}

#[test]
fn keep_explicit_version_strings() {
    init_logger();

    let mut spec = spec();
    spec.strings.insert("FileVersion".to_string(), "5.6 beta".to_string());
    let info = VersionInfo::parse(&VersionInfo::build(&spec).unwrap()).unwrap();
    assert_eq!(info.strings["FileVersion"], "5.6 beta", "explicit string not overwritten");
    assert_eq!(info.file_version(), [5, 6, 7, 8]);
}

#[test]
fn unset_versions_are_zero() {
    init_logger();

    let spec = VersionInfoSpec {
        strings: IndexMap::from([("ProductName".to_string(), "Example".to_string())]),
        ..VersionInfoSpec::default()
    };
    assert!(!spec.is_empty());
    let info = VersionInfo::parse(&VersionInfo::build(&spec).unwrap()).unwrap();
    assert_eq!(info.file_version(), [0, 0, 0, 0]);
    assert_eq!(info.product_version(), [0, 0, 0, 0]);
    assert_eq!(info.strings.len(), 1, "no version strings without versions");

    assert!(VersionInfoSpec::default().is_empty());
}

#[test]
fn module_version_info() {
    init_logger();

    let spec = VersionInfoSpec {
        is_executable: false,
        file_date: (0x01d9, 0x12345678),
        ..spec()
    };
    let info = VersionInfo::parse(&VersionInfo::build(&spec).unwrap()).unwrap();
    assert_eq!(info.fixed.file_type.get(), VFT_DLL);
    assert_eq!(info.fixed.file_date_ms.get(), 0x01d9);
    assert_eq!(info.fixed.file_date_ls.get(), 0x12345678);
}

#[test]
fn oversized_string_table() {
    init_logger();

    let spec = VersionInfoSpec {
        strings: IndexMap::from([("Comments".to_string(), "x".repeat(40000))]),
        ..VersionInfoSpec::default()
    };
    assert!(matches!(VersionInfo::build(&spec), Err(ResourceError::BlockTooLarge(_))));
}

#[test]
fn reject_invalid_version_info() {
    init_logger();

    let mut data = VersionInfo::build(&spec()).unwrap();
    data.truncate(data.len() / 2);
    assert!(VersionInfo::parse(&data).is_err(), "truncated resource rejected");
    assert!(VersionInfo::parse(&[]).is_err());
}

#[test]
fn embed_version_info() {
    init_logger();

    let dir = tempfile::tempdir().unwrap();
    let path = write_pe(dir.path(), "app.exe");
    add_version_info_resource(&path, &spec()).unwrap();

    let resources = read_resources(&path).unwrap().unwrap();
    let payload = resources
        .get_record(ResourceKind::VersionInfo, &ResourceName::Id(VERSION_INFO_ID), 0)
        .unwrap();
    let info = VersionInfo::parse(payload).unwrap();
    assert_eq!(info.file_version(), [5, 6, 7, 8]);
}
