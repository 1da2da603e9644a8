mod common;

use binpost::{constants::*, *};
use common::*;

const SYSTEM: &str = "/usr/lib/libSystem.B.dylib";
const PYTHON: &str = "@rpath/libpython3.11.dylib";
const PYTHON_INSTALLED: &str = "/opt/python/lib/libpython3.11.dylib";
const PYTHON_LIB_DIR: &str = "/opt/python/lib";

#[test]
fn rewrite_load_path() {
    init_logger();

    let original = macho(&[SYSTEM, PYTHON], &[], 0x1000);
    let mut data = original.clone();
    let mapping = LoadPathMapping::new()
        .map(PYTHON, PYTHON_INSTALLED)
        .with_run_path(PYTHON_LIB_DIR);
    let report = patch_bytes(&mut data, &mapping).unwrap();

    assert!(report.changed());
    assert_eq!(report.slices, 1);
    assert_eq!(report.rewritten, vec![(PYTHON.to_string(), PYTHON_INSTALLED.to_string())]);
    assert!(report.skipped.is_empty());
    assert!(report.run_path_added);
    assert!(!report.code_signed);

    assert_eq!(data.len(), original.len(), "file size unchanged");
    assert_eq!(&data[0x1000..], &original[0x1000..], "section contents unchanged");
    assert_eq!(
        macho_load_commands(&data),
        vec![
            (LC_SEGMENT_64, 152, String::new()),
            (LC_LOAD_DYLIB, 56, SYSTEM.to_string()),
            (LC_LOAD_DYLIB, 64, PYTHON_INSTALLED.to_string()),
            (LC_RPATH, 32, PYTHON_LIB_DIR.to_string()),
        ]
    );
    let size_of_commands = u32::from_le_bytes(data[20..24].try_into().unwrap());
    assert_eq!(size_of_commands, 152 + 56 + 64 + 32);
}

#[test]
fn keep_command_size_for_shorter_path() {
    init_logger();

    let mut data = macho(&[PYTHON], &[], 0x1000);
    let mapping = LoadPathMapping::new().map(PYTHON, "/lib/libpy.dylib");
    let report = patch_bytes(&mut data, &mapping).unwrap();
    assert_eq!(report.rewritten.len(), 1);
    assert!(!report.run_path_added);
    assert_eq!(
        macho_load_commands(&data)[1],
        (LC_LOAD_DYLIB, 56, "/lib/libpy.dylib".to_string()),
        "shorter path keeps the command size"
    );
}

#[test]
fn skip_unmatched_paths() {
    init_logger();

    let original = macho(&[SYSTEM, PYTHON], &[], 0x1000);
    let mut data = original.clone();
    let mapping = LoadPathMapping::new().map("libpython3.11.dylib", PYTHON_INSTALLED);
    let report = patch_bytes(&mut data, &mapping).unwrap();
    assert!(!report.changed());
    assert_eq!(report.skipped, vec!["libpython3.11.dylib".to_string()], "only exact matches rewritten");
    assert_eq!(data, original, "binary untouched");

    let report = patch_bytes(&mut data, &LoadPathMapping::new()).unwrap();
    assert_eq!(report, PatchReport { slices: 1, ..PatchReport::default() });
    assert_eq!(data, original);
}

#[test]
fn existing_run_path() {
    init_logger();

    let original = macho(&[PYTHON], &[PYTHON_LIB_DIR], 0x1000);
    let mut data = original.clone();
    let mapping = LoadPathMapping::new().with_run_path(PYTHON_LIB_DIR);
    let report = patch_bytes(&mut data, &mapping).unwrap();
    assert!(!report.run_path_added, "identical run path not added twice");
    assert_eq!(data, original);

    let mapping = LoadPathMapping::new().with_run_path("/other/lib");
    let report = patch_bytes(&mut data, &mapping).unwrap();
    assert!(report.run_path_added);
    let run_paths = macho_load_commands(&data)
        .into_iter()
        .filter(|(cmd, _, _)| *cmd == LC_RPATH)
        .map(|(_, _, path)| path)
        .collect::<Vec<_>>();
    assert_eq!(run_paths, vec![PYTHON_LIB_DIR.to_string(), "/other/lib".to_string()]);
}

#[test]
fn insufficient_header_space() {
    init_logger();

    let size_of_commands = macho_commands(&[PYTHON], &[], 0).iter().map(Vec::len).sum::<usize>();
    let text_offset = MACHO_HEADER_SIZE + size_of_commands;
    let original = macho(&[PYTHON], &[], text_offset);
    let mut data = original.clone();

    let mapping = LoadPathMapping::new().with_run_path(PYTHON_LIB_DIR);
    let result = patch_bytes(&mut data, &mapping);
    assert!(matches!(
        result,
        Err(MachOError::InsufficientHeaderSpace { required, available })
            if required == size_of_commands as u64 + 32 && available == size_of_commands as u64
    ));
    assert_eq!(data, original, "binary untouched on error");

    let mapping = LoadPathMapping::new().map(PYTHON, "/lib/libpy.dylib");
    assert!(patch_bytes(&mut data, &mapping).is_ok(), "rewrite in place needs no extra space");
}

#[test]
fn patch_universal_binary() {
    init_logger();

    let slice = macho(&[SYSTEM, PYTHON], &[], 0x1000);
    let mut data = fat(&[slice.clone(), slice.clone()]);
    let mapping = LoadPathMapping::new()
        .map(PYTHON, PYTHON_INSTALLED)
        .map("@rpath/libmissing.dylib", "/lib/libmissing.dylib")
        .with_run_path(PYTHON_LIB_DIR);
    let report = patch_bytes(&mut data, &mapping).unwrap();

    assert_eq!(report.slices, 2);
    assert_eq!(report.rewritten.len(), 2, "rewritten once per slice");
    assert_eq!(report.skipped, vec!["@rpath/libmissing.dylib".to_string()], "skipped paths reported once");
    assert!(report.run_path_added);

    for offset in [0x1000, 0x3000] {
        let commands = macho_load_commands(&data[offset..offset + slice.len()]);
        assert_eq!(commands[2].2, PYTHON_INSTALLED);
        assert_eq!(commands[3], (LC_RPATH, 32, PYTHON_LIB_DIR.to_string()));
    }
}

#[test]
fn reject_unsupported_binaries() {
    init_logger();

    let mut data = macho(&[PYTHON], &[], 0x1000);
    data[..4].copy_from_slice(&MH_CIGAM_64.to_le_bytes());
    assert!(matches!(
        patch_bytes(&mut data, &LoadPathMapping::new()),
        Err(MachOError::UnsupportedByteOrder)
    ));

    let mut data = pe_image();
    assert!(matches!(
        patch_bytes(&mut data, &LoadPathMapping::new()),
        Err(MachOError::InvalidMagic(_))
    ));

    let mut data = macho(&[PYTHON], &[], 0x1000);
    data[20..24].copy_from_slice(&0x10000u32.to_le_bytes());
    assert!(patch_bytes(&mut data, &LoadPathMapping::new()).is_err(), "command table outside binary");
}

#[test]
fn report_code_signature() {
    init_logger();

    let mut commands = macho_commands(&[PYTHON], &[], 0x1000);
    let mut signature = Vec::new();
    signature.extend(LC_CODE_SIGNATURE.to_le_bytes());
    signature.extend(16u32.to_le_bytes());
    signature.extend(0x1000u32.to_le_bytes());
    signature.extend(0x10u32.to_le_bytes());
    commands.push(signature);
    let mut data = macho_from_commands(&commands, 0x1000);

    let report = patch_bytes(&mut data, &LoadPathMapping::new().map(PYTHON, PYTHON_INSTALLED)).unwrap();
    assert!(report.code_signed);
    assert!(report.changed());
}

#[test]
fn patch_file_in_place() {
    init_logger();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app");
    let original = macho(&[PYTHON], &[], 0x1000);
    std::fs::write(&path, &original).unwrap();

    let report = patch_file(&path, &LoadPathMapping::new().map("@rpath/libnone.dylib", "/x")).unwrap();
    assert!(!report.changed());
    assert_eq!(std::fs::read(&path).unwrap(), original);

    let report = patch_file(&path, &LoadPathMapping::new().map(PYTHON, PYTHON_INSTALLED)).unwrap();
    assert!(report.changed());
    let data = std::fs::read(&path).unwrap();
    assert_eq!(data.len(), original.len());
    assert_eq!(macho_load_commands(&data)[1].2, PYTHON_INSTALLED);

    assert!(matches!(
        patch_file(dir.path().join("missing"), &LoadPathMapping::new()),
        Err(MachOError::IOError(_))
    ));
}
