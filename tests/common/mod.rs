#![allow(dead_code)]

use std::{
    path::{Path, PathBuf},
    sync::Once,
};

use binpost::constants::*;

static INIT_LOGGER: Once = Once::new();
pub fn init_logger() {
    INIT_LOGGER.call_once(|| {
        env_logger::builder()
            .is_test(false)
            .filter_level(log::LevelFilter::Info)
            .format_timestamp(None)
            .format_module_path(false)
            .format_level(true)
            .format_target(false)
            .write_style(env_logger::WriteStyle::Auto)
            .init();
    });
}

fn put_u16(data: &mut [u8], offset: usize, value: u16) {
    data[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

fn put_u32(data: &mut [u8], offset: usize, value: u32) {
    data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

pub const PE_SECTION_ALIGNMENT: u32 = 0x1000;
pub const PE_FILE_ALIGNMENT: u32 = 0x200;

/// Minimal PE32+ image with a single `.text` section and no resources.
pub fn pe_image() -> Vec<u8> {
    let mut data = vec![0u8; 0x400];
    put_u16(&mut data, 0x00, PE_DOS_MAGIC);
    put_u32(&mut data, PE_PTR_OFFSET as usize, 0x40);
    put_u32(&mut data, 0x40, PE_NT_SIGNATURE);

    // coff header
    put_u16(&mut data, 0x44, 0x8664);
    put_u16(&mut data, 0x46, 1);
    put_u16(&mut data, 0x54, 240);
    put_u16(&mut data, 0x56, 0x22);

    // standard header
    put_u16(&mut data, 0x58, PE_64_MAGIC);
    put_u32(&mut data, 0x5c, 0x200);
    put_u32(&mut data, 0x68, 0x1000);
    put_u32(&mut data, 0x6c, 0x1000);

    // windows header
    data[0x70..0x78].copy_from_slice(&0x140000000u64.to_le_bytes());
    put_u32(&mut data, 0x78, PE_SECTION_ALIGNMENT);
    put_u32(&mut data, 0x7c, PE_FILE_ALIGNMENT);
    put_u16(&mut data, 0x80, 6);
    put_u16(&mut data, 0x88, 6);
    put_u32(&mut data, 0x90, 0x2000);
    put_u32(&mut data, 0x94, 0x200);
    put_u16(&mut data, 0x9c, 3);
    put_u32(&mut data, 0xc4, 16);

    // section table
    data[0x148..0x150].copy_from_slice(b".text\0\0\0");
    put_u32(&mut data, 0x150, 0x200);
    put_u32(&mut data, 0x154, 0x1000);
    put_u32(&mut data, 0x158, 0x200);
    put_u32(&mut data, 0x15c, 0x200);
    put_u32(&mut data, 0x16c, 0x60000020);

    // code
    for (index, byte) in data[0x200..0x400].iter_mut().enumerate() {
        *byte = (index % 251) as u8;
    }
    data
}

pub fn write_pe(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, pe_image()).unwrap();
    path
}

/// Deterministic image payload of the given size.
pub fn image_bytes(seed: u8, size: usize) -> Vec<u8> {
    (0..size).map(|index| seed.wrapping_add((index % 239) as u8)).collect()
}

/// ICO file with one image per `(width, size)` pair.
pub fn ico(images: &[(u8, usize)]) -> Vec<u8> {
    let mut data = Vec::new();
    data.extend(0u16.to_le_bytes());
    data.extend(1u16.to_le_bytes());
    data.extend((images.len() as u16).to_le_bytes());

    let mut offset = 6 + images.len() * 16;
    for &(width, size) in images {
        data.extend([width, width, 0, 0]);
        data.extend(1u16.to_le_bytes());
        data.extend(32u16.to_le_bytes());
        data.extend((size as u32).to_le_bytes());
        data.extend((offset as u32).to_le_bytes());
        offset += size;
    }
    for (index, &(_, size)) in images.iter().enumerate() {
        data.extend(image_bytes(index as u8, size));
    }
    data
}

pub fn write_ico(dir: &Path, name: &str, images: &[(u8, usize)]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, ico(images)).unwrap();
    path
}

pub const MACHO_HEADER_SIZE: usize = 32;
const MACHO_TEXT_SIZE: usize = 0x10;

fn aligned(value: usize, alignment: usize) -> usize { value.div_ceil(alignment) * alignment }

fn string_command(cmd: u32, fixed: &[u8], string: &str) -> Vec<u8> {
    let size = aligned(8 + fixed.len() + string.len() + 1, 8);
    let mut command = Vec::with_capacity(size);
    command.extend(cmd.to_le_bytes());
    command.extend((size as u32).to_le_bytes());
    command.extend_from_slice(fixed);
    command.extend(string.as_bytes());
    command.resize(size, 0);
    command
}

/// Load commands of a 64 bit Mach-O binary with a `__TEXT` segment, the given dylibs and run paths.
pub fn macho_commands(dylibs: &[&str], rpaths: &[&str], text_offset: usize) -> Vec<Vec<u8>> {
    let mut segment = Vec::new();
    segment.extend(LC_SEGMENT_64.to_le_bytes());
    segment.extend(152u32.to_le_bytes());
    segment.extend(*b"__TEXT\0\0\0\0\0\0\0\0\0\0");
    segment.extend(0x100000000u64.to_le_bytes());
    segment.extend(0x4000u64.to_le_bytes());
    segment.extend(0u64.to_le_bytes());
    segment.extend(((text_offset + MACHO_TEXT_SIZE) as u64).to_le_bytes());
    segment.extend(5u32.to_le_bytes());
    segment.extend(5u32.to_le_bytes());
    segment.extend(1u32.to_le_bytes());
    segment.extend(0u32.to_le_bytes());
    segment.extend(*b"__text\0\0\0\0\0\0\0\0\0\0");
    segment.extend(*b"__TEXT\0\0\0\0\0\0\0\0\0\0");
    segment.extend((0x100000000u64 + text_offset as u64).to_le_bytes());
    segment.extend((MACHO_TEXT_SIZE as u64).to_le_bytes());
    segment.extend((text_offset as u32).to_le_bytes());
    segment.extend(4u32.to_le_bytes());
    segment.extend([0u8; 8]);
    segment.extend(0x80000400u32.to_le_bytes());
    segment.extend([0u8; 12]);
    assert_eq!(segment.len(), 152);

    let mut commands = vec![segment];
    for dylib in dylibs {
        let mut fixed = Vec::new();
        fixed.extend(24u32.to_le_bytes());
        fixed.extend(2u32.to_le_bytes());
        fixed.extend(0x10000u32.to_le_bytes());
        fixed.extend(0x10000u32.to_le_bytes());
        commands.push(string_command(LC_LOAD_DYLIB, &fixed, dylib));
    }
    for rpath in rpaths {
        commands.push(string_command(LC_RPATH, &12u32.to_le_bytes(), rpath));
    }
    commands
}

/// Assemble a 64 bit Mach-O binary from load commands, with the text section at `text_offset`.
pub fn macho_from_commands(commands: &[Vec<u8>], text_offset: usize) -> Vec<u8> {
    let size_of_commands = commands.iter().map(Vec::len).sum::<usize>();
    let mut data = Vec::new();
    data.extend(MH_MAGIC_64.to_le_bytes());
    data.extend(0x01000007u32.to_le_bytes());
    data.extend(3u32.to_le_bytes());
    data.extend(2u32.to_le_bytes());
    data.extend((commands.len() as u32).to_le_bytes());
    data.extend((size_of_commands as u32).to_le_bytes());
    data.extend(0x00200085u32.to_le_bytes());
    data.extend(0u32.to_le_bytes());
    for command in commands {
        data.extend_from_slice(command);
    }
    assert!(data.len() <= text_offset, "load commands overlap the text section");
    data.resize(text_offset, 0);
    data.extend([0xc3u8; MACHO_TEXT_SIZE]);
    data
}

pub fn macho(dylibs: &[&str], rpaths: &[&str], text_offset: usize) -> Vec<u8> {
    macho_from_commands(&macho_commands(dylibs, rpaths, text_offset), text_offset)
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(data[offset..offset + 4].try_into().unwrap())
}

fn c_string(data: &[u8]) -> String {
    let end = data.iter().position(|&c| c == 0).unwrap_or(data.len());
    String::from_utf8_lossy(&data[..end]).into_owned()
}

/// `(cmd, cmdsize, string)` of every load command of a thin 64 bit binary. The string is empty for commands without one.
pub fn macho_load_commands(data: &[u8]) -> Vec<(u32, u32, String)> {
    let count = read_u32(data, 16);
    let mut offset = MACHO_HEADER_SIZE;
    let mut commands = Vec::new();
    for _ in 0..count {
        let cmd = read_u32(data, offset);
        let size = read_u32(data, offset + 4);
        let string = match cmd {
            LC_LOAD_DYLIB => c_string(&data[offset + read_u32(data, offset + 8) as usize..offset + size as usize]),
            LC_RPATH => c_string(&data[offset + read_u32(data, offset + 8) as usize..offset + size as usize]),
            _ => String::new(),
        };
        commands.push((cmd, size, string));
        offset += size as usize;
    }
    commands
}

/// Universal binary wrapping the given slices at 0x1000 aligned offsets.
pub fn fat(slices: &[Vec<u8>]) -> Vec<u8> {
    let mut data = Vec::new();
    data.extend(FAT_MAGIC.to_be_bytes());
    data.extend((slices.len() as u32).to_be_bytes());
    let mut offset = 0x1000usize;
    let mut placed = Vec::new();
    for slice in slices {
        data.extend(0x01000007u32.to_be_bytes());
        data.extend(3u32.to_be_bytes());
        data.extend((offset as u32).to_be_bytes());
        data.extend((slice.len() as u32).to_be_bytes());
        data.extend(12u32.to_be_bytes());
        placed.push(offset);
        offset = aligned(offset + slice.len(), 0x1000);
    }
    for (slice, offset) in slices.iter().zip(placed) {
        data.resize(offset, 0);
        data.extend_from_slice(slice);
    }
    data
}
