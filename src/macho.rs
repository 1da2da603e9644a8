//! Mach-O load path rewriting.
//!
//! Rewrites the install names of dependent libraries and adds run paths, working directly on the
//! load command table. Commands that grow are accommodated in the padding between the load commands
//! and the first section, the file size never changes.
//!
//! See <https://github.com/apple-oss-distributions/xnu/blob/main/EXTERNAL_HEADERS/mach-o/loader.h> for the format.

use std::{mem::size_of, path::Path};

use log::{debug, info, trace, warn};
use zerocopy::{byteorder::little_endian::U32, Immutable, IntoBytes};

use crate::{constants::*, errors::*, types::*, util::*};

// section types without file contents
const S_ZEROFILL: u32 = 0x1;
const S_GB_ZEROFILL: u32 = 0xc;
const S_THREAD_LOCAL_ZEROFILL: u32 = 0x12;
const SECTION_TYPE: u32 = 0xff;

/// Dependent library paths to replace and the run path to add.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct LoadPathMapping {
    /// `(old, new)` install name pairs. Only exact matches are replaced.
    pub paths:    Vec<(String, String)>,
    pub run_path: Option<String>,
}

impl LoadPathMapping {
    pub fn new() -> Self { Self::default() }

    pub fn map<O: Into<String>, N: Into<String>>(mut self, old: O, new: N) -> Self {
        self.paths.push((old.into(), new.into()));
        self
    }

    pub fn with_run_path<S: Into<String>>(mut self, run_path: S) -> Self {
        self.run_path = Some(run_path.into());
        self
    }
}

/// Outcome of patching a binary.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct PatchReport {
    /// Number of architecture slices patched.
    pub slices:         usize,
    /// Replaced `(old, new)` install names, once per slice.
    pub rewritten:      Vec<(String, String)>,
    /// Old paths of the mapping that were not found.
    pub skipped:        Vec<String>,
    /// Whether a run path command was added.
    pub run_path_added: bool,
    /// Whether the binary carries a code signature that is now invalid.
    pub code_signed:    bool,
}

impl PatchReport {
    /// Returns whether the binary was modified.
    pub fn changed(&self) -> bool { !self.rewritten.is_empty() || self.run_path_added }

    fn merge(&mut self, other: PatchReport) {
        self.slices += other.slices;
        self.rewritten.extend(other.rewritten);
        for skipped in other.skipped {
            if !self.skipped.contains(&skipped) {
                self.skipped.push(skipped);
            }
        }
        self.run_path_added |= other.run_path_added;
        self.code_signed |= other.code_signed;
    }
}

/// Patch the load paths of a Mach-O file, replacing it atomically if anything changed.
pub fn patch_file<P: AsRef<Path>>(path: P, mapping: &LoadPathMapping) -> Result<PatchReport, MachOError> {
    let path = path.as_ref();
    let mut data = std::fs::read(path)?;
    let report = patch_bytes(&mut data, mapping)?;
    for old in &report.skipped {
        warn!("load path '{}' not found in '{}', skipping", old, path.display());
    }
    if report.code_signed && report.changed() {
        warn!(
            "'{}' is code signed, the signature is invalid after patching and has to be renewed",
            path.display()
        );
    }
    if report.changed() {
        persist_atomically(path, &data)?;
        info!(
            "patched load paths of '{}' ({} rewritten)",
            path.display(),
            report.rewritten.len()
        );
    } else {
        debug!("no load path changes for '{}'", path.display());
    }
    Ok(report)
}

/// Patch the load paths of a thin or universal Mach-O binary in memory.
///
/// # Returns
/// Returns a report of the changes, or an error if the binary cannot be parsed or the changed load commands do not fit in the header.
pub fn patch_bytes(data: &mut [u8], mapping: &LoadPathMapping) -> Result<PatchReport, MachOError> {
    let fat = read::<FatHeader>(data)?;
    if fat.magic.get() != FAT_MAGIC {
        return patch_thin(data, mapping);
    }

    let mut report = PatchReport::default();
    let count = fat.nfat_arch.get() as usize;
    debug!("universal binary with {} architectures", count);
    for index in 0..count {
        let arch = read_at::<FatArch>(data, size_of::<FatHeader>() + index * size_of::<FatArch>())?;
        let start = arch.offset.get() as usize;
        let end = start + arch.size.get() as usize;
        let len = data.len();
        let slice = data.get_mut(start..end).ok_or_else(|| {
            MachOError::InvalidBytes(ReadError(format!(
                "architecture {} at {:#x}..{:#x} outside of binary ({:#x})",
                index, start, end, len
            )))
        })?;
        trace!("patching architecture {} ({:#x}) at {:#x}", index, arch.cputype.get(), start);
        report.merge(patch_thin(slice, mapping)?);
    }
    Ok(report)
}

fn patch_thin(data: &mut [u8], mapping: &LoadPathMapping) -> Result<PatchReport, MachOError> {
    let header = read::<MachHeader>(data)?;
    let (header_size, alignment) = match header.magic.get() {
        MH_MAGIC => (size_of::<MachHeader>(), 4),
        MH_MAGIC_64 => (size_of::<MachHeader>() + 4, 8),
        MH_CIGAM | MH_CIGAM_64 => return Err(MachOError::UnsupportedByteOrder),
        magic => return Err(MachOError::InvalidMagic(magic)),
    };

    let commands_size = header.sizeofcmds.get() as usize;
    let commands = read_commands(data, header_size, header.ncmds.get(), commands_size)?;
    let first_data_offset = first_data_offset(&commands)?.unwrap_or(data.len() as u64);
    debug!(
        "{} load commands ({:#x} bytes), first data at {:#x}",
        commands.len(),
        commands_size,
        first_data_offset
    );

    let mut report = PatchReport {
        slices: 1,
        ..PatchReport::default()
    };
    let mut matched = vec![false; mapping.paths.len()];
    let mut has_run_path = false;
    let mut rebuilt = Vec::with_capacity(commands.len() + 1);

    for (index, command) in commands.iter().enumerate() {
        let kind = read::<LoadCommand>(command)?.cmd.get();
        if kind == LC_CODE_SIGNATURE {
            report.code_signed = true;
        }
        if kind == LC_RPATH {
            let rpath = read::<RpathCommand>(command)?;
            let path = command_string(command, rpath.path_offset.get(), index as u32)?;
            has_run_path |= mapping.run_path.as_deref() == Some(path.as_str());
        }
        if !DYLIB_LOAD_COMMANDS.contains(&kind) {
            rebuilt.push(command.clone());
            continue;
        }

        let dylib = read::<DylibCommand>(command)?;
        let name = command_string(command, dylib.name_offset.get(), index as u32)?;
        let replacement = mapping.paths.iter().position(|(old, _)| *old == name);
        let Some(position) = replacement else {
            rebuilt.push(command.clone());
            continue;
        };
        matched[position] = true;
        let new = &mapping.paths[position].1;
        debug!("rewriting load path '{}' to '{}'", name, new);
        let dylib = DylibCommand {
            name_offset: U32::new(size_of::<DylibCommand>() as u32),
            ..dylib
        };
        rebuilt.push(string_command(dylib, new, command.len(), alignment));
        report.rewritten.push((name, new.clone()));
    }

    for (position, (old, _)) in mapping.paths.iter().enumerate() {
        if !matched[position] {
            report.skipped.push(old.clone());
        }
    }

    if let Some(run_path) = &mapping.run_path {
        if has_run_path {
            debug!("run path '{}' already present", run_path);
        } else {
            debug!("adding run path '{}'", run_path);
            let rpath = RpathCommand {
                cmd:         U32::new(LC_RPATH),
                cmdsize:     U32::new(0),
                path_offset: U32::new(size_of::<RpathCommand>() as u32),
            };
            rebuilt.push(string_command(rpath, run_path, 0, alignment));
            report.run_path_added = true;
        }
    }

    if !report.changed() {
        return Ok(report);
    }

    let new_size = rebuilt.iter().map(Vec::len).sum::<usize>();
    let available = first_data_offset.saturating_sub(header_size as u64);
    if new_size as u64 > available {
        return Err(MachOError::InsufficientHeaderSpace {
            required: new_size as u64,
            available,
        });
    }

    let mut table = rebuilt.concat();
    table.resize(new_size.max(commands_size), 0);
    data[header_size..header_size + table.len()].copy_from_slice(&table);

    let header = MachHeader {
        ncmds: U32::new(rebuilt.len() as u32),
        sizeofcmds: U32::new(new_size as u32),
        ..header
    };
    data[..size_of::<MachHeader>()].copy_from_slice(header.as_bytes());
    Ok(report)
}

fn read_commands(
    data: &[u8], header_size: usize, count: u32, commands_size: usize,
) -> Result<Vec<Vec<u8>>, MachOError> {
    let end = header_size + commands_size;
    if end > data.len() {
        return Err(MachOError::InvalidBytes(ReadError(format!(
            "load commands end at {:#x} outside of binary ({:#x})",
            end,
            data.len()
        ))));
    }
    let mut commands = Vec::with_capacity(count as usize);
    let mut offset = header_size;
    for index in 0..count {
        let command = read_at::<LoadCommand>(data, offset)?;
        let size = command.cmdsize.get() as usize;
        if size < size_of::<LoadCommand>() || offset + size > end {
            return Err(MachOError::InvalidLoadCommand {
                index,
                reason: format!("invalid size {:#x} at offset {:#x}", size, offset),
            });
        }
        trace!("load command {} at {:#x}: {:#x} ({:#x} bytes)", index, offset, command.cmd.get(), size);
        commands.push(data[offset..offset + size].to_vec());
        offset += size;
    }
    Ok(commands)
}

/// Returns the lowest file offset of segment or section contents.
fn first_data_offset(commands: &[Vec<u8>]) -> Result<Option<u64>, MachOError> {
    let mut first = None::<u64>;
    let mut consider = |offset: u64| {
        if offset > 0 {
            first = Some(first.map_or(offset, |first| first.min(offset)));
        }
    };
    for command in commands {
        match read::<LoadCommand>(command)?.cmd.get() {
            LC_SEGMENT => {
                let segment = read::<SegmentCommand32>(command)?;
                if segment.filesize.get() > 0 {
                    consider(segment.fileoff.get() as u64);
                }
                for index in 0..segment.nsects.get() as usize {
                    let section = read_at::<Section32>(
                        command,
                        size_of::<SegmentCommand32>() + index * size_of::<Section32>(),
                    )?;
                    if section.size.get() > 0 && !is_zerofill(section.flags.get()) {
                        consider(section.offset.get() as u64);
                    }
                }
            }
            LC_SEGMENT_64 => {
                let segment = read::<SegmentCommand64>(command)?;
                if segment.filesize.get() > 0 {
                    consider(segment.fileoff.get());
                }
                for index in 0..segment.nsects.get() as usize {
                    let section = read_at::<Section64>(
                        command,
                        size_of::<SegmentCommand64>() + index * size_of::<Section64>(),
                    )?;
                    if section.size.get() > 0 && !is_zerofill(section.flags.get()) {
                        consider(section.offset.get() as u64);
                    }
                }
            }
            _ => {}
        }
    }
    Ok(first)
}

fn is_zerofill(flags: u32) -> bool {
    matches!(flags & SECTION_TYPE, S_ZEROFILL | S_GB_ZEROFILL | S_THREAD_LOCAL_ZEROFILL)
}

fn command_string(command: &[u8], offset: u32, index: u32) -> Result<String, MachOError> {
    let bytes = command.get(offset as usize..).ok_or_else(|| MachOError::InvalidLoadCommand {
        index,
        reason: format!("string offset {:#x} outside of command", offset),
    })?;
    let bytes = &bytes[..bytes.iter().position(|&c| c == 0).unwrap_or(bytes.len())];
    Ok(String::from_utf8_lossy(bytes).into_owned())
}

/// Build a command consisting of a fixed part and a trailing string.
/// The original size is kept if the string fits, otherwise the command grows to the next alignment boundary.
fn string_command<T: IntoBytes + Immutable>(
    fixed: T, string: &str, original_size: usize, alignment: usize,
) -> Vec<u8> {
    let required = aligned_to(size_of::<T>() + string.len() + 1, alignment);
    let size = if required <= original_size { original_size } else { required };

    let mut command = fixed.as_bytes().to_vec();
    command.extend_from_slice(string.as_bytes());
    command.resize(size, 0);
    // cmdsize is the second field of every load command
    command[4..8].copy_from_slice(&(size as u32).to_le_bytes());
    command
}
