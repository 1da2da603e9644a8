use std::{
    any::type_name,
    fs,
    io::Write,
    ops::{Add, Rem, Sub},
    path::Path,
};

use zerocopy::FromBytes;

use crate::ReadError;

pub fn read<T: FromBytes>(data: &[u8]) -> Result<T, ReadError> {
    T::read_from_prefix(data)
        .map_err(|_| ReadError(type_name::<T>().to_string()))
        .map(|(value, _)| value)
}

pub fn read_at<T: FromBytes>(data: &[u8], offset: usize) -> Result<T, ReadError> {
    match data.get(offset..) {
        Some(data) => read::<T>(data),
        None => Err(ReadError(format!("{} at offset {:#x}", type_name::<T>(), offset))),
    }
}

pub fn aligned_to<T: Add<Output = T> + Sub<Output = T> + Rem<Output = T> + Eq + Copy + Default>(
    value: T, alignment: T,
) -> T {
    if value % alignment == T::default() {
        return value;
    }
    value + alignment - (value % alignment)
}

pub fn string_to_u16<S: AsRef<str>>(string: S) -> Vec<u8> {
    let string = string.as_ref();
    let mut data = Vec::with_capacity(string.len() * 2 + 2);
    data.extend(string.encode_utf16().flat_map(|c| c.to_le_bytes()));
    data.extend([0, 0]);
    data
}

pub fn read_u16_string(data: &[u8]) -> String {
    let units = data
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .take_while(|&c| c != 0)
        .collect::<Vec<_>>();
    String::from_utf16_lossy(&units)
}

/// Replace the contents of `path` without leaving a partially written file behind.
///
/// The data is written to a temporary file next to the target which then takes over the
/// permissions of the original and is renamed over it.
pub fn persist_atomically(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut file = tempfile::NamedTempFile::new_in(directory)?;
    file.write_all(data)?;
    file.as_file().sync_all()?;
    if let Ok(metadata) = fs::metadata(path) {
        fs::set_permissions(file.path(), metadata.permissions())?;
    }
    file.persist(path).map_err(|error| error.error)?;
    Ok(())
}
