//! Version information resource.
//!
//! See <https://learn.microsoft.com/en-us/windows/win32/menurc/vs-versioninfo> for the layout.
//! Every block starts with a [`VersionHeader`] and a key, followed by an optional value and child blocks,
//! each aligned to 4 bytes.

use std::{mem::size_of, path::Path};

use indexmap::IndexMap;
use log::{debug, trace};
use zerocopy::{
    byteorder::little_endian::{U16, U32},
    IntoBytes,
};

use crate::{constants::*, errors::*, resource::*, types::*, util::*, writer::*};

const VALUE_TYPE_BINARY: u16 = 0;
const VALUE_TYPE_TEXT: u16 = 1;

/// Four part version number, most significant part first.
pub type VersionTuple = [u16; 4];

/// Contents of a version information resource.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct VersionInfoSpec {
    /// String table entries such as `CompanyName` or `FileDescription`, in insertion order.
    pub strings:         IndexMap<String, String>,
    pub product_version: Option<VersionTuple>,
    pub file_version:    Option<VersionTuple>,
    pub file_date:       (u32, u32),
    pub is_executable:   bool,
}

impl Default for VersionInfoSpec {
    fn default() -> Self {
        Self {
            strings:         IndexMap::new(),
            product_version: None,
            file_version:    None,
            file_date:       (0, 0),
            is_executable:   true,
        }
    }
}

impl VersionInfoSpec {
    /// Returns whether there is anything to embed.
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty() && self.product_version.is_none() && self.file_version.is_none()
    }

    /// Returns the string table with the dotted version strings added where missing.
    pub fn effective_strings(&self) -> IndexMap<String, String> {
        let mut strings = self.strings.clone();
        for (key, version) in [
            (VS_FILE_VERSION, self.file_version),
            (VS_PRODUCT_VERSION, self.product_version),
        ] {
            if let Some(version) = version {
                strings.entry(key.to_string()).or_insert_with(|| version_string(version));
            }
        }
        strings
    }
}

/// Format a version tuple as `a.b.c.d`.
pub fn version_string(version: VersionTuple) -> String {
    version.map(|part| part.to_string()).join(".")
}

fn version_dwords(version: Option<VersionTuple>) -> (u32, u32) {
    let [a, b, c, d] = version.unwrap_or_default();
    (((a as u32) << 16) | b as u32, ((c as u32) << 16) | d as u32)
}

/// Decoded version information resource.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct VersionInfo {
    pub fixed:       FixedFileInfo,
    pub strings:     IndexMap<String, String>,
    pub translation: Option<(LANGID, LANGID)>,
}

impl VersionInfo {
    /// Build the version information resource payload.
    ///
    /// Unset versions are written as zero.
    ///
    /// # Returns
    /// Returns an error if a block exceeds the 16 bit length field.
    pub fn build(spec: &VersionInfoSpec) -> Result<Vec<u8>, ResourceError> {
        let (file_version_ms, file_version_ls) = version_dwords(spec.file_version);
        let (product_version_ms, product_version_ls) = version_dwords(spec.product_version);
        let fixed = FixedFileInfo {
            signature: U32::new(VS_FIXEDFILEINFO_SIGNATURE),
            struct_version: U32::new(VS_FIXEDFILEINFO_VERSION),
            file_version_ms: U32::new(file_version_ms),
            file_version_ls: U32::new(file_version_ls),
            product_version_ms: U32::new(product_version_ms),
            product_version_ls: U32::new(product_version_ls),
            file_flags_mask: U32::new(VS_FF_FILEFLAGSMASK),
            file_flags: U32::new(0),
            file_os: U32::new(VOS_NT_WINDOWS32),
            file_type: U32::new(if spec.is_executable { VFT_APP } else { VFT_DLL }),
            file_subtype: U32::new(VFT2_UNKNOWN),
            file_date_ms: U32::new(spec.file_date.0),
            file_date_ls: U32::new(spec.file_date.1),
        };

        let strings = spec
            .effective_strings()
            .iter()
            .map(|(key, value)| {
                let value = string_to_u16(value);
                build_block(key, &value, (value.len() / 2) as u16, VALUE_TYPE_TEXT, &[])
            })
            .collect::<Result<Vec<_>, _>>()?;
        let table_key = format!("{:04X}{:04X}", LANGUAGE_ID_EN_US, CODE_PAGE_ID_EN_US);
        let string_table = build_block(&table_key, &[], 0, VALUE_TYPE_TEXT, &strings)?;
        let string_file_info =
            build_block(VS_STRING_FILE_INFO_KEY, &[], 0, VALUE_TYPE_TEXT, &[string_table])?;

        let mut translation = Vec::with_capacity(4);
        translation.extend_from_slice(&LANGUAGE_ID_EN_US.to_le_bytes());
        translation.extend_from_slice(&CODE_PAGE_ID_EN_US.to_le_bytes());
        let var = build_block(VS_TRANSLATION_KEY, &translation, 4, VALUE_TYPE_BINARY, &[])?;
        let var_file_info = build_block(VS_VAR_FILE_INFO_KEY, &[], 0, VALUE_TYPE_TEXT, &[var])?;

        let data = build_block(
            VS_VERSION_INFO_KEY,
            fixed.as_bytes(),
            size_of::<FixedFileInfo>() as u16,
            VALUE_TYPE_BINARY,
            &[string_file_info, var_file_info],
        )?;
        debug!("built version info resource ({} bytes)", data.len());
        Ok(data)
    }

    /// Parse a version information resource payload.
    pub fn parse(data: &[u8]) -> Result<Self, ResourceError> {
        let root = Block::parse(data, 0)?;
        if root.key != VS_VERSION_INFO_KEY {
            return Err(ResourceError::InvalidTable(format!(
                "unexpected version info key {:?}",
                root.key
            )));
        }
        let fixed = read::<FixedFileInfo>(root.value)?;

        let mut strings = IndexMap::new();
        let mut translation = None;
        for child in &root.children {
            match child.key.as_str() {
                VS_STRING_FILE_INFO_KEY => {
                    for string in child.children.iter().flat_map(|table| &table.children) {
                        strings.insert(string.key.clone(), read_u16_string(string.value));
                    }
                }
                VS_VAR_FILE_INFO_KEY => {
                    if let Some(var) = child.children.iter().find(|var| var.key == VS_TRANSLATION_KEY) {
                        let language = read::<U16>(var.value)?;
                        let codepage = read_at::<U16>(var.value, 2)?;
                        translation = Some((language.get(), codepage.get()));
                    }
                }
                key => trace!("skipping version info block {:?}", key),
            }
        }

        Ok(Self {
            fixed,
            strings,
            translation,
        })
    }

    /// Returns the file version from the fixed file info.
    pub fn file_version(&self) -> VersionTuple {
        split_version(self.fixed.file_version_ms.get(), self.fixed.file_version_ls.get())
    }

    /// Returns the product version from the fixed file info.
    pub fn product_version(&self) -> VersionTuple {
        split_version(self.fixed.product_version_ms.get(), self.fixed.product_version_ls.get())
    }
}

fn split_version(ms: u32, ls: u32) -> VersionTuple {
    [(ms >> 16) as u16, ms as u16, (ls >> 16) as u16, ls as u16]
}

fn build_block(
    key: &str, value: &[u8], value_length: u16, value_type: u16, children: &[Vec<u8>],
) -> Result<Vec<u8>, ResourceError> {
    let mut data = vec![0u8; size_of::<VersionHeader>()];
    data.extend(string_to_u16(key));
    data.resize(aligned_to(data.len(), 4), 0);
    data.extend_from_slice(value);
    for child in children {
        data.resize(aligned_to(data.len(), 4), 0);
        data.extend_from_slice(child);
    }

    let length = u16::try_from(data.len()).map_err(|_| ResourceError::BlockTooLarge(key.to_string()))?;
    let header = VersionHeader {
        length:       U16::new(length),
        value_length: U16::new(value_length),
        type_:        U16::new(value_type),
    };
    data[..size_of::<VersionHeader>()].copy_from_slice(header.as_bytes());
    Ok(data)
}

struct Block<'a> {
    length:   usize,
    key:      String,
    value:    &'a [u8],
    children: Vec<Block<'a>>,
}

impl<'a> Block<'a> {
    fn parse(data: &'a [u8], offset: usize) -> Result<Self, ResourceError> {
        let header = read_at::<VersionHeader>(data, offset)?;
        let end = offset + header.length.get() as usize;
        if (header.length.get() as usize) < size_of::<VersionHeader>() || end > data.len() {
            return Err(ResourceError::InvalidTable(format!(
                "version info block at {:#x} has invalid length {}",
                offset,
                header.length.get()
            )));
        }
        let block = &data[..end];

        let key_start = offset + size_of::<VersionHeader>();
        let key = read_u16_string(&block[key_start..]);
        let value_start = aligned_to(key_start + key.encode_utf16().count() * 2 + 2, 4).min(end);
        let value_size = match header.type_.get() {
            VALUE_TYPE_TEXT => header.value_length.get() as usize * 2,
            _ => header.value_length.get() as usize,
        };
        let value_end = (value_start + value_size).min(end);
        let value = &block[value_start..value_end];

        let mut children = Vec::new();
        let mut child_offset = aligned_to(value_end, 4);
        while child_offset + size_of::<VersionHeader>() <= end {
            let child = Block::parse(block, child_offset)?;
            child_offset = aligned_to(child_offset + child.length, 4);
            children.push(child);
        }

        Ok(Self {
            length: header.length.get() as usize,
            key,
            value,
            children,
        })
    }
}

/// Build a version information resource and add it to an executable file.
pub fn add_version_info_resource<P: AsRef<Path>>(
    path: P, spec: &VersionInfoSpec,
) -> Result<(), EmbedError> {
    let payload = VersionInfo::build(spec)?;
    add_resource_to_file(
        path,
        ResourceRecord::new(ResourceKind::VersionInfo, VERSION_INFO_ID, payload),
    )
}
