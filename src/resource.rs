//! Data types for parsing and building the resource section.
//! The resource section contains the resource directory and the resource data.
//! See <https://learn.microsoft.com/en-us/windows/win32/debug/pe-format#the-rsrc-section> for more information.
//!
//! Resources are organized in three levels: type, name and language.
//! The pipeline addresses a single leaf of that tree with a [`ResourceRecord`].

use std::{borrow::Borrow, cmp::Ordering, fmt, mem::size_of};

use debug_ignore::DebugIgnore;
use indexmap::IndexMap;
use log::{error, trace, warn};
use zerocopy::IntoBytes;

use crate::{constants::*, errors::*, types::*, util::*};


/// Resource types written by the post-processing pipeline.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum ResourceKind {
    GroupIcon,
    Icon,
    RawData,
    VersionInfo,
    Manifest,
    Other(u32),
}
impl ResourceKind {
    /// Returns the `RT_*` type id of the resource kind.
    pub const fn id(self) -> u32 {
        match self {
            ResourceKind::GroupIcon => RT_GROUP_ICON as u32,
            ResourceKind::Icon => RT_ICON as u32,
            ResourceKind::RawData => RT_RCDATA as u32,
            ResourceKind::VersionInfo => RT_VERSION as u32,
            ResourceKind::Manifest => RT_MANIFEST as u32,
            ResourceKind::Other(id) => id,
        }
    }

    /// Returns the type entry name of the resource kind in the root table.
    pub fn entry_name(self) -> ResourceEntryName { ResourceEntryName::ID(self.id()) }
}

/// Name of a resource inside its type table, either a numeric id or a string.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum ResourceName {
    Id(u16),
    Name(String),
}
impl ResourceName {
    pub fn entry_name(&self) -> ResourceEntryName {
        match self {
            ResourceName::Id(id) => ResourceEntryName::ID(*id as u32),
            ResourceName::Name(name) => ResourceEntryName::from_string(name),
        }
    }
}
impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceName::Id(id) => write!(f, "#{}", id),
            ResourceName::Name(name) => write!(f, "{:?}", name),
        }
    }
}
impl From<u16> for ResourceName {
    fn from(id: u16) -> Self { ResourceName::Id(id) }
}
impl From<&str> for ResourceName {
    fn from(name: &str) -> Self { ResourceName::Name(name.to_string()) }
}

/// A single typed, named and language tagged resource to be written into an executable.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ResourceRecord {
    pub kind:        ResourceKind,
    pub name:        ResourceName,
    pub language_id: LANGID,
    pub payload:     DebugIgnore<Vec<u8>>,
}
impl ResourceRecord {
    /// Create a language neutral resource record.
    pub fn new<N: Into<ResourceName>>(kind: ResourceKind, name: N, payload: Vec<u8>) -> Self {
        Self {
            kind,
            name: name.into(),
            language_id: LANGUAGE_ID_NEUTRAL,
            payload: payload.into(),
        }
    }

    pub fn with_language(mut self, language_id: LANGID) -> Self {
        self.language_id = language_id;
        self
    }
}

/// Leaf of the resource tree as seen through [`ResourceDirectory::records`].
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ResourceLeaf<'a> {
    pub name:     &'a ResourceEntryName,
    pub language: u32,
    pub data:     &'a [u8],
}


/// Portable executable resource directory.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct ResourceDirectory {
    pub(crate) virtual_address: u32,
    pub(crate) root:            ResourceTable,
}
impl ResourceDirectory {
    /// Parse the resource directory from the given image at the given base address.
    /// The virtual address is used to resolve the resource data offsets and has to correspond to the virtual address in the section table header of the source image.
    ///
    /// # Returns
    /// Returns an error if the resource directory at the given address is invalid.
    pub fn parse(
        image: &[u8], base_address: u32, virtual_address: u32,
    ) -> Result<Self, ImageReadError> {
        let root = ResourceTable::parse(image, base_address, virtual_address, 0, 0)?;
        Ok(Self {
            virtual_address,
            root,
        })
    }

    /// Returns the virtual address of the resource directory in the source image.
    pub fn virtual_address(&self) -> u32 { self.virtual_address }

    /// Returns the root resource table.
    /// The root resource table contains the type entries.
    pub fn root(&self) -> &ResourceTable { &self.root }

    /// Returns the mutable root resource table.
    pub fn root_mut(&mut self) -> &mut ResourceTable { &mut self.root }

    /// Returns the size of the resulting resource directory in bytes.
    pub fn size(&self) -> u64 { self.root.size() }

    /// Build the resource directory into raw bytes to be included in an image.
    /// The virtual address is used to compute the resource data offsets and has to correspond to the virtual address in the section table header of the target image.
    pub fn build(&self, virtual_address: u32) -> Vec<u8> { self.root.build(virtual_address) }

    /// Insert a resource record, replacing an existing resource with the same type, name and language.
    ///
    /// # Returns
    /// The replaced resource data, or an error if the tree contains data where a table is expected.
    pub fn insert_record(
        &mut self, record: ResourceRecord,
    ) -> Result<Option<ResourceData>, ResourceError> {
        let language = ResourceEntryName::ID(record.language_id as u32);
        let table = self
            .root
            .table_or_insert(record.kind.entry_name())?
            .table_or_insert(record.name.entry_name())?;
        let previous = table.insert(
            language,
            ResourceEntry::Data(ResourceData {
                data:     record.payload,
                codepage: 0,
                reserved: 0,
            }),
        );
        match previous {
            Some(ResourceEntry::Data(data)) => Ok(Some(data)),
            Some(ResourceEntry::Table(_)) => Err(ResourceError::InvalidTable(format!(
                "{:?} {} has a table at language level",
                record.kind, record.name
            ))),
            None => Ok(None),
        }
    }

    /// Returns the data of the resource with the given type, name and language.
    pub fn get_record(
        &self, kind: ResourceKind, name: &ResourceName, language_id: LANGID,
    ) -> Option<&[u8]> {
        self.root
            .get(kind.entry_name())?
            .as_table()?
            .get(name.entry_name())?
            .as_table()?
            .get(ResourceEntryName::ID(language_id as u32))?
            .as_data()
            .map(|data| data.data())
    }

    /// Returns all resources of the given type in table order.
    pub fn records(&self, kind: ResourceKind) -> Vec<ResourceLeaf<'_>> {
        let Some(ResourceEntry::Table(type_table)) = self.root.get(kind.entry_name()) else {
            return Vec::new();
        };
        let mut records = Vec::new();
        for (name, entry) in &type_table.entries {
            let ResourceEntry::Table(name_table) = entry else {
                warn!("{:?} resource {:?} is not a table, skipping", kind, name);
                continue;
            };
            for (language, entry) in &name_table.entries {
                if let (ResourceEntryName::ID(language), ResourceEntry::Data(data)) =
                    (language, entry)
                {
                    records.push(ResourceLeaf {
                        name,
                        language: *language,
                        data: data.data(),
                    });
                }
            }
        }
        records
    }

    /// Copy all resources of the given types from another resource directory.
    /// Existing resources with the same type, name and language are replaced, other resources are kept.
    ///
    /// # Returns
    /// The number of copied resources.
    pub fn copy_from(
        &mut self, source: &ResourceDirectory, kinds: &[ResourceKind],
    ) -> Result<usize, ResourceError> {
        let mut copied = 0;
        for &kind in kinds {
            let Some(ResourceEntry::Table(source_table)) = source.root.get(kind.entry_name())
            else {
                trace!("source has no {:?} resources", kind);
                continue;
            };
            for (name, entry) in &source_table.entries {
                let ResourceEntry::Table(source_languages) = entry else {
                    warn!("{:?} resource {:?} is not a table, skipping", kind, name);
                    continue;
                };
                let target = self.root.table_or_insert(kind.entry_name())?.table_or_insert(name.clone())?;
                for (language, entry) in &source_languages.entries {
                    if let ResourceEntry::Data(data) = entry {
                        target.insert(language.clone(), ResourceEntry::Data(data.clone()));
                        copied += 1;
                    }
                }
            }
        }
        Ok(copied)
    }

    /// Returns the data of the first resource of the given type, regardless of name and language.
    pub fn first_record(&self, kind: ResourceKind) -> Option<&[u8]> {
        self.records(kind).into_iter().next().map(|leaf| leaf.data)
    }

    /// Returns the first application manifest in the directory.
    pub fn manifest(&self) -> Option<&[u8]> { self.first_record(ResourceKind::Manifest) }
}

/// Portable executable resource table data.
enum TableData {
    Table(ResourceDirectoryTable),
    Entry(ResourceDirectoryEntry),
}

/// Portable executable resource table.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct ResourceTable {
    pub(crate) data:    ResourceDirectoryTable,
    pub(crate) entries: IndexMap<ResourceEntryName, ResourceEntry>,
}
impl ResourceTable {
    fn parse(
        image: &[u8], base_address: u32, virtual_address: u32, directory_offset: u32, level: usize,
    ) -> Result<Self, ImageReadError> {
        if level > 2 {
            return Err(ImageReadError::InvalidSection(format!(
                "resource table nested too deep at offset {:#x}",
                directory_offset
            )));
        }
        let table_offset = base_address as usize + directory_offset as usize;
        let resource_table = read_at::<ResourceDirectoryTable>(image, table_offset)?;
        trace!("{} {:#x?}", "--".repeat(level + 1), resource_table);

        let mut entries = IndexMap::new();

        let mut entry_offset = table_offset + size_of::<ResourceDirectoryTable>();
        for _ in 0..(resource_table.number_of_name_entries as u32
            + resource_table.number_of_id_entries as u32)
        {
            let entry = read_at::<ResourceDirectoryEntry>(image, entry_offset)?;
            trace!("{} {:#x?}", "--".repeat(level + 1), entry);
            entry_offset += size_of::<ResourceDirectoryEntry>();

            let name = ResourceEntryName::parse(image, base_address, entry.name_offset_or_integer_id)?;
            if entry.data_entry_or_subdirectory_offset & 0x80000000 != 0 {
                entries.insert(
                    name,
                    ResourceEntry::Table(ResourceTable::parse(
                        image,
                        base_address,
                        virtual_address,
                        entry.data_entry_or_subdirectory_offset ^ 0x80000000,
                        level + 1,
                    )?),
                );
                continue;
            }

            let data = read_at::<ResourceDataEntry>(
                image,
                base_address as usize + entry.data_entry_or_subdirectory_offset as usize,
            )?;
            // calculate as i64 and convert to u64 first to check for padding
            let address = base_address as i64 + data.data_rva as i64 - virtual_address as i64;
            let mut address = address as u64;
            if address & 0xffffffffff000000 == 0xffffffffff000000 {
                warn!(
                    "{} resource data entry address {:#x?} seems to be packed, ignoring padding",
                    "--".repeat(level + 1),
                    address
                );
                address ^= 0xffffffffff000000;
            }
            trace!("{} {:#x?} {:#x?}", "--".repeat(level + 1), address, data);
            let end = address + data.size as u64;
            if end > image.len() as u64 {
                error!(
                    "{} resource data entry address {:#x?} with size {:#x?} ({:#x?}) outside valid range ({:#x?})",
                    "--".repeat(level + 1),
                    address,
                    data.size,
                    end,
                    image.len()
                );
                continue;
            }
            entries.insert(
                name,
                ResourceEntry::Data(ResourceData {
                    codepage: data.codepage,
                    reserved: data.reserved,
                    data:     image[address as usize..end as usize].to_vec().into(),
                }),
            );
        }
        Ok(Self {
            data: resource_table,
            entries,
        })
    }

    fn build(&self, virtual_address: u32) -> Vec<u8> {
        let mut tables_offset = 0;
        let mut strings_offset = 0;
        let mut descriptions_offset = 0;
        let mut data_offset = 0;
        let (mut tables_data, strings_data, mut descriptions_data, data_data) = self.build_table(
            virtual_address,
            &mut tables_offset,
            &mut strings_offset,
            &mut descriptions_offset,
            &mut data_offset,
        );

        // data is placed after the descriptions, aligned to 4 bytes
        let strings_padding = aligned_to(tables_offset + strings_offset, 4) - (tables_offset + strings_offset);
        let data_base = tables_offset + strings_offset + strings_padding + descriptions_offset;

        let mut data = Vec::with_capacity(self.size() as usize);
        data.extend(tables_data.iter_mut().flat_map(|data| match data {
            TableData::Table(table) => table.as_bytes(),
            TableData::Entry(entry) => {
                if entry.data_entry_or_subdirectory_offset & 0x80000000 == 0 {
                    entry.data_entry_or_subdirectory_offset +=
                        tables_offset + strings_offset + strings_padding;
                }
                if entry.name_offset_or_integer_id & 0x80000000 != 0 {
                    entry.name_offset_or_integer_id += tables_offset;
                }
                entry.as_bytes()
            }
        }));
        data.extend(strings_data.iter());
        data.extend(std::iter::repeat(0).take(strings_padding as usize));
        data.extend(descriptions_data.iter_mut().flat_map(|description| {
            description.data_rva += data_base;
            description.as_bytes()
        }));
        data.extend(data_data);

        data
    }

    fn build_table(
        &self, virtual_address: u32, tables_offset: &mut u32, strings_offset: &mut u32,
        descriptions_offset: &mut u32, data_offset: &mut u32,
    ) -> (Vec<TableData>, Vec<u8>, Vec<ResourceDataEntry>, Vec<u8>) {
        let mut tables_data = Vec::<TableData>::new();
        let mut strings_data = Vec::<u8>::new();
        let mut descriptions_data = Vec::<ResourceDataEntry>::new();
        let mut data_data = Vec::<u8>::new();

        tables_data.push(TableData::Table(self.data));
        *tables_offset += 16;

        let mut next_table_offset = 0u32;
        let mut next_table_sizes = 0u32;
        for (name, entry) in &self.entries {
            strings_data.extend(name.string_data());
            let name_offset_or_integer_id = if name.string_size() > 0 {
                *strings_offset | 0x80000000
            } else {
                name.id()
            };
            *strings_offset += name.string_size();

            match entry {
                ResourceEntry::Table(table) => {
                    let entry_data = ResourceDirectoryEntry {
                        name_offset_or_integer_id,
                        data_entry_or_subdirectory_offset: (*tables_offset
                            + self.entries.len() as u32 * 8
                            + next_table_sizes)
                            | 0x80000000,
                    };
                    tables_data.push(TableData::Entry(entry_data));
                    next_table_offset += 8;
                    next_table_sizes += table.tables_size();
                }
                ResourceEntry::Data(data) => {
                    let entry_data = ResourceDirectoryEntry {
                        name_offset_or_integer_id,
                        data_entry_or_subdirectory_offset: *descriptions_offset,
                    };
                    tables_data.push(TableData::Entry(entry_data));
                    next_table_offset += 8;

                    data_data.extend(data.data.iter());
                    let padded = aligned_to(data.data.len() as u32, 4);
                    data_data.extend(std::iter::repeat(0).take((padded as usize) - data.data.len()));
                    let description_data = ResourceDataEntry {
                        data_rva: *data_offset + virtual_address,
                        size:     data.data.len() as u32,
                        codepage: data.codepage,
                        reserved: data.reserved,
                    };
                    descriptions_data.push(description_data);
                    *descriptions_offset += 16;
                    *data_offset += padded;
                }
            }
        }
        *tables_offset += next_table_offset;

        for entry in self.entries.values() {
            if let ResourceEntry::Table(table) = entry {
                let (t_tables_data, t_strings_data, t_descriptions_data, t_data_data) = table
                    .build_table(
                        virtual_address,
                        tables_offset,
                        strings_offset,
                        descriptions_offset,
                        data_offset,
                    );
                tables_data.extend(t_tables_data);
                strings_data.extend(t_strings_data);
                descriptions_data.extend(t_descriptions_data);
                data_data.extend(t_data_data);
            }
        }

        (tables_data, strings_data, descriptions_data, data_data)
    }

    /// Get a resource entry from the table.
    pub fn get<N: Borrow<ResourceEntryName>>(&self, name: N) -> Option<&ResourceEntry> {
        self.entries.get(name.borrow())
    }

    /// Get a mutable resource entry from the table.
    pub fn get_mut<N: Borrow<ResourceEntryName>>(&mut self, name: N) -> Option<&mut ResourceEntry> {
        self.entries.get_mut(name.borrow())
    }

    /// Insert a resource entry into the table.
    /// If an entry with the given name already exists, it will be replaced.
    /// Entries are kept in the order required by the loader: named entries first, then ids ascending.
    ///
    /// # Returns
    /// The replaced entry.
    pub fn insert<N: Borrow<ResourceEntryName>>(
        &mut self, name: N, entry: ResourceEntry,
    ) -> Option<ResourceEntry> {
        let name = name.borrow();
        let entry = self.entries.insert(name.clone(), entry);
        if entry.is_none() {
            if name.string_size() > 0 {
                self.data.number_of_name_entries += 1;
            } else {
                self.data.number_of_id_entries += 1;
            }
            self.entries.sort_by(|a, _, b, _| a.loader_order(b));
        }
        entry
    }

    /// Remove a resource entry from the table.
    ///
    /// # Returns
    /// The removed entry.
    pub fn remove<N: Borrow<ResourceEntryName>>(&mut self, name: N) -> Option<ResourceEntry> {
        let name = name.borrow();
        let entry = self.entries.shift_remove(name)?;
        if name.string_size() > 0 {
            self.data.number_of_name_entries -= 1;
        } else {
            self.data.number_of_id_entries -= 1;
        }
        Some(entry)
    }

    /// Returns the child table with the given name, inserting an empty one if it does not exist.
    pub fn table_or_insert(
        &mut self, name: ResourceEntryName,
    ) -> Result<&mut ResourceTable, ResourceError> {
        if !self.entries.contains_key(&name) {
            self.insert(&name, ResourceEntry::Table(ResourceTable::default()));
        }
        match self.entries.get_mut(&name) {
            Some(ResourceEntry::Table(table)) => Ok(table),
            _ => Err(ResourceError::InvalidTable(format!("entry {:?} is not a table", name))),
        }
    }

    /// Returns the entries in the table.
    pub fn entries(&self) -> Vec<&ResourceEntryName> { self.entries.keys().collect() }

    /// Returns the complete size of the table, its resources and its children in the resource table.
    pub fn size(&self) -> u64 {
        let header = self.tables_size() as u64 + self.strings_size() as u64;
        aligned_to(header, 4) + self.descriptions_size() as u64 + self.data_size()
    }

    /// Returns the size of the table and its children in the resource table.
    pub fn tables_size(&self) -> u32 {
        self.entries.values().map(|entry| entry.table_size()).sum::<u32>() + 16
    }

    /// Returns the size of the strings in the entry and its children in the resource table.
    pub fn strings_size(&self) -> u32 {
        self.entries
            .iter()
            .map(|(name, entry)| name.string_size() + entry.strings_size())
            .sum::<u32>()
    }

    /// Returns the size of the descriptions in the tables children in the resource table.
    pub fn descriptions_size(&self) -> u32 {
        self.entries.values().map(|entry| entry.description_size()).sum::<u32>()
    }

    /// Returns the size of the data in the tables children in the resource table, including alignment padding.
    pub fn data_size(&self) -> u64 { self.entries.values().map(|entry| entry.data_size()).sum::<u64>() }
}

/// Raw resource data.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct ResourceData {
    data:     DebugIgnore<Vec<u8>>,
    codepage: u32,
    reserved: u32,
}
impl ResourceData {
    /// Returns the raw data.
    pub fn data(&self) -> &[u8] { &self.data }

    /// Returns the codepage of the data.
    pub fn codepage(&self) -> u32 { self.codepage }
}

/// Resource entry in a resource table.
/// This can be either a child table or raw data.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ResourceEntry {
    Table(ResourceTable),
    Data(ResourceData),
}
impl ResourceEntry {
    pub fn as_table(&self) -> Option<&ResourceTable> {
        match self {
            ResourceEntry::Table(table) => Some(table),
            ResourceEntry::Data(_) => None,
        }
    }

    pub fn as_data(&self) -> Option<&ResourceData> {
        match self {
            ResourceEntry::Table(_) => None,
            ResourceEntry::Data(data) => Some(data),
        }
    }

    /// Returns the size of the table entry and its children in the resource table.
    pub fn table_size(&self) -> u32 {
        match self {
            // entry + sub-table
            ResourceEntry::Table(table) => table.tables_size() + 8,
            // entry
            ResourceEntry::Data(_) => 8,
        }
    }

    /// Returns the size of the resource names of child tables.
    pub fn strings_size(&self) -> u32 {
        match self {
            ResourceEntry::Table(table) => table.strings_size(),
            ResourceEntry::Data(_) => 0,
        }
    }

    /// Returns the size of the resource data descriptions of the entry or child entries.
    pub fn description_size(&self) -> u32 {
        match self {
            ResourceEntry::Table(table) => table.descriptions_size(),
            ResourceEntry::Data(_) => 16,
        }
    }

    /// Returns the size of the resource data of the entry or child entries.
    pub fn data_size(&self) -> u64 {
        match self {
            ResourceEntry::Table(table) => table.data_size(),
            ResourceEntry::Data(data) => aligned_to(data.data.len() as u64, 4),
        }
    }
}

/// Resource directory entry name.
/// This can either be a raw id or a name.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum ResourceEntryName {
    // raw id
    ID(u32),
    // 2 byte size + data
    Name(Vec<u8>),
}
impl ResourceEntryName {
    fn parse(image: &[u8], offset: u32, id: u32) -> Result<Self, ReadError> {
        if id & 0x80000000 == 0 {
            return Ok(Self::ID(id));
        }
        trace!("reading resource name {:#x?}", id);
        let address = offset as usize + (id ^ 0x80000000) as usize;
        let length = read_at::<u16>(image, address)? as usize;
        // size is in 16 bit characters so it needs to be doubled
        let data = image
            .get(address..address + 2 + length * 2)
            .ok_or_else(|| ReadError(format!("resource name at {:#x}", address)))?;
        trace!("resource name: {:x?}", data);
        Ok(Self::Name(data.to_vec()))
    }

    pub fn from_string<S: AsRef<str>>(string: S) -> Self {
        let units = string.as_ref().encode_utf16().collect::<Vec<_>>();
        let mut data = Vec::with_capacity(units.len() * 2 + 2);
        data.extend_from_slice(&(units.len() as u16).to_le_bytes());
        data.extend(units.iter().flat_map(|c| c.to_le_bytes()));
        Self::Name(data)
    }

    pub fn to_string(&self) -> Option<String> {
        match self {
            Self::ID(_) => None,
            Self::Name(data) => Some(String::from_utf16_lossy(&Self::name_units(data))),
        }
    }

    fn name_units(data: &[u8]) -> Vec<u16> {
        data.get(2..)
            .unwrap_or_default()
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect()
    }

    fn loader_order(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Name(a), Self::Name(b)) => Self::name_units(a).cmp(&Self::name_units(b)),
            (Self::Name(_), Self::ID(_)) => Ordering::Less,
            (Self::ID(_), Self::Name(_)) => Ordering::Greater,
            (Self::ID(a), Self::ID(b)) => a.cmp(b),
        }
    }

    fn string_size(&self) -> u32 {
        match self {
            Self::ID(_) => 0,
            Self::Name(name) => name.len() as u32,
        }
    }

    fn id(&self) -> u32 {
        match self {
            Self::ID(id) => *id,
            Self::Name(_) => 0,
        }
    }

    fn string_data(&self) -> &[u8] {
        match self {
            Self::ID(_) => &[],
            Self::Name(data) => data.as_slice(),
        }
    }
}
