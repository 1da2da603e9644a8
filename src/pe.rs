//! Portable executable image representation.
//!
//! See <https://learn.microsoft.com/en-us/windows/win32/debug/pe-format> for more information.

use std::{borrow::Cow, mem::size_of, path::Path};

use ahash::RandomState;
use indexmap::IndexMap;
use log::{debug, error, info, warn};
use zerocopy::IntoBytes;

use crate::{constants::*, errors::*, resource::*, types::*, util::*};

/// Image data directory type enumeration.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum DataDirectoryType {
    ExportTable,
    ImportTable,
    ResourceTable,
    ExceptionTable,
    CertificateTable,
    BaseRelocationTable,
    Debug,
    Architecture,
    GlobalPtr,
    TLSTable,
    LoadConfigTable,
    BoundImport,
    IAT,
    DelayImportDescriptor,
    CLRRuntimeHeader,
    Reserved,
}

const DATA_DIRECTORY_TYPES: [DataDirectoryType; 16] = {
    use DataDirectoryType::*;
    [
        ExportTable,
        ImportTable,
        ResourceTable,
        ExceptionTable,
        CertificateTable,
        BaseRelocationTable,
        Debug,
        Architecture,
        GlobalPtr,
        TLSTable,
        LoadConfigTable,
        BoundImport,
        IAT,
        DelayImportDescriptor,
        CLRRuntimeHeader,
        Reserved,
    ]
};

/// Portable executable image representation.
///
/// Parses the headers and the resource directory of an image and rebuilds the image when the resource directory is replaced.
/// All data not belonging to the headers or the resource section is carried over unchanged.
#[derive(Debug, Clone)]
pub struct PeImage<'a> {
    pub(crate) image: Cow<'a, [u8]>,

    pub(crate) coff_header:           CoffHeader,
    pub(crate) standard_header:       StandardHeader,
    pub(crate) windows_header:        GenericWindowsHeader,
    pub(crate) header_data_directory: IndexMap<DataDirectoryType, ImageDataDirectory, RandomState>,
    pub(crate) section_table:         Vec<SectionHeader>,

    pub(crate) resource_directory: Option<ResourceDirectory>,

    coff_header_offset:    u64,
    windows_header_offset: u64,
    directories_offset:    u64,
}

impl PartialEq for PeImage<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.coff_header == other.coff_header
            && self.standard_header == other.standard_header
            && self.windows_header == other.windows_header
            && self.header_data_directory == other.header_data_directory
            && self.section_table == other.section_table
            && self.resource_directory == other.resource_directory
    }
}
impl Eq for PeImage<'_> {}

impl<'a> PeImage<'a> {
    /// Parse a portable executable image from a byte slice.
    ///
    /// # Returns
    /// Returns the `PeImage`, or an error if the byte slice is not a valid portable executable image or is missing required headers.
    pub fn parse<R: Into<Cow<'a, [u8]>>>(image: R) -> Result<Self, ImageReadError> {
        let image = image.into();

        let pe_dos_magic = read_at::<u16>(&image, 0)?;
        debug!("pe_dos_magic: {:#x?}", pe_dos_magic);
        if pe_dos_magic != PE_DOS_MAGIC {
            return Err(ImageReadError::InvalidHeader("no dos magic".into()));
        }

        let pe_signature_offset = read_at::<u32>(&image, PE_PTR_OFFSET as usize)?;
        debug!("pe_signature_offset: {:#x?}", pe_signature_offset);

        let pe_signature = read_at::<u32>(&image, pe_signature_offset as usize)?;
        if pe_signature != PE_NT_SIGNATURE {
            return Err(ImageReadError::InvalidHeader("no pe signature".into()));
        }

        let coff_header_offset = pe_signature_offset as u64 + 4;
        let coff_header = read_at::<CoffHeader>(&image, coff_header_offset as usize)?;
        debug!("{:#x?}: {:#x?}", coff_header_offset, coff_header);
        if coff_header.size_of_optional_header < 24 {
            return Err(ImageReadError::InvalidHeader("optional header too small".into()));
        }

        let standard_header_offset = coff_header_offset + size_of::<CoffHeader>() as u64;
        let standard_header = read_at::<StandardHeader>(&image, standard_header_offset as usize)?;
        debug!("{:#x?}: {:#x?}", standard_header_offset, standard_header);

        let (windows_header_offset, windows_header, number_of_rva_and_sizes, optional_header_dd_offset) =
            if standard_header.magic == PE_32_MAGIC && coff_header.size_of_optional_header >= 96 {
                let windows_header_offset = standard_header_offset + 28;
                let windows_header =
                    read_at::<WindowsHeader<u32>>(&image, windows_header_offset as usize)?;
                (
                    windows_header_offset,
                    GenericWindowsHeader::WindowsHeader32(windows_header),
                    windows_header.number_of_rva_and_sizes,
                    standard_header_offset + 96,
                )
            } else if standard_header.magic == PE_64_MAGIC
                && coff_header.size_of_optional_header >= 112
            {
                let windows_header_offset = standard_header_offset + 24;
                let windows_header =
                    read_at::<WindowsHeader<u64>>(&image, windows_header_offset as usize)?;
                (
                    windows_header_offset,
                    GenericWindowsHeader::WindowsHeader64(windows_header),
                    windows_header.number_of_rva_and_sizes,
                    standard_header_offset + 112,
                )
            } else {
                return Err(ImageReadError::InvalidHeader("invalid optional header".into()));
            };
        debug!("{:#x?}: {:#x?}", windows_header_offset, windows_header);

        if image.len() <= optional_header_dd_offset as usize {
            return Err(ImageReadError::InvalidHeader(
                "image truncated after optional header".into(),
            ));
        }

        let mut header_data_directory =
            IndexMap::<DataDirectoryType, ImageDataDirectory, _>::with_hasher(RandomState::new());
        for (index, &header) in DATA_DIRECTORY_TYPES.iter().enumerate() {
            if (index as u32) < number_of_rva_and_sizes {
                let offset = optional_header_dd_offset + (index * 8) as u64;
                let data = read_at::<ImageDataDirectory>(&image, offset as usize)?;
                header_data_directory.insert(header, data);
                debug!("{:#x?}: {:?}: {:#x?}", offset, header, data);
            }
        }

        let section_table_offset =
            standard_header_offset + coff_header.size_of_optional_header as u64;
        let mut section_table = Vec::with_capacity(coff_header.number_of_sections as usize);
        for index in 0..coff_header.number_of_sections as u64 {
            let offset = section_table_offset + index * size_of::<SectionHeader>() as u64;
            let section_header = read_at::<SectionHeader>(&image, offset as usize)?;
            debug!(
                "{:#x?}: {}: {:#x?}",
                offset,
                section_header.name().unwrap_or_else(|| "?".to_string()),
                section_header
            );
            section_table.push(section_header);
        }

        let directories_offset = section_table_offset
            + coff_header.number_of_sections as u64 * size_of::<SectionHeader>() as u64;

        let mut resource_directory = None;
        if let Some(resource_data) = header_data_directory.get(&DataDirectoryType::ResourceTable) {
            if resource_data.virtual_address > 0 && resource_data.size > 0 {
                if let Some(section) = section_table
                    .iter()
                    .find(|section| section.contains_virtual_address(resource_data.virtual_address))
                {
                    debug!(
                        "found resource directory in {} section: {:#x?}",
                        section.name().unwrap_or_else(|| "?".to_string()),
                        section
                    );
                    let offset = resource_data.virtual_address - section.virtual_address;
                    resource_directory = Some(ResourceDirectory::parse(
                        &image,
                        section.pointer_to_raw_data + offset,
                        resource_data.virtual_address,
                    )?);
                } else {
                    warn!(
                        "resource directory at {:#x?} is not inside any section",
                        resource_data.virtual_address
                    );
                }
            }
        }

        Ok(Self {
            image,
            coff_header,
            standard_header,
            windows_header,
            header_data_directory,
            section_table,
            resource_directory,
            coff_header_offset,
            windows_header_offset,
            directories_offset,
        })
    }

    /// Parse a portable executable image from a file.
    ///
    /// # Returns
    /// Returns the `PeImage`, or an error if the file could not be read, is not a valid portable executable image or is missing required headers.
    pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<PeImage<'static>, ImageReadError> {
        let data = std::fs::read(path)?;
        PeImage::parse(data)
    }

    /// Write the portable executable image to a file, replacing it atomically.
    ///
    /// # Returns
    /// Returns an error if the file could not be written.
    pub fn write_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ImageWriteError> {
        persist_atomically(path.as_ref(), &self.image).map_err(|e| e.into())
    }

    /// Set the resource directory of the image.
    ///
    /// This will update the resource data directory and the resource section.
    /// If a section containing a resource directory already exists, it will be updated in place if the following conditions are met:
    /// - The new directory is not larger than the section containing the existing one, or that section is the last section in the image.
    /// - The section is not used by other directories.
    ///
    /// Otherwise, the existing section will be kept intact and a new section will be added after all other sections and before any other data at the end of the image.
    ///
    /// # Returns
    /// Returns the previous resource directory, or an error in the following cases:
    /// - The resource directory does not fit into a 32 bit section.
    /// - There is not enough space in the image header to add a new section.
    /// - A section points to data outside the image.
    pub fn set_resource_directory(
        &mut self, resource_directory: ResourceDirectory,
    ) -> Result<Option<ResourceDirectory>, ImageWriteError> {
        let new_size = u32::try_from(resource_directory.size())
            .map_err(|_| ImageWriteError::ResourceDirectoryTooLarge(resource_directory.size()))?;

        // copy to-be-modified data to allow erroring out without invalidating the image
        let mut coff_header = self.coff_header;
        let mut windows_header = self.windows_header;
        let mut header_data_directory = self.header_data_directory.clone();
        let mut section_table = self.section_table.clone();

        let section_alignment = windows_header.section_alignment().max(1);
        let file_alignment = windows_header.file_alignment().max(1);
        let mut required_header_space = 0u64;

        // ensure that the data directory entry for the resource table exists
        for &header in &DATA_DIRECTORY_TYPES[..=DataDirectoryType::ResourceTable as usize] {
            if !header_data_directory.contains_key(&header) {
                debug!("adding missing header data directory: {:?}", header);
                header_data_directory.insert(header, ImageDataDirectory::default());
                coff_header.size_of_optional_header += size_of::<ImageDataDirectory>() as u16;
                required_header_space += size_of::<ImageDataDirectory>() as u64;
            }
        }
        let old_resource_data_directory = header_data_directory
            .get(&DataDirectoryType::ResourceTable)
            .copied()
            .unwrap_or_default();

        debug!("new resource data size: {:#x?}", new_size);

        let first_section_start = section_table
            .iter()
            .filter(|section| section.size_of_raw_data > 0)
            .map(|section| section.pointer_to_raw_data as usize)
            .min()
            .unwrap_or(self.image.len());
        let last_section = section_table
            .iter()
            .filter(|section| section.size_of_raw_data > 0)
            .max_by_key(|section| section.pointer_to_raw_data + section.size_of_raw_data)
            .copied();
        let last_section_end = last_section
            .map(|section| section.pointer_to_raw_data as usize + section.size_of_raw_data as usize)
            .unwrap_or(self.image.len());
        if last_section_end > self.image.len() {
            return Err(ImageWriteError::InvalidSectionRange(
                last_section_end as u64,
                self.image.len() as u64,
            ));
        }

        // search for the section containing the resource directory and decide whether it can be reused
        let mut reused_section = None;
        if old_resource_data_directory.size > 0 {
            let index = section_table.iter().position(|section| {
                section.contains_virtual_address(old_resource_data_directory.virtual_address)
            });
            if let Some(index) = index {
                let section = section_table[index];
                debug!(
                    "found existing resource directory in {} section: {:#x?}",
                    section.name().unwrap_or_else(|| "?".to_string()),
                    section
                );
                let is_last_section = last_section.is_some_and(|last| {
                    last.pointer_to_raw_data + last.size_of_raw_data
                        == section.pointer_to_raw_data + section.size_of_raw_data
                }) && section_table
                    .iter()
                    .all(|other| other.virtual_address <= section.virtual_address);
                let shared = old_resource_data_directory.virtual_address != section.virtual_address
                    || header_data_directory.iter().any(|(header, directory)| {
                        header != &DataDirectoryType::ResourceTable
                            && directory.size > 0
                            && section.contains_virtual_address(directory.virtual_address)
                    });
                if shared {
                    info!("resource section also used by other data, keeping section intact");
                    warn!("resource section used by multiple data directories can indicate a packed executable");
                } else if new_size <= section.size_of_raw_data || is_last_section {
                    debug!(
                        "existing resource section can be reused ({:#x?} bytes, last: {})",
                        section.size_of_raw_data, is_last_section
                    );
                    reused_section = Some((index, is_last_section));
                } else {
                    debug!(
                        "existing resource section is too small and followed by other sections ({:#x?} < {:#x?})",
                        section.size_of_raw_data, new_size
                    );
                }
            }
        }

        let mut new_image = Vec::with_capacity(self.image.len() + new_size as usize);
        new_image.extend_from_slice(&self.image[..self.coff_header_offset as usize]);
        let mut body = Vec::with_capacity(self.image.len() + new_size as usize);

        if let Some((index, is_last_section)) = reused_section {
            let section = &mut section_table[index];
            let section_start = section.pointer_to_raw_data as usize;
            let section_end = section_start + section.size_of_raw_data as usize;
            let mut data = resource_directory.build(section.virtual_address);

            if new_size < section.size_of_raw_data && !is_last_section {
                debug!("resource section is followed by other sections, padding section with existing data");
                data.extend(&self.image[section_start + new_size as usize..section_end]);
            } else {
                debug!("resource section is the last section, resizing section to {:#x?}", new_size);
                data.resize(aligned_to(new_size, file_alignment) as usize, 0);
                section.size_of_raw_data = data.len() as u32;
            }
            section.virtual_size = if is_last_section {
                new_size
            } else {
                section.virtual_size.max(new_size)
            };

            let resource_dd = header_data_directory
                .entry(DataDirectoryType::ResourceTable)
                .or_default();
            resource_dd.virtual_address = section.virtual_address;
            resource_dd.size = new_size;

            body.extend_from_slice(&self.image[first_section_start..section_start]);
            body.extend_from_slice(&data);
            body.extend_from_slice(&self.image[section_end..last_section_end.max(section_end)]);
        } else {
            debug!("adding new resource section");
            let virtual_address = section_table
                .iter()
                .map(|section| section.virtual_address + section.virtual_size.max(section.size_of_raw_data))
                .max()
                .unwrap_or(section_alignment);
            let virtual_address = aligned_to(virtual_address, section_alignment);
            let pointer_to_raw_data = match last_section {
                Some(_) => aligned_to(last_section_end as u32, file_alignment),
                None => aligned_to(self.image.len() as u32, file_alignment),
            };

            let mut data = resource_directory.build(virtual_address);
            data.resize(aligned_to(new_size, file_alignment) as usize, 0);

            let resource_dd = header_data_directory
                .entry(DataDirectoryType::ResourceTable)
                .or_default();
            resource_dd.virtual_address = virtual_address;
            resource_dd.size = new_size;

            section_table.push(SectionHeader {
                name: u64::from_le_bytes(*b".rsrc\0\0\0"),
                virtual_size: new_size,
                virtual_address,
                size_of_raw_data: data.len() as u32,
                pointer_to_raw_data,
                characteristics: IMAGE_SCN_CNT_INITIALIZED_DATA | IMAGE_SCN_MEM_READ,
                ..SectionHeader::default()
            });
            coff_header.number_of_sections += 1;
            required_header_space += size_of::<SectionHeader>() as u64;

            let data_end = if last_section.is_some() { last_section_end } else { self.image.len() };
            body.extend_from_slice(&self.image[first_section_start.min(data_end)..data_end]);
            body.resize(body.len() + (pointer_to_raw_data as usize - data_end), 0);
            body.extend_from_slice(&data);
        }
        let overlay_start = if last_section.is_some() { last_section_end } else { self.image.len() };
        body.extend_from_slice(&self.image[overlay_start..]);

        let available_space = (first_section_start as u64).saturating_sub(self.directories_offset);
        debug!("available header space: {:#x?}", available_space);
        debug!("required additional header space: {:#x?}", required_header_space);
        if required_header_space > available_space {
            error!(
                "not enough space in header to add new section ({} > {})",
                required_header_space, available_space
            );
            return Err(ImageWriteError::NotEnoughSpaceInHeader);
        }

        let size_of_image = section_table
            .iter()
            .map(|section| aligned_to(section.virtual_address + section.virtual_size, section_alignment))
            .max()
            .unwrap_or(0)
            .max(windows_header.size_of_image());
        windows_header.update_layout(header_data_directory.len() as u32, size_of_image);

        let standard_header_end =
            self.coff_header_offset as usize + size_of::<CoffHeader>() + size_of::<StandardHeader>();
        new_image.extend_from_slice(coff_header.as_bytes());
        new_image.extend_from_slice(self.standard_header.as_bytes());
        // base of data for 32 bit images
        new_image.extend_from_slice(&self.image[standard_header_end..self.windows_header_offset as usize]);
        new_image.extend_from_slice(windows_header.as_bytes());
        for data in header_data_directory.values() {
            new_image.extend_from_slice(data.as_bytes());
        }
        for section_header in &section_table {
            new_image.extend_from_slice(section_header.as_bytes());
        }
        new_image.extend_from_slice(
            &self.image[(self.directories_offset + required_header_space) as usize..first_section_start],
        );
        new_image.extend_from_slice(&body);

        self.coff_header = coff_header;
        self.windows_header = windows_header;
        self.header_data_directory = header_data_directory;
        self.section_table = section_table;
        self.directories_offset += required_header_space;

        let previous_resource_directory = self.resource_directory.take();
        let virtual_address = self
            .header_data_directory
            .get(&DataDirectoryType::ResourceTable)
            .map(|directory| directory.virtual_address)
            .unwrap_or_default();
        self.resource_directory = Some(ResourceDirectory {
            virtual_address,
            ..resource_directory
        });
        self.image = new_image.into();

        Ok(previous_resource_directory)
    }

    /// Returns the current resource directory or `None` if the image does not contain a resource directory.
    pub fn resource_directory(&self) -> Option<&ResourceDirectory> {
        self.resource_directory.as_ref()
    }

    /// Returns the raw image data with all changes applied.
    pub fn data(&self) -> &[u8] { &self.image }

    /// Returns the parsed coff header.
    pub fn coff_header(&self) -> &CoffHeader { &self.coff_header }

    /// Returns the parsed windows header.
    pub fn windows_header(&self) -> &GenericWindowsHeader { &self.windows_header }

    /// Returns the data directory for the requested header.
    pub fn data_directory(&self, directory: DataDirectoryType) -> Option<&ImageDataDirectory> {
        self.header_data_directory.get(&directory)
    }

    /// Returns the section header containing the data directory.
    pub fn section_header_for_data_directory(
        &self, directory: DataDirectoryType,
    ) -> Option<&SectionHeader> {
        let data_directory = self.data_directory(directory)?;
        self.section_table
            .iter()
            .find(|section| section.contains_virtual_address(data_directory.virtual_address))
    }

    /// Returns all section tables existing in the image.
    pub fn section_table(&self) -> &[SectionHeader] { &self.section_table }
}
