//! Raw binary data types.
//!
//! The portable executable types are a one-to-one mapping of the data described in <https://docs.microsoft.com/en-us/windows/win32/debug/pe-format>.
//! The icon, version info and Mach-O types use explicit byte order fields so they serialize identically on every host.

use std::{mem, slice};

use zerocopy::{
    byteorder::{
        big_endian,
        little_endian::{U16, U32, U64},
    },
    FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
};

#[repr(C, packed(1))]
#[derive(
    Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, FromBytes, IntoBytes, Immutable, Default,
)]
pub struct VersionU8 {
    pub major: u8,
    pub minor: u8,
}
#[repr(C, packed(2))]
#[derive(
    Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, FromBytes, IntoBytes, Immutable, Default,
)]
pub struct VersionU16 {
    pub major: u16,
    pub minor: u16,
}
#[repr(C, packed(2))]
#[derive(
    Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, FromBytes, IntoBytes, Immutable, Default,
)]
pub struct CoffHeader {
    pub machine:                 u16,
    pub number_of_sections:      u16,
    pub time_date_stamp:         u32,
    pub pointer_to_symbol_table: u32,
    pub number_of_symbols:       u32,
    pub size_of_optional_header: u16,
    pub characteristics:         u16,
}
#[repr(C, packed(2))]
#[derive(
    Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, FromBytes, IntoBytes, Immutable, Default,
)]
pub struct StandardHeader {
    pub magic:                      u16,
    pub linker_version:             VersionU8,
    pub size_of_code:               u32,
    pub size_of_initialized_data:   u32,
    pub size_of_uninitialized_data: u32,
    pub address_of_entry_point:     u32,
    pub base_of_code:               u32,
}
#[repr(C)]
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, FromBytes, Default)]
pub struct WindowsHeader<UXX> {
    pub image_base:               UXX,
    pub section_alignment:        u32,
    pub file_alignment:           u32,
    pub operating_system_version: VersionU16,
    pub image_version:            VersionU16,
    pub subsystem_version:        VersionU16,
    pub win32_version_value:      u32,
    pub size_of_image:            u32,
    pub size_of_headers:          u32,
    pub check_sum:                u32,
    pub subsystem:                u16,
    pub dll_characteristics:      u16,
    pub size_of_stack_reserve:    UXX,
    pub size_of_stack_commit:     UXX,
    pub size_of_heap_reserve:     UXX,
    pub size_of_heap_commit:      UXX,
    pub loader_flags:             u32,
    pub number_of_rva_and_sizes:  u32,
}
impl<UXX> WindowsHeader<UXX>
where
    UXX: IntoBytes,
{
    pub fn as_bytes(&self) -> &[u8] {
        // manually implement this here because zerocopy doesn't support derive for generic types
        unsafe {
            let len = mem::size_of_val(self);
            slice::from_raw_parts(self as *const Self as *const u8, len)
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd)]
pub enum GenericWindowsHeader {
    WindowsHeader32(WindowsHeader<u32>),
    WindowsHeader64(WindowsHeader<u64>),
}
impl GenericWindowsHeader {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            GenericWindowsHeader::WindowsHeader32(header) => header.as_bytes(),
            GenericWindowsHeader::WindowsHeader64(header) => header.as_bytes(),
        }
    }

    pub const fn section_alignment(&self) -> u32 {
        match self {
            GenericWindowsHeader::WindowsHeader32(header) => header.section_alignment,
            GenericWindowsHeader::WindowsHeader64(header) => header.section_alignment,
        }
    }

    pub const fn file_alignment(&self) -> u32 {
        match self {
            GenericWindowsHeader::WindowsHeader32(header) => header.file_alignment,
            GenericWindowsHeader::WindowsHeader64(header) => header.file_alignment,
        }
    }

    pub const fn size_of_image(&self) -> u32 {
        match self {
            GenericWindowsHeader::WindowsHeader32(header) => header.size_of_image,
            GenericWindowsHeader::WindowsHeader64(header) => header.size_of_image,
        }
    }

    /// Update the fields that change whenever the section layout changes.
    /// The checksum is cleared since it is no longer valid.
    pub fn update_layout(&mut self, number_of_rva_and_sizes: u32, size_of_image: u32) {
        match self {
            GenericWindowsHeader::WindowsHeader32(header) => {
                header.number_of_rva_and_sizes = number_of_rva_and_sizes;
                header.size_of_image = size_of_image;
                header.check_sum = 0;
            }
            GenericWindowsHeader::WindowsHeader64(header) => {
                header.number_of_rva_and_sizes = number_of_rva_and_sizes;
                header.size_of_image = size_of_image;
                header.check_sum = 0;
            }
        }
    }
}

#[repr(C, packed(4))]
#[derive(
    Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, FromBytes, IntoBytes, Immutable, Default,
)]
pub struct ImageDataDirectory {
    pub virtual_address: u32,
    pub size:            u32,
}

#[repr(C, packed(4))]
#[derive(
    Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, FromBytes, IntoBytes, Immutable, Default,
)]
pub struct SectionHeader {
    pub name:                   u64,
    pub virtual_size:           u32,
    pub virtual_address:        u32,
    pub size_of_raw_data:       u32,
    pub pointer_to_raw_data:    u32,
    pub pointer_to_relocations: u32,
    pub pointer_to_linenumbers: u32,
    pub number_of_relocations:  u16,
    pub number_of_linenumbers:  u16,
    pub characteristics:        u32,
}

impl SectionHeader {
    pub fn name(&self) -> Option<String> {
        let name = self.name.to_le_bytes();
        let name = std::str::from_utf8(
            &name[0..name.iter().position(|&c| c == b'\0').unwrap_or(name.len())],
        )
        .ok();
        name.map(|name| name.to_string())
    }

    /// Returns whether the virtual address lies inside the section.
    pub fn contains_virtual_address(&self, virtual_address: u32) -> bool {
        virtual_address >= self.virtual_address
            && (virtual_address as u64)
                < self.virtual_address as u64 + self.virtual_size.max(self.size_of_raw_data) as u64
    }
}

#[repr(C, packed(2))]
#[derive(
    Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, FromBytes, IntoBytes, Immutable, Default,
)]
pub struct ResourceDirectoryTable {
    pub characteristics:        u32,
    pub time_date_stamp:        u32,
    pub version:                VersionU16,
    pub number_of_name_entries: u16,
    pub number_of_id_entries:   u16,
}

#[repr(C, packed(4))]
#[derive(
    Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, FromBytes, IntoBytes, Immutable, Default,
)]
pub struct ResourceDirectoryEntry {
    pub name_offset_or_integer_id:         u32,
    pub data_entry_or_subdirectory_offset: u32,
}

#[repr(C, packed(4))]
#[derive(
    Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, FromBytes, IntoBytes, Immutable, Default,
)]
pub struct ResourceDataEntry {
    pub data_rva: u32,
    pub size:     u32,
    pub codepage: u32,
    pub reserved: u32,
}


// https://learn.microsoft.com/en-us/previous-versions/ms997538(v=msdn.10)

/// Header of an ICO file and of a group icon resource.
#[repr(C)]
#[derive(
    Debug, Clone, Copy, Eq, PartialEq, Default, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned,
)]
pub struct IconDirectoryHeader {
    pub reserved: U16,
    pub type_:    U16,
    pub count:    U16,
}

/// Image entry of an ICO file, locating the image data inside the file.
#[repr(C)]
#[derive(
    Debug, Clone, Copy, Eq, PartialEq, Default, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned,
)]
pub struct IconDirectoryEntry {
    pub width:        u8,
    pub height:       u8,
    pub color_count:  u8,
    pub reserved:     u8,
    pub planes:       U16,
    pub bit_count:    U16,
    pub bytes_in_res: U32,
    pub image_offset: U32,
}

/// Image entry of a group icon resource, referencing an icon resource by id.
#[repr(C)]
#[derive(
    Debug, Clone, Copy, Eq, PartialEq, Default, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned,
)]
pub struct IconGroupEntry {
    pub width:        u8,
    pub height:       u8,
    pub color_count:  u8,
    pub reserved:     u8,
    pub planes:       U16,
    pub bit_count:    U16,
    pub bytes_in_res: U32,
    pub id:           U16,
}

const _: () = assert!(mem::size_of::<IconDirectoryHeader>() == 6);
const _: () = assert!(mem::size_of::<IconDirectoryEntry>() == 16);
const _: () = assert!(mem::size_of::<IconGroupEntry>() == 14);


// https://learn.microsoft.com/en-us/windows/win32/menurc/vs-versioninfo

#[repr(C)]
#[derive(
    Debug, Clone, Copy, Eq, PartialEq, Default, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned,
)]
pub struct VersionHeader {
    pub length:       U16,
    pub value_length: U16,
    pub type_:        U16,
}

#[repr(C)]
#[derive(
    Debug, Clone, Copy, Eq, PartialEq, Default, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned,
)]
pub struct FixedFileInfo {
    pub signature:          U32,
    pub struct_version:     U32,
    pub file_version_ms:    U32,
    pub file_version_ls:    U32,
    pub product_version_ms: U32,
    pub product_version_ls: U32,
    pub file_flags_mask:    U32,
    pub file_flags:         U32,
    pub file_os:            U32,
    pub file_type:          U32,
    pub file_subtype:       U32,
    pub file_date_ms:       U32,
    pub file_date_ls:       U32,
}

const _: () = assert!(mem::size_of::<FixedFileInfo>() == 52);


// https://github.com/apple-oss-distributions/xnu/blob/main/EXTERNAL_HEADERS/mach-o/loader.h

#[repr(C)]
#[derive(Debug, Clone, Copy, Eq, PartialEq, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct FatHeader {
    pub magic:     big_endian::U32,
    pub nfat_arch: big_endian::U32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Eq, PartialEq, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct FatArch {
    pub cputype:    big_endian::U32,
    pub cpusubtype: big_endian::U32,
    pub offset:     big_endian::U32,
    pub size:       big_endian::U32,
    pub align:      big_endian::U32,
}

/// Common prefix of the 32 and 64 bit Mach-O headers.
/// The 64 bit header is followed by four reserved bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy, Eq, PartialEq, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct MachHeader {
    pub magic:      U32,
    pub cputype:    U32,
    pub cpusubtype: U32,
    pub filetype:   U32,
    pub ncmds:      U32,
    pub sizeofcmds: U32,
    pub flags:      U32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Eq, PartialEq, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct LoadCommand {
    pub cmd:     U32,
    pub cmdsize: U32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Eq, PartialEq, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct DylibCommand {
    pub cmd:                   U32,
    pub cmdsize:               U32,
    pub name_offset:           U32,
    pub timestamp:             U32,
    pub current_version:       U32,
    pub compatibility_version: U32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Eq, PartialEq, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct RpathCommand {
    pub cmd:         U32,
    pub cmdsize:     U32,
    pub path_offset: U32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Eq, PartialEq, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct SegmentCommand32 {
    pub cmd:      U32,
    pub cmdsize:  U32,
    pub segname:  [u8; 16],
    pub vmaddr:   U32,
    pub vmsize:   U32,
    pub fileoff:  U32,
    pub filesize: U32,
    pub maxprot:  U32,
    pub initprot: U32,
    pub nsects:   U32,
    pub flags:    U32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Eq, PartialEq, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct SegmentCommand64 {
    pub cmd:      U32,
    pub cmdsize:  U32,
    pub segname:  [u8; 16],
    pub vmaddr:   U64,
    pub vmsize:   U64,
    pub fileoff:  U64,
    pub filesize: U64,
    pub maxprot:  U32,
    pub initprot: U32,
    pub nsects:   U32,
    pub flags:    U32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Eq, PartialEq, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct Section32 {
    pub sectname:  [u8; 16],
    pub segname:   [u8; 16],
    pub addr:      U32,
    pub size:      U32,
    pub offset:    U32,
    pub align:     U32,
    pub reloff:    U32,
    pub nreloc:    U32,
    pub flags:     U32,
    pub reserved1: U32,
    pub reserved2: U32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Eq, PartialEq, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct Section64 {
    pub sectname:  [u8; 16],
    pub segname:   [u8; 16],
    pub addr:      U64,
    pub size:      U64,
    pub offset:    U32,
    pub align:     U32,
    pub reloff:    U32,
    pub nreloc:    U32,
    pub flags:     U32,
    pub reserved1: U32,
    pub reserved2: U32,
    pub reserved3: U32,
}

const _: () = assert!(mem::size_of::<MachHeader>() == 28);
const _: () = assert!(mem::size_of::<DylibCommand>() == 24);
const _: () = assert!(mem::size_of::<RpathCommand>() == 12);
const _: () = assert!(mem::size_of::<SegmentCommand32>() == 56);
const _: () = assert!(mem::size_of::<SegmentCommand64>() == 72);
const _: () = assert!(mem::size_of::<Section32>() == 68);
const _: () = assert!(mem::size_of::<Section64>() == 80);
