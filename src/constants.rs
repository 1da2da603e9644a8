//! Windows API, Mach-O and binary constants.

#![allow(non_upper_case_globals)]

pub type DWORD = u32;
pub type WORD = u16;
pub type LANGID = WORD;


pub const VS_FILE_VERSION: &str = "FileVersion";
pub const VS_PRODUCT_VERSION: &str = "ProductVersion";

pub const VS_VERSION_INFO_KEY: &str = "VS_VERSION_INFO";
pub const VS_STRING_FILE_INFO_KEY: &str = "StringFileInfo";
pub const VS_VAR_FILE_INFO_KEY: &str = "VarFileInfo";
pub const VS_TRANSLATION_KEY: &str = "Translation";


// https://docs.microsoft.com/en-us/openspecs/windows_protocols/ms-lcid/a9eac961-e77d-41a6-90a5-ce1a8b0cdb9c
pub const LANGUAGE_ID_EN_US: LANGID = 1033; // 0x0409, en-US
// https://docs.microsoft.com/en-us/openspecs/windows_protocols/ms-ucoderef/28fefe92-d66c-4b03-90a9-97b473223d43
pub const CODE_PAGE_ID_EN_US: LANGID = 1200; // 0x04B0, UTF-16LE
// language neutral, used for all resources written by the pipeline
pub const LANGUAGE_ID_NEUTRAL: LANGID = 0;


// https://docs.microsoft.com/en-us/windows/win32/api/verrsrc/ns-verrsrc-vs_fixedfileinfo

pub const VOS_NT_WINDOWS32: DWORD = 0x00040004;

pub const VFT_APP: DWORD = 0x00000001;
pub const VFT_DLL: DWORD = 0x00000002;

pub const VFT2_UNKNOWN: DWORD = 0x00000000;

pub const VS_FF_FILEFLAGSMASK: DWORD = 0x0000003F;

pub const VS_FIXEDFILEINFO_SIGNATURE: DWORD = 0xFEEF04BD;
pub const VS_FIXEDFILEINFO_VERSION: DWORD = 0x00010000;


// https://docs.microsoft.com/en-us/windows/win32/debug/pe-format

pub const PE_DOS_MAGIC: WORD = 0x5a4d; // MZ
pub const PE_PTR_OFFSET: DWORD = 0x03c;
pub const PE_NT_SIGNATURE: DWORD = 0x00004550; // PE00
pub const PE_32_MAGIC: WORD = 0x010b;
pub const PE_64_MAGIC: WORD = 0x020b;


// https://docs.microsoft.com/en-us/windows/win32/menurc/resource-types

pub const RT_ICON: WORD = 0x03;
pub const RT_RCDATA: WORD = 0x0A;
pub const RT_GROUP_ICON: WORD = 0x0E;
pub const RT_VERSION: WORD = 0x10;
pub const RT_MANIFEST: WORD = 0x18;


// https://docs.microsoft.com/en-us/windows/win32/debug/pe-format#section-flags

pub const IMAGE_SCN_CNT_INITIALIZED_DATA: DWORD = 0x00000040;
pub const IMAGE_SCN_MEM_READ: DWORD = 0x40000000;


// resource names used by the post-processing pipeline

pub const ICON_GROUP_ID: WORD = 1;
pub const VERSION_INFO_ID: WORD = 1;
pub const MANIFEST_ID: WORD = 1;
pub const CONSTANTS_BLOB_ID: WORD = 3;
pub const SPLASH_SCREEN_ID: WORD = 27;


// https://github.com/apple-oss-distributions/xnu/blob/main/EXTERNAL_HEADERS/mach-o/loader.h

pub const MH_MAGIC: DWORD = 0xfeedface;
pub const MH_CIGAM: DWORD = 0xcefaedfe;
pub const MH_MAGIC_64: DWORD = 0xfeedfacf;
pub const MH_CIGAM_64: DWORD = 0xcffaedfe;
pub const FAT_MAGIC: DWORD = 0xcafebabe;

pub const LC_REQ_DYLD: DWORD = 0x80000000;
pub const LC_SEGMENT: DWORD = 0x1;
pub const LC_LOAD_DYLIB: DWORD = 0xc;
pub const LC_SEGMENT_64: DWORD = 0x19;
pub const LC_CODE_SIGNATURE: DWORD = 0x1d;
pub const LC_LAZY_LOAD_DYLIB: DWORD = 0x20;
pub const LC_LOAD_WEAK_DYLIB: DWORD = 0x18 | LC_REQ_DYLD;
pub const LC_RPATH: DWORD = 0x1c | LC_REQ_DYLD;
pub const LC_REEXPORT_DYLIB: DWORD = 0x1f | LC_REQ_DYLD;
pub const LC_LOAD_UPWARD_DYLIB: DWORD = 0x23 | LC_REQ_DYLD;

pub const DYLIB_LOAD_COMMANDS: [DWORD; 5] = [
    LC_LOAD_DYLIB,
    LC_LOAD_WEAK_DYLIB,
    LC_REEXPORT_DYLIB,
    LC_LAZY_LOAD_DYLIB,
    LC_LOAD_UPWARD_DYLIB,
];
