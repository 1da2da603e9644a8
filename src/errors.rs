//! Errors specific to reading, building and embedding binary resources.

use std::{io::Error as IOError, path::PathBuf, str::Utf8Error};

use crate::resource::ResourceKind;

/// Error that can occur when reading and parsing bytes.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct ReadError(pub String);

/// Errors that can occur when reading a PE image.
#[derive(Debug, thiserror::Error)]
pub enum ImageReadError {
    #[error("invalid utf8: {0}")]
    Utf8Error(Utf8Error),
    #[error("invalid bytes: {0}")]
    InvalidBytes(ReadError),
    #[error("invalid header: {0}")]
    InvalidHeader(String),
    #[error("invalid section: {0}")]
    InvalidSection(String),
    #[error("io error: {0}")]
    IOError(IOError),
}
impl From<Utf8Error> for ImageReadError {
    fn from(error: Utf8Error) -> Self { ImageReadError::Utf8Error(error) }
}
impl From<ReadError> for ImageReadError {
    fn from(error: ReadError) -> Self { ImageReadError::InvalidBytes(error) }
}
impl From<IOError> for ImageReadError {
    fn from(error: IOError) -> Self { ImageReadError::IOError(error) }
}

/// Errors that can occur when writing a PE image.
#[derive(Debug, thiserror::Error)]
pub enum ImageWriteError {
    #[error("not enough space in file header")]
    NotEnoughSpaceInHeader,
    #[error("section points outside image: {0} > {1}")]
    InvalidSectionRange(u64, u64),
    #[error("resource directory too large: {0} bytes")]
    ResourceDirectoryTooLarge(u64),
    #[error("io error: {0}")]
    IOError(IOError),
}
impl From<IOError> for ImageWriteError {
    fn from(error: IOError) -> Self { ImageWriteError::IOError(error) }
}

/// Errors that can occur when modifying resource data.
#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error("invalid table: {0}")]
    InvalidTable(String),
    #[error("invalid bytes: {0}")]
    InvalidBytes(ReadError),
    #[error("version info block {0:?} exceeds 65535 bytes")]
    BlockTooLarge(String),
}
impl From<ReadError> for ResourceError {
    fn from(error: ReadError) -> Self { ResourceError::InvalidBytes(error) }
}

/// Errors that can occur when reading icon sources.
#[derive(Debug, thiserror::Error)]
pub enum IconError {
    #[error("invalid icon header in '{path}': {reason}")]
    InvalidHeader { path: PathBuf, reason: String },
    #[error("icon file '{path}' is truncated: wanted {wanted} bytes at offset {offset}")]
    Truncated { path: PathBuf, offset: u64, wanted: u64 },
    #[error("referenced icon index {index} in file '{path}' with only {count} icons")]
    IndexOutOfRange { index: usize, path: PathBuf, count: usize },
    #[error("cannot specify indexes with non-ico format files in '{0}'")]
    IndexWithoutIcoSource(String),
    #[error("need to install '{dependency}' to automatically convert non-ico icon file in '{path}'")]
    MissingDependency { dependency: &'static str, path: PathBuf },
    #[error("unsupported image format in '{path}': {reason}")]
    UnsupportedImageFormat { path: PathBuf, reason: String },
    #[error("icon conversion of '{path}' failed: {reason}")]
    ConversionFailed { path: PathBuf, reason: String },
    #[error("icon image ids exhausted")]
    IdsExhausted,
    #[error("invalid group icon data: {0}")]
    InvalidGroupData(ReadError),
    #[error("io error: {0}")]
    IOError(IOError),
}
impl From<IOError> for IconError {
    fn from(error: IOError) -> Self { IconError::IOError(error) }
}
impl From<ReadError> for IconError {
    fn from(error: ReadError) -> Self { IconError::InvalidGroupData(error) }
}

/// Errors that can occur when embedding resources into an executable file.
#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    #[error("target file '{0}' does not exist")]
    TargetMissing(PathBuf),
    #[error("cannot open resources of '{path}': {source}")]
    OpenResources { path: PathBuf, source: ImageReadError },
    #[error("cannot update resources of '{path}': {source}")]
    UpdateResources { path: PathBuf, source: ImageWriteError },
    #[error("resource {kind:?} {name} payload of {size} bytes exceeds the size limit")]
    ResourceTooLarge { kind: ResourceKind, name: String, size: usize },
    #[error("invalid resource directory: {0}")]
    InvalidResources(ResourceError),
    #[error("io error: {0}")]
    IOError(IOError),
}
impl From<IOError> for EmbedError {
    fn from(error: IOError) -> Self { EmbedError::IOError(error) }
}
impl From<ResourceError> for EmbedError {
    fn from(error: ResourceError) -> Self { EmbedError::InvalidResources(error) }
}

/// Errors that can occur when parsing or serializing an application manifest.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("invalid manifest xml: {0}")]
    Xml(quick_xml::Error),
    #[error("invalid manifest encoding: {0}")]
    Utf8Error(Utf8Error),
    #[error("manifest has no <assembly> root element")]
    MissingAssembly,
    #[error(transparent)]
    Embed(EmbedError),
    #[error("io error: {0}")]
    IOError(IOError),
}
impl From<quick_xml::Error> for ManifestError {
    fn from(error: quick_xml::Error) -> Self { ManifestError::Xml(error) }
}
impl From<quick_xml::events::attributes::AttrError> for ManifestError {
    fn from(error: quick_xml::events::attributes::AttrError) -> Self {
        ManifestError::Xml(error.into())
    }
}
impl From<Utf8Error> for ManifestError {
    fn from(error: Utf8Error) -> Self { ManifestError::Utf8Error(error) }
}
impl From<IOError> for ManifestError {
    fn from(error: IOError) -> Self { ManifestError::IOError(error) }
}
impl From<EmbedError> for ManifestError {
    fn from(error: EmbedError) -> Self { ManifestError::Embed(error) }
}

/// Errors that can occur when patching a Mach-O binary.
#[derive(Debug, thiserror::Error)]
pub enum MachOError {
    #[error("invalid bytes: {0}")]
    InvalidBytes(ReadError),
    #[error("not a mach-o binary (magic {0:#x})")]
    InvalidMagic(u32),
    #[error("big-endian mach-o binaries are not supported")]
    UnsupportedByteOrder,
    #[error("invalid load command {index}: {reason}")]
    InvalidLoadCommand { index: u32, reason: String },
    #[error("updated load commands do not fit in the header: {required} > {available} bytes")]
    InsufficientHeaderSpace { required: u64, available: u64 },
    #[error("io error: {0}")]
    IOError(IOError),
}
impl From<ReadError> for MachOError {
    fn from(error: ReadError) -> Self { MachOError::InvalidBytes(error) }
}
impl From<IOError> for MachOError {
    fn from(error: IOError) -> Self { MachOError::IOError(error) }
}

/// Errors that terminate the post-processing pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("build step failed to create the expected file '{0}'")]
    OutputMissing(PathBuf),
    #[error(transparent)]
    Icon(#[from] IconError),
    #[error(transparent)]
    Embed(#[from] EmbedError),
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error(transparent)]
    MachO(#[from] MachOError),
    #[error("io error on '{path}': {source}")]
    IOError { path: PathBuf, source: IOError },
}
