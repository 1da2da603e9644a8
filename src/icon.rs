//! Icon handling: reading ICO containers, converting other image formats and
//! assembling the group icon and icon resources.
//!
//! See <https://learn.microsoft.com/en-us/previous-versions/ms997538(v=msdn.10)> for the ICO and group icon formats.

use std::{
    convert::Infallible,
    fmt,
    fs,
    io::{self, Read, Seek, SeekFrom},
    mem::size_of,
    path::{Path, PathBuf},
    str::FromStr,
};

use debug_ignore::DebugIgnore;
use log::{debug, info, warn};
use zerocopy::{
    byteorder::little_endian::U16,
    FromBytes, FromZeros, IntoBytes,
};

use crate::{constants::*, errors::*, resource::*, types::*, util::*};

const ICON_TYPE: u16 = 1;

/// Sequential reader for ICO containers.
pub struct IcoReader<R> {
    reader: R,
    path:   PathBuf,
}

impl<R: Read + Seek> IcoReader<R> {
    /// Create a reader over an ICO stream. The path is only used for error reporting.
    pub fn new<P: Into<PathBuf>>(reader: R, path: P) -> Self {
        Self {
            reader,
            path: path.into(),
        }
    }

    /// Read the icon directory header and advance the stream past it.
    ///
    /// # Returns
    /// Returns an error if the stream is truncated or the header does not describe an icon file.
    pub fn read_header(&mut self) -> Result<IconDirectoryHeader, IconError> {
        let header = self.read_struct::<IconDirectoryHeader>()?;
        if header.type_.get() != ICON_TYPE {
            return Err(IconError::InvalidHeader {
                path:   self.path.clone(),
                reason: format!("type is {}, expected {}", header.type_.get(), ICON_TYPE),
            });
        }
        if header.reserved.get() != 0 {
            warn!(
                "icon file '{}' has non-zero reserved header field {:#x}",
                self.path.display(),
                header.reserved.get()
            );
        }
        Ok(header)
    }

    /// Read `count` directory entries in file order.
    pub fn read_entries(&mut self, count: usize) -> Result<Vec<IconDirectoryEntry>, IconError> {
        (0..count).map(|_| self.read_struct::<IconDirectoryEntry>()).collect()
    }

    /// Read the raw image data an entry points to.
    /// The data is returned as stored, PNG or DIB images are not parsed.
    pub fn extract_image(&mut self, entry: &IconDirectoryEntry) -> Result<Vec<u8>, IconError> {
        let offset = entry.image_offset.get() as u64;
        let wanted = entry.bytes_in_res.get() as u64;
        self.reader.seek(SeekFrom::Start(offset))?;

        let mut image = Vec::with_capacity(wanted as usize);
        (&mut self.reader).take(wanted).read_to_end(&mut image)?;
        if (image.len() as u64) < wanted {
            return Err(IconError::Truncated {
                path: self.path.clone(),
                offset,
                wanted,
            });
        }
        Ok(image)
    }

    fn read_struct<T: FromBytes + IntoBytes>(&mut self) -> Result<T, IconError> {
        let offset = self.reader.stream_position()?;
        let mut value = T::new_zeroed();
        self.reader.read_exact(value.as_mut_bytes()).map_err(|error| {
            if error.kind() == io::ErrorKind::UnexpectedEof {
                IconError::Truncated {
                    path: self.path.clone(),
                    offset,
                    wanted: size_of::<T>() as u64,
                }
            } else {
                error.into()
            }
        })?;
        Ok(value)
    }
}

/// Selected images of a single ICO file.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct IconFile {
    pub path:    PathBuf,
    pub header:  IconDirectoryHeader,
    pub entries: Vec<IconDirectoryEntry>,
    pub images:  DebugIgnore<Vec<Vec<u8>>>,
}

impl IconFile {
    /// Read an ICO file from a stream, optionally keeping only the image at `index`.
    ///
    /// The index is checked against the number of entries before any image data is read.
    /// The header count is updated to the number of selected entries.
    pub fn read<R: Read + Seek>(
        reader: R, path: &Path, index: Option<usize>,
    ) -> Result<Self, IconError> {
        let mut reader = IcoReader::new(reader, path);
        let mut header = reader.read_header()?;
        let mut entries = reader.read_entries(header.count.get() as usize)?;

        if let Some(index) = index {
            if index >= entries.len() {
                return Err(IconError::IndexOutOfRange {
                    index,
                    path: path.to_path_buf(),
                    count: entries.len(),
                });
            }
            entries = vec![entries[index]];
        }
        header.count.set(entries.len() as u16);

        let images = entries
            .iter()
            .map(|entry| reader.extract_image(entry))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(
            "read {} icon image(s) from '{}': {:?}",
            images.len(),
            path.display(),
            images.iter().map(Vec::len).collect::<Vec<_>>()
        );

        Ok(Self {
            path: path.to_path_buf(),
            header,
            entries,
            images: images.into(),
        })
    }

    /// Open and read an ICO file, optionally keeping only the image at `index`.
    pub fn open<P: AsRef<Path>>(path: P, index: Option<usize>) -> Result<Self, IconError> {
        let path = path.as_ref();
        let file = io::BufReader::new(fs::File::open(path)?);
        Self::read(file, path, index)
    }

    pub fn len(&self) -> usize { self.entries.len() }

    pub fn is_empty(&self) -> bool { self.entries.is_empty() }
}

/// Source of icon image ids.
///
/// Ids start at 1 and increase by one for every image, across all icon sources of a run.
/// A fresh counter is used for every separately processed binary.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct IconIdCounter {
    next: u32,
}

impl Default for IconIdCounter {
    fn default() -> Self { Self { next: 1 } }
}

impl IconIdCounter {
    pub fn new() -> Self { Self::default() }

    /// Returns the id the next call to [`IconIdCounter::next_id`] will hand out.
    pub fn peek(&self) -> u32 { self.next }

    /// Take the next id.
    ///
    /// # Returns
    /// Returns an error once all 16 bit ids have been handed out.
    pub fn next_id(&mut self) -> Result<u16, IconError> {
        let id = u16::try_from(self.next).map_err(|_| IconError::IdsExhausted)?;
        self.next += 1;
        Ok(id)
    }
}

/// Convert icon directory entries into group entries, taking one id per entry from the counter.
pub fn group_entries(
    entries: &[IconDirectoryEntry], counter: &mut IconIdCounter,
) -> Result<Vec<IconGroupEntry>, IconError> {
    entries
        .iter()
        .map(|entry| {
            Ok(IconGroupEntry {
                width:        entry.width,
                height:       entry.height,
                color_count:  entry.color_count,
                reserved:     entry.reserved,
                planes:       entry.planes,
                bit_count:    entry.bit_count,
                bytes_in_res: entry.bytes_in_res,
                id:           U16::new(counter.next_id()?),
            })
        })
        .collect()
}

/// Serialize a group icon resource: the header followed by the packed group entries.
pub fn build_group_icon_payload(header: &IconDirectoryHeader, entries: &[IconGroupEntry]) -> Vec<u8> {
    let mut payload =
        Vec::with_capacity(size_of::<IconDirectoryHeader>() + entries.len() * size_of::<IconGroupEntry>());
    payload.extend_from_slice(header.as_bytes());
    for entry in entries {
        payload.extend_from_slice(entry.as_bytes());
    }
    payload
}

/// Parse a group icon resource into its header and entries.
pub fn parse_group_icon_payload(
    payload: &[u8],
) -> Result<(IconDirectoryHeader, Vec<IconGroupEntry>), IconError> {
    let header = read::<IconDirectoryHeader>(payload)?;
    let entries = (0..header.count.get() as usize)
        .map(|index| {
            read_at::<IconGroupEntry>(
                payload,
                size_of::<IconDirectoryHeader>() + index * size_of::<IconGroupEntry>(),
            )
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok((header, entries))
}

/// Icon resources hold the image data exactly as stored in the ICO file.
pub fn build_icon_payload(image: &[u8]) -> Vec<u8> { image.to_vec() }

/// Icon source as given on the command line: `path` or `path#index`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct IconSpec {
    pub path:  PathBuf,
    pub index: Option<usize>,
}

impl IconSpec {
    pub fn new<P: Into<PathBuf>>(path: P, index: Option<usize>) -> Self {
        Self {
            path: path.into(),
            index,
        }
    }

    /// Returns whether the source is an ICO file, judged by its extension.
    pub fn is_ico(&self) -> bool {
        self.path
            .extension()
            .is_some_and(|extension| extension.eq_ignore_ascii_case("ico"))
    }
}

impl FromStr for IconSpec {
    type Err = Infallible;

    /// A suffix after the last `#` is treated as an index only if it is a number.
    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        if let Some((path, index)) = spec.rsplit_once('#') {
            if let Ok(index) = index.parse::<usize>() {
                return Ok(Self::new(path, Some(index)));
            }
        }
        Ok(Self::new(spec, None))
    }
}

impl fmt::Display for IconSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(index) => write!(f, "{}#{}", self.path.display(), index),
            None => write!(f, "{}", self.path.display()),
        }
    }
}

/// Converts raster images into ICO files.
pub trait IconConverter {
    /// Decode the image at `source` and write it as an ICO file to `target`.
    fn convert(&self, source: &Path, target: &Path) -> Result<(), IconError>;
}

/// [`IconConverter`] backed by the `image` crate.
#[cfg(feature = "images")]
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageCrateConverter;

#[cfg(feature = "images")]
impl IconConverter for ImageCrateConverter {
    fn convert(&self, source: &Path, target: &Path) -> Result<(), IconError> {
        use ::image::{imageops::FilterType, DynamicImage, ImageError, ImageFormat};

        let decoded = ::image::ImageReader::open(source)?
            .with_guessed_format()?
            .decode()
            .map_err(|error| match error {
                ImageError::IoError(error) => IconError::IOError(error),
                ImageError::Unsupported(_) | ImageError::Decoding(_) => {
                    IconError::UnsupportedImageFormat {
                        path:   source.to_path_buf(),
                        reason: error.to_string(),
                    }
                }
                error => IconError::ConversionFailed {
                    path:   source.to_path_buf(),
                    reason: error.to_string(),
                },
            })?;

        // ICO images are limited to 256x256
        let decoded = if decoded.width() > 256 || decoded.height() > 256 {
            debug!(
                "resizing {}x{} image '{}' to fit an icon",
                decoded.width(),
                decoded.height(),
                source.display()
            );
            decoded.resize(256, 256, FilterType::Lanczos3)
        } else {
            decoded
        };

        DynamicImage::ImageRgba8(decoded.to_rgba8())
            .save_with_format(target, ImageFormat::Ico)
            .map_err(|error| IconError::ConversionFailed {
                path:   source.to_path_buf(),
                reason: error.to_string(),
            })
    }
}

/// Convert a non-ICO icon source into an ICO file at `<icons_dir>/icon-<n>.ico`,
/// `n` being the next image id of the counter.
///
/// # Returns
/// Returns the path of the written ICO file, or an error in the following cases:
/// - The source carries an index, which is only valid for ICO files.
/// - No converter is available.
/// - The converter cannot decode the source.
pub fn convert_icon(
    converter: Option<&dyn IconConverter>, spec: &IconSpec, icons_dir: &Path,
    counter: &IconIdCounter,
) -> Result<PathBuf, IconError> {
    if spec.index.is_some() {
        return Err(IconError::IndexWithoutIcoSource(spec.to_string()));
    }
    let Some(converter) = converter else {
        return Err(IconError::MissingDependency {
            dependency: "image",
            path:       spec.path.clone(),
        });
    };

    info!("icon '{}' is not in Windows icon format, converting it", spec);
    fs::create_dir_all(icons_dir)?;
    let target = icons_dir.join(format!("icon-{}.ico", counter.peek()));
    converter.convert(&spec.path, &target)?;
    Ok(target)
}

/// Icon images gathered from one or more sources, embedded as one group icon.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct IconSet {
    entries: Vec<IconGroupEntry>,
    images:  DebugIgnore<Vec<Vec<u8>>>,
}

impl IconSet {
    pub fn new() -> Self { Self::default() }

    /// Read all icon sources, converting non-ICO sources on the way.
    ///
    /// Indexes on non-ICO sources are rejected before any file is read.
    pub fn collect(
        specs: &[IconSpec], converter: Option<&dyn IconConverter>, icons_dir: &Path,
        counter: &mut IconIdCounter,
    ) -> Result<Self, IconError> {
        if let Some(spec) = specs.iter().find(|spec| !spec.is_ico() && spec.index.is_some()) {
            return Err(IconError::IndexWithoutIcoSource(spec.to_string()));
        }
        let mut set = Self::new();
        for spec in specs {
            let file = if spec.is_ico() {
                IconFile::open(&spec.path, spec.index)?
            } else {
                let converted = convert_icon(converter, spec, icons_dir, counter)?;
                IconFile::open(converted, None)?
            };
            info!("adding {} icon(s) from icon file '{}'", file.len(), spec);
            set.add_file(&file, counter)?;
        }
        Ok(set)
    }

    /// Add the selected images of an icon file, assigning ids from the counter.
    pub fn add_file(&mut self, file: &IconFile, counter: &mut IconIdCounter) -> Result<(), IconError> {
        self.entries.extend(group_entries(&file.entries, counter)?);
        self.images.extend(file.images.iter().map(|image| build_icon_payload(image)));
        Ok(())
    }

    pub fn len(&self) -> usize { self.entries.len() }

    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    /// Returns the group entries in the order they were added.
    pub fn entries(&self) -> &[IconGroupEntry] { &self.entries }

    /// Build the group icon resource followed by one icon resource per image, named by the image ids.
    pub fn records(&self) -> Vec<ResourceRecord> {
        let header = IconDirectoryHeader {
            reserved: U16::new(0),
            type_:    U16::new(ICON_TYPE),
            count:    U16::new(self.entries.len() as u16),
        };
        let mut records = Vec::with_capacity(self.entries.len() + 1);
        records.push(ResourceRecord::new(
            ResourceKind::GroupIcon,
            ICON_GROUP_ID,
            build_group_icon_payload(&header, &self.entries),
        ));
        for (entry, image) in self.entries.iter().zip(self.images.iter()) {
            records.push(ResourceRecord::new(ResourceKind::Icon, entry.id.get(), image.clone()));
        }
        records
    }
}
