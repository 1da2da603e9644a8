//! Writing resources into executable files.
//!
//! Changes are collected in a [`ResourceUpdate`] and only reach the file on [`ResourceUpdate::commit`],
//! which replaces the file atomically.

use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::{errors::*, pe::*, resource::*};

/// Pending resource changes to a single executable file.
///
/// Dropping the update without committing it discards all changes.
#[derive(Debug)]
pub struct ResourceUpdate {
    path:      PathBuf,
    image:     PeImage<'static>,
    resources: ResourceDirectory,
    pending:   usize,
    finished:  bool,
}

impl ResourceUpdate {
    /// Open the resources of an executable for updating.
    ///
    /// # Returns
    /// Returns an error if the file does not exist or is not a valid portable executable.
    pub fn begin<P: AsRef<Path>>(path: P) -> Result<Self, EmbedError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(EmbedError::TargetMissing(path.to_path_buf()));
        }
        let image = PeImage::parse_file(path).map_err(|source| EmbedError::OpenResources {
            path: path.to_path_buf(),
            source,
        })?;
        let resources = image.resource_directory().cloned().unwrap_or_default();
        debug!(
            "opened resources of '{}' ({} resource types)",
            path.display(),
            resources.root().entries().len()
        );

        Ok(Self {
            path: path.to_path_buf(),
            image,
            resources,
            pending: 0,
            finished: false,
        })
    }

    /// Returns the resource directory including all pending changes.
    pub fn resources(&self) -> &ResourceDirectory { &self.resources }

    /// Returns the number of pending changes.
    pub fn pending(&self) -> usize { self.pending }

    /// Add a resource, replacing an existing one with the same type, name and language.
    ///
    /// # Returns
    /// Returns an error if the payload does not fit the 32 bit resource size field.
    pub fn add(&mut self, record: ResourceRecord) -> Result<(), EmbedError> {
        if u32::try_from(record.payload.len()).is_err() {
            return Err(EmbedError::ResourceTooLarge {
                kind: record.kind,
                name: record.name.to_string(),
                size: record.payload.len(),
            });
        }
        debug!(
            "adding {:?} resource {} ({} bytes, language {})",
            record.kind,
            record.name,
            record.payload.len(),
            record.language_id
        );
        if self.resources.insert_record(record)?.is_some() {
            debug!("replaced existing resource");
        }
        self.pending += 1;
        Ok(())
    }

    /// Copy all resources of the given kinds from another resource directory.
    ///
    /// # Returns
    /// Returns the number of copied resources.
    pub fn copy_from(
        &mut self, source: &ResourceDirectory, kinds: &[ResourceKind],
    ) -> Result<usize, EmbedError> {
        let copied = self.resources.copy_from(source, kinds)?;
        self.pending += copied;
        Ok(copied)
    }

    /// Write all pending changes to the file.
    ///
    /// # Returns
    /// Returns an error if the resource directory cannot be placed in the image or the file cannot be replaced.
    pub fn commit(mut self) -> Result<(), EmbedError> {
        self.finished = true;
        if self.pending == 0 {
            debug!("no resource changes for '{}'", self.path.display());
            return Ok(());
        }
        let resources = std::mem::take(&mut self.resources);
        let update_error = |source| EmbedError::UpdateResources {
            path: self.path.clone(),
            source,
        };
        self.image.set_resource_directory(resources).map_err(update_error)?;
        self.image.write_file(&self.path).map_err(update_error)?;
        debug!(
            "committed {} resource change(s) to '{}'",
            self.pending,
            self.path.display()
        );
        Ok(())
    }

    /// Drop all pending changes, leaving the file untouched.
    pub fn discard(mut self) {
        debug!(
            "discarding {} resource change(s) for '{}'",
            self.pending,
            self.path.display()
        );
        self.finished = true;
    }
}

impl Drop for ResourceUpdate {
    fn drop(&mut self) {
        if !self.finished && self.pending > 0 {
            debug!(
                "resource update for '{}' dropped without commit, discarding {} change(s)",
                self.path.display(),
                self.pending
            );
        }
    }
}

/// Add a single resource to an executable file.
pub fn add_resource_to_file<P: AsRef<Path>>(path: P, record: ResourceRecord) -> Result<(), EmbedError> {
    add_resources_to_file(path, [record])
}

/// Add several resources to an executable file in a single update.
pub fn add_resources_to_file<P: AsRef<Path>, I: IntoIterator<Item = ResourceRecord>>(
    path: P, records: I,
) -> Result<(), EmbedError> {
    let mut update = ResourceUpdate::begin(path)?;
    for record in records {
        update.add(record)?;
    }
    update.commit()
}

/// Read the resource directory of an executable file.
///
/// # Returns
/// Returns `None` if the executable has no resources.
pub fn read_resources<P: AsRef<Path>>(path: P) -> Result<Option<ResourceDirectory>, EmbedError> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(EmbedError::TargetMissing(path.to_path_buf()));
    }
    let image = PeImage::parse_file(path).map_err(|source| EmbedError::OpenResources {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(image.resource_directory().cloned())
}

/// Copy all resources of the given kinds from one executable file to another.
///
/// # Returns
/// Returns the number of copied resources. A source without matching resources copies nothing and is not an error.
pub fn copy_resources_from_file_to_file<S: AsRef<Path>, T: AsRef<Path>>(
    source: S, target: T, kinds: &[ResourceKind],
) -> Result<usize, EmbedError> {
    let Some(source_resources) = read_resources(source.as_ref())? else {
        info!("'{}' has no resources to copy", source.as_ref().display());
        return Ok(0);
    };
    let mut update = ResourceUpdate::begin(target)?;
    let copied = update.copy_from(&source_resources, kinds)?;
    update.commit()?;
    Ok(copied)
}
