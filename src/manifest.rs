//! Application manifest handling.
//!
//! The manifest is kept as XML text. Privilege requirements are applied while serializing,
//! by rewriting or inserting the `trustInfo/security/requestedPrivileges/requestedExecutionLevel` element.

use std::path::Path;

use log::{debug, info};
use quick_xml::{
    events::{BytesEnd, BytesStart, Event},
    Reader, Writer,
};

use crate::{constants::*, errors::*, resource::*, writer::*};

const DEFAULT_MANIFEST: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<assembly xmlns="urn:schemas-microsoft-com:asm.v1" manifestVersion="1.0">
  <trustInfo xmlns="urn:schemas-microsoft-com:asm.v3">
    <security>
      <requestedPrivileges>
        <requestedExecutionLevel level="asInvoker" uiAccess="false"/>
      </requestedPrivileges>
    </security>
  </trustInfo>
  <compatibility xmlns="urn:schemas-microsoft-com:compatibility.v1">
    <application>
      <supportedOS Id="{e2011457-1546-43c5-a5fe-008deee3d3f0}"/>
      <supportedOS Id="{35138b9a-5d96-4fbd-8e2d-a2440225f93a}"/>
      <supportedOS Id="{4a2f28e3-53b9-4441-ba9c-d69d4a4a6e38}"/>
      <supportedOS Id="{1f676c76-80e1-4239-95bb-83d0f6d0da78}"/>
      <supportedOS Id="{8e0f7a12-bfb3-4fe8-b9a5-48fd50a15a9a}"/>
    </application>
  </compatibility>
</assembly>
"#;

const TRUST_INFO_NAMESPACE: &str = "urn:schemas-microsoft-com:asm.v3";
const EXECUTION_LEVEL: &[u8] = b"requestedExecutionLevel";

/// Application manifest with privilege requirements.
///
/// Privilege requirements can only be added, never removed.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Manifest {
    source:            String,
    require_admin:     bool,
    require_ui_access: bool,
}

impl Manifest {
    /// Returns the manifest used for executables that do not bring their own.
    pub fn default_manifest() -> Self {
        Self {
            source:            DEFAULT_MANIFEST.to_string(),
            require_admin:     false,
            require_ui_access: false,
        }
    }

    /// Parse a manifest from XML text.
    ///
    /// # Returns
    /// Returns an error if the text is not well formed XML or has no `assembly` root element.
    pub fn parse<S: AsRef<str>>(text: S) -> Result<Self, ManifestError> {
        let text = text.as_ref().trim_start_matches('\u{feff}').trim_end_matches('\0');
        let mut reader = Reader::from_str(text);
        loop {
            match reader.read_event()? {
                Event::Start(element) | Event::Empty(element) => {
                    if element.local_name().as_ref() != b"assembly" {
                        return Err(ManifestError::MissingAssembly);
                    }
                    break;
                }
                Event::Eof => return Err(ManifestError::MissingAssembly),
                _ => {}
            }
        }
        // check the remaining document for well-formedness
        while !matches!(reader.read_event()?, Event::Eof) {}

        Ok(Self {
            source:            text.to_string(),
            require_admin:     false,
            require_ui_access: false,
        })
    }

    /// Read the manifest resource of an executable file.
    ///
    /// # Returns
    /// Returns `None` if the executable has no manifest.
    pub fn from_executable<P: AsRef<Path>>(path: P) -> Result<Option<Self>, ManifestError> {
        let path = path.as_ref();
        let Some(resources) = read_resources(path)? else {
            return Ok(None);
        };
        let Some(data) = resources.manifest() else {
            debug!("'{}' has no manifest resource", path.display());
            return Ok(None);
        };
        let data = data.strip_prefix(b"\xef\xbb\xbf").unwrap_or(data);
        info!("using manifest of '{}'", path.display());
        Self::parse(std::str::from_utf8(data)?).map(Some)
    }

    /// Request the executable to run with administrator privileges.
    pub fn require_admin_privilege(&mut self) { self.require_admin = true; }

    /// Request the executable to be allowed to drive the UI of elevated applications.
    pub fn require_ui_access(&mut self) { self.require_ui_access = true; }

    pub fn requires_admin_privilege(&self) -> bool { self.require_admin }

    pub fn requires_ui_access(&self) -> bool { self.require_ui_access }

    /// Serialize the manifest with all privilege requirements applied.
    pub fn to_xml(&self) -> Result<String, ManifestError> {
        if !self.require_admin && !self.require_ui_access {
            return Ok(self.source.clone());
        }

        let mut reader = Reader::from_str(&self.source);
        let mut writer = Writer::new(Vec::with_capacity(self.source.len() + 256));
        let mut depth = 0usize;
        let mut found_execution_level = false;

        loop {
            match reader.read_event()? {
                Event::Eof => break,
                Event::Start(element) => {
                    if depth == 0 && element.local_name().as_ref() != b"assembly" {
                        return Err(ManifestError::MissingAssembly);
                    }
                    depth += 1;
                    if element.local_name().as_ref() == EXECUTION_LEVEL {
                        found_execution_level = true;
                        writer.write_event(Event::Start(self.execution_level(&element)?))?;
                    } else {
                        writer.write_event(Event::Start(element))?;
                    }
                }
                Event::Empty(element) => {
                    if depth == 0 {
                        if element.local_name().as_ref() != b"assembly" {
                            return Err(ManifestError::MissingAssembly);
                        }
                        let name = String::from_utf8_lossy(element.name().as_ref()).into_owned();
                        writer.write_event(Event::Start(element))?;
                        self.write_trust_info(&mut writer)?;
                        writer.write_event(Event::End(BytesEnd::new(name)))?;
                        found_execution_level = true;
                    } else if element.local_name().as_ref() == EXECUTION_LEVEL {
                        found_execution_level = true;
                        writer.write_event(Event::Empty(self.execution_level(&element)?))?;
                    } else {
                        writer.write_event(Event::Empty(element))?;
                    }
                }
                Event::End(element) => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 && !found_execution_level {
                        debug!("manifest has no requested execution level, adding trust info");
                        self.write_trust_info(&mut writer)?;
                        found_execution_level = true;
                    }
                    writer.write_event(Event::End(element))?;
                }
                event => writer.write_event(event)?,
            }
        }

        let xml = String::from_utf8(writer.into_inner()).map_err(|error| error.utf8_error())?;
        Ok(xml)
    }

    /// Serialize the manifest and add it as manifest resource to an executable file.
    pub fn embed<P: AsRef<Path>>(&self, path: P) -> Result<(), ManifestError> {
        let xml = self.to_xml()?;
        debug!(
            "embedding manifest (admin: {}, ui access: {})",
            self.require_admin, self.require_ui_access
        );
        add_resource_to_file(
            path,
            ResourceRecord::new(ResourceKind::Manifest, MANIFEST_ID, xml.into_bytes()),
        )?;
        Ok(())
    }

    fn execution_level(&self, element: &BytesStart) -> Result<BytesStart<'static>, ManifestError> {
        let mut rewritten =
            BytesStart::new(String::from_utf8_lossy(element.name().as_ref()).into_owned());
        for attribute in element.attributes() {
            let attribute = attribute?;
            let key = attribute.key.local_name();
            if (self.require_admin && key.as_ref() == b"level")
                || (self.require_ui_access && key.as_ref() == b"uiAccess")
            {
                continue;
            }
            rewritten.push_attribute(attribute);
        }
        if self.require_admin {
            rewritten.push_attribute(("level", "requireAdministrator"));
        }
        if self.require_ui_access {
            rewritten.push_attribute(("uiAccess", "true"));
        }
        Ok(rewritten)
    }

    fn write_trust_info(&self, writer: &mut Writer<Vec<u8>>) -> Result<(), ManifestError> {
        let level = if self.require_admin { "requireAdministrator" } else { "asInvoker" };
        let ui_access = if self.require_ui_access { "true" } else { "false" };

        writer.write_event(Event::Start(
            BytesStart::new("trustInfo").with_attributes([("xmlns", TRUST_INFO_NAMESPACE)]),
        ))?;
        writer.write_event(Event::Start(BytesStart::new("security")))?;
        writer.write_event(Event::Start(BytesStart::new("requestedPrivileges")))?;
        writer.write_event(Event::Empty(
            BytesStart::new("requestedExecutionLevel")
                .with_attributes([("level", level), ("uiAccess", ui_access)]),
        ))?;
        writer.write_event(Event::End(BytesEnd::new("requestedPrivileges")))?;
        writer.write_event(Event::End(BytesEnd::new("security")))?;
        writer.write_event(Event::End(BytesEnd::new("trustInfo")))?;
        Ok(())
    }
}

impl Default for Manifest {
    fn default() -> Self { Self::default_manifest() }
}
