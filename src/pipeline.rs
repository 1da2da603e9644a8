//! Post-processing of a freshly built binary.
//!
//! Runs the steps in a fixed order, each gated by platform and build kind:
//! Windows resources, Mach-O load paths, executable permissions and the wrapper script.

use std::{
    fmt, fs,
    path::{Path, PathBuf},
};

use log::{debug, info, warn};

#[cfg(feature = "images")]
use crate::icon::ImageCrateConverter;
use crate::{
    constants::*, errors::*, icon::*, macho::*, manifest::*, resource::*, version::*, writer::*,
};

/// File name of the constants blob inside the build directory.
pub const CONSTANTS_BLOB_NAME: &str = "__constants.bin";

/// Target platform of the built binary.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Platform {
    Windows,
    MacOs,
    Other,
}

impl Platform {
    /// Returns the platform this crate was compiled for.
    pub const fn current() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else if cfg!(target_os = "macos") {
            Platform::MacOs
        } else {
            Platform::Other
        }
    }
}

impl Default for Platform {
    fn default() -> Self { Self::current() }
}

/// Runtime the binary was built against.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct RuntimeInfo {
    /// `major.minor` version, e.g. `3.11`.
    pub version:        String,
    /// ABI flags appended to the library name, e.g. `d` for debug builds.
    pub abi:            String,
    /// Installation prefix containing `lib/`.
    pub prefix:         PathBuf,
    /// Runtime executable, the source of the manifest for version 2 runtimes.
    pub executable:     PathBuf,
    /// Directory containing the runtime DLL.
    pub dll_directory:  PathBuf,
    /// Whether the runtime is used from a location that is not installed system wide.
    pub uninstalled:    bool,
    /// Whether the runtime library is linked statically.
    pub static_runtime: bool,
}

impl RuntimeInfo {
    pub fn is_version_2(&self) -> bool { self.version.starts_with("2.") }

    /// Returns the file name of the shared runtime library on macOS.
    pub fn library_name(&self) -> String { format!("libpython{}{}.dylib", self.version, self.abi) }

    /// Returns the load path mapping pointing the binary to the runtime library of this installation.
    pub fn load_path_mapping(&self) -> LoadPathMapping {
        let library_directory = self.prefix.join("lib");
        let library_name = self.library_name();
        let library_path = library_directory.join(&library_name).to_string_lossy().into_owned();
        LoadPathMapping::new()
            .map(library_name, library_path.clone())
            .map(
                format!("@rpath/Python3.framework/Versions/{}/Python3", self.version),
                library_path,
            )
            .with_run_path(library_directory.to_string_lossy())
    }
}

/// Configuration of a post-processing run.
#[derive(Debug, Clone, Default)]
pub struct PostProcessingConfig {
    pub platform:          Platform,
    pub runtime:           RuntimeInfo,
    /// Binary produced by the build.
    pub output:            PathBuf,
    /// Build directory, holding the constants blob and receiving converted icons.
    pub build_dir:         PathBuf,
    /// Whether the output is an extension module rather than an executable.
    pub module:            bool,
    pub icons:             Vec<IconSpec>,
    /// Executable to copy icons from instead of using icon files.
    pub icon_template:     Option<PathBuf>,
    pub splash_screen:     Option<PathBuf>,
    pub version_info:      VersionInfoSpec,
    pub require_admin:     bool,
    pub require_ui_access: bool,
}

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Stage {
    BuildComplete,
    ResourcesAttached,
    PathsPatched,
    ExecutableFlagsFixed,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::BuildComplete => "build complete",
            Stage::ResourcesAttached => "resources attached",
            Stage::PathsPatched => "paths patched",
            Stage::ExecutableFlagsFixed => "executable flags fixed",
            Stage::Done => "done",
        };
        f.write_str(name)
    }
}

/// Resources written by [`PostProcessor::attach_resources`].
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct ResourcesReport {
    pub manifest:        bool,
    pub version_info:    bool,
    /// Icon images embedded from icon files.
    pub icons:           usize,
    /// Resources copied from the icon template, if one was given.
    pub template_copied: Option<usize>,
    pub splash_screen:   bool,
}

/// Outcome of a post-processing run.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct PostProcessingReport {
    pub resources:         Option<ResourcesReport>,
    pub constants_blob:    bool,
    pub load_paths:        Option<PatchReport>,
    pub permissions_fixed: bool,
    pub import_library:    Option<PathBuf>,
    pub wrapper_script:    Option<PathBuf>,
}

/// Runs the post-processing steps for one build.
pub struct PostProcessor<'a> {
    config:    &'a PostProcessingConfig,
    converter: Option<Box<dyn IconConverter + 'a>>,
    stage:     Stage,
}

impl fmt::Debug for PostProcessor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostProcessor")
            .field("config", self.config)
            .field("converter", &self.converter.is_some())
            .field("stage", &self.stage)
            .finish()
    }
}

impl<'a> PostProcessor<'a> {
    /// Create a post-processor using the default icon converter, if one is compiled in.
    pub fn new(config: &'a PostProcessingConfig) -> Self {
        #[cfg(feature = "images")]
        let converter: Option<Box<dyn IconConverter + 'a>> = Some(Box::new(ImageCrateConverter));
        #[cfg(not(feature = "images"))]
        let converter: Option<Box<dyn IconConverter + 'a>> = None;

        Self {
            config,
            converter,
            stage: Stage::BuildComplete,
        }
    }

    /// Replace the icon converter. `None` makes non-ICO icon sources fail.
    pub fn with_converter(mut self, converter: Option<Box<dyn IconConverter + 'a>>) -> Self {
        self.converter = converter;
        self
    }

    /// Returns the last completed stage.
    pub fn stage(&self) -> Stage { self.stage }

    /// Run all steps on the configured output.
    ///
    /// # Returns
    /// Returns a report of the applied changes, or the first error. Changes committed before the error are kept.
    pub fn run(&mut self) -> Result<PostProcessingReport, PipelineError> {
        let config = self.config;
        let output = config.output.as_path();
        if !output.is_file() {
            return Err(PipelineError::OutputMissing(output.to_path_buf()));
        }
        let mut report = PostProcessingReport::default();
        let windows = config.platform == Platform::Windows;

        if windows {
            if !config.module {
                let manifest = if config.runtime.is_version_2() {
                    Manifest::from_executable(&config.runtime.executable)?
                } else {
                    None
                };
                report.resources = Some(self.attach_resources(output, manifest)?);
            }
            self.attach_constants_blob(output)?;
            report.constants_blob = true;
        }
        self.advance(Stage::ResourcesAttached);

        if config.platform == Platform::MacOs && !config.module && !config.runtime.static_runtime {
            let mapping = config.runtime.load_path_mapping();
            report.load_paths = Some(patch_file(output, &mapping)?);
        }
        self.advance(Stage::PathsPatched);

        if config.module {
            if windows {
                report.import_library = remove_import_library(output)?;
            } else {
                remove_executable_permission(output)?;
                report.permissions_fixed = true;
            }
        }
        self.advance(Stage::ExecutableFlagsFixed);

        if windows && config.runtime.uninstalled {
            report.wrapper_script = Some(write_wrapper_script(output, &config.runtime.dll_directory)?);
        }
        self.advance(Stage::Done);

        Ok(report)
    }

    /// Attach manifest, version information, icons and splash screen to a binary.
    ///
    /// Used for the regular output and for onefile binaries alike, every call uses a fresh icon id counter.
    pub fn attach_resources(
        &self, target: &Path, manifest: Option<Manifest>,
    ) -> Result<ResourcesReport, PipelineError> {
        let config = self.config;
        let mut report = ResourcesReport::default();

        let mut manifest = manifest;
        if config.require_admin || config.require_ui_access {
            let manifest = manifest.get_or_insert_with(Manifest::default_manifest);
            if config.require_admin {
                manifest.require_admin_privilege();
            }
            if config.require_ui_access {
                manifest.require_ui_access();
            }
        }
        if let Some(manifest) = manifest {
            manifest.embed(target)?;
            report.manifest = true;
        }

        if !config.version_info.is_empty() {
            let spec = VersionInfoSpec {
                is_executable: !config.module,
                ..config.version_info.clone()
            };
            add_version_info_resource(target, &spec)?;
            report.version_info = true;
        }

        if let Some(template) = &config.icon_template {
            let copied = copy_resources_from_file_to_file(
                template,
                target,
                &[ResourceKind::Icon, ResourceKind::GroupIcon],
            )?;
            if copied == 0 {
                warn!(
                    "the icon template executable '{}' did not contain anything to copy",
                    template.display()
                );
            } else {
                info!("copied {} icon resource(s) from '{}'", copied, template.display());
            }
            report.template_copied = Some(copied);
        } else if !config.icons.is_empty() {
            let converter: Option<&dyn IconConverter> = match &self.converter {
                Some(converter) => Some(converter.as_ref()),
                None => None,
            };
            let mut counter = IconIdCounter::new();
            let icons = IconSet::collect(
                &config.icons,
                converter,
                &config.build_dir.join("icons"),
                &mut counter,
            )?;
            if !icons.is_empty() {
                add_resources_to_file(target, icons.records())?;
            }
            report.icons = icons.len();
        }

        if let Some(splash_screen) = &config.splash_screen {
            let data = fs::read(splash_screen).map_err(|source| PipelineError::IOError {
                path: splash_screen.clone(),
                source,
            })?;
            add_resource_to_file(
                target,
                ResourceRecord::new(ResourceKind::RawData, SPLASH_SCREEN_ID, data),
            )?;
            report.splash_screen = true;
        }

        Ok(report)
    }

    fn attach_constants_blob(&self, target: &Path) -> Result<(), PipelineError> {
        let path = self.config.build_dir.join(CONSTANTS_BLOB_NAME);
        let data = fs::read(&path).map_err(|source| PipelineError::IOError { path, source })?;
        debug!("attaching constants blob ({} bytes)", data.len());
        add_resource_to_file(
            target,
            ResourceRecord::new(ResourceKind::RawData, CONSTANTS_BLOB_ID, data),
        )?;
        Ok(())
    }

    fn advance(&mut self, stage: Stage) {
        debug!("post-processing stage: {}", stage);
        self.stage = stage;
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> PipelineError + '_ {
    move |source| PipelineError::IOError {
        path: path.to_path_buf(),
        source,
    }
}

/// Remove the import library the linker leaves next to a Windows module.
fn remove_import_library(output: &Path) -> Result<Option<PathBuf>, PipelineError> {
    let Some(stem) = output.file_stem() else {
        return Ok(None);
    };
    let candidate = output.with_file_name(format!("lib{}.a", stem.to_string_lossy()));
    if !candidate.exists() {
        return Ok(None);
    }
    fs::remove_file(&candidate).map_err(io_error(&candidate))?;
    debug!("removed import library '{}'", candidate.display());
    Ok(Some(candidate))
}

/// Modules are created executable by the build, which they should not be.
#[cfg(unix)]
fn remove_executable_permission(output: &Path) -> Result<(), PipelineError> {
    use std::os::unix::fs::PermissionsExt;

    let mut permissions = fs::metadata(output).map_err(io_error(output))?.permissions();
    permissions.set_mode(permissions.mode() & !0o111);
    fs::set_permissions(output, permissions).map_err(io_error(output))
}

#[cfg(not(unix))]
fn remove_executable_permission(output: &Path) -> Result<(), PipelineError> {
    debug!("no executable permission to remove on '{}'", output.display());
    Ok(())
}

/// Write `<stem>.cmd` next to the binary, putting the runtime DLL directory on `PATH` before running it.
fn write_wrapper_script(output: &Path, dll_directory: &Path) -> Result<PathBuf, PipelineError> {
    let exe_name = output
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let script_path = output.with_extension("cmd");
    let script = format!(
        "@echo off\r\n\
         rem This script was created to execute '{exe}' with the runtime DLL being found.\r\n\
         set PATH={dll};%PATH%\r\n\
         \"%~dp0.\\{exe}\"\r\n",
        exe = exe_name,
        dll = dll_directory.display(),
    );
    fs::write(&script_path, script).map_err(io_error(&script_path))?;
    info!("created wrapper script '{}'", script_path.display());
    Ok(script_path)
}
