//! Dynamically loaded modules contributing node classes at run time.
//!
//! A module is a zip archive laid out as
//! `<name>/module.json` plus `<name>/<platform>/<arch>/<name>.<dll-ext>`.
//! Loading extracts the archive to a scoped temporary directory, validates
//! the metadata, loads the shared library and calls its `RegisterModule`
//! entry point with the factory. Unloading calls `UnregisterModule`
//! best-effort and then releases the library handle unconditionally.

use crate::factory::NodeFactory;
use fluxcore::{FluxError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

/// Symbol called with the factory when the module is loaded.
pub const REGISTER_MODULE_SYMBOL: &[u8] = b"RegisterModule";

/// Symbol called with the factory when the module is unloaded.
pub const UNREGISTER_MODULE_SYMBOL: &[u8] = b"UnregisterModule";

/// Signature of both module entry points.
pub type ModuleEntryFn = unsafe extern "C" fn(&NodeFactory);

/// The `module.json` descriptor inside a module archive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleMetadata {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Version")]
    pub version: String,
    #[serde(rename = "Author")]
    pub author: String,
    #[serde(rename = "Description")]
    pub description: String,
}

impl ModuleMetadata {
    /// Parses and validates a descriptor: all four keys present as strings,
    /// version strictly `MAJOR.MINOR.PATCH`.
    pub fn parse(payload: &serde_json::Value) -> Result<Self> {
        let metadata: ModuleMetadata = serde_json::from_value(payload.clone()).map_err(|error| {
            FluxError::InvalidArgument(format!("not a valid module descriptor: {error}"))
        })?;
        metadata.validate()?;
        Ok(metadata)
    }

    pub fn validate(&self) -> Result<()> {
        static VERSION_PATTERN: OnceLock<Regex> = OnceLock::new();
        let pattern = VERSION_PATTERN.get_or_init(|| {
            Regex::new(r"^(0|[1-9]\d*)\.(0|[1-9]\d*)\.(0|[1-9]\d*)$").expect("version pattern")
        });

        if !pattern.is_match(&self.version) {
            return Err(FluxError::InvalidArgument(format!(
                "version `{}` is not in MAJOR.MINOR.PATCH form",
                self.version
            )));
        }
        Ok(())
    }
}

/// The platform directory this build looks for inside module archives.
pub fn platform_dir() -> &'static str {
    if cfg!(target_os = "windows") {
        "windows"
    } else if cfg!(target_os = "macos") {
        "macos"
    } else {
        "linux"
    }
}

/// The architecture directory this build looks for inside module archives.
pub fn arch_dir() -> &'static str {
    if cfg!(target_arch = "x86_64") {
        "x86_64"
    } else if cfg!(target_arch = "aarch64") {
        "arm64"
    } else {
        "x86"
    }
}

struct LoadedModule {
    library: libloading::Library,
    // Keeps the extracted archive alive for as long as the binary is mapped.
    _extracted: tempfile::TempDir,
}

/// A loadable module bound to a factory.
pub struct Module {
    factory: Arc<NodeFactory>,
    metadata: Option<ModuleMetadata>,
    loaded: Option<LoadedModule>,
}

impl Module {
    pub fn new(factory: Arc<NodeFactory>) -> Self {
        Self {
            factory,
            metadata: None,
            loaded: None,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.is_some()
    }

    pub fn metadata(&self) -> Option<&ModuleMetadata> {
        self.metadata.as_ref()
    }

    /// Loads a module archive. Returns `Ok(false)` when this instance
    /// already holds a loaded module.
    pub fn load(&mut self, archive: &Path) -> Result<bool> {
        if self.loaded.is_some() {
            return Ok(false);
        }

        let extracted = tempfile::tempdir()
            .map_err(|error| FluxError::ModuleLoad(format!("cannot create extraction dir: {error}")))?;

        let file = std::fs::File::open(archive).map_err(|error| {
            FluxError::ModuleLoad(format!("cannot open `{}`: {error}", archive.display()))
        })?;
        let mut zip = zip::ZipArchive::new(file).map_err(|error| {
            FluxError::ModuleLoad(format!(
                "`{}` is not a readable module archive: {error}",
                archive.display()
            ))
        })?;
        zip.extract(extracted.path()).map_err(|error| {
            FluxError::ModuleLoad(format!("failed to extract module archive: {error}"))
        })?;

        let manifest = find_manifest(extracted.path())?;
        let manifest_file = std::fs::File::open(&manifest)?;
        let payload: serde_json::Value = serde_json::from_reader(manifest_file)
            .map_err(|error| FluxError::BadPayload(format!("malformed module.json: {error}")))?;
        let metadata = ModuleMetadata::parse(&payload)?;

        let module_dir = manifest.parent().unwrap_or(extracted.path());
        let binary = binary_path(module_dir, &metadata.name)?;

        let library = unsafe { libloading::Library::new(&binary) }.map_err(|error| {
            FluxError::ModuleLoad(format!(
                "failed to load module binary `{}`: {error}",
                binary.display()
            ))
        })?;

        unsafe {
            let register: libloading::Symbol<ModuleEntryFn> =
                library.get(REGISTER_MODULE_SYMBOL).map_err(|error| {
                    FluxError::ModuleLoad(format!(
                        "module `{}` does not export RegisterModule: {error}",
                        metadata.name
                    ))
                })?;
            register(self.factory.as_ref());
        }

        tracing::info!(module = %metadata.name, version = %metadata.version, "loaded module");
        self.metadata = Some(metadata);
        self.loaded = Some(LoadedModule {
            library,
            _extracted: extracted,
        });
        Ok(true)
    }

    /// Unloads the module. Returns `false` when nothing is loaded.
    ///
    /// `UnregisterModule` failures are logged and never prevent the library
    /// handle from being released.
    pub fn unload(&mut self) -> bool {
        let Some(loaded) = self.loaded.take() else {
            return false;
        };

        unsafe {
            match loaded.library.get::<ModuleEntryFn>(UNREGISTER_MODULE_SYMBOL) {
                Ok(unregister) => unregister(self.factory.as_ref()),
                Err(error) => {
                    tracing::warn!(%error, "module does not export UnregisterModule");
                }
            }
        }

        if let Some(metadata) = &self.metadata {
            tracing::info!(module = %metadata.name, "unloaded module");
        }
        // Dropping `loaded` releases the library and the extraction dir.
        true
    }
}

impl Drop for Module {
    fn drop(&mut self) {
        self.unload();
    }
}

fn find_manifest(root: &Path) -> Result<PathBuf> {
    for entry in std::fs::read_dir(root)? {
        let path = entry?.path();
        if path.is_dir() {
            let candidate = path.join("module.json");
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
    }

    let bare = root.join("module.json");
    if bare.is_file() {
        return Ok(bare);
    }

    Err(FluxError::ModuleLoad(
        "archive does not contain a module.json".into(),
    ))
}

fn binary_path(module_dir: &Path, name: &str) -> Result<PathBuf> {
    let dir = module_dir.join(platform_dir()).join(arch_dir());
    let extension = std::env::consts::DLL_EXTENSION;

    for file_name in [format!("{name}.{extension}"), format!("lib{name}.{extension}")] {
        let candidate = dir.join(&file_name);
        if candidate.is_file() {
            return Ok(candidate);
        }
    }

    Err(FluxError::ModuleLoad(format!(
        "module binary not found under `{}`",
        dir.display()
    )))
}
