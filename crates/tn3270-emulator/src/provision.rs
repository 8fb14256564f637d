//! Binary provisioning.
//!
//! The emulator and its control client ship as platform-specific executable
//! assets. [`BinaryProvisioner`] writes them to a stable on-disk path once
//! per process and hands the cached path to every later caller. Extraction
//! is guarded by a single lock; the first caller writes, everyone else
//! reads. How the asset bytes are produced is pluggable through
//! [`AssetSource`].

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tn3270_common::{EmulatorError, EmulatorResult};
use tracing::debug;

/// Which executable a caller needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryKind {
    /// The terminal emulator itself (interactive or headless variant).
    Emulator,
    /// The control client that relays one scripting command per invocation.
    Control,
}

/// Produces raw executable bytes for a named asset.
///
/// Asset names are the bare binary names (`x3270`, `s3270`, `wc3270`,
/// `x3270if`), resolved per platform by the provisioner.
pub trait AssetSource: Send + Sync {
    fn lookup(&self, name: &str) -> EmulatorResult<Vec<u8>>;
}

/// Reads assets from `<root>/<os>/<name>` on disk.
///
/// The directory layout matches how the assets are bundled alongside the
/// binary: a `linux/` and a `windows/` subdirectory each holding the
/// executables for that platform.
pub struct DirAssetSource {
    root: PathBuf,
}

impl DirAssetSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn os_directory() -> &'static str {
        if cfg!(windows) {
            "windows"
        } else {
            "linux"
        }
    }
}

impl AssetSource for DirAssetSource {
    fn lookup(&self, name: &str) -> EmulatorResult<Vec<u8>> {
        let path = self.root.join(Self::os_directory()).join(name);
        std::fs::read(&path)
            .map_err(|e| EmulatorError::provision(name, format!("reading {}: {e}", path.display())))
    }
}

/// Extracts emulator executables to a temp directory and caches the paths.
pub struct BinaryProvisioner {
    source: Box<dyn AssetSource>,
    dir: PathBuf,
    headless: bool,
    cache: Mutex<HashMap<BinaryKind, PathBuf>>,
}

impl BinaryProvisioner {
    /// Creates a provisioner extracting into the system temp directory.
    pub fn new(source: Box<dyn AssetSource>, headless: bool) -> Self {
        Self::with_dir(source, headless, std::env::temp_dir())
    }

    /// Creates a provisioner extracting into `dir`.
    pub fn with_dir(source: Box<dyn AssetSource>, headless: bool, dir: impl Into<PathBuf>) -> Self {
        Self {
            source,
            dir: dir.into(),
            headless,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Whether the headless emulator variant is selected.
    pub fn headless(&self) -> bool {
        self.headless
    }

    /// Returns the on-disk path for `kind`, extracting the asset on the
    /// first call. The returned path exists, is executable, and is stable
    /// for the life of the process.
    pub fn ensure(&self, kind: BinaryKind) -> EmulatorResult<PathBuf> {
        let mut cache = self.cache.lock();
        if let Some(path) = cache.get(&kind) {
            return Ok(path.clone());
        }

        let name = self.binary_name(kind);
        let path = self.dir.join(Self::with_extension(name));
        if !path.exists() {
            let bytes = self.source.lookup(name)?;
            write_executable(&path, &bytes)
                .map_err(|e| EmulatorError::provision(name, e.to_string()))?;
            debug!(binary = name, path = %path.display(), "Extracted emulator binary");
        }

        cache.insert(kind, path.clone());
        Ok(path)
    }

    /// Selects the platform binary name for `kind`.
    fn binary_name(&self, kind: BinaryKind) -> &'static str {
        match kind {
            BinaryKind::Control => "x3270if",
            BinaryKind::Emulator => {
                if self.headless {
                    "s3270"
                } else if cfg!(windows) {
                    "wc3270"
                } else {
                    "x3270"
                }
            }
        }
    }

    fn with_extension(name: &str) -> String {
        if cfg!(windows) {
            format!("{name}.exe")
        } else {
            name.to_string()
        }
    }
}

fn write_executable(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    std::fs::write(path, bytes)?;
    #[cfg(unix)]
    {
        use std::fs::Permissions;
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, Permissions::from_mode(0o755))?;
    }
    Ok(())
}
