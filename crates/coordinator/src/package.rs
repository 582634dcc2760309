//! Package Resolver seam.
//!
//! Resolution and storage of packages live outside the core. The core only
//! asks for `(id, version)` and degrades gracefully when nothing comes back.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use playpen_proto::PackageMeta;

/// A package as known to the resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    pub id: String,
    pub version: String,
    pub local_path: PathBuf,
    pub resolved: bool,
}

impl Package {
    pub fn resolved(
        id: impl Into<String>,
        version: impl Into<String>,
        local_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
            local_path: local_path.into(),
            resolved: true,
        }
    }

    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    #[must_use]
    pub fn meta(&self) -> PackageMeta {
        PackageMeta::new(self.id.clone(), self.version.clone())
    }

    /// Read the binary content from `local_path`.
    pub fn read_content(&self) -> io::Result<Vec<u8>> {
        fs::read(&self.local_path)
    }
}

/// Resolves a package identifier and version.
pub trait PackageResolver: Send + Sync {
    /// `None` when the package is unknown.
    fn resolve(&self, id: &str, version: &str) -> Option<Package>;
}

/// In-memory index of packages stored on local disk.
#[derive(Default)]
pub struct LocalPackageRepository {
    packages: RwLock<HashMap<(String, String), PathBuf>>,
}

impl LocalPackageRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: &str, version: &str, path: impl AsRef<Path>) {
        self.packages.write().insert(
            (id.to_string(), version.to_string()),
            path.as_ref().to_path_buf(),
        );
    }

    pub fn remove(&self, id: &str, version: &str) -> bool {
        self.packages
            .write()
            .remove(&(id.to_string(), version.to_string()))
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.packages.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.read().is_empty()
    }
}

impl PackageResolver for LocalPackageRepository {
    fn resolve(&self, id: &str, version: &str) -> Option<Package> {
        self.packages
            .read()
            .get(&(id.to_string(), version.to_string()))
            .map(|path| Package::resolved(id, version, path.clone()))
    }
}
