//! Per-evaluation global configuration: an environment snapshot, the
//! active spec names, well-known file locations and queryable properties.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default)]
pub struct GlobalOptions {
    /// Snapshot of the process environment taken at construction, so one
    /// evaluation sees a stable view.
    environment: HashMap<String, String>,
    /// Target spec name or path (`QMAKESPEC` / `-spec`).
    pub qmakespec: String,
    /// Host spec name, used when a document opts into `option(host_build)`.
    pub host_spec: String,
    /// Root of the source tree being evaluated.
    pub source_root: PathBuf,
    /// Root of the (shadow) build tree; equals `source_root` for in-source
    /// builds.
    pub build_root: PathBuf,
    pub cache_file: Option<PathBuf>,
    pub stash_file: Option<PathBuf>,
    pub super_file: Option<PathBuf>,
    /// Install paths, versions and the like, answered by `$[name]`.
    properties: HashMap<String, String>,
}

impl GlobalOptions {
    /// Capture the live process environment.
    pub fn from_env() -> Self {
        let environment: HashMap<String, String> = std::env::vars().collect();
        let qmakespec = environment.get("QMAKESPEC").cloned().unwrap_or_default();
        GlobalOptions {
            environment,
            qmakespec,
            ..GlobalOptions::default()
        }
    }

    /// An empty environment, for hermetic tests.
    pub fn hermetic() -> Self {
        GlobalOptions::default()
    }

    pub fn with_spec(mut self, spec: impl Into<String>) -> Self {
        self.qmakespec = spec.into();
        self
    }

    pub fn with_roots(mut self, source: impl Into<PathBuf>, build: impl Into<PathBuf>) -> Self {
        self.source_root = source.into();
        self.build_root = build.into();
        self
    }

    pub fn set_env(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.environment.insert(name.into(), value.into());
    }

    pub fn env_value(&self, name: &str) -> Option<&str> {
        self.environment.get(name).map(String::as_str)
    }

    pub fn set_property(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(name.into(), value.into());
    }

    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(String::as_str)
    }

    /// Map a path under the source root to its build-root shadow, if the
    /// build is shadowed and the path is inside the source tree.
    pub fn shadowed_path(&self, path: &Path) -> Option<PathBuf> {
        if self.build_root.as_os_str().is_empty() || self.build_root == self.source_root {
            return None;
        }
        path.strip_prefix(&self.source_root)
            .ok()
            .map(|rel| self.build_root.join(rel))
    }
}
