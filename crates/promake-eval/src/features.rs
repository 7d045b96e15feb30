//! Feature (`.prf`) and spec lookup.
//!
//! The root list is derived from `QMAKEFEATURES` (variable and environment),
//! `QMAKEPATH`, the build- and source-root `mkspecs` directories and the
//! active spec's own `features/` directory, each tried with
//! platform-suffixed subdirectories first. Roots and per-name resolutions
//! are memoized by the evaluator and invalidated when `QMAKESPEC` or
//! `QMAKE_PLATFORM` is reassigned.

use crate::options::GlobalOptions;
use crate::vfs::Vfs;
use promake_types::ProStringList;
use std::path::{Path, PathBuf};

#[cfg(windows)]
const PATH_LIST_SEP: char = ';';
#[cfg(not(windows))]
const PATH_LIST_SEP: char = ':';

fn split_path_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(PATH_LIST_SEP).filter(|s| !s.is_empty())
}

/// A features directory plus its platform-suffixed subdirectories, most
/// specific first.
fn push_feature_dirs(out: &mut Vec<PathBuf>, base: &Path, platforms: &[String]) {
    for platform in platforms {
        out.push(base.join(platform));
    }
    out.push(base.to_path_buf());
}

/// Compute the ordered feature search roots.
///
/// `qmakefeatures_var` and `platforms` come from the live variable stack
/// (`QMAKEFEATURES`, `QMAKE_PLATFORM`); `spec_dir` is the directory of the
/// loaded spec, when one is active.
pub(crate) fn feature_roots(
    options: &GlobalOptions,
    qmakefeatures_var: Option<&ProStringList>,
    platforms: &[String],
    spec_dir: Option<&Path>,
) -> Vec<PathBuf> {
    let mut roots: Vec<PathBuf> = Vec::new();

    if let Some(list) = qmakefeatures_var {
        for entry in list.iter() {
            roots.push(PathBuf::from(entry.as_str()));
        }
    }
    if let Some(env) = options.env_value("QMAKEFEATURES") {
        for entry in split_path_list(env) {
            roots.push(PathBuf::from(entry));
        }
    }
    if let Some(env) = options.env_value("QMAKEPATH") {
        for entry in split_path_list(env) {
            push_feature_dirs(
                &mut roots,
                &Path::new(entry).join("mkspecs").join("features"),
                platforms,
            );
        }
    }
    for tree in [&options.build_root, &options.source_root] {
        if !tree.as_os_str().is_empty() {
            push_feature_dirs(
                &mut roots,
                &tree.join("mkspecs").join("features"),
                platforms,
            );
        }
    }
    if let Some(spec) = spec_dir {
        push_feature_dirs(&mut roots, &spec.join("features"), platforms);
        // The mkspecs directory the spec lives in also carries features.
        if let Some(mkspecs) = spec.parent() {
            push_feature_dirs(&mut roots, &mkspecs.join("features"), platforms);
        }
    }
    if let Some(data) = options.property("QT_HOST_DATA") {
        push_feature_dirs(
            &mut roots,
            &Path::new(data).join("mkspecs").join("features"),
            platforms,
        );
    }

    roots.dedup();
    roots
}

/// Resolve a short feature name against the root list: `<root>/<name>.prf`,
/// accepting an explicit `.prf` suffix in the request.
pub(crate) fn resolve_feature(vfs: &Vfs<'_>, roots: &[PathBuf], name: &str) -> Option<PathBuf> {
    let file = if name.ends_with(".prf") {
        name.to_string()
    } else {
        format!("{name}.prf")
    };
    for root in roots {
        let candidate = root.join(&file);
        if vfs.exists(&candidate) {
            return Some(candidate);
        }
    }
    None
}

/// Resolve a spec name to its directory (containing `qmake.conf`).
/// Absolute paths are taken as-is; short names are searched under the
/// `mkspecs` directories of `QMAKEPATH`, the build/source roots and the
/// install location.
pub(crate) fn resolve_spec(
    options: &GlobalOptions,
    vfs: &Vfs<'_>,
    name: &str,
) -> Option<PathBuf> {
    let direct = Path::new(name);
    if direct.is_absolute() {
        return vfs
            .exists(&direct.join("qmake.conf"))
            .then(|| direct.to_path_buf());
    }
    let mut bases: Vec<PathBuf> = Vec::new();
    if let Some(env) = options.env_value("QMAKEPATH") {
        for entry in split_path_list(env) {
            bases.push(Path::new(entry).join("mkspecs"));
        }
    }
    for tree in [&options.build_root, &options.source_root] {
        if !tree.as_os_str().is_empty() {
            bases.push(tree.join("mkspecs"));
        }
    }
    if let Some(data) = options.property("QT_HOST_DATA") {
        bases.push(Path::new(data).join("mkspecs"));
    }
    for base in bases {
        let candidate = base.join(name);
        if vfs.exists(&candidate.join("qmake.conf")) {
            return Some(candidate);
        }
    }
    None
}
