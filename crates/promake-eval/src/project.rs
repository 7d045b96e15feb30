//! The facade: compiler + cache + interpreter + resolver behind a small
//! query API, plus the shared cache of evaluated base contexts (spec +
//! host-build mode) so sibling projects do not re-evaluate `qmake.conf`.

use crate::error::EvalError;
use crate::evaluator::{Evaluator, LoadFlags};
use crate::options::GlobalOptions;
use crate::state::ValueMap;
use crate::vfs::Vfs;
use promake_parser::{DiskProvider, ProFileCache, TextProvider};
use promake_types::{MessageHandler, ProFunctionDef, ProKey, ProString, ProStringList};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};

/// Variables and functions established by the platform spec and
/// `default_pre` machinery, shared between evaluations.
pub struct BaseContext {
    pub(crate) values: ValueMap,
    pub(crate) test_functions: HashMap<ProKey, ProFunctionDef>,
    pub(crate) replace_functions: HashMap<ProKey, ProFunctionDef>,
    pub(crate) spec_dir: Option<PathBuf>,
}

enum Entry {
    InProgress,
    Ready(Arc<BaseContext>),
    Failed(String),
}

/// Keyed by (spec name, host-build flag). Concurrent requests for the same
/// key block until the first load finishes.
#[derive(Default)]
pub struct BaseContextCache {
    entries: Mutex<HashMap<(String, bool), Entry>>,
    cond: Condvar,
}

impl BaseContextCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn base_context<F>(
        &self,
        spec: &str,
        host_build: bool,
        load: F,
    ) -> Result<Arc<BaseContext>, EvalError>
    where
        F: FnOnce() -> Result<BaseContext, EvalError>,
    {
        let key = (spec.to_string(), host_build);
        let mut entries = self.entries.lock().unwrap();
        loop {
            match entries.get(&key) {
                Some(Entry::Ready(ctx)) => return Ok(ctx.clone()),
                Some(Entry::Failed(text)) => return Err(EvalError::Aborted(text.clone())),
                Some(Entry::InProgress) => {
                    entries = self.cond.wait(entries).unwrap();
                }
                None => break,
            }
        }
        entries.insert(key.clone(), Entry::InProgress);
        drop(entries);

        let result = load();

        let mut entries = self.entries.lock().unwrap();
        let out = match result {
            Ok(ctx) => {
                let ctx = Arc::new(ctx);
                entries.insert(key, Entry::Ready(ctx.clone()));
                Ok(ctx)
            }
            Err(e) => {
                entries.insert(key, Entry::Failed(e.to_string()));
                Err(e)
            }
        };
        self.cond.notify_all();
        out
    }

    pub fn discard_all(&self) {
        let mut entries = self.entries.lock().unwrap();
        while entries.values().any(|e| matches!(e, Entry::InProgress)) {
            entries = self.cond.wait(entries).unwrap();
        }
        entries.clear();
    }
}

/// The project kind named by `TEMPLATE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateType {
    Application,
    Library,
    Subdirs,
    Aux,
}

impl TemplateType {
    fn from_name(name: &str) -> Option<TemplateType> {
        match name {
            "app" | "vcapp" => Some(TemplateType::Application),
            "lib" | "vclib" => Some(TemplateType::Library),
            "subdirs" | "vcsubdirs" => Some(TemplateType::Subdirs),
            "aux" => Some(TemplateType::Aux),
            _ => None,
        }
    }
}

/// One evaluated project document and its resulting variable bindings.
pub struct Project {
    options: GlobalOptions,
    cache: ProFileCache,
    base_cache: BaseContextCache,
    vars: ValueMap,
    ok: bool,
}

impl Project {
    pub fn new(options: GlobalOptions) -> Self {
        Project {
            options,
            cache: ProFileCache::new(),
            base_cache: BaseContextCache::new(),
            vars: ValueMap::new(),
            ok: false,
        }
    }

    /// Parse and evaluate `path`, replacing this project's bindings with
    /// the result. Returns false when the file cannot be read or parsed.
    pub fn accept(
        &mut self,
        path: &Path,
        flags: LoadFlags,
        handler: &dyn MessageHandler,
    ) -> Result<bool, EvalError> {
        self.accept_with(&DiskProvider, path, flags, handler)
    }

    pub fn accept_with(
        &mut self,
        provider: &dyn TextProvider,
        path: &Path,
        flags: LoadFlags,
        handler: &dyn MessageHandler,
    ) -> Result<bool, EvalError> {
        let vfs = Vfs::new(provider);
        let mut ev = Evaluator::new(&self.options, handler, &vfs, &self.cache);
        let Some(pro) = ev.parse_cached(path) else {
            return Ok(false);
        };
        if !pro.is_ok() {
            return Ok(false);
        }
        let visit = ev.evaluate_project(&pro, flags, Some(&self.base_cache))?;
        self.vars = ev.stack.global_frame().clone();
        self.ok = visit.as_bool();
        Ok(self.ok)
    }

    pub fn is_ok(&self) -> bool {
        self.ok
    }

    pub fn values(&self, name: &str) -> ProStringList {
        self.vars
            .get(&ProKey::new(name))
            .cloned()
            .unwrap_or_default()
    }

    pub fn first(&self, name: &str) -> Option<ProString> {
        self.vars
            .get(&ProKey::new(name))
            .and_then(|l| l.first().cloned())
    }

    pub fn contains(&self, name: &str, value: &str) -> bool {
        self.vars
            .get(&ProKey::new(name))
            .map_or(false, |l| l.contains_str(value))
    }

    /// `TEMPLATE`'s project kind; an absent or unrecognized value defaults
    /// to an application, like the original tool.
    pub fn template_type(&self) -> TemplateType {
        self.first("TEMPLATE")
            .and_then(|t| TemplateType::from_name(t.as_str()))
            .unwrap_or(TemplateType::Application)
    }

    /// Drop all cached documents and base contexts.
    pub fn discard_caches(&self) {
        self.cache.discard_all();
        self.base_cache.discard_all();
    }
}
