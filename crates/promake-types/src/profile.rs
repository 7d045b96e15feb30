//! Compiled documents and source locations.

use crate::tokens::TokenReader;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A compiled project-file document.
///
/// Identified by its absolute path; owns the instruction words and the text
/// pool they reference. Immutable once built — the cache and every
/// interpreter frame that visits the file share one `Arc<ProFile>`, and the
/// document is dropped when the last handle goes away.
pub struct ProFile {
    file_name: PathBuf,
    directory: PathBuf,
    words: Vec<u16>,
    pool: Arc<str>,
    ok: bool,
    host_build: bool,
}

/// Shared handle to a compiled document.
pub type ProFileRef = Arc<ProFile>;

impl ProFile {
    pub fn new(
        file_name: PathBuf,
        words: Vec<u16>,
        pool: Arc<str>,
        ok: bool,
        host_build: bool,
    ) -> ProFileRef {
        let directory = file_name
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Arc::new(ProFile {
            file_name,
            directory,
            words,
            pool,
            ok,
            host_build,
        })
    }

    pub fn file_name(&self) -> &Path {
        &self.file_name
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// False when the compiler recorded parse errors for this document.
    pub fn is_ok(&self) -> bool {
        self.ok
    }

    /// Set by the file-scoped `option(host_build)` pragma.
    pub fn is_host_build(&self) -> bool {
        self.host_build
    }

    /// Cursor over the whole instruction stream.
    pub fn reader(&self) -> TokenReader<'_> {
        TokenReader::new(&self.words, &self.pool)
    }

    /// Cursor over `offset..offset + len` (a stored function body).
    pub fn reader_at(&self, offset: usize, len: usize) -> TokenReader<'_> {
        TokenReader::new(&self.words[offset..offset + len], &self.pool)
    }

    /// Raw words, exposed for determinism checks and the item-tree dump.
    pub fn words(&self) -> &[u16] {
        &self.words
    }
}

impl fmt::Debug for ProFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProFile")
            .field("file_name", &self.file_name)
            .field("ok", &self.ok)
            .field("words", &self.words.len())
            .finish()
    }
}

/// A (document, line) pair — the interpreter's current position, updated on
/// every `Line` opcode and attached to diagnostics.
#[derive(Clone, Default)]
pub struct ProFileLocation {
    pub pro: Option<ProFileRef>,
    pub line: u32,
}

impl ProFileLocation {
    pub fn new(pro: ProFileRef, line: u32) -> Self {
        ProFileLocation {
            pro: Some(pro),
            line,
        }
    }

    pub fn file_name(&self) -> Option<&Path> {
        self.pro.as_deref().map(ProFile::file_name)
    }
}

impl fmt::Debug for ProFileLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.pro {
            Some(pro) => write!(f, "{}:{}", pro.file_name().display(), self.line),
            None => write!(f, "<unknown>:{}", self.line),
        }
    }
}

/// A user-defined function: a body range inside its owning document.
///
/// Holding the document handle keeps the instruction words alive for as long
/// as the function is callable.
#[derive(Clone)]
pub struct ProFunctionDef {
    pro: ProFileRef,
    offset: usize,
    len: usize,
}

impl ProFunctionDef {
    pub fn new(pro: ProFileRef, offset: usize, len: usize) -> Self {
        ProFunctionDef { pro, offset, len }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn pro(&self) -> &ProFileRef {
        &self.pro
    }

    pub fn reader(&self) -> TokenReader<'_> {
        self.pro.reader_at(self.offset, self.len)
    }
}

impl fmt::Debug for ProFunctionDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ProFunctionDef({}+{}..{})",
            self.pro.file_name().display(),
            self.offset,
            self.offset + self.len
        )
    }
}
