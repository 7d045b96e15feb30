//! Compiler front end for the promake project language: turns `.pro`,
//! `.pri` and `.prf` text into the position-independent instruction
//! streams consumed by `promake-eval`.

mod cache;
mod parser;

pub use cache::ProFileCache;
pub use parser::{Grammar, Parser};

use promake_types::ProFileRef;
use std::io;
use std::path::Path;

/// Source of file contents. The evaluator reads every document through
/// this trait so tests and embedders can substitute virtual files.
pub trait TextProvider: Send + Sync {
    fn read_text(&self, path: &Path) -> io::Result<String>;

    fn exists(&self, path: &Path) -> bool;
}

/// The real filesystem.
pub struct DiskProvider;

impl TextProvider for DiskProvider {
    fn read_text(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

impl<'h> Parser<'h> {
    /// Read and compile a document from `provider`. Returns `None` when the
    /// file cannot be read; a file that reads but fails to parse is still
    /// returned, marked not-ok.
    pub fn parse_file(&self, provider: &dyn TextProvider, path: &Path) -> Option<ProFileRef> {
        let text = provider.read_text(path).ok()?;
        Some(self.parse(path, &text, 1, Grammar::Full))
    }
}
