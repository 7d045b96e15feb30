//! Filesystem access for the interpreter: a thin overlay over a
//! [`TextProvider`] that keeps transient writes in memory and skips real
//! writes whose content is already up to date.

use promake_parser::TextProvider;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteFlags {
    pub append: bool,
    /// Mark the written file executable (no-op on non-unix targets).
    pub executable: bool,
    /// Keep the content in the in-memory overlay only.
    pub transient: bool,
}

impl Default for WriteFlags {
    fn default() -> Self {
        WriteFlags {
            append: false,
            executable: false,
            transient: false,
        }
    }
}

pub struct Vfs<'a> {
    provider: &'a dyn TextProvider,
    overlay: Mutex<HashMap<PathBuf, String>>,
}

impl<'a> Vfs<'a> {
    pub fn new(provider: &'a dyn TextProvider) -> Self {
        Vfs {
            provider,
            overlay: Mutex::new(HashMap::new()),
        }
    }

    pub fn exists(&self, path: &Path) -> bool {
        if self.overlay.lock().unwrap().contains_key(path) {
            return true;
        }
        self.provider.exists(path)
    }

    pub fn read_text(&self, path: &Path) -> io::Result<String> {
        if let Some(text) = self.overlay.lock().unwrap().get(path) {
            return Ok(text.clone());
        }
        self.provider.read_text(path)
    }

    /// Write `content`, creating parent directories as needed. An existing
    /// on-disk file with identical content is left untouched so timestamps
    /// stay stable.
    pub fn write_text(&self, path: &Path, content: &str, flags: WriteFlags) -> io::Result<()> {
        if flags.transient {
            let mut overlay = self.overlay.lock().unwrap();
            if flags.append {
                overlay.entry(path.to_path_buf()).or_default().push_str(content);
            } else {
                overlay.insert(path.to_path_buf(), content.to_string());
            }
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if flags.append {
            use std::io::Write;
            let mut f = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            f.write_all(content.as_bytes())?;
        } else {
            if let Ok(existing) = std::fs::read_to_string(path) {
                if existing == content {
                    self.set_executable(path, flags.executable)?;
                    return Ok(());
                }
            }
            std::fs::write(path, content)?;
        }
        self.set_executable(path, flags.executable)?;
        self.overlay.lock().unwrap().remove(path);
        Ok(())
    }

    #[cfg(unix)]
    fn set_executable(&self, path: &Path, executable: bool) -> io::Result<()> {
        if executable {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(path)?.permissions();
            perms.set_mode(perms.mode() | 0o111);
            std::fs::set_permissions(path, perms)?;
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn set_executable(&self, _path: &Path, _executable: bool) -> io::Result<()> {
        Ok(())
    }

    pub fn mkpath(&self, path: &Path) -> io::Result<()> {
        std::fs::create_dir_all(path)
    }

    /// Update `path`'s modification time to match `reference` (or to now
    /// when no reference is given).
    pub fn touch(&self, path: &Path, reference: Option<&Path>) -> io::Result<()> {
        let time = match reference {
            Some(r) => std::fs::metadata(r)?.modified()?,
            None => std::time::SystemTime::now(),
        };
        let f = std::fs::OpenOptions::new().write(true).open(path)?;
        f.set_modified(time)
    }

    /// Directory entries of `dir` whose names match `matcher`, in sorted
    /// order. `dirs_too` includes subdirectory names.
    pub fn list_matching(
        &self,
        dir: &Path,
        matcher: &regex::Regex,
        dirs_too: bool,
    ) -> Vec<PathBuf> {
        let mut out = Vec::new();
        let Ok(entries) = std::fs::read_dir(dir) else {
            return out;
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            if (dirs_too || !is_dir) && matcher.is_match(name) {
                out.push(entry.path());
            }
        }
        out.sort();
        out
    }

    /// Subdirectories of `dir`, for recursive globbing.
    pub fn subdirs(&self, dir: &Path) -> Vec<PathBuf> {
        let mut out = Vec::new();
        let Ok(entries) = std::fs::read_dir(dir) else {
            return out;
        };
        for entry in entries.flatten() {
            if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                out.push(entry.path());
            }
        }
        out.sort();
        out
    }
}

/// Translate a shell-style wildcard (`*`, `?`, `[...]`) into an anchored
/// regex. Everything else is matched literally.
pub fn wildcard_regex(pattern: &str) -> Result<regex::Regex, regex::Error> {
    let mut re = String::with_capacity(pattern.len() + 8);
    re.push('^');
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            '[' => {
                re.push('[');
                if chars.peek() == Some(&'!') {
                    chars.next();
                    re.push('^');
                }
                for c in chars.by_ref() {
                    re.push(c);
                    if c == ']' {
                        break;
                    }
                }
            }
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    regex::Regex::new(&re)
}
