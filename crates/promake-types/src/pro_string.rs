//! Interned strings for the promake data model.
//!
//! A [`ProString`] is an immutable view (offset + length) into shared backing
//! storage, so the many substrings produced while tokenizing a project file
//! all point into one allocation. A [`ProKey`] is a `ProString` that carries
//! its precomputed content hash; variable maps and the built-in dispatch
//! tables are keyed by `ProKey`.

use std::borrow::Borrow;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// 32-bit FNV-1a over the string's bytes.
///
/// This hash is part of the instruction-stream format: the compiler stores it
/// next to every `HashLiteral` operand and the interpreter uses the stored
/// value to build `ProKey`s without rehashing.
pub fn pro_hash(s: &str) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for b in s.as_bytes() {
        hash ^= u32::from(*b);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

/// An immutable, cheaply clonable string view over shared backing storage.
///
/// Equality, ordering and hashing are by content, never by identity.
#[derive(Clone)]
pub struct ProString {
    data: Arc<str>,
    offset: usize,
    len: usize,
}

impl ProString {
    /// An empty string (no allocation shared with anything).
    pub fn empty() -> Self {
        ProString {
            data: Arc::from(""),
            offset: 0,
            len: 0,
        }
    }

    /// Create a view into `data` covering `offset..offset + len`.
    ///
    /// The range must lie on UTF-8 character boundaries of `data`.
    pub fn view(data: Arc<str>, offset: usize, len: usize) -> Self {
        debug_assert!(data.get(offset..offset + len).is_some());
        ProString { data, offset, len }
    }

    pub fn as_str(&self) -> &str {
        &self.data[self.offset..self.offset + self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Convert into a pre-hashed map key.
    pub fn to_key(&self) -> ProKey {
        ProKey::from_string(self.clone())
    }

    /// Reinterpret the content as a signed integer, if it parses as one.
    pub fn to_int(&self) -> Option<i64> {
        self.as_str().trim().parse().ok()
    }
}

impl From<&str> for ProString {
    fn from(s: &str) -> Self {
        let len = s.len();
        ProString {
            data: Arc::from(s),
            offset: 0,
            len,
        }
    }
}

impl From<String> for ProString {
    fn from(s: String) -> Self {
        let len = s.len();
        ProString {
            data: Arc::from(s),
            offset: 0,
            len,
        }
    }
}

impl PartialEq for ProString {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for ProString {}

impl PartialEq<str> for ProString {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl PartialEq<&str> for ProString {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

impl PartialOrd for ProString {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ProString {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_str().cmp(other.as_str())
    }
}

impl Hash for ProString {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_str().hash(state);
    }
}

impl fmt::Display for ProString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for ProString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

/// A `ProString` with its content hash computed up front.
///
/// Used wherever a string acts as a lookup key: variable names, function
/// names, built-in dispatch. The stored hash is [`pro_hash`] of the content,
/// so keys reconstructed from `HashLiteral` stream operands agree with keys
/// built from plain text.
#[derive(Clone)]
pub struct ProKey {
    string: ProString,
    hash: u32,
}

impl ProKey {
    pub fn new(s: &str) -> Self {
        ProKey {
            string: ProString::from(s),
            hash: pro_hash(s),
        }
    }

    pub fn from_string(s: ProString) -> Self {
        let hash = pro_hash(s.as_str());
        ProKey { string: s, hash }
    }

    /// Build a key from a view plus the hash recorded in the instruction
    /// stream. Debug builds verify the recorded hash.
    pub fn with_hash(s: ProString, hash: u32) -> Self {
        debug_assert_eq!(hash, pro_hash(s.as_str()));
        ProKey { string: s, hash }
    }

    pub fn as_str(&self) -> &str {
        self.string.as_str()
    }

    pub fn hash_value(&self) -> u32 {
        self.hash
    }

    pub fn to_pro_string(&self) -> ProString {
        self.string.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.string.is_empty()
    }
}

impl From<&str> for ProKey {
    fn from(s: &str) -> Self {
        ProKey::new(s)
    }
}

impl PartialEq for ProKey {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.string == other.string
    }
}

impl Eq for ProKey {}

impl PartialOrd for ProKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ProKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.string.cmp(&other.string)
    }
}

impl Hash for ProKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u32(self.hash);
    }
}

impl Borrow<ProString> for ProKey {
    fn borrow(&self) -> &ProString {
        &self.string
    }
}

impl fmt::Display for ProKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for ProKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

/// An ordered list of interned strings — the value of a variable.
///
/// Insertion order is semantically significant.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ProStringList(pub Vec<ProString>);

impl ProStringList {
    pub fn new() -> Self {
        ProStringList(Vec::new())
    }

    pub fn one(s: ProString) -> Self {
        ProStringList(vec![s])
    }

    /// Split `text` on ASCII whitespace into separate elements.
    pub fn from_split(text: &str) -> Self {
        ProStringList(text.split_ascii_whitespace().map(ProString::from).collect())
    }

    pub fn join(&self, sep: &str) -> String {
        let mut out = String::new();
        for (i, s) in self.0.iter().enumerate() {
            if i > 0 {
                out.push_str(sep);
            }
            out.push_str(s.as_str());
        }
        out
    }

    pub fn contains_str(&self, needle: &str) -> bool {
        self.0.iter().any(|s| s.as_str() == needle)
    }

    /// Remove every occurrence of `needle`. Returns whether anything matched.
    pub fn remove_all(&mut self, needle: &str) -> bool {
        let before = self.0.len();
        self.0.retain(|s| s.as_str() != needle);
        self.0.len() != before
    }

    /// Remove empty elements (the `=` operator strips them).
    pub fn remove_empties(&mut self) {
        self.0.retain(|s| !s.is_empty());
    }

    /// Keep the first occurrence of each element, drop later duplicates.
    pub fn remove_duplicates(&mut self) {
        let mut seen = std::collections::BTreeSet::new();
        self.0.retain(|s| seen.insert(s.as_str().to_string()));
    }

    /// Append `s` unless an equal element is already present (`*=`).
    pub fn insert_unique(&mut self, s: ProString) {
        if !self.contains_str(s.as_str()) {
            self.0.push(s);
        }
    }
}

impl std::ops::Deref for ProStringList {
    type Target = Vec<ProString>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::ops::DerefMut for ProStringList {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl FromIterator<ProString> for ProStringList {
    fn from_iter<T: IntoIterator<Item = ProString>>(iter: T) -> Self {
        ProStringList(iter.into_iter().collect())
    }
}

impl IntoIterator for ProStringList {
    type Item = ProString;
    type IntoIter = std::vec::IntoIter<ProString>;
    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl fmt::Debug for ProStringList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.0.iter()).finish()
    }
}
