//! The variable-map stack: one `BTreeMap` frame per nesting level.
//!
//! Frame 0 is the file/global scope; each user-defined function call pushes
//! a frame. Lookups fall through to outer frames, except the function-local
//! names (`ARGS`, `ARGC` and the positional `1..n` bindings), which resolve
//! in the top frame only so they can never leak between calls.

use promake_types::{ProKey, ProStringList};
use std::collections::BTreeMap;

pub(crate) type ValueMap = BTreeMap<ProKey, ProStringList>;

fn is_function_local(key: &ProKey) -> bool {
    let s = key.as_str();
    s == "ARGS" || s == "ARGC" || (!s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()))
}

pub(crate) struct ValueMapStack {
    frames: Vec<ValueMap>,
}

impl ValueMapStack {
    pub fn new() -> Self {
        ValueMapStack {
            frames: vec![ValueMap::new()],
        }
    }

    pub fn push(&mut self) {
        self.frames.push(ValueMap::new());
    }

    pub fn pop(&mut self) {
        debug_assert!(self.frames.len() > 1, "cannot pop the global frame");
        self.frames.pop();
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn values(&self, key: &ProKey) -> Option<&ProStringList> {
        if is_function_local(key) {
            return self.frames.last().and_then(|f| f.get(key));
        }
        self.frames.iter().rev().find_map(|f| f.get(key))
    }

    /// Writable access in the top frame, copying the nearest outer value in
    /// on first touch so `+=` and friends see what the caller sees. The copy
    /// is dropped with the frame unless `export()`ed.
    pub fn values_mut(&mut self, key: &ProKey) -> &mut ProStringList {
        let top = self.frames.len() - 1;
        if !self.frames[top].contains_key(key) {
            let inherited = if is_function_local(key) {
                None
            } else {
                self.frames[..top]
                    .iter()
                    .rev()
                    .find_map(|f| f.get(key))
                    .cloned()
            };
            self.frames[top].insert(key.clone(), inherited.unwrap_or_default());
        }
        self.frames[top]
            .get_mut(key)
            .unwrap_or_else(|| unreachable!("key inserted above"))
    }

    pub fn set(&mut self, key: ProKey, values: ProStringList) {
        if let Some(top) = self.frames.last_mut() {
            top.insert(key, values);
        }
    }

    /// Remove the binding from the top frame. Outer bindings become visible
    /// again, matching dynamic-scope shadowing.
    pub fn unset(&mut self, key: &ProKey) -> bool {
        self.frames
            .last_mut()
            .map_or(false, |f| f.remove(key).is_some())
    }

    pub fn is_set(&self, key: &ProKey) -> bool {
        self.values(key).is_some()
    }

    /// Write a value into the bottom (global) frame, as `export()` does.
    pub fn set_global(&mut self, key: ProKey, values: ProStringList) {
        self.frames[0].insert(key, values);
    }

    pub fn global_frame(&self) -> &ValueMap {
        &self.frames[0]
    }

    pub fn global_frame_mut(&mut self) -> &mut ValueMap {
        &mut self.frames[0]
    }

    /// All keys visible from the current frame, outermost first.
    pub fn visible_keys(&self) -> Vec<ProKey> {
        let mut keys: Vec<ProKey> = Vec::new();
        for frame in &self.frames {
            for key in frame.keys() {
                if !keys.contains(key) {
                    keys.push(key.clone());
                }
            }
        }
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use promake_types::ProString;

    fn key(s: &str) -> ProKey {
        ProKey::new(s)
    }

    fn list(items: &[&str]) -> ProStringList {
        items.iter().map(|s| ProString::from(*s)).collect()
    }

    #[test]
    fn lookups_fall_through_frames() {
        let mut stack = ValueMapStack::new();
        stack.set(key("A"), list(&["x"]));
        stack.push();
        assert_eq!(stack.values(&key("A")), Some(&list(&["x"])));
        stack.pop();
    }

    #[test]
    fn function_locals_never_fall_through() {
        let mut stack = ValueMapStack::new();
        stack.set(key("ARGS"), list(&["outer"]));
        stack.set(key("1"), list(&["outer"]));
        stack.push();
        assert_eq!(stack.values(&key("ARGS")), None);
        assert_eq!(stack.values(&key("1")), None);
        stack.pop();
        assert_eq!(stack.values(&key("ARGS")), Some(&list(&["outer"])));
    }

    #[test]
    fn mutation_in_frame_does_not_leak() {
        let mut stack = ValueMapStack::new();
        stack.set(key("V"), list(&["a"]));
        stack.push();
        stack.values_mut(&key("V")).push(ProString::from("b"));
        assert_eq!(stack.values(&key("V")), Some(&list(&["a", "b"])));
        stack.pop();
        assert_eq!(stack.values(&key("V")), Some(&list(&["a"])));
    }
}
