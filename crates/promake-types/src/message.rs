//! Structured diagnostics and the message sink consumed by the compiler and
//! the interpreter.
//!
//! There is no silent failure path: parse errors, evaluation errors,
//! built-in usage warnings and deprecation notices all flow through a
//! [`MessageHandler`] with file/line attribution.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Mutex;

/// Diagnostic severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// What produced the diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Malformed syntax; the document is marked invalid but parsing went on.
    Parse,
    /// An evaluation error (aborts the current block chain).
    Eval,
    /// Built-in argument/usage violation; the call yields its neutral value.
    Usage,
    /// Legacy variable name remapped (reported once per name).
    Deprecation,
}

/// A single diagnostic with source attribution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub kind: MessageKind,
    pub severity: Severity,
    /// Absolute path of the file being processed, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// 1-based line, 0 when no location applies.
    pub line: u32,
    pub text: String,
}

impl Message {
    pub fn new(kind: MessageKind, severity: Severity, text: impl Into<String>) -> Self {
        Message {
            kind,
            severity,
            file: None,
            line: 0,
            text: text.into(),
        }
    }

    pub fn at(mut self, file: impl Into<String>, line: u32) -> Self {
        self.file = Some(file.into());
        self.line = line;
        self
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.file, self.line) {
            (Some(file), line) if line > 0 => write!(f, "{file}:{line}: {}", self.text),
            (Some(file), _) => write!(f, "{file}: {}", self.text),
            _ => f.write_str(&self.text),
        }
    }
}

impl std::error::Error for Message {}

/// The sink for every diagnostic and user-visible message.
///
/// Handlers are shared by reference between the compiler, cache and
/// interpreter, so they take `&self`; implementations that accumulate use
/// interior mutability.
pub trait MessageHandler: Send + Sync {
    /// A structured diagnostic (parse/eval/usage/deprecation).
    fn message(&self, msg: &Message);

    /// Undecorated output from the `message()`/`log()`/`debug()` built-ins.
    fn file_message(&self, text: &str);
}

/// Prints diagnostics to stderr. The default handler of the facade.
#[derive(Debug, Default)]
pub struct StderrHandler;

impl MessageHandler for StderrHandler {
    fn message(&self, msg: &Message) {
        eprintln!("{msg}");
    }

    fn file_message(&self, text: &str) {
        eprintln!("{text}");
    }
}

/// Accumulates everything it is handed. Used throughout the test suites.
#[derive(Debug, Default)]
pub struct CollectingHandler {
    messages: Mutex<Vec<Message>>,
    file_messages: Mutex<Vec<String>>,
}

impl CollectingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.messages.lock().unwrap().clone()
    }

    pub fn file_messages(&self) -> Vec<String> {
        self.file_messages.lock().unwrap().clone()
    }

    pub fn has_errors(&self) -> bool {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .any(|m| m.severity == Severity::Error)
    }
}

impl MessageHandler for CollectingHandler {
    fn message(&self, msg: &Message) {
        self.messages.lock().unwrap().push(msg.clone());
    }

    fn file_message(&self, text: &str) {
        self.file_messages.lock().unwrap().push(text.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_location() {
        let msg = Message::new(MessageKind::Parse, Severity::Error, "unexpected '}'")
            .at("/src/app.pro", 12);
        assert_eq!(msg.to_string(), "/src/app.pro:12: unexpected '}'");
    }

    #[test]
    fn serializes_to_json() {
        let msg = Message::new(MessageKind::Usage, Severity::Warning, "join(var, glue) requires one to four arguments")
            .at("x.pro", 3);
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"kind\":\"usage\""));
        assert!(json.contains("\"severity\":\"warning\""));
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back.line, 3);
    }

    #[test]
    fn collecting_handler_accumulates() {
        let h = CollectingHandler::new();
        h.message(&Message::new(MessageKind::Eval, Severity::Error, "boom"));
        h.file_message("hello");
        assert!(h.has_errors());
        assert_eq!(h.file_messages(), vec!["hello".to_string()]);
    }
}
