//! The promake compiler — a single-pass tokenizer/parser that turns project
//! text directly into an instruction stream. No AST is built.
//!
//! The scanner is line-oriented: each logical line (after comment stripping
//! and backslash continuation) is re-scanned character by character through
//! one of three contexts — test/LHS, value, and call arguments. Magic call
//! names (`for`, `defineTest`, `defineReplace`, `return`, `break`, `next`,
//! `option`) are rewritten into dedicated opcodes.
//!
//! Parsing never aborts: every error is reported through the message handler
//! with file/line attribution, the document is marked invalid, and emission
//! continues best-effort so later content (including a subsequent `else`)
//! still lands in the stream.

use promake_types::{
    LenSlot, Message, MessageHandler, MessageKind, Op, ProFile, ProFileRef, Severity, TokenWriter,
};
use std::path::Path;

/// Which sub-grammar to apply to the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grammar {
    /// A whole project file: statements, scopes, definitions.
    Full,
    /// A conditional snippet, as re-parsed from `if("...")` / `requires()`.
    /// Assignments are rejected.
    Test,
    /// A pure value list evaluated outside statement context.
    Value,
}

/// The compiler. Stateless between calls; one [`Compile`] is created per
/// input.
pub struct Parser<'h> {
    handler: &'h dyn MessageHandler,
}

impl<'h> Parser<'h> {
    pub fn new(handler: &'h dyn MessageHandler) -> Self {
        Parser { handler }
    }

    /// Compile `text` under `grammar`, attributing diagnostics to
    /// `file_name` starting at `start_line`.
    pub fn parse(
        &self,
        file_name: &Path,
        text: &str,
        start_line: u32,
        grammar: Grammar,
    ) -> ProFileRef {
        let mut c = Compile::new(self.handler, file_name, grammar);
        c.run(text, start_line);
        c.finish(file_name)
    }
}

/// What ended a value scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VEnd {
    Eol,
    CloseParen,
    /// A `}` below brace depth zero — the enclosing scope closes.
    CloseBrace,
}

/// Value-scanning flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VMode {
    /// Call arguments: `,` separates arguments, `)` below depth ends the call.
    Args,
    /// A single raw argument region (`for` expression, `return` value):
    /// `)` ends it, `,` merely splits elements.
    RawArg,
    /// Assignment right-hand side: ends at EOL or an unbalanced `}`.
    Line,
    /// Whole-input value grammar: like `Line` but `}` is ordinary text.
    Plain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallCtx {
    /// Test/LHS context — magic names are recognized here.
    Test,
    /// Inside a value expression — always an expand call.
    Expand,
}

struct Scope {
    braced: bool,
    kind: ScopeKind,
}

enum ScopeKind {
    /// Inside a conditional's then-body.
    Branch { then_slot: LenSlot },
    /// Inside an `else` body; `slot` is the branch's else-length slot.
    Else { slot: LenSlot },
    Loop { body_slot: LenSlot },
    Func { body_slot: LenSlot },
}

struct Compile<'h> {
    handler: &'h dyn MessageHandler,
    file_display: String,
    grammar: Grammar,
    out: TokenWriter,
    line_no: u32,
    ok: bool,
    host_build: bool,
    scopes: Vec<Scope>,

    // Per-statement scanner state.
    buf: String,
    pending_word: Option<String>,
    guard_open: bool,
    last_was_operand: bool,
    operator_pending: bool,
    not_pending: bool,
    line_pending: bool,
    /// A just-closed branch whose else-length slot may still be patched.
    pending_else: Option<LenSlot>,
    /// A block scope was just opened and is still waiting to learn whether
    /// its body is braced (`{`) or single-line (`:` or bare statement).
    open_scope_pending: bool,
}

const ESCAPABLE: &[char] = &['[', ']', '{', '}', '(', ')', '$', '\\'];

fn is_word_char(c: char) -> bool {
    !matches!(
        c,
        ' ' | '\t' | '{' | '}' | ':' | '|' | '!' | '(' | ')' | ',' | '\'' | '"' | '\\' | '='
    )
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-'
}

impl<'h> Compile<'h> {
    fn new(handler: &'h dyn MessageHandler, file_name: &Path, grammar: Grammar) -> Self {
        Compile {
            handler,
            file_display: file_name.display().to_string(),
            grammar,
            out: TokenWriter::new(),
            line_no: 0,
            ok: true,
            host_build: false,
            scopes: Vec::new(),
            buf: String::new(),
            pending_word: None,
            guard_open: false,
            last_was_operand: false,
            operator_pending: false,
            not_pending: false,
            line_pending: true,
            pending_else: None,
            open_scope_pending: false,
        }
    }

    fn error(&mut self, text: impl Into<String>) {
        self.ok = false;
        self.handler.message(
            &Message::new(MessageKind::Parse, Severity::Error, text)
                .at(self.file_display.clone(), self.line_no),
        );
    }

    // ── Logical-line assembly ────────────────────────────────────────────

    fn run(&mut self, text: &str, start_line: u32) {
        let mut logical = String::new();
        let mut logical_start = 0u32;
        for (idx, raw) in text.lines().enumerate() {
            let line_no = start_line + idx as u32;
            let stripped = strip_comment(raw);
            let trimmed = stripped.trim_end();
            let trailing = trimmed.chars().rev().take_while(|&c| c == '\\').count();
            let continues = trailing % 2 == 1;
            let content = if continues {
                &trimmed[..trimmed.len() - 1]
            } else {
                trimmed
            };
            if logical.is_empty() {
                logical_start = line_no;
            } else {
                logical.push(' ');
            }
            logical.push_str(content);
            if !continues {
                self.line_no = logical_start;
                self.scan_line(&std::mem::take(&mut logical));
            }
        }
        if !logical.is_empty() {
            self.line_no = logical_start;
            let last = std::mem::take(&mut logical);
            self.scan_line(&last);
        }
    }

    fn finish(mut self, file_name: &Path) -> ProFileRef {
        if self.grammar == Grammar::Value {
            self.out.put_op(Op::ValueTerminator);
        }
        if self.scopes.iter().any(|s| s.braced) {
            self.error("missing closing brace(s)");
        }
        while let Some(scope) = self.scopes.pop() {
            self.close_scope(scope);
        }
        let (words, pool) = self.out.finish();
        ProFile::new(
            file_name.to_path_buf(),
            words,
            pool,
            self.ok,
            self.host_build,
        )
    }

    // ── Statement bookkeeping ────────────────────────────────────────────

    /// Emit the deferred `Line` opcode for the current statement. The first
    /// real token of any statement invalidates a still-patchable `else`.
    fn flush_line(&mut self) {
        if self.line_pending {
            self.line_pending = false;
            self.pending_else = None;
            self.out.put_line(self.line_no);
        }
    }

    fn reset_statement(&mut self) {
        self.buf.clear();
        self.pending_word = None;
        self.guard_open = false;
        self.last_was_operand = false;
        self.operator_pending = false;
        self.not_pending = false;
        self.line_pending = true;
    }

    /// Close the current word into `pending_word`; recognizes `else`.
    fn finalize_word(&mut self) {
        if self.buf.is_empty() {
            return;
        }
        if self.buf == "else" && !self.guard_open && self.pending_word.is_none() {
            self.buf.clear();
            self.handle_else();
            return;
        }
        if let Some(prev) = self.pending_word.clone() {
            let word = std::mem::take(&mut self.buf);
            self.error(format!("unexpected token '{word}' after '{prev}'"));
            return;
        }
        self.pending_word = Some(std::mem::take(&mut self.buf));
    }

    /// Emit a stashed bare word as a `Condition`.
    fn commit_pending_cond(&mut self) {
        if let Some(word) = self.pending_word.take() {
            self.flush_line();
            self.out.put_op(Op::Condition);
            self.out.put_hash_str(&word);
            self.guard_open = true;
            self.last_was_operand = true;
            self.operator_pending = false;
            self.not_pending = false;
        }
    }

    /// End a test statement that had no block: emit `Terminator` so the
    /// interpreter resets its guard accumulator.
    fn end_statement(&mut self) {
        if self.operator_pending {
            self.error("AND/OR operator with no following operand");
        }
        if self.not_pending {
            self.error("'!' with no following operand");
        }
        if self.guard_open {
            self.out.put_op(Op::Terminator);
        }
        self.guard_open = false;
        self.operator_pending = false;
        self.not_pending = false;
    }

    /// Wrap the rest of the statement in a single-line branch when guard
    /// conditions precede it (`win32:SOURCES += x`).
    fn wrap_if_guarded(&mut self) {
        self.operator_pending = false;
        if self.guard_open {
            self.flush_line();
            self.out.put_op(Op::Branch);
            let then_slot = self.out.open_block();
            self.scopes.push(Scope {
                braced: false,
                kind: ScopeKind::Branch { then_slot },
            });
            self.guard_open = false;
            self.last_was_operand = false;
        }
    }

    fn close_scope(&mut self, scope: Scope) {
        match scope.kind {
            ScopeKind::Branch { then_slot } => {
                self.out.close_block(then_slot);
                let else_slot = self.out.open_block();
                self.out.close_block(else_slot);
                self.pending_else = Some(else_slot);
            }
            ScopeKind::Else { slot } => {
                self.out.close_block(slot);
                self.pending_else = None;
            }
            ScopeKind::Loop { body_slot } | ScopeKind::Func { body_slot } => {
                self.out.close_block(body_slot);
                self.pending_else = None;
            }
        }
    }

    fn handle_else(&mut self) {
        match self.pending_else.take() {
            Some(slot) if self.out.block_body_start(slot) == self.out.len() => {
                self.scopes.push(Scope {
                    braced: false,
                    kind: ScopeKind::Else { slot },
                });
                self.open_scope_pending = true;
            }
            _ => self.error("'else' without prior condition"),
        }
    }

    fn in_loop(&self) -> bool {
        for scope in self.scopes.iter().rev() {
            match scope.kind {
                ScopeKind::Loop { .. } => return true,
                ScopeKind::Func { .. } => return false,
                _ => {}
            }
        }
        false
    }

    // ── Test/LHS context ─────────────────────────────────────────────────

    fn scan_line(&mut self, line: &str) {
        let chars: Vec<char> = line.chars().collect();
        let mut i = 0usize;

        if self.grammar == Grammar::Value {
            self.flush_line();
            self.scan_value(&chars, &mut i, VMode::Plain);
            self.line_pending = true;
            return;
        }

        let mut quote: Option<char> = None;
        while i < chars.len() {
            let c = chars[i];
            if let Some(q) = quote {
                if c == q {
                    quote = None;
                } else {
                    self.buf.push(c);
                }
                i += 1;
                continue;
            }
            match c {
                ' ' | '\t' => {
                    self.finalize_word();
                    i += 1;
                }
                '\'' | '"' => {
                    quote = Some(c);
                    i += 1;
                }
                '\\' => {
                    push_escaped(&mut self.buf, &chars, &mut i);
                }
                '{' => {
                    i += 1;
                    self.finalize_word();
                    if self.open_scope_pending {
                        self.open_scope_pending = false;
                        if let Some(top) = self.scopes.last_mut() {
                            top.braced = true;
                        }
                        continue;
                    }
                    self.commit_pending_cond();
                    self.operator_pending = false;
                    self.flush_line();
                    self.out.put_op(Op::Branch);
                    let then_slot = self.out.open_block();
                    self.scopes.push(Scope {
                        braced: true,
                        kind: ScopeKind::Branch { then_slot },
                    });
                    self.reset_statement();
                }
                '}' => {
                    i += 1;
                    self.finalize_word();
                    self.commit_pending_cond();
                    self.end_statement();
                    self.open_scope_pending = false;
                    loop {
                        match self.scopes.pop() {
                            None => {
                                self.error("unexpected '}'");
                                break;
                            }
                            Some(scope) => {
                                let braced = scope.braced;
                                self.close_scope(scope);
                                if braced {
                                    break;
                                }
                            }
                        }
                    }
                    self.reset_statement();
                }
                ':' | '|' => {
                    i += 1;
                    self.finalize_word();
                    if self.open_scope_pending && c == ':' {
                        self.open_scope_pending = false;
                        continue;
                    }
                    self.commit_pending_cond();
                    if !self.last_was_operand {
                        self.error(format!("'{c}' operator with no prior condition"));
                        continue;
                    }
                    self.out
                        .put_op(if c == ':' { Op::And } else { Op::Or });
                    self.last_was_operand = false;
                    self.operator_pending = true;
                }
                '!' => {
                    i += 1;
                    if !self.buf.is_empty() {
                        self.error("unexpected '!' inside a word");
                        continue;
                    }
                    self.finalize_word();
                    self.commit_pending_cond();
                    self.flush_line();
                    self.out.put_op(Op::Not);
                    self.not_pending = true;
                }
                '(' => {
                    i += 1;
                    self.finalize_word();
                    let name = match self.pending_word.take() {
                        Some(name) => name,
                        None => {
                            self.error("opening parenthesis without prior test name");
                            // Recover by skipping the argument list.
                            self.skip_parens(&chars, &mut i);
                            continue;
                        }
                    };
                    self.scan_call(&chars, &mut i, &name, CallCtx::Test, false);
                }
                ')' => {
                    i += 1;
                    self.error("unexpected closing parenthesis");
                }
                ',' => {
                    i += 1;
                    self.error("unexpected ','");
                }
                '=' => {
                    i += 1;
                    self.start_assignment(Op::Assign, &chars, &mut i);
                }
                '+' | '-' | '*' | '~' if chars.get(i + 1) == Some(&'=') => {
                    let op = match c {
                        '+' => Op::Append,
                        '-' => Op::Remove,
                        '*' => Op::AppendUnique,
                        _ => Op::Replace,
                    };
                    i += 2;
                    self.start_assignment(op, &chars, &mut i);
                }
                _ => {
                    if !self.buf.is_empty() || is_word_char(c) {
                        self.open_scope_pending = false;
                        self.buf.push(c);
                    }
                    i += 1;
                }
            }
        }
        if quote.is_some() {
            self.error("unterminated quote");
        }
        self.end_of_line();
    }

    fn end_of_line(&mut self) {
        self.finalize_word();
        self.commit_pending_cond();
        self.end_statement();
        self.open_scope_pending = false;
        while matches!(self.scopes.last(), Some(s) if !s.braced) {
            if let Some(scope) = self.scopes.pop() {
                self.close_scope(scope);
            }
        }
        self.reset_statement();
    }

    fn start_assignment(&mut self, op: Op, chars: &[char], i: &mut usize) {
        self.finalize_word();
        if self.grammar == Grammar::Test {
            self.error("assignment inside test expression");
            *i = chars.len();
            return;
        }
        let lhs = match self.pending_word.take() {
            Some(lhs) => lhs,
            None => {
                self.error("assignment with no left hand side");
                *i = chars.len();
                return;
            }
        };
        self.wrap_if_guarded();
        self.flush_line();
        self.out.put_op(op);
        self.out.put_hash_str(&lhs);
        match self.scan_value(chars, i, VMode::Line) {
            VEnd::Eol => {
                self.out.put_op(Op::ValueTerminator);
            }
            VEnd::CloseBrace => {
                self.out.put_op(Op::ValueTerminator);
                // Re-process the brace in test context.
                let rest: Vec<char> = std::iter::once('}')
                    .chain(chars[*i..].iter().copied())
                    .collect();
                *i = chars.len();
                self.scan_tail(&rest);
            }
            VEnd::CloseParen => unreachable!("Line mode never ends on ')'"),
        }
    }

    /// Re-scan a remaining fragment in test context without triggering the
    /// end-of-line handling twice.
    fn scan_tail(&mut self, chars: &[char]) {
        let line: String = chars.iter().collect();
        // end_of_line inside scan_line handles statement closure for us.
        self.scan_line(&line);
        // scan_line reset per-line state; nothing more to do.
        self.line_pending = true;
    }

    fn skip_parens(&mut self, chars: &[char], i: &mut usize) {
        let mut depth = 0usize;
        while *i < chars.len() {
            match chars[*i] {
                '(' => depth += 1,
                ')' => {
                    if depth == 0 {
                        *i += 1;
                        return;
                    }
                    depth -= 1;
                }
                _ => {}
            }
            *i += 1;
        }
        self.error("unterminated call argument list");
    }

    // ── Calls, magic and ordinary ────────────────────────────────────────

    /// `i` points just past the opening parenthesis.
    fn scan_call(&mut self, chars: &[char], i: &mut usize, name: &str, ctx: CallCtx, fresh: bool) {
        if ctx == CallCtx::Test {
            match name {
                "for" => return self.parse_for(chars, i),
                "defineTest" => return self.parse_define(chars, i, Op::TestDef),
                "defineReplace" => return self.parse_define(chars, i, Op::ReplaceDef),
                "return" => return self.parse_return(chars, i),
                "break" | "next" => return self.parse_loop_ctl(chars, i, name),
                "option" => return self.parse_option(chars, i),
                _ => {}
            }
        }
        match ctx {
            CallCtx::Test => {
                self.flush_line();
                self.out.put_op(Op::TestCall);
            }
            CallCtx::Expand => {
                self.out.put_value_op(Op::FuncName, fresh);
            }
        }
        self.out.put_hash_str(name);
        match self.scan_value(chars, i, VMode::Args) {
            VEnd::CloseParen => {}
            _ => self.error("unterminated call argument list"),
        }
        self.out.put_op(Op::FuncTerminator);
        if ctx == CallCtx::Test {
            self.guard_open = true;
            self.last_was_operand = true;
            self.operator_pending = false;
            self.not_pending = false;
        }
    }

    /// Read a raw literal argument up to `,` or `)`. Returns (text, hit_comma).
    fn raw_arg(&mut self, chars: &[char], i: &mut usize) -> (String, bool) {
        let mut text = String::new();
        while *i < chars.len() {
            match chars[*i] {
                ',' => {
                    *i += 1;
                    return (text.trim().to_string(), true);
                }
                ')' => {
                    *i += 1;
                    return (text.trim().to_string(), false);
                }
                c => {
                    text.push(c);
                    *i += 1;
                }
            }
        }
        self.error("unterminated call argument list");
        (text.trim().to_string(), false)
    }

    fn parse_for(&mut self, chars: &[char], i: &mut usize) {
        let (first, has_more) = self.raw_arg(chars, i);
        self.wrap_if_guarded();
        self.flush_line();
        if !has_more {
            // for(ever) / for(forever)
            if first != "ever" && first != "forever" {
                self.error("for() requires two arguments, or 'ever'");
            }
            self.out.put_op(Op::ForLoop);
            self.out.put_hash_str("");
            self.out.put_value_op(Op::Literal, true);
            self.out.put_str("ever");
            self.out.put_op(Op::ValueTerminator);
        } else {
            if first.is_empty() || !first.chars().all(is_name_char) {
                self.error(format!("invalid loop variable name '{first}'"));
            }
            self.out.put_op(Op::ForLoop);
            self.out.put_hash_str(&first);
            match self.scan_value(chars, i, VMode::RawArg) {
                VEnd::CloseParen => {}
                _ => self.error("unterminated for() expression"),
            }
            self.out.put_op(Op::ValueTerminator);
        }
        let body_slot = self.out.open_block();
        self.scopes.push(Scope {
            braced: false,
            kind: ScopeKind::Loop { body_slot },
        });
        self.open_scope_pending = true;
        self.reset_statement();
    }

    fn parse_define(&mut self, chars: &[char], i: &mut usize, op: Op) {
        let (name, has_more) = self.raw_arg(chars, i);
        if has_more {
            self.error("define functions take exactly one argument");
            self.skip_parens(chars, i);
        }
        if name.is_empty() || !name.chars().all(is_name_char) {
            self.error(format!("invalid function name '{name}'"));
        }
        self.wrap_if_guarded();
        self.flush_line();
        self.out.put_op(op);
        self.out.put_hash_str(&name);
        let body_slot = self.out.open_block();
        self.scopes.push(Scope {
            braced: false,
            kind: ScopeKind::Func { body_slot },
        });
        self.open_scope_pending = true;
        self.reset_statement();
    }

    fn parse_return(&mut self, chars: &[char], i: &mut usize) {
        self.wrap_if_guarded();
        self.flush_line();
        self.out.put_op(Op::Return);
        match self.scan_value(chars, i, VMode::RawArg) {
            VEnd::CloseParen => {}
            _ => self.error("unterminated return() expression"),
        }
        self.out.put_op(Op::ValueTerminator);
        self.last_was_operand = false;
    }

    fn parse_loop_ctl(&mut self, chars: &[char], i: &mut usize, name: &str) {
        let (arg, _) = self.raw_arg(chars, i);
        if !arg.is_empty() {
            self.error(format!("{name}() takes no arguments"));
        }
        if !self.in_loop() {
            self.error(format!("{name}() outside a loop"));
            return;
        }
        self.wrap_if_guarded();
        self.flush_line();
        self.out
            .put_op(if name == "break" { Op::Break } else { Op::Next });
        self.last_was_operand = false;
    }

    fn parse_option(&mut self, chars: &[char], i: &mut usize) {
        let (arg, _) = self.raw_arg(chars, i);
        if self.grammar != Grammar::Full || !self.scopes.is_empty() || self.guard_open {
            self.error("option() must appear at file scope");
            return;
        }
        match arg.as_str() {
            "host_build" => self.host_build = true,
            _ => self.error(format!("unknown option '{arg}'")),
        }
    }

    // ── Value context ────────────────────────────────────────────────────

    /// `complete` is true when the element ends with this flush. A whole
    /// word with no expansion fragments is stored with its hash, so a
    /// consumer that uses it as a key does not rehash; a fragment next to a
    /// `$$` expansion stays a plain literal.
    fn flush_literal(&mut self, fresh: &mut bool, complete: bool) {
        if !self.buf.is_empty() {
            let text = std::mem::take(&mut self.buf);
            if *fresh && complete {
                self.out.put_value_op(Op::HashLiteral, true);
                self.out.put_hash_str(&text);
            } else {
                self.out.put_value_op(Op::Literal, *fresh);
                self.out.put_str(&text);
            }
            *fresh = false;
        }
    }

    fn scan_value(&mut self, chars: &[char], i: &mut usize, mode: VMode) -> VEnd {
        let mut fresh = true;
        let mut quote: Option<char> = None;
        let mut paren_depth = 0usize;
        let mut brace_depth = 0usize;
        // Skip leading whitespace.
        while *i < chars.len() && matches!(chars[*i], ' ' | '\t') {
            *i += 1;
        }
        while *i < chars.len() {
            let c = chars[*i];
            // Expansions apply even inside quotes.
            if c == '$' && chars.get(*i + 1) == Some(&'$') {
                self.flush_literal(&mut fresh, false);
                self.scan_expansion(chars, i, &mut fresh);
                continue;
            }
            if let Some(q) = quote {
                if c == q {
                    quote = None;
                    // A quoted empty string still yields an element.
                    if self.buf.is_empty() && fresh {
                        self.out.put_value_op(Op::Literal, true);
                        self.out.put_str("");
                        fresh = false;
                    }
                } else {
                    self.buf.push(c);
                }
                *i += 1;
                continue;
            }
            match c {
                '\'' | '"' => {
                    quote = Some(c);
                    *i += 1;
                }
                '\\' => {
                    push_escaped(&mut self.buf, chars, i);
                }
                ' ' | '\t' => {
                    self.flush_literal(&mut fresh, true);
                    fresh = true;
                    *i += 1;
                }
                ',' if mode == VMode::Args && paren_depth == 0 => {
                    self.flush_literal(&mut fresh, true);
                    self.out.put_op(Op::ArgSeparator);
                    fresh = true;
                    *i += 1;
                    // Leading whitespace of the next argument.
                    while *i < chars.len() && matches!(chars[*i], ' ' | '\t') {
                        *i += 1;
                    }
                }
                ',' if mode == VMode::RawArg && paren_depth == 0 => {
                    self.flush_literal(&mut fresh, true);
                    fresh = true;
                    *i += 1;
                }
                '(' if matches!(mode, VMode::Args | VMode::RawArg) => {
                    paren_depth += 1;
                    self.buf.push(c);
                    *i += 1;
                }
                ')' if matches!(mode, VMode::Args | VMode::RawArg) => {
                    if paren_depth == 0 {
                        self.flush_literal(&mut fresh, true);
                        *i += 1;
                        return VEnd::CloseParen;
                    }
                    paren_depth -= 1;
                    self.buf.push(c);
                    *i += 1;
                }
                '{' if matches!(mode, VMode::Line) => {
                    brace_depth += 1;
                    self.buf.push(c);
                    *i += 1;
                }
                '}' if matches!(mode, VMode::Line) => {
                    if brace_depth == 0 {
                        self.flush_literal(&mut fresh, true);
                        *i += 1;
                        return VEnd::CloseBrace;
                    }
                    brace_depth -= 1;
                    self.buf.push(c);
                    *i += 1;
                }
                _ => {
                    self.buf.push(c);
                    *i += 1;
                }
            }
        }
        if quote.is_some() {
            self.error("unterminated quote");
        }
        self.flush_literal(&mut fresh, true);
        VEnd::Eol
    }

    /// `i` points at the first `$` of a `$$` expansion.
    fn scan_expansion(&mut self, chars: &[char], i: &mut usize, fresh: &mut bool) {
        *i += 2;
        match chars.get(*i) {
            Some('{') => {
                *i += 1;
                let name = self.read_until(chars, i, '}');
                self.out.put_value_op(Op::Variable, *fresh);
                self.out.put_hash_str(&name);
                *fresh = false;
            }
            Some('(') => {
                *i += 1;
                let name = self.read_until(chars, i, ')');
                self.out.put_value_op(Op::EnvVar, *fresh);
                self.out.put_str(&name);
                *fresh = false;
            }
            Some('[') => {
                *i += 1;
                let name = self.read_until(chars, i, ']');
                self.out.put_value_op(Op::Property, *fresh);
                self.out.put_str(&name);
                *fresh = false;
            }
            Some(&c) if is_name_char(c) => {
                let mut name = String::new();
                while let Some(&c) = chars.get(*i) {
                    if is_name_char(c) {
                        name.push(c);
                        *i += 1;
                    } else {
                        break;
                    }
                }
                if chars.get(*i) == Some(&'(') {
                    *i += 1;
                    let was_fresh = *fresh;
                    *fresh = false;
                    self.scan_call(chars, i, &name, CallCtx::Expand, was_fresh);
                } else {
                    self.out.put_value_op(Op::Variable, *fresh);
                    self.out.put_hash_str(&name);
                    *fresh = false;
                }
            }
            _ => {
                // Bare `$$` — kept literally.
                self.buf.push_str("$$");
            }
        }
    }

    fn read_until(&mut self, chars: &[char], i: &mut usize, close: char) -> String {
        let mut name = String::new();
        while *i < chars.len() {
            let c = chars[*i];
            *i += 1;
            if c == close {
                return name;
            }
            name.push(c);
        }
        self.error(format!("missing '{close}' in expansion"));
        name
    }
}

/// Strip an unescaped, unquoted `#` comment from a physical line.
fn strip_comment(line: &str) -> &str {
    let bytes = line.as_bytes();
    let mut quote: Option<u8> = None;
    let mut idx = 0usize;
    while idx < bytes.len() {
        let b = bytes[idx];
        match quote {
            Some(q) => {
                if b == q {
                    quote = None;
                }
            }
            None => match b {
                b'\'' | b'"' => quote = Some(b),
                b'\\' => idx += 1,
                b'#' => return &line[..idx],
                _ => {}
            },
        }
        idx += 1;
    }
    line
}

/// Apply the escape rule at `chars[*i] == '\\'`: the eight characters
/// `[ ] { } ( ) $ \` are escaped; any other backslash is a deprecated no-op
/// that keeps both characters.
fn push_escaped(buf: &mut String, chars: &[char], i: &mut usize) {
    match chars.get(*i + 1) {
        Some(&c) if ESCAPABLE.contains(&c) => {
            buf.push(c);
            *i += 2;
        }
        Some(&c) => {
            buf.push('\\');
            buf.push(c);
            *i += 2;
        }
        None => {
            buf.push('\\');
            *i += 1;
        }
    }
}
