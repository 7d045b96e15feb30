//! The compact instruction stream shared by the compiler and the interpreter.
//!
//! A compiled document is a flat sequence of 16-bit words. Each word is
//! either an opcode (low 15 bits, with the high bit reserved for the
//! [`NEW_STR`] marker on value-context opcodes) or an inline operand:
//! string-pool offsets, lengths, precomputed hashes, line numbers and block
//! word counts. Every block-opening opcode ([`Op::Branch`], [`Op::ForLoop`],
//! [`Op::TestDef`], [`Op::ReplaceDef`]) is immediately followed by a 32-bit
//! word count, so the interpreter can skip an untaken block in O(1).
//!
//! Malformed streams are programming invariants, not user-facing errors:
//! the reader panics rather than reporting.

use crate::pro_string::{pro_hash, ProKey, ProString};
use std::collections::HashMap;
use std::sync::Arc;

/// Marker bit on value-context opcodes: this fragment starts a new list
/// element rather than joining the previous one.
pub const NEW_STR: u16 = 0x8000;

/// Mask selecting the opcode from a stream word.
pub const OP_MASK: u16 = 0x7fff;

/// Every opcode in the instruction stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Op {
    /// Ends a test statement; resets the interpreter's guard accumulator.
    Terminator = 0,
    /// Operand: source line number (u16). Updates the current location.
    Line = 1,

    // Assignment operators. Operands: variable key, value words, ValueTerminator.
    Assign = 2,
    Append = 3,
    AppendUnique = 4,
    Remove = 5,
    Replace = 6,
    /// Ends a value-word sequence (assignment RHS, loop expression, return).
    ValueTerminator = 7,

    // Value-context words. All may carry the NEW_STR flag.
    /// Operand: plain string.
    Literal = 8,
    /// Operand: hash + string (used where the consumer needs a key).
    HashLiteral = 9,
    /// Operand: hash + variable name. Resolved via the value-map stack.
    Variable = 10,
    /// Operand: property name. Resolved via the property collaborator.
    Property = 11,
    /// Operand: environment variable name.
    EnvVar = 12,
    /// Expand-function call in value context. Operand: hash + name, then
    /// argument words (ArgSeparator between arguments), then FuncTerminator.
    FuncName = 13,
    ArgSeparator = 14,
    FuncTerminator = 15,

    /// Bare-word condition in test context. Operand: hash + word.
    Condition = 16,
    /// Test-function call. Operands like FuncName.
    TestCall = 17,

    /// Operand: value words + ValueTerminator (the function result).
    Return = 18,
    Break = 19,
    Next = 20,

    // Guard combinators.
    Not = 21,
    And = 22,
    Or = 23,

    /// Conditional. Operands: u32 then-length, then-block, u32 else-length,
    /// else-block.
    Branch = 24,
    /// Loop. Operands: hash + loop-variable name (empty for `for(ever)`),
    /// expression words + ValueTerminator, u32 body length, body.
    ForLoop = 25,
    /// Function definition. Operands: hash + name, u32 body length, body.
    TestDef = 26,
    ReplaceDef = 27,
}

impl Op {
    /// Decode a stream word into its opcode, panicking on corruption.
    pub fn from_word(word: u16) -> Op {
        match word & OP_MASK {
            0 => Op::Terminator,
            1 => Op::Line,
            2 => Op::Assign,
            3 => Op::Append,
            4 => Op::AppendUnique,
            5 => Op::Remove,
            6 => Op::Replace,
            7 => Op::ValueTerminator,
            8 => Op::Literal,
            9 => Op::HashLiteral,
            10 => Op::Variable,
            11 => Op::Property,
            12 => Op::EnvVar,
            13 => Op::FuncName,
            14 => Op::ArgSeparator,
            15 => Op::FuncTerminator,
            16 => Op::Condition,
            17 => Op::TestCall,
            18 => Op::Return,
            19 => Op::Break,
            20 => Op::Next,
            21 => Op::Not,
            22 => Op::And,
            23 => Op::Or,
            24 => Op::Branch,
            25 => Op::ForLoop,
            26 => Op::TestDef,
            27 => Op::ReplaceDef,
            other => panic!("corrupt instruction stream: unknown opcode {other}"),
        }
    }
}

/// A reserved 32-bit length slot, closed by [`TokenWriter::close_block`].
#[derive(Debug, Clone, Copy)]
#[must_use]
pub struct LenSlot(usize);

/// Append-only builder for an instruction stream and its text pool.
///
/// Identical strings are interned once into the pool, which keeps the output
/// deterministic: compiling the same text twice produces identical words and
/// an identical pool.
#[derive(Default)]
pub struct TokenWriter {
    words: Vec<u16>,
    pool: String,
    interned: HashMap<String, (u32, u16)>,
}

impl TokenWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn put_op(&mut self, op: Op) {
        self.words.push(op as u16);
    }

    /// Emit a value-context opcode, optionally flagged as starting a new
    /// list element.
    pub fn put_value_op(&mut self, op: Op, new_str: bool) {
        let mut word = op as u16;
        if new_str {
            word |= NEW_STR;
        }
        self.words.push(word);
    }

    /// Emit a `Line` opcode for `line` (clamped to 16 bits, like the
    /// historical format).
    pub fn put_line(&mut self, line: u32) {
        self.put_op(Op::Line);
        self.words.push(line.min(u32::from(u16::MAX)) as u16);
    }

    fn intern(&mut self, s: &str) -> (u32, u16) {
        if let Some(&entry) = self.interned.get(s) {
            return entry;
        }
        let offset = self.pool.len() as u32;
        let len = s.len().min(usize::from(u16::MAX)) as u16;
        self.pool.push_str(&s[..usize::from(len)]);
        self.interned.insert(s.to_string(), (offset, len));
        (offset, len)
    }

    /// Emit a string operand: `[offset:u32][len:u16]`.
    pub fn put_str(&mut self, s: &str) {
        let (offset, len) = self.intern(s);
        self.words.push((offset >> 16) as u16);
        self.words.push(offset as u16);
        self.words.push(len);
    }

    /// Emit a hashed string operand: `[hash:u32][offset:u32][len:u16]`.
    pub fn put_hash_str(&mut self, s: &str) {
        let hash = pro_hash(s);
        self.words.push((hash >> 16) as u16);
        self.words.push(hash as u16);
        self.put_str(s);
    }

    /// Reserve a 32-bit block-length slot to be patched later.
    pub fn open_block(&mut self) -> LenSlot {
        let slot = self.words.len();
        self.words.push(0);
        self.words.push(0);
        LenSlot(slot)
    }

    /// Patch a length slot with the number of words emitted since it was
    /// opened.
    pub fn close_block(&mut self, slot: LenSlot) {
        let len = (self.words.len() - slot.0 - 2) as u32;
        self.words[slot.0] = (len >> 16) as u16;
        self.words[slot.0 + 1] = len as u16;
    }

    /// Position of the word right after a just-closed length slot. Used by
    /// the compiler to verify nothing was emitted between a branch's else
    /// slot and a late `else` body.
    pub fn block_body_start(&self, slot: LenSlot) -> usize {
        slot.0 + 2
    }

    pub fn finish(self) -> (Vec<u16>, Arc<str>) {
        (self.words, Arc::from(self.pool))
    }
}

/// Typed cursor over an instruction stream.
///
/// String operands are decoded as [`ProString`] views into the document's
/// shared text pool; no text is copied during execution.
pub struct TokenReader<'a> {
    words: &'a [u16],
    pool: &'a Arc<str>,
    pos: usize,
}

impl<'a> TokenReader<'a> {
    pub fn new(words: &'a [u16], pool: &'a Arc<str>) -> Self {
        TokenReader {
            words,
            pool,
            pos: 0,
        }
    }

    pub fn at_end(&self) -> bool {
        self.pos >= self.words.len()
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    fn next_word(&mut self) -> u16 {
        let w = self.words[self.pos];
        self.pos += 1;
        w
    }

    /// Read the next opcode plus its NewStr flag. `None` at end of stream.
    pub fn next_op(&mut self) -> Option<(Op, bool)> {
        if self.at_end() {
            return None;
        }
        let word = self.next_word();
        Some((Op::from_word(word), word & NEW_STR != 0))
    }

    /// Peek the next opcode without advancing.
    pub fn peek_op(&self) -> Option<Op> {
        self.words.get(self.pos).map(|w| Op::from_word(*w))
    }

    pub fn read_u16(&mut self) -> u16 {
        self.next_word()
    }

    fn read_u32(&mut self) -> u32 {
        let hi = u32::from(self.next_word());
        let lo = u32::from(self.next_word());
        (hi << 16) | lo
    }

    /// Read a `[offset][len]` string operand as a pool view.
    pub fn read_str(&mut self) -> ProString {
        let offset = self.read_u32() as usize;
        let len = usize::from(self.next_word());
        ProString::view(Arc::clone(self.pool), offset, len)
    }

    /// Read a `[hash][offset][len]` operand as a pre-hashed key.
    pub fn read_hash_str(&mut self) -> ProKey {
        let hash = self.read_u32();
        let s = self.read_str();
        ProKey::with_hash(s, hash)
    }

    /// Read a 32-bit block length (in words).
    pub fn read_block_len(&mut self) -> usize {
        self.read_u32() as usize
    }

    /// Split off a sub-reader covering the next `len` words and advance past
    /// them.
    pub fn sub_block(&mut self, len: usize) -> TokenReader<'a> {
        let start = self.pos;
        let end = start + len;
        assert!(end <= self.words.len(), "corrupt instruction stream: block overruns buffer");
        self.pos = end;
        TokenReader {
            words: &self.words[start..end],
            pool: self.pool,
            pos: 0,
        }
    }

    /// Skip `len` words without decoding them.
    pub fn skip(&mut self, len: usize) {
        let end = self.pos + len;
        assert!(end <= self.words.len(), "corrupt instruction stream: skip overruns buffer");
        self.pos = end;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_read_round_trip() {
        let mut w = TokenWriter::new();
        w.put_line(3);
        w.put_op(Op::Assign);
        w.put_hash_str("SOURCES");
        w.put_value_op(Op::Literal, true);
        w.put_str("main.cpp");
        w.put_op(Op::ValueTerminator);
        let (words, pool) = w.finish();

        let mut r = TokenReader::new(&words, &pool);
        assert_eq!(r.next_op(), Some((Op::Line, false)));
        assert_eq!(r.read_u16(), 3);
        assert_eq!(r.next_op(), Some((Op::Assign, false)));
        let key = r.read_hash_str();
        assert_eq!(key.as_str(), "SOURCES");
        assert_eq!(key.hash_value(), pro_hash("SOURCES"));
        assert_eq!(r.next_op(), Some((Op::Literal, true)));
        assert_eq!(r.read_str(), "main.cpp");
        assert_eq!(r.next_op(), Some((Op::ValueTerminator, false)));
        assert!(r.at_end());
    }

    #[test]
    fn block_length_skips_body() {
        let mut w = TokenWriter::new();
        w.put_op(Op::Branch);
        let then_slot = w.open_block();
        w.put_op(Op::Line);
        w.put_line(1); // two words of filler plus the Line op above
        w.close_block(then_slot);
        let else_slot = w.open_block();
        w.close_block(else_slot);
        let (words, pool) = w.finish();

        let mut r = TokenReader::new(&words, &pool);
        assert_eq!(r.next_op(), Some((Op::Branch, false)));
        let then_len = r.read_block_len();
        r.skip(then_len);
        let else_len = r.read_block_len();
        assert_eq!(else_len, 0);
        assert!(r.at_end());
    }

    #[test]
    fn pool_interning_is_deterministic() {
        let build = || {
            let mut w = TokenWriter::new();
            w.put_str("CONFIG");
            w.put_str("debug");
            w.put_str("CONFIG");
            w.finish()
        };
        let (w1, p1) = build();
        let (w2, p2) = build();
        assert_eq!(w1, w2);
        assert_eq!(&*p1, &*p2);
        // The repeated string was interned, not re-appended.
        assert_eq!(&*p1, "CONFIGdebug");
    }
}
