//! Read-only decode of a compiled document into a serializable item tree.
//!
//! This is the traversal surface consumed by editor tooling, and the shape
//! the test suites assert against. Nothing here mutates the document; a
//! dumped tree can be compared against a recompilation of the same text to
//! confirm the compiler is deterministic.

use promake_types::{Op, ProFile, TokenReader};
use serde::Serialize;

/// One fragment of a value expression, in source order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValueToken {
    Literal {
        text: String,
        new_element: bool,
    },
    Variable {
        name: String,
        new_element: bool,
    },
    Property {
        name: String,
        new_element: bool,
    },
    Env {
        name: String,
        new_element: bool,
    },
    Call {
        name: String,
        args: Vec<Vec<ValueToken>>,
        new_element: bool,
    },
}

/// One token of a guard expression (the condition before a scope or `else`).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GuardToken {
    Condition { word: String },
    Call { name: String, args: Vec<Vec<ValueToken>> },
    Not,
    And,
    Or,
}

/// Assignment operator, matching the five source spellings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignOp {
    Set,
    Append,
    AppendUnique,
    Remove,
    Substitute,
}

/// A decoded statement.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Item {
    Assignment {
        line: u32,
        op: AssignOp,
        var: String,
        value: Vec<ValueToken>,
    },
    /// A guard evaluated for its side effects (`CONFIG(debug): ...` style
    /// tests, bare calls, `error(...)`).
    Statement {
        line: u32,
        guard: Vec<GuardToken>,
    },
    /// A guarded block with optional else body.
    Scope {
        line: u32,
        guard: Vec<GuardToken>,
        then_items: Vec<Item>,
        else_items: Vec<Item>,
    },
    Loop {
        line: u32,
        /// Empty for `for(ever)`.
        var: String,
        expression: Vec<ValueToken>,
        body: Vec<Item>,
    },
    Definition {
        line: u32,
        replace: bool,
        name: String,
        body: Vec<Item>,
    },
    Return {
        line: u32,
        value: Vec<ValueToken>,
    },
    Break {
        line: u32,
    },
    Next {
        line: u32,
    },
}

/// Decode the whole document.
pub fn dump_items(pro: &ProFile) -> Vec<Item> {
    let mut r = pro.reader();
    decode_items(&mut r)
}

/// Decode the whole document to a JSON value.
pub fn dump_json(pro: &ProFile) -> serde_json::Value {
    serde_json::to_value(dump_items(pro)).unwrap_or(serde_json::Value::Null)
}

/// Whether two compilations produced the same instruction words. The text
/// pools may differ in layout; the words embed pool offsets, so equal words
/// imply equal pools for documents compiled by the same writer.
pub fn streams_identical(a: &ProFile, b: &ProFile) -> bool {
    a.words() == b.words()
}

fn decode_items(r: &mut TokenReader<'_>) -> Vec<Item> {
    let mut items = Vec::new();
    let mut line = 0u32;
    let mut guard: Vec<GuardToken> = Vec::new();
    while let Some((op, _new_str)) = r.next_op() {
        match op {
            Op::Line => line = u32::from(r.read_u16()),
            Op::Terminator => {
                if !guard.is_empty() {
                    items.push(Item::Statement {
                        line,
                        guard: std::mem::take(&mut guard),
                    });
                }
            }
            Op::Condition => {
                let word = r.read_hash_str();
                guard.push(GuardToken::Condition {
                    word: word.as_str().to_string(),
                });
            }
            Op::TestCall => {
                let name = r.read_hash_str();
                let args = decode_args(r);
                guard.push(GuardToken::Call {
                    name: name.as_str().to_string(),
                    args,
                });
            }
            Op::Not => guard.push(GuardToken::Not),
            Op::And => guard.push(GuardToken::And),
            Op::Or => guard.push(GuardToken::Or),
            Op::Assign | Op::Append | Op::AppendUnique | Op::Remove | Op::Replace => {
                let var = r.read_hash_str();
                let value = decode_value(r);
                items.push(Item::Assignment {
                    line,
                    op: match op {
                        Op::Assign => AssignOp::Set,
                        Op::Append => AssignOp::Append,
                        Op::AppendUnique => AssignOp::AppendUnique,
                        Op::Remove => AssignOp::Remove,
                        _ => AssignOp::Substitute,
                    },
                    var: var.as_str().to_string(),
                    value,
                });
            }
            Op::Branch => {
                // The `:` that joins a guard to its statement compiles to an
                // `And` with no following operand; the interpreter ignores it
                // and it is not part of the guard.
                if matches!(guard.last(), Some(GuardToken::And | GuardToken::Or)) {
                    guard.pop();
                }
                let then_len = r.read_block_len();
                let mut then_r = r.sub_block(then_len);
                let then_items = decode_items(&mut then_r);
                let else_len = r.read_block_len();
                let mut else_r = r.sub_block(else_len);
                let else_items = decode_items(&mut else_r);
                items.push(Item::Scope {
                    line,
                    guard: std::mem::take(&mut guard),
                    then_items,
                    else_items,
                });
            }
            Op::ForLoop => {
                let var = r.read_hash_str();
                let expression = decode_value(r);
                let body_len = r.read_block_len();
                let mut body_r = r.sub_block(body_len);
                let body = decode_items(&mut body_r);
                items.push(Item::Loop {
                    line,
                    var: var.as_str().to_string(),
                    expression,
                    body,
                });
            }
            Op::TestDef | Op::ReplaceDef => {
                let name = r.read_hash_str();
                let body_len = r.read_block_len();
                let mut body_r = r.sub_block(body_len);
                let body = decode_items(&mut body_r);
                items.push(Item::Definition {
                    line,
                    replace: op == Op::ReplaceDef,
                    name: name.as_str().to_string(),
                    body,
                });
            }
            Op::Return => {
                let value = decode_value(r);
                items.push(Item::Return { line, value });
            }
            Op::Break => items.push(Item::Break { line }),
            Op::Next => items.push(Item::Next { line }),
            // Value-context opcodes never begin a statement.
            Op::ValueTerminator
            | Op::Literal
            | Op::HashLiteral
            | Op::Variable
            | Op::Property
            | Op::EnvVar
            | Op::FuncName
            | Op::ArgSeparator
            | Op::FuncTerminator => {
                panic!("corrupt instruction stream: {op:?} at statement position")
            }
        }
    }
    if !guard.is_empty() {
        items.push(Item::Statement { line, guard });
    }
    items
}

/// Decode value words up to and including the `ValueTerminator`.
fn decode_value(r: &mut TokenReader<'_>) -> Vec<ValueToken> {
    let mut out = Vec::new();
    while let Some((op, new_element)) = r.next_op() {
        match op {
            Op::ValueTerminator => break,
            _ => out.push(decode_value_token(r, op, new_element)),
        }
    }
    out
}

/// Decode call arguments up to and including the `FuncTerminator`.
fn decode_args(r: &mut TokenReader<'_>) -> Vec<Vec<ValueToken>> {
    let mut args = Vec::new();
    let mut cur = Vec::new();
    let mut any = false;
    while let Some((op, new_element)) = r.next_op() {
        match op {
            Op::FuncTerminator => break,
            Op::ArgSeparator => {
                args.push(std::mem::take(&mut cur));
                any = true;
            }
            _ => {
                cur.push(decode_value_token(r, op, new_element));
                any = true;
            }
        }
    }
    if any || !cur.is_empty() {
        args.push(cur);
    }
    args
}

fn decode_value_token(r: &mut TokenReader<'_>, op: Op, new_element: bool) -> ValueToken {
    match op {
        Op::Literal => ValueToken::Literal {
            text: r.read_str().as_str().to_string(),
            new_element,
        },
        Op::HashLiteral => ValueToken::Literal {
            text: r.read_hash_str().as_str().to_string(),
            new_element,
        },
        Op::Variable => ValueToken::Variable {
            name: r.read_hash_str().as_str().to_string(),
            new_element,
        },
        Op::Property => ValueToken::Property {
            name: r.read_str().as_str().to_string(),
            new_element,
        },
        Op::EnvVar => ValueToken::Env {
            name: r.read_str().as_str().to_string(),
            new_element,
        },
        Op::FuncName => {
            let name = r.read_hash_str().as_str().to_string();
            let args = decode_args(r);
            ValueToken::Call {
                name,
                args,
                new_element,
            }
        }
        other => panic!("corrupt instruction stream: {other:?} in value position"),
    }
}
