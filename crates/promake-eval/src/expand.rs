//! Value-expression expansion: turns value-context instruction words into
//! a string list, applying the joining rule — a NewStr-flagged word opens a
//! new element, adjacent fragments concatenate, and a multi-element
//! expansion attaches any literal prefix to its first element and any
//! suffix to its last.

use crate::error::EvalError;
use crate::evaluator::Evaluator;
use promake_types::{Op, ProFileRef, ProKey, ProString, ProStringList, TokenReader};

enum Stop {
    /// Read through `ValueTerminator` (assignment RHS, `for` expression,
    /// `return` value).
    Value,
    /// Read one argument: stop at `ArgSeparator` or `FuncTerminator`.
    Argument,
}

impl<'a> Evaluator<'a> {
    /// Expand value words up to and including the `ValueTerminator`.
    pub(crate) fn expand_value_list(
        &mut self,
        pro: &ProFileRef,
        r: &mut TokenReader<'_>,
        base: usize,
    ) -> Result<ProStringList, EvalError> {
        let (list, _) = self.expand_until(pro, r, base, Stop::Value)?;
        Ok(list)
    }

    /// Expand a call's arguments up to and including the `FuncTerminator`.
    /// A call with no argument words at all yields an empty argument list.
    pub(crate) fn expand_args(
        &mut self,
        pro: &ProFileRef,
        r: &mut TokenReader<'_>,
        base: usize,
    ) -> Result<Vec<ProStringList>, EvalError> {
        let mut args = Vec::new();
        loop {
            let (arg, last) = self.expand_until(pro, r, base, Stop::Argument)?;
            args.push(arg);
            if last {
                break;
            }
        }
        if args.len() == 1 && args[0].is_empty() {
            args.clear();
        }
        Ok(args)
    }

    /// Returns the expanded list plus whether the stop token was a final one
    /// (`FuncTerminator` / `ValueTerminator` rather than `ArgSeparator`).
    fn expand_until(
        &mut self,
        pro: &ProFileRef,
        r: &mut TokenReader<'_>,
        base: usize,
        stop: Stop,
    ) -> Result<(ProStringList, bool), EvalError> {
        let mut result = ProStringList::new();
        while let Some((op, new_str)) = r.next_op() {
            let chunk = match op {
                Op::ValueTerminator => {
                    debug_assert!(matches!(stop, Stop::Value), "stray value terminator");
                    return Ok((result, true));
                }
                Op::ArgSeparator if matches!(stop, Stop::Argument) => {
                    return Ok((result, false));
                }
                Op::FuncTerminator if matches!(stop, Stop::Argument) => {
                    return Ok((result, true));
                }
                Op::Literal => ProStringList::one(r.read_str()),
                Op::HashLiteral => ProStringList::one(r.read_hash_str().to_pro_string()),
                Op::Variable => {
                    let key = r.read_hash_str();
                    self.variable_values(key)
                }
                Op::EnvVar => {
                    let name = r.read_str();
                    match self.options.env_value(name.as_str()) {
                        Some(value) => ProStringList::from_split(value),
                        None => ProStringList::new(),
                    }
                }
                Op::Property => {
                    let name = r.read_str();
                    match self.options.property(name.as_str()) {
                        Some(value) => ProStringList::one(ProString::from(value)),
                        None => ProStringList::new(),
                    }
                }
                Op::FuncName => {
                    let name = r.read_hash_str();
                    let args = self.expand_args(pro, r, base)?;
                    self.call_replace(&name, &args)?
                }
                other => unreachable!("opcode {other:?} in value context"),
            };
            add_chunk(&mut result, chunk, new_str);
        }
        // Truncated stream after a parse error; treat as terminated.
        Ok((result, true))
    }

    /// Resolve a `$$name` expansion, including the magic read-only names.
    pub(crate) fn variable_values(&mut self, key: ProKey) -> ProStringList {
        match key.as_str() {
            "_LINE_" => ProStringList::one(ProString::from(self.line.to_string())),
            "_FILE_" => match self.current_file() {
                Some(pro) => {
                    ProStringList::one(ProString::from(pro.file_name().display().to_string()))
                }
                None => ProStringList::new(),
            },
            "PWD" => ProStringList::one(ProString::from(self.current_dir().display().to_string())),
            _ => {
                let key = self.map_variable_name(key);
                self.stack.values(&key).cloned().unwrap_or_default()
            }
        }
    }
}

fn add_chunk(result: &mut ProStringList, chunk: ProStringList, new_str: bool) {
    let mut items = chunk.into_iter();
    if !new_str {
        if let Some(first) = items.next() {
            match result.last_mut() {
                Some(last) => {
                    let mut joined = String::with_capacity(last.len() + first.len());
                    joined.push_str(last.as_str());
                    joined.push_str(first.as_str());
                    *last = ProString::from(joined);
                }
                None => result.push(first),
            }
        }
    }
    result.extend(items);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(text: &str) -> ProString {
        ProString::from(text)
    }

    fn list(items: &[&str]) -> ProStringList {
        items.iter().map(|t| s(t)).collect()
    }

    #[test]
    fn fragments_join_unless_new_element() {
        let mut result = ProStringList::new();
        add_chunk(&mut result, list(&["a"]), true);
        add_chunk(&mut result, list(&["b"]), false);
        add_chunk(&mut result, list(&["c"]), true);
        assert_eq!(result, list(&["ab", "c"]));
    }

    #[test]
    fn prefix_attaches_to_first_suffix_to_last() {
        // pre$$V/post with V = [x, y] → [prex, y/post]
        let mut result = ProStringList::new();
        add_chunk(&mut result, list(&["pre"]), true);
        add_chunk(&mut result, list(&["x", "y"]), false);
        add_chunk(&mut result, list(&["/post"]), false);
        assert_eq!(result, list(&["prex", "y/post"]));
    }

    #[test]
    fn empty_expansion_leaves_joining_intact() {
        let mut result = ProStringList::new();
        add_chunk(&mut result, list(&["a"]), true);
        add_chunk(&mut result, ProStringList::new(), false);
        add_chunk(&mut result, list(&["b"]), false);
        assert_eq!(result, list(&["ab"]));
    }
}
