//! The tree-walking interpreter.
//!
//! An [`Evaluator`] executes instruction streams against a variable-map
//! stack. Control flow travels as [`Visit`] values; hard failures (the
//! `error()` built-in, recursion and loop caps, circular includes) travel
//! as [`EvalError`] and are never swallowed by `:`/`|` chains.

use crate::builtins;
use crate::error::{EvalError, Visit, VisitResult};
use crate::features;
use crate::options::GlobalOptions;
use crate::project::BaseContextCache;
use crate::state::{ValueMap, ValueMapStack};
use crate::vfs::{wildcard_regex, Vfs};
use promake_parser::{Grammar, Parser, ProFileCache};
use promake_types::{
    Message, MessageHandler, MessageKind, Op, ProFileRef, ProFunctionDef, ProKey, ProString,
    ProStringList, Severity, TokenReader,
};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

pub(crate) const RECURSION_LIMIT: usize = 100;
pub(crate) const EVER_LIMIT: usize = 1000;

/// What to load around a project body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadFlags {
    /// Load the platform spec (`qmake.conf`) before the body.
    pub spec: bool,
    /// Load `default_pre.prf` / `default_post.prf` around the body and run
    /// the CONFIG feature fixed point afterwards.
    pub features: bool,
}

impl LoadFlags {
    pub const ALL: LoadFlags = LoadFlags {
        spec: true,
        features: true,
    };
    pub const PRO_ONLY: LoadFlags = LoadFlags {
        spec: false,
        features: false,
    };
}

/// Three-valued guard accumulator threaded between the Condition/TestCall
/// opcodes of one statement.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Guard {
    pub okay: bool,
    pub or_op: bool,
    pub invert: bool,
}

impl Guard {
    fn new() -> Self {
        Guard {
            okay: true,
            or_op: false,
            invert: false,
        }
    }

    pub(crate) fn reset(&mut self) {
        *self = Guard::new();
    }

    /// Whether the next operand still needs evaluating: an AND chain
    /// short-circuits once false, an OR chain once true.
    fn active(&self) -> bool {
        self.okay != self.or_op
    }

    /// Fold in an operand result (`None` when it was skipped).
    fn consume(&mut self, result: Option<bool>) {
        if let Some(b) = result {
            self.okay = b != self.invert;
        }
        self.or_op = false;
        self.invert = false;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BlockMode {
    /// Ordinary statement sequence.
    Statements,
    /// A re-parsed conditional snippet: the first `Terminator` yields the
    /// guard value as the block's result.
    Condition,
}

/// Legacy variable-name spellings still accepted with a deprecation
/// warning.
fn deprecated_names() -> &'static HashMap<&'static str, &'static str> {
    static TABLE: OnceLock<HashMap<&'static str, &'static str>> = OnceLock::new();
    TABLE.get_or_init(|| {
        HashMap::from([
            ("INTERFACES", "FORMS"),
            ("QMAKE_POST_BUILD", "QMAKE_POST_LINK"),
            ("TARGETDEPS", "POST_TARGETDEPS"),
            ("LIBPATH", "QMAKE_LIBDIR"),
            ("QMAKE_RPATH", "QMAKE_LFLAGS_RPATH"),
        ])
    })
}

pub struct Evaluator<'a> {
    pub(crate) options: &'a GlobalOptions,
    pub(crate) handler: &'a dyn MessageHandler,
    pub(crate) vfs: &'a Vfs<'a>,
    pub(crate) cache: &'a ProFileCache,
    pub(crate) stack: ValueMapStack,
    pub(crate) test_functions: HashMap<ProKey, ProFunctionDef>,
    pub(crate) replace_functions: HashMap<ProKey, ProFunctionDef>,
    pub(crate) file_stack: Vec<ProFileRef>,
    pub(crate) line: u32,
    pub(crate) sts: Guard,
    pub(crate) function_depth: usize,
    pub(crate) return_value: Option<ProStringList>,
    pub(crate) host_build: bool,
    pub(crate) spec_dir: Option<PathBuf>,
    pub(crate) feature_roots: Option<Vec<PathBuf>>,
    pub(crate) feature_cache: HashMap<String, Option<PathBuf>>,
    pub(crate) deprecation_warned: HashSet<String>,
    pub(crate) list_counter: usize,
    /// Variable values as they stood before the project body ran; the
    /// reference point for the deltas `cache()` persists.
    pub(crate) base_values: ValueMap,
}

impl<'a> Evaluator<'a> {
    pub fn new(
        options: &'a GlobalOptions,
        handler: &'a dyn MessageHandler,
        vfs: &'a Vfs<'a>,
        cache: &'a ProFileCache,
    ) -> Self {
        Evaluator {
            options,
            handler,
            vfs,
            cache,
            stack: ValueMapStack::new(),
            test_functions: HashMap::new(),
            replace_functions: HashMap::new(),
            file_stack: Vec::new(),
            line: 0,
            sts: Guard::new(),
            function_depth: 0,
            return_value: None,
            host_build: false,
            spec_dir: None,
            feature_roots: None,
            feature_cache: HashMap::new(),
            deprecation_warned: HashSet::new(),
            list_counter: 0,
            base_values: ValueMap::new(),
        }
    }

    // ── Diagnostics ──────────────────────────────────────────────────────

    pub(crate) fn message(&self, kind: MessageKind, severity: Severity, text: impl Into<String>) {
        let mut msg = Message::new(kind, severity, text);
        if let Some(pro) = self.file_stack.last() {
            msg = msg.at(pro.file_name().display().to_string(), self.line);
        }
        self.handler.message(&msg);
    }

    pub(crate) fn eval_warning(&self, text: impl Into<String>) {
        self.message(MessageKind::Eval, Severity::Warning, text);
    }

    pub(crate) fn usage_warning(&self, text: impl Into<String>) {
        self.message(MessageKind::Usage, Severity::Warning, text);
    }

    // ── Context accessors ────────────────────────────────────────────────

    pub(crate) fn current_file(&self) -> Option<&ProFileRef> {
        self.file_stack.last()
    }

    pub(crate) fn current_dir(&self) -> PathBuf {
        self.file_stack
            .last()
            .map(|pro| pro.directory().to_path_buf())
            .unwrap_or_else(|| self.options.source_root.clone())
    }

    /// Absolutize a path mentioned in the current file.
    pub(crate) fn resolve_path(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.current_dir().join(p)
        }
    }

    pub(crate) fn values_list(&self, name: &str) -> ProStringList {
        self.stack
            .values(&ProKey::new(name))
            .cloned()
            .unwrap_or_default()
    }

    pub fn values(&self, name: &str) -> ProStringList {
        self.values_list(name)
    }

    pub fn first(&self, name: &str) -> Option<ProString> {
        self.values_list(name).first().cloned()
    }

    /// Remap a legacy variable name, warning once per spelling.
    pub(crate) fn map_variable_name(&mut self, key: ProKey) -> ProKey {
        match deprecated_names().get(key.as_str()) {
            Some(new_name) => {
                if self.deprecation_warned.insert(key.as_str().to_string()) {
                    self.message(
                        MessageKind::Deprecation,
                        Severity::Warning,
                        format!("variable {key} is deprecated; use {new_name} instead"),
                    );
                }
                ProKey::new(new_name)
            }
            None => key,
        }
    }

    // ── Block execution ──────────────────────────────────────────────────

    /// Execute the instructions in `r`. `base` is `r`'s absolute offset
    /// into `pro`'s word buffer, needed to record function bodies and to
    /// re-enter loop bodies.
    pub(crate) fn visit_block(
        &mut self,
        pro: &ProFileRef,
        r: &mut TokenReader<'_>,
        base: usize,
        mode: BlockMode,
    ) -> VisitResult {
        while let Some((op, _)) = r.next_op() {
            match op {
                Op::Line => self.line = u32::from(r.read_u16()),
                Op::Terminator => {
                    if mode == BlockMode::Condition {
                        return Ok(bool_visit(self.sts.okay));
                    }
                    self.sts.reset();
                }
                Op::Not => self.sts.invert = !self.sts.invert,
                Op::And => {}
                Op::Or => self.sts.or_op = true,
                Op::Condition => {
                    let key = r.read_hash_str();
                    let result = self
                        .sts
                        .active()
                        .then(|| self.is_active_config(key.as_str(), true));
                    self.sts.consume(result);
                }
                Op::TestCall => {
                    let name = r.read_hash_str();
                    if self.sts.active() {
                        let args = self.expand_args(pro, r, base)?;
                        match self.call_test(&name, &args)? {
                            v @ (Visit::True | Visit::False) => {
                                self.sts.consume(Some(v.is_true()));
                            }
                            other => return Ok(other),
                        }
                    } else {
                        skip_call_args(r);
                        self.sts.consume(None);
                    }
                }
                Op::Assign | Op::Append | Op::AppendUnique | Op::Remove | Op::Replace => {
                    let key = r.read_hash_str();
                    let values = self.expand_value_list(pro, r, base)?;
                    self.apply_assignment(op, key, values);
                }
                Op::Branch => {
                    let v = self.visit_branch(pro, r, base)?;
                    if v != Visit::True && v != Visit::False {
                        return Ok(v);
                    }
                }
                Op::ForLoop => {
                    let v = self.visit_loop(pro, r, base)?;
                    if v == Visit::Returned {
                        return Ok(v);
                    }
                }
                Op::TestDef | Op::ReplaceDef => {
                    let name = r.read_hash_str();
                    let len = r.read_block_len();
                    let offset = base + r.pos();
                    r.skip(len);
                    let def = ProFunctionDef::new(pro.clone(), offset, len);
                    if op == Op::TestDef {
                        self.test_functions.insert(name, def);
                    } else {
                        self.replace_functions.insert(name, def);
                    }
                }
                Op::Return => {
                    let values = self.expand_value_list(pro, r, base)?;
                    self.return_value = Some(values);
                    return Ok(Visit::Returned);
                }
                Op::Break => return Ok(Visit::Break),
                Op::Next => return Ok(Visit::Next),
                other => unreachable!("opcode {other:?} at statement level"),
            }
        }
        Ok(if mode == BlockMode::Condition {
            bool_visit(self.sts.okay)
        } else {
            Visit::True
        })
    }

    fn visit_branch(
        &mut self,
        pro: &ProFileRef,
        r: &mut TokenReader<'_>,
        base: usize,
    ) -> VisitResult {
        let then_len = r.read_block_len();
        let taken = self.sts.okay;
        self.sts.reset();
        if taken {
            let start = base + r.pos();
            let mut body = r.sub_block(then_len);
            let result = self.visit_block(pro, &mut body, start, BlockMode::Statements)?;
            let else_len = r.read_block_len();
            r.skip(else_len);
            Ok(result)
        } else {
            r.skip(then_len);
            let else_len = r.read_block_len();
            let start = base + r.pos();
            let mut body = r.sub_block(else_len);
            self.visit_block(pro, &mut body, start, BlockMode::Statements)
        }
    }

    fn visit_loop(
        &mut self,
        pro: &ProFileRef,
        r: &mut TokenReader<'_>,
        base: usize,
    ) -> VisitResult {
        let var = r.read_hash_str();
        let expr = self.expand_value_list(pro, r, base)?;
        let body_len = r.read_block_len();
        let body_start = base + r.pos();
        r.skip(body_len);

        let saved = if var.is_empty() {
            None
        } else {
            Some(self.stack.values(&var).cloned())
        };

        let result = if var.is_empty() {
            self.run_ever_loop(pro, body_start, body_len)
        } else {
            let items = self.loop_items(&expr);
            self.run_item_loop(pro, body_start, body_len, &var, items)
        };

        if let Some(prior) = saved {
            match prior {
                Some(values) => self.stack.set(var, values),
                None => {
                    self.stack.unset(&var);
                }
            }
        }
        result
    }

    fn run_ever_loop(&mut self, pro: &ProFileRef, offset: usize, len: usize) -> VisitResult {
        for _ in 0..EVER_LIMIT {
            let mut body = pro.reader_at(offset, len);
            match self.visit_block(pro, &mut body, offset, BlockMode::Statements)? {
                Visit::Break => return Ok(Visit::True),
                Visit::Returned => return Ok(Visit::Returned),
                _ => {}
            }
        }
        Err(EvalError::LoopLimit(EVER_LIMIT))
    }

    /// Resolve a `for()` expression into its iteration items. The expanded
    /// expression names a list variable (which is how `$$list(...)` feeds a
    /// loop); a name with no bound values is tried as an inclusive `a..b`
    /// integer range.
    fn loop_items(&self, expr: &ProStringList) -> Vec<ProString> {
        let name = expr.join(" ");
        if name.is_empty() {
            return Vec::new();
        }
        let bound = self.values_list(&name);
        if !bound.is_empty() {
            return bound.iter().cloned().collect();
        }
        static RANGE: OnceLock<regex::Regex> = OnceLock::new();
        let range = RANGE
            .get_or_init(|| regex::Regex::new(r"^(-?\d+)\.\.(-?\d+)$").expect("static pattern"));
        if let Some(caps) = range.captures(&name) {
            let parse = |idx: usize| caps[idx].parse::<i64>().ok();
            if let (Some(start), Some(end)) = (parse(1), parse(2)) {
                let mut items = Vec::new();
                if start <= end {
                    for i in start..=end {
                        items.push(ProString::from(i.to_string()));
                    }
                } else {
                    for i in (end..=start).rev() {
                        items.push(ProString::from(i.to_string()));
                    }
                }
                return items;
            }
        }
        Vec::new()
    }

    fn run_item_loop(
        &mut self,
        pro: &ProFileRef,
        offset: usize,
        len: usize,
        var: &ProKey,
        items: Vec<ProString>,
    ) -> VisitResult {
        for item in items {
            if item.is_empty() {
                continue;
            }
            self.stack.set(var.clone(), ProStringList::one(item));
            let mut body = pro.reader_at(offset, len);
            match self.visit_block(pro, &mut body, offset, BlockMode::Statements)? {
                Visit::Break => break,
                Visit::Returned => return Ok(Visit::Returned),
                _ => {}
            }
        }
        Ok(Visit::True)
    }

    // ── Assignments ──────────────────────────────────────────────────────

    pub(crate) fn apply_assignment(&mut self, op: Op, key: ProKey, values: ProStringList) {
        let key = self.map_variable_name(key);
        match op {
            Op::Assign => {
                let mut values = values;
                values.remove_empties();
                self.stack.set(key.clone(), values);
            }
            Op::Append => {
                self.stack
                    .values_mut(&key)
                    .extend(values.iter().cloned());
            }
            Op::AppendUnique => {
                let dst = self.stack.values_mut(&key);
                for v in values {
                    dst.insert_unique(v);
                }
            }
            Op::Remove => {
                let dst = self.stack.values_mut(&key);
                for v in values.iter() {
                    dst.remove_all(v.as_str());
                }
            }
            Op::Replace => self.apply_substitution(&key, &values),
            other => unreachable!("opcode {other:?} is not an assignment"),
        }
        match key.as_str() {
            "QMAKESPEC" | "QMAKE_PLATFORM" => {
                self.feature_roots = None;
                self.feature_cache.clear();
            }
            _ => {}
        }
    }

    /// `VAR ~= s<delim>pattern<delim>replacement<delim>[flags]` — flags `g`
    /// (all occurrences) and `i` (case-insensitive).
    fn apply_substitution(&mut self, key: &ProKey, values: &ProStringList) {
        let expr = values.join(" ");
        let mut chars = expr.chars();
        if chars.next() != Some('s') {
            self.eval_warning(format!("invalid substitution expression '{expr}'"));
            return;
        }
        let Some(delim) = chars.next() else {
            self.eval_warning(format!("invalid substitution expression '{expr}'"));
            return;
        };
        let rest: String = chars.collect();
        let parts: Vec<&str> = rest.splitn(3, delim).collect();
        if parts.len() < 2 {
            self.eval_warning(format!("invalid substitution expression '{expr}'"));
            return;
        }
        let (pattern, replacement) = (parts[0], parts[1]);
        let flags = parts.get(2).copied().unwrap_or("");
        let global = flags.contains('g');
        let pattern = if flags.contains('i') {
            format!("(?i){pattern}")
        } else {
            pattern.to_string()
        };
        let re = match regex::Regex::new(&pattern) {
            Ok(re) => re,
            Err(e) => {
                self.eval_warning(format!("invalid substitution pattern: {e}"));
                return;
            }
        };
        let dst = self.stack.values_mut(key);
        for item in dst.iter_mut() {
            let replaced = if global {
                re.replace_all(item.as_str(), replacement)
            } else {
                re.replace(item.as_str(), replacement)
            };
            if replaced != item.as_str() {
                *item = ProString::from(replaced.into_owned());
            }
        }
    }

    // ── Conditions and calls ─────────────────────────────────────────────

    /// The bare-word condition test: `true`/`false` literals, the active
    /// host/target mode, then CONFIG and QMAKE_PLATFORM membership
    /// (wildcards allowed when `wildcard` is set).
    pub(crate) fn is_active_config(&self, word: &str, wildcard: bool) -> bool {
        match word {
            "true" => return true,
            "false" => return false,
            "host_build" => return self.host_build,
            _ => {}
        }
        let config = self.values_list("CONFIG");
        let platform = self.values_list("QMAKE_PLATFORM");
        if wildcard && word.contains(|c| matches!(c, '*' | '?' | '[')) {
            if let Ok(re) = wildcard_regex(word) {
                return config.iter().any(|c| re.is_match(c.as_str()))
                    || platform.iter().any(|p| re.is_match(p.as_str()));
            }
        }
        config.contains_str(word) || platform.contains_str(word)
    }

    pub(crate) fn call_test(&mut self, name: &ProKey, args: &[ProStringList]) -> VisitResult {
        if let Some(f) = builtins::test_builtin(name.as_str()) {
            return f(self, args);
        }
        if let Some(def) = self.test_functions.get(name).cloned() {
            return self.run_test_function(&def, args);
        }
        self.eval_warning(format!("'{name}' is not a recognized test function"));
        Ok(Visit::False)
    }

    pub(crate) fn call_replace(
        &mut self,
        name: &ProKey,
        args: &[ProStringList],
    ) -> Result<ProStringList, EvalError> {
        if let Some(f) = builtins::expand_builtin(name.as_str()) {
            return f(self, args);
        }
        if let Some(def) = self.replace_functions.get(name).cloned() {
            return self.run_replace_function(&def, args);
        }
        self.eval_warning(format!("'{name}' is not a recognized replace function"));
        Ok(ProStringList::new())
    }

    /// Shared machinery for user-defined function bodies: fresh frame,
    /// `ARGS`/`ARGC`/positional bindings, depth cap, guard isolation.
    fn invoke_function(&mut self, def: &ProFunctionDef, args: &[ProStringList]) -> VisitResult {
        if self.function_depth >= RECURSION_LIMIT {
            return Err(EvalError::RecursionLimit(RECURSION_LIMIT));
        }
        self.function_depth += 1;
        self.stack.push();
        let mut all = ProStringList::new();
        for (i, arg) in args.iter().enumerate() {
            self.stack
                .set(ProKey::new(&(i + 1).to_string()), arg.clone());
            all.extend(arg.iter().cloned());
        }
        self.stack.set(ProKey::new("ARGS"), all);
        self.stack.set(
            ProKey::new("ARGC"),
            ProStringList::one(ProString::from(args.len().to_string())),
        );

        let saved_sts = self.sts;
        let saved_line = self.line;
        self.sts.reset();
        let pro = def.pro().clone();
        let mut body = def.reader();
        let result = self.visit_block(&pro, &mut body, def.offset(), BlockMode::Statements);

        self.sts = saved_sts;
        self.line = saved_line;
        self.stack.pop();
        self.function_depth -= 1;
        result
    }

    pub(crate) fn run_test_function(
        &mut self,
        def: &ProFunctionDef,
        args: &[ProStringList],
    ) -> VisitResult {
        self.return_value = None;
        match self.invoke_function(def, args)? {
            Visit::Returned => {
                let value = self.return_value.take().unwrap_or_default();
                Ok(bool_visit(list_as_bool(self, &value)))
            }
            v => Ok(v),
        }
    }

    pub(crate) fn run_replace_function(
        &mut self,
        def: &ProFunctionDef,
        args: &[ProStringList],
    ) -> Result<ProStringList, EvalError> {
        self.return_value = None;
        self.invoke_function(def, args)?;
        Ok(self.return_value.take().unwrap_or_default())
    }

    // ── Files, includes and features ─────────────────────────────────────

    /// Compile `path` through the document cache.
    pub(crate) fn parse_cached(&self, path: &Path) -> Option<ProFileRef> {
        let handler = self.handler;
        let vfs = self.vfs;
        self.cache.pro_file(path, || {
            let text = vfs.read_text(path).ok()?;
            Some(Parser::new(handler).parse(path, &text, 1, Grammar::Full))
        })
    }

    /// Visit a file's statements in the current scope (the `include()` /
    /// feature-load path). A top-level `return()` in the file ends it
    /// normally.
    pub(crate) fn evaluate_file(&mut self, path: &Path) -> VisitResult {
        if self.file_stack.iter().any(|f| f.file_name() == path) {
            return Err(EvalError::CircularInclude(path.to_path_buf()));
        }
        let Some(pro) = self.parse_cached(path) else {
            return Ok(Visit::False);
        };
        if !pro.is_ok() {
            return Ok(Visit::False);
        }
        self.file_stack.push(pro.clone());
        let saved_line = self.line;
        let saved_sts = self.sts;
        self.sts.reset();
        let mut r = pro.reader();
        let result = self.visit_block(&pro, &mut r, 0, BlockMode::Statements);
        self.sts = saved_sts;
        self.line = saved_line;
        self.file_stack.pop();
        match result? {
            Visit::Returned | Visit::True => Ok(Visit::True),
            v => Ok(v),
        }
    }

    pub(crate) fn ensure_feature_roots(&mut self) {
        if self.feature_roots.is_some() {
            return;
        }
        let platforms: Vec<String> = self
            .values_list("QMAKE_PLATFORM")
            .iter()
            .map(|p| p.as_str().to_string())
            .collect();
        let qmakefeatures = self.stack.values(&ProKey::new("QMAKEFEATURES")).cloned();
        self.feature_roots = Some(features::feature_roots(
            self.options,
            qmakefeatures.as_ref(),
            &platforms,
            self.spec_dir.as_deref(),
        ));
    }

    /// Load a feature by short name. `silent` suppresses the unknown-feature
    /// warning (used by the CONFIG fixed point, where most entries are not
    /// features at all).
    pub(crate) fn load_feature(&mut self, name: &str, silent: bool) -> VisitResult {
        self.ensure_feature_roots();
        let resolved = match self.feature_cache.get(name) {
            Some(cached) => cached.clone(),
            None => {
                let roots = self.feature_roots.clone().unwrap_or_default();
                let r = features::resolve_feature(self.vfs, &roots, name);
                self.feature_cache.insert(name.to_string(), r.clone());
                r
            }
        };
        let Some(path) = resolved else {
            if !silent {
                self.eval_warning(format!("cannot find feature {name}"));
            }
            return Ok(Visit::False);
        };
        let path_str = ProString::from(path.display().to_string());
        let included = ProKey::new("QMAKE_INTERNAL_INCLUDED_FEATURES");
        if self
            .stack
            .values(&included)
            .map_or(false, |l| l.contains_str(path_str.as_str()))
        {
            self.eval_warning(format!("feature {name} already included"));
            return Ok(Visit::True);
        }
        self.stack.values_mut(&included).push(path_str);
        self.evaluate_file(&path)
    }

    // ── Project orchestration ────────────────────────────────────────────

    /// Evaluate a whole project document: defaults, spec, pre/post features,
    /// body, CONFIG fixed point.
    pub fn evaluate_project(
        &mut self,
        pro: &ProFileRef,
        flags: LoadFlags,
        base_cache: Option<&BaseContextCache>,
    ) -> VisitResult {
        self.host_build = pro.is_host_build();
        self.file_stack.push(pro.clone());
        self.setup_defaults(pro);

        let result = self.evaluate_project_inner(pro, flags, base_cache);

        self.file_stack.pop();
        result
    }

    fn evaluate_project_inner(
        &mut self,
        pro: &ProFileRef,
        flags: LoadFlags,
        base_cache: Option<&BaseContextCache>,
    ) -> VisitResult {
        if flags.spec {
            self.load_base_context(base_cache)?;
        }
        self.base_values = self.stack.global_frame().clone();
        if flags.features {
            self.load_feature("default_pre", true)?;
        }

        let mut r = pro.reader();
        let body = self.visit_block(pro, &mut r, 0, BlockMode::Statements)?;
        if body == Visit::Break || body == Visit::Next {
            unreachable!("loop control cannot escape a file");
        }

        if flags.features {
            self.load_feature("default_post", true)?;
            self.run_config_features()?;
        }
        Ok(Visit::True)
    }

    fn setup_defaults(&mut self, pro: &ProFileRef) {
        let path = pro.file_name();
        let dir = pro.directory();
        let set = |ev: &mut Self, name: &str, value: String| {
            ev.stack
                .set(ProKey::new(name), ProStringList::one(ProString::from(value)));
        };
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            set(self, "TARGET", stem.to_string());
        }
        set(self, "_PRO_FILE_", path.display().to_string());
        set(self, "_PRO_FILE_PWD_", dir.display().to_string());
        let out_dir = self
            .options
            .shadowed_path(dir)
            .unwrap_or_else(|| dir.to_path_buf());
        set(self, "OUT_PWD", out_dir.display().to_string());
        set(self, "QMAKE_DIR_SEP", std::path::MAIN_SEPARATOR.to_string());
        set(self, "QMAKE_HOST.os", std::env::consts::OS.to_string());
        set(self, "QMAKE_HOST.arch", std::env::consts::ARCH.to_string());
        let platform = if cfg!(windows) { "win32" } else { "unix" };
        set(self, "QMAKE_PLATFORM", platform.to_string());
    }

    fn load_base_context(&mut self, base_cache: Option<&BaseContextCache>) -> VisitResult {
        let spec_name = if self.host_build && !self.options.host_spec.is_empty() {
            self.options.host_spec.clone()
        } else if !self.options.qmakespec.is_empty() {
            self.options.qmakespec.clone()
        } else {
            self.options
                .env_value("QMAKESPEC")
                .unwrap_or_default()
                .to_string()
        };
        if spec_name.is_empty() {
            return Ok(Visit::True);
        }
        if let Some(cache) = base_cache {
            let ctx = cache.base_context(&spec_name, self.host_build, || {
                let mut child = Evaluator::new(self.options, self.handler, self.vfs, self.cache);
                child.host_build = self.host_build;
                child.load_spec(&spec_name)?;
                Ok(child.into_base_context())
            })?;
            self.stack
                .global_frame_mut()
                .extend(ctx.values.iter().map(|(k, v)| (k.clone(), v.clone())));
            self.test_functions
                .extend(ctx.test_functions.iter().map(|(k, v)| (k.clone(), v.clone())));
            self.replace_functions.extend(
                ctx.replace_functions
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone())),
            );
            self.spec_dir = ctx.spec_dir.clone();
            self.feature_roots = None;
            Ok(Visit::True)
        } else {
            self.load_spec(&spec_name)
        }
    }

    fn load_spec(&mut self, spec_name: &str) -> VisitResult {
        let Some(dir) = features::resolve_spec(self.options, self.vfs, spec_name) else {
            self.eval_warning(format!("could not find qmake spec '{spec_name}'"));
            return Ok(Visit::False);
        };
        self.stack.set(
            ProKey::new("QMAKESPEC"),
            ProStringList::one(ProString::from(dir.display().to_string())),
        );
        self.spec_dir = Some(dir.clone());
        self.feature_roots = None;
        self.feature_cache.clear();
        self.evaluate_file(&dir.join("qmake.conf"))
    }

    pub(crate) fn into_base_context(self) -> crate::project::BaseContext {
        crate::project::BaseContext {
            values: self.stack.global_frame().clone(),
            test_functions: self.test_functions,
            replace_functions: self.replace_functions,
            spec_dir: self.spec_dir,
        }
    }

    /// Apply `<name>.prf` for every CONFIG entry, repeatedly, until a full
    /// pass adds no new entries. Later CONFIG entries take priority (they
    /// are processed first).
    fn run_config_features(&mut self) -> Result<(), EvalError> {
        let mut processed: HashSet<String> = HashSet::new();
        loop {
            let config = self.values_list("CONFIG");
            let mut progressed = false;
            let snapshot: Vec<String> = config
                .iter()
                .rev()
                .map(|c| c.as_str().to_string())
                .collect();
            for name in snapshot {
                if processed.insert(name.clone()) {
                    progressed = true;
                    self.load_feature(&name, true)?;
                }
            }
            if !progressed {
                return Ok(());
            }
        }
    }
}

pub(crate) fn bool_visit(b: bool) -> Visit {
    if b {
        Visit::True
    } else {
        Visit::False
    }
}

/// Interpret a user test function's `return()` list as a boolean.
fn list_as_bool(ev: &Evaluator<'_>, value: &ProStringList) -> bool {
    let Some(first) = value.first() else {
        return false;
    };
    match first.as_str() {
        "true" => true,
        "false" | "" => false,
        s => match s.parse::<i64>() {
            Ok(n) => n != 0,
            Err(_) => {
                ev.eval_warning(format!("function returned non-boolean value '{s}'"));
                false
            }
        },
    }
}

/// Structurally skip a call's argument words up to its `FuncTerminator`,
/// without evaluating anything (the guard already short-circuited).
pub(crate) fn skip_call_args(r: &mut TokenReader<'_>) {
    let mut depth = 0usize;
    while let Some((op, _)) = r.next_op() {
        match op {
            Op::Literal | Op::EnvVar | Op::Property => {
                r.read_str();
            }
            Op::HashLiteral | Op::Variable => {
                r.read_hash_str();
            }
            Op::FuncName => {
                r.read_hash_str();
                depth += 1;
            }
            Op::FuncTerminator => {
                if depth == 0 {
                    return;
                }
                depth -= 1;
            }
            Op::ArgSeparator => {}
            other => unreachable!("opcode {other:?} inside call arguments"),
        }
    }
}
