//! The test (boolean, side-effecting) built-ins.

use crate::builtins::{arg_text, check_args, text};
use crate::error::{EvalError, Visit, VisitResult};
use crate::evaluator::{bool_visit, BlockMode, Evaluator};
use crate::vfs::{wildcard_regex, WriteFlags};
use promake_parser::{Grammar, Parser};
use promake_types::{ProKey, ProString, ProStringList};
use std::path::{Path, PathBuf};

fn vb(b: bool) -> VisitResult {
    Ok(bool_visit(b))
}

/// Parse and evaluate a conditional snippet in the current context, as
/// `if()` and `requires()` do.
fn evaluate_condition_text(ev: &mut Evaluator<'_>, cond: &str) -> VisitResult {
    let file = ev
        .current_file()
        .map(|p| p.file_name().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("(eval)"));
    let pro = Parser::new(ev.handler).parse(&file, cond, ev.line.max(1), Grammar::Test);
    if !pro.is_ok() {
        return vb(false);
    }
    let saved = ev.sts;
    ev.sts.reset();
    let mut r = pro.reader();
    let result = ev.visit_block(&pro, &mut r, 0, BlockMode::Condition);
    ev.sts = saved;
    result
}

pub(crate) fn config(ev: &mut Evaluator<'_>, args: &[ProStringList]) -> VisitResult {
    if !check_args(ev, "CONFIG(config, mutuals)", args, 1, 2) {
        return vb(false);
    }
    let wanted = arg_text(args, 0);
    if args.len() == 1 {
        return vb(ev.is_active_config(&wanted, true));
    }
    // Mutually exclusive group: the latest CONFIG entry belonging to the
    // group decides.
    let mut mutuals: Vec<String> = arg_text(args, 1)
        .split('|')
        .map(str::to_string)
        .collect();
    if !mutuals.contains(&wanted) {
        mutuals.push(wanted.clone());
    }
    for entry in ev.values_list("CONFIG").iter().rev() {
        if mutuals.iter().any(|m| m == entry.as_str()) {
            return vb(entry.as_str() == wanted);
        }
    }
    vb(false)
}

pub(crate) fn contains(ev: &mut Evaluator<'_>, args: &[ProStringList]) -> VisitResult {
    if !check_args(ev, "contains(var, value, mutuals)", args, 2, 3) {
        return vb(false);
    }
    let pattern = arg_text(args, 1);
    let re = match regex::Regex::new(&format!("^(?:{pattern})$")) {
        Ok(re) => re,
        Err(e) => {
            ev.eval_warning(format!("contains: invalid pattern: {e}"));
            return vb(false);
        }
    };
    let values = ev.values_list(&arg_text(args, 0));
    if args.len() == 2 {
        return vb(values.iter().any(|v| re.is_match(v.as_str())));
    }
    let mutuals: Vec<String> = arg_text(args, 2).split('|').map(str::to_string).collect();
    for value in values.iter().rev() {
        if re.is_match(value.as_str()) {
            return vb(true);
        }
        if mutuals.iter().any(|m| m == value.as_str()) {
            return vb(false);
        }
    }
    vb(false)
}

pub(crate) fn count(ev: &mut Evaluator<'_>, args: &[ProStringList]) -> VisitResult {
    if !check_args(ev, "count(var, count, op)", args, 2, 3) {
        return vb(false);
    }
    let actual = ev.values_list(&arg_text(args, 0)).len() as i64;
    let Ok(wanted) = arg_text(args, 1).parse::<i64>() else {
        ev.usage_warning("count: invalid count".to_string());
        return vb(false);
    };
    let op = if args.len() >= 3 {
        arg_text(args, 2)
    } else {
        "equals".to_string()
    };
    let result = match op.as_str() {
        "equals" | "isEqual" | "=" | "==" => actual == wanted,
        "greaterThan" | ">" => actual > wanted,
        "lessThan" | "<" => actual < wanted,
        ">=" => actual >= wanted,
        "<=" => actual <= wanted,
        "!=" => actual != wanted,
        _ => {
            ev.usage_warning(format!("count: unexpected modifier '{op}'"));
            return vb(false);
        }
    };
    vb(result)
}

fn compare(ev: &mut Evaluator<'_>, args: &[ProStringList], usage: &str) -> Option<std::cmp::Ordering> {
    if !check_args(ev, usage, args, 2, 2) {
        return None;
    }
    let lhs = ev.values_list(&arg_text(args, 0)).join(" ");
    let rhs = arg_text(args, 1);
    match (lhs.trim().parse::<i64>(), rhs.trim().parse::<i64>()) {
        (Ok(a), Ok(b)) => Some(a.cmp(&b)),
        _ => Some(lhs.cmp(&rhs)),
    }
}

pub(crate) fn equals(ev: &mut Evaluator<'_>, args: &[ProStringList]) -> VisitResult {
    match compare(ev, args, "equals(var, value)") {
        Some(ord) => vb(ord == std::cmp::Ordering::Equal),
        None => vb(false),
    }
}

pub(crate) fn greater_than(ev: &mut Evaluator<'_>, args: &[ProStringList]) -> VisitResult {
    match compare(ev, args, "greaterThan(var, value)") {
        Some(ord) => vb(ord == std::cmp::Ordering::Greater),
        None => vb(false),
    }
}

pub(crate) fn less_than(ev: &mut Evaluator<'_>, args: &[ProStringList]) -> VisitResult {
    match compare(ev, args, "lessThan(var, value)") {
        Some(ord) => vb(ord == std::cmp::Ordering::Less),
        None => vb(false),
    }
}

pub(crate) fn exists(ev: &mut Evaluator<'_>, args: &[ProStringList]) -> VisitResult {
    if !check_args(ev, "exists(file)", args, 1, 1) {
        return vb(false);
    }
    let pattern = arg_text(args, 0);
    let path = ev.resolve_path(&pattern);
    if ev.vfs.exists(&path) {
        return vb(true);
    }
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    if name.contains(|c| matches!(c, '*' | '?' | '[')) {
        if let (Some(dir), Ok(re)) = (path.parent(), wildcard_regex(name)) {
            return vb(!ev.vfs.list_matching(dir, &re, true).is_empty());
        }
    }
    vb(false)
}

pub(crate) fn include(ev: &mut Evaluator<'_>, args: &[ProStringList]) -> VisitResult {
    if !check_args(ev, "include(file, into, silent)", args, 1, 3) {
        return vb(false);
    }
    let path = ev.resolve_path(&arg_text(args, 0));
    let into = arg_text(args, 1);
    let silent = matches!(arg_text(args, 2).as_str(), "true" | "1");
    if !ev.vfs.exists(&path) {
        if !silent {
            ev.eval_warning(format!("cannot read {}", path.display()));
        }
        return vb(false);
    }
    if into.is_empty() {
        return ev.evaluate_file(&path);
    }
    // Evaluate into a separate namespace: child evaluation, then import
    // every resulting variable under the `<into>.` prefix.
    let mut child = Evaluator::new(ev.options, ev.handler, ev.vfs, ev.cache);
    let result = child.evaluate_file(&path)?;
    for (key, values) in child.stack.global_frame() {
        let imported = ProKey::new(&format!("{into}.{key}"));
        ev.stack.set(imported, values.clone());
    }
    Ok(result)
}

pub(crate) fn load(ev: &mut Evaluator<'_>, args: &[ProStringList]) -> VisitResult {
    if !check_args(ev, "load(feature, ignore_missing)", args, 1, 2) {
        return vb(false);
    }
    let ignore_missing = matches!(arg_text(args, 1).as_str(), "true" | "1");
    ev.load_feature(&arg_text(args, 0), ignore_missing)
}

pub(crate) fn infile(ev: &mut Evaluator<'_>, args: &[ProStringList]) -> VisitResult {
    if !check_args(ev, "infile(file, var, value)", args, 2, 3) {
        return vb(false);
    }
    let path = ev.resolve_path(&arg_text(args, 0));
    let mut child = Evaluator::new(ev.options, ev.handler, ev.vfs, ev.cache);
    child.evaluate_file(&path)?;
    let values = child.values_list(&arg_text(args, 1));
    if args.len() == 2 {
        return vb(!values.is_empty());
    }
    vb(values.contains_str(&arg_text(args, 2)))
}

pub(crate) fn is_empty(ev: &mut Evaluator<'_>, args: &[ProStringList]) -> VisitResult {
    if !check_args(ev, "isEmpty(var)", args, 1, 1) {
        return vb(false);
    }
    let values = ev.values_list(&arg_text(args, 0));
    vb(values.is_empty() || (values.len() == 1 && values[0].is_empty()))
}

pub(crate) fn defined(ev: &mut Evaluator<'_>, args: &[ProStringList]) -> VisitResult {
    if !check_args(ev, "defined(function, type)", args, 1, 2) {
        return vb(false);
    }
    let name = ProKey::new(&arg_text(args, 0));
    let result = match arg_text(args, 1).as_str() {
        "test" => ev.test_functions.contains_key(&name),
        "replace" => ev.replace_functions.contains_key(&name),
        "var" => ev.stack.is_set(&name),
        "" => ev.test_functions.contains_key(&name) || ev.replace_functions.contains_key(&name),
        other => {
            ev.usage_warning(format!("defined(function, type): unexpected type '{other}'"));
            return vb(false);
        }
    };
    vb(result)
}

pub(crate) fn export(ev: &mut Evaluator<'_>, args: &[ProStringList]) -> VisitResult {
    if !check_args(ev, "export(var)", args, 1, 1) {
        return vb(false);
    }
    let key = ProKey::new(&arg_text(args, 0));
    let values = ev.stack.values(&key).cloned().unwrap_or_default();
    ev.stack.set_global(key, values);
    vb(true)
}

pub(crate) fn clear(ev: &mut Evaluator<'_>, args: &[ProStringList]) -> VisitResult {
    if !check_args(ev, "clear(var)", args, 1, 1) {
        return vb(false);
    }
    let key = ProKey::new(&arg_text(args, 0));
    if !ev.stack.is_set(&key) {
        return vb(false);
    }
    ev.stack.set(key, ProStringList::new());
    vb(true)
}

pub(crate) fn unset(ev: &mut Evaluator<'_>, args: &[ProStringList]) -> VisitResult {
    if !check_args(ev, "unset(var)", args, 1, 1) {
        return vb(false);
    }
    vb(ev.stack.unset(&ProKey::new(&arg_text(args, 0))))
}

pub(crate) fn eval(ev: &mut Evaluator<'_>, args: &[ProStringList]) -> VisitResult {
    if !check_args(ev, "eval(string)", args, 1, usize::MAX) {
        return vb(false);
    }
    let code = args.iter().map(text).collect::<Vec<_>>().join(" ");
    let file = ev
        .current_file()
        .map(|p| p.file_name().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("(eval)"));
    let pro = Parser::new(ev.handler).parse(&file, &code, ev.line.max(1), Grammar::Full);
    if !pro.is_ok() {
        return vb(false);
    }
    let saved = ev.sts;
    ev.sts.reset();
    let mut r = pro.reader();
    let result = ev.visit_block(&pro, &mut r, 0, BlockMode::Statements);
    ev.sts = saved;
    match result? {
        Visit::False => vb(false),
        _ => vb(true),
    }
}

pub(crate) fn if_(ev: &mut Evaluator<'_>, args: &[ProStringList]) -> VisitResult {
    if !check_args(ev, "if(condition)", args, 1, 1) {
        return vb(false);
    }
    evaluate_condition_text(ev, &arg_text(args, 0))
}

pub(crate) fn requires(ev: &mut Evaluator<'_>, args: &[ProStringList]) -> VisitResult {
    for arg in args {
        let cond = text(arg);
        if !evaluate_condition_text(ev, &cond)?.is_true() {
            ev.stack
                .values_mut(&ProKey::new("QMAKE_FAILED_REQUIREMENTS"))
                .push(ProString::from(cond));
        }
    }
    vb(true)
}

pub(crate) fn mkpath(ev: &mut Evaluator<'_>, args: &[ProStringList]) -> VisitResult {
    if !check_args(ev, "mkpath(path)", args, 1, 1) {
        return vb(false);
    }
    let path = ev.resolve_path(&arg_text(args, 0));
    match ev.vfs.mkpath(&path) {
        Ok(()) => vb(true),
        Err(e) => {
            ev.eval_warning(format!("mkpath: cannot create {}: {e}", path.display()));
            vb(false)
        }
    }
}

pub(crate) fn write_file(ev: &mut Evaluator<'_>, args: &[ProStringList]) -> VisitResult {
    if !check_args(ev, "write_file(name, var, flags)", args, 1, 3) {
        return vb(false);
    }
    let path = ev.resolve_path(&arg_text(args, 0));
    let content = if args.len() >= 2 {
        let values = ev.values_list(&arg_text(args, 1));
        if values.is_empty() {
            String::new()
        } else {
            let mut s = values
                .iter()
                .map(|v| v.as_str().to_string())
                .collect::<Vec<_>>()
                .join("\n");
            s.push('\n');
            s
        }
    } else {
        String::new()
    };
    let mut flags = WriteFlags::default();
    if args.len() >= 3 {
        for flag in args[2].iter() {
            match flag.as_str() {
                "append" => flags.append = true,
                "exe" => flags.executable = true,
                other => {
                    ev.usage_warning(format!("write_file: unexpected flag '{other}'"));
                    return vb(false);
                }
            }
        }
    }
    ev.vfs
        .write_text(&path, &content, flags)
        .map_err(|source| EvalError::FileWrite { path, source })?;
    vb(true)
}

pub(crate) fn touch(ev: &mut Evaluator<'_>, args: &[ProStringList]) -> VisitResult {
    if !check_args(ev, "touch(file, reffile)", args, 2, 2) {
        return vb(false);
    }
    let path = ev.resolve_path(&arg_text(args, 0));
    let reference = ev.resolve_path(&arg_text(args, 1));
    match ev.vfs.touch(&path, Some(&reference)) {
        Ok(()) => vb(true),
        Err(e) => {
            ev.eval_warning(format!("touch: {}: {e}", path.display()));
            vb(false)
        }
    }
}

pub(crate) fn cache(ev: &mut Evaluator<'_>, args: &[ProStringList]) -> VisitResult {
    if !check_args(ev, "cache(var, flags, srcvar)", args, 1, 3) {
        return vb(false);
    }
    let var = arg_text(args, 0);
    let mut op = "=";
    let mut transient = false;
    let mut target = CacheTarget::Cache;
    if args.len() >= 2 {
        for flag in args[1].iter() {
            match flag.as_str() {
                "set" => op = "=",
                "add" => op = "+=",
                "sub" => op = "-=",
                "transient" => transient = true,
                "super" => target = CacheTarget::Super,
                "stash" => target = CacheTarget::Stash,
                other => {
                    ev.usage_warning(format!("cache: unexpected flag '{other}'"));
                    return vb(false);
                }
            }
        }
    }
    let source = if args.len() >= 3 {
        arg_text(args, 2)
    } else {
        var.clone()
    };
    let current = ev.values_list(&source);
    let base = ev
        .base_values
        .get(&ProKey::new(&var))
        .cloned()
        .unwrap_or_default();
    // `add`/`sub` persist the delta against the pre-body state of the
    // variable, not its whole value.
    let values: ProStringList = match op {
        "+=" => current
            .iter()
            .filter(|v| !base.contains_str(v.as_str()))
            .cloned()
            .collect(),
        "-=" => base
            .iter()
            .filter(|v| !current.contains_str(v.as_str()))
            .cloned()
            .collect(),
        _ => current,
    };
    let Some(file) = cache_file(ev, target) else {
        ev.eval_warning("cache: no cache file location configured".to_string());
        return vb(false);
    };
    let line = format!("{var} {op} {}\n", values.join(" "));
    let flags = WriteFlags {
        append: true,
        executable: false,
        transient,
    };
    ev.vfs
        .write_text(&file, &line, flags)
        .map_err(|source| EvalError::FileWrite { path: file, source })?;
    vb(true)
}

enum CacheTarget {
    Cache,
    Stash,
    Super,
}

fn cache_file(ev: &Evaluator<'_>, target: CacheTarget) -> Option<PathBuf> {
    let (configured, default_name) = match target {
        CacheTarget::Cache => (&ev.options.cache_file, ".qmake.cache"),
        CacheTarget::Stash => (&ev.options.stash_file, ".qmake.stash"),
        CacheTarget::Super => (&ev.options.super_file, ".qmake.super"),
    };
    if let Some(path) = configured {
        return Some(path.clone());
    }
    let root: &Path = &ev.options.build_root;
    if root.as_os_str().is_empty() {
        return None;
    }
    Some(root.join(default_name))
}

pub(crate) fn debug(ev: &mut Evaluator<'_>, args: &[ProStringList]) -> VisitResult {
    if !check_args(ev, "debug(level, message)", args, 2, 2) {
        return vb(false);
    }
    let level = arg_text(args, 0);
    let msg = arg_text(args, 1);
    ev.handler.file_message(&format!("DEBUG {level}: {msg}"));
    vb(true)
}

pub(crate) fn log(ev: &mut Evaluator<'_>, args: &[ProStringList]) -> VisitResult {
    if !check_args(ev, "log(message)", args, 1, 1) {
        return vb(false);
    }
    ev.handler.file_message(&arg_text(args, 0));
    vb(true)
}

pub(crate) fn message(ev: &mut Evaluator<'_>, args: &[ProStringList]) -> VisitResult {
    let msg = args.iter().map(text).collect::<Vec<_>>().join(" ");
    ev.handler.file_message(&format!("Project MESSAGE: {msg}"));
    vb(true)
}

pub(crate) fn warning(ev: &mut Evaluator<'_>, args: &[ProStringList]) -> VisitResult {
    let msg = args.iter().map(text).collect::<Vec<_>>().join(" ");
    ev.handler.file_message(&format!("Project WARNING: {msg}"));
    vb(true)
}

/// The only built-in that aborts the whole evaluation.
pub(crate) fn error(_ev: &mut Evaluator<'_>, args: &[ProStringList]) -> VisitResult {
    let msg = args.iter().map(text).collect::<Vec<_>>().join(" ");
    Err(EvalError::Aborted(format!("Project ERROR: {msg}")))
}

pub(crate) fn system(ev: &mut Evaluator<'_>, args: &[ProStringList]) -> VisitResult {
    if !check_args(ev, "system(command)", args, 1, 1) {
        return vb(false);
    }
    let command = arg_text(args, 0);
    let mut cmd = if cfg!(windows) {
        let mut c = std::process::Command::new("cmd");
        c.args(["/c", &command]);
        c
    } else {
        let mut c = std::process::Command::new("sh");
        c.args(["-c", &command]);
        c
    };
    let dir = ev.current_dir();
    if dir.is_dir() {
        cmd.current_dir(dir);
    }
    match cmd.status() {
        Ok(status) => vb(status.success()),
        Err(e) => {
            ev.eval_warning(format!("system: cannot run '{command}': {e}"));
            vb(false)
        }
    }
}
