//! The expand (value-producing) built-ins. All of them are pure with
//! respect to the variable stack except `list()`, which mints a temporary
//! variable, and `system()`, which runs a subprocess.

use crate::builtins::{arg_text, check_args, text};
use crate::error::EvalError;
use crate::evaluator::Evaluator;
use crate::vfs::wildcard_regex;
use promake_types::{ProKey, ProString, ProStringList};
use std::path::{Component, Path, PathBuf};

type ExpandResult = Result<ProStringList, EvalError>;

fn ok(list: ProStringList) -> ExpandResult {
    Ok(list)
}

fn none() -> ExpandResult {
    Ok(ProStringList::new())
}

fn one(text: impl Into<String>) -> ExpandResult {
    Ok(ProStringList::one(ProString::from(text.into())))
}

pub(crate) fn join(ev: &mut Evaluator<'_>, args: &[ProStringList]) -> ExpandResult {
    if !check_args(ev, "join(var, glue, before, after)", args, 1, 4) {
        return none();
    }
    let values = ev.values_list(&arg_text(args, 0));
    if values.is_empty() {
        return none();
    }
    let glue = arg_text(args, 1);
    let before = arg_text(args, 2);
    let after = arg_text(args, 3);
    one(format!("{before}{}{after}", values.join(&glue)))
}

pub(crate) fn split(ev: &mut Evaluator<'_>, args: &[ProStringList]) -> ExpandResult {
    if !check_args(ev, "split(var, sep)", args, 1, 2) {
        return none();
    }
    let sep = if args.len() == 2 {
        arg_text(args, 1)
    } else {
        " ".to_string()
    };
    let mut out = ProStringList::new();
    for value in ev.values_list(&arg_text(args, 0)).iter() {
        for piece in value.as_str().split(&sep) {
            out.push(ProString::from(piece));
        }
    }
    ok(out)
}

/// Clamp a possibly-negative index against `len`. Returns None when the
/// list is empty.
fn clamp_index(idx: i64, len: usize) -> Option<usize> {
    if len == 0 {
        return None;
    }
    let len = len as i64;
    let idx = if idx < 0 { len + idx } else { idx };
    Some(idx.clamp(0, len - 1) as usize)
}

pub(crate) fn member(ev: &mut Evaluator<'_>, args: &[ProStringList]) -> ExpandResult {
    if !check_args(ev, "member(var, start, end)", args, 1, 3) {
        return none();
    }
    let values = ev.values_list(&arg_text(args, 0));
    let start_spec = if args.len() >= 2 {
        arg_text(args, 1)
    } else {
        "0".to_string()
    };
    // The second argument may itself be a "start..end" range.
    let (start_text, end_text) = match start_spec.split_once("..") {
        Some((s, e)) => (s.to_string(), Some(e.to_string())),
        None => (start_spec, (args.len() >= 3).then(|| arg_text(args, 2))),
    };
    let Ok(start) = start_text.parse::<i64>() else {
        ev.usage_warning(format!("member: invalid index '{start_text}'"));
        return none();
    };
    let end = match &end_text {
        Some(t) => match t.parse::<i64>() {
            Ok(e) => e,
            Err(_) => {
                ev.usage_warning(format!("member: invalid index '{t}'"));
                return none();
            }
        },
        None => start,
    };
    let (Some(start), Some(end)) = (clamp_index(start, values.len()), clamp_index(end, values.len()))
    else {
        return none();
    };
    let mut out = ProStringList::new();
    if start <= end {
        out.extend(values[start..=end].iter().cloned());
    } else {
        out.extend(values[end..=start].iter().rev().cloned());
    }
    ok(out)
}

pub(crate) fn first(ev: &mut Evaluator<'_>, args: &[ProStringList]) -> ExpandResult {
    if !check_args(ev, "first(var)", args, 1, 1) {
        return none();
    }
    let values = ev.values_list(&arg_text(args, 0));
    ok(values.first().cloned().map(ProStringList::one).unwrap_or_default())
}

pub(crate) fn last(ev: &mut Evaluator<'_>, args: &[ProStringList]) -> ExpandResult {
    if !check_args(ev, "last(var)", args, 1, 1) {
        return none();
    }
    let values = ev.values_list(&arg_text(args, 0));
    ok(values.last().cloned().map(ProStringList::one).unwrap_or_default())
}

pub(crate) fn size(ev: &mut Evaluator<'_>, args: &[ProStringList]) -> ExpandResult {
    if !check_args(ev, "size(var)", args, 1, 1) {
        return none();
    }
    one(ev.values_list(&arg_text(args, 0)).len().to_string())
}

pub(crate) fn cat(ev: &mut Evaluator<'_>, args: &[ProStringList]) -> ExpandResult {
    if !check_args(ev, "cat(file, mode)", args, 1, 2) {
        return none();
    }
    let path = ev.resolve_path(&arg_text(args, 0));
    let Ok(content) = ev.vfs.read_text(&path) else {
        ev.eval_warning(format!("cat: cannot read {}", path.display()));
        return none();
    };
    match arg_text(args, 1).as_str() {
        "blob" => one(content),
        "lines" => ok(content.lines().map(ProString::from).collect()),
        _ => ok(content.split_whitespace().map(ProString::from).collect()),
    }
}

pub(crate) fn fromfile(ev: &mut Evaluator<'_>, args: &[ProStringList]) -> ExpandResult {
    if !check_args(ev, "fromfile(file, var)", args, 2, 2) {
        return none();
    }
    let path = ev.resolve_path(&arg_text(args, 0));
    let mut child = Evaluator::new(ev.options, ev.handler, ev.vfs, ev.cache);
    child.evaluate_file(&path)?;
    ok(child.values_list(&arg_text(args, 1)))
}

pub(crate) fn find(ev: &mut Evaluator<'_>, args: &[ProStringList]) -> ExpandResult {
    if !check_args(ev, "find(var, pattern)", args, 2, 2) {
        return none();
    }
    let pattern = arg_text(args, 1);
    let re = match regex::Regex::new(&pattern) {
        Ok(re) => re,
        Err(e) => {
            ev.eval_warning(format!("find: invalid pattern: {e}"));
            return none();
        }
    };
    ok(ev
        .values_list(&arg_text(args, 0))
        .iter()
        .filter(|v| re.is_match(v.as_str()))
        .cloned()
        .collect())
}

pub(crate) fn replace(ev: &mut Evaluator<'_>, args: &[ProStringList]) -> ExpandResult {
    if !check_args(ev, "replace(var, before, after)", args, 3, 3) {
        return none();
    }
    let re = match regex::Regex::new(&arg_text(args, 1)) {
        Ok(re) => re,
        Err(e) => {
            ev.eval_warning(format!("replace: invalid pattern: {e}"));
            return none();
        }
    };
    let after = arg_text(args, 2);
    ok(ev
        .values_list(&arg_text(args, 0))
        .iter()
        .map(|v| ProString::from(re.replace_all(v.as_str(), after.as_str()).into_owned()))
        .collect())
}

pub(crate) fn sorted(ev: &mut Evaluator<'_>, args: &[ProStringList]) -> ExpandResult {
    if !check_args(ev, "sorted(var)", args, 1, 1) {
        return none();
    }
    let mut values = ev.values_list(&arg_text(args, 0));
    values.sort();
    ok(values)
}

pub(crate) fn unique(ev: &mut Evaluator<'_>, args: &[ProStringList]) -> ExpandResult {
    if !check_args(ev, "unique(var)", args, 1, 1) {
        return none();
    }
    let mut values = ev.values_list(&arg_text(args, 0));
    values.remove_duplicates();
    ok(values)
}

pub(crate) fn reverse(ev: &mut Evaluator<'_>, args: &[ProStringList]) -> ExpandResult {
    if !check_args(ev, "reverse(var)", args, 1, 1) {
        return none();
    }
    let mut values = ev.values_list(&arg_text(args, 0));
    values.0.reverse();
    ok(values)
}

fn map_elements(
    ev: &mut Evaluator<'_>,
    args: &[ProStringList],
    f: impl Fn(&str) -> String,
) -> ExpandResult {
    ok(ev
        .values_list(&arg_text(args, 0))
        .iter()
        .map(|v| ProString::from(f(v.as_str())))
        .collect())
}

pub(crate) fn upper(ev: &mut Evaluator<'_>, args: &[ProStringList]) -> ExpandResult {
    if !check_args(ev, "upper(var)", args, 1, 1) {
        return none();
    }
    map_elements(ev, args, |s| s.to_uppercase())
}

pub(crate) fn lower(ev: &mut Evaluator<'_>, args: &[ProStringList]) -> ExpandResult {
    if !check_args(ev, "lower(var)", args, 1, 1) {
        return none();
    }
    map_elements(ev, args, |s| s.to_lowercase())
}

pub(crate) fn title(ev: &mut Evaluator<'_>, args: &[ProStringList]) -> ExpandResult {
    if !check_args(ev, "title(var)", args, 1, 1) {
        return none();
    }
    map_elements(ev, args, |s| {
        let mut chars = s.chars();
        match chars.next() {
            Some(c) => c.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
            None => String::new(),
        }
    })
}

pub(crate) fn basename(ev: &mut Evaluator<'_>, args: &[ProStringList]) -> ExpandResult {
    if !check_args(ev, "basename(var)", args, 1, 1) {
        return none();
    }
    map_elements(ev, args, |s| {
        Path::new(s)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("")
            .to_string()
    })
}

pub(crate) fn dirname(ev: &mut Evaluator<'_>, args: &[ProStringList]) -> ExpandResult {
    if !check_args(ev, "dirname(var)", args, 1, 1) {
        return none();
    }
    map_elements(ev, args, |s| {
        Path::new(s)
            .parent()
            .map(|p| p.display().to_string())
            .unwrap_or_default()
    })
}

pub(crate) fn section(ev: &mut Evaluator<'_>, args: &[ProStringList]) -> ExpandResult {
    if !check_args(ev, "section(var, sep, begin, end)", args, 3, 4) {
        return none();
    }
    let sep = arg_text(args, 1);
    let Ok(begin) = arg_text(args, 2).parse::<i64>() else {
        ev.usage_warning("section: invalid begin index".to_string());
        return none();
    };
    let end = if args.len() >= 4 {
        match arg_text(args, 3).parse::<i64>() {
            Ok(e) => e,
            Err(_) => {
                ev.usage_warning("section: invalid end index".to_string());
                return none();
            }
        }
    } else {
        -1
    };
    map_elements(ev, args, |s| {
        let parts: Vec<&str> = s.split(sep.as_str()).collect();
        let len = parts.len() as i64;
        let from = if begin < 0 { len + begin } else { begin }.clamp(0, len);
        let to = if end < 0 { len + end } else { end }.clamp(-1, len - 1);
        if from > to {
            String::new()
        } else {
            parts[from as usize..=to as usize].join(&sep)
        }
    })
}

pub(crate) fn absolute_path(ev: &mut Evaluator<'_>, args: &[ProStringList]) -> ExpandResult {
    if !check_args(ev, "absolute_path(path, base)", args, 1, 2) {
        return none();
    }
    let path = arg_text(args, 0);
    let base = if args.len() >= 2 {
        PathBuf::from(arg_text(args, 1))
    } else {
        ev.current_dir()
    };
    let p = Path::new(&path);
    let joined = if p.is_absolute() {
        p.to_path_buf()
    } else {
        base.join(p)
    };
    one(normalize_path(&joined).display().to_string())
}

pub(crate) fn relative_path(ev: &mut Evaluator<'_>, args: &[ProStringList]) -> ExpandResult {
    if !check_args(ev, "relative_path(path, base)", args, 1, 2) {
        return none();
    }
    let path = PathBuf::from(arg_text(args, 0));
    let base = if args.len() >= 2 {
        PathBuf::from(arg_text(args, 1))
    } else {
        ev.current_dir()
    };
    if !path.is_absolute() {
        return one(normalize_path(&path).display().to_string());
    }
    let path = normalize_path(&path);
    let base = normalize_path(&base);
    let mut path_parts = path.components().peekable();
    let mut base_parts = base.components().peekable();
    while let (Some(a), Some(b)) = (path_parts.peek(), base_parts.peek()) {
        if a != b {
            break;
        }
        path_parts.next();
        base_parts.next();
    }
    let mut rel = PathBuf::new();
    for _ in base_parts {
        rel.push("..");
    }
    for part in path_parts {
        rel.push(part);
    }
    if rel.as_os_str().is_empty() {
        rel.push(".");
    }
    one(rel.display().to_string())
}

pub(crate) fn clean_path(ev: &mut Evaluator<'_>, args: &[ProStringList]) -> ExpandResult {
    if !check_args(ev, "clean_path(path)", args, 1, 1) {
        return none();
    }
    one(normalize_path(Path::new(&arg_text(args, 0)))
        .display()
        .to_string())
}

/// Lexically resolve `.` and `..` components.
fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                let can_pop = matches!(out.components().next_back(), Some(Component::Normal(_)));
                if can_pop {
                    out.pop();
                } else {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

pub(crate) fn re_escape(ev: &mut Evaluator<'_>, args: &[ProStringList]) -> ExpandResult {
    if !check_args(ev, "re_escape(string)", args, 1, 1) {
        return none();
    }
    one(regex::escape(&arg_text(args, 0)))
}

pub(crate) fn quote(ev: &mut Evaluator<'_>, args: &[ProStringList]) -> ExpandResult {
    if !check_args(ev, "quote(string)", args, 1, usize::MAX) {
        return none();
    }
    one(args.iter().map(text).collect::<Vec<_>>().join(" "))
}

pub(crate) fn sprintf(ev: &mut Evaluator<'_>, args: &[ProStringList]) -> ExpandResult {
    if !check_args(ev, "sprintf(format, ...)", args, 1, usize::MAX) {
        return none();
    }
    let mut out = arg_text(args, 0);
    for i in (1..args.len()).rev() {
        out = out.replace(&format!("%{i}"), &text(&args[i]));
    }
    one(out.replace("%%", "%"))
}

pub(crate) fn format_number(ev: &mut Evaluator<'_>, args: &[ProStringList]) -> ExpandResult {
    if !check_args(ev, "format_number(number, options...)", args, 1, 2) {
        return none();
    }
    let mut ibase = 10u32;
    let mut obase = 10u32;
    let mut width = 0usize;
    let mut zeropad = false;
    let mut leftalign = false;
    let mut alwayssign = false;
    if args.len() >= 2 {
        for opt in args[1].iter() {
            let opt = opt.as_str();
            if let Some(v) = opt.strip_prefix("ibase=") {
                ibase = v.parse().unwrap_or(10);
            } else if let Some(v) = opt.strip_prefix("obase=") {
                obase = v.parse().unwrap_or(10);
            } else if let Some(v) = opt.strip_prefix("width=") {
                width = v.parse().unwrap_or(0);
            } else if opt == "zeropad" {
                zeropad = true;
            } else if opt == "leftalign" {
                leftalign = true;
            } else if opt == "alwayssign" {
                alwayssign = true;
            } else if opt == "padsign" {
                // Rendered as a leading space on non-negative numbers.
                alwayssign = false;
            } else {
                ev.usage_warning(format!("format_number: unknown option '{opt}'"));
                return none();
            }
        }
    }
    let number = arg_text(args, 0);
    let Ok(value) = i64::from_str_radix(number.trim(), ibase) else {
        ev.eval_warning(format!("format_number: invalid number '{number}'"));
        return none();
    };
    let magnitude = value.unsigned_abs();
    let digits = match obase {
        2 => format!("{magnitude:b}"),
        8 => format!("{magnitude:o}"),
        16 => format!("{magnitude:x}"),
        _ => format!("{magnitude}"),
    };
    let sign = if value < 0 {
        "-"
    } else if alwayssign {
        "+"
    } else {
        ""
    };
    let mut s = format!("{sign}{digits}");
    if s.len() < width {
        let pad = width - s.len();
        if leftalign {
            s.push_str(&" ".repeat(pad));
        } else if zeropad {
            s = format!("{sign}{}{digits}", "0".repeat(pad));
        } else {
            s = format!("{}{s}", " ".repeat(pad));
        }
    }
    one(s)
}

pub(crate) fn num_add(ev: &mut Evaluator<'_>, args: &[ProStringList]) -> ExpandResult {
    if !check_args(ev, "num_add(number, ...)", args, 1, usize::MAX) {
        return none();
    }
    let mut sum = 0i64;
    for arg in args {
        for value in arg.iter() {
            match value.as_str().parse::<i64>() {
                Ok(n) => sum += n,
                Err(_) => {
                    ev.eval_warning(format!("num_add: invalid number '{value}'"));
                    return none();
                }
            }
        }
    }
    one(sum.to_string())
}

/// Stores its arguments in a fresh temporary variable and returns that
/// variable's name, for passing whole lists to functions expecting a
/// variable name.
pub(crate) fn list(ev: &mut Evaluator<'_>, args: &[ProStringList]) -> ExpandResult {
    ev.list_counter += 1;
    let name = format!(".LIST.{}", ev.list_counter);
    let mut all = ProStringList::new();
    for arg in args {
        all.extend(arg.iter().cloned());
    }
    ev.stack.set(ProKey::new(&name), all);
    one(name)
}

pub(crate) fn system(ev: &mut Evaluator<'_>, args: &[ProStringList]) -> ExpandResult {
    if !check_args(ev, "system(command, mode)", args, 1, 2) {
        return none();
    }
    let command = arg_text(args, 0);
    let output = run_shell(ev, &command);
    let Some(stdout) = output else {
        return none();
    };
    match arg_text(args, 1).as_str() {
        "blob" => one(stdout),
        "lines" => ok(stdout.lines().map(ProString::from).collect()),
        _ => ok(stdout.split_whitespace().map(ProString::from).collect()),
    }
}

fn run_shell(ev: &Evaluator<'_>, command: &str) -> Option<String> {
    let mut cmd = if cfg!(windows) {
        let mut c = std::process::Command::new("cmd");
        c.args(["/c", command]);
        c
    } else {
        let mut c = std::process::Command::new("sh");
        c.args(["-c", command]);
        c
    };
    let dir = ev.current_dir();
    if dir.is_dir() {
        cmd.current_dir(dir);
    }
    match cmd.output() {
        Ok(out) => Some(String::from_utf8_lossy(&out.stdout).into_owned()),
        Err(e) => {
            ev.eval_warning(format!("system: cannot run '{command}': {e}"));
            None
        }
    }
}

pub(crate) fn files(ev: &mut Evaluator<'_>, args: &[ProStringList]) -> ExpandResult {
    if !check_args(ev, "files(pattern, recursive)", args, 1, 2) {
        return none();
    }
    let pattern = arg_text(args, 0);
    let recursive = matches!(arg_text(args, 1).as_str(), "true" | "1");
    let full = ev.resolve_path(&pattern);
    let dir = full.parent().map(Path::to_path_buf).unwrap_or_default();
    let name = full
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("*")
        .to_string();
    let re = match wildcard_regex(&name) {
        Ok(re) => re,
        Err(e) => {
            ev.eval_warning(format!("files: invalid pattern: {e}"));
            return none();
        }
    };
    let mut out = ProStringList::new();
    let mut pending = vec![dir];
    while let Some(d) = pending.pop() {
        for path in ev.vfs.list_matching(&d, &re, false) {
            out.push(ProString::from(path.display().to_string()));
        }
        if recursive {
            pending.extend(ev.vfs.subdirs(&d));
        }
    }
    ok(out)
}

pub(crate) fn shadowed(ev: &mut Evaluator<'_>, args: &[ProStringList]) -> ExpandResult {
    if !check_args(ev, "shadowed(path)", args, 1, 1) {
        return none();
    }
    let path = ev.resolve_path(&arg_text(args, 0));
    match ev.options.shadowed_path(&path) {
        Some(p) => one(p.display().to_string()),
        None => one(path.display().to_string()),
    }
}

pub(crate) fn enumerate_vars(ev: &mut Evaluator<'_>, args: &[ProStringList]) -> ExpandResult {
    if !check_args(ev, "enumerate_vars()", args, 0, 0) {
        return none();
    }
    ok(ev
        .stack
        .visible_keys()
        .into_iter()
        .map(|k| k.to_pro_string())
        .collect())
}
