//! Name-hash dispatch for the built-in function library.

use crate::builtins_expand as exp;
use crate::builtins_test as tst;
use crate::error::{EvalError, VisitResult};
use crate::evaluator::Evaluator;
use promake_types::ProStringList;
use std::collections::HashMap;
use std::sync::OnceLock;

pub(crate) type ExpandBuiltin =
    fn(&mut Evaluator<'_>, &[ProStringList]) -> Result<ProStringList, EvalError>;
pub(crate) type TestBuiltin = fn(&mut Evaluator<'_>, &[ProStringList]) -> VisitResult;

pub(crate) fn expand_builtin(name: &str) -> Option<ExpandBuiltin> {
    static TABLE: OnceLock<HashMap<&'static str, ExpandBuiltin>> = OnceLock::new();
    TABLE
        .get_or_init(|| {
            HashMap::from([
                ("join", exp::join as ExpandBuiltin),
                ("split", exp::split),
                ("member", exp::member),
                ("first", exp::first),
                ("last", exp::last),
                ("size", exp::size),
                ("cat", exp::cat),
                ("fromfile", exp::fromfile),
                ("find", exp::find),
                ("replace", exp::replace),
                ("sorted", exp::sorted),
                ("unique", exp::unique),
                ("reverse", exp::reverse),
                ("upper", exp::upper),
                ("lower", exp::lower),
                ("title", exp::title),
                ("basename", exp::basename),
                ("dirname", exp::dirname),
                ("section", exp::section),
                ("absolute_path", exp::absolute_path),
                ("relative_path", exp::relative_path),
                ("clean_path", exp::clean_path),
                ("re_escape", exp::re_escape),
                ("quote", exp::quote),
                ("sprintf", exp::sprintf),
                ("format_number", exp::format_number),
                ("num_add", exp::num_add),
                ("list", exp::list),
                ("system", exp::system),
                ("files", exp::files),
                ("shadowed", exp::shadowed),
                ("enumerate_vars", exp::enumerate_vars),
            ])
        })
        .get(name)
        .copied()
}

pub(crate) fn test_builtin(name: &str) -> Option<TestBuiltin> {
    static TABLE: OnceLock<HashMap<&'static str, TestBuiltin>> = OnceLock::new();
    TABLE
        .get_or_init(|| {
            HashMap::from([
                ("CONFIG", tst::config as TestBuiltin),
                ("contains", tst::contains),
                ("count", tst::count),
                ("equals", tst::equals),
                ("isEqual", tst::equals),
                ("greaterThan", tst::greater_than),
                ("lessThan", tst::less_than),
                ("exists", tst::exists),
                ("include", tst::include),
                ("load", tst::load),
                ("infile", tst::infile),
                ("isEmpty", tst::is_empty),
                ("defined", tst::defined),
                ("export", tst::export),
                ("clear", tst::clear),
                ("unset", tst::unset),
                ("eval", tst::eval),
                ("if", tst::if_),
                ("requires", tst::requires),
                ("mkpath", tst::mkpath),
                ("write_file", tst::write_file),
                ("touch", tst::touch),
                ("cache", tst::cache),
                ("debug", tst::debug),
                ("log", tst::log),
                ("message", tst::message),
                ("warning", tst::warning),
                ("error", tst::error),
                ("system", tst::system),
            ])
        })
        .get(name)
        .copied()
}

/// One argument rendered as a single string (elements joined by spaces).
pub(crate) fn text(arg: &ProStringList) -> String {
    arg.join(" ")
}

pub(crate) fn arg_text(args: &[ProStringList], i: usize) -> String {
    args.get(i).map(text).unwrap_or_default()
}

/// Validate an argument count, reporting a usage warning on violation.
/// The caller returns its neutral value when this yields false.
pub(crate) fn check_args(
    ev: &Evaluator<'_>,
    usage: &str,
    args: &[ProStringList],
    min: usize,
    max: usize,
) -> bool {
    if args.len() >= min && args.len() <= max {
        return true;
    }
    let expected = if min == max {
        format!("exactly {min}")
    } else if max == usize::MAX {
        format!("at least {min}")
    } else {
        format!("{min} to {max}")
    };
    ev.usage_warning(format!("{usage} requires {expected} argument(s)"));
    false
}
