//! Interpreter for the promake project language.
//!
//! Executes the instruction streams compiled by `promake-parser`: variable
//! scopes, guards and control flow, the built-in function set, feature and
//! platform-spec resolution, and the [`Project`] facade that ties the
//! pipeline together.

mod builtins;
mod builtins_expand;
mod builtins_test;
pub mod dump;
mod error;
mod evaluator;
mod expand;
mod features;
mod options;
mod project;
mod state;
mod vfs;

pub use error::{EvalError, Visit, VisitResult};
pub use evaluator::{Evaluator, LoadFlags};
pub use options::GlobalOptions;
pub use project::{BaseContextCache, Project, TemplateType};
pub use vfs::{wildcard_regex, Vfs, WriteFlags};
