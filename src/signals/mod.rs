//! External signals and replay scripts.
//!
//! Signals are the events collaborators outside the pipeline report:
//!
//! - `auth_check_complete` - the initial auth check finished
//! - `unauthorized` - a request was rejected with 401
//! - `loading_error` - something failed in a user-visible way
//!
//! Scripts wrap signals together with direct engine calls and waits, so a
//! whole loading session can be replayed from a file.

mod parser;
mod types;

pub use parser::{load_script, parse_duration, parse_script};
pub use types::{DurationSpec, Script, ScriptStep, Signal};
