//! The sandbox: where validated step programs actually run.
//!
//! A step gets exactly three root bindings - `ctx` (read-only corpus view),
//! `tool` (bounded request queue), and `state` (a JSON object passed by
//! value) - plus a fixed builtin allowlist. Nothing reachable from any of
//! them touches the filesystem, network, environment, clock, or an RNG.
//! Every byte `ctx` reveals is recorded in the step's span log before the
//! program sees it; everything else the step produces (stdout, stderr, tool
//! requests, the outgoing state) is capped and captured.
//!
//! Entry point: [`run_step`]. It is a pure function of its inputs given a
//! fixed corpus: same program, same state, same descriptor - byte-identical
//! [`StepResult`].

mod builtins;
mod capture;
#[cfg(test)]
mod tests;
mod control;
mod ctx;
mod executor;
mod interp;
mod toolapi;
mod value;

pub use control::{RuntimeExc, Unwind};
pub use ctx::{ContextView, DocView, LineIter};
pub use executor::{merge_tool_results, run_step};
pub use toolapi::ToolApi;
pub use value::{DictMap, Func, SetVal, Value};
