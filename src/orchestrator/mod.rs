//! Application-level orchestration utilities.
//!
//! This module owns session lifecycle control (start/exit/restart) and post-session
//! processing such as completion recording, streak refresh, auto-save and history
//! reload. UI/CLI layers call into this module to keep responsibilities separated.

mod controller;
mod post_process;

pub(crate) use controller::{run_controller, UiCommand};
pub(crate) use post_process::{finalize_session, process_session_completion};
