#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss,
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::needless_pass_by_value,
    clippy::needless_raw_string_hashes,
    clippy::redundant_closure_for_method_calls,
    clippy::return_self_not_must_use,
    clippy::similar_names,
    clippy::single_match_else,
    clippy::struct_excessive_bools,
    clippy::struct_field_names,
    clippy::too_many_lines,
    clippy::uninlined_format_args,
    clippy::unnecessary_wraps
)]

//! Pluggable session-state engine.
//!
//! A [`Manager`] resolves or mints an opaque session id for each request,
//! hands out a [`SessionStore`] for it from the configured backend, and
//! periodically sweeps expired records. Backends implement
//! [`SessionProvider`] and are looked up by name in a
//! [`ProviderRegistry`](providers::ProviderRegistry).

pub mod config;
pub mod providers;
pub mod session;

pub use config::Config;
pub use providers::{register_provider, GcPolicy, SessionProvider, SessionStore};
pub use session::{
    Manager, ManagerConfig, RequestContext, Result, SessionError, SessionKey, SessionValue,
    Transport,
};
