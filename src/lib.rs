#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::new_without_default,
    clippy::return_self_not_must_use
)]

pub mod budget;
pub mod config;
pub mod connector;
pub mod error;
pub mod parse;
pub mod plan;
pub mod present;
pub mod sanity;
pub mod session;
pub mod specialist;
mod textscan;
pub mod tools;

pub use config::Config;
pub use error::{Result, TillerError};
pub use session::{Session, SessionReply};
