#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::uninlined_format_args
)]

pub mod config;
pub mod dispatch;
pub mod error;
pub mod gateway;
pub mod recipient;
pub mod session;
pub mod transport;

pub use config::Config;
pub use error::GatewayError;
