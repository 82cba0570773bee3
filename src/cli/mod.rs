//! # CLI Module
//!
//! Command-line interface for the `railyard` binary.
//!
//! ## Commands
//!
//! ### `check-config`
//!
//! Load an application config file, finalize the hardening toggles and print
//! the resulting settings. Exits non-zero when the configuration is unusable
//! (unreadable file, parse error, unknown hardening profile):
//!
//! ```bash
//! railyard check-config --config config/app.yaml
//! ```
//!
//! ### `failsafe`
//!
//! Print the failsafe response that would be produced for a status line and
//! request content type, without dispatching anything:
//!
//! ```bash
//! railyard failsafe --status "500 Internal Server Error" --error-dir public
//! railyard failsafe --status "400 Bad Request" --content-type application/json
//! ```
//!
//! ### `serve`
//!
//! Serve a public directory over HTTP through the dispatcher:
//!
//! ```bash
//! railyard serve --addr 127.0.0.1:8080 --config config/app.yaml --public public --workers 4
//! ```
//!
//! Logging is configured from the `logging` section of the config file, falling
//! back to the `RAILYARD_LOG_*` environment variables.

mod commands;


pub use commands::{run_cli, run_command, Cli, Commands};
