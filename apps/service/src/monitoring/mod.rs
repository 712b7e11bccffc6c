/// Monitoring engine module - handles execution of availability checks
///
/// This module is responsible for:
/// - Probing sites over HTTP/HTTPS and matching their content pattern
/// - Running one periodic schedule per site
/// - Validating registration payloads
pub mod checker;
pub mod scheduler;
pub mod types;
pub mod validation;

#[cfg(test)]
pub(crate) mod testing;

pub use checker::{Checker, HttpChecker, ProbeFailure};
pub use scheduler::{Monitor, MonitorError, MonitorState};
pub use types::{CheckResult, FETCH_FAILED, Pattern};
pub use validation::{RegisterSite, Validate, ValidationError};
