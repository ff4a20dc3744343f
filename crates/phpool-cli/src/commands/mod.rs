pub mod available;
pub mod completions;
pub mod configure;
pub mod create;
pub mod delete;
pub mod doctor;
pub mod install;
pub mod list;
pub mod man_pages;
pub mod providers;
pub mod show;
pub mod versions;

use indicatif::{ProgressBar, ProgressStyle};
use phpool_core::{Collaborators, CoreError, ErrorClass, ManagerConfig, PoolManager};
use phpool_schema::{ServiceConfig, Status};
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_VALIDATION_ERROR: u8 = 2;
pub const EXIT_STORE_ERROR: u8 = 3;
pub const EXIT_RELOAD_FAILED: u8 = 4;

const VALIDATION_PREFIX: &str = "invalid input: ";
const STORE_PREFIX: &str = "store error: ";
const RELOAD_PREFIX: &str = "reload failed: ";

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

/// Render a core error with a prefix that `exit_code_for` recognises.
pub fn core_err(e: &CoreError) -> String {
    match e.class() {
        ErrorClass::Validation => format!("{VALIDATION_PREFIX}{e}"),
        ErrorClass::Store => format!("{STORE_PREFIX}{e}"),
        ErrorClass::ReloadFailed => format!("{RELOAD_PREFIX}{e}"),
        ErrorClass::NotFound
        | ErrorClass::Conflict
        | ErrorClass::NotImplemented
        | ErrorClass::Internal => e.to_string(),
    }
}

pub fn exit_code_for(msg: &str) -> u8 {
    if msg.starts_with(VALIDATION_PREFIX) {
        EXIT_VALIDATION_ERROR
    } else if msg.starts_with(STORE_PREFIX) {
        EXIT_STORE_ERROR
    } else if msg.starts_with(RELOAD_PREFIX) {
        EXIT_RELOAD_FAILED
    } else {
        EXIT_FAILURE
    }
}

pub fn open_manager(config: &ServiceConfig) -> Result<PoolManager, String> {
    let resolved = ManagerConfig::from_service(config);
    tracing::debug!(
        "opening store at {} (os family {})",
        resolved.store_root.display(),
        resolved.os_family
    );
    PoolManager::new(
        resolved,
        Collaborators::system(Duration::from_secs(config.reload_timeout_secs)),
    )
    .map_err(|e| core_err(&e))
}

fn spinner_style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template).unwrap_or_else(|_| ProgressStyle::default_spinner())
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        spinner_style("{spinner:.cyan} {msg}")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(spinner_style("{msg}"));
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(spinner_style("{msg}"));
    pb.finish_with_message(format!("✗ {msg}"));
}

pub fn colorize_status(status: Status) -> String {
    use console::Style;
    let text = status.to_string();
    match status {
        Status::Active => Style::new().green().apply_to(text).to_string(),
        Status::Inactive => Style::new().dim().apply_to(text).to_string(),
    }
}

/// Print the warning for a mutation that was saved but not picked up by
/// PHP-FPM, and turn it into the reload exit status.
pub fn committed_but_not_reloaded(e: &CoreError, json: bool) -> Result<u8, String> {
    if json {
        let payload = serde_json::json!({
            "committed": true,
            "warning": e.to_string(),
        });
        println!("{}", json_pretty(&payload)?);
    }
    Err(core_err(e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use phpool_schema::{PhpVersion, ProviderKind};

    #[test]
    fn json_pretty_serializes_object() {
        let val = serde_json::json!({"key": "value"});
        let result = json_pretty(&val).unwrap();
        assert!(result.contains("\"key\""));
        assert!(result.contains("\"value\""));
    }

    #[test]
    fn exit_codes_are_distinct() {
        let codes = [
            EXIT_SUCCESS,
            EXIT_FAILURE,
            EXIT_VALIDATION_ERROR,
            EXIT_STORE_ERROR,
            EXIT_RELOAD_FAILED,
        ];
        for (i, a) in codes.iter().enumerate() {
            for b in &codes[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn error_classes_map_to_exit_codes() {
        let validation = CoreError::UnknownUser("ghost".to_owned());
        assert_eq!(exit_code_for(&core_err(&validation)), EXIT_VALIDATION_ERROR);

        let version = CoreError::InvalidVersion {
            version: "9.9".to_owned(),
            reason: "unsupported".to_owned(),
        };
        assert_eq!(exit_code_for(&core_err(&version)), EXIT_VALIDATION_ERROR);

        let store = CoreError::Registry(phpool_store::StoreError::LockFailed(
            "held elsewhere".to_owned(),
        ));
        assert_eq!(exit_code_for(&core_err(&store)), EXIT_STORE_ERROR);

        let missing = CoreError::PoolNotFound("bob".to_owned());
        assert_eq!(exit_code_for(&core_err(&missing)), EXIT_FAILURE);

        let unimplemented = CoreError::NotImplemented {
            provider: ProviderKind::Docker,
            operation: "install_runtime",
        };
        assert_eq!(exit_code_for(&core_err(&unimplemented)), EXIT_FAILURE);

        let install = CoreError::Install {
            provider: ProviderKind::Remi,
            version: PhpVersion::new(8, 2),
            step: "install packages".to_owned(),
            message: "exit status 1".to_owned(),
        };
        assert_eq!(exit_code_for(&core_err(&install)), EXIT_FAILURE);
    }

    #[test]
    fn colorize_keeps_status_text() {
        assert!(colorize_status(Status::Active).contains("active"));
        assert!(colorize_status(Status::Inactive).contains("inactive"));
    }

    #[test]
    fn spinner_finishes() {
        let pb = spinner("testing...");
        spin_ok(&pb, "done");
        assert!(pb.is_finished());
        let pb = spinner("testing...");
        spin_fail(&pb, "failed");
        assert!(pb.is_finished());
    }
}
