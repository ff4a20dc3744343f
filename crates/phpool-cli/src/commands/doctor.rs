use super::{open_manager, EXIT_FAILURE, EXIT_SUCCESS};
use phpool_core::ManagerConfig;
use phpool_schema::{ServiceConfig, DEFAULT_CONFIG_PATH};
use phpool_store::{LockMode, StoreLayout, StoreLock, WriteAheadLog};
use std::path::Path;

pub fn run(
    config: &ServiceConfig,
    config_path: Option<&Path>,
    json_output: bool,
) -> Result<u8, String> {
    let mut checks: Vec<Check> = Vec::new();
    let mut all_pass = true;

    check_config(config, config_path, &mut checks);

    let layout = StoreLayout::new(&config.store_root);
    if layout.store_dir().exists() {
        checks.push(Check::pass("store_exists", "Store directory exists"));
        check_store(&layout, &mut checks, &mut all_pass);
        check_pools(config, &mut checks, &mut all_pass);
    } else {
        checks.push(Check::info(
            "store_exists",
            "Store not initialized (will be created on first pool operation)",
        ));
    }

    print_results(&checks, all_pass, json_output)
}

fn check_config(config: &ServiceConfig, path: Option<&Path>, checks: &mut Vec<Check>) {
    let source = match path {
        Some(p) => p.display().to_string(),
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => DEFAULT_CONFIG_PATH.to_owned(),
        None => "built-in defaults".to_owned(),
    };
    checks.push(Check::pass(
        "config",
        &format!("Configuration loaded from {source}"),
    ));
    let resolved = ManagerConfig::from_service(config);
    checks.push(Check::info(
        "os_family",
        &format!(
            "OS family: {} (configured: {})",
            resolved.os_family, config.os_family
        ),
    ));
    checks.push(Check::info(
        "default_provider",
        &format!("Default provider: {}", config.default_provider),
    ));
}

fn check_store(layout: &StoreLayout, checks: &mut Vec<Check>, all_pass: &mut bool) {
    match layout.verify_version() {
        Ok(()) => checks.push(Check::pass("store_version", "Store format version valid")),
        Err(e) => {
            *all_pass = false;
            checks.push(Check::fail(
                "store_version",
                &format!("Store version check failed: {e}"),
            ));
        }
    }

    let wal = WriteAheadLog::new(layout);
    match wal.list_incomplete() {
        Ok(entries) if entries.is_empty() => {
            checks.push(Check::pass(
                "wal_clean",
                "Journal is clean (no interrupted operations)",
            ));
        }
        Ok(entries) => {
            let users: Vec<&str> = entries.iter().map(|e| e.username.as_str()).collect();
            checks.push(Check::warn(
                "wal_clean",
                &format!(
                    "Journal has {} interrupted operations for {} (rolled back on next start)",
                    entries.len(),
                    users.join(", ")
                ),
            ));
        }
        Err(e) => checks.push(Check::warn("wal_clean", &format!("Cannot read journal: {e}"))),
    }

    match StoreLock::try_acquire(&layout.lock_file(), LockMode::Exclusive) {
        Ok(Some(_)) => checks.push(Check::pass("store_lock", "Store lock is free")),
        Ok(None) => checks.push(Check::warn(
            "store_lock",
            "Store lock is held by another process",
        )),
        Err(e) => {
            *all_pass = false;
            checks.push(Check::fail(
                "store_lock",
                &format!("Cannot check store lock: {e}"),
            ));
        }
    }
}

fn check_pools(config: &ServiceConfig, checks: &mut Vec<Check>, all_pass: &mut bool) {
    let report = open_manager(config).and_then(|m| m.check_pools().map_err(|e| e.to_string()));
    let report = match report {
        Ok(r) => r,
        Err(e) => {
            *all_pass = false;
            checks.push(Check::fail("pools", &format!("Cannot check pools: {e}")));
            return;
        }
    };
    if report.is_clean() {
        checks.push(Check::pass(
            "pools",
            &format!(
                "All {} pool configuration files present",
                report.pools_checked
            ),
        ));
        return;
    }
    *all_pass = false;
    for d in &report.drift {
        checks.push(Check::fail(
            "pools",
            &format!(
                "Pool {}: {} ({})",
                d.username,
                d.issue,
                d.config_path.display()
            ),
        ));
    }
}

fn print_results(checks: &[Check], all_pass: bool, json_output: bool) -> Result<u8, String> {
    if json_output {
        let json = serde_json::json!({
            "healthy": all_pass,
            "checks": checks.iter().map(|c| serde_json::json!({
                "name": c.name,
                "status": c.status,
                "message": c.message,
            })).collect::<Vec<_>>(),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&json).map_err(|e| e.to_string())?
        );
    } else {
        println!("phpool doctor\n");
        for check in checks {
            let icon = match check.status {
                "pass" => "✓",
                "fail" => "✗",
                "warn" => "⚠",
                _ => "ℹ",
            };
            println!("  {icon} {}", check.message);
        }
        println!();
        if all_pass {
            println!("All checks passed.");
        } else {
            println!("Some checks failed. See above for details.");
        }
    }
    Ok(if all_pass { EXIT_SUCCESS } else { EXIT_FAILURE })
}

struct Check {
    name: &'static str,
    status: &'static str,
    message: String,
}

impl Check {
    fn new(name: &'static str, status: &'static str, message: &str) -> Self {
        Self {
            name,
            status,
            message: message.to_owned(),
        }
    }

    fn pass(name: &'static str, message: &str) -> Self {
        Self::new(name, "pass", message)
    }

    fn fail(name: &'static str, message: &str) -> Self {
        Self::new(name, "fail", message)
    }

    fn warn(name: &'static str, message: &str) -> Self {
        Self::new(name, "warn", message)
    }

    fn info(name: &'static str, message: &str) -> Self {
        Self::new(name, "info", message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phpool_store::{RollbackStep, WalOpKind};

    #[test]
    fn store_checks_on_a_fresh_store() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path());
        layout.initialize().unwrap();
        let mut checks = Vec::new();
        let mut all_pass = true;
        check_store(&layout, &mut checks, &mut all_pass);
        assert!(all_pass);
        assert!(checks.iter().all(|c| c.status == "pass"));
    }

    #[test]
    fn interrupted_operations_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path());
        layout.initialize().unwrap();
        let wal = WriteAheadLog::new(&layout);
        wal.initialize().unwrap();
        let op = wal.begin(WalOpKind::CreatePool, "alice").unwrap();
        wal.add_rollback_step(
            &op,
            RollbackStep::RemovePool {
                username: "alice".to_owned(),
                created_at: "2026-01-01T00:00:00+00:00".to_owned(),
            },
        )
        .unwrap();

        let mut checks = Vec::new();
        let mut all_pass = true;
        check_store(&layout, &mut checks, &mut all_pass);
        let wal_check = checks.iter().find(|c| c.name == "wal_clean").unwrap();
        assert_eq!(wal_check.status, "warn");
        assert!(wal_check.message.contains("alice"));
        assert!(all_pass);
    }

    #[test]
    fn held_lock_is_a_warning() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path());
        layout.initialize().unwrap();
        let _held = StoreLock::acquire(&layout.lock_file(), LockMode::Shared).unwrap();
        let mut checks = Vec::new();
        let mut all_pass = true;
        check_store(&layout, &mut checks, &mut all_pass);
        let lock = checks.iter().find(|c| c.name == "store_lock").unwrap();
        assert_eq!(lock.status, "warn");
    }

    #[test]
    fn mismatched_version_fails() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path());
        layout.initialize().unwrap();
        std::fs::write(
            layout.store_dir().join("version"),
            r#"{"format_version": 99}"#,
        )
        .unwrap();
        let mut checks = Vec::new();
        let mut all_pass = true;
        check_store(&layout, &mut checks, &mut all_pass);
        assert!(!all_pass);
    }

    #[test]
    fn pinned_os_family_is_reported() {
        let config = ServiceConfig::parse_str("os_family = \"debian\"").unwrap();
        let mut checks = Vec::new();
        check_config(&config, None, &mut checks);
        let os = checks.iter().find(|c| c.name == "os_family").unwrap();
        assert!(os.message.contains("debian"));
    }
}
