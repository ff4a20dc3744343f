use super::{colorize_status, core_err, json_pretty, open_manager, EXIT_SUCCESS};
use phpool_schema::ServiceConfig;

/// Without a provider the registry is listed; with one, the provider is asked
/// what is actually installed on the host.
pub fn run(config: &ServiceConfig, provider: Option<&str>, json: bool) -> Result<u8, String> {
    let manager = open_manager(config)?;
    if provider.is_some() {
        let (kind, versions) = manager
            .list_installed_runtimes(provider)
            .map_err(|e| core_err(&e))?;
        if json {
            let payload = serde_json::json!({ "provider": kind, "versions": versions });
            println!("{}", json_pretty(&payload)?);
        } else if versions.is_empty() {
            println!("no PHP versions installed via {kind}");
        } else {
            for v in &versions {
                println!("{v}");
            }
        }
        return Ok(EXIT_SUCCESS);
    }

    let rows = manager.list_runtime_versions().map_err(|e| core_err(&e))?;
    if json {
        println!("{}", json_pretty(&rows)?);
    } else if rows.is_empty() {
        println!("no PHP versions registered");
    } else {
        println!("{:<8} {:<8} {:<8} {:<10} INSTALLED_AT", "PHP", "PROVIDER", "OS", "STATUS");
        for row in &rows {
            println!(
                "{:<8} {:<8} {:<8} {:<10} {}",
                row.version.to_string(),
                row.provider.id(),
                row.os_family.to_string(),
                colorize_status(row.status),
                row.installed_at
            );
        }
    }
    Ok(EXIT_SUCCESS)
}
