use super::{committed_but_not_reloaded, core_err, json_pretty, open_manager, EXIT_SUCCESS};
use phpool_schema::ServiceConfig;

pub fn run(config: &ServiceConfig, username: &str, json: bool) -> Result<u8, String> {
    let manager = open_manager(config)?;
    let record = match manager.delete_pool(username) {
        Ok(r) => r,
        Err(e) if e.is_committed() => return committed_but_not_reloaded(&e, json),
        Err(e) => return Err(core_err(&e)),
    };
    if json {
        let payload = serde_json::json!({
            "deleted": record.username,
            "config_path": record.config_path,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!(
            "deleted pool for {} ({})",
            record.username,
            record.config_path.display()
        );
    }
    Ok(EXIT_SUCCESS)
}
