use super::create::parse_assignments;
use super::{committed_but_not_reloaded, core_err, json_pretty, open_manager, EXIT_SUCCESS};
use phpool_schema::ServiceConfig;

pub fn run(
    config: &ServiceConfig,
    username: &str,
    settings: &[String],
    json: bool,
) -> Result<u8, String> {
    let overrides = parse_assignments(settings)?;
    let manager = open_manager(config)?;
    let record = match manager.reconfigure_pool(username, &overrides) {
        Ok(r) => r,
        Err(e) if e.is_committed() => return committed_but_not_reloaded(&e, json),
        Err(e) => return Err(core_err(&e)),
    };
    if json {
        println!("{}", json_pretty(&record)?);
    } else {
        println!(
            "reconfigured pool for {} ({})",
            record.username,
            record.config_path.display()
        );
    }
    Ok(EXIT_SUCCESS)
}
