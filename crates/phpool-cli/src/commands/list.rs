use super::{colorize_status, core_err, json_pretty, open_manager, EXIT_SUCCESS};
use phpool_schema::ServiceConfig;

pub fn run(config: &ServiceConfig, json: bool) -> Result<u8, String> {
    let manager = open_manager(config)?;
    let pools = manager.list_pools().map_err(|e| core_err(&e))?;
    if json {
        println!("{}", json_pretty(&pools)?);
    } else if pools.is_empty() {
        println!("no pools found");
    } else {
        println!(
            "{:<16} {:<8} {:<8} {:<10} SOCKET",
            "USER", "PHP", "PROVIDER", "STATUS"
        );
        for pool in &pools {
            println!(
                "{:<16} {:<8} {:<8} {:<10} {}",
                pool.username.as_str(),
                pool.php_version.to_string(),
                pool.provider.id(),
                colorize_status(pool.status),
                pool.socket_path.display()
            );
        }
    }
    Ok(EXIT_SUCCESS)
}
