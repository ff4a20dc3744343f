use super::{json_pretty, open_manager, EXIT_SUCCESS};
use phpool_schema::ServiceConfig;

pub fn run(config: &ServiceConfig, json: bool) -> Result<u8, String> {
    let manager = open_manager(config)?;
    let providers = manager.providers();
    if json {
        println!("{}", json_pretty(&providers)?);
        return Ok(EXIT_SUCCESS);
    }
    println!("{:<10} {:<20} {:<12} DESCRIPTION", "ID", "NAME", "STATUS");
    for p in &providers {
        let status = if p.implemented { "ready" } else { "planned" };
        let marker = if p.default { "*" } else { " " };
        println!(
            "{:<10} {:<20} {:<12} {}",
            format!("{}{marker}", p.id),
            p.name,
            status,
            p.description
        );
    }
    Ok(EXIT_SUCCESS)
}
