use super::{core_err, json_pretty, open_manager, EXIT_SUCCESS};
use phpool_provider::CatalogSource;
use phpool_schema::ServiceConfig;

pub fn run(config: &ServiceConfig, provider: Option<&str>, json: bool) -> Result<u8, String> {
    let manager = open_manager(config)?;
    let (kind, catalog) = manager
        .list_available_runtimes(provider)
        .map_err(|e| core_err(&e))?;
    if json {
        let payload = serde_json::json!({
            "provider": kind,
            "source": catalog.source,
            "versions": catalog.versions,
        });
        println!("{}", json_pretty(&payload)?);
        return Ok(EXIT_SUCCESS);
    }
    for v in &catalog.versions {
        println!("{v}");
    }
    if catalog.source == CatalogSource::Fallback {
        eprintln!("note: {kind} repositories could not be queried; showing the built-in list");
    }
    Ok(EXIT_SUCCESS)
}
