use super::{core_err, json_pretty, open_manager, spin_fail, spin_ok, spinner, EXIT_SUCCESS};
use phpool_schema::ServiceConfig;

pub fn run(
    config: &ServiceConfig,
    version: &str,
    provider: Option<&str>,
    json: bool,
) -> Result<u8, String> {
    let manager = open_manager(config)?;
    let pb = if json {
        None
    } else {
        Some(spinner(&format!("installing PHP {version}...")))
    };
    let row = match manager.install_runtime(provider, version) {
        Ok(row) => {
            if let Some(ref pb) = pb {
                spin_ok(pb, &format!("PHP {} installed via {}", row.version, row.provider));
            }
            row
        }
        Err(e) => {
            if let Some(ref pb) = pb {
                spin_fail(pb, "install failed");
            }
            return Err(core_err(&e));
        }
    };
    if json {
        println!("{}", json_pretty(&row)?);
    }
    Ok(EXIT_SUCCESS)
}
