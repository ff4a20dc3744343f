use super::{
    committed_but_not_reloaded, core_err, json_pretty, open_manager, spin_fail, spin_ok, spinner,
    EXIT_SUCCESS,
};
use phpool_core::CoreError;
use phpool_schema::{ServiceConfig, SettingsOverrides};

/// Parse repeated `key=value` arguments into overrides.
pub fn parse_assignments(assignments: &[String]) -> Result<SettingsOverrides, String> {
    let mut overrides = SettingsOverrides::default();
    for a in assignments {
        overrides
            .set_assignment(a)
            .map_err(|e| core_err(&CoreError::Schema(e)))?;
    }
    Ok(overrides)
}

pub fn run(
    config: &ServiceConfig,
    username: &str,
    php_version: &str,
    provider: Option<&str>,
    settings: &[String],
    json: bool,
) -> Result<u8, String> {
    let overrides = parse_assignments(settings)?;
    let manager = open_manager(config)?;

    let pb = if json {
        None
    } else {
        Some(spinner(&format!("creating pool for {username}...")))
    };
    let record = match manager.create_pool_with(username, php_version, provider, &overrides) {
        Ok(r) => {
            if let Some(ref pb) = pb {
                spin_ok(pb, &format!("pool for {username} created"));
            }
            r
        }
        Err(e) => {
            if let Some(ref pb) = pb {
                spin_fail(pb, "create failed");
            }
            if e.is_committed() {
                return committed_but_not_reloaded(&e, json);
            }
            return Err(core_err(&e));
        }
    };

    if json {
        println!("{}", json_pretty(&record)?);
    } else {
        println!("provider:    {}", record.provider);
        println!("php_version: {}", record.php_version);
        println!("config:      {}", record.config_path.display());
        println!("socket:      {}", record.socket_path.display());
    }
    Ok(EXIT_SUCCESS)
}
