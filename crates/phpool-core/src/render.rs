//! PHP-FPM pool configuration rendering.
//!
//! The template uses `{{field}}` placeholders. A line whose placeholder has no
//! value (an unset optional setting) is dropped so PHP's built-in default
//! applies; a placeholder the renderer does not know is an error. Rendering is
//! a pure function of the pool identity and its settings.

use crate::CoreError;
use phpool_schema::{GroupName, PoolSettings, Username};
use std::path::Path;

pub const POOL_TEMPLATE: &str = include_str!("../templates/pool.conf.tmpl");

/// The identity part of a pool that ends up in its configuration.
#[derive(Debug, Clone, Copy)]
pub struct PoolIdentity<'a> {
    pub username: &'a Username,
    pub group: &'a GroupName,
    pub socket_path: &'a Path,
}

fn value(
    key: &str,
    identity: &PoolIdentity<'_>,
    settings: &PoolSettings,
) -> Result<Option<String>, CoreError> {
    let v = match key {
        "pool_name" | "user" => Some(identity.username.to_string()),
        "group" => Some(identity.group.to_string()),
        "socket_path" => Some(identity.socket_path.display().to_string()),
        "listen_mode" => Some(settings.listen_mode.clone()),
        "process_manager" => Some(settings.process_manager.to_string()),
        "max_children" => Some(settings.max_children.to_string()),
        "start_servers" => Some(settings.start_servers.to_string()),
        "min_spare_servers" => Some(settings.min_spare_servers.to_string()),
        "max_spare_servers" => Some(settings.max_spare_servers.to_string()),
        "max_requests" => Some(settings.max_requests.to_string()),
        "process_idle_timeout" => settings.process_idle_timeout.clone(),
        "sendmail_path" => Some(settings.sendmail_path.clone()),
        "display_errors" => Some(settings.display_errors.to_string()),
        "log_errors" => Some(settings.log_errors.to_string()),
        "error_log" => Some(
            settings
                .error_log
                .clone()
                .unwrap_or_else(|| format!("/var/log/fpm-php.{}.log", identity.username)),
        ),
        "memory_limit" => Some(settings.memory_limit.clone()),
        "max_execution_time" => settings.max_execution_time.map(|t| t.to_string()),
        "upload_max_filesize" => settings.upload_max_filesize.clone(),
        "post_max_size" => settings.post_max_size.clone(),
        "date_timezone" => settings.date_timezone.clone(),
        other => {
            return Err(CoreError::Render(format!(
                "unknown placeholder '{{{{{other}}}}}'"
            )))
        }
    };
    Ok(v)
}

/// Substitute one line. `Ok(None)` drops the line.
fn render_line(
    line: &str,
    identity: &PoolIdentity<'_>,
    settings: &PoolSettings,
) -> Result<Option<String>, CoreError> {
    let mut out = String::with_capacity(line.len());
    let mut rest = line;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            return Err(CoreError::Render(format!("unterminated placeholder in '{line}'")));
        };
        let key = after[..end].trim();
        match value(key, identity, settings)? {
            Some(v) => out.push_str(&v),
            None => return Ok(None),
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(Some(out))
}

/// Render `template` for one pool.
pub fn render_template(
    template: &str,
    identity: &PoolIdentity<'_>,
    settings: &PoolSettings,
) -> Result<String, CoreError> {
    let mut out = String::with_capacity(template.len() + 256);
    for line in template.lines() {
        if let Some(rendered) = render_line(line, identity, settings)? {
            out.push_str(&rendered);
            out.push('\n');
        }
    }
    Ok(out)
}

/// Render the built-in pool template.
pub fn render_pool_config(
    identity: &PoolIdentity<'_>,
    settings: &PoolSettings,
) -> Result<String, CoreError> {
    render_template(POOL_TEMPLATE, identity, settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use phpool_schema::SettingsOverrides;
    use std::path::PathBuf;

    fn alice() -> (Username, GroupName, PathBuf) {
        (
            Username::parse("alice").unwrap(),
            GroupName::parse("alice").unwrap(),
            PathBuf::from("/var/opt/remi/php82/run/php-fpm/alice.sock"),
        )
    }

    fn render(settings: &PoolSettings) -> String {
        let (u, g, s) = alice();
        let id = PoolIdentity {
            username: &u,
            group: &g,
            socket_path: &s,
        };
        render_pool_config(&id, settings).unwrap()
    }

    #[test]
    fn defaults() {
        let out = render(&PoolSettings::default());
        assert!(out.starts_with("[alice]\nuser = alice\ngroup = alice\n"));
        assert!(out.contains("listen = /var/opt/remi/php82/run/php-fpm/alice.sock\n"));
        assert!(out.contains("listen.mode = 0660\n"));
        assert!(out.contains("pm = dynamic\n"));
        assert!(out.contains("pm.max_children = 50\n"));
        assert!(out.contains("pm.start_servers = 5\n"));
        assert!(out.contains("pm.max_spare_servers = 35\n"));
        assert!(out.contains("pm.max_requests = 500\n"));
        assert!(out.contains(
            "php_admin_value[sendmail_path] = /usr/sbin/sendmail -t -i -f www@my.domain.com\n"
        ));
        assert!(out.contains("php_flag[display_errors] = off\n"));
        assert!(out.contains("php_admin_flag[log_errors] = on\n"));
        assert!(out.contains("php_admin_value[error_log] = /var/log/fpm-php.alice.log\n"));
        assert!(out.contains("php_admin_value[memory_limit] = 128M\n"));
    }

    #[test]
    fn unset_optionals_are_omitted() {
        let out = render(&PoolSettings::default());
        assert!(!out.contains("process_idle_timeout"));
        assert!(!out.contains("max_execution_time"));
        assert!(!out.contains("upload_max_filesize"));
        assert!(!out.contains("post_max_size"));
        assert!(!out.contains("date.timezone"));
        assert!(!out.contains("{{"));
    }

    #[test]
    fn set_optionals_are_rendered() {
        let mut o = SettingsOverrides::default();
        o.set("max_execution_time", "60").unwrap();
        o.set("date_timezone", "Europe/Rome").unwrap();
        o.set("process_manager", "ondemand").unwrap();
        o.set("process_idle_timeout", "10s").unwrap();
        let out = render(&PoolSettings::default().merged(&o));
        assert!(out.contains("php_admin_value[max_execution_time] = 60\n"));
        assert!(out.contains("php_admin_value[date.timezone] = Europe/Rome\n"));
        assert!(out.contains("pm = ondemand\n"));
        assert!(out.contains("pm.process_idle_timeout = 10s\n"));
    }

    #[test]
    fn rendering_is_deterministic() {
        let s = PoolSettings::default();
        assert_eq!(render(&s), render(&s));
    }

    #[test]
    fn unknown_placeholder_is_an_error() {
        let (u, g, s) = alice();
        let id = PoolIdentity {
            username: &u,
            group: &g,
            socket_path: &s,
        };
        let err = render_template("x = {{nope}}\n", &id, &PoolSettings::default()).unwrap_err();
        assert!(matches!(err, CoreError::Render(ref m) if m.contains("{{nope}}")));
        assert!(render_template("x = {{user\n", &id, &PoolSettings::default()).is_err());
    }

    #[test]
    fn literal_lines_pass_through() {
        let (u, g, s) = alice();
        let id = PoolIdentity {
            username: &u,
            group: &g,
            socket_path: &s,
        };
        let out = render_template("; managed by phpool\n\n[{{user}}]\n", &id, &PoolSettings::default())
            .unwrap();
        assert_eq!(out, "; managed by phpool\n\n[alice]\n");
    }
}
