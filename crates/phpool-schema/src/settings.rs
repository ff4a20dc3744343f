//! Per-pool PHP-FPM settings and partial updates to them.
//!
//! `PoolSettings` is the full record persisted in the registry. Callers change
//! it through `SettingsOverrides`, which carries only the fields they named, so
//! a reconfigure never resets untouched values to their defaults.

use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_SENDMAIL_PATH: &str = "/usr/sbin/sendmail -t -i -f www@my.domain.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessManager {
    Static,
    #[default]
    Dynamic,
    Ondemand,
}

impl fmt::Display for ProcessManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessManager::Static => write!(f, "static"),
            ProcessManager::Dynamic => write!(f, "dynamic"),
            ProcessManager::Ondemand => write!(f, "ondemand"),
        }
    }
}

impl FromStr for ProcessManager {
    type Err = SchemaError;
    fn from_str(s: &str) -> Result<Self, SchemaError> {
        match s {
            "static" => Ok(ProcessManager::Static),
            "dynamic" => Ok(ProcessManager::Dynamic),
            "ondemand" => Ok(ProcessManager::Ondemand),
            other => Err(SchemaError::InvalidSetting {
                field: "process_manager".to_owned(),
                reason: format!("'{other}' is not one of static, dynamic, ondemand"),
            }),
        }
    }
}

/// A php.ini boolean flag, rendered as `on`/`off`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Toggle {
    On,
    Off,
}

impl Toggle {
    fn parse(field: &str, s: &str) -> Result<Self, SchemaError> {
        match s.to_ascii_lowercase().as_str() {
            "on" | "true" | "yes" | "1" => Ok(Toggle::On),
            "off" | "false" | "no" | "0" => Ok(Toggle::Off),
            _ => Err(SchemaError::InvalidSetting {
                field: field.to_owned(),
                reason: format!("'{s}' is not on/off"),
            }),
        }
    }
}

impl From<bool> for Toggle {
    fn from(b: bool) -> Self {
        if b {
            Toggle::On
        } else {
            Toggle::Off
        }
    }
}

impl fmt::Display for Toggle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Toggle::On => write!(f, "on"),
            Toggle::Off => write!(f, "off"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PoolSettings {
    pub listen_mode: String,
    pub process_manager: ProcessManager,
    pub max_children: u32,
    pub start_servers: u32,
    pub min_spare_servers: u32,
    pub max_spare_servers: u32,
    pub max_requests: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_idle_timeout: Option<String>,
    pub sendmail_path: String,
    pub display_errors: Toggle,
    pub log_errors: Toggle,
    /// `None` renders as `/var/log/fpm-php.<user>.log`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_log: Option<String>,
    pub memory_limit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_execution_time: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_max_filesize: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_max_size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_timezone: Option<String>,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            listen_mode: "0660".to_owned(),
            process_manager: ProcessManager::Dynamic,
            max_children: 50,
            start_servers: 5,
            min_spare_servers: 5,
            max_spare_servers: 35,
            max_requests: 500,
            process_idle_timeout: None,
            sendmail_path: DEFAULT_SENDMAIL_PATH.to_owned(),
            display_errors: Toggle::Off,
            log_errors: Toggle::On,
            error_log: None,
            memory_limit: "128M".to_owned(),
            max_execution_time: None,
            upload_max_filesize: None,
            post_max_size: None,
            date_timezone: None,
        }
    }
}

impl PoolSettings {
    /// Apply `overrides` on top of `self`. Fields the overrides leave unset keep
    /// their current value.
    #[must_use]
    pub fn merged(&self, overrides: &SettingsOverrides) -> PoolSettings {
        fn pick<T: Clone>(over: Option<&T>, cur: &T) -> T {
            over.cloned().unwrap_or_else(|| cur.clone())
        }
        fn pick_opt<T: Clone>(over: Option<&T>, cur: Option<&T>) -> Option<T> {
            over.or(cur).cloned()
        }
        let o = overrides;
        PoolSettings {
            listen_mode: pick(o.listen_mode.as_ref(), &self.listen_mode),
            process_manager: o.process_manager.unwrap_or(self.process_manager),
            max_children: o.max_children.unwrap_or(self.max_children),
            start_servers: o.start_servers.unwrap_or(self.start_servers),
            min_spare_servers: o.min_spare_servers.unwrap_or(self.min_spare_servers),
            max_spare_servers: o.max_spare_servers.unwrap_or(self.max_spare_servers),
            max_requests: o.max_requests.unwrap_or(self.max_requests),
            process_idle_timeout: pick_opt(
                o.process_idle_timeout.as_ref(),
                self.process_idle_timeout.as_ref(),
            ),
            sendmail_path: pick(o.sendmail_path.as_ref(), &self.sendmail_path),
            display_errors: o.display_errors.unwrap_or(self.display_errors),
            log_errors: o.log_errors.unwrap_or(self.log_errors),
            error_log: pick_opt(o.error_log.as_ref(), self.error_log.as_ref()),
            memory_limit: pick(o.memory_limit.as_ref(), &self.memory_limit),
            max_execution_time: o.max_execution_time.or(self.max_execution_time),
            upload_max_filesize: pick_opt(
                o.upload_max_filesize.as_ref(),
                self.upload_max_filesize.as_ref(),
            ),
            post_max_size: pick_opt(o.post_max_size.as_ref(), self.post_max_size.as_ref()),
            date_timezone: pick_opt(o.date_timezone.as_ref(), self.date_timezone.as_ref()),
        }
    }

    pub fn validate(&self) -> Result<(), SchemaError> {
        let invalid = |field: &str, reason: String| SchemaError::InvalidSetting {
            field: field.to_owned(),
            reason,
        };

        let mode = &self.listen_mode;
        if !(3..=4).contains(&mode.len()) || !mode.bytes().all(|b| (b'0'..=b'7').contains(&b)) {
            return Err(invalid(
                "listen_mode",
                format!("'{mode}' is not a 3-4 digit octal mode"),
            ));
        }
        if self.max_children == 0 {
            return Err(invalid("max_children", "must be at least 1".to_owned()));
        }
        if self.process_manager == ProcessManager::Dynamic {
            if self.min_spare_servers > self.start_servers {
                return Err(invalid(
                    "start_servers",
                    format!(
                        "{} is below min_spare_servers ({})",
                        self.start_servers, self.min_spare_servers
                    ),
                ));
            }
            if self.start_servers > self.max_spare_servers {
                return Err(invalid(
                    "start_servers",
                    format!(
                        "{} exceeds max_spare_servers ({})",
                        self.start_servers, self.max_spare_servers
                    ),
                ));
            }
            if self.max_spare_servers > self.max_children {
                return Err(invalid(
                    "max_spare_servers",
                    format!(
                        "{} exceeds max_children ({})",
                        self.max_spare_servers, self.max_children
                    ),
                ));
            }
        }
        for (field, value) in [
            ("sendmail_path", Some(&self.sendmail_path)),
            ("memory_limit", Some(&self.memory_limit)),
            ("error_log", self.error_log.as_ref()),
            ("process_idle_timeout", self.process_idle_timeout.as_ref()),
            ("upload_max_filesize", self.upload_max_filesize.as_ref()),
            ("post_max_size", self.post_max_size.as_ref()),
            ("date_timezone", self.date_timezone.as_ref()),
        ] {
            if let Some(v) = value {
                if v.is_empty() || v.contains(['\n', '\r']) {
                    return Err(invalid(field, "must be a non-empty single line".to_owned()));
                }
            }
        }
        Ok(())
    }
}

/// A partial update to `PoolSettings`. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsOverrides {
    pub listen_mode: Option<String>,
    pub process_manager: Option<ProcessManager>,
    pub max_children: Option<u32>,
    pub start_servers: Option<u32>,
    pub min_spare_servers: Option<u32>,
    pub max_spare_servers: Option<u32>,
    pub max_requests: Option<u32>,
    pub process_idle_timeout: Option<String>,
    pub sendmail_path: Option<String>,
    pub display_errors: Option<Toggle>,
    pub log_errors: Option<Toggle>,
    pub error_log: Option<String>,
    pub memory_limit: Option<String>,
    pub max_execution_time: Option<u32>,
    pub upload_max_filesize: Option<String>,
    pub post_max_size: Option<String>,
    pub date_timezone: Option<String>,
}

/// Keys accepted by `SettingsOverrides::set`.
pub const SETTING_KEYS: &[&str] = &[
    "listen_mode",
    "process_manager",
    "max_children",
    "start_servers",
    "min_spare_servers",
    "max_spare_servers",
    "max_requests",
    "process_idle_timeout",
    "sendmail_path",
    "display_errors",
    "log_errors",
    "error_log",
    "memory_limit",
    "max_execution_time",
    "upload_max_filesize",
    "post_max_size",
    "date_timezone",
];

fn parse_count(field: &str, value: &str) -> Result<u32, SchemaError> {
    value.trim().parse().map_err(|_| SchemaError::InvalidSetting {
        field: field.to_owned(),
        reason: format!("'{value}' is not a non-negative integer"),
    })
}

impl SettingsOverrides {
    pub fn is_empty(&self) -> bool {
        *self == SettingsOverrides::default()
    }

    /// Set one field from its textual form.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), SchemaError> {
        let text = || Some(value.to_owned());
        match key {
            "listen_mode" => self.listen_mode = text(),
            "process_manager" => self.process_manager = Some(value.parse()?),
            "max_children" => self.max_children = Some(parse_count(key, value)?),
            "start_servers" => self.start_servers = Some(parse_count(key, value)?),
            "min_spare_servers" => self.min_spare_servers = Some(parse_count(key, value)?),
            "max_spare_servers" => self.max_spare_servers = Some(parse_count(key, value)?),
            "max_requests" => self.max_requests = Some(parse_count(key, value)?),
            "process_idle_timeout" => self.process_idle_timeout = text(),
            "sendmail_path" => self.sendmail_path = text(),
            "display_errors" => self.display_errors = Some(Toggle::parse(key, value)?),
            "log_errors" => self.log_errors = Some(Toggle::parse(key, value)?),
            "error_log" => self.error_log = text(),
            "memory_limit" => self.memory_limit = text(),
            "max_execution_time" => self.max_execution_time = Some(parse_count(key, value)?),
            "upload_max_filesize" => self.upload_max_filesize = text(),
            "post_max_size" => self.post_max_size = text(),
            "date_timezone" => self.date_timezone = text(),
            other => return Err(SchemaError::UnknownSetting(other.to_owned())),
        }
        Ok(())
    }

    /// Parse a `key=value` assignment, as given on the command line.
    pub fn set_assignment(&mut self, assignment: &str) -> Result<(), SchemaError> {
        let (key, value) =
            assignment
                .split_once('=')
                .ok_or_else(|| SchemaError::InvalidSetting {
                    field: assignment.to_owned(),
                    reason: "expected key=value".to_owned(),
                })?;
        self.set(key.trim(), value.trim())
    }

    /// Build overrides from a JSON object. Numbers, strings and booleans are
    /// accepted for any field and converted to the field's type.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, SchemaError> {
        let obj = value.as_object().ok_or_else(|| SchemaError::InvalidSetting {
            field: "settings".to_owned(),
            reason: "expected a JSON object".to_owned(),
        })?;
        let mut overrides = SettingsOverrides::default();
        for (key, v) in obj {
            let text = match v {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Bool(b) => Toggle::from(*b).to_string(),
                serde_json::Value::Number(n) => match n.as_u64() {
                    Some(u) => u.to_string(),
                    None => n.to_string(),
                },
                _ => {
                    return Err(SchemaError::InvalidSetting {
                        field: key.clone(),
                        reason: "expected a number, string or boolean".to_owned(),
                    })
                }
            };
            overrides.set(key, &text)?;
        }
        Ok(overrides)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_are_valid() {
        let s = PoolSettings::default();
        s.validate().unwrap();
        assert_eq!(s.max_children, 50);
        assert_eq!(s.memory_limit, "128M");
        assert_eq!(s.display_errors, Toggle::Off);
        assert_eq!(s.log_errors, Toggle::On);
    }

    #[test]
    fn merge_keeps_unset_fields() {
        let mut first = SettingsOverrides::default();
        first.set("memory_limit", "256M").unwrap();
        let base = PoolSettings::default().merged(&first);

        let mut second = SettingsOverrides::default();
        second.set("max_children", "80").unwrap();
        let merged = base.merged(&second);

        assert_eq!(merged.memory_limit, "256M");
        assert_eq!(merged.max_children, 80);
        assert_eq!(merged.start_servers, 5);
    }

    #[test]
    fn empty_overrides_are_identity() {
        let base = PoolSettings {
            date_timezone: Some("UTC".to_owned()),
            ..PoolSettings::default()
        };
        let overrides = SettingsOverrides::default();
        assert!(overrides.is_empty());
        assert_eq!(base.merged(&overrides), base);
    }

    #[test]
    fn unknown_key_rejected() {
        let mut o = SettingsOverrides::default();
        let err = o.set("max_kids", "5").unwrap_err();
        assert!(matches!(err, SchemaError::UnknownSetting(k) if k == "max_kids"));
    }

    #[test]
    fn assignment_parsing() {
        let mut o = SettingsOverrides::default();
        o.set_assignment("pm.bogus").unwrap_err();
        o.set_assignment("process_manager=ondemand").unwrap();
        o.set_assignment("display_errors = true").unwrap();
        assert_eq!(o.process_manager, Some(ProcessManager::Ondemand));
        assert_eq!(o.display_errors, Some(Toggle::On));
        assert!(o.set_assignment("max_children=lots").is_err());
    }

    #[test]
    fn json_accepts_numbers_strings_and_bools() {
        let o = SettingsOverrides::from_json(&json!({
            "max_children": 80,
            "memory_limit": "512M",
            "log_errors": false,
            "max_execution_time": "30"
        }))
        .unwrap();
        assert_eq!(o.max_children, Some(80));
        assert_eq!(o.memory_limit.as_deref(), Some("512M"));
        assert_eq!(o.log_errors, Some(Toggle::Off));
        assert_eq!(o.max_execution_time, Some(30));
    }

    #[test]
    fn json_rejects_bad_shapes() {
        assert!(SettingsOverrides::from_json(&json!([1, 2])).is_err());
        assert!(SettingsOverrides::from_json(&json!({"max_children": [1]})).is_err());
        assert!(SettingsOverrides::from_json(&json!({"max_children": -3})).is_err());
        assert!(SettingsOverrides::from_json(&json!({"nope": 1})).is_err());
    }

    #[test]
    fn validate_dynamic_ordering() {
        let s = PoolSettings {
            start_servers: 40,
            ..PoolSettings::default()
        };
        assert!(s.validate().is_err());

        let s = PoolSettings {
            max_children: 10,
            ..PoolSettings::default()
        };
        assert!(s.validate().is_err());

        // static pools ignore the spare-server bounds
        let s = PoolSettings {
            process_manager: ProcessManager::Static,
            max_children: 10,
            ..PoolSettings::default()
        };
        s.validate().unwrap();
    }

    #[test]
    fn validate_rejects_zero_children_and_bad_mode() {
        let s = PoolSettings {
            process_manager: ProcessManager::Static,
            max_children: 0,
            ..PoolSettings::default()
        };
        assert!(s.validate().is_err());

        for mode in ["660x", "0999", "06", "06600"] {
            let s = PoolSettings {
                listen_mode: mode.to_owned(),
                ..PoolSettings::default()
            };
            assert!(s.validate().is_err(), "{mode} should be rejected");
        }
    }

    #[test]
    fn validate_rejects_multiline_values() {
        let s = PoolSettings {
            memory_limit: "128M\nphp_admin_value[open_basedir]=/".to_owned(),
            ..PoolSettings::default()
        };
        assert!(s.validate().is_err());
    }

    #[test]
    fn settings_json_omits_unset_optionals() {
        let json = serde_json::to_value(PoolSettings::default()).unwrap();
        assert!(json.get("date_timezone").is_none());
        assert_eq!(json["process_manager"], "dynamic");
        let back: PoolSettings = serde_json::from_value(json).unwrap();
        assert_eq!(back, PoolSettings::default());
    }
}
