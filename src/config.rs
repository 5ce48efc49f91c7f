use std::env;
use std::path::PathBuf;

pub const DEFAULT_SESSION_TTL_MINUTES: i64 = 720;
/// One year.
pub const MAX_SESSION_TTL_MINUTES: i64 = 525_600;
pub const DEFAULT_PBKDF2_ITERATIONS: u32 = 100_000;
pub const DEFAULT_MIN_PASSWORD_LEN: usize = 8;

/// Runtime settings, read once from the environment at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub workspace: Option<PathBuf>,
    pub session_ttl_minutes: i64,
    pub pbkdf2_iterations: u32,
    pub min_password_len: usize,
    /// Email that is granted the admin role when it signs up.
    pub bootstrap_admin: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace: None,
            session_ttl_minutes: DEFAULT_SESSION_TTL_MINUTES,
            pbkdf2_iterations: DEFAULT_PBKDF2_ITERATIONS,
            min_password_len: DEFAULT_MIN_PASSWORD_LEN,
            bootstrap_admin: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let non_empty = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        Self {
            workspace: non_empty("PREFECTD_WORKSPACE").map(PathBuf::from),
            session_ttl_minutes: clamp_ttl(parse_positive(
                "PREFECTD_SESSION_TTL_MINUTES",
                non_empty("PREFECTD_SESSION_TTL_MINUTES"),
                defaults.session_ttl_minutes,
            )),
            pbkdf2_iterations: parse_positive(
                "PREFECTD_PBKDF2_ITERATIONS",
                non_empty("PREFECTD_PBKDF2_ITERATIONS"),
                defaults.pbkdf2_iterations,
            ),
            min_password_len: parse_positive(
                "PREFECTD_MIN_PASSWORD_LEN",
                non_empty("PREFECTD_MIN_PASSWORD_LEN"),
                defaults.min_password_len,
            ),
            bootstrap_admin: non_empty("PREFECTD_BOOTSTRAP_ADMIN").map(|e| e.to_lowercase()),
        }
    }
}

/// `PREFECTD_LOG_JSON`, read before logging is set up.
pub fn log_json_from_env() -> bool {
    parse_bool(env::var("PREFECTD_LOG_JSON").ok().as_deref().map(str::trim)).unwrap_or(false)
}

fn parse_bool(v: Option<&str>) -> Option<bool> {
    match v? {
        "1" | "true" | "TRUE" | "yes" | "YES" => Some(true),
        "0" | "false" | "FALSE" | "no" | "NO" => Some(false),
        _ => None,
    }
}

fn clamp_ttl(minutes: i64) -> i64 {
    if minutes > MAX_SESSION_TTL_MINUTES {
        tracing::warn!(
            value = minutes,
            max = MAX_SESSION_TTL_MINUTES,
            "session ttl too long, clamping"
        );
        return MAX_SESSION_TTL_MINUTES;
    }
    minutes
}

fn parse_positive<T>(name: &str, raw: Option<String>, default: T) -> T
where
    T: std::str::FromStr + PartialOrd + Default + Copy + std::fmt::Display,
{
    let Some(raw) = raw else {
        return default;
    };
    match raw.parse::<T>() {
        Ok(v) if v > T::default() => v,
        _ => {
            tracing::warn!(variable = name, value = %raw, fallback = %default, "ignoring invalid setting");
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let cfg = Config::from_lookup(lookup(&[]));
        assert!(cfg.workspace.is_none());
        assert_eq!(cfg.session_ttl_minutes, DEFAULT_SESSION_TTL_MINUTES);
        assert_eq!(cfg.pbkdf2_iterations, DEFAULT_PBKDF2_ITERATIONS);
        assert_eq!(cfg.min_password_len, DEFAULT_MIN_PASSWORD_LEN);
        assert!(cfg.bootstrap_admin.is_none());
    }

    #[test]
    fn reads_overrides_and_rejects_bad_numbers() {
        let cfg = Config::from_lookup(lookup(&[
            ("PREFECTD_WORKSPACE", "/tmp/ws"),
            ("PREFECTD_SESSION_TTL_MINUTES", "30"),
            ("PREFECTD_PBKDF2_ITERATIONS", "-5"),
            ("PREFECTD_MIN_PASSWORD_LEN", "abc"),
            ("PREFECTD_BOOTSTRAP_ADMIN", " Head@School.edu "),
        ]));
        assert_eq!(cfg.workspace, Some(PathBuf::from("/tmp/ws")));
        assert_eq!(cfg.session_ttl_minutes, 30);
        assert_eq!(cfg.pbkdf2_iterations, DEFAULT_PBKDF2_ITERATIONS);
        assert_eq!(cfg.min_password_len, DEFAULT_MIN_PASSWORD_LEN);
        assert_eq!(cfg.bootstrap_admin.as_deref(), Some("head@school.edu"));
    }

    #[test]
    fn huge_session_ttl_is_clamped_to_a_year() {
        let cfg = Config::from_lookup(lookup(&[(
            "PREFECTD_SESSION_TTL_MINUTES",
            "9223372036854775807",
        )]));
        assert_eq!(cfg.session_ttl_minutes, MAX_SESSION_TTL_MINUTES);

        let cfg = Config::from_lookup(lookup(&[("PREFECTD_SESSION_TTL_MINUTES", "525600")]));
        assert_eq!(cfg.session_ttl_minutes, 525_600);
    }

    #[test]
    fn bool_spellings() {
        assert_eq!(parse_bool(Some("yes")), Some(true));
        assert_eq!(parse_bool(Some("0")), Some(false));
        assert_eq!(parse_bool(Some("maybe")), None);
        assert_eq!(parse_bool(None), None);
    }
}
