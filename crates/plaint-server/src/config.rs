use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, bail};

use plaint_api::indexes::MAX_INDEX_BUILD_SECS;

/// JWT secrets that must never reach production.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
];

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub storage_dir: PathBuf,
    pub jwt_secret: String,
    pub email_domain: String,
    pub console_url: String,
    pub index_build_secs: u64,
    /// Create the chat indexes at startup instead of waiting for an operator.
    pub auto_indexes: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let or = |key: &str, default: &str| var(key).unwrap_or_else(|| default.to_string());

        let jwt_secret = var("PLAINT_JWT_SECRET").unwrap_or_default();
        if jwt_secret.trim().is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("PLAINT_JWT_SECRET is unset or still a placeholder; set it in your .env file");
        }

        let port = or("PLAINT_PORT", "3000")
            .parse()
            .context("PLAINT_PORT must be a port number")?;
        let index_build_secs: u64 = or("PLAINT_INDEX_BUILD_SECS", "0")
            .parse()
            .context("PLAINT_INDEX_BUILD_SECS must be a whole number of seconds")?;
        if index_build_secs > MAX_INDEX_BUILD_SECS {
            bail!(
                "PLAINT_INDEX_BUILD_SECS must be at most {}, got {}",
                MAX_INDEX_BUILD_SECS,
                index_build_secs
            );
        }
        let auto_indexes = match or("PLAINT_AUTO_INDEXES", "false").to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => true,
            "0" | "false" | "no" | "" => false,
            other => bail!("PLAINT_AUTO_INDEXES must be true or false, got {:?}", other),
        };

        Ok(Self {
            host: or("PLAINT_HOST", "0.0.0.0"),
            port,
            db_path: or("PLAINT_DB_PATH", "plaint.db").into(),
            storage_dir: or("PLAINT_STORAGE_DIR", "./attachments").into(),
            jwt_secret,
            email_domain: or("PLAINT_EMAIL_DOMAIN", "university.edu"),
            console_url: or("PLAINT_CONSOLE_URL", "http://localhost:3000/console")
                .trim_end_matches('/')
                .to_string(),
            index_build_secs,
            auto_indexes,
        })
    }

    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> anyhow::Result<Config> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_apply() {
        let config = load(&[("PLAINT_JWT_SECRET", "s3cret")]).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.db_path, PathBuf::from("plaint.db"));
        assert_eq!(config.email_domain, "university.edu");
        assert_eq!(config.console_url, "http://localhost:3000/console");
        assert_eq!(config.index_build_secs, 0);
        assert!(!config.auto_indexes);
        assert_eq!(config.addr().unwrap().to_string(), "0.0.0.0:3000");
    }

    #[test]
    fn placeholder_secret_is_refused() {
        assert!(load(&[]).is_err());
        assert!(load(&[("PLAINT_JWT_SECRET", "  ")]).is_err());
        assert!(load(&[("PLAINT_JWT_SECRET", "dev-secret-change-me")]).is_err());
    }

    #[test]
    fn overrides_are_parsed() {
        let config = load(&[
            ("PLAINT_JWT_SECRET", "s3cret"),
            ("PLAINT_PORT", "8080"),
            ("PLAINT_CONSOLE_URL", "https://ops.example.edu/console/"),
            ("PLAINT_INDEX_BUILD_SECS", "30"),
            ("PLAINT_AUTO_INDEXES", "TRUE"),
        ])
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.console_url, "https://ops.example.edu/console");
        assert_eq!(config.index_build_secs, 30);
        assert!(config.auto_indexes);

        assert!(load(&[("PLAINT_JWT_SECRET", "s3cret"), ("PLAINT_PORT", "http")]).is_err());
        assert!(load(&[("PLAINT_JWT_SECRET", "s3cret"), ("PLAINT_AUTO_INDEXES", "maybe")]).is_err());
    }

    #[test]
    fn index_build_time_is_bounded() {
        let limit = MAX_INDEX_BUILD_SECS.to_string();
        assert!(load(&[("PLAINT_JWT_SECRET", "s3cret"), ("PLAINT_INDEX_BUILD_SECS", &limit)]).is_ok());

        let over = (MAX_INDEX_BUILD_SECS + 1).to_string();
        assert!(load(&[("PLAINT_JWT_SECRET", "s3cret"), ("PLAINT_INDEX_BUILD_SECS", &over)]).is_err());
        assert!(load(&[("PLAINT_JWT_SECRET", "s3cret"), ("PLAINT_INDEX_BUILD_SECS", "18446744073709551615")]).is_err());
    }
}
