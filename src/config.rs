use std::{net::SocketAddr, path::PathBuf, time::Duration};

use anyhow::{Context, bail};

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: SocketAddr,
    pub media_root: PathBuf,
    pub media_url: String,
    pub max_upload_bytes: usize,
    pub session_idle_minutes: i64,
    /// Upper bound on persistence work while a connection is torn down.
    pub cleanup_timeout: Duration,
    pub dev_login: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite://duetto.db".to_owned(),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            media_root: PathBuf::from("media"),
            media_url: "/media/".to_owned(),
            max_upload_bytes: 10 * 1024 * 1024,
            session_idle_minutes: 60,
            cleanup_timeout: Duration::from_millis(3000),
            dev_login: false,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Config> {
        let mut config = Config::default();

        if let Ok(url) = dotenv::var("DATABASE_URL") {
            config.database_url = url;
        }
        if let Ok(addr) = dotenv::var("BIND_ADDR") {
            config.bind_addr = addr.parse().context("parse BIND_ADDR")?;
        }
        if let Ok(root) = dotenv::var("MEDIA_ROOT") {
            config.media_root = PathBuf::from(root);
        }
        if let Ok(url) = dotenv::var("MEDIA_URL") {
            config.media_url = media_url(&url).context("parse MEDIA_URL")?;
        }
        if let Ok(bytes) = dotenv::var("MAX_UPLOAD_BYTES") {
            config.max_upload_bytes = bytes.parse().context("parse MAX_UPLOAD_BYTES")?;
        }
        if let Ok(minutes) = dotenv::var("SESSION_IDLE_MINUTES") {
            config.session_idle_minutes = minutes.parse().context("parse SESSION_IDLE_MINUTES")?;
        }
        if let Ok(ms) = dotenv::var("CLEANUP_TIMEOUT_MS") {
            config.cleanup_timeout =
                Duration::from_millis(ms.parse().context("parse CLEANUP_TIMEOUT_MS")?);
        }
        if let Ok(flag) = dotenv::var("DEV_LOGIN") {
            config.dev_login = matches!(flag.as_str(), "1" | "true" | "yes");
        }

        Ok(config)
    }
}

/// Normalizes a media prefix to `/segment/`. The root itself is refused since
/// uploads are served from a nested route.
fn media_url(raw: &str) -> anyhow::Result<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    if !trimmed.starts_with('/') {
        bail!("{raw:?} must start with '/' and name a path below the root");
    }
    Ok(format!("{trimmed}/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_url_is_normalized() {
        assert_eq!(media_url("/media").unwrap(), "/media/");
        assert_eq!(media_url("/files/chat/").unwrap(), "/files/chat/");
    }

    #[test]
    fn media_url_root_is_refused() {
        for raw in ["/", "//", "", "media/"] {
            assert!(media_url(raw).is_err(), "{raw:?}");
        }
    }

    #[test]
    fn default_media_url_is_valid() {
        let config = Config::default();
        assert_eq!(media_url(&config.media_url).unwrap(), config.media_url);
    }
}
