//! Source URL classification and host normalization.

use url::Url;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Instagram,
    YouTube,
    Threads,
}

/// A platform the downloader is known to have no extractor for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsupportedPlatform {
    pub name: String,
    pub hosts: Vec<String>,
}

/// Host rewritten before the downloader sees the URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostAlias {
    pub from: String,
    pub to: String,
}

/// Which source hosts fail fast and which hosts get rewritten.
///
/// The defaults reflect current yt-dlp behavior and are expected to change
/// with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformPolicy {
    pub unsupported: Vec<UnsupportedPlatform>,
    pub host_aliases: Vec<HostAlias>,
}

impl Default for PlatformPolicy {
    fn default() -> Self {
        Self {
            unsupported: vec![UnsupportedPlatform {
                name: "Threads".to_string(),
                hosts: vec!["threads.net".to_string(), "threads.com".to_string()],
            }],
            host_aliases: vec![HostAlias {
                from: "threads.com".to_string(),
                to: "threads.net".to_string(),
            }],
        }
    }
}

/// Parses `raw`, retrying with an `https://` prefix for scheme-less input.
fn parse_lenient(raw: &str) -> Option<Url> {
    let raw = raw.trim();
    let parsed = Url::parse(raw)
        .ok()
        .filter(|u| u.host_str().is_some_and(|h| !h.is_empty()));
    parsed.or_else(|| {
        Url::parse(&format!("https://{raw}"))
            .ok()
            .filter(|u| u.host_str().is_some_and(|h| !h.is_empty()))
    })
}

fn host_matches(host: &str, domain: &str) -> bool {
    host == domain
        || host
            .strip_suffix(domain)
            .is_some_and(|prefix| prefix.ends_with('.'))
}

fn lower_host(url: &Url) -> String {
    url.host_str().unwrap_or_default().to_ascii_lowercase()
}

impl PlatformPolicy {
    /// Name of the unsupported platform `raw` points at, if any.
    pub fn unsupported_platform(&self, raw: &str) -> Option<&str> {
        let url = parse_lenient(raw)?;
        let host = lower_host(&url);
        self.unsupported
            .iter()
            .find(|p| p.hosts.iter().any(|h| host_matches(&host, h)))
            .map(|p| p.name.as_str())
    }

    /// Rewrites an aliased host, leaving every other part of the URL alone.
    /// URLs without a matching alias are returned unchanged.
    pub fn normalize(&self, raw: &str) -> String {
        let Some(mut url) = parse_lenient(raw) else {
            return raw.to_string();
        };
        let host = lower_host(&url);
        let Some(alias) = self
            .host_aliases
            .iter()
            .find(|a| host_matches(&host, &a.from))
        else {
            return raw.to_string();
        };
        let prefix = &host[..host.len() - alias.from.len()];
        let new_host = format!("{prefix}{}", alias.to);
        if url.set_host(Some(&new_host)).is_err() {
            return raw.to_string();
        }
        url.to_string()
    }
}

/// Classifies a user-supplied URL. Unknown hosts are a usage error.
pub fn detect_platform(raw: &str) -> Result<Platform, AppError> {
    let url = parse_lenient(raw).ok_or_else(|| AppError::Config(format!("invalid URL {raw:?}")))?;
    let host = lower_host(&url);
    let host = host.strip_prefix("www.").unwrap_or(&host);
    match host {
        "instagram.com" | "instagr.am" | "m.instagram.com" => Ok(Platform::Instagram),
        "youtube.com" | "m.youtube.com" | "youtu.be" | "music.youtube.com" => Ok(Platform::YouTube),
        "threads.net" | "threads.com" => Ok(Platform::Threads),
        _ => Err(AppError::Config(format!(
            "unsupported URL {raw:?}: only Instagram or YouTube are supported (instagram.com, instagr.am, youtube.com, youtu.be)"
        ))),
    }
}
