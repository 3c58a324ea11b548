//! Repository identity: the canonical `(host, owner, name)` key used to match
//! webhook deliveries against configured jobs.

use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use crate::error::{Result, RouterError};

/// `http(s)://[user@]host/owner/name[.git][/]`
static WEB_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://(?:[^/@]+@)?([^/@]+)/([^/]+)/([^/]+?)(?:\.git)?/?$")
        .expect("web url pattern is valid")
});

/// Non-web remotes: scp-like ssh, `git://` and `ssh://` urls.
static REMOTE_URLS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"^git@([^:/]+):([^/]+)/([^/]+?)(?:\.git)?/?$",
        r"^git://([^/]+)/([^/]+)/([^/]+?)(?:\.git)?/?$",
        r"^(?:git\+)?ssh://(?:[^/@]+@)?([^/@]+)/([^/]+)/([^/]+?)(?:\.git)?/?$",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("remote url pattern is valid"))
    .collect()
});

/// Canonical repository key. Equality is case-sensitive on all three parts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RepositoryIdentity {
    host: String,
    owner: String,
    name: String,
}

impl RepositoryIdentity {
    pub fn new(
        host: impl Into<String>,
        owner: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// Parses any supported remote url form (web, scp-like, `git://`, `ssh://`).
    pub fn parse(url: &str) -> Result<Self> {
        let url = url.trim();
        std::iter::once(&*WEB_URL)
            .chain(REMOTE_URLS.iter())
            .find_map(|pattern| Self::capture(pattern, url))
            .ok_or_else(|| RouterError::MalformedRepositoryUrl(url.to_string()))
    }

    /// Parses only the `scheme://host/owner/name` web shape that push
    /// payloads carry in `repository.url`.
    pub fn from_web_url(url: &str) -> Result<Self> {
        Self::capture(&WEB_URL, url.trim())
            .ok_or_else(|| RouterError::MalformedRepositoryUrl(url.to_string()))
    }

    fn capture(pattern: &Regex, url: &str) -> Option<Self> {
        let caps = pattern.captures(url)?;
        Some(Self::new(&caps[1], &caps[2], &caps[3]))
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Canonical web url; parsing it yields an equal identity.
    pub fn to_url(&self) -> String {
        format!("https://{}/{}/{}", self.host, self.owner, self.name)
    }
}

impl FromStr for RepositoryIdentity {
    type Err = RouterError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for RepositoryIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.host, self.owner, self.name)
    }
}
