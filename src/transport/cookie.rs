//! Cookie jar keyed by request URL.
//!
//! Cookie-based authentication relies on the login exchange populating the
//! jar; every later frame sends the matching cookies back. The jar is shared
//! by concurrent requests and guarded by a single mutex.

// ============================================================================
// Imports
// ============================================================================

use std::time::{Duration, Instant};

use chrono::{DateTime, NaiveDateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, trace};
use url::Url;

// ============================================================================
// StoredCookie
// ============================================================================

/// A cookie parsed from a `Set-Cookie` header.
#[derive(Debug, Clone, PartialEq, Eq)]
struct StoredCookie {
    name: String,
    value: String,
    /// Lowercase domain without a leading dot.
    domain: String,
    /// `true` when no `Domain` attribute was given.
    host_only: bool,
    path: String,
    secure: bool,
    expires_at: Option<Instant>,
}

impl StoredCookie {
    /// Parses a `Set-Cookie` header received from `url`.
    ///
    /// `Max-Age` takes precedence over `Expires` when both are present.
    /// Returns `None` for headers without a `name=value` pair or whose
    /// `Domain` attribute does not cover the request host.
    fn parse(header: &str, url: &Url) -> Option<Self> {
        let host = url.host_str()?.to_ascii_lowercase();
        let mut parts = header.split(';').map(str::trim);

        let (name, value) = parts.next()?.split_once('=')?;
        let name = name.trim();
        if name.is_empty() {
            return None;
        }

        let mut cookie = Self {
            name: name.to_string(),
            value: value.trim().trim_matches('"').to_string(),
            domain: host.clone(),
            host_only: true,
            path: default_path(url),
            secure: false,
            expires_at: None,
        };

        let mut max_age = None;
        let mut expires = None;

        for attr in parts {
            let (key, val) = attr.split_once('=').unwrap_or((attr, ""));
            match key.trim().to_ascii_lowercase().as_str() {
                "domain" => {
                    let domain = val.trim().trim_start_matches('.').to_ascii_lowercase();
                    if domain.is_empty() {
                        continue;
                    }
                    if !domain_matches(&host, &domain) {
                        debug!(%host, %domain, "Rejected cookie for foreign domain");
                        return None;
                    }
                    cookie.domain = domain;
                    cookie.host_only = false;
                }
                "path" if val.trim().starts_with('/') => cookie.path = val.trim().to_string(),
                "secure" => cookie.secure = true,
                "max-age" => {
                    if let Ok(seconds) = val.trim().parse::<i64>() {
                        let ttl = Duration::from_secs(u64::try_from(seconds).unwrap_or(0));
                        max_age = Some(Instant::now() + ttl);
                    }
                }
                "expires" => {
                    expires = parse_cookie_date(val.trim()).map(|date| {
                        let ttl = (date - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                        Instant::now() + ttl
                    });
                }
                _ => {}
            }
        }

        cookie.expires_at = max_age.or(expires);
        Some(cookie)
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    fn matches(&self, url: &Url, host: &str) -> bool {
        if self.secure && url.scheme() != "https" {
            return false;
        }

        let domain_ok = if self.host_only {
            host == self.domain
        } else {
            domain_matches(host, &self.domain)
        };

        domain_ok && path_matches(url.path(), &self.path)
    }

    fn same_slot(&self, other: &Self) -> bool {
        self.name == other.name && self.domain == other.domain && self.path == other.path
    }
}

// ============================================================================
// CookieJar
// ============================================================================

/// Thread-safe cookie storage.
#[derive(Debug, Default)]
pub struct CookieJar {
    cookies: Mutex<Vec<StoredCookie>>,
}

impl CookieJar {
    /// Creates an empty jar.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the cookies from `Set-Cookie` headers received from `url`.
    ///
    /// A cookie replaces any stored cookie with the same name, domain and
    /// path. A cookie that is already expired removes that slot.
    pub fn absorb<S: AsRef<str>>(&self, url: &Url, set_cookies: &[S]) {
        if set_cookies.is_empty() {
            return;
        }

        let mut cookies = self.cookies.lock();

        for header in set_cookies {
            let Some(cookie) = StoredCookie::parse(header.as_ref(), url) else {
                debug!(header = header.as_ref(), "Ignoring unparsable Set-Cookie");
                continue;
            };

            cookies.retain(|stored| !stored.same_slot(&cookie));
            if cookie.is_expired(Instant::now()) {
                trace!(name = %cookie.name, "Cookie expired on arrival");
            } else {
                trace!(name = %cookie.name, domain = %cookie.domain, "Stored cookie");
                cookies.push(cookie);
            }
        }
    }

    /// Builds the `Cookie` header value for a request to `url`.
    ///
    /// Returns `None` when no stored cookie applies.
    #[must_use]
    pub fn cookies_for(&self, url: &Url) -> Option<String> {
        let host = url.host_str()?.to_ascii_lowercase();
        let now = Instant::now();

        let mut cookies = self.cookies.lock();
        cookies.retain(|cookie| !cookie.is_expired(now));

        let header = cookies
            .iter()
            .filter(|cookie| cookie.matches(url, &host))
            .map(|cookie| format!("{}={}", cookie.name, cookie.value))
            .collect::<Vec<_>>()
            .join("; ");

        (!header.is_empty()).then_some(header)
    }

    /// Returns the number of stored cookies.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.cookies.lock().len()
    }

    /// Returns `true` if the jar holds no cookies.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cookies.lock().is_empty()
    }

    /// Removes every cookie.
    pub fn clear(&self) {
        self.cookies.lock().clear();
    }
}

// ============================================================================
// Matching Helpers
// ============================================================================

fn domain_matches(host: &str, domain: &str) -> bool {
    host == domain
        || host
            .strip_suffix(domain)
            .is_some_and(|prefix| prefix.ends_with('.'))
}

fn path_matches(request_path: &str, cookie_path: &str) -> bool {
    request_path == cookie_path
        || (request_path.starts_with(cookie_path)
            && (cookie_path.ends_with('/')
                || request_path[cookie_path.len()..].starts_with('/')))
}

/// Parses an `Expires` value in IMF-fixdate or the legacy RFC 850 form.
fn parse_cookie_date(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(date) = DateTime::parse_from_rfc2822(value) {
        return Some(date.with_timezone(&Utc));
    }
    ["%A, %d-%b-%y %H:%M:%S GMT", "%a, %d-%b-%Y %H:%M:%S GMT"]
        .into_iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|date| date.and_utc())
}

/// Directory of the request path, per RFC 6265 section 5.1.4.
fn default_path(url: &Url) -> String {
    let path = url.path();
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(index) => path[..index].to_string(),
    }
}

// ============================================================================
// Tests
// ============================================================================
