use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// A single HTTP-style cookie, per §3's field list. `expires == 0` means
/// session-only (never persisted); otherwise it's a Unix timestamp.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    pub created: u64,
    pub expires: u64,
    pub secure: bool,
}

impl Cookie {
    pub fn is_valid(&self) -> bool {
        !self.name.is_empty()
    }

    pub fn is_persistent(&self) -> bool {
        self.expires > 0
    }

    pub fn is_expired(&self, now: u64) -> bool {
        self.expires > 0 && self.expires < now
    }

    fn key(&self) -> (String, String, String) {
        (self.name.clone(), self.domain.clone(), self.path.clone())
    }
}

fn domain_matches(cookie_domain: &str, host: &str) -> bool {
    if cookie_domain == host {
        return true;
    }
    host.ends_with(cookie_domain) && host[..host.len() - cookie_domain.len()].ends_with('.')
}

fn path_matches(cookie_path: &str, request_path: &str) -> bool {
    request_path.starts_with(cookie_path)
}

/// Parses a `Set-Cookie`-style header into a [`Cookie`], RFC 6265-inspired
/// per §4.5: first token is `name=value`, remaining semicolon-separated
/// attributes set Domain/Path/Expires/Max-Age/Secure. Returns `None` for
/// anything that doesn't parse to a valid cookie -- callers reject rather
/// than store a partial one.
pub fn parse_cookie(header: &str, from_host: &str, now: u64) -> Option<Cookie> {
    let mut parts = header.split(';');
    let name_value = parts.next()?.trim();
    let (name, value) = name_value.split_once('=')?;
    let name = name.trim().to_string();
    let value = value.trim().to_string();

    let mut domain = from_host.to_string();
    let mut path = "/".to_string();
    let mut expires: u64 = 0;
    let mut secure = false;

    for attr in parts {
        let attr = attr.trim();
        if attr.is_empty() {
            continue;
        }
        if let Some((key, val)) = attr.split_once('=') {
            let key = key.trim().to_ascii_lowercase();
            let val = val.trim();
            match key.as_str() {
                "domain" => domain = val.trim_start_matches('.').to_string(),
                "path" => path = val.to_string(),
                "max-age" => {
                    if let Ok(secs) = val.parse::<i64>() {
                        expires = if secs <= 0 { 1 } else { now.saturating_add(secs as u64) };
                    }
                }
                "expires" => {
                    // A full HTTP-date parser is out of scope; treat an
                    // unparsed Expires as session-only rather than guess.
                }
                _ => {}
            }
        } else if attr.eq_ignore_ascii_case("secure") {
            secure = true;
        }
    }

    let cookie = Cookie {
        name,
        value,
        domain,
        path,
        created: now,
        expires,
        secure,
    };
    if cookie.is_valid() {
        Some(cookie)
    } else {
        None
    }
}

/// Compact binary encoding of the persistent subset of a cookie jar,
/// round-trippable via [`encode`]/[`decode`]. Uses the same
/// length-prefixed convention the Fleece encoder uses for strings, rather
/// than introducing a second ad hoc framing.
fn write_str(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
}

fn read_str(buf: &[u8], pos: &mut usize) -> Option<String> {
    if buf.len() < *pos + 4 {
        return None;
    }
    let len = u32::from_le_bytes(buf[*pos..*pos + 4].try_into().ok()?) as usize;
    *pos += 4;
    if buf.len() < *pos + len {
        return None;
    }
    let s = String::from_utf8(buf[*pos..*pos + len].to_vec()).ok()?;
    *pos += len;
    Some(s)
}

pub fn encode_cookies(cookies: &[Cookie]) -> Vec<u8> {
    let persistent: Vec<&Cookie> = cookies.iter().filter(|c| c.is_persistent()).collect();
    let mut buf = Vec::new();
    buf.extend_from_slice(&(persistent.len() as u32).to_le_bytes());
    for c in persistent {
        write_str(&mut buf, &c.name);
        write_str(&mut buf, &c.value);
        write_str(&mut buf, &c.domain);
        write_str(&mut buf, &c.path);
        buf.extend_from_slice(&c.created.to_le_bytes());
        buf.extend_from_slice(&c.expires.to_le_bytes());
        buf.push(c.secure as u8);
    }
    buf
}

pub fn decode_cookies(bytes: &[u8]) -> replicator_base::Result<Vec<Cookie>> {
    let mut pos = 0usize;
    if bytes.len() < 4 {
        return Err(replicator_base::err("truncated cookie jar"));
    }
    let count = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
    pos += 4;
    let mut cookies = Vec::with_capacity(count);
    for _ in 0..count {
        let name = read_str(bytes, &mut pos).ok_or_else(|| replicator_base::err("truncated cookie jar"))?;
        let value = read_str(bytes, &mut pos).ok_or_else(|| replicator_base::err("truncated cookie jar"))?;
        let domain = read_str(bytes, &mut pos).ok_or_else(|| replicator_base::err("truncated cookie jar"))?;
        let path = read_str(bytes, &mut pos).ok_or_else(|| replicator_base::err("truncated cookie jar"))?;
        if bytes.len() < pos + 17 {
            return Err(replicator_base::err("truncated cookie jar"));
        }
        let created = u64::from_le_bytes(bytes[pos..pos + 8].try_into().unwrap());
        pos += 8;
        let expires = u64::from_le_bytes(bytes[pos..pos + 8].try_into().unwrap());
        pos += 8;
        let secure = bytes[pos] != 0;
        pos += 1;
        cookies.push(Cookie {
            name,
            value,
            domain,
            path,
            created,
            expires,
            secure,
        });
    }
    Ok(cookies)
}

struct Jar {
    cookies: HashMap<(String, String, String), Cookie>,
    dirty: bool,
}

/// Thread-safe cookie jar (§3 CookieStore invariants, §5(e)): a single
/// mutex guards every mutator and reader, matching the "one mutex" note
/// rather than per-field locking.
pub struct CookieStore {
    jar: Mutex<Jar>,
}

impl Default for CookieStore {
    fn default() -> Self {
        CookieStore {
            jar: Mutex::new(Jar {
                cookies: HashMap::new(),
                dirty: false,
            }),
        }
    }
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl CookieStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses and inserts a `Set-Cookie` header; rejects anything that
    /// doesn't parse to a valid cookie rather than storing a partial one.
    pub fn set_cookie(&self, header: &str, from_host: &str) -> bool {
        match parse_cookie(header, from_host, now_unix()) {
            Some(cookie) => {
                self.insert(cookie);
                true
            }
            None => false,
        }
    }

    /// Replaces any cookie with an equal (name, domain, path); a cookie
    /// with an empty value and an already-past expiry deletes instead.
    pub fn insert(&self, cookie: Cookie) {
        let mut jar = self.jar.lock();
        let key = cookie.key();
        if cookie.value.is_empty() && cookie.is_expired(now_unix()) {
            jar.cookies.remove(&key);
        } else {
            jar.cookies.insert(key, cookie);
        }
        jar.dirty = true;
    }

    pub fn cookies_for_request(&self, url: &str) -> String {
        let (secure_scheme, rest) = if let Some(r) = url.strip_prefix("https://") {
            (true, r)
        } else if let Some(r) = url.strip_prefix("http://") {
            (false, r)
        } else {
            (false, url)
        };
        let (host, path) = match rest.split_once('/') {
            Some((h, p)) => (h, format!("/{p}")),
            None => (rest, "/".to_string()),
        };

        let now = now_unix();
        let jar = self.jar.lock();
        let mut matching: Vec<&Cookie> = jar
            .cookies
            .values()
            .filter(|c| !c.is_expired(now))
            .filter(|c| domain_matches(&c.domain, host))
            .filter(|c| path_matches(&c.path, &path))
            .filter(|c| !c.secure || secure_scheme)
            .collect();
        matching.sort_by(|a, b| b.path.len().cmp(&a.path.len()));
        matching
            .iter()
            .map(|c| format!("{}={}", c.name, c.value))
            .collect::<Vec<_>>()
            .join("; ")
    }

    pub fn is_dirty(&self) -> bool {
        self.jar.lock().dirty
    }

    pub fn clear_dirty(&self) {
        self.jar.lock().dirty = false;
    }

    pub fn encode(&self) -> Vec<u8> {
        let jar = self.jar.lock();
        let cookies: Vec<Cookie> = jar.cookies.values().cloned().collect();
        encode_cookies(&cookies)
    }

    pub fn decode_into(&self, bytes: &[u8]) -> replicator_base::Result<()> {
        let cookies = decode_cookies(bytes)?;
        let mut jar = self.jar.lock();
        for c in cookies {
            jar.cookies.insert(c.key(), c);
        }
        Ok(())
    }
}
