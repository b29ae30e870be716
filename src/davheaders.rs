//! Typed versions of the WebDAV request headers.
//!
//! All of them implement `headers::Header`, so they can be fetched with
//! `HeaderMapExt::typed_get`.
use std::time::Duration;

use headers::Header;
use http::header::{HeaderName, HeaderValue};
use regex::Regex;

lazy_static! {
    static ref DEPTH: HeaderName = HeaderName::from_static("depth");
    static ref TIMEOUT: HeaderName = HeaderName::from_static("timeout");
    static ref OVERWRITE: HeaderName = HeaderName::from_static("overwrite");
    static ref DESTINATION: HeaderName = HeaderName::from_static("destination");
    static ref LOCK_TOKEN: HeaderName = HeaderName::from_static("lock-token");
    static ref IF: HeaderName = HeaderName::from_static("if");
    static ref RE_TIMEOUT: Regex = Regex::new(r"(?i)^second-(\d+)$").unwrap();
}

// single-valued header as a trimmed string.
fn one<'i, I>(values: &mut I) -> Result<&'i str, headers::Error>
where
    I: Iterator<Item = &'i HeaderValue>,
{
    let value = values.next().ok_or_else(headers::Error::invalid)?;
    if values.next().is_some() {
        return Err(headers::Error::invalid());
    }
    value
        .to_str()
        .map(|s| s.trim())
        .map_err(|_| headers::Error::invalid())
}

fn encode_str<E: Extend<HeaderValue>>(values: &mut E, s: &str) {
    if let Ok(v) = HeaderValue::from_str(s) {
        values.extend(std::iter::once(v));
    }
}

/// The `Depth` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Depth {
    Zero,
    One,
    Infinity,
}

impl Header for Depth {
    fn name() -> &'static HeaderName {
        &DEPTH
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        match one(values)? {
            "0" => Ok(Depth::Zero),
            "1" => Ok(Depth::One),
            s if s.eq_ignore_ascii_case("infinity") => Ok(Depth::Infinity),
            _ => Err(headers::Error::invalid()),
        }
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        let value = match *self {
            Depth::Zero => "0",
            Depth::One => "1",
            Depth::Infinity => "infinity",
        };
        values.extend(std::iter::once(HeaderValue::from_static(value)));
    }
}

/// The `Overwrite` header. `T` or `F`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Overwrite(pub bool);

impl Header for Overwrite {
    fn name() -> &'static HeaderName {
        &OVERWRITE
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        match one(values)? {
            "T" | "t" => Ok(Overwrite(true)),
            "F" | "f" => Ok(Overwrite(false)),
            _ => Err(headers::Error::invalid()),
        }
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        let value = if self.0 { "T" } else { "F" };
        values.extend(std::iter::once(HeaderValue::from_static(value)));
    }
}

/// The `Destination` header, as sent by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination(pub String);

impl Header for Destination {
    fn name() -> &'static HeaderName {
        &DESTINATION
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let s = one(values)?;
        if s.is_empty() {
            return Err(headers::Error::invalid());
        }
        Ok(Destination(s.to_string()))
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        encode_str(values, &self.0);
    }
}

/// The `Lock-Token` header, without the angle brackets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken(pub String);

impl Header for LockToken {
    fn name() -> &'static HeaderName {
        &LOCK_TOKEN
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let s = one(values)?;
        let token = s
            .strip_prefix('<')
            .and_then(|s| s.strip_suffix('>'))
            .unwrap_or(s)
            .trim();
        if token.is_empty() {
            return Err(headers::Error::invalid());
        }
        Ok(LockToken(token.to_string()))
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        encode_str(values, &format!("<{}>", self.0));
    }
}

const MAX_TIMEOUT_SECS: u64 = u32::MAX as u64;

/// One entry of the `Timeout` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DavTimeout {
    Seconds(u64),
    Infinite,
}

impl DavTimeout {
    /// `None` means infinite.
    pub fn as_duration(self) -> Option<Duration> {
        match self {
            DavTimeout::Seconds(n) => Some(Duration::from_secs(n)),
            DavTimeout::Infinite => None,
        }
    }
}

/// The `Timeout` header: a list of acceptable timeouts, preferred first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeout(pub Vec<DavTimeout>);

impl Header for Timeout {
    fn name() -> &'static HeaderName {
        &TIMEOUT
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let mut v = Vec::new();
        for value in values {
            let value = value.to_str().map_err(|_| headers::Error::invalid())?;
            for word in value.split(',').map(|w| w.trim()).filter(|w| !w.is_empty()) {
                if word.eq_ignore_ascii_case("infinite") {
                    v.push(DavTimeout::Infinite);
                } else if let Some(caps) = RE_TIMEOUT.captures(word) {
                    // RFC4918 10.7: at most 2^32-1 seconds.
                    let secs = caps[1].parse::<u64>().unwrap_or(u64::MAX);
                    v.push(DavTimeout::Seconds(secs.min(MAX_TIMEOUT_SECS)));
                }
            }
        }
        if v.is_empty() {
            return Err(headers::Error::invalid());
        }
        Ok(Timeout(v))
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        let s = self
            .0
            .iter()
            .map(|t| match t {
                DavTimeout::Seconds(n) => format!("Second-{n}"),
                DavTimeout::Infinite => "Infinite".to_string(),
            })
            .collect::<Vec<_>>()
            .join(", ");
        encode_str(values, &s);
    }
}

/// What a single `If` condition tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IfItem {
    StateToken(String),
    /// Entity tag as written between the brackets, quotes included.
    ETag(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfCondition {
    pub not: bool,
    pub item: IfItem,
}

/// One parenthesized list. All conditions must hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfList {
    /// Resource tag for tagged lists, `None` for the request URL.
    pub resource_tag: Option<String>,
    pub conditions: Vec<IfCondition>,
}

/// The `If` header. Satisfied if any one list holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct If(pub Vec<IfList>);

fn take_until(s: &str, end: char) -> Option<(&str, &str)> {
    let idx = s.find(end)?;
    Some((&s[..idx], &s[idx + end.len_utf8()..]))
}

fn parse_if(s: &str) -> Option<Vec<IfList>> {
    let mut lists = Vec::new();
    let mut tag: Option<String> = None;
    let mut rest = s.trim_start();

    while !rest.is_empty() {
        if let Some(r) = rest.strip_prefix('<') {
            let (t, r) = take_until(r, '>')?;
            tag = Some(t.trim().to_string());
            rest = r.trim_start();
            if !rest.starts_with('(') {
                return None;
            }
            continue;
        }
        let mut r = rest.strip_prefix('(')?;
        let mut conditions = Vec::new();
        loop {
            r = r.trim_start();
            if let Some(x) = r.strip_prefix(')') {
                r = x;
                break;
            }
            let mut not = false;
            if let Some(head) = r.get(..3) {
                let after = r[3..].chars().next();
                if head.eq_ignore_ascii_case("not")
                    && matches!(after, Some(c) if c.is_whitespace() || c == '<' || c == '[')
                {
                    not = true;
                    r = r[3..].trim_start();
                }
            }
            let item;
            if let Some(x) = r.strip_prefix('<') {
                let (t, x) = take_until(x, '>')?;
                item = IfItem::StateToken(t.trim().to_string());
                r = x;
            } else if let Some(x) = r.strip_prefix('[') {
                let (t, x) = take_until(x, ']')?;
                item = IfItem::ETag(t.trim().to_string());
                r = x;
            } else {
                // bare token, without angle brackets.
                let end = r.find(|c: char| c.is_whitespace() || c == ')')?;
                if end == 0 {
                    return None;
                }
                item = IfItem::StateToken(r[..end].to_string());
                r = &r[end..];
            }
            conditions.push(IfCondition { not, item });
        }
        if conditions.is_empty() {
            return None;
        }
        lists.push(IfList {
            resource_tag: tag.clone(),
            conditions,
        });
        rest = r.trim_start();
    }

    if lists.is_empty() {
        return None;
    }
    Some(lists)
}

impl Header for If {
    fn name() -> &'static HeaderName {
        &IF
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let mut lists = Vec::new();
        for value in values {
            let value = value.to_str().map_err(|_| headers::Error::invalid())?;
            lists.extend(parse_if(value).ok_or_else(headers::Error::invalid)?);
        }
        if lists.is_empty() {
            return Err(headers::Error::invalid());
        }
        Ok(If(lists))
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        let mut s = String::new();
        for list in &self.0 {
            if let Some(ref tag) = list.resource_tag {
                s.push_str(&format!("<{tag}> "));
            }
            s.push('(');
            let conds: Vec<String> = list
                .conditions
                .iter()
                .map(|c| {
                    let item = match &c.item {
                        IfItem::StateToken(t) => format!("<{t}>"),
                        IfItem::ETag(e) => format!("[{e}]"),
                    };
                    if c.not {
                        format!("Not {item}")
                    } else {
                        item
                    }
                })
                .collect();
            s.push_str(&conds.join(" "));
            s.push_str(") ");
        }
        encode_str(values, s.trim_end());
    }
}

#[cfg(test)]
mod tests {
    use headers::HeaderMapExt;
    use http::HeaderMap;

    use super::*;

    fn map(name: &str, value: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(
            HeaderName::from_bytes(name.as_bytes()).unwrap(),
            HeaderValue::from_str(value).unwrap(),
        );
        h
    }

    #[test]
    fn depth_and_overwrite() {
        assert_eq!(map("Depth", "0").typed_get::<Depth>(), Some(Depth::Zero));
        assert_eq!(map("Depth", "Infinity").typed_get::<Depth>(), Some(Depth::Infinity));
        assert_eq!(map("Depth", "2").typed_get::<Depth>(), None);
        assert_eq!(map("Overwrite", "F").typed_get::<Overwrite>(), Some(Overwrite(false)));
        assert_eq!(map("Overwrite", "x").typed_get::<Overwrite>(), None);
    }

    #[test]
    fn timeout_list() {
        let t = map("Timeout", "Infinite, Second-4100000000").typed_get::<Timeout>().unwrap();
        assert_eq!(t.0, vec![DavTimeout::Infinite, DavTimeout::Seconds(4100000000)]);
        let t = map("Timeout", "Second-60").typed_get::<Timeout>().unwrap();
        assert_eq!(t.0[0].as_duration(), Some(Duration::from_secs(60)));
        assert_eq!(map("Timeout", "soon").typed_get::<Timeout>(), None);
        let t = map("Timeout", "Second-18446744073709551616").typed_get::<Timeout>().unwrap();
        assert_eq!(t.0, vec![DavTimeout::Seconds(u32::MAX as u64)]);
    }

    #[test]
    fn lock_token() {
        let t = map("Lock-Token", "<opaquelocktoken:abc>").typed_get::<LockToken>().unwrap();
        assert_eq!(t.0, "opaquelocktoken:abc");
    }

    #[test]
    fn if_untagged() {
        let h = map(
            "If",
            "(<opaquelocktoken:a> [\"etag\"]) (Not <DAV:no-lock> [W/\"x\"])",
        );
        let If(lists) = h.typed_get::<If>().unwrap();
        assert_eq!(lists.len(), 2);
        assert_eq!(lists[0].resource_tag, None);
        assert_eq!(
            lists[0].conditions,
            vec![
                IfCondition {
                    not: false,
                    item: IfItem::StateToken("opaquelocktoken:a".to_string())
                },
                IfCondition {
                    not: false,
                    item: IfItem::ETag("\"etag\"".to_string())
                },
            ]
        );
        assert!(lists[1].conditions[0].not);
        assert_eq!(lists[1].conditions[1].item, IfItem::ETag("W/\"x\"".to_string()));
    }

    #[test]
    fn if_tagged_and_bare() {
        let h = map(
            "If",
            "<http://www.example.com/specs/> (<urn:t1>) (<urn:t2>) </other> (token3)",
        );
        let hdr = h.typed_get::<If>().unwrap();
        let tags: Vec<Option<&str>> = hdr.0.iter().map(|l| l.resource_tag.as_deref()).collect();
        assert_eq!(
            tags,
            vec![
                Some("http://www.example.com/specs/"),
                Some("http://www.example.com/specs/"),
                Some("/other")
            ]
        );
        let tokens: Vec<&IfItem> = hdr.0.iter().map(|l| &l.conditions[0].item).collect();
        assert_eq!(
            tokens,
            vec![
                &IfItem::StateToken("urn:t1".to_string()),
                &IfItem::StateToken("urn:t2".to_string()),
                &IfItem::StateToken("token3".to_string()),
            ]
        );
    }

    #[test]
    fn if_malformed() {
        for bad in ["", "(", "()", "<urn:x>", "(<urn:x>", "junk"] {
            assert_eq!(map("If", bad).typed_get::<If>(), None, "{bad:?}");
        }
    }
}
