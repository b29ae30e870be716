//! Utility module to handle the path part of an URL as a resource path.
//!
//! A [`DavPath`] is a sequence of non-empty segments. It is rendered with a
//! single leading slash and no trailing slash, the root being `/`.
//! Everything that takes a path from the outside world (request URI,
//! `Destination` header, tagged `If` lists) goes through
//! [`DavPath::normalize`], so a `DavPath` never contains `.` or `..`
//! segments and can never point outside of the root.

use std::fmt;
use std::str::FromStr;

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};

// Everything but the RFC 3986 unreserved set and a few safe sub-delims.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'&')
    .add(b'\'')
    .add(b'(')
    .add(b')')
    .add(b'*')
    .add(b'+')
    .add(b',')
    .add(b'/')
    .add(b':')
    .add(b';')
    .add(b'<')
    .add(b'=')
    .add(b'>')
    .add(b'?')
    .add(b'@')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// Errors from path resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// More `..` segments than there are segments to remove.
    #[error("path escapes the root")]
    Traversal,
    /// Not valid UTF-8 after percent-decoding, or contains a NUL byte.
    #[error("invalid path")]
    InvalidPath,
    /// The URL does not start with the configured prefix.
    #[error("path is outside of the served prefix")]
    PrefixMismatch,
}

/// A normalized resource path.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct DavPath {
    segments: Vec<String>,
}

impl DavPath {
    /// The root collection, `/`.
    pub fn root() -> DavPath {
        DavPath::default()
    }

    /// Normalize a raw (already percent-decoded) path.
    ///
    /// `\` is treated as `/`, empty and `.` segments are dropped and `..`
    /// removes the preceding segment. Fails with [`ParseError::Traversal`]
    /// if `..` would climb above the root.
    pub fn normalize(path: &str) -> Result<DavPath, ParseError> {
        let mut segments: Vec<String> = Vec::new();
        for seg in path.split(|c| c == '/' || c == '\\') {
            match seg {
                "" | "." => {}
                ".." => {
                    if segments.pop().is_none() {
                        return Err(ParseError::Traversal);
                    }
                }
                s => {
                    if s.contains('\0') {
                        return Err(ParseError::InvalidPath);
                    }
                    segments.push(s.to_string());
                }
            }
        }
        Ok(DavPath { segments })
    }

    /// Resolve the path of a request URI, stripping `prefix` first.
    pub fn from_uri_and_prefix(uri: &http::Uri, prefix: &str) -> Result<DavPath, ParseError> {
        Self::from_raw_and_prefix(uri.path(), prefix)
    }

    /// Resolve an URL as found in a `Destination` or `If` header.
    ///
    /// Both absolute URLs and absolute paths are accepted. The scheme and
    /// authority of an absolute URL are ignored.
    pub fn from_url_and_prefix(url: &str, prefix: &str) -> Result<DavPath, ParseError> {
        if url.starts_with('/') {
            let path = url.split(['?', '#']).next().unwrap_or_default();
            return Self::from_raw_and_prefix(path, prefix);
        }
        let url = url::Url::parse(url).map_err(|_| ParseError::InvalidPath)?;
        Self::from_raw_and_prefix(url.path(), prefix)
    }

    fn from_raw_and_prefix(raw: &str, prefix: &str) -> Result<DavPath, ParseError> {
        let prefix = prefix.trim_end_matches('/');
        let rest = if prefix.is_empty() {
            raw
        } else {
            match raw.strip_prefix(prefix) {
                Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
                _ => return Err(ParseError::PrefixMismatch),
            }
        };
        let decoded = percent_decode_str(rest)
            .decode_utf8()
            .map_err(|_| ParseError::InvalidPath)?;
        Self::normalize(&decoded)
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Last segment, `None` for the root.
    pub fn file_name(&self) -> Option<&str> {
        self.segments.last().map(|s| s.as_str())
    }

    /// The containing collection, `None` for the root.
    pub fn parent(&self) -> Option<DavPath> {
        if self.is_root() {
            return None;
        }
        let mut segments = self.segments.clone();
        segments.pop();
        Some(DavPath { segments })
    }

    /// Iterate over all proper ancestors, nearest first, ending with the root.
    pub fn ancestors(&self) -> impl Iterator<Item = DavPath> + '_ {
        (0..self.segments.len()).rev().map(move |n| DavPath {
            segments: self.segments[..n].to_vec(),
        })
    }

    /// Concatenate two paths. The root is the identity on both sides.
    pub fn join(&self, child: &DavPath) -> DavPath {
        let mut segments = self.segments.clone();
        segments.extend(child.segments.iter().cloned());
        DavPath { segments }
    }

    /// Append a single member name.
    pub fn child(&self, name: &str) -> Result<DavPath, ParseError> {
        Ok(self.join(&DavPath::normalize(name)?))
    }

    /// True if `self` is `base` or lies below it.
    pub fn starts_with(&self, base: &DavPath) -> bool {
        self.segments.starts_with(&base.segments)
    }

    /// True if `self` lies strictly above `other`.
    pub fn is_ancestor_of(&self, other: &DavPath) -> bool {
        other.segments.len() > self.segments.len() && other.starts_with(self)
    }

    /// Move `self` from below `from` to the same place below `to`.
    pub fn rebase(&self, from: &DavPath, to: &DavPath) -> Option<DavPath> {
        let rest = self.segments.strip_prefix(from.segments.as_slice())?;
        let mut segments = to.segments.clone();
        segments.extend(rest.iter().cloned());
        Some(DavPath { segments })
    }

    /// Percent-encoded form, for use in URLs and `href` elements.
    pub fn as_url_string(&self) -> String {
        if self.is_root() {
            return "/".to_string();
        }
        let mut s = String::new();
        for seg in &self.segments {
            s.push('/');
            s.extend(utf8_percent_encode(seg, PATH_SEGMENT));
        }
        s
    }

    /// Percent-encoded form with the URL prefix put back in front.
    pub fn with_prefix(&self, prefix: &str) -> String {
        let prefix = prefix.trim_end_matches('/');
        if prefix.is_empty() {
            return self.as_url_string();
        }
        if self.is_root() {
            return format!("{prefix}/");
        }
        format!("{}{}", prefix, self.as_url_string())
    }
}

impl fmt::Display for DavPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            return f.write_str("/");
        }
        for seg in &self.segments {
            write!(f, "/{seg}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for DavPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.to_string())
    }
}

impl FromStr for DavPath {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DavPath::normalize(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn norm(s: &str) -> String {
        DavPath::normalize(s).unwrap().to_string()
    }

    #[test]
    fn normalize_rules() {
        assert_eq!(norm(""), "/");
        assert_eq!(norm("/"), "/");
        assert_eq!(norm("//a///b/"), "/a/b");
        assert_eq!(norm("a\\b\\c"), "/a/b/c");
        assert_eq!(norm("/a/./b/."), "/a/b");
        assert_eq!(norm("/a/b/../c"), "/a/c");
        assert_eq!(norm("/a/.."), "/");
    }

    #[test]
    fn traversal_fails() {
        assert_eq!(DavPath::normalize("/.."), Err(ParseError::Traversal));
        assert_eq!(DavPath::normalize("/a/../../b"), Err(ParseError::Traversal));
        assert_eq!(DavPath::normalize("..\\etc"), Err(ParseError::Traversal));
    }

    #[test]
    fn normalize_is_idempotent() {
        let inputs = [
            "", "/", "a", "/a/b/", "//x//./y/../z", "\\win\\path", "/a b/c%20d", "/ü/ß",
        ];
        for input in inputs {
            let once = DavPath::normalize(input).unwrap();
            let twice = DavPath::normalize(&once.to_string()).unwrap();
            assert_eq!(once, twice, "input {input:?}");
            let s = once.to_string();
            assert!(!s.contains("//") && !s.contains("/./") && !s.contains("/../"));
        }
    }

    #[test]
    fn parent_and_join() {
        let p: DavPath = "/a/b".parse().unwrap();
        assert_eq!(p.parent().unwrap().to_string(), "/a");
        assert_eq!(p.parent().unwrap().parent().unwrap(), DavPath::root());
        assert_eq!(DavPath::root().parent(), None);

        assert_eq!(DavPath::root().join(&p), p);
        assert_eq!(p.join(&DavPath::root()), p);
        assert_eq!(p.child("c").unwrap().to_string(), "/a/b/c");
        assert_eq!(p.child(".."), Err(ParseError::Traversal));

        let ancestors: Vec<String> = p.ancestors().map(|a| a.to_string()).collect();
        assert_eq!(ancestors, vec!["/a", "/"]);
    }

    #[test]
    fn ancestry_and_rebase() {
        let a: DavPath = "/a".parse().unwrap();
        let ab: DavPath = "/a/b".parse().unwrap();
        let abc: DavPath = "/ab/c".parse().unwrap();
        assert!(a.is_ancestor_of(&ab));
        assert!(!a.is_ancestor_of(&a));
        assert!(!a.is_ancestor_of(&abc));
        assert!(ab.starts_with(&a));

        let to: DavPath = "/x/y".parse().unwrap();
        assert_eq!(ab.rebase(&a, &to).unwrap().to_string(), "/x/y/b");
        assert_eq!(abc.rebase(&a, &to), None);
    }

    #[test]
    fn uri_and_prefix() {
        let uri: http::Uri = "/dav/a%20b/c?x=1".parse().unwrap();
        let p = DavPath::from_uri_and_prefix(&uri, "/dav/").unwrap();
        assert_eq!(p.to_string(), "/a b/c");
        assert_eq!(p.as_url_string(), "/a%20b/c");
        assert_eq!(p.with_prefix("/dav"), "/dav/a%20b/c");
        assert_eq!(DavPath::root().with_prefix("/dav"), "/dav/");

        let uri: http::Uri = "/davx/a".parse().unwrap();
        assert_eq!(
            DavPath::from_uri_and_prefix(&uri, "/dav"),
            Err(ParseError::PrefixMismatch)
        );

        let uri: http::Uri = "/a/%2e%2e/%2e%2e/etc".parse().unwrap();
        assert_eq!(
            DavPath::from_uri_and_prefix(&uri, ""),
            Err(ParseError::Traversal)
        );
    }

    #[test]
    fn destination_urls() {
        let p = DavPath::from_url_and_prefix("http://example.com:8080/dav/x/y", "/dav").unwrap();
        assert_eq!(p.to_string(), "/x/y");
        let p = DavPath::from_url_and_prefix("/x/y?z", "").unwrap();
        assert_eq!(p.to_string(), "/x/y");
        assert!(DavPath::from_url_and_prefix("not a url", "").is_err());
    }
}
