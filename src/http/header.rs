//! Header multimap (spec.md §3 "HTTP Request", §4.5) and the header-block
//! terminator detector.

use indexmap::IndexMap;

/// ASCII-case-insensitive header name, compared and hashed by its
/// lower-cased form but displayed as given.
#[derive(Clone, Debug)]
pub struct HeaderName {
    original: Box<str>,
    lower: Box<str>,
}

impl HeaderName {
    pub fn new(s: &str) -> HeaderName {
        HeaderName {
            original: s.into(),
            lower: s.to_ascii_lowercase().into_boxed_str(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.original
    }
}

impl PartialEq for HeaderName {
    fn eq(&self, other: &HeaderName) -> bool {
        self.lower == other.lower
    }
}
impl Eq for HeaderName {}

impl std::hash::Hash for HeaderName {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.lower.hash(state);
    }
}

impl From<&str> for HeaderName {
    fn from(s: &str) -> HeaderName {
        HeaderName::new(s)
    }
}

/// Case-insensitive, insertion-order-preserving (for repeated keys)
/// header multimap. Backed by `indexmap`, same as the teacher.
#[derive(Clone, Debug, Default)]
pub struct Headers {
    map: IndexMap<HeaderName, Vec<String>>,
}

impl Headers {
    pub fn new() -> Headers {
        Headers::default()
    }

    pub fn append(&mut self, name: &str, value: &str) {
        self.map
            .entry(HeaderName::new(name))
            .or_default()
            .push(value.trim().to_string());
    }

    pub fn set(&mut self, name: &str, value: &str) {
        self.map.insert(HeaderName::new(name), vec![value.trim().to_string()]);
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.map
            .get(&HeaderName::new(name))
            .and_then(|v| v.first())
            .map(String::as_str)
    }

    pub fn get_all(&self, name: &str) -> &[String] {
        self.map
            .get(&HeaderName::new(name))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(&HeaderName::new(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.map
            .iter()
            .flat_map(|(k, vs)| vs.iter().map(move |v| (k.as_str(), v.as_str())))
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Four-state CRLF-CRLF detector (spec.md §4.5): `text → CR → LF → CR →
/// LF`. Feed it bytes across chunk boundaries; once it reports a match it
/// also hands back the byte offset one past the terminator.
#[derive(Clone, Copy, Default)]
pub struct HeaderEndDetector {
    state: DetectorState,
}

#[derive(Clone, Copy, Default, PartialEq, Eq)]
enum DetectorState {
    #[default]
    Text,
    Cr1,
    Lf1,
    Cr2,
}

impl HeaderEndDetector {
    pub fn new() -> HeaderEndDetector {
        HeaderEndDetector::default()
    }

    /// Scans `chunk`, returning `Some(end)` the first time the terminator
    /// completes, where `end` is the offset in `chunk` just past the
    /// second CRLF.
    pub fn feed(&mut self, chunk: &[u8]) -> Option<usize> {
        for (i, &b) in chunk.iter().enumerate() {
            self.state = match (self.state, b) {
                (DetectorState::Text, b'\r') => DetectorState::Cr1,
                (DetectorState::Cr1, b'\n') => DetectorState::Lf1,
                (DetectorState::Lf1, b'\r') => DetectorState::Cr2,
                (DetectorState::Cr2, b'\n') => {
                    return Some(i + 1);
                }
                // Any other byte resets to Text, except a fresh CR which
                // restarts the sequence immediately.
                (_, b'\r') => DetectorState::Cr1,
                _ => DetectorState::Text,
            };
        }
        None
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn detects_terminator_across_feeds() {
        let mut d = HeaderEndDetector::new();
        assert!(d.feed(b"GET / HTTP/1.1\r\nHost: x\r").is_none());
        assert_eq!(d.feed(b"\n\r\nbody").unwrap(), 3);
    }

    #[test]
    fn header_multimap_preserves_order_of_duplicates() {
        let mut h = Headers::new();
        h.append("X-A", "1");
        h.append("x-a", "2");
        assert_eq!(h.get_all("X-A"), &["1".to_string(), "2".to_string()]);
    }
}
