//! URL query-string parse/build helpers (spec.md §6 "Listen specifier"
//! sibling parsing utilities), grounded on
//! `original_source/query_parser.cpp`/`query_builder.h`'s percent-decode and
//! percent-encode state machines.

/// Splits `target` (a request-line path, possibly with a query string) into
/// the path and its decoded query parameters, sorted by key as the source
/// does (enabling binary search, though `get` here is a linear scan since
/// request parameter counts are small).
pub fn parse_path_and_query(target: &str) -> (String, Vec<(String, String)>) {
    let (path, query) = match target.split_once('?') {
        Some((p, q)) => (p, q),
        None => (target, ""),
    };
    let mut params = parse_query(query);
    params.sort_by(|a, b| a.0.cmp(&b.0));
    (url_decode(path), params)
}

/// Parses `key=value&key2=value2`-style query bodies (also used for
/// `application/x-www-form-urlencoded` POST bodies).
pub fn parse_query(query: &str) -> Vec<(String, String)> {
    if query.is_empty() {
        return Vec::new();
    }
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (url_decode(k), url_decode(v)),
            None => (url_decode(pair), String::new()),
        })
        .collect()
}

/// Builds a query string from `pairs`, percent-encoding everything but
/// `[A-Za-z0-9_-]`.
pub fn build_query(pairs: &[(&str, &str)]) -> String {
    let mut out = String::new();
    for (i, (k, v)) in pairs.iter().enumerate() {
        if i > 0 {
            out.push('&');
        }
        url_encode_into(k, &mut out);
        out.push('=');
        url_encode_into(v, &mut out);
    }
    out
}

fn url_encode_into(text: &str, out: &mut String) {
    for b in text.bytes() {
        if b.is_ascii_alphanumeric() || b == b'_' || b == b'-' {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
}

fn url_decode(src: &str) -> String {
    let mut out = String::with_capacity(src.len());
    let bytes = src.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                let hi = from_hex_digit(bytes[i + 1]);
                let lo = from_hex_digit(bytes[i + 2]);
                out.push(((hi << 4) | lo) as char);
                i += 3;
            }
            b => {
                out.push(b as char);
                i += 1;
            }
        }
    }
    out
}

fn from_hex_digit(c: u8) -> u8 {
    match c {
        b'0'..=b'9' => c - b'0',
        b'a'..=b'f' => c - b'a' + 10,
        b'A'..=b'F' => c - b'A' + 10,
        _ => 0,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_path_and_sorted_params() {
        let (path, params) = parse_path_and_query("/search?q=rust+lang&page=2");
        assert_eq!(path, "/search");
        assert_eq!(params, vec![("page".to_string(), "2".to_string()), ("q".to_string(), "rust lang".to_string())]);
    }

    #[test]
    fn decodes_percent_escapes() {
        let (_, params) = parse_path_and_query("/x?name=a%26b");
        assert_eq!(params, vec![("name".to_string(), "a&b".to_string())]);
    }

    #[test]
    fn build_query_round_trips_simple_values() {
        let q = build_query(&[("a", "1"), ("b c", "d&e")]);
        assert_eq!(q, "a=1&b%20c=d%26e");
    }
}
