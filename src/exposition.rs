// Text exposition parser: `name[{labels}] value [timestamp]` per line.
// Malformed lines are skipped, never fatal; comment and HELP/TYPE lines from
// exposition producers must not stop processing.

use crate::models::RawSample;
use std::collections::BTreeMap;

/// Parse a whole payload. Bad lines are dropped; the skip count is logged at
/// debug once per payload. Only failure to obtain the payload at all is an
/// error, and that is the scrape client's concern.
pub fn parse_payload(text: &str) -> Vec<RawSample> {
    let mut samples = Vec::new();
    let mut skipped: u32 = 0;
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match parse_line(line) {
            Some(sample) => samples.push(sample),
            None => skipped += 1,
        }
    }
    if skipped > 0 {
        tracing::debug!(skipped, "exposition payload had malformed lines");
    }
    samples
}

/// Parse one non-comment line. Returns `None` on any malformation.
pub fn parse_line(line: &str) -> Option<RawSample> {
    let (name_part, labels, rest) = match line.find('{') {
        Some(open) => {
            let close = find_label_close(line, open + 1)?;
            let labels = parse_labels(&line[open + 1..close])?;
            (&line[..open], labels, &line[close + 1..])
        }
        None => {
            let mut it = line.splitn(2, char::is_whitespace);
            let name = it.next()?;
            (name, BTreeMap::new(), it.next().unwrap_or(""))
        }
    };

    if !valid_metric_name(name_part) {
        return None;
    }

    let mut parts = rest.split_whitespace();
    let value: f64 = parts.next()?.parse().ok()?;
    let timestamp = match parts.next() {
        Some(ts) => Some(ts.parse::<i64>().ok()?),
        None => None,
    };
    if parts.next().is_some() {
        return None;
    }

    Some(RawSample {
        name: name_part.to_string(),
        value,
        labels,
        timestamp,
    })
}

/// Index of the closing `}`, honoring quotes and backslash escapes inside
/// label values.
fn find_label_close(line: &str, from: usize) -> Option<usize> {
    let bytes = line.as_bytes();
    let mut in_quotes = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(from) {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_quotes => escaped = true,
            b'"' => in_quotes = !in_quotes,
            b'}' if !in_quotes => return Some(i),
            _ => {}
        }
    }
    None
}

/// Parse `key="value",key="value"`. Duplicate keys: last wins.
fn parse_labels(s: &str) -> Option<BTreeMap<String, String>> {
    let mut labels = BTreeMap::new();
    let s = s.trim();
    if s.is_empty() {
        return Some(labels);
    }

    let mut chars = s.char_indices().peekable();
    loop {
        // key
        let start = chars.peek()?.0;
        let mut eq = None;
        for (i, c) in chars.by_ref() {
            if c == '=' {
                eq = Some(i);
                break;
            }
        }
        let key = s[start..eq?].trim();
        if key.is_empty() {
            return None;
        }

        // opening quote
        if chars.next().map(|(_, c)| c)? != '"' {
            return None;
        }

        // value with escapes
        let mut value = String::new();
        let mut closed = false;
        while let Some((_, c)) = chars.next() {
            match c {
                '\\' => match chars.next().map(|(_, c)| c) {
                    Some('n') => value.push('\n'),
                    Some('\\') => value.push('\\'),
                    Some('"') => value.push('"'),
                    _ => return None,
                },
                '"' => {
                    closed = true;
                    break;
                }
                _ => value.push(c),
            }
        }
        if !closed {
            return None;
        }
        labels.insert(key.to_string(), value);

        match chars.next().map(|(_, c)| c) {
            None => return Some(labels),
            Some(',') => {
                // trailing comma before end is malformed
                chars.peek()?;
            }
            Some(_) => return None,
        }
    }
}

fn valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !(first.is_ascii_alphabetic() || first == '_' || first == ':') {
        return false;
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_metric() {
        let s = parse_line("soketi_connected 42").unwrap();
        assert_eq!(s.name, "soketi_connected");
        assert_eq!(s.value, 42.0);
        assert!(s.labels.is_empty());
        assert!(s.timestamp.is_none());
    }

    #[test]
    fn parses_labels_and_timestamp() {
        let s = parse_line(r#"soketi_new_connections_total{port="6001",app="demo"} 137 1722860000000"#)
            .unwrap();
        assert_eq!(s.labels.get("port").map(String::as_str), Some("6001"));
        assert_eq!(s.labels.get("app").map(String::as_str), Some("demo"));
        assert_eq!(s.timestamp, Some(1722860000000));
    }

    #[test]
    fn duplicate_label_keys_last_wins() {
        let s = parse_line(r#"m{a="1",a="2"} 5"#).unwrap();
        assert_eq!(s.labels.get("a").map(String::as_str), Some("2"));
        assert_eq!(s.labels.len(), 1);
    }

    #[test]
    fn escaped_quotes_and_braces_in_values() {
        let s = parse_line(r#"m{msg="say \"hi\"",path="a\\b",brace="x}y"} 1"#).unwrap();
        assert_eq!(s.labels.get("msg").map(String::as_str), Some(r#"say "hi""#));
        assert_eq!(s.labels.get("path").map(String::as_str), Some(r"a\b"));
        assert_eq!(s.labels.get("brace").map(String::as_str), Some("x}y"));
    }

    #[test]
    fn malformed_lines_return_none() {
        for line in [
            "no_value",
            "1leading_digit 3",
            "m{unclosed=\"x\" 3",
            "m{key=} 3",
            "m{key=\"v\"} not_a_number",
            "m 1 2 3",
            "m{a=\"1\",} 2",
        ] {
            assert!(parse_line(line).is_none(), "should reject: {line}");
        }
    }

    #[test]
    fn payload_skips_comments_blanks_and_garbage() {
        let payload = "\
# HELP soketi_connected Current connections\n\
# TYPE soketi_connected gauge\n\
soketi_connected 42\n\
\n\
garbage line here\n\
soketi_new_connections_total{port=\"6001\"} 100\n";
        let samples = parse_payload(payload);
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].name, "soketi_connected");
        assert_eq!(samples[1].key(), r#"soketi_new_connections_total{port="6001"}"#);
    }

    #[test]
    fn reserialization_is_lossless() {
        for line in [
            "soketi_connected 42",
            r#"soketi_new_connections_total{port="6001"} 100"#,
            r#"m{a="1",b="two"} 3.5 1722860000000"#,
            r#"m{msg="say \"hi\""} 1"#,
        ] {
            let sample = parse_line(line).unwrap();
            let reparsed = parse_line(&sample.to_line()).unwrap();
            assert_eq!(sample, reparsed, "round trip changed: {line}");
        }
    }

    #[test]
    fn empty_label_set_parses() {
        let s = parse_line("m{} 1").unwrap();
        assert!(s.labels.is_empty());
        assert_eq!(s.key(), "m");
    }
}
