//! Heuristic extraction of the bid deadline and correlation id.
//!
//! Bid request bodies are untrusted and unbounded in size, so they are never
//! parsed as JSON. Instead a bounded prefix is scanned for the first
//! `"tmax": <digits>` and `"id": "<text>"` pairs. Anything that does not
//! match falls back to defaults: a malformed body still gets an answer.

/// Maximum number of body bytes retained and inspected per request.
pub const MAX_SNIFF_PREFIX: usize = 8192;

/// Upper bound of a sniffed deadline (one day), larger values are capped.
pub const MAX_TMAX_MS: u64 = 24 * 60 * 60 * 1000;

const TMAX_KEY: &[u8] = b"\"tmax\"";
const ID_KEY: &[u8] = b"\"id\"";

#[derive(Debug, Clone, PartialEq, Eq)]
/// What could be learned about a bid request from its body prefix.
pub struct BidRequestHint {
    /// Correlation id, empty if none was found.
    pub id: String,
    /// Soft deadline in milliseconds, within `1 ..= MAX_TMAX_MS`.
    pub tmax: u64,
}

/// Sniff the [`BidRequestHint`] from a body prefix.
///
/// At most [`MAX_SNIFF_PREFIX`] bytes of `prefix` are looked at.
pub fn sniff_bid_request(prefix: &[u8], fallback_tmax: u64) -> BidRequestHint {
    let prefix = &prefix[..prefix.len().min(MAX_SNIFF_PREFIX)];

    let tmax = find_value(prefix, TMAX_KEY, scan_digits)
        .and_then(|digits| std::str::from_utf8(digits).ok()?.parse::<u64>().ok())
        .filter(|tmax| *tmax > 0)
        .unwrap_or(fallback_tmax)
        .clamp(1, MAX_TMAX_MS);

    let id = find_value(prefix, ID_KEY, scan_quoted)
        .map(|raw| String::from_utf8_lossy(raw).into_owned())
        .unwrap_or_default();

    BidRequestHint { id, tmax }
}

/// Find the first occurrence of `key` followed by a `:` separator
/// and a value accepted by `scan_value`.
///
/// Occurrences which do not match that shape are skipped.
fn find_value<'a>(
    haystack: &'a [u8],
    key: &[u8],
    scan_value: impl Fn(&'a [u8]) -> Option<&'a [u8]>,
) -> Option<&'a [u8]> {
    let mut offset = 0;
    while let Some(pos) = find_subslice(&haystack[offset..], key) {
        let after_key = offset + pos + key.len();
        if let Some(value) = skip_separator(&haystack[after_key..]).and_then(&scan_value) {
            return Some(value);
        }
        offset = after_key;
    }
    None
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Skip `\s* : \s*`, returning what follows.
fn skip_separator(input: &[u8]) -> Option<&[u8]> {
    let input = input.trim_ascii_start();
    let input = input.strip_prefix(b":")?;
    Some(input.trim_ascii_start())
}

fn scan_digits(input: &[u8]) -> Option<&[u8]> {
    let len = input.iter().take_while(|b| b.is_ascii_digit()).count();
    (len > 0).then(|| &input[..len])
}

/// A `"`-quoted value without escape handling.
/// An unterminated quote (e.g. cut off by the prefix bound) is no match.
fn scan_quoted(input: &[u8]) -> Option<&[u8]> {
    let input = input.strip_prefix(b"\"")?;
    let end = input.iter().position(|b| *b == b'"')?;
    Some(&input[..end])
}
