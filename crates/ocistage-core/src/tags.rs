use chrono::NaiveDate;

/// Baseline tag created on first init.
pub const EMPTY_TAG: &str = "empty";

/// Splits store listing output into tag names, one per non-blank line.
pub fn parse_tag_list(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(ToString::to_string)
        .collect()
}

pub fn contains_tag<S: AsRef<str>>(tags: &[S], name: &str) -> bool {
    tags.iter().any(|tag| tag.as_ref() == name)
}

/// `<prefix>-<YYYY-MM-DD>_`, the shared head of every version tag cut on `date`.
pub fn version_tag_prefix(prefix: &str, date: NaiveDate) -> String {
    format!("{prefix}-{}_", date.format("%Y-%m-%d"))
}

/// Returns the next unused dated version tag for `prefix` on `date`.
///
/// Existing tags sharing the dated prefix contribute their numeric suffix;
/// suffixes that are not non-negative integers are ignored. The result is one
/// past the largest suffix seen, or `_1` when none match. Suffixes are compared
/// and incremented as decimal digit strings, so no suffix is too large.
pub fn next_version_tag<S: AsRef<str>>(tags: &[S], prefix: &str, date: NaiveDate) -> String {
    let head = version_tag_prefix(prefix, date);
    let highest = tags
        .iter()
        .filter_map(|tag| tag.as_ref().strip_prefix(head.as_str()))
        .filter_map(parse_version_suffix)
        .max_by(|left, right| left.len().cmp(&right.len()).then_with(|| left.cmp(right)));
    let next = highest.map_or_else(|| "1".to_string(), increment_decimal);
    format!("{head}{next}")
}

/// Digits of a version suffix with leading zeros removed.
fn parse_version_suffix(suffix: &str) -> Option<&str> {
    if suffix.is_empty() || !suffix.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    let trimmed = suffix.trim_start_matches('0');
    Some(if trimmed.is_empty() { "0" } else { trimmed })
}

fn increment_decimal(digits: &str) -> String {
    let mut out = digits.as_bytes().to_vec();
    for byte in out.iter_mut().rev() {
        if *byte == b'9' {
            *byte = b'0';
        } else {
            *byte += 1;
            return out.iter().map(|&byte| char::from(byte)).collect();
        }
    }
    std::iter::once('1')
        .chain(out.iter().map(|&byte| char::from(byte)))
        .collect()
}
