//! Content policy for stage outputs.
//!
//! A stage may only cite sources it was actually given. Any URL in an output
//! that appears in neither the document text nor a capability result from
//! this or an earlier stage is untraceable and gets replaced before the
//! output is recorded. The synthesized report is held to the same rule, with
//! the stage outputs counting as sources too.

use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

pub const REMOVED_SOURCE: &str = "[unverified source removed]";

static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s<>()\[\]"'`|]+"#).expect("valid regex"));

/// Every URL in `text`, with trailing sentence punctuation dropped.
pub fn find_urls(text: &str) -> Vec<&str> {
    URL_RE
        .find_iter(text)
        .map(|m| m.as_str().trim_end_matches(['.', ',', ';', ':', '!', '?']))
        .filter(|u| !u.is_empty())
        .collect()
}

fn normalize(url: &str) -> &str {
    url.trim_end_matches('/')
}

/// URLs in `output` that no source mentions, in order of first appearance.
/// A URL is traceable only if the same whole URL occurs in a source; a
/// prefix of a longer source URL does not count.
pub fn untraceable_urls<'a>(output: &'a str, sources: &[&str]) -> Vec<&'a str> {
    let known: HashSet<&str> = sources
        .iter()
        .flat_map(|s| find_urls(s))
        .map(normalize)
        .collect();

    let mut found: Vec<&str> = Vec::new();
    for url in find_urls(output) {
        if !known.contains(normalize(url)) && !found.contains(&url) {
            found.push(url);
        }
    }
    found
}

/// Result of [`enforce`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyOutcome {
    pub text: String,
    pub removed: usize,
}

/// Replaces each untraceable URL in `output` with [`REMOVED_SOURCE`].
pub fn enforce(output: &str, sources: &[&str]) -> PolicyOutcome {
    let bad = untraceable_urls(output, sources);
    if bad.is_empty() {
        return PolicyOutcome {
            text: output.to_string(),
            removed: 0,
        };
    }

    let mut removed = 0;
    let text = URL_RE
        .replace_all(output, |caps: &regex::Captures| {
            let raw = &caps[0];
            let url = raw.trim_end_matches(['.', ',', ';', ':', '!', '?']);
            if bad.contains(&url) {
                removed += 1;
                format!("{}{}", REMOVED_SOURCE, &raw[url.len()..])
            } else {
                raw.to_string()
            }
        })
        .into_owned();

    PolicyOutcome { text, removed }
}
