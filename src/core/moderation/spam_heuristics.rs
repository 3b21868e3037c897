// Pure spam heuristics for submitted text.
//
// - URL density (links that do not point back at our own site)
// - Banned word matching (whole words, case-insensitive)
// - Character-set mismatch against the locale's legacy charset
//
// No I/O and no state: every function gives the same answer for the same input.

use encoding_rs::{EncoderResult, Encoding};
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Three or more foreign links make a post spammy.
pub const URL_DENSITY_THRESHOLD: usize = 3;

/// Path of the editor's draft attachment endpoint under the site root.
const DRAFT_FILE_PATH: &str = "/draftfile.php";

static URL_SCHEME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(http://|https://|ftp://)").unwrap());

static PROFILE_SPAM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)<img|fuck|casino|porn|xxx|cialis|viagra|poker|warcraft|ejaculation|pharmaceuticals|locksmith|ugg boots",
    )
    .unwrap()
});

fn remove_ignoring_case(text: &str, needle: &str) -> String {
    if needle.is_empty() {
        return text.to_string();
    }
    match Regex::new(&format!("(?i){}", regex::escape(needle))) {
        Ok(pattern) => pattern.replace_all(text, "").into_owned(),
        Err(_) => text.to_string(),
    }
}

/// Count links left after removing our own site's URLs.
pub fn foreign_url_count(text: &str, own_site_urls: &[String]) -> usize {
    let mut roots: Vec<&str> = own_site_urls
        .iter()
        .map(|url| url.trim().trim_end_matches('/'))
        .filter(|url| !url.is_empty())
        .collect();
    // Longer roots first so a prefix root never leaves half of a longer one behind.
    roots.sort_by_key(|root| std::cmp::Reverse(root.len()));

    let mut stripped = text.to_string();
    for root in &roots {
        stripped = remove_ignoring_case(&stripped, &format!("{}{}", root, DRAFT_FILE_PATH));
    }
    for root in &roots {
        stripped = remove_ignoring_case(&stripped, root);
    }

    URL_SCHEME.find_iter(&stripped).count()
}

pub fn is_url_dense(text: &str, own_site_urls: &[String]) -> bool {
    foreign_url_count(text, own_site_urls) >= URL_DENSITY_THRESHOLD
}

/// Build a whole-word, case-insensitive alternation from a comma separated list.
/// Returns `None` when the list holds no words.
pub fn banned_word_pattern(word_list: &str) -> Option<Regex> {
    let words: Vec<String> = word_list
        .split(',')
        .map(str::trim)
        .filter(|word| !word.is_empty())
        .map(regex::escape)
        .collect();

    if words.is_empty() {
        return None;
    }

    Regex::new(&format!(r"(?i)\b(?:{})\b", words.join("|"))).ok()
}

pub fn matches_banned_words(text: &str, word_list: &str) -> bool {
    banned_word_pattern(word_list).is_some_and(|pattern| pattern.is_match(text))
}

/// Profile descriptions that look like link farms or ads.
pub fn looks_like_profile_spam(description: &str) -> bool {
    PROFILE_SPAM.is_match(description)
}

/// Legacy charset used by sites in the given locale, if we know one.
///
/// `overrides` maps locale codes to encoding labels and wins over the builtin table.
pub fn legacy_charset_for(
    locale: &str,
    overrides: &HashMap<String, String>,
) -> Option<&'static Encoding> {
    let locale = locale.trim().to_ascii_lowercase().replace('-', "_");
    if let Some(label) = overrides.get(&locale) {
        return Encoding::for_label(label.as_bytes());
    }

    let language = locale.split('_').next().unwrap_or_default();
    let label = match (locale.as_str(), language) {
        ("zh_cn", _) => "gbk",
        ("zh_tw", _) => "big5",
        (_, "en" | "es" | "fr" | "de" | "it" | "pt" | "nl" | "ca" | "da" | "sv" | "no" | "fi") => {
            "windows-1252"
        }
        (_, "ru" | "uk" | "bg" | "sr" | "mk" | "be") => "windows-1251",
        (_, "pl" | "cs" | "sk" | "hu" | "hr" | "ro" | "sl") => "windows-1250",
        (_, "el") => "windows-1253",
        (_, "tr") => "windows-1254",
        (_, "he") => "windows-1255",
        (_, "ar" | "fa") => "windows-1256",
        (_, "lt" | "lv" | "et") => "windows-1257",
        (_, "vi") => "windows-1258",
        (_, "th") => "windows-874",
        (_, "ko") => "euc-kr",
        (_, "ja") => "shift_jis",
        _ => return None,
    };
    Encoding::for_label(label.as_bytes())
}

/// Encode into `encoding`, writing `?` for every unmappable character, then decode back.
fn round_trip(text: &str, encoding: &'static Encoding) -> String {
    let mut encoder = encoding.new_encoder();
    let mut bytes = Vec::with_capacity(text.len());
    let mut buffer = [0u8; 1024];
    let mut remaining = text;

    loop {
        let (result, read, written) =
            encoder.encode_from_utf8_without_replacement(remaining, &mut buffer, true);
        bytes.extend_from_slice(&buffer[..written]);
        remaining = &remaining[read..];
        match result {
            EncoderResult::InputEmpty => break,
            EncoderResult::OutputFull => continue,
            EncoderResult::Unmappable(_) => bytes.push(b'?'),
        }
    }

    let (decoded, _) = encoding.decode_without_bom_handling(&bytes);
    decoded.into_owned()
}

/// Percentage (0-100, rounded) of characters lost when the text is forced
/// through `encoding`. Whitespace and existing `?` are ignored. Empty text is 0.
pub fn character_set_mismatch_percent(text: &str, encoding: &'static Encoding) -> u32 {
    let stripped: String = text
        .chars()
        .filter(|c| *c != '?' && !c.is_whitespace())
        .collect();
    let length = stripped.chars().count();
    if length == 0 {
        return 0;
    }

    let lost = round_trip(&stripped, encoding)
        .chars()
        .filter(|c| *c == '?')
        .count();

    ((lost as f64 / length as f64) * 100.0).round() as u32
}

/// URL density and banned words, compiled once per settings snapshot.
#[derive(Debug, Clone)]
pub struct SpamHeuristics {
    site_urls: Vec<String>,
    banned_words: Option<Regex>,
}

impl SpamHeuristics {
    pub fn new(site_urls: Vec<String>, banned_words: Option<&str>) -> Self {
        Self {
            site_urls,
            banned_words: banned_words.and_then(banned_word_pattern),
        }
    }

    /// True if either heuristic fires.
    pub fn is_spammy(&self, text: &str) -> bool {
        if is_url_dense(text, &self.site_urls) {
            return true;
        }
        self.banned_words
            .as_ref()
            .is_some_and(|pattern| pattern.is_match(text))
    }
}
