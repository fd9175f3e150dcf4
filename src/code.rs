//! Standard-code recognition.
//!
//! Curriculum learning objectives are identified by codes of the shape
//! `<subject><grade><strand><objective>`, e.g. `S8A5`. Over the years the
//! same code has been published both compact (`S8A5`, `S08A05`) and
//! hyphenated (`S8-A5`, `S-08-A-05`). Every surface form normalizes to the
//! compact, upper-case, zero-stripped canonical form.
//!
//! ```rust
//! use curriculum_grounding::code::extract_code;
//!
//! assert_eq!(extract_code("Explain slo s-08-a-05").as_deref(), Some("S8A5"));
//! assert_eq!(extract_code("density formula"), None);
//! ```

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static CODE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b([a-z])-?(\d{1,2})-?([a-z])-?(\d{1,3})\b").expect("standard code regex")
});

/// Return the first standard code in `text`, canonicalized.
///
/// When a query names several codes, the one appearing first wins.
pub fn extract_code(text: &str) -> Option<String> {
    CODE_RE.captures_iter(text).find_map(|caps| canonicalize(&caps))
}

/// Every distinct canonical code in `text`, in order of first appearance.
pub fn find_codes(text: &str) -> Vec<String> {
    let mut codes: Vec<String> = Vec::new();
    for caps in CODE_RE.captures_iter(text) {
        if let Some(code) = canonicalize(&caps) {
            if !codes.contains(&code) {
                codes.push(code);
            }
        }
    }
    codes
}

/// Whether `text` mentions `code` in any of its surface forms.
pub fn mentions_code(text: &str, code: &str) -> bool {
    find_code_span(text, code).is_some()
}

/// Byte range of the first surface form of `code` in `text`.
pub fn find_code_span(text: &str, code: &str) -> Option<(usize, usize)> {
    CODE_RE.captures_iter(text).find_map(|caps| {
        let whole = caps.get(0)?;
        (canonicalize(&caps)? == code).then(|| (whole.start(), whole.end()))
    })
}

fn canonicalize(caps: &Captures<'_>) -> Option<String> {
    let subject = caps.get(1)?.as_str().to_ascii_uppercase();
    let grade: u32 = caps.get(2)?.as_str().parse().ok()?;
    let strand = caps.get(3)?.as_str().to_ascii_uppercase();
    let objective: u32 = caps.get(4)?.as_str().parse().ok()?;
    Some(format!("{}{}{}{}", subject, grade, strand, objective))
}
