//! Helpers for human-readable paths (titles joined by `/`).

/// Title given to documents that have none, and to synthesized ancestors.
pub const UNTITLED: &str = "Untitled";

fn is_invisible(c: char) -> bool {
    matches!(
        c,
        '\u{200b}' | '\u{200c}' | '\u{200d}' | '\u{2060}' | '\u{feff}' | '\u{180e}'
    ) || (c.is_control() && c != '\n' && c != '\t')
}

/// Strip zero-width and control characters from an hpath so that titles
/// typed with stray invisible characters still match.
pub fn normalize_hpath(hpath: &str) -> String {
    hpath.chars().filter(|c| !is_invisible(*c)).collect()
}

/// Decode the HTML entities that titles are stored with.
pub fn unescape_html(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos..];
        let decoded = [
            ("&amp;", '&'),
            ("&lt;", '<'),
            ("&gt;", '>'),
            ("&quot;", '"'),
            ("&#39;", '\''),
            ("&apos;", '\''),
        ]
        .iter()
        .find(|(entity, _)| rest.starts_with(entity));
        match decoded {
            Some((entity, c)) => {
                out.push(*c);
                rest = &rest[entity.len()..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}
