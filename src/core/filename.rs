use regex::Regex;
use std::sync::LazyLock;
use unicode_normalization::UnicodeNormalization;

static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

const MAX_COMPONENT_LEN: usize = 120;

/// Makes an archive entry or URL fragment safe to use as a single file name.
pub fn sanitize_path_component(name: &str) -> String {
    let name: String = name.nfc().collect();
    let name = name.trim().replace(['\t', '\n', '\r'], "");
    let name = WS_RE.replace_all(&name, "_");

    let mut result: String = name
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let trimmed_len = result.trim_end_matches([' ', '.', ';']).len();
    result.truncate(trimmed_len);
    let result = result.trim_start_matches('.');

    if result.chars().count() > MAX_COMPONENT_LEN {
        return result.chars().take(MAX_COMPONENT_LEN).collect();
    }
    result.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_basic_forbidden_chars() {
        assert_eq!(sanitize_path_component("a:b?c"), "a_b_c");
    }

    #[test]
    fn sanitize_collapses_whitespace() {
        assert_eq!(sanitize_path_component("media   main.jpg"), "media_main.jpg");
    }

    #[test]
    fn sanitize_strips_traversal() {
        let result = sanitize_path_component("../../etc/passwd");
        assert!(!result.contains('/'));
        assert!(!result.starts_with('.'));
    }

    #[test]
    fn sanitize_unicode_nfc_normalization() {
        assert_eq!(sanitize_path_component("e\u{0301}.png"), "\u{00e9}.png");
    }

    #[test]
    fn sanitize_trims_trailing_dots() {
        assert_eq!(sanitize_path_component("overlay.png.. "), "overlay.png");
    }

    #[test]
    fn sanitize_caps_length() {
        let long = "a".repeat(400);
        assert_eq!(sanitize_path_component(&long).len(), MAX_COMPONENT_LEN);
    }
}
