//! Keyword normalization.
//!
//! The same rule must be applied to dataset keywords and to query text,
//! otherwise similarity scores and exact lookups stop lining up.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Normalization {
    /// Collapse whitespace, trim, lowercase.
    Whitespace,
    /// Drop a leading `scheme://`, strip ASCII punctuation except `.` and
    /// `-`, then collapse whitespace, trim and lowercase.
    StripPunctuation,
}

impl Normalization {
    pub fn apply(&self, text: &str) -> String {
        match self {
            Normalization::Whitespace => collapse_whitespace(text).to_lowercase(),
            Normalization::StripPunctuation => {
                let text = match text.split_once("://") {
                    Some((_, rest)) => rest,
                    None => text,
                };
                let stripped: String = text
                    .chars()
                    .filter(|c| !c.is_ascii_punctuation() || *c == '.' || *c == '-')
                    .collect();
                collapse_whitespace(&stripped).to_lowercase()
            }
        }
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whitespace_rule() {
        let rule = Normalization::Whitespace;
        assert_eq!(rule.apply("  Cheap   Flights\tBangkok \n"), "cheap flights bangkok");
        assert_eq!(rule.apply("Rust-Lang, Book!"), "rust-lang, book!");
        assert_eq!(rule.apply("   "), "");
    }

    #[test]
    fn test_strip_punctuation_rule() {
        let rule = Normalization::StripPunctuation;
        assert_eq!(rule.apply("https://Example.com/Path"), "example.compath");
        assert_eq!(rule.apply("Best (SEO) tools, 2024!"), "best seo tools 2024");
        assert_eq!(rule.apply("self-hosted  v1.2"), "self-hosted v1.2");
        assert_eq!(rule.apply("?!"), "");
    }

    #[test]
    fn test_non_ascii_text_is_kept() {
        assert_eq!(
            Normalization::StripPunctuation.apply("โอซาก้า  ที่เที่ยว"),
            "โอซาก้า ที่เที่ยว"
        );
        assert_eq!(
            Normalization::Whitespace.apply("แจ้งความออนไลน์ "),
            "แจ้งความออนไลน์"
        );
    }
}
