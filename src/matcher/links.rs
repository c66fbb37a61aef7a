use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

static LINK_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([^\]]+)\]\(([^)]+)\)").expect("link pattern compiles"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Link {
    pub title: String,
    pub url: String,
}

/// Extract every `[title](url)` fragment, in input order. Other text is
/// ignored.
pub fn extract_links(text: &str) -> Vec<Link> {
    LINK_REGEX
        .captures_iter(text)
        .map(|caps| Link {
            title: caps[1].to_string(),
            url: caps[2].to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_links_in_order() {
        let links = extract_links("See [Guide](https://x/y) and [Home](https://x/)");
        assert_eq!(
            links,
            vec![
                Link {
                    title: "Guide".into(),
                    url: "https://x/y".into()
                },
                Link {
                    title: "Home".into(),
                    url: "https://x/".into()
                },
            ]
        );
    }

    #[test]
    fn test_plain_text_has_no_links() {
        assert!(extract_links("internal: https://x/y").is_empty());
        assert!(extract_links("").is_empty());
        assert!(extract_links("[](https://x) [title]()").is_empty());
    }

    #[test]
    fn test_adjacent_and_unicode_titles() {
        let links = extract_links("[ที่เที่ยว](https://t/1)[B](https://t/2)");
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].title, "ที่เที่ยว");
        assert_eq!(links[1].url, "https://t/2");
    }
}
