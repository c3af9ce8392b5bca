//! Selector families for review extraction
//!
//! Selector sets are pure data. Ordering decisions (which family goes
//! first, what the live page confirms) belong to the resolver.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use super::language::Language;

/// Fields the extractor locates on a page
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SelectorField {
    ReviewsTab,
    ReviewContainer,
    AuthorName,
    Rating,
    ReviewText,
    Date,
}

impl SelectorField {
    pub const ALL: [Self; 6] = [
        Self::ReviewsTab,
        Self::ReviewContainer,
        Self::AuthorName,
        Self::Rating,
        Self::ReviewText,
        Self::Date,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ReviewsTab => "reviews_tab",
            Self::ReviewContainer => "review_container",
            Self::AuthorName => "author_name",
            Self::Rating => "rating",
            Self::ReviewText => "review_text",
            Self::Date => "date",
        }
    }
}

impl fmt::Display for SelectorField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered candidate locators per field
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorSet {
    pub reviews_tab: Vec<String>,
    pub review_container: Vec<String>,
    pub author_name: Vec<String>,
    pub rating: Vec<String>,
    pub review_text: Vec<String>,
    pub date: Vec<String>,
}

impl SelectorSet {
    pub fn field(&self, field: SelectorField) -> &[String] {
        match field {
            SelectorField::ReviewsTab => &self.reviews_tab,
            SelectorField::ReviewContainer => &self.review_container,
            SelectorField::AuthorName => &self.author_name,
            SelectorField::Rating => &self.rating,
            SelectorField::ReviewText => &self.review_text,
            SelectorField::Date => &self.date,
        }
    }

    pub fn field_mut(&mut self, field: SelectorField) -> &mut Vec<String> {
        match field {
            SelectorField::ReviewsTab => &mut self.reviews_tab,
            SelectorField::ReviewContainer => &mut self.review_container,
            SelectorField::AuthorName => &mut self.author_name,
            SelectorField::Rating => &mut self.rating,
            SelectorField::ReviewText => &mut self.review_text,
            SelectorField::Date => &mut self.date,
        }
    }

    /// Append `fallback` after `primary`, dropping repeats but keeping first occurrences
    pub fn compose(primary: &Self, fallback: &Self) -> Self {
        let mut composed = Self::default();
        for field in SelectorField::ALL {
            let merged = primary
                .field(field)
                .iter()
                .chain(fallback.field(field))
                .cloned()
                .collect();
            *composed.field_mut(field) = dedup_preserving_order(merged);
        }
        composed
    }

    pub fn is_empty(&self) -> bool {
        SelectorField::ALL
            .iter()
            .all(|field| self.field(*field).is_empty())
    }

    /// Language-neutral family (structural classes and schema.org microdata)
    pub fn generic() -> Self {
        Self {
            reviews_tab: strings(&[
                "button[role='tab'][data-tab-index='1']",
                "button[jsaction*='reviews']",
                "a[href*='reviews']",
                "[role='tab']",
            ]),
            review_container: strings(&[
                "div.jftiEf[data-review-id]",
                "div[data-review-id]",
                "[itemprop='review']",
                "article.review",
                ".review",
            ]),
            author_name: strings(&[
                "div.d4r55",
                "[itemprop='author']",
                ".review-author",
                ".author",
            ]),
            rating: strings(&[
                "span.kvMYJc[role='img']",
                "span[role='img'][aria-label]",
                "[itemprop='ratingValue']",
                ".review-rating",
            ]),
            review_text: strings(&[
                "span.wiI7pd",
                "[itemprop='reviewBody']",
                ".review-text",
                ".review-body",
            ]),
            date: strings(&[
                "span.rsqaWe",
                "[itemprop='datePublished']",
                ".review-date",
                "time",
            ]),
        }
    }

    /// Family keyed on the localized labels of one interface language
    pub fn for_language(language: Language) -> Self {
        let profile = language.profile();
        let dir = if language.is_rtl() { "rtl" } else { "ltr" };

        let reviews_tab = profile
            .reviews_tab_labels
            .iter()
            .flat_map(|label| {
                [
                    format!("button[role='tab'][aria-label*='{label}']"),
                    format!("button[aria-label*='{label}']"),
                ]
            })
            .collect();

        let rating = profile
            .star_words
            .iter()
            .flat_map(|word| {
                [
                    format!("span.kvMYJc[aria-label*='{word}']"),
                    format!("span[role='img'][aria-label*='{word}']"),
                ]
            })
            .collect();

        Self {
            reviews_tab,
            review_container: vec![
                format!("div[data-review-id][lang='{}']", language.code()),
                format!("div[dir='{dir}'][data-review-id]"),
                "div.jftiEf[data-review-id]".to_string(),
            ],
            author_name: vec![
                format!("div.d4r55[dir='{dir}']"),
                "div.d4r55".to_string(),
            ],
            rating,
            review_text: vec![
                format!("span.wiI7pd[dir='{dir}']"),
                format!("span.wiI7pd[lang='{}']", language.code()),
                "span.wiI7pd".to_string(),
            ],
            date: vec![
                format!("span.rsqaWe[dir='{dir}']"),
                "span.rsqaWe".to_string(),
            ],
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

/// Drop repeated entries, keeping the first occurrence
pub fn dedup_preserving_order(items: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

/// Heuristic weight of a CSS selector.
///
/// attribute 3, id 3, class 2, pseudo-class 1, combinator 1. Content of
/// attribute brackets, pseudo-class arguments and quoted strings is ignored.
pub fn specificity(selector: &str) -> u32 {
    let mut score = 0;
    let mut bracket_depth = 0usize;
    let mut paren_depth = 0usize;
    let mut quote: Option<char> = None;
    let mut seen_compound = false;
    let mut pending_combinator = false;
    let mut prev = '\0';

    for c in selector.trim().chars() {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            prev = c;
            continue;
        }
        if bracket_depth > 0 || paren_depth > 0 {
            match c {
                '\'' | '"' => quote = Some(c),
                '[' => bracket_depth += 1,
                ']' => bracket_depth = bracket_depth.saturating_sub(1),
                '(' => paren_depth += 1,
                ')' => paren_depth = paren_depth.saturating_sub(1),
                _ => {}
            }
            prev = c;
            continue;
        }

        if c.is_whitespace() || matches!(c, '>' | '+' | '~') {
            if seen_compound {
                pending_combinator = true;
            }
            prev = c;
            continue;
        }

        if pending_combinator {
            score += 1;
            pending_combinator = false;
        }
        seen_compound = true;

        match c {
            '[' => {
                score += 3;
                bracket_depth = 1;
            }
            '#' => score += 3,
            '.' => score += 2,
            // `::before` counts once
            ':' if prev != ':' => score += 1,
            '(' => paren_depth = 1,
            _ => {}
        }
        prev = c;
    }

    score
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_appends_and_dedups() {
        let primary = SelectorSet {
            rating: vec!["a".into(), "b".into()],
            ..SelectorSet::default()
        };
        let fallback = SelectorSet {
            rating: vec!["b".into(), "c".into(), "a".into()],
            date: vec!["d".into()],
            ..SelectorSet::default()
        };

        let composed = SelectorSet::compose(&primary, &fallback);
        assert_eq!(composed.rating, vec!["a", "b", "c"]);
        assert_eq!(composed.date, vec!["d"]);
    }

    #[test]
    fn test_specificity_weights() {
        assert_eq!(specificity("div"), 0);
        assert_eq!(specificity("div.review"), 2);
        assert_eq!(specificity("div[data-review-id]"), 3);
        assert_eq!(specificity("#main .review"), 6);
        assert_eq!(specificity("ul > li"), 1);
        assert_eq!(specificity("a:hover"), 1);
        assert_eq!(specificity("p::before"), 1);
    }

    #[test]
    fn test_specificity_ignores_bracket_and_argument_content() {
        assert_eq!(specificity("a[href*='x.y #z']"), 3);
        assert_eq!(specificity("span:not(.a.b)"), 1);
        assert_eq!(specificity("[aria-label*='Sort reviews']"), 3);
    }

    #[test]
    fn test_language_family_uses_localized_labels() {
        let hebrew = SelectorSet::for_language(Language::Hebrew);
        assert!(hebrew.reviews_tab.iter().any(|s| s.contains("ביקורות")));
        assert!(hebrew.review_text.iter().any(|s| s.contains("dir='rtl'")));
        assert!(!SelectorSet::generic().is_empty());
    }
}
