//! Interface language model and per-language vocabulary
//!
//! All the linguistic knowledge used by detection, selector resolution,
//! sort navigation and date parsing is kept in one static table so that
//! adding a language means adding one `LanguageProfile`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::review::SortOrder;

/// Interface languages the engine knows vocabulary for
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    English,
    Hebrew,
    Arabic,
    Spanish,
    French,
    German,
    Russian,
}

impl Language {
    /// Detection order; ties resolve to the earlier entry
    pub const ALL: [Self; 7] = [
        Self::English,
        Self::Hebrew,
        Self::Arabic,
        Self::Spanish,
        Self::French,
        Self::German,
        Self::Russian,
    ];

    /// Language used when detection fails
    pub const FALLBACK: Self = Self::English;

    pub const fn code(self) -> &'static str {
        match self {
            Self::English => "en",
            Self::Hebrew => "he",
            Self::Arabic => "ar",
            Self::Spanish => "es",
            Self::French => "fr",
            Self::German => "de",
            Self::Russian => "ru",
        }
    }

    /// Parse a BCP-47 style tag (`he-IL`, `en_US`, legacy `iw`)
    pub fn from_tag(tag: &str) -> Option<Self> {
        let primary = tag
            .trim()
            .split(['-', '_'])
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        match primary.as_str() {
            "en" => Some(Self::English),
            "he" | "iw" => Some(Self::Hebrew),
            "ar" => Some(Self::Arabic),
            "es" => Some(Self::Spanish),
            "fr" => Some(Self::French),
            "de" => Some(Self::German),
            "ru" => Some(Self::Russian),
            _ => None,
        }
    }

    pub const fn is_rtl(self) -> bool {
        matches!(self, Self::Hebrew | Self::Arabic)
    }

    pub fn profile(self) -> &'static LanguageProfile {
        match self {
            Self::English => &ENGLISH,
            Self::Hebrew => &HEBREW,
            Self::Arabic => &ARABIC,
            Self::Spanish => &SPANISH,
            Self::French => &FRENCH,
            Self::German => &GERMAN,
            Self::Russian => &RUSSIAN,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Unit of a relative date phrase ("3 weeks ago")
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelativeUnit {
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Year,
}

impl RelativeUnit {
    pub const fn seconds(self) -> i64 {
        match self {
            Self::Minute => 60,
            Self::Hour => 3_600,
            Self::Day => 86_400,
            Self::Week => 7 * 86_400,
            Self::Month => 30 * 86_400,
            Self::Year => 365 * 86_400,
        }
    }
}

/// Static vocabulary for one interface language
#[derive(Debug)]
pub struct LanguageProfile {
    pub language: Language,
    /// Inclusive code point ranges of the language's script (empty for Latin)
    pub script_ranges: &'static [(u32, u32)],
    /// Words typical for a review listing UI in this language
    pub ui_vocabulary: &'static [&'static str],
    pub reviews_tab_labels: &'static [&'static str],
    pub sort_button_labels: &'static [&'static str],
    pub sort_recent_labels: &'static [&'static str],
    pub sort_lowest_labels: &'static [&'static str],
    pub sort_highest_labels: &'static [&'static str],
    pub sort_relevant_labels: &'static [&'static str],
    pub load_more_labels: &'static [&'static str],
    /// Word used in star rating aria-labels ("4 stars")
    pub star_words: &'static [&'static str],
    /// Markers of a relative date ("ago", "לפני", "hace")
    pub ago_markers: &'static [&'static str],
    /// Words that stand for the number one ("a", "an", "un")
    pub one_words: &'static [&'static str],
    /// Lowercase stems for relative date units, longest first where they overlap
    pub relative_units: &'static [(&'static str, RelativeUnit)],
}

impl LanguageProfile {
    pub const fn sort_labels(&self, sort: SortOrder) -> &'static [&'static str] {
        match sort {
            SortOrder::Relevant => self.sort_relevant_labels,
            SortOrder::Recent => self.sort_recent_labels,
            SortOrder::Lowest => self.sort_lowest_labels,
            SortOrder::Highest => self.sort_highest_labels,
        }
    }

    pub fn in_script(&self, c: char) -> bool {
        let cp = c as u32;
        self.script_ranges
            .iter()
            .any(|&(start, end)| (start..=end).contains(&cp))
    }
}

static ENGLISH: LanguageProfile = LanguageProfile {
    language: Language::English,
    script_ranges: &[],
    ui_vocabulary: &["reviews", "review", "sort", "newest", "write a review", "ago", "helpful", "more", "stars", "overview"],
    reviews_tab_labels: &["Reviews"],
    sort_button_labels: &["Sort", "Sort reviews"],
    sort_recent_labels: &["Newest", "Most recent"],
    sort_lowest_labels: &["Lowest rating", "Lowest rated"],
    sort_highest_labels: &["Highest rating", "Highest rated"],
    sort_relevant_labels: &["Most relevant", "Relevance"],
    load_more_labels: &["More reviews", "Load more", "Show more"],
    star_words: &["star"],
    ago_markers: &["ago"],
    one_words: &["a", "an", "one"],
    relative_units: &[
        ("minute", RelativeUnit::Minute),
        ("hour", RelativeUnit::Hour),
        ("day", RelativeUnit::Day),
        ("week", RelativeUnit::Week),
        ("month", RelativeUnit::Month),
        ("year", RelativeUnit::Year),
    ],
};

static HEBREW: LanguageProfile = LanguageProfile {
    language: Language::Hebrew,
    script_ranges: &[(0x0590, 0x05FF), (0xFB1D, 0xFB4F)],
    ui_vocabulary: &["ביקורות", "ביקורת", "מיון", "החדשות ביותר", "לפני", "כתיבת ביקורת", "כוכבים", "מועילה", "סקירה כללית"],
    reviews_tab_labels: &["ביקורות"],
    sort_button_labels: &["מיון", "מיון ביקורות"],
    sort_recent_labels: &["החדשות ביותר", "הכי חדשות"],
    sort_lowest_labels: &["הדירוג הנמוך ביותר", "דירוג נמוך"],
    sort_highest_labels: &["הדירוג הגבוה ביותר", "דירוג גבוה"],
    sort_relevant_labels: &["הרלוונטיות ביותר"],
    load_more_labels: &["ביקורות נוספות", "עוד ביקורות", "הצגת עוד"],
    star_words: &["כוכב"],
    ago_markers: &["לפני"],
    one_words: &["אחד", "אחת"],
    relative_units: &[
        ("דקות", RelativeUnit::Minute),
        ("דקה", RelativeUnit::Minute),
        ("שעות", RelativeUnit::Hour),
        ("שעה", RelativeUnit::Hour),
        ("ימים", RelativeUnit::Day),
        ("יום", RelativeUnit::Day),
        ("שבועות", RelativeUnit::Week),
        ("שבוע", RelativeUnit::Week),
        ("חודשים", RelativeUnit::Month),
        ("חודש", RelativeUnit::Month),
        ("שנים", RelativeUnit::Year),
        ("שנה", RelativeUnit::Year),
    ],
};

static ARABIC: LanguageProfile = LanguageProfile {
    language: Language::Arabic,
    script_ranges: &[(0x0600, 0x06FF), (0x0750, 0x077F), (0xFB50, 0xFDFF)],
    ui_vocabulary: &["المراجعات", "مراجعة", "ترتيب", "الأحدث", "قبل", "كتابة مراجعة", "نجوم", "مفيدة"],
    reviews_tab_labels: &["المراجعات", "التعليقات"],
    sort_button_labels: &["ترتيب", "ترتيب المراجعات"],
    sort_recent_labels: &["الأحدث"],
    sort_lowest_labels: &["الأدنى تقييمًا", "الأقل تقييمًا"],
    sort_highest_labels: &["الأعلى تقييمًا"],
    sort_relevant_labels: &["الأكثر صلة"],
    load_more_labels: &["المزيد من المراجعات", "عرض المزيد"],
    star_words: &["نجوم", "نجمة"],
    ago_markers: &["قبل", "منذ"],
    one_words: &["واحد", "واحدة"],
    relative_units: &[
        ("دقائق", RelativeUnit::Minute),
        ("دقيقة", RelativeUnit::Minute),
        ("ساعات", RelativeUnit::Hour),
        ("ساعة", RelativeUnit::Hour),
        ("أيام", RelativeUnit::Day),
        ("يوم", RelativeUnit::Day),
        ("أسابيع", RelativeUnit::Week),
        ("أسبوع", RelativeUnit::Week),
        ("أشهر", RelativeUnit::Month),
        ("شهر", RelativeUnit::Month),
        ("سنوات", RelativeUnit::Year),
        ("سنة", RelativeUnit::Year),
    ],
};

static SPANISH: LanguageProfile = LanguageProfile {
    language: Language::Spanish,
    script_ranges: &[],
    ui_vocabulary: &["reseñas", "opiniones", "ordenar", "más recientes", "hace", "escribir una reseña", "estrellas", "útil"],
    reviews_tab_labels: &["Reseñas", "Opiniones"],
    sort_button_labels: &["Ordenar", "Ordenar reseñas"],
    sort_recent_labels: &["Más recientes"],
    sort_lowest_labels: &["Calificación más baja", "Puntuación más baja"],
    sort_highest_labels: &["Calificación más alta", "Puntuación más alta"],
    sort_relevant_labels: &["Más relevantes"],
    load_more_labels: &["Más reseñas", "Ver más"],
    star_words: &["estrella"],
    ago_markers: &["hace"],
    one_words: &["un", "una"],
    relative_units: &[
        ("minuto", RelativeUnit::Minute),
        ("hora", RelativeUnit::Hour),
        ("día", RelativeUnit::Day),
        ("semana", RelativeUnit::Week),
        ("mes", RelativeUnit::Month),
        ("año", RelativeUnit::Year),
    ],
};

static FRENCH: LanguageProfile = LanguageProfile {
    language: Language::French,
    script_ranges: &[],
    ui_vocabulary: &["avis", "trier", "les plus récents", "il y a", "écrire un avis", "étoiles", "utile"],
    reviews_tab_labels: &["Avis"],
    sort_button_labels: &["Trier", "Trier les avis"],
    sort_recent_labels: &["Les plus récents", "Plus récents"],
    sort_lowest_labels: &["Note la plus basse", "Les moins bien notés"],
    sort_highest_labels: &["Note la plus élevée", "Les mieux notés"],
    sort_relevant_labels: &["Les plus pertinents"],
    load_more_labels: &["Plus d'avis", "Afficher plus"],
    star_words: &["étoile"],
    ago_markers: &["il y a"],
    one_words: &["un", "une"],
    relative_units: &[
        ("minute", RelativeUnit::Minute),
        ("heure", RelativeUnit::Hour),
        ("jour", RelativeUnit::Day),
        ("semaine", RelativeUnit::Week),
        ("mois", RelativeUnit::Month),
        ("an", RelativeUnit::Year),
    ],
};

static GERMAN: LanguageProfile = LanguageProfile {
    language: Language::German,
    script_ranges: &[],
    ui_vocabulary: &["rezensionen", "bewertungen", "sortieren", "neueste", "vor", "rezension schreiben", "sterne", "hilfreich"],
    reviews_tab_labels: &["Rezensionen", "Bewertungen"],
    sort_button_labels: &["Sortieren", "Rezensionen sortieren"],
    sort_recent_labels: &["Neueste"],
    sort_lowest_labels: &["Niedrigste Bewertung"],
    sort_highest_labels: &["Höchste Bewertung"],
    sort_relevant_labels: &["Relevanteste"],
    load_more_labels: &["Weitere Rezensionen", "Mehr anzeigen"],
    star_words: &["stern"],
    ago_markers: &["vor"],
    one_words: &["einer", "einem", "ein", "eine"],
    relative_units: &[
        ("minute", RelativeUnit::Minute),
        ("stunde", RelativeUnit::Hour),
        ("tag", RelativeUnit::Day),
        ("woche", RelativeUnit::Week),
        ("monat", RelativeUnit::Month),
        ("jahr", RelativeUnit::Year),
    ],
};

static RUSSIAN: LanguageProfile = LanguageProfile {
    language: Language::Russian,
    script_ranges: &[(0x0400, 0x04FF)],
    ui_vocabulary: &["отзывы", "отзыв", "сортировка", "сначала новые", "назад", "написать отзыв", "звезд", "полезно"],
    reviews_tab_labels: &["Отзывы"],
    sort_button_labels: &["Сортировка", "Сортировать отзывы"],
    sort_recent_labels: &["Сначала новые", "Новые"],
    sort_lowest_labels: &["Сначала с низкой оценкой", "С низкой оценкой"],
    sort_highest_labels: &["Сначала с высокой оценкой", "С высокой оценкой"],
    sort_relevant_labels: &["Самые релевантные"],
    load_more_labels: &["Ещё отзывы", "Показать ещё"],
    star_words: &["звезд"],
    ago_markers: &["назад"],
    one_words: &["один", "одна", "одну"],
    relative_units: &[
        ("минут", RelativeUnit::Minute),
        ("час", RelativeUnit::Hour),
        ("дн", RelativeUnit::Day),
        ("день", RelativeUnit::Day),
        ("недел", RelativeUnit::Week),
        ("месяц", RelativeUnit::Month),
        ("год", RelativeUnit::Year),
        ("лет", RelativeUnit::Year),
    ],
};

/// Result of classifying a page's interface language
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguageDetectionResult {
    pub language: Language,
    /// 0.0-1.0
    pub confidence: f64,
    pub is_rtl: bool,
    /// Evidence strings collected while scoring
    pub detected_elements: Vec<String>,
    pub suggested_selectors: Vec<String>,
    pub detected_at: DateTime<Utc>,
}

impl LanguageDetectionResult {
    /// Confidence reported when detection could not evaluate the page
    pub const FALLBACK_CONFIDENCE: f64 = 0.3;

    pub fn new(language: Language, confidence: f64) -> Self {
        Self {
            language,
            confidence: confidence.clamp(0.0, 1.0),
            is_rtl: language.is_rtl(),
            detected_elements: Vec::new(),
            suggested_selectors: Vec::new(),
            detected_at: Utc::now(),
        }
    }

    pub fn fallback(reason: &str) -> Self {
        let mut result = Self::new(Language::FALLBACK, Self::FALLBACK_CONFIDENCE);
        result.detected_elements.push(format!("fallback: {reason}"));
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_tag_variants() {
        assert_eq!(Language::from_tag("he-IL"), Some(Language::Hebrew));
        assert_eq!(Language::from_tag("iw"), Some(Language::Hebrew));
        assert_eq!(Language::from_tag("en_US"), Some(Language::English));
        assert_eq!(Language::from_tag("ja"), None);
        assert_eq!(Language::from_tag(""), None);
    }

    #[test]
    fn test_rtl_follows_language() {
        assert!(LanguageDetectionResult::new(Language::Arabic, 0.9).is_rtl);
        assert!(!LanguageDetectionResult::new(Language::German, 0.9).is_rtl);
    }

    #[test]
    fn test_fallback_shape() {
        let fallback = LanguageDetectionResult::fallback("evaluation failed");
        assert_eq!(fallback.language, Language::English);
        assert!((fallback.confidence - 0.3).abs() < f64::EPSILON);
        assert_eq!(fallback.detected_elements.len(), 1);
    }

    #[test]
    fn test_script_ranges() {
        assert!(Language::Hebrew.profile().in_script('ש'));
        assert!(Language::Russian.profile().in_script('ж'));
        assert!(!Language::English.profile().in_script('a'));
    }
}
