//! Sort navigation with mandatory verification
//!
//! Strategies run in a fixed order until one produces an observable,
//! order-consistent change: sort control click, query parameter mutation,
//! then the fallback chain (keyboard, scroll-into-view, dropdown triggers,
//! clickable scan). An attempt that changes nothing counts as a failure.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::application::review_extractor::ReviewExtraction;
use crate::domain::collection::SortMethod;
use crate::domain::language::Language;
use crate::domain::review::SortOrder;
use crate::infrastructure::config::SortNavigationConfig;
use crate::infrastructure::page_driver::{ElementSnapshot, NavigateOptions, PageDriver, PageError};
use crate::infrastructure::retry_manager::retry_with_backoff;

const OPTION_SELECTOR: &str = "[role='menuitemradio'], [role='menuitem'], [role='option']";
const DROPDOWN_SELECTOR: &str =
    "[aria-haspopup='true'], [aria-haspopup='menu'], [aria-haspopup='listbox'], [aria-expanded='false']";
const CLICKABLE_SELECTOR: &str =
    "button, [role='button'], a, [role='menuitemradio'], [role='menuitem'], [role='option'], li";
const MAX_DROPDOWN_TRIGGERS: usize = 5;

/// Evidence gathered after a navigation attempt
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SortVerification {
    pub url_reflects_sort: bool,
    pub content_changed: bool,
    pub trend_consistent: bool,
    pub sampled_mean: Option<f64>,
    pub sample_size: usize,
}

impl SortVerification {
    /// A URL carrying the requested order is enough; otherwise the listing must
    /// have changed and its rating/date trend must agree
    pub const fn verified(&self) -> bool {
        self.url_reflects_sort || (self.content_changed && self.trend_consistent)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortNavigationOutcome {
    pub success: bool,
    pub method_used: SortMethod,
    pub verification: Option<SortVerification>,
}

impl SortNavigationOutcome {
    const fn default_order() -> Self {
        Self {
            success: true,
            method_used: SortMethod::Default,
            verification: None,
        }
    }

    const fn failed(verification: Option<SortVerification>) -> Self {
        Self {
            success: false,
            method_used: SortMethod::None,
            verification,
        }
    }
}

#[derive(Error, Debug)]
enum SortAttemptError {
    #[error(transparent)]
    Page(#[from] PageError),

    #[error("no strategy produced a verified {0} ordering")]
    NotVerified(SortOrder, Option<SortVerification>),
}

impl SortAttemptError {
    const fn is_retryable(&self) -> bool {
        !matches!(self, Self::Page(PageError::Closed))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strategy {
    ButtonClick,
    UrlParameter(usize),
    Keyboard,
    ScrollIntoView,
    Dropdown,
    ClickableScan,
}

impl Strategy {
    const fn method(self) -> SortMethod {
        match self {
            Self::ButtonClick => SortMethod::ButtonClick,
            Self::UrlParameter(_) => SortMethod::UrlParameter,
            Self::Keyboard => SortMethod::KeyboardNavigation,
            Self::ScrollIntoView => SortMethod::ScrollIntoView,
            Self::Dropdown => SortMethod::DropdownTrigger,
            Self::ClickableScan => SortMethod::ClickableScan,
        }
    }
}

/// First few reviews of the listing, used to notice a reorder
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContentSample {
    pub fingerprint: String,
    pub ratings: Vec<u8>,
    pub dates: Vec<DateTime<Utc>>,
}

impl ContentSample {
    pub fn mean_rating(&self) -> Option<f64> {
        (!self.ratings.is_empty())
            .then(|| self.ratings.iter().map(|r| f64::from(*r)).sum::<f64>() / self.ratings.len() as f64)
    }
}

/// Whether the sample's rating/date trend agrees with `sort`
pub fn trend_consistent(sort: SortOrder, sample: &ContentSample, config: &SortNavigationConfig) -> bool {
    match sort {
        SortOrder::Relevant => true,
        SortOrder::Lowest => sample.mean_rating().is_some_and(|m| m <= config.lowest_mean_max),
        SortOrder::Highest => sample.mean_rating().is_some_and(|m| m >= config.highest_mean_min),
        SortOrder::Recent => {
            let (mut newer_later, mut older_later) = (0usize, 0usize);
            for pair in sample.dates.windows(2) {
                if pair[1] > pair[0] {
                    newer_later += 1;
                } else if pair[1] < pair[0] {
                    older_later += 1;
                }
            }
            newer_later <= older_later
        }
    }
}

/// Sort labels for `sort` in the page language, English appended
fn labels_for(language: Language, sort: SortOrder) -> Vec<&'static str> {
    let mut labels: Vec<&'static str> = language.profile().sort_labels(sort).to_vec();
    for label in Language::English.profile().sort_labels(sort) {
        if !labels.contains(label) {
            labels.push(label);
        }
    }
    labels
}

/// Index of the visible element whose label matches: exact first, then substring
pub fn find_labelled(elements: &[ElementSnapshot], labels: &[&str]) -> Option<usize> {
    let normalized: Vec<String> = labels.iter().map(|l| l.trim().to_lowercase()).collect();
    let candidates = || {
        elements
            .iter()
            .filter(|e| e.visible)
            .map(|e| (e.index, e.label().trim().to_lowercase(), e.text.trim().to_lowercase()))
    };

    candidates()
        .find(|(_, label, text)| normalized.iter().any(|n| label == n || text == n))
        .or_else(|| {
            candidates().find(|(_, label, text)| {
                normalized
                    .iter()
                    .any(|n| !n.is_empty() && (label.contains(n.as_str()) || text.contains(n.as_str())))
            })
        })
        .map(|(index, _, _)| index)
}

/// Page errors other than a closed page only disqualify the current strategy
fn absorb(result: Result<bool, PageError>) -> Result<bool, PageError> {
    match result {
        Ok(done) => Ok(done),
        Err(PageError::Closed) => Err(PageError::Closed),
        Err(e) => {
            debug!("Sort strategy step failed: {}", e);
            Ok(false)
        }
    }
}

#[derive(Debug, Clone)]
pub struct SortNavigator {
    config: SortNavigationConfig,
    navigation_timeout: Duration,
}

impl SortNavigator {
    pub const fn new(config: SortNavigationConfig, navigation_timeout: Duration) -> Self {
        Self {
            config,
            navigation_timeout,
        }
    }

    /// Put the page into `sort` once, trying every strategy in order
    pub async fn navigate_to_sort(
        &self,
        page: &dyn PageDriver,
        sort: SortOrder,
        language: Language,
        extractor: &dyn ReviewExtraction,
    ) -> Result<SortNavigationOutcome, PageError> {
        if sort == SortOrder::Relevant {
            return Ok(SortNavigationOutcome::default_order());
        }

        let baseline = self.sample(page, extractor).await?;
        let strategies = [Strategy::ButtonClick]
            .into_iter()
            .chain((0..self.config.query_params.len()).map(Strategy::UrlParameter))
            .chain([
                Strategy::Keyboard,
                Strategy::ScrollIntoView,
                Strategy::Dropdown,
                Strategy::ClickableScan,
            ]);

        let mut last_verification = None;
        for strategy in strategies {
            let acted = absorb(self.attempt(strategy, page, sort, language).await)?;
            if !acted {
                continue;
            }
            tokio::time::sleep(self.config.settle_delay()).await;

            let verification = self.verify(page, sort, &baseline, extractor).await?;
            debug!(
                sort = %sort,
                method = ?strategy.method(),
                verified = verification.verified(),
                "🔀 Sort attempt finished"
            );
            if verification.verified() {
                info!("🔀 Sorted by {} via {:?}", sort, strategy.method());
                return Ok(SortNavigationOutcome {
                    success: true,
                    method_used: strategy.method(),
                    verification: Some(verification),
                });
            }
            last_verification = Some(verification);
        }

        Ok(SortNavigationOutcome::failed(last_verification))
    }

    /// Bounded retries with backoff, recovering page state between attempts
    pub async fn navigate_to_sort_with_retry(
        &self,
        page: &dyn PageDriver,
        sort: SortOrder,
        language: Language,
        extractor: &dyn ReviewExtraction,
    ) -> SortNavigationOutcome {
        let result = retry_with_backoff(
            &self.config.retry,
            "sort navigation",
            SortAttemptError::is_retryable,
            move |attempt| async move {
                if attempt > 1 {
                    self.recover(page).await;
                }
                let outcome = self.navigate_to_sort(page, sort, language, extractor).await?;
                if outcome.success {
                    Ok(outcome)
                } else {
                    Err(SortAttemptError::NotVerified(sort, outcome.verification))
                }
            },
        )
        .await;

        match result {
            Ok(outcome) => outcome,
            Err(failure) => {
                warn!("⚠️ Could not apply {} ordering, collecting unsorted: {}", sort, failure);
                match failure.into_inner() {
                    SortAttemptError::NotVerified(_, verification) => SortNavigationOutcome::failed(verification),
                    SortAttemptError::Page(_) => SortNavigationOutcome::failed(None),
                }
            }
        }
    }

    /// Return to the top and dismiss overlays
    async fn recover(&self, page: &dyn PageDriver) {
        if let Err(e) = page.scroll_to_origin().await {
            debug!("Recovery scroll failed: {}", e);
        }
        if let Err(e) = page.press_key("Escape").await {
            debug!("Recovery escape failed: {}", e);
        }
    }

    async fn sample(&self, page: &dyn PageDriver, extractor: &dyn ReviewExtraction) -> Result<ContentSample, PageError> {
        let reviews = match extractor.extract(page).await {
            Ok(reviews) => reviews,
            Err(PageError::Closed) => return Err(PageError::Closed),
            Err(e) => {
                debug!("Sort verification sample failed: {}", e);
                return Ok(ContentSample::default());
            }
        };

        let head: Vec<_> = reviews.iter().take(self.config.verification_sample).collect();
        let mut hasher = blake3::Hasher::new();
        for review in &head {
            hasher.update(review.id.as_str().as_bytes());
        }
        Ok(ContentSample {
            fingerprint: if head.is_empty() {
                String::new()
            } else {
                hasher.finalize().to_hex().to_string()
            },
            ratings: head.iter().map(|r| r.rating).collect(),
            dates: head.iter().filter_map(|r| r.date).collect(),
        })
    }

    async fn verify(
        &self,
        page: &dyn PageDriver,
        sort: SortOrder,
        baseline: &ContentSample,
        extractor: &dyn ReviewExtraction,
    ) -> Result<SortVerification, PageError> {
        let url_reflects_sort = match page.current_url().await {
            Ok(current) => Url::parse(&current).is_ok_and(|url| {
                url.query_pairs().any(|(key, value)| {
                    self.config.query_params.iter().any(|p| p.as_str() == key) && value == sort.query_value()
                })
            }),
            Err(PageError::Closed) => return Err(PageError::Closed),
            Err(_) => false,
        };

        let after = self.sample(page, extractor).await?;
        Ok(SortVerification {
            url_reflects_sort,
            content_changed: !after.fingerprint.is_empty() && after.fingerprint != baseline.fingerprint,
            trend_consistent: trend_consistent(sort, &after, &self.config),
            sampled_mean: after.mean_rating(),
            sample_size: after.ratings.len(),
        })
    }

    async fn attempt(
        &self,
        strategy: Strategy,
        page: &dyn PageDriver,
        sort: SortOrder,
        language: Language,
    ) -> Result<bool, PageError> {
        let labels = labels_for(language, sort);
        match strategy {
            Strategy::ButtonClick => self.click_sort_option(page, language, &labels).await,
            Strategy::UrlParameter(index) => self.apply_query_param(page, index, sort).await,
            Strategy::Keyboard => self.keyboard_select(page, language, sort).await,
            Strategy::ScrollIntoView => {
                page.scroll_to_origin().await?;
                for selector in Self::sort_button_selectors(language) {
                    if page.count(&selector).await.unwrap_or(0) > 0 {
                        absorb(page.scroll_by(Some(&selector), 0).await.map(|()| true))?;
                    }
                }
                self.click_sort_option(page, language, &labels).await
            }
            Strategy::Dropdown => self.open_dropdowns(page, &labels).await,
            Strategy::ClickableScan => {
                let clickables = page.query_all(CLICKABLE_SELECTOR).await?;
                match find_labelled(&clickables, &labels) {
                    Some(index) => page.click(CLICKABLE_SELECTOR, index).await,
                    None => Ok(false),
                }
            }
        }
    }

    fn sort_button_selectors(language: Language) -> Vec<String> {
        let mut labels: Vec<&str> = language.profile().sort_button_labels.to_vec();
        for label in Language::English.profile().sort_button_labels {
            if !labels.contains(label) {
                labels.push(label);
            }
        }
        labels
            .iter()
            .flat_map(|label| {
                [
                    format!("button[aria-label*='{label}']"),
                    format!("[role='button'][aria-label*='{label}']"),
                ]
            })
            .chain(["button[data-value='Sort']".to_string()])
            .collect()
    }

    /// Open the sort control; returns whether a control was clicked
    async fn open_sort_control(&self, page: &dyn PageDriver, language: Language) -> Result<bool, PageError> {
        for selector in Self::sort_button_selectors(language) {
            if absorb(page.click(&selector, 0).await)? {
                tokio::time::sleep(self.config.settle_delay()).await;
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn pick_option(&self, page: &dyn PageDriver, labels: &[&str]) -> Result<bool, PageError> {
        let options = page.query_all(OPTION_SELECTOR).await?;
        match find_labelled(&options, labels) {
            Some(index) => page.click(OPTION_SELECTOR, index).await,
            None => {
                page.press_key("Escape").await?;
                Ok(false)
            }
        }
    }

    async fn click_sort_option(&self, page: &dyn PageDriver, language: Language, labels: &[&str]) -> Result<bool, PageError> {
        if !self.open_sort_control(page, language).await? {
            return Ok(false);
        }
        self.pick_option(page, labels).await
    }

    async fn apply_query_param(&self, page: &dyn PageDriver, index: usize, sort: SortOrder) -> Result<bool, PageError> {
        let Some(param) = self.config.query_params.get(index) else {
            return Ok(false);
        };
        let current = page.current_url().await?;
        let Ok(mut url) = Url::parse(&current) else {
            return Ok(false);
        };

        let retained: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(key, _)| key != param.as_str())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        url.query_pairs_mut()
            .clear()
            .extend_pairs(retained)
            .append_pair(param, sort.query_value());

        let options = NavigateOptions {
            timeout: self.navigation_timeout,
            wait_for: None,
        };
        page.navigate(url.as_str(), &options).await?;
        Ok(true)
    }

    async fn keyboard_select(&self, page: &dyn PageDriver, language: Language, sort: SortOrder) -> Result<bool, PageError> {
        if !self.open_sort_control(page, language).await? {
            return Ok(false);
        }
        for _ in 0..sort.menu_position() {
            page.press_key("ArrowDown").await?;
        }
        page.press_key("Enter").await?;
        Ok(true)
    }

    async fn open_dropdowns(&self, page: &dyn PageDriver, labels: &[&str]) -> Result<bool, PageError> {
        let triggers = page.query_all(DROPDOWN_SELECTOR).await?;
        for trigger in triggers.iter().filter(|t| t.visible).take(MAX_DROPDOWN_TRIGGERS) {
            if !absorb(page.click(DROPDOWN_SELECTOR, trigger.index).await)? {
                continue;
            }
            tokio::time::sleep(self.config.settle_delay()).await;
            if absorb(self.pick_option(page, labels).await)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
