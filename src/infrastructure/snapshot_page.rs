//! `scraper`-backed page over staged HTML snapshots
//!
//! A site is a set of named scenes (one per ordering the page can show),
//! each a list of stages: stage `n` is the markup after `n` load cycles.
//! Clicks, key presses and URL parameters switch scenes; scrolling and
//! "load more" clicks advance the stage. Used for offline analysis of
//! saved pages and as the page double in tests.

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::debug;

use super::page_driver::{
    ElementBundle, ElementSnapshot, FieldMatch, FieldProbe, NavigateOptions, PageDriver, PageError,
    PageFactory,
};

/// Attribute marking elements the cleanup hook may drop
pub const TRANSIENT_MARKER: &str = "data-transient";

/// Scene shown before any rule fires
pub const DEFAULT_SCENE: &str = "default";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickEffect {
    SwitchScene(String),
    AdvanceStage,
    Noop,
}

/// Reaction to clicking an element matching `selector`
#[derive(Debug, Clone)]
pub struct ClickRule {
    pub selector: String,
    /// Case-insensitive substring the clicked element's label must contain
    pub label_contains: Option<String>,
    pub effect: ClickEffect,
}

impl ClickRule {
    pub fn new(selector: impl Into<String>, effect: ClickEffect) -> Self {
        Self {
            selector: selector.into(),
            label_contains: None,
            effect,
        }
    }

    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label_contains = Some(label.into());
        self
    }
}

/// Query parameter value that selects a scene on navigation
#[derive(Debug, Clone)]
pub struct UrlRule {
    pub param: String,
    pub value: String,
    pub scene: String,
}

/// Key sequence (most recent presses) that triggers an effect
#[derive(Debug, Clone)]
pub struct KeyRule {
    pub sequence: Vec<String>,
    pub effect: ClickEffect,
}

/// Recorded interaction, for inspection in tests
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageEvent {
    Navigate(String),
    Click { selector: String, index: usize },
    Scroll(i64),
    Key(String),
    Cleanup,
}

#[derive(Debug, Clone)]
pub struct SnapshotSite {
    scenes: HashMap<String, Vec<String>>,
    initial_scene: String,
    click_rules: Vec<ClickRule>,
    url_rules: Vec<UrlRule>,
    key_rules: Vec<KeyRule>,
    scroll_advances_stage: bool,
    latency: Duration,
}

impl SnapshotSite {
    /// Site with a single default scene made of `stages`
    pub fn new(stages: Vec<String>) -> Self {
        let mut scenes = HashMap::new();
        scenes.insert(DEFAULT_SCENE.to_string(), stages);
        Self {
            scenes,
            initial_scene: DEFAULT_SCENE.to_string(),
            click_rules: Vec::new(),
            url_rules: Vec::new(),
            key_rules: Vec::new(),
            scroll_advances_stage: true,
            latency: Duration::ZERO,
        }
    }

    pub fn single(html: impl Into<String>) -> Self {
        Self::new(vec![html.into()])
    }

    #[must_use]
    pub fn with_scene(mut self, name: impl Into<String>, stages: Vec<String>) -> Self {
        self.scenes.insert(name.into(), stages);
        self
    }

    #[must_use]
    pub fn with_click_rule(mut self, rule: ClickRule) -> Self {
        self.click_rules.push(rule);
        self
    }

    #[must_use]
    pub fn with_url_rule(mut self, param: &str, value: &str, scene: &str) -> Self {
        self.url_rules.push(UrlRule {
            param: param.to_string(),
            value: value.to_string(),
            scene: scene.to_string(),
        });
        self
    }

    #[must_use]
    pub fn with_key_rule(mut self, sequence: &[&str], effect: ClickEffect) -> Self {
        self.key_rules.push(KeyRule {
            sequence: sequence.iter().map(|k| (*k).to_string()).collect(),
            effect,
        });
        self
    }

    #[must_use]
    pub const fn scroll_advances_stage(mut self, enabled: bool) -> Self {
        self.scroll_advances_stage = enabled;
        self
    }

    /// Delay applied to interactions that load content
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn stage_html(&self, scene: &str, stage: usize) -> &str {
        self.scenes
            .get(scene)
            .or_else(|| self.scenes.get(&self.initial_scene))
            .and_then(|stages| stages.get(stage.min(stages.len().saturating_sub(1))))
            .map_or("", String::as_str)
    }

    fn stage_count(&self, scene: &str) -> usize {
        self.scenes.get(scene).map_or(1, Vec::len)
    }
}

#[derive(Debug)]
struct PageState {
    url: String,
    scene: String,
    stage: usize,
    scroll_y: i64,
    closed: bool,
    events: Vec<PageEvent>,
    key_history: Vec<String>,
    cleanup_runs: usize,
    navigation_failures: u32,
    evaluation_failures: u32,
}

/// Page over a `SnapshotSite`
#[derive(Debug, Clone)]
pub struct SnapshotPage {
    site: Arc<SnapshotSite>,
    state: Arc<Mutex<PageState>>,
}

impl SnapshotPage {
    pub fn new(site: Arc<SnapshotSite>) -> Self {
        let state = PageState {
            url: "about:blank".to_string(),
            scene: site.initial_scene.clone(),
            stage: 0,
            scroll_y: 0,
            closed: false,
            events: Vec::new(),
            key_history: Vec::new(),
            cleanup_runs: 0,
            navigation_failures: 0,
            evaluation_failures: 0,
        };
        Self {
            site,
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PageState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next `count` navigations fail
    pub fn fail_next_navigations(&self, count: u32) {
        self.lock().navigation_failures = count;
    }

    /// Make the next `count` DOM evaluations fail
    pub fn fail_next_evaluations(&self, count: u32) {
        self.lock().evaluation_failures = count;
    }

    pub fn events(&self) -> Vec<PageEvent> {
        self.lock().events.clone()
    }

    pub fn cleanup_runs(&self) -> usize {
        self.lock().cleanup_runs
    }

    pub fn scene(&self) -> String {
        self.lock().scene.clone()
    }

    pub fn stage(&self) -> usize {
        self.lock().stage
    }

    pub fn scroll_position(&self) -> i64 {
        self.lock().scroll_y
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    async fn simulate_latency(&self) {
        if !self.site.latency.is_zero() {
            tokio::time::sleep(self.site.latency).await;
        }
    }

    /// Run `f` against the current document, honouring closed state and injected failures
    fn evaluate<T>(&self, f: impl FnOnce(&Html) -> Result<T, PageError>) -> Result<T, PageError> {
        let html = {
            let mut state = self.lock();
            if state.closed {
                return Err(PageError::Closed);
            }
            if state.evaluation_failures > 0 {
                state.evaluation_failures -= 1;
                return Err(PageError::Evaluation("injected evaluation failure".to_string()));
            }
            self.site.stage_html(&state.scene, state.stage).to_string()
        };
        let document = Html::parse_document(&html);
        f(&document)
    }

    fn apply_effect(&self, state: &mut PageState, effect: &ClickEffect) {
        match effect {
            ClickEffect::SwitchScene(scene) => {
                debug!("🎬 Snapshot scene switch {} -> {}", state.scene, scene);
                state.scene.clone_from(scene);
                state.stage = 0;
                state.scroll_y = 0;
            }
            ClickEffect::AdvanceStage => {
                let last = self.site.stage_count(&state.scene).saturating_sub(1);
                state.stage = (state.stage + 1).min(last);
            }
            ClickEffect::Noop => {}
        }
    }

    fn click_sync(&self, selector: &str, index: usize) -> Result<bool, PageError> {
        let parsed = parse_selector(selector)?;
        let effect = self.evaluate(|document| {
            let Some(target) = document.select(&parsed).nth(index) else {
                return Ok(None);
            };
            let label = ElementSnapshot::from_element(index, target).label().to_lowercase();
            let lineage: HashSet<_> = std::iter::once(target.id())
                .chain(target.ancestors().map(|node| node.id()))
                .collect();

            for rule in &self.site.click_rules {
                let Ok(rule_selector) = Selector::parse(&rule.selector) else {
                    continue;
                };
                let hit = document
                    .select(&rule_selector)
                    .any(|candidate| lineage.contains(&candidate.id()));
                let label_ok = rule
                    .label_contains
                    .as_ref()
                    .is_none_or(|needle| label.contains(&needle.to_lowercase()));
                if hit && label_ok {
                    return Ok(Some(rule.effect.clone()));
                }
            }
            Ok(Some(ClickEffect::Noop))
        })?;

        let mut state = self.lock();
        state.events.push(PageEvent::Click {
            selector: selector.to_string(),
            index,
        });
        match effect {
            Some(effect) => {
                self.apply_effect(&mut state, &effect);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn navigate_sync(&self, url: &str, options: &NavigateOptions) -> Result<(), PageError> {
        {
            let mut state = self.lock();
            if state.closed {
                return Err(PageError::Closed);
            }
            state.events.push(PageEvent::Navigate(url.to_string()));
            if state.navigation_failures > 0 {
                state.navigation_failures -= 1;
                return Err(PageError::navigation(url, "injected navigation failure"));
            }

            let parsed = url::Url::parse(url).map_err(|e| PageError::navigation(url, e.to_string()))?;
            let scene = self
                .site
                .url_rules
                .iter()
                .find(|rule| {
                    parsed
                        .query_pairs()
                        .any(|(k, v)| k == rule.param.as_str() && v == rule.value.as_str())
                })
                .map_or_else(|| self.site.initial_scene.clone(), |rule| rule.scene.clone());

            state.url = url.to_string();
            state.scene = scene;
            state.stage = 0;
            state.scroll_y = 0;
            state.key_history.clear();
        }

        if let Some(wait_for) = &options.wait_for {
            let selector = parse_selector(wait_for)?;
            let present = self.evaluate(|document| Ok(document.select(&selector).next().is_some()))?;
            if !present {
                return Err(PageError::Timeout(format!("'{wait_for}' never appeared on {url}")));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PageDriver for SnapshotPage {
    async fn current_url(&self) -> Result<String, PageError> {
        let state = self.lock();
        if state.closed {
            return Err(PageError::Closed);
        }
        Ok(state.url.clone())
    }

    async fn navigate(&self, url: &str, options: &NavigateOptions) -> Result<(), PageError> {
        self.simulate_latency().await;
        self.navigate_sync(url, options)
    }

    async fn document_language(&self) -> Result<Option<String>, PageError> {
        self.evaluate(|document| {
            Ok(document
                .root_element()
                .value()
                .attr("lang")
                .map(str::to_string))
        })
    }

    async fn visible_text(&self, max_chars: usize) -> Result<String, PageError> {
        self.evaluate(|document| {
            let body = Selector::parse("body").map_err(|e| PageError::invalid_selector("body", format!("{e:?}")))?;
            let text = document
                .select(&body)
                .next()
                .map(collapse_text)
                .unwrap_or_default();
            Ok(text.chars().take(max_chars).collect())
        })
    }

    async fn query_all(&self, selector: &str) -> Result<Vec<ElementSnapshot>, PageError> {
        let parsed = parse_selector(selector)?;
        self.evaluate(|document| {
            Ok(document
                .select(&parsed)
                .enumerate()
                .map(|(index, element)| ElementSnapshot::from_element(index, element))
                .collect())
        })
    }

    async fn extract_bundles(
        &self,
        container: &str,
        probes: &[FieldProbe],
    ) -> Result<Vec<ElementBundle>, PageError> {
        let container_selector = parse_selector(container)?;
        let compiled: Vec<_> = probes
            .iter()
            .map(|probe| {
                let selectors: Vec<(String, Selector)> = probe
                    .selectors
                    .iter()
                    .filter_map(|s| Selector::parse(s).ok().map(|parsed| (s.clone(), parsed)))
                    .collect();
                (probe.field, selectors)
            })
            .collect();

        self.evaluate(|document| {
            let matches: Vec<ElementRef<'_>> = document.select(&container_selector).collect();
            let ids: HashSet<_> = matches.iter().map(|m| m.id()).collect();

            let bundles = matches
                .iter()
                .filter(|element| !element.ancestors().any(|a| ids.contains(&a.id())))
                .enumerate()
                .map(|(index, element)| {
                    let mut fields = HashMap::new();
                    for (field, selectors) in &compiled {
                        for (raw, selector) in selectors {
                            let found: Vec<ElementRef<'_>> = element.select(selector).collect();
                            if let Some(first) = found.first() {
                                let snapshot = ElementSnapshot::from_element(0, *first);
                                fields.insert(
                                    *field,
                                    FieldMatch {
                                        selector: raw.clone(),
                                        text: snapshot.text,
                                        attributes: snapshot.attributes,
                                        match_count: found.len(),
                                    },
                                );
                                break;
                            }
                        }
                    }
                    ElementBundle {
                        container: ElementSnapshot::from_element(index, *element),
                        fields,
                    }
                })
                .collect();
            Ok(bundles)
        })
    }

    async fn count(&self, selector: &str) -> Result<usize, PageError> {
        let parsed = parse_selector(selector)?;
        self.evaluate(|document| Ok(document.select(&parsed).count()))
    }

    async fn click(&self, selector: &str, index: usize) -> Result<bool, PageError> {
        let clicked = self.click_sync(selector, index)?;
        if clicked {
            self.simulate_latency().await;
        }
        Ok(clicked)
    }

    async fn scroll_by(&self, target: Option<&str>, pixels: i64) -> Result<(), PageError> {
        if let Some(target) = target {
            let present = self.count(target).await?;
            if present == 0 {
                return Err(PageError::Evaluation(format!("scroll target '{target}' not found")));
            }
        }
        {
            let mut state = self.lock();
            if state.closed {
                return Err(PageError::Closed);
            }
            state.events.push(PageEvent::Scroll(pixels));
            state.scroll_y = state.scroll_y.saturating_add(pixels).max(0);
            if pixels > 0 && self.site.scroll_advances_stage {
                self.apply_effect(&mut state, &ClickEffect::AdvanceStage);
            }
        }
        self.simulate_latency().await;
        Ok(())
    }

    async fn scroll_to_origin(&self) -> Result<(), PageError> {
        let mut state = self.lock();
        if state.closed {
            return Err(PageError::Closed);
        }
        state.scroll_y = 0;
        Ok(())
    }

    async fn press_key(&self, key: &str) -> Result<(), PageError> {
        let mut state = self.lock();
        if state.closed {
            return Err(PageError::Closed);
        }
        state.events.push(PageEvent::Key(key.to_string()));
        state.key_history.push(key.to_string());

        let effect = self
            .site
            .key_rules
            .iter()
            .find(|rule| state.key_history.ends_with(&rule.sequence))
            .map(|rule| rule.effect.clone());
        if let Some(effect) = effect {
            state.key_history.clear();
            self.apply_effect(&mut state, &effect);
        }
        Ok(())
    }

    async fn wait_for(&self, selector: &str, _timeout: Duration) -> Result<bool, PageError> {
        // snapshots never change on their own
        Ok(self.count(selector).await? > 0)
    }

    async fn run_cleanup(&self) -> Result<usize, PageError> {
        let marker = format!("[{TRANSIENT_MARKER}]");
        let removed = self.count(&marker).await?;
        let mut state = self.lock();
        state.cleanup_runs += 1;
        state.events.push(PageEvent::Cleanup);
        Ok(removed)
    }

    async fn close(&self) -> Result<(), PageError> {
        self.lock().closed = true;
        Ok(())
    }
}

impl ElementSnapshot {
    fn from_element(index: usize, element: ElementRef<'_>) -> Self {
        let attributes: BTreeMap<String, String> = element
            .value()
            .attrs()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let visible = std::iter::once(element)
            .chain(element.ancestors().filter_map(ElementRef::wrap))
            .all(|e| !is_hidden(e));
        Self {
            index,
            tag: element.value().name().to_string(),
            text: collapse_text(element),
            attributes,
            visible,
        }
    }
}

fn is_hidden(element: ElementRef<'_>) -> bool {
    let value = element.value();
    if value.attr("hidden").is_some() || value.attr("aria-hidden") == Some("true") {
        return true;
    }
    value.attr("style").is_some_and(|style| {
        let compact: String = style.chars().filter(|c| !c.is_whitespace()).collect();
        compact.contains("display:none") || compact.contains("visibility:hidden")
    })
}

fn collapse_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn parse_selector(selector: &str) -> Result<Selector, PageError> {
    Selector::parse(selector).map_err(|e| PageError::invalid_selector(selector, format!("{e:?}")))
}

/// Hands out fresh pages over one shared site
#[derive(Debug)]
pub struct SnapshotPageFactory {
    site: Arc<SnapshotSite>,
    launch_failures: AtomicU32,
    opened: Mutex<Vec<SnapshotPage>>,
}

impl SnapshotPageFactory {
    pub fn new(site: SnapshotSite) -> Self {
        Self {
            site: Arc::new(site),
            launch_failures: AtomicU32::new(0),
            opened: Mutex::new(Vec::new()),
        }
    }

    /// Fail the next `count` launches
    #[must_use]
    pub fn failing_launches(self, count: u32) -> Self {
        self.launch_failures.store(count, Ordering::SeqCst);
        self
    }

    /// Pages opened so far, oldest first
    pub fn opened_pages(&self) -> Vec<SnapshotPage> {
        self.opened
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl PageFactory for SnapshotPageFactory {
    async fn open(&self) -> Result<Arc<dyn PageDriver>, PageError> {
        let failed = self
            .launch_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(PageError::Launch("injected launch failure".to_string()));
        }

        let page = SnapshotPage::new(Arc::clone(&self.site));
        self.opened
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(page.clone());
        Ok(Arc::new(page))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::selectors::SelectorField;

    const PAGE: &str = r#"<html lang="en"><body>
        <button aria-label="Sort reviews" class="sort">Sort</button>
        <div role="menuitemradio" data-index="1">Newest</div>
        <div class="review" data-review-id="r1">
            <div class="author">Dana</div>
            <span class="stars" aria-label="4 stars"></span>
            <span class="text">Lovely</span>
            <div class="review" data-review-id="nested"></div>
        </div>
        <div class="review" data-review-id="r2" style="display: none">
            <span class="text">Hidden</span>
        </div>
    </body></html>"#;

    fn site() -> SnapshotSite {
        SnapshotSite::new(vec![PAGE.to_string(), format!("{PAGE}<p>more</p>")])
            .with_scene("newest", vec![PAGE.replace("Lovely", "Fresh")])
            .with_click_rule(
                ClickRule::new("[role='menuitemradio']", ClickEffect::SwitchScene("newest".into()))
                    .with_label("newest"),
            )
            .with_url_rule("sort", "newest", "newest")
    }

    #[tokio::test]
    async fn test_bundles_are_outermost_and_probed() {
        let page = SnapshotPage::new(Arc::new(site()));
        let probes = vec![
            FieldProbe {
                field: SelectorField::AuthorName,
                selectors: vec![".missing".into(), ".author".into()],
            },
            FieldProbe {
                field: SelectorField::Rating,
                selectors: vec!["[aria-label*='star']".into()],
            },
        ];
        let bundles = page.extract_bundles("div.review", &probes).await.unwrap();
        assert_eq!(bundles.len(), 2);

        let first = &bundles[0];
        assert!(first.container.visible);
        let author = first.field(SelectorField::AuthorName).unwrap();
        assert_eq!(author.selector, ".author");
        assert_eq!(author.text, "Dana");
        assert_eq!(
            first.field(SelectorField::Rating).unwrap().attr("aria-label"),
            Some("4 stars")
        );
        assert!(!bundles[1].container.visible);
    }

    #[tokio::test]
    async fn test_click_rule_switches_scene() {
        let page = SnapshotPage::new(Arc::new(site()));
        assert!(page.click("[role='menuitemradio']", 0).await.unwrap());
        assert_eq!(page.scene(), "newest");
        assert!(!page.click(".does-not-exist", 0).await.unwrap());
        let text = page.visible_text(10_000).await.unwrap();
        assert!(text.contains("Fresh"));
    }

    #[tokio::test]
    async fn test_url_rule_and_scroll_stages() {
        let page = SnapshotPage::new(Arc::new(site()));
        page.navigate("https://maps.example.com/place?sort=newest", &NavigateOptions::default())
            .await
            .unwrap();
        assert_eq!(page.scene(), "newest");

        page.navigate("https://maps.example.com/place", &NavigateOptions::default())
            .await
            .unwrap();
        page.scroll_by(None, 500).await.unwrap();
        page.scroll_by(None, 500).await.unwrap();
        assert_eq!(page.stage(), 1);
        assert_eq!(page.document_language().await.unwrap().as_deref(), Some("en"));
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let page = SnapshotPage::new(Arc::new(site()));
        page.fail_next_navigations(1);
        let err = page
            .navigate("https://maps.example.com/x", &NavigateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PageError::Navigation { .. }));

        page.fail_next_evaluations(1);
        assert!(page.count("div").await.is_err());
        assert!(page.count("div").await.unwrap() > 0);

        assert!(matches!(page.count("[").await, Err(PageError::InvalidSelector { .. })));
    }

    #[tokio::test]
    async fn test_factory_launch_failures() {
        let factory = SnapshotPageFactory::new(site()).failing_launches(1);
        assert!(factory.open().await.is_err());
        assert!(factory.open().await.is_ok());
        assert_eq!(factory.opened_pages().len(), 1);
    }
}
