//! Shared fixtures for unit and integration tests
//!
//! Listing pages mimic the markup of a map place panel closely enough for
//! the generic selector family to match, so tests exercise the same
//! resolution path as a live page.

use crate::domain::review::{Review, SortOrder};
use crate::infrastructure::config::{AppConfig, PaginationConfig};
use crate::infrastructure::retry_manager::RetryPolicy;
use crate::infrastructure::snapshot_page::{ClickEffect, ClickRule, SnapshotSite};

pub const PLACE_URL: &str = "https://maps.example.com/place/cafe-lumen";

/// One review card
pub fn review_block(id: &str, author: &str, rating: u8, text: &str, date: &str) -> String {
    format!(
        r#"<div class="jftiEf" data-review-id="{id}"><div class="d4r55">{author}</div><span class="kvMYJc" role="img" aria-label="{rating} stars"></span><span class="rsqaWe">{date}</span><span class="wiI7pd">{text}</span></div>"#
    )
}

/// Place panel with a sort menu and a review feed
pub fn listing_page(lang: &str, reviews: &[String]) -> String {
    let mut html = format!(
        r#"<html lang="{lang}"><head><title>Cafe Lumen</title></head><body>
<button role="tab" aria-label="Reviews">Reviews</button>
<button aria-label="Sort reviews" aria-haspopup="true">Sort</button>
<div role="menu">
<div role="menuitemradio" data-index="0">Most relevant</div>
<div role="menuitemradio" data-index="1">Newest</div>
<div role="menuitemradio" data-index="2">Highest rating</div>
<div role="menuitemradio" data-index="3">Lowest rating</div>
</div>
<div role="feed">"#
    );
    for review in reviews {
        html.push_str(review);
    }
    html.push_str("</div></body></html>");
    html
}

/// Text that stays unique per index and long enough to avoid fuzzy collisions
fn generated_text(index: usize) -> String {
    format!("Visit {index}: the {} was {} and we {}", DISHES[index % DISHES.len()], MOODS[index % MOODS.len()], index * 7 + 3)
}

const DISHES: [&str; 5] = ["espresso", "croissant", "shakshuka", "falafel plate", "cheesecake"];
const MOODS: [&str; 4] = ["memorable", "fine", "disappointing", "outstanding"];

/// Reviews `0..count` with ratings cycling through 1..=5
pub fn generated_blocks(range: std::ops::Range<usize>, id_prefix: &str) -> Vec<String> {
    range
        .map(|i| {
            let rating = u8::try_from(i % 5).unwrap_or(0) + 1;
            review_block(
                &format!("{id_prefix}{i}"),
                &format!("Guest {i}"),
                rating,
                &generated_text(i),
                &format!("{} days ago", i + 1),
            )
        })
        .collect()
}

/// One listing per stage, stage `n` showing the first `stages[n]` reviews
pub fn staged_listing(stages: &[usize]) -> Vec<String> {
    stages
        .iter()
        .map(|count| listing_page("en", &generated_blocks(0..*count, "g")))
        .collect()
}

fn rated_blocks(prefix: &str, count: usize, rating: u8, offset: usize) -> Vec<String> {
    (0..count)
        .map(|i| {
            let n = offset + i;
            review_block(
                &format!("{prefix}{n}"),
                &format!("{prefix} guest {n}"),
                rating,
                &format!("{} review {n}: {}", prefix, generated_text(n)),
                &format!("{} days ago", i + 1),
            )
        })
        .collect()
}

/// Site whose sort menu switches between relevance, newest, lowest and highest scenes.
///
/// Each scene grows by `step` reviews per scroll over `stages` stages. The
/// newest scene repeats the first relevance review to exercise cross-pass
/// deduplication.
pub fn sortable_site(step: usize, stages: usize) -> SnapshotSite {
    let staged = |build: &dyn Fn(usize) -> Vec<String>| -> Vec<String> {
        (1..=stages).map(|n| listing_page("en", &build(n * step))).collect()
    };

    let relevant = staged(&|n| generated_blocks(0..n, "rel"));
    let recent = staged(&|n| {
        let mut blocks = generated_blocks(0..1, "rel");
        blocks.extend(rated_blocks("new", n.saturating_sub(1), 4, 0));
        blocks
    });
    let lowest = staged(&|n| rated_blocks("low", n, 1, 0));
    let highest = staged(&|n| rated_blocks("high", n, 5, 0));

    let menu = |label: &str, scene: &str| {
        ClickRule::new("[role='menuitemradio']", ClickEffect::SwitchScene(scene.to_string())).with_label(label)
    };

    SnapshotSite::new(relevant)
        .with_scene("recent", recent)
        .with_scene("lowest", lowest)
        .with_scene("highest", highest)
        .with_click_rule(menu("Newest", "recent"))
        .with_click_rule(menu("Lowest rating", "lowest"))
        .with_click_rule(menu("Highest rating", "highest"))
}

/// Configuration with every wait and backoff removed
pub fn fast_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.collection.target_total = 30;
    config.collection.session_timeout_secs = 30;
    config.pagination = PaginationConfig {
        initial_delay_ms: 0,
        min_delay_ms: 0,
        max_delay_ms: 0,
        stagnation_limit: 3,
        max_attempts: 20,
        ..PaginationConfig::default()
    };
    config.sort_navigation.retry = RetryPolicy::immediate(2);
    config.sort_navigation.settle_delay_ms = 0;
    config.analysis.retry = RetryPolicy::immediate(2);
    config.analysis.inter_wave_delay_ms = 0;
    config.analysis.requests_per_second = 1_000;
    config.orchestrator.phase_retry = RetryPolicy::immediate(2);
    config
}

/// `count` distinct reviews with ratings cycling 1..=5
pub fn sample_reviews(count: usize, sort: SortOrder) -> Vec<Review> {
    (0..count)
        .map(|i| {
            let rating = u8::try_from(i % 5).unwrap_or(0) + 1;
            Review::new(format!("Guest {i}"), generated_text(i), rating, None, PLACE_URL, sort)
        })
        .collect()
}
