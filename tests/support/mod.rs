#![allow(dead_code)]

use std::num::NonZeroUsize;
use std::sync::Arc;

use render_cache::application::service::RenderCacheService;
use render_cache::cache::{MemoryStore, RenderCacheConfig};
use render_cache::infra::fixture::{Fixture, FixtureSite};

/// Front page with two articles, a cached sidebar block embedding the first
/// article and an uncacheable login block.
pub const SITE: &str = r#"{
    "request": { "roles": [2] },
    "entities": [
        { "entity_type": "node", "id": "1", "revision_id": "10", "bundle": "article",
          "label": "First", "body": "<p>one</p>", "changed": 100 },
        { "entity_type": "node", "id": "2", "bundle": "article",
          "label": "Second", "body": "<p>two</p>", "changed": 200 },
        { "entity_type": "comment", "id": "7", "label": "Nice", "body": "<p>c</p>", "changed": 300 }
    ],
    "content": {
        "view_mode": "full",
        "entities": [
            { "entity_type": "node", "id": "2" },
            { "entity_type": "node", "id": "1" }
        ]
    },
    "regions": [
        { "name": "sidebar", "blocks": [
            { "bid": "recent", "module": "node", "delta": "recent", "cache": 1,
              "entities": [{ "entity_type": "node", "id": "1" }] },
            { "bid": "login", "module": "user", "delta": "login", "body": "<form></form>" }
        ] }
    ]
}"#;

pub const SITE_MARKUP: &str = concat!(
    "<html><body>",
    "<article class=\"node full\"><h2>Second</h2><p>two</p></article>",
    "<article class=\"node full\"><h2>First</h2><p>one</p></article>",
    "<div class=\"block block-node\" id=\"block-recent\">",
    "<article class=\"node teaser\"><h2>First</h2><p>one</p></article>",
    "</div>",
    "<div class=\"block block-user\" id=\"block-login\"><form></form></div>",
    "</body></html>",
);

pub fn fixture() -> Fixture {
    Fixture::from_json(SITE).expect("fixture should parse")
}

/// The site fixture with the comment appended to the main content and
/// deferred through `strategies`.
pub fn fixture_with_deferred_comment(strategies: &[&str]) -> Fixture {
    let mut fixture = fixture();
    if let Some(content) = fixture.content.as_mut() {
        content.entities.push(render_cache::infra::fixture::EntityRef {
            entity_type: "comment".to_string(),
            id: "7".to_string(),
        });
    }
    fixture.deferred.insert(
        "comment".to_string(),
        strategies.iter().map(|name| name.to_string()).collect(),
    );
    fixture
}

pub struct Harness {
    pub site: FixtureSite,
    pub store: Arc<MemoryStore>,
    pub service: RenderCacheService,
}

pub fn harness(fixture: Fixture, config: RenderCacheConfig) -> Harness {
    let store = Arc::new(MemoryStore::new(
        NonZeroUsize::new(64).expect("capacity should be non-zero"),
    ));
    harness_with_store(fixture, config, store)
}

/// A harness over an existing store, e.g. to render an edited site against
/// entries a previous harness left behind.
pub fn harness_with_store(
    fixture: Fixture,
    config: RenderCacheConfig,
    store: Arc<MemoryStore>,
) -> Harness {
    let site = FixtureSite::new(fixture);
    let service = site
        .register(RenderCacheService::builder(config, store.clone()))
        .build();
    Harness {
        site,
        store,
        service,
    }
}
