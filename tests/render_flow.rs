//! End-to-end rendering of a page of blocks and entities through the cache.

mod support;

use std::collections::{BTreeSet, HashMap};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use insta::assert_snapshot;
use render_cache::application::service::RenderCacheService;
use render_cache::cache::{
    CacheStore, CachedEntry, CachedRender, MemoryStore, RenderCacheConfig,
};
use render_cache::domain::tags::CacheTags;
use render_cache::domain::types::Expire;
use render_cache::infra::error::InfraError;
use render_cache::infra::fixture::{FixtureSite, KeyReport};

use support::{SITE_MARKUP, fixture, harness};

fn report<'a>(reports: &'a [KeyReport], kind: &str, id: &str) -> &'a KeyReport {
    reports
        .iter()
        .find(|report| report.kind == kind && report.id == id)
        .expect("object should be reported")
}

#[test]
fn first_pass_renders_nested_page_and_stores_cacheable_objects() {
    let h = harness(fixture(), RenderCacheConfig::default());

    let output = h.site.render(&h.service).expect("render should succeed");

    assert_eq!(output.markup, SITE_MARKUP);
    // Two full articles, the teaser inside the sidebar and the sidebar block.
    assert_eq!(h.store.len(), 4);
    assert!(output.deferred.is_empty());
}

#[test]
fn second_pass_is_served_from_cache_with_identical_output() {
    let h = harness(fixture(), RenderCacheConfig::default());

    let first = h.site.render(&h.service).expect("first pass");
    let second = h.site.render(&h.service).expect("second pass");

    assert_eq!(second.markup, first.markup);
    assert_eq!(second.cache_tags_header, first.cache_tags_header);
    assert_eq!(second.attached, first.attached);
    assert_eq!(h.store.len(), 4);
}

#[test]
fn cache_tags_header_aggregates_every_nested_object() {
    let h = harness(fixture(), RenderCacheConfig::default());

    let output = h.site.render(&h.service).expect("render should succeed");
    let header = output.cache_tags_header.expect("header should be set");

    assert_snapshot!(header, @"block:login block:recent block_view entity_view node:1 node:2 node_view page_view rendered theme:default theme_global_settings");
}

#[test]
fn cache_tags_header_can_be_disabled() {
    let config = RenderCacheConfig {
        send_cache_tags: false,
        ..RenderCacheConfig::default()
    };
    let h = harness(fixture(), config);

    let output = h.site.render(&h.service).expect("render should succeed");

    assert!(output.cache_tags_header.is_none());
}

#[test]
fn attached_assets_keep_first_seen_order() {
    let h = harness(fixture(), RenderCacheConfig::default());

    let first = h.site.render(&h.service).expect("first pass");
    let second = h.site.render(&h.service).expect("second pass");

    let expected = vec![(
        "css".to_string(),
        vec!["node.css".to_string(), "block.css".to_string()],
    )];
    assert_eq!(first.attached, expected);
    assert_eq!(second.attached, expected);
}

#[test]
fn cached_block_carries_tags_of_embedded_entities() {
    let h = harness(fixture(), RenderCacheConfig::default());
    h.site.render(&h.service).expect("render should succeed");

    let reports = h.site.cache_keys(&h.service).expect("keys");
    let cid = report(&reports, "block", "recent")
        .cid
        .clone()
        .expect("sidebar block should be cacheable");

    let entries = h
        .store
        .get_multiple(std::slice::from_ref(&cid), "cache_render")
        .expect("store read");
    let entry = entries.get(&cid).expect("block should be stored");

    assert!(entry.data.tags().contains("block", "recent"));
    assert!(entry.data.tags().contains("node", "1"));
    assert!(!entry.data.tags().contains("node", "2"));
    assert_eq!(
        entry.data.node.markup.as_deref(),
        Some(concat!(
            "<div class=\"block block-node\" id=\"block-recent\">",
            "<article class=\"node teaser\"><h2>First</h2><p>one</p></article>",
            "</div>",
        ))
    );
}

#[test]
fn cache_ids_follow_keys_granularity_and_hash() {
    let h = harness(fixture(), RenderCacheConfig::default());

    let reports = h.site.cache_keys(&h.service).expect("keys");
    let ids: Vec<(&str, &str)> = reports
        .iter()
        .map(|report| (report.kind.as_str(), report.id.as_str()))
        .collect();
    assert_eq!(
        ids,
        [
            ("entity", "2"),
            ("entity", "1"),
            ("block", "recent"),
            ("block", "login"),
            ("page", "page"),
        ]
    );

    let article = report(&reports, "entity", "1").cid.as_deref().expect("cid");
    let digest = article
        .strip_prefix("render_cache:entity:node:full:default:r.2:")
        .expect("entity cid prefix");
    assert_eq!(digest.len(), 64);

    let block = report(&reports, "block", "recent").cid.as_deref().expect("cid");
    assert!(block.starts_with("render_cache:block:sidebar:node:recent:default:r.2:"));

    // The login block declares no cache granularity.
    assert!(report(&reports, "block", "login").cid.is_none());
    // Page caching is opt-in.
    assert!(report(&reports, "page", "page").cid.is_none());
}

#[test]
fn changing_an_entity_changes_its_cache_id() {
    let h = harness(fixture(), RenderCacheConfig::default());
    let before = h.site.cache_keys(&h.service).expect("keys");

    let mut changed = fixture();
    changed.entities[0].changed = 101;
    let h2 = harness(changed, RenderCacheConfig::default());
    let after = h2.site.cache_keys(&h2.service).expect("keys");

    assert_ne!(
        report(&before, "entity", "1").cid,
        report(&after, "entity", "1").cid
    );
    assert_eq!(
        report(&before, "entity", "2").cid,
        report(&after, "entity", "2").cid
    );
}

#[test]
fn disabled_kind_renders_without_storing() {
    let config = RenderCacheConfig {
        disabled_kinds: BTreeSet::from(["entity".to_string()]),
        ..RenderCacheConfig::default()
    };
    let h = harness(fixture(), config);

    let output = h.site.render(&h.service).expect("render should succeed");

    assert_eq!(output.markup, SITE_MARKUP);
    assert_eq!(h.store.len(), 1);
}

#[test]
fn disabled_scope_only_affects_that_scope() {
    let config = RenderCacheConfig {
        disabled_scopes: BTreeSet::from(["block:sidebar".to_string()]),
        ..RenderCacheConfig::default()
    };
    let h = harness(fixture(), config);

    h.site.render(&h.service).expect("render should succeed");

    let reports = h.site.cache_keys(&h.service).expect("keys");
    assert!(report(&reports, "block", "recent").cid.is_none());
    assert!(report(&reports, "entity", "1").cid.is_some());
    assert_eq!(h.store.len(), 3);
}

#[test]
fn unsafe_request_methods_bypass_the_cache() {
    let mut posted = fixture();
    posted.request.method = "POST".to_string();
    let h = harness(posted, RenderCacheConfig::default());

    let output = h.site.render(&h.service).expect("render should succeed");

    assert_eq!(output.markup, SITE_MARKUP);
    assert!(h.store.is_empty());
}

#[test]
fn enabled_page_callback_caches_the_whole_page() {
    let config = RenderCacheConfig {
        enabled_pages: BTreeSet::from(["node_page_default".to_string()]),
        ..RenderCacheConfig::default()
    };
    let h = harness(fixture(), config);

    let first = h.site.render(&h.service).expect("first pass");
    assert_eq!(h.store.len(), 5);

    let reports = h.site.cache_keys(&h.service).expect("keys");
    let page = report(&reports, "page", "page").cid.as_deref().expect("page cid");
    assert!(page.starts_with("render_cache:page:node_page_default:default:r.2:http://localhost/:"));

    let second = h.site.render(&h.service).expect("second pass");
    assert_eq!(second.markup, first.markup);
    assert_eq!(second.markup, SITE_MARKUP);
}

#[test]
fn debug_output_wraps_objects_of_selected_kinds() {
    let config = RenderCacheConfig {
        debug_output: true,
        debug_output_kinds: BTreeSet::from(["block".to_string()]),
        ..RenderCacheConfig::default()
    };
    let h = harness(fixture(), config);

    let output = h.site.render(&h.service).expect("render should succeed");

    assert!(output.markup.contains("<!-- START RENDER ID: recent CACHE INFO: \n"));
    assert!(output.markup.contains("<!-- START RENDER ID: login CACHE INFO: \n"));
    assert!(output.markup.contains("* block.cid\n"));
    assert_eq!(output.markup.matches("<!-- END RENDER -->").count(), 2);
    assert!(!output.markup.contains("START RENDER ID: 1 "));
}

/// Store wrapper recording every cid the adapter asks for or writes.
struct RecordingStore {
    inner: MemoryStore,
    gets: Mutex<Vec<String>>,
    sets: Mutex<Vec<String>>,
}

impl CacheStore for RecordingStore {
    fn get_multiple(
        &self,
        cids: &[String],
        bin: &str,
    ) -> Result<HashMap<String, CachedEntry>, InfraError> {
        self.gets.lock().expect("gets").extend(cids.iter().cloned());
        self.inner.get_multiple(cids, bin)
    }

    fn set(&self, cid: &str, data: CachedRender, bin: &str, expire: Expire) -> Result<(), InfraError> {
        self.sets.lock().expect("sets").push(cid.to_string());
        self.inner.set(cid, data, bin, expire)
    }

    fn clear(&self, cid: &str, bin: &str) -> Result<(), InfraError> {
        self.inner.clear(cid, bin)
    }

    fn invalidate_tags(&self, tags: &CacheTags) -> Result<usize, InfraError> {
        self.inner.invalidate_tags(tags)
    }
}

#[test]
fn uncacheable_block_never_reaches_the_store() {
    let store = Arc::new(RecordingStore {
        inner: MemoryStore::new(NonZeroUsize::new(64).expect("non-zero")),
        gets: Mutex::new(Vec::new()),
        sets: Mutex::new(Vec::new()),
    });
    let site = FixtureSite::new(fixture());
    let service = site
        .register(RenderCacheService::builder(RenderCacheConfig::default(), store.clone()))
        .build();

    for _ in 0..2 {
        let output = site.render(&service).expect("render");
        assert_eq!(output.markup, SITE_MARKUP);
    }

    let gets = store.gets.lock().expect("gets");
    let sets = store.sets.lock().expect("sets");
    assert!(gets.iter().any(|cid| cid.contains(":recent:")));
    assert!(sets.iter().any(|cid| cid.contains(":recent:")));
    assert!(!gets.iter().any(|cid| cid.contains("login")));
    assert!(!sets.iter().any(|cid| cid.contains("login")));
    // The second pass is served entirely from the store.
    assert_eq!(sets.len(), 4);
}
