//! Deferred rendering through placeholders and render strategies.

mod support;

use std::num::NonZeroUsize;
use std::sync::Arc;

use render_cache::application::placeholder::FnPlaceholder;
use render_cache::application::service::RenderCacheService;
use render_cache::cache::placeholder::{ArgLoader, get_placeholder};
use render_cache::cache::{CacheInfo, MemoryStore, RenderCacheConfig, RenderToMarkup};
use render_cache::domain::error::DomainError;
use render_cache::domain::render::RenderNode;
use render_cache::domain::request::RequestInfo;
use serde_json::Value;

use support::{fixture_with_deferred_comment, harness};

const COMMENT: &str = "<article class=\"comment full\"><h2>Nice</h2><p>c</p></article>";
const FIRST_FULL: &str = "<article class=\"node full\"><h2>First</h2><p>one</p></article>";

#[test]
fn big_pipe_leaves_placeholder_and_records_it() {
    let h = harness(fixture_with_deferred_comment(&["big_pipe"]), RenderCacheConfig::default());

    let output = h.site.render(&h.service).expect("render should succeed");

    assert_eq!(output.deferred.len(), 1);
    let deferred = &output.deferred[0];
    assert_eq!(deferred.object.kind, "entity");
    assert_eq!(deferred.object.id, "7");
    assert!(deferred.object.cache_info.placeholder_id.is_some());
    assert!(output.markup.contains(&deferred.markup));
    assert!(output.markup.contains(
        "<render-cache-placeholder callback=\"render_cache.render_placeholders\""
    ));
    assert!(!output.markup.contains(COMMENT));
    // The comment itself is never rendered, so never stored.
    assert_eq!(h.store.len(), 4);
}

#[test]
fn direct_strategy_renders_in_place_and_caches_under_own_id() {
    let h = harness(fixture_with_deferred_comment(&["direct"]), RenderCacheConfig::default());

    let first = h.site.render(&h.service).expect("first pass");

    assert!(first.deferred.is_empty());
    assert!(!first.markup.contains("render-cache-placeholder"));
    assert!(first.markup.contains(&format!("{FIRST_FULL}{COMMENT}")));
    assert_eq!(h.store.len(), 5);

    let header = first.cache_tags_header.as_deref().expect("header");
    assert!(header.split(' ').any(|tag| tag == "comment:7"));

    let second = h.site.render(&h.service).expect("second pass");
    assert_eq!(second.markup, first.markup);
    assert_eq!(h.store.len(), 5);
}

#[test]
fn esi_validate_emits_include_when_edge_supports_it() {
    let mut fixture = fixture_with_deferred_comment(&["esi_validate"]);
    fixture.request.esi_validate = true;
    let h = harness(fixture, RenderCacheConfig::default());

    let output = h.site.render(&h.service).expect("render should succeed");

    assert!(output.markup.contains(
        "<esi:include src=\"/render-cache/esi-validate-render?cid=render_cache%3Aentity%3Acomment%3Afull%3Adefault%3Ar.2%3A"
    ));
    assert!(output.markup.contains("&bin=cache_render\" />"));
    assert!(!output.markup.contains(COMMENT));
}

#[test]
fn esi_validate_falls_through_to_direct_without_edge_support() {
    let h = harness(
        fixture_with_deferred_comment(&["esi_validate"]),
        RenderCacheConfig::default(),
    );

    let output = h.site.render(&h.service).expect("render should succeed");

    assert!(!output.markup.contains("<esi:include"));
    assert!(output.markup.contains(COMMENT));
}

#[test]
fn unknown_strategy_is_skipped() {
    let h = harness(
        fixture_with_deferred_comment(&["no_such_strategy", "big_pipe"]),
        RenderCacheConfig::default(),
    );

    let output = h.site.render(&h.service).expect("render should succeed");

    assert_eq!(output.deferred.len(), 1);
    assert_eq!(output.deferred[0].object.id, "7");
}

struct UserName;

impl ArgLoader for UserName {
    fn load(&self, value: &Value) -> Result<Value, DomainError> {
        let uid = value
            .as_u64()
            .ok_or_else(|| DomainError::validation("uid must be a number"))?;
        Ok(Value::from(format!("user-{uid}")))
    }
}

fn direct_info() -> CacheInfo {
    let mut info = CacheInfo::new("cache_render");
    info.render_to_markup = RenderToMarkup::Enabled;
    info.finalize();
    info
}

fn service() -> RenderCacheService {
    let store = Arc::new(MemoryStore::new(NonZeroUsize::new(8).expect("non-zero")));
    RenderCacheService::builder(RenderCacheConfig::default(), store)
        .loader("user", Arc::new(UserName))
        .placeholder_function(
            "greeting",
            Arc::new(FnPlaceholder(|args: &[Value]| {
                let name = args.first().and_then(Value::as_str).unwrap_or_default();
                RenderNode::markup(format!("Hello {name}")).with_asset("js", "greeting.js")
            })),
        )
        .placeholder_function(
            "wrapper",
            Arc::new(FnPlaceholder(|_: &[Value]| {
                // Content that itself defers more content.
                let inner = get_placeholder(
                    "greeting",
                    vec![("%user".to_string(), Value::from(9))],
                    false,
                );
                RenderNode::new().with_child("inner", inner)
            })),
        )
        .build()
}

#[test]
fn single_placeholder_resolves_loader_arguments() {
    let service = service();
    let mut scope = service.begin_request(RequestInfo::default());
    let mut renderer = service.renderer(&mut scope);

    let placeholder = get_placeholder("greeting", vec![("%user".to_string(), Value::from(5))], false);
    let mut node = RenderNode::markup(format!(
        "<p>{}</p>",
        placeholder.markup.as_deref().unwrap_or_default()
    ));
    node.post_render_cache = placeholder.post_render_cache.clone();

    renderer
        .process_post_render_cache(&mut node, &direct_info())
        .expect("post render should succeed");

    assert_eq!(node.markup.as_deref(), Some("<p>Hello user-5</p>"));
    assert_eq!(node.attached.get("js"), ["greeting.js"]);
    assert!(node.post_render_cache.is_empty());
}

#[test]
fn placeholders_inside_placeholder_content_resolve_in_later_rounds() {
    let service = service();
    let mut scope = service.begin_request(RequestInfo::default());
    let mut renderer = service.renderer(&mut scope);

    let outer = get_placeholder("wrapper", Vec::new(), false);
    let mut node = RenderNode::markup(format!(
        "<div>{}</div>",
        outer.markup.as_deref().unwrap_or_default()
    ));
    node.post_render_cache = outer.post_render_cache.clone();

    renderer
        .process_post_render_cache(&mut node, &direct_info())
        .expect("post render should succeed");

    assert_eq!(node.markup.as_deref(), Some("<div>Hello user-9</div>"));
    assert_eq!(renderer.stack().recursion_level(), 0);
}

#[test]
fn unknown_loader_passes_value_through() {
    let service = service();
    let mut scope = service.begin_request(RequestInfo::default());
    let mut renderer = service.renderer(&mut scope);

    let mut node = get_placeholder(
        "greeting",
        vec![("%missing".to_string(), Value::from("guest"))],
        false,
    );

    renderer
        .process_post_render_cache(&mut node, &direct_info())
        .expect("post render should succeed");

    assert_eq!(node.markup.as_deref(), Some("Hello guest"));
}

#[test]
fn failing_loader_is_an_error() {
    let service = service();
    let mut scope = service.begin_request(RequestInfo::default());
    let mut renderer = service.renderer(&mut scope);

    let mut node = get_placeholder(
        "greeting",
        vec![("%user".to_string(), Value::from("not a uid"))],
        false,
    );

    let result = renderer.process_post_render_cache(&mut node, &direct_info());

    assert!(result.is_err());
    assert_eq!(renderer.stack().recursion_level(), 0);
}
