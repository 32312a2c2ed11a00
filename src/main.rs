use std::process;
use std::sync::Arc;

use render_cache::{
    application::{error::AppError, service::RenderCacheService},
    cache::{CacheStore, MemoryStore, RenderCacheConfig},
    config::{self, Command, KeysArgs, RenderArgs, Settings},
    domain::tags::CacheTags,
    infra::{
        fixture::{Fixture, FixtureSite},
        telemetry,
    },
};
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

fn main() {
    if let Err(error) = run() {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, chain = ?error.report(), "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, chain = ?error.report(), "application error");
    });
}

fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::configuration(format!("failed to load configuration: {err}")))?;

    telemetry::init(&settings.logging)?;

    match cli_args.command {
        Command::Render(args) => run_render(&settings, args),
        Command::Keys(args) => run_keys(&settings, args),
    }
}

fn build_service(settings: &Settings, site: &FixtureSite, store: Arc<MemoryStore>) -> RenderCacheService {
    let config = RenderCacheConfig::from(settings);
    site.register(RenderCacheService::builder(config, store)).build()
}

fn run_render(settings: &Settings, args: RenderArgs) -> Result<(), AppError> {
    let fixture = Fixture::load(&args.fixture)?;
    let store = Arc::new(MemoryStore::new(settings.store.capacity_per_bin));
    let site = FixtureSite::new(fixture);
    let service = build_service(settings, &site, Arc::clone(&store));
    let invalidate = CacheTags::from_tokens(&args.invalidate);

    info!(
        target = "render_cache::render",
        fixture = %args.fixture.display(),
        passes = args.passes,
        enabled = settings.render_cache.enabled,
        "Rendering fixture"
    );

    for pass in 1..=args.passes {
        if pass > 1 && !invalidate.is_empty() {
            let removed = store.invalidate_tags(&invalidate)?;
            info!(pass, removed, tags = %invalidate.to_header_value(), "Invalidated cache tags");
        }

        let output = site.render(&service)?;
        println!("== pass {pass} ==");
        if let Some(header) = output.cache_tags_header.as_deref() {
            println!("{}: {header}", render_cache::application::service::CACHE_TAGS_HEADER);
        }
        for (kind, items) in &output.attached {
            println!("attached {kind}: {}", items.join(" "));
        }
        for deferred in &output.deferred {
            println!("deferred {}:{}", deferred.object.kind, deferred.object.id);
        }
        println!("{}", output.markup);

        info!(pass, entries = store.len(), deferred = output.deferred.len(), "Pass complete");
    }

    Ok(())
}

fn run_keys(settings: &Settings, args: KeysArgs) -> Result<(), AppError> {
    let fixture = Fixture::load(&args.fixture)?;
    let store = Arc::new(MemoryStore::new(settings.store.capacity_per_bin));
    let site = FixtureSite::new(fixture);
    let service = build_service(settings, &site, store);

    for report in site.cache_keys(&service)? {
        println!("{}", serde_json::to_string(&report)?);
    }
    Ok(())
}
