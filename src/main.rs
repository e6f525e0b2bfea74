use std::sync::Arc;

use listing_matcher::embedding::loader::shared_model;
use listing_matcher::models::config::MatcherConfig;
use listing_matcher::processing::matcher::{ProductMatcher, process_match_message};
use listing_matcher::processing::{CancelFlag, ZMQMessage};
use listing_matcher::repository::csv::CsvCatalog;
use listing_matcher::verifier::MatchVerifier;
use listing_matcher::verifier::gemini::GeminiJudge;

fn open_catalog(config: &MatcherConfig) -> Option<Arc<CsvCatalog>> {
    match CsvCatalog::open(&config.catalog_a_path, &config.catalog_b_path) {
        Ok(catalog) => Some(Arc::new(catalog)),
        Err(e) => {
            log::error!("Failed to load catalogs: {e}");
            None
        }
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let config = match MatcherConfig::load() {
        Ok(config) => config,
        Err(e) => {
            log::error!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };
    let threshold = match config.threshold() {
        Ok(threshold) => threshold,
        Err(e) => {
            log::error!("Invalid match threshold: {e}");
            std::process::exit(1);
        }
    };

    let judge = match config.gemini_settings() {
        Ok(settings) => match GeminiJudge::new(settings) {
            Ok(judge) => judge,
            Err(e) => {
                log::error!("Failed to build verification client: {e}");
                std::process::exit(1);
            }
        },
        Err(e) => {
            log::error!("{e}");
            std::process::exit(1);
        }
    };

    let engine = match shared_model(config.model_sources()).engine().await {
        Ok(engine) => engine,
        Err(e) => {
            log::error!("Cannot start without an embedding model: {e}");
            std::process::exit(1);
        }
    };

    let matcher = Arc::new(ProductMatcher::new(
        engine,
        MatchVerifier::new(judge),
        config.matcher_settings(),
    ));

    let Some(mut catalog) = open_catalog(&config) else {
        std::process::exit(1);
    };

    let context = zmq::Context::new();
    let responder = match context.socket(zmq::PULL) {
        Ok(socket) => socket,
        Err(e) => {
            log::error!("Cannot create zmq socket: {e}");
            std::process::exit(1);
        }
    };
    if let Err(e) = responder.bind(&config.zmq_address) {
        log::error!("Cannot bind to {}: {e}", config.zmq_address);
        std::process::exit(1);
    }
    log::info!("Listening for match requests on {}", config.zmq_address);

    let mut current_job: Option<CancelFlag> = None;
    loop {
        let msg = match responder.recv_bytes(0) {
            Ok(msg) => msg,
            Err(e) => {
                log::error!("Failed to receive message: {e}");
                continue;
            }
        };
        match serde_json::from_slice::<ZMQMessage>(&msg) {
            Ok(ZMQMessage::Match(request)) => {
                let cancel = CancelFlag::new();
                if let Some(previous) = current_job.replace(cancel.clone()) {
                    previous.cancel();
                }
                let catalog = Arc::clone(&catalog);
                let matcher = Arc::clone(&matcher);
                tokio::spawn(async move {
                    let outcome =
                        process_match_message(request, catalog.as_ref(), &matcher, threshold, &cancel)
                            .await;
                    if let Some(outcome) = outcome {
                        match serde_json::to_string(&outcome) {
                            Ok(json) => log::info!("Match result: {json}"),
                            Err(e) => log::error!("Failed to serialize match result: {e}"),
                        }
                    }
                });
            }
            Ok(ZMQMessage::Reload) => {
                if let Some(reloaded) = open_catalog(&config) {
                    catalog = reloaded;
                    log::info!("Catalogs reloaded");
                }
            }
            Err(e) => log::error!("Failed to parse JSON: {e}"),
        }
    }
}
