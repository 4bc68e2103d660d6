//! Intake gateway binary

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use intake_gateway::{
    audit::JsonlAuditSink,
    auth::TokenInput,
    config::{Args, LogFormat},
    db::{MongoClient, MongoStore},
    llm::{CompletionSource, OpenAiSource, ScriptedSource},
    server::{self, AppState, StateConfig},
    store::{MemoryStore, Stores, DEV_PARENT_ID, DEV_STUDENT_ID},
};

/// Reply used when no completion endpoint is configured in dev mode
const DEV_REPLY: [&str; 4] = [
    "Thanks for sharing. ",
    "Could you tell me a little more ",
    "about what prompted you ",
    "to look for support?",
];

fn init_tracing(args: &Args) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("intake_gateway={},info", args.log_level).into());
    let registry = tracing_subscriber::registry().with(filter);

    match args.log_format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

async fn open_stores(args: &Args) -> anyhow::Result<Stores> {
    let mongo = match &args.mongodb_uri {
        Some(uri) => match MongoClient::new(uri, &args.mongodb_db).await {
            Ok(client) => {
                info!("MongoDB connected successfully");
                Some(MongoStore::open(&client).await?)
            }
            Err(e) if args.dev_mode => {
                warn!("MongoDB connection failed (dev mode, using in-memory stores): {}", e);
                None
            }
            Err(e) => return Err(e.into()),
        },
        None => {
            warn!("No MONGODB_URI (dev mode, using in-memory stores)");
            None
        }
    };

    let stores = match mongo {
        Some(store) => Stores::from_backend(Arc::new(store)),
        None => Stores::from_backend(Arc::new(dev_memory_store(args))),
    };

    Ok(match &args.audit_log_path {
        Some(path) => stores.with_audit_sink(Arc::new(JsonlAuditSink::open(path)?)),
        None => stores,
    })
}

/// In-memory store with a parent and student to sign in as
fn dev_memory_store(args: &Args) -> MemoryStore {
    let store = MemoryStore::seeded_for_dev();
    warn!(
        parent_id = DEV_PARENT_ID,
        student_id = DEV_STUDENT_ID,
        "Seeded in-memory store with a development parent and student"
    );

    let token = args.auth_config().build_validator().map(|v| {
        v.generate_token(TokenInput {
            actor_id: DEV_PARENT_ID.to_string(),
            email: None,
        })
    });
    match token {
        Some(Ok(token)) => info!("Development token for {}: {}", DEV_PARENT_ID, token),
        Some(Err(e)) => warn!("Could not mint a development token: {}", e),
        None => warn!("No JWT secret; the development parent cannot sign in"),
    }

    store
}

fn completion_source(args: &Args) -> anyhow::Result<Arc<dyn CompletionSource>> {
    match &args.llm_base_url {
        Some(url) => Ok(Arc::new(OpenAiSource::new(
            url.clone(),
            args.llm_model.clone(),
            args.llm_api_key.clone(),
        )?)),
        None => {
            warn!("No LLM_BASE_URL (dev mode, replies are scripted)");
            Ok(Arc::new(ScriptedSource::new(DEV_REPLY)))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    init_tracing(&args);

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  Intake Gateway");
    info!("======================================");
    info!("Listen: {}", args.listen);
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!("MongoDB database: {}", args.mongodb_db);
    info!("Model: {}", args.llm_model);
    info!("Onboarding steps: {}", args.onboarding_max_step);
    info!("======================================");

    let stores = match open_stores(&args).await {
        Ok(stores) => stores,
        Err(e) => {
            error!("Store initialization failed: {:#}", e);
            std::process::exit(1);
        }
    };

    let source = match completion_source(&args) {
        Ok(source) => source,
        Err(e) => {
            error!("Completion source failed to start: {:#}", e);
            std::process::exit(1);
        }
    };

    let auth = args.auth_config();
    let state = Arc::new(AppState::new(StateConfig::from(&args), &auth, stores, source));

    if let Err(e) = server::run(state, args.listen).await {
        error!("Server error: {:?}", e);
        std::process::exit(1);
    }

    Ok(())
}
