use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use log::{debug, info};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use aurelia::api::{self, handlers, AppState};
use aurelia::blockchain::{self, Blockchain, ChannelBroadcaster};
use aurelia::config::Settings;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::get_chain,
        handlers::get_pending_transactions,
        handlers::new_transaction,
        handlers::mine_block,
        handlers::abort_mining,
        handlers::validate_chain,
        handlers::get_address_history,
        handlers::create_wallet
    ),
    components(
        schemas(
            blockchain::Block,
            blockchain::Transaction,
            blockchain::Address,
            blockchain::DigitalSignature,
            handlers::ChainResponse,
            handlers::TransactionRequest,
            handlers::TransactionResponse,
            handlers::MineRequest,
            handlers::MineResponse,
            handlers::RejectedResponse,
            handlers::ValidationResponse,
            handlers::HistoryResponse,
            handlers::WalletResponse
        )
    ),
    tags(
        (name = "blockchain", description = "Aurelia ledger API endpoints")
    ),
    info(
        title = "Aurelia API",
        version = "0.1.0",
        description = "A minimal proof-of-work ledger",
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    )
)]
struct ApiDoc;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let settings = Settings::from_env()?;
    info!(
        "Starting ledger with difficulty {} and mining reward {}",
        settings.chain.difficulty, settings.chain.mining_reward
    );

    // Peer fan-out is outside this node; drain the broadcast queue so it never grows
    let (broadcaster, mut outbound) = ChannelBroadcaster::new();
    actix_web::rt::spawn(async move {
        while let Some(transaction) = outbound.recv().await {
            debug!("Transaction {} ready for peers", transaction.id());
        }
    });

    let blockchain = Blockchain::new(settings.chain.clone()).with_broadcaster(Arc::new(broadcaster));
    let state = web::Data::new(AppState::new(blockchain));

    info!(
        "Starting HTTP server at http://{}:{}",
        settings.host, settings.port
    );

    HttpServer::new(move || {
        // Configure CORS
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .wrap(middleware::Logger::default())
            .wrap(cors)
            .app_data(state.clone())
            // API routes
            .configure(api::configure_routes)
            // Swagger UI
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-docs/openapi.json", ApiDoc::openapi()),
            )
    })
    .bind((settings.host.as_str(), settings.port))?
    .run()
    .await?;

    Ok(())
}
