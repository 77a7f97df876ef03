use actix_web::web;

use super::handlers;

/// Configures the API routes
///
/// # Arguments
///
/// * `cfg` - The service configuration
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/chain", web::get().to(handlers::get_chain))
            .route("/transactions/pending", web::get().to(handlers::get_pending_transactions))
            .route("/transactions/new", web::post().to(handlers::new_transaction))
            .route("/mine", web::post().to(handlers::mine_block))
            .route("/mine/abort", web::post().to(handlers::abort_mining))
            .route("/validate", web::get().to(handlers::validate_chain))
            .route("/address/{address}/history", web::get().to(handlers::get_address_history))
            .route("/wallet/new", web::post().to(handlers::create_wallet))
    );
}
