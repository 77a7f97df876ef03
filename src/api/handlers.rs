use std::sync::{Mutex, PoisonError};

use actix_web::{web, HttpResponse};
use log::{error, info};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::blockchain::{
    Address, Block, Blockchain, BlockchainError, CancellationToken, Transaction, Wallet,
};

/// Shared state handed to every handler
#[derive(Debug)]
pub struct AppState {
    pub blockchain: Blockchain,

    /// Cancellation token of the mining run in flight, if any
    mining: Mutex<Option<CancellationToken>>,
}

impl AppState {
    pub fn new(blockchain: Blockchain) -> Self {
        AppState {
            blockchain,
            mining: Mutex::new(None),
        }
    }

    /// Registers a new mining run; `None` if one is already running
    fn start_mining(&self) -> Option<CancellationToken> {
        let mut mining = self.mining.lock().unwrap_or_else(PoisonError::into_inner);
        if mining.is_some() {
            return None;
        }
        let token = CancellationToken::new();
        *mining = Some(token.clone());
        Some(token)
    }

    fn finish_mining(&self) {
        *self.mining.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Cancels the mining run in flight; false if there is none
    pub fn abort_mining(&self) -> bool {
        match &*self.mining.lock().unwrap_or_else(PoisonError::into_inner) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

/// Data structure for the node state
pub type AppData = web::Data<AppState>;

/// Clears the in-flight mining run when dropped, so the flag is reset even
/// if the request that started the run goes away first
struct MiningGuard(AppData);

impl Drop for MiningGuard {
    fn drop(&mut self) {
        self.0.finish_mining();
    }
}

fn error_body(message: impl Into<String>) -> serde_json::Value {
    serde_json::json!({ "error": message.into() })
}

/// Response for the chain endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ChainResponse {
    /// The length of the chain
    pub length: usize,

    /// The blocks in the chain
    pub chain: Vec<Block>,

    /// Whether the chain is valid
    pub is_valid: bool,
}

/// Request for the transaction endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct TransactionRequest {
    /// The sender's address
    pub sender: String,

    /// The recipient's address (0x...)
    pub recipient: String,

    /// The amount to transfer
    pub amount: f64,

    /// The transaction fee
    pub fee: f64,

    /// The sender's private key (hex, for signing)
    pub private_key: String,
}

/// Response for the transaction endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct TransactionResponse {
    /// The message
    pub message: String,

    /// The id of the pooled transaction
    pub transaction_id: String,

    /// The index of the block that will include this transaction
    pub block_index: u64,
}

/// Request for the mine endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct MineRequest {
    /// The address receiving the block reward and fees
    pub miner_address: String,
}

/// A pending transaction left out of the mined block
#[derive(Serialize, Deserialize, ToSchema)]
pub struct RejectedResponse {
    pub transaction_id: String,
    pub reason: String,
}

/// Response for the mine endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct MineResponse {
    /// The message
    pub message: String,

    /// The newly mined block
    pub block: Block,

    /// Transactions skipped because they failed verification
    pub rejected: Vec<RejectedResponse>,

    /// Number of hashes computed
    pub hash_attempts: u64,
}

/// Response for the validate endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ValidationResponse {
    /// Whether the chain is valid
    pub is_valid: bool,

    /// Index of the first invalid block
    pub block_index: Option<u64>,

    /// Description of the first violation
    pub error: Option<String>,
}

/// Response for the address history endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct HistoryResponse {
    pub address: String,

    /// Confirmed transactions, oldest first
    pub transactions: Vec<Transaction>,
}

/// Response for the create wallet endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct WalletResponse {
    /// The wallet's address
    pub address: String,

    /// The wallet's private key (hex encoded)
    pub private_key: String,
}

/// Get the full blockchain
///
/// Returns the entire blockchain and its validity status
#[utoipa::path(
    get,
    path = "/api/v1/chain",
    responses(
        (status = 200, description = "Blockchain retrieved successfully", body = ChainResponse)
    )
)]
pub async fn get_chain(state: AppData) -> HttpResponse {
    let chain: Vec<Block> = state
        .blockchain
        .get_blockchain()
        .iter()
        .map(|block| block.as_ref().clone())
        .collect();

    let response = ChainResponse {
        length: chain.len(),
        chain,
        is_valid: state.blockchain.is_valid(),
    };

    HttpResponse::Ok().json(response)
}

/// Get all pending transactions
///
/// Returns all transactions waiting to be included in a block
#[utoipa::path(
    get,
    path = "/api/v1/transactions/pending",
    responses(
        (status = 200, description = "Pending transactions retrieved successfully", body = Vec<Transaction>)
    )
)]
pub async fn get_pending_transactions(state: AppData) -> HttpResponse {
    HttpResponse::Ok().json(state.blockchain.pending_transactions())
}

/// Create a new transaction
///
/// Signs the transaction with the given key and adds it to the pool
#[utoipa::path(
    post,
    path = "/api/v1/transactions/new",
    request_body = TransactionRequest,
    responses(
        (status = 201, description = "Transaction created successfully", body = TransactionResponse),
        (status = 400, description = "Invalid transaction data")
    )
)]
pub async fn new_transaction(
    state: AppData,
    transaction_req: web::Json<TransactionRequest>,
) -> HttpResponse {
    let sender: Address = match transaction_req.sender.parse() {
        Ok(address) => address,
        Err(err) => {
            return HttpResponse::BadRequest()
                .json(error_body(format!("Invalid sender address: {}", err)))
        }
    };

    let recipient: Address = match transaction_req.recipient.parse() {
        Ok(address) => address,
        Err(err) => {
            return HttpResponse::BadRequest()
                .json(error_body(format!("Invalid recipient address: {}", err)))
        }
    };

    let mut transaction = match Transaction::new(
        sender,
        recipient,
        transaction_req.amount,
        transaction_req.fee,
    ) {
        Ok(transaction) => transaction,
        Err(err) => return HttpResponse::BadRequest().json(error_body(err.to_string())),
    };

    if let Err(err) = transaction.sign_with_secret_hex(&transaction_req.private_key) {
        return HttpResponse::BadRequest().json(error_body(err.to_string()));
    }

    let transaction_id = transaction.id().to_string();
    match state.blockchain.submit_transaction(transaction) {
        Ok(block_index) => HttpResponse::Created().json(TransactionResponse {
            message: "Transaction will be added to Block".to_string(),
            transaction_id,
            block_index,
        }),
        Err(err) => HttpResponse::BadRequest()
            .json(error_body(format!("Failed to add transaction: {}", err))),
    }
}

/// Mine a new block
///
/// Creates a new block with all pending transactions
#[utoipa::path(
    post,
    path = "/api/v1/mine",
    request_body = MineRequest,
    responses(
        (status = 200, description = "Block mined successfully", body = MineResponse),
        (status = 400, description = "Invalid mining request"),
        (status = 409, description = "Mining already running or aborted"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn mine_block(state: AppData, mine_req: web::Json<MineRequest>) -> HttpResponse {
    let miner_address: Address = match mine_req.miner_address.parse() {
        Ok(address) => address,
        Err(err) => {
            return HttpResponse::BadRequest()
                .json(error_body(format!("Invalid miner address: {}", err)))
        }
    };

    let cancel = match state.start_mining() {
        Some(token) => token,
        None => return HttpResponse::Conflict().json(error_body("Mining already in progress")),
    };

    let guard = MiningGuard(state.clone());
    let blockchain = state.blockchain.clone();
    let result = web::block(move || {
        let _guard = guard;
        blockchain.mine(&miner_address, &cancel)
    })
    .await;

    match result {
        Ok(Ok(outcome)) => HttpResponse::Ok().json(MineResponse {
            message: "New Block Mined".to_string(),
            block: outcome.block.as_ref().clone(),
            rejected: outcome
                .rejected
                .iter()
                .map(|rejected| RejectedResponse {
                    transaction_id: rejected.transaction.id().to_string(),
                    reason: rejected.error.to_string(),
                })
                .collect(),
            hash_attempts: outcome.stats.hash_attempts,
        }),
        Ok(Err(err @ BlockchainError::MiningAborted { .. })) => {
            HttpResponse::Conflict().json(error_body(err.to_string()))
        }
        Ok(Err(err)) => HttpResponse::BadRequest()
            .json(error_body(format!("Failed to mine block: {}", err))),
        Err(err) => {
            error!("Mining task failed: {}", err);
            HttpResponse::InternalServerError().json(error_body("Mining task failed"))
        }
    }
}

/// Abort mining
///
/// Cancels the proof-of-work search in flight; pending transactions stay in the pool
#[utoipa::path(
    post,
    path = "/api/v1/mine/abort",
    responses(
        (status = 202, description = "Abort requested"),
        (status = 409, description = "No mining in progress")
    )
)]
pub async fn abort_mining(state: AppData) -> HttpResponse {
    if state.abort_mining() {
        info!("Mining abort requested");
        HttpResponse::Accepted().json(serde_json::json!({ "message": "Mining abort requested" }))
    } else {
        HttpResponse::Conflict().json(error_body("No mining in progress"))
    }
}

/// Check if the blockchain is valid
///
/// Re-validates every block and reports the first violation
#[utoipa::path(
    get,
    path = "/api/v1/validate",
    responses(
        (status = 200, description = "Blockchain validation status", body = ValidationResponse)
    )
)]
pub async fn validate_chain(state: AppData) -> HttpResponse {
    let response = match state.blockchain.validate_chain() {
        Ok(()) => ValidationResponse {
            is_valid: true,
            block_index: None,
            error: None,
        },
        Err(err) => ValidationResponse {
            is_valid: false,
            block_index: err.block_index(),
            error: Some(err.to_string()),
        },
    };

    HttpResponse::Ok().json(response)
}

/// Get address history
///
/// Returns confirmed transactions sent or received by the address, oldest first
#[utoipa::path(
    get,
    path = "/api/v1/address/{address}/history",
    params(
        ("address" = String, Path, description = "Address to look up (0x...)")
    ),
    responses(
        (status = 200, description = "History retrieved successfully", body = HistoryResponse),
        (status = 400, description = "Invalid address")
    )
)]
pub async fn get_address_history(state: AppData, address: web::Path<String>) -> HttpResponse {
    let address: Address = match address.into_inner().parse() {
        Ok(address) => address,
        Err(err) => {
            return HttpResponse::BadRequest().json(error_body(format!("Invalid address: {}", err)))
        }
    };

    let history = state.blockchain.get_address_history(&address);

    HttpResponse::Ok().json(HistoryResponse {
        address: address.0.clone(),
        transactions: history.iter().cloned().collect(),
    })
}

/// Create a new wallet
///
/// Creates a new wallet with a random keypair
///
/// The private key must be stored by your own
#[utoipa::path(
    post,
    path = "/api/v1/wallet/new",
    responses(
        (status = 201, description = "Wallet created successfully", body = WalletResponse)
    )
)]
pub async fn create_wallet() -> HttpResponse {
    let wallet = Wallet::new();

    HttpResponse::Created().json(WalletResponse {
        address: wallet.address().0.clone(),
        private_key: wallet.export_secret_hex(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::configure_routes;
    use crate::config::ChainConfig;
    use actix_web::http::StatusCode;
    use actix_web::{test, App};

    fn test_state() -> AppData {
        web::Data::new(AppState::new(Blockchain::new(ChainConfig {
            difficulty: 1,
            mining_reward: 50.0,
        })))
    }

    #[actix_web::test]
    async fn test_submit_mine_and_query() {
        let state = test_state();
        let app = test::init_service(
            App::new()
                .app_data(state.clone())
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::post().uri("/api/v1/wallet/new").to_request();
        let wallet: WalletResponse = test::call_and_read_body_json(&app, req).await;

        let req = test::TestRequest::post()
            .uri("/api/v1/transactions/new")
            .set_json(TransactionRequest {
                sender: wallet.address.clone(),
                recipient: "0xB".to_string(),
                amount: 10.0,
                fee: 1.0,
                private_key: wallet.private_key.clone(),
            })
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);

        let req = test::TestRequest::post()
            .uri("/api/v1/mine")
            .set_json(MineRequest {
                miner_address: "0xC".to_string(),
            })
            .to_request();
        let mined: MineResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(mined.block.index, 1);
        assert_eq!(mined.block.transactions.len(), 2);
        assert!(mined.rejected.is_empty());

        let req = test::TestRequest::get()
            .uri("/api/v1/address/0xB/history")
            .to_request();
        let history: HistoryResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(history.transactions.len(), 1);
        assert_eq!(history.transactions[0].amount(), 10.0);

        let req = test::TestRequest::get().uri("/api/v1/validate").to_request();
        let validation: ValidationResponse = test::call_and_read_body_json(&app, req).await;
        assert!(validation.is_valid);

        let req = test::TestRequest::get().uri("/api/v1/chain").to_request();
        let chain: ChainResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(chain.length, 2);
    }

    #[actix_web::test]
    async fn test_rejects_invalid_transaction_requests() {
        let state = test_state();
        let app = test::init_service(
            App::new()
                .app_data(state.clone())
                .configure(configure_routes),
        )
        .await;
        let wallet = Wallet::new();

        let cases = [
            ("0xB", 0.0, 1.0, wallet.export_secret_hex()),
            ("0xB", 5.0, -1.0, wallet.export_secret_hex()),
            ("B", 5.0, 1.0, wallet.export_secret_hex()),
            ("0xB", 5.0, 1.0, "not a key".to_string()),
            ("0xB", 5.0, 1.0, Wallet::new().export_secret_hex()),
        ];

        for (recipient, amount, fee, private_key) in cases {
            let req = test::TestRequest::post()
                .uri("/api/v1/transactions/new")
                .set_json(TransactionRequest {
                    sender: wallet.address().0.clone(),
                    recipient: recipient.to_string(),
                    amount,
                    fee,
                    private_key,
                })
                .to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        }

        assert!(state.blockchain.pending_transactions().is_empty());
    }

    #[actix_web::test]
    async fn test_abort_without_mining() {
        let state = test_state();
        let app = test::init_service(
            App::new()
                .app_data(state.clone())
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::post().uri("/api/v1/mine/abort").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[actix_web::test]
    async fn test_app_state_tracks_single_mining_run() {
        let state = AppState::new(Blockchain::default());

        let token = state.start_mining().unwrap();
        assert!(state.start_mining().is_none());

        assert!(state.abort_mining());
        assert!(token.is_cancelled());

        state.finish_mining();
        assert!(!state.abort_mining());
    }

    #[actix_web::test]
    async fn test_dropped_mining_guard_frees_the_node() {
        let state = test_state();

        let token = state.start_mining().unwrap();
        let guard = MiningGuard(state.clone());

        // The request future was dropped while the run was still going
        drop(guard);

        assert!(!state.abort_mining());
        assert!(!token.is_cancelled());
        assert!(state.start_mining().is_some());
    }

    #[actix_web::test]
    async fn test_mine_again_after_a_finished_run() {
        let state = test_state();
        let app = test::init_service(
            App::new()
                .app_data(state.clone())
                .configure(configure_routes),
        )
        .await;

        for expected in 1..=2 {
            let req = test::TestRequest::post()
                .uri("/api/v1/mine")
                .set_json(MineRequest {
                    miner_address: "0xC".to_string(),
                })
                .to_request();
            let mined: MineResponse = test::call_and_read_body_json(&app, req).await;
            assert_eq!(mined.block.index, expected);
        }

        assert!(!state.abort_mining());
    }

    #[actix_web::test]
    async fn test_history_lookup_ignores_address_case() {
        let state = test_state();
        let app = test::init_service(
            App::new()
                .app_data(state.clone())
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/v1/mine")
            .set_json(MineRequest {
                miner_address: "0xC".to_string(),
            })
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        for uri in ["/api/v1/address/0xc/history", "/api/v1/address/0xC/history"] {
            let req = test::TestRequest::get().uri(uri).to_request();
            let history: HistoryResponse = test::call_and_read_body_json(&app, req).await;
            assert_eq!(history.address, "0xc");
            assert_eq!(history.transactions.len(), 1);
        }
    }
}
