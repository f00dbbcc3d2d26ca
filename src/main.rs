use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::U256;
use tokio::sync::mpsc;

use billing_sidecar::auth::AuthGateway;
use billing_sidecar::chain::{ChainClient, Eip155Chain};
use billing_sidecar::config::Config;
use billing_sidecar::generator::PeriodicGenerator;
use billing_sidecar::handlers::{self, AppState};
use billing_sidecar::hooks::{Hooks, Pricing};
use billing_sidecar::nonce::NonceAllocator;
use billing_sidecar::proxy::{BalanceGate, Proxy};
use billing_sidecar::provisioning_client::ProvisioningClient;
use billing_sidecar::sig_down::SigDown;
use billing_sidecar::signer::VoucherSigner;
use billing_sidecar::settler::Settler;
use billing_sidecar::stop_handler::StopHandler;
use billing_sidecar::store::{RedisStore, Store};
use billing_sidecar::telemetry;

const STOP_CHANNEL_CAPACITY: usize = 256;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(15);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    telemetry::init();

    let config = Config::load()?;
    let sig_down = SigDown::try_new()?;
    let cancellation_token = sig_down.cancellation_token();

    let mut store_url = config.store.url.clone();
    if let Some(password) = &config.store.password {
        store_url
            .set_password(Some(password.as_str()))
            .map_err(|()| "store url cannot carry a password (e.g. a unix-socket url)")?;
    }
    let store: Arc<dyn Store> = Arc::new(RedisStore::connect(store_url.as_str()).await?);

    let tee_key = config.chain.tee_signer_key.into_inner();
    let tee_key_bytes = alloy_primitives::B256::from(*tee_key.as_bytes());
    let eip155_chain = Arc::new(
        Eip155Chain::connect(config.chain.rpc_url.as_str(), &tee_key_bytes, config.chain.settlement_contract).await?,
    );
    // Both trait objects unsize from the same concrete `Arc<Eip155Chain>` rather than
    // from one another, so the settler/balance-gate and the nonce allocator each see
    // only the capability they need.
    let chain: Arc<dyn ChainClient> = eip155_chain.clone();

    let signer_key = alloy_signer_local::PrivateKeySigner::from_bytes(&tee_key_bytes)?;
    let voucher_signer = Arc::new(VoucherSigner::new(
        store.clone(),
        signer_key,
        config.chain.chain_id,
        config.chain.settlement_contract,
    ));
    let nonce_allocator = Arc::new(NonceAllocator::new(store.clone(), eip155_chain.clone()));

    let pricing = Pricing {
        create_fee: parse_u256(&config.pricing.create_fee)?,
        compute_price_per_sec: parse_u256(&config.pricing.compute_price_per_sec)?,
    };
    let hooks = Arc::new(Hooks::new(store.clone(), nonce_allocator.clone(), voucher_signer.clone(), pricing));

    let backend = ProvisioningClient::new(config.provisioning.base_url.as_str(), config.provisioning.admin_key.into_inner())?;

    let balance_gate = match &config.pricing.minimum_balance {
        Some(raw) => Some(BalanceGate { chain: chain.clone(), minimum_balance: parse_u256(raw)? }),
        None => None,
    };
    let proxy = Arc::new(Proxy::new(backend.clone(), hooks.clone(), config.chain.provider_address, balance_gate));

    let auth_gateway = Arc::new(AuthGateway::new(store.clone()));

    let (stop_tx, stop_rx) = mpsc::channel(STOP_CHANNEL_CAPACITY);
    let voucher_interval = Duration::from_secs(config.voucher_interval_secs);

    let generator = PeriodicGenerator::new(store.clone(), nonce_allocator.clone(), voucher_signer.clone(), pricing, voucher_interval);
    let settler = Settler::new(
        store.clone(),
        chain.clone(),
        config.chain.provider_address,
        voucher_interval,
        stop_tx.clone(),
    );
    let stop_handler = Arc::new(StopHandler::new(store.clone(), backend));

    stop_handler.recover_pending_stops(&stop_tx).await;

    let generator_token = cancellation_token.clone();
    tokio::spawn(async move { generator.run(generator_token).await });

    let settler_token = cancellation_token.clone();
    tokio::spawn(async move { settler.run(settler_token).await });

    let stop_handler_for_task = stop_handler.clone();
    let stop_handler_token = cancellation_token.clone();
    tokio::spawn(async move { stop_handler_for_task.run(stop_rx, stop_handler_token).await });

    let app_state = AppState { proxy, auth: auth_gateway };
    let router = handlers::router(app_state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::cors::CorsLayer::permissive());

    let addr = std::net::SocketAddr::new(config.host, config.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "billing sidecar listening");

    let shutdown_token = cancellation_token.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown_token.cancelled().await;
            tracing::info!("graceful shutdown initiated");
            tokio::time::sleep(SHUTDOWN_GRACE).await;
        })
        .await?;

    Ok(())
}

fn parse_u256(raw: &str) -> Result<U256, Box<dyn std::error::Error>> {
    raw.parse::<U256>().map_err(|e| format!("invalid unsigned integer '{raw}': {e}").into())
}
