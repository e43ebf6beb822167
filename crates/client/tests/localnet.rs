//! Tests against a local validator with the counter program deployed.
//!
//! ## Running Tests
//!
//! Start `solana-test-validator` with the program loaded, then:
//! ```bash
//! cargo test --test localnet -- --ignored
//! ```
//!
//! Endpoints come from `HELLOWORLD_RPC_URL` / `HELLOWORLD_WS_URL`
//! (default `localhost:8899` / `localhost:8900`).

use std::sync::Arc;

use helloworld_client::{
    CallHarness, ClientConfig, EventLoader, FundingClient, LogSubscriber, Program, RpcConnection,
    RpcLogSource, RpcTransport,
};
use solana_sdk::native_token::LAMPORTS_PER_SOL;
use solana_sdk::signer::Signer;

fn config() -> ClientConfig {
    ClientConfig::from_env()
}

#[tokio::test]
#[ignore]
async fn airdrop_confirms_on_localnet() {
    let config = config();
    let rpc = RpcConnection::from_config(&config).unwrap();
    let client = FundingClient::new(Arc::new(rpc), config.confirm_timeout());
    let identity = FundingClient::generate_identity();

    let report = client.fund(&identity, 2 * LAMPORTS_PER_SOL).await.unwrap();
    assert_eq!(report.address, identity.pubkey());
    assert!(report.balance_after >= 2 * LAMPORTS_PER_SOL);
}

#[tokio::test]
#[ignore]
async fn counter_events_on_localnet() {
    let config = config();
    let program_id = config.program_pubkey().unwrap();
    let rpc = RpcConnection::from_config(&config).unwrap();

    let funding = FundingClient::new(Arc::new(rpc.clone()), config.confirm_timeout());
    let payer = FundingClient::generate_identity();
    funding.fund(&payer, 2 * LAMPORTS_PER_SOL).await.unwrap();

    let transport = RpcTransport::new(rpc.rpc(), program_id, payer);
    let program = Arc::new(Program::new(program_id, Box::new(transport)));
    let mut subscriber = LogSubscriber::new(
        &config.ws_url,
        config.commitment_config().unwrap(),
        program.log_sink(),
    );
    subscriber.start().await.unwrap();

    let harness = CallHarness::new(program.clone(), config.event_timeout());
    let created = harness.count_change("create").await.unwrap();
    assert_eq!((created.data, created.label.as_str()), (0, "create"));

    let inc = harness.count_change("increment").await.unwrap();
    assert_eq!(inc.label, "inc");
    assert_eq!(program.listener_count(), 0);

    subscriber.close().await;
    assert!(!subscriber.is_running());
}

#[tokio::test]
#[ignore]
async fn counter_events_by_polling_on_localnet() {
    let config = config();
    let program_id = config.program_pubkey().unwrap();
    let commitment = config.commitment_config().unwrap();
    let rpc = RpcConnection::from_config(&config).unwrap();

    let funding = FundingClient::new(Arc::new(rpc.clone()), config.confirm_timeout());
    let payer = FundingClient::generate_identity();
    funding.fund(&payer, 2 * LAMPORTS_PER_SOL).await.unwrap();

    let transport = RpcTransport::new(rpc.rpc(), program_id, payer).with_log_polling(commitment);
    let program = Arc::new(Program::new(program_id, Box::new(transport)));

    // a second reader following the same history from its current end
    let source = Arc::new(RpcLogSource::new(rpc.rpc(), commitment));
    let mut loader = EventLoader::new(source, program.log_sink(), config.poll_batch_size);
    loader.start_at_latest().await.unwrap();

    let harness = CallHarness::new(program.clone(), config.event_timeout());
    let created = harness.count_change("create").await.unwrap();
    assert_eq!((created.data, created.label.as_str()), (0, "create"));
    assert_eq!(program.listener_count(), 0);

    let stats = loader.poll().await.unwrap();
    assert!(stats.transactions >= 1);
}
