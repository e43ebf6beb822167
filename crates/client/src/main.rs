//! helloworld CLI: fund an identity, call the counter program, watch its events

use std::path::PathBuf;
use std::sync::Arc;

use clap::builder::PossibleValuesParser;
use clap::{Parser, Subcommand};
use helloworld_client::funding::lamports_to_sol;
use helloworld_client::{
    CallHarness, ClientConfig, ClientError, Connection, EventLoader, EventSource, FundingClient,
    LogSubscriber, Program, RpcConnection, RpcLogSource, RpcTransport, SimulatedConnection,
    SimulatedTransport,
};
use helloworld_core::logging::{self, LogLevel};
use helloworld_core::{COUNT_CHANGE_EVENT, METHODS};
use solana_sdk::signature::Keypair;
use solana_sdk::signer::Signer;
use tracing::{debug, info, warn};

#[derive(Parser)]
#[command(name = "helloworld", about = "Client for the helloworld counter program")]
struct Cli {
    /// Path to a JSON config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// JSON-RPC endpoint (overrides config)
    #[arg(long, global = true)]
    rpc_url: Option<String>,

    /// Websocket endpoint (overrides config)
    #[arg(long, global = true)]
    ws_url: Option<String>,

    /// Use the in-process simulator instead of a validator
    #[arg(long, global = true)]
    dry_run: bool,

    /// Read events by polling JSON-RPC instead of a websocket subscription
    #[arg(long, global = true)]
    poll: bool,

    /// Log level; RUST_LOG takes precedence
    #[arg(long, global = true, default_value_t = LogLevel::Info)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate an identity, print its balance and airdrop to it
    Fund {
        /// Lamports to request (default from config: 100 SOL)
        #[arg(long)]
        lamports: Option<u64>,
    },
    /// Call program methods in order, printing the event each one emits
    Call {
        /// Method names, e.g. `create increment`
        #[arg(required = true, value_parser = PossibleValuesParser::new(METHODS.iter().copied()))]
        methods: Vec<String>,
        /// Event to wait for
        #[arg(long, default_value = COUNT_CHANGE_EVENT)]
        event: String,
        /// Seconds to wait for each event (default from config)
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
    /// Print program events until Ctrl-C
    Watch {
        /// Print up to this many past transactions' events first
        #[arg(long)]
        backfill: Option<usize>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init(cli.log_level);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> helloworld_client::Result<()> {
    let mut config = match &cli.config {
        Some(path) => ClientConfig::load_from(path),
        None => ClientConfig::from_env(),
    };
    if let Some(url) = cli.rpc_url {
        config.rpc_url = url;
    }
    if let Some(url) = cli.ws_url {
        config.ws_url = url;
    }
    config.dry_run |= cli.dry_run;
    if cli.poll {
        config.event_source = EventSource::Poll;
    }
    debug!("Config: {:?}", config);

    match cli.command {
        Commands::Fund { lamports } => {
            let lamports = lamports.unwrap_or(config.airdrop_lamports);
            let funding = FundingClient::new(connection(&config)?, config.confirm_timeout());
            let identity = FundingClient::generate_identity();
            fund(&funding, &identity, lamports).await?;
        }
        Commands::Call {
            methods,
            event,
            timeout_secs,
        } => {
            if let Some(secs) = timeout_secs {
                config.event_timeout_secs = secs;
            }
            call(&config, &methods, &event).await?;
        }
        Commands::Watch { backfill } => watch(&config, backfill).await?,
    }
    Ok(())
}

fn connection(config: &ClientConfig) -> helloworld_client::Result<Arc<dyn Connection>> {
    if config.dry_run {
        info!("Dry run: using the in-process simulator");
        return Ok(Arc::new(SimulatedConnection::new()));
    }
    Ok(Arc::new(RpcConnection::from_config(config)?))
}

async fn fund(
    funding: &FundingClient,
    identity: &Keypair,
    lamports: u64,
) -> helloworld_client::Result<()> {
    let address = identity.pubkey();
    println!("My address: {}", address);
    let balance = funding.balance(&address).await?;
    println!("My balance: {} SOL", lamports_to_sol(balance));

    let report = funding.fund(identity, lamports).await?;
    println!("Airdrop confirmed: {}", report.signature);
    println!("My balance: {} SOL", lamports_to_sol(report.balance_after));
    Ok(())
}

async fn call(
    config: &ClientConfig,
    methods: &[String],
    event_name: &str,
) -> helloworld_client::Result<()> {
    let program_id = config.program_pubkey()?;

    let (program, mut subscriber) = if config.dry_run {
        let program = Program::new(program_id, Box::new(SimulatedTransport::new(program_id)));
        (Arc::new(program), None)
    } else {
        let rpc = RpcConnection::from_config(config)?;
        let funding = FundingClient::new(Arc::new(rpc.clone()), config.confirm_timeout());
        let payer = FundingClient::generate_identity();
        fund(&funding, &payer, config.airdrop_lamports).await?;

        let transport = RpcTransport::new(rpc.rpc(), program_id, payer);
        match config.event_source {
            EventSource::Poll => {
                let transport = transport.with_log_polling(config.commitment_config()?);
                (Arc::new(Program::new(program_id, Box::new(transport))), None)
            }
            EventSource::Subscription => {
                let program = Arc::new(Program::new(program_id, Box::new(transport)));
                let mut subscriber = LogSubscriber::new(
                    &config.ws_url,
                    config.commitment_config()?,
                    program.log_sink(),
                );
                subscriber.start().await?;
                (program, Some(subscriber))
            }
        }
    };

    let harness = CallHarness::new(program, config.event_timeout());
    let mut result = Ok(());
    for method in methods {
        match harness.call(event_name, method).await {
            Ok(event) => match serde_json::to_string_pretty(&event) {
                Ok(json) => println!("{}", json),
                Err(e) => {
                    result = Err(ClientError::InvalidParam(format!("encode event: {}", e)));
                    break;
                }
            },
            Err(e) => {
                result = Err(e);
                break;
            }
        }
    }

    if let Some(subscriber) = subscriber.as_mut() {
        subscriber.close().await;
    }
    result
}

async fn watch(config: &ClientConfig, backfill: Option<usize>) -> helloworld_client::Result<()> {
    if config.dry_run {
        return Err(ClientError::InvalidParam(
            "watch needs a validator; drop --dry-run".into(),
        ));
    }
    let program_id = config.program_pubkey()?;
    let commitment = config.commitment_config()?;
    let rpc = RpcConnection::from_config(config)?;
    let transport = RpcTransport::new(rpc.rpc(), program_id, Keypair::new());
    let program = Program::new(program_id, Box::new(transport));

    let mut ids = Vec::new();
    for name in helloworld_core::ProgramEvent::known_names() {
        ids.push(program.add_event_listener(name, |event| {
            match serde_json::to_string(event) {
                Ok(json) => println!("{}", json),
                Err(e) => eprintln!("Error: encode event: {}", e),
            }
        })?);
    }

    let source = Arc::new(RpcLogSource::new(rpc.rpc(), commitment));
    let mut loader = EventLoader::new(source, program.log_sink(), config.poll_batch_size);
    match backfill {
        Some(max) => {
            let stats = loader.backfill(max).await?;
            info!(
                "Backfilled {} transaction(s), {} skipped",
                stats.transactions, stats.skipped
            );
        }
        None if config.event_source == EventSource::Poll => loader.start_at_latest().await?,
        None => {}
    }

    let result = match config.event_source {
        EventSource::Subscription => {
            let mut subscriber = LogSubscriber::new(&config.ws_url, commitment, program.log_sink());
            subscriber.start().await?;
            info!("Watching {} (Ctrl-C to stop)", program_id);
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl-C: {}", e);
            }
            subscriber.close().await;
            Ok(())
        }
        EventSource::Poll => poll_until_ctrl_c(&mut loader, config).await,
    };

    for id in ids {
        program.remove_event_listener(id);
    }
    result
}

async fn poll_until_ctrl_c(
    loader: &mut EventLoader,
    config: &ClientConfig,
) -> helloworld_client::Result<()> {
    info!(
        "Polling {} every {:?} (Ctrl-C to stop)",
        config.program_id,
        config.poll_interval()
    );
    let mut ticker = tokio::time::interval(config.poll_interval());
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            res = &mut ctrl_c => {
                if let Err(e) = res {
                    warn!("Failed to listen for Ctrl-C: {}", e);
                }
                break;
            }
            _ = ticker.tick() => {
                // a failed poll leaves the cursor where it was; the next tick retries
                if let Err(e) = loader.poll().await {
                    warn!("Poll failed: {}", e);
                }
            }
        }
    }
    Ok(())
}
