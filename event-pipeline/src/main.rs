//! Event Pipeline CLI
//!
//! Entry point for the pipeline binary. Provides subcommands for:
//! - `run` - Start the pipeline against the configured contracts
//! - `migrate` - Run database migrations for the `postgres`-backed store adapters
//! - `backfill` - Drain a fixed historical block range through the pipeline
//! - `version` - Show version information

use std::sync::Arc;

use alloy::network::Ethereum;
use alloy::primitives::Address;
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use tracing::{error, info, warn};

use event_pipeline::adapters::AlloyLogSource;
use event_pipeline::config::Settings;
use event_pipeline::error::{AppError, DomainError, InfraError};
use event_pipeline::pipeline::{
    AutoEventsEmitter, AutoEventsEmitterConfig, BlockTracker, Confirmator, Dispatcher,
    EmitterConfig, EventsEmitter, PollingBlockProducer, Subscription,
};
use event_pipeline::ports::{BlockTag, LogSource, TopicFilter};
use event_pipeline::store::{InMemoryBlockTrackerStore, InMemoryConfirmationBufferStore};
use event_pipeline::types::{BlockNumber, Channel, PipelineEvent};

/// Event Pipeline CLI
#[derive(Parser, Debug)]
#[command(name = "event-pipeline")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, default_value = "config/default.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the pipeline for every configured contract
    Run {
        /// Override `startingBlock` for every configured contract
        #[arg(long)]
        from_block: Option<u64>,
    },

    /// Run database migrations for the `postgres` store adapters
    Migrate {
        /// Revert migrations instead of applying
        #[arg(long)]
        revert: bool,
    },

    /// Drain a fixed historical block range through the pipeline and exit
    Backfill {
        /// Starting block number
        #[arg(long)]
        from: u64,

        /// Ending block number
        #[arg(long)]
        to: u64,
    },

    /// Show version information
    Version,
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .init();
}

async fn connect_provider(settings: &Settings) -> Result<RootProvider<Ethereum>, AppError> {
    let url = settings
        .rpc
        .url
        .parse()
        .map_err(|err| AppError::Infra(InfraError::LogSource(Box::from(format!("invalid rpc.url: {err}")))))?;
    let client = reqwest::Client::builder()
        .timeout(settings.rpc.request_timeout())
        .build()
        .map_err(|err| AppError::Infra(InfraError::LogSource(Box::new(err))))?;
    let provider = ProviderBuilder::default().connect_reqwest(client, url);

    let chain_id = provider
        .get_chain_id()
        .await
        .map_err(|err| AppError::Infra(InfraError::LogSource(Box::new(err))))?;
    if chain_id != settings.rpc.chain_id {
        warn!(expected = settings.rpc.chain_id, actual = chain_id, "chain ID mismatch");
    }
    Ok(provider)
}

type ListenerFuture = std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), String>> + Send>>;

fn log_subscriber(contract: Address) -> Arc<dyn Fn(PipelineEvent) -> ListenerFuture + Send + Sync> {
    Arc::new(move |event: PipelineEvent| -> ListenerFuture {
        Box::pin(async move {
            info!(%contract, ?event, "pipeline event");
            Ok(())
        })
    })
}

/// Subscribe a handful of log-only listeners so the CLI has something
/// observable to print even without a downstream consumer. Production
/// embedders subscribe their own handlers instead. The returned
/// subscriptions must be kept alive for as long as logging is wanted;
/// dropping them unsubscribes.
fn attach_log_listeners(dispatcher: &Dispatcher, contract: Address) -> Vec<Subscription> {
    vec![
        dispatcher.subscribe(Channel::NewEvent, log_subscriber(contract)),
        dispatcher.subscribe(Channel::Reorg, log_subscriber(contract)),
        dispatcher.subscribe(Channel::ReorgOutOfRange, log_subscriber(contract)),
        dispatcher.subscribe(Channel::InvalidConfirmation, log_subscriber(contract)),
        dispatcher.subscribe(Channel::Error, log_subscriber(contract)),
    ]
}

fn build_emitter_config(
    contract: &event_pipeline::config::ContractSettings,
    pipeline: &event_pipeline::config::PipelineSettings,
    from_block_override: Option<u64>,
) -> Result<EmitterConfig, AppError> {
    let topics = contract.topics.as_ref().map(|positions| {
        TopicFilter(
            positions
                .iter()
                .map(|options| options.iter().map(|raw| TopicFilter::resolve_topic_entry(raw)).collect())
                .collect(),
        )
    });

    let starting_block = from_block_override.map_or_else(
        || {
            pipeline
                .starting_block()
                .map_err(|msg| AppError::Domain(DomainError::InvalidStartingBlock(msg)))
        },
        |n| Ok(event_pipeline::pipeline::StartingBlock::Number(n)),
    )?;

    Ok(EmitterConfig {
        topics,
        events: contract.events.clone(),
        batch_size: pipeline.batch_size,
        confirmations: pipeline.confirmations,
        starting_block,
        serial_listeners: pipeline.serial_listeners,
        serial_processing: pipeline.serial_processing,
    })
}

async fn run_command(config_path: &str, from_block_override: Option<u64>) -> Result<(), AppError> {
    let settings = Settings::from_file(config_path)
        .map_err(|err| AppError::Infra(InfraError::Config(err)))?;
    if let Err(errors) = settings.validate() {
        for message in &errors {
            error!(message, "invalid configuration");
        }
        return Err(AppError::Domain(DomainError::Configuration(
            errors.join("; "),
        )));
    }

    let provider = Arc::new(connect_provider(&settings).await?);
    let producer = Arc::new(PollingBlockProducer::spawn(
        Arc::new(AlloyLogSource::new(provider.clone(), Address::ZERO)),
        settings.pipeline.polling_interval(),
    ));

    let mut autos = Vec::new();
    let mut subscriptions = Vec::new();
    for contract in &settings.contracts {
        let address = contract
            .parsed_address()
            .map_err(|msg| AppError::Domain(DomainError::Configuration(msg)))?;

        let source = Arc::new(AlloyLogSource::new(provider.clone(), address));
        let tracker = Arc::new(BlockTracker::new(InMemoryBlockTrackerStore::new()));
        let buffer_store = Arc::new(InMemoryConfirmationBufferStore::new());
        let dispatcher = Arc::new(Dispatcher::new());
        subscriptions.extend(attach_log_listeners(&dispatcher, address));

        let config = build_emitter_config(contract, &settings.pipeline, from_block_override)?;
        let emitter = Arc::new(EventsEmitter::new(
            source.clone(),
            tracker.clone(),
            buffer_store.clone(),
            dispatcher.clone(),
            address,
            config,
        )?);

        let confirmator = (settings.pipeline.confirmations > 0).then(|| {
            Arc::new(
                Confirmator::new(
                    source.clone(),
                    tracker.clone(),
                    buffer_store.clone(),
                    dispatcher.clone(),
                    address,
                    settings.pipeline.confirmations,
                )
                .with_gate(emitter.gate()),
            )
        });

        let auto = Arc::new(AutoEventsEmitter::new(
            emitter,
            confirmator,
            producer.clone(),
            dispatcher,
            AutoEventsEmitterConfig {
                auto_start: settings.pipeline.auto_start,
            },
        ));
        auto.start().await;
        info!(%address, "pipeline running for contract");
        autos.push(auto);
    }

    tokio::signal::ctrl_c()
        .await
        .map_err(|err| AppError::Infra(InfraError::LogSource(Box::new(err))))?;
    info!("shutdown requested, stopping emitters");
    for auto in &autos {
        auto.stop().await;
    }
    producer.shutdown();
    drop(subscriptions);
    Ok(())
}

async fn backfill_command(config_path: &str, from: u64, to: u64) -> Result<(), AppError> {
    let settings = Settings::from_file(config_path)
        .map_err(|err| AppError::Infra(InfraError::Config(err)))?;
    let Some(contract) = settings.contracts.first() else {
        return Err(AppError::Domain(DomainError::Configuration(
            "backfill requires at least one entry under contracts".into(),
        )));
    };
    let address = contract
        .parsed_address()
        .map_err(|msg| AppError::Domain(DomainError::Configuration(msg)))?;

    let provider = Arc::new(connect_provider(&settings).await?);
    let source = Arc::new(AlloyLogSource::new(provider, address));
    let tracker = Arc::new(BlockTracker::new(InMemoryBlockTrackerStore::new()));
    let buffer_store = Arc::new(InMemoryConfirmationBufferStore::new());
    let dispatcher = Arc::new(Dispatcher::new());
    let _subscriptions = attach_log_listeners(&dispatcher, address);

    let mut config = build_emitter_config(contract, &settings.pipeline, Some(from))?;
    config.confirmations = 0;
    let emitter = EventsEmitter::new(source.clone(), tracker, buffer_store, dispatcher, address, config)?;

    let current_header = source.get_block(BlockTag::Number(BlockNumber::new(to))).await?;
    let mut stream = std::pin::pin!(emitter.fetch(Some(current_header), true));
    let mut total_events = 0usize;
    while let Some(batch) = stream.next().await {
        let batch = batch?;
        total_events += batch.events.len();
        info!(
            steps_complete = batch.progress.steps_complete,
            total_steps = batch.progress.total_steps,
            from = batch.progress.step_from_block.value(),
            to = batch.progress.step_to_block.value(),
            events = batch.events.len(),
            "backfill batch complete"
        );
    }
    info!(total_events, from, to, "backfill complete");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Best-effort: a missing `.env` file is normal outside local development.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    info!(version = event_pipeline::VERSION, "Starting event pipeline");
    info!(config = %cli.config, "Using configuration file");

    let result = match cli.command {
        Commands::Run { from_block } => run_command(&cli.config, from_block).await,
        Commands::Migrate { revert } => {
            if revert {
                info!("reverting migrations");
            } else {
                info!("running migrations");
            }
            // TODO: no `postgres`-backed store adapter ships with this
            // crate yet; wire a real migration runner once one lands
            // alongside the in-memory reference implementations.
            println!("migrate command has no migrations to run yet");
            Ok(())
        }
        Commands::Backfill { from, to } => backfill_command(&cli.config, from, to).await,
        Commands::Version => {
            println!("event-pipeline {}", event_pipeline::VERSION);
            Ok(())
        }
    };

    if let Err(err) = &result {
        error!(error = %err, "command failed");
    }
    result
}
