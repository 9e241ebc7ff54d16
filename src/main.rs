use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lookup_provider::{
    config::{AvatarCacheConfig, Config, defaults::{DEFAULT_CONFIG_FILE, DEFAULT_WAIT}},
    models::{LookupKey, LookupResponse},
    services::{
        DeliveryQueue, KeyNormalizer, ListenerHandle, LookupService, LookupServiceSettings,
        TieredBitmapCache,
    },
    transports,
};

#[derive(Parser)]
#[command(name = "lookup-provider")]
#[command(version)]
#[command(about = "Caller-identity lookups with a tiered avatar cache")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: String,

    /// Log level
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Region used to canonicalize national numbers (overrides config file)
    #[arg(short, long, value_name = "REGION")]
    region: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Look numbers up and print whatever the provider returns
    Lookup {
        #[arg(required = true)]
        numbers: Vec<String>,
        /// Skip cached results
        #[arg(long)]
        requery: bool,
        /// How long to wait for answers
        #[arg(long, default_value = DEFAULT_WAIT, value_parser = humantime::parse_duration)]
        wait: Duration,
    },
    /// Report a number as spam
    Spam {
        number: String,
        #[arg(long, default_value = DEFAULT_WAIT, value_parser = humantime::parse_duration)]
        wait: Duration,
    },
    /// Fetch avatar images through the tiered cache
    Avatar {
        #[arg(required = true)]
        urls: Vec<String>,
        #[arg(long, default_value = DEFAULT_WAIT, value_parser = humantime::parse_duration)]
        wait: Duration,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_format);

    let mut config = Config::load_from_file(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config))?;
    if let Some(region) = cli.region {
        config.lookup.region = region;
        config.validate()?;
    }
    info!("Configuration loaded from: {}", cli.config);

    match cli.command {
        Command::Lookup {
            numbers,
            requery,
            wait,
        } => run_lookup(&config, &numbers, requery, wait).await,
        Command::Spam { number, wait } => run_spam(&config, &number, wait).await,
        Command::Avatar { urls, wait } => run_avatar(&config, &urls, wait).await,
        Command::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

fn init_tracing(level: &str, format: LogFormat) {
    let log_filter = format!("lookup_provider={level}");
    let registry = tracing_subscriber::registry().with(
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| log_filter.into()),
    );
    match format {
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
    }
}

fn build_service(config: &Config, delivery: DeliveryQueue) -> Result<LookupService> {
    let normalizer = KeyNormalizer::new(&config.lookup.region)?;
    let transport = transports::from_config(&config.provider)?;
    Ok(LookupService::new(
        normalizer,
        transport,
        delivery,
        LookupServiceSettings::from(&config.lookup),
    ))
}

/// Listener that forwards every notification for `key` into `tx`
fn forwarding_listener(
    key: LookupKey,
    tx: mpsc::UnboundedSender<(LookupKey, LookupResponse)>,
) -> ListenerHandle {
    Arc::new(move |info: &LookupResponse| {
        let _ = tx.send((key.clone(), info.clone()));
    })
}

/// Receive up to `expected` items, giving up after `wait` or on Ctrl-C
async fn collect<T>(rx: &mut mpsc::UnboundedReceiver<T>, expected: usize, wait: Duration) -> Vec<T> {
    let mut received = Vec::new();
    let deadline = tokio::time::sleep(wait);
    tokio::pin!(deadline);

    while received.len() < expected {
        tokio::select! {
            item = rx.recv() => match item {
                Some(item) => received.push(item),
                None => break,
            },
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted; not waiting for remaining results");
                break;
            }
        }
    }
    received
}

fn print_response(key: &LookupKey, response: &LookupResponse) -> Result<()> {
    println!("{key}: {}", serde_json::to_string_pretty(response)?);
    Ok(())
}

async fn run_lookup(config: &Config, numbers: &[String], requery: bool, wait: Duration) -> Result<()> {
    let (delivery, _delivery_loop) = DeliveryQueue::spawn();
    let service = build_service(config, delivery)?;
    let (tx, mut rx) = mpsc::unbounded_channel();

    service.on_observer_arrive();

    // Listeners are held weakly by the service; keep them alive here
    let mut listeners = Vec::new();
    let mut pending = BTreeMap::new();
    for raw in numbers {
        let key = match service.normalize(raw) {
            Ok(key) => key,
            Err(e) => {
                eprintln!("{raw}: {e}");
                continue;
            }
        };
        if pending.contains_key(&key) {
            continue;
        }
        let listener = forwarding_listener(key.clone(), tx.clone());
        service.subscribe(key.as_str(), &listener)?;
        listeners.push(listener);
        pending.insert(key, raw.clone());
    }

    for key in pending.keys() {
        service.lookup_normalized(key, requery);
    }

    for (key, response) in collect(&mut rx, pending.len(), wait).await {
        print_response(&key, &response)?;
        pending.remove(&key);
    }
    for raw in pending.values() {
        eprintln!("{raw}: no answer within {}", humantime::format_duration(wait));
    }

    service.on_observer_depart()?;
    drop(listeners);
    Ok(())
}

async fn run_spam(config: &Config, number: &str, wait: Duration) -> Result<()> {
    let (delivery, _delivery_loop) = DeliveryQueue::spawn();
    let service = build_service(config, delivery)?;
    let key = service.normalize(number)?;

    service.on_observer_arrive();
    println!(
        "provider: {} (spam reporting: {})",
        service.provider_display_name().unwrap_or_else(|| "-".to_string()),
        service.has_spam_reporting_capability()
    );
    service.mark_as_spam_normalized(&key);
    service.on_observer_depart()?;

    // The report runs on the stopped provider's executor; let it finish
    tokio::select! {
        _ = service.drain() => println!("{key}: spam report completed"),
        _ = tokio::time::sleep(wait) => {
            eprintln!("{key}: spam report still pending after {}", humantime::format_duration(wait));
        }
        _ = tokio::signal::ctrl_c() => warn!("Interrupted; spam report may not have been sent"),
    }
    Ok(())
}

async fn run_avatar(config: &Config, urls: &[String], wait: Duration) -> Result<()> {
    let (delivery, _delivery_loop) = DeliveryQueue::spawn();
    // Fetching by URL is the point of this command
    let avatar_config = AvatarCacheConfig {
        fetch_remote: true,
        ..config.avatar_cache.clone()
    };
    let cache = TieredBitmapCache::from_config(&avatar_config, delivery)?;
    cache.initialize()?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    for url in urls {
        let tx = tx.clone();
        cache.fetch_async(url, move |key, image| {
            let _ = tx.send((key, image.map(|image| (image.width(), image.height()))));
        });
    }
    drop(tx);

    for (key, dimensions) in collect(&mut rx, urls.len(), wait).await {
        match dimensions {
            Some((width, height)) => println!("{key}: {width}x{height}"),
            None => println!("{key}: no image"),
        }
    }
    println!("{}", serde_json::to_string_pretty(&cache.stats())?);

    cache.terminate();
    Ok(())
}
