use std::io::Write;
use std::time::Duration;

use alerter::{
    classifier::classifier_for,
    config::{Config, read_config_file},
    relay::{PipelineSupervisor, RelayHandle},
    transport::{ExchangeKind, MemoryTransport, Transport},
};
use anyhow::Context;
use clap::Parser;
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, BufReader},
    task::JoinHandle,
};
use tracing::{debug, error, info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

/// Queue collecting relayed alerts for printing
const SINK_QUEUE: &str = "alerter_sink";

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short)]
    file: String,

    /// Newline-delimited monitoring results to replay (stdin if omitted)
    #[arg(short)]
    input: Option<String>,

    /// Log every message
    #[arg(long)]
    verbose: bool,
}

fn init(verbose: bool) {
    dotenv::dotenv().ok();

    let level = if verbose {
        LevelFilter::TRACE
    } else {
        LevelFilter::DEBUG
    };
    let filter = filter::Targets::new().with_targets(vec![("alerter", level)]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init(args.verbose);
    trace!("started with args: {args:?}");

    let config = read_config_file(&args.file)?;
    let classifier = classifier_for(&config.source)
        .with_context(|| format!("no classification rule for source '{}'", config.source))?;

    let transport = MemoryTransport::new();
    prepare_sink(&transport, &config).await?;

    let supervisor = PipelineSupervisor::new(&config, classifier, Box::new(transport.clone()));
    let (handle, task) = RelayHandle::spawn(supervisor, config.reconnect_delay());

    let printer = tokio::spawn(print_alerts(transport.clone()));

    let replayed = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received termination signal");
            Ok(())
        }
        result = async {
            let count = replay(&transport, &config, args.input.as_deref()).await?;
            debug!("replayed {count} monitoring results");
            wait_until_idle(&transport, &config, &task).await;
            anyhow::Ok(())
        } => result,
    };
    if let Err(e) = &replayed {
        error!("failed to replay monitoring results: {e:#}");
    }

    handle.shutdown().await;
    let stats = task.await?;
    printer.abort();
    flush_alerts(&transport).await?;

    match stats {
        Ok(stats) => {
            info!(
                "relayed {} of {} alerts ({} dropped, {} pending)",
                stats.alerts_published, stats.alerts_buffered, stats.alerts_dropped, stats.pending
            );
            replayed
        }
        Err(e) => {
            error!("alerter stopped: {e}");
            Err(e.into())
        }
    }
}

/// Bind a queue to the outbound routing keys so relayed alerts are routable
async fn prepare_sink(transport: &MemoryTransport, config: &Config) -> anyhow::Result<()> {
    transport.connect().await?;
    transport
        .declare_exchange(&config.exchange, ExchangeKind::Topic)
        .await?;
    transport.declare_queue(SINK_QUEUE).await?;
    transport
        .bind_queue(SINK_QUEUE, &config.exchange, "alert_router.#")
        .await?;
    // the supervisor declares its own topology before consuming
    transport.declare_queue(&config.queue()).await?;
    transport
        .bind_queue(&config.queue(), &config.exchange, &config.inbound_routing_key())
        .await?;
    Ok(())
}

/// Publish every non-empty input line to the inbound routing key
async fn replay(
    transport: &MemoryTransport,
    config: &Config,
    path: Option<&str>,
) -> anyhow::Result<usize> {
    let reader: Box<dyn AsyncBufRead + Unpin + Send> = match path {
        Some(path) => Box::new(BufReader::new(
            tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open input: {path}"))?,
        )),
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };

    let routing_key = config.inbound_routing_key();
    let mut lines = reader.lines();
    let mut count = 0;
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        transport
            .inject(&config.exchange, &routing_key, line.as_bytes())
            .await?;
        count += 1;
    }
    Ok(count)
}

async fn wait_until_idle<T>(transport: &MemoryTransport, config: &Config, task: &JoinHandle<T>) {
    let queue = config.queue();
    loop {
        if task.is_finished() {
            return;
        }
        if transport.queue_len(&queue).await == 0 && transport.unacked_count().await == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

async fn print_alerts(transport: MemoryTransport) {
    loop {
        if let Err(e) = flush_alerts(&transport).await {
            error!("failed to print alerts: {e}");
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

async fn flush_alerts(transport: &MemoryTransport) -> anyhow::Result<()> {
    let alerts = transport.take_messages(SINK_QUEUE).await;
    let mut stdout = std::io::stdout().lock();
    for body in alerts {
        stdout.write_all(&body)?;
        stdout.write_all(b"\n")?;
    }
    stdout.flush()?;
    Ok(())
}
