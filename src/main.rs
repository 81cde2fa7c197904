use anyhow::Context;
use clap::Parser;
use schema_producer::kafka::{time_millis, ProducerFactory, SchemaBinding};
use schema_producer::Config;
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser, Debug)]
#[command(name = "schema-producer")]
#[command(about = "Publish schema-registry encoded events to a Kafka topic", long_about = None)]
struct Args {
    #[arg(short, long, value_name = "FILE", help = "Configuration file (defaults are used if omitted)")]
    config: Option<PathBuf>,

    #[arg(short, long, help = "Topic to publish to; created if missing")]
    topic: String,

    #[arg(long, default_value = r#""long""#, help = "Avro key schema")]
    key_schema: String,

    #[arg(long, help = "Avro value schema; omit for key-only events")]
    value_schema: Option<String>,

    #[arg(long, help = "JSON value to publish with every event")]
    value: Option<String>,

    #[arg(short = 'n', long, default_value_t = 1, help = "Number of events to publish")]
    count: usize,

    #[arg(short, long, help = "Enable JSON output for logs")]
    json_logs: bool,

    #[arg(short, long, help = "Verbose logging")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(args.json_logs, args.verbose);

    let config = match &args.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            Config::from_file(path).with_context(|| format!("loading {}", path.display()))?
        }
        None => Config::default(),
    };

    info!(
        kafka_brokers = ?config.kafka.brokers,
        schema_registry = %config.kafka.schema_registry_url,
        partitions = config.topics.partitions,
        replication_factor = config.topics.replication_factor,
        "Configuration summary"
    );

    let value: Option<serde_json::Value> = args
        .value
        .as_deref()
        .map(serde_json::from_str)
        .transpose()
        .context("parsing --value as JSON")?;

    let binding = SchemaBinding::parse(&args.key_schema, args.value_schema.as_deref())?;
    let descriptor = config.descriptor(&args.topic)?;

    let factory = ProducerFactory::from_config(&config)?;
    let mut producer = factory.open(descriptor, binding).await?;

    for _ in 0..args.count {
        producer.publish(&time_millis(), value.as_ref())?;
    }

    let report = producer.shutdown().await;
    if report.is_complete() {
        info!(topic = %report.topic, acked = report.acked, "All events delivered");
    } else {
        for record in &report.failed {
            error!(record = record.id(), outcome = ?record.outcome(), "Event not delivered");
        }
        warn!(
            topic = %report.topic,
            acked = report.acked,
            failed = report.failed.len(),
            pending = report.pending.len(),
            close_error = ?report.close_error,
            "Shutdown incomplete"
        );
        anyhow::bail!("not every event was confirmed by the cluster");
    }

    Ok(())
}

fn init_logging(json: bool, verbose: bool) {
    let env_filter = if verbose {
        EnvFilter::new("schema_producer=debug,info")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("schema_producer=info,warn"))
    };

    let fmt_layer = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .with_span_list(false)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
