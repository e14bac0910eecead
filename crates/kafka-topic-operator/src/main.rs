//! Kafka topic operator
//!
//! Keeps Kafka topics and `KafkaTopic` custom resources converged in both
//! directions.

use anyhow::{Context, Result};
use clap::Parser;
use kafka_topic_operator::config::{OperatorConfig, StoreKind};
use kafka_topic_operator::controller::run_topic_operator;
use kafka_topic_operator::crd::KafkaTopic;
use kafka_topic_operator::labels::LabelPredicate;
use kafka_topic_operator::retry::RetryConfig;
use kube::Client;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Targets held at `warn` unless RUST_LOG is set
const QUIET_TARGETS: &[&str] = &["kube", "tower", "hyper", "rdkafka"];

/// Kafka topic operator
#[derive(Parser, Debug)]
#[command(name = "kafka-topic-operator")]
#[command(about = "Bidirectional reconciliation of Kafka topics and KafkaTopic resources")]
#[command(version)]
struct Args {
    /// Kafka bootstrap servers (host:port,...)
    #[arg(long, env = "KAFKA_BOOTSTRAP_SERVERS", default_value = "localhost:9092")]
    bootstrap_servers: String,

    /// Namespace holding the KafkaTopic resources
    #[arg(long, env = "WATCH_NAMESPACE", default_value = "default")]
    namespace: String,

    /// Labels a KafkaTopic must carry to be managed (k=v,k2=v2)
    #[arg(
        long,
        env = "RESOURCE_LABELS",
        default_value = "app.kubernetes.io/managed-by=kafka-topic-operator"
    )]
    resource_labels: LabelPredicate,

    /// Seconds between full reconciliation sweeps
    #[arg(long, env = "FULL_RECONCILIATION_INTERVAL_SECS", default_value = "900")]
    full_reconciliation_interval_secs: u64,

    /// Seconds between Kafka topic polls
    #[arg(long, env = "KAFKA_POLL_INTERVAL_SECS", default_value = "10")]
    kafka_poll_interval_secs: u64,

    /// Attempts to observe a newly created topic's metadata
    #[arg(long, env = "TOPIC_METADATA_MAX_ATTEMPTS", default_value = "6")]
    topic_metadata_max_attempts: u32,

    /// First backoff delay while waiting for topic metadata
    #[arg(long, env = "TOPIC_METADATA_INITIAL_DELAY_MS", default_value = "100")]
    topic_metadata_initial_delay_ms: u64,

    /// Timeout for Kafka admin requests
    #[arg(long, env = "KAFKA_OPERATION_TIMEOUT_SECS", default_value = "30")]
    operation_timeout_secs: u64,

    /// Backend for converged topic snapshots
    #[arg(long, env = "TOPIC_STORE", value_enum, default_value = "configmap")]
    store: StoreKind,

    /// Name prefix of the stored topic records
    #[arg(long, env = "TOPIC_STORE_PREFIX", default_value = "kafka-topic-store")]
    store_prefix: String,

    /// Metrics server address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: SocketAddr,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: Level,

    /// Enable JSON log format
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    log_json: bool,

    /// Print CRD YAML and exit
    #[arg(long)]
    print_crd: bool,
}

impl Args {
    fn operator_config(&self) -> OperatorConfig {
        OperatorConfig {
            bootstrap_servers: self.bootstrap_servers.clone(),
            namespace: self.namespace.clone(),
            resource_labels: self.resource_labels.clone(),
            full_reconciliation_interval: Duration::from_secs(
                self.full_reconciliation_interval_secs,
            ),
            kafka_poll_interval: Duration::from_secs(self.kafka_poll_interval_secs),
            operation_timeout: Duration::from_secs(self.operation_timeout_secs),
            retry: RetryConfig::default()
                .with_max_attempts(self.topic_metadata_max_attempts)
                .with_initial_delay(Duration::from_millis(self.topic_metadata_initial_delay_ms)),
            store: self.store,
            store_prefix: self.store_prefix.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_crd {
        println!("{}", crd_yaml()?);
        return Ok(());
    }

    init_logging(&args);

    let config = args.operator_config();
    config.validate().context("Invalid operator configuration")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        namespace = %config.namespace,
        "Starting Kafka topic operator"
    );

    start_metrics_server(args.metrics_addr)?;

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    run_topic_operator(client, config)
        .await
        .context("Topic operator failed")?;

    Ok(())
}

fn init_logging(args: &Args) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| default_log_filter(args.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    if args.log_json {
        registry
            .with(tracing_subscriber::fmt::layer().json().flatten_event(true))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .init();
    }
}

/// `level` for the operator, `warn` for the client stacks
fn default_log_filter(level: Level) -> EnvFilter {
    let mut directives = vec![level.as_str().to_ascii_lowercase()];
    directives.extend(QUIET_TARGETS.iter().map(|target| format!("{}=warn", target)));
    EnvFilter::new(directives.join(","))
}

/// Install the Prometheus exporter and its HTTP listener
fn start_metrics_server(addr: SocketAddr) -> Result<()> {
    use metrics_exporter_prometheus::PrometheusBuilder;

    info!(address = %addr, "Starting metrics server");

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")
}

/// CRD manifest for `kubectl apply`
fn crd_yaml() -> Result<String> {
    use kube::CustomResourceExt;

    serde_yaml::to_string(&KafkaTopic::crd()).context("Failed to render KafkaTopic CRD")
}
