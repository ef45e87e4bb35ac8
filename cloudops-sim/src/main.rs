//! cloudops-sim: converges concurrent subset declarations against an
//! in-memory management API.
//!
//! Every declaration runs in its own task. Declarations that target the same
//! namespace share one lock registry, so their fetch-mutate cycles serialize
//! while cycles on different namespaces run in parallel.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use cloudops_core::namespace::NamespaceState;
use cloudops_core::{
    AggregateClient, AwaitConfig, KeyedLocks, Mutator, NamespacePermission, OperationAwaiter,
};
use futures::future::join_all;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod declaration;

use declaration::{Declaration, NamespaceApi};

/// cloudops reconciliation simulator
#[derive(Parser, Debug)]
#[command(name = "cloudops-sim", version, about)]
struct Args {
    /// Namespace targeted by --tag, --access and the racing writers
    #[arg(long, default_value = "ns-demo")]
    namespace: String,

    /// Tag to declare (format: key=value, can be repeated)
    #[arg(long = "tag", value_parser = parse_tag)]
    tags: Vec<(String, String)>,

    /// Namespace access to declare (format: principal=permission, can be repeated)
    #[arg(long = "access", value_parser = parse_access)]
    accesses: Vec<(String, NamespacePermission)>,

    /// JSON file with additional declarations
    #[arg(long)]
    declarations: Option<PathBuf>,

    /// Independent tag declarations racing on the same namespace
    #[arg(long, default_value = "3")]
    writers: u32,

    /// Delay between operation status lookups in milliseconds
    #[arg(long, default_value = "1000", value_parser = clap::value_parser!(u64).range(1..))]
    poll_interval_ms: u64,

    /// Deadline for each operation in seconds
    #[arg(long, default_value = "60")]
    timeout_secs: u64,

    /// Lookups an operation stays in flight before it resolves
    #[arg(long, default_value = "2")]
    polls_in_flight: u32,

    /// Delete every namespace after converging
    #[arg(long)]
    teardown: bool,
}

fn parse_tag(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or("Expected format: key=value".to_string())?;
    Ok((key.to_string(), value.to_string()))
}

fn parse_access(s: &str) -> Result<(String, NamespacePermission), String> {
    let (principal, permission) = s
        .split_once('=')
        .ok_or("Expected format: principal=permission".to_string())?;
    let permission = permission
        .parse::<NamespacePermission>()
        .map_err(|e| e.to_string())?;
    Ok((principal.to_string(), permission))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cloudops_sim=info,cloudops_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let config = AwaitConfig {
        poll_interval: Duration::from_millis(args.poll_interval_ms),
        timeout: Duration::from_secs(args.timeout_secs),
    };
    let declarations = collect_declarations(&args).await?;
    if declarations.is_empty() {
        warn!("No declarations given, nothing to do");
        return Ok(());
    }

    let api = Arc::new(
        NamespaceApi::with_polls_in_flight(args.polls_in_flight)
            .with_settle_after(config.poll_interval.saturating_mul(args.polls_in_flight)),
    );
    let awaiter = OperationAwaiter::from_config(api.clone(), &config);
    let mutator = Arc::new(Mutator::new(Arc::new(KeyedLocks::new()), awaiter));

    info!(
        "Converging {} declarations (poll every {:?}, timeout {:?})",
        declarations.len(),
        config.poll_interval,
        config.timeout
    );

    until_interrupted(
        run(declarations, api, mutator, config, args.teardown),
        signal::ctrl_c(),
    )
    .await
}

/// Drive `work` to completion unless `interrupt` resolves first, which is
/// reported as an error.
async fn until_interrupted(
    work: impl Future<Output = Result<()>>,
    interrupt: impl Future<Output = std::io::Result<()>>,
) -> Result<()> {
    tokio::select! {
        result = work => result,
        received = interrupt => {
            received.context("Failed to listen for SIGINT")?;
            // In-flight remote operations keep running; we only stop waiting.
            warn!("Received SIGINT, abandoning reconciliation");
            anyhow::bail!("Interrupted before all declarations converged")
        }
    }
}

/// Declarations from the file first, then the ones given on the command line.
async fn collect_declarations(args: &Args) -> Result<Vec<Declaration>> {
    let mut declarations = match &args.declarations {
        Some(path) => declaration::load(path).await?,
        None => Vec::new(),
    };

    if !args.tags.is_empty() {
        declarations.push(Declaration::Tags {
            namespace: args.namespace.clone(),
            tags: args.tags.iter().cloned().collect(),
            owned: Vec::new(),
        });
    }
    if !args.accesses.is_empty() {
        declarations.push(Declaration::Accesses {
            namespace: args.namespace.clone(),
            accesses: args.accesses.iter().cloned().collect(),
            owned: Vec::new(),
        });
    }
    for i in 0..args.writers {
        declarations.push(Declaration::Tags {
            namespace: args.namespace.clone(),
            tags: HashMap::from([(format!("writer-{}", i), "true".to_string())]),
            owned: Vec::new(),
        });
    }

    Ok(declarations)
}

async fn run(
    declarations: Vec<Declaration>,
    api: Arc<NamespaceApi>,
    mutator: Arc<Mutator>,
    config: AwaitConfig,
    teardown: bool,
) -> Result<()> {
    let namespaces: BTreeSet<String> = declarations
        .iter()
        .map(|d| d.namespace().to_string())
        .collect();

    for namespace in &namespaces {
        provision(namespace, &api, &mutator, config).await?;
    }

    let tasks = declarations.into_iter().map(|declaration| {
        let api = Arc::clone(&api);
        let mutator = Arc::clone(&mutator);
        tokio::spawn(async move {
            let result = declaration
                .apply(&mutator, &api, config.doubled().timeout)
                .await;
            (declaration, result)
        })
    });

    let mut failures = 0;
    for joined in join_all(tasks).await {
        let (declaration, result) = joined.context("Declaration task panicked")?;
        match result {
            Ok(snapshot) => info!(
                "Converged {} at version {}",
                declaration.describe(),
                snapshot.version
            ),
            Err(e) => {
                failures += 1;
                error!("Failed to converge {}: {}", declaration.describe(), e);
            }
        }
    }

    let mut observed = BTreeMap::new();
    for namespace in &namespaces {
        if let Some(snapshot) = api.fetch(namespace).await? {
            observed.insert(namespace.clone(), snapshot);
        }
    }
    println!("{}", serde_json::to_string_pretty(&observed)?);

    if teardown {
        for namespace in &namespaces {
            mutator
                .delete(namespace, api.as_ref(), config.timeout)
                .await
                .with_context(|| format!("Failed to delete namespace {}", namespace))?;
            info!("Deleted namespace {}", namespace);
        }
    }

    if failures > 0 {
        anyhow::bail!("{} declarations failed to converge", failures);
    }
    Ok(())
}

/// Create `namespace` unless it already exists.
async fn provision(
    namespace: &str,
    api: &NamespaceApi,
    mutator: &Mutator,
    config: AwaitConfig,
) -> Result<()> {
    if api.fetch(namespace).await?.is_some() {
        return Ok(());
    }

    let operation = api.create(namespace, NamespaceState::default()).await?;
    info!("Provisioning namespace {} (operation {})", namespace, operation.id);
    mutator
        .await_created(namespace, api, &operation, config.timeout)
        .await
        .with_context(|| format!("Failed to provision namespace {}", namespace))?;
    Ok(())
}
