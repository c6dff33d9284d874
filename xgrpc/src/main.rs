//! # xgrpc CLI Entry Point
//!
//! The main executable for the xgrpc tool. This file drives the application lifecycle:
//!
//! 1. **Initialization**: Parses command-line arguments using [`cli::Cli`] and installs the
//!    log subscriber (filtered by `RUST_LOG`, `warn` by default).
//! 2. **Schema**: Loads `.proto` files and protosets given on the command line.
//! 3. **Connection**: Connects to the target through `xgrpc_core`, registering an in-memory
//!    discovery registry when `--instances` is given, and loads the schema through reflection
//!    if needed.
//! 4. **Execution & Presentation**: Runs the command and prints its result to standard
//!    output, errors to standard error.
mod cli;
mod formatter;

use anyhow::{Context, bail};
use clap::Parser;
use cli::{Cli, Commands};
use formatter::{FormattedString, MethodList, ServiceList, VerboseResponse};
use std::process;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use xgrpc_core::Environment;
use xgrpc_core::client::{Client, InvokeOptions};
use xgrpc_core::connection::ConnectOptions;
use xgrpc_core::discovery::{
    DEFAULT_GROUP, DiscoveryResolverBuilder, Instance, MemoryRegistry, ResolverRegistry,
    SubscriptionTable, Target,
};

#[tokio::main]
async fn main() {
    let args = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    if let Err(err) = run(args).await {
        eprintln!("{}", FormattedString::from(err));
        process::exit(1);
    }
}

async fn run(args: Cli) -> anyhow::Result<()> {
    let env = environment(&args)?;
    let mut client: Client = Client::new(env);

    for path in &args.schema.protosets {
        client
            .load_protoset(path)
            .with_context(|| format!("Failed to load protoset {}", path.display()))?;
    }

    if !args.schema.protos.is_empty() {
        client
            .load_files(&args.schema.import_paths, &args.schema.protos)
            .context("Failed to compile proto files")?;
    }

    let options = ConnectOptions {
        plaintext: args.connection.plaintext,
        timeout: args.connection.timeout,
        reflect: args.schema.use_reflection(),
        max_receive_size: args.connection.max_receive_size,
        max_send_size: args.connection.max_send_size,
        share_conn: false,
        user_agent: args.connection.user_agent.clone(),
    };

    client
        .connect(&args.target, options)
        .await
        .with_context(|| format!("Connection to '{}' failed", args.target))?;

    let result = execute(&client, args.command, args.connection.timeout).await;
    client.close().await;
    result
}

async fn execute(
    client: &Client,
    command: Commands,
    timeout: std::time::Duration,
) -> anyhow::Result<()> {
    match command {
        Commands::Call {
            method,
            body,
            headers,
            tags,
            verbose,
        } => {
            let options = headers
                .into_iter()
                .fold(InvokeOptions::new().with_timeout(timeout), |options, (k, v)| {
                    options.with_metadata(k, v)
                });
            let options = tags
                .into_iter()
                .fold(options, |options, (k, v)| options.with_tag(k, v));

            let response = client
                .invoke(&method, body, options)
                .await
                .with_context(|| format!("Call to '{method}' failed"))?;

            if verbose {
                println!("{}", FormattedString::from(VerboseResponse(response)));
            } else {
                println!("{}", FormattedString::from(response));
            }
        }
        Commands::List { services } => {
            if services {
                println!("{}", FormattedString::from(ServiceList(client.store().services())));
            } else {
                println!("{}", FormattedString::from(MethodList(client.methods())));
            }
        }
        Commands::Describe { symbol } => describe(client, &symbol)?,
    }

    Ok(())
}

fn describe(client: &Client, symbol: &str) -> anyhow::Result<()> {
    let pool = client.store().pool();
    let symbol = symbol.trim_start_matches('/');

    if let Some((service, method)) = symbol.split_once('/') {
        let method = pool
            .get_service_by_name(service)
            .and_then(|s| s.methods().find(|m| m.name() == method))
            .with_context(|| format!("Method '{symbol}' not found"))?;
        println!("{}", FormattedString::from(method));
    } else if let Some(service) = pool.get_service_by_name(symbol) {
        println!("{}", FormattedString::from(service));
    } else if let Some(message) = pool.get_message_by_name(symbol) {
        println!("{}", FormattedString::from(message));
    } else if let Some(enum_desc) = pool.get_enum_by_name(symbol) {
        println!("{}", FormattedString::from(enum_desc));
    } else {
        bail!("Symbol '{symbol}' not found");
    }

    Ok(())
}

/// Registers an in-memory registry holding `--instances` under the `discovery` scheme.
fn environment(args: &Cli) -> anyhow::Result<Environment> {
    let env = Environment::new();

    let Some(instances) = &args.discovery.instances else {
        return Ok(env);
    };

    let target = Target::parse(&args.target)
        .filter(|t| t.scheme == xgrpc_core::discovery::DISCOVERY_SCHEME)
        .context("--instances requires a 'discovery:///package.Service' target")?;

    let instances: Vec<Instance> =
        serde_json::from_value(instances.clone()).context("Invalid --instances")?;
    let group = args.discovery.group.as_deref().unwrap_or(DEFAULT_GROUP);

    let registry = MemoryRegistry::new();
    registry.publish(group, target.service_name(), instances);

    let builder = DiscoveryResolverBuilder::new(Arc::new(registry), SubscriptionTable::new())
        .with_group(group);

    Ok(env.with_resolvers(ResolverRegistry::new().with(Arc::new(builder))))
}
