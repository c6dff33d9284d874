//! # CLI
//!
//! This module defines the command-line interface of `xgrpc` using `clap`.
//!
//! It is responsible for parsing user input and performing validation (e.g., ensuring headers are `key:value`);
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "xgrpc", version, about = "Dynamic gRPC CLI with service discovery")]
pub struct Cli {
    /// The target to connect to: `host:port`, `http(s)://host:port` or
    /// `discovery:///package.Service`
    pub target: String,

    #[command(flatten)]
    pub schema: SchemaArgs,

    #[command(flatten)]
    pub connection: ConnectionArgs,

    #[command(flatten)]
    pub discovery: DiscoveryArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args)]
pub struct SchemaArgs {
    /// A `.proto` file to compile. Can be repeated
    #[arg(long = "proto", global = true)]
    pub protos: Vec<PathBuf>,

    /// Directory searched for `.proto` imports. Can be repeated
    #[arg(long = "import-path", short = 'I', global = true)]
    pub import_paths: Vec<PathBuf>,

    /// A binary `FileDescriptorSet` file. Can be repeated
    #[arg(long = "protoset", global = true)]
    pub protosets: Vec<PathBuf>,

    /// Load the schema through server reflection. Implied when no other schema source is given
    #[arg(long, global = true)]
    pub reflect: bool,
}

impl SchemaArgs {
    pub fn use_reflection(&self) -> bool {
        self.reflect || (self.protos.is_empty() && self.protosets.is_empty())
    }
}

#[derive(Args)]
pub struct ConnectionArgs {
    /// Connect without TLS
    #[arg(long, global = true)]
    pub plaintext: bool,

    /// Deadline for connecting and for each call (e.g. `500ms`, `10s`)
    #[arg(long, global = true, default_value = "60s", value_parser = parse_duration)]
    pub timeout: Duration,

    /// Maximum size in bytes of a received message
    #[arg(long, global = true, default_value_t = 0)]
    pub max_receive_size: u64,

    /// Maximum size in bytes of a sent message
    #[arg(long, global = true, default_value_t = 0)]
    pub max_send_size: u64,

    /// Overrides the default user agent
    #[arg(long, global = true)]
    pub user_agent: Option<String>,
}

#[derive(Args)]
pub struct DiscoveryArgs {
    /// Instances of the target service as a JSON array, e.g.
    /// '[{"ip": "10.0.0.1", "port": 8080, "metadata": {"gRPC_port": "9100"}}]'.
    /// Requires a `discovery:///package.Service` target
    #[arg(long, global = true, value_parser = parse_json)]
    pub instances: Option<serde_json::Value>,

    /// Registry group of the target service
    #[arg(long, global = true)]
    pub group: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Perform a unary gRPC call
    ///
    /// ## Examples:
    ///
    /// ```bash
    /// xgrpc localhost:50051 --plaintext call my.pkg.Service/Method --body '{"key": "value"}'
    /// ```
    Call {
        /// Method to invoke (package.Service/Method)
        #[arg(value_parser = parse_method)]
        method: String,

        /// JSON request body
        #[arg(long, default_value = "{}", value_parser = parse_json)]
        body: serde_json::Value,

        #[arg(short = 'H', long = "header", value_parser = parse_header)]
        headers: Vec<(String, String)>,

        /// Observability tag attached to the call (`key=value`). Can be repeated
        #[arg(long = "tag", value_parser = parse_tag)]
        tags: Vec<(String, String)>,

        /// Print the status, headers and trailers along with the message
        #[arg(short, long)]
        verbose: bool,
    },

    /// List the methods of the loaded schema
    List {
        /// Only list services
        #[arg(long)]
        services: bool,
    },

    /// Describe a service, method or message of the loaded schema
    Describe {
        /// Fully qualified symbol (e.g. my.package.Service, my.package.Service/Method or
        /// my.package.Message)
        symbol: String,
    },
}

fn parse_method(value: &str) -> Result<String, String> {
    let trimmed = value.trim_start_matches('/');
    let (service, method) = trimmed.split_once('/').ok_or_else(|| {
        format!("Invalid method format: '{value}'. Expected 'package.Service/Method'",)
    })?;

    if service.trim().is_empty() || method.trim().is_empty() {
        return Err("Service and Method names cannot be empty".to_string());
    }

    Ok(trimmed.to_string())
}

fn parse_header(s: &str) -> Result<(String, String), String> {
    s.split_once(':')
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .ok_or_else(|| "Format must be 'key:value'".to_string())
}

fn parse_tag(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .ok_or_else(|| "Format must be 'key=value'".to_string())
}

fn parse_json(value: &str) -> Result<serde_json::Value, String> {
    serde_json::from_str(value).map_err(|e| format!("Invalid JSON: {e}"))
}

fn parse_duration(value: &str) -> Result<Duration, String> {
    humantime::parse_duration(value).map_err(|e| format!("Invalid duration: {e}"))
}
