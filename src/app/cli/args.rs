//! Command line arguments
//!
//! Flags are the last settings layer: they override the configuration file
//! and the environment.

use crate::core::config::Settings;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone, Default)]
#[command(name = "clickstream-gateway")]
#[command(about = "Click analytics ingestion and dashboard RPC gateway")]
#[command(version, long_version = crate::core::version::long_version())]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long = "config-file", value_name = "FILE")]
    pub config_file: Option<PathBuf>,

    /// Broker URL (amqp:// or amqps://)
    #[arg(long = "broker-url", value_name = "URL")]
    pub broker_url: Option<String>,

    /// Exchange the ingestion queue is bound to
    #[arg(long = "exchange", value_name = "NAME")]
    pub exchange: Option<String>,

    /// Ingestion queue
    #[arg(short = 'q', long = "queue", value_name = "NAME")]
    pub queue: Option<String>,

    /// Routing key pattern binding the ingestion queue
    #[arg(long = "routing-key", value_name = "PATTERN")]
    pub routing_key: Option<String>,

    /// Queue serving dashboard requests
    #[arg(long = "rpc-queue", value_name = "NAME")]
    pub rpc_queue: Option<String>,

    /// Search index base URL
    #[arg(long = "search-url", value_name = "URL")]
    pub search_url: Option<String>,

    /// Prefix for search index names
    #[arg(long = "index-prefix", value_name = "PREFIX")]
    pub index_prefix: Option<String>,

    /// Document store URL (mongodb:// or mongodb+srv://)
    #[arg(long = "store-url", value_name = "URL")]
    pub store_url: Option<String>,

    /// Document store database name
    #[arg(long = "store-database", value_name = "NAME")]
    pub store_database: Option<String>,

    /// Seconds to wait for a consumer to finish on shutdown
    #[arg(long = "shutdown-timeout", value_name = "SECONDS")]
    pub shutdown_timeout: Option<u64>,

    /// Log level
    #[arg(short = 'l', long = "log-level", value_name = "LEVEL", value_parser = ["trace", "debug", "info", "warn", "error", "off"])]
    pub log_level: Option<String>,

    /// Log output format
    #[arg(short = 'o', long = "log-format", value_name = "FORMAT", value_parser = ["text", "ext", "json"])]
    pub log_format: Option<String>,

    /// Log file path (use 'none' to disable file logging)
    #[arg(short = 'f', long = "log-file", value_name = "FILE")]
    pub log_file: Option<String>,

    /// Force colored log output
    #[arg(long = "color", conflicts_with = "no_color")]
    pub color: bool,

    /// Disable colored log output
    #[arg(long = "no-color")]
    pub no_color: bool,

    /// Validate the configuration, print it and exit
    #[arg(long = "check-config")]
    pub check_config: bool,
}

impl Args {
    /// Override `settings` with every flag that was given
    pub fn apply_to(&self, settings: &mut Settings) {
        let overrides = [
            (&self.broker_url, &mut settings.broker.url),
            (&self.exchange, &mut settings.broker.exchange),
            (&self.queue, &mut settings.broker.queue),
            (&self.routing_key, &mut settings.broker.routing_key),
            (&self.rpc_queue, &mut settings.broker.rpc_queue),
            (&self.search_url, &mut settings.search.url),
            (&self.index_prefix, &mut settings.search.index_prefix),
            (&self.store_url, &mut settings.store.url),
            (&self.store_database, &mut settings.store.database),
            (&self.log_level, &mut settings.logging.level),
            (&self.log_format, &mut settings.logging.format),
        ];
        for (flag, target) in overrides {
            if let Some(value) = flag {
                *target = value.clone();
            }
        }

        if let Some(seconds) = self.shutdown_timeout {
            settings.broker.shutdown_timeout_secs = seconds;
        }
        match self.log_file.as_deref() {
            Some("none") => settings.logging.file = None,
            Some(path) => settings.logging.file = Some(path.to_string()),
            None => {}
        }
        if self.color {
            settings.logging.color = true;
        }
        if self.no_color {
            settings.logging.color = false;
        }
    }
}
