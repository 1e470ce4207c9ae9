use groupstream::consumer::ConsumerOptions;
use std::str::FromStr;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(
    about = "Reliable consumption of Redis streams through consumer groups.",
    version = env!("CARGO_PKG_VERSION")
)]
pub struct MainOptions {
    /// Log level, scopable to different modules
    ///
    /// Levels: trace, debug, info, warn, error
    #[structopt(
        short,
        long,
        global = true,
        default_value = "info",
        env = "RUST_LOG",
        value_name = "level"
    )]
    pub log: String,

    /// Format of log output (text, compact or json)
    #[structopt(long, global = true, env, default_value = "text", value_name = "format")]
    pub log_format: LogFormat,

    /// Redis database server URL
    #[structopt(
        short,
        long,
        global = true,
        env = "REDIS",
        default_value = "redis://localhost/",
        value_name = "url"
    )]
    pub redis: String,

    #[structopt(subcommand)]
    pub command: Command,
}

#[derive(Debug, StructOpt)]
pub enum Command {
    /// Consume a stream and log every message received
    Consume(ConsumerOptions),
    /// Publish a single JSON message to a stream
    Publish(PublishOptions),
}

#[derive(Debug, StructOpt)]
pub struct PublishOptions {
    /// Key of the stream to publish to
    #[structopt(long, env, value_name = "key")]
    pub stream: String,

    /// Identifier of this producer embedded into the message
    #[structopt(long, env, default_value = "groupstream-cli")]
    pub producer: String,

    /// Name of the entry field carrying the encoded message
    #[structopt(long, env, default_value = "payload")]
    pub payload_field: String,

    /// Message content as JSON
    pub content: String,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Text,
    Compact,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{}'", other)),
        }
    }
}
