use anyhow::{Context, Result};
use async_trait::async_trait;
use groupstream::consumer::{ConsumerOptions, Handler, HandlerResult, StreamConsumer};
use groupstream::library::codec::JsonCodec;
use groupstream::library::store::redis::{MultiplexedRedisFactory, RedisStreamStore};
use groupstream::message::MessageFrame;
use groupstream::publisher::MessagePublisher;
use options::{Command, LogFormat, PublishOptions};
use serde_json::Value;
use std::sync::Arc;
use structopt::StructOpt;
use tokio::signal::ctrl_c;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

mod options;

type Store = RedisStreamStore<MultiplexedRedisFactory>;

struct LoggingHandler;

#[async_trait]
impl Handler for LoggingHandler {
    type Content = Value;

    async fn handle(&self, message: MessageFrame<Value>, _: &CancellationToken) -> HandlerResult {
        let content: &Value = &message;

        info!(
            producer = message.producer(),
            published = %message.publication_time(),
            %content,
            "Received message"
        );

        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let options = options::MainOptions::from_args();

    let formatter = tracing_subscriber::fmt().with_env_filter(options.log);

    match options.log_format {
        LogFormat::Text => formatter.init(),
        LogFormat::Compact => formatter.compact().init(),
        LogFormat::Json => formatter.json().init(),
    };

    info!("groupstream {}", env!("CARGO_PKG_VERSION"));

    let factory = MultiplexedRedisFactory::new(&options.redis)?;
    let store = Arc::new(RedisStreamStore::new(factory));

    match options.command {
        Command::Consume(consumer) => consume(store, consumer).await,
        Command::Publish(publish_options) => publish(store, publish_options).await,
    }
}

async fn consume(store: Arc<Store>, options: ConsumerOptions) -> Result<()> {
    let cancel = CancellationToken::new();
    let consumer = StreamConsumer::new(store, JsonCodec, options);

    let signal = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = ctrl_c().await {
            error!(error = %e, "Unable to listen for termination signal");
        }

        info!("Shutting down");
        signal.cancel();
    });

    let report = consumer.run(&LoggingHandler, &cancel).await?;
    info!(?report, "Consumer terminated");

    Ok(())
}

async fn publish(store: Arc<Store>, options: PublishOptions) -> Result<()> {
    let content: Value =
        serde_json::from_str(&options.content).context("message content is not valid JSON")?;

    let publisher = MessagePublisher::new(store, JsonCodec, options.stream, options.producer)
        .with_payload_field(options.payload_field);

    let id = publisher.publish(&content).await?;
    println!("{}", id);

    Ok(())
}
