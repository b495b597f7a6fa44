use crate::config::Config;
use crate::dataset::DatasetId;
use crate::error::{Error, Result};
use crate::stream::{BatchSource, BatchStream};
use arrow_flight::decode::{DecodedPayload, FlightDataDecoder, FlightRecordBatchStream};
use arrow_flight::flight_service_client::FlightServiceClient;
use arrow_flight::FlightClient;
use async_trait::async_trait;
use futures::StreamExt;
use tokio::time::timeout;
use tonic::transport::{Channel, Endpoint};
use tracing::debug;

const DEFAULT_PORT: u16 = 8888;

/// Arrow Flight batch source.
///
/// Each [`BatchSource::open_stream`] call issues one `DoGet` with the dataset
/// name as the ticket. The underlying gRPC channel is shared, so several
/// datasets may be streamed at the same time.
#[derive(Clone, Debug)]
pub struct FlightBatchSource {
    inner: FlightServiceClient<Channel>,
    endpoint: String,
}

impl FlightBatchSource {
    /// Connect to the Flight service described by `config`.
    pub async fn connect(config: &Config) -> Result<Self> {
        let endpoint = normalize_address(&config.address)?;

        let channel = timeout(
            config.connect_timeout,
            Endpoint::from_shared(endpoint.clone())
                .map_err(|e| Error::Connection(format!("Invalid address '{}': {}", endpoint, e)))?
                .connect_timeout(config.connect_timeout)
                .connect(),
        )
        .await
        .map_err(|_| Error::Timeout(format!("Connection to {} timed out", endpoint)))?
        .map_err(|e| Error::Connection(format!("Failed to connect to {}: {}", endpoint, e)))?;

        Ok(Self::from_channel(channel, endpoint, config.max_message_size))
    }

    /// Wrap an already established channel.
    pub fn from_channel(channel: Channel, endpoint: String, max_message_size: usize) -> Self {
        let inner = FlightServiceClient::new(channel)
            .max_decoding_message_size(max_message_size)
            .max_encoding_message_size(max_message_size);
        Self { inner, endpoint }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl BatchSource for FlightBatchSource {
    async fn open_stream(&self, dataset: &DatasetId) -> Result<BatchStream> {
        let mut client = FlightClient::new_from_inner(self.inner.clone());
        let response = client.do_get(dataset.ticket()).await?;
        debug!(dataset = %dataset, endpoint = %self.endpoint, "DoGet accepted");
        stream_from_flight(response).await
    }
}

/// Wait for the schema message of a `DoGet` response and wrap the remaining
/// record batches.
pub async fn stream_from_flight(response: FlightRecordBatchStream) -> Result<BatchStream> {
    let mut decoder: FlightDataDecoder = response.into_inner();

    let schema = loop {
        match decoder.next().await {
            Some(Ok(data)) => match data.payload {
                DecodedPayload::Schema(schema) => break schema,
                DecodedPayload::RecordBatch(_) => return Err(Error::MissingSchema),
                _ => continue,
            },
            Some(Err(e)) => return Err(e.into()),
            None => return Err(Error::MissingSchema),
        }
    };

    let batches = decoder.filter_map(|item| async move {
        match item {
            Ok(data) => match data.payload {
                DecodedPayload::RecordBatch(batch) => Some(Ok(batch)),
                _ => None,
            },
            Err(e) => Some(Err(Error::from(e))),
        }
    });

    Ok(BatchStream::new(schema, batches.boxed()))
}

/// Turn a user supplied address into a URI tonic can dial.
///
/// Accepts `host`, `host:port`, `grpc://`, `grpc+tcp://`, `grpc+tls://`,
/// `http://` and `https://` forms.
pub fn normalize_address(address: &str) -> Result<String> {
    let address = address.trim();
    let (scheme, rest) = match address.split_once("://") {
        Some(("grpc" | "grpc+tcp" | "http", rest)) => ("http", rest),
        Some(("grpcs" | "grpc+tls" | "https", rest)) => ("https", rest),
        Some((other, _)) => {
            return Err(Error::Config(format!("Unsupported address scheme '{}'", other)))
        }
        None => ("http", address),
    };

    let rest = rest.trim_end_matches('/');
    let (host, port) = match rest.rsplit_once(':') {
        Some((host, port)) => {
            let port: u16 = port
                .parse()
                .map_err(|_| Error::Config(format!("Invalid port in address '{}'", address)))?;
            (host, port)
        }
        None => (rest, DEFAULT_PORT),
    };
    let host = if host.is_empty() { "localhost" } else { host };

    Ok(format!("{}://{}:{}", scheme, host, port))
}
