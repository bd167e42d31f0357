//! Collector transport: the only suspension point of a delivery cycle.

use crate::{Batch, EmitterConfig, EmitterResult, EnvelopeOverhead, SendOutcome};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, warn};
use tracker_event_store::{Encoding, EventPayload};
use url::Url;

/// Schema identifier of the POST envelope.
pub const PAYLOAD_DATA_SCHEMA: &str =
    "iglu:com.snowplowanalytics.snowplow/payload_data/jsonschema/1-0-4";

/// `{"schema":"<schema>","data":[` + `]}`.
const POST_WRAPPER_BYTES: usize = 88;

/// `,"stm":"1700000000000"` plus the comma between events.
const POST_PER_EVENT_BYTES: usize = 23;

/// `&stm=1700000000000`.
const GET_PER_EVENT_BYTES: usize = 18;

/// Sends one batch to the collector as a single exchange.
///
/// The transport owns the wire encoding, so it also declares how many
/// bytes its envelope adds; the batch builder sizes batches with it.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver `batch` and report what the collector said.
    async fn send(&self, batch: &Batch) -> SendOutcome;

    /// Envelope bytes added around events of the given encoding.
    fn envelope_overhead(&self, _encoding: Encoding) -> EnvelopeOverhead {
        EnvelopeOverhead::NONE
    }
}

/// POST request body.
#[derive(Debug, Serialize)]
struct PayloadData<'a> {
    schema: &'static str,
    data: Vec<BTreeMap<&'a str, &'a str>>,
}

/// reqwest-based transport for GET and POST collectors.
pub struct HttpTransport {
    client: Client,
    get_url: Url,
    post_url: Url,
    headers: BTreeMap<String, String>,
}

impl HttpTransport {
    /// Create a transport for the configured collector.
    pub fn new(config: &EmitterConfig) -> EmitterResult<Self> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        let base = config.endpoint.trim_end_matches('/');

        Ok(Self {
            client,
            get_url: Url::parse(&format!("{}{}", base, config.get_path))?,
            post_url: Url::parse(&format!("{}{}", base, config.post_path))?,
            headers: config.custom_headers.clone(),
        })
    }

    /// GET url for one event, stamped with the send time.
    fn get_request_url(&self, payload: &EventPayload, sent_at_ms: &str) -> Url {
        let mut url = self.get_url.clone();
        url.query_pairs_mut()
            .extend_pairs(payload.iter())
            .append_pair("stm", sent_at_ms);
        url
    }

    async fn send_get(&self, batch: &Batch) -> SendOutcome {
        // BatchBuilder closes every GET batch after one event. A hand-built
        // batch with more is sent in order and stops at the first non-2xx,
        // so a retry may resend its leading events.
        debug_assert_eq!(batch.len(), 1, "GET batches carry one event");
        let mut outcome = SendOutcome::Status(200);
        for event in &batch.events {
            let sent_at = now_ms();
            let url = self.get_request_url(&event.payload, &sent_at);
            let mut request = self.client.get(url);
            for (name, value) in &self.headers {
                request = request.header(name, value);
            }
            outcome = to_outcome(request.send().await);
            if !matches!(outcome, SendOutcome::Status(200..=299)) {
                break;
            }
        }
        outcome
    }

    async fn send_post(&self, batch: &Batch) -> SendOutcome {
        let sent_at = now_ms();
        let body = post_body(batch, &sent_at);

        let mut request = self
            .client
            .post(self.post_url.clone())
            .header("Content-Type", "application/json; charset=utf-8")
            .json(&body);
        for (name, value) in &self.headers {
            request = request.header(name, value);
        }
        to_outcome(request.send().await)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, batch: &Batch) -> SendOutcome {
        debug!(
            encoding = %batch.encoding,
            events = batch.len(),
            bytes = batch.total_bytes,
            "Sending batch"
        );
        match batch.encoding {
            Encoding::Get => self.send_get(batch).await,
            Encoding::Post => self.send_post(batch).await,
        }
    }

    fn envelope_overhead(&self, encoding: Encoding) -> EnvelopeOverhead {
        match encoding {
            Encoding::Get => EnvelopeOverhead {
                fixed: 0,
                per_event: GET_PER_EVENT_BYTES,
            },
            Encoding::Post => EnvelopeOverhead {
                fixed: POST_WRAPPER_BYTES,
                per_event: POST_PER_EVENT_BYTES,
            },
        }
    }
}

fn post_body<'a>(batch: &'a Batch, sent_at_ms: &'a str) -> PayloadData<'a> {
    PayloadData {
        schema: PAYLOAD_DATA_SCHEMA,
        data: batch
            .events
            .iter()
            .map(|event| {
                let mut fields: BTreeMap<&str, &str> = event.payload.iter().collect();
                fields.insert("stm", sent_at_ms);
                fields
            })
            .collect(),
    }
}

fn to_outcome(result: reqwest::Result<reqwest::Response>) -> SendOutcome {
    match result {
        Ok(response) => SendOutcome::Status(response.status().as_u16()),
        Err(e) => {
            warn!(error = %e, "Collector request failed");
            SendOutcome::NetworkError(e.to_string())
        }
    }
}

fn now_ms() -> String {
    chrono::Utc::now().timestamp_millis().to_string()
}
