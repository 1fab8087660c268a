//! HTTP sink. Events are POSTed either to per-event endpoint lists or to a
//! single endpoint with the event name in the `event` query parameter.
use crate::{
    error::{IntegrationError, IntegrationResult},
    events::{Event, EventType},
    marshaler::Marshaler,
    IntegrationHandler,
};
use async_trait::async_trait;
use futures_util::future::join_all;
use reqwest::{header::CONTENT_TYPE, Client, Url};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, time::Duration};
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Receives every event with `?event=<name>`. Takes precedence over the
    /// per-event URLs.
    #[serde(default)]
    pub event_endpoint_url: String,
    /// Comma separated lists.
    #[serde(default)]
    pub uplink_data_url: String,
    #[serde(default)]
    pub join_notification_url: String,
    #[serde(default)]
    pub ack_notification_url: String,
    #[serde(default)]
    pub error_notification_url: String,
    #[serde(default)]
    pub status_notification_url: String,
    #[serde(default)]
    pub location_notification_url: String,
    /// Overrides the process-wide marshaler.
    #[serde(default)]
    pub marshaler: Option<Marshaler>,
    #[serde(default = "HttpConfig::timeout_ms_default")]
    pub timeout_ms: u64,
}

impl HttpConfig {
    fn timeout_ms_default() -> u64 {
        5_000
    }

    fn per_event_urls(&self, event: EventType) -> &str {
        match event {
            EventType::Up => &self.uplink_data_url,
            EventType::Join => &self.join_notification_url,
            EventType::Ack => &self.ack_notification_url,
            EventType::Error => &self.error_notification_url,
            EventType::Status => &self.status_notification_url,
            EventType::Location => &self.location_notification_url,
        }
    }

    /// Target URLs for one event, empty when the event is not configured.
    pub fn endpoints(&self, event: EventType) -> IntegrationResult<Vec<Url>> {
        if !self.event_endpoint_url.is_empty() {
            let mut url = parse_url(&self.event_endpoint_url)?;
            url.query_pairs_mut().append_pair("event", event.as_str());
            return Ok(vec![url]);
        }

        self.per_event_urls(event)
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(parse_url)
            .collect()
    }
}

fn parse_url(s: &str) -> IntegrationResult<Url> {
    Url::parse(s).map_err(|e| IntegrationError::Configuration(format!("invalid url '{s}': {e}")))
}

pub struct HttpIntegration {
    client: Client,
    config: HttpConfig,
    marshaler: Marshaler,
}

impl HttpIntegration {
    pub fn new(config: HttpConfig, marshaler: Marshaler) -> IntegrationResult<Self> {
        for event in [
            EventType::Up,
            EventType::Join,
            EventType::Ack,
            EventType::Error,
            EventType::Status,
            EventType::Location,
        ] {
            config.endpoints(event)?;
        }
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self {
            client,
            marshaler: config.marshaler.unwrap_or(marshaler),
            config,
        })
    }

    async fn post(&self, url: Url, body: Vec<u8>) -> IntegrationResult<()> {
        let mut req = self
            .client
            .post(url.clone())
            .header(CONTENT_TYPE, self.marshaler.content_type());
        for (k, v) in &self.config.headers {
            req = req.header(k.as_str(), v.as_str());
        }
        let resp = req.body(body).send().await?;
        if !resp.status().is_success() {
            return Err(IntegrationError::Publish(format!(
                "{url} returned {}",
                resp.status()
            )));
        }
        debug!(url = %url, "HTTP event posted");
        Ok(())
    }
}

#[async_trait]
impl IntegrationHandler for HttpIntegration {
    fn kind(&self) -> &'static str {
        "http"
    }

    async fn publish(&self, event: Event<'_>) -> IntegrationResult<()> {
        let urls = self.config.endpoints(event.event_type())?;
        if urls.is_empty() {
            return Ok(());
        }
        let body = self.marshaler.marshal(event)?;

        let results = join_all(urls.into_iter().map(|u| self.post(u, body.clone()))).await;
        let mut first_err = None;
        for r in results {
            if let Err(e) = r {
                warn!(error = %e, "HTTP integration endpoint failed");
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_endpoint_gets_event_parameter() {
        let c = HttpConfig {
            event_endpoint_url: "http://localhost:8090/events?token=x".into(),
            uplink_data_url: "http://ignored/".into(),
            ..Default::default()
        };
        let urls = c.endpoints(EventType::Join).unwrap();
        assert_eq!(urls.len(), 1);
        assert_eq!(
            urls[0].as_str(),
            "http://localhost:8090/events?token=x&event=join"
        );
    }

    #[test]
    fn per_event_lists_are_split() {
        let c = HttpConfig {
            uplink_data_url: "http://a/up, http://b/up".into(),
            ..Default::default()
        };
        let urls = c.endpoints(EventType::Up).unwrap();
        assert_eq!(urls.len(), 2);
        assert_eq!(urls[1].host_str(), Some("b"));
        assert!(c.endpoints(EventType::Status).unwrap().is_empty());
    }

    #[test]
    fn invalid_url_fails_construction() {
        let c = HttpConfig {
            ack_notification_url: "not a url".into(),
            ..Default::default()
        };
        assert!(HttpIntegration::new(c, Marshaler::Json).is_err());
    }
}
