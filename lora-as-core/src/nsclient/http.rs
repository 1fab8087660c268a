//! JSON over HTTP transport for the network-server API.
use super::{
    DeviceActivation, DeviceQueueItem, MulticastGroup, MulticastQueueItem, NetworkServerClient,
    NsClientPool, ProprietaryPayload,
};
use async_trait::async_trait;
use dashmap::DashMap;
use lora_as_error::{ASError, ASResult};
use lora_as_lorawan::EUI64;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};
use std::{sync::Arc, time::Duration};
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NextFCntResponse {
    f_cnt: u32,
}

/// Client bound to one network-server.
pub struct HttpNsClient {
    base_url: String,
    client: Client,
    timeout: Duration,
}

impl HttpNsClient {
    pub fn new(server: &str, timeout: Duration) -> ASResult<Self> {
        let base_url = if server.starts_with("http://") || server.starts_with("https://") {
            server.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", server.trim_end_matches('/'))
        };
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ASError::Validation(format!("invalid network-server client: {e}")))?;
        Ok(Self {
            base_url,
            client,
            timeout,
        })
    }

    #[inline]
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, req: RequestBuilder) -> ASResult<reqwest::Response> {
        let resp = req.send().await.map_err(|e| {
            if e.is_timeout() {
                ASError::Timeout(self.timeout)
            } else {
                ASError::TransientRemote(e.to_string())
            }
        })?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let body = resp.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::NOT_FOUND => ASError::NotFound(body),
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => ASError::Validation(body),
            StatusCode::CONFLICT => ASError::Conflict(body),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ASError::Auth(body),
            s => ASError::TransientRemote(format!("network-server returned {s}: {body}")),
        })
    }

    async fn json<T: DeserializeOwned>(&self, req: RequestBuilder) -> ASResult<T> {
        self.send(req)
            .await?
            .json::<T>()
            .await
            .map_err(|e| ASError::TransientRemote(format!("invalid network-server response: {e}")))
    }
}

#[async_trait]
impl NetworkServerClient for HttpNsClient {
    async fn create_device_queue_item(&self, item: DeviceQueueItem) -> ASResult<()> {
        debug!(dev_eui = %item.dev_eui, f_cnt = item.f_cnt, "Creating device-queue item");
        self.send(self.client.post(self.url("/api/device-queue")).json(&item))
            .await?;
        Ok(())
    }

    async fn flush_device_queue_for_dev_eui(&self, dev_eui: EUI64) -> ASResult<()> {
        self.send(
            self.client
                .delete(self.url(&format!("/api/devices/{dev_eui}/queue"))),
        )
        .await?;
        Ok(())
    }

    async fn get_next_downlink_f_cnt_for_dev_eui(&self, dev_eui: EUI64) -> ASResult<u32> {
        let resp: NextFCntResponse = self
            .json(
                self.client
                    .get(self.url(&format!("/api/devices/{dev_eui}/next-downlink-fcnt"))),
            )
            .await?;
        Ok(resp.f_cnt)
    }

    async fn get_device_activation(&self, dev_eui: EUI64) -> ASResult<DeviceActivation> {
        self.json(
            self.client
                .get(self.url(&format!("/api/devices/{dev_eui}/activation"))),
        )
        .await
    }

    async fn create_multicast_group(&self, group: MulticastGroup) -> ASResult<()> {
        self.send(self.client.post(self.url("/api/multicast-groups")).json(&group))
            .await?;
        Ok(())
    }

    async fn delete_multicast_group(&self, id: Uuid) -> ASResult<()> {
        self.send(
            self.client
                .delete(self.url(&format!("/api/multicast-groups/{id}"))),
        )
        .await?;
        Ok(())
    }

    async fn enqueue_multicast_queue_item(&self, item: MulticastQueueItem) -> ASResult<()> {
        let path = format!("/api/multicast-groups/{}/queue", item.multicast_group_id);
        self.send(self.client.post(self.url(&path)).json(&item))
            .await?;
        Ok(())
    }

    async fn send_proprietary_payload(&self, payload: ProprietaryPayload) -> ASResult<()> {
        self.send(
            self.client
                .post(self.url("/api/proprietary-payload"))
                .json(&payload),
        )
        .await?;
        Ok(())
    }
}

/// Pool of [`HttpNsClient`]s keyed by server address.
pub struct HttpNsClientPool {
    timeout: Duration,
    clients: DashMap<String, Arc<HttpNsClient>>,
}

impl HttpNsClientPool {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            clients: DashMap::new(),
        }
    }
}

impl NsClientPool for HttpNsClientPool {
    fn get(&self, server: &str) -> ASResult<Arc<dyn NetworkServerClient>> {
        if let Some(c) = self.clients.get(server) {
            return Ok(c.value().clone());
        }

        let client = Arc::new(HttpNsClient::new(server, self.timeout)?);
        info!(server, "Created network-server client");
        let client = self
            .clients
            .entry(server.to_string())
            .or_insert(client)
            .value()
            .clone();
        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_reuses_clients_per_server() {
        let pool = HttpNsClientPool::new(Duration::from_secs(1));
        let a = pool.get("ns-1:8000").unwrap();
        let b = pool.get("ns-1:8000").unwrap();
        let c = pool.get("https://ns-2:8000/").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));

        let c = c.downcast_arc::<HttpNsClient>().ok().unwrap();
        assert_eq!(c.base_url, "https://ns-2:8000");
        let a = a.downcast_arc::<HttpNsClient>().ok().unwrap();
        assert_eq!(a.url("/api/x"), "http://ns-1:8000/api/x");
    }
}
