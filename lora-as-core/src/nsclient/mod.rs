//! Outbound RPC stubs towards the network-servers.
//!
//! The application server may talk to several network-servers; clients are
//! pooled by server address (`host:port`) and shared across tasks.
pub mod http;

use async_trait::async_trait;
use downcast_rs::{impl_downcast, DowncastSync};
use lora_as_error::ASResult;
use lora_as_lorawan::{AES128Key, DevAddr, EUI64};
use lora_as_models::enums::common::MulticastGroupType;
use lora_as_repository::NetworkServerRepository;
use sea_orm::ConnectionTrait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

pub use http::{HttpNsClient, HttpNsClientPool};

/// Downlink pushed to the network-server queue of one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceQueueItem {
    pub dev_eui: EUI64,
    pub dev_addr: DevAddr,
    /// FRMPayload encrypted with the AppSKey.
    #[serde(with = "base64_bytes")]
    pub frm_payload: Vec<u8>,
    pub f_cnt: u32,
    pub f_port: u8,
    pub confirmed: bool,
}

/// Session state of a device as known by the network-server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceActivation {
    pub dev_eui: EUI64,
    pub dev_addr: DevAddr,
    pub f_nwk_s_int_key: AES128Key,
    pub s_nwk_s_int_key: AES128Key,
    pub nwk_s_enc_key: AES128Key,
    pub f_cnt_up: u32,
    pub n_f_cnt_down: u32,
    #[serde(default)]
    pub a_f_cnt_down: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MulticastGroup {
    pub id: Uuid,
    pub mc_addr: DevAddr,
    pub mc_nwk_s_key: AES128Key,
    pub f_cnt: u32,
    pub group_type: MulticastGroupType,
    pub dr: u8,
    pub frequency: u32,
    /// Class-B ping-slot period in slots, 0 for class-C.
    pub ping_slot_period: u32,
    pub service_profile_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MulticastQueueItem {
    pub multicast_group_id: Uuid,
    #[serde(with = "base64_bytes")]
    pub frm_payload: Vec<u8>,
    pub f_cnt: u32,
    pub f_port: u8,
}

/// Proprietary frame transmitted by the given gateways, used for pings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProprietaryPayload {
    #[serde(with = "base64_bytes")]
    pub mac_payload: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub mic: Vec<u8>,
    pub gateway_macs: Vec<EUI64>,
    pub polarization_inversion: bool,
    pub frequency: u32,
    pub dr: u8,
}

/// RPCs the application server issues against a network-server.
#[async_trait]
pub trait NetworkServerClient: DowncastSync {
    async fn create_device_queue_item(&self, item: DeviceQueueItem) -> ASResult<()>;

    async fn flush_device_queue_for_dev_eui(&self, dev_eui: EUI64) -> ASResult<()>;

    async fn get_next_downlink_f_cnt_for_dev_eui(&self, dev_eui: EUI64) -> ASResult<u32>;

    async fn get_device_activation(&self, dev_eui: EUI64) -> ASResult<DeviceActivation>;

    async fn create_multicast_group(&self, group: MulticastGroup) -> ASResult<()>;

    async fn delete_multicast_group(&self, id: Uuid) -> ASResult<()>;

    async fn enqueue_multicast_queue_item(&self, item: MulticastQueueItem) -> ASResult<()>;

    async fn send_proprietary_payload(&self, payload: ProprietaryPayload) -> ASResult<()>;
}

impl_downcast!(sync NetworkServerClient);

/// Resolves a client for a network-server address.
pub trait NsClientPool: Send + Sync + 'static {
    fn get(&self, server: &str) -> ASResult<Arc<dyn NetworkServerClient>>;
}

/// Client of the network-server the device is provisioned on.
pub async fn client_for_device<C>(
    pool: &dyn NsClientPool,
    dev_eui: &EUI64,
    db: &C,
) -> ASResult<Arc<dyn NetworkServerClient>>
where
    C: ConnectionTrait,
{
    let ns = NetworkServerRepository::find_for_device(dev_eui.as_bytes(), db).await?;
    pool.get(&ns.server)
}

/// Client of the network-server behind the application's service-profile.
pub async fn client_for_application<C>(
    pool: &dyn NsClientPool,
    application_id: i32,
    db: &C,
) -> ASResult<Arc<dyn NetworkServerClient>>
where
    C: ConnectionTrait,
{
    let ns = NetworkServerRepository::find_for_application(application_id, db).await?;
    pool.get(&ns.server)
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(b: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(b))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        STANDARD.decode(s.as_bytes()).map_err(de::Error::custom)
    }
}
