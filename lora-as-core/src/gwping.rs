//! Gateway discovery: pings sent by one gateway and heard by the others.
use crate::nsclient::{NsClientPool, ProprietaryPayload};
use chrono::{DateTime, Utc};
use lora_as_error::{ASError, ASResult};
use lora_as_integration::RxInfo;
use lora_as_lorawan::EUI64;
use lora_as_models::{
    constants::GW_PING_KEY_PREFIX,
    entities::prelude::{GatewayPingActiveModel, GatewayPingRxActiveModel},
    EphemeralStore,
};
use lora_as_repository::{GatewayPingRepository, GatewayRepository};
use sea_orm::{DatabaseConnection, Set, TransactionTrait};
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, instrument, warn};

pub struct GatewayPinger {
    db: DatabaseConnection,
    store: Arc<dyn EphemeralStore>,
    ns: Arc<dyn NsClientPool>,
    interval: Duration,
    lookup_ttl: Duration,
}

impl GatewayPinger {
    pub fn new(
        db: DatabaseConnection,
        store: Arc<dyn EphemeralStore>,
        ns: Arc<dyn NsClientPool>,
        interval: Duration,
        lookup_ttl: Duration,
    ) -> Self {
        Self {
            db,
            store,
            ns,
            interval,
            lookup_ttl,
        }
    }

    #[inline]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Pings the gateway that waited the longest, if any is due. Returns
    /// whether a ping was sent.
    #[instrument(name = "gateway-ping", skip_all)]
    pub async fn tick(&self, now: DateTime<Utc>) -> ASResult<bool> {
        let txn = self.db.begin().await?;
        let Some((gateway, ns)) = GatewayRepository::find_next_for_ping(now, &txn).await? else {
            return Ok(false);
        };
        let mac = EUI64::from_slice(&gateway.mac)?;

        let ping = GatewayPingRepository::create(
            GatewayPingActiveModel {
                gateway_mac: Set(gateway.mac.clone()),
                frequency: Set(ns.gateway_discovery_tx_frequency),
                dr: Set(ns.gateway_discovery_dr),
                created_at: Set(now),
                ..Default::default()
            },
            &txn,
        )
        .await?;

        let mic = loop {
            let mic = rand::random::<[u8; 4]>();
            if mic != [0; 4] {
                break mic;
            }
        };
        self.store
            .set_ex(&ping_key(&mic), ping.id.to_be_bytes().to_vec(), self.lookup_ttl)
            .await?;

        self.ns
            .get(&ns.server)?
            .send_proprietary_payload(ProprietaryPayload {
                mac_payload: Vec::new(),
                mic: mic.to_vec(),
                gateway_macs: vec![mac],
                polarization_inversion: false,
                frequency: u32::try_from(ns.gateway_discovery_tx_frequency)?,
                dr: u8::try_from(ns.gateway_discovery_dr)?,
            })
            .await?;

        GatewayRepository::set_last_ping(gateway, ping.id, now, &txn).await?;
        txn.commit().await?;

        debug!(gateway = %mac, ping_id = ping.id, mic = %hex::encode(mic), "Gateway ping sent");
        Ok(true)
    }

    /// Records which gateways heard the ping identified by `mic`.
    #[instrument(name = "gateway-ping-rx", skip_all, fields(mic = %hex::encode(mic)))]
    pub async fn handle_received_ping(&self, mic: &[u8], rx_info: &[RxInfo]) -> ASResult<()> {
        let key = ping_key(mic);
        let raw = self
            .store
            .get(&key)
            .await?
            .ok_or_else(|| ASError::NotFound(format!("ping lookup for MIC {}", hex::encode(mic))))?;
        self.store.del(&key).await?;

        let raw = <[u8; 4]>::try_from(raw.as_slice())
            .map_err(|_| ASError::Fatal(format!("corrupt ping lookup '{key}'")))?;
        let ping_id = i32::from_be_bytes(raw);

        let txn = self.db.begin().await?;
        let ping = GatewayPingRepository::find_by_id(ping_id, &txn)
            .await?
            .ok_or_else(|| ASError::NotFound(format!("gateway-ping {ping_id}")))?;

        let mut received = 0;
        for rx in rx_info.iter().filter(|rx| rx.gateway_id != ping.gateway_mac) {
            let received_at = match rx.time.as_deref().map(DateTime::parse_from_rfc3339) {
                Some(Ok(t)) => Some(t.with_timezone(&Utc)),
                Some(Err(e)) => {
                    warn!(gateway = %hex::encode(&rx.gateway_id), error = %e, "Invalid reception time");
                    None
                }
                None => None,
            };
            GatewayPingRepository::create_rx(
                GatewayPingRxActiveModel {
                    ping_id: Set(ping.id),
                    gateway_mac: Set(rx.gateway_id.clone()),
                    received_at: Set(received_at),
                    rssi: Set(rx.rssi),
                    lora_snr: Set(rx.lora_snr),
                    latitude: Set(rx.location.as_ref().map(|l| l.latitude)),
                    longitude: Set(rx.location.as_ref().map(|l| l.longitude)),
                    altitude: Set(rx.location.as_ref().map(|l| l.altitude)),
                    created_at: Set(Utc::now()),
                    ..Default::default()
                },
                &txn,
            )
            .await?;
            received += 1;
        }
        txn.commit().await?;

        info!(ping_id, received, "Gateway ping received");
        Ok(())
    }
}

fn ping_key(mic: &[u8]) -> String {
    format!("{GW_PING_KEY_PREFIX}:{}", hex::encode(mic))
}
