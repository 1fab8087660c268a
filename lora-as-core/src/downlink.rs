//! Encrypts application payloads and pushes them onto network-server queues.
use crate::nsclient::{
    client_for_application, client_for_device, DeviceQueueItem, MulticastQueueItem, NsClientPool,
};
use chrono::Utc;
use lora_as_error::{ASError, ASResult};
use lora_as_lorawan::{crypto::encrypt_frm_payload, AES128Key, DevAddr, EUI64};
use lora_as_models::entities::prelude::DeviceQueueActiveModel;
use lora_as_repository::{
    DeviceActivationRepository, DeviceProfileRepository, DeviceQueueRepository, DeviceRepository,
    MulticastGroupRepository,
};
use sea_orm::{ConnectionTrait, DatabaseConnection, Set, TransactionTrait};
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

/// Downlink path shared by the integrations, the command reconcilers, the
/// FUOTA scheduler and the clock-sync package.
///
/// The `*_in` variants run on a caller supplied connection so they join an
/// open transaction; the others open their own.
pub struct DownlinkDispatcher {
    db: DatabaseConnection,
    ns: Arc<dyn NsClientPool>,
}

impl DownlinkDispatcher {
    pub fn new(db: DatabaseConnection, ns: Arc<dyn NsClientPool>) -> Self {
        Self { db, ns }
    }

    /// Enqueues `data` for one device, returns the FCnt it was encrypted with.
    pub async fn enqueue(
        &self,
        dev_eui: EUI64,
        confirmed: bool,
        f_port: u8,
        data: &[u8],
    ) -> ASResult<u32> {
        let txn = self.db.begin().await?;
        let f_cnt = self
            .enqueue_in(&txn, dev_eui, confirmed, f_port, data)
            .await?;
        txn.commit().await?;
        Ok(f_cnt)
    }

    #[instrument(name = "downlink-enqueue", skip(self, db, data), fields(dev_eui = %dev_eui))]
    pub async fn enqueue_in<C>(
        &self,
        db: &C,
        dev_eui: EUI64,
        confirmed: bool,
        f_port: u8,
        data: &[u8],
    ) -> ASResult<u32>
    where
        C: ConnectionTrait,
    {
        if f_port == 0 {
            return Err(ASError::Validation("FPort 0 is reserved for MAC commands".into()));
        }

        let device = DeviceRepository::find_by_dev_eui(dev_eui.as_bytes(), db)
            .await?
            .ok_or_else(|| ASError::NotFound(format!("device {dev_eui}")))?;
        let activation = DeviceActivationRepository::find_latest(dev_eui.as_bytes(), db)
            .await?
            .ok_or_else(|| ASError::NotFound(format!("device-activation for {dev_eui}")))?;
        let profile = DeviceProfileRepository::find_by_id(device.device_profile_id, db)
            .await?
            .ok_or_else(|| ASError::NotFound(format!("device-profile {}", device.device_profile_id)))?;
        let class_c = profile.supports_class_c;

        let client = client_for_device(self.ns.as_ref(), &dev_eui, db).await?;
        let f_cnt = client.get_next_downlink_f_cnt_for_dev_eui(dev_eui).await?;

        let app_s_key = AES128Key::from_slice(&activation.app_s_key)?;
        let dev_addr = DevAddr::from_slice(&activation.dev_addr)?;
        let frm_payload = encrypt_frm_payload(&app_s_key, false, &dev_addr, f_cnt, data);

        if class_c {
            client.flush_device_queue_for_dev_eui(dev_eui).await?;
        }
        client
            .create_device_queue_item(DeviceQueueItem {
                dev_eui,
                dev_addr,
                frm_payload: frm_payload.clone(),
                f_cnt,
                f_port,
                confirmed,
            })
            .await?;

        // the network-server queue is authoritative for class-C unconfirmed data
        if !class_c || confirmed {
            if class_c {
                DeviceQueueRepository::flush_for_device(dev_eui.as_bytes(), db).await?;
            }
            let now = Utc::now();
            DeviceQueueRepository::create(
                DeviceQueueActiveModel {
                    dev_eui: Set(dev_eui.to_vec()),
                    f_cnt: Set(i64::from(f_cnt)),
                    f_port: Set(i16::from(f_port)),
                    confirmed: Set(confirmed),
                    is_pending: Set(class_c && confirmed),
                    frm_payload: Set(frm_payload),
                    created_at: Set(now),
                    updated_at: Set(now),
                    ..Default::default()
                },
                db,
            )
            .await?;
        }

        debug!(f_cnt, f_port, confirmed, class_c, "Downlink enqueued");
        Ok(f_cnt)
    }

    /// Enqueues one payload on a multicast group, returns the FCnt used.
    pub async fn enqueue_multicast(
        &self,
        multicast_group_id: Uuid,
        f_port: u8,
        data: &[u8],
    ) -> ASResult<u32> {
        let f_cnts = self
            .enqueue_multiple(multicast_group_id, f_port, &[data.to_vec()])
            .await?;
        f_cnts
            .first()
            .copied()
            .ok_or_else(|| ASError::Fatal("multicast enqueue returned no frame-counter".into()))
    }

    /// Enqueues every payload in order under one lock of the group row.
    pub async fn enqueue_multiple(
        &self,
        multicast_group_id: Uuid,
        f_port: u8,
        items: &[Vec<u8>],
    ) -> ASResult<Vec<u32>> {
        let txn = self.db.begin().await?;
        let f_cnts = self
            .enqueue_multiple_in(&txn, multicast_group_id, f_port, items)
            .await?;
        txn.commit().await?;
        Ok(f_cnts)
    }

    /// Returns the contiguous FCnt sequence `[f, f+1, ..]` assigned to `items`.
    #[instrument(name = "multicast-enqueue", skip(self, db, items), fields(group = %multicast_group_id, n = items.len()))]
    pub async fn enqueue_multiple_in<C>(
        &self,
        db: &C,
        multicast_group_id: Uuid,
        f_port: u8,
        items: &[Vec<u8>],
    ) -> ASResult<Vec<u32>>
    where
        C: ConnectionTrait,
    {
        if f_port == 0 {
            return Err(ASError::Validation("FPort 0 is reserved for MAC commands".into()));
        }

        let group = MulticastGroupRepository::find_for_update(multicast_group_id, db)
            .await?
            .ok_or_else(|| ASError::NotFound(format!("multicast-group {multicast_group_id}")))?;
        let client = client_for_application(self.ns.as_ref(), group.application_id, db).await?;

        let mc_app_s_key = AES128Key::from_slice(&group.mc_app_s_key)?;
        let mc_addr = DevAddr::from_slice(&group.mc_addr)?;
        let first = u32::try_from(group.f_cnt)?;

        let mut f_cnts = Vec::with_capacity(items.len());
        for (i, data) in items.iter().enumerate() {
            let f_cnt = first
                .checked_add(u32::try_from(i)?)
                .ok_or_else(|| ASError::Fatal("multicast frame-counter overflow".into()))?;
            let frm_payload = encrypt_frm_payload(&mc_app_s_key, false, &mc_addr, f_cnt, data);
            client
                .enqueue_multicast_queue_item(MulticastQueueItem {
                    multicast_group_id,
                    frm_payload,
                    f_cnt,
                    f_port,
                })
                .await?;
            f_cnts.push(f_cnt);
        }

        let next = i64::from(first) + items.len() as i64;
        MulticastGroupRepository::set_f_cnt(group, next, db).await?;
        Ok(f_cnts)
    }
}
