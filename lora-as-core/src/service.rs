//! Handlers for the calls network-servers make into the application server.
use crate::{
    applayer::{ClockSync, FragmentationSession, MulticastSetup, Reconciler},
    codec::CodecRunner,
    gwping::GatewayPinger,
    integration::IntegrationRegistry,
    metrics::{MetricsRecord, MetricsStore},
    nsclient::{client_for_device, DeviceActivation, NsClientPool},
};
use chrono::{DateTime, Utc};
use lora_as_error::{ASError, ASResult};
use lora_as_integration::{
    AckEvent, ErrorEvent, Event, JoinEvent, Location, LocationEvent, RxInfo, StatusEvent, TxInfo,
    UplinkEvent,
};
use lora_as_lorawan::{crypto::encrypt_frm_payload, AES128Key, DevAddr, EUI64};
use lora_as_models::entities::prelude::{ApplicationModel, DeviceModel};
use lora_as_repository::{
    ApplicationRepository, DeviceActivationRepository, DeviceProfileRepository,
    DeviceQueueRepository, DeviceRepository,
};
use sea_orm::{DatabaseConnection, TransactionTrait};
use std::{collections::HashMap, sync::Arc};
use tracing::{debug, error, info, instrument, warn};

/// Uplink forwarded by a network-server. `data` is still encrypted.
#[derive(Debug, Clone, PartialEq)]
pub struct UplinkRequest {
    pub dev_eui: EUI64,
    pub dev_addr: DevAddr,
    pub rx_info: Vec<RxInfo>,
    pub tx_info: Option<TxInfo>,
    pub adr: bool,
    pub dr: u8,
    pub f_cnt: u32,
    pub f_port: u8,
    pub confirmed_uplink: bool,
    pub data: Vec<u8>,
}

/// Everything the ingress handlers delegate to.
pub struct ServiceComponents {
    pub db: DatabaseConnection,
    pub ns: Arc<dyn NsClientPool>,
    pub integrations: Arc<IntegrationRegistry>,
    pub metrics: Arc<MetricsStore>,
    pub codec: Arc<CodecRunner>,
    pub multicast_setup: Arc<Reconciler<MulticastSetup>>,
    pub fragmentation: Arc<Reconciler<FragmentationSession>>,
    pub clock_sync: Arc<ClockSync>,
    pub pinger: Arc<GatewayPinger>,
}

pub struct ApplicationServerService {
    c: ServiceComponents,
}

impl ApplicationServerService {
    pub fn new(components: ServiceComponents) -> Self {
        Self { c: components }
    }

    pub fn integrations(&self) -> &Arc<IntegrationRegistry> {
        &self.c.integrations
    }

    pub fn metrics(&self) -> &Arc<MetricsStore> {
        &self.c.metrics
    }

    #[instrument(name = "uplink", skip_all, fields(dev_eui = %req.dev_eui, f_cnt = req.f_cnt, f_port = req.f_port))]
    pub async fn handle_uplink_data(&self, req: UplinkRequest) -> ASResult<()> {
        let now = Utc::now();
        let (device, app) = self.device_and_application(&req.dev_eui).await?;
        let activation = DeviceActivationRepository::find_latest(req.dev_eui.as_bytes(), &self.c.db)
            .await?
            .ok_or_else(|| ASError::NotFound(format!("device-activation for {}", req.dev_eui)))?;
        if activation.dev_addr != req.dev_addr.as_bytes() {
            return Err(ASError::Validation(format!(
                "DevAddr {} does not match the last activation ({})",
                req.dev_addr,
                hex::encode(&activation.dev_addr)
            )));
        }

        if device.dev_addr != req.dev_addr.as_bytes() {
            info!(dev_addr = %req.dev_addr, "Device joined");
            let ev = JoinEvent {
                application_id: u64::try_from(app.id)?,
                application_name: app.name.clone(),
                device_name: device.name.clone(),
                dev_eui: req.dev_eui.to_vec(),
                dev_addr: req.dev_addr.to_vec(),
                rx_info: req.rx_info.clone(),
                tx_info: req.tx_info.clone(),
                dr: u32::from(req.dr),
                tags: device.tags.0.clone(),
            };
            self.c.integrations.publish(app.id, Event::Join(&ev)).await;
        }

        DeviceRepository::touch_uplink(
            req.dev_eui.as_bytes(),
            req.dev_addr.as_bytes(),
            Some(i16::from(req.dr)),
            now,
            &self.c.db,
        )
        .await?;
        self.save_uplink_metrics(&req, now).await;

        let app_s_key = AES128Key::from_slice(&activation.app_s_key)?;
        let data = if req.data.is_empty() {
            Vec::new()
        } else {
            encrypt_frm_payload(&app_s_key, true, &req.dev_addr, req.f_cnt, &req.data)
        };

        if self.handle_app_layer(&req, &data, now).await? {
            return Ok(());
        }

        let profile = DeviceProfileRepository::find_by_id(device.device_profile_id, &self.c.db)
            .await?
            .ok_or_else(|| ASError::NotFound(format!("device-profile {}", device.device_profile_id)))?;
        let object = match self
            .c
            .codec
            .decode(&profile, req.f_port, &device.variables.0, &data)
            .await
        {
            Ok(o) => o,
            Err(e) => {
                warn!(error = %e, "Payload codec failed");
                let ev = ErrorEvent {
                    application_id: u64::try_from(app.id)?,
                    application_name: app.name.clone(),
                    device_name: device.name.clone(),
                    dev_eui: req.dev_eui.to_vec(),
                    error_type: "UPLINK_CODEC".into(),
                    error: e.to_string(),
                    f_cnt: req.f_cnt,
                    tags: device.tags.0.clone(),
                };
                self.c.integrations.publish(app.id, Event::Error(&ev)).await;
                None
            }
        };

        let ev = UplinkEvent {
            application_id: u64::try_from(app.id)?,
            application_name: app.name.clone(),
            device_name: device.name.clone(),
            dev_eui: req.dev_eui.to_vec(),
            rx_info: req.rx_info,
            tx_info: req.tx_info,
            adr: req.adr,
            dr: u32::from(req.dr),
            f_cnt: req.f_cnt,
            f_port: u32::from(req.f_port),
            data,
            object_json: match object {
                Some(o) => serde_json::to_string(&o)?,
                None => String::new(),
            },
            tags: device.tags.0,
            confirmed_uplink: req.confirmed_uplink,
            dev_addr: req.dev_addr.to_vec(),
        };
        self.c.integrations.publish(app.id, Event::Up(&ev)).await;
        Ok(())
    }

    /// Routes package FPorts to their handlers. Returns whether the payload
    /// was consumed.
    async fn handle_app_layer(
        &self,
        req: &UplinkRequest,
        data: &[u8],
        now: DateTime<Utc>,
    ) -> ASResult<bool> {
        let multicast = self.c.multicast_setup.command();
        let fragmentation = self.c.fragmentation.command();
        let clock_sync = &self.c.clock_sync;

        if ![
            multicast.f_port(),
            fragmentation.f_port(),
            clock_sync.f_port(),
        ]
        .contains(&req.f_port)
        {
            return Ok(false);
        }

        let txn = self.c.db.begin().await?;
        let res = if req.f_port == multicast.f_port() {
            multicast.handle_command(&txn, req.dev_eui, data).await
        } else if req.f_port == fragmentation.f_port() {
            fragmentation.handle_command(&txn, req.dev_eui, data).await
        } else {
            clock_sync.handle_command(&txn, req.dev_eui, data, now).await
        };
        match res {
            Ok(()) => txn.commit().await?,
            Err(e) => {
                txn.rollback().await?;
                error!(error = %e, "Handling application-layer command failed");
                return Err(e);
            }
        }
        Ok(true)
    }

    async fn save_uplink_metrics(&self, req: &UplinkRequest, now: DateTime<Utc>) {
        let mut metrics = HashMap::from([
            ("rx_count".to_string(), 1.0),
            (format!("rx_dr_{}", req.dr), 1.0),
        ]);
        if !req.rx_info.is_empty() {
            metrics.insert(
                "gw_rssi_sum".into(),
                req.rx_info.iter().map(|rx| f64::from(rx.rssi)).sum(),
            );
            metrics.insert(
                "gw_snr_sum".into(),
                req.rx_info.iter().map(|rx| rx.lora_snr).sum(),
            );
        }
        let record = MetricsRecord { time: now, metrics };
        if let Err(e) = self
            .c
            .metrics
            .save_metrics(&format!("device:{}", req.dev_eui), &record)
            .await
        {
            warn!(error = %e, "Saving device metrics failed");
        }
    }

    /// Removes the acknowledged item from the local queue and publishes an
    /// ack event.
    #[instrument(name = "downlink-ack", skip(self), fields(dev_eui = %dev_eui))]
    pub async fn handle_downlink_ack(
        &self,
        dev_eui: EUI64,
        f_cnt: u32,
        acknowledged: bool,
    ) -> ASResult<()> {
        let (device, app) = self.device_and_application(&dev_eui).await?;
        match DeviceQueueRepository::find_by_f_cnt(dev_eui.as_bytes(), i64::from(f_cnt), &self.c.db)
            .await?
        {
            Some(item) => DeviceQueueRepository::delete(item.id, &self.c.db).await?,
            None => debug!("No local queue item for acknowledged FCnt"),
        }

        let ev = AckEvent {
            application_id: u64::try_from(app.id)?,
            application_name: app.name,
            device_name: device.name,
            dev_eui: dev_eui.to_vec(),
            acknowledged,
            f_cnt,
            tags: device.tags.0,
        };
        self.c.integrations.publish(app.id, Event::Ack(&ev)).await;
        Ok(())
    }

    #[instrument(name = "ns-error", skip(self, error), fields(dev_eui = %dev_eui))]
    pub async fn handle_error(
        &self,
        dev_eui: EUI64,
        error_type: &str,
        error: &str,
        f_cnt: u32,
    ) -> ASResult<()> {
        let (device, app) = self.device_and_application(&dev_eui).await?;
        warn!(error, "Network-server reported an error");
        let ev = ErrorEvent {
            application_id: u64::try_from(app.id)?,
            application_name: app.name,
            device_name: device.name,
            dev_eui: dev_eui.to_vec(),
            error_type: error_type.to_string(),
            error: error.to_string(),
            f_cnt,
            tags: device.tags.0,
        };
        self.c.integrations.publish(app.id, Event::Error(&ev)).await;
        Ok(())
    }

    /// `battery` is the DevStatusAns value (1..=254), `None` when the device
    /// could not measure it.
    #[instrument(name = "device-status", skip(self), fields(dev_eui = %dev_eui))]
    pub async fn set_device_status(
        &self,
        dev_eui: EUI64,
        battery: Option<u8>,
        margin: i16,
        external_power_source: bool,
    ) -> ASResult<()> {
        let (device, app) = self.device_and_application(&dev_eui).await?;
        let device = DeviceRepository::set_status(
            device,
            battery.map(i16::from),
            margin,
            external_power_source,
            &self.c.db,
        )
        .await?;

        let ev = StatusEvent {
            application_id: u64::try_from(app.id)?,
            application_name: app.name,
            device_name: device.name,
            dev_eui: dev_eui.to_vec(),
            margin: i32::from(margin),
            external_power_source,
            battery_level_unavailable: battery.is_none(),
            battery_level: battery.map(battery_percentage).unwrap_or_default(),
            tags: device.tags.0,
        };
        self.c.integrations.publish(app.id, Event::Status(&ev)).await;
        Ok(())
    }

    #[instrument(name = "device-location", skip(self, location), fields(dev_eui = %dev_eui))]
    pub async fn set_device_location(
        &self,
        dev_eui: EUI64,
        location: Location,
        f_cnt: u32,
    ) -> ASResult<()> {
        let (device, app) = self.device_and_application(&dev_eui).await?;
        let device = DeviceRepository::set_location(
            device,
            location.latitude,
            location.longitude,
            location.altitude,
            &self.c.db,
        )
        .await?;

        let ev = LocationEvent {
            application_id: u64::try_from(app.id)?,
            application_name: app.name,
            device_name: device.name,
            dev_eui: dev_eui.to_vec(),
            location: Some(location),
            f_cnt,
            tags: device.tags.0,
        };
        self.c.integrations.publish(app.id, Event::Location(&ev)).await;
        Ok(())
    }

    /// Proprietary uplinks carry gateway pings.
    pub async fn handle_proprietary_uplink(&self, mic: &[u8], rx_info: &[RxInfo]) -> ASResult<()> {
        self.c.pinger.handle_received_ping(mic, rx_info).await
    }

    /// Session state of the device as held by its network-server.
    pub async fn get_device_activation(&self, dev_eui: EUI64) -> ASResult<DeviceActivation> {
        let client = client_for_device(self.c.ns.as_ref(), &dev_eui, &self.c.db).await?;
        client.get_device_activation(dev_eui).await
    }

    async fn device_and_application(
        &self,
        dev_eui: &EUI64,
    ) -> ASResult<(DeviceModel, ApplicationModel)> {
        let device = DeviceRepository::find_by_dev_eui(dev_eui.as_bytes(), &self.c.db)
            .await?
            .ok_or_else(|| ASError::NotFound(format!("device {dev_eui}")))?;
        let app = ApplicationRepository::find_by_id(device.application_id, &self.c.db)
            .await?
            .ok_or_else(|| ASError::NotFound(format!("application {}", device.application_id)))?;
        Ok((device, app))
    }
}

/// Battery level in percent, two decimals.
fn battery_percentage(raw: u8) -> f32 {
    (f32::from(raw) / 254.0 * 10_000.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn battery_scale() {
        assert_eq!(battery_percentage(254), 100.0);
        assert_eq!(battery_percentage(127), 50.0);
        assert_eq!(battery_percentage(1), 0.39);
    }
}
