#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use lora_as_core::nsclient::{
    DeviceActivation, DeviceQueueItem, MulticastGroup, MulticastQueueItem, NetworkServerClient,
    NsClientPool, ProprietaryPayload,
};
use lora_as_error::{ASError, ASResult};
use lora_as_lorawan::EUI64;
use lora_as_models::{
    entities::{
        device::KeyValues,
        prelude::{
            ApplicationActiveModel, DeviceActivationActiveModel, DeviceActiveModel,
            DeviceKeysActiveModel, DeviceProfileActiveModel, MulticastGroupActiveModel,
            NetworkServerActiveModel, ServiceProfileActiveModel,
        },
    },
    enums::common::{MulticastGroupType, PayloadCodec},
};
use lora_as_storage::{Migrator, MigratorTrait};
use sea_orm::{ActiveModelTrait, ConnectOptions, Database, DatabaseConnection, Set};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

pub const APP_S_KEY: [u8; 16] = [
    0x2b, 0x7e, 0x15, 0x16, 0x28, 0xae, 0xd2, 0xa6, 0xab, 0xf7, 0x15, 0x88, 0x09, 0xcf, 0x4f, 0x3c,
];
pub const DEV_ADDR: [u8; 4] = [0x01, 0x02, 0x03, 0x04];

pub async fn setup_db() -> DatabaseConnection {
    let mut opts = ConnectOptions::new("sqlite::memory:");
    opts.max_connections(1).sqlx_logging(false);
    let db = Database::connect(opts).await.expect("connect sqlite");
    Migrator::up(&db, None).await.expect("migrate");
    db
}

pub struct Fixture {
    pub network_server_id: i32,
    pub application_id: i32,
    pub device_profile_id: Uuid,
}

pub struct ProfileOptions {
    pub class_c: bool,
    pub codec: PayloadCodec,
    pub decoder: String,
    pub encoder: String,
}

impl Default for ProfileOptions {
    fn default() -> Self {
        Self {
            class_c: false,
            codec: PayloadCodec::None,
            decoder: String::new(),
            encoder: String::new(),
        }
    }
}

pub async fn seed(db: &DatabaseConnection) -> Fixture {
    seed_with(db, true, ProfileOptions::default()).await
}

/// network-server -> service-profile -> application, plus a device-profile.
pub async fn seed_with(
    db: &DatabaseConnection,
    gateway_discovery: bool,
    profile: ProfileOptions,
) -> Fixture {
    let now = Utc::now();
    let ns = NetworkServerActiveModel {
        name: Set("ns".into()),
        server: Set("localhost:8000".into()),
        gateway_discovery_enabled: Set(gateway_discovery),
        gateway_discovery_interval: Set(1),
        gateway_discovery_tx_frequency: Set(868_100_000),
        gateway_discovery_dr: Set(5),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("network-server");

    let sp = ServiceProfileActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set("sp".into()),
        organization_id: Set(1),
        network_server_id: Set(ns.id),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await
    .expect("service-profile");

    let app = ApplicationActiveModel {
        name: Set("app".into()),
        description: Set(String::new()),
        organization_id: Set(1),
        service_profile_id: Set(sp.id),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("application");

    let dp = DeviceProfileActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set("dp".into()),
        organization_id: Set(1),
        network_server_id: Set(ns.id),
        mac_version: Set("1.0.3".into()),
        reg_params_revision: Set("B".into()),
        supports_join: Set(true),
        supports_class_b: Set(false),
        supports_class_c: Set(profile.class_c),
        payload_codec: Set(profile.codec),
        payload_encoder_script: Set(profile.encoder),
        payload_decoder_script: Set(profile.decoder),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await
    .expect("device-profile");

    Fixture {
        network_server_id: ns.id,
        application_id: app.id,
        device_profile_id: dp.id,
    }
}

pub async fn create_device(db: &DatabaseConnection, fx: &Fixture, dev_eui: [u8; 8]) {
    let now = Utc::now();
    DeviceActiveModel {
        dev_eui: Set(dev_eui.to_vec()),
        application_id: Set(fx.application_id),
        device_profile_id: Set(fx.device_profile_id),
        name: Set(hex::encode(dev_eui)),
        description: Set(String::new()),
        dev_addr: Set(DEV_ADDR.to_vec()),
        variables: Set(KeyValues::default()),
        tags: Set(KeyValues::default()),
        device_status_battery: Set(None),
        device_status_margin: Set(None),
        device_status_external_power_source: Set(false),
        last_seen_at: Set(None),
        dr: Set(None),
        latitude: Set(None),
        longitude: Set(None),
        altitude: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await
    .expect("device");
}

pub async fn create_keys(db: &DatabaseConnection, dev_eui: [u8; 8], nwk_key: [u8; 16], join_nonce: i32) {
    let now = Utc::now();
    DeviceKeysActiveModel {
        dev_eui: Set(dev_eui.to_vec()),
        app_key: Set(Vec::new()),
        nwk_key: Set(nwk_key.to_vec()),
        gen_app_key: Set(vec![
            0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e,
            0x0f, 0x10,
        ]),
        join_nonce: Set(join_nonce),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await
    .expect("device-keys");
}

pub async fn activate(db: &DatabaseConnection, dev_eui: [u8; 8]) {
    activate_with(db, dev_eui, APP_S_KEY).await;
}

pub async fn activate_with(db: &DatabaseConnection, dev_eui: [u8; 8], app_s_key: [u8; 16]) {
    DeviceActivationActiveModel {
        dev_eui: Set(dev_eui.to_vec()),
        dev_addr: Set(DEV_ADDR.to_vec()),
        app_s_key: Set(app_s_key.to_vec()),
        nwk_s_key: Set(vec![0; 16]),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("device-activation");
}

/// Device with keys and an activation, ready for downlinks.
pub async fn provision_device(db: &DatabaseConnection, fx: &Fixture, dev_eui: [u8; 8]) {
    create_device(db, fx, dev_eui).await;
    create_keys(db, dev_eui, [0x01; 16], 0).await;
    activate(db, dev_eui).await;
}

pub const MC_APP_S_KEY: [u8; 16] = [0x11; 16];
pub const MC_ADDR: [u8; 4] = [0x0a, 0x0b, 0x0c, 0x0d];

/// Class-C multicast group of the fixture application, next FCnt `f_cnt`.
pub async fn create_multicast_group(db: &DatabaseConnection, fx: &Fixture, f_cnt: i64) -> Uuid {
    let now = Utc::now();
    MulticastGroupActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set("mg".into()),
        application_id: Set(fx.application_id),
        mc_addr: Set(MC_ADDR.to_vec()),
        mc_nwk_s_key: Set(vec![0x22; 16]),
        mc_app_s_key: Set(MC_APP_S_KEY.to_vec()),
        mc_key: Set(vec![0x33; 16]),
        f_cnt: Set(f_cnt),
        group_type: Set(MulticastGroupType::ClassC),
        dr: Set(5),
        frequency: Set(869_525_000),
        ping_slot_period: Set(0),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await
    .expect("multicast-group")
    .id
}

#[derive(Debug, Default)]
pub struct Calls {
    pub queue_items: Vec<DeviceQueueItem>,
    pub flushed: Vec<EUI64>,
    pub multicast_groups: Vec<MulticastGroup>,
    pub deleted_groups: Vec<Uuid>,
    pub multicast_items: Vec<MulticastQueueItem>,
    pub proprietary: Vec<ProprietaryPayload>,
    pub servers: Vec<String>,
}

/// Network-server double recording every call. Downlink frame-counters
/// start at `next_f_cnt` and increase by one per request.
#[derive(Debug, Default)]
pub struct RecordingNs {
    pub calls: Mutex<Calls>,
    next_f_cnt: Mutex<u32>,
    pub fail_queue: Mutex<bool>,
}

impl RecordingNs {
    pub fn new(first_f_cnt: u32) -> Arc<Self> {
        Arc::new(Self {
            next_f_cnt: Mutex::new(first_f_cnt),
            ..Default::default()
        })
    }

    pub fn queue_items(&self) -> Vec<DeviceQueueItem> {
        self.calls.lock().unwrap().queue_items.clone()
    }
}

#[async_trait]
impl NetworkServerClient for RecordingNs {
    async fn create_device_queue_item(&self, item: DeviceQueueItem) -> ASResult<()> {
        if *self.fail_queue.lock().unwrap() {
            return Err(ASError::TransientRemote("queue unavailable".into()));
        }
        self.calls.lock().unwrap().queue_items.push(item);
        Ok(())
    }

    async fn flush_device_queue_for_dev_eui(&self, dev_eui: EUI64) -> ASResult<()> {
        self.calls.lock().unwrap().flushed.push(dev_eui);
        Ok(())
    }

    async fn get_next_downlink_f_cnt_for_dev_eui(&self, _dev_eui: EUI64) -> ASResult<u32> {
        let mut next = self.next_f_cnt.lock().unwrap();
        let f_cnt = *next;
        *next += 1;
        Ok(f_cnt)
    }

    async fn get_device_activation(&self, dev_eui: EUI64) -> ASResult<DeviceActivation> {
        Err(ASError::NotFound(format!("device-activation {dev_eui}")))
    }

    async fn create_multicast_group(&self, group: MulticastGroup) -> ASResult<()> {
        self.calls.lock().unwrap().multicast_groups.push(group);
        Ok(())
    }

    async fn delete_multicast_group(&self, id: Uuid) -> ASResult<()> {
        self.calls.lock().unwrap().deleted_groups.push(id);
        Ok(())
    }

    async fn enqueue_multicast_queue_item(&self, item: MulticastQueueItem) -> ASResult<()> {
        self.calls.lock().unwrap().multicast_items.push(item);
        Ok(())
    }

    async fn send_proprietary_payload(&self, payload: ProprietaryPayload) -> ASResult<()> {
        self.calls.lock().unwrap().proprietary.push(payload);
        Ok(())
    }
}

/// Hands out the same [`RecordingNs`] for every server address.
pub struct RecordingPool(pub Arc<RecordingNs>);

impl NsClientPool for RecordingPool {
    fn get(&self, server: &str) -> ASResult<Arc<dyn NetworkServerClient>> {
        self.0.calls.lock().unwrap().servers.push(server.to_string());
        Ok(self.0.clone())
    }
}

pub fn pool(ns: &Arc<RecordingNs>) -> Arc<dyn NsClientPool> {
    Arc::new(RecordingPool(Arc::clone(ns)))
}
