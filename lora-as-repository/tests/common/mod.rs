#![allow(dead_code)]

use chrono::Utc;
use lora_as_models::{
    entities::{
        device::KeyValues,
        prelude::{
            ApplicationActiveModel, DeviceActiveModel, DeviceProfileActiveModel,
            NetworkServerActiveModel, ServiceProfileActiveModel,
        },
    },
    enums::common::PayloadCodec,
};
use lora_as_storage::{Migrator, MigratorTrait};
use sea_orm::{ActiveModelTrait, ConnectOptions, Database, DatabaseConnection, Set};
use uuid::Uuid;

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

/// network-server -> service-profile -> application, plus a device-profile.
pub async fn seed(db: &DatabaseConnection, gateway_discovery: bool) -> Fixture {
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
        supports_class_c: Set(false),
        payload_codec: Set(PayloadCodec::None),
        payload_encoder_script: Set(String::new()),
        payload_decoder_script: Set(String::new()),
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
        dev_addr: Set(Vec::new()),
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
