mod common;

use chrono::{Duration, Utc};
use common::*;
use lora_as_core::{metrics::Aggregation, ASServer, UplinkRequest};
use lora_as_error::ASError;
use lora_as_integration::{Location, RxInfo};
use lora_as_lorawan::{
    applayer::clocksync::{decode_commands, encode_commands, AppTimeReq, Command},
    crypto::encrypt_frm_payload,
    AES128Key, DevAddr, EUI64,
};
use lora_as_models::{
    settings::{Inner, Settings},
    EphemeralStore,
};
use lora_as_repository::{DeviceQueueRepository, DeviceRepository};
use lora_as_storage::ASEphemeralStore;
use sea_orm::DatabaseConnection;
use std::sync::Arc;

const DEV_EUI: [u8; 8] = [0x05, 0x05, 0x05, 0x05, 0x05, 0x05, 0x05, 0x05];

async fn server(db: &DatabaseConnection, ns: &Arc<RecordingNs>) -> Arc<ASServer> {
    let store: Arc<dyn EphemeralStore> = ASEphemeralStore::in_memory(10_000);
    ASServer::build(
        &Settings::from_inner(Inner::default()),
        db.clone(),
        store,
        pool(ns),
    )
    .await
    .unwrap()
}

fn uplink(f_port: u8, f_cnt: u32, plain: &[u8]) -> UplinkRequest {
    UplinkRequest {
        dev_eui: EUI64(DEV_EUI),
        dev_addr: DevAddr(DEV_ADDR),
        rx_info: vec![RxInfo {
            gateway_id: vec![0xaa; 8],
            rssi: -50,
            lora_snr: 7.5,
            ..Default::default()
        }],
        tx_info: None,
        adr: true,
        dr: 3,
        f_cnt,
        f_port,
        confirmed_uplink: false,
        data: encrypt_frm_payload(&AES128Key(APP_S_KEY), true, &DevAddr(DEV_ADDR), f_cnt, plain),
    }
}

#[tokio::test]
async fn uplink_updates_device_and_metrics() {
    let db = setup_db().await;
    let fx = seed(&db).await;
    provision_device(&db, &fx, DEV_EUI).await;

    let ns = RecordingNs::new(0);
    let s = server(&db, &ns).await;

    let start = Utc::now();
    s.service()
        .handle_uplink_data(uplink(10, 1, &[0x01, 0x02]))
        .await
        .unwrap();
    s.service()
        .handle_uplink_data(uplink(10, 2, &[0x03]))
        .await
        .unwrap();
    let end = Utc::now();

    let device = DeviceRepository::find_by_dev_eui(&DEV_EUI, &db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(device.dr, Some(3));
    assert!(device.last_seen_at.is_some());

    let records = s
        .service()
        .metrics()
        .get_metrics(
            Aggregation::Hour,
            &format!("device:{}", EUI64(DEV_EUI)),
            start - Duration::hours(1),
            end,
        )
        .await
        .unwrap();
    let sum = |field: &str| -> f64 {
        records
            .iter()
            .filter_map(|r| r.metrics.get(field))
            .sum()
    };
    assert_eq!(sum("rx_count"), 2.0);
    assert_eq!(sum("rx_dr_3"), 2.0);
    assert_eq!(sum("gw_rssi_sum"), -100.0);
    assert_eq!(sum("gw_snr_sum"), 15.0);
    assert!(ns.queue_items().is_empty());
}

#[tokio::test]
async fn uplink_from_stale_session_is_rejected() {
    let db = setup_db().await;
    let fx = seed(&db).await;
    provision_device(&db, &fx, DEV_EUI).await;

    let ns = RecordingNs::new(0);
    let s = server(&db, &ns).await;

    let mut req = uplink(10, 1, &[0x01]);
    req.dev_addr = DevAddr([0xff, 0xff, 0xff, 0xff]);
    let err = s.service().handle_uplink_data(req).await.unwrap_err();
    assert!(matches!(err, ASError::Validation(_)));

    let device = DeviceRepository::find_by_dev_eui(&DEV_EUI, &db)
        .await
        .unwrap()
        .unwrap();
    assert!(device.last_seen_at.is_none());
}

#[tokio::test]
async fn app_time_request_is_answered() {
    let db = setup_db().await;
    let fx = seed(&db).await;
    provision_device(&db, &fx, DEV_EUI).await;

    let ns = RecordingNs::new(4);
    let s = server(&db, &ns).await;
    assert_eq!(s.clock_sync().f_port(), 202);

    let req = encode_commands(&[Command::AppTimeReq(AppTimeReq {
        device_time: 1_000,
        ans_required: true,
        token_req: 3,
    })]);
    s.service()
        .handle_uplink_data(uplink(202, 9, &req))
        .await
        .unwrap();

    let items = ns.queue_items();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].f_port, 202);
    let plain = encrypt_frm_payload(
        &AES128Key(APP_S_KEY),
        false,
        &DevAddr(DEV_ADDR),
        items[0].f_cnt,
        &items[0].frm_payload,
    );
    match decode_commands(false, &plain).unwrap().as_slice() {
        [Command::AppTimeAns(ans)] => {
            assert_eq!(ans.token_ans, 3);
            // GPS time is far ahead of a device that thinks it is 1000 s
            assert!(ans.time_correction > 0);
        }
        other => panic!("unexpected commands {other:?}"),
    }
}

#[tokio::test]
async fn malformed_package_uplink_fails_without_downlink() {
    let db = setup_db().await;
    let fx = seed(&db).await;
    provision_device(&db, &fx, DEV_EUI).await;

    let ns = RecordingNs::new(0);
    let s = server(&db, &ns).await;

    // AppTimeReq truncated after two bytes
    assert!(s
        .service()
        .handle_uplink_data(uplink(202, 1, &[0x01, 0x00]))
        .await
        .is_err());
    assert!(ns.queue_items().is_empty());
}

#[tokio::test]
async fn ack_removes_local_queue_item() {
    let db = setup_db().await;
    let fx = seed(&db).await;
    provision_device(&db, &fx, DEV_EUI).await;

    let ns = RecordingNs::new(20);
    let s = server(&db, &ns).await;

    let dispatcher = lora_as_core::DownlinkDispatcher::new(db.clone(), pool(&ns));
    dispatcher
        .enqueue(EUI64(DEV_EUI), true, 1, &[0x01])
        .await
        .unwrap();
    assert_eq!(
        DeviceQueueRepository::find_for_device(&DEV_EUI, &db)
            .await
            .unwrap()
            .len(),
        1
    );

    s.service()
        .handle_downlink_ack(EUI64(DEV_EUI), 20, true)
        .await
        .unwrap();
    assert!(DeviceQueueRepository::find_for_device(&DEV_EUI, &db)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn status_and_location_are_stored() {
    let db = setup_db().await;
    let fx = seed(&db).await;
    provision_device(&db, &fx, DEV_EUI).await;

    let ns = RecordingNs::new(0);
    let s = server(&db, &ns).await;

    s.service()
        .set_device_status(EUI64(DEV_EUI), Some(127), 7, false)
        .await
        .unwrap();
    s.service()
        .set_device_location(
            EUI64(DEV_EUI),
            Location {
                latitude: 1.5,
                longitude: 2.5,
                altitude: 3.5,
            },
            3,
        )
        .await
        .unwrap();

    let device = DeviceRepository::find_by_dev_eui(&DEV_EUI, &db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(device.device_status_battery, Some(127));
    assert_eq!(device.device_status_margin, Some(7));
    assert_eq!(device.latitude, Some(1.5));
    assert_eq!(device.altitude, Some(3.5));

    let err = s
        .service()
        .set_device_status(EUI64([0xee; 8]), None, 0, true)
        .await
        .unwrap_err();
    assert!(matches!(err, ASError::NotFound(_)));
}
