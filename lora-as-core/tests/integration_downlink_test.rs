mod common;

use common::*;
use lora_as_core::{codec::CodecRunner, integration::DownlinkIngest, DownlinkDispatcher};
use lora_as_error::ASError;
use lora_as_integration::DataDownPayload;
use lora_as_lorawan::{crypto::encrypt_frm_payload, AES128Key, DevAddr, EUI64};
use lora_as_models::{enums::common::PayloadCodec, settings::Codec, EphemeralStore};
use lora_as_storage::ASEphemeralStore;
use sea_orm::DatabaseConnection;
use serde_json::json;
use std::{sync::Arc, time::Duration};

const DEV_EUI: [u8; 8] = [0x04, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04];

fn ingest(db: &DatabaseConnection, ns: &Arc<RecordingNs>) -> DownlinkIngest {
    let store: Arc<dyn EphemeralStore> = ASEphemeralStore::in_memory(1_000);
    DownlinkIngest::new(
        db.clone(),
        store,
        Arc::new(DownlinkDispatcher::new(db.clone(), pool(ns))),
        Arc::new(CodecRunner::new(&Codec::default())),
        Duration::from_secs(60),
    )
}

fn payload(application_id: i32, f_port: u8, reference: &str) -> DataDownPayload {
    DataDownPayload {
        application_id: i64::from(application_id),
        dev_eui: EUI64(DEV_EUI),
        confirmed: false,
        f_port,
        data: Some(vec![0xca, 0xfe]),
        object: None,
        reference: reference.into(),
    }
}

fn decrypt(f_cnt: u32, frm_payload: &[u8]) -> Vec<u8> {
    encrypt_frm_payload(&AES128Key(APP_S_KEY), false, &DevAddr(DEV_ADDR), f_cnt, frm_payload)
}

#[tokio::test]
async fn duplicate_commands_are_enqueued_once() {
    let db = setup_db().await;
    let fx = seed(&db).await;
    provision_device(&db, &fx, DEV_EUI).await;

    let ns = RecordingNs::new(7);
    let ingest = ingest(&db, &ns);

    let f_cnt = ingest
        .handle(payload(fx.application_id, 2, "ref-1"))
        .await
        .unwrap();
    assert_eq!(f_cnt, Some(7));
    // a second replica receiving the same command backs off
    assert_eq!(
        ingest
            .handle(payload(fx.application_id, 2, "ref-1"))
            .await
            .unwrap(),
        None
    );
    assert_eq!(
        ingest
            .handle(payload(fx.application_id, 2, "ref-2"))
            .await
            .unwrap(),
        Some(8)
    );

    let items = ns.queue_items();
    assert_eq!(items.len(), 2);
    assert_eq!(decrypt(7, &items[0].frm_payload), vec![0xca, 0xfe]);
}

#[tokio::test]
async fn invalid_commands_are_rejected() {
    let db = setup_db().await;
    let fx = seed(&db).await;
    provision_device(&db, &fx, DEV_EUI).await;

    let ns = RecordingNs::new(0);
    let ingest = ingest(&db, &ns);

    for f_port in [0, 225] {
        let err = ingest
            .handle(payload(fx.application_id, f_port, "port"))
            .await
            .unwrap_err();
        assert!(matches!(err, ASError::Validation(_)), "FPort {f_port}");
    }

    let err = ingest
        .handle(payload(fx.application_id + 1, 1, "app"))
        .await
        .unwrap_err();
    assert!(matches!(err, ASError::Validation(_)));

    let mut pl = payload(fx.application_id, 1, "codec");
    pl.data = None;
    pl.object = Some(json!({"temperatureSensor": {"3": 27.2}}));
    let err = ingest.handle(pl).await.unwrap_err();
    assert!(matches!(err, ASError::Validation(_)));

    assert!(ns.queue_items().is_empty());
}

#[tokio::test]
async fn object_is_encoded_with_the_profile_codec() {
    let db = setup_db().await;
    let fx = seed_with(
        &db,
        true,
        ProfileOptions {
            codec: PayloadCodec::CayenneLpp,
            ..Default::default()
        },
    )
    .await;
    provision_device(&db, &fx, DEV_EUI).await;

    let ns = RecordingNs::new(0);
    let ingest = ingest(&db, &ns);

    let mut pl = payload(fx.application_id, 5, "lpp");
    pl.data = None;
    pl.object = Some(json!({"temperatureSensor": {"3": 27.2}}));
    assert_eq!(ingest.handle(pl).await.unwrap(), Some(0));

    let items = ns.queue_items();
    assert_eq!(decrypt(0, &items[0].frm_payload), vec![0x03, 0x67, 0x01, 0x10]);
}

#[tokio::test]
async fn object_is_encoded_by_custom_script() {
    let db = setup_db().await;
    let fx = seed_with(
        &db,
        true,
        ProfileOptions {
            codec: PayloadCodec::CustomJs,
            encoder: "function Encode(fPort, obj, variables) { return [fPort, obj.level]; }".into(),
            ..Default::default()
        },
    )
    .await;
    provision_device(&db, &fx, DEV_EUI).await;

    let ns = RecordingNs::new(0);
    let ingest = ingest(&db, &ns);

    let mut pl = payload(fx.application_id, 9, "js");
    pl.data = None;
    pl.object = Some(json!({"level": 42}));
    ingest.handle(pl).await.unwrap();

    let items = ns.queue_items();
    assert_eq!(decrypt(0, &items[0].frm_payload), vec![9, 42]);
}
