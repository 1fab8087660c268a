mod common;

use common::*;
use lora_as_core::DownlinkDispatcher;
use lora_as_error::ASError;
use lora_as_lorawan::{crypto::encrypt_frm_payload, AES128Key, DevAddr, EUI64};
use lora_as_repository::{DeviceQueueRepository, MulticastGroupRepository};

const DEV_EUI: [u8; 8] = [0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01];

#[tokio::test]
async fn class_a_downlink_is_encrypted_and_tracked() {
    let db = setup_db().await;
    let fx = seed(&db).await;
    provision_device(&db, &fx, DEV_EUI).await;

    let ns = RecordingNs::new(10);
    let dispatcher = DownlinkDispatcher::new(db.clone(), pool(&ns));

    let f_cnt = dispatcher
        .enqueue(EUI64(DEV_EUI), true, 3, b"hello")
        .await
        .unwrap();
    assert_eq!(f_cnt, 10);

    let items = ns.queue_items();
    assert_eq!(items.len(), 1);
    let item = &items[0];
    assert_eq!(item.f_cnt, 10);
    assert_eq!(item.f_port, 3);
    assert!(item.confirmed);
    assert_eq!(item.dev_addr, DevAddr(DEV_ADDR));
    assert_ne!(item.frm_payload, b"hello".to_vec());

    // the keystream is symmetric, encrypting again restores the plaintext
    let plain = encrypt_frm_payload(
        &AES128Key(APP_S_KEY),
        false,
        &DevAddr(DEV_ADDR),
        10,
        &item.frm_payload,
    );
    assert_eq!(plain, b"hello".to_vec());

    let queue = DeviceQueueRepository::find_for_device(&DEV_EUI, &db).await.unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].f_cnt, 10);
    assert!(!queue[0].is_pending);
    assert!(ns.calls.lock().unwrap().flushed.is_empty());
}

#[tokio::test]
async fn class_c_unconfirmed_downlink_flushes_without_local_copy() {
    let db = setup_db().await;
    let fx = seed_with(
        &db,
        false,
        ProfileOptions {
            class_c: true,
            ..Default::default()
        },
    )
    .await;
    provision_device(&db, &fx, DEV_EUI).await;

    let ns = RecordingNs::new(0);
    let dispatcher = DownlinkDispatcher::new(db.clone(), pool(&ns));
    dispatcher
        .enqueue(EUI64(DEV_EUI), false, 10, &[0x01])
        .await
        .unwrap();

    assert_eq!(ns.calls.lock().unwrap().flushed, vec![EUI64(DEV_EUI)]);
    assert_eq!(ns.queue_items().len(), 1);
    assert!(DeviceQueueRepository::find_for_device(&DEV_EUI, &db)
        .await
        .unwrap()
        .is_empty());

    dispatcher
        .enqueue(EUI64(DEV_EUI), true, 10, &[0x02])
        .await
        .unwrap();
    let queue = DeviceQueueRepository::find_for_device(&DEV_EUI, &db).await.unwrap();
    assert_eq!(queue.len(), 1);
    assert!(queue[0].is_pending);
}

#[tokio::test]
async fn class_c_confirmed_downlink_carries_exact_ciphertext() {
    let db = setup_db().await;
    let fx = seed_with(
        &db,
        false,
        ProfileOptions {
            class_c: true,
            ..Default::default()
        },
    )
    .await;
    create_device(&db, &fx, DEV_EUI).await;
    create_keys(&db, DEV_EUI, [0x01; 16], 0).await;
    activate_with(
        &db,
        DEV_EUI,
        [
            0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e,
            0x0f, 0x10,
        ],
    )
    .await;

    let ns = RecordingNs::new(12);
    let dispatcher = DownlinkDispatcher::new(db.clone(), pool(&ns));
    let f_cnt = dispatcher
        .enqueue(EUI64(DEV_EUI), true, 10, &[0x01, 0x02, 0x03, 0x04])
        .await
        .unwrap();
    assert_eq!(f_cnt, 12);

    assert_eq!(ns.calls.lock().unwrap().flushed, vec![EUI64(DEV_EUI)]);
    let items = ns.queue_items();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].dev_addr, DevAddr([0x01, 0x02, 0x03, 0x04]));
    assert_eq!(items[0].f_cnt, 12);
    assert!(items[0].confirmed);
    assert_eq!(items[0].frm_payload, vec![0x13, 0x35, 0xcb, 0x91]);

    let queue = DeviceQueueRepository::find_for_device(&DEV_EUI, &db).await.unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].f_cnt, 12);
    assert!(queue[0].is_pending);
}

#[tokio::test]
async fn reserved_fport_and_unknown_device_are_rejected() {
    let db = setup_db().await;
    let fx = seed(&db).await;
    provision_device(&db, &fx, DEV_EUI).await;

    let ns = RecordingNs::new(0);
    let dispatcher = DownlinkDispatcher::new(db.clone(), pool(&ns));

    let err = dispatcher
        .enqueue(EUI64(DEV_EUI), false, 0, &[0x01])
        .await
        .unwrap_err();
    assert!(matches!(err, ASError::Validation(_)));

    let err = dispatcher
        .enqueue(EUI64([0xee; 8]), false, 1, &[0x01])
        .await
        .unwrap_err();
    assert!(matches!(err, ASError::NotFound(_)));
    assert!(ns.queue_items().is_empty());
}

#[tokio::test]
async fn failed_network_server_call_leaves_no_queue_row() {
    let db = setup_db().await;
    let fx = seed(&db).await;
    provision_device(&db, &fx, DEV_EUI).await;

    let ns = RecordingNs::new(0);
    *ns.fail_queue.lock().unwrap() = true;
    let dispatcher = DownlinkDispatcher::new(db.clone(), pool(&ns));

    assert!(dispatcher
        .enqueue(EUI64(DEV_EUI), true, 1, &[0x01])
        .await
        .is_err());
    assert!(DeviceQueueRepository::find_for_device(&DEV_EUI, &db)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn multicast_items_get_contiguous_frame_counters() {
    let db = setup_db().await;
    let fx = seed(&db).await;
    let group_id = create_multicast_group(&db, &fx, 5).await;

    let ns = RecordingNs::new(0);
    let dispatcher = DownlinkDispatcher::new(db.clone(), pool(&ns));

    let f_cnts = dispatcher
        .enqueue_multiple(group_id, 201, &[vec![1], vec![2], vec![3]])
        .await
        .unwrap();
    assert_eq!(f_cnts, vec![5, 6, 7]);

    let f_cnt = dispatcher.enqueue_multicast(group_id, 201, &[4]).await.unwrap();
    assert_eq!(f_cnt, 8);

    let items = ns.calls.lock().unwrap().multicast_items.clone();
    assert_eq!(items.iter().map(|i| i.f_cnt).collect::<Vec<_>>(), vec![5, 6, 7, 8]);
    let plain = encrypt_frm_payload(
        &AES128Key(MC_APP_S_KEY),
        false,
        &DevAddr(MC_ADDR),
        6,
        &items[1].frm_payload,
    );
    assert_eq!(plain, vec![2]);

    let group = MulticastGroupRepository::find_by_id(group_id, &db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(group.f_cnt, 9);
}
