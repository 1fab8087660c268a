mod common;

use chrono::{DateTime, Utc};
use common::*;
use lora_as_core::{
    applayer::{FragmentationSession, McClassCSession, MulticastSetup, Reconciler},
    DownlinkDispatcher, FuotaScheduler, NewFuotaDeployment,
};
use lora_as_error::ASError;
use lora_as_lorawan::{
    applayer::{fragmentation, multicastsetup},
    crypto::encrypt_frm_payload,
    AES128Key, DevAddr, EUI64,
};
use lora_as_models::{
    enums::{
        common::MulticastGroupType,
        fuota::{FuotaDeviceState, FuotaState},
    },
    settings::{CommandSync, FuotaDeployment as FuotaSettings},
};
use lora_as_repository::{
    FuotaDeploymentDeviceRepository, FuotaDeploymentRepository, MulticastGroupRepository,
    RemoteMulticastSetupRepository,
};
use sea_orm::DatabaseConnection;
use std::{sync::Arc, time::Duration};
use uuid::Uuid;

const DEV_EUI: [u8; 8] = [0x03, 0x03, 0x03, 0x03, 0x03, 0x03, 0x03, 0x03];

fn params(payload: Vec<u8>) -> NewFuotaDeployment {
    NewFuotaDeployment {
        name: "firmware-v2".into(),
        group_type: MulticastGroupType::ClassC,
        dr: 5,
        frequency: 869_525_000,
        ping_slot_period: 0,
        fragmentation_matrix: 0,
        descriptor: [0x01, 0x02, 0x03, 0x04],
        payload,
        frag_size: 10,
        redundancy: 2,
        block_ack_delay: 1,
        multicast_timeout: 4,
        unicast_timeout: Duration::from_secs(60),
    }
}

struct Harness {
    db: DatabaseConnection,
    ns: Arc<RecordingNs>,
    dispatcher: Arc<DownlinkDispatcher>,
    scheduler: FuotaScheduler,
    multicast_setup: MulticastSetup,
    fragmentation: FragmentationSession,
}

async fn harness() -> Harness {
    let db = setup_db().await;
    let fx = seed(&db).await;
    provision_device(&db, &fx, DEV_EUI).await;

    let ns = RecordingNs::new(0);
    let dispatcher = Arc::new(DownlinkDispatcher::new(db.clone(), pool(&ns)));
    let scheduler = FuotaScheduler::new(
        db.clone(),
        pool(&ns),
        Arc::clone(&dispatcher),
        FuotaSettings::default(),
        CommandSync::multicast_setup_default(),
        CommandSync::fragmentation_session_default(),
    );
    Harness {
        db: db.clone(),
        ns,
        dispatcher: Arc::clone(&dispatcher),
        scheduler,
        multicast_setup: MulticastSetup::new(Arc::clone(&dispatcher), 200),
        fragmentation: FragmentationSession::new(dispatcher, 201),
    }
}

/// Ticks at the deployment's due time and returns the new state.
async fn step(h: &Harness, id: Uuid) -> (FuotaState, DateTime<Utc>) {
    let d = FuotaDeploymentRepository::find_by_id(id, &h.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(h.scheduler.tick(d.next_step_after).await.unwrap(), 1);
    let d = FuotaDeploymentRepository::find_by_id(id, &h.db)
        .await
        .unwrap()
        .unwrap();
    (d.state, d.next_step_after)
}

#[tokio::test]
async fn deployment_walks_every_state() {
    let h = harness().await;
    let dev_eui = EUI64(DEV_EUI);
    let deployment = h
        .scheduler
        .create_deployment_for_device(dev_eui, params((0u8..25).collect()))
        .await
        .unwrap();
    assert_eq!(deployment.state, FuotaState::MulticastCreate);

    let (state, _) = step(&h, deployment.id).await;
    assert_eq!(state, FuotaState::MulticastSetup);
    let group_id = {
        let calls = h.ns.calls.lock().unwrap();
        assert_eq!(calls.multicast_groups.len(), 1);
        calls.multicast_groups[0].id
    };
    assert!(MulticastGroupRepository::find_by_id(group_id, &h.db)
        .await
        .unwrap()
        .is_some());

    let before = Utc::now();
    let (state, next) = step(&h, deployment.id).await;
    assert_eq!(state, FuotaState::FragmentationSessSetup);
    // three unicast retries of one minute each
    assert!(next >= before + chrono::Duration::seconds(180));
    let row = RemoteMulticastSetupRepository::find(&DEV_EUI, group_id, &h.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.retry_interval_secs, 60);
    assert!(!row.state_provisioned);

    // device acknowledges the multicast setup
    let ans = multicastsetup::encode_commands(&[multicastsetup::Command::McGroupSetupAns(
        multicastsetup::McGroupSetupAns {
            mc_group_id: 0,
            id_error: false,
        },
    )]);
    h.multicast_setup
        .handle_command(&h.db, dev_eui, &ans)
        .await
        .unwrap();

    let (state, _) = step(&h, deployment.id).await;
    assert_eq!(state, FuotaState::MulticastSessCSetup);

    let ans = fragmentation::encode_commands(&[fragmentation::Command::FragSessionSetupAns(
        fragmentation::FragSessionSetupAns {
            frag_index: 0,
            wrong_descriptor: false,
            frag_session_index_not_supported: false,
            not_enough_memory: false,
            encoding_unsupported: false,
        },
    )])
    .unwrap();
    h.fragmentation
        .handle_command(&h.db, dev_eui, &ans)
        .await
        .unwrap();

    let (state, _) = step(&h, deployment.id).await;
    assert_eq!(state, FuotaState::Enqueue);

    let (state, _) = step(&h, deployment.id).await;
    assert_eq!(state, FuotaState::StatusRequest);
    {
        let calls = h.ns.calls.lock().unwrap();
        // 25 bytes in 10 byte fragments, plus two redundancy fragments
        assert_eq!(calls.multicast_items.len(), 5);
        assert_eq!(
            calls.multicast_items.iter().map(|i| i.f_cnt).collect::<Vec<_>>(),
            vec![0, 1, 2, 3, 4]
        );
        assert!(calls.multicast_items.iter().all(|i| i.f_port == 201));
    }

    let queued = h.ns.queue_items().len();
    let (state, _) = step(&h, deployment.id).await;
    assert_eq!(state, FuotaState::SetDeviceStatus);
    assert_eq!(h.ns.queue_items().len(), queued + 1);

    let ans = fragmentation::encode_commands(&[fragmentation::Command::FragSessionStatusAns(
        fragmentation::FragSessionStatusAns {
            frag_index: 0,
            nb_frag_received: 5,
            missing_frag: 0,
            not_enough_matrix_memory: false,
        },
    )])
    .unwrap();
    h.fragmentation
        .handle_command(&h.db, dev_eui, &ans)
        .await
        .unwrap();

    let (state, _) = step(&h, deployment.id).await;
    assert_eq!(state, FuotaState::Cleanup);
    let device = FuotaDeploymentDeviceRepository::find(deployment.id, &DEV_EUI, &h.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(device.state, FuotaDeviceState::Success);

    let (state, _) = step(&h, deployment.id).await;
    assert_eq!(state, FuotaState::Done);
    assert_eq!(h.ns.calls.lock().unwrap().deleted_groups, vec![group_id]);
    assert!(MulticastGroupRepository::find_by_id(group_id, &h.db)
        .await
        .unwrap()
        .is_none());
    let done = FuotaDeploymentRepository::find_by_id(deployment.id, &h.db)
        .await
        .unwrap()
        .unwrap();
    assert!(done.multicast_group_id.is_none());

    // terminal deployments are never picked up again
    assert_eq!(
        h.scheduler
            .tick(Utc::now() + chrono::Duration::days(1))
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn silent_device_is_marked_failed() {
    let h = harness().await;
    let deployment = h
        .scheduler
        .create_deployment_for_device(EUI64(DEV_EUI), params(vec![0xaa; 10]))
        .await
        .unwrap();

    // no answers at all, the deployment still runs to completion
    let mut state = deployment.state;
    while state != FuotaState::Done {
        state = step(&h, deployment.id).await.0;
    }

    let device = FuotaDeploymentDeviceRepository::find(deployment.id, &DEV_EUI, &h.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(device.state, FuotaDeviceState::Error);
    assert_eq!(device.error_message, "multicast-setup not completed");
    assert!(h.ns.calls.lock().unwrap().multicast_items.len() > 0);
}

#[tokio::test]
async fn deployment_parameters_are_validated() {
    let h = harness().await;

    let err = h
        .scheduler
        .create_deployment_for_device(EUI64(DEV_EUI), params(Vec::new()))
        .await
        .unwrap_err();
    assert!(matches!(err, ASError::Validation(_)));

    let mut p = params(vec![1; 10]);
    p.multicast_timeout = 16;
    let err = h
        .scheduler
        .create_deployment_for_device(EUI64(DEV_EUI), p)
        .await
        .unwrap_err();
    assert!(matches!(err, ASError::Validation(_)));

    let err = h
        .scheduler
        .create_deployment_for_device(EUI64([0xee; 8]), params(vec![1; 10]))
        .await
        .unwrap_err();
    assert!(matches!(err, ASError::NotFound(_)));
}

/// Device acknowledges the multicast setup and the fragmentation session.
async fn provision_sessions(h: &Harness) {
    let dev_eui = EUI64(DEV_EUI);
    let ans = multicastsetup::encode_commands(&[multicastsetup::Command::McGroupSetupAns(
        multicastsetup::McGroupSetupAns {
            mc_group_id: 0,
            id_error: false,
        },
    )]);
    h.multicast_setup
        .handle_command(&h.db, dev_eui, &ans)
        .await
        .unwrap();

    let ans = fragmentation::encode_commands(&[fragmentation::Command::FragSessionSetupAns(
        fragmentation::FragSessionSetupAns {
            frag_index: 0,
            wrong_descriptor: false,
            frag_session_index_not_supported: false,
            not_enough_memory: false,
            encoding_unsupported: false,
        },
    )])
    .unwrap();
    h.fragmentation
        .handle_command(&h.db, dev_eui, &ans)
        .await
        .unwrap();
}

#[tokio::test]
async fn class_b_session_uses_ping_slot_periodicity() {
    let h = harness().await;
    let mut p = params((0u8..20).collect());
    p.group_type = MulticastGroupType::ClassB;
    p.ping_slot_period = 128;
    let deployment = h
        .scheduler
        .create_deployment_for_device(EUI64(DEV_EUI), p)
        .await
        .unwrap();

    assert_eq!(step(&h, deployment.id).await.0, FuotaState::MulticastSetup);
    {
        let calls = h.ns.calls.lock().unwrap();
        assert_eq!(calls.multicast_groups[0].group_type, MulticastGroupType::ClassB);
        assert_eq!(calls.multicast_groups[0].ping_slot_period, 128);
    }
    assert_eq!(step(&h, deployment.id).await.0, FuotaState::FragmentationSessSetup);
    provision_sessions(&h).await;
    assert_eq!(step(&h, deployment.id).await.0, FuotaState::MulticastSessCSetup);
    assert_eq!(step(&h, deployment.id).await.0, FuotaState::Enqueue);

    let sessions = Reconciler::new(
        h.db.clone(),
        McClassCSession::new(Arc::clone(&h.dispatcher), 200),
        CommandSync::multicast_setup_default(),
    );
    let queued = h.ns.queue_items().len();
    assert_eq!(
        sessions
            .tick(Utc::now() + chrono::Duration::days(1))
            .await
            .unwrap(),
        1
    );
    let items = h.ns.queue_items();
    assert_eq!(items.len(), queued + 1);
    let item = &items[queued];
    assert_eq!(item.f_port, 200);
    let plain = encrypt_frm_payload(
        &AES128Key(APP_S_KEY),
        false,
        &DevAddr(DEV_ADDR),
        item.f_cnt,
        &item.frm_payload,
    );
    match multicastsetup::decode_commands(false, &plain).unwrap().as_slice() {
        [multicastsetup::Command::McClassBSessionReq(req)] => {
            // 128 slots, a ping slot every 4 seconds
            assert_eq!(req.periodicity, 2);
            assert_eq!(req.time_out, 4);
            assert_eq!(req.dr, 5);
            assert_eq!(req.dl_frequency, 869_525_000);
        }
        other => panic!("unexpected commands {other:?}"),
    }

    // session lasts 2^4 beacon periods of 128 seconds
    let due = FuotaDeploymentRepository::find_by_id(deployment.id, &h.db)
        .await
        .unwrap()
        .unwrap()
        .next_step_after;
    let (state, next) = step(&h, deployment.id).await;
    assert_eq!(state, FuotaState::StatusRequest);
    assert_eq!(next - due, chrono::Duration::seconds(2048));
}

#[tokio::test]
async fn class_b_needs_a_valid_ping_slot_period() {
    let h = harness().await;
    for period in [0, 100, 8192] {
        let mut p = params(vec![1; 10]);
        p.group_type = MulticastGroupType::ClassB;
        p.ping_slot_period = period;
        let err = h
            .scheduler
            .create_deployment_for_device(EUI64(DEV_EUI), p)
            .await
            .unwrap_err();
        assert!(matches!(err, ASError::Validation(_)), "period {period}");
    }
}

#[tokio::test]
async fn fragment_numbers_must_fit_fourteen_bits() {
    let h = harness().await;

    // 16381 data fragments plus 2 redundant ones end at fragment 16383
    let mut p = params(vec![0x5a; 16_381]);
    p.frag_size = 1;
    h.scheduler
        .create_deployment_for_device(EUI64(DEV_EUI), p)
        .await
        .unwrap();

    let mut p = params(vec![0x5a; 16_382]);
    p.frag_size = 1;
    let err = h
        .scheduler
        .create_deployment_for_device(EUI64(DEV_EUI), p)
        .await
        .unwrap_err();
    assert!(matches!(err, ASError::Validation(_)));

    let mut p = params(vec![0x5a; 100]);
    p.frag_size = 1;
    p.redundancy = 16_300;
    let err = h
        .scheduler
        .create_deployment_for_device(EUI64(DEV_EUI), p)
        .await
        .unwrap_err();
    assert!(matches!(err, ASError::Validation(_)));
}
