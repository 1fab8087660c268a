mod common;

use chrono::{Duration, Utc};
use common::{create_device, seed, setup_db};
use lora_as_models::{
    entities::{
        prelude::{
            FuotaDeploymentActiveModel, FuotaDeploymentDeviceActiveModel, GatewayActiveModel,
            GatewayPingActiveModel, MulticastGroupActiveModel, NetworkServerActiveModel,
            RemoteFragmentationSessionModel,
            RemoteMulticastSetupActiveModel,
        },
        remote_fragmentation_session::McGroupIds,
    },
    enums::{
        common::{MulticastGroupType, RemoteCommandState},
        fuota::{FuotaDeviceState, FuotaState},
    },
};
use lora_as_repository::{
    FuotaDeploymentDeviceRepository, FuotaDeploymentRepository, GatewayPingRepository,
    GatewayRepository, MulticastGroupRepository, NetworkServerRepository,
    RemoteFragmentationSessionRepository, RemoteMulticastSetupRepository,
};
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};
use uuid::Uuid;

const DEV_A: [u8; 8] = [1, 2, 3, 4, 5, 6, 7, 8];
const DEV_B: [u8; 8] = [8, 7, 6, 5, 4, 3, 2, 1];

async fn create_group(db: &DatabaseConnection, application_id: i32) -> Uuid {
    let now = Utc::now();
    MulticastGroupActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set("mg".into()),
        application_id: Set(application_id),
        mc_addr: Set(vec![1, 2, 3, 4]),
        mc_nwk_s_key: Set(vec![0; 16]),
        mc_app_s_key: Set(vec![0; 16]),
        mc_key: Set(vec![0; 16]),
        f_cnt: Set(0),
        group_type: Set(MulticastGroupType::ClassC),
        dr: Set(5),
        frequency: Set(869_525_000),
        ping_slot_period: Set(0),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await
    .expect("multicast group")
    .id
}

fn setup_row(dev_eui: [u8; 8], group: Uuid, interval: i64) -> RemoteMulticastSetupActiveModel {
    let now = Utc::now();
    RemoteMulticastSetupActiveModel {
        dev_eui: Set(dev_eui.to_vec()),
        multicast_group_id: Set(group),
        mc_group_id: Set(0),
        mc_addr: Set(vec![1, 2, 3, 4]),
        mc_key_encrypted: Set(vec![0; 16]),
        min_mc_f_cnt: Set(0),
        max_mc_f_cnt: Set(u32::MAX as i64),
        state: Set(RemoteCommandState::Setup),
        state_provisioned: Set(false),
        retry_after: Set(now - Duration::seconds(1)),
        retry_count: Set(0),
        retry_interval_secs: Set(interval),
        created_at: Set(now),
        updated_at: Set(now),
    }
}

#[tokio::test]
async fn test_pending_rows_stop_after_max_retries() {
    let db = setup_db().await;
    let fx = seed(&db, false).await;
    create_device(&db, &fx, DEV_A).await;
    let group = create_group(&db, fx.application_id).await;
    RemoteMulticastSetupRepository::create(setup_row(DEV_A, group, 0), &db)
        .await
        .unwrap();

    for tick in 1..=5 {
        let now = Utc::now() + Duration::seconds(tick);
        let rows = RemoteMulticastSetupRepository::find_pending(now, 3, 10, &db)
            .await
            .unwrap();
        for row in rows {
            RemoteMulticastSetupRepository::schedule_retry(row, now, &db)
                .await
                .unwrap();
        }
    }

    let row = RemoteMulticastSetupRepository::find(&DEV_A, group, &db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.retry_count, 3);
}

#[tokio::test]
async fn test_retry_interval_defers_next_attempt() {
    let db = setup_db().await;
    let fx = seed(&db, false).await;
    create_device(&db, &fx, DEV_A).await;
    let group = create_group(&db, fx.application_id).await;
    RemoteMulticastSetupRepository::create(setup_row(DEV_A, group, 60), &db)
        .await
        .unwrap();

    let now = Utc::now();
    let rows = RemoteMulticastSetupRepository::find_pending(now, 3, 10, &db)
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    RemoteMulticastSetupRepository::schedule_retry(rows[0].clone(), now, &db)
        .await
        .unwrap();

    let again = RemoteMulticastSetupRepository::find_pending(now + Duration::seconds(1), 3, 10, &db)
        .await
        .unwrap();
    assert!(again.is_empty());
}

#[tokio::test]
async fn test_provisioned_rows_leave_the_pending_set() {
    let db = setup_db().await;
    let fx = seed(&db, false).await;
    create_device(&db, &fx, DEV_A).await;
    let group = create_group(&db, fx.application_id).await;
    RemoteMulticastSetupRepository::create(setup_row(DEV_A, group, 0), &db)
        .await
        .unwrap();

    let row = RemoteMulticastSetupRepository::find_by_slot(&DEV_A, 0, &db)
        .await
        .unwrap()
        .unwrap();
    RemoteMulticastSetupRepository::set_provisioned(row, &db)
        .await
        .unwrap();

    assert!(RemoteMulticastSetupRepository::find_pending(Utc::now(), 3, 10, &db)
        .await
        .unwrap()
        .is_empty());
    assert_eq!(
        RemoteMulticastSetupRepository::find_provisioned_dev_euis(group, &db)
            .await
            .unwrap(),
        vec![DEV_A.to_vec()]
    );
}

#[tokio::test]
async fn test_set_device_status_marks_unprovisioned_devices() {
    let db = setup_db().await;
    let fx = seed(&db, false).await;
    create_device(&db, &fx, DEV_A).await;
    create_device(&db, &fx, DEV_B).await;
    let group = create_group(&db, fx.application_id).await;
    let now = Utc::now();

    let deployment = FuotaDeploymentRepository::create(
        FuotaDeploymentActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set("fw".into()),
            application_id: Set(fx.application_id),
            multicast_group_id: Set(Some(group)),
            group_type: Set(MulticastGroupType::ClassC),
            dr: Set(5),
            frequency: Set(869_525_000),
            ping_slot_period: Set(0),
            fragmentation_matrix: Set(0),
            descriptor: Set(vec![0; 4]),
            payload: Set(vec![1; 10]),
            frag_size: Set(5),
            redundancy: Set(1),
            block_ack_delay: Set(1),
            multicast_timeout: Set(4),
            unicast_timeout_secs: Set(60),
            state: Set(FuotaState::SetDeviceStatus),
            next_step_after: Set(now),
            created_at: Set(now),
            updated_at: Set(now),
        },
        &db,
    )
    .await
    .unwrap();

    for dev in [DEV_A, DEV_B] {
        FuotaDeploymentDeviceRepository::create(
            FuotaDeploymentDeviceActiveModel {
                fuota_deployment_id: Set(deployment.id),
                dev_eui: Set(dev.to_vec()),
                state: Set(FuotaDeviceState::Pending),
                error_message: Set(String::new()),
                created_at: Set(now),
                updated_at: Set(now),
            },
            &db,
        )
        .await
        .unwrap();
    }

    // DEV_A completed both setups, DEV_B never answered
    let row = RemoteMulticastSetupRepository::create(setup_row(DEV_A, group, 0), &db)
        .await
        .unwrap();
    RemoteMulticastSetupRepository::set_provisioned(row, &db)
        .await
        .unwrap();
    RemoteMulticastSetupRepository::create(setup_row(DEV_B, group, 0), &db)
        .await
        .unwrap();
    let session = RemoteFragmentationSessionRepository::upsert(
        RemoteFragmentationSessionModel {
            dev_eui: DEV_A.to_vec(),
            frag_index: 0,
            fuota_deployment_id: Some(deployment.id),
            mc_group_ids: McGroupIds(vec![0]),
            nb_frag: 2,
            frag_size: 5,
            fragmentation_matrix: 0,
            block_ack_delay: 1,
            padding: 0,
            descriptor: vec![0; 4],
            state: RemoteCommandState::Setup,
            state_provisioned: false,
            retry_after: now,
            retry_count: 0,
            retry_interval_secs: 60,
            created_at: now,
            updated_at: now,
        },
        &db,
    )
    .await
    .unwrap();
    RemoteFragmentationSessionRepository::set_provisioned(session, &db)
        .await
        .unwrap();

    let n = FuotaDeploymentDeviceRepository::fail_without_multicast_setup(
        deployment.id,
        group,
        "multicast setup failed",
        &db,
    )
    .await
    .unwrap();
    assert_eq!(n, 1);
    let n = FuotaDeploymentDeviceRepository::fail_without_fragmentation_session(
        deployment.id,
        "fragmentation setup failed",
        &db,
    )
    .await
    .unwrap();
    assert_eq!(n, 0);

    let b = FuotaDeploymentDeviceRepository::find(deployment.id, &DEV_B, &db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(b.state, FuotaDeviceState::Error);
    assert_eq!(b.error_message, "multicast setup failed");

    FuotaDeploymentDeviceRepository::set_state(deployment.id, &DEV_A, FuotaDeviceState::Success, "", &db)
        .await
        .unwrap();
    assert_eq!(
        FuotaDeploymentDeviceRepository::fail_remaining(deployment.id, "no answer", &db)
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn test_multicast_membership_and_routing() {
    let db = setup_db().await;
    let fx = seed(&db, false).await;
    create_device(&db, &fx, DEV_A).await;
    let group = create_group(&db, fx.application_id).await;

    MulticastGroupRepository::add_device(group, &DEV_A, &db).await.unwrap();
    MulticastGroupRepository::add_device(group, &DEV_A, &db).await.unwrap();
    assert_eq!(MulticastGroupRepository::count_devices(group, &db).await.unwrap(), 1);

    let mg = MulticastGroupRepository::find_by_id(group, &db).await.unwrap().unwrap();
    assert_eq!(
        MulticastGroupRepository::count_foreign_devices(&mg, &db).await.unwrap(),
        0
    );

    let ns = NetworkServerRepository::find_for_device(&DEV_A, &db).await.unwrap();
    assert_eq!(ns.id, fx.network_server_id);
    let ns = NetworkServerRepository::find_for_application(fx.application_id, &db)
        .await
        .unwrap();
    assert_eq!(ns.server, "localhost:8000");

    assert!(MulticastGroupRepository::remove_device(group, &DEV_A, &db).await.unwrap());
    assert!(!MulticastGroupRepository::remove_device(group, &DEV_A, &db).await.unwrap());
}

#[tokio::test]
async fn test_gateway_ping_selection() {
    let db = setup_db().await;
    let fx = seed(&db, true).await;
    let now = Utc::now();
    for (mac, ping) in [([1u8; 8], true), ([2u8; 8], false)] {
        GatewayRepository::create(
            GatewayActiveModel {
                mac: Set(mac.to_vec()),
                name: Set(hex::encode(mac)),
                organization_id: Set(1),
                network_server_id: Set(fx.network_server_id),
                ping: Set(ping),
                last_ping_id: Set(None),
                last_ping_sent_at: Set(None),
                latitude: Set(0.0),
                longitude: Set(0.0),
                altitude: Set(0.0),
                created_at: Set(now),
                updated_at: Set(now),
            },
            &db,
        )
        .await
        .unwrap();
    }

    let (gw, ns) = GatewayRepository::find_next_for_ping(now, &db)
        .await
        .unwrap()
        .expect("gateway due");
    assert_eq!(gw.mac, vec![1u8; 8]);
    assert_eq!(ns.gateway_discovery_dr, 5);

    let ping = GatewayPingRepository::create(
        GatewayPingActiveModel {
            gateway_mac: Set(gw.mac.clone()),
            frequency: Set(ns.gateway_discovery_tx_frequency),
            dr: Set(ns.gateway_discovery_dr),
            created_at: Set(now),
            ..Default::default()
        },
        &db,
    )
    .await
    .unwrap();
    GatewayRepository::set_last_ping(gw, ping.id, now, &db).await.unwrap();

    // once a day: not due again right away
    assert!(GatewayRepository::find_next_for_ping(now + Duration::hours(1), &db)
        .await
        .unwrap()
        .is_none());
    assert!(GatewayRepository::find_next_for_ping(now + Duration::hours(25), &db)
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_due_gateway_is_found_behind_many_not_due() {
    let db = setup_db().await;
    let fx = seed(&db, true).await;
    let now = Utc::now();

    let hourly = NetworkServerActiveModel {
        name: Set("hourly".into()),
        server: Set("localhost:8001".into()),
        gateway_discovery_enabled: Set(true),
        gateway_discovery_interval: Set(24),
        gateway_discovery_tx_frequency: Set(868_300_000),
        gateway_discovery_dr: Set(3),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&db)
    .await
    .unwrap();

    let gateway = |mac: Vec<u8>, network_server_id: i32, last: chrono::DateTime<Utc>| {
        GatewayActiveModel {
            name: Set(hex::encode(&mac)),
            mac: Set(mac),
            organization_id: Set(1),
            network_server_id: Set(network_server_id),
            ping: Set(true),
            last_ping_id: Set(None),
            last_ping_sent_at: Set(Some(last)),
            latitude: Set(0.0),
            longitude: Set(0.0),
            altitude: Set(0.0),
            created_at: Set(now),
            updated_at: Set(now),
        }
    };

    // daily cadence, pinged two hours ago: older but not due
    for i in 0..60u8 {
        GatewayRepository::create(
            gateway(vec![0x10, i, 0, 0, 0, 0, 0, 0], fx.network_server_id, now - Duration::hours(2)),
            &db,
        )
        .await
        .unwrap();
    }
    // hourly cadence, pinged 90 minutes ago: due
    GatewayRepository::create(
        gateway(vec![0x20; 8], hourly.id, now - Duration::minutes(90)),
        &db,
    )
    .await
    .unwrap();

    let (gw, ns) = GatewayRepository::find_next_for_ping(now, &db)
        .await
        .unwrap()
        .expect("hourly gateway due");
    assert_eq!(gw.mac, vec![0x20; 8]);
    assert_eq!(ns.id, hourly.id);
}
