//! FUOTA deployment state machine.
//!
//! A deployment walks the [`FuotaState`] sequence once. Every tick loads the
//! due deployments under `FOR UPDATE SKIP LOCKED`, advances each of them by
//! exactly one step inside its own savepoint and pushes `next_step_after`
//! forward in the same transaction. A failing step is rolled back and retried
//! after the configured back-off.
use crate::{
    downlink::DownlinkDispatcher,
    nsclient::{client_for_application, MulticastGroup, NsClientPool},
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use lora_as_error::{ASError, ASResult};
use lora_as_lorawan::{
    applayer::{
        fragmentation::{
            self, encode_commands, Command, DataFragment, FragSessionStatusReq,
            MAX_FRAGMENT_NUMBER,
        },
        multicastsetup::ping_slot_periodicity,
    },
    keys::{
        encrypt_mc_key, mc_app_s_key, mc_ke_key, mc_net_s_key, mc_root_key_for_app_key,
        mc_root_key_for_gen_app_key,
    },
    AES128Key, DevAddr, EUI64,
};
use lora_as_models::{
    entities::prelude::{
        FuotaDeploymentActiveModel, FuotaDeploymentDeviceActiveModel, FuotaDeploymentModel,
        McGroupIds, MulticastGroupActiveModel, MulticastGroupModel,
        RemoteFragmentationSessionModel, RemoteMulticastClassCSessionActiveModel,
        RemoteMulticastSetupActiveModel,
    },
    enums::{
        common::{MulticastGroupType, RemoteCommandState},
        fuota::{FuotaDeviceState, FuotaState},
    },
    settings::{CommandSync, FuotaDeployment as FuotaSettings},
};
use lora_as_repository::{
    ApplicationRepository, DeviceActivationRepository, DeviceKeysRepository,
    DeviceProfileRepository, DeviceRepository, FuotaDeploymentDeviceRepository,
    FuotaDeploymentRepository, MulticastGroupRepository, RemoteFragmentationSessionRepository,
    RemoteMulticastClassCSessionRepository, RemoteMulticastSetupRepository,
};
use sea_orm::{ConnectionTrait, DatabaseConnection, DatabaseTransaction, Set, TransactionTrait};
use std::{collections::HashSet, sync::Arc, time::Duration};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Device multicast slot and fragmentation session index used by deployments.
const MC_GROUP_ID: u8 = 0;
const FRAG_INDEX: u8 = 0;
const MAX_MULTICAST_TIMEOUT: i16 = 15;

/// Parameters of a new single-device deployment.
#[derive(Debug, Clone)]
pub struct NewFuotaDeployment {
    pub name: String,
    pub group_type: MulticastGroupType,
    pub dr: u8,
    pub frequency: u32,
    /// Class-B ping-slot period in slots (32..=4096, a power of two).
    pub ping_slot_period: u32,
    pub fragmentation_matrix: u8,
    pub descriptor: [u8; 4],
    pub payload: Vec<u8>,
    pub frag_size: u8,
    pub redundancy: u16,
    pub block_ack_delay: u8,
    pub multicast_timeout: u8,
    pub unicast_timeout: Duration,
}

pub struct FuotaScheduler {
    db: DatabaseConnection,
    ns: Arc<dyn NsClientPool>,
    dispatcher: Arc<DownlinkDispatcher>,
    settings: FuotaSettings,
    multicast_setup: CommandSync,
    fragmentation: CommandSync,
}

impl FuotaScheduler {
    pub fn new(
        db: DatabaseConnection,
        ns: Arc<dyn NsClientPool>,
        dispatcher: Arc<DownlinkDispatcher>,
        settings: FuotaSettings,
        multicast_setup: CommandSync,
        fragmentation: CommandSync,
    ) -> Self {
        Self {
            db,
            ns,
            dispatcher,
            settings,
            multicast_setup,
            fragmentation,
        }
    }

    #[inline]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.settings.interval)
    }

    /// Validates the target device and stores a deployment in
    /// `MulticastCreate`, due immediately.
    #[instrument(name = "fuota-create", skip(self, params), fields(dev_eui = %dev_eui))]
    pub async fn create_deployment_for_device(
        &self,
        dev_eui: EUI64,
        params: NewFuotaDeployment,
    ) -> ASResult<FuotaDeploymentModel> {
        if params.payload.is_empty() {
            return Err(ASError::Validation("payload must not be empty".into()));
        }
        if params.frag_size == 0 {
            return Err(ASError::Validation("fragment size must be at least 1".into()));
        }
        if i16::from(params.multicast_timeout) > MAX_MULTICAST_TIMEOUT {
            return Err(ASError::Validation(format!(
                "multicast timeout exponent must be at most {MAX_MULTICAST_TIMEOUT}"
            )));
        }
        if params.group_type == MulticastGroupType::ClassB {
            ping_slot_periodicity(params.ping_slot_period)
                .map_err(|e| ASError::Validation(e.to_string()))?;
        }
        let frag_size = usize::from(params.frag_size);
        let nb_frag = (params.payload.len() + padding(params.payload.len(), frag_size)) / frag_size;
        let total = nb_frag + usize::from(params.redundancy);
        if total > usize::from(MAX_FRAGMENT_NUMBER) {
            return Err(ASError::Validation(format!(
                "{nb_frag} fragments plus {} redundant fragments exceed {MAX_FRAGMENT_NUMBER}",
                params.redundancy
            )));
        }

        let txn = self.db.begin().await?;
        let device = DeviceRepository::find_by_dev_eui(dev_eui.as_bytes(), &txn)
            .await?
            .ok_or_else(|| ASError::NotFound(format!("device {dev_eui}")))?;
        if DeviceActivationRepository::find_latest(dev_eui.as_bytes(), &txn)
            .await?
            .is_none()
        {
            return Err(ASError::Validation(format!("device {dev_eui} is not activated")));
        }
        if DeviceKeysRepository::find(dev_eui.as_bytes(), &txn).await?.is_none() {
            return Err(ASError::Validation(format!("device {dev_eui} has no keys")));
        }

        let now = Utc::now();
        let deployment = FuotaDeploymentRepository::create(
            FuotaDeploymentActiveModel {
                id: Set(Uuid::new_v4()),
                name: Set(params.name),
                application_id: Set(device.application_id),
                multicast_group_id: Set(None),
                group_type: Set(params.group_type),
                dr: Set(i16::from(params.dr)),
                frequency: Set(i64::from(params.frequency)),
                ping_slot_period: Set(i32::try_from(params.ping_slot_period)?),
                fragmentation_matrix: Set(i16::from(params.fragmentation_matrix)),
                descriptor: Set(params.descriptor.to_vec()),
                payload: Set(params.payload),
                frag_size: Set(i32::from(params.frag_size)),
                redundancy: Set(i32::from(params.redundancy)),
                block_ack_delay: Set(i16::from(params.block_ack_delay)),
                multicast_timeout: Set(i16::from(params.multicast_timeout)),
                unicast_timeout_secs: Set(i64::try_from(params.unicast_timeout.as_secs())?),
                state: Set(FuotaState::MulticastCreate),
                next_step_after: Set(now),
                created_at: Set(now),
                updated_at: Set(now),
            },
            &txn,
        )
        .await?;
        FuotaDeploymentDeviceRepository::create(
            FuotaDeploymentDeviceActiveModel {
                fuota_deployment_id: Set(deployment.id),
                dev_eui: Set(dev_eui.to_vec()),
                state: Set(FuotaDeviceState::Pending),
                error_message: Set(String::new()),
                created_at: Set(now),
                updated_at: Set(now),
            },
            &txn,
        )
        .await?;
        txn.commit().await?;

        info!(fuota_deployment_id = %deployment.id, "FUOTA deployment created");
        Ok(deployment)
    }

    /// Advances every due deployment by one step. Returns how many were due.
    #[instrument(name = "fuota-tick", skip_all)]
    pub async fn tick(&self, now: DateTime<Utc>) -> ASResult<usize> {
        let txn = self.db.begin().await?;
        let due = FuotaDeploymentRepository::find_due(now, self.settings.batch_size, &txn).await?;
        let count = due.len();

        for deployment in due {
            let savepoint = txn.begin().await?;
            match self.advance(deployment.clone(), now, &savepoint).await {
                Ok(updated) => {
                    savepoint.commit().await?;
                    info!(
                        fuota_deployment_id = %updated.id,
                        from = ?deployment.state,
                        to = ?updated.state,
                        next_step_after = %updated.next_step_after,
                        "FUOTA deployment advanced"
                    );
                }
                Err(e) => {
                    savepoint.rollback().await?;
                    error!(
                        fuota_deployment_id = %deployment.id,
                        state = ?deployment.state,
                        error = %e,
                        "FUOTA step failed"
                    );
                    let retry_at = now + chrono_duration(Duration::from_millis(self.settings.error_backoff))?;
                    FuotaDeploymentRepository::postpone(deployment, retry_at, &txn).await?;
                }
            }
        }

        txn.commit().await?;
        Ok(count)
    }

    async fn advance(
        &self,
        deployment: FuotaDeploymentModel,
        now: DateTime<Utc>,
        txn: &DatabaseTransaction,
    ) -> ASResult<FuotaDeploymentModel> {
        let next_state = deployment
            .state
            .next()
            .ok_or_else(|| ASError::Fatal(format!("deployment {} is already done", deployment.id)))?;
        let mut am: FuotaDeploymentActiveModel = deployment.clone().into();

        let next_step_after = match deployment.state {
            FuotaState::MulticastCreate => {
                let group = self.multicast_create(&deployment, now, txn).await?;
                am.multicast_group_id = Set(Some(group));
                now
            }
            FuotaState::MulticastSetup => {
                let group = self.group(&deployment, txn).await?;
                self.multicast_setup(&deployment, &group, now, txn).await?
            }
            FuotaState::FragmentationSessSetup => {
                let group = self.group(&deployment, txn).await?;
                self.fragmentation_sess_setup(&deployment, &group, now, txn).await?
            }
            FuotaState::MulticastSessCSetup => {
                let group = self.group(&deployment, txn).await?;
                self.multicast_sess_c_setup(&deployment, &group, now, txn).await?
            }
            FuotaState::Enqueue => {
                let group = self.group(&deployment, txn).await?;
                self.enqueue(&deployment, &group, now, txn).await?
            }
            FuotaState::StatusRequest => {
                let group = self.group(&deployment, txn).await?;
                self.status_request(&deployment, &group, now, txn).await?
            }
            FuotaState::SetDeviceStatus => {
                let group = self.group(&deployment, txn).await?;
                self.set_device_status(&deployment, &group, txn).await?;
                now
            }
            FuotaState::Cleanup => {
                let group = self.group(&deployment, txn).await?;
                self.cleanup(&deployment, &group, txn).await?;
                am.multicast_group_id = Set(None);
                now
            }
            FuotaState::Done => now,
        };

        am.state = Set(next_state);
        am.next_step_after = Set(next_step_after);
        am.updated_at = Set(Utc::now());
        Ok(FuotaDeploymentRepository::update(am, txn).await?)
    }

    /// Multicast group linked to the deployment, which must exist once
    /// `MulticastCreate` ran.
    async fn group(
        &self,
        deployment: &FuotaDeploymentModel,
        txn: &DatabaseTransaction,
    ) -> ASResult<MulticastGroupModel> {
        let id = deployment.multicast_group_id.ok_or_else(|| {
            ASError::Fatal(format!(
                "deployment {} in state {:?} has no multicast group",
                deployment.id, deployment.state
            ))
        })?;
        MulticastGroupRepository::find_by_id(id, txn)
            .await?
            .ok_or_else(|| ASError::Fatal(format!("multicast-group {id} of deployment {} is gone", deployment.id)))
    }

    async fn multicast_create(
        &self,
        deployment: &FuotaDeploymentModel,
        now: DateTime<Utc>,
        txn: &DatabaseTransaction,
    ) -> ASResult<Uuid> {
        let mc_addr = DevAddr::from_slice(&rand::random::<[u8; 4]>())?;
        let mc_key = AES128Key::from_slice(&rand::random::<[u8; 16]>())?;
        let mc_app_s_key = mc_app_s_key(&mc_key, &mc_addr);
        let mc_nwk_s_key = mc_net_s_key(&mc_key, &mc_addr);

        let app = ApplicationRepository::find_by_id(deployment.application_id, txn)
            .await?
            .ok_or_else(|| ASError::NotFound(format!("application {}", deployment.application_id)))?;

        let id = Uuid::new_v4();
        MulticastGroupRepository::create(
            MulticastGroupActiveModel {
                id: Set(id),
                name: Set(format!("fuota-{}", deployment.id)),
                application_id: Set(deployment.application_id),
                mc_addr: Set(mc_addr.to_vec()),
                mc_nwk_s_key: Set(mc_nwk_s_key.to_vec()),
                mc_app_s_key: Set(mc_app_s_key.to_vec()),
                mc_key: Set(mc_key.to_vec()),
                f_cnt: Set(0),
                group_type: Set(deployment.group_type),
                dr: Set(deployment.dr),
                frequency: Set(deployment.frequency),
                ping_slot_period: Set(deployment.ping_slot_period),
                created_at: Set(now),
                updated_at: Set(now),
            },
            txn,
        )
        .await?;

        let client = client_for_application(self.ns.as_ref(), deployment.application_id, txn).await?;
        client
            .create_multicast_group(MulticastGroup {
                id,
                mc_addr,
                mc_nwk_s_key,
                f_cnt: 0,
                group_type: deployment.group_type,
                dr: u8::try_from(deployment.dr)?,
                frequency: u32::try_from(deployment.frequency)?,
                ping_slot_period: u32::try_from(deployment.ping_slot_period)?,
                service_profile_id: app.service_profile_id,
            })
            .await?;

        info!(multicast_group_id = %id, mc_addr = %mc_addr, "Multicast group created");
        Ok(id)
    }

    async fn multicast_setup(
        &self,
        deployment: &FuotaDeploymentModel,
        group: &MulticastGroupModel,
        now: DateTime<Utc>,
        txn: &DatabaseTransaction,
    ) -> ASResult<DateTime<Utc>> {
        let mc_key = AES128Key::from_slice(&group.mc_key)?;

        for device in FuotaDeploymentDeviceRepository::find_for_deployment(deployment.id, txn).await? {
            let dev_eui = EUI64::from_slice(&device.dev_eui)?;
            let mc_key_encrypted = match encrypted_mc_key(dev_eui, &mc_key, txn).await {
                Ok(k) => k,
                Err(e) => {
                    warn!(dev_eui = %dev_eui, error = %e, "Cannot derive McKEKey");
                    FuotaDeploymentDeviceRepository::set_state(
                        deployment.id,
                        dev_eui.as_bytes(),
                        FuotaDeviceState::Error,
                        &e.to_string(),
                        txn,
                    )
                    .await?;
                    continue;
                }
            };

            RemoteMulticastSetupRepository::create(
                RemoteMulticastSetupActiveModel {
                    dev_eui: Set(dev_eui.to_vec()),
                    multicast_group_id: Set(group.id),
                    mc_group_id: Set(i16::from(MC_GROUP_ID)),
                    mc_addr: Set(group.mc_addr.clone()),
                    mc_key_encrypted: Set(mc_key_encrypted.to_vec()),
                    min_mc_f_cnt: Set(0),
                    max_mc_f_cnt: Set(i64::from(u32::MAX)),
                    state: Set(RemoteCommandState::Setup),
                    state_provisioned: Set(false),
                    retry_after: Set(now),
                    retry_count: Set(0),
                    retry_interval_secs: Set(deployment.unicast_timeout_secs),
                    created_at: Set(now),
                    updated_at: Set(now),
                },
                txn,
            )
            .await?;
        }

        self.after_unicast_retries(deployment, &self.multicast_setup, now)
    }

    async fn fragmentation_sess_setup(
        &self,
        deployment: &FuotaDeploymentModel,
        group: &MulticastGroupModel,
        now: DateTime<Utc>,
        txn: &DatabaseTransaction,
    ) -> ASResult<DateTime<Utc>> {
        let frag_size = usize::try_from(deployment.frag_size)?;
        let padding = padding(deployment.payload.len(), frag_size);
        let nb_frag = (deployment.payload.len() + padding) / frag_size;

        for dev_eui in RemoteMulticastSetupRepository::find_provisioned_dev_euis(group.id, txn).await? {
            RemoteFragmentationSessionRepository::upsert(
                RemoteFragmentationSessionModel {
                    dev_eui,
                    frag_index: i16::from(FRAG_INDEX),
                    fuota_deployment_id: Some(deployment.id),
                    mc_group_ids: McGroupIds(vec![MC_GROUP_ID]),
                    nb_frag: i32::try_from(nb_frag)?,
                    frag_size: deployment.frag_size,
                    fragmentation_matrix: deployment.fragmentation_matrix,
                    block_ack_delay: deployment.block_ack_delay,
                    padding: i16::try_from(padding)?,
                    descriptor: deployment.descriptor.clone(),
                    state: RemoteCommandState::Setup,
                    state_provisioned: false,
                    retry_after: now,
                    retry_count: 0,
                    retry_interval_secs: deployment.unicast_timeout_secs,
                    created_at: now,
                    updated_at: now,
                },
                txn,
            )
            .await?;
        }

        self.after_unicast_retries(deployment, &self.fragmentation, now)
    }

    async fn multicast_sess_c_setup(
        &self,
        deployment: &FuotaDeploymentModel,
        group: &MulticastGroupModel,
        now: DateTime<Utc>,
        txn: &DatabaseTransaction,
    ) -> ASResult<DateTime<Utc>> {
        let session_time = self.after_unicast_retries(deployment, &self.multicast_setup, now)?;

        for dev_eui in ready_devices(deployment, group, txn).await? {
            RemoteMulticastClassCSessionRepository::create(
                RemoteMulticastClassCSessionActiveModel {
                    dev_eui: Set(dev_eui),
                    multicast_group_id: Set(group.id),
                    mc_group_id: Set(i16::from(MC_GROUP_ID)),
                    session_time: Set(session_time),
                    session_time_out: Set(deployment.multicast_timeout),
                    dl_frequency: Set(group.frequency),
                    dr: Set(group.dr),
                    group_type: Set(group.group_type),
                    ping_slot_period: Set(group.ping_slot_period),
                    state_provisioned: Set(false),
                    retry_after: Set(now),
                    retry_count: Set(0),
                    retry_interval_secs: Set(deployment.unicast_timeout_secs),
                    created_at: Set(now),
                    updated_at: Set(now),
                },
                txn,
            )
            .await?;
        }

        Ok(session_time)
    }

    async fn enqueue(
        &self,
        deployment: &FuotaDeploymentModel,
        group: &MulticastGroupModel,
        now: DateTime<Utc>,
        txn: &DatabaseTransaction,
    ) -> ASResult<DateTime<Utc>> {
        let frag_size = usize::try_from(deployment.frag_size)?;
        let mut payload = deployment.payload.clone();
        payload.resize(payload.len() + padding(payload.len(), frag_size), 0);

        let fragments = fragmentation::encode(&payload, frag_size, usize::try_from(deployment.redundancy)?)?;
        let items = fragments
            .into_iter()
            .enumerate()
            .map(|(i, payload)| -> ASResult<Vec<u8>> {
                Ok(encode_commands(&[Command::DataFragment(DataFragment {
                    frag_index: FRAG_INDEX,
                    n: u16::try_from(i + 1)?,
                    payload,
                })])?)
            })
            .collect::<ASResult<Vec<_>>>()?;

        let f_cnts = self
            .dispatcher
            .enqueue_multiple_in(txn, group.id, self.fragmentation.fport, &items)
            .await?;
        info!(fragments = f_cnts.len(), first_f_cnt = ?f_cnts.first(), "Fragments enqueued");

        let exponent = u32::try_from(deployment.multicast_timeout)?;
        let session_secs = match deployment.group_type {
            MulticastGroupType::ClassC => 1u64 << exponent,
            // beacon period is 128 seconds
            MulticastGroupType::ClassB => 128u64 << exponent,
        };
        Ok(now + chrono_duration(Duration::from_secs(session_secs))?)
    }

    async fn status_request(
        &self,
        deployment: &FuotaDeploymentModel,
        group: &MulticastGroupModel,
        now: DateTime<Utc>,
        txn: &DatabaseTransaction,
    ) -> ASResult<DateTime<Utc>> {
        let cmd = encode_commands(&[Command::FragSessionStatusReq(FragSessionStatusReq {
            frag_index: FRAG_INDEX,
            participants: true,
        })])?;

        for dev_eui in ready_devices(deployment, group, txn).await? {
            let dev_eui = EUI64::from_slice(&dev_eui)?;
            let savepoint = txn.begin().await?;
            match self
                .dispatcher
                .enqueue_in(&savepoint, dev_eui, false, self.fragmentation.fport, &cmd)
                .await
            {
                Ok(_) => savepoint.commit().await?,
                Err(e) => {
                    savepoint.rollback().await?;
                    warn!(dev_eui = %dev_eui, error = %e, "Failed to request fragmentation status");
                }
            }
        }

        Ok(now + unicast_timeout(deployment)?)
    }

    async fn set_device_status(
        &self,
        deployment: &FuotaDeploymentModel,
        group: &MulticastGroupModel,
        txn: &DatabaseTransaction,
    ) -> ASResult<()> {
        let no_mc = FuotaDeploymentDeviceRepository::fail_without_multicast_setup(
            deployment.id,
            group.id,
            "multicast-setup not completed",
            txn,
        )
        .await?;
        let no_frag = FuotaDeploymentDeviceRepository::fail_without_fragmentation_session(
            deployment.id,
            "fragmentation-session setup not completed",
            txn,
        )
        .await?;
        let no_status = FuotaDeploymentDeviceRepository::fail_remaining(
            deployment.id,
            "device did not confirm the fragmentation status",
            txn,
        )
        .await?;
        if no_mc + no_frag + no_status > 0 {
            warn!(no_mc, no_frag, no_status, "Devices failed the FUOTA deployment");
        }
        Ok(())
    }

    async fn cleanup(
        &self,
        deployment: &FuotaDeploymentModel,
        group: &MulticastGroupModel,
        txn: &DatabaseTransaction,
    ) -> ASResult<()> {
        let client = client_for_application(self.ns.as_ref(), deployment.application_id, txn).await?;
        match client.delete_multicast_group(group.id).await {
            Ok(()) => {}
            Err(ASError::NotFound(_)) => {
                warn!(multicast_group_id = %group.id, "Multicast group already gone at the network-server");
            }
            Err(e) => return Err(e),
        }

        RemoteMulticastSetupRepository::delete_for_multicast_group(group.id, txn).await?;
        RemoteMulticastClassCSessionRepository::delete_for_multicast_group(group.id, txn).await?;
        RemoteFragmentationSessionRepository::delete_for_deployment(deployment.id, txn).await?;
        MulticastGroupRepository::delete(group.id, txn).await?;
        Ok(())
    }

    /// `now + sync_retries * unicast_timeout`, the time a command family gets
    /// to be acknowledged.
    fn after_unicast_retries(
        &self,
        deployment: &FuotaDeploymentModel,
        sync: &CommandSync,
        now: DateTime<Utc>,
    ) -> ASResult<DateTime<Utc>> {
        Ok(now + unicast_timeout(deployment)? * i32::try_from(sync.sync_retries)?)
    }
}

/// Devices with both the multicast setup and the fragmentation session
/// provisioned.
async fn ready_devices(
    deployment: &FuotaDeploymentModel,
    group: &MulticastGroupModel,
    txn: &DatabaseTransaction,
) -> ASResult<Vec<Vec<u8>>> {
    let mc: HashSet<Vec<u8>> = RemoteMulticastSetupRepository::find_provisioned_dev_euis(group.id, txn)
        .await?
        .into_iter()
        .collect();
    Ok(RemoteFragmentationSessionRepository::find_provisioned_dev_euis(deployment.id, txn)
        .await?
        .into_iter()
        .filter(|d| mc.contains(d))
        .collect())
}

/// McKey encrypted for one device: LoRaWAN 1.1 devices derive McRootKey
/// from the AppKey, 1.0 devices from the GenAppKey.
async fn encrypted_mc_key<C>(dev_eui: EUI64, mc_key: &AES128Key, db: &C) -> ASResult<AES128Key>
where
    C: ConnectionTrait,
{
    let device = DeviceRepository::find_by_dev_eui(dev_eui.as_bytes(), db)
        .await?
        .ok_or_else(|| ASError::NotFound(format!("device {dev_eui}")))?;
    let profile = DeviceProfileRepository::find_by_id(device.device_profile_id, db)
        .await?
        .ok_or_else(|| ASError::NotFound(format!("device-profile {}", device.device_profile_id)))?;
    let keys = DeviceKeysRepository::find(dev_eui.as_bytes(), db)
        .await?
        .ok_or_else(|| ASError::NotFound(format!("device-keys for {dev_eui}")))?;

    let mc_root_key = if profile.mac_version.starts_with("1.1") {
        mc_root_key_for_app_key(&AES128Key::from_slice(&keys.app_key)?)
    } else {
        mc_root_key_for_gen_app_key(&AES128Key::from_slice(&keys.gen_app_key)?)
    };
    Ok(encrypt_mc_key(&mc_ke_key(&mc_root_key), mc_key)?)
}

/// Bytes appended so the payload splits into whole fragments.
fn padding(len: usize, frag_size: usize) -> usize {
    (frag_size - len % frag_size) % frag_size
}

fn unicast_timeout(deployment: &FuotaDeploymentModel) -> ASResult<ChronoDuration> {
    chrono_duration(Duration::from_secs(u64::try_from(deployment.unicast_timeout_secs)?))
}

fn chrono_duration(d: Duration) -> ASResult<ChronoDuration> {
    ChronoDuration::from_std(d).map_err(|e| ASError::Validation(format!("invalid duration: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padding_completes_the_last_fragment() {
        assert_eq!(padding(100, 10), 0);
        assert_eq!(padding(101, 10), 9);
        assert_eq!(padding(5, 48), 43);
        assert_eq!(padding(1, 1), 0);
    }
}
