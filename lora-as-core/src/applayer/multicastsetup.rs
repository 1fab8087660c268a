use super::RetriedCommand;
use crate::downlink::DownlinkDispatcher;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lora_as_error::{ASError, ASResult};
use lora_as_lorawan::{
    applayer::multicastsetup::{
        decode_commands, encode_commands, Command, McClassBSessionReq, McClassCSessionReq,
        McGroupDeleteAns, McGroupDeleteReq, McGroupSetupAns, McGroupSetupReq, McSessionAns,
        ping_slot_periodicity,
    },
    gps::gps_seconds_u32,
    AES128Key, DevAddr, EUI64,
};
use lora_as_models::{
    entities::prelude::{RemoteMulticastClassCSessionModel, RemoteMulticastSetupModel},
    enums::common::{MulticastGroupType, RemoteCommandState},
};
use lora_as_repository::{
    MulticastGroupRepository, RemoteMulticastClassCSessionRepository,
    RemoteMulticastSetupRepository,
};
use sea_orm::{ConnectionTrait, DatabaseTransaction};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Emits `McGroupSetupReq` / `McGroupDeleteReq` for pending
/// remote-multicast-setup rows and applies the device answers.
pub struct MulticastSetup {
    dispatcher: Arc<DownlinkDispatcher>,
    f_port: u8,
}

impl MulticastSetup {
    pub fn new(dispatcher: Arc<DownlinkDispatcher>, f_port: u8) -> Self {
        Self { dispatcher, f_port }
    }

    #[inline]
    pub fn f_port(&self) -> u8 {
        self.f_port
    }

    /// Applies the answers contained in one uplink on the multicast-setup
    /// FPort. Any rejection by the device fails the whole uplink.
    #[instrument(name = "multicast-setup-uplink", skip(self, db, b), fields(dev_eui = %dev_eui))]
    pub async fn handle_command<C>(&self, db: &C, dev_eui: EUI64, b: &[u8]) -> ASResult<()>
    where
        C: ConnectionTrait,
    {
        for cmd in decode_commands(true, b)? {
            match cmd {
                Command::McGroupSetupAns(ans) => handle_setup_ans(db, dev_eui, ans).await?,
                Command::McGroupDeleteAns(ans) => handle_delete_ans(db, dev_eui, ans).await?,
                Command::McClassCSessionAns(ans) => {
                    handle_session_ans(db, dev_eui, ans, MulticastGroupType::ClassC).await?
                }
                Command::McClassBSessionAns(ans) => {
                    handle_session_ans(db, dev_eui, ans, MulticastGroupType::ClassB).await?
                }
                Command::McGroupStatusAns(ans) => {
                    info!(
                        nb_total_groups = ans.nb_total_groups,
                        ans_group_mask = ans.ans_group_mask,
                        "McGroupStatusAns received"
                    );
                }
                Command::PackageVersionAns(ans) => {
                    info!(
                        package_identifier = ans.package_identifier,
                        package_version = ans.package_version,
                        "PackageVersionAns received"
                    );
                }
                other => {
                    warn!(cid = other.cid(), "Unexpected multicast-setup command in uplink");
                }
            }
        }
        Ok(())
    }
}

async fn handle_setup_ans<C: ConnectionTrait>(
    db: &C,
    dev_eui: EUI64,
    ans: McGroupSetupAns,
) -> ASResult<()> {
    if ans.id_error {
        return Err(ASError::Validation(format!(
            "McGroupSetupAns reported IDError for McGroupID {}",
            ans.mc_group_id
        )));
    }
    let row = setup_row(db, dev_eui, ans.mc_group_id).await?;
    if row.state != RemoteCommandState::Setup {
        return Err(ASError::Validation(format!(
            "McGroupSetupAns for McGroupID {} but the pending state is delete",
            ans.mc_group_id
        )));
    }
    let row = RemoteMulticastSetupRepository::set_provisioned(row, db).await?;
    info!(multicast_group_id = %row.multicast_group_id, mc_group_id = ans.mc_group_id, "Multicast group set up on device");
    Ok(())
}

async fn handle_delete_ans<C: ConnectionTrait>(
    db: &C,
    dev_eui: EUI64,
    ans: McGroupDeleteAns,
) -> ASResult<()> {
    if ans.mc_group_undefined {
        return Err(ASError::Validation(format!(
            "McGroupDeleteAns reported McGroupUndefined for McGroupID {}",
            ans.mc_group_id
        )));
    }
    let row = setup_row(db, dev_eui, ans.mc_group_id).await?;
    if row.state != RemoteCommandState::Delete {
        return Err(ASError::Validation(format!(
            "McGroupDeleteAns for McGroupID {} but the pending state is setup",
            ans.mc_group_id
        )));
    }
    let row = RemoteMulticastSetupRepository::set_provisioned(row, db).await?;
    MulticastGroupRepository::remove_device(row.multicast_group_id, dev_eui.as_bytes(), db).await?;
    info!(multicast_group_id = %row.multicast_group_id, mc_group_id = ans.mc_group_id, "Multicast group deleted from device");
    Ok(())
}

async fn handle_session_ans<C: ConnectionTrait>(
    db: &C,
    dev_eui: EUI64,
    ans: McSessionAns,
    group_type: MulticastGroupType,
) -> ASResult<()> {
    if ans.has_error() {
        return Err(ASError::Validation(format!(
            "Mc{group_type}SessionAns error for McGroupID {} (dr_error: {}, freq_error: {}, mc_group_undefined: {})",
            ans.mc_group_id, ans.dr_error, ans.freq_error, ans.mc_group_undefined
        )));
    }
    let row = RemoteMulticastClassCSessionRepository::find_by_slot(
        dev_eui.as_bytes(),
        i16::from(ans.mc_group_id),
        db,
    )
    .await?
    .ok_or_else(|| {
        ASError::NotFound(format!(
            "multicast session for {dev_eui} McGroupID {}",
            ans.mc_group_id
        ))
    })?;
    let row = RemoteMulticastClassCSessionRepository::set_provisioned(row, db).await?;
    MulticastGroupRepository::add_device(row.multicast_group_id, dev_eui.as_bytes(), db).await?;
    info!(
        multicast_group_id = %row.multicast_group_id,
        time_to_start = ?ans.time_to_start,
        "Multicast session accepted by device"
    );
    Ok(())
}

async fn setup_row<C: ConnectionTrait>(
    db: &C,
    dev_eui: EUI64,
    mc_group_id: u8,
) -> ASResult<RemoteMulticastSetupModel> {
    RemoteMulticastSetupRepository::find_by_slot(dev_eui.as_bytes(), i16::from(mc_group_id), db)
        .await?
        .ok_or_else(|| {
            ASError::NotFound(format!(
                "remote multicast-setup for {dev_eui} McGroupID {mc_group_id}"
            ))
        })
}

#[async_trait]
impl RetriedCommand for MulticastSetup {
    type Row = RemoteMulticastSetupModel;

    fn name(&self) -> &'static str {
        "multicast-setup"
    }

    fn describe(&self, row: &Self::Row) -> String {
        format!("{}/{}", hex::encode(&row.dev_eui), row.multicast_group_id)
    }

    async fn find_pending(
        &self,
        now: DateTime<Utc>,
        max_retries: i32,
        limit: u64,
        db: &DatabaseTransaction,
    ) -> ASResult<Vec<Self::Row>> {
        Ok(RemoteMulticastSetupRepository::find_pending(now, max_retries, limit, db).await?)
    }

    async fn emit(&self, row: &Self::Row, db: &DatabaseTransaction) -> ASResult<()> {
        let mc_group_id = u8::try_from(row.mc_group_id)?;
        let cmd = match row.state {
            RemoteCommandState::Setup => Command::McGroupSetupReq(McGroupSetupReq {
                mc_group_id,
                mc_addr: DevAddr::from_slice(&row.mc_addr)?,
                mc_key_encrypted: AES128Key::from_slice(&row.mc_key_encrypted)?,
                min_mc_f_cnt: u32::try_from(row.min_mc_f_cnt)?,
                max_mc_f_cnt: u32::try_from(row.max_mc_f_cnt)?,
            }),
            RemoteCommandState::Delete => Command::McGroupDeleteReq(McGroupDeleteReq { mc_group_id }),
        };
        let dev_eui = EUI64::from_slice(&row.dev_eui)?;
        self.dispatcher
            .enqueue_in(db, dev_eui, false, self.f_port, &encode_commands(&[cmd]))
            .await?;
        Ok(())
    }

    async fn schedule_retry(
        &self,
        row: Self::Row,
        now: DateTime<Utc>,
        db: &DatabaseTransaction,
    ) -> ASResult<()> {
        RemoteMulticastSetupRepository::schedule_retry(row, now, db).await?;
        Ok(())
    }
}

/// Emits class-B / class-C session requests for pending multicast session rows.
/// Answers are handled by [`MulticastSetup::handle_command`].
pub struct McClassCSession {
    dispatcher: Arc<DownlinkDispatcher>,
    f_port: u8,
}

impl McClassCSession {
    pub fn new(dispatcher: Arc<DownlinkDispatcher>, f_port: u8) -> Self {
        Self { dispatcher, f_port }
    }
}

#[async_trait]
impl RetriedCommand for McClassCSession {
    type Row = RemoteMulticastClassCSessionModel;

    fn name(&self) -> &'static str {
        "multicast-session"
    }

    fn describe(&self, row: &Self::Row) -> String {
        format!("{}/{}", hex::encode(&row.dev_eui), row.multicast_group_id)
    }

    async fn find_pending(
        &self,
        now: DateTime<Utc>,
        max_retries: i32,
        limit: u64,
        db: &DatabaseTransaction,
    ) -> ASResult<Vec<Self::Row>> {
        Ok(RemoteMulticastClassCSessionRepository::find_pending(now, max_retries, limit, db).await?)
    }

    async fn emit(&self, row: &Self::Row, db: &DatabaseTransaction) -> ASResult<()> {
        let mc_group_id = u8::try_from(row.mc_group_id)?;
        let session_time = gps_seconds_u32(row.session_time);
        let time_out = u8::try_from(row.session_time_out)?;
        let dl_frequency = u32::try_from(row.dl_frequency)?;
        let dr = u8::try_from(row.dr)?;

        let cmd = match row.group_type {
            MulticastGroupType::ClassC => Command::McClassCSessionReq(McClassCSessionReq {
                mc_group_id,
                session_time,
                time_out,
                dl_frequency,
                dr,
            }),
            MulticastGroupType::ClassB => Command::McClassBSessionReq(McClassBSessionReq {
                mc_group_id,
                session_time,
                time_out,
                periodicity: ping_slot_periodicity(u32::try_from(row.ping_slot_period)?)?,
                dl_frequency,
                dr,
            }),
        };
        let dev_eui = EUI64::from_slice(&row.dev_eui)?;
        self.dispatcher
            .enqueue_in(db, dev_eui, false, self.f_port, &encode_commands(&[cmd]))
            .await?;
        Ok(())
    }

    async fn schedule_retry(
        &self,
        row: Self::Row,
        now: DateTime<Utc>,
        db: &DatabaseTransaction,
    ) -> ASResult<()> {
        RemoteMulticastClassCSessionRepository::schedule_retry(row, now, db).await?;
        Ok(())
    }
}
