use super::RetriedCommand;
use crate::downlink::DownlinkDispatcher;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lora_as_error::{ASError, ASResult};
use lora_as_lorawan::{
    applayer::fragmentation::{
        decode_commands, encode_commands, Command, FragSessionDeleteReq, FragSessionSetupReq,
        FragSessionStatusAns,
    },
    EUI64,
};
use lora_as_models::{
    entities::prelude::RemoteFragmentationSessionModel,
    enums::{common::RemoteCommandState, fuota::FuotaDeviceState},
};
use lora_as_repository::{FuotaDeploymentDeviceRepository, RemoteFragmentationSessionRepository};
use sea_orm::{ConnectionTrait, DatabaseTransaction};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Emits `FragSessionSetupReq` / `FragSessionDeleteReq` for pending
/// remote-fragmentation-session rows and applies the device answers.
pub struct FragmentationSession {
    dispatcher: Arc<DownlinkDispatcher>,
    f_port: u8,
}

impl FragmentationSession {
    pub fn new(dispatcher: Arc<DownlinkDispatcher>, f_port: u8) -> Self {
        Self { dispatcher, f_port }
    }

    #[inline]
    pub fn f_port(&self) -> u8 {
        self.f_port
    }

    #[instrument(name = "fragmentation-uplink", skip(self, db, b), fields(dev_eui = %dev_eui))]
    pub async fn handle_command<C>(&self, db: &C, dev_eui: EUI64, b: &[u8]) -> ASResult<()>
    where
        C: ConnectionTrait,
    {
        for cmd in decode_commands(true, b)? {
            match cmd {
                Command::FragSessionSetupAns(ans) => {
                    if ans.has_error() {
                        return Err(ASError::Validation(format!(
                            "FragSessionSetupAns error for FragIndex {} (wrong_descriptor: {}, index_not_supported: {}, not_enough_memory: {}, encoding_unsupported: {})",
                            ans.frag_index,
                            ans.wrong_descriptor,
                            ans.frag_session_index_not_supported,
                            ans.not_enough_memory,
                            ans.encoding_unsupported
                        )));
                    }
                    provision(db, dev_eui, ans.frag_index, RemoteCommandState::Setup).await?;
                }
                Command::FragSessionDeleteAns(ans) => {
                    if ans.session_does_not_exist {
                        return Err(ASError::Validation(format!(
                            "FragSessionDeleteAns reported SessionDoesNotExist for FragIndex {}",
                            ans.frag_index
                        )));
                    }
                    provision(db, dev_eui, ans.frag_index, RemoteCommandState::Delete).await?;
                }
                Command::FragSessionStatusAns(ans) => handle_status_ans(db, dev_eui, ans).await?,
                Command::PackageVersionAns(ans) => {
                    info!(
                        package_identifier = ans.package_identifier,
                        package_version = ans.package_version,
                        "PackageVersionAns received"
                    );
                }
                other => {
                    warn!(cid = other.cid(), "Unexpected fragmentation command in uplink");
                }
            }
        }
        Ok(())
    }
}

async fn provision<C: ConnectionTrait>(
    db: &C,
    dev_eui: EUI64,
    frag_index: u8,
    expected: RemoteCommandState,
) -> ASResult<()> {
    let row = session_row(db, dev_eui, frag_index).await?;
    if row.state != expected {
        return Err(ASError::Validation(format!(
            "answer for FragIndex {frag_index} does not match the pending state {:?}",
            row.state
        )));
    }
    RemoteFragmentationSessionRepository::set_provisioned(row, db).await?;
    info!(frag_index, state = ?expected, "Fragmentation session provisioned");
    Ok(())
}

async fn handle_status_ans<C: ConnectionTrait>(
    db: &C,
    dev_eui: EUI64,
    ans: FragSessionStatusAns,
) -> ASResult<()> {
    let row = session_row(db, dev_eui, ans.frag_index).await?;
    let Some(deployment_id) = row.fuota_deployment_id else {
        warn!(frag_index = ans.frag_index, "Status for a session without deployment");
        return Ok(());
    };

    let (state, message) = if ans.not_enough_matrix_memory {
        (FuotaDeviceState::Error, "not enough matrix memory".to_string())
    } else if ans.missing_frag > 0 {
        (
            FuotaDeviceState::Error,
            format!("{} fragments missing", ans.missing_frag),
        )
    } else {
        (FuotaDeviceState::Success, String::new())
    };

    FuotaDeploymentDeviceRepository::set_state(deployment_id, dev_eui.as_bytes(), state, &message, db)
        .await?;
    info!(
        fuota_deployment_id = %deployment_id,
        nb_frag_received = ans.nb_frag_received,
        missing_frag = ans.missing_frag,
        state = ?state,
        "Fragmentation status received"
    );
    Ok(())
}

async fn session_row<C: ConnectionTrait>(
    db: &C,
    dev_eui: EUI64,
    frag_index: u8,
) -> ASResult<RemoteFragmentationSessionModel> {
    RemoteFragmentationSessionRepository::find_for_update(dev_eui.as_bytes(), i16::from(frag_index), db)
        .await?
        .ok_or_else(|| {
            ASError::NotFound(format!(
                "remote fragmentation-session for {dev_eui} FragIndex {frag_index}"
            ))
        })
}

#[async_trait]
impl RetriedCommand for FragmentationSession {
    type Row = RemoteFragmentationSessionModel;

    fn name(&self) -> &'static str {
        "fragmentation-session"
    }

    fn describe(&self, row: &Self::Row) -> String {
        format!("{}/{}", hex::encode(&row.dev_eui), row.frag_index)
    }

    async fn find_pending(
        &self,
        now: DateTime<Utc>,
        max_retries: i32,
        limit: u64,
        db: &DatabaseTransaction,
    ) -> ASResult<Vec<Self::Row>> {
        Ok(RemoteFragmentationSessionRepository::find_pending(now, max_retries, limit, db).await?)
    }

    async fn emit(&self, row: &Self::Row, db: &DatabaseTransaction) -> ASResult<()> {
        let frag_index = u8::try_from(row.frag_index)?;
        let cmd = match row.state {
            RemoteCommandState::Setup => {
                let descriptor = <[u8; 4]>::try_from(row.descriptor.as_slice()).map_err(|_| {
                    ASError::Validation(format!(
                        "descriptor must be 4 bytes, got {}",
                        row.descriptor.len()
                    ))
                })?;
                Command::FragSessionSetupReq(FragSessionSetupReq {
                    frag_index,
                    mc_group_bit_mask: row.mc_group_ids.bit_mask(),
                    nb_frag: u16::try_from(row.nb_frag)?,
                    frag_size: u8::try_from(row.frag_size)?,
                    fragmentation_matrix: u8::try_from(row.fragmentation_matrix)?,
                    block_ack_delay: u8::try_from(row.block_ack_delay)?,
                    padding: u8::try_from(row.padding)?,
                    descriptor,
                })
            }
            RemoteCommandState::Delete => {
                Command::FragSessionDeleteReq(FragSessionDeleteReq { frag_index })
            }
        };
        let dev_eui = EUI64::from_slice(&row.dev_eui)?;
        self.dispatcher
            .enqueue_in(db, dev_eui, false, self.f_port, &encode_commands(&[cmd])?)
            .await?;
        Ok(())
    }

    async fn schedule_retry(
        &self,
        row: Self::Row,
        now: DateTime<Utc>,
        db: &DatabaseTransaction,
    ) -> ASResult<()> {
        RemoteFragmentationSessionRepository::schedule_retry(row, now, db).await?;
        Ok(())
    }
}
