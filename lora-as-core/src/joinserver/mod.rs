//! Join-server: answers join and rejoin requests forwarded by network-servers.
//!
//! Each request runs in one transaction holding the device-keys row, so the
//! JoinNonce increment and the persisted activation commit together. Every
//! failure is reported inside the answer's `Result`, never as a transport
//! error.
pub mod messages;

use chrono::Utc;
use lora_as_error::{storage::StorageError, ASError, ASResult};
use lora_as_lorawan::{
    crypto::wrap_key,
    keys::{derive_session_keys, js_enc_key, js_int_key, SessionContext, SessionKeys},
    phy::{DLSettings, JoinAcceptMic, JoinAcceptPayload, JoinType, PhyPayload, RejoinRequestPayload},
    AES128Key, EUI64, NetID,
};
use lora_as_models::{
    constants::MAX_JOIN_NONCE, entities::prelude::DeviceActivationActiveModel,
    settings::JoinServer as JoinServerSettings,
};
use lora_as_repository::{DeviceActivationRepository, DeviceKeysRepository};
use messages::{
    BackendRequest, JoinAnsPayload, JoinReqPayload, KeyEnvelope, MessageType, RejoinReqPayload,
    ResultCode,
};
use sea_orm::{DatabaseConnection, Set, TransactionTrait};
use tracing::{info, instrument, warn};

pub struct JoinServer {
    db: DatabaseConnection,
    settings: JoinServerSettings,
}

/// What the request asks for, resolved from its PHYPayload.
struct JoinContext {
    dev_eui: EUI64,
    join_eui: EUI64,
    dev_nonce: u16,
    join_type: JoinType,
    dl_settings: DLSettings,
    rejoin: bool,
}

impl JoinServer {
    pub fn new(db: DatabaseConnection, settings: JoinServerSettings) -> Self {
        Self { db, settings }
    }

    /// Dispatches on the request `MessageType`.
    pub async fn handle(&self, req: &BackendRequest) -> JoinAnsPayload {
        match req {
            BackendRequest::JoinReq(req) => self.handle_join(req).await,
            BackendRequest::RejoinReq(req) => self.handle_rejoin(req).await,
        }
    }

    #[instrument(name = "join-request", skip_all, fields(dev_eui = %req.dev_eui))]
    pub async fn handle_join(&self, req: &JoinReqPayload) -> JoinAnsPayload {
        match self.join(req).await {
            Ok(ans) => ans,
            Err(e) => error_answer(req, MessageType::JoinAns, e),
        }
    }

    #[instrument(name = "rejoin-request", skip_all, fields(dev_eui = %req.dev_eui))]
    pub async fn handle_rejoin(&self, req: &RejoinReqPayload) -> JoinAnsPayload {
        match self.rejoin(req).await {
            Ok(ans) => ans,
            Err(e) => error_answer(req, MessageType::RejoinAns, e),
        }
    }

    async fn join(&self, req: &JoinReqPayload) -> ASResult<JoinAnsPayload> {
        let phy = PhyPayload::decode(&req.phy_payload)?;
        let jr = phy.join_request()?;
        let ctx = JoinContext {
            dev_eui: jr.dev_eui,
            join_eui: jr.join_eui,
            dev_nonce: jr.dev_nonce,
            join_type: JoinType::Join,
            dl_settings: dl_settings(req)?,
            rejoin: false,
        };
        self.accept(req, ctx, MessageType::JoinAns, Some(&phy)).await
    }

    async fn rejoin(&self, req: &RejoinReqPayload) -> ASResult<JoinAnsPayload> {
        let phy = PhyPayload::decode(&req.phy_payload)?;
        let rj = phy.rejoin_request()?;
        // type 0 and 2 frames do not carry the JoinEUI
        let join_eui = match &rj {
            RejoinRequestPayload::Type1 { join_eui, .. } => *join_eui,
            RejoinRequestPayload::Type02 { .. } => req
                .receiver_id
                .parse()
                .map_err(|e| ASError::Validation(format!("invalid ReceiverID: {e}")))?,
        };
        let ctx = JoinContext {
            dev_eui: rj.dev_eui(),
            join_eui,
            dev_nonce: rj.rj_count(),
            join_type: JoinType::for_rejoin(rj.rejoin_type())?,
            dl_settings: dl_settings(req)?,
            rejoin: true,
        };
        self.accept(req, ctx, MessageType::RejoinAns, None).await
    }

    /// Shared tail of join and rejoin handling. The uplink MIC is checked
    /// against the NwkKey when `join_request` is given.
    async fn accept(
        &self,
        req: &JoinReqPayload,
        ctx: JoinContext,
        message_type: MessageType,
        join_request: Option<&PhyPayload>,
    ) -> ASResult<JoinAnsPayload> {
        let net_id: NetID = req
            .sender_id
            .parse()
            .map_err(|e| ASError::Validation(format!("invalid SenderID: {e}")))?;
        let cf_list = cf_list(req)?;

        let txn = self.db.begin().await?;
        let keys = DeviceKeysRepository::find_for_update(ctx.dev_eui.as_bytes(), &txn)
            .await?
            .ok_or_else(|| ASError::NotFound(format!("device-keys for {}", ctx.dev_eui)))?;
        let nwk_key = AES128Key::from_slice(&keys.nwk_key)?;
        let app_key = optional_key(&keys.app_key)?;

        if let Some(phy) = join_request {
            if !phy.validate_mic(&nwk_key)? {
                return Err(ASError::Auth("invalid join-request MIC".into()));
            }
        }

        let join_nonce = next_join_nonce(keys.join_nonce)?;
        let session = derive_session_keys(
            &SessionContext {
                opt_neg: ctx.dl_settings.opt_neg,
                net_id,
                join_eui: ctx.join_eui,
                join_nonce,
                dev_nonce: ctx.dev_nonce,
            },
            &nwk_key,
            &app_key,
        );

        let accept = JoinAcceptPayload {
            join_nonce,
            home_net_id: net_id,
            dev_addr: req.dev_addr,
            dl_settings: ctx.dl_settings,
            rx_delay: req.rx_delay,
            cf_list,
        };
        let js_int_key = js_int_key(&nwk_key, &ctx.dev_eui);
        let mic = if ctx.dl_settings.opt_neg {
            JoinAcceptMic::OptNeg {
                js_int_key: &js_int_key,
                join_type: ctx.join_type,
                join_eui: ctx.join_eui,
                dev_nonce: ctx.dev_nonce,
            }
        } else {
            JoinAcceptMic::Legacy { nwk_key: &nwk_key }
        };
        // rejoin-accepts are always encrypted with the JSEncKey
        let enc_key = if ctx.dl_settings.opt_neg || ctx.rejoin {
            js_enc_key(&nwk_key, &ctx.dev_eui)
        } else {
            nwk_key
        };
        let phy = accept.to_phy(mic, &enc_key)?;

        let mut ans = JoinAnsPayload::reply_to(req, message_type);
        ans.phy_payload = Some(phy);
        self.set_session_keys(&mut ans, &session, ctx.dl_settings.opt_neg || ctx.rejoin)?;

        DeviceKeysRepository::set_join_nonce(keys, i32::try_from(join_nonce)?, &txn).await?;
        DeviceActivationRepository::create(
            DeviceActivationActiveModel {
                dev_eui: Set(ctx.dev_eui.to_vec()),
                dev_addr: Set(req.dev_addr.to_vec()),
                app_s_key: Set(session.app_s_key.to_vec()),
                nwk_s_key: Set(session.f_nwk_s_int_key.to_vec()),
                created_at: Set(Utc::now()),
                ..Default::default()
            },
            &txn,
        )
        .await?;
        txn.commit().await?;

        info!(join_nonce, opt_neg = ctx.dl_settings.opt_neg, dev_addr = %req.dev_addr, "Device activated");
        Ok(ans)
    }

    /// `split_keys` answers with the three LoRaWAN 1.1 network keys instead
    /// of the single NwkSKey.
    fn set_session_keys(
        &self,
        ans: &mut JoinAnsPayload,
        keys: &SessionKeys,
        split_keys: bool,
    ) -> ASResult<()> {
        // the NS keys are wrapped for the requesting network, the AppSKey for us
        let ns_label = ans.receiver_id.clone();
        if split_keys {
            ans.f_nwk_s_int_key = Some(self.key_envelope(&ns_label, &keys.f_nwk_s_int_key)?);
            ans.s_nwk_s_int_key = Some(self.key_envelope(&ns_label, &keys.s_nwk_s_int_key)?);
            ans.nwk_s_enc_key = Some(self.key_envelope(&ns_label, &keys.nwk_s_enc_key)?);
        } else {
            ans.nwk_s_key = Some(self.key_envelope(&ns_label, &keys.f_nwk_s_int_key)?);
        }
        ans.app_s_key = Some(self.key_envelope(&self.settings.as_kek_label, &keys.app_s_key)?);
        Ok(())
    }

    fn key_envelope(&self, label: &str, key: &AES128Key) -> ASResult<KeyEnvelope> {
        match self.settings.kek_for_label(label) {
            Some(set) => {
                let kek = hex::decode(&set.kek)
                    .map_err(|e| ASError::Validation(format!("invalid KEK '{}': {e}", set.label)))?;
                Ok(KeyEnvelope {
                    kek_label: set.label.clone(),
                    aes_key: wrap_key(&kek, key)?,
                })
            }
            None => Ok(KeyEnvelope {
                kek_label: String::new(),
                aes_key: key.to_vec(),
            }),
        }
    }
}

fn error_answer(req: &JoinReqPayload, message_type: MessageType, e: ASError) -> JoinAnsPayload {
    let code = match &e {
        ASError::NotFound(_) | ASError::StorageError(StorageError::EntityNotFound(_)) => {
            ResultCode::UnknownDevEUI
        }
        ASError::Auth(_) => ResultCode::MICFailed,
        _ => ResultCode::Other,
    };
    warn!(error = %e, result_code = ?code, "Join request rejected");
    JoinAnsPayload::failure(req, message_type, code, e.to_string())
}

fn next_join_nonce(current: i32) -> ASResult<u32> {
    let current = u32::try_from(current)?;
    if current >= MAX_JOIN_NONCE {
        return Err(ASError::Fatal(format!("JoinNonce overflow (current {current})")));
    }
    Ok(current + 1)
}

fn dl_settings(req: &JoinReqPayload) -> ASResult<DLSettings> {
    match req.dl_settings.as_slice() {
        [b] => Ok(DLSettings::from_byte(*b)),
        other => Err(ASError::Validation(format!(
            "DLSettings must be one byte, got {}",
            other.len()
        ))),
    }
}

fn cf_list(req: &JoinReqPayload) -> ASResult<Option<[u8; 16]>> {
    match &req.cf_list {
        None => Ok(None),
        Some(b) => <[u8; 16]>::try_from(b.as_slice())
            .map(Some)
            .map_err(|_| ASError::Validation(format!("CFList must be 16 bytes, got {}", b.len()))),
    }
}

/// LoRaWAN 1.0.x devices have no AppKey stored next to the NwkKey.
fn optional_key(b: &[u8]) -> ASResult<AES128Key> {
    if b.is_empty() {
        return Ok(AES128Key::default());
    }
    Ok(AES128Key::from_slice(b)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_nonce_stops_at_24_bits() {
        assert_eq!(next_join_nonce(65535).unwrap(), 65536);
        assert!(matches!(
            next_join_nonce(MAX_JOIN_NONCE as i32),
            Err(ASError::Fatal(_))
        ));
    }
}
