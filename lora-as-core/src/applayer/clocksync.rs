use crate::downlink::DownlinkDispatcher;
use chrono::{DateTime, Utc};
use lora_as_error::ASResult;
use lora_as_lorawan::{
    applayer::clocksync::{
        decode_commands, encode_commands, AppTimeAns, AppTimeReq, Command,
        DeviceAppTimePeriodicityReq, ForceDeviceResyncReq,
    },
    gps::gps_seconds_u32,
    EUI64,
};
use sea_orm::ConnectionTrait;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Answers device time requests and issues periodicity / resync commands.
pub struct ClockSync {
    dispatcher: Arc<DownlinkDispatcher>,
    f_port: u8,
}

impl ClockSync {
    pub fn new(dispatcher: Arc<DownlinkDispatcher>, f_port: u8) -> Self {
        Self { dispatcher, f_port }
    }

    #[inline]
    pub fn f_port(&self) -> u8 {
        self.f_port
    }

    #[instrument(name = "clock-sync-uplink", skip(self, db, b), fields(dev_eui = %dev_eui))]
    pub async fn handle_command<C>(
        &self,
        db: &C,
        dev_eui: EUI64,
        b: &[u8],
        now: DateTime<Utc>,
    ) -> ASResult<()>
    where
        C: ConnectionTrait,
    {
        for cmd in decode_commands(true, b)? {
            match cmd {
                Command::AppTimeReq(req) => {
                    let ans = app_time_ans(&req, now);
                    debug!(
                        device_time = req.device_time,
                        time_correction = ans.time_correction,
                        "Answering AppTimeReq"
                    );
                    self.dispatcher
                        .enqueue_in(
                            db,
                            dev_eui,
                            false,
                            self.f_port,
                            &encode_commands(&[Command::AppTimeAns(ans)]),
                        )
                        .await?;
                }
                Command::DeviceAppTimePeriodicityAns(ans) => {
                    info!(not_supported = ans.not_supported, time = ans.time, "DeviceAppTimePeriodicityAns received");
                }
                Command::PackageVersionAns(ans) => {
                    info!(
                        package_identifier = ans.package_identifier,
                        package_version = ans.package_version,
                        "PackageVersionAns received"
                    );
                }
                other => {
                    warn!(cid = other.cid(), "Unexpected clock-sync command in uplink");
                }
            }
        }
        Ok(())
    }

    /// Asks the device to send `AppTimeReq` every 128 * 2^period seconds.
    pub async fn request_periodicity(&self, dev_eui: EUI64, period: u8) -> ASResult<u32> {
        let cmd = Command::DeviceAppTimePeriodicityReq(DeviceAppTimePeriodicityReq { period });
        self.dispatcher
            .enqueue(dev_eui, false, self.f_port, &encode_commands(&[cmd]))
            .await
    }

    /// Asks the device to resynchronize, sending up to `nb_transmissions`
    /// `AppTimeReq` uplinks.
    pub async fn force_resync(&self, dev_eui: EUI64, nb_transmissions: u8) -> ASResult<u32> {
        let cmd = Command::ForceDeviceResyncReq(ForceDeviceResyncReq { nb_transmissions });
        self.dispatcher
            .enqueue(dev_eui, false, self.f_port, &encode_commands(&[cmd]))
            .await
    }
}

/// Device time is GPS seconds mod 2^32, the correction wraps accordingly.
fn app_time_ans(req: &AppTimeReq, now: DateTime<Utc>) -> AppTimeAns {
    AppTimeAns {
        time_correction: gps_seconds_u32(now).wrapping_sub(req.device_time) as i32,
        token_ans: req.token_req,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn correction_is_network_minus_device_time() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let network = gps_seconds_u32(now);

        let ans = app_time_ans(
            &AppTimeReq {
                device_time: network - 30,
                ans_required: true,
                token_req: 3,
            },
            now,
        );
        assert_eq!(ans.time_correction, 30);
        assert_eq!(ans.token_ans, 3);

        let ans = app_time_ans(
            &AppTimeReq {
                device_time: network + 5,
                ans_required: false,
                token_req: 0,
            },
            now,
        );
        assert_eq!(ans.time_correction, -5);
    }
}
