//! Application layer clock synchronization package (package identifier 1, version 1).
use super::{take, u32_le, PackageVersionAns};
use crate::{LoRaWANError, LoRaWANResult};

pub const PACKAGE_IDENTIFIER: u8 = 1;
pub const PACKAGE_VERSION: u8 = 1;
pub const DEFAULT_FPORT: u8 = 202;

pub const CID_PACKAGE_VERSION: u8 = 0x00;
pub const CID_APP_TIME: u8 = 0x01;
pub const CID_DEVICE_APP_TIME_PERIODICITY: u8 = 0x02;
pub const CID_FORCE_DEVICE_RESYNC: u8 = 0x03;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppTimeReq {
    /// Device GPS time in seconds (mod 2^32).
    pub device_time: u32,
    pub ans_required: bool,
    pub token_req: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppTimeAns {
    pub time_correction: i32,
    pub token_ans: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceAppTimePeriodicityReq {
    /// Requested periodicity is 128 * 2^period seconds.
    pub period: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceAppTimePeriodicityAns {
    pub not_supported: bool,
    pub time: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForceDeviceResyncReq {
    pub nb_transmissions: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    PackageVersionReq,
    PackageVersionAns(PackageVersionAns),
    AppTimeReq(AppTimeReq),
    AppTimeAns(AppTimeAns),
    DeviceAppTimePeriodicityReq(DeviceAppTimePeriodicityReq),
    DeviceAppTimePeriodicityAns(DeviceAppTimePeriodicityAns),
    ForceDeviceResyncReq(ForceDeviceResyncReq),
}

impl Command {
    pub fn cid(&self) -> u8 {
        match self {
            Command::PackageVersionReq | Command::PackageVersionAns(_) => CID_PACKAGE_VERSION,
            Command::AppTimeReq(_) | Command::AppTimeAns(_) => CID_APP_TIME,
            Command::DeviceAppTimePeriodicityReq(_) | Command::DeviceAppTimePeriodicityAns(_) => {
                CID_DEVICE_APP_TIME_PERIODICITY
            }
            Command::ForceDeviceResyncReq(_) => CID_FORCE_DEVICE_RESYNC,
        }
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.push(self.cid());
        match self {
            Command::PackageVersionReq => {}
            Command::PackageVersionAns(p) => {
                out.push(p.package_identifier);
                out.push(p.package_version);
            }
            Command::AppTimeReq(p) => {
                out.extend_from_slice(&p.device_time.to_le_bytes());
                out.push((p.ans_required as u8) << 4 | (p.token_req & 0x0f));
            }
            Command::AppTimeAns(p) => {
                out.extend_from_slice(&p.time_correction.to_le_bytes());
                out.push(p.token_ans & 0x0f);
            }
            Command::DeviceAppTimePeriodicityReq(p) => out.push(p.period & 0x0f),
            Command::DeviceAppTimePeriodicityAns(p) => {
                out.push(p.not_supported as u8);
                out.extend_from_slice(&p.time.to_le_bytes());
            }
            Command::ForceDeviceResyncReq(p) => out.push(p.nb_transmissions & 0x07),
        }
    }
}

pub fn encode_commands(cmds: &[Command]) -> Vec<u8> {
    let mut out = Vec::new();
    for c in cmds {
        c.encode_into(&mut out);
    }
    out
}

pub fn decode_commands(uplink: bool, b: &[u8]) -> LoRaWANResult<Vec<Command>> {
    let mut pos = 0;
    let mut out = Vec::new();
    while pos < b.len() {
        let cid = b[pos];
        pos += 1;
        let cmd = match (cid, uplink) {
            (CID_PACKAGE_VERSION, false) => Command::PackageVersionReq,
            (CID_PACKAGE_VERSION, true) => {
                let p = take(b, &mut pos, 2)?;
                Command::PackageVersionAns(PackageVersionAns {
                    package_identifier: p[0],
                    package_version: p[1],
                })
            }
            (CID_APP_TIME, true) => {
                let p = take(b, &mut pos, 5)?;
                Command::AppTimeReq(AppTimeReq {
                    device_time: u32_le(&p[0..4]),
                    ans_required: p[4] & 0x10 != 0,
                    token_req: p[4] & 0x0f,
                })
            }
            (CID_APP_TIME, false) => {
                let p = take(b, &mut pos, 5)?;
                Command::AppTimeAns(AppTimeAns {
                    time_correction: i32::from_le_bytes([p[0], p[1], p[2], p[3]]),
                    token_ans: p[4] & 0x0f,
                })
            }
            (CID_DEVICE_APP_TIME_PERIODICITY, false) => {
                Command::DeviceAppTimePeriodicityReq(DeviceAppTimePeriodicityReq {
                    period: take(b, &mut pos, 1)?[0] & 0x0f,
                })
            }
            (CID_DEVICE_APP_TIME_PERIODICITY, true) => {
                let p = take(b, &mut pos, 5)?;
                Command::DeviceAppTimePeriodicityAns(DeviceAppTimePeriodicityAns {
                    not_supported: p[0] & 0x01 != 0,
                    time: u32_le(&p[1..5]),
                })
            }
            (CID_FORCE_DEVICE_RESYNC, false) => Command::ForceDeviceResyncReq(ForceDeviceResyncReq {
                nb_transmissions: take(b, &mut pos, 1)?[0] & 0x07,
            }),
            (cid, _) => return Err(LoRaWANError::UnknownCommand { cid }),
        };
        out.push(cmd);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_time_req_from_device() {
        let cmds = decode_commands(true, &[0x01, 0x10, 0x00, 0x00, 0x00, 0x13]).unwrap();
        assert_eq!(
            cmds,
            vec![Command::AppTimeReq(AppTimeReq {
                device_time: 16,
                ans_required: true,
                token_req: 3,
            })]
        );
    }

    #[test]
    fn app_time_ans_negative_correction() {
        let b = encode_commands(&[Command::AppTimeAns(AppTimeAns {
            time_correction: -2,
            token_ans: 3,
        })]);
        assert_eq!(b, vec![0x01, 0xfe, 0xff, 0xff, 0xff, 0x03]);
    }
}
