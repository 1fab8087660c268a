//! Remote multicast setup package (package identifier 2, version 1).
use super::{take, u24_le, u32_le, PackageVersionAns};
use crate::{AES128Key, DevAddr, LoRaWANError, LoRaWANResult};

pub const PACKAGE_IDENTIFIER: u8 = 2;
pub const PACKAGE_VERSION: u8 = 1;
pub const DEFAULT_FPORT: u8 = 200;

pub const CID_PACKAGE_VERSION: u8 = 0x00;
pub const CID_MC_GROUP_STATUS: u8 = 0x01;
pub const CID_MC_GROUP_SETUP: u8 = 0x02;
pub const CID_MC_GROUP_DELETE: u8 = 0x03;
pub const CID_MC_CLASS_C_SESSION: u8 = 0x04;
pub const CID_MC_CLASS_B_SESSION: u8 = 0x05;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct McGroupStatusReq {
    pub req_group_mask: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct McGroupStatusAns {
    pub nb_total_groups: u8,
    pub ans_group_mask: u8,
    /// (McGroupID, McAddr) for every group flagged in `ans_group_mask`.
    pub items: Vec<(u8, DevAddr)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct McGroupSetupReq {
    pub mc_group_id: u8,
    pub mc_addr: DevAddr,
    pub mc_key_encrypted: AES128Key,
    pub min_mc_f_cnt: u32,
    pub max_mc_f_cnt: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct McGroupSetupAns {
    pub mc_group_id: u8,
    pub id_error: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct McGroupDeleteReq {
    pub mc_group_id: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct McGroupDeleteAns {
    pub mc_group_id: u8,
    pub mc_group_undefined: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct McClassCSessionReq {
    pub mc_group_id: u8,
    /// GPS seconds (mod 2^32) at which the session starts.
    pub session_time: u32,
    /// Session lasts 2^time_out seconds.
    pub time_out: u8,
    /// Frequency in Hz; transmitted in 100 Hz steps.
    pub dl_frequency: u32,
    pub dr: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct McClassBSessionReq {
    pub mc_group_id: u8,
    pub session_time: u32,
    /// Session lasts 2^time_out beacon periods.
    pub time_out: u8,
    /// Ping slot every 2^periodicity seconds, 0..=7.
    pub periodicity: u8,
    pub dl_frequency: u32,
    pub dr: u8,
}

/// Class-B ping-slot period, in 30 ms slots, for a periodicity of 0..=7.
pub fn ping_slot_period(periodicity: u8) -> LoRaWANResult<u32> {
    if periodicity > 7 {
        return Err(LoRaWANError::InvalidField(format!(
            "ping-slot periodicity {periodicity} outside 0..=7"
        )));
    }
    Ok(1 << (5 + u32::from(periodicity)))
}

/// Inverse of [`ping_slot_period`]. Only the eight periods 32, 64, .., 4096
/// have a periodicity.
pub fn ping_slot_periodicity(period: u32) -> LoRaWANResult<u8> {
    if !period.is_power_of_two() || !(32..=4096).contains(&period) {
        return Err(LoRaWANError::InvalidField(format!(
            "ping-slot period {period} is not one of 32, 64, .., 4096 slots"
        )));
    }
    // 32 = 2^5
    Ok((period.trailing_zeros() - 5) as u8)
}

/// Answer shared by class-B and class-C session requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct McSessionAns {
    pub mc_group_id: u8,
    pub dr_error: bool,
    pub freq_error: bool,
    pub mc_group_undefined: bool,
    /// Present only when no error flag is set.
    pub time_to_start: Option<u32>,
}

impl McSessionAns {
    #[inline]
    pub fn has_error(&self) -> bool {
        self.dr_error || self.freq_error || self.mc_group_undefined
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    PackageVersionReq,
    PackageVersionAns(PackageVersionAns),
    McGroupStatusReq(McGroupStatusReq),
    McGroupStatusAns(McGroupStatusAns),
    McGroupSetupReq(McGroupSetupReq),
    McGroupSetupAns(McGroupSetupAns),
    McGroupDeleteReq(McGroupDeleteReq),
    McGroupDeleteAns(McGroupDeleteAns),
    McClassCSessionReq(McClassCSessionReq),
    McClassCSessionAns(McSessionAns),
    McClassBSessionReq(McClassBSessionReq),
    McClassBSessionAns(McSessionAns),
}

impl Command {
    pub fn cid(&self) -> u8 {
        match self {
            Command::PackageVersionReq | Command::PackageVersionAns(_) => CID_PACKAGE_VERSION,
            Command::McGroupStatusReq(_) | Command::McGroupStatusAns(_) => CID_MC_GROUP_STATUS,
            Command::McGroupSetupReq(_) | Command::McGroupSetupAns(_) => CID_MC_GROUP_SETUP,
            Command::McGroupDeleteReq(_) | Command::McGroupDeleteAns(_) => CID_MC_GROUP_DELETE,
            Command::McClassCSessionReq(_) | Command::McClassCSessionAns(_) => {
                CID_MC_CLASS_C_SESSION
            }
            Command::McClassBSessionReq(_) | Command::McClassBSessionAns(_) => {
                CID_MC_CLASS_B_SESSION
            }
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
            Command::McGroupStatusReq(p) => out.push(p.req_group_mask & 0x0f),
            Command::McGroupStatusAns(p) => {
                out.push((p.nb_total_groups & 0x07) << 4 | (p.ans_group_mask & 0x0f));
                for (id, addr) in &p.items {
                    out.push(*id & 0x03);
                    out.extend_from_slice(&addr.to_le_bytes());
                }
            }
            Command::McGroupSetupReq(p) => {
                out.push(p.mc_group_id & 0x03);
                out.extend_from_slice(&p.mc_addr.to_le_bytes());
                out.extend_from_slice(&p.mc_key_encrypted.0);
                out.extend_from_slice(&p.min_mc_f_cnt.to_le_bytes());
                out.extend_from_slice(&p.max_mc_f_cnt.to_le_bytes());
            }
            Command::McGroupSetupAns(p) => {
                out.push((p.id_error as u8) << 2 | (p.mc_group_id & 0x03));
            }
            Command::McGroupDeleteReq(p) => out.push(p.mc_group_id & 0x03),
            Command::McGroupDeleteAns(p) => {
                out.push((p.mc_group_undefined as u8) << 2 | (p.mc_group_id & 0x03));
            }
            Command::McClassCSessionReq(p) => {
                out.push(p.mc_group_id & 0x03);
                out.extend_from_slice(&p.session_time.to_le_bytes());
                out.push(p.time_out & 0x0f);
                out.extend_from_slice(&(p.dl_frequency / 100).to_le_bytes()[..3]);
                out.push(p.dr);
            }
            Command::McClassBSessionReq(p) => {
                out.push(p.mc_group_id & 0x03);
                out.extend_from_slice(&p.session_time.to_le_bytes());
                out.push((p.periodicity & 0x07) << 4 | (p.time_out & 0x0f));
                out.extend_from_slice(&(p.dl_frequency / 100).to_le_bytes()[..3]);
                out.push(p.dr);
            }
            Command::McClassCSessionAns(p) | Command::McClassBSessionAns(p) => {
                out.push(
                    (p.mc_group_undefined as u8) << 4
                        | (p.freq_error as u8) << 3
                        | (p.dr_error as u8) << 2
                        | (p.mc_group_id & 0x03),
                );
                if let Some(t) = p.time_to_start {
                    out.extend_from_slice(&t.to_le_bytes()[..3]);
                }
            }
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

fn decode_session_ans(b: &[u8], pos: &mut usize) -> LoRaWANResult<McSessionAns> {
    let s = take(b, pos, 1)?[0];
    let mut ans = McSessionAns {
        mc_group_id: s & 0x03,
        dr_error: s & 0x04 != 0,
        freq_error: s & 0x08 != 0,
        mc_group_undefined: s & 0x10 != 0,
        time_to_start: None,
    };
    if !ans.has_error() {
        ans.time_to_start = Some(u24_le(take(b, pos, 3)?));
    }
    Ok(ans)
}

/// Decodes the commands of a payload. `uplink` selects answer (device to
/// server) or request (server to device) layouts.
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
            (CID_MC_GROUP_STATUS, false) => Command::McGroupStatusReq(McGroupStatusReq {
                req_group_mask: take(b, &mut pos, 1)?[0] & 0x0f,
            }),
            (CID_MC_GROUP_STATUS, true) => {
                let s = take(b, &mut pos, 1)?[0];
                let mask = s & 0x0f;
                let mut items = Vec::new();
                for _ in 0..mask.count_ones() {
                    let p = take(b, &mut pos, 5)?;
                    items.push((p[0] & 0x03, DevAddr::from_le_slice(&p[1..5])?));
                }
                Command::McGroupStatusAns(McGroupStatusAns {
                    nb_total_groups: (s >> 4) & 0x07,
                    ans_group_mask: mask,
                    items,
                })
            }
            (CID_MC_GROUP_SETUP, false) => {
                let p = take(b, &mut pos, 29)?;
                Command::McGroupSetupReq(McGroupSetupReq {
                    mc_group_id: p[0] & 0x03,
                    mc_addr: DevAddr::from_le_slice(&p[1..5])?,
                    mc_key_encrypted: AES128Key::from_slice(&p[5..21])?,
                    min_mc_f_cnt: u32_le(&p[21..25]),
                    max_mc_f_cnt: u32_le(&p[25..29]),
                })
            }
            (CID_MC_GROUP_SETUP, true) => {
                let s = take(b, &mut pos, 1)?[0];
                Command::McGroupSetupAns(McGroupSetupAns {
                    mc_group_id: s & 0x03,
                    id_error: s & 0x04 != 0,
                })
            }
            (CID_MC_GROUP_DELETE, false) => Command::McGroupDeleteReq(McGroupDeleteReq {
                mc_group_id: take(b, &mut pos, 1)?[0] & 0x03,
            }),
            (CID_MC_GROUP_DELETE, true) => {
                let s = take(b, &mut pos, 1)?[0];
                Command::McGroupDeleteAns(McGroupDeleteAns {
                    mc_group_id: s & 0x03,
                    mc_group_undefined: s & 0x04 != 0,
                })
            }
            (CID_MC_CLASS_C_SESSION, false) => {
                let p = take(b, &mut pos, 10)?;
                Command::McClassCSessionReq(McClassCSessionReq {
                    mc_group_id: p[0] & 0x03,
                    session_time: u32_le(&p[1..5]),
                    time_out: p[5] & 0x0f,
                    dl_frequency: u24_le(&p[6..9]) * 100,
                    dr: p[9],
                })
            }
            (CID_MC_CLASS_C_SESSION, true) => {
                Command::McClassCSessionAns(decode_session_ans(b, &mut pos)?)
            }
            (CID_MC_CLASS_B_SESSION, false) => {
                let p = take(b, &mut pos, 10)?;
                Command::McClassBSessionReq(McClassBSessionReq {
                    mc_group_id: p[0] & 0x03,
                    session_time: u32_le(&p[1..5]),
                    time_out: p[5] & 0x0f,
                    periodicity: (p[5] >> 4) & 0x07,
                    dl_frequency: u24_le(&p[6..9]) * 100,
                    dr: p[9],
                })
            }
            (CID_MC_CLASS_B_SESSION, true) => {
                Command::McClassBSessionAns(decode_session_ans(b, &mut pos)?)
            }
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
    fn group_setup_req_is_29_bytes_plus_cid() {
        let cmd = Command::McGroupSetupReq(McGroupSetupReq {
            mc_group_id: 0,
            mc_addr: DevAddr([1, 2, 3, 4]),
            mc_key_encrypted: AES128Key([9; 16]),
            min_mc_f_cnt: 0,
            max_mc_f_cnt: u32::MAX,
        });
        let b = encode_commands(std::slice::from_ref(&cmd));
        assert_eq!(b.len(), 30);
        assert_eq!(&b[0..6], &[0x02, 0x00, 4, 3, 2, 1]);
        assert_eq!(decode_commands(false, &b).unwrap(), vec![cmd]);
    }

    #[test]
    fn class_c_session_req_layout() {
        let cmd = Command::McClassCSessionReq(McClassCSessionReq {
            mc_group_id: 0,
            session_time: 0x01020304,
            time_out: 8,
            dl_frequency: 868_100_000,
            dr: 5,
        });
        let b = encode_commands(&[cmd]);
        assert_eq!(b.len(), 11);
        assert_eq!(&b[2..6], &[4, 3, 2, 1]);
        assert_eq!(b[6], 8);
        assert_eq!(b[10], 5);
    }

    #[test]
    fn ping_slot_period_and_periodicity() {
        assert_eq!(ping_slot_period(0).unwrap(), 32);
        assert_eq!(ping_slot_period(7).unwrap(), 4096);
        assert!(ping_slot_period(8).is_err());

        assert_eq!(ping_slot_periodicity(32).unwrap(), 0);
        assert_eq!(ping_slot_periodicity(128).unwrap(), 2);
        assert_eq!(ping_slot_periodicity(4096).unwrap(), 7);
        for bad in [0, 16, 33, 8192] {
            assert!(ping_slot_periodicity(bad).is_err(), "period {bad}");
        }
    }

    #[test]
    fn session_ans_time_to_start_only_without_error() {
        let ok = decode_commands(true, &[0x04, 0x00, 0x10, 0x00, 0x00]).unwrap();
        assert_eq!(
            ok,
            vec![Command::McClassCSessionAns(McSessionAns {
                mc_group_id: 0,
                dr_error: false,
                freq_error: false,
                mc_group_undefined: false,
                time_to_start: Some(16),
            })]
        );

        let err = decode_commands(true, &[0x04, 0x08]).unwrap();
        match &err[0] {
            Command::McClassCSessionAns(a) => {
                assert!(a.freq_error);
                assert!(a.has_error());
                assert_eq!(a.time_to_start, None);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn status_ans_with_two_groups_and_setup_ans_in_one_payload() {
        let b = [
            0x01, 0x23, 0x00, 4, 3, 2, 1, 0x01, 8, 7, 6, 5, // status ans, mask 0b0011
            0x02, 0x04, // setup ans id error on group 0
        ];
        let cmds = decode_commands(true, &b).unwrap();
        assert_eq!(cmds.len(), 2);
        match &cmds[0] {
            Command::McGroupStatusAns(s) => {
                assert_eq!(s.nb_total_groups, 2);
                assert_eq!(s.items[1], (1, DevAddr([5, 6, 7, 8])));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            cmds[1],
            Command::McGroupSetupAns(McGroupSetupAns {
                mc_group_id: 0,
                id_error: true
            })
        );
    }

    #[test]
    fn unknown_cid_is_rejected() {
        assert_eq!(
            decode_commands(true, &[0x7f]),
            Err(LoRaWANError::UnknownCommand { cid: 0x7f })
        );
    }
}
