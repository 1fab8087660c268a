//! Fragmented data block transport package (package identifier 3, version 1)
//! and its forward error correction codec.
use super::{take, PackageVersionAns};
use crate::{LoRaWANError, LoRaWANResult};

pub const PACKAGE_IDENTIFIER: u8 = 3;
pub const PACKAGE_VERSION: u8 = 1;
pub const DEFAULT_FPORT: u8 = 201;

pub const CID_PACKAGE_VERSION: u8 = 0x00;
pub const CID_FRAG_SESSION_STATUS: u8 = 0x01;
pub const CID_FRAG_SESSION_SETUP: u8 = 0x02;
pub const CID_FRAG_SESSION_DELETE: u8 = 0x03;
pub const CID_DATA_FRAGMENT: u8 = 0x08;

/// Largest fragment number the 14-bit `N` field of a DataFragment can carry.
pub const MAX_FRAGMENT_NUMBER: u16 = 0x3fff;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragSessionStatusReq {
    pub frag_index: u8,
    pub participants: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragSessionStatusAns {
    pub frag_index: u8,
    pub nb_frag_received: u16,
    pub missing_frag: u8,
    pub not_enough_matrix_memory: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragSessionSetupReq {
    pub frag_index: u8,
    /// Bit `n` set means the session is bound to multicast group `n`.
    pub mc_group_bit_mask: u8,
    pub nb_frag: u16,
    pub frag_size: u8,
    pub fragmentation_matrix: u8,
    pub block_ack_delay: u8,
    pub padding: u8,
    pub descriptor: [u8; 4],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragSessionSetupAns {
    pub frag_index: u8,
    pub wrong_descriptor: bool,
    pub frag_session_index_not_supported: bool,
    pub not_enough_memory: bool,
    pub encoding_unsupported: bool,
}

impl FragSessionSetupAns {
    pub fn has_error(&self) -> bool {
        self.wrong_descriptor
            || self.frag_session_index_not_supported
            || self.not_enough_memory
            || self.encoding_unsupported
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragSessionDeleteReq {
    pub frag_index: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragSessionDeleteAns {
    pub frag_index: u8,
    pub session_does_not_exist: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFragment {
    pub frag_index: u8,
    /// 1-based fragment number; values above NbFrag are coded fragments.
    pub n: u16,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    PackageVersionReq,
    PackageVersionAns(PackageVersionAns),
    FragSessionStatusReq(FragSessionStatusReq),
    FragSessionStatusAns(FragSessionStatusAns),
    FragSessionSetupReq(FragSessionSetupReq),
    FragSessionSetupAns(FragSessionSetupAns),
    FragSessionDeleteReq(FragSessionDeleteReq),
    FragSessionDeleteAns(FragSessionDeleteAns),
    DataFragment(DataFragment),
}

impl Command {
    pub fn cid(&self) -> u8 {
        match self {
            Command::PackageVersionReq | Command::PackageVersionAns(_) => CID_PACKAGE_VERSION,
            Command::FragSessionStatusReq(_) | Command::FragSessionStatusAns(_) => {
                CID_FRAG_SESSION_STATUS
            }
            Command::FragSessionSetupReq(_) | Command::FragSessionSetupAns(_) => {
                CID_FRAG_SESSION_SETUP
            }
            Command::FragSessionDeleteReq(_) | Command::FragSessionDeleteAns(_) => {
                CID_FRAG_SESSION_DELETE
            }
            Command::DataFragment(_) => CID_DATA_FRAGMENT,
        }
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) -> LoRaWANResult<()> {
        out.push(self.cid());
        match self {
            Command::PackageVersionReq => {}
            Command::PackageVersionAns(p) => {
                out.push(p.package_identifier);
                out.push(p.package_version);
            }
            Command::FragSessionStatusReq(p) => {
                out.push((p.frag_index & 0x03) << 1 | p.participants as u8);
            }
            Command::FragSessionStatusAns(p) => {
                let v = ((p.frag_index as u16 & 0x03) << 14) | (p.nb_frag_received & 0x3fff);
                out.extend_from_slice(&v.to_le_bytes());
                out.push(p.missing_frag);
                out.push(p.not_enough_matrix_memory as u8);
            }
            Command::FragSessionSetupReq(p) => {
                out.push((p.frag_index & 0x03) << 4 | (p.mc_group_bit_mask & 0x0f));
                out.extend_from_slice(&p.nb_frag.to_le_bytes());
                out.push(p.frag_size);
                out.push((p.fragmentation_matrix & 0x07) << 3 | (p.block_ack_delay & 0x07));
                out.push(p.padding);
                out.extend_from_slice(&p.descriptor);
            }
            Command::FragSessionSetupAns(p) => {
                out.push(
                    (p.frag_index & 0x03) << 6
                        | (p.wrong_descriptor as u8) << 3
                        | (p.frag_session_index_not_supported as u8) << 2
                        | (p.not_enough_memory as u8) << 1
                        | p.encoding_unsupported as u8,
                );
            }
            Command::FragSessionDeleteReq(p) => out.push(p.frag_index & 0x03),
            Command::FragSessionDeleteAns(p) => {
                out.push((p.session_does_not_exist as u8) << 2 | (p.frag_index & 0x03));
            }
            Command::DataFragment(p) => {
                if p.n == 0 || p.n > MAX_FRAGMENT_NUMBER {
                    return Err(LoRaWANError::InvalidField(format!(
                        "fragment number {} outside 1..={}",
                        p.n, MAX_FRAGMENT_NUMBER
                    )));
                }
                let v = ((p.frag_index as u16 & 0x03) << 14) | p.n;
                out.extend_from_slice(&v.to_le_bytes());
                out.extend_from_slice(&p.payload);
            }
        }
        Ok(())
    }
}

pub fn encode_commands(cmds: &[Command]) -> LoRaWANResult<Vec<u8>> {
    let mut out = Vec::new();
    for c in cmds {
        c.encode_into(&mut out)?;
    }
    Ok(out)
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
            (CID_FRAG_SESSION_STATUS, false) => {
                let s = take(b, &mut pos, 1)?[0];
                Command::FragSessionStatusReq(FragSessionStatusReq {
                    frag_index: (s >> 1) & 0x03,
                    participants: s & 0x01 != 0,
                })
            }
            (CID_FRAG_SESSION_STATUS, true) => {
                let p = take(b, &mut pos, 4)?;
                let v = u16::from_le_bytes([p[0], p[1]]);
                Command::FragSessionStatusAns(FragSessionStatusAns {
                    frag_index: (v >> 14) as u8,
                    nb_frag_received: v & 0x3fff,
                    missing_frag: p[2],
                    not_enough_matrix_memory: p[3] & 0x01 != 0,
                })
            }
            (CID_FRAG_SESSION_SETUP, false) => {
                let p = take(b, &mut pos, 10)?;
                Command::FragSessionSetupReq(FragSessionSetupReq {
                    frag_index: (p[0] >> 4) & 0x03,
                    mc_group_bit_mask: p[0] & 0x0f,
                    nb_frag: u16::from_le_bytes([p[1], p[2]]),
                    frag_size: p[3],
                    fragmentation_matrix: (p[4] >> 3) & 0x07,
                    block_ack_delay: p[4] & 0x07,
                    padding: p[5],
                    descriptor: [p[6], p[7], p[8], p[9]],
                })
            }
            (CID_FRAG_SESSION_SETUP, true) => {
                let s = take(b, &mut pos, 1)?[0];
                Command::FragSessionSetupAns(FragSessionSetupAns {
                    frag_index: s >> 6,
                    wrong_descriptor: s & 0x08 != 0,
                    frag_session_index_not_supported: s & 0x04 != 0,
                    not_enough_memory: s & 0x02 != 0,
                    encoding_unsupported: s & 0x01 != 0,
                })
            }
            (CID_FRAG_SESSION_DELETE, false) => Command::FragSessionDeleteReq(FragSessionDeleteReq {
                frag_index: take(b, &mut pos, 1)?[0] & 0x03,
            }),
            (CID_FRAG_SESSION_DELETE, true) => {
                let s = take(b, &mut pos, 1)?[0];
                Command::FragSessionDeleteAns(FragSessionDeleteAns {
                    frag_index: s & 0x03,
                    session_does_not_exist: s & 0x04 != 0,
                })
            }
            (CID_DATA_FRAGMENT, false) => {
                let p = take(b, &mut pos, 2)?;
                let v = u16::from_le_bytes([p[0], p[1]]);
                let payload = b[pos..].to_vec();
                pos = b.len();
                Command::DataFragment(DataFragment {
                    frag_index: (v >> 14) as u8,
                    n: v & 0x3fff,
                    payload,
                })
            }
            (cid, _) => return Err(LoRaWANError::UnknownCommand { cid }),
        };
        out.push(cmd);
    }
    Ok(out)
}

fn prbs23(x: u32) -> u32 {
    let b0 = x & 1;
    let b1 = (x & 32) / 32;
    (x / 2) + ((b0 ^ b1) << 22)
}

/// Row `n` (1-based) of the parity matrix for `m` uncoded fragments.
pub fn matrix_line(n: usize, m: usize) -> Vec<bool> {
    let mut line = vec![false; m];
    if m == 0 {
        return line;
    }
    let mm = usize::from(m.is_power_of_two());
    let mut x = 1 + 1001 * n as u32;
    for _ in 0..m / 2 {
        let mut r = 1usize << 16;
        while r >= m {
            x = prbs23(x);
            r = x as usize % (m + mm);
        }
        line[r] = true;
    }
    line
}

/// Splits `data` into `frag_size` fragments and appends `redundancy` coded
/// fragments. The data length must be a multiple of the fragment size.
pub fn encode(data: &[u8], frag_size: usize, redundancy: usize) -> LoRaWANResult<Vec<Vec<u8>>> {
    if frag_size == 0 || data.len() % frag_size != 0 {
        return Err(LoRaWANError::InvalidField(format!(
            "data length {} is not a multiple of fragment size {}",
            data.len(),
            frag_size
        )));
    }
    let mut rows: Vec<Vec<u8>> = data.chunks(frag_size).map(|c| c.to_vec()).collect();
    let w = rows.len();
    for y in 0..redundancy {
        let line = matrix_line(y + 1, w);
        let mut s = vec![0u8; frag_size];
        for (x, set) in line.iter().enumerate() {
            if *set {
                for (o, d) in s.iter_mut().zip(rows[x].iter()) {
                    *o ^= d;
                }
            }
        }
        rows.push(s);
    }
    Ok(rows)
}

/// Recovers the `nb_frag` uncoded fragments from any received set whose
/// coefficient rows span GF(2)^nb_frag. `fragments` holds `(n, payload)` with
/// 1-based fragment numbers. Returns `None` when the set is rank deficient.
pub fn decode(fragments: &[(u16, Vec<u8>)], nb_frag: usize) -> Option<Vec<u8>> {
    let mut rows: Vec<(Vec<bool>, Vec<u8>)> = fragments
        .iter()
        .map(|(n, payload)| {
            let n = *n as usize;
            let coeffs = if n >= 1 && n <= nb_frag {
                let mut c = vec![false; nb_frag];
                c[n - 1] = true;
                c
            } else {
                matrix_line(n.saturating_sub(nb_frag), nb_frag)
            };
            (coeffs, payload.clone())
        })
        .collect();

    for col in 0..nb_frag {
        let pivot = (col..rows.len()).find(|r| rows[*r].0[col])?;
        rows.swap(col, pivot);
        let (pc, pd) = rows[col].clone();
        for (i, row) in rows.iter_mut().enumerate() {
            if i != col && row.0[col] {
                for (a, b) in row.0.iter_mut().zip(pc.iter()) {
                    *a ^= b;
                }
                for (a, b) in row.1.iter_mut().zip(pd.iter()) {
                    *a ^= b;
                }
            }
        }
    }
    Some(rows.into_iter().take(nb_frag).flat_map(|(_, d)| d).collect())
}
