//! PHYPayload framing for join-request, rejoin-request, join-accept and
//! proprietary frames.
use crate::{
    crypto::{aes128_ecb, mic},
    AES128Key, DevAddr, LoRaWANError, LoRaWANResult, NetID, EUI64,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MType {
    JoinRequest = 0,
    JoinAccept = 1,
    UnconfirmedDataUp = 2,
    UnconfirmedDataDown = 3,
    ConfirmedDataUp = 4,
    ConfirmedDataDown = 5,
    RejoinRequest = 6,
    Proprietary = 7,
}

impl MType {
    pub fn from_mhdr(mhdr: u8) -> Self {
        match mhdr >> 5 {
            0 => MType::JoinRequest,
            1 => MType::JoinAccept,
            2 => MType::UnconfirmedDataUp,
            3 => MType::UnconfirmedDataDown,
            4 => MType::ConfirmedDataUp,
            5 => MType::ConfirmedDataDown,
            6 => MType::RejoinRequest,
            _ => MType::Proprietary,
        }
    }

    /// MHDR byte with LoRaWAN R1 major version.
    #[inline]
    pub fn mhdr(self) -> u8 {
        (self as u8) << 5
    }
}

/// Generic PHYPayload split into MHDR, MACPayload and MIC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhyPayload {
    pub mhdr: u8,
    pub mac_payload: Vec<u8>,
    pub mic: [u8; 4],
}

impl PhyPayload {
    pub fn decode(b: &[u8]) -> LoRaWANResult<Self> {
        if b.len() < 5 {
            return Err(LoRaWANError::InvalidLength {
                expected: 5,
                got: b.len(),
            });
        }
        let mut mic = [0u8; 4];
        mic.copy_from_slice(&b[b.len() - 4..]);
        Ok(Self {
            mhdr: b[0],
            mac_payload: b[1..b.len() - 4].to_vec(),
            mic,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.mac_payload.len() + 5);
        out.push(self.mhdr);
        out.extend_from_slice(&self.mac_payload);
        out.extend_from_slice(&self.mic);
        out
    }

    #[inline]
    pub fn mtype(&self) -> MType {
        MType::from_mhdr(self.mhdr)
    }

    /// Bytes covered by an uplink MIC (MHDR | MACPayload).
    fn mic_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.mac_payload.len() + 1);
        out.push(self.mhdr);
        out.extend_from_slice(&self.mac_payload);
        out
    }

    /// Recomputes the MIC with `key` and compares it to the carried one.
    pub fn validate_mic(&self, key: &AES128Key) -> LoRaWANResult<bool> {
        Ok(mic(key, &self.mic_bytes())? == self.mic)
    }

    pub fn set_mic(&mut self, key: &AES128Key) -> LoRaWANResult<()> {
        self.mic = mic(key, &self.mic_bytes())?;
        Ok(())
    }

    pub fn join_request(&self) -> LoRaWANResult<JoinRequestPayload> {
        if self.mtype() != MType::JoinRequest {
            return Err(LoRaWANError::InvalidMType(self.mhdr));
        }
        JoinRequestPayload::decode(&self.mac_payload)
    }

    pub fn rejoin_request(&self) -> LoRaWANResult<RejoinRequestPayload> {
        if self.mtype() != MType::RejoinRequest {
            return Err(LoRaWANError::InvalidMType(self.mhdr));
        }
        RejoinRequestPayload::decode(&self.mac_payload)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinRequestPayload {
    pub join_eui: EUI64,
    pub dev_eui: EUI64,
    pub dev_nonce: u16,
}

impl JoinRequestPayload {
    pub fn decode(b: &[u8]) -> LoRaWANResult<Self> {
        if b.len() != 18 {
            return Err(LoRaWANError::InvalidLength {
                expected: 18,
                got: b.len(),
            });
        }
        Ok(Self {
            join_eui: EUI64::from_le_slice(&b[0..8])?,
            dev_eui: EUI64::from_le_slice(&b[8..16])?,
            dev_nonce: u16::from_le_bytes([b[16], b[17]]),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(18);
        out.extend_from_slice(&self.join_eui.to_le_bytes());
        out.extend_from_slice(&self.dev_eui.to_le_bytes());
        out.extend_from_slice(&self.dev_nonce.to_le_bytes());
        out
    }
}

/// Rejoin-request payloads. Types 0 and 2 share a layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejoinRequestPayload {
    Type02 {
        rejoin_type: u8,
        net_id: NetID,
        dev_eui: EUI64,
        rj_count0: u16,
    },
    Type1 {
        join_eui: EUI64,
        dev_eui: EUI64,
        rj_count1: u16,
    },
}

impl RejoinRequestPayload {
    pub fn decode(b: &[u8]) -> LoRaWANResult<Self> {
        match b.first() {
            Some(t @ (0 | 2)) => {
                if b.len() != 14 {
                    return Err(LoRaWANError::InvalidLength {
                        expected: 14,
                        got: b.len(),
                    });
                }
                Ok(Self::Type02 {
                    rejoin_type: *t,
                    net_id: NetID::from_le_slice(&b[1..4])?,
                    dev_eui: EUI64::from_le_slice(&b[4..12])?,
                    rj_count0: u16::from_le_bytes([b[12], b[13]]),
                })
            }
            Some(1) => {
                if b.len() != 19 {
                    return Err(LoRaWANError::InvalidLength {
                        expected: 19,
                        got: b.len(),
                    });
                }
                Ok(Self::Type1 {
                    join_eui: EUI64::from_le_slice(&b[1..9])?,
                    dev_eui: EUI64::from_le_slice(&b[9..17])?,
                    rj_count1: u16::from_le_bytes([b[17], b[18]]),
                })
            }
            Some(t) => Err(LoRaWANError::InvalidField(format!("rejoin type {t}"))),
            None => Err(LoRaWANError::InvalidLength {
                expected: 14,
                got: 0,
            }),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(19);
        match self {
            Self::Type02 {
                rejoin_type,
                net_id,
                dev_eui,
                rj_count0,
            } => {
                out.push(*rejoin_type);
                out.extend_from_slice(&net_id.to_le_bytes());
                out.extend_from_slice(&dev_eui.to_le_bytes());
                out.extend_from_slice(&rj_count0.to_le_bytes());
            }
            Self::Type1 {
                join_eui,
                dev_eui,
                rj_count1,
            } => {
                out.push(1);
                out.extend_from_slice(&join_eui.to_le_bytes());
                out.extend_from_slice(&dev_eui.to_le_bytes());
                out.extend_from_slice(&rj_count1.to_le_bytes());
            }
        }
        out
    }

    #[inline]
    pub fn rejoin_type(&self) -> u8 {
        match self {
            Self::Type02 { rejoin_type, .. } => *rejoin_type,
            Self::Type1 { .. } => 1,
        }
    }

    #[inline]
    pub fn dev_eui(&self) -> EUI64 {
        match self {
            Self::Type02 { dev_eui, .. } | Self::Type1 { dev_eui, .. } => *dev_eui,
        }
    }

    /// RJcount0 or RJcount1, which replaces the DevNonce in key derivation.
    #[inline]
    pub fn rj_count(&self) -> u16 {
        match self {
            Self::Type02 { rj_count0, .. } => *rj_count0,
            Self::Type1 { rj_count1, .. } => *rj_count1,
        }
    }
}

/// Join-accept DLSettings byte.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DLSettings {
    pub opt_neg: bool,
    pub rx1_dr_offset: u8,
    pub rx2_dr: u8,
}

impl DLSettings {
    pub fn from_byte(b: u8) -> Self {
        Self {
            opt_neg: b & 0x80 != 0,
            rx1_dr_offset: (b >> 4) & 0x07,
            rx2_dr: b & 0x0f,
        }
    }

    pub fn to_byte(self) -> u8 {
        let mut b = (self.rx1_dr_offset & 0x07) << 4 | (self.rx2_dr & 0x0f);
        if self.opt_neg {
            b |= 0x80;
        }
        b
    }
}

/// Encodes a CFList of type 0 (list of up to five extra channel frequencies in Hz).
pub fn cf_list_from_channels(freqs: &[u32]) -> LoRaWANResult<[u8; 16]> {
    if freqs.len() > 5 {
        return Err(LoRaWANError::InvalidField(format!(
            "CFList holds at most 5 channels, got {}",
            freqs.len()
        )));
    }
    let mut out = [0u8; 16];
    for (i, f) in freqs.iter().enumerate() {
        let v = f / 100;
        if v >= 1 << 24 {
            return Err(LoRaWANError::InvalidField(format!("frequency {f} too large")));
        }
        out[i * 3..i * 3 + 3].copy_from_slice(&v.to_le_bytes()[..3]);
    }
    Ok(out)
}

/// Join type used in 1.1 join-accept MIC computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum JoinType {
    Join = 0xff,
    RejoinType0 = 0x00,
    RejoinType1 = 0x01,
    RejoinType2 = 0x02,
}

impl JoinType {
    pub fn for_rejoin(rejoin_type: u8) -> LoRaWANResult<Self> {
        match rejoin_type {
            0 => Ok(Self::RejoinType0),
            1 => Ok(Self::RejoinType1),
            2 => Ok(Self::RejoinType2),
            t => Err(LoRaWANError::InvalidField(format!("rejoin type {t}"))),
        }
    }
}

/// How the join-accept MIC is computed.
#[derive(Debug, Clone, Copy)]
pub enum JoinAcceptMic<'a> {
    /// LoRaWAN 1.0.x: CMAC over MHDR | payload with the NwkKey.
    Legacy { nwk_key: &'a AES128Key },
    /// LoRaWAN 1.1 (OptNeg): CMAC with the JSIntKey, prefixed by the join type,
    /// JoinEUI and the DevNonce / RJcount.
    OptNeg {
        js_int_key: &'a AES128Key,
        join_type: JoinType,
        join_eui: EUI64,
        dev_nonce: u16,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinAcceptPayload {
    pub join_nonce: u32,
    pub home_net_id: NetID,
    pub dev_addr: DevAddr,
    pub dl_settings: DLSettings,
    pub rx_delay: u8,
    pub cf_list: Option<[u8; 16]>,
}

impl JoinAcceptPayload {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(28);
        out.extend_from_slice(&self.join_nonce.to_le_bytes()[..3]);
        out.extend_from_slice(&self.home_net_id.to_le_bytes());
        out.extend_from_slice(&self.dev_addr.to_le_bytes());
        out.push(self.dl_settings.to_byte());
        out.push(self.rx_delay);
        if let Some(cf) = &self.cf_list {
            out.extend_from_slice(cf);
        }
        out
    }

    pub fn decode(b: &[u8]) -> LoRaWANResult<Self> {
        if b.len() != 12 && b.len() != 28 {
            return Err(LoRaWANError::InvalidLength {
                expected: 12,
                got: b.len(),
            });
        }
        let cf_list = if b.len() == 28 {
            let mut cf = [0u8; 16];
            cf.copy_from_slice(&b[12..28]);
            Some(cf)
        } else {
            None
        };
        Ok(Self {
            join_nonce: u32::from_le_bytes([b[0], b[1], b[2], 0]),
            home_net_id: NetID::from_le_slice(&b[3..6])?,
            dev_addr: DevAddr::from_le_slice(&b[6..10])?,
            dl_settings: DLSettings::from_byte(b[10]),
            rx_delay: b[11],
            cf_list,
        })
    }

    /// Builds the encrypted join-accept PHYPayload.
    ///
    /// The MIC is computed over the plaintext, then payload and MIC are
    /// encrypted together with AES-128 decrypt so the device can recover them
    /// with its encrypt-only AES engine.
    pub fn to_phy(&self, mic_mode: JoinAcceptMic<'_>, enc_key: &AES128Key) -> LoRaWANResult<Vec<u8>> {
        let mhdr = MType::JoinAccept.mhdr();
        let payload = self.encode();

        let mut mic_input = Vec::with_capacity(40);
        let key = match mic_mode {
            JoinAcceptMic::Legacy { nwk_key } => nwk_key,
            JoinAcceptMic::OptNeg {
                js_int_key,
                join_type,
                join_eui,
                dev_nonce,
            } => {
                mic_input.push(join_type as u8);
                mic_input.extend_from_slice(&join_eui.to_le_bytes());
                mic_input.extend_from_slice(&dev_nonce.to_le_bytes());
                js_int_key
            }
        };
        mic_input.push(mhdr);
        mic_input.extend_from_slice(&payload);
        let m = mic(key, &mic_input)?;

        let mut plain = payload;
        plain.extend_from_slice(&m);
        let encrypted = aes128_ecb(enc_key, &plain, false)?;

        let mut out = Vec::with_capacity(encrypted.len() + 1);
        out.push(mhdr);
        out.extend_from_slice(&encrypted);
        Ok(out)
    }

    /// Decrypts a join-accept PHYPayload, returning the payload and its MIC.
    pub fn from_phy(phy: &[u8], enc_key: &AES128Key) -> LoRaWANResult<(Self, [u8; 4])> {
        if phy.is_empty() || MType::from_mhdr(phy[0]) != MType::JoinAccept {
            return Err(LoRaWANError::InvalidMType(phy.first().copied().unwrap_or_default()));
        }
        // 12 or 28 payload bytes plus the MIC
        let encrypted = &phy[1..];
        if encrypted.len() != 16 && encrypted.len() != 32 {
            return Err(LoRaWANError::InvalidLength {
                expected: 16,
                got: encrypted.len(),
            });
        }
        let plain = aes128_ecb(enc_key, encrypted, true)?;
        let (payload, m) = plain.split_at(plain.len() - 4);
        let mut mic = [0u8; 4];
        mic.copy_from_slice(m);
        Ok((Self::decode(payload)?, mic))
    }
}

/// Builds a proprietary PHYPayload (MHDR | MACPayload | MIC).
pub fn proprietary(mac_payload: &[u8], mic: [u8; 4]) -> Vec<u8> {
    PhyPayload {
        mhdr: MType::Proprietary.mhdr(),
        mac_payload: mac_payload.to_vec(),
        mic,
    }
    .encode()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_request_layout() {
        let jr = JoinRequestPayload {
            join_eui: "0807060504030201".parse().unwrap(),
            dev_eui: "0102030405060708".parse().unwrap(),
            dev_nonce: 0x0102,
        };
        let mut phy = PhyPayload {
            mhdr: MType::JoinRequest.mhdr(),
            mac_payload: jr.encode(),
            mic: [0; 4],
        };
        let key = AES128Key([1; 16]);
        phy.set_mic(&key).unwrap();

        let bytes = phy.encode();
        assert_eq!(bytes.len(), 23);
        assert_eq!(&bytes[1..9], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(&bytes[17..19], &[0x02, 0x01]);

        let decoded = PhyPayload::decode(&bytes).unwrap();
        assert!(decoded.validate_mic(&key).unwrap());
        assert_eq!(decoded.join_request().unwrap(), jr);
        assert!(!decoded.validate_mic(&AES128Key([2; 16])).unwrap());
    }

    #[test]
    fn dl_settings_bits() {
        let s = DLSettings {
            opt_neg: true,
            rx1_dr_offset: 1,
            rx2_dr: 5,
        };
        assert_eq!(s.to_byte(), 0x95);
        assert_eq!(DLSettings::from_byte(0x95), s);
    }

    #[test]
    fn cf_list_channels() {
        let cf = cf_list_from_channels(&[868_700_000, 868_900_000]).unwrap();
        assert_eq!(&cf[0..3], &[0x98, 0x8d, 0x84]);
        assert_eq!(&cf[3..6], &[0x68, 0x95, 0x84]);
        assert_eq!(cf[15], 0);
    }

    #[test]
    fn join_accept_encrypt_decrypt() {
        let key = AES128Key([7; 16]);
        let ja = JoinAcceptPayload {
            join_nonce: 65536,
            home_net_id: "010203".parse().unwrap(),
            dev_addr: "01020304".parse().unwrap(),
            dl_settings: DLSettings {
                opt_neg: false,
                rx1_dr_offset: 1,
                rx2_dr: 5,
            },
            rx_delay: 1,
            cf_list: Some(cf_list_from_channels(&[868_700_000]).unwrap()),
        };
        let phy = ja.to_phy(JoinAcceptMic::Legacy { nwk_key: &key }, &key).unwrap();
        assert_eq!(phy.len(), 33);
        let (decoded, m) = JoinAcceptPayload::from_phy(&phy, &key).unwrap();
        assert_eq!(decoded, ja);

        let mut mic_input = vec![MType::JoinAccept.mhdr()];
        mic_input.extend_from_slice(&ja.encode());
        assert_eq!(mic(&key, &mic_input).unwrap(), m);
    }

    #[test]
    fn rejoin_type1_layout() {
        let rj = RejoinRequestPayload::Type1 {
            join_eui: "0807060504030201".parse().unwrap(),
            dev_eui: "0102030405060708".parse().unwrap(),
            rj_count1: 123,
        };
        let b = rj.encode();
        assert_eq!(b.len(), 19);
        assert_eq!(RejoinRequestPayload::decode(&b).unwrap(), rj);
        assert_eq!(rj.rj_count(), 123);
    }

    #[test]
    fn short_join_accept_is_rejected() {
        let key = AES128Key([7; 16]);
        let mhdr = MType::JoinAccept.mhdr();
        for phy in [vec![mhdr], vec![mhdr, 0x01, 0x02, 0x03], vec![mhdr; 17 + 4]] {
            assert!(matches!(
                JoinAcceptPayload::from_phy(&phy, &key),
                Err(LoRaWANError::InvalidLength { .. })
            ));
        }
    }
}
