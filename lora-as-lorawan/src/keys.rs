//! Session, join-server and multicast key derivation.
use crate::{
    crypto::{aes128_encrypt, aes128_ecb},
    AES128Key, DevAddr, LoRaWANResult, NetID, EUI64,
};

/// Session keys produced by a (re)join.
///
/// For LoRaWAN 1.0.x devices the three network keys are identical and equal
/// to the NwkSKey.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionKeys {
    pub f_nwk_s_int_key: AES128Key,
    pub s_nwk_s_int_key: AES128Key,
    pub nwk_s_enc_key: AES128Key,
    pub app_s_key: AES128Key,
}

/// Inputs shared by every session key derivation.
#[derive(Debug, Clone, Copy)]
pub struct SessionContext {
    pub opt_neg: bool,
    pub net_id: NetID,
    pub join_eui: EUI64,
    pub join_nonce: u32,
    /// DevNonce for join-requests, RJcount0/RJcount1 for rejoin-requests.
    pub dev_nonce: u16,
}

fn session_key(ctx: &SessionContext, typ: u8, key: &AES128Key) -> AES128Key {
    let mut b = [0u8; 16];
    b[0] = typ;
    b[1..4].copy_from_slice(&ctx.join_nonce.to_le_bytes()[..3]);
    if ctx.opt_neg {
        b[4..12].copy_from_slice(&ctx.join_eui.to_le_bytes());
        b[12..14].copy_from_slice(&ctx.dev_nonce.to_le_bytes());
    } else {
        b[4..7].copy_from_slice(&ctx.net_id.to_le_bytes());
        b[7..9].copy_from_slice(&ctx.dev_nonce.to_le_bytes());
    }
    AES128Key(aes128_encrypt(key, &b))
}

/// Derives the session keys.
///
/// Every key uses its own type byte; `opt_neg` only selects the input block
/// layout. With `opt_neg` (1.1) the AppSKey comes from `app_key`. Without it
/// (1.0.x) there is a single root key, stored as `nwk_key`, from which all
/// four keys are derived.
pub fn derive_session_keys(
    ctx: &SessionContext,
    nwk_key: &AES128Key,
    app_key: &AES128Key,
) -> SessionKeys {
    let app_root = if ctx.opt_neg { app_key } else { nwk_key };
    SessionKeys {
        f_nwk_s_int_key: session_key(ctx, 0x01, nwk_key),
        s_nwk_s_int_key: session_key(ctx, 0x03, nwk_key),
        nwk_s_enc_key: session_key(ctx, 0x04, nwk_key),
        app_s_key: session_key(ctx, 0x02, app_root),
    }
}

fn js_key(typ: u8, nwk_key: &AES128Key, dev_eui: &EUI64) -> AES128Key {
    let mut b = [0u8; 16];
    b[0] = typ;
    b[1..9].copy_from_slice(&dev_eui.to_le_bytes());
    AES128Key(aes128_encrypt(nwk_key, &b))
}

/// JSIntKey, used for 1.1 join-accept MICs and rejoin type 1 MICs.
pub fn js_int_key(nwk_key: &AES128Key, dev_eui: &EUI64) -> AES128Key {
    js_key(0x06, nwk_key, dev_eui)
}

/// JSEncKey, used to encrypt join-accepts answering rejoin-requests.
pub fn js_enc_key(nwk_key: &AES128Key, dev_eui: &EUI64) -> AES128Key {
    js_key(0x05, nwk_key, dev_eui)
}

/// McRootKey for LoRaWAN 1.0.x devices, derived from the GenAppKey.
pub fn mc_root_key_for_gen_app_key(gen_app_key: &AES128Key) -> AES128Key {
    AES128Key(aes128_encrypt(gen_app_key, &[0u8; 16]))
}

/// McRootKey for LoRaWAN 1.1 devices, derived from the AppKey.
pub fn mc_root_key_for_app_key(app_key: &AES128Key) -> AES128Key {
    let mut b = [0u8; 16];
    b[0] = 0x20;
    AES128Key(aes128_encrypt(app_key, &b))
}

pub fn mc_ke_key(mc_root_key: &AES128Key) -> AES128Key {
    AES128Key(aes128_encrypt(mc_root_key, &[0u8; 16]))
}

fn mc_session_key(typ: u8, mc_key: &AES128Key, mc_addr: &DevAddr) -> AES128Key {
    let mut b = [0u8; 16];
    b[0] = typ;
    b[1..5].copy_from_slice(&mc_addr.to_le_bytes());
    AES128Key(aes128_encrypt(mc_key, &b))
}

pub fn mc_app_s_key(mc_key: &AES128Key, mc_addr: &DevAddr) -> AES128Key {
    mc_session_key(0x01, mc_key, mc_addr)
}

pub fn mc_net_s_key(mc_key: &AES128Key, mc_addr: &DevAddr) -> AES128Key {
    mc_session_key(0x02, mc_key, mc_addr)
}

/// Encrypts the group McKey under the device McKEKey for `McGroupSetupReq`.
pub fn encrypt_mc_key(mc_ke_key: &AES128Key, mc_key: &AES128Key) -> LoRaWANResult<AES128Key> {
    let out = aes128_ecb(mc_ke_key, &mc_key.0, true)?;
    AES128Key::from_slice(&out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lorawan_1_0_session_keys() {
        let ctx = SessionContext {
            opt_neg: false,
            net_id: "010203".parse().unwrap(),
            join_eui: "0807060504030201".parse().unwrap(),
            join_nonce: 65536,
            dev_nonce: 0x0102,
        };
        let nwk_key: AES128Key = "01020304050607080102030405060708".parse().unwrap();
        let keys = derive_session_keys(&ctx, &nwk_key, &AES128Key::default());
        assert_eq!(
            keys.app_s_key.to_string(),
            "927b9c911183cffe4cb2ff4b75545f6d"
        );
        assert_eq!(
            keys.f_nwk_s_int_key.to_string(),
            "df53c35f3034ccced0ff354c70de04df"
        );
    }

    #[test]
    fn lorawan_1_0_network_keys_use_their_own_type_byte() {
        // rejoin-counter standing in for the DevNonce
        let ctx = SessionContext {
            opt_neg: false,
            net_id: "010203".parse().unwrap(),
            join_eui: "0807060504030201".parse().unwrap(),
            join_nonce: 65536,
            dev_nonce: 123,
        };
        let nwk_key: AES128Key = "01020304050607080102030405060708".parse().unwrap();
        let keys = derive_session_keys(&ctx, &nwk_key, &AES128Key::default());
        assert_eq!(keys.f_nwk_s_int_key.to_string(), "0feb54bd2f854bfec367fe5b1b841037");
        assert_eq!(keys.s_nwk_s_int_key.to_string(), "547376b0070ea9964e3de262fce75591");
        assert_eq!(keys.nwk_s_enc_key.to_string(), "d409d057110e9fdd05c77e0c553f77f4");
        assert_eq!(keys.app_s_key.to_string(), "0b19169753fc3c1fdea1766a0c2275e1");
    }

    #[test]
    fn lorawan_1_1_keys_are_distinct() {
        let ctx = SessionContext {
            opt_neg: true,
            net_id: NetID::default(),
            join_eui: "0807060504030201".parse().unwrap(),
            join_nonce: 1,
            dev_nonce: 123,
        };
        let keys = derive_session_keys(&ctx, &AES128Key([1; 16]), &AES128Key([2; 16]));
        assert_ne!(keys.f_nwk_s_int_key, keys.s_nwk_s_int_key);
        assert_ne!(keys.s_nwk_s_int_key, keys.nwk_s_enc_key);
        assert_ne!(keys.app_s_key, keys.nwk_s_enc_key);
    }

    #[test]
    fn mc_key_encryption_vector() {
        let gen_app_key: AES128Key = "0102030405060708090a0b0c0d0e0f10".parse().unwrap();
        let mc_key: AES128Key = "100f0e0d0c0b0a090807060504030201".parse().unwrap();
        let ke_key = mc_ke_key(&mc_root_key_for_gen_app_key(&gen_app_key));
        let encrypted = encrypt_mc_key(&ke_key, &mc_key).unwrap();
        assert_eq!(encrypted.to_string(), "ba6abbd4e4100a62b981a82ab947d40a");
    }
}
