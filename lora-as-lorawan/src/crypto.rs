//! AES-128 block helpers, CMAC, RFC 3394 key wrap and FRMPayload encryption.
use crate::{AES128Key, DevAddr, LoRaWANError, LoRaWANResult};
use aes::{
    cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit},
    Aes128, Aes192, Aes256,
};
use aes_kw::Kek;
use cmac::{Cmac, Mac};

/// Encrypts a single 16-byte block.
pub fn aes128_encrypt(key: &AES128Key, block: &[u8; 16]) -> [u8; 16] {
    let cipher = Aes128::new(GenericArray::from_slice(&key.0));
    let mut b = GenericArray::clone_from_slice(block);
    cipher.encrypt_block(&mut b);
    b.into()
}

/// Decrypts a single 16-byte block.
pub fn aes128_decrypt(key: &AES128Key, block: &[u8; 16]) -> [u8; 16] {
    let cipher = Aes128::new(GenericArray::from_slice(&key.0));
    let mut b = GenericArray::clone_from_slice(block);
    cipher.decrypt_block(&mut b);
    b.into()
}

/// Applies `aes128_encrypt` (or `aes128_decrypt`) block-wise in ECB mode.
/// The input length must be a multiple of 16.
pub fn aes128_ecb(key: &AES128Key, data: &[u8], encrypt: bool) -> LoRaWANResult<Vec<u8>> {
    if data.len() % 16 != 0 {
        return Err(LoRaWANError::Crypto(format!(
            "ECB input must be a multiple of 16 bytes, got {}",
            data.len()
        )));
    }
    let cipher = Aes128::new(GenericArray::from_slice(&key.0));
    let mut out = data.to_vec();
    for chunk in out.chunks_mut(16) {
        let block = GenericArray::from_mut_slice(chunk);
        if encrypt {
            cipher.encrypt_block(block);
        } else {
            cipher.decrypt_block(block);
        }
    }
    Ok(out)
}

/// Full 16-byte AES-CMAC of `data`.
pub fn cmac(key: &AES128Key, data: &[u8]) -> LoRaWANResult<[u8; 16]> {
    let mut mac = <Cmac<Aes128> as Mac>::new_from_slice(&key.0)
        .map_err(|e| LoRaWANError::Crypto(e.to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().into())
}

/// LoRaWAN MIC: the first four bytes of the CMAC.
pub fn mic(key: &AES128Key, data: &[u8]) -> LoRaWANResult<[u8; 4]> {
    let full = cmac(key, data)?;
    let mut out = [0u8; 4];
    out.copy_from_slice(&full[..4]);
    Ok(out)
}

/// Encrypts (or decrypts, the operation is symmetric) an FRMPayload using the
/// LoRaWAN counter-mode keystream built from `A_i` blocks.
pub fn encrypt_frm_payload(
    key: &AES128Key,
    uplink: bool,
    dev_addr: &DevAddr,
    f_cnt: u32,
    data: &[u8],
) -> Vec<u8> {
    let mut out = data.to_vec();
    let mut a = [0u8; 16];
    a[0] = 0x01;
    a[5] = if uplink { 0x00 } else { 0x01 };
    a[6..10].copy_from_slice(&dev_addr.to_le_bytes());
    a[10..14].copy_from_slice(&f_cnt.to_le_bytes());

    for (i, chunk) in out.chunks_mut(16).enumerate() {
        a[15] = (i + 1) as u8;
        let s = aes128_encrypt(key, &a);
        for (b, k) in chunk.iter_mut().zip(s.iter()) {
            *b ^= k;
        }
    }
    out
}

/// Wraps `key` with the key-encryption key `kek` (RFC 3394). AES-128, 192 and
/// 256 KEKs are accepted.
pub fn wrap_key(kek: &[u8], key: &AES128Key) -> LoRaWANResult<Vec<u8>> {
    let mut out = vec![0u8; key.0.len() + 8];
    let res = match kek.len() {
        16 => Kek::<Aes128>::new(GenericArray::from_slice(kek)).wrap(&key.0, &mut out),
        24 => Kek::<Aes192>::new(GenericArray::from_slice(kek)).wrap(&key.0, &mut out),
        32 => Kek::<Aes256>::new(GenericArray::from_slice(kek)).wrap(&key.0, &mut out),
        n => {
            return Err(LoRaWANError::Crypto(format!(
                "unsupported KEK length {n}, expected 16, 24 or 32 bytes"
            )))
        }
    };
    res.map_err(|e| LoRaWANError::Crypto(e.to_string()))?;
    Ok(out)
}

/// Reverses [`wrap_key`].
pub fn unwrap_key(kek: &[u8], wrapped: &[u8]) -> LoRaWANResult<AES128Key> {
    if wrapped.len() != 24 {
        return Err(LoRaWANError::InvalidLength {
            expected: 24,
            got: wrapped.len(),
        });
    }
    let mut out = [0u8; 16];
    let res = match kek.len() {
        16 => Kek::<Aes128>::new(GenericArray::from_slice(kek)).unwrap(wrapped, &mut out),
        24 => Kek::<Aes192>::new(GenericArray::from_slice(kek)).unwrap(wrapped, &mut out),
        32 => Kek::<Aes256>::new(GenericArray::from_slice(kek)).unwrap(wrapped, &mut out),
        n => {
            return Err(LoRaWANError::Crypto(format!(
                "unsupported KEK length {n}, expected 16, 24 or 32 bytes"
            )))
        }
    };
    res.map_err(|e| LoRaWANError::Crypto(e.to_string()))?;
    Ok(AES128Key(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> AES128Key {
        AES128Key([1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16])
    }

    #[test]
    fn ecb_encrypt_then_decrypt() {
        let data = [0x42u8; 32];
        let enc = aes128_ecb(&key(), &data, true).unwrap();
        assert_ne!(enc, data.to_vec());
        assert_eq!(aes128_ecb(&key(), &enc, false).unwrap(), data.to_vec());
        assert!(aes128_ecb(&key(), &[0u8; 15], true).is_err());
    }

    #[test]
    fn frm_payload_is_symmetric_and_direction_sensitive() {
        let addr = DevAddr([1, 2, 3, 4]);
        let data = b"hello world, this spans two blocks";
        let down = encrypt_frm_payload(&key(), false, &addr, 12, data);
        let up = encrypt_frm_payload(&key(), true, &addr, 12, data);
        assert_ne!(down, up);
        assert_eq!(encrypt_frm_payload(&key(), false, &addr, 12, &down), data.to_vec());
    }

    #[test]
    fn key_wrap_rfc3394_vector() {
        // RFC 3394 section 4.1: 128-bit key data with a 128-bit KEK.
        let kek = hex::decode("000102030405060708090A0B0C0D0E0F").unwrap();
        let data: AES128Key = "00112233445566778899aabbccddeeff".parse().unwrap();
        let wrapped = wrap_key(&kek, &data).unwrap();
        assert_eq!(
            hex::encode(&wrapped),
            "1fa68b0a8112b447aef34bd8fb5a7b829d3e862371d2cfe5"
        );
        assert_eq!(unwrap_key(&kek, &wrapped).unwrap(), data);
    }

    #[test]
    fn rejects_bad_kek_length() {
        assert!(wrap_key(&[0u8; 10], &key()).is_err());
    }

    #[test]
    fn downlink_frm_payload_vector() {
        let dev_addr = DevAddr([0x01, 0x02, 0x03, 0x04]);
        let out = encrypt_frm_payload(&key(), false, &dev_addr, 12, &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(out, vec![0x13, 0x35, 0xcb, 0x91]);
    }
}
