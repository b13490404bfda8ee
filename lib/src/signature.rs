// Copyright (c) 2023 CoolBitX Technology Ltd.

//! Signature post-processing
//!
//! Signatures are returned from the secure element AES-256-CBC encrypted
//! under a per-transaction key. ECDSA material is DER encoded, this is
//! parsed strictly (BIP-66), normalised to low-s and re-encoded either as
//! DER or as canonical `r`, `s` components with an optional recovery
//! parameter.

use aes::{
    cipher::{BlockDecrypt, BlockEncrypt, NewBlockCipher},
    Aes256, Block,
};
use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, VerifyingKey};
use log::{debug, trace};
use strum::{Display, EnumString};
use zeroize::Zeroizing;

use crate::Error;

/// AES block size
const BLOCK_SIZE: usize = 16;

/// Maximum length of a DER encoded secp256k1 signature
const MAX_DER_LEN: usize = 72;

/// Output signature encoding requested by coin modules
#[derive(Copy, Clone, PartialEq, Eq, Debug, Display, EnumString, clap::ValueEnum)]
pub enum SignatureType {
    /// Strict DER (BIP-66) encoding
    Der,
    /// Raw `r`, `s` components (with recovery parameter where requested)
    Canonical,
    /// Raw EdDSA signature bytes
    Eddsa,
}

/// Post-processed signature
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Signature {
    Der(Vec<u8>),
    Canonical {
        r: [u8; 32],
        s: [u8; 32],
        v: Option<u8>,
    },
    Eddsa(Vec<u8>),
}

impl Signature {
    /// Serialise the signature, canonical signatures are encoded as
    /// `r || s` followed by `v` where available
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Signature::Der(b) | Signature::Eddsa(b) => b.clone(),
            Signature::Canonical { r, s, v } => {
                let mut b = [&r[..], &s[..]].concat();
                b.extend(v);
                b
            }
        }
    }
}

/// Inputs for recovery parameter computation
#[derive(Clone, Debug)]
pub struct RecoveryInput {
    /// Signed message hash
    pub message_hash: [u8; 32],
    /// Expected signer public key
    pub public_key: VerifyingKey,
}

impl RecoveryInput {
    /// Build recovery inputs from a message hash and SEC1 encoded public key
    pub fn new(message_hash: [u8; 32], public_key: &[u8]) -> Result<Self, Error> {
        let public_key = VerifyingKey::from_sec1_bytes(public_key).map_err(|_| Error::InvalidKey)?;

        Ok(Self {
            message_hash,
            public_key,
        })
    }
}

/// Decrypt and canonicalise a signature returned by the secure element
pub fn decrypt_and_canonicalize(
    raw: &[u8],
    decrypting_key: Option<&[u8]>,
    signature_type: SignatureType,
    recovery: Option<&RecoveryInput>,
) -> Result<Signature, Error> {
    let plain = match decrypting_key {
        Some(k) => decrypt(raw, k)?,
        None => Zeroizing::new(raw.to_vec()),
    };

    match signature_type {
        SignatureType::Eddsa => Ok(Signature::Eddsa(plain.to_vec())),
        SignatureType::Der => {
            let (r, s) = normalize_s(&plain)?;
            Ok(Signature::Der(encode_der(&r, &s)?))
        }
        SignatureType::Canonical => {
            let (r, s) = normalize_s(&plain)?;

            let v = match recovery {
                Some(i) => Some(recovery_param(&r, &s, i)?),
                None => None,
            };

            Ok(Signature::Canonical { r, s, v })
        }
    }
}

/// Decrypt AES-256-CBC ciphertext (zero IV, PKCS#7 padding)
pub fn decrypt(data: &[u8], key: &[u8]) -> Result<Zeroizing<Vec<u8>>, Error> {
    let cipher = Aes256::new_from_slice(key).map_err(|_| Error::Decrypt)?;

    if data.is_empty() || data.len() % BLOCK_SIZE != 0 {
        debug!("invalid ciphertext length: {}", data.len());
        return Err(Error::Decrypt);
    }

    let mut out = Zeroizing::new(Vec::with_capacity(data.len()));
    let mut prev = [0u8; BLOCK_SIZE];

    for c in data.chunks(BLOCK_SIZE) {
        let mut b = Block::default();
        b.copy_from_slice(c);
        cipher.decrypt_block(&mut b);

        out.extend(b.iter().zip(prev.iter()).map(|(a, p)| a ^ p));
        prev.copy_from_slice(c);
    }

    // Strip PKCS#7 padding
    let n = out.last().copied().unwrap_or(0) as usize;
    if n == 0 || n > BLOCK_SIZE || out[out.len() - n..].iter().any(|v| *v as usize != n) {
        return Err(Error::Decrypt);
    }

    let len = out.len() - n;
    out.truncate(len);

    Ok(out)
}

/// Encrypt with AES-256-CBC (zero IV, PKCS#7 padding)
pub fn encrypt(data: &[u8], key: &[u8]) -> Result<Vec<u8>, Error> {
    let cipher = Aes256::new_from_slice(key).map_err(|_| Error::Decrypt)?;

    let n = BLOCK_SIZE - data.len() % BLOCK_SIZE;
    let mut buff = Zeroizing::new(data.to_vec());
    buff.extend(std::iter::repeat(n as u8).take(n));

    let mut out = Vec::with_capacity(buff.len());
    let mut prev = [0u8; BLOCK_SIZE];

    for c in buff.chunks(BLOCK_SIZE) {
        let mut b = Block::default();
        for (i, v) in b.iter_mut().enumerate() {
            *v = c[i] ^ prev[i];
        }

        cipher.encrypt_block(&mut b);

        out.extend_from_slice(&b);
        prev.copy_from_slice(&b);
    }

    Ok(out)
}

/// Parse a strict (BIP-66) DER signature into 32-byte `r` and `s` values
pub fn decode_der(sig: &[u8]) -> Result<([u8; 32], [u8; 32]), Error> {
    let len = sig.len();

    if !(8..=MAX_DER_LEN).contains(&len) {
        return Err(Error::InvalidSignatureEncoding("invalid length"));
    }
    if sig[0] != 0x30 || sig[1] as usize != len - 2 {
        return Err(Error::InvalidSignatureEncoding("invalid sequence"));
    }

    let r_len = sig[3] as usize;
    if 5 + r_len >= len {
        return Err(Error::InvalidSignatureEncoding("R length is too long"));
    }

    let s_len = sig[5 + r_len] as usize;
    if r_len + s_len + 6 != len {
        return Err(Error::InvalidSignatureEncoding("invalid component lengths"));
    }

    if sig[2] != 0x02 || sig[4 + r_len] != 0x02 {
        return Err(Error::InvalidSignatureEncoding("expected integer"));
    }

    let r = &sig[4..4 + r_len];
    let s = &sig[6 + r_len..];

    check_int(r, "R")?;
    check_int(s, "S")?;

    Ok((to_fixed(r)?, to_fixed(s)?))
}

/// Encode `r` and `s` as a strict (BIP-66) DER signature
pub fn encode_der(r: &[u8], s: &[u8]) -> Result<Vec<u8>, Error> {
    let r = to_der_int(r);
    let s = to_der_int(s);

    check_int(&r, "R")?;
    check_int(&s, "S")?;

    let mut out = Vec::with_capacity(6 + r.len() + s.len());
    out.extend_from_slice(&[0x30, (4 + r.len() + s.len()) as u8]);
    out.extend_from_slice(&[0x02, r.len() as u8]);
    out.extend_from_slice(&r);
    out.extend_from_slice(&[0x02, s.len() as u8]);
    out.extend_from_slice(&s);

    Ok(out)
}

/// Parse a DER signature and normalise to low-s form
pub fn normalize_s(der: &[u8]) -> Result<([u8; 32], [u8; 32]), Error> {
    let (r, s) = decode_der(der)?;

    let sig = to_signature(&r, &s)?;

    let sig = match sig.normalize_s() {
        Some(n) => {
            trace!("normalised high-s signature");
            n
        }
        None => sig,
    };

    let b = sig.to_bytes();
    let (mut r, mut s) = ([0u8; 32], [0u8; 32]);
    r.copy_from_slice(&b[..32]);
    s.copy_from_slice(&b[32..]);

    Ok((r, s))
}

/// Compute the recovery parameter for a (low-s) signature, trying
/// parity 0 then 1
pub fn recovery_param(r: &[u8; 32], s: &[u8; 32], input: &RecoveryInput) -> Result<u8, Error> {
    let sig = to_signature(r, s)?;

    for v in 0..=1u8 {
        let id = RecoveryId::new(v == 1, false);

        match VerifyingKey::recover_from_prehash(&input.message_hash, &sig, id) {
            Ok(k) if k == input.public_key => return Ok(v),
            _ => (),
        }
    }

    debug!("no recovery parameter matches public key");

    Err(Error::SignatureRecoveryFailed)
}

fn to_signature(r: &[u8; 32], s: &[u8; 32]) -> Result<EcdsaSignature, Error> {
    EcdsaSignature::from_slice(&[&r[..], &s[..]].concat())
        .map_err(|_| Error::InvalidSignatureEncoding("component out of range"))
}

/// Convert a big-endian integer to minimal DER form
fn to_der_int(v: &[u8]) -> Vec<u8> {
    let v = coolwallet_apdu::codec::trim_leading_zeros(v);

    match v.first() {
        Some(b) if b & 0x80 != 0 => [&[0x00], v].concat(),
        _ => v.to_vec(),
    }
}

/// Check DER integer rules for a signature component
fn check_int(v: &[u8], name: &'static str) -> Result<(), Error> {
    let e = |m: &'static str| Err(Error::InvalidSignatureEncoding(m));

    match v {
        [] => match name {
            "R" => e("R length is zero"),
            _ => e("S length is zero"),
        },
        _ if v.len() > 33 => match name {
            "R" => e("R length is too long"),
            _ => e("S length is too long"),
        },
        [b, ..] if b & 0x80 != 0 => match name {
            "R" => e("R value is negative"),
            _ => e("S value is negative"),
        },
        [0x00, b, ..] if b & 0x80 == 0 => match name {
            "R" => e("R value excessively padded"),
            _ => e("S value excessively padded"),
        },
        _ => Ok(()),
    }
}

/// Left-pad a DER integer to 32 bytes
fn to_fixed(v: &[u8]) -> Result<[u8; 32], Error> {
    let v = coolwallet_apdu::codec::trim_leading_zeros(v);

    if v.len() > 32 {
        return Err(Error::InvalidSignatureEncoding("component out of range"));
    }

    let mut b = [0u8; 32];
    b[32 - v.len()..].copy_from_slice(v);

    Ok(b)
}

#[cfg(test)]
mod test {
    use k256::ecdsa::SigningKey;
    use rand::{rngs::OsRng, RngCore};

    use super::*;

    fn random_signature() -> (EcdsaSignature, RecoveryId, [u8; 32], VerifyingKey) {
        let k = SigningKey::random(&mut OsRng);

        let mut hash = [0u8; 32];
        OsRng.fill_bytes(&mut hash);

        let (sig, id) = k.sign_prehash_recoverable(&hash).unwrap();

        (sig, id, hash, VerifyingKey::from(&k))
    }

    fn split(sig: &EcdsaSignature) -> ([u8; 32], [u8; 32]) {
        let b = sig.to_bytes();
        let (mut r, mut s) = ([0u8; 32], [0u8; 32]);
        r.copy_from_slice(&b[..32]);
        s.copy_from_slice(&b[32..]);
        (r, s)
    }

    #[test]
    fn decrypt_encrypted() {
        let key = [0x5au8; 32];
        let data = b"some signature material longer than a block";

        let c = encrypt(data, &key).unwrap();
        assert_eq!(c.len() % BLOCK_SIZE, 0);
        assert_ne!(&c[..data.len()], &data[..]);

        let p = decrypt(&c, &key).unwrap();
        assert_eq!(&p[..], &data[..]);
    }

    #[test]
    fn cbc_known_answer() {
        // AES-256 zero key / zero block, zero IV leaves the first block as ECB
        let c = encrypt(&[0u8; 16], &[0u8; 32]).unwrap();

        assert_eq!(c.len(), 2 * BLOCK_SIZE);
        assert_eq!(hex::encode(&c[..16]), "dc95c078a2408989ad48a21492842087");
        assert_eq!(&decrypt(&c, &[0u8; 32]).unwrap()[..], &[0u8; 16]);
    }

    #[test]
    fn decrypt_invalid() {
        let key = [0x5au8; 32];
        let c = encrypt(&[0x30, 0x06], &key).unwrap();

        // Truncated / empty ciphertext
        assert!(matches!(decrypt(&c[..15], &key), Err(Error::Decrypt)));
        assert!(matches!(decrypt(&[], &key), Err(Error::Decrypt)));

        // Invalid key length
        assert!(matches!(decrypt(&c, &key[..16]), Err(Error::Decrypt)));
    }

    #[test]
    fn der_encoding_matches_reference() {
        for _i in 0..32 {
            let (sig, _id, _hash, _key) = random_signature();
            let (r, s) = split(&sig);

            let der = encode_der(&r, &s).unwrap();

            // Accepted by reference parser and matches reference encoding
            let parsed = EcdsaSignature::from_der(&der).unwrap();
            assert_eq!(parsed, sig);
            assert_eq!(der, sig.to_der().as_bytes());

            // Decodes to the original components
            assert_eq!(decode_der(&der).unwrap(), (r, s));
        }
    }

    #[test]
    fn der_encoding_pads_negative() {
        let r = [0xffu8; 32];
        let mut s = [0u8; 32];
        s[31] = 0x01;

        let der = encode_der(&r, &s).unwrap();

        assert_eq!(&der[..5], &[0x30, 0x26, 0x02, 0x21, 0x00]);
        assert_eq!(&der[der.len() - 3..], &[0x02, 0x01, 0x01]);
    }

    #[test]
    fn der_rejects_invalid_components() {
        let s = [0x01u8; 32];

        // Empty component
        assert!(matches!(
            encode_der(&[0u8; 32], &s),
            Err(Error::InvalidSignatureEncoding("R length is zero"))
        ));

        // Oversize component
        assert!(matches!(
            encode_der(&[0x01u8; 34], &s),
            Err(Error::InvalidSignatureEncoding("R length is too long"))
        ));

        // Negative component
        let der = [0x30, 0x06, 0x02, 0x01, 0x81, 0x02, 0x01, 0x01];
        assert!(matches!(
            decode_der(&der),
            Err(Error::InvalidSignatureEncoding("R value is negative"))
        ));

        // Excess padding
        let der = [0x30, 0x07, 0x02, 0x01, 0x01, 0x02, 0x02, 0x00, 0x01];
        assert!(matches!(
            decode_der(&der),
            Err(Error::InvalidSignatureEncoding("S value excessively padded"))
        ));
    }

    #[test]
    fn normalize_high_s() {
        let (sig, _id, _hash, _key) = random_signature();

        // Signing produces low-s, negate s to construct the high-s form
        let high_s = -*sig.s();
        let high = EcdsaSignature::from_scalars(sig.r().to_bytes(), high_s.to_bytes()).unwrap();
        assert!(high.normalize_s().is_some());

        let s = decrypt_and_canonicalize(high.to_der().as_bytes(), None, SignatureType::Der, None)
            .unwrap();

        assert_eq!(s, Signature::Der(sig.to_der().as_bytes().to_vec()));
    }

    #[test]
    fn recovery_param_matches() {
        for _i in 0..8 {
            let (sig, id, hash, key) = random_signature();
            let (r, s) = split(&sig);

            let input = RecoveryInput::new(hash, &key.to_sec1_bytes()).unwrap();

            assert_eq!(recovery_param(&r, &s, &input).unwrap(), id.to_byte());
        }
    }

    #[test]
    fn recovery_param_tampered_hash() {
        let (sig, _id, mut hash, key) = random_signature();
        let (r, s) = split(&sig);

        hash[0] ^= 0x01;
        let input = RecoveryInput::new(hash, &key.to_sec1_bytes()).unwrap();

        assert!(matches!(
            recovery_param(&r, &s, &input),
            Err(Error::SignatureRecoveryFailed)
        ));
    }

    #[test]
    fn canonicalize_encrypted() {
        let (sig, id, hash, key) = random_signature();
        let (r, s) = split(&sig);

        let aes_key = [0x42u8; 32];
        let raw = encrypt(sig.to_der().as_bytes(), &aes_key).unwrap();
        let input = RecoveryInput::new(hash, &key.to_sec1_bytes()).unwrap();

        let c = decrypt_and_canonicalize(
            &raw,
            Some(&aes_key),
            SignatureType::Canonical,
            Some(&input),
        )
        .unwrap();

        assert_eq!(
            c,
            Signature::Canonical {
                r,
                s,
                v: Some(id.to_byte())
            }
        );
    }

    #[test]
    fn canonical_bytes() {
        let c = Signature::Canonical {
            r: [0x01; 32],
            s: [0x02; 32],
            v: Some(1),
        };

        let b = c.to_bytes();
        assert_eq!(b.len(), 65);
        assert_eq!(b[64], 0x01);
    }

    #[test]
    fn eddsa_passthrough() {
        let raw = [0xabu8; 64];

        let c = decrypt_and_canonicalize(&raw, None, SignatureType::Eddsa, None).unwrap();
        assert_eq!(c, Signature::Eddsa(raw.to_vec()));
    }

    #[test]
    fn invalid_public_key() {
        assert!(matches!(
            RecoveryInput::new([0u8; 32], &[0x02, 0x00]),
            Err(Error::InvalidKey)
        ));
    }
}
