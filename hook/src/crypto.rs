// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

//! AES-GCM decryption of the Raksh payloads.
//!
//! The config map and every user secret are sealed with the same
//! `configMapKey`/`nonce` pair using AES-GCM with an empty AAD. The 16-byte
//! authentication tag is appended to the ciphertext.
//!
//! # Supported Keys
//!
//! - 16 bytes: AES-128-GCM
//! - 32 bytes: AES-256-GCM
//!
//! # Security
//!
//! On any failure the working buffer is zeroized and no partial plaintext is
//! returned. Successful plaintext is wrapped in [`Zeroizing`] so it is wiped
//! when the caller drops it.

use aws_lc_rs::aead::{AES_128_GCM, AES_256_GCM, Aad, Algorithm, LessSafeKey, Nonce, UnboundKey};
use zeroize::{Zeroize, Zeroizing};

use crate::constants::{AES_128_KEY_LENGTH, AES_256_KEY_LENGTH, NONCE_LENGTH};
use crate::errors::HookError;

fn algorithm_for(key: &[u8]) -> Result<&'static Algorithm, HookError> {
    match key.len() {
        AES_128_KEY_LENGTH => Ok(&AES_128_GCM),
        AES_256_KEY_LENGTH => Ok(&AES_256_GCM),
        len => Err(HookError::InvalidKeyLength(len)),
    }
}

fn build_key(key: &[u8]) -> Result<LessSafeKey, HookError> {
    let algorithm = algorithm_for(key)?;
    let unbound =
        UnboundKey::new(algorithm, key).map_err(|_| HookError::InvalidKeyLength(key.len()))?;
    Ok(LessSafeKey::new(unbound))
}

fn build_nonce(nonce: &[u8]) -> Result<Nonce, HookError> {
    if nonce.len() != NONCE_LENGTH {
        return Err(HookError::InvalidNonceLength(nonce.len()));
    }
    Nonce::try_assume_unique_for_key(nonce).map_err(|_| HookError::InvalidNonceLength(nonce.len()))
}

/// Decrypts and authenticates `ciphertext` (tag appended) in one shot.
///
/// # Errors
///
/// - [`HookError::InvalidKeyLength`] if the key is not 16 or 32 bytes
/// - [`HookError::InvalidNonceLength`] if the nonce is not 12 bytes
/// - [`HookError::AuthenticationFailure`] if the tag does not verify
#[tracing::instrument(skip_all, fields(ciphertext_len = ciphertext.len()))]
pub fn decrypt(
    ciphertext: &[u8],
    key: &[u8],
    nonce: &[u8],
) -> Result<Zeroizing<Vec<u8>>, HookError> {
    let key = build_key(key)?;
    let nonce = build_nonce(nonce)?;

    let mut in_out = ciphertext.to_vec();
    let plaintext_len = match key.open_in_place(nonce, Aad::empty(), &mut in_out) {
        Ok(plaintext) => plaintext.len(),
        Err(_) => {
            in_out.zeroize();
            tracing::debug!("[hook] tag verification failed");
            return Err(HookError::AuthenticationFailure);
        }
    };
    in_out.truncate(plaintext_len);

    Ok(Zeroizing::new(in_out))
}

/// Seals `plaintext` and appends the authentication tag.
///
/// Counterpart of [`decrypt`], used to produce payloads for the hook.
pub fn encrypt(plaintext: &[u8], key: &[u8], nonce: &[u8]) -> Result<Vec<u8>, HookError> {
    let key = build_key(key)?;
    let nonce = build_nonce(nonce)?;

    let mut in_out = plaintext.to_vec();
    key.seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
        .map_err(|_| HookError::AuthenticationFailure)?;

    Ok(in_out)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::constants::TAG_LENGTH;
    use proptest::prelude::*;

    const KEY_128: [u8; 16] = [7u8; 16];
    const KEY_256: [u8; 32] = [9u8; 32];
    const NONCE: [u8; 12] = [1u8; 12];

    #[test]
    fn test_decrypt_aes_128() {
        let ciphertext = encrypt(b"spec: {}", &KEY_128, &NONCE).unwrap();
        assert_eq!(ciphertext.len(), b"spec: {}".len() + TAG_LENGTH);

        let plaintext = decrypt(&ciphertext, &KEY_128, &NONCE).unwrap();
        assert_eq!(plaintext.as_slice(), b"spec: {}");
    }

    #[test]
    fn test_decrypt_aes_256() {
        let ciphertext = encrypt(b"hunter2", &KEY_256, &NONCE).unwrap();
        let plaintext = decrypt(&ciphertext, &KEY_256, &NONCE).unwrap();
        assert_eq!(plaintext.as_slice(), b"hunter2");
    }

    #[test]
    fn test_decrypt_empty_plaintext() {
        let ciphertext = encrypt(b"", &KEY_128, &NONCE).unwrap();
        assert_eq!(ciphertext.len(), TAG_LENGTH);
        assert!(decrypt(&ciphertext, &KEY_128, &NONCE).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_key_length() {
        let result = decrypt(&[0u8; 32], &[0u8; 15], &NONCE);
        assert_eq!(result.unwrap_err(), HookError::InvalidKeyLength(15));

        let result = decrypt(&[0u8; 32], &[0u8; 24], &NONCE);
        assert_eq!(result.unwrap_err(), HookError::InvalidKeyLength(24));
    }

    #[test]
    fn test_invalid_nonce_length() {
        let result = decrypt(&[0u8; 32], &KEY_128, &[0u8; 16]);
        assert_eq!(result.unwrap_err(), HookError::InvalidNonceLength(16));
    }

    #[test]
    fn test_wrong_key_fails_authentication() {
        let ciphertext = encrypt(b"secret", &KEY_128, &NONCE).unwrap();
        let result = decrypt(&ciphertext, &[8u8; 16], &NONCE);
        assert_eq!(result.unwrap_err(), HookError::AuthenticationFailure);
    }

    #[test]
    fn test_wrong_nonce_fails_authentication() {
        let ciphertext = encrypt(b"secret", &KEY_128, &NONCE).unwrap();
        let result = decrypt(&ciphertext, &KEY_128, &[2u8; 12]);
        assert_eq!(result.unwrap_err(), HookError::AuthenticationFailure);
    }

    #[test]
    fn test_truncated_ciphertext_fails_authentication() {
        let result = decrypt(&[0u8; TAG_LENGTH - 1], &KEY_128, &NONCE);
        assert_eq!(result.unwrap_err(), HookError::AuthenticationFailure);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_round_trip(
            plaintext in prop::collection::vec(any::<u8>(), 0..512),
            wide_key in any::<bool>(),
            key_seed in any::<[u8; 32]>(),
            nonce in any::<[u8; 12]>()
        ) {
            let key: &[u8] = if wide_key { &key_seed } else { &key_seed[..16] };

            let ciphertext = encrypt(&plaintext, key, &nonce).unwrap();
            let recovered = decrypt(&ciphertext, key, &nonce).unwrap();

            prop_assert_eq!(recovered.as_slice(), plaintext.as_slice());
        }

        #[test]
        fn prop_bit_flip_is_detected(
            plaintext in prop::collection::vec(any::<u8>(), 1..256),
            position in any::<prop::sample::Index>(),
            bit in 0u8..8
        ) {
            let mut ciphertext = encrypt(&plaintext, &KEY_256, &NONCE).unwrap();
            // covers both the ciphertext body and the trailing tag
            let index = position.index(ciphertext.len());
            ciphertext[index] ^= 1 << bit;

            prop_assert_eq!(
                decrypt(&ciphertext, &KEY_256, &NONCE).unwrap_err(),
                HookError::AuthenticationFailure
            );
        }
    }
}
