//! Signing and verifying integrity blocks.

use crate::block::{
    obtain_integrity_block, IntegrityBlock, IntegritySignature, ED25519_PUBLIC_KEY_ATTRIBUTE,
};
use crate::error::IntegrityError;
use crate::id::web_bundle_id;
use bytes::{Bytes, BytesMut};
use ed25519_dalek::{Signature, Signer as _, SigningKey, VerifyingKey};
use sha2::{Digest, Sha512};
use std::collections::BTreeMap;
use tracing::debug;
use webbundle_signing::PrivateKey;
use webbundle_wire::deterministic;

/// SHA-512 of the web bundle bytes (everything after the integrity block)
pub fn web_bundle_hash(web_bundle: &[u8]) -> [u8; 64] {
    Sha512::digest(web_bundle).into()
}

/// Message an integrity signature covers: each part prefixed with its
/// 8-byte big-endian length.
pub fn data_to_be_signed(web_bundle_hash: &[u8], integrity_block: &[u8], attributes: &[u8]) -> Vec<u8> {
    let parts = [web_bundle_hash, integrity_block, attributes];
    let mut message = Vec::with_capacity(parts.iter().map(|p| 8 + p.len()).sum());
    for part in parts {
        message.extend_from_slice(&(part.len() as u64).to_be_bytes());
        message.extend_from_slice(part);
    }
    message
}

/// Adds Ed25519 signatures to integrity blocks
pub struct IntegrityBlockSigner {
    key: SigningKey,
    public_key: VerifyingKey,
}

impl IntegrityBlockSigner {
    /// Signer for `key`, advertising its own public key
    pub fn new(key: SigningKey) -> Self {
        let public_key = key.verifying_key();
        Self { key, public_key }
    }

    /// Signer that advertises `public_key`. Every new signature is checked
    /// against it before it is added.
    pub fn with_public_key(key: SigningKey, public_key: VerifyingKey) -> Self {
        Self { key, public_key }
    }

    /// Read an Ed25519 PKCS#8 PEM private key
    pub fn from_pem(pem: &str) -> Result<Self, IntegrityError> {
        match PrivateKey::from_pem(pem).map_err(|e| IntegrityError::Key(e.to_string()))? {
            PrivateKey::Ed25519(key) => Ok(Self::new(key)),
            other => Err(IntegrityError::Key(format!(
                "integrity blocks are signed with Ed25519, got {}",
                other.algorithm_name()
            ))),
        }
    }

    /// Public key recorded in new signatures
    pub fn public_key(&self) -> VerifyingKey {
        self.public_key
    }

    /// Web Bundle ID of [`Self::public_key`]
    pub fn web_bundle_id(&self) -> String {
        web_bundle_id(&self.public_key)
    }

    /// Attributes recorded with each new signature
    pub fn attributes(&self) -> BTreeMap<String, Bytes> {
        let mut attributes = BTreeMap::new();
        attributes.insert(
            ED25519_PUBLIC_KEY_ATTRIBUTE.to_string(),
            Bytes::copy_from_slice(self.public_key.as_bytes()),
        );
        attributes
    }

    /// Sign the web bundle hash together with the current block and push
    /// the new signature on top of the stack.
    pub fn sign_and_add_new_signature(
        &self,
        block: &mut IntegrityBlock,
        web_bundle_hash: &[u8],
    ) -> Result<(), IntegrityError> {
        let block_bytes = block.encode()?;
        deterministic::validate(&block_bytes)?;

        let mut entry = IntegritySignature {
            attributes: self.attributes(),
            signature: Bytes::new(),
        };
        let attributes = entry.encode_attributes()?;
        deterministic::validate(&attributes)?;

        let message = data_to_be_signed(web_bundle_hash, &block_bytes, &attributes);
        let signature = self.key.sign(&message);
        self.public_key
            .verify_strict(&message, &signature)
            .map_err(|_| IntegrityError::SelfCheck)?;

        entry.signature = Bytes::copy_from_slice(&signature.to_bytes());
        block.signature_stack.insert(0, entry);
        debug!(
            web_bundle_id = %self.web_bundle_id(),
            signatures = block.signature_stack.len(),
            "added integrity signature"
        );
        Ok(())
    }

    /// Sign a web bundle, or a bundle that already carries an integrity
    /// block, and return the block followed by the web bundle bytes.
    pub fn sign(&self, input: Bytes) -> Result<Bytes, IntegrityError> {
        let (mut block, offset) = obtain_integrity_block(&input)?;
        let web_bundle = input.slice(offset..);
        self.sign_and_add_new_signature(&mut block, &web_bundle_hash(&web_bundle))?;

        let block_bytes = block.encode()?;
        let mut out = BytesMut::with_capacity(block_bytes.len() + web_bundle.len());
        out.extend_from_slice(&block_bytes);
        out.extend_from_slice(&web_bundle);
        Ok(out.freeze())
    }
}

/// Check every signature in the stack against the web bundle.
///
/// Each signature covers the block as it was when that signature was added,
/// that is the entries below it. Returns the signers' public keys, newest
/// first.
pub fn verify_signature_stack(
    block: &IntegrityBlock,
    web_bundle: &[u8],
) -> Result<Vec<VerifyingKey>, IntegrityError> {
    let hash = web_bundle_hash(web_bundle);
    let stack = &block.signature_stack;
    let mut keys = Vec::with_capacity(stack.len());

    for (index, entry) in stack.iter().enumerate().rev() {
        let public_key = entry.ed25519_public_key(index)?;
        let previous = IntegrityBlock::with_signatures(stack[index + 1..].to_vec()).encode()?;
        let message = data_to_be_signed(&hash, &previous, &entry.encode_attributes()?);
        let signature =
            Signature::from_slice(&entry.signature).map_err(|_| IntegrityError::Signature(index))?;
        public_key
            .verify_strict(&message, &signature)
            .map_err(|_| IntegrityError::Signature(index))?;
        keys.push(public_key);
    }

    keys.reverse();
    Ok(keys)
}

/// Split a signed bundle and verify its integrity block. A bundle without a
/// block verifies with no signers.
pub fn verify_signed_bundle(input: &Bytes) -> Result<Vec<VerifyingKey>, IntegrityError> {
    let (block, offset) = obtain_integrity_block(input)?;
    verify_signature_stack(&block, &input[offset..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::has_integrity_block;

    const KEY: &str = include_str!("../testdata/ed25519.key");
    const WEB_BUNDLE: &[u8] = b"test web bundle";

    #[test]
    fn test_data_to_be_signed_layout() {
        let message = data_to_be_signed(b"h", b"bb", b"");
        let expected: Vec<u8> = vec![
            0, 0, 0, 0, 0, 0, 0, 1, b'h',
            0, 0, 0, 0, 0, 0, 0, 2, b'b', b'b',
            0, 0, 0, 0, 0, 0, 0, 0,
        ];
        assert_eq!(message, expected);
    }

    #[test]
    fn test_sign_is_pinned() {
        let signer = IntegrityBlockSigner::from_pem(KEY).unwrap();
        let signed = signer.sign(Bytes::from_static(WEB_BUNDLE)).unwrap();
        assert!(has_integrity_block(&signed));
        assert_eq!(signed.len(), 135 + WEB_BUNDLE.len());
        assert!(signed.ends_with(WEB_BUNDLE));

        let (block, offset) = obtain_integrity_block(&signed).unwrap();
        assert_eq!(offset, 135);
        assert_eq!(
            hex::encode(&block.signature_stack[0].signature),
            "24c0a91fb286991e46ce5ef27a371b59d1b91fc2fbf11eaa17dec2a54d574e2f\
             476a666d10ca0bee8b015d4d2b725cd8950d4473b3ccaab7a4a660c3a5bfeb0d"
        );
    }

    #[test]
    fn test_signatures_stack_newest_first() {
        let signer = IntegrityBlockSigner::from_pem(KEY).unwrap();
        let once = signer.sign(Bytes::from_static(WEB_BUNDLE)).unwrap();
        let twice = signer.sign(once.clone()).unwrap();

        let (block, _) = obtain_integrity_block(&twice).unwrap();
        assert_eq!(block.signature_stack.len(), 2);
        assert_eq!(
            hex::encode(&block.signature_stack[0].signature),
            "19f4aca89cfb2e698813e969de8dac0d8b6865361977ed39f9c9a4ab76aca476\
             68223f0d9c2542b18d5730ccad04f799400ee519961875463dfc0bf5a6ad630f"
        );

        let keys = verify_signed_bundle(&twice).unwrap();
        assert_eq!(keys, vec![signer.public_key(), signer.public_key()]);
    }

    #[test]
    fn test_verify_detects_tampering() {
        let signer = IntegrityBlockSigner::from_pem(KEY).unwrap();
        let signed = signer.sign(Bytes::from_static(WEB_BUNDLE)).unwrap();

        let mut tampered = signed.to_vec();
        let last = tampered.len() - 1;
        tampered[last] ^= 0x01;
        assert!(matches!(
            verify_signed_bundle(&Bytes::from(tampered)),
            Err(IntegrityError::Signature(0))
        ));

        let twice = signer.sign(signed).unwrap();
        let (mut block, offset) = obtain_integrity_block(&twice).unwrap();
        block.signature_stack.swap(0, 1);
        assert!(verify_signature_stack(&block, &twice[offset..]).is_err());
    }

    #[test]
    fn test_unsigned_bundle_has_no_signers() {
        let keys = verify_signed_bundle(&Bytes::from_static(WEB_BUNDLE)).unwrap();
        assert!(keys.is_empty());
    }

    #[test]
    fn test_self_check_catches_wrong_public_key() {
        let key = SigningKey::from_bytes(&[7u8; 32]);
        let other = SigningKey::from_bytes(&[8u8; 32]).verifying_key();
        let signer = IntegrityBlockSigner::with_public_key(key, other);
        let mut block = IntegrityBlock::new();
        assert!(matches!(
            signer.sign_and_add_new_signature(&mut block, &web_bundle_hash(WEB_BUNDLE)),
            Err(IntegrityError::SelfCheck)
        ));
        assert!(block.signature_stack.is_empty());
    }

    #[test]
    fn test_rejects_non_ed25519_key() {
        let p256 = include_str!("../../signing/testdata/p256.key");
        assert!(matches!(
            IntegrityBlockSigner::from_pem(p256),
            Err(IntegrityError::Key(_))
        ));
    }

    #[test]
    fn test_web_bundle_id_from_pem() {
        let signer = IntegrityBlockSigner::from_pem(KEY).unwrap();
        assert_eq!(
            signer.web_bundle_id(),
            "aoqqpp7tzyil4hlq3umoos6atft6jvrqtosq2xy53sdgiesvgg4aaaic"
        );
    }
}
