use anyhow::{anyhow, Result};
use base64::{engine::general_purpose, Engine};
use ed25519::pkcs8::{DecodePrivateKey, EncodePrivateKey, KeypairBytes};
use ed25519_dalek::{Keypair, PublicKey, SecretKey, Signature, Signer, Verifier};
use rand::rngs::OsRng;

pub type PublicKeyBytes = [u8; 32];

pub fn generate_keypair() -> Keypair {
    let mut rng = OsRng {};
    Keypair::generate(&mut rng)
}

pub fn keypair_to_pem(keypair: &Keypair) -> Result<String> {
    let kpb = keypair_to_bytes(keypair);
    let pem = kpb
        .to_pkcs8_pem(pkcs8::LineEnding::LF)
        .map_err(|e| anyhow!("encode pkcs8 key: {e}"))?;
    Ok(pem.to_string())
}

pub fn keypair_from_pem(pem: &str) -> Result<Keypair> {
    let kpb = KeypairBytes::from_pkcs8_pem(pem).map_err(|e| anyhow!("decode pkcs8 key: {e}"))?;
    keypair_from_bytes(kpb)
}

pub fn publickey_to_base64(pubkey: PublicKeyBytes) -> String {
    general_purpose::STANDARD.encode(pubkey)
}

pub fn publickey_from_base64(b64: &str) -> Result<PublicKeyBytes> {
    let key_vec = general_purpose::STANDARD.decode(b64.trim())?;
    Ok(key_vec.as_slice().try_into()?)
}

pub fn keypair_to_bytes(keypair: &Keypair) -> KeypairBytes {
    KeypairBytes {
        secret_key: keypair.secret.to_bytes(),
        public_key: Some(keypair.public.to_bytes()),
    }
}

pub fn keypair_from_bytes(kpb: KeypairBytes) -> Result<Keypair> {
    let secret = SecretKey::from_bytes(&kpb.secret_key)?;
    let public = match kpb.public_key {
        Some(pubkey) => PublicKey::from_bytes(&pubkey)?,
        None => (&secret).into(),
    };
    Ok(Keypair { secret, public })
}

pub fn sign(keypair: &Keypair, msg: &[u8]) -> Vec<u8> {
    keypair.sign(msg).to_bytes().to_vec()
}

pub fn verify(pubkey: &PublicKeyBytes, msg: &[u8], signature: &[u8]) -> Result<()> {
    let public = PublicKey::from_bytes(pubkey)?;
    let signature = Signature::try_from(signature)?;
    public.verify(msg, &signature)?;
    Ok(())
}

#[cfg(test)]
mod crypto_test {
    use super::*;

    #[test]
    fn pem_keeps_public_key() {
        let keypair = generate_keypair();
        let pem = keypair_to_pem(&keypair).unwrap();
        let restored = keypair_from_pem(&pem).unwrap();
        assert_eq!(keypair.public.to_bytes(), restored.public.to_bytes());

        let b64 = publickey_to_base64(restored.public.to_bytes());
        assert_eq!(
            publickey_from_base64(&b64).unwrap(),
            keypair.public.to_bytes()
        );
    }

    #[test]
    fn signature_binds_message() {
        let keypair = generate_keypair();
        let pubkey = keypair.public.to_bytes();
        let signature = sign(&keypair, b"proposal");
        assert!(verify(&pubkey, b"proposal", &signature).is_ok());
        assert!(verify(&pubkey, b"tampered", &signature).is_err());
    }
}
