//! WireGuard key generation
//!
//! Uses x25519-dalek for base-point multiplication; keys are exchanged as
//! base64 strings like the `wg` tool produces.

/// WireGuard key pair
#[derive(Debug, Clone)]
pub struct WgKeyPair {
    pub private_key: String, // Base64
    pub public_key: String,  // Base64
}

/// Generate a WireGuard keypair using x25519
pub fn generate_wireguard_keypair() -> WgKeyPair {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use rand::RngCore;

    // Generate 32 random bytes for private key
    let mut private_key_bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut private_key_bytes);

    // Curve25519 clamping
    private_key_bytes[0] &= 248;
    private_key_bytes[31] &= 127;
    private_key_bytes[31] |= 64;

    use x25519_dalek::{PublicKey, StaticSecret};

    let secret = StaticSecret::from(private_key_bytes);
    let public = PublicKey::from(&secret);

    WgKeyPair {
        private_key: STANDARD.encode(private_key_bytes),
        public_key: STANDARD.encode(public.as_bytes()),
    }
}
