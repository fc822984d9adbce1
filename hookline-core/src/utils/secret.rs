use rand::RngCore;

/// Length in bytes of generated secrets and challenges.
pub const SECRET_BYTES: usize = 32;

/// Generate a random lowercase-hex token of [`SECRET_BYTES`] bytes.
pub fn random_hex_token() -> String {
    let mut buf = [0u8; SECRET_BYTES];
    rand::rng().fill_bytes(&mut buf);
    hex::encode(buf)
}
