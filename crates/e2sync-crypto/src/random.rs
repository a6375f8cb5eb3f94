//! Random key material and opaque names

use rand::distributions::Alphanumeric;
use rand::{Rng, RngCore};

/// Generate `len` random bytes from the thread-local CSPRNG.
pub fn generate_random(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// Generate a printable random string of exactly `len` ASCII alphanumerics.
pub fn generate_random_string(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}
