//! Password hashing and bearer tokens.
//!
//! Bearer secrets are handed to the client once; the store only ever sees their SHA-512 digest.

use argon2::{
    password_hash::{rand_core::OsRng, SaltString},
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rs_sha512::HasherContext;
use std::hash::Hasher;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Stored password hash could not be parsed: {0}")]
    StoredPasswordUnableToParse(argon2::password_hash::Error),
    #[error("Password could not be verified: {0}")]
    PasswordUnableToVerify(argon2::password_hash::Error),
    #[error("Password hash failed: {0}")]
    PasswordHash(argon2::password_hash::Error),
}

pub fn hash_password(password: &str) -> Result<String, Error> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(Error::PasswordHash)
}

/// `Ok(false)` for a wrong password or an account without a usable one.
pub fn verify_password(password: &str, stored: Option<&str>) -> Result<bool, Error> {
    let Some(stored) = stored else {
        return Ok(false);
    };
    let parsed = PasswordHash::new(stored).map_err(Error::StoredPasswordUnableToParse)?;
    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(err) => Err(Error::PasswordUnableToVerify(err)),
    }
}

pub struct IssuedToken {
    pub secret: String,
    pub digest: String,
}

pub fn issue_token() -> IssuedToken {
    let secret = URL_SAFE_NO_PAD.encode(rand::random::<[u8; 32]>());
    let digest = digest(&secret);
    IssuedToken { secret, digest }
}

pub fn digest(secret: &str) -> String {
    let mut hasher = rs_sha512::Sha512Hasher::default();
    hasher.write(secret.as_bytes());
    let _ = hasher.finish();
    let result: [u8; 64] = HasherContext::finish(&mut hasher).into();
    result.iter().map(|b| format!("{b:02x}")).collect()
}
