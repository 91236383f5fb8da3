use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed: invalid ciphertext or wrong key")]
    DecryptionFailed,

    #[error("Invalid key length")]
    InvalidKeyLength,

    #[error("Invalid encoding: {0}")]
    InvalidEncoding(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("Invalid key bytes")]
    InvalidKeyBytes,

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Invalid hex encoding")]
    InvalidHex,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CertificateError {
    #[error("Certificate is empty")]
    Empty,

    #[error("Malformed certificate: {0}")]
    Malformed(String),

    #[error("Certificate signature does not verify against the issuer key")]
    InvalidSignature,

    #[error("Certificate was not issued by this community's root CA")]
    IssuerMismatch,

    #[error("Certificate expired at {0}")]
    Expired(DateTime<Utc>),

    #[error("Certificate is not valid before {0}")]
    NotYetValid(DateTime<Utc>),

    #[error("Validity window is inverted")]
    InvertedWindow,

    #[error("No root CA configured for this community")]
    NoRootCa,

    #[error("Issuer certificate is not a certificate authority")]
    NotCertificateAuthority,

    #[error("Invalid certification request: {0}")]
    InvalidRequest(String),

    #[error("Private key error: {0}")]
    PrivateKey(#[from] IdentityError),
}

/// First schema violation found in an inbound object.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("\"{0}\" must be of type object")]
    NotAnObject(String),

    #[error("\"{0}\" is required")]
    Missing(String),

    #[error("\"{field}\" must be {expected}")]
    WrongType {
        field: String,
        expected: &'static str,
    },

    #[error("\"{0}\" is not allowed to be empty")]
    Empty(String),

    #[error("\"{0}\" is not allowed")]
    Unknown(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("Cannot move from {from} to {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },

    #[error("Issued certificate does not match the requested key")]
    KeyMismatch,

    #[error(transparent)]
    Certificate(#[from] CertificateError),
}
