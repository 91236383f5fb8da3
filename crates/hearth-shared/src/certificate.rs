//! Community certificate authority primitives.
//!
//! A community root CA is a self-signed Ed25519 certificate. Members submit a
//! [`CertificationRequest`] signed with their own key (proof of possession);
//! the CA answers with a [`Certificate`] binding the member's nickname, onion
//! address, transport peer id and DM public key to that key for an explicit
//! validity window.
//!
//! Both travel as armored strings: base64 of the bincode encoding between
//! `-----BEGIN HEARTH ...-----` markers.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::CertificateError;
use crate::identity::{verify_signature, Identity};

const CERTIFICATE_LABEL: &str = "HEARTH CERTIFICATE";
const REQUEST_LABEL: &str = "HEARTH CERTIFICATE REQUEST";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum SignAlgorithm {
    #[default]
    Ed25519,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum HashAlgorithm {
    #[default]
    Blake3,
    Sha256,
}

impl HashAlgorithm {
    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        match self {
            HashAlgorithm::Blake3 => blake3::hash(data).as_bytes().to_vec(),
            HashAlgorithm::Sha256 => Sha256::digest(data).to_vec(),
        }
    }
}

/// Fields a certificate binds to a member key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Subject {
    /// Display nickname; the username checked for uniqueness.
    pub nickname: String,
    /// Hidden-service address the member is reachable at.
    pub common_name: String,
    /// Transport peer identifier.
    pub peer_id: String,
    /// Direct-message public key.
    pub dm_public_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct RequestInfo {
    subject: Subject,
    public_key: [u8; 32],
    sign_algorithm: SignAlgorithm,
    hash_algorithm: HashAlgorithm,
}

/// A member's certificate-signing request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CertificationRequest {
    info: RequestInfo,
    signature: Vec<u8>,
}

impl CertificationRequest {
    pub fn subject(&self) -> &Subject {
        &self.info.subject
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.info.public_key)
    }

    /// Check the request was signed by the key it asks to certify.
    pub fn verify(&self) -> Result<(), CertificateError> {
        let info_bytes = encode(&self.info)?;
        let digest = self.info.hash_algorithm.digest(&info_bytes);
        let signature = parse_signature(&self.signature)?;
        verify_signature(&self.info.public_key, &digest, &signature)
            .map_err(|_| CertificateError::InvalidRequest("proof of possession failed".into()))
    }

    pub fn to_pem(&self) -> Result<String, CertificateError> {
        Ok(armor(REQUEST_LABEL, &encode(self)?))
    }

    pub fn from_pem(pem: &str) -> Result<Self, CertificateError> {
        let bytes = dearmor(REQUEST_LABEL, pem)?;
        bincode::deserialize(&bytes)
            .map_err(|e| CertificateError::InvalidRequest(e.to_string()))
    }
}

/// Output of [`issue_csr`]: the request plus the key proving possession.
#[derive(Clone)]
pub struct IssuedCsr {
    pub request: CertificationRequest,
    pub pem: String,
    /// Hex-encoded Ed25519 secret key of the requested certificate.
    pub private_key: String,
}

/// Build a certification request for `subject`, generating a fresh key.
pub fn issue_csr(
    subject: Subject,
    sign_algorithm: SignAlgorithm,
    hash_algorithm: HashAlgorithm,
) -> Result<IssuedCsr, CertificateError> {
    issue_csr_with_identity(subject, &Identity::generate(), sign_algorithm, hash_algorithm)
}

/// Build a certification request for `subject` over an existing key.
pub fn issue_csr_with_identity(
    subject: Subject,
    identity: &Identity,
    sign_algorithm: SignAlgorithm,
    hash_algorithm: HashAlgorithm,
) -> Result<IssuedCsr, CertificateError> {
    if subject.nickname.trim().is_empty() {
        return Err(CertificateError::InvalidRequest("nickname is empty".into()));
    }

    let info = RequestInfo {
        subject,
        public_key: identity.public_key_bytes(),
        sign_algorithm,
        hash_algorithm,
    };
    let digest = hash_algorithm.digest(&encode(&info)?);
    let request = CertificationRequest {
        info,
        signature: identity.sign(&digest).to_bytes().to_vec(),
    };

    Ok(IssuedCsr {
        pem: request.to_pem()?,
        request,
        private_key: identity.secret_hex(),
    })
}

/// The signed portion of a certificate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TbsCertificate {
    pub serial: String,
    pub issuer: String,
    pub issuer_key: [u8; 32],
    pub subject: Subject,
    pub public_key: [u8; 32],
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub is_ca: bool,
    pub sign_algorithm: SignAlgorithm,
    pub hash_algorithm: HashAlgorithm,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Certificate {
    pub tbs: TbsCertificate,
    signature: Vec<u8>,
}

impl Certificate {
    fn sign(tbs: TbsCertificate, issuer: &Identity) -> Result<Self, CertificateError> {
        let digest = tbs.hash_algorithm.digest(&encode(&tbs)?);
        let signature = issuer.sign(&digest).to_bytes().to_vec();
        Ok(Self { tbs, signature })
    }

    pub fn username(&self) -> &str {
        &self.tbs.subject.nickname
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.tbs.public_key)
    }

    pub fn not_before(&self) -> DateTime<Utc> {
        self.tbs.not_before
    }

    pub fn not_after(&self) -> DateTime<Utc> {
        self.tbs.not_after
    }

    /// Stable fingerprint of the encoded certificate.
    pub fn fingerprint(&self) -> Result<String, CertificateError> {
        Ok(blake3::hash(&encode(self)?).to_hex().to_string())
    }

    pub fn verify_signature_with(&self, issuer_key: &[u8; 32]) -> Result<(), CertificateError> {
        let digest = self.tbs.hash_algorithm.digest(&encode(&self.tbs)?);
        let signature = parse_signature(&self.signature)?;
        verify_signature(issuer_key, &digest, &signature)
            .map_err(|_| CertificateError::InvalidSignature)
    }

    /// Full validity check: chains to `root` and `now` is inside the window.
    pub fn verify(&self, root: &Certificate, now: DateTime<Utc>) -> Result<(), CertificateError> {
        if !root.tbs.is_ca {
            return Err(CertificateError::NotCertificateAuthority);
        }
        if self.tbs.issuer_key != root.tbs.public_key {
            return Err(CertificateError::IssuerMismatch);
        }
        self.verify_signature_with(&root.tbs.public_key)?;

        if now < self.tbs.not_before {
            return Err(CertificateError::NotYetValid(self.tbs.not_before));
        }
        if now > self.tbs.not_after {
            return Err(CertificateError::Expired(self.tbs.not_after));
        }
        Ok(())
    }

    pub fn to_pem(&self) -> Result<String, CertificateError> {
        Ok(armor(CERTIFICATE_LABEL, &encode(self)?))
    }

    pub fn from_pem(pem: &str) -> Result<Self, CertificateError> {
        if pem.trim().is_empty() {
            return Err(CertificateError::Empty);
        }
        let bytes = dearmor(CERTIFICATE_LABEL, pem)?;
        bincode::deserialize(&bytes).map_err(|e| CertificateError::Malformed(e.to_string()))
    }
}

/// Community root CA material: certificate string plus private key string.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RootCa {
    pub certificate: String,
    pub private_key: String,
}

impl RootCa {
    /// Create a self-signed root CA for a community.
    pub fn generate(
        name: &str,
        not_before: DateTime<Utc>,
        not_after: DateTime<Utc>,
    ) -> Result<Self, CertificateError> {
        if not_before > not_after {
            return Err(CertificateError::InvertedWindow);
        }

        let identity = Identity::generate();
        let tbs = TbsCertificate {
            serial: Uuid::new_v4().to_string(),
            issuer: name.to_string(),
            issuer_key: identity.public_key_bytes(),
            subject: Subject {
                nickname: name.to_string(),
                common_name: name.to_string(),
                peer_id: String::new(),
                dm_public_key: String::new(),
            },
            public_key: identity.public_key_bytes(),
            not_before,
            not_after,
            is_ca: true,
            sign_algorithm: SignAlgorithm::Ed25519,
            hash_algorithm: HashAlgorithm::Blake3,
        };

        let certificate = Certificate::sign(tbs, &identity)?;
        Ok(Self {
            certificate: certificate.to_pem()?,
            private_key: identity.secret_hex(),
        })
    }

    pub fn parsed(&self) -> Result<Certificate, CertificateError> {
        Certificate::from_pem(&self.certificate)
    }
}

/// Issue a member certificate over `csr` with an explicit validity window.
///
/// The request is verified for proof of possession first. The window is
/// not compared with the current time here; an already expired window is
/// signed as asked and rejected later when the certificate is saved.
pub fn sign_certificate(
    root_certificate: &str,
    root_private_key: &str,
    csr: &str,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
) -> Result<String, CertificateError> {
    if not_before > not_after {
        return Err(CertificateError::InvertedWindow);
    }

    let root = Certificate::from_pem(root_certificate)?;
    if !root.tbs.is_ca {
        return Err(CertificateError::NotCertificateAuthority);
    }
    let issuer = Identity::from_secret_hex(root_private_key)?;
    if issuer.public_key_bytes() != root.tbs.public_key {
        return Err(CertificateError::IssuerMismatch);
    }

    let request = CertificationRequest::from_pem(csr)?;
    request.verify()?;

    let tbs = TbsCertificate {
        serial: Uuid::new_v4().to_string(),
        issuer: root.tbs.subject.common_name.clone(),
        issuer_key: root.tbs.public_key,
        subject: request.info.subject.clone(),
        public_key: request.info.public_key,
        not_before,
        not_after,
        is_ca: false,
        sign_algorithm: request.info.sign_algorithm,
        hash_algorithm: request.info.hash_algorithm,
    };

    Certificate::sign(tbs, &issuer)?.to_pem()
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CertificateError> {
    bincode::serialize(value).map_err(|e| CertificateError::Malformed(e.to_string()))
}

fn parse_signature(bytes: &[u8]) -> Result<ed25519_dalek::Signature, CertificateError> {
    ed25519_dalek::Signature::from_slice(bytes).map_err(|_| CertificateError::InvalidSignature)
}

fn armor(label: &str, bytes: &[u8]) -> String {
    let encoded = STANDARD.encode(bytes);
    let mut out = format!("-----BEGIN {label}-----\n");
    for chunk in encoded.as_bytes().chunks(64) {
        // base64 output is ASCII
        out.push_str(&String::from_utf8_lossy(chunk));
        out.push('\n');
    }
    out.push_str(&format!("-----END {label}-----"));
    out
}

fn dearmor(label: &str, text: &str) -> Result<Vec<u8>, CertificateError> {
    let begin = format!("-----BEGIN {label}-----");
    let end = format!("-----END {label}-----");

    let body = text
        .trim()
        .strip_prefix(&begin)
        .and_then(|rest| rest.strip_suffix(&end))
        .ok_or_else(|| CertificateError::Malformed(format!("missing {label} armor")))?;

    let joined: String = body.split_whitespace().collect();
    STANDARD
        .decode(joined)
        .map_err(|e| CertificateError::Malformed(e.to_string()))
}
