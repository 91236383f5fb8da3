use serde::{Deserialize, Serialize};

use crate::certificate::{
    issue_csr_with_identity, Certificate, HashAlgorithm, RootCa, SignAlgorithm, Subject,
};
use crate::error::RegistrationError;
use crate::identity::Identity;
use crate::types::CommunityId;

/// Community descriptor. Only the founder holds `ca`; everyone else holds
/// the root certificate in `root_ca`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Community {
    pub id: CommunityId,
    pub name: String,
    pub registrar_url: Option<String>,
    pub onion_address: Option<String>,
    pub port: Option<u16>,
    pub ca: Option<RootCa>,
    pub root_ca: String,
    pub peer_list: Vec<String>,
    pub registration_attempts: u32,
}

impl Community {
    pub fn new(id: CommunityId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            registrar_url: None,
            onion_address: None,
            port: None,
            ca: None,
            root_ca: String::new(),
            peer_list: Vec::new(),
            registration_attempts: 0,
        }
    }

    /// Founding constructor: carries the root CA and its certificate.
    pub fn founded(id: CommunityId, name: impl Into<String>, ca: RootCa) -> Self {
        let mut community = Self::new(id, name);
        community.root_ca = ca.certificate.clone();
        community.ca = Some(ca);
        community
    }

    pub fn is_owner(&self) -> bool {
        self.ca.is_some()
    }

    /// Address the registrar is reachable at: the hidden-service address
    /// when the community publishes one, else the configured URL.
    pub fn registrar_address(&self) -> Option<String> {
        match (&self.onion_address, self.port) {
            (Some(onion), Some(port)) => Some(format!("{onion}:{port}")),
            _ => self.registrar_url.clone(),
        }
    }

    /// Merge peers into the peer list; returns how many were new.
    pub fn add_peers<I, S>(&mut self, peers: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut added = 0;
        for peer in peers {
            let peer = peer.into();
            if !peer.is_empty() && !self.peer_list.contains(&peer) {
                self.peer_list.push(peer);
                added += 1;
            }
        }
        added
    }

    pub fn record_registration_attempt(&mut self) -> u32 {
        self.registration_attempts += 1;
        self.registration_attempts
    }

    pub fn root_certificate(&self) -> Option<Result<Certificate, crate::error::CertificateError>> {
        if self.root_ca.trim().is_empty() {
            None
        } else {
            Some(Certificate::from_pem(&self.root_ca))
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HiddenService {
    pub onion_address: String,
    pub private_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KeyPair {
    pub public_key: String,
    pub private_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserCsr {
    pub user_csr: String,
    pub user_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum RegistrationState {
    Unregistered,
    CsrIssued,
    CertificateRequested,
    Admitted,
    Rejected(String),
}

impl RegistrationState {
    fn name(&self) -> &'static str {
        match self {
            RegistrationState::Unregistered => "unregistered",
            RegistrationState::CsrIssued => "csr-issued",
            RegistrationState::CertificateRequested => "certificate-requested",
            RegistrationState::Admitted => "admitted",
            RegistrationState::Rejected(_) => "rejected",
        }
    }
}

/// A member's identity within one community.
///
/// Registration moves through
/// `Unregistered -> CsrIssued -> CertificateRequested -> Admitted`, with
/// `Rejected` reachable from `CertificateRequested`. A rejected member may
/// issue a new request (for example under another nickname).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemberIdentity {
    pub community: CommunityId,
    pub nickname: String,
    pub hidden_service: HiddenService,
    pub dm_keys: KeyPair,
    pub peer_id: String,
    pub user_csr: Option<UserCsr>,
    pub user_certificate: Option<String>,
    pub state: RegistrationState,
}

impl MemberIdentity {
    pub fn new(
        community: CommunityId,
        nickname: impl Into<String>,
        hidden_service: HiddenService,
        dm_keys: KeyPair,
        peer_id: impl Into<String>,
    ) -> Self {
        Self {
            community,
            nickname: nickname.into(),
            hidden_service,
            dm_keys,
            peer_id: peer_id.into(),
            user_csr: None,
            user_certificate: None,
            state: RegistrationState::Unregistered,
        }
    }

    fn transition(&mut self, to: RegistrationState) -> Result<(), RegistrationError> {
        use RegistrationState::*;
        let allowed = matches!(
            (&self.state, &to),
            (Unregistered | Rejected(_), CsrIssued)
                | (CsrIssued, CertificateRequested)
                | (CertificateRequested, Admitted)
                | (CertificateRequested, Rejected(_))
        );
        if !allowed {
            return Err(RegistrationError::InvalidTransition {
                from: self.state.name(),
                to: to.name(),
            });
        }
        self.state = to;
        Ok(())
    }

    /// Generate a fresh signing key and a CSR for the current nickname.
    pub fn issue_csr(&mut self, hash_algorithm: HashAlgorithm) -> Result<&UserCsr, RegistrationError> {
        let identity = Identity::generate();
        let issued = issue_csr_with_identity(
            Subject {
                nickname: self.nickname.clone(),
                common_name: self.hidden_service.onion_address.clone(),
                peer_id: self.peer_id.clone(),
                dm_public_key: self.dm_keys.public_key.clone(),
            },
            &identity,
            SignAlgorithm::Ed25519,
            hash_algorithm,
        )?;
        self.transition(RegistrationState::CsrIssued)?;
        self.user_certificate = None;
        Ok(self.user_csr.insert(UserCsr {
            user_csr: issued.pem,
            user_key: issued.private_key,
        }))
    }

    pub fn mark_requested(&mut self) -> Result<(), RegistrationError> {
        self.transition(RegistrationState::CertificateRequested)
    }

    /// Accept the certificate returned by the registrar.
    pub fn admit(&mut self, certificate: String) -> Result<(), RegistrationError> {
        let parsed = Certificate::from_pem(&certificate)?;
        let key = self
            .signing_identity()
            .ok_or(RegistrationError::KeyMismatch)?
            .public_key_hex();
        if parsed.public_key_hex() != key {
            return Err(RegistrationError::KeyMismatch);
        }
        self.transition(RegistrationState::Admitted)?;
        self.user_certificate = Some(certificate);
        Ok(())
    }

    pub fn reject(&mut self, reason: impl Into<String>) -> Result<(), RegistrationError> {
        self.transition(RegistrationState::Rejected(reason.into()))
    }

    /// Rename before re-requesting, e.g. after a username collision.
    pub fn rename(&mut self, nickname: impl Into<String>) {
        self.nickname = nickname.into();
    }

    /// Key bound to the CSR; signs the member's messages once admitted.
    pub fn signing_identity(&self) -> Option<Identity> {
        self.user_csr
            .as_ref()
            .and_then(|csr| Identity::from_secret_hex(&csr.user_key).ok())
    }

    pub fn is_admitted(&self) -> bool {
        self.state == RegistrationState::Admitted
    }
}
