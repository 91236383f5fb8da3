//! Certificate validity and username uniqueness over the certificate log.

use chrono::{DateTime, Utc};
use hearth_shared::certificate::Certificate;
use hearth_shared::error::CertificateError;
use hearth_shared::username::usernames_collide;
use tracing::debug;

use crate::log::GrowOnlyLog;
use crate::models::{Rejection, StoredCertificate};

pub type CertificateLog = GrowOnlyLog<StoredCertificate>;

/// Decides which certificates count. Holds only the community root; the
/// certificates themselves stay in the log.
#[derive(Debug, Clone, Default)]
pub struct MembershipRegistry {
    root: Option<Certificate>,
}

impl MembershipRegistry {
    pub fn new(root: Option<Certificate>) -> Self {
        Self { root }
    }

    pub fn from_root_pem(pem: &str) -> Result<Self, CertificateError> {
        let root = Certificate::from_pem(pem)?;
        if !root.tbs.is_ca {
            return Err(CertificateError::NotCertificateAuthority);
        }
        Ok(Self { root: Some(root) })
    }

    pub fn root(&self) -> Option<&Certificate> {
        self.root.as_ref()
    }

    /// Chain and time-window check for one certificate.
    pub fn verify(&self, certificate: &Certificate, now: DateTime<Utc>) -> Result<(), CertificateError> {
        let root = self.root.as_ref().ok_or(CertificateError::NoRootCa)?;
        certificate.verify(root, now)
    }

    /// Certificates that chain to the root and are inside their window.
    pub fn valid<'a>(
        &'a self,
        log: &'a CertificateLog,
        now: DateTime<Utc>,
    ) -> impl Iterator<Item = &'a StoredCertificate> + 'a {
        log.iter()
            .filter(move |stored| self.verify(&stored.certificate, now).is_ok())
    }

    pub fn username_exists(&self, log: &CertificateLog, username: &str, now: DateTime<Utc>) -> bool {
        self.valid(log, now)
            .any(|stored| usernames_collide(stored.username(), username))
    }

    /// Whether a valid certificate for a key other than `public_key_hex`
    /// holds a name colliding with `username`.
    pub fn username_held_by_other(
        &self,
        log: &CertificateLog,
        username: &str,
        public_key_hex: &str,
        now: DateTime<Utc>,
    ) -> bool {
        self.valid(log, now).any(|stored| {
            usernames_collide(stored.username(), username)
                && stored.certificate.public_key_hex() != public_key_hex
        })
    }

    pub fn is_member(&self, log: &CertificateLog, public_key_hex: &str, now: DateTime<Utc>) -> bool {
        self.valid(log, now)
            .any(|stored| stored.certificate.public_key_hex() == public_key_hex)
    }

    /// Decide whether `pem` may join the log.
    ///
    /// `Ok(None)` means the exact certificate is already present. A valid
    /// certificate whose username collides with another member's valid
    /// certificate is rejected; the same key renewing its own name is not a
    /// collision.
    pub fn admit(
        &self,
        log: &CertificateLog,
        pem: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<StoredCertificate>, Rejection> {
        if pem.trim().is_empty() {
            return Err(Rejection::Certificate(CertificateError::Empty));
        }
        let stored = StoredCertificate::parse(pem)?;
        if log.contains(&stored.fingerprint) {
            return Ok(None);
        }
        self.verify(&stored.certificate, now)?;

        let key = stored.certificate.public_key_hex();
        if self.username_held_by_other(log, stored.username(), &key, now) {
            debug!(username = stored.username(), "username collision");
            return Err(Rejection::UsernameTaken(stored.username().to_string()));
        }
        Ok(Some(stored))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use hearth_shared::certificate::{
        issue_csr, sign_certificate, HashAlgorithm, RootCa, SignAlgorithm, Subject,
    };

    fn subject(nickname: &str) -> Subject {
        Subject {
            nickname: nickname.into(),
            common_name: format!("{nickname}.onion"),
            peer_id: format!("peer-{nickname}"),
            dm_public_key: "dm".into(),
        }
    }

    fn cert_for(root: &RootCa, nickname: &str, nb: DateTime<Utc>, na: DateTime<Utc>) -> String {
        let csr = issue_csr(subject(nickname), SignAlgorithm::Ed25519, HashAlgorithm::Blake3)
            .unwrap();
        sign_certificate(&root.certificate, &root.private_key, &csr.pem, nb, na).unwrap()
    }

    fn setup() -> (RootCa, MembershipRegistry, DateTime<Utc>) {
        let now = Utc::now();
        let root = RootCa::generate("community", now - Duration::days(1), now + Duration::days(365))
            .unwrap();
        let registry = MembershipRegistry::from_root_pem(&root.certificate).unwrap();
        (root, registry, now)
    }

    #[test]
    fn test_admit_and_lookup() {
        let (root, registry, now) = setup();
        let mut log = CertificateLog::new();
        let pem = cert_for(&root, "userName", now, now + Duration::days(1));

        let stored = registry.admit(&log, &pem, now).unwrap().unwrap();
        let key = stored.certificate.public_key_hex();
        log.insert(stored);

        assert!(registry.username_exists(&log, "userName", now));
        assert!(registry.username_exists(&log, "username", now));
        assert!(registry.username_exists(&log, "userNąme", now));
        assert!(!registry.username_exists(&log, "someone", now));
        assert!(registry.is_member(&log, &key, now));
        assert!(!registry.username_held_by_other(&log, "USERNAME", &key, now));
        assert!(registry.username_held_by_other(&log, "USERNAME", &"0".repeat(64), now));

        // Same certificate again is a duplicate, not a collision.
        assert_eq!(registry.admit(&log, &pem, now), Ok(None));
    }

    #[test]
    fn test_expired_certificate_rejected() {
        let (root, registry, now) = setup();
        let pem = cert_for(
            &root,
            "late",
            Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2021, 1, 2, 0, 0, 0).unwrap(),
        );
        assert!(matches!(
            registry.admit(&CertificateLog::new(), &pem, now),
            Err(Rejection::Certificate(CertificateError::Expired(_)))
        ));
    }

    #[test]
    fn test_collision_between_members() {
        let (root, registry, now) = setup();
        let mut log = CertificateLog::new();
        let first = cert_for(&root, "alice", now, now + Duration::days(1));
        log.insert(registry.admit(&log, &first, now).unwrap().unwrap());

        let second = cert_for(&root, "ALÍCE", now, now + Duration::days(1));
        assert_eq!(
            registry.admit(&log, &second, now),
            Err(Rejection::UsernameTaken("ALÍCE".into()))
        );
    }

    #[test]
    fn test_foreign_root_rejected() {
        let (_, registry, now) = setup();
        let other = RootCa::generate("other", now, now + Duration::days(1)).unwrap();
        let pem = cert_for(&other, "mallory", now, now + Duration::days(1));
        assert_eq!(
            registry.admit(&CertificateLog::new(), &pem, now),
            Err(Rejection::Certificate(CertificateError::IssuerMismatch))
        );
    }

    #[test]
    fn test_empty_and_garbage_rejected() {
        let (_, registry, now) = setup();
        let log = CertificateLog::new();
        assert!(registry.admit(&log, "", now).is_err());
        assert!(registry.admit(&log, "   ", now).is_err());
        assert!(registry.admit(&log, "garbage", now).is_err());
    }

    #[test]
    fn test_no_root_rejects_everything() {
        let (root, _, now) = setup();
        let pem = cert_for(&root, "alice", now, now + Duration::days(1));
        assert_eq!(
            MembershipRegistry::default().admit(&CertificateLog::new(), &pem, now),
            Err(Rejection::Certificate(CertificateError::NoRootCa))
        );
    }
}
