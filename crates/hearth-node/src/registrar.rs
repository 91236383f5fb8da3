//! Membership admission on the community owner's node.
//!
//! The registrar turns a certification request into a certificate signed by
//! the community root CA, refusing usernames that another member's valid
//! certificate already holds. A key may renew its own name. Admitted certificates go through the same append path as
//! any other certificate and are announced on the community topic.

use std::sync::Arc;

use chrono::{Duration, Utc};
use hearth_shared::certificate::{sign_certificate, CertificationRequest, RootCa};
use hearth_store::{AppendOutcome, Rejection};
use tracing::{info, warn};

use crate::error::Result;
use crate::storage::Storage;

const DEFAULT_VALIDITY_DAYS: i64 = 365;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationOutcome {
    /// PEM of the issued certificate.
    Admitted(String),
    UsernameTaken(String),
    /// The request itself was unusable.
    Invalid(String),
}

pub struct Registrar {
    storage: Arc<Storage>,
    ca: RootCa,
    validity: Duration,
}

impl Registrar {
    pub fn new(storage: Arc<Storage>, ca: RootCa) -> Self {
        Self {
            storage,
            ca,
            validity: Duration::days(DEFAULT_VALIDITY_DAYS),
        }
    }

    /// Lifetime of certificates issued from now on.
    pub fn with_validity(mut self, validity: Duration) -> Self {
        self.validity = validity;
        self
    }

    pub fn root_certificate(&self) -> &str {
        &self.ca.certificate
    }

    /// Handle one registration request.
    ///
    /// Errors are reserved for local failures (uninitialized storage, a
    /// broken root CA); problems with the request are reported in the
    /// outcome.
    pub async fn register(&self, csr_pem: &str) -> Result<RegistrationOutcome> {
        let request = match CertificationRequest::from_pem(csr_pem) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "Unparseable certification request");
                return Ok(RegistrationOutcome::Invalid(e.to_string()));
            }
        };
        if let Err(e) = request.verify() {
            warn!(error = %e, "Certification request signature invalid");
            return Ok(RegistrationOutcome::Invalid(e.to_string()));
        }

        let nickname = request.subject().nickname.clone();
        let key = request.public_key_hex();
        if self.storage.username_held_by_other(&nickname, &key).await? {
            info!(nickname = %nickname, "Registration refused, username taken");
            return Ok(RegistrationOutcome::UsernameTaken(nickname));
        }

        let now = Utc::now();
        let certificate = sign_certificate(
            &self.ca.certificate,
            &self.ca.private_key,
            csr_pem,
            now,
            now + self.validity,
        )?;

        let outcome = match self.storage.admit_certificate(&certificate).await? {
            AppendOutcome::Accepted => {
                info!(nickname = %nickname, "Member admitted");
                RegistrationOutcome::Admitted(certificate)
            }
            AppendOutcome::Rejected(Rejection::UsernameTaken(name)) => {
                RegistrationOutcome::UsernameTaken(name)
            }
            AppendOutcome::Rejected(reason) => RegistrationOutcome::Invalid(reason.to_string()),
            AppendOutcome::Duplicate => {
                RegistrationOutcome::Invalid("certificate already registered".into())
            }
        };
        Ok(outcome)
    }
}
