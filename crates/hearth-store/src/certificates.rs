use rusqlite::params;

use crate::database::Database;
use crate::error::Result;
use crate::models::StoredCertificate;

impl Database {
    pub fn insert_certificate(&self, stored: &StoredCertificate) -> Result<bool> {
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO certificates
                (fingerprint, certificate, username, public_key, not_before, not_after)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                stored.fingerprint,
                stored.pem,
                stored.username(),
                stored.certificate.public_key_hex(),
                stored.certificate.not_before().timestamp(),
                stored.certificate.not_after().timestamp(),
            ],
        )?;
        Ok(affected > 0)
    }

    /// Every stored certificate string, in insertion order. Rows that no
    /// longer parse are skipped with a warning.
    pub fn list_certificates(&self) -> Result<Vec<StoredCertificate>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT certificate FROM certificates ORDER BY rowid")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut certificates = Vec::new();
        for row in rows {
            let pem = row?;
            match StoredCertificate::parse(&pem) {
                Ok(stored) => certificates.push(stored),
                Err(e) => tracing::warn!(error = %e, "skipping unreadable certificate row"),
            }
        }
        Ok(certificates)
    }
}
