use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use certchain_core::{CertificateAttributes, Fingerprint};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension as _};
use uuid::Uuid;

use super::{IssueClaim, ListFilter, RecordStore, Transition};
use crate::audit::{canonical_event_payload, compute_chain_hash_hex, genesis_hash_hex};
use crate::types::{
    AuditEvent, CertificateRecord, CertificateStatus, ContentAddress, LedgerReference,
    LifecycleAction, RevocationRecord, VerificationStatus,
};
use crate::{Error, Result};

const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS certificates (
  id TEXT PRIMARY KEY,
  subject_id TEXT NOT NULL,
  issuer_id TEXT NOT NULL,

  subject_name TEXT NOT NULL,
  course_name TEXT NOT NULL,
  completion_date TEXT NOT NULL,
  issuer_name TEXT NOT NULL,
  fingerprint TEXT NOT NULL,

  ledger_reference TEXT NULL,
  content_address TEXT NULL,
  document_hash TEXT NULL,

  status TEXT NOT NULL,
  verification_status TEXT NOT NULL,
  status_reason TEXT NULL,
  requested_at TEXT NOT NULL,
  updated_at TEXT NOT NULL,

  issue_claim TEXT NULL,
  issue_claimed_at TEXT NULL,

  CHECK (status NOT IN ('issued', 'revoked') OR ledger_reference IS NOT NULL)
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_cert_fingerprint ON certificates(fingerprint);
CREATE INDEX IF NOT EXISTS idx_cert_subject ON certificates(subject_id);
CREATE INDEX IF NOT EXISTS idx_cert_issuer ON certificates(issuer_id);
CREATE INDEX IF NOT EXISTS idx_cert_status ON certificates(status);

CREATE TABLE IF NOT EXISTS certificate_events (
  event_id TEXT PRIMARY KEY,
  certificate_id TEXT NOT NULL,
  sequence INTEGER NOT NULL,
  timestamp TEXT NOT NULL,
  action TEXT NOT NULL,
  from_status TEXT NULL,
  to_status TEXT NOT NULL,
  actor TEXT NULL,
  detail TEXT NULL,
  previous_hash TEXT NOT NULL,
  content_hash TEXT NOT NULL,
  UNIQUE (certificate_id, sequence)
);

CREATE TABLE IF NOT EXISTS revocations (
  certificate_id TEXT PRIMARY KEY,
  revoked_at TEXT NOT NULL,
  reason TEXT NOT NULL,
  revoked_by TEXT NOT NULL,
  ledger_revocation_reference TEXT NULL
);
"#;

const CERT_COLUMNS: &str = "id, subject_id, issuer_id, subject_name, course_name, completion_date, issuer_name, fingerprint, ledger_reference, content_address, document_hash, status, verification_status, status_reason, requested_at, updated_at";

const EVENT_COLUMNS: &str = "event_id, certificate_id, sequence, timestamp, action, from_status, to_status, actor, detail, previous_hash, content_hash";

pub struct SqliteRecordStore {
    conn: Mutex<Connection>,
}

impl SqliteRecordStore {
    fn lock_conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|err| err.into_inner())
    }

    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA busy_timeout=5000;")?;
        conn.execute_batch(CREATE_TABLES)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(CREATE_TABLES)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl RecordStore for SqliteRecordStore {
    fn insert(&self, record: &CertificateRecord, actor: Option<&str>) -> Result<()> {
        let conn = self.lock_conn();
        let tx = conn.unchecked_transaction()?;

        let inserted = tx.execute(
            &format!("INSERT INTO certificates ({CERT_COLUMNS}) VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?)"),
            params![
                record.id,
                record.subject_id,
                record.issuer_id,
                record.attributes.subject_name,
                record.attributes.course_name,
                record.attributes.completion_date,
                record.attributes.issuer_name,
                record.fingerprint.to_hex(),
                record.ledger_reference.as_ref().map(|r| r.0.as_str()),
                record.content_address.as_ref().map(|a| a.0.as_str()),
                record.document_hash,
                record.status.as_db_str(),
                record.verification_status.as_db_str(),
                record.status_reason,
                record.requested_at,
                record.updated_at,
            ],
        );
        match inserted {
            Ok(_) => {}
            Err(err) if is_fingerprint_conflict(&err) => {
                return Err(Error::DuplicateFingerprint {
                    fingerprint: record.fingerprint.to_hex(),
                })
            }
            Err(err) => return Err(err.into()),
        }

        append_event(
            &tx,
            &record.id,
            LifecycleAction::Request,
            None,
            record.status,
            actor,
            BTreeMap::new(),
            &record.requested_at,
        )?;

        tx.commit()?;
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<CertificateRecord>> {
        let conn = self.lock_conn();
        load_record(&conn, id)
    }

    fn find_by_fingerprint(&self, fingerprint: &Fingerprint) -> Result<Option<CertificateRecord>> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {CERT_COLUMNS} FROM certificates WHERE fingerprint = ?"
        ))?;
        let record = stmt
            .query_row(params![fingerprint.to_hex()], row_to_record)
            .optional()?;
        Ok(record)
    }

    fn list(&self, filter: &ListFilter) -> Result<Vec<CertificateRecord>> {
        let conn = self.lock_conn();

        let mut sql = format!("SELECT {CERT_COLUMNS} FROM certificates WHERE 1=1");
        let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(subject_id) = filter.subject_id.as_ref() {
            sql.push_str(" AND subject_id = ?");
            params_vec.push(Box::new(subject_id.clone()));
        }
        if let Some(issuer_id) = filter.issuer_id.as_ref() {
            sql.push_str(" AND issuer_id = ?");
            params_vec.push(Box::new(issuer_id.clone()));
        }
        if let Some(status) = filter.status {
            sql.push_str(" AND status = ?");
            params_vec.push(Box::new(status.as_db_str()));
        }

        sql.push_str(" ORDER BY requested_at DESC, id DESC");
        sql.push_str(&format!(
            " LIMIT {} OFFSET {}",
            filter.effective_limit(),
            filter.offset.unwrap_or(0)
        ));

        let params_refs: Vec<&dyn rusqlite::ToSql> =
            params_vec.iter().map(|p| p.as_ref()).collect();

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_refs.as_slice(), row_to_record)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    fn apply_transition(&self, id: &str, transition: &Transition) -> Result<CertificateRecord> {
        let (from, to) = transition.action.edge();

        let conn = self.lock_conn();
        let tx = conn.unchecked_transaction()?;
        let now = now_rfc3339_nanos();

        let changed = match from {
            Some(from) => tx.execute(
                r#"UPDATE certificates SET
                  status = ?1,
                  updated_at = ?2,
                  ledger_reference = COALESCE(?3, ledger_reference),
                  content_address = COALESCE(?4, content_address),
                  document_hash = COALESCE(?5, document_hash),
                  status_reason = COALESCE(?6, status_reason),
                  issue_claim = NULL,
                  issue_claimed_at = NULL
                WHERE id = ?7 AND status = ?8 AND (?9 IS NULL OR issue_claim = ?9)"#,
                params![
                    to.as_db_str(),
                    now,
                    transition.ledger_reference.as_ref().map(|r| r.0.as_str()),
                    transition.content_address.as_ref().map(|a| a.0.as_str()),
                    transition.document_hash,
                    transition.status_reason,
                    id,
                    from.as_db_str(),
                    transition.claim,
                ],
            )?,
            None => 0,
        };

        if changed == 0 {
            return Err(match load_record(&tx, id)? {
                None => Error::NotFound { id: id.to_string() },
                Some(current) if from == Some(current.status) => Error::Conflict(format!(
                    "issue claim on certificate {id} is no longer held"
                )),
                Some(current) => Error::InvalidTransition {
                    id: id.to_string(),
                    action: transition.action,
                    from: current.status,
                },
            });
        }

        if to == CertificateStatus::Revoked {
            tx.execute(
                "INSERT INTO revocations (certificate_id, revoked_at, reason, revoked_by, ledger_revocation_reference) VALUES (?,?,?,?,?)",
                params![
                    id,
                    now,
                    transition.status_reason.clone().unwrap_or_default(),
                    transition.actor.clone().unwrap_or_default(),
                    transition
                        .ledger_revocation_reference
                        .as_ref()
                        .map(|r| r.0.as_str()),
                ],
            )?;
        }

        append_event(
            &tx,
            id,
            transition.action,
            from,
            to,
            transition.actor.as_deref(),
            transition.audit_detail(),
            &now,
        )?;

        let record = load_record(&tx, id)?.ok_or_else(|| Error::NotFound { id: id.to_string() })?;
        tx.commit()?;
        Ok(record)
    }

    fn claim_issue(&self, id: &str, token: &str, ttl: Duration) -> Result<IssueClaim> {
        let conn = self.lock_conn();
        let tx = conn.unchecked_transaction()?;

        let row = tx
            .query_row(
                "SELECT status, issue_claim, issue_claimed_at FROM certificates WHERE id = ?",
                params![id],
                |row| {
                    let status: String = row.get(0)?;
                    Ok((
                        parse_status(0, &status)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                    ))
                },
            )
            .optional()?;
        let Some((status, held_by, claimed_at)) = row else {
            return Err(Error::NotFound { id: id.to_string() });
        };

        if status != CertificateStatus::Approved {
            return Err(Error::InvalidTransition {
                id: id.to_string(),
                action: LifecycleAction::Issue,
                from: status,
            });
        }

        let now = Utc::now();
        let outcome = match held_by.as_ref() {
            None => IssueClaim::Acquired,
            Some(_) if claim_expired(claimed_at.as_deref(), ttl, now) => IssueClaim::TakenOver {
                previous_claimed_at: claimed_at.clone().unwrap_or_default(),
            },
            Some(_) => {
                return Err(Error::Conflict(format!(
                    "certificate {id} is already being issued"
                )))
            }
        };

        // Conditional on the claim we observed, so a second process sharing
        // the database cannot take the same claim.
        let changed = tx.execute(
            "UPDATE certificates SET issue_claim = ?1, issue_claimed_at = ?2 WHERE id = ?3 AND status = 'approved' AND issue_claim IS ?4",
            params![
                token,
                now.to_rfc3339_opts(SecondsFormat::Nanos, true),
                id,
                held_by
            ],
        )?;
        if changed == 0 {
            return Err(Error::Conflict(format!(
                "certificate {id} is already being issued"
            )));
        }

        tx.commit()?;
        Ok(outcome)
    }

    fn release_issue_claim(&self, id: &str, token: &str) -> Result<()> {
        let conn = self.lock_conn();
        conn.execute(
            "UPDATE certificates SET issue_claim = NULL, issue_claimed_at = NULL WHERE id = ? AND issue_claim = ?",
            params![id, token],
        )?;
        Ok(())
    }

    fn set_verification_status(&self, id: &str, status: VerificationStatus) -> Result<()> {
        let conn = self.lock_conn();
        let changed = conn.execute(
            "UPDATE certificates SET verification_status = ? WHERE id = ?",
            params![status.as_db_str(), id],
        )?;
        if changed == 0 {
            return Err(Error::NotFound { id: id.to_string() });
        }
        Ok(())
    }

    fn get_revocation(&self, id: &str) -> Result<Option<RevocationRecord>> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare(
            "SELECT certificate_id, revoked_at, reason, revoked_by, ledger_revocation_reference FROM revocations WHERE certificate_id = ?",
        )?;
        let record = stmt
            .query_row(params![id], |row| {
                Ok(RevocationRecord {
                    certificate_id: row.get(0)?,
                    revoked_at: row.get(1)?,
                    reason: row.get(2)?,
                    revoked_by: row.get(3)?,
                    ledger_revocation_reference: row
                        .get::<_, Option<String>>(4)?
                        .map(LedgerReference),
                })
            })
            .optional()?;
        Ok(record)
    }

    fn history(&self, id: &str) -> Result<Vec<AuditEvent>> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM certificate_events WHERE certificate_id = ? ORDER BY sequence ASC"
        ))?;
        let rows = stmt.query_map(params![id], row_to_event)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }
}

fn now_rfc3339_nanos() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn is_fingerprint_conflict(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, Some(message)) => {
            e.code == ErrorCode::ConstraintViolation && message.contains("certificates.fingerprint")
        }
        _ => false,
    }
}

/// A claim with no readable timestamp counts as expired.
fn claim_expired(claimed_at: Option<&str>, ttl: Duration, now: DateTime<Utc>) -> bool {
    let Some(claimed_at) = claimed_at.and_then(|s| DateTime::parse_from_rfc3339(s).ok()) else {
        return true;
    };
    let Ok(ttl) = chrono::Duration::from_std(ttl) else {
        return false;
    };
    now.signed_duration_since(claimed_at.with_timezone(&Utc)) >= ttl
}

#[allow(clippy::too_many_arguments)]
fn append_event(
    conn: &Connection,
    certificate_id: &str,
    action: LifecycleAction,
    from_status: Option<CertificateStatus>,
    to_status: CertificateStatus,
    actor: Option<&str>,
    detail: BTreeMap<String, String>,
    timestamp: &str,
) -> Result<AuditEvent> {
    let (previous_hash, next_seq) = conn
        .query_row(
            "SELECT content_hash, sequence FROM certificate_events WHERE certificate_id = ? ORDER BY sequence DESC LIMIT 1",
            params![certificate_id],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
        )
        .optional()?
        .map(|(hash, seq)| (hash, seq.saturating_add(1)))
        .unwrap_or_else(|| (genesis_hash_hex(), 1));

    let mut event = AuditEvent {
        event_id: format!("evt_{}", Uuid::now_v7()),
        certificate_id: certificate_id.to_string(),
        sequence: u64::try_from(next_seq).unwrap_or(0),
        timestamp: timestamp.to_string(),
        action,
        from_status,
        to_status,
        actor: actor.map(str::to_string),
        detail,
        previous_hash,
        content_hash: String::new(),
    };
    let payload = canonical_event_payload(&event);
    event.content_hash = compute_chain_hash_hex(&event.previous_hash, payload.as_bytes())?;

    let detail_json = if event.detail.is_empty() {
        None
    } else {
        Some(serde_json::to_string(&event.detail)?)
    };

    conn.execute(
        &format!("INSERT INTO certificate_events ({EVENT_COLUMNS}) VALUES (?,?,?,?,?,?,?,?,?,?,?)"),
        params![
            event.event_id,
            event.certificate_id,
            next_seq,
            event.timestamp,
            event.action.as_str(),
            event.from_status.map(CertificateStatus::as_db_str),
            event.to_status.as_db_str(),
            event.actor,
            detail_json,
            event.previous_hash,
            event.content_hash,
        ],
    )?;

    Ok(event)
}

fn load_record(conn: &Connection, id: &str) -> Result<Option<CertificateRecord>> {
    let mut stmt = conn.prepare(&format!("SELECT {CERT_COLUMNS} FROM certificates WHERE id = ?"))?;
    let record = stmt.query_row(params![id], row_to_record).optional()?;
    Ok(record)
}

fn conversion_error(
    column: usize,
    err: impl Into<Box<dyn std::error::Error + Send + Sync>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, err.into())
}

fn parse_status(column: usize, s: &str) -> rusqlite::Result<CertificateStatus> {
    CertificateStatus::from_db_str(s)
        .ok_or_else(|| conversion_error(column, format!("unknown certificate status {s:?}")))
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<CertificateRecord> {
    let fingerprint: String = row.get(7)?;
    let status: String = row.get(11)?;
    let verification_status: String = row.get(12)?;

    Ok(CertificateRecord {
        id: row.get(0)?,
        subject_id: row.get(1)?,
        issuer_id: row.get(2)?,
        attributes: CertificateAttributes {
            subject_name: row.get(3)?,
            course_name: row.get(4)?,
            completion_date: row.get(5)?,
            issuer_name: row.get(6)?,
        },
        fingerprint: Fingerprint::from_hex(&fingerprint).map_err(|e| conversion_error(7, e))?,
        ledger_reference: row.get::<_, Option<String>>(8)?.map(LedgerReference),
        content_address: row.get::<_, Option<String>>(9)?.map(ContentAddress),
        document_hash: row.get(10)?,
        status: parse_status(11, &status)?,
        verification_status: VerificationStatus::from_db_str(&verification_status).ok_or_else(
            || conversion_error(12, format!("unknown verification status {verification_status:?}")),
        )?,
        status_reason: row.get(13)?,
        requested_at: row.get(14)?,
        updated_at: row.get(15)?,
    })
}

fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<AuditEvent> {
    let action: String = row.get(4)?;
    let from_status: Option<String> = row.get(5)?;
    let to_status: String = row.get(6)?;
    let detail: Option<String> = row.get(8)?;

    Ok(AuditEvent {
        event_id: row.get(0)?,
        certificate_id: row.get(1)?,
        sequence: row.get::<_, i64>(2)?.try_into().unwrap_or_default(),
        timestamp: row.get(3)?,
        action: LifecycleAction::from_db_str(&action)
            .ok_or_else(|| conversion_error(4, format!("unknown action {action:?}")))?,
        from_status: from_status.map(|s| parse_status(5, &s)).transpose()?,
        to_status: parse_status(6, &to_status)?,
        actor: row.get(7)?,
        detail: match detail {
            Some(raw) => serde_json::from_str(&raw).map_err(|e| conversion_error(8, e))?,
            None => BTreeMap::new(),
        },
        previous_hash: row.get(9)?,
        content_hash: row.get(10)?,
    })
}
