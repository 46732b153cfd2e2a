use chrono::NaiveDateTime;
use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::db::DatabaseError;

use super::dose_event::format_datetime;

/// A delegation row: `caregiver_id` may act on `patient_id`'s data at
/// the granted level until revoked.
#[derive(Debug, Clone)]
pub struct CareGrantRow {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub caregiver_id: Uuid,
    pub access_level: String,
    pub granted_at: NaiveDateTime,
    pub revoked_at: Option<NaiveDateTime>,
}

pub fn insert_care_grant(conn: &Connection, grant: &CareGrantRow) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO care_grants (id, patient_id, caregiver_id, access_level,
         granted_at, revoked_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            grant.id.to_string(),
            grant.patient_id.to_string(),
            grant.caregiver_id.to_string(),
            grant.access_level,
            format_datetime(grant.granted_at),
            grant.revoked_at.map(format_datetime),
        ],
    )?;
    Ok(())
}

/// The access level of an unrevoked grant, if any.
pub fn active_grant_level(
    conn: &Connection,
    patient_id: &Uuid,
    caregiver_id: &Uuid,
) -> Result<Option<String>, DatabaseError> {
    let result = conn.query_row(
        "SELECT access_level FROM care_grants
         WHERE patient_id = ?1 AND caregiver_id = ?2 AND revoked_at IS NULL
         ORDER BY granted_at DESC
         LIMIT 1",
        params![patient_id.to_string(), caregiver_id.to_string()],
        |row| row.get::<_, String>(0),
    );
    match result {
        Ok(level) => Ok(Some(level)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(DatabaseError::from(e)),
    }
}

pub fn revoke_care_grants(
    conn: &Connection,
    patient_id: &Uuid,
    caregiver_id: &Uuid,
    revoked_at: NaiveDateTime,
) -> Result<usize, DatabaseError> {
    let revoked = conn.execute(
        "UPDATE care_grants SET revoked_at = ?1
         WHERE patient_id = ?2 AND caregiver_id = ?3 AND revoked_at IS NULL",
        params![
            format_datetime(revoked_at),
            patient_id.to_string(),
            caregiver_id.to_string(),
        ],
    )?;
    Ok(revoked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::open_memory_database;
    use crate::test_support::datetime;

    fn grant(patient: Uuid, caregiver: Uuid, level: &str) -> CareGrantRow {
        CareGrantRow {
            id: Uuid::new_v4(),
            patient_id: patient,
            caregiver_id: caregiver,
            access_level: level.into(),
            granted_at: datetime(2024, 1, 1, 12, 0),
            revoked_at: None,
        }
    }

    #[test]
    fn active_grant_found() {
        let conn = open_memory_database().unwrap();
        let patient = Uuid::new_v4();
        let caregiver = Uuid::new_v4();
        insert_care_grant(&conn, &grant(patient, caregiver, "full")).unwrap();

        let level = active_grant_level(&conn, &patient, &caregiver).unwrap();
        assert_eq!(level.as_deref(), Some("full"));
    }

    #[test]
    fn grants_are_unidirectional() {
        let conn = open_memory_database().unwrap();
        let patient = Uuid::new_v4();
        let caregiver = Uuid::new_v4();
        insert_care_grant(&conn, &grant(patient, caregiver, "read_only")).unwrap();

        // Reversed direction has no grant
        assert!(active_grant_level(&conn, &caregiver, &patient).unwrap().is_none());
    }

    #[test]
    fn revoked_grant_no_longer_active() {
        let conn = open_memory_database().unwrap();
        let patient = Uuid::new_v4();
        let caregiver = Uuid::new_v4();
        insert_care_grant(&conn, &grant(patient, caregiver, "full")).unwrap();

        let revoked =
            revoke_care_grants(&conn, &patient, &caregiver, datetime(2024, 2, 1, 0, 0)).unwrap();
        assert_eq!(revoked, 1);
        assert!(active_grant_level(&conn, &patient, &caregiver).unwrap().is_none());
    }
}
