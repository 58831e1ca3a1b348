//! Profile lifecycle and sync metadata

use chrono::NaiveDate;
use rusqlite::{params, OptionalExtension, Row};

use super::{parse_date, parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::Profile;

fn profile_from_row(row: &Row<'_>) -> rusqlite::Result<Profile> {
    Ok(Profile {
        id: row.get(0)?,
        name: row.get(1)?,
        mail_address: row.get(2)?,
        active: row.get(3)?,
        last_statement_date: row
            .get::<_, Option<String>>(4)?
            .and_then(|s| parse_date(&s).ok()),
        last_sync_date: row
            .get::<_, Option<String>>(5)?
            .and_then(|s| parse_date(&s).ok()),
        statement_cycle_days: row.get(6)?,
        created_at: parse_datetime(&row.get::<_, String>(7)?),
    })
}

const PROFILE_COLS: &str = "id, name, mail_address, active, last_statement_date, \
     last_sync_date, statement_cycle_days, created_at";

impl Database {
    /// Create a profile. Profiles are never destroyed, only deactivated.
    pub fn create_profile(&self, id: &str, name: &str, mail_address: &str) -> Result<Profile> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO profile (id, name, mail_address) VALUES (?, ?, ?)",
            params![id, name, mail_address],
        )?;
        self.get_profile(id)?
            .ok_or_else(|| Error::NotFound(format!("profile {}", id)))
    }

    pub fn get_profile(&self, id: &str) -> Result<Option<Profile>> {
        let conn = self.conn()?;
        let profile = conn
            .query_row(
                &format!("SELECT {} FROM profile WHERE id = ?", PROFILE_COLS),
                params![id],
                profile_from_row,
            )
            .optional()?;
        Ok(profile)
    }

    /// List profiles, optionally including deactivated ones
    pub fn list_profiles(&self, include_inactive: bool) -> Result<Vec<Profile>> {
        let conn = self.conn()?;
        let sql = if include_inactive {
            format!("SELECT {} FROM profile ORDER BY created_at", PROFILE_COLS)
        } else {
            format!(
                "SELECT {} FROM profile WHERE active = 1 ORDER BY created_at",
                PROFILE_COLS
            )
        };
        let mut stmt = conn.prepare(&sql)?;
        let profiles = stmt
            .query_map([], profile_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(profiles)
    }

    /// Soft-disable a profile
    pub fn deactivate_profile(&self, id: &str) -> Result<()> {
        let conn = self.conn()?;
        let changed = conn.execute("UPDATE profile SET active = 0 WHERE id = ?", params![id])?;
        if changed == 0 {
            return Err(Error::NotFound(format!("profile {}", id)));
        }
        Ok(())
    }

    /// Commit sync metadata in one unit.
    ///
    /// All three fields update in a single statement so a crash can never
    /// leave the profile with a half-written sync state. Fields passed as
    /// None keep their current value.
    pub fn commit_sync_metadata(
        &self,
        profile_id: &str,
        last_statement_date: Option<NaiveDate>,
        last_sync_date: Option<NaiveDate>,
        statement_cycle_days: Option<i64>,
    ) -> Result<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            r#"
            UPDATE profile SET
                last_statement_date = COALESCE(?, last_statement_date),
                last_sync_date = COALESCE(?, last_sync_date),
                statement_cycle_days = COALESCE(?, statement_cycle_days)
            WHERE id = ?
            "#,
            params![
                last_statement_date.map(|d| d.to_string()),
                last_sync_date.map(|d| d.to_string()),
                statement_cycle_days,
                profile_id,
            ],
        )?;
        if changed == 0 {
            return Err(Error::NotFound(format!("profile {}", profile_id)));
        }
        Ok(())
    }
}
