//! Staff directory lookups.
//!
//! Profiles are owned by the HR side of the CRM; this store only mirrors the
//! identity -> staff mapping the gateway needs at handshake time and the
//! display names it needs to hydrate messages.

use rusqlite::{params, OptionalExtension};

use huddle_shared::types::{IdentityId, StaffId};

use crate::codec::parse_uuid;
use crate::database::Database;
use crate::error::Result;
use crate::models::StaffProfile;

impl Database {
    /// Insert or replace the profile for an identity.
    pub fn upsert_staff_profile(&self, profile: &StaffProfile) -> Result<()> {
        self.conn().execute(
            "INSERT INTO staff_profiles (identity_id, staff_id, display_name)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(identity_id) DO UPDATE SET
                staff_id = excluded.staff_id,
                display_name = excluded.display_name",
            params![
                profile.identity_id.to_string(),
                profile.staff_id.to_string(),
                profile.display_name,
            ],
        )?;
        Ok(())
    }

    pub fn staff_profile(&self, identity: IdentityId) -> Result<Option<StaffProfile>> {
        let profile = self
            .conn()
            .query_row(
                "SELECT identity_id, staff_id, display_name
                 FROM staff_profiles WHERE identity_id = ?1",
                params![identity.to_string()],
                |row| {
                    let identity_str: String = row.get(0)?;
                    let staff_str: String = row.get(1)?;
                    Ok(StaffProfile {
                        identity_id: IdentityId(parse_uuid(0, &identity_str)?),
                        staff_id: StaffId(parse_uuid(1, &staff_str)?),
                        display_name: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(profile)
    }

    /// Resolve the staff profile behind an authenticated identity.
    ///
    /// `None` means the identity has no staff profile and must not be
    /// allowed to connect.
    pub fn staff_id_for_identity(&self, identity: IdentityId) -> Result<Option<StaffId>> {
        Ok(self.staff_profile(identity)?.map(|p| p.staff_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_known_and_unknown_identity() {
        let db = Database::open_in_memory().unwrap();
        let profile = StaffProfile {
            identity_id: IdentityId::new(),
            staff_id: StaffId::new(),
            display_name: "Ada".into(),
        };
        db.upsert_staff_profile(&profile).unwrap();

        assert_eq!(
            db.staff_id_for_identity(profile.identity_id).unwrap(),
            Some(profile.staff_id)
        );
        assert_eq!(db.staff_id_for_identity(IdentityId::new()).unwrap(), None);
    }

    #[test]
    fn upsert_replaces_display_name() {
        let db = Database::open_in_memory().unwrap();
        let mut profile = StaffProfile {
            identity_id: IdentityId::new(),
            staff_id: StaffId::new(),
            display_name: "Ada".into(),
        };
        db.upsert_staff_profile(&profile).unwrap();

        profile.display_name = "Ada Lovelace".into();
        db.upsert_staff_profile(&profile).unwrap();

        let stored = db.staff_profile(profile.identity_id).unwrap().unwrap();
        assert_eq!(stored.display_name, "Ada Lovelace");
    }
}
