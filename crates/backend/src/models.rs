// Database models for Diesel
use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;
use shared_types::MissionaryRecord;

/// Database representation of a missionary row, matching column order
/// exactly.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::schema::missionaries)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct MissionaryRow {
    pub id: i32,
    pub district_id: Option<String>,
    pub kind: Option<String>,
    pub branch: Option<i32>,
    pub district: Option<String>,
    pub country: Option<String>,
    pub list_number: Option<i32>,
    pub companionship_number: Option<i32>,
    pub treatment: Option<String>,
    pub name: String,
    pub companion: Option<String>,
    pub assigned_mission: Option<String>,
    pub stake: Option<String>,
    pub lodging: Option<String>,
    pub photo: Option<String>,
    pub arrival: Option<NaiveDate>,
    pub departure: Option<NaiveDate>,
    pub generation: Option<NaiveDate>,
    pub comments: Option<String>,
    pub endowed: bool,
    pub birth_date: Option<NaiveDate>,
    pub photo_taken: bool,
    pub passport: bool,
    pub passport_folio: Option<String>,
    pub fm: Option<String>,
    pub ipad: bool,
    pub closet: Option<String>,
    pub secondary_arrival: Option<String>,
    pub p_day: Option<String>,
    pub host: bool,
    pub three_weeks: bool,
    pub device: bool,
    pub mission_email: Option<String>,
    pub personal_email: Option<String>,
    pub in_person_date: Option<NaiveDate>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<MissionaryRow> for MissionaryRecord {
    fn from(row: MissionaryRow) -> Self {
        MissionaryRecord {
            id: row.id,
            district_id: row.district_id,
            kind: row.kind,
            branch: row.branch,
            district: row.district,
            country: row.country,
            list_number: row.list_number,
            companionship_number: row.companionship_number,
            treatment: row.treatment,
            name: row.name,
            companion: row.companion,
            assigned_mission: row.assigned_mission,
            stake: row.stake,
            lodging: row.lodging,
            photo: row.photo,
            arrival: row.arrival,
            departure: row.departure,
            generation: row.generation,
            comments: row.comments,
            endowed: row.endowed,
            birth_date: row.birth_date,
            photo_taken: row.photo_taken,
            passport: row.passport,
            passport_folio: row.passport_folio,
            fm: row.fm,
            ipad: row.ipad,
            closet: row.closet,
            secondary_arrival: row.secondary_arrival,
            p_day: row.p_day,
            host: row.host,
            three_weeks: row.three_weeks,
            device: row.device,
            mission_email: row.mission_email,
            personal_email: row.personal_email,
            in_person_date: row.in_person_date,
            active: row.active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Insertable struct for freshly mapped records.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::missionaries)]
pub struct NewMissionary {
    pub id: i32,
    pub district_id: Option<String>,
    pub kind: Option<String>,
    pub branch: Option<i32>,
    pub district: Option<String>,
    pub country: Option<String>,
    pub list_number: Option<i32>,
    pub companionship_number: Option<i32>,
    pub treatment: Option<String>,
    pub name: String,
    pub companion: Option<String>,
    pub assigned_mission: Option<String>,
    pub stake: Option<String>,
    pub lodging: Option<String>,
    pub photo: Option<String>,
    pub arrival: Option<NaiveDate>,
    pub departure: Option<NaiveDate>,
    pub generation: Option<NaiveDate>,
    pub comments: Option<String>,
    pub endowed: bool,
    pub birth_date: Option<NaiveDate>,
    pub photo_taken: bool,
    pub passport: bool,
    pub passport_folio: Option<String>,
    pub fm: Option<String>,
    pub ipad: bool,
    pub closet: Option<String>,
    pub secondary_arrival: Option<String>,
    pub p_day: Option<String>,
    pub host: bool,
    pub three_weeks: bool,
    pub device: bool,
    pub mission_email: Option<String>,
    pub personal_email: Option<String>,
    pub in_person_date: Option<NaiveDate>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&MissionaryRecord> for NewMissionary {
    fn from(record: &MissionaryRecord) -> Self {
        NewMissionary {
            id: record.id,
            district_id: record.district_id.clone(),
            kind: record.kind.clone(),
            branch: record.branch,
            district: record.district.clone(),
            country: record.country.clone(),
            list_number: record.list_number,
            companionship_number: record.companionship_number,
            treatment: record.treatment.clone(),
            name: record.name.clone(),
            companion: record.companion.clone(),
            assigned_mission: record.assigned_mission.clone(),
            stake: record.stake.clone(),
            lodging: record.lodging.clone(),
            photo: record.photo.clone(),
            arrival: record.arrival,
            departure: record.departure,
            generation: record.generation,
            comments: record.comments.clone(),
            endowed: record.endowed,
            birth_date: record.birth_date,
            photo_taken: record.photo_taken,
            passport: record.passport,
            passport_folio: record.passport_folio.clone(),
            fm: record.fm.clone(),
            ipad: record.ipad,
            closet: record.closet.clone(),
            secondary_arrival: record.secondary_arrival.clone(),
            p_day: record.p_day.clone(),
            host: record.host,
            three_weeks: record.three_weeks,
            device: record.device,
            mission_email: record.mission_email.clone(),
            personal_email: record.personal_email.clone(),
            in_person_date: record.in_person_date,
            active: record.active,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}
