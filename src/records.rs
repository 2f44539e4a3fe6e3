//! Wellbeing record types
//! ----------------------
//! Typed representations of the three journal entry kinds (meals, sleep,
//! mood check-ins) plus parsing and validation from wire JSON. Timestamps
//! are epoch milliseconds throughout, matching the HTTP payloads.

use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};

/// The three entry kinds a user journal holds. The wire name doubles as the
/// URL path segment and the JSON list field in responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Meals,
    Sleep,
    Checkins,
}

impl EntityKind {
    pub const ALL: [EntityKind; 3] = [EntityKind::Meals, EntityKind::Sleep, EntityKind::Checkins];

    /// Plural wire name: path segment and response list field.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Meals => "meals",
            EntityKind::Sleep => "sleep",
            EntityKind::Checkins => "checkins",
        }
    }

    /// Singular name used for the echoed record in save responses.
    pub fn singular(&self) -> &'static str {
        match self {
            EntityKind::Meals => "meal",
            EntityKind::Sleep => "sleep",
            EntityKind::Checkins => "checkin",
        }
    }

    /// JSON field carrying the record body in save requests.
    pub fn payload_field(&self) -> &'static str {
        match self {
            EntityKind::Meals => "mealData",
            EntityKind::Sleep => "sleepData",
            EntityKind::Checkins => "checkinData",
        }
    }

    pub fn parse(s: &str) -> Option<EntityKind> {
        match s {
            "meals" => Some(EntityKind::Meals),
            "sleep" => Some(EntityKind::Sleep),
            "checkins" => Some(EntityKind::Checkins),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MealRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub uid: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calories: Option<u32>,
    /// Epoch milliseconds of the meal.
    pub eaten_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SleepRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub uid: String,
    pub started_at: i64,
    pub ended_at: i64,
    /// Subjective quality 1..=5 when recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckinRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub uid: String,
    /// Mood score 1..=5.
    pub mood: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub logged_at: i64,
}

/// A record of any kind. Externally tagged so store snapshots round-trip;
/// the wire always carries the inner struct via [`EntityRecord::to_wire`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EntityRecord {
    Meal(MealRecord),
    Sleep(SleepRecord),
    Checkin(CheckinRecord),
}

impl EntityRecord {
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityRecord::Meal(_) => EntityKind::Meals,
            EntityRecord::Sleep(_) => EntityKind::Sleep,
            EntityRecord::Checkin(_) => EntityKind::Checkins,
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            EntityRecord::Meal(r) => r.id.as_deref(),
            EntityRecord::Sleep(r) => r.id.as_deref(),
            EntityRecord::Checkin(r) => r.id.as_deref(),
        }
    }

    pub fn uid(&self) -> &str {
        match self {
            EntityRecord::Meal(r) => &r.uid,
            EntityRecord::Sleep(r) => &r.uid,
            EntityRecord::Checkin(r) => &r.uid,
        }
    }

    /// Primary timestamp used for ordering within a journal.
    pub fn timestamp(&self) -> i64 {
        match self {
            EntityRecord::Meal(r) => r.eaten_at,
            EntityRecord::Sleep(r) => r.started_at,
            EntityRecord::Checkin(r) => r.logged_at,
        }
    }

    pub fn set_id(&mut self, id: String) {
        match self {
            EntityRecord::Meal(r) => r.id = Some(id),
            EntityRecord::Sleep(r) => r.id = Some(id),
            EntityRecord::Checkin(r) => r.id = Some(id),
        }
    }

    pub fn set_uid(&mut self, uid: String) {
        match self {
            EntityRecord::Meal(r) => r.uid = uid,
            EntityRecord::Sleep(r) => r.uid = uid,
            EntityRecord::Checkin(r) => r.uid = uid,
        }
    }

    /// Serialize the inner record for HTTP responses (no enum tag).
    pub fn to_wire(&self) -> serde_json::Value {
        match self {
            EntityRecord::Meal(r) => serde_json::to_value(r).unwrap_or_default(),
            EntityRecord::Sleep(r) => serde_json::to_value(r).unwrap_or_default(),
            EntityRecord::Checkin(r) => serde_json::to_value(r).unwrap_or_default(),
        }
    }

    /// Parse a wire payload into a typed record and validate its fields.
    pub fn from_wire(kind: EntityKind, value: serde_json::Value) -> AppResult<EntityRecord> {
        let rec = match kind {
            EntityKind::Meals => {
                let r: MealRecord = serde_json::from_value(value)
                    .map_err(|e| AppError::user("bad_meal".into(), format!("invalid meal payload: {e}")))?;
                EntityRecord::Meal(r)
            }
            EntityKind::Sleep => {
                let r: SleepRecord = serde_json::from_value(value)
                    .map_err(|e| AppError::user("bad_sleep".into(), format!("invalid sleep payload: {e}")))?;
                EntityRecord::Sleep(r)
            }
            EntityKind::Checkins => {
                let r: CheckinRecord = serde_json::from_value(value)
                    .map_err(|e| AppError::user("bad_checkin".into(), format!("invalid checkin payload: {e}")))?;
                EntityRecord::Checkin(r)
            }
        };
        rec.validate()?;
        Ok(rec)
    }

    pub fn validate(&self) -> AppResult<()> {
        match self {
            EntityRecord::Meal(r) => {
                if r.name.trim().is_empty() {
                    return Err(AppError::user("bad_meal", "meal name must not be empty"));
                }
                if r.eaten_at <= 0 {
                    return Err(AppError::user("bad_meal", "eatenAt must be a positive epoch timestamp"));
                }
                if let Some(c) = r.calories {
                    if c > 20_000 {
                        return Err(AppError::user("bad_meal", "calories out of range"));
                    }
                }
            }
            EntityRecord::Sleep(r) => {
                if r.started_at <= 0 || r.ended_at <= 0 {
                    return Err(AppError::user("bad_sleep", "timestamps must be positive epoch values"));
                }
                if r.ended_at <= r.started_at {
                    return Err(AppError::user("bad_sleep", "endedAt must be after startedAt"));
                }
                if let Some(q) = r.quality {
                    if !(1..=5).contains(&q) {
                        return Err(AppError::user("bad_sleep", "quality must be 1..=5"));
                    }
                }
            }
            EntityRecord::Checkin(r) => {
                if !(1..=5).contains(&r.mood) {
                    return Err(AppError::user("bad_checkin", "mood must be 1..=5"));
                }
                if r.logged_at <= 0 {
                    return Err(AppError::user("bad_checkin", "loggedAt must be a positive epoch timestamp"));
                }
            }
        }
        Ok(())
    }
}
