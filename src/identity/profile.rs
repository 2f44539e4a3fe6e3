use serde::{Deserialize, Serialize};

/// Optional profile attributes, flattened into the wire `user` object.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProfileAttrs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily_calorie_goal: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sleep_goal_hours: Option<f32>,
}

/// A signed-in user as seen by clients. This is the `user` object on the wire
/// and the payload inside session tokens. Owned by the server; the client
/// mirrors it read-only and mutates it only through the profile endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: String,
    pub display_name: String,
    /// Canonical (normalized) email or phone handle.
    pub contact_handle: String,
    /// Epoch milliseconds of account creation.
    #[serde(default)]
    pub created_at: i64,
    #[serde(flatten)]
    pub attrs: ProfileAttrs,
}

impl Identity {
    pub fn new(
        id: impl Into<String>,
        contact_handle: impl Into<String>,
        display_name: impl Into<String>,
        created_at: i64,
    ) -> Self {
        Identity {
            id: id.into(),
            display_name: display_name.into(),
            contact_handle: contact_handle.into(),
            created_at,
            attrs: ProfileAttrs::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_shape_is_flat_camel_case() {
        let mut id = Identity::new("u-1", "ada@example.com", "Ada", 1_700_000_000_000);
        id.attrs.daily_calorie_goal = Some(2100);
        let v = serde_json::to_value(&id).unwrap();
        assert_eq!(v.get("id").and_then(|x| x.as_str()), Some("u-1"));
        assert_eq!(v.get("displayName").and_then(|x| x.as_str()), Some("Ada"));
        assert_eq!(v.get("contactHandle").and_then(|x| x.as_str()), Some("ada@example.com"));
        assert_eq!(v.get("dailyCalorieGoal").and_then(|x| x.as_u64()), Some(2100));
        assert!(v.get("attrs").is_none());
        assert!(v.get("timezone").is_none());
    }

    #[test]
    fn missing_profile_fields_default() {
        let v: Identity = serde_json::from_str(
            r#"{"id":"u-2","displayName":"G","contactHandle":"4155550132"}"#,
        )
        .unwrap();
        assert_eq!(v.created_at, 0);
        assert!(v.attrs.timezone.is_none());
    }
}
