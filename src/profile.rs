//! Profile data model — the application-owned account record.
//!
//! Mirrors the `profiles` table: one row per account, keyed by the auth
//! provider's account id, created exactly once at signup and patched
//! thereafter. Distinct from [`Identity`](crate::provider::Identity):
//! the provider owns who you are, the profile owns what the app knows
//! about you (display name, recovery start date, role, preferences).

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Application role for a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Regular member.
    User,
    /// Can publish announcements and manage the video library.
    Admin,
}

impl Default for Role {
    fn default() -> Self {
        Self::User
    }
}

/// A row in the `profiles` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    /// Account id — foreign key to the provider-issued identity.
    pub id: String,
    /// Display name.
    pub full_name: String,
    /// First day of sobriety, drives the day counter on the dashboard.
    pub sobriety_start_date: NaiveDate,
    /// Free-form interest tags for content recommendations.
    #[serde(default)]
    pub interest_tags: Vec<String>,
    /// Optional avatar URL.
    #[serde(default)]
    pub profile_image_url: Option<String>,
    /// Soft-delete flag; inactive profiles keep their history.
    pub is_active: bool,
    /// Application role.
    #[serde(default)]
    pub role: Role,
    /// Free-form preference payload (notification settings, theme, ...).
    #[serde(default)]
    pub preferences: serde_json::Value,
    /// Row creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    /// Whether this profile can use admin surfaces.
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Merge a partial update into this row in place.
    ///
    /// Only fields present in `updates` change; `updated_at` is bumped to
    /// now so the local row matches what the remote trigger will produce.
    pub fn apply(&mut self, updates: &ProfileUpdate) {
        if let Some(full_name) = &updates.full_name {
            self.full_name = full_name.clone();
        }
        if let Some(date) = updates.sobriety_start_date {
            self.sobriety_start_date = date;
        }
        if let Some(tags) = &updates.interest_tags {
            self.interest_tags = tags.clone();
        }
        if let Some(url) = &updates.profile_image_url {
            self.profile_image_url = Some(url.clone());
        }
        if let Some(active) = updates.is_active {
            self.is_active = active;
        }
        if let Some(preferences) = &updates.preferences {
            self.preferences = preferences.clone();
        }
        self.updated_at = Utc::now();
    }
}

/// Signup draft — the profile fields a new user fills in before an
/// account id exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProfile {
    /// Display name.
    pub full_name: String,
    /// First day of sobriety.
    pub sobriety_start_date: NaiveDate,
    /// Interest tags picked during onboarding.
    #[serde(default)]
    pub interest_tags: Vec<String>,
    /// Initial preference payload.
    #[serde(default)]
    pub preferences: serde_json::Value,
}

impl NewProfile {
    /// Mint the full row for a freshly created account.
    pub fn into_row(self, account_id: &str) -> Profile {
        let now = Utc::now();
        Profile {
            id: account_id.to_string(),
            full_name: self.full_name,
            sobriety_start_date: self.sobriety_start_date,
            interest_tags: self.interest_tags,
            profile_image_url: None,
            is_active: true,
            role: Role::User,
            preferences: self.preferences,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial profile update. Unset fields are omitted from the remote
/// PATCH body, so the server only touches the columns provided.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sobriety_start_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interest_tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferences: Option<serde_json::Value>,
}

impl ProfileUpdate {
    /// True when no field is set (a no-op patch).
    pub fn is_empty(&self) -> bool {
        self.full_name.is_none()
            && self.sobriety_start_date.is_none()
            && self.interest_tags.is_none()
            && self.profile_image_url.is_none()
            && self.is_active.is_none()
            && self.preferences.is_none()
    }
}
