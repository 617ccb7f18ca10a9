use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};
use uuid::Uuid;

mod bins;

pub use bins::{all_bin_details, bin_details, bin_details_for_token, BinDetails};

/// Points granted for one successful scan.
pub const POINTS_PER_SCAN: u64 = 10;

/// Number of profiles shown on the leaderboard.
pub const LEADERBOARD_SIZE: usize = 10;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter, AsRefStr,
)]
pub enum BinColor {
    /// Hazardous or reject, goes to landfill.
    Red,
    /// Recyclable.
    Blue,
    /// Organic.
    Green,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationResult {
    pub bin_color: BinColor,
    pub eco_fact: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeResponse {
    pub result: ClassificationResult,
    pub details: BinDetails,
    pub points_awarded: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub email: String,
    pub display_name: String,
    pub photo_url: Option<String>,
    pub points: u64,
    pub created_at: DateTime<Utc>,
}

impl UserProfile {
    pub fn new(
        id: impl Into<String>,
        email: Option<String>,
        display_name: Option<String>,
        photo_url: Option<String>,
    ) -> Self {
        Self {
            id: id.into(),
            email: email.unwrap_or_default(),
            display_name: display_name
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| "Anonymous".to_string()),
            photo_url,
            points: 0,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WasteEvent {
    pub id: Uuid,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub bin_color: BinColor,
    pub eco_fact: String,
    pub image_ref: Option<String>,
}

impl WasteEvent {
    pub fn new(user_id: impl Into<String>, result: &ClassificationResult, image_ref: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            created_at: Utc::now(),
            bin_color: result.bin_color,
            eco_fact: result.eco_fact.clone(),
            image_ref,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub id: String,
    pub display_name: String,
    pub points: u64,
    pub avatar: Option<String>,
}

impl From<&UserProfile> for LeaderboardEntry {
    fn from(profile: &UserProfile) -> Self {
        Self {
            id: profile.id.clone(),
            display_name: profile.display_name.clone(),
            points: profile.points,
            avatar: profile.photo_url.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum LeaderboardState {
    Loading,
    NotAuthenticated,
    Ready { entries: Vec<LeaderboardEntry> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapLocation {
    pub key: String,
    pub label: String,
    pub details: String,
    pub position: GeoPoint,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum MapView {
    #[serde(rename_all = "camelCase")]
    Ready {
        api_key: String,
        center: GeoPoint,
        zoom: u8,
        locations: Vec<MapLocation>,
    },
    ConfigurationMissing {
        message: String,
    },
}
