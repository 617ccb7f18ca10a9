use shared::{GeoPoint, MapLocation, MapView};
use std::fs;
use thiserror::Error;

pub const CAMPUS_CENTER: GeoPoint = GeoPoint {
    lat: 12.9716,
    lng: 77.5946,
};
pub const CAMPUS_ZOOM: u8 = 15;

#[derive(Error, Debug)]
pub enum MapConfigError {
    #[error("Failed to read locations file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid locations file: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Locations file lists no locations")]
    Empty,
}

/// Drop-off locations and the Maps key they are rendered with.
#[derive(Debug, Clone)]
pub struct CampusMap {
    api_key: Option<String>,
    locations: Vec<MapLocation>,
}

impl CampusMap {
    pub fn new(api_key: Option<String>, locations: Vec<MapLocation>) -> Self {
        Self {
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            locations,
        }
    }

    /// Uses the YAML file when given and readable, the built-in list otherwise.
    pub fn from_config(api_key: Option<String>, locations_file: Option<&str>) -> Self {
        let locations = match locations_file {
            None => default_locations(),
            Some(path) => match load_locations(path) {
                Ok(locations) => {
                    log::info!("Loaded {} map locations from {}", locations.len(), path);
                    locations
                }
                Err(e) => {
                    log::warn!("Using built-in map locations, {} could not be used: {}", path, e);
                    default_locations()
                }
            },
        };
        Self::new(api_key, locations)
    }

    pub fn view(&self) -> MapView {
        match &self.api_key {
            Some(api_key) => MapView::Ready {
                api_key: api_key.clone(),
                center: CAMPUS_CENTER,
                zoom: CAMPUS_ZOOM,
                locations: self.locations.clone(),
            },
            None => MapView::ConfigurationMissing {
                message: "Google Maps is not configured. Set GOOGLE_MAPS_API_KEY to show the campus map."
                    .to_string(),
            },
        }
    }
}

pub fn load_locations(path: &str) -> Result<Vec<MapLocation>, MapConfigError> {
    let raw = fs::read_to_string(path)?;
    let locations: Vec<MapLocation> = serde_yaml::from_str(&raw)?;
    if locations.is_empty() {
        return Err(MapConfigError::Empty);
    }
    Ok(locations)
}

pub fn default_locations() -> Vec<MapLocation> {
    [
        ("main", "Main Recycling Center", "Paper, Plastic, Glass", 12.9716, 77.5946),
        ("ewaste", "E-Waste Drop-off", "Batteries, Phones, Laptops", 12.973, 77.592),
        ("organic", "Organic Compost Pit", "Food scraps, Yard waste", 12.969, 77.598),
    ]
    .into_iter()
    .map(|(key, label, details, lat, lng)| MapLocation {
        key: key.to_string(),
        label: label.to_string(),
        details: details.to_string(),
        position: GeoPoint { lat, lng },
    })
    .collect()
}
