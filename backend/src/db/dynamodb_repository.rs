use async_trait::async_trait;
use aws_sdk_dynamodb::types::{AttributeValue, ReturnValue};
use aws_sdk_dynamodb::Client;
use chrono::{DateTime, Utc};
use shared::{BinColor, UserProfile, WasteEvent};
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

use super::{rank_profiles, ProfileStore, RepositoryError};

/// Partition value shared by every profile so the points index can be queried in order.
const LEADERBOARD_PARTITION: &str = "global";

#[derive(Clone)]
pub struct DynamoDbRepository {
    client: Client,
    users_table: String,
    events_table: String,
    leaderboard_index: String,
}

impl DynamoDbRepository {
    pub fn new(client: Client, users_table: String, events_table: String, leaderboard_index: String) -> Self {
        Self {
            client,
            users_table,
            events_table,
            leaderboard_index,
        }
    }

    fn profile_to_item(profile: &UserProfile) -> HashMap<String, AttributeValue> {
        let mut item = HashMap::new();
        item.insert("id".to_string(), AttributeValue::S(profile.id.clone()));
        item.insert("email".to_string(), AttributeValue::S(profile.email.clone()));
        item.insert(
            "display_name".to_string(),
            AttributeValue::S(profile.display_name.clone()),
        );
        if let Some(photo_url) = &profile.photo_url {
            item.insert("photo_url".to_string(), AttributeValue::S(photo_url.clone()));
        }
        item.insert("points".to_string(), AttributeValue::N(profile.points.to_string()));
        item.insert(
            "board".to_string(),
            AttributeValue::S(LEADERBOARD_PARTITION.to_string()),
        );
        item.insert(
            "created_at".to_string(),
            AttributeValue::S(profile.created_at.to_rfc3339()),
        );
        item
    }

    fn event_to_item(event: &WasteEvent) -> HashMap<String, AttributeValue> {
        let mut item = HashMap::new();
        item.insert("user_id".to_string(), AttributeValue::S(event.user_id.clone()));
        item.insert(
            "event_key".to_string(),
            AttributeValue::S(format!("{}#{}", event.created_at.to_rfc3339(), event.id)),
        );
        item.insert("id".to_string(), AttributeValue::S(event.id.to_string()));
        item.insert(
            "created_at".to_string(),
            AttributeValue::S(event.created_at.to_rfc3339()),
        );
        item.insert(
            "bin_color".to_string(),
            AttributeValue::S(event.bin_color.to_string()),
        );
        item.insert("eco_fact".to_string(), AttributeValue::S(event.eco_fact.clone()));
        if let Some(image_ref) = &event.image_ref {
            item.insert("image_ref".to_string(), AttributeValue::S(image_ref.clone()));
        }
        item
    }

    fn parse_profile_from_item(item: &HashMap<String, AttributeValue>) -> Result<UserProfile, RepositoryError> {
        let id = get_s(item, "id").ok_or_else(|| RepositoryError::InvalidData("Invalid profile id".to_string()))?;

        let display_name = get_s(item, "display_name").unwrap_or_else(|| "Anonymous".to_string());
        let email = get_s(item, "email").unwrap_or_default();
        let photo_url = get_s(item, "photo_url");

        let points = item
            .get("points")
            .and_then(|v| v.as_n().ok())
            .map(|n| n.parse::<u64>())
            .transpose()
            .map_err(|_| RepositoryError::InvalidData("Invalid points".to_string()))?
            .unwrap_or(0);

        let created_at = get_s(item, "created_at")
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or_else(|| RepositoryError::InvalidData("Invalid created_at".to_string()))?;

        Ok(UserProfile {
            id,
            email,
            display_name,
            photo_url,
            points,
            created_at,
        })
    }

    fn parse_event_from_item(item: &HashMap<String, AttributeValue>) -> Result<WasteEvent, RepositoryError> {
        let id = get_s(item, "id")
            .and_then(|s| Uuid::parse_str(&s).ok())
            .ok_or_else(|| RepositoryError::InvalidData("Invalid event id".to_string()))?;

        let user_id =
            get_s(item, "user_id").ok_or_else(|| RepositoryError::InvalidData("Invalid user_id".to_string()))?;

        let created_at = get_s(item, "created_at")
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or_else(|| RepositoryError::InvalidData("Invalid created_at".to_string()))?;

        let bin_color = get_s(item, "bin_color")
            .and_then(|s| BinColor::from_str(&s).ok())
            .ok_or_else(|| RepositoryError::InvalidData("Invalid bin_color".to_string()))?;

        let eco_fact =
            get_s(item, "eco_fact").ok_or_else(|| RepositoryError::InvalidData("Invalid eco_fact".to_string()))?;

        Ok(WasteEvent {
            id,
            user_id,
            created_at,
            bin_color,
            eco_fact,
            image_ref: get_s(item, "image_ref"),
        })
    }
}

fn get_s(item: &HashMap<String, AttributeValue>, name: &str) -> Option<String> {
    item.get(name).and_then(|v| v.as_s().ok()).cloned()
}

#[async_trait]
impl ProfileStore for DynamoDbRepository {
    async fn get_profile(&self, uid: &str) -> Result<Option<UserProfile>, RepositoryError> {
        let result = self
            .client
            .get_item()
            .table_name(&self.users_table)
            .key("id", AttributeValue::S(uid.to_string()))
            .send()
            .await
            .map_err(|e| RepositoryError::DynamoDb(e.to_string()))?;

        match result.item {
            Some(item) => Ok(Some(Self::parse_profile_from_item(&item)?)),
            None => Ok(None),
        }
    }

    async fn create_profile_if_absent(&self, profile: &UserProfile) -> Result<bool, RepositoryError> {
        log::info!(
            "Creating profile in DynamoDB table '{}' if absent: {}",
            self.users_table,
            profile.id
        );

        match self
            .client
            .put_item()
            .table_name(&self.users_table)
            .set_item(Some(Self::profile_to_item(profile)))
            .condition_expression("attribute_not_exists(id)")
            .send()
            .await
        {
            Ok(_) => {
                log::info!("Created profile {}", profile.id);
                Ok(true)
            }
            Err(e) => {
                if e
                    .as_service_error()
                    .is_some_and(|se| se.is_conditional_check_failed_exception())
                {
                    log::debug!("Profile {} already exists", profile.id);
                    return Ok(false);
                }
                log::error!("DynamoDB put_item failed for profile {}: {:?}", profile.id, e);
                Err(RepositoryError::DynamoDb(e.to_string()))
            }
        }
    }

    async fn update_display_name(&self, uid: &str, display_name: &str) -> Result<(), RepositoryError> {
        let result = self
            .client
            .update_item()
            .table_name(&self.users_table)
            .key("id", AttributeValue::S(uid.to_string()))
            .update_expression("SET display_name = :display_name")
            .condition_expression("attribute_exists(id)")
            .expression_attribute_values(":display_name", AttributeValue::S(display_name.to_string()))
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                if e
                    .as_service_error()
                    .is_some_and(|se| se.is_conditional_check_failed_exception())
                {
                    return Err(RepositoryError::NotFound);
                }
                log::error!("DynamoDB update_item failed for profile {}: {:?}", uid, e);
                Err(RepositoryError::DynamoDb(e.to_string()))
            }
        }
    }

    async fn increment_points(&self, uid: &str, delta: u64) -> Result<u64, RepositoryError> {
        // ADD is applied server side, so concurrent scans never lose an update.
        let result = self
            .client
            .update_item()
            .table_name(&self.users_table)
            .key("id", AttributeValue::S(uid.to_string()))
            .update_expression("ADD points :delta")
            .condition_expression("attribute_exists(id)")
            .expression_attribute_values(":delta", AttributeValue::N(delta.to_string()))
            .return_values(ReturnValue::UpdatedNew)
            .send()
            .await;

        match result {
            Ok(output) => output
                .attributes
                .as_ref()
                .and_then(|attrs| attrs.get("points"))
                .and_then(|v| v.as_n().ok())
                .and_then(|n| n.parse::<u64>().ok())
                .ok_or_else(|| RepositoryError::InvalidData("Missing points after increment".to_string())),
            Err(e) => {
                if e
                    .as_service_error()
                    .is_some_and(|se| se.is_conditional_check_failed_exception())
                {
                    return Err(RepositoryError::NotFound);
                }
                let error_msg = if let Some(service_err) = e.as_service_error() {
                    format!("Service error: {:?}", service_err)
                } else {
                    format!("SDK error: {}", e)
                };
                Err(RepositoryError::DynamoDb(error_msg))
            }
        }
    }

    async fn append_event(&self, event: &WasteEvent) -> Result<(), RepositoryError> {
        self.client
            .put_item()
            .table_name(&self.events_table)
            .set_item(Some(Self::event_to_item(event)))
            .send()
            .await
            .map_err(|e| RepositoryError::DynamoDb(e.to_string()))?;

        Ok(())
    }

    async fn list_events(&self, uid: &str, limit: usize) -> Result<Vec<WasteEvent>, RepositoryError> {
        let result = self
            .client
            .query()
            .table_name(&self.events_table)
            .key_condition_expression("user_id = :user_id")
            .expression_attribute_values(":user_id", AttributeValue::S(uid.to_string()))
            .scan_index_forward(false)
            .limit(limit.min(i32::MAX as usize) as i32)
            .send()
            .await
            .map_err(|e| RepositoryError::DynamoDb(e.to_string()))?;

        result
            .items
            .unwrap_or_default()
            .iter()
            .map(Self::parse_event_from_item)
            .collect()
    }

    async fn top_profiles(&self, limit: usize) -> Result<Vec<UserProfile>, RepositoryError> {
        // The index orders by points only, so keep reading while the next page
        // could still hold profiles tied with the last ranked one.
        let mut profiles: Vec<UserProfile> = Vec::new();
        let mut start_key = None;

        loop {
            let result = self
                .client
                .query()
                .table_name(&self.users_table)
                .index_name(&self.leaderboard_index)
                .key_condition_expression("board = :board")
                .expression_attribute_values(":board", AttributeValue::S(LEADERBOARD_PARTITION.to_string()))
                .scan_index_forward(false)
                .limit((limit.max(1) + 1).min(i32::MAX as usize) as i32)
                .set_exclusive_start_key(start_key)
                .send()
                .await
                .map_err(|e| RepositoryError::DynamoDb(e.to_string()))?;

            for item in result.items.unwrap_or_default() {
                profiles.push(Self::parse_profile_from_item(&item)?);
            }

            start_key = result.last_evaluated_key;
            let points: Vec<u64> = profiles.iter().map(|p| p.points).collect();
            if top_n_complete(&points, limit, start_key.is_some()) {
                break;
            }
        }

        Ok(rank_profiles(profiles, limit))
    }
}

/// Whether `points`, read in descending order, already holds the top `limit`
/// profiles including every tie with the last of them.
fn top_n_complete(points: &[u64], limit: usize, more_pages: bool) -> bool {
    if !more_pages || limit == 0 {
        return true;
    }
    match (points.get(limit - 1), points.last()) {
        (Some(cutoff), Some(last)) => last < cutoff,
        _ => false,
    }
}
