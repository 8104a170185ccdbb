//! Notification endpoints

use futures::future::BoxFuture;
use futures::FutureExt;

use super::chat::Listing;
use super::client::{ApiError, RemediClient};
use crate::models::Notification;
use crate::notifications::NotificationSource;

/// Fetch the recent notifications of the signed-in user.
pub async fn list_notifications(client: &RemediClient) -> Result<Vec<Notification>, ApiError> {
    let listing: Listing<Notification> = client.get_json("notifications/", &[]).await?;
    Ok(listing.into_vec())
}

pub async fn mark_read(client: &RemediClient, id: &str) -> Result<(), ApiError> {
    client
        .post(&format!("notifications/{}/read/", id), &serde_json::json!({}))
        .await?;
    Ok(())
}

pub async fn mark_all_read(client: &RemediClient) -> Result<(), ApiError> {
    client
        .post("notifications/read-all/", &serde_json::json!({}))
        .await?;
    Ok(())
}

impl NotificationSource for RemediClient {
    fn fetch_notifications(&self) -> BoxFuture<'_, Result<Vec<Notification>, ApiError>> {
        list_notifications(self).boxed()
    }
}
