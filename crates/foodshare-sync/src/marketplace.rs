//! Posting and browsing food listings and requests.

use chrono::{TimeDelta, Utc};
use tracing::error;
use uuid::Uuid;

use foodshare_geo::{Coordinates, distance_meters, format_distance};
use foodshare_types::api::{NewFoodRequest, NewListing};
use foodshare_types::{FoodListing, FoodRequest, RequestStatus, Urgency, UserRole};

use crate::backend::Backend;
use crate::error::{BackendError, Result, SyncError};
use crate::notify::Notice;

const DEFAULT_QUANTITY: &str = "1 serving";
const DEFAULT_LOCATION: &str = "Current Location";
/// How long a new request stays relevant by default.
const REQUEST_HORIZON_HOURS: i64 = 24;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListingDraft {
    pub food_type: String,
    pub description: String,
    /// Blank means one serving.
    pub quantity: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestDraft {
    pub food_preference: String,
    pub notes: String,
    pub urgency: Urgency,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MapItem {
    Listing(FoodListing),
    Request(FoodRequest),
}

impl MapItem {
    pub fn id(&self) -> Uuid {
        match self {
            Self::Listing(l) => l.id,
            Self::Request(r) => r.id,
        }
    }

    /// The user who posted the item.
    pub fn owner_id(&self) -> Uuid {
        match self {
            Self::Listing(l) => l.giver_id,
            Self::Request(r) => r.receiver_id,
        }
    }
}

/// A map marker: the item, where it is, and how far from the viewer.
#[derive(Debug, Clone, PartialEq)]
pub struct NearbyItem {
    pub item: MapItem,
    pub position: Coordinates,
    pub distance_meters: Option<f64>,
}

impl NearbyItem {
    fn new(item: MapItem, position: Coordinates, origin: Option<Coordinates>) -> Self {
        Self {
            item,
            position,
            distance_meters: origin.map(|o| distance_meters(o, position)),
        }
    }

    pub fn distance_label(&self) -> Option<String> {
        self.distance_meters.map(format_distance)
    }
}

pub struct MarketplaceService {
    backend: Backend,
}

impl MarketplaceService {
    pub fn new(backend: Backend) -> Self {
        Self { backend }
    }

    async fn signed_in(&self) -> Result<Option<Uuid>> {
        self.backend.auth.current_user().await.map_err(|e| {
            error!("Failed to read current user: {}", e);
            self.backend
                .notifier
                .notify(Notice::error("Could not check your sign-in"));
            SyncError::from(e)
        })
    }

    fn report(&self, e: &BackendError, fallback: &str) {
        error!("{}: {}", fallback, e);
        let message = e.to_string();
        self.backend.notifier.notify(Notice::error(if message.is_empty() {
            fallback.to_string()
        } else {
            message
        }));
    }

    /// Offer food at `location`.
    pub async fn post_listing(
        &self,
        draft: ListingDraft,
        location: Option<Coordinates>,
    ) -> Result<FoodListing> {
        let Some(giver_id) = self.signed_in().await? else {
            self.backend.notifier.notify(Notice::error("Not authenticated"));
            return Err(SyncError::AuthRequired);
        };

        let quantity = if draft.quantity.trim().is_empty() {
            DEFAULT_QUANTITY.to_string()
        } else {
            draft.quantity
        };
        let listing = NewListing {
            giver_id,
            title: draft.food_type.clone(),
            food_type: draft.food_type,
            description: draft.description,
            quantity,
            location: DEFAULT_LOCATION.to_string(),
            pickup_time: Utc::now(),
            latitude: location.map(|c| c.lat),
            longitude: location.map(|c| c.lng),
            is_available: true,
        };

        match self.backend.marketplace.insert_listing(&listing).await {
            Ok(row) => {
                self.backend
                    .notifier
                    .notify(Notice::success("Food listing added successfully!"));
                Ok(row)
            }
            Err(e) => {
                self.report(&e, "Failed to add listing");
                Err(e.into())
            }
        }
    }

    /// Ask for food near `location`.
    pub async fn post_request(
        &self,
        draft: RequestDraft,
        location: Option<Coordinates>,
    ) -> Result<FoodRequest> {
        let Some(receiver_id) = self.signed_in().await? else {
            self.backend.notifier.notify(Notice::error("Not authenticated"));
            return Err(SyncError::AuthRequired);
        };

        let request = NewFoodRequest {
            receiver_id,
            food_preference: draft.food_preference,
            notes: draft.notes,
            urgency_level: draft.urgency,
            latitude: location.map_or(0.0, |c| c.lat),
            longitude: location.map_or(0.0, |c| c.lng),
            location_address: DEFAULT_LOCATION.to_string(),
            needed_by: Utc::now() + TimeDelta::hours(REQUEST_HORIZON_HOURS),
            people_count: 1,
            status: RequestStatus::Active,
        };

        match self.backend.marketplace.insert_request(&request).await {
            Ok(row) => {
                self.backend
                    .notifier
                    .notify(Notice::success("Food request added successfully!"));
                Ok(row)
            }
            Err(e) => {
                self.report(&e, "Failed to add request");
                Err(e.into())
            }
        }
    }

    /// The signed-in giver's listings, newest first. Empty when signed out.
    pub async fn my_listings(&self) -> Result<Vec<FoodListing>> {
        let Some(me) = self.signed_in().await? else {
            return Ok(Vec::new());
        };
        self.backend
            .marketplace
            .listings_by_giver(me)
            .await
            .map_err(|e| {
                error!("Error fetching listings: {}", e);
                e.into()
            })
    }

    /// The signed-in receiver's requests, newest first. Empty when signed out.
    pub async fn my_requests(&self) -> Result<Vec<FoodRequest>> {
        let Some(me) = self.signed_in().await? else {
            return Ok(Vec::new());
        };
        self.backend
            .marketplace
            .requests_by_receiver(me)
            .await
            .map_err(|e| {
                error!("Error fetching requests: {}", e);
                e.into()
            })
    }

    /// Markers for the map. Receivers browse available listings, givers
    /// browse active requests (with the receivers' profiles attached).
    pub async fn map_items(
        &self,
        role: UserRole,
        origin: Option<Coordinates>,
    ) -> Result<Vec<NearbyItem>> {
        let items = match role {
            UserRole::FoodReceiver => self.listing_markers(origin).await,
            UserRole::FoodGiver => self.request_markers(origin).await,
        };
        items.map_err(|e| {
            error!(?role, "Failed to load map data: {}", e);
            e.into()
        })
    }

    async fn listing_markers(
        &self,
        origin: Option<Coordinates>,
    ) -> std::result::Result<Vec<NearbyItem>, BackendError> {
        let listings = self.backend.marketplace.available_listings().await?;
        Ok(listings
            .into_iter()
            .filter_map(|l| {
                let position = Coordinates::from_row(l.latitude, l.longitude)?;
                Some(NearbyItem::new(MapItem::Listing(l), position, origin))
            })
            .collect())
    }

    async fn request_markers(
        &self,
        origin: Option<Coordinates>,
    ) -> std::result::Result<Vec<NearbyItem>, BackendError> {
        let requests = self.backend.marketplace.active_requests().await?;
        if requests.is_empty() {
            return Ok(Vec::new());
        }

        let mut receiver_ids: Vec<Uuid> = requests.iter().map(|r| r.receiver_id).collect();
        receiver_ids.sort();
        receiver_ids.dedup();
        let profiles = self.backend.directory.list_profiles(&receiver_ids).await?;

        Ok(requests
            .into_iter()
            .filter_map(|mut r| {
                let position = Coordinates::from_row(r.latitude, r.longitude)?;
                r.receiver = profiles.get(&r.receiver_id).cloned();
                Some(NearbyItem::new(MapItem::Request(r), position, origin))
            })
            .collect())
    }
}
