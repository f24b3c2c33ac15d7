mod common;

use chrono::{TimeDelta, Utc};

use common::Harness;
use foodshare_geo::Coordinates;
use foodshare_sync::memory::Operation;
use foodshare_sync::{
    ListingDraft, MapItem, MarketplaceService, NoticeLevel, RequestDraft, SyncError,
};
use foodshare_types::{RequestStatus, Urgency, UserRole};

fn draft(food_type: &str) -> ListingDraft {
    ListingDraft {
        food_type: food_type.to_string(),
        description: "Fresh from this morning".to_string(),
        quantity: String::new(),
    }
}

fn here() -> Coordinates {
    Coordinates::new(52.5200, 13.4050).unwrap()
}

#[tokio::test]
async fn listing_gets_defaults_and_success_notice() {
    let h = Harness::new();
    let giver = h.signed_in_as("Bakery");
    let market = MarketplaceService::new(h.backend.clone());

    let listing = market.post_listing(draft("Bread"), Some(here())).await.unwrap();

    assert_eq!(listing.giver_id, giver);
    assert_eq!(listing.title, "Bread");
    assert_eq!(listing.quantity, "1 serving");
    assert_eq!(listing.location, "Current Location");
    assert_eq!(listing.latitude, Some(52.5200));
    assert!(listing.is_available);
    let notices = h.notices.take();
    assert_eq!(notices[0].level, NoticeLevel::Success);
    assert_eq!(notices[0].message, "Food listing added successfully!");
}

#[tokio::test]
async fn listing_keeps_given_quantity() {
    let h = Harness::new();
    h.signed_in_as("Bakery");
    let market = MarketplaceService::new(h.backend.clone());

    let listing = market
        .post_listing(
            ListingDraft {
                quantity: "3 loaves".to_string(),
                ..draft("Bread")
            },
            None,
        )
        .await
        .unwrap();

    assert_eq!(listing.quantity, "3 loaves");
    assert_eq!(listing.latitude, None);
}

#[tokio::test]
async fn request_gets_defaults() {
    let h = Harness::new();
    let receiver = h.signed_in_as("Dana");
    let market = MarketplaceService::new(h.backend.clone());
    let before = Utc::now();

    let request = market
        .post_request(
            RequestDraft {
                food_preference: "Vegetables".to_string(),
                notes: String::new(),
                urgency: Urgency::High,
            },
            None,
        )
        .await
        .unwrap();

    assert_eq!(request.receiver_id, receiver);
    assert_eq!(request.latitude, Some(0.0));
    assert_eq!(request.longitude, Some(0.0));
    assert_eq!(request.people_count, 1);
    assert_eq!(request.status, RequestStatus::Active);
    assert_eq!(request.urgency_level, Urgency::High);
    assert!(request.needed_by >= before + TimeDelta::hours(24));
    assert!(request.needed_by <= Utc::now() + TimeDelta::hours(24));
    assert_eq!(h.notices.messages(), vec!["Food request added successfully!"]);
}

#[tokio::test]
async fn posting_signed_out_is_refused() {
    let h = Harness::new();
    let market = MarketplaceService::new(h.backend.clone());

    let result = market.post_listing(draft("Bread"), None).await;

    assert!(matches!(result, Err(SyncError::AuthRequired)));
    assert_eq!(h.store.calls(Operation::InsertListing), 0);
    assert_eq!(h.notices.messages(), vec!["Not authenticated"]);
}

#[tokio::test]
async fn auth_outage_is_reported_before_posting() {
    let h = Harness::new();
    h.signed_in_as("Bakery");
    h.store.fail(Operation::CurrentUser);
    let market = MarketplaceService::new(h.backend.clone());

    let result = market.post_listing(draft("Bread"), None).await;

    assert!(matches!(result, Err(SyncError::Remote(_))));
    assert_eq!(h.store.calls(Operation::InsertListing), 0);
    assert_eq!(h.notices.messages(), vec!["Could not check your sign-in"]);
}

#[tokio::test]
async fn failed_insert_surfaces_backend_message() {
    let h = Harness::new();
    h.signed_in_as("Bakery");
    h.store.fail(Operation::InsertListing);
    let market = MarketplaceService::new(h.backend.clone());

    assert!(market.post_listing(draft("Bread"), None).await.is_err());

    let notices = h.notices.take();
    assert_eq!(notices[0].level, NoticeLevel::Error);
    assert_eq!(notices[0].message, "InsertListing failed");
}

#[tokio::test]
async fn own_items_newest_first_and_empty_when_signed_out() {
    let h = Harness::new();
    h.signed_in_as("Bakery");
    let market = MarketplaceService::new(h.backend.clone());
    let first = market.post_listing(draft("Bread"), None).await.unwrap();
    let second = market.post_listing(draft("Soup"), None).await.unwrap();

    let mine = market.my_listings().await.unwrap();
    assert_eq!(mine, vec![second, first]);
    assert!(market.my_requests().await.unwrap().is_empty());

    h.store.sign_out();
    assert!(market.my_listings().await.unwrap().is_empty());
}

#[tokio::test]
async fn receivers_see_positioned_listings_with_distance() {
    let h = Harness::new();
    h.signed_in_as("Bakery");
    let market = MarketplaceService::new(h.backend.clone());
    let near = Coordinates::new(52.5205, 13.4050).unwrap();
    let far = Coordinates::new(52.5290, 13.4050).unwrap();
    market.post_listing(draft("Bread"), Some(near)).await.unwrap();
    market.post_listing(draft("Soup"), Some(far)).await.unwrap();
    market.post_listing(draft("Cake"), None).await.unwrap();

    let items = market.map_items(UserRole::FoodReceiver, Some(here())).await.unwrap();

    assert_eq!(items.len(), 2);
    let labels: Vec<String> = items.iter().filter_map(|i| i.distance_label()).collect();
    assert_eq!(labels, vec!["1.0km away", "56m away"]);
    match &items[1].item {
        MapItem::Listing(listing) => {
            assert_eq!(listing.food_type, "Bread");
            assert_eq!(listing.giver.as_ref().and_then(|g| g.full_name.as_deref()), Some("Bakery"));
        }
        other => panic!("expected a listing, got {:?}", other),
    }
}

#[tokio::test]
async fn givers_see_requests_with_receiver_profiles() {
    let h = Harness::new();
    let dana = h.signed_in_as("Dana");
    let market = MarketplaceService::new(h.backend.clone());
    let request = market
        .post_request(RequestDraft::default(), Some(here()))
        .await
        .unwrap();

    h.signed_in_as("Bakery");
    let items = market.map_items(UserRole::FoodGiver, None).await.unwrap();

    assert_eq!(items.len(), 1);
    assert_eq!(items[0].item.id(), request.id);
    assert_eq!(items[0].item.owner_id(), dana);
    assert_eq!(items[0].distance_meters, None);
    match &items[0].item {
        MapItem::Request(r) => {
            assert_eq!(r.receiver.as_ref().map(|p| p.id), Some(dana));
        }
        other => panic!("expected a request, got {:?}", other),
    }
    assert_eq!(h.store.calls(Operation::ListProfiles), 1);
}

#[tokio::test]
async fn map_failure_is_an_error() {
    let h = Harness::new();
    h.signed_in_as("Bakery");
    h.store.fail(Operation::ListRequests);
    let market = MarketplaceService::new(h.backend.clone());

    let result = market.map_items(UserRole::FoodGiver, None).await;

    assert!(matches!(result, Err(SyncError::Remote(_))));
}
