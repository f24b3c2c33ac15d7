use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use uuid::Uuid;

use foodshare_client::{ClientConfig, RemoteBackend};
use foodshare_geo::Coordinates;
use foodshare_sync::{
    Backend, ConversationIndex, ConversationSession, ListingDraft, MapItem, MarketplaceService,
    RequestDraft, TracingNotifier,
};
use foodshare_types::{ConversationDetails, Urgency, UserRole};

#[derive(Parser)]
#[command(name = "foodshare")]
#[command(about = "Food sharing marketplace client", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List your conversations, most recent first
    Inbox,

    /// Keep printing the inbox as messages arrive (Ctrl-C to stop)
    Watch,

    /// Send a message to another user
    Send {
        /// Recipient user id
        peer: Uuid,
        /// Message text
        text: String,
    },

    /// Offer food
    Offer {
        #[arg(long)]
        food_type: String,
        #[arg(long, default_value = "")]
        description: String,
        /// Defaults to one serving
        #[arg(long, default_value = "")]
        quantity: String,
        #[arg(long, requires = "lng")]
        lat: Option<f64>,
        #[arg(long, requires = "lat")]
        lng: Option<f64>,
    },

    /// Ask for food
    Request {
        #[arg(long)]
        food: String,
        #[arg(long, default_value = "")]
        notes: String,
        #[arg(long, value_enum, default_value = "medium")]
        urgency: UrgencyArg,
        #[arg(long, requires = "lng")]
        lat: Option<f64>,
        #[arg(long, requires = "lat")]
        lng: Option<f64>,
    },

    /// Your own listings and requests
    Mine,

    /// Items on the map around a position
    Nearby {
        /// Givers see requests, receivers see listings
        #[arg(long, value_enum)]
        role: RoleArg,
        #[arg(long, requires = "lng")]
        lat: Option<f64>,
        #[arg(long, requires = "lat")]
        lng: Option<f64>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum RoleArg {
    Giver,
    Receiver,
}

impl From<RoleArg> for UserRole {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Giver => UserRole::FoodGiver,
            RoleArg::Receiver => UserRole::FoodReceiver,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum UrgencyArg {
    Low,
    Medium,
    High,
}

impl From<UrgencyArg> for Urgency {
    fn from(urgency: UrgencyArg) -> Self {
        match urgency {
            UrgencyArg::Low => Urgency::Low,
            UrgencyArg::Medium => Urgency::Medium,
            UrgencyArg::High => Urgency::High,
        }
    }
}

fn position(lat: Option<f64>, lng: Option<f64>) -> anyhow::Result<Option<Coordinates>> {
    match (lat, lng) {
        (Some(lat), Some(lng)) => Ok(Some(Coordinates::new(lat, lng)?)),
        _ => Ok(None),
    }
}

fn print_inbox(rows: &[ConversationDetails]) {
    if rows.is_empty() {
        println!("No conversations yet.");
        return;
    }
    for row in rows {
        let name = row.other_user_name.as_deref().unwrap_or("Unknown user");
        let last = row.last_message_text.as_deref().unwrap_or("");
        let when = row
            .last_message_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        let unread = if row.unread_count > 0 {
            format!(" ({} unread)", row.unread_count)
        } else {
            String::new()
        };
        println!("{}  {}{}  {}  {}", row.id, name, unread, when, last);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "foodshare=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = ClientConfig::from_env().context("loading backend configuration")?;
    info!(url = %config.url, signed_in = config.access_token.is_some(), "foodshare client");
    let remote = Arc::new(RemoteBackend::new(config)?);
    let backend = Backend::from_shared(remote, Arc::new(TracingNotifier));

    match cli.command {
        Commands::Inbox => {
            let index = ConversationIndex::new(backend);
            print_inbox(&index.load().await?);
        }
        Commands::Watch => {
            let index = Arc::new(ConversationIndex::new(backend));
            let mut updates = index.updates();
            let watch = index.watch().await?;
            print_inbox(&updates.borrow_and_update());

            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    changed = updates.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        println!();
                        print_inbox(&updates.borrow_and_update());
                    }
                }
            }
            watch.close().await;
        }
        Commands::Send { peer, text } => {
            let session = ConversationSession::open(backend, Some(peer)).await;
            if session.current_user().is_none() {
                bail!("Sign in first: set FOODSHARE_ACCESS_TOKEN");
            }
            let message = session.send(&text).await?;
            println!("Sent {} in conversation {}", message.id, message.conversation_id);
        }
        Commands::Offer { food_type, description, quantity, lat, lng } => {
            let market = MarketplaceService::new(backend);
            let draft = ListingDraft { food_type, description, quantity };
            let listing = market.post_listing(draft, position(lat, lng)?).await?;
            println!("Listed {} ({}) as {}", listing.food_type, listing.quantity, listing.id);
        }
        Commands::Request { food, notes, urgency, lat, lng } => {
            let market = MarketplaceService::new(backend);
            let draft = RequestDraft {
                food_preference: food,
                notes,
                urgency: urgency.into(),
            };
            let request = market.post_request(draft, position(lat, lng)?).await?;
            println!("Requested {} as {}", request.food_preference, request.id);
        }
        Commands::Mine => {
            let market = MarketplaceService::new(backend);
            let (listings, requests) = tokio::try_join!(market.my_listings(), market.my_requests())?;
            for l in &listings {
                let state = if l.is_available { "available" } else { "taken" };
                println!("listing  {}  {} ({}) {}", l.id, l.food_type, l.quantity, state);
            }
            for r in &requests {
                println!("request  {}  {} {:?} {:?}", r.id, r.food_preference, r.urgency_level, r.status);
            }
            if listings.is_empty() && requests.is_empty() {
                println!("Nothing posted yet.");
            }
        }
        Commands::Nearby { role, lat, lng } => {
            let market = MarketplaceService::new(backend);
            let items = market.map_items(role.into(), position(lat, lng)?).await?;
            for nearby in &items {
                let distance = nearby.distance_label().unwrap_or_default();
                match &nearby.item {
                    MapItem::Listing(l) => {
                        let giver = l.giver.as_ref().and_then(|p| p.display_name()).unwrap_or("Anonymous");
                        println!("{}  {} from {}  {}", l.id, l.food_type, giver, distance);
                    }
                    MapItem::Request(r) => {
                        let who = r.receiver.as_ref().and_then(|p| p.display_name()).unwrap_or("Anonymous");
                        println!("{}  {} for {}  {}", r.id, r.food_preference, who, distance);
                    }
                }
            }
            if items.is_empty() {
                println!("Nothing on the map right now.");
            }
        }
    }

    Ok(())
}
