mod events;
mod routes;
mod ws_handler;

pub use events::InventoryEvent;
pub use routes::websocket_routes;
pub use ws_handler::{inventory_feed, next_company_event};
