pub mod agent_client;
pub mod arrival_batcher;
pub mod event_stream;
pub mod geocoder;
pub mod incident_handlers;
pub mod map_view;
pub mod session;
