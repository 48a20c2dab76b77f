pub mod api;
pub mod events;
pub mod repeating;
pub mod shadow;
pub mod synchronizer;
