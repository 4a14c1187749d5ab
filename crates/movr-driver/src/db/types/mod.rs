pub mod location;
pub mod node;
pub mod ride;
pub mod user;
pub mod vehicle;
