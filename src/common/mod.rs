pub mod httpu;
pub mod interface;
pub mod uri;
pub mod user_agent;
