mod application;
mod credential;
mod in_memory_credential_repository;
mod outbound;
mod result;
mod uplink;

pub use application::*;
pub use credential::*;
pub use in_memory_credential_repository::*;
pub use outbound::*;
pub use result::*;
pub use uplink::*;
