mod card_gateway;
mod hosted_checkout;

pub use card_gateway::*;
pub use hosted_checkout::*;
