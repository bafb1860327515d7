pub mod inbound;

pub use inbound::{
    dedup_token_for, ordering_key_for, InboundEvent, IngressError, IngressOutcome,
};
