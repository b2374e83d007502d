//! Adapters between codec frames and application messages

pub(crate) mod inbound;
pub(crate) mod outbound;

pub(crate) use inbound::run_inbound;
pub(crate) use outbound::{run_outbound, shutdown_requested, MessageSink, OutboundExit};
