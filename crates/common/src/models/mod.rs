mod binding;
mod connection;

pub use binding::TunnelBinding;
pub use connection::ConnectionMetadata;
