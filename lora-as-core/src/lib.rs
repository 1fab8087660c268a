pub mod applayer;
pub mod codec;
pub mod downlink;
pub mod fuota;
pub mod gwping;
pub mod integration;
pub mod joinserver;
pub mod metrics;
pub mod nsclient;
pub mod server;
pub mod service;

// Re-export commonly used types
pub use downlink::DownlinkDispatcher;
pub use fuota::{FuotaScheduler, NewFuotaDeployment};
pub use joinserver::JoinServer;
pub use server::ASServer;
pub use service::{ApplicationServerService, UplinkRequest};
