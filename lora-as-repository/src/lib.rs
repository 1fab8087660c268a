//! Stateless data access for the application server.
//!
//! Every function takes the connection explicitly so it composes with
//! `TransactionTrait::transaction` callers. Row locks (`FOR UPDATE`,
//! `SKIP LOCKED`) are rendered on Postgres and dropped by the SQLite builder.
pub mod application;
pub mod device;
pub mod device_activation;
pub mod device_keys;
pub mod device_profile;
pub mod device_queue;
pub mod fuota;
pub mod gateway;
pub mod integration;
pub mod multicast_group;
pub mod network_server;
pub mod remote_fragmentation_session;
pub mod remote_multicast_class_c_session;
pub mod remote_multicast_setup;

pub use application::ApplicationRepository;
pub use device::DeviceRepository;
pub use device_activation::DeviceActivationRepository;
pub use device_keys::DeviceKeysRepository;
pub use device_profile::DeviceProfileRepository;
pub use device_queue::DeviceQueueRepository;
pub use fuota::{FuotaDeploymentDeviceRepository, FuotaDeploymentRepository};
pub use gateway::{GatewayPingRepository, GatewayRepository};
pub use integration::IntegrationRepository;
pub use multicast_group::MulticastGroupRepository;
pub use network_server::NetworkServerRepository;
pub use remote_fragmentation_session::RemoteFragmentationSessionRepository;
pub use remote_multicast_class_c_session::RemoteMulticastClassCSessionRepository;
pub use remote_multicast_setup::RemoteMulticastSetupRepository;
