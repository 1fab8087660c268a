//! `SeaORM` entities of the application server schema

pub mod prelude;

pub mod application;
pub mod device;
pub mod device_activation;
pub mod device_keys;
pub mod device_multicast_group;
pub mod device_profile;
pub mod device_queue;
pub mod fuota_deployment;
pub mod fuota_deployment_device;
pub mod gateway;
pub mod gateway_ping;
pub mod gateway_ping_rx;
pub mod integration;
pub mod multicast_group;
pub mod network_server;
pub mod remote_fragmentation_session;
pub mod remote_multicast_class_c_session;
pub mod remote_multicast_setup;
pub mod service_profile;
