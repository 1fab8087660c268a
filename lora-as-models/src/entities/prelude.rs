pub use super::application::{
    ActiveModel as ApplicationActiveModel, Column as ApplicationColumn, Entity as Application,
    Model as ApplicationModel,
};
pub use super::device::{
    ActiveModel as DeviceActiveModel, Column as DeviceColumn, Entity as Device,
    Model as DeviceModel,
};
pub use super::device_activation::{
    ActiveModel as DeviceActivationActiveModel, Column as DeviceActivationColumn, Entity as DeviceActivation,
    Model as DeviceActivationModel,
};
pub use super::device_keys::{
    ActiveModel as DeviceKeysActiveModel, Column as DeviceKeysColumn, Entity as DeviceKeys,
    Model as DeviceKeysModel,
};
pub use super::device_multicast_group::{
    ActiveModel as DeviceMulticastGroupActiveModel, Column as DeviceMulticastGroupColumn, Entity as DeviceMulticastGroup,
    Model as DeviceMulticastGroupModel,
};
pub use super::device_profile::{
    ActiveModel as DeviceProfileActiveModel, Column as DeviceProfileColumn, Entity as DeviceProfile,
    Model as DeviceProfileModel,
};
pub use super::device_queue::{
    ActiveModel as DeviceQueueActiveModel, Column as DeviceQueueColumn, Entity as DeviceQueue,
    Model as DeviceQueueModel,
};
pub use super::fuota_deployment::{
    ActiveModel as FuotaDeploymentActiveModel, Column as FuotaDeploymentColumn, Entity as FuotaDeployment,
    Model as FuotaDeploymentModel,
};
pub use super::fuota_deployment_device::{
    ActiveModel as FuotaDeploymentDeviceActiveModel, Column as FuotaDeploymentDeviceColumn, Entity as FuotaDeploymentDevice,
    Model as FuotaDeploymentDeviceModel,
};
pub use super::gateway::{
    ActiveModel as GatewayActiveModel, Column as GatewayColumn, Entity as Gateway,
    Model as GatewayModel,
};
pub use super::gateway_ping::{
    ActiveModel as GatewayPingActiveModel, Column as GatewayPingColumn, Entity as GatewayPing,
    Model as GatewayPingModel,
};
pub use super::gateway_ping_rx::{
    ActiveModel as GatewayPingRxActiveModel, Column as GatewayPingRxColumn, Entity as GatewayPingRx,
    Model as GatewayPingRxModel,
};
pub use super::integration::{
    ActiveModel as IntegrationActiveModel, Column as IntegrationColumn, Entity as Integration,
    Model as IntegrationModel,
};
pub use super::multicast_group::{
    ActiveModel as MulticastGroupActiveModel, Column as MulticastGroupColumn, Entity as MulticastGroup,
    Model as MulticastGroupModel,
};
pub use super::network_server::{
    ActiveModel as NetworkServerActiveModel, Column as NetworkServerColumn, Entity as NetworkServer,
    Model as NetworkServerModel,
};
pub use super::remote_fragmentation_session::{
    ActiveModel as RemoteFragmentationSessionActiveModel, Column as RemoteFragmentationSessionColumn, Entity as RemoteFragmentationSession,
    Model as RemoteFragmentationSessionModel,
};
pub use super::remote_multicast_class_c_session::{
    ActiveModel as RemoteMulticastClassCSessionActiveModel, Column as RemoteMulticastClassCSessionColumn, Entity as RemoteMulticastClassCSession,
    Model as RemoteMulticastClassCSessionModel,
};
pub use super::remote_multicast_setup::{
    ActiveModel as RemoteMulticastSetupActiveModel, Column as RemoteMulticastSetupColumn, Entity as RemoteMulticastSetup,
    Model as RemoteMulticastSetupModel,
};
pub use super::service_profile::{
    ActiveModel as ServiceProfileActiveModel, Column as ServiceProfileColumn, Entity as ServiceProfile,
    Model as ServiceProfileModel,
};
pub use super::device::KeyValues;
pub use super::remote_fragmentation_session::McGroupIds;
