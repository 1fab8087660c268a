use lora_as_error::{storage::StorageError, StorageResult};
use lora_as_models::entities::prelude::{
    Application, Device, DeviceProfile, NetworkServer, NetworkServerActiveModel,
    NetworkServerModel, ServiceProfile,
};
use sea_orm::{ActiveModelTrait, ConnectionTrait, EntityTrait};

/// Repository for network-server records and the lookups that route a
/// request to the network-server owning a device or an application.
pub struct NetworkServerRepository;

impl NetworkServerRepository {
    pub async fn create<C>(
        ns: NetworkServerActiveModel,
        db: &C,
    ) -> StorageResult<NetworkServerModel>
    where
        C: ConnectionTrait,
    {
        Ok(ns.insert(db).await?)
    }

    pub async fn find_by_id<C>(id: i32, db: &C) -> StorageResult<NetworkServerModel>
    where
        C: ConnectionTrait,
    {
        NetworkServer::find_by_id(id)
            .one(db)
            .await?
            .ok_or_else(|| StorageError::EntityNotFound(format!("network-server {id}")))
    }

    /// Device -> device-profile -> network-server.
    pub async fn find_for_device<C>(dev_eui: &[u8], db: &C) -> StorageResult<NetworkServerModel>
    where
        C: ConnectionTrait,
    {
        let device = Device::find_by_id(dev_eui.to_vec())
            .one(db)
            .await?
            .ok_or_else(|| StorageError::EntityNotFound(format!("device {}", hex::encode(dev_eui))))?;
        let profile = DeviceProfile::find_by_id(device.device_profile_id)
            .one(db)
            .await?
            .ok_or_else(|| {
                StorageError::EntityNotFound(format!("device-profile {}", device.device_profile_id))
            })?;
        Self::find_by_id(profile.network_server_id, db).await
    }

    /// Application -> service-profile -> network-server.
    pub async fn find_for_application<C>(
        application_id: i32,
        db: &C,
    ) -> StorageResult<NetworkServerModel>
    where
        C: ConnectionTrait,
    {
        let app = Application::find_by_id(application_id)
            .one(db)
            .await?
            .ok_or_else(|| StorageError::EntityNotFound(format!("application {application_id}")))?;
        let sp = ServiceProfile::find_by_id(app.service_profile_id)
            .one(db)
            .await?
            .ok_or_else(|| {
                StorageError::EntityNotFound(format!("service-profile {}", app.service_profile_id))
            })?;
        Self::find_by_id(sp.network_server_id, db).await
    }
}
