use chrono::{DateTime, Utc};
use lora_as_error::StorageResult;
use lora_as_models::entities::prelude::{
    Device, DeviceActiveModel, DeviceColumn, DeviceModel, DeviceMulticastGroup,
    DeviceMulticastGroupColumn,
};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter,
    QuerySelect, Set,
};

/// Repository for end-devices
pub struct DeviceRepository;

impl DeviceRepository {
    pub async fn create<C>(device: DeviceActiveModel, db: &C) -> StorageResult<DeviceModel>
    where
        C: ConnectionTrait,
    {
        Ok(device.insert(db).await?)
    }

    pub async fn find_by_dev_eui<C>(dev_eui: &[u8], db: &C) -> StorageResult<Option<DeviceModel>>
    where
        C: ConnectionTrait,
    {
        Ok(Device::find_by_id(dev_eui.to_vec()).one(db).await?)
    }

    pub async fn update<C>(device: DeviceActiveModel, db: &C) -> StorageResult<DeviceModel>
    where
        C: ConnectionTrait,
    {
        Ok(device.update(db).await?)
    }

    /// Records the outcome of an uplink: last-seen time, data-rate and the
    /// DevAddr it was sent from.
    pub async fn touch_uplink<C>(
        dev_eui: &[u8],
        dev_addr: &[u8],
        dr: Option<i16>,
        now: DateTime<Utc>,
        db: &C,
    ) -> StorageResult<()>
    where
        C: ConnectionTrait,
    {
        Device::update_many()
            .col_expr(DeviceColumn::LastSeenAt, Expr::value(Some(now)))
            .col_expr(DeviceColumn::Dr, Expr::value(dr))
            .col_expr(DeviceColumn::DevAddr, Expr::value(dev_addr.to_vec()))
            .col_expr(DeviceColumn::UpdatedAt, Expr::value(now))
            .filter(DeviceColumn::DevEui.eq(dev_eui.to_vec()))
            .exec(db)
            .await?;
        Ok(())
    }

    /// Persists the last reported battery and link margin.
    pub async fn set_status<C>(
        device: DeviceModel,
        battery: Option<i16>,
        margin: i16,
        external_power_source: bool,
        db: &C,
    ) -> StorageResult<DeviceModel>
    where
        C: ConnectionTrait,
    {
        let mut am: DeviceActiveModel = device.into();
        am.device_status_battery = Set(battery);
        am.device_status_margin = Set(Some(margin));
        am.device_status_external_power_source = Set(external_power_source);
        am.updated_at = Set(Utc::now());
        Ok(am.update(db).await?)
    }

    pub async fn set_location<C>(
        device: DeviceModel,
        latitude: f64,
        longitude: f64,
        altitude: f64,
        db: &C,
    ) -> StorageResult<DeviceModel>
    where
        C: ConnectionTrait,
    {
        let mut am: DeviceActiveModel = device.into();
        am.latitude = Set(Some(latitude));
        am.longitude = Set(Some(longitude));
        am.altitude = Set(Some(altitude));
        am.updated_at = Set(Utc::now());
        Ok(am.update(db).await?)
    }

    /// DevEUIs of the members of a multicast group.
    pub async fn find_dev_euis_for_multicast_group<C>(
        multicast_group_id: uuid::Uuid,
        db: &C,
    ) -> StorageResult<Vec<Vec<u8>>>
    where
        C: ConnectionTrait,
    {
        Ok(DeviceMulticastGroup::find()
            .select_only()
            .column(DeviceMulticastGroupColumn::DevEui)
            .filter(DeviceMulticastGroupColumn::MulticastGroupId.eq(multicast_group_id))
            .into_tuple::<Vec<u8>>()
            .all(db)
            .await?)
    }
}
