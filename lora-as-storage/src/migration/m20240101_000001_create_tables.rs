use lora_as_models::entities::{
    application, device, device_activation, device_keys, device_multicast_group, device_profile,
    device_queue, fuota_deployment, fuota_deployment_device, gateway, gateway_ping,
    gateway_ping_rx, integration, multicast_group, network_server, remote_fragmentation_session,
    remote_multicast_class_c_session, remote_multicast_setup, service_profile,
};
use sea_orm::{EntityTrait, Schema};
use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        create_tables(manager).await?;
        create_indexes(manager).await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // reverse foreign-key order
        drop_table(manager, integration::Entity).await?;
        drop_table(manager, gateway_ping_rx::Entity).await?;
        drop_table(manager, gateway_ping::Entity).await?;
        drop_table(manager, gateway::Entity).await?;
        drop_table(manager, remote_multicast_class_c_session::Entity).await?;
        drop_table(manager, remote_fragmentation_session::Entity).await?;
        drop_table(manager, remote_multicast_setup::Entity).await?;
        drop_table(manager, fuota_deployment_device::Entity).await?;
        drop_table(manager, fuota_deployment::Entity).await?;
        drop_table(manager, device_multicast_group::Entity).await?;
        drop_table(manager, multicast_group::Entity).await?;
        drop_table(manager, device_queue::Entity).await?;
        drop_table(manager, device_activation::Entity).await?;
        drop_table(manager, device_keys::Entity).await?;
        drop_table(manager, device::Entity).await?;
        drop_table(manager, device_profile::Entity).await?;
        drop_table(manager, application::Entity).await?;
        drop_table(manager, service_profile::Entity).await?;
        drop_table(manager, network_server::Entity).await?;
        Ok(())
    }
}

async fn create_table<E: EntityTrait>(manager: &SchemaManager<'_>, entity: E) -> Result<(), DbErr> {
    let schema = Schema::new(manager.get_database_backend());
    manager
        .create_table(schema.create_table_from_entity(entity).if_not_exists().to_owned())
        .await
}

async fn drop_table<E: EntityTrait>(manager: &SchemaManager<'_>, entity: E) -> Result<(), DbErr> {
    manager
        .drop_table(Table::drop().table(entity).if_exists().to_owned())
        .await
}

async fn create_tables(manager: &SchemaManager<'_>) -> Result<(), DbErr> {
    create_table(manager, network_server::Entity).await?;
    create_table(manager, service_profile::Entity).await?;
    create_table(manager, application::Entity).await?;
    create_table(manager, device_profile::Entity).await?;
    create_table(manager, device::Entity).await?;
    create_table(manager, device_keys::Entity).await?;
    create_table(manager, device_activation::Entity).await?;
    create_table(manager, device_queue::Entity).await?;
    create_table(manager, multicast_group::Entity).await?;
    create_table(manager, device_multicast_group::Entity).await?;
    create_table(manager, fuota_deployment::Entity).await?;
    create_table(manager, fuota_deployment_device::Entity).await?;
    create_table(manager, remote_multicast_setup::Entity).await?;
    create_table(manager, remote_fragmentation_session::Entity).await?;
    create_table(manager, remote_multicast_class_c_session::Entity).await?;
    create_table(manager, gateway::Entity).await?;
    create_table(manager, gateway_ping::Entity).await?;
    create_table(manager, gateway_ping_rx::Entity).await?;
    create_table(manager, integration::Entity).await?;
    Ok(())
}

async fn create_indexes(manager: &SchemaManager<'_>) -> Result<(), DbErr> {
    let indexes = [
        Index::create()
            .name("idx_device_activation_dev_eui")
            .table(device_activation::Entity)
            .col(device_activation::Column::DevEui)
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("idx_device_queue_dev_eui")
            .table(device_queue::Entity)
            .col(device_queue::Column::DevEui)
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("idx_fuota_deployment_next_step_after")
            .table(fuota_deployment::Entity)
            .col(fuota_deployment::Column::NextStepAfter)
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("idx_remote_multicast_setup_retry")
            .table(remote_multicast_setup::Entity)
            .col(remote_multicast_setup::Column::StateProvisioned)
            .col(remote_multicast_setup::Column::RetryAfter)
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("idx_remote_fragmentation_session_retry")
            .table(remote_fragmentation_session::Entity)
            .col(remote_fragmentation_session::Column::StateProvisioned)
            .col(remote_fragmentation_session::Column::RetryAfter)
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("idx_remote_multicast_class_c_session_retry")
            .table(remote_multicast_class_c_session::Entity)
            .col(remote_multicast_class_c_session::Column::StateProvisioned)
            .col(remote_multicast_class_c_session::Column::RetryAfter)
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("idx_gateway_last_ping_sent_at")
            .table(gateway::Entity)
            .col(gateway::Column::LastPingSentAt)
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("idx_gateway_ping_rx_ping_id")
            .table(gateway_ping_rx::Entity)
            .col(gateway_ping_rx::Column::PingId)
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("idx_integration_application_id")
            .table(integration::Entity)
            .col(integration::Column::ApplicationId)
            .if_not_exists()
            .to_owned(),
    ];

    for stmt in indexes {
        manager.create_index(stmt).await?;
    }
    Ok(())
}
