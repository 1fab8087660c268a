use chrono::{DateTime, Duration, Utc};
use lora_as_error::StorageResult;
use lora_as_models::entities::prelude::{
    Gateway, GatewayActiveModel, GatewayColumn, GatewayModel, GatewayPing,
    GatewayPingActiveModel, GatewayPingModel, GatewayPingRx, GatewayPingRxActiveModel,
    GatewayPingRxColumn, GatewayPingRxModel, NetworkServer, NetworkServerColumn,
    NetworkServerModel,
};
use sea_orm::{
    sea_query::{LockBehavior, LockType, NullOrdering},
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait, Order, QueryFilter,
    QueryOrder, QuerySelect, Set,
};

/// Due candidates tried per ping tick, rows locked by another replica are
/// skipped.
const PING_CANDIDATES: u64 = 50;

/// Repository for gateways
pub struct GatewayRepository;

impl GatewayRepository {
    pub async fn create<C>(gateway: GatewayActiveModel, db: &C) -> StorageResult<GatewayModel>
    where
        C: ConnectionTrait,
    {
        Ok(gateway.insert(db).await?)
    }

    pub async fn find_by_mac<C>(mac: &[u8], db: &C) -> StorageResult<Option<GatewayModel>>
    where
        C: ConnectionTrait,
    {
        Ok(Gateway::find_by_id(mac.to_vec()).one(db).await?)
    }

    /// The gateway that waited the longest for its next discovery ping,
    /// together with its network-server. The gateway row stays locked until
    /// the surrounding transaction ends, rows locked by another replica are
    /// skipped.
    pub async fn find_next_for_ping<C>(
        now: DateTime<Utc>,
        db: &C,
    ) -> StorageResult<Option<(GatewayModel, NetworkServerModel)>>
    where
        C: ConnectionTrait,
    {
        let intervals = NetworkServer::find()
            .select_only()
            .column(NetworkServerColumn::GatewayDiscoveryInterval)
            .distinct()
            .filter(NetworkServerColumn::GatewayDiscoveryEnabled.eq(true))
            .filter(NetworkServerColumn::GatewayDiscoveryInterval.gt(0))
            .into_tuple::<i32>()
            .all(db)
            .await?;
        if intervals.is_empty() {
            return Ok(None);
        }

        // one cutoff per configured cadence
        let due = intervals.into_iter().fold(Condition::any(), |due, interval| {
            due.add(
                Condition::all()
                    .add(NetworkServerColumn::GatewayDiscoveryInterval.eq(interval))
                    .add(
                        Condition::any()
                            .add(GatewayColumn::LastPingSentAt.is_null())
                            .add(GatewayColumn::LastPingSentAt.lte(ping_cutoff(interval, now))),
                    ),
            )
        });

        let candidates = Gateway::find()
            .find_also_related(NetworkServer)
            .filter(GatewayColumn::Ping.eq(true))
            .filter(NetworkServerColumn::GatewayDiscoveryEnabled.eq(true))
            .filter(due)
            .order_by_with_nulls(GatewayColumn::LastPingSentAt, Order::Asc, NullOrdering::First)
            .limit(PING_CANDIDATES)
            .all(db)
            .await?;

        for (gw, ns) in candidates {
            let Some(ns) = ns else { continue };
            // re-read under lock, another replica may have pinged it meanwhile
            let locked = Gateway::find_by_id(gw.mac.clone())
                .filter(match gw.last_ping_sent_at {
                    Some(t) => Condition::all().add(GatewayColumn::LastPingSentAt.eq(t)),
                    None => Condition::all().add(GatewayColumn::LastPingSentAt.is_null()),
                })
                .lock_with_behavior(LockType::Update, LockBehavior::SkipLocked)
                .one(db)
                .await?;
            if let Some(gw) = locked {
                return Ok(Some((gw, ns)));
            }
        }
        Ok(None)
    }

    pub async fn set_last_ping<C>(
        gateway: GatewayModel,
        ping_id: i32,
        sent_at: DateTime<Utc>,
        db: &C,
    ) -> StorageResult<GatewayModel>
    where
        C: ConnectionTrait,
    {
        let mut am: GatewayActiveModel = gateway.into();
        am.last_ping_id = Set(Some(ping_id));
        am.last_ping_sent_at = Set(Some(sent_at));
        am.updated_at = Set(sent_at);
        Ok(am.update(db).await?)
    }
}

/// Latest last-ping time that makes a gateway due again. `interval` is the
/// number of pings per day.
fn ping_cutoff(interval: i32, now: DateTime<Utc>) -> DateTime<Utc> {
    now - Duration::hours(24) / interval.max(1)
}

/// Repository for discovery pings and their receptions
pub struct GatewayPingRepository;

impl GatewayPingRepository {
    pub async fn create<C>(ping: GatewayPingActiveModel, db: &C) -> StorageResult<GatewayPingModel>
    where
        C: ConnectionTrait,
    {
        Ok(ping.insert(db).await?)
    }

    pub async fn find_by_id<C>(id: i32, db: &C) -> StorageResult<Option<GatewayPingModel>>
    where
        C: ConnectionTrait,
    {
        Ok(GatewayPing::find_by_id(id).one(db).await?)
    }

    pub async fn create_rx<C>(
        rx: GatewayPingRxActiveModel,
        db: &C,
    ) -> StorageResult<GatewayPingRxModel>
    where
        C: ConnectionTrait,
    {
        Ok(rx.insert(db).await?)
    }

    pub async fn find_rx_for_ping<C>(ping_id: i32, db: &C) -> StorageResult<Vec<GatewayPingRxModel>>
    where
        C: ConnectionTrait,
    {
        Ok(GatewayPingRx::find()
            .filter(GatewayPingRxColumn::PingId.eq(ping_id))
            .order_by_asc(GatewayPingRxColumn::Id)
            .all(db)
            .await?)
    }
}
