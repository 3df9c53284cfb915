// Service exports
pub mod cache;
pub mod caches;
pub mod invalidation;
pub mod postgres;
pub mod repository;

pub use cache::{CacheError, CacheKey, CacheStore, LocalCacheStore, TieredCacheStore};
pub use caches::{DriverStatsCache, HubCache, RouteCache};
pub use invalidation::{
    CacheInvalidationListener, Eviction, InvalidationChannel, InvalidationEvent, RedisInvalidationChannel,
};
pub use postgres::PostgresStore;
pub use repository::{DriverStatsSource, HubRepository, NearbyQuery, RouteRepository};
