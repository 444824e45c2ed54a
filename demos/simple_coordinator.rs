//! Simple coordinator example
//!
//! Run with: cargo run --example simple_coordinator [redis]
//!
//! Without arguments everything runs against the in-memory store. Pass
//! `redis` to use `HICCUP_REGISTRY_REDIS_URL` (default
//! `redis://localhost:6379/1`) instead.
//!
//! This example demonstrates:
//! - Registering media services with a heartbeat
//! - Least-loaded, tag-filtered discovery
//! - Sticky room allocation per channel
//! - Cached permission lookups with invalidation
//! - Nonce replay protection

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use hiccup_coord::permission::{MemoryPermissionSource, PermissionGroup, PrincipalRecord};
use hiccup_coord::{Coordinator, CoordinatorConfig, MemoryStore, NetworkAddress, ServiceInfo};

fn media_service(ip: &str, load_factor: f64, tags: &[&str]) -> Result<ServiceInfo, Box<dyn std::error::Error>> {
    let address = NetworkAddress::new(ip.parse()?, 7443);
    Ok(ServiceInfo::new("unset", address, load_factor).with_tags(tags.iter().copied()))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("hiccup_coord=debug".parse()?),
        )
        .init();

    let use_redis = std::env::args().nth(1).as_deref() == Some("redis");

    let source = Arc::new(MemoryPermissionSource::new());
    source
        .upsert(
            1,
            PrincipalRecord {
                direct: vec!["chat:write".into()],
                groups: vec![PermissionGroup::new("members", ["chat:read", "voice:join"])],
            },
        )
        .await;

    let config = CoordinatorConfig::from_env()?;
    let coordinator = if use_redis {
        Coordinator::connect(config, source.clone()).await?
    } else {
        let store = Arc::new(MemoryStore::new());
        let _purge = store.spawn_purge_task(Duration::from_secs(30))?;
        Coordinator::with_store(config, store, source.clone())?
    };

    // Services
    coordinator
        .register("media", "relay-eu-1", media_service("10.0.0.11", 0.6, &["eu"])?)
        .await?;
    coordinator
        .register("media", "relay-eu-2", media_service("10.0.0.12", 0.2, &["eu"])?)
        .await?;
    coordinator
        .register("media", "relay-gpu", media_service("10.0.0.13", 0.0, &["eu", "gpu"])?)
        .await?;

    let mut heartbeat = media_service("10.0.0.14", 0.4, &[])?;
    heartbeat.id = "relay-any".into();
    coordinator
        .spawn_heartbeat("media", heartbeat, Duration::from_secs(20))
        .await?;

    for service in coordinator.registry().list("media").await? {
        println!(
            "registered {:<12} load={:.2} tags={:?}",
            service.id, service.load_factor, service.tags
        );
    }

    // Rooms
    let eu: BTreeSet<String> = ["eu".to_string()].into_iter().collect();
    for _ in 0..2 {
        match coordinator.allocate(42, Some(&eu)).await? {
            Some(room) => println!(
                "channel 42 -> {} ({}:{})",
                room.id,
                room.address.connection_host(),
                room.address.port
            ),
            None => println!("channel 42 -> no capacity"),
        }
    }
    println!("deallocated: {}", coordinator.deallocate(42).await?);

    // Permissions
    println!("permissions of 1: {:?}", coordinator.get_permissions(1).await?);
    println!(
        "1 may join voice: {}",
        coordinator.has_permissions(1, ["voice:join"]).await?
    );

    source
        .upsert(
            1,
            PrincipalRecord {
                direct: vec!["chat:read".into()],
                groups: vec![],
            },
        )
        .await;
    coordinator.invalidate_permissions(1).await?;
    println!("permissions of 1 after change: {:?}", coordinator.get_permissions(1).await?);

    // Nonces
    println!("nonce first use: {}", coordinator.consume_nonce("req-8f2a").await?);
    println!("nonce replay: {}", coordinator.consume_nonce("req-8f2a").await?);

    println!("{:#?}", coordinator.stats());

    coordinator.shutdown().await;
    Ok(())
}
