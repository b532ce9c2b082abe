//! End-to-end scenarios over the public API

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use stratacache::prelude::*;
use tempfile::TempDir;

fn builder(dir: &TempDir, id: &str) -> StrataCacheBuilder<Vec<u8>> {
    StrataCache::builder()
        .cache_id(id)
        .disk_base_dir(dir.path().to_string_lossy())
        .sweep_interval_ms(60_000)
}

#[test]
fn memory_budget_is_hard_and_disk_keeps_everything() {
    let dir = TempDir::new().expect("tempdir");
    let cache = builder(&dir, "budget")
        .memory_max_bytes(500 * 1024)
        // Keep 1 KiB payloads incompressible so they cost real bytes
        .compression_threshold(1 << 20)
        .build()
        .expect("build");

    for i in 0..1000 {
        cache
            .put(&format!("k{}", i), &vec![i as u8; 1024])
            .expect("put");
    }

    let stats = cache.statistics();
    assert!(stats.memory_tier.bytes_stored <= 500 * 1024);
    assert!(stats.memory_tier.entry_count < 1000);
    assert_eq!(stats.disk_tier.entry_count, 1000);

    // Eviction keeps the most recent writes resident
    assert_eq!(cache.get("k999").expect("get"), Some(vec![231u8; 1024]));
    assert!(cache.statistics().memory_tier.hits >= 1);

    // Everything else still answers from disk
    assert_eq!(cache.get("k0").expect("get"), Some(vec![0u8; 1024]));
}

#[test]
fn values_survive_reopen_and_removals_stay_removed() {
    let dir = TempDir::new().expect("tempdir");
    {
        let cache = builder(&dir, "durable").build().expect("build");
        cache.put("kept", &b"payload".to_vec()).expect("put");
        cache.put("gone", &b"doomed".to_vec()).expect("put");
        assert!(cache.remove("gone").expect("remove"));
        cache.shutdown_gracefully();
    }

    let cache = builder(&dir, "durable").build().expect("build");
    assert_eq!(cache.get("kept").expect("get"), Some(b"payload".to_vec()));
    assert_eq!(cache.get("gone").expect("get"), None);
}

#[test]
fn oversized_values_never_ship_to_cloud() {
    let dir = TempDir::new().expect("tempdir");
    let remote = Arc::new(InMemoryRemoteStore::new());
    let cache = builder(&dir, "cloudy")
        .compression_threshold(1 << 20)
        .remote_store(remote.clone())
        .build()
        .expect("build");

    let policy = CachePolicy {
        distribute_to_cloud: true,
        cloud_size_threshold: 4096,
        compression_enabled: false,
        ..CachePolicy::default()
    };

    cache
        .put_with_policy("big", &vec![1u8; 8192], &policy)
        .expect("put");
    assert_eq!(remote.object_count(), 0);
    // The local tiers still accepted the oversized value
    assert_eq!(cache.get("big").expect("get"), Some(vec![1u8; 8192]));

    cache
        .put_with_policy("small", &vec![2u8; 1024], &policy)
        .expect("put");
    assert_eq!(remote.object_count(), 1);
}

#[test]
fn ttl_expires_through_the_facade() {
    let dir = TempDir::new().expect("tempdir");
    let cache = builder(&dir, "ttl").build().expect("build");

    let policy = CachePolicy::default().with_ttl(Duration::from_millis(50));
    cache
        .put_with_policy("ephemeral", &b"soon".to_vec(), &policy)
        .expect("put");
    assert!(cache.get("ephemeral").expect("get").is_some());

    thread::sleep(Duration::from_millis(80));
    assert_eq!(cache.get("ephemeral").expect("get"), None);
}

#[test]
fn encrypted_values_round_trip() {
    let dir = TempDir::new().expect("tempdir");
    let cipher = KeystreamEncryptor::new(b"an-example-very-secret-key".to_vec()).expect("key");
    let cache = builder(&dir, "sealed")
        .encryptor(Arc::new(cipher))
        .build()
        .expect("build");

    let policy = CachePolicy {
        encryption_required: true,
        ..CachePolicy::default()
    };
    cache
        .put_with_policy("secret", &b"cleartext".to_vec(), &policy)
        .expect("put");
    assert_eq!(
        cache.get("secret").expect("get"),
        Some(b"cleartext".to_vec())
    );
}

#[test]
fn encryption_without_a_cipher_is_rejected_before_any_write() {
    let dir = TempDir::new().expect("tempdir");
    let cache = builder(&dir, "unsealed").build().expect("build");

    let policy = CachePolicy {
        encryption_required: true,
        ..CachePolicy::default()
    };
    let err = cache
        .put_with_policy("secret", &b"cleartext".to_vec(), &policy)
        .unwrap_err();
    assert!(matches!(err, CacheOperationError::InvalidConfiguration(_)));
    assert!(!cache.contains_key("secret"));
}

#[test]
fn concurrent_stores_and_clear_leave_a_consistent_cache() {
    let dir = TempDir::new().expect("tempdir");
    let cache = builder(&dir, "racy").build().expect("build");

    let writers: Vec<_> = (0..4)
        .map(|t| {
            let cache = cache.clone();
            thread::spawn(move || {
                for i in 0..50 {
                    let _ = cache.put(&format!("t{}:{}", t, i), &vec![0u8; 128]);
                }
            })
        })
        .collect();

    for _ in 0..5 {
        cache.clear().expect("clear");
        thread::sleep(Duration::from_millis(1));
    }
    for writer in writers {
        writer.join().expect("writer");
    }

    // The cache still serves and one final clear fully drains it
    cache.put("after", &b"ok".to_vec()).expect("put");
    assert_eq!(cache.get("after").expect("get"), Some(b"ok".to_vec()));
    cache.clear().expect("clear");
    let stats = cache.statistics();
    assert_eq!(stats.memory_tier.entry_count, 0);
    assert_eq!(stats.disk_tier.entry_count, 0);
    assert_eq!(stats.total_operations, 0);
}

#[test]
fn tagged_entries_invalidate_in_bulk() {
    let dir = TempDir::new().expect("tempdir");
    let cache = builder(&dir, "tagged").build().expect("build");

    let tagged = CachePolicy::default().with_tag("tenant:7");
    cache
        .put_with_policy("u:1", &b"a".to_vec(), &tagged)
        .expect("put");
    cache
        .put_with_policy("u:2", &b"b".to_vec(), &tagged)
        .expect("put");
    cache.put("u:3", &b"c".to_vec()).expect("put");

    assert_eq!(cache.remove_by_tag("tenant:7").expect("remove"), 2);
    assert_eq!(cache.get("u:1").expect("get"), None);
    assert_eq!(cache.get("u:3").expect("get"), Some(b"c".to_vec()));
}

#[test]
fn health_and_statistics_reflect_traffic() {
    let dir = TempDir::new().expect("tempdir");
    let cache = builder(&dir, "observed").build().expect("build");

    for i in 0..40 {
        let key = format!("k{}", i);
        cache.put(&key, &vec![0u8; 64]).expect("put");
        assert!(cache.get(&key).expect("get").is_some());
    }

    let stats = cache.statistics();
    assert_eq!(stats.total_operations, 40);
    assert_eq!(stats.total_misses, 0);
    assert!(stats.overall_hit_rate > 0.99);
    assert_eq!(cache.health_status(), HealthStatus::Healthy);
}
