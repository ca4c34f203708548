//! Map source-to-sink flows: incremental updates, deletions, projections.

#[cfg(test)]
mod tests {
    use crate::support::{eventually, init_tracing};
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;
    use sync_replication::{
        IntSchema, MapSinkOptions, MapSourceOptions, StringSchema, SyncClient, WireValue,
    };
    use sync_transport::MemoryTransport;

    #[tokio::test]
    async fn test_set_reaches_live_sink() {
        init_tracing();
        let bus = Arc::new(MemoryTransport::new());
        let client = SyncClient::new(bus.clone());

        let mut sink = client.map_sink("plc.io", MapSinkOptions::default());
        tokio::time::sleep(Duration::from_millis(10)).await;

        let mut source = client
            .map_source("plc.io", MapSourceOptions::default())
            .expect("source");
        source.set("motor.rpm", 1450i64);
        source.set("motor.name", "M1");

        let s = &sink;
        eventually(
            || s.get("motor.rpm") == Some(WireValue::Int(1450)) && s.contains_key("motor.name"),
            "entries on sink",
        )
        .await;
        assert!(sink.valid());

        source.dispose();
        sink.dispose();
    }

    #[tokio::test]
    async fn test_deletion_propagates() {
        init_tracing();
        let bus = Arc::new(MemoryTransport::new());
        let client = SyncClient::new(bus.clone());

        let mut sink = client.map_sink("plc.io", MapSinkOptions::default());
        tokio::time::sleep(Duration::from_millis(10)).await;

        let mut source = client
            .map_source("plc.io", MapSourceOptions::default())
            .expect("source");
        source.set("gone", 1i64);
        let s = &sink;
        eventually(|| s.contains_key("gone"), "entry arrives").await;

        source.set("gone", WireValue::Null);
        eventually(|| !s.contains_key("gone"), "entry removed").await;

        source.dispose();
        sink.dispose();
    }

    #[tokio::test]
    async fn test_batched_update_deletes_absent_keys() {
        init_tracing();
        let bus = Arc::new(MemoryTransport::new());
        let client = SyncClient::new(bus.clone());

        let mut sink = client.map_sink("plc.io", MapSinkOptions::default());
        tokio::time::sleep(Duration::from_millis(10)).await;

        let mut source = client
            .map_source("plc.io", MapSourceOptions::default())
            .expect("source");
        source.set("old", 1i64);
        source.set("keep", 2i64);
        let s = &sink;
        eventually(|| s.len() == 2, "both entries arrive").await;

        let mut next = HashMap::new();
        next.insert("keep".to_string(), WireValue::Int(2));
        next.insert("new".to_string(), WireValue::Int(3));
        source.update(next).await;

        eventually(
            || !s.contains_key("old") && s.contains_key("new") && s.contains_key("keep"),
            "diff applied",
        )
        .await;

        source.dispose();
        sink.dispose();
    }

    #[tokio::test]
    async fn test_replace_resets_sink_state() {
        init_tracing();
        let bus = Arc::new(MemoryTransport::new());
        let client = SyncClient::new(bus.clone());

        let mut sink = client.map_sink("plc.io", MapSinkOptions::default());
        tokio::time::sleep(Duration::from_millis(10)).await;

        let mut source = client
            .map_source("plc.io", MapSourceOptions::default())
            .expect("source");
        source.set("stale", 1i64);
        let s = &sink;
        eventually(|| s.contains_key("stale"), "entry arrives").await;

        let mut fresh = HashMap::new();
        fresh.insert("fresh".to_string(), WireValue::from("x"));
        source.replace(fresh).await;

        eventually(
            || !s.contains_key("stale") && s.contains_key("fresh") && s.len() == 1,
            "full update replaces state",
        )
        .await;

        source.dispose();
        sink.dispose();
    }

    #[tokio::test]
    async fn test_late_joiner_converges_via_fetch() {
        init_tracing();
        let bus = Arc::new(MemoryTransport::new());
        let client = SyncClient::new(bus.clone());

        // Source publishes before anyone subscribes; those broadcasts are
        // lost on the at-most-once bus.
        let mut source = client
            .map_source("plc.io", MapSourceOptions::default())
            .expect("source");
        source.set("foo", 5i64);
        source.set("bar", 8i64);
        tokio::time::sleep(Duration::from_millis(10)).await;

        let mut sink = client.map_sink(
            "plc.io",
            MapSinkOptions {
                enable_fetching: true,
                ..MapSinkOptions::default()
            },
        );

        let s = &sink;
        eventually(
            || {
                s.valid()
                    && s.get("foo") == Some(WireValue::Int(5))
                    && s.get("bar") == Some(WireValue::Int(8))
            },
            "fetch convergence",
        )
        .await;

        source.dispose();
        sink.dispose();
    }

    #[tokio::test]
    async fn test_projections_validate_per_schema() {
        init_tracing();
        let bus = Arc::new(MemoryTransport::new());
        let client = SyncClient::new(bus.clone());

        let mut sink = client.map_sink("plc.io", MapSinkOptions::default());
        tokio::time::sleep(Duration::from_millis(10)).await;

        let mut source = client
            .map_source("plc.io", MapSourceOptions::default())
            .expect("source");
        source.set("rpm", 1450i64);
        source.set("name", "M1");

        let mut ints = sink.attach(IntSchema);
        let mut strings = sink.attach(StringSchema);

        let (i, s) = (&ints, &strings);
        eventually(
            || i.get("rpm") == Some(Some(1450)) && s.get("name") == Some(Some("M1".to_string())),
            "validated entries",
        )
        .await;
        // Cross-schema entries are present but failed validation.
        assert_eq!(ints.get("name"), Some(None));
        assert_eq!(strings.get("rpm"), Some(None));

        ints.detach();
        strings.detach();
        source.dispose();
        sink.dispose();
    }

    #[tokio::test]
    async fn test_identical_schemas_share_projection_across_handles() {
        init_tracing();
        let bus = Arc::new(MemoryTransport::new());
        let client = SyncClient::new(bus.clone());

        // Two independent handles for the same subject: one shared replica,
        // and structurally equal schemas share one validated map.
        let mut a = client.map_sink("plc.io", MapSinkOptions::default());
        let mut b = client.map_sink("plc.io", MapSinkOptions::default());

        let mut pa = a.attach(StringSchema);
        let mut pb = b.attach(StringSchema);
        assert!(pa.shares_storage_with(&pb));

        let mut pc = a.attach(IntSchema);
        tokio::time::sleep(Duration::from_millis(10)).await;

        let mut source = client
            .map_source("plc.io", MapSourceOptions::default())
            .expect("source");
        source.set("k", "v");

        let (ra, rb) = (&pa, &pb);
        eventually(
            || {
                ra.get("k") == Some(Some("v".to_string()))
                    && rb.get("k") == Some(Some("v".to_string()))
            },
            "shared projection sees update",
        )
        .await;
        assert_eq!(pc.get("k"), Some(None));

        pa.detach();
        pb.detach();
        pc.detach();
        source.dispose();
        a.dispose();
        b.dispose();
    }
}
