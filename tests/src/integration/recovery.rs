//! Loss and staleness recovery: advertisements flag a missed update, the
//! fetch loop repairs it.

#[cfg(test)]
mod tests {
    use crate::support::{eventually, init_tracing};
    use std::sync::Arc;
    use std::time::Duration;
    use sync_replication::{
        BlobSinkOptions, BlobSourceOptions, MapSinkOptions, MapSourceOptions, RetryPolicy,
        SyncClient, WireValue,
    };
    use sync_transport::{FaultInjector, MemoryTransport};

    const ADVERTISE_INTERVAL: Duration = Duration::from_millis(25);

    /// Source publishes through a lossy wrapper; sinks subscribe on the
    /// underlying bus directly, so only source-side publishes can be lost.
    fn lossy_pair(bus: &Arc<MemoryTransport>) -> (Arc<FaultInjector>, SyncClient, SyncClient) {
        let lossy = Arc::new(FaultInjector::new(bus.clone()));
        let source_client =
            SyncClient::with_retry_policy(lossy.clone(), RetryPolicy::for_testing())
                .expect("policy");
        let sink_client = SyncClient::with_retry_policy(bus.clone(), RetryPolicy::for_testing())
            .expect("policy");
        (lossy, source_client, sink_client)
    }

    #[tokio::test]
    async fn test_blob_sink_recovers_dropped_update() {
        init_tracing();
        let bus = Arc::new(MemoryTransport::new());
        let (lossy, source_client, sink_client) = lossy_pair(&bus);

        let mut sink = sink_client.blob_sink(
            "cfg",
            BlobSinkOptions {
                enable_fetching: true,
                ..BlobSinkOptions::default()
            },
        );
        tokio::time::sleep(Duration::from_millis(10)).await;

        let mut source = source_client
            .blob_source(
                "cfg",
                b"v1",
                BlobSourceOptions {
                    periodic_advertise: Some(ADVERTISE_INTERVAL),
                    enable_fetching: true,
                    ..BlobSourceOptions::default()
                },
            )
            .expect("source");

        let s = &sink;
        eventually(|| s.valid() && &s.value()[..] == b"v1", "initial convergence").await;

        // The next publish is lost in transit; the sink still believes v1.
        lossy.drop_next(1);
        source.update(b"v2");
        assert_eq!(lossy.dropped(), 1);
        assert_eq!(&sink.value()[..], b"v1");

        // The advertisement carries the new content hash, flagging the
        // replica stale; the fetch loop then repairs it.
        eventually(|| &s.value()[..] == b"v2" && s.valid(), "recovery via fetch").await;

        source.dispose();
        sink.dispose();
    }

    #[tokio::test]
    async fn test_map_sink_recovers_dropped_partial_update() {
        init_tracing();
        let bus = Arc::new(MemoryTransport::new());
        let (lossy, source_client, sink_client) = lossy_pair(&bus);

        let mut sink = sink_client.map_sink(
            "plc.io",
            MapSinkOptions {
                enable_fetching: true,
                ..MapSinkOptions::default()
            },
        );
        tokio::time::sleep(Duration::from_millis(10)).await;

        let mut source = source_client
            .map_source(
                "plc.io",
                MapSourceOptions {
                    periodic_advertise: Some(ADVERTISE_INTERVAL),
                    ..MapSourceOptions::default()
                },
            )
            .expect("source");
        source.set("a", 1i64);

        let s = &sink;
        eventually(|| s.get("a") == Some(WireValue::Int(1)), "initial convergence").await;

        lossy.drop_next(1);
        source.set("b", 2i64);
        assert_eq!(lossy.dropped(), 1);
        assert!(!sink.contains_key("b"));

        // Advertised change id differs from the last applied one; the sink
        // invalidates and fetches the full state, including the missed key.
        eventually(
            || s.get("b") == Some(WireValue::Int(2)) && s.valid(),
            "recovery via fetch",
        )
        .await;
        assert_eq!(sink.get("a"), Some(WireValue::Int(1)));

        source.dispose();
        sink.dispose();
    }

    #[tokio::test]
    async fn test_matching_advertisement_does_not_trigger_fetch() {
        init_tracing();
        let bus = Arc::new(MemoryTransport::new());
        let client = SyncClient::new(bus.clone());

        let mut sink = client.map_sink("plc.io", MapSinkOptions::default());
        tokio::time::sleep(Duration::from_millis(10)).await;

        let mut source = client
            .map_source(
                "plc.io",
                MapSourceOptions {
                    periodic_advertise: Some(ADVERTISE_INTERVAL),
                    ..MapSourceOptions::default()
                },
            )
            .expect("source");
        source.set("a", 1i64);

        let s = &sink;
        eventually(|| s.valid(), "initial convergence").await;

        // Several advertisement intervals pass without changes; a current
        // replica must stay valid throughout.
        tokio::time::sleep(ADVERTISE_INTERVAL * 4).await;
        assert!(sink.valid());
        assert_eq!(sink.get("a"), Some(WireValue::Int(1)));

        source.dispose();
        sink.dispose();
    }

    #[tokio::test]
    async fn test_source_timeout_recovers_when_traffic_resumes() {
        init_tracing();
        let bus = Arc::new(MemoryTransport::new());
        let client = SyncClient::new(bus.clone());

        let mut sink = client.blob_sink(
            "cfg",
            BlobSinkOptions {
                source_timeout: Some(Duration::from_millis(40)),
                ..BlobSinkOptions::default()
            },
        );
        tokio::time::sleep(Duration::from_millis(10)).await;

        let mut source = client
            .blob_source("cfg", b"v1", BlobSourceOptions::default())
            .expect("source");

        let s = &sink;
        eventually(|| s.valid(), "initial convergence").await;

        // Silence past the watchdog window flags the replica invalid.
        eventually(|| !s.valid(), "watchdog invalidation").await;

        // Any fresh transmission restores validity.
        source.update(b"v2");
        eventually(|| s.valid() && &s.value()[..] == b"v2", "traffic resumes").await;

        source.dispose();
        sink.dispose();
    }
}
