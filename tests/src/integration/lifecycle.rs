//! Handle lifecycle: shared subscriptions, grace-window teardown, dispose
//! semantics.

#[cfg(test)]
mod tests {
    use crate::support::{eventually, init_tracing};
    use std::sync::Arc;
    use std::time::Duration;
    use sync_replication::{
        BlobSinkOptions, BlobSourceOptions, MapSinkOptions, SyncClient, DEFAULT_TEARDOWN_GRACE,
    };
    use sync_transport::{MemoryTransport, Transport, TransportError};

    const GRACE: Duration = Duration::from_millis(30);

    fn update_subject(subject: &str) -> String {
        format!("blob.sink.v1.{subject}")
    }

    #[tokio::test]
    async fn test_handles_share_one_transport_subscription() {
        init_tracing();
        let bus = Arc::new(MemoryTransport::new());
        let client = SyncClient::new(bus.clone());

        let mut a = client.blob_sink("cfg", BlobSinkOptions::default());
        let mut b = client.blob_sink("cfg", BlobSinkOptions::default());
        let mut c = client.blob_sink("cfg", BlobSinkOptions::default());
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(bus.subscriber_count(&update_subject("cfg")), 1);

        a.dispose();
        b.dispose();
        c.dispose();
    }

    #[tokio::test]
    async fn test_teardown_waits_for_last_handle_and_grace() {
        init_tracing();
        let bus = Arc::new(MemoryTransport::new());
        let client = SyncClient::new(bus.clone()).with_teardown_grace(GRACE);

        let mut a = client.blob_sink("cfg", BlobSinkOptions::default());
        let mut b = client.blob_sink("cfg", BlobSinkOptions::default());
        tokio::time::sleep(Duration::from_millis(10)).await;

        a.dispose();
        // One handle left: the subscription must survive well past the
        // grace window.
        tokio::time::sleep(GRACE * 3).await;
        assert_eq!(bus.subscriber_count(&update_subject("cfg")), 1);

        b.dispose();
        eventually(
            || bus.subscriber_count(&update_subject("cfg")) == 0,
            "teardown after last release",
        )
        .await;
    }

    #[tokio::test]
    async fn test_recreate_within_grace_keeps_subscription_alive() {
        init_tracing();
        let bus = Arc::new(MemoryTransport::new());
        let client = SyncClient::new(bus.clone()).with_teardown_grace(GRACE);

        let mut first = client.blob_sink("cfg", BlobSinkOptions::default());
        tokio::time::sleep(Duration::from_millis(10)).await;
        first.dispose();

        // Dispose-then-recreate, the shape of a UI re-render.
        let mut second = client.blob_sink("cfg", BlobSinkOptions::default());
        tokio::time::sleep(GRACE * 3).await;
        assert_eq!(bus.subscriber_count(&update_subject("cfg")), 1);

        second.dispose();
    }

    #[tokio::test]
    async fn test_dispose_is_idempotent_on_every_handle() {
        init_tracing();
        let bus = Arc::new(MemoryTransport::new());
        let client = SyncClient::new(bus.clone()).with_teardown_grace(GRACE);

        let mut sink = client.map_sink("plc.io", MapSinkOptions::default());
        sink.dispose();
        sink.dispose();
        sink.dispose();

        let mut again = client.map_sink("plc.io", MapSinkOptions::default());
        tokio::time::sleep(GRACE * 3).await;
        // The repeated disposes above must not have eaten this handle's
        // reference.
        assert_eq!(bus.subscriber_count("map.sink.v2.plc.io"), 1);
        again.dispose();
    }

    #[tokio::test]
    async fn test_source_dispose_stops_fetch_responder() {
        init_tracing();
        let bus = Arc::new(MemoryTransport::new());
        let client = SyncClient::new(bus.clone());

        let mut source = client
            .blob_source(
                "cfg",
                b"v1",
                BlobSourceOptions {
                    enable_fetching: true,
                    ..BlobSourceOptions::default()
                },
            )
            .expect("source");
        tokio::time::sleep(Duration::from_millis(10)).await;

        let reply = bus
            .request("blob.source.v1.cfg", Vec::new(), Duration::from_millis(500))
            .await
            .expect("responder alive");
        assert_eq!(&reply[..], b"v1");

        source.dispose();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let err = bus
            .request("blob.source.v1.cfg", Vec::new(), Duration::from_millis(100))
            .await
            .expect_err("responder gone");
        assert!(matches!(
            err,
            TransportError::NoResponders(_) | TransportError::Timeout(_)
        ));
    }

    #[test]
    fn test_default_grace_is_short() {
        // Teardown deferral should be imperceptible next to human-scale UI
        // interaction.
        assert!(DEFAULT_TEARDOWN_GRACE <= Duration::from_millis(500));
    }
}
