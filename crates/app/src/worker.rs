//! Runs `play` lookups and downloads off the scheduler task. Requests are
//! handled one at a time, in arrival order.

use jukebox_core::{ChannelRef, NotifyTarget, Requester, Track};
use jukebox_providers::{AssetResolver, ResolutionError};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct ResolveRequest {
    pub query: String,
    pub requester: Requester,
    pub channel: ChannelRef,
    pub target: NotifyTarget,
    /// `Session::stop_count` when the request was issued.
    pub stop_count: u64,
}

#[derive(Debug)]
pub struct Resolved {
    pub request: ResolveRequest,
    pub result: Result<Track, ResolutionError>,
}

pub fn spawn_resolution_worker(
    resolver: Arc<dyn AssetResolver>,
) -> (
    mpsc::UnboundedSender<ResolveRequest>,
    mpsc::UnboundedReceiver<Resolved>,
) {
    let (request_tx, mut request_rx) = mpsc::unbounded_channel::<ResolveRequest>();
    let (resolved_tx, resolved_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Some(request) = request_rx.recv().await {
            info!(query = %request.query, resolver = resolver.name(), "resolving");
            let result = resolver.resolve(&request.query, &request.requester).await;
            if resolved_tx.send(Resolved { request, result }).is_err() {
                break;
            }
        }
        debug!("resolution worker stopped");
    });

    (request_tx, resolved_rx)
}

#[cfg(test)]
mod tests {
    use super::{spawn_resolution_worker, ResolveRequest};
    use async_trait::async_trait;
    use jukebox_core::{ChannelRef, NotifyTarget, Requester, Track};
    use jukebox_providers::{AssetResolver, ResolutionError};
    use std::sync::Arc;
    use std::time::Duration;

    struct SlowFirst;

    #[async_trait]
    impl AssetResolver for SlowFirst {
        fn name(&self) -> &'static str {
            "slow-first"
        }

        async fn resolve(
            &self,
            query: &str,
            requester: &Requester,
        ) -> Result<Track, ResolutionError> {
            if query == "missing" {
                return Err(ResolutionError::NotFound(query.to_string()));
            }
            if query == "slow" {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            Ok(Track::new(
                query,
                query,
                60,
                format!("https://example.com/{query}"),
                format!("/cache/{query}.mp3"),
                requester.clone(),
            )?)
        }
    }

    fn request(query: &str) -> ResolveRequest {
        ResolveRequest {
            query: query.to_string(),
            requester: Requester("dave".to_string()),
            channel: ChannelRef("general".to_string()),
            target: NotifyTarget("console".to_string()),
            stop_count: 0,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn results_come_back_in_request_order() {
        let (tx, mut rx) = spawn_resolution_worker(Arc::new(SlowFirst));
        tx.send(request("slow")).unwrap();
        tx.send(request("missing")).unwrap();
        tx.send(request("fast")).unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.result.unwrap().id(), "slow");

        let second = rx.recv().await.unwrap();
        assert!(matches!(second.result, Err(ResolutionError::NotFound(_))));
        assert_eq!(second.request.query, "missing");

        let third = rx.recv().await.unwrap();
        assert_eq!(third.result.unwrap().requester().0, "dave");
    }
}
