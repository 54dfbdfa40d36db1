use crate::reconciler::SessionEvent;
use crate::services::AnalysisService;
use chainwatch_core::{CharacterId, EnrichmentRequest};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Runs analyses off the session task and posts each result back into the
/// session's inbound queue. Never touches session state itself.
#[derive(Clone)]
pub struct EnrichmentDispatcher {
    analysis: Arc<dyn AnalysisService>,
    inbound: mpsc::Sender<SessionEvent>,
}

impl EnrichmentDispatcher {
    pub fn new(analysis: Arc<dyn AnalysisService>, inbound: mpsc::Sender<SessionEvent>) -> Self {
        Self { analysis, inbound }
    }

    pub fn request_enrichment(&self, character_id: CharacterId) -> EnrichmentRequest {
        let request = EnrichmentRequest::new(character_id);
        let analysis = self.analysis.clone();
        let inbound = self.inbound.clone();
        let dispatched = request.clone();

        tokio::spawn(async move {
            let result = analysis.analyze(dispatched.character_id).await;
            let request_id = dispatched.request_id.clone();
            let completed = SessionEvent::EnrichmentCompleted {
                request: dispatched,
                result,
            };
            if inbound.send(completed).await.is_err() {
                debug!(
                    event = "enrichment_dropped",
                    request_id = %request_id,
                    reason = "session_closed"
                );
            }
        });

        info!(
            event = "enrichment_dispatched",
            request_id = %request.request_id,
            character_id
        );
        request
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::StaticAnalysisService;
    use chainwatch_core::{AnalysisResult, ThreatLevel};
    use std::time::Duration;

    #[tokio::test]
    async fn completion_arrives_on_inbound_queue() {
        let analysis = Arc::new(StaticAnalysisService::new());
        analysis.set_result(AnalysisResult::assessed(11, ThreatLevel::High, 7_500));
        let (tx, mut rx) = mpsc::channel(8);
        let dispatcher = EnrichmentDispatcher::new(analysis, tx);

        let request = dispatcher.request_enrichment(11);
        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("completion in time")
            .expect("completion");

        let SessionEvent::EnrichmentCompleted {
            request: completed,
            result,
        } = event
        else {
            panic!("expected enrichment completion")
        };
        assert_eq!(completed, request);
        assert_eq!(result.threat(), Some(ThreatLevel::High));
    }

    #[tokio::test]
    async fn dispatch_does_not_wait_for_slow_analysis() {
        let analysis =
            Arc::new(StaticAnalysisService::new().with_delay(Duration::from_millis(200)));
        let (tx, mut rx) = mpsc::channel(8);
        let dispatcher = EnrichmentDispatcher::new(analysis, tx);

        let started = std::time::Instant::now();
        dispatcher.request_enrichment(1);
        dispatcher.request_enrichment(2);
        assert!(started.elapsed() < Duration::from_millis(100));

        let mut seen = Vec::new();
        for _ in 0..2 {
            let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .expect("completion in time")
                .expect("completion");
            if let SessionEvent::EnrichmentCompleted { request, .. } = event {
                seen.push(request.character_id);
            }
        }
        seen.sort();
        assert_eq!(seen, vec![1, 2]);
    }

    #[tokio::test]
    async fn closed_session_queue_is_tolerated() {
        let analysis = Arc::new(StaticAnalysisService::new());
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let dispatcher = EnrichmentDispatcher::new(analysis, tx);
        let request = dispatcher.request_enrichment(5);
        assert_eq!(request.character_id, 5);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
