//! Delivery worker: drains the outbox channel into an [`IndexSink`] and
//! reports every outcome on the ack channel.

use super::models::{IndexMessage, ProduceAck};
use super::sink::IndexSink;
use crate::server::metrics;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct IndexDeliveryWorker {
    sink: Arc<dyn IndexSink>,
    messages: mpsc::Receiver<IndexMessage>,
    acks: mpsc::Sender<ProduceAck>,
}

impl IndexDeliveryWorker {
    pub fn new(
        sink: Arc<dyn IndexSink>,
        messages: mpsc::Receiver<IndexMessage>,
        acks: mpsc::Sender<ProduceAck>,
    ) -> Self {
        Self {
            sink,
            messages,
            acks,
        }
    }

    /// Deliver messages until cancelled or the outbox closes.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("Index delivery worker started");
        loop {
            let message = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Index delivery worker shutting down");
                    break;
                }
                message = self.messages.recv() => match message {
                    Some(message) => message,
                    None => {
                        info!("Index outbox closed, delivery worker exiting");
                        break;
                    }
                },
            };

            let ack = self.deliver(message).await;
            if self.acks.send(ack).await.is_err() {
                warn!("Index ack channel closed, delivery worker exiting");
                break;
            }
        }
    }

    async fn deliver(&self, message: IndexMessage) -> ProduceAck {
        let start = Instant::now();
        let result = self.sink.deliver(&message).await;
        metrics::record_index_delivery(start.elapsed());

        match result {
            Ok(()) => {
                debug!(
                    "Delivered index {} for {} v{}",
                    message.msg_type.as_str(),
                    message.doc_id,
                    message.version
                );
                ProduceAck::delivered(message)
            }
            Err(e) => ProduceAck::failed(message, format!("{:#}", e)),
        }
    }
}
