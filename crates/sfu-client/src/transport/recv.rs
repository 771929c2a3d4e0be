//! Receiving side: consume (batched) and consume_data
//!
//! `consume()` validates and registers the request synchronously. A request
//! joins the open batch only while that batch's flush is still the last
//! operation pushed onto the queue; otherwise it opens a new batch with its
//! own flush. Consecutive calls therefore share one engine `receive` call
//! (and, for Plan-B, one remote description), while any other operation
//! queued in between keeps its place in submission order.

use std::future::Future;
use std::sync::Arc;

use futures::future::{self, Either};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;

use super::{Transport, TransportDirection, TransportInner};
use crate::consumer::{Consumer, ConsumerInit};
use crate::data_consumer::{DataConsumer, DataConsumerInit};
use crate::engine::{DataChannelRequest, ReceiveBatch, ReceiveRequest};
use crate::error::{Error, Result};
use crate::ortc;
use crate::rtp::{MediaKind, RtpParameters};
use crate::sctp::SctpStreamParameters;
use crate::signaling::{app_data_from, AppData};

/// Options of [`Transport::consume`], as sent by the server
#[derive(Debug, Clone)]
pub struct ConsumerOptions {
    pub id: String,
    pub producer_id: String,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
    /// Media stream the track belongs to; defaults to the RTCP cname
    pub stream_id: Option<String>,
    pub app_data: Option<Value>,
}

/// Options of [`Transport::consume_data`], as sent by the server
#[derive(Debug, Clone, Default)]
pub struct DataConsumerOptions {
    pub id: String,
    pub data_producer_id: String,
    pub sctp_stream_parameters: SctpStreamParameters,
    pub label: String,
    pub protocol: String,
    pub app_data: Option<Value>,
}

pub(super) struct PendingConsume {
    id: String,
    producer_id: String,
    kind: MediaKind,
    rtp_parameters: RtpParameters,
    stream_id: String,
    app_data: AppData,
    reply: oneshot::Sender<Result<Consumer>>,
}

type PendingBatch = Arc<Mutex<Vec<PendingConsume>>>;

#[derive(Default)]
pub(super) struct ConsumeBatch {
    /// Batch still accepting requests, keyed by the queue sequence of its flush
    open: Option<(u64, PendingBatch)>,
}

impl Transport {
    /// Receive a remote producer
    ///
    /// Validation and queueing happen when this is called, not when the
    /// returned future is first polled, so consecutive calls made in one
    /// turn are dispatched to the engine together.
    pub fn consume(&self, options: ConsumerOptions) -> impl Future<Output = Result<Consumer>> + Send + 'static {
        match self.inner.enqueue_consume(options) {
            Ok(reply) => Either::Left(async move {
                match reply.await {
                    Ok(result) => result,
                    Err(_) => Err(Error::internal("consume batch was dropped")),
                }
            }),
            Err(err) => Either::Right(future::ready(Err(err))),
        }
    }

    /// Receive a remote data producer
    pub async fn consume_data(&self, options: DataConsumerOptions) -> Result<DataConsumer> {
        let inner = &self.inner;
        inner.ensure_direction(TransportDirection::Recv, "consume_data")?;
        inner.ensure_open()?;
        inner.sctp_parameters()?;

        if options.id.is_empty() {
            return Err(Error::invalid_argument("missing id"));
        }
        if options.data_producer_id.is_empty() {
            return Err(Error::invalid_argument("missing dataProducerId"));
        }
        let app_data = app_data_from(options.app_data)?;

        let mut stream_parameters = options.sctp_stream_parameters;
        ortc::validate_sctp_stream_parameters(&mut stream_parameters)?;

        let queued = inner.clone();
        let id = options.id;
        let data_producer_id = options.data_producer_id;
        let request = DataChannelRequest {
            stream_parameters,
            label: options.label,
            protocol: options.protocol,
        };
        inner
            .queue
            .push("consume_data", async move {
                queued
                    .consume_data_queued(id, data_producer_id, request, app_data)
                    .await
            })
            .await
    }
}

impl TransportInner {
    fn enqueue_consume(self: &Arc<Self>, options: ConsumerOptions) -> Result<oneshot::Receiver<Result<Consumer>>> {
        self.ensure_direction(TransportDirection::Recv, "consume")?;
        self.ensure_open()?;

        if options.id.is_empty() {
            return Err(Error::invalid_argument("missing id"));
        }
        if options.producer_id.is_empty() {
            return Err(Error::invalid_argument("missing producerId"));
        }
        let app_data = app_data_from(options.app_data)?;

        let mut rtp_parameters = options.rtp_parameters;
        ortc::validate_rtp_parameters(&mut rtp_parameters)?;
        if !ortc::can_receive(&rtp_parameters, &self.extended) {
            return Err(Error::unsupported("cannot consume this producer"));
        }

        let stream_id = options
            .stream_id
            .or_else(|| rtp_parameters.rtcp.cname.clone())
            .unwrap_or_else(|| options.producer_id.clone());

        let (reply, rx) = oneshot::channel();
        let pending = PendingConsume {
            id: options.id,
            producer_id: options.producer_id,
            kind: options.kind,
            rtp_parameters,
            stream_id,
            app_data,
            reply,
        };

        let mut consume_batch = self.consume_batch.lock();
        if let Some((sequence, open)) = &consume_batch.open {
            if *sequence == self.queue.pushed() {
                open.lock().push(pending);
                return Ok(rx);
            }
        }

        let open: PendingBatch = Arc::new(Mutex::new(vec![pending]));
        let inner = self.clone();
        let flushed = open.clone();
        self.queue.push_detached("consume", async move {
            inner.flush_consumes(flushed).await;
            Ok(())
        });
        consume_batch.open = Some((self.queue.pushed(), open));

        Ok(rx)
    }

    async fn flush_consumes(self: Arc<Self>, flushed: PendingBatch) {
        let batch = {
            let mut consume_batch = self.consume_batch.lock();
            if matches!(&consume_batch.open, Some((_, open)) if Arc::ptr_eq(open, &flushed)) {
                consume_batch.open = None;
            }
            std::mem::take(&mut *flushed.lock())
        };
        if batch.is_empty() {
            return;
        }

        debug!(transport_id = %self.id, size = batch.len(), "dispatching consume batch");

        if let Err(err) = self.ensure_connected().await {
            reject_all(batch, &err);
            return;
        }

        let remote_description = self.remote_sdp.as_ref().map(|sdp| {
            let mut sdp = sdp.lock();
            for item in &batch {
                sdp.receive(item.kind.as_str(), item.kind, &item.rtp_parameters, &item.stream_id, &item.id);
            }
            sdp.serialize()
        });

        let items = batch
            .iter()
            .map(|item| ReceiveRequest {
                track_id: item.id.clone(),
                kind: item.kind,
                rtp_parameters: item.rtp_parameters.clone(),
                stream_id: Some(item.stream_id.clone()),
            })
            .collect();

        let results = match self
            .engine
            .receive(ReceiveBatch {
                items,
                remote_description,
            })
            .await
        {
            Ok(results) if results.len() == batch.len() => results,
            Ok(results) => {
                let err = Error::internal(format!(
                    "engine returned {} receivers for {} requests",
                    results.len(),
                    batch.len()
                ));
                reject_all(batch, &err);
                return;
            }
            Err(err) => {
                reject_all(batch, &err);
                return;
            }
        };

        for (item, received) in batch.into_iter().zip(results) {
            let consumer = Consumer::new(
                ConsumerInit {
                    id: item.id.clone(),
                    local_id: received.local_id,
                    producer_id: item.producer_id,
                    kind: item.kind,
                    track: received.track,
                    rtp_parameters: item.rtp_parameters,
                    app_data: item.app_data,
                    event_capacity: self.config.event_channel_capacity,
                },
                Arc::downgrade(&self),
            );

            self.consumers.insert(item.id.clone(), consumer.clone());
            if self.is_closed() {
                self.consumers.remove(&item.id);
                consumer.transport_closed();
            }

            // the caller may have stopped waiting
            let _ = item.reply.send(Ok(consumer));
        }
    }

    async fn consume_data_queued(
        self: Arc<Self>,
        id: String,
        data_producer_id: String,
        request: DataChannelRequest,
        app_data: AppData,
    ) -> Result<DataConsumer> {
        self.ensure_connected().await?;

        let remote_description = match &self.remote_sdp {
            Some(sdp) => {
                let mut sdp = sdp.lock();
                sdp.receive_sctp_association()?;
                Some(sdp.serialize())
            }
            None => None,
        };

        let label = request.label.clone();
        let protocol = request.protocol.clone();
        let opened = self
            .engine
            .receive_data_channel(request, remote_description)
            .await?;

        let data_consumer = DataConsumer::new(
            DataConsumerInit {
                id: id.clone(),
                data_producer_id,
                channel: opened.channel,
                sctp_stream_parameters: opened.sctp_stream_parameters,
                label,
                protocol,
                app_data,
                event_capacity: self.config.event_channel_capacity,
            },
            Arc::downgrade(&self),
        );

        self.data_consumers.insert(id.clone(), data_consumer.clone());
        if self.is_closed() {
            self.data_consumers.remove(&id);
            data_consumer.transport_closed();
        }

        debug!(transport_id = %self.id, data_consumer_id = %id, "data consumer created");
        Ok(data_consumer)
    }
}

fn reject_all(batch: Vec<PendingConsume>, err: &Error) {
    for item in batch {
        let _ = item.reply.send(Err(err.clone()));
    }
}
