//! `lapin`-backed AMQP `Broker`: durable quorum queues, manual ack,
//! prefetch 1, and publisher confirms (spec.md §4.L), grounded on the
//! corpus's `celery_app.py` broker configuration (`worker_prefetch_multiplier=1`,
//! `task_acks_late=True`, `confirm_publish=True`, `broker_heartbeat=60`).

use crate::broker::{Broker, BrokerError, Delivery};
use async_trait::async_trait;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use std::collections::HashMap;
use std::time::Duration;
use futures::StreamExt;
use tokio::sync::Mutex;

pub struct AmqpBroker {
    channel: Channel,
    consumers: Mutex<HashMap<String, lapin::Consumer>>,
}

impl AmqpBroker {
    pub async fn connect(uri: &str) -> Result<Self, BrokerError> {
        let connection = Connection::connect(
            uri,
            ConnectionProperties::default().with_connection_name("shareml-runner".into()),
        )
        .await
        .map_err(|err| BrokerError::Connection(err.to_string()))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|err| BrokerError::Connection(err.to_string()))?;

        channel
            .basic_qos(1, BasicQosOptions::default())
            .await
            .map_err(|err| BrokerError::Connection(err.to_string()))?;

        Ok(Self {
            channel,
            consumers: Mutex::new(HashMap::new()),
        })
    }

    async fn declare_quorum_queue(&self, queue: &str) -> Result<(), BrokerError> {
        let mut args = FieldTable::default();
        args.insert("x-queue-type".into(), AMQPValue::LongString("quorum".into()));
        self.channel
            .queue_declare(queue, QueueDeclareOptions::default(), args)
            .await
            .map_err(|err| BrokerError::Connection(err.to_string()))?;
        Ok(())
    }

    async fn consumer_for(&self, queue: &str) -> Result<(), BrokerError> {
        let mut consumers = self.consumers.lock().await;
        if consumers.contains_key(queue) {
            return Ok(());
        }
        self.declare_quorum_queue(queue).await?;
        let consumer = self
            .channel
            .basic_consume(
                queue,
                "shareml-runner",
                BasicConsumeOptions {
                    no_ack: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|err| BrokerError::Connection(err.to_string()))?;
        consumers.insert(queue.to_string(), consumer);
        Ok(())
    }
}

#[async_trait]
impl Broker for AmqpBroker {
    async fn publish(
        &self,
        queue: &str,
        body: Vec<u8>,
        headers: HashMap<String, String>,
    ) -> Result<(), BrokerError> {
        self.declare_quorum_queue(queue).await?;

        let mut field_table = FieldTable::default();
        for (key, value) in &headers {
            field_table.insert(key.as_str().into(), AMQPValue::LongString(value.as_str().into()));
        }

        let confirm = self
            .channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                &body,
                BasicProperties::default()
                    .with_headers(field_table)
                    .with_delivery_mode(2),
            )
            .await
            .map_err(|err| BrokerError::Publish(err.to_string()))?;

        confirm
            .await
            .map_err(|err| BrokerError::Publish(err.to_string()))?;
        Ok(())
    }

    async fn next_delivery(&self, queue: &str) -> Result<Option<Delivery>, BrokerError> {
        self.consumer_for(queue).await?;
        let mut consumers = self.consumers.lock().await;
        let consumer = consumers.get_mut(queue).expect("consumer registered above");

        match consumer.next().await {
            Some(Ok(delivery)) => {
                let mut headers = HashMap::new();
                if let Some(table) = delivery.properties.headers() {
                    for (key, value) in table.into_iter() {
                        if let AMQPValue::LongString(s) = value {
                            headers.insert(key.to_string(), s.to_string());
                        }
                    }
                }
                Ok(Some(Delivery {
                    body: delivery.data.clone(),
                    headers,
                    tag: delivery.delivery_tag,
                }))
            }
            Some(Err(err)) => Err(BrokerError::Connection(err.to_string())),
            None => Ok(None),
        }
    }

    async fn ack(&self, _queue: &str, delivery: &Delivery) -> Result<(), BrokerError> {
        self.channel
            .basic_ack(delivery.tag, BasicAckOptions::default())
            .await
            .map_err(|err| BrokerError::Acknowledge(err.to_string()))
    }

    /// AMQP core has no delayed redelivery, so this acks the original and
    /// republishes after `countdown` with the caller-supplied headers
    /// (used to bump the retry-count header). A production deployment
    /// would route this through a per-delay dead-letter exchange instead
    /// of sleeping in-process.
    async fn nack_requeue(
        &self,
        queue: &str,
        delivery: &Delivery,
        countdown: Duration,
        headers: HashMap<String, String>,
    ) -> Result<(), BrokerError> {
        self.channel
            .basic_nack(
                delivery.tag,
                BasicNackOptions {
                    requeue: false,
                    ..Default::default()
                },
            )
            .await
            .map_err(|err| BrokerError::Acknowledge(err.to_string()))?;

        if !countdown.is_zero() {
            tokio::time::sleep(countdown).await;
        }
        self.publish(queue, delivery.body.clone(), headers).await
    }
}
