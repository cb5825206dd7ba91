//! PipelineSupervisor - owns the consumption loop
//!
//! ## State Machine
//!
//! ```text
//! Initializing ──declare topology──▶ Running
//!
//! Running:
//!   ChannelError           → stay Running, no delay
//!   NotDelivered           → log, stay Running
//!   ConnectionError        → leave loop, returned to the caller
//!   any other error        → leave loop, fatal
//!   Shutdown / no handles  → Terminating
//!
//! Terminating ──final drain (best effort), close──▶ Stopped
//! ```
//!
//! The loop is strictly sequential: one delivery is classified, acknowledged,
//! buffered and drained before the next one is pulled. Commands are only
//! looked at while waiting for the next delivery.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::buffer::RelayBuffer;
use crate::classifier::Classifier;
use crate::config::Config;
use crate::transport::{ExchangeKind, Transport};

use super::consumer::BrokerConsumer;
use super::error::RelayError;
use super::messages::{RelayCommand, RelayStats, SupervisorState};

pub struct PipelineSupervisor {
    name: String,
    exchange: String,
    queue: String,
    inbound_routing_key: String,
    prefetch_count: u16,
    transport: Box<dyn Transport>,
    consumer: BrokerConsumer,
    buffer: RelayBuffer,
    stats: RelayStats,
    state: SupervisorState,
}

impl PipelineSupervisor {
    pub fn new(config: &Config, classifier: Box<dyn Classifier>, transport: Box<dyn Transport>) -> Self {
        Self {
            name: config.name(),
            exchange: config.exchange.clone(),
            queue: config.queue(),
            inbound_routing_key: config.inbound_routing_key(),
            prefetch_count: config.prefetch_count(),
            transport,
            consumer: BrokerConsumer::new(
                classifier,
                config.exchange.clone(),
                config.outbound_routing_key(),
            ),
            buffer: RelayBuffer::new(config.buffer_capacity),
            stats: RelayStats::default(),
            state: SupervisorState::Initializing,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn buffer(&self) -> &RelayBuffer {
        &self.buffer
    }

    pub fn stats(&self) -> RelayStats {
        RelayStats {
            pending: self.buffer.len(),
            ..self.stats.clone()
        }
    }

    /// Connect and declare exchange, queue, binding, prefetch and confirm mode
    #[instrument(skip(self), fields(alerter = %self.name))]
    pub async fn initialize(&mut self) -> Result<(), RelayError> {
        self.state = SupervisorState::Initializing;
        self.transport.connect().await?;

        debug!("creating '{}' exchange", self.exchange);
        self.transport
            .declare_exchange(&self.exchange, ExchangeKind::Topic)
            .await?;

        debug!("creating queue '{}'", self.queue);
        self.transport.declare_queue(&self.queue).await?;

        debug!(
            "binding queue '{}' to exchange '{}' with routing key '{}'",
            self.queue, self.exchange, self.inbound_routing_key
        );
        self.transport
            .bind_queue(&self.queue, &self.exchange, &self.inbound_routing_key)
            .await?;

        self.transport.set_prefetch(self.prefetch_count).await?;

        debug!("setting delivery confirmation on channel");
        self.transport.confirm_delivery().await?;

        Ok(())
    }

    /// Run the consumption loop until shutdown or an unrecoverable error
    ///
    /// Returns `Ok` after a graceful shutdown. A connection error is returned
    /// as is; the buffer survives, so calling `run` again after reconnecting
    /// resumes with the pending alerts.
    #[instrument(skip_all, fields(alerter = %self.name))]
    pub async fn run(
        &mut self,
        command_rx: &mut mpsc::Receiver<RelayCommand>,
    ) -> Result<(), RelayError> {
        if let Err(e) = self.initialize().await {
            self.state = SupervisorState::Stopped;
            return Err(e);
        }

        self.state = SupervisorState::Running;
        info!("{} started", self.name);

        loop {
            tokio::select! {
                biased;

                cmd = command_rx.recv() => {
                    match cmd {
                        Some(RelayCommand::GetStats { respond_to }) => {
                            let _ = respond_to.send(self.stats());
                        }
                        Some(RelayCommand::Shutdown) => {
                            debug!("received shutdown command");
                            break;
                        }
                        None => {
                            warn!("command channel closed, shutting down");
                            break;
                        }
                    }
                }

                delivery = self.transport.next_delivery(&self.queue) => {
                    let result = match delivery {
                        Ok(delivery) => {
                            self.consumer
                                .on_delivery(
                                    self.transport.as_ref(),
                                    delivery,
                                    &mut self.buffer,
                                    &mut self.stats,
                                )
                                .await
                        }
                        Err(e) => Err(e.into()),
                    };

                    if let Err(e) = result {
                        self.recover(e)?;
                    }
                }
            }
        }

        self.terminate().await;
        Ok(())
    }

    /// Decide whether the loop survives an error
    fn recover(&mut self, e: RelayError) -> Result<(), RelayError> {
        if e.is_channel() {
            debug!("{e}, continuing on a fresh channel");
            self.stats.channel_errors += 1;
            return Ok(());
        }

        if e.is_not_delivered() {
            warn!("{e}");
            self.stats.not_delivered += 1;
            return Ok(());
        }

        self.state = SupervisorState::Stopped;
        if e.is_connection() {
            warn!("{e}");
        } else {
            error!("{e}");
        }
        Err(e)
    }

    /// Best-effort final drain, then release the connection
    async fn terminate(&mut self) {
        self.state = SupervisorState::Terminating;
        info!(
            "{} is terminating, {} alerts pending; the connection will be closed",
            self.name,
            self.buffer.len()
        );

        if let Err(e) = self
            .consumer
            .publisher()
            .drain(self.transport.as_ref(), &mut self.buffer, &mut self.stats)
            .await
        {
            warn!("final drain failed: {e}");
        }

        if !self.buffer.is_empty() {
            warn!("{} alerts were not relayed before shutdown", self.buffer.len());
        }

        if let Err(e) = self.transport.close().await {
            error!("error closing connection: {e}");
        }

        self.state = SupervisorState::Stopped;
        info!("{} terminated", self.name);
    }
}

/// Handle to a supervisor running in its own task
///
/// The task restarts the loop after connection errors, waiting
/// `reconnect_delay` between attempts. Any other error ends the task.
#[derive(Clone)]
pub struct RelayHandle {
    sender: mpsc::Sender<RelayCommand>,
}

impl RelayHandle {
    pub fn spawn(
        supervisor: PipelineSupervisor,
        reconnect_delay: Duration,
    ) -> (Self, JoinHandle<Result<RelayStats, RelayError>>) {
        let (sender, command_rx) = mpsc::channel(32);
        let task = tokio::spawn(supervise(supervisor, command_rx, reconnect_delay));
        (Self { sender }, task)
    }

    pub async fn get_stats(&self) -> anyhow::Result<RelayStats> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RelayCommand::GetStats { respond_to: tx })
            .await?;
        Ok(rx.await?)
    }

    pub async fn shutdown(&self) {
        let _ = self.sender.send(RelayCommand::Shutdown).await;
    }
}

async fn supervise(
    mut supervisor: PipelineSupervisor,
    mut command_rx: mpsc::Receiver<RelayCommand>,
    reconnect_delay: Duration,
) -> Result<RelayStats, RelayError> {
    loop {
        match supervisor.run(&mut command_rx).await {
            Ok(()) => return Ok(supervisor.stats()),
            Err(e) if e.is_connection() => {
                warn!(
                    "{}: reconnecting in {}s",
                    supervisor.name(),
                    reconnect_delay.as_secs_f32()
                );
                if !wait_for_reconnect(&supervisor, &mut command_rx, reconnect_delay).await {
                    info!("{} stopped while disconnected", supervisor.name());
                    return Ok(supervisor.stats());
                }
            }
            Err(e) => return Err(e),
        }
    }
}

/// Sleep before reconnecting while still answering commands.
///
/// Returns `false` when a shutdown arrived in the meantime.
async fn wait_for_reconnect(
    supervisor: &PipelineSupervisor,
    command_rx: &mut mpsc::Receiver<RelayCommand>,
    delay: Duration,
) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            cmd = command_rx.recv() => match cmd {
                Some(RelayCommand::GetStats { respond_to }) => {
                    let _ = respond_to.send(supervisor.stats());
                }
                Some(RelayCommand::Shutdown) | None => return false,
            },
        }
    }
}
