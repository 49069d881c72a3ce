//! Monitoring session
//!
//! Owns the active link, the classifier and the alert machine, and
//! dispatches acquisition events and user commands on one task. Frames
//! are handled strictly in delivery order. Classification runs on the
//! blocking pool so commands are served while a model is busy.

use crate::commands::UserCommand;
use crate::config::MonitorConfig;
use crate::preview::PreviewRenderer;
use crate::MonitorError;
use alerting::{AlertActuator, AlertMachine};
use camera_capture::{Frame, FrameSource, RemoteCamera};
use dms::{Classification, DmsError, DrowsinessClassifier, LandmarkDetector};
use frame_scheduler::{AcquisitionEvent, FrameScheduler, SchedulerError, SchedulerStats};
use rpc_protocol::RpcClient;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};

/// Frames buffered between the scheduler and the session
const EVENT_QUEUE_DEPTH: usize = 4;

struct ActiveLink {
    name: String,
    stop: watch::Sender<bool>,
    events: mpsc::Receiver<AcquisitionEvent>,
    task: JoinHandle<Result<SchedulerStats, SchedulerError>>,
}

impl ActiveLink {
    async fn close(self) -> Result<SchedulerStats, SchedulerError> {
        let ActiveLink {
            stop, events, task, ..
        } = self;
        let _ = stop.send(true);
        drop(events);
        task.await
            .unwrap_or_else(|e| Err(SchedulerError::TaskFailed(e.to_string())))
    }
}

type Classified = (Frame, Result<Classification, DmsError>);

pub struct Session<D, A, R> {
    config: MonitorConfig,
    classifier: Arc<DrowsinessClassifier<D>>,
    alerts: AlertMachine<A>,
    renderer: R,
    link: Option<ActiveLink>,
    /// At most one frame is being classified at a time
    classifying: Option<JoinHandle<Classified>>,
}

impl<D, A, R> Session<D, A, R>
where
    D: LandmarkDetector + Send + Sync + 'static,
    A: AlertActuator,
    R: PreviewRenderer,
{
    pub fn new(config: MonitorConfig, detector: D, actuator: A, renderer: R) -> Self {
        let classifier = Arc::new(DrowsinessClassifier::new(detector, &config.dms));
        let alerts = AlertMachine::new(&config.alert, actuator);
        Self {
            config,
            classifier,
            alerts,
            renderer,
            link: None,
            classifying: None,
        }
    }

    /// Open the serial link and start polling the camera
    ///
    /// Uses `port` if given, otherwise the configured one. An open link
    /// is closed first.
    pub async fn connect(&mut self, port: Option<String>) -> Result<(), MonitorError> {
        let port = port
            .or_else(|| self.config.link.port.clone())
            .ok_or(MonitorError::NoPort)?;

        self.disconnect().await;

        let client = RpcClient::open(&port, self.config.link.baud_rate)?;
        let camera = RemoteCamera::new(client, self.config.camera.clone());
        self.attach(port, camera);
        Ok(())
    }

    /// Start acquiring from an already-open source
    pub fn attach<S>(&mut self, name: impl Into<String>, source: S)
    where
        S: FrameSource + 'static,
    {
        let name = name.into();
        let (stop, stop_rx) = watch::channel(false);
        let (events_tx, events) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let mut scheduler = FrameScheduler::new(self.config.scheduler.clone());
        let task =
            tokio::spawn(async move { scheduler.run(source, events_tx, stop_rx).await });

        info!("Monitoring {}", name);
        self.link = Some(ActiveLink {
            name,
            stop,
            events,
            task,
        });
    }

    /// Close the link, if any, and clear the alert state
    ///
    /// A frame still being classified is discarded.
    pub async fn disconnect(&mut self) {
        if self.classifying.take().is_some() {
            debug!("Discarding frame in classification");
        }

        let Some(link) = self.link.take() else {
            return;
        };

        let name = link.name.clone();
        match link.close().await {
            Ok(stats) => info!(
                "Disconnected from {} ({} frames, {} failures)",
                name, stats.acquired, stats.failed
            ),
            Err(e) => warn!("Disconnected from {}: {}", name, e),
        }
        self.alerts.link_lost();
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    pub fn silence(&mut self) -> bool {
        self.alerts.silence()
    }

    pub fn reset(&mut self) {
        self.alerts.reset();
    }

    pub fn alerts(&self) -> &AlertMachine<A> {
        &self.alerts
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    /// Hand a frame to the blocking pool for classification
    fn start_classify(&mut self, frame: Frame) {
        let classifier = Arc::clone(&self.classifier);
        self.classifying = Some(tokio::task::spawn_blocking(move || {
            let result = classifier.classify(&frame);
            (frame, result)
        }));
    }

    /// Advance the alert machine with a classified frame and show it
    fn finish_classify(&mut self, joined: Result<Classified, JoinError>) {
        let (frame, result) = match joined {
            Ok(classified) => classified,
            Err(e) => {
                error!("Classification task failed: {}", e);
                return;
            }
        };

        let before = self.alerts.phase();
        match result {
            Ok(result) => {
                let phase = self.alerts.observe(result.drowsy);
                if phase != before {
                    info!("Alert phase {:?} -> {:?}", before, phase);
                }
            }
            Err(e) => warn!("Skipping frame {}: {}", frame.sequence, e),
        }

        self.renderer.show(&frame);
    }

    fn handle_event(&mut self, event: AcquisitionEvent) {
        match event {
            AcquisitionEvent::Frame(frame) => self.start_classify(frame),
            AcquisitionEvent::Failed(e) => debug!("No frame this tick: {}", e),
            AcquisitionEvent::LinkLost(e) => {
                error!("Camera link lost: {}", e);
                self.alerts.link_lost();
            }
        }
    }

    /// The scheduler has stopped on its own
    async fn finish_link(&mut self) {
        let Some(link) = self.link.take() else {
            return;
        };

        let name = link.name.clone();
        match link.close().await {
            Ok(stats) => info!("Acquisition from {} ended after {} frames", name, stats.acquired),
            // Already reported through the event stream
            Err(SchedulerError::LinkLost(_)) => {}
            Err(e) => {
                error!("Acquisition from {} failed: {}", name, e);
                self.alerts.link_lost();
            }
        }
    }

    async fn handle_command(&mut self, command: UserCommand) {
        debug!("Command {:?}", command);
        match command {
            UserCommand::Connect(port) => {
                if let Err(e) = self.connect(port).await {
                    error!("Connect failed: {}", e);
                }
            }
            UserCommand::Disconnect => {
                if self.is_connected() {
                    self.disconnect().await;
                } else {
                    info!("Not connected");
                }
            }
            UserCommand::Silence => {
                if !self.silence() {
                    info!("No alert to silence");
                }
            }
            UserCommand::Reset => self.reset(),
            UserCommand::ListPorts => log_ports(),
            UserCommand::Quit => {}
        }
    }

    /// Serve commands and acquisition events until `Quit` or the command
    /// channel closes, then tear everything down
    pub async fn run(&mut self, mut commands: mpsc::Receiver<UserCommand>) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(UserCommand::Quit) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                joined = join(&mut self.classifying), if self.classifying.is_some() => {
                    self.classifying = None;
                    self.finish_classify(joined);
                }
                // next frame waits until the previous one is applied
                event = next_event(&mut self.link), if self.classifying.is_none() => match event {
                    Some(event) => self.handle_event(event),
                    None => self.finish_link().await,
                },
            }
        }

        info!("Shutting down");
        self.disconnect().await;
        self.alerts.reset();
    }
}

async fn join<T>(task: &mut Option<JoinHandle<T>>) -> Result<T, JoinError> {
    match task.as_mut() {
        Some(task) => task.await,
        None => std::future::pending().await,
    }
}

async fn next_event(link: &mut Option<ActiveLink>) -> Option<AcquisitionEvent> {
    match link.as_mut() {
        Some(link) => link.events.recv().await,
        None => std::future::pending().await,
    }
}

/// Log the serial ports present on this machine
pub fn log_ports() {
    match rpc_protocol::available_ports() {
        Ok(ports) if ports.is_empty() => info!("No serial ports found"),
        Ok(ports) => info!("Available ports: {}", ports.join(", ")),
        Err(e) => warn!("Could not list serial ports: {}", e),
    }
}
