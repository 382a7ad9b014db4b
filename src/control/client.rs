use std::{future::Future, sync::Arc, time::Duration};

use tokio::{
    sync::{mpsc, oneshot, watch},
    time::{sleep, timeout},
};
use tracing::{debug, info, warn};

use super::{ControlConnection, ControlConnector, ControlError, ControlState, format_command};

const RETRY_INTERVAL: Duration = Duration::from_secs(1);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

enum ControlRequest {
    Start,
    Exec {
        line: String,
        reply: oneshot::Sender<Result<String, ControlError>>,
    },
}

struct Shared {
    state: watch::Sender<ControlState>,
    closed: watch::Sender<bool>,
}

impl Shared {
    /// Move to `next` unless shutdown already began.
    fn set_state(&self, next: ControlState) {
        self.state.send_if_modified(|current| {
            if *current == ControlState::ShuttingDown || *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}

/// Handle to the control-channel connection loop.
///
/// The loop task owns the connection; [`ControlClient::send`] hands it a request and awaits
/// the reply, so exchanges never interleave on the wire.
#[derive(Clone)]
pub struct ControlClient {
    requests: mpsc::UnboundedSender<ControlRequest>,
    shared: Arc<Shared>,
}

impl ControlClient {
    /// Spawn the connection loop idle; it connects on [`ControlClient::start`].
    pub fn spawn(connector: Arc<dyn ControlConnector>) -> Self {
        Self::with_retry_interval(connector, RETRY_INTERVAL)
    }

    /// Like [`ControlClient::spawn`] with a custom wait between connection attempts.
    pub fn with_retry_interval(connector: Arc<dyn ControlConnector>, retry: Duration) -> Self {
        let (requests, inbox) = mpsc::unbounded_channel();
        let (state, state_rx) = watch::channel(ControlState::Disconnected);
        let (closed, _) = watch::channel(false);
        let shared = Arc::new(Shared { state, closed });

        let worker = ConnectionLoop {
            connector,
            inbox,
            shared: shared.clone(),
            state_rx,
            retry,
        };
        tokio::spawn(worker.run());

        Self { requests, shared }
    }

    /// Current connection state.
    pub fn state(&self) -> ControlState {
        *self.shared.state.borrow()
    }

    /// Watch connection state changes.
    pub fn subscribe(&self) -> watch::Receiver<ControlState> {
        self.shared.state.subscribe()
    }

    /// Begin connecting. Repeated calls are ignored.
    pub fn start(&self) {
        let _ = self.requests.send(ControlRequest::Start);
    }

    /// Execute `command` with `args` and return the console's reply.
    pub async fn send(&self, command: &str, args: &[String]) -> Result<String, ControlError> {
        match self.state() {
            ControlState::ShuttingDown => return Err(ControlError::ShuttingDown),
            ControlState::Connected => {}
            _ => return Err(ControlError::NotConnected),
        }

        let line = format_command(command, args);
        debug!(%line, "sending control command");
        let (reply, response) = oneshot::channel();
        self.requests
            .send(ControlRequest::Exec { line, reply })
            .map_err(|_| ControlError::ShuttingDown)?;
        response.await.map_err(|_| ControlError::ShuttingDown)?
    }

    /// Enter the shutting-down state, then wait for the connection to close.
    pub async fn stop(&self) {
        self.shared.state.send_replace(ControlState::ShuttingDown);
        let mut closed = self.shared.closed.subscribe();
        if timeout(CLOSE_TIMEOUT, closed.wait_for(|closed| *closed))
            .await
            .is_err()
        {
            warn!("control channel did not close in time");
        }
    }
}

struct ConnectionLoop {
    connector: Arc<dyn ControlConnector>,
    inbox: mpsc::UnboundedReceiver<ControlRequest>,
    shared: Arc<Shared>,
    state_rx: watch::Receiver<ControlState>,
    retry: Duration,
}

impl ConnectionLoop {
    async fn run(mut self) {
        if self.until_started().await {
            self.connect_loop().await;
        }
        self.shared.closed.send_replace(true);
        self.inbox.close();
        while let Ok(request) = self.inbox.try_recv() {
            reject(request, ControlError::ShuttingDown);
        }
        debug!("control channel loop finished");
    }

    /// Wait for the first start request. Returns `false` on shutdown.
    async fn until_started(&mut self) -> bool {
        loop {
            tokio::select! {
                request = self.inbox.recv() => match request {
                    Some(ControlRequest::Start) => return true,
                    Some(request) => reject(request, ControlError::NotConnected),
                    None => return false,
                },
                _ = shutdown_requested(&mut self.state_rx) => return false,
            }
        }
    }

    /// A single loop drives every reconnect, so at most one retry is ever pending.
    async fn connect_loop(&mut self) {
        loop {
            self.shared.set_state(ControlState::Connecting);
            let attempt = self.connector.connect();
            let Some(outcome) = self.idle_until(attempt).await else {
                return;
            };

            match outcome {
                Ok(connection) => {
                    info!("control channel connected");
                    self.shared.set_state(ControlState::Connected);
                    if !self.serve(connection).await {
                        return;
                    }
                }
                Err(ControlError::Refused { addr }) => {
                    debug!(%addr, "control channel refused; retrying");
                    self.shared.set_state(ControlState::Disconnected);
                }
                Err(err) => {
                    warn!(error = %err, "control channel connection failed; retrying");
                    self.shared.set_state(ControlState::Error);
                }
            }

            if self.idle_until(sleep(self.retry)).await.is_none() {
                return;
            }
        }
    }

    /// Drive `fut` while answering requests with `NotConnected`. `None` means shutdown.
    async fn idle_until<F: Future>(&mut self, fut: F) -> Option<F::Output> {
        tokio::pin!(fut);
        loop {
            tokio::select! {
                output = &mut fut => return Some(output),
                request = self.inbox.recv() => match request {
                    Some(request) => reject(request, ControlError::NotConnected),
                    None => return None,
                },
                _ = shutdown_requested(&mut self.state_rx) => return None,
            }
        }
    }

    /// Serve requests on an open connection until it fails, the server ends it, or shutdown.
    /// Returns `false` when the loop must end.
    async fn serve(&mut self, mut connection: Box<dyn ControlConnection>) -> bool {
        loop {
            tokio::select! {
                request = self.inbox.recv() => match request {
                    Some(ControlRequest::Exec { line, reply }) => {
                        let result = connection.exec(&line).await;
                        let failure = result.as_ref().err().map(ToString::to_string);
                        let _ = reply.send(result);
                        if let Some(reason) = failure {
                            warn!(%reason, "control channel failed; reconnecting");
                            self.shared.set_state(ControlState::Error);
                            connection.close().await;
                            return true;
                        }
                    }
                    Some(ControlRequest::Start) => {}
                    None => {
                        connection.close().await;
                        return false;
                    }
                },
                ended = connection.closed() => {
                    match ended {
                        Ok(()) => {
                            info!("control channel closed by the server; reconnecting");
                            self.shared.set_state(ControlState::Disconnected);
                        }
                        Err(err) => {
                            warn!(error = %err, "control channel failed; reconnecting");
                            self.shared.set_state(ControlState::Error);
                        }
                    }
                    connection.close().await;
                    return true;
                }
                _ = shutdown_requested(&mut self.state_rx) => {
                    connection.close().await;
                    info!("control channel closed");
                    return false;
                }
            }
        }
    }
}

fn reject(request: ControlRequest, error: ControlError) {
    if let ControlRequest::Exec { reply, .. } = request {
        let _ = reply.send(Err(error));
    }
}

async fn shutdown_requested(state: &mut watch::Receiver<ControlState>) {
    let _ = state
        .wait_for(|state| *state == ControlState::ShuttingDown)
        .await;
}

#[cfg(test)]
mod tests {
    use std::{
        io,
        sync::{
            Mutex,
            atomic::{AtomicUsize, Ordering},
        },
    };

    use futures::future::BoxFuture;
    use tokio::sync::Notify;

    use super::*;

    /// Refuses the first `refusals` attempts, then hands out echoing connections.
    #[derive(Default)]
    struct FakeConnector {
        refusals: usize,
        attempts: AtomicUsize,
        sent: Arc<Mutex<Vec<String>>>,
        closed: Arc<AtomicUsize>,
        hangup: Arc<Notify>,
    }

    struct FakeConnection {
        sent: Arc<Mutex<Vec<String>>>,
        closed: Arc<AtomicUsize>,
        hangup: Arc<Notify>,
    }

    impl ControlConnector for FakeConnector {
        fn connect(&self) -> BoxFuture<'static, Result<Box<dyn ControlConnection>, ControlError>> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            let refused = attempt < self.refusals;
            let connection = FakeConnection {
                sent: self.sent.clone(),
                closed: self.closed.clone(),
                hangup: self.hangup.clone(),
            };
            Box::pin(async move {
                if refused {
                    return Err(ControlError::Refused {
                        addr: "localhost:27015".into(),
                    });
                }
                Ok(Box::new(connection) as Box<dyn ControlConnection>)
            })
        }
    }

    impl ControlConnection for FakeConnection {
        fn exec<'a>(&'a mut self, line: &'a str) -> BoxFuture<'a, Result<String, ControlError>> {
            Box::pin(async move {
                self.sent.lock().unwrap().push(line.to_string());
                if line == "boom" {
                    return Err(ControlError::Io(io::Error::from(io::ErrorKind::BrokenPipe)));
                }
                Ok(format!("ok: {line}"))
            })
        }

        fn closed(&mut self) -> BoxFuture<'_, Result<(), ControlError>> {
            Box::pin(async move {
                self.hangup.notified().await;
                Ok(())
            })
        }

        fn close(&mut self) -> BoxFuture<'_, ()> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Box::pin(async {})
        }
    }

    fn client(refusals: usize) -> (Arc<FakeConnector>, ControlClient) {
        let connector = Arc::new(FakeConnector {
            refusals,
            ..FakeConnector::default()
        });
        let client = ControlClient::spawn(connector.clone());
        (connector, client)
    }

    async fn settle() {
        sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn refused_connections_are_retried_every_interval() {
        let (connector, client) = client(2);
        client.start();
        client.start();
        settle().await;
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
        assert_eq!(client.state(), ControlState::Disconnected);

        sleep(Duration::from_millis(2_000)).await;
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(client.state(), ControlState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn send_keeps_spaced_arguments_together() {
        let (connector, client) = client(0);
        client.start();
        settle().await;

        let reply = client
            .send("servermsg", &["back in 5".to_string()])
            .await
            .unwrap();
        assert_eq!(reply, r#"ok: servermsg "back in 5""#);
        assert_eq!(
            connector.sent.lock().unwrap().as_slice(),
            [r#"servermsg "back in 5""#]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn send_before_connecting_fails_fast() {
        let (_connector, client) = client(usize::MAX);
        assert!(matches!(
            client.send("players", &[]).await,
            Err(ControlError::NotConnected)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_exchange_reconnects_after_the_interval() {
        let (connector, client) = client(0);
        client.start();
        settle().await;

        assert!(client.send("boom", &[]).await.is_err());
        settle().await;
        assert_eq!(client.state(), ControlState::Error);
        assert_eq!(connector.closed.load(Ordering::SeqCst), 1);

        sleep(Duration::from_millis(1_000)).await;
        assert_eq!(client.state(), ControlState::Connected);
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn server_hangup_while_idle_reconnects_after_the_interval() {
        let (connector, client) = client(0);
        client.start();
        settle().await;
        assert_eq!(client.state(), ControlState::Connected);

        connector.hangup.notify_one();
        settle().await;
        assert_eq!(client.state(), ControlState::Disconnected);
        assert_eq!(connector.closed.load(Ordering::SeqCst), 1);
        assert!(matches!(
            client.send("players", &[]).await,
            Err(ControlError::NotConnected)
        ));

        sleep(Duration::from_millis(1_000)).await;
        assert_eq!(client.state(), ControlState::Connected);
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(
            client.send("players", &[]).await.unwrap(),
            "ok: players"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stop_closes_and_suppresses_reconnects() {
        let (connector, client) = client(0);
        client.start();
        settle().await;

        client.stop().await;
        assert_eq!(client.state(), ControlState::ShuttingDown);
        assert_eq!(connector.closed.load(Ordering::SeqCst), 1);

        sleep(Duration::from_secs(10)).await;
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
        assert_eq!(client.state(), ControlState::ShuttingDown);
        assert!(matches!(
            client.send("players", &[]).await,
            Err(ControlError::ShuttingDown)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_while_retrying_ends_the_loop() {
        let (connector, client) = client(usize::MAX);
        client.start();
        settle().await;

        client.stop().await;
        sleep(Duration::from_secs(10)).await;
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
    }
}
