use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::{mpsc, oneshot};

/// A message interface for [services](Service).
///
/// Most commonly, this is an enumeration of all messages that a service can handle. Each variant
/// carries the message and, if the message expects a response, the [`Sender`] to answer with.
pub trait Interface: Send + 'static {}

/// Services without messages use the unit type as interface.
impl Interface for () {}

/// An error when [sending](Addr::send) a message to a service fails.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SendError;

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to send message to service")
    }
}

impl std::error::Error for SendError {}

/// Response behavior of an [`Interface`] message.
pub trait MessageResponse {
    /// Sends the response from the service back to the requester.
    type Sender;

    /// Receiver for the response, returned by [`Addr::send`].
    type Output;

    /// Returns the response channel for an interface message.
    fn channel() -> (Self::Sender, Self::Output);
}

/// The request does not expect a response.
///
/// [`Addr::send`] returns immediately after enqueueing the message.
#[derive(Debug)]
pub struct NoResponse;

impl MessageResponse for NoResponse {
    type Sender = ();
    type Output = ();

    fn channel() -> (Self::Sender, Self::Output) {
        ((), ())
    }
}

/// The sender half of an asynchronous response.
#[derive(Debug)]
pub struct Sender<T>(oneshot::Sender<T>);

impl<T> Sender<T> {
    /// Sends the response value to the requester.
    ///
    /// The requester may have stopped waiting, in which case the value is dropped.
    pub fn send(self, value: T) {
        self.0.send(value).ok();
    }
}

/// A future resolving to the response of a message.
///
/// Resolves to `Err(SendError)` if the service dropped the message without answering, which
/// happens when it has shut down.
#[derive(Debug)]
pub struct AsyncResponse<T>(oneshot::Receiver<T>);

impl<T> Future for AsyncResponse<T> {
    type Output = Result<T, SendError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0).poll(cx).map(|r| r.map_err(|_| SendError))
    }
}

impl<T> MessageResponse for AsyncResponse<T> {
    type Sender = Sender<T>;
    type Output = Self;

    fn channel() -> (Self::Sender, Self::Output) {
        let (tx, rx) = oneshot::channel();
        (Sender(tx), AsyncResponse(rx))
    }
}

/// Declares a message as part of an [`Interface`].
pub trait FromMessage<M>: Interface {
    /// The behavior declaring the return value when sending this message.
    type Response: MessageResponse;

    /// Converts the message into the service interface.
    fn from_message(message: M, sender: <Self::Response as MessageResponse>::Sender) -> Self;
}

/// The address of a [`Service`].
///
/// Addresses allow to [send](Self::send) messages to a service as long as it is running. The
/// channel is unbounded, so the message is enqueued even if the returned response is never
/// awaited.
pub struct Addr<I: Interface> {
    tx: mpsc::UnboundedSender<I>,
    name: &'static str,
}

impl<I: Interface> Addr<I> {
    /// Sends a message to the service and returns the response channel.
    ///
    /// Depending on the message's response behavior, this either returns a future resolving to
    /// the response, or `()` for fire-and-forget messages.
    pub fn send<M>(&self, message: M) -> <I::Response as MessageResponse>::Output
    where
        I: FromMessage<M>,
    {
        let (tx, rx) = <I::Response as MessageResponse>::channel();
        if self.tx.send(I::from_message(message, tx)).is_err() {
            logjam_log::debug!(service = self.name, "message sent to stopped service");
        }
        rx
    }

    /// Returns `true` if the service is no longer receiving messages.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl<I: Interface> fmt::Debug for Addr<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Addr").field("service", &self.name).finish()
    }
}

// Manually implemented since the derive would require `I: Clone`.
impl<I: Interface> Clone for Addr<I> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            name: self.name,
        }
    }
}

/// Inbound channel for messages sent through an [`Addr`].
#[derive(Debug)]
pub struct Receiver<I: Interface> {
    rx: mpsc::UnboundedReceiver<I>,
}

impl<I: Interface> Receiver<I> {
    /// Receives the next message.
    ///
    /// Returns `None` once all addresses have been dropped.
    pub async fn recv(&mut self) -> Option<I> {
        self.rx.recv().await
    }
}

/// Creates an unbounded channel for communicating with a service.
pub fn channel<I: Interface>(name: &'static str) -> (Addr<I>, Receiver<I>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Addr { tx, name }, Receiver { rx })
}

/// A long running task that owns its state and handles messages of its [`Interface`].
///
/// Implementors write `async fn run` and typically loop over [`Receiver::recv`] in a
/// `tokio::select!` together with timers or a [`ShutdownHandle`](crate::ShutdownHandle).
pub trait Service: Sized + Send + 'static {
    /// The interface of messages this service handles.
    type Interface: Interface;

    /// Runs the service until it finishes.
    fn run(self, rx: Receiver<Self::Interface>) -> impl Future<Output = ()> + Send + 'static;

    /// Spawns the service on the current tokio runtime and returns its address.
    fn start_detached(self) -> Addr<Self::Interface> {
        self.start_joinable().0
    }

    /// Spawns the service and additionally returns a handle that resolves when it stops.
    fn start_joinable(self) -> (Addr<Self::Interface>, tokio::task::JoinHandle<()>) {
        let (addr, rx) = channel(Self::name());
        let handle = tokio::spawn(self.run(rx));
        (addr, handle)
    }

    /// Returns a unique name for this service implementation.
    fn name() -> &'static str {
        std::any::type_name::<Self>()
    }
}
