//! Registration and deregistration of a service instance

use beacon_core::{ServiceDescriptor, ServiceRegistry};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{DescriptorFactory, ServiceOptions};

/// Observable registration state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleState {
    Unregistered,
    Registering,
    Registered,
    Deregistering,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegistrationOutcome {
    Registered(ServiceDescriptor),
    /// The registration loop was interrupted before the registry accepted it
    Cancelled,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeregistrationOutcome {
    Deregistered,
    /// Retries ran out; the instance may still be registered
    Exhausted { attempts: u64 },
}

/// Registers one service instance and removes it again at shutdown.
///
/// Registration retries forever at a fixed interval until the registry
/// accepts it or the lifecycle's cancellation token fires. Deregistration
/// cancels any registration in flight, then retries up to `maxRetry` times.
/// Cancellation is terminal: once fired, later calls to
/// [`register`](Self::register) return [`RegistrationOutcome::Cancelled`].
pub struct ServiceLifecycle<R: ServiceRegistry + ?Sized> {
    registry: Arc<R>,
    factory: DescriptorFactory,
    state: watch::Sender<LifecycleState>,
    cancel: CancellationToken,
}

impl<R: ServiceRegistry + ?Sized> ServiceLifecycle<R> {
    pub fn new(registry: Arc<R>, options: ServiceOptions) -> Self {
        Self::with_factory(registry, DescriptorFactory::new(options))
    }

    pub fn with_factory(registry: Arc<R>, factory: DescriptorFactory) -> Self {
        let (state, _) = watch::channel(LifecycleState::Unregistered);
        Self {
            registry,
            factory,
            state,
            cancel: CancellationToken::new(),
        }
    }

    /// The descriptor used for both registration and deregistration
    pub fn descriptor(&self) -> ServiceDescriptor {
        self.factory.build()
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Receive every state transition
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// Token interrupting the registration loop, for wiring into shutdown handling
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel_registration(&self) {
        self.cancel.cancel();
    }

    /// Register with the registry, retrying until it succeeds or is cancelled
    pub async fn register(&self) -> RegistrationOutcome {
        let descriptor = self.factory.build();
        let interval = self.factory.options().retry_interval();
        self.state.send_replace(LifecycleState::Registering);

        let mut attempt: u64 = 0;
        loop {
            attempt += 1;
            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                result = self.registry.register(&descriptor) => Some(result),
            };

            match result {
                None => break,
                Some(Ok(())) => {
                    self.transition(LifecycleState::Registering, LifecycleState::Registered);
                    info!(
                        service = %descriptor.name,
                        id = %descriptor.id,
                        attempt,
                        "Registered service"
                    );
                    return RegistrationOutcome::Registered(descriptor);
                }
                Some(Err(e)) => {
                    warn!(
                        service = %descriptor.name,
                        attempt,
                        error = %e,
                        "Failed to register service, retrying in {:?}",
                        interval
                    );
                }
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }

        self.transition(LifecycleState::Registering, LifecycleState::Unregistered);
        info!(service = %descriptor.name, attempt, "Service registration cancelled");
        RegistrationOutcome::Cancelled
    }

    /// Deregister from the registry, giving up once `maxRetry` retries fail
    pub async fn deregister(&self) -> DeregistrationOutcome {
        self.cancel.cancel();

        let descriptor = self.factory.build();
        let interval = self.factory.options().retry_interval();
        let limit = self.factory.options().deregister_retry_limit();
        self.state.send_replace(LifecycleState::Deregistering);

        let mut failures: u64 = 0;
        loop {
            match self.registry.deregister(&descriptor).await {
                Ok(()) => {
                    info!(service = %descriptor.name, id = %descriptor.id, "Deregistered service");
                    self.state.send_replace(LifecycleState::Unregistered);
                    return DeregistrationOutcome::Deregistered;
                }
                Err(e) => {
                    failures += 1;
                    if limit.is_some_and(|max| failures > max) {
                        error!(
                            service = %descriptor.name,
                            attempts = failures,
                            error = %e,
                            "Failed to deregister service, giving up"
                        );
                        self.state.send_replace(LifecycleState::Unregistered);
                        return DeregistrationOutcome::Exhausted { attempts: failures };
                    }

                    warn!(
                        service = %descriptor.name,
                        attempt = failures,
                        error = %e,
                        "Failed to deregister service, retrying in {:?}",
                        interval
                    );
                    tokio::time::sleep(interval).await;
                }
            }
        }
    }

    // Only moves out of `from`; a concurrent deregistration owns the state otherwise
    fn transition(&self, from: LifecycleState, to: LifecycleState) {
        self.state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        });
    }
}
