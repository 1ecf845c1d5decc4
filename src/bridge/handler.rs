use std::{
    any::Any,
    fmt,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{Arc, Weak},
};

use thiserror::Error;

use crate::protocol::{Event, Frame};

use super::{BridgeError, LinkState};

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// A device-specific consumer of bus traffic.
///
/// Callbacks run on the bridge worker and must return quickly; a handler that wants to
/// answer a packet queues it through a [`BridgeHandle`](super::BridgeHandle) instead of
/// writing to the link.
pub trait DeviceHandler: Send + Sync {
    fn on_packet_received(&self, frame: &Frame, event: &Event) -> Result<(), HandlerError>;

    fn on_link_state_changed(&self, _state: LinkState) -> Result<(), HandlerError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerTarget {
    Address(u8),
    All,
}

impl HandlerTarget {
    fn matches(&self, address: u8) -> bool {
        match self {
            HandlerTarget::Address(target) => *target == address,
            HandlerTarget::All => true,
        }
    }
}

/// What a handler was doing when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Packet { address: u8 },
    LinkState(LinkState),
}

impl fmt::Display for Dispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dispatch::Packet { address } => write!(f, "packet from {address:#04x}"),
            Dispatch::LinkState(state) => write!(f, "link state {state:?}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum HandlerDispatchError {
    #[error("handler {handler} failed on {during}: {source}")]
    Failed {
        handler: HandlerId,
        during: Dispatch,
        source: HandlerError,
    },

    #[error("handler {handler} panicked on {during}: {message}")]
    Panicked {
        handler: HandlerId,
        during: Dispatch,
        message: String,
    },
}

/// Runs a handler callback, turning both errors and panics into a dispatch error.
pub(crate) fn invoke<F>(
    handler: HandlerId,
    during: Dispatch,
    callback: F,
) -> Result<(), HandlerDispatchError>
where
    F: FnOnce() -> Result<(), HandlerError>,
{
    match catch_unwind(AssertUnwindSafe(callback)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(source)) => Err(HandlerDispatchError::Failed {
            handler,
            during,
            source,
        }),
        Err(payload) => Err(HandlerDispatchError::Panicked {
            handler,
            during,
            message: panic_message(payload.as_ref()),
        }),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        String::from("unknown panic")
    }
}

struct Registration {
    id: HandlerId,
    targets: Vec<HandlerTarget>,
    handler: Weak<dyn DeviceHandler>,
}

impl Registration {
    fn is_live(&self) -> bool {
        self.handler.strong_count() > 0
    }
}

/// Registered handlers, in registration order.
#[derive(Default)]
pub(crate) struct HandlerRegistry {
    next_id: u64,
    registrations: Vec<Registration>,
}

impl HandlerRegistry {
    pub fn register(
        &mut self,
        targets: &[HandlerTarget],
        handler: Weak<dyn DeviceHandler>,
    ) -> Result<HandlerId, BridgeError> {
        if targets.is_empty() {
            return Err(BridgeError::NoTargets);
        }
        self.prune();

        let mut unique = Vec::with_capacity(targets.len());
        for target in targets {
            if unique.contains(target) {
                continue;
            }
            if let HandlerTarget::Address(address) = target {
                let taken = self
                    .registrations
                    .iter()
                    .any(|registration| registration.targets.contains(target));
                if taken {
                    return Err(BridgeError::AddressTaken(*address));
                }
            }
            unique.push(*target);
        }

        let id = HandlerId(self.next_id);
        self.next_id += 1;
        self.registrations.push(Registration {
            id,
            targets: unique,
            handler,
        });
        Ok(id)
    }

    pub fn deregister(&mut self, id: HandlerId) -> bool {
        let before = self.registrations.len();
        self.registrations.retain(|registration| registration.id != id);
        before != self.registrations.len()
    }

    /// Live handlers for packets from `address`.
    pub fn handlers_for(&mut self, address: u8) -> Vec<(HandlerId, Arc<dyn DeviceHandler>)> {
        self.collect(|registration| {
            registration
                .targets
                .iter()
                .any(|target| target.matches(address))
        })
    }

    /// Every live handler.
    pub fn all(&mut self) -> Vec<(HandlerId, Arc<dyn DeviceHandler>)> {
        self.collect(|_| true)
    }

    pub fn len(&mut self) -> usize {
        self.prune();
        self.registrations.len()
    }

    fn collect<P>(&mut self, predicate: P) -> Vec<(HandlerId, Arc<dyn DeviceHandler>)>
    where
        P: Fn(&Registration) -> bool,
    {
        self.prune();
        self.registrations
            .iter()
            .filter(|registration| predicate(registration))
            .filter_map(|registration| {
                registration
                    .handler
                    .upgrade()
                    .map(|handler| (registration.id, handler))
            })
            .collect()
    }

    fn prune(&mut self) {
        self.registrations.retain(Registration::is_live);
    }
}
