//! Live delivery: the frame protocol and the subscription registry

pub mod frames;
pub mod registry;

pub use frames::{Frame, ResponseStream};
pub use registry::{ChannelSubscriber, ConnectionId, DeliveryError, Subscriber, SubscriptionRegistry};
