//! Reactive Primitives
//!
//! This module implements the reactive store the workspace handles are built
//! on: cells, selectors, and effects.
//!
//! # Concepts
//!
//! ## Cells
//!
//! A [`Cell`] is a container for mutable state. Every write is a mutation
//! event delivered to the cell's subscribers.
//!
//! ## Selectors
//!
//! A [`Selector`] is a derived value that caches its result. It subscribes
//! to exactly the sources its computation read, and notifies its own
//! observers only when its output changes by value.
//!
//! ## Effects
//!
//! An [`Effect`] is a side-effecting computation that re-runs whenever a
//! source it read changes. The autosave trigger observes workspaces with one.
//!
//! # Implementation Notes
//!
//! Dependency tracking is explicit. Computations receive a [`Tracker`] and
//! read sources through it; the tracker's log becomes the subscription set.
//! Notification goes through the [`Runtime`], which queues changes raised
//! during a notification cycle instead of dispatching them recursively.

mod cell;
mod effect;
mod runtime;
mod selector;
mod subscriber;
mod tracker;

pub use cell::Cell;
pub use effect::Effect;
pub use runtime::{Runtime, Source, SourceId};
pub use selector::Selector;
pub use subscriber::{Notify, SubscriberId, SubscriberList, Subscription};
pub use tracker::{Readable, Tracker};
