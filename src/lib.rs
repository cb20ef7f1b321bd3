//! rtc-bridge
//!
//! Lifecycle controllers that sit between an RTC media layer and two
//! platform services: the system call UI (telephony integration) and an
//! out-of-process screen-recording extension.
//!
//! Both controllers are actors. Platform callbacks may arrive on any thread;
//! they are funnelled through one queue per controller before any state
//! changes, and outward hooks run on the controller's own task.

pub mod call;
pub mod capture;
pub mod config;
pub mod error;
pub mod ipc;
pub mod logging;
pub mod sim;

pub use call::{CallAction, CallAuthority, CallHooks, CallSessionController, CallState};
pub use capture::{CaptureEvent, CaptureHooks, CaptureSessionController, CaptureState, FrameProducer};
pub use config::Config;
pub use error::{AuthorityError, BridgeError, CaptureError};
