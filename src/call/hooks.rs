//! Outward notification hooks consumed by the media-session layer

use std::fmt;

use super::CallAction;

type VoidHook = Box<dyn Fn() + Send>;
type StringHook = Box<dyn Fn(String) + Send>;
type BoolHook = Box<dyn Fn(bool) + Send>;

/// Closures invoked on confirmed call transitions.
///
/// Hooks are set once while wiring, then moved into the controller. They run
/// on the controller's task, so slow work inside them delays the processing
/// of further authority events. Unset hooks are skipped.
#[derive(Default)]
pub struct CallHooks {
    on_call_started: Option<VoidHook>,
    on_call_ended: Option<VoidHook>,
    on_call_failed: Option<StringHook>,
    on_call_muted: Option<BoolHook>,
    on_call_held: Option<BoolHook>,
}

impl CallHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_call_started(mut self, hook: impl Fn() + Send + 'static) -> Self {
        self.on_call_started = Some(Box::new(hook));
        self
    }

    pub fn on_call_ended(mut self, hook: impl Fn() + Send + 'static) -> Self {
        self.on_call_ended = Some(Box::new(hook));
        self
    }

    /// Receives the authority's human-readable reason
    pub fn on_call_failed(mut self, hook: impl Fn(String) + Send + 'static) -> Self {
        self.on_call_failed = Some(Box::new(hook));
        self
    }

    pub fn on_call_muted(mut self, hook: impl Fn(bool) + Send + 'static) -> Self {
        self.on_call_muted = Some(Box::new(hook));
        self
    }

    pub fn on_call_held(mut self, hook: impl Fn(bool) + Send + 'static) -> Self {
        self.on_call_held = Some(Box::new(hook));
        self
    }

    pub(crate) fn dispatch(&self, action: &CallAction) {
        match action {
            CallAction::Started => {
                if let Some(hook) = &self.on_call_started {
                    hook();
                }
            }
            CallAction::Ended => {
                if let Some(hook) = &self.on_call_ended {
                    hook();
                }
            }
            CallAction::Failed(reason) => {
                if let Some(hook) = &self.on_call_failed {
                    hook(reason.clone());
                }
            }
            CallAction::Muted(muted) => {
                if let Some(hook) = &self.on_call_muted {
                    hook(*muted);
                }
            }
            CallAction::Held(held) => {
                if let Some(hook) = &self.on_call_held {
                    hook(*held);
                }
            }
        }
    }
}

impl fmt::Debug for CallHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallHooks")
            .field("on_call_started", &self.on_call_started.is_some())
            .field("on_call_ended", &self.on_call_ended.is_some())
            .field("on_call_failed", &self.on_call_failed.is_some())
            .field("on_call_muted", &self.on_call_muted.is_some())
            .field("on_call_held", &self.on_call_held.is_some())
            .finish()
    }
}
