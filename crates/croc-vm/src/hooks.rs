//! Debug hook bitmask and dispatch (spec.md §4.5, §9).
//!
//! Grounded on the teacher's event-bitmask shape for native tracing hooks,
//! generalized to the four event kinds spec.md §4.5 names. Per spec.md §9's
//! explicit resolution of the Delay/Line coexistence question, both fire
//! independently at the same instruction boundary — callers test each bit
//! separately rather than treating the two as mutually exclusive.

use croc_runtime::Value;

pub const HOOK_CALL: u8 = 1 << 0;
pub const HOOK_RET: u8 = 1 << 1;
pub const HOOK_LINE: u8 = 1 << 2;
pub const HOOK_DELAY: u8 = 1 << 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookEvent {
    Call,
    Ret,
    /// A tail-called chain's return, reported once per recorded tail call
    /// (spec.md §4.5's "also fires synthetic TailRet events for each
    /// recorded tail-call").
    TailRet,
    Line,
    Delay,
}

impl HookEvent {
    pub fn name(self) -> &'static str {
        match self {
            HookEvent::Call => "call",
            HookEvent::Ret => "ret",
            HookEvent::TailRet => "tailret",
            HookEvent::Line => "line",
            HookEvent::Delay => "delay",
        }
    }

    fn mask_bit(self) -> u8 {
        match self {
            HookEvent::Call => HOOK_CALL,
            HookEvent::Ret | HookEvent::TailRet => HOOK_RET,
            HookEvent::Line => HOOK_LINE,
            HookEvent::Delay => HOOK_DELAY,
        }
    }
}

/// Per-thread hook configuration: the hook function (a `Function` value),
/// the event mask, and the instruction count for `Delay` events.
#[derive(Debug, Clone, Default)]
pub struct HookState {
    pub hook_fn: Option<Value>,
    pub mask: u8,
    pub delay_count: u32,
    delay_remaining: u32,
    /// Set while a hook call is executing, to suppress reentrant firing
    /// (spec.md §4.5: "During hook execution the hook bit is suppressed").
    pub(crate) in_hook: bool,
}

impl HookState {
    pub fn set(&mut self, hook_fn: Value, mask: u8, delay_count: u32) {
        self.hook_fn = Some(hook_fn);
        self.mask = mask;
        self.delay_count = delay_count;
        self.delay_remaining = delay_count;
    }

    pub fn clear(&mut self) {
        self.hook_fn = None;
        self.mask = 0;
    }

    pub fn wants(&self, event: HookEvent) -> bool {
        !self.in_hook && self.hook_fn.is_some() && self.mask & event.mask_bit() != 0
    }

    /// Advance the delay counter by one instruction; returns `true` exactly
    /// when it has just expired (and resets it for the next period).
    pub fn tick_delay(&mut self) -> bool {
        if self.mask & HOOK_DELAY == 0 || self.delay_count == 0 {
            return false;
        }
        self.delay_remaining = self.delay_remaining.saturating_sub(1);
        if self.delay_remaining == 0 {
            self.delay_remaining = self.delay_count;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_and_line_fire_independently_per_spec_open_question() {
        let mut hooks = HookState::default();
        hooks.set(Value::Null, HOOK_LINE | HOOK_DELAY, 2);
        assert!(hooks.wants(HookEvent::Line));
        assert!(hooks.wants(HookEvent::Delay));
        assert!(!hooks.tick_delay());
        assert!(hooks.tick_delay());
    }

    #[test]
    fn reentrant_hook_calls_are_suppressed() {
        let mut hooks = HookState::default();
        hooks.set(Value::Null, HOOK_CALL, 0);
        hooks.in_hook = true;
        assert!(!hooks.wants(HookEvent::Call));
    }
}
