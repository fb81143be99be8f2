//! Event Risk Guard
//!
//! Detects upcoming corporate/regulatory events and recent sentiment or
//! volatility anomalies for a symbol, and turns them into a risk score and a
//! confidence haircut. Inside an event sit-out window the call is forced to
//! HOLD outright.

mod calendar;
mod guard;

pub use calendar::MergedEventCalendar;
pub use guard::RiskGuard;
